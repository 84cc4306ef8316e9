// 파이프라인 설정
// 호스트 앱은 JSON 문자열로 전달 (null/빈 문자열이면 기본값)

use ffmpeg_next as ffmpeg;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ffmpeg::PixelFormat;

/// 자동 설정 시 디코더 스레드 상한
const MAX_AUTO_THREADS: usize = 4;

/// 스케일러 품질
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingQuality {
    Fast,
    #[default]
    Bilinear,
    Bicubic,
    Lanczos,
}

impl ScalingQuality {
    pub fn flags(self) -> ffmpeg::software::scaling::Flags {
        use ffmpeg::software::scaling::Flags;
        match self {
            Self::Fast => Flags::FAST_BILINEAR,
            Self::Bilinear => Flags::BILINEAR,
            Self::Bicubic => Flags::BICUBIC,
            Self::Lanczos => Flags::LANCZOS,
        }
    }
}

/// YUV → RGB 변환 행렬
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMatrix {
    /// 짧은 변이 720 이상이면 BT.709, 그 외 BT.601 (세로 화면 포함)
    #[default]
    Auto,
    Bt601,
    Bt709,
}

impl ColorMatrix {
    /// Auto를 소스 해상도의 짧은 변 기준으로 확정
    pub fn resolve(self, width: u32, height: u32) -> Self {
        match self {
            Self::Auto if width.min(height) >= 720 => Self::Bt709,
            Self::Auto => Self::Bt601,
            other => other,
        }
    }
}

/// 소스 YUV 값 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorRange {
    /// 16-235 (MPEG, 대부분의 하드웨어 인코더 출력)
    #[default]
    Limited,
    /// 0-255 (JPEG)
    Full,
}

/// 색공간 변환 출력 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: PixelFormat,
    /// 최대 출력 크기 (None이면 소스 크기 유지, 업스케일 없음)
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub quality: ScalingQuality,
    pub color_matrix: ColorMatrix,
    pub source_range: ColorRange,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::Bgra,
            max_width: None,
            max_height: None,
            quality: ScalingQuality::default(),
            color_matrix: ColorMatrix::default(),
            source_range: ColorRange::default(),
        }
    }
}

/// 비디오 디코더 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// 0이면 자동 (코어 수, 최대 4)
    pub threads: usize,
    /// 프레임 지연 최소화 (slice threading + LOW_DELAY 플래그)
    pub low_delay: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            low_delay: true,
        }
    }
}

impl DecoderConfig {
    pub fn thread_count(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|p| p.get().min(MAX_AUTO_THREADS))
            .unwrap_or(1)
    }
}

/// 전체 파이프라인 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub video: DecoderConfig,
    pub output: OutputConfig,
    /// 전달 대기 프레임 수 (초과 시 가장 오래된 프레임 drop)
    pub frame_queue_capacity: usize,
    /// 디코드 스레드 앞 패킷 큐 크기 (가득 차면 push가 대기)
    pub packet_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video: DecoderConfig::default(),
            output: OutputConfig::default(),
            frame_queue_capacity: 3,
            packet_queue_capacity: 64,
        }
    }
}

impl PipelineConfig {
    /// JSON 파싱 + 검증. 누락된 필드는 기본값
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(json)?;
        config.validated()
    }

    /// 용량 검증, 최대 크기는 짝수로 내림 (YUV 4:2:0 출력 제약)
    pub fn validated(mut self) -> Result<Self> {
        if self.frame_queue_capacity == 0 {
            return Err(Error::invalid_data("frame_queue_capacity must be > 0"));
        }
        if self.packet_queue_capacity == 0 {
            return Err(Error::invalid_data("packet_queue_capacity must be > 0"));
        }
        self.output.max_width = even_limit(self.output.max_width)?;
        self.output.max_height = even_limit(self.output.max_height)?;
        Ok(self)
    }
}

fn even_limit(limit: Option<u32>) -> Result<Option<u32>> {
    match limit {
        None => Ok(None),
        Some(v) if v < 2 => Err(Error::invalid_data(format!("max size too small: {}", v))),
        Some(v) => Ok(Some(v & !1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(PipelineConfig::from_json("").unwrap(), PipelineConfig::default());
        assert_eq!(PipelineConfig::from_json("{}").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config = PipelineConfig::from_json(
            r#"{"output": {"format": "nv12", "max_width": 1281, "quality": "lanczos"}}"#,
        )
        .unwrap();
        assert_eq!(config.output.format, PixelFormat::Nv12);
        assert_eq!(config.output.max_width, Some(1280));
        assert_eq!(config.output.max_height, None);
        assert_eq!(config.output.quality, ScalingQuality::Lanczos);
        assert_eq!(config.frame_queue_capacity, 3);
        assert!(config.video.low_delay);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = PipelineConfig::from_json(r#"{"frame_queue_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = PipelineConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_color_matrix_auto() {
        assert_eq!(ColorMatrix::Auto.resolve(1920, 1080), ColorMatrix::Bt709);
        assert_eq!(ColorMatrix::Auto.resolve(640, 480), ColorMatrix::Bt601);
        assert_eq!(ColorMatrix::Bt601.resolve(3840, 2160), ColorMatrix::Bt601);
    }

    #[test]
    fn test_color_matrix_auto_portrait() {
        // 폰 세로 화면: 높이가 아닌 짧은 변(너비)으로 판단
        assert_eq!(ColorMatrix::Auto.resolve(480, 854), ColorMatrix::Bt601);
        assert_eq!(ColorMatrix::Auto.resolve(1080, 2400), ColorMatrix::Bt709);
        assert_eq!(ColorMatrix::Auto.resolve(720, 1280), ColorMatrix::Bt709);
    }

    #[test]
    fn test_thread_count() {
        let explicit = DecoderConfig { threads: 2, low_delay: false };
        assert_eq!(explicit.thread_count(), 2);
        let auto = DecoderConfig::default().thread_count();
        assert!((1..=MAX_AUTO_THREADS).contains(&auto));
    }
}
