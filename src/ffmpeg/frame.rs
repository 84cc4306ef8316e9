// 출력 프레임 / 픽셀 포맷

use ffmpeg_next as ffmpeg;
use serde::{Deserialize, Serialize};

/// 변환 후 비디오 프레임 (라인 패딩 없이 tightly packed)
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// planar 포맷은 plane 순서대로 연속 배치: [Y][U][V] 또는 [Y][UV]
    pub data: Vec<u8>,
    /// 프레젠테이션 타임스탬프 (µs)
    pub pts_us: Option<i64>,
}

impl Frame {
    /// 첫 번째 plane의 한 줄 바이트 수
    pub fn stride(&self) -> usize {
        self.format.plane_layout(self.width, self.height)[0].0
    }
}

/// 출력 픽셀 포맷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed BGRA 32bpp (macOS CGImage/CVPixelBuffer 기본)
    Bgra,
    /// Packed RGBA 32bpp
    Rgba,
    /// Semi-planar YUV 4:2:0 (Metal/VideoToolbox 텍스처용)
    Nv12,
    /// Planar YUV 4:2:0
    Yuv420p,
}

impl PixelFormat {
    pub fn to_ffmpeg(self) -> ffmpeg::format::Pixel {
        use ffmpeg::format::Pixel;
        match self {
            Self::Bgra => Pixel::BGRA,
            Self::Rgba => Pixel::RGBA,
            Self::Nv12 => Pixel::NV12,
            Self::Yuv420p => Pixel::YUV420P,
        }
    }

    /// FFI 코드 (include/airsync_media.h의 AIRSYNC_PIXEL_* 와 동일)
    pub fn code(self) -> u32 {
        match self {
            Self::Bgra => 0,
            Self::Rgba => 1,
            Self::Nv12 => 2,
            Self::Yuv420p => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Bgra),
            1 => Some(Self::Rgba),
            2 => Some(Self::Nv12),
            3 => Some(Self::Yuv420p),
            _ => None,
        }
    }

    /// plane별 (한 줄 바이트 수, 줄 수)
    pub fn plane_layout(self, width: u32, height: u32) -> Vec<(usize, usize)> {
        let w = width as usize;
        let h = height as usize;
        let chroma_w = w.div_ceil(2);
        let chroma_h = h.div_ceil(2);
        match self {
            Self::Bgra | Self::Rgba => vec![(w * 4, h)],
            Self::Nv12 => vec![(w, h), (chroma_w * 2, chroma_h)],
            Self::Yuv420p => vec![(w, h), (chroma_w, chroma_h), (chroma_w, chroma_h)],
        }
    }

    /// width x height 프레임의 전체 버퍼 크기
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        self.plane_layout(width, height)
            .iter()
            .map(|(row_bytes, rows)| row_bytes * rows)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(PixelFormat::Bgra.buffer_size(1920, 1080), 1920 * 1080 * 4);
        assert_eq!(PixelFormat::Nv12.buffer_size(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(PixelFormat::Yuv420p.buffer_size(4, 2), 8 + 2 + 2);
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        // 5x3 → chroma 3x2
        assert_eq!(PixelFormat::Yuv420p.plane_layout(5, 3), vec![(5, 3), (3, 2), (3, 2)]);
        assert_eq!(PixelFormat::Nv12.plane_layout(5, 3), vec![(5, 3), (6, 2)]);
    }

    #[test]
    fn test_codes() {
        for format in [PixelFormat::Bgra, PixelFormat::Rgba, PixelFormat::Nv12, PixelFormat::Yuv420p] {
            assert_eq!(PixelFormat::from_code(format.code()), Some(format));
        }
        assert_eq!(PixelFormat::from_code(42), None);
    }

    #[test]
    fn test_stride() {
        let frame = Frame {
            width: 10,
            height: 2,
            format: PixelFormat::Rgba,
            data: vec![0; 80],
            pts_us: None,
        };
        assert_eq!(frame.stride(), 40);
    }
}
