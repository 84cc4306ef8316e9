// 색공간 변환 (libswscale)
// 디코더 출력(YUV) → 표시용 포맷(BGRA 등), 필요 시 다운스케일
// 기기 회전 등으로 소스 크기/포맷이 바뀌면 스케일러를 다시 생성

use ffmpeg_next as ffmpeg;
use log::{info, warn};

use crate::config::{ColorMatrix, ColorRange, OutputConfig};
use crate::error::{Error, Result};
use crate::ffmpeg::frame::{Frame, PixelFormat};

// libswscale/swscale.h 의 SWS_CS_* 값
const SWS_CS_ITU709: i32 = 1;
const SWS_CS_ITU601: i32 = 5;

/// 현재 소스에 맞춰 생성된 스케일러
struct ScalerState {
    context: ffmpeg::software::scaling::Context,
    src_format: ffmpeg::format::Pixel,
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
}

impl ScalerState {
    fn matches(&self, format: ffmpeg::format::Pixel, width: u32, height: u32) -> bool {
        self.src_format == format && self.src_width == width && self.src_height == height
    }
}

/// 디코딩된 프레임 → 출력 Frame 변환기
pub struct FrameConverter {
    config: OutputConfig,
    scaler: Option<ScalerState>,
}

impl FrameConverter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config, scaler: None }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// 출력 설정 변경 (다음 프레임에서 스케일러 재생성)
    pub fn reconfigure(&mut self, config: OutputConfig) {
        self.config = config;
        self.scaler = None;
    }

    /// 마지막으로 변환한 출력 크기 (아직 변환 전이면 None)
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.scaler.as_ref().map(|s| (s.dst_width, s.dst_height))
    }

    /// 디코딩된 프레임을 출력 포맷으로 변환
    /// bounds check: 손상된 프레임이 와도 panic 대신 Err 반환
    pub fn convert(&mut self, raw: &ffmpeg::frame::Video, pts_us: Option<i64>) -> Result<Frame> {
        let width = raw.width();
        let height = raw.height();
        if width == 0 || height == 0 {
            return Err(Error::invalid_data("frame has zero dimensions"));
        }

        let output_format = self.config.format;
        let state = self.ensure_scaler(raw.format(), width, height)?;

        let mut scaled = ffmpeg::frame::Video::empty();
        state.context.run(raw, &mut scaled)?;

        let (dst_width, dst_height) = (state.dst_width, state.dst_height);
        let layout = output_format.plane_layout(dst_width, dst_height);
        let mut data = Vec::with_capacity(output_format.buffer_size(dst_width, dst_height));

        for (plane, (row_bytes, rows)) in layout.into_iter().enumerate() {
            copy_plane(scaled.data(plane), scaled.stride(plane), row_bytes, rows, &mut data)?;
        }

        Ok(Frame {
            width: dst_width,
            height: dst_height,
            format: output_format,
            data,
            pts_us,
        })
    }

    /// 소스가 바뀌었으면 스케일러 재생성
    fn ensure_scaler(
        &mut self,
        src_format: ffmpeg::format::Pixel,
        src_width: u32,
        src_height: u32,
    ) -> Result<&mut ScalerState> {
        let stale = self
            .scaler
            .as_ref()
            .map_or(true, |s| !s.matches(src_format, src_width, src_height));

        if stale {
            let (dst_width, dst_height) = fit_within(
                src_width,
                src_height,
                self.config.max_width,
                self.config.max_height,
            );

            let mut context = ffmpeg::software::scaling::Context::get(
                src_format,
                src_width,
                src_height,
                self.config.format.to_ffmpeg(),
                dst_width,
                dst_height,
                self.config.quality.flags(),
            )?;

            let matrix = self.config.color_matrix.resolve(src_width, src_height);
            apply_colorspace(&mut context, matrix, self.config.source_range, self.config.format);

            info!(
                "Scaler configured: {:?} {}x{} -> {:?} {}x{} ({:?})",
                src_format, src_width, src_height, self.config.format, dst_width, dst_height, matrix
            );

            self.scaler = Some(ScalerState {
                context,
                src_format,
                src_width,
                src_height,
                dst_width,
                dst_height,
            });
        }

        self.scaler
            .as_mut()
            .ok_or_else(|| Error::invalid_data("scaler not initialized"))
    }
}

/// YUV 행렬 / 범위 지정 (swscale 기본값은 BT.601)
fn apply_colorspace(
    context: &mut ffmpeg::software::scaling::Context,
    matrix: ColorMatrix,
    source_range: ColorRange,
    output: PixelFormat,
) {
    let colorspace = match matrix {
        ColorMatrix::Bt709 => SWS_CS_ITU709,
        ColorMatrix::Bt601 | ColorMatrix::Auto => SWS_CS_ITU601,
    };
    let src_range = i32::from(source_range == ColorRange::Full);
    // RGB 출력은 항상 full range, YUV 출력은 소스 범위 유지
    let dst_range = match output {
        PixelFormat::Bgra | PixelFormat::Rgba => 1,
        PixelFormat::Nv12 | PixelFormat::Yuv420p => src_range,
    };

    let ret = unsafe {
        let coefficients = ffmpeg::ffi::sws_getCoefficients(colorspace);
        ffmpeg::ffi::sws_setColorspaceDetails(
            context.as_mut_ptr(),
            coefficients,
            src_range,
            coefficients,
            dst_range,
            0,
            1 << 16,
            1 << 16,
        )
    };
    if ret < 0 {
        warn!("sws_setColorspaceDetails failed ({}), using swscale defaults", ret);
    }
}

/// max 크기 안에 비율 유지하며 맞춤 (업스케일 없음)
/// 축소 시 짝수로 내림 (YUV 4:2:0 크로마 정렬), 최소 2x2
pub fn fit_within(
    src_width: u32,
    src_height: u32,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (u32, u32) {
    let scale_w = max_width.map_or(1.0, |m| f64::from(m) / f64::from(src_width));
    let scale_h = max_height.map_or(1.0, |m| f64::from(m) / f64::from(src_height));
    let scale = scale_w.min(scale_h);

    if scale >= 1.0 {
        return (src_width, src_height);
    }

    let width = ((f64::from(src_width) * scale) as u32 & !1).max(2);
    let height = ((f64::from(src_height) * scale) as u32 & !1).max(2);
    (width, height)
}

/// stride 패딩을 제거하며 plane 복사
pub fn copy_plane(
    src: &[u8],
    src_stride: usize,
    row_bytes: usize,
    rows: usize,
    dst: &mut Vec<u8>,
) -> Result<()> {
    if rows == 0 {
        return Ok(());
    }

    if src_stride < row_bytes {
        return Err(Error::invalid_data(format!(
            "Invalid stride: {} < {} (row bytes)",
            src_stride, row_bytes
        )));
    }

    let required = (rows - 1) * src_stride + row_bytes;
    if src.len() < required {
        return Err(Error::invalid_data(format!(
            "Plane data too small: got {} bytes, need {} ({} rows, stride={})",
            src.len(),
            required,
            rows,
            src_stride
        )));
    }

    for row in 0..rows {
        let offset = row * src_stride;
        dst.extend_from_slice(&src[offset..offset + row_bytes]);
    }
    Ok(())
}
