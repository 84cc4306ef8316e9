// AirSync 미디어 엔진
// Rust + ffmpeg-next 기반 미러링 디코딩 엔진 (Swift 호스트는 C ABI로 호출)

use std::sync::Once;

/// 디버그 로그 매크로: `cargo build --features debug_log` 시에만 출력
/// 패킷 단위 trace 로그용, 평소 빌드에서는 컴파일 자체에서 제외됨
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug_log")]
        log::trace!($($arg)*);
    };
}

pub mod config;
pub mod delivery;
pub mod error;
pub mod ffi;
pub mod ffmpeg;
pub mod stream;

pub use config::{DecoderConfig, OutputConfig, PipelineConfig};
pub use delivery::{FrameSink, Pipeline, PipelineStats};
pub use error::{Error, Result};
pub use crate::ffmpeg::{AudioCodec, Frame, Packet, PixelFormat, VideoCodec};

/// 라이브러리 버전 (Cargo.toml)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static INIT: Once = Once::new();

/// 로거 + FFmpeg 초기화 (여러 번 호출해도 안전)
/// RUST_LOG 미설정 시 info 레벨
pub fn init() -> Result<()> {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
        // FFmpeg 내부 로그는 경고 이상만
        ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Warning);
        log::info!("airsync_media {} initialized", VERSION);
    });
    ffmpeg_next::init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
