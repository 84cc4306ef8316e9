// 에러 타입
// 라이브러리 내부는 Result<T>로 전파하고, FFI 경계에서만 ErrorCode로 변환

use ffmpeg_next as ffmpeg;
use thiserror::Error;

/// airsync_media 에러
#[derive(Error, Debug)]
pub enum Error {
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// 복구 불가능한 디코더 상태 (연속 에러 한도 초과 등)
    #[error("Decoder unavailable: {0}")]
    DecoderUnavailable(String),

    /// 정지된 파이프라인에 패킷을 넣은 경우
    #[error("Pipeline closed")]
    Closed,
}

impl Error {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub fn unsupported_codec(msg: impl Into<String>) -> Self {
        Self::UnsupportedCodec(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::invalid_data("packet too large").to_string(),
            "Invalid data: packet too large"
        );
        assert_eq!(Error::Closed.to_string(), "Pipeline closed");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
