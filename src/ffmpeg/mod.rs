// FFmpeg 래퍼 모듈
// 비디오/오디오 디코딩 (avcodec) + 색공간 변환 (swscale) + 리샘플링 (swresample)

pub mod audio_decoder;
pub mod codec;
pub mod decoder;
pub mod frame;
pub mod scaler;
#[cfg(test)]
pub(crate) mod testdata;

pub use audio_decoder::{AudioChunk, AudioDecoder};
pub use codec::{AudioCodec, Packet, VideoCodec};
pub use decoder::{DecoderState, VideoDecoder};
pub use frame::{Frame, PixelFormat};
pub use scaler::FrameConverter;
