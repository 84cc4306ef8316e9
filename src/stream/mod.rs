// 디먹서 모듈
// 미러 스트림 프레이밍 (네트워크) + 컨테이너 파일 (녹화본 재생)

pub mod file;
pub mod framing;

pub use file::{probe, FileSource, MediaInfo};
pub use framing::{AudioStreamHeader, PacketAssembler, PacketReader, VideoStreamHeader};
