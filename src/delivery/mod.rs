// 프레임 전달 모듈
// 디코드 스레드 → 호스트 앱 (큐 폴링 또는 콜백)

pub mod frame_queue;
pub mod pipeline;

pub use frame_queue::FrameQueue;
pub use pipeline::{FrameSink, Pipeline, PipelineStats};
