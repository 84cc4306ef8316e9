// Pipeline FFI - 백그라운드 디코딩 파이프라인
// Swift 네트워크 스레드: push_packet / push_bytes
// Swift 렌더 스레드: try_get_frame (또는 create 시 콜백 등록)

use std::ffi::{c_char, c_void};

use crate::config::PipelineConfig;
use crate::delivery::{FrameSink, Pipeline};
use crate::ffi::packet_from_raw;
use crate::ffi::types::{fail, invalid_param, str_from_ptr, AirSyncFrame, AirSyncStats, ErrorCode};
use crate::ffmpeg::{Frame, VideoCodec};

/// 프레임 콜백 (디코드 스레드에서 호출, frame은 콜백 안에서만 유효)
pub type AirSyncFrameCallback = extern "C" fn(ctx: *mut c_void, frame: *const AirSyncFrame);

/// C 콜백 + 호출측 컨텍스트
struct CallbackSink {
    callback: AirSyncFrameCallback,
    ctx: *mut c_void,
}

// ctx의 스레드 안전성은 호출측(Swift) 책임
unsafe impl Send for CallbackSink {}

impl FrameSink for CallbackSink {
    fn on_frame(&self, frame: &Frame) {
        let view = AirSyncFrame::borrowed(frame);
        (self.callback)(self.ctx, &view);
    }
}

/// 파이프라인 생성 + 디코드 스레드 시작
/// callback: NULL이면 폴링(try_get_frame)만 사용
#[no_mangle]
pub extern "C" fn airsync_pipeline_create(
    codec_tag: u32,
    config_json: *const c_char,
    callback: Option<AirSyncFrameCallback>,
    ctx: *mut c_void,
    out_pipeline: *mut *mut c_void,
) -> i32 {
    if out_pipeline.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    let json = match unsafe { str_from_ptr(config_json) } {
        Ok(json) => json.unwrap_or(""),
        Err(()) => return invalid_param("config_json is not valid UTF-8"),
    };

    let sink = callback.map(|callback| Box::new(CallbackSink { callback, ctx }) as Box<dyn FrameSink>);

    let result = VideoCodec::from_tag(codec_tag)
        .and_then(|codec| Ok((codec, PipelineConfig::from_json(json)?)))
        .and_then(|(codec, config)| Pipeline::start(codec, config, sink));

    match result {
        Ok(pipeline) => {
            unsafe {
                *out_pipeline = Box::into_raw(Box::new(pipeline)) as *mut c_void;
            }
            ErrorCode::Success as i32
        }
        Err(e) => fail("airsync_pipeline_create", &e),
    }
}

/// 패킷 하나 공급 (패킷 큐가 가득 차면 블록)
#[no_mangle]
pub extern "C" fn airsync_pipeline_push_packet(
    pipeline: *mut c_void,
    data: *const u8,
    len: usize,
    pts_us: i64,
    flags: u32,
) -> i32 {
    if pipeline.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let packet = match packet_from_raw(data, len, pts_us, flags) {
            Ok(packet) => packet,
            Err(code) => return code as i32,
        };

        let pipeline = &*(pipeline as *const Pipeline);
        match pipeline.push_packet(packet) {
            Ok(()) => ErrorCode::Success as i32,
            Err(e) => fail("airsync_pipeline_push_packet", &e),
        }
    }
}

/// 소켓에서 읽은 프레이밍된 바이트 공급 (청크 경계 무관)
/// out_packets(옵션): 완성되어 큐에 들어간 패킷 수
#[no_mangle]
pub extern "C" fn airsync_pipeline_push_bytes(
    pipeline: *mut c_void,
    data: *const u8,
    len: usize,
    out_packets: *mut u32,
) -> i32 {
    if pipeline.is_null() || (data.is_null() && len > 0) {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let bytes: &[u8] = if len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(data, len)
        };

        let pipeline = &*(pipeline as *const Pipeline);
        match pipeline.push_bytes(bytes) {
            Ok(count) => {
                if !out_packets.is_null() {
                    *out_packets = count as u32;
                }
                ErrorCode::Success as i32
            }
            Err(e) => fail("airsync_pipeline_push_bytes", &e),
        }
    }
}

/// 최신 프레임 가져오기 (즉시 반환, 없으면 NoFrame)
/// out_frame->data는 airsync_frame_free로 해제
#[no_mangle]
pub extern "C" fn airsync_pipeline_try_get_frame(
    pipeline: *mut c_void,
    out_frame: *mut AirSyncFrame,
) -> i32 {
    if pipeline.is_null() || out_frame.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let pipeline = &*(pipeline as *const Pipeline);
        match pipeline.try_get_frame() {
            Some(frame) => {
                *out_frame = AirSyncFrame::from_frame(frame);
                ErrorCode::Success as i32
            }
            None => {
                *out_frame = AirSyncFrame::empty();
                ErrorCode::NoFrame as i32
            }
        }
    }
}

/// 통계 조회
#[no_mangle]
pub extern "C" fn airsync_pipeline_get_stats(
    pipeline: *mut c_void,
    out_stats: *mut AirSyncStats,
) -> i32 {
    if pipeline.is_null() || out_stats.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let pipeline = &*(pipeline as *const Pipeline);
        *out_stats = AirSyncStats::from(pipeline.stats());
    }

    ErrorCode::Success as i32
}

/// 디코더 / 조립기 / 프레임 큐 리셋 (재연결 시)
#[no_mangle]
pub extern "C" fn airsync_pipeline_reset(pipeline: *mut c_void) -> i32 {
    if pipeline.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let pipeline = &*(pipeline as *const Pipeline);
        match pipeline.request_reset() {
            Ok(()) => ErrorCode::Success as i32,
            Err(e) => fail("airsync_pipeline_reset", &e),
        }
    }
}

/// 디코드 스레드 정지 (join까지 대기). 이후 push는 Closed
#[no_mangle]
pub extern "C" fn airsync_pipeline_stop(pipeline: *mut c_void) -> i32 {
    if pipeline.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let pipeline = &*(pipeline as *const Pipeline);
        pipeline.stop();
    }

    ErrorCode::Success as i32
}

/// 파이프라인 파괴 (정지 안 했으면 정지 후 해제)
#[no_mangle]
pub extern "C" fn airsync_pipeline_destroy(pipeline: *mut c_void) -> i32 {
    if pipeline.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let _ = Box::from_raw(pipeline as *mut Pipeline);
    }

    ErrorCode::Success as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::codec::fourcc;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn count_frames(ctx: *mut c_void, frame: *const AirSyncFrame) {
        let counter = unsafe { &*(ctx as *const AtomicUsize) };
        let frame = unsafe { &*frame };
        assert!(!frame.data.is_null());
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_callback_sink_passes_borrowed_frame() {
        let counter = AtomicUsize::new(0);
        let sink = CallbackSink {
            callback: count_frames,
            ctx: &counter as *const AtomicUsize as *mut c_void,
        };
        let frame = Frame {
            width: 2,
            height: 2,
            format: crate::ffmpeg::PixelFormat::Rgba,
            data: vec![0; 16],
            pts_us: Some(5),
        };
        sink.on_frame(&frame);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // 빌린 뷰이므로 원본은 그대로
        assert_eq!(frame.data.len(), 16);
    }

    #[test]
    fn test_create_stop_destroy() {
        let mut pipeline = ptr::null_mut();
        let code =
            airsync_pipeline_create(fourcc(b"h264"), ptr::null(), None, ptr::null_mut(), &mut pipeline);
        assert_eq!(code, ErrorCode::Success as i32);

        let mut stats = AirSyncStats::default();
        assert_eq!(airsync_pipeline_get_stats(pipeline, &mut stats), ErrorCode::Success as i32);
        assert_eq!(stats.running, 1);

        assert_eq!(airsync_pipeline_stop(pipeline), ErrorCode::Success as i32);
        let payload = [1u8, 2, 3];
        assert_eq!(
            airsync_pipeline_push_packet(pipeline, payload.as_ptr(), payload.len(), 0, 0),
            ErrorCode::Closed as i32
        );
        assert_eq!(airsync_pipeline_destroy(pipeline), ErrorCode::Success as i32);
    }

    #[test]
    fn test_unknown_codec() {
        let mut pipeline = ptr::null_mut();
        let code =
            airsync_pipeline_create(0, ptr::null(), None, ptr::null_mut(), &mut pipeline);
        assert_eq!(code, ErrorCode::UnsupportedCodec as i32);
        assert!(pipeline.is_null());
    }
}
