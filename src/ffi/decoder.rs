// Video Decoder FFI - 동기 디코딩 API
// 패킷 입력 → 변환된 프레임을 호출 스레드에서 바로 꺼냄 (스레드 관리는 Swift 측)

use log::info;
use std::collections::VecDeque;
use std::ffi::{c_char, c_void};
use std::sync::Mutex;

use crate::config::PipelineConfig;
use crate::ffi::packet_from_raw;
use crate::ffi::types::{fail, invalid_param, lock, str_from_ptr, AirSyncFrame, ErrorCode};
use crate::ffmpeg::{Frame, FrameConverter, VideoCodec, VideoDecoder};

/// 디코더 + 변환기 + 아직 꺼내가지 않은 프레임
pub struct DecoderHandle {
    decoder: VideoDecoder,
    converter: FrameConverter,
    ready: VecDeque<Frame>,
    max_ready: usize,
}

impl DecoderHandle {
    fn new(codec: VideoCodec, config: PipelineConfig) -> crate::Result<Self> {
        let config = config.validated()?;
        let decoder = VideoDecoder::new(codec, &config.video)?;
        Ok(Self {
            decoder,
            converter: FrameConverter::new(config.output),
            ready: VecDeque::new(),
            max_ready: config.frame_queue_capacity,
        })
    }

    fn send(&mut self, packet: &crate::ffmpeg::Packet) -> crate::Result<usize> {
        let raw_frames = self.decoder.decode(packet)?;
        let count = raw_frames.len();
        for raw in &raw_frames {
            let pts_us = raw.pts().or_else(|| raw.timestamp());
            let frame = self.converter.convert(raw, pts_us)?;
            // 꺼내가지 않은 오래된 프레임은 버림
            while self.ready.len() >= self.max_ready {
                self.ready.pop_front();
            }
            self.ready.push_back(frame);
        }
        Ok(count)
    }
}

/// 비디오 디코더 생성
/// codec_tag: 'h264' / 'h265' / 'av01' fourcc (big-endian)
/// config_json: PipelineConfig JSON (NULL 또는 빈 문자열이면 기본값)
#[no_mangle]
pub extern "C" fn airsync_video_decoder_create(
    codec_tag: u32,
    config_json: *const c_char,
    out_decoder: *mut *mut c_void,
) -> i32 {
    if out_decoder.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    let json = match unsafe { str_from_ptr(config_json) } {
        Ok(json) => json.unwrap_or(""),
        Err(()) => return invalid_param("config_json is not valid UTF-8"),
    };

    let result = VideoCodec::from_tag(codec_tag)
        .and_then(|codec| Ok((codec, PipelineConfig::from_json(json)?)))
        .and_then(|(codec, config)| DecoderHandle::new(codec, config));

    match result {
        Ok(handle) => {
            info!("Video decoder handle created: {:?}", handle.decoder);
            unsafe {
                *out_decoder = Box::into_raw(Box::new(Mutex::new(handle))) as *mut c_void;
            }
            ErrorCode::Success as i32
        }
        Err(e) => fail("airsync_video_decoder_create", &e),
    }
}

/// 패킷 전달 (flags: PACKET_FLAG_CONFIG / PACKET_FLAG_KEY, pts_us < 0 이면 pts 없음)
/// out_frames(옵션): 이번 패킷으로 디코딩된 프레임 수
#[no_mangle]
pub extern "C" fn airsync_video_decoder_send_packet(
    decoder: *mut c_void,
    data: *const u8,
    len: usize,
    pts_us: i64,
    flags: u32,
    out_frames: *mut u32,
) -> i32 {
    if decoder.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let packet = match packet_from_raw(data, len, pts_us, flags) {
            Ok(packet) => packet,
            Err(code) => return code as i32,
        };

        let handle_mutex = &*(decoder as *const Mutex<DecoderHandle>);
        let mut handle = lock(handle_mutex, "airsync_video_decoder_send_packet");

        match handle.send(&packet) {
            Ok(count) => {
                if !out_frames.is_null() {
                    *out_frames = count as u32;
                }
                ErrorCode::Success as i32
            }
            Err(e) => fail("airsync_video_decoder_send_packet", &e),
        }
    }
}

/// 디코딩된 프레임 하나 꺼내기 (오래된 순)
/// 프레임이 없으면 NoFrame, out_frame->data는 airsync_frame_free로 해제
#[no_mangle]
pub extern "C" fn airsync_video_decoder_receive_frame(
    decoder: *mut c_void,
    out_frame: *mut AirSyncFrame,
) -> i32 {
    if decoder.is_null() || out_frame.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let handle_mutex = &*(decoder as *const Mutex<DecoderHandle>);
        let mut handle = lock(handle_mutex, "airsync_video_decoder_receive_frame");

        match handle.ready.pop_front() {
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

/// 디코더 리셋 (연결 재수립 / 스트림 불연속 시, 다음 키프레임부터 재개)
#[no_mangle]
pub extern "C" fn airsync_video_decoder_reset(decoder: *mut c_void) -> i32 {
    if decoder.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let handle_mutex = &*(decoder as *const Mutex<DecoderHandle>);
        let mut handle = lock(handle_mutex, "airsync_video_decoder_reset");
        handle.decoder.reset();
        handle.ready.clear();
    }

    ErrorCode::Success as i32
}

/// 디코더 파괴
#[no_mangle]
pub extern "C" fn airsync_video_decoder_destroy(decoder: *mut c_void) -> i32 {
    if decoder.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let _ = Box::from_raw(decoder as *mut Mutex<DecoderHandle>);
    }

    ErrorCode::Success as i32
}

/// airsync_*_receive_frame / try_get_frame으로 받은 프레임 버퍼 해제
#[no_mangle]
pub extern "C" fn airsync_frame_free(frame: *mut AirSyncFrame) -> i32 {
    if frame.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        (*frame).release();
    }

    ErrorCode::Success as i32
}
