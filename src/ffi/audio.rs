// Audio Decoder FFI - 미러 오디오 패킷 → f32 PCM
// 재생(AVAudioEngine 등)은 Swift 측에서 담당

use std::ffi::c_void;
use std::sync::Mutex;

use crate::ffi::packet_from_raw;
use crate::ffi::types::{fail, lock, ErrorCode};
use crate::ffmpeg::{AudioCodec, AudioDecoder};

/// 오디오 디코더 생성
/// codec_tag: 'opus' / 'aac ' / 'flac' / 'raw ' fourcc
/// sample_rate / channels: 스트림 초기 포맷 (raw PCM은 그대로 사용)
#[no_mangle]
pub extern "C" fn airsync_audio_decoder_create(
    codec_tag: u32,
    sample_rate: u32,
    channels: u32,
    out_decoder: *mut *mut c_void,
) -> i32 {
    if out_decoder.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    let result = AudioCodec::from_tag(codec_tag)
        .and_then(|codec| AudioDecoder::new(codec, sample_rate, channels));

    match result {
        Ok(decoder) => {
            unsafe {
                *out_decoder = Box::into_raw(Box::new(Mutex::new(decoder))) as *mut c_void;
            }
            ErrorCode::Success as i32
        }
        Err(e) => fail("airsync_audio_decoder_create", &e),
    }
}

/// 패킷 디코딩
/// 성공 시 out_samples에 interleaved f32 버퍼 (airsync_audio_free_samples로 해제)
/// out_sample_count: f32 개수 (채널 포함), 출력 샘플 없으면 NoFrame
#[allow(clippy::too_many_arguments)]
#[no_mangle]
pub extern "C" fn airsync_audio_decoder_send_packet(
    decoder: *mut c_void,
    data: *const u8,
    len: usize,
    pts_us: i64,
    flags: u32,
    out_samples: *mut *mut f32,
    out_sample_count: *mut usize,
    out_sample_rate: *mut u32,
    out_channels: *mut u32,
) -> i32 {
    if decoder.is_null()
        || out_samples.is_null()
        || out_sample_count.is_null()
        || out_sample_rate.is_null()
        || out_channels.is_null()
    {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        *out_samples = std::ptr::null_mut();
        *out_sample_count = 0;

        let packet = match packet_from_raw(data, len, pts_us, flags) {
            Ok(packet) => packet,
            Err(code) => return code as i32,
        };

        let decoder_mutex = &*(decoder as *const Mutex<AudioDecoder>);
        let mut decoder = lock(decoder_mutex, "airsync_audio_decoder_send_packet");

        match decoder.decode(&packet) {
            Ok(Some(chunk)) => {
                *out_sample_rate = chunk.sample_rate;
                *out_channels = chunk.channels;
                *out_sample_count = chunk.samples.len();
                let samples_box = chunk.samples.into_boxed_slice();
                *out_samples = Box::into_raw(samples_box) as *mut f32;
                ErrorCode::Success as i32
            }
            Ok(None) => ErrorCode::NoFrame as i32,
            Err(e) => fail("airsync_audio_decoder_send_packet", &e),
        }
    }
}

/// send_packet이 반환한 샘플 버퍼 해제
#[no_mangle]
pub extern "C" fn airsync_audio_free_samples(samples: *mut f32, count: usize) -> i32 {
    if samples.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let slice = std::slice::from_raw_parts_mut(samples, count);
        let _ = Box::from_raw(slice as *mut [f32]);
    }

    ErrorCode::Success as i32
}

/// 오디오 디코더 파괴
#[no_mangle]
pub extern "C" fn airsync_audio_decoder_destroy(decoder: *mut c_void) -> i32 {
    if decoder.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let _ = Box::from_raw(decoder as *mut Mutex<AudioDecoder>);
    }

    ErrorCode::Success as i32
}
