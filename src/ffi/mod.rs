// FFI 모듈 - Swift 연동 (C ABI)
// 선언은 include/airsync_media.h 와 일치해야 함

pub mod audio;
pub mod decoder;
pub mod pipeline;
pub mod probe;
pub mod types;

use std::ffi::c_char;

use crate::ffmpeg::Packet;
use types::{ErrorCode, fail};

/// airsync_*_send_packet / push_packet 의 flags 비트
pub const PACKET_FLAG_CONFIG: u32 = 1;
pub const PACKET_FLAG_KEY: u32 = 1 << 1;

/// 로거 + FFmpeg 초기화 (앱 시작 시 1회, 중복 호출 허용)
#[no_mangle]
pub extern "C" fn airsync_init() -> i32 {
    match crate::init() {
        Ok(()) => {
            types::clear_last_error();
            ErrorCode::Success as i32
        }
        Err(e) => fail("airsync_init", &e),
    }
}

/// 라이브러리 버전 (정적 문자열, 해제 금지)
#[no_mangle]
pub extern "C" fn airsync_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// 현재 스레드의 마지막 에러 메시지를 buffer에 복사
/// 반환값: 전체 메시지 길이 (buffer_len - 1보다 크면 잘린 것), 에러 없으면 0
#[no_mangle]
pub extern "C" fn airsync_last_error_message(buffer: *mut c_char, buffer_len: usize) -> usize {
    types::copy_last_error(buffer, buffer_len)
}

/// C 버퍼 → Packet (데이터는 복사)
/// pts_us < 0 이면 pts 없음
pub(crate) unsafe fn packet_from_raw(
    data: *const u8,
    len: usize,
    pts_us: i64,
    flags: u32,
) -> Result<Packet, ErrorCode> {
    let data = if len == 0 {
        Vec::new()
    } else if data.is_null() {
        return Err(ErrorCode::NullPointer);
    } else {
        std::slice::from_raw_parts(data, len).to_vec()
    };

    Ok(Packet {
        data,
        pts_us: (pts_us >= 0).then_some(pts_us),
        is_config: flags & PACKET_FLAG_CONFIG != 0,
        is_keyframe: flags & PACKET_FLAG_KEY != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_version_string() {
        let version = unsafe { CStr::from_ptr(airsync_version()) };
        assert_eq!(version.to_str().unwrap(), crate::VERSION);
    }

    #[test]
    fn test_packet_from_raw_flags() {
        let bytes = [0u8, 0, 0, 1, 0x67];
        let packet =
            unsafe { packet_from_raw(bytes.as_ptr(), bytes.len(), -1, PACKET_FLAG_CONFIG) }
                .unwrap();
        assert!(packet.is_config);
        assert!(!packet.is_keyframe);
        assert_eq!(packet.pts_us, None);
        assert_eq!(packet.data, bytes);

        let packet = unsafe { packet_from_raw(bytes.as_ptr(), 2, 1000, PACKET_FLAG_KEY) }.unwrap();
        assert!(packet.is_keyframe);
        assert_eq!(packet.pts_us, Some(1000));
    }

    #[test]
    fn test_packet_from_raw_null() {
        let result = unsafe { packet_from_raw(std::ptr::null(), 4, 0, 0) };
        assert_eq!(result.unwrap_err(), ErrorCode::NullPointer);
        let empty = unsafe { packet_from_raw(std::ptr::null(), 0, 0, 0) }.unwrap();
        assert!(empty.data.is_empty());
    }
}
