// Probe FFI - 녹화 파일 정보 조회

use std::ffi::c_char;
use std::path::Path;

use crate::ffi::types::{fail, invalid_param, str_from_ptr, ErrorCode};
use crate::stream::probe;

/// 코덱 이름 버퍼 크기 (NUL 포함)
pub const CODEC_NAME_LEN: usize = 16;

/// 파일 정보 (airsync_probe_file)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AirSyncMediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_ms: i64,
    /// NUL 종료 코덱 이름 (예: "h264", 길면 잘림)
    pub codec: [c_char; CODEC_NAME_LEN],
    /// 1 = 오디오 스트림 있음
    pub has_audio: u32,
}

impl Default for AirSyncMediaInfo {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            fps: 0.0,
            duration_ms: 0,
            codec: [0; CODEC_NAME_LEN],
            has_audio: 0,
        }
    }
}

/// 파일 정보 조회 (path: UTF-8 경로)
#[no_mangle]
pub extern "C" fn airsync_probe_file(path: *const c_char, out_info: *mut AirSyncMediaInfo) -> i32 {
    if path.is_null() || out_info.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    let path = match unsafe { str_from_ptr(path) } {
        Ok(Some(path)) => path,
        Ok(None) => return ErrorCode::NullPointer as i32,
        Err(()) => return invalid_param("path is not valid UTF-8"),
    };

    match probe(Path::new(path)) {
        Ok(info) => {
            let mut out = AirSyncMediaInfo {
                width: info.width,
                height: info.height,
                fps: info.fps,
                duration_ms: info.duration_ms,
                has_audio: info.has_audio as u32,
                ..AirSyncMediaInfo::default()
            };
            for (dst, src) in out
                .codec
                .iter_mut()
                .zip(info.codec.bytes().take(CODEC_NAME_LEN - 1))
            {
                *dst = src as c_char;
            }
            unsafe {
                *out_info = out;
            }
            ErrorCode::Success as i32
        }
        Err(e) => fail("airsync_probe_file", &e),
    }
}
