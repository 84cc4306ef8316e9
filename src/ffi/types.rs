// FFI 공용 타입 - Swift 연동
// 에러 코드 / 마지막 에러 메시지 / 프레임 구조체

use log::warn;
use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::sync::{Mutex, MutexGuard};

use crate::delivery::PipelineStats;
use crate::error::Error;
use crate::ffmpeg::Frame;

/// 에러 코드 (음수 = 실패, 0 = 성공, 양수 = 정상적인 "없음")
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    NullPointer = -1,
    InvalidParam = -2,
    Ffmpeg = -3,
    UnsupportedCodec = -4,
    InvalidData = -5,
    Closed = -6,
    /// 가져갈 프레임/샘플 없음
    NoFrame = 1,
    Unknown = -99,
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Ffmpeg(_) => ErrorCode::Ffmpeg,
            Error::Io(_) => ErrorCode::Unknown,
            Error::Config(_) => ErrorCode::InvalidParam,
            Error::UnsupportedCodec(_) => ErrorCode::UnsupportedCodec,
            Error::InvalidData(_) => ErrorCode::InvalidData,
            Error::DecoderUnavailable(_) => ErrorCode::Ffmpeg,
            Error::Closed => ErrorCode::Closed,
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// 마지막 에러 메시지 저장 (호출한 스레드 기준)
pub(crate) fn set_last_error(message: impl Into<String>) {
    let message = message.into().replace('\0', " ");
    let c_message = CString::new(message).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = c_message);
}

pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Error → ErrorCode 변환 + 메시지 저장
pub(crate) fn fail(context: &str, err: &Error) -> i32 {
    warn!("{}: {}", context, err);
    set_last_error(format!("{}: {}", context, err));
    ErrorCode::from(err) as i32
}

/// 파라미터 오류 (메시지만 저장)
pub(crate) fn invalid_param(message: &str) -> i32 {
    set_last_error(message);
    ErrorCode::InvalidParam as i32
}

/// 마지막 에러 메시지를 buffer에 복사 (NUL 포함)
/// 반환값: 메시지 길이(NUL 제외), 메시지 없으면 0
/// buffer가 작으면 잘라서 복사
pub(crate) fn copy_last_error(buffer: *mut c_char, buffer_len: usize) -> usize {
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let Some(message) = slot.as_ref() else {
            return 0;
        };
        let bytes = message.as_bytes();
        if !buffer.is_null() && buffer_len > 0 {
            let n = bytes.len().min(buffer_len - 1);
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer as *mut u8, n);
                *buffer.add(n) = 0;
            }
        }
        bytes.len()
    })
}

/// C 문자열 → &str (NULL이면 None, UTF-8 아니면 Err)
pub(crate) unsafe fn str_from_ptr<'a>(ptr: *const c_char) -> Result<Option<&'a str>, ()> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr).to_str().map(Some).map_err(|_| ())
}

/// Mutex lock (poison 시 복구)
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{}: Mutex poisoned, recovering", context);
            poisoned.into_inner()
        }
    }
}

/// Swift로 넘기는 프레임 (data는 airsync_frame_free로 해제)
#[repr(C)]
#[derive(Debug)]
pub struct AirSyncFrame {
    pub width: u32,
    pub height: u32,
    /// 첫 번째 plane의 row 바이트 수 (패딩 없음)
    pub stride: u32,
    /// PixelFormat 코드 (0=BGRA, 1=RGBA, 2=NV12, 3=YUV420P)
    pub format: u32,
    /// pts 없으면 -1
    pub pts_us: i64,
    pub data: *mut u8,
    pub data_len: usize,
}

impl AirSyncFrame {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            stride: 0,
            format: 0,
            pts_us: -1,
            data: std::ptr::null_mut(),
            data_len: 0,
        }
    }

    /// Frame 소유권을 넘김 (버퍼는 Box<[u8]>로 leak)
    pub fn from_frame(frame: Frame) -> Self {
        let stride = frame.stride() as u32;
        let data_box = frame.data.into_boxed_slice();
        let data_len = data_box.len();
        Self {
            width: frame.width,
            height: frame.height,
            stride,
            format: frame.format.code(),
            pts_us: frame.pts_us.unwrap_or(-1),
            data: Box::into_raw(data_box) as *mut u8,
            data_len,
        }
    }

    /// 콜백용 빌림 뷰 (콜백 리턴 후 무효)
    pub(crate) fn borrowed(frame: &Frame) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            stride: frame.stride() as u32,
            format: frame.format.code(),
            pts_us: frame.pts_us.unwrap_or(-1),
            data: frame.data.as_ptr() as *mut u8,
            data_len: frame.data.len(),
        }
    }

    /// from_frame으로 넘긴 버퍼 해제
    pub(crate) unsafe fn release(&mut self) {
        if !self.data.is_null() {
            let slice = std::slice::from_raw_parts_mut(self.data, self.data_len);
            let _ = Box::from_raw(slice as *mut [u8]);
        }
        self.data = std::ptr::null_mut();
        self.data_len = 0;
    }
}

/// 파이프라인 통계 (airsync_pipeline_get_stats)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AirSyncStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_skipped: u64,
    pub frames_decoded: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub decode_errors: u64,
    /// 1 = 디코드 스레드 동작 중
    pub running: u32,
}

impl From<PipelineStats> for AirSyncStats {
    fn from(stats: PipelineStats) -> Self {
        Self {
            packets_received: stats.packets_received,
            bytes_received: stats.bytes_received,
            packets_skipped: stats.packets_skipped,
            frames_decoded: stats.frames_decoded,
            frames_delivered: stats.frames_delivered,
            frames_dropped: stats.frames_dropped,
            decode_errors: stats.decode_errors,
            running: stats.running as u32,
        }
    }
}
