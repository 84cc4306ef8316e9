// 코덱 식별자 / 패킷
// 미러 스트림 헤더의 4바이트 태그 ↔ FFmpeg codec::Id 매핑

use ffmpeg_next as ffmpeg;

use crate::error::{Error, Result};

/// 4바이트 ASCII 태그를 big-endian u32로
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

/// 태그를 로그용 문자열로 (출력 불가 문자는 '?')
pub fn tag_to_string(tag: u32) -> String {
    tag.to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// 비디오 코덱
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    pub const fn tag(self) -> u32 {
        match self {
            Self::H264 => fourcc(b"h264"),
            Self::H265 => fourcc(b"h265"),
            Self::Av1 => fourcc(b"av01"),
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self> {
        [Self::H264, Self::H265, Self::Av1]
            .into_iter()
            .find(|c| c.tag() == tag)
            .ok_or_else(|| Error::unsupported_codec(format!("video tag '{}'", tag_to_string(tag))))
    }

    pub fn codec_id(self) -> ffmpeg::codec::Id {
        match self {
            Self::H264 => ffmpeg::codec::Id::H264,
            Self::H265 => ffmpeg::codec::Id::HEVC,
            Self::Av1 => ffmpeg::codec::Id::AV1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Av1 => "av1",
        }
    }
}

/// 오디오 코덱
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Opus,
    Aac,
    Flac,
    /// s16le interleaved PCM (FFmpeg 디코더 없이 직접 변환)
    Raw,
}

impl AudioCodec {
    pub const fn tag(self) -> u32 {
        match self {
            Self::Opus => fourcc(b"opus"),
            Self::Aac => fourcc(b"aac "),
            Self::Flac => fourcc(b"flac"),
            Self::Raw => fourcc(b"raw "),
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self> {
        [Self::Opus, Self::Aac, Self::Flac, Self::Raw]
            .into_iter()
            .find(|c| c.tag() == tag)
            .ok_or_else(|| Error::unsupported_codec(format!("audio tag '{}'", tag_to_string(tag))))
    }

    pub fn codec_id(self) -> ffmpeg::codec::Id {
        match self {
            Self::Opus => ffmpeg::codec::Id::OPUS,
            Self::Aac => ffmpeg::codec::Id::AAC,
            Self::Flac => ffmpeg::codec::Id::FLAC,
            Self::Raw => ffmpeg::codec::Id::PCM_S16LE,
        }
    }
}

/// 압축된 미디어 패킷 (디먹서 출력 → 디코더 입력)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub data: Vec<u8>,
    /// 프레젠테이션 타임스탬프 (µs). config 패킷은 None
    pub pts_us: Option<i64>,
    /// 코덱 파라미터 셋 (SPS/PPS, AudioSpecificConfig, OpusHead 등)
    pub is_config: bool,
    pub is_keyframe: bool,
}

impl Packet {
    pub fn media(data: Vec<u8>, pts_us: i64, is_keyframe: bool) -> Self {
        Self {
            data,
            pts_us: Some(pts_us),
            is_config: false,
            is_keyframe,
        }
    }

    pub fn config(data: Vec<u8>) -> Self {
        Self {
            data,
            pts_us: None,
            is_config: true,
            is_keyframe: false,
        }
    }

    /// FFmpeg 패킷으로 변환 (prefix: 앞에 붙일 config 바이트)
    /// pts는 µs 그대로 전달 → 디코더 time_base를 1/1000000으로 취급
    pub fn to_ffmpeg(&self, prefix: Option<&[u8]>) -> ffmpeg::Packet {
        let mut packet = match prefix {
            Some(prefix) if !prefix.is_empty() => {
                let mut merged = Vec::with_capacity(prefix.len() + self.data.len());
                merged.extend_from_slice(prefix);
                merged.extend_from_slice(&self.data);
                ffmpeg::Packet::copy(&merged)
            }
            _ => ffmpeg::Packet::copy(&self.data),
        };
        packet.set_pts(self.pts_us);
        packet.set_dts(self.pts_us);
        if self.is_keyframe {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        packet
    }
}
