// 미러 스트림 프레이밍 (디먹서)
//
// 스트림 헤더 (big-endian):
//   비디오: codec tag u32 | width u32 | height u32   (12바이트)
//   오디오: codec tag u32                            (4바이트, 0=비활성, 1=캡처 실패)
// 패킷:
//   pts_and_flags u64 | len u32 | payload[len]
//   bit 63 = config 패킷, bit 62 = 키프레임, 하위 62비트 = pts (µs)

use std::io::{ErrorKind, Read};

use crate::error::{Error, Result};
use crate::ffmpeg::codec::{AudioCodec, Packet, VideoCodec};

pub const PACKET_HEADER_SIZE: usize = 12;
pub const VIDEO_HEADER_SIZE: usize = 12;
pub const AUDIO_HEADER_SIZE: usize = 4;

/// 패킷 크기 상한 (4K 키프레임 여유 포함)
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

const FLAG_CONFIG: u64 = 1 << 63;
const FLAG_KEY_FRAME: u64 = 1 << 62;
const PTS_MASK: u64 = FLAG_KEY_FRAME - 1;

const AUDIO_DISABLED: u32 = 0;
const AUDIO_ERROR: u32 = 1;

/// 비디오 스트림 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoStreamHeader {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
}

impl VideoStreamHeader {
    pub fn parse(bytes: &[u8; VIDEO_HEADER_SIZE]) -> Result<Self> {
        let codec = VideoCodec::from_tag(be_u32(&bytes[0..4]))?;
        let width = be_u32(&bytes[4..8]);
        let height = be_u32(&bytes[8..12]);
        if width == 0 || height == 0 {
            return Err(Error::invalid_data(format!(
                "invalid initial video size {}x{}",
                width, height
            )));
        }
        Ok(Self { codec, width, height })
    }

    pub fn encode(&self) -> [u8; VIDEO_HEADER_SIZE] {
        let mut out = [0u8; VIDEO_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.codec.tag().to_be_bytes());
        out[4..8].copy_from_slice(&self.width.to_be_bytes());
        out[8..12].copy_from_slice(&self.height.to_be_bytes());
        out
    }
}

/// 오디오 스트림 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamHeader {
    pub codec: AudioCodec,
}

impl AudioStreamHeader {
    pub fn parse(bytes: &[u8; AUDIO_HEADER_SIZE]) -> Result<Self> {
        match be_u32(bytes) {
            AUDIO_DISABLED => Err(Error::unsupported_codec("audio disabled by device")),
            AUDIO_ERROR => Err(Error::invalid_data("audio capture failed on device")),
            tag => Ok(Self {
                codec: AudioCodec::from_tag(tag)?,
            }),
        }
    }

    pub fn encode(&self) -> [u8; AUDIO_HEADER_SIZE] {
        self.codec.tag().to_be_bytes()
    }
}

/// 패킷 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketHeader {
    pts_and_flags: u64,
    len: usize,
}

impl PacketHeader {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let pts_and_flags = u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let len = be_u32(&bytes[8..12]) as usize;
        if len > MAX_PACKET_SIZE {
            return Err(Error::invalid_data(format!(
                "packet too large: {} bytes (max {})",
                len, MAX_PACKET_SIZE
            )));
        }
        Ok(Self { pts_and_flags, len })
    }

    fn into_packet(self, data: Vec<u8>) -> Packet {
        if self.pts_and_flags & FLAG_CONFIG != 0 {
            return Packet::config(data);
        }
        let pts_us = (self.pts_and_flags & PTS_MASK) as i64;
        let is_keyframe = self.pts_and_flags & FLAG_KEY_FRAME != 0;
        Packet::media(data, pts_us, is_keyframe)
    }
}

/// 패킷 헤더 인코딩 (테스트 / 스트림 녹화 재생 도구용)
pub fn encode_packet_header(packet: &Packet) -> [u8; PACKET_HEADER_SIZE] {
    let pts_and_flags = if packet.is_config {
        FLAG_CONFIG
    } else {
        let pts = packet.pts_us.unwrap_or(0).max(0) as u64 & PTS_MASK;
        if packet.is_keyframe {
            pts | FLAG_KEY_FRAME
        } else {
            pts
        }
    };

    let mut out = [0u8; PACKET_HEADER_SIZE];
    out[0..8].copy_from_slice(&pts_and_flags.to_be_bytes());
    out[8..12].copy_from_slice(&(packet.data.len() as u32).to_be_bytes());
    out
}

/// 헤더 + payload
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + packet.data.len());
    out.extend_from_slice(&encode_packet_header(packet));
    out.extend_from_slice(&packet.data);
    out
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// push 방식 패킷 조립기
/// 네트워크에서 받은 임의 크기 청크를 넣으면 완성된 패킷을 꺼낼 수 있음
#[derive(Debug, Default)]
pub struct PacketAssembler {
    buffer: Vec<u8>,
    /// buffer 안에서 아직 소비되지 않은 첫 바이트 위치
    read_pos: usize,
    pending: Option<PacketHeader>,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        // 소비된 앞부분은 push 시점에 한 번만 정리
        if self.read_pos > 0 {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// 완성된 패킷이 없으면 Ok(None)
    /// 잘못된 헤더 이후에는 스트림 동기가 깨지므로 호출측에서 reset 필요
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if self.buffered() < PACKET_HEADER_SIZE {
                    return Ok(None);
                }
                let start = self.read_pos;
                let header = PacketHeader::parse(&self.buffer[start..start + PACKET_HEADER_SIZE])?;
                self.read_pos += PACKET_HEADER_SIZE;
                self.pending = Some(header);
                header
            }
        };

        if self.buffered() < header.len {
            return Ok(None);
        }

        let start = self.read_pos;
        let data = self.buffer[start..start + header.len].to_vec();
        self.read_pos += header.len;
        self.pending = None;

        if self.read_pos == self.buffer.len() {
            self.buffer.clear();
            self.read_pos = 0;
        }
        Ok(Some(header.into_packet(data)))
    }

    /// 아직 패킷이 되지 못한 바이트 수
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.pending = None;
    }
}

/// 블로킹 Read 기반 패킷 리더 (소켓, 파일, 파이프)
pub struct PacketReader<R: Read> {
    reader: R,
}

impl<R: Read> PacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn read_video_header(&mut self) -> Result<VideoStreamHeader> {
        let mut bytes = [0u8; VIDEO_HEADER_SIZE];
        self.reader.read_exact(&mut bytes)?;
        VideoStreamHeader::parse(&bytes)
    }

    pub fn read_audio_header(&mut self) -> Result<AudioStreamHeader> {
        let mut bytes = [0u8; AUDIO_HEADER_SIZE];
        self.reader.read_exact(&mut bytes)?;
        AudioStreamHeader::parse(&bytes)
    }

    /// 다음 패킷. 패킷 경계에서 EOF면 Ok(None), 패킷 중간에서 끊기면 InvalidData
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        let mut header_bytes = [0u8; PACKET_HEADER_SIZE];
        match read_full(&mut self.reader, &mut header_bytes)? {
            0 => return Ok(None),
            n if n < PACKET_HEADER_SIZE => {
                return Err(Error::invalid_data(format!(
                    "truncated packet header ({} of {} bytes)",
                    n, PACKET_HEADER_SIZE
                )))
            }
            _ => {}
        }

        let header = PacketHeader::parse(&header_bytes)?;
        let mut data = vec![0u8; header.len];
        self.reader.read_exact(&mut data).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Error::invalid_data(format!(
                "truncated packet payload (expected {} bytes)",
                header.len
            )),
            _ => Error::Io(e),
        })?;

        Ok(Some(header.into_packet(data)))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for PacketReader<R> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

/// buf를 채울 때까지 읽기, EOF 시 읽은 바이트 수 반환
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_stream() -> (Vec<u8>, Vec<Packet>) {
        let packets = vec![
            Packet::config(vec![0, 0, 0, 1, 0x67, 0x42]),
            Packet::media(vec![0, 0, 0, 1, 0x65, 1, 2, 3], 0, true),
            Packet::media(vec![0, 0, 0, 1, 0x41, 4], 16_666, false),
            Packet::media(Vec::new(), 33_333, false),
        ];
        let bytes = packets.iter().flat_map(encode_packet).collect();
        (bytes, packets)
    }

    #[test]
    fn test_packet_header_flags() {
        let key = encode_packet_header(&Packet::media(vec![0; 5], 1_000_000, true));
        assert_eq!(key[0] & 0xc0, 0x40);
        assert_eq!(&key[8..], &[0, 0, 0, 5]);

        let config = encode_packet_header(&Packet::config(vec![0; 2]));
        assert_eq!(config[0] & 0x80, 0x80);

        let header = PacketHeader::parse(&key).unwrap();
        let packet = header.into_packet(vec![0; 5]);
        assert_eq!(packet.pts_us, Some(1_000_000));
        assert!(packet.is_keyframe);
        assert!(!packet.is_config);
    }

    #[test]
    fn test_assembler_any_chunking() {
        let (bytes, expected) = sample_stream();
        for chunk_size in [1, 3, 7, 12, 13, bytes.len()] {
            let mut assembler = PacketAssembler::new();
            let mut got = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                assembler.push(chunk);
                while let Some(packet) = assembler.next_packet().unwrap() {
                    got.push(packet);
                }
            }
            assert_eq!(got, expected, "chunk size {}", chunk_size);
            assert_eq!(assembler.buffered(), 0);
        }
    }

    #[test]
    fn test_assembler_many_packets_in_one_chunk() {
        let expected: Vec<Packet> = (0..1000)
            .map(|i| Packet::media(vec![(i % 251) as u8; 1 + i % 64], i as i64 * 16_666, i % 60 == 0))
            .collect();
        let bytes: Vec<u8> = expected.iter().flat_map(encode_packet).collect();

        let mut assembler = PacketAssembler::new();
        assembler.push(&bytes[..bytes.len() - 5]);
        let mut got = Vec::new();
        while let Some(packet) = assembler.next_packet().unwrap() {
            got.push(packet);
        }
        assert_eq!(got.len(), 999);
        assert!(assembler.buffered() > 0);

        // 남은 꼬리 + 새 데이터
        assembler.push(&bytes[bytes.len() - 5..]);
        while let Some(packet) = assembler.next_packet().unwrap() {
            got.push(packet);
        }
        assert_eq!(got, expected);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_assembler_rejects_oversize() {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        header[8..12].copy_from_slice(&((MAX_PACKET_SIZE + 1) as u32).to_be_bytes());
        let mut assembler = PacketAssembler::new();
        assembler.push(&header);
        assert!(matches!(assembler.next_packet(), Err(Error::InvalidData(_))));
        assembler.reset();
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_reader_reads_all_packets() {
        let header = VideoStreamHeader {
            codec: VideoCodec::H265,
            width: 1080,
            height: 2400,
        };
        let (packets_bytes, expected) = sample_stream();
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&packets_bytes);

        let mut reader = PacketReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_video_header().unwrap(), header);
        let got: Vec<Packet> = reader.map(|p| p.unwrap()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_reader_truncated_payload() {
        let mut bytes = encode_packet(&Packet::media(vec![9; 10], 0, true));
        bytes.truncate(PACKET_HEADER_SIZE + 4);
        let mut reader = PacketReader::new(Cursor::new(bytes));
        assert!(matches!(reader.next_packet(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_reader_truncated_header() {
        let mut reader = PacketReader::new(Cursor::new(vec![0u8; 5]));
        assert!(matches!(reader.next_packet(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_video_header_validation() {
        let mut bytes = VideoStreamHeader {
            codec: VideoCodec::H264,
            width: 720,
            height: 1280,
        }
        .encode();
        bytes[4..8].copy_from_slice(&0u32.to_be_bytes());
        assert!(VideoStreamHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_audio_header_special_codes() {
        assert!(matches!(
            AudioStreamHeader::parse(&[0, 0, 0, 0]),
            Err(Error::UnsupportedCodec(_))
        ));
        assert!(matches!(
            AudioStreamHeader::parse(&[0, 0, 0, 1]),
            Err(Error::InvalidData(_))
        ));
        let header = AudioStreamHeader { codec: AudioCodec::Opus };
        assert_eq!(AudioStreamHeader::parse(&header.encode()).unwrap(), header);
    }
}
