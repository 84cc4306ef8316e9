// 컨테이너 파일 디먹서 (녹화본 재생 / 진단용)
// libavformat으로 best video stream의 패킷을 µs pts 패킷으로 변환

use ffmpeg_next as ffmpeg;
use ffmpeg::Rescale;
use log::info;
use std::path::Path;

use crate::error::{Error, Result};
use crate::ffmpeg::codec::Packet;

/// 파일 정보
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_ms: i64,
    pub codec: String,
    pub has_audio: bool,
}

/// 파일 열기
/// 1차 시도: 기본 오픈
/// 2차 시도: moov atom이 파일 끝에 있는 경우 (화면 녹화본 등), probesize 확장
fn open_input(path: &Path) -> Result<ffmpeg::format::context::Input> {
    ffmpeg::init()?;

    let input = ffmpeg::format::input(&path).or_else(|_| {
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("probesize", "100000000"); // 100MB
        opts.set("analyzeduration", "30000000"); // 30초
        ffmpeg::format::input_with_dictionary(&path, opts)
    })?;
    Ok(input)
}

/// 비디오 스트림 정보 수집
fn media_info(input: &ffmpeg::format::context::Input) -> Result<(usize, ffmpeg::Rational, MediaInfo)> {
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| Error::invalid_data("No video stream found"))?;

    let parameters = stream.parameters();
    let codec = parameters.id().name().to_string();
    let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
        .decoder()
        .video()?;

    let fps = f64::from(stream.avg_frame_rate());
    let fps = if fps.is_finite() { fps } else { 0.0 };

    let time_base = stream.time_base();
    let duration_ms = if stream.duration() > 0 {
        stream.duration().rescale(time_base, ffmpeg::Rational(1, 1000))
    } else if input.duration() > 0 {
        input.duration() / 1000 // AV_TIME_BASE(µs) → ms
    } else {
        0
    };

    let info = MediaInfo {
        width: decoder.width(),
        height: decoder.height(),
        fps,
        duration_ms,
        codec,
        has_audio: input.streams().best(ffmpeg::media::Type::Audio).is_some(),
    };
    Ok((stream.index(), time_base, info))
}

/// 파일 정보 조회
pub fn probe(path: &Path) -> Result<MediaInfo> {
    let input = open_input(path)?;
    let (_, _, info) = media_info(&input)?;
    Ok(info)
}

/// 파일 패킷 소스
pub struct FileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    info: MediaInfo,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let input = open_input(path)?;
        let (stream_index, time_base, info) = media_info(&input)?;
        info!(
            "File source opened: {:?} ({} {}x{}, {}ms)",
            path, info.codec, info.width, info.height, info.duration_ms
        );
        Ok(Self {
            input,
            stream_index,
            time_base,
            info,
        })
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn time_base(&self) -> ffmpeg::Rational {
        self.time_base
    }

    /// 디코더 생성용 코덱 파라미터 (extradata 포함)
    pub fn parameters(&self) -> Result<ffmpeg::codec::Parameters> {
        self.input
            .stream(self.stream_index)
            .map(|s| s.parameters())
            .ok_or_else(|| Error::invalid_data("Video stream not found"))
    }

    /// 다음 비디오 패킷 (pts는 µs로 변환), 파일 끝이면 None
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        let micros = ffmpeg::Rational(1, 1_000_000);
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            if packet.stream() != self.stream_index {
                continue;
            }

            let pts_us = packet
                .pts()
                .or(packet.dts())
                .map(|pts| pts.rescale(self.time_base, micros));

            return Ok(Some(Packet {
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                pts_us,
                is_config: false,
                is_keyframe: packet.is_key(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderConfig;
    use crate::ffmpeg::VideoDecoder;
    use std::path::PathBuf;

    #[test]
    fn test_probe_missing_file() {
        let result = probe(Path::new("/nonexistent/airsync/recording.mp4"));
        assert!(matches!(result, Err(Error::Ffmpeg(_))));
    }

    #[test]
    fn test_decode_recording() {
        // 실제 녹화 파일이 필요: AIRSYNC_TEST_VIDEO=/path/to/video.mp4
        let Some(path) = std::env::var_os("AIRSYNC_TEST_VIDEO").map(PathBuf::from) else {
            println!("AIRSYNC_TEST_VIDEO not set, skipping");
            return;
        };

        let info = probe(&path).unwrap();
        assert!(info.width > 0 && info.height > 0);

        let mut source = FileSource::open(&path).unwrap();
        let mut decoder =
            VideoDecoder::from_parameters(source.parameters().unwrap(), &DecoderConfig::default())
                .unwrap();

        let mut decoded = 0;
        while let Some(packet) = source.next_packet().unwrap() {
            decoded += decoder.decode(&packet).unwrap().len();
            if decoded >= 10 {
                break;
            }
        }
        decoded += decoder.flush().unwrap().len();
        assert!(decoded > 0);
    }
}
