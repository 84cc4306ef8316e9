// 오디오 디코더 - 미러 오디오 패킷을 f32 PCM으로 디코딩
// 출력: interleaved stereo f32, 48kHz (Raw PCM은 입력 샘플레이트 유지)

use ffmpeg_next as ffmpeg;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ffmpeg::codec::{AudioCodec, Packet};

/// 출력 포맷 상수
pub const OUTPUT_SAMPLE_RATE: u32 = 48000;
pub const OUTPUT_CHANNELS: u32 = 2;

/// libavcodec/packet.h AV_INPUT_BUFFER_PADDING_SIZE
const INPUT_BUFFER_PADDING_SIZE: usize = 64;

/// 디코딩된 오디오 청크
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// interleaved f32 샘플 (channels 개씩 묶음)
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u32,
    pub pts_us: Option<i64>,
}

impl AudioChunk {
    /// 채널당 샘플 수
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// 오디오 디코더
pub struct AudioDecoder {
    codec: AudioCodec,
    input_rate: u32,
    input_channels: u32,
    /// Raw PCM이면 None
    decoder: Option<ffmpeg::codec::decoder::Audio>,
    /// 첫 프레임 포맷을 보고 생성
    resampler: Option<Resampler>,
}

impl AudioDecoder {
    /// sample_rate / channels: 스트림 초기값 (config 패킷이 오면 그쪽이 우선)
    pub fn new(codec: AudioCodec, sample_rate: u32, channels: u32) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(Error::invalid_data(format!(
                "invalid audio format: {}Hz, {} channels",
                sample_rate, channels
            )));
        }

        let decoder = match codec {
            AudioCodec::Raw => None,
            _ => Some(open_decoder(codec, sample_rate, channels, None)?),
        };

        info!("Audio decoder opened: {:?} {}Hz {}ch", codec, sample_rate, channels);

        Ok(Self {
            codec,
            input_rate: sample_rate,
            input_channels: channels,
            decoder,
            resampler: None,
        })
    }

    pub fn codec(&self) -> AudioCodec {
        self.codec
    }

    /// 패킷 디코딩 (config 패킷 / 버퍼링 중이면 None)
    pub fn decode(&mut self, packet: &Packet) -> Result<Option<AudioChunk>> {
        if packet.is_config {
            self.apply_config(&packet.data)?;
            return Ok(None);
        }

        if self.codec == AudioCodec::Raw {
            let samples = s16le_to_f32_stereo(&packet.data, self.input_channels);
            if samples.is_empty() {
                return Ok(None);
            }
            return Ok(Some(AudioChunk {
                samples,
                sample_rate: self.input_rate,
                channels: OUTPUT_CHANNELS,
                pts_us: packet.pts_us,
            }));
        }

        let frames = self.send_and_receive(packet)?;

        let mut samples = Vec::new();
        for frame in &frames {
            samples.extend(self.resample_frame(frame)?);
        }

        if samples.is_empty() {
            return Ok(None);
        }

        Ok(Some(AudioChunk {
            samples,
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: OUTPUT_CHANNELS,
            pts_us: packet.pts_us,
        }))
    }

    /// config 패킷(OpusHead, AudioSpecificConfig, STREAMINFO)을 extradata로 디코더 재생성
    fn apply_config(&mut self, config: &[u8]) -> Result<()> {
        if self.codec == AudioCodec::Raw {
            debug!("Ignoring config packet for raw PCM");
            return Ok(());
        }

        self.decoder = Some(open_decoder(
            self.codec,
            self.input_rate,
            self.input_channels,
            Some(config),
        )?);
        self.resampler = None;
        info!("Audio decoder reopened with {} bytes of codec config", config.len());
        Ok(())
    }

    fn send_and_receive(&mut self, packet: &Packet) -> Result<Vec<ffmpeg::frame::Audio>> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::DecoderUnavailable("audio decoder not open".into()))?;

        // 손상 패킷은 건너뜀 (오디오는 다음 패킷부터 바로 복구됨)
        if let Err(e) = decoder.send_packet(&packet.to_ffmpeg(None)) {
            warn!("Audio packet rejected: {}", e);
            return Ok(Vec::new());
        }

        let mut frames = Vec::new();
        loop {
            let mut frame = ffmpeg::frame::Audio::empty();
            if decoder.receive_frame(&mut frame).is_err() {
                break;
            }
            frames.push(frame);
        }
        Ok(frames)
    }

    /// 리샘플링: ffmpeg Audio 프레임 → f32 interleaved stereo 48kHz
    /// 프레임 포맷 / 채널 수 / 샘플레이트가 바뀌면 리샘플러 재생성
    fn resample_frame(&mut self, frame: &ffmpeg::frame::Audio) -> Result<Vec<f32>> {
        let stale = self.resampler.as_ref().map_or(true, |r| !r.matches(frame));
        if stale {
            self.resampler = Some(Resampler::new(frame)?);
        }

        let resampler = self
            .resampler
            .as_mut()
            .ok_or_else(|| Error::DecoderUnavailable("resampler not initialized".into()))?;
        resampler.convert(frame)
    }
}

/// 입력 포맷별 swresample 컨텍스트
struct Resampler {
    context: ffmpeg::software::resampling::Context,
    format: ffmpeg::format::Sample,
    channels: u16,
    rate: u32,
}

impl Resampler {
    /// 디코딩된 프레임의 실제 포맷 기준으로 생성
    fn new(frame: &ffmpeg::frame::Audio) -> Result<Self> {
        if frame.rate() == 0 || frame.channels() == 0 {
            return Err(Error::invalid_data(format!(
                "audio frame without format: {}Hz, {} channels",
                frame.rate(),
                frame.channels()
            )));
        }

        let context = ffmpeg::software::resampling::Context::get(
            frame.format(),
            frame.channel_layout(),
            frame.rate(),
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
            ffmpeg::ChannelLayout::STEREO,
            OUTPUT_SAMPLE_RATE,
        )?;
        info!(
            "Audio resampler: {:?} {}ch {}Hz -> f32 stereo {}Hz",
            frame.format(),
            frame.channels(),
            frame.rate(),
            OUTPUT_SAMPLE_RATE
        );

        Ok(Self {
            context,
            format: frame.format(),
            channels: frame.channels(),
            rate: frame.rate(),
        })
    }

    fn matches(&self, frame: &ffmpeg::frame::Audio) -> bool {
        self.format == frame.format() && self.channels == frame.channels() && self.rate == frame.rate()
    }

    /// 입력 1프레임 변환. 내부 버퍼에 남은 샘플까지 담을 수 있게 출력 크기 확보
    fn convert(&mut self, frame: &ffmpeg::frame::Audio) -> Result<Vec<f32>> {
        let capacity = self.output_capacity(frame.samples());

        let mut resampled = ffmpeg::frame::Audio::new(
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
            capacity,
            ffmpeg::ChannelLayout::STEREO,
        );
        self.context.run(frame, &mut resampled)?;

        // swr_convert_frame이 실제로 쓴 샘플 수로 nb_samples를 갱신함
        let sample_count = resampled.samples() * OUTPUT_CHANNELS as usize;
        let byte_count = sample_count * std::mem::size_of::<f32>();
        if sample_count == 0 {
            return Ok(Vec::new());
        }
        let data = resampled.data(0);
        if data.len() < byte_count {
            return Err(Error::invalid_data(format!(
                "Resampled data too small: got {} bytes, need {}",
                data.len(),
                byte_count
            )));
        }

        Ok(data[..byte_count]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// 이번 입력 + 지연 샘플의 최대 출력 수 (swr_get_out_samples)
    fn output_capacity(&mut self, input_samples: usize) -> usize {
        let upper = unsafe {
            ffmpeg::ffi::swr_get_out_samples(self.context.as_mut_ptr(), input_samples as i32)
        };
        if upper > 0 {
            return upper as usize;
        }
        // 계산 실패 시 비율 + 필터 지연 여유
        input_samples * OUTPUT_SAMPLE_RATE as usize / self.rate.max(1) as usize + 256
    }
}

/// 코덱 컨텍스트 생성 + 채널 레이아웃/샘플레이트/extradata 설정 후 open
fn open_decoder(
    codec: AudioCodec,
    sample_rate: u32,
    channels: u32,
    extradata: Option<&[u8]>,
) -> Result<ffmpeg::codec::decoder::Audio> {
    ffmpeg::init()?;

    let codec_impl = ffmpeg::codec::decoder::find(codec.codec_id())
        .ok_or_else(|| Error::unsupported_codec(format!("no FFmpeg decoder for {:?}", codec)))?;

    let mut context = ffmpeg::codec::context::Context::new_with_codec(codec_impl);

    unsafe {
        let ctx = context.as_mut_ptr();
        (*ctx).sample_rate = sample_rate as i32;
        ffmpeg::ffi::av_channel_layout_default(&mut (*ctx).ch_layout, channels as i32);

        if let Some(data) = extradata.filter(|d| !d.is_empty()) {
            // extradata는 av_malloc 버퍼여야 함 (컨텍스트 해제 시 av_free)
            let buffer = ffmpeg::ffi::av_mallocz(data.len() + INPUT_BUFFER_PADDING_SIZE) as *mut u8;
            if buffer.is_null() {
                return Err(Error::invalid_data("extradata allocation failed"));
            }
            std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, data.len());
            (*ctx).extradata = buffer;
            (*ctx).extradata_size = data.len() as i32;
        }
    }

    Ok(context.decoder().audio()?)
}

/// s16le interleaved PCM → f32 stereo (mono는 복제, 3채널 이상은 앞 2채널)
pub fn s16le_to_f32_stereo(bytes: &[u8], channels: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    let frame_bytes = channels * 2;
    let to_f32 = |lo: u8, hi: u8| f32::from(i16::from_le_bytes([lo, hi])) / 32768.0;

    let mut out = Vec::with_capacity(bytes.len() / frame_bytes * 2);
    for frame in bytes.chunks_exact(frame_bytes) {
        let left = to_f32(frame[0], frame[1]);
        let right = if channels >= 2 { to_f32(frame[2], frame[3]) } else { left };
        out.push(left);
        out.push(right);
    }
    out
}
