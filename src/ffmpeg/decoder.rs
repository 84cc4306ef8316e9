// FFmpeg 비디오 디코더 (ffmpeg-next)
// 아키텍처: 상태 머신 기반 디코더 + 키프레임 대기 / 에러 복구
//
// 미러 스트림은 컨테이너 없이 코덱 패킷만 들어오므로
// 코덱 ID로 직접 디코더를 열고, config 패킷(SPS/PPS)은 다음 패킷 앞에 붙여서 전달

use ffmpeg_next as ffmpeg;
use log::{debug, info, warn};

use crate::config::DecoderConfig;
use crate::debug_log;
use crate::error::{Error, Result};
use crate::ffmpeg::codec::{Packet, VideoCodec};

/// 연속 디코딩 에러 허용치 (초과 시 Error 상태)
pub(crate) const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// 디코더 상태 머신
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingKeyframe, // 시작 직후 / reset / 에러 후: 키프레임 전까지 패킷 스킵
    Ready,            // 정상 동작
    Error,            // 복구 불가능한 에러
}

/// send_packet 결과 (drain 중 받은 프레임 포함)
enum Sent {
    Accepted(Vec<ffmpeg::frame::Video>),
    /// 재시도 후에도 EAGAIN, 패킷은 디코더에 들어가지 못함
    Dropped(Vec<ffmpeg::frame::Video>),
}

/// 비디오 디코더
pub struct VideoDecoder {
    decoder: ffmpeg::codec::decoder::Video,
    codec_id: ffmpeg::codec::Id,
    state: DecoderState,
    /// 다음 미디어 패킷 앞에 붙일 config 바이트
    pending_config: Option<Vec<u8>>,
    /// 마지막 config (reset 후 재전송용)
    last_config: Option<Vec<u8>>,
    consecutive_errors: u32,
    total_errors: u64,
    skipped_packets: u64,
}

impl VideoDecoder {
    /// 코덱 ID로 디코더 생성 (미러 스트림용, 컨테이너 파라미터 없음)
    pub fn new(codec: VideoCodec, config: &DecoderConfig) -> Result<Self> {
        ffmpeg::init()?;

        let codec_impl = ffmpeg::codec::decoder::find(codec.codec_id()).ok_or_else(|| {
            Error::unsupported_codec(format!("no FFmpeg decoder for {}", codec.name()))
        })?;

        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec_impl);
        Self::configure(&mut context, config);

        let decoder = context.decoder().video()?;
        info!(
            "Video decoder opened: {} (threads={}, low_delay={})",
            codec.name(),
            config.thread_count(),
            config.low_delay
        );

        Ok(Self::with_decoder(decoder, codec.codec_id()))
    }

    /// 컨테이너 스트림 파라미터로 디코더 생성 (파일 재생/진단용)
    pub fn from_parameters(
        parameters: ffmpeg::codec::Parameters,
        config: &DecoderConfig,
    ) -> Result<Self> {
        ffmpeg::init()?;

        let codec_id = parameters.id();
        let mut context = ffmpeg::codec::context::Context::from_parameters(parameters)?;
        Self::configure(&mut context, config);

        let decoder = context.decoder().video()?;
        info!("Video decoder opened from parameters: {:?}", codec_id);

        Ok(Self::with_decoder(decoder, codec_id))
    }

    fn with_decoder(decoder: ffmpeg::codec::decoder::Video, codec_id: ffmpeg::codec::Id) -> Self {
        Self {
            decoder,
            codec_id,
            state: DecoderState::AwaitingKeyframe,
            pending_config: None,
            last_config: None,
            consecutive_errors: 0,
            total_errors: 0,
            skipped_packets: 0,
        }
    }

    /// 스레딩 / 지연 설정
    /// - low_delay: slice threading (프레임 지연 없음) + LOW_DELAY 플래그
    /// - 그 외: frame threading (처리량 우선, 스레드 수만큼 프레임 지연)
    fn configure(context: &mut ffmpeg::codec::context::Context, config: &DecoderConfig) {
        let kind = if config.low_delay {
            ffmpeg::threading::Type::Slice
        } else {
            ffmpeg::threading::Type::Frame
        };
        context.set_threading(ffmpeg::threading::Config {
            kind,
            count: config.thread_count(),
        });

        if config.low_delay {
            context.set_flags(ffmpeg::codec::Flags::LOW_DELAY);
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn codec_id(&self) -> ffmpeg::codec::Id {
        self.codec_id
    }

    /// 누적 디코딩 에러 수
    pub fn errors(&self) -> u64 {
        self.total_errors
    }

    /// 키프레임 대기 중 버린 패킷 수
    pub fn skipped_packets(&self) -> u64 {
        self.skipped_packets
    }

    /// 패킷 디코딩
    /// B-frame / 스레딩 버퍼링 때문에 0개, 1개 또는 여러 프레임이 나올 수 있음
    /// 손상 패킷은 에러가 아니라 빈 결과 + 키프레임 대기로 처리
    pub fn decode(&mut self, packet: &Packet) -> Result<Vec<ffmpeg::frame::Video>> {
        if self.state == DecoderState::Error {
            return Err(Error::DecoderUnavailable(format!(
                "{:?} decoder exceeded {} consecutive errors",
                self.codec_id, MAX_CONSECUTIVE_ERRORS
            )));
        }

        // config 패킷: 저장만 하고 다음 미디어 패킷과 합쳐서 전달
        if packet.is_config {
            debug!("Config packet received ({} bytes)", packet.data.len());
            self.pending_config = Some(packet.data.clone());
            self.last_config = Some(packet.data.clone());
            return Ok(Vec::new());
        }

        if self.state == DecoderState::AwaitingKeyframe {
            if !packet.is_keyframe {
                self.skipped_packets += 1;
                debug_log!("Skipping non-key packet while awaiting keyframe (pts={:?})", packet.pts_us);
                return Ok(Vec::new());
            }
            self.state = DecoderState::Ready;
        }

        let prefix = self.pending_config.take();
        let ff_packet = packet.to_ffmpeg(prefix.as_deref());

        let sent = self.send_and_receive(&ff_packet);
        self.finish_send(sent, packet.pts_us)
    }

    /// send 결과에 따라 에러 카운트 / 상태 갱신
    fn finish_send(
        &mut self,
        sent: std::result::Result<Sent, ffmpeg::Error>,
        pts_us: Option<i64>,
    ) -> Result<Vec<ffmpeg::frame::Video>> {
        match sent {
            Ok(Sent::Accepted(frames)) => {
                self.consecutive_errors = 0;
                debug_log!("Decoded {} frame(s) from packet pts={:?}", frames.len(), pts_us);
                Ok(frames)
            }
            Ok(Sent::Dropped(frames)) => {
                // 패킷 유실 = 참조 프레임 손상 가능 → 키프레임부터 다시
                self.on_decode_error(ffmpeg::Error::Other {
                    errno: ffmpeg::ffi::EAGAIN,
                })?;
                Ok(frames)
            }
            Err(e) => self.on_decode_error(e),
        }
    }

    /// 디코딩 실패 처리: 키프레임 대기로 전환, 한도 초과 시 Error
    pub(crate) fn on_decode_error(&mut self, e: ffmpeg::Error) -> Result<Vec<ffmpeg::frame::Video>> {
        self.consecutive_errors += 1;
        self.total_errors += 1;
        if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            self.state = DecoderState::Error;
            return Err(Error::DecoderUnavailable(format!(
                "{} consecutive decode errors, last: {}",
                self.consecutive_errors, e
            )));
        }

        warn!(
            "Decode error ({}/{}): {} - waiting for next keyframe",
            self.consecutive_errors, MAX_CONSECUTIVE_ERRORS, e
        );
        self.state = DecoderState::AwaitingKeyframe;
        // 다음 키프레임에서 파라미터 셋 재전송
        self.pending_config = self.last_config.clone();
        Ok(Vec::new())
    }

    /// send_packet (EAGAIN 시 drain 후 1회 재시도) + receive
    fn send_and_receive(&mut self, packet: &ffmpeg::Packet) -> std::result::Result<Sent, ffmpeg::Error> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(Sent::Accepted(self.receive_frames()?)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::ffi::EAGAIN => {
                let mut frames = self.receive_frames()?;
                match self.decoder.send_packet(packet) {
                    Ok(()) => {
                        frames.extend(self.receive_frames()?);
                        Ok(Sent::Accepted(frames))
                    }
                    Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::ffi::EAGAIN => {
                        warn!("Decoder still busy after drain, packet dropped");
                        Ok(Sent::Dropped(frames))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// 디코더 버퍼의 프레임 모두 수신
    fn receive_frames(&mut self) -> std::result::Result<Vec<ffmpeg::frame::Video>, ffmpeg::Error> {
        let mut frames = Vec::new();
        loop {
            let mut frame = ffmpeg::frame::Video::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => frames.push(frame),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::ffi::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    // 이미 받은 프레임이 있으면 그것만 반환
                    if frames.is_empty() {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(frames)
    }

    /// 스트림 끝: EOF 전송 후 남은 프레임 수신
    pub fn flush(&mut self) -> Result<Vec<ffmpeg::frame::Video>> {
        let mut frames = self.receive_frames()?;

        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::ffi::EAGAIN => {
                frames.extend(self.receive_frames()?);
                let _ = self.decoder.send_eof();
            }
            Err(e) => return Err(e.into()),
        }

        frames.extend(self.receive_frames()?);
        Ok(frames)
    }

    /// 디코더 버퍼 비우고 키프레임 대기로 (스트림 재시작/패킷 유실 시)
    /// config는 유지 → 다음 키프레임 앞에 다시 붙임
    pub fn reset(&mut self) {
        self.decoder.flush();
        self.state = DecoderState::AwaitingKeyframe;
        self.pending_config = self.last_config.clone();
        self.consecutive_errors = 0;
        info!("Video decoder reset, awaiting keyframe");
    }
}

impl std::fmt::Debug for VideoDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoDecoder")
            .field("codec_id", &self.codec_id)
            .field("state", &self.state)
            .field("skipped_packets", &self.skipped_packets)
            .finish_non_exhaustive()
    }
}
