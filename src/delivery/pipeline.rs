//! Pipeline - 미러 스트림 백그라운드 디코딩 + 프레임 전달
//!
//! 아키텍처:
//! - 네트워크 스레드(호스트)가 push_packet / push_bytes로 패킷 공급
//! - 디코드 스레드가 decode → 색공간 변환 → FrameQueue push (+ FrameSink 콜백)
//! - UI 스레드는 try_get_frame으로 최신 프레임만 즉시 가져감 (디코딩 대기 없음)

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::config::PipelineConfig;
use crate::delivery::FrameQueue;
use crate::error::{Error, Result};
use crate::ffmpeg::{Frame, FrameConverter, Packet, VideoCodec, VideoDecoder};
use crate::stream::PacketAssembler;

/// 통계 로그 주기 (프레임 수)
const STATS_LOG_INTERVAL: u64 = 600;

/// 디코드 스레드에서 프레임을 받는 콜백
/// 디코드 스레드를 막으므로 무거운 작업은 호출측에서 다른 스레드로 넘길 것
pub trait FrameSink: Send {
    fn on_frame(&self, frame: &Frame);
}

impl<F> FrameSink for F
where
    F: Fn(&Frame) + Send,
{
    fn on_frame(&self, frame: &Frame) {
        self(frame)
    }
}

/// 파이프라인 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    /// 키프레임 대기 중 버려진 패킷
    pub packets_skipped: u64,
    pub frames_decoded: u64,
    pub frames_delivered: u64,
    /// 큐에서 표시되지 못하고 버려진 프레임
    pub frames_dropped: u64,
    pub decode_errors: u64,
    pub running: bool,
}

#[derive(Default)]
struct Counters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    packets_skipped: AtomicU64,
    frames_decoded: AtomicU64,
    frames_delivered: AtomicU64,
    decode_errors: AtomicU64,
}

enum Command {
    Packet(Packet),
    Reset,
}

/// 디코드 스레드로 넘기는 상태
struct Worker {
    receiver: Receiver<Command>,
    decoder: VideoDecoder,
    converter: FrameConverter,
    frame_queue: Arc<Mutex<FrameQueue>>,
    sink: Option<Box<dyn FrameSink>>,
    /// 루프 종료 시 false
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    convert_errors: u64,
}

/// 미러링 디코드 파이프라인
pub struct Pipeline {
    codec: VideoCodec,
    /// stop() 시 None (채널 닫힘 → 디코드 스레드 종료)
    sender: Mutex<Option<SyncSender<Command>>>,
    frame_queue: Arc<Mutex<FrameQueue>>,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    /// push_bytes용 조립기
    assembler: Mutex<PacketAssembler>,
}

impl Pipeline {
    /// 파이프라인 시작 (디코더는 디코드 스레드에서 생성, 실패 시 여기서 Err)
    pub fn start(
        codec: VideoCodec,
        config: PipelineConfig,
        sink: Option<Box<dyn FrameSink>>,
    ) -> Result<Self> {
        let config = config.validated()?;

        let (sender, receiver) = mpsc::sync_channel(config.packet_queue_capacity);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let frame_queue = Arc::new(Mutex::new(FrameQueue::new(config.frame_queue_capacity)));
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let thread_queue = frame_queue.clone();
        let thread_running = running.clone();
        let thread_counters = counters.clone();

        let handle = thread::Builder::new()
            .name(format!("airsync-decode-{}", codec.name()))
            .spawn(move || {
                let decoder = match VideoDecoder::new(codec, &config.video) {
                    Ok(d) => d,
                    Err(e) => {
                        thread_running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let mut worker = Worker {
                    receiver,
                    decoder,
                    converter: FrameConverter::new(config.output),
                    frame_queue: thread_queue,
                    sink,
                    running: thread_running,
                    counters: thread_counters,
                    convert_errors: 0,
                };
                worker.run();
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::DecoderUnavailable(
                    "decode thread exited during startup".into(),
                ));
            }
        }

        info!("Pipeline started ({})", codec.name());

        Ok(Self {
            codec,
            sender: Mutex::new(Some(sender)),
            frame_queue,
            decode_thread: Mutex::new(Some(handle)),
            running,
            counters,
            assembler: Mutex::new(PacketAssembler::new()),
        })
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// 패킷 공급 (패킷 큐가 가득 차면 대기)
    pub fn push_packet(&self, packet: Packet) -> Result<()> {
        let sender = lock(&self.sender, "sender").clone().ok_or(Error::Closed)?;

        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(packet.data.len() as u64, Ordering::Relaxed);

        sender.send(Command::Packet(packet)).map_err(|_| Error::Closed)
    }

    /// 프레이밍된 바이트 청크 공급 (임의 경계). 큐에 넣은 패킷 수 반환
    /// 프레이밍 에러 시 조립기를 비움 → 호출측은 스트림 재동기화 필요
    pub fn push_bytes(&self, bytes: &[u8]) -> Result<usize> {
        let mut packets = Vec::new();
        {
            let mut assembler = lock(&self.assembler, "assembler");
            assembler.push(bytes);
            loop {
                match assembler.next_packet() {
                    Ok(Some(packet)) => packets.push(packet),
                    Ok(None) => break,
                    Err(e) => {
                        assembler.reset();
                        return Err(e);
                    }
                }
            }
        }

        let count = packets.len();
        for packet in packets {
            self.push_packet(packet)?;
        }
        Ok(count)
    }

    /// 최신 프레임 조회 (디코딩 없음, 즉시 반환). 이전 프레임은 버림
    pub fn try_get_frame(&self) -> Option<Frame> {
        lock(&self.frame_queue, "frame queue").pop_latest()
    }

    /// pts에 가장 가까운 프레임 (소비하지 않음)
    pub fn frame_near(&self, pts_us: i64, tolerance_us: i64) -> Option<Frame> {
        lock(&self.frame_queue, "frame queue").peek_nearest(pts_us, tolerance_us)
    }

    /// 디코더 / 조립기 / 큐 초기화 (스트림 재연결, 패킷 유실 후)
    pub fn request_reset(&self) -> Result<()> {
        lock(&self.assembler, "assembler").reset();
        lock(&self.frame_queue, "frame queue").clear();

        let sender = lock(&self.sender, "sender").clone().ok_or(Error::Closed)?;
        sender.send(Command::Reset).map_err(|_| Error::Closed)
    }

    pub fn stats(&self) -> PipelineStats {
        let frames_dropped = lock(&self.frame_queue, "frame queue").dropped();
        PipelineStats {
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            packets_skipped: self.counters.packets_skipped.load(Ordering::Relaxed),
            frames_decoded: self.counters.frames_decoded.load(Ordering::Relaxed),
            frames_delivered: self.counters.frames_delivered.load(Ordering::Relaxed),
            frames_dropped,
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            running: self.running.load(Ordering::SeqCst),
        }
    }

    /// 정지 (디코드 스레드 종료 대기). 여러 번 호출해도 안전
    /// 채널을 닫으면 스레드가 남은 패킷 디코드 + 디코더 flush 후 종료
    /// → 정지 전에 넣은 패킷의 프레임은 항상 sink까지 전달됨
    pub fn stop(&self) {
        let handle = lock(&self.decode_thread, "decode thread").take();
        let Some(handle) = handle else {
            return;
        };

        lock(&self.sender, "sender").take();

        if handle.join().is_err() {
            error!("Decode thread panicked");
        }
        self.running.store(false, Ordering::SeqCst);
        lock(&self.frame_queue, "frame queue").clear();

        let stats = self.stats();
        info!(
            "Pipeline stopped: {} packets, {} decoded, {} delivered, {} dropped, {} errors",
            stats.packets_received,
            stats.frames_decoded,
            stats.frames_delivered,
            stats.frames_dropped,
            stats.decode_errors
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Worker {
    /// 디코드 루프
    fn run(&mut self) {
        debug!("Decode loop started");

        loop {
            // 송신측이 모두 닫힘 = 정지 또는 스트림 끝 → 버퍼된 프레임 전달
            let Ok(command) = self.receiver.recv() else {
                self.drain_decoder();
                break;
            };

            match command {
                Command::Reset => {
                    self.decoder.reset();
                    lock(&self.frame_queue, "frame queue").clear();
                }
                Command::Packet(packet) => {
                    if !self.decode_packet(&packet) {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!("Decode loop ended");
    }

    /// false 반환 시 루프 종료 (디코더 복구 불가)
    fn decode_packet(&mut self, packet: &Packet) -> bool {
        let result = self.decoder.decode(packet);
        self.counters
            .packets_skipped
            .store(self.decoder.skipped_packets(), Ordering::Relaxed);
        self.update_error_count();

        match result {
            Ok(frames) => {
                for raw in frames {
                    self.deliver(raw);
                }
                true
            }
            Err(e @ Error::DecoderUnavailable(_)) => {
                error!("Decoder unavailable, stopping decode loop: {}", e);
                false
            }
            Err(e) => {
                warn!("Packet decode failed: {}", e);
                self.convert_errors += 1;
                self.update_error_count();
                true
            }
        }
    }

    /// 변환 후 큐 + 콜백으로 전달
    fn deliver(&mut self, raw: ffmpeg_next::frame::Video) {
        let decoded = self.counters.frames_decoded.fetch_add(1, Ordering::Relaxed) + 1;
        let pts_us = raw.pts().or_else(|| raw.timestamp());

        let frame = match self.converter.convert(&raw, pts_us) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame conversion failed (pts={:?}): {}", pts_us, e);
                self.convert_errors += 1;
                self.update_error_count();
                return;
            }
        };

        if let Some(sink) = &self.sink {
            sink.on_frame(&frame);
        }

        lock(&self.frame_queue, "frame queue").push(frame);
        self.counters.frames_delivered.fetch_add(1, Ordering::Relaxed);

        if decoded % STATS_LOG_INTERVAL == 0 {
            debug!(
                "Pipeline: {} frames decoded, {} packets skipped, {} errors",
                decoded,
                self.decoder.skipped_packets(),
                self.decoder.errors() + self.convert_errors
            );
        }
    }

    fn drain_decoder(&mut self) {
        match self.decoder.flush() {
            Ok(frames) => {
                for raw in frames {
                    self.deliver(raw);
                }
            }
            Err(e) => warn!("Decoder flush failed: {}", e),
        }
    }

    fn update_error_count(&self) {
        self.counters
            .decode_errors
            .store(self.decoder.errors() + self.convert_errors, Ordering::Relaxed);
    }
}

/// Mutex poisoned (다른 스레드 panic) → 복구 후 계속
fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{} mutex poisoned, recovering", name);
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::testdata::{h264_idr, H264_CONFIG};
    use crate::ffmpeg::PixelFormat;
    use crate::stream::framing::encode_packet;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_for(pipeline: &Pipeline, predicate: impl Fn(&PipelineStats) -> bool) -> PipelineStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = pipeline.stats();
            if predicate(&stats) || Instant::now() > deadline {
                return stats;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn start_h264() -> Pipeline {
        Pipeline::start(VideoCodec::H264, PipelineConfig::default(), None).unwrap()
    }

    #[test]
    fn test_skips_packets_before_keyframe() {
        let pipeline = start_h264();
        for i in 0..3 {
            pipeline
                .push_packet(Packet::media(vec![0, 0, 0, 1, 0x41, 0x9a], i * 16_666, false))
                .unwrap();
        }

        let stats = wait_for(&pipeline, |s| s.packets_skipped == 3);
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.bytes_received, 18);
        assert_eq!(stats.packets_skipped, 3);
        assert_eq!(stats.frames_decoded, 0);
        assert!(stats.running);
        assert!(pipeline.try_get_frame().is_none());
    }

    #[test]
    fn test_push_bytes_assembles_packets() {
        let pipeline = start_h264();
        let mut bytes = encode_packet(&Packet::config(vec![0, 0, 0, 1, 0x67]));
        bytes.extend(encode_packet(&Packet::media(vec![0, 0, 0, 1, 0x41], 0, false)));

        let (first, second) = bytes.split_at(7);
        assert_eq!(pipeline.push_bytes(first).unwrap(), 0);
        assert_eq!(pipeline.push_bytes(second).unwrap(), 2);

        let stats = wait_for(&pipeline, |s| s.packets_skipped == 1);
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_skipped, 1);
    }

    #[test]
    fn test_push_bytes_rejects_oversize() {
        let pipeline = start_h264();
        let mut header = [0u8; 12];
        header[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(pipeline.push_bytes(&header), Err(Error::InvalidData(_))));
        // 조립기 초기화 후 정상 패킷은 다시 받음
        let ok = encode_packet(&Packet::media(vec![1], 0, false));
        assert_eq!(pipeline.push_bytes(&ok).unwrap(), 1);
    }

    #[test]
    fn test_stop_is_idempotent_and_closes() {
        let pipeline = start_h264();
        pipeline.stop();
        pipeline.stop();

        assert!(!pipeline.stats().running);
        assert!(matches!(
            pipeline.push_packet(Packet::media(vec![1], 0, true)),
            Err(Error::Closed)
        ));
        assert!(matches!(pipeline.request_reset(), Err(Error::Closed)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            packet_queue_capacity: 0,
            ..PipelineConfig::default()
        };
        let result = Pipeline::start(VideoCodec::H264, config, None);
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_reset_accepted_while_running() {
        let pipeline = start_h264();
        pipeline.request_reset().unwrap();
        let stats = wait_for(&pipeline, |s| s.running);
        assert!(stats.running);
    }

    fn counting_sink() -> (Arc<AtomicUsize>, Box<dyn FrameSink>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sink: Box<dyn FrameSink> = Box::new(move |frame: &Frame| {
            assert_eq!((frame.width, frame.height), (16, 16));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (calls, sink)
    }

    #[test]
    fn test_idr_reaches_queue_and_sink() {
        let (calls, sink) = counting_sink();
        let pipeline = Pipeline::start(VideoCodec::H264, PipelineConfig::default(), Some(sink)).unwrap();
        pipeline.push_packet(Packet::config(H264_CONFIG.to_vec())).unwrap();
        pipeline.push_packet(Packet::media(h264_idr(), 0, true)).unwrap();

        let stats = wait_for(&pipeline, |s| s.frames_delivered == 1);
        assert_eq!(stats.frames_decoded, 1);
        assert_eq!(stats.frames_delivered, 1);
        assert_eq!(stats.decode_errors, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let frame = pipeline.try_get_frame().unwrap();
        assert_eq!(frame.format, PixelFormat::Bgra);
        assert_eq!((frame.width, frame.height), (16, 16));
        assert_eq!(frame.data.len(), 16 * 16 * 4);
        assert_eq!(frame.pts_us, Some(0));
        assert!(pipeline.try_get_frame().is_none());
    }

    #[test]
    fn test_stop_delivers_pending_packets() {
        let (calls, sink) = counting_sink();
        let pipeline = Pipeline::start(VideoCodec::H264, PipelineConfig::default(), Some(sink)).unwrap();
        pipeline.push_packet(Packet::config(H264_CONFIG.to_vec())).unwrap();
        pipeline.push_packet(Packet::media(h264_idr(), 0, true)).unwrap();

        // 대기 없이 바로 정지해도 큐에 들어간 패킷은 디코드 + flush 후 종료
        pipeline.stop();
        let stats = pipeline.stats();
        assert!(!stats.running);
        assert_eq!(stats.frames_delivered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_decoder_ends_loop() {
        let (sender, receiver) = mpsc::sync_channel(4);
        let mut decoder = VideoDecoder::new(VideoCodec::H264, &Default::default()).unwrap();
        for _ in 0..crate::ffmpeg::decoder::MAX_CONSECUTIVE_ERRORS {
            let _ = decoder.on_decode_error(ffmpeg_next::Error::InvalidData);
        }

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let mut worker = Worker {
            receiver,
            decoder,
            converter: FrameConverter::new(Default::default()),
            frame_queue: Arc::new(Mutex::new(FrameQueue::new(2))),
            sink: None,
            running: running.clone(),
            counters: counters.clone(),
            convert_errors: 0,
        };

        sender.send(Command::Packet(Packet::media(h264_idr(), 0, true))).unwrap();
        sender.send(Command::Packet(Packet::media(h264_idr(), 1, true))).unwrap();
        // 송신측이 살아 있어도 루프가 끝나야 함
        worker.run();

        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(counters.decode_errors.load(Ordering::Relaxed), 30);
        assert_eq!(counters.frames_decoded.load(Ordering::Relaxed), 0);
        // 두 번째 패킷은 처리되지 않음
        assert!(matches!(worker.receiver.try_recv(), Ok(Command::Packet(_))));
        drop(sender);
    }

    #[test]
    fn test_closure_sink() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sink: Box<dyn FrameSink> = Box::new(move |frame: &Frame| {
            assert_eq!(frame.format, PixelFormat::Bgra);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let frame = Frame {
            width: 2,
            height: 2,
            format: PixelFormat::Bgra,
            data: vec![0; 16],
            pts_us: Some(0),
        };
        sink.on_frame(&frame);
        sink.on_frame(&frame);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
