//! 링 버퍼 기반 프레임 큐 (디코드 스레드 → UI 전달용)
//! 미러링은 최신 프레임만 의미가 있으므로 용량 초과 / 소비 시 오래된 프레임은 drop

use crate::ffmpeg::Frame;
use std::collections::VecDeque;

/// 전달 대기 프레임 큐 (Mutex로 감싸서 사용)
pub struct FrameQueue {
    buffer: VecDeque<Frame>,
    max_len: usize,
    /// 표시되지 못하고 버려진 프레임 수
    dropped: u64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let max_len = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(max_len),
            max_len,
            dropped: 0,
        }
    }

    /// 큐에 프레임 추가 (용량 초과 시 가장 오래된 것 evict)
    pub fn push(&mut self, frame: Frame) {
        while self.buffer.len() >= self.max_len {
            if self.buffer.pop_front().is_some() {
                self.dropped += 1;
            }
        }
        self.buffer.push_back(frame);
    }

    /// 가장 최신 프레임 반환, 그보다 오래된 프레임은 버림
    pub fn pop_latest(&mut self) -> Option<Frame> {
        let latest = self.buffer.pop_back()?;
        self.dropped += self.buffer.len() as u64;
        self.buffer.clear();
        Some(latest)
    }

    /// 가장 오래된 프레임 제거 후 반환
    pub fn pop(&mut self) -> Option<Frame> {
        self.buffer.pop_front()
    }

    /// pts에 가장 가까운 프레임 조회 (소비하지 않음, 오디오 시계 동기화용)
    /// 인덱스 기반 검색으로 최종 선택 프레임만 clone
    pub fn peek_nearest(&self, pts_us: i64, tolerance_us: i64) -> Option<Frame> {
        let tolerance = tolerance_us.max(0) as u64;
        let mut best: Option<(u64, usize)> = None;
        for (i, f) in self.buffer.iter().enumerate() {
            let Some(frame_pts) = f.pts_us else { continue };
            let diff = frame_pts.abs_diff(pts_us);
            if diff <= tolerance && best.map_or(true, |(d, _)| diff < d) {
                best = Some((diff, i));
            }
        }
        best.map(|(_, i)| self.buffer[i].clone())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::PixelFormat;

    fn frame(pts_us: i64) -> Frame {
        Frame {
            width: 2,
            height: 2,
            format: PixelFormat::Bgra,
            data: vec![0; 16],
            pts_us: Some(pts_us),
        }
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut queue = FrameQueue::new(2);
        queue.push(frame(0));
        queue.push(frame(1));
        queue.push(frame(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().unwrap().pts_us, Some(1));
    }

    #[test]
    fn test_pop_latest_discards_older() {
        let mut queue = FrameQueue::new(4);
        for pts in 0..3 {
            queue.push(frame(pts));
        }
        assert_eq!(queue.pop_latest().unwrap().pts_us, Some(2));
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 2);
        assert!(queue.pop_latest().is_none());
    }

    #[test]
    fn test_peek_nearest() {
        let mut queue = FrameQueue::new(4);
        queue.push(frame(0));
        queue.push(frame(33_000));
        queue.push(frame(66_000));

        assert_eq!(queue.peek_nearest(40_000, 20_000).unwrap().pts_us, Some(33_000));
        assert_eq!(queue.peek_nearest(60_000, 20_000).unwrap().pts_us, Some(66_000));
        assert!(queue.peek_nearest(200_000, 20_000).is_none());
        // 소비하지 않음
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_peek_nearest_extreme_pts() {
        let mut queue = FrameQueue::new(4);
        queue.push(frame(i64::MIN));
        queue.push(frame(i64::MAX));

        assert_eq!(queue.peek_nearest(i64::MAX, 0).unwrap().pts_us, Some(i64::MAX));
        assert_eq!(queue.peek_nearest(i64::MIN + 5, 10).unwrap().pts_us, Some(i64::MIN));
        assert!(queue.peek_nearest(0, i64::MAX).is_some());
        assert!(queue.peek_nearest(0, -1).is_none());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut queue = FrameQueue::new(0);
        queue.push(frame(0));
        queue.push(frame(1));
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
    }
}
