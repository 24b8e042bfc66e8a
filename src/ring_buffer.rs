use crate::frame::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Bounded FIFO of captured frames with index-addressable mutation.
///
/// This is the retroactive edit window: frames live here between capture
/// and encoding, and a mask pass may rewrite their pixels in place while
/// they wait. One lock serializes the producer (push), the consumer
/// (eviction/drain) and the mutator (`for_each_mut`); a frame handed out
/// by `push` or `drain` has left the buffer and has no other observers.
pub struct RingBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    stats: RingBufferStats,
}

/// Counters for ring buffer monitoring
#[derive(Debug, Default)]
pub struct RingBufferStats {
    /// Total frames admitted
    pub frames_pushed: AtomicU64,
    /// Frames evicted to make room at capacity
    pub frames_evicted: AtomicU64,
    /// Frames removed by drain
    pub frames_drained: AtomicU64,
    /// Completed retroactive passes
    pub retro_passes: AtomicU64,
}

impl RingBufferStats {
    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> RingBufferStatsSnapshot {
        RingBufferStatsSnapshot {
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            frames_drained: self.frames_drained.load(Ordering::Relaxed),
            retro_passes: self.retro_passes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of ring buffer statistics
#[derive(Debug, Clone)]
pub struct RingBufferStatsSnapshot {
    pub frames_pushed: u64,
    pub frames_evicted: u64,
    pub frames_drained: u64,
    pub retro_passes: u64,
}

impl RingBuffer {
    /// Create a ring buffer holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Ring buffer capacity must be greater than 0");
        }

        debug!("Created ring buffer with capacity {}", capacity);

        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
            stats: RingBufferStats::default(),
        }
    }

    /// Append a frame. When the buffer is at capacity the oldest frame is
    /// removed and returned to the caller, which then owns it exclusively.
    pub async fn push(&self, frame: Frame) -> Option<Frame> {
        let mut frames = self.frames.lock().await;

        debug_assert!(
            frames
                .back()
                .map_or(true, |last| last.capture_ms <= frame.capture_ms),
            "frames must be admitted in capture order"
        );

        frames.push_back(frame);
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);

        if frames.len() > self.capacity {
            self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
            let evicted = frames.pop_front();
            trace!(
                "Evicted frame at capacity (capture_ms: {:?})",
                evicted.as_ref().map(|f| f.capture_ms)
            );
            evicted
        } else {
            None
        }
    }

    /// Run `f` over every buffered frame, oldest first, under the buffer
    /// lock. The frame set mutated is exactly the set resident at the
    /// instant the lock was acquired. Returns the number of frames visited.
    pub async fn for_each_mut<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&mut Frame),
    {
        let mut frames = self.frames.lock().await;
        for frame in frames.iter_mut() {
            f(frame);
        }
        self.stats.retro_passes.fetch_add(1, Ordering::Relaxed);
        frames.len()
    }

    /// Remove and return all buffered frames in capture order
    pub async fn drain(&self) -> Vec<Frame> {
        let mut frames = self.frames.lock().await;
        let drained: Vec<Frame> = frames.drain(..).collect();
        self.stats
            .frames_drained
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        debug!("Drained {} frames from ring buffer", drained.len());
        drained
    }

    /// Discard all buffered frames
    pub async fn clear(&self) {
        let mut frames = self.frames.lock().await;
        frames.clear();
    }

    pub async fn len(&self) -> usize {
        self.frames.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.frames.lock().await.is_empty()
    }

    /// Capture timestamp of the oldest buffered frame, if any
    pub async fn oldest_capture_ms(&self) -> Option<u64> {
        self.frames.lock().await.front().map(|f| f.capture_ms)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get current buffer statistics
    pub fn stats(&self) -> RingBufferStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_frame(capture_ms: u64) -> Frame {
        Frame::blank(4, 4, capture_ms)
    }

    #[tokio::test]
    async fn test_push_below_capacity() {
        let buffer = RingBuffer::new(3);
        assert!(buffer.push(test_frame(1)).await.is_none());
        assert!(buffer.push(test_frame(2)).await.is_none());
        assert!(buffer.push(test_frame(3)).await.is_none());
        assert_eq!(buffer.len().await, 3);
    }

    #[tokio::test]
    async fn test_eviction_at_capacity() {
        let buffer = RingBuffer::new(3);
        for ms in 1..=3 {
            buffer.push(test_frame(ms)).await;
        }

        // Fourth push evicts the oldest
        let evicted = buffer.push(test_frame(4)).await;
        assert_eq!(evicted.unwrap().capture_ms, 1);
        assert_eq!(buffer.len().await, 3);

        let evicted = buffer.push(test_frame(5)).await;
        assert_eq!(evicted.unwrap().capture_ms, 2);
    }

    #[tokio::test]
    async fn test_len_bounded_after_any_push() {
        let buffer = RingBuffer::new(5);
        for ms in 0..50 {
            buffer.push(test_frame(ms)).await;
            assert!(buffer.len().await <= 5);
        }
    }

    #[tokio::test]
    async fn test_drain_returns_capture_order() {
        let buffer = RingBuffer::new(4);
        for ms in [10, 20, 30] {
            buffer.push(test_frame(ms)).await;
        }

        let drained = buffer.drain().await;
        let order: Vec<u64> = drained.iter().map(|f| f.capture_ms).collect();
        assert_eq!(order, vec![10, 20, 30]);
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_for_each_mut_visits_all_resident_frames() {
        let buffer = RingBuffer::new(10);
        for ms in 0..6 {
            buffer.push(test_frame(ms)).await;
        }

        let visited = buffer
            .for_each_mut(|frame| {
                frame.data[0] = 0xAB;
            })
            .await;
        assert_eq!(visited, 6);

        for frame in buffer.drain().await {
            assert_eq!(frame.data[0], 0xAB);
        }
    }

    #[tokio::test]
    async fn test_for_each_mut_does_not_touch_evicted() {
        let buffer = RingBuffer::new(2);
        buffer.push(test_frame(1)).await;
        buffer.push(test_frame(2)).await;
        let evicted = buffer.push(test_frame(3)).await.unwrap();

        buffer
            .for_each_mut(|frame| {
                frame.data[0] = 0xFF;
            })
            .await;

        // Evicted before the pass, so untouched
        assert_eq!(evicted.data[0], 0);
    }

    #[tokio::test]
    async fn test_oldest_capture_ms() {
        let buffer = RingBuffer::new(3);
        assert_eq!(buffer.oldest_capture_ms().await, None);

        buffer.push(test_frame(100)).await;
        buffer.push(test_frame(200)).await;
        assert_eq!(buffer.oldest_capture_ms().await, Some(100));

        buffer.push(test_frame(300)).await;
        buffer.push(test_frame(400)).await;
        assert_eq!(buffer.oldest_capture_ms().await, Some(200));
    }

    #[tokio::test]
    async fn test_stats() {
        let buffer = RingBuffer::new(2);
        for ms in 0..5 {
            buffer.push(test_frame(ms)).await;
        }
        buffer.for_each_mut(|_| {}).await;
        buffer.drain().await;

        let stats = buffer.stats();
        assert_eq!(stats.frames_pushed, 5);
        assert_eq!(stats.frames_evicted, 3);
        assert_eq!(stats.frames_drained, 2);
        assert_eq!(stats.retro_passes, 1);
    }

    #[tokio::test]
    async fn test_concurrent_push_and_mutate() {
        let buffer = Arc::new(RingBuffer::new(50));
        let mut handles = Vec::new();

        let producer = Arc::clone(&buffer);
        handles.push(tokio::spawn(async move {
            for ms in 0..200 {
                producer.push(test_frame(ms)).await;
            }
        }));

        let mutator = Arc::clone(&buffer);
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                mutator
                    .for_each_mut(|frame| {
                        frame.data[0] = frame.data[0].wrapping_add(1);
                    })
                    .await;
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        }));

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(buffer.len().await <= 50);
        assert_eq!(buffer.stats().frames_pushed, 200);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _ = RingBuffer::new(0);
    }
}
