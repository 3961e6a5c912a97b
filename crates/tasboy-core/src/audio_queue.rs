use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// One stereo sample pair (left, right).
pub type Frame = (i16, i16);

/// Single-producer / single-consumer ring of stereo frames.
///
/// The audio sampler thread owns the producer and the host's audio callback
/// owns the consumer. Each frame is packed into one `AtomicU32`, so neither
/// side needs a lock or `unsafe`.
///
/// The queue is lossy when full: new pushes are dropped.
pub struct AudioProducer {
    inner: Arc<Ring>,
}

pub struct AudioConsumer {
    inner: Arc<Ring>,
}

struct Ring {
    // One extra slot so head==tail is unambiguously empty.
    slots: Box<[AtomicU32]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

#[inline]
fn pack((left, right): Frame) -> u32 {
    ((left as u16 as u32) << 16) | right as u16 as u32
}

#[inline]
fn unpack(raw: u32) -> Frame {
    ((raw >> 16) as u16 as i16, raw as u16 as i16)
}

impl Ring {
    fn cap(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            self.cap() - tail + head
        }
    }

    #[inline]
    fn next_index(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.cap() { 0 } else { next }
    }
}

pub fn audio_queue(capacity_frames: usize) -> (AudioProducer, AudioConsumer) {
    let cap = capacity_frames.saturating_add(1).max(2);
    let slots: Box<[AtomicU32]> = (0..cap).map(|_| AtomicU32::new(0)).collect();
    let inner = Arc::new(Ring {
        slots,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        AudioProducer {
            inner: Arc::clone(&inner),
        },
        AudioConsumer { inner },
    )
}

impl AudioProducer {
    #[inline]
    pub fn push(&self, frame: Frame) -> bool {
        let head = self.inner.head.load(Ordering::Relaxed);
        let next = self.inner.next_index(head);
        if next == self.inner.tail.load(Ordering::Acquire) {
            return false;
        }
        self.inner.slots[head].store(pack(frame), Ordering::Relaxed);
        self.inner.head.store(next, Ordering::Release);
        true
    }

    /// Push as many of `frames` as fit. Returns how many were queued.
    pub fn push_frames(&self, frames: &[Frame]) -> usize {
        frames.iter().take_while(|&&f| self.push(f)).count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.inner.cap() - 1
    }
}

impl AudioConsumer {
    #[inline]
    pub fn pop(&self) -> Option<Frame> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        if tail == self.inner.head.load(Ordering::Acquire) {
            return None;
        }
        let frame = unpack(self.inner.slots[tail].load(Ordering::Relaxed));
        self.inner
            .tail
            .store(self.inner.next_index(tail), Ordering::Release);
        Some(frame)
    }

    /// Fill `out` from the queue, padding with silence on underrun.
    /// Returns the number of frames that came from the queue.
    pub fn pop_into(&self, out: &mut [Frame]) -> usize {
        let mut filled = 0;
        for slot in out.iter_mut() {
            match self.pop() {
                Some(frame) => {
                    *slot = frame;
                    filled += 1;
                }
                None => *slot = (0, 0),
            }
        }
        filled
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_keep_sign_and_order() {
        let (tx, rx) = audio_queue(4);
        assert!(tx.push((-1, 2)));
        assert!(tx.push((i16::MIN, i16::MAX)));
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.pop(), Some((-1, 2)));
        assert_eq!(rx.pop(), Some((i16::MIN, i16::MAX)));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn full_queue_drops_newest() {
        let (tx, rx) = audio_queue(2);
        assert_eq!(tx.push_frames(&[(1, 1), (2, 2), (3, 3)]), 2);
        assert_eq!(tx.capacity_frames(), 2);
        let mut out = [(9, 9); 3];
        assert_eq!(rx.pop_into(&mut out), 2);
        assert_eq!(out, [(1, 1), (2, 2), (0, 0)]);
    }

    #[test]
    fn wraps_around_the_ring() {
        let (tx, rx) = audio_queue(3);
        for i in 0..10i16 {
            assert!(tx.push((i, -i)));
            assert_eq!(rx.pop(), Some((i, -i)));
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn producer_and_consumer_on_separate_threads() {
        let (tx, rx) = audio_queue(64);
        let writer = std::thread::spawn(move || {
            let mut sent = 0i16;
            while sent < 1000 {
                if tx.push((sent, sent)) {
                    sent += 1;
                }
            }
        });
        let mut expected = 0i16;
        while expected < 1000 {
            if let Some((l, r)) = rx.pop() {
                assert_eq!((l, r), (expected, expected));
                expected += 1;
            }
        }
        writer.join().unwrap();
    }
}
