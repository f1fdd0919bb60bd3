//! Fixed-capacity sample ring shared by one producer and one consumer.
//!
//! Cursors are unbounded logical positions (`u64`), the physical slot of a
//! position is `position % capacity`. The producer never blocks: when it laps
//! the consumer it moves the read cursor forward so that at most `capacity`
//! unread samples exist, silently dropping the oldest ones.
//!
//! The ring is lock-free. Slots hold the sample bit pattern in an
//! `AtomicU64`, so a concurrent overwrite can never produce undefined
//! behaviour; the consumer additionally re-checks the read cursor after
//! copying and discards any slot the producer reclaimed mid-copy, so the
//! samples it returns are exactly the ones that were pushed, in order.
//!
//! Use [`CircularSampleBuffer`] directly from a single context, or
//! [`CircularSampleBuffer::split`] it into a [`SampleWriter`] and a
//! [`SampleReader`] to hand one side to another thread. Neither handle is
//! `Clone`, which keeps the single-writer/single-reader contract.

use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

use crate::sample::Sample;

/// Number of attempts a pull makes when every copied slot was reclaimed by
/// the producer during the copy.
const PULL_ATTEMPTS: usize = 4;

/// Errors raised when allocating a ring.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("Ring capacity must be at least one sample")]
    ZeroCapacity,
}

struct Ring {
    slots: Box<[AtomicU64]>,
    write: AtomicU64,
    read: AtomicU64,
    dropped: AtomicU64,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            write: AtomicU64::new(0),
            read: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    fn slot(&self, position: u64) -> &AtomicU64 {
        &self.slots[(position % self.capacity()) as usize]
    }

    /// Producer side. Only the writer ever stores `write`.
    fn push<T: Sample>(&self, values: &[T]) {
        let capacity = self.capacity();
        let mut write = self.write.load(Ordering::Relaxed);

        for value in values {
            if write >= capacity {
                // Reclaim the slot we are about to overwrite before touching it.
                let floor = write + 1 - capacity;
                let previous = self.read.fetch_max(floor, Ordering::AcqRel);
                if previous < floor {
                    self.dropped.fetch_add(floor - previous, Ordering::Relaxed);
                }
                fence(Ordering::Release);
            }
            self.slot(write).store(value.to_bits(), Ordering::Relaxed);
            write += 1;
            self.write.store(write, Ordering::Release);
        }
    }

    /// Consumer side.
    fn pull<T: Sample>(&self, dest: &mut [T]) -> usize {
        for _ in 0..PULL_ATTEMPTS {
            let read = self.read.load(Ordering::Acquire);
            let write = self.write.load(Ordering::Acquire);
            let start = read.max(write.saturating_sub(self.capacity()));
            let count = (write - start).min(dest.len() as u64) as usize;
            if count == 0 {
                return 0;
            }

            for (i, out) in dest[..count].iter_mut().enumerate() {
                *out = T::from_bits(self.slot(start + i as u64).load(Ordering::Relaxed));
            }

            // Any slot the producer reclaimed while we copied is below the new floor.
            fence(Ordering::Acquire);
            let floor = self.read.load(Ordering::Relaxed);
            let torn = floor.saturating_sub(start).min(count as u64) as usize;
            let end = start + count as u64;
            self.read.fetch_max(end, Ordering::AcqRel);

            if torn < count {
                dest.copy_within(torn..count, 0);
                return count - torn;
            }
        }
        0
    }

    fn available(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.saturating_sub(read).min(self.capacity()) as usize
    }
}

/// Fixed-capacity circular buffer of samples.
///
/// # Example
///
/// ```
/// use plotlink_core::CircularSampleBuffer;
///
/// let mut buffer = CircularSampleBuffer::<i16>::new(4).unwrap();
/// buffer.push(&[1, 2, 3, 4, 5, 6]);
///
/// let mut out = [0i16; 8];
/// let n = buffer.pull(&mut out);
/// assert_eq!(&out[..n], &[3, 4, 5, 6]);
/// ```
pub struct CircularSampleBuffer<T: Sample> {
    ring: Arc<Ring>,
    _sample: PhantomData<T>,
}

impl<T: Sample> CircularSampleBuffer<T> {
    /// Allocate a ring holding at most `capacity` unread samples.
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        Ok(Self {
            ring: Arc::new(Ring::new(capacity)),
            _sample: PhantomData,
        })
    }

    /// Append samples, dropping the oldest unread ones on overflow.
    pub fn push(&mut self, values: &[T]) {
        self.ring.push(values);
    }

    /// Copy up to `dest.len()` unread samples into `dest`, oldest first.
    ///
    /// Returns the number of samples copied (0 when nothing is unread).
    pub fn pull(&mut self, dest: &mut [T]) -> usize {
        self.ring.pull(dest)
    }

    /// Number of unread samples.
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Maximum number of unread samples the ring retains.
    pub fn capacity(&self) -> usize {
        self.ring.slots.len()
    }

    /// Total number of samples ever pushed.
    pub fn written(&self) -> u64 {
        self.ring.write.load(Ordering::Acquire)
    }

    /// Total number of samples overwritten before they were pulled.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }

    /// Split into the producer and consumer halves.
    pub fn split(self) -> (SampleWriter<T>, SampleReader<T>) {
        (
            SampleWriter {
                ring: self.ring.clone(),
                _sample: PhantomData,
            },
            SampleReader {
                ring: self.ring,
                _sample: PhantomData,
            },
        )
    }
}

/// Producer half of a [`CircularSampleBuffer`].
pub struct SampleWriter<T: Sample> {
    ring: Arc<Ring>,
    _sample: PhantomData<T>,
}

impl<T: Sample> SampleWriter<T> {
    /// Append samples, dropping the oldest unread ones on overflow.
    pub fn push(&mut self, values: &[T]) {
        self.ring.push(values);
    }

    /// Total number of samples ever pushed.
    pub fn written(&self) -> u64 {
        self.ring.write.load(Ordering::Acquire)
    }

    /// Total number of samples overwritten before they were pulled.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half of a [`CircularSampleBuffer`].
pub struct SampleReader<T: Sample> {
    ring: Arc<Ring>,
    _sample: PhantomData<T>,
}

impl<T: Sample> SampleReader<T> {
    /// Copy up to `dest.len()` unread samples into `dest`, oldest first.
    pub fn pull(&mut self, dest: &mut [T]) -> usize {
        self.ring.pull(dest)
    }

    /// Number of unread samples.
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Maximum number of unread samples the ring retains.
    pub fn capacity(&self) -> usize {
        self.ring.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    fn drain<T: Sample>(buffer: &mut CircularSampleBuffer<T>) -> Vec<T> {
        let mut out = vec![T::default(); buffer.capacity() + 1];
        let n = buffer.pull(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            CircularSampleBuffer::<u16>::new(0).err(),
            Some(BufferError::ZeroCapacity)
        );
    }

    #[test]
    fn test_push_pull_in_order() {
        let mut buffer = CircularSampleBuffer::<i16>::new(8).unwrap();
        assert_eq!(buffer.available(), 0);

        buffer.push(&[1, 2, 3]);
        assert_eq!(buffer.available(), 3);

        let mut out = [0i16; 2];
        assert_eq!(buffer.pull(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(buffer.available(), 1);

        assert_eq!(buffer.pull(&mut out), 1);
        assert_eq!(out[0], 3);
        assert_eq!(buffer.pull(&mut out), 0);
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let mut buffer = CircularSampleBuffer::<u32>::new(4).unwrap();
        buffer.push(&[1, 2, 3, 4, 5, 6, 7]);

        assert_eq!(buffer.available(), 4);
        assert_eq!(buffer.dropped(), 3);
        assert_eq!(drain(&mut buffer), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_bound_holds_for_push_sequences() {
        for capacity in [1usize, 3, 4, 16] {
            for chunk in [1usize, 2, 5, 17] {
                let mut buffer = CircularSampleBuffer::<u32>::new(capacity).unwrap();
                let mut pushed: Vec<u32> = Vec::new();

                for round in 0..10u32 {
                    let values: Vec<u32> =
                        (0..chunk as u32).map(|i| round * 100 + i).collect();
                    buffer.push(&values);
                    pushed.extend(&values);
                    assert!(buffer.available() <= capacity);
                }

                let keep = pushed.len().min(capacity);
                let expected = pushed[pushed.len() - keep..].to_vec();
                assert_eq!(drain(&mut buffer), expected);
            }
        }
    }

    #[test]
    fn test_wraparound_after_partial_reads() {
        let mut buffer = CircularSampleBuffer::<i16>::new(4).unwrap();
        let mut out = [0i16; 4];

        buffer.push(&[1, 2, 3]);
        assert_eq!(buffer.pull(&mut out[..2]), 2);
        buffer.push(&[4, 5, 6]);

        assert_eq!(buffer.available(), 4);
        assert_eq!(buffer.pull(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
        assert_eq!(buffer.written(), 6);
    }

    #[test]
    fn test_float_samples() {
        let mut buffer = CircularSampleBuffer::<f32>::new(2).unwrap();
        buffer.push(&[0.5, -1.25, 3.75]);
        assert_eq!(drain(&mut buffer), vec![-1.25, 3.75]);
    }

    #[test]
    fn test_split_handles_share_ring() {
        let buffer = CircularSampleBuffer::<u16>::new(8).unwrap();
        let (mut writer, mut reader) = buffer.split();

        writer.push(&[10, 20]);
        assert_eq!(reader.available(), 2);
        assert_eq!(reader.capacity(), 8);

        let mut out = [0u16; 8];
        assert_eq!(reader.pull(&mut out), 2);
        assert_eq!(&out[..2], &[10, 20]);
        assert_eq!(writer.written(), 2);
    }

    #[test]
    fn test_concurrent_producer_preserves_order() {
        const TOTAL: u32 = 200_000;
        let buffer = CircularSampleBuffer::<u32>::new(64).unwrap();
        let (mut writer, mut reader) = buffer.split();

        let producer = thread::spawn(move || {
            for v in 0..TOTAL {
                writer.push(&[v]);
            }
            writer
        });

        let mut received = Vec::new();
        let mut out = [0u32; 16];
        loop {
            let n = reader.pull(&mut out);
            received.extend_from_slice(&out[..n]);
            if producer.is_finished() && reader.available() == 0 {
                break;
            }
        }
        let writer = producer.join().unwrap();

        // Gaps are allowed (overflow), reordering and duplicates are not.
        assert!(received.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(received.last().copied(), Some(TOTAL - 1));
        assert!(received.len() as u64 + writer.dropped() >= TOTAL as u64);
    }
}
