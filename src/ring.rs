//! Fixed-capacity single-producer/single-consumer handoff ring.
//!
//! Decouples the network/decoder thread from the display thread. The
//! producer never blocks: if the consumer falls behind by more than the
//! ring's capacity, the oldest unread payload is overwritten. The consumer
//! polls with `try_take` from its render loop and never blocks either.
//!
//! Payload ownership transfers with the slot: `append` moves the buffer in,
//! `try_take` moves it out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};

pub struct RingHandoff {
    slots: Mutex<Slots>,
    /// Filled-but-unread slot count, kept in sync with the cursors under the
    /// lock. Lets `try_take` bail out without touching the mutex when the
    /// ring is empty.
    pending: AtomicUsize,
}

struct Slots {
    buf: Vec<Option<Vec<u8>>>,
    /// Monotonically increasing cursors, taken modulo capacity on access.
    read: usize,
    write: usize,
}

impl RingHandoff {
    /// Create a ring with `capacity` slots. Zero capacity is an error.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("ring capacity must be at least 1"));
        }
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Ok(Self {
            slots: Mutex::new(Slots {
                buf,
                read: 0,
                write: 0,
            }),
            pending: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).buf.len()
    }

    /// Number of filled-but-unread slots.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand a payload to the consumer. Always succeeds; overwrites the
    /// oldest unread payload when the ring is full.
    pub fn append(&self, payload: Vec<u8>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let capacity = slots.buf.len();
        if slots.write - slots.read == capacity {
            // Drop-oldest: advance the read cursor past the slot we are
            // about to overwrite.
            slots.read += 1;
        }
        let idx = slots.write % capacity;
        slots.buf[idx] = Some(payload);
        slots.write += 1;
        let filled = slots.write - slots.read;
        self.pending.store(filled, Ordering::Release);
    }

    /// Take the oldest unread payload, or `None` when nothing is pending.
    /// Never blocks the consumer beyond the short slot-array critical
    /// section.
    pub fn try_take(&self) -> Option<Vec<u8>> {
        if self.pending.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.read == slots.write {
            return None;
        }
        let capacity = slots.buf.len();
        let idx = slots.read % capacity;
        let payload = slots.buf[idx].take();
        slots.read += 1;
        let filled = slots.write - slots.read;
        self.pending.store(filled, Ordering::Release);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(RingHandoff::with_capacity(0).is_err());
    }

    #[test]
    fn empty_ring_reports_no_data() -> Result<()> {
        let ring = RingHandoff::with_capacity(3)?;
        assert!(ring.try_take().is_none());
        assert!(ring.is_empty());
        Ok(())
    }

    #[test]
    fn payloads_come_out_in_append_order() -> Result<()> {
        let ring = RingHandoff::with_capacity(4)?;
        for i in 0..3u8 {
            ring.append(vec![i]);
        }
        for i in 0..3u8 {
            assert_eq!(ring.try_take(), Some(vec![i]));
        }
        assert!(ring.try_take().is_none());
        Ok(())
    }

    #[test]
    fn overflow_drops_the_oldest_payloads() -> Result<()> {
        // N + k appends without a take must leave exactly the last N, in
        // order; the oldest k are lost.
        for (n, k) in [(1usize, 1usize), (3, 2), (5, 7)] {
            let ring = RingHandoff::with_capacity(n)?;
            let total = n + k;
            for i in 0..total {
                ring.append(vec![i as u8]);
            }
            assert_eq!(ring.len(), n);
            for i in k..total {
                assert_eq!(ring.try_take(), Some(vec![i as u8]));
            }
            assert!(ring.try_take().is_none());
        }
        Ok(())
    }

    #[test]
    fn interleaved_append_take_never_duplicates() -> Result<()> {
        let ring = RingHandoff::with_capacity(2)?;
        ring.append(vec![0]);
        ring.append(vec![1]);
        assert_eq!(ring.try_take(), Some(vec![0]));
        ring.append(vec![2]);
        ring.append(vec![3]); // overwrites 1
        assert_eq!(ring.try_take(), Some(vec![2]));
        assert_eq!(ring.try_take(), Some(vec![3]));
        assert!(ring.try_take().is_none());
        Ok(())
    }

    #[test]
    fn handoff_crosses_threads() -> Result<()> {
        let ring = Arc::new(RingHandoff::with_capacity(8)?);
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0..100u8 {
                    ring.append(vec![i]);
                }
            })
        };
        producer.join().expect("producer thread");
        // Consumer sees a suffix of the appended sequence, still in order.
        let mut last = None;
        while let Some(payload) = ring.try_take() {
            if let Some(prev) = last {
                assert!(payload[0] > prev);
            }
            last = Some(payload[0]);
        }
        assert_eq!(last, Some(99));
        Ok(())
    }
}
