//! Frame buffers handed from a frame source to its handler.
//!
//! A [`FrameBuffer`] borrows the bytes of one pulled frame and is only valid
//! for the duration of a single handler call. Handlers that need the data
//! afterwards copy it with [`FrameBuffer::to_owned_frame`].

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use vidlink_types::{round_to_micros, OversizePolicy};

/// Maximum frame payload accepted anywhere in the system, in bytes.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    Oversize { size: usize, capacity: usize },
}

/// Borrowed view of one decoded frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    seqn: u64,
    timestamp: f64,
    data: &'a [u8],
}

impl<'a> FrameBuffer<'a> {
    /// Wrap `data` as a frame. Fails if the payload is larger than `capacity`.
    ///
    /// The timestamp is rounded to microseconds, the resolution frames are
    /// traced with.
    pub fn new(
        seqn: u64,
        timestamp: f64,
        data: &'a [u8],
        capacity: usize,
    ) -> Result<Self, FrameError> {
        if data.len() > capacity {
            return Err(FrameError::Oversize {
                size: data.len(),
                capacity,
            });
        }
        Ok(Self {
            seqn,
            timestamp: round_to_micros(timestamp),
            data,
        })
    }

    pub(crate) fn with_seqn(self, seqn: u64) -> Self {
        Self { seqn, ..self }
    }

    /// Sequence number assigned at dispatch.
    pub fn seqn(&self) -> u64 {
        self.seqn
    }

    /// Capture timestamp, seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Declared payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Copy the frame out of the callback.
    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            seqn: self.seqn,
            timestamp: self.timestamp,
            data: self.data.to_vec(),
        }
    }
}

/// A frame copied out of a [`FrameBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedFrame {
    pub seqn: u64,
    pub timestamp: f64,
    pub data: Vec<u8>,
}

/// Apply `policy` to a pulled payload.
///
/// Returns the bytes to forward, or `None` when the frame must be dropped.
pub fn admit(data: &[u8], capacity: usize, policy: OversizePolicy) -> Option<&[u8]> {
    if data.len() <= capacity {
        return Some(data);
    }
    match policy {
        OversizePolicy::Reject => None,
        OversizePolicy::Truncate => Some(&data[..capacity]),
    }
}

/// Monotonic frame sequence counter.
///
/// Each frame source owns its own counter unless one is passed in explicitly;
/// clones share the same underlying value, which gives a global order across
/// sources at the cost of gaps in each source's numbering.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: Arc<AtomicU64>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next dispatched frame will get.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Take the current number and advance.
    pub fn advance(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Current wall-clock time in seconds with microsecond resolution.
pub fn wall_clock_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_buffer_rejects_oversize() {
        let data = vec![0u8; 16];
        let err = FrameBuffer::new(0, 0.0, &data, 8).unwrap_err();
        assert_eq!(
            err,
            FrameError::Oversize {
                size: 16,
                capacity: 8
            }
        );
    }

    #[test]
    fn test_frame_buffer_at_capacity() {
        let data = vec![1u8; 8];
        let frame = FrameBuffer::new(3, 1.5, &data, 8).unwrap();
        assert_eq!(frame.seqn(), 3);
        assert_eq!(frame.size(), 8);
        assert_eq!(frame.timestamp(), 1.5);
    }

    #[test]
    fn test_admit_policies() {
        let data = [7u8; 10];
        assert_eq!(admit(&data, 16, OversizePolicy::Reject), Some(&data[..]));
        assert_eq!(admit(&data, 4, OversizePolicy::Reject), None);

        let truncated = admit(&data, 4, OversizePolicy::Truncate).unwrap();
        assert_eq!(truncated.len(), 4);
    }

    #[test]
    fn test_timestamp_rounded_to_micros() {
        let data = [0u8; 4];
        let frame = FrameBuffer::new(0, 12.3456789, &data, 8).unwrap();
        assert_eq!(frame.timestamp(), 12.345679);
    }

    #[test]
    fn test_owned_copy_outlives_source() {
        let owned = {
            let data = vec![9u8, 8, 7];
            let frame = FrameBuffer::new(1, 2.0, &data, MAX_BUFFER_SIZE).unwrap();
            frame.to_owned_frame()
        };
        assert_eq!(owned.data, vec![9, 8, 7]);
        assert_eq!(owned.seqn, 1);
    }

    #[test]
    fn test_shared_counter() {
        let counter = SequenceCounter::new();
        let shared = counter.clone();
        assert_eq!(counter.advance(), 0);
        assert_eq!(shared.advance(), 1);
        assert_eq!(counter.peek(), 2);
    }

    #[test]
    fn test_wall_clock_is_after_2020() {
        let now = wall_clock_seconds();
        assert!(now > 1_577_836_800.0);
        assert_eq!(round_to_micros(now), now);
    }
}
