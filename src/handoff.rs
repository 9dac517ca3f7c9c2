//! Single-slot, latest-frame-wins hand-off between the producer and a
//! polling consumer.
//!
//! The producer converts into its own scratch buffer, then calls
//! [`FrameHandoff::publish`], which copies into the bound destination and
//! raises the availability flag while holding the slot lock. `halt` takes
//! the same lock, so once it returns no frame can be published until the
//! next `bind`/`resume`.
//!
//! Every `bind` and `resume` opens a new epoch. A producer publishes with
//! the epoch it was started under, so a stream left over from before a
//! restart cannot write into the new binding.
//!
//! The destination is only ever try-locked by `publish`: a consumer holding
//! [`FrameBuffer::read`] causes the frame to be dropped, never a wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Destination for converted frames, shared between the engine and the
/// consumer.
///
/// Cloning yields another view of the same bytes.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Wrap existing storage.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Buffer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Borrow the contents for reading.
    ///
    /// Only meaningful after availability has been observed. Frames produced
    /// while the guard is held are dropped.
    pub fn read(&self) -> MutexGuard<'_, Vec<u8>> {
        self.lock()
    }

    /// Copy the contents out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Whether both handles refer to the same storage.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, Vec<u8>>> {
        match self.bytes.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    buffer: Option<FrameBuffer>,
    accepting: bool,
    epoch: u64,
}

/// Synchronizes one in-flight frame between producer and consumer.
#[derive(Debug, Default)]
pub struct FrameHandoff {
    slot: Mutex<Slot>,
    available: AtomicBool,
}

impl FrameHandoff {
    /// Create an unbound hand-off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `buffer` as the destination and begin accepting frames.
    ///
    /// Clears any pending availability. Returns the epoch producers must
    /// publish under.
    pub fn bind(&self, buffer: FrameBuffer) -> u64 {
        let mut slot = self.lock_slot();
        slot.buffer = Some(buffer);
        slot.accepting = true;
        slot.epoch += 1;
        self.available.store(false, Ordering::Release);
        slot.epoch
    }

    /// Accept frames again into the previously bound buffer.
    ///
    /// Returns the new epoch, or `None` if nothing is bound.
    pub fn resume(&self) -> Option<u64> {
        let mut slot = self.lock_slot();
        slot.buffer.as_ref()?;
        slot.accepting = true;
        slot.epoch += 1;
        Some(slot.epoch)
    }

    /// Stop accepting frames. Idempotent.
    ///
    /// A producer call racing with `halt` either finished publishing before
    /// it, or finds the slot closed and discards its frame.
    pub fn halt(&self) {
        self.lock_slot().accepting = false;
    }

    /// Halt and detach the destination buffer.
    pub fn unbind(&self) -> Option<FrameBuffer> {
        let mut slot = self.lock_slot();
        slot.accepting = false;
        self.available.store(false, Ordering::Release);
        slot.buffer.take()
    }

    /// Currently bound destination.
    pub fn buffer(&self) -> Option<FrameBuffer> {
        self.lock_slot().buffer.clone()
    }

    /// Copy `frame` into the destination and mark it available.
    ///
    /// Returns `false` and leaves the destination untouched if the hand-off
    /// is halted or unbound, `epoch` is stale, the consumer is reading, or
    /// `frame` does not match the destination size. An unconsumed frame is
    /// overwritten.
    pub fn publish(&self, epoch: u64, frame: &[u8]) -> bool {
        let slot = self.lock_slot();
        if !slot.accepting || slot.epoch != epoch {
            return false;
        }
        let Some(buffer) = slot.buffer.as_ref() else {
            return false;
        };

        let Some(mut dst) = buffer.try_lock() else {
            return false;
        };
        if dst.len() != frame.len() {
            return false;
        }
        dst.copy_from_slice(frame);
        drop(dst);

        self.available.store(true, Ordering::Release);
        true
    }

    /// Whether a completed, unconsumed frame is waiting. Never blocks.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Clear availability after the consumer has read the frame.
    pub fn mark_consumed(&self) {
        self.available.store(false, Ordering::Release);
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
