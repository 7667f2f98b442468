//! Fixed-capacity buffers shared by kernel invocations.
//!
//! Writers claim positions with atomic counters, so any number of
//! invocations can append concurrently through a shared reference.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use super::WORKGROUP_SIZE;

/// Append-only buffer with a bounded number of slots.
///
/// Positions come from a single fetch-add counter. Items that land past
/// the capacity are dropped and counted in [`AppendBuffer::dropped`].
#[derive(Debug)]
pub struct AppendBuffer<T> {
    slots: Vec<OnceLock<T>>,
    counter: AtomicU32,
    dropped: AtomicU32,
}

impl<T: Copy + Send + Sync> AppendBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            counter: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Empty every slot and zero the counters.
    pub fn reset(&mut self) {
        *self.counter.get_mut() = 0;
        *self.dropped.get_mut() = 0;
        self.slots.par_iter_mut().for_each(|slot| {
            slot.take();
        });
    }

    /// Append one item, returning its position, or `None` when full.
    pub fn push(&self, value: T) -> Option<u32> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed);
        match self.slots.get(index as usize) {
            Some(slot) => {
                let _ = slot.set(value);
                Some(index)
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Claim `count` contiguous positions. Fails as a whole when the range
    /// would not fit, leaving the counter untouched.
    pub fn reserve(&self, count: u32) -> Option<u32> {
        let capacity = self.slots.len() as u32;
        let claimed = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(count)
                    .filter(|&end| end <= capacity)
            });

        match claimed {
            Ok(start) => Some(start),
            Err(_) => {
                self.dropped.fetch_add(count, Ordering::Relaxed);
                None
            }
        }
    }

    /// Fill a position previously claimed with [`AppendBuffer::reserve`].
    pub fn write(&self, index: u32, value: T) {
        if let Some(slot) = self.slots.get(index as usize) {
            let _ = slot.set(value);
        }
    }

    /// Number of stored items (the counter clamped to capacity).
    pub fn len(&self) -> usize {
        (self.counter.load(Ordering::Acquire) as usize).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items rejected because the buffer was full.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy the stored items into a dense vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.slots[..self.len()]
            .iter()
            .filter_map(|slot| slot.get().copied())
            .collect()
    }
}

/// Workgroup counts for a dispatch sized from a previous stage's output.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchIndirectArgs {
    /// Enough workgroups to cover `count` items.
    pub fn for_items(count: usize) -> Self {
        Self {
            x: (count as u32).div_ceil(WORKGROUP_SIZE),
            y: 1,
            z: 1,
        }
    }

    /// Total number of invocations this record launches.
    pub fn invocations(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize * WORKGROUP_SIZE as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_parallel_push_respects_capacity() {
        let buffer = AppendBuffer::<u32>::with_capacity(1000);
        (0..1500u32).into_par_iter().for_each(|v| {
            buffer.push(v);
        });

        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.dropped(), 500);

        let mut items = buffer.to_vec();
        items.sort_unstable();
        items.dedup();
        assert_eq!(items.len(), 1000);
    }

    #[test]
    fn test_reserve_is_all_or_nothing() {
        let buffer = AppendBuffer::<u8>::with_capacity(10);
        assert_eq!(buffer.reserve(6), Some(0));
        assert_eq!(buffer.reserve(6), None);
        assert_eq!(buffer.reserve(4), Some(6));
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.dropped(), 6);
    }

    #[test]
    fn test_reset_clears_slots() {
        let mut buffer = AppendBuffer::<u32>::with_capacity(4);
        buffer.push(7);
        buffer.push(8);
        buffer.reset();
        assert!(buffer.is_empty());
        buffer.push(9);
        assert_eq!(buffer.to_vec(), vec![9]);
    }

    #[test]
    fn test_dispatch_args_round_up() {
        let args = DispatchIndirectArgs::for_items(WORKGROUP_SIZE as usize + 1);
        assert_eq!(args.x, 2);
        assert_eq!(args.invocations(), 2 * WORKGROUP_SIZE as usize);
        assert_eq!(DispatchIndirectArgs::for_items(0).invocations(), 0);
    }
}
