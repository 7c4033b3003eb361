//! # Heap Backends
//!
//! A backend owns the single contiguous byte region an allocator manages and
//! can only ever grow it forward:
//!
//! ```text
//!   base()                                limit()
//!     │                                      │
//!     ▼                                      ▼
//!  ┌──────────────────────────────────────┬ ─ ─ ─ ─ ─ ─ ┐
//!  │            owned bytes               │  extend(n)
//!  └──────────────────────────────────────┴ ─ ─ ─ ─ ─ ─ ┘
//!                                         ▲
//!                                         └── extend returns this address
//! ```
//!
//! Two implementations are provided:
//!
//! - [`MemoryPool`]: a fixed-capacity region carved out of one heap
//!   allocation, with an internal break pointer. Extension past the capacity
//!   fails cleanly, which makes out-of-memory paths testable.
//! - [`SystemBreak`]: the real program break, moved with `sbrk(2)`.

use std::ptr;

use libc::{c_void, intptr_t, sbrk};

/// Host memory source for an allocator.
///
/// The region is one contiguous span of readable/writable bytes. The base
/// address and every address returned by `extend` are 8-byte aligned, and
/// successive `extend` calls return strictly adjacent spans: the first new
/// byte of one extension is the old `limit`.
pub trait HeapBackend {
  /// Appends `bytes` to the end of the region.
  ///
  /// Returns the address of the first new byte, or `None` if the region
  /// cannot grow. A failed extension leaves the region untouched.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Option<*mut u8>;

  /// The first byte of the owned region.
  fn base(&self) -> *mut u8;

  /// One past the last owned byte.
  fn limit(&self) -> *mut u8;
}

/// A bounded in-process heap region.
///
/// Backs the region with a single `u64` array (so the base is 8-byte aligned
/// by construction) and simulates the program break with an index into it.
/// This is the backend the tests run against: the capacity bound makes
/// exhaustion deterministic, and dropping the pool releases everything.
pub struct MemoryPool {
  store: *mut u64,
  words: usize,
  brk: usize,
}

impl MemoryPool {
  /// Creates a pool of `capacity` bytes, rounded up to a multiple of 8.
  /// The region starts empty: `base() == limit()` until the first `extend`.
  pub fn new(capacity: usize) -> Self {
    let words = crate::align!(capacity) / 8;
    let store = vec![0u64; words].into_boxed_slice();

    Self {
      store: Box::into_raw(store) as *mut u64,
      words,
      brk: 0,
    }
  }

  /// Total bytes the pool can ever hand out.
  pub fn capacity(&self) -> usize {
    self.words * 8
  }
}

impl HeapBackend for MemoryPool {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Option<*mut u8> {
    let new_brk = self.brk.checked_add(bytes)?;
    if new_brk > self.capacity() {
      return None;
    }

    let first_new = unsafe { self.base().add(self.brk) };
    self.brk = new_brk;
    Some(first_new)
  }

  fn base(&self) -> *mut u8 {
    self.store as *mut u8
  }

  fn limit(&self) -> *mut u8 {
    unsafe { self.base().add(self.brk) }
  }
}

impl Drop for MemoryPool {
  fn drop(&mut self) {
    let slice = ptr::slice_from_raw_parts_mut(self.store, self.words);
    drop(unsafe { Box::from_raw(slice) });
  }
}

/// The real program break, moved with `sbrk`.
///
/// `new` snapshots the current break (nudging it up to an 8-byte boundary if
/// needed) and claims everything above it. `extend` is a single `sbrk` call;
/// `sbrk` returns `(void *)-1` on failure, which maps to `None`.
pub struct SystemBreak {
  base: *mut u8,
}

impl SystemBreak {
  /// Claims the region starting at the current program break.
  ///
  /// # Safety
  ///
  /// The caller must ensure nothing else in the process moves the break for
  /// the lifetime of this value. Interleaving with another `brk`/`sbrk` user
  /// breaks the contiguity contract of [`HeapBackend::extend`].
  pub unsafe fn new() -> Self {
    unsafe {
      let mut brk = sbrk(0) as usize;

      // Nudge the break up so the base lands on an 8-byte boundary.
      let misalign = brk % 8;
      if misalign != 0 {
        sbrk((8 - misalign) as intptr_t);
        brk += 8 - misalign;
      }

      Self {
        base: brk as *mut u8,
      }
    }
  }
}

impl HeapBackend for SystemBreak {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Option<*mut u8> {
    let first_new = unsafe { sbrk(bytes as intptr_t) };
    if first_new == usize::MAX as *mut c_void {
      // sbrk returns (void*)-1 on failure
      return None;
    }

    Some(first_new as *mut u8)
  }

  fn base(&self) -> *mut u8 {
    self.base
  }

  fn limit(&self) -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pool_starts_empty_and_aligned() {
    let pool = MemoryPool::new(4096);

    assert_eq!(pool.base(), pool.limit());
    assert_eq!(pool.base() as usize % 8, 0);
    assert_eq!(pool.capacity(), 4096);
  }

  #[test]
  fn pool_rounds_capacity_up() {
    let pool = MemoryPool::new(13);

    assert_eq!(pool.capacity(), 16);
  }

  #[test]
  fn pool_extends_contiguously() {
    let mut pool = MemoryPool::new(4096);

    let first = pool.extend(64).unwrap();
    assert_eq!(first, pool.base());

    let second = pool.extend(128).unwrap();
    assert_eq!(second as usize, pool.base() as usize + 64);
    assert_eq!(pool.limit() as usize, pool.base() as usize + 192);
  }

  #[test]
  fn pool_extension_past_capacity_fails_without_side_effects() {
    let mut pool = MemoryPool::new(64);

    assert!(pool.extend(48).is_some());
    let limit_before = pool.limit();

    assert!(pool.extend(32).is_none());
    assert_eq!(pool.limit(), limit_before);

    // The remaining 16 bytes are still available.
    assert!(pool.extend(16).is_some());
  }

  #[test]
  fn pool_memory_is_writable_across_extensions() {
    let mut pool = MemoryPool::new(256);

    let p = pool.extend(128).unwrap();
    unsafe {
      for i in 0..128 {
        p.add(i).write(i as u8);
      }

      let q = pool.extend(64).unwrap();
      ptr::write_bytes(q, 0xA5, 64);

      for i in 0..128 {
        assert_eq!(p.add(i).read(), i as u8);
      }
    }
  }

  #[test]
  fn system_break_base_is_aligned() {
    let brk = unsafe { SystemBreak::new() };

    assert_eq!(brk.base() as usize % 8, 0);
    assert!(brk.limit() as usize >= brk.base() as usize);
  }
}
