//! # Segregated Buddy Allocator
//!
//! Every block is a power of two between 16 bytes and the last size class,
//! tagged with a header only; the buddy algebra replaces the backward
//! footer walk. Splitting a block in half produces its *buddy*: the block
//! whose offset from the payload region differs in exactly the bit that
//! encodes the size.
//!
//! ```text
//!   place(bp, 16) on a 64-byte block:
//!
//!   ┌───────────────────────── 64 ─────────────────────────┐
//!   │                          bp                          │
//!   └──────────────────────────────────────────────────────┘
//!   ┌──────────── 32 ────────────┬──────────── 32 ─────────┐
//!   │            bp              │    freed right buddy    │
//!   └────────────────────────────┴─────────────────────────┘
//!   ┌───── 16 ─────┬───── 16 ────┐
//!   │  bp (alloc)  │ freed buddy │
//!   └──────────────┴─────────────┘
//!
//!   coalesce undoes this bottom-up: while a block's equal-sized buddy is
//!   free, both fuse into their parent.
//! ```
//!
//! The offset test is a single AND: a block of size `s` at offset `o` from
//! the payload base is the right half of its parent exactly when `o & s` is
//! set. Buddies therefore never need to be recorded anywhere: they are
//! recomputed from address and size.
//!
//! The prologue, embedded class roots, epilogue, and free-list algebra are
//! the same as the segregated-fit design; only sizing, splitting, and
//! merging differ.

use std::collections::HashMap;
use std::ptr;

use crate::backend::HeapBackend;
use crate::freelist::{self, FreeIndex, SizeClasses};
use crate::heap::{
  CHUNKSIZE, DSIZE, MAX_REQUEST, MIN_BLOCK, NONE, RawHeap, WSIZE, is_alloc_word, pack,
  unpack_size,
};
use crate::policy::Placement;

/// A binary-buddy allocator over a [`HeapBackend`] region.
///
/// Placement is always first-fit: after splitting, any block pulled from a
/// class is an exact match for the request, so there is nothing for a
/// best/worst policy to weigh.
///
/// # Thread Safety
///
/// Not thread-safe, like its boundary-tag siblings.
pub struct BuddyAllocator<B: HeapBackend> {
  heap: RawHeap<B>,
  index: SizeClasses,
}

impl<B: HeapBackend> BuddyAllocator<B> {
  /// Prepares the region (padding, prologue with the embedded class
  /// roots, epilogue) and seeds it with one [`CHUNKSIZE`] free block.
  ///
  /// `backend` must be empty. Returns `None` if it cannot supply the
  /// preamble plus the first chunk.
  pub fn new(backend: B) -> Option<Self> {
    let mut heap = RawHeap::new(backend);
    debug_assert_eq!(heap.len(), 0, "backend must start empty");

    let prologue_size = (2 + SizeClasses::ROOT_WORDS) * WSIZE;
    let preamble = prologue_size + 2 * WSIZE;
    heap.extend(preamble)?;

    heap.put(0, 0); // alignment padding
    heap.put(WSIZE, pack(prologue_size, 1)); // prologue header
    for class in 0..SizeClasses::ROOT_WORDS {
      heap.put((2 + class) * WSIZE, NONE);
    }
    heap.put(prologue_size, pack(prologue_size, 1)); // prologue footer
    heap.put(preamble - WSIZE, pack(0, 1)); // epilogue header

    let mut allocator = Self {
      heap,
      index: SizeClasses,
    };
    allocator.grow(CHUNKSIZE)?;
    Some(allocator)
  }

  /// Allocates the smallest power-of-two block covering `size` bytes plus
  /// the header, and returns an 8-byte-aligned payload pointer, or null
  /// when `size` is zero or the region cannot grow.
  ///
  /// # Safety
  ///
  /// The allocator must still own its region: nothing else may have grown
  /// the backend behind its back.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 || size > MAX_REQUEST {
      return ptr::null_mut();
    }

    let needed = (size + DSIZE as usize) as u32;
    let mut asize = MIN_BLOCK;
    while asize < needed {
      asize <<= 1;
    }

    if let Some(bp) = freelist::find_fit(&self.heap, &self.index, asize, Placement::FirstFit) {
      self.place(bp, asize);
      return self.heap.payload_ptr(bp);
    }

    let Some(bp) = self.grow(asize.max(CHUNKSIZE)) else {
      return ptr::null_mut();
    };
    self.place(bp, asize);
    self.heap.payload_ptr(bp)
  }

  /// Returns a block and fuses it with its free buddies, level by level.
  /// Freeing null is a no-op.
  ///
  /// # Safety
  ///
  /// `ptr` must have come from this allocator's `allocate`/`reallocate`
  /// and must not have been freed already.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    let bp = self.heap.offset_of(ptr);
    let size = self.heap.block_size(bp);
    self.heap.set_header(bp, pack(size, 0));
    self.coalesce(bp);
  }

  /// Resizes an allocation.
  ///
  /// Null `ptr` behaves as `allocate(size)`; `size == 0` frees `ptr` and
  /// returns null; a request the current block already covers returns
  /// `ptr` unchanged. Anything else moves the payload to a fresh block and
  /// frees the old one, returning null (old block untouched) if the fresh
  /// allocation fails.
  ///
  /// # Safety
  ///
  /// Same contract as [`free`](Self::free) for non-null `ptr`.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if ptr.is_null() {
        return self.allocate(size);
      }
      if size == 0 {
        self.free(ptr);
        return ptr::null_mut();
      }
      if size > MAX_REQUEST {
        return ptr::null_mut();
      }

      let bp = self.heap.offset_of(ptr);
      let have = self.heap.block_size(bp);
      let need = crate::align!(size as u32 + DSIZE);

      if need <= have {
        return ptr;
      }

      let new_ptr = self.allocate(size);
      if new_ptr.is_null() {
        return ptr::null_mut();
      }
      let new_bp = self.heap.offset_of(new_ptr);
      let preserved = ((have - DSIZE) as usize).min(size);
      self.heap.copy_payload(bp, new_bp, preserved);
      self.free(ptr);
      new_ptr
    }
  }

  /// Extends the region by at least `bytes` (a power of two whenever the
  /// caller passes one), stamps the extension as one free block, moves the
  /// epilogue, and runs buddy coalescing on the new block.
  fn grow(
    &mut self,
    bytes: u32,
  ) -> Option<u32> {
    let size = crate::align!(bytes);
    let bp = self.heap.extend(size)?;

    self.heap.set_header(bp, pack(size, 0));
    self.heap.set_header(self.heap.next_block(bp), pack(0, 1)); // new epilogue

    Some(self.coalesce(bp))
  }

  /// Takes `bp` off its list and halves it until it matches `asize`,
  /// freeing every split-off right half.
  fn place(
    &mut self,
    bp: u32,
    asize: u32,
  ) {
    freelist::remove(&mut self.heap, &mut self.index, bp);
    let mut csize = self.heap.block_size(bp);

    while csize > asize {
      csize >>= 1;
      self.heap.set_header(bp + csize, pack(csize, 0));
      freelist::insert(&mut self.heap, &mut self.index, bp + csize);
    }
    self.heap.set_header(bp, pack(asize, 1));
  }

  /// Files `bp` as free, then fuses buddies upward: while the equal-sized
  /// buddy of the current block is also free, both leave their lists and
  /// the left one becomes a doubled free block.
  ///
  /// A buddy that is allocated, or that has been split into smaller blocks
  /// (its header then shows a smaller size), stops the climb.
  fn coalesce(
    &mut self,
    mut bp: u32,
  ) -> u32 {
    freelist::insert(&mut self.heap, &mut self.index, bp);
    let mut csize = self.heap.block_size(bp);
    let origin = self.payload_base();

    loop {
      let offset = bp - origin;
      let (left, right) = if offset & csize != 0 {
        (bp - csize, bp)
      } else {
        (bp, bp + csize)
      };

      // the right buddy of the final block is the epilogue: size 0, allocated
      if self.heap.is_alloc(left)
        || self.heap.is_alloc(right)
        || self.heap.block_size(left) != self.heap.block_size(right)
      {
        break;
      }

      freelist::remove(&mut self.heap, &mut self.index, left);
      freelist::remove(&mut self.heap, &mut self.index, right);
      csize <<= 1;
      self.heap.set_header(left, pack(csize, 0));
      freelist::insert(&mut self.heap, &mut self.index, left);
      bp = left;
    }
    bp
  }

  /// Offset of the first block pointer after the prologue; also the origin
  /// of the buddy offset algebra.
  fn payload_base(&self) -> u32 {
    (4 + SizeClasses::ROOT_WORDS) * WSIZE
  }

  /// Walks the heap and the free lists, panicking on the first violated
  /// invariant. On top of the shared list checks this enforces the buddy
  /// shape: every block a power of two of at least 16 bytes, and no two
  /// equal-sized free buddies coexisting.
  pub fn check_heap(&self) {
    let listed = freelist::check_lists(&self.heap, &self.index);

    let end = self.heap.len();
    let origin = self.payload_base();
    let mut blocks = HashMap::new();
    let mut bp = origin;
    let mut free_blocks = 0;

    loop {
      assert!(bp <= end, "walk ran past the epilogue");
      let header = self.heap.header(bp);
      let size = unpack_size(header);

      if size == 0 {
        assert!(is_alloc_word(header), "epilogue lost its allocated flag");
        assert_eq!(bp, end, "epilogue is not the last word of the region");
        break;
      }

      assert_eq!(bp % DSIZE, 0, "block pointer not 8-byte aligned");
      assert!(size >= MIN_BLOCK, "block below the minimum size");
      assert!(size.is_power_of_two(), "block size is not a power of two");

      let alloc = self.heap.is_alloc(bp);
      if !alloc {
        assert!(listed.contains(&bp), "free block missing from its list");
        free_blocks += 1;
      }
      blocks.insert(bp, (size, alloc));
      bp += size;
    }

    assert_eq!(
      free_blocks,
      listed.len(),
      "free lists hold blocks the heap walk never visited"
    );

    for (&bp, &(size, alloc)) in &blocks {
      if alloc {
        continue;
      }
      let buddy = origin + ((bp - origin) ^ size);
      if let Some(&(buddy_size, buddy_alloc)) = blocks.get(&buddy) {
        assert!(
          buddy_alloc || buddy_size != size,
          "equal-sized free buddies coexist"
        );
      }
    }
  }

  /// Prints the block table to stdout.
  pub fn dump(&self) {
    println!(
      "buddy heap of {} bytes at {:?}",
      self.heap.len(),
      self.heap.payload_ptr(0),
    );

    let mut bp = self.payload_base();
    while unpack_size(self.heap.header(bp)) != 0 {
      let size = self.heap.block_size(bp);
      println!(
        "  +{:<8} {:>8} bytes  {}",
        bp,
        size,
        if self.heap.is_alloc(bp) { "allocated" } else { "free" },
      );
      bp += size;
    }
    println!("  +{:<8} epilogue", bp);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::MemoryPool;

  fn pool() -> MemoryPool {
    MemoryPool::new(1 << 20)
  }

  fn free_blocks(allocator: &BuddyAllocator<MemoryPool>) -> Vec<(u32, u32)> {
    let mut found = Vec::new();

    for class in 0..allocator.index.class_count() {
      let mut bp = allocator.index.root(&allocator.heap, class);
      while bp != NONE {
        found.push((bp, allocator.heap.block_size(bp)));
        bp = allocator.heap.succ(bp);
      }
    }
    found
  }

  #[test]
  fn init_seeds_one_chunk() {
    let allocator = BuddyAllocator::new(pool()).unwrap();
    allocator.check_heap();

    assert_eq!(allocator.payload_base(), 96);
    assert_eq!(allocator.heap.len(), 96 + 4096);
    assert_eq!(free_blocks(&allocator), vec![(96, 4096)]);
  }

  #[test]
  fn requests_round_up_to_powers_of_two() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    unsafe {
      for (request, expected) in [(1, 16), (8, 16), (9, 32), (100, 128), (2040, 2048), (2041, 4096)] {
        let p = allocator.allocate(request);
        assert!(!p.is_null());
        let bp = allocator.heap.offset_of(p);
        assert_eq!(allocator.heap.block_size(bp), expected, "request {request}");
        allocator.check_heap();
        allocator.free(p);
        allocator.check_heap();
      }
    }
  }

  #[test]
  fn place_halves_down_and_frees_right_buddies() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    let p = unsafe { allocator.allocate(1) };
    allocator.check_heap();

    let bp = allocator.heap.offset_of(p);
    assert_eq!(bp, 96);
    assert_eq!(allocator.heap.block_size(bp), 16);

    // one free buddy per level below the 4096 chunk
    let mut free = free_blocks(&allocator);
    free.sort();
    assert_eq!(
      free,
      vec![
        (112, 16),
        (128, 32),
        (160, 64),
        (224, 128),
        (352, 256),
        (608, 512),
        (1120, 1024),
        (2144, 2048),
      ],
    );
  }

  #[test]
  fn returned_pointers_are_8_byte_aligned() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    unsafe {
      for size in [1, 7, 8, 9, 100, 1000, 3000] {
        let p = allocator.allocate(size);
        assert_eq!(p as usize % 8, 0, "size {size}");
      }
    }
    allocator.check_heap();
  }

  #[test]
  fn merge_chain_restores_the_full_chunk() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    unsafe {
      let a = allocator.allocate(1);
      let b = allocator.allocate(1);
      let c = allocator.allocate(1);
      let d = allocator.allocate(1);
      allocator.check_heap();

      allocator.free(a);
      allocator.check_heap();
      allocator.free(b);
      allocator.check_heap();
      allocator.free(c);
      allocator.check_heap();

      // the last free cascades all the way back up
      allocator.free(d);
      allocator.check_heap();
    }

    assert_eq!(free_blocks(&allocator), vec![(96, 4096)]);
  }

  #[test]
  fn reallocate_moves_and_preserves_payload() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    unsafe {
      let p = allocator.allocate(40);
      for i in 0..40 {
        p.add(i).write(i as u8 ^ 0xC3);
      }

      let old_bp = allocator.heap.offset_of(p);
      let r = allocator.reallocate(p, 200);
      allocator.check_heap();

      assert!(!r.is_null());
      assert_ne!(r, p);
      assert_eq!(allocator.heap.block_size(allocator.heap.offset_of(r)), 256);
      for i in 0..40 {
        assert_eq!(r.add(i).read(), i as u8 ^ 0xC3);
      }
      assert!(!allocator.heap.is_alloc(old_bp));
    }
  }

  #[test]
  fn reallocate_within_block_returns_same_pointer() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    unsafe {
      let p = allocator.allocate(40); // 64-byte block
      let r = allocator.reallocate(p, 50); // still fits: 50 + 8 <= 64
      assert_eq!(r, p);

      let shrunk = allocator.reallocate(p, 4);
      assert_eq!(shrunk, p);
    }
    allocator.check_heap();
  }

  #[test]
  fn reallocate_null_and_zero() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    unsafe {
      let p = allocator.reallocate(ptr::null_mut(), 24);
      assert!(!p.is_null());
      allocator.check_heap();

      let bp = allocator.heap.offset_of(p);
      assert!(allocator.reallocate(p, 0).is_null());
      assert!(!allocator.heap.is_alloc(bp));
    }
    allocator.check_heap();
  }

  #[test]
  fn zero_and_oversized_requests_return_null() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    unsafe {
      assert!(allocator.allocate(0).is_null());
      assert!(allocator.allocate(MAX_REQUEST + 1).is_null());
    }
    allocator.check_heap();
  }

  #[test]
  fn exhaustion_fails_clean_and_recovers() {
    let mut allocator = BuddyAllocator::new(MemoryPool::new(96 + 4096)).unwrap();

    unsafe {
      assert!(allocator.allocate(8192).is_null());
      allocator.check_heap();

      let p = allocator.allocate(1000);
      assert!(!p.is_null());
      allocator.check_heap();
    }
  }

  #[test]
  fn growth_keeps_buddy_offsets_consistent() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    // 4096 can't hold 4089 + header: the heap grows by an 8192 extension.
    // That extension is no buddy of the seeded chunk (the sizes differ),
    // so the original 4096 block stays free on its own.
    let p = unsafe { allocator.allocate(4089) };
    assert!(!p.is_null());
    allocator.check_heap();

    let bp = allocator.heap.offset_of(p);
    assert_eq!(bp, 96 + 4096);
    assert_eq!(allocator.heap.block_size(bp), 8192);
    assert_eq!(allocator.heap.len(), 96 + 4096 + 8192);
    assert_eq!(free_blocks(&allocator), vec![(96, 4096)]);
  }

  #[test]
  fn equal_sized_extension_fuses_with_its_freed_buddy() {
    let mut allocator = BuddyAllocator::new(pool()).unwrap();

    unsafe {
      // consume the whole seeded chunk, force a second one, then free both
      let p = allocator.allocate(4000);
      let q = allocator.allocate(4000);
      assert_eq!(allocator.heap.len(), 96 + 8192);
      allocator.check_heap();

      allocator.free(p);
      allocator.check_heap();
      allocator.free(q);
      allocator.check_heap();
    }

    assert_eq!(free_blocks(&allocator), vec![(96, 8192)]);
  }
}
