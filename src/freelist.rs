//! # Free-List Organization
//!
//! Free blocks are threaded through doubly linked lists in LIFO order, the
//! link words living inside the blocks' own payload. The designs differ only
//! in where the list *roots* live and how many lists there are:
//!
//! ```text
//!   SingleList                         SizeClasses
//!
//!   allocator handle                   prologue (inside the heap)
//!   ┌──────────┐                       ┌────────┬──────┬──────┬─────┬──────┬────────┐
//!   │ root ────┼──► [free]─►[free]     │ pro hdr│ root0│ root1│ ... │root19│ pro ftr│
//!   └──────────┘                       └────────┴──┬───┴──┬───┴─────┴──────┴────────┘
//!                                                  │      └─► [free]─►[free]
//!   one list, every size               one list per power-of-two size class
//! ```
//!
//! [`FreeIndex`] is that seam. The insert/remove/search algebra on top of it
//! is shared by every design.

use crate::backend::HeapBackend;
use crate::heap::{MIN_BLOCK, NONE, RawHeap, WSIZE};
use crate::policy::Placement;

/// Number of segregated size classes. Class `i` covers sizes up to
/// `16 << i`; the last class absorbs everything larger.
pub(crate) const CLASS_COUNT: u32 = 20;

/// Offset of the first root word inside a segregated prologue.
const ROOTS_BASE: u32 = 2 * WSIZE;

/// Where free-list roots live and how sizes map to them.
pub trait FreeIndex {
  /// Root words embedded in the prologue (0 for a single external root).
  const ROOT_WORDS: u32;

  /// Number of distinct free lists.
  fn class_count(&self) -> u32;

  /// Index of the list responsible for blocks of `size` bytes.
  fn class_of(
    &self,
    size: u32,
  ) -> u32;

  /// Head block of list `class`, or [`NONE`].
  fn root<B: HeapBackend>(
    &self,
    heap: &RawHeap<B>,
    class: u32,
  ) -> u32;

  fn set_root<B: HeapBackend>(
    &mut self,
    heap: &mut RawHeap<B>,
    class: u32,
    bp: u32,
  );
}

/// One list for every free block, rooted in the allocator handle.
#[derive(Default)]
pub struct SingleList {
  root: u32,
}

impl FreeIndex for SingleList {
  const ROOT_WORDS: u32 = 0;

  fn class_count(&self) -> u32 {
    1
  }

  fn class_of(
    &self,
    _size: u32,
  ) -> u32 {
    0
  }

  fn root<B: HeapBackend>(
    &self,
    _heap: &RawHeap<B>,
    _class: u32,
  ) -> u32 {
    self.root
  }

  fn set_root<B: HeapBackend>(
    &mut self,
    _heap: &mut RawHeap<B>,
    _class: u32,
    bp: u32,
  ) {
    self.root = bp;
  }
}

/// Twenty per-class lists, their roots stored as words inside the prologue.
#[derive(Default)]
pub struct SizeClasses;

impl FreeIndex for SizeClasses {
  const ROOT_WORDS: u32 = CLASS_COUNT;

  fn class_count(&self) -> u32 {
    CLASS_COUNT
  }

  /// Smallest class whose upper bound `16 << i` covers `size`; the last
  /// class catches everything beyond `16 << 19`.
  fn class_of(
    &self,
    size: u32,
  ) -> u32 {
    let mut class = 0;
    let mut bound = MIN_BLOCK;

    while size > bound && class + 1 < CLASS_COUNT {
      bound <<= 1;
      class += 1;
    }
    class
  }

  fn root<B: HeapBackend>(
    &self,
    heap: &RawHeap<B>,
    class: u32,
  ) -> u32 {
    heap.word(ROOTS_BASE + class * WSIZE)
  }

  fn set_root<B: HeapBackend>(
    &mut self,
    heap: &mut RawHeap<B>,
    class: u32,
    bp: u32,
  ) {
    heap.put(ROOTS_BASE + class * WSIZE, bp);
  }
}

/// Pushes a free block onto the head of its size class's list.
pub(crate) fn insert<B: HeapBackend, I: FreeIndex>(
  heap: &mut RawHeap<B>,
  index: &mut I,
  bp: u32,
) {
  let class = index.class_of(heap.block_size(bp));
  let old_head = index.root(heap, class);

  heap.set_pred(bp, NONE);
  heap.set_succ(bp, old_head);
  if old_head != NONE {
    heap.set_pred(old_head, bp);
  }
  index.set_root(heap, class, bp);
}

/// Unlinks a free block from its list.
pub(crate) fn remove<B: HeapBackend, I: FreeIndex>(
  heap: &mut RawHeap<B>,
  index: &mut I,
  bp: u32,
) {
  let class = index.class_of(heap.block_size(bp));

  if bp == index.root(heap, class) {
    let new_head = heap.succ(bp);
    index.set_root(heap, class, new_head);
    if new_head != NONE {
      heap.set_pred(new_head, NONE);
    }
    return;
  }

  let pred = heap.pred(bp);
  let succ = heap.succ(bp);
  heap.set_succ(pred, succ);
  if succ != NONE {
    heap.set_pred(succ, pred);
  }
}

/// Searches the lists for a block of at least `asize` bytes under `policy`.
///
/// Scanning starts at the class responsible for `asize` and continues through
/// every larger class; first-fit returns as soon as any block fits, while
/// best/worst-fit weigh every candidate across the remaining classes.
pub(crate) fn find_fit<B: HeapBackend, I: FreeIndex>(
  heap: &RawHeap<B>,
  index: &I,
  asize: u32,
  policy: Placement,
) -> Option<u32> {
  let mut candidate: Option<(u32, u32)> = None;

  for class in index.class_of(asize)..index.class_count() {
    let mut bp = index.root(heap, class);

    while bp != NONE {
      let size = heap.block_size(bp);

      if size >= asize {
        match policy {
          Placement::FirstFit => return Some(bp),
          Placement::BestFit => {
            if candidate.is_none_or(|(_, held)| size < held) {
              candidate = Some((bp, size));
            }
          }
          Placement::WorstFit => {
            if candidate.is_none_or(|(_, held)| size > held) {
              candidate = Some((bp, size));
            }
          }
        }
      }
      bp = heap.succ(bp);
    }
  }

  candidate.map(|(bp, _)| bp)
}

/// Validates every list: only free blocks, filed under the right class,
/// back links mirroring forward links, no sharing and no cycles. Returns the
/// set of listed blocks so a heap walk can cross-check membership.
pub(crate) fn check_lists<B: HeapBackend, I: FreeIndex>(
  heap: &RawHeap<B>,
  index: &I,
) -> std::collections::HashSet<u32> {
  let mut listed = std::collections::HashSet::new();

  for class in 0..index.class_count() {
    let mut bp = index.root(heap, class);
    let mut hops = 0;

    if bp != NONE {
      assert_eq!(heap.pred(bp), NONE, "list head has a predecessor");
    }
    while bp != NONE {
      assert!(!heap.is_alloc(bp), "allocated block on a free list");
      assert_eq!(
        index.class_of(heap.block_size(bp)),
        class,
        "free block filed under the wrong class"
      );
      assert!(listed.insert(bp), "block linked into a list twice");

      let succ = heap.succ(bp);
      if succ != NONE {
        assert_eq!(heap.pred(succ), bp, "broken back link");
      }
      bp = succ;

      hops += 1;
      assert!(hops <= heap.len() / MIN_BLOCK, "free list cycle");
    }
  }
  listed
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_class_boundaries() {
    let classes = SizeClasses;

    assert_eq!(classes.class_of(16), 0);
    assert_eq!(classes.class_of(17), 1);
    assert_eq!(classes.class_of(32), 1);
    assert_eq!(classes.class_of(33), 2);
    assert_eq!(classes.class_of(64), 2);
    assert_eq!(classes.class_of(4096), 8);
    assert_eq!(classes.class_of(16 << 19), 19);

    // anything past the last class boundary still lands in the last class
    assert_eq!(classes.class_of((16 << 19) + 8), 19);
    assert_eq!(classes.class_of(u32::MAX & !0x7), 19);
  }

  #[test]
  fn test_single_list_is_one_class() {
    let mut single = SingleList::default();

    assert_eq!(single.class_count(), 1);
    assert_eq!(single.class_of(16), 0);
    assert_eq!(single.class_of(1 << 20), 0);

    // the root lives in the handle, not in heap words
    let mut heap = RawHeap::new(crate::backend::MemoryPool::new(64));
    assert_eq!(heap.extend(16), Some(0));
    single.set_root(&mut heap, 0, 24);
    assert_eq!(single.root(&heap, 0), 24);
  }
}
