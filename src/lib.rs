//! # rmalloc - Boundary-Tag and Buddy Heap Allocators
//!
//! This crate implements a user-space dynamic memory allocator over a single
//! contiguous byte region supplied by a host backend, in three escalating
//! designs sharing one skeleton:
//!
//! ```text
//!   ┌─────────────────────┬───────────────────────────┬──────────────────────┐
//!   │ ExplicitAllocator   │ SegregatedAllocator       │ BuddyAllocator       │
//!   ├─────────────────────┼───────────────────────────┼──────────────────────┤
//!   │ one free list       │ 20 lists by size class    │ 20 lists, sizes 2^k  │
//!   │ header + footer     │ header + footer           │ header only          │
//!   │ first/best/worst    │ first/best/worst          │ first-fit            │
//!   │ split remainder     │ split remainder           │ halve to fit         │
//!   │ boundary-tag merge  │ boundary-tag merge        │ XOR-buddy merge      │
//!   └─────────────────────┴───────────────────────────┴──────────────────────┘
//! ```
//!
//! ## Heap Layout
//!
//! Each allocator owns one forward-growing region and carves it into blocks:
//!
//! ```text
//!                 the managed region (grows right via HeapBackend::extend)
//!
//!   ┌─────┬──────────┬─────────┬─────────┬── ... ──┬─────────┬──────────┐
//!   │ pad │ prologue │  block  │  block  │         │  block  │ epilogue │
//!   └─────┴──────────┴─────────┴─────────┴── ... ──┴─────────┴──────────┘
//!          allocated                                           size 0,
//!          sentinel                                            allocated
//!
//!   every block:                          free blocks additionally:
//!
//!   ┌────────┬──────────────┬────────┐    ┌────────┬──────┬──────┬─ ─ ┐
//!   │ header │   payload    │ footer │    │ header │ pred │ succ │
//!   └────────┴──────────────┴────────┘    └────────┴──────┴──────┴─ ─ ┘
//!    size|a                  mirror        links thread the free lists
//! ```
//!
//! Headers pack a size (always a multiple of 8, so the low 3 bits are free)
//! with an allocation bit. Payload pointers handed to callers are 8-byte
//! aligned; the minimum block is 16 bytes. Freed blocks are merged eagerly
//! (with their address neighbors under boundary tags, with their computed
//! buddies in the buddy design) and reused LIFO.
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── align      - alignment macros (align!, align_to!)
//!   ├── backend    - HeapBackend trait, MemoryPool, SystemBreak
//!   ├── heap       - RawHeap word/block primitives (internal)
//!   ├── freelist   - free-list roots, LIFO insert/remove, fit search
//!   ├── policy     - Placement (first/best/worst-fit)
//!   ├── boundary   - ExplicitAllocator, SegregatedAllocator
//!   └── buddy      - BuddyAllocator
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rmalloc::{MemoryPool, Placement, SegregatedAllocator};
//!
//! let mut allocator = SegregatedAllocator::new(MemoryPool::new(1 << 20), Placement::BestFit)
//!   .expect("backend too small for the initial chunk");
//!
//! unsafe {
//!   let p = allocator.allocate(256);
//!   assert!(!p.is_null());
//!   p.write_bytes(0x42, 256);
//!
//!   let p = allocator.reallocate(p, 512);
//!   assert!(!p.is_null());
//!
//!   allocator.free(p);
//! }
//! ```
//!
//! ## Failure Model
//!
//! Two failures exist, both reported as "none": a fallible constructor
//! returns `None` when the backend cannot seed the heap, and
//! `allocate`/`reallocate` return null when it cannot grow. Nothing panics,
//! nothing retries, and a refused operation leaves the heap untouched.
//! Freeing a pointer twice, or one the allocator never produced, is
//! undefined behavior, the usual `malloc` bargain.
//!
//! ## Safety
//!
//! The allocators hand out raw pointers into memory they manage, so the
//! mutating entry points are `unsafe fn`: the compiler cannot check that a
//! freed pointer really came from the same allocator, nor that the backend's
//! region is not being grown by someone else (a real concern for
//! [`SystemBreak`], which shares the program break with the whole process).

pub mod align;
mod backend;
mod boundary;
mod buddy;
mod freelist;
mod heap;
mod policy;

pub use backend::{HeapBackend, MemoryPool, SystemBreak};
pub use boundary::{BoundaryTagAllocator, ExplicitAllocator, SegregatedAllocator};
pub use buddy::BuddyAllocator;
pub use freelist::{FreeIndex, SingleList, SizeClasses};
pub use policy::Placement;
