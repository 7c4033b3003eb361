use std::ptr;

use rmalloc::{
  BuddyAllocator, ExplicitAllocator, MemoryPool, Placement, SegregatedAllocator,
};

/// Walks all three allocator designs over a bounded in-process region,
/// dumping the block table after each interesting step. Run with:
///
/// ```text
/// cargo run --example walkthrough
/// ```
fn main() {
  explicit_walkthrough();
  segregated_walkthrough();
  buddy_walkthrough();
}

fn explicit_walkthrough() {
  println!("==== explicit free list, best-fit ====\n");

  let mut allocator = ExplicitAllocator::new(MemoryPool::new(1 << 20), Placement::BestFit)
    .expect("pool large enough for the initial chunk");

  unsafe {
    // --------------------------------------------------------------------
    // 1) Three allocations carve the seeded 4096-byte chunk from the left.
    // --------------------------------------------------------------------
    let a = allocator.allocate(100);
    let b = allocator.allocate(100);
    let c = allocator.allocate(100);
    println!("[1] after allocate(100) x 3:");
    allocator.dump();

    // --------------------------------------------------------------------
    // 2) Freeing the outer two leaves a hole on each side of `b`.
    // --------------------------------------------------------------------
    allocator.free(a);
    allocator.free(c);
    println!("\n[2] after free(a) and free(c):");
    allocator.dump();

    // --------------------------------------------------------------------
    // 3) Freeing `b` merges through both holes back into one block.
    // --------------------------------------------------------------------
    allocator.free(b);
    println!("\n[3] after free(b), everything coalesced:");
    allocator.dump();

    // --------------------------------------------------------------------
    // 4) Payloads survive a move: reallocate into a larger block.
    // --------------------------------------------------------------------
    let p = allocator.allocate(40);
    ptr::write_bytes(p, 0xAB, 40);
    let q = allocator.allocate(40);
    let r = allocator.reallocate(p, 2000);
    println!(
      "\n[4] reallocate moved the payload: {:?} -> {:?}, first byte = {:#x}",
      p,
      r,
      r.read(),
    );
    allocator.free(q);
    allocator.free(r);
  }
}

fn segregated_walkthrough() {
  println!("\n==== segregated fit, first-fit over size classes ====\n");

  let mut allocator = SegregatedAllocator::new(MemoryPool::new(1 << 20), Placement::FirstFit)
    .expect("pool large enough for the initial chunk");

  unsafe {
    // A spread of sizes lands in different size classes.
    let small = allocator.allocate(24);
    let medium = allocator.allocate(500);
    let large = allocator.allocate(3000);
    println!("[1] small / medium / large allocations:");
    allocator.dump();

    allocator.free(small);
    allocator.free(medium);
    allocator.free(large);
    println!("\n[2] all returned and coalesced:");
    allocator.dump();

    // The class search makes even a first-fit walk skip hopeless lists.
    let exact = allocator.allocate(120);
    println!("\n[3] allocate(120) pulled from the matching class:");
    allocator.dump();
    allocator.free(exact);
  }
}

fn buddy_walkthrough() {
  println!("\n==== segregated buddy system ====\n");

  let mut allocator =
    BuddyAllocator::new(MemoryPool::new(1 << 20)).expect("pool large enough for the initial chunk");

  unsafe {
    // --------------------------------------------------------------------
    // 1) A 1-byte request still takes a 16-byte block, splitting the
    //    4096-byte chunk level by level and freeing every right buddy.
    // --------------------------------------------------------------------
    let a = allocator.allocate(1);
    println!("[1] after allocate(1), one free buddy per level:");
    allocator.dump();

    // --------------------------------------------------------------------
    // 2) A second tiny allocation reuses the 16-byte buddy directly.
    // --------------------------------------------------------------------
    let b = allocator.allocate(1);
    println!("\n[2] after a second allocate(1):");
    allocator.dump();

    // --------------------------------------------------------------------
    // 3) Freeing both fuses buddies all the way back to 4096 bytes.
    // --------------------------------------------------------------------
    allocator.free(a);
    allocator.free(b);
    println!("\n[3] after freeing both, the chunk is whole again:");
    allocator.dump();
  }
}
