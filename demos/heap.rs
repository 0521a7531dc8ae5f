use std::{io::Read, ptr::NonNull};

use segalloc::{Heap, SbrkProvider};

/// Waits until the user presses ENTER when the demo runs with `--step`.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn pause(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

/// Prints the current program break.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    SbrkProvider::program_break(),
  );
}

fn print_alloc(
  heap: &Heap<SbrkProvider>,
  requested: usize,
  ptr: NonNull<u8>,
) {
  let usable = unsafe { heap.usable_size(ptr) };
  println!(
    "  requested = {:>6} B, usable = {:>6} B, address = {:p}, addr % 8 = {}",
    requested,
    usable,
    ptr,
    ptr.as_ptr().addr() % segalloc::ALIGNMENT,
  );
}

fn print_blocks(heap: &Heap<SbrkProvider>) {
  println!("  heap: {} bytes", heap.heap_size());
  for block in heap.blocks() {
    println!(
      "    {:p} {:>6} B {}",
      block.address,
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();
  let step = std::env::args().any(|arg| arg == "--step");

  print_program_break("start");
  let mut heap = Heap::new(SbrkProvider::new())?;
  print_program_break("after init");
  print_blocks(&heap);
  pause(step);

  // --------------------------------------------------------------------
  // 1) A few small allocations of odd sizes.
  // --------------------------------------------------------------------
  println!("\n[1] Allocate 4, 12 and 32 bytes");
  let first = heap.allocate(4)?;
  print_alloc(&heap, 4, first);
  let second = heap.allocate(12)?;
  print_alloc(&heap, 12, second);
  let third = heap.allocate(32)?;
  print_alloc(&heap, 32, third);

  unsafe {
    first.cast::<u32>().write(0xDEADBEEF);
    second.as_ptr().write_bytes(0xAB, 12);
    println!("[1] Value written to first = 0x{:X}", first.cast::<u32>().read());
  }
  print_blocks(&heap);
  pause(step);

  // --------------------------------------------------------------------
  // 2) Free the middle block and allocate something that fits in it.
  // --------------------------------------------------------------------
  unsafe { heap.free(second) };
  println!("\n[2] Freed second block at {second:p}");
  let reused = heap.allocate(2)?;
  print_alloc(&heap, 2, reused);
  println!(
    "[2] reused == second? {}",
    if reused == second {
      "Yes, the freed block was reused"
    } else {
      "No, it was placed somewhere else"
    }
  );
  pause(step);

  // --------------------------------------------------------------------
  // 3) A large allocation grows the heap and moves the program break.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let big = heap.allocate(64 * 1024)?;
  println!("\n[3] Allocate 64 KiB");
  print_alloc(&heap, 64 * 1024, big);
  print_program_break("after large alloc");
  pause(step);

  // --------------------------------------------------------------------
  // 4) Resize: the third block grows into the space after it if it can.
  // --------------------------------------------------------------------
  let resized = unsafe { heap.resize(Some(third), 256)? };
  if let Some(resized) = resized {
    println!("\n[4] Resize third block to 256 bytes");
    print_alloc(&heap, 256, resized);
    println!("[4] moved? {}", resized != third);
  }
  pause(step);

  // --------------------------------------------------------------------
  // 5) Free everything; the heap collapses back into one free block.
  // --------------------------------------------------------------------
  unsafe {
    heap.free(first);
    heap.free(reused);
    heap.free(big);
    heap.resize(resized, 0)?;
  }
  println!("\n[5] Freed everything");
  print_blocks(&heap);

  let stats = heap.stats();
  println!("[5] {stats:?}");
  heap.check()?;
  println!("[5] heap is consistent");

  Ok(())
}
