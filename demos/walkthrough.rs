use std::{io::Read, ptr::NonNull};

use rmemalloc::{
  Global,
  global::{self, program_break},
};

// Everything in this process, std included, allocates from the same block
// list, so nothing else moves the program break behind its back.
#[global_allocator]
static ALLOC: Global = Global;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    program_break(),
  );
}

fn print_alloc(
  size: usize,
  ptr: NonNull<u8>,
) {
  println!("Allocated {} bytes, address = {:p}, program break = {:?}", size, ptr, program_break());
}

fn main() {
  env_logger::init();

  print_program_break("start");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Two small blocks, carved one after the other at the break.
  // --------------------------------------------------------------------
  let first = global::allocate(16).expect("program break can grow");
  print_alloc(16, first);
  let second = global::allocate(32).expect("program break can grow");
  print_alloc(32, second);

  unsafe { first.as_ptr().cast::<u32>().write(0xDEADBEEF) };
  println!("\n[1] Two blocks on the list:");
  global::print_blocks();
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Release the first block. It is not at the break, so it stays on the
  //    list marked free, and a smaller request reuses it without splitting.
  // --------------------------------------------------------------------
  unsafe { global::release(Some(first)) };
  let third = global::allocate(10).expect("free block is reused");
  println!("\n[2] third == first? {}", third == first);
  global::print_blocks();
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Zeroed array, then grow it past its block so resize has to move it.
  // --------------------------------------------------------------------
  let words = global::zero_allocate(8, 8).expect("program break can grow");
  print_alloc(64, words);
  let words = unsafe { global::resize(Some(words), 64 * 1024) }.expect("program break can grow");
  println!("\n[3] Resized to 64 KiB at {:p}", words);
  print_program_break("after resize");
  global::print_blocks();
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) The resized block ends at the break, so releasing it shrinks the heap.
  // --------------------------------------------------------------------
  unsafe { global::release(Some(words)) };
  print_program_break("after release");
  global::print_blocks();
  block_until_enter_pressed();

  unsafe {
    global::release(Some(second));
    global::release(Some(third));
  }
  println!("\n[5] End of walkthrough.");
  global::print_blocks();
}
