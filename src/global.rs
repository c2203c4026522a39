//! A process-wide allocator over the program break.
//!
//! The free functions forward to [`GLOBAL`]. [`Global`] forwards to it as
//! well, so the same instance can back Rust's own allocations:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOC: rmemalloc::Global = rmemalloc::Global;
//! ```
//!
//! Only one allocator should own the program break. Anything else that calls
//! `brk`/`sbrk` in the same process can invalidate the block list.

use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::NonNull,
};

use crate::{
  allocator::Allocator,
  block::BlockInfo,
  source::{HeapSource, Sbrk},
};

/// The default instance behind the free functions of this module.
pub static GLOBAL: Allocator<Sbrk> = Allocator::new(Sbrk::new());

/// Handle implementing [`GlobalAlloc`] on top of [`GLOBAL`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Global;

unsafe impl GlobalAlloc for Global {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    unsafe { GLOBAL.alloc(layout) }
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    unsafe { GLOBAL.alloc_zeroed(layout) }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
  ) {
    unsafe { GLOBAL.dealloc(ptr, layout) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    unsafe { GLOBAL.realloc(ptr, layout, new_size) }
  }
}

pub fn allocate(size: usize) -> Option<NonNull<u8>> {
  GLOBAL.allocate(size)
}

pub fn zero_allocate(
  count: usize,
  size: usize,
) -> Option<NonNull<u8>> {
  GLOBAL.zero_allocate(count, size)
}

/// # Safety
///
/// See [`Allocator::release`].
pub unsafe fn release(ptr: Option<NonNull<u8>>) {
  unsafe { GLOBAL.release(ptr) }
}

/// # Safety
///
/// See [`Allocator::resize`].
pub unsafe fn resize(
  ptr: Option<NonNull<u8>>,
  size: usize,
) -> Option<NonNull<u8>> {
  unsafe { GLOBAL.resize(ptr, size) }
}

pub fn dump_blocks() -> Vec<BlockInfo> {
  GLOBAL.dump_blocks()
}

pub fn print_blocks() {
  GLOBAL.print_blocks()
}

/// Current program break, as reported by `sbrk(0)`.
pub fn program_break() -> Option<NonNull<u8>> {
  Sbrk::new().boundary().ok()
}

#[cfg(test)]
mod tests {
  use test_log::test;

  use super::*;

  // The only test touching the real program break; every other test runs on
  // a private `Region`.
  #[test]
  #[ignore = "moves the real program break, which the system allocator may share"]
  fn program_break_round_trip() {
    let a = allocate(48).unwrap();
    let b = zero_allocate(6, 8).unwrap();

    unsafe {
      a.as_ptr().write_bytes(0x42, 48);
      assert!(std::slice::from_raw_parts(b.as_ptr(), 48).iter().all(|&x| x == 0));
    }

    let live: Vec<_> = dump_blocks()
      .into_iter()
      .filter(|block| !block.is_free)
      .map(|block| block.payload())
      .collect();
    assert!(live.contains(&a.as_ptr().addr()));
    assert!(live.contains(&b.as_ptr().addr()));

    let a = unsafe { resize(Some(a), 4096) }.unwrap();
    unsafe {
      assert!(std::slice::from_raw_parts(a.as_ptr(), 48).iter().all(|&x| x == 0x42));
      release(Some(b));
      release(Some(a));
      release(None);
    }

    unsafe {
      let layout = Layout::new::<[u32; 8]>();
      let words = Global.alloc_zeroed(layout);
      assert!(!words.is_null());
      Global.dealloc(words, layout);
    }

    assert!(program_break().is_some());
    assert!(dump_blocks().iter().all(|block| block.is_free));
  }
}
