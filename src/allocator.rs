use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use log::{debug, trace};

use crate::{
  arena::{Arena, Placement, Released, Resized},
  block::{BlockInfo, BlockRef, HEADER_ALIGN},
  config::Config,
  error::{AllocError, AllocResult},
  source::HeapSource,
};

/// A first-fit block-list allocator over one [`HeapSource`], guarded by one lock.
///
/// Every operation takes the lock for its whole duration, including any call
/// into the heap source, so concurrent callers are serialized in lock order.
///
/// The inherent methods log through the `log` facade once the lock has been
/// dropped. The [`GlobalAlloc`] implementation never logs, since a logger that
/// allocates would otherwise re-enter the allocator.
pub struct Allocator<S> {
  arena: spin::Mutex<Arena<S>>,
}

impl<S: HeapSource> Allocator<S> {
  /// Creates an allocator with the default policies.
  pub const fn new(source: S) -> Self {
    Self::with_config(source, Config::new())
  }

  pub const fn with_config(
    source: S,
    config: Config,
  ) -> Self {
    Self {
      arena: spin::Mutex::new(Arena::new(source, config)),
    }
  }

  /// Returns a pointer to at least `size` bytes, or `None` when `size` is
  /// zero or the heap cannot grow.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    self.try_allocate(size).ok()
  }

  pub fn try_allocate(
    &self,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    let result = self.arena.lock().allocate(size);
    log_allocation("allocate", size, &result);
    result.map(|(ptr, _)| ptr)
  }

  /// Allocates `count * size` zeroed bytes.
  pub fn zero_allocate(
    &self,
    count: usize,
    size: usize,
  ) -> Option<NonNull<u8>> {
    self.try_zero_allocate(count, size).ok()
  }

  pub fn try_zero_allocate(
    &self,
    count: usize,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    let result = self.arena.lock().zero_allocate(count, size);
    log_allocation("zero_allocate", count.saturating_mul(size), &result);
    result.map(|(ptr, _)| ptr)
  }

  /// Gives a block back. `None` is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by this allocator and not released since.
  /// It must not be used after this call.
  pub unsafe fn release(
    &self,
    ptr: Option<NonNull<u8>>,
  ) {
    let released = unsafe { self.arena.lock().release(ptr) };

    match released {
      Released::Ignored => trace!("release(null) ignored"),
      Released::Trimmed { bytes } => debug!("release({ptr:?}) returned {bytes} bytes to the heap source"),
      Released::Freed { absorbed, trimmed } => {
        trace!("release({ptr:?}) freed in place, absorbed {absorbed} neighbours");
        if trimmed > 0 {
          debug!("release({ptr:?}) trimmed {trimmed} bytes off the heap");
        }
      }
    }
  }

  /// Grows a block to at least `size` bytes, moving it when it is too small.
  ///
  /// A null `ptr` behaves as [`allocate`](Self::allocate). A zero `size`
  /// returns `None` and leaves `ptr` allocated. When the move fails the old
  /// block is left untouched.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live allocation of this allocator. When a
  /// different pointer is returned the old one must not be used again.
  pub unsafe fn resize(
    &self,
    ptr: Option<NonNull<u8>>,
    size: usize,
  ) -> Option<NonNull<u8>> {
    unsafe { self.try_resize(ptr, size) }.ok()
  }

  /// # Safety
  ///
  /// Same contract as [`resize`](Self::resize).
  pub unsafe fn try_resize(
    &self,
    ptr: Option<NonNull<u8>>,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    let result = unsafe { self.arena.lock().resize(ptr, size) };

    match &result {
      Ok(Resized::Allocated(fresh, placement)) => log_placement("resize", size, *fresh, *placement),
      Ok(Resized::InPlace(_)) => trace!("resize({ptr:?}, {size}) fits in place"),
      Ok(Resized::Moved(fresh, placement)) => {
        trace!("resize({ptr:?}, {size}) moved to {fresh:p}");
        log_placement("resize", size, *fresh, *placement);
      }
      Err(err) => debug!("resize({ptr:?}, {size}) failed: {err}"),
    }

    result.map(Resized::ptr)
  }

  /// Snapshot of every tracked block in address order.
  pub fn dump_blocks(&self) -> Vec<BlockInfo> {
    loop {
      // The vector is sized outside the lock; pushing within capacity never
      // calls back into an allocator. The extra slot covers the vector's own
      // block when this allocator is also the global one.
      let len = self.len();
      let mut blocks = Vec::with_capacity(len + 1);

      let arena = self.arena.lock();
      if arena.len() > blocks.capacity() {
        continue;
      }

      blocks.extend(arena.blocks().map(BlockRef::info));
      return blocks;
    }
  }

  /// Prints the block list to stdout.
  pub fn print_blocks(&self) {
    let blocks = self.dump_blocks();

    println!(
      "head = {:#x}, tail = {:#x}",
      blocks.first().map_or(0, |b| b.address),
      blocks.last().map_or(0, |b| b.address)
    );
    for block in &blocks {
      println!("{block}");
    }
  }

  /// Number of tracked blocks, free or not.
  pub fn len(&self) -> usize {
    self.arena.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.arena.lock().head().is_none()
  }

  /// Runs `f` with the heap source while holding the lock.
  pub fn with_source<R>(
    &self,
    f: impl FnOnce(&S) -> R,
  ) -> R {
    f(self.arena.lock().source())
  }
}

fn log_allocation(
  op: &str,
  size: usize,
  result: &AllocResult<(NonNull<u8>, Placement)>,
) {
  match result {
    Ok((ptr, placement)) => log_placement(op, size, *ptr, *placement),
    Err(AllocError::ZeroSize) => trace!("{op}({size}) zero-sized, nothing allocated"),
    Err(err) => debug!("{op}({size}) failed: {err}"),
  }
}

fn log_placement(
  op: &str,
  size: usize,
  ptr: NonNull<u8>,
  placement: Placement,
) {
  match placement {
    Placement::Reused => trace!("{op}({size}) reused free block at {ptr:p}"),
    Placement::Grew { bytes } => debug!("{op}({size}) grew the heap by {bytes} bytes, block at {ptr:p}"),
  }
}

unsafe impl<S: HeapSource> GlobalAlloc for Allocator<S> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if check_layout(layout).is_err() {
      return ptr::null_mut();
    }

    self
      .arena
      .lock()
      .allocate(layout.size())
      .map_or(ptr::null_mut(), |(ptr, _)| ptr.as_ptr())
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if check_layout(layout).is_err() {
      return ptr::null_mut();
    }

    self
      .arena
      .lock()
      .zero_allocate(1, layout.size())
      .map_or(ptr::null_mut(), |(ptr, _)| ptr.as_ptr())
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { self.arena.lock().release(NonNull::new(ptr)) };
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if check_layout(layout).is_err() {
      return ptr::null_mut();
    }

    unsafe { self.arena.lock().resize(NonNull::new(ptr), new_size) }
      .map_or(ptr::null_mut(), |resized| resized.ptr().as_ptr())
  }
}

/// Rejects layouts the allocator cannot honour.
pub(crate) fn check_layout(layout: Layout) -> AllocResult<()> {
  if layout.align() > HEADER_ALIGN {
    return Err(AllocError::Alignment {
      align: layout.align(),
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, thread};

  use test_log::test;

  use super::*;
  use crate::{
    block::HEADER_SIZE,
    config::{CoalescePolicy, TrimPolicy},
    source::{Region, testing::Counting},
  };

  fn allocator() -> Allocator<Counting> {
    Allocator::new(Counting::new(1 << 20))
  }

  fn assert_disjoint(blocks: &[BlockInfo]) {
    for pair in blocks.windows(2) {
      assert!(pair[0].address < pair[1].address);
      assert!(pair[0].end() <= pair[1].address);
    }
  }

  #[test]
  fn first_fit_scenario() {
    let heap = allocator();

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(32).unwrap();
    assert!(b > a);

    unsafe { heap.release(Some(a)) };

    let c = heap.allocate(10).unwrap();
    assert_eq!(c, a);

    let blocks = heap.dump_blocks();
    assert_eq!(blocks[0].size, 16);
    assert!(!blocks[0].is_free);
  }

  #[test]
  fn trailing_release_scenarios() {
    let heap = allocator();

    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(8).unwrap();
    assert_eq!(a.as_ptr().addr() + 8 + HEADER_SIZE, b.as_ptr().addr());

    unsafe {
      heap.release(Some(a));
      heap.release(Some(b));
    }
    let blocks = heap.dump_blocks();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_free);

    let heap = allocator();
    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(8).unwrap();

    unsafe {
      heap.release(Some(b));
      heap.release(Some(a));
    }
    assert!(heap.is_empty());
    assert_eq!(heap.with_source(|source| source.region().used()), 0);
  }

  #[test]
  fn zero_allocate_overflow_never_grows() {
    let heap = allocator();

    assert_eq!(
      heap.try_zero_allocate(usize::MAX, 2),
      Err(AllocError::Overflow {
        count: usize::MAX,
        size: 2,
      })
    );
    assert_eq!(heap.zero_allocate(0, 4), None);
    assert_eq!(heap.zero_allocate(4, 0), None);
    assert_eq!(heap.with_source(Counting::moves), 0);
  }

  #[test]
  fn zero_allocate_zeroes_region() {
    let heap = allocator();

    let dirty = heap.allocate(256).unwrap();
    let _fence = heap.allocate(8).unwrap();
    unsafe {
      dirty.as_ptr().write_bytes(0x5A, 256);
      heap.release(Some(dirty));
    }

    let zeroed = heap.zero_allocate(16, 16).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(zeroed.as_ptr(), 256) };
    assert!(bytes.iter().all(|&b| b == 0));
  }

  #[test]
  fn zero_size_is_not_an_error_for_callers() {
    let heap = allocator();

    assert_eq!(heap.allocate(0), None);
    assert_eq!(heap.try_allocate(0), Err(AllocError::ZeroSize));
    unsafe { heap.release(None) };
    assert!(heap.is_empty());
  }

  #[test]
  fn exhausted_allocator_reports_none() {
    let heap = Allocator::new(Region::new(4096).unwrap());
    let capacity = heap.with_source(Region::capacity);

    assert!(heap.allocate(capacity).is_none());
    assert!(matches!(heap.try_allocate(capacity), Err(AllocError::Exhausted(_))));
    assert!(heap.is_empty());
  }

  #[test]
  fn resize_contract() {
    let heap = allocator();

    let fresh = unsafe { heap.resize(None, 32) }.unwrap();
    assert_eq!(unsafe { heap.resize(Some(fresh), 16) }, Some(fresh));
    assert_eq!(unsafe { heap.resize(Some(fresh), 0) }, None);

    unsafe { fresh.as_ptr().write_bytes(0x11, 32) };
    let _fence = heap.allocate(8).unwrap();

    let moved = unsafe { heap.resize(Some(fresh), 128) }.unwrap();
    assert_ne!(moved, fresh);
    let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), 32) };
    assert!(bytes.iter().all(|&b| b == 0x11));

    let blocks = heap.dump_blocks();
    assert_eq!(blocks.len(), 3);
    assert!(blocks[0].is_free);
  }

  #[test]
  fn policies_flow_through_config() {
    let heap = Allocator::with_config(
      Counting::new(1 << 16),
      Config::new()
        .coalesce(CoalescePolicy::Bidirectional)
        .trim(TrimPolicy::TrailingRun),
    );

    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(8).unwrap();
    let c = heap.allocate(8).unwrap();

    unsafe {
      heap.release(Some(a));
      heap.release(Some(b));
    }
    assert_eq!(heap.len(), 2);

    unsafe { heap.release(Some(c)) };
    assert!(heap.is_empty());
  }

  #[test]
  fn global_alloc_interface() {
    let heap = allocator();

    unsafe {
      let layout = Layout::array::<u64>(4).unwrap();
      let ptr = heap.alloc(layout).cast::<u64>();
      assert!(!ptr.is_null());
      for i in 0..4 {
        ptr.add(i).write(i as u64 * 3);
      }

      let grown = heap.realloc(ptr.cast(), layout, 64).cast::<u64>();
      assert!(!grown.is_null());
      for i in 0..4 {
        assert_eq!(grown.add(i).read(), i as u64 * 3);
      }

      let zeroed = heap.alloc_zeroed(Layout::new::<[u8; 40]>());
      assert!(std::slice::from_raw_parts(zeroed, 40).iter().all(|&b| b == 0));

      let too_aligned = Layout::from_size_align(64, 4096).unwrap();
      assert!(heap.alloc(too_aligned).is_null());
      assert_eq!(
        check_layout(too_aligned),
        Err(AllocError::Alignment { align: 4096 })
      );

      heap.dealloc(zeroed, Layout::new::<[u8; 40]>());
      heap.dealloc(grown.cast(), Layout::from_size_align(64, 8).unwrap());
    }

    assert!(heap.dump_blocks().iter().all(|b| b.is_free));
  }

  #[test]
  fn concurrent_callers_never_share_bytes() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let heap = Arc::new(Allocator::new(Region::new(8 << 20).unwrap()));

    let workers: Vec<_> = (0..THREADS)
      .map(|id| {
        let heap = Arc::clone(&heap);
        thread::spawn(move || {
          let mut live = Vec::new();

          for round in 0..ROUNDS {
            let size = 8 + (id * 37 + round * 13) % 200;
            let tag = (id * 31 + round) as u8;

            let ptr = heap.allocate(size).expect("heap has room");
            unsafe { ptr.as_ptr().write_bytes(tag, size) };
            live.push((ptr.as_ptr().addr(), size, tag));

            if round % 3 == 2 {
              let (addr, size, tag) = live.remove(round % live.len());
              let ptr = NonNull::new(addr as *mut u8).unwrap();
              let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
              assert!(bytes.iter().all(|&b| b == tag), "block at {addr:#x} was clobbered");
              unsafe { heap.release(Some(ptr)) };
            }
          }

          live
        })
      })
      .collect();

    let mut survivors = Vec::new();
    for worker in workers {
      survivors.extend(worker.join().unwrap());
    }

    for &(addr, size, tag) in &survivors {
      let bytes = unsafe { std::slice::from_raw_parts(addr as *const u8, size) };
      assert!(bytes.iter().all(|&b| b == tag), "block at {addr:#x} was clobbered");
    }

    let blocks = heap.dump_blocks();
    assert_disjoint(&blocks);
    assert_eq!(blocks.iter().filter(|b| !b.is_free).count(), survivors.len());

    for (addr, _, _) in survivors {
      unsafe { heap.release(NonNull::new(addr as *mut u8)) };
    }
    assert!(heap.dump_blocks().iter().all(|b| b.is_free));
  }
}
