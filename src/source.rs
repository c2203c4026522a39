//! Heap-extension primitives.
//!
//! A [`HeapSource`] owns a contiguous range of address space whose upper
//! boundary (the break) can be moved up and down, exactly like `sbrk(2)`.

use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t};

use crate::error::ExtendError;

/// Moves the upper boundary of a contiguous heap.
pub trait HeapSource {
  /// Moves the break by `delta` bytes and returns the previous break.
  ///
  /// A positive `delta` grows the heap and the returned address is the start
  /// of the new memory. A negative `delta` hands memory back. Zero only
  /// reports the current break.
  ///
  /// # Safety
  ///
  /// When shrinking, the caller must no longer use any byte above the new break.
  unsafe fn extend(
    &mut self,
    delta: isize,
  ) -> Result<NonNull<u8>, ExtendError>;

  /// Current break.
  fn boundary(&mut self) -> Result<NonNull<u8>, ExtendError> {
    // A zero delta never releases memory.
    unsafe { self.extend(0) }
  }
}

/// The process program break, moved with `sbrk(2)`.
///
/// The break is shared with anything else in the process that calls `brk` or
/// `sbrk`. Nothing here can stop such a party from moving it between two calls.
#[derive(Debug, Default)]
pub struct Sbrk {
  _private: (),
}

impl Sbrk {
  pub const fn new() -> Self {
    Self { _private: () }
  }
}

impl HeapSource for Sbrk {
  unsafe fn extend(
    &mut self,
    delta: isize,
  ) -> Result<NonNull<u8>, ExtendError> {
    let previous = unsafe { libc::sbrk(delta as intptr_t) };

    if previous == usize::MAX as *mut c_void {
      return Err(ExtendError::last_os_error());
    }

    NonNull::new(previous.cast::<u8>()).ok_or(ExtendError::Refused { errno: 0 })
  }
}

/// A private heap reserved up front with `mmap(2)`.
///
/// The break starts at the base of the reservation and may never pass its
/// capacity. Pages released by a shrink are handed back to the kernel with
/// `madvise(MADV_DONTNEED)`; the reservation itself is unmapped on drop.
#[derive(Debug)]
pub struct Region {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

// SAFETY: the region exclusively owns its mapping.
unsafe impl Send for Region {}

impl Region {
  /// Reserves `capacity` bytes, rounded up to whole pages.
  pub fn new(capacity: usize) -> Result<Self, ExtendError> {
    let page = page_size();
    let capacity = capacity.max(1).div_ceil(page) * page;

    let base = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if base == libc::MAP_FAILED {
      return Err(ExtendError::last_os_error());
    }

    let base = NonNull::new(base.cast::<u8>()).ok_or(ExtendError::Refused { errno: 0 })?;

    Ok(Self {
      base,
      capacity,
      brk: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes currently below the break.
  pub fn used(&self) -> usize {
    self.brk
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  fn release_pages(
    &self,
    from: usize,
    to: usize,
  ) {
    let page = page_size();
    let start = from.div_ceil(page) * page;
    let end = to.div_ceil(page) * page;

    if end > start {
      // Failure only means the pages stay resident.
      unsafe {
        libc::madvise(
          self.base.as_ptr().add(start).cast::<c_void>(),
          end - start,
          libc::MADV_DONTNEED,
        );
      }
    }
  }
}

impl HeapSource for Region {
  unsafe fn extend(
    &mut self,
    delta: isize,
  ) -> Result<NonNull<u8>, ExtendError> {
    let previous = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };

    if delta >= 0 {
      let requested = delta.unsigned_abs();
      let available = self.capacity - self.brk;

      if requested > available {
        return Err(ExtendError::OutOfRegion {
          requested,
          available,
        });
      }

      self.brk += requested;
    } else {
      let requested = delta.unsigned_abs();

      if requested > self.brk {
        return Err(ExtendError::Underflow {
          requested,
          available: self.brk,
        });
      }

      let old = self.brk;
      self.brk -= requested;
      self.release_pages(self.brk, old);
    }

    Ok(previous)
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base.as_ptr().cast::<c_void>(), self.capacity);
    }
  }
}

fn page_size() -> usize {
  match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
    size if size > 0 => size as usize,
    _ => 4096,
  }
}
