use std::{fmt, mem, ptr::NonNull};

use crate::align;

/// Header written in front of every payload carved from the heap.
#[repr(C)]
pub(crate) struct Block {
  pub size: usize,
  pub is_free: bool,
  pub next: Option<BlockRef>,
}

/// Bytes occupied by a header, rounded up so payloads stay word aligned.
pub const HEADER_SIZE: usize = align!(mem::size_of::<Block>());

/// Alignment every payload handed out by the allocator satisfies.
pub const HEADER_ALIGN: usize = mem::align_of::<usize>();

/// Handle to a live header inside an arena.
///
/// A `BlockRef` is only ever built by the arena for a header it wrote itself,
/// so the accessors below may dereference it without further checks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BlockRef(NonNull<Block>);

impl BlockRef {
  /// Writes a fresh header at `at`.
  ///
  /// # Safety
  ///
  /// `at` must be word aligned and point to at least `HEADER_SIZE + size`
  /// writable bytes owned by the arena.
  pub unsafe fn write(
    at: NonNull<u8>,
    size: usize,
  ) -> Self {
    let block = at.cast::<Block>();
    unsafe {
      block.as_ptr().write(Block {
        size,
        is_free: false,
        next: None,
      });
    }
    Self(block)
  }

  /// Recovers the header sitting immediately before `payload`.
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by [`BlockRef::payload`] on a block
  /// that is still tracked.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    let header = unsafe { payload.as_ptr().sub(HEADER_SIZE) };
    Self(unsafe { NonNull::new_unchecked(header.cast::<Block>()) })
  }

  pub fn payload(self) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(self.0.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
  }

  pub fn addr(self) -> usize {
    self.0.as_ptr().addr()
  }

  /// Header plus payload.
  pub fn total(self) -> usize {
    HEADER_SIZE + self.size()
  }

  /// First address past the payload.
  pub fn end(self) -> usize {
    self.addr() + self.total()
  }

  pub fn size(self) -> usize {
    unsafe { (*self.0.as_ptr()).size }
  }

  pub fn set_size(
    self,
    size: usize,
  ) {
    unsafe { (*self.0.as_ptr()).size = size }
  }

  pub fn is_free(self) -> bool {
    unsafe { (*self.0.as_ptr()).is_free }
  }

  pub fn set_free(
    self,
    is_free: bool,
  ) {
    unsafe { (*self.0.as_ptr()).is_free = is_free }
  }

  pub fn next(self) -> Option<BlockRef> {
    unsafe { (*self.0.as_ptr()).next }
  }

  pub fn set_next(
    self,
    next: Option<BlockRef>,
  ) {
    unsafe { (*self.0.as_ptr()).next = next }
  }

  pub fn info(self) -> BlockInfo {
    BlockInfo {
      address: self.addr(),
      size: self.size(),
      is_free: self.is_free(),
      next: self.next().map(BlockRef::addr),
    }
  }
}

/// Snapshot of one tracked block, as produced by `dump_blocks`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  /// Address of the block header.
  pub address: usize,
  /// Usable payload bytes.
  pub size: usize,
  pub is_free: bool,
  /// Header address of the list successor.
  pub next: Option<usize>,
}

impl BlockInfo {
  /// Address handed out to the caller for this block.
  pub fn payload(&self) -> usize {
    self.address + HEADER_SIZE
  }

  /// First address past the payload.
  pub fn end(&self) -> usize {
    self.payload() + self.size
  }
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "addr = {:#x}, size = {}, is_free={}, next={:#x}",
      self.address,
      self.size,
      self.is_free,
      self.next.unwrap_or(0)
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_is_word_aligned() {
    assert_eq!(HEADER_SIZE % HEADER_ALIGN, 0);
    assert!(HEADER_SIZE >= mem::size_of::<Block>());
  }

  #[test]
  fn payload_round_trips_to_header() {
    let mut backing = [0usize; 16];
    let at = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();

    unsafe {
      let block = BlockRef::write(at, 32);
      let payload = block.payload();

      assert_eq!(payload.as_ptr().addr(), at.as_ptr().addr() + HEADER_SIZE);
      assert_eq!(BlockRef::from_payload(payload), block);
      assert_eq!(block.end(), payload.as_ptr().addr() + 32);
      assert!(!block.is_free());
      assert_eq!(block.next(), None);
    }
  }

  #[test]
  fn display_matches_debug_listing() {
    let info = BlockInfo {
      address: 0x1000,
      size: 16,
      is_free: true,
      next: None,
    };

    assert_eq!(info.to_string(), "addr = 0x1000, size = 16, is_free=true, next=0x0");
    assert_eq!(info.end(), 0x1000 + HEADER_SIZE + 16);
  }
}
