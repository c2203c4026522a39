use std::ptr::{self, NonNull};

use crate::{
  align,
  align::padding_for,
  block::{BlockRef, HEADER_ALIGN, HEADER_SIZE},
  config::{CoalescePolicy, Config, TrimPolicy},
  error::{AllocError, AllocResult, ExtendError},
  source::HeapSource,
};

/// Where the block behind an allocation came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
  /// A free block was found by the first-fit scan.
  Reused,
  /// The heap grew by `bytes`.
  Grew { bytes: usize },
}

/// What a release did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Released {
  /// Null pointer.
  Ignored,
  /// The block ended at the break and `bytes` went back to the heap source.
  Trimmed { bytes: usize },
  /// The block stayed in the list, marked free.
  Freed { absorbed: usize, trimmed: usize },
}

/// Outcome of a resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resized {
  /// No previous block, behaved as an allocation.
  Allocated(NonNull<u8>, Placement),
  /// The block already covers the new size.
  InPlace(NonNull<u8>),
  /// Contents were copied into a new block and the old one released.
  Moved(NonNull<u8>, Placement),
}

impl Resized {
  pub fn ptr(self) -> NonNull<u8> {
    match self {
      Self::Allocated(ptr, _) | Self::InPlace(ptr) | Self::Moved(ptr, _) => ptr,
    }
  }
}

/// Address-ordered list of every block carved from a heap source.
///
/// ```text
///   head                                             tail          break
///    │                                                 │              │
///    ▼                                                 ▼              ▼
///   ┌────────┬──────────┬────────┬──────────┬────────┬──────────┐
///   │ header │ payload  │ header │ payload  │ header │ payload  │
///   └────────┴──────────┴────────┴──────────┴────────┴──────────┘
/// ```
///
/// Blocks are only created at the break and only leave the list when they
/// are trimmed off the end of the heap or absorbed by a free predecessor.
pub(crate) struct Arena<S> {
  head: Option<BlockRef>,
  tail: Option<BlockRef>,
  source: S,
  config: Config,
}

// SAFETY: every header reachable from `head` lives in memory owned by
// `source`, so moving the arena moves ownership of all of it.
unsafe impl<S: Send> Send for Arena<S> {}

impl<S: HeapSource> Arena<S> {
  pub const fn new(
    source: S,
    config: Config,
  ) -> Self {
    Self {
      head: None,
      tail: None,
      source,
      config,
    }
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn head(&self) -> Option<BlockRef> {
    self.head
  }

  #[cfg(test)]
  pub fn tail(&self) -> Option<BlockRef> {
    self.tail
  }

  pub fn blocks(&self) -> Blocks {
    Blocks { current: self.head }
  }

  pub fn len(&self) -> usize {
    self.blocks().count()
  }

  fn find_free_block(
    &self,
    size: usize,
  ) -> Option<BlockRef> {
    self.blocks().find(|block| block.is_free() && block.size() >= size)
  }

  pub fn allocate(
    &mut self,
    size: usize,
  ) -> AllocResult<(NonNull<u8>, Placement)> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    if let Some(block) = self.find_free_block(size) {
      block.set_free(false);
      return Ok((block.payload(), Placement::Reused));
    }

    let (block, bytes) = self.grow(size)?;
    Ok((block.payload(), Placement::Grew { bytes }))
  }

  pub fn zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> AllocResult<(NonNull<u8>, Placement)> {
    if count == 0 || size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let bytes = count
      .checked_mul(size)
      .ok_or(AllocError::Overflow { count, size })?;

    let (payload, placement) = self.allocate(bytes)?;

    // A reused block may be larger than asked for and still hold old data.
    let block = unsafe { BlockRef::from_payload(payload) };
    unsafe { payload.as_ptr().write_bytes(0, block.size()) };

    Ok((payload, placement))
  }

  /// Extends the heap by one block of at least `size` payload bytes and
  /// appends it to the list.
  fn grow(
    &mut self,
    size: usize,
  ) -> AllocResult<(BlockRef, usize)> {
    if size > isize::MAX as usize - HEADER_SIZE - 2 * HEADER_ALIGN {
      return Err(AllocError::TooLarge { size });
    }

    let size = align!(size);
    let total = HEADER_SIZE + size;

    loop {
      let brk = self.source.boundary()?;
      let grant = padding_for(brk.as_ptr().addr()) + total;
      let start = unsafe { self.source.extend(grant as isize)? };

      // The block always runs up to the break, so any slack left by a break
      // that moved after the query ends up in its payload.
      let pad = padding_for(start.as_ptr().addr());
      let block = unsafe {
        BlockRef::write(
          NonNull::new_unchecked(start.as_ptr().add(pad)),
          grant - pad - HEADER_SIZE,
        )
      };
      self.append(block);

      if block.size() >= size {
        return Ok((block, grant));
      }

      // The break moved and the grant came up short. Keep it as a free block
      // and grow again from the new break.
      block.set_free(true);
    }
  }

  fn append(
    &mut self,
    block: BlockRef,
  ) {
    match self.tail {
      Some(tail) => tail.set_next(Some(block)),
      None => self.head = Some(block),
    }
    self.tail = Some(block);
  }

  /// Maps a payload pointer back to its header.
  ///
  /// # Safety
  ///
  /// `payload` must have been handed out by this arena and not released since.
  unsafe fn block_of(
    &self,
    payload: NonNull<u8>,
  ) -> BlockRef {
    let addr = payload.as_ptr().addr();

    debug_assert_eq!(addr % HEADER_ALIGN, 0, "misaligned payload {payload:p}");
    debug_assert!(
      matches!(
        (self.head, self.tail),
        (Some(head), Some(tail)) if addr >= head.payload().as_ptr().addr()
          && addr <= tail.payload().as_ptr().addr()
      ),
      "{payload:p} is not tracked by this allocator"
    );

    unsafe { BlockRef::from_payload(payload) }
  }

  /// Whether `block` is the tail and ends exactly at the current break.
  fn ends_at_break(
    &mut self,
    block: BlockRef,
  ) -> bool {
    self.tail == Some(block)
      && self
        .source
        .boundary()
        .is_ok_and(|brk| brk.as_ptr().addr() == block.end())
  }

  /// # Safety
  ///
  /// `payload` must be null or a live allocation of this arena, and must not
  /// be used again afterwards.
  pub unsafe fn release(
    &mut self,
    payload: Option<NonNull<u8>>,
  ) -> Released {
    let Some(payload) = payload else {
      return Released::Ignored;
    };

    let block = unsafe { self.block_of(payload) };
    debug_assert!(!block.is_free(), "double release of {payload:p}");

    if self.ends_at_break(block) {
      if let Ok(mut bytes) = unsafe { self.pop_tail() } {
        if self.config.trim == TrimPolicy::TrailingRun {
          bytes += self.trim_free_tail();
        }
        return Released::Trimmed { bytes };
      }
      // The heap source would not shrink; keep the block as a free one.
    }

    block.set_free(true);

    let mut absorbed = self.coalesce_forward(block);
    if self.config.coalesce == CoalescePolicy::Bidirectional && self.coalesce_backward(block).is_some() {
      absorbed += 1;
    }

    let trimmed = match self.config.trim {
      TrimPolicy::TrailingBlock => 0,
      TrimPolicy::TrailingRun => self.trim_free_tail(),
    };

    Released::Freed { absorbed, trimmed }
  }

  /// Absorbs every free successor that starts exactly where `block` ends.
  fn coalesce_forward(
    &mut self,
    block: BlockRef,
  ) -> usize {
    let mut absorbed = 0;

    while let Some(next) = block.next() {
      if !next.is_free() || next.addr() != block.end() {
        break;
      }

      block.set_size(block.size() + next.total());
      block.set_next(next.next());
      if self.tail == Some(next) {
        self.tail = Some(block);
      }
      absorbed += 1;
    }

    absorbed
  }

  /// Folds `block` into its predecessor when that one is free and contiguous.
  fn coalesce_backward(
    &mut self,
    block: BlockRef,
  ) -> Option<BlockRef> {
    let previous = self.predecessor(block)?;

    if !previous.is_free() || previous.end() != block.addr() {
      return None;
    }

    previous.set_size(previous.size() + block.total());
    previous.set_next(block.next());
    if self.tail == Some(block) {
      self.tail = Some(previous);
    }

    Some(previous)
  }

  fn predecessor(
    &self,
    block: BlockRef,
  ) -> Option<BlockRef> {
    self.blocks().find(|candidate| candidate.next() == Some(block))
  }

  /// Hands the tail block back to the heap source and unlinks it.
  ///
  /// # Safety
  ///
  /// Nothing may use the tail payload afterwards.
  unsafe fn pop_tail(&mut self) -> Result<usize, ExtendError> {
    let Some(tail) = self.tail else {
      return Ok(0);
    };

    let bytes = tail.total();
    let previous = self.predecessor(tail);

    unsafe { self.source.extend(-(bytes as isize))? };

    match previous {
      Some(previous) => previous.set_next(None),
      None => self.head = None,
    }
    self.tail = previous;

    Ok(bytes)
  }

  /// Returns free blocks sitting at the end of the heap.
  fn trim_free_tail(&mut self) -> usize {
    let mut bytes = 0;

    while let Some(tail) = self.tail {
      if !tail.is_free() || !self.ends_at_break(tail) {
        break;
      }

      match unsafe { self.pop_tail() } {
        Ok(popped) => bytes += popped,
        Err(_) => break,
      }
    }

    bytes
  }

  /// # Safety
  ///
  /// `payload` must be null or a live allocation of this arena. When a new
  /// pointer is returned the old one must not be used again.
  pub unsafe fn resize(
    &mut self,
    payload: Option<NonNull<u8>>,
    size: usize,
  ) -> AllocResult<Resized> {
    let Some(payload) = payload else {
      return self
        .allocate(size)
        .map(|(ptr, placement)| Resized::Allocated(ptr, placement));
    };

    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let block = unsafe { self.block_of(payload) };
    if block.size() >= size {
      return Ok(Resized::InPlace(payload));
    }

    let old_size = block.size();
    let (fresh, placement) = self.allocate(size)?;

    unsafe {
      ptr::copy_nonoverlapping(payload.as_ptr(), fresh.as_ptr(), old_size);
      self.release(Some(payload));
    }

    Ok(Resized::Moved(fresh, placement))
  }
}

/// Walks the list from `head` to `tail`.
pub(crate) struct Blocks {
  current: Option<BlockRef>,
}

impl Iterator for Blocks {
  type Item = BlockRef;

  fn next(&mut self) -> Option<BlockRef> {
    let block = self.current?;
    self.current = block.next();
    Some(block)
  }
}
