/// Rounds `value` up to the machine word, the natural alignment of block headers.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use rmemalloc::align;
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + ::core::mem::size_of::<usize>() - 1) & !(::core::mem::size_of::<usize>() - 1)
  };
}

/// Distance from `addr` to the next word boundary.
pub(crate) fn padding_for(addr: usize) -> usize {
  align!(addr) - addr
}
