//! Error types for the allocator and its heap sources.

use thiserror::Error;

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Why an operation produced no allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
  /// A size, count or element size of zero.
  #[error("zero-sized request")]
  ZeroSize,

  /// `count * size` does not fit in `usize`.
  #[error("{count} elements of {size} bytes overflow usize")]
  Overflow { count: usize, size: usize },

  /// The request plus its header cannot be expressed as a break delta.
  #[error("request of {size} bytes is too large")]
  TooLarge { size: usize },

  /// Alignment stricter than the header alignment was requested.
  #[error("alignment {align} is not supported")]
  Alignment { align: usize },

  /// The heap source refused to grow.
  #[error("heap exhausted: {0}")]
  Exhausted(#[from] ExtendError),
}

/// Failure reported by a [`HeapSource`](crate::HeapSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtendError {
  /// The platform call failed.
  #[error("platform refused to move the break (errno {errno})")]
  Refused { errno: i32 },

  /// A region has no room left for the requested growth.
  #[error("region full: requested {requested} bytes, {available} available")]
  OutOfRegion { requested: usize, available: usize },

  /// A shrink would move the break below the start of the region.
  #[error("cannot shrink by {requested} bytes, only {available} in use")]
  Underflow { requested: usize, available: usize },
}

impl ExtendError {
  /// Captures `errno` after a failed libc call.
  pub(crate) fn last_os_error() -> Self {
    Self::Refused {
      errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exhausted_wraps_source_error() {
    let err: AllocError = ExtendError::OutOfRegion {
      requested: 64,
      available: 8,
    }
    .into();

    assert!(matches!(err, AllocError::Exhausted(ExtendError::OutOfRegion { .. })));
    assert_eq!(
      err.to_string(),
      "heap exhausted: region full: requested 64 bytes, 8 available"
    );
  }

  #[test]
  fn overflow_message_names_operands() {
    let err = AllocError::Overflow {
      count: usize::MAX,
      size: 2,
    };

    assert_eq!(err.to_string(), format!("{} elements of 2 bytes overflow usize", usize::MAX));
  }
}
