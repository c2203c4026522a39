/// Which free neighbours a released block merges with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoalescePolicy {
  /// Absorb free, contiguous successors only.
  #[default]
  Forward,
  /// Also fold the released block into a free, contiguous predecessor.
  ///
  /// Finding the predecessor walks the list from `head`.
  Bidirectional,
}

/// How much of the end of the heap a release hands back to the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrimPolicy {
  /// Only a released block that ends at the break is returned.
  #[default]
  TrailingBlock,
  /// After every release, all free blocks at the end of the heap are returned.
  TrailingRun,
}

/// Allocator policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
  pub coalesce: CoalescePolicy,
  pub trim: TrimPolicy,
}

impl Config {
  pub const fn new() -> Self {
    Self {
      coalesce: CoalescePolicy::Forward,
      trim: TrimPolicy::TrailingBlock,
    }
  }

  pub const fn coalesce(
    mut self,
    policy: CoalescePolicy,
  ) -> Self {
    self.coalesce = policy;
    self
  }

  pub const fn trim(
    mut self,
    policy: TrimPolicy,
  ) -> Self {
    self.trim = policy;
    self
  }
}
