use crate::{
  align,
  block::{MAX_HEAP_SIZE, MIN_BLOCK_SIZE},
};

/// Default number of bytes the heap grows by when no free block fits.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Tunables of a [`Heap`](crate::Heap).
///
/// ```rust
/// use segalloc::HeapConfig;
///
/// let config = HeapConfig::new().chunk_size(64 * 1024).check_invariants(true);
/// assert_eq!(config.chunk(), 64 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  chunk_size: usize,
  check_invariants: bool,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapConfig {
  /// 4 KiB chunks, with the consistency checker running after every mutating
  /// call in debug builds.
  pub const fn new() -> Self {
    Self {
      chunk_size: CHUNK_SIZE,
      check_invariants: cfg!(debug_assertions),
    }
  }

  /// Sets the minimum number of bytes requested from the provider at a time.
  pub const fn chunk_size(
    mut self,
    bytes: usize,
  ) -> Self {
    self.chunk_size = bytes;
    self
  }

  /// Runs [`Heap::check`](crate::Heap::check) after every init, allocate,
  /// free and resize, logging any violation.
  pub const fn check_invariants(
    mut self,
    enabled: bool,
  ) -> Self {
    self.check_invariants = enabled;
    self
  }

  /// The effective chunk size: at least one minimum block, 8-byte aligned.
  pub fn chunk(&self) -> usize {
    align!(self.chunk_size.clamp(MIN_BLOCK_SIZE, MAX_HEAP_SIZE))
  }

  pub const fn checks_invariants(&self) -> bool {
    self.check_invariants
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = HeapConfig::default();

    assert_eq!(config.chunk(), CHUNK_SIZE);
    assert_eq!(config.checks_invariants(), cfg!(debug_assertions));
  }

  #[test]
  fn test_chunk_is_clamped_and_aligned() {
    assert_eq!(HeapConfig::new().chunk_size(0).chunk(), MIN_BLOCK_SIZE);
    assert_eq!(HeapConfig::new().chunk_size(1001).chunk(), 1008);
    assert_eq!(HeapConfig::new().chunk_size(usize::MAX).chunk(), MAX_HEAP_SIZE);
  }
}
