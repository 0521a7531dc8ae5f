use std::io;

use thiserror::Error;

/// Failures reported by a [`HeapProvider`](crate::HeapProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("cannot grow the heap by {requested} bytes, only {available} left")]
  OutOfMemory { requested: usize, available: usize },

  #[error("sbrk failed")]
  Sbrk(#[source] io::Error),

  #[error("program break moved underneath the heap: expected {expected:#x}, found {found:#x}")]
  NonContiguous { expected: usize, found: usize },
}

/// Why an allocation or resize produced no address.
#[derive(Debug, Error)]
pub enum AllocError {
  #[error("zero-byte allocation request")]
  ZeroSize,

  #[error("request for {requested} bytes exceeds what the heap can address")]
  TooLarge { requested: usize },

  #[error("heap exhausted")]
  Exhausted(#[from] ProviderError),
}

/// A violated heap invariant, found by [`Heap::check`](crate::Heap::check).
///
/// Offsets are relative to the start of the heap region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
  #[error("prologue block is damaged")]
  BadPrologue,

  #[error("block walk ended at {offset:#x} without reaching the epilogue of a {len}-byte heap")]
  BadEpilogue { offset: u32, len: usize },

  #[error("block {block:#x} runs past the end of the heap")]
  OutOfBounds { block: u32 },

  #[error("block {block:#x} is misaligned")]
  Misaligned { block: u32 },

  #[error("block {block:#x} has invalid size {size}")]
  BadSize { block: u32, size: u32 },

  #[error("block {block:#x} header {header:#x} does not match footer {footer:#x}")]
  TagMismatch { block: u32, header: u32, footer: u32 },

  #[error("adjacent free blocks {block:#x} and {next:#x} escaped coalescing")]
  Uncoalesced { block: u32, next: u32 },

  #[error("block {block:#x} in free list {bucket} but marked allocated")]
  AllocatedInFreeList { block: u32, bucket: usize },

  #[error("free list {bucket} links to {block:#x}, which is not a block")]
  NotABlock { block: u32, bucket: usize },

  #[error("block {block:#x} of {size} bytes is filed under list {bucket} instead of {expected}")]
  WrongBucket {
    block: u32,
    size: u32,
    bucket: usize,
    expected: usize,
  },

  #[error("free list {bucket} is out of descending size order at {block:#x}")]
  OutOfOrder { block: u32, bucket: usize },

  #[error("free list {bucket} has a broken back link at {block:#x}")]
  BrokenLink { block: u32, bucket: usize },

  #[error("{listed} blocks are listed but the heap holds {walked} listable free blocks")]
  CountMismatch { listed: usize, walked: usize },

  #[error("search cursor {block:#x} does not name a block")]
  StaleCursor { block: u32 },
}
