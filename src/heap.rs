use std::ptr::{self, NonNull};

use crate::{
  align,
  block::{BlockRef, MAX_HEAP_SIZE, MIN_BLOCK_SIZE, OVERHEAD, PREAMBLE_SIZE, Region},
  coalesce::coalesce,
  config::HeapConfig,
  error::{AllocError, ProviderError},
  free_list::{FreeIndex, SegregatedLists},
  provider::HeapProvider,
};

/// A block as seen from outside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address.
  pub address: NonNull<u8>,
  /// Total size, tags included.
  pub size: usize,
  pub allocated: bool,
}

/// Totals gathered by walking every block of the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_size: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

/// A boundary-tagged heap over memory obtained from a [`HeapProvider`].
///
/// The free blocks are tracked by `I`, by default [`SegregatedLists`].
/// All state lives in the instance, so any number of independent heaps can
/// coexist; none of them may be shared between threads.
pub struct Heap<P: HeapProvider, I: FreeIndex = SegregatedLists> {
  provider: P,
  region: Region,
  index: I,
  config: HeapConfig,
}

impl<P: HeapProvider> Heap<P> {
  /// Creates a heap with segregated free lists and the default configuration.
  pub fn new(provider: P) -> Result<Self, AllocError> {
    Self::with_config(provider, HeapConfig::default())
  }
}

impl<P: HeapProvider, I: FreeIndex> Heap<P, I> {
  /// Initializes the provider, lays down the prologue and the epilogue and
  /// grows the heap by one chunk.
  pub fn with_config(
    mut provider: P,
    config: HeapConfig,
  ) -> Result<Self, AllocError> {
    let base = provider.init()?;

    let mut heap = Self {
      provider,
      region: Region::new(base),
      index: I::default(),
      config,
    };

    heap.grow(PREAMBLE_SIZE)?;
    heap.region.write_preamble();
    heap.extend_heap(config.chunk())?;

    log::debug!("heap initialized at {base:p} with {} bytes", heap.region.len());
    heap.after_mutation("init");
    Ok(heap)
  }

  pub const fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub const fn provider(&self) -> &P {
    &self.provider
  }

  pub const fn index(&self) -> &I {
    &self.index
  }

  pub(crate) const fn region(&self) -> &Region {
    &self.region
  }

  /// Bytes obtained from the provider so far.
  pub const fn heap_size(&self) -> usize {
    self.region.len()
  }

  /// Allocates a block with room for at least `size` bytes, aligned to
  /// [`ALIGNMENT`](crate::ALIGNMENT).
  ///
  /// Grows the heap when no free block fits. Fails on zero-byte requests and
  /// when the provider cannot supply more memory; the heap is left unchanged
  /// in both cases.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let adjusted = adjusted_size(size)?;

    let block = match self.index.find_fit(&self.region, adjusted) {
      Some(block) => block,
      None => self.extend_heap((adjusted as usize).max(self.config.chunk()))?,
    };
    self.place(block, adjusted);

    log::trace!("allocate({size}) -> block {:#x} of {} bytes", block.offset(), self.region.size(block));
    self.after_mutation("allocate");
    Ok(self.region.as_ptr(block))
  }

  /// Returns the block at `ptr` to the heap, merging it with free neighbors.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by [`allocate`](Self::allocate) or
  /// [`resize`](Self::resize) on this heap and not been freed since.
  pub unsafe fn free(
    &mut self,
    ptr: NonNull<u8>,
  ) {
    let block = self.region.block_of(ptr);
    let size = self.region.size(block);

    self.region.write_tags(block, size, false);
    self.index.insert(&mut self.region, block, size);
    let merged = coalesce(&mut self.region, &mut self.index, block);

    log::trace!("free({:#x}) -> free block {:#x}", block.offset(), merged.offset());
    self.after_mutation("free");
  }

  /// Resizes the block at `ptr` to hold at least `new_size` bytes.
  ///
  /// `None` behaves like [`allocate`](Self::allocate) and a zero `new_size`
  /// like [`free`](Self::free), yielding no address. Shrinking always happens
  /// in place. Growing absorbs a free or epilogue successor when possible,
  /// extending the heap if the block sits at its end, and otherwise moves the
  /// payload to a new block. On failure the original block is untouched.
  ///
  /// # Safety
  ///
  /// `ptr`, if given, must satisfy the requirements of [`free`](Self::free).
  /// The old address must not be used once the call succeeds.
  pub unsafe fn resize(
    &mut self,
    ptr: Option<NonNull<u8>>,
    new_size: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    let Some(ptr) = ptr else {
      return self.allocate(new_size).map(Some);
    };

    if new_size == 0 {
      unsafe { self.free(ptr) };
      return Ok(None);
    }

    let adjusted = adjusted_size(new_size)?;
    let block = self.region.block_of(ptr);
    let size = self.region.size(block);

    if adjusted <= size {
      self.carve(block, adjusted, size);
    } else if !self.grow_in_place(block, adjusted)? {
      return unsafe { self.relocate(ptr, size, new_size) }.map(Some);
    }

    log::trace!("resize({:#x}, {new_size}) in place", block.offset());
    self.after_mutation("resize");
    Ok(Some(ptr))
  }

  /// Moves the `size`-byte block at `ptr` into a fresh allocation of
  /// `new_size` bytes and frees it.
  unsafe fn relocate(
    &mut self,
    ptr: NonNull<u8>,
    size: u32,
    new_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let moved = self.allocate(new_size)?;
    let count = (size as usize - OVERHEAD).min(new_size);
    unsafe {
      ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), count);
      self.free(ptr);
    }

    log::trace!("resize moved {ptr:p} to {moved:p}");
    Ok(moved)
  }

  /// Number of payload bytes the block at `ptr` can hold.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live allocation of this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    let block = self.region.block_of(ptr);
    self.region.size(block) as usize - OVERHEAD
  }

  /// Walks every block between the prologue and the epilogue.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.region.blocks().map(|(block, tag)| BlockInfo {
      address: self.region.as_ptr(block),
      size: tag.size() as usize,
      allocated: tag.is_allocated(),
    })
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        heap_size: self.heap_size(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        if block.allocated {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += block.size;
        } else {
          stats.free_blocks += 1;
          stats.free_bytes += block.size;
          stats.largest_free = stats.largest_free.max(block.size);
        }
        stats
      },
    )
  }

  /// Asks the provider for `bytes` more bytes and appends them to the region.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<(), AllocError> {
    if self.region.len().saturating_add(bytes) > MAX_HEAP_SIZE {
      return Err(AllocError::TooLarge { requested: bytes });
    }

    let old_end = self.provider.extend(bytes).inspect_err(|err| {
      log::warn!("heap provider refused {bytes} more bytes: {err}");
    })?;

    let expected = self.region.end();
    if old_end != expected {
      return Err(
        ProviderError::NonContiguous {
          expected: expected.as_ptr().addr(),
          found: old_end.as_ptr().addr(),
        }
        .into(),
      );
    }

    self.region.grow(bytes);
    Ok(())
  }

  /// Grows the heap by at least `bytes`, turning the new space into a free
  /// block merged with a free block that ended the heap.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Result<BlockRef, AllocError> {
    let size = align!(bytes.max(MIN_BLOCK_SIZE));

    // the old epilogue header becomes the header of the new block
    let block = self.region.epilogue();
    self.grow(size)?;

    self.region.write_tags(block, size as u32, false);
    self.region.write_epilogue();
    self.index.insert(&mut self.region, block, size as u32);

    log::debug!("extended heap by {size} bytes to {}", self.region.len());
    Ok(coalesce(&mut self.region, &mut self.index, block))
  }

  /// Allocates `adjusted` bytes out of the free block `block`.
  fn place(
    &mut self,
    block: BlockRef,
    adjusted: u32,
  ) {
    let size = self.region.size(block);
    debug_assert!(size >= adjusted, "placing {adjusted} bytes in a {size}-byte block");

    self.index.remove(&mut self.region, block);
    self.carve(block, adjusted, size);
  }

  /// Marks `block`, which spans `total` bytes and is in no free list,
  /// allocated at `size` bytes. A remainder of at least one minimum block is
  /// split off and freed; anything smaller stays inside the allocation.
  fn carve(
    &mut self,
    block: BlockRef,
    size: u32,
    total: u32,
  ) {
    let remainder = total - size;
    if (remainder as usize) < MIN_BLOCK_SIZE {
      self.region.write_tags(block, total, true);
      return;
    }

    self.region.write_tags(block, size, true);
    let tail = self.region.next(block);
    self.region.write_tags(tail, remainder, false);
    self.index.insert(&mut self.region, tail, remainder);
    coalesce(&mut self.region, &mut self.index, tail);
  }

  /// Grows allocated `block` to `adjusted` bytes without moving it, by
  /// absorbing its successor if that is free, extending the heap first if
  /// `block` is last. Returns whether it succeeded.
  fn grow_in_place(
    &mut self,
    block: BlockRef,
    adjusted: u32,
  ) -> Result<bool, AllocError> {
    let size = self.region.size(block);
    let mut next = self.region.next(block);
    let mut tag = self.region.header(next);

    let is_epilogue = tag.size() == 0;
    if tag.is_allocated() && !is_epilogue {
      return Ok(false);
    }

    let mut available = size + tag.size();
    if available < adjusted {
      let is_last = is_epilogue || self.region.header(self.region.next(next)).size() == 0;
      if !is_last {
        return Ok(false);
      }

      let shortfall = (adjusted - available) as usize;
      self.extend_heap(shortfall.max(self.config.chunk()))?;

      next = self.region.next(block);
      tag = self.region.header(next);
      available = size + tag.size();
    }

    self.index.remove(&mut self.region, next);
    self.carve(block, adjusted, available);
    Ok(true)
  }

  fn after_mutation(
    &self,
    operation: &str,
  ) {
    if !self.config.checks_invariants() {
      return;
    }
    if let Err(err) = self.check() {
      log::error!("heap consistency check failed after {operation}: {err}");
    }
  }
}

/// Block size needed for a `size`-byte payload: tags added, rounded up to the
/// alignment, at least one minimum block.
fn adjusted_size(size: usize) -> Result<u32, AllocError> {
  size
    .checked_add(OVERHEAD)
    .filter(|&padded| padded <= MAX_HEAP_SIZE)
    .map(|padded| align!(padded).max(MIN_BLOCK_SIZE) as u32)
    .ok_or(AllocError::TooLarge { requested: size })
}
