//! Segregated free lists.
//!
//! Free blocks are filed into [`BUCKET_COUNT`] lists by size class, class `k`
//! holding sizes in `[2^k, 2^(k+1))` and the last class everything above.
//! Each list is doubly linked through the free blocks' own payloads and kept in
//! descending size order, its head being the largest block of the class:
//!
//! ```text
//!   heads[5]  ──► ┌────┐ next ┌────┐ next ┌────┐
//!                 │ 56 │ ───► │ 48 │ ───► │ 40 │ ───► none
//!        none ◄── └────┘ ◄─── └────┘ ◄─── └────┘
//!                   prev        prev        prev
//! ```

use std::collections::BTreeSet;

use crate::{
  block::{BlockRef, MIN_BLOCK_SIZE, Region},
  error::CheckError,
};

/// Number of size classes.
pub const BUCKET_COUNT: usize = 20;

/// Bookkeeping of the free blocks a [`Heap`](crate::Heap) can hand out.
///
/// The heap calls [`insert`](Self::insert) for every block that becomes free
/// (after its tags are written) and [`remove`](Self::remove) for every free
/// block it is about to allocate, merge or absorb (before its tags change).
pub trait FreeIndex: Default {
  fn insert(
    &mut self,
    region: &mut Region,
    block: BlockRef,
    size: u32,
  );

  fn remove(
    &mut self,
    region: &mut Region,
    block: BlockRef,
  );

  /// Finds a free block of at least `size` bytes.
  fn find_fit(
    &mut self,
    region: &Region,
    size: u32,
  ) -> Option<BlockRef>;

  /// Verifies the index against the heap. Only called once the block walk
  /// itself has been found consistent.
  fn check(
    &self,
    region: &Region,
  ) -> Result<(), CheckError>;
}

/// Size-classed, size-ordered free lists.
#[derive(Debug, Clone, Default)]
pub struct SegregatedLists {
  heads: [Option<BlockRef>; BUCKET_COUNT],
}

impl SegregatedLists {
  pub const fn new() -> Self {
    Self {
      heads: [None; BUCKET_COUNT],
    }
  }

  /// The size class of a block of `size` bytes.
  pub fn classify(size: u32) -> usize {
    let mut size = size;
    let mut bucket = 0;

    while bucket < BUCKET_COUNT - 1 && size > 1 {
      size >>= 1;
      bucket += 1;
    }

    bucket
  }

  /// Minimum-sized blocks are never listed: they cannot be split, and a
  /// request they could serve is served just as well by any larger block.
  pub const fn is_listed(size: u32) -> bool {
    size as usize > MIN_BLOCK_SIZE
  }

  /// The largest block of class `bucket`.
  pub fn head(
    &self,
    bucket: usize,
  ) -> Option<BlockRef> {
    self.heads[bucket]
  }

  /// Walks the list of class `bucket` from its largest block down.
  pub fn bucket<'a>(
    &self,
    region: &'a Region,
    bucket: usize,
  ) -> impl Iterator<Item = BlockRef> + 'a {
    let mut cursor = self.heads[bucket];
    std::iter::from_fn(move || {
      let block = cursor?;
      cursor = region.next_link(block);
      Some(block)
    })
  }

  /// Searches class `start` and every larger class for a block of at least
  /// `size` bytes, taking the smallest such block of the first class that has
  /// one.
  pub fn first_fit(
    &self,
    region: &Region,
    start: usize,
    size: u32,
  ) -> Option<BlockRef> {
    for bucket in start..BUCKET_COUNT {
      let fit = self
        .bucket(region, bucket)
        .take_while(|&block| region.size(block) >= size)
        .last();
      if fit.is_some() {
        return fit;
      }
    }

    None
  }

  /// Total number of listed blocks.
  pub fn len(
    &self,
    region: &Region,
  ) -> usize {
    (0..BUCKET_COUNT).map(|bucket| self.bucket(region, bucket).count()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.heads.iter().all(Option::is_none)
  }
}

impl FreeIndex for SegregatedLists {
  fn insert(
    &mut self,
    region: &mut Region,
    block: BlockRef,
    size: u32,
  ) {
    if !Self::is_listed(size) {
      return;
    }

    let bucket = Self::classify(size);

    // find the first entry no larger than `block`
    let mut prev = None;
    let mut cursor = self.heads[bucket];
    while let Some(current) = cursor {
      if region.size(current) <= size {
        break;
      }
      prev = Some(current);
      cursor = region.next_link(current);
    }

    region.set_prev_link(block, prev);
    region.set_next_link(block, cursor);

    if let Some(next) = cursor {
      region.set_prev_link(next, Some(block));
    }

    match prev {
      Some(prev) => region.set_next_link(prev, Some(block)),
      None => self.heads[bucket] = Some(block),
    }
  }

  fn remove(
    &mut self,
    region: &mut Region,
    block: BlockRef,
  ) {
    let size = region.size(block);
    if !Self::is_listed(size) {
      return;
    }

    let prev = region.prev_link(block);
    let next = region.next_link(block);

    match prev {
      Some(prev) => region.set_next_link(prev, next),
      None => self.heads[Self::classify(size)] = next,
    }

    if let Some(next) = next {
      region.set_prev_link(next, prev);
    }
  }

  fn find_fit(
    &mut self,
    region: &Region,
    size: u32,
  ) -> Option<BlockRef> {
    self.first_fit(region, Self::classify(size), size)
  }

  fn check(
    &self,
    region: &Region,
  ) -> Result<(), CheckError> {
    let blocks: BTreeSet<_> = region.blocks().map(|(block, _)| block).collect();
    let mut listed = 0;

    for (bucket, &head) in self.heads.iter().enumerate() {
      let mut prev: Option<(BlockRef, u32)> = None;
      let mut cursor = head;

      while let Some(block) = cursor {
        let offset = block.offset();

        if !region.contains(block) || !blocks.contains(&block) {
          return Err(CheckError::NotABlock { block: offset, bucket });
        }

        let tag = region.header(block);
        if tag.is_allocated() {
          return Err(CheckError::AllocatedInFreeList { block: offset, bucket });
        }
        if !Self::is_listed(tag.size()) {
          return Err(CheckError::BadSize {
            block: offset,
            size: tag.size(),
          });
        }

        let expected = Self::classify(tag.size());
        if expected != bucket {
          return Err(CheckError::WrongBucket {
            block: offset,
            size: tag.size(),
            bucket,
            expected,
          });
        }

        if region.prev_link(block) != prev.map(|(prev, _)| prev) {
          return Err(CheckError::BrokenLink { block: offset, bucket });
        }
        if prev.is_some_and(|(_, prev_size)| prev_size < tag.size()) {
          return Err(CheckError::OutOfOrder { block: offset, bucket });
        }

        listed += 1;
        if listed > blocks.len() {
          return Err(CheckError::BrokenLink { block: offset, bucket });
        }

        prev = Some((block, tag.size()));
        cursor = region.next_link(block);
      }
    }

    let walked = region
      .blocks()
      .filter(|(_, tag)| !tag.is_allocated() && Self::is_listed(tag.size()))
      .count();
    if listed != walked {
      return Err(CheckError::CountMismatch { listed, walked });
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::Scratch;

  fn sizes(
    lists: &SegregatedLists,
    region: &Region,
    bucket: usize,
  ) -> Vec<u32> {
    lists.bucket(region, bucket).map(|block| region.size(block)).collect()
  }

  #[test]
  fn test_classify() {
    assert_eq!(SegregatedLists::classify(16), 4);
    assert_eq!(SegregatedLists::classify(24), 4);
    assert_eq!(SegregatedLists::classify(31), 4);
    assert_eq!(SegregatedLists::classify(32), 5);
    assert_eq!(SegregatedLists::classify(4096), 12);
    assert_eq!(SegregatedLists::classify(1 << 19), 19);
    assert_eq!(SegregatedLists::classify(u32::MAX), BUCKET_COUNT - 1);
  }

  #[test]
  fn test_insert_keeps_descending_order() {
    let mut scratch = Scratch::new(&[(24, false), (16, true), (48, false), (16, true), (40, false), (16, true), (56, false)]);
    let small = scratch.block(0);
    let blocks = [scratch.block(2), scratch.block(4), scratch.block(6)];
    let region = &mut scratch.region;
    let mut lists = SegregatedLists::new();

    lists.insert(region, small, 24);
    for block in blocks {
      let size = region.size(block);
      lists.insert(region, block, size);
    }

    assert_eq!(sizes(&lists, region, 4), [24]);
    assert_eq!(sizes(&lists, region, 5), [56, 48, 40]);
    assert_eq!(lists.head(5), Some(blocks[2]));
    assert_eq!(lists.len(region), 4);
    assert_eq!(lists.check(region), Ok(()));
  }

  #[test]
  fn test_minimum_blocks_are_not_listed() {
    let mut scratch = Scratch::new(&[(16, false), (16, true)]);
    let block = scratch.block(0);
    let mut lists = SegregatedLists::new();

    lists.insert(&mut scratch.region, block, 16);
    assert!(lists.is_empty());

    // removing an unlisted block leaves the lists alone
    lists.remove(&mut scratch.region, block);
    assert!(lists.is_empty());
    assert_eq!(lists.check(&scratch.region), Ok(()));
  }

  #[test]
  fn test_remove_from_every_position() {
    let mut scratch = Scratch::new(&[(40, false), (16, true), (48, false), (16, true), (56, false), (16, true)]);
    let [small, middle, large] = [scratch.block(0), scratch.block(2), scratch.block(4)];
    let region = &mut scratch.region;
    let mut lists = SegregatedLists::new();
    for block in [small, middle, large] {
      let size = region.size(block);
      lists.insert(region, block, size);
    }

    lists.remove(region, middle);
    assert_eq!(sizes(&lists, region, 5), [56, 40]);
    assert_eq!(region.prev_link(small), Some(large));

    lists.remove(region, large);
    assert_eq!(sizes(&lists, region, 5), [40]);
    assert_eq!(lists.head(5), Some(small));
    assert_eq!(region.prev_link(small), None);

    lists.remove(region, small);
    assert!(lists.is_empty());
  }

  #[test]
  fn test_first_fit_takes_tightest_block_of_first_class() {
    let mut scratch = Scratch::new(&[(56, false), (16, true), (40, false), (16, true), (200, false), (16, true)]);
    let blocks = [scratch.block(0), scratch.block(2), scratch.block(4)];
    let region = &mut scratch.region;
    let mut lists = SegregatedLists::new();
    for block in blocks {
      let size = region.size(block);
      lists.insert(region, block, size);
    }

    assert_eq!(lists.find_fit(region, 40), Some(blocks[1]));
    assert_eq!(lists.find_fit(region, 48), Some(blocks[0]));
    // nothing in class 5 is big enough, so the search moves up a class
    assert_eq!(lists.find_fit(region, 64), Some(blocks[2]));
    assert_eq!(lists.find_fit(region, 24), Some(blocks[1]));
    assert_eq!(lists.find_fit(region, 256), None);
  }

  #[test]
  fn test_check_flags_allocated_member() {
    let mut scratch = Scratch::new(&[(32, false), (16, true)]);
    let block = scratch.block(0);
    let mut lists = SegregatedLists::new();
    lists.insert(&mut scratch.region, block, 32);

    scratch.region.write_tags(block, 32, true);

    assert_eq!(
      lists.check(&scratch.region),
      Err(CheckError::AllocatedInFreeList {
        block: block.offset(),
        bucket: 5
      })
    );
  }

  #[test]
  fn test_check_flags_unlisted_free_block() {
    let scratch = Scratch::new(&[(32, false), (16, true)]);
    let lists = SegregatedLists::new();

    assert_eq!(
      lists.check(&scratch.region),
      Err(CheckError::CountMismatch { listed: 0, walked: 1 })
    );
  }
}
