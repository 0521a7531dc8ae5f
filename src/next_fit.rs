//! Next-fit search over the implicit block list.
//!
//! Keeps no lists at all: free blocks are found by walking the heap block by
//! block, resuming where the previous search left off and wrapping around to
//! the first block once the epilogue is reached.

use crate::{
  block::{BlockRef, Region, Tag},
  error::CheckError,
  free_list::FreeIndex,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct NextFit {
  cursor: Option<BlockRef>,
}

impl NextFit {
  pub const fn new() -> Self {
    Self { cursor: None }
  }

  /// The block the next search resumes after, `None` for the start of the
  /// heap.
  pub const fn cursor(&self) -> Option<BlockRef> {
    self.cursor
  }
}

impl FreeIndex for NextFit {
  fn insert(
    &mut self,
    _region: &mut Region,
    block: BlockRef,
    _size: u32,
  ) {
    self.cursor = Some(block);
  }

  /// `block` may be about to disappear into its predecessor, so the cursor
  /// steps back onto the predecessor, which survives either way.
  fn remove(
    &mut self,
    region: &mut Region,
    block: BlockRef,
  ) {
    if self.cursor == Some(block) {
      self.cursor = Some(region.prev(block));
    }
  }

  fn find_fit(
    &mut self,
    region: &Region,
    size: u32,
  ) -> Option<BlockRef> {
    let fits = move |&(_, tag): &(BlockRef, Tag)| !tag.is_allocated() && tag.size() >= size;

    let resume = self.cursor.map_or(region.first_block(), |cursor| region.next(cursor));
    let (block, _) = region.blocks_from(resume).find(fits).or_else(|| {
      region
        .blocks()
        .take_while(|&(block, _)| block < resume)
        .find(fits)
    })?;

    self.cursor = Some(block);
    Some(block)
  }

  fn check(
    &self,
    region: &Region,
  ) -> Result<(), CheckError> {
    match self.cursor {
      Some(cursor) if cursor != region.prologue() && !region.blocks().any(|(block, _)| block == cursor) => {
        Err(CheckError::StaleCursor {
          block: cursor.offset(),
        })
      }
      _ => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::Scratch;

  #[test]
  fn test_resumes_after_cursor() {
    let scratch = Scratch::new(&[(32, false), (16, true), (32, false), (16, true)]);
    let [first, third] = [scratch.block(0), scratch.block(2)];
    let mut index = NextFit::new();

    assert_eq!(index.find_fit(&scratch.region, 24), Some(first));
    assert_eq!(index.find_fit(&scratch.region, 24), Some(third));
    assert_eq!(index.cursor(), Some(third));
  }

  #[test]
  fn test_wraps_around_to_the_start() {
    let scratch = Scratch::new(&[(64, false), (16, true), (32, false), (16, true)]);
    let [first, third] = [scratch.block(0), scratch.block(2)];
    let mut index = NextFit::new();

    assert_eq!(index.find_fit(&scratch.region, 32), Some(first));
    assert_eq!(index.find_fit(&scratch.region, 32), Some(third));
    // only the first block holds 48 bytes; the search has to wrap to reach it
    assert_eq!(index.find_fit(&scratch.region, 48), Some(first));
    assert_eq!(index.find_fit(&scratch.region, 128), None);
    assert_eq!(index.cursor(), Some(first));
  }

  #[test]
  fn test_cursor_survives_removal() {
    let mut scratch = Scratch::new(&[(16, true), (32, false), (16, true)]);
    let [first, second] = [scratch.block(0), scratch.block(1)];
    let mut index = NextFit::new();

    index.insert(&mut scratch.region, second, 32);
    index.remove(&mut scratch.region, second);

    assert_eq!(index.cursor(), Some(first));
    assert_eq!(index.check(&scratch.region), Ok(()));
  }

  #[test]
  fn test_check_flags_stale_cursor() {
    let mut scratch = Scratch::new(&[(32, false), (16, true)]);
    let inside = BlockRef::new(scratch.block(0).offset() + 8).unwrap();
    let mut index = NextFit::new();

    index.insert(&mut scratch.region, inside, 0);

    assert_eq!(
      index.check(&scratch.region),
      Err(CheckError::StaleCursor {
        block: inside.offset()
      })
    );
  }
}
