//! Heap consistency checker.
//!
//! Walks the blocks from the prologue to the epilogue, then asks the free
//! index to verify itself against that walk. Meant for tests and debug
//! builds; see [`HeapConfig::check_invariants`](crate::HeapConfig::check_invariants).

use crate::{
  Heap,
  block::{ALIGNMENT, BlockRef, MIN_BLOCK_SIZE, Region, Tag, WORD_SIZE},
  error::CheckError,
  free_list::FreeIndex,
  provider::HeapProvider,
};

impl<P: HeapProvider, I: FreeIndex> Heap<P, I> {
  /// Verifies every heap invariant, reporting the first violation found.
  pub fn check(&self) -> Result<(), CheckError> {
    check_blocks(self.region())?;
    self.index().check(self.region())
  }
}

/// Checks the implicit block list without trusting any size it has not
/// bounds-checked yet.
pub(crate) fn check_blocks(region: &Region) -> Result<(), CheckError> {
  let prologue = region.prologue();
  if region.len() < 4 * WORD_SIZE
    || region.header(prologue) != Tag::PROLOGUE
    || region.footer(prologue) != Tag::PROLOGUE
  {
    return Err(CheckError::BadPrologue);
  }

  let len = region.len();
  let mut block = region.first_block();
  let mut prev_free: Option<BlockRef> = None;

  loop {
    let offset = block.offset();
    if offset as usize > len {
      return Err(CheckError::BadEpilogue { offset, len });
    }

    let header = region.header(block);
    if header.size() == 0 {
      if !header.is_allocated() || offset as usize != len {
        return Err(CheckError::BadEpilogue { offset, len });
      }
      return Ok(());
    }

    if offset as usize % ALIGNMENT != 0 {
      return Err(CheckError::Misaligned { block: offset });
    }
    if (header.size() as usize) < MIN_BLOCK_SIZE {
      return Err(CheckError::BadSize {
        block: offset,
        size: header.size(),
      });
    }
    if offset as usize + header.size() as usize > len {
      return Err(CheckError::OutOfBounds { block: offset });
    }

    let footer = region.footer(block);
    if footer != header {
      return Err(CheckError::TagMismatch {
        block: offset,
        header: header.bits(),
        footer: footer.bits(),
      });
    }

    if !header.is_allocated() {
      if let Some(prev) = prev_free {
        return Err(CheckError::Uncoalesced {
          block: prev.offset(),
          next: offset,
        });
      }
      prev_free = Some(block);
    } else {
      prev_free = None;
    }

    block = region.next(block);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{HeapConfig, free_list::SegregatedLists, provider::ArenaProvider, testing::Scratch};

  #[test]
  fn test_well_formed_heap_passes() {
    let scratch = Scratch::new(&[(24, true), (48, false), (16, true)]);

    assert_eq!(check_blocks(&scratch.region), Ok(()));
  }

  #[test]
  fn test_detects_uncoalesced_neighbors() {
    let scratch = Scratch::new(&[(32, false), (32, false), (16, true)]);
    let [first, second] = [scratch.block(0), scratch.block(1)];

    assert_eq!(
      check_blocks(&scratch.region),
      Err(CheckError::Uncoalesced {
        block: first.offset(),
        next: second.offset()
      })
    );
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut scratch = Scratch::new(&[(32, true), (32, true)]);
    let second = scratch.block(1);
    let footer = scratch.region.footer_offset(second);

    scratch.region.set_word(footer, Tag::pack(32, false).bits());

    assert_eq!(
      check_blocks(&scratch.region),
      Err(CheckError::TagMismatch {
        block: second.offset(),
        header: 33,
        footer: 32
      })
    );
  }

  #[test]
  fn test_detects_damaged_prologue() {
    let mut scratch = Scratch::new(&[(32, true)]);
    let prologue = scratch.region.prologue();

    scratch.region.write_tags(prologue, 8, false);

    assert_eq!(check_blocks(&scratch.region), Err(CheckError::BadPrologue));
  }

  #[test]
  fn test_detects_missing_epilogue() {
    let mut scratch = Scratch::new(&[(32, true), (32, true)]);
    let second = scratch.block(1);

    // the second block's header claims the epilogue's word as well
    scratch.region.set_word(Region::header_offset(second), Tag::pack(40, true).bits());

    assert_eq!(
      check_blocks(&scratch.region),
      Err(CheckError::OutOfBounds {
        block: second.offset()
      })
    );
  }

  #[test]
  fn test_heap_reports_allocated_block_in_free_list() {
    let mut heap: Heap<_, SegregatedLists> = Heap::with_config(
      ArenaProvider::new(1 << 16),
      HeapConfig::new().check_invariants(false),
    )
    .unwrap();
    let a = heap.allocate(100).unwrap();
    let _b = heap.allocate(100).unwrap();
    unsafe { heap.free(a) };
    assert_eq!(heap.check(), Ok(()));

    // flip the freed block back to allocated behind the lists' back
    let block = heap.region().block_of(a);
    let size = heap.region().size(block);
    let tag = Tag::pack(size, true).bits();
    unsafe {
      a.as_ptr().sub(WORD_SIZE).cast::<u32>().write(tag);
      a.as_ptr().add(size as usize - 2 * WORD_SIZE).cast::<u32>().write(tag);
    }

    assert_eq!(
      heap.check(),
      Err(CheckError::AllocatedInFreeList {
        block: block.offset(),
        bucket: SegregatedLists::classify(size),
      })
    );
  }
}
