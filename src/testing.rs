use std::ptr::NonNull;

use crate::block::{BlockRef, PREAMBLE_SIZE, Region};

pub(crate) fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

/// A hand-built heap for exercising the codec and the registry without a
/// provider.
pub(crate) struct Scratch {
  _memory: Vec<u64>,
  pub region: Region,
}

impl Scratch {
  /// Lays out `(size, allocated)` blocks after the prologue and closes the
  /// heap with an epilogue.
  pub fn new(blocks: &[(u32, bool)]) -> Self {
    let len = PREAMBLE_SIZE + blocks.iter().map(|&(size, _)| size as usize).sum::<usize>();
    let mut memory = vec![0u64; len / 8];
    let base = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();

    let mut region = Region::new(base);
    region.grow(PREAMBLE_SIZE);
    region.write_preamble();

    let mut block = region.first_block();
    for &(size, allocated) in blocks {
      region.grow(size as usize);
      region.write_tags(block, size, allocated);
      block = region.next(block);
    }
    region.write_epilogue();

    Self {
      _memory: memory,
      region,
    }
  }

  /// The `n`-th block after the prologue.
  pub fn block(
    &self,
    n: usize,
  ) -> BlockRef {
    self.region.blocks().nth(n).unwrap().0
  }
}
