//! Immediate-neighbor coalescing.
//!
//! ```text
//!   prev allocated, next allocated:   [A][F][A]        -> unchanged
//!   prev allocated, next free:        [A][F][F]        -> [A][ F    ]
//!   prev free,      next allocated:   [F][F][A]        -> [ F    ][A]
//!   prev free,      next free:        [F][F][F]        -> [ F         ]
//! ```

use crate::{
  block::{BlockRef, Region},
  free_list::FreeIndex,
};

/// Merges the free, already indexed `block` with whichever physical
/// neighbors are free and indexes the result.
///
/// Returns the merged block, which starts at the previous neighbor when that
/// one took part. Calling it again on the result changes nothing, since both
/// neighbors of a fully merged block are allocated.
pub(crate) fn coalesce<I: FreeIndex>(
  region: &mut Region,
  index: &mut I,
  block: BlockRef,
) -> BlockRef {
  let prev_allocated = region.prev_footer(block).is_allocated();
  let next = region.next(block);
  let next_allocated = region.is_allocated(next);
  let mut size = region.size(block);

  let merged = match (prev_allocated, next_allocated) {
    (true, true) => return block,
    (true, false) => {
      index.remove(region, next);
      index.remove(region, block);
      size += region.size(next);
      region.write_tags(block, size, false);
      block
    }
    (false, true) => {
      let prev = region.prev(block);
      index.remove(region, prev);
      index.remove(region, block);
      size += region.size(prev);
      region.write_tags(prev, size, false);
      prev
    }
    (false, false) => {
      let prev = region.prev(block);
      index.remove(region, prev);
      index.remove(region, block);
      index.remove(region, next);
      size += region.size(prev) + region.size(next);
      region.write_tags(prev, size, false);
      prev
    }
  };

  log::trace!("coalesced block {:#x} into {:#x} ({size} bytes)", block.offset(), merged.offset());
  index.insert(region, merged, size);
  merged
}
