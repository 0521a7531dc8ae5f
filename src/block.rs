//! Boundary-tag codec.
//!
//! Every block in the heap is framed by two 4-byte tags holding the block size
//! with the allocated flag packed into bit 0:
//!
//! ```text
//!            header                                     footer
//!   ┌──────────────────┬────────────────────────────┬──────────────────┐
//!   │ size | allocated │          payload           │ size | allocated │
//!   └──────────────────┴────────────────────────────┴──────────────────┘
//!                      ▲                            ▲
//!                      └── BlockRef (payload)       └── payload + size - 8
//! ```
//!
//! While a block is free the first two payload words hold the previous and next
//! links of its free list, stored as heap offsets (`0` meaning none).

use std::{fmt, num::NonZeroU32, ptr::NonNull};

/// Width of a boundary tag and of a free-list link.
pub const WORD_SIZE: usize = 4;

/// Every block size and payload address is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Tags plus room for both free-list links.
pub const MIN_BLOCK_SIZE: usize = 2 * ALIGNMENT;

/// Largest region the 32-bit tags can describe.
pub const MAX_HEAP_SIZE: usize = u32::MAX as usize & !(ALIGNMENT - 1);

/// Padding word, prologue header and footer, epilogue header.
pub(crate) const PREAMBLE_SIZE: usize = 4 * WORD_SIZE;

const PROLOGUE: u32 = 2 * WORD_SIZE as u32;
const FIRST_BLOCK: u32 = PREAMBLE_SIZE as u32;
const SIZE_MASK: u32 = !(ALIGNMENT as u32 - 1);
const ALLOCATED: u32 = 1;

/// A packed boundary tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
  /// The zero-sized, permanently allocated block closing the heap.
  pub const EPILOGUE: Self = Self::pack(0, true);

  /// The prologue: an allocated block with no payload.
  pub const PROLOGUE: Self = Self::pack(PROLOGUE, true);

  pub const fn pack(
    size: u32,
    allocated: bool,
  ) -> Self {
    debug_assert!(size & !SIZE_MASK == 0, "block size must be 8-byte aligned");
    Self(size | allocated as u32)
  }

  pub const fn from_bits(bits: u32) -> Self {
    Self(bits)
  }

  pub const fn bits(self) -> u32 {
    self.0
  }

  pub const fn size(self) -> u32 {
    self.0 & SIZE_MASK
  }

  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOCATED != 0
  }
}

impl fmt::Debug for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Tag")
      .field("size", &self.size())
      .field("allocated", &self.is_allocated())
      .finish()
  }
}

/// A block, named by the heap offset of its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRef(NonZeroU32);

impl BlockRef {
  pub const fn new(offset: u32) -> Option<Self> {
    match NonZeroU32::new(offset) {
      Some(offset) => Some(Self(offset)),
      None => None,
    }
  }

  pub const fn offset(self) -> u32 {
    self.0.get()
  }

  const fn at(offset: u32) -> Self {
    match Self::new(offset) {
      Some(block) => block,
      None => panic!("block offset underflowed the heap start"),
    }
  }

  fn to_link(block: Option<Self>) -> u32 {
    block.map_or(0, Self::offset)
  }
}

/// The heap memory obtained from a provider, viewed as a sequence of blocks.
///
/// Every word access is checked against the current length of the region, so a
/// damaged tag can at worst trigger a panic, never a stray read or write.
pub struct Region {
  base: NonNull<u8>,
  len: usize,
}

impl Region {
  pub(crate) const fn new(base: NonNull<u8>) -> Self {
    Self { base, len: 0 }
  }

  pub const fn len(&self) -> usize {
    self.len
  }

  pub const fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub(crate) fn grow(
    &mut self,
    bytes: usize,
  ) {
    self.len += bytes;
  }

  /// Address one past the last byte of the region.
  pub(crate) fn end(&self) -> NonNull<u8> {
    unsafe { self.base.add(self.len) }
  }

  pub(crate) fn word(
    &self,
    offset: u32,
  ) -> u32 {
    let offset = offset as usize;
    assert!(
      offset + WORD_SIZE <= self.len,
      "heap word {offset:#x} lies outside the {}-byte region",
      self.len
    );
    debug_assert!(offset % WORD_SIZE == 0);
    unsafe { self.base.add(offset).cast::<u32>().read() }
  }

  pub(crate) fn set_word(
    &mut self,
    offset: u32,
    value: u32,
  ) {
    let offset = offset as usize;
    assert!(
      offset + WORD_SIZE <= self.len,
      "heap word {offset:#x} lies outside the {}-byte region",
      self.len
    );
    debug_assert!(offset % WORD_SIZE == 0);
    unsafe { self.base.add(offset).cast::<u32>().write(value) }
  }

  /// Writes the padding word, the prologue and an epilogue right behind it.
  pub(crate) fn write_preamble(&mut self) {
    self.set_word(0, 0);
    self.set_word(WORD_SIZE as u32, Tag::PROLOGUE.bits());
    self.set_word(PROLOGUE, Tag::PROLOGUE.bits());
    self.set_word(FIRST_BLOCK - WORD_SIZE as u32, Tag::EPILOGUE.bits());
  }

  /// Closes the region with an epilogue header in its last word.
  pub(crate) fn write_epilogue(&mut self) {
    let offset = (self.len - WORD_SIZE) as u32;
    self.set_word(offset, Tag::EPILOGUE.bits());
  }

  pub const fn first_block(&self) -> BlockRef {
    BlockRef::at(FIRST_BLOCK)
  }

  /// The epilogue, named like a block whose header is the region's last word.
  pub fn epilogue(&self) -> BlockRef {
    BlockRef::at(self.len as u32)
  }

  /// Payload offset of the prologue, the predecessor of the first block.
  pub const fn prologue(&self) -> BlockRef {
    BlockRef::at(PROLOGUE)
  }

  /// Whether `block` could name a free block: aligned, past the prologue and
  /// with both link words inside the region.
  pub fn contains(
    &self,
    block: BlockRef,
  ) -> bool {
    let offset = block.offset() as usize;
    offset % ALIGNMENT == 0 && offset >= FIRST_BLOCK as usize && offset + OVERHEAD <= self.len
  }

  pub fn header_offset(block: BlockRef) -> u32 {
    block.offset() - WORD_SIZE as u32
  }

  pub fn footer_offset(
    &self,
    block: BlockRef,
  ) -> u32 {
    block.offset() + self.size(block) - OVERHEAD as u32
  }

  pub fn header(
    &self,
    block: BlockRef,
  ) -> Tag {
    Tag(self.word(Self::header_offset(block)))
  }

  pub fn footer(
    &self,
    block: BlockRef,
  ) -> Tag {
    Tag(self.word(self.footer_offset(block)))
  }

  /// The footer of the block physically preceding `block`.
  pub fn prev_footer(
    &self,
    block: BlockRef,
  ) -> Tag {
    Tag(self.word(block.offset() - OVERHEAD as u32))
  }

  pub fn size(
    &self,
    block: BlockRef,
  ) -> u32 {
    self.header(block).size()
  }

  pub fn is_allocated(
    &self,
    block: BlockRef,
  ) -> bool {
    self.header(block).is_allocated()
  }

  /// The block physically following `block`. Never call on the epilogue.
  pub fn next(
    &self,
    block: BlockRef,
  ) -> BlockRef {
    BlockRef::at(block.offset() + self.size(block))
  }

  /// The block physically preceding `block`. Never call on the prologue.
  pub fn prev(
    &self,
    block: BlockRef,
  ) -> BlockRef {
    BlockRef::at(block.offset() - self.prev_footer(block).size())
  }

  /// Writes matching header and footer tags for a block of `size` bytes.
  pub fn write_tags(
    &mut self,
    block: BlockRef,
    size: u32,
    allocated: bool,
  ) {
    let tag = Tag::pack(size, allocated);
    self.set_word(Self::header_offset(block), tag.bits());
    self.set_word(block.offset() + size - OVERHEAD as u32, tag.bits());
  }

  pub fn prev_link(
    &self,
    block: BlockRef,
  ) -> Option<BlockRef> {
    BlockRef::new(self.word(block.offset()))
  }

  pub fn next_link(
    &self,
    block: BlockRef,
  ) -> Option<BlockRef> {
    BlockRef::new(self.word(block.offset() + WORD_SIZE as u32))
  }

  pub fn set_prev_link(
    &mut self,
    block: BlockRef,
    prev: Option<BlockRef>,
  ) {
    self.set_word(block.offset(), BlockRef::to_link(prev));
  }

  pub fn set_next_link(
    &mut self,
    block: BlockRef,
    next: Option<BlockRef>,
  ) {
    self.set_word(block.offset() + WORD_SIZE as u32, BlockRef::to_link(next));
  }

  /// Walks every block between the prologue and the epilogue.
  pub fn blocks(&self) -> Blocks<'_> {
    let cursor = (self.len >= PREAMBLE_SIZE).then(|| self.first_block());
    Blocks { region: self, cursor }
  }

  /// Walks the blocks starting at `block` up to the epilogue.
  pub fn blocks_from(
    &self,
    block: BlockRef,
  ) -> Blocks<'_> {
    Blocks {
      region: self,
      cursor: Some(block),
    }
  }

  pub(crate) fn as_ptr(
    &self,
    block: BlockRef,
  ) -> NonNull<u8> {
    unsafe { self.base.add(block.offset() as usize) }
  }

  /// Maps a payload address handed out by this region back to its block.
  pub(crate) fn block_of(
    &self,
    ptr: NonNull<u8>,
  ) -> BlockRef {
    let offset = ptr.as_ptr().addr().wrapping_sub(self.base.as_ptr().addr());
    assert!(
      offset >= FIRST_BLOCK as usize && offset < self.len,
      "address {ptr:p} does not belong to this heap"
    );
    BlockRef::at(offset as u32)
  }
}

impl fmt::Debug for Region {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Region")
      .field("base", &self.base)
      .field("len", &self.len)
      .finish()
  }
}

/// Iterator over `(block, header)` pairs, see [`Region::blocks`].
pub struct Blocks<'a> {
  region: &'a Region,
  cursor: Option<BlockRef>,
}

impl Iterator for Blocks<'_> {
  type Item = (BlockRef, Tag);

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.cursor?;
    let tag = self.region.header(block);
    if tag.size() == 0 {
      self.cursor = None;
      return None;
    }
    self.cursor = Some(self.region.next(block));
    Some((block, tag))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::Scratch;

  #[test]
  fn test_tag_packing() {
    let tag = Tag::pack(48, true);

    assert_eq!(tag.bits(), 49);
    assert_eq!(tag.size(), 48);
    assert!(tag.is_allocated());

    let tag = Tag::from_bits(4096);
    assert_eq!(tag.size(), 4096);
    assert!(!tag.is_allocated());

    assert_eq!(Tag::EPILOGUE.size(), 0);
    assert!(Tag::EPILOGUE.is_allocated());
  }

  #[test]
  fn test_preamble_layout() {
    let scratch = Scratch::new(&[]);
    let region = &scratch.region;

    assert_eq!(region.len(), PREAMBLE_SIZE);
    assert_eq!(region.header(region.prologue()), Tag::PROLOGUE);
    assert_eq!(region.footer(region.prologue()), Tag::PROLOGUE);
    assert_eq!(region.header(region.first_block()), Tag::EPILOGUE);
    assert_eq!(region.blocks().count(), 0);
  }

  #[test]
  fn test_neighbor_arithmetic() {
    let scratch = Scratch::new(&[(24, true), (32, false), (16, true)]);
    let region = &scratch.region;

    let first = region.first_block();
    assert_eq!(first.offset(), 16);
    assert_eq!(Region::header_offset(first), 12);
    assert_eq!(region.footer_offset(first), 32);

    let second = region.next(first);
    assert_eq!(second.offset(), 40);
    assert_eq!(region.size(second), 32);
    assert!(!region.is_allocated(second));
    assert_eq!(region.header(second), region.footer(second));

    let third = region.next(second);
    assert_eq!(region.prev(third), second);
    assert_eq!(region.prev(second), first);
    assert_eq!(region.prev(first), region.prologue());

    let epilogue = region.next(third);
    assert_eq!(epilogue.offset() as usize, region.len());
    assert_eq!(region.header(epilogue), Tag::EPILOGUE);
  }

  #[test]
  fn test_links() {
    let mut scratch = Scratch::new(&[(32, false), (32, true), (32, false)]);
    let first = scratch.block(0);
    let third = scratch.block(2);
    let region = &mut scratch.region;

    region.set_prev_link(first, None);
    region.set_next_link(first, Some(third));
    region.set_prev_link(third, Some(first));
    region.set_next_link(third, None);

    assert_eq!(region.next_link(first), Some(third));
    assert_eq!(region.prev_link(first), None);
    assert_eq!(region.prev_link(third), Some(first));
    assert_eq!(region.next_link(third), None);
    // links live in the payload and leave the tags alone
    assert_eq!(region.header(first), Tag::pack(32, false));
    assert_eq!(region.footer(third), Tag::pack(32, false));
  }

  #[test]
  fn test_blocks_walk() {
    let scratch = Scratch::new(&[(16, true), (48, false), (24, true)]);

    let sizes: Vec<_> = scratch
      .region
      .blocks()
      .map(|(_, tag)| (tag.size(), tag.is_allocated()))
      .collect();

    assert_eq!(sizes, [(16, true), (48, false), (24, true)]);

    let second = scratch.block(1);
    assert_eq!(scratch.region.blocks_from(second).count(), 2);
  }

  #[test]
  fn test_block_of_round_trip() {
    let scratch = Scratch::new(&[(32, true)]);
    let block = scratch.block(0);

    let ptr = scratch.region.as_ptr(block);
    assert_eq!(scratch.region.block_of(ptr), block);
  }

  #[test]
  #[should_panic(expected = "outside")]
  fn test_out_of_bounds_read_panics() {
    let scratch = Scratch::new(&[(16, true)]);
    let past_end = BlockRef::new(scratch.region.len() as u32 + 8).unwrap();

    let _ = scratch.region.header(past_end);
  }
}
