//! # segalloc - A Segregated Free-List Allocator
//!
//! This crate provides a **boundary-tagged heap allocator** with size-classed
//! free lists, in the style of the classic `malloc` implementations built on
//! top of `sbrk`.
//!
//! ## Overview
//!
//! The heap is a single region that only ever grows. It is tiled by blocks,
//! each framed by a header and a footer tag, between two permanently
//! allocated sentinels:
//!
//! ```text
//!   Heap Region:
//!
//!   ┌─────┬───────────┬──────────────┬─────────┬────────────────────┬─────┐
//!   │ pad │ prologue  │ A  allocated │ F  free │    A  allocated    │ epi │
//!   │     │ [8|1][8|1]│ [h]  ....[f] │[h]...[f]│ [h]  ........  [f] │[0|1]│
//!   └─────┴───────────┴──────────────┴─────────┴────────────────────┴─────┘
//!   ▲                                                                     ▲
//!   │                                                                     │
//!  heap start                                                  provider break
//!
//!   Tags hold the block size with the allocated flag in bit 0.
//!   The sentinels let every block find both neighbors without edge cases.
//! ```
//!
//! Free blocks are filed by size class into doubly linked lists threaded
//! through their own payloads:
//!
//! ```text
//!   Free-List Registry:
//!
//!   class 4  [16, 32)     ──► 24 ──► 24
//!   class 5  [32, 64)     ──► (empty)
//!   class 6  [64, 128)    ──► 120 ──► 72
//!     ...
//!   class 19 [2^19, ...)  ──► (empty)
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary-tag codec over the heap region
//!   ├── provider   - HeapProvider trait, ArenaProvider, SbrkProvider
//!   ├── free_list  - FreeIndex trait and the segregated free lists
//!   ├── next_fit   - Next-fit search cursor, the list-less alternative
//!   ├── coalesce   - Merging of adjacent free blocks
//!   ├── heap       - Heap: allocate, free, resize
//!   ├── check      - Consistency checker
//!   ├── config     - HeapConfig
//!   └── error      - ProviderError, AllocError, CheckError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{ArenaProvider, Heap};
//!
//! let mut heap = Heap::new(ArenaProvider::new(1 << 20)).unwrap();
//!
//! let ptr = heap.allocate(64).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 64);
//!
//!     let ptr = heap.resize(Some(ptr), 4096).unwrap().unwrap();
//!     assert_eq!(*ptr.as_ptr().add(63), 0xAB);
//!
//!     heap.free(ptr);
//! }
//! assert!(heap.check().is_ok());
//! ```
//!
//! ## How It Works
//!
//! - **allocate**: the request plus 8 bytes of tags is rounded up to a multiple
//!   of 8 (at least 16). The lists are searched from the request's size class
//!   upward; if nothing fits, the heap grows by at least 4 KiB and the new
//!   space is merged with a free block that ended the heap. Leftovers of 16
//!   bytes or more are split off as a new free block.
//! - **free**: the block is marked free, listed and merged with whichever
//!   physical neighbors are free.
//! - **resize**: shrinks in place; grows in place by absorbing a free
//!   successor (extending the heap when the block is last), and only
//!   otherwise moves the payload.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a `Heap` is neither `Send` nor `Sync`
//! - **Grow-only**: memory is never handed back to the provider
//! - **8-byte alignment**: no over-aligned allocations
//! - **4 GiB**: tags are 32 bits wide
//!
//! ## Safety
//!
//! Freeing or resizing an address the heap did not hand out is undefined
//! behavior, so `free`, `resize` and `usable_size` are `unsafe`. The heap's own
//! bookkeeping never reads or writes outside the region it got from its
//! provider.

pub mod align;
mod block;
mod check;
mod coalesce;
mod config;
mod error;
mod free_list;
mod heap;
mod next_fit;
mod provider;
#[cfg(test)]
mod testing;

pub use block::{ALIGNMENT, BlockRef, Blocks, MAX_HEAP_SIZE, MIN_BLOCK_SIZE, OVERHEAD, Region, Tag, WORD_SIZE};
pub use config::{CHUNK_SIZE, HeapConfig};
pub use error::{AllocError, CheckError, ProviderError};
pub use free_list::{BUCKET_COUNT, FreeIndex, SegregatedLists};
pub use heap::{BlockInfo, Heap, HeapStats};
pub use next_fit::NextFit;
pub use provider::{ArenaProvider, DEFAULT_ARENA_CAPACITY, HeapProvider, SbrkProvider};
