//! Where the heap's memory comes from.
//!
//! ```text
//!   init()                extend(n)              extend(m)
//!     │                       │                      │
//!     ▼                       ▼                      ▼
//!   start ─────────────── old end ──────n──────── old end ──────m──────┐
//!     └────────────────────────── one contiguous region ───────────────┘
//! ```

use std::{
  alloc::{self, Layout},
  io,
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};

use crate::{block::ALIGNMENT, error::ProviderError};

/// Capacity of [`ArenaProvider::default`].
pub const DEFAULT_ARENA_CAPACITY: usize = 20 * (1 << 20);

/// A source of contiguous, growable memory for a [`Heap`](crate::Heap).
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// - `init` returns an address aligned to [`ALIGNMENT`]
/// - `extend(n)` returns the current end of the region, the `n` bytes from
///   there on are valid for reads and writes, and every byte handed out before
///   stays valid and keeps its contents for as long as the provider lives
/// - no one else reads or writes the handed out memory
pub unsafe trait HeapProvider {
  /// Establishes an empty region and returns its start.
  fn init(&mut self) -> Result<NonNull<u8>, ProviderError>;

  /// Grows the region by exactly `bytes` bytes and returns the previous end.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ProviderError>;
}

/// A fixed-capacity arena with a break pointer.
///
/// Grows like `sbrk` but refuses to go past the capacity chosen up front,
/// which makes exhaustion easy to provoke.
pub struct ArenaProvider {
  start: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

impl ArenaProvider {
  pub fn new(capacity: usize) -> Self {
    let layout = Self::layout(capacity);
    let start = unsafe { alloc::alloc_zeroed(layout) };
    let Some(start) = NonNull::new(start) else {
      alloc::handle_alloc_error(layout);
    };

    Self {
      start,
      capacity,
      brk: 0,
    }
  }

  fn layout(capacity: usize) -> Layout {
    match Layout::from_size_align(capacity.max(ALIGNMENT), ALIGNMENT) {
      Ok(layout) => layout,
      Err(_) => panic!("arena capacity of {capacity} bytes is too large"),
    }
  }

  pub const fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes handed out so far.
  pub const fn used(&self) -> usize {
    self.brk
  }

  pub const fn remaining(&self) -> usize {
    self.capacity - self.brk
  }
}

impl Default for ArenaProvider {
  fn default() -> Self {
    Self::new(DEFAULT_ARENA_CAPACITY)
  }
}

impl Drop for ArenaProvider {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.start.as_ptr(), Self::layout(self.capacity)) }
  }
}

unsafe impl HeapProvider for ArenaProvider {
  /// Resets the break, so a second `init` starts over with an empty region.
  fn init(&mut self) -> Result<NonNull<u8>, ProviderError> {
    self.brk = 0;
    Ok(self.start)
  }

  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ProviderError> {
    let available = self.remaining();
    if bytes > available {
      return Err(ProviderError::OutOfMemory {
        requested: bytes,
        available,
      });
    }

    let old_end = unsafe { self.start.add(self.brk) };
    self.brk += bytes;
    Ok(old_end)
  }
}

/// Grows the process data segment with `sbrk(2)`.
///
/// The break is shared with everything else in the process that calls
/// `brk`/`sbrk`; if someone moves it between two extensions the heap would
/// no longer be contiguous and the extension fails.
#[derive(Debug, Default)]
pub struct SbrkProvider {
  end: Option<NonNull<u8>>,
}

impl SbrkProvider {
  pub const fn new() -> Self {
    Self { end: None }
  }

  /// The current program break, as reported by `sbrk(0)`.
  pub fn program_break() -> *mut u8 {
    unsafe { sbrk(0) }.cast()
  }
}

fn sbrk_checked(increment: usize) -> Result<NonNull<u8>, ProviderError> {
  let Ok(increment) = intptr_t::try_from(increment) else {
    return Err(ProviderError::Sbrk(io::ErrorKind::OutOfMemory.into()));
  };

  let address = unsafe { sbrk(increment) };

  if address == usize::MAX as *mut c_void {
    return Err(ProviderError::Sbrk(io::Error::last_os_error()));
  }

  NonNull::new(address.cast()).ok_or_else(|| ProviderError::Sbrk(io::Error::other("sbrk returned a null break")))
}

unsafe impl HeapProvider for SbrkProvider {
  fn init(&mut self) -> Result<NonNull<u8>, ProviderError> {
    let current = sbrk_checked(0)?;

    let padding = current.as_ptr().align_offset(ALIGNMENT);
    let start = if padding == 0 {
      current
    } else {
      let old = sbrk_checked(padding)?;
      unsafe { old.add(padding) }
    };

    log::debug!("sbrk heap starts at {start:p}");
    self.end = Some(start);
    Ok(start)
  }

  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ProviderError> {
    let old_end = sbrk_checked(bytes)?;

    if let Some(expected) = self.end {
      if expected != old_end {
        return Err(ProviderError::NonContiguous {
          expected: expected.as_ptr().addr(),
          found: old_end.as_ptr().addr(),
        });
      }
    }

    self.end = Some(unsafe { old_end.add(bytes) });
    Ok(old_end)
  }
}
