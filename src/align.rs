/// Rounds `value` up to the heap's alignment unit (8 bytes).
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(0), 0);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::ALIGNMENT)
  };
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
///
/// # Examples
///
/// ```rust
/// use segalloc::align_to;
///
/// assert_eq!(align_to!(5, 4), 8);
/// assert_eq!(align_to!(4100, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

#[cfg(test)]
mod tests {
  use crate::ALIGNMENT;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));

      let expected_alignment = ALIGNMENT * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_align_to_word() {
    assert_eq!(align_to!(1u32, 4), 4);
    assert_eq!(align_to!(4u32, 4), 4);
    assert_eq!(align_to!(9usize, 4), 12);
  }
}
