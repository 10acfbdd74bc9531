use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Round `size` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
pub fn align_up(size: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// Sanitize a transport-reported alignment into something the allocator can
/// honor: at least 1, rounded up to a power of two.
pub fn sanitize_alignment(raw: i64) -> usize {
    if raw <= 1 {
        1
    } else {
        (raw as usize).next_power_of_two()
    }
}

/// A heap allocation with a guaranteed address alignment.
///
/// The requested size is rounded up to the alignment boundary, never down,
/// so the usable length is always at least what was asked for. The backing
/// memory is released exactly once in the Drop impl, which makes freeing
/// idempotent by construction.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The allocation is exclusively owned; the raw pointer never aliases
// another AlignedBuffer.
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// # Arguments
    ///
    /// * `size` - Minimum usable size in bytes
    /// * `alignment` - Required address alignment in bytes
    pub fn allocate(size: usize, alignment: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::BadParameter("allocation size must be non-zero"));
        }
        let alignment = if alignment <= 1 {
            1
        } else {
            alignment.next_power_of_two()
        };
        let size = align_up(size, alignment);
        let layout = Layout::from_size_align(size, alignment).map_err(|e| {
            Error::Resources(format!(
                "invalid layout ({} bytes, {} aligned): {}",
                size, alignment, e
            ))
        })?;
        let ptr = unsafe { alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(AlignedBuffer { ptr, layout }),
            None => Err(Error::Resources(format!(
                "allocation of {} bytes ({} aligned) failed",
                size, alignment
            ))),
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable size of the allocation (post-rounding).
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_is_honored() {
        for alignment in [1usize, 2, 8, 64, 4096] {
            for size in [1usize, 63, 64, 4095, 4096, 100_000] {
                let buf = AlignedBuffer::allocate(size, alignment).unwrap();
                assert_eq!(buf.as_ptr() as usize % alignment, 0);
                assert!(buf.len() >= size);
            }
        }
    }

    #[test]
    fn size_is_rounded_up_never_down() {
        let buf = AlignedBuffer::allocate(100, 64).unwrap();
        assert_eq!(buf.len(), 128);
        assert_eq!(align_up(100, 64), 128);
        assert_eq!(align_up(128, 64), 128);
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            AlignedBuffer::allocate(0, 64),
            Err(Error::BadParameter(_))
        ));
    }

    #[test]
    fn odd_alignments_are_sanitized() {
        assert_eq!(sanitize_alignment(0), 1);
        assert_eq!(sanitize_alignment(-4), 1);
        assert_eq!(sanitize_alignment(1), 1);
        assert_eq!(sanitize_alignment(24), 32);
        assert_eq!(sanitize_alignment(4096), 4096);
    }
}
