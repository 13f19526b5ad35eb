//! Fixed-capacity byte regions shared with the host.
//!
//! Each guest instance owns its own linear memory, so these statics are
//! scoped to one execution unit and never seen by another.

use std::cell::{Cell, UnsafeCell};

/// A byte buffer at a stable address plus the length of its current content.
pub struct Region<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
    len: Cell<usize>,
}

// The guest runs single-threaded on wasm32.
unsafe impl<const N: usize> Sync for Region<N> {}

impl<const N: usize> Region<N> {
    /// Empty region.
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
            len: Cell::new(0),
        }
    }

    /// Start address in linear memory.
    pub fn ptr(&self) -> *mut u8 {
        self.bytes.get().cast()
    }

    /// Capacity in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Length of the current content.
    pub fn len(&self) -> usize {
        self.len.get()
    }

    /// Forget the current content.
    pub fn clear(&self) {
        self.len.set(0);
    }

    /// Replace the content, truncating at a UTF-8 boundary if it does not fit.
    pub fn set(&self, text: &str) {
        let mut end = text.len().min(N);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        // SAFETY: single-threaded, and no reference into the region outlives this call.
        unsafe {
            (*self.bytes.get())[..end].copy_from_slice(&text.as_bytes()[..end]);
        }
        self.len.set(end);
    }
}
