//! Anonymous memory mappings for the dredge managed heap.
//!
//! The heap arena is backed by a single anonymous mapping obtained here.
//! Unix uses `mmap`/`munmap`, Windows uses `VirtualAlloc`/`VirtualFree`.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// An owned anonymous memory mapping.
///
/// The mapping is read-write, zero-filled by the OS, and unmapped when the
/// handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Map `len` bytes of anonymous memory.
    ///
    /// `len` is rounded up to the system page size. Fails with the OS error
    /// if the mapping cannot be established, or `InvalidInput` for a zero
    /// length.
    pub fn anonymous(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mapping length must be greater than 0",
            ));
        }
        let page = page_size();
        let rounded = len
            .checked_add(page - 1)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?
            & !(page - 1);

        // SAFETY: rounded is non-zero and page-aligned; the OS hands back
        // either a fresh private mapping or an error.
        let inner = unsafe { os::MmapInner::map_anon(rounded)? };
        Ok(Self { inner })
    }

    /// Pointer to the start of the mapping.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Length of the mapping in bytes (page-rounded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the mapping is empty. Always false for a live mapping.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}
