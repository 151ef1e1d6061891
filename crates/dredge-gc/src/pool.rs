//! Fixed-capacity arena backing the managed heap.
//!
//! One anonymous mapping is carved by a first-fit free list. Free ranges are
//! threaded through the unused memory itself, kept address-ordered so that
//! released neighbors coalesce back into larger ranges. Exhaustion is
//! reported as `None`, which the heap answers with a collection cycle.

use std::io;
use std::ptr::NonNull;

use sys_mmap::Mmap;

/// Carve granularity. Every range handed out or taken back is a multiple of
/// this, so any released range can hold a `FreeRange` node in place.
const GRAIN: usize = std::mem::size_of::<FreeRange>();

/// A free range, stored in the first bytes of the range it describes.
#[repr(C)]
struct FreeRange {
    /// Byte length of this range, `GRAIN`-aligned.
    size: usize,
    /// Next free range by ascending address.
    next: Option<NonNull<FreeRange>>,
}

/// The arena allocator. Plays the role of the underlying system allocator:
/// when it runs dry the heap collects and retries.
pub(crate) struct Pool {
    map: Mmap,
    /// Free ranges in ascending address order.
    free: Option<NonNull<FreeRange>>,
    free_bytes: usize,
}

impl Pool {
    /// Map a fresh arena of at least `capacity` bytes (page-rounded).
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let map = Mmap::anonymous(capacity)?;
        let len = map.len();

        let head = map.ptr().cast::<FreeRange>();
        // SAFETY: the mapping is at least one page, which holds a FreeRange.
        unsafe {
            head.write(FreeRange {
                size: len,
                next: None,
            });
        }

        Ok(Self {
            map,
            free: NonNull::new(head),
            free_bytes: len,
        })
    }

    const fn normalize(size: usize) -> Option<usize> {
        match size.checked_add(GRAIN - 1) {
            Some(padded) => Some(padded & !(GRAIN - 1)),
            None => None,
        }
    }

    /// First-fit allocation of `size` bytes (rounded up to `GRAIN`).
    ///
    /// Returns `None` when no free range fits: the arena is exhausted from
    /// the caller's point of view.
    pub(crate) fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let size = Self::normalize(size)?;
        if size == 0 {
            return None;
        }

        let mut link: *mut Option<NonNull<FreeRange>> = &mut self.free;
        // SAFETY: free-list nodes live inside the mapping and are only
        // touched through this list; link always points at a valid link slot.
        unsafe {
            while let Some(range) = *link {
                let range_size = (*range.as_ptr()).size;
                if range_size >= size {
                    let remainder = range_size - size;
                    if remainder == 0 {
                        *link = (*range.as_ptr()).next;
                    } else {
                        // remainder is a GRAIN multiple, so it can hold its
                        // own FreeRange node
                        let rest = NonNull::new_unchecked(
                            range.as_ptr().cast::<u8>().add(size).cast::<FreeRange>(),
                        );
                        rest.as_ptr().write(FreeRange {
                            size: remainder,
                            next: (*range.as_ptr()).next,
                        });
                        *link = Some(rest);
                    }
                    self.free_bytes -= size;
                    return Some(range.cast::<u8>());
                }
                link = &mut (*range.as_ptr()).next;
            }
        }
        None
    }

    /// Return a previously allocated range to the free list.
    ///
    /// `size` must be the value passed to the `allocate` that produced
    /// `ptr`. The range is reinserted in address order and merged with
    /// adjacent free neighbors.
    pub(crate) fn release(&mut self, ptr: NonNull<u8>, size: usize) {
        let Some(size) = Self::normalize(size) else {
            return;
        };
        let addr = ptr.as_ptr() as usize;

        let mut prev: Option<NonNull<FreeRange>> = None;
        let mut cur = self.free;
        // SAFETY: same free-list discipline as allocate; the released range
        // is exclusively ours to rewrite.
        unsafe {
            while let Some(range) = cur {
                if range.as_ptr() as usize > addr {
                    break;
                }
                prev = Some(range);
                cur = (*range.as_ptr()).next;
            }

            let new = ptr.cast::<FreeRange>();
            new.as_ptr().write(FreeRange { size, next: cur });
            match prev {
                Some(p) => (*p.as_ptr()).next = Some(new),
                None => self.free = Some(new),
            }
            self.free_bytes += size;

            // merge with the successor, then let the predecessor swallow both
            if let Some(next) = cur {
                if addr + size == next.as_ptr() as usize {
                    (*new.as_ptr()).size += (*next.as_ptr()).size;
                    (*new.as_ptr()).next = (*next.as_ptr()).next;
                }
            }
            if let Some(p) = prev {
                let p_addr = p.as_ptr() as usize;
                if p_addr + (*p.as_ptr()).size == addr {
                    (*p.as_ptr()).size += (*new.as_ptr()).size;
                    (*p.as_ptr()).next = (*new.as_ptr()).next;
                }
            }
        }
    }

    /// Whether `addr` falls inside the arena. Cheap pre-filter for
    /// conservative candidate words.
    pub(crate) fn contains(&self, addr: usize) -> bool {
        let base = self.map.ptr() as usize;
        addr >= base && addr < base + self.map.len()
    }

    /// Total arena size in bytes.
    pub(crate) fn capacity(&self) -> usize {
        self.map.len()
    }

    #[cfg(test)]
    pub(crate) fn free_bytes(&self) -> usize {
        self.free_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pool_is_fully_free() {
        let pool = Pool::new(4096).expect("failed to map pool");
        assert_eq!(pool.free_bytes(), pool.capacity());
    }

    #[test]
    fn allocate_and_release_roundtrip() {
        let mut pool = Pool::new(4096).expect("failed to map pool");
        let cap = pool.capacity();

        let a = pool.allocate(100).expect("allocation failed");
        assert!(pool.contains(a.as_ptr() as usize));
        assert!(pool.free_bytes() < cap);

        pool.release(a, 100);
        assert_eq!(pool.free_bytes(), cap);
    }

    #[test]
    fn chunks_do_not_overlap() {
        let mut pool = Pool::new(4096).expect("failed to map pool");
        let a = pool.allocate(64).expect("allocation failed");
        let b = pool.allocate(64).expect("allocation failed");
        let (a, b) = (a.as_ptr() as usize, b.as_ptr() as usize);
        assert!(a + 64 <= b || b + 64 <= a);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = Pool::new(4096).expect("failed to map pool");
        let cap = pool.capacity();
        assert!(pool.allocate(cap + 1).is_none());

        let _all = pool.allocate(cap).expect("allocation failed");
        assert!(pool.allocate(GRAIN).is_none());
    }

    #[test]
    fn released_neighbors_coalesce() {
        let mut pool = Pool::new(4096).expect("failed to map pool");
        let cap = pool.capacity();

        let a = pool.allocate(64).expect("allocation failed");
        let b = pool.allocate(64).expect("allocation failed");
        let c = pool.allocate(64).expect("allocation failed");

        // out-of-order release still merges back into one range
        pool.release(a, 64);
        pool.release(c, 64);
        pool.release(b, 64);
        assert_eq!(pool.free_bytes(), cap);

        let all = pool.allocate(cap).expect("coalescing failed");
        pool.release(all, cap);
    }

    #[test]
    fn first_fit_reuses_freed_range() {
        let mut pool = Pool::new(4096).expect("failed to map pool");
        let a = pool.allocate(128).expect("allocation failed");
        let _b = pool.allocate(128).expect("allocation failed");

        pool.release(a, 128);
        let c = pool.allocate(128).expect("allocation failed");
        assert_eq!(a.as_ptr(), c.as_ptr());
    }
}
