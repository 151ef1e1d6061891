//! The heap context: configuration, allocation, and block lookup.
//!
//! A [`Heap`] owns its arena, its block registry, and every knob that governs
//! collection. All operations go through `&mut Heap`, so allocation can never
//! race a collection cycle on the same heap.

use std::fmt;
use std::io;
use std::ptr::NonNull;

use crate::block::{BlockHeader, BlockRef};
use crate::metrics::CycleMetrics;
use crate::pool::Pool;
use crate::stack::{self, StackBounds};

/// The arena could not satisfy an allocation even after a collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("managed heap out of memory")
    }
}

impl std::error::Error for OutOfMemory {}

/// Default arena capacity: 16 MiB.
pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;

/// Builder-style configuration for a [`Heap`].
///
/// ```
/// use dredge_gc::{Heap, HeapConfig};
///
/// let heap = Heap::with_config(
///     HeapConfig::new().capacity(1024 * 1024).scan_stack(false),
/// ).expect("mapping failed");
/// assert!(heap.capacity() >= 1024 * 1024);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    pub(crate) capacity: usize,
    pub(crate) scan_stack: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Configuration with the default capacity and stack scanning enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            scan_stack: true,
        }
    }

    /// Set the arena capacity in bytes (rounded up to a whole page).
    #[must_use]
    pub const fn capacity(mut self, bytes: usize) -> Self {
        self.capacity = bytes;
        self
    }

    /// Enable or disable scanning the call stack for roots.
    ///
    /// With scanning off, only regions registered through
    /// [`Heap::add_root_region`] keep blocks alive, which makes reclamation
    /// deterministic. That is the intended mode for tests.
    #[must_use]
    pub const fn scan_stack(mut self, enabled: bool) -> Self {
        self.scan_stack = enabled;
        self
    }
}

/// An extra root region registered by the caller.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RootRegion {
    pub(crate) ptr: *const u8,
    pub(crate) len: usize,
}

/// A conservative mark-and-sweep heap.
///
/// Blocks come out of [`Heap::alloc`] and are never freed by the caller.
/// When the arena runs dry, or when [`Heap::collect`] is called, every block
/// not reachable from the root set is reclaimed.
///
/// `Heap` is neither `Send` nor `Sync`: the root set is the creating thread's
/// call stack.
pub struct Heap {
    pub(crate) pool: Pool,
    /// Registry head; newest block first.
    pub(crate) head: Option<NonNull<BlockHeader>>,
    /// Address to scan up to: the OS stack bottom when known, otherwise the
    /// stack pointer observed at heap creation.
    pub(crate) root_floor: usize,
    pub(crate) bounds: Option<StackBounds>,
    pub(crate) scan_stack: bool,
    pub(crate) extra_roots: Vec<RootRegion>,
    pub(crate) live_blocks: usize,
    pub(crate) live_bytes: usize,
    pub(crate) cycles: usize,
    pub(crate) last_cycle: Option<CycleMetrics>,
}

impl Heap {
    /// Create a heap with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the arena mapping fails. Use [`Heap::with_config`] to handle
    /// mapping errors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::new()).expect("failed to map heap arena")
    }

    /// Create a heap from an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error if the arena mapping fails.
    pub fn with_config(config: HeapConfig) -> io::Result<Self> {
        let pool = Pool::new(config.capacity)?;
        let bounds = stack::stack_bounds();
        let root_floor = bounds.map_or_else(stack::approximate_stack_pointer, |b| b.bottom);

        Ok(Self {
            pool,
            head: None,
            root_floor,
            bounds,
            scan_stack: config.scan_stack,
            extra_roots: Vec::new(),
            live_blocks: 0,
            live_bytes: 0,
            cycles: 0,
            last_cycle: None,
        })
    }

    /// Allocate a zero-filled block of `size` bytes.
    ///
    /// If the arena is exhausted, one collection cycle runs and the
    /// allocation is retried before giving up.
    ///
    /// The returned pointer stays valid as long as some scanned root (stack
    /// word, registered region, or the interior of a reachable block) holds
    /// an address inside the block.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfMemory`] when the request cannot be satisfied even
    /// after collecting.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        let footprint = BlockHeader::footprint(size).ok_or(OutOfMemory)?;

        let chunk = match self.pool.allocate(footprint) {
            Some(chunk) => chunk,
            None => {
                self.collect();
                self.pool.allocate(footprint).ok_or(OutOfMemory)?
            }
        };

        let header = chunk.cast::<BlockHeader>();
        // SAFETY: chunk is a fresh arena range of at least `footprint` bytes,
        // which covers the header and `size` data bytes.
        unsafe {
            header.as_ptr().write(BlockHeader {
                marked: false,
                size,
                next: self.head,
            });
            let data = BlockHeader::data(header);
            std::ptr::write_bytes(data.as_ptr(), 0, size);
        }
        self.head = Some(header);
        self.live_blocks += 1;
        self.live_bytes += size;

        Ok(BlockHeader::data(header))
    }

    /// Find the managed block whose data region contains `ptr`.
    ///
    /// Interior pointers resolve to their block; addresses outside every
    /// block (including pointers at a block's one-past-the-end) return
    /// `None`. Registry membership is the sole authority: the arena may still
    /// hold the bytes of a reclaimed block, but once unlinked it is not
    /// findable.
    #[must_use]
    pub fn find_block(&self, ptr: *const u8) -> Option<BlockRef> {
        let addr = ptr as usize;
        if addr == 0 || !self.pool.contains(addr) {
            return None;
        }

        let mut cursor = self.head;
        while let Some(header) = cursor {
            if BlockHeader::owns(header, addr) {
                // SAFETY: header is linked in the registry, hence live.
                let size = unsafe { (*header.as_ptr()).size };
                return Some(BlockRef::new(BlockHeader::data(header), size));
            }
            cursor = unsafe { (*header.as_ptr()).next };
        }
        None
    }

    /// Register an extra region to be scanned as roots on every cycle.
    ///
    /// Useful for globals, foreign stacks, or deterministic tests with stack
    /// scanning disabled. Regions are scanned word by word like the stack.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for reading `len` bytes until the region is
    /// removed with [`Heap::remove_root_region`] or the heap is dropped.
    pub unsafe fn add_root_region(&mut self, ptr: *const u8, len: usize) {
        self.extra_roots.push(RootRegion { ptr, len });
    }

    /// Remove a region previously registered with [`Heap::add_root_region`].
    ///
    /// Matches by the exact `ptr` passed at registration. Returns whether a
    /// region was removed.
    pub fn remove_root_region(&mut self, ptr: *const u8) -> bool {
        let before = self.extra_roots.len();
        self.extra_roots.retain(|r| !std::ptr::eq(r.ptr, ptr));
        self.extra_roots.len() != before
    }

    /// Number of blocks currently in the registry.
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.live_blocks
    }

    /// Sum of the data-region sizes of all registered blocks.
    #[must_use]
    pub const fn allocated_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Total arena capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Number of collection cycles this heap has run.
    #[must_use]
    pub const fn cycle_count(&self) -> usize {
        self.cycles
    }

    /// Statistics from the most recent cycle, if any has run.
    #[must_use]
    pub const fn last_cycle(&self) -> Option<CycleMetrics> {
        self.last_cycle
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("capacity", &self.capacity())
            .field("blocks", &self.live_blocks)
            .field("bytes", &self.live_bytes)
            .field("cycles", &self.cycles)
            .field("scan_stack", &self.scan_stack)
            .finish_non_exhaustive()
    }
}
