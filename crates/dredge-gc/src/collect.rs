//! The collection cycle: mark everything reachable, sweep the rest.
//!
//! Marking is worklist-driven. Roots (the call stack and any registered
//! regions) seed the worklist; draining it scans each marked block's data for
//! further candidates. A block already marked is never pushed again, so
//! cycles in the block graph terminate naturally. The sweep then walks the
//! registry once, unlinking and releasing every unmarked block.

use std::ptr::NonNull;

use crate::block::BlockHeader;
use crate::heap::Heap;
use crate::metrics::{CycleMetrics, PhaseTimer};
use crate::pool::Pool;
use crate::scan;
use crate::stack;

/// Mark-phase state: the worklist of marked-but-unscanned blocks.
struct Marker<'a> {
    pool: &'a Pool,
    head: Option<NonNull<BlockHeader>>,
    worklist: Vec<NonNull<BlockHeader>>,
    words_scanned: usize,
    blocks_marked: usize,
}

impl Marker<'_> {
    /// Treat one scanned word as a candidate address.
    ///
    /// Null and out-of-arena values are discarded before the registry walk,
    /// which keeps the common case (a word that is not a heap pointer) cheap.
    fn visit(&mut self, candidate: usize) {
        self.words_scanned += 1;
        if candidate == 0 || !self.pool.contains(candidate) {
            return;
        }

        let mut cursor = self.head;
        while let Some(header) = cursor {
            // SAFETY: every registry header is live; sweep has not run yet.
            unsafe {
                if BlockHeader::owns(header, candidate) {
                    if !(*header.as_ptr()).marked {
                        (*header.as_ptr()).marked = true;
                        self.blocks_marked += 1;
                        self.worklist.push(header);
                    }
                    return;
                }
                cursor = (*header.as_ptr()).next;
            }
        }
    }

    /// Scan the data of every worklist block, transitively.
    fn drain(&mut self) {
        while let Some(header) = self.worklist.pop() {
            // SAFETY: header came off the registry during this mark phase.
            let size = unsafe { (*header.as_ptr()).size };
            let data = BlockHeader::data(header);
            // SAFETY: the data region is `size` readable bytes owned by the
            // arena.
            unsafe {
                scan::scan_region(data.as_ptr(), size, &mut |w| self.visit(w));
            }
        }
    }
}

impl Heap {
    /// Run one full collection cycle.
    ///
    /// Every block not reachable from the root set is returned to the arena.
    /// Survivors keep their addresses and contents; their mark flags are
    /// cleared for the next cycle.
    pub fn collect(&mut self) {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::trace_cycle(crate::tracing::next_cycle_id(), self.live_blocks);

        let mut timer = PhaseTimer::new();

        #[cfg(feature = "tracing")]
        crate::tracing::log_phase_start(crate::tracing::CyclePhase::Mark);
        timer.start();
        let (words_scanned, blocks_marked) = self.mark();
        timer.end_mark();
        #[cfg(feature = "tracing")]
        crate::tracing::log_phase_end(crate::tracing::CyclePhase::Mark, blocks_marked);
        #[cfg(not(feature = "tracing"))]
        let _ = blocks_marked;

        #[cfg(feature = "tracing")]
        crate::tracing::log_phase_start(crate::tracing::CyclePhase::Sweep);
        timer.start();
        let (blocks_reclaimed, bytes_reclaimed) = self.sweep();
        timer.end_sweep();
        #[cfg(feature = "tracing")]
        crate::tracing::log_phase_end(crate::tracing::CyclePhase::Sweep, blocks_reclaimed);

        self.cycles += 1;
        self.last_cycle = Some(CycleMetrics {
            duration: timer.total(),
            mark_duration: timer.mark_duration(),
            sweep_duration: timer.sweep_duration(),
            bytes_reclaimed,
            blocks_reclaimed,
            bytes_surviving: self.live_bytes,
            blocks_surviving: self.live_blocks,
            words_scanned,
        });
    }

    /// Mark phase. Returns (words scanned, blocks marked).
    fn mark(&mut self) -> (usize, usize) {
        let mut marker = Marker {
            pool: &self.pool,
            head: self.head,
            worklist: Vec::new(),
            words_scanned: 0,
            blocks_marked: 0,
        };

        // Stack roots. Miri has no scannable stack, so the heap degrades to
        // registered regions only. Registers are not scanned; a pointer held
        // nowhere in memory can be lost.
        if self.scan_stack && !cfg!(miri) {
            let sp = stack::approximate_stack_pointer();
            let floor = self.root_floor;
            let (mut lo, mut hi) = if sp <= floor { (sp, floor) } else { (floor, sp) };
            if let Some(b) = self.bounds {
                lo = lo.max(b.top);
                hi = hi.min(b.bottom);
            }
            if lo < hi {
                // SAFETY: [lo, hi) lies within the current thread's own
                // stack, which is mapped and readable.
                unsafe {
                    scan::scan_region(lo as *const u8, hi - lo, &mut |w| marker.visit(w));
                }
            }
        }

        for region in &self.extra_roots {
            // SAFETY: add_root_region's contract keeps the region readable
            // until removal.
            unsafe {
                scan::scan_region(region.ptr, region.len, &mut |w| marker.visit(w));
            }
        }

        marker.drain();
        (marker.words_scanned, marker.blocks_marked)
    }

    /// Sweep phase. Returns (blocks reclaimed, bytes reclaimed).
    fn sweep(&mut self) -> (usize, usize) {
        let mut blocks_reclaimed = 0;
        let mut bytes_reclaimed = 0;

        let mut link: *mut Option<NonNull<BlockHeader>> = &raw mut self.head;
        // SAFETY: link always points at a live link slot (the head field or a
        // registry header's next field); unlinked headers are rewritten only
        // after they leave the list.
        unsafe {
            while let Some(header) = *link {
                let hp = header.as_ptr();
                if (*hp).marked {
                    (*hp).marked = false;
                    link = &raw mut (*hp).next;
                } else {
                    let size = (*hp).size;
                    *link = (*hp).next;

                    #[cfg(feature = "tracing")]
                    crate::tracing::log_reclaim(size);

                    let footprint = BlockHeader::footprint(size)
                        .expect("block footprint fit when it was allocated");
                    self.pool.release(header.cast::<u8>(), footprint);
                    blocks_reclaimed += 1;
                    bytes_reclaimed += size;
                }
            }
        }

        self.live_blocks -= blocks_reclaimed;
        self.live_bytes -= bytes_reclaimed;
        (blocks_reclaimed, bytes_reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use crate::heap::{Heap, HeapConfig};

    fn quiet_heap() -> Heap {
        Heap::with_config(HeapConfig::new().capacity(256 * 1024).scan_stack(false))
            .expect("failed to map heap")
    }

    #[test]
    fn unrooted_blocks_are_reclaimed() {
        let mut heap = quiet_heap();
        heap.alloc(64).expect("alloc failed");
        heap.alloc(64).expect("alloc failed");
        assert_eq!(heap.block_count(), 2);

        heap.collect();
        assert_eq!(heap.block_count(), 0);
        assert_eq!(heap.allocated_bytes(), 0);

        let metrics = heap.last_cycle().expect("cycle ran");
        assert_eq!(metrics.blocks_reclaimed, 2);
        assert_eq!(metrics.bytes_reclaimed, 128);
    }

    #[test]
    fn rooted_block_survives_and_mark_is_cleared() {
        let mut heap = quiet_heap();
        let p = heap.alloc(32).expect("alloc failed");

        let slot: usize = p.as_ptr() as usize;
        unsafe {
            heap.add_root_region(
                std::ptr::addr_of!(slot).cast::<u8>(),
                std::mem::size_of::<usize>(),
            );
        }

        heap.collect();
        assert_eq!(heap.block_count(), 1);
        // A second cycle must re-derive reachability, not inherit the flag.
        heap.collect();
        assert_eq!(heap.block_count(), 1);

        heap.remove_root_region(std::ptr::addr_of!(slot).cast::<u8>());
        heap.collect();
        assert_eq!(heap.block_count(), 0);
    }

    #[test]
    fn interior_pointer_keeps_block_alive() {
        let mut heap = quiet_heap();
        let p = heap.alloc(100).expect("alloc failed");

        let interior: usize = p.as_ptr() as usize + 50;
        unsafe {
            heap.add_root_region(
                std::ptr::addr_of!(interior).cast::<u8>(),
                std::mem::size_of::<usize>(),
            );
        }

        heap.collect();
        assert_eq!(heap.block_count(), 1);
    }

    #[test]
    fn reachability_is_transitive() {
        let mut heap = quiet_heap();
        // c <- b <- a <- root; d unreachable.
        let c = heap.alloc(16).expect("alloc failed");
        let b = heap.alloc(16).expect("alloc failed");
        let a = heap.alloc(16).expect("alloc failed");
        heap.alloc(16).expect("alloc failed");

        unsafe {
            a.as_ptr().cast::<usize>().write(b.as_ptr() as usize);
            b.as_ptr().cast::<usize>().write(c.as_ptr() as usize);
        }

        let root: usize = a.as_ptr() as usize;
        unsafe {
            heap.add_root_region(
                std::ptr::addr_of!(root).cast::<u8>(),
                std::mem::size_of::<usize>(),
            );
        }

        heap.collect();
        assert_eq!(heap.block_count(), 3);
        assert!(heap.find_block(c.as_ptr()).is_some());
    }

    #[test]
    fn cyclic_blocks_terminate_and_are_collected_when_unrooted() {
        let mut heap = quiet_heap();
        let a = heap.alloc(16).expect("alloc failed");
        let b = heap.alloc(16).expect("alloc failed");

        unsafe {
            a.as_ptr().cast::<usize>().write(b.as_ptr() as usize);
            b.as_ptr().cast::<usize>().write(a.as_ptr() as usize);
        }

        let root: usize = a.as_ptr() as usize;
        unsafe {
            heap.add_root_region(
                std::ptr::addr_of!(root).cast::<u8>(),
                std::mem::size_of::<usize>(),
            );
        }
        heap.collect();
        assert_eq!(heap.block_count(), 2);

        heap.remove_root_region(std::ptr::addr_of!(root).cast::<u8>());
        heap.collect();
        assert_eq!(heap.block_count(), 0);
    }

    #[test]
    fn collect_on_empty_heap_is_a_noop() {
        let mut heap = quiet_heap();
        heap.collect();
        assert_eq!(heap.block_count(), 0);
        assert_eq!(heap.cycle_count(), 1);
        let metrics = heap.last_cycle().expect("cycle ran");
        assert_eq!(metrics.blocks_reclaimed, 0);
    }

    #[test]
    fn survivor_contents_are_untouched() {
        let mut heap = quiet_heap();
        let p = heap.alloc(64).expect("alloc failed");
        unsafe {
            for i in 0..64 {
                p.as_ptr().add(i).write(0xa5);
            }
        }

        let root: usize = p.as_ptr() as usize;
        unsafe {
            heap.add_root_region(
                std::ptr::addr_of!(root).cast::<u8>(),
                std::mem::size_of::<usize>(),
            );
        }
        heap.collect();

        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0xa5));
    }
}
