//! Conservative word-by-word scanning of memory regions.
//!
//! Every pointer-aligned word in a region is treated as a candidate heap
//! address and handed to a visitor. The only unsafe reads in the crate that
//! touch memory the collector does not own happen here.

use crate::block::WORD;

/// Scan `region_len` bytes starting at `region_ptr`, feeding every aligned
/// word to `visit` as a candidate address.
///
/// The start is rounded up to word alignment and the tail that cannot hold a
/// full word is skipped, so a misaligned or undersized region degrades to a
/// smaller scan rather than a misaligned read.
///
/// # Safety
///
/// `region_ptr` must be valid for reading `region_len` bytes for the duration
/// of the call. The visitor receives plain integers; it must not turn them
/// into references to memory it does not know to be live.
pub(crate) unsafe fn scan_region(
    region_ptr: *const u8,
    region_len: usize,
    visit: &mut impl FnMut(usize),
) {
    if region_ptr.is_null() || region_len == 0 {
        return;
    }

    let mut current = region_ptr as usize;
    let Some(end) = current.checked_add(region_len) else {
        return;
    };

    if current % WORD != 0 {
        current += WORD - (current % WORD);
    }

    while current + WORD <= end {
        // SAFETY: current is word-aligned and inside the caller's region. The
        // value is read as an integer, never dereferenced here.
        let candidate = unsafe { (current as *const usize).read() };
        visit(candidate);
        current += WORD;
    }
}
