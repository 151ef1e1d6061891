//! A conservative, stack-scanning, mark-and-sweep heap.
//!
//! `dredge-gc` hands out raw blocks that are never explicitly freed. When the
//! arena runs dry (or on demand), a collection cycle scans the call stack
//! word by word, treats anything that looks like a block address as a root,
//! marks everything transitively reachable through block contents, and
//! returns the rest to the arena.
//!
//! # Design
//!
//! - **Conservative**: no type information. Any word whose value falls inside
//!   a live block's data region keeps that block alive, including interior
//!   pointers. Integers that happen to look like block addresses cause
//!   retention, never corruption.
//! - **Non-moving**: survivors keep their addresses and contents across
//!   cycles.
//! - **Single-threaded**: a [`Heap`] is tied to the thread that created it;
//!   its call stack is the root set.
//!
//! # Quick Start
//!
//! ```
//! use dredge_gc::{Heap, HeapConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut heap = Heap::with_config(HeapConfig::new().capacity(1024 * 1024))?;
//!
//! let block = heap.alloc(64)?;
//! assert!(heap.find_block(block.as_ptr()).is_some());
//!
//! // While `block` is on the stack, a cycle will not reclaim it.
//! heap.collect();
//! assert!(heap.find_block(block.as_ptr()).is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Deterministic mode
//!
//! Stack scanning makes reclamation depend on whatever the stack happens to
//! hold, which is the wrong default for tests. Disable it and register roots
//! explicitly:
//!
//! ```
//! use dredge_gc::{Heap, HeapConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut heap = Heap::with_config(HeapConfig::new().scan_stack(false))?;
//! let block = heap.alloc(32)?;
//!
//! heap.collect();
//! assert_eq!(heap.block_count(), 0);
//! # let _ = block;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod block;
mod collect;
mod heap;
mod metrics;
mod pool;
mod scan;
mod stack;
#[cfg(feature = "tracing")]
mod tracing;

pub use block::BlockRef;
pub use heap::{Heap, HeapConfig, OutOfMemory, DEFAULT_CAPACITY};
pub use metrics::CycleMetrics;
