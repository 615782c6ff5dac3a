//! Memory Manager - slot storage, generational heap and garbage collection
//!
//! This component provides:
//! - Slot/property tables with a lazily built, namespace-blind hash index
//! - A generational heap arena addressed by value handles
//! - Per-type recycle pools with allocation statistics
//! - Stop-the-world mark-sweep collection with red-line pool pruning
//!
//! # Example
//!
//! ```
//! use memory_manager::{Disposal, GcConfig, Generation, Heap};
//!
//! let mut heap: Heap<Vec<core_types::ValueId>> = Heap::new(GcConfig::default());
//! let kept = heap.allocate(1, 16, true, |_| Vec::new()).unwrap();
//! let dropped = heap.allocate(1, 16, true, |_| Vec::new()).unwrap();
//!
//! heap.collect(
//!     Generation::New,
//!     &[kept],
//!     |children, out| out.extend(children.iter().copied()),
//!     |_| Disposal::Pool,
//! );
//!
//! assert!(heap.contains(kept));
//! assert!(!heap.contains(dropped));
//! assert_eq!(heap.pool_count(1), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod gc;
pub mod heap;
mod pool;
pub mod slots;

// Re-export main types
pub use config::{GcConfig, MemoryDecision, MemoryNotifier};
pub use gc::{Disposal, GcCycle};
pub use heap::{BlockState, GcStats, Generation, Heap, PoolKey};
pub use pool::PoolStats;
pub use slots::{NameTable, SlotTable, HASH_MIN_PROP, LOTSA_PROP, NUM_PROP};
