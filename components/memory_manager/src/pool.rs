//! Per-type recycle pools.

use core_types::ValueId;

/// Counters kept for one type's pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live values of the type
    pub allocated: usize,
    /// Highest number of live values seen
    pub peak_allocated: usize,
    /// Free blocks currently in the pool
    pub count: usize,
    /// Highest number of free blocks seen
    pub peak_count: usize,
    /// Allocations served from the pool
    pub reuse: usize,
}

/// Free list of recycled blocks for one concrete type.
#[derive(Debug, Default)]
pub(crate) struct Pool {
    pub(crate) blocks: Vec<ValueId>,
    pub(crate) stats: PoolStats,
}

impl Pool {
    pub(crate) fn push(&mut self, id: ValueId) {
        self.blocks.push(id);
        self.stats.count = self.blocks.len();
        self.stats.peak_count = self.stats.peak_count.max(self.stats.count);
    }

    pub(crate) fn pop(&mut self) -> Option<ValueId> {
        let id = self.blocks.pop()?;
        self.stats.count = self.blocks.len();
        self.stats.reuse += 1;
        Some(id)
    }

    pub(crate) fn note_allocated(&mut self) {
        self.stats.allocated += 1;
        self.stats.peak_allocated = self.stats.peak_allocated.max(self.stats.allocated);
    }

    pub(crate) fn note_disposed(&mut self) {
        self.stats.allocated = self.stats.allocated.saturating_sub(1);
    }

    pub(crate) fn drain(&mut self) -> Vec<ValueId> {
        self.stats.count = 0;
        std::mem::take(&mut self.blocks)
    }
}
