//! Stop-the-world mark-sweep collection over the generational heap.
//!
//! A cycle resets every mark, marks from the caller's roots plus every
//! permanent value and every value in a generation older than the one being
//! collected, then sweeps the collected generations oldest first. Swept
//! blocks go back to their type's pool while it has room, otherwise they are
//! released. When memory stays above the red line the pools are flushed; if
//! it is still above the hard limit the heap enters degraded mode.

use crate::heap::{BlockState, Generation, Heap};
use core_types::ValueId;

/// What a type's destroy hook wants done with a swept block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// Keep the block in the type's pool for reuse
    Pool,
    /// Release the block to the general allocator
    Release,
}

/// Summary of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcCycle {
    /// Values found reachable
    pub marked: usize,
    /// Values destroyed
    pub swept: usize,
    /// Destroyed values parked in pools
    pub pooled: usize,
    /// Blocks released, pool flushes included
    pub released: usize,
    /// Values promoted to the old generation
    pub promoted: usize,
    /// Whether the red line forced a pool flush
    pub pruned: bool,
    /// Whether memory stayed above the hard limit
    pub exhausted: bool,
}

impl<T> Heap<T> {
    /// Runs one collection of every generation up to `max_generation`.
    ///
    /// # Arguments
    ///
    /// * `max_generation` - Oldest generation to sweep (eternal is never swept)
    /// * `roots` - Handles the caller keeps alive
    /// * `trace` - Pushes the handles a value keeps alive
    /// * `dispose` - Destroys a swept value and chooses its disposal
    ///
    /// # Returns
    ///
    /// `None` when a collection is already running.
    pub fn collect<M, D>(
        &mut self,
        max_generation: Generation,
        roots: &[ValueId],
        mut trace: M,
        mut dispose: D,
    ) -> Option<GcCycle>
    where
        M: FnMut(&T, &mut Vec<ValueId>),
        D: FnMut(&mut T) -> Disposal,
    {
        if self.collecting {
            return None;
        }
        self.collecting = true;
        let mut cycle = GcCycle::default();

        let mut work: Vec<ValueId> = roots.to_vec();
        for (index, block) in self.blocks.iter_mut().enumerate() {
            let Some(block) = block else { continue };
            block.marked = false;
            if let BlockState::InGeneration(generation) = block.state {
                if block.permanent
                    || generation == Generation::Eternal
                    || generation > max_generation
                {
                    work.push(ValueId(index as u32));
                }
            }
        }

        let mut children = Vec::new();
        while let Some(id) = work.pop() {
            let Some(Some(block)) = self.blocks.get_mut(id.index()) else {
                continue;
            };
            if block.marked || !matches!(block.state, BlockState::InGeneration(_)) {
                continue;
            }
            block.marked = true;
            cycle.marked += 1;
            trace(&block.value, &mut children);
            work.append(&mut children);
        }

        for generation in [Generation::Old, Generation::New] {
            if generation > max_generation {
                continue;
            }
            for index in 0..self.blocks.len() {
                let Some(block) = self.blocks[index].as_mut() else {
                    continue;
                };
                if block.state != BlockState::InGeneration(generation)
                    || block.marked
                    || block.permanent
                {
                    continue;
                }
                let disposal = dispose(&mut block.value);
                cycle.swept += 1;
                let key = block.pool_key;
                let pool = self.pools.entry(key).or_default();
                pool.note_disposed();
                if block.poolable
                    && disposal == Disposal::Pool
                    && pool.blocks.len() < self.config.max_type_pool
                {
                    block.state = BlockState::InPool(key);
                    pool.push(ValueId(index as u32));
                    cycle.pooled += 1;
                } else {
                    self.bytes_in_use -= block.size;
                    self.blocks[index] = None;
                    self.free.push(index as u32);
                    cycle.released += 1;
                }
            }
        }

        for block in self.blocks.iter_mut().flatten() {
            if block.marked && block.state == BlockState::InGeneration(Generation::New) {
                block.age = block.age.saturating_add(1);
                if block.age >= self.config.promotion_age {
                    block.state = BlockState::InGeneration(Generation::Old);
                    cycle.promoted += 1;
                }
            }
        }

        if self.bytes_in_use >= self.config.redline {
            log::warn!(
                "memory at {} bytes is over the red line of {} bytes, flushing pools",
                self.bytes_in_use,
                self.config.redline
            );
            cycle.released += self.prune_pools();
            cycle.pruned = true;
            self.stats.prunes += 1;
            if self.bytes_in_use > self.config.max_memory {
                log::warn!(
                    "memory at {} bytes is over the limit of {} bytes, entering degraded mode",
                    self.bytes_in_use,
                    self.config.max_memory
                );
                self.degraded = true;
                cycle.exhausted = true;
            }
        }

        self.stats.collections += 1;
        self.stats.swept += cycle.swept;
        self.stats.pooled += cycle.pooled;
        self.stats.released += cycle.released;
        self.stats.promoted += cycle.promoted;
        self.work_done = 0;
        self.gc_required = false;
        self.collecting = false;

        log::debug!(
            "gc {:?}: marked {}, swept {}, pooled {}, released {}, promoted {}",
            max_generation,
            cycle.marked,
            cycle.swept,
            cycle.pooled,
            cycle.released,
            cycle.promoted
        );
        Some(cycle)
    }

    /// Releases every pooled block; returns how many were released.
    pub fn prune_pools(&mut self) -> usize {
        let mut released = 0;
        for pool in self.pools.values_mut() {
            for id in pool.drain() {
                if let Some(block) = self.blocks[id.index()].take() {
                    self.bytes_in_use -= block.size;
                    self.free.push(id.0);
                    released += 1;
                }
            }
        }
        released
    }

    /// Whether an idle-time collection is worthwhile.
    ///
    /// True once the work counter is within 50 allocations of the quota and
    /// the caller has been idle for at least the configured time.
    pub fn is_time_for_gc(&self, idle_ms: u64) -> bool {
        self.config.enabled
            && !self.collecting
            && self.work_done + 50 >= self.config.work_quota
            && idle_ms >= self.config.min_idle_ms
    }
}
