//! Generational heap arena with per-type pools.
//!
//! Every value lives in one arena block addressed by a [`ValueId`]. A block
//! is either a member of a generation (live, visible through [`Heap::get`])
//! or parked in its type's pool waiting to be reused; [`BlockState`] makes
//! the two memberships mutually exclusive.

use crate::config::{GcConfig, MemoryDecision, MemoryNotifier};
use crate::pool::{Pool, PoolStats};
use core_types::{ValueId, VmError, VmResult};
use std::collections::HashMap;
use std::fmt;

/// Key of a per-type pool (the owning type's numeric id).
pub type PoolKey = u32;

/// Age partition of the heap.
///
/// Ordered youngest to oldest; the eternal generation is never swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Generation {
    /// Newly allocated values
    New,
    /// Values that survived several collections
    Old,
    /// Bootstrap and module values; never swept
    Eternal,
}

/// Where a heap block currently belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Live member of a generation
    InGeneration(Generation),
    /// Free block waiting in a type pool
    InPool(PoolKey),
}

pub(crate) struct Block<T> {
    pub(crate) value: T,
    pub(crate) state: BlockState,
    pub(crate) marked: bool,
    pub(crate) permanent: bool,
    pub(crate) age: u8,
    pub(crate) size: usize,
    pub(crate) pool_key: PoolKey,
    pub(crate) poolable: bool,
}

/// Cumulative collector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Allocations served (fresh or pooled)
    pub allocations: usize,
    /// Completed collections
    pub collections: usize,
    /// Values destroyed by sweeps
    pub swept: usize,
    /// Swept values returned to pools
    pub pooled: usize,
    /// Blocks released to the general allocator
    pub released: usize,
    /// Values promoted to the old generation
    pub promoted: usize,
    /// Red-line pool flushes
    pub prunes: usize,
}

/// Arena of heap values with generations and per-type pools.
pub struct Heap<T> {
    pub(crate) blocks: Vec<Option<Block<T>>>,
    pub(crate) free: Vec<u32>,
    pub(crate) pools: HashMap<PoolKey, Pool>,
    pub(crate) config: GcConfig,
    pub(crate) stats: GcStats,
    pub(crate) work_done: usize,
    pub(crate) gc_required: bool,
    pub(crate) collecting: bool,
    pub(crate) degraded: bool,
    pub(crate) bytes_in_use: usize,
    alloc_generation: Generation,
    notifier: Option<Box<dyn MemoryNotifier>>,
}

impl<T> fmt::Debug for Heap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.live_count())
            .field("pools", &self.pools.len())
            .field("bytes_in_use", &self.bytes_in_use)
            .field("work_done", &self.work_done)
            .field("gc_required", &self.gc_required)
            .field("degraded", &self.degraded)
            .finish()
    }
}

impl<T> Heap<T> {
    /// Creates an empty heap.
    pub fn new(config: GcConfig) -> Self {
        Self {
            blocks: Vec::new(),
            free: Vec::new(),
            pools: HashMap::new(),
            config,
            stats: GcStats::default(),
            work_done: 0,
            gc_required: false,
            collecting: false,
            degraded: false,
            bytes_in_use: 0,
            alloc_generation: Generation::New,
            notifier: None,
        }
    }

    /// Installs the host memory notifier.
    pub fn set_notifier(&mut self, notifier: Box<dyn MemoryNotifier>) {
        self.notifier = Some(notifier);
    }

    /// Allocates a value.
    ///
    /// A poolable allocation first tries the pool under `pool_key`; `init`
    /// then receives the recycled value to reinitialize. Otherwise `init`
    /// receives `None` and a fresh block joins the current generation.
    ///
    /// # Returns
    ///
    /// The new handle, or a `MemoryError` when a fresh block would pass the
    /// memory limit and the notifier does not grant more.
    pub fn allocate<F>(
        &mut self,
        pool_key: PoolKey,
        size: usize,
        poolable: bool,
        init: F,
    ) -> VmResult<ValueId>
    where
        F: FnOnce(Option<T>) -> T,
    {
        let generation = self.alloc_generation;
        if poolable {
            let recycled = self.pools.get_mut(&pool_key).and_then(|pool| pool.pop());
            if let Some(id) = recycled {
                if let Some(block) = self.blocks[id.index()].take() {
                    self.blocks[id.index()] = Some(Block {
                        value: init(Some(block.value)),
                        state: BlockState::InGeneration(generation),
                        marked: false,
                        permanent: false,
                        age: 0,
                        size: block.size,
                        pool_key,
                        poolable,
                    });
                    self.note_allocation(pool_key);
                    return Ok(id);
                }
            }
        }

        self.reserve(size)?;

        let block = Block {
            value: init(None),
            state: BlockState::InGeneration(generation),
            marked: false,
            permanent: false,
            age: 0,
            size,
            pool_key,
            poolable,
        };
        let id = match self.free.pop() {
            Some(index) => {
                self.blocks[index as usize] = Some(block);
                ValueId(index)
            }
            None => {
                self.blocks.push(Some(block));
                ValueId((self.blocks.len() - 1) as u32)
            }
        };
        self.bytes_in_use += size;
        self.note_allocation(pool_key);
        Ok(id)
    }

    /// Checks that `size` more bytes fit under the memory limit, asking the
    /// notifier for a new limit when they do not.
    fn reserve(&mut self, size: usize) -> VmResult<()> {
        let needed = self.bytes_in_use.saturating_add(size);
        if needed <= self.config.max_memory {
            return Ok(());
        }
        let limit = self.config.max_memory;
        let decision = match self.notifier.as_mut() {
            Some(notifier) => notifier.memory_exhausted(size, limit),
            None => MemoryDecision::Deny,
        };
        match decision {
            MemoryDecision::Grant(new_limit) if new_limit >= needed => {
                log::debug!("memory limit raised from {} to {} bytes", limit, new_limit);
                self.config.max_memory = new_limit;
                Ok(())
            }
            _ => Err(VmError::memory(format!("Memory limit of {} bytes exceeded", limit))),
        }
    }

    /// Changes the number of bytes charged for a live value.
    ///
    /// Growth is checked against the memory limit like a fresh allocation
    /// and leaves the charge unchanged when denied.
    pub fn resize(&mut self, id: ValueId, size: usize) -> VmResult<()> {
        let current = match self.live_block(id) {
            Some(block) => block.size,
            None => return Err(VmError::internal(format!("No live value {}", id.0))),
        };
        if size > current {
            self.reserve(size - current)?;
            self.bytes_in_use += size - current;
        } else {
            self.bytes_in_use -= current - size;
        }
        if let Some(Some(block)) = self.blocks.get_mut(id.index()) {
            block.size = size;
        }
        Ok(())
    }

    fn note_allocation(&mut self, pool_key: PoolKey) {
        self.pools.entry(pool_key).or_default().note_allocated();
        self.stats.allocations += 1;
        self.work_done += 1;
        if self.config.enabled && self.work_done >= self.config.work_quota {
            self.gc_required = true;
        }
    }

    fn live_block(&self, id: ValueId) -> Option<&Block<T>> {
        self.blocks
            .get(id.index())?
            .as_ref()
            .filter(|block| matches!(block.state, BlockState::InGeneration(_)))
    }

    /// Borrows a live value.
    pub fn get(&self, id: ValueId) -> Option<&T> {
        self.live_block(id).map(|block| &block.value)
    }

    /// Mutably borrows a live value.
    pub fn get_mut(&mut self, id: ValueId) -> Option<&mut T> {
        self.blocks
            .get_mut(id.index())?
            .as_mut()
            .filter(|block| matches!(block.state, BlockState::InGeneration(_)))
            .map(|block| &mut block.value)
    }

    /// Returns true if `id` names a live value.
    pub fn contains(&self, id: ValueId) -> bool {
        self.live_block(id).is_some()
    }

    /// Membership of a block, or `None` once released.
    pub fn state(&self, id: ValueId) -> Option<BlockState> {
        self.blocks.get(id.index())?.as_ref().map(|block| block.state)
    }

    /// Flags a live value as permanent (never swept).
    pub fn set_permanent(&mut self, id: ValueId, permanent: bool) {
        if let Some(Some(block)) = self.blocks.get_mut(id.index()) {
            block.permanent = permanent;
        }
    }

    /// Returns true for permanent values.
    pub fn is_permanent(&self, id: ValueId) -> bool {
        self.live_block(id).is_some_and(|block| block.permanent)
    }

    /// Flags every eternal value as permanent.
    pub fn make_eternal_permanent(&mut self) {
        for block in self.blocks.iter_mut().flatten() {
            if block.state == BlockState::InGeneration(Generation::Eternal) {
                block.permanent = true;
            }
        }
    }

    /// Generation new values are allocated into.
    pub fn alloc_generation(&self) -> Generation {
        self.alloc_generation
    }

    /// Switches the generation new values are allocated into.
    pub fn set_alloc_generation(&mut self, generation: Generation) -> Generation {
        std::mem::replace(&mut self.alloc_generation, generation)
    }

    /// Handles of every live value.
    pub fn live_ids(&self) -> Vec<ValueId> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| {
                block
                    .as_ref()
                    .is_some_and(|b| matches!(b.state, BlockState::InGeneration(_)))
            })
            .map(|(index, _)| ValueId(index as u32))
            .collect()
    }

    /// Iterates live values with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &T)> + '_ {
        self.blocks.iter().enumerate().filter_map(|(index, block)| {
            block
                .as_ref()
                .filter(|b| matches!(b.state, BlockState::InGeneration(_)))
                .map(|b| (ValueId(index as u32), &b.value))
        })
    }

    /// Number of live values.
    pub fn live_count(&self) -> usize {
        self.blocks
            .iter()
            .flatten()
            .filter(|block| matches!(block.state, BlockState::InGeneration(_)))
            .count()
    }

    /// Number of live values in one generation.
    pub fn live_count_in(&self, generation: Generation) -> usize {
        self.blocks
            .iter()
            .flatten()
            .filter(|block| block.state == BlockState::InGeneration(generation))
            .count()
    }

    /// Free blocks waiting in a type's pool.
    pub fn pool_count(&self, pool_key: PoolKey) -> usize {
        self.pools.get(&pool_key).map_or(0, |pool| pool.blocks.len())
    }

    /// Counters of a type's pool.
    pub fn pool_stats(&self, pool_key: PoolKey) -> PoolStats {
        self.pools
            .get(&pool_key)
            .map(|pool| pool.stats)
            .unwrap_or_default()
    }

    /// Checks that every pooled block sits in exactly one pool list and no
    /// generation member appears in any pool list.
    pub fn verify_disjoint(&self) -> bool {
        let mut seen = vec![false; self.blocks.len()];
        for (key, pool) in &self.pools {
            for id in &pool.blocks {
                let Some(Some(block)) = self.blocks.get(id.index()) else {
                    return false;
                };
                if block.state != BlockState::InPool(*key) || seen[id.index()] {
                    return false;
                }
                seen[id.index()] = true;
            }
        }
        self.blocks.iter().enumerate().all(|(index, block)| match block {
            Some(b) => match b.state {
                BlockState::InPool(_) => seen[index],
                BlockState::InGeneration(_) => !seen[index],
            },
            None => !seen[index],
        })
    }

    /// Collector configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Mutable collector configuration.
    pub fn config_mut(&mut self) -> &mut GcConfig {
        &mut self.config
    }

    /// Cumulative counters.
    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Bytes held by live and pooled blocks.
    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    /// Allocations since the last collection.
    pub fn work_done(&self) -> usize {
        self.work_done
    }

    /// True once the work quota has been crossed.
    pub fn gc_required(&self) -> bool {
        self.gc_required
    }

    /// Requests a collection at the next safe point.
    pub fn request_gc(&mut self) {
        self.gc_required = true;
    }

    /// True while a collection runs.
    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    /// Enables or disables quota-driven collection requests.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// True once memory could not be brought under the hard limit.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Enters degraded mode.
    pub fn set_degraded(&mut self) {
        self.degraded = true;
    }
}
