//! Collector configuration and the host memory notifier.

use serde::{Deserialize, Serialize};

/// Tuning knobs for allocation and collection.
///
/// # Examples
///
/// ```
/// use memory_manager::GcConfig;
///
/// let config = GcConfig {
///     work_quota: 100,
///     ..GcConfig::default()
/// };
/// assert!(config.enabled);
/// assert!(config.redline <= config.max_memory);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Whether quota-driven collection is requested at all
    pub enabled: bool,
    /// Allocations between requested collections
    pub work_quota: usize,
    /// Memory level that triggers a pool prune after a collection
    pub redline: usize,
    /// Hard memory limit
    pub max_memory: usize,
    /// Most free blocks kept in one type's pool
    pub max_type_pool: usize,
    /// Collections a young value survives before promotion
    pub promotion_age: u8,
    /// Idle time before an idle-time collection is considered
    pub min_idle_ms: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            work_quota: 1000,
            redline: 48 * 1024 * 1024,
            max_memory: 64 * 1024 * 1024,
            max_type_pool: 128,
            promotion_age: 2,
            min_idle_ms: 300,
        }
    }
}

/// Answer of the host when an allocation would pass the memory limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDecision {
    /// Raise the limit to the given number of bytes
    Grant(usize),
    /// Refuse; the allocation fails with a memory error
    Deny,
}

/// Host hook consulted before an allocation is refused.
pub trait MemoryNotifier {
    /// Called when `requested` more bytes would exceed `limit`.
    fn memory_exhausted(&mut self, requested: usize, limit: usize) -> MemoryDecision;
}

impl<F> MemoryNotifier for F
where
    F: FnMut(usize, usize) -> MemoryDecision,
{
    fn memory_exhausted(&mut self, requested: usize, limit: usize) -> MemoryDecision {
        self(requested, limit)
    }
}
