//! Inline slot caches for named property access
//!
//! A cache sits at one `GetObjName`, `PutObjName` or `CallObjName`
//! instruction and maps the receiver's type to the slot the name resolved
//! to. Hits are checked against the receiver's slot name before use.

use arrayvec::ArrayVec;
use core_types::ValueId;

/// Most receiver types a polymorphic cache tracks
pub const POLYMORPHIC_ENTRIES: usize = 4;

/// Per-instruction slot cache
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InlineCache {
    /// Nothing cached yet
    #[default]
    Uninitialized,
    /// One receiver type seen
    Monomorphic {
        /// Receiver type
        type_id: ValueId,
        /// Slot the name resolved to
        slot: usize,
    },
    /// A few receiver types seen
    Polymorphic {
        /// (receiver type, slot) pairs
        entries: ArrayVec<(ValueId, usize), POLYMORPHIC_ENTRIES>,
    },
    /// Too many receiver types; always look the name up
    Megamorphic,
}

impl InlineCache {
    /// Create an empty cache
    pub fn new() -> Self {
        InlineCache::Uninitialized
    }

    /// Slot cached for receivers of `type_id`
    pub fn lookup(&self, type_id: ValueId) -> Option<usize> {
        match self {
            InlineCache::Monomorphic { type_id: cached, slot } if *cached == type_id => Some(*slot),
            InlineCache::Polymorphic { entries } => entries
                .iter()
                .find(|(cached, _)| *cached == type_id)
                .map(|(_, slot)| *slot),
            _ => None,
        }
    }

    /// Records a resolution.
    ///
    /// Uninitialized becomes monomorphic, a second type makes it
    /// polymorphic, and a fifth type makes it megamorphic for good.
    pub fn update(&mut self, type_id: ValueId, slot: usize) {
        match self {
            InlineCache::Uninitialized => {
                *self = InlineCache::Monomorphic { type_id, slot };
            }
            InlineCache::Monomorphic {
                type_id: cached,
                slot: cached_slot,
            } => {
                if *cached == type_id {
                    *cached_slot = slot;
                } else {
                    let mut entries = ArrayVec::new();
                    entries.push((*cached, *cached_slot));
                    entries.push((type_id, slot));
                    *self = InlineCache::Polymorphic { entries };
                }
            }
            InlineCache::Polymorphic { entries } => {
                if let Some(entry) = entries.iter_mut().find(|(cached, _)| *cached == type_id) {
                    entry.1 = slot;
                } else if entries.try_push((type_id, slot)).is_err() {
                    *self = InlineCache::Megamorphic;
                }
            }
            InlineCache::Megamorphic => {}
        }
    }

    /// Returns true once the cache has given up
    pub fn is_megamorphic(&self) -> bool {
        matches!(self, InlineCache::Megamorphic)
    }
}
