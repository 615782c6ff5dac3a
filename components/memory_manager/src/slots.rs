//! Slot/property storage shared by objects, blocks and types.
//!
//! A [`SlotTable`] is a dense array of values addressed by slot number, plus
//! an optional [`NameTable`] giving each slot a qualified name. Once the slot
//! count passes [`HASH_MIN_PROP`] the name table grows a hash index over the
//! *name* portion of each qualified name; the namespace takes part only in
//! the equality check made while walking a bucket chain.
//!
//! Name tables are reference counted. Cloning a slot table shares its names
//! with the clone; the first change to either side's names gives that side a
//! private copy.

use core_types::{QualifiedName, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Slot count above which a hash index is built.
pub const HASH_MIN_PROP: usize = 8;

/// Capacity granularity.
pub const NUM_PROP: usize = 8;

/// Capacity above which tables grow in proportional chunks.
pub const LOTSA_PROP: usize = 256;

const HASH_SIZES: [usize; 19] = [
    19, 29, 59, 79, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613,
    393241, 786433, 1572869,
];

fn hash_size(count: usize) -> usize {
    HASH_SIZES
        .iter()
        .copied()
        .find(|size| count < *size)
        .unwrap_or(HASH_SIZES[HASH_SIZES.len() - 1])
}

fn bucket_of(name: &str, buckets: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    (hasher.finish() % buckets as u64) as usize
}

fn round_up(n: usize) -> usize {
    n.div_ceil(NUM_PROP) * NUM_PROP
}

#[derive(Debug, Clone, Default, PartialEq)]
struct NameEntry {
    qname: QualifiedName,
    next: Option<usize>,
}

/// Per-slot qualified names with an optional hash index.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    entries: Vec<NameEntry>,
    buckets: Vec<Option<usize>>,
}

impl NameTable {
    fn with_size(size: usize) -> Self {
        Self {
            entries: vec![NameEntry::default(); size],
            buckets: Vec::new(),
        }
    }

    /// Number of name entries (at least the owning table's slot count).
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Number of hash buckets, zero when no index has been built.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn has_index(&self) -> bool {
        !self.buckets.is_empty()
    }

    /// Builds the whole index from scratch. Chains keep ascending slot order
    /// so a chain walk and a linear scan find the same slot first.
    fn rebuild(&mut self, count: usize) {
        if !self.has_index() && count <= HASH_MIN_PROP {
            return;
        }
        let size = hash_size(count);
        self.buckets = vec![None; size];
        for entry in &mut self.entries {
            entry.next = None;
        }
        for slot in (0..count.min(self.entries.len())).rev() {
            if self.entries[slot].qname.is_empty() {
                continue;
            }
            let bucket = bucket_of(&self.entries[slot].qname.name, size);
            self.entries[slot].next = self.buckets[bucket];
            self.buckets[bucket] = Some(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        if self.entries[slot].qname.is_empty() {
            return;
        }
        let bucket = bucket_of(&self.entries[slot].qname.name, self.buckets.len());
        let next = self.entries[slot].next.take();
        if self.buckets[bucket] == Some(slot) {
            self.buckets[bucket] = next;
            return;
        }
        let mut cursor = self.buckets[bucket];
        while let Some(current) = cursor {
            if self.entries[current].next == Some(slot) {
                self.entries[current].next = next;
                return;
            }
            cursor = self.entries[current].next;
        }
    }

    fn link(&mut self, slot: usize) {
        if self.entries[slot].qname.is_empty() {
            return;
        }
        let bucket = bucket_of(&self.entries[slot].qname.name, self.buckets.len());
        match self.buckets[bucket] {
            Some(head) if head < slot => {
                let mut current = head;
                while let Some(next) = self.entries[current].next {
                    if next > slot {
                        break;
                    }
                    current = next;
                }
                self.entries[slot].next = self.entries[current].next;
                self.entries[current].next = Some(slot);
            }
            head => {
                self.entries[slot].next = head;
                self.buckets[bucket] = Some(slot);
            }
        }
    }

    fn chain(&self, name: &str) -> ChainIter<'_> {
        let bucket = bucket_of(name, self.buckets.len());
        ChainIter {
            table: self,
            cursor: self.buckets[bucket],
        }
    }
}

struct ChainIter<'a> {
    table: &'a NameTable,
    cursor: Option<usize>,
}

impl Iterator for ChainIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let slot = self.cursor?;
        self.cursor = self.table.entries[slot].next;
        Some(slot)
    }
}

/// Growable slot array with optional qualified names.
///
/// Unused slots hold `null`. Slot numbers are stable: only
/// [`SlotTable::insert_at`] and a compacting [`SlotTable::remove`] move
/// existing entries.
///
/// # Examples
///
/// ```
/// use core_types::{QualifiedName, Value};
/// use memory_manager::SlotTable;
///
/// let mut table = SlotTable::new();
/// let slot = table.define(QualifiedName::public("x"), Value::Number(1.0));
///
/// assert_eq!(table.lookup(&QualifiedName::public("x")), Some(slot));
/// assert_eq!(table.lookup(&QualifiedName::new("ns", "x")), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    slots: Vec<Value>,
    count: usize,
    names: Option<Rc<NameTable>>,
}

impl SlotTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table holding `count` null slots.
    pub fn with_count(count: usize) -> Self {
        let mut table = Self::new();
        table.grow(count);
        table
    }

    /// Creates an unnamed table from a list of values.
    pub fn from_values(values: Vec<Value>) -> Self {
        let count = values.len();
        let mut table = Self {
            slots: values,
            count,
            names: None,
        };
        let capacity = round_up(count);
        table.slots.resize(capacity, Value::Null);
        table
    }

    /// Logical number of slots.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Allocated number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns true when the table holds no slots.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The live slot values.
    pub fn values(&self) -> &[Value] {
        &self.slots[..self.count]
    }

    /// Returns true once a hash index exists.
    pub fn has_index(&self) -> bool {
        self.names.as_ref().is_some_and(|names| names.has_index())
    }

    /// Returns true while the name table is shared with another table.
    pub fn names_shared(&self) -> bool {
        self.names
            .as_ref()
            .is_some_and(|names| Rc::strong_count(names) > 1)
    }

    /// The name table, if any slot has ever been named.
    pub fn name_table(&self) -> Option<&NameTable> {
        self.names.as_deref()
    }

    fn names_mut(&mut self) -> &mut NameTable {
        let capacity = self.slots.len();
        let names = self
            .names
            .get_or_insert_with(|| Rc::new(NameTable::with_size(capacity)));
        Rc::make_mut(names)
    }

    fn next_capacity(&self, needed: usize) -> usize {
        let mut capacity = needed;
        if capacity > LOTSA_PROP {
            let factor = (self.slots.len() / 4).max(NUM_PROP);
            capacity = (capacity + factor) / factor * factor;
        }
        round_up(capacity)
    }

    /// Grows the table to hold at least `new_count` slots.
    ///
    /// Capacity rounds up to a size class. When a hash index exists and the
    /// new count needs a different bucket count, the whole index is rebuilt.
    pub fn grow(&mut self, new_count: usize) {
        if new_count > self.slots.len() {
            let capacity = self.next_capacity(new_count);
            self.slots.resize(capacity, Value::Null);
            if self.names.is_some() {
                self.names_mut().entries.resize(capacity, NameEntry::default());
            }
        }
        if new_count > self.count {
            self.count = new_count;
            let needs_index = self.names.as_ref().is_some_and(|names| {
                if names.has_index() {
                    hash_size(new_count) != names.bucket_count()
                } else {
                    new_count > HASH_MIN_PROP
                }
            });
            if needs_index {
                self.names_mut().rebuild(new_count);
            }
        }
    }

    /// Reads a slot.
    pub fn get(&self, slot: usize) -> Option<&Value> {
        if slot < self.count {
            self.slots.get(slot)
        } else {
            None
        }
    }

    /// Writes a slot, growing the table when `slot` is past the end.
    pub fn set(&mut self, slot: usize, value: Value) {
        if slot >= self.count {
            self.grow(slot + 1);
        }
        self.slots[slot] = value;
    }

    /// Appends an unnamed slot and returns its number.
    pub fn push(&mut self, value: Value) -> usize {
        let slot = self.count;
        self.set(slot, value);
        slot
    }

    /// Returns the name of a slot; placeholder names read as `None`.
    pub fn name(&self, slot: usize) -> Option<&QualifiedName> {
        if slot >= self.count {
            return None;
        }
        let entry = self.names.as_ref()?.entries.get(slot)?;
        if entry.qname.is_empty() {
            None
        } else {
            Some(&entry.qname)
        }
    }

    /// Names a slot, unlinking its previous name from the index first.
    pub fn set_name(&mut self, slot: usize, qname: QualifiedName) {
        if slot >= self.count {
            self.grow(slot + 1);
        }
        let count = self.count;
        let names = self.names_mut();
        if names.has_index() {
            names.unlink(slot);
            names.entries[slot].qname = qname;
            names.link(slot);
        } else {
            names.entries[slot].qname = qname;
            names.rebuild(count);
        }
    }

    /// Finds the slot named exactly `qname` (name and namespace).
    pub fn lookup(&self, qname: &QualifiedName) -> Option<usize> {
        if qname.is_empty() {
            return None;
        }
        let names = self.names.as_ref()?;
        if names.has_index() {
            names
                .chain(&qname.name)
                .find(|slot| *slot < self.count && names.entries[*slot].qname == *qname)
        } else {
            (0..self.count.min(names.entries.len())).find(|slot| names.entries[*slot].qname == *qname)
        }
    }

    /// Every slot whose name portion equals `name`, in any namespace.
    pub fn lookup_all(&self, name: &str) -> Vec<usize> {
        if name.is_empty() {
            return Vec::new();
        }
        let Some(names) = self.names.as_ref() else {
            return Vec::new();
        };
        if names.has_index() {
            names
                .chain(name)
                .filter(|slot| *slot < self.count && names.entries[*slot].qname.name == name)
                .collect()
        } else {
            (0..self.count.min(names.entries.len()))
                .filter(|slot| names.entries[*slot].qname.name == name)
                .collect()
        }
    }

    /// Defines or overwrites a named slot and returns its number.
    pub fn define(&mut self, qname: QualifiedName, value: Value) -> usize {
        if let Some(slot) = self.lookup(&qname) {
            self.slots[slot] = value;
            return slot;
        }
        let slot = self.count;
        self.set(slot, value);
        self.set_name(slot, qname);
        slot
    }

    /// Named slots in slot order, skipping placeholders.
    pub fn named_slots(&self) -> Vec<(usize, QualifiedName)> {
        (0..self.count)
            .filter_map(|slot| self.name(slot).map(|qname| (slot, qname.clone())))
            .collect()
    }

    /// Opens a hole of `count` slots at `offset`, shifting later slots up.
    ///
    /// The hole holds null values and placeholder names.
    pub fn insert_at(&mut self, offset: usize, count: usize) {
        if count == 0 {
            return;
        }
        let old_count = self.count.max(offset);
        self.grow(old_count + count);
        self.slots[offset..old_count + count].rotate_right(count);
        for value in &mut self.slots[offset..offset + count] {
            *value = Value::Null;
        }
        if self.names.is_some() {
            let total = self.count;
            let names = self.names_mut();
            names.entries[offset..old_count + count].rotate_right(count);
            for entry in &mut names.entries[offset..offset + count] {
                entry.qname = QualifiedName::empty();
            }
            names.rebuild(total);
        }
    }

    /// Removes a slot.
    ///
    /// With `compact`, later slots shift down and the count drops by one;
    /// otherwise the slot keeps its number and only loses its name.
    pub fn remove(&mut self, slot: usize, compact: bool) {
        if slot >= self.count {
            return;
        }
        if compact {
            let count = self.count;
            self.slots[slot..count].rotate_left(1);
            self.slots[count - 1] = Value::Null;
            self.count -= 1;
            if self.names.is_some() {
                let names = self.names_mut();
                names.entries[slot..count].rotate_left(1);
                names.entries[count - 1] = NameEntry::default();
                names.rebuild(count - 1);
            }
        } else if self.names.is_some() {
            let count = self.count;
            let names = self.names_mut();
            names.entries[slot].qname = QualifiedName::empty();
            names.rebuild(count);
        }
    }

    /// Rebuilds the hash index (when one exists or is due).
    pub fn rebuild_index(&mut self) {
        if self.names.is_some() {
            let count = self.count;
            self.names_mut().rebuild(count);
        }
    }

    /// Empties the table, keeping the slot allocation for reuse.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|value| *value = Value::Null);
        self.count = 0;
        self.names = None;
    }

    /// Replaces this table's contents with `other`, reusing the allocation.
    pub fn reset_from(&mut self, other: &SlotTable) {
        self.slots.clear();
        self.slots.extend_from_slice(&other.slots);
        self.count = other.count;
        self.names = other.names.clone();
    }
}
