//! GC integration for interpreter values
//!
//! Collections only run at safe points: between instructions of the
//! outermost `execute`, while servicing events, or when the host asks.
//! Roots are the global object, the operand stack, every frame and the
//! values registered with [`Vm::add_root`].

use crate::helpers::Helpers;
use crate::object::HeapObject;
use crate::vm::Vm;
use core_types::{Value, ValueId};
use memory_manager::{Disposal, GcCycle, Generation};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::Ordering;

impl Vm {
    /// Handles the interpreter itself keeps alive.
    pub(crate) fn gc_roots(&self) -> Vec<ValueId> {
        let mut roots = vec![self.global];
        let values = self.stack.iter().chain(self.native_roots.iter());
        roots.extend(values.filter_map(Value::as_ref_id));
        for frame in &self.frames {
            frame.references(&mut roots);
        }
        roots
    }

    /// Collects every generation up to `generation`.
    ///
    /// # Returns
    ///
    /// The cycle summary, or `None` if a collection was already running.
    pub(crate) fn collect(&mut self, generation: Generation) -> Option<GcCycle> {
        let roots = self.gc_roots();
        let helpers: HashMap<ValueId, Rc<dyn Helpers>> = self
            .heap
            .iter()
            .filter_map(|(id, object)| object.type_data().map(|data| (id, data.helpers.clone())))
            .collect();
        let trace = |object: &HeapObject, out: &mut Vec<ValueId>| match helpers.get(&object.type_id) {
            Some(helpers) => helpers.mark(object, out),
            None => object.references(out),
        };
        let dispose = |object: &mut HeapObject| match helpers.get(&object.type_id) {
            Some(helpers) => helpers.destroy(object),
            None => Disposal::Release,
        };
        let cycle = self.heap.collect(generation, &roots, trace, dispose)?;
        log::debug!(
            "gc {:?}: marked {} swept {} pooled {} released {} promoted {}",
            generation,
            cycle.marked,
            cycle.swept,
            cycle.pooled,
            cycle.released,
            cycle.promoted
        );
        if cycle.exhausted {
            log::warn!(
                "memory still above {} bytes after collection, interpreter exiting",
                self.heap.config().max_memory
            );
            self.exiting.store(true, Ordering::SeqCst);
        }
        Some(cycle)
    }

    /// Generation to collect when a collection was requested.
    pub(crate) fn requested_generation(&self) -> Generation {
        if self.heap.bytes_in_use() >= self.heap.config().redline {
            Generation::Old
        } else {
            Generation::New
        }
    }

    /// Runs a requested collection if one is due and no native code is active.
    pub(crate) fn safe_point(&mut self) {
        if self.depth <= 1 && self.heap.gc_required() && !self.heap.is_collecting() {
            let generation = self.requested_generation();
            self.collect(generation);
        }
    }

    /// Collects garbage now.
    ///
    /// Values held only in host variables must be rooted with
    /// [`Vm::add_root`] first.
    ///
    /// # Arguments
    ///
    /// * `full` - Also collect the old generation
    pub fn collect_garbage(&mut self, full: bool) -> Option<GcCycle> {
        let generation = if full { Generation::Old } else { Generation::New };
        self.collect(generation)
    }
}
