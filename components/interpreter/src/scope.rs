//! Lexical name resolution
//!
//! Scoped names resolve by walking the block chain from the innermost open
//! block of the current frame. `with` blocks search their object, an
//! activation also searches `this` and its type chain, and a type reached
//! through a method's scope searches its statics. The global object is
//! searched last.

use crate::error::ExecResult;
use crate::object::{BlockRole, HeapObject};
use crate::vm::Vm;
use core_types::{QualifiedName, Value, ValueId, VmError};

/// Where a scoped name was found
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScopedRef {
    /// Object holding the slot
    pub holder: Value,
    /// Slot number
    pub slot: usize,
    /// `this` for accessors reached through the binding
    pub receiver: Value,
}

impl ScopedRef {
    fn new(holder: Value, slot: usize, receiver: Value) -> Self {
        Self { holder, slot, receiver }
    }
}

impl Vm {
    /// Block `depth` steps out from the innermost open block.
    pub(crate) fn nth_scope(&self, depth: u32) -> ExecResult<ValueId> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| VmError::internal("No active frame"))?;
        let mut current = frame.innermost_block();
        for _ in 0..depth {
            current = self
                .object(current)?
                .block()
                .and_then(|b| b.scope_chain)
                .ok_or_else(|| VmError::reference(format!("Scope depth {} is out of range", depth)))?;
        }
        Ok(current)
    }

    /// Resolves a name through the scope chain, then the global object.
    pub(crate) fn find_scoped(&self, name: &QualifiedName) -> Option<ScopedRef> {
        let namespaces = self.open_namespaces();
        let global = Value::Ref(self.global);
        let mut current = self.frames.last().map(|f| f.innermost_block());
        while let Some(id) = current {
            let Some(object) = self.heap.get(id) else { break };
            let holder = Value::Ref(id);
            if object.is_type() {
                if let Some((found, slot)) = self.find_property(&holder, name) {
                    return Some(ScopedRef::new(found, slot, holder));
                }
            } else {
                match object.block().map(|b| &b.role) {
                    Some(BlockRole::With(target)) => {
                        if let Some((found, slot)) = self.find_property(target, name) {
                            return Some(ScopedRef::new(found, slot, target.clone()));
                        }
                    }
                    Some(BlockRole::Activation { this, .. }) => {
                        if let Some(slot) = self.lookup_in(&holder, name, &namespaces) {
                            return Some(ScopedRef::new(holder.clone(), slot, holder));
                        }
                        if matches!(this, Value::Ref(_)) && *this != global {
                            if let Some((found, slot)) = self.find_property(this, name) {
                                return Some(ScopedRef::new(found, slot, this.clone()));
                            }
                        }
                    }
                    Some(BlockRole::Lexical | BlockRole::Exception(_)) => {
                        if let Some(slot) = self.lookup_in(&holder, name, &namespaces) {
                            return Some(ScopedRef::new(holder.clone(), slot, holder));
                        }
                    }
                    None => break,
                }
            }
            current = object.block().and_then(|b| b.scope_chain);
        }
        self.find_property(&global, name)
            .map(|(found, slot)| ScopedRef::new(found, slot, global))
    }

    /// Reads a scoped name; an unknown name is a `ReferenceError`.
    pub(crate) fn get_scoped(&mut self, name: &QualifiedName) -> ExecResult<Value> {
        match self.find_scoped(name) {
            Some(found) => self.load(&found.holder, found.slot, &found.receiver, false),
            None => Err(VmError::reference(format!("\"{}\" is not defined", name)).into()),
        }
    }

    /// Writes a scoped name; an unknown name becomes a global.
    pub(crate) fn put_scoped(&mut self, name: &QualifiedName, value: Value) -> ExecResult<()> {
        match self.find_scoped(name) {
            Some(found) => self.store(&found.holder, found.slot, value, &found.receiver),
            None => {
                let global = self.global;
                self.object_mut(global)?.slots.define(name.clone(), value);
                Ok(())
            }
        }
    }

    /// Deletes a scoped binding; returns whether one was removed.
    pub(crate) fn delete_scoped(&mut self, name: &QualifiedName) -> ExecResult<bool> {
        match self.find_scoped(name) {
            Some(found) => {
                let helpers = self.helpers_of(&found.holder);
                helpers.delete_property(self, &found.holder, found.slot)
            }
            None => Ok(false),
        }
    }

    /// Returns true if `id` is a block (activations and types included).
    pub(crate) fn is_block(&self, id: ValueId) -> bool {
        self.heap.get(id).and_then(HeapObject::block).is_some()
    }
}
