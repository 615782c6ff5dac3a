//! Property access by slot and by name
//!
//! Named access resolves against the receiver first, then the static
//! blocks of its type chain. Reads through a getter call it, writes go to
//! the paired setter, and methods read off a type through an instance are
//! bound to that instance.

use crate::error::ExecResult;
use crate::helpers::{array_index, receiver};
use crate::object::{HeapObject, ObjectKind};
use crate::vm::Vm;
use core_types::{QualifiedName, TraitAttributes, Value, ValueId, VmError, VmResult};

/// Inline cache key: body identity and instruction index
pub(crate) type CacheKey = (usize, usize);

impl Vm {
    /// Namespaces opened by the blocks in scope of the current frame.
    pub(crate) fn open_namespaces(&self) -> Vec<String> {
        let mut namespaces = Vec::new();
        let Some(frame) = self.frames.last() else {
            return namespaces;
        };
        let mut current = Some(frame.innermost_block());
        while let Some(id) = current {
            let Some(block) = self.heap.get(id).and_then(HeapObject::block) else {
                break;
            };
            namespaces.extend(block.namespaces.iter().cloned());
            current = block.scope_chain;
        }
        namespaces
    }

    /// Finds `name` among the slots of `object`.
    ///
    /// An exact match wins; a public name also matches a binding in one of
    /// the open `namespaces`.
    pub(crate) fn lookup_in(&self, object: &Value, name: &QualifiedName, namespaces: &[String]) -> Option<usize> {
        let helpers = self.helpers_of(object);
        if let Some(slot) = helpers.lookup_property(self, object, name) {
            return Some(slot);
        }
        if !name.is_public() || namespaces.is_empty() {
            return None;
        }
        let target = self.heap.get(object.as_ref_id()?)?;
        target.slots.lookup_all(&name.name).into_iter().find(|slot| {
            target
                .slots
                .name(*slot)
                .is_some_and(|qname| namespaces.iter().any(|ns| *ns == qname.space))
        })
    }

    /// Finds the object holding `name` for `value` and the slot it is in.
    pub(crate) fn find_property(&self, value: &Value, name: &QualifiedName) -> Option<(Value, usize)> {
        let namespaces = self.open_namespaces();
        if let Some(slot) = self.lookup_in(value, name, &namespaces) {
            return Some((value.clone(), slot));
        }
        let mut current = match value {
            Value::Ref(id) if self.is_type_value(value) => self.heap.get(*id)?.type_data()?.base_type,
            _ => Some(self.type_of(value)),
        };
        while let Some(type_id) = current {
            let holder = Value::Ref(type_id);
            if let Some(slot) = self.lookup_in(&holder, name, &namespaces) {
                return Some((holder, slot));
            }
            current = self.heap.get(type_id)?.type_data()?.base_type;
        }
        None
    }

    /// Finds a method without calling getters.
    pub(crate) fn find_method(&self, value: &Value, name: &QualifiedName) -> Option<Value> {
        let (holder, slot) = self.find_property(value, name)?;
        let method = self.heap.get(holder.as_ref_id()?)?.slots.get(slot)?.clone();
        self.function_ref(&method)
            .is_some_and(|f| !f.is_getter() && !f.is_setter())
            .then_some(method)
    }

    /// Reads slot `slot` of `holder` on behalf of `receiver`.
    ///
    /// Getters run with the receiver as `this` (the holder for static
    /// getters). With `bind`, a method found on a type is copied with the
    /// receiver bound as its `this`.
    pub(crate) fn load(&mut self, holder: &Value, slot: usize, receiver: &Value, bind: bool) -> ExecResult<Value> {
        let helpers = self.helpers_of(holder);
        let value = helpers.get_property(self, holder, slot)?;
        let Some(function) = self.function_ref(&value) else {
            return Ok(value);
        };
        let is_static = function.attributes.contains(TraitAttributes::STATIC);
        if function.is_getter() {
            let this = if is_static { holder.clone() } else { receiver.clone() };
            return self.invoke(&value, &this, &[]);
        }
        let extract = bind
            && !is_static
            && function.this_obj.is_none()
            && holder != receiver
            && matches!(receiver, Value::Ref(_))
            && !self.is_type_value(receiver);
        if extract {
            return self.bind_method(&value, receiver);
        }
        Ok(value)
    }

    /// Copies a function with `this` bound.
    pub(crate) fn bind_method(&mut self, function: &Value, this: &Value) -> ExecResult<Value> {
        let id = receiver(function)?;
        let mut copy = self.object(id)?.clone();
        if let ObjectKind::Function(data) = &mut copy.kind {
            data.this_obj = Some(this.clone());
        }
        Ok(Value::Ref(self.alloc(copy)?))
    }

    /// Writes slot `slot` of `holder` on behalf of `receiver`.
    ///
    /// A getter slot routes the write to its paired setter; a getter with
    /// no setter makes the property read-only.
    pub(crate) fn store(&mut self, holder: &Value, slot: usize, value: Value, receiver: &Value) -> ExecResult<()> {
        let current = holder
            .as_ref_id()
            .and_then(|id| self.heap.get(id))
            .map(|object| {
                let read_only = object
                    .block()
                    .is_some_and(|b| b.trait_at(slot).attributes.contains(TraitAttributes::READONLY));
                (object.slots.get(slot).cloned(), read_only)
            });
        if let Some((current, read_only)) = current {
            if let Some(function) = current.as_ref().and_then(|c| self.function_ref(c)) {
                let is_static = function.attributes.contains(TraitAttributes::STATIC);
                let this = if is_static { holder.clone() } else { receiver.clone() };
                if function.is_getter() {
                    let name = function.name.clone();
                    let Some(setter_slot) = function.next_slot else {
                        return Err(VmError::type_error(format!("Property \"{}\" is read-only", name)).into());
                    };
                    let setter = self.load_raw(holder, setter_slot)?;
                    self.invoke(&setter, &this, &[value])?;
                    return Ok(());
                }
                if function.is_setter() {
                    let setter = current.clone().unwrap_or_default();
                    self.invoke(&setter, &this, &[value])?;
                    return Ok(());
                }
            }
            if read_only {
                let name = self
                    .helpers_of(holder)
                    .property_name(self, holder, slot)
                    .map_or_else(|| slot.to_string(), |n| n.to_string());
                return Err(VmError::type_error(format!("Property \"{}\" is read-only", name)).into());
            }
        }
        let helpers = self.helpers_of(holder);
        helpers.set_property(self, holder, slot, value)?;
        Ok(())
    }

    fn load_raw(&self, holder: &Value, slot: usize) -> ExecResult<Value> {
        let id = receiver(holder)?;
        self.object(id)?
            .slots
            .get(slot)
            .cloned()
            .ok_or_else(|| VmError::reference(format!("Slot {} is out of range", slot)).into())
    }

    fn is_accessor(&self, holder: &Value, slot: usize) -> bool {
        holder
            .as_ref_id()
            .and_then(|id| self.heap.get(id))
            .and_then(|object| object.slots.get(slot))
            .and_then(|value| self.function_ref(value))
            .is_some_and(|f| f.is_getter() || f.is_setter())
    }

    /// Reads a named property; missing properties read as undefined.
    pub(crate) fn get_named(
        &mut self,
        object: &Value,
        name: &QualifiedName,
        cache: Option<CacheKey>,
        bind: bool,
    ) -> ExecResult<Value> {
        let helpers = self.helpers_of(object);
        if let Some(value) = helpers.get_property_by_name(self, object, name)? {
            return Ok(value);
        }
        if let Some(slot) = cache.and_then(|key| self.cached_slot(key, object, name)) {
            return self.load(object, slot, object, bind);
        }
        match self.find_property(object, name) {
            Some((holder, slot)) => {
                if let Some(key) = cache.filter(|_| holder == *object) {
                    self.remember_slot(key, object, slot);
                }
                self.load(&holder, slot, object, bind)
            }
            None => Ok(Value::Undefined),
        }
    }

    /// Writes a named property, creating it on dynamic objects.
    pub(crate) fn set_named(
        &mut self,
        object: &Value,
        name: &QualifiedName,
        value: Value,
        cache: Option<CacheKey>,
    ) -> ExecResult<()> {
        let helpers = self.helpers_of(object);
        if helpers.set_property_by_name(self, object, name, &value)? {
            return Ok(());
        }
        if let Some(slot) = cache.and_then(|key| self.cached_slot(key, object, name)) {
            return self.store(object, slot, value, object);
        }
        match self.find_property(object, name) {
            Some((holder, slot)) if holder == *object => {
                if let Some(key) = cache {
                    self.remember_slot(key, object, slot);
                }
                self.store(object, slot, value, object)
            }
            Some((holder, slot)) if self.is_accessor(&holder, slot) || self.is_type_value(object) => {
                self.store(&holder, slot, value, object)
            }
            _ => self.define_property(object, name, value),
        }
    }

    /// Adds a named property to a dynamic object.
    pub(crate) fn define_property(&mut self, object: &Value, name: &QualifiedName, value: Value) -> ExecResult<()> {
        let id = receiver(object)?;
        let target = self.object_mut(id)?;
        if !target.flags.dynamic {
            let type_id = target.type_id;
            return Err(VmError::type_error(format!(
                "Can't create property \"{}\" on an instance of {}",
                name,
                self.qualified_type_name(type_id)
            ))
            .into());
        }
        target.slots.define(name.clone(), value);
        Ok(())
    }

    /// Deletes a named property; returns whether one was removed.
    pub(crate) fn delete_by_name(&mut self, object: &Value, name: &QualifiedName) -> ExecResult<bool> {
        let helpers = self.helpers_of(object);
        let is_array = object
            .as_ref_id()
            .and_then(|id| self.heap.get(id))
            .is_some_and(|o| matches!(o.kind, ObjectKind::Array(_)));
        if is_array {
            return match array_index(name) {
                Some(index) => helpers.delete_property(self, object, index),
                None => Ok(false),
            };
        }
        let namespaces = self.open_namespaces();
        match self.lookup_in(object, name, &namespaces) {
            Some(slot) => helpers.delete_property(self, object, slot),
            None => Ok(false),
        }
    }

    /// Slot cached for this receiver, if the cache applies and still holds.
    pub(crate) fn cached_slot(&self, key: CacheKey, object: &Value, name: &QualifiedName) -> Option<usize> {
        let type_id = self.cacheable_type(object)?;
        let slot = self.caches.get(&key)?.lookup(type_id)?;
        let target = self.heap.get(object.as_ref_id()?)?;
        (target.slots.name(slot) == Some(name)).then_some(slot)
    }

    pub(crate) fn remember_slot(&mut self, key: CacheKey, object: &Value, slot: usize) {
        if let Some(type_id) = self.cacheable_type(object) {
            self.caches.entry(key).or_default().update(type_id, slot);
        }
    }

    fn cacheable_type(&self, object: &Value) -> Option<ValueId> {
        let target = self.heap.get(object.as_ref_id()?)?;
        if !matches!(target.kind, ObjectKind::Object) {
            return None;
        }
        let data = self.heap.get(target.type_id)?.type_data()?;
        (!data.no_bind).then_some(target.type_id)
    }

    /// Reads a public property from the host.
    pub fn get_property(&mut self, object: &Value, name: &str) -> VmResult<Value> {
        self.get_named(object, &QualifiedName::public(name), None, true)
            .map_err(|e| self.host_error(e))
    }

    /// Writes a property under a qualified name from the host.
    pub fn set_qualified_property(&mut self, object: &Value, name: &QualifiedName, value: Value) -> VmResult<()> {
        self.set_named(object, name, value, None)
            .map_err(|e| self.host_error(e))
    }

    /// Writes a public property from the host.
    pub fn set_property(&mut self, object: &Value, name: &str, value: Value) -> VmResult<()> {
        self.set_named(object, &QualifiedName::public(name), value, None)
            .map_err(|e| self.host_error(e))
    }
}
