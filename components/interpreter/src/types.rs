//! Runtime types
//!
//! A type is a heap object whose slots form its static block and whose
//! payload holds the instance shape, the helper set and the inheritance
//! links. Types whose base is not known yet are created unlinked and
//! fixed up later; [`Vm::fixup_type`] copies the inherited static members
//! and the base's instance shape exactly once.

use crate::error::ExecResult;
use crate::helpers::{Helpers, ObjectHelpers};
use crate::object::{BlockData, HeapObject, ObjectKind, Trait, TypeData};
use crate::vm::Vm;
use bytecode_system::TypeRef;
use core_types::{QualifiedName, TraitAttributes, TypeAttributes, Value, ValueId, VmError, VmResult};
use memory_manager::SlotTable;
use std::fmt;
use std::rc::Rc;

/// Description of a type to create.
///
/// # Examples
///
/// ```
/// use core_types::TypeAttributes;
/// use interpreter::{TypeSpec, Vm, VmConfig};
///
/// let mut vm = Vm::new(VmConfig::default()).unwrap();
/// let shape = vm.create_type(TypeSpec::new("Shape")).unwrap();
/// let circle = vm
///     .create_type(
///         TypeSpec::new("Circle")
///             .with_base(shape.as_ref_id().unwrap())
///             .with_attributes(TypeAttributes::DYNAMIC_INSTANCE),
///     )
///     .unwrap();
/// assert!(vm.is_subtype(&circle, &shape));
/// ```
#[derive(Clone)]
pub struct TypeSpec {
    /// Qualified type name
    pub qname: QualifiedName,
    /// Base type
    pub base: Option<ValueId>,
    /// Implemented interfaces and mixed-in types
    pub implements: Vec<ValueId>,
    /// Type attributes
    pub attributes: TypeAttributes,
    /// Bytes per instance
    pub instance_size: usize,
    /// Static slots reserved at creation
    pub num_static_slots: usize,
    /// Helper set; `None` inherits the base's at fixup
    pub helpers: Option<Rc<dyn Helpers>>,
    /// Instances are never pooled
    pub dont_pool: bool,
}

impl fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSpec")
            .field("qname", &self.qname)
            .field("base", &self.base)
            .field("attributes", &self.attributes)
            .field("helpers", &self.helpers.as_ref().map(|h| h.name()))
            .finish()
    }
}

impl TypeSpec {
    /// A type with no base, members or helpers
    pub fn new(qname: impl Into<QualifiedName>) -> Self {
        Self {
            qname: qname.into(),
            base: None,
            implements: Vec::new(),
            attributes: TypeAttributes::NONE,
            instance_size: 0,
            num_static_slots: 0,
            helpers: None,
            dont_pool: false,
        }
    }

    /// Sets the base type
    pub fn with_base(mut self, base: ValueId) -> Self {
        self.base = Some(base);
        self
    }

    /// Adds implemented types
    pub fn with_implements(mut self, types: &[ValueId]) -> Self {
        self.implements.extend_from_slice(types);
        self
    }

    /// Adds type attributes
    pub fn with_attributes(mut self, attributes: TypeAttributes) -> Self {
        self.attributes = self.attributes | attributes;
        self
    }

    /// Sets the helper set
    pub fn with_helpers(mut self, helpers: Rc<dyn Helpers>) -> Self {
        self.helpers = Some(helpers);
        self
    }

    /// Reserves static slots
    pub fn with_static_slots(mut self, count: usize) -> Self {
        self.num_static_slots = count;
        self
    }

    /// Sets the instance size
    pub fn with_instance_size(mut self, size: usize) -> Self {
        self.instance_size = size;
        self
    }

    /// Keeps instances out of the type's pool
    pub fn without_pool(mut self) -> Self {
        self.dont_pool = true;
        self
    }
}

/// One inherited static slot
struct Inherited {
    name: Option<QualifiedName>,
    value: Value,
    attributes: Trait,
}

impl Inherited {
    fn placeholder() -> Self {
        Self {
            name: None,
            value: Value::Null,
            attributes: Trait::default(),
        }
    }
}

impl Vm {
    /// Allocates a type object with `meta` as its type.
    pub(crate) fn allocate_type(&mut self, spec: &TypeSpec, meta: ValueId) -> ExecResult<ValueId> {
        let id = self.next_type_id;
        self.next_type_id += 1;
        let (helpers, inherits_helpers) = match &spec.helpers {
            Some(helpers) => (helpers.clone(), false),
            None => (Rc::new(ObjectHelpers) as Rc<dyn Helpers>, true),
        };
        let data = TypeData {
            qname: spec.qname.clone(),
            id,
            pool_key: id,
            base_type: None,
            implements: Vec::new(),
            block: BlockData::new(None),
            instance_block: None,
            attributes: spec.attributes,
            helpers,
            inherits_helpers,
            instance_size: spec.instance_size.max(std::mem::size_of::<HeapObject>()),
            sub_type_count: 0,
            initializer: None,
            need_fixup: spec.base.is_some(),
            fixup_done: false,
            has_base_constructors: false,
            has_base_initializers: false,
            has_native_base: false,
            no_bind: false,
            dont_pool: spec.dont_pool,
            initialized: false,
        };
        let mut object = HeapObject::new(
            meta,
            SlotTable::with_count(spec.num_static_slots),
            ObjectKind::Type(Box::new(data)),
        );
        object.flags.native = spec.attributes.contains(TypeAttributes::NATIVE);
        self.alloc_with(id, false, object)
    }

    /// Creates a type and links it to its base.
    pub(crate) fn make_type(&mut self, spec: &TypeSpec) -> ExecResult<ValueId> {
        let meta = self.core.type_type;
        let id = self.allocate_type(spec, meta)?;
        self.fixup_type(id, spec.base, &spec.implements, true)?;
        Ok(id)
    }

    /// Creates a type; without an explicit base it extends `Object`.
    pub fn create_type(&mut self, mut spec: TypeSpec) -> VmResult<Value> {
        if spec.base.is_none() {
            spec.base = Some(self.core.object);
        }
        self.make_type(&spec).map(Value::Ref).map_err(|e| self.host_error(e))
    }

    /// Creates a type whose base is linked later with [`Vm::fixup`].
    pub fn declare_type(&mut self, spec: TypeSpec) -> VmResult<Value> {
        let meta = self.core.type_type;
        self.allocate_type(&spec, meta)
            .map(Value::Ref)
            .map_err(|e| self.host_error(e))
    }

    /// Links a declared type to its base; a second call is an `InternalError`.
    pub fn fixup(&mut self, type_value: &Value, base: Option<&Value>) -> VmResult<()> {
        let result = (|| -> ExecResult<()> {
            let type_id = self.type_id_of(type_value)?;
            let base = match base {
                Some(base) => Some(self.type_id_of(base)?),
                None => Some(self.core.object),
            };
            self.fixup_type(type_id, base, &[], true)
        })();
        result.map_err(|e| self.host_error(e))
    }

    /// Type payload of a type value
    pub fn type_info(&self, type_value: &Value) -> Option<&TypeData> {
        self.heap.get(type_value.as_ref_id()?)?.type_data()
    }

    /// Returns true if `candidate` is `target` or derives from it.
    pub fn is_subtype(&self, candidate: &Value, target: &Value) -> bool {
        match (candidate.as_ref_id(), target.as_ref_id()) {
            (Some(candidate), Some(target)) => self.is_subtype_of(candidate, target),
            _ => false,
        }
    }

    /// Returns true if `value` is an instance of `target` or one of its subtypes.
    pub fn is_instance(&self, value: &Value, target: &Value) -> bool {
        target
            .as_ref_id()
            .is_some_and(|target| self.instance_of(value, target))
    }

    pub(crate) fn type_id_of(&self, value: &Value) -> ExecResult<ValueId> {
        match value {
            Value::Ref(id) if self.is_type_value(value) => Ok(*id),
            other => Err(VmError::type_error(format!("{} is not a type", self.type_name(other))).into()),
        }
    }

    /// Allocates the instance shape block of a type.
    ///
    /// When the type is already linked, the base's instance slots are
    /// copied in front of the `count` own slots.
    pub(crate) fn create_instance_block(&mut self, type_id: ValueId, count: usize) -> ExecResult<ValueId> {
        let block_type = self.core.block;
        let object = HeapObject::new(block_type, SlotTable::with_count(count), ObjectKind::Block(BlockData::new(None)));
        let block = self.alloc(object)?;
        let data = self.type_data(type_id)?;
        if let (true, Some(base)) = (data.fixup_done, data.base_type) {
            if let Some(base_block) = self.type_data(base)?.instance_block {
                self.inherit_block_slots(block, base_block)?;
            }
        }
        self.type_data_mut(type_id)?.instance_block = Some(block);
        Ok(block)
    }

    /// Copies every slot, name and trait of `src` to the front of `dest`.
    fn inherit_block_slots(&mut self, dest: ValueId, src: ValueId) -> ExecResult<()> {
        let source = self.object(src)?;
        let count = source.slots.count();
        let values: Vec<Value> = source.slots.values().to_vec();
        let names: Vec<Option<QualifiedName>> = (0..count).map(|i| source.slots.name(i).cloned()).collect();
        let traits: Vec<Trait> = match source.block() {
            Some(block) => (0..count).map(|i| block.trait_at(i)).collect(),
            None => vec![Trait::default(); count],
        };

        let target = self.object_mut(dest)?;
        target.slots.insert_at(0, count);
        for (slot, value) in values.into_iter().enumerate() {
            target.slots.set(slot, value);
        }
        for (slot, name) in names.into_iter().enumerate() {
            if let Some(name) = name {
                target.slots.set_name(slot, name);
            }
        }
        if let Some(block) = target.block_mut() {
            block.insert_traits(0, count);
            for (slot, value) in traits.into_iter().enumerate() {
                block.set_trait(slot, value);
            }
            block.num_inherited = count;
        }
        Ok(())
    }

    /// Static members `type_id` inherits from `base` and `implements`.
    fn inherited_members(&self, type_id: ValueId, base: Option<ValueId>, implements: &[ValueId]) -> ExecResult<Vec<Inherited>> {
        let own = self.object(type_id)?;
        let mut members = Vec::new();
        if let Some(base) = base {
            let base_object = self.object(base)?;
            let block = base_object.block();
            for slot in 0..base_object.slots.count() {
                let value = base_object.slots.get(slot).cloned().unwrap_or(Value::Null);
                let attributes = block.map(|b| b.trait_at(slot)).unwrap_or_default();
                let inheritable = self
                    .function_ref(&value)
                    .is_some_and(|f| !f.is_constructor && !f.attributes.contains(TraitAttributes::STATIC));
                let name = base_object.slots.name(slot).cloned();
                members.push(match (inheritable, name) {
                    (true, Some(name)) => match own.slots.lookup(&name) {
                        Some(own_slot) => Inherited {
                            name: None,
                            value: own.slots.get(own_slot).cloned().unwrap_or(Value::Null),
                            attributes: Trait::new(attributes.attributes | TraitAttributes::INHERITED),
                        },
                        None => Inherited {
                            name: Some(name),
                            value,
                            attributes: Trait {
                                type_id: attributes.type_id,
                                attributes: attributes.attributes | TraitAttributes::INHERITED,
                            },
                        },
                    },
                    _ => Inherited::placeholder(),
                });
            }
        }
        for mixin in implements {
            let mixin_object = self.object(*mixin)?;
            let Some(data) = mixin_object.type_data() else { continue };
            if data.is_interface() {
                continue;
            }
            // Every first-level member of a mixed-in type reserves a slot. A
            // member whose name is already taken, or a constructor, leaves an
            // unnamed hole so the existing binding keeps winning name lookup.
            for slot in data.block.num_inherited..mixin_object.slots.count() {
                let value = mixin_object.slots.get(slot).cloned().unwrap_or(Value::Null);
                let member = match mixin_object.slots.name(slot) {
                    Some(name)
                        if own.slots.lookup(name).is_none()
                            && !members.iter().any(|m| m.name.as_ref() == Some(name))
                            && !self.function_ref(&value).is_some_and(|f| f.is_constructor) =>
                    {
                        Inherited {
                            name: Some(name.clone()),
                            value,
                            attributes: Trait::new(data.block.trait_at(slot).attributes | TraitAttributes::INHERITED),
                        }
                    }
                    _ => Inherited::placeholder(),
                };
                members.push(member);
            }
        }
        Ok(members)
    }

    /// Links a type to its base and implemented types.
    ///
    /// With `make_room`, the inherited members are inserted in front of the
    /// type's own static slots and the own functions' slot numbers shift up;
    /// otherwise they overwrite the reserved leading slots.
    pub(crate) fn fixup_type(
        &mut self,
        type_id: ValueId,
        base: Option<ValueId>,
        implements: &[ValueId],
        make_room: bool,
    ) -> ExecResult<()> {
        let data = self.type_data(type_id)?;
        if data.fixup_done {
            return Err(VmError::internal(format!("Type {} is already fixed up", data.qname)).into());
        }
        let own_native = data.is_native();
        let qname = data.qname.clone();
        if let Some(base) = base {
            let base_data = self.type_data(base)?;
            if base_data.attributes.contains(TypeAttributes::FINAL) {
                return Err(VmError::type_error(format!(
                    "Type {} can't extend final type {}",
                    qname, base_data.qname
                ))
                .into());
            }
            if !base_data.fixup_done {
                return Err(VmError::internal(format!(
                    "Base type {} of {} is not fixed up",
                    base_data.qname, qname
                ))
                .into());
            }
        }

        let members = self.inherited_members(type_id, base, implements)?;
        let count = members.len();
        if make_room && count > 0 {
            let own_functions: Vec<ValueId> = self
                .object(type_id)?
                .slots
                .values()
                .iter()
                .filter_map(|v| v.as_ref_id())
                .filter(|id| {
                    self.heap
                        .get(*id)
                        .and_then(HeapObject::function)
                        .is_some_and(|f| f.owner == Some(type_id))
                })
                .collect();
            for function in own_functions {
                let data = self.function_data_mut(function)?;
                data.slot_num = data.slot_num.map(|s| s + count);
                data.next_slot = data.next_slot.map(|s| s + count);
            }
            let object = self.object_mut(type_id)?;
            object.slots.insert_at(0, count);
            if let Some(block) = object.block_mut() {
                block.insert_traits(0, count);
            }
        }
        let object = self.object_mut(type_id)?;
        for (slot, member) in members.into_iter().enumerate() {
            object.slots.set(slot, member.value);
            if let Some(name) = member.name {
                object.slots.set_name(slot, name);
            }
            if let Some(block) = object.block_mut() {
                block.set_trait(slot, member.attributes);
            }
        }

        let mut instance_block = self.type_data(type_id)?.instance_block;
        let mut namespaces = Vec::new();
        let mut flags = None;
        if let Some(base) = base {
            let base_data = self.type_data(base)?;
            namespaces = base_data.block.namespaces.clone();
            let base_instance = base_data.instance_block;
            flags = Some((
                base_data.instance_size,
                base_data.is_native() || base_data.has_native_base,
                base_data.no_bind,
                base_data.has_constructor() || base_data.has_base_constructors,
                base_data.initializer.is_some() || base_data.has_base_initializers,
                base != self.core.object && base_data.attributes.contains(TypeAttributes::DYNAMIC_INSTANCE),
                base_data.sub_type_count + 1,
                base_data.helpers.clone(),
                base_data.dont_pool,
            ));
            if let Some(base_instance) = base_instance {
                match instance_block {
                    Some(own) => self.inherit_block_slots(own, base_instance)?,
                    None => {
                        let block_type = self.core.block;
                        let object =
                            HeapObject::new(block_type, SlotTable::new(), ObjectKind::Block(BlockData::new(None)));
                        let block = self.alloc(object)?;
                        self.inherit_block_slots(block, base_instance)?;
                        instance_block = Some(block);
                    }
                }
            }
        }

        let data = self.type_data_mut(type_id)?;
        data.block.num_inherited = count;
        for namespace in namespaces {
            if !data.block.namespaces.contains(&namespace) {
                data.block.namespaces.push(namespace);
            }
        }
        data.instance_block = instance_block;
        if let Some((size, native_base, no_bind, constructors, initializers, dynamic, depth, helpers, dont_pool)) = flags {
            data.instance_size = data.instance_size.max(size);
            data.has_native_base = native_base;
            data.no_bind |= no_bind || (!own_native && native_base);
            data.has_base_constructors |= constructors;
            data.has_base_initializers |= initializers;
            if dynamic {
                data.attributes.insert(TypeAttributes::DYNAMIC_INSTANCE);
            }
            data.sub_type_count = depth;
            if data.inherits_helpers {
                data.helpers = helpers;
            }
            data.dont_pool |= dont_pool;
        }
        data.base_type = base;
        data.implements = implements.to_vec();
        data.need_fixup = false;
        data.fixup_done = true;
        log::trace!("fixed up type {} with {} inherited slots", qname, count);
        Ok(())
    }

    /// Returns true if `candidate` is `target`, derives from it or directly
    /// implements it.
    ///
    /// The base chain matches by identity or by type id, so types cloned into
    /// another interpreter still match. Only the candidate's own `implements`
    /// list is consulted: interfaces of interfaces and interfaces of base
    /// types do not count.
    pub(crate) fn is_subtype_of(&self, candidate: ValueId, target: ValueId) -> bool {
        let target_id = self.heap.get(target).and_then(HeapObject::type_data).map(|t| t.id);
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == target {
                return true;
            }
            let Some(data) = self.heap.get(id).and_then(HeapObject::type_data) else {
                return false;
            };
            if target_id == Some(data.id) {
                return true;
            }
            current = data.base_type;
        }
        self.heap
            .get(candidate)
            .and_then(HeapObject::type_data)
            .is_some_and(|data| data.implements.contains(&target))
    }

    pub(crate) fn instance_of(&self, value: &Value, target: ValueId) -> bool {
        self.is_subtype_of(self.type_of(value), target)
    }

    /// Copies a type's metadata under a fresh pool.
    pub(crate) fn clone_type(&mut self, type_id: ValueId) -> ExecResult<ValueId> {
        let mut copy = self.object(type_id)?.clone();
        let pool_key = self.next_type_id;
        self.next_type_id += 1;
        if let ObjectKind::Type(data) = &mut copy.kind {
            data.pool_key = pool_key;
        }
        self.alloc_with(pool_key, false, copy)
    }

    /// Copies a type; instances of the copy use their own pool.
    pub fn copy_type(&mut self, type_value: &Value) -> VmResult<Value> {
        let result = self.type_id_of(type_value).and_then(|id| self.clone_type(id));
        result.map(Value::Ref).map_err(|e| self.host_error(e))
    }

    /// Runs static initializers once, bases and implemented types first.
    pub(crate) fn ensure_initialized(&mut self, type_id: ValueId) -> ExecResult<()> {
        let data = self.type_data(type_id)?;
        if data.initialized {
            return Ok(());
        }
        let base = data.base_type;
        let implements = data.implements.clone();
        let slot = data.static_initializer_slot();
        self.type_data_mut(type_id)?.initialized = true;
        if let Some(base) = base {
            self.ensure_initialized(base)?;
        }
        for other in implements {
            self.ensure_initialized(other)?;
        }
        if let Some(slot) = slot {
            let initializer = self.object(type_id)?.slots.get(slot).cloned();
            if let Some(initializer) = initializer.filter(|f| self.is_function(f)) {
                log::debug!("running static initializer of {}", self.qualified_type_name(type_id));
                self.invoke(&initializer, &Value::Ref(type_id), &[])?;
            }
        }
        Ok(())
    }

    /// Resolves a type reference against the global object.
    pub(crate) fn resolve_type_ref(&self, type_ref: &TypeRef) -> ExecResult<ValueId> {
        let global = self.object(self.global)?;
        let (value, label) = match type_ref {
            TypeRef::Slot(slot) => (global.slots.get(*slot as usize).cloned(), format!("slot {}", slot)),
            TypeRef::Name(name) => {
                let slot = global
                    .slots
                    .lookup(name)
                    .or_else(|| global.slots.lookup_all(&name.name).first().copied());
                (slot.and_then(|s| global.slots.get(s).cloned()), name.to_string())
            }
        };
        match value {
            Some(Value::Ref(id)) if self.heap.get(id).is_some_and(HeapObject::is_type) => Ok(id),
            _ => Err(VmError::reference(format!("Can't find type {}", label)).into()),
        }
    }

    /// Walks `n` steps up the base chain.
    pub(crate) fn nth_base(&self, type_id: ValueId, n: u32) -> ExecResult<ValueId> {
        let mut current = type_id;
        for _ in 0..n {
            current = self.type_data(current)?.base_type.ok_or_else(|| {
                VmError::reference(format!(
                    "Type {} has no base type",
                    self.qualified_type_name(current)
                ))
            })?;
        }
        Ok(current)
    }

    /// Converts a value to `target`.
    pub(crate) fn cast(&mut self, value: &Value, target: ValueId) -> ExecResult<Value> {
        if value.is_nullish() || self.instance_of(value, target) || target == self.core.object {
            return Ok(value.clone());
        }
        if target == self.core.boolean {
            return Ok(Value::Boolean(value.is_truthy()));
        }
        if target == self.core.number {
            return Ok(Value::Number(self.to_number(value)?));
        }
        if target == self.core.string {
            return Ok(Value::from(self.to_string(value)?));
        }
        let helpers = self.helpers_of(value);
        helpers.cast(self, value, target)
    }

    /// Creates an instance and runs the instance initializers, base first.
    ///
    /// # Returns
    ///
    /// The instance and the constructor to run on it, if any type in the
    /// chain declares one.
    pub(crate) fn new_instance(&mut self, type_id: ValueId) -> ExecResult<(Value, Option<Value>)> {
        let data = self.type_data(type_id)?;
        if data.is_interface() {
            return Err(VmError::type_error(format!("Can't instantiate interface {}", data.qname)).into());
        }
        self.ensure_initialized(type_id)?;
        let object = self.create_value(type_id)?;

        let mut chain = Vec::new();
        let mut current = Some(type_id);
        while let Some(id) = current {
            let data = self.type_data(id)?;
            chain.extend(data.initializer);
            current = data.base_type;
        }
        let roots = self.native_roots.len();
        self.native_roots.push(object.clone());
        let mut result = Ok(());
        for initializer in chain.into_iter().rev() {
            result = self.invoke(&Value::Ref(initializer), &object, &[]).map(|_| ());
            if result.is_err() {
                break;
            }
        }
        self.native_roots.truncate(roots);
        result?;
        let constructor = self.find_constructor(type_id)?;
        Ok((object, constructor))
    }

    /// Nearest constructor in the base chain, starting at `type_id`.
    pub(crate) fn find_constructor(&self, type_id: ValueId) -> ExecResult<Option<Value>> {
        let mut current = Some(type_id);
        while let Some(id) = current {
            let object = self.object(id)?;
            let Some(data) = object.type_data() else { break };
            if let Some(slot) = data.constructor_slot() {
                if let Some(constructor) = object.slots.get(slot).filter(|f| self.is_function(f)) {
                    return Ok(Some(constructor.clone()));
                }
            }
            current = data.base_type;
        }
        Ok(None)
    }
}
