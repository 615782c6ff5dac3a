//! Per-type helper sets
//!
//! Every type carries an `Rc<dyn Helpers>` that implements creation,
//! property access, operators, marking and destruction for its values. The
//! trait's default methods give plain slot-backed behavior, so a helper set
//! only overrides what differs for its kind of value.

use crate::error::ExecResult;
use crate::object::{ErrorData, HeapObject, ObjectFlags, ObjectKind};
use crate::operators;
use crate::vm::{object_size, Vm};
use bytecode_system::Operator;
use core_types::{QualifiedName, TypeAttributes, Value, ValueId, VmError};
use memory_manager::{Disposal, SlotTable};

/// Resolves the heap handle of a property receiver.
pub(crate) fn receiver(value: &Value) -> ExecResult<ValueId> {
    match value {
        Value::Ref(id) => Ok(*id),
        Value::Undefined | Value::Null => Err(VmError::reference("Object reference is null").into()),
        other => Err(VmError::type_error(format!(
            "Value of type {} has no slots",
            other.primitive_type_name()
        ))
        .into()),
    }
}

/// Operations every value supports, dispatched through its type.
pub trait Helpers {
    /// Name used in diagnostics
    fn name(&self) -> &'static str;

    /// Creates a new value of `type_id`.
    ///
    /// The default builds a slot-backed object shaped by the type's instance
    /// block.
    fn create(&self, vm: &mut Vm, type_id: ValueId) -> ExecResult<Value> {
        let (slots, attributes) = vm.instance_template(type_id)?;
        let mut object = HeapObject::new(type_id, slots, ObjectKind::Object);
        object.flags.dynamic = attributes.contains(TypeAttributes::DYNAMIC_INSTANCE);
        Ok(Value::Ref(vm.alloc(object)?))
    }

    /// Copies a value; primitives and shared values return themselves.
    fn clone_value(&self, _vm: &mut Vm, value: &Value, _deep: bool) -> ExecResult<Value> {
        Ok(value.clone())
    }

    /// Converts to a type the interpreter has no built-in rule for.
    fn cast(&self, vm: &mut Vm, value: &Value, target: ValueId) -> ExecResult<Value> {
        Err(VmError::type_error(format!(
            "Can't cast {} to {}",
            vm.type_name(value),
            vm.qualified_type_name(target)
        ))
        .into())
    }

    /// Reads a slot.
    fn get_property(&self, vm: &mut Vm, object: &Value, slot: usize) -> ExecResult<Value> {
        let id = receiver(object)?;
        vm.object(id)?
            .slots
            .get(slot)
            .cloned()
            .ok_or_else(|| VmError::reference(format!("Slot {} is out of range", slot)).into())
    }

    /// Writes a slot and returns its number.
    fn set_property(&self, vm: &mut Vm, object: &Value, slot: usize, value: Value) -> ExecResult<usize> {
        let id = receiver(object)?;
        let target = vm.object_mut(id)?;
        if slot >= target.slots.count() && !target.flags.dynamic {
            return Err(VmError::type_error(format!(
                "Can't add slot {} to a non-dynamic object",
                slot
            ))
            .into());
        }
        target.slots.set(slot, value);
        Ok(slot)
    }

    /// Deletes a slot; returns false when the value cannot lose properties.
    fn delete_property(&self, vm: &mut Vm, object: &Value, slot: usize) -> ExecResult<bool> {
        let id = receiver(object)?;
        let target = vm.object_mut(id)?;
        if !target.flags.dynamic || slot >= target.slots.count() {
            return Ok(false);
        }
        target.slots.remove(slot, false);
        target.slots.set(slot, Value::Null);
        Ok(true)
    }

    /// Reads a property the value resolves itself, before slot lookup.
    fn get_property_by_name(
        &self,
        _vm: &mut Vm,
        _object: &Value,
        _name: &QualifiedName,
    ) -> ExecResult<Option<Value>> {
        Ok(None)
    }

    /// Writes a property the value resolves itself; returns true if handled.
    fn set_property_by_name(
        &self,
        _vm: &mut Vm,
        _object: &Value,
        _name: &QualifiedName,
        _value: &Value,
    ) -> ExecResult<bool> {
        Ok(false)
    }

    /// Finds the slot holding `name` exactly.
    fn lookup_property(&self, vm: &Vm, object: &Value, name: &QualifiedName) -> Option<usize> {
        let id = object.as_ref_id()?;
        vm.heap.get(id)?.slots.lookup(name)
    }

    /// Number of properties.
    fn property_count(&self, vm: &Vm, object: &Value) -> usize {
        object
            .as_ref_id()
            .and_then(|id| vm.heap.get(id))
            .map_or(0, |o| o.slots.count())
    }

    /// Name of a property slot.
    fn property_name(&self, vm: &Vm, object: &Value, slot: usize) -> Option<QualifiedName> {
        let id = object.as_ref_id()?;
        vm.heap.get(id)?.slots.name(slot).cloned()
    }

    /// Evaluates an operator with this value on the left.
    ///
    /// Returns `None` when the value does not handle `op` natively, letting
    /// the interpreter try a script operator method.
    fn invoke_operator(
        &self,
        vm: &mut Vm,
        lhs: &Value,
        op: Operator,
        rhs: Option<&Value>,
    ) -> ExecResult<Option<Value>> {
        match (op, rhs) {
            (Operator::StrictEq | Operator::Eq, Some(rhs)) => Ok(Some(Value::Boolean(lhs == rhs))),
            (Operator::StrictNe | Operator::Ne, Some(rhs)) => Ok(Some(Value::Boolean(lhs != rhs))),
            (_, None) if op.is_unary() && op != Operator::Neg && op != Operator::BitNot => {
                operators::unary(vm, lhs, op).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Pushes every handle `object` keeps alive.
    fn mark(&self, object: &HeapObject, out: &mut Vec<ValueId>) {
        object.references(out);
    }

    /// Releases a swept value's contents.
    fn destroy(&self, object: &mut HeapObject) -> Disposal {
        object.slots.clear();
        object.kind = ObjectKind::Object;
        Disposal::Pool
    }
}

/// Plain script objects.
#[derive(Debug, Default)]
pub struct ObjectHelpers;

impl Helpers for ObjectHelpers {
    fn name(&self) -> &'static str {
        "Object"
    }

    fn clone_value(&self, vm: &mut Vm, value: &Value, deep: bool) -> ExecResult<Value> {
        vm.copy_object(value, deep)
    }

    fn invoke_operator(
        &self,
        vm: &mut Vm,
        lhs: &Value,
        op: Operator,
        rhs: Option<&Value>,
    ) -> ExecResult<Option<Value>> {
        if op.is_overloadable() && vm.find_operator_method(lhs, op).is_some() {
            return Ok(None);
        }
        operators::coerce(vm, lhs, op, rhs).map(Some)
    }
}

/// Lexical and activation blocks.
#[derive(Debug, Default)]
pub struct BlockHelpers;

impl Helpers for BlockHelpers {
    fn name(&self) -> &'static str {
        "Block"
    }

    fn create(&self, _vm: &mut Vm, _type_id: ValueId) -> ExecResult<Value> {
        Err(VmError::type_error("Blocks can't be constructed").into())
    }
}

/// Functions and methods.
#[derive(Debug, Default)]
pub struct FunctionHelpers;

impl Helpers for FunctionHelpers {
    fn name(&self) -> &'static str {
        "Function"
    }

    fn create(&self, _vm: &mut Vm, _type_id: ValueId) -> ExecResult<Value> {
        Err(VmError::type_error("Functions can't be constructed with new").into())
    }

    fn get_property_by_name(
        &self,
        vm: &mut Vm,
        object: &Value,
        name: &QualifiedName,
    ) -> ExecResult<Option<Value>> {
        let id = receiver(object)?;
        let Some(function) = vm.object(id)?.function() else {
            return Ok(None);
        };
        Ok(match name.name.as_str() {
            "length" if name.is_public() => Some(Value::Number(function.num_args as f64)),
            "name" if name.is_public() => Some(Value::from(function.name.name.as_str())),
            _ => None,
        })
    }
}

/// Type objects.
#[derive(Debug, Default)]
pub struct TypeHelpers;

impl Helpers for TypeHelpers {
    fn name(&self) -> &'static str {
        "Type"
    }

    fn create(&self, _vm: &mut Vm, _type_id: ValueId) -> ExecResult<Value> {
        Err(VmError::type_error("Types are created by the type factory").into())
    }

    fn destroy(&self, object: &mut HeapObject) -> Disposal {
        object.slots.clear();
        Disposal::Release
    }
}

pub(crate) fn array_index(name: &QualifiedName) -> Option<usize> {
    if !name.is_public() || name.name.is_empty() {
        return None;
    }
    if name.name.len() > 1 && name.name.starts_with('0') {
        return None;
    }
    name.name.parse().ok()
}

/// Largest array length; indices run below it.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Arrays; slots are elements.
#[derive(Debug, Default)]
pub struct ArrayHelpers;

impl ArrayHelpers {
    /// Grows or truncates the elements of `id` to `length`, charging the
    /// new size to the heap before any element storage is touched.
    fn set_length(vm: &mut Vm, id: ValueId, length: usize) -> ExecResult<()> {
        if length > MAX_ARRAY_LENGTH {
            return Err(VmError::arg(format!("Bad array length {}", length)).into());
        }
        let object = vm.object(id)?;
        let ObjectKind::Array(items) = &object.kind else {
            return Ok(());
        };
        if items.len() == length {
            return Ok(());
        }
        let element = std::mem::size_of::<Value>();
        let size = (object_size(object) - items.len() * element)
            .checked_add(length.saturating_mul(element))
            .ok_or_else(|| VmError::memory(format!("Array of {} elements is too large", length)))?;
        vm.resize_object(id, size)?;
        if let ObjectKind::Array(items) = &mut vm.object_mut(id)?.kind {
            items.resize(length, Value::Undefined);
        }
        Ok(())
    }
}

impl Helpers for ArrayHelpers {
    fn name(&self) -> &'static str {
        "Array"
    }

    fn create(&self, vm: &mut Vm, type_id: ValueId) -> ExecResult<Value> {
        let object = HeapObject::new(type_id, SlotTable::new(), ObjectKind::Array(Vec::new()));
        Ok(Value::Ref(vm.alloc(object)?))
    }

    fn clone_value(&self, vm: &mut Vm, value: &Value, deep: bool) -> ExecResult<Value> {
        vm.copy_object(value, deep)
    }

    fn get_property(&self, vm: &mut Vm, object: &Value, slot: usize) -> ExecResult<Value> {
        let id = receiver(object)?;
        match &vm.object(id)?.kind {
            ObjectKind::Array(items) => Ok(items.get(slot).cloned().unwrap_or(Value::Undefined)),
            _ => Ok(Value::Undefined),
        }
    }

    fn set_property(&self, vm: &mut Vm, object: &Value, slot: usize, value: Value) -> ExecResult<usize> {
        let id = receiver(object)?;
        if slot >= MAX_ARRAY_LENGTH {
            return Err(VmError::arg(format!("Bad array index {}", slot)).into());
        }
        if matches!(&vm.object(id)?.kind, ObjectKind::Array(items) if slot >= items.len()) {
            Self::set_length(vm, id, slot + 1)?;
        }
        if let ObjectKind::Array(items) = &mut vm.object_mut(id)?.kind {
            if let Some(item) = items.get_mut(slot) {
                *item = value;
            }
        }
        Ok(slot)
    }

    fn delete_property(&self, vm: &mut Vm, object: &Value, slot: usize) -> ExecResult<bool> {
        let id = receiver(object)?;
        if let ObjectKind::Array(items) = &mut vm.object_mut(id)?.kind {
            if let Some(item) = items.get_mut(slot) {
                *item = Value::Undefined;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_property_by_name(
        &self,
        vm: &mut Vm,
        object: &Value,
        name: &QualifiedName,
    ) -> ExecResult<Option<Value>> {
        let id = receiver(object)?;
        let ObjectKind::Array(items) = &vm.object(id)?.kind else {
            return Ok(None);
        };
        if name.is_public() && name.name == "length" {
            return Ok(Some(Value::Number(items.len() as f64)));
        }
        Ok(array_index(name).map(|index| items.get(index).cloned().unwrap_or(Value::Undefined)))
    }

    fn set_property_by_name(
        &self,
        vm: &mut Vm,
        object: &Value,
        name: &QualifiedName,
        value: &Value,
    ) -> ExecResult<bool> {
        if name.is_public() && name.name == "length" {
            let length = vm.to_number(value)?;
            if !(length >= 0.0 && length.fract() == 0.0 && length <= MAX_ARRAY_LENGTH as f64) {
                return Err(VmError::arg(format!("Bad array length {}", length)).into());
            }
            let id = receiver(object)?;
            Self::set_length(vm, id, length as usize)?;
            return Ok(true);
        }
        match array_index(name) {
            Some(index) => {
                self.set_property(vm, object, index, value.clone())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn lookup_property(&self, _vm: &Vm, _object: &Value, _name: &QualifiedName) -> Option<usize> {
        None
    }

    fn property_count(&self, vm: &Vm, object: &Value) -> usize {
        match object.as_ref_id().and_then(|id| vm.heap.get(id)).map(|o| &o.kind) {
            Some(ObjectKind::Array(items)) => items.len(),
            _ => 0,
        }
    }

    fn property_name(&self, vm: &Vm, object: &Value, slot: usize) -> Option<QualifiedName> {
        (slot < self.property_count(vm, object)).then(|| QualifiedName::public(slot.to_string()))
    }
}

/// Error instances.
#[derive(Debug, Default)]
pub struct ErrorHelpers;

impl Helpers for ErrorHelpers {
    fn name(&self) -> &'static str {
        "Error"
    }

    fn create(&self, vm: &mut Vm, type_id: ValueId) -> ExecResult<Value> {
        let (slots, _) = vm.instance_template(type_id)?;
        let kind = vm.error_kind_of(type_id);
        let object = HeapObject {
            type_id,
            flags: ObjectFlags {
                dynamic: true,
                ..ObjectFlags::default()
            },
            slots,
            kind: ObjectKind::Error(ErrorData {
                kind,
                message: String::new(),
                stack: Vec::new(),
                position: None,
            }),
        };
        Ok(Value::Ref(vm.alloc(object)?))
    }

    fn get_property_by_name(
        &self,
        vm: &mut Vm,
        object: &Value,
        name: &QualifiedName,
    ) -> ExecResult<Option<Value>> {
        let id = receiver(object)?;
        let type_id = vm.object(id)?.type_id;
        let ObjectKind::Error(data) = &vm.object(id)?.kind else {
            return Ok(None);
        };
        if !name.is_public() {
            return Ok(None);
        }
        Ok(match name.name.as_str() {
            "message" => Some(Value::from(data.message.as_str())),
            "stack" => Some(Value::from(
                data.stack
                    .iter()
                    .map(|frame| format!("    at {}", frame))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )),
            "line" => Some(data.position.map_or(Value::Undefined, |p| Value::Number(p.line as f64))),
            "name" => Some(Value::from(vm.qualified_type_name(type_id))),
            _ => None,
        })
    }

    fn set_property_by_name(
        &self,
        vm: &mut Vm,
        object: &Value,
        name: &QualifiedName,
        value: &Value,
    ) -> ExecResult<bool> {
        if !(name.is_public() && name.name == "message") {
            return Ok(false);
        }
        let text = vm.to_string(value)?;
        let id = receiver(object)?;
        if let ObjectKind::Error(data) = &mut vm.object_mut(id)?.kind {
            data.message = text;
        }
        Ok(true)
    }
}
