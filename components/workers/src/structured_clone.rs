//! Structured clone of interpreter values
//!
//! A value graph is flattened into a [`StructuredValue`] tree inside the
//! sending interpreter and rebuilt as a brand-new graph inside the
//! receiving one. Composite values are numbered in the order they are
//! first met; meeting one again writes a [`StructuredValue::Reference`] to
//! that number, which keeps shared children shared and lets cycles
//! survive the trip.

use core_types::{ErrorKind, QualifiedName, Value, ValueId, VmError, VmResult};
use interpreter::{ObjectKind, Vm};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deepest nesting a message may have
pub const MAX_DEPTH: usize = 1000;

/// A value detached from any heap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructuredValue {
    /// undefined
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number
    Number(f64),
    /// String value
    String(String),
    /// Array elements
    Array(Vec<StructuredValue>),
    /// Named properties of an object
    Object(Vec<(QualifiedName, StructuredValue)>),
    /// Error instance; `kind` is `None` for the base `Error` type
    Error {
        /// Error kind
        kind: Option<ErrorKind>,
        /// Message
        message: String,
    },
    /// A composite value already written, by order of first appearance
    Reference(u32),
}

impl StructuredValue {
    /// Encodes for transfer.
    pub fn to_bytes(&self) -> VmResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| VmError::io(format!("Can't encode message: {}", e)))
    }

    /// Decodes a transferred message.
    pub fn from_bytes(bytes: &[u8]) -> VmResult<Self> {
        bincode::deserialize(bytes).map_err(|e| VmError::io(format!("Corrupt message: {}", e)))
    }
}

/// Flattens `value` and everything reachable from it.
///
/// # Errors
///
/// `TypeError` for functions, types and other values that only make sense
/// inside their own interpreter.
pub fn serialize_value(vm: &Vm, value: &Value) -> VmResult<StructuredValue> {
    Writer::default().write(vm, value, 0)
}

/// Rebuilds a flattened value in `vm`'s heap.
pub fn deserialize_value(vm: &mut Vm, value: &StructuredValue) -> VmResult<Value> {
    Reader::default().read(vm, value, 0)
}

/// Flattens and encodes `value` in one step.
pub fn encode(vm: &Vm, value: &Value) -> VmResult<Vec<u8>> {
    serialize_value(vm, value)?.to_bytes()
}

/// Decodes and rebuilds a message in one step.
pub fn decode(vm: &mut Vm, bytes: &[u8]) -> VmResult<Value> {
    let value = StructuredValue::from_bytes(bytes)?;
    deserialize_value(vm, &value)
}

fn too_deep() -> VmError {
    VmError::type_error(format!("Can't clone values nested deeper than {}", MAX_DEPTH))
}

#[derive(Default)]
struct Writer {
    seen: HashMap<ValueId, u32>,
}

impl Writer {
    fn write(&mut self, vm: &Vm, value: &Value, depth: usize) -> VmResult<StructuredValue> {
        if depth > MAX_DEPTH {
            return Err(too_deep());
        }
        let id = match value {
            Value::Undefined => return Ok(StructuredValue::Undefined),
            Value::Null => return Ok(StructuredValue::Null),
            Value::Boolean(b) => return Ok(StructuredValue::Boolean(*b)),
            Value::Number(n) => return Ok(StructuredValue::Number(*n)),
            Value::String(s) => return Ok(StructuredValue::String(s.to_string())),
            Value::Ref(id) => *id,
        };
        if let Some(index) = self.seen.get(&id) {
            return Ok(StructuredValue::Reference(*index));
        }
        let object = vm
            .heap_object(id)
            .ok_or_else(|| VmError::internal(format!("Stale value handle {}", id)))?;
        match &object.kind {
            ObjectKind::Function(_) | ObjectKind::Type(_) | ObjectKind::Block(_) | ObjectKind::Iterator(_) => {
                return Err(VmError::type_error(format!("Can't clone a value of type {}", vm.type_name(value))));
            }
            _ => {}
        }
        let index = self.seen.len() as u32;
        self.seen.insert(id, index);

        match &object.kind {
            ObjectKind::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.write(vm, item, depth + 1))
                    .collect::<VmResult<Vec<_>>>()?;
                Ok(StructuredValue::Array(items))
            }
            ObjectKind::Error(data) => Ok(StructuredValue::Error {
                kind: data.kind,
                message: data.message.clone(),
            }),
            _ => {
                let mut properties = Vec::new();
                for (slot, name) in object.slots.named_slots() {
                    let item = object.slots.get(slot).cloned().unwrap_or_default();
                    properties.push((name, self.write(vm, &item, depth + 1)?));
                }
                Ok(StructuredValue::Object(properties))
            }
        }
    }
}

#[derive(Default)]
struct Reader {
    created: Vec<Value>,
}

impl Reader {
    fn read(&mut self, vm: &mut Vm, value: &StructuredValue, depth: usize) -> VmResult<Value> {
        if depth > MAX_DEPTH {
            return Err(too_deep());
        }
        match value {
            StructuredValue::Undefined => Ok(Value::Undefined),
            StructuredValue::Null => Ok(Value::Null),
            StructuredValue::Boolean(b) => Ok(Value::Boolean(*b)),
            StructuredValue::Number(n) => Ok(Value::Number(*n)),
            StructuredValue::String(s) => Ok(Value::from(s.as_str())),
            StructuredValue::Array(items) => {
                let array = vm.new_array(Vec::with_capacity(items.len()))?;
                self.created.push(array.clone());
                for (index, item) in items.iter().enumerate() {
                    let item = self.read(vm, item, depth + 1)?;
                    vm.set_property(&array, &index.to_string(), item)?;
                }
                Ok(array)
            }
            StructuredValue::Object(properties) => {
                let object = vm.new_object()?;
                self.created.push(object.clone());
                for (name, item) in properties {
                    let item = self.read(vm, item, depth + 1)?;
                    vm.set_qualified_property(&object, name, item)?;
                }
                Ok(object)
            }
            StructuredValue::Error { kind, message } => {
                let error = match kind {
                    Some(kind) => vm.new_error(*kind, message)?,
                    None => vm.new_base_error(message)?,
                };
                self.created.push(error.clone());
                Ok(error)
            }
            StructuredValue::Reference(index) => self
                .created
                .get(*index as usize)
                .cloned()
                .ok_or_else(|| VmError::io(format!("Corrupt message: bad back-reference {}", index))),
        }
    }
}
