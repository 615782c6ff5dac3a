//! Helper sets of the immediate value types

use crate::error::ExecResult;
use crate::helpers::Helpers;
use crate::operators;
use crate::vm::Vm;
use bytecode_system::Operator;
use core_types::{QualifiedName, Value, ValueId, VmError};

fn null_receiver(value: &Value, name: &QualifiedName) -> VmError {
    VmError::reference(format!(
        "Can't access property \"{}\" of {}",
        name,
        value.primitive_type_name()
    ))
}

fn read_only(value: &Value, name: &QualifiedName) -> VmError {
    VmError::type_error(format!(
        "Can't set property \"{}\" of a {} value",
        name,
        value.primitive_type_name()
    ))
}

macro_rules! primitive_helpers {
    ($(#[$meta:meta])* $name:ident, $label:expr, $initial:expr) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $name;

        impl Helpers for $name {
            fn name(&self) -> &'static str {
                $label
            }

            fn create(&self, _vm: &mut Vm, _type_id: ValueId) -> ExecResult<Value> {
                Ok($initial)
            }

            fn set_property_by_name(
                &self,
                _vm: &mut Vm,
                object: &Value,
                name: &QualifiedName,
                _value: &Value,
            ) -> ExecResult<bool> {
                Err(read_only(object, name).into())
            }

            fn invoke_operator(
                &self,
                vm: &mut Vm,
                lhs: &Value,
                op: Operator,
                rhs: Option<&Value>,
            ) -> ExecResult<Option<Value>> {
                operators::coerce(vm, lhs, op, rhs).map(Some)
            }
        }
    };
}

primitive_helpers!(
    /// Numbers
    NumberHelpers,
    "Number",
    Value::Number(0.0)
);

primitive_helpers!(
    /// Booleans
    BooleanHelpers,
    "Boolean",
    Value::Boolean(false)
);

/// Strings
#[derive(Debug, Default)]
pub struct StringHelpers;

impl Helpers for StringHelpers {
    fn name(&self) -> &'static str {
        "String"
    }

    fn create(&self, _vm: &mut Vm, _type_id: ValueId) -> ExecResult<Value> {
        Ok(Value::from(""))
    }

    fn get_property(&self, _vm: &mut Vm, object: &Value, slot: usize) -> ExecResult<Value> {
        let text = object.as_str().unwrap_or_default();
        Ok(text
            .chars()
            .nth(slot)
            .map_or(Value::Undefined, |c| Value::from(c.to_string())))
    }

    fn get_property_by_name(
        &self,
        _vm: &mut Vm,
        object: &Value,
        name: &QualifiedName,
    ) -> ExecResult<Option<Value>> {
        if name.is_public() && name.name == "length" {
            let text = object.as_str().unwrap_or_default();
            return Ok(Some(Value::Number(text.chars().count() as f64)));
        }
        Ok(None)
    }

    fn set_property_by_name(
        &self,
        _vm: &mut Vm,
        object: &Value,
        name: &QualifiedName,
        _value: &Value,
    ) -> ExecResult<bool> {
        Err(read_only(object, name).into())
    }

    fn property_count(&self, _vm: &Vm, object: &Value) -> usize {
        object.as_str().map_or(0, |s| s.chars().count())
    }

    fn property_name(&self, vm: &Vm, object: &Value, slot: usize) -> Option<QualifiedName> {
        (slot < self.property_count(vm, object)).then(|| QualifiedName::public(slot.to_string()))
    }

    fn invoke_operator(
        &self,
        vm: &mut Vm,
        lhs: &Value,
        op: Operator,
        rhs: Option<&Value>,
    ) -> ExecResult<Option<Value>> {
        operators::coerce(vm, lhs, op, rhs).map(Some)
    }
}

macro_rules! nullish_helpers {
    ($(#[$meta:meta])* $name:ident, $label:expr, $initial:expr) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $name;

        impl Helpers for $name {
            fn name(&self) -> &'static str {
                $label
            }

            fn create(&self, _vm: &mut Vm, _type_id: ValueId) -> ExecResult<Value> {
                Ok($initial)
            }

            fn get_property_by_name(
                &self,
                _vm: &mut Vm,
                object: &Value,
                name: &QualifiedName,
            ) -> ExecResult<Option<Value>> {
                Err(null_receiver(object, name).into())
            }

            fn set_property_by_name(
                &self,
                _vm: &mut Vm,
                object: &Value,
                name: &QualifiedName,
                _value: &Value,
            ) -> ExecResult<bool> {
                Err(null_receiver(object, name).into())
            }

            fn invoke_operator(
                &self,
                vm: &mut Vm,
                lhs: &Value,
                op: Operator,
                rhs: Option<&Value>,
            ) -> ExecResult<Option<Value>> {
                operators::coerce(vm, lhs, op, rhs).map(Some)
            }
        }
    };
}

nullish_helpers!(
    /// The null value
    NullHelpers,
    "Null",
    Value::Null
);

nullish_helpers!(
    /// The undefined value
    VoidHelpers,
    "Void",
    Value::Undefined
);
