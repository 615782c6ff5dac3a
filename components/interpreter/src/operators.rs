//! Operator evaluation and value conversion
//!
//! Binary and unary opcodes first ask the left operand's helpers; when
//! they decline, an operator method on the left operand's type is tried.
//! [`coerce`] implements the conversions shared by the built-in types.

use crate::config::NumericDomain;
use crate::error::ExecResult;
use crate::object::ObjectKind;
use crate::vm::Vm;
use bytecode_system::Operator;
use core_types::{format_number, QualifiedName, Value, ValueId, VmError};

/// ECMAScript `ToInt32`.
pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc() % 4_294_967_296.0;
    (wrapped as i64) as u32 as i32
}

fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

/// Parses script number syntax; blank text is zero.
pub(crate) fn parse_number(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    match text {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => text.parse().unwrap_or(f64::NAN),
    }
}

/// Evaluates a unary operator.
pub(crate) fn unary(vm: &mut Vm, value: &Value, op: Operator) -> ExecResult<Value> {
    Ok(match op {
        Operator::Neg => Value::Number(-vm.to_number(value)?),
        Operator::BitNot => Value::Number(f64::from(!to_int32(vm.to_number(value)?))),
        Operator::LogicalNot => Value::Boolean(!value.is_truthy()),
        Operator::CompareTrue => Value::Boolean(value.is_truthy()),
        Operator::CompareFalse => Value::Boolean(!value.is_truthy()),
        Operator::CompareNull => Value::Boolean(value.is_null()),
        Operator::CompareUndefined => Value::Boolean(value.is_undefined()),
        Operator::CompareZero => Value::Boolean(vm.to_number(value)? == 0.0),
        Operator::CompareNotZero => Value::Boolean(vm.to_number(value)? != 0.0),
        _ => {
            return Err(VmError::internal(format!("Operator {} needs two operands", op.symbol())).into())
        }
    })
}

/// Built-in operator semantics with operand coercion.
pub(crate) fn coerce(vm: &mut Vm, lhs: &Value, op: Operator, rhs: Option<&Value>) -> ExecResult<Value> {
    let Some(rhs) = rhs else {
        return unary(vm, lhs, op);
    };
    Ok(match op {
        Operator::StrictEq => Value::Boolean(lhs == rhs),
        Operator::StrictNe => Value::Boolean(lhs != rhs),
        Operator::Eq => Value::Boolean(vm.loose_equals(lhs, rhs)?),
        Operator::Ne => Value::Boolean(!vm.loose_equals(lhs, rhs)?),
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            Value::Boolean(vm.compare(op, lhs, rhs)?)
        }
        Operator::Add => vm.add(lhs, rhs)?,
        _ => {
            let (a, b) = match (lhs, rhs) {
                (Value::Ref(_), Value::Ref(_)) => (vm.to_number(lhs)?, vm.to_number(rhs)?),
                (Value::Ref(_), _) => (0.0, vm.to_number(rhs)?),
                (_, Value::Ref(_)) => (vm.to_number(lhs)?, 0.0),
                _ => (vm.to_number(lhs)?, vm.to_number(rhs)?),
            };
            Value::Number(vm.arithmetic(op, a, b)?)
        }
    })
}

impl Vm {
    /// Evaluates a binary operator.
    pub(crate) fn eval_binary(&mut self, op: Operator, lhs: Value, rhs: Value) -> ExecResult<Value> {
        let helpers = self.helpers_of(&lhs);
        if let Some(result) = helpers.invoke_operator(self, &lhs, op, Some(&rhs))? {
            return Ok(result);
        }
        if op.is_overloadable() {
            if let Some(method) = self.find_operator_method(&lhs, op) {
                return self.invoke(&method, &lhs, &[rhs]);
            }
        }
        Err(VmError::type_error(format!(
            "Operator \"{}\" is not supported by {}",
            op.symbol(),
            self.type_name(&lhs)
        ))
        .into())
    }

    /// Evaluates a unary operator.
    pub(crate) fn eval_unary(&mut self, op: Operator, value: Value) -> ExecResult<Value> {
        let helpers = self.helpers_of(&value);
        if let Some(result) = helpers.invoke_operator(self, &value, op, None)? {
            return Ok(result);
        }
        Err(VmError::type_error(format!(
            "Operator \"{}\" is not supported by {}",
            op.symbol(),
            self.type_name(&value)
        ))
        .into())
    }

    /// Finds a script method implementing `op` on the type of `lhs`.
    pub(crate) fn find_operator_method(&self, lhs: &Value, op: Operator) -> Option<Value> {
        let Value::Ref(id) = lhs else { return None };
        if self.heap.get(*id)?.is_type() {
            return None;
        }
        let name = QualifiedName::public(op.symbol());
        let mut current = Some(self.type_of(lhs));
        while let Some(type_id) = current {
            let object = self.heap.get(type_id)?;
            if let Some(slot) = object.slots.lookup(&name) {
                let method = object.slots.get(slot)?.clone();
                return self.is_function(&method).then_some(method);
            }
            current = object.type_data()?.base_type;
        }
        None
    }

    /// Applies an arithmetic or bitwise operator in the configured domain.
    pub(crate) fn arithmetic(&self, op: Operator, a: f64, b: f64) -> ExecResult<f64> {
        let integer = self.config.numeric == NumericDomain::Integer;
        let shift = |b: f64| to_uint32(b) & 31;
        let result = match op {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
            Operator::Div => {
                if b == 0.0 && integer {
                    return Err(VmError::arithmetic("Divisor is zero").into());
                }
                a / b
            }
            Operator::Rem => {
                if b == 0.0 {
                    return Err(VmError::arithmetic("Divisor is zero").into());
                }
                a % b
            }
            Operator::Shl => f64::from(to_int32(a).wrapping_shl(shift(b))),
            Operator::Shr => f64::from(to_int32(a).wrapping_shr(shift(b))),
            Operator::Ushr => f64::from(to_uint32(a).wrapping_shr(shift(b))),
            Operator::BitAnd => f64::from(to_int32(a) & to_int32(b)),
            Operator::BitOr => f64::from(to_int32(a) | to_int32(b)),
            Operator::BitXor => f64::from(to_int32(a) ^ to_int32(b)),
            _ => {
                return Err(VmError::internal(format!(
                    "Operator {} is not arithmetic",
                    op.symbol()
                ))
                .into())
            }
        };
        Ok(if integer { result.trunc() } else { result })
    }

    fn add(&mut self, lhs: &Value, rhs: &Value) -> ExecResult<Value> {
        let concat = match (lhs, rhs) {
            (Value::String(_), _) | (_, Value::String(_)) => true,
            (Value::Ref(_), Value::Ref(_)) => false,
            (Value::Ref(_), _) | (_, Value::Ref(_)) => true,
            _ => false,
        };
        if concat {
            let mut text = self.to_string(lhs)?;
            text.push_str(&self.to_string(rhs)?);
            return Ok(Value::from(text));
        }
        let (a, b) = (self.to_number(lhs)?, self.to_number(rhs)?);
        Ok(Value::Number(self.arithmetic(Operator::Add, a, b)?))
    }

    /// `==` semantics.
    pub(crate) fn loose_equals(&mut self, lhs: &Value, rhs: &Value) -> ExecResult<bool> {
        Ok(match (lhs, rhs) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Ref(_), Value::Number(n)) => self.to_number(lhs)? == *n,
            (Value::Number(n), Value::Ref(_)) => self.to_number(rhs)? == *n,
            (Value::Ref(_), _) | (_, Value::Ref(_)) => self.to_string(lhs)? == self.to_string(rhs)?,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            _ => self.to_number(lhs)? == self.to_number(rhs)?,
        })
    }

    fn compare(&mut self, op: Operator, lhs: &Value, rhs: &Value) -> ExecResult<bool> {
        let as_strings = match (lhs, rhs) {
            (Value::String(_), Value::String(_)) => true,
            (Value::Ref(_), Value::Number(_)) | (Value::Number(_), Value::Ref(_)) => false,
            (Value::Ref(_), _) | (_, Value::Ref(_)) => true,
            _ => false,
        };
        if as_strings {
            let (a, b) = (self.to_string(lhs)?, self.to_string(rhs)?);
            return Ok(match op {
                Operator::Lt => a < b,
                Operator::Le => a <= b,
                Operator::Gt => a > b,
                _ => a >= b,
            });
        }
        let (a, b) = (self.to_number(lhs)?, self.to_number(rhs)?);
        Ok(match op {
            Operator::Lt => a < b,
            Operator::Le => a <= b,
            Operator::Gt => a > b,
            _ => a >= b,
        })
    }

    /// Converts a value to a number.
    pub fn to_number(&mut self, value: &Value) -> ExecResult<f64> {
        Ok(match value {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Ref(_) => {
                let text = self.to_string(value)?;
                parse_number(&text)
            }
        })
    }

    /// Converts a value to a string.
    ///
    /// Objects whose type chain defines `toString` are converted by calling it.
    pub fn to_string(&mut self, value: &Value) -> ExecResult<String> {
        self.stringify(value, &mut Vec::new())
    }

    /// `joining` holds the arrays whose elements are being converted; an
    /// array met again inside itself converts to the empty string.
    fn stringify(&mut self, value: &Value, joining: &mut Vec<ValueId>) -> ExecResult<String> {
        let id = match value {
            Value::Undefined => return Ok("undefined".into()),
            Value::Null => return Ok("null".into()),
            Value::Boolean(b) => return Ok(b.to_string()),
            Value::Number(n) => return Ok(format_number(*n)),
            Value::String(s) => return Ok(s.to_string()),
            Value::Ref(id) => *id,
        };
        if let Some(method) = self.find_method(value, &QualifiedName::public("toString")) {
            let result = self.invoke(&method, value, &[])?;
            if !matches!(result, Value::Ref(_)) {
                return self.to_string(&result);
            }
        }
        let object = self.object(id)?;
        Ok(match &object.kind {
            ObjectKind::Array(_) if joining.contains(&id) => String::new(),
            ObjectKind::Array(items) => {
                let items = items.clone();
                joining.push(id);
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    parts.push(match item {
                        Value::Undefined | Value::Null => String::new(),
                        other => self.stringify(other, joining)?,
                    });
                }
                joining.pop();
                parts.join(",")
            }
            ObjectKind::Error(data) => {
                let name = self.qualified_type_name(object.type_id);
                if data.message.is_empty() {
                    name
                } else {
                    format!("{}: {}", name, data.message)
                }
            }
            ObjectKind::Function(data) => format!("[function {}]", data.name),
            ObjectKind::Type(data) => format!("[class {}]", data.qname),
            _ => format!("[object {}]", self.qualified_type_name(object.type_id)),
        })
    }
}
