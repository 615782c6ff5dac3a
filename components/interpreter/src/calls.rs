//! Function calls
//!
//! Calls to native functions complete immediately. Calls to script
//! functions push a frame whose activation block holds the arguments and
//! locals; the dispatcher then runs it. Host calls mark their frame as a
//! boundary so that [`Vm::execute`] returns when it completes.

use crate::call_frame::{CallFrame, Completion};
use crate::config::LanguageLevel;
use crate::error::ExecResult;
use crate::object::{BlockData, BlockRole, FunctionBody, FunctionData, HeapObject, ObjectKind};
use crate::vm::Vm;
use bytecode_system::{Code, FunctionDef};
use core_types::{TraitAttributes, Value, ValueId, VmError};
use memory_manager::SlotTable;
use std::rc::Rc;

/// Outcome of starting a call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CallResult {
    /// Completed without a frame (native functions, constructors without a body)
    Returned(Value),
    /// A script frame was pushed
    Entered,
}

impl Vm {
    /// Calls a function, method or type and runs it to completion.
    pub(crate) fn invoke(&mut self, callee: &Value, this: &Value, args: &[Value]) -> ExecResult<Value> {
        self.depth += 1;
        let result = self.invoke_inner(callee, this, args);
        self.depth -= 1;
        result
    }

    fn invoke_inner(&mut self, callee: &Value, this: &Value, args: &[Value]) -> ExecResult<Value> {
        match self.call_value(callee.clone(), this.clone(), args.to_vec(), Completion::Push)? {
            CallResult::Returned(value) => Ok(value),
            CallResult::Entered => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.boundary = true;
                }
                self.execute()
            }
        }
    }

    /// Starts a call.
    ///
    /// Calling a type constructs an instance; the completion of the
    /// constructor frame then yields the instance.
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        this: Value,
        args: Vec<Value>,
        completion: Completion,
    ) -> ExecResult<CallResult> {
        let id = match &callee {
            Value::Ref(id) => *id,
            Value::Undefined | Value::Null => {
                return Err(VmError::reference("Can't call a null or undefined value").into())
            }
            other => {
                return Err(VmError::type_error(format!("{} is not a function", self.type_name(other))).into())
            }
        };
        if self.is_type_value(&callee) {
            return self.construct(id, args, completion);
        }
        let function = match self.object(id)?.function() {
            Some(function) => function.clone(),
            None => {
                return Err(VmError::type_error(format!("{} is not a function", self.type_name(&callee))).into())
            }
        };
        let this = match &function.this_obj {
            Some(bound) => bound.clone(),
            None if this.is_nullish() => Value::Ref(self.global),
            None => this,
        };
        match &function.body {
            FunctionBody::Native(body) => {
                let args = self.validate_args(&function, args, false)?;
                let body = body.clone();
                let result = body(self, &this, &args)?;
                Ok(CallResult::Returned(result))
            }
            FunctionBody::Script { code, template } => {
                self.push_frame(id, &function, code.clone(), template, this, args, completion)?;
                Ok(CallResult::Entered)
            }
            FunctionBody::Unbound => Err(VmError::internal(format!(
                "Native function {} is not implemented",
                function.name
            ))
            .into()),
        }
    }

    fn construct(&mut self, type_id: ValueId, args: Vec<Value>, completion: Completion) -> ExecResult<CallResult> {
        let (object, constructor) = self.new_instance(type_id)?;
        let Some(constructor) = constructor else {
            return Ok(CallResult::Returned(object));
        };
        let completion = match completion {
            Completion::Discard => Completion::Discard,
            _ => Completion::PushValue(object.clone()),
        };
        match self.call_value(constructor, object.clone(), args, completion)? {
            CallResult::Returned(_) => Ok(CallResult::Returned(object)),
            CallResult::Entered => Ok(CallResult::Entered),
        }
    }

    /// Pads, truncates and casts arguments to the declared signature.
    fn validate_args(&mut self, function: &FunctionData, mut args: Vec<Value>, truncate: bool) -> ExecResult<Vec<Value>> {
        let required = function.num_required();
        if args.len() < required && self.config.language == LanguageLevel::Fixed {
            return Err(VmError::arg(format!(
                "Insufficient actual parameters. Call requires {} parameter(s).",
                required
            ))
            .into());
        }
        let extra = if args.len() > function.num_args {
            args.split_off(function.num_args)
        } else {
            args.resize(function.num_args, Value::Undefined);
            Vec::new()
        };
        for (index, type_ref) in function.param_types.iter().enumerate().take(function.num_args) {
            let Some(type_ref) = type_ref else { continue };
            let target = self.resolve_type_ref(type_ref)?;
            let arg = &args[index];
            if !arg.is_nullish() && !self.instance_of(arg, target) {
                let arg = arg.clone();
                args[index] = self.cast(&arg, target)?;
            }
        }
        if function.rest {
            let rest = self.make_array(extra)?;
            args.push(rest);
        } else if !truncate {
            args.extend(extra);
        }
        Ok(args)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_frame(
        &mut self,
        id: ValueId,
        function: &FunctionData,
        code: Rc<Code>,
        template: &SlotTable,
        this: Value,
        args: Vec<Value>,
        completion: Completion,
    ) -> ExecResult<()> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(VmError::internal(format!(
                "Call stack overflow: more than {} frames",
                self.config.max_call_depth
            ))
            .into());
        }
        if self.stack.len() >= self.config.stack_limit {
            return Err(VmError::internal("Operand stack overflow").into());
        }
        let argc = args.len().min(function.num_args);
        let args = self.validate_args(function, args, true)?;
        let mut slots = template.clone();
        for (slot, arg) in args.into_iter().enumerate() {
            slots.set(slot, arg);
        }
        let mut block = BlockData::new(function.scope_chain);
        block.role = BlockRole::Activation {
            function: id,
            this: this.clone(),
        };
        let block_type = self.core.block;
        let activation = self.alloc(HeapObject::new(block_type, slots, ObjectKind::Block(block)))?;

        let mut frame = CallFrame::new(id, code, activation, this, self.stack.len());
        frame.argc = argc;
        frame.completion = completion;
        log::trace!("enter {} (depth {})", function.name, self.frames.len() + 1);
        self.frames.push(frame);
        Ok(())
    }

    /// Delivers a completed call's value as `completion` asks.
    pub(crate) fn complete(&mut self, value: Value, completion: Completion) {
        match completion {
            Completion::Push => self.stack.push(value),
            Completion::PushValue(replacement) => self.stack.push(replacement),
            Completion::Discard => {}
        }
    }

    /// Pops the current frame.
    ///
    /// # Returns
    ///
    /// The call's value when the frame was a host boundary.
    pub(crate) fn finish_frame(&mut self, value: Value) -> ExecResult<Option<Value>> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::internal("Return without an active frame"))?;
        self.stack.truncate(frame.stack_base);
        if frame.boundary {
            return Ok(Some(match frame.completion {
                Completion::Push => value,
                Completion::PushValue(replacement) => replacement,
                Completion::Discard => Value::Undefined,
            }));
        }
        self.complete(value, frame.completion);
        Ok(None)
    }

    /// Creates a function object from its definition.
    pub(crate) fn make_function(
        &mut self,
        def: &FunctionDef,
        code: Rc<Code>,
        scope: Option<ValueId>,
        owner: Option<ValueId>,
    ) -> ExecResult<ValueId> {
        let body = if def.attributes.contains(TraitAttributes::NATIVE) {
            FunctionBody::Unbound
        } else {
            let mut template = SlotTable::from_values(vec![Value::Undefined; def.num_locals()]);
            for (slot, name) in def.locals.iter().enumerate() {
                template.set_name(slot, name.clone());
            }
            FunctionBody::Script { code, template }
        };
        let data = FunctionData {
            name: def.name.clone(),
            body,
            num_args: def.num_args as usize,
            num_default: def.num_default as usize,
            rest: def.rest,
            param_types: def.param_types.clone(),
            attributes: def.attributes,
            owner,
            slot_num: def.slot.map(|s| s as usize),
            next_slot: None,
            this_obj: None,
            scope_chain: scope,
            is_constructor: false,
        };
        let function_type = self.core.function;
        self.alloc(HeapObject::new(function_type, SlotTable::new(), ObjectKind::Function(Box::new(data))))
    }

    /// Creates a closure over the current scope for nested function `index`.
    pub(crate) fn make_closure(&mut self, index: usize) -> ExecResult<Value> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| VmError::internal("No active frame"))?;
        let parent = frame.code.clone();
        let scope = frame.innermost_block();
        let owner = self.function_data(frame.function)?.owner;
        let def = parent
            .functions
            .get(index)
            .ok_or_else(|| VmError::internal(format!("Nested function {} does not exist", index)))?;
        let key = (Rc::as_ptr(&parent) as usize, index);
        let code = match self.closure_codes.get(&key) {
            Some((_, code)) => code.clone(),
            None => {
                let mut code = def.code.clone();
                if code.constants.is_empty() {
                    code.constants = parent.constants.clone();
                }
                let code = Rc::new(code);
                self.closure_codes.insert(key, (parent.clone(), code.clone()));
                code
            }
        };
        let id = self.make_function(def, code, Some(scope), owner)?;
        Ok(Value::Ref(id))
    }
}
