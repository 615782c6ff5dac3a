//! Bytecode dispatch
//!
//! [`Vm::execute`] runs instructions until the frame that started it
//! returns. Each instruction is fetched from the current frame's body and
//! the pc is advanced before the opcode runs, so a raised exception sees
//! the faulting instruction at `pc - 1`.
//!
//! Operand order: stores take `[object, value]` with the value on top,
//! element access takes `[object, index]`, and calls take the callee (or
//! receiver) below its arguments.

use crate::call_frame::{Completion, FrameState};
use crate::calls::CallResult;
use crate::error::{ExecResult, Exception};
use crate::helpers::receiver;
use crate::object::{BlockData, BlockRole, HeapObject, IteratorData, ObjectKind};
use crate::operators;
use crate::property::CacheKey;
use crate::vm::Vm;
use bytecode_system::{Code, IterKind, NameRef, Opcode};
use core_types::{QualifiedName, Value, ValueId, VmError};
use memory_manager::SlotTable;
use std::rc::Rc;
use std::sync::atomic::Ordering;

impl Vm {
    /// Runs the current frame and everything it calls until it returns.
    pub(crate) fn execute(&mut self) -> ExecResult<Value> {
        let floor = self
            .frames
            .len()
            .checked_sub(1)
            .ok_or_else(|| VmError::internal("No frame to execute"))?;
        loop {
            match self.step() {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(exception) => self.unwind(exception, floor)?,
            }
        }
    }

    fn pop(&mut self) -> ExecResult<Value> {
        let base = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() <= base {
            return Err(VmError::internal("Operand stack underflow").into());
        }
        self.stack
            .pop()
            .ok_or_else(|| VmError::internal("Operand stack underflow").into())
    }

    fn pop_args(&mut self, argc: u32) -> ExecResult<Vec<Value>> {
        let argc = argc as usize;
        let base = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() < base + argc {
            return Err(VmError::internal("Operand stack underflow").into());
        }
        Ok(self.stack.split_off(self.stack.len() - argc))
    }

    fn peek(&self) -> ExecResult<&Value> {
        self.stack
            .last()
            .ok_or_else(|| VmError::internal("Operand stack underflow").into())
    }

    fn push(&mut self, value: Value) -> ExecResult<()> {
        if self.stack.len() >= self.config.stack_limit {
            return Err(VmError::internal("Operand stack overflow").into());
        }
        self.stack.push(value);
        Ok(())
    }

    fn this_value(&self) -> Value {
        self.frames.last().map_or(Value::Undefined, |f| f.this.clone())
    }

    fn activation(&self) -> ExecResult<Value> {
        self.frames
            .last()
            .map(|f| Value::Ref(f.activation))
            .ok_or_else(|| VmError::internal("No active frame").into())
    }

    fn set_pc(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target;
        }
    }

    /// Starts a call and delivers a native result immediately.
    fn call(&mut self, callee: Value, this: Value, args: Vec<Value>, completion: Completion) -> ExecResult<()> {
        if let CallResult::Returned(value) = self.call_value(callee, this, args, completion.clone())? {
            self.complete(value, completion);
        }
        Ok(())
    }

    fn static_holder(&self, object: &Value, nth_base: u32) -> ExecResult<Value> {
        let type_id = match object {
            Value::Ref(id) if self.is_type_value(object) => *id,
            _ => self.type_of(object),
        };
        Ok(Value::Ref(self.nth_base(type_id, nth_base)?))
    }

    fn qname(code: &Code, name: NameRef) -> ExecResult<QualifiedName> {
        Ok(code.constants.qualified_name(name)?)
    }

    /// Runs one instruction.
    ///
    /// # Returns
    ///
    /// The return value when the frame that started `execute` completes.
    fn step(&mut self) -> ExecResult<Option<Value>> {
        if self.exiting.load(Ordering::Relaxed) {
            return Err(Exception::Exit);
        }
        self.safe_point();

        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| VmError::internal("No active frame"))?;
        match frame.state {
            FrameState::Begin => frame.state = FrameState::Running,
            FrameState::Running => {}
            FrameState::Throwing => {
                return Err(VmError::internal("Frame resumed while unwinding").into());
            }
        }
        let pc = frame.pc;
        let code = frame.code.clone();
        let Some(instruction) = code.instruction(pc) else {
            return self.finish_frame(Value::Undefined);
        };
        frame.pc = pc + 1;
        log::trace!("{:>5} {}", pc, instruction);
        let cache: CacheKey = (Rc::as_ptr(&code) as usize, pc);

        match &instruction.opcode {
            Opcode::LoadUndefined => self.push(Value::Undefined)?,
            Opcode::LoadNull => self.push(Value::Null)?,
            Opcode::LoadTrue => self.push(Value::Boolean(true))?,
            Opcode::LoadFalse => self.push(Value::Boolean(false))?,
            Opcode::LoadNumber(n) => self.push(Value::Number(*n))?,
            Opcode::LoadString(index) => {
                let text = code.constants.string(*index)?;
                self.push(Value::from(text))?;
            }
            Opcode::LoadThis => {
                let this = self.this_value();
                self.push(this)?;
            }
            Opcode::LoadGlobal => self.push(Value::Ref(self.global))?,

            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::PopItems(count) => {
                self.pop_args(*count)?;
            }
            Opcode::Dup => {
                let top = self.peek()?.clone();
                self.push(top)?;
            }
            Opcode::Dup2 => {
                let pair = self.pop_args(2)?;
                for value in pair.iter().chain(pair.iter()) {
                    self.push(value.clone())?;
                }
            }
            Opcode::Swap => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.push(top)?;
                self.push(below)?;
            }

            Opcode::GetLocalSlot(slot) => {
                let activation = self.activation()?;
                let value = self.load(&activation, *slot as usize, &activation, false)?;
                self.push(value)?;
            }
            Opcode::GetGlobalSlot(slot) => {
                let global = Value::Ref(self.global);
                let value = self.load(&global, *slot as usize, &global, false)?;
                self.push(value)?;
            }
            Opcode::GetBlockSlot { slot, depth } => {
                let block = Value::Ref(self.nth_scope(*depth)?);
                let this = self.this_value();
                let value = self.load(&block, *slot as usize, &this, false)?;
                self.push(value)?;
            }
            Opcode::GetThisSlot(slot) => {
                let this = self.this_value();
                let value = self.load(&this, *slot as usize, &this, false)?;
                self.push(value)?;
            }
            Opcode::GetObjSlot(slot) => {
                let object = self.pop()?;
                let value = self.load(&object, *slot as usize, &object, false)?;
                self.push(value)?;
            }
            Opcode::GetThisTypeSlot { slot, nth_base } => {
                let this = self.this_value();
                let holder = self.static_holder(&this, *nth_base)?;
                let value = self.load(&holder, *slot as usize, &this, true)?;
                self.push(value)?;
            }
            Opcode::GetObjName(name) => {
                let name = Self::qname(&code, *name)?;
                let object = self.pop()?;
                let value = self.get_named(&object, &name, Some(cache), true)?;
                self.push(value)?;
            }
            Opcode::GetScopedName(name) => {
                let name = Self::qname(&code, *name)?;
                let value = self.get_scoped(&name)?;
                self.push(value)?;
            }
            Opcode::GetElement => {
                let index = self.pop()?;
                let object = self.pop()?;
                let value = self.get_element(&object, &index)?;
                self.push(value)?;
            }

            Opcode::PutLocalSlot(slot) => {
                let value = self.pop()?;
                let activation = self.activation()?;
                self.store(&activation, *slot as usize, value, &activation)?;
            }
            Opcode::PutGlobalSlot(slot) => {
                let value = self.pop()?;
                let global = Value::Ref(self.global);
                self.store(&global, *slot as usize, value, &global)?;
            }
            Opcode::PutBlockSlot { slot, depth } => {
                let value = self.pop()?;
                let block = Value::Ref(self.nth_scope(*depth)?);
                let this = self.this_value();
                self.store(&block, *slot as usize, value, &this)?;
            }
            Opcode::PutThisSlot(slot) => {
                let value = self.pop()?;
                let this = self.this_value();
                self.store(&this, *slot as usize, value, &this)?;
            }
            Opcode::PutObjSlot(slot) => {
                let value = self.pop()?;
                let object = self.pop()?;
                self.store(&object, *slot as usize, value, &object)?;
            }
            Opcode::PutThisTypeSlot { slot, nth_base } => {
                let value = self.pop()?;
                let this = self.this_value();
                let holder = self.static_holder(&this, *nth_base)?;
                self.store(&holder, *slot as usize, value, &this)?;
            }
            Opcode::PutObjName(name) => {
                let name = Self::qname(&code, *name)?;
                let value = self.pop()?;
                let object = self.pop()?;
                self.set_named(&object, &name, value, Some(cache))?;
            }
            Opcode::PutScopedName(name) => {
                let name = Self::qname(&code, *name)?;
                let value = self.pop()?;
                self.put_scoped(&name, value)?;
            }
            Opcode::PutElement => {
                let value = self.pop()?;
                let index = self.pop()?;
                let object = self.pop()?;
                self.put_element(&object, &index, value)?;
            }
            Opcode::DeleteObjName(name) => {
                let name = Self::qname(&code, *name)?;
                let object = self.pop()?;
                let deleted = self.delete_by_name(&object, &name)?;
                self.push(Value::Boolean(deleted))?;
            }
            Opcode::DeleteScopedName(name) => {
                let name = Self::qname(&code, *name)?;
                let deleted = self.delete_scoped(&name)?;
                self.push(Value::Boolean(deleted))?;
            }

            Opcode::Goto(target) => self.set_pc(*target),
            op if op.branch_test().is_some() => {
                if let Some((test, target)) = op.branch_test() {
                    let value = self.pop()?;
                    if operators::unary(self, &value, test)?.is_truthy() {
                        self.set_pc(target);
                    }
                }
            }
            op if op.operator().is_some() => {
                if let Some(operator) = op.operator() {
                    let result = if operator.is_unary() {
                        let value = self.pop()?;
                        self.eval_unary(operator, value)?
                    } else {
                        let rhs = self.pop()?;
                        let lhs = self.pop()?;
                        self.eval_binary(operator, lhs, rhs)?
                    };
                    self.push(result)?;
                }
            }

            Opcode::Call(argc) => {
                let args = self.pop_args(*argc)?;
                let this = self.pop()?;
                let callee = self.pop()?;
                self.call(callee, this, args, Completion::Push)?;
            }
            Opcode::CallGlobalSlot { slot, argc } => {
                let args = self.pop_args(*argc)?;
                let global = Value::Ref(self.global);
                let callee = self.load(&global, *slot as usize, &global, false)?;
                self.call(callee, Value::Null, args, Completion::Push)?;
            }
            Opcode::CallObjSlot { slot, argc } => {
                let args = self.pop_args(*argc)?;
                let object = self.pop()?;
                let holder = Value::Ref(self.type_of(&object));
                let callee = self.load(&holder, *slot as usize, &object, false)?;
                self.call(callee, object, args, Completion::Push)?;
            }
            Opcode::CallObjInstanceSlot { slot, argc } => {
                let args = self.pop_args(*argc)?;
                let object = self.pop()?;
                let callee = self.load(&object, *slot as usize, &object, false)?;
                self.call(callee, object, args, Completion::Push)?;
            }
            Opcode::CallThisSlot { slot, argc } => {
                let args = self.pop_args(*argc)?;
                let this = self.this_value();
                let holder = Value::Ref(self.type_of(&this));
                let callee = self.load(&holder, *slot as usize, &this, false)?;
                self.call(callee, this, args, Completion::Push)?;
            }
            Opcode::CallBlockSlot { slot, depth, argc } => {
                let args = self.pop_args(*argc)?;
                let block = Value::Ref(self.nth_scope(*depth)?);
                let callee = self.load(&block, *slot as usize, &block, false)?;
                let this = if self.is_type_value(&block) { block } else { Value::Null };
                self.call(callee, this, args, Completion::Push)?;
            }
            Opcode::CallObjStaticSlot { slot, nth_base, argc } => {
                let args = self.pop_args(*argc)?;
                let object = self.pop()?;
                let holder = self.static_holder(&object, *nth_base)?;
                let callee = self.load(&holder, *slot as usize, &holder, false)?;
                self.call(callee, holder, args, Completion::Push)?;
            }
            Opcode::CallThisStaticSlot { slot, nth_base, argc } => {
                let args = self.pop_args(*argc)?;
                let this = self.this_value();
                let holder = self.static_holder(&this, *nth_base)?;
                let callee = self.load(&holder, *slot as usize, &holder, false)?;
                self.call(callee, holder, args, Completion::Push)?;
            }
            Opcode::CallObjName { name, argc } => {
                let name = Self::qname(&code, *name)?;
                let args = self.pop_args(*argc)?;
                let object = self.pop()?;
                let callee = self.get_named(&object, &name, Some(cache), false)?;
                if callee.is_undefined() {
                    return Err(VmError::reference(format!(
                        "Can't find function \"{}\" on {}",
                        name,
                        self.type_name(&object)
                    ))
                    .into());
                }
                self.call(callee, object, args, Completion::Push)?;
            }
            Opcode::CallScopedName { name, argc } => {
                let name = Self::qname(&code, *name)?;
                let args = self.pop_args(*argc)?;
                let Some(found) = self.find_scoped(&name) else {
                    return Err(VmError::reference(format!("\"{}\" is not defined", name)).into());
                };
                let callee = self.load(&found.holder, found.slot, &found.receiver, false)?;
                let this = match &found.receiver {
                    Value::Ref(id) if self.is_block(*id) && !self.is_type_value(&found.receiver) => Value::Null,
                    other => other.clone(),
                };
                self.call(callee, this, args, Completion::Push)?;
            }
            Opcode::CallNextConstructor(argc) => {
                let args = self.pop_args(*argc)?;
                self.call_next_constructor(args)?;
            }
            Opcode::New(argc) => {
                let args = self.pop_args(*argc)?;
                let target = self.pop()?;
                if !self.is_type_value(&target) {
                    return Err(VmError::type_error(format!("{} is not a type", self.type_name(&target))).into());
                }
                self.call(target, Value::Null, args, Completion::Push)?;
            }
            Opcode::NewObject(count) => {
                let pairs = self.pop_args(count.saturating_mul(2))?;
                let object = self.create_value(self.core.object)?;
                let id = receiver(&object)?;
                for pair in pairs.chunks(2) {
                    let name = self.to_string(&pair[0])?;
                    self.object_mut(id)?
                        .slots
                        .define(QualifiedName::public(name), pair[1].clone());
                }
                self.push(object)?;
            }
            Opcode::NewArray(count) => {
                let items = self.pop_args(*count)?;
                let array = self.make_array(items)?;
                self.push(array)?;
            }
            Opcode::Return => {
                return self.finish_frame(Value::Undefined);
            }
            Opcode::ReturnValue => {
                let value = self.pop()?;
                return self.finish_frame(value);
            }

            Opcode::Throw => {
                let value = self.pop()?;
                self.annotate_error(&value)?;
                return Err(Exception::Thrown(value));
            }
            Opcode::PushCatchArg => {
                let value = self
                    .active_handler()
                    .and_then(|state| state.argument)
                    .unwrap_or_default();
                self.push(value)?;
            }
            Opcode::CallFinally(handler) => self.enter_finally(*handler)?,
            Opcode::EndException => self.end_exception()?,
            Opcode::OpenBlock(index) => {
                let def = code
                    .blocks
                    .get(*index)
                    .ok_or_else(|| VmError::internal(format!("Block {} does not exist", index)))?;
                let mut slots = SlotTable::from_values(vec![Value::Undefined; def.slots.len()]);
                for (slot, name) in def.slots.iter().enumerate() {
                    slots.set_name(slot, name.clone());
                }
                self.open_block(slots, BlockRole::Lexical)?;
            }
            Opcode::OpenWith => {
                let target = self.pop()?;
                receiver(&target)?;
                self.open_block(SlotTable::new(), BlockRole::With(target))?;
            }
            Opcode::CloseBlock => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.blocks.pop();
                }
            }
            Opcode::AddNamespace(index) => {
                let space = code.constants.string(*index)?.to_string();
                let block = self.nth_scope(0)?;
                if let Some(block) = self.object_mut(block)?.block_mut() {
                    block.namespaces.push(space);
                }
            }
            Opcode::DefineClass(slot) => {
                let global = Value::Ref(self.global);
                let class = self.load(&global, *slot as usize, &global, false)?;
                let type_id = self.type_id_of(&class)?;
                let scope = self.nth_scope(0)?;
                if let Some(block) = self.object_mut(type_id)?.block_mut() {
                    block.scope_chain = Some(scope);
                }
                self.ensure_initialized(type_id)?;
            }
            Opcode::MakeClosure(index) => {
                let closure = self.make_closure(*index)?;
                self.push(closure)?;
            }
            Opcode::InitDefaultArgs(targets) => {
                if let Some(target) = self.default_args_target(targets)? {
                    self.set_pc(target);
                }
            }

            Opcode::GetIterator(kind) => {
                let object = self.pop()?;
                let iterator = self.make_iterator(&object, *kind)?;
                self.push(iterator)?;
            }
            Opcode::IteratorNext => {
                let iterator = receiver(self.peek()?)?;
                let next = match &mut self.object_mut(iterator)?.kind {
                    ObjectKind::Iterator(data) => {
                        let item = data.items.get(data.index).cloned();
                        data.index += 1;
                        item
                    }
                    _ => return Err(VmError::type_error("Value is not an iterator").into()),
                };
                match next {
                    Some(item) => self.push(item)?,
                    None => return Err(VmError::stop_iteration().into()),
                }
            }
            Opcode::TypeOf => {
                let value = self.pop()?;
                let name = self.type_name(&value);
                self.push(Value::from(name))?;
            }
            Opcode::InstanceOf => {
                let target = self.pop()?;
                let value = self.pop()?;
                let type_id = self.type_id_of(&target)?;
                let result = self.instance_of(&value, type_id);
                self.push(Value::Boolean(result))?;
            }
            Opcode::Cast => {
                let target = self.pop()?;
                let value = self.pop()?;
                let type_id = self.type_id_of(&target)?;
                let result = self.cast(&value, type_id)?;
                self.push(result)?;
            }
            Opcode::Nop => {}
            Opcode::Debug => {
                if let Some(frame) = self.frames.last() {
                    log::debug!(
                        "debug at {}: stack {} blocks {} state {:?}",
                        pc,
                        self.stack.len() - frame.stack_base,
                        frame.blocks.len(),
                        frame.exception_state
                    );
                }
            }
            other => {
                return Err(VmError::internal(format!("Unhandled opcode {:?}", other)).into());
            }
        }
        Ok(None)
    }

    fn open_block(&mut self, slots: SlotTable, role: BlockRole) -> ExecResult<ValueId> {
        let scope = self.nth_scope(0)?;
        let mut block = BlockData::new(Some(scope));
        block.role = role;
        let block_type = self.core.block;
        let id = self.alloc(HeapObject::new(block_type, slots, ObjectKind::Block(block)))?;
        if let Some(frame) = self.frames.last_mut() {
            frame.blocks.push(id);
        }
        Ok(id)
    }

    /// Index of an element access, when it is a plain array or string index.
    fn element_index(&self, object: &Value, index: &Value) -> Option<usize> {
        let Value::Number(n) = index else { return None };
        if *n < 0.0 || n.fract() != 0.0 || *n > u32::MAX as f64 {
            return None;
        }
        let indexable = match object {
            Value::String(_) => true,
            Value::Ref(id) => self
                .heap
                .get(*id)
                .is_some_and(|o| matches!(o.kind, ObjectKind::Array(_))),
            _ => false,
        };
        indexable.then_some(*n as usize)
    }

    fn get_element(&mut self, object: &Value, index: &Value) -> ExecResult<Value> {
        if let Some(slot) = self.element_index(object, index) {
            let helpers = self.helpers_of(object);
            return helpers.get_property(self, object, slot);
        }
        let name = QualifiedName::public(self.to_string(index)?);
        self.get_named(object, &name, None, true)
    }

    fn put_element(&mut self, object: &Value, index: &Value, value: Value) -> ExecResult<()> {
        if let Some(slot) = self.element_index(object, index) {
            let helpers = self.helpers_of(object);
            helpers.set_property(self, object, slot, value)?;
            return Ok(());
        }
        let name = QualifiedName::public(self.to_string(index)?);
        self.set_named(object, &name, value, None)
    }

    fn make_iterator(&mut self, object: &Value, kind: IterKind) -> ExecResult<Value> {
        let mut items = Vec::new();
        if !object.is_nullish() {
            let helpers = self.helpers_of(object);
            let array = object
                .as_ref_id()
                .and_then(|id| self.heap.get(id))
                .is_some_and(|o| matches!(o.kind, ObjectKind::Array(_)));
            for slot in 0..helpers.property_count(self, object) {
                let Some(name) = helpers.property_name(self, object, slot) else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                items.push(match kind {
                    IterKind::Keys if array => Value::Number(slot as f64),
                    IterKind::Keys => Value::from(name.name.as_str()),
                    IterKind::Values => helpers.get_property(self, object, slot)?,
                });
            }
        }
        let iterator_type = self.core.iterator;
        let data = IteratorData { kind, items, index: 0 };
        let id = self.alloc(HeapObject::new(iterator_type, SlotTable::new(), ObjectKind::Iterator(data)))?;
        Ok(Value::Ref(id))
    }

    /// Entry point of the first default initializer the caller did not supply.
    fn default_args_target(&self, targets: &[usize]) -> ExecResult<Option<usize>> {
        if targets.is_empty() {
            return Ok(None);
        }
        let frame = self
            .frames
            .last()
            .ok_or_else(|| VmError::internal("No active frame"))?;
        let required = self.function_data(frame.function)?.num_required();
        let index = frame.argc.saturating_sub(required).min(targets.len() - 1);
        Ok(Some(targets[index]))
    }

    /// Runs the base class constructor for the current constructor's `this`.
    fn call_next_constructor(&mut self, args: Vec<Value>) -> ExecResult<()> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| VmError::internal("No active frame"))?;
        let this = frame.this.clone();
        let owner = self
            .function_data(frame.function)?
            .owner
            .ok_or_else(|| VmError::internal("Constructor has no owning type"))?;
        let Some(base) = self.type_data(owner)?.base_type else {
            return Ok(());
        };
        if let Some(constructor) = self.find_constructor(base)? {
            self.call(constructor, this, args, Completion::Discard)?;
        }
        Ok(())
    }
}
