//! Virtual Machine for bytecode execution
//!
//! [`Vm`] owns one heap, one operand stack and one call-frame chain. Every
//! interpreter is single threaded; interpreters share only the [`Service`].

use crate::call_frame::CallFrame;
use crate::config::VmConfig;
use crate::error::{Exception, ExecResult};
use crate::events::EventQueue;
use crate::helpers::{Helpers, ObjectHelpers};
use crate::inline_cache::InlineCache;
use crate::object::{ErrorData, FunctionData, HeapObject, NativeFn, ObjectKind, TypeData};
use crate::service::Service;
use bytecode_system::{Code, FunctionDef, ModuleRecord};
use core_types::{ErrorKind, QualifiedName, TypeAttributes, Value, ValueId, VmError, VmResult};
use memory_manager::{GcStats, Heap, MemoryNotifier, PoolKey, SlotTable};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Handles of the types created at bootstrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreTypes {
    /// Root of every type chain
    pub object: ValueId,
    /// Lexical and activation blocks
    pub block: ValueId,
    /// Type of types
    pub type_type: ValueId,
    /// Functions
    pub function: ValueId,
    /// Arrays
    pub array: ValueId,
    /// Type of `undefined`
    pub void: ValueId,
    /// Type of `null`
    pub null: ValueId,
    /// Booleans
    pub boolean: ValueId,
    /// Numbers
    pub number: ValueId,
    /// Strings
    pub string: ValueId,
    /// Base error type
    pub error: ValueId,
    /// Iterators made by `GetIterator`
    pub iterator: ValueId,
    /// One error type per [`ErrorKind`], in [`ErrorKind::ALL`] order
    pub errors: [ValueId; 8],
}

impl CoreTypes {
    /// Type raised for errors of `kind`
    pub fn error_type(&self, kind: ErrorKind) -> ValueId {
        let index = ErrorKind::ALL.iter().position(|k| *k == kind).unwrap_or(0);
        self.errors[index]
    }
}

/// Bytes charged for one heap object
pub(crate) fn object_size(object: &HeapObject) -> usize {
    let elements = match &object.kind {
        ObjectKind::Array(items) => items.len(),
        _ => 0,
    };
    std::mem::size_of::<HeapObject>() + (object.slots.capacity() + elements) * std::mem::size_of::<Value>()
}

/// Virtual Machine for executing bytecode
///
/// # Examples
///
/// ```
/// use bytecode_system::{Code, FunctionDef, Opcode};
/// use core_types::Value;
/// use interpreter::{Vm, VmConfig};
///
/// let mut vm = Vm::new(VmConfig::default()).unwrap();
///
/// let mut code = Code::new();
/// code.emit(Opcode::GetLocalSlot(0));
/// code.emit(Opcode::GetLocalSlot(1));
/// code.emit(Opcode::Mul);
/// code.emit(Opcode::ReturnValue);
/// let area = vm
///     .create_function(&FunctionDef::new("area", code).with_params(&["w", "h"], 0))
///     .unwrap();
///
/// let result = vm
///     .call_function(&area, &Value::Null, &[Value::Number(3.0), Value::Number(4.0)])
///     .unwrap();
/// assert_eq!(result, Value::Number(12.0));
/// ```
pub struct Vm {
    pub(crate) heap: Heap<HeapObject>,
    pub(crate) config: VmConfig,
    pub(crate) core: CoreTypes,
    pub(crate) global: ValueId,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) next_type_id: u32,
    pub(crate) native_roots: Vec<Value>,
    pub(crate) caches: HashMap<(usize, usize), InlineCache>,
    pub(crate) closure_codes: HashMap<(usize, usize), (Rc<Code>, Rc<Code>)>,
    pub(crate) service: Arc<Service>,
    pub(crate) events: EventQueue,
    pub(crate) exiting: Arc<AtomicBool>,
    pub(crate) loaded: HashMap<String, Arc<ModuleRecord>>,
    pub(crate) depth: usize,
    pub(crate) last_activity: Instant,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("heap", &self.heap)
            .field("stack", &self.stack.len())
            .field("frames", &self.frames.len())
            .field("modules", &self.loaded.len())
            .field("exiting", &self.exiting.load(Ordering::Relaxed))
            .finish()
    }
}

impl Vm {
    /// Creates an interpreter with its own service.
    pub fn new(config: VmConfig) -> VmResult<Self> {
        Self::with_service(config, Arc::new(Service::new()))
    }

    /// Creates an interpreter sharing `service` with other interpreters.
    ///
    /// # Returns
    ///
    /// The bootstrapped interpreter, or the error that stopped bootstrap.
    pub fn with_service(config: VmConfig, service: Arc<Service>) -> VmResult<Self> {
        let mut vm = Self {
            heap: Heap::new(config.gc.clone()),
            config,
            core: CoreTypes::default(),
            global: ValueId::default(),
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            next_type_id: 1,
            native_roots: Vec::new(),
            caches: HashMap::new(),
            closure_codes: HashMap::new(),
            service,
            events: EventQueue::new(),
            exiting: Arc::new(AtomicBool::new(false)),
            loaded: HashMap::new(),
            depth: 0,
            last_activity: Instant::now(),
        };
        vm.bootstrap().map_err(|e| vm.host_error(e))?;
        Ok(vm)
    }

    /// Settings in use
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Bootstrap types
    pub fn core_types(&self) -> &CoreTypes {
        &self.core
    }

    /// The global object
    pub fn global(&self) -> Value {
        Value::Ref(self.global)
    }

    /// Shared service
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Handle for posting events to this interpreter
    pub fn events(&self) -> EventQueue {
        self.events.clone()
    }

    /// Cooperative exit flag observed at safe points
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        self.exiting.clone()
    }

    /// Shares an exit flag owned by someone else (a worker handle).
    pub fn set_exit_flag(&mut self, flag: Arc<AtomicBool>) {
        self.exiting = flag;
    }

    /// Asks the interpreter to stop at its next safe point.
    pub fn request_exit(&self) {
        self.exiting.store(true, Ordering::SeqCst);
    }

    /// Returns true once an exit was requested
    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Installs the host memory notifier.
    pub fn set_memory_notifier(&mut self, notifier: Box<dyn MemoryNotifier>) {
        self.heap.set_notifier(notifier);
    }

    /// The heap
    pub fn heap(&self) -> &Heap<HeapObject> {
        &self.heap
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Reads a heap object
    pub fn heap_object(&self, id: ValueId) -> Option<&HeapObject> {
        self.heap.get(id)
    }

    /// Operand stack depth
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Active call frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Modules loaded so far
    pub fn loaded_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn object(&self, id: ValueId) -> ExecResult<&HeapObject> {
        self.heap
            .get(id)
            .ok_or_else(|| VmError::internal(format!("Stale value handle {}", id)).into())
    }

    pub(crate) fn object_mut(&mut self, id: ValueId) -> ExecResult<&mut HeapObject> {
        self.heap
            .get_mut(id)
            .ok_or_else(|| VmError::internal(format!("Stale value handle {}", id)).into())
    }

    pub(crate) fn type_data(&self, id: ValueId) -> ExecResult<&TypeData> {
        self.object(id)?
            .type_data()
            .ok_or_else(|| VmError::type_error(format!("Value {} is not a type", id)).into())
    }

    pub(crate) fn type_data_mut(&mut self, id: ValueId) -> ExecResult<&mut TypeData> {
        match &mut self.object_mut(id)?.kind {
            ObjectKind::Type(data) => Ok(data),
            _ => Err(VmError::type_error(format!("Value {} is not a type", id)).into()),
        }
    }

    pub(crate) fn function_data(&self, id: ValueId) -> ExecResult<&FunctionData> {
        self.object(id)?
            .function()
            .ok_or_else(|| VmError::type_error(format!("Value {} is not a function", id)).into())
    }

    pub(crate) fn function_data_mut(&mut self, id: ValueId) -> ExecResult<&mut FunctionData> {
        match &mut self.object_mut(id)?.kind {
            ObjectKind::Function(data) => Ok(data),
            _ => Err(VmError::type_error(format!("Value {} is not a function", id)).into()),
        }
    }

    pub(crate) fn function_ref(&self, value: &Value) -> Option<&FunctionData> {
        self.heap.get(value.as_ref_id()?)?.function()
    }

    pub(crate) fn is_function(&self, value: &Value) -> bool {
        self.function_ref(value).is_some()
    }

    pub(crate) fn is_type_value(&self, value: &Value) -> bool {
        value
            .as_ref_id()
            .and_then(|id| self.heap.get(id))
            .is_some_and(HeapObject::is_type)
    }

    /// Type of any value.
    pub fn type_of(&self, value: &Value) -> ValueId {
        match value {
            Value::Undefined => self.core.void,
            Value::Null => self.core.null,
            Value::Boolean(_) => self.core.boolean,
            Value::Number(_) => self.core.number,
            Value::String(_) => self.core.string,
            Value::Ref(id) => self.heap.get(*id).map_or(self.core.object, |o| o.type_id),
        }
    }

    pub(crate) fn helpers_of(&self, value: &Value) -> Rc<dyn Helpers> {
        self.helpers_of_type(self.type_of(value))
    }

    pub(crate) fn helpers_of_type(&self, type_id: ValueId) -> Rc<dyn Helpers> {
        match self.heap.get(type_id).and_then(HeapObject::type_data) {
            Some(data) => data.helpers.clone(),
            None => Rc::new(ObjectHelpers),
        }
    }

    /// Allocates an object of its type's pool.
    pub(crate) fn alloc(&mut self, object: HeapObject) -> ExecResult<ValueId> {
        let (pool_key, poolable) = self
            .heap
            .get(object.type_id)
            .and_then(HeapObject::type_data)
            .map_or((0, true), |t| (t.pool_key, !t.dont_pool));
        self.alloc_with(pool_key, poolable, object)
    }

    /// Allocates with an explicit pool.
    ///
    /// A denied allocation prunes every pool and retries once; a second
    /// denial degrades the interpreter and starts an orderly exit.
    pub(crate) fn alloc_with(&mut self, pool_key: PoolKey, poolable: bool, object: HeapObject) -> ExecResult<ValueId> {
        let size = object_size(&object);
        let mut pending = Some(object);
        let mut attempt = 0;
        loop {
            let result = self.heap.allocate(pool_key, size, poolable, |old| {
                let fresh = pending.take().unwrap_or_default();
                match old {
                    Some(old) => old.recycle(fresh),
                    None => fresh,
                }
            });
            match result {
                Ok(id) => return Ok(id),
                Err(error) if attempt == 0 && self.heap.prune_pools() > 0 => {
                    log::debug!("allocation denied ({}), retrying after pool flush", error.message);
                    attempt += 1;
                }
                Err(error) => return Err(self.allocation_failed(size, error)),
            }
        }
    }

    /// Recharges a live value at `size` bytes, with the same retry and
    /// degrade policy as [`Vm::alloc_with`].
    pub(crate) fn resize_object(&mut self, id: ValueId, size: usize) -> ExecResult<()> {
        match self.heap.resize(id, size) {
            Ok(()) => Ok(()),
            Err(_) if self.heap.prune_pools() > 0 => self
                .heap
                .resize(id, size)
                .map_err(|error| self.allocation_failed(size, error)),
            Err(error) => Err(self.allocation_failed(size, error)),
        }
    }

    fn allocation_failed(&mut self, size: usize, error: VmError) -> Exception {
        log::warn!("allocation of {} bytes failed, entering degraded mode", size);
        self.heap.set_degraded();
        self.heap.request_gc();
        self.exiting.store(true, Ordering::SeqCst);
        error.into()
    }

    /// Initial instance slots and the attributes of `type_id`.
    pub(crate) fn instance_template(&self, type_id: ValueId) -> ExecResult<(SlotTable, TypeAttributes)> {
        let data = self.type_data(type_id)?;
        let slots = match data.instance_block {
            Some(block) => self.object(block)?.slots.clone(),
            None => SlotTable::new(),
        };
        Ok((slots, data.attributes))
    }

    /// Name of the type of a value
    pub fn type_name(&self, value: &Value) -> String {
        self.qualified_type_name(self.type_of(value))
    }

    pub(crate) fn qualified_type_name(&self, type_id: ValueId) -> String {
        self.heap
            .get(type_id)
            .and_then(HeapObject::type_data)
            .map_or_else(|| "Object".to_string(), |t| t.qname.to_string())
    }

    /// Error kind raised for instances of `type_id`.
    pub(crate) fn error_kind_of(&self, type_id: ValueId) -> Option<ErrorKind> {
        let mut current = Some(type_id);
        while let Some(id) = current {
            if let Some(index) = self.core.errors.iter().position(|e| *e == id) {
                return Some(ErrorKind::ALL[index]);
            }
            current = self.heap.get(id)?.type_data()?.base_type;
        }
        None
    }

    /// Copies a plain object or array; `deep` copies nested ones too.
    pub(crate) fn copy_object(&mut self, value: &Value, deep: bool) -> ExecResult<Value> {
        let mut copies = HashMap::new();
        self.copy_with(value, deep, &mut copies)
    }

    fn copy_with(&mut self, value: &Value, deep: bool, copies: &mut HashMap<ValueId, ValueId>) -> ExecResult<Value> {
        let Value::Ref(id) = value else {
            return Ok(value.clone());
        };
        if let Some(copy) = copies.get(id) {
            return Ok(Value::Ref(*copy));
        }
        let original = self.object(*id)?;
        if !matches!(original.kind, ObjectKind::Object | ObjectKind::Array(_)) {
            return Ok(value.clone());
        }
        let original = original.clone();
        let copy = self.alloc(original.clone())?;
        copies.insert(*id, copy);
        if !deep {
            return Ok(Value::Ref(copy));
        }
        for (slot, child) in original.slots.values().iter().enumerate() {
            let child = self.copy_with(child, true, copies)?;
            self.object_mut(copy)?.slots.set(slot, child);
        }
        if let ObjectKind::Array(items) = &original.kind {
            let mut copied = Vec::with_capacity(items.len());
            for item in items {
                copied.push(self.copy_with(item, true, copies)?);
            }
            self.object_mut(copy)?.kind = ObjectKind::Array(copied);
        }
        Ok(Value::Ref(copy))
    }

    /// Creates an empty dynamic object.
    pub fn new_object(&mut self) -> VmResult<Value> {
        let object_type = self.core.object;
        self.create_value(object_type).map_err(|e| self.host_error(e))
    }

    /// Creates an array.
    pub fn new_array(&mut self, items: Vec<Value>) -> VmResult<Value> {
        self.make_array(items).map_err(|e| self.host_error(e))
    }

    pub(crate) fn make_array(&mut self, items: Vec<Value>) -> ExecResult<Value> {
        let object = HeapObject::new(self.core.array, SlotTable::new(), ObjectKind::Array(items));
        Ok(Value::Ref(self.alloc(object)?))
    }

    pub(crate) fn create_value(&mut self, type_id: ValueId) -> ExecResult<Value> {
        let helpers = self.helpers_of_type(type_id);
        helpers.create(self, type_id)
    }

    /// Creates an error instance of `kind`.
    pub fn new_error(&mut self, kind: ErrorKind, message: &str) -> VmResult<Value> {
        self.make_error(kind, message).map_err(|e| self.host_error(e))
    }

    /// Creates an instance of the base `Error` type.
    pub fn new_base_error(&mut self, message: &str) -> VmResult<Value> {
        let error_type = self.core.error;
        self.make_error_of(error_type, message).map_err(|e| self.host_error(e))
    }

    pub(crate) fn make_error(&mut self, kind: ErrorKind, message: &str) -> ExecResult<Value> {
        self.make_error_of(self.core.error_type(kind), message)
    }

    fn make_error_of(&mut self, error_type: ValueId, message: &str) -> ExecResult<Value> {
        let error = self.create_value(error_type)?;
        if let Some(id) = error.as_ref_id() {
            if let ObjectKind::Error(data) = &mut self.object_mut(id)?.kind {
                data.message = message.to_string();
            }
        }
        Ok(error)
    }

    /// Error payload of an error instance
    pub fn error_data(&self, value: &Value) -> Option<&ErrorData> {
        match &self.heap.get(value.as_ref_id()?)?.kind {
            ObjectKind::Error(data) => Some(data),
            _ => None,
        }
    }

    /// Reads a global variable.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let global = self.heap.get(self.global)?;
        let slot = global.slots.lookup(&QualifiedName::public(name))?;
        global.slots.get(slot).cloned()
    }

    /// Defines or overwrites a global variable.
    pub fn set_global(&mut self, name: &str, value: Value) -> VmResult<()> {
        let global = self.global;
        self.object_mut(global)
            .map(|g| {
                g.slots.define(QualifiedName::public(name), value);
            })
            .map_err(|e| self.host_error(e))
    }

    /// Creates a native function.
    pub fn native_function<F>(&mut self, name: &str, num_args: usize, body: F) -> VmResult<Value>
    where
        F: Fn(&mut Vm, &Value, &[Value]) -> ExecResult<Value> + 'static,
    {
        let data = FunctionData::native(QualifiedName::public(name), num_args, Rc::new(body) as NativeFn);
        let object = HeapObject::new(self.core.function, SlotTable::new(), ObjectKind::Function(Box::new(data)));
        self.alloc(object).map(Value::Ref).map_err(|e| self.host_error(e))
    }

    /// Creates a native function and defines it as a global.
    pub fn define_native<F>(&mut self, name: &str, num_args: usize, body: F) -> VmResult<Value>
    where
        F: Fn(&mut Vm, &Value, &[Value]) -> ExecResult<Value> + 'static,
    {
        let function = self.native_function(name, num_args, body)?;
        if let Some(id) = function.as_ref_id() {
            let global = self.global;
            self.function_data_mut(id)
                .map(|f| f.owner = Some(global))
                .map_err(|e| self.host_error(e))?;
        }
        self.set_global(name, function.clone())?;
        Ok(function)
    }

    /// Creates a script function closed over the global scope.
    pub fn create_function(&mut self, def: &FunctionDef) -> VmResult<Value> {
        let code = Rc::new(def.code.clone());
        let global = self.global;
        self.make_function(def, code, None, Some(global))
            .map(Value::Ref)
            .map_err(|e| self.host_error(e))
    }

    /// Creates a function from `def` and runs it with the global object as `this`.
    pub fn run(&mut self, def: &FunctionDef) -> VmResult<Value> {
        let function = self.create_function(def)?;
        let global = self.global();
        self.call_function(&function, &global, &[])
    }

    /// Calls a function, a method or a type from the host.
    ///
    /// Values the host keeps in locals across calls must be rooted with
    /// [`Vm::add_root`]; a collection may run inside the call.
    pub fn call_function(&mut self, function: &Value, this: &Value, args: &[Value]) -> VmResult<Value> {
        self.last_activity = Instant::now();
        let result = self.invoke(function, this, args);
        result.map_err(|e| {
            let error = self.host_error(e);
            log::error!("uncaught {}{}", error, source_suffix(&error));
            error
        })
    }

    /// Keeps a value alive until [`Vm::remove_root`].
    pub fn add_root(&mut self, value: Value) {
        self.native_roots.push(value);
    }

    /// Releases a root added with [`Vm::add_root`].
    pub fn remove_root(&mut self, value: &Value) {
        if let Some(index) = self.native_roots.iter().rposition(|v| v == value) {
            self.native_roots.swap_remove(index);
        }
    }

    /// Converts an exception leaving the interpreter into a host error.
    pub(crate) fn host_error(&mut self, exception: Exception) -> VmError {
        match exception {
            Exception::Error(error) => error,
            Exception::Exit => VmError::internal("Interpreter exited"),
            Exception::Thrown(value) => {
                if let Some(data) = self.error_data(&value) {
                    let kind = data.kind.unwrap_or(ErrorKind::InternalError);
                    return VmError::new(kind, data.message.clone())
                        .with_stack(data.stack.clone())
                        .with_position(data.position);
                }
                let text = self.to_string(&value).unwrap_or_else(|_| "<unprintable>".to_string());
                VmError::internal(format!("Uncaught exception: {}", text))
            }
        }
    }
}

fn source_suffix(error: &VmError) -> String {
    let mut suffix = String::new();
    if let Some(position) = error.source_position {
        suffix.push_str(&format!(" at {}", position));
    }
    if !error.stack.is_empty() {
        suffix.push('\n');
        suffix.push_str(&error.stack_text());
    }
    suffix
}
