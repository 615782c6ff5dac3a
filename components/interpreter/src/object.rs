//! Heap representation of composite runtime values
//!
//! Every composite value lives in the VM heap as a [`HeapObject`]: a type
//! reference, a flag set, a slot table and a kind-specific payload. Blocks,
//! functions and types are objects too, so they share the slot machinery.

use crate::error::ExecResult;
use crate::helpers::Helpers;
use crate::vm::Vm;
use bytecode_system::{Code, HandlerKind, IterKind, TypeRef};
use core_types::{
    ErrorKind, QualifiedName, SourcePosition, StackFrame, TraitAttributes, TypeAttributes, Value,
    ValueId,
};
use memory_manager::{PoolKey, SlotTable};
use std::fmt;
use std::rc::Rc;

/// Signature of a native function.
///
/// Receives the VM, the bound `this` and the validated arguments.
pub type NativeFn = Rc<dyn Fn(&mut Vm, &Value, &[Value]) -> ExecResult<Value>>;

/// Per-value flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectFlags {
    /// May gain and lose properties at run time
    pub dynamic: bool,
    /// Backed by native code
    pub native: bool,
    /// Skipped by enumeration
    pub hidden: bool,
    /// Created during bootstrap
    pub builtin: bool,
    /// Some slot holds a getter or setter
    pub has_getter_setter: bool,
}

/// Declared shape of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trait {
    /// Declared type of the slot, if any
    pub type_id: Option<ValueId>,
    /// Trait attributes
    pub attributes: TraitAttributes,
}

impl Trait {
    /// A trait with attributes and no declared type
    pub fn new(attributes: TraitAttributes) -> Self {
        Self {
            type_id: None,
            attributes,
        }
    }
}

/// State kept by the hidden block pushed when a handler is entered.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerState {
    /// Kind of the handler being run
    pub kind: HandlerKind,
    /// Index of the handler in the function's table
    pub handler: usize,
    /// Exception to re-raise when the handler body ends
    pub parked: Option<Value>,
    /// Exception bound to a catch body
    pub argument: Option<Value>,
    /// Instruction to resume at when the handler body ends
    pub resume_pc: Option<usize>,
}

/// What a block is used for.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockRole {
    /// Lexical block or a type's static block
    Lexical,
    /// Activation record of a call
    Activation {
        /// Function being run
        function: ValueId,
        /// Receiver of the call
        this: Value,
    },
    /// `with` block over an object
    With(Value),
    /// Hidden block of a catch or finally body
    Exception(HandlerState),
}

/// Trait table and lexical links of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    /// Declared shape of each slot
    pub traits: Vec<Trait>,
    /// Slots inherited from a base block
    pub num_inherited: usize,
    /// Open namespaces
    pub namespaces: Vec<String>,
    /// Lexically enclosing block
    pub scope_chain: Option<ValueId>,
    /// Role of the block
    pub role: BlockRole,
}

impl BlockData {
    /// An empty lexical block
    pub fn new(scope_chain: Option<ValueId>) -> Self {
        Self {
            traits: Vec::new(),
            num_inherited: 0,
            namespaces: Vec::new(),
            scope_chain,
            role: BlockRole::Lexical,
        }
    }

    /// Reads the trait of a slot
    pub fn trait_at(&self, slot: usize) -> Trait {
        self.traits.get(slot).copied().unwrap_or_default()
    }

    /// Sets the trait of a slot, growing the table as needed
    pub fn set_trait(&mut self, slot: usize, value: Trait) {
        if slot >= self.traits.len() {
            self.traits.resize(slot + 1, Trait::default());
        }
        self.traits[slot] = value;
    }

    /// Opens a hole of `count` traits at `offset`
    pub fn insert_traits(&mut self, offset: usize, count: usize) {
        if self.traits.len() < offset {
            self.traits.resize(offset, Trait::default());
        }
        for _ in 0..count {
            self.traits.insert(offset, Trait::default());
        }
    }
}

/// Executable body of a function.
#[derive(Clone)]
pub enum FunctionBody {
    /// Bytecode with its activation slot template
    Script {
        /// Compiled body
        code: Rc<Code>,
        /// Named, null-valued activation slots
        template: SlotTable,
    },
    /// Native implementation
    Native(NativeFn),
    /// Declared native function whose implementation is not bound yet
    Unbound,
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionBody::Script { code, .. } => f
                .debug_struct("Script")
                .field("instructions", &code.instructions.len())
                .finish(),
            FunctionBody::Native(_) => f.write_str("Native"),
            FunctionBody::Unbound => f.write_str("Unbound"),
        }
    }
}

/// Function payload.
#[derive(Debug, Clone)]
pub struct FunctionData {
    /// Function name
    pub name: QualifiedName,
    /// Body
    pub body: FunctionBody,
    /// Declared parameters, defaulted ones included
    pub num_args: usize,
    /// Parameters with a default value
    pub num_default: usize,
    /// Whether excess arguments are collected into an array
    pub rest: bool,
    /// Declared parameter types
    pub param_types: Vec<Option<TypeRef>>,
    /// Getter, setter, static and override flags
    pub attributes: TraitAttributes,
    /// Object holding the function (a type or the global object)
    pub owner: Option<ValueId>,
    /// Slot of the function in its owner
    pub slot_num: Option<usize>,
    /// Slot of the setter paired with a getter
    pub next_slot: Option<usize>,
    /// Receiver bound when the method was extracted
    pub this_obj: Option<Value>,
    /// Lexical scope captured at creation
    pub scope_chain: Option<ValueId>,
    /// Whether this is a class constructor
    pub is_constructor: bool,
}

impl FunctionData {
    /// A native function with `num_args` parameters
    pub fn native(name: QualifiedName, num_args: usize, body: NativeFn) -> Self {
        Self {
            name,
            body: FunctionBody::Native(body),
            num_args,
            num_default: 0,
            rest: false,
            param_types: Vec::new(),
            attributes: TraitAttributes::NATIVE,
            owner: None,
            slot_num: None,
            next_slot: None,
            this_obj: None,
            scope_chain: None,
            is_constructor: false,
        }
    }

    /// Returns true for getter functions
    pub fn is_getter(&self) -> bool {
        self.attributes.contains(TraitAttributes::GETTER)
    }

    /// Returns true for setter functions
    pub fn is_setter(&self) -> bool {
        self.attributes.contains(TraitAttributes::SETTER)
    }

    /// Parameters without a default value
    pub fn num_required(&self) -> usize {
        self.num_args.saturating_sub(self.num_default)
    }
}

/// Type payload.
#[derive(Clone)]
pub struct TypeData {
    /// Qualified type name
    pub qname: QualifiedName,
    /// Numeric type id, shared by clones of the type
    pub id: u32,
    /// Pool key of the type's instances
    pub pool_key: PoolKey,
    /// Base type
    pub base_type: Option<ValueId>,
    /// Implemented interfaces and mixed-in types
    pub implements: Vec<ValueId>,
    /// Static block traits
    pub block: BlockData,
    /// Shape of instances
    pub instance_block: Option<ValueId>,
    /// Type attributes
    pub attributes: TypeAttributes,
    /// Helper set used by values of this type
    pub helpers: Rc<dyn Helpers>,
    /// Helper set is taken from the base type at fixup
    pub inherits_helpers: bool,
    /// Bytes per instance
    pub instance_size: usize,
    /// Depth in the inheritance chain
    pub sub_type_count: u32,
    /// Instance initializer run before the constructor
    pub initializer: Option<ValueId>,
    /// Base type not yet linked
    pub need_fixup: bool,
    /// Base type linked
    pub fixup_done: bool,
    /// Some base type has a constructor
    pub has_base_constructors: bool,
    /// Some base type has an instance initializer
    pub has_base_initializers: bool,
    /// Some base type is native
    pub has_native_base: bool,
    /// Member access must stay name based
    pub no_bind: bool,
    /// Instances are never pooled
    pub dont_pool: bool,
    /// Static initializers have run
    pub initialized: bool,
}

impl fmt::Debug for TypeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeData")
            .field("qname", &self.qname)
            .field("id", &self.id)
            .field("base_type", &self.base_type)
            .field("helpers", &self.helpers.name())
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl TypeData {
    /// Returns true if the type declares a constructor
    pub fn has_constructor(&self) -> bool {
        self.attributes.contains(TypeAttributes::HAS_CONSTRUCTOR)
    }

    /// Returns true for interfaces
    pub fn is_interface(&self) -> bool {
        self.attributes.contains(TypeAttributes::INTERFACE)
    }

    /// Returns true for native types
    pub fn is_native(&self) -> bool {
        self.attributes.contains(TypeAttributes::NATIVE)
    }

    /// Slot of the constructor in the static block
    pub fn constructor_slot(&self) -> Option<usize> {
        self.has_constructor().then_some(self.block.num_inherited)
    }

    /// Slot of the static initializer in the static block
    pub fn static_initializer_slot(&self) -> Option<usize> {
        self.attributes
            .contains(TypeAttributes::HAS_STATIC_INITIALIZER)
            .then(|| self.block.num_inherited + usize::from(self.has_constructor()))
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorData {
    /// Error kind; `None` for the base `Error` type
    pub kind: Option<ErrorKind>,
    /// Message
    pub message: String,
    /// Call stack when raised
    pub stack: Vec<StackFrame>,
    /// Source position of the faulting instruction
    pub position: Option<SourcePosition>,
}

/// Iterator payload.
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorData {
    /// Keys or values
    pub kind: IterKind,
    /// Items snapshotted when the iterator was created
    pub items: Vec<Value>,
    /// Next item to yield
    pub index: usize,
}

/// Kind-specific payload of a heap object.
#[derive(Debug, Clone, Default)]
pub enum ObjectKind {
    /// Plain object
    #[default]
    Object,
    /// Array with its elements
    Array(Vec<Value>),
    /// Error instance
    Error(ErrorData),
    /// Block
    Block(BlockData),
    /// Function
    Function(Box<FunctionData>),
    /// Type
    Type(Box<TypeData>),
    /// Iterator
    Iterator(IteratorData),
}

/// A composite value in the heap.
#[derive(Debug, Clone, Default)]
pub struct HeapObject {
    /// Type of the value
    pub type_id: ValueId,
    /// Flags
    pub flags: ObjectFlags,
    /// Property slots
    pub slots: SlotTable,
    /// Payload
    pub kind: ObjectKind,
}

impl HeapObject {
    /// Creates an object
    pub fn new(type_id: ValueId, slots: SlotTable, kind: ObjectKind) -> Self {
        Self {
            type_id,
            flags: ObjectFlags::default(),
            slots,
            kind,
        }
    }

    /// Takes over the contents of `fresh`, keeping this object's slot allocation
    pub fn recycle(mut self, fresh: HeapObject) -> HeapObject {
        self.slots.reset_from(&fresh.slots);
        self.type_id = fresh.type_id;
        self.flags = fresh.flags;
        self.kind = fresh.kind;
        self
    }

    /// Block payload of blocks, functions and types
    pub fn block(&self) -> Option<&BlockData> {
        match &self.kind {
            ObjectKind::Block(block) => Some(block),
            ObjectKind::Type(data) => Some(&data.block),
            _ => None,
        }
    }

    /// Mutable block payload
    pub fn block_mut(&mut self) -> Option<&mut BlockData> {
        match &mut self.kind {
            ObjectKind::Block(block) => Some(block),
            ObjectKind::Type(data) => Some(&mut data.block),
            _ => None,
        }
    }

    /// Function payload
    pub fn function(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(data) => Some(data),
            _ => None,
        }
    }

    /// Type payload
    pub fn type_data(&self) -> Option<&TypeData> {
        match &self.kind {
            ObjectKind::Type(data) => Some(data),
            _ => None,
        }
    }

    /// Returns true for types
    pub fn is_type(&self) -> bool {
        matches!(self.kind, ObjectKind::Type(_))
    }

    /// Returns true for functions
    pub fn is_function(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    /// Every heap handle this object keeps alive.
    pub fn references(&self, out: &mut Vec<ValueId>) {
        fn push(out: &mut Vec<ValueId>, value: &Value) {
            if let Value::Ref(id) = value {
                out.push(*id);
            }
        }
        fn push_block(out: &mut Vec<ValueId>, block: &BlockData) {
            out.extend(block.traits.iter().filter_map(|t| t.type_id));
            out.extend(block.scope_chain);
            match &block.role {
                BlockRole::Lexical => {}
                BlockRole::Activation { function, this } => {
                    out.push(*function);
                    push(out, this);
                }
                BlockRole::With(object) => push(out, object),
                BlockRole::Exception(state) => {
                    for value in state.parked.iter().chain(&state.argument) {
                        push(out, value);
                    }
                }
            }
        }

        out.push(self.type_id);
        for value in self.slots.values() {
            push(out, value);
        }
        match &self.kind {
            ObjectKind::Object | ObjectKind::Error(_) => {}
            ObjectKind::Array(items) => items.iter().for_each(|v| push(out, v)),
            ObjectKind::Iterator(data) => data.items.iter().for_each(|v| push(out, v)),
            ObjectKind::Block(block) => push_block(out, block),
            ObjectKind::Function(data) => {
                out.extend(data.owner);
                out.extend(data.scope_chain);
                if let Some(this) = &data.this_obj {
                    push(out, this);
                }
            }
            ObjectKind::Type(data) => {
                push_block(out, &data.block);
                out.extend(data.base_type);
                out.extend(data.implements.iter().copied());
                out.extend(data.instance_block);
                out.extend(data.initializer);
            }
        }
    }
}
