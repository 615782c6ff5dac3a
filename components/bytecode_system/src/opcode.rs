//! Bytecode opcodes for the stack machine
//!
//! Operands are decoded into the enum; jump targets and handler offsets are
//! instruction indices within the owning [`Code`](crate::Code).

use serde::{Deserialize, Serialize};

/// Index into a function body's constant pool. Zero means "none".
pub type ConstIndex = u32;

/// A qualified name expressed as two constant pool indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NameRef {
    /// Namespace string (0 for the public namespace)
    pub space: ConstIndex,
    /// Property name string
    pub name: ConstIndex,
}

impl NameRef {
    /// Create a new name reference
    pub fn new(space: ConstIndex, name: ConstIndex) -> Self {
        Self { space, name }
    }
}

/// What an iterator created by [`Opcode::GetIterator`] yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterKind {
    /// Property names (`for .. in`)
    Keys,
    /// Property values (`for each`)
    Values,
}

/// Operators evaluated through a type's `invoke_operator` helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// Unary `-`
    Neg,
    /// Unary `!`
    LogicalNot,
    /// Unary `~`
    BitNot,
    /// Truthiness test
    CompareTrue,
    /// Falsiness test
    CompareFalse,
    /// `== null` without coercion
    CompareNull,
    /// `=== undefined`
    CompareUndefined,
    /// Numeric zero test
    CompareZero,
    /// Numeric non-zero test
    CompareNotZero,
}

impl Operator {
    /// Returns true for operators taking a single operand.
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Operator::Neg
                | Operator::LogicalNot
                | Operator::BitNot
                | Operator::CompareTrue
                | Operator::CompareFalse
                | Operator::CompareNull
                | Operator::CompareUndefined
                | Operator::CompareZero
                | Operator::CompareNotZero
        )
    }

    /// Returns true for the operators that yield a boolean.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::Ne
                | Operator::StrictEq
                | Operator::StrictNe
                | Operator::Lt
                | Operator::Le
                | Operator::Gt
                | Operator::Ge
        )
    }

    /// The source symbol, used to find user-defined operator methods.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Rem => "%",
            Operator::Shl => "<<",
            Operator::Shr => ">>",
            Operator::Ushr => ">>>",
            Operator::BitAnd => "&",
            Operator::BitOr => "|",
            Operator::BitXor => "^",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::StrictEq => "===",
            Operator::StrictNe => "!==",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Neg => "neg",
            Operator::LogicalNot => "!",
            Operator::BitNot => "~",
            Operator::CompareTrue => "true",
            Operator::CompareFalse => "false",
            Operator::CompareNull => "null",
            Operator::CompareUndefined => "undefined",
            Operator::CompareZero => "zero",
            Operator::CompareNotZero => "notzero",
        }
    }

    /// Returns true if scripts may define a method implementing the operator.
    pub fn is_overloadable(self) -> bool {
        matches!(
            self,
            Operator::Mul | Operator::Div | Operator::Rem | Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge
        )
    }
}

/// Bytecode opcodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    // Literals
    /// Push undefined
    LoadUndefined,
    /// Push null
    LoadNull,
    /// Push true
    LoadTrue,
    /// Push false
    LoadFalse,
    /// Push a number literal
    LoadNumber(f64),
    /// Push a string from the constant pool
    LoadString(ConstIndex),
    /// Push the frame's `this`
    LoadThis,
    /// Push the global object
    LoadGlobal,

    // Stack management
    /// Discard the top value
    Pop,
    /// Discard the top n values
    PopItems(u32),
    /// Duplicate the top value
    Dup,
    /// Duplicate the top two values
    Dup2,
    /// Exchange the top two values
    Swap,

    // Reads
    /// Push a local (activation) slot
    GetLocalSlot(u32),
    /// Push a slot of the global object
    GetGlobalSlot(u32),
    /// Push a slot of the nth enclosing block (0 is the innermost)
    GetBlockSlot {
        /// Slot number
        slot: u32,
        /// Enclosing block depth
        depth: u32,
    },
    /// Push a slot of `this`
    GetThisSlot(u32),
    /// Pop an object, push one of its slots
    GetObjSlot(u32),
    /// Push a static slot of the nth base of `this`'s type
    GetThisTypeSlot {
        /// Slot number
        slot: u32,
        /// Base classes to skip
        nth_base: u32,
    },
    /// Pop an object, push a named property
    GetObjName(NameRef),
    /// Push a binding found through the scope chain
    GetScopedName(NameRef),
    /// Pop an object and an index, push the element
    GetElement,

    // Writes
    /// Pop a value into a local slot
    PutLocalSlot(u32),
    /// Pop a value into a global slot
    PutGlobalSlot(u32),
    /// Pop a value into a slot of the nth enclosing block
    PutBlockSlot {
        /// Slot number
        slot: u32,
        /// Enclosing block depth
        depth: u32,
    },
    /// Pop a value into a slot of `this`
    PutThisSlot(u32),
    /// Pop an object and a value, store the value into the object's slot
    PutObjSlot(u32),
    /// Pop a value into a static slot of the nth base of `this`'s type
    PutThisTypeSlot {
        /// Slot number
        slot: u32,
        /// Base classes to skip
        nth_base: u32,
    },
    /// Pop an object and a value, store the named property
    PutObjName(NameRef),
    /// Pop a value into a binding found through the scope chain
    PutScopedName(NameRef),
    /// Pop an object, an index and a value, store the element
    PutElement,
    /// Pop an object, delete a named property, push whether it existed
    DeleteObjName(NameRef),
    /// Delete a binding found through the scope chain, push whether it existed
    DeleteScopedName(NameRef),

    // Operators
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// Unary minus
    Neg,
    /// Logical not
    LogicalNot,
    /// Bitwise not
    BitNot,

    // Branches
    /// Unconditional jump
    Goto(usize),
    /// Pop, jump if truthy
    BranchTrue(usize),
    /// Pop, jump if falsy
    BranchFalse(usize),
    /// Pop, jump if null or undefined
    BranchNull(usize),
    /// Pop, jump if undefined
    BranchUndefined(usize),
    /// Pop, jump if numerically zero
    BranchZero(usize),
    /// Pop, jump if numerically non-zero
    BranchNotZero(usize),

    // Calls
    /// Call `[callee, this, args..]`
    Call(u32),
    /// Call a function held in a global slot
    CallGlobalSlot {
        /// Slot number
        slot: u32,
        /// Argument count
        argc: u32,
    },
    /// Call `[obj, args..]` through a slot of the object's type
    CallObjSlot {
        /// Slot number
        slot: u32,
        /// Argument count
        argc: u32,
    },
    /// Call `[obj, args..]` through a slot of the object itself
    CallObjInstanceSlot {
        /// Slot number
        slot: u32,
        /// Argument count
        argc: u32,
    },
    /// Call a method in a slot of `this`'s type
    CallThisSlot {
        /// Slot number
        slot: u32,
        /// Argument count
        argc: u32,
    },
    /// Call a function in a slot of the nth enclosing block
    CallBlockSlot {
        /// Slot number
        slot: u32,
        /// Enclosing block depth
        depth: u32,
        /// Argument count
        argc: u32,
    },
    /// Call `[obj, args..]` through a static slot of the nth base of the object's type
    CallObjStaticSlot {
        /// Slot number
        slot: u32,
        /// Base classes to skip
        nth_base: u32,
        /// Argument count
        argc: u32,
    },
    /// Call a static slot of the nth base of `this`'s type
    CallThisStaticSlot {
        /// Slot number
        slot: u32,
        /// Base classes to skip
        nth_base: u32,
        /// Argument count
        argc: u32,
    },
    /// Call `[obj, args..]` through a named property
    CallObjName {
        /// Method name
        name: NameRef,
        /// Argument count
        argc: u32,
    },
    /// Call a function found through the scope chain
    CallScopedName {
        /// Function name
        name: NameRef,
        /// Argument count
        argc: u32,
    },
    /// Call the next base class constructor on `this`
    CallNextConstructor(u32),
    /// Construct `[type, args..]`
    New(u32),
    /// Build a dynamic object from `count` name/value pairs
    NewObject(u32),
    /// Build an array from `count` values
    NewArray(u32),
    /// Return undefined
    Return,
    /// Pop and return a value
    ReturnValue,

    // Exceptions and blocks
    /// Pop a value and throw it
    Throw,
    /// Push the exception being handled
    PushCatchArg,
    /// Run a finally handler without an exception, then continue
    CallFinally(usize),
    /// End a catch or finally body
    EndException,
    /// Open a lexical block from the body's block table
    OpenBlock(usize),
    /// Pop an object and open a `with` block over it
    OpenWith,
    /// Close the innermost block
    CloseBlock,
    /// Open a namespace in the innermost block
    AddNamespace(ConstIndex),
    /// Bind the class in a global slot to the current scope and initialize it
    DefineClass(u32),
    /// Push a closure over the current scope for a nested function
    MakeClosure(usize),
    /// Jump over default argument initializers already supplied
    InitDefaultArgs(Vec<usize>),

    // Iteration and types
    /// Pop an object, push an iterator over it
    GetIterator(IterKind),
    /// Push the next item of the iterator on top, or raise stop-iteration
    IteratorNext,
    /// Pop a value, push its type name
    TypeOf,
    /// Pop a value and a type, push whether the value is an instance
    InstanceOf,
    /// Pop a value and a type, push the converted value
    Cast,
    /// Do nothing
    Nop,
    /// Debugger hook; logs the frame state
    Debug,
}

impl Opcode {
    /// Returns the operator evaluated by an operator opcode.
    pub fn operator(&self) -> Option<Operator> {
        let op = match self {
            Opcode::Add => Operator::Add,
            Opcode::Sub => Operator::Sub,
            Opcode::Mul => Operator::Mul,
            Opcode::Div => Operator::Div,
            Opcode::Rem => Operator::Rem,
            Opcode::Shl => Operator::Shl,
            Opcode::Shr => Operator::Shr,
            Opcode::Ushr => Operator::Ushr,
            Opcode::BitAnd => Operator::BitAnd,
            Opcode::BitOr => Operator::BitOr,
            Opcode::BitXor => Operator::BitXor,
            Opcode::Eq => Operator::Eq,
            Opcode::Ne => Operator::Ne,
            Opcode::StrictEq => Operator::StrictEq,
            Opcode::StrictNe => Operator::StrictNe,
            Opcode::Lt => Operator::Lt,
            Opcode::Le => Operator::Le,
            Opcode::Gt => Operator::Gt,
            Opcode::Ge => Operator::Ge,
            Opcode::Neg => Operator::Neg,
            Opcode::LogicalNot => Operator::LogicalNot,
            Opcode::BitNot => Operator::BitNot,
            _ => return None,
        };
        Some(op)
    }

    /// Returns the test operator and target of a conditional branch.
    pub fn branch_test(&self) -> Option<(Operator, usize)> {
        match *self {
            Opcode::BranchTrue(t) => Some((Operator::CompareTrue, t)),
            Opcode::BranchFalse(t) => Some((Operator::CompareFalse, t)),
            Opcode::BranchNull(t) => Some((Operator::CompareNull, t)),
            Opcode::BranchUndefined(t) => Some((Operator::CompareUndefined, t)),
            Opcode::BranchZero(t) => Some((Operator::CompareZero, t)),
            Opcode::BranchNotZero(t) => Some((Operator::CompareNotZero, t)),
            _ => None,
        }
    }

    /// Returns the jump target of a branch or goto.
    pub fn jump_target(&self) -> Option<usize> {
        match *self {
            Opcode::Goto(t) => Some(t),
            _ => self.branch_test().map(|(_, t)| t),
        }
    }

    /// Rewrites the jump target of a branch or goto; returns false for other opcodes.
    pub fn set_jump_target(&mut self, target: usize) -> bool {
        match self {
            Opcode::Goto(t)
            | Opcode::BranchTrue(t)
            | Opcode::BranchFalse(t)
            | Opcode::BranchNull(t)
            | Opcode::BranchUndefined(t)
            | Opcode::BranchZero(t)
            | Opcode::BranchNotZero(t) => {
                *t = target;
                true
            }
            _ => false,
        }
    }

    /// Check if this opcode ends a basic block unconditionally
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::ReturnValue | Opcode::Goto(_) | Opcode::Throw | Opcode::EndException
        )
    }

    /// Check if this opcode invokes a function
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Opcode::Call(_)
                | Opcode::CallGlobalSlot { .. }
                | Opcode::CallObjSlot { .. }
                | Opcode::CallObjInstanceSlot { .. }
                | Opcode::CallThisSlot { .. }
                | Opcode::CallBlockSlot { .. }
                | Opcode::CallObjStaticSlot { .. }
                | Opcode::CallThisStaticSlot { .. }
                | Opcode::CallObjName { .. }
                | Opcode::CallScopedName { .. }
                | Opcode::CallNextConstructor(_)
                | Opcode::New(_)
        )
    }
}
