//! Function bodies: instructions, constant pool, handler and block tables
//!
//! A [`Code`] is what the external compiler hands the engine for one
//! function. It doubles as a small assembler so hosts and tests can build
//! bodies directly.

use crate::instruction::Instruction;
use crate::opcode::{ConstIndex, NameRef, Opcode};
use core_types::{QualifiedName, SourcePosition, TraitAttributes, VmError, VmResult};
use serde::{Deserialize, Serialize};

/// Interned strings of a function body or module.
///
/// Index 0 is reserved and reads as the empty string, so a zero operand
/// means "no name".
///
/// # Examples
///
/// ```
/// use bytecode_system::ConstantPool;
///
/// let mut pool = ConstantPool::new();
/// let hello = pool.intern("hello");
/// assert_eq!(hello, 1);
/// assert_eq!(pool.intern("hello"), hello);
/// assert_eq!(pool.get(0), Some(""));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantPool {
    strings: Vec<String>,
}

impl ConstantPool {
    /// Create a pool holding only the reserved empty entry
    pub fn new() -> Self {
        Self {
            strings: vec![String::new()],
        }
    }

    /// Interns a string and returns its index
    pub fn intern(&mut self, value: &str) -> ConstIndex {
        if value.is_empty() {
            return 0;
        }
        if let Some(index) = self.strings.iter().position(|s| s == value) {
            return index as ConstIndex;
        }
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as ConstIndex
    }

    /// Reads an entry
    pub fn get(&self, index: ConstIndex) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    /// Reads an entry, failing with an internal error when out of range
    pub fn string(&self, index: ConstIndex) -> VmResult<&str> {
        self.get(index)
            .ok_or_else(|| VmError::internal(format!("Bad constant pool index {}", index)))
    }

    /// Resolves a name reference
    pub fn qualified_name(&self, name: NameRef) -> VmResult<QualifiedName> {
        Ok(QualifiedName::new(self.string(name.space)?, self.string(name.name)?))
    }

    /// Number of entries, the reserved one included
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns true when only the reserved entry exists
    pub fn is_empty(&self) -> bool {
        self.strings.len() <= 1
    }

    /// All entries in index order
    pub fn strings(&self) -> &[String] {
        &self.strings
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference to a type from bytecode metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    /// A type held in a slot of the global object
    Slot(u32),
    /// A type looked up by name in the global object
    Name(QualifiedName),
}

/// Kind of an exception handler region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerKind {
    /// Catches a matching exception
    Catch,
    /// Runs on every exit from the try statement
    Finally,
    /// Ends a loop on the stop-iteration sentinel
    Iteration,
}

/// One entry of a function's exception handler table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// Handler kind
    pub kind: HandlerKind,
    /// First instruction of the try body
    pub try_start: usize,
    /// One past the last instruction of the try body
    pub try_end: usize,
    /// First instruction of the handler body
    pub handler_start: usize,
    /// One past the last instruction of the handler body
    pub handler_end: usize,
    /// Open blocks when the try statement was entered
    pub num_blocks: usize,
    /// Operand stack depth (relative to the frame) when the try statement was entered
    pub num_stack: usize,
    /// Type caught; `None` catches anything except stop-iteration
    pub catch_type: Option<TypeRef>,
}

impl ExceptionHandler {
    /// Returns true if an exception raised at `pc` may enter this handler.
    ///
    /// Catch and iteration handlers guard the try body. A finally handler
    /// also guards the catch bodies that precede it.
    pub fn covers(&self, pc: usize) -> bool {
        match self.kind {
            HandlerKind::Catch | HandlerKind::Iteration => pc >= self.try_start && pc < self.try_end,
            HandlerKind::Finally => pc >= self.try_start && pc < self.handler_start,
        }
    }

    /// Returns true if `other` belongs to the same try statement.
    pub fn same_try(&self, other: &ExceptionHandler) -> bool {
        self.try_start == other.try_start && self.try_end == other.try_end
    }
}

/// Shape of a lexical block opened by [`Opcode::OpenBlock`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockDef {
    /// Name shown in diagnostics
    pub name: String,
    /// Slot names, one per block slot
    pub slots: Vec<QualifiedName>,
}

/// Compiled body of one function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Code {
    /// Instruction stream
    pub instructions: Vec<Instruction>,
    /// Strings referenced by operands
    pub constants: ConstantPool,
    /// Handler table in innermost-first order
    pub handlers: Vec<ExceptionHandler>,
    /// Lexical blocks referenced by `OpenBlock`
    pub blocks: Vec<BlockDef>,
    /// Nested functions referenced by `MakeClosure`
    pub functions: Vec<FunctionDef>,
}

impl Code {
    /// Create an empty body
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction and returns its index
    pub fn emit(&mut self, opcode: Opcode) -> usize {
        self.instructions.push(Instruction::new(opcode));
        self.instructions.len() - 1
    }

    /// Appends an instruction tagged with a source position
    pub fn emit_at(&mut self, opcode: Opcode, position: SourcePosition) -> usize {
        self.instructions
            .push(Instruction::with_position(opcode, position));
        self.instructions.len() - 1
    }

    /// Index of the next instruction to be emitted
    pub fn here(&self) -> usize {
        self.instructions.len()
    }

    /// Points the branch at `index` to `target`
    pub fn patch(&mut self, index: usize, target: usize) -> bool {
        self.instructions
            .get_mut(index)
            .is_some_and(|inst| inst.opcode.set_jump_target(target))
    }

    /// Interns a string constant
    pub fn string(&mut self, value: &str) -> ConstIndex {
        self.constants.intern(value)
    }

    /// Interns a qualified name
    pub fn name(&mut self, space: &str, name: &str) -> NameRef {
        NameRef::new(self.constants.intern(space), self.constants.intern(name))
    }

    /// Adds a handler table entry and returns its index
    pub fn add_handler(&mut self, handler: ExceptionHandler) -> usize {
        self.handlers.push(handler);
        self.handlers.len() - 1
    }

    /// Adds a block definition and returns its index
    pub fn add_block(&mut self, block: BlockDef) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    /// Adds a nested function and returns its index
    pub fn add_function(&mut self, function: FunctionDef) -> usize {
        self.functions.push(function);
        self.functions.len() - 1
    }

    /// Reads an instruction
    pub fn instruction(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    /// Source position of the instruction at `pc`, or of the closest one before it
    pub fn position_at(&self, pc: usize) -> Option<SourcePosition> {
        let end = pc.min(self.instructions.len().saturating_sub(1));
        self.instructions
            .get(..=end)?
            .iter()
            .rev()
            .find_map(|inst| inst.source_position)
    }

    /// Checks operands against the tables of this body.
    ///
    /// Jump targets may equal the instruction count (falling off the end
    /// returns undefined); every other reference must be in range.
    pub fn validate(&self) -> VmResult<()> {
        let len = self.instructions.len();
        let bad = |what: &str, pc: usize| -> VmResult<()> {
            Err(VmError::internal(format!("Invalid {} at instruction {}", what, pc)))
        };
        for (pc, inst) in self.instructions.iter().enumerate() {
            if let Some(target) = inst.opcode.jump_target() {
                if target > len {
                    return bad("jump target", pc);
                }
            }
            match &inst.opcode {
                Opcode::CallFinally(h) => match self.handlers.get(*h) {
                    Some(handler) if handler.kind == HandlerKind::Finally => {}
                    _ => return bad("finally handler", pc),
                },
                Opcode::OpenBlock(b) if *b >= self.blocks.len() => return bad("block", pc),
                Opcode::MakeClosure(f) if *f >= self.functions.len() => {
                    return bad("function", pc)
                }
                Opcode::InitDefaultArgs(targets) if targets.iter().any(|t| *t > len) => {
                    return bad("default argument target", pc)
                }
                Opcode::LoadString(c) | Opcode::AddNamespace(c)
                    if *c as usize >= self.constants.len() =>
                {
                    return bad("constant", pc)
                }
                Opcode::GetObjName(n)
                | Opcode::GetScopedName(n)
                | Opcode::PutObjName(n)
                | Opcode::PutScopedName(n)
                | Opcode::DeleteObjName(n)
                | Opcode::DeleteScopedName(n)
                | Opcode::CallObjName { name: n, .. }
                | Opcode::CallScopedName { name: n, .. }
                    if n.space as usize >= self.constants.len()
                        || n.name as usize >= self.constants.len() =>
                {
                    return bad("name", pc)
                }
                _ => {}
            }
        }
        for handler in &self.handlers {
            if handler.try_start > handler.try_end
                || handler.try_end > handler.handler_start
                || handler.handler_start > handler.handler_end
                || handler.handler_end > len
            {
                return Err(VmError::internal(format!(
                    "Invalid handler region {}..{}",
                    handler.try_start, handler.handler_end
                )));
            }
        }
        for function in &self.functions {
            function.code.validate()?;
        }
        Ok(())
    }
}

/// Declaration of one function: arity, parameter types, locals and body.
///
/// The activation block holds the parameters first, then the rest array
/// when `rest` is set, then the remaining locals. `locals` names every
/// activation slot in that order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Function name
    pub name: QualifiedName,
    /// Getter, setter, static and override flags
    pub attributes: TraitAttributes,
    /// Declared parameters, defaulted ones included
    pub num_args: u32,
    /// Parameters with a default value
    pub num_default: u32,
    /// Whether excess arguments are collected into an array
    pub rest: bool,
    /// Declared parameter types, one per parameter
    pub param_types: Vec<Option<TypeRef>>,
    /// Activation slot names
    pub locals: Vec<QualifiedName>,
    /// Slot the function occupies in its owner, if fixed by the compiler
    pub slot: Option<u32>,
    /// Body
    pub code: Code,
}

impl FunctionDef {
    /// Create a function with no parameters
    pub fn new(name: impl Into<QualifiedName>, code: Code) -> Self {
        Self {
            name: name.into(),
            code,
            ..Self::default()
        }
    }

    /// Declares named parameters; the last `num_default` have defaults
    pub fn with_params(mut self, params: &[&str], num_default: u32) -> Self {
        self.num_args = params.len() as u32;
        self.num_default = num_default;
        let mut locals: Vec<QualifiedName> =
            params.iter().map(|p| QualifiedName::public(*p)).collect();
        locals.append(&mut self.locals);
        self.locals = locals;
        self
    }

    /// Declares a rest parameter after the fixed ones
    pub fn with_rest(mut self, name: &str) -> Self {
        self.rest = true;
        let at = (self.num_args as usize).min(self.locals.len());
        self.locals.insert(at, QualifiedName::public(name));
        self
    }

    /// Declares additional local variables
    pub fn with_locals(mut self, names: &[&str]) -> Self {
        self.locals
            .extend(names.iter().map(|n| QualifiedName::public(*n)));
        self
    }

    /// Declares parameter types
    pub fn with_param_types(mut self, types: Vec<Option<TypeRef>>) -> Self {
        self.param_types = types;
        self
    }

    /// Adds trait attributes
    pub fn with_attributes(mut self, attributes: TraitAttributes) -> Self {
        self.attributes |= attributes;
        self
    }

    /// Pins the owner slot
    pub fn at_slot(mut self, slot: u32) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Parameters without a default value
    pub fn num_required(&self) -> u32 {
        self.num_args.saturating_sub(self.num_default)
    }

    /// Number of activation slots
    pub fn num_locals(&self) -> usize {
        let params = self.num_args as usize + usize::from(self.rest);
        self.locals.len().max(params)
    }
}
