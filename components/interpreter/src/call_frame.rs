//! Call frame for function call stack management

use bytecode_system::Code;
use core_types::{Value, ValueId};
use std::rc::Rc;

/// Lifecycle of one call while it is on the frame stack.
///
/// A returning frame is popped in the step that returns, so a frame on the
/// stack is only ever about to start, running, or being unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Pushed, no instruction run yet
    Begin,
    /// Executing instructions
    Running,
    /// Searching its handler table for an exception
    Throwing,
}

/// Whether the frame is inside a handler body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionState {
    /// Not handling an exception
    Normal,
    /// Running a catch body
    InCatch,
    /// Running a finally body
    InException,
}

/// What the caller receives when the frame returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Push the return value
    Push,
    /// Push this value instead of the return value (constructors)
    PushValue(Value),
    /// Push nothing
    Discard,
}

/// Call frame representing a function invocation
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Function being run
    pub function: ValueId,
    /// Its body
    pub code: Rc<Code>,
    /// Activation block holding arguments and locals
    pub activation: ValueId,
    /// Receiver
    pub this: Value,
    /// Next instruction
    pub pc: usize,
    /// Operand stack depth at entry
    pub stack_base: usize,
    /// Lexical, `with` and handler blocks opened by this frame, innermost last
    pub blocks: Vec<ValueId>,
    /// Arguments actually supplied, capped at the declared count
    pub argc: usize,
    /// Lifecycle state
    pub state: FrameState,
    /// Handler sub-state
    pub exception_state: ExceptionState,
    /// Return handling
    pub completion: Completion,
    /// Returning from this frame ends the current `execute`
    pub boundary: bool,
}

impl CallFrame {
    /// Create a new call frame at the first instruction of `code`
    pub fn new(function: ValueId, code: Rc<Code>, activation: ValueId, this: Value, stack_base: usize) -> Self {
        Self {
            function,
            code,
            activation,
            this,
            pc: 0,
            stack_base,
            blocks: Vec::new(),
            argc: 0,
            state: FrameState::Begin,
            exception_state: ExceptionState::Normal,
            completion: Completion::Push,
            boundary: false,
        }
    }

    /// Innermost open block, or the activation
    pub fn innermost_block(&self) -> ValueId {
        self.blocks.last().copied().unwrap_or(self.activation)
    }

    /// Every handle the frame keeps alive
    pub fn references(&self, out: &mut Vec<ValueId>) {
        out.push(self.function);
        out.push(self.activation);
        out.extend(self.blocks.iter().copied());
        if let Value::Ref(id) = &self.this {
            out.push(*id);
        }
        if let Completion::PushValue(Value::Ref(id)) = &self.completion {
            out.push(*id);
        }
    }
}
