//! Exception unwinding
//!
//! Handlers come from each function's table, innermost first. A try
//! statement compiles to
//!
//! ```text
//! try body          CallFinally(f); Goto(end)
//! catch body        ...; EndException
//! finally body      ...; EndException
//! end:
//! ```
//!
//! Entering a catch or finally body pushes a hidden exception block that
//! records how the body was entered. `EndException` closes that block and
//! either re-raises the parked exception, resumes after the `CallFinally`,
//! or leaves the try statement (running its finally body first when the
//! statement has one).
//!
//! The innermost exception block sets the frame's [`ExceptionState`]. A
//! second exception raised inside a catch body may still run the finally
//! body of the same try statement but never one of its catches; one raised
//! inside a finally body leaves that try statement altogether. Try
//! statements nested inside a handler body catch as usual.

use crate::call_frame::{ExceptionState, FrameState};
use crate::error::{ExecResult, Exception};
use crate::object::{BlockData, BlockRole, HandlerState, HeapObject, ObjectKind};
use crate::vm::Vm;
use bytecode_system::{ExceptionHandler, HandlerKind};
use core_types::{ErrorKind, StackFrame, Value, ValueId, VmError};
use memory_manager::SlotTable;

impl Vm {
    /// Transfers control to the innermost matching handler.
    ///
    /// Frames without a handler are popped. When the frame at `floor` (the
    /// one that started this `execute`) is popped the exception is returned.
    pub(crate) fn unwind(&mut self, exception: Exception, floor: usize) -> ExecResult<()> {
        let value = match exception {
            Exception::Exit => {
                self.abandon(floor);
                return Err(Exception::Exit);
            }
            Exception::Thrown(value) => value,
            Exception::Error(error) => match self.materialize(&error) {
                Ok(value) => value,
                Err(_) => {
                    self.abandon(floor);
                    return Err(Exception::Error(error));
                }
            },
        };
        while let Some(frame) = self.frames.last_mut() {
            frame.state = FrameState::Throwing;
            let pc = frame.pc.saturating_sub(1);
            if let Some(index) = self.find_handler(pc, &value) {
                let entered = self.enter_handler(index, value);
                if entered.is_err() {
                    self.abandon(floor);
                }
                return entered;
            }
            let boundary = self.frames.last().is_some_and(|f| f.boundary);
            self.pop_frame();
            if boundary || self.frames.len() <= floor {
                break;
            }
        }
        Err(Exception::Thrown(value))
    }

    /// Drops every frame above `floor`, the floor frame included.
    fn abandon(&mut self, floor: usize) {
        while self.frames.len() > floor {
            self.pop_frame();
        }
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            log::trace!("unwound frame in state {:?}", frame.state);
            self.stack.truncate(frame.stack_base);
        }
    }

    /// Turns an engine error into an error instance with its stack.
    fn materialize(&mut self, error: &VmError) -> ExecResult<Value> {
        let value = self.make_error(error.kind, &error.message)?;
        let stack = if error.stack.is_empty() {
            self.capture_stack()
        } else {
            error.stack.clone()
        };
        let position = error.source_position.or_else(|| self.current_position());
        if let Some(id) = value.as_ref_id() {
            if let ObjectKind::Error(data) = &mut self.object_mut(id)?.kind {
                data.stack = stack;
                data.position = position;
            }
        }
        Ok(value)
    }

    /// Fills in the stack and position of a thrown error that has none.
    pub(crate) fn annotate_error(&mut self, value: &Value) -> ExecResult<()> {
        let Some(id) = value.as_ref_id() else { return Ok(()) };
        let needs_stack = matches!(&self.object(id)?.kind, ObjectKind::Error(data) if data.stack.is_empty());
        if !needs_stack {
            return Ok(());
        }
        let stack = self.capture_stack();
        let position = self.current_position();
        if let ObjectKind::Error(data) = &mut self.object_mut(id)?.kind {
            data.stack = stack;
            data.position = position;
        }
        Ok(())
    }

    /// Describes the active frames, innermost first.
    pub(crate) fn capture_stack(&self) -> Vec<StackFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let position = frame.code.position_at(frame.pc.saturating_sub(1));
                let function = self.heap.get(frame.function).and_then(HeapObject::function);
                StackFrame {
                    function_name: function
                        .map(|f| f.name.name.clone())
                        .filter(|name| !name.is_empty()),
                    source_url: function
                        .and_then(|f| f.owner)
                        .filter(|owner| *owner != self.global)
                        .map(|owner| self.qualified_type_name(owner)),
                    line: position.map_or(0, |p| p.line),
                    column: position.map_or(0, |p| p.column),
                }
            })
            .collect()
    }

    fn current_position(&self) -> Option<core_types::SourcePosition> {
        let frame = self.frames.last()?;
        frame.code.position_at(frame.pc.saturating_sub(1))
    }

    fn is_stop_iteration(&self, value: &Value) -> bool {
        self.error_data(value)
            .is_some_and(|data| data.kind == Some(ErrorKind::StopIteration))
    }

    /// Handler state of the innermost catch or finally body of the current
    /// frame.
    pub(crate) fn active_handler(&self) -> Option<HandlerState> {
        let frame = self.frames.last()?;
        frame.blocks.iter().rev().find_map(|id| {
            match self.heap.get(*id).and_then(HeapObject::block).map(|b| &b.role) {
                Some(BlockRole::Exception(state)) => Some(state.clone()),
                _ => None,
            }
        })
    }

    /// Recomputes the current frame's handler sub-state from its blocks.
    fn sync_exception_state(&mut self) {
        let state = match self.active_handler().map(|s| s.kind) {
            Some(HandlerKind::Catch) => ExceptionState::InCatch,
            Some(HandlerKind::Finally) => ExceptionState::InException,
            Some(HandlerKind::Iteration) | None => ExceptionState::Normal,
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.exception_state = state;
        }
    }

    /// Index of the innermost handler of the current frame accepting `value`.
    fn find_handler(&self, pc: usize, value: &Value) -> Option<usize> {
        let frame = self.frames.last()?;
        let stop = self.is_stop_iteration(value);
        let running = match frame.exception_state {
            ExceptionState::Normal => None,
            ExceptionState::InCatch | ExceptionState::InException => self
                .active_handler()
                .and_then(|state| frame.code.handlers.get(state.handler)),
        };
        frame.code.handlers.iter().position(|handler| {
            if !handler.covers(pc) {
                return false;
            }
            if let Some(running) = running.filter(|running| handler.same_try(running)) {
                let bubbles = match frame.exception_state {
                    ExceptionState::InCatch => handler.kind != HandlerKind::Finally,
                    ExceptionState::InException => true,
                    ExceptionState::Normal => false,
                };
                if bubbles {
                    log::trace!("{:?} handler of the running {:?} body skipped", handler.kind, running.kind);
                    return false;
                }
            }
            match handler.kind {
                HandlerKind::Iteration => stop,
                HandlerKind::Finally => true,
                HandlerKind::Catch => match &handler.catch_type {
                    None => !stop,
                    Some(type_ref) => self
                        .resolve_type_ref(type_ref)
                        .is_ok_and(|target| self.instance_of(value, target)),
                },
            }
        })
    }

    fn open_exception_block(&mut self, state: HandlerState) -> ExecResult<ValueId> {
        let scope = self
            .frames
            .last()
            .map(|f| f.innermost_block())
            .ok_or_else(|| VmError::internal("No active frame"))?;
        let mut block = BlockData::new(Some(scope));
        block.role = BlockRole::Exception(state);
        let block_type = self.core.block;
        let id = self.alloc(HeapObject::new(block_type, SlotTable::new(), ObjectKind::Block(block)))?;
        if let Some(frame) = self.frames.last_mut() {
            frame.blocks.push(id);
        }
        Ok(id)
    }

    fn handler(&self, index: usize) -> ExecResult<ExceptionHandler> {
        self.frames
            .last()
            .and_then(|f| f.code.handlers.get(index).cloned())
            .ok_or_else(|| VmError::internal(format!("Exception handler {} does not exist", index)).into())
    }

    fn enter_handler(&mut self, index: usize, value: Value) -> ExecResult<()> {
        let handler = self.handler(index)?;
        log::debug!("entering {:?} handler {} at {}", handler.kind, index, handler.handler_start);
        if let Some(frame) = self.frames.last_mut() {
            let depth = frame.stack_base + handler.num_stack;
            frame.blocks.truncate(handler.num_blocks);
            frame.pc = handler.handler_start;
            self.stack.truncate(depth);
        }
        let (parked, argument) = match handler.kind {
            HandlerKind::Iteration => (None, None),
            HandlerKind::Catch => (None, Some(value)),
            HandlerKind::Finally => (Some(value), None),
        };
        if handler.kind != HandlerKind::Iteration {
            self.open_exception_block(HandlerState {
                kind: handler.kind,
                handler: index,
                parked,
                argument,
                resume_pc: None,
            })?;
        }
        self.sync_exception_state();
        if let Some(frame) = self.frames.last_mut() {
            frame.state = FrameState::Running;
        }
        Ok(())
    }

    /// Runs finally handler `index` without an exception, then resumes.
    pub(crate) fn enter_finally(&mut self, index: usize) -> ExecResult<()> {
        let handler = self.handler(index)?;
        let resume = match self.frames.last_mut() {
            Some(frame) => {
                frame.blocks.truncate(handler.num_blocks);
                frame.pc
            }
            None => return Err(VmError::internal("No active frame").into()),
        };
        self.open_exception_block(HandlerState {
            kind: HandlerKind::Finally,
            handler: index,
            parked: None,
            argument: None,
            resume_pc: Some(resume),
        })?;
        self.sync_exception_state();
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = handler.handler_start;
        }
        Ok(())
    }

    /// Ends the innermost catch or finally body.
    pub(crate) fn end_exception(&mut self) -> ExecResult<()> {
        let Some(frame) = self.frames.last() else {
            return Err(VmError::internal("No active frame").into());
        };
        let found = frame.blocks.iter().enumerate().rev().find_map(|(index, id)| {
            match self.heap.get(*id).and_then(HeapObject::block).map(|b| &b.role) {
                Some(BlockRole::Exception(state)) => Some((index, state.clone())),
                _ => None,
            }
        });
        let Some((index, state)) = found else {
            return Ok(());
        };
        let code = frame.code.clone();
        if let Some(frame) = self.frames.last_mut() {
            frame.blocks.truncate(index);
        }
        self.sync_exception_state();
        if let Some(parked) = state.parked {
            return Err(Exception::Thrown(parked));
        }
        if let Some(resume) = state.resume_pc {
            if let Some(frame) = self.frames.last_mut() {
                frame.pc = resume;
            }
            return Ok(());
        }
        let Some(handler) = code.handlers.get(state.handler) else {
            return Err(VmError::internal(format!("Exception handler {} does not exist", state.handler)).into());
        };
        let same_try: Vec<(usize, &ExceptionHandler)> = code
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.same_try(handler))
            .collect();
        let end = same_try.iter().map(|(_, h)| h.handler_end).max().unwrap_or(handler.handler_end);
        let finally = same_try.iter().copied().find(|(_, h)| h.kind == HandlerKind::Finally);
        match finally {
            Some((finally_index, finally)) if state.kind == HandlerKind::Catch => {
                self.open_exception_block(HandlerState {
                    kind: HandlerKind::Finally,
                    handler: finally_index,
                    parked: None,
                    argument: None,
                    resume_pc: Some(end),
                })?;
                self.sync_exception_state();
                if let Some(frame) = self.frames.last_mut() {
                    frame.pc = finally.handler_start;
                }
            }
            _ => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.pc = end;
                }
            }
        }
        Ok(())
    }
}
