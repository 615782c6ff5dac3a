//! One step of a function body

use crate::opcode::Opcode;
use core_types::SourcePosition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opcode and the source construct it was compiled from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Operation and operands
    pub opcode: Opcode,
    /// Reported by errors raised while this instruction runs
    pub source_position: Option<SourcePosition>,
}

impl Instruction {
    /// Instruction with no position
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            source_position: None,
        }
    }

    /// Instruction tagged with the position of its source
    pub fn with_position(opcode: Opcode, position: SourcePosition) -> Self {
        Self {
            opcode,
            source_position: Some(position),
        }
    }
}

/// Disassembly form: the opcode, then `@line:column` when known.
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.opcode)?;
        if let Some(position) = &self.source_position {
            write!(f, " @{}", position)?;
        }
        Ok(())
    }
}
