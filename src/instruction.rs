// ZAP Instruction Representation
// One assembly instruction: opcode name, operand list, optional store
// target. Branch information lives on the peephole line, not here, so the
// optimizer can rewrite targets without touching the instruction.

use std::fmt;

use crate::debug_file::DebugLineRef;
use crate::operand::{Operand, Variable};

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub name: String,
    pub operands: Vec<Operand>,
    pub store: Option<Variable>,
}

impl Instruction {
    pub fn new(name: &str) -> Instruction {
        Instruction {
            name: name.to_string(),
            operands: Vec::new(),
            store: None,
        }
    }

    pub fn with_operands(name: &str, operands: Vec<Operand>) -> Instruction {
        Instruction {
            name: name.to_string(),
            operands,
            store: None,
        }
    }

    pub fn store_to(mut self, dest: Option<&Variable>) -> Instruction {
        self.store = dest.cloned();
        self
    }

    /// Same operands and store target under a different opcode.
    pub fn renamed(&self, name: &str) -> Instruction {
        Instruction {
            name: name.to_string(),
            operands: self.operands.clone(),
            store: self.store.clone(),
        }
    }

    pub fn stores_to_stack(&self) -> bool {
        self.store == Some(Variable::Stack)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", op)?;
            } else {
                write!(f, ",{}", op)?;
            }
        }
        if let Some(dest) = &self.store {
            write!(f, " >{}", dest)?;
        }
        Ok(())
    }
}

/// An instruction paired with the source position it came from, if the
/// game is recording debug information.
#[derive(Debug, Clone)]
pub struct ZapLine {
    pub instr: Instruction,
    pub debug: Option<DebugLineRef>,
}

impl ZapLine {
    pub fn new(instr: Instruction, debug: Option<DebugLineRef>) -> ZapLine {
        ZapLine { instr, debug }
    }
}

impl fmt::Display for ZapLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.instr)
    }
}
