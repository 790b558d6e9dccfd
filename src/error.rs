// Emitter Error Handling

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum EmitError {
    // Namespace errors
    DuplicateSymbol(String),
    DuplicateLocal(String),
    EntryRoutineLocal(String),

    // Version / options errors
    UnsupportedVersion(u8),
    OptionsVersionMismatch(u8),

    // Instruction emission errors
    ConditionNeedsVariable(&'static str),
    ConditionArity(&'static str, &'static str), // opcode, expected shape
    TooManyCallArguments(usize, usize),         // supplied, allowed

    // Capacity errors
    TooManyProperties(usize),
    TooManyFlags(usize),
    TooManySelfInsertingBreaks(usize),
    BreakCharOutOfRange(char),

    // Lifecycle errors
    AlreadyFinished(String),

    // IO errors
    IoError(String),
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EmitError::DuplicateSymbol(name) => {
                write!(f, "Duplicate global symbol '{}'", name)
            }
            EmitError::DuplicateLocal(name) => {
                write!(f, "Duplicate local variable '{}'", name)
            }
            EmitError::EntryRoutineLocal(name) => {
                write!(
                    f,
                    "Entry routine may not have parameters or locals (tried to add '{}')",
                    name
                )
            }
            EmitError::UnsupportedVersion(version) => {
                write!(f, "Unsupported Z-machine version {}", version)
            }
            EmitError::OptionsVersionMismatch(version) => {
                write!(f, "Game options do not match Z-machine version {}", version)
            }
            EmitError::ConditionNeedsVariable(opcode) => {
                write!(f, "{} requires a variable operand", opcode)
            }
            EmitError::ConditionArity(opcode, expected) => {
                write!(f, "{} requires {}", opcode, expected)
            }
            EmitError::TooManyCallArguments(supplied, allowed) => {
                write!(
                    f,
                    "Too many call arguments: {} supplied, {} allowed for this version",
                    supplied, allowed
                )
            }
            EmitError::TooManyProperties(max) => {
                write!(f, "Too many properties for this version (maximum {})", max)
            }
            EmitError::TooManyFlags(max) => {
                write!(f, "Too many flags for this version (maximum {})", max)
            }
            EmitError::TooManySelfInsertingBreaks(max) => {
                write!(
                    f,
                    "Too many self-inserting word-break characters (maximum {})",
                    max
                )
            }
            EmitError::BreakCharOutOfRange(ch) => {
                write!(
                    f,
                    "Self-inserting word-break character '{}' is outside the byte range",
                    ch
                )
            }
            EmitError::AlreadyFinished(what) => {
                write!(f, "{} has already been finished", what)
            }
            EmitError::IoError(msg) => {
                write!(f, "IO error: {}", msg)
            }
        }
    }
}

impl std::error::Error for EmitError {}

impl From<io::Error> for EmitError {
    fn from(e: io::Error) -> Self {
        EmitError::IoError(e.to_string())
    }
}
