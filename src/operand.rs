// Operand, Variable, and Label Model
// Value types that flow through instruction emission: numeric literals,
// named constants, variables (stack, global, local), indirect variable
// references, deferred sums, and interned string references.

use std::fmt;

/// A Z-machine storage location addressable by ZAP instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variable {
    /// The evaluation stack, spelled STACK in assembly.
    Stack,
    /// A global variable, addressed by its assembly symbol.
    Global(String),
    /// A routine-local variable or parameter.
    Local(String),
}

impl Variable {
    pub fn name(&self) -> &str {
        match self {
            Variable::Stack => "STACK",
            Variable::Global(name) => name,
            Variable::Local(name) => name,
        }
    }

    pub fn is_stack(&self) -> bool {
        matches!(self, Variable::Stack)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An instruction operand.
///
/// Equality is structural: two `Num(5)` values are the same operand. The
/// game-level pools hand out canonical instances per value so that repeated
/// requests for the same number or string compare equal everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A numeric literal.
    Num(i32),
    /// A named constant, routine, object, property, flag, table, or word
    /// symbol, referenced by its sanitized assembly name.
    Const(String),
    /// A variable read or written by value.
    Var(Variable),
    /// A variable used indirectly, rendered with a leading apostrophe.
    Indirect(Variable),
    /// A deferred compile-time sum of two operands, rendered a+b.
    Sum(Box<Operand>, Box<Operand>),
    /// Literal string text carried inline by PRINTI/PRINTR.
    Str(String),
}

impl Operand {
    /// The literal value if this is a numeric operand.
    pub fn num(&self) -> Option<i32> {
        match self {
            Operand::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// True for the stack variable used by value.
    pub fn is_stack(&self) -> bool {
        matches!(self, Operand::Var(Variable::Stack))
    }

    /// Table slots hold variable *values*, so an indirect reference decays
    /// to the plain variable when stored in a table.
    pub fn strip_indirect(&self) -> Operand {
        match self {
            Operand::Indirect(v) => Operand::Var(v.clone()),
            other => other.clone(),
        }
    }

    /// Defer an addition to assembly time.
    pub fn add(self, other: Operand) -> Operand {
        Operand::Sum(Box::new(self), Box::new(other))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Num(n) => write!(f, "{}", n),
            Operand::Const(name) => write!(f, "{}", name),
            Operand::Var(v) => write!(f, "{}", v),
            Operand::Indirect(v) => write!(f, "'{}", v),
            Operand::Sum(a, b) => write!(f, "{}+{}", a, b),
            // Interior quotes double per ZAP string syntax
            Operand::Str(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
        }
    }
}

/// A branch target inside a routine.
///
/// `RTrue` and `RFalse` are the pervasive return-true/return-false targets;
/// branching to them renders as a branch to the assembler's TRUE/FALSE
/// labels, and jumping to them collapses to RTRUE/RFALSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    RTrue,
    RFalse,
    Local(u32),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Label::RTrue => write!(f, "TRUE"),
            Label::RFalse => write!(f, "FALSE"),
            Label::Local(n) => write!(f, "?L{}", n),
        }
    }
}
