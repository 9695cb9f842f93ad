//! C-minus stack machine instructions
//!
//! Every instruction works on an implicit operand stack plus addressed
//! static, local and argument slots. Labels are plain ids, so a branch may
//! name a label that is placed later in the same function.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::Serialize;

use crate::frontend::semantic::{FunctionHandle, FunctionSignature, StorageKind};
use crate::types::Type;

/// Branch target, unique within one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LabelId(pub usize);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Stack machine instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Instruction {
    // Constants
    PushInt(i32),
    PushBool(bool),
    PushChar(char),
    PushString(String),

    // Slot access
    LoadStatic(usize),
    StoreStatic(usize),
    LoadLocal(usize),
    StoreLocal(usize),
    LoadArg(usize),
    StoreArg(usize),

    // Arrays: `NewArray` pops a length, `LoadElem` pops array and index,
    // `StoreElem` pops array, index and value
    NewArray(Type),
    LoadElem(Type),
    StoreElem(Type),

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Max,
    Min,
    Neg,

    // Logic
    And,
    Or,
    Not,

    // Comparison
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,

    /// Array length
    Length,
    /// Random int in `[0, n)`
    Random,

    Dup,
    Pop,

    Call(FunctionHandle),
    Return,

    Jump(LabelId),
    JumpIfFalse(LabelId),
    JumpIfTrue(LabelId),
    Label(LabelId),

    // Runtime I/O
    /// Wrap a scalar as a printable object
    Box(Type),
    /// Print one object
    Print,
    /// Pops `args` boxed values and a format string, prints once
    PrintFormatted { args: usize },
    /// Read one input token converted to the given type
    Read(Type),
}

impl Instruction {
    /// Load from a slot of the given storage kind
    pub fn load(storage: StorageKind, slot: usize) -> Self {
        match storage {
            StorageKind::Static => Self::LoadStatic(slot),
            StorageKind::Local => Self::LoadLocal(slot),
            StorageKind::Arg => Self::LoadArg(slot),
        }
    }

    /// Store to a slot of the given storage kind
    pub fn store(storage: StorageKind, slot: usize) -> Self {
        match storage {
            StorageKind::Static => Self::StoreStatic(slot),
            StorageKind::Local => Self::StoreLocal(slot),
            StorageKind::Arg => Self::StoreArg(slot),
        }
    }

    /// Branch target, if this is a jump
    pub fn target(&self) -> Option<LabelId> {
        match self {
            Self::Jump(label) | Self::JumpIfFalse(label) | Self::JumpIfTrue(label) => Some(*label),
            _ => None,
        }
    }

    /// Control never falls through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Return | Self::Jump(_))
    }
}

/// One generated function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledFunction {
    pub signature: FunctionSignature,
    /// Declared type of every local slot, by slot index
    pub locals: Vec<Type>,
    pub instructions: Vec<Instruction>,
}

impl CompiledFunction {
    /// Labels that are branched to but never placed, each once and in order
    pub fn unresolved_labels(&self) -> Vec<LabelId> {
        let placed: HashSet<LabelId> = self
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Label(label) => Some(*label),
                _ => None,
            })
            .collect();
        let missing: BTreeSet<LabelId> = self
            .instructions
            .iter()
            .filter_map(Instruction::target)
            .filter(|label| !placed.contains(label))
            .collect();
        missing.into_iter().collect()
    }
}

/// Everything the generator produced for one compilation unit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProgramImage {
    /// In declaration order, so `functions[h.0]` has handle `h`
    pub functions: Vec<CompiledFunction>,
    /// Declared type of every static slot
    pub statics: Vec<Type>,
    /// Runs once before `main`: static array allocation and file-scope initializers
    pub static_init: Vec<Instruction>,
}

impl ProgramImage {
    /// Every function with its instruction list, in declaration order
    pub fn all_functions(&self) -> Vec<(&FunctionSignature, &[Instruction])> {
        self.functions
            .iter()
            .map(|f| (&f.signature, f.instructions.as_slice()))
            .collect()
    }

    /// The function named `main`, if declared
    pub fn entry_point(&self) -> Option<&FunctionSignature> {
        self.functions
            .iter()
            .map(|f| &f.signature)
            .find(|s| s.name == "main")
    }

    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.signature.name == name)
    }
}
