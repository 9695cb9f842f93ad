//! Listing printer - human-readable program images
//!
//! Outputs one instruction per line, for debugging and `cmc --emit listing`.

use std::fmt;

use crate::middle::ir::{CompiledFunction, Instruction, ProgramImage};

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushInt(v) => write!(f, "push.i {}", v),
            Instruction::PushBool(v) => write!(f, "push.b {}", v),
            Instruction::PushChar(c) => write!(f, "push.c {:?}", c),
            Instruction::PushString(s) => write!(f, "push.s {:?}", s),
            Instruction::LoadStatic(slot) => write!(f, "load.static {}", slot),
            Instruction::StoreStatic(slot) => write!(f, "store.static {}", slot),
            Instruction::LoadLocal(slot) => write!(f, "load.local {}", slot),
            Instruction::StoreLocal(slot) => write!(f, "store.local {}", slot),
            Instruction::LoadArg(slot) => write!(f, "load.arg {}", slot),
            Instruction::StoreArg(slot) => write!(f, "store.arg {}", slot),
            Instruction::NewArray(ty) => write!(f, "newarr {}", ty),
            Instruction::LoadElem(ty) => write!(f, "load.elem {}", ty),
            Instruction::StoreElem(ty) => write!(f, "store.elem {}", ty),
            Instruction::Add => write!(f, "add"),
            Instruction::Sub => write!(f, "sub"),
            Instruction::Mul => write!(f, "mul"),
            Instruction::Div => write!(f, "div"),
            Instruction::Rem => write!(f, "rem"),
            Instruction::Max => write!(f, "max"),
            Instruction::Min => write!(f, "min"),
            Instruction::Neg => write!(f, "neg"),
            Instruction::And => write!(f, "and"),
            Instruction::Or => write!(f, "or"),
            Instruction::Not => write!(f, "not"),
            Instruction::Eq => write!(f, "eq"),
            Instruction::Ne => write!(f, "ne"),
            Instruction::Gt => write!(f, "gt"),
            Instruction::Lt => write!(f, "lt"),
            Instruction::Ge => write!(f, "ge"),
            Instruction::Le => write!(f, "le"),
            Instruction::Length => write!(f, "len"),
            Instruction::Random => write!(f, "rand"),
            Instruction::Dup => write!(f, "dup"),
            Instruction::Pop => write!(f, "pop"),
            Instruction::Call(handle) => write!(f, "call #{}", handle.0),
            Instruction::Return => write!(f, "ret"),
            Instruction::Jump(label) => write!(f, "jump {}", label),
            Instruction::JumpIfFalse(label) => write!(f, "jump.false {}", label),
            Instruction::JumpIfTrue(label) => write!(f, "jump.true {}", label),
            Instruction::Label(label) => write!(f, "{}:", label),
            Instruction::Box(ty) => write!(f, "box {}", ty),
            Instruction::Print => write!(f, "print"),
            Instruction::PrintFormatted { args } => write!(f, "print.fmt {}", args),
            Instruction::Read(ty) => write!(f, "read {}", ty),
        }
    }
}

/// Display adapter printing a whole program image
pub struct Listing<'a>(pub &'a ProgramImage);

impl Listing<'_> {
    fn write_code(&self, f: &mut fmt::Formatter<'_>, code: &[Instruction]) -> fmt::Result {
        for inst in code {
            match inst {
                Instruction::Label(_) => writeln!(f, "  {}", inst)?,
                Instruction::Call(handle) => match self.0.functions.get(handle.0) {
                    Some(callee) => writeln!(f, "    call {}", callee.signature.name)?,
                    None => writeln!(f, "    {}", inst)?,
                },
                _ => writeln!(f, "    {}", inst)?,
            }
        }
        Ok(())
    }

    fn write_function(&self, f: &mut fmt::Formatter<'_>, func: &CompiledFunction) -> fmt::Result {
        let sig = &func.signature;
        let params: Vec<String> = sig.param_types.iter().map(|t| t.to_string()).collect();
        writeln!(f, "fn {}({}) -> {} {{", sig.name, params.join(", "), sig.return_type)?;
        for (slot, ty) in func.locals.iter().enumerate() {
            writeln!(f, "    .local {}: {}", slot, ty)?;
        }
        self.write_code(f, &func.instructions)?;
        writeln!(f, "}}")
    }
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let image = self.0;
        writeln!(f, "; Functions: {}", image.functions.len())?;
        if let Some(entry) = image.entry_point() {
            writeln!(f, "; Entry: {}", entry.name)?;
        }
        writeln!(f)?;

        if !image.statics.is_empty() || !image.static_init.is_empty() {
            writeln!(f, ".statics {{")?;
            for (slot, ty) in image.statics.iter().enumerate() {
                writeln!(f, "    .static {}: {}", slot, ty)?;
            }
            self.write_code(f, &image.static_init)?;
            writeln!(f, "}}")?;
            writeln!(f)?;
        }

        for func in &image.functions {
            self.write_function(f, func)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Convenience function to print a program image
pub fn print_listing(image: &ProgramImage) -> String {
    Listing(image).to_string()
}
