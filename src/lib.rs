//! C-minus compiler
//!
//! Source text goes through the [`frontend`] (lexer, backtracking parser,
//! scope chain) and the [`middle`] code generator, which type-checks and
//! emits stack machine instructions in a single pass.

pub mod frontend;
pub mod middle;
pub mod types;
pub mod utils;

pub use middle::ir::{CompiledFunction, Instruction, ProgramImage};
pub use utils::{Error, Result};

use frontend::lexer::Lexer;
use frontend::parser::Parser;
use middle::codegen::CodeGenerator;

/// Parse and generate a whole compilation unit
pub fn compile(source: &str) -> Result<ProgramImage> {
    let program = Parser::new(Lexer::new(source)).parse_program()?;
    CodeGenerator::new().generate(&program)
}
