//! Frontend module - Lexer, Parser, name resolution

pub mod token;
pub mod lexer;
pub mod ast;
pub mod parser;
pub mod semantic;
