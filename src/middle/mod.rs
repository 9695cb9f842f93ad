//! Middle-end module - instructions, generation and listings

pub mod codegen;
pub mod ir;
pub mod printer;
