//! Types of the C-minus language

pub mod type_system;

pub use type_system::{ExprType, Type};
