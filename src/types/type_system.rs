//! Type System for C-minus

use std::fmt;

use serde::Serialize;

/// Declared type of a variable, parameter or function result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    Int,
    Bool,
    Char,
    String,
    /// Function result only
    Void,
    /// Array of a scalar element type. The length lives on the symbol, so
    /// `int a[10]` and an `int a[]` parameter have the same type.
    Array(Box<Type>),
}

impl Type {
    /// Parse a type keyword
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "int" => Some(Self::Int),
            "bool" => Some(Self::Bool),
            "char" => Some(Self::Char),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    pub fn array_of(elem: Type) -> Self {
        Self::Array(Box::new(elem))
    }

    /// Element type of an array type
    pub fn element(&self) -> Option<&Type> {
        match self {
            Self::Array(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Scalar types can be read, printed and compared
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Int | Self::Bool | Self::Char | Self::String)
    }

    /// Ordered comparison (`<` and friends) is defined on these
    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Int | Self::Char)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::Char => write!(f, "char"),
            Self::String => write!(f, "string"),
            Self::Void => write!(f, "void"),
            Self::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}

/// Result of visiting an expression node
///
/// `Operator` is what a bare operator node in a chain evaluates to. It is
/// exempt from type matching and never a real value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprType {
    Value(Type),
    Operator,
}

impl ExprType {
    /// The value type, if this is not the operator marker
    pub fn value(&self) -> Option<&Type> {
        match self {
            Self::Value(ty) => Some(ty),
            Self::Operator => None,
        }
    }

    /// Does this operand agree with the chain's leading type?
    pub fn matches(&self, expected: &Type) -> bool {
        match self {
            Self::Value(ty) => ty == expected,
            Self::Operator => true,
        }
    }
}

impl From<Type> for ExprType {
    fn from(ty: Type) -> Self {
        Self::Value(ty)
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(ty) => write!(f, "{}", ty),
            Self::Operator => write!(f, "operator"),
        }
    }
}
