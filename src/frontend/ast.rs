//! Abstract Syntax Tree for C-minus
//!
//! The tree is generic: every node is a grammar [`Tag`], an optional token and
//! an ordered list of owned children. The tag fixes the shape of the children,
//! and the parser and the code generator both rely on this table:
//!
//! | Tag             | token          | children                                              |
//! |-----------------|----------------|-------------------------------------------------------|
//! | `Program`       | -              | `VarDecl` / `FunDecl`, one or more                    |
//! | `VarDecl`       | -              | [`Static`], `TypeSpec`, `VarDeclInit`+                |
//! | `Static`        | `static`       | -                                                     |
//! | `TypeSpec`      | type keyword   | -                                                     |
//! | `VarDeclInit`   | -              | `VarDeclId`, [initializer expression]                 |
//! | `VarDeclId`     | ID             | [`Constant` array length]                             |
//! | `FunDecl`       | ID             | [`TypeSpec`], `Parms`, `CompoundStmt`                 |
//! | `Parms`         | -              | `ParmTypeList`*                                       |
//! | `ParmTypeList`  | -              | `TypeSpec`, `ParmId`+                                 |
//! | `ParmId`        | ID             | [`ArrayMarker`]                                       |
//! | `CompoundStmt`  | `{`            | `VarDecl`*, statements*                               |
//! | `ExpStmt`       | `;`            | [expression]                                          |
//! | `IfStmt`        | `if`           | condition, then, [else]                               |
//! | `WhileStmt`     | `while`        | condition, body                                       |
//! | `ForStmt`       | ID             | `IterRange`, body                                     |
//! | `IterRange`     | -              | start, [end, [step]]                                  |
//! | `ReturnStmt`    | `return`       | [expression]                                          |
//! | `BreakStmt`     | `break`        | -                                                     |
//! | `Assign`        | assign op      | `Mutable`, expression                                 |
//! | `IncDec`        | `++` / `--`    | `Mutable`                                             |
//! | `SimpleExp` `AndExp` `MinMaxExp` `SumExp` `MulExp` | - | operand, (`Operator`, operand)+ |
//! | `RelExp`        | -              | operand, `Operator`, operand                          |
//! | `NotExp`        | `not`          | operand                                               |
//! | `UnaryExp`      | unary op       | operand                                               |
//! | `Operator`      | operator       | -                                                     |
//! | `Paren`         | `(`            | expression                                            |
//! | `Call`          | ID             | argument expressions*                                 |
//! | `Constant`      | literal        | -                                                     |
//! | `Mutable`       | ID             | [index expression]                                    |
//!
//! Chain productions with a single operand are collapsed into that operand,
//! so e.g. a lone constant is never wrapped in a `SumExp`.

use std::fmt;

use crate::frontend::token::Token;
use crate::utils::{Error, Result};

/// Grammar production tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Program,
    VarDecl,
    Static,
    TypeSpec,
    VarDeclInit,
    VarDeclId,
    FunDecl,
    Parms,
    ParmTypeList,
    ParmId,
    ArrayMarker,
    CompoundStmt,
    ExpStmt,
    IfStmt,
    WhileStmt,
    ForStmt,
    IterRange,
    ReturnStmt,
    BreakStmt,
    Assign,
    IncDec,
    SimpleExp,
    AndExp,
    NotExp,
    RelExp,
    MinMaxExp,
    SumExp,
    MulExp,
    UnaryExp,
    Operator,
    Paren,
    Call,
    Constant,
    Mutable,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A node of the syntax tree. Children are owned; there is no sharing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    pub tag: Tag,
    pub token: Option<Token>,
    pub children: Vec<AstNode>,
}

impl AstNode {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            token: None,
            children: Vec::new(),
        }
    }

    pub fn with_token(tag: Tag, token: Token) -> Self {
        Self {
            tag,
            token: Some(token),
            children: Vec::new(),
        }
    }

    /// Builder-style child append
    pub fn child_node(mut self, child: AstNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: AstNode) {
        self.children.push(child);
    }

    /// The `i`th child, or a malformed-tree error
    pub fn child(&self, i: usize) -> Result<&AstNode> {
        self.children.get(i).ok_or_else(|| Error::MalformedTree {
            message: format!("{} has no child {}", self.tag, i),
            line: self.line(),
        })
    }

    /// The node's token lexeme, or a malformed-tree error
    pub fn lexeme(&self) -> Result<&str> {
        self.token
            .as_ref()
            .map(|t| t.lexeme.as_str())
            .ok_or_else(|| Error::MalformedTree {
                message: format!("{} carries no token", self.tag),
                line: self.line(),
            })
    }

    /// Best-known source line: own token first, then the first child that has one
    pub fn line(&self) -> usize {
        match &self.token {
            Some(token) => token.line,
            None => self.children.first().map_or(0, AstNode::line),
        }
    }

    /// First child with the given tag
    pub fn find(&self, tag: Tag) -> Option<&AstNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Number of nodes in this subtree
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(AstNode::size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::token::TokenKind;

    #[test]
    fn test_line_falls_back_to_children() {
        let id = AstNode::with_token(Tag::Mutable, Token::new(TokenKind::Identifier, "x", 4));
        let init = AstNode::new(Tag::VarDeclInit).child_node(id);
        assert_eq!(init.line(), 4);
        assert_eq!(init.size(), 2);
    }

    #[test]
    fn test_missing_child_is_an_error() {
        let node = AstNode::new(Tag::ReturnStmt);
        assert!(matches!(node.child(0), Err(Error::MalformedTree { .. })));
        assert!(node.lexeme().is_err());
    }
}
