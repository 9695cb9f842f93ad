//! Token definitions for C-minus

use std::fmt;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    /// 1-based line the token starts on
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }

    /// Check kind and lexeme at once
    pub fn is(&self, kind: TokenKind, lexeme: &str) -> bool {
        self.kind == kind && self.lexeme == lexeme
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.is(TokenKind::Keyword, word)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.is(TokenKind::SpecialSymbol, symbol)
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.is(TokenKind::Operator, op)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.lexeme)
    }
}

/// Token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword,
    Identifier,
    /// Numeric constant (digits with an optional fraction)
    NumConst,
    /// Character constant ('x')
    CharConst,
    /// String literal, lexeme includes the quotes
    StringConst,
    Operator,
    SpecialSymbol,
    /// Unrecognized input, rejected by the parser
    BadToken,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Keyword => "keyword",
            TokenKind::Identifier => "identifier",
            TokenKind::NumConst => "number",
            TokenKind::CharConst => "character",
            TokenKind::StringConst => "string",
            TokenKind::Operator => "operator",
            TokenKind::SpecialSymbol => "symbol",
            TokenKind::BadToken => "bad token",
        };
        write!(f, "{}", s)
    }
}

/// Reserved words. `true` and `false` are here so they never lex as identifiers.
pub const KEYWORDS: &[&str] = &[
    "static", "int", "bool", "char", "string",
    "if", "then", "else", "while", "do", "for", "to", "by",
    "return", "break",
    "and", "or", "not",
    "true", "false",
];

/// Operators, longest first so that the first prefix match is the longest one
pub const OPERATORS: &[&str] = &[
    ":>:", ":<:",
    "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "++", "--", "&&", "||",
    "=", "<", ">", "+", "-", "*", "/", "%", "?", "!",
];

/// Single-character punctuation
pub const SPECIAL_SYMBOLS: &[char] = &['(', ')', '[', ']', '{', '}', ';', ',', ':'];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}
