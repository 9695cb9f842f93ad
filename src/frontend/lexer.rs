//! Lexer for C-minus
//!
//! Converts source text into a stream of tokens, one line at a time.
//! The whole scanning state lives in a copyable [`Cursor`], so lookahead and
//! parser rollback are just cursor copies.

use crate::frontend::token::{self, Token, TokenKind, OPERATORS, SPECIAL_SYMBOLS};

/// Position of the lexer in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    /// 0-based line index
    line: usize,
    /// Column within the line (in chars)
    col: usize,
    /// Inside a `/* ... */` comment that started on an earlier column or line
    in_block_comment: bool,
}

/// The lexer state
pub struct Lexer {
    lines: Vec<Vec<char>>,
    cursor: Cursor,
}

impl Lexer {
    /// Create a new lexer for the given source code
    pub fn new(source: &str) -> Self {
        Self {
            lines: source.lines().map(|l| l.chars().collect()).collect(),
            cursor: Cursor::default(),
        }
    }

    /// Get the next token, or `None` at end of input
    pub fn next_token(&mut self) -> Option<Token> {
        let mut cursor = self.cursor;
        let token = self.scan(&mut cursor);
        self.cursor = cursor;
        token
    }

    /// Look `k` tokens ahead (`peek(1)` is the token `next_token` would return)
    pub fn peek(&self, k: usize) -> Option<Token> {
        let mut cursor = self.cursor;
        let mut token = None;
        for _ in 0..k.max(1) {
            token = Some(self.scan(&mut cursor)?);
        }
        token
    }

    /// Save the current position
    pub fn checkpoint(&self) -> Cursor {
        self.cursor
    }

    /// Rewind (or fast-forward) to a saved position
    pub fn restore(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// 1-based line of the cursor, clamped to the last line
    pub fn line(&self) -> usize {
        self.cursor.line.min(self.lines.len().saturating_sub(1)) + 1
    }

    /// Tokenize the rest of the source
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token() {
            tokens.push(token);
        }
        tokens
    }

    // ==================== Scanning ====================

    /// Skip whitespace, blank lines and comments. Returns false at end of input.
    fn skip_trivia(&self, cursor: &mut Cursor) -> bool {
        loop {
            let Some(line) = self.lines.get(cursor.line) else {
                return false;
            };

            if cursor.in_block_comment {
                match find_pair(line, cursor.col, '*', '/') {
                    Some(end) => {
                        cursor.col = end + 2;
                        cursor.in_block_comment = false;
                    }
                    None => next_line(cursor),
                }
                continue;
            }

            while matches!(line.get(cursor.col), Some(' ' | '\t' | '\r')) {
                cursor.col += 1;
            }

            match (line.get(cursor.col), line.get(cursor.col + 1)) {
                (None, _) => next_line(cursor),
                (Some('/'), Some('/')) => next_line(cursor),
                (Some('/'), Some('*')) => {
                    cursor.col += 2;
                    cursor.in_block_comment = true;
                }
                _ => return true,
            }
        }
    }

    fn scan(&self, cursor: &mut Cursor) -> Option<Token> {
        if !self.skip_trivia(cursor) {
            return None;
        }

        let line = &self.lines[cursor.line];
        let start = cursor.col;
        let line_no = cursor.line + 1;
        let c = line[start];

        let (kind, len) = if c.is_ascii_alphabetic() || c == '_' {
            let len = run_length(line, start, |c| c.is_ascii_alphanumeric() || c == '_');
            let word: String = line[start..start + len].iter().collect();
            let kind = if token::is_keyword(&word) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            (kind, len)
        } else if c.is_ascii_digit() {
            (TokenKind::NumConst, number_length(line, start))
        } else if c == '\'' {
            match (line.get(start + 1), line.get(start + 2)) {
                (Some(&ch), Some('\'')) if ch != '\'' => (TokenKind::CharConst, 3),
                _ => (TokenKind::BadToken, 1),
            }
        } else if c == '"' {
            match line[start + 1..].iter().position(|&ch| ch == '"') {
                Some(offset) => (TokenKind::StringConst, offset + 2),
                None => (TokenKind::BadToken, 1),
            }
        } else if let Some(len) = match_operator(line, start, |op| op.len() > 1) {
            (TokenKind::Operator, len)
        } else if SPECIAL_SYMBOLS.contains(&c) {
            (TokenKind::SpecialSymbol, 1)
        } else if let Some(len) = match_operator(line, start, |op| op.len() == 1) {
            (TokenKind::Operator, len)
        } else {
            (TokenKind::BadToken, 1)
        };

        cursor.col = start + len;
        let lexeme: String = line[start..start + len].iter().collect();
        if kind == TokenKind::BadToken {
            log::trace!("bad token {:?} at line {}", lexeme, line_no);
        }
        Some(Token::new(kind, lexeme, line_no))
    }
}

fn next_line(cursor: &mut Cursor) {
    cursor.line += 1;
    cursor.col = 0;
}

fn run_length(line: &[char], start: usize, pred: impl Fn(char) -> bool) -> usize {
    line[start..].iter().take_while(|&&c| pred(c)).count()
}

/// `digit+ ('.' digit+)?`
fn number_length(line: &[char], start: usize) -> usize {
    let int_len = run_length(line, start, |c| c.is_ascii_digit());
    let dot = start + int_len;
    if line.get(dot) == Some(&'.') && line.get(dot + 1).map_or(false, |c| c.is_ascii_digit()) {
        int_len + 1 + run_length(line, dot + 1, |c| c.is_ascii_digit())
    } else {
        int_len
    }
}

fn match_operator(line: &[char], start: usize, filter: impl Fn(&str) -> bool) -> Option<usize> {
    OPERATORS
        .iter()
        .filter(|op| filter(op))
        .find(|op| {
            let len = op.chars().count();
            line.len() >= start + len && op.chars().eq(line[start..start + len].iter().copied())
        })
        .map(|op| op.chars().count())
}

fn find_pair(line: &[char], from: usize, a: char, b: char) -> Option<usize> {
    (from..line.len().saturating_sub(1)).find(|&i| line[i] == a && line[i + 1] == b)
}
