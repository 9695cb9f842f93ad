//! Parser for C-minus
//!
//! Recursive descent, one method per grammar production. A production returns
//! `Ok(Some(node))` when it matched, `Ok(None)` when it did not (and the token
//! stream is back where it started), or `Err` once the input has committed to
//! a construct that then turns out to be malformed.
//!
//! Nodes are built as local values and only handed to a parent after the whole
//! production succeeded, so a failed alternative never leaves fragments behind.

use crate::frontend::ast::{AstNode, Tag};
use crate::frontend::lexer::{Cursor, Lexer};
use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Error, Result};

type PResult = Result<Option<AstNode>>;
type Production = fn(&mut Parser) -> PResult;

const TYPE_NAMES: &[&str] = &["int", "bool", "char", "string"];
const ASSIGN_OPS: &[&str] = &["=", "+=", "-=", "*=", "/="];
const REL_OPS: &[&str] = &["<=", "<", ">", ">=", "==", "!="];
const UNARY_OPS: &[&str] = &["-", "*", "?"];

/// Saved parser position: lexer cursor plus the current token
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mark {
    cursor: Cursor,
    current: Option<Token>,
}

/// The last `mutable` parsed, with where it started and ended.
///
/// `exp` tries `mutable assignop ...` before `simpleExp`, and both begin by
/// parsing the same `mutable`. Reusing it keeps nested indexes linear.
#[derive(Debug)]
struct MutableMemo {
    start: Mark,
    node: AstNode,
    end: Mark,
}

/// The parser
pub struct Parser {
    lexer: Lexer,
    current: Option<Token>,
    memo: Option<MutableMemo>,
}

impl Parser {
    /// Create a new parser from a lexer
    pub fn new(mut lexer: Lexer) -> Self {
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            memo: None,
        }
    }

    // ==================== Helper Methods ====================

    fn mark(&self) -> Mark {
        Mark {
            cursor: self.lexer.checkpoint(),
            current: self.current.clone(),
        }
    }

    fn reset(&mut self, mark: Mark) {
        self.lexer.restore(mark.cursor);
        self.current = mark.current;
    }

    /// Run one alternative, rolling back the stream if it does not match
    fn attempt(&mut self, alternative: impl FnOnce(&mut Self) -> PResult) -> PResult {
        let mark = self.mark();
        let result = alternative(self)?;
        if result.is_none() {
            self.reset(mark);
        }
        Ok(result)
    }

    /// Try alternatives in order, first match wins
    fn first_of(&mut self, alternatives: &[Production]) -> PResult {
        for alternative in alternatives {
            if let Some(node) = self.attempt(|p| alternative(p))? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    fn advance(&mut self) -> Option<Token> {
        let next = self.lexer.next_token();
        std::mem::replace(&mut self.current, next)
    }

    /// Token `k` places ahead; 0 is the current token
    fn lookahead(&self, k: usize) -> Option<Token> {
        if k == 0 {
            self.current.clone()
        } else {
            self.lexer.peek(k)
        }
    }

    fn check(&self, pred: impl Fn(&Token) -> bool) -> bool {
        self.current.as_ref().map_or(false, pred)
    }

    fn eat(&mut self, pred: impl Fn(&Token) -> bool) -> Option<Token> {
        if self.check(pred) {
            self.advance()
        } else {
            None
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> Option<Token> {
        self.eat(|t| t.is_symbol(symbol))
    }

    fn eat_keyword(&mut self, word: &str) -> Option<Token> {
        self.eat(|t| t.is_keyword(word))
    }

    fn eat_identifier(&mut self) -> Option<Token> {
        self.eat(|t| t.kind == TokenKind::Identifier)
    }

    fn eat_operator(&mut self, ops: &[&str]) -> Option<Token> {
        self.eat(|t| t.kind == TokenKind::Operator && ops.contains(&t.lexeme.as_str()))
    }

    fn error(&self, expected: &str) -> Error {
        match &self.current {
            Some(token) => Error::Syntax {
                expected: expected.to_string(),
                got: format!("'{}'", token.lexeme),
                line: token.line,
            },
            None => Error::Syntax {
                expected: expected.to_string(),
                got: "end of input".to_string(),
                line: self.lexer.line(),
            },
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<Token> {
        self.eat_symbol(symbol)
            .ok_or_else(|| self.error(&format!("'{}'", symbol)))
    }

    fn expect_keyword(&mut self, word: &str) -> Result<Token> {
        self.eat_keyword(word)
            .ok_or_else(|| self.error(&format!("'{}'", word)))
    }

    fn expect_identifier(&mut self) -> Result<Token> {
        self.eat_identifier().ok_or_else(|| self.error("identifier"))
    }

    /// Run a production that must match at this point
    fn required(&mut self, production: Production, what: &str) -> Result<AstNode> {
        match production(self)? {
            Some(node) => Ok(node),
            None => Err(self.error(what)),
        }
    }

    fn at_type_spec(&self) -> bool {
        self.check(|t| t.kind == TokenKind::Keyword && TYPE_NAMES.contains(&t.lexeme.as_str()))
    }

    // ==================== Declarations ====================

    /// Parse a complete program
    pub fn parse_program(&mut self) -> Result<AstNode> {
        let mut program = AstNode::new(Tag::Program);

        while self.current.is_some() {
            match self.decl()? {
                Some(decl) => program.push(decl),
                None => return Err(self.error("declaration")),
            }
        }

        if program.children.is_empty() {
            return Err(self.error("declaration"));
        }

        log::debug!("parsed {} top-level declarations", program.children.len());
        Ok(program)
    }

    /// decl → varDecl | funDecl
    ///
    /// A `(` one token after the name marks a function.
    fn decl(&mut self) -> PResult {
        let name_offset = if self.at_type_spec() { 1 } else { 0 };
        let is_function = matches!(
            (self.lookahead(name_offset), self.lookahead(name_offset + 1)),
            (Some(name), Some(paren)) if name.kind == TokenKind::Identifier && paren.is_symbol("(")
        );

        if is_function {
            self.fun_decl()
        } else if self.at_type_spec() {
            self.var_decl()
        } else {
            Ok(None)
        }
    }

    /// varDecl → typeSpec varDeclList ;
    fn var_decl(&mut self) -> PResult {
        self.attempt(|p| {
            let Some(type_spec) = p.type_spec() else {
                return Ok(None);
            };
            let mut node = AstNode::new(Tag::VarDecl).child_node(type_spec);
            p.var_decl_list(&mut node)?;
            Ok(Some(node))
        })
    }

    /// scopedVarDecl → [static] typeSpec varDeclList ;
    fn scoped_var_decl(&mut self) -> PResult {
        self.attempt(|p| {
            let mut node = AstNode::new(Tag::VarDecl);
            if let Some(token) = p.eat_keyword("static") {
                node.push(AstNode::with_token(Tag::Static, token));
                if !p.at_type_spec() {
                    return Err(p.error("type name"));
                }
            }
            let Some(type_spec) = p.type_spec() else {
                return Ok(None);
            };
            node.push(type_spec);
            p.var_decl_list(&mut node)?;
            Ok(Some(node))
        })
    }

    /// varDeclList → varDeclInit { , varDeclInit } ;
    fn var_decl_list(&mut self, decl: &mut AstNode) -> Result<()> {
        loop {
            decl.push(self.var_decl_init()?);
            if self.eat_symbol(",").is_none() {
                break;
            }
        }
        self.expect_symbol(";")?;
        Ok(())
    }

    /// varDeclInit → varDeclId [ : simpleExp ]
    fn var_decl_init(&mut self) -> Result<AstNode> {
        let mut node = AstNode::new(Tag::VarDeclInit).child_node(self.var_decl_id()?);
        if self.eat_symbol(":").is_some() {
            node.push(self.required(Self::simple_exp, "initializer expression")?);
        }
        Ok(node)
    }

    /// varDeclId → ID | ID [ NUMCONST ]
    fn var_decl_id(&mut self) -> Result<AstNode> {
        let mut node = AstNode::with_token(Tag::VarDeclId, self.expect_identifier()?);
        if self.eat_symbol("[").is_some() {
            let length = self
                .eat(|t| t.kind == TokenKind::NumConst)
                .ok_or_else(|| self.error("array length"))?;
            node.push(AstNode::with_token(Tag::Constant, length));
            self.expect_symbol("]")?;
        }
        Ok(node)
    }

    /// typeSpec → int | bool | char | string
    fn type_spec(&mut self) -> Option<AstNode> {
        if self.at_type_spec() {
            self.advance().map(|t| AstNode::with_token(Tag::TypeSpec, t))
        } else {
            None
        }
    }

    /// funDecl → [typeSpec] ID ( parms ) compoundStmt
    fn fun_decl(&mut self) -> PResult {
        self.attempt(|p| {
            let return_type = p.type_spec();
            let Some(name) = p.eat_identifier() else {
                return Ok(None);
            };
            if p.eat_symbol("(").is_none() {
                return Ok(None);
            }

            let mut node = AstNode::with_token(Tag::FunDecl, name);
            if let Some(return_type) = return_type {
                node.push(return_type);
            }
            node.push(p.parms()?);
            p.expect_symbol(")")?;
            node.push(p.required(Self::compound_stmt, "'{'")?);

            log::trace!("parsed function {}", node.lexeme().unwrap_or("?"));
            Ok(Some(node))
        })
    }

    /// parms → parmTypeList { ; parmTypeList } | ε
    fn parms(&mut self) -> Result<AstNode> {
        let mut node = AstNode::new(Tag::Parms);
        if self.check(|t| t.is_symbol(")")) {
            return Ok(node);
        }
        loop {
            node.push(self.parm_type_list()?);
            if self.eat_symbol(";").is_none() {
                break;
            }
        }
        Ok(node)
    }

    /// parmTypeList → typeSpec parmId { , parmId }
    fn parm_type_list(&mut self) -> Result<AstNode> {
        let type_spec = self.type_spec().ok_or_else(|| self.error("parameter type"))?;
        let mut node = AstNode::new(Tag::ParmTypeList).child_node(type_spec);
        loop {
            let mut parm = AstNode::with_token(Tag::ParmId, self.expect_identifier()?);
            if let Some(bracket) = self.eat_symbol("[") {
                self.expect_symbol("]")?;
                parm.push(AstNode::with_token(Tag::ArrayMarker, bracket));
            }
            node.push(parm);
            if self.eat_symbol(",").is_none() {
                break;
            }
        }
        Ok(node)
    }

    // ==================== Statements ====================

    /// stmt → expStmt | compoundStmt | selectStmt | iterStmt | returnStmt | breakStmt
    fn stmt(&mut self) -> PResult {
        self.first_of(&[
            Self::compound_stmt,
            Self::select_stmt,
            Self::while_stmt,
            Self::for_stmt,
            Self::return_stmt,
            Self::break_stmt,
            Self::exp_stmt,
        ])
    }

    /// compoundStmt → { localDecls stmtList }
    fn compound_stmt(&mut self) -> PResult {
        let Some(brace) = self.eat_symbol("{") else {
            return Ok(None);
        };
        let mut node = AstNode::with_token(Tag::CompoundStmt, brace);

        while let Some(decl) = self.scoped_var_decl()? {
            node.push(decl);
        }

        while self.eat_symbol("}").is_none() {
            if self.current.is_none() {
                return Err(self.error("'}'"));
            }
            node.push(self.required(Self::stmt, "statement")?);
        }

        Ok(Some(node))
    }

    /// expStmt → exp ; | ;
    fn exp_stmt(&mut self) -> PResult {
        if let Some(semi) = self.eat_symbol(";") {
            return Ok(Some(AstNode::with_token(Tag::ExpStmt, semi)));
        }
        let Some(exp) = self.exp()? else {
            return Ok(None);
        };
        let semi = self.expect_symbol(";")?;
        Ok(Some(AstNode::with_token(Tag::ExpStmt, semi).child_node(exp)))
    }

    /// selectStmt → if simpleExp then stmt [ else stmt ]
    fn select_stmt(&mut self) -> PResult {
        let Some(keyword) = self.eat_keyword("if") else {
            return Ok(None);
        };
        let cond = self.required(Self::simple_exp, "condition")?;
        self.expect_keyword("then")?;
        let then_branch = self.required(Self::stmt, "statement")?;

        let mut node = AstNode::with_token(Tag::IfStmt, keyword)
            .child_node(cond)
            .child_node(then_branch);
        if self.eat_keyword("else").is_some() {
            node.push(self.required(Self::stmt, "statement")?);
        }
        Ok(Some(node))
    }

    /// iterStmt → while simpleExp do stmt
    fn while_stmt(&mut self) -> PResult {
        let Some(keyword) = self.eat_keyword("while") else {
            return Ok(None);
        };
        let cond = self.required(Self::simple_exp, "condition")?;
        self.expect_keyword("do")?;
        let body = self.required(Self::stmt, "statement")?;
        Ok(Some(
            AstNode::with_token(Tag::WhileStmt, keyword)
                .child_node(cond)
                .child_node(body),
        ))
    }

    /// iterStmt → for ID = iterRange do stmt
    fn for_stmt(&mut self) -> PResult {
        if self.eat_keyword("for").is_none() {
            return Ok(None);
        }
        let var = self.expect_identifier()?;
        self.eat_operator(&["="]).ok_or_else(|| self.error("'='"))?;

        let mut range = AstNode::new(Tag::IterRange)
            .child_node(self.required(Self::simple_exp, "range start")?);
        if self.eat_keyword("to").is_some() {
            range.push(self.required(Self::simple_exp, "range end")?);
            if self.eat_keyword("by").is_some() {
                range.push(self.required(Self::simple_exp, "range step")?);
            }
        }

        self.expect_keyword("do")?;
        let body = self.required(Self::stmt, "statement")?;
        Ok(Some(
            AstNode::with_token(Tag::ForStmt, var)
                .child_node(range)
                .child_node(body),
        ))
    }

    /// returnStmt → return [ exp ] ;
    fn return_stmt(&mut self) -> PResult {
        let Some(keyword) = self.eat_keyword("return") else {
            return Ok(None);
        };
        let mut node = AstNode::with_token(Tag::ReturnStmt, keyword);
        if self.eat_symbol(";").is_none() {
            node.push(self.required(Self::exp, "expression")?);
            self.expect_symbol(";")?;
        }
        Ok(Some(node))
    }

    /// breakStmt → break ;
    fn break_stmt(&mut self) -> PResult {
        let Some(keyword) = self.eat_keyword("break") else {
            return Ok(None);
        };
        self.expect_symbol(";")?;
        Ok(Some(AstNode::with_token(Tag::BreakStmt, keyword)))
    }

    // ==================== Expressions ====================

    /// exp → mutable assignop exp | mutable ++ | mutable -- | simpleExp
    fn exp(&mut self) -> PResult {
        self.first_of(&[Self::assignment, Self::simple_exp])
    }

    fn assignment(&mut self) -> PResult {
        self.attempt(|p| {
            let Some(target) = p.mutable()? else {
                return Ok(None);
            };
            if let Some(op) = p.eat_operator(ASSIGN_OPS) {
                let value = p.required(Self::exp, "expression")?;
                return Ok(Some(
                    AstNode::with_token(Tag::Assign, op)
                        .child_node(target)
                        .child_node(value),
                ));
            }
            if let Some(op) = p.eat_operator(&["++", "--"]) {
                return Ok(Some(AstNode::with_token(Tag::IncDec, op).child_node(target)));
            }
            Ok(None)
        })
    }

    /// Left-associative chain: operand { op operand }
    fn chain(&mut self, tag: Tag, operand: Production, is_op: fn(&Token) -> bool) -> PResult {
        self.attempt(|p| {
            let Some(first) = operand(p)? else {
                return Ok(None);
            };
            let mut node = AstNode::new(tag).child_node(first);
            while let Some(op) = p.eat(is_op) {
                let what = format!("operand after '{}'", op.lexeme);
                node.push(AstNode::with_token(Tag::Operator, op));
                node.push(p.required(operand, &what)?);
            }
            Ok(Some(collapse(node)))
        })
    }

    /// simpleExp → andExp { or andExp }
    fn simple_exp(&mut self) -> PResult {
        self.chain(Tag::SimpleExp, Self::and_exp, |t| {
            t.is_keyword("or") || t.is_operator("||")
        })
    }

    /// andExp → unaryRelExp { and unaryRelExp }
    fn and_exp(&mut self) -> PResult {
        self.chain(Tag::AndExp, Self::unary_rel_exp, |t| {
            t.is_keyword("and") || t.is_operator("&&")
        })
    }

    /// unaryRelExp → not unaryRelExp | relExp
    fn unary_rel_exp(&mut self) -> PResult {
        let Some(not) = self.eat(|t| t.is_keyword("not") || t.is_operator("!")) else {
            return self.rel_exp();
        };
        let operand = self.required(Self::unary_rel_exp, "operand after 'not'")?;
        Ok(Some(AstNode::with_token(Tag::NotExp, not).child_node(operand)))
    }

    /// relExp → minmaxExp [ relop minmaxExp ]
    fn rel_exp(&mut self) -> PResult {
        self.attempt(|p| {
            let Some(lhs) = p.minmax_exp()? else {
                return Ok(None);
            };
            let Some(op) = p.eat_operator(REL_OPS) else {
                return Ok(Some(lhs));
            };
            let what = format!("operand after '{}'", op.lexeme);
            let rhs = p.required(Self::minmax_exp, &what)?;
            Ok(Some(
                AstNode::new(Tag::RelExp)
                    .child_node(lhs)
                    .child_node(AstNode::with_token(Tag::Operator, op))
                    .child_node(rhs),
            ))
        })
    }

    /// minmaxExp → sumExp { (:>: | :<:) sumExp }
    fn minmax_exp(&mut self) -> PResult {
        self.chain(Tag::MinMaxExp, Self::sum_exp, |t| {
            t.is_operator(":>:") || t.is_operator(":<:")
        })
    }

    /// sumExp → mulExp { (+ | -) mulExp }
    fn sum_exp(&mut self) -> PResult {
        self.chain(Tag::SumExp, Self::mul_exp, |t| {
            t.is_operator("+") || t.is_operator("-")
        })
    }

    /// mulExp → unaryExp { (* | / | %) unaryExp }
    fn mul_exp(&mut self) -> PResult {
        self.chain(Tag::MulExp, Self::unary_exp, |t| {
            t.is_operator("*") || t.is_operator("/") || t.is_operator("%")
        })
    }

    /// unaryExp → unaryop unaryExp | factor
    fn unary_exp(&mut self) -> PResult {
        let Some(op) = self.eat_operator(UNARY_OPS) else {
            return self.factor();
        };
        let what = format!("operand after '{}'", op.lexeme);
        let operand = self.required(Self::unary_exp, &what)?;
        Ok(Some(AstNode::with_token(Tag::UnaryExp, op).child_node(operand)))
    }

    /// factor → ( exp ) | call | constant | mutable
    fn factor(&mut self) -> PResult {
        self.first_of(&[Self::paren, Self::call, Self::constant, Self::mutable])
    }

    fn paren(&mut self) -> PResult {
        let Some(open) = self.eat_symbol("(") else {
            return Ok(None);
        };
        let inner = self.required(Self::exp, "expression")?;
        self.expect_symbol(")")?;
        Ok(Some(AstNode::with_token(Tag::Paren, open).child_node(inner)))
    }

    /// call → ID ( args )
    fn call(&mut self) -> PResult {
        let is_call = matches!(
            (self.lookahead(0), self.lookahead(1)),
            (Some(name), Some(paren)) if name.kind == TokenKind::Identifier && paren.is_symbol("(")
        );
        if !is_call {
            return Ok(None);
        }

        let name = self.expect_identifier()?;
        self.expect_symbol("(")?;
        let mut node = AstNode::with_token(Tag::Call, name);
        if self.eat_symbol(")").is_none() {
            loop {
                node.push(self.required(Self::exp, "argument")?);
                if self.eat_symbol(",").is_none() {
                    break;
                }
            }
            self.expect_symbol(")")?;
        }
        Ok(Some(node))
    }

    /// constant → NUMCONST | CHARCONST | STRINGCONST | true | false
    fn constant(&mut self) -> PResult {
        Ok(self
            .eat(|t| {
                matches!(
                    t.kind,
                    TokenKind::NumConst | TokenKind::CharConst | TokenKind::StringConst
                ) || t.is_keyword("true")
                    || t.is_keyword("false")
            })
            .map(|t| AstNode::with_token(Tag::Constant, t)))
    }

    /// mutable → ID | ID [ exp ]
    fn mutable(&mut self) -> PResult {
        let start = self.mark();
        if self.memo.as_ref().map_or(false, |memo| memo.start == start) {
            if let Some(memo) = self.memo.take() {
                self.reset(memo.end);
                return Ok(Some(memo.node));
            }
        }

        let Some(name) = self.eat_identifier() else {
            return Ok(None);
        };
        let mut node = AstNode::with_token(Tag::Mutable, name);
        if self.eat_symbol("[").is_some() {
            node.push(self.required(Self::exp, "index expression")?);
            self.expect_symbol("]")?;
        }
        self.memo = Some(MutableMemo {
            start,
            node: node.clone(),
            end: self.mark(),
        });
        Ok(Some(node))
    }
}

/// A chain node with a single operand is just that operand
fn collapse(mut node: AstNode) -> AstNode {
    if node.children.len() == 1 {
        node.children.remove(0)
    } else {
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Result<AstNode> {
        Parser::new(Lexer::new(source)).parse_program()
    }

    fn parse_with(source: &str, production: Production) -> PResult {
        production(&mut Parser::new(Lexer::new(source)))
    }

    fn tags(node: &AstNode) -> Vec<Tag> {
        node.children.iter().map(|c| c.tag).collect()
    }

    #[test]
    fn test_function_and_variable_declarations() {
        let program = parse("int g; int main() { return g; } void_fn(int a; bool b, c[]) { }").unwrap();
        assert_eq!(tags(&program), vec![Tag::VarDecl, Tag::FunDecl, Tag::FunDecl]);

        let void_fn = &program.children[2];
        assert_eq!(void_fn.lexeme().unwrap(), "void_fn");
        assert_eq!(tags(void_fn), vec![Tag::Parms, Tag::CompoundStmt]);
        let parms = &void_fn.children[0];
        assert_eq!(parms.children.len(), 2);
        assert_eq!(tags(&parms.children[1]), vec![Tag::TypeSpec, Tag::ParmId, Tag::ParmId]);
        assert_eq!(tags(&parms.children[1].children[2]), vec![Tag::ArrayMarker]);
    }

    #[test]
    fn test_var_decl_list_with_array_and_initializer() {
        let program = parse("int a[10] : 0, b, c : 1 + 2;").unwrap();
        let decl = &program.children[0];
        assert_eq!(tags(decl), vec![Tag::TypeSpec, Tag::VarDeclInit, Tag::VarDeclInit, Tag::VarDeclInit]);
        assert_eq!(tags(&decl.children[1]), vec![Tag::VarDeclId, Tag::Constant]);
        assert_eq!(tags(&decl.children[1].children[0]), vec![Tag::Constant]);
        assert_eq!(decl.children[3].children[1].tag, Tag::SumExp);
    }

    #[test]
    fn test_precedence_shape() {
        let node = parse_with("2 + 3 * 4", Parser::simple_exp).unwrap().unwrap();
        assert_eq!(node.tag, Tag::SumExp);
        assert_eq!(tags(&node), vec![Tag::Constant, Tag::Operator, Tag::MulExp]);

        let node = parse_with("not a < b and c", Parser::simple_exp).unwrap().unwrap();
        assert_eq!(node.tag, Tag::AndExp);
        assert_eq!(tags(&node), vec![Tag::NotExp, Tag::Operator, Tag::Mutable]);
        assert_eq!(node.children[0].children[0].tag, Tag::RelExp);
    }

    #[test]
    fn test_single_operand_chains_collapse() {
        let node = parse_with("x", Parser::simple_exp).unwrap().unwrap();
        assert_eq!(node.tag, Tag::Mutable);
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_assignment_versus_simple_expression() {
        let assign = parse_with("a[i] += f(1, b)", Parser::exp).unwrap().unwrap();
        assert_eq!(assign.tag, Tag::Assign);
        assert_eq!(assign.lexeme().unwrap(), "+=");
        assert_eq!(tags(&assign), vec![Tag::Mutable, Tag::Call]);

        let compare = parse_with("a == b", Parser::exp).unwrap().unwrap();
        assert_eq!(compare.tag, Tag::RelExp);

        let inc = parse_with("n++", Parser::exp).unwrap().unwrap();
        assert_eq!(inc.tag, Tag::IncDec);
    }

    #[test]
    fn test_unary_operators() {
        let node = parse_with("- *a + ?6", Parser::simple_exp).unwrap().unwrap();
        assert_eq!(node.tag, Tag::SumExp);
        let neg = &node.children[0];
        assert_eq!((neg.tag, neg.lexeme().unwrap()), (Tag::UnaryExp, "-"));
        assert_eq!(neg.children[0].lexeme().unwrap(), "*");
    }

    #[test]
    fn test_statements() {
        let program = parse(
            "main() { int i; static bool done;
               if i < 3 then i = 1; else { i = 2; }
               while not done do done = true;
               for i = 1 to 10 by 2 do ;
               for i = 0 do break;
               return; }",
        )
        .unwrap();
        let body = program.children[0].find(Tag::CompoundStmt).unwrap();
        assert_eq!(
            tags(body),
            vec![
                Tag::VarDecl,
                Tag::VarDecl,
                Tag::IfStmt,
                Tag::WhileStmt,
                Tag::ForStmt,
                Tag::ForStmt,
                Tag::ReturnStmt,
            ]
        );
        assert_eq!(tags(&body.children[1]), vec![Tag::Static, Tag::TypeSpec, Tag::VarDeclInit]);
        assert_eq!(body.children[4].children[0].children.len(), 3);
        assert_eq!(body.children[5].children[0].children.len(), 1);
    }

    #[test]
    fn test_relational_is_not_associative() {
        let err = parse("main() { a < b < c; }").unwrap_err();
        assert!(matches!(err, Error::Syntax { ref expected, .. } if expected == "';'"));
    }

    #[test]
    fn test_unmatched_paren_reports_line() {
        let err = parse("main() {\n  x = (1 + 2;\n}").unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(matches!(err, Error::Syntax { ref expected, .. } if expected == "')'"));
    }

    #[test]
    fn test_missing_brace_at_end_of_input() {
        let err = parse("main() { return;").unwrap_err();
        assert!(matches!(err, Error::Syntax { ref got, .. } if got == "end of input"));
    }

    #[test]
    fn test_bad_token_is_rejected() {
        assert!(parse("int x @;").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_nested_indexes_parse_in_linear_time() {
        let depth = 40;
        let source = format!("{}0{}", "a[".repeat(depth), "]".repeat(depth));

        let started = std::time::Instant::now();
        let mut node = parse_with(&source, Parser::exp).unwrap().unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        for _ in 0..depth {
            assert_eq!(node.tag, Tag::Mutable);
            node = node.children[0].clone();
        }
        assert_eq!(node.tag, Tag::Constant);
    }

    #[test]
    fn test_reused_mutable_still_takes_assignment() {
        let node = parse_with("a[a[0]] = a[1] + a[a[2]]", Parser::exp).unwrap().unwrap();
        assert_eq!(node.tag, Tag::Assign);
        assert_eq!(tags(&node), vec![Tag::Mutable, Tag::SumExp]);
        assert_eq!(node.children[0].children[0].tag, Tag::Mutable);
    }

    #[test]
    fn test_failed_alternatives_roll_back() {
        const VOCAB: &[&str] = &[
            "x", "f", "(", ")", "[", "]", "1", "'c'", "\"s\"", "true", "+", "-", "*", "?",
            "=", "+=", "++", "<", "and", "or", "not", ":>:", ",", ";", "{", "}", "int", "@",
        ];
        let productions: &[Production] = &[
            Parser::exp,
            Parser::simple_exp,
            Parser::rel_exp,
            Parser::sum_exp,
            Parser::factor,
            Parser::call,
            Parser::mutable,
            Parser::assignment,
            Parser::stmt,
            Parser::decl,
        ];

        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..400 {
            let mut words = Vec::new();
            for _ in 0..6 {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                words.push(VOCAB[(seed >> 33) as usize % VOCAB.len()]);
            }
            let source = words.join(" ");

            for production in productions {
                let mut parser = Parser::new(Lexer::new(&source));
                let before = parser.mark();
                if let Ok(None) = production(&mut parser) {
                    assert_eq!(parser.mark(), before, "rollback failed on {:?}", source);
                }
            }
        }
    }
}
