//! Code Generator - AST to stack machine instructions
//!
//! Type checking and emission happen in one walk over the tree. Every
//! expression is generated into its own buffer together with its type, and
//! the buffer is only spliced into the enclosing code once that type has been
//! checked against the context.

use crate::frontend::ast::{AstNode, Tag};
use crate::frontend::semantic::{
    FunctionSignature, FunctionTable, ScopeChain, ScopeKind, StorageKind, Symbol,
};
use crate::frontend::token::TokenKind;
use crate::middle::ir::{CompiledFunction, Instruction, LabelId, ProgramImage};
use crate::types::{ExprType, Type};
use crate::utils::{Error, Result};

/// Code for one expression and the type it leaves on the stack
#[derive(Debug)]
struct Typed {
    ty: ExprType,
    code: Vec<Instruction>,
}

impl Typed {
    fn value(ty: Type, code: Vec<Instruction>) -> Self {
        Self {
            ty: ExprType::Value(ty),
            code,
        }
    }
}

/// Emission state of the function being generated
struct FunctionBuilder {
    code: Vec<Instruction>,
    return_type: Type,
    next_label: usize,
    /// Exit labels of the enclosing loops, innermost last
    loop_exits: Vec<LabelId>,
}

impl FunctionBuilder {
    fn new(return_type: Type) -> Self {
        Self {
            code: Vec::new(),
            return_type,
            next_label: 0,
            loop_exits: Vec::new(),
        }
    }

    fn new_label(&mut self) -> LabelId {
        self.next_label += 1;
        LabelId(self.next_label - 1)
    }

    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    fn append(&mut self, code: Vec<Instruction>) {
        self.code.extend(code);
    }
}

/// Assignable location: a variable, or an element when `index` is set
struct Target {
    storage: StorageKind,
    slot: usize,
    /// Type of the stored value (element type for `a[i]`)
    ty: Type,
    index: Option<Vec<Instruction>>,
}

/// Code generator
///
/// Owns the scope chain and the function table for one compilation unit.
pub struct CodeGenerator {
    scopes: ScopeChain,
    functions: FunctionTable,
    /// Static storage setup: file-scope declarations and `static` locals
    static_init: FunctionBuilder,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self {
            scopes: ScopeChain::new(),
            functions: FunctionTable::new(),
            static_init: FunctionBuilder::new(Type::Void),
        }
    }

    /// Generate a whole program
    pub fn generate(&mut self, program: &AstNode) -> Result<ProgramImage> {
        if program.tag != Tag::Program {
            return Err(malformed(program, "expected a program"));
        }

        // every signature first, so calls may go forward
        for decl in program.children.iter().filter(|d| d.tag == Tag::FunDecl) {
            self.register_function(decl)?;
        }

        let mut functions = Vec::new();
        for decl in &program.children {
            match decl.tag {
                Tag::VarDecl => self.with_static_init(|gen, init| gen.var_decl(init, decl))?,
                Tag::FunDecl => functions.push(self.compile_function(decl)?),
                other => return Err(malformed(decl, format!("{} is not a declaration", other))),
            }
        }

        let static_init =
            std::mem::replace(&mut self.static_init, FunctionBuilder::new(Type::Void)).code;
        log::debug!(
            "generated {} functions, {} static slots",
            functions.len(),
            self.scopes.static_types().len()
        );

        Ok(ProgramImage {
            functions,
            statics: self.scopes.static_types().to_vec(),
            static_init,
        })
    }

    /// Generate a single function declaration, registering it if needed
    pub fn generate_function(&mut self, decl: &AstNode) -> Result<(Vec<Instruction>, Type)> {
        if self.functions.lookup(decl.lexeme()?).is_none() {
            self.register_function(decl)?;
        }
        let compiled = self.compile_function(decl)?;
        Ok((compiled.instructions, compiled.signature.return_type))
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    // ==================== Declarations ====================

    fn register_function(&mut self, decl: &AstNode) -> Result<()> {
        let return_type = match decl.find(Tag::TypeSpec) {
            Some(spec) => type_of(spec)?,
            None => Type::Void,
        };
        let params = parameters(decl)?.into_iter().map(|(_, ty)| ty).collect();
        self.functions
            .declare_function(decl.lexeme()?, return_type, params, decl.line())?;
        Ok(())
    }

    fn compile_function(&mut self, decl: &AstNode) -> Result<CompiledFunction> {
        let name = decl.lexeme()?;
        let signature = self
            .functions
            .lookup(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_string(),
                line: decl.line(),
            })?;

        let scope = self.scopes.enter_scope(ScopeKind::Function);
        let result = self.function_body(&signature, decl);
        let locals = self.scopes.local_types().to_vec();
        self.scopes.exit_scope(scope);
        let instructions = result?;

        log::debug!(
            "generated {}: {} instructions, {} locals",
            name,
            instructions.len(),
            locals.len()
        );
        Ok(CompiledFunction {
            signature,
            locals,
            instructions,
        })
    }

    fn function_body(&mut self, signature: &FunctionSignature, decl: &AstNode) -> Result<Vec<Instruction>> {
        for (id, ty) in parameters(decl)? {
            self.scopes
                .declare(id.lexeme()?, ty, StorageKind::Arg, None, id.line())?;
        }

        let body = decl
            .find(Tag::CompoundStmt)
            .ok_or_else(|| malformed(decl, "function without body"))?;
        // top-level locals share the parameters' scope
        let mut f = FunctionBuilder::new(signature.return_type.clone());
        self.block_items(&mut f, body)?;

        if !matches!(f.code.last(), Some(Instruction::Return)) {
            if let Some(value) = default_value(&f.return_type) {
                f.emit(value);
            }
            f.emit(Instruction::Return);
        }
        Ok(f.code)
    }

    fn var_decl(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        let at_file_scope = self.scopes.depth() == 1;
        let storage = if at_file_scope || node.find(Tag::Static).is_some() {
            StorageKind::Static
        } else {
            StorageKind::Local
        };
        let base = type_of(
            node.find(Tag::TypeSpec)
                .ok_or_else(|| malformed(node, "declaration without type"))?,
        )?;

        for init in node.children.iter().filter(|c| c.tag == Tag::VarDeclInit) {
            self.var_decl_init(f, init, &base, storage, at_file_scope)?;
        }
        Ok(())
    }

    fn var_decl_init(
        &mut self,
        f: &mut FunctionBuilder,
        node: &AstNode,
        base: &Type,
        storage: StorageKind,
        at_file_scope: bool,
    ) -> Result<()> {
        let id = node.child(0)?;
        let name = id.lexeme()?;
        let length = id.children.first().map(array_length).transpose()?;
        let hoisted = storage == StorageKind::Static && !at_file_scope;

        // the name is not yet in scope inside its own initializer
        let init = match node.children.get(1) {
            Some(expr) => {
                let typed = self.expr(expr)?;
                expect_value(&typed.ty, base, expr.line())?;
                if hoisted && reads_frame(&typed.code) {
                    return Err(Error::StaticInitializer {
                        name: name.to_string(),
                        line: expr.line(),
                    });
                }
                Some(typed.code)
            }
            None => None,
        };

        let ty = match length {
            Some(_) => Type::array_of(base.clone()),
            None => base.clone(),
        };
        let slot = self
            .scopes
            .declare(name, ty, storage, length.map(|n| n as usize), id.line())?;

        // a static local is set up once, before any function runs
        if hoisted {
            self.with_static_init(|gen, init_f| {
                gen.initialize(init_f, storage, slot, base, length, init)
            })
        } else {
            self.initialize(f, storage, slot, base, length, init)
        }
    }

    fn initialize(
        &mut self,
        f: &mut FunctionBuilder,
        storage: StorageKind,
        slot: usize,
        base: &Type,
        length: Option<i32>,
        init: Option<Vec<Instruction>>,
    ) -> Result<()> {
        let Some(length) = length else {
            if let Some(code) = init {
                f.append(code);
                f.emit(Instruction::store(storage, slot));
            }
            return Ok(());
        };

        f.append(vec![
            Instruction::PushInt(length),
            Instruction::NewArray(base.clone()),
            Instruction::store(storage, slot),
        ]);
        if let Some(code) = init {
            self.fill_array(f, storage, slot, base, length, code);
        }
        Ok(())
    }

    /// Store one value, evaluated once, at every index of an array
    fn fill_array(
        &mut self,
        f: &mut FunctionBuilder,
        storage: StorageKind,
        slot: usize,
        base: &Type,
        length: i32,
        value: Vec<Instruction>,
    ) {
        let mut temp = |ty: Type| match storage {
            StorageKind::Static => (StorageKind::Static, self.scopes.reserve_static(ty)),
            _ => self.scopes.reserve_temp(ty),
        };
        let (value_storage, value_slot) = temp(base.clone());
        let (index_storage, index_slot) = temp(Type::Int);
        let load_index = Instruction::load(index_storage, index_slot);
        let store_index = Instruction::store(index_storage, index_slot);

        f.append(value);
        f.emit(Instruction::store(value_storage, value_slot));
        f.append(vec![Instruction::PushInt(0), store_index.clone()]);

        let (body, test) = (f.new_label(), f.new_label());
        f.emit(Instruction::Jump(test));
        f.emit(Instruction::Label(body));
        f.append(vec![
            Instruction::load(storage, slot),
            load_index.clone(),
            Instruction::load(value_storage, value_slot),
            Instruction::StoreElem(base.clone()),
            load_index.clone(),
            Instruction::PushInt(1),
            Instruction::Add,
            store_index,
        ]);
        f.emit(Instruction::Label(test));
        f.append(vec![
            load_index,
            Instruction::PushInt(length),
            Instruction::Lt,
            Instruction::JumpIfTrue(body),
        ]);
    }

    /// Run `emit` against the static initializer
    fn with_static_init<T>(
        &mut self,
        emit: impl FnOnce(&mut Self, &mut FunctionBuilder) -> Result<T>,
    ) -> Result<T> {
        let mut init = std::mem::replace(&mut self.static_init, FunctionBuilder::new(Type::Void));
        let result = emit(self, &mut init);
        self.static_init = init;
        result
    }

    // ==================== Statements ====================

    fn stmt(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        match node.tag {
            Tag::CompoundStmt => self.compound_stmt(f, node),
            Tag::ExpStmt => self.exp_stmt(f, node),
            Tag::IfStmt => self.if_stmt(f, node),
            Tag::WhileStmt => self.while_stmt(f, node),
            Tag::ForStmt => self.for_stmt(f, node),
            Tag::ReturnStmt => self.return_stmt(f, node),
            Tag::BreakStmt => {
                let exit = f
                    .loop_exits
                    .last()
                    .copied()
                    .ok_or(Error::BreakOutsideLoop { line: node.line() })?;
                f.emit(Instruction::Jump(exit));
                Ok(())
            }
            other => Err(malformed(node, format!("{} is not a statement", other))),
        }
    }

    fn compound_stmt(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        let scope = self.scopes.enter_scope(ScopeKind::Block);
        let result = self.block_items(f, node);
        self.scopes.exit_scope(scope);
        result
    }

    fn block_items(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        node.children.iter().try_for_each(|child| match child.tag {
            Tag::VarDecl => self.var_decl(f, child),
            _ => self.stmt(f, child),
        })
    }

    fn exp_stmt(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        let Some(expr) = node.children.first() else {
            return Ok(());
        };
        let typed = match expr.tag {
            Tag::Assign => self.assign(expr, false)?,
            Tag::IncDec => self.inc_dec(expr, false)?,
            _ => {
                let typed = self.expr(expr)?;
                let discard = matches!(&typed.ty, ExprType::Value(ty) if *ty != Type::Void);
                f.append(typed.code);
                if discard {
                    f.emit(Instruction::Pop);
                }
                return Ok(());
            }
        };
        f.append(typed.code);
        Ok(())
    }

    fn if_stmt(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        let condition = self.condition(node.child(0)?)?;
        let then_branch = node.child(1)?;
        let else_branch = node.children.get(2);

        let else_label = else_branch.map(|_| f.new_label());
        let end = f.new_label();

        f.append(condition);
        f.emit(Instruction::JumpIfFalse(else_label.unwrap_or(end)));
        self.stmt(f, then_branch)?;
        if let (Some(else_branch), Some(else_label)) = (else_branch, else_label) {
            f.emit(Instruction::Jump(end));
            f.emit(Instruction::Label(else_label));
            self.stmt(f, else_branch)?;
        }
        f.emit(Instruction::Label(end));
        Ok(())
    }

    /// jump to test, body, test, branch back
    fn while_stmt(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        let condition = self.condition(node.child(0)?)?;
        let (body, test, exit) = (f.new_label(), f.new_label(), f.new_label());

        f.emit(Instruction::Jump(test));
        f.emit(Instruction::Label(body));
        self.loop_body(f, node.child(1)?, exit)?;
        f.emit(Instruction::Label(test));
        f.append(condition);
        f.emit(Instruction::JumpIfTrue(body));
        f.emit(Instruction::Label(exit));
        Ok(())
    }

    /// `for i = start [to end [by step]] do body`
    ///
    /// Bound and step are evaluated once, before the first test. Without
    /// `to` the bound is the start value.
    fn for_stmt(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        let induction = self.lookup(node)?;
        if induction.ty != Type::Int {
            return Err(Error::mismatch(Type::Int, &induction.ty, node.line()));
        }

        let range = node.child(0)?;
        let start = self.int_expr(range.child(0)?)?;
        let end = range.children.get(1).map(|e| self.int_expr(e)).transpose()?;
        let step = range.children.get(2).map(|e| self.int_expr(e)).transpose()?;

        let load_var = Instruction::load(induction.storage, induction.slot);
        let store_var = Instruction::store(induction.storage, induction.slot);

        let (bound_storage, bound) = self.scopes.reserve_temp(Type::Int);
        f.append(start);
        match end {
            Some(end) => {
                f.emit(store_var.clone());
                f.append(end);
                f.emit(Instruction::store(bound_storage, bound));
            }
            None => {
                f.emit(Instruction::Dup);
                f.emit(Instruction::store(bound_storage, bound));
                f.emit(store_var.clone());
            }
        }
        let load_step = match step {
            Some(step) => {
                let (step_storage, slot) = self.scopes.reserve_temp(Type::Int);
                f.append(step);
                f.emit(Instruction::store(step_storage, slot));
                Instruction::load(step_storage, slot)
            }
            None => Instruction::PushInt(1),
        };

        let (body, test, exit) = (f.new_label(), f.new_label(), f.new_label());
        f.emit(Instruction::Jump(test));
        f.emit(Instruction::Label(body));
        self.loop_body(f, node.child(1)?, exit)?;
        f.append(vec![load_var.clone(), load_step, Instruction::Add, store_var]);
        f.emit(Instruction::Label(test));
        f.append(vec![
            load_var,
            Instruction::load(bound_storage, bound),
            Instruction::Le,
            Instruction::JumpIfTrue(body),
        ]);
        f.emit(Instruction::Label(exit));
        Ok(())
    }

    fn loop_body(&mut self, f: &mut FunctionBuilder, body: &AstNode, exit: LabelId) -> Result<()> {
        f.loop_exits.push(exit);
        let result = self.stmt(f, body);
        f.loop_exits.pop();
        result
    }

    fn return_stmt(&mut self, f: &mut FunctionBuilder, node: &AstNode) -> Result<()> {
        match node.children.first() {
            Some(expr) => {
                let typed = self.expr(expr)?;
                expect_value(&typed.ty, &f.return_type, node.line())?;
                f.append(typed.code);
            }
            None if f.return_type != Type::Void => {
                return Err(Error::mismatch(&f.return_type, Type::Void, node.line()));
            }
            None => {}
        }
        f.emit(Instruction::Return);
        Ok(())
    }

    fn condition(&mut self, node: &AstNode) -> Result<Vec<Instruction>> {
        let typed = self.expr(node)?;
        expect_value(&typed.ty, &Type::Bool, node.line())?;
        Ok(typed.code)
    }

    // ==================== Expressions ====================

    fn expr(&mut self, node: &AstNode) -> Result<Typed> {
        match node.tag {
            Tag::Constant => constant(node),
            Tag::Mutable => self.mutable(node),
            Tag::Paren => self.expr(node.child(0)?),
            Tag::Call => self.call(node),
            Tag::Operator => Ok(Typed {
                ty: ExprType::Operator,
                code: Vec::new(),
            }),
            Tag::SimpleExp | Tag::AndExp => self.chain(node, Type::Bool),
            Tag::MinMaxExp | Tag::SumExp | Tag::MulExp => self.chain(node, Type::Int),
            Tag::RelExp => self.rel_exp(node),
            Tag::NotExp => {
                let mut operand = self.expr(node.child(0)?)?;
                expect_value(&operand.ty, &Type::Bool, node.line())?;
                operand.code.push(Instruction::Not);
                Ok(Typed::value(Type::Bool, operand.code))
            }
            Tag::UnaryExp => self.unary_exp(node),
            Tag::Assign => self.assign(node, true),
            Tag::IncDec => self.inc_dec(node, true),
            other => Err(malformed(node, format!("{} is not an expression", other))),
        }
    }

    fn int_expr(&mut self, node: &AstNode) -> Result<Vec<Instruction>> {
        let typed = self.expr(node)?;
        expect_value(&typed.ty, &Type::Int, node.line())?;
        Ok(typed.code)
    }

    /// Left fold of `operand (Operator operand)*`, all of type `required`
    fn chain(&mut self, node: &AstNode, required: Type) -> Result<Typed> {
        let first = self.expr(node.child(0)?)?;
        expect_value(&first.ty, &required, node.line())?;

        let mut code = first.code;
        let mut pending = None;
        for child in node.children.iter().skip(1) {
            let operand = self.expr(child)?;
            if !operand.ty.matches(&required) {
                return Err(Error::mismatch(&required, &operand.ty, child.line()));
            }
            match operand.ty {
                ExprType::Operator => pending = Some(binary_op(child)?),
                ExprType::Value(_) => {
                    let op = pending
                        .take()
                        .ok_or_else(|| malformed(child, "operand without operator"))?;
                    code.extend(operand.code);
                    code.push(op);
                }
            }
        }
        Ok(Typed::value(required, code))
    }

    fn rel_exp(&mut self, node: &AstNode) -> Result<Typed> {
        let lhs = self.expr(node.child(0)?)?;
        let op_node = node.child(1)?;
        let op = binary_op(op_node)?;
        let rhs = self.expr(node.child(2)?)?;
        let line = op_node.line();

        let equality = matches!(op, Instruction::Eq | Instruction::Ne);
        match lhs.ty.value() {
            Some(ty) if equality && ty.is_scalar() => {}
            Some(ty) if ty.is_ordered() => {}
            _ if equality => return Err(Error::mismatch("scalar", &lhs.ty, line)),
            _ => return Err(Error::mismatch("int or char", &lhs.ty, line)),
        }
        if rhs.ty != lhs.ty {
            return Err(Error::mismatch(&lhs.ty, &rhs.ty, line));
        }

        let mut code = lhs.code;
        code.extend(rhs.code);
        code.push(op);
        Ok(Typed::value(Type::Bool, code))
    }

    fn unary_exp(&mut self, node: &AstNode) -> Result<Typed> {
        let mut operand = self.expr(node.child(0)?)?;
        let line = node.line();
        let op = match node.lexeme()? {
            "-" => {
                expect_value(&operand.ty, &Type::Int, line)?;
                Instruction::Neg
            }
            "?" => {
                expect_value(&operand.ty, &Type::Int, line)?;
                Instruction::Random
            }
            "*" => match operand.ty.value() {
                Some(ty) if ty.is_array() => Instruction::Length,
                _ => return Err(Error::mismatch("array", &operand.ty, line)),
            },
            other => return Err(malformed(node, format!("unknown unary operator '{}'", other))),
        };
        operand.code.push(op);
        Ok(Typed::value(Type::Int, operand.code))
    }

    fn mutable(&mut self, node: &AstNode) -> Result<Typed> {
        let symbol = self.lookup(node)?;
        let mut code = vec![Instruction::load(symbol.storage, symbol.slot)];
        let Some(index) = node.children.first() else {
            return Ok(Typed::value(symbol.ty, code));
        };

        let elem = element_type(&symbol, node.line())?;
        code.extend(self.int_expr(index)?);
        code.push(Instruction::LoadElem(elem.clone()));
        Ok(Typed::value(elem, code))
    }

    fn assign(&mut self, node: &AstNode, keep: bool) -> Result<Typed> {
        let target = self.target(node.child(0)?)?;
        let value = self.expr(node.child(1)?)?;
        let line = node.line();
        expect_value(&value.ty, &target.ty, line)?;

        let op = match node.lexeme()? {
            "=" => None,
            "+=" => Some(Instruction::Add),
            "-=" => Some(Instruction::Sub),
            "*=" => Some(Instruction::Mul),
            "/=" => Some(Instruction::Div),
            other => return Err(malformed(node, format!("unknown assignment '{}'", other))),
        };
        if op.is_some() && target.ty != Type::Int {
            return Err(Error::mismatch(Type::Int, &target.ty, line));
        }

        let ty = target.ty.clone();
        let code = self.store_into(target, value.code, op, keep);
        Ok(Typed::value(ty, code))
    }

    fn inc_dec(&mut self, node: &AstNode, keep: bool) -> Result<Typed> {
        let target = self.target(node.child(0)?)?;
        if target.ty != Type::Int {
            return Err(Error::mismatch(Type::Int, &target.ty, node.line()));
        }
        let op = match node.lexeme()? {
            "++" => Instruction::Add,
            "--" => Instruction::Sub,
            other => return Err(malformed(node, format!("unknown operator '{}'", other))),
        };
        let code = self.store_into(target, vec![Instruction::PushInt(1)], Some(op), keep);
        Ok(Typed::value(Type::Int, code))
    }

    /// Resolve an assignment target. Anything but a mutable is rejected.
    fn target(&mut self, node: &AstNode) -> Result<Target> {
        if node.tag != Tag::Mutable {
            return Err(Error::InvalidLvalue { line: node.line() });
        }
        let symbol = self.lookup(node)?;
        match node.children.first() {
            None => Ok(Target {
                storage: symbol.storage,
                slot: symbol.slot,
                ty: symbol.ty,
                index: None,
            }),
            Some(index) => {
                let ty = element_type(&symbol, node.line())?;
                let index = self.int_expr(index)?;
                Ok(Target {
                    storage: symbol.storage,
                    slot: symbol.slot,
                    ty,
                    index: Some(index),
                })
            }
        }
    }

    /// Store `value` into `target`
    ///
    /// With `op`, the old value is loaded first and combined with `value`.
    /// With `keep`, the stored value is also left on the stack.
    fn store_into(
        &mut self,
        target: Target,
        value: Vec<Instruction>,
        op: Option<Instruction>,
        keep: bool,
    ) -> Vec<Instruction> {
        let load = Instruction::load(target.storage, target.slot);
        let mut code = Vec::new();

        let Some(index) = target.index else {
            if op.is_some() {
                code.push(load);
            }
            code.extend(value);
            code.extend(op);
            if keep {
                code.push(Instruction::Dup);
            }
            code.push(Instruction::store(target.storage, target.slot));
            return code;
        };

        let elem = target.ty;
        match op {
            Some(op) => {
                // the index is evaluated once and used twice
                let (storage, temp) = self.scopes.reserve_temp(Type::Int);
                code.extend(index);
                code.push(Instruction::store(storage, temp));
                code.extend([
                    load.clone(),
                    Instruction::load(storage, temp),
                    load,
                    Instruction::load(storage, temp),
                    Instruction::LoadElem(elem.clone()),
                ]);
                code.extend(value);
                code.push(op);
            }
            None => {
                code.push(load);
                code.extend(index);
                code.extend(value);
            }
        }

        if keep {
            let (storage, temp) = self.scopes.reserve_temp(elem.clone());
            code.extend([
                Instruction::Dup,
                Instruction::store(storage, temp),
                Instruction::StoreElem(elem),
                Instruction::load(storage, temp),
            ]);
        } else {
            code.push(Instruction::StoreElem(elem));
        }
        code
    }

    // ==================== Calls ====================

    fn call(&mut self, node: &AstNode) -> Result<Typed> {
        let name = node.lexeme()?;
        match name {
            "print" => return self.print(node),
            "put" => return self.put(node),
            _ => {}
        }

        let signature = self
            .functions
            .lookup(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_string(),
                line: node.line(),
            })?;
        if node.children.len() != signature.param_types.len() {
            return Err(Error::ArityMismatch {
                name: name.to_string(),
                expected: signature.param_types.len(),
                got: node.children.len(),
                line: node.line(),
            });
        }

        let mut code = Vec::new();
        for (arg, param) in node.children.iter().zip(&signature.param_types) {
            let typed = self.expr(arg)?;
            expect_value(&typed.ty, param, arg.line())?;
            code.extend(typed.code);
        }
        code.push(Instruction::Call(signature.handle));
        Ok(Typed::value(signature.return_type, code))
    }

    /// `print(e)` or `print(format, e1, ...)`
    fn print(&mut self, node: &AstNode) -> Result<Typed> {
        let Some((first, rest)) = node.children.split_first() else {
            return Err(Error::ArityMismatch {
                name: "print".to_string(),
                expected: 1,
                got: 0,
                line: node.line(),
            });
        };

        let (head, mut code) = self.printable(first)?;
        if rest.is_empty() {
            if head != Type::String {
                code.push(Instruction::Box(head));
            }
            code.push(Instruction::Print);
            return Ok(Typed::value(Type::Void, code));
        }

        if head != Type::String {
            return Err(Error::InvalidPrintArguments { line: node.line() });
        }
        for arg in rest {
            let (ty, arg_code) = self.printable(arg)?;
            code.extend(arg_code);
            if ty != Type::String {
                code.push(Instruction::Box(ty));
            }
        }
        code.push(Instruction::PrintFormatted { args: rest.len() });
        Ok(Typed::value(Type::Void, code))
    }

    fn printable(&mut self, node: &AstNode) -> Result<(Type, Vec<Instruction>)> {
        let typed = self.expr(node)?;
        match typed.ty {
            ExprType::Value(ty) if ty.is_scalar() => Ok((ty, typed.code)),
            other => Err(Error::mismatch("printable value", other, node.line())),
        }
    }

    /// `put(m1, ...)`: read one input token into each target
    fn put(&mut self, node: &AstNode) -> Result<Typed> {
        if node.children.is_empty() {
            return Err(Error::ArityMismatch {
                name: "put".to_string(),
                expected: 1,
                got: 0,
                line: node.line(),
            });
        }

        let mut code = Vec::new();
        for arg in &node.children {
            let target = self.target(arg)?;
            if !target.ty.is_scalar() {
                return Err(Error::mismatch("scalar", &target.ty, arg.line()));
            }
            let read = vec![Instruction::Read(target.ty.clone())];
            code.extend(self.store_into(target, read, None, false));
        }
        Ok(Typed::value(Type::Void, code))
    }

    fn lookup(&self, node: &AstNode) -> Result<Symbol> {
        let name = node.lexeme()?;
        self.scopes
            .resolve(name)
            .cloned()
            .ok_or_else(|| Error::UndeclaredName {
                name: name.to_string(),
                line: node.line(),
            })
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Helpers ====================

fn malformed(node: &AstNode, message: impl Into<String>) -> Error {
    Error::MalformedTree {
        message: message.into(),
        line: node.line(),
    }
}

fn expect_value(found: &ExprType, expected: &Type, line: usize) -> Result<()> {
    match found.value() {
        Some(ty) if ty == expected => Ok(()),
        _ => Err(Error::mismatch(expected, found, line)),
    }
}

fn type_of(spec: &AstNode) -> Result<Type> {
    let word = spec.lexeme()?;
    Type::from_keyword(word).ok_or_else(|| malformed(spec, format!("'{}' is not a type", word)))
}

/// Parameter ids and types of a function declaration, in order
fn parameters(decl: &AstNode) -> Result<Vec<(&AstNode, Type)>> {
    let parms = decl
        .find(Tag::Parms)
        .ok_or_else(|| malformed(decl, "function without parameter list"))?;

    let mut params = Vec::new();
    for group in &parms.children {
        let base = type_of(group.child(0)?)?;
        for id in group.children.iter().skip(1) {
            let ty = match id.find(Tag::ArrayMarker) {
                Some(_) => Type::array_of(base.clone()),
                None => base.clone(),
            };
            params.push((id, ty));
        }
    }
    Ok(params)
}

fn element_type(symbol: &Symbol, line: usize) -> Result<Type> {
    symbol
        .ty
        .element()
        .cloned()
        .ok_or_else(|| Error::mismatch("array", &symbol.ty, line))
}

/// Whether code reads a local or an argument of the current call frame
fn reads_frame(code: &[Instruction]) -> bool {
    code.iter()
        .any(|i| matches!(i, Instruction::LoadLocal(_) | Instruction::LoadArg(_)))
}

fn array_length(node: &AstNode) -> Result<i32> {
    let lexeme = node.lexeme()?;
    lexeme.parse::<i32>().map_err(|_| Error::InvalidConstant {
        lexeme: lexeme.to_string(),
        line: node.line(),
    })
}

fn constant(node: &AstNode) -> Result<Typed> {
    let token = node
        .token
        .as_ref()
        .ok_or_else(|| malformed(node, "constant without token"))?;
    let lexeme = token.lexeme.as_str();
    let invalid = || Error::InvalidConstant {
        lexeme: lexeme.to_string(),
        line: token.line,
    };

    let (instruction, ty) = match token.kind {
        TokenKind::NumConst => {
            let value = lexeme.parse::<i32>().map_err(|_| invalid())?;
            (Instruction::PushInt(value), Type::Int)
        }
        TokenKind::CharConst => {
            let c = lexeme.chars().nth(1).ok_or_else(invalid)?;
            (Instruction::PushChar(c), Type::Char)
        }
        TokenKind::StringConst => {
            let text = lexeme
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .ok_or_else(invalid)?;
            (Instruction::PushString(text.to_string()), Type::String)
        }
        TokenKind::Keyword if lexeme == "true" => (Instruction::PushBool(true), Type::Bool),
        TokenKind::Keyword if lexeme == "false" => (Instruction::PushBool(false), Type::Bool),
        _ => return Err(invalid()),
    };
    Ok(Typed::value(ty, vec![instruction]))
}

fn binary_op(node: &AstNode) -> Result<Instruction> {
    Ok(match node.lexeme()? {
        "or" | "||" => Instruction::Or,
        "and" | "&&" => Instruction::And,
        ":>:" => Instruction::Max,
        ":<:" => Instruction::Min,
        "+" => Instruction::Add,
        "-" => Instruction::Sub,
        "*" => Instruction::Mul,
        "/" => Instruction::Div,
        "%" => Instruction::Rem,
        "==" => Instruction::Eq,
        "!=" => Instruction::Ne,
        "<" => Instruction::Lt,
        "<=" => Instruction::Le,
        ">" => Instruction::Gt,
        ">=" => Instruction::Ge,
        other => return Err(malformed(node, format!("unknown operator '{}'", other))),
    })
}

/// Value returned when control reaches the end of a non-void function
fn default_value(ty: &Type) -> Option<Instruction> {
    match ty {
        Type::Int => Some(Instruction::PushInt(0)),
        Type::Bool => Some(Instruction::PushBool(false)),
        Type::Char => Some(Instruction::PushChar('\0')),
        Type::String => Some(Instruction::PushString(String::new())),
        Type::Void | Type::Array(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;
    use crate::frontend::semantic::FunctionHandle;
    use pretty_assertions::assert_eq;
    use crate::middle::ir::Instruction::*;

    fn compile(source: &str) -> Result<ProgramImage> {
        let ast = Parser::new(Lexer::new(source)).parse_program()?;
        CodeGenerator::new().generate(&ast)
    }

    fn code_of(source: &str, name: &str) -> Vec<Instruction> {
        let image = compile(source).unwrap();
        image.function(name).unwrap().instructions.clone()
    }

    fn error_of(source: &str) -> Error {
        compile(source).unwrap_err()
    }

    #[test]
    fn test_straight_line_arithmetic() {
        let ast = Parser::new(Lexer::new("int main() { int a; a = 2 + 3 * 4; return a; }"))
            .parse_program()
            .unwrap();
        let (code, ty) = CodeGenerator::new()
            .generate_function(ast.child(0).unwrap())
            .unwrap();
        assert_eq!(ty, Type::Int);
        assert_eq!(
            code,
            vec![PushInt(2), PushInt(3), PushInt(4), Mul, Add, StoreLocal(0), LoadLocal(0), Return]
        );
    }

    #[test]
    fn test_assignment_type_mismatch() {
        let err = error_of("int main() {\n int x; bool b;\n x = b;\n}");
        assert_eq!(err, Error::mismatch("int", "bool", 3));
    }

    #[test]
    fn test_call_checks() {
        let add = "int add(int a; int b) { return a + b; }\n";
        let err = error_of(&format!("{}int main() {{ return add(1, true); }}", add));
        assert_eq!(err, Error::mismatch("int", "bool", 2));

        let err = error_of(&format!("{}int main() {{ return add(1); }}", add));
        assert_eq!(
            err,
            Error::ArityMismatch { name: "add".into(), expected: 2, got: 1, line: 2 }
        );

        let code = code_of(&format!("{}int main() {{ return add(1, 2); }}", add), "main");
        assert_eq!(code, vec![PushInt(1), PushInt(2), Call(FunctionHandle(0)), Return]);
    }

    #[test]
    fn test_for_loop_shape() {
        let code = code_of(
            "int main() { int x; int i; x = 0; for i = 1 to 5 do { x = x + i; } return x; }",
            "main",
        );
        assert_eq!(
            code,
            vec![
                PushInt(0), StoreLocal(0),
                PushInt(1), StoreLocal(1), PushInt(5), StoreLocal(2),
                Jump(LabelId(1)),
                Label(LabelId(0)),
                LoadLocal(0), LoadLocal(1), Add, StoreLocal(0),
                LoadLocal(1), PushInt(1), Add, StoreLocal(1),
                Label(LabelId(1)),
                LoadLocal(1), LoadLocal(2), Le, JumpIfTrue(LabelId(0)),
                Label(LabelId(2)),
                LoadLocal(0), Return,
            ]
        );
        assert_eq!(code.iter().filter(|i| **i == Le).count(), 1);
        assert_eq!(code.iter().filter(|i| matches!(i, JumpIfTrue(_))).count(), 1);
    }

    #[test]
    fn test_for_with_step_and_without_bound() {
        let code = code_of("main() { int i; for i = 10 to 0 by 0 - 2 do ; }", "main");
        assert_eq!(
            &code[..7],
            &[PushInt(10), StoreLocal(0), PushInt(0), StoreLocal(1), PushInt(0), PushInt(2), Sub]
        );
        assert!(code.contains(&StoreLocal(2)));
        assert!(code.contains(&LoadLocal(2)));

        let code = code_of("main() { int i; for i = 3 do ; }", "main");
        assert_eq!(&code[..4], &[PushInt(3), Dup, StoreLocal(1), StoreLocal(0)]);
    }

    #[test]
    fn test_for_needs_int_induction() {
        let err = error_of("main() { bool b; for b = 1 to 2 do ; }");
        assert!(matches!(err, Error::TypeMismatch { .. }));
        let err = error_of("main() { for k = 1 to 2 do ; }");
        assert_eq!(err, Error::UndeclaredName { name: "k".into(), line: 1 });
    }

    #[test]
    fn test_while_and_break() {
        let code = code_of("main() { bool go; go = true; while go do break; }", "main");
        assert_eq!(
            code,
            vec![
                PushBool(true), StoreLocal(0),
                Jump(LabelId(1)),
                Label(LabelId(0)),
                Jump(LabelId(2)),
                Label(LabelId(1)),
                LoadLocal(0), JumpIfTrue(LabelId(0)),
                Label(LabelId(2)),
                Return,
            ]
        );

        assert_eq!(error_of("main() {\n break;\n}"), Error::BreakOutsideLoop { line: 2 });
    }

    #[test]
    fn test_if_else() {
        let code = code_of("f(bool c) { if c then print(1); else print(2); }", "f");
        assert_eq!(
            code,
            vec![
                LoadArg(0), JumpIfFalse(LabelId(0)),
                PushInt(1), Box(Type::Int), Print,
                Jump(LabelId(1)),
                Label(LabelId(0)),
                PushInt(2), Box(Type::Int), Print,
                Label(LabelId(1)),
                Return,
            ]
        );

        let err = error_of("main() { if 1 then ; }");
        assert_eq!(err, Error::mismatch("bool", "int", 1));
    }

    #[test]
    fn test_expression_statement_pops_values() {
        let code = code_of("int f() { return 1; }\ng() { f(); }", "g");
        assert_eq!(code, vec![Call(FunctionHandle(0)), Pop, Return]);
    }

    #[test]
    fn test_assignment_as_value() {
        let code = code_of("int main() { int a; int b; a = b = 3; return a; }", "main");
        assert_eq!(
            code,
            vec![PushInt(3), Dup, StoreLocal(1), StoreLocal(0), LoadLocal(0), Return]
        );
    }

    #[test]
    fn test_compound_assignment_on_element() {
        let image = compile("int main() { int a[3]; a[1] += 2; return a[1]; }").unwrap();
        let main = image.function("main").unwrap();
        assert_eq!(
            main.instructions,
            vec![
                PushInt(3), NewArray(Type::Int), StoreLocal(0),
                PushInt(1), StoreLocal(1),
                LoadLocal(0), LoadLocal(1), LoadLocal(0), LoadLocal(1), LoadElem(Type::Int),
                PushInt(2), Add, StoreElem(Type::Int),
                LoadLocal(0), PushInt(1), LoadElem(Type::Int), Return,
            ]
        );
        assert_eq!(main.locals, vec![Type::array_of(Type::Int), Type::Int]);
    }

    #[test]
    fn test_increment() {
        let code = code_of("main() { int i; i++; }", "main");
        assert_eq!(code, vec![LoadLocal(0), PushInt(1), Add, StoreLocal(0), Return]);

        let err = error_of("main() { bool b; b--; }");
        assert_eq!(err, Error::mismatch("int", "bool", 1));
    }

    #[test]
    fn test_array_initializer_fills_every_slot() {
        let image = compile("int main() { int a[2] : 7; return *a; }").unwrap();
        let main = image.function("main").unwrap();
        assert_eq!(
            main.instructions,
            vec![
                PushInt(2), NewArray(Type::Int), StoreLocal(0),
                PushInt(7), StoreLocal(1),
                PushInt(0), StoreLocal(2),
                Jump(LabelId(1)),
                Label(LabelId(0)),
                LoadLocal(0), LoadLocal(2), LoadLocal(1), StoreElem(Type::Int),
                LoadLocal(2), PushInt(1), Add, StoreLocal(2),
                Label(LabelId(1)),
                LoadLocal(2), PushInt(2), Lt, JumpIfTrue(LabelId(0)),
                LoadLocal(0), Length, Return,
            ]
        );
        assert_eq!(main.locals, vec![Type::array_of(Type::Int), Type::Int, Type::Int]);
    }

    #[test]
    fn test_array_fill_size_does_not_grow_with_length() {
        let image = compile(
            "int big[2147483647] : 0;\nint main() { char s[1000000] : 'x'; return 0; }",
        )
        .unwrap();
        assert_eq!(image.static_init.len(), 22);
        assert_eq!(image.statics, vec![Type::array_of(Type::Int), Type::Int, Type::Int]);
        assert!(image.static_init.contains(&PushInt(2147483647)));
        assert_eq!(image.function("main").unwrap().instructions.len(), 24);
    }

    #[test]
    fn test_file_scope_and_static_storage() {
        let image = compile(
            "int g : 5;\nint a[2];\nint main() { return g + a[0]; }\n\
             int counter() { static int hits[1]; hits[0] += 1; return hits[0]; }",
        )
        .unwrap();
        assert_eq!(
            image.statics,
            vec![Type::Int, Type::array_of(Type::Int), Type::array_of(Type::Int)]
        );
        assert_eq!(
            image.static_init,
            vec![
                PushInt(5), StoreStatic(0),
                PushInt(2), NewArray(Type::Int), StoreStatic(1),
                PushInt(1), NewArray(Type::Int), StoreStatic(2),
            ]
        );
        assert_eq!(
            image.function("main").unwrap().instructions,
            vec![LoadStatic(0), LoadStatic(1), PushInt(0), LoadElem(Type::Int), Add, Return]
        );
        let counter = &image.function("counter").unwrap().instructions;
        assert!(!counter.iter().any(|i| matches!(i, NewArray(_))));
        assert_eq!(counter[1], StoreLocal(0));
    }

    #[test]
    fn test_static_locals_initialize_once() {
        let image = compile(
            "int base : 10;\n\
             int counter() { static int n : base + 5; n++; return n; }\n\
             seen() { static bool marks[3] : true; }",
        )
        .unwrap();
        assert_eq!(
            image.statics,
            vec![Type::Int, Type::Int, Type::array_of(Type::Bool), Type::Bool, Type::Int]
        );
        assert_eq!(
            &image.static_init[..6],
            &[PushInt(10), StoreStatic(0), LoadStatic(0), PushInt(5), Add, StoreStatic(1)]
        );
        assert!(image.static_init.contains(&StoreElem(Type::Bool)));
        assert_eq!(image.static_init.last(), Some(&JumpIfTrue(LabelId(0))));

        let counter = &image.function("counter").unwrap().instructions;
        assert!(!counter.contains(&PushInt(5)));
        assert_eq!(&counter[..3], &[LoadStatic(1), PushInt(1), Add]);
        assert_eq!(image.function("seen").unwrap().instructions, vec![Return]);
        assert!(image.function("seen").unwrap().locals.is_empty());
    }

    #[test]
    fn test_static_initializer_cannot_read_the_frame() {
        assert_eq!(
            error_of("f(int p) { static int n : p; }"),
            Error::StaticInitializer { name: "n".into(), line: 1 }
        );
        assert_eq!(
            error_of("f() { int x; static int n[2] : x; }"),
            Error::StaticInitializer { name: "n".into(), line: 1 }
        );
    }

    #[test]
    fn test_top_level_locals_share_the_parameter_scope() {
        assert_eq!(
            error_of("f(int a) { int a; }"),
            Error::DuplicateDeclaration { name: "a".into(), line: 1 }
        );
        let code = code_of("f(int a) { { bool a; a = true; } }", "f");
        assert_eq!(code, vec![PushBool(true), StoreLocal(0), Return]);
    }

    #[test]
    fn test_shadowing_picks_inner_storage() {
        let code = code_of("int x;\nmain() { bool x; x = true; }", "main");
        assert_eq!(code, vec![PushBool(true), StoreLocal(0), Return]);
    }

    #[test]
    fn test_name_errors() {
        assert_eq!(
            error_of("int main() { return y; }"),
            Error::UndeclaredName { name: "y".into(), line: 1 }
        );
        assert_eq!(
            error_of("int main() {\n int a;\n char a;\n return 0;\n}"),
            Error::DuplicateDeclaration { name: "a".into(), line: 3 }
        );
        assert_eq!(
            error_of("int main() { return f(); }"),
            Error::UnknownFunction { name: "f".into(), line: 1 }
        );
        assert_eq!(
            error_of("int f() { return 1; }\nint f() { return 2; }"),
            Error::DuplicateFunction { name: "f".into(), line: 2 }
        );
        assert_eq!(
            error_of("f(int a, a) { }"),
            Error::DuplicateDeclaration { name: "a".into(), line: 1 }
        );
    }

    #[test]
    fn test_forward_and_mutual_calls() {
        let image = compile(
            "bool even(int n) { if n == 0 then return true; return odd(n - 1); }\n\
             bool odd(int n) { if n == 0 then return false; return even(n - 1); }",
        )
        .unwrap();
        let even = &image.function("even").unwrap().instructions;
        assert!(even.contains(&Call(FunctionHandle(1))));
        let odd = &image.function("odd").unwrap().instructions;
        assert!(odd.contains(&Call(FunctionHandle(0))));
        assert!(image.entry_point().is_none());
    }

    #[test]
    fn test_returns() {
        assert_eq!(code_of("int f() { }", "f"), vec![PushInt(0), Return]);
        assert_eq!(code_of("string f() { }", "f"), vec![PushString(String::new()), Return]);
        assert_eq!(code_of("f() { return; }", "f"), vec![Return]);
        assert_eq!(error_of("f() { return 1; }"), Error::mismatch("void", "int", 1));
        assert_eq!(error_of("int f() { return; }"), Error::mismatch("int", "void", 1));
    }

    #[test]
    fn test_operator_typing() {
        assert_eq!(error_of("int f() { return 1 + true; }"), Error::mismatch("int", "bool", 1));
        assert_eq!(error_of("bool f() { return 1 and 2; }"), Error::mismatch("bool", "int", 1));
        assert!(matches!(error_of("bool f(bool b) { return b < true; }"), Error::TypeMismatch { .. }));
        assert!(matches!(error_of("bool f(int a[]) { return a == a; }"), Error::TypeMismatch { .. }));
        assert!(matches!(error_of("int f() { return *3; }"), Error::TypeMismatch { .. }));

        let code = code_of("bool f(char c; string s) { return c < 'z' and s != \"\"; }", "f");
        assert_eq!(
            code,
            vec![
                LoadArg(0), PushChar('z'), Lt,
                LoadArg(1), PushString(String::new()), Ne,
                And, Return,
            ]
        );

        let code = code_of("int f(int a[]) { return *a + ?10 - -1 :>: 4 % 3; }", "f");
        assert_eq!(
            code,
            vec![
                LoadArg(0), Length, PushInt(10), Random, Add, PushInt(1), Neg, Sub,
                PushInt(4), PushInt(3), Rem, Max, Return,
            ]
        );

        let code = code_of("bool f(bool a; bool b) { return !a || not b && a; }", "f");
        assert_eq!(code, vec![LoadArg(0), Not, LoadArg(1), Not, LoadArg(0), And, Or, Return]);
    }

    #[test]
    fn test_invalid_constants() {
        assert_eq!(
            error_of("int f() { return 3.5; }"),
            Error::InvalidConstant { lexeme: "3.5".into(), line: 1 }
        );
        assert!(matches!(
            error_of("int f() { return 99999999999; }"),
            Error::InvalidConstant { .. }
        ));
    }

    #[test]
    fn test_print() {
        let code = code_of("main() { print(\"x=%d %c\", 1, 'c'); print(\"hi\"); }", "main");
        assert_eq!(
            code,
            vec![
                PushString("x=%d %c".into()),
                PushInt(1), Box(Type::Int),
                PushChar('c'), Box(Type::Char),
                PrintFormatted { args: 2 },
                PushString("hi".into()), Print,
                Return,
            ]
        );

        assert_eq!(error_of("main() { print(1, 2); }"), Error::InvalidPrintArguments { line: 1 });
        assert!(matches!(error_of("main() { print(); }"), Error::ArityMismatch { .. }));
        assert!(matches!(error_of("f() { } main() { print(f()); }"), Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_put() {
        let code = code_of("main() { int x; char a[2]; put(x, a[1]); }", "main");
        assert_eq!(
            code,
            vec![
                PushInt(2), NewArray(Type::Char), StoreLocal(1),
                Read(Type::Int), StoreLocal(0),
                LoadLocal(1), PushInt(1), Read(Type::Char), StoreElem(Type::Char),
                Return,
            ]
        );

        assert_eq!(error_of("main() { put(1); }"), Error::InvalidLvalue { line: 1 });
        assert_eq!(error_of("main() { int x; put((x)); }"), Error::InvalidLvalue { line: 1 });
        assert!(matches!(error_of("main() { int a[2]; put(a); }"), Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_labels_always_resolve() {
        let image = compile(
            "int main() {\n\
               int i; int n; n = 0;\n\
               for i = 0 to 9 do {\n\
                 if i % 2 == 0 then n += i; else { while n > 100 do { n--; if n == 50 then break; } }\n\
               }\n\
               return n;\n\
             }",
        )
        .unwrap();
        for function in &image.functions {
            assert!(function.unresolved_labels().is_empty());
        }
    }
}
