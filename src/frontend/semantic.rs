//! Name resolution for C-minus
//!
//! - [`ScopeChain`]: nested symbol tables with per-storage slot allocation
//! - [`FunctionTable`]: global function signatures

use std::collections::HashMap;

use serde::Serialize;

use crate::types::Type;
use crate::utils::{Error, Result};

// ==================== Symbol Table ====================

/// Where a variable lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StorageKind {
    /// File-scope variables and `static` locals; one slot space per program
    Static,
    Local,
    Arg,
}

/// Symbol information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub storage: StorageKind,
    /// Dense index within the storage kind
    pub slot: usize,
    pub array_length: Option<usize>,
    pub line: usize,
}

/// What opened a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    File,
    Function,
    Block,
}

/// Returned by [`ScopeChain::enter_scope`], consumed by [`ScopeChain::exit_scope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ScopeHandle(usize);

/// A scope containing symbols
#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    symbols: HashMap<String, Symbol>,
    next_local: usize,
    next_arg: usize,
}

impl Scope {
    fn new(kind: ScopeKind, next_local: usize, next_arg: usize) -> Self {
        Self {
            kind,
            symbols: HashMap::new(),
            next_local,
            next_arg,
        }
    }
}

/// Stack of scopes, innermost last
///
/// Local and argument slots restart at zero in every function scope. Block
/// scopes keep numbering where the enclosing scope left off, and hand their
/// counters back on exit, so every local of a function gets its own slot.
#[derive(Debug)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
    statics: Vec<Type>,
    /// Slot types of the function being generated
    locals: Vec<Type>,
}

impl ScopeChain {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::File, 0, 0)],
            statics: Vec::new(),
            locals: Vec::new(),
        }
    }

    /// Enter a new scope
    pub fn enter_scope(&mut self, kind: ScopeKind) -> ScopeHandle {
        let handle = ScopeHandle(self.scopes.len());
        let scope = match kind {
            ScopeKind::Block => {
                let outer = self.innermost();
                Scope::new(kind, outer.next_local, outer.next_arg)
            }
            ScopeKind::Function | ScopeKind::File => {
                self.locals.clear();
                Scope::new(kind, 0, 0)
            }
        };
        log::trace!("enter {:?} scope at depth {}", kind, handle.0);
        self.scopes.push(scope);
        handle
    }

    /// Leave the scope identified by `handle` and everything nested in it
    pub fn exit_scope(&mut self, handle: ScopeHandle) {
        // the file scope is never popped
        let depth = handle.0.max(1);
        while self.scopes.len() > depth {
            let Some(scope) = self.scopes.pop() else {
                break;
            };
            if scope.kind == ScopeKind::Block {
                let outer = self.innermost_mut();
                outer.next_local = outer.next_local.max(scope.next_local);
            }
        }
        log::trace!("exit scope, depth now {}", self.scopes.len());
    }

    /// Define a name in the innermost scope and assign its slot
    pub fn declare(
        &mut self,
        name: &str,
        ty: Type,
        storage: StorageKind,
        array_length: Option<usize>,
        line: usize,
    ) -> Result<usize> {
        if self.innermost().symbols.contains_key(name) {
            return Err(Error::DuplicateDeclaration {
                name: name.to_string(),
                line,
            });
        }

        let slot = match storage {
            StorageKind::Static => self.reserve_static(ty.clone()),
            StorageKind::Local => self.allocate_local(ty.clone()),
            StorageKind::Arg => {
                let scope = self.innermost_mut();
                scope.next_arg += 1;
                scope.next_arg - 1
            }
        };

        log::trace!("declare {}: {} as {:?} {}", name, ty, storage, slot);
        let symbol = Symbol {
            name: name.to_string(),
            ty,
            storage,
            slot,
            array_length,
            line,
        };
        self.innermost_mut().symbols.insert(name.to_string(), symbol);
        Ok(slot)
    }

    /// Allocate an unnamed slot: static at file scope, local inside a function
    pub fn reserve_temp(&mut self, ty: Type) -> (StorageKind, usize) {
        if self.scopes.len() == 1 {
            (StorageKind::Static, self.reserve_static(ty))
        } else {
            (StorageKind::Local, self.allocate_local(ty))
        }
    }

    /// Allocate an unnamed static slot at any depth
    pub fn reserve_static(&mut self, ty: Type) -> usize {
        self.statics.push(ty);
        self.statics.len() - 1
    }

    /// Look up a name, innermost scope first
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.symbols.get(name))
    }

    /// Slot types of the current function's locals
    pub fn local_types(&self) -> &[Type] {
        &self.locals
    }

    /// Slot types of all static storage declared so far
    pub fn static_types(&self) -> &[Type] {
        &self.statics
    }

    /// Current nesting depth (1 = file scope)
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    fn allocate_local(&mut self, ty: Type) -> usize {
        let scope = self.innermost_mut();
        let slot = scope.next_local;
        scope.next_local += 1;
        if slot < self.locals.len() {
            self.locals[slot] = ty;
        } else {
            self.locals.push(ty);
        }
        slot
    }

    fn innermost(&self) -> &Scope {
        // the file scope is always present
        &self.scopes[self.scopes.len() - 1]
    }

    fn innermost_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}

impl Default for ScopeChain {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Function Table ====================

/// Names handled by the code generator itself
pub const INTRINSICS: &[&str] = &["print", "put"];

pub fn is_intrinsic(name: &str) -> bool {
    INTRINSICS.contains(&name)
}

/// Opaque reference to a function, used by `call`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionHandle(pub usize);

/// Function signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSignature {
    pub name: String,
    pub return_type: Type,
    pub param_types: Vec<Type>,
    pub handle: FunctionHandle,
}

/// All declared functions, in declaration order
#[derive(Debug, Default)]
pub struct FunctionTable {
    by_name: HashMap<String, FunctionHandle>,
    signatures: Vec<FunctionSignature>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_function(
        &mut self,
        name: &str,
        return_type: Type,
        param_types: Vec<Type>,
        line: usize,
    ) -> Result<FunctionHandle> {
        if is_intrinsic(name) || self.by_name.contains_key(name) {
            return Err(Error::DuplicateFunction {
                name: name.to_string(),
                line,
            });
        }

        let handle = FunctionHandle(self.signatures.len());
        log::debug!("register function {} -> {} ({} params)", name, return_type, param_types.len());
        self.signatures.push(FunctionSignature {
            name: name.to_string(),
            return_type,
            param_types,
            handle,
        });
        self.by_name.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Option<&FunctionSignature> {
        self.by_name.get(name).map(|h| &self.signatures[h.0])
    }

    pub fn signatures(&self) -> &[FunctionSignature] {
        &self.signatures
    }
}
