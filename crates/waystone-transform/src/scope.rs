//! Lexical scopes.
//!
//! Declarations are hoisted the way an ES module evaluates them: `var` to the
//! nearest function, `let`/`const`/`class`/`function` to the enclosing block,
//! imports to the module.

use std::collections::HashSet;

use crate::ast::{
    DefaultExport, ExportDecl, ForHead, ForInit, Function, Pattern, Program, Stmt, StmtKind,
    SwitchCase, VarDecl, VarKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Block,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    names: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn kind(&self, index: usize) -> Option<ScopeKind> {
        self.scopes.get(index).map(|scope| scope.kind)
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            names: HashSet::new(),
        });
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    pub fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.to_string());
        }
    }

    pub fn declare_pattern(&mut self, pattern: &Pattern) {
        for ident in pattern.bound_names() {
            self.declare(&ident.name);
        }
    }

    /// Index of the innermost scope declaring `name`; `None` for globals.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rposition(|scope| scope.names.contains(name))
    }

    pub fn enter_module(&mut self, program: &Program) {
        self.push(ScopeKind::Module);
        for name in module_bindings(program) {
            self.declare(&name);
        }
    }

    /// Push the scope of a function body: its own name, parameters, `var`s
    /// and the lexical declarations of the body block.
    pub fn enter_function(&mut self, function: &Function) {
        self.push(ScopeKind::Function);
        if let Some(id) = &function.id {
            self.declare(&id.name);
        }
        for param in &function.params {
            self.declare_pattern(param);
        }
        if let Some(block) = function.block() {
            let mut names = HashSet::new();
            var_names(&block.stmts, &mut names);
            lexical_names(&block.stmts, &mut names);
            for name in names {
                self.declare(&name);
            }
        }
    }

    /// Push a scope holding a function-like body (class static blocks).
    pub fn enter_static_block(&mut self, stmts: &[Stmt]) {
        self.push(ScopeKind::Function);
        let mut names = HashSet::new();
        var_names(stmts, &mut names);
        lexical_names(stmts, &mut names);
        for name in names {
            self.declare(&name);
        }
    }

    pub fn enter_block(&mut self, stmts: &[Stmt]) {
        self.push(ScopeKind::Block);
        let mut names = HashSet::new();
        lexical_names(stmts, &mut names);
        for name in names {
            self.declare(&name);
        }
    }

    /// Push the scope shared by every case of a `switch`.
    pub fn enter_switch(&mut self, cases: &[SwitchCase]) {
        self.push(ScopeKind::Block);
        let mut names = HashSet::new();
        for case in cases {
            lexical_names(&case.body, &mut names);
        }
        for name in names {
            self.declare(&name);
        }
    }

    /// Push the scope of a `for` head's `let`/`const` declaration.
    pub fn enter_loop_head(&mut self, decl: Option<&VarDecl>) {
        self.push(ScopeKind::Block);
        if let Some(decl) = decl.filter(|decl| decl.kind != VarKind::Var) {
            for declarator in &decl.declarators {
                self.declare_pattern(&declarator.id);
            }
        }
    }
}

/// Every name bound at the top level of a module.
pub fn module_bindings(program: &Program) -> HashSet<String> {
    let mut names = HashSet::new();
    var_names(&program.body, &mut names);
    lexical_names(&program.body, &mut names);
    names
}

/// Names declared directly in a statement list by `let`, `const`, `class`,
/// `function` and `import`.
fn lexical_names(stmts: &[Stmt], names: &mut HashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Var(decl) if decl.kind != VarKind::Var => declare_all(decl, names),
            StmtKind::Function(function) => {
                if let Some(id) = &function.id {
                    names.insert(id.name.clone());
                }
            }
            StmtKind::Class(class) => {
                if let Some(id) = &class.id {
                    names.insert(id.name.clone());
                }
            }
            StmtKind::Import(import) => {
                names.extend(import.locals.iter().map(|ident| ident.name.clone()));
            }
            StmtKind::Export(ExportDecl::Decl(inner)) => {
                lexical_names(std::slice::from_ref(inner.as_ref()), names);
            }
            StmtKind::Export(ExportDecl::Default(DefaultExport::Function(function))) => {
                if let Some(id) = &function.id {
                    names.insert(id.name.clone());
                }
            }
            StmtKind::Export(ExportDecl::Default(DefaultExport::Class(class))) => {
                if let Some(id) = &class.id {
                    names.insert(id.name.clone());
                }
            }
            _ => {}
        }
    }
}

/// `var` declarations anywhere in a statement list, without entering
/// nested functions.
fn var_names(stmts: &[Stmt], names: &mut HashSet<String>) {
    for stmt in stmts {
        var_names_in(stmt, names);
    }
}

fn var_names_in(stmt: &Stmt, names: &mut HashSet<String>) {
    match &stmt.kind {
        StmtKind::Var(decl) if decl.kind == VarKind::Var => declare_all(decl, names),
        StmtKind::Block(block) => var_names(&block.stmts, names),
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => {
            var_names_in(consequent, names);
            if let Some(alternate) = alternate {
                var_names_in(alternate, names);
            }
        }
        StmtKind::For { init, body, .. } => {
            if let Some(ForInit::Var(decl)) = init {
                if decl.kind == VarKind::Var {
                    declare_all(decl, names);
                }
            }
            var_names_in(body, names);
        }
        StmtKind::ForIn { left, body, .. } => {
            if let ForHead::Var(decl) = left {
                if decl.kind == VarKind::Var {
                    declare_all(decl, names);
                }
            }
            var_names_in(body, names);
        }
        StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. }
        | StmtKind::Labeled { body, .. } => var_names_in(body, names),
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            var_names(&block.stmts, names);
            if let Some(handler) = handler {
                var_names(&handler.body.stmts, names);
            }
            if let Some(finalizer) = finalizer {
                var_names(&finalizer.stmts, names);
            }
        }
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                var_names(&case.body, names);
            }
        }
        StmtKind::Export(ExportDecl::Decl(inner)) => var_names_in(inner, names),
        _ => {}
    }
}

fn declare_all(decl: &VarDecl, names: &mut HashSet<String>) {
    for declarator in &decl.declarators {
        names.extend(
            declarator
                .id
                .bound_names()
                .into_iter()
                .map(|ident| ident.name.clone()),
        );
    }
}
