//! Discovery of directive functions.
//!
//! One walk over the syntax tree tracks lexical scopes and nesting paths,
//! finds every `"use step"` and `"use workflow"` function, records the names
//! each step captures from enclosing function scopes, and collects
//! diagnostics. Step bodies are walked only for captures: directives nested
//! inside a step are left alone.

use std::collections::BTreeSet;

use waystone::{FunctionId, FunctionKind};

use crate::ast::{
    Class, ClassMemberKind, DefaultExport, ExportDecl, Expr, ExprKind, ForHead, ForInit, Function,
    FunctionBody, Ident, MemberProp, MethodKind, ObjectPatternProp, Pattern, PatternKind, Program,
    Prop, PropKey, PropKind, Stmt, StmtKind, VarDecl,
};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::naming::{Namer, hoisted_name};
use crate::scope::{ScopeKind, ScopeStack, module_bindings};
use crate::span::{LineIndex, Span};

pub const STEP_DIRECTIVE: &str = "use step";
pub const WORKFLOW_DIRECTIVE: &str = "use workflow";

const ANONYMOUS: &str = "<anonymous>";
const MODULE: &str = "<module>";

/// A function carrying a directive.
#[derive(Debug, Clone)]
pub struct DirectiveFunction {
    pub kind: FunctionKind,
    pub id: FunctionId,
    /// Module-level name the function is hoisted to.
    pub hoisted_name: String,
    pub site: BindingSite,
    /// Source replaced at the binding site.
    pub span: Span,
    pub params_span: Span,
    pub body: BodySpan,
    pub is_generator: bool,
    /// The directive statement; absent when a file-level `"use step"`
    /// covers the function.
    pub directive: Option<Span>,
    /// Names read from enclosing function scopes, sorted.
    pub captures: Vec<String>,
    /// Set when the function is directly bound to a module-level name.
    pub module: Option<ModuleBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySpan {
    /// A block body, braces included.
    Block(Span),
    /// A concise arrow body.
    Expr(Span),
}

/// How the function is reached from its surroundings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingSite {
    /// `function name() {}`
    Declaration { name: String },
    /// A function or arrow expression in any expression position.
    Expression,
    /// `key() {}` in an object literal.
    ObjectMethod { key: String },
    /// `key() {}` in a class body.
    ClassMethod { key: String, is_static: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBinding {
    pub name: String,
    /// End of the top-level statement holding the binding.
    pub statement_end: usize,
    /// The statement needs a `;` before anything is appended after it.
    pub needs_semicolon: bool,
    pub default_export: Option<DefaultExportFix>,
}

/// How an anonymous default export receives its binding name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultExportFix {
    /// `export default function () {}`: the gap between the keyword and the
    /// parameter list becomes ` <name>`.
    InsertName { gap: Span },
    /// `export default <expr>`: the `export default` prefix becomes a
    /// `const` declaration and the binding is re-exported afterwards.
    Wrap { prefix: Span },
}

#[derive(Debug, Default)]
pub struct Analysis {
    pub functions: Vec<DirectiveFunction>,
    pub diagnostics: Vec<Diagnostic>,
    /// A module-level `"use step"` directive.
    pub file_directive: Option<Span>,
}

/// Find the directive functions of a parsed module.
///
/// Fails only when `source_path` cannot be part of a function identifier.
pub fn analyze(program: &Program, src: &str, source_path: &str) -> waystone::Result<Analysis> {
    let mut analyzer = Analyzer {
        src,
        source_path,
        lines: LineIndex::new(src),
        scopes: ScopeStack::default(),
        namer: Namer::new(module_bindings(program)),
        functions: Vec::new(),
        diagnostics: Vec::new(),
        file_step: false,
        file_directive: None,
        function_depth: 0,
        declarations: Vec::new(),
        step: None,
        error: None,
    };
    analyzer.visit_program(program);
    if let Some(error) = analyzer.error {
        return Err(error);
    }
    Ok(Analysis {
        functions: analyzer.functions,
        diagnostics: analyzer.diagnostics,
        file_directive: analyzer.file_directive,
    })
}

struct Site {
    /// The name the function is directly bound to. Its segment is already
    /// on the namer's path.
    binding: Option<String>,
    kind: SiteKind,
    module: Option<ModuleBinding>,
}

enum SiteKind {
    Declaration,
    Expression(Span),
    ObjectMethod {
        span: Span,
        key: String,
        method: MethodKind,
    },
    ClassMethod {
        span: Span,
        key: String,
        is_static: bool,
        method: MethodKind,
    },
}

impl Site {
    fn free(span: Span) -> Self {
        Self {
            binding: None,
            kind: SiteKind::Expression(span),
            module: None,
        }
    }

    fn span(&self, function: &Function) -> Span {
        match &self.kind {
            SiteKind::Declaration => function.span,
            SiteKind::Expression(span)
            | SiteKind::ObjectMethod { span, .. }
            | SiteKind::ClassMethod { span, .. } => *span,
        }
    }

    fn method(&self) -> Option<MethodKind> {
        match &self.kind {
            SiteKind::ObjectMethod { method, .. } | SiteKind::ClassMethod { method, .. } => {
                Some(*method)
            }
            _ => None,
        }
    }
}

/// The step whose body is being walked.
struct StepFrame {
    name: String,
    /// Scopes below this index enclose the step.
    scope_floor: usize,
    captures: BTreeSet<String>,
}

struct Analyzer<'a> {
    src: &'a str,
    source_path: &'a str,
    lines: LineIndex,
    scopes: ScopeStack,
    namer: Namer,
    functions: Vec<DirectiveFunction>,
    diagnostics: Vec<Diagnostic>,
    file_step: bool,
    file_directive: Option<Span>,
    function_depth: usize,
    /// Enclosing declaration names, innermost last.
    declarations: Vec<String>,
    step: Option<StepFrame>,
    error: Option<waystone::Error>,
}

impl Analyzer<'_> {
    fn diagnostic(
        &mut self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        declaration: &str,
        offset: usize,
    ) {
        let (line, column) = self.lines.position(self.src, offset);
        self.diagnostics.push(Diagnostic {
            kind,
            message: message.into(),
            declaration: declaration.to_string(),
            line,
            column,
        });
    }

    // =========================================================================
    // Module level
    // =========================================================================

    fn visit_program(&mut self, program: &Program) {
        self.scopes.enter_module(program);
        let mut body = program.body.iter().peekable();
        while let Some(stmt) = body.next_if(|stmt| stmt.directive().is_some()) {
            match stmt.directive() {
                Some(STEP_DIRECTIVE) => {
                    self.file_step = true;
                    self.file_directive = Some(stmt.span);
                }
                Some(WORKFLOW_DIRECTIVE) => self.diagnostic(
                    DiagnosticKind::MisplacedDirective,
                    "\"use workflow\" must be the first statement of a function body",
                    MODULE,
                    stmt.span.start,
                ),
                _ => {}
            }
        }
        for stmt in body {
            self.visit_top_level(stmt);
        }
        self.scopes.pop();
    }

    fn visit_top_level(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Export(ExportDecl::Decl(inner)) => self.visit_module_declaration(stmt, inner),
            StmtKind::Export(ExportDecl::Default(default)) => {
                self.visit_default_export(stmt, default)
            }
            _ => self.visit_module_declaration(stmt, stmt),
        }
    }

    fn visit_module_declaration(&mut self, outer: &Stmt, inner: &Stmt) {
        match &inner.kind {
            StmtKind::Function(function) => {
                let module = function
                    .id
                    .as_ref()
                    .map(|id| self.module_binding(outer, &id.name, None));
                self.visit_function_declaration(function, module);
            }
            StmtKind::Var(decl) => self.visit_var_decl(decl, Some(outer)),
            _ => self.visit_stmt(inner),
        }
    }

    fn visit_default_export(&mut self, stmt: &Stmt, default: &DefaultExport) {
        match default {
            DefaultExport::Function(function) => {
                if let Some(id) = &function.id {
                    let module = self.module_binding(stmt, &id.name, None);
                    self.visit_function_declaration(function, Some(module));
                    return;
                }
                let name = self.namer.default_export_name();
                let fix = DefaultExportFix::InsertName {
                    gap: Span::new(function.name_pos, function.params_span.start),
                };
                let module = self.module_binding(stmt, &name, Some(fix));
                self.namer.push(&name);
                self.visit_function(
                    function,
                    Site {
                        binding: Some(name),
                        kind: SiteKind::Declaration,
                        module: Some(module),
                    },
                );
                self.namer.pop();
            }
            DefaultExport::Class(class) => {
                if class.id.is_some() {
                    self.visit_class(class, false);
                    return;
                }
                let name = self.namer.default_export_name();
                self.namer.push(&name);
                self.visit_class(class, true);
                self.namer.pop();
            }
            DefaultExport::Expr(expr) => {
                let inner = expr.unparenthesized();
                let (ExprKind::Function(function) | ExprKind::Arrow(function)) = &inner.kind else {
                    self.visit_expr(expr);
                    return;
                };
                let name = self.namer.default_export_name();
                let fix = DefaultExportFix::Wrap {
                    prefix: Span::new(stmt.span.start, expr.span.start),
                };
                let module = self.module_binding(stmt, &name, Some(fix));
                self.namer.push(&name);
                self.visit_function(
                    function,
                    Site {
                        binding: Some(name),
                        kind: SiteKind::Expression(inner.span),
                        module: Some(module),
                    },
                );
                self.namer.pop();
            }
        }
    }

    fn module_binding(
        &self,
        stmt: &Stmt,
        name: &str,
        default_export: Option<DefaultExportFix>,
    ) -> ModuleBinding {
        let ends_with_semicolon = stmt.span.text(self.src).trim_end().ends_with(';');
        ModuleBinding {
            name: name.to_string(),
            statement_end: stmt.span.end,
            needs_semicolon: !is_declaration(stmt) && !ends_with_semicolon,
            default_export,
        }
    }

    // =========================================================================
    // Functions
    // =========================================================================

    fn visit_function_declaration(&mut self, function: &Function, module: Option<ModuleBinding>) {
        let name = function.id.as_ref().map(|id| id.name.clone());
        if let Some(name) = &name {
            self.namer.push(name);
        }
        self.visit_function(
            function,
            Site {
                binding: name.clone(),
                kind: SiteKind::Declaration,
                module,
            },
        );
        if name.is_some() {
            self.namer.pop();
        }
    }

    fn visit_function(&mut self, function: &Function, site: Site) {
        let display = site
            .binding
            .clone()
            .or_else(|| function.id.as_ref().map(|id| id.name.clone()))
            .unwrap_or_else(|| ANONYMOUS.to_string());
        let directive = self.directive(function, &site, &display);

        // A named function expression nothing binds is named by its own name.
        let mut segment = match (&site.binding, &function.id) {
            (None, Some(id)) => Some(id.name.clone()),
            _ => None,
        };
        let mut step_index = None;
        if let Some((kind, directive_span)) = directive {
            if site.binding.is_none() && segment.is_none() {
                segment = Some(self.namer.anonymous_segment(kind));
            }
            let index = self.register(function, &site, kind, directive_span, segment.as_deref());
            if kind == FunctionKind::Step {
                step_index = index;
            }
        }

        if let Some(segment) = &segment {
            self.namer.push(segment);
        }
        let scope_floor = self.scopes.depth();
        if step_index.is_some() {
            self.step = Some(StepFrame {
                name: display.clone(),
                scope_floor,
                captures: BTreeSet::new(),
            });
        }
        self.declarations.push(display);
        self.function_depth += 1;
        self.scopes.enter_function(function);

        for param in &function.params {
            self.visit_pattern(param);
        }
        match &function.body {
            FunctionBody::Block(block) => {
                let prologue = function.prologue().count();
                for stmt in block.stmts.iter().skip(prologue) {
                    self.visit_stmt(stmt);
                }
            }
            FunctionBody::Expr(expr) => self.visit_expr(expr),
        }

        self.scopes.pop();
        self.function_depth -= 1;
        self.declarations.pop();
        if let (Some(index), Some(frame)) = (step_index, self.step.take()) {
            self.functions[index].captures = frame.captures.into_iter().collect();
        }
        if segment.is_some() {
            self.namer.pop();
        }
    }

    /// The directive a function carries, once it passes validation.
    fn directive(
        &mut self,
        function: &Function,
        site: &Site,
        name: &str,
    ) -> Option<(FunctionKind, Option<Span>)> {
        if self.step.is_some() {
            return None;
        }
        let mut step = None;
        let mut workflow = None;
        for (value, stmt) in function.prologue() {
            match value {
                STEP_DIRECTIVE => step = Some(stmt.span),
                WORKFLOW_DIRECTIVE => workflow = Some(stmt.span),
                _ => {}
            }
        }

        let offset = site.span(function).start;
        let (kind, span) = match (step, workflow) {
            (Some(_), Some(_)) => {
                self.diagnostic(
                    DiagnosticKind::ConflictingDirectives,
                    "a function cannot be both a step and a workflow",
                    name,
                    offset,
                );
                return None;
            }
            (Some(span), None) => (FunctionKind::Step, Some(span)),
            (None, Some(span)) => (FunctionKind::Workflow, Some(span)),
            (None, None) => {
                if !(self.file_step && site.module.is_some() && function.is_async) {
                    return None;
                }
                (FunctionKind::Step, None)
            }
        };

        if kind == FunctionKind::Step
            && matches!(
                site.method(),
                Some(MethodKind::Getter | MethodKind::Setter | MethodKind::Constructor)
            )
        {
            self.diagnostic(
                DiagnosticKind::InvalidStepTarget,
                "getters, setters and constructors cannot be steps",
                name,
                offset,
            );
            return None;
        }
        if !function.is_async {
            self.diagnostic(
                DiagnosticKind::NotAsync,
                format!("{kind} functions must be async"),
                name,
                offset,
            );
            return None;
        }
        if kind == FunctionKind::Workflow && site.module.is_none() {
            if self.function_depth > 0 {
                self.diagnostic(
                    DiagnosticKind::NestedWorkflow,
                    "workflows must be declared at module level",
                    name,
                    offset,
                );
            } else {
                self.diagnostic(
                    DiagnosticKind::UnnamedWorkflow,
                    "workflows must be bound to a module-level name",
                    name,
                    offset,
                );
            }
            return None;
        }
        Some((kind, span))
    }

    fn register(
        &mut self,
        function: &Function,
        site: &Site,
        kind: FunctionKind,
        directive: Option<Span>,
        segment: Option<&str>,
    ) -> Option<usize> {
        let segments = self.namer.child(segment);
        let path = self.namer.assign(segments, site.module.is_some())?;
        let hoisted_name = hoisted_name(&path);
        let id = match FunctionId::new(kind, self.source_path, path) {
            Ok(id) => id,
            Err(error) => {
                self.error.get_or_insert(error);
                return None;
            }
        };

        let binding_site = match &site.kind {
            SiteKind::Declaration => BindingSite::Declaration {
                name: site.binding.clone().unwrap_or_else(|| hoisted_name.clone()),
            },
            SiteKind::Expression(_) => BindingSite::Expression,
            SiteKind::ObjectMethod { key, .. } => BindingSite::ObjectMethod { key: key.clone() },
            SiteKind::ClassMethod { key, is_static, .. } => BindingSite::ClassMethod {
                key: key.clone(),
                is_static: *is_static,
            },
        };
        let body = match &function.body {
            FunctionBody::Block(block) => BodySpan::Block(block.span),
            FunctionBody::Expr(expr) => BodySpan::Expr(expr.span),
        };
        tracing::debug!(id = %id, "found {kind} function");
        self.functions.push(DirectiveFunction {
            kind,
            id,
            hoisted_name,
            site: binding_site,
            span: site.span(function),
            params_span: function.params_span,
            body,
            is_generator: function.is_generator,
            directive,
            captures: Vec::new(),
            module: site.module.clone(),
        });
        Some(self.functions.len() - 1)
    }

    // =========================================================================
    // Classes and objects
    // =========================================================================

    /// `bound` classes are named by their binding, not their own name.
    fn visit_class(&mut self, class: &Class, bound: bool) {
        if let Some(super_class) = &class.super_class {
            self.visit_expr(super_class);
        }
        let segment = if bound {
            None
        } else {
            class.id.as_ref().map(|id| id.name.clone())
        };
        if let Some(segment) = &segment {
            self.namer.push(segment);
        }
        self.scopes.push(ScopeKind::Block);
        if let Some(id) = &class.id {
            self.scopes.declare(&id.name);
        }

        for member in &class.members {
            match &member.kind {
                ClassMemberKind::Method {
                    key,
                    kind,
                    is_static,
                    function,
                } => {
                    self.visit_prop_key(key);
                    let site = SiteKind::ClassMethod {
                        span: member.span,
                        key: key.span().text(self.src).to_string(),
                        is_static: *is_static,
                        method: *kind,
                    };
                    self.visit_method(key, function, site);
                }
                ClassMemberKind::Field { key, value, .. } => {
                    self.visit_prop_key(key);
                    let Some(value) = value else { continue };
                    match key.static_name() {
                        Some(name) => {
                            self.namer.push(&name);
                            self.visit_bound(value, &name, None);
                            self.namer.pop();
                        }
                        None => self.visit_expr(value),
                    }
                }
                ClassMemberKind::StaticBlock(block) => {
                    self.function_depth += 1;
                    self.scopes.enter_static_block(&block.stmts);
                    for stmt in &block.stmts {
                        self.visit_stmt(stmt);
                    }
                    self.scopes.pop();
                    self.function_depth -= 1;
                }
            }
        }

        self.scopes.pop();
        if segment.is_some() {
            self.namer.pop();
        }
    }

    fn visit_object(&mut self, props: &[Prop]) {
        for prop in props {
            match &prop.kind {
                PropKind::KeyValue { key, value } => {
                    self.visit_prop_key(key);
                    match key.static_name() {
                        Some(name) => {
                            self.namer.push(&name);
                            self.visit_bound(value, &name, None);
                            self.namer.pop();
                        }
                        None => self.visit_expr(value),
                    }
                }
                PropKind::Shorthand { ident, default } => {
                    self.reference(ident, false);
                    if let Some(default) = default {
                        self.visit_expr(default);
                    }
                }
                PropKind::Method {
                    key,
                    kind,
                    function,
                } => {
                    self.visit_prop_key(key);
                    let site = SiteKind::ObjectMethod {
                        span: prop.span,
                        key: key.span().text(self.src).to_string(),
                        method: *kind,
                    };
                    self.visit_method(key, function, site);
                }
                PropKind::Spread(expr) => self.visit_expr(expr),
            }
        }
    }

    fn visit_method(&mut self, key: &PropKey, function: &Function, kind: SiteKind) {
        let name = key.static_name();
        if let Some(name) = &name {
            self.namer.push(name);
        }
        self.visit_function(
            function,
            Site {
                binding: name.clone(),
                kind,
                module: None,
            },
        );
        if name.is_some() {
            self.namer.pop();
        }
    }

    fn visit_prop_key(&mut self, key: &PropKey) {
        if let PropKey::Computed { expr, .. } = key {
            self.visit_expr(expr);
        }
    }

    /// An initializer directly bound to `name`, whose segment is on the path.
    fn visit_bound(&mut self, expr: &Expr, name: &str, module: Option<ModuleBinding>) {
        let inner = expr.unparenthesized();
        match &inner.kind {
            ExprKind::Function(function) | ExprKind::Arrow(function) => self.visit_function(
                function,
                Site {
                    binding: Some(name.to_string()),
                    kind: SiteKind::Expression(inner.span),
                    module,
                },
            ),
            ExprKind::Class(class) => self.visit_class(class, true),
            _ => self.visit_expr(expr),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn visit_block(&mut self, stmts: &[Stmt]) {
        self.scopes.enter_block(stmts);
        for stmt in stmts {
            self.visit_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn visit_var_decl(&mut self, decl: &VarDecl, top: Option<&Stmt>) {
        for declarator in &decl.declarators {
            self.visit_pattern(&declarator.id);
            let Some(init) = &declarator.init else {
                continue;
            };
            match &declarator.id.kind {
                PatternKind::Ident(ident) => {
                    let module = top.map(|stmt| self.module_binding(stmt, &ident.name, None));
                    self.namer.push(&ident.name);
                    self.visit_bound(init, &ident.name, module);
                    self.namer.pop();
                }
                _ => self.visit_expr(init),
            }
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                if let Some(directive @ (STEP_DIRECTIVE | WORKFLOW_DIRECTIVE)) = stmt.directive() {
                    let declaration = self
                        .declarations
                        .last()
                        .cloned()
                        .unwrap_or_else(|| MODULE.to_string());
                    self.diagnostic(
                        DiagnosticKind::MisplacedDirective,
                        format!("\"{directive}\" must be the first statement of its function body"),
                        &declaration,
                        stmt.span.start,
                    );
                }
                self.visit_expr(expr);
            }
            StmtKind::Var(decl) => self.visit_var_decl(decl, None),
            StmtKind::Function(function) => self.visit_function_declaration(function, None),
            StmtKind::Class(class) => self.visit_class(class, false),
            StmtKind::Block(block) => self.visit_block(&block.stmts),
            StmtKind::Empty
            | StmtKind::Debugger
            | StmtKind::Break(_)
            | StmtKind::Continue(_)
            | StmtKind::Import(_) => {}
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                self.visit_expr(test);
                self.visit_stmt(consequent);
                if let Some(alternate) = alternate {
                    self.visit_stmt(alternate);
                }
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                let decl = match init {
                    Some(ForInit::Var(decl)) => Some(decl),
                    _ => None,
                };
                self.scopes.enter_loop_head(decl);
                match init {
                    Some(ForInit::Var(decl)) => self.visit_var_decl(decl, None),
                    Some(ForInit::Expr(expr)) => self.visit_expr(expr),
                    None => {}
                }
                for expr in [test, update].into_iter().flatten() {
                    self.visit_expr(expr);
                }
                self.visit_stmt(body);
                self.scopes.pop();
            }
            StmtKind::ForIn {
                left, right, body, ..
            } => {
                let decl = match left {
                    ForHead::Var(decl) => Some(decl),
                    ForHead::Pattern(_) => None,
                };
                self.scopes.enter_loop_head(decl);
                match left {
                    ForHead::Var(decl) => self.visit_var_decl(decl, None),
                    ForHead::Pattern(pattern) => self.visit_assign_target(pattern),
                }
                self.visit_expr(right);
                self.visit_stmt(body);
                self.scopes.pop();
            }
            StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
                self.visit_expr(test);
                self.visit_stmt(body);
            }
            StmtKind::Return(arg) => {
                if let Some(arg) = arg {
                    self.visit_expr(arg);
                }
            }
            StmtKind::Throw(arg) => self.visit_expr(arg),
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                self.visit_block(&block.stmts);
                if let Some(handler) = handler {
                    self.scopes.push(ScopeKind::Block);
                    if let Some(param) = &handler.param {
                        self.scopes.declare_pattern(param);
                        self.visit_pattern(param);
                    }
                    self.visit_block(&handler.body.stmts);
                    self.scopes.pop();
                }
                if let Some(finalizer) = finalizer {
                    self.visit_block(&finalizer.stmts);
                }
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                self.visit_expr(discriminant);
                self.scopes.enter_switch(cases);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.visit_expr(test);
                    }
                    for stmt in &case.body {
                        self.visit_stmt(stmt);
                    }
                }
                self.scopes.pop();
            }
            StmtKind::Labeled { body, .. } => self.visit_stmt(body),
            StmtKind::Export(ExportDecl::Decl(inner)) => self.visit_stmt(inner),
            StmtKind::Export(ExportDecl::Default(default)) => {
                self.visit_default_export(stmt, default)
            }
            StmtKind::Export(ExportDecl::Named { .. } | ExportDecl::All { .. }) => {}
        }
    }

    // =========================================================================
    // Expressions and patterns
    // =========================================================================

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Ident(ident) => self.reference(ident, false),
            ExprKind::This
            | ExprKind::Super
            | ExprKind::Lit(_)
            | ExprKind::MetaProperty => {}
            ExprKind::Template(exprs) | ExprKind::Seq(exprs) | ExprKind::ImportCall(exprs) => {
                for expr in exprs {
                    self.visit_expr(expr);
                }
            }
            ExprKind::TaggedTemplate { tag, exprs } => {
                self.visit_expr(tag);
                for expr in exprs {
                    self.visit_expr(expr);
                }
            }
            ExprKind::Array(elements) => {
                for element in elements.iter().flatten() {
                    self.visit_expr(element);
                }
            }
            ExprKind::Object(props) => self.visit_object(props),
            ExprKind::Function(function) | ExprKind::Arrow(function) => {
                self.visit_function(function, Site::free(expr.span))
            }
            ExprKind::Class(class) => self.visit_class(class, false),
            ExprKind::Unary { arg, .. }
            | ExprKind::Spread(arg)
            | ExprKind::Await(arg)
            | ExprKind::Paren(arg) => self.visit_expr(arg),
            ExprKind::Update { arg, .. } => match &arg.unparenthesized().kind {
                ExprKind::Ident(ident) => self.reference(ident, true),
                _ => self.visit_expr(arg),
            },
            ExprKind::Binary { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            ExprKind::Assign { target, value, .. } => {
                self.visit_assign_target(target);
                self.visit_expr(value);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.visit_expr(test);
                self.visit_expr(consequent);
                self.visit_expr(alternate);
            }
            ExprKind::Call { callee, args, .. } | ExprKind::New { callee, args } => {
                self.visit_expr(callee);
                for arg in args {
                    self.visit_expr(arg);
                }
            }
            ExprKind::Member {
                object, property, ..
            } => {
                self.visit_expr(object);
                if let MemberProp::Computed(property) = property {
                    self.visit_expr(property);
                }
            }
            ExprKind::Yield { arg, .. } => {
                if let Some(arg) = arg {
                    self.visit_expr(arg);
                }
            }
        }
    }

    /// A declared pattern: only defaults and computed keys are evaluated.
    fn visit_pattern(&mut self, pattern: &Pattern) {
        match &pattern.kind {
            PatternKind::Ident(_) => {}
            PatternKind::Object(props) => {
                for prop in props {
                    match prop {
                        ObjectPatternProp::KeyValue { key, value } => {
                            self.visit_prop_key(key);
                            self.visit_pattern(value);
                        }
                        ObjectPatternProp::Shorthand { default, .. } => {
                            if let Some(default) = default {
                                self.visit_expr(default);
                            }
                        }
                        ObjectPatternProp::Rest(rest) => self.visit_pattern(rest),
                    }
                }
            }
            PatternKind::Array(elements) => {
                for element in elements.iter().flatten() {
                    self.visit_pattern(element);
                }
            }
            PatternKind::Rest(inner) => self.visit_pattern(inner),
            PatternKind::Default { target, default } => {
                self.visit_pattern(target);
                self.visit_expr(default);
            }
            PatternKind::Expr(expr) => self.visit_expr(expr),
        }
    }

    /// An assignment target: identifiers in it are written.
    fn visit_assign_target(&mut self, pattern: &Pattern) {
        match &pattern.kind {
            PatternKind::Ident(ident) => self.reference(ident, true),
            PatternKind::Object(props) => {
                for prop in props {
                    match prop {
                        ObjectPatternProp::KeyValue { key, value } => {
                            self.visit_prop_key(key);
                            self.visit_assign_target(value);
                        }
                        ObjectPatternProp::Shorthand { ident, default } => {
                            self.reference(ident, true);
                            if let Some(default) = default {
                                self.visit_expr(default);
                            }
                        }
                        ObjectPatternProp::Rest(rest) => self.visit_assign_target(rest),
                    }
                }
            }
            PatternKind::Array(elements) => {
                for element in elements.iter().flatten() {
                    self.visit_assign_target(element);
                }
            }
            PatternKind::Rest(inner) => self.visit_assign_target(inner),
            PatternKind::Default { target, default } => {
                self.visit_assign_target(target);
                self.visit_expr(default);
            }
            PatternKind::Expr(expr) => self.visit_expr(expr),
        }
    }

    /// Record a reference made inside a step to an enclosing function scope.
    fn reference(&mut self, ident: &Ident, write: bool) {
        let Some(frame) = &self.step else {
            return;
        };
        let Some(index) = self.scopes.resolve(&ident.name) else {
            return;
        };
        if index >= frame.scope_floor || self.scopes.kind(index) == Some(ScopeKind::Module) {
            return;
        }
        if write {
            let step = frame.name.clone();
            self.diagnostic(
                DiagnosticKind::CapturedAssignment,
                format!("steps cannot assign to captured variable `{}`", ident.name),
                &step,
                ident.span.start,
            );
        } else if let Some(frame) = &mut self.step {
            frame.captures.insert(ident.name.clone());
        }
    }
}

fn is_declaration(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Function(_) | StmtKind::Class(_) => true,
        StmtKind::Export(ExportDecl::Decl(inner)) => is_declaration(inner),
        StmtKind::Export(ExportDecl::Default(default)) => {
            matches!(default, DefaultExport::Function(_) | DefaultExport::Class(_))
        }
        _ => false,
    }
}
