//! Syntax tree for JavaScript modules.
//!
//! Every node carries the byte [`Span`] it was parsed from; the transform
//! rewrites the source by splicing those spans rather than re-printing.

use crate::span::Span;

#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Var(VarDecl),
    Function(Box<Function>),
    Class(Box<Class>),
    Block(Block),
    Empty,
    Debugger,
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    /// `for (… in …)` and `for (… of …)`
    ForIn {
        left: ForHead,
        right: Expr,
        body: Box<Stmt>,
        of: bool,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        block: Block,
        handler: Option<CatchClause>,
        finalizer: Option<Block>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
    Break(Option<Ident>),
    Continue(Option<Ident>),
    Labeled {
        label: Ident,
        body: Box<Stmt>,
    },
    Import(ImportDecl),
    Export(ExportDecl),
}

impl Stmt {
    /// The string value of a directive-shaped statement: an unparenthesized
    /// string literal expression.
    pub fn directive(&self) -> Option<&str> {
        match &self.kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Lit(Lit::Str { raw, .. }),
                ..
            }) => raw.get(1..raw.len().saturating_sub(1)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ForInit {
    Var(VarDecl),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum ForHead {
    Var(VarDecl),
    Pattern(Pattern),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub kind: VarKind,
    pub declarators: Vec<Declarator>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub id: Pattern,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub param: Option<Pattern>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// Local bindings introduced by the import.
    pub locals: Vec<Ident>,
    pub source: String,
}

#[derive(Debug, Clone)]
pub enum ExportDecl {
    /// `export var|let|const|function|class …`
    Decl(Box<Stmt>),
    Default(DefaultExport),
    Named {
        specifiers: Vec<ExportSpecifier>,
        source: Option<String>,
    },
    /// `export * [as name] from "…"`
    All { source: String },
}

#[derive(Debug, Clone)]
pub enum DefaultExport {
    Function(Box<Function>),
    Class(Box<Class>),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct ExportSpecifier {
    pub local: Ident,
    pub exported: Ident,
}

// =============================================================================
// Functions and classes
// =============================================================================

#[derive(Debug, Clone)]
pub struct Function {
    pub id: Option<Ident>,
    pub params: Vec<Pattern>,
    /// The parameter list, parentheses included (a bare arrow parameter has none).
    pub params_span: Span,
    pub body: FunctionBody,
    pub is_async: bool,
    pub is_generator: bool,
    pub is_arrow: bool,
    pub span: Span,
    /// Where a name would go in an anonymous `function` expression.
    pub name_pos: usize,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Block),
    Expr(Box<Expr>),
}

impl Function {
    pub fn block(&self) -> Option<&Block> {
        match &self.body {
            FunctionBody::Block(block) => Some(block),
            FunctionBody::Expr(_) => None,
        }
    }

    /// Leading directive statements of the body, in order.
    pub fn prologue(&self) -> impl Iterator<Item = (&str, &Stmt)> {
        self.block()
            .into_iter()
            .flat_map(|block| block.stmts.iter())
            .map_while(|stmt| stmt.directive().map(|value| (value, stmt)))
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub id: Option<Ident>,
    pub super_class: Option<Expr>,
    pub members: Vec<ClassMember>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ClassMember {
    pub kind: ClassMemberKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ClassMemberKind {
    Method {
        key: PropKey,
        kind: MethodKind,
        is_static: bool,
        function: Function,
    },
    Field {
        key: PropKey,
        value: Option<Expr>,
        is_static: bool,
    },
    StaticBlock(Block),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Method,
    Getter,
    Setter,
    Constructor,
}

#[derive(Debug, Clone)]
pub enum PropKey {
    Ident(Ident),
    Str { value: String, span: Span },
    Num { raw: String, span: Span },
    Computed { expr: Box<Expr>, span: Span },
    Private(Ident),
}

impl PropKey {
    pub fn span(&self) -> Span {
        match self {
            PropKey::Ident(ident) | PropKey::Private(ident) => ident.span,
            PropKey::Str { span, .. }
            | PropKey::Num { span, .. }
            | PropKey::Computed { span, .. } => *span,
        }
    }

    /// The key as a name, if it is known without evaluating anything.
    pub fn static_name(&self) -> Option<String> {
        match self {
            PropKey::Ident(ident) => Some(ident.name.clone()),
            PropKey::Private(ident) => Some(ident.name.trim_start_matches('#').to_string()),
            PropKey::Str { value, .. } => Some(value.clone()),
            PropKey::Num { raw, .. } => Some(raw.clone()),
            PropKey::Computed { .. } => None,
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Ident(Ident),
    This,
    Super,
    Lit(Lit),
    Template(Vec<Expr>),
    TaggedTemplate {
        tag: Box<Expr>,
        exprs: Vec<Expr>,
    },
    /// Holes are `None`; spread elements are [`ExprKind::Spread`].
    Array(Vec<Option<Expr>>),
    Object(Vec<Prop>),
    Function(Box<Function>),
    Arrow(Box<Function>),
    Class(Box<Class>),
    Unary {
        op: String,
        arg: Box<Expr>,
    },
    Update {
        op: String,
        prefix: bool,
        arg: Box<Expr>,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: String,
        target: Box<Pattern>,
        value: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    /// `import(…)`
    ImportCall(Vec<Expr>),
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: MemberProp,
        optional: bool,
    },
    Seq(Vec<Expr>),
    Spread(Box<Expr>),
    Yield {
        arg: Option<Box<Expr>>,
        delegate: bool,
    },
    Await(Box<Expr>),
    Paren(Box<Expr>),
    /// `new.target`, `import.meta`
    MetaProperty,
}

impl Expr {
    /// The expression with any wrapping parentheses removed.
    pub fn unparenthesized(&self) -> &Expr {
        match &self.kind {
            ExprKind::Paren(inner) => inner.unparenthesized(),
            _ => self,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Lit {
    Str { value: String, raw: String },
    Num(String),
    BigInt(String),
    Bool(bool),
    Null,
    Regex(String),
}

#[derive(Debug, Clone)]
pub enum MemberProp {
    Ident(Ident),
    Private(Ident),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct Prop {
    pub kind: PropKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PropKind {
    KeyValue {
        key: PropKey,
        value: Expr,
    },
    /// `{ a }`, or `{ a = 1 }` when the literal is reinterpreted as a pattern.
    Shorthand {
        ident: Ident,
        default: Option<Expr>,
    },
    Method {
        key: PropKey,
        kind: MethodKind,
        function: Function,
    },
    Spread(Expr),
}

// =============================================================================
// Patterns
// =============================================================================

#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    Ident(Ident),
    Object(Vec<ObjectPatternProp>),
    Array(Vec<Option<Pattern>>),
    Rest(Box<Pattern>),
    /// `target = default`
    Default {
        target: Box<Pattern>,
        default: Box<Expr>,
    },
    /// A member expression assigned to.
    Expr(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum ObjectPatternProp {
    KeyValue { key: PropKey, value: Pattern },
    Shorthand { ident: Ident, default: Option<Expr> },
    Rest(Pattern),
}

impl Pattern {
    /// Identifiers the pattern binds, in source order.
    pub fn bound_names(&self) -> Vec<&Ident> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a Ident>) {
        match &self.kind {
            PatternKind::Ident(ident) => names.push(ident),
            PatternKind::Object(props) => {
                for prop in props {
                    match prop {
                        ObjectPatternProp::KeyValue { value, .. } => value.collect_names(names),
                        ObjectPatternProp::Shorthand { ident, .. } => names.push(ident),
                        ObjectPatternProp::Rest(rest) => rest.collect_names(names),
                    }
                }
            }
            PatternKind::Array(elements) => {
                for element in elements.iter().flatten() {
                    element.collect_names(names);
                }
            }
            PatternKind::Rest(inner) => inner.collect_names(names),
            PatternKind::Default { target, .. } => target.collect_names(names),
            PatternKind::Expr(_) => {}
        }
    }
}
