//! Parser: recursive descent over the lexer's token stream.
//!
//! Produces a [`Program`] for ES module source. TypeScript syntax and JSX
//! are not accepted. Arrow functions are recognised by attempting a
//! parameter list and backtracking when no `=>` follows.

mod expression;
mod statement;

use crate::ast::{Ident, Program, Stmt, StmtKind};
use crate::error::SyntaxError;
use crate::lexer::{Token, TokenKind, tokenize};
use crate::span::Span;

pub type ParseResult<T> = Result<T, SyntaxError>;

/// Words that can never be identifier references.
const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "enum", "export", "extends", "false", "finally", "for", "function", "if", "import",
    "in", "instanceof", "new", "null", "return", "super", "switch", "this", "throw", "true", "try",
    "typeof", "var", "void", "while", "with",
];

/// Words that cannot name a binding in module code.
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED.contains(&name)
        || matches!(
            name,
            "await" | "yield" | "let" | "static" | "implements" | "interface" | "package"
                | "private" | "protected" | "public" | "arguments" | "eval"
        )
}

/// Parse a module.
pub fn parse(src: &str) -> ParseResult<Program> {
    let tokens = tokenize(src)?;
    Parser::new(tokens).parse_program(src.len())
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// `in` is a binary operator here (false inside a `for` initializer).
    allow_in: bool,
    /// `await` is an operator here (true at module top level).
    in_async: bool,
    /// `yield` is an operator here.
    in_generator: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            allow_in: true,
            in_async: true,
            in_generator: false,
        }
    }

    fn parse_program(&mut self, len: usize) -> ParseResult<Program> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.parse_statement()?);
        }
        Ok(Program {
            body,
            span: Span::new(0, len),
        })
    }

    // =========================================================================
    // Token access
    // =========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, n: usize) -> &Token {
        let index = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn is_punct(&self, punct: &str) -> bool {
        self.is_punct_at(0, punct)
    }

    fn is_punct_at(&self, n: usize, punct: &str) -> bool {
        let token = self.peek_at(n);
        token.kind == TokenKind::Punct && token.text == punct
    }

    fn is_word(&self, word: &str) -> bool {
        self.is_word_at(0, word)
    }

    fn is_word_at(&self, n: usize, word: &str) -> bool {
        let token = self.peek_at(n);
        token.kind == TokenKind::Identifier && token.text == word
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        let matched = self.is_punct(punct);
        if matched {
            self.advance();
        }
        matched
    }

    fn eat_word(&mut self, word: &str) -> bool {
        let matched = self.is_word(word);
        if matched {
            self.advance();
        }
        matched
    }

    fn expect_punct(&mut self, punct: &str) -> ParseResult<Token> {
        if self.is_punct(punct) {
            Ok(self.advance())
        } else {
            Err(self.expected(&format!("`{punct}`")))
        }
    }

    fn expect_word(&mut self, word: &str) -> ParseResult<Token> {
        if self.is_word(word) {
            Ok(self.advance())
        } else {
            Err(self.expected(&format!("`{word}`")))
        }
    }

    fn expected(&self, what: &str) -> SyntaxError {
        let token = self.peek();
        let found = match token.kind {
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("`{}`", token.text),
        };
        SyntaxError::new(format!("expected {what}, found {found}"), token.span)
    }

    // =========================================================================
    // Spans
    // =========================================================================

    fn start(&self) -> usize {
        self.peek().span.start
    }

    fn prev_end(&self) -> usize {
        match self.pos {
            0 => 0,
            pos => self.tokens[pos - 1].span.end,
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end().max(start))
    }

    fn stmt(&self, kind: StmtKind, start: usize) -> Stmt {
        Stmt {
            kind,
            span: self.span_from(start),
        }
    }

    // =========================================================================
    // Shared productions
    // =========================================================================

    /// Automatic semicolon insertion: a `;`, or a line break, `}` or the end
    /// of input ahead.
    fn consume_semicolon(&mut self) -> ParseResult<()> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() || self.peek().newline_before
        {
            Ok(())
        } else {
            Err(self.expected("`;`"))
        }
    }

    fn is_identifier_token(&self) -> bool {
        let token = self.peek();
        token.kind == TokenKind::Identifier && !RESERVED.contains(&token.text.as_str())
    }

    fn parse_binding_ident(&mut self) -> ParseResult<Ident> {
        if !self.is_identifier_token() {
            return Err(self.expected("an identifier"));
        }
        let token = self.advance();
        Ok(Ident {
            name: token.text,
            span: token.span,
        })
    }

    /// Any identifier-shaped word, keywords included (property names).
    fn parse_name(&mut self) -> ParseResult<Ident> {
        if self.peek().kind != TokenKind::Identifier {
            return Err(self.expected("a name"));
        }
        let token = self.advance();
        Ok(Ident {
            name: token.text,
            span: token.span,
        })
    }

    /// Run `f` inside a function body with the given `async`/generator flags.
    fn with_context<T>(
        &mut self,
        is_async: bool,
        is_generator: bool,
        f: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        let saved = (self.in_async, self.in_generator, self.allow_in);
        self.in_async = is_async;
        self.in_generator = is_generator;
        self.allow_in = true;
        let result = f(self);
        (self.in_async, self.in_generator, self.allow_in) = saved;
        result
    }

    fn with_allow_in<T>(
        &mut self,
        allow_in: bool,
        f: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        let saved = self.allow_in;
        self.allow_in = allow_in;
        let result = f(self);
        self.allow_in = saved;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        DefaultExport, ExportDecl, ExprKind, ForHead, FunctionBody, PatternKind, PropKind,
        StmtKind,
    };

    fn parse_ok(src: &str) -> Program {
        match parse(src) {
            Ok(program) => program,
            Err(e) => panic!("failed to parse {src:?}: {e} at {:?}", e.span),
        }
    }

    fn only_expr(src: &str) -> crate::ast::Expr {
        let program = parse_ok(src);
        match program.body.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expr(expr)) => expr,
            other => panic!("expected an expression statement, got {other:?}"),
        }
    }

    #[test]
    fn parses_a_realistic_module() {
        let src = r#"
import { sleep } from "waystone";
import db, * as util from "./db.js";

const TAX = 0.2;

export async function checkout(order, { retries = 3 } = {}) {
    "use workflow";
    const total = order.items.reduce((sum, item) => sum + item.price, 0);
    for (const [i, item] of order.items.entries()) {
        if (!item) continue;
    }
    for (let i = 0, n = 2; i < n; i++) {}
    for (key in order) {}
    label: while (true) { break label; }
    do { retries-- } while (retries > 0)
    try { await sleep(`${total * TAX}s`); } catch { } finally {}
    switch (order.kind) { case "a": break; default: }
    return total ?? null;
}

export default class Cart extends Base {
    static #count = 0;
    items = [];
    static { Cart.#count++; }
    constructor() { super(); }
    get size() { return this.items.length; }
    async *stream() { yield* this.items; }
}

export { TAX as rate };
export * from "./other.js";
"#;
        let program = parse_ok(src);
        assert_eq!(program.body.len(), 7);
    }

    #[test]
    fn arrow_functions_are_recognised() {
        let expr = only_expr("async (a, { b }) => { return a + b; }");
        let ExprKind::Arrow(function) = expr.kind else {
            panic!("expected arrow");
        };
        assert!(function.is_async);
        assert_eq!(function.params.len(), 2);
        assert!(matches!(function.body, FunctionBody::Block(_)));

        let expr = only_expr("x => x * 2");
        assert!(matches!(expr.kind, ExprKind::Arrow(_)));

        // A parenthesized expression is not an arrow.
        let expr = only_expr("(a, b)");
        assert!(matches!(expr.kind, ExprKind::Paren(_)));

        // `async(...)` without `=>` is a call.
        let expr = only_expr("async(1)");
        assert!(matches!(expr.kind, ExprKind::Call { .. }));
    }

    #[test]
    fn destructuring_assignment_becomes_a_pattern() {
        let expr = only_expr("[a, b = 2, ...rest] = list");
        let ExprKind::Assign { target, .. } = expr.kind else {
            panic!("expected assignment");
        };
        let names: Vec<&str> = target
            .bound_names()
            .into_iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "rest"]);

        let expr = only_expr("({ a, b: { c } } = obj)");
        let ExprKind::Paren(inner) = expr.kind else {
            panic!("expected parens");
        };
        assert!(matches!(
            inner.kind,
            ExprKind::Assign { ref target, .. } if matches!(target.kind, PatternKind::Object(_))
        ));
    }

    #[test]
    fn object_literal_members() {
        let expr = only_expr("({ a, b: 1, [k]: 2, async run() {}, get x() { return 1; }, *gen() {}, ...rest, get: 3 })");
        let ExprKind::Paren(inner) = expr.kind else {
            panic!("expected parens");
        };
        let ExprKind::Object(props) = inner.kind else {
            panic!("expected object");
        };
        assert_eq!(props.len(), 8);
        assert!(matches!(props[3].kind, PropKind::Method { ref function, .. } if function.is_async));
        assert!(matches!(props[7].kind, PropKind::KeyValue { .. }));
    }

    #[test]
    fn asi_and_restricted_productions() {
        let program = parse_ok("let a = 1\nlet b = a\n++b\nfunction f() { return\n42 }");
        assert_eq!(program.body.len(), 4);

        assert!(parse("let a = 1 let b = 2").is_err());
    }

    #[test]
    fn for_of_with_declarations_and_patterns() {
        let program = parse_ok("for (const x of xs) {}\nfor ([a, b] of pairs) {}");
        assert!(matches!(
            program.body[0].kind,
            StmtKind::ForIn { of: true, left: ForHead::Var(_), .. }
        ));
        assert!(matches!(
            program.body[1].kind,
            StmtKind::ForIn { left: ForHead::Pattern(_), .. }
        ));
    }

    #[test]
    fn anonymous_default_export_function() {
        let program = parse_ok("export default async function () { \"use step\"; }");
        let StmtKind::Export(ExportDecl::Default(DefaultExport::Function(function))) =
            &program.body[0].kind
        else {
            panic!("expected default export");
        };
        assert!(function.id.is_none());
        assert_eq!(function.prologue().next().map(|(value, _)| value), Some("use step"));
    }

    #[test]
    fn syntax_errors_carry_a_span() {
        let err = parse("const x = ;").unwrap_err();
        assert_eq!(err.message, "expected an expression, found `;`");
        assert_eq!(err.span, Span::new(10, 11));
    }
}
