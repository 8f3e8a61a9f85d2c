//! Expressions, patterns, functions and classes.

use super::{ParseResult, Parser, RESERVED};
use crate::ast::{
    Class, ClassMember, ClassMemberKind, Expr, ExprKind, Function, FunctionBody, Ident, Lit,
    MemberProp, MethodKind, ObjectPatternProp, Pattern, PatternKind, Prop, PropKey, PropKind,
};
use crate::error::SyntaxError;
use crate::lexer::{TokenKind, string_value};
use crate::span::Span;

const ASSIGN_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=", "||=",
    "??=",
];

impl Parser {
    pub(super) fn parse_expression(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let first = self.parse_assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat_punct(",") {
            exprs.push(self.parse_assignment()?);
        }
        Ok(self.expr(ExprKind::Seq(exprs), start))
    }

    pub(super) fn parse_assignment(&mut self) -> ParseResult<Expr> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }
        if self.in_generator && self.is_word("yield") {
            return self.parse_yield();
        }

        let start = self.start();
        let left = self.parse_conditional()?;
        let token = self.peek();
        if token.kind != TokenKind::Punct || !ASSIGN_OPS.contains(&token.text.as_str()) {
            return Ok(left);
        }
        let op = self.advance().text;
        let target = if op == "=" {
            self.to_pattern(left)?
        } else {
            self.to_simple_target(left)?
        };
        let value = self.parse_assignment()?;
        Ok(self.expr(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            start,
        ))
    }

    fn expr(&self, kind: ExprKind, start: usize) -> Expr {
        Expr {
            kind,
            span: self.span_from(start),
        }
    }

    // =========================================================================
    // Arrow functions
    // =========================================================================

    /// Parse an arrow function if one starts here; otherwise leave the
    /// position untouched.
    fn try_parse_arrow(&mut self) -> ParseResult<Option<Expr>> {
        let start = self.start();
        let is_async = self.is_word("async")
            && !self.peek_at(1).newline_before
            && ((self.peek_at(1).kind == TokenKind::Identifier && self.is_punct_at(2, "=>"))
                || self.is_punct_at(1, "("));
        let offset = usize::from(is_async);

        let param = self.peek_at(offset);
        let single_param = param.kind == TokenKind::Identifier
            && !RESERVED.contains(&param.text.as_str())
            && self.is_punct_at(offset + 1, "=>")
            && !self.peek_at(offset + 1).newline_before;
        if single_param {
            if is_async {
                self.advance();
            }
            let param = self.parse_binding_ident()?;
            let params_span = param.span;
            self.advance();
            let params = vec![Pattern {
                span: param.span,
                kind: PatternKind::Ident(param),
            }];
            return self
                .parse_arrow_body(start, params, params_span, is_async)
                .map(Some);
        }

        if !self.is_punct_at(offset, "(") {
            return Ok(None);
        }
        let saved = self.pos;
        if is_async {
            self.advance();
        }
        let params_start = self.start();
        match self.parse_params() {
            Ok(params) if self.is_punct("=>") && !self.peek().newline_before => {
                let params_span = self.span_from(params_start);
                self.advance();
                self.parse_arrow_body(start, params, params_span, is_async)
                    .map(Some)
            }
            _ => {
                self.pos = saved;
                Ok(None)
            }
        }
    }

    fn parse_arrow_body(
        &mut self,
        start: usize,
        params: Vec<Pattern>,
        params_span: Span,
        is_async: bool,
    ) -> ParseResult<Expr> {
        let body = self.with_context(is_async, false, |p| {
            if p.is_punct("{") {
                Ok(FunctionBody::Block(p.parse_block()?))
            } else {
                Ok(FunctionBody::Expr(Box::new(p.parse_assignment()?)))
            }
        })?;
        let span = self.span_from(start);
        let function = Function {
            id: None,
            params,
            params_span,
            body,
            is_async,
            is_generator: false,
            is_arrow: true,
            span,
            name_pos: start,
        };
        Ok(Expr {
            kind: ExprKind::Arrow(Box::new(function)),
            span,
        })
    }

    fn parse_yield(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.advance();
        if self.peek().newline_before || !self.can_start_expression() {
            return Ok(self.expr(
                ExprKind::Yield {
                    arg: None,
                    delegate: false,
                },
                start,
            ));
        }
        let delegate = self.eat_punct("*");
        let arg = self.parse_assignment()?;
        Ok(self.expr(
            ExprKind::Yield {
                arg: Some(Box::new(arg)),
                delegate,
            },
            start,
        ))
    }

    fn can_start_expression(&self) -> bool {
        let token = self.peek();
        match token.kind {
            TokenKind::Eof | TokenKind::TemplateMiddle | TokenKind::TemplateTail => false,
            TokenKind::Punct => !matches!(
                token.text.as_str(),
                ")" | "]" | "}" | "," | ";" | ":" | "=>" | "?"
            ),
            TokenKind::Identifier => !matches!(token.text.as_str(), "in" | "of" | "instanceof"),
            _ => true,
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let test = self.parse_binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.with_allow_in(true, |p| p.parse_assignment())?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(self.expr(
            ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            start,
        ))
    }

    /// Precedence climbing over binary operators binding at least `min_prec`.
    fn parse_binary(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let start = self.start();
        let mut left = self.parse_unary()?;
        while let Some(prec) = self.binary_precedence() {
            if prec < min_prec {
                break;
            }
            let op = self.advance().text;
            // `**` is right-associative.
            let next_min = if op == "**" { prec } else { prec + 1 };
            let right = self.parse_binary(next_min)?;
            left = self.expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                start,
            );
        }
        Ok(left)
    }

    fn binary_precedence(&self) -> Option<u8> {
        let token = self.peek();
        let prec = match (token.kind, token.text.as_str()) {
            (TokenKind::Punct, "??") => 1,
            (TokenKind::Punct, "||") => 2,
            (TokenKind::Punct, "&&") => 3,
            (TokenKind::Punct, "|") => 4,
            (TokenKind::Punct, "^") => 5,
            (TokenKind::Punct, "&") => 6,
            (TokenKind::Punct, "==" | "!=" | "===" | "!==") => 7,
            (TokenKind::Punct, "<" | ">" | "<=" | ">=") => 8,
            (TokenKind::Identifier, "instanceof") => 8,
            (TokenKind::Identifier, "in") if self.allow_in => 8,
            (TokenKind::Punct, "<<" | ">>" | ">>>") => 9,
            (TokenKind::Punct, "+" | "-") => 10,
            (TokenKind::Punct, "*" | "/" | "%") => 11,
            (TokenKind::Punct, "**") => 12,
            _ => return None,
        };
        Some(prec)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let token = self.peek();
        let is_unary = match token.kind {
            TokenKind::Punct => matches!(token.text.as_str(), "!" | "~" | "+" | "-"),
            TokenKind::Identifier => matches!(token.text.as_str(), "typeof" | "void" | "delete"),
            _ => false,
        };
        if is_unary {
            let op = self.advance().text;
            let arg = self.parse_unary()?;
            return Ok(self.expr(
                ExprKind::Unary {
                    op,
                    arg: Box::new(arg),
                },
                start,
            ));
        }
        if self.is_punct("++") || self.is_punct("--") {
            let op = self.advance().text;
            let arg = self.parse_unary()?;
            return Ok(self.expr(
                ExprKind::Update {
                    op,
                    prefix: true,
                    arg: Box::new(arg),
                },
                start,
            ));
        }
        if self.in_async && self.is_word("await") {
            self.advance();
            let arg = self.parse_unary()?;
            return Ok(self.expr(ExprKind::Await(Box::new(arg)), start));
        }

        let expr = self.parse_call_member()?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.peek().newline_before {
            let op = self.advance().text;
            return Ok(self.expr(
                ExprKind::Update {
                    op,
                    prefix: false,
                    arg: Box::new(expr),
                },
                start,
            ));
        }
        Ok(expr)
    }

    // =========================================================================
    // Calls and members
    // =========================================================================

    pub(super) fn parse_call_member(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let mut expr = if self.is_word("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            if self.eat_punct(".") {
                let property = self.parse_member_name()?;
                expr = self.member(expr, property, false, start);
            } else if self.eat_punct("?.") {
                if self.is_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = self.expr(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            optional: true,
                        },
                        start,
                    );
                } else if self.eat_punct("[") {
                    let property = self.parse_computed_member()?;
                    expr = self.member(expr, property, true, start);
                } else {
                    let property = self.parse_member_name()?;
                    expr = self.member(expr, property, true, start);
                }
            } else if self.eat_punct("[") {
                let property = self.parse_computed_member()?;
                expr = self.member(expr, property, false, start);
            } else if self.is_punct("(") {
                let args = self.parse_arguments()?;
                expr = self.expr(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                        optional: false,
                    },
                    start,
                );
            } else if self.at_template() {
                let exprs = self.parse_template()?;
                expr = self.expr(
                    ExprKind::TaggedTemplate {
                        tag: Box::new(expr),
                        exprs,
                    },
                    start,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_new(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.advance();
        if self.eat_punct(".") {
            self.parse_name()?;
            return Ok(self.expr(ExprKind::MetaProperty, start));
        }
        let mut callee = if self.is_word("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            if self.eat_punct(".") {
                let property = self.parse_member_name()?;
                callee = self.member(callee, property, false, start);
            } else if self.eat_punct("[") {
                let property = self.parse_computed_member()?;
                callee = self.member(callee, property, false, start);
            } else if self.at_template() {
                let exprs = self.parse_template()?;
                callee = self.expr(
                    ExprKind::TaggedTemplate {
                        tag: Box::new(callee),
                        exprs,
                    },
                    start,
                );
            } else {
                break;
            }
        }
        let args = if self.is_punct("(") {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(self.expr(
            ExprKind::New {
                callee: Box::new(callee),
                args,
            },
            start,
        ))
    }

    fn member(&self, object: Expr, property: MemberProp, optional: bool, start: usize) -> Expr {
        self.expr(
            ExprKind::Member {
                object: Box::new(object),
                property,
                optional,
            },
            start,
        )
    }

    fn parse_member_name(&mut self) -> ParseResult<MemberProp> {
        if self.peek().kind == TokenKind::PrivateName {
            let token = self.advance();
            return Ok(MemberProp::Private(Ident {
                name: token.text,
                span: token.span,
            }));
        }
        Ok(MemberProp::Ident(self.parse_name()?))
    }

    /// The rest of `[expr]` after the opening bracket.
    fn parse_computed_member(&mut self) -> ParseResult<MemberProp> {
        let property = self.with_allow_in(true, |p| p.parse_expression())?;
        self.expect_punct("]")?;
        Ok(MemberProp::Computed(Box::new(property)))
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect_punct("(")?;
        self.with_allow_in(true, |p| {
            let mut args = Vec::new();
            while !p.eat_punct(")") {
                args.push(p.parse_spread_or_assignment()?);
                if !p.is_punct(")") {
                    p.expect_punct(",")?;
                }
            }
            Ok(args)
        })
    }

    fn parse_spread_or_assignment(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        if self.eat_punct("...") {
            let arg = self.parse_assignment()?;
            return Ok(self.expr(ExprKind::Spread(Box::new(arg)), start));
        }
        self.parse_assignment()
    }

    // =========================================================================
    // Primary expressions
    // =========================================================================

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                Ok(self.expr(ExprKind::Lit(Lit::Num(token.text)), start))
            }
            TokenKind::BigInt => {
                self.advance();
                Ok(self.expr(ExprKind::Lit(Lit::BigInt(token.text)), start))
            }
            TokenKind::String => {
                self.advance();
                let value = string_value(&token.text);
                Ok(self.expr(
                    ExprKind::Lit(Lit::Str {
                        value,
                        raw: token.text,
                    }),
                    start,
                ))
            }
            TokenKind::Regex => {
                self.advance();
                Ok(self.expr(ExprKind::Lit(Lit::Regex(token.text)), start))
            }
            TokenKind::Template | TokenKind::TemplateHead => {
                let exprs = self.parse_template()?;
                Ok(self.expr(ExprKind::Template(exprs), start))
            }
            // `#field in object`
            TokenKind::PrivateName => {
                self.advance();
                Ok(self.expr(ExprKind::MetaProperty, start))
            }
            TokenKind::Punct => match token.text.as_str() {
                "(" => {
                    self.advance();
                    let inner = self.with_allow_in(true, |p| p.parse_expression())?;
                    self.expect_punct(")")?;
                    Ok(self.expr(ExprKind::Paren(Box::new(inner)), start))
                }
                "[" => self.parse_array(),
                "{" => self.parse_object(),
                _ => Err(self.expected("an expression")),
            },
            TokenKind::Identifier => match token.text.as_str() {
                "function" => {
                    let function = self.parse_function(false)?;
                    Ok(self.expr(ExprKind::Function(Box::new(function)), start))
                }
                "async" if self.starts_async_function() => {
                    let function = self.parse_function(false)?;
                    Ok(self.expr(ExprKind::Function(Box::new(function)), start))
                }
                "class" => {
                    let class = self.parse_class(false)?;
                    Ok(self.expr(ExprKind::Class(Box::new(class)), start))
                }
                "this" => {
                    self.advance();
                    Ok(self.expr(ExprKind::This, start))
                }
                "super" => {
                    self.advance();
                    Ok(self.expr(ExprKind::Super, start))
                }
                "null" => {
                    self.advance();
                    Ok(self.expr(ExprKind::Lit(Lit::Null), start))
                }
                "true" | "false" => {
                    self.advance();
                    Ok(self.expr(ExprKind::Lit(Lit::Bool(token.text == "true")), start))
                }
                "import" => {
                    self.advance();
                    if self.eat_punct(".") {
                        self.parse_name()?;
                        return Ok(self.expr(ExprKind::MetaProperty, start));
                    }
                    let args = self.parse_arguments()?;
                    Ok(self.expr(ExprKind::ImportCall(args), start))
                }
                "new" => self.parse_new(),
                _ if self.is_identifier_token() => {
                    let ident = self.parse_binding_ident()?;
                    Ok(self.expr(ExprKind::Ident(ident), start))
                }
                _ => Err(self.expected("an expression")),
            },
            _ => Err(self.expected("an expression")),
        }
    }

    fn at_template(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Template | TokenKind::TemplateHead
        )
    }

    /// The substitutions of a template literal.
    fn parse_template(&mut self) -> ParseResult<Vec<Expr>> {
        let head = self.advance();
        let mut exprs = Vec::new();
        if head.kind == TokenKind::Template {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.with_allow_in(true, |p| p.parse_expression())?);
            let part = self.advance();
            match part.kind {
                TokenKind::TemplateMiddle => {}
                TokenKind::TemplateTail => return Ok(exprs),
                _ => {
                    return Err(SyntaxError::new(
                        "unterminated template substitution",
                        part.span,
                    ));
                }
            }
        }
    }

    fn parse_array(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.expect_punct("[")?;
        let elements = self.with_allow_in(true, |p| {
            let mut elements = Vec::new();
            loop {
                if p.eat_punct("]") {
                    return Ok(elements);
                }
                if p.eat_punct(",") {
                    elements.push(None);
                    continue;
                }
                elements.push(Some(p.parse_spread_or_assignment()?));
                if !p.is_punct("]") {
                    p.expect_punct(",")?;
                }
            }
        })?;
        Ok(self.expr(ExprKind::Array(elements), start))
    }

    fn parse_object(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.expect_punct("{")?;
        let props = self.with_allow_in(true, |p| {
            let mut props = Vec::new();
            while !p.eat_punct("}") {
                props.push(p.parse_property()?);
                if !p.is_punct("}") {
                    p.expect_punct(",")?;
                }
            }
            Ok(props)
        })?;
        Ok(self.expr(ExprKind::Object(props), start))
    }

    fn parse_property(&mut self) -> ParseResult<Prop> {
        let start = self.start();
        if self.eat_punct("...") {
            let arg = self.parse_assignment()?;
            return Ok(Prop {
                kind: PropKind::Spread(arg),
                span: self.span_from(start),
            });
        }

        let (kind, is_async, is_generator) = self.parse_method_modifiers();
        let has_modifiers = kind != MethodKind::Method || is_async || is_generator;
        let key = self.parse_prop_key()?;

        let kind = if has_modifiers || self.is_punct("(") {
            let function = self.parse_method_function(is_async, is_generator)?;
            PropKind::Method {
                key,
                kind,
                function,
            }
        } else if self.eat_punct(":") {
            let value = self.parse_assignment()?;
            PropKind::KeyValue { key, value }
        } else {
            let PropKey::Ident(ident) = key else {
                return Err(self.expected("`:`"));
            };
            if RESERVED.contains(&ident.name.as_str()) {
                return Err(SyntaxError::new(
                    format!("`{}` cannot be used as a shorthand property", ident.name),
                    ident.span,
                ));
            }
            let default = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            PropKind::Shorthand { ident, default }
        };
        Ok(Prop {
            kind,
            span: self.span_from(start),
        })
    }

    /// `async`, `get`, `set` and `*` before a method key. A modifier word
    /// that is itself the key (`get: 1`, `async() {}`) is left in place.
    fn parse_method_modifiers(&mut self) -> (MethodKind, bool, bool) {
        let mut kind = MethodKind::Method;
        let mut is_async = false;
        if self.is_word("async") && !self.next_is_key_end() && !self.peek_at(1).newline_before {
            self.advance();
            is_async = true;
        } else if (self.is_word("get") || self.is_word("set")) && !self.next_is_key_end() {
            kind = if self.advance().text == "get" {
                MethodKind::Getter
            } else {
                MethodKind::Setter
            };
        }
        let is_generator = self.eat_punct("*");
        (kind, is_async, is_generator)
    }

    fn next_is_key_end(&self) -> bool {
        let next = self.peek_at(1);
        match next.kind {
            TokenKind::Eof => true,
            TokenKind::Punct => matches!(next.text.as_str(), "(" | ":" | "=" | "," | ";" | "}"),
            _ => false,
        }
    }

    fn parse_prop_key(&mut self) -> ParseResult<PropKey> {
        let start = self.start();
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Identifier => {
                self.advance();
                Ok(PropKey::Ident(Ident {
                    name: token.text,
                    span: token.span,
                }))
            }
            TokenKind::PrivateName => {
                self.advance();
                Ok(PropKey::Private(Ident {
                    name: token.text,
                    span: token.span,
                }))
            }
            TokenKind::String => {
                self.advance();
                Ok(PropKey::Str {
                    value: string_value(&token.text),
                    span: token.span,
                })
            }
            TokenKind::Number | TokenKind::BigInt => {
                self.advance();
                Ok(PropKey::Num {
                    raw: token.text,
                    span: token.span,
                })
            }
            TokenKind::Punct if token.text == "[" => {
                self.advance();
                let expr = self.with_allow_in(true, |p| p.parse_assignment())?;
                self.expect_punct("]")?;
                Ok(PropKey::Computed {
                    expr: Box::new(expr),
                    span: self.span_from(start),
                })
            }
            _ => Err(self.expected("a property name")),
        }
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// `[async] function [*] [name] (params) { body }`
    pub(super) fn parse_function(&mut self, name_required: bool) -> ParseResult<Function> {
        let start = self.start();
        let is_async = self.eat_word("async");
        self.expect_word("function")?;
        let is_generator = self.eat_punct("*");
        let name_pos = self.prev_end();
        let id = if self.is_identifier_token() {
            Some(self.parse_binding_ident()?)
        } else if name_required {
            return Err(self.expected("a function name"));
        } else {
            None
        };
        self.parse_function_rest(start, id, is_async, is_generator, name_pos)
    }

    fn parse_method_function(&mut self, is_async: bool, is_generator: bool) -> ParseResult<Function> {
        let start = self.start();
        self.parse_function_rest(start, None, is_async, is_generator, start)
    }

    fn parse_function_rest(
        &mut self,
        start: usize,
        id: Option<Ident>,
        is_async: bool,
        is_generator: bool,
        name_pos: usize,
    ) -> ParseResult<Function> {
        self.with_context(is_async, is_generator, |p| {
            let params_start = p.start();
            let params = p.parse_params()?;
            let params_span = p.span_from(params_start);
            let body = p.parse_block()?;
            Ok(Function {
                id,
                params,
                params_span,
                body: FunctionBody::Block(body),
                is_async,
                is_generator,
                is_arrow: false,
                span: p.span_from(start),
                name_pos,
            })
        })
    }

    /// A parenthesized formal parameter list.
    pub(super) fn parse_params(&mut self) -> ParseResult<Vec<Pattern>> {
        self.expect_punct("(")?;
        self.with_allow_in(true, |p| {
            let mut params = Vec::new();
            while !p.eat_punct(")") {
                let start = p.start();
                if p.eat_punct("...") {
                    let target = p.parse_binding_target()?;
                    params.push(Pattern {
                        kind: PatternKind::Rest(Box::new(target)),
                        span: p.span_from(start),
                    });
                } else {
                    params.push(p.parse_binding_element()?);
                }
                if !p.is_punct(")") {
                    p.expect_punct(",")?;
                }
            }
            Ok(params)
        })
    }

    // =========================================================================
    // Classes
    // =========================================================================

    pub(super) fn parse_class(&mut self, name_required: bool) -> ParseResult<Class> {
        let start = self.start();
        self.expect_word("class")?;
        let id = if self.is_identifier_token() {
            Some(self.parse_binding_ident()?)
        } else if name_required {
            return Err(self.expected("a class name"));
        } else {
            None
        };
        let super_class = if self.eat_word("extends") {
            Some(self.parse_call_member()?)
        } else {
            None
        };
        self.expect_punct("{")?;
        let mut members = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct(";") {
                continue;
            }
            members.push(self.parse_class_member()?);
        }
        Ok(Class {
            id,
            super_class,
            members,
            span: self.span_from(start),
        })
    }

    fn parse_class_member(&mut self) -> ParseResult<ClassMember> {
        let start = self.start();
        let mut is_static = false;
        if self.is_word("static") && !self.next_is_key_end() {
            self.advance();
            if self.is_punct("{") {
                let block = self.with_context(false, false, |p| p.parse_block())?;
                return Ok(ClassMember {
                    kind: ClassMemberKind::StaticBlock(block),
                    span: self.span_from(start),
                });
            }
            is_static = true;
        }

        let (mut kind, is_async, is_generator) = self.parse_method_modifiers();
        let has_modifiers = kind != MethodKind::Method || is_async || is_generator;
        let key = self.parse_prop_key()?;

        if has_modifiers || self.is_punct("(") {
            if kind == MethodKind::Method && !is_static && key.static_name().as_deref() == Some("constructor") {
                kind = MethodKind::Constructor;
            }
            let function = self.parse_method_function(is_async, is_generator)?;
            return Ok(ClassMember {
                kind: ClassMemberKind::Method {
                    key,
                    kind,
                    is_static,
                    function,
                },
                span: self.span_from(start),
            });
        }

        let value = if self.eat_punct("=") {
            Some(self.with_context(false, false, |p| p.parse_assignment())?)
        } else {
            None
        };
        self.consume_semicolon()?;
        Ok(ClassMember {
            kind: ClassMemberKind::Field {
                key,
                value,
                is_static,
            },
            span: self.span_from(start),
        })
    }

    // =========================================================================
    // Patterns
    // =========================================================================

    /// An identifier, array pattern or object pattern.
    pub(super) fn parse_binding_target(&mut self) -> ParseResult<Pattern> {
        let start = self.start();
        if self.eat_punct("[") {
            let mut elements = Vec::new();
            loop {
                if self.eat_punct("]") {
                    break;
                }
                if self.eat_punct(",") {
                    elements.push(None);
                    continue;
                }
                let element_start = self.start();
                let element = if self.eat_punct("...") {
                    let target = self.parse_binding_target()?;
                    Pattern {
                        kind: PatternKind::Rest(Box::new(target)),
                        span: self.span_from(element_start),
                    }
                } else {
                    self.parse_binding_element()?
                };
                elements.push(Some(element));
                if !self.is_punct("]") {
                    self.expect_punct(",")?;
                }
            }
            return Ok(Pattern {
                kind: PatternKind::Array(elements),
                span: self.span_from(start),
            });
        }

        if self.eat_punct("{") {
            let mut props = Vec::new();
            while !self.eat_punct("}") {
                if self.eat_punct("...") {
                    props.push(ObjectPatternProp::Rest(self.parse_binding_target()?));
                } else {
                    let key = self.parse_prop_key()?;
                    if self.eat_punct(":") {
                        let value = self.parse_binding_element()?;
                        props.push(ObjectPatternProp::KeyValue { key, value });
                    } else {
                        let PropKey::Ident(ident) = key else {
                            return Err(self.expected("`:`"));
                        };
                        let default = if self.eat_punct("=") {
                            Some(self.parse_assignment()?)
                        } else {
                            None
                        };
                        props.push(ObjectPatternProp::Shorthand { ident, default });
                    }
                }
                if !self.is_punct("}") {
                    self.expect_punct(",")?;
                }
            }
            return Ok(Pattern {
                kind: PatternKind::Object(props),
                span: self.span_from(start),
            });
        }

        let ident = self.parse_binding_ident()?;
        Ok(Pattern {
            span: ident.span,
            kind: PatternKind::Ident(ident),
        })
    }

    /// A binding target with an optional `= default`.
    fn parse_binding_element(&mut self) -> ParseResult<Pattern> {
        let start = self.start();
        let target = self.parse_binding_target()?;
        if !self.eat_punct("=") {
            return Ok(target);
        }
        let default = self.with_allow_in(true, |p| p.parse_assignment())?;
        Ok(Pattern {
            kind: PatternKind::Default {
                target: Box::new(target),
                default: Box::new(default),
            },
            span: self.span_from(start),
        })
    }

    /// Reinterpret an expression parsed ahead of `=` (or a `for` head) as
    /// an assignment pattern.
    pub(super) fn to_pattern(&self, expr: Expr) -> ParseResult<Pattern> {
        let span = expr.span;
        let kind = match expr.kind {
            ExprKind::Ident(ident) => PatternKind::Ident(ident),
            ExprKind::Member {
                object,
                property,
                optional: false,
            } => PatternKind::Expr(Box::new(Expr {
                kind: ExprKind::Member {
                    object,
                    property,
                    optional: false,
                },
                span,
            })),
            ExprKind::Paren(inner) => return self.to_simple_target(*inner),
            ExprKind::Array(elements) => {
                let mut patterns = Vec::with_capacity(elements.len());
                for element in elements {
                    let pattern = match element {
                        None => None,
                        Some(Expr {
                            kind: ExprKind::Spread(arg),
                            span,
                        }) => Some(Pattern {
                            kind: PatternKind::Rest(Box::new(self.to_pattern(*arg)?)),
                            span,
                        }),
                        Some(element) => Some(self.to_pattern(element)?),
                    };
                    patterns.push(pattern);
                }
                PatternKind::Array(patterns)
            }
            ExprKind::Object(props) => {
                let mut patterns = Vec::with_capacity(props.len());
                for prop in props {
                    let pattern = match prop.kind {
                        PropKind::KeyValue { key, value } => ObjectPatternProp::KeyValue {
                            key,
                            value: self.to_pattern(value)?,
                        },
                        PropKind::Shorthand { ident, default } => {
                            ObjectPatternProp::Shorthand { ident, default }
                        }
                        PropKind::Spread(arg) => ObjectPatternProp::Rest(self.to_pattern(arg)?),
                        PropKind::Method { .. } => {
                            return Err(SyntaxError::new("invalid destructuring target", prop.span));
                        }
                    };
                    patterns.push(pattern);
                }
                PatternKind::Object(patterns)
            }
            ExprKind::Assign { op, target, value } if op == "=" => PatternKind::Default {
                target,
                default: value,
            },
            _ => return Err(SyntaxError::new("invalid assignment target", span)),
        };
        Ok(Pattern { kind, span })
    }

    /// Targets of compound assignment: identifiers and member expressions.
    fn to_simple_target(&self, expr: Expr) -> ParseResult<Pattern> {
        let span = expr.span;
        match expr.kind {
            ExprKind::Ident(ident) => Ok(Pattern {
                kind: PatternKind::Ident(ident),
                span,
            }),
            ExprKind::Paren(inner) => self.to_simple_target(*inner),
            kind @ ExprKind::Member { .. } => Ok(Pattern {
                kind: PatternKind::Expr(Box::new(Expr { kind, span })),
                span,
            }),
            _ => Err(SyntaxError::new("invalid assignment target", span)),
        }
    }
}
