//! Statements, declarations and module items.

use super::{ParseResult, Parser};
use crate::ast::{
    Block, CatchClause, Declarator, DefaultExport, ExportDecl, ExportSpecifier, ForHead, ForInit,
    Ident, ImportDecl, Stmt, StmtKind, SwitchCase, VarDecl, VarKind,
};
use crate::error::SyntaxError;
use crate::lexer::{TokenKind, string_value};

impl Parser {
    pub(super) fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        let token = self.peek().clone();

        if token.kind == TokenKind::Punct {
            match token.text.as_str() {
                "{" => {
                    let block = self.parse_block()?;
                    return Ok(self.stmt(StmtKind::Block(block), start));
                }
                ";" => {
                    self.advance();
                    return Ok(self.stmt(StmtKind::Empty, start));
                }
                _ => {}
            }
        }

        if token.kind == TokenKind::Identifier {
            match token.text.as_str() {
                "var" | "const" => return self.parse_var_statement(),
                "let" if self.starts_let_declaration() => return self.parse_var_statement(),
                "function" => return self.parse_function_statement(),
                "async" if self.starts_async_function() => return self.parse_function_statement(),
                "class" => {
                    let class = self.parse_class(true)?;
                    return Ok(self.stmt(StmtKind::Class(Box::new(class)), start));
                }
                "if" => return self.parse_if(),
                "for" => return self.parse_for(),
                "while" => {
                    self.advance();
                    let test = self.parse_paren_expression()?;
                    let body = Box::new(self.parse_statement()?);
                    return Ok(self.stmt(StmtKind::While { test, body }, start));
                }
                "do" => {
                    self.advance();
                    let body = Box::new(self.parse_statement()?);
                    self.expect_word("while")?;
                    let test = self.parse_paren_expression()?;
                    self.eat_punct(";");
                    return Ok(self.stmt(StmtKind::DoWhile { body, test }, start));
                }
                "return" => {
                    self.advance();
                    let arg = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.consume_semicolon()?;
                    return Ok(self.stmt(StmtKind::Return(arg), start));
                }
                "throw" => {
                    self.advance();
                    if self.peek().newline_before {
                        return Err(SyntaxError::new(
                            "line break after `throw`",
                            self.peek().span,
                        ));
                    }
                    let arg = self.parse_expression()?;
                    self.consume_semicolon()?;
                    return Ok(self.stmt(StmtKind::Throw(arg), start));
                }
                "try" => return self.parse_try(),
                "switch" => return self.parse_switch(),
                "break" | "continue" => {
                    let is_break = self.advance().text == "break";
                    let label = if self.is_identifier_token() && !self.peek().newline_before {
                        Some(self.parse_binding_ident()?)
                    } else {
                        None
                    };
                    self.consume_semicolon()?;
                    let kind = if is_break {
                        StmtKind::Break(label)
                    } else {
                        StmtKind::Continue(label)
                    };
                    return Ok(self.stmt(kind, start));
                }
                "debugger" => {
                    self.advance();
                    self.consume_semicolon()?;
                    return Ok(self.stmt(StmtKind::Debugger, start));
                }
                "import" if !self.is_punct_at(1, "(") && !self.is_punct_at(1, ".") => {
                    return self.parse_import();
                }
                "export" => return self.parse_export(),
                _ if self.is_identifier_token() && self.is_punct_at(1, ":") => {
                    let label = self.parse_binding_ident()?;
                    self.advance();
                    let body = Box::new(self.parse_statement()?);
                    return Ok(self.stmt(StmtKind::Labeled { label, body }, start));
                }
                _ => {}
            }
        }

        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(self.stmt(StmtKind::Expr(expr), start))
    }

    pub(super) fn parse_block(&mut self) -> ParseResult<Block> {
        let start = self.start();
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.expected("`}`"));
            }
            stmts.push(self.parse_statement()?);
        }
        self.advance();
        Ok(Block {
            stmts,
            span: self.span_from(start),
        })
    }

    fn at_statement_end(&self) -> bool {
        self.is_punct(";") || self.is_punct("}") || self.at_eof() || self.peek().newline_before
    }

    fn starts_let_declaration(&self) -> bool {
        let next = self.peek_at(1);
        match next.kind {
            TokenKind::Identifier => next.text != "in" && next.text != "instanceof",
            TokenKind::Punct => next.text == "[" || next.text == "{",
            _ => false,
        }
    }

    pub(super) fn starts_async_function(&self) -> bool {
        self.is_word("async") && self.is_word_at(1, "function") && !self.peek_at(1).newline_before
    }

    fn starts_var_declaration(&self) -> bool {
        self.is_word("var") || self.is_word("const") || (self.is_word("let") && self.starts_let_declaration())
    }

    fn parse_function_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        let function = self.parse_function(true)?;
        Ok(self.stmt(StmtKind::Function(Box::new(function)), start))
    }

    fn parse_paren_expression(&mut self) -> ParseResult<crate::ast::Expr> {
        self.expect_punct("(")?;
        let expr = self.with_allow_in(true, |p| p.parse_expression())?;
        self.expect_punct(")")?;
        Ok(expr)
    }

    // =========================================================================
    // Variables
    // =========================================================================

    fn parse_var_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        let decl = self.parse_var_decl()?;
        self.consume_semicolon()?;
        Ok(self.stmt(StmtKind::Var(decl), start))
    }

    /// A declaration list without its terminating semicolon.
    fn parse_var_decl(&mut self) -> ParseResult<VarDecl> {
        let start = self.start();
        let kind = match self.advance().text.as_str() {
            "var" => VarKind::Var,
            "let" => VarKind::Let,
            _ => VarKind::Const,
        };
        let mut declarators = Vec::new();
        loop {
            let declarator_start = self.start();
            let id = self.parse_binding_target()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            declarators.push(Declarator {
                id,
                init,
                span: self.span_from(declarator_start),
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(VarDecl {
            kind,
            declarators,
            span: self.span_from(start),
        })
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        self.advance();
        let test = self.parse_paren_expression()?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_word("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(self.stmt(
            StmtKind::If {
                test,
                consequent,
                alternate,
            },
            start,
        ))
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        self.advance();
        // `for await (… of …)`
        self.eat_word("await");
        self.expect_punct("(")?;

        let init = if self.is_punct(";") {
            None
        } else if self.starts_var_declaration() {
            let decl = self.with_allow_in(false, |p| p.parse_var_decl())?;
            if decl.declarators.len() == 1 && (self.is_word("of") || self.is_word("in")) {
                return self.parse_for_in_rest(start, ForHead::Var(decl));
            }
            Some(ForInit::Var(decl))
        } else {
            let expr = self.with_allow_in(false, |p| p.parse_expression())?;
            if self.is_word("of") || self.is_word("in") {
                let left = self.to_pattern(expr)?;
                return self.parse_for_in_rest(start, ForHead::Pattern(left));
            }
            Some(ForInit::Expr(expr))
        };

        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(self.stmt(
            StmtKind::For {
                init,
                test,
                update,
                body,
            },
            start,
        ))
    }

    fn parse_for_in_rest(&mut self, start: usize, left: ForHead) -> ParseResult<Stmt> {
        let of = self.advance().text == "of";
        let right = if of {
            self.parse_assignment()?
        } else {
            self.parse_expression()?
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(self.stmt(
            StmtKind::ForIn {
                left,
                right,
                body,
                of,
            },
            start,
        ))
    }

    fn parse_try(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        self.advance();
        let block = self.parse_block()?;
        let handler = if self.eat_word("catch") {
            let param = if self.eat_punct("(") {
                let param = self.parse_binding_target()?;
                self.expect_punct(")")?;
                Some(param)
            } else {
                None
            };
            let body = self.parse_block()?;
            Some(CatchClause { param, body })
        } else {
            None
        };
        let finalizer = if self.eat_word("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.expected("`catch` or `finally`"));
        }
        Ok(self.stmt(
            StmtKind::Try {
                block,
                handler,
                finalizer,
            },
            start,
        ))
    }

    fn parse_switch(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        self.advance();
        let discriminant = self.parse_paren_expression()?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let test = if self.eat_word("case") {
                Some(self.parse_expression()?)
            } else {
                self.expect_word("default")?;
                None
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !self.is_word("case") && !self.is_word("default") && !self.is_punct("}") {
                if self.at_eof() {
                    return Err(self.expected("`}`"));
                }
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(self.stmt(
            StmtKind::Switch {
                discriminant,
                cases,
            },
            start,
        ))
    }

    // =========================================================================
    // Modules
    // =========================================================================

    fn parse_import(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        self.advance();
        let mut locals = Vec::new();

        if self.peek().kind != TokenKind::String {
            if self.is_identifier_token() {
                locals.push(self.parse_binding_ident()?);
                if self.eat_punct(",") {
                    self.parse_import_clause(&mut locals)?;
                }
            } else {
                self.parse_import_clause(&mut locals)?;
            }
            self.expect_word("from")?;
        }

        let source = self.parse_module_source()?;
        self.skip_import_attributes()?;
        self.consume_semicolon()?;
        Ok(self.stmt(StmtKind::Import(ImportDecl { locals, source }), start))
    }

    /// `* as ns` or `{ a, b as c }`
    fn parse_import_clause(&mut self, locals: &mut Vec<Ident>) -> ParseResult<()> {
        if self.eat_punct("*") {
            self.expect_word("as")?;
            locals.push(self.parse_binding_ident()?);
            return Ok(());
        }
        self.expect_punct("{")?;
        while !self.eat_punct("}") {
            let imported = self.parse_module_export_name()?;
            let local = if self.eat_word("as") {
                self.parse_binding_ident()?
            } else {
                imported
            };
            locals.push(local);
            if !self.is_punct("}") {
                self.expect_punct(",")?;
            }
        }
        Ok(())
    }

    fn parse_module_export_name(&mut self) -> ParseResult<Ident> {
        if self.peek().kind == TokenKind::String {
            let token = self.advance();
            return Ok(Ident {
                name: string_value(&token.text),
                span: token.span,
            });
        }
        self.parse_name()
    }

    fn parse_module_source(&mut self) -> ParseResult<String> {
        if self.peek().kind != TokenKind::String {
            return Err(self.expected("a module specifier"));
        }
        Ok(string_value(&self.advance().text))
    }

    /// `with { type: "json" }`
    fn skip_import_attributes(&mut self) -> ParseResult<()> {
        let keyword = (self.is_word("with") || self.is_word("assert")) && self.is_punct_at(1, "{");
        if !keyword || (self.peek().newline_before && self.is_word("assert")) {
            return Ok(());
        }
        self.advance();
        self.advance();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.expected("`}`"));
            }
            self.advance();
        }
        Ok(())
    }

    fn parse_export(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        self.advance();

        if self.eat_word("default") {
            let default = if self.is_word("function") || self.starts_async_function() {
                DefaultExport::Function(Box::new(self.parse_function(false)?))
            } else if self.is_word("class") {
                DefaultExport::Class(Box::new(self.parse_class(false)?))
            } else {
                let expr = self.parse_assignment()?;
                self.consume_semicolon()?;
                DefaultExport::Expr(expr)
            };
            return Ok(self.stmt(StmtKind::Export(ExportDecl::Default(default)), start));
        }

        if self.eat_punct("*") {
            if self.eat_word("as") {
                self.parse_module_export_name()?;
            }
            self.expect_word("from")?;
            let source = self.parse_module_source()?;
            self.skip_import_attributes()?;
            self.consume_semicolon()?;
            return Ok(self.stmt(StmtKind::Export(ExportDecl::All { source }), start));
        }

        if self.eat_punct("{") {
            let mut specifiers = Vec::new();
            while !self.eat_punct("}") {
                let local = self.parse_module_export_name()?;
                let exported = if self.eat_word("as") {
                    self.parse_module_export_name()?
                } else {
                    local.clone()
                };
                specifiers.push(ExportSpecifier { local, exported });
                if !self.is_punct("}") {
                    self.expect_punct(",")?;
                }
            }
            let source = if self.eat_word("from") {
                let source = self.parse_module_source()?;
                self.skip_import_attributes()?;
                Some(source)
            } else {
                None
            };
            self.consume_semicolon()?;
            return Ok(self.stmt(
                StmtKind::Export(ExportDecl::Named { specifiers, source }),
                start,
            ));
        }

        let is_declaration = self.starts_var_declaration()
            || self.is_word("function")
            || self.starts_async_function()
            || self.is_word("class");
        if !is_declaration {
            return Err(self.expected("a declaration after `export`"));
        }
        let decl = self.parse_statement()?;
        Ok(self.stmt(StmtKind::Export(ExportDecl::Decl(Box::new(decl))), start))
    }
}
