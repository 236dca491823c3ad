//! Statement parsing and control-flow bookkeeping: break/continue label
//! stacks, switch case collection, and named-label recording for goto.

use crate::common::error::{CompileError, ErrorKind, Result};
use crate::frontend::ast::{LabelId, Stmt, StmtKind, SwitchCase};
use crate::frontend::token::TokenKind;
use crate::frontend::types::TypeArena;

use super::{Parser, SwitchFrame};

impl<'a> Parser<'a> {
    /// compound-stmt = "{" (declaration | stmt)* "}"
    pub(super) fn compound_stmt(&mut self) -> Result<Stmt> {
        let open = self.expect(TokenKind::LBrace)?;
        self.scopes.enter();
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.peek().is_eof() {
                self.scopes.leave();
                return Err(self.error("unexpected end of input, expected '}'"));
            }
            if self.is_typename() {
                stmts.extend(self.declaration()?);
            } else {
                stmts.push(self.stmt()?);
            }
        }
        let close = self.expect(TokenKind::RBrace)?;
        self.scopes.leave();
        Ok(Stmt::new(StmtKind::Block(stmts), open.merge(close)))
    }

    /// stmt = "return" expr? ";" | "if" ... | "while" ... | "for" ...
    ///      | "do" ... | "switch" ... | "case"/"default" ... | "break"
    ///      | "continue" | "goto" ident ";" | ident ":" stmt
    ///      | compound-stmt | ";" | expr ";"
    pub(super) fn stmt(&mut self) -> Result<Stmt> {
        let span = self.span();
        match self.kind() {
            TokenKind::Return => {
                self.advance();
                let ret_ty = self
                    .current_ret
                    .expect("return statement outside of a function body");
                if self.eat(TokenKind::Semicolon) {
                    return Ok(Stmt::new(StmtKind::Return(None), span));
                }
                let e = self.expr()?;
                if ret_ty == TypeArena::VOID {
                    return Err(CompileError::type_mismatch(
                        "void function should not return a value",
                        e.span,
                    ));
                }
                let e = self.make_cast(e, ret_ty);
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::new(StmtKind::Return(Some(e)), span))
            }

            TokenKind::If => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.require_scalar(&cond)?;
                self.expect(TokenKind::RParen)?;
                let then = Box::new(self.stmt()?);
                let els = if self.eat(TokenKind::Else) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                Ok(Stmt::new(StmtKind::If { cond, then, els }, span))
            }

            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.require_scalar(&cond)?;
                self.expect(TokenKind::RParen)?;
                let (break_label, continue_label) = self.enter_loop();
                let body = Box::new(self.stmt()?);
                self.leave_loop();
                Ok(Stmt::new(
                    StmtKind::For {
                        init: None,
                        cond: Some(cond),
                        inc: None,
                        body,
                        break_label,
                        continue_label,
                    },
                    span,
                ))
            }

            TokenKind::For => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                // The init clause may declare variables scoped to the loop.
                self.scopes.enter();
                let init = if self.eat(TokenKind::Semicolon) {
                    None
                } else if self.is_typename() {
                    let decls = self.declaration()?;
                    Some(Box::new(Stmt::new(StmtKind::Block(decls), span)))
                } else {
                    let e = self.expr()?;
                    self.expect(TokenKind::Semicolon)?;
                    let es = e.span;
                    Some(Box::new(Stmt::new(StmtKind::ExprStmt(e), es)))
                };
                let cond = if self.at(TokenKind::Semicolon) {
                    None
                } else {
                    let c = self.expr()?;
                    self.require_scalar(&c)?;
                    Some(c)
                };
                self.expect(TokenKind::Semicolon)?;
                let inc = if self.at(TokenKind::RParen) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(TokenKind::RParen)?;
                let (break_label, continue_label) = self.enter_loop();
                let body = Box::new(self.stmt()?);
                self.leave_loop();
                self.scopes.leave();
                Ok(Stmt::new(
                    StmtKind::For {
                        init,
                        cond,
                        inc,
                        body,
                        break_label,
                        continue_label,
                    },
                    span,
                ))
            }

            TokenKind::Do => {
                self.advance();
                let (break_label, continue_label) = self.enter_loop();
                let body = Box::new(self.stmt()?);
                self.leave_loop();
                self.expect(TokenKind::While)?;
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.require_scalar(&cond)?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::new(
                    StmtKind::DoWhile {
                        body,
                        cond,
                        break_label,
                        continue_label,
                    },
                    span,
                ))
            }

            TokenKind::Switch => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                if !self.ctx.types.is_integer(cond.ty) {
                    return Err(CompileError::type_mismatch(
                        "switch quantity is not an integer",
                        cond.span,
                    ));
                }
                self.expect(TokenKind::RParen)?;
                let break_label = self.ctx.new_label();
                // `switch` is a break target but not a continue target.
                self.break_labels.push(break_label);
                self.switches.push(SwitchFrame {
                    cases: Vec::new(),
                    default_label: None,
                });
                let body = Box::new(self.stmt()?);
                let frame = self.switches.pop().unwrap();
                self.break_labels.pop();
                Ok(Stmt::new(
                    StmtKind::Switch {
                        cond,
                        body,
                        cases: frame.cases,
                        default_label: frame.default_label,
                        break_label,
                    },
                    span,
                ))
            }

            TokenKind::Case => {
                self.advance();
                let value = self.conditional_const()?;
                self.expect(TokenKind::Colon)?;
                let label = self.ctx.new_label();
                let Some(frame) = self.switches.last_mut() else {
                    return Err(CompileError::syntax(
                        "case label not within a switch statement",
                        span,
                    ));
                };
                if frame.cases.iter().any(|c| c.value == value) {
                    return Err(CompileError::syntax(
                        format!("duplicate case value {}", value),
                        span,
                    ));
                }
                frame.cases.push(SwitchCase { value, label });
                let body = Box::new(self.stmt()?);
                Ok(Stmt::new(StmtKind::Case { label, body }, span))
            }

            TokenKind::Default => {
                self.advance();
                self.expect(TokenKind::Colon)?;
                let label = self.ctx.new_label();
                let Some(frame) = self.switches.last_mut() else {
                    return Err(CompileError::syntax(
                        "default label not within a switch statement",
                        span,
                    ));
                };
                if frame.default_label.is_some() {
                    return Err(CompileError::syntax(
                        "multiple default labels in one switch",
                        span,
                    ));
                }
                frame.default_label = Some(label);
                let body = Box::new(self.stmt()?);
                Ok(Stmt::new(StmtKind::DefaultCase { label, body }, span))
            }

            TokenKind::Break => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                let Some(&label) = self.break_labels.last() else {
                    return Err(CompileError::new(ErrorKind::MisplacedJump("break"), span));
                };
                Ok(Stmt::new(StmtKind::Jump { label }, span))
            }

            TokenKind::Continue => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                let Some(&label) = self.continue_labels.last() else {
                    return Err(CompileError::new(
                        ErrorKind::MisplacedJump("continue"),
                        span,
                    ));
                };
                Ok(Stmt::new(StmtKind::Jump { label }, span))
            }

            TokenKind::Goto => {
                self.advance();
                let (name, gspan) = self.expect_ident()?;
                self.expect(TokenKind::Semicolon)?;
                // Forward references are fine; the target set is checked
                // once the whole body has been parsed.
                self.gotos.push((name.clone(), gspan));
                Ok(Stmt::new(StmtKind::Goto { name }, span))
            }

            TokenKind::LBrace => self.compound_stmt(),

            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::new(StmtKind::Block(Vec::new()), span))
            }

            // A label: identifier directly followed by ':'.
            TokenKind::Identifier(name) if *self.nth_kind(1) == TokenKind::Colon => {
                let name = name.clone();
                self.advance();
                self.advance();
                if self.labels.contains_key(&name) {
                    return Err(CompileError::syntax(
                        format!("duplicate label '{}'", name),
                        span,
                    ));
                }
                let label = self.ctx.new_label();
                self.labels.insert(name.clone(), label);
                let body = Box::new(self.stmt()?);
                Ok(Stmt::new(StmtKind::Label { name, label, body }, span))
            }

            _ => {
                let e = self.expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::new(StmtKind::ExprStmt(e), span))
            }
        }
    }

    fn enter_loop(&mut self) -> (LabelId, LabelId) {
        let break_label = self.ctx.new_label();
        let continue_label = self.ctx.new_label();
        self.break_labels.push(break_label);
        self.continue_labels.push(continue_label);
        (break_label, continue_label)
    }

    fn leave_loop(&mut self) {
        self.break_labels.pop();
        self.continue_labels.pop();
    }
}
