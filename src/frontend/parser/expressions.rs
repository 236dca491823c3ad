//! Expression parsing: precedence climbing, one production per level,
//! so precedence and associativity are fixed by grammar shape.
//!
//! Every production types the node it builds before returning, inserting
//! implicit casts where the usual arithmetic conversion or an assignment
//! requires them. By the time an expression reaches the caller it is
//! fully typed; nothing revisits it later.

use crate::common::error::{CompileError, Result};
use crate::common::source::Span;
use crate::frontend::ast::{BinaryOp, Expr, ExprKind, UnaryOp, VarRef};
use crate::frontend::scope::VarScopeEntry;
use crate::frontend::token::TokenKind;
use crate::frontend::types::{TypeArena, TypeId, TypeKind};

use super::Parser;

impl<'a> Parser<'a> {
    /// expr = assign ("," assign)*
    pub(super) fn expr(&mut self) -> Result<Expr> {
        let mut node = self.assign()?;
        while self.eat(TokenKind::Comma) {
            let rhs = self.assign()?;
            let span = node.span.merge(rhs.span);
            let ty = rhs.ty;
            node = Expr::new(
                ExprKind::Comma {
                    lhs: Box::new(node),
                    rhs: Box::new(rhs),
                },
                ty,
                span,
            );
        }
        Ok(node)
    }

    /// assign = conditional ("=" assign)?
    pub(super) fn assign(&mut self) -> Result<Expr> {
        let lhs = self.conditional()?;
        if self.eat(TokenKind::Assign) {
            let rhs = self.assign()?;
            return self.make_assign(lhs, rhs);
        }
        Ok(lhs)
    }

    /// Build a typed assignment: the left side must be an lvalue of
    /// assignable type, and the right side is cast to it (aggregates
    /// require identical types instead).
    pub(super) fn make_assign(&mut self, lhs: Expr, rhs: Expr) -> Result<Expr> {
        if !is_lvalue(&lhs) {
            return Err(CompileError::type_mismatch(
                "lvalue required as left operand of assignment",
                lhs.span,
            ));
        }
        if matches!(self.ctx.types.kind(lhs.ty), TypeKind::Array { .. }) {
            return Err(CompileError::type_mismatch(
                "assignment to expression with array type",
                lhs.span,
            ));
        }
        let span = lhs.span.merge(rhs.span);
        let ty = lhs.ty;
        let rhs = match self.ctx.types.kind(ty) {
            TypeKind::Struct(_) | TypeKind::Union(_) => {
                if rhs.ty != ty {
                    return Err(CompileError::type_mismatch(
                        format!(
                            "incompatible types when assigning to type '{}' from type '{}'",
                            self.ctx.types.display(ty),
                            self.ctx.types.display(rhs.ty)
                        ),
                        span,
                    ));
                }
                rhs
            }
            TypeKind::Void => {
                return Err(CompileError::type_mismatch(
                    "cannot assign to an expression of type 'void'",
                    span,
                ))
            }
            _ => {
                if matches!(self.ctx.types.kind(rhs.ty), TypeKind::Void) {
                    return Err(CompileError::type_mismatch(
                        "void value not ignored as it ought to be",
                        rhs.span,
                    ));
                }
                self.make_cast(rhs, ty)
            }
        };
        Ok(Expr::new(
            ExprKind::Assign {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            span,
        ))
    }

    /// conditional = logor ("?" expr ":" conditional)?
    fn conditional(&mut self) -> Result<Expr> {
        let cond = self.logor()?;
        if !self.eat(TokenKind::Question) {
            return Ok(cond);
        }
        self.require_scalar(&cond)?;
        let then = self.expr()?;
        self.expect(TokenKind::Colon)?;
        let els = self.conditional()?;
        let span = cond.span.merge(els.span);

        let void_branch = matches!(self.ctx.types.kind(then.ty), TypeKind::Void)
            || matches!(self.ctx.types.kind(els.ty), TypeKind::Void);
        let (then, els, ty) = if void_branch {
            (then, els, TypeArena::VOID)
        } else if matches!(self.ctx.types.kind(then.ty), TypeKind::Struct(_) | TypeKind::Union(_)) {
            if then.ty != els.ty {
                return Err(CompileError::type_mismatch(
                    "type mismatch in conditional expression",
                    span,
                ));
            }
            let ty = then.ty;
            (then, els, ty)
        } else {
            let (then, els, ty) = self.usual_arith(then, els);
            (then, els, ty)
        };
        Ok(Expr::new(
            ExprKind::Cond {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
            },
            ty,
            span,
        ))
    }

    /// logor = logand ("||" logand)*
    fn logor(&mut self) -> Result<Expr> {
        let mut node = self.logand()?;
        while self.eat(TokenKind::PipePipe) {
            let rhs = self.logand()?;
            node = self.make_logical(BinaryOp::LogOr, node, rhs)?;
        }
        Ok(node)
    }

    /// logand = bitor ("&&" bitor)*
    fn logand(&mut self) -> Result<Expr> {
        let mut node = self.bitor()?;
        while self.eat(TokenKind::AmpAmp) {
            let rhs = self.bitor()?;
            node = self.make_logical(BinaryOp::LogAnd, node, rhs)?;
        }
        Ok(node)
    }

    fn make_logical(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Result<Expr> {
        self.require_scalar(&lhs)?;
        self.require_scalar(&rhs)?;
        let span = lhs.span.merge(rhs.span);
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            TypeArena::INT,
            span,
        ))
    }

    /// bitor = bitxor ("|" bitxor)*
    fn bitor(&mut self) -> Result<Expr> {
        let mut node = self.bitxor()?;
        while self.eat(TokenKind::Pipe) {
            let rhs = self.bitxor()?;
            node = self.make_int_binary(BinaryOp::BitOr, node, rhs)?;
        }
        Ok(node)
    }

    /// bitxor = bitand ("^" bitand)*
    fn bitxor(&mut self) -> Result<Expr> {
        let mut node = self.bitand()?;
        while self.eat(TokenKind::Caret) {
            let rhs = self.bitand()?;
            node = self.make_int_binary(BinaryOp::BitXor, node, rhs)?;
        }
        Ok(node)
    }

    /// bitand = equality ("&" equality)*
    fn bitand(&mut self) -> Result<Expr> {
        let mut node = self.equality()?;
        while self.eat(TokenKind::Amp) {
            let rhs = self.equality()?;
            node = self.make_int_binary(BinaryOp::BitAnd, node, rhs)?;
        }
        Ok(node)
    }

    /// equality = relational (("==" | "!=") relational)*
    fn equality(&mut self) -> Result<Expr> {
        let mut node = self.relational()?;
        loop {
            let op = if self.eat(TokenKind::EqualEqual) {
                BinaryOp::Eq
            } else if self.eat(TokenKind::BangEqual) {
                BinaryOp::Ne
            } else {
                return Ok(node);
            };
            let rhs = self.relational()?;
            node = self.make_comparison(op, node, rhs)?;
        }
    }

    /// relational = shift (("<" | "<=" | ">" | ">=") shift)*
    ///
    /// `>` and `>=` swap their operands and become `<` / `<=`.
    fn relational(&mut self) -> Result<Expr> {
        let mut node = self.shift()?;
        loop {
            if self.eat(TokenKind::Less) {
                let rhs = self.shift()?;
                node = self.make_comparison(BinaryOp::Lt, node, rhs)?;
            } else if self.eat(TokenKind::LessEqual) {
                let rhs = self.shift()?;
                node = self.make_comparison(BinaryOp::Le, node, rhs)?;
            } else if self.eat(TokenKind::Greater) {
                let rhs = self.shift()?;
                node = self.make_comparison(BinaryOp::Lt, rhs, node)?;
            } else if self.eat(TokenKind::GreaterEqual) {
                let rhs = self.shift()?;
                node = self.make_comparison(BinaryOp::Le, rhs, node)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn make_comparison(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Result<Expr> {
        let span = lhs.span.merge(rhs.span);
        if !self.is_scalar(lhs.ty) || !self.is_scalar(rhs.ty) {
            return Err(CompileError::type_mismatch(
                "invalid operands to comparison",
                span,
            ));
        }
        let (lhs, rhs, _) = self.usual_arith(lhs, rhs);
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            TypeArena::INT,
            span,
        ))
    }

    /// shift = add ("<<" add | ">>" add)*
    fn shift(&mut self) -> Result<Expr> {
        let mut node = self.add_expr()?;
        loop {
            let op = if self.eat(TokenKind::LessLess) {
                BinaryOp::Shl
            } else if self.eat(TokenKind::GreaterGreater) {
                BinaryOp::Shr
            } else {
                return Ok(node);
            };
            let rhs = self.add_expr()?;
            let span = node.span.merge(rhs.span);
            self.require_integer(&node)?;
            self.require_integer(&rhs)?;
            let lhs = self.promote(node);
            let rhs = self.make_cast(rhs, TypeArena::INT);
            let ty = lhs.ty;
            node = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
                span,
            );
        }
    }

    /// add = mul ("+" mul | "-" mul)*
    fn add_expr(&mut self) -> Result<Expr> {
        let mut node = self.mul_expr()?;
        loop {
            if self.eat(TokenKind::Plus) {
                let rhs = self.mul_expr()?;
                node = self.make_add(node, rhs)?;
            } else if self.eat(TokenKind::Minus) {
                let rhs = self.mul_expr()?;
                node = self.make_sub(node, rhs)?;
            } else {
                return Ok(node);
            }
        }
    }

    /// Typed `+`: numeric addition, or pointer arithmetic with the
    /// integer operand scaled by the pointee size.
    pub(super) fn make_add(&mut self, lhs: Expr, rhs: Expr) -> Result<Expr> {
        let span = lhs.span.merge(rhs.span);
        let lptr = self.ctx.types.base_of(lhs.ty);
        let rptr = self.ctx.types.base_of(rhs.ty);
        match (lptr, rptr) {
            (None, None) => {
                self.require_numeric(&lhs)?;
                self.require_numeric(&rhs)?;
                let (lhs, rhs, ty) = self.usual_arith(lhs, rhs);
                Ok(binary(BinaryOp::Add, lhs, rhs, ty, span))
            }
            (Some(_), None) => self.pointer_offset(BinaryOp::Add, lhs, rhs, span),
            (None, Some(_)) => self.pointer_offset(BinaryOp::Add, rhs, lhs, span),
            (Some(_), Some(_)) => Err(CompileError::type_mismatch(
                "invalid operands to binary + (two pointer operands)",
                span,
            )),
        }
    }

    /// Typed `-`: numeric subtraction, pointer minus integer, or
    /// pointer difference scaled down by the element size.
    pub(super) fn make_sub(&mut self, lhs: Expr, rhs: Expr) -> Result<Expr> {
        let span = lhs.span.merge(rhs.span);
        let lptr = self.ctx.types.base_of(lhs.ty);
        let rptr = self.ctx.types.base_of(rhs.ty);
        match (lptr, rptr) {
            (None, None) => {
                self.require_numeric(&lhs)?;
                self.require_numeric(&rhs)?;
                let (lhs, rhs, ty) = self.usual_arith(lhs, rhs);
                Ok(binary(BinaryOp::Sub, lhs, rhs, ty, span))
            }
            (Some(_), None) => self.pointer_offset(BinaryOp::Sub, lhs, rhs, span),
            (Some(base), Some(_)) => {
                // p - q: byte difference divided by the element size
                let elem = self.ctx.types.sized(base, span)?;
                let lhs = self.decay_expr(lhs);
                let rhs = self.decay_expr(rhs);
                let diff = binary(BinaryOp::Sub, lhs, rhs, TypeArena::LONG, span);
                let size = Expr::new(ExprKind::Num(elem as i64), TypeArena::LONG, span);
                Ok(binary(BinaryOp::Div, diff, size, TypeArena::LONG, span))
            }
            (None, Some(_)) => Err(CompileError::type_mismatch(
                "invalid operands to binary - (integer minus pointer)",
                span,
            )),
        }
    }

    /// ptr ± int: scale the integer operand by the pointee size. The
    /// result keeps the pointer operand's (decayed) type.
    fn pointer_offset(
        &mut self,
        op: BinaryOp,
        ptr: Expr,
        idx: Expr,
        span: Span,
    ) -> Result<Expr> {
        self.require_integer(&idx)?;
        let base = self.ctx.types.base_of(ptr.ty).unwrap();
        let elem = self.ctx.types.sized(base, span)?;
        let ptr = self.decay_expr(ptr);
        let idx = self.make_cast(idx, TypeArena::LONG);
        let size = Expr::new(ExprKind::Num(elem as i64), TypeArena::LONG, span);
        let scaled = binary(BinaryOp::Mul, idx, size, TypeArena::LONG, span);
        let ty = ptr.ty;
        Ok(binary(op, ptr, scaled, ty, span))
    }

    /// Make array-to-pointer decay explicit on an operand so later
    /// consumers see a pointer-typed (8-byte) value.
    fn decay_expr(&mut self, e: Expr) -> Expr {
        let decayed = self.ctx.types.decay(e.ty);
        self.make_cast(e, decayed)
    }

    /// mul = cast (("*" | "/" | "%") cast)*
    fn mul_expr(&mut self) -> Result<Expr> {
        let mut node = self.cast_expr()?;
        loop {
            let op = if self.eat(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.eat(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.eat(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                return Ok(node);
            };
            let rhs = self.cast_expr()?;
            if op == BinaryOp::Mod {
                node = self.make_int_binary(op, node, rhs)?;
            } else {
                self.require_numeric(&node)?;
                self.require_numeric(&rhs)?;
                let span = node.span.merge(rhs.span);
                let (lhs, rhs, ty) = self.usual_arith(node, rhs);
                node = binary(op, lhs, rhs, ty, span);
            }
        }
    }

    /// cast = "(" type-name ")" cast | unary
    fn cast_expr(&mut self) -> Result<Expr> {
        if self.at(TokenKind::LParen) && self.nth_is_typename(1) {
            let open = self.span();
            self.advance();
            let ty = self.typename()?;
            self.expect(TokenKind::RParen)?;
            let operand = self.cast_expr()?;
            let span = open.merge(operand.span);
            let mut node = self.make_cast(operand, ty);
            node.span = span;
            return Ok(node);
        }
        self.unary()
    }

    /// unary = ("+" | "-" | "&" | "*" | "!" | "~") cast
    ///       | "sizeof" "(" type-name ")"
    ///       | "sizeof" unary
    ///       | postfix
    fn unary(&mut self) -> Result<Expr> {
        let span = self.span();
        if self.eat(TokenKind::Plus) {
            return self.cast_expr();
        }
        if self.eat(TokenKind::Minus) {
            let operand = self.cast_expr()?;
            self.require_numeric(&operand)?;
            let ty = self.ctx.types.common_type(TypeArena::INT, operand.ty);
            let operand = self.make_cast(operand, ty);
            let span = span.merge(operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                ty,
                span,
            ));
        }
        if self.eat(TokenKind::Amp) {
            let operand = self.unary()?;
            if !is_lvalue(&operand) {
                return Err(CompileError::type_mismatch(
                    "lvalue required as unary '&' operand",
                    operand.span,
                ));
            }
            let span = span.merge(operand.span);
            // &array is the same address as the array itself, viewed as
            // a pointer to the first element.
            let ty = match self.ctx.types.base_of(operand.ty) {
                Some(base) if matches!(self.ctx.types.kind(operand.ty), TypeKind::Array { .. }) => {
                    self.ctx.types.pointer_to(base)
                }
                _ => self.ctx.types.pointer_to(operand.ty),
            };
            return Ok(Expr::new(ExprKind::Addr(Box::new(operand)), ty, span));
        }
        if self.eat(TokenKind::Star) {
            let operand = self.unary()?;
            let span = span.merge(operand.span);
            return self.make_deref(operand, span);
        }
        if self.eat(TokenKind::Bang) {
            let operand = self.cast_expr()?;
            self.require_scalar(&operand)?;
            let span = span.merge(operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                TypeArena::INT,
                span,
            ));
        }
        if self.eat(TokenKind::Tilde) {
            let operand = self.cast_expr()?;
            self.require_integer(&operand)?;
            let operand = self.promote(operand);
            let ty = operand.ty;
            let span = span.merge(operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::BitNot,
                    operand: Box::new(operand),
                },
                ty,
                span,
            ));
        }
        if self.eat(TokenKind::Sizeof) {
            // sizeof(type) needs one token of lookahead to tell a type
            // name from a parenthesized expression.
            let size = if self.at(TokenKind::LParen) && self.nth_is_typename(1) {
                self.advance();
                let ty = self.typename()?;
                let close = self.expect(TokenKind::RParen)?;
                self.ctx.types.sized(ty, span.merge(close))?
            } else {
                let operand = self.unary()?;
                self.ctx.types.sized(operand.ty, operand.span)?
            };
            return Ok(Expr::new(
                ExprKind::Num(size as i64),
                TypeArena::ULONG,
                span,
            ));
        }
        self.postfix()
    }

    pub(super) fn make_deref(&mut self, operand: Expr, span: Span) -> Result<Expr> {
        let Some(base) = self.ctx.types.base_of(operand.ty) else {
            return Err(CompileError::invalid_dereference(
                self.ctx.types.display(operand.ty),
                span,
            ));
        };
        if matches!(self.ctx.types.kind(base), TypeKind::Void) {
            return Err(CompileError::invalid_dereference(
                self.ctx.types.display(operand.ty),
                span,
            ));
        }
        Ok(Expr::new(ExprKind::Deref(Box::new(operand)), base, span))
    }

    /// postfix = primary ("[" expr "]" | "." ident | "->" ident)*
    fn postfix(&mut self) -> Result<Expr> {
        let mut node = self.primary()?;
        loop {
            if self.eat(TokenKind::LBracket) {
                let idx = self.expr()?;
                let close = self.expect(TokenKind::RBracket)?;
                let span = node.span.merge(close);
                let sum = self.make_add(node, idx)?;
                node = self.make_deref(sum, span)?;
            } else if self.eat(TokenKind::Dot) {
                node = self.member_access(node)?;
            } else if self.eat(TokenKind::Arrow) {
                let span = node.span;
                let base = self.make_deref(node, span)?;
                node = self.member_access(base)?;
            } else if self.at(TokenKind::LParen) {
                return Err(CompileError::type_mismatch(
                    "called object is not a function",
                    node.span,
                ));
            } else {
                return Ok(node);
            }
        }
    }

    fn member_access(&mut self, base: Expr) -> Result<Expr> {
        let (name, name_span) = self.expect_ident()?;
        if !matches!(
            self.ctx.types.kind(base.ty),
            TypeKind::Struct(_) | TypeKind::Union(_)
        ) {
            return Err(CompileError::type_mismatch(
                format!(
                    "request for member '{}' in something not a structure or union",
                    name
                ),
                name_span,
            ));
        }
        if !self.ctx.types.is_complete(base.ty) {
            return Err(CompileError::incomplete_type(
                self.ctx.types.display(base.ty),
                name_span,
            ));
        }
        let Some(member) = self.ctx.types.find_member(base.ty, &name) else {
            return Err(CompileError::undefined_symbol(name, name_span));
        };
        let (ty, offset) = (member.ty, member.offset);
        let span = base.span.merge(name_span);
        Ok(Expr::new(
            ExprKind::Member {
                base: Box::new(base),
                member: name,
                offset,
            },
            ty,
            span,
        ))
    }

    /// primary = "(" expr ")" | ident | number | string | character
    fn primary(&mut self) -> Result<Expr> {
        let span = self.span();
        match self.kind() {
            TokenKind::LParen => {
                self.advance();
                let node = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(node)
            }
            TokenKind::IntLiteral(v) => {
                let v = *v;
                self.advance();
                let ty = if i32::try_from(v).is_ok() {
                    TypeArena::INT
                } else {
                    TypeArena::LONG
                };
                Ok(Expr::new(ExprKind::Num(v), ty, span))
            }
            TokenKind::LongLiteral(v) => {
                let v = *v;
                self.advance();
                Ok(Expr::new(ExprKind::Num(v), TypeArena::LONG, span))
            }
            TokenKind::UIntLiteral(v) => {
                let v = *v;
                self.advance();
                let ty = if u32::try_from(v).is_ok() {
                    TypeArena::UINT
                } else {
                    TypeArena::ULONG
                };
                Ok(Expr::new(ExprKind::Num(v as i64), ty, span))
            }
            TokenKind::ULongLiteral(v) => {
                let v = *v;
                self.advance();
                Ok(Expr::new(ExprKind::Num(v as i64), TypeArena::ULONG, span))
            }
            TokenKind::FloatLiteral(v) => {
                let v = *v;
                self.advance();
                Ok(Expr::new(ExprKind::Float(v), TypeArena::DOUBLE, span))
            }
            TokenKind::FloatLiteralF32(v) => {
                let v = *v;
                self.advance();
                Ok(Expr::new(ExprKind::Float(v), TypeArena::FLOAT, span))
            }
            TokenKind::CharLiteral(c) => {
                let c = *c;
                self.advance();
                Ok(Expr::new(ExprKind::Num(c as i64), TypeArena::INT, span))
            }
            TokenKind::StringLiteral(s) => {
                let mut data = s.clone().into_bytes();
                self.advance();
                data.push(0);
                let ty = self
                    .ctx
                    .types
                    .array_of(TypeArena::CHAR, data.len(), span)?;
                let id = self.ctx.objects.add_string_literal(ty, data, span);
                Ok(Expr::new(ExprKind::Var(VarRef::Global(id)), ty, span))
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                if self.at(TokenKind::LParen) {
                    return self.funcall(&name, span);
                }
                match self.scopes.lookup_var(&name) {
                    Some(VarScopeEntry::Object(var, ty)) => {
                        Ok(Expr::new(ExprKind::Var(*var), *ty, span))
                    }
                    Some(VarScopeEntry::EnumConst(value, ty)) => {
                        Ok(Expr::new(ExprKind::Num(*value), *ty, span))
                    }
                    Some(VarScopeEntry::Typedef(_)) => {
                        Err(self.error(format!("unexpected type name '{}'", name)))
                    }
                    None => Err(CompileError::undefined_symbol(name, span)),
                }
            }
            other => Err(self.error(format!("expected an expression, got {}", other))),
        }
    }

    /// funcall = ident "(" (assign ("," assign)*)? ")"
    ///
    /// Checks the argument count against the parameter count (a variadic
    /// function permits excess arguments) and wraps each argument in an
    /// implicit cast to its parameter type; extra variadic arguments get
    /// the default promotions instead.
    fn funcall(&mut self, name: &str, span: Span) -> Result<Expr> {
        let func_ty = match self.scopes.lookup_var(name) {
            Some(VarScopeEntry::Object(VarRef::Global(_), ty))
                if matches!(self.ctx.types.kind(*ty), TypeKind::Func { .. }) =>
            {
                *ty
            }
            Some(_) => {
                return Err(CompileError::type_mismatch(
                    format!("called object '{}' is not a function", name),
                    span,
                ))
            }
            None => return Err(CompileError::undefined_symbol(name, span)),
        };
        let (ret, params, variadic) = match self.ctx.types.kind(func_ty) {
            TypeKind::Func {
                ret,
                params,
                variadic,
            } => (*ret, params.clone(), *variadic),
            _ => unreachable!(),
        };

        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            if !args.is_empty() {
                self.expect(TokenKind::Comma)?;
            }
            let arg = self.assign()?;
            args.push(arg);
        }
        let close = self.expect(TokenKind::RParen)?;
        let span = span.merge(close);

        if args.len() < params.len() {
            return Err(CompileError::type_mismatch(
                format!("too few arguments to function '{}'", name),
                span,
            ));
        }
        if args.len() > params.len() && !variadic {
            return Err(CompileError::type_mismatch(
                format!("too many arguments to function '{}'", name),
                span,
            ));
        }

        let mut cast_args = Vec::with_capacity(args.len());
        for (i, arg) in args.into_iter().enumerate() {
            let arg = if let Some(&pty) = params.get(i) {
                if matches!(
                    self.ctx.types.kind(pty),
                    TypeKind::Struct(_) | TypeKind::Union(_)
                ) {
                    if arg.ty != pty {
                        return Err(CompileError::type_mismatch(
                            format!("incompatible argument {} to function '{}'", i + 1, name),
                            arg.span,
                        ));
                    }
                    arg
                } else {
                    self.make_cast(arg, pty)
                }
            } else {
                self.default_promote(arg)
            };
            cast_args.push(arg);
        }

        Ok(Expr::new(
            ExprKind::Call {
                name: name.to_string(),
                func_ty,
                args: cast_args,
            },
            ret,
            span,
        ))
    }

    // --- typing helpers ---------------------------------------------------

    /// Apply the usual arithmetic conversion: cast both operands to
    /// their common type.
    pub(super) fn usual_arith(&mut self, lhs: Expr, rhs: Expr) -> (Expr, Expr, TypeId) {
        let ty = self.ctx.types.common_type(lhs.ty, rhs.ty);
        let lhs = self.make_cast(lhs, ty);
        let rhs = self.make_cast(rhs, ty);
        (lhs, rhs, ty)
    }

    /// Wrap an expression in a conversion to `to` unless it already has
    /// exactly that type.
    pub(super) fn make_cast(&mut self, e: Expr, to: TypeId) -> Expr {
        if e.ty == to {
            return e;
        }
        let span = e.span;
        Expr::new(ExprKind::Cast(Box::new(e)), to, span)
    }

    /// Integer promotion: anything narrower than `int` widens to `int`.
    pub(super) fn promote(&mut self, e: Expr) -> Expr {
        if self.ctx.types.is_integer(e.ty) && self.ctx.types.size(e.ty) < 4 {
            return self.make_cast(e, TypeArena::INT);
        }
        e
    }

    /// Default argument promotions for excess variadic arguments.
    fn default_promote(&mut self, e: Expr) -> Expr {
        if matches!(self.ctx.types.kind(e.ty), TypeKind::Float) {
            return self.make_cast(e, TypeArena::DOUBLE);
        }
        self.promote(e)
    }

    fn make_int_binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Result<Expr> {
        self.require_integer(&lhs)?;
        self.require_integer(&rhs)?;
        let span = lhs.span.merge(rhs.span);
        let (lhs, rhs, ty) = self.usual_arith(lhs, rhs);
        Ok(binary(op, lhs, rhs, ty, span))
    }

    pub(super) fn is_scalar(&self, ty: TypeId) -> bool {
        self.ctx.types.is_numeric(ty) || self.ctx.types.is_pointer_like(ty)
    }

    pub(super) fn require_scalar(&self, e: &Expr) -> Result<()> {
        if self.is_scalar(e.ty) {
            return Ok(());
        }
        Err(CompileError::type_mismatch(
            format!(
                "expression of type '{}' used where a scalar is required",
                self.ctx.types.display(e.ty)
            ),
            e.span,
        ))
    }

    fn require_numeric(&self, e: &Expr) -> Result<()> {
        if self.ctx.types.is_numeric(e.ty) {
            return Ok(());
        }
        Err(CompileError::type_mismatch(
            format!(
                "expression of type '{}' used where a numeric value is required",
                self.ctx.types.display(e.ty)
            ),
            e.span,
        ))
    }

    fn require_integer(&self, e: &Expr) -> Result<()> {
        if self.ctx.types.is_integer(e.ty) {
            return Ok(());
        }
        Err(CompileError::type_mismatch(
            format!(
                "expression of type '{}' used where an integer is required",
                self.ctx.types.display(e.ty)
            ),
            e.span,
        ))
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, ty: TypeId, span: Span) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
        span,
    )
}

/// Expressions that designate a memory location.
pub(super) fn is_lvalue(e: &Expr) -> bool {
    matches!(
        e.kind,
        ExprKind::Var(_) | ExprKind::Deref(_) | ExprKind::Member { .. }
    )
}
