//! Initializer trees and their flattening.
//!
//! An `Initializer` mirrors the shape of the declared type: a leaf holds
//! one expression, an array/struct node holds children in element/member
//! order, default-filled with zero. Flattening walks the tree with a
//! designator path: for a local the path becomes an lvalue expression
//! and each leaf an assignment statement; for a global it becomes a byte
//! offset into the constant image, and every non-constant leaf must
//! reduce to "address of a symbol plus offset" — a relocation — or the
//! build fails.

use crate::backend::object::{GlobalInit, Relocation};
use crate::common::error::{CompileError, ErrorKind, Result};
use crate::frontend::ast::{Expr, ExprKind, Stmt, StmtKind};
use crate::frontend::token::TokenKind;
use crate::frontend::types::{TypeArena, TypeId, TypeKind};

use super::const_eval;
use super::Parser;

/// One node of an initializer tree.
pub(super) struct Initializer {
    pub ty: TypeId,
    /// A scalar value, or a whole-aggregate copy from an expression of
    /// identical type. None on a scalar leaf means zero.
    pub expr: Option<Expr>,
    /// Array elements or struct members, padded to the full length.
    /// For a union this holds exactly the one initialized member.
    pub children: Vec<Initializer>,
    /// For unions: which member `children[0]` initializes.
    pub union_member: usize,
}

impl Initializer {
    fn zero(ty: TypeId) -> Self {
        Self {
            ty,
            expr: None,
            children: Vec::new(),
            union_member: 0,
        }
    }

    fn leaf(ty: TypeId, expr: Expr) -> Self {
        Self {
            ty,
            expr: Some(expr),
            children: Vec::new(),
            union_member: 0,
        }
    }
}

impl<'a> Parser<'a> {
    /// initializer = "{" ... "}" | string-literal | assign
    ///
    /// Returns the tree and the (possibly adjusted) declared type: an
    /// array of unknown length takes its length from the initializer.
    pub(super) fn parse_initializer(&mut self, ty: TypeId) -> Result<(Initializer, TypeId)> {
        match self.ctx.types.kind(ty) {
            TypeKind::Array { base, len } => {
                let (base, len) = (*base, *len);
                self.array_initializer(ty, base, len)
            }
            TypeKind::Struct(_) => Ok((self.struct_initializer(ty)?, ty)),
            TypeKind::Union(_) => Ok((self.union_initializer(ty)?, ty)),
            _ => Ok((self.scalar_initializer(ty)?, ty)),
        }
    }

    fn array_initializer(
        &mut self,
        ty: TypeId,
        base: TypeId,
        declared_len: Option<usize>,
    ) -> Result<(Initializer, TypeId)> {
        let span = self.span();

        // `char s[] = "...";` — a bare string literal initializes a char
        // array byte by byte, including the terminating NUL.
        if let TokenKind::StringLiteral(s) = self.kind() {
            if self.ctx.types.size(base) == 1 && self.ctx.types.is_integer(base) {
                let mut data = s.clone().into_bytes();
                self.advance();
                data.push(0);
                let len = match declared_len {
                    Some(n) => {
                        // The NUL may be dropped when the string exactly
                        // fills the array; anything beyond that is excess.
                        if data.len() > n + 1 {
                            return Err(CompileError::new(ErrorKind::ExcessInitializer, span));
                        }
                        n
                    }
                    None => data.len(),
                };
                let children = (0..len)
                    .map(|i| {
                        let byte = data.get(i).copied().unwrap_or(0);
                        Initializer::leaf(
                            base,
                            Expr::new(ExprKind::Num(byte as i64), TypeArena::INT, span),
                        )
                    })
                    .collect();
                let ty = self.ctx.types.array_of(base, len, span)?;
                return Ok((
                    Initializer {
                        ty,
                        expr: None,
                        children,
                        union_member: 0,
                    },
                    ty,
                ));
            }
        }

        self.expect(TokenKind::LBrace)?;
        let mut children: Vec<Initializer> = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if !children.is_empty() {
                self.expect(TokenKind::Comma)?;
                if self.at(TokenKind::RBrace) {
                    break; // trailing comma
                }
            }
            if let Some(n) = declared_len {
                if children.len() >= n {
                    return Err(CompileError::new(ErrorKind::ExcessInitializer, self.span()));
                }
            }
            let (child, _) = self.parse_initializer(base)?;
            children.push(child);
        }
        self.expect(TokenKind::RBrace)?;

        let len = declared_len.unwrap_or(children.len());
        while children.len() < len {
            children.push(Initializer::zero(base));
        }
        let ty = if declared_len.is_some() {
            ty
        } else {
            self.ctx.types.array_of(base, len, span)?
        };
        Ok((
            Initializer {
                ty,
                expr: None,
                children,
                union_member: 0,
            },
            ty,
        ))
    }

    fn struct_initializer(&mut self, ty: TypeId) -> Result<Initializer> {
        let span = self.span();
        if !self.ctx.types.is_complete(ty) {
            return Err(CompileError::incomplete_type(
                self.ctx.types.display(ty),
                span,
            ));
        }
        let members = match self.ctx.types.kind(ty) {
            TypeKind::Struct(agg) => agg.members.clone(),
            _ => unreachable!("struct_initializer on non-struct"),
        };

        // No braces: a whole-struct copy from a same-typed expression.
        if !self.at(TokenKind::LBrace) {
            let e = self.assign()?;
            if e.ty != ty {
                return Err(CompileError::type_mismatch(
                    format!(
                        "invalid initializer for type '{}'",
                        self.ctx.types.display(ty)
                    ),
                    e.span,
                ));
            }
            return Ok(Initializer::leaf(ty, e));
        }

        self.expect(TokenKind::LBrace)?;
        let mut children: Vec<Initializer> =
            members.iter().map(|m| Initializer::zero(m.ty)).collect();
        let mut idx = 0usize;
        let mut first = true;
        while !self.at(TokenKind::RBrace) {
            if !first {
                self.expect(TokenKind::Comma)?;
                if self.at(TokenKind::RBrace) {
                    break;
                }
            }
            first = false;

            // `.name = value` re-enters at that member; subsequent
            // elements continue from there in declaration order.
            if self.eat(TokenKind::Dot) {
                let (name, nspan) = self.expect_ident()?;
                let Some(pos) = members.iter().position(|m| m.name == name) else {
                    return Err(CompileError::undefined_symbol(name, nspan));
                };
                idx = pos;
                self.expect(TokenKind::Assign)?;
            }
            if idx >= members.len() {
                return Err(CompileError::new(ErrorKind::ExcessInitializer, self.span()));
            }
            let (child, _) = self.parse_initializer(members[idx].ty)?;
            children[idx] = child;
            idx += 1;
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Initializer {
            ty,
            expr: None,
            children,
            union_member: 0,
        })
    }

    fn union_initializer(&mut self, ty: TypeId) -> Result<Initializer> {
        let span = self.span();
        if !self.ctx.types.is_complete(ty) {
            return Err(CompileError::incomplete_type(
                self.ctx.types.display(ty),
                span,
            ));
        }
        let members = match self.ctx.types.kind(ty) {
            TypeKind::Union(agg) => agg.members.clone(),
            _ => unreachable!("union_initializer on non-union"),
        };

        if !self.at(TokenKind::LBrace) {
            let e = self.assign()?;
            if e.ty != ty {
                return Err(CompileError::type_mismatch(
                    format!(
                        "invalid initializer for type '{}'",
                        self.ctx.types.display(ty)
                    ),
                    e.span,
                ));
            }
            return Ok(Initializer::leaf(ty, e));
        }

        // A union initializes exactly one member: the first, or the one
        // a designator names.
        self.expect(TokenKind::LBrace)?;
        let member = if self.eat(TokenKind::Dot) {
            let (name, nspan) = self.expect_ident()?;
            self.expect(TokenKind::Assign)?;
            match members.iter().position(|m| m.name == name) {
                Some(pos) => pos,
                None => return Err(CompileError::undefined_symbol(name, nspan)),
            }
        } else {
            0
        };
        if members.is_empty() {
            return Err(CompileError::new(ErrorKind::ExcessInitializer, span));
        }
        let (child, _) = self.parse_initializer(members[member].ty)?;
        self.eat(TokenKind::Comma);
        if !self.at(TokenKind::RBrace) {
            return Err(CompileError::new(ErrorKind::ExcessInitializer, self.span()));
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Initializer {
            ty,
            expr: None,
            children: vec![child],
            union_member: member,
        })
    }

    fn scalar_initializer(&mut self, ty: TypeId) -> Result<Initializer> {
        // C permits a scalar initializer in single braces: `int x = {3};`
        if self.eat(TokenKind::LBrace) {
            let e = self.assign()?;
            let e = self.make_cast(e, ty);
            self.eat(TokenKind::Comma);
            if !self.at(TokenKind::RBrace) {
                return Err(CompileError::new(ErrorKind::ExcessInitializer, self.span()));
            }
            self.expect(TokenKind::RBrace)?;
            return Ok(Initializer::leaf(ty, e));
        }
        let e = self.assign()?;
        if matches!(self.ctx.types.kind(e.ty), TypeKind::Struct(_) | TypeKind::Union(_)) {
            return Err(CompileError::type_mismatch(
                format!(
                    "invalid initializer of type '{}' for '{}'",
                    self.ctx.types.display(e.ty),
                    self.ctx.types.display(ty)
                ),
                e.span,
            ));
        }
        let e = self.make_cast(e, ty);
        Ok(Initializer::leaf(ty, e))
    }

    // --- flattening: locals ----------------------------------------------

    /// Convert an initializer tree into ordered assignment statements
    /// against `target` (an lvalue of the tree's type). Every scalar
    /// leaf produces one assignment; missing leaves assign zero, so
    /// re-reading the object in order reproduces the literal values
    /// with omitted elements as zero.
    pub(super) fn flatten_local_init(
        &mut self,
        target: Expr,
        init: &Initializer,
        out: &mut Vec<Stmt>,
    ) -> Result<()> {
        let span = target.span;
        match self.ctx.types.kind(init.ty).clone() {
            TypeKind::Array { .. } => {
                for (i, child) in init.children.iter().enumerate() {
                    let idx = Expr::new(ExprKind::Num(i as i64), TypeArena::INT, span);
                    let sum = self.make_add(target.clone(), idx)?;
                    let elem = self.make_deref(sum, span)?;
                    self.flatten_local_init(elem, child, out)?;
                }
                Ok(())
            }
            TypeKind::Struct(agg) => {
                if let Some(e) = &init.expr {
                    let assign = self.make_assign(target, e.clone())?;
                    out.push(Stmt::new(StmtKind::ExprStmt(assign), span));
                    return Ok(());
                }
                for (member, child) in agg.members.iter().zip(&init.children) {
                    let lv = Expr::new(
                        ExprKind::Member {
                            base: Box::new(target.clone()),
                            member: member.name.clone(),
                            offset: member.offset,
                        },
                        member.ty,
                        span,
                    );
                    self.flatten_local_init(lv, child, out)?;
                }
                Ok(())
            }
            TypeKind::Union(agg) => {
                if let Some(e) = &init.expr {
                    let assign = self.make_assign(target, e.clone())?;
                    out.push(Stmt::new(StmtKind::ExprStmt(assign), span));
                    return Ok(());
                }
                let member = &agg.members[init.union_member];
                let lv = Expr::new(
                    ExprKind::Member {
                        base: Box::new(target.clone()),
                        member: member.name.clone(),
                        offset: member.offset,
                    },
                    member.ty,
                    span,
                );
                self.flatten_local_init(lv, &init.children[0], out)
            }
            _ => {
                let value = match &init.expr {
                    Some(e) => e.clone(),
                    None => {
                        let zero = Expr::new(ExprKind::Num(0), TypeArena::INT, span);
                        self.make_cast(zero, init.ty)
                    }
                };
                let assign = self.make_assign(target, value)?;
                out.push(Stmt::new(StmtKind::ExprStmt(assign), span));
                Ok(())
            }
        }
    }

    // --- flattening: globals ---------------------------------------------

    /// Parse and flatten a global initializer into its constant image:
    /// a byte buffer plus relocations. Every leaf must be a
    /// compile-time constant or reduce to symbol-plus-offset.
    pub(super) fn global_initializer(&mut self, ty: TypeId) -> Result<(GlobalInit, TypeId)> {
        let span = self.span();
        let (init, ty) = self.parse_initializer(ty)?;
        let size = self.ctx.types.sized(ty, span)?;
        let mut image = GlobalInit {
            data: vec![0u8; size],
            relocs: Vec::new(),
        };
        self.write_global(&init, 0, &mut image)?;
        Ok((image, ty))
    }

    fn write_global(&self, init: &Initializer, offset: usize, image: &mut GlobalInit) -> Result<()> {
        match self.ctx.types.kind(init.ty) {
            TypeKind::Array { base, .. } => {
                let elem_size = self.ctx.types.size(*base);
                for (i, child) in init.children.iter().enumerate() {
                    self.write_global(child, offset + i * elem_size, image)?;
                }
                Ok(())
            }
            TypeKind::Struct(agg) => {
                if let Some(e) = &init.expr {
                    return Err(CompileError::new(ErrorKind::NonConstantInitializer, e.span));
                }
                for (member, child) in agg.members.iter().zip(&init.children) {
                    self.write_global(child, offset + member.offset, image)?;
                }
                Ok(())
            }
            TypeKind::Union(agg) => {
                if let Some(e) = &init.expr {
                    return Err(CompileError::new(ErrorKind::NonConstantInitializer, e.span));
                }
                let member = &agg.members[init.union_member];
                self.write_global(&init.children[0], offset + member.offset, image)
            }
            _ => {
                let Some(e) = &init.expr else {
                    return Ok(()); // zero bytes are already in place
                };
                self.write_scalar(e, init.ty, offset, image)
            }
        }
    }

    fn write_scalar(
        &self,
        e: &Expr,
        ty: TypeId,
        offset: usize,
        image: &mut GlobalInit,
    ) -> Result<()> {
        let size = self.ctx.types.size(ty);
        if self.ctx.types.is_flonum(ty) {
            let Some(v) = const_eval::eval_double(&self.ctx.types, e) else {
                return Err(CompileError::new(ErrorKind::NonConstantInitializer, e.span));
            };
            match size {
                4 => write_bytes(&mut image.data, offset, &(v as f32).to_bits().to_le_bytes()),
                8 => write_bytes(&mut image.data, offset, &v.to_bits().to_le_bytes()),
                _ => unreachable!("floating type of size {}", size),
            }
            return Ok(());
        }
        if let Some(v) = const_eval::eval_int(&self.ctx.types, e) {
            write_bytes(&mut image.data, offset, &v.to_le_bytes()[..size]);
            return Ok(());
        }
        // Not a scalar constant: it must be the address of another
        // global (or this one) plus a constant offset.
        if self.ctx.types.is_pointer_like(ty) {
            if let Some((target, addend)) =
                const_eval::eval_address(&self.ctx.types, &self.ctx.objects, e)
            {
                image.relocs.push(Relocation {
                    offset,
                    target,
                    addend,
                });
                return Ok(());
            }
        }
        Err(CompileError::new(ErrorKind::NonConstantInitializer, e.span))
    }
}

fn write_bytes(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}
