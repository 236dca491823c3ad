//! Declarations: specifier collection, declarator syntax, struct/union/
//! enum specifiers, and the file-scope productions (globals and function
//! definitions).

use log::debug;
use std::collections::HashMap;

use crate::backend::object::{Obj, ObjKind};
use crate::common::error::{CompileError, ErrorKind, Result};
use crate::common::source::Span;
use crate::frontend::ast::{Expr, ExprKind, Stmt, VarRef};
use crate::frontend::scope::VarScopeEntry;
use crate::frontend::token::TokenKind;
use crate::frontend::types::{TypeArena, TypeId, TypeKind};

use super::Parser;

/// Storage-class specifiers collected by `declspec`.
#[derive(Default)]
pub(super) struct DeclAttr {
    pub is_typedef: bool,
    pub is_static: bool,
    pub is_extern: bool,
}

/// One parsed declarator: the complete type and the declared name
/// (absent for abstract declarators in casts and `sizeof`).
pub(super) struct Declarator {
    pub ty: TypeId,
    pub name: Option<String>,
    pub span: Span,
}

// Specifier counters. Each base-type keyword adds its weight; the final
// sum must match one row of the fixed combination table below, which is
// what rejects nonsense like `int char` or `long float`.
const K_VOID: u32 = 1 << 0;
const K_BOOL: u32 = 1 << 2;
const K_CHAR: u32 = 1 << 4;
const K_SHORT: u32 = 1 << 6;
const K_INT: u32 = 1 << 8;
const K_LONG: u32 = 1 << 10;
const K_FLOAT: u32 = 1 << 12;
const K_DOUBLE: u32 = 1 << 14;
const K_OTHER: u32 = 1 << 16;
const K_SIGNED: u32 = 1 << 17;
const K_UNSIGNED: u32 = 1 << 18;

impl<'a> Parser<'a> {
    /// True if the token at offset `n` starts a type.
    pub(super) fn nth_is_typename(&self, n: usize) -> bool {
        match self.nth_kind(n) {
            TokenKind::Void
            | TokenKind::Bool
            | TokenKind::Char
            | TokenKind::Short
            | TokenKind::Int
            | TokenKind::Long
            | TokenKind::Float
            | TokenKind::Double
            | TokenKind::Signed
            | TokenKind::Unsigned
            | TokenKind::Struct
            | TokenKind::Union
            | TokenKind::Enum
            | TokenKind::Typedef
            | TokenKind::Static
            | TokenKind::Extern => true,
            TokenKind::Identifier(name) => self.scopes.is_typedef(name),
            _ => false,
        }
    }

    pub(super) fn is_typename(&self) -> bool {
        self.nth_is_typename(0)
    }

    /// declspec = (storage-class | type-specifier)+
    ///
    /// Base-type keywords may appear in any order (`unsigned long int`,
    /// `long unsigned`); the running counter is validated against the
    /// combination table after every keyword. Storage classes are only
    /// legal where `attr` is provided (not in members, parameters, or
    /// type names).
    pub(super) fn declspec(&mut self, mut attr: Option<&mut DeclAttr>) -> Result<TypeId> {
        let mut counter: u32 = 0;
        let mut ty = TypeArena::INT;

        while self.is_typename() {
            let span = self.span();
            match self.kind() {
                TokenKind::Typedef | TokenKind::Static | TokenKind::Extern => {
                    let Some(attr) = attr.as_deref_mut() else {
                        return Err(self.error(
                            "storage class specifier is not allowed in this context",
                        ));
                    };
                    match self.kind() {
                        TokenKind::Typedef => attr.is_typedef = true,
                        TokenKind::Static => attr.is_static = true,
                        TokenKind::Extern => attr.is_extern = true,
                        _ => unreachable!(),
                    }
                    if attr.is_typedef && (attr.is_static || attr.is_extern) {
                        return Err(self
                            .error("typedef may not be used together with static or extern"));
                    }
                    self.advance();
                    continue;
                }
                TokenKind::Struct | TokenKind::Union | TokenKind::Enum => {
                    if counter != 0 {
                        return Err(self.error("two or more data types in declaration"));
                    }
                    counter += K_OTHER;
                    ty = match self.kind() {
                        TokenKind::Struct => self.struct_union_specifier(false)?,
                        TokenKind::Union => self.struct_union_specifier(true)?,
                        TokenKind::Enum => self.enum_specifier()?,
                        _ => unreachable!(),
                    };
                    continue;
                }
                TokenKind::Identifier(name) => {
                    // A typedef name is a complete base type on its own.
                    if counter != 0 {
                        break; // `T x;` where T names the declarator, not a type
                    }
                    let Some(VarScopeEntry::Typedef(def)) = self.scopes.lookup_var(name) else {
                        unreachable!("is_typename said this identifier is a typedef");
                    };
                    ty = *def;
                    counter += K_OTHER;
                    self.advance();
                    continue;
                }
                TokenKind::Void => counter += K_VOID,
                TokenKind::Bool => counter += K_BOOL,
                TokenKind::Char => counter += K_CHAR,
                TokenKind::Short => counter += K_SHORT,
                TokenKind::Int => counter += K_INT,
                TokenKind::Long => counter += K_LONG,
                TokenKind::Float => counter += K_FLOAT,
                TokenKind::Double => counter += K_DOUBLE,
                TokenKind::Signed => counter += K_SIGNED,
                TokenKind::Unsigned => counter += K_UNSIGNED,
                _ => unreachable!(),
            }
            self.advance();

            // The fixed combination table.
            ty = match counter {
                c if c == K_VOID => TypeArena::VOID,
                c if c == K_BOOL => TypeArena::BOOL,
                c if c == K_CHAR || c == K_SIGNED + K_CHAR => TypeArena::CHAR,
                c if c == K_UNSIGNED + K_CHAR => TypeArena::UCHAR,
                c if c == K_SHORT
                    || c == K_SHORT + K_INT
                    || c == K_SIGNED + K_SHORT
                    || c == K_SIGNED + K_SHORT + K_INT =>
                {
                    TypeArena::SHORT
                }
                c if c == K_UNSIGNED + K_SHORT || c == K_UNSIGNED + K_SHORT + K_INT => {
                    TypeArena::USHORT
                }
                c if c == K_INT || c == K_SIGNED || c == K_SIGNED + K_INT => TypeArena::INT,
                c if c == K_UNSIGNED || c == K_UNSIGNED + K_INT => TypeArena::UINT,
                c if c == K_LONG
                    || c == K_LONG + K_INT
                    || c == K_LONG + K_LONG
                    || c == K_LONG + K_LONG + K_INT
                    || c == K_SIGNED + K_LONG
                    || c == K_SIGNED + K_LONG + K_INT
                    || c == K_SIGNED + K_LONG + K_LONG
                    || c == K_SIGNED + K_LONG + K_LONG + K_INT =>
                {
                    TypeArena::LONG
                }
                c if c == K_UNSIGNED + K_LONG
                    || c == K_UNSIGNED + K_LONG + K_INT
                    || c == K_UNSIGNED + K_LONG + K_LONG
                    || c == K_UNSIGNED + K_LONG + K_LONG + K_INT =>
                {
                    TypeArena::ULONG
                }
                c if c == K_FLOAT => TypeArena::FLOAT,
                c if c == K_DOUBLE || c == K_LONG + K_DOUBLE => TypeArena::DOUBLE,
                _ => {
                    return Err(CompileError::syntax(
                        "invalid combination of type specifiers",
                        span,
                    ))
                }
            };
        }

        if counter == 0 {
            return Err(self.error(format!("expected a type specifier, got {}", self.kind())));
        }
        Ok(ty)
    }

    /// declarator = "*"* ("(" declarator ")" | ident?) type-suffix
    ///
    /// A parenthesized inner declarator binds tighter than the suffix
    /// (`int (*f)(void)` is a pointer to function). As in every C
    /// parser, the inner declarator is skipped first, the suffix is
    /// applied to the base type, and the cursor rewinds to parse the
    /// inner part against the suffixed type.
    pub(super) fn declarator(&mut self, mut base: TypeId) -> Result<Declarator> {
        while self.eat(TokenKind::Star) {
            base = self.ctx.types.pointer_to(base);
        }

        if self.at(TokenKind::LParen) {
            let open = self.save();
            self.advance();
            self.declarator(TypeArena::VOID)?; // skip; results discarded
            self.expect(TokenKind::RParen)?;
            let ty = self.type_suffix(base)?;
            let end = self.save();
            self.restore(open + 1);
            let inner = self.declarator(ty)?;
            self.restore(end);
            return Ok(inner);
        }

        let (name, span) = match self.kind() {
            TokenKind::Identifier(n) => {
                let n = n.clone();
                let s = self.span();
                self.advance();
                (Some(n), s)
            }
            _ => (None, self.span()),
        };
        let ty = self.type_suffix(base)?;
        Ok(Declarator { ty, name, span })
    }

    /// type-name = declspec abstract-declarator (for casts and sizeof)
    pub(super) fn typename(&mut self) -> Result<TypeId> {
        let base = self.declspec(None)?;
        let d = self.declarator(base)?;
        if let Some(name) = d.name {
            return Err(CompileError::syntax(
                format!("unexpected identifier '{}' in type name", name),
                d.span,
            ));
        }
        Ok(d.ty)
    }

    /// type-suffix = "(" func-params | "[" array-dimensions | ε
    fn type_suffix(&mut self, ty: TypeId) -> Result<TypeId> {
        if self.at(TokenKind::LParen) {
            return self.func_params(ty);
        }
        if self.eat(TokenKind::LBracket) {
            let (len, span) = if self.at(TokenKind::RBracket) {
                (None, self.span())
            } else {
                let e = self.conditional_const()?;
                if e < 0 {
                    return Err(self.error("array size is negative"));
                }
                (Some(e as usize), self.span())
            };
            self.expect(TokenKind::RBracket)?;
            let elem = self.type_suffix(ty)?;
            return self.ctx.types.array_of_opt(elem, len, span);
        }
        Ok(ty)
    }

    /// Parse and fold a constant expression (array sizes, enum values,
    /// case labels).
    pub(super) fn conditional_const(&mut self) -> Result<i64> {
        let span = self.span();
        let e = self.assign()?;
        super::const_eval::eval_int(&self.ctx.types, &e).ok_or_else(|| {
            CompileError::syntax("expected a compile-time constant expression", span)
        })
    }

    /// func-params = "(" "void" ")" | "(" (param ("," param)* (",...")?)? ")"
    ///
    /// Parameter types get the usual adjustments: arrays decay to
    /// pointers, functions to function pointers. Names are kept aside
    /// for a following function definition.
    fn func_params(&mut self, ret: TypeId) -> Result<TypeId> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut names = Vec::new();
        let mut variadic = false;

        if self.at(TokenKind::Void) && *self.nth_kind(1) == TokenKind::RParen {
            self.advance();
        } else {
            while !self.at(TokenKind::RParen) {
                if !params.is_empty() {
                    self.expect(TokenKind::Comma)?;
                }
                if self.eat(TokenKind::Ellipsis) {
                    if params.is_empty() {
                        return Err(self.error("a named parameter is required before '...'"));
                    }
                    variadic = true;
                    break;
                }
                let base = self.declspec(None)?;
                let d = self.declarator(base)?;
                let ty = match self.ctx.types.kind(d.ty) {
                    TypeKind::Array { base, .. } => {
                        let base = *base;
                        self.ctx.types.pointer_to(base)
                    }
                    TypeKind::Func { .. } => self.ctx.types.pointer_to(d.ty),
                    TypeKind::Void => {
                        return Err(CompileError::type_mismatch(
                            "parameter has incomplete type 'void'",
                            d.span,
                        ))
                    }
                    _ => d.ty,
                };
                params.push(ty);
                names.push((d.name, ty, d.span));
            }
        }
        self.expect(TokenKind::RParen)?;
        self.last_fn_params = names;
        Ok(self.ctx.types.func_type(ret, params, variadic))
    }

    /// struct-union-specifier = ("struct" | "union") ident? ("{" members "}")?
    fn struct_union_specifier(&mut self, is_union: bool) -> Result<TypeId> {
        let kw_span = self.span();
        self.advance(); // struct/union keyword
        let tag = match self.kind() {
            TokenKind::Identifier(n) => {
                let n = n.clone();
                self.advance();
                Some(n)
            }
            _ => None,
        };

        if !self.at(TokenKind::LBrace) {
            // Reference or forward declaration: a tag is required.
            let Some(tag) = tag else {
                return Err(CompileError::syntax(
                    "expected '{' or a tag name after struct/union keyword",
                    kw_span,
                ));
            };
            if let Some(ty) = self.scopes.lookup_tag(&tag) {
                return Ok(ty);
            }
            let ty = self
                .ctx
                .types
                .aggregate_placeholder(Some(tag.clone()), is_union);
            self.scopes.declare_tag(&tag, ty, kw_span)?;
            return Ok(ty);
        }

        // Definition. Completing a forward declaration from the same
        // scope reuses its TypeId so earlier references see the layout.
        let ty = match &tag {
            Some(t) => match self.scopes.lookup_tag_current(t) {
                Some(existing) => {
                    if self.ctx.types.is_complete(existing) {
                        return Err(CompileError::redeclaration(t.clone(), kw_span));
                    }
                    existing
                }
                None => {
                    let ty = self
                        .ctx
                        .types
                        .aggregate_placeholder(Some(t.clone()), is_union);
                    self.scopes.declare_tag(t, ty, kw_span)?;
                    ty
                }
            },
            None => self.ctx.types.aggregate_placeholder(None, is_union),
        };

        self.expect(TokenKind::LBrace)?;
        let mut members = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let base = self.declspec(None)?;
            let mut first = true;
            while !self.eat(TokenKind::Semicolon) {
                if !first {
                    self.expect(TokenKind::Comma)?;
                }
                first = false;
                let d = self.declarator(base)?;
                let Some(name) = d.name else {
                    return Err(CompileError::syntax("expected member name", d.span));
                };
                members.push((name, d.ty, d.span));
            }
        }
        let close = self.expect(TokenKind::RBrace)?;
        self.ctx.types.complete_aggregate(ty, members, close)?;
        Ok(ty)
    }

    /// enum-specifier = "enum" ident? "{" enumerator ("," enumerator)* ","? "}"
    ///                | "enum" ident
    ///
    /// Enumerators are ordinary-namespace constants of type `int`,
    /// numbered from zero or from the last explicit value.
    fn enum_specifier(&mut self) -> Result<TypeId> {
        let kw_span = self.span();
        self.advance(); // enum keyword
        let tag = match self.kind() {
            TokenKind::Identifier(n) => {
                let n = n.clone();
                self.advance();
                Some(n)
            }
            _ => None,
        };

        if !self.at(TokenKind::LBrace) {
            let Some(tag) = tag else {
                return Err(CompileError::syntax(
                    "expected '{' or a tag name after enum keyword",
                    kw_span,
                ));
            };
            let Some(ty) = self.scopes.lookup_tag(&tag) else {
                return Err(CompileError::undefined_symbol(tag, kw_span));
            };
            if !matches!(self.ctx.types.kind(ty), TypeKind::Enum { .. }) {
                return Err(CompileError::type_mismatch(
                    format!("'{}' defined as wrong kind of tag", tag),
                    kw_span,
                ));
            }
            return Ok(ty);
        }

        let ty = self.ctx.types.enum_type(tag.clone());
        if let Some(t) = &tag {
            self.scopes.declare_tag(t, ty, kw_span)?;
        }

        self.expect(TokenKind::LBrace)?;
        let mut value: i64 = 0;
        let mut first = true;
        while !self.at(TokenKind::RBrace) {
            if !first {
                self.expect(TokenKind::Comma)?;
                if self.at(TokenKind::RBrace) {
                    break; // trailing comma
                }
            }
            first = false;
            let (name, span) = self.expect_ident()?;
            if self.eat(TokenKind::Assign) {
                value = self.conditional_const()?;
            }
            self.scopes
                .declare_var(&name, VarScopeEntry::EnumConst(value, TypeArena::INT), span)?;
            value += 1;
        }
        self.expect(TokenKind::RBrace)?;
        Ok(ty)
    }

    // --- file scope -------------------------------------------------------

    /// external-declaration = function-definition | declaration
    pub(super) fn external_declaration(&mut self) -> Result<()> {
        let mut attr = DeclAttr::default();
        let base = self.declspec(Some(&mut attr))?;

        // Lone specifier: `struct S { ... };`, `enum E { ... };`
        if self.eat(TokenKind::Semicolon) {
            return Ok(());
        }

        if attr.is_typedef {
            self.typedef_declaration(base)?;
            return Ok(());
        }

        let d = self.declarator(base)?;
        let Some(name) = d.name.clone() else {
            return Err(CompileError::syntax("expected a declared name", d.span));
        };

        if matches!(self.ctx.types.kind(d.ty), TypeKind::Func { .. }) {
            return self.function(d.ty, &name, d.span, &attr);
        }

        // Global variables; more declarators may follow.
        self.global_variable(d.ty, &name, d.span, &attr)?;
        while !self.eat(TokenKind::Semicolon) {
            self.expect(TokenKind::Comma)?;
            let d = self.declarator(base)?;
            let Some(name) = d.name else {
                return Err(CompileError::syntax("expected a declared name", d.span));
            };
            self.global_variable(d.ty, &name, d.span, &attr)?;
        }
        Ok(())
    }

    fn typedef_declaration(&mut self, base: TypeId) -> Result<()> {
        let mut first = true;
        while !self.eat(TokenKind::Semicolon) {
            if !first {
                self.expect(TokenKind::Comma)?;
            }
            first = false;
            let d = self.declarator(base)?;
            let Some(name) = d.name else {
                return Err(CompileError::syntax("expected a typedef name", d.span));
            };
            self.scopes
                .declare_var(&name, VarScopeEntry::Typedef(d.ty), d.span)?;
        }
        Ok(())
    }

    /// A function prototype or definition.
    fn function(&mut self, ty: TypeId, name: &str, span: Span, attr: &DeclAttr) -> Result<()> {
        let params = std::mem::take(&mut self.last_fn_params);
        let (ret, is_def) = match self.ctx.types.kind(ty) {
            TypeKind::Func { ret, .. } => (*ret, self.at(TokenKind::LBrace)),
            _ => unreachable!(),
        };
        if matches!(
            self.ctx.types.kind(ret),
            TypeKind::Struct(_) | TypeKind::Union(_) | TypeKind::Array { .. }
        ) {
            return Err(CompileError::type_mismatch(
                format!(
                    "function '{}' declared with aggregate return type '{}'",
                    name,
                    self.ctx.types.display(ret)
                ),
                span,
            ));
        }

        // Bind the name up front so the body can recurse into it.
        let obj = Obj {
            name: name.to_string(),
            ty,
            is_static: attr.is_static,
            is_definition: is_def,
            kind: ObjKind::Function {
                params: Vec::new(),
                locals: Vec::new(),
                body: None,
                labels: HashMap::new(),
                stack_size: 0,
            },
            span,
        };
        let id = self.ctx.objects.declare(obj, &self.ctx.types)?;
        if self.scopes.lookup_var(name).is_none() {
            self.scopes
                .declare_var(name, VarScopeEntry::Object(VarRef::Global(id), ty), span)?;
        }

        if !is_def {
            self.expect(TokenKind::Semicolon)?;
            return Ok(());
        }

        // Definition: fresh function-local state.
        self.locals.clear();
        self.labels.clear();
        self.gotos.clear();
        self.current_ret = Some(ret);

        self.scopes.enter();
        let mut param_ids = Vec::with_capacity(params.len());
        for (pname, pty, pspan) in params {
            let Some(pname) = pname else {
                return Err(CompileError::syntax("parameter name omitted", pspan));
            };
            self.ctx.types.sized(pty, pspan)?;
            param_ids.push(self.new_local(&pname, pty, pspan)?);
        }
        let body = self.compound_stmt()?;
        self.scopes.leave();
        self.current_ret = None;

        // Every goto must target a label defined somewhere in this body.
        for (label, gspan) in std::mem::take(&mut self.gotos) {
            if !self.labels.contains_key(&label) {
                return Err(CompileError::new(ErrorKind::UndefinedLabel(label), gspan));
            }
        }

        debug!("parsed function '{}': {} locals", name, self.locals.len());
        let obj = self.ctx.objects.get_mut(id);
        obj.kind = ObjKind::Function {
            params: param_ids,
            locals: std::mem::take(&mut self.locals),
            body: Some(body),
            labels: std::mem::take(&mut self.labels),
            stack_size: 0,
        };
        Ok(())
    }

    /// One global variable declarator, with optional initializer.
    fn global_variable(
        &mut self,
        ty: TypeId,
        name: &str,
        span: Span,
        attr: &DeclAttr,
    ) -> Result<()> {
        if matches!(self.ctx.types.kind(ty), TypeKind::Void) {
            return Err(CompileError::type_mismatch(
                format!("variable '{}' declared void", name),
                span,
            ));
        }

        let (ty, init) = if self.eat(TokenKind::Assign) {
            let (image, ty) = self.global_initializer(ty)?;
            (ty, Some(image))
        } else {
            (ty, None)
        };

        // `extern` alone is a declaration; an initializer always makes a
        // definition.
        let is_definition = !attr.is_extern || init.is_some();
        if is_definition {
            // Storage is reserved here, so the size must be known.
            self.ctx.types.sized(ty, span)?;
        }
        let obj = Obj {
            name: name.to_string(),
            ty,
            is_static: attr.is_static,
            is_definition,
            kind: ObjKind::Global { init },
            span,
        };
        let id = self.ctx.objects.declare(obj, &self.ctx.types)?;
        if self.scopes.lookup_var(name).is_none() {
            self.scopes
                .declare_var(name, VarScopeEntry::Object(VarRef::Global(id), ty), span)?;
        }
        Ok(())
    }

    // --- block scope ------------------------------------------------------

    /// declaration = declspec (declarator ("=" initializer)?)* ";"
    ///
    /// Returns the initializer assignments, already flattened into
    /// ordered statements against the new local.
    pub(super) fn declaration(&mut self) -> Result<Vec<Stmt>> {
        let mut attr = DeclAttr::default();
        let base = self.declspec(Some(&mut attr))?;
        if attr.is_typedef {
            self.typedef_declaration(base)?;
            return Ok(Vec::new());
        }
        if attr.is_static || attr.is_extern {
            return Err(self.error("storage class specifiers are not supported at block scope"));
        }

        let mut stmts = Vec::new();
        let mut first = true;
        while !self.eat(TokenKind::Semicolon) {
            if !first {
                self.expect(TokenKind::Comma)?;
            }
            first = false;

            let d = self.declarator(base)?;
            let Some(name) = d.name else {
                return Err(CompileError::syntax("expected a declared name", d.span));
            };
            if matches!(self.ctx.types.kind(d.ty), TypeKind::Void) {
                return Err(CompileError::type_mismatch(
                    format!("variable '{}' declared void", name),
                    d.span,
                ));
            }

            if self.eat(TokenKind::Assign) {
                let (init, ty) = self.parse_initializer(d.ty)?;
                self.ctx.types.sized(ty, d.span)?;
                let local = self.new_local(&name, ty, d.span)?;
                let var = Expr::new(ExprKind::Var(VarRef::Local(local)), ty, d.span);
                self.flatten_local_init(var, &init, &mut stmts)?;
            } else {
                self.ctx.types.sized(d.ty, d.span)?;
                self.new_local(&name, d.ty, d.span)?;
            }
        }
        Ok(stmts)
    }
}
