//! The recursive-descent parser.
//!
//! One pass over the token sequence builds the object table: while
//! consuming tokens the parser resolves scopes, assigns every expression
//! node its type, computes aggregate layouts, and flattens initializers.
//! There is no backtracking beyond bounded lookahead (declaration vs.
//! expression, type name vs. identifier) plus the one cursor rewind that
//! C declarator syntax forces on every implementation.
//!
//! The parser is split into focused modules, each adding methods to the
//! `Parser` struct via `impl` blocks:
//!   - `expressions.rs`: precedence climbing with inline type inference
//!   - `declarations.rs`: declaration specifiers, declarators, globals,
//!     functions, struct/union/enum specifiers
//!   - `statements.rs`: statements, control flow, label resolution
//!   - `initializers.rs`: initializer trees and their flattening
//!   - `const_eval.rs`: compile-time constant and address evaluation
//!
//! Errors are fatal: every production returns `Result` and the first
//! failure unwinds the whole parse.

mod const_eval;
mod declarations;
mod expressions;
mod initializers;
mod statements;

use std::collections::HashMap;

use log::debug;

use crate::backend::object::LocalSlot;
use crate::common::error::{CompileError, Result};
use crate::common::source::Span;
use crate::frontend::ast::{LabelId, LocalId, SwitchCase, VarRef};
use crate::frontend::scope::{ScopeStack, VarScopeEntry};
use crate::frontend::token::{Token, TokenKind};
use crate::frontend::types::TypeId;
use crate::Context;

/// Parse a whole translation unit into `ctx.objects`.
pub fn parse(tokens: &[Token], ctx: &mut Context) -> Result<()> {
    let mut parser = Parser::new(tokens, ctx);
    parser.translation_unit()?;
    debug!(
        "parsed translation unit: {} objects",
        parser.ctx.objects.len()
    );
    Ok(())
}

/// Per-switch parse state: the dispatch list being collected.
pub(super) struct SwitchFrame {
    pub cases: Vec<SwitchCase>,
    pub default_label: Option<LabelId>,
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    pub(super) ctx: &'a mut Context,
    pub(super) scopes: ScopeStack,

    // --- state of the function currently being parsed ---
    /// Locals (parameters first) collected for the current function.
    pub(super) locals: Vec<LocalSlot>,
    /// Return type of the current function; None at file scope.
    pub(super) current_ret: Option<TypeId>,
    /// Named labels seen so far in the current function body.
    pub(super) labels: HashMap<String, LabelId>,
    /// `goto`s seen so far; checked against `labels` at end of body.
    pub(super) gotos: Vec<(String, Span)>,
    /// Innermost-first break/continue targets.
    pub(super) break_labels: Vec<LabelId>,
    pub(super) continue_labels: Vec<LabelId>,
    pub(super) switches: Vec<SwitchFrame>,
    /// Names and types of the parameter list most recently parsed by a
    /// function type suffix; consumed by function definitions.
    pub(super) last_fn_params: Vec<(Option<String>, TypeId, Span)>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], ctx: &'a mut Context) -> Self {
        assert!(
            tokens.last().is_some_and(|t| t.is_eof()),
            "token sequence must end with EOF"
        );
        Self {
            tokens,
            pos: 0,
            ctx,
            scopes: ScopeStack::new(),
            locals: Vec::new(),
            current_ret: None,
            labels: HashMap::new(),
            gotos: Vec::new(),
            break_labels: Vec::new(),
            continue_labels: Vec::new(),
            switches: Vec::new(),
            last_fn_params: Vec::new(),
        }
    }

    fn translation_unit(&mut self) -> Result<()> {
        while !self.peek().is_eof() {
            self.external_declaration()?;
        }
        Ok(())
    }

    // --- cursor ----------------------------------------------------------

    pub(super) fn peek(&self) -> &'a Token {
        &self.tokens[self.pos]
    }

    pub(super) fn kind(&self) -> &'a TokenKind {
        &self.tokens[self.pos].kind
    }

    pub(super) fn nth_kind(&self, n: usize) -> &'a TokenKind {
        let i = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    pub(super) fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    pub(super) fn advance(&mut self) -> &'a Token {
        let tok = &self.tokens[self.pos];
        if !tok.is_eof() {
            self.pos += 1;
        }
        tok
    }

    pub(super) fn save(&self) -> usize {
        self.pos
    }

    pub(super) fn restore(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(super) fn at(&self, kind: TokenKind) -> bool {
        *self.kind() == kind
    }

    pub(super) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(super) fn expect(&mut self, kind: TokenKind) -> Result<Span> {
        if self.at(kind.clone()) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.error(format!("expected {}, got {}", kind, self.kind())))
        }
    }

    pub(super) fn expect_ident(&mut self) -> Result<(String, Span)> {
        match self.kind() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                let span = self.span();
                self.pos += 1;
                Ok((name, span))
            }
            other => Err(self.error(format!("expected identifier, got {}", other))),
        }
    }

    /// A syntax error at the current token.
    pub(super) fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.span())
    }

    // --- function-local helpers ------------------------------------------

    /// Create a local-variable slot in the current function and bind it
    /// in the current scope.
    pub(super) fn new_local(&mut self, name: &str, ty: TypeId, span: Span) -> Result<LocalId> {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalSlot {
            name: name.to_string(),
            ty,
            offset: 0,
        });
        self.scopes
            .declare_var(name, VarScopeEntry::Object(VarRef::Local(id), ty), span)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::object::{ObjKind, Relocation};
    use crate::common::error::ErrorKind;
    use crate::frontend::ast::{Expr, ExprKind, Stmt, StmtKind};
    use crate::frontend::lexer;
    use crate::frontend::types::{TypeArena, TypeKind};

    fn compile_unit(src: &str) -> crate::common::error::Result<Context> {
        let tokens = lexer::lex(src)?;
        let mut ctx = Context::new();
        parse(&tokens, &mut ctx)?;
        Ok(ctx)
    }

    fn err_kind(src: &str) -> ErrorKind {
        match compile_unit(src) {
            Ok(_) => panic!("expected a compile error for: {}", src),
            Err(e) => e.kind,
        }
    }

    /// All integers assigned by the initializer statements of the first
    /// function body, in statement order.
    fn assigned_values(ctx: &Context) -> Vec<i64> {
        let (_, obj) = ctx
            .objects
            .iter()
            .find(|(_, o)| o.is_function())
            .expect("no function in unit");
        let ObjKind::Function {
            body: Some(body), ..
        } = &obj.kind
        else {
            panic!("function has no body");
        };
        let StmtKind::Block(stmts) = &body.kind else {
            panic!("body is not a block");
        };
        let mut out = Vec::new();
        for s in stmts {
            collect_assigned(s, &mut out);
        }
        out
    }

    fn collect_assigned(s: &Stmt, out: &mut Vec<i64>) {
        if let StmtKind::ExprStmt(Expr {
            kind: ExprKind::Assign { rhs, .. },
            ..
        }) = &s.kind
        {
            let mut e: &Expr = rhs;
            while let ExprKind::Cast(inner) = &e.kind {
                e = inner;
            }
            if let ExprKind::Num(v) = e.kind {
                out.push(v);
            }
        }
    }

    #[test]
    fn scenario_add_function() {
        // One function object, two int parameters, a typed body, and no
        // relocations anywhere.
        let ctx = compile_unit("int add(int a, int b) { return a + b; }").unwrap();
        assert_eq!(ctx.objects.len(), 1);
        let (_, obj) = ctx.objects.iter().next().unwrap();
        assert_eq!(obj.name, "add");
        assert!(obj.is_definition);
        let ObjKind::Function {
            params,
            locals,
            body: Some(body),
            ..
        } = &obj.kind
        else {
            panic!("not a function definition");
        };
        assert_eq!(params.len(), 2);
        assert_eq!(locals.len(), 2);
        assert_eq!(locals[0].ty, TypeArena::INT);
        assert_eq!(locals[1].ty, TypeArena::INT);

        let StmtKind::Block(stmts) = &body.kind else {
            panic!("body is not a block");
        };
        let StmtKind::Return(Some(e)) = &stmts[0].kind else {
            panic!("expected a return statement");
        };
        assert_eq!(e.ty, TypeArena::INT);
    }

    #[test]
    fn every_expression_is_typed_at_construction() {
        // The Expr type has no untyped state; spot-check a nested tree.
        let ctx = compile_unit("int f(int x) { return (x + 1) * 2 < 3 ? 4 : 5; }").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        let ObjKind::Function { body: Some(body), .. } = &obj.kind else {
            panic!();
        };
        fn check(e: &Expr) {
            match &e.kind {
                ExprKind::Binary { lhs, rhs, .. } => {
                    check(lhs);
                    check(rhs);
                }
                ExprKind::Cond { cond, then, els } => {
                    check(cond);
                    check(then);
                    check(els);
                }
                ExprKind::Cast(inner) => check(inner),
                _ => {}
            }
        }
        let StmtKind::Block(stmts) = &body.kind else { panic!() };
        let StmtKind::Return(Some(e)) = &stmts[0].kind else { panic!() };
        check(e);
        assert_eq!(e.ty, TypeArena::INT);
    }

    #[test]
    fn inner_scope_name_is_gone_after_block() {
        let err = err_kind("int main() { { int x; } x; return 0; }");
        assert!(matches!(err, ErrorKind::UndefinedSymbol(name) if name == "x"));
    }

    #[test]
    fn same_scope_redeclaration_fails() {
        let err = err_kind("int main() { int x; int x; return 0; }");
        assert!(matches!(err, ErrorKind::Redeclaration(_)));
    }

    #[test]
    fn shadowing_in_inner_scope_is_fine() {
        compile_unit("int main() { int x; { int x; } return x; }").unwrap();
    }

    #[test]
    fn struct_layout_scenario() {
        // struct S { char a; int b; }: a@0, b@4, size 8, align 4
        let ctx = compile_unit("struct S { char a; int b; } s;").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        assert_eq!(ctx.types.size(obj.ty), 8);
        assert_eq!(ctx.types.align(obj.ty), 4);
        assert_eq!(ctx.types.find_member(obj.ty, "a").unwrap().offset, 0);
        assert_eq!(ctx.types.find_member(obj.ty, "b").unwrap().offset, 4);
    }

    #[test]
    fn self_referential_struct_through_pointer() {
        let ctx = compile_unit("struct Node { int v; struct Node *next; } n;").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        assert_eq!(ctx.types.size(obj.ty), 16);
        let next = ctx.types.find_member(obj.ty, "next").unwrap();
        assert_eq!(ctx.types.size(next.ty), 8);
    }

    #[test]
    fn incomplete_struct_cannot_be_instantiated() {
        let err = err_kind("struct S; struct S s;");
        assert!(matches!(err, ErrorKind::IncompleteType(_)));
    }

    #[test]
    fn global_with_constant_data() {
        // int g = 3: four little-endian bytes, no relocations
        let ctx = compile_unit("int g = 3;").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        let ObjKind::Global { init: Some(init) } = &obj.kind else {
            panic!("expected an initialized global");
        };
        assert_eq!(init.data, vec![3, 0, 0, 0]);
        assert!(init.relocs.is_empty());
    }

    #[test]
    fn global_address_initializer_becomes_relocation() {
        // int *p = &g: one relocation {offset 0, target g, addend 0}
        let ctx = compile_unit("int g; int *p = &g;").unwrap();
        let (_, p) = ctx.objects.iter().nth(1).unwrap();
        let ObjKind::Global { init: Some(init) } = &p.kind else {
            panic!("expected an initialized global");
        };
        assert_eq!(
            init.relocs,
            vec![Relocation {
                offset: 0,
                target: "g".to_string(),
                addend: 0,
            }]
        );
    }

    #[test]
    fn global_address_with_offset() {
        let ctx = compile_unit("int a[4]; int *p = a + 2;").unwrap();
        let (_, p) = ctx.objects.iter().nth(1).unwrap();
        let ObjKind::Global { init: Some(init) } = &p.kind else {
            panic!();
        };
        assert_eq!(init.relocs[0].target, "a");
        assert_eq!(init.relocs[0].addend, 8); // 2 elements * 4 bytes
    }

    #[test]
    fn non_constant_global_initializer_is_rejected() {
        let err = err_kind("int a; int b = a;");
        assert_eq!(err, ErrorKind::NonConstantInitializer);
    }

    #[test]
    fn excess_initializer_elements_are_rejected() {
        let err = err_kind("int a[2] = {1, 2, 3};");
        assert_eq!(err, ErrorKind::ExcessInitializer);
    }

    #[test]
    fn local_initializer_round_trip() {
        // Flattening pads trailing elements with zero; reading the
        // assignments back in order reproduces the literal.
        let ctx = compile_unit("int main() { int a[4] = {1, 2}; return 0; }").unwrap();
        assert_eq!(assigned_values(&ctx), vec![1, 2, 0, 0]);
    }

    #[test]
    fn struct_initializer_with_designator() {
        let ctx =
            compile_unit("struct P { int x; int y; }; int main() { struct P p = {.y = 7}; return 0; }")
                .unwrap();
        assert_eq!(assigned_values(&ctx), vec![0, 7]);
    }

    #[test]
    fn string_literal_array_initializer() {
        let ctx = compile_unit("char s[] = \"ab\";").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        assert_eq!(ctx.types.size(obj.ty), 3);
        let ObjKind::Global { init: Some(init) } = &obj.kind else {
            panic!();
        };
        assert_eq!(init.data, b"ab\0");
    }

    #[test]
    fn string_literal_pointer_gets_relocation() {
        let ctx = compile_unit("char *s = \"hi\";").unwrap();
        let (_, s) = ctx
            .objects
            .iter()
            .find(|(_, o)| o.name == "s")
            .unwrap();
        let ObjKind::Global { init: Some(init) } = &s.kind else {
            panic!();
        };
        assert_eq!(init.relocs.len(), 1);
        assert!(init.relocs[0].target.starts_with(".L.str."));
    }

    #[test]
    fn enum_constants_resolve_to_values() {
        let ctx = compile_unit("enum E { A, B = 5, C }; int g = C;").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        let ObjKind::Global { init: Some(init) } = &obj.kind else {
            panic!();
        };
        assert_eq!(init.data, vec![6, 0, 0, 0]);
    }

    #[test]
    fn goto_resolves_forward_references() {
        compile_unit("int main() { goto done; done: return 0; }").unwrap();
    }

    #[test]
    fn goto_to_undefined_label_fails() {
        let err = err_kind("int main() { goto nowhere; return 0; }");
        assert!(matches!(err, ErrorKind::UndefinedLabel(name) if name == "nowhere"));
    }

    #[test]
    fn break_outside_loop_fails() {
        let err = err_kind("int main() { break; }");
        assert_eq!(err, ErrorKind::MisplacedJump("break"));
    }

    #[test]
    fn continue_outside_loop_fails() {
        let err = err_kind("int main() { switch (1) { default: continue; } }");
        assert_eq!(err, ErrorKind::MisplacedJump("continue"));
    }

    #[test]
    fn break_inside_switch_is_fine() {
        compile_unit("int main() { switch (1) { case 1: break; } return 0; }").unwrap();
    }

    #[test]
    fn dereferencing_a_non_pointer_fails() {
        let err = err_kind("int main() { int x; return *x; }");
        assert!(matches!(err, ErrorKind::InvalidDereference(_)));
    }

    #[test]
    fn call_argument_counts_are_checked() {
        let err = err_kind("int f(int a); int main() { return f(); }");
        assert!(matches!(err, ErrorKind::TypeMismatch(_)));
        let err = err_kind("int f(int a); int main() { return f(1, 2); }");
        assert!(matches!(err, ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn variadic_calls_permit_excess_arguments() {
        compile_unit("int printf(char *fmt, ...); int main() { return printf(\"%d\", 1); }")
            .unwrap();
    }

    #[test]
    fn undefined_function_call_fails() {
        let err = err_kind("int main() { return nope(); }");
        assert!(matches!(err, ErrorKind::UndefinedSymbol(name) if name == "nope"));
    }

    #[test]
    fn duplicate_global_definitions_collide() {
        let err = err_kind("int g = 1; int g = 2;");
        assert!(matches!(err, ErrorKind::DuplicateSymbol(name) if name == "g"));
    }

    #[test]
    fn pointer_difference_is_long() {
        let ctx = compile_unit("long d(int *p, int *q) { return p - q; }").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        let ObjKind::Function { body: Some(body), .. } = &obj.kind else {
            panic!();
        };
        let StmtKind::Block(stmts) = &body.kind else { panic!() };
        let StmtKind::Return(Some(e)) = &stmts[0].kind else { panic!() };
        assert_eq!(e.ty, TypeArena::LONG);
    }

    #[test]
    fn sizeof_yields_unsigned_long_constants() {
        let ctx = compile_unit("unsigned long s = sizeof(long); int a[sizeof(int)];").unwrap();
        let (_, s) = ctx.objects.iter().next().unwrap();
        let ObjKind::Global { init: Some(init) } = &s.kind else {
            panic!();
        };
        assert_eq!(init.data, vec![8, 0, 0, 0, 0, 0, 0, 0]);
        let (_, a) = ctx.objects.iter().nth(1).unwrap();
        assert_eq!(ctx.types.size(a.ty), 16); // int[4]
    }

    #[test]
    fn typedef_names_declare_types() {
        let ctx = compile_unit("typedef long word; word w;").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        assert_eq!(obj.ty, TypeArena::LONG);
    }

    #[test]
    fn function_pointer_declarator_parses() {
        // `int (*f)(int)` is a pointer to function, not a function.
        let ctx = compile_unit("int (*fp)(int);").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        let TypeKind::Ptr { base } = ctx.types.kind(obj.ty) else {
            panic!("expected a pointer type, got {}", ctx.types.display(obj.ty));
        };
        assert!(matches!(ctx.types.kind(*base), TypeKind::Func { .. }));
    }

    #[test]
    fn invalid_specifier_combination_fails() {
        let err = err_kind("long float x;");
        assert!(matches!(err, ErrorKind::Syntax(_)));
    }

    #[test]
    fn switch_requires_integer_cond() {
        let err = err_kind("int main() { double d; switch (d) {} return 0; }");
        assert!(matches!(err, ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn assignment_to_array_is_rejected() {
        let err = err_kind("int main() { int a[2]; int b[2]; a = b; return 0; }");
        assert!(matches!(err, ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn union_globals_initialize_first_member() {
        let ctx = compile_unit("union U { int i; char c; } u = {0x01020304};").unwrap();
        let (_, obj) = ctx.objects.iter().next().unwrap();
        let ObjKind::Global { init: Some(init) } = &obj.kind else {
            panic!();
        };
        assert_eq!(init.data, vec![4, 3, 2, 1]);
    }
}
