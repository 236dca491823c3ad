//! The lexical scope stack.
//!
//! Each frame holds two parallel namespaces: ordinary identifiers
//! (objects, typedef names, enum constants) and tags (struct/union/enum
//! names). Frames are pushed on block entry and popped on block exit —
//! `leave` is the only way bindings disappear, so scope nesting follows
//! lexical nesting exactly. Lookup walks frames innermost-out; shadowing
//! is resolved by the innermost match.

use std::collections::HashMap;

use crate::common::error::{CompileError, Result};
use crate::common::source::Span;
use crate::frontend::ast::VarRef;
use crate::frontend::types::TypeId;

/// What an ordinary identifier is bound to.
#[derive(Debug, Clone)]
pub enum VarScopeEntry {
    Object(VarRef, TypeId),
    Typedef(TypeId),
    EnumConst(i64, TypeId),
}

#[derive(Default)]
struct Frame {
    vars: HashMap<String, VarScopeEntry>,
    tags: HashMap<String, TypeId>,
}

pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    /// A fresh stack with the file-scope frame already in place.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    pub fn enter(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn leave(&mut self) {
        assert!(self.frames.len() > 1, "cannot leave the file scope");
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn at_file_scope(&self) -> bool {
        self.frames.len() == 1
    }

    /// Bind an ordinary identifier in the current frame. Rebinding the
    /// same name in the same frame is a redeclaration error; an inner
    /// frame shadows silently.
    pub fn declare_var(&mut self, name: &str, entry: VarScopeEntry, span: Span) -> Result<()> {
        let frame = self.frames.last_mut().unwrap();
        if frame.vars.contains_key(name) {
            return Err(CompileError::redeclaration(name, span));
        }
        frame.vars.insert(name.to_string(), entry);
        Ok(())
    }

    /// Bind a tag in the current frame. A forward declaration registers
    /// an incomplete type that is later completed in place, so this is
    /// only called once per tag and frame.
    pub fn declare_tag(&mut self, name: &str, ty: TypeId, span: Span) -> Result<()> {
        let frame = self.frames.last_mut().unwrap();
        if frame.tags.contains_key(name) {
            return Err(CompileError::redeclaration(name, span));
        }
        frame.tags.insert(name.to_string(), ty);
        Ok(())
    }

    /// Innermost-out lookup. "Not found" is a recoverable condition the
    /// parser uses to distinguish declarations from uses.
    pub fn lookup_var(&self, name: &str) -> Option<&VarScopeEntry> {
        self.frames.iter().rev().find_map(|f| f.vars.get(name))
    }

    pub fn lookup_tag(&self, name: &str) -> Option<TypeId> {
        self.frames.iter().rev().find_map(|f| f.tags.get(name)).copied()
    }

    /// Tag lookup restricted to the current frame; a definition
    /// completes a tag declared in the same frame but must not touch a
    /// shadowed outer tag.
    pub fn lookup_tag_current(&self, name: &str) -> Option<TypeId> {
        self.frames.last().unwrap().tags.get(name).copied()
    }

    /// True if `name` is a typedef in any visible frame; used while
    /// disambiguating declarations from expressions.
    pub fn is_typedef(&self, name: &str) -> bool {
        matches!(self.lookup_var(name), Some(VarScopeEntry::Typedef(_)))
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{LocalId, VarRef};
    use crate::frontend::types::TypeArena;

    fn obj(n: u32) -> VarScopeEntry {
        VarScopeEntry::Object(VarRef::Local(LocalId(n)), TypeArena::INT)
    }

    #[test]
    fn bindings_disappear_on_leave() {
        let mut s = ScopeStack::new();
        s.enter();
        s.declare_var("x", obj(0), Span::dummy()).unwrap();
        assert!(s.lookup_var("x").is_some());
        s.leave();
        assert!(s.lookup_var("x").is_none());
    }

    #[test]
    fn inner_shadows_outer() {
        let mut s = ScopeStack::new();
        s.declare_var("x", obj(0), Span::dummy()).unwrap();
        s.enter();
        s.declare_var("x", obj(1), Span::dummy()).unwrap();
        match s.lookup_var("x") {
            Some(VarScopeEntry::Object(VarRef::Local(LocalId(1)), _)) => {}
            other => panic!("expected the inner binding, got {:?}", other),
        }
        s.leave();
        match s.lookup_var("x") {
            Some(VarScopeEntry::Object(VarRef::Local(LocalId(0)), _)) => {}
            other => panic!("expected the outer binding, got {:?}", other),
        }
    }

    #[test]
    fn same_frame_redeclaration_is_an_error() {
        let mut s = ScopeStack::new();
        s.declare_var("x", obj(0), Span::dummy()).unwrap();
        let err = s.declare_var("x", obj(1), Span::dummy()).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::common::error::ErrorKind::Redeclaration(_)
        ));
    }

    #[test]
    fn tags_are_a_separate_namespace() {
        let mut s = ScopeStack::new();
        let mut types = TypeArena::new();
        let st = types.aggregate_placeholder(Some("x".into()), false);
        s.declare_var("x", obj(0), Span::dummy()).unwrap();
        s.declare_tag("x", st, Span::dummy()).unwrap();
        assert!(s.lookup_var("x").is_some());
        assert_eq!(s.lookup_tag("x"), Some(st));
    }

    #[test]
    fn current_frame_tag_lookup_ignores_outer() {
        let mut s = ScopeStack::new();
        let mut types = TypeArena::new();
        let outer = types.aggregate_placeholder(Some("S".into()), false);
        s.declare_tag("S", outer, Span::dummy()).unwrap();
        s.enter();
        assert_eq!(s.lookup_tag("S"), Some(outer));
        assert_eq!(s.lookup_tag_current("S"), None);
    }
}
