//! The object table: every function and global variable of one
//! compilation unit, in declaration order.
//!
//! The table is produced by the parser and is read-only afterwards —
//! nothing is added or removed once parsing completes. The code
//! generator only annotates functions with frame-layout results (local
//! offsets and the rounded stack size) and then emits the table in
//! order, which is what makes output deterministic for identical input.

use std::collections::HashMap;

use crate::common::error::{CompileError, Result};
use crate::common::source::Span;
use crate::frontend::ast::{LabelId, LocalId, ObjId, Stmt};
use crate::frontend::types::{TypeArena, TypeId};

/// A local variable (or parameter) slot within one function's frame.
///
/// `offset` is the rbp-relative displacement assigned by the code
/// generator's frame-layout pass: negative for locals below the frame
/// pointer, positive for stack-passed parameters above it. Zero until
/// layout runs.
#[derive(Debug, Clone)]
pub struct LocalSlot {
    pub name: String,
    pub ty: TypeId,
    pub offset: i32,
}

/// A linker fix-up inside a global's initializer image: at `offset`,
/// patch in the address of `target` plus `addend`. Targets are symbol
/// names, never direct references, so globals that point at each other
/// (or themselves) cannot form ownership cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub offset: usize,
    pub target: String,
    pub addend: i64,
}

/// Flattened initializer image of a global: raw bytes plus the
/// relocations to patch into them. A global without one is zero-filled.
#[derive(Debug, Clone, Default)]
pub struct GlobalInit {
    pub data: Vec<u8>,
    pub relocs: Vec<Relocation>,
}

#[derive(Debug)]
pub enum ObjKind {
    Function {
        /// Slots `0..params.len()` of `locals` are the parameters, in
        /// declared order.
        params: Vec<LocalId>,
        locals: Vec<LocalSlot>,
        /// None for a prototype without a body.
        body: Option<Stmt>,
        /// Named labels of this function's body, fully resolved at end
        /// of function parse.
        labels: HashMap<String, LabelId>,
        /// Frame size rounded to the stack alignment; assigned by the
        /// code generator.
        stack_size: usize,
    },
    Global {
        /// None means uninitialized (zero-filled at emission).
        init: Option<GlobalInit>,
    },
}

/// A named entity at file scope.
#[derive(Debug)]
pub struct Obj {
    pub name: String,
    pub ty: TypeId,
    /// Internal linkage (`static`). Anonymous string-literal objects are
    /// always internal.
    pub is_static: bool,
    /// A definition (has a body / reserves storage) as opposed to a
    /// declaration (`extern` variable, function prototype).
    pub is_definition: bool,
    pub kind: ObjKind,
    pub span: Span,
}

impl Obj {
    pub fn is_function(&self) -> bool {
        matches!(self.kind, ObjKind::Function { .. })
    }
}

/// Ordered symbol table of one compilation unit.
pub struct ObjectTable {
    objs: Vec<Obj>,
    by_name: HashMap<String, ObjId>,
    anon_strings: u32,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            objs: Vec::new(),
            by_name: HashMap::new(),
            anon_strings: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }

    pub fn get(&self, id: ObjId) -> &Obj {
        &self.objs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ObjId) -> &mut Obj {
        &mut self.objs[id.0 as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<ObjId> {
        self.by_name.get(name).copied()
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjId, &Obj)> {
        self.objs
            .iter()
            .enumerate()
            .map(|(i, o)| (ObjId(i as u32), o))
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjId> {
        (0..self.objs.len() as u32).map(ObjId)
    }

    /// Register a declaration or definition.
    ///
    /// A name may be declared many times but defined once: a second
    /// definition of the same symbol is a duplicate-symbol error,
    /// detected here at declaration time rather than at emission. A
    /// redeclaration must have a compatible type. A definition replaces
    /// an earlier declaration in place, keeping its table position.
    pub fn declare(&mut self, obj: Obj, types: &TypeArena) -> Result<ObjId> {
        match self.by_name.get(&obj.name) {
            None => {
                let id = ObjId(self.objs.len() as u32);
                self.by_name.insert(obj.name.clone(), id);
                self.objs.push(obj);
                Ok(id)
            }
            Some(&id) => {
                let existing = &self.objs[id.0 as usize];
                if !types.compatible(existing.ty, obj.ty) {
                    return Err(CompileError::type_mismatch(
                        format!(
                            "conflicting types for '{}': '{}' vs '{}'",
                            obj.name,
                            types.display(obj.ty),
                            types.display(existing.ty)
                        ),
                        obj.span,
                    ));
                }
                if existing.is_definition && obj.is_definition {
                    return Err(CompileError::duplicate_symbol(obj.name, obj.span));
                }
                if obj.is_definition {
                    self.objs[id.0 as usize] = obj;
                }
                Ok(id)
            }
        }
    }

    /// Register an anonymous internal global (string-literal data).
    pub fn add_string_literal(&mut self, ty: TypeId, data: Vec<u8>, span: Span) -> ObjId {
        let name = format!(".L.str.{}", self.anon_strings);
        self.anon_strings += 1;
        let id = ObjId(self.objs.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.objs.push(Obj {
            name,
            ty,
            is_static: true,
            is_definition: true,
            kind: ObjKind::Global {
                init: Some(GlobalInit {
                    data,
                    relocs: Vec::new(),
                }),
            },
            span,
        });
        id
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(name: &str, ty: TypeId, is_definition: bool) -> Obj {
        Obj {
            name: name.to_string(),
            ty,
            is_static: false,
            is_definition,
            kind: ObjKind::Global { init: None },
            span: Span::dummy(),
        }
    }

    #[test]
    fn declaration_order_is_preserved() {
        let types = TypeArena::new();
        let mut t = ObjectTable::new();
        t.declare(global("a", TypeArena::INT, true), &types).unwrap();
        t.declare(global("b", TypeArena::INT, true), &types).unwrap();
        t.declare(global("c", TypeArena::INT, true), &types).unwrap();
        let names: Vec<&str> = t.iter().map(|(_, o)| o.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn two_definitions_collide() {
        let types = TypeArena::new();
        let mut t = ObjectTable::new();
        t.declare(global("g", TypeArena::INT, true), &types).unwrap();
        let err = t.declare(global("g", TypeArena::INT, true), &types).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::common::error::ErrorKind::DuplicateSymbol(_)
        ));
    }

    #[test]
    fn declaration_then_definition_merges_in_place() {
        let types = TypeArena::new();
        let mut t = ObjectTable::new();
        let id1 = t.declare(global("g", TypeArena::INT, false), &types).unwrap();
        t.declare(global("other", TypeArena::INT, true), &types).unwrap();
        let id2 = t.declare(global("g", TypeArena::INT, true), &types).unwrap();
        assert_eq!(id1, id2);
        assert!(t.get(id1).is_definition);
        // position unchanged: g still first
        assert_eq!(t.iter().next().unwrap().1.name, "g");
    }

    #[test]
    fn conflicting_redeclaration_type_is_rejected() {
        let types = TypeArena::new();
        let mut t = ObjectTable::new();
        t.declare(global("g", TypeArena::INT, false), &types).unwrap();
        let err = t.declare(global("g", TypeArena::LONG, true), &types).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::common::error::ErrorKind::TypeMismatch(_)
        ));
    }

    #[test]
    fn string_literals_get_distinct_internal_names() {
        let mut t = ObjectTable::new();
        let a = t.add_string_literal(TypeArena::CHAR, b"a\0".to_vec(), Span::dummy());
        let b = t.add_string_literal(TypeArena::CHAR, b"b\0".to_vec(), Span::dummy());
        assert_ne!(t.get(a).name, t.get(b).name);
        assert!(t.get(a).is_static);
    }
}
