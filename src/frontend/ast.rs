//! The typed abstract syntax tree.
//!
//! Expressions and statements are separate sum types; each variant carries
//! exactly the fields it needs, and every consumer matches exhaustively.
//! An `Expr` owns its resolved `TypeId` as a plain field: the parser types
//! nodes as it builds them, so there is no untyped AST state to check for
//! later.

use crate::common::source::Span;
use crate::frontend::types::TypeId;

/// Index of an object (function or global) in the object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub u32);

/// Index of a local-variable slot within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// A control-flow label, unique across the whole compilation unit.
/// Allocated from the context's monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// What a variable reference resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRef {
    Local(LocalId),
    Global(ObjId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not; always yields `int` 0 or 1.
    Not,
    /// Bitwise complement.
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    // `>` and `>=` are normalized to these with swapped operands.
    Eq,
    Ne,
    Lt,
    Le,
    LogAnd,
    LogOr,
}

/// An expression with its resolved type.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeId,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: TypeId, span: Span) -> Self {
        Self { kind, ty, span }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer literal; also carries character constants, `_Bool` values,
    /// and enum constants after resolution.
    Num(i64),
    /// Floating literal (value kept as f64; the node type selects the
    /// emitted width).
    Float(f64),
    Var(VarRef),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Assignment; yields the stored value.
    Assign {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `cond ? then : els`
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    Comma {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Member access on a struct/union lvalue. `a->b` is parsed as
    /// `(*a).b`, so the base here is always the aggregate itself.
    Member {
        base: Box<Expr>,
        member: String,
        offset: usize,
    },
    /// Address-of; operand is an lvalue.
    Addr(Box<Expr>),
    /// Pointer dereference.
    Deref(Box<Expr>),
    /// Conversion to this node's type.
    Cast(Box<Expr>),
    /// Direct call. Argument expressions are already cast to the
    /// parameter types (or default-promoted past the fixed parameters
    /// of a variadic function).
    Call {
        name: String,
        func_ty: TypeId,
        args: Vec<Expr>,
    },
}

/// A statement.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    ExprStmt(Expr),
    /// The expression is already cast to the function's return type.
    Return(Option<Expr>),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
    },
    /// `for` and `while` (a `while` is a `for` without init/inc).
    /// Break/continue labels are allocated at parse time from the
    /// compilation-wide counter.
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        inc: Option<Expr>,
        body: Box<Stmt>,
        break_label: LabelId,
        continue_label: LabelId,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
        break_label: LabelId,
        continue_label: LabelId,
    },
    /// The body contains `Case`/`DefaultCase` statements; the dispatch
    /// list was collected at parse time with case values evaluated as
    /// constants.
    Switch {
        cond: Expr,
        body: Box<Stmt>,
        cases: Vec<SwitchCase>,
        default_label: Option<LabelId>,
        break_label: LabelId,
    },
    Case {
        label: LabelId,
        body: Box<Stmt>,
    },
    DefaultCase {
        label: LabelId,
        body: Box<Stmt>,
    },
    /// `goto name;` — the name resolves through the function's label
    /// table, which is checked complete at end of function parse.
    Goto {
        name: String,
    },
    /// `break`/`continue` resolve at parse time to the innermost
    /// enclosing loop/switch label.
    Jump {
        label: LabelId,
    },
    Label {
        name: String,
        label: LabelId,
        body: Box<Stmt>,
    },
}

/// One `case` arm of a `switch`: the constant value and the label of the
/// arm's body.
#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub value: i64,
    pub label: LabelId,
}
