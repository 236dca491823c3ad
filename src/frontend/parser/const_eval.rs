//! Compile-time evaluation over typed expressions.
//!
//! Two evaluators: `eval_int`/`eval_double` fold constant scalars (enum
//! values, array lengths, case labels, global initializers), and
//! `eval_address` reduces address constants to "symbol plus offset" for
//! the relocation table. All return `None` for anything that is not a
//! compile-time constant; the caller decides which error that is.

use crate::backend::object::ObjectTable;
use crate::frontend::ast::{BinaryOp, Expr, ExprKind, UnaryOp, VarRef};
use crate::frontend::types::{TypeArena, TypeId, TypeKind};

/// Fold an integer constant expression.
pub(super) fn eval_int(types: &TypeArena, e: &Expr) -> Option<i64> {
    match &e.kind {
        ExprKind::Num(v) => Some(*v),
        ExprKind::Float(_) => None, // reaches integers only through a cast

        ExprKind::Cast(inner) => {
            if types.is_flonum(inner.ty) {
                let v = eval_double(types, inner)?;
                Some(truncate(types, v as i64, e.ty))
            } else {
                let v = eval_int(types, inner)?;
                Some(truncate(types, v, e.ty))
            }
        }

        ExprKind::Unary { op, operand } => {
            let v = eval_int(types, operand)?;
            Some(match op {
                UnaryOp::Neg => v.wrapping_neg(),
                UnaryOp::Not => (v == 0) as i64,
                UnaryOp::BitNot => !v,
            })
        }

        ExprKind::Binary { op, lhs, rhs } => {
            // Logical operators short-circuit even at compile time, so a
            // constant `0 && x` folds regardless of `x`.
            match op {
                BinaryOp::LogAnd => {
                    let l = eval_int(types, lhs)?;
                    if l == 0 {
                        return Some(0);
                    }
                    return Some((eval_int(types, rhs)? != 0) as i64);
                }
                BinaryOp::LogOr => {
                    let l = eval_int(types, lhs)?;
                    if l != 0 {
                        return Some(1);
                    }
                    return Some((eval_int(types, rhs)? != 0) as i64);
                }
                _ => {}
            }

            let l = eval_int(types, lhs)?;
            let r = eval_int(types, rhs)?;
            let unsigned = types.is_unsigned(lhs.ty);
            Some(match op {
                BinaryOp::Add => l.wrapping_add(r),
                BinaryOp::Sub => l.wrapping_sub(r),
                BinaryOp::Mul => l.wrapping_mul(r),
                BinaryOp::Div => {
                    if r == 0 {
                        return None;
                    }
                    if unsigned {
                        ((l as u64) / (r as u64)) as i64
                    } else {
                        l.wrapping_div(r)
                    }
                }
                BinaryOp::Mod => {
                    if r == 0 {
                        return None;
                    }
                    if unsigned {
                        ((l as u64) % (r as u64)) as i64
                    } else {
                        l.wrapping_rem(r)
                    }
                }
                BinaryOp::BitAnd => l & r,
                BinaryOp::BitOr => l | r,
                BinaryOp::BitXor => l ^ r,
                BinaryOp::Shl => l.wrapping_shl(r as u32),
                BinaryOp::Shr => {
                    if unsigned {
                        ((l as u64).wrapping_shr(r as u32)) as i64
                    } else {
                        l.wrapping_shr(r as u32)
                    }
                }
                BinaryOp::Eq => (l == r) as i64,
                BinaryOp::Ne => (l != r) as i64,
                BinaryOp::Lt => {
                    if unsigned {
                        ((l as u64) < (r as u64)) as i64
                    } else {
                        (l < r) as i64
                    }
                }
                BinaryOp::Le => {
                    if unsigned {
                        ((l as u64) <= (r as u64)) as i64
                    } else {
                        (l <= r) as i64
                    }
                }
                BinaryOp::LogAnd | BinaryOp::LogOr => unreachable!("handled above"),
            })
        }

        ExprKind::Cond { cond, then, els } => {
            if eval_int(types, cond)? != 0 {
                eval_int(types, then)
            } else {
                eval_int(types, els)
            }
        }

        ExprKind::Comma { rhs, .. } => eval_int(types, rhs),

        ExprKind::Var(_)
        | ExprKind::Assign { .. }
        | ExprKind::Member { .. }
        | ExprKind::Addr(_)
        | ExprKind::Deref(_)
        | ExprKind::Call { .. } => None,
    }
}

/// Conversion to an integer type narrows the value to the type's width
/// and re-extends per its signedness; `_Bool` normalizes to 0/1.
fn truncate(types: &TypeArena, v: i64, ty: TypeId) -> i64 {
    if matches!(types.kind(ty), TypeKind::Bool) {
        return (v != 0) as i64;
    }
    if !types.is_integer(ty) {
        return v; // pointer-width casts keep the value
    }
    let unsigned = types.is_unsigned(ty);
    match types.size(ty) {
        1 => {
            if unsigned {
                v as u8 as i64
            } else {
                v as i8 as i64
            }
        }
        2 => {
            if unsigned {
                v as u16 as i64
            } else {
                v as i16 as i64
            }
        }
        4 => {
            if unsigned {
                v as u32 as i64
            } else {
                v as i32 as i64
            }
        }
        _ => v,
    }
}

/// Fold a floating constant expression.
pub(super) fn eval_double(types: &TypeArena, e: &Expr) -> Option<f64> {
    match &e.kind {
        ExprKind::Float(v) => Some(*v),
        ExprKind::Num(v) => Some(*v as f64),
        ExprKind::Cast(inner) => {
            let v = if types.is_flonum(inner.ty) {
                eval_double(types, inner)?
            } else {
                eval_int(types, inner)? as f64
            };
            // Rounding through float is observable, so model it.
            if matches!(types.kind(e.ty), TypeKind::Float) {
                Some(v as f32 as f64)
            } else {
                Some(v)
            }
        }
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => Some(-eval_double(types, operand)?),
        ExprKind::Binary { op, lhs, rhs } => {
            let l = eval_double(types, lhs)?;
            let r = eval_double(types, rhs)?;
            Some(match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                _ => return None,
            })
        }
        ExprKind::Comma { rhs, .. } => eval_double(types, rhs),
        _ => None,
    }
}

/// Reduce an address constant to `(symbol, addend)`: the address of a
/// global plus a constant byte offset. This is exactly the shape a
/// static-initializer relocation can express.
pub(super) fn eval_address(
    types: &TypeArena,
    objects: &ObjectTable,
    e: &Expr,
) -> Option<(String, i64)> {
    match &e.kind {
        ExprKind::Addr(inner) => lvalue_address(types, objects, inner),
        // An array- or function-typed global decays to its own address.
        ExprKind::Var(VarRef::Global(id)) => match types.kind(e.ty) {
            TypeKind::Array { .. } | TypeKind::Func { .. } => {
                Some((objects.get(*id).name.clone(), 0))
            }
            _ => None,
        },
        ExprKind::Cast(inner) => eval_address(types, objects, inner),
        ExprKind::Binary { op, lhs, rhs } => match op {
            BinaryOp::Add => {
                if let Some((sym, addend)) = eval_address(types, objects, lhs) {
                    let off = eval_int(types, rhs)?;
                    Some((sym, addend + off))
                } else {
                    let off = eval_int(types, lhs)?;
                    let (sym, addend) = eval_address(types, objects, rhs)?;
                    Some((sym, addend + off))
                }
            }
            BinaryOp::Sub => {
                let (sym, addend) = eval_address(types, objects, lhs)?;
                let off = eval_int(types, rhs)?;
                Some((sym, addend - off))
            }
            _ => None,
        },
        _ => None,
    }
}

/// The address of an lvalue, when it is statically known.
fn lvalue_address(
    types: &TypeArena,
    objects: &ObjectTable,
    e: &Expr,
) -> Option<(String, i64)> {
    match &e.kind {
        ExprKind::Var(VarRef::Global(id)) => Some((objects.get(*id).name.clone(), 0)),
        ExprKind::Member { base, offset, .. } => {
            let (sym, addend) = lvalue_address(types, objects, base)?;
            Some((sym, addend + *offset as i64))
        }
        ExprKind::Deref(inner) => eval_address(types, objects, inner),
        _ => None,
    }
}
