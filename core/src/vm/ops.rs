//! Operator semantics shared by the dispatch loop: arithmetic, bitwise,
//! comparison, deep equality, and constant-receiver promotion.

use std::cmp::Ordering;

use crate::err::{ErrCode, Fault, VmResult, type_err};
use crate::val::{ObjId, Val};
use crate::vm::Vm;

/// Structural-equality recursion limit. Deeper nesting than this is either
/// a cyclic structure or an adversarial image; both are aborted.
const EQ_DEPTH_LIMIT: u32 = 256;

impl Vm {
    pub(crate) fn op_add(&mut self, a: Val, b: Val) -> VmResult<Val> {
        match a {
            Val::Int(x) => match b {
                Val::Int(y) => x
                    .checked_add(y)
                    .map(Val::Int)
                    .ok_or_else(|| Fault::runtime(ErrCode::IntOverflow)),
                other => type_err(ErrCode::BadTypeAdd, other.type_name()),
            },
            Val::Obj(id) => self.meta_of(id)?.add(self, id, b),
            Val::Str(_) | Val::List(_) => {
                let id = self.promote_const(a)?;
                self.meta_of(id)?.add(self, id, b)
            }
            other => type_err(ErrCode::BadTypeAdd, other.type_name()),
        }
    }

    pub(crate) fn op_sub(&mut self, a: Val, b: Val) -> VmResult<Val> {
        match a {
            Val::Int(x) => match b {
                Val::Int(y) => x
                    .checked_sub(y)
                    .map(Val::Int)
                    .ok_or_else(|| Fault::runtime(ErrCode::IntOverflow)),
                other => type_err(ErrCode::BadTypeSub, other.type_name()),
            },
            Val::Obj(id) => self.meta_of(id)?.sub(self, id, b),
            Val::List(_) => {
                let id = self.promote_const(a)?;
                self.meta_of(id)?.sub(self, id, b)
            }
            other => type_err(ErrCode::BadTypeSub, other.type_name()),
        }
    }

    pub(crate) fn op_mul(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, y) = int_pair(a, b, ErrCode::BadTypeMul)?;
        x.checked_mul(y)
            .map(Val::Int)
            .ok_or_else(|| Fault::runtime(ErrCode::IntOverflow))
    }

    pub(crate) fn op_div(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, y) = int_pair(a, b, ErrCode::BadTypeDiv)?;
        if y == 0 {
            return Err(Fault::runtime(ErrCode::DivByZero));
        }
        x.checked_div(y)
            .map(Val::Int)
            .ok_or_else(|| Fault::runtime(ErrCode::IntOverflow))
    }

    pub(crate) fn op_mod(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, y) = int_pair(a, b, ErrCode::BadTypeMod)?;
        if y == 0 {
            return Err(Fault::runtime(ErrCode::DivByZero));
        }
        x.checked_rem(y)
            .map(Val::Int)
            .ok_or_else(|| Fault::runtime(ErrCode::IntOverflow))
    }

    pub(crate) fn op_neg(&mut self, a: Val) -> VmResult<Val> {
        match a {
            Val::Int(x) => x
                .checked_neg()
                .map(Val::Int)
                .ok_or_else(|| Fault::runtime(ErrCode::IntOverflow)),
            other => type_err(ErrCode::BadTypeNeg, other.type_name()),
        }
    }

    pub(crate) fn op_band(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, y) = int_pair(a, b, ErrCode::BadTypeBitwise)?;
        Ok(Val::Int(x & y))
    }

    pub(crate) fn op_bor(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, y) = int_pair(a, b, ErrCode::BadTypeBitwise)?;
        Ok(Val::Int(x | y))
    }

    pub(crate) fn op_bxor(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, y) = int_pair(a, b, ErrCode::BadTypeBitwise)?;
        Ok(Val::Int(x ^ y))
    }

    pub(crate) fn op_bnot(&mut self, a: Val) -> VmResult<Val> {
        match a {
            Val::Int(x) => Ok(Val::Int(!x)),
            other => type_err(ErrCode::BadTypeBitwise, other.type_name()),
        }
    }

    pub(crate) fn op_shl(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, n) = shift_pair(a, b)?;
        Ok(Val::Int(((x as u32) << n) as i32))
    }

    pub(crate) fn op_ashr(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, n) = shift_pair(a, b)?;
        Ok(Val::Int(x >> n))
    }

    pub(crate) fn op_lshr(&mut self, a: Val, b: Val) -> VmResult<Val> {
        let (x, n) = shift_pair(a, b)?;
        Ok(Val::Int(((x as u32) >> n) as i32))
    }

    /// Deep equality. Identical tags short-circuit; string constants compare
    /// by content; object operands delegate to their metaclass hook, which
    /// is what makes a dynamic string equal to an equal string constant.
    pub fn vals_eq(&mut self, a: Val, b: Val, depth: u32) -> VmResult<bool> {
        if depth > EQ_DEPTH_LIMIT {
            return Err(Fault::fatal("equality recursion limit exceeded"));
        }
        if a.same(&b) {
            return Ok(true);
        }
        match (a, b) {
            (Val::Obj(id), rhs) => {
                let meta = self.meta_of(id)?;
                meta.eq(self, id, rhs, depth)
            }
            (lhs, Val::Obj(id)) => {
                let meta = self.meta_of(id)?;
                meta.eq(self, id, lhs, depth)
            }
            (Val::Str(x), Val::Str(y)) => {
                let sx = self.data()?.read_str(x)?;
                let sy = self.data()?.read_str(y)?;
                Ok(sx == sy)
            }
            (Val::List(x), Val::List(y)) => {
                let lx = self.data()?.read_list(x)?;
                let ly = self.data()?.read_list(y)?;
                if lx.len() != ly.len() {
                    return Ok(false);
                }
                for (ea, eb) in lx.into_iter().zip(ly) {
                    if !self.vals_eq(ea, eb, depth + 1)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Magnitude comparison for the ordered-comparison opcodes.
    pub fn compare_vals(&mut self, a: Val, b: Val) -> VmResult<Ordering> {
        match (a, b) {
            (Val::Int(x), Val::Int(y)) => Ok(x.cmp(&y)),
            (Val::Str(x), Val::Str(y)) => {
                let sx = self.data()?.read_str(x)?;
                let sy = self.data()?.read_str(y)?;
                Ok(sx.cmp(&sy))
            }
            (Val::Obj(id), rhs) => {
                let meta = self.meta_of(id)?;
                meta.compare(self, id, rhs)
            }
            (Val::Str(_), Val::Obj(_)) => {
                let id = self.promote_const(a)?;
                let meta = self.meta_of(id)?;
                meta.compare(self, id, b)
            }
            (lhs, _) => type_err(ErrCode::BadTypeCompare, lhs.type_name()),
        }
    }

    pub(crate) fn op_index(&mut self, container: Val, idx: Val) -> VmResult<Val> {
        match container {
            Val::Obj(id) => self.meta_of(id)?.index(self, id, idx),
            Val::List(ofs) => {
                let vals = self.data()?.read_list(ofs)?;
                index_const_list(&vals, idx)
            }
            other => type_err(ErrCode::BadTypeIndex, other.type_name()),
        }
    }

    /// Indexed assignment; returns the container value to use from here on
    /// (constant lists become fresh list objects).
    pub(crate) fn op_set_index(&mut self, container: Val, idx: Val, val: Val) -> VmResult<Val> {
        match container {
            Val::Obj(id) => self.meta_of(id)?.set_index(self, id, idx, val),
            Val::List(_) => {
                let id = self.promote_const(container)?;
                self.meta_of(id)?.set_index(self, id, idx, val)
            }
            other => type_err(ErrCode::BadTypeIndex, other.type_name()),
        }
    }

    /// Promote a pool constant to a heap object of the matching kind.
    pub(crate) fn promote_const(&mut self, v: Val) -> VmResult<ObjId> {
        let kind = self
            .registry
            .kind_for_const(&v)
            .ok_or_else(|| Fault::Runtime(ErrCode::WrongMetaclass, format!("no kind for {}", v.type_name())))?;
        let meta = self
            .registry
            .meta(kind)
            .ok_or_else(|| Fault::fatal("unregistered kind"))?;
        meta.from_const(self, v)
    }

    pub(crate) fn meta_of(&self, id: ObjId) -> VmResult<std::sync::Arc<dyn crate::heap::Metaclass>> {
        let kind = self.obj(id)?.kind;
        self.registry
            .meta(kind)
            .ok_or_else(|| Fault::fatal("unregistered kind"))
    }
}

fn int_pair(a: Val, b: Val, code: ErrCode) -> VmResult<(i32, i32)> {
    match (a, b) {
        (Val::Int(x), Val::Int(y)) => Ok((x, y)),
        (Val::Int(_), other) | (other, _) => type_err(code, other.type_name()),
    }
}

fn shift_pair(a: Val, b: Val) -> VmResult<(i32, u32)> {
    let (x, n) = int_pair(a, b, ErrCode::BadTypeShift)?;
    if !(0..32).contains(&n) {
        return type_err(ErrCode::BadTypeShift, format!("count {n}"));
    }
    Ok((x, n as u32))
}

/// One-based indexing into a constant list.
pub(crate) fn index_const_list(vals: &[Val], idx: Val) -> VmResult<Val> {
    match idx {
        Val::Int(n) if n >= 1 && (n as usize) <= vals.len() => Ok(vals[n as usize - 1]),
        Val::Int(n) => type_err(ErrCode::IndexOutOfRange, format!("index {n}")),
        other => type_err(ErrCode::BadTypeIndex, other.type_name()),
    }
}
