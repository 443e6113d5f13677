use crate::err::{Fault, VmResult};
use crate::val::Val;

/// Default stack capacity, in slots. One value stack serves as both the
/// operand stack and the call-frame store.
pub const DEFAULT_STACK_SLOTS: usize = 16 * 1024;

/// The value stack. Underflow and overflow are unconditionally fatal; a
/// well-formed image declares its per-function slot needs in each method
/// header and the call path preflights them.
pub struct Stack {
    slots: Vec<Val>,
    limit: usize,
}

impl Stack {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::with_capacity(limit.min(4096)),
            limit,
        }
    }

    #[inline]
    pub fn sp(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.slots.len()
    }

    #[inline]
    pub fn push(&mut self, v: Val) -> VmResult<()> {
        if self.slots.len() >= self.limit {
            return Err(Fault::fatal("stack overflow"));
        }
        self.slots.push(v);
        Ok(())
    }

    #[inline]
    pub fn pop(&mut self) -> VmResult<Val> {
        self.slots.pop().ok_or_else(|| Fault::fatal("stack underflow"))
    }

    /// Copy of the slot `n` below the top (0 is the top itself).
    #[inline]
    pub fn peek(&self, n: usize) -> VmResult<Val> {
        let sp = self.slots.len();
        if n >= sp {
            return Err(Fault::fatal("stack underflow"));
        }
        Ok(self.slots[sp - 1 - n])
    }

    /// Overwrite the slot `n` below the top.
    #[inline]
    pub fn poke(&mut self, n: usize, v: Val) -> VmResult<()> {
        let sp = self.slots.len();
        if n >= sp {
            return Err(Fault::fatal("stack underflow"));
        }
        self.slots[sp - 1 - n] = v;
        Ok(())
    }

    /// Absolute slot access, for FP-relative frame fields.
    #[inline]
    pub fn get_abs(&self, idx: usize) -> VmResult<Val> {
        self.slots
            .get(idx)
            .copied()
            .ok_or_else(|| Fault::fatal("stack slot out of range"))
    }

    #[inline]
    pub fn set_abs(&mut self, idx: usize, v: Val) -> VmResult<()> {
        match self.slots.get_mut(idx) {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(Fault::fatal("stack slot out of range")),
        }
    }

    /// Drop everything above the new depth.
    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }

    /// Pop `n` values, topmost first. Argument lists are pushed right to
    /// left, so this yields them in declaration order.
    pub fn pop_n(&mut self, n: usize) -> VmResult<Vec<Val>> {
        let sp = self.slots.len();
        if n > sp {
            return Err(Fault::fatal("stack underflow"));
        }
        let mut vals = self.slots.split_off(sp - n);
        vals.reverse();
        Ok(vals)
    }
}
