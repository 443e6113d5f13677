//! Call frames. One contiguous stack region per activation:
//!
//! ```text
//!   FP+1+locals-1 ..    locals (nil-initialized)
//!   FP                  saved FP
//!   FP-1                frame descriptor (reserved, nil)
//!   FP-2                argument count
//!   FP-3                return EP
//!   FP-4                return IP
//!   FP-5                invokee
//!   FP-6                self
//!   FP-7                defining object
//!   FP-8                target object
//!   FP-9                target property
//!   FP-10-i             argument i (pushed right to left)
//! ```
//!
//! A return IP carrying the sentinel offset marks the outermost frame of an
//! external call; returning through it stops the run loop.

use tracing::trace;

use crate::err::{ErrCode, Fault, VmResult, type_err};
use crate::val::{SENTINEL_OFS, Val};
use crate::vm::Vm;

/// Decoded method header. The on-disk layout is fixed at ten bytes: params
/// (bit 7 set for varargs), optional param count, u16 locals, u16 operand
/// slots, u16 method-relative exception table offset, u16 reserved.
#[derive(Debug, Clone, Copy)]
pub struct MethodHeader {
    pub params: u8,
    pub opt_params: u8,
    pub varargs: bool,
    pub locals: u16,
    pub stack_slots: u16,
    pub exc_ofs: u16,
}

const PARAMS_VARARGS: u8 = 0x80;

/// Fixed slots between the arguments and the locals.
pub(crate) const FRAME_SLOTS: usize = 10;

impl Vm {
    pub(crate) fn method_header(&self, ofs: u32) -> VmResult<MethodHeader> {
        let code = self.code()?;
        let params = code.read_u8(ofs)?;
        Ok(MethodHeader {
            params: params & !PARAMS_VARARGS,
            opt_params: code.read_u8(ofs + 1)?,
            varargs: params & PARAMS_VARARGS != 0,
            locals: code.read_u16(ofs + 2)?,
            stack_slots: code.read_u16(ofs + 4)?,
            exc_ofs: code.read_u16(ofs + 6)?,
        })
    }

    /// Activate the function at `ofs`. The arguments are already on the
    /// stack, pushed right to left; `argc` says how many. On return the
    /// frame is built, locals are nil, and IP sits on the first instruction.
    pub(crate) fn call_func(
        &mut self,
        ofs: u32,
        argc: usize,
        target_prop: Val,
        target_obj: Val,
        defining: Val,
        self_obj: Val,
        invokee: Val,
    ) -> VmResult<()> {
        let hdr = self.method_header(ofs)?;
        let fixed = hdr.params as usize;
        let accepted = fixed + hdr.opt_params as usize;
        if argc < fixed || (!hdr.varargs && argc > accepted) {
            return type_err(
                ErrCode::NumArgsMismatch,
                format!("{argc} for {fixed}..{accepted}"),
            );
        }
        let need = FRAME_SLOTS + hdr.locals as usize + hdr.stack_slots as usize;
        if self.stack.remaining() < need {
            return Err(Fault::fatal("stack overflow"));
        }
        trace!(ofs, argc, "call");

        self.stack.push(target_prop)?;
        self.stack.push(target_obj)?;
        self.stack.push(defining)?;
        self.stack.push(self_obj)?;
        self.stack.push(invokee)?;
        self.stack.push(Val::CodeOfs(self.ip))?;
        self.stack.push(Val::CodeOfs(self.ep))?;
        self.stack.push(Val::Int(argc as i32))?;
        self.stack.push(Val::Nil)?;
        self.stack.push(Val::Int(self.fp as i32))?;
        self.fp = self.stack.sp() - 1;
        for _ in 0..hdr.locals {
            self.stack.push(Val::Nil)?;
        }

        self.ep = ofs;
        self.ip = ofs + self.entry_info()?.method_hdr_size as u32;
        Ok(())
    }

    /// Tear down the current frame, restoring the caller's IP, EP, FP, and
    /// stack depth. R0 is left alone; the return opcodes set it first.
    pub(crate) fn ret(&mut self) -> VmResult<()> {
        let ret_ip = match self.stack.get_abs(self.frame_slot(4)?)? {
            Val::CodeOfs(ofs) => ofs,
            other => return Err(Fault::fatal(format!("corrupt frame: return ip is {}", other.type_name()))),
        };
        let ret_ep = match self.stack.get_abs(self.frame_slot(3)?)? {
            Val::CodeOfs(ofs) => ofs,
            other => return Err(Fault::fatal(format!("corrupt frame: return ep is {}", other.type_name()))),
        };
        let argc = self.frame_argc()?;
        let saved_fp = match self.stack.get_abs(self.fp)? {
            Val::Int(n) if n >= 0 => n as usize,
            other => return Err(Fault::fatal(format!("corrupt frame: saved fp is {}", other.type_name()))),
        };
        let base = self
            .fp
            .checked_sub(FRAME_SLOTS - 1 + argc)
            .ok_or_else(|| Fault::fatal("corrupt frame: base below stack"))?;

        self.stack.truncate(base);
        self.fp = saved_fp;
        self.ip = ret_ip;
        self.ep = ret_ep;
        if ret_ip == SENTINEL_OFS {
            self.stop = true;
        }
        Ok(())
    }

    #[inline]
    fn frame_slot(&self, below_fp: usize) -> VmResult<usize> {
        self.fp
            .checked_sub(below_fp)
            .ok_or_else(|| Fault::fatal("no active frame"))
    }

    pub(crate) fn frame_argc(&self) -> VmResult<usize> {
        match self.stack.get_abs(self.frame_slot(2)?)? {
            Val::Int(n) if n >= 0 => Ok(n as usize),
            other => Err(Fault::fatal(format!("corrupt frame: argc is {}", other.type_name()))),
        }
    }

    pub(crate) fn self_val(&self) -> VmResult<Val> {
        self.stack.get_abs(self.frame_slot(6)?)
    }

    pub(crate) fn set_self_val(&mut self, v: Val) -> VmResult<()> {
        let slot = self.frame_slot(6)?;
        self.stack.set_abs(slot, v)
    }

    pub(crate) fn defining_val(&self) -> VmResult<Val> {
        self.stack.get_abs(self.frame_slot(7)?)
    }

    pub(crate) fn target_obj_val(&self) -> VmResult<Val> {
        self.stack.get_abs(self.frame_slot(8)?)
    }

    pub(crate) fn target_prop_val(&self) -> VmResult<Val> {
        self.stack.get_abs(self.frame_slot(9)?)
    }

    pub(crate) fn invokee_val(&self) -> VmResult<Val> {
        self.stack.get_abs(self.frame_slot(5)?)
    }

    pub(crate) fn arg(&self, index: usize) -> VmResult<Val> {
        if index >= self.frame_argc()? {
            return Err(Fault::fatal(format!("argument index {index} out of range")));
        }
        self.stack.get_abs(self.frame_slot(FRAME_SLOTS + index)?)
    }

    pub(crate) fn set_arg(&mut self, index: usize, v: Val) -> VmResult<()> {
        if index >= self.frame_argc()? {
            return Err(Fault::fatal(format!("argument index {index} out of range")));
        }
        let slot = self.frame_slot(FRAME_SLOTS + index)?;
        self.stack.set_abs(slot, v)
    }

    pub(crate) fn local(&self, index: usize) -> VmResult<Val> {
        self.stack.get_abs(self.fp + 1 + index)
    }

    pub(crate) fn set_local(&mut self, index: usize, v: Val) -> VmResult<()> {
        self.stack.set_abs(self.fp + 1 + index, v)
    }

    /// Stack index just above the last local of the current frame; the
    /// exception router unwinds the operand stack to here before entering a
    /// handler.
    pub(crate) fn locals_top(&self) -> VmResult<usize> {
        let hdr = self.method_header(self.ep)?;
        Ok(self.fp + 1 + hdr.locals as usize)
    }
}
