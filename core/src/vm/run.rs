//! The dispatch loop and the call-property primitive that the whole
//! property-access opcode family funnels into.

use tracing::trace;

use crate::err::{ErrCode, Fault, VmResult, type_err};
use crate::heap::{Resolved, resolve_prop};
use crate::val::{ObjId, PropId, Val};
use crate::vm::opcode as op;
use crate::vm::{SYM_OBJ_CALL, Vm};

#[inline]
fn bool_val(b: bool) -> Val {
    if b { Val::True } else { Val::Nil }
}

impl Vm {
    /// Run until the current call context returns or a fault escapes it.
    /// Routable faults are materialized and handed to the exception router
    /// here; only fatal faults and unhandled throws propagate out.
    pub(crate) fn run_loop(&mut self) -> VmResult<()> {
        while !self.stop {
            if let Err(fault) = self.step() {
                self.dispatch_fault(fault)?;
            }
        }
        Ok(())
    }

    fn dispatch_fault(&mut self, fault: Fault) -> VmResult<()> {
        match fault {
            Fault::Fatal(e) => Err(Fault::Fatal(e)),
            Fault::Throw(obj) => self.route_exception(obj),
            Fault::Runtime(code, msg) => {
                let obj = self.materialize_runtime_error(code, &msg)?;
                self.route_exception(obj)
            }
        }
    }

    #[inline]
    fn fetch_u8(&mut self) -> VmResult<u8> {
        let v = self.code()?.read_u8(self.ip)?;
        self.ip += 1;
        Ok(v)
    }

    #[inline]
    fn fetch_i8(&mut self) -> VmResult<i8> {
        let v = self.code()?.read_i8(self.ip)?;
        self.ip += 1;
        Ok(v)
    }

    #[inline]
    fn fetch_u16(&mut self) -> VmResult<u16> {
        let v = self.code()?.read_u16(self.ip)?;
        self.ip += 2;
        Ok(v)
    }

    #[inline]
    fn fetch_u32(&mut self) -> VmResult<u32> {
        let v = self.code()?.read_u32(self.ip)?;
        self.ip += 4;
        Ok(v)
    }

    #[inline]
    fn fetch_i32(&mut self) -> VmResult<i32> {
        let v = self.code()?.read_i32(self.ip)?;
        self.ip += 4;
        Ok(v)
    }

    /// Consume a branch operand; displacements are relative to the first
    /// byte of the operand itself.
    fn take_branch(&mut self, taken: bool) -> VmResult<()> {
        let base = self.ip;
        if taken {
            let disp = self.code()?.read_i16(base)?;
            self.ip = base.wrapping_add_signed(disp as i32);
        } else {
            self.ip = base + 2;
        }
        Ok(())
    }

    /// Execute one instruction. Any pending VARARGC override applies only
    /// to this instruction.
    pub(crate) fn step(&mut self) -> VmResult<()> {
        let varargc = self.pending_varargc.take();
        let at = self.ip;
        let opc = self.fetch_u8()?;
        trace!(ip = at, op = op::name(opc), "exec");

        match opc {
            op::NOP => {}
            op::PUSH_0 => self.stack.push(Val::Int(0))?,
            op::PUSH_1 => self.stack.push(Val::Int(1))?,
            op::PUSHINT8 => {
                let n = self.fetch_i8()?;
                self.stack.push(Val::Int(n as i32))?;
            }
            op::PUSHINT => {
                let n = self.fetch_i32()?;
                self.stack.push(Val::Int(n))?;
            }
            op::PUSHSTR => {
                let ofs = self.fetch_u32()?;
                self.stack.push(Val::Str(ofs))?;
            }
            op::PUSHLST => {
                let ofs = self.fetch_u32()?;
                self.stack.push(Val::List(ofs))?;
            }
            op::PUSHOBJ => {
                let id = self.fetch_u32()?;
                self.stack.push(Val::Obj(id))?;
            }
            op::PUSHNIL => self.stack.push(Val::Nil)?,
            op::PUSHTRUE => self.stack.push(Val::True)?,
            op::PUSHPROPID => {
                let p = self.fetch_u16()?;
                self.stack.push(Val::Prop(p))?;
            }
            op::PUSHFNPTR => {
                let ofs = self.fetch_u32()?;
                self.stack.push(Val::FnPtr(ofs))?;
            }
            op::PUSHENUM => {
                let e = self.fetch_u32()?;
                self.stack.push(Val::Enum(e))?;
            }
            op::PUSHBIFPTR => {
                let set = self.fetch_u8()? as u16;
                let index = self.fetch_u16()?;
                self.stack.push(Val::BifPtr { set, index })?;
            }
            op::PUSHSELF => {
                let v = self.self_val()?;
                self.stack.push(v)?;
            }

            op::DUP => {
                let v = self.stack.peek(0)?;
                self.stack.push(v)?;
            }
            op::DISC => {
                self.stack.pop()?;
            }
            op::SWAP => {
                let a = self.stack.pop()?;
                let b = self.stack.pop()?;
                self.stack.push(a)?;
                self.stack.push(b)?;
            }
            op::GETR0 => self.stack.push(self.r0)?,

            op::ADD => self.binop(Vm::op_add)?,
            op::SUB => self.binop(Vm::op_sub)?,
            op::MUL => self.binop(Vm::op_mul)?,
            op::DIV => self.binop(Vm::op_div)?,
            op::MOD => self.binop(Vm::op_mod)?,
            op::NEG => {
                let v = self.stack.pop()?;
                let r = self.op_neg(v)?;
                self.stack.push(r)?;
            }
            op::NOT => {
                let v = self.stack.pop()?;
                let b = v.truthy()?;
                self.stack.push(bool_val(!b))?;
            }
            op::BOOLIZE => {
                let v = self.stack.pop()?;
                let b = v.truthy()?;
                self.stack.push(bool_val(b))?;
            }
            op::BNOT => {
                let v = self.stack.pop()?;
                let r = self.op_bnot(v)?;
                self.stack.push(r)?;
            }
            op::BAND => self.binop(Vm::op_band)?,
            op::BOR => self.binop(Vm::op_bor)?,
            op::BXOR => self.binop(Vm::op_bxor)?,
            op::SHL => self.binop(Vm::op_shl)?,
            op::ASHR => self.binop(Vm::op_ashr)?,
            op::LSHR => self.binop(Vm::op_lshr)?,
            op::INC => {
                let v = self.stack.pop()?;
                let r = self.op_add(v, Val::Int(1))?;
                self.stack.push(r)?;
            }
            op::DEC => {
                let v = self.stack.pop()?;
                let r = self.op_sub(v, Val::Int(1))?;
                self.stack.push(r)?;
            }

            op::EQ => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                let eq = self.vals_eq(a, b, 0)?;
                self.stack.push(bool_val(eq))?;
            }
            op::NE => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                let eq = self.vals_eq(a, b, 0)?;
                self.stack.push(bool_val(!eq))?;
            }
            op::LT => self.cmp_op(|o| o.is_lt())?,
            op::LE => self.cmp_op(|o| o.is_le())?,
            op::GT => self.cmp_op(|o| o.is_gt())?,
            op::GE => self.cmp_op(|o| o.is_ge())?,

            op::JMP => self.take_branch(true)?,
            op::JT => {
                let v = self.stack.pop()?;
                let b = v.truthy()?;
                self.take_branch(b)?;
            }
            op::JF => {
                let v = self.stack.pop()?;
                let b = v.truthy()?;
                self.take_branch(!b)?;
            }
            op::JNIL => {
                let v = self.stack.pop()?;
                self.take_branch(v.is_nil())?;
            }
            op::JNOTNIL => {
                let v = self.stack.pop()?;
                self.take_branch(!v.is_nil())?;
            }
            op::JR0T => {
                let b = self.r0.truthy()?;
                self.take_branch(b)?;
            }
            op::JR0F => {
                let b = self.r0.truthy()?;
                self.take_branch(!b)?;
            }
            op::SWITCH => self.do_switch()?,
            op::JSR => {
                let base = self.ip;
                let disp = self.code()?.read_i16(base)?;
                self.stack.push(Val::CodeOfs(base + 2))?;
                self.ip = base.wrapping_add_signed(disp as i32);
            }
            op::LRET => {
                let idx = self.fetch_u16()? as usize;
                match self.local(idx)? {
                    Val::CodeOfs(ofs) => self.ip = ofs,
                    other => {
                        return Err(Fault::fatal(format!(
                            "lret local holds {}, not a code offset",
                            other.type_name()
                        )));
                    }
                }
            }

            op::RETVAL => {
                self.r0 = self.stack.pop()?;
                self.ret()?;
            }
            op::RETNIL => {
                self.r0 = Val::Nil;
                self.ret()?;
            }
            op::RETTRUE => {
                self.r0 = Val::True;
                self.ret()?;
            }
            op::RET => self.ret()?,

            op::CALL => {
                let argc = self.arg_count(varargc)?;
                let ofs = self.fetch_u32()?;
                self.call_func(ofs, argc, Val::Nil, Val::Nil, Val::Nil, Val::Nil, Val::FnPtr(ofs))?;
            }
            op::PTRCALL => {
                let argc = self.arg_count(varargc)?;
                let target = self.stack.pop()?;
                self.ptr_call(target, argc)?;
            }
            op::THROW => {
                let v = self.stack.pop()?;
                match v {
                    Val::Obj(id) => return Err(Fault::Throw(id)),
                    other => return type_err(ErrCode::BadTypeThrow, other.type_name()),
                }
            }
            op::VARARGC => {
                let v = self.stack.pop()?;
                match v {
                    Val::Int(n) if n >= 0 => self.pending_varargc = Some(n as usize),
                    other => return type_err(ErrCode::BadTypeCall, other.type_name()),
                }
            }
            op::BUILTIN_A => {
                let argc = self.arg_count(varargc)?;
                let index = self.fetch_u8()? as u16;
                self.do_builtin(0, index, argc)?;
            }
            op::BUILTIN_B => {
                let argc = self.arg_count(varargc)?;
                let index = self.fetch_u8()? as u16;
                self.do_builtin(1, index, argc)?;
            }
            op::BUILTIN => {
                let argc = self.arg_count(varargc)?;
                let set = self.fetch_u8()? as u16;
                let index = self.fetch_u16()?;
                self.do_builtin(set, index, argc)?;
            }

            op::GETPROP => {
                let prop = self.fetch_u16()?;
                let recv = self.stack.pop()?;
                self.call_prop(recv, prop, 0)?;
            }
            op::CALLPROP => {
                let argc = self.arg_count(varargc)?;
                let prop = self.fetch_u16()?;
                let recv = self.stack.pop()?;
                self.call_prop(recv, prop, argc)?;
            }
            op::PTRCALLPROP => {
                let argc = self.arg_count(varargc)?;
                let prop = self.pop_prop()?;
                let recv = self.stack.pop()?;
                self.call_prop(recv, prop, argc)?;
            }
            op::GETPROPSELF => {
                let prop = self.fetch_u16()?;
                let recv = self.self_val()?;
                self.call_prop(recv, prop, 0)?;
            }
            op::CALLPROPSELF => {
                let argc = self.arg_count(varargc)?;
                let prop = self.fetch_u16()?;
                let recv = self.self_val()?;
                self.call_prop(recv, prop, argc)?;
            }
            op::PTRCALLPROPSELF => {
                let argc = self.arg_count(varargc)?;
                let prop = self.pop_prop()?;
                let recv = self.self_val()?;
                self.call_prop(recv, prop, argc)?;
            }
            op::OBJGETPROP => {
                let id = self.fetch_u32()?;
                let prop = self.fetch_u16()?;
                self.call_prop(Val::Obj(id), prop, 0)?;
            }
            op::OBJCALLPROP => {
                let argc = self.arg_count(varargc)?;
                let id = self.fetch_u32()?;
                let prop = self.fetch_u16()?;
                self.call_prop(Val::Obj(id), prop, argc)?;
            }
            op::GETPROPLCL1 => {
                let idx = self.fetch_u8()? as usize;
                let prop = self.fetch_u16()?;
                let recv = self.local(idx)?;
                self.call_prop(recv, prop, 0)?;
            }
            op::CALLPROPLCL1 => {
                let argc = self.arg_count(varargc)?;
                let idx = self.fetch_u8()? as usize;
                let prop = self.fetch_u16()?;
                let recv = self.local(idx)?;
                self.call_prop(recv, prop, argc)?;
            }
            op::GETPROPR0 => {
                let prop = self.fetch_u16()?;
                let recv = self.r0;
                self.call_prop(recv, prop, 0)?;
            }
            op::CALLPROPR0 => {
                let argc = self.arg_count(varargc)?;
                let prop = self.fetch_u16()?;
                let recv = self.r0;
                self.call_prop(recv, prop, argc)?;
            }
            op::INHERIT => {
                let argc = self.arg_count(varargc)?;
                let prop = self.fetch_u16()?;
                self.do_inherit(prop, argc)?;
            }
            op::PTRINHERIT => {
                let argc = self.arg_count(varargc)?;
                let prop = self.pop_prop()?;
                self.do_inherit(prop, argc)?;
            }
            op::EXPINHERIT => {
                let argc = self.arg_count(varargc)?;
                let prop = self.fetch_u16()?;
                let sup = self.fetch_u32()?;
                self.do_exp_inherit(sup, prop, argc)?;
            }
            op::PTREXPINHERIT => {
                let argc = self.arg_count(varargc)?;
                let sup = self.fetch_u32()?;
                let prop = self.pop_prop()?;
                self.do_exp_inherit(sup, prop, argc)?;
            }
            op::SETPROP => {
                let prop = self.fetch_u16()?;
                let val = self.stack.pop()?;
                let recv = self.stack.pop()?;
                self.set_prop(recv, prop, val)?;
            }
            op::PTRSETPROP => {
                let val = self.stack.pop()?;
                let prop = self.pop_prop()?;
                let recv = self.stack.pop()?;
                self.set_prop(recv, prop, val)?;
            }
            op::SETPROPSELF => {
                let prop = self.fetch_u16()?;
                let val = self.stack.pop()?;
                let recv = self.self_val()?;
                self.set_prop(recv, prop, val)?;
            }
            op::OBJSETPROP => {
                let id = self.fetch_u32()?;
                let prop = self.fetch_u16()?;
                let val = self.stack.pop()?;
                self.set_prop(Val::Obj(id), prop, val)?;
            }
            op::SETSELF => {
                let v = self.stack.pop()?;
                self.set_self_val(v)?;
            }

            op::NEW1 => {
                let argc = self.arg_count(varargc)?;
                let dep = self.fetch_u8()? as u16;
                self.do_new(dep, argc, false)?;
            }
            op::NEW2 => {
                let argc = match varargc {
                    Some(n) => {
                        self.fetch_u16()?;
                        n
                    }
                    None => self.fetch_u16()? as usize,
                };
                let dep = self.fetch_u16()?;
                self.do_new(dep, argc, false)?;
            }
            op::TRNEW1 => {
                let argc = self.arg_count(varargc)?;
                let dep = self.fetch_u8()? as u16;
                self.do_new(dep, argc, true)?;
            }
            op::TRNEW2 => {
                let argc = match varargc {
                    Some(n) => {
                        self.fetch_u16()?;
                        n
                    }
                    None => self.fetch_u16()? as usize,
                };
                let dep = self.fetch_u16()?;
                self.do_new(dep, argc, true)?;
            }

            op::INDEX => {
                let idx = self.stack.pop()?;
                let container = self.stack.pop()?;
                let r = self.op_index(container, idx)?;
                self.stack.push(r)?;
            }
            op::IDXLCL1INT8 => {
                let lcl = self.fetch_u8()? as usize;
                let idx = self.fetch_u8()? as i32;
                let container = self.local(lcl)?;
                let r = self.op_index(container, Val::Int(idx))?;
                self.stack.push(r)?;
            }
            op::IDXINT8 => {
                let idx = self.fetch_u8()? as i32;
                let container = self.stack.pop()?;
                let r = self.op_index(container, Val::Int(idx))?;
                self.stack.push(r)?;
            }
            op::SETIND => {
                let val = self.stack.pop()?;
                let idx = self.stack.pop()?;
                let container = self.stack.pop()?;
                let updated = self.op_set_index(container, idx, val)?;
                self.stack.push(updated)?;
            }
            op::SETINDLCL1I8 => {
                let lcl = self.fetch_u8()? as usize;
                let idx = self.fetch_u8()? as i32;
                let val = self.stack.pop()?;
                let container = self.local(lcl)?;
                let updated = self.op_set_index(container, Val::Int(idx), val)?;
                self.set_local(lcl, updated)?;
            }

            op::GETLCL1 => {
                let idx = self.fetch_u8()? as usize;
                let v = self.local(idx)?;
                self.stack.push(v)?;
            }
            op::GETLCL2 => {
                let idx = self.fetch_u16()? as usize;
                let v = self.local(idx)?;
                self.stack.push(v)?;
            }
            op::SETLCL1 => {
                let idx = self.fetch_u8()? as usize;
                let v = self.stack.pop()?;
                self.set_local(idx, v)?;
            }
            op::SETLCL2 => {
                let idx = self.fetch_u16()? as usize;
                let v = self.stack.pop()?;
                self.set_local(idx, v)?;
            }
            op::GETARG1 => {
                let idx = self.fetch_u8()? as usize;
                let v = self.arg(idx)?;
                self.stack.push(v)?;
            }
            op::GETARG2 => {
                let idx = self.fetch_u16()? as usize;
                let v = self.arg(idx)?;
                self.stack.push(v)?;
            }
            op::SETARG1 => {
                let idx = self.fetch_u8()? as usize;
                let v = self.stack.pop()?;
                self.set_arg(idx, v)?;
            }
            op::GETARGC => {
                let argc = self.frame_argc()?;
                self.stack.push(Val::Int(argc as i32))?;
            }
            op::INCLCL => {
                let idx = self.fetch_u16()? as usize;
                let v = self.local(idx)?;
                let r = self.op_add(v, Val::Int(1))?;
                self.set_local(idx, r)?;
            }
            op::DECLCL => {
                let idx = self.fetch_u16()? as usize;
                let v = self.local(idx)?;
                let r = self.op_sub(v, Val::Int(1))?;
                self.set_local(idx, r)?;
            }
            op::NILLCL1 => {
                let idx = self.fetch_u8()? as usize;
                self.set_local(idx, Val::Nil)?;
            }
            op::ONELCL1 => {
                let idx = self.fetch_u8()? as usize;
                self.set_local(idx, Val::Int(1))?;
            }
            op::ZEROLCL1 => {
                let idx = self.fetch_u8()? as usize;
                self.set_local(idx, Val::Int(0))?;
            }
            op::SETLCL1R0 => {
                let idx = self.fetch_u8()? as usize;
                let v = self.r0;
                self.set_local(idx, v)?;
            }

            op::SAY => {
                let ofs = self.fetch_u32()?;
                self.say_val(Val::Str(ofs))?;
            }
            op::SAYVAL => {
                let v = self.stack.pop()?;
                self.say_val(v)?;
            }

            other => {
                return Err(Fault::fatal(format!("invalid opcode {other:#04x} at {at:#x}")));
            }
        }
        Ok(())
    }

    /// Declared u8 argument count, unless VARARGC overrode it.
    fn arg_count(&mut self, varargc: Option<usize>) -> VmResult<usize> {
        let declared = self.fetch_u8()? as usize;
        Ok(varargc.unwrap_or(declared))
    }

    fn pop_prop(&mut self) -> VmResult<PropId> {
        match self.stack.pop()? {
            Val::Prop(p) => Ok(p),
            other => type_err(ErrCode::BadTypeCall, other.type_name()),
        }
    }

    fn binop(&mut self, f: fn(&mut Vm, Val, Val) -> VmResult<Val>) -> VmResult<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let r = f(self, a, b)?;
        self.stack.push(r)
    }

    fn cmp_op(&mut self, f: fn(std::cmp::Ordering) -> bool) -> VmResult<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let ord = self.compare_vals(a, b)?;
        self.stack.push(bool_val(f(ord)))
    }

    /// SWITCH: u16 case count, then per case a 5-byte dataholder and an
    /// i16 branch, then the default branch. First matching case wins.
    fn do_switch(&mut self) -> VmResult<()> {
        let v = self.stack.pop()?;
        let base = self.ip;
        let count = self.code()?.read_u16(base)? as u32;
        for i in 0..count {
            let at = base + 2 + i * 7;
            let bytes = self.code()?.read_bytes(at, 5)?;
            let case = Val::from_dataholder(&bytes)?;
            if self.vals_eq(v, case, 0)? {
                let disp = self.code()?.read_i16(at + 5)?;
                self.ip = (at + 5).wrapping_add_signed(disp as i32);
                return Ok(());
            }
        }
        let def_at = base + 2 + count * 7;
        let disp = self.code()?.read_i16(def_at)?;
        self.ip = def_at.wrapping_add_signed(disp as i32);
        Ok(())
    }

    /// The call-property primitive. Resolves `prop` on the receiver and
    /// acts on what it finds: a method gets a frame, a native method runs
    /// in place, a self-printing string goes to output, and plain data is
    /// the result of a zero-argument evaluation.
    pub(crate) fn call_prop(&mut self, receiver: Val, prop: PropId, argc: usize) -> VmResult<()> {
        let id = match receiver {
            Val::Obj(id) => id,
            Val::Str(_) | Val::List(_) => self.promote_const(receiver)?,
            Val::Nil => {
                return Err(Fault::Runtime(ErrCode::ObjNotFound, "nil dereference".into()));
            }
            other => return type_err(ErrCode::BadTypeCall, other.type_name()),
        };
        if !self.heap.contains(id) {
            return Err(Fault::Runtime(ErrCode::ObjNotFound, format!("object {id}")));
        }
        let resolved = resolve_prop(&self.heap, &self.registry, id, prop, false);
        self.dispatch_resolved(resolved, id, id, prop, argc)
    }

    fn dispatch_resolved(
        &mut self,
        resolved: Resolved,
        self_obj: ObjId,
        target_obj: ObjId,
        prop: PropId,
        argc: usize,
    ) -> VmResult<()> {
        match resolved {
            Resolved::NotFound => {
                if argc == 0 {
                    self.r0 = Val::Nil;
                    Ok(())
                } else {
                    type_err(ErrCode::PropNotDefined, format!("property {prop}"))
                }
            }
            Resolved::Native { holder: _, method } => {
                let args = self.stack.pop_n(argc)?;
                self.r0 = method(self, self_obj, &args)?;
                Ok(())
            }
            Resolved::Data { holder, val } => match val {
                Val::CodeOfs(ofs) => self.call_func(
                    ofs,
                    argc,
                    Val::Prop(prop),
                    Val::Obj(target_obj),
                    Val::Obj(holder),
                    Val::Obj(self_obj),
                    Val::CodeOfs(ofs),
                ),
                Val::DStr(sofs) => {
                    self.stack.pop_n(argc)?;
                    self.say_val(Val::Str(sofs))?;
                    self.r0 = Val::Nil;
                    Ok(())
                }
                plain => {
                    if argc == 0 {
                        self.r0 = plain;
                        Ok(())
                    } else {
                        type_err(ErrCode::BadTypeCall, plain.type_name())
                    }
                }
            },
        }
    }

    /// INHERIT: resolve from the current method's defining object, skipping
    /// its own definitions, with self and the target object unchanged.
    fn do_inherit(&mut self, prop: PropId, argc: usize) -> VmResult<()> {
        let defining = match self.defining_val()? {
            Val::Obj(id) => id,
            other => return Err(Fault::fatal(format!("inherit outside a method ({})", other.type_name()))),
        };
        let self_obj = match self.self_val()? {
            Val::Obj(id) => id,
            other => return Err(Fault::fatal(format!("inherit with non-object self ({})", other.type_name()))),
        };
        let target_obj = match self.target_obj_val()? {
            Val::Obj(id) => id,
            _ => self_obj,
        };
        let resolved = resolve_prop(&self.heap, &self.registry, defining, prop, true);
        self.dispatch_resolved(resolved, self_obj, target_obj, prop, argc)
    }

    /// EXPINHERIT: resolve from a named superclass, including its own
    /// definitions, with self unchanged.
    fn do_exp_inherit(&mut self, sup: ObjId, prop: PropId, argc: usize) -> VmResult<()> {
        let self_obj = match self.self_val()? {
            Val::Obj(id) => id,
            other => return Err(Fault::fatal(format!("inherit with non-object self ({})", other.type_name()))),
        };
        if !self.heap.contains(sup) {
            return Err(Fault::Runtime(ErrCode::ObjNotFound, format!("object {sup}")));
        }
        let resolved = resolve_prop(&self.heap, &self.registry, sup, prop, false);
        self.dispatch_resolved(resolved, self_obj, self_obj, prop, argc)
    }

    pub(crate) fn ptr_call(&mut self, target: Val, argc: usize) -> VmResult<()> {
        match target {
            Val::FnPtr(ofs) | Val::CodeOfs(ofs) => {
                self.call_func(ofs, argc, Val::Nil, Val::Nil, Val::Nil, Val::Nil, target)
            }
            Val::BifPtr { set, index } => {
                self.do_builtin(set, index, argc)
            }
            Val::Prop(prop) => {
                let recv = self.self_val()?;
                self.call_prop(recv, prop, argc)
            }
            Val::Obj(id) => match self.symbol(SYM_OBJ_CALL) {
                Some(Val::Prop(prop)) => self.call_prop(Val::Obj(id), prop, argc),
                _ => type_err(ErrCode::BadTypeCall, "object"),
            },
            other => type_err(ErrCode::BadTypeCall, other.type_name()),
        }
    }

    fn do_builtin(&mut self, set: u16, index: u16, argc: usize) -> VmResult<()> {
        let f = self.builtin_fn(set, index)?;
        let args = self.stack.pop_n(argc)?;
        self.r0 = f(self, &args)?;
        Ok(())
    }

    fn do_new(&mut self, dep_index: u16, argc: usize, transient: bool) -> VmResult<()> {
        let kind = self
            .registry
            .dep_kind(dep_index)
            .ok_or_else(|| Fault::fatal(format!("metaclass index {dep_index} not bound")))?;
        let meta = self
            .registry
            .meta(kind)
            .ok_or_else(|| Fault::fatal("unregistered kind"))?;
        let args = self.stack.pop_n(argc)?;
        let id = meta.create(self, kind, &args)?;
        if transient {
            if let Some(o) = self.heap.get_mut(id) {
                o.transient = true;
            }
        }
        self.r0 = Val::Obj(id);
        Ok(())
    }

    fn set_prop(&mut self, receiver: Val, prop: PropId, val: Val) -> VmResult<()> {
        match receiver {
            Val::Obj(id) => {
                let obj = self
                    .heap
                    .get_mut(id)
                    .ok_or_else(|| Fault::Runtime(ErrCode::ObjNotFound, format!("object {id}")))?;
                obj.props.insert(prop, val);
                Ok(())
            }
            Val::Nil => Err(Fault::Runtime(ErrCode::ObjNotFound, "nil dereference".into())),
            other => type_err(ErrCode::WrongMetaclass, other.type_name()),
        }
    }
}
