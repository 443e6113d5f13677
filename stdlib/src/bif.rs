//! Built-in function sets. Set 0 ("core") is reachable through the
//! `BUILTIN_A` opcode, set 1 ("io") through `BUILTIN_B`; both also answer
//! to the long-form `BUILTIN` opcode and to built-in function pointers.

use fabula_core::err::{ErrCode, Fault, VmResult, type_err};
use fabula_core::heap::derives_from;
use fabula_core::val::{ObjId, Val};
use fabula_core::vm::{BuiltinSet, Vm};

/// Core set, in opcode index order: dataType, toString, firstObj, nextObj,
/// setSay.
pub fn core_set() -> BuiltinSet {
    BuiltinSet {
        name: "core",
        funcs: vec![data_type, to_string, first_obj, next_obj, set_say],
    }
}

/// I/O set: print.
pub fn io_set() -> BuiltinSet {
    BuiltinSet {
        name: "io",
        funcs: vec![print],
    }
}

fn want_args(args: &[Val], min: usize, max: usize) -> VmResult<()> {
    if args.len() < min || args.len() > max {
        return Err(Fault::Runtime(
            ErrCode::NumArgsMismatch,
            format!("{} for {min}..{max}", args.len()),
        ));
    }
    Ok(())
}

/// dataType(v): the value's type tag, numbered like the dataholder
/// encoding, so compiled code and image data agree on the codes.
pub fn data_type(_vm: &mut Vm, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 1)?;
    Ok(Val::Int(args[0].to_dataholder()[0] as i32))
}

/// toString(v): the value's text form as a new string object.
pub fn to_string(vm: &mut Vm, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 1)?;
    let text = vm.val_to_text(args[0])?;
    vm.new_string(&text)
}

fn class_filter(args: &[Val], at: usize) -> VmResult<Option<ObjId>> {
    match args.get(at) {
        None | Some(Val::Nil) => Ok(None),
        Some(&Val::Obj(cls)) => Ok(Some(cls)),
        Some(&other) => type_err(ErrCode::WrongMetaclass, other.type_name()),
    }
}

/// firstObj(cls?): the first instance in object-table order, optionally
/// filtered to instances of `cls`.
pub fn first_obj(vm: &mut Vm, args: &[Val]) -> VmResult<Val> {
    want_args(args, 0, 1)?;
    let cls = class_filter(args, 0)?;
    Ok(enumerate_from(vm, None, cls))
}

/// nextObj(prev, cls?): the instance after `prev` in object-table order.
pub fn next_obj(vm: &mut Vm, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 2)?;
    let prev = match args[0] {
        Val::Obj(id) => id,
        other => return type_err(ErrCode::WrongMetaclass, other.type_name()),
    };
    let cls = class_filter(args, 1)?;
    Ok(enumerate_from(vm, Some(prev), cls))
}

fn enumerate_from(vm: &Vm, after: Option<ObjId>, cls: Option<ObjId>) -> Val {
    let heap = &vm.heap;
    let found = heap.find_from(after, |o| {
        !o.is_class && cls.is_none_or(|c| derives_from(heap, o.id, c))
    });
    match found {
        Some(id) => Val::Obj(id),
        None => Val::Nil,
    }
}

/// setSay(handler): install the output hook; nil uninstalls. Returns the
/// previous handler, so callers can restore it.
pub fn set_say(vm: &mut Vm, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 1)?;
    let old = vm.say_hook().unwrap_or(Val::Nil);
    match args[0] {
        Val::Nil => vm.install_say(None),
        v @ (Val::FnPtr(_) | Val::CodeOfs(_) | Val::Prop(_) | Val::Obj(_) | Val::BifPtr { .. }) => {
            vm.install_say(Some(v));
        }
        other => return type_err(ErrCode::BadTypeCall, other.type_name()),
    }
    Ok(old)
}

/// print(v): the value's text form, through the say hook.
pub fn print(vm: &mut Vm, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 1)?;
    vm.say_val(args[0])?;
    Ok(Val::Nil)
}
