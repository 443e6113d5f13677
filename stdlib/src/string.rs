//! The dynamic string kind: immutable UTF-8 text with value semantics.
//! Every operation that produces different text produces a new object.

use std::cmp::Ordering;

use anyhow::Result;
use fabula_core::err::{ErrCode, Fault, VmResult, type_err};
use fabula_core::heap::{HeapObject, Metaclass, NativeMethod, Payload};
use fabula_core::val::{KindId, ObjId, Val};
use fabula_core::vm::Vm;

pub const STRING_KIND_NAME: &str = "string";

/// Native method table order, as images bind it in their dependency list:
/// length, substr, toUpper, toLower, find.
pub struct StringMeta;

/// Text carried by a string object.
pub fn text_of(vm: &Vm, obj: ObjId) -> VmResult<String> {
    match vm.heap.get(obj).map(|o| &o.payload) {
        Some(Payload::Str(s)) => Ok(s.clone()),
        Some(_) => type_err(ErrCode::WrongMetaclass, format!("object#{obj} is not a string")),
        None => Err(Fault::Runtime(ErrCode::ObjNotFound, format!("object {obj}"))),
    }
}

/// Text of any string-ish value: a pool constant or a string object.
pub fn text_of_val(vm: &Vm, v: Val) -> VmResult<Option<String>> {
    match v {
        Val::Str(ofs) | Val::DStr(ofs) => {
            let pool = v_pool(vm)?;
            Ok(Some(pool.read_str(ofs)?))
        }
        Val::Obj(id) => match vm.heap.get(id).map(|o| &o.payload) {
            Some(Payload::Str(s)) => Ok(Some(s.clone())),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn v_pool(vm: &Vm) -> VmResult<&fabula_core::img::Pool> {
    vm.data_pool().ok_or_else(|| Fault::fatal("no image loaded"))
}

fn new_str(vm: &mut Vm, text: String) -> VmResult<Val> {
    let kind = vm
        .registry
        .kind_by_name(STRING_KIND_NAME)
        .ok_or_else(|| Fault::fatal("string kind not registered"))?;
    Ok(Val::Obj(vm.heap.alloc(HeapObject::new(kind).with_payload(Payload::Str(text)))))
}

impl Metaclass for StringMeta {
    fn name(&self) -> &'static str {
        STRING_KIND_NAME
    }

    fn methods(&self) -> &'static [NativeMethod] {
        &[s_len, s_substr, s_to_upper, s_to_lower, s_find]
    }

    fn load(&self, id: ObjId, transient: bool, payload: &[u8]) -> Result<HeapObject> {
        let mut o = HeapObject::new(0).with_payload(Payload::Str(String::from_utf8(payload.to_vec())?));
        o.id = id;
        o.transient = transient;
        Ok(o)
    }

    fn create(&self, vm: &mut Vm, kind: KindId, args: &[Val]) -> VmResult<ObjId> {
        let text = match args.first() {
            None => String::new(),
            Some(&v) => vm.val_to_text(v)?,
        };
        Ok(vm.heap.alloc(HeapObject::new(kind).with_payload(Payload::Str(text))))
    }

    fn from_const(&self, vm: &mut Vm, v: Val) -> VmResult<ObjId> {
        let Val::Str(ofs) = v else {
            return type_err(ErrCode::WrongMetaclass, v.type_name());
        };
        let text = v_pool(vm)?.read_str(ofs)?;
        let kind = vm
            .registry
            .kind_by_name(STRING_KIND_NAME)
            .ok_or_else(|| Fault::fatal("string kind not registered"))?;
        Ok(vm.heap.alloc(HeapObject::new(kind).with_payload(Payload::Str(text))))
    }

    /// Concatenation; the right operand is converted to text.
    fn add(&self, vm: &mut Vm, obj: ObjId, rhs: Val) -> VmResult<Val> {
        let mut text = text_of(vm, obj)?;
        text.push_str(&vm.val_to_text(rhs)?);
        new_str(vm, text)
    }

    fn eq(&self, vm: &mut Vm, obj: ObjId, rhs: Val, _depth: u32) -> VmResult<bool> {
        let mine = text_of(vm, obj)?;
        Ok(text_of_val(vm, rhs)?.is_some_and(|other| other == mine))
    }

    fn compare(&self, vm: &mut Vm, obj: ObjId, rhs: Val) -> VmResult<Ordering> {
        let mine = text_of(vm, obj)?;
        match text_of_val(vm, rhs)? {
            Some(other) => Ok(mine.cmp(&other)),
            None => type_err(ErrCode::BadTypeCompare, rhs.type_name()),
        }
    }

    fn to_text(&self, vm: &mut Vm, obj: ObjId) -> VmResult<String> {
        text_of(vm, obj)
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

fn int_arg(v: Val) -> VmResult<i32> {
    match v {
        Val::Int(n) => Ok(n),
        other => type_err(ErrCode::BadTypeIndex, other.type_name()),
    }
}

fn s_len(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 0, 0)?;
    let text = text_of(vm, obj)?;
    Ok(Val::Int(text.chars().count() as i32))
}

/// substr(start, len?): one-based, character-counted. A negative start
/// counts back from the end of the string; out-of-range requests clamp to
/// the available text rather than erroring.
fn s_substr(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 2)?;
    let text = text_of(vm, obj)?;
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len() as i32;

    let start = int_arg(args[0])?;
    let begin = if start < 0 {
        (n + start).max(0)
    } else {
        (start - 1).max(0)
    }
    .min(n) as usize;

    let take = match args.get(1) {
        None => chars.len() - begin,
        Some(&v) => int_arg(v)?.max(0) as usize,
    };
    let out: String = chars[begin..].iter().take(take).collect();
    new_str(vm, out)
}

fn s_to_upper(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 0, 0)?;
    let text = text_of(vm, obj)?.to_uppercase();
    new_str(vm, text)
}

fn s_to_lower(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 0, 0)?;
    let text = text_of(vm, obj)?.to_lowercase();
    new_str(vm, text)
}

/// find(needle, start?): one-based index of the first match at or after
/// `start`, or nil.
fn s_find(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 2)?;
    let text = text_of(vm, obj)?;
    let Some(needle) = text_of_val(vm, args[0])? else {
        return type_err(ErrCode::WrongMetaclass, args[0].type_name());
    };
    let start = match args.get(1) {
        None => 1,
        Some(&v) => int_arg(v)?.max(1),
    } as usize;

    let chars: Vec<char> = text.chars().collect();
    let pat: Vec<char> = needle.chars().collect();
    if start > chars.len() + 1 {
        return Ok(Val::Nil);
    }
    let mut at = start - 1;
    while at + pat.len() <= chars.len() {
        if chars[at..at + pat.len()] == pat[..] {
            return Ok(Val::Int(at as i32 + 1));
        }
        at += 1;
    }
    Ok(Val::Nil)
}
