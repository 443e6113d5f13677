//! The dynamic list kind. Value semantics like the constant pool lists:
//! operations that change contents produce a new list object, so a list
//! value held elsewhere never changes underfoot.

use anyhow::Result;
use fabula_core::err::{ErrCode, Fault, VmResult, type_err};
use fabula_core::heap::{HeapObject, Metaclass, NativeMethod, Payload};
use fabula_core::img::ByteReader;
use fabula_core::val::{KindId, ObjId, Val};
use fabula_core::vm::Vm;

pub const LIST_KIND_NAME: &str = "list";

/// Native method table order, as images bind it in their dependency list:
/// length, sublist, indexOf, append.
pub struct ListMeta;

/// Elements carried by a list object.
pub fn elems_of(vm: &Vm, obj: ObjId) -> VmResult<Vec<Val>> {
    match vm.heap.get(obj).map(|o| &o.payload) {
        Some(Payload::Vals(v)) => Ok(v.clone()),
        Some(_) => type_err(ErrCode::WrongMetaclass, format!("object#{obj} is not a list")),
        None => Err(Fault::Runtime(ErrCode::ObjNotFound, format!("object {obj}"))),
    }
}

/// Elements of any list-ish value: a pool constant or a list object.
pub fn elems_of_val(vm: &Vm, v: Val) -> VmResult<Option<Vec<Val>>> {
    match v {
        Val::List(ofs) => {
            let pool = vm.data_pool().ok_or_else(|| Fault::fatal("no image loaded"))?;
            Ok(Some(pool.read_list(ofs)?))
        }
        Val::Obj(id) => match vm.heap.get(id).map(|o| &o.payload) {
            Some(Payload::Vals(v)) => Ok(Some(v.clone())),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn new_list(vm: &mut Vm, vals: Vec<Val>) -> VmResult<Val> {
    let kind = vm
        .registry
        .kind_by_name(LIST_KIND_NAME)
        .ok_or_else(|| Fault::fatal("list kind not registered"))?;
    Ok(Val::Obj(vm.heap.alloc(HeapObject::new(kind).with_payload(Payload::Vals(vals)))))
}

impl Metaclass for ListMeta {
    fn name(&self) -> &'static str {
        LIST_KIND_NAME
    }

    fn methods(&self) -> &'static [NativeMethod] {
        &[l_len, l_sublist, l_index_of, l_append]
    }

    fn load(&self, id: ObjId, transient: bool, payload: &[u8]) -> Result<HeapObject> {
        let mut r = ByteReader::new(payload);
        let count = r.u16()? as usize;
        let mut vals = Vec::with_capacity(count);
        for _ in 0..count {
            vals.push(r.dataholder()?);
        }
        let mut o = HeapObject::new(0).with_payload(Payload::Vals(vals));
        o.id = id;
        o.transient = transient;
        Ok(o)
    }

    /// `new` collects the constructor arguments as the elements.
    fn create(&self, vm: &mut Vm, kind: KindId, args: &[Val]) -> VmResult<ObjId> {
        Ok(vm
            .heap
            .alloc(HeapObject::new(kind).with_payload(Payload::Vals(args.to_vec()))))
    }

    fn from_const(&self, vm: &mut Vm, v: Val) -> VmResult<ObjId> {
        let Some(vals) = elems_of_val(vm, v)? else {
            return type_err(ErrCode::WrongMetaclass, v.type_name());
        };
        let kind = vm
            .registry
            .kind_by_name(LIST_KIND_NAME)
            .ok_or_else(|| Fault::fatal("list kind not registered"))?;
        Ok(vm.heap.alloc(HeapObject::new(kind).with_payload(Payload::Vals(vals))))
    }

    /// Concatenation: a list operand contributes its elements, anything
    /// else is appended as a single element.
    fn add(&self, vm: &mut Vm, obj: ObjId, rhs: Val) -> VmResult<Val> {
        let mut vals = elems_of(vm, obj)?;
        match elems_of_val(vm, rhs)? {
            Some(more) => vals.extend(more),
            None => vals.push(rhs),
        }
        new_list(vm, vals)
    }

    /// Removal: every element equal to the right operand goes (or, for a
    /// list operand, equal to any of its elements).
    fn sub(&self, vm: &mut Vm, obj: ObjId, rhs: Val) -> VmResult<Val> {
        let vals = elems_of(vm, obj)?;
        let remove = match elems_of_val(vm, rhs)? {
            Some(more) => more,
            None => vec![rhs],
        };
        let mut kept = Vec::with_capacity(vals.len());
        'outer: for v in vals {
            for r in &remove {
                if vm.vals_eq(v, *r, 1)? {
                    continue 'outer;
                }
            }
            kept.push(v);
        }
        new_list(vm, kept)
    }

    fn eq(&self, vm: &mut Vm, obj: ObjId, rhs: Val, depth: u32) -> VmResult<bool> {
        let mine = elems_of(vm, obj)?;
        let Some(other) = elems_of_val(vm, rhs)? else {
            return Ok(false);
        };
        if mine.len() != other.len() {
            return Ok(false);
        }
        for (a, b) in mine.into_iter().zip(other) {
            if !vm.vals_eq(a, b, depth + 1)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn index(&self, vm: &mut Vm, obj: ObjId, idx: Val) -> VmResult<Val> {
        let vals = elems_of(vm, obj)?;
        one_based(&vals, idx)
    }

    fn set_index(&self, vm: &mut Vm, obj: ObjId, idx: Val, val: Val) -> VmResult<Val> {
        let mut vals = elems_of(vm, obj)?;
        let at = match idx {
            Val::Int(n) if n >= 1 && (n as usize) <= vals.len() => n as usize - 1,
            Val::Int(n) => {
                return Err(Fault::Runtime(ErrCode::IndexOutOfRange, format!("index {n}")));
            }
            other => return type_err(ErrCode::BadTypeIndex, other.type_name()),
        };
        vals[at] = val;
        new_list(vm, vals)
    }

    fn to_text(&self, vm: &mut Vm, obj: ObjId) -> VmResult<String> {
        let vals = elems_of(vm, obj)?;
        let mut out = String::new();
        for (i, v) in vals.into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&vm.val_to_text(v)?);
        }
        Ok(out)
    }
}

fn one_based(vals: &[Val], idx: Val) -> VmResult<Val> {
    match idx {
        Val::Int(n) if n >= 1 && (n as usize) <= vals.len() => Ok(vals[n as usize - 1]),
        Val::Int(n) => Err(Fault::Runtime(ErrCode::IndexOutOfRange, format!("index {n}"))),
        other => type_err(ErrCode::BadTypeIndex, other.type_name()),
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

fn l_len(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 0, 0)?;
    Ok(Val::Int(elems_of(vm, obj)?.len() as i32))
}

/// sublist(start, len?): one-based; the result clamps to the available
/// elements.
fn l_sublist(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 2)?;
    let vals = elems_of(vm, obj)?;
    let n = vals.len() as i32;
    let start = match args[0] {
        Val::Int(s) => s,
        other => return type_err(ErrCode::BadTypeIndex, other.type_name()),
    };
    let begin = if start < 0 { (n + start).max(0) } else { (start - 1).max(0) }.min(n) as usize;
    let take = match args.get(1) {
        None => vals.len() - begin,
        Some(&Val::Int(len)) => len.max(0) as usize,
        Some(&other) => return type_err(ErrCode::BadTypeIndex, other.type_name()),
    };
    let out: Vec<Val> = vals[begin..].iter().take(take).copied().collect();
    new_list(vm, out)
}

/// indexOf(value): one-based position of the first equal element, or nil.
fn l_index_of(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 1)?;
    let vals = elems_of(vm, obj)?;
    for (i, v) in vals.into_iter().enumerate() {
        if vm.vals_eq(v, args[0], 1)? {
            return Ok(Val::Int(i as i32 + 1));
        }
    }
    Ok(Val::Nil)
}

/// append(value): a new list one element longer.
fn l_append(vm: &mut Vm, obj: ObjId, args: &[Val]) -> VmResult<Val> {
    want_args(args, 1, 1)?;
    let mut vals = elems_of(vm, obj)?;
    vals.push(args[0]);
    new_list(vm, vals)
}
