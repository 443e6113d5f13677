use anyhow::Result;

use crate::err::{ErrCode, VmResult, type_err};
use crate::heap::meta::Metaclass;
use crate::heap::object::HeapObject;
use crate::img::ByteReader;
use crate::val::{KindId, ObjId, Val};
use crate::vm::Vm;

pub const OBJECT_KIND_NAME: &str = "object";

const OBJ_FLAG_CLASS: u16 = 0x0001;

/// The one kind the engine itself owns: the plain user-defined object. Its
/// image payload is the superclass list, the property table, and a class
/// flag; everything else about it comes from property resolution.
pub struct PlainObjectMeta;

impl Metaclass for PlainObjectMeta {
    fn name(&self) -> &'static str {
        OBJECT_KIND_NAME
    }

    fn load(&self, id: ObjId, transient: bool, payload: &[u8]) -> Result<HeapObject> {
        let mut r = ByteReader::new(payload);
        let super_count = r.u16()? as usize;
        let prop_count = r.u16()? as usize;
        let flags = r.u16()?;
        let mut obj = HeapObject::new(0); // kind patched by the loader
        obj.id = id;
        obj.transient = transient;
        obj.is_class = flags & OBJ_FLAG_CLASS != 0;
        obj.supers.reserve(super_count);
        for _ in 0..super_count {
            obj.supers.push(r.u32()?);
        }
        for _ in 0..prop_count {
            let prop = r.u16()?;
            let val = r.dataholder()?;
            obj.props.insert(prop, val);
        }
        Ok(obj)
    }

    /// `new` with an optional leading class argument: the created instance
    /// lists it as its single superclass. Constructor property dispatch is
    /// compiled code's business, not the metaclass's.
    fn create(&self, vm: &mut Vm, kind: KindId, args: &[Val]) -> VmResult<ObjId> {
        let mut obj = HeapObject::new(kind);
        match args.first() {
            None => {}
            Some(Val::Obj(cls)) => obj.supers.push(*cls),
            Some(other) => return type_err(ErrCode::WrongMetaclass, other.type_name()),
        }
        Ok(vm.heap.alloc(obj))
    }
}
