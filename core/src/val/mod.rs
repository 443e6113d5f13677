use anyhow::{Result, bail};

use crate::err::{ErrCode, VmResult, type_err};


/// Object identifier into the heap table.
pub type ObjId = u32;
/// Property identifier; user properties and intrinsic methods share this
/// numbering space.
pub type PropId = u16;
/// Index of a registered metaclass kind.
pub type KindId = u16;

/// Sentinel code offset marking the boundary of an external call context.
/// `ret` through a frame whose return IP carries this value stops the
/// enclosing run loop instead of resuming a caller.
pub const SENTINEL_OFS: u32 = u32::MAX;

/// A single VM value. Every stack slot and every property holds exactly one
/// of these; the tag alone determines behavior. String and list constants
/// are data-pool offsets, not heap references, so `Val` stays `Copy` and
/// slot moves are free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Val {
    Nil,
    True,
    Int(i32),
    /// Heap object reference.
    Obj(ObjId),
    /// Property id as a first-class value.
    Prop(PropId),
    /// Single-quoted string constant: data-pool offset of a length-prefixed
    /// UTF-8 string.
    Str(u32),
    /// Double-quoted (self-printing) string constant: same layout as `Str`,
    /// but evaluating it as a property routes the text to output.
    DStr(u32),
    /// List constant: data-pool offset of a length-prefixed dataholder run.
    List(u32),
    /// Code-pool offset of a method body, as stored in a property slot.
    CodeOfs(u32),
    /// First-class function pointer (code-pool offset of a function).
    FnPtr(u32),
    Enum(u32),
    /// Unused / deleted slot marker.
    Empty,
    /// Pointer to a built-in function.
    BifPtr { set: u16, index: u16 },
    /// Descriptor index of a native method, used by reflection results.
    Native(u16),
}

// Dataholder tags: the 5-byte (tag + u32 payload) constant encoding used in
// list constants, object property records, and symbol table entries.
pub const DH_NIL: u8 = 1;
pub const DH_TRUE: u8 = 2;
pub const DH_INT: u8 = 3;
pub const DH_OBJ: u8 = 4;
pub const DH_PROP: u8 = 5;
pub const DH_STR: u8 = 6;
pub const DH_DSTR: u8 = 7;
pub const DH_LIST: u8 = 8;
pub const DH_CODEOFS: u8 = 9;
pub const DH_FNPTR: u8 = 10;
pub const DH_ENUM: u8 = 11;
pub const DH_EMPTY: u8 = 12;
pub const DH_BIFPTR: u8 = 13;
pub const DH_NATIVE: u8 = 14;

impl Val {
    /// Decode a 5-byte dataholder. Fails on unknown tags; images carrying
    /// them are malformed.
    pub fn from_dataholder(bytes: &[u8]) -> Result<Val> {
        if bytes.len() < 5 {
            bail!("truncated dataholder ({} bytes)", bytes.len());
        }
        let payload = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        Ok(match bytes[0] {
            DH_NIL => Val::Nil,
            DH_TRUE => Val::True,
            DH_INT => Val::Int(payload as i32),
            DH_OBJ => Val::Obj(payload),
            DH_PROP => Val::Prop(payload as u16),
            DH_STR => Val::Str(payload),
            DH_DSTR => Val::DStr(payload),
            DH_LIST => Val::List(payload),
            DH_CODEOFS => Val::CodeOfs(payload),
            DH_FNPTR => Val::FnPtr(payload),
            DH_ENUM => Val::Enum(payload),
            DH_EMPTY => Val::Empty,
            DH_BIFPTR => Val::BifPtr {
                set: (payload >> 16) as u16,
                index: payload as u16,
            },
            DH_NATIVE => Val::Native(payload as u16),
            tag => bail!("unknown dataholder tag {tag}"),
        })
    }

    pub fn to_dataholder(&self) -> [u8; 5] {
        let (tag, payload): (u8, u32) = match *self {
            Val::Nil => (DH_NIL, 0),
            Val::True => (DH_TRUE, 0),
            Val::Int(n) => (DH_INT, n as u32),
            Val::Obj(id) => (DH_OBJ, id),
            Val::Prop(p) => (DH_PROP, p as u32),
            Val::Str(ofs) => (DH_STR, ofs),
            Val::DStr(ofs) => (DH_DSTR, ofs),
            Val::List(ofs) => (DH_LIST, ofs),
            Val::CodeOfs(ofs) => (DH_CODEOFS, ofs),
            Val::FnPtr(ofs) => (DH_FNPTR, ofs),
            Val::Enum(e) => (DH_ENUM, e),
            Val::Empty => (DH_EMPTY, 0),
            Val::BifPtr { set, index } => (DH_BIFPTR, ((set as u32) << 16) | index as u32),
            Val::Native(d) => (DH_NATIVE, d as u32),
        };
        let p = payload.to_le_bytes();
        [tag, p[0], p[1], p[2], p[3]]
    }

    /// Truth value for conditional jumps. Reference-like values are true;
    /// tags with no sensible truth value raise a routable type error.
    pub fn truthy(&self) -> VmResult<bool> {
        match self {
            Val::Nil => Ok(false),
            Val::True => Ok(true),
            Val::Int(n) => Ok(*n != 0),
            Val::Obj(_) | Val::Str(_) | Val::DStr(_) | Val::List(_) | Val::Enum(_) => Ok(true),
            other => type_err(ErrCode::BadTypeCond, other.type_name()),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Val::Nil)
    }

    /// Tag name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Nil => "nil",
            Val::True => "true",
            Val::Int(_) => "int",
            Val::Obj(_) => "object",
            Val::Prop(_) => "property",
            Val::Str(_) => "string",
            Val::DStr(_) => "dstring",
            Val::List(_) => "list",
            Val::CodeOfs(_) => "code",
            Val::FnPtr(_) => "funcptr",
            Val::Enum(_) => "enum",
            Val::Empty => "empty",
            Val::BifPtr { .. } => "builtin",
            Val::Native(_) => "native",
        }
    }

    /// Identity equality: exact tag and payload. Deep equality (pool string
    /// contents, list elements, metaclass hooks) lives on `Vm::vals_eq`.
    pub fn same(&self, other: &Val) -> bool {
        self == other
    }
}

impl Default for Val {
    fn default() -> Self {
        Val::Nil
    }
}
