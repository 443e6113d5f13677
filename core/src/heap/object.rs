use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{KindId, ObjId, PropId, Val};

/// Native storage attached to a heap object by its metaclass. A small closed
/// set instead of host downcasting: every intrinsic kind picks the shape it
/// needs and the engine can still clone and debug-print any object.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Str(String),
    Vals(Vec<Val>),
    Bytes(Vec<u8>),
}

/// One heap object. All cross-references (superclasses, property values)
/// are plain ids; the heap table is the only owner, so cyclic graphs need
/// no special ownership handling.
#[derive(Debug, Clone)]
pub struct HeapObject {
    pub id: ObjId,
    pub kind: KindId,
    /// Superclass ids in declaration order; order is significant for
    /// property resolution tie-breaks.
    pub supers: Vec<ObjId>,
    pub props: FastHashMap<PropId, Val>,
    pub is_class: bool,
    pub transient: bool,
    pub payload: Payload,
}

impl HeapObject {
    pub fn new(kind: KindId) -> Self {
        Self {
            id: 0,
            kind,
            supers: Vec::new(),
            props: fast_hash_map_new(),
            is_class: false,
            transient: false,
            payload: Payload::None,
        }
    }

    pub fn with_supers(mut self, supers: Vec<ObjId>) -> Self {
        self.supers = supers;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_prop(mut self, prop: PropId, val: Val) -> Self {
        self.props.insert(prop, val);
        self
    }

    pub fn class(mut self) -> Self {
        self.is_class = true;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}
