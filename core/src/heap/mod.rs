//! Heap table, metaclass registry, and property resolution.
//!
//! The heap owns every object by integer id; nothing else holds an owning
//! reference. Objects are created at load time (static objects through the
//! metaclass loaders) or at runtime (`NEW`/`TRNEW`) and live until the heap
//! is cleared for a reload — there is no reclamation within a run.

mod meta;
mod object;
mod plain;
mod resolve;

pub use meta::{Metaclass, MetaRegistry, NativeMethod};
pub use object::{HeapObject, Payload};
pub use plain::{OBJECT_KIND_NAME, PlainObjectMeta};
pub use resolve::{Resolved, derives_from, resolve_prop};


use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::ObjId;
use anyhow::{Result, bail};

pub struct Heap {
    objects: FastHashMap<ObjId, HeapObject>,
    /// Insertion order, which is the iteration order reflection sees.
    order: Vec<ObjId>,
    next_id: ObjId,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: fast_hash_map_new(),
            order: Vec::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.order.clear();
        self.next_id = 1;
    }

    /// Add a runtime object, assigning the next unused id (one past the
    /// highest id ever inserted).
    pub fn alloc(&mut self, mut obj: HeapObject) -> ObjId {
        let id = self.next_id;
        obj.id = id;
        self.objects.insert(id, obj);
        self.order.push(id);
        self.next_id += 1;
        id
    }

    /// Add a static object under its image-assigned id.
    pub fn insert(&mut self, obj: HeapObject) -> Result<()> {
        if obj.id == 0 {
            bail!("object id 0 is reserved");
        }
        if self.objects.contains_key(&obj.id) {
            bail!("duplicate object id {}", obj.id);
        }
        self.next_id = self.next_id.max(obj.id + 1);
        self.order.push(obj.id);
        self.objects.insert(obj.id, obj);
        Ok(())
    }

    pub fn get(&self, id: ObjId) -> Option<&HeapObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjId) -> Option<&mut HeapObject> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: ObjId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Objects in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HeapObject> {
        self.order.iter().filter_map(|id| self.objects.get(id))
    }

    /// Reflection primitive: the first object after `start_after` (or from
    /// the beginning) satisfying the predicate, in insertion order — not
    /// numeric id order.
    pub fn find_from(
        &self,
        start_after: Option<ObjId>,
        mut pred: impl FnMut(&HeapObject) -> bool,
    ) -> Option<ObjId> {
        let skip = match start_after {
            None => 0,
            Some(prev) => self.order.iter().position(|&id| id == prev)? + 1,
        };
        self.order[skip..]
            .iter()
            .find(|&&id| self.objects.get(&id).is_some_and(&mut pred))
            .copied()
    }
}
