use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::debug;

use crate::err::{ErrCode, VmResult, type_err};
use crate::heap::object::HeapObject;
use crate::img::DepEntry;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{KindId, ObjId, PropId, Val};
use crate::vm::Vm;

/// A native (intrinsic) method. Arguments arrive already popped, left to
/// right; the result goes to R0 by the dispatch loop.
pub type NativeMethod = fn(&mut Vm, ObjId, &[Val]) -> VmResult<Val>;

/// One native kind of heap object. Implementations provide the image
/// loader, the runtime constructor, a method table bound to property ids by
/// the image's dependency list, and the operator hooks the dispatch loop
/// consults for object operands.
///
/// Everything has a refusing default so a minimal kind only implements what
/// it supports; unsupported operations surface as routable type errors.
pub trait Metaclass: Send + Sync {
    fn name(&self) -> &'static str;

    /// Implementation superclass, by registered name. Native-method lookup
    /// walks this chain, so a subclass kind inherits intrinsic methods and
    /// its own table entries win.
    fn super_name(&self) -> Option<&'static str> {
        None
    }

    /// Method table; the image's dependency list assigns property ids to
    /// these slots in order.
    fn methods(&self) -> &'static [NativeMethod] {
        &[]
    }

    /// Materialize a static object from its image record.
    fn load(&self, id: ObjId, transient: bool, payload: &[u8]) -> Result<HeapObject>;

    /// Runtime construction (`NEW`/`TRNEW`); constructor arguments arrive
    /// popped left to right. `kind` is the registered id of this metaclass.
    fn create(&self, vm: &mut Vm, kind: KindId, args: &[Val]) -> VmResult<ObjId>;

    /// Promote a pool constant (string or list) to an instance of this
    /// kind, for native-method dispatch on constant receivers.
    fn from_const(&self, _vm: &mut Vm, v: Val) -> VmResult<ObjId> {
        type_err(ErrCode::WrongMetaclass, v.type_name())
    }

    fn add(&self, _vm: &mut Vm, _obj: ObjId, rhs: Val) -> VmResult<Val> {
        type_err(ErrCode::BadTypeAdd, rhs.type_name())
    }

    fn sub(&self, _vm: &mut Vm, _obj: ObjId, rhs: Val) -> VmResult<Val> {
        type_err(ErrCode::BadTypeSub, rhs.type_name())
    }

    /// Deep equality; `depth` counts structural recursion and implementors
    /// must pass it through guarded.
    fn eq(&self, _vm: &mut Vm, obj: ObjId, rhs: Val, _depth: u32) -> VmResult<bool> {
        Ok(matches!(rhs, Val::Obj(o) if o == obj))
    }

    fn compare(&self, _vm: &mut Vm, _obj: ObjId, rhs: Val) -> VmResult<Ordering> {
        type_err(ErrCode::BadTypeCompare, rhs.type_name())
    }

    fn index(&self, _vm: &mut Vm, _obj: ObjId, idx: Val) -> VmResult<Val> {
        type_err(ErrCode::BadTypeIndex, idx.type_name())
    }

    /// Indexed store. Returns the container value to use afterwards, which
    /// for copy-semantics kinds is a new object.
    fn set_index(&self, _vm: &mut Vm, _obj: ObjId, idx: Val, _val: Val) -> VmResult<Val> {
        type_err(ErrCode::BadTypeIndex, idx.type_name())
    }

    /// Text conversion for the output path.
    fn to_text(&self, _vm: &mut Vm, obj: ObjId) -> VmResult<String> {
        type_err(ErrCode::BadTypeSay, format!("object#{obj}"))
    }
}

/// Registered kinds plus the per-image binding of property ids to native
/// methods. The binding is an explicit table keyed by (kind, property), so
/// intrinsic dispatch never depends on host-language inheritance.
pub struct MetaRegistry {
    entries: Vec<Arc<dyn Metaclass>>,
    by_name: FastHashMap<&'static str, KindId>,
    /// Image dependency index -> registered kind.
    dep_kinds: Vec<KindId>,
    /// Per kind: property id -> bound native method.
    native: Vec<FastHashMap<PropId, NativeMethod>>,
    string_kind: Option<KindId>,
    list_kind: Option<KindId>,
}

impl Default for MetaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: fast_hash_map_new(),
            dep_kinds: Vec::new(),
            native: Vec::new(),
            string_kind: None,
            list_kind: None,
        }
    }

    pub fn register(&mut self, meta: Arc<dyn Metaclass>) -> KindId {
        let kind = self.entries.len() as KindId;
        self.by_name.insert(meta.name(), kind);
        match meta.name() {
            "string" => self.string_kind = Some(kind),
            "list" => self.list_kind = Some(kind),
            _ => {}
        }
        self.entries.push(meta);
        self.native.push(fast_hash_map_new());
        kind
    }

    pub fn kind_by_name(&self, name: &str) -> Option<KindId> {
        self.by_name.get(name).copied()
    }

    pub fn meta(&self, kind: KindId) -> Option<Arc<dyn Metaclass>> {
        self.entries.get(kind as usize).cloned()
    }

    pub fn string_kind(&self) -> Option<KindId> {
        self.string_kind
    }

    pub fn list_kind(&self) -> Option<KindId> {
        self.list_kind
    }

    /// Kind handling native methods for a pool constant receiver.
    pub fn kind_for_const(&self, v: &Val) -> Option<KindId> {
        match v {
            Val::Str(_) => self.string_kind,
            Val::List(_) => self.list_kind,
            _ => None,
        }
    }

    /// Resolve the image's metaclass dependency list and rebuild the
    /// (kind, property) -> method tables. An unresolvable name or a table
    /// asking for more methods than a kind provides is a load error.
    pub fn bind_deps(&mut self, deps: &[DepEntry]) -> Result<()> {
        self.dep_kinds.clear();
        let mut dep_of_kind: FastHashMap<KindId, usize> = fast_hash_map_new();
        for (i, dep) in deps.iter().enumerate() {
            let kind = match self.by_name.get(dep.name.as_str()) {
                Some(&k) => k,
                None => bail!("unresolved metaclass dependency \"{}\"", dep.name),
            };
            if dep.props.len() > self.entries[kind as usize].methods().len() {
                bail!(
                    "metaclass \"{}\" provides {} methods, image binds {}",
                    dep.name,
                    self.entries[kind as usize].methods().len(),
                    dep.props.len()
                );
            }
            self.dep_kinds.push(kind);
            dep_of_kind.insert(kind, i);
        }

        for kind in 0..self.entries.len() as KindId {
            let mut table = fast_hash_map_new();
            // Root-first along the implementation chain, so nearer kinds
            // overwrite and an intrinsic override wins transparently.
            for ancestor in self.impl_chain(kind).into_iter().rev() {
                if let Some(&dep_idx) = dep_of_kind.get(&ancestor) {
                    let methods = self.entries[ancestor as usize].methods();
                    for (slot, &prop) in deps[dep_idx].props.iter().enumerate() {
                        table.insert(prop, methods[slot]);
                    }
                }
            }
            debug!(
                kind = self.entries[kind as usize].name(),
                bound = table.len(),
                "bound native methods"
            );
            self.native[kind as usize] = table;
        }
        Ok(())
    }

    /// Self-to-root implementation chain.
    fn impl_chain(&self, kind: KindId) -> Vec<KindId> {
        let mut chain = vec![kind];
        let mut cur = kind;
        while let Some(name) = self.entries[cur as usize].super_name() {
            match self.by_name.get(name) {
                Some(&next) if !chain.contains(&next) => {
                    chain.push(next);
                    cur = next;
                }
                _ => break,
            }
        }
        chain
    }

    pub fn dep_kind(&self, mc_index: u16) -> Option<KindId> {
        self.dep_kinds.get(mc_index as usize).copied()
    }

    pub fn native_for(&self, kind: KindId, prop: PropId) -> Option<NativeMethod> {
        self.native.get(kind as usize)?.get(&prop).copied()
    }
}
