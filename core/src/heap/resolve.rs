use crate::heap::meta::{MetaRegistry, NativeMethod};
use crate::heap::{Heap, HeapObject};
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};
use crate::val::{ObjId, PropId, Val};

/// Outcome of a property lookup. Not-found is distinct from a property that
/// is present and holds nil.
pub enum Resolved {
    NotFound,
    /// A user-defined property slot on `holder`.
    Data { holder: ObjId, val: Val },
    /// An intrinsic method of `holder`'s concrete kind.
    Native { holder: ObjId, method: NativeMethod },
}

struct Hit {
    holder: ObjId,
    dist: u32,
    what: HitKind,
}

enum HitKind {
    Data(Val),
    Native(NativeMethod),
}

/// Resolve `prop` on `obj`, traversing the superclass DAG depth-first with
/// superclasses in declaration order. An object reachable along several
/// paths is re-entered whenever a strictly shorter path to it is found, so
/// every candidate is counted at its minimum distance; cycles in malformed
/// graphs terminate. Among all candidates the minimum distance wins, and
/// among equal-distance candidates the last one in traversal order wins —
/// so of two parents that both define the property, the later-listed
/// parent's definition is the one returned.
///
/// `only_inherited` excludes distance-0 candidates; the `INHERIT` opcode
/// family resolves through the defining object with this set.
///
/// At each holder, a user property shadows an intrinsic method of the same
/// id. Intrinsic methods come from the registry's (kind, property) binding,
/// which already folds in the kind's implementation chain.
pub fn resolve_prop(
    heap: &Heap,
    reg: &MetaRegistry,
    obj: ObjId,
    prop: PropId,
    only_inherited: bool,
) -> Resolved {
    let mut search = Search {
        heap,
        reg,
        prop,
        only_inherited,
        seen: fast_hash_map_new(),
        best: None,
    };
    search.visit(obj, 0);
    match search.best {
        None => Resolved::NotFound,
        Some(Hit {
            holder,
            what: HitKind::Data(val),
            ..
        }) => Resolved::Data { holder, val },
        Some(Hit {
            holder,
            what: HitKind::Native(method),
            ..
        }) => Resolved::Native { holder, method },
    }
}

struct Search<'a> {
    heap: &'a Heap,
    reg: &'a MetaRegistry,
    prop: PropId,
    only_inherited: bool,
    /// Shortest distance each object has been reached at so far.
    seen: FastHashMap<ObjId, u32>,
    best: Option<Hit>,
}

impl Search<'_> {
    fn visit(&mut self, id: ObjId, dist: u32) {
        if self.seen.get(&id).is_some_and(|&d| d <= dist) {
            return;
        }
        self.seen.insert(id, dist);
        let heap = self.heap;
        let Some(obj) = heap.get(id) else {
            return;
        };
        if !(self.only_inherited && dist == 0) {
            if let Some(what) = self.candidate(obj) {
                let replace = match &self.best {
                    None => true,
                    // <= keeps the last equal-distance candidate.
                    Some(best) => dist <= best.dist,
                };
                if replace {
                    self.best = Some(Hit {
                        holder: id,
                        dist,
                        what,
                    });
                }
            }
        }
        for &s in &obj.supers {
            self.visit(s, dist + 1);
        }
    }

    fn candidate(&self, obj: &HeapObject) -> Option<HitKind> {
        if let Some(&val) = obj.props.get(&self.prop) {
            return Some(HitKind::Data(val));
        }
        self.reg.native_for(obj.kind, self.prop).map(HitKind::Native)
    }
}

/// Reachability over superclass lists; an object derives from itself.
/// Cycle-guarded so malformed graphs terminate.
pub fn derives_from(heap: &Heap, obj: ObjId, class: ObjId) -> bool {
    let mut visited: FastHashSet<ObjId> = fast_hash_set_new();
    let mut pending = vec![obj];
    while let Some(id) = pending.pop() {
        if id == class {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        if let Some(o) = heap.get(id) {
            pending.extend(o.supers.iter().copied());
        }
    }
    false
}
