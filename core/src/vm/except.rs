//! Exception routing: walking exception tables frame by frame until a
//! handler claims the thrown object, or the throw escapes the outermost
//! frame of the current call context.

use tracing::trace;

use crate::err::{ErrCode, Fault, VmResult};
use crate::heap::{HeapObject, OBJECT_KIND_NAME, derives_from};
use crate::val::{ObjId, SENTINEL_OFS, Val};
use crate::vm::Vm;

/// One exception-table record, offsets method-relative. A class of zero is
/// a catch-all record, as the compiler emits for `finally` ranges.
#[derive(Debug, Clone, Copy)]
struct ExcRecord {
    start: u16,
    end: u16,
    class: ObjId,
    handler: u16,
}

impl Vm {
    /// Exception table of the method at `ep`: a u16 record count followed by
    /// the records, each `exc_entry_size` bytes (extra declared bytes are
    /// skipped). An `exc_ofs` of zero means the method has no table.
    fn exc_table(&self, ep: u32) -> VmResult<Vec<ExcRecord>> {
        let hdr = self.method_header(ep)?;
        if hdr.exc_ofs == 0 {
            return Ok(Vec::new());
        }
        let entry_size = self.entry_info()?.exc_entry_size as u32;
        let code = self.code()?;
        let base = ep + hdr.exc_ofs as u32;
        let count = code.read_u16(base)?;
        let mut records = Vec::with_capacity(count as usize);
        for i in 0..count as u32 {
            let at = base + 2 + i * entry_size;
            records.push(ExcRecord {
                start: code.read_u16(at)?,
                end: code.read_u16(at + 2)?,
                class: code.read_u32(at + 4)?,
                handler: code.read_u16(at + 8)?,
            });
        }
        Ok(records)
    }

    /// Route a thrown object. On success the VM is positioned at a handler:
    /// the operand stack of the handling frame is unwound to its locals, the
    /// exception object is pushed, and IP points at the handler. If no frame
    /// in the current call context handles it, every frame up to the context
    /// boundary is torn down and the throw is returned to the caller.
    pub(crate) fn route_exception(&mut self, obj: ObjId) -> VmResult<()> {
        loop {
            if self.ep != SENTINEL_OFS {
                if let Some(rec) = self.find_handler(obj)? {
                    trace!(obj, handler = rec.handler, "exception handled");
                    let top = self.locals_top()?;
                    self.stack.truncate(top);
                    self.stack.push(Val::Obj(obj))?;
                    // A rethrow from inside the handler routes again from
                    // the handler's own IP, which lies outside the record's
                    // protected range, so it cannot re-enter this record.
                    self.ip = self.ep + rec.handler as u32;
                    return Ok(());
                }
            }
            // No handler in this frame; tear it down and look in the caller.
            self.ret()?;
            if self.stop {
                trace!(obj, "exception escaped call context");
                return Err(Fault::Throw(obj));
            }
        }
    }

    /// First record whose protected range covers the faulting instruction
    /// and whose class matches the thrown object. Records are ordered
    /// innermost first, so first match is the nearest enclosing handler.
    ///
    /// IP has already moved past the faulting instruction (in a caller frame
    /// it is the return address, one past the call), so the lookup uses the
    /// last consumed byte: ranges are start-inclusive, end-exclusive over
    /// whole instructions.
    fn find_handler(&self, obj: ObjId) -> VmResult<Option<ExcRecord>> {
        let rel = match self.ip.checked_sub(1).and_then(|ip| ip.checked_sub(self.ep)) {
            Some(rel) if rel <= u16::MAX as u32 => rel as u16,
            _ => return Ok(None),
        };
        for rec in self.exc_table(self.ep)? {
            if rel < rec.start || rel >= rec.end {
                continue;
            }
            if rec.class == 0 || derives_from(&self.heap, obj, rec.class) {
                return Ok(Some(rec));
            }
        }
        Ok(None)
    }

    /// Turn an unmaterialized runtime fault into a throwable heap object:
    /// an instance of the image's declared runtime-error class, with the
    /// message stored under the declared message property. An image that
    /// declares neither cannot catch runtime errors, so the fault escalates
    /// to a fatal host error.
    pub(crate) fn materialize_runtime_error(&mut self, code: ErrCode, msg: &str) -> VmResult<ObjId> {
        let class = self.rt_err_class().ok_or_else(|| {
            Fault::fatal(format!("unhandled runtime error: {msg} ({code:?})"))
        })?;
        let kind = self
            .registry
            .kind_by_name(OBJECT_KIND_NAME)
            .ok_or_else(|| Fault::fatal("core object kind not registered"))?;
        let exc = HeapObject::new(kind).with_supers(vec![class]);
        let id = self.heap.alloc(exc);
        // The message needs a dynamic string; without a string kind the
        // exception still routes, just without its text.
        if let Some(prop) = self.exc_msg_prop() {
            if let Ok(text) = self.new_string(msg) {
                if let Some(o) = self.heap.get_mut(id) {
                    o.props.insert(prop, text);
                }
            }
        }
        Ok(id)
    }
}
