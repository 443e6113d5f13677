//! The execution engine: value stack, call frames, the dispatch loop, and
//! the exception router.

mod except;
mod frame;
pub mod opcode;
mod ops;
mod run;
mod stack;

pub use frame::MethodHeader;
pub use stack::{DEFAULT_STACK_SLOTS, Stack};

#[cfg(test)]
mod vm_test;

use std::io::{self, Write};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::err::{ErrCode, Fault, VmResult, type_err};
use crate::heap::{Heap, HeapObject, MetaRegistry, Payload, PlainObjectMeta, Resolved, resolve_prop};
use crate::img::{EntryPoint, ParsedImage, Pool};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{ObjId, PropId, SENTINEL_OFS, Val};

/// A built-in function. Arguments arrive popped, in declaration order; the
/// result lands in R0.
pub type Builtin = fn(&mut Vm, &[Val]) -> VmResult<Val>;

/// A numbered set of built-in functions, addressed by the BUILTIN opcode
/// family as (set index, function index).
pub struct BuiltinSet {
    pub name: &'static str,
    pub funcs: Vec<Builtin>,
}

/// Well-known symbol names the engine itself consults.
const SYM_RUNTIME_ERROR: &str = "RuntimeError";
const SYM_EXC_MESSAGE: &str = "exceptionMessage";
const SYM_OBJ_CALL: &str = "objCall";

struct ImageCtx {
    code: Pool,
    data: Pool,
    entry: EntryPoint,
}

/// One virtual machine instance: the heap, the value stack, the loaded
/// image's pools, and all registration state. Everything is explicit
/// context — two `Vm`s never share anything, which keeps tests hermetic.
pub struct Vm {
    pub heap: Heap,
    pub registry: MetaRegistry,
    builtins: Vec<BuiltinSet>,
    symbols: FastHashMap<String, Val>,
    image: Option<ImageCtx>,

    pub(crate) stack: Stack,
    /// Frame pointer: index of the current frame's saved-FP slot.
    pub(crate) fp: usize,
    /// Code-pool offset of the next instruction byte.
    pub(crate) ip: u32,
    /// Entry pointer: code-pool offset of the current function's header.
    pub(crate) ep: u32,
    /// Result register.
    pub(crate) r0: Val,
    /// Set by `ret` on the external-call sentinel; stops the run loop.
    pub(crate) stop: bool,
    /// One-shot argument-count override installed by VARARGC.
    pub(crate) pending_varargc: Option<usize>,

    say_hook: Option<Val>,
    out: Box<dyn Write>,

    rt_err_class: Option<ObjId>,
    exc_msg_prop: Option<PropId>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut registry = MetaRegistry::new();
        registry.register(std::sync::Arc::new(PlainObjectMeta));
        Self {
            heap: Heap::new(),
            registry,
            builtins: Vec::new(),
            symbols: fast_hash_map_new(),
            image: None,
            stack: Stack::new(DEFAULT_STACK_SLOTS),
            fp: 0,
            ip: 0,
            ep: 0,
            r0: Val::Nil,
            stop: false,
            pending_varargc: None,
            say_hook: None,
            out: Box::new(io::stdout()),
            rt_err_class: None,
            exc_msg_prop: None,
        }
    }

    /// Redirect default text output (the sink used when no say hook is
    /// installed, and by the builtin print path).
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Append a builtin set; returns its index for the BUILTIN opcodes.
    pub fn add_builtin_set(&mut self, set: BuiltinSet) -> u16 {
        self.builtins.push(set);
        (self.builtins.len() - 1) as u16
    }

    pub fn result(&self) -> Val {
        self.r0
    }

    pub fn symbol(&self, name: &str) -> Option<Val> {
        self.symbols.get(name).copied()
    }

    pub(crate) fn code(&self) -> VmResult<&Pool> {
        match &self.image {
            Some(img) => Ok(&img.code),
            None => Err(Fault::fatal("no image loaded")),
        }
    }

    pub(crate) fn data(&self) -> VmResult<&Pool> {
        match &self.image {
            Some(img) => Ok(&img.data),
            None => Err(Fault::fatal("no image loaded")),
        }
    }

    /// Data pool, for native methods reading string/list constants.
    pub fn data_pool(&self) -> Option<&Pool> {
        self.image.as_ref().map(|img| &img.data)
    }

    pub(crate) fn entry_info(&self) -> VmResult<EntryPoint> {
        match &self.image {
            Some(img) => Ok(img.entry),
            None => Err(Fault::fatal("no image loaded")),
        }
    }

    /// Load an image, replacing any prior program state. The whole load
    /// either succeeds or leaves the Vm without an image; there is no
    /// partially loaded state.
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        self.image = None;
        let parsed: ParsedImage = crate::img::parse(bytes)?;
        self.registry.bind_deps(&parsed.deps)?;

        self.heap.clear();
        self.symbols.clear();
        self.stack.truncate(0);
        self.fp = 0;
        self.ip = 0;
        self.ep = 0;
        self.r0 = Val::Nil;
        self.stop = false;
        self.pending_varargc = None;

        for raw in &parsed.objects {
            let kind = self
                .registry
                .dep_kind(raw.mc_index)
                .ok_or_else(|| anyhow!("object {} references metaclass index {}", raw.id, raw.mc_index))?;
            let meta = self.registry.meta(kind).expect("bound kind");
            let mut obj = meta
                .load(raw.id, raw.transient, &raw.payload)
                .with_context(|| format!("loading object {}", raw.id))?;
            obj.kind = kind;
            obj.id = raw.id;
            self.heap.insert(obj)?;
        }

        for (name, val) in &parsed.symbols {
            self.symbols.insert(name.clone(), *val);
        }
        self.rt_err_class = match self.symbols.get(SYM_RUNTIME_ERROR) {
            Some(Val::Obj(id)) => Some(*id),
            _ => None,
        };
        self.exc_msg_prop = match self.symbols.get(SYM_EXC_MESSAGE) {
            Some(Val::Prop(p)) => Some(*p),
            _ => None,
        };

        debug!(
            objects = self.heap.len(),
            symbols = self.symbols.len(),
            entry = parsed.entry.entry_ofs,
            "image loaded"
        );
        self.image = Some(ImageCtx {
            code: parsed.code,
            data: parsed.data,
            entry: parsed.entry,
        });
        Ok(())
    }

    /// Run the loaded image from its entry point. Declared-required entry
    /// parameters the host does not model are passed as nil.
    pub fn run(&mut self) -> Result<Val> {
        let entry = self.entry_info().map_err(|f| self.fault_to_host(f))?;
        let hdr = self
            .method_header(entry.entry_ofs)
            .map_err(|f| self.fault_to_host(f))?;
        let args = vec![Val::Nil; hdr.params as usize];
        match self.invoke_ofs(entry.entry_ofs, &args) {
            Ok(v) => Ok(v),
            Err(fault) => Err(self.fault_to_host(fault)),
        }
    }

    /// Invoke a callable value and run it to completion, re-entering the
    /// dispatch loop. This is the path every native callback (comparators,
    /// iteration callbacks, conversion hooks, the say hook) uses to call
    /// back into user code.
    pub fn invoke(&mut self, target: Val, args: &[Val]) -> VmResult<Val> {
        match target {
            Val::FnPtr(ofs) | Val::CodeOfs(ofs) => self.invoke_ofs(ofs, args),
            Val::BifPtr { set, index } => {
                let f = self.builtin_fn(set, index)?;
                f(self, args)
            }
            Val::Prop(prop) => {
                let self_val = self.self_val()?;
                self.invoke_prop(self_val, prop, args)
            }
            Val::Obj(id) => {
                // An invokable object: dispatch through the well-known
                // call property if the image declares one.
                match self.symbol(SYM_OBJ_CALL) {
                    Some(Val::Prop(prop)) => self.invoke_prop(Val::Obj(id), prop, args),
                    _ => type_err(ErrCode::BadTypeCall, "object"),
                }
            }
            other => type_err(ErrCode::BadTypeCall, other.type_name()),
        }
    }

    /// Invoke a function body at a code offset inside a bounded sub-run:
    /// the current IP/EP are saved, the callee's frame carries the external
    /// sentinel, and the loop runs until that frame returns.
    pub fn invoke_ofs(&mut self, ofs: u32, args: &[Val]) -> VmResult<Val> {
        self.invoke_framed(ofs, args, Val::Nil, Val::Nil, Val::Nil, Val::Nil, Val::FnPtr(ofs))
    }

    /// Property invocation from native code, with full method context.
    pub fn invoke_prop(&mut self, receiver: Val, prop: PropId, args: &[Val]) -> VmResult<Val> {
        let id = match receiver {
            Val::Obj(id) => id,
            other => return type_err(ErrCode::BadTypeCall, other.type_name()),
        };
        match resolve_prop(&self.heap, &self.registry, id, prop, false) {
            Resolved::NotFound => Ok(Val::Nil),
            Resolved::Native { holder: _, method } => method(self, id, args),
            Resolved::Data { holder, val } => match val {
                Val::CodeOfs(ofs) => self.invoke_framed(
                    ofs,
                    args,
                    Val::Prop(prop),
                    Val::Obj(id),
                    Val::Obj(holder),
                    Val::Obj(id),
                    Val::CodeOfs(ofs),
                ),
                Val::DStr(sofs) => {
                    self.say_val(Val::Str(sofs))?;
                    Ok(Val::Nil)
                }
                plain => Ok(plain),
            },
        }
    }

    fn invoke_framed(
        &mut self,
        ofs: u32,
        args: &[Val],
        target_prop: Val,
        target_obj: Val,
        defining: Val,
        self_obj: Val,
        invokee: Val,
    ) -> VmResult<Val> {
        let saved_ip = self.ip;
        let saved_ep = self.ep;
        let saved_stop = self.stop;
        let base_sp = self.stack.sp();

        for a in args.iter().rev() {
            self.stack.push(*a)?;
        }
        self.ip = SENTINEL_OFS;
        self.ep = SENTINEL_OFS;
        if let Err(fault) = self.call_func(ofs, args.len(), target_prop, target_obj, defining, self_obj, invokee) {
            self.stack.truncate(base_sp);
            self.ip = saved_ip;
            self.ep = saved_ep;
            return Err(fault);
        }
        self.stop = false;
        let outcome = self.run_loop();
        self.ip = saved_ip;
        self.ep = saved_ep;
        self.stop = saved_stop;
        outcome?;
        Ok(self.r0)
    }

    pub(crate) fn builtin_fn(&self, set: u16, index: u16) -> VmResult<Builtin> {
        self.builtins
            .get(set as usize)
            .and_then(|s| s.funcs.get(index as usize))
            .copied()
            .ok_or_else(|| Fault::fatal(format!("unknown builtin {set}:{index}")))
    }

    /// Install (or clear) the say hook; all text output is routed through
    /// it once installed.
    pub fn install_say(&mut self, hook: Option<Val>) {
        self.say_hook = hook;
    }

    pub fn say_hook(&self) -> Option<Val> {
        self.say_hook
    }

    /// Route text to the say hook, or to the default sink when none is
    /// installed.
    pub fn say_text(&mut self, text: &str) -> VmResult<()> {
        match self.say_hook {
            Some(hook) => {
                let arg = self.new_string(text)?;
                self.invoke(hook, &[arg])?;
                Ok(())
            }
            None => {
                self.out
                    .write_all(text.as_bytes())
                    .map_err(|e| Fault::fatal(format!("output write failed: {e}")))?;
                Ok(())
            }
        }
    }

    /// Convert a value to text and route it to output. This is the common
    /// path for literal dstrings, SAYVAL conversions, and double-quoted
    /// property results.
    pub fn say_val(&mut self, v: Val) -> VmResult<()> {
        let text = self.val_to_text(v)?;
        self.say_text(&text)
    }

    pub fn val_to_text(&mut self, v: Val) -> VmResult<String> {
        match v {
            Val::Int(n) => Ok(itoa::Buffer::new().format(n).to_string()),
            Val::Str(ofs) | Val::DStr(ofs) => {
                let s = self.data()?.read_str(ofs)?;
                Ok(s)
            }
            Val::Obj(id) => {
                let kind = self.obj(id)?.kind;
                let meta = self
                    .registry
                    .meta(kind)
                    .ok_or_else(|| Fault::fatal("unregistered kind"))?;
                meta.to_text(self, id)
            }
            other => type_err(ErrCode::BadTypeSay, other.type_name()),
        }
    }

    /// Make a dynamic string object carrying `text`. Requires a registered
    /// string kind; the string metaclass stores its characters in
    /// `Payload::Str` by convention.
    pub fn new_string(&mut self, text: &str) -> VmResult<Val> {
        let kind = self
            .registry
            .string_kind()
            .ok_or_else(|| Fault::fatal("no string metaclass registered"))?;
        let obj = HeapObject::new(kind).with_payload(Payload::Str(text.to_string()));
        Ok(Val::Obj(self.heap.alloc(obj)))
    }

    /// Make a dynamic list object from element values.
    pub fn new_list(&mut self, vals: Vec<Val>) -> VmResult<Val> {
        let kind = self
            .registry
            .list_kind()
            .ok_or_else(|| Fault::fatal("no list metaclass registered"))?;
        let obj = HeapObject::new(kind).with_payload(Payload::Vals(vals));
        Ok(Val::Obj(self.heap.alloc(obj)))
    }

    pub(crate) fn obj(&self, id: ObjId) -> VmResult<&HeapObject> {
        self.heap
            .get(id)
            .ok_or_else(|| Fault::Runtime(ErrCode::ObjNotFound, format!("object {id}")))
    }

    pub(crate) fn rt_err_class(&self) -> Option<ObjId> {
        self.rt_err_class
    }

    pub(crate) fn exc_msg_prop(&self) -> Option<PropId> {
        self.exc_msg_prop
    }

    /// Turn an escaped fault into a host-level error for `run` callers.
    pub(crate) fn fault_to_host(&mut self, fault: Fault) -> anyhow::Error {
        match fault {
            Fault::Fatal(e) => e,
            Fault::Runtime(code, msg) => anyhow!("unhandled VM error: {msg} ({code:?})"),
            Fault::Throw(obj) => {
                let msg_val = self
                    .exc_msg_prop()
                    .and_then(|prop| self.heap.get(obj).and_then(|o| o.props.get(&prop).copied()));
                let detail = msg_val.and_then(|v| self.val_to_text(v).ok());
                match detail {
                    Some(msg) => anyhow!("unhandled exception: {msg}"),
                    None => anyhow!("unhandled exception (object {obj})"),
                }
            }
        }
    }
}
