//! Byte-level image assembly, used by the test suites and host tooling to
//! lay out well-formed images. This is not a compiler: callers supply raw
//! bytecode; the builder only arranges blocks, pools, and records.

use crate::img::block::{
    BLOCK_FLAG_MANDATORY, TAG_CPDF, TAG_CPPG, TAG_ENTP, TAG_EOF, TAG_MCLD, TAG_OBJS, TAG_SYMD,
};
use crate::img::pool::{POOL_CODE, POOL_DATA};
use crate::img::{IMAGE_MAGIC, IMAGE_VERSION};
use crate::img::{EXC_ENTRY_SIZE, METHOD_HEADER_SIZE};
use crate::val::{ObjId, PropId, Val};

const OBJS_FLAG_TRANSIENT: u16 = 0x0002;

/// Incrementally assembles an image file.
pub struct ImageBuilder {
    page_size: u32,
    code_mask: u8,
    data_mask: u8,
    code: Vec<u8>,
    data: Vec<u8>,
    entry_ofs: u32,
    deps: Vec<(String, Vec<PropId>)>,
    objects: Vec<(u16, ObjId, bool, Vec<u8>)>,
    symbols: Vec<(String, Val)>,
    extra_blocks: Vec<([u8; 4], bool, Vec<u8>)>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            page_size: 256,
            code_mask: 0,
            data_mask: 0,
            code: Vec::new(),
            data: Vec::new(),
            entry_ofs: 0,
            deps: Vec::new(),
            objects: Vec::new(),
            symbols: Vec::new(),
            extra_blocks: Vec::new(),
        }
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// XOR masks applied to every code / data page.
    pub fn masks(mut self, code: u8, data: u8) -> Self {
        self.code_mask = code;
        self.data_mask = data;
        self
    }

    pub fn entry(&mut self, ofs: u32) {
        self.entry_ofs = ofs;
    }

    /// Append bytes to the code pool; returns their offset.
    pub fn code(&mut self, bytes: &[u8]) -> u32 {
        let ofs = self.code.len() as u32;
        self.code.extend_from_slice(bytes);
        ofs
    }

    /// Append raw bytes to the data pool; returns their offset.
    pub fn data(&mut self, bytes: &[u8]) -> u32 {
        let ofs = self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        ofs
    }

    /// Intern a string constant in the data pool.
    pub fn str_const(&mut self, s: &str) -> u32 {
        let mut bytes = Vec::with_capacity(2 + s.len());
        bytes.extend_from_slice(&(s.len() as u16).to_le_bytes());
        bytes.extend_from_slice(s.as_bytes());
        self.data(&bytes)
    }

    /// Intern a list constant in the data pool.
    pub fn list_const(&mut self, vals: &[Val]) -> u32 {
        let mut bytes = Vec::with_capacity(2 + vals.len() * 5);
        bytes.extend_from_slice(&(vals.len() as u16).to_le_bytes());
        for v in vals {
            bytes.extend_from_slice(&v.to_dataholder());
        }
        self.data(&bytes)
    }

    /// Declare a metaclass dependency; returns its index for object blocks.
    pub fn metaclass(&mut self, name: &str, props: &[PropId]) -> u16 {
        self.deps.push((name.to_string(), props.to_vec()));
        (self.deps.len() - 1) as u16
    }

    pub fn object(&mut self, mc_index: u16, id: ObjId, payload: Vec<u8>) {
        self.objects.push((mc_index, id, false, payload));
    }

    pub fn transient_object(&mut self, mc_index: u16, id: ObjId, payload: Vec<u8>) {
        self.objects.push((mc_index, id, true, payload));
    }

    /// Payload for the core `object` kind: supers, properties, class flag.
    pub fn plain_object_payload(supers: &[ObjId], props: &[(PropId, Val)], is_class: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(supers.len() as u16).to_le_bytes());
        out.extend_from_slice(&(props.len() as u16).to_le_bytes());
        out.extend_from_slice(&(if is_class { 1u16 } else { 0 }).to_le_bytes());
        for s in supers {
            out.extend_from_slice(&s.to_le_bytes());
        }
        for (p, v) in props {
            out.extend_from_slice(&p.to_le_bytes());
            out.extend_from_slice(&v.to_dataholder());
        }
        out
    }

    pub fn symbol(&mut self, name: &str, val: Val) {
        self.symbols.push((name.to_string(), val));
    }

    /// Arbitrary extra block, for exercising the unknown-block paths.
    pub fn raw_block(&mut self, tag: [u8; 4], mandatory: bool, payload: Vec<u8>) {
        self.extra_blocks.push((tag, mandatory, payload));
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&IMAGE_MAGIC);
        out.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        out.extend_from_slice(&[0u8; 6]);

        // ENTP
        let mut entp = Vec::new();
        entp.extend_from_slice(&self.entry_ofs.to_le_bytes());
        entp.extend_from_slice(&METHOD_HEADER_SIZE.to_le_bytes());
        entp.extend_from_slice(&EXC_ENTRY_SIZE.to_le_bytes());
        push_block(&mut out, TAG_ENTP, true, &entp);

        // MCLD
        if !self.deps.is_empty() {
            let mut mcld = Vec::new();
            mcld.extend_from_slice(&(self.deps.len() as u16).to_le_bytes());
            for (name, props) in &self.deps {
                mcld.extend_from_slice(&(name.len() as u16).to_le_bytes());
                mcld.extend_from_slice(name.as_bytes());
                mcld.extend_from_slice(&(props.len() as u16).to_le_bytes());
                for p in props {
                    mcld.extend_from_slice(&p.to_le_bytes());
                }
            }
            push_block(&mut out, TAG_MCLD, true, &mcld);
        }

        self.push_pool(&mut out, POOL_CODE, &self.code, self.code_mask);
        self.push_pool(&mut out, POOL_DATA, &self.data, self.data_mask);

        // One OBJS block per (metaclass, transient) grouping, preserving
        // declaration order within each block.
        let mut emitted = vec![false; self.objects.len()];
        for i in 0..self.objects.len() {
            if emitted[i] {
                continue;
            }
            let (mc, _, transient, _) = self.objects[i];
            let group: Vec<usize> = (i..self.objects.len())
                .filter(|&j| self.objects[j].0 == mc && self.objects[j].2 == transient)
                .collect();
            let mut objs = Vec::new();
            objs.extend_from_slice(&(group.len() as u16).to_le_bytes());
            objs.extend_from_slice(&mc.to_le_bytes());
            let flags = if transient { OBJS_FLAG_TRANSIENT } else { 0 };
            objs.extend_from_slice(&flags.to_le_bytes());
            for &j in &group {
                emitted[j] = true;
                let (_, id, _, ref payload) = self.objects[j];
                objs.extend_from_slice(&id.to_le_bytes());
                objs.extend_from_slice(&(payload.len() as u16).to_le_bytes());
                objs.extend_from_slice(payload);
            }
            push_block(&mut out, TAG_OBJS, true, &objs);
        }

        // SYMD
        if !self.symbols.is_empty() {
            let mut symd = Vec::new();
            symd.extend_from_slice(&(self.symbols.len() as u16).to_le_bytes());
            for (name, val) in &self.symbols {
                symd.extend_from_slice(&val.to_dataholder());
                symd.push(name.len() as u8);
                symd.extend_from_slice(name.as_bytes());
            }
            push_block(&mut out, TAG_SYMD, false, &symd);
        }

        for (tag, mandatory, payload) in &self.extra_blocks {
            push_block(&mut out, *tag, *mandatory, payload);
        }

        push_block(&mut out, TAG_EOF, true, &[]);
        out
    }

    fn push_pool(&self, out: &mut Vec<u8>, pool_id: u16, bytes: &[u8], mask: u8) {
        let page_size = self.page_size as usize;
        let page_count = bytes.len().div_ceil(page_size).max(1) as u32;

        let mut cpdf = Vec::new();
        cpdf.extend_from_slice(&pool_id.to_le_bytes());
        cpdf.extend_from_slice(&page_count.to_le_bytes());
        cpdf.extend_from_slice(&(self.page_size).to_le_bytes());
        push_block(out, TAG_CPDF, true, &cpdf);

        for (index, chunk) in bytes
            .chunks(page_size)
            .chain(std::iter::repeat(&[] as &[u8]).take(usize::from(bytes.is_empty())))
            .enumerate()
        {
            let mut cppg = Vec::new();
            cppg.extend_from_slice(&pool_id.to_le_bytes());
            cppg.extend_from_slice(&(index as u32).to_le_bytes());
            cppg.push(mask);
            cppg.extend(chunk.iter().map(|b| b ^ mask));
            push_block(out, TAG_CPPG, true, &cppg);
        }
    }
}

fn push_block(out: &mut Vec<u8>, tag: [u8; 4], mandatory: bool, payload: &[u8]) {
    out.extend_from_slice(&tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    let flags = if mandatory { BLOCK_FLAG_MANDATORY } else { 0 };
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(payload);
}

/// Emits bytecode for one or more functions into a flat buffer destined for
/// the code pool.
pub struct CodeWriter {
    buf: Vec<u8>,
}

impl Default for CodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn pos(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Standard method header. `exc_ofs` is method-relative; 0 means no
    /// exception table.
    pub fn func_header(&mut self, params: u8, opt_params: u8, locals: u16, stack: u16, exc_ofs: u16) -> u32 {
        let start = self.pos();
        self.buf.push(params);
        self.buf.push(opt_params);
        self.buf.extend_from_slice(&locals.to_le_bytes());
        self.buf.extend_from_slice(&stack.to_le_bytes());
        self.buf.extend_from_slice(&exc_ofs.to_le_bytes());
        self.buf.extend_from_slice(&0u16.to_le_bytes());
        start
    }

    pub fn op(&mut self, op: u8) -> &mut Self {
        self.buf.push(op);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn i8(&mut self, v: i8) -> &mut Self {
        self.buf.push(v as u8);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn dataholder(&mut self, v: Val) -> &mut Self {
        self.buf.extend_from_slice(&v.to_dataholder());
        self
    }

    /// Emit a branch displacement operand targeting `target`. Displacements
    /// are relative to the first byte of the operand itself.
    pub fn branch_to(&mut self, target: u32) -> &mut Self {
        let rel = target as i64 - self.pos() as i64;
        self.i16(rel as i16)
    }

    /// Reserve a branch operand, returning its position for `patch_branch`.
    pub fn branch_placeholder(&mut self) -> u32 {
        let at = self.pos();
        self.i16(0);
        at
    }

    pub fn patch_branch(&mut self, at: u32, target: u32) {
        let rel = (target as i64 - at as i64) as i16;
        self.buf[at as usize..at as usize + 2].copy_from_slice(&rel.to_le_bytes());
    }

    /// Exception table record, offsets method-relative.
    pub fn exc_record(&mut self, start: u16, end: u16, class: u32, handler: u16) -> &mut Self {
        self.buf.extend_from_slice(&start.to_le_bytes());
        self.buf.extend_from_slice(&end.to_le_bytes());
        self.buf.extend_from_slice(&class.to_le_bytes());
        self.buf.extend_from_slice(&handler.to_le_bytes());
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
