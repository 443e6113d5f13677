//! Engine tests running real images assembled with the image builder.

mod calls;
mod control_flow;
mod dispatch;
mod exceptions;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::img::METHOD_HEADER_SIZE;
use crate::img::build::{CodeWriter, ImageBuilder};
use crate::val::Val;
use crate::vm::Vm;

/// Assemble one function: header, body, and an optional exception table.
/// The body writer's offsets and the `records` tuples (start, end, class,
/// handler) are body-relative; the header size is added here.
fn function(params: u8, opt: u8, locals: u16, body: CodeWriter, records: &[(u16, u16, u32, u16)]) -> Vec<u8> {
    let body = body.into_bytes();
    let hdr = METHOD_HEADER_SIZE;
    let exc_ofs = if records.is_empty() {
        0
    } else {
        hdr + body.len() as u16
    };
    let mut w = CodeWriter::new();
    w.func_header(params, opt, locals, 64, exc_ofs);
    let mut bytes = w.into_bytes();
    bytes.extend_from_slice(&body);
    if !records.is_empty() {
        let mut t = CodeWriter::new();
        t.u16(records.len() as u16);
        for &(start, end, class, handler) in records {
            t.exc_record(start + hdr, end + hdr, class, handler + hdr);
        }
        bytes.extend(t.into_bytes());
    }
    bytes
}

fn loaded(b: &ImageBuilder) -> Vm {
    let mut vm = Vm::new();
    vm.load(&b.build()).expect("image loads");
    vm
}

fn run_ok(b: &ImageBuilder) -> Val {
    loaded(b).run().expect("run succeeds")
}

fn run_err(b: &ImageBuilder) -> String {
    loaded(b).run().expect_err("run fails").to_string()
}

/// Cloneable output sink, for asserting on text the VM emits.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}
