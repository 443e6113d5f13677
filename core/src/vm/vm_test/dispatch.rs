use std::sync::Arc;

use anyhow::Result;

use super::*;
use crate::err::VmResult;
use crate::heap::{HeapObject, Metaclass, Payload};
use crate::val::{KindId, ObjId};
use crate::vm::opcode as op;

const PROP: u16 = 100;

fn with_objects(b: &mut ImageBuilder) -> u16 {
    b.metaclass("object", &[])
}

#[test]
fn test_objgetprop_tie_break_prefers_later_parent() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);
    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[(PROP, Val::Int(10))], true));
    b.object(mc, 11, ImageBuilder::plain_object_payload(&[], &[(PROP, Val::Int(20))], true));
    b.object(mc, 12, ImageBuilder::plain_object_payload(&[10, 11], &[], false));

    let mut w = CodeWriter::new();
    w.op(op::OBJGETPROP).u32(12).u16(PROP);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(20));
}

#[test]
fn test_method_dispatch_binds_self() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);

    let mut m = CodeWriter::new();
    m.op(op::PUSHSELF);
    m.op(op::RETVAL);
    let method = b.code(&function(0, 0, 0, m, &[]));

    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[(PROP, Val::CodeOfs(method))], true));
    b.object(mc, 12, ImageBuilder::plain_object_payload(&[10], &[], false));

    let mut w = CodeWriter::new();
    w.op(op::OBJCALLPROP).u8(0).u32(12).u16(PROP);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    // The method lives on the class, but self is the instance it was
    // invoked on.
    assert_eq!(run_ok(&b), Val::Obj(12));
}

#[test]
fn test_inherit_resolves_past_defining_object() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);

    let mut base = CodeWriter::new();
    base.op(op::PUSHSELF);
    base.op(op::RETVAL);
    let base_m = b.code(&function(0, 0, 0, base, &[]));

    let mut der = CodeWriter::new();
    der.op(op::INHERIT).u8(0).u16(PROP);
    der.op(op::GETR0);
    der.op(op::RETVAL);
    let der_m = b.code(&function(0, 0, 0, der, &[]));

    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[(PROP, Val::CodeOfs(base_m))], true));
    b.object(mc, 11, ImageBuilder::plain_object_payload(&[10], &[(PROP, Val::CodeOfs(der_m))], true));
    b.object(mc, 12, ImageBuilder::plain_object_payload(&[11], &[], false));

    let mut w = CodeWriter::new();
    w.op(op::OBJCALLPROP).u8(0).u32(12).u16(PROP);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    // The derived method runs, inherits to the base method, and the base
    // method still sees the original instance as self.
    assert_eq!(run_ok(&b), Val::Obj(12));
}

#[test]
fn test_inherit_with_data_property() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);

    let mut der = CodeWriter::new();
    der.op(op::INHERIT).u8(0).u16(PROP);
    der.op(op::GETR0);
    der.op(op::PUSH_1);
    der.op(op::ADD);
    der.op(op::RETVAL);
    let der_m = b.code(&function(0, 0, 0, der, &[]));

    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[(PROP, Val::Int(40))], true));
    b.object(mc, 11, ImageBuilder::plain_object_payload(&[10], &[(PROP, Val::CodeOfs(der_m))], true));
    b.object(mc, 12, ImageBuilder::plain_object_payload(&[11], &[], false));

    let mut w = CodeWriter::new();
    w.op(op::OBJCALLPROP).u8(0).u32(12).u16(PROP);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(41));
}

#[test]
fn test_undefined_property_evaluates_to_nil_but_call_fails() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);
    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[], false));

    let mut w = CodeWriter::new();
    w.op(op::OBJGETPROP).u32(10).u16(PROP);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Nil);

    let mut b2 = ImageBuilder::new();
    let mc2 = with_objects(&mut b2);
    b2.object(mc2, 10, ImageBuilder::plain_object_payload(&[], &[], false));
    let mut w2 = CodeWriter::new();
    w2.op(op::PUSH_0);
    w2.op(op::OBJCALLPROP).u8(1).u32(10).u16(PROP);
    w2.op(op::RETNIL);
    let entry2 = b2.code(&function(0, 0, 0, w2, &[]));
    b2.entry(entry2);
    assert!(run_err(&b2).contains("property not defined"));
}

#[test]
fn test_setprop_shadows_without_touching_the_class() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);
    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[(PROP, Val::Int(1))], true));
    b.object(mc, 12, ImageBuilder::plain_object_payload(&[10], &[], false));

    let mut w = CodeWriter::new();
    w.op(op::PUSHOBJ).u32(12);
    w.op(op::PUSHINT8).i8(77);
    w.op(op::SETPROP).u16(PROP);
    w.op(op::OBJGETPROP).u32(12).u16(PROP);
    w.op(op::GETR0);
    w.op(op::SETLCL1).u8(0);
    w.op(op::OBJGETPROP).u32(10).u16(PROP);
    w.op(op::GETLCL1).u8(0);
    w.op(op::GETR0);
    // instance value * 100 + class value
    w.op(op::SWAP);
    w.op(op::PUSHINT8).i8(100);
    w.op(op::MUL);
    w.op(op::ADD);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 1, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(7701));
}

#[test]
fn test_new_inherits_from_class_argument() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);
    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[(PROP, Val::Int(9))], true));

    let mut w = CodeWriter::new();
    w.op(op::PUSHOBJ).u32(10);
    w.op(op::NEW1).u8(1).u8(mc as u8);
    w.op(op::GETPROPR0).u16(PROP);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);

    let mut vm = loaded(&b);
    assert_eq!(vm.run().unwrap(), Val::Int(9));
    // Static ids end at 10, so the created instance is 11.
    let created = vm.heap.get(11).expect("created object");
    assert_eq!(created.supers, vec![10]);
    assert!(!created.transient);
}

#[test]
fn test_trnew_marks_the_object_transient() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);
    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[], true));

    let mut w = CodeWriter::new();
    w.op(op::TRNEW1).u8(0).u8(mc as u8);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);

    let mut vm = loaded(&b);
    let r = vm.run().unwrap();
    let Val::Obj(id) = r else { panic!("object expected, got {r:?}") };
    assert!(vm.heap.get(id).unwrap().transient);
}

#[test]
fn test_self_printing_string_property_writes_output() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);
    let text = b.str_const("You are in a maze.");
    b.object(mc, 10, ImageBuilder::plain_object_payload(&[], &[(PROP, Val::DStr(text))], false));

    let mut w = CodeWriter::new();
    w.op(op::OBJGETPROP).u32(10).u16(PROP);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);

    let out = SharedBuf::default();
    let mut vm = Vm::new();
    vm.set_output(Box::new(out.clone()));
    vm.load(&b.build()).unwrap();
    assert_eq!(vm.run().unwrap(), Val::Nil);
    assert_eq!(out.text(), "You are in a maze.");
}

#[test]
fn test_say_opcodes_convert_and_write() {
    let mut b = ImageBuilder::new();
    let s = b.str_const("count: ");
    let mut w = CodeWriter::new();
    w.op(op::SAY).u32(s);
    w.op(op::PUSHINT8).i8(-5);
    w.op(op::SAYVAL);
    w.op(op::RETNIL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);

    let out = SharedBuf::default();
    let mut vm = Vm::new();
    vm.set_output(Box::new(out.clone()));
    vm.load(&b.build()).unwrap();
    vm.run().unwrap();
    assert_eq!(out.text(), "count: -5");
}

// A minimal dynamic-string kind, enough for the say-hook path which wraps
// emitted text in a string object.
struct TestStringMeta;

impl Metaclass for TestStringMeta {
    fn name(&self) -> &'static str {
        "string"
    }

    fn load(&self, id: ObjId, transient: bool, payload: &[u8]) -> Result<HeapObject> {
        let mut o = HeapObject::new(0).with_payload(Payload::Str(String::from_utf8(payload.to_vec())?));
        o.id = id;
        o.transient = transient;
        Ok(o)
    }

    fn create(&self, vm: &mut Vm, kind: KindId, _args: &[Val]) -> VmResult<ObjId> {
        Ok(vm.heap.alloc(HeapObject::new(kind).with_payload(Payload::Str(String::new()))))
    }

    fn to_text(&self, vm: &mut Vm, obj: ObjId) -> VmResult<String> {
        match vm.heap.get(obj).map(|o| &o.payload) {
            Some(Payload::Str(s)) => Ok(s.clone()),
            _ => Ok(String::new()),
        }
    }
}

#[test]
fn test_installed_say_hook_receives_string_objects() {
    let mut b = ImageBuilder::new();
    let mc = with_objects(&mut b);
    b.object(mc, 60, ImageBuilder::plain_object_payload(&[], &[], false));

    // hook(text) { sink.stash = text; }
    let mut h = CodeWriter::new();
    h.op(op::GETARG1).u8(0);
    h.op(op::OBJSETPROP).u32(60).u16(210);
    h.op(op::RETNIL);
    let hook = b.code(&function(1, 0, 0, h, &[]));

    let s = b.str_const("ping");
    let mut w = CodeWriter::new();
    w.op(op::SAY).u32(s);
    w.op(op::RETNIL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);

    let mut vm = Vm::new();
    vm.registry.register(Arc::new(TestStringMeta));
    vm.load(&b.build()).unwrap();
    vm.install_say(Some(Val::FnPtr(hook)));
    vm.run().unwrap();

    let stash = vm.heap.get(60).unwrap().props.get(&210).copied();
    let Some(Val::Obj(id)) = stash else { panic!("hook did not run: {stash:?}") };
    assert_eq!(vm.heap.get(id).unwrap().payload, Payload::Str("ping".into()));
}
