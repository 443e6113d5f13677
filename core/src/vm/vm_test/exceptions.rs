use super::*;
use crate::vm::opcode as op;

const EXC_CLASS: u32 = 50;
const EXC_OBJ: u32 = 51;
const MSG_PROP: u16 = 200;

fn with_exc_objects(b: &mut ImageBuilder) -> u16 {
    let mc = b.metaclass("object", &[]);
    b.object(mc, EXC_CLASS, ImageBuilder::plain_object_payload(&[], &[], true));
    b.object(mc, EXC_OBJ, ImageBuilder::plain_object_payload(&[EXC_CLASS as u32], &[], false));
    mc
}

#[test]
fn test_throw_caught_in_same_frame() {
    let mut b = ImageBuilder::new();
    with_exc_objects(&mut b);

    let mut w = CodeWriter::new();
    let try_start = w.pos();
    w.op(op::PUSHOBJ).u32(EXC_OBJ);
    w.op(op::THROW);
    let try_end = w.pos();
    w.op(op::RETNIL); // skipped
    let handler = w.pos();
    // The router pushed the exception object.
    w.op(op::RETVAL);
    let entry = b.code(&function(
        0,
        0,
        0,
        w,
        &[(try_start as u16, try_end as u16, EXC_CLASS, handler as u16)],
    ));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Obj(EXC_OBJ));
}

#[test]
fn test_uncaught_throw_reports_unhandled_exception() {
    let mut b = ImageBuilder::new();
    with_exc_objects(&mut b);

    let mut w = CodeWriter::new();
    w.op(op::PUSHOBJ).u32(EXC_OBJ);
    w.op(op::THROW);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert!(run_err(&b).contains("unhandled exception"));
}

#[test]
fn test_class_mismatch_keeps_unwinding() {
    let mut b = ImageBuilder::new();
    let mc = with_exc_objects(&mut b);
    // An unrelated class; the thrown object does not derive from it.
    b.object(mc, 70, ImageBuilder::plain_object_payload(&[], &[], true));

    let mut w = CodeWriter::new();
    let try_start = w.pos();
    w.op(op::PUSHOBJ).u32(EXC_OBJ);
    w.op(op::THROW);
    let try_end = w.pos();
    w.op(op::RETNIL);
    let handler = w.pos();
    w.op(op::RETTRUE);
    let entry = b.code(&function(
        0,
        0,
        0,
        w,
        &[(try_start as u16, try_end as u16, 70, handler as u16)],
    ));
    b.entry(entry);
    assert!(run_err(&b).contains("unhandled exception"));
}

#[test]
fn test_throw_unwinds_through_callee_frames() {
    let mut b = ImageBuilder::new();
    with_exc_objects(&mut b);

    // thrower() throws; no handler of its own.
    let mut t = CodeWriter::new();
    t.op(op::PUSHOBJ).u32(EXC_OBJ);
    t.op(op::THROW);
    let thrower = b.code(&function(0, 0, 0, t, &[]));

    // middle() just calls through.
    let mut m = CodeWriter::new();
    m.op(op::CALL).u8(0).u32(thrower);
    m.op(op::RETNIL);
    let middle = b.code(&function(0, 0, 0, m, &[]));

    // entry() protects the call and checks its local survived unwinding.
    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(99);
    w.op(op::SETLCL1).u8(0);
    let try_start = w.pos();
    w.op(op::CALL).u8(0).u32(middle);
    let try_end = w.pos();
    w.op(op::RETNIL);
    let handler = w.pos();
    w.op(op::DISC); // drop the exception object
    w.op(op::GETLCL1).u8(0);
    w.op(op::RETVAL);
    let entry = b.code(&function(
        0,
        0,
        1,
        w,
        &[(try_start as u16, try_end as u16, EXC_CLASS, handler as u16)],
    ));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(99));
}

#[test]
fn test_runtime_error_materializes_as_declared_class() {
    let mut b = ImageBuilder::new();
    with_exc_objects(&mut b);
    b.symbol("RuntimeError", Val::Obj(EXC_CLASS as u32));
    b.symbol("exceptionMessage", Val::Prop(MSG_PROP));

    let mut w = CodeWriter::new();
    let try_start = w.pos();
    w.op(op::PUSH_1);
    w.op(op::PUSHNIL);
    w.op(op::ADD); // type error: int + nil
    let try_end = w.pos();
    w.op(op::RETNIL);
    let handler = w.pos();
    w.op(op::RETVAL);
    let entry = b.code(&function(
        0,
        0,
        0,
        w,
        &[(try_start as u16, try_end as u16, EXC_CLASS, handler as u16)],
    ));
    b.entry(entry);

    let mut vm = loaded(&b);
    let r = vm.run().unwrap();
    let Val::Obj(id) = r else { panic!("exception object expected, got {r:?}") };
    // A fresh instance of the declared error class, not a static object.
    assert!(id > EXC_OBJ);
    assert_eq!(vm.heap.get(id).unwrap().supers, vec![EXC_CLASS as u32]);
}

#[test]
fn test_division_by_zero_is_catchable_when_class_declared() {
    let mut b = ImageBuilder::new();
    with_exc_objects(&mut b);
    b.symbol("RuntimeError", Val::Obj(EXC_CLASS as u32));

    let mut w = CodeWriter::new();
    let try_start = w.pos();
    w.op(op::PUSH_1);
    w.op(op::PUSH_0);
    w.op(op::DIV);
    let try_end = w.pos();
    w.op(op::RETNIL);
    let handler = w.pos();
    w.op(op::DISC);
    w.op(op::PUSHINT8).i8(-1);
    w.op(op::RETVAL);
    let entry = b.code(&function(
        0,
        0,
        0,
        w,
        &[(try_start as u16, try_end as u16, EXC_CLASS, handler as u16)],
    ));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(-1));
}

#[test]
fn test_finally_runs_once_then_reraises() {
    let mut b = ImageBuilder::new();
    let mc = with_exc_objects(&mut b);
    // Sink object recording that the finally body executed.
    b.object(mc, 60, ImageBuilder::plain_object_payload(&[], &[(210, Val::Int(0))], false));

    // inner(): throws inside a range protected by a catch-all (finally)
    // record. The handler body records the side effect and rethrows.
    let mut f = CodeWriter::new();
    let try_start = f.pos();
    f.op(op::PUSHOBJ).u32(EXC_OBJ);
    f.op(op::THROW);
    let try_end = f.pos();
    f.op(op::RETNIL);
    let fin = f.pos();
    // exception object is on the stack; bump the counter, then rethrow.
    f.op(op::OBJGETPROP).u32(60).u16(210);
    f.op(op::GETR0);
    f.op(op::PUSH_1);
    f.op(op::ADD);
    f.op(op::OBJSETPROP).u32(60).u16(210);
    f.op(op::THROW);
    let inner = b.code(&function(
        0,
        0,
        0,
        f,
        &[(try_start as u16, try_end as u16, 0, fin as u16)],
    ));

    // entry(): catches the rethrown exception.
    let mut w = CodeWriter::new();
    let e_start = w.pos();
    w.op(op::CALL).u8(0).u32(inner);
    let e_end = w.pos();
    w.op(op::RETNIL);
    let handler = w.pos();
    w.op(op::RETVAL);
    let entry = b.code(&function(
        0,
        0,
        0,
        w,
        &[(e_start as u16, e_end as u16, EXC_CLASS, handler as u16)],
    ));
    b.entry(entry);

    let mut vm = loaded(&b);
    assert_eq!(vm.run().unwrap(), Val::Obj(EXC_OBJ));
    // The finally body ran exactly once.
    assert_eq!(vm.heap.get(60).unwrap().props.get(&210), Some(&Val::Int(1)));
}

#[test]
fn test_handler_match_is_filtered_by_ip_range() {
    let mut b = ImageBuilder::new();
    with_exc_objects(&mut b);

    // The record's range covers only the first throw site. A throw from
    // the handler itself falls outside it and escapes.
    let mut w = CodeWriter::new();
    let try_start = w.pos();
    w.op(op::PUSHOBJ).u32(EXC_OBJ);
    w.op(op::THROW);
    let try_end = w.pos();
    w.op(op::RETNIL);
    let handler = w.pos();
    w.op(op::THROW); // rethrow the routed exception object
    let entry = b.code(&function(
        0,
        0,
        0,
        w,
        &[(try_start as u16, try_end as u16, EXC_CLASS, handler as u16)],
    ));
    b.entry(entry);
    assert!(run_err(&b).contains("unhandled exception"));
}
