use super::*;
use crate::vm::opcode as op;

#[test]
fn test_add_two_constants_end_to_end() {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(1);
    w.op(op::PUSHINT8).i8(2);
    w.op(op::ADD);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(3));
}

#[test]
fn test_call_passes_args_in_declaration_order() {
    let mut b = ImageBuilder::new();

    // sub(a, b) = a - b
    let mut f = CodeWriter::new();
    f.op(op::GETARG1).u8(0);
    f.op(op::GETARG1).u8(1);
    f.op(op::SUB);
    f.op(op::RETVAL);
    let sub = b.code(&function(2, 0, 0, f, &[]));

    // Arguments are pushed right to left: b first, then a.
    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(7); // b
    w.op(op::PUSHINT8).i8(5); // a
    w.op(op::CALL).u8(2).u32(sub);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(-2));
}

#[test]
fn test_call_preserves_caller_frame() {
    let mut b = ImageBuilder::new();

    let mut f = CodeWriter::new();
    f.op(op::GETARG1).u8(0);
    f.op(op::PUSHINT8).i8(100);
    f.op(op::ADD);
    f.op(op::RETVAL);
    let callee = b.code(&function(1, 0, 0, f, &[]));

    // Caller's local and pushed operand must survive the call.
    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(42);
    w.op(op::SETLCL1).u8(0);
    w.op(op::PUSHINT8).i8(1); // operand left across the call
    w.op(op::PUSHINT8).i8(2);
    w.op(op::CALL).u8(1).u32(callee);
    w.op(op::GETR0); // 102
    w.op(op::ADD); // + the 1 parked below the frame
    w.op(op::GETLCL1).u8(0);
    w.op(op::ADD);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 1, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(145));
}

#[test]
fn test_recursive_factorial() {
    let mut b = ImageBuilder::new();

    let mut f = CodeWriter::new();
    // Self-referencing call target: the function starts where the next
    // b.code() lands. Compute it from the current code-pool length.
    let fact_start = {
        // header precedes the body
        // (the function bytes are appended at the current pool top)
        b.code(&[]) // returns current offset without adding bytes
    };
    f.op(op::GETARG1).u8(0);
    f.op(op::PUSHINT8).i8(1);
    f.op(op::LE);
    let to_rec = {
        f.op(op::JF);
        f.branch_placeholder()
    };
    f.op(op::PUSHINT8).i8(1);
    f.op(op::RETVAL);
    let rec = f.pos();
    f.patch_branch(to_rec, rec);
    f.op(op::GETARG1).u8(0);
    f.op(op::GETARG1).u8(0);
    f.op(op::PUSHINT8).i8(1);
    f.op(op::SUB);
    f.op(op::CALL).u8(1).u32(fact_start);
    f.op(op::GETR0);
    f.op(op::MUL);
    f.op(op::RETVAL);
    let fact = b.code(&function(1, 0, 0, f, &[]));
    assert_eq!(fact, fact_start);

    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(5);
    w.op(op::CALL).u8(1).u32(fact);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(120));
}

#[test]
fn test_arity_mismatch_is_an_error() {
    let mut b = ImageBuilder::new();
    let mut f = CodeWriter::new();
    f.op(op::RETNIL);
    let callee = b.code(&function(2, 0, 0, f, &[]));

    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(1);
    w.op(op::CALL).u8(1).u32(callee);
    w.op(op::RETNIL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert!(run_err(&b).contains("wrong number of arguments"));
}

#[test]
fn test_optional_params_accept_a_range() {
    let mut b = ImageBuilder::new();
    let mut f = CodeWriter::new();
    f.op(op::GETARGC);
    f.op(op::RETVAL);
    let callee = b.code(&function(1, 1, 0, f, &[]));

    // Two arguments: within 1..=2, accepted.
    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(9);
    w.op(op::PUSHINT8).i8(8);
    w.op(op::CALL).u8(2).u32(callee);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(2));

    // Three arguments: too many.
    let mut b2 = ImageBuilder::new();
    let mut f2 = CodeWriter::new();
    f2.op(op::GETARGC);
    f2.op(op::RETVAL);
    let callee2 = b2.code(&function(1, 1, 0, f2, &[]));
    let mut w2 = CodeWriter::new();
    for _ in 0..3 {
        w2.op(op::PUSH_0);
    }
    w2.op(op::CALL).u8(3).u32(callee2);
    w2.op(op::RETNIL);
    let entry2 = b2.code(&function(0, 0, 0, w2, &[]));
    b2.entry(entry2);
    assert!(run_err(&b2).contains("wrong number of arguments"));
}

#[test]
fn test_varargc_overrides_exactly_one_call() {
    let mut b = ImageBuilder::new();

    // Varargs: one required parameter, any extras allowed.
    let mut f = CodeWriter::new();
    f.op(op::GETARGC);
    f.op(op::RETVAL);
    let counter = b.code(&function(0x80 | 1, 0, 0, f, &[]));

    let mut w = CodeWriter::new();
    // First call: three args on the stack, declared argc 0, overridden to 3.
    w.op(op::PUSH_0);
    w.op(op::PUSH_0);
    w.op(op::PUSH_0);
    w.op(op::PUSHINT8).i8(3);
    w.op(op::VARARGC);
    w.op(op::CALL).u8(0).u32(counter);
    w.op(op::GETR0);
    w.op(op::SETLCL1).u8(0);
    // Second call: the override must not persist.
    w.op(op::PUSH_1);
    w.op(op::CALL).u8(1).u32(counter);
    w.op(op::GETLCL1).u8(0);
    w.op(op::PUSHINT8).i8(10);
    w.op(op::MUL);
    w.op(op::GETR0);
    w.op(op::ADD);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 1, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(31));
}

#[test]
fn test_ptrcall_through_function_pointer() {
    let mut b = ImageBuilder::new();
    let mut f = CodeWriter::new();
    f.op(op::GETARG1).u8(0);
    f.op(op::PUSHINT8).i8(1);
    f.op(op::ADD);
    f.op(op::RETVAL);
    let inc = b.code(&function(1, 0, 0, f, &[]));

    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(41);
    w.op(op::PUSHFNPTR).u32(inc);
    w.op(op::PTRCALL).u8(1);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(42));
}

#[test]
fn test_builtin_call_reaches_registered_set() {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(1); // second argument
    w.op(op::PUSHINT8).i8(20); // first argument
    w.op(op::BUILTIN_A).u8(2).u8(0);
    w.op(op::GETR0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);

    let mut vm = Vm::new();
    vm.add_builtin_set(crate::vm::BuiltinSet {
        name: "test",
        funcs: vec![|_vm, args| {
            let (Val::Int(a), Val::Int(b)) = (args[0], args[1]) else {
                panic!("int args expected");
            };
            Ok(Val::Int(a * 2 + b))
        }],
    });
    vm.load(&b.build()).unwrap();
    assert_eq!(vm.run().unwrap(), Val::Int(41));
}

#[test]
fn test_host_invoke_runs_to_completion() {
    let mut b = ImageBuilder::new();
    let mut f = CodeWriter::new();
    f.op(op::GETARG1).u8(0);
    f.op(op::GETARG1).u8(1);
    f.op(op::MUL);
    f.op(op::RETVAL);
    let mul = b.code(&function(2, 0, 0, f, &[]));

    let mut w = CodeWriter::new();
    w.op(op::RETNIL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    b.symbol("mul", Val::FnPtr(mul));

    let mut vm = loaded(&b);
    let target = vm.symbol("mul").unwrap();
    let r = vm.invoke(target, &[Val::Int(6), Val::Int(7)]).unwrap();
    assert_eq!(r, Val::Int(42));
    // The stack is back to empty; a second invocation behaves identically.
    let r = vm.invoke(target, &[Val::Int(3), Val::Int(3)]).unwrap();
    assert_eq!(r, Val::Int(9));
}
