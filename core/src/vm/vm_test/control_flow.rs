use super::*;
use crate::vm::opcode as op;

#[test]
fn test_conditional_loop_sums_a_range() {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    // local0 = acc, local1 = i
    w.op(op::ZEROLCL1).u8(0);
    w.op(op::ONELCL1).u8(1);
    let top = w.pos();
    w.op(op::GETLCL1).u8(1);
    w.op(op::PUSHINT8).i8(5);
    w.op(op::GT);
    w.op(op::JT);
    let to_end = w.branch_placeholder();
    w.op(op::GETLCL1).u8(0);
    w.op(op::GETLCL1).u8(1);
    w.op(op::ADD);
    w.op(op::SETLCL1).u8(0);
    w.op(op::INCLCL).u16(1);
    w.op(op::JMP);
    w.branch_to(top);
    let end = w.pos();
    w.patch_branch(to_end, end);
    w.op(op::GETLCL1).u8(0);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 2, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(15));
}

fn switch_image(scrutinee: i8) -> ImageBuilder {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    w.op(op::PUSHINT8).i8(scrutinee);
    w.op(op::SWITCH);
    w.u16(2);
    w.dataholder(Val::Int(1));
    let to_one = w.branch_placeholder();
    w.dataholder(Val::Int(2));
    let to_two = w.branch_placeholder();
    let to_default = w.branch_placeholder();
    let one = w.pos();
    w.op(op::PUSHINT8).i8(10);
    w.op(op::RETVAL);
    let two = w.pos();
    w.op(op::PUSHINT8).i8(20);
    w.op(op::RETVAL);
    let def = w.pos();
    w.op(op::PUSHINT8).i8(99);
    w.op(op::RETVAL);
    w.patch_branch(to_one, one);
    w.patch_branch(to_two, two);
    w.patch_branch(to_default, def);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    b
}

#[test]
fn test_switch_matches_in_order_with_default() {
    assert_eq!(run_ok(&switch_image(2)), Val::Int(20));
    assert_eq!(run_ok(&switch_image(1)), Val::Int(10));
    assert_eq!(run_ok(&switch_image(7)), Val::Int(99));
}

#[test]
fn test_jsr_and_lret_local_subroutine() {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    w.op(op::ZEROLCL1).u8(1);
    w.op(op::JSR);
    let to_sub = w.branch_placeholder();
    w.op(op::GETLCL1).u8(1);
    w.op(op::RETVAL);
    let sub = w.pos();
    w.patch_branch(to_sub, sub);
    w.op(op::SETLCL1).u8(0); // stash the return offset
    w.op(op::ONELCL1).u8(1);
    w.op(op::LRET).u16(0);
    let entry = b.code(&function(0, 0, 2, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(1));
}

#[test]
fn test_division_by_zero_without_error_class_is_fatal() {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    w.op(op::PUSH_1);
    w.op(op::PUSH_0);
    w.op(op::DIV);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert!(run_err(&b).contains("division by zero"));
}

#[test]
fn test_integer_overflow_is_reported() {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    w.op(op::PUSHINT).i32(i32::MAX);
    w.op(op::PUSH_1);
    w.op(op::ADD);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert!(run_err(&b).contains("integer overflow"));
}

#[test]
fn test_string_constants_compare_by_content() {
    let mut b = ImageBuilder::new();
    let s1 = b.str_const("portcullis");
    let s2 = b.str_const("portcullis");
    assert_ne!(s1, s2);
    let mut w = CodeWriter::new();
    w.op(op::PUSHSTR).u32(s1);
    w.op(op::PUSHSTR).u32(s2);
    w.op(op::EQ);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::True);
}

#[test]
fn test_constant_list_indexing_is_one_based() {
    let mut b = ImageBuilder::new();
    let lst = b.list_const(&[Val::Int(10), Val::Int(20), Val::Int(30)]);
    let mut w = CodeWriter::new();
    w.op(op::PUSHLST).u32(lst);
    w.op(op::PUSHINT8).i8(2);
    w.op(op::INDEX);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(20));
}

#[test]
fn test_constant_list_index_out_of_range() {
    let mut b = ImageBuilder::new();
    let lst = b.list_const(&[Val::Int(10)]);
    let mut w = CodeWriter::new();
    w.op(op::PUSHLST).u32(lst);
    w.op(op::IDXINT8).u8(4);
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert!(run_err(&b).contains("index out of range"));
}

#[test]
fn test_logic_and_comparison_ops() {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    // (3 < 5) is true; NOT makes it nil; JNIL takes the branch.
    w.op(op::PUSHINT8).i8(3);
    w.op(op::PUSHINT8).i8(5);
    w.op(op::LT);
    w.op(op::NOT);
    w.op(op::JNIL);
    let to_yes = w.branch_placeholder();
    w.op(op::RETNIL);
    let yes = w.pos();
    w.patch_branch(to_yes, yes);
    w.op(op::RETTRUE);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::True);
}

#[test]
fn test_bitwise_and_shift_ops() {
    let mut b = ImageBuilder::new();
    let mut w = CodeWriter::new();
    // ((0x0f & 0x3c) | 0x40) ^ 0x01, then << 1, then >> 2 arithmetic.
    w.op(op::PUSHINT8).i8(0x0f);
    w.op(op::PUSHINT8).i8(0x3c);
    w.op(op::BAND); // 0x0c
    w.op(op::PUSHINT8).i8(0x40);
    w.op(op::BOR); // 0x4c
    w.op(op::PUSH_1);
    w.op(op::BXOR); // 0x4d
    w.op(op::PUSH_1);
    w.op(op::SHL); // 0x9a
    w.op(op::PUSHINT8).i8(2);
    w.op(op::ASHR); // 0x26
    w.op(op::RETVAL);
    let entry = b.code(&function(0, 0, 0, w, &[]));
    b.entry(entry);
    assert_eq!(run_ok(&b), Val::Int(0x26));
}
