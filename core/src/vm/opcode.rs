//! Opcode numbering and operand layouts.
//!
//! Conventions: all multi-byte operands are little-endian. Branch operands
//! are i16 displacements relative to the first byte of the operand itself.
//! The property-access family pops its receiver from the stack top with the
//! arguments below it; argument lists are pushed right to left, so the first
//! argument is nearest the frame.

// Stack and literal pushes.
pub const NOP: u8 = 0x00;
pub const PUSH_0: u8 = 0x01;
pub const PUSH_1: u8 = 0x02;
/// i8 immediate.
pub const PUSHINT8: u8 = 0x03;
/// i32 immediate.
pub const PUSHINT: u8 = 0x04;
/// u32 data-pool offset.
pub const PUSHSTR: u8 = 0x05;
/// u32 data-pool offset.
pub const PUSHLST: u8 = 0x06;
/// u32 object id.
pub const PUSHOBJ: u8 = 0x07;
pub const PUSHNIL: u8 = 0x08;
pub const PUSHTRUE: u8 = 0x09;
/// u16 property id.
pub const PUSHPROPID: u8 = 0x0a;
/// u32 code-pool offset.
pub const PUSHFNPTR: u8 = 0x0b;
/// u32 enum value.
pub const PUSHENUM: u8 = 0x0c;
/// u8 set, u16 function index.
pub const PUSHBIFPTR: u8 = 0x0d;
pub const PUSHSELF: u8 = 0x0e;
pub const DUP: u8 = 0x10;
pub const DISC: u8 = 0x11;
pub const SWAP: u8 = 0x12;
pub const GETR0: u8 = 0x13;

// Arithmetic, bitwise, logic.
pub const ADD: u8 = 0x20;
pub const SUB: u8 = 0x21;
pub const MUL: u8 = 0x22;
pub const DIV: u8 = 0x23;
pub const MOD: u8 = 0x24;
pub const NEG: u8 = 0x25;
pub const NOT: u8 = 0x26;
pub const BOOLIZE: u8 = 0x27;
pub const BNOT: u8 = 0x28;
pub const BAND: u8 = 0x29;
pub const BOR: u8 = 0x2a;
pub const BXOR: u8 = 0x2b;
pub const SHL: u8 = 0x2c;
pub const ASHR: u8 = 0x2d;
pub const LSHR: u8 = 0x2e;
pub const INC: u8 = 0x2f;
pub const DEC: u8 = 0x30;

// Comparison: results are true/nil.
pub const EQ: u8 = 0x38;
pub const NE: u8 = 0x39;
pub const LT: u8 = 0x3a;
pub const LE: u8 = 0x3b;
pub const GT: u8 = 0x3c;
pub const GE: u8 = 0x3d;

// Control flow. All take an i16 branch displacement unless noted.
pub const JMP: u8 = 0x40;
pub const JT: u8 = 0x41;
pub const JF: u8 = 0x42;
pub const JNIL: u8 = 0x43;
pub const JNOTNIL: u8 = 0x44;
pub const JR0T: u8 = 0x45;
pub const JR0F: u8 = 0x46;
/// u16 case count, then per case a 5-byte dataholder + i16 branch, then the
/// mandatory default i16 branch. Ordered first-match.
pub const SWITCH: u8 = 0x47;
/// Local subroutine call: push the return offset, branch.
pub const JSR: u8 = 0x48;
/// u16 local index holding the return offset pushed by JSR.
pub const LRET: u8 = 0x49;

// Returns and calls.
pub const RETVAL: u8 = 0x50;
pub const RETNIL: u8 = 0x51;
pub const RETTRUE: u8 = 0x52;
/// Return leaving R0 untouched.
pub const RET: u8 = 0x53;
/// u8 argc, u32 code offset.
pub const CALL: u8 = 0x54;
/// u8 argc; callee value popped from the stack.
pub const PTRCALL: u8 = 0x55;
pub const THROW: u8 = 0x58;
/// Pops the argument count overriding the next call-family opcode.
pub const VARARGC: u8 = 0x59;
/// u8 argc, u8 function index in builtin set 0.
pub const BUILTIN_A: u8 = 0x5a;
/// u8 argc, u8 function index in builtin set 1.
pub const BUILTIN_B: u8 = 0x5b;
/// u8 argc, u8 set, u16 function index.
pub const BUILTIN: u8 = 0x5c;

// Property access family. All funnel into the callprop primitive.
/// u16 prop; receiver popped.
pub const GETPROP: u8 = 0x60;
/// u8 argc, u16 prop; receiver popped, args below.
pub const CALLPROP: u8 = 0x61;
/// u8 argc; prop popped, then receiver.
pub const PTRCALLPROP: u8 = 0x62;
/// u16 prop on self.
pub const GETPROPSELF: u8 = 0x63;
/// u8 argc, u16 prop on self.
pub const CALLPROPSELF: u8 = 0x64;
/// u8 argc; prop popped, receiver is self.
pub const PTRCALLPROPSELF: u8 = 0x65;
/// u32 obj, u16 prop.
pub const OBJGETPROP: u8 = 0x66;
/// u8 argc, u32 obj, u16 prop.
pub const OBJCALLPROP: u8 = 0x67;
/// u8 local, u16 prop.
pub const GETPROPLCL1: u8 = 0x68;
/// u8 argc, u8 local, u16 prop.
pub const CALLPROPLCL1: u8 = 0x69;
/// u16 prop on R0.
pub const GETPROPR0: u8 = 0x6a;
/// u8 argc, u16 prop on R0.
pub const CALLPROPR0: u8 = 0x6b;
/// u8 argc, u16 prop: resolve from the current defining object, excluding
/// its own definitions.
pub const INHERIT: u8 = 0x6c;
/// u8 argc; prop popped.
pub const PTRINHERIT: u8 = 0x6d;
/// u8 argc, u16 prop, u32 explicit superclass.
pub const EXPINHERIT: u8 = 0x6e;
/// u8 argc, u32 explicit superclass; prop popped.
pub const PTREXPINHERIT: u8 = 0x6f;
/// u16 prop; value popped, then receiver.
pub const SETPROP: u8 = 0x70;
/// value popped, then prop, then receiver.
pub const PTRSETPROP: u8 = 0x71;
/// u16 prop on self; value popped.
pub const SETPROPSELF: u8 = 0x72;
/// u32 obj, u16 prop; value popped.
pub const OBJSETPROP: u8 = 0x73;
/// Pops an object into the self slot of the current frame.
pub const SETSELF: u8 = 0x74;

// Construction.
/// u8 argc, u8 metaclass dependency index.
pub const NEW1: u8 = 0x78;
/// u16 argc, u16 metaclass dependency index.
pub const NEW2: u8 = 0x79;
/// Like NEW1/NEW2 but the object is transient.
pub const TRNEW1: u8 = 0x7a;
pub const TRNEW2: u8 = 0x7b;

// Indexing.
/// Pops index, then container; pushes the element.
pub const INDEX: u8 = 0x80;
/// u8 local, u8 1-based index; pushes the element.
pub const IDXLCL1INT8: u8 = 0x81;
/// u8 1-based index; container popped.
pub const IDXINT8: u8 = 0x82;
/// Pops value, then index, then container; pushes the updated container.
pub const SETIND: u8 = 0x83;
/// u8 local, u8 1-based index; pops the value, stores the updated
/// container back into the local.
pub const SETINDLCL1I8: u8 = 0x84;

// Local/argument fast paths: pure optimizations of the generic forms.
pub const GETLCL1: u8 = 0x88;
pub const GETLCL2: u8 = 0x89;
pub const SETLCL1: u8 = 0x8a;
pub const SETLCL2: u8 = 0x8b;
pub const GETARG1: u8 = 0x8c;
pub const GETARG2: u8 = 0x8d;
pub const SETARG1: u8 = 0x8e;
pub const GETARGC: u8 = 0x8f;
/// u16 local; add one in place.
pub const INCLCL: u8 = 0x90;
/// u16 local; subtract one in place.
pub const DECLCL: u8 = 0x91;
pub const NILLCL1: u8 = 0x92;
pub const ONELCL1: u8 = 0x93;
pub const ZEROLCL1: u8 = 0x94;
/// u8 local; store R0.
pub const SETLCL1R0: u8 = 0x95;

// Output.
/// u32 string constant offset, routed through the say hook.
pub const SAY: u8 = 0x98;
/// Pops a value, converts it to text, routes it through the say hook.
pub const SAYVAL: u8 = 0x99;

/// Mnemonic for tracing and the disassembling inspector.
pub fn name(op: u8) -> &'static str {
    match op {
        NOP => "nop",
        PUSH_0 => "push_0",
        PUSH_1 => "push_1",
        PUSHINT8 => "pushint8",
        PUSHINT => "pushint",
        PUSHSTR => "pushstr",
        PUSHLST => "pushlst",
        PUSHOBJ => "pushobj",
        PUSHNIL => "pushnil",
        PUSHTRUE => "pushtrue",
        PUSHPROPID => "pushpropid",
        PUSHFNPTR => "pushfnptr",
        PUSHENUM => "pushenum",
        PUSHBIFPTR => "pushbifptr",
        PUSHSELF => "pushself",
        DUP => "dup",
        DISC => "disc",
        SWAP => "swap",
        GETR0 => "getr0",
        ADD => "add",
        SUB => "sub",
        MUL => "mul",
        DIV => "div",
        MOD => "mod",
        NEG => "neg",
        NOT => "not",
        BOOLIZE => "boolize",
        BNOT => "bnot",
        BAND => "band",
        BOR => "bor",
        BXOR => "bxor",
        SHL => "shl",
        ASHR => "ashr",
        LSHR => "lshr",
        INC => "inc",
        DEC => "dec",
        EQ => "eq",
        NE => "ne",
        LT => "lt",
        LE => "le",
        GT => "gt",
        GE => "ge",
        JMP => "jmp",
        JT => "jt",
        JF => "jf",
        JNIL => "jnil",
        JNOTNIL => "jnotnil",
        JR0T => "jr0t",
        JR0F => "jr0f",
        SWITCH => "switch",
        JSR => "jsr",
        LRET => "lret",
        RETVAL => "retval",
        RETNIL => "retnil",
        RETTRUE => "rettrue",
        RET => "ret",
        CALL => "call",
        PTRCALL => "ptrcall",
        THROW => "throw",
        VARARGC => "varargc",
        BUILTIN_A => "builtin_a",
        BUILTIN_B => "builtin_b",
        BUILTIN => "builtin",
        GETPROP => "getprop",
        CALLPROP => "callprop",
        PTRCALLPROP => "ptrcallprop",
        GETPROPSELF => "getpropself",
        CALLPROPSELF => "callpropself",
        PTRCALLPROPSELF => "ptrcallpropself",
        OBJGETPROP => "objgetprop",
        OBJCALLPROP => "objcallprop",
        GETPROPLCL1 => "getproplcl1",
        CALLPROPLCL1 => "callproplcl1",
        GETPROPR0 => "getpropr0",
        CALLPROPR0 => "callpropr0",
        INHERIT => "inherit",
        PTRINHERIT => "ptrinherit",
        EXPINHERIT => "expinherit",
        PTREXPINHERIT => "ptrexpinherit",
        SETPROP => "setprop",
        PTRSETPROP => "ptrsetprop",
        SETPROPSELF => "setpropself",
        OBJSETPROP => "objsetprop",
        SETSELF => "setself",
        NEW1 => "new1",
        NEW2 => "new2",
        TRNEW1 => "trnew1",
        TRNEW2 => "trnew2",
        INDEX => "index",
        IDXLCL1INT8 => "idxlcl1int8",
        IDXINT8 => "idxint8",
        SETIND => "setind",
        SETINDLCL1I8 => "setindlcl1i8",
        GETLCL1 => "getlcl1",
        GETLCL2 => "getlcl2",
        SETLCL1 => "setlcl1",
        SETLCL2 => "setlcl2",
        GETARG1 => "getarg1",
        GETARG2 => "getarg2",
        SETARG1 => "setarg1",
        GETARGC => "getargc",
        INCLCL => "inclcl",
        DECLCL => "declcl",
        NILLCL1 => "nillcl1",
        ONELCL1 => "onelcl1",
        ZEROLCL1 => "zerolcl1",
        SETLCL1R0 => "setlcl1r0",
        SAY => "say",
        SAYVAL => "sayval",
        _ => "??",
    }
}
