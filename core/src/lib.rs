//! Execution engine for fabula narrative images.
//!
//! A fabula image is a self-contained binary program: paged, byte-masked
//! code and data pools, static object records, a metaclass dependency list,
//! and a symbol table. This crate loads such images and executes them on a
//! stack machine with prototype-style multiple inheritance, intrinsic
//! metaclasses, and exception-table-driven unwinding.
//!
//! The crate carries the engine only; the intrinsic string/list kinds and
//! the built-in function sets live in `fabula-stdlib`, and hosts wire them
//! into a [`vm::Vm`] at startup.

pub mod err;
pub mod heap;
pub mod img;
pub mod util;
pub mod val;
pub mod vm;

pub use err::{ErrCode, Fault, VmResult};
pub use val::{KindId, ObjId, PropId, Val};
pub use vm::{Builtin, BuiltinSet, Vm};
