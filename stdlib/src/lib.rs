//! Intrinsic kinds and built-in function sets for the fabula engine.
//!
//! The core engine knows only plain objects; dynamic strings, dynamic
//! lists, and the built-in functions images call through the BUILTIN
//! opcodes all live here. Hosts call [`register`] on a fresh
//! [`Vm`](fabula_core::Vm) before loading an image, so the image's
//! metaclass dependency list can bind against these kinds.

use std::sync::Arc;

use fabula_core::Vm;
use tracing::debug;

pub mod bif;
pub mod list;
pub mod string;


pub use list::ListMeta;
pub use string::StringMeta;

/// Index the core built-in set registers at, matching the `BUILTIN_A`
/// opcode.
pub const BIF_SET_CORE: u16 = 0;
/// Index the I/O built-in set registers at, matching `BUILTIN_B`.
pub const BIF_SET_IO: u16 = 1;

/// Wire the standard kinds and built-in sets into a VM. Must run before
/// an image is loaded.
pub fn register(vm: &mut Vm) {
    vm.registry.register(Arc::new(StringMeta));
    vm.registry.register(Arc::new(ListMeta));
    let core = vm.add_builtin_set(bif::core_set());
    let io = vm.add_builtin_set(bif::io_set());
    debug!(core, io, "standard kinds and built-in sets registered");
}
