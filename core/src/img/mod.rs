//! Image container parsing and the paged, byte-masked pool address spaces.
//!
//! An image is a fixed header followed by self-describing blocks. The loader
//! turns it into two [`Pool`]s (code and data), a metaclass dependency list,
//! the static object records, and the symbol table. Everything here is a
//! read-only view once loaded; runtime code never writes back into a pool.

mod block;
pub mod build;
mod loader;
mod pool;
mod read;

pub use block::{BlockSummary, EntryPoint, ImageSummary};
pub use loader::{DepEntry, ParsedImage, RawObject, parse, summarize};
pub use pool::{POOL_CODE, POOL_DATA, Pool};
pub use read::ByteReader;


/// Magic bytes opening every image file.
pub const IMAGE_MAGIC: [u8; 8] = *b"FABIMG\r\n";
/// Container format version this engine reads.
pub const IMAGE_VERSION: u16 = 1;
/// Fixed header: magic, u16 version, 6 reserved bytes.
pub const IMAGE_HEADER_SIZE: usize = 16;

/// Size of a method header as this engine writes it. Images may declare a
/// larger size in `ENTP`; the extra bytes are skipped.
pub const METHOD_HEADER_SIZE: u16 = 10;
/// Size of one exception-table record: u16 start, u16 end, u32 class, u16
/// handler offset.
pub const EXC_ENTRY_SIZE: u16 = 10;
