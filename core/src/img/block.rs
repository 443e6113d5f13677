use serde::Serialize;

pub const TAG_ENTP: [u8; 4] = *b"ENTP";
pub const TAG_CPDF: [u8; 4] = *b"CPDF";
pub const TAG_CPPG: [u8; 4] = *b"CPPG";
pub const TAG_MCLD: [u8; 4] = *b"MCLD";
pub const TAG_OBJS: [u8; 4] = *b"OBJS";
pub const TAG_SYMD: [u8; 4] = *b"SYMD";
pub const TAG_EOF: [u8; 4] = *b"EOF ";

/// Block flags word, bit 0: the block is mandatory. A reader that does not
/// recognize a mandatory block must reject the image.
pub const BLOCK_FLAG_MANDATORY: u16 = 0x0001;

/// Entry-point block payload: where execution starts and the per-function
/// layout constants the rest of the engine needs to walk code.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    /// Code-pool offset of the entry function.
    pub entry_ofs: u32,
    /// Declared method header size; must be at least [`super::METHOD_HEADER_SIZE`].
    pub method_hdr_size: u16,
    /// Declared exception-table record size; must be at least
    /// [`super::EXC_ENTRY_SIZE`].
    pub exc_entry_size: u16,
}

/// One block header, as reported by `inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub tag: String,
    pub len: u32,
    pub mandatory: bool,
}

/// Shallow description of an image, for tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub version: u16,
    pub blocks: Vec<BlockSummary>,
    pub code_pages: u32,
    pub data_pages: u32,
    pub static_objects: usize,
    pub symbols: usize,
}
