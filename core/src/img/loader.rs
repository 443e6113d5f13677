use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::img::block::{
    BLOCK_FLAG_MANDATORY, BlockSummary, EntryPoint, ImageSummary, TAG_CPDF, TAG_CPPG, TAG_ENTP,
    TAG_EOF, TAG_MCLD, TAG_OBJS, TAG_SYMD,
};
use crate::img::pool::{POOL_CODE, POOL_DATA, Pool};
use crate::img::read::ByteReader;
use crate::img::{EXC_ENTRY_SIZE, IMAGE_HEADER_SIZE, IMAGE_MAGIC, IMAGE_VERSION, METHOD_HEADER_SIZE};
use crate::val::{ObjId, PropId, Val};

/// One metaclass dependency: the registered kind name plus the property ids
/// bound, in order, to that kind's native method table.
#[derive(Debug, Clone)]
pub struct DepEntry {
    pub name: String,
    pub props: Vec<PropId>,
}

/// A static object record, still in its metaclass-specific byte form. The
/// heap materializes it through the metaclass loader.
#[derive(Debug, Clone)]
pub struct RawObject {
    pub id: ObjId,
    pub mc_index: u16,
    pub transient: bool,
    pub payload: Vec<u8>,
}

/// Everything the loader extracts from an image file.
pub struct ParsedImage {
    pub version: u16,
    pub entry: EntryPoint,
    pub code: Pool,
    pub data: Pool,
    pub deps: Vec<DepEntry>,
    pub objects: Vec<RawObject>,
    pub symbols: Vec<(String, Val)>,
    pub summary: ImageSummary,
}

const OBJS_FLAG_LARGE: u16 = 0x0001;
const OBJS_FLAG_TRANSIENT: u16 = 0x0002;

/// Parse an image. Fails on a malformed header, a truncated block, an
/// unknown mandatory block, or pools that do not cover their declared page
/// range. No partial result is ever returned.
pub fn parse(bytes: &[u8]) -> Result<ParsedImage> {
    if bytes.len() < IMAGE_HEADER_SIZE {
        bail!("image too short for header ({} bytes)", bytes.len());
    }
    if bytes[..8] != IMAGE_MAGIC {
        bail!("bad image magic");
    }
    let version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if version != IMAGE_VERSION {
        bail!("unsupported image version {version}");
    }

    let mut entry: Option<EntryPoint> = None;
    let mut code: Option<Pool> = None;
    let mut data: Option<Pool> = None;
    let mut deps = Vec::new();
    let mut objects = Vec::new();
    let mut symbols = Vec::new();
    let mut blocks = Vec::new();
    let mut saw_eof = false;

    let mut pos = IMAGE_HEADER_SIZE;
    while pos < bytes.len() {
        if bytes.len() - pos < 10 {
            bail!("truncated block header at {pos:#x}");
        }
        let tag: [u8; 4] = bytes[pos..pos + 4].try_into().unwrap();
        let len = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let flags = u16::from_le_bytes(bytes[pos + 8..pos + 10].try_into().unwrap());
        let mandatory = flags & BLOCK_FLAG_MANDATORY != 0;
        pos += 10;
        if bytes.len() - pos < len {
            bail!("block {} payload truncated at {pos:#x}", tag_name(&tag));
        }
        let payload = &bytes[pos..pos + len];
        pos += len;

        blocks.push(BlockSummary {
            tag: tag_name(&tag),
            len: len as u32,
            mandatory,
        });
        debug!(tag = %tag_name(&tag), len, mandatory, "image block");

        match tag {
            TAG_ENTP => {
                let mut r = ByteReader::new(payload);
                let ep = EntryPoint {
                    entry_ofs: r.u32()?,
                    method_hdr_size: r.u16()?,
                    exc_entry_size: r.u16()?,
                };
                if ep.method_hdr_size < METHOD_HEADER_SIZE {
                    bail!("declared method header size {} too small", ep.method_hdr_size);
                }
                if ep.exc_entry_size < EXC_ENTRY_SIZE {
                    bail!("declared exception entry size {} too small", ep.exc_entry_size);
                }
                entry = Some(ep);
            }
            TAG_CPDF => {
                let mut r = ByteReader::new(payload);
                let pool_id = r.u16()?;
                let page_count = r.u32()?;
                let page_size = r.u32()?;
                let pool = Pool::new(page_count, page_size)
                    .with_context(|| format!("pool {pool_id} definition"))?;
                match pool_id {
                    POOL_CODE => code = Some(pool),
                    POOL_DATA => data = Some(pool),
                    other => bail!("unknown pool id {other}"),
                }
            }
            TAG_CPPG => {
                let mut r = ByteReader::new(payload);
                let pool_id = r.u16()?;
                let index = r.u32()?;
                let mask = r.u8()?;
                let page = r.take(r.remaining())?.to_vec();
                let pool = match pool_id {
                    POOL_CODE => code.as_mut(),
                    POOL_DATA => data.as_mut(),
                    other => bail!("page for unknown pool id {other}"),
                }
                .ok_or_else(|| anyhow::anyhow!("page before pool {pool_id} definition"))?;
                pool.install_page(index, mask, page)?;
            }
            TAG_MCLD => {
                let mut r = ByteReader::new(payload);
                let count = r.u16()?;
                for _ in 0..count {
                    let name = r.str16()?;
                    let prop_count = r.u16()?;
                    let mut props = Vec::with_capacity(prop_count as usize);
                    for _ in 0..prop_count {
                        props.push(r.u16()?);
                    }
                    deps.push(DepEntry { name, props });
                }
            }
            TAG_OBJS => {
                let mut r = ByteReader::new(payload);
                let count = r.u16()?;
                let mc_index = r.u16()?;
                let flags = r.u16()?;
                let large = flags & OBJS_FLAG_LARGE != 0;
                let transient = flags & OBJS_FLAG_TRANSIENT != 0;
                for _ in 0..count {
                    let id = r.u32()?;
                    let size = if large { r.u32()? as usize } else { r.u16()? as usize };
                    let body = r.take(size)?.to_vec();
                    objects.push(RawObject {
                        id,
                        mc_index,
                        transient,
                        payload: body,
                    });
                }
            }
            TAG_SYMD => {
                let mut r = ByteReader::new(payload);
                let count = r.u16()?;
                for _ in 0..count {
                    let val = r.dataholder()?;
                    let len = r.u8()? as usize;
                    let name = std::str::from_utf8(r.take(len)?)?.to_string();
                    symbols.push((name, val));
                }
            }
            TAG_EOF => {
                saw_eof = true;
                break;
            }
            _ => {
                if mandatory {
                    bail!("unknown mandatory block {}", tag_name(&tag));
                }
                debug!(tag = %tag_name(&tag), "skipping unknown optional block");
            }
        }
    }

    if !saw_eof {
        bail!("image ended without EOF block");
    }
    let entry = entry.ok_or_else(|| anyhow::anyhow!("image has no entry-point block"))?;
    let code = code.ok_or_else(|| anyhow::anyhow!("image has no code pool"))?;
    let data = data.unwrap_or_else(Pool::empty);
    code.validate().context("code pool")?;
    data.validate().context("data pool")?;

    let summary = ImageSummary {
        version,
        blocks,
        code_pages: code.size().div_ceil(code.page_size().max(1)),
        data_pages: data.size().div_ceil(data.page_size().max(1)),
        static_objects: objects.len(),
        symbols: symbols.len(),
    };

    Ok(ParsedImage {
        version,
        entry,
        code,
        data,
        deps,
        objects,
        symbols,
        summary,
    })
}

/// Block-level description for tooling; parses the whole image so a summary
/// is only produced for images that would actually load.
pub fn summarize(bytes: &[u8]) -> Result<ImageSummary> {
    Ok(parse(bytes)?.summary)
}

fn tag_name(tag: &[u8; 4]) -> String {
    tag.iter().map(|&b| b as char).collect()
}
