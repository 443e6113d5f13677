use anyhow::{Result, bail};

use crate::val::Val;

pub const POOL_CODE: u16 = 1;
pub const POOL_DATA: u16 = 2;

struct Page {
    mask: u8,
    bytes: Vec<u8>,
}

/// One logical address space (code or data) assembled from fixed-size pages.
/// Every page is XOR-masked with its own byte; `resolve` is div/mod into the
/// page table followed by the unmask. Pages must arrive in order and cover
/// the declared count before the pool is usable.
pub struct Pool {
    page_size: u32,
    pages: Vec<Option<Page>>,
}

impl Pool {
    pub fn new(page_count: u32, page_size: u32) -> Result<Self> {
        if page_size == 0 {
            bail!("pool page size must be nonzero");
        }
        let mut pages = Vec::with_capacity(page_count as usize);
        pages.resize_with(page_count as usize, || None);
        Ok(Self { page_size, pages })
    }

    /// Empty pool, for a Vm with no image loaded.
    pub fn empty() -> Self {
        Self {
            page_size: 1,
            pages: Vec::new(),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn install_page(&mut self, index: u32, mask: u8, bytes: Vec<u8>) -> Result<()> {
        let slot = self
            .pages
            .get_mut(index as usize)
            .ok_or_else(|| anyhow::anyhow!("page index {index} out of range"))?;
        if slot.is_some() {
            bail!("duplicate page {index}");
        }
        if bytes.len() > self.page_size as usize {
            bail!(
                "page {index} payload {} exceeds page size {}",
                bytes.len(),
                self.page_size
            );
        }
        *slot = Some(Page { mask, bytes });
        Ok(())
    }

    /// All declared pages present, and only the last page may be short.
    pub fn validate(&self) -> Result<()> {
        for (i, page) in self.pages.iter().enumerate() {
            let page = page
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("missing pool page {i}"))?;
            if i + 1 < self.pages.len() && page.bytes.len() != self.page_size as usize {
                bail!("short interior page {i}");
            }
        }
        Ok(())
    }

    /// Total addressable size in bytes.
    pub fn size(&self) -> u32 {
        match self.pages.last() {
            None => 0,
            Some(last) => {
                let full = (self.pages.len() as u32 - 1) * self.page_size;
                full + last.as_ref().map_or(0, |p| p.bytes.len() as u32)
            }
        }
    }

    /// Resolve one offset to its unmasked byte. Out-of-range access is a
    /// fetch error; there is no partial read.
    pub fn byte(&self, ofs: u32) -> Result<u8> {
        let page_idx = (ofs / self.page_size) as usize;
        let page_ofs = (ofs % self.page_size) as usize;
        let page = self
            .pages
            .get(page_idx)
            .and_then(|p| p.as_ref())
            .ok_or_else(|| anyhow::anyhow!("pool offset {ofs:#x} out of range"))?;
        let raw = page
            .bytes
            .get(page_ofs)
            .ok_or_else(|| anyhow::anyhow!("pool offset {ofs:#x} out of range"))?;
        Ok(raw ^ page.mask)
    }

    pub fn read_u8(&self, ofs: u32) -> Result<u8> {
        self.byte(ofs)
    }

    pub fn read_i8(&self, ofs: u32) -> Result<i8> {
        Ok(self.byte(ofs)? as i8)
    }

    pub fn read_u16(&self, ofs: u32) -> Result<u16> {
        Ok(u16::from_le_bytes([self.byte(ofs)?, self.byte(ofs + 1)?]))
    }

    pub fn read_i16(&self, ofs: u32) -> Result<i16> {
        Ok(self.read_u16(ofs)? as i16)
    }

    pub fn read_u32(&self, ofs: u32) -> Result<u32> {
        Ok(u32::from_le_bytes([
            self.byte(ofs)?,
            self.byte(ofs + 1)?,
            self.byte(ofs + 2)?,
            self.byte(ofs + 3)?,
        ]))
    }

    pub fn read_i32(&self, ofs: u32) -> Result<i32> {
        Ok(self.read_u32(ofs)? as i32)
    }

    pub fn read_bytes(&self, ofs: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(self.byte(ofs + i as u32)?);
        }
        Ok(out)
    }

    /// Length-prefixed (u16) UTF-8 string constant.
    pub fn read_str(&self, ofs: u32) -> Result<String> {
        let len = self.read_u16(ofs)? as usize;
        let bytes = self.read_bytes(ofs + 2, len)?;
        Ok(String::from_utf8(bytes)?)
    }

    /// List constant: u16 element count followed by 5-byte dataholders.
    /// Elements decode recursively through the `Val` factory; nested lists
    /// stay as offsets, so this never loops on self-reference.
    pub fn read_list(&self, ofs: u32) -> Result<Vec<Val>> {
        let count = self.read_u16(ofs)? as usize;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let bytes = self.read_bytes(ofs + 2 + (i as u32) * 5, 5)?;
            out.push(Val::from_dataholder(&bytes)?);
        }
        Ok(out)
    }
}
