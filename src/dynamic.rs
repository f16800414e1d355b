//! The `.dynamic` section bookkeeping.
//!
//! Entries are reserved (and the section sized) before layout, then filled
//! with final addresses after it. Only the tags the backend's own tables
//! need live here; NEEDED/SONAME and friends belong to the outer linker.

use crate::module::{FileFormat, Module};
use crate::types::*;

#[derive(Debug)]
pub struct ElfDynamic {
    section: usize,
    entries: Vec<(i32, u32)>,
}

impl ElfDynamic {
    pub fn new(section: usize) -> ElfDynamic {
        ElfDynamic { section, entries: Vec::new() }
    }

    pub fn section(&self) -> usize {
        self.section
    }

    /// Reserve the tag set this output needs and size the section at
    /// 8 bytes per entry.
    pub fn reserve_entries(
        &mut self,
        module: &mut Module,
        rel_dyn_empty: bool,
        rel_plt_empty: bool,
    ) {
        self.entries.clear();
        if !rel_dyn_empty {
            self.entries.push((DT_REL, 0));
            self.entries.push((DT_RELSZ, 0));
            self.entries.push((DT_RELENT, 0));
        }
        if !rel_plt_empty {
            self.entries.push((DT_JMPREL, 0));
            self.entries.push((DT_PLTRELSZ, 0));
            self.entries.push((DT_PLTREL, 0));
            self.entries.push((DT_PLTGOT, 0));
        }
        if module.has_text_rel {
            self.entries.push((DT_TEXTREL, 0));
        }
        self.entries.push((DT_NULL, 0));
        module.sections[self.section].size = self.entries.len() as u32 * 8;
    }

    /// Fill the reserved tags with final addresses and sizes.
    pub fn apply_entries(&mut self, module: &Module, format: &FileFormat) {
        for entry in self.entries.iter_mut() {
            entry.1 = match entry.0 {
                DT_REL => module.sections[format.rel_dyn].addr,
                DT_RELSZ => module.sections[format.rel_dyn].size,
                DT_RELENT => REL_ENTRY_SIZE,
                DT_JMPREL => module.sections[format.rel_plt].addr,
                DT_PLTRELSZ => module.sections[format.rel_plt].size,
                DT_PLTREL => DT_REL as u32,
                DT_PLTGOT => module.sections[format.got].addr,
                _ => 0,
            };
        }
    }

    /// Append an ELF32 dynamic entry (8 bytes: tag + value).
    fn push_dyn(data: &mut Vec<u8>, tag: i32, val: u32) {
        data.extend_from_slice(&tag.to_le_bytes());
        data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn emit(&self, region: &mut [u8]) -> Result<u64, String> {
        let mut data = Vec::with_capacity(self.entries.len() * 8);
        for &(tag, val) in &self.entries {
            Self::push_dyn(&mut data, tag, val);
        }
        if region.len() < data.len() {
            return Err(format!(
                ".dynamic emission region too small: {} < {}", region.len(), data.len()));
        }
        region[..data.len()].copy_from_slice(&data);
        Ok(data.len() as u64)
    }
}
