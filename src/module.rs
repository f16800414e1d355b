//! The in-memory link unit the backend operates on.
//!
//! Sections own an arena of fragments plus the chain order of arena indices;
//! a fragment points back at its parent section by id only. Relocations are
//! grouped per input relocation section, keyed by the section whose bytes
//! they patch. The module also carries the program-segment table and the
//! symbol table.

use crate::symbols::SymbolTable;
use crate::types::*;

// ── Fragments ────────────────────────────────────────────────────────────────

/// Closed set of fragment shapes. Emission matches exhaustively, so a new
/// variant forces the emitter to be updated.
#[derive(Clone, Debug)]
pub enum FragmentKind {
    /// `size` bytes of `value` repeated. A value size of zero marks a
    /// virtual fill that occupies layout space but emits nothing.
    Fill { value: u8, value_size: u32 },
    /// Bytes taken verbatim from an input file region.
    Region { data: Vec<u8> },
    /// Alignment padding filled with `value`; only 1-byte values can be
    /// emitted.
    Align { value: u8, value_size: u32 },
    /// Placeholder with no content; must have zero size.
    Null,
    /// A branch-relaxation veneer, identified by the stub factory's index.
    Stub { stub: usize },
}

#[derive(Clone, Debug)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// Offset within the output section; rewritten during relaxation.
    pub offset: u32,
    pub size: u32,
    /// Back-pointer to the owning section (index, never ownership).
    pub parent: usize,
}

/// Addresses a byte inside a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentRef {
    pub sect: usize,
    pub frag: usize,
    pub offset: u32,
}

impl FragmentRef {
    pub fn new(sect: usize, frag: usize, offset: u32) -> FragmentRef {
        FragmentRef { sect, frag, offset }
    }

    /// Offset of the addressed byte within its output section.
    pub fn output_offset(&self, module: &Module) -> u32 {
        module.sections[self.sect].frags[self.frag].offset + self.offset
    }

    /// Absolute output address of the addressed byte.
    pub fn output_addr(&self, module: &Module) -> u32 {
        module.sections[self.sect].addr + self.output_offset(module)
    }
}

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Regular,
    /// Backend-owned target section (.ARM.exidx, .ARM.extab, .ARM.attributes).
    Target,
    Relocation,
    /// .symtab / .strtab name pools.
    NamePool,
}

pub struct Section {
    pub name: String,
    pub kind: SectionKind,
    pub sh_type: u32,
    pub flags: u32,
    pub align: u32,
    pub addr: u32,
    pub size: u32,
    pub link: Option<usize>,
    pub info: u32,
    /// Fragment arena; stable indices.
    pub frags: Vec<Fragment>,
    /// Chain order of arena indices. Stub insertion splices here.
    pub order: Vec<usize>,
}

impl Section {
    pub fn has_content(&self) -> bool {
        !self.order.is_empty()
    }

    /// Offset one past the last fragment in the chain.
    pub fn chain_end(&self) -> u32 {
        match self.order.last() {
            Some(&idx) => self.frags[idx].offset + self.frags[idx].size,
            None => 0,
        }
    }

    /// Arena index of the first fragment in the chain.
    pub fn front_frag(&self) -> Option<usize> {
        self.order.first().copied()
    }
}

// ── Relocations ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct Relocation {
    pub ty: u32,
    /// The patch site.
    pub target: FragmentRef,
    /// Symbol the relocation resolves against.
    pub sym: usize,
    pub addend: i32,
    /// Veneer attached by relaxation, if the branch needed one.
    pub stub: Option<usize>,
}

impl Relocation {
    pub fn new(ty: u32, target: FragmentRef, sym: usize) -> Relocation {
        Relocation { ty, target, sym, addend: 0, stub: None }
    }
}

/// One input relocation section. `link` is the section whose bytes the
/// entries patch; scanning skips the group if it is not SHF_ALLOC.
pub struct RelocSection {
    pub link: usize,
    pub relocs: Vec<Relocation>,
}

// ── Segments ─────────────────────────────────────────────────────────────────

pub struct Segment {
    pub p_type: u32,
    pub flags: u32,
    pub sections: Vec<usize>,
}

// ── Module ───────────────────────────────────────────────────────────────────

pub struct Module {
    pub sections: Vec<Section>,
    pub symbols: SymbolTable,
    pub reloc_sections: Vec<RelocSection>,
    pub segments: Vec<Segment>,
    /// Set when an in-place dynamic relocation lands in non-writable code.
    pub has_text_rel: bool,
}

impl Default for Module {
    fn default() -> Module {
        Module::new()
    }
}

impl Module {
    pub fn new() -> Module {
        Module {
            sections: Vec::new(),
            symbols: SymbolTable::new(),
            reloc_sections: Vec::new(),
            segments: Vec::new(),
            has_text_rel: false,
        }
    }

    pub fn create_section(
        &mut self,
        name: &str,
        kind: SectionKind,
        sh_type: u32,
        flags: u32,
        align: u32,
    ) -> usize {
        let idx = self.sections.len();
        self.sections.push(Section {
            name: name.to_string(),
            kind,
            sh_type,
            flags,
            align,
            addr: 0,
            size: 0,
            link: None,
            info: 0,
            frags: Vec::new(),
            order: Vec::new(),
        });
        idx
    }

    pub fn find_section(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    /// Append a fragment at the aligned end of the section chain. Keeps the
    /// section size in step with the chain end.
    pub fn append_fragment(
        &mut self,
        sect: usize,
        kind: FragmentKind,
        size: u32,
        align: u32,
    ) -> usize {
        let section = &mut self.sections[sect];
        let offset = align_up(section.chain_end(), align);
        let idx = section.frags.len();
        section.frags.push(Fragment { kind, offset, size, parent: sect });
        section.order.push(idx);
        section.size = section.chain_end();
        idx
    }

    /// Splice a fragment into the chain right after `after_pos` (a position
    /// in the order list, not an arena index). The new fragment gets a
    /// provisional offset; followers keep stale offsets until relaxation
    /// reconciles them.
    pub fn insert_fragment_after(
        &mut self,
        sect: usize,
        after_pos: usize,
        kind: FragmentKind,
        size: u32,
    ) -> usize {
        let section = &mut self.sections[sect];
        let prev_idx = section.order[after_pos];
        let offset = section.frags[prev_idx].offset + section.frags[prev_idx].size;
        let idx = section.frags.len();
        section.frags.push(Fragment { kind, offset, size, parent: sect });
        section.order.insert(after_pos + 1, idx);
        idx
    }

    /// Position of an arena index within the section's chain order.
    pub fn chain_position(&self, sect: usize, frag: usize) -> Option<usize> {
        self.sections[sect].order.iter().position(|&f| f == frag)
    }

    /// Move all fragments of `from` onto the end of `to`, re-parenting and
    /// re-offsetting them. Used for attribute adoption and generic merging.
    pub fn move_section_data(&mut self, from: usize, to: usize) {
        let order = std::mem::take(&mut self.sections[from].order);
        let frags = std::mem::take(&mut self.sections[from].frags);
        self.sections[from].size = 0;
        for idx in order {
            let f = &frags[idx];
            let align = if idx == 0 { self.sections[to].align.max(1) } else { 1 };
            self.append_fragment(to, f.kind.clone(), f.size, align);
        }
    }

    pub fn add_reloc_section(&mut self, link: usize) -> usize {
        self.reloc_sections.push(RelocSection { link, relocs: Vec::new() });
        self.reloc_sections.len() - 1
    }

    // ── Fragment byte access (Region fragments only) ─────────────────────────

    pub fn read_word(&self, at: FragmentRef) -> u32 {
        match &self.sections[at.sect].frags[at.frag].kind {
            FragmentKind::Region { data } => read_u32_le(data, at.offset as usize),
            _ => 0,
        }
    }

    pub fn write_word(&mut self, at: FragmentRef, val: u32) {
        if let FragmentKind::Region { data } = &mut self.sections[at.sect].frags[at.frag].kind {
            write_u32_le(data, at.offset as usize, val);
        }
    }

    pub fn read_half(&self, at: FragmentRef) -> u16 {
        match &self.sections[at.sect].frags[at.frag].kind {
            FragmentKind::Region { data } => read_u16_le(data, at.offset as usize),
            _ => 0,
        }
    }

    pub fn write_half(&mut self, at: FragmentRef, val: u16) {
        if let FragmentKind::Region { data } = &mut self.sections[at.sect].frags[at.frag].kind {
            write_u16_le(data, at.offset as usize, val);
        }
    }
}

// ── Standard output sections ─────────────────────────────────────────────────

/// The generic ELF file format's standard output sections, by id. Created by
/// the outer linker; the backend consumes the ids but never owns the table.
#[derive(Clone, Copy, Debug)]
pub struct FileFormat {
    pub text: usize,
    pub bss: usize,
    pub tbss: usize,
    pub symtab: usize,
    pub strtab: usize,
    pub dynamic: usize,
    pub got: usize,
    pub plt: usize,
    pub rel_dyn: usize,
    pub rel_plt: usize,
}

impl FileFormat {
    pub fn create(module: &mut Module) -> FileFormat {
        let text = module.create_section(
            ".text", SectionKind::Regular, SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 4);
        let bss = module.create_section(
            ".bss", SectionKind::Regular, SHT_NOBITS, SHF_ALLOC | SHF_WRITE, 4);
        let tbss = module.create_section(
            ".tbss", SectionKind::Regular, SHT_NOBITS, SHF_ALLOC | SHF_WRITE | SHF_TLS, 4);
        let symtab = module.create_section(
            ".symtab", SectionKind::NamePool, SHT_SYMTAB, 0, 4);
        let strtab = module.create_section(
            ".strtab", SectionKind::NamePool, SHT_STRTAB, 0, 1);
        let dynamic = module.create_section(
            ".dynamic", SectionKind::NamePool, SHT_DYNAMIC, SHF_ALLOC | SHF_WRITE, 4);
        let got = module.create_section(
            ".got", SectionKind::Regular, SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, 4);
        let plt = module.create_section(
            ".plt", SectionKind::Regular, SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, 4);
        let rel_dyn = module.create_section(
            ".rel.dyn", SectionKind::Relocation, SHT_REL, SHF_ALLOC, 4);
        let rel_plt = module.create_section(
            ".rel.plt", SectionKind::Relocation, SHT_REL, SHF_ALLOC, 4);
        FileFormat { text, bss, tbss, symtab, strtab, dynamic, got, plt, rel_dyn, rel_plt }
    }

    pub fn has_got(&self, module: &Module) -> bool {
        module.sections[self.got].size != 0
    }

    pub fn has_plt(&self, module: &Module) -> bool {
        module.sections[self.plt].size != 0
    }
}
