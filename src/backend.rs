//! The ARM GNU/ELF backend coordinator.
//!
//! Owns the relocator, GOT, PLT, `.rel.dyn`, `.rel.plt`, `.dynamic`, the ARM
//! target sections and the synthetic symbols, and drives them through the
//! lifecycle the outer linker calls in order: section init, symbol init,
//! relocator/stub init, per-input merging, relocation scanning, pre-layout
//! sizing, relaxation, post-layout application, program headers, emission.

use crate::config::{CodeGenType, LinkerConfig};
use crate::diag::Diagnostics;
use crate::dynamic::ElfDynamic;
use crate::dynrel::OutputRelocSection;
use crate::got::Got;
use crate::module::{FileFormat, FragmentKind, FragmentRef, Module, SectionKind};
use crate::plt::Plt;
use crate::reloc::Relocator;
use crate::stub::{BranchIslandFactory, StubFactory, StubKind, StubPrototype};
use crate::symbols::{Binding, SymbolType, Visibility};
use crate::types::*;

#[derive(Debug)]
pub struct ArmBackend {
    config: LinkerConfig,
    pub diagnostics: Diagnostics,
    format: Option<FileFormat>,
    pub(crate) got: Option<Got>,
    pub(crate) plt: Option<Plt>,
    pub(crate) rel_dyn: Option<OutputRelocSection>,
    pub(crate) rel_plt: Option<OutputRelocSection>,
    pub(crate) dynamic: Option<ElfDynamic>,
    pub(crate) relocator: Option<Relocator>,
    pub(crate) got_symbol: Option<usize>,
    exidx_start: Option<usize>,
    exidx_end: Option<usize>,
    pub(crate) exidx: Option<usize>,
    pub(crate) extab: Option<usize>,
    pub(crate) attributes: Option<usize>,
    pub(crate) stub_factory: Option<StubFactory>,
    pub(crate) island_factory: Option<BranchIslandFactory>,
}

impl ArmBackend {
    pub fn new(config: LinkerConfig) -> ArmBackend {
        ArmBackend {
            config,
            diagnostics: Diagnostics::new(),
            format: None,
            got: None,
            plt: None,
            rel_dyn: None,
            rel_plt: None,
            dynamic: None,
            relocator: None,
            got_symbol: None,
            exidx_start: None,
            exidx_end: None,
            exidx: None,
            extab: None,
            attributes: None,
            stub_factory: None,
            island_factory: None,
        }
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn format(&self) -> &FileFormat {
        self.format.as_ref().expect("output format not initialized")
    }

    // Resource accessors are contractually non-null once the matching init
    // hook has run; a miss here is a driver sequencing bug.

    pub fn got(&self) -> &Got {
        self.got.as_ref().expect("GOT section not exist")
    }

    pub fn got_mut(&mut self) -> &mut Got {
        self.got.as_mut().expect("GOT section not exist")
    }

    pub fn plt(&self) -> &Plt {
        self.plt.as_ref().expect("PLT section not exist")
    }

    pub fn plt_mut(&mut self) -> &mut Plt {
        self.plt.as_mut().expect("PLT section not exist")
    }

    pub fn rel_dyn(&self) -> &OutputRelocSection {
        self.rel_dyn.as_ref().expect(".rel.dyn section not exist")
    }

    pub fn rel_dyn_mut(&mut self) -> &mut OutputRelocSection {
        self.rel_dyn.as_mut().expect(".rel.dyn section not exist")
    }

    pub fn rel_plt(&self) -> &OutputRelocSection {
        self.rel_plt.as_ref().expect(".rel.plt section not exist")
    }

    pub fn rel_plt_mut(&mut self) -> &mut OutputRelocSection {
        self.rel_plt.as_mut().expect(".rel.plt section not exist")
    }

    pub fn dynamic(&self) -> &ElfDynamic {
        self.dynamic.as_ref().expect(".dynamic section not exist")
    }

    pub fn got_symbol_id(&self) -> Option<usize> {
        self.got_symbol
    }

    pub fn exidx_section(&self) -> Option<usize> {
        self.exidx
    }

    pub fn exidx_symbols(&self) -> (Option<usize>, Option<usize>) {
        (self.exidx_start, self.exidx_end)
    }

    /// Create the ARM target sections, and the GOT/PLT/dynamic-relocation
    /// machinery when the output is linked (executable or shared object).
    pub fn init_target_sections(&mut self, module: &mut Module, format: FileFormat) {
        self.exidx = Some(module.create_section(
            ".ARM.exidx",
            SectionKind::Target,
            SHT_ARM_EXIDX,
            SHF_ALLOC | SHF_LINK_ORDER,
            self.config.word_size(),
        ));
        self.extab = Some(module.create_section(
            ".ARM.extab",
            SectionKind::Target,
            SHT_PROGBITS,
            SHF_ALLOC,
            1,
        ));
        self.attributes = Some(module.create_section(
            ".ARM.attributes",
            SectionKind::Target,
            SHT_ARM_ATTRIBUTES,
            0,
            1,
        ));

        if self.config.codegen != CodeGenType::Object {
            self.got = Some(Got::new(format.got));
            self.plt = Some(Plt::new(format.plt));
            module.sections[format.rel_plt].link = Some(format.plt);
            self.rel_plt = Some(OutputRelocSection::new(format.rel_plt));
            self.rel_dyn = Some(OutputRelocSection::new(format.rel_dyn));
        }
        self.format = Some(format);
    }

    /// Declare `_GLOBAL_OFFSET_TABLE_` and the unwind-index boundary
    /// symbols. Runs after input sections are merged, so `.ARM.exidx`
    /// content decides whether the boundary symbols anchor to it or
    /// collapse to absolute zero.
    pub fn init_target_symbols(&mut self, module: &mut Module) {
        self.got_symbol = module.symbols.add_as_referred(
            "_GLOBAL_OFFSET_TABLE_",
            SymbolType::Object,
            Binding::Local,
            Visibility::Hidden,
            0,
            0,
            None,
        );

        let exidx = self.exidx.expect(".ARM.exidx section not exist");
        let exidx_size = module.sections[exidx].size;
        if exidx_size != 0 && module.sections[exidx].has_content() {
            let front = module.sections[exidx].front_frag().unwrap();
            let start_ref = FragmentRef::new(exidx, front, 0);
            let end_ref = FragmentRef::new(exidx, front, exidx_size);
            self.exidx_start = module.symbols.add_as_referred(
                "__exidx_start",
                SymbolType::Object,
                Binding::Local,
                Visibility::Default,
                0,
                0,
                Some(start_ref),
            );
            self.exidx_end = module.symbols.add_as_referred(
                "__exidx_end",
                SymbolType::Object,
                Binding::Local,
                Visibility::Default,
                0,
                0,
                Some(end_ref),
            );
            if let Some(id) = self.exidx_start {
                module.symbols.change_local_to_dynamic(id);
            }
            if let Some(id) = self.exidx_end {
                module.symbols.change_local_to_dynamic(id);
            }
        } else {
            self.exidx_start = module.symbols.add_as_referred(
                "__exidx_start",
                SymbolType::NoType,
                Binding::Absolute,
                Visibility::Default,
                0,
                0,
                None,
            );
            self.exidx_end = module.symbols.add_as_referred(
                "__exidx_end",
                SymbolType::NoType,
                Binding::Absolute,
                Visibility::Default,
                0,
                0,
                None,
            );
        }
    }

    pub fn init_relocator(&mut self) -> bool {
        if self.relocator.is_none() {
            self.relocator = Some(Relocator::new());
        }
        true
    }

    /// Register the four veneer prototypes, each configured for the
    /// current PIC mode.
    pub fn init_target_stubs(&mut self) -> bool {
        let pic = self.config.is_code_indep;
        let mut factory = StubFactory::new();
        factory.add_prototype(StubPrototype::new(StubKind::ArmToArm, pic));
        factory.add_prototype(StubPrototype::new(StubKind::ArmToThumb, pic));
        factory.add_prototype(StubPrototype::new(StubKind::ThumbToThumb, pic));
        factory.add_prototype(StubPrototype::new(StubKind::ThumbToArm, pic));
        self.stub_factory = Some(factory);
        self.island_factory = Some(BranchIslandFactory::new());
        true
    }

    /// Size the backend-owned sections before the generic layout pass runs.
    pub fn do_pre_layout(&mut self, module: &mut Module) {
        if !self.config.is_code_static && self.dynamic.is_none() {
            let format = *self.format();
            self.dynamic = Some(ElfDynamic::new(format.dynamic));
        }

        if self.config.codegen == CodeGenType::Object {
            return;
        }

        // the .got section is a must when building a shared object
        let needs_got = self.config.is_dyn_obj()
            || self.got().has_got1()
            || self.got_symbol.is_some();
        if needs_got {
            self.got_mut().finalize_section_size(module);
            self.define_got_symbol(module);
        }

        if self.plt().has_plt1() || self.config.is_dyn_obj() {
            self.plt_mut().finalize_section_size(module);
        }

        if !self.rel_dyn().empty() {
            assert!(
                !self.config.is_code_static,
                "static linkage should not result in a dynamic relocation section"
            );
            self.rel_dyn().finalize_section_size(module);
        }
        if !self.rel_plt().empty() {
            assert!(
                !self.config.is_code_static,
                "static linkage should not result in a dynamic relocation section"
            );
            self.rel_plt().finalize_section_size(module);
        }

        if let Some(dynamic) = self.dynamic.as_mut() {
            let rel_dyn_empty = self.rel_dyn.as_ref().map(|r| r.empty()).unwrap_or(true);
            let rel_plt_empty = self.rel_plt.as_ref().map(|r| r.empty()).unwrap_or(true);
            dynamic.reserve_entries(module, rel_dyn_empty, rel_plt_empty);
        }
    }

    /// Anchor `_GLOBAL_OFFSET_TABLE_` at byte 0 of the materialized GOT.
    fn define_got_symbol(&mut self, module: &mut Module) {
        let front = self.got().front_ref();
        let id = module.symbols.add_force(
            "_GLOBAL_OFFSET_TABLE_",
            SymbolType::Object,
            Binding::Local,
            Visibility::Hidden,
            0,
            0,
            Some(front),
        );
        self.got_symbol = Some(id);
    }

    /// Fill the PLT and GOT with final addresses once layout fixed them.
    pub fn do_post_layout(&mut self, module: &mut Module) {
        let format = *self.format();

        if format.has_plt(module) {
            let plt = self.plt.as_mut().expect("PLT sized but manager not exist");
            let got = self.got.as_mut().expect("GOT section not exist");
            let got_addr = module.sections[format.got].addr;
            plt.apply_plt0(module, got_addr);
            plt.apply_plt1(module, got);

            // one R_ARM_JUMP_SLOT per PLT1, against the paired GOT slot
            let entries: Vec<usize> = plt.entries().to_vec();
            let rel_plt = self.rel_plt.as_mut().expect(".rel.plt section not exist");
            for (i, sym) in entries.iter().enumerate() {
                let slot = self.got.as_ref().unwrap().plt_slot_ref(i);
                let entry = rel_plt.consume_entry();
                entry.ty = R_ARM_JUMP_SLOT;
                entry.target = Some(slot);
                entry.sym = Some(*sym);
            }
        }

        if format.has_got(module) {
            let got = self.got.as_mut().expect("GOT section not exist");
            if self.config.codegen == CodeGenType::DynObj {
                got.apply_got0(module.sections[format.dynamic].addr);
            } else {
                // executable and relocatable output: fill with zero
                got.apply_got0(0);
            }
        }

        if let Some(dynamic) = self.dynamic.as_mut() {
            dynamic.apply_entries(module, &format);
        }
    }

    /// Ordering class for the backend-owned output sections.
    pub fn get_target_section_order(&self, _module: &Module, sect: usize) -> u32 {
        let format = self.format();
        if sect == format.got {
            if self.config.has_now {
                return SHO_RELRO_LAST;
            }
            return SHO_DATA;
        }
        if sect == format.plt {
            return SHO_PLT;
        }
        // keep .ARM.exidx / .ARM.extab in the same order as .eh_frame
        if Some(sect) == self.exidx || Some(sect) == self.extab {
            return SHO_EXCEPTION;
        }
        SHO_UNDEFINED
    }

    /// Produce the `PT_ARM_EXIDX` segment when the unwind index has content.
    pub fn do_create_program_hdrs(&mut self, module: &mut Module) {
        let exidx = match self.exidx {
            Some(s) if module.sections[s].size != 0 => s,
            _ => return,
        };
        module.segments.push(crate::module::Segment {
            p_type: PT_ARM_EXIDX,
            flags: PF_R,
            sections: vec![exidx],
        });
    }

    /// Merge one input section into the output. `.ARM.attributes` keeps the
    /// first input's content and drops the rest (known limitation; a full
    /// merge would combine attributes per the ABI). Everything else goes
    /// through the generic path: adopt into the same-named output section.
    pub fn merge_section(&mut self, module: &mut Module, input_sect: usize) -> bool {
        if module.sections[input_sect].sh_type == SHT_ARM_ATTRIBUTES {
            let attributes = self.attributes.expect(".ARM.attributes section not exist");
            if module.sections[attributes].size != 0 {
                return true;
            }
            module.move_section_data(input_sect, attributes);
            return true;
        }

        let name = module.sections[input_sect].name.clone();
        let out = module
            .sections
            .iter()
            .position(|s| s.name == name && s.kind != SectionKind::Relocation);
        match out {
            Some(out) if out != input_sect => {
                module.move_section_data(input_sect, out);
                true
            }
            _ => true,
        }
    }

    /// Wrap one input section's file bytes in a fragment and append it to
    /// the target section data. A null region becomes a virtual fill.
    pub fn read_section(&mut self, module: &mut Module, sect: usize, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            module.append_fragment(sect, FragmentKind::Fill { value: 0, value_size: 0 }, 0, 1);
        } else {
            module.append_fragment(
                sect,
                FragmentKind::Region { data: bytes.to_vec() },
                bytes.len() as u32,
                1,
            );
        }
        true
    }
}
