//! Branch relaxation.
//!
//! One pass walks every input relocation, asks the stub factory for veneers
//! on out-of-range or interworking branches, grows `.symtab`/`.strtab` for
//! each veneer's local symbol, then reconciles fragment offsets disturbed by
//! island insertion. The outer linker loops until a pass neither creates a
//! stub nor moves a fragment. Termination is monotone: stubs only add
//! content, and once every branch reaches its target further passes are
//! no-ops.

use crate::backend::ArmBackend;
use crate::module::Module;
use crate::symbols::Reserved;
use crate::types::*;

pub struct RelaxResult {
    /// A veneer was created this pass.
    pub relaxed: bool,
    /// No island overran its exit fragment; the fixed point is reached.
    pub finished: bool,
}

impl ArmBackend {
    pub fn do_relax(&mut self, module: &mut Module) -> RelaxResult {
        assert!(
            self.stub_factory.is_some() && self.island_factory.is_some(),
            "stub factories not initialized"
        );
        let format = *self.format();
        let mut relaxed = false;

        // 1. stub requests for every branch relocation
        for rs in 0..module.reloc_sections.len() {
            for r in 0..module.reloc_sections[rs].relocs.len() {
                let (ty, target, sym_id) = {
                    let reloc = &module.reloc_sections[rs].relocs[r];
                    (reloc.ty, reloc.target, reloc.sym)
                };
                match ty {
                    R_ARM_CALL | R_ARM_JUMP24 | R_ARM_PLT32 | R_ARM_THM_CALL
                    | R_ARM_THM_XPC22 | R_ARM_THM_JUMP24 | R_ARM_THM_JUMP19 | R_ARM_V4BX => {}
                    _ => continue,
                }

                // candidate symbol address
                let mut sym_value = 0u32;
                {
                    let sym = module.symbols.get(sym_id);
                    if let Some(frag_ref) = sym.frag_ref {
                        sym_value = frag_ref.output_addr(module);
                        if sym.is_thumb_func() {
                            sym_value |= 1;
                        }
                    }
                    if sym.is_global() && sym.reserved.contains_any(Reserved::PLT) {
                        // the PLT section base, not the exact PLT1 slot;
                        // the extra hop through PLT0 is tolerated
                        assert!(
                            module.sections[format.plt].size != 0,
                            "PLT reserved but not sized"
                        );
                        sym_value = module.sections[format.plt].addr;
                    }
                }

                let created = {
                    let factory = self.stub_factory.as_mut().unwrap();
                    let islands = self.island_factory.as_mut().unwrap();
                    match factory.create(module, islands, ty, target, sym_id, sym_value) {
                        Some(req) => Some((req.stub, req.created, factory.stubs()[req.stub].sym)),
                        None => None,
                    }
                };
                if let Some((stub_id, was_created, stub_sym)) = created {
                    module.reloc_sections[rs].relocs[r].stub = Some(stub_id);
                    if was_created {
                        // a stub symbol is always local: one more .symtab
                        // record, one more .strtab string
                        let name_len = module.symbols.get(stub_sym).name.len() as u32;
                        assert!(module.symbols.get(stub_sym).is_local());
                        let sym_size = if self.config().is_32bit() {
                            ELF32_SYM_SIZE
                        } else {
                            ELF64_SYM_SIZE
                        };
                        module.sections[format.symtab].size += sym_size;
                        module.sections[format.symtab].info += 1;
                        module.sections[format.strtab].size += name_len + 1;
                        relaxed = true;
                    }
                }
            }
        }

        // 2. find the first island whose stubs overran the fragment behind it
        let mut finished = true;
        let mut invalid: Option<(usize, usize)> = None;
        for island in self.island_factory.as_ref().unwrap().islands() {
            let exit = match island.exit_frag(module) {
                Some(exit) => exit,
                None => break, // island sits at the end of the chain
            };
            let exit_offset = module.sections[island.sect].frags[exit].offset;
            if island.offset(module) + island.size(module) > exit_offset {
                let pos = module
                    .chain_position(island.sect, exit)
                    .expect("exit fragment fell out of the chain");
                invalid = Some((island.sect, pos));
                finished = false;
                break;
            }
        }

        // 3. rewrite offsets from the first stale fragment onward
        if let Some((sect, pos)) = invalid {
            let section = &mut module.sections[sect];
            for i in pos..section.order.len() {
                let prev = section.order[i - 1];
                let cur = section.order[i];
                section.frags[cur].offset =
                    section.frags[prev].offset + section.frags[prev].size;
            }
        }

        // 4. stubs extend .text
        if relaxed {
            let text = &mut module.sections[format.text];
            text.size = text.chain_end();
        }

        RelaxResult { relaxed, finished }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkerConfig;
    use crate::module::{FileFormat, FragmentKind, FragmentRef, Relocation, SectionKind};
    use crate::symbols::{Binding, SymbolDesc, SymbolType};

    const TRIPLE: &str = "armv7-none-linux-gnueabi";

    struct Harness {
        backend: ArmBackend,
        module: Module,
        format: FileFormat,
        rs: usize,
    }

    /// A text section with two code fragments and a far-away ARM function.
    fn harness() -> Harness {
        let mut module = Module::new();
        let format = FileFormat::create(&mut module);
        module.append_fragment(format.text,
                               FragmentKind::Region { data: vec![0; 16] }, 16, 4);
        module.append_fragment(format.text,
                               FragmentKind::Region { data: vec![0; 16] }, 16, 4);
        module.sections[format.text].addr = 0x8000;
        let rs = module.add_reloc_section(format.text);

        let mut backend = ArmBackend::new(LinkerConfig::exec(TRIPLE));
        backend.init_target_sections(&mut module, format);
        backend.init_target_symbols(&mut module);
        backend.init_relocator();
        backend.init_target_stubs();
        Harness { backend, module, format, rs }
    }

    fn far_symbol(h: &mut Harness, name: &str, thumb: bool) -> usize {
        let far = h.module.create_section(".text.far", SectionKind::Regular, SHT_PROGBITS,
                                          SHF_ALLOC | SHF_EXECINSTR, 4);
        h.module.append_fragment(far, FragmentKind::Region { data: vec![0; 8] }, 8, 4);
        h.module.sections[far].addr = 0x0300_0000;
        let value = if thumb { 1 } else { 0 };
        h.module.symbols.add_input_symbol(name, SymbolType::Function, SymbolDesc::Define,
                                          Binding::Global, 8, value,
                                          Some(FragmentRef::new(far, 0, 0)))
    }

    fn run_to_fixed_point(h: &mut Harness) -> usize {
        let mut passes = 0;
        loop {
            let result = h.backend.do_relax(&mut h.module);
            passes += 1;
            assert!(passes < 16, "relaxation failed to converge");
            if result.finished && !result.relaxed {
                return passes;
            }
        }
    }

    #[test]
    fn test_near_call_creates_no_stub() {
        let mut h = harness();
        let near = h.module.symbols.add_input_symbol(
            "near", SymbolType::Function, SymbolDesc::Define, Binding::Global, 0, 0,
            Some(FragmentRef::new(h.format.text, 1, 0)));
        let target = FragmentRef::new(h.format.text, 0, 0);
        h.module.reloc_sections[h.rs].relocs.push(
            Relocation::new(R_ARM_CALL, target, near));
        let result = h.backend.do_relax(&mut h.module);
        assert!(!result.relaxed);
        assert!(result.finished);
        assert!(h.backend.stub_factory.as_ref().unwrap().stubs().is_empty());
    }

    #[test]
    fn test_far_thumb_call_to_arm_inserts_stub() {
        let mut h = harness();
        let callee = far_symbol(&mut h, "far_arm", false);
        let target = FragmentRef::new(h.format.text, 0, 4);
        h.module.reloc_sections[h.rs].relocs.push(
            Relocation::new(R_ARM_THM_CALL, target, callee));

        let symtab_before = h.module.sections[h.format.symtab].size;
        let strtab_before = h.module.sections[h.format.strtab].size;
        let text_before = h.module.sections[h.format.text].size;

        run_to_fixed_point(&mut h);

        let factory = h.backend.stub_factory.as_ref().unwrap();
        assert_eq!(factory.stubs().len(), 1);
        let stub = &factory.stubs()[0];
        assert!(matches!(stub.proto.kind, crate::stub::StubKind::ThumbToArm));
        // .text grew by the veneer size
        assert_eq!(h.module.sections[h.format.text].size,
                   text_before + stub.proto.size());
        // one local symbol record and its name
        assert_eq!(h.module.sections[h.format.symtab].size,
                   symtab_before + ELF32_SYM_SIZE);
        assert_eq!(h.module.sections[h.format.symtab].info, 1);
        let name_len = h.module.symbols.get(stub.sym).name.len() as u32;
        assert_eq!(h.module.sections[h.format.strtab].size, strtab_before + name_len + 1);
        // relocation retargeted at the veneer
        assert_eq!(h.module.reloc_sections[h.rs].relocs[0].stub, Some(0));
    }

    #[test]
    fn test_offsets_reconciled_after_insertion() {
        let mut h = harness();
        let callee = far_symbol(&mut h, "far_arm", false);
        let target = FragmentRef::new(h.format.text, 0, 0);
        h.module.reloc_sections[h.rs].relocs.push(
            Relocation::new(R_ARM_CALL, target, callee));

        run_to_fixed_point(&mut h);

        // every fragment's offset equals its predecessor's end
        let text = &h.module.sections[h.format.text];
        let mut expected = 0;
        for &idx in &text.order {
            assert_eq!(text.frags[idx].offset, expected);
            expected += text.frags[idx].size;
        }
        assert_eq!(text.size, expected);
    }

    #[test]
    fn test_extra_pass_after_fixed_point_is_noop() {
        let mut h = harness();
        let callee = far_symbol(&mut h, "far_arm", false);
        let target = FragmentRef::new(h.format.text, 0, 0);
        h.module.reloc_sections[h.rs].relocs.push(
            Relocation::new(R_ARM_CALL, target, callee));
        run_to_fixed_point(&mut h);

        let text_size = h.module.sections[h.format.text].size;
        let stub_count = h.backend.stub_factory.as_ref().unwrap().stubs().len();
        let result = h.backend.do_relax(&mut h.module);
        assert!(!result.relaxed);
        assert!(result.finished);
        assert_eq!(h.module.sections[h.format.text].size, text_size);
        assert_eq!(h.backend.stub_factory.as_ref().unwrap().stubs().len(), stub_count);
    }

    #[test]
    fn test_two_callers_one_target_share_island_stub() {
        let mut h = harness();
        let callee = far_symbol(&mut h, "far_arm", false);
        let t0 = FragmentRef::new(h.format.text, 0, 0);
        let t1 = FragmentRef::new(h.format.text, 0, 8);
        h.module.reloc_sections[h.rs].relocs.push(Relocation::new(R_ARM_CALL, t0, callee));
        h.module.reloc_sections[h.rs].relocs.push(Relocation::new(R_ARM_CALL, t1, callee));
        run_to_fixed_point(&mut h);
        assert_eq!(h.backend.stub_factory.as_ref().unwrap().stubs().len(), 1);
        assert_eq!(h.module.reloc_sections[h.rs].relocs[0].stub, Some(0));
        assert_eq!(h.module.reloc_sections[h.rs].relocs[1].stub, Some(0));
    }

    #[test]
    fn test_arm_to_thumb_jump_needs_stub_even_in_range() {
        let mut h = harness();
        let thumb = h.module.symbols.add_input_symbol(
            "thumb_fn", SymbolType::Function, SymbolDesc::Define, Binding::Global, 0, 1,
            Some(FragmentRef::new(h.format.text, 1, 0)));
        let target = FragmentRef::new(h.format.text, 0, 0);
        h.module.reloc_sections[h.rs].relocs.push(
            Relocation::new(R_ARM_JUMP24, target, thumb));
        run_to_fixed_point(&mut h);
        let factory = h.backend.stub_factory.as_ref().unwrap();
        assert_eq!(factory.stubs().len(), 1);
        assert!(matches!(factory.stubs()[0].proto.kind, crate::stub::StubKind::ArmToThumb));
    }
}
