//! Long-branch veneers and branch islands.
//!
//! Four stub prototypes cover the instruction-set transitions (ARM→ARM,
//! ARM→Thumb, Thumb→Thumb, Thumb→ARM), each in a PIC and a non-PIC flavor.
//! The factory picks a prototype by the relocation's source ISA, the target
//! ISA (bit 0 of the resolved value), and the branch displacement, then
//! splices the veneer into a branch island in the caller's fragment chain.

use std::collections::HashMap;

use crate::module::{FragmentKind, FragmentRef, Module};
use crate::symbols::{Binding, SymbolType, Visibility};
use crate::types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StubKind {
    ArmToArm,
    ArmToThumb,
    ThumbToThumb,
    ThumbToArm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Isa {
    Arm,
    Thumb,
}

fn branch_source_isa(reloc_ty: u32) -> Option<Isa> {
    match reloc_ty {
        R_ARM_CALL | R_ARM_JUMP24 | R_ARM_PLT32 => Some(Isa::Arm),
        R_ARM_THM_CALL | R_ARM_THM_XPC22 | R_ARM_THM_JUMP24 | R_ARM_THM_JUMP19 => {
            Some(Isa::Thumb)
        }
        _ => None,
    }
}

/// Maximum forward displacement the relocation's branch encoding reaches.
fn branch_range(reloc_ty: u32) -> i64 {
    match reloc_ty {
        // ARM B/BL: signed imm24 << 2
        R_ARM_CALL | R_ARM_JUMP24 | R_ARM_PLT32 => 0x0200_0000,
        // Thumb-2 BL/B.W: 25-bit signed
        R_ARM_THM_CALL | R_ARM_THM_XPC22 | R_ARM_THM_JUMP24 => 0x0100_0000,
        // Thumb-2 conditional B.W
        R_ARM_THM_JUMP19 => 0x0010_0000,
        _ => i64::MAX,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StubPrototype {
    pub kind: StubKind,
    pub pic: bool,
}

impl StubPrototype {
    pub fn new(kind: StubKind, pic: bool) -> StubPrototype {
        StubPrototype { kind, pic }
    }

    fn source(&self) -> Isa {
        match self.kind {
            StubKind::ArmToArm | StubKind::ArmToThumb => Isa::Arm,
            StubKind::ThumbToThumb | StubKind::ThumbToArm => Isa::Thumb,
        }
    }

    fn target(&self) -> Isa {
        match self.kind {
            StubKind::ArmToArm | StubKind::ThumbToArm => Isa::Arm,
            StubKind::ArmToThumb | StubKind::ThumbToThumb => Isa::Thumb,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            StubKind::ArmToArm => "a2a_veneer",
            StubKind::ArmToThumb => "a2t_veneer",
            StubKind::ThumbToThumb => "t2t_veneer",
            StubKind::ThumbToArm => "t2a_veneer",
        }
    }

    pub fn size(&self) -> u32 {
        match (self.kind, self.pic) {
            (StubKind::ArmToArm, false) => 8,
            (StubKind::ArmToArm, true) => 12,
            (StubKind::ArmToThumb, false) => 12,
            (StubKind::ArmToThumb, true) => 16,
            (StubKind::ThumbToArm, false) => 12,
            (StubKind::ThumbToArm, true) => 16,
            (StubKind::ThumbToThumb, false) => 16,
            (StubKind::ThumbToThumb, true) => 20,
        }
    }

    /// Whether the veneer is entered in Thumb state (its symbol then carries
    /// the Thumb bit).
    pub fn thumb_entry(&self) -> bool {
        self.source() == Isa::Thumb
    }

    /// Decide whether this prototype must interpose for the branch.
    pub fn matches(&self, reloc_ty: u32, sym_value: u32, pc: u32) -> bool {
        let source = match branch_source_isa(reloc_ty) {
            Some(isa) => isa,
            None => return false,
        };
        let target = if sym_value & 1 != 0 { Isa::Thumb } else { Isa::Arm };
        if source != self.source() || target != self.target() {
            return false;
        }

        if source != target {
            // Plain branches have no interworking form; BL rewrites to BLX
            // and only needs a veneer when out of range.
            match reloc_ty {
                R_ARM_JUMP24 | R_ARM_THM_JUMP24 | R_ARM_THM_JUMP19 => return true,
                _ => {}
            }
        }

        let offset = (sym_value & !1) as i64 - pc as i64;
        offset >= branch_range(reloc_ty) || offset < -branch_range(reloc_ty)
    }

    /// Materialize the veneer bytes for a resolved target.
    pub fn emit(&self, stub_addr: u32, target: u32, out: &mut Vec<u8>) {
        let push32 = |out: &mut Vec<u8>, w: u32| out.extend_from_slice(&w.to_le_bytes());
        let push16 = |out: &mut Vec<u8>, h: u16| out.extend_from_slice(&h.to_le_bytes());
        match (self.kind, self.pic) {
            (StubKind::ArmToArm, false) => {
                push32(out, 0xe51f_f004); // ldr pc, [pc, #-4]
                push32(out, target);
            }
            (StubKind::ArmToArm, true) => {
                push32(out, 0xe59f_c000); // ldr ip, [pc, #0]
                push32(out, 0xe08f_f00c); // add pc, pc, ip
                push32(out, target.wrapping_sub(stub_addr + 12));
            }
            (StubKind::ArmToThumb, false) => {
                push32(out, 0xe59f_c000); // ldr ip, [pc, #0]
                push32(out, 0xe12f_ff1c); // bx ip
                push32(out, target | 1);
            }
            (StubKind::ArmToThumb, true) => {
                push32(out, 0xe59f_c004); // ldr ip, [pc, #4]
                push32(out, 0xe08f_c00c); // add ip, pc, ip
                push32(out, 0xe12f_ff1c); // bx ip
                push32(out, (target | 1).wrapping_sub(stub_addr + 12));
            }
            (StubKind::ThumbToArm, false) => {
                push16(out, 0x4778); // bx pc
                push16(out, 0x46c0); // nop
                push32(out, 0xe51f_f004); // ldr pc, [pc, #-4]
                push32(out, target);
            }
            (StubKind::ThumbToArm, true) => {
                push16(out, 0x4778); // bx pc
                push16(out, 0x46c0); // nop
                push32(out, 0xe59f_c000); // ldr ip, [pc, #0]
                push32(out, 0xe08f_f00c); // add pc, pc, ip
                push32(out, target.wrapping_sub(stub_addr + 16));
            }
            (StubKind::ThumbToThumb, false) => {
                push16(out, 0x4778); // bx pc
                push16(out, 0x46c0); // nop
                push32(out, 0xe59f_c000); // ldr ip, [pc, #0]
                push32(out, 0xe12f_ff1c); // bx ip
                push32(out, target | 1);
            }
            (StubKind::ThumbToThumb, true) => {
                push16(out, 0x4778); // bx pc
                push16(out, 0x46c0); // nop
                push32(out, 0xe59f_c004); // ldr ip, [pc, #4]
                push32(out, 0xe08f_c00c); // add ip, pc, ip
                push32(out, 0xe12f_ff1c); // bx ip
                push32(out, (target | 1).wrapping_sub(stub_addr + 16));
            }
        }
    }
}

/// A synthesized veneer living in a branch island.
#[derive(Debug)]
pub struct Stub {
    pub proto: StubPrototype,
    /// The stub's own local symbol.
    pub sym: usize,
    /// Symbol the veneer bridges to.
    pub target_sym: usize,
    /// The stub's fragment in the text chain.
    pub frag: FragmentRef,
    pub island: usize,
    /// Final bytes, materialized during relocation application.
    pub bytes: Vec<u8>,
}

/// A contiguous cluster of stubs spliced into the fragment chain after a
/// fixed entry fragment.
#[derive(Debug)]
pub struct BranchIsland {
    pub sect: usize,
    /// Arena index of the fragment the island follows.
    pub entry: usize,
    /// Arena indices of the stub fragments, in insertion order.
    pub stubs: Vec<usize>,
}

impl BranchIsland {
    /// Offset of the island's first byte within the section.
    pub fn offset(&self, module: &Module) -> u32 {
        let section = &module.sections[self.sect];
        match self.stubs.first() {
            Some(&first) => section.frags[first].offset,
            None => section.frags[self.entry].offset + section.frags[self.entry].size,
        }
    }

    pub fn size(&self, module: &Module) -> u32 {
        let section = &module.sections[self.sect];
        self.stubs.iter().map(|&f| section.frags[f].size).sum()
    }

    /// The fragment immediately following the island in the chain, if any.
    pub fn exit_frag(&self, module: &Module) -> Option<usize> {
        let last = self.stubs.last().copied().unwrap_or(self.entry);
        let pos = module.chain_position(self.sect, last)?;
        module.sections[self.sect].order.get(pos + 1).copied()
    }
}

#[derive(Default, Debug)]
pub struct BranchIslandFactory {
    islands: Vec<BranchIsland>,
}

impl BranchIslandFactory {
    pub fn new() -> BranchIslandFactory {
        BranchIslandFactory::default()
    }

    pub fn islands(&self) -> &[BranchIsland] {
        &self.islands
    }

    pub fn island_mut(&mut self, id: usize) -> &mut BranchIsland {
        &mut self.islands[id]
    }

    /// Island hosting stubs for branches located in `entry_frag`.
    pub fn find_or_create(&mut self, sect: usize, entry_frag: usize) -> usize {
        if let Some(pos) = self
            .islands
            .iter()
            .position(|i| i.sect == sect && i.entry == entry_frag)
        {
            return pos;
        }
        self.islands.push(BranchIsland { sect, entry: entry_frag, stubs: Vec::new() });
        self.islands.len() - 1
    }
}

/// Outcome of a stub request.
#[derive(Debug)]
pub struct StubRequest {
    pub stub: usize,
    /// False when an existing veneer in the island was reused.
    pub created: bool,
}

#[derive(Default, Debug)]
pub struct StubFactory {
    prototypes: Vec<StubPrototype>,
    stubs: Vec<Stub>,
    reuse: HashMap<(usize, usize, StubKind), usize>,
}

impl StubFactory {
    pub fn new() -> StubFactory {
        StubFactory::default()
    }

    pub fn add_prototype(&mut self, proto: StubPrototype) {
        self.prototypes.push(proto);
    }

    pub fn num_prototypes(&self) -> usize {
        self.prototypes.len()
    }

    pub fn stubs(&self) -> &[Stub] {
        &self.stubs
    }

    pub fn stub_mut(&mut self, id: usize) -> &mut Stub {
        &mut self.stubs[id]
    }

    /// Decide whether the branch at `site` needs a veneer to reach
    /// `sym_value`, and splice one into an island if so. Returns `None`
    /// when every prototype declines (in range, or not a branch we relax).
    pub fn create(
        &mut self,
        module: &mut Module,
        islands: &mut BranchIslandFactory,
        reloc_ty: u32,
        site: FragmentRef,
        target_sym: usize,
        sym_value: u32,
    ) -> Option<StubRequest> {
        let pc = site.output_addr(module);
        let proto = *self
            .prototypes
            .iter()
            .find(|p| p.matches(reloc_ty, sym_value, pc))?;

        let island_id = islands.find_or_create(site.sect, site.frag);
        let key = (island_id, target_sym, proto.kind);
        if let Some(&existing) = self.reuse.get(&key) {
            return Some(StubRequest { stub: existing, created: false });
        }

        // Splice the stub fragment after the island's current tail.
        let island = islands.island_mut(island_id);
        let tail = island.stubs.last().copied().unwrap_or(island.entry);
        let tail_pos = module
            .chain_position(site.sect, tail)
            .expect("island tail fell out of the fragment chain");
        let stub_id = self.stubs.len();
        let frag_idx = module.insert_fragment_after(
            site.sect,
            tail_pos,
            FragmentKind::Stub { stub: stub_id },
            proto.size(),
        );
        island.stubs.push(frag_idx);

        let frag = FragmentRef::new(site.sect, frag_idx, 0);
        let value = if proto.thumb_entry() { 1 } else { 0 };
        let name = format!("__{}_{}", proto.name(), stub_id);
        let sym = module.symbols.add_force(
            &name,
            SymbolType::Function,
            Binding::Local,
            Visibility::Default,
            proto.size(),
            value,
            Some(frag),
        );

        self.stubs.push(Stub {
            proto,
            sym,
            target_sym,
            frag,
            island: island_id,
            bytes: Vec::new(),
        });
        self.reuse.insert(key, stub_id);
        Some(StubRequest { stub: stub_id, created: true })
    }
}
