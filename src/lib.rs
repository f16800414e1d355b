//! ARM/Thumb ELF link-editor backend.
//!
//! The target-specific core of a static/dynamic linker for 32-bit ARM:
//! relocation scanning (GOT/PLT/dynamic-relocation reservation and copy
//! relocations), GOT and PLT layout and emission, branch relaxation with
//! ARM↔Thumb interworking veneers, the ARM unwind-table sections and their
//! boundary symbols, and the `PT_ARM_EXIDX` program header.
//!
//! The surrounding linker shell owns option parsing, generic ELF I/O, symbol
//! resolution, and address assignment; it drives the backend through the
//! lifecycle hooks on [`ArmBackend`] in this order: `init_target_sections`,
//! per-input `read_section`/`merge_section`, `init_target_symbols`,
//! `init_relocator`, `init_target_stubs`, per-relocation `scan_relocation`,
//! `do_pre_layout`, the layout pass, `do_relax` until finished,
//! `do_post_layout`, `do_create_program_hdrs`, `apply_relocations`, and
//! per-section `emit_section_data`.

pub mod backend;
pub mod config;
pub mod diag;
pub mod dynamic;
pub mod dynrel;
pub mod got;
pub mod module;
pub mod plt;
pub mod registry;
pub mod relax;
pub mod reloc;
pub mod stub;
pub mod symbols;
pub mod types;

mod emit;
mod scan;

pub use backend::ArmBackend;
pub use config::{CodeGenType, LinkerConfig};
pub use registry::{create_arm_backend, register_arm_targets, TargetRegistry};
