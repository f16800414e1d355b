//! Byte-level emission of the backend-owned output sections.
//!
//! `.ARM.attributes`, `.ARM.exidx` and `.ARM.extab` are copied fragment by
//! fragment straight from the input; `.plt` and `.got` delegate to their
//! managers. Asking for any other section is an error.

use crate::backend::ArmBackend;
use crate::diag::Diagnostic;
use crate::module::{FragmentKind, Module};

impl ArmBackend {
    pub fn emit_section_data(
        &self,
        module: &Module,
        sect: usize,
        region: &mut [u8],
    ) -> Result<u64, String> {
        assert!(!region.is_empty(), "size of output region is zero");

        if Some(sect) == self.attributes || Some(sect) == self.exidx || Some(sect) == self.extab
        {
            return emit_fragments(module, sect, region);
        }

        let format = self.format();
        if sect == format.plt {
            return self.plt().emit(region);
        }
        if sect == format.got {
            return self.got().emit(region);
        }

        Err(Diagnostic::UnrecognizedOutputSection {
            section: module.sections[sect].name.clone(),
        }
        .to_string())
    }
}

fn emit_fragments(module: &Module, sect: usize, region: &mut [u8]) -> Result<u64, String> {
    let section = &module.sections[sect];
    let mut out = 0usize;
    for &idx in &section.order {
        let frag = &section.frags[idx];
        let size = frag.size as usize;
        if out + size > region.len() {
            return Err(format!(
                "section `{}' emission region too small: {} < {}",
                section.name,
                region.len(),
                out + size
            ));
        }
        match &frag.kind {
            FragmentKind::Fill { value, value_size } => {
                // a zero value size is a virtual fill, nothing to write
                if *value_size != 0 {
                    region[out..out + size].fill(*value);
                }
            }
            FragmentKind::Region { data } => {
                region[out..out + size].copy_from_slice(&data[..size]);
            }
            FragmentKind::Align { value, value_size } => match value_size {
                1 => region[out..out + size].fill(*value),
                _ => {
                    return Err(
                        "unsupported value size for alignment fragment emission".to_string()
                    )
                }
            },
            FragmentKind::Null => {
                assert_eq!(size, 0, "null fragment must have zero size");
            }
            FragmentKind::Stub { .. } => {
                panic!("stub fragment in a directly-emitted target section");
            }
        }
        out += size;
    }
    Ok(region.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkerConfig;
    use crate::module::FileFormat;

    const TRIPLE: &str = "armv7-none-linux-gnueabi";

    fn backend_with_module() -> (ArmBackend, Module) {
        let mut module = Module::new();
        let format = FileFormat::create(&mut module);
        let mut backend = ArmBackend::new(LinkerConfig::dyn_obj(TRIPLE));
        backend.init_target_sections(&mut module, format);
        (backend, module)
    }

    #[test]
    fn test_exidx_fragments_copied_verbatim() {
        let (mut backend, mut module) = backend_with_module();
        let exidx = backend.exidx_section().unwrap();
        backend.read_section(&mut module, exidx, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut region = vec![0u8; 8];
        backend.emit_section_data(&module, exidx, &mut region).unwrap();
        assert_eq!(region, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_fill_and_align_fragments() {
        let (backend, mut module) = backend_with_module();
        let extab = backend.extab.unwrap();
        module.append_fragment(extab, FragmentKind::Fill { value: 0xaa, value_size: 1 }, 2, 1);
        module.append_fragment(extab, FragmentKind::Align { value: 0, value_size: 1 }, 2, 1);
        module.append_fragment(extab, FragmentKind::Null, 0, 1);
        let mut region = vec![0xffu8; 4];
        backend.emit_section_data(&module, extab, &mut region).unwrap();
        assert_eq!(region, vec![0xaa, 0xaa, 0, 0]);
    }

    #[test]
    fn test_virtual_fill_is_skipped() {
        let (backend, mut module) = backend_with_module();
        let extab = backend.extab.unwrap();
        module.append_fragment(extab, FragmentKind::Fill { value: 0, value_size: 0 }, 0, 1);
        let mut region = vec![0x55u8; 2];
        backend.emit_section_data(&module, extab, &mut region).unwrap();
        assert_eq!(region, vec![0x55, 0x55]);
    }

    #[test]
    fn test_wide_align_value_is_fatal() {
        let (backend, mut module) = backend_with_module();
        let extab = backend.extab.unwrap();
        module.append_fragment(extab, FragmentKind::Align { value: 0, value_size: 4 }, 4, 1);
        let mut region = vec![0u8; 4];
        let err = backend.emit_section_data(&module, extab, &mut region).unwrap_err();
        assert!(err.contains("alignment fragment"));
    }

    #[test]
    fn test_unrecognized_section_is_fatal() {
        let (backend, mut module) = backend_with_module();
        let rogue = module.create_section(".rogue", crate::module::SectionKind::Regular,
                                          crate::types::SHT_PROGBITS, 0, 1);
        let mut region = vec![0u8; 4];
        let err = backend.emit_section_data(&module, rogue, &mut region).unwrap_err();
        assert!(err.contains(".rogue"));
    }
}
