//! Target registration.
//!
//! The driver threads one registry value through startup; registering the
//! `arm` and `thumb` target ids is a documented one-time init. Both ids
//! construct the same GNU/ELF backend. Darwin and Windows triples are
//! rejected at construction: the MachO and COFF paths are unsupported.

use crate::backend::ArmBackend;
use crate::config::LinkerConfig;

pub type TargetCtor = fn(&LinkerConfig) -> Result<ArmBackend, String>;

#[derive(Default)]
pub struct TargetRegistry {
    factories: Vec<(&'static str, TargetCtor)>,
}

impl TargetRegistry {
    pub fn new() -> TargetRegistry {
        TargetRegistry::default()
    }

    pub fn register(&mut self, target: &'static str, ctor: TargetCtor) {
        self.factories.push((target, ctor));
    }

    pub fn create(&self, target: &str, config: &LinkerConfig) -> Result<ArmBackend, String> {
        match self.factories.iter().find(|(name, _)| *name == target) {
            Some((_, ctor)) => ctor(config),
            None => Err(format!("unknown target `{}'", target)),
        }
    }
}

/// Construct the ARM GNU/ELF backend for a configuration, rejecting output
/// formats the backend does not speak.
pub fn create_arm_backend(config: &LinkerConfig) -> Result<ArmBackend, String> {
    let triple = config.triple.to_ascii_lowercase();
    if triple.contains("darwin") || triple.contains("macos") || triple.contains("ios") {
        return Err("MachO linker is not supported yet".to_string());
    }
    if triple.contains("windows") || triple.contains("win32") || triple.contains("mingw") {
        return Err("COFF linker is not supported yet".to_string());
    }
    Ok(ArmBackend::new(config.clone()))
}

/// Register the backend factory for both the `arm` and `thumb` target ids.
pub fn register_arm_targets(registry: &mut TargetRegistry) {
    registry.register("arm", create_arm_backend);
    registry.register("thumb", create_arm_backend);
}
