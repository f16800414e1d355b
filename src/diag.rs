//! Link diagnostics.
//!
//! Fatal input errors surface immediately as `Err(String)` through the usual
//! `?` chain. Reportable errors (non-PIC relocation types under `-fPIC`) are
//! accumulated here so one scan pass can surface every offender before the
//! link fails.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// Relocation type cannot be used in a position-independent output.
    NonPicRelocation { ty: u32, symbol: String },
    /// Base-relative relocation against something other than
    /// `_GLOBAL_OFFSET_TABLE_`.
    BaseRelocation { ty: u32, symbol: String },
    /// Dynamic-linker-only relocation type found in an input object.
    DynamicRelocation { ty: u32 },
    /// Undefined non-weak, non-dynamic reference.
    UndefinedReference { symbol: String },
    /// Section emission asked for a section the backend does not produce.
    UnrecognizedOutputSection { section: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NonPicRelocation { ty, symbol } => write!(
                f,
                "relocation type {} against `{}' cannot be used when making a shared object; recompile with -fPIC",
                ty, symbol
            ),
            Diagnostic::BaseRelocation { ty, symbol } => write!(
                f,
                "base-relative relocation type {} is only supported against `_GLOBAL_OFFSET_TABLE_', not `{}'",
                ty, symbol
            ),
            Diagnostic::DynamicRelocation { ty } => write!(
                f,
                "unexpected dynamic-linker relocation type {} in input object",
                ty
            ),
            Diagnostic::UndefinedReference { symbol } => {
                write!(f, "undefined reference to `{}'", symbol)
            }
            Diagnostic::UnrecognizedOutputSection { section } => {
                write!(f, "unable to emit section `{}'", section)
            }
        }
    }
}

/// Collector for reportable errors. The scanner keeps going after recording
/// one; the driver checks `has_errors` once scanning is complete.
#[derive(Default, Debug)]
pub struct Diagnostics {
    errors: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn report(&mut self, diag: Diagnostic) {
        self.errors.push(diag);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    /// Fold the accumulated reports into a single link failure.
    pub fn into_result(self) -> Result<(), String> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let msgs: Vec<String> = self.errors.iter().map(|d| d.to_string()).collect();
        Err(msgs.join("\n"))
    }
}
