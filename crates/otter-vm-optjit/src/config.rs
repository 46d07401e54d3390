//! Compilation options and VM addresses baked into emitted code.
//!
//! Options are passed explicitly to every emitter. [`JitOptions::from_env`]
//! is a convenience for embedders that want the usual environment switches:
//!
//! | Variable                   | Effect                               |
//! |----------------------------|--------------------------------------|
//! | `OTTER_JIT_ASSERTS`        | emit invariant self-checks           |
//! | `OTTER_JIT_EXCEPTION_FUZZ` | call the fuzz hook before exception checks |
//! | `OTTER_JIT_SPLIT_TAGS`     | use the split tag/payload representation |

use crate::masm::{Fpr, Gpr};
use crate::value::{RepresentationMode, TagRegistersMode};

/// Per-compilation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitOptions {
    /// How boxed values are laid out in registers.
    pub representation: RepresentationMode,
    /// Whether packed-mode tests may read the reserved tag registers.
    pub tag_registers: TagRegistersMode,
    /// Emit abort-on-violation self-checks.
    pub debug_assertions: bool,
    /// Call the exception fuzz hook before every exception check.
    pub exception_fuzzing: bool,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            representation: RepresentationMode::Packed,
            tag_registers: TagRegistersMode::HaveTagRegisters,
            debug_assertions: cfg!(debug_assertions),
            exception_fuzzing: false,
        }
    }
}

impl JitOptions {
    /// Defaults overridden by `OTTER_JIT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).map(|value| parse_env_truthy(&value));
        let mut options = Self::default();
        if let Some(enabled) = flag("OTTER_JIT_ASSERTS") {
            options.debug_assertions = enabled;
        }
        if let Some(enabled) = flag("OTTER_JIT_EXCEPTION_FUZZ") {
            options.exception_fuzzing = enabled;
        }
        if flag("OTTER_JIT_SPLIT_TAGS").unwrap_or(false) {
            options.representation = RepresentationMode::Split;
        }
        options
    }

    /// Packed representation with tag registers and the given checks.
    pub fn packed(debug_assertions: bool) -> Self {
        Self {
            representation: RepresentationMode::Packed,
            debug_assertions,
            ..Self::default()
        }
    }

    /// Split representation with the given checks.
    pub fn split(debug_assertions: bool) -> Self {
        Self {
            representation: RepresentationMode::Split,
            debug_assertions,
            ..Self::default()
        }
    }
}

fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

/// Addresses of VM-owned state the emitted code touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmLayout {
    /// Current-exception slot; zero means none pending.
    pub exception_address: u64,
    /// Scratch buffer the fuzz hook spills registers into.
    pub fuzz_buffer_address: u64,
    /// Entry point of the exception fuzz operation.
    pub fuzz_operation_address: u64,
}

impl VmLayout {
    /// Bytes needed at `fuzz_buffer_address`: one slot per allocatable GPR,
    /// then one per allocatable FPR.
    pub const fn fuzz_buffer_size() -> usize {
        8 * (Gpr::ALLOCATABLE.len() + Fpr::ALLOCATABLE.len())
    }

    /// Buffer slot of the `index`-th allocatable GPR.
    pub const fn gpr_spill_slot(&self, index: usize) -> u64 {
        self.fuzz_buffer_address + 8 * index as u64
    }

    /// Buffer slot of the `index`-th allocatable FPR.
    pub const fn fpr_spill_slot(&self, index: usize) -> u64 {
        self.fuzz_buffer_address + 8 * (Gpr::ALLOCATABLE.len() + index) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_parsing() {
        for value in ["1", "true", "on", " yes "] {
            assert!(parse_env_truthy(value), "{value:?}");
        }
        for value in ["", "0", "false", "OFF", "No"] {
            assert!(!parse_env_truthy(value), "{value:?}");
        }
    }

    #[test]
    fn lookup_overrides_defaults() {
        let options = JitOptions::from_lookup(|name| match name {
            "OTTER_JIT_ASSERTS" => Some("0".into()),
            "OTTER_JIT_EXCEPTION_FUZZ" => Some("1".into()),
            "OTTER_JIT_SPLIT_TAGS" => Some("true".into()),
            _ => None,
        });
        assert!(!options.debug_assertions);
        assert!(options.exception_fuzzing);
        assert_eq!(options.representation, RepresentationMode::Split);

        let untouched = JitOptions::from_lookup(|_| None);
        assert_eq!(untouched, JitOptions::default());
    }

    #[test]
    fn spill_slots_do_not_overlap() {
        let layout = VmLayout {
            exception_address: 0x100,
            fuzz_buffer_address: 0x1000,
            fuzz_operation_address: 0x9000,
        };
        let last_gpr = layout.gpr_spill_slot(Gpr::ALLOCATABLE.len() - 1);
        assert_eq!(layout.fpr_spill_slot(0), last_gpr + 8);
        assert_eq!(
            layout.fpr_spill_slot(Fpr::ALLOCATABLE.len() - 1) + 8,
            layout.fuzz_buffer_address + VmLayout::fuzz_buffer_size() as u64
        );
    }
}
