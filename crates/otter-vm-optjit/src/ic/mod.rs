//! Inline cache descriptors.
//!
//! A descriptor is created per property-access site while code is being
//! generated. It accumulates the site's patchable regions (generators) and
//! the slow-path exits that must return to them, and is read once by the
//! [`Linker`](crate::link::Linker) when the final code is installed.

mod descriptor;
mod generator;
mod key;

pub use descriptor::{DescriptorKind, EcmaMode, IcVariant, InlineCacheDescriptor, PutKind};
pub use generator::{AccessGenerator, INLINE_REGION_LEN, emit_inline_cache, emit_slow_paths};
pub use key::{Interner, PropertyKey};

use std::fmt;

/// Correlates a site with the register snapshot the translator records for
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackMapId(u32);

impl StackMapId {
    /// Sentinel for "not assigned".
    pub const UNSET: StackMapId = StackMapId(u32::MAX);

    /// Wrap a translator-issued id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the sentinel.
    pub const fn is_unset(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for StackMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            f.write_str("stackmap#unset")
        } else {
            write!(f, "stackmap#{}", self.0)
        }
    }
}

/// Exception-handler / unwind context active at a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteIndex(u32);

impl CallSiteIndex {
    /// Wrap a raw index.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Runtime operation a slow path calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlowPathOperation {
    /// `base.key`
    GetById,
    /// `base.key = value` in strict code.
    PutByIdStrict,
    /// `base.key = value` in sloppy code.
    PutByIdSloppy,
    /// Own-property definition in strict code.
    PutByIdDirectStrict,
    /// Own-property definition in sloppy code.
    PutByIdDirectSloppy,
    /// `key in base`
    In,
}

/// Handle of a descriptor inside its compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IcId(usize);

impl IcId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Creation index.
    pub const fn index(self) -> usize {
        self.0
    }
}
