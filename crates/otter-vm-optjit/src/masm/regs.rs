//! Register file of the optimizing tier's virtual machine.
//!
//! The layout follows an x86-64 style assignment: sixteen 64-bit general
//! purpose registers and sixteen double registers. A handful of GPRs have
//! fixed roles that the emitters rely on.

use std::fmt;

/// General-purpose register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gpr(u8);

impl Gpr {
    /// Number of architectural GPRs.
    pub const COUNT: usize = 16;

    /// Holds call results.
    pub const RETURN_VALUE: Gpr = Gpr(0);
    /// Primary scratch register.
    pub const REG_T0: Gpr = Gpr(0);
    /// Secondary scratch register.
    pub const REG_T1: Gpr = Gpr(1);
    /// Third scratch register.
    pub const REG_T2: Gpr = Gpr(2);
    /// Fourth scratch register.
    pub const REG_T3: Gpr = Gpr(3);
    /// Machine stack pointer. Never allocated.
    pub const STACK_POINTER: Gpr = Gpr(4);
    /// Frame pointer of the current JS call frame.
    pub const CALL_FRAME: Gpr = Gpr(5);
    /// Clobbered by calls and never used for return values.
    pub const NON_PRESERVED_NON_RETURN: Gpr = Gpr(6);
    /// First argument of a native call.
    pub const ARGUMENT0: Gpr = Gpr(7);
    /// Second argument of a native call.
    pub const ARGUMENT1: Gpr = Gpr(8);
    /// Reserved: holds `TAG_TYPE_NUMBER` in packed mode.
    pub const TAG_TYPE_NUMBER: Gpr = Gpr(14);
    /// Reserved: holds `TAG_MASK` in packed mode.
    pub const TAG_MASK: Gpr = Gpr(15);

    /// Registers the register allocator may hand out.
    pub const ALLOCATABLE: [Gpr; 12] = [
        Gpr(0),
        Gpr(1),
        Gpr(2),
        Gpr(3),
        Gpr(6),
        Gpr(7),
        Gpr(8),
        Gpr(9),
        Gpr(10),
        Gpr(11),
        Gpr(12),
        Gpr(13),
    ];

    /// Register by number.
    pub const fn new(index: u8) -> Self {
        assert!((index as usize) < Self::COUNT, "gpr index out of range");
        Self(index)
    }

    /// Register number.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::CALL_FRAME => f.write_str("cfr"),
            Self::STACK_POINTER => f.write_str("sp"),
            Self::TAG_TYPE_NUMBER => f.write_str("tagTypeNumber"),
            Self::TAG_MASK => f.write_str("tagMask"),
            Self(n) => write!(f, "r{n}"),
        }
    }
}

/// Floating-point register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fpr(u8);

impl Fpr {
    /// Number of architectural FPRs.
    pub const COUNT: usize = 16;

    /// Scratch double register.
    pub const FP_REG_T0: Fpr = Fpr(0);

    /// Every FPR is allocatable.
    pub const ALLOCATABLE: [Fpr; 16] = [
        Fpr(0),
        Fpr(1),
        Fpr(2),
        Fpr(3),
        Fpr(4),
        Fpr(5),
        Fpr(6),
        Fpr(7),
        Fpr(8),
        Fpr(9),
        Fpr(10),
        Fpr(11),
        Fpr(12),
        Fpr(13),
        Fpr(14),
        Fpr(15),
    ];

    /// Register by number.
    pub const fn new(index: u8) -> Self {
        assert!((index as usize) < Self::COUNT, "fpr index out of range");
        Self(index)
    }

    /// Register number.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Fpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}
