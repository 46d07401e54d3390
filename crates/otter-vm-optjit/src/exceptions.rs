//! Pending-exception checks emitted after calls that may throw.
//!
//! A check reads the VM's current-exception slot and branches on it:
//!
//! ```text
//!   Normal,   Near     branch_if(exception)            -> returned
//!   Inverted, Near     branch_if(!exception)           -> returned
//!   Normal,   Far      branch_if(!exception) ──┐
//!                      patchable_jump          │       -> returned
//!                      ◄───────────────────────┘
//! ```
//!
//! The far form flips the condition so that the short branch skips over a
//! fixed-width stub; the stub is what the caller links to the distant
//! target.
//!
//! With exception fuzzing on, every check first calls the VM's fuzz
//! operation, which may inject an exception. All allocatable registers are
//! spilled around that call so the surrounding code observes no clobbers.

use crate::config::{JitOptions, VmLayout};
use crate::masm::{Fpr, Gpr, Jump, MacroAssembler, Mem, Operand, ResultCondition};
use crate::value::RepresentationMode;

/// Which outcome the returned branch is taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCheckKind {
    /// Taken when an exception is pending.
    Normal,
    /// Taken when no exception is pending.
    Inverted,
}

impl ExceptionCheckKind {
    /// The opposite polarity.
    pub fn invert(self) -> Self {
        match self {
            Self::Normal => Self::Inverted,
            Self::Inverted => Self::Normal,
        }
    }
}

/// Encoding width of the returned branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionJumpWidth {
    /// An ordinary conditional branch.
    Near,
    /// A patchable stub behind an inverted conditional branch.
    Far,
}

/// Emits exception checks against one VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionChecker {
    representation: RepresentationMode,
    exception_fuzzing: bool,
    layout: VmLayout,
}

impl ExceptionChecker {
    /// Checker for the VM described by `layout`.
    pub fn new(options: &JitOptions, layout: VmLayout) -> Self {
        Self {
            representation: options.representation,
            exception_fuzzing: options.exception_fuzzing,
            layout,
        }
    }

    /// VM addresses the checker uses.
    pub fn layout(&self) -> &VmLayout {
        &self.layout
    }

    /// Check for a pending exception. The returned jump must be linked by the
    /// caller to its handler (or, for [`ExceptionJumpWidth::Far`], its
    /// out-of-range target).
    pub fn emit_exception_check(
        &self,
        masm: &mut MacroAssembler,
        kind: ExceptionCheckKind,
        width: ExceptionJumpWidth,
    ) -> Jump {
        self.call_exception_fuzz(masm);

        match width {
            ExceptionJumpWidth::Near => self.branch_on_exception(masm, kind),
            ExceptionJumpWidth::Far => {
                let skip = self.branch_on_exception(masm, kind.invert());
                let stub = masm.patchable_jump().jump();
                skip.link(masm);
                stub
            }
        }
    }

    /// `Normal`, `Near` check whose branch is never turned into a stub.
    pub fn emit_non_patchable_exception_check(&self, masm: &mut MacroAssembler) -> Jump {
        self.call_exception_fuzz(masm);
        self.branch_on_exception(masm, ExceptionCheckKind::Normal)
    }

    /// Call the fuzz operation with every allocatable register preserved.
    /// Emits nothing unless exception fuzzing is on.
    pub fn call_exception_fuzz(&self, masm: &mut MacroAssembler) {
        if !self.exception_fuzzing {
            return;
        }

        for (i, gpr) in Gpr::ALLOCATABLE.iter().enumerate() {
            masm.store64(*gpr, Mem::absolute(self.layout.gpr_spill_slot(i)));
        }
        for (i, fpr) in Fpr::ALLOCATABLE.iter().enumerate() {
            masm.move_imm(self.layout.fpr_spill_slot(i), Gpr::REG_T0);
            masm.store_double(*fpr, Mem::base(Gpr::REG_T0, 0));
        }

        masm.move_reg(Gpr::CALL_FRAME, Gpr::ARGUMENT0);
        masm.move_imm(self.layout.fuzz_operation_address, Gpr::NON_PRESERVED_NON_RETURN);
        masm.call(Gpr::NON_PRESERVED_NON_RETURN);

        for (i, fpr) in Fpr::ALLOCATABLE.iter().enumerate() {
            masm.move_imm(self.layout.fpr_spill_slot(i), Gpr::REG_T0);
            masm.load_double(Mem::base(Gpr::REG_T0, 0), *fpr);
        }
        for (i, gpr) in Gpr::ALLOCATABLE.iter().enumerate() {
            masm.load64(Mem::absolute(self.layout.gpr_spill_slot(i)), *gpr);
        }
    }

    pub(crate) fn branch_on_exception(
        &self,
        masm: &mut MacroAssembler,
        kind: ExceptionCheckKind,
    ) -> Jump {
        let cond = match kind {
            ExceptionCheckKind::Normal => ResultCondition::NonZero,
            ExceptionCheckKind::Inverted => ResultCondition::Zero,
        };
        let slot = Mem::absolute(self.layout.exception_address);
        match self.representation {
            RepresentationMode::Packed => masm.branch_test64(cond, slot, Operand::Imm(u64::MAX)),
            RepresentationMode::Split => {
                masm.branch_test32(cond, slot, Operand::Imm(u64::from(u32::MAX)))
            }
        }
    }
}
