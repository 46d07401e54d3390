//! Debug-only self-checks embedded in generated code.
//!
//! Every check is a test whose success branch skips a single `abort`:
//!
//! ```text
//!       <test>  ──ok──┐
//!       abort reason  │
//!   ok: ◄─────────────┘
//! ```
//!
//! With `debug_assertions` off every method emits nothing.

use crate::abort::AbortReason;
use crate::config::{JitOptions, VmLayout};
use crate::exceptions::{ExceptionCheckKind, ExceptionChecker};
use crate::masm::{Gpr, JumpList, MacroAssembler, Mem, Operand, RelationalCondition, ResultCondition};
use crate::type_guards::GuardEmitter;
use crate::value::{RepresentationMode, TagRegistersMode, ValueRegs, frame, packed, split};

/// Emits abort-on-violation checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssertionEmitter {
    enabled: bool,
    options: JitOptions,
}

impl AssertionEmitter {
    /// Emitter honoring `options.debug_assertions`.
    pub fn new(options: &JitOptions) -> Self {
        Self {
            enabled: options.debug_assertions,
            options: *options,
        }
    }

    /// Whether checks are emitted at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn check(
        &self,
        masm: &mut MacroAssembler,
        reason: AbortReason,
        ok: impl FnOnce(&mut MacroAssembler) -> JumpList,
    ) {
        if !self.enabled {
            return;
        }
        let ok = ok(masm);
        masm.abort_with_reason(reason);
        ok.link(masm);
    }

    fn tag_type_number(&self) -> Operand {
        match self.options.tag_registers {
            TagRegistersMode::HaveTagRegisters => Operand::Reg(Gpr::TAG_TYPE_NUMBER),
            TagRegistersMode::DontHaveTagRegisters => Operand::Imm(packed::TAG_TYPE_NUMBER),
        }
    }

    /// `gpr` holds a zero-extended 32-bit integer. Split registers are 32
    /// bits wide already, so nothing is emitted there.
    pub fn jit_assert_is_int32(&self, masm: &mut MacroAssembler, gpr: Gpr) {
        if self.options.representation == RepresentationMode::Split {
            return;
        }
        self.check(masm, AbortReason::IsNotInt32, |masm| {
            masm.branch64(
                RelationalCondition::BelowOrEqual,
                gpr,
                Operand::Imm(u64::from(u32::MAX)),
            )
            .into()
        });
    }

    /// `regs` holds a boxed int32.
    pub fn jit_assert_is_js_int32(&self, masm: &mut MacroAssembler, regs: ValueRegs) {
        let tag_type_number = self.tag_type_number();
        self.check(masm, AbortReason::IsNotJSInt32, |masm| match regs {
            ValueRegs::Packed(value) => masm
                .branch64(RelationalCondition::AboveOrEqual, value, tag_type_number)
                .into(),
            ValueRegs::Split { tag, .. } => masm
                .branch32(
                    RelationalCondition::Equal,
                    tag,
                    Operand::Imm(split::INT32_TAG.into()),
                )
                .into(),
        });
    }

    /// `regs` holds a boxed number.
    pub fn jit_assert_is_js_number(&self, masm: &mut MacroAssembler, regs: ValueRegs) {
        let tag_type_number = self.tag_type_number();
        self.check(masm, AbortReason::IsNotJSNumber, |masm| match regs {
            ValueRegs::Packed(value) => masm
                .branch_test64(ResultCondition::NonZero, value, tag_type_number)
                .into(),
            ValueRegs::Split { tag, .. } => {
                let mut ok = JumpList::new();
                ok.push(masm.branch32(
                    RelationalCondition::Equal,
                    tag,
                    Operand::Imm(split::INT32_TAG.into()),
                ));
                ok.push(masm.branch32(
                    RelationalCondition::Below,
                    tag,
                    Operand::Imm(split::LOWEST_TAG.into()),
                ));
                ok
            }
        });
    }

    /// `regs` holds a boxed double (a number that is not an int32).
    pub fn jit_assert_is_js_double(&self, masm: &mut MacroAssembler, regs: ValueRegs) {
        let tag_type_number = self.tag_type_number();
        self.check(masm, AbortReason::IsNotJSDouble, |masm| match regs {
            ValueRegs::Packed(value) => {
                let is_int32 =
                    masm.branch64(RelationalCondition::AboveOrEqual, value, tag_type_number);
                let ok = masm.branch_test64(ResultCondition::NonZero, value, tag_type_number);
                is_int32.link(masm);
                ok.into()
            }
            ValueRegs::Split { tag, .. } => masm
                .branch32(
                    RelationalCondition::Below,
                    tag,
                    Operand::Imm(split::LOWEST_TAG.into()),
                )
                .into(),
        });
    }

    /// `regs` holds a heap cell.
    pub fn jit_assert_is_cell(&self, masm: &mut MacroAssembler, regs: ValueRegs) {
        let guards = GuardEmitter::new(&self.options);
        self.check(masm, AbortReason::IsNotCell, |masm| {
            guards.branch_if_cell(masm, regs).into()
        });
    }

    /// The reserved tag registers still hold their constants. Only
    /// meaningful in packed mode with tag registers.
    pub fn jit_assert_tags_in_place(&self, masm: &mut MacroAssembler) {
        if self.options.representation != RepresentationMode::Packed
            || self.options.tag_registers != TagRegistersMode::HaveTagRegisters
        {
            return;
        }
        self.check(masm, AbortReason::TagTypeNumberNotInPlace, |masm| {
            masm.branch64(
                RelationalCondition::Equal,
                Gpr::TAG_TYPE_NUMBER,
                Operand::Imm(packed::TAG_TYPE_NUMBER),
            )
            .into()
        });
        self.check(masm, AbortReason::TagMaskNotInPlace, |masm| {
            masm.branch64(
                RelationalCondition::Equal,
                Gpr::TAG_MASK,
                Operand::Imm(packed::TAG_MASK),
            )
            .into()
        });
    }

    /// The call-frame register is 8-byte aligned.
    pub fn jit_assert_has_valid_call_frame(&self, masm: &mut MacroAssembler) {
        self.check(masm, AbortReason::CallFrameMisaligned, |masm| {
            masm.branch_test64(
                ResultCondition::Zero,
                Gpr::CALL_FRAME,
                Operand::Imm(frame::CALL_FRAME_ALIGNMENT_MASK),
            )
            .into()
        });
    }

    /// `gpr` is a null pointer.
    pub fn jit_assert_is_null(&self, masm: &mut MacroAssembler, gpr: Gpr) {
        self.check(masm, AbortReason::IsNotNull, |masm| {
            masm.branch_test64(ResultCondition::Zero, gpr, Operand::Imm(u64::MAX))
                .into()
        });
    }

    /// The current frame's argument count is below the sanity limit.
    pub fn jit_assert_argument_count_sane(&self, masm: &mut MacroAssembler) {
        self.check(masm, AbortReason::InsaneArgumentCount, |masm| {
            masm.branch32(
                RelationalCondition::Below,
                Mem::base(Gpr::CALL_FRAME, frame::ARGUMENT_COUNT_OFFSET),
                Operand::Imm(frame::SANE_ARGUMENT_COUNT_LIMIT.into()),
            )
            .into()
        });
    }

    /// No exception is pending in the VM described by `layout`.
    pub fn jit_assert_no_exception(&self, masm: &mut MacroAssembler, layout: VmLayout) {
        let checker = ExceptionChecker::new(&self.options, layout);
        self.check(masm, AbortReason::UncaughtExceptionAfterCall, |masm| {
            checker
                .branch_on_exception(masm, ExceptionCheckKind::Inverted)
                .into()
        });
    }
}
