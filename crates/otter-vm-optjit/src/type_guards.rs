//! Type guard emission.
//!
//! Lowers a [`TypeDescriptor`] to the branches that leave the fast path when
//! a runtime value falls outside it. The result is a [`JumpList`]: every
//! member branches to the fallback, and falling through all of them means the
//! value matched.
//!
//! # Guard shapes
//!
//! ```text
//!   Top                         (nothing)
//!   Bottom                      jump ─────────────────────────────► fail
//!   Int32 / Number / ...        tag test ─────────────────────────► fail
//!   String / Object / S         not cell ─────────────────────────► fail
//!                               cell-type or structure test ──────► fail
//!   ObjectOrOther / S-or-other  is other ──┐
//!                               not cell ──┼──────────────────────► fail
//!                               object test┼──────────────────────► fail
//!                               ◄──────────┘ (escape linked last)
//! ```
//!
//! The "other" escape is collected first, the object tests are emitted, and
//! only then is the escape linked to the join point after the whole guard.

use crate::config::JitOptions;
use crate::lattice::{StructureId, TypeDescriptor};
use crate::masm::{
    DoubleCondition, Fpr, Gpr, Jump, JumpList, MacroAssembler, Mem, Operand, RelationalCondition,
    ResultCondition,
};
use crate::value::{
    PURE_NAN_BITS, RepresentationMode, TagRegistersMode, ValueRegs, cell, packed, split,
};

/// Emits representation-specific type tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardEmitter {
    representation: RepresentationMode,
    tag_registers: TagRegistersMode,
}

impl GuardEmitter {
    /// Emitter for the representation and tag-register mode in `options`.
    pub fn new(options: &JitOptions) -> Self {
        Self {
            representation: options.representation,
            tag_registers: options.tag_registers,
        }
    }

    /// Representation the emitter assumes.
    pub fn representation(&self) -> RepresentationMode {
        self.representation
    }

    fn tag_type_number(&self) -> Operand {
        match self.tag_registers {
            TagRegistersMode::HaveTagRegisters => Operand::Reg(Gpr::TAG_TYPE_NUMBER),
            TagRegistersMode::DontHaveTagRegisters => Operand::Imm(packed::TAG_TYPE_NUMBER),
        }
    }

    fn tag_mask(&self) -> Operand {
        match self.tag_registers {
            TagRegistersMode::HaveTagRegisters => Operand::Reg(Gpr::TAG_MASK),
            TagRegistersMode::DontHaveTagRegisters => Operand::Imm(packed::TAG_MASK),
        }
    }

    fn check_regs(&self, regs: ValueRegs) {
        debug_assert_eq!(
            regs.mode(),
            self.representation,
            "value registers do not match the compilation's representation"
        );
    }

    /// Branches taken when the value in `regs` is not admitted by
    /// `descriptor`. `temp` may be clobbered.
    pub fn branch_if_not_type(
        &self,
        masm: &mut MacroAssembler,
        regs: ValueRegs,
        temp: Gpr,
        descriptor: TypeDescriptor,
    ) -> JumpList {
        self.check_regs(regs);
        let mut result = JumpList::new();
        match descriptor {
            TypeDescriptor::Top => {}
            TypeDescriptor::Bottom => result.push(masm.jump()),
            TypeDescriptor::Boolean => result.push(self.branch_if_not_boolean(masm, regs, temp)),
            TypeDescriptor::Other => result.push(self.branch_if_not_other(masm, regs, temp)),
            TypeDescriptor::Int32 => result.push(self.branch_if_not_int32(masm, regs)),
            TypeDescriptor::Number => result.push(self.branch_if_not_number(masm, regs, temp)),
            TypeDescriptor::String => {
                result.push(self.branch_if_not_cell(masm, regs));
                result.push(self.branch_if_not_string(masm, regs.payload_gpr()));
            }
            TypeDescriptor::Object => {
                result.push(self.branch_if_not_cell(masm, regs));
                result.push(self.branch_if_not_object(masm, regs.payload_gpr()));
            }
            TypeDescriptor::ObjectWithStructure(structure) => {
                result.push(self.branch_if_not_cell(masm, regs));
                result.push(self.branch_structure(
                    masm,
                    RelationalCondition::NotEqual,
                    regs.payload_gpr(),
                    structure,
                ));
            }
            TypeDescriptor::ObjectOrOther => {
                let mut escape = JumpList::new();
                escape.push(self.branch_if_other(masm, regs, temp));
                result.push(self.branch_if_not_cell(masm, regs));
                result.push(self.branch_if_not_object(masm, regs.payload_gpr()));
                escape.link(masm);
            }
            TypeDescriptor::ObjectWithStructureOrOther(structure) => {
                let mut escape = JumpList::new();
                escape.push(self.branch_if_other(masm, regs, temp));
                result.push(self.branch_if_not_cell(masm, regs));
                result.push(self.branch_structure(
                    masm,
                    RelationalCondition::NotEqual,
                    regs.payload_gpr(),
                    structure,
                ));
                escape.link(masm);
            }
        }
        result
    }

    /// Taken when the value is not an int32.
    pub fn branch_if_not_int32(&self, masm: &mut MacroAssembler, regs: ValueRegs) -> Jump {
        match regs {
            ValueRegs::Packed(value) => {
                masm.branch64(RelationalCondition::Below, value, self.tag_type_number())
            }
            ValueRegs::Split { tag, .. } => masm.branch32(
                RelationalCondition::NotEqual,
                tag,
                Operand::Imm(split::INT32_TAG.into()),
            ),
        }
    }

    /// Taken when the value is neither an int32 nor a double.
    pub fn branch_if_not_number(
        &self,
        masm: &mut MacroAssembler,
        regs: ValueRegs,
        temp: Gpr,
    ) -> Jump {
        match regs {
            ValueRegs::Packed(value) => {
                masm.branch_test64(ResultCondition::Zero, value, self.tag_type_number())
            }
            ValueRegs::Split { tag, .. } => {
                // Int32 wraps to 0; every double tag stays below LOWEST_TAG + 1.
                masm.add32_imm(1, tag, temp);
                masm.branch32(
                    RelationalCondition::AboveOrEqual,
                    temp,
                    Operand::Imm(u64::from(split::LOWEST_TAG + 1)),
                )
            }
        }
    }

    /// Taken when the value is not a heap cell.
    pub fn branch_if_not_cell(&self, masm: &mut MacroAssembler, regs: ValueRegs) -> Jump {
        match regs {
            ValueRegs::Packed(value) => {
                masm.branch_test64(ResultCondition::NonZero, value, self.tag_mask())
            }
            ValueRegs::Split { tag, .. } => masm.branch32(
                RelationalCondition::NotEqual,
                tag,
                Operand::Imm(split::CELL_TAG.into()),
            ),
        }
    }

    /// Taken when the value is a heap cell.
    pub fn branch_if_cell(&self, masm: &mut MacroAssembler, regs: ValueRegs) -> Jump {
        match regs {
            ValueRegs::Packed(value) => {
                masm.branch_test64(ResultCondition::Zero, value, self.tag_mask())
            }
            ValueRegs::Split { tag, .. } => masm.branch32(
                RelationalCondition::Equal,
                tag,
                Operand::Imm(split::CELL_TAG.into()),
            ),
        }
    }

    /// Taken when the value is `null` or `undefined`.
    pub fn branch_if_other(&self, masm: &mut MacroAssembler, regs: ValueRegs, temp: Gpr) -> Jump {
        self.emit_other_test(masm, regs, temp, RelationalCondition::Equal)
    }

    /// Taken when the value is neither `null` nor `undefined`.
    pub fn branch_if_not_other(
        &self,
        masm: &mut MacroAssembler,
        regs: ValueRegs,
        temp: Gpr,
    ) -> Jump {
        self.emit_other_test(masm, regs, temp, RelationalCondition::NotEqual)
    }

    fn emit_other_test(
        &self,
        masm: &mut MacroAssembler,
        regs: ValueRegs,
        temp: Gpr,
        cond: RelationalCondition,
    ) -> Jump {
        match regs {
            ValueRegs::Packed(value) => {
                masm.move_reg(value, temp);
                masm.and64_imm(!packed::TAG_BIT_UNDEFINED, temp);
                masm.branch64(cond, temp, Operand::Imm(packed::VALUE_NULL))
            }
            ValueRegs::Split { tag, .. } => {
                masm.move_reg(tag, temp);
                masm.or32_imm(1, temp);
                masm.branch32(cond, temp, Operand::Imm(split::NULL_TAG.into()))
            }
        }
    }

    /// Taken when the value is not a boolean.
    pub fn branch_if_not_boolean(
        &self,
        masm: &mut MacroAssembler,
        regs: ValueRegs,
        temp: Gpr,
    ) -> Jump {
        match regs {
            ValueRegs::Packed(value) => {
                masm.move_reg(value, temp);
                masm.xor64_imm(packed::VALUE_FALSE, temp);
                masm.branch_test64(ResultCondition::NonZero, temp, Operand::Imm(!1))
            }
            ValueRegs::Split { tag, .. } => masm.branch32(
                RelationalCondition::NotEqual,
                tag,
                Operand::Imm(split::BOOLEAN_TAG.into()),
            ),
        }
    }

    /// Taken when the cell in `cell` is not a string. The value must
    /// already be known to be a cell.
    pub fn branch_if_not_string(&self, masm: &mut MacroAssembler, cell: Gpr) -> Jump {
        masm.branch8(
            RelationalCondition::NotEqual,
            Mem::base(cell, cell::TYPE_INFO_TYPE_OFFSET),
            cell::STRING_TYPE,
        )
    }

    /// Taken when the cell in `cell` is not an object. The value must
    /// already be known to be a cell.
    pub fn branch_if_not_object(&self, masm: &mut MacroAssembler, cell: Gpr) -> Jump {
        masm.branch8(
            RelationalCondition::Below,
            Mem::base(cell, cell::TYPE_INFO_TYPE_OFFSET),
            cell::OBJECT_TYPE,
        )
    }

    /// Compare the structure id in the header of `cell` with `structure`.
    pub fn branch_structure(
        &self,
        masm: &mut MacroAssembler,
        cond: RelationalCondition,
        cell: Gpr,
        structure: StructureId,
    ) -> Jump {
        masm.branch32(
            cond,
            Mem::base(cell, cell::STRUCTURE_ID_OFFSET),
            Operand::Imm(structure.raw().into()),
        )
    }
}

/// Replace a NaN in `fpr` with the canonical NaN.
pub fn purify_nan(masm: &mut MacroAssembler, fpr: Fpr) {
    let not_nan = masm.branch_double(DoubleCondition::Equal, fpr, fpr);
    masm.move_double_bits(PURE_NAN_BITS, fpr);
    not_nan.link(masm);
}
