//! Cell header initialization from a structure.

use crate::abort::AbortReason;
use crate::assertions::AssertionEmitter;
use crate::config::JitOptions;
use crate::lattice::StructureInfo;
use crate::masm::{Gpr, MacroAssembler, Mem, Operand, RelationalCondition};
use crate::value::{RepresentationMode, cell};

/// Write the structure id, indexing type, cell type and inline flags of
/// `info` into the header of the cell at `dest`.
///
/// Packed mode writes the header in one 64-bit store and, with debug
/// assertions on, reads each field back. Split mode writes the type-info
/// word and the structure id separately.
pub fn emit_store_structure_with_type_info(
    masm: &mut MacroAssembler,
    options: &JitOptions,
    info: &StructureInfo,
    dest: Gpr,
) {
    match options.representation {
        RepresentationMode::Packed => {
            masm.store64_imm(info.id_blob(), Mem::base(dest, cell::STRUCTURE_ID_OFFSET));

            let asserts = AssertionEmitter::new(options);
            asserts.check(masm, AbortReason::StructureIdIsValid, |masm| {
                masm.branch32(
                    RelationalCondition::Equal,
                    Mem::base(dest, cell::STRUCTURE_ID_OFFSET),
                    Operand::Imm(info.id.raw().into()),
                )
                .into()
            });
            let bytes = [
                (
                    AbortReason::IndexingTypeIsValid,
                    cell::INDEXING_TYPE_OFFSET,
                    info.indexing_type,
                ),
                (
                    AbortReason::TypeInfoIsValid,
                    cell::TYPE_INFO_TYPE_OFFSET,
                    info.cell_type,
                ),
                (
                    AbortReason::TypeInfoInlineTypeFlagsAreValid,
                    cell::TYPE_INFO_FLAGS_OFFSET,
                    info.inline_type_flags,
                ),
            ];
            for (reason, offset, expected) in bytes {
                asserts.check(masm, reason, |masm| {
                    masm.branch8(RelationalCondition::Equal, Mem::base(dest, offset), expected)
                        .into()
                });
            }
        }
        RepresentationMode::Split => {
            masm.store32_imm(
                info.object_initialization_blob(),
                Mem::base(dest, cell::INDEXING_TYPE_OFFSET),
            );
            masm.store32_imm(info.id.raw(), Mem::base(dest, cell::STRUCTURE_ID_OFFSET));
        }
    }
}
