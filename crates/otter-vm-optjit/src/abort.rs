//! Reasons attached to `abort` instructions.
//!
//! Each debug check aborts with its own code so a crash dump identifies the
//! violated fact without a disassembler.

use std::fmt;

/// Diagnosable crash reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AbortReason {
    /// A raw register value does not fit in 32 bits.
    IsNotInt32 = 1,
    /// A boxed value is not tagged as int32.
    IsNotJSInt32 = 2,
    /// A boxed value is not tagged as a number.
    IsNotJSNumber = 3,
    /// A boxed value is not tagged as a double.
    IsNotJSDouble = 4,
    /// A boxed value is not a heap cell.
    IsNotCell = 5,
    /// The `tagTypeNumber` register lost its constant.
    TagTypeNumberNotInPlace = 6,
    /// The `tagMask` register lost its constant.
    TagMaskNotInPlace = 7,
    /// The call-frame register is not 8-byte aligned.
    CallFrameMisaligned = 8,
    /// A pointer expected to be null is not.
    IsNotNull = 9,
    /// The frame's argument count is implausibly large.
    InsaneArgumentCount = 10,
    /// An exception is pending where none may be.
    UncaughtExceptionAfterCall = 11,
    /// A freshly stored structure id does not read back.
    StructureIdIsValid = 12,
    /// A freshly stored indexing type does not read back.
    IndexingTypeIsValid = 13,
    /// A freshly stored cell type does not read back.
    TypeInfoIsValid = 14,
    /// Freshly stored inline type flags do not read back.
    TypeInfoInlineTypeFlagsAreValid = 15,
}

impl AbortReason {
    /// Every reason, in code order.
    pub const ALL: [AbortReason; 15] = [
        Self::IsNotInt32,
        Self::IsNotJSInt32,
        Self::IsNotJSNumber,
        Self::IsNotJSDouble,
        Self::IsNotCell,
        Self::TagTypeNumberNotInPlace,
        Self::TagMaskNotInPlace,
        Self::CallFrameMisaligned,
        Self::IsNotNull,
        Self::InsaneArgumentCount,
        Self::UncaughtExceptionAfterCall,
        Self::StructureIdIsValid,
        Self::IndexingTypeIsValid,
        Self::TypeInfoIsValid,
        Self::TypeInfoInlineTypeFlagsAreValid,
    ];

    /// Numeric code carried by the abort instruction.
    pub const fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (#{})", self, self.code())
    }
}
