//! Value representation seen by emitted code.
//!
//! ## Packed (one 64-bit register)
//!
//! ```text
//! Pointer  { 0000:PPPP:PPPP:PPPP
//!          / 0001:****:****:****
//! Double   {         ...
//!          \ FFFE:****:****:****
//! Integer  { FFFF:0000:IIII:IIII
//!
//! null = 0x02   undefined = 0x0A   false = 0x06   true = 0x07
//! ```
//!
//! Doubles are offset by 2^48 so that any value with a non-zero top 16 bits
//! is a number. A heap cell is a value with none of the `TAG_MASK` bits set.
//!
//! ## Split (tag register + payload register)
//!
//! The tag word holds one of the `*_TAG` constants below, or the high word of
//! a double when it is below [`split::LOWEST_TAG`].

use crate::lattice::StructureId;
use crate::masm::Gpr;

/// How a boxed value is laid out in registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepresentationMode {
    /// Tag and payload share one 64-bit register.
    Packed,
    /// Tag and payload live in separate 32-bit registers.
    Split,
}

/// Whether packed-mode tests may read the reserved tag registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagRegistersMode {
    /// `TAG_TYPE_NUMBER` and `TAG_MASK` are live in their registers.
    HaveTagRegisters,
    /// Tag constants must be materialized as immediates.
    DontHaveTagRegisters,
}

/// Location of one boxed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRegs {
    /// Packed representation.
    Packed(Gpr),
    /// Split representation.
    Split {
        /// Tag word.
        tag: Gpr,
        /// Payload word.
        payload: Gpr,
    },
}

impl ValueRegs {
    /// Register holding the payload (the whole value when packed).
    pub const fn payload_gpr(self) -> Gpr {
        match self {
            Self::Packed(gpr) => gpr,
            Self::Split { payload, .. } => payload,
        }
    }

    /// Register holding the tag, if split.
    pub const fn tag_gpr(self) -> Option<Gpr> {
        match self {
            Self::Packed(_) => None,
            Self::Split { tag, .. } => Some(tag),
        }
    }

    /// Representation these registers use.
    pub const fn mode(self) -> RepresentationMode {
        match self {
            Self::Packed(_) => RepresentationMode::Packed,
            Self::Split { .. } => RepresentationMode::Split,
        }
    }
}

/// Packed encoding constants.
pub mod packed {
    /// Set on every number.
    pub const TAG_TYPE_NUMBER: u64 = 0xFFFF_0000_0000_0000;
    /// Set on every non-number, non-cell immediate.
    pub const TAG_BIT_TYPE_OTHER: u64 = 0x2;
    /// Set on booleans.
    pub const TAG_BIT_BOOL: u64 = 0x4;
    /// Set on `undefined`.
    pub const TAG_BIT_UNDEFINED: u64 = 0x8;
    /// A value with none of these bits is a cell.
    pub const TAG_MASK: u64 = TAG_TYPE_NUMBER | TAG_BIT_TYPE_OTHER;
    /// Added to a double's bits.
    pub const DOUBLE_ENCODE_OFFSET: u64 = 1 << 48;

    /// `false`
    pub const VALUE_FALSE: u64 = TAG_BIT_TYPE_OTHER | TAG_BIT_BOOL;
    /// `true`
    pub const VALUE_TRUE: u64 = VALUE_FALSE | 1;
    /// `null`
    pub const VALUE_NULL: u64 = TAG_BIT_TYPE_OTHER;
    /// `undefined`
    pub const VALUE_UNDEFINED: u64 = TAG_BIT_TYPE_OTHER | TAG_BIT_UNDEFINED;
}

/// Split encoding constants.
pub mod split {
    /// Tag of int32 values.
    pub const INT32_TAG: u32 = 0xFFFF_FFFF;
    /// Tag of booleans.
    pub const BOOLEAN_TAG: u32 = 0xFFFF_FFFE;
    /// Tag of `null`.
    pub const NULL_TAG: u32 = 0xFFFF_FFFD;
    /// Tag of `undefined`. Differs from `NULL_TAG` only in bit 0.
    pub const UNDEFINED_TAG: u32 = 0xFFFF_FFFC;
    /// Tag of heap cells.
    pub const CELL_TAG: u32 = 0xFFFF_FFFB;
    /// Tag of the empty value.
    pub const EMPTY_VALUE_TAG: u32 = 0xFFFF_FFFA;
    /// Tag of the deleted value.
    pub const DELETED_VALUE_TAG: u32 = 0xFFFF_FFF9;
    /// Any tag below this is the high word of a double.
    pub const LOWEST_TAG: u32 = DELETED_VALUE_TAG;
}

/// Canonical NaN every double NaN is purified to.
pub const PURE_NAN_BITS: u64 = 0x7FF8_0000_0000_0000;

/// Heap cell header layout.
pub mod cell {
    /// Structure id, 32 bits.
    pub const STRUCTURE_ID_OFFSET: i32 = 0;
    /// Indexing type, 8 bits.
    pub const INDEXING_TYPE_OFFSET: i32 = 4;
    /// Cell type, 8 bits.
    pub const TYPE_INFO_TYPE_OFFSET: i32 = 5;
    /// Inline type flags, 8 bits.
    pub const TYPE_INFO_FLAGS_OFFSET: i32 = 6;
    /// First inline property slot.
    pub const INLINE_STORAGE_OFFSET: i32 = 16;
    /// Bytes per property slot.
    pub const SLOT_SIZE: i32 = 8;

    /// Cell type of strings.
    pub const STRING_TYPE: u8 = 0x02;
    /// Cell type of symbols.
    pub const SYMBOL_TYPE: u8 = 0x03;
    /// Lowest cell type that is an object.
    pub const OBJECT_TYPE: u8 = 0x10;
    /// Cell type of plain objects.
    pub const FINAL_OBJECT_TYPE: u8 = 0x11;

    /// Address of inline property slot `offset`.
    pub const fn inline_offset(offset: u32) -> i32 {
        INLINE_STORAGE_OFFSET + offset as i32 * SLOT_SIZE
    }
}

/// Call frame layout.
pub mod frame {
    /// Low bits that must be clear in a valid frame pointer.
    pub const CALL_FRAME_ALIGNMENT_MASK: u64 = 7;
    /// Argument count slot; the payload is the low 32 bits.
    pub const ARGUMENT_COUNT_OFFSET: i32 = 32;
    /// Argument counts at or above this are treated as corruption.
    pub const SANE_ARGUMENT_COUNT_LIMIT: u32 = 10_000_000;
}

/// Runtime value, as the emitted code observes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JsValue {
    /// 32-bit integer.
    Int32(i32),
    /// Double. NaN is expected to be purified.
    Double(f64),
    /// Boolean.
    Boolean(bool),
    /// `null`
    Null,
    /// `undefined`
    Undefined,
    /// Heap cell at `address`.
    Cell {
        /// 8-byte aligned pointer.
        address: u64,
        /// Structure in the cell header.
        structure: StructureId,
        /// Cell type in the cell header.
        cell_type: u8,
    },
}

impl JsValue {
    /// Whether this value is `null` or `undefined`.
    pub fn is_other(&self) -> bool {
        matches!(self, Self::Null | Self::Undefined)
    }

    /// Packed bits.
    pub fn encode_packed(&self) -> u64 {
        match *self {
            Self::Int32(n) => packed::TAG_TYPE_NUMBER | u64::from(n as u32),
            Self::Double(d) => d.to_bits().wrapping_add(packed::DOUBLE_ENCODE_OFFSET),
            Self::Boolean(false) => packed::VALUE_FALSE,
            Self::Boolean(true) => packed::VALUE_TRUE,
            Self::Null => packed::VALUE_NULL,
            Self::Undefined => packed::VALUE_UNDEFINED,
            Self::Cell { address, .. } => address,
        }
    }

    /// `(tag, payload)` words.
    pub fn encode_split(&self) -> (u32, u32) {
        match *self {
            Self::Int32(n) => (split::INT32_TAG, n as u32),
            Self::Double(d) => {
                let bits = d.to_bits();
                ((bits >> 32) as u32, bits as u32)
            }
            Self::Boolean(b) => (split::BOOLEAN_TAG, u32::from(b)),
            Self::Null => (split::NULL_TAG, 0),
            Self::Undefined => (split::UNDEFINED_TAG, 0),
            Self::Cell { address, .. } => (split::CELL_TAG, address as u32),
        }
    }

    /// Slot image: packed bits, or payload in the low word and tag in the
    /// high word.
    pub fn encode_slot(&self, mode: RepresentationMode) -> u64 {
        match mode {
            RepresentationMode::Packed => self.encode_packed(),
            RepresentationMode::Split => {
                let (tag, payload) = self.encode_split();
                (u64::from(tag) << 32) | u64::from(payload)
            }
        }
    }
}
