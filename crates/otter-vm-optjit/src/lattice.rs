//! Statically inferred value shapes that guards test against.
//!
//! The lattice is closed: `Bottom` admits nothing, `Top` admits everything,
//! and the object-ish kinds may carry a structure identity.
//!
//! Joins used by the inference pass:
//!
//! ```text
//! Int32 ∨ Number                                    = Number
//! ObjectWithStructure(S) ∨ Other                    = ObjectWithStructureOrOther(S)
//! ObjectWithStructure(S) ∨ ObjectWithStructure(T)   = Object          (S != T)
//! Object ∨ Other                                    = ObjectOrOther
//! anything else that differs                        = Top
//! ```

use std::fmt;

use crate::value::{JsValue, cell};

/// Identity of a structure (shape) owned by the object model.
///
/// The id is a handle into the structure table; the table must outlive every
/// descriptor and guard that names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructureId(u32);

impl StructureId {
    /// Wrap a raw structure id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id as stored in a cell header.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Header fields a structure dictates for every cell that has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructureInfo {
    /// Structure identity.
    pub id: StructureId,
    /// Indexing type byte.
    pub indexing_type: u8,
    /// Cell type byte.
    pub cell_type: u8,
    /// Inline type flags byte.
    pub inline_type_flags: u8,
}

impl StructureInfo {
    /// The first eight header bytes, as one little-endian word.
    pub const fn id_blob(&self) -> u64 {
        self.id.raw() as u64
            | (self.indexing_type as u64) << 32
            | (self.cell_type as u64) << 40
            | (self.inline_type_flags as u64) << 48
    }

    /// The four header bytes starting at the indexing type.
    pub const fn object_initialization_blob(&self) -> u32 {
        self.indexing_type as u32
            | (self.cell_type as u32) << 8
            | (self.inline_type_flags as u32) << 16
    }
}

/// Discriminant of [`TypeDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// No value.
    Bottom,
    /// `true` or `false`.
    Boolean,
    /// `null` or `undefined`.
    Other,
    /// 32-bit integer.
    Int32,
    /// Any number.
    Number,
    /// String cell.
    String,
    /// Object cell.
    Object,
    /// Object cell, `null` or `undefined`.
    ObjectOrOther,
    /// Object cell of one structure.
    ObjectWithStructure,
    /// Object cell of one structure, `null` or `undefined`.
    ObjectWithStructureOrOther,
    /// Any value.
    Top,
}

/// Lattice value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// Matches nothing; its guard is always taken.
    Bottom,
    /// `true` or `false`.
    Boolean,
    /// `null` or `undefined`.
    Other,
    /// 32-bit integer.
    Int32,
    /// Int32 or double.
    Number,
    /// String cell.
    String,
    /// Any object cell.
    Object,
    /// Any object cell, `null` or `undefined`.
    ObjectOrOther,
    /// Object cell whose structure is exactly this one.
    ObjectWithStructure(StructureId),
    /// Like `ObjectWithStructure`, or `null` / `undefined`.
    ObjectWithStructureOrOther(StructureId),
    /// Matches everything; its guard emits nothing.
    Top,
}

/// Object-ish part of a descriptor, used by `join`.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ObjectPart {
    Any,
    Structure(StructureId),
}

impl TypeDescriptor {
    /// Discriminant.
    pub fn kind(&self) -> TypeKind {
        match self {
            Self::Bottom => TypeKind::Bottom,
            Self::Boolean => TypeKind::Boolean,
            Self::Other => TypeKind::Other,
            Self::Int32 => TypeKind::Int32,
            Self::Number => TypeKind::Number,
            Self::String => TypeKind::String,
            Self::Object => TypeKind::Object,
            Self::ObjectOrOther => TypeKind::ObjectOrOther,
            Self::ObjectWithStructure(_) => TypeKind::ObjectWithStructure,
            Self::ObjectWithStructureOrOther(_) => TypeKind::ObjectWithStructureOrOther,
            Self::Top => TypeKind::Top,
        }
    }

    /// Structure carried by the structure-bearing kinds.
    pub fn structure(&self) -> Option<StructureId> {
        match self {
            Self::ObjectWithStructure(s) | Self::ObjectWithStructureOrOther(s) => Some(*s),
            _ => None,
        }
    }

    /// Least upper bound.
    pub fn join(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Bottom, x) | (x, Self::Bottom) => x,
            (Self::Top, _) | (_, Self::Top) => Self::Top,
            (Self::Int32, Self::Number) | (Self::Number, Self::Int32) => Self::Number,
            (a, b) => match (a.object_parts(), b.object_parts()) {
                (Some((a_other, a_obj)), Some((b_other, b_obj))) => {
                    let object = match (a_obj, b_obj) {
                        (None, x) | (x, None) => x,
                        (Some(x), Some(y)) if x == y => Some(x),
                        _ => Some(ObjectPart::Any),
                    };
                    Self::from_object_parts(a_other || b_other, object)
                }
                _ => Self::Top,
            },
        }
    }

    fn object_parts(self) -> Option<(bool, Option<ObjectPart>)> {
        match self {
            Self::Other => Some((true, None)),
            Self::Object => Some((false, Some(ObjectPart::Any))),
            Self::ObjectOrOther => Some((true, Some(ObjectPart::Any))),
            Self::ObjectWithStructure(s) => Some((false, Some(ObjectPart::Structure(s)))),
            Self::ObjectWithStructureOrOther(s) => Some((true, Some(ObjectPart::Structure(s)))),
            _ => None,
        }
    }

    fn from_object_parts(other: bool, object: Option<ObjectPart>) -> Self {
        match (other, object) {
            (true, None) => Self::Other,
            (false, None) => Self::Bottom,
            (false, Some(ObjectPart::Any)) => Self::Object,
            (true, Some(ObjectPart::Any)) => Self::ObjectOrOther,
            (false, Some(ObjectPart::Structure(s))) => Self::ObjectWithStructure(s),
            (true, Some(ObjectPart::Structure(s))) => Self::ObjectWithStructureOrOther(s),
        }
    }

    /// Whether `value` belongs to this classification.
    pub fn admits(&self, value: &JsValue) -> bool {
        let is_object = |value: &JsValue| {
            matches!(value, JsValue::Cell { cell_type, .. } if *cell_type >= cell::OBJECT_TYPE)
        };
        let has_structure = |value: &JsValue, expected: StructureId| {
            matches!(value, JsValue::Cell { structure, .. } if *structure == expected)
        };
        match *self {
            Self::Bottom => false,
            Self::Boolean => matches!(value, JsValue::Boolean(_)),
            Self::Other => value.is_other(),
            Self::Int32 => matches!(value, JsValue::Int32(_)),
            Self::Number => matches!(value, JsValue::Int32(_) | JsValue::Double(_)),
            Self::String => {
                matches!(value, JsValue::Cell { cell_type, .. } if *cell_type == cell::STRING_TYPE)
            }
            Self::Object => is_object(value),
            Self::ObjectOrOther => value.is_other() || is_object(value),
            Self::ObjectWithStructure(s) => has_structure(value, s),
            Self::ObjectWithStructureOrOther(s) => value.is_other() || has_structure(value, s),
            Self::Top => true,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectWithStructure(s) => write!(f, "ObjectWithStructure({s})"),
            Self::ObjectWithStructureOrOther(s) => write!(f, "ObjectWithStructureOrOther({s})"),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: StructureId = StructureId::new(1);
    const S2: StructureId = StructureId::new(2);

    #[test]
    fn join_with_bottom_and_top() {
        for t in [TypeDescriptor::Int32, TypeDescriptor::ObjectWithStructure(S1)] {
            assert_eq!(TypeDescriptor::Bottom.join(t), t);
            assert_eq!(t.join(TypeDescriptor::Top), TypeDescriptor::Top);
        }
    }

    #[test]
    fn join_numbers() {
        assert_eq!(
            TypeDescriptor::Int32.join(TypeDescriptor::Number),
            TypeDescriptor::Number
        );
        assert_eq!(TypeDescriptor::Int32.join(TypeDescriptor::String), TypeDescriptor::Top);
    }

    #[test]
    fn join_objects_and_other() {
        use TypeDescriptor::*;
        assert_eq!(ObjectWithStructure(S1).join(Other), ObjectWithStructureOrOther(S1));
        assert_eq!(ObjectWithStructure(S1).join(ObjectWithStructure(S2)), Object);
        assert_eq!(ObjectWithStructureOrOther(S1).join(ObjectWithStructure(S2)), ObjectOrOther);
        assert_eq!(Object.join(Other), ObjectOrOther);
        assert_eq!(Other.join(Boolean), Top);
    }

    #[test]
    fn structure_only_on_structure_kinds() {
        assert_eq!(TypeDescriptor::ObjectWithStructureOrOther(S2).structure(), Some(S2));
        assert_eq!(TypeDescriptor::Object.structure(), None);
    }

    #[test]
    fn admits_follows_classification() {
        let object = JsValue::Cell {
            address: 0x2000,
            structure: S1,
            cell_type: cell::FINAL_OBJECT_TYPE,
        };
        let string = JsValue::Cell {
            address: 0x3000,
            structure: S2,
            cell_type: cell::STRING_TYPE,
        };
        assert!(TypeDescriptor::ObjectWithStructureOrOther(S1).admits(&JsValue::Undefined));
        assert!(TypeDescriptor::ObjectWithStructure(S1).admits(&object));
        assert!(!TypeDescriptor::ObjectWithStructure(S2).admits(&object));
        assert!(!TypeDescriptor::Object.admits(&string));
        assert!(TypeDescriptor::String.admits(&string));
        assert!(TypeDescriptor::Number.admits(&JsValue::Double(0.5)));
        assert!(!TypeDescriptor::Int32.admits(&JsValue::Double(0.5)));
        assert!(!TypeDescriptor::Bottom.admits(&JsValue::Null));
    }

    #[test]
    fn id_blob_matches_header_layout() {
        let info = StructureInfo {
            id: StructureId::new(0x1234),
            indexing_type: 0x05,
            cell_type: cell::FINAL_OBJECT_TYPE,
            inline_type_flags: 0x40,
        };
        let bytes = info.id_blob().to_le_bytes();
        assert_eq!(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0x1234);
        assert_eq!(bytes[cell::INDEXING_TYPE_OFFSET as usize], 0x05);
        assert_eq!(bytes[cell::TYPE_INFO_TYPE_OFFSET as usize], cell::FINAL_OBJECT_TYPE);
        assert_eq!(bytes[cell::TYPE_INFO_FLAGS_OFFSET as usize], 0x40);
        assert_eq!(info.object_initialization_blob() & 0xFF, 0x05);
    }
}
