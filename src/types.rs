//! Type descriptions for foreign call signatures
//!
//! Design: a `Type` is an owned tree. Scalars are leaves; a struct owns its
//! field types in declaration order. Struct size and alignment follow the
//! C rules (fields padded to their own alignment, total size padded to the
//! struct alignment), computed once at construction so the layout passes
//! only ever read `size`/`alignment`.

use crate::abi::align_up;

/// Scalar and aggregate kinds. Discriminants are the wire codes stored in
/// the return-kind field of a descriptor's flag word.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Void = 0,
    Int = 1,
    Float = 2,
    Double = 3,
    LongDouble = 4,
    UInt8 = 5,
    SInt8 = 6,
    UInt16 = 7,
    SInt16 = 8,
    UInt32 = 9,
    SInt32 = 10,
    UInt64 = 11,
    SInt64 = 12,
    Struct = 13,
    Pointer = 14,
}

impl TypeTag {
    /// Wire code for the flag word.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// True for the hardware floating-point scalar kinds.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, TypeTag::Float | TypeTag::Double)
    }
}

/// A value type as seen by the calling convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    tag: TypeTag,
    size: usize,
    alignment: usize,
    elements: Vec<Type>,
}

macro_rules! scalar_ctor {
    ($name:ident, $tag:expr, $size:expr, $align:expr) => {
        #[inline]
        pub fn $name() -> Self {
            Self { tag: $tag, size: $size, alignment: $align, elements: Vec::new() }
        }
    };
}

impl Type {
    scalar_ctor!(void, TypeTag::Void, 1, 1);
    scalar_ctor!(uint8, TypeTag::UInt8, 1, 1);
    scalar_ctor!(sint8, TypeTag::SInt8, 1, 1);
    scalar_ctor!(uint16, TypeTag::UInt16, 2, 2);
    scalar_ctor!(sint16, TypeTag::SInt16, 2, 2);
    scalar_ctor!(uint32, TypeTag::UInt32, 4, 4);
    scalar_ctor!(sint32, TypeTag::SInt32, 4, 4);
    scalar_ctor!(uint64, TypeTag::UInt64, 8, 8);
    scalar_ctor!(sint64, TypeTag::SInt64, 8, 8);
    scalar_ctor!(int, TypeTag::Int, 4, 4);
    scalar_ctor!(float, TypeTag::Float, 4, 4);
    scalar_ctor!(double, TypeTag::Double, 8, 8);
    scalar_ctor!(longdouble, TypeTag::LongDouble, 16, 16);
    scalar_ctor!(pointer, TypeTag::Pointer, 8, 8);

    /// Build a struct type from its fields, computing C layout.
    pub fn structure(fields: Vec<Type>) -> Self {
        let mut size = 0usize;
        let mut alignment = 1usize;
        for field in &fields {
            alignment = alignment.max(field.alignment);
            size = align_up(size, field.alignment) + field.size;
        }
        size = align_up(size, alignment);
        Self { tag: TypeTag::Struct, size, alignment, elements: fields }
    }

    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub fn elements(&self) -> &[Type] {
        &self.elements
    }

    #[inline]
    pub fn is_struct(&self) -> bool {
        self.tag == TypeTag::Struct
    }
}
