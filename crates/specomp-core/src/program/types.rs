//! The type shapes the analysis decomposes: scalars, pointers, arrays, and
//! struct/union records.
//!
//! Types are interned into a [`TypeTable`] and referenced by [`TypeId`], so
//! structural questions (pointee, element, record fields) are id lookups
//! rather than graph chasing. `display` renders the C spelling used in
//! diagnostics and access-path rendering ("int *", "struct node").

use super::interner::{StringId, StringInterner};
use rustc_hash::FxHashMap;

/// Index into the [`TypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

/// Struct vs union. The analysis treats them identically: every field of a
/// union shares storage, which is already the conservative reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Struct,
    Union,
}

/// A named field of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: StringId,
    pub ty: TypeId,
}

/// Shape of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// A non-aggregate type, identified by its spelling ("int", "double").
    Scalar(StringId),
    /// Pointer to a pointee type.
    Pointer(TypeId),
    /// Array of an element type. Extents are irrelevant to aliasing.
    Array(TypeId),
    /// Struct or union. Fields may be empty until `define_record_fields`
    /// runs, which is what makes self-referential records expressible.
    Record {
        kind: RecordKind,
        name: StringId,
        fields: Vec<Field>,
    },
}

/// Append-only table of interned types.
#[derive(Debug, Default)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    scalars: FxHashMap<StringId, TypeId>,
    pointers: FxHashMap<TypeId, TypeId>,
    arrays: FxHashMap<TypeId, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind);
        id
    }

    /// Intern a scalar type by spelling.
    pub fn scalar(&mut self, interner: &StringInterner, spelling: &str) -> TypeId {
        let name = interner.get_or_intern(spelling);
        if let Some(&id) = self.scalars.get(&name) {
            return id;
        }
        let id = self.push(TypeKind::Scalar(name));
        self.scalars.insert(name, id);
        id
    }

    /// Intern the pointer type to `pointee`.
    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        if let Some(&id) = self.pointers.get(&pointee) {
            return id;
        }
        let id = self.push(TypeKind::Pointer(pointee));
        self.pointers.insert(pointee, id);
        id
    }

    /// Intern the array type of `element`.
    pub fn array_of(&mut self, element: TypeId) -> TypeId {
        if let Some(&id) = self.arrays.get(&element) {
            return id;
        }
        let id = self.push(TypeKind::Array(element));
        self.arrays.insert(element, id);
        id
    }

    /// Declare a record with no fields yet. Fields are attached later with
    /// [`define_record_fields`](Self::define_record_fields), allowing
    /// `struct node { struct node *next; }`.
    pub fn declare_record(&mut self, kind: RecordKind, name: StringId) -> TypeId {
        self.push(TypeKind::Record {
            kind,
            name,
            fields: Vec::new(),
        })
    }

    /// Attach the field list of a previously declared record.
    pub fn define_record_fields(&mut self, record: TypeId, fields: Vec<Field>) {
        match &mut self.kinds[record.0 as usize] {
            TypeKind::Record { fields: slot, .. } => *slot = fields,
            other => panic!("define_record_fields on non-record type {other:?}"),
        }
    }

    pub fn kind(&self, ty: TypeId) -> &TypeKind {
        &self.kinds[ty.0 as usize]
    }

    pub fn is_pointer(&self, ty: TypeId) -> bool {
        matches!(self.kind(ty), TypeKind::Pointer(_))
    }

    pub fn is_array(&self, ty: TypeId) -> bool {
        matches!(self.kind(ty), TypeKind::Array(_))
    }

    pub fn is_record(&self, ty: TypeId) -> bool {
        matches!(self.kind(ty), TypeKind::Record { .. })
    }

    pub fn is_pointer_or_array(&self, ty: TypeId) -> bool {
        self.is_pointer(ty) || self.is_array(ty)
    }

    /// Pointer pointee.
    pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        match self.kind(ty) {
            TypeKind::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    /// Array element.
    pub fn element(&self, ty: TypeId) -> Option<TypeId> {
        match self.kind(ty) {
            TypeKind::Array(e) => Some(*e),
            _ => None,
        }
    }

    /// One structural level down: pointer pointee or array element.
    pub fn indirect(&self, ty: TypeId) -> Option<TypeId> {
        match self.kind(ty) {
            TypeKind::Pointer(t) | TypeKind::Array(t) => Some(*t),
            _ => None,
        }
    }

    /// Field type of a record, by name.
    pub fn field_type(&self, record: TypeId, field: StringId) -> Option<TypeId> {
        match self.kind(record) {
            TypeKind::Record { fields, .. } => {
                fields.iter().find(|f| f.name == field).map(|f| f.ty)
            }
            _ => None,
        }
    }

    /// Render the C spelling of a type.
    pub fn display(&self, ty: TypeId, interner: &StringInterner) -> String {
        match self.kind(ty) {
            TypeKind::Scalar(name) => interner.resolve(*name),
            TypeKind::Pointer(p) => format!("{} *", self.display(*p, interner)),
            TypeKind::Array(e) => format!("{} []", self.display(*e, interner)),
            TypeKind::Record { kind, name, .. } => {
                let tag = match kind {
                    RecordKind::Struct => "struct",
                    RecordKind::Union => "union",
                };
                format!("{} {}", tag, interner.resolve(*name))
            }
        }
    }
}
