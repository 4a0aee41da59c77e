//! Typed access paths.
//!
//! An [`AccessPath`] identifies one storage shape reachable from a
//! declaration's root type: zero or more record-field steps followed by a
//! terminal type. Pointer and array indirection extend the terminal chain
//! without adding a step, field crossings add one. `"struct s.x:int *"`
//! is the path with one step (`s.x`) and terminal `int *`.
//!
//! Paths are interned trees, not strings: a field step carries the record's
//! `TypeId`, so two types whose spellings overlap can never collide, and
//! the recursion guard is a record-identity check rather than a substring
//! scan.
//!
//! Decomposition terminates on recursive types: a chain that would re-enter
//! a record already on it stops at the pointer to that record.

use crate::program::{ProgramContext, StringId, TypeId, TypeKind};
use indexmap::IndexSet;

/// One field crossing: `record.field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSeg {
    pub record: TypeId,
    pub field: StringId,
}

/// A chain of field crossings without a terminal type; the "stub" carried
/// while walking an expression or recursing through a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PathStub {
    segs: Vec<FieldSeg>,
}

impl PathStub {
    pub fn empty() -> Self {
        PathStub::default()
    }

    pub fn segs(&self) -> &[FieldSeg] {
        &self.segs
    }

    /// True when `ty` is a record already crossed by this stub. Stops the
    /// structural recursion on self-referential types.
    pub fn mentions(&self, ty: TypeId) -> bool {
        self.segs.iter().any(|seg| seg.record == ty)
    }

    /// Extend the stub with a field crossing. A chain that re-enters a
    /// record is truncated back to that record's first crossing, which
    /// keeps walker-built stubs aligned with the paths decomposition
    /// produced (`p->next->next` keys the same path as `p->next`).
    pub fn push_field(&self, record: TypeId, field: StringId) -> PathStub {
        let mut segs = self.segs.clone();
        if let Some(pos) = segs.iter().position(|seg| seg.record == record) {
            segs.truncate(pos);
        }
        segs.push(FieldSeg { record, field });
        PathStub { segs }
    }

    /// Complete the stub with a terminal type. A terminal that re-enters
    /// a record already crossed truncates the chain back to that record,
    /// so `a.next` pointing at another node keys the same paths as `a`
    /// itself; every storage reachable through a recursive type is
    /// represented by the finite path set of one traversal.
    pub fn join(&self, tail: TypeId) -> AccessPath {
        let mut segs = self.segs.clone();
        if let Some(pos) = segs.iter().position(|seg| seg.record == tail) {
            segs.truncate(pos);
        }
        AccessPath { segs, tail }
    }

    pub fn display(&self, ctx: &ProgramContext) -> String {
        let mut out = String::new();
        for seg in &self.segs {
            let field = ctx.interner.resolve(seg.field);
            out.push_str(&format!(
                "{}.{}:",
                ctx.types.display(seg.record, &ctx.interner),
                field
            ));
        }
        out
    }
}

/// A complete access path: field steps plus the terminal type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPath {
    segs: Vec<FieldSeg>,
    tail: TypeId,
}

impl AccessPath {
    /// The root path of a declaration: no steps, the declared type itself.
    pub fn root(ty: TypeId) -> Self {
        AccessPath {
            segs: Vec::new(),
            tail: ty,
        }
    }

    pub fn tail(&self) -> TypeId {
        self.tail
    }

    pub fn stub(&self) -> PathStub {
        PathStub {
            segs: self.segs.clone(),
        }
    }

    pub fn display(&self, ctx: &ProgramContext) -> String {
        format!(
            "{}{}",
            self.stub().display(ctx),
            ctx.types.display(self.tail, &ctx.interner)
        )
    }
}

/// All access paths reachable by structurally decomposing `ty`: follow
/// pointers and arrays along the terminal chain, recurse into each record
/// field with an extended stub. Deterministic order, finite, duplicate
/// free.
pub fn decompose(ctx: &ProgramContext, ty: TypeId) -> Vec<AccessPath> {
    let mut out = IndexSet::new();
    walk_chain(ctx, &PathStub::empty(), ty, &mut out);
    out.into_iter().collect()
}

fn walk_chain(ctx: &ProgramContext, stub: &PathStub, ty: TypeId, out: &mut IndexSet<AccessPath>) {
    let mut current = ty;
    loop {
        if stub.mentions(current) {
            break;
        }
        out.insert(stub.join(current));
        match ctx.types.kind(current) {
            TypeKind::Pointer(next) | TypeKind::Array(next) => current = *next,
            TypeKind::Record { fields, .. } => {
                for field in fields.clone() {
                    let nested = stub.push_field(current, field.name);
                    walk_chain(ctx, &nested, field.ty, out);
                }
                break;
            }
            TypeKind::Scalar(_) => break,
        }
    }
}
