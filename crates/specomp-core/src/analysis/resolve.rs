//! Dominant-reference resolution.
//!
//! Given an expression, find the single declaration whose storage the
//! expression's pointer value ultimately reads or writes, together with
//! the outermost expression of the chain (whose type keys the access-path
//! lookup). Assignments resolve through their written side, the comma
//! operator through its right side; `&` accepts one value-typed level,
//! `*` re-targets one level deeper; array subscripts resolve through the
//! base (an index expression never dominates); member accesses contribute
//! their field chain as the path stub.
//!
//! Returns `None` when no single declaration dominates (literals, call
//! results, arithmetic between non-pointers); the caller drops the edge
//! and reports it.

use super::path::PathStub;
use crate::program::{BinOp, DeclId, ExprId, ExprKind, ProgramContext, TypeId, UnaryOp};

/// The resolved target of a pointer-valued expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DominantRef {
    /// The declaration ultimately referenced (not canonicalized).
    pub decl: DeclId,
    /// The outermost expression of the dominating chain.
    pub expr: ExprId,
}

/// Resolve the dominant declaration reference of `expr`.
pub fn dominant_ref(ctx: &ProgramContext, expr: ExprId) -> Option<DominantRef> {
    resolve(ctx, expr, false)
}

/// Can this expression participate in a pointer-dominance chain?
fn chain_typed(ctx: &ProgramContext, expr: ExprId) -> bool {
    let ty = ctx.expr(expr).ty;
    ctx.types.is_pointer_or_array(ty) || ctx.types.is_record(ty)
}

fn resolve(ctx: &ProgramContext, expr: ExprId, addr_of: bool) -> Option<DominantRef> {
    let guard = |e: ExprId| addr_of || chain_typed(ctx, e);
    match &ctx.expr(expr).kind {
        ExprKind::DeclRef(decl) => guard(expr).then_some(DominantRef { decl: *decl, expr }),
        ExprKind::Unary(UnaryOp::AddrOf, operand) => {
            // `&x` produces a pointer one level above x's own type; the
            // operand is resolved in value position.
            resolve(ctx, *operand, true).map(|r| DominantRef {
                decl: r.decl,
                expr,
            })
        }
        ExprKind::Unary(UnaryOp::Deref, operand) => resolve(ctx, *operand, false)
            .filter(|_| guard(expr))
            .map(|r| DominantRef {
                decl: r.decl,
                expr,
            }),
        ExprKind::Unary(_, operand) => resolve(ctx, *operand, addr_of),
        ExprKind::Binary(op, lhs, rhs) => {
            if op.is_assignment() {
                resolve(ctx, *lhs, addr_of).filter(|_| guard(expr))
            } else if *op == BinOp::Comma {
                resolve(ctx, *rhs, addr_of).filter(|_| guard(expr))
            } else {
                // Pointer arithmetic: the pointer-typed operand dominates.
                resolve(ctx, *rhs, addr_of)
                    .or_else(|| resolve(ctx, *lhs, addr_of))
                    .filter(|_| guard(expr))
            }
        }
        ExprKind::Index { base, .. } => resolve(ctx, *base, addr_of)
            .filter(|_| guard(expr))
            .map(|r| DominantRef {
                decl: r.decl,
                expr,
            }),
        ExprKind::Member { base, .. } => resolve(ctx, *base, addr_of)
            .filter(|_| guard(expr))
            .map(|r| DominantRef {
                decl: r.decl,
                expr,
            }),
        ExprKind::Cast(operand) => resolve(ctx, *operand, addr_of),
        ExprKind::IntLit(_)
        | ExprKind::FloatLit(_)
        | ExprKind::Call { .. }
        | ExprKind::InitList(_) => None,
    }
}

/// The access-path stub contributed by the member chain of `expr`.
/// Expressions without member accesses contribute the empty stub.
pub fn expr_stub(ctx: &ProgramContext, expr: ExprId) -> PathStub {
    match &ctx.expr(expr).kind {
        ExprKind::Member { base, field, arrow } => {
            let base_stub = expr_stub(ctx, *base);
            let base_ty = ctx.expr(*base).ty;
            let record = if *arrow {
                ctx.types.indirect(base_ty).unwrap_or(base_ty)
            } else {
                base_ty
            };
            base_stub.push_field(record, *field)
        }
        ExprKind::Unary(_, operand) | ExprKind::Cast(operand) => expr_stub(ctx, *operand),
        ExprKind::Index { base, .. } => expr_stub(ctx, *base),
        _ => PathStub::empty(),
    }
}

/// The type that keys the path lookup for a dominant expression.
pub fn dominant_type(ctx: &ProgramContext, dominant: &DominantRef) -> TypeId {
    ctx.expr(dominant.expr).ty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Decl, Field, RecordKind, Span, StorageKind};

    struct Fixture {
        ctx: ProgramContext,
        p: DeclId,
        q: DeclId,
        s: DeclId,
    }

    /// `int *p; int *q; struct s { int *x; } s_var;`
    fn fixture() -> Fixture {
        let mut ctx = ProgramContext::new();
        let int = ctx.types.scalar(&ctx.interner, "int");
        let int_ptr = ctx.types.pointer_to(int);
        let s_ty = ctx
            .types
            .declare_record(RecordKind::Struct, ctx.interner.get_or_intern("s"));
        let x = ctx.interner.get_or_intern("x");
        ctx.types
            .define_record_fields(s_ty, vec![Field { name: x, ty: int_ptr }]);

        let mut add = |ctx: &mut ProgramContext, name: &str, ty| {
            let name = ctx.interner.get_or_intern(name);
            ctx.add_decl(Decl {
                name,
                ty,
                storage: StorageKind::Global,
                init: None,
                span: Span::dummy(),
            })
        };
        let p = add(&mut ctx, "p", int_ptr);
        let q = add(&mut ctx, "q", int_ptr);
        let s = add(&mut ctx, "s_var", s_ty);
        Fixture { ctx, p, q, s }
    }

    #[test]
    fn plain_pointer_reference_dominates_itself() {
        let mut fx = fixture();
        let e = fx.ctx.mk_decl_ref(fx.p);
        let r = dominant_ref(&fx.ctx, e).unwrap();
        assert_eq!(r.decl, fx.p);
        assert_eq!(r.expr, e);
    }

    #[test]
    fn scalar_reference_does_not_dominate() {
        let mut fx = fixture();
        let int = fx.ctx.types.scalar(&fx.ctx.interner, "int");
        let name = fx.ctx.interner.get_or_intern("n");
        let n = fx.ctx.add_decl(Decl {
            name,
            ty: int,
            storage: StorageKind::Global,
            init: None,
            span: Span::dummy(),
        });
        let e = fx.ctx.mk_decl_ref(n);
        assert!(dominant_ref(&fx.ctx, e).is_none());
    }

    #[test]
    fn address_of_accepts_value_operand() {
        let mut fx = fixture();
        let int = fx.ctx.types.scalar(&fx.ctx.interner, "int");
        let name = fx.ctx.interner.get_or_intern("n");
        let n = fx.ctx.add_decl(Decl {
            name,
            ty: int,
            storage: StorageKind::Global,
            init: None,
            span: Span::dummy(),
        });
        let n_ref = fx.ctx.mk_decl_ref(n);
        let addr = fx.ctx.mk_unary(UnaryOp::AddrOf, n_ref).unwrap();
        let r = dominant_ref(&fx.ctx, addr).unwrap();
        assert_eq!(r.decl, n);
        assert_eq!(r.expr, addr);
    }

    #[test]
    fn comma_resolves_through_right_side() {
        let mut fx = fixture();
        let p_ref = fx.ctx.mk_decl_ref(fx.p);
        let q_ref = fx.ctx.mk_decl_ref(fx.q);
        let comma = fx.ctx.mk_binary(BinOp::Comma, p_ref, q_ref);
        let r = dominant_ref(&fx.ctx, comma).unwrap();
        assert_eq!(r.decl, fx.q);
    }

    #[test]
    fn pointer_arithmetic_resolves_to_pointer_side() {
        let mut fx = fixture();
        let one = fx.ctx.mk_int(1);
        let p_ref = fx.ctx.mk_decl_ref(fx.p);
        let sum = fx.ctx.mk_binary(BinOp::Add, one, p_ref);
        let r = dominant_ref(&fx.ctx, sum).unwrap();
        assert_eq!(r.decl, fx.p);
    }

    #[test]
    fn member_access_contributes_stub() {
        let mut fx = fixture();
        let s_ref = fx.ctx.mk_decl_ref(fx.s);
        let x = fx.ctx.interner.get_or_intern("x");
        let member = fx.ctx.mk_member(s_ref, x, false).unwrap();
        let r = dominant_ref(&fx.ctx, member).unwrap();
        assert_eq!(r.decl, fx.s);
        assert_eq!(r.expr, member);

        let stub = expr_stub(&fx.ctx, member);
        assert_eq!(stub.display(&fx.ctx), "struct s.x:");
    }

    #[test]
    fn deref_of_scalar_pointer_does_not_dominate() {
        let mut fx = fixture();
        let p_ref = fx.ctx.mk_decl_ref(fx.p);
        let deref = fx.ctx.mk_unary(UnaryOp::Deref, p_ref).unwrap();
        // *p is an int: no pointer value flows out of it.
        assert!(dominant_ref(&fx.ctx, deref).is_none());
    }
}
