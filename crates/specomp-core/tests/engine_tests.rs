//! End-to-end engine scenarios: build a synthetic program, run the full
//! analysis pipeline, and check privacy, access sets, read-only
//! classification, and cache counts.

use specomp_core::analysis::{analyze, AccessPath, PathStub, ScopeKind};
use specomp_core::config::AnalysisConfig;
use specomp_core::diagnostics::CollectingDiagnosticHandler;
use specomp_test_helpers::ProgramBuilder;

/// `int arr[]; main() { #pragma omp parallel for
/// for (int i = 0; i < 10; i++) arr[i] = arr[i] + 1; }`
///
/// `arr` is global and unaliased: not private (iterations share it), so
/// it lands in both the read and write sets and needs checks.
#[test]
fn global_array_in_parallel_loop_is_shared() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let arr_ty = b.array(int);
    let arr = b.global("arr", arr_ty);
    let main = b.function("main", vec![], int);

    let i = b.local("i", int);
    let zero = b.lit(0);
    b.set_init(i, zero);
    let init = b.decl_stmt(vec![i]);

    let i_ref = b.var(i);
    let ten = b.lit(10);
    let cond = b.lt(i_ref, ten);

    let i_ref2 = b.var(i);
    let inc = b.post_inc(i_ref2);

    let arr_ref = b.var(arr);
    let i_ref3 = b.var(i);
    let lhs = b.index(arr_ref, i_ref3);
    let arr_ref2 = b.var(arr);
    let i_ref4 = b.var(i);
    let rhs_elem = b.index(arr_ref2, i_ref4);
    let one = b.lit(1);
    let rhs = b.add(rhs_elem, one);
    let store = b.assign(lhs, rhs);
    let body = b.expr_stmt(store);
    let loop_stmt = b.for_loop(Some(init), Some(cond), Some(inc), body);

    let fn_body = b.block(vec![loop_stmt]);
    b.body(main, fn_body);

    let dir = b.parallel_for();
    b.attach(main, loop_stmt, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let mut analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    let dir_scope = analysis.scopes.directive_scope(dir).unwrap();
    assert_eq!(analysis.top_level_directives().to_vec(), vec![dir_scope]);

    let scope = analysis.scopes.scope(dir_scope);
    assert!(scope.writes.contains(&arr), "arr is written every iteration");
    assert!(scope.reads.contains(&arr), "arr is read every iteration");
    assert!(!scope.reads.contains(&i), "the loop counter is private");
    assert!(scope.read_only.is_empty());

    // writes + reads - read_only = 1 + 1 - 0
    assert_eq!(analysis.max_caches_required, 2);

    // Not private, but also not tracked anywhere: a shared global.
    let loc = ctx.expr(store).span;
    let arr_declared_ty = ctx.decl(arr).ty;
    assert!(!analysis.is_private(&ctx, arr, &PathStub::empty(), arr_declared_ty, loc));
    assert!(analysis.is_completely_private(&ctx, i, loc));
}

/// A global read inside the region and never written anywhere reachable
/// from it is read-only: no cache slot needed.
#[test]
fn unwritten_global_is_read_only() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let total = b.global("total", int);
    let main = b.function("main", vec![], int);

    let x = b.local("x", int);
    let decl = b.decl_stmt(vec![x]);
    let x_ref = b.var(x);
    let total_ref = b.var(total);
    let copy = b.assign(x_ref, total_ref);
    let copy_stmt = b.expr_stmt(copy);
    let region = b.block(vec![decl, copy_stmt]);
    let fn_body = b.block(vec![region]);
    b.body(main, fn_body);

    let dir = b.parallel_for();
    b.attach(main, region, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    let scope = analysis.scopes.scope(analysis.scopes.directive_scope(dir).unwrap());
    assert!(scope.reads.contains(&total));
    assert!(scope.writes.is_empty(), "the private local's write is not recorded");
    assert!(scope.read_only.contains(&total));
    assert_eq!(analysis.max_caches_required, 0);
}

/// Cache counting through a nested call: two write targets and one
/// non-read-only read in the region, plus a callee needing one cache.
#[test]
fn caches_count_nested_calls_through_speculative_functions() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let a = b.global("a", int);
    let bb = b.global("b", int);
    let c = b.global("c", int);

    // void g() { c = 3; }
    let g = b.function("g", vec![], int);
    let c_ref = b.var(c);
    let three = b.lit(3);
    let store_c = b.assign(c_ref, three);
    let store_c_stmt = b.expr_stmt(store_c);
    let g_body = b.block(vec![store_c_stmt]);
    b.body(g, g_body);

    // main: region { a = 1; b = 2; x = c; g(); }
    let main = b.function("main", vec![], int);
    let a_ref = b.var(a);
    let one = b.lit(1);
    let sa = b.assign(a_ref, one);
    let sa_stmt = b.expr_stmt(sa);
    let b_ref = b.var(bb);
    let two = b.lit(2);
    let sb = b.assign(b_ref, two);
    let sb_stmt = b.expr_stmt(sb);
    let x = b.local("x", int);
    let xd = b.decl_stmt(vec![x]);
    let x_ref = b.var(x);
    let c_read = b.var(c);
    let sx = b.assign(x_ref, c_read);
    let sx_stmt = b.expr_stmt(sx);
    let call_g = b.call(g, vec![]);
    let call_stmt = b.expr_stmt(call_g);
    let region = b.block(vec![sa_stmt, sb_stmt, xd, sx_stmt, call_stmt]);
    let fn_body = b.block(vec![region]);
    b.body(main, fn_body);

    let dir = b.parallel_for();
    b.attach(main, region, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    let dir_scope = analysis.scopes.directive_scope(dir).unwrap();
    let scope = analysis.scopes.scope(dir_scope);
    assert!(scope.writes.contains(&a));
    assert!(scope.writes.contains(&bb));
    assert!(scope.reads.contains(&c));
    // c is written inside g, which the region calls: not read-only.
    assert!(scope.read_only.is_empty());

    let spec_g = analysis.scopes.speculative_scope(g).expect("g is called from the region");
    let g_scope = analysis.scopes.scope(spec_g);
    assert!(g_scope.writes.contains(&c));
    assert!(matches!(g_scope.kind, ScopeKind::SpeculativeFunction { .. }));

    // region: 2 writes + 1 read - 0 read-only, plus 1 for g.
    assert_eq!(analysis.max_caches_required, 4);
}

/// A value passed into a callee by value is a hard boundary: whatever
/// happens to the parameter inside the callee never contaminates the
/// caller's local.
#[test]
fn by_value_parameter_does_not_leak_contamination() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let int_ptr = b.ptr(int);
    let escape = b.global("escape", int_ptr);

    // void g(int v) { escape = &v; }
    let v = b.param("v", int);
    let g = b.function("g", vec![v], int);
    let escape_ref = b.var(escape);
    let v_ref = b.var(v);
    let v_addr = b.addr_of(v_ref);
    let leak = b.assign(escape_ref, v_addr);
    let leak_stmt = b.expr_stmt(leak);
    let g_body = b.block(vec![leak_stmt]);
    b.body(g, g_body);

    // main: region { int n; g(n); }
    let main = b.function("main", vec![], int);
    let n = b.local("n", int);
    let nd = b.decl_stmt(vec![n]);
    let n_ref = b.var(n);
    let call = b.call(g, vec![n_ref]);
    let call_stmt = b.expr_stmt(call);
    let region = b.block(vec![nd, call_stmt]);
    let fn_body = b.block(vec![region]);
    b.body(main, fn_body);

    let dir = b.parallel_for();
    b.attach(main, region, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let mut analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    // v was contaminated inside g...
    let spec_g = analysis.scopes.speculative_scope(g).unwrap();
    let v_paths = &analysis.scopes.scope(spec_g).tracked[&v];
    assert_eq!(v_paths.get(&AccessPath::root(int)), Some(&false));

    // ...but n stays completely private in the region.
    let loc = ctx.decl(n).span;
    assert!(analysis.is_completely_private(&ctx, n, loc));
}

/// `lp = gp` inside the region: the local pointer now aims at shared
/// storage, so dereferences of it need checks while the pointer variable
/// itself stays private.
#[test]
fn assigning_a_global_pointer_contaminates_the_pointee_level() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let int_ptr = b.ptr(int);
    let gp = b.global("gp", int_ptr);

    let main = b.function("main", vec![], int);
    let lp = b.local("lp", int_ptr);
    let lp_decl = b.decl_stmt(vec![lp]);
    let lp_ref = b.var(lp);
    let gp_ref = b.var(gp);
    let capture = b.assign(lp_ref, gp_ref);
    let capture_stmt = b.expr_stmt(capture);
    let lp_ref2 = b.var(lp);
    let lp_deref = b.deref(lp_ref2);
    let five = b.lit(5);
    let store = b.assign(lp_deref, five);
    let store_stmt = b.expr_stmt(store);
    let region = b.block(vec![lp_decl, capture_stmt, store_stmt]);
    let fn_body = b.block(vec![region]);
    b.body(main, fn_body);

    let dir = b.parallel_for();
    b.attach(main, region, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let mut analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    let loc = ctx.expr(store).span;
    // The pointer variable itself is still exclusive to the region...
    assert!(analysis.is_private(&ctx, lp, &PathStub::empty(), ctx.decl(lp).ty, loc));
    // ...what it points at is not.
    assert!(!analysis.is_private(&ctx, lp, &PathStub::empty(), int, loc));
    assert!(!analysis.is_completely_private(&ctx, lp, loc));

    let scope = analysis.scopes.scope(analysis.scopes.directive_scope(dir).unwrap());
    assert!(scope.writes.contains(&lp), "the write through *lp is recorded");
    assert!(scope.reads.contains(&gp));
    // gp aliases lp, and lp is written: not read-only.
    assert!(scope.read_only.is_empty());
}

/// `struct s { int *x; int v; struct s *next; }`: linking `b` behind
/// `a.next` propagates contamination to the shared `x` chain and leaves
/// unrelated scalar fields private.
#[test]
fn structural_contamination_through_recursive_struct() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let int_ptr = b.ptr(int);
    let s_ty = b.record("s");
    let s_ptr = b.ptr(s_ty);
    b.fields(s_ty, &[("x", int_ptr), ("v", int), ("next", s_ptr)]);
    let g = b.global("g", int_ptr);

    let main = b.function("main", vec![], int);
    let a = b.local("a", s_ty);
    let bv = b.local("b", s_ty);
    let decls = b.decl_stmt(vec![a, bv]);

    // g = b.x; (b's x-pointee storage escapes to a global)
    let g_ref = b.var(g);
    let b_ref = b.var(bv);
    let bx = b.member(b_ref, "x");
    let escape = b.assign(g_ref, bx);
    let escape_stmt = b.expr_stmt(escape);

    // a.next = &b;
    let a_ref = b.var(a);
    let a_next = b.member(a_ref, "next");
    let b_ref2 = b.var(bv);
    let b_addr = b.addr_of(b_ref2);
    let link = b.assign(a_next, b_addr);
    let link_stmt = b.expr_stmt(link);

    let region = b.block(vec![decls, escape_stmt, link_stmt]);
    let fn_body = b.block(vec![region]);
    b.body(main, fn_body);

    let dir = b.parallel_for();
    b.attach(main, region, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    let dir_scope = analysis.scopes.directive_scope(dir).unwrap();
    let tracked = &analysis.scopes.scope(dir_scope).tracked;

    let x_seg = ctx.interner.get_or_intern("x");
    let v_seg = ctx.interner.get_or_intern("v");
    let next_seg = ctx.interner.get_or_intern("next");
    let x_int = PathStub::empty().push_field(s_ty, x_seg).join(int);
    let v_int = PathStub::empty().push_field(s_ty, v_seg).join(int);
    let next_ptr = PathStub::empty().push_field(s_ty, next_seg).join(s_ptr);

    // b's x-pointee chain was contaminated by the escape...
    assert_eq!(tracked[&bv].get(&x_int), Some(&false));
    // ...and linking a.next to b carried it over to a's x chain.
    assert_eq!(tracked[&a].get(&x_int), Some(&false));
    // Unrelated fields and the roots stay private on both sides.
    for decl in [a, bv] {
        assert_eq!(tracked[&decl].get(&v_int), Some(&true));
        assert_eq!(tracked[&decl].get(&next_ptr), Some(&true));
        assert_eq!(tracked[&decl].get(&AccessPath::root(s_ty)), Some(&true));
    }
}

/// Variables named in a `private` clause are exclusive to the region:
/// accesses to them are never recorded.
#[test]
fn private_clause_suppresses_access_recording() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let int_ptr = b.ptr(int);
    let x = b.global("x", int_ptr);

    let main = b.function("main", vec![], int);
    let x_ref = b.var(x);
    let x_deref = b.deref(x_ref);
    let seven = b.lit(7);
    let store = b.assign(x_deref, seven);
    let store_stmt = b.expr_stmt(store);
    let region = b.block(vec![store_stmt]);
    let fn_body = b.block(vec![region]);
    b.body(main, fn_body);

    let dir = b.parallel_for_private(&[x]);
    b.attach(main, region, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let mut analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    let scope = analysis.scopes.scope(analysis.scopes.directive_scope(dir).unwrap());
    assert!(scope.writes.is_empty());
    assert!(scope.reads.is_empty());

    let loc = ctx.expr(store).span;
    assert!(analysis.is_completely_private(&ctx, x, loc));
    assert_eq!(analysis.max_caches_required, 0);
}

/// Calls to functions without a definition are excluded from the
/// analysis with a warning.
#[test]
fn bodiless_callee_is_reported_and_skipped() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let total = b.global("total", int);

    let h = b.function("h", vec![], int); // no body

    let main = b.function("main", vec![], int);
    let call_h = b.call(h, vec![]);
    let call_stmt = b.expr_stmt(call_h);
    let total_ref = b.var(total);
    let one = b.lit(1);
    let bump = b.assign(total_ref, one);
    let bump_stmt = b.expr_stmt(bump);
    let region = b.block(vec![call_stmt, bump_stmt]);
    let fn_body = b.block(vec![region]);
    b.body(main, fn_body);

    let dir = b.parallel_for();
    b.attach(main, region, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    assert!(analysis.scopes.speculative_scope(h).is_none());
    assert!(diags
        .diagnostics
        .iter()
        .any(|d| d.message.contains("does not have a definition")));

    // The rest of the region is still analyzed.
    let scope = analysis.scopes.scope(analysis.scopes.directive_scope(dir).unwrap());
    assert!(scope.writes.contains(&total));
}

/// An unsupported construct never becomes a scope and the region is
/// treated as serial code.
#[test]
fn unsupported_construct_is_skipped_with_warning() {
    use specomp_core::program::ConstructKind;

    let mut b = ProgramBuilder::new();
    let int = b.int();
    let total = b.global("total", int);

    let main = b.function("main", vec![], int);
    let total_ref = b.var(total);
    let one = b.lit(1);
    let bump = b.assign(total_ref, one);
    let bump_stmt = b.expr_stmt(bump);
    let region = b.block(vec![bump_stmt]);
    let fn_body = b.block(vec![region]);
    b.body(main, fn_body);

    let dir = b.directive(&[ConstructKind::Task], vec![]);
    b.attach(main, region, dir);

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    assert!(analysis.scopes.directive_scope(dir).is_none());
    assert!(analysis.top_level_directives().is_empty());
    assert!(diags
        .diagnostics
        .iter()
        .any(|d| d.message.contains("unsupported construct")));
}

/// `threadprivate` directives mark their globals and never become
/// scopes.
#[test]
fn threadprivate_directive_registers_globals() {
    use specomp_core::program::{Clause, ClauseKind, ConstructKind};

    let mut b = ProgramBuilder::new();
    let int = b.int();
    let tp = b.global("tp", int);

    let main = b.function("main", vec![], int);
    let fn_body = b.block(vec![]);
    b.body(main, fn_body);

    b.directive(
        &[ConstructKind::Threadprivate],
        vec![Clause {
            kind: ClauseKind::Threadprivate,
            vars: vec![tp],
        }],
    );

    let mut ctx = b.finish();
    let mut diags = CollectingDiagnosticHandler::new();
    let analysis = analyze(&mut ctx, &AnalysisConfig::default(), &mut diags);

    assert!(ctx.is_threadprivate(tp));
    assert!(analysis.top_level_directives().is_empty());
}
