//! Id-arena representation of the parsed program the analysis walks.
//!
//! This is the front end's answer shape: declarations, expressions, and
//! statements indexed by `u32` newtype ids into flat arenas, not borrowed
//! AST references. Analyses stay decoupled from node lifetimes and can
//! store ids freely in their own tables.
//!
//! Spans are preorder/postorder intervals assigned after construction, so
//! `Span::contains` answers "does this scope's governed range cover the
//! location being visited" in O(1).

use super::directive::DirectiveId;
use super::interner::StringId;
use super::types::TypeId;
use rustc_hash::FxHashMap;

/// Index of a declaration in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub(crate) u32);

/// Index of an expression in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

/// Index of a statement in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub(crate) u32);

/// Index of a function in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) u32);

impl DeclId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}
impl ExprId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}
impl StmtId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}
impl FunctionId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A source interval. Intervals of nested nodes nest strictly, siblings are
/// disjoint; containment is the only operation the analysis needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub lo: u32,
    pub hi: u32,
}

impl Span {
    pub fn dummy() -> Self {
        Span::default()
    }

    /// True when `other` lies within this span (inclusive).
    pub fn contains(self, other: Span) -> bool {
        self.lo <= other.lo && other.hi <= self.hi
    }
}

/// Storage class of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Global,
    Local,
    Param,
}

/// A variable declaration. Extern re-declarations of the same object are
/// separate `Decl`s linked to one canonical instance by the registry.
#[derive(Debug, Clone)]
pub struct Decl {
    pub name: StringId,
    pub ty: TypeId,
    pub storage: StorageKind,
    pub init: Option<ExprId>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Deref,
    AddrOf,
    Neg,
    Not,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnaryOp {
    pub fn is_increment_or_decrement(self) -> bool {
        matches!(
            self,
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    Comma,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinOp {
    /// Plain or compound assignment.
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            BinOp::Assign | BinOp::AddAssign | BinOp::SubAssign | BinOp::MulAssign | BinOp::DivAssign
        )
    }

    pub fn is_compound_assignment(self) -> bool {
        self.is_assignment() && self != BinOp::Assign
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Reference to a (not necessarily canonical) declaration.
    DeclRef(DeclId),
    IntLit(i64),
    FloatLit(f64),
    Unary(UnaryOp, ExprId),
    Binary(BinOp, ExprId, ExprId),
    Index {
        base: ExprId,
        index: ExprId,
    },
    Member {
        base: ExprId,
        field: StringId,
        /// `p->f` rather than `s.f`.
        arrow: bool,
    },
    Call {
        callee: FunctionId,
        args: Vec<ExprId>,
    },
    /// Brace initializer, possibly nested.
    InitList(Vec<ExprId>),
    Cast(ExprId),
}

/// An expression with its front-end-computed type.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Compound(Vec<StmtId>),
    Expr(ExprId),
    Decl(Vec<DeclId>),
    For {
        init: Option<StmtId>,
        cond: Option<ExprId>,
        inc: Option<ExprId>,
        body: StmtId,
    },
    While {
        cond: ExprId,
        body: StmtId,
    },
    DoWhile {
        body: StmtId,
        cond: ExprId,
    },
    If {
        cond: ExprId,
        then_body: StmtId,
        else_body: Option<StmtId>,
    },
    Switch {
        cond: ExprId,
        body: StmtId,
    },
    Return(Option<ExprId>),
    Break,
    Continue,
    Null,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// A function definition (or bodiless declaration).
#[derive(Debug, Clone)]
pub struct Function {
    pub name: StringId,
    pub params: Vec<DeclId>,
    pub ret_ty: TypeId,
    pub body: Option<StmtId>,
    pub span: Span,
    /// Directive discovery output: governed statement → directive.
    pub directives: FxHashMap<StmtId, DirectiveId>,
}

impl Function {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}
