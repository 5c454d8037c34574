//! The abstract syntax tree.
//!
//! Each node carries a fixed set of fields behind a kind tag; the code
//! generator dispatches on the tag with a single match, never with ad-hoc
//! runtime type checks.

use crate::token::Span;
use stepc_core::ValueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Percent,
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    And,
    Or,
}

/// `=`, or one of the compound-assignment operators. `Assign` has no
/// associated binary op; the others carry the op used for the implicit
/// read-modify-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    PercentAssign,
}

impl AssignOp {
    /// The arithmetic op compound assignment desugars to; `None` for plain `=`.
    pub fn binary_op(self) -> Option<BinaryOp> {
        Some(match self {
            AssignOp::Assign => return None,
            AssignOp::AddAssign => BinaryOp::Add,
            AssignOp::SubAssign => BinaryOp::Sub,
            AssignOp::MulAssign => BinaryOp::Mul,
            AssignOp::DivAssign => BinaryOp::Div,
            AssignOp::PercentAssign => BinaryOp::Percent,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Integer(i64),
    Double(f64),
    Boolean(bool),
}

impl Literal {
    pub fn kind(self) -> ValueKind {
        match self {
            Literal::Integer(_) => ValueKind::Integer,
            Literal::Double(_) => ValueKind::Double,
            Literal::Boolean(_) => ValueKind::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        value: Literal,
        span: Span,
    },
    Identifier {
        name: String,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },
    /// `target` is always `Identifier` or `Subscript`; the parser rejects
    /// every other left-hand side.
    Assign {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
        span: Span,
    },
    /// `++`/`--`, prefix or postfix. `target` is always `Identifier` or
    /// `Subscript`.
    Update {
        op: UpdateOp,
        target: Box<Expr>,
        prefix: bool,
        span: Span,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    InitList {
        elements: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Update { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::InitList { span, .. } => *span,
        }
    }

    /// Identifiers and subscripts are lvalues; everything else is not.
    pub fn is_lvalue(&self) -> bool {
        matches!(self, Expr::Identifier { .. } | Expr::Subscript { .. })
    }
}

/// The type keyword a declaration starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKeyword {
    Int,
    Double,
    Bool,
}

impl TypeKeyword {
    pub fn element_kind(self) -> ValueKind {
        match self {
            TypeKeyword::Int => ValueKind::Integer,
            TypeKeyword::Double => ValueKind::Double,
            TypeKeyword::Bool => ValueKind::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    Expr(Expr),
    List(Vec<Expr>),
}

/// Whether a declarator names a scalar or an array, and if an array,
/// whether its size was given explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum ArraySize {
    /// Not an array.
    Scalar,
    /// `name[size]`.
    Explicit(Expr),
    /// `name[]` (must carry an initializer list).
    Implicit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub name_span: Span,
    pub size: ArraySize,
    pub initializer: Option<Initializer>,
}

impl Declarator {
    pub fn is_array(&self) -> bool {
        !matches!(self.size, ArraySize::Scalar)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub type_keyword: TypeKeyword,
    pub declarators: Vec<Declarator>,
}

/// Either branch of a `for` header's initializer clause.
#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    VarDecl(VarDecl),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// Introduces a lexical scope.
    Block(Vec<Stmt>),
    Empty,
    VarDecl(VarDecl),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<ForInit>,
        cond: Option<Expr>,
        increment: Option<Expr>,
        body: Box<Stmt>,
    },
    Break(Span),
    Continue(Span),
}

/// A whole compiled unit: an ordered list of top-level statements.
pub type Program = Vec<Stmt>;
