//! The abstract syntax tree.
//!
//! Nodes are created by the parser and mutated in place by semantic
//! analysis, which fills the type and resolution slots and inserts the
//! implicit [`ExprKind::Box`], [`ExprKind::Unbox`] and [`ExprKind::DeRef`]
//! nodes. After analysis every slot reachable from the root is `Some`; the
//! emitter relies on that.

use std::fmt;

use smol_str::SmolStr;

use crate::{token::Position, types::ClassId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identifier {
    pub name: SmolStr,
    pub position: Position,
}

impl Identifier {
    pub fn new(name: impl Into<SmolStr>, position: Position) -> Identifier {
        Identifier {
            name: name.into(),
            position,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessRight {
    Public,
    Protected,
    Private,
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessRight::Public => "PUBLIC",
            AccessRight::Protected => "PROTECTED",
            AccessRight::Private => "PRIVATE",
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub classes: Vec<ClassDecl>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ClassDecl {
    pub name: Identifier,
    /// The base class reference; `Object` when the declaration has no
    /// EXTENDS clause.
    pub base: Identifier,
    pub attributes: Vec<VarDecl>,
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct VarDecl {
    pub name: Identifier,
    pub type_name: Identifier,
    pub access: AccessRight,
    pub is_attribute: bool,
    /// Resolved type, filled during semantic analysis.
    pub ty: Option<ClassId>,
    /// Object offset for attributes; frame offset for parameters and
    /// locals. Filled during semantic analysis.
    pub offset: Option<i32>,
}

impl VarDecl {
    pub fn new(
        name: Identifier,
        type_name: Identifier,
        is_attribute: bool,
        access: AccessRight,
    ) -> VarDecl {
        VarDecl {
            name,
            type_name,
            access,
            is_attribute,
            ty: None,
            offset: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: Identifier,
    pub params: Vec<VarDecl>,
    /// Missing for void methods.
    pub return_type: Option<Identifier>,
    pub locals: Vec<VarDecl>,
    pub statements: Vec<Stmt>,
    /// The position of END METHOD.
    pub end_position: Position,
    pub access: AccessRight,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Stmt {
    Assignment {
        target: Expr,
        value: Expr,
    },
    /// An expression used as a statement; must be a method call.
    Call {
        call: Expr,
    },
    Read {
        target: Expr,
    },
    Write {
        value: Expr,
    },
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Return {
        value: Option<Expr>,
        position: Position,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: Position,
    /// Computed type, filled during semantic analysis (at construction for
    /// literals).
    pub ty: Option<ClassId>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExprKind {
    /// An integer, boolean or NULL literal; booleans are 1 and 0, NULL is 0.
    Literal { value: i32 },
    /// A name, optionally applied to arguments. Resolves to a variable, an
    /// attribute or a method. `SELF` and `BASE` parse to the synthetic
    /// names `_self` and `_base`.
    VarOrCall {
        name: Identifier,
        args: Vec<Expr>,
        resolution: Option<Resolution>,
    },
    /// The object access operator: `receiver.member`, where `member` is
    /// always a [`ExprKind::VarOrCall`].
    Access {
        receiver: Box<Expr>,
        member: Box<Expr>,
    },
    New {
        type_name: Identifier,
        resolved: Option<ClassId>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Wraps an unboxed Int or Bool value into a fresh heap object.
    /// Inserted during semantic analysis.
    Box { operand: Box<Expr> },
    /// Reads the primitive payload out of an Integer or Boolean object.
    /// Inserted during semantic analysis.
    Unbox { operand: Box<Expr> },
    /// Loads the value an l-value address refers to. Inserted during
    /// semantic analysis.
    DeRef { operand: Box<Expr> },
}

/// The filled-in target of a resolved [`ExprKind::VarOrCall`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Var {
        /// Frame offset for locals and parameters, object offset for
        /// attributes.
        offset: i32,
        is_attribute: bool,
        ty: ClassId,
    },
    Method {
        class: ClassId,
        index: usize,
        call: CallKind,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// A direct jump to the method's entry point (`SELF` and `BASE`
    /// receivers).
    Static,
    /// A dispatched call through the receiver's VMT.
    Virtual { vmt_index: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Minus,
    Not,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnOp::Minus => "-",
            UnOp::Not => "NOT",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    AndThen,
    OrElse,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "MOD",
            BinOp::Eq => "=",
            BinOp::Neq => "#",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::AndThen => "AND THEN",
            BinOp::OrElse => "OR ELSE",
        })
    }
}

impl Expr {
    pub fn new(kind: ExprKind, position: Position) -> Expr {
        Expr {
            kind,
            position,
            ty: None,
        }
    }

    pub fn literal(value: i32, ty: ClassId, position: Position) -> Expr {
        Expr {
            kind: ExprKind::Literal { value },
            position,
            ty: Some(ty),
        }
    }

    pub fn var_or_call(name: Identifier, args: Vec<Expr>) -> Expr {
        let position = name.position;
        Expr::new(
            ExprKind::VarOrCall {
                name,
                args,
                resolution: None,
            },
            position,
        )
    }

    /// Is this expression a reference to a variable slot, i.e. may it stand
    /// on the left of `:=`?
    pub fn is_lvalue(&self) -> bool {
        match &self.kind {
            ExprKind::VarOrCall { resolution, .. } => {
                matches!(resolution, Some(Resolution::Var { .. }))
            }
            ExprKind::Access { member, .. } => member.is_lvalue(),
            _ => false,
        }
    }

    /// The computed type. Panics if semantic analysis has not run.
    pub fn resolved_ty(&self) -> ClassId {
        self.ty.expect("expression type has not been resolved")
    }
}
