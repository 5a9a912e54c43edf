//! The optional constant-folding pass (the `-o` flag).
//!
//! A single bottom-up traversal after semantic analysis. Subtrees whose
//! operands are literals collapse into literals; IF statements with a
//! literal condition collapse into the selected branch, and `WHILE FALSE`
//! loops disappear. Types are preserved, and nothing folds across method
//! calls, READ, WRITE or object creation: those subtrees are only folded
//! internally. Division and modulo by zero are left alone so the VM traps
//! at run time.

use std::mem;

use crate::{
    ast::{BinOp, Expr, ExprKind, MethodDecl, Program, Stmt, UnOp},
    token::Position,
    types::{self, ClassId},
};

pub fn optimize(program: &mut Program) {
    for class in &mut program.classes {
        for method in &mut class.methods {
            optimize_method(method);
        }
    }
}

fn optimize_method(method: &mut MethodDecl) {
    let statements = mem::take(&mut method.statements);
    method.statements = fold_stmts(statements);
}

fn fold_stmts(statements: Vec<Stmt>) -> Vec<Stmt> {
    let mut folded = Vec::with_capacity(statements.len());
    for statement in statements {
        match statement {
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = fold_expr(condition);
                let then_branch = fold_stmts(then_branch);
                let else_branch = fold_stmts(else_branch);
                match bool_literal(&condition) {
                    Some(true) => folded.extend(then_branch),
                    Some(false) => folded.extend(else_branch),
                    None => folded.push(Stmt::If {
                        condition,
                        then_branch,
                        else_branch,
                    }),
                }
            }
            Stmt::While { condition, body } => {
                let condition = fold_expr(condition);
                let body = fold_stmts(body);
                // WHILE FALSE disappears; WHILE TRUE stays as written.
                if bool_literal(&condition) != Some(false) {
                    folded.push(Stmt::While { condition, body });
                }
            }
            Stmt::Assignment { target, value } => folded.push(Stmt::Assignment {
                target: fold_expr(target),
                value: fold_expr(value),
            }),
            Stmt::Call { call } => folded.push(Stmt::Call {
                call: fold_expr(call),
            }),
            Stmt::Read { target } => folded.push(Stmt::Read {
                target: fold_expr(target),
            }),
            Stmt::Write { value } => folded.push(Stmt::Write {
                value: fold_expr(value),
            }),
            Stmt::Return { value, position } => folded.push(Stmt::Return {
                value: value.map(fold_expr),
                position,
            }),
        }
    }
    folded
}

fn fold_expr(e: Expr) -> Expr {
    let (position, ty) = (e.position, e.ty);
    match e.kind {
        ExprKind::Binary { op, lhs, rhs } => {
            let lhs = fold_expr(*lhs);
            let rhs = fold_expr(*rhs);
            fold_binary(op, lhs, rhs, position, ty)
        }
        ExprKind::Unary { op, operand } => {
            let operand = fold_expr(*operand);
            match op {
                UnOp::Minus => {
                    if let Some(value) = int_literal(&operand) {
                        return Expr::literal(value.wrapping_neg(), types::INT, position);
                    }
                }
                UnOp::Not => {
                    if let Some(value) = bool_literal(&operand) {
                        return Expr::literal((!value) as i32, types::BOOL, position);
                    }
                }
            }
            Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                position,
                ty,
            }
        }
        ExprKind::Access { receiver, member } => Expr {
            kind: ExprKind::Access {
                receiver: Box::new(fold_expr(*receiver)),
                member: Box::new(fold_expr(*member)),
            },
            position,
            ty,
        },
        ExprKind::VarOrCall {
            name,
            args,
            resolution,
        } => Expr {
            kind: ExprKind::VarOrCall {
                name,
                args: args.into_iter().map(fold_expr).collect(),
                resolution,
            },
            position,
            ty,
        },
        ExprKind::Box { operand } => Expr {
            kind: ExprKind::Box {
                operand: Box::new(fold_expr(*operand)),
            },
            position,
            ty,
        },
        ExprKind::Unbox { operand } => Expr {
            kind: ExprKind::Unbox {
                operand: Box::new(fold_expr(*operand)),
            },
            position,
            ty,
        },
        ExprKind::DeRef { operand } => Expr {
            kind: ExprKind::DeRef {
                operand: Box::new(fold_expr(*operand)),
            },
            position,
            ty,
        },
        kind @ (ExprKind::Literal { .. } | ExprKind::New { .. }) => Expr { kind, position, ty },
    }
}

fn fold_binary(
    op: BinOp,
    lhs: Expr,
    rhs: Expr,
    position: Position,
    ty: Option<ClassId>,
) -> Expr {
    use BinOp::*;

    // The short-circuit operators fold lazily: a literal left operand
    // decides the expression even when the right one is not constant
    // (it would never have been evaluated).
    match op {
        AndThen => match bool_literal(&lhs) {
            Some(false) => return lhs,
            Some(true) => return rhs,
            None => {}
        },
        OrElse => match bool_literal(&lhs) {
            Some(true) => return lhs,
            Some(false) => return rhs,
            None => {}
        },
        _ => {}
    }

    let folded = match op {
        Add | Sub | Mul | Div | Mod => match (int_literal(&lhs), int_literal(&rhs)) {
            (Some(l), Some(r)) => {
                let value = match op {
                    Add => Some(l.wrapping_add(r)),
                    Sub => Some(l.wrapping_sub(r)),
                    Mul => Some(l.wrapping_mul(r)),
                    Div if r != 0 => Some(l.wrapping_div(r)),
                    Mod if r != 0 => Some(l.wrapping_rem(r)),
                    _ => None,
                };
                value.map(|value| (value, types::INT))
            }
            _ => None,
        },
        Lt | LtEq | Gt | GtEq => match (int_literal(&lhs), int_literal(&rhs)) {
            (Some(l), Some(r)) => {
                let value = match op {
                    Lt => l < r,
                    LtEq => l <= r,
                    Gt => l > r,
                    GtEq => l >= r,
                    _ => unreachable!(),
                };
                Some((value as i32, types::BOOL))
            }
            _ => None,
        },
        Eq | Neq => {
            let pair = match (int_literal(&lhs), int_literal(&rhs)) {
                (Some(l), Some(r)) => Some((l, r)),
                _ => match (bool_literal(&lhs), bool_literal(&rhs)) {
                    (Some(l), Some(r)) => Some((l as i32, r as i32)),
                    _ => None,
                },
            };
            pair.map(|(l, r)| {
                let value = if op == Eq { l == r } else { l != r };
                (value as i32, types::BOOL)
            })
        }
        And | Or => match (bool_literal(&lhs), bool_literal(&rhs)) {
            (Some(l), Some(r)) => {
                let value = if op == And { l && r } else { l || r };
                Some((value as i32, types::BOOL))
            }
            _ => None,
        },
        AndThen | OrElse => None,
    };

    match folded {
        Some((value, ty)) => Expr::literal(value, ty, position),
        None => Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            position,
            ty,
        },
    }
}

fn int_literal(e: &Expr) -> Option<i32> {
    match &e.kind {
        ExprKind::Literal { value } if e.ty == Some(types::INT) => Some(*value),
        _ => None,
    }
}

fn bool_literal(e: &Expr) -> Option<bool> {
    match &e.kind {
        ExprKind::Literal { value } if e.ty == Some(types::BOOL) => Some(*value != 0),
        _ => None,
    }
}
