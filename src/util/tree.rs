//! Indented tree dumps of the AST, backing the `-s` (after parsing) and
//! `-c` (after semantic analysis) flags. With a [`ClassTable`] at hand the
//! computed type of every expression is printed after the node, with a
//! `REF` marker on l-values.

use std::io::{self, Write};

use crate::{
    ast::{ClassDecl, Expr, ExprKind, MethodDecl, Program, Stmt, VarDecl},
    types::{self, ClassTable},
};

const INDENT_WIDTH: usize = 2;

pub fn program_string(program: &Program, table: Option<&ClassTable>) -> String {
    let mut buf = Vec::with_capacity(1024);
    print_program(&mut buf, program, table).unwrap();
    String::from_utf8(buf).unwrap()
}

pub fn print_program(
    w: &mut impl Write,
    program: &Program,
    table: Option<&ClassTable>,
) -> io::Result<()> {
    for class in &program.classes {
        print_class(w, 0, class, table)?;
    }
    Ok(())
}

fn print_class(
    w: &mut impl Write,
    i: usize,
    class: &ClassDecl,
    table: Option<&ClassTable>,
) -> io::Result<()> {
    sp(w, i)?;
    writeln!(w, "CLASS {} EXTENDS {}", class.name.name, class.base.name)?;
    for attribute in &class.attributes {
        sp(w, i + 1)?;
        writeln!(
            w,
            "{} {} : {}",
            attribute.access, attribute.name.name, attribute.type_name.name
        )?;
    }
    for method in &class.methods {
        print_method(w, i + 1, method, table)?;
    }
    Ok(())
}

fn print_method(
    w: &mut impl Write,
    i: usize,
    method: &MethodDecl,
    table: Option<&ClassTable>,
) -> io::Result<()> {
    sp(w, i)?;
    write!(w, "{} METHOD {}", method.access, method.name.name)?;
    if let Some(return_type) = &method.return_type {
        write!(w, " : {}", return_type.name)?;
    }
    writeln!(w)?;
    print_var_section(w, i + 1, "PARAMS", &method.params)?;
    print_var_section(w, i + 1, "VARIABLES", &method.locals)?;
    if !method.statements.is_empty() {
        sp(w, i + 1)?;
        writeln!(w, "BEGIN")?;
        for statement in &method.statements {
            print_stmt(w, i + 2, statement, table)?;
        }
    }
    Ok(())
}

fn print_var_section(
    w: &mut impl Write,
    i: usize,
    title: &str,
    vars: &[VarDecl],
) -> io::Result<()> {
    if vars.is_empty() {
        return Ok(());
    }
    sp(w, i)?;
    writeln!(w, "{title}")?;
    for var in vars {
        sp(w, i + 1)?;
        writeln!(w, "{} : {}", var.name.name, var.type_name.name)?;
    }
    Ok(())
}

fn print_stmt(
    w: &mut impl Write,
    i: usize,
    statement: &Stmt,
    table: Option<&ClassTable>,
) -> io::Result<()> {
    match statement {
        Stmt::Assignment { target, value } => {
            sp(w, i)?;
            writeln!(w, "ASSIGNMENT")?;
            print_expr(w, i + 1, target, table)?;
            print_expr(w, i + 1, value, table)?;
        }
        Stmt::Call { call } => {
            sp(w, i)?;
            writeln!(w, "CALL")?;
            print_expr(w, i + 1, call, table)?;
        }
        Stmt::Read { target } => {
            sp(w, i)?;
            writeln!(w, "READ")?;
            print_expr(w, i + 1, target, table)?;
        }
        Stmt::Write { value } => {
            sp(w, i)?;
            writeln!(w, "WRITE")?;
            print_expr(w, i + 1, value, table)?;
        }
        Stmt::If {
            condition,
            then_branch,
            else_branch,
        } => {
            sp(w, i)?;
            writeln!(w, "IF")?;
            print_expr(w, i + 1, condition, table)?;
            sp(w, i + 1)?;
            writeln!(w, "THEN")?;
            for statement in then_branch {
                print_stmt(w, i + 2, statement, table)?;
            }
            if !else_branch.is_empty() {
                sp(w, i + 1)?;
                writeln!(w, "ELSE")?;
                for statement in else_branch {
                    print_stmt(w, i + 2, statement, table)?;
                }
            }
        }
        Stmt::While { condition, body } => {
            sp(w, i)?;
            writeln!(w, "WHILE")?;
            print_expr(w, i + 1, condition, table)?;
            sp(w, i + 1)?;
            writeln!(w, "DO")?;
            for statement in body {
                print_stmt(w, i + 2, statement, table)?;
            }
        }
        Stmt::Return { value, .. } => {
            sp(w, i)?;
            writeln!(w, "RETURN")?;
            if let Some(value) = value {
                print_expr(w, i + 1, value, table)?;
            }
        }
    }
    Ok(())
}

fn print_expr(
    w: &mut impl Write,
    i: usize,
    expr: &Expr,
    table: Option<&ClassTable>,
) -> io::Result<()> {
    sp(w, i)?;
    match &expr.kind {
        ExprKind::Literal { value } => {
            if expr.ty == Some(types::NULL_TYPE) {
                write!(w, "NULL")?;
            } else {
                write!(w, "{value}")?;
            }
            print_type(w, expr, table)?;
        }
        ExprKind::VarOrCall { name, args, .. } => {
            write!(w, "{}", name.name)?;
            print_type(w, expr, table)?;
            for arg in args {
                print_expr(w, i + 1, arg, table)?;
            }
        }
        ExprKind::Access { receiver, member } => {
            write!(w, "PERIOD")?;
            print_type(w, expr, table)?;
            print_expr(w, i + 1, receiver, table)?;
            print_expr(w, i + 1, member, table)?;
        }
        ExprKind::New { type_name, .. } => {
            write!(w, "NEW {}", type_name.name)?;
            print_type(w, expr, table)?;
        }
        ExprKind::Unary { op, operand } => {
            write!(w, "{op}")?;
            print_type(w, expr, table)?;
            print_expr(w, i + 1, operand, table)?;
        }
        ExprKind::Binary { op, lhs, rhs } => {
            write!(w, "{op}")?;
            print_type(w, expr, table)?;
            print_expr(w, i + 1, lhs, table)?;
            print_expr(w, i + 1, rhs, table)?;
        }
        ExprKind::Box { operand } => {
            write!(w, "BOX")?;
            print_type(w, expr, table)?;
            print_expr(w, i + 1, operand, table)?;
        }
        ExprKind::Unbox { operand } => {
            write!(w, "UNBOX")?;
            print_type(w, expr, table)?;
            print_expr(w, i + 1, operand, table)?;
        }
        ExprKind::DeRef { operand } => {
            write!(w, "DEREF")?;
            print_type(w, expr, table)?;
            print_expr(w, i + 1, operand, table)?;
        }
    }
    Ok(())
}

/// Writes the ` : [REF ]Type` annotation after a node, when the type has
/// been computed and a table is at hand to name it.
fn print_type(w: &mut impl Write, expr: &Expr, table: Option<&ClassTable>) -> io::Result<()> {
    if let (Some(ty), Some(table)) = (expr.ty, table) {
        let reference = if expr.is_lvalue() { "REF " } else { "" };
        writeln!(w, " : {reference}{}", table.name(ty))
    } else {
        writeln!(w)
    }
}

fn sp(w: &mut impl Write, i: usize) -> io::Result<()> {
    write!(w, "{:width$}", "", width = i * INDENT_WIDTH)
}
