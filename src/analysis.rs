//! Semantic analysis.
//!
//! Two phases over the AST. Class preparation resolves base classes (with
//! cycle detection), computes attribute offsets and object sizes, and builds
//! each class's virtual method table, checking override signatures. Body
//! analysis then walks every method: it maintains the scope stack, resolves
//! names, computes the type of every expression, inserts the implicit
//! box/unbox/dereference conversions, enforces access rights, selects
//! static vs. dispatched calls, and verifies return coverage.
//!
//! The first error aborts the analysis.

use std::{collections::HashMap, io, mem};

use log::debug;
use smol_str::SmolStr;

use crate::{
    ast::{
        AccessRight, CallKind, Expr, ExprKind, Identifier, Program, Resolution, Stmt,
    },
    error::{CompileError, Result},
    token::Position,
    types::{
        self, AttributeInfo, ClassId, ClassInfo, ClassTable, Member, MethodInfo, MethodRef,
        Preparation,
    },
};

/// The outcome of a successful analysis: the class table the emitter works
/// from, plus the identifier resolution map backing the `-i` dump.
pub struct Analysis {
    pub table: ClassTable,
    pub idents: Vec<IdentUse>,
}

/// One resolved identifier use.
pub struct IdentUse {
    pub name: SmolStr,
    pub position: Position,
    pub target: String,
}

impl Analysis {
    /// Prints the identifier resolution map (the `-i` flag).
    pub fn print_ident_map(&self, w: &mut impl io::Write) -> io::Result<()> {
        for use_ in &self.idents {
            writeln!(w, "{} ({}) -> {}", use_.name, use_.position, use_.target)?;
        }
        Ok(())
    }
}

/// Runs semantic analysis over the parsed program, mutating it in place.
pub fn analyze(program: &mut Program) -> Result<Analysis> {
    let mut analyzer = Analyzer {
        table: ClassTable::with_builtins(),
        scopes: Vec::new(),
        class_ids: Vec::new(),
        current_class: types::OBJECT,
        current_return: types::VOID,
        idents: Vec::new(),
    };
    analyzer.run(program)?;
    Ok(Analysis {
        table: analyzer.table,
        idents: analyzer.idents,
    })
}

/// A name binding on the scope stack.
#[derive(Copy, Clone)]
enum Binding {
    Class(ClassId),
    Attribute { class: ClassId, index: usize },
    Method { class: ClassId, index: usize },
    /// A parameter, local, or one of the synthetic locals `_self`, `_base`
    /// and `_result`. The offset is frame-relative.
    Var { offset: i32, ty: ClassId },
}

/// How a call's receiver was spelled; decides static vs. dispatched calls.
#[derive(Copy, Clone, PartialEq, Eq)]
enum Receiver {
    SelfKeyword,
    BaseKeyword,
    Other,
}

struct Analyzer {
    table: ClassTable,
    scopes: Vec<HashMap<SmolStr, Binding>>,
    /// ClassId of each AST class, in declaration order.
    class_ids: Vec<ClassId>,
    current_class: ClassId,
    current_return: ClassId,
    idents: Vec<IdentUse>,
}

impl Analyzer {
    fn run(&mut self, program: &mut Program) -> Result<()> {
        self.discover_classes(program)?;

        // The global scope: built-in and declared classes.
        self.enter();
        for id in self.table.ids() {
            if !self.table.get(id).internal {
                let name = self.table.name(id).clone();
                self.scopes.last_mut().unwrap().insert(name, Binding::Class(id));
            }
        }

        for index in 0..program.classes.len() {
            let id = self.class_ids[index];
            self.prepare_class(program, id)?;
        }
        self.check_entry_point()?;
        for index in 0..program.classes.len() {
            self.check_class(program, index)?;
        }

        self.leave();
        Ok(())
    }

    /// Seeds the class table with every declared class; duplicates are
    /// rejected here.
    fn discover_classes(&mut self, program: &Program) -> Result<()> {
        for class in &program.classes {
            if self.table.lookup(&class.name.name).is_some() {
                return Err(CompileError::context(
                    format!("{} is already declared", class.name.name),
                    class.name.position,
                ));
            }
            let id = self.table.add(ClassInfo {
                name: class.name.name.clone(),
                position: class.name.position,
                base: None,
                size: 0,
                attributes: Vec::new(),
                methods: Vec::new(),
                vmt: Vec::new(),
                prepared: Preparation::Unprepared,
                internal: false,
            });
            self.class_ids.push(id);
        }
        Ok(())
    }

    /// Computes a class's layout and VMT. Idempotent; bases are prepared
    /// first. Re-entering a class that is already in progress means the
    /// inheritance graph has a cycle.
    fn prepare_class(&mut self, program: &mut Program, id: ClassId) -> Result<()> {
        match self.table.get(id).prepared {
            Preparation::Prepared => return Ok(()),
            Preparation::InProgress => {
                let info = self.table.get(id);
                return Err(CompileError::context(
                    format!("cyclic inheritance involving {}", info.name),
                    info.position,
                ));
            }
            Preparation::Unprepared => {}
        }
        self.table.get_mut(id).prepared = Preparation::InProgress;

        let ast_index = id.index() - types::BUILTIN_COUNT;
        let base_ident = program.classes[ast_index].base.clone();
        let base = self.resolve_type(&base_ident)?;
        self.table.get_mut(id).base = Some(base);
        self.prepare_class(program, base)?;

        // No two members of one class may share a name.
        let mut seen: HashMap<SmolStr, Position> = HashMap::new();
        {
            let class = &program.classes[ast_index];
            let members = class
                .attributes
                .iter()
                .map(|a| &a.name)
                .chain(class.methods.iter().map(|m| &m.name));
            for name in members {
                if seen.insert(name.name.clone(), name.position).is_some() {
                    return Err(CompileError::context(
                        format!("{} is already declared", name.name),
                        name.position,
                    ));
                }
            }
        }

        // Attribute layout: base class first, own attributes after it.
        let base_size = self.table.get(base).size;
        let mut attributes = Vec::new();
        for (k, attribute) in program.classes[ast_index].attributes.iter().enumerate() {
            let ty = self.resolve_type(&attribute.type_name)?;
            attributes.push(AttributeInfo {
                name: attribute.name.name.clone(),
                ty,
                offset: base_size + k as i32,
                access: attribute.access,
                position: attribute.name.position,
            });
        }
        for (attribute, info) in program.classes[ast_index]
            .attributes
            .iter_mut()
            .zip(&attributes)
        {
            attribute.ty = Some(info.ty);
            attribute.offset = Some(info.offset);
        }
        let size = base_size + attributes.len() as i32;

        // Method signatures resolve in the outer (class) scope.
        let mut methods = Vec::new();
        for method in &program.classes[ast_index].methods {
            let params = method
                .params
                .iter()
                .map(|p| self.resolve_type(&p.type_name))
                .collect::<Result<Vec<_>>>()?;
            let return_type = match &method.return_type {
                Some(ident) => self.resolve_type(ident)?,
                None => types::VOID,
            };
            methods.push(MethodInfo {
                name: method.name.name.clone(),
                params,
                return_type,
                vmt_index: 0,
                access: method.access,
                position: method.name.position,
            });
        }

        // The VMT starts as a copy of the base class's table; own methods
        // replace the slot they override or append a new one.
        let mut vmt = self.table.get(base).vmt.clone();
        for (j, method) in methods.iter_mut().enumerate() {
            if let Some((base_class, base_index)) = self.table.find_method(base, &method.name) {
                let inherited = &self.table.get(base_class).methods[base_index];
                check_override(method, inherited)?;
                method.vmt_index = inherited.vmt_index;
                vmt[method.vmt_index] = MethodRef {
                    class: id,
                    method: j,
                };
            } else {
                method.vmt_index = vmt.len();
                vmt.push(MethodRef {
                    class: id,
                    method: j,
                });
            }
        }

        let info = self.table.get_mut(id);
        info.size = size;
        info.attributes = attributes;
        info.methods = methods;
        info.vmt = vmt;
        info.prepared = Preparation::Prepared;
        debug!(
            "prepared class {} ({} words, {} vmt slots)",
            self.table.name(id),
            size,
            self.table.get(id).vmt.len()
        );
        Ok(())
    }

    /// The program must declare a class `Main` with a parameterless void
    /// method `main`.
    fn check_entry_point(&self) -> Result<()> {
        let Some(main_class) = self.table.lookup("Main") else {
            return Err(CompileError::context(
                "class Main is missing",
                Position::start(),
            ));
        };
        let Some((class, index)) = self.table.find_method(main_class, "main") else {
            return Err(CompileError::context(
                "method main is missing in class Main",
                self.table.get(main_class).position,
            ));
        };
        let main = &self.table.get(class).methods[index];
        if !main.params.is_empty() {
            return Err(CompileError::context(
                "method main must not have parameters",
                main.position,
            ));
        }
        if main.return_type != types::VOID {
            return Err(CompileError::context(
                "method main must not return a value",
                main.position,
            ));
        }
        Ok(())
    }

    fn check_class(&mut self, program: &mut Program, ast_index: usize) -> Result<()> {
        let id = self.class_ids[ast_index];
        self.current_class = id;

        // One scope per class of the inheritance chain, the deepest class
        // innermost, holding that class's own attributes and methods.
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(class) = current {
            chain.push(class);
            current = self.table.get(class).base;
        }
        for &ancestor in chain.iter().rev() {
            self.enter();
            let info = self.table.get(ancestor);
            let bindings: Vec<(SmolStr, Binding)> = info
                .attributes
                .iter()
                .enumerate()
                .map(|(index, a)| {
                    (a.name.clone(), Binding::Attribute { class: ancestor, index })
                })
                .chain(info.methods.iter().enumerate().map(|(index, m)| {
                    (m.name.clone(), Binding::Method { class: ancestor, index })
                }))
                .collect();
            let scope = self.scopes.last_mut().unwrap();
            for (name, binding) in bindings {
                scope.insert(name, binding);
            }
        }

        for method_index in 0..program.classes[ast_index].methods.len() {
            self.check_method(program, ast_index, method_index)?;
        }

        for _ in &chain {
            self.leave();
        }
        Ok(())
    }

    fn check_method(
        &mut self,
        program: &mut Program,
        ast_index: usize,
        method_index: usize,
    ) -> Result<()> {
        let class_id = self.class_ids[ast_index];
        let base_id = self.table.get(class_id).base.expect("user classes have a base");
        let return_type = self.table.get(class_id).methods[method_index].return_type;
        self.current_return = return_type;
        debug!(
            "checking method {}.{}",
            self.table.name(class_id),
            program.classes[ast_index].methods[method_index].name.name
        );

        self.enter();

        // SELF sits before the return address on the stack; _result and
        // _base share its slot (their access paths differ).
        let method_position = program.classes[ast_index].methods[method_index].name.position;
        let param_count = program.classes[ast_index].methods[method_index].params.len() as i32;
        let self_offset = -(param_count + 2);
        self.add(
            &Identifier::new("_self", method_position),
            Binding::Var { offset: self_offset, ty: class_id },
        )?;
        self.add(
            &Identifier::new("_base", method_position),
            Binding::Var { offset: self_offset, ty: base_id },
        )?;
        self.add(
            &Identifier::new("_result", method_position),
            Binding::Var { offset: self_offset, ty: return_type },
        )?;

        // Parameters below the return address.
        let param_types = self.table.get(class_id).methods[method_index].params.clone();
        for k in 0..param_types.len() {
            let offset = -(param_count + 1) + k as i32;
            let name = {
                let param = &mut program.classes[ast_index].methods[method_index].params[k];
                param.ty = Some(param_types[k]);
                param.offset = Some(offset);
                param.name.clone()
            };
            self.add(&name, Binding::Var { offset, ty: param_types[k] })?;
        }

        // Locals above the saved frame pointer. All of them enter the scope
        // before any of their types resolve, so a local may shadow a class
        // name that another local then uses as a type.
        let local_count = program.classes[ast_index].methods[method_index].locals.len();
        for k in 0..local_count {
            let name = program.classes[ast_index].methods[method_index].locals[k]
                .name
                .clone();
            self.add(
                &name,
                Binding::Var { offset: 1 + k as i32, ty: types::VOID },
            )?;
        }
        for k in 0..local_count {
            let type_ident = program.classes[ast_index].methods[method_index].locals[k]
                .type_name
                .clone();
            let ty = self.resolve_type(&type_ident)?;
            let local = &mut program.classes[ast_index].methods[method_index].locals[k];
            local.ty = Some(ty);
            local.offset = Some(1 + k as i32);
            let name = local.name.name.clone();
            let scope = self.scopes.last_mut().unwrap();
            scope.insert(name, Binding::Var { offset: 1 + k as i32, ty });
        }

        let statements = mem::take(&mut program.classes[ast_index].methods[method_index].statements);
        let statements = self.check_stmts(statements)?;
        program.classes[ast_index].methods[method_index].statements = statements;

        if return_type != types::VOID {
            let method = &program.classes[ast_index].methods[method_index];
            if !stmts_return(&method.statements) {
                return Err(CompileError::context(
                    "a return value is expected on every execution path",
                    method.name.position,
                ));
            }
        }

        self.leave();
        Ok(())
    }

    fn check_stmts(&mut self, statements: Vec<Stmt>) -> Result<Vec<Stmt>> {
        statements
            .into_iter()
            .map(|statement| self.check_stmt(statement))
            .collect()
    }

    fn check_stmt(&mut self, statement: Stmt) -> Result<Stmt> {
        match statement {
            Stmt::Assignment { target, value } => {
                let target = self.check_expr(target)?;
                if !target.is_lvalue() {
                    return Err(CompileError::context("l-value expected", target.position));
                }
                let value = self.check_expr(value)?;
                let value = self.boxed(value);
                self.require_assignable(&value, target.resolved_ty())?;
                Ok(Stmt::Assignment { target, value })
            }
            Stmt::Call { call } => {
                let call = self.check_expr(call)?;
                let is_call = matches!(
                    &call.kind,
                    ExprKind::Access { member, .. } if matches!(
                        &member.kind,
                        ExprKind::VarOrCall { resolution: Some(Resolution::Method { .. }), .. }
                    )
                );
                if !is_call {
                    return Err(CompileError::context("method call expected", call.position));
                }
                Ok(Stmt::Call { call })
            }
            Stmt::Read { target } => {
                let target = self.check_expr(target)?;
                if !target.is_lvalue() {
                    return Err(CompileError::context("l-value expected", target.position));
                }
                let ty = target.resolved_ty();
                if !self.table.is_a(ty, types::INTEGER) {
                    return Err(CompileError::context(
                        format!("expected type Integer, but got {}", self.table.name(ty)),
                        target.position,
                    ));
                }
                Ok(Stmt::Read { target })
            }
            Stmt::Write { value } => {
                let value = self.check_expr(value)?;
                let value = self.unboxed(value);
                self.require_type(&value, types::INT)?;
                Ok(Stmt::Write { value })
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.check_expr(condition)?;
                let condition = self.unboxed(condition);
                self.require_type(&condition, types::BOOL)?;
                Ok(Stmt::If {
                    condition,
                    then_branch: self.check_stmts(then_branch)?,
                    else_branch: self.check_stmts(else_branch)?,
                })
            }
            Stmt::While { condition, body } => {
                let condition = self.check_expr(condition)?;
                let condition = self.unboxed(condition);
                self.require_type(&condition, types::BOOL)?;
                Ok(Stmt::While {
                    condition,
                    body: self.check_stmts(body)?,
                })
            }
            Stmt::Return { value, position } => match value {
                None => {
                    if self.current_return != types::VOID {
                        return Err(CompileError::context(
                            "a return value is expected",
                            position,
                        ));
                    }
                    Ok(Stmt::Return { value: None, position })
                }
                Some(value) => {
                    if self.current_return == types::VOID {
                        return Err(CompileError::context(
                            "no return value is allowed here",
                            position,
                        ));
                    }
                    let value = self.check_expr(value)?;
                    let value = self.boxed(value);
                    self.require_assignable(&value, self.current_return)?;
                    Ok(Stmt::Return {
                        value: Some(value),
                        position,
                    })
                }
            },
        }
    }

    fn check_expr(&mut self, expr: Expr) -> Result<Expr> {
        let position = expr.position;
        match expr.kind {
            ExprKind::Literal { .. } => Ok(expr),
            ExprKind::VarOrCall { name, args, .. } => self.check_var_or_call(name, args, position),
            ExprKind::Access { receiver, member } => {
                self.check_access(*receiver, *member, position)
            }
            ExprKind::New { type_name, .. } => {
                let resolved = self.resolve_type(&type_name)?;
                Ok(Expr {
                    kind: ExprKind::New {
                        type_name,
                        resolved: Some(resolved),
                    },
                    position,
                    ty: Some(resolved),
                })
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.check_expr(*operand)?;
                let operand = self.unboxed(operand);
                let ty = match op {
                    crate::ast::UnOp::Minus => types::INT,
                    crate::ast::UnOp::Not => types::BOOL,
                };
                self.require_type(&operand, ty)?;
                Ok(Expr {
                    kind: ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    position,
                    ty: Some(ty),
                })
            }
            ExprKind::Binary { op, lhs, rhs } => self.check_binary(op, *lhs, *rhs, position),
            ExprKind::Box { .. } | ExprKind::Unbox { .. } | ExprKind::DeRef { .. } => {
                Err(CompileError::internal(
                    "conversion node in the untyped tree",
                    position,
                ))
            }
        }
    }

    /// Checks a bare name or call. Attributes and methods reached this way
    /// go through an inserted `SELF` access.
    fn check_var_or_call(
        &mut self,
        name: Identifier,
        args: Vec<Expr>,
        position: Position,
    ) -> Result<Expr> {
        let Some(binding) = self.resolve(&name.name) else {
            return Err(CompileError::context(
                format!("{} is not declared", name.name),
                name.position,
            ));
        };
        match binding {
            Binding::Class(_) => Err(CompileError::context(
                format!("{} does not name a variable or a method", name.name),
                name.position,
            )),
            Binding::Attribute { .. } | Binding::Method { .. } => {
                let receiver =
                    Expr::var_or_call(Identifier::new("_self", name.position), Vec::new());
                let member = Expr::var_or_call(name, args);
                self.check_access(receiver, member, position)
            }
            Binding::Var { offset, ty } => {
                if !args.is_empty() {
                    return Err(CompileError::context(
                        format!("{} is not a method", name.name),
                        name.position,
                    ));
                }
                self.record(&name, format!("variable at offset {offset}"));
                Ok(Expr {
                    kind: ExprKind::VarOrCall {
                        name,
                        args,
                        resolution: Some(Resolution::Var {
                            offset,
                            is_attribute: false,
                            ty,
                        }),
                    },
                    position,
                    ty: Some(ty),
                })
            }
        }
    }

    fn check_access(&mut self, receiver: Expr, member: Expr, position: Position) -> Result<Expr> {
        // The receiver's syntactic form picks static vs. dispatched calls.
        let receiver_keyword = match &receiver.kind {
            ExprKind::VarOrCall { name, .. } if name.name == "_self" => Receiver::SelfKeyword,
            ExprKind::VarOrCall { name, .. } if name.name == "_base" => Receiver::BaseKeyword,
            _ => Receiver::Other,
        };

        let receiver = self.check_expr(receiver)?;
        // Dereference to a reference value; a receiver of unboxed type is
        // boxed so member lookup happens in its boxing class.
        let receiver = self.boxed(receiver);
        let receiver_class = receiver.resolved_ty();
        if !self.table.is_reference(receiver_class) {
            return Err(CompileError::context(
                format!("type {} has no members", self.table.name(receiver_class)),
                receiver.position,
            ));
        }

        let member_position = member.position;
        let ExprKind::VarOrCall { name, args, .. } = member.kind else {
            return Err(CompileError::internal(
                "the right side of an access is neither a name nor a call",
                member_position,
            ));
        };

        match self.table.find_member(receiver_class, &name.name) {
            None => Err(CompileError::context(
                format!(
                    "class {} has no member {}",
                    self.table.name(receiver_class),
                    name.name
                ),
                name.position,
            )),
            Some(Member::Attribute(class, index)) => {
                let attribute = &self.table.get(class).attributes[index];
                let (ty, offset, access) = (attribute.ty, attribute.offset, attribute.access);
                self.check_accessible(access, class, &name)?;
                if !args.is_empty() {
                    return Err(CompileError::context(
                        format!("{} is not a method", name.name),
                        name.position,
                    ));
                }
                self.record(
                    &name,
                    format!("attribute {}.{}", self.table.name(class), name.name),
                );
                let member = Expr {
                    kind: ExprKind::VarOrCall {
                        name,
                        args,
                        resolution: Some(Resolution::Var {
                            offset,
                            is_attribute: true,
                            ty,
                        }),
                    },
                    position: member_position,
                    ty: Some(ty),
                };
                Ok(Expr {
                    kind: ExprKind::Access {
                        receiver: Box::new(receiver),
                        member: Box::new(member),
                    },
                    position,
                    ty: Some(ty),
                })
            }
            Some(Member::Method(class, index)) => {
                let info = &self.table.get(class).methods[index];
                let (access, vmt_index, return_type) =
                    (info.access, info.vmt_index, info.return_type);
                let params = info.params.clone();
                self.check_accessible(access, class, &name)?;
                if args.len() != params.len() {
                    return Err(CompileError::context(
                        format!(
                            "incorrect number of arguments: expected {}, got {}",
                            params.len(),
                            args.len()
                        ),
                        name.position,
                    ));
                }
                let args = args
                    .into_iter()
                    .zip(params)
                    .map(|(arg, formal)| {
                        let arg = self.check_expr(arg)?;
                        let arg = self.boxed(arg);
                        self.require_assignable(&arg, formal)?;
                        Ok(arg)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let call = match receiver_keyword {
                    Receiver::SelfKeyword | Receiver::BaseKeyword => CallKind::Static,
                    Receiver::Other => CallKind::Virtual { vmt_index },
                };
                self.record(
                    &name,
                    format!("method {}.{}", self.table.name(class), name.name),
                );
                let member = Expr {
                    kind: ExprKind::VarOrCall {
                        name,
                        args,
                        resolution: Some(Resolution::Method { class, index, call }),
                    },
                    position: member_position,
                    ty: Some(return_type),
                };
                Ok(Expr {
                    kind: ExprKind::Access {
                        receiver: Box::new(receiver),
                        member: Box::new(member),
                    },
                    position,
                    ty: Some(return_type),
                })
            }
        }
    }

    fn check_binary(
        &mut self,
        op: crate::ast::BinOp,
        lhs: Expr,
        rhs: Expr,
        position: Position,
    ) -> Result<Expr> {
        use crate::ast::BinOp::*;
        let (lhs, rhs, ty) = match op {
            Add | Sub | Mul | Div | Mod => {
                let lhs = self.check_expr(lhs)?;
                let lhs = self.unboxed(lhs);
                let rhs = self.check_expr(rhs)?;
                let rhs = self.unboxed(rhs);
                self.require_type(&lhs, types::INT)?;
                self.require_type(&rhs, types::INT)?;
                (lhs, rhs, types::INT)
            }
            Lt | LtEq | Gt | GtEq => {
                let lhs = self.check_expr(lhs)?;
                let lhs = self.unboxed(lhs);
                let rhs = self.check_expr(rhs)?;
                let rhs = self.unboxed(rhs);
                self.require_type(&lhs, types::INT)?;
                self.require_type(&rhs, types::INT)?;
                (lhs, rhs, types::BOOL)
            }
            And | Or | AndThen | OrElse => {
                let lhs = self.check_expr(lhs)?;
                let lhs = self.unboxed(lhs);
                let rhs = self.check_expr(rhs)?;
                let rhs = self.unboxed(rhs);
                self.require_type(&lhs, types::BOOL)?;
                self.require_type(&rhs, types::BOOL)?;
                (lhs, rhs, types::BOOL)
            }
            Eq | Neq => {
                let lhs = self.check_expr(lhs)?;
                let rhs = self.check_expr(rhs)?;
                // A NULL operand keeps the comparison on references, so a
                // boxed Integer or Boolean can be tested against NULL.
                let null_involved =
                    lhs.ty == Some(types::NULL_TYPE) || rhs.ty == Some(types::NULL_TYPE);
                let (lhs, rhs) = if null_involved {
                    (self.dereferenced(lhs), self.dereferenced(rhs))
                } else {
                    (self.unboxed(lhs), self.unboxed(rhs))
                };
                let (l, r) = (lhs.resolved_ty(), rhs.resolved_ty());
                if !self.table.is_a(l, r) && !self.table.is_a(r, l) {
                    return Err(CompileError::context(
                        format!(
                            "types {} and {} cannot be compared",
                            self.table.name(l),
                            self.table.name(r)
                        ),
                        position,
                    ));
                }
                (lhs, rhs, types::BOOL)
            }
        };
        Ok(Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            position,
            ty: Some(ty),
        })
    }
}

// Conversions and lookups.
impl Analyzer {
    /// Makes the expression yield a reference value: unboxed Int and Bool
    /// values are boxed, l-values dereferenced.
    fn boxed(&self, e: Expr) -> Expr {
        match e.ty {
            Some(types::INT) => wrap(e, BoxKind::Box, types::INTEGER),
            Some(types::BOOL) => wrap(e, BoxKind::Box, types::BOOLEAN),
            _ => self.dereferenced(e),
        }
    }

    /// Makes the expression yield an unboxed value: l-values are
    /// dereferenced, Integer and Boolean references unboxed. NULL and plain
    /// object references stay as they are.
    fn unboxed(&self, e: Expr) -> Expr {
        let e = self.dereferenced(e);
        let ty = e.resolved_ty();
        if self.table.is_reference(ty) && self.table.is_a(ty, types::INTEGER) {
            wrap(e, BoxKind::Unbox, types::INT)
        } else if self.table.is_reference(ty) && self.table.is_a(ty, types::BOOLEAN) {
            wrap(e, BoxKind::Unbox, types::BOOL)
        } else {
            e
        }
    }

    fn dereferenced(&self, e: Expr) -> Expr {
        if e.is_lvalue() {
            let (position, ty) = (e.position, e.ty);
            Expr {
                kind: ExprKind::DeRef {
                    operand: Box::new(e),
                },
                position,
                ty,
            }
        } else {
            e
        }
    }

    /// Resolves a type name through the scope stack; the binding must be a
    /// class.
    fn resolve_type(&mut self, ident: &Identifier) -> Result<ClassId> {
        match self.resolve(&ident.name) {
            Some(Binding::Class(id)) => {
                self.record(ident, format!("class {}", ident.name));
                Ok(id)
            }
            Some(_) => Err(CompileError::context(
                format!("{} is not a type", ident.name),
                ident.position,
            )),
            None => Err(CompileError::context(
                format!("{} is not declared", ident.name),
                ident.position,
            )),
        }
    }

    /// Innermost-first search through the scope stack.
    fn resolve(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn check_accessible(
        &self,
        access: AccessRight,
        defining: ClassId,
        name: &Identifier,
    ) -> Result<()> {
        let allowed = match access {
            AccessRight::Public => true,
            AccessRight::Protected => self.table.is_a(self.current_class, defining),
            AccessRight::Private => self.current_class == defining,
        };
        if allowed {
            Ok(())
        } else {
            Err(CompileError::context(
                format!("member {} is not accessible here", name.name),
                name.position,
            ))
        }
    }

    fn require_assignable(&self, e: &Expr, target: ClassId) -> Result<()> {
        let ty = e.resolved_ty();
        if self.table.is_a(ty, target) {
            Ok(())
        } else {
            Err(CompileError::context(
                format!(
                    "type {} is not assignable to type {}",
                    self.table.name(ty),
                    self.table.name(target)
                ),
                e.position,
            ))
        }
    }

    fn require_type(&self, e: &Expr, expected: ClassId) -> Result<()> {
        if e.resolved_ty() == expected {
            Ok(())
        } else {
            Err(CompileError::context(
                format!(
                    "expected type {}, but got {}",
                    self.table.name(expected),
                    self.table.name(e.resolved_ty())
                ),
                e.position,
            ))
        }
    }

    fn enter(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn leave(&mut self) {
        self.scopes.pop();
    }

    /// Binds a name in the current scope; rebinding within one scope is a
    /// redeclaration error.
    fn add(&mut self, name: &Identifier, binding: Binding) -> Result<()> {
        let scope = self.scopes.last_mut().expect("no open scope");
        if scope.insert(name.name.clone(), binding).is_some() {
            return Err(CompileError::context(
                format!("{} is already declared", name.name),
                name.position,
            ));
        }
        Ok(())
    }

    fn record(&mut self, ident: &Identifier, target: String) {
        self.idents.push(IdentUse {
            name: ident.name.clone(),
            position: ident.position,
            target,
        });
    }
}

enum BoxKind {
    Box,
    Unbox,
}

fn wrap(e: Expr, kind: BoxKind, ty: ClassId) -> Expr {
    let position = e.position;
    let operand = Box::new(e);
    Expr {
        kind: match kind {
            BoxKind::Box => ExprKind::Box { operand },
            BoxKind::Unbox => ExprKind::Unbox { operand },
        },
        position,
        ty: Some(ty),
    }
}

/// Override signatures must match exactly; the access right may widen but
/// never narrow. Everything else is an illegal overload.
fn check_override(own: &MethodInfo, inherited: &MethodInfo) -> Result<()> {
    let narrowing = match inherited.access {
        AccessRight::Public => own.access != AccessRight::Public,
        AccessRight::Protected => own.access == AccessRight::Private,
        AccessRight::Private => false,
    };
    if narrowing || own.params != inherited.params || own.return_type != inherited.return_type {
        return Err(CompileError::context(
            format!("illegal overload of {}", own.name),
            own.position,
        ));
    }
    Ok(())
}

/// The return-coverage predicate: a RETURN covers, an IF covers when both
/// branches cover, a WHILE never covers, a block covers when any of its
/// statements does.
fn stmts_return(statements: &[Stmt]) -> bool {
    statements.iter().any(stmt_returns)
}

fn stmt_returns(statement: &Stmt) -> bool {
    match statement {
        Stmt::Return { .. } => true,
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => stmts_return(then_branch) && stmts_return(else_branch),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use crate::{parser, util::tree};

    use super::*;

    #[track_caller]
    fn analyzed(source: &str) -> (Program, Analysis) {
        let mut program = parser::parse(source, false).expect("unexpected parse error");
        let analysis = analyze(&mut program).expect("unexpected context error");
        (program, analysis)
    }

    #[track_caller]
    fn typed_tree(source: &str) -> String {
        let (program, analysis) = analyzed(source);
        tree::program_string(&program, Some(&analysis.table))
    }

    #[track_caller]
    fn context_error(source: &str) -> String {
        let mut program = parser::parse(source, false).expect("unexpected parse error");
        analyze(&mut program)
            .err()
            .expect("expected a context error")
            .to_string()
    }

    #[test]
    fn boxing_and_self_insertion() {
        let source = indoc! {"
            CLASS Main IS
              x : Integer;
              METHOD main IS
              BEGIN
                x := 1 + 2;
              END METHOD
            END CLASS
        "};
        assert_eq!(
            typed_tree(source),
            indoc! {"
                CLASS Main EXTENDS Object
                  PUBLIC x : Integer
                  PUBLIC METHOD main
                    BEGIN
                      ASSIGNMENT
                        PERIOD : REF Integer
                          DEREF : Main
                            _self : REF Main
                          x : REF Integer
                        BOX : Integer
                          + : Int
                            1 : Int
                            2 : Int
            "}
        );
    }

    #[test]
    fn unboxing_of_attribute_reads() {
        let source = indoc! {"
            CLASS Main IS
              x : Integer;
              METHOD main IS
              BEGIN
                WRITE x + 1;
              END METHOD
            END CLASS
        "};
        assert_eq!(
            typed_tree(source),
            indoc! {"
                CLASS Main EXTENDS Object
                  PUBLIC x : Integer
                  PUBLIC METHOD main
                    BEGIN
                      WRITE
                        + : Int
                          UNBOX : Int
                            DEREF : Integer
                              PERIOD : REF Integer
                                DEREF : Main
                                  _self : REF Main
                                x : REF Integer
                          1 : Int
            "}
        );
    }

    #[test]
    fn layout_and_vmt() {
        let source = indoc! {"
            CLASS A IS
              a1, a2 : Integer;
              METHOD f IS BEGIN END METHOD
              METHOD g IS BEGIN END METHOD
            END CLASS
            CLASS B EXTENDS A IS
              b1 : Integer;
              METHOD g IS BEGIN END METHOD
              METHOD h IS BEGIN END METHOD
            END CLASS
            CLASS Main IS
              METHOD main IS BEGIN END METHOD
            END CLASS
        "};
        let (_, analysis) = analyzed(source);
        let table = &analysis.table;
        let a = table.lookup("A").unwrap();
        let b = table.lookup("B").unwrap();

        // size = base size + own attribute count; offsets are contiguous.
        assert_eq!(table.get(a).size, 3);
        assert_eq!(table.get(b).size, 4);
        assert_eq!(table.get(a).attributes[0].offset, 1);
        assert_eq!(table.get(a).attributes[1].offset, 2);
        assert_eq!(table.get(b).attributes[0].offset, 3);

        // B's VMT agrees with A's except at the overridden slot.
        let a_vmt = &table.get(a).vmt;
        let b_vmt = &table.get(b).vmt;
        assert_eq!(a_vmt.len(), 2);
        assert_eq!(b_vmt.len(), 3);
        assert_eq!(b_vmt[0], a_vmt[0]);
        assert_eq!(b_vmt[1], MethodRef { class: b, method: 0 });
        assert_eq!(b_vmt[2], MethodRef { class: b, method: 1 });
        assert_eq!(table.method_label(b_vmt[0]), "A_f");
        assert_eq!(table.method_label(b_vmt[1]), "B_g");
    }

    #[test]
    fn frame_offsets() {
        let source = indoc! {"
            CLASS Main IS
              METHOD take(p, q : Integer) : Integer IS
                v : Integer;
              BEGIN
                RETURN p;
              END METHOD
              METHOD main IS BEGIN END METHOD
            END CLASS
        "};
        let (program, _) = analyzed(source);
        let method = &program.classes[0].methods[0];
        // Two parameters: SELF at -(2+2), parameters at -3 and -2, the
        // local at +1.
        assert_eq!(method.params[0].offset, Some(-3));
        assert_eq!(method.params[1].offset, Some(-2));
        assert_eq!(method.locals[0].offset, Some(1));
    }

    #[test]
    fn return_coverage() {
        let source = indoc! {"
            CLASS Main IS
              METHOD half(x : Integer) : Integer IS
              BEGIN
                IF TRUE THEN
                  RETURN 1;
                END IF;
              END METHOD
              METHOD main IS BEGIN END METHOD
            END CLASS
        "};
        assert_eq!(
            context_error(source),
            "Error at line 2, col 10: context error: \
             a return value is expected on every execution path"
        );
    }

    #[test]
    fn return_coverage_with_else() {
        let source = indoc! {"
            CLASS Main IS
              METHOD sign(x : Integer) : Integer IS
              BEGIN
                IF x < 0 THEN
                  RETURN 0 - 1;
                ELSEIF x > 0 THEN
                  RETURN 1;
                ELSE
                  RETURN 0;
                END IF;
              END METHOD
              METHOD main IS BEGIN END METHOD
            END CLASS
        "};
        analyzed(source);
    }

    #[test]
    fn undeclared_and_redeclared_names() {
        assert_eq!(
            context_error(
                "CLASS Main IS METHOD main IS BEGIN y := 1; END METHOD END CLASS"
            ),
            "Error at line 1, col 36: context error: y is not declared"
        );
        assert_eq!(
            context_error(
                "CLASS Main IS METHOD main(a : Integer; a : Integer) IS BEGIN END METHOD END CLASS"
            ),
            "Error at line 1, col 40: context error: a is already declared"
        );
        assert_eq!(
            context_error("CLASS Main IS END CLASS CLASS Main IS END CLASS"),
            "Error at line 1, col 31: context error: Main is already declared"
        );
    }

    #[test]
    fn cyclic_inheritance() {
        let source = indoc! {"
            CLASS A EXTENDS B IS END CLASS
            CLASS B EXTENDS A IS END CLASS
            CLASS Main IS METHOD main IS BEGIN END METHOD END CLASS
        "};
        assert_eq!(
            context_error(source),
            "Error at line 1, col 7: context error: cyclic inheritance involving A"
        );
    }

    #[test]
    fn illegal_overload() {
        let source = indoc! {"
            CLASS A IS
              METHOD f : Integer IS BEGIN RETURN 1; END METHOD
            END CLASS
            CLASS B EXTENDS A IS
              METHOD f : Boolean IS BEGIN RETURN TRUE; END METHOD
            END CLASS
            CLASS Main IS METHOD main IS BEGIN END METHOD END CLASS
        "};
        assert_eq!(
            context_error(source),
            "Error at line 5, col 10: context error: illegal overload of f"
        );
    }

    #[test]
    fn access_narrowing_is_an_illegal_overload() {
        let source = indoc! {"
            CLASS A IS
              METHOD f IS BEGIN END METHOD
            END CLASS
            CLASS B EXTENDS A IS
              PRIVATE METHOD f IS BEGIN END METHOD
            END CLASS
            CLASS Main IS METHOD main IS BEGIN END METHOD END CLASS
        "};
        assert_eq!(
            context_error(source),
            "Error at line 5, col 18: context error: illegal overload of f"
        );
    }

    #[test]
    fn access_rights() {
        let private = indoc! {"
            CLASS A IS
              PRIVATE n : Integer;
            END CLASS
            CLASS Main IS
              METHOD main IS
                a : A;
              BEGIN
                a := NEW A;
                a.n := NULL;
              END METHOD
            END CLASS
        "};
        assert_eq!(
            context_error(private),
            "Error at line 9, col 7: context error: member n is not accessible here"
        );

        // PROTECTED members are visible in subclasses.
        let protected = indoc! {"
            CLASS A IS
              PROTECTED n : Integer;
            END CLASS
            CLASS B EXTENDS A IS
              METHOD poke IS
              BEGIN
                n := NULL;
              END METHOD
            END CLASS
            CLASS Main IS METHOD main IS BEGIN END METHOD END CLASS
        "};
        analyzed(protected);

        // Inherited PRIVATE members stay inaccessible, even unqualified.
        let inherited_private = indoc! {"
            CLASS A IS
              PRIVATE n : Integer;
            END CLASS
            CLASS B EXTENDS A IS
              METHOD poke IS
              BEGIN
                n := NULL;
              END METHOD
            END CLASS
            CLASS Main IS METHOD main IS BEGIN END METHOD END CLASS
        "};
        assert_eq!(
            context_error(inherited_private),
            "Error at line 7, col 5: context error: member n is not accessible here"
        );
    }

    #[test]
    fn null_comparisons_stay_on_references() {
        let source = indoc! {"
            CLASS Main IS
              x : Integer;
              METHOD main IS
              BEGIN
                IF x = NULL THEN
                  WRITE 1;
                END IF;
              END METHOD
            END CLASS
        "};
        // The Integer operand is dereferenced but not unboxed.
        let tree = typed_tree(source);
        assert!(tree.contains("= : Bool"), "{tree}");
        assert!(!tree.contains("UNBOX"), "{tree}");
    }

    #[test]
    fn incomparable_types() {
        assert_eq!(
            context_error(
                "CLASS Main IS METHOD main IS BEGIN IF 1 = NULL THEN END IF; END METHOD END CLASS"
            ),
            "Error at line 1, col 39: context error: types Int and NullType cannot be compared"
        );
    }

    #[test]
    fn entry_point_checks() {
        assert_eq!(
            context_error("CLASS A IS END CLASS"),
            "Error at line 1, col 1: context error: class Main is missing"
        );
        assert_eq!(
            context_error("CLASS Main IS END CLASS"),
            "Error at line 1, col 7: context error: method main is missing in class Main"
        );
        assert_eq!(
            context_error(
                "CLASS Main IS METHOD main(x : Integer) IS BEGIN END METHOD END CLASS"
            ),
            "Error at line 1, col 22: context error: method main must not have parameters"
        );
        assert_eq!(
            context_error(
                "CLASS Main IS METHOD main : Integer IS BEGIN RETURN 1; END METHOD END CLASS"
            ),
            "Error at line 1, col 22: context error: method main must not return a value"
        );
    }

    #[test]
    fn call_statement_requires_a_method() {
        assert_eq!(
            context_error("CLASS Main IS METHOD main IS BEGIN SELF; END METHOD END CLASS"),
            "Error at line 1, col 36: context error: method call expected"
        );
    }

    #[test]
    fn dispatch_selection() {
        let source = indoc! {"
            CLASS A IS
              METHOD f IS BEGIN END METHOD
              METHOD g IS
              BEGIN
                f;
                SELF.f;
              END METHOD
            END CLASS
            CLASS B EXTENDS A IS
              METHOD h IS
              BEGIN
                BASE.f;
              END METHOD
            END CLASS
            CLASS Main IS
              METHOD main IS
                a : A;
              BEGIN
                a := NEW B;
                a.f;
              END METHOD
            END CLASS
        "};
        let (program, _) = analyzed(source);

        fn call_kinds(statements: &[Stmt]) -> Vec<CallKind> {
            statements
                .iter()
                .filter_map(|statement| match statement {
                    Stmt::Call { call } => match &call.kind {
                        ExprKind::Access { member, .. } => match &member.kind {
                            ExprKind::VarOrCall {
                                resolution: Some(Resolution::Method { call, .. }),
                                ..
                            } => Some(*call),
                            _ => None,
                        },
                        _ => None,
                    },
                    _ => None,
                })
                .collect()
        }

        // Bare and SELF calls are static, BASE calls are static.
        assert_eq!(
            call_kinds(&program.classes[0].methods[1].statements),
            vec![CallKind::Static, CallKind::Static]
        );
        assert_eq!(
            call_kinds(&program.classes[1].methods[0].statements),
            vec![CallKind::Static]
        );
        // A call through a variable dispatches through the VMT.
        assert_eq!(
            call_kinds(&program.classes[2].methods[0].statements),
            vec![CallKind::Virtual { vmt_index: 0 }]
        );
    }

    #[test]
    fn ident_map_records_resolutions() {
        let source = indoc! {"
            CLASS Main IS
              METHOD main IS
                x : Integer;
              BEGIN
                x := NULL;
              END METHOD
            END CLASS
        "};
        let (_, analysis) = analyzed(source);
        let lines: Vec<String> = analysis
            .idents
            .iter()
            .map(|u| format!("{} -> {}", u.name, u.target))
            .collect();
        assert!(lines.contains(&"Object -> class Object".to_string()), "{lines:?}");
        assert!(lines.contains(&"Integer -> class Integer".to_string()), "{lines:?}");
        assert!(lines.contains(&"x -> variable at offset 1".to_string()), "{lines:?}");
    }
}
