//! Assembly emission for the OOPS stack machine.
//!
//! Register use: R0 is the program counter, R1 holds the constant 1, R2
//! points to the top of the stack, R3 to the current frame, R4 to the next
//! free heap word; R5 to R7 are scratch.
//!
//! Every method call pushes the receiver, the arguments and the return
//! address, in that order. The callee saves the caller's frame pointer and
//! makes the stack top its frame; locals sit above it, parameters and SELF
//! below the return address. All methods share one epilogue per method
//! (label `end_<Class>_<method>`): it drops the frame and the parameters
//! and, for value-returning methods, leaves the result in the slot SELF
//! occupied.
//!
//! Null receivers are not checked here; dereferencing one makes the VM
//! trap at run time.

use std::{
    fmt::Display,
    format_args as f,
    io::{self, Write},
};

use log::debug;

use crate::{
    ast::{BinOp, CallKind, Expr, ExprKind, Identifier, MethodDecl, Program, Resolution, Stmt,
        UnOp},
    token::Position,
    types::{self, ClassId, ClassTable, MethodRef},
};

/// Emits the assembly for a fully analyzed (and possibly optimized)
/// program.
pub fn emit<W: Write>(
    program: &Program,
    table: &ClassTable,
    stack_size: i32,
    heap_size: i32,
    out: W,
) -> io::Result<()> {
    let mut emitter = Emitter {
        table,
        code: CodeWriter::new(out),
    };
    emitter.program(program, stack_size, heap_size)
}

/// The character and integer I/O subroutines of the runtime. Callers push
/// the argument (if any), then the return address; results replace the
/// return address slot.
static RUNTIME: &str = "\
; runtime: character and integer I/O
_writeChar:
MRM R5, (R2) ; the return address
SUB R2, R1
MRM R6, (R2) ; the character
SUB R2, R1
SYS 1, 6
MRR R0, R5
_readChar:
MRM R5, (R2) ; the return address
SYS 0, 6
MMR (R2), R6 ; the slot now holds the character read
MRR R0, R5
_writeInt:
MRM R5, (R2) ; the return address
SUB R2, R1
MRM R6, (R2) ; the number
MMR (R2), R5 ; park the return address below the digits
ISN R7, R6
ISZ R7, R7
JPC R7, _writeIntAbs
MRI R7, 45
SYS 1, 7 ; minus sign
MRI R7, 0
SUB R7, R6
MRR R6, R7
_writeIntAbs:
MRI R5, 10
ADD R2, R1
MMR (R2), R5 ; sentinel, ten is no digit
_writeIntNext:
MRR R7, R6
MOD R7, R5 ; the lowest digit
ADD R2, R1
MMR (R2), R7
DIV R6, R5
ISZ R7, R6
ISZ R7, R7
JPC R7, _writeIntNext ; more digits to come
_writeIntEmit:
MRM R7, (R2)
SUB R2, R1
MRR R6, R7
SUB R6, R5
ISZ R6, R6
JPC R6, _writeIntDone ; the sentinel marks the end
MRI R6, 48
ADD R7, R6
SYS 1, 7
MRI R0, _writeIntEmit
_writeIntDone:
MRM R5, (R2) ; the parked return address
SUB R2, R1
MRR R0, R5
_readInt:
MRI R6, 0
_readIntNext:
SYS 0, 7
MRI R5, 48
SUB R7, R5
ISN R5, R7
JPC R5, _readIntDone ; below the digits
MRI R5, 9
SUB R5, R7
ISN R5, R5
JPC R5, _readIntDone ; above the digits
MRI R5, 10
MUL R6, R5
ADD R6, R7
MRI R0, _readIntNext
_readIntDone:
MRM R5, (R2) ; the return address
MMR (R2), R6 ; the slot now holds the number read
MRR R0, R5
";

struct Emitter<'a, W> {
    table: &'a ClassTable,
    code: CodeWriter<W>,
}

impl<W: Write> Emitter<'_, W> {
    fn program(&mut self, program: &Program, stack_size: i32, heap_size: i32) -> io::Result<()> {
        self.prelude()?;
        self.code.text(RUNTIME)?;
        self.vmts()?;
        for class in &program.classes {
            let id = self
                .table
                .lookup(&class.name.name)
                .expect("every declared class is in the table");
            for (index, method) in class.methods.iter().enumerate() {
                self.method(id, index, method)?;
            }
        }
        self.trailer(stack_size, heap_size)
    }

    /// Register setup, creation of the Main object and the call of its
    /// main method. Execution halts by jumping to `_end` afterwards.
    fn prelude(&mut self) -> io::Result<()> {
        let main_class = self
            .table
            .lookup("Main")
            .expect("analysis guarantees a Main class");
        let (class, method) = self
            .table
            .find_method(main_class, "main")
            .expect("analysis guarantees Main.main");
        let main_label = self.table.method_label(MethodRef { class, method });
        debug!("emitting prelude, entry point {main_label}");

        self.code.line("; register setup")?;
        self.code.line("MRI R1, 1 ; R1 is always 1")?;
        self.code
            .line("MRI R2, _stack ; R2 points to the top of the stack")?;
        self.code.line("MRI R3, _stack ; R3 is the frame pointer")?;
        self.code
            .line("MRI R4, _heap ; R4 points to the next free heap word")?;
        self.code
            .line("; create the Main object and call its main method")?;
        let vmt = self.table.vmt_label(main_class);
        self.code.line(f!("MRI R5, {vmt}"))?;
        self.code.line("MMR (R4), R5 ; install the vtable pointer")?;
        self.code.line("ADD R2, R1")?;
        self.code.line("MMR (R2), R4 ; push the new object as SELF")?;
        self.code
            .line(f!("MRI R5, {}", self.table.get(main_class).size))?;
        self.code.line("ADD R4, R5")?;
        self.code.line("MRI R5, _return")?;
        self.code.line("ADD R2, R1")?;
        self.code.line("MMR (R2), R5 ; push the return address")?;
        self.code.line(f!("MRI R0, {main_label} ; enter the program"))?;
        self.code.line("_return:")?;
        self.code.line("MRI R0, _end ; halt")?;
        Ok(())
    }

    fn vmts(&mut self) -> io::Result<()> {
        self.code.line("; virtual method tables")?;
        for id in self.table.ids() {
            if self.table.get(id).internal {
                continue;
            }
            let label = self.table.vmt_label(id);
            self.code.line(f!("{label}:"))?;
            for slot in 0..self.table.get(id).vmt.len() {
                let entry = self.table.method_label(self.table.get(id).vmt[slot]);
                self.code.line(f!("DAT 1, {entry}"))?;
            }
        }
        Ok(())
    }

    fn method(&mut self, class_id: ClassId, method_index: usize, method: &MethodDecl) -> io::Result<()> {
        let info = &self.table.get(class_id).methods[method_index];
        let is_void = info.return_type == types::VOID;
        let namespace = format!("{}_{}", self.table.name(class_id), method.name.name);
        debug!("emitting {namespace}");

        self.code.mark(method.name.position)?;
        self.code.set_namespace(namespace.clone());
        self.code.line(f!("; METHOD {}", method.name.name))?;
        self.code.line(f!("{namespace}:"))?;
        self.code.line("ADD R2, R1")?;
        self.code.line("MMR (R2), R3 ; save the old frame pointer")?;
        self.code
            .line("MRR R3, R2 ; the stack top becomes the new frame")?;
        let locals = method.locals.len();
        if locals > 0 {
            self.code.line(f!("MRI R5, {locals}"))?;
            self.code.line("ADD R2, R5 ; reserve space for the locals")?;
        }

        for statement in &method.statements {
            self.statement(statement, method)?;
        }

        self.code.mark(method.end_position)?;
        self.code.line(f!("; END METHOD {}", method.name.name))?;
        let end = self.code.end_label();
        self.code.line(f!("{end}:"))?;
        // Drop the locals, the saved frame and return address, the
        // parameters and, for void methods, the SELF slot; otherwise SELF's
        // slot stays behind holding the result.
        let pop = locals + method.params.len() + if is_void { 3 } else { 2 };
        self.code.line(f!("MRI R5, {pop}"))?;
        self.code.line("SUB R2, R5 ; drop the frame")?;
        self.code.line("SUB R3, R1")?;
        self.code.line("MRM R5, (R3) ; fetch the return address")?;
        self.code.line("ADD R3, R1")?;
        self.code
            .line("MRM R3, (R3) ; restore the caller's frame pointer")?;
        self.code.line("MRR R0, R5 ; return")?;
        Ok(())
    }

    fn statement(&mut self, statement: &Stmt, method: &MethodDecl) -> io::Result<()> {
        match statement {
            Stmt::Assignment { target, value } => {
                self.code.mark(target.position)?;
                self.code.line("; assignment")?;
                self.expression(target)?;
                self.expression(value)?;
                self.code.line("MRM R5, (R2) ; the value")?;
                self.code.line("SUB R2, R1")?;
                self.code.line("MRM R6, (R2) ; the target address")?;
                self.code.line("SUB R2, R1")?;
                self.code.line("MMR (R6), R5")?;
            }
            Stmt::Call { call } => {
                self.code.mark(call.position)?;
                self.code.line("; call statement")?;
                self.expression(call)?;
                if call.resolved_ty() != types::VOID {
                    self.code.line("SUB R2, R1 ; discard the result")?;
                }
            }
            Stmt::Read { target } => {
                self.code.mark(target.position)?;
                self.code.line("; READ")?;
                self.expression(target)?;
                let vmt = self.table.vmt_label(types::INTEGER);
                self.code.line(f!("MRI R5, {vmt}"))?;
                self.code
                    .line("MMR (R4), R5 ; a fresh Integer for the value read")?;
                let label = self.code.next_label();
                self.code.line(f!("MRI R5, {label}"))?;
                self.code.line("ADD R2, R1")?;
                self.code.line("MMR (R2), R5 ; push the return address")?;
                self.code.line("MRI R0, _readChar")?;
                self.code.line(f!("{label}:"))?;
                self.code.line("MRM R6, (R2) ; the character read")?;
                self.code.line("SUB R2, R1")?;
                self.code.line("MRR R5, R4")?;
                self.code.line("ADD R5, R1")?;
                self.code.line("MMR (R5), R6 ; store it at offset one")?;
                self.code.line("MRM R5, (R2) ; the target address")?;
                self.code.line("SUB R2, R1")?;
                self.code.line("MMR (R5), R4 ; assign the new object")?;
                self.code.line("MRI R5, 2")?;
                self.code.line("ADD R4, R5 ; advance the heap pointer")?;
            }
            Stmt::Write { value } => {
                self.code.mark(value.position)?;
                self.code.line("; WRITE")?;
                self.expression(value)?;
                let label = self.code.next_label();
                self.code.line(f!("MRI R5, {label}"))?;
                self.code.line("ADD R2, R1")?;
                self.code.line("MMR (R2), R5 ; push the return address")?;
                self.code.line("MRI R0, _writeChar")?;
                self.code.line(f!("{label}:"))?;
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.code.mark(condition.position)?;
                self.code.line("; IF")?;
                self.expression(condition)?;
                let else_label = self.code.next_label();
                let end_label = self.code.next_label();
                self.code.line("MRM R5, (R2)")?;
                self.code.line("SUB R2, R1")?;
                self.code.line("ISZ R5, R5")?;
                self.code
                    .line(f!("JPC R5, {else_label} ; branch when the condition is false"))?;
                for statement in then_branch {
                    self.statement(statement, method)?;
                }
                self.code.line(f!("MRI R0, {end_label}"))?;
                self.code.line(f!("{else_label}:"))?;
                for statement in else_branch {
                    self.statement(statement, method)?;
                }
                self.code.line(f!("{end_label}:"))?;
            }
            Stmt::While { condition, body } => {
                self.code.mark(condition.position)?;
                self.code.line("; WHILE")?;
                let start_label = self.code.next_label();
                let end_label = self.code.next_label();
                self.code.line(f!("{start_label}:"))?;
                self.expression(condition)?;
                self.code.line("MRM R5, (R2)")?;
                self.code.line("SUB R2, R1")?;
                self.code.line("ISZ R5, R5")?;
                self.code
                    .line(f!("JPC R5, {end_label} ; leave the loop when the condition is false"))?;
                for statement in body {
                    self.statement(statement, method)?;
                }
                self.code.line(f!("MRI R0, {start_label}"))?;
                self.code.line(f!("{end_label}:"))?;
            }
            Stmt::Return { value, position } => {
                self.code.mark(*position)?;
                self.code.line("; RETURN")?;
                if let Some(value) = value {
                    self.expression(value)?;
                    let offset = -(method.params.len() as i32 + 2);
                    self.code.line("MRM R5, (R2) ; the return value")?;
                    self.code.line("SUB R2, R1")?;
                    self.code.line(f!("MRI R6, {offset}"))?;
                    self.code.line("ADD R6, R3")?;
                    self.code
                        .line("MMR (R6), R5 ; store it in the result slot")?;
                }
                let end = self.code.end_label();
                self.code.line(f!("MRI R0, {end}"))?;
            }
        }
        Ok(())
    }

    /// Every expression pushes exactly one word: an address for l-values, a
    /// value otherwise.
    fn expression(&mut self, e: &Expr) -> io::Result<()> {
        match &e.kind {
            ExprKind::Literal { value } => {
                self.code.line(f!("MRI R5, {value}"))?;
                self.code.line("ADD R2, R1")?;
                self.code.line("MMR (R2), R5")?;
            }
            ExprKind::VarOrCall {
                name,
                args,
                resolution,
            } => self.var_or_call(name, args, *resolution)?,
            ExprKind::Access { receiver, member } => {
                self.expression(receiver)?;
                self.expression(member)?;
            }
            ExprKind::New {
                type_name,
                resolved,
            } => {
                let id = resolved.expect("NEW type has not been resolved");
                self.code.line(f!("; NEW {}", type_name.name))?;
                let vmt = self.table.vmt_label(id);
                self.code.line(f!("MRI R5, {vmt}"))?;
                self.code.line("MMR (R4), R5 ; install the vtable pointer")?;
                self.code.line("ADD R2, R1")?;
                self.code.line("MMR (R2), R4 ; push the new object")?;
                self.code.line(f!("MRI R5, {}", self.table.get(id).size))?;
                self.code.line("ADD R4, R5 ; advance the heap pointer")?;
            }
            ExprKind::Unary { op, operand } => {
                self.expression(operand)?;
                match op {
                    UnOp::Minus => {
                        self.code.line("MRM R5, (R2)")?;
                        self.code.line("MRI R6, 0")?;
                        self.code.line("SUB R6, R5")?;
                        self.code.line("MMR (R2), R6")?;
                    }
                    UnOp::Not => {
                        self.code.line("MRM R5, (R2)")?;
                        self.code.line("XOR R5, R1")?;
                        self.code.line("MMR (R2), R5")?;
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs)?,
            ExprKind::Box { operand } => {
                self.expression(operand)?;
                self.code.line("; box")?;
                let vmt = self.table.vmt_label(e.resolved_ty());
                self.code.line(f!("MRI R5, {vmt}"))?;
                self.code.line("MMR (R4), R5")?;
                self.code.line("MRM R5, (R2) ; the primitive value")?;
                self.code.line("MRR R6, R4")?;
                self.code.line("ADD R6, R1")?;
                self.code.line("MMR (R6), R5 ; store the payload at offset one")?;
                self.code
                    .line("MMR (R2), R4 ; replace it with the new object")?;
                self.code.line("MRI R5, 2")?;
                self.code.line("ADD R4, R5")?;
            }
            ExprKind::Unbox { operand } => {
                self.expression(operand)?;
                self.code.line("; unbox")?;
                self.code.line("MRM R5, (R2)")?;
                self.code.line("ADD R5, R1")?;
                self.code.line("MRM R5, (R5) ; read the payload")?;
                self.code.line("MMR (R2), R5")?;
            }
            ExprKind::DeRef { operand } => {
                self.expression(operand)?;
                self.code.line("MRM R5, (R2)")?;
                self.code.line("MRM R5, (R5)")?;
                self.code.line("MMR (R2), R5")?;
            }
        }
        Ok(())
    }

    fn var_or_call(
        &mut self,
        name: &Identifier,
        args: &[Expr],
        resolution: Option<Resolution>,
    ) -> io::Result<()> {
        match resolution.expect("name has not been resolved") {
            Resolution::Var {
                offset,
                is_attribute: false,
                ..
            } => {
                self.code.line(f!("; reference to variable {}", name.name))?;
                self.code.line(f!("MRI R5, {offset}"))?;
                self.code.line("ADD R5, R3")?;
                self.code.line("ADD R2, R1")?;
                self.code.line("MMR (R2), R5")?;
            }
            Resolution::Var {
                offset,
                is_attribute: true,
                ..
            } => {
                // The receiver reference lies on top of the stack.
                self.code
                    .line(f!("; reference to attribute {}", name.name))?;
                self.code.line("MRM R5, (R2)")?;
                self.code.line(f!("MRI R6, {offset}"))?;
                self.code.line("ADD R5, R6")?;
                self.code.line("MMR (R2), R5")?;
            }
            Resolution::Method { class, index, call } => {
                for arg in args {
                    self.expression(arg)?;
                }
                let label = self.code.next_label();
                self.code.line(f!("MRI R5, {label}"))?;
                self.code.line("ADD R2, R1")?;
                self.code.line("MMR (R2), R5 ; push the return address")?;
                match call {
                    CallKind::Static => {
                        let target = self.table.method_label(MethodRef {
                            class,
                            method: index,
                        });
                        self.code.line(f!("; static call of {}", name.name))?;
                        self.code.line(f!("MRI R0, {target}"))?;
                    }
                    CallKind::Virtual { vmt_index } => {
                        self.code.line(f!("; dynamic dispatch of {}", name.name))?;
                        self.code.line("MRR R5, R2")?;
                        self.code.line(f!("MRI R6, {}", args.len() + 1))?;
                        self.code.line("SUB R5, R6")?;
                        self.code.line("MRM R5, (R5) ; the receiver")?;
                        self.code.line("MRM R5, (R5) ; its vtable")?;
                        self.code.line(f!("MRI R6, {vmt_index}"))?;
                        self.code.line("ADD R5, R6")?;
                        self.code.line("MRM R5, (R5) ; the method's entry point")?;
                        self.code.line("MRR R0, R5")?;
                    }
                }
                self.code.line(f!("{label}:"))?;
            }
        }
        Ok(())
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> io::Result<()> {
        match op {
            BinOp::AndThen => {
                self.code.line("; AND THEN")?;
                self.expression(lhs)?;
                let end = self.code.next_label();
                self.code.line("MRM R5, (R2)")?;
                self.code.line("ISZ R5, R5")?;
                self.code
                    .line(f!("JPC R5, {end} ; skip the right operand when the left is FALSE"))?;
                self.code.line("SUB R2, R1")?;
                self.expression(rhs)?;
                self.code.line(f!("{end}:"))?;
            }
            BinOp::OrElse => {
                self.code.line("; OR ELSE")?;
                self.expression(lhs)?;
                let end = self.code.next_label();
                self.code.line("MRM R5, (R2)")?;
                self.code
                    .line(f!("JPC R5, {end} ; skip the right operand when the left is TRUE"))?;
                self.code.line("SUB R2, R1")?;
                self.expression(rhs)?;
                self.code.line(f!("{end}:"))?;
            }
            _ => {
                self.expression(lhs)?;
                self.expression(rhs)?;
                self.code.line("MRM R6, (R2) ; the right operand")?;
                self.code.line("SUB R2, R1")?;
                self.code.line("MRM R5, (R2) ; the left operand")?;
                self.strict_operator(op)?;
                self.code.line("MMR (R2), R5")?;
            }
        }
        Ok(())
    }

    /// Combines R5 and R6 into R5 for the strict operators.
    fn strict_operator(&mut self, op: BinOp) -> io::Result<()> {
        let c = &mut self.code;
        match op {
            BinOp::Add => c.line("ADD R5, R6"),
            BinOp::Sub => c.line("SUB R5, R6"),
            BinOp::Mul => c.line("MUL R5, R6"),
            BinOp::Div => c.line("DIV R5, R6"),
            BinOp::Mod => c.line("MOD R5, R6"),
            BinOp::And => c.line("AND R5, R6"),
            BinOp::Or => c.line("OR R5, R6"),
            BinOp::Eq => {
                c.line("SUB R5, R6")?;
                c.line("ISZ R5, R5")
            }
            BinOp::Neq => {
                c.line("SUB R5, R6")?;
                c.line("ISZ R5, R5")?;
                c.line("XOR R5, R1")
            }
            BinOp::Lt => {
                c.line("SUB R5, R6")?;
                c.line("ISN R5, R5")
            }
            BinOp::Gt => {
                c.line("SUB R5, R6")?;
                c.line("ISP R5, R5")
            }
            BinOp::LtEq => {
                c.line("SUB R5, R6")?;
                c.line("ISP R5, R5")?;
                c.line("ISZ R5, R5")
            }
            BinOp::GtEq => {
                c.line("SUB R5, R6")?;
                c.line("ISN R5, R5")?;
                c.line("ISZ R5, R5")
            }
            BinOp::AndThen | BinOp::OrElse => unreachable!("handled by the caller"),
        }
    }

    fn trailer(&mut self, stack_size: i32, heap_size: i32) -> io::Result<()> {
        self.code.line("; reserved storage")?;
        self.code.line("_stack: ; the stack grows from here")?;
        self.code.line(f!("DAT {stack_size}, 0"))?;
        self.code.line("_heap: ; the heap grows from here")?;
        self.code.line(f!("DAT {heap_size}, 0"))?;
        self.code.line("_end: ; end of the program")?;
        Ok(())
    }
}

/// The output stream, plus the per-method namespace that makes generated
/// labels unique.
struct CodeWriter<W> {
    out: W,
    namespace: String,
    counter: u32,
}

impl<W: Write> CodeWriter<W> {
    fn new(out: W) -> CodeWriter<W> {
        CodeWriter {
            out,
            namespace: String::new(),
            counter: 1,
        }
    }

    fn line(&mut self, line: impl Display) -> io::Result<()> {
        writeln!(self.out, "{line}")
    }

    fn text(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())
    }

    /// Emits a `#L` source line marker.
    fn mark(&mut self, position: Position) -> io::Result<()> {
        writeln!(self.out, "#{}", position.line)
    }

    /// Opens a fresh label namespace. The same namespace must not be
    /// opened twice during one emission.
    fn set_namespace(&mut self, namespace: String) {
        self.namespace = namespace;
        self.counter = 1;
    }

    fn next_label(&mut self) -> String {
        let label = format!("{}_{}", self.namespace, self.counter);
        self.counter += 1;
        label
    }

    fn end_label(&self) -> String {
        format!("end_{}", self.namespace)
    }
}
