//! A whole-program compiler for the OOPS teaching language, targeting the
//! accompanying stack-machine VM. One source file in, one assembly file
//! out; the passes run in a fixed order and the first error aborts.

/// The lexer maps the source input into a sequence of symbols.
pub mod lexer;

/// The parser maps the symbol stream into an abstract syntax tree.
pub mod parser;

/// Semantic analysis: declaration resolution, type checking, object layout
/// and dispatch selection.
pub mod analysis;

/// The optional constant-folding pass.
pub mod optimizer;

/// Assembly emission.
pub mod emitter;

pub mod ast;
pub mod error;
pub mod token;
pub mod types;

pub mod util {
    pub mod tree;
}

use error::Result;

/// Compiler configuration: the optimizer switch plus the stack and heap
/// reservations (in words) of the emitted program.
pub struct Options {
    pub optimize: bool,
    pub stack_size: i32,
    pub heap_size: i32,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            optimize: false,
            stack_size: 100,
            heap_size: 100,
        }
    }
}

/// Runs the whole pipeline over one source text, producing the assembly.
pub fn compile(source: &str, options: &Options) -> Result<String> {
    let mut program = parser::parse(source, false)?;
    let analysis = analysis::analyze(&mut program)?;
    if options.optimize {
        optimizer::optimize(&mut program);
    }
    let mut buf = Vec::with_capacity(16 * 1024);
    emitter::emit(
        &program,
        &analysis.table,
        options.stack_size,
        options.heap_size,
        &mut buf,
    )
    .expect("writing to a Vec cannot fail");
    Ok(String::from_utf8(buf).expect("the emitter produces UTF-8"))
}
