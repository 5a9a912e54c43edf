use std::{
    env, fs,
    io::{self, Write},
    process,
};

use oops::{analysis, emitter, error::CompileError, optimizer, parser, util::tree};

static USAGE: &str = "\
usage: oopsc [-c] [-h] [-hs <n>] [-i] [-l] [-o] [-s] [-ss <n>] <source> [<out.asm>]

    -c       show the result of the semantic analysis
    -h       show this help
    -hs <n>  reserve <n> words for the heap (default is 100)
    -i       show the identifier resolution map
    -l       show the result of the lexical analysis
    -o       optimize the syntax tree before generating code
    -s       show the result of the syntactic analysis
    -ss <n>  reserve <n> words for the stack (default is 100)";

struct Flags {
    show_context: bool,
    show_idents: bool,
    show_symbols: bool,
    show_syntax: bool,
    optimize: bool,
    heap_size: i32,
    stack_size: i32,
    out_file: Option<String>,
}

fn main() {
    simple_logger::SimpleLogger::new().env().init().unwrap();

    let mut flags = Flags {
        show_context: false,
        show_idents: false,
        show_symbols: false,
        show_syntax: false,
        optimize: false,
        heap_size: 100,
        stack_size: 100,
        out_file: None,
    };
    let mut in_file: Option<String> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" => flags.show_context = true,
            "-h" => usage(),
            "-hs" => flags.heap_size = size_argument(&arg, args.next()),
            "-i" => flags.show_idents = true,
            "-l" => flags.show_symbols = true,
            "-o" => flags.optimize = true,
            "-s" => flags.show_syntax = true,
            "-ss" => flags.stack_size = size_argument(&arg, args.next()),
            _ if arg.starts_with('-') => {
                println!("unknown option {arg}");
                usage();
            }
            _ if flags.out_file.is_some() => {
                println!("only two file names are allowed");
                usage();
            }
            _ if in_file.is_some() => flags.out_file = Some(arg),
            _ => in_file = Some(arg),
        }
    }
    let Some(in_file) = in_file else {
        println!("no source file given");
        usage();
    };

    let Ok(source) = fs::read_to_string(&in_file) else {
        println!("Error: {in_file} cannot be found or created");
        process::exit(2);
    };

    if let Err(error) = run(&source, &flags) {
        println!("{error}");
        process::exit(1);
    }
}

fn run(source: &str, flags: &Flags) -> Result<(), CompileError> {
    let mut program = parser::parse(source, flags.show_symbols)?;
    if flags.show_syntax {
        tree::print_program(&mut io::stdout(), &program, None).unwrap();
    }

    let analysis = analysis::analyze(&mut program)?;
    if flags.show_idents {
        analysis.print_ident_map(&mut io::stdout()).unwrap();
    }
    if flags.show_context {
        tree::print_program(&mut io::stdout(), &program, Some(&analysis.table)).unwrap();
    }

    if flags.optimize {
        optimizer::optimize(&mut program);
    }

    let emitted = match &flags.out_file {
        Some(path) => match fs::File::create(path) {
            Ok(file) => {
                let mut writer = io::BufWriter::new(file);
                emitter::emit(
                    &program,
                    &analysis.table,
                    flags.stack_size,
                    flags.heap_size,
                    &mut writer,
                )
                .and_then(|()| writer.flush())
            }
            Err(_) => {
                println!("Error: {path} cannot be found or created");
                process::exit(2);
            }
        },
        None => emitter::emit(
            &program,
            &analysis.table,
            flags.stack_size,
            flags.heap_size,
            io::stdout().lock(),
        ),
    };
    if emitted.is_err() {
        let target = flags.out_file.as_deref().unwrap_or("the output");
        println!("Error: {target} cannot be found or created");
        process::exit(2);
    }
    Ok(())
}

fn size_argument(option: &str, value: Option<String>) -> i32 {
    let Some(value) = value else {
        println!("missing argument for {option}");
        usage();
    };
    match value.parse() {
        Ok(size) => size,
        Err(_) => {
            println!("invalid argument for {option}");
            usage();
        }
    }
}

fn usage() -> ! {
    println!("{USAGE}");
    process::exit(2);
}
