use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use oops::{lexer::Lexer, token::SymbolKind};

static INPUT: &str = include_str!("../demos/list.oops");

fn lex_all(input: &str) -> usize {
    let mut lexer = Lexer::new(input, false);
    let mut count = 0;
    loop {
        let symbol = lexer.next_symbol().expect("the demo source is lexable");
        if symbol.kind == SymbolKind::Eof {
            break;
        }
        count += 1;
    }
    count
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("lexer", |b| b.iter(|| black_box(lex_all(black_box(INPUT)))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
