use std::{collections::VecDeque, str::Chars};

use smol_str::SmolStr;

use crate::{
    error::{CompileError, Result},
    token::{Position, Symbol, SymbolKind, KEYWORDS},
};

/// The OOPS lexer.
///
/// Scans UTF-8 characters with one character of lookahead. The two-word
/// keywords `AND THEN` and `OR ELSE` need more: after an `AND` or `OR`
/// identifier the lexer probes up to five further characters and pushes them
/// back if the second word does not follow.
///
/// Comments (`{ ... }` and `| ...` until end of line) and whitespace are
/// skipped; an unterminated bracketed comment is a lexical error.
pub struct Lexer<'src> {
    chars: Chars<'src>,
    /// Characters not yet consumed, with the positions they were read at.
    /// Normally holds at most the lookahead character; the keyword probe
    /// pushes up to five characters back onto the front.
    buffer: VecDeque<(char, Position)>,
    /// Position of the next character fetched from `chars`.
    next_position: Position,
    /// Print each symbol as it is scanned (the `-l` flag).
    print_symbols: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, print_symbols: bool) -> Lexer<'src> {
        Lexer {
            chars: source.chars(),
            buffer: VecDeque::with_capacity(8),
            next_position: Position::start(),
            print_symbols,
        }
    }

    /// Scans the next symbol.
    ///
    /// After the end of input has been reached, every call produces another
    /// [`SymbolKind::Eof`] symbol.
    pub fn next_symbol(&mut self) -> Result<Symbol> {
        self.skip_trivia()?;

        let end = self.position();
        let Some((c, position)) = self.advance() else {
            return Ok(self.produce(Symbol::new(SymbolKind::Eof, end)));
        };

        use SymbolKind::*;
        let kind = match c {
            ':' => match self.peek() {
                Some(('=', _)) => self.advance_with(Becomes),
                _ => Colon,
            },
            ';' => Semicolon,
            ',' => Comma,
            '.' => Period,
            '(' => LParen,
            ')' => RParen,
            '=' => Eq,
            '#' => Neq,
            '<' => match self.peek() {
                Some(('=', _)) => self.advance_with(LtEq),
                _ => Lt,
            },
            '>' => match self.peek() {
                Some(('=', _)) => self.advance_with(GtEq),
                _ => Gt,
            },
            '+' => Plus,
            '-' => Minus,
            '*' => Times,
            '/' => Div,
            '\'' => self.character_literal(position)?,
            c if c.is_ascii_digit() => self.number(c, position)?,
            c if c.is_alphabetic() => self.identifier_or_keyword(c),
            c => {
                return Err(CompileError::lexical(
                    format!("unexpected character '{c}' (code {})", c as u32),
                    position,
                ));
            }
        };
        Ok(self.produce(Symbol::new(kind, position)))
    }

    /// Skips whitespace and both comment forms.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            while matches!(self.peek(), Some((c, _)) if c.is_whitespace()) {
                self.advance();
            }
            match self.peek() {
                Some(('{', _)) => {
                    self.advance();
                    loop {
                        match self.advance() {
                            Some(('}', _)) => break,
                            Some(_) => {}
                            None => {
                                return Err(CompileError::lexical(
                                    "unexpected end of file inside a comment",
                                    self.position(),
                                ));
                            }
                        }
                    }
                }
                Some(('|', _)) => {
                    self.advance();
                    while let Some((c, _)) = self.advance() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn character_literal(&mut self, start: Position) -> Result<SymbolKind> {
        let value = match self.advance() {
            Some(('\\', _)) => match self.advance() {
                Some(('n', _)) => '\n' as i32,
                Some(('t', _)) => '\t' as i32,
                Some(('\\', _)) => '\\' as i32,
                Some((c, position)) => {
                    return Err(CompileError::lexical(
                        format!("illegal escape in character literal: '\\{c}'"),
                        position,
                    ));
                }
                None => {
                    return Err(CompileError::lexical(
                        "character literal is not terminated",
                        start,
                    ));
                }
            },
            Some((c, position)) if (c as u32) < 0x20 => {
                return Err(CompileError::lexical(
                    format!("control character in character literal (code {})", c as u32),
                    position,
                ));
            }
            Some((c, _)) => c as i32,
            None => {
                return Err(CompileError::lexical(
                    "character literal is not terminated",
                    start,
                ));
            }
        };
        match self.advance() {
            Some(('\'', _)) => Ok(SymbolKind::Character(value)),
            _ => Err(CompileError::lexical(
                "character literal is not terminated",
                start,
            )),
        }
    }

    fn number(&mut self, first: char, start: Position) -> Result<SymbolKind> {
        let mut value = i64::from(first as u32 - '0' as u32);
        let mut overflow = false;
        while let Some((c, _)) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            self.advance();
            if !overflow {
                value = value * 10 + i64::from(c as u32 - '0' as u32);
                overflow = value > i64::from(i32::MAX);
            }
        }
        if overflow {
            return Err(CompileError::lexical("integer literal out of range", start));
        }
        Ok(SymbolKind::Number(value as i32))
    }

    fn identifier_or_keyword(&mut self, first: char) -> SymbolKind {
        let mut name = String::new();
        name.push(first);
        while let Some((c, _)) = self.peek() {
            if c.is_alphanumeric() {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if name == "AND" || name == "OR" {
            if let Some(fused) = self.fuse_second_word(&name) {
                return fused;
            }
        }
        match KEYWORDS.get(name.as_str()) {
            Some(keyword) => keyword.clone(),
            None => SymbolKind::Ident(SmolStr::new(name)),
        }
    }

    /// Probes for `THEN` / `ELSE` after an `AND` / `OR` identifier.
    ///
    /// The second word must be followed by whitespace (end of input counts).
    /// On a failed probe the peeked characters are pushed back; the
    /// whitespace skipped before them is not, which is harmless between
    /// symbols.
    fn fuse_second_word(&mut self, first: &str) -> Option<SymbolKind> {
        let second = if first == "AND" { "THEN" } else { "ELSE" };
        while matches!(self.peek(), Some((c, _)) if c.is_whitespace()) {
            self.advance();
        }
        let mut probe = Vec::with_capacity(5);
        while probe.len() < 5 {
            match self.advance() {
                Some(entry) => probe.push(entry),
                None => break,
            }
        }
        let fused = probe.len() >= 4
            && probe[..4].iter().map(|&(c, _)| c).eq(second.chars())
            && probe.get(4).map_or(true, |&(c, _)| c.is_whitespace());
        if fused {
            let spelling = if first == "AND" { "AND THEN" } else { "OR ELSE" };
            KEYWORDS.get(spelling).cloned()
        } else {
            for entry in probe.into_iter().rev() {
                self.buffer.push_front(entry);
            }
            None
        }
    }
}

impl Lexer<'_> {
    /// Returns the next character without consuming it.
    fn peek(&mut self) -> Option<(char, Position)> {
        self.fill();
        self.buffer.front().copied()
    }

    /// Consumes and returns the next character.
    fn advance(&mut self) -> Option<(char, Position)> {
        self.fill();
        self.buffer.pop_front()
    }

    /// Consumes one character and returns the provided value.
    fn advance_with(&mut self, kind: SymbolKind) -> SymbolKind {
        self.advance();
        kind
    }

    fn fill(&mut self) {
        if self.buffer.is_empty() {
            if let Some(c) = self.chars.next() {
                let position = self.next_position;
                self.next_position = position.advanced_over(c);
                self.buffer.push_back((c, position));
            }
        }
    }

    /// The position of the next character, or of the end of input.
    fn position(&mut self) -> Position {
        match self.peek() {
            Some((_, position)) => position,
            None => self.next_position,
        }
    }

    fn produce(&self, symbol: Symbol) -> Symbol {
        if self.print_symbols {
            println!("{symbol}");
        }
        symbol
    }
}
