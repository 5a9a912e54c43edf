use crate::{
    ast::{AccessRight, BinOp, ClassDecl, Expr, ExprKind, Identifier, MethodDecl, Program, Stmt,
        UnOp, VarDecl},
    error::{CompileError, Result},
    lexer::Lexer,
    token::{Position, Symbol, SymbolKind},
    types,
};

/// Parses a whole source file into a [`Program`].
///
/// With `print_symbols` set, every scanned symbol is printed to stdout
/// (the `-l` flag).
pub fn parse(source: &str, print_symbols: bool) -> Result<Program> {
    Parser::new(source, print_symbols)?.parse_program()
}

/// The recursive-descent parser over the grammar:
///
/// ```text
/// program      ::= { classdecl }
/// classdecl    ::= CLASS identifier [ EXTENDS identifier ] IS
///                  { memberdecl } END CLASS
/// memberdecl   ::= [PRIVATE|PROTECTED|PUBLIC] ( vardecl ';'
///                | METHOD identifier [ '(' vardecl { ';' vardecl } ')' ]
///                  [ ':' identifier ] IS methodbody )
/// vardecl      ::= identifier { ',' identifier } ':' identifier
/// methodbody   ::= { vardecl ';' } BEGIN statements END METHOD
/// statement    ::= READ memberaccess ';'
///                | WRITE expression ';'
///                | IF predicate THEN statements
///                  { ELSEIF predicate THEN statements }
///                  [ ELSE statements ] END IF
///                | WHILE predicate DO statements END WHILE
///                | RETURN [ predicate ] ';'
///                | memberaccess [ ':=' predicate ] ';'
/// predicate    ::= scconjunction { OR ELSE scconjunction }
/// scconjunction ::= disjunction { AND THEN disjunction }
/// disjunction  ::= conjunction { OR conjunction }
/// conjunction  ::= relation { AND relation }
/// relation     ::= expression [ ( = | # | < | > | <= | >= ) expression ]
/// expression   ::= term { ( + | - ) term }
/// term         ::= factor { ( * | / | MOD ) factor }
/// factor       ::= - factor | NOT factor | memberaccess
/// memberaccess ::= literal { '.' varorcall }
/// literal      ::= number | character | NULL | SELF | BASE | NEW identifier
///                | '(' predicate ')' | TRUE | FALSE | varorcall
/// varorcall    ::= identifier [ '(' predicate { ',' predicate } ')' ]
/// ```
///
/// `ELSEIF` chains parse into a nested IF in the else branch of the
/// preceding IF; only the outermost IF consumes `END IF`.
pub struct Parser<'src> {
    lexer: Lexer<'src>,
    symbol: Symbol,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str, print_symbols: bool) -> Result<Parser<'src>> {
        let mut lexer = Lexer::new(source, print_symbols);
        let symbol = lexer.next_symbol()?;
        Ok(Parser { lexer, symbol })
    }

    pub fn parse_program(mut self) -> Result<Program> {
        let mut classes = Vec::new();
        while self.symbol.kind == SymbolKind::Class {
            classes.push(self.class_decl()?);
        }
        self.expect(SymbolKind::Eof)?;
        Ok(Program { classes })
    }

    fn class_decl(&mut self) -> Result<ClassDecl> {
        self.expect(SymbolKind::Class)?;
        let name = self.expect_ident()?;
        let base = if self.accept(SymbolKind::Extends)? {
            self.expect_ident()?
        } else {
            Identifier::new("Object", name.position)
        };
        self.expect(SymbolKind::Is)?;
        let mut attributes = Vec::new();
        let mut methods = Vec::new();
        while self.symbol.kind != SymbolKind::End {
            self.member_decl(&mut attributes, &mut methods)?;
        }
        self.advance()?;
        self.expect(SymbolKind::Class)?;
        Ok(ClassDecl {
            name,
            base,
            attributes,
            methods,
        })
    }

    fn member_decl(
        &mut self,
        attributes: &mut Vec<VarDecl>,
        methods: &mut Vec<MethodDecl>,
    ) -> Result<()> {
        let access = match self.symbol.kind {
            SymbolKind::Private => self.advance_with(AccessRight::Private)?,
            SymbolKind::Protected => self.advance_with(AccessRight::Protected)?,
            SymbolKind::Public => self.advance_with(AccessRight::Public)?,
            _ => AccessRight::Public,
        };
        if self.accept(SymbolKind::Method)? {
            let name = self.expect_ident()?;
            let mut params = Vec::new();
            if self.accept(SymbolKind::LParen)? {
                self.var_decl(&mut params, false, AccessRight::Public)?;
                while self.accept(SymbolKind::Semicolon)? {
                    self.var_decl(&mut params, false, AccessRight::Public)?;
                }
                self.expect(SymbolKind::RParen)?;
            }
            let return_type = if self.accept(SymbolKind::Colon)? {
                Some(self.expect_ident()?)
            } else {
                None
            };
            self.expect(SymbolKind::Is)?;
            let mut locals = Vec::new();
            let (statements, end_position) = self.method_body(&mut locals)?;
            methods.push(MethodDecl {
                name,
                params,
                return_type,
                locals,
                statements,
                end_position,
                access,
            });
        } else {
            self.var_decl(attributes, true, access)?;
            self.expect(SymbolKind::Semicolon)?;
        }
        Ok(())
    }

    /// Parses `a, b, c : Type` into one [`VarDecl`] per name.
    fn var_decl(
        &mut self,
        vars: &mut Vec<VarDecl>,
        is_attribute: bool,
        access: AccessRight,
    ) -> Result<()> {
        let mut names = vec![self.expect_ident()?];
        while self.accept(SymbolKind::Comma)? {
            names.push(self.expect_ident()?);
        }
        self.expect(SymbolKind::Colon)?;
        let type_name = self.expect_ident()?;
        for name in names {
            vars.push(VarDecl::new(name, type_name.clone(), is_attribute, access));
        }
        Ok(())
    }

    /// Returns the statements plus the position of END METHOD.
    fn method_body(&mut self, locals: &mut Vec<VarDecl>) -> Result<(Vec<Stmt>, Position)> {
        while self.symbol.kind != SymbolKind::Begin {
            self.var_decl(locals, false, AccessRight::Public)?;
            self.expect(SymbolKind::Semicolon)?;
        }
        self.advance()?;
        let statements = self.statements()?;
        let end_position = self.symbol.position;
        self.expect(SymbolKind::End)?;
        self.expect(SymbolKind::Method)?;
        Ok((statements, end_position))
    }

    fn statements(&mut self) -> Result<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !matches!(
            self.symbol.kind,
            SymbolKind::End | SymbolKind::Else | SymbolKind::Elseif
        ) {
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt> {
        match self.symbol.kind {
            SymbolKind::Read => {
                self.advance()?;
                let target = self.member_access()?;
                self.expect(SymbolKind::Semicolon)?;
                Ok(Stmt::Read { target })
            }
            SymbolKind::Write => {
                self.advance()?;
                let value = self.expression()?;
                self.expect(SymbolKind::Semicolon)?;
                Ok(Stmt::Write { value })
            }
            SymbolKind::If | SymbolKind::Elseif => self.if_statement(),
            SymbolKind::While => {
                self.advance()?;
                let condition = self.predicate()?;
                self.expect(SymbolKind::Do)?;
                let body = self.statements()?;
                self.expect(SymbolKind::End)?;
                self.expect(SymbolKind::While)?;
                self.accept(SymbolKind::Semicolon)?;
                Ok(Stmt::While { condition, body })
            }
            SymbolKind::Return => {
                let position = self.symbol.position;
                self.advance()?;
                let value = if self.symbol.kind == SymbolKind::Semicolon {
                    None
                } else {
                    Some(self.predicate()?)
                };
                self.expect(SymbolKind::Semicolon)?;
                Ok(Stmt::Return { value, position })
            }
            _ => {
                let target = self.member_access()?;
                if self.accept(SymbolKind::Becomes)? {
                    let value = self.predicate()?;
                    self.expect(SymbolKind::Semicolon)?;
                    Ok(Stmt::Assignment { target, value })
                } else {
                    self.expect(SymbolKind::Semicolon)?;
                    Ok(Stmt::Call { call: target })
                }
            }
        }
    }

    /// Parses an IF or an ELSEIF arm. Only the outermost IF consumes the
    /// closing `END IF`; ELSEIF arms nest into the else branch and reuse
    /// the outer terminator.
    fn if_statement(&mut self) -> Result<Stmt> {
        let is_outermost = self.symbol.kind == SymbolKind::If;
        self.advance()?;
        let condition = self.predicate()?;
        self.expect(SymbolKind::Then)?;
        let then_branch = self.statements()?;
        let mut else_branch = Vec::new();
        if self.symbol.kind == SymbolKind::Elseif {
            else_branch.push(self.if_statement()?);
        } else if self.accept(SymbolKind::Else)? {
            else_branch = self.statements()?;
        }
        if is_outermost {
            self.expect(SymbolKind::End)?;
            self.expect(SymbolKind::If)?;
            // A trailing semicolon is tolerated after END IF, as it is
            // after END WHILE.
            self.accept(SymbolKind::Semicolon)?;
        }
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn predicate(&mut self) -> Result<Expr> {
        let mut e = self.sc_conjunction()?;
        while self.accept(SymbolKind::OrElse)? {
            e = binary(BinOp::OrElse, e, self.sc_conjunction()?);
        }
        Ok(e)
    }

    fn sc_conjunction(&mut self) -> Result<Expr> {
        let mut e = self.disjunction()?;
        while self.accept(SymbolKind::AndThen)? {
            e = binary(BinOp::AndThen, e, self.disjunction()?);
        }
        Ok(e)
    }

    fn disjunction(&mut self) -> Result<Expr> {
        let mut e = self.conjunction()?;
        while self.accept(SymbolKind::Or)? {
            e = binary(BinOp::Or, e, self.conjunction()?);
        }
        Ok(e)
    }

    fn conjunction(&mut self) -> Result<Expr> {
        let mut e = self.relation()?;
        while self.accept(SymbolKind::And)? {
            e = binary(BinOp::And, e, self.relation()?);
        }
        Ok(e)
    }

    fn relation(&mut self) -> Result<Expr> {
        let e = self.expression()?;
        let op = match self.symbol.kind {
            SymbolKind::Eq => BinOp::Eq,
            SymbolKind::Neq => BinOp::Neq,
            SymbolKind::Lt => BinOp::Lt,
            SymbolKind::LtEq => BinOp::LtEq,
            SymbolKind::Gt => BinOp::Gt,
            SymbolKind::GtEq => BinOp::GtEq,
            _ => return Ok(e),
        };
        self.advance()?;
        Ok(binary(op, e, self.expression()?))
    }

    fn expression(&mut self) -> Result<Expr> {
        let mut e = self.term()?;
        loop {
            let op = match self.symbol.kind {
                SymbolKind::Plus => BinOp::Add,
                SymbolKind::Minus => BinOp::Sub,
                _ => return Ok(e),
            };
            self.advance()?;
            e = binary(op, e, self.term()?);
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut e = self.factor()?;
        loop {
            let op = match self.symbol.kind {
                SymbolKind::Times => BinOp::Mul,
                SymbolKind::Div => BinOp::Div,
                SymbolKind::Mod => BinOp::Mod,
                _ => return Ok(e),
            };
            self.advance()?;
            e = binary(op, e, self.factor()?);
        }
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = match self.symbol.kind {
            SymbolKind::Minus => UnOp::Minus,
            SymbolKind::Not => UnOp::Not,
            _ => return self.member_access(),
        };
        let position = self.symbol.position;
        self.advance()?;
        let operand = Box::new(self.factor()?);
        Ok(Expr::new(ExprKind::Unary { op, operand }, position))
    }

    fn member_access(&mut self) -> Result<Expr> {
        let mut e = self.literal()?;
        while self.accept(SymbolKind::Period)? {
            let position = e.position;
            let member = Box::new(self.var_or_call()?);
            e = Expr::new(
                ExprKind::Access {
                    receiver: Box::new(e),
                    member,
                },
                position,
            );
        }
        Ok(e)
    }

    fn literal(&mut self) -> Result<Expr> {
        let position = self.symbol.position;
        match self.symbol.kind.clone() {
            SymbolKind::Number(value) | SymbolKind::Character(value) => {
                self.advance()?;
                Ok(Expr::literal(value, types::INT, position))
            }
            SymbolKind::True => {
                self.advance()?;
                Ok(Expr::literal(1, types::BOOL, position))
            }
            SymbolKind::False => {
                self.advance()?;
                Ok(Expr::literal(0, types::BOOL, position))
            }
            SymbolKind::Null => {
                self.advance()?;
                Ok(Expr::literal(0, types::NULL_TYPE, position))
            }
            SymbolKind::SelfKw => {
                self.advance()?;
                Ok(Expr::var_or_call(
                    Identifier::new("_self", position),
                    Vec::new(),
                ))
            }
            SymbolKind::Base => {
                self.advance()?;
                Ok(Expr::var_or_call(
                    Identifier::new("_base", position),
                    Vec::new(),
                ))
            }
            SymbolKind::New => {
                self.advance()?;
                let type_name = self.expect_ident()?;
                Ok(Expr::new(
                    ExprKind::New {
                        type_name,
                        resolved: None,
                    },
                    position,
                ))
            }
            SymbolKind::LParen => {
                self.advance()?;
                let e = self.predicate()?;
                self.expect(SymbolKind::RParen)?;
                Ok(e)
            }
            SymbolKind::Ident(_) => self.var_or_call(),
            _ => self.unexpected(),
        }
    }

    fn var_or_call(&mut self) -> Result<Expr> {
        let name = self.expect_ident()?;
        let mut args = Vec::new();
        if self.accept(SymbolKind::LParen)? {
            args.push(self.predicate()?);
            while self.accept(SymbolKind::Comma)? {
                args.push(self.predicate()?);
            }
            self.expect(SymbolKind::RParen)?;
        }
        Ok(Expr::var_or_call(name, args))
    }
}

impl Parser<'_> {
    fn advance(&mut self) -> Result<()> {
        self.symbol = self.lexer.next_symbol()?;
        Ok(())
    }

    /// Advances and returns the provided value.
    fn advance_with<T>(&mut self, value: T) -> Result<T> {
        self.advance()?;
        Ok(value)
    }

    /// Advances if the current symbol matches. Errors if not.
    fn expect(&mut self, kind: SymbolKind) -> Result<()> {
        if self.symbol.kind == kind {
            self.advance()
        } else {
            self.unexpected()
        }
    }

    /// Advances and reports success if the current symbol matches.
    fn accept(&mut self, kind: SymbolKind) -> Result<bool> {
        if self.symbol.kind == kind {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_ident(&mut self) -> Result<Identifier> {
        if let SymbolKind::Ident(name) = &self.symbol.kind {
            let ident = Identifier::new(name.clone(), self.symbol.position);
            self.advance()?;
            Ok(ident)
        } else {
            self.unexpected()
        }
    }

    fn unexpected<T>(&self) -> Result<T> {
        Err(CompileError::syntax(
            format!("unexpected symbol {}", self.symbol.kind),
            self.symbol.position,
        ))
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let position = lhs.position;
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        position,
    )
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use crate::util::tree;

    use super::*;

    #[track_caller]
    fn parsed_tree(source: &str) -> String {
        let program = parse(source, false).expect("unexpected parse error");
        tree::program_string(&program, None)
    }

    #[track_caller]
    fn parse_error(source: &str) -> String {
        parse(source, false)
            .expect_err("expected a parse error")
            .to_string()
    }

    #[test]
    fn empty_class_gets_object_base() {
        assert_eq!(
            parsed_tree("CLASS Main IS END CLASS"),
            indoc! {"
                CLASS Main EXTENDS Object
            "}
        );
    }

    #[test]
    fn members_and_precedence() {
        let source = indoc! {"
            CLASS Main IS
              PRIVATE a, b : Integer;
              METHOD main IS
                t : Integer;
              BEGIN
                t := 1 + 2 * 3;
                WRITE t;
              END METHOD
            END CLASS
        "};
        assert_eq!(
            parsed_tree(source),
            indoc! {"
                CLASS Main EXTENDS Object
                  PRIVATE a : Integer
                  PRIVATE b : Integer
                  PUBLIC METHOD main
                    VARIABLES
                      t : Integer
                    BEGIN
                      ASSIGNMENT
                        t
                        +
                          1
                          *
                            2
                            3
                      WRITE
                        t
            "}
        );
    }

    #[test]
    fn short_circuit_binds_looser_than_strict_operators() {
        let source = indoc! {"
            CLASS Main IS
              METHOD main IS
              BEGIN
                IF TRUE AND FALSE AND THEN FALSE OR TRUE OR ELSE TRUE THEN
                  WRITE 1;
                END IF;
              END METHOD
            END CLASS
        "};
        // OR ELSE at the root, AND THEN below it, OR and AND innermost.
        assert_eq!(
            parsed_tree(source),
            indoc! {"
                CLASS Main EXTENDS Object
                  PUBLIC METHOD main
                    BEGIN
                      IF
                        OR ELSE
                          AND THEN
                            AND
                              1
                              0
                            OR
                              0
                              1
                          1
                        THEN
                          WRITE
                            1
            "}
        );
    }

    #[test]
    fn elseif_desugars_into_nested_ifs() {
        let source = indoc! {"
            CLASS Main IS
              METHOD main IS
              BEGIN
                IF FALSE THEN
                  WRITE 1;
                ELSEIF TRUE THEN
                  WRITE 2;
                ELSE
                  WRITE 3;
                END IF;
              END METHOD
            END CLASS
        "};
        assert_eq!(
            parsed_tree(source),
            indoc! {"
                CLASS Main EXTENDS Object
                  PUBLIC METHOD main
                    BEGIN
                      IF
                        0
                        THEN
                          WRITE
                            1
                        ELSE
                          IF
                            1
                            THEN
                              WRITE
                                2
                            ELSE
                              WRITE
                                3
            "}
        );
    }

    #[test]
    fn elseif_must_not_consume_the_outer_end_if() {
        // A second END IF after an ELSEIF chain is a syntax error: the
        // nested arm reuses the outer terminator.
        let source = indoc! {"
            CLASS Main IS
              METHOD main IS
              BEGIN
                IF FALSE THEN
                  WRITE 1;
                ELSEIF TRUE THEN
                  WRITE 2;
                END IF;
                END IF;
              END METHOD
            END CLASS
        "};
        assert_eq!(
            parse_error(source),
            "Error at line 9, col 9: syntax error: unexpected symbol IF"
        );
    }

    #[test]
    fn member_access_and_calls() {
        let source = indoc! {"
            CLASS Main IS
              METHOD main IS
              BEGIN
                SELF.run(1, NEW Main).touch;
                BASE.run(NULL);
              END METHOD
            END CLASS
        "};
        assert_eq!(
            parsed_tree(source),
            indoc! {"
                CLASS Main EXTENDS Object
                  PUBLIC METHOD main
                    BEGIN
                      CALL
                        PERIOD
                          PERIOD
                            _self
                            run
                              1
                              NEW Main
                          touch
                      CALL
                        PERIOD
                          _base
                          run
                            NULL
            "}
        );
    }

    #[test]
    fn return_with_and_without_value() {
        let source = indoc! {"
            CLASS Main IS
              METHOD a IS
              BEGIN
                RETURN;
              END METHOD
              METHOD b : Integer IS
              BEGIN
                RETURN 7;
              END METHOD
            END CLASS
        "};
        assert_eq!(
            parsed_tree(source),
            indoc! {"
                CLASS Main EXTENDS Object
                  PUBLIC METHOD a
                    BEGIN
                      RETURN
                  PUBLIC METHOD b : Integer
                    BEGIN
                      RETURN
                        7
            "}
        );
    }

    #[test]
    fn missing_semicolon() {
        assert_eq!(
            parse_error("CLASS Main IS METHOD main IS BEGIN WRITE 1 END METHOD END CLASS"),
            "Error at line 1, col 44: syntax error: unexpected symbol END"
        );
    }

    #[test]
    fn stray_input_after_last_class() {
        assert_eq!(
            parse_error("CLASS Main IS END CLASS trailing"),
            "Error at line 1, col 25: syntax error: unexpected symbol identifier trailing"
        );
    }
}
