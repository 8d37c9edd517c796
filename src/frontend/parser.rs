use crate::frontend::lexer::Lexer;
use crate::frontend::parse_error::ParseError;
use crate::frontend::token::{Token, TokenKind};
use crate::lang::ast::{BinOp, Expr, FunDecl, Stmt, UnaryOp};

/// Tokenize a whole source unit, dropping spaces and comments.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();

    loop {
        let token = lexer.next_token();

        match token.kind {
            TokenKind::Spaces | TokenKind::Comment => continue,
            TokenKind::Unknown => {
                return Err(ParseError::InvalidToken {
                    lexeme: token.lexeme(src).to_string(),
                    line: token.line,
                    col: token.col,
                });
            }
            TokenKind::Eof => {
                tokens.push(token);
                break;
            }
            _ => tokens.push(token),
        }
    }

    Ok(tokens)
}

/// Recursive-descent parser over a pre-tokenized source unit.
///
/// Top level accepts only `fun`, `native fun`, and `import` declarations;
/// everything else lives inside function bodies.
pub struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    pub fn new(src: &'s str, tokens: Vec<Token>) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
        }
    }

    /// Convenience entry: tokenize and parse in one call.
    pub fn parse_source(src: &'s str) -> Result<Vec<Stmt>, ParseError> {
        let tokens = tokenize(src)?;

        Parser::new(src, tokens).parse()
    }

    fn current(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current();

        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }

        token
    }

    fn expect(&mut self, kind: TokenKind, what: &'static str) -> Result<Token, ParseError> {
        if self.check(kind) {
            return Ok(self.advance());
        }

        let found = self.current();

        Err(ParseError::Expected {
            what,
            found: found.lexeme(self.src).to_string(),
            line: found.line,
            col: found.col,
        })
    }

    fn expect_identifier(&mut self, what: &'static str) -> Result<String, ParseError> {
        let token = self.expect(TokenKind::Identifier, what)?;

        Ok(token.lexeme(self.src).to_string())
    }

    // =========================================================================
    // Top level
    // =========================================================================

    pub fn parse(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut decls = Vec::new();

        while !self.check(TokenKind::Eof) {
            let decl = match self.current().kind {
                TokenKind::KwImport => self.parse_import()?,
                TokenKind::KwNative => self.parse_native_stub()?,
                TokenKind::KwFun => self.parse_function()?,
                _ => {
                    let found = self.current();

                    return Err(ParseError::InvalidTopLevel {
                        found: found.lexeme(self.src).to_string(),
                        line: found.line,
                        col: found.col,
                    });
                }
            };

            decls.push(decl);
        }

        Ok(decls)
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KwImport, "'import'")?;

        let target = self.expect(TokenKind::LitString, "import path string")?;

        Ok(Stmt::Import(target.lexeme(self.src).to_string()))
    }

    /// `[a, b, c]` parameter list shared by functions and native stubs.
    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::OpenBracket, "'['")?;

        let mut params = Vec::new();

        if !self.check(TokenKind::CloseBracket) {
            params.push(self.expect_identifier("parameter name")?);

            while self.check(TokenKind::Comma) {
                self.advance();
                params.push(self.expect_identifier("parameter name")?);
            }
        }

        self.expect(TokenKind::CloseBracket, "']'")?;

        Ok(params)
    }

    fn parse_function(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KwFun, "'fun'")?;

        let name = self.expect_identifier("function name")?;

        self.expect(TokenKind::Colon, "':'")?;

        let params = self.parse_params()?;

        self.expect(TokenKind::Arrow, "'=>'")?;

        let body = self.parse_block()?;

        Ok(Stmt::Function(FunDecl { name, params, body }))
    }

    fn parse_native_stub(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KwNative, "'native'")?;
        self.expect(TokenKind::KwFun, "'fun'")?;

        let name = self.expect_identifier("native function name")?;

        self.expect(TokenKind::Colon, "':'")?;

        let params = self.parse_params()?;

        Ok(Stmt::NativeStub { name, params })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::OpenBrace, "'{'")?;

        let mut stmts = Vec::new();

        while !self.check(TokenKind::Eof) {
            if self.check(TokenKind::CloseBrace) {
                self.advance();
                return Ok(stmts);
            }

            stmts.push(self.parse_stmt()?);
        }

        self.expect(TokenKind::CloseBrace, "'}'")?;

        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.current().kind {
            TokenKind::KwDef => self.parse_definition(),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwReturn => self.parse_return(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwBreak => {
                self.advance();
                Ok(Stmt::Break)
            }
            _ => {
                let expr = self.parse_assign()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_definition(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KwDef, "'def'")?;

        let name = self.expect_identifier("variable name")?;

        self.expect(TokenKind::OpAssign, "'='")?;

        let init = self.parse_compare()?;

        Ok(Stmt::Def { name, init })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KwIf, "'if'")?;

        let cond = self.parse_compare()?;
        let then_body = self.parse_block()?;

        if !self.check(TokenKind::KwElse) {
            return Ok(Stmt::If {
                cond,
                then_body,
                else_body: None,
            });
        }

        self.advance();

        let else_body = self.parse_block()?;

        Ok(Stmt::If {
            cond,
            then_body,
            else_body: Some(else_body),
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KwReturn, "'return'")?;

        let result = self.parse_compare()?;

        Ok(Stmt::Return(result))
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::KwWhile, "'while'")?;

        let check = self.parse_compare()?;
        let body = self.parse_block()?;

        Ok(Stmt::While { check, body })
    }

    // =========================================================================
    // Expressions
    //
    // Precedence, loosest first: assign, compare, equality, term, factor,
    // unary, call, access, primary.
    // =========================================================================

    fn parse_assign(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_compare()?;

        if !self.check(TokenKind::OpAssign) {
            return Ok(target);
        }

        self.advance();

        let value = self.parse_compare()?;

        Ok(Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn parse_compare(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_equality()?;

        loop {
            let op = match self.current().kind {
                TokenKind::OpLesser => BinOp::Lt,
                TokenKind::OpGreater => BinOp::Gt,
                TokenKind::OpAtMost => BinOp::Lte,
                TokenKind::OpAtLeast => BinOp::Gte,
                _ => break,
            };

            self.advance();

            let rhs = self.parse_equality()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(rhs),
            };
        }

        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_term()?;

        loop {
            let op = match self.current().kind {
                TokenKind::OpEquality => BinOp::Equ,
                TokenKind::OpInequality => BinOp::Neq,
                _ => break,
            };

            self.advance();

            let rhs = self.parse_term()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(rhs),
            };
        }

        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_factor()?;

        loop {
            let op = match self.current().kind {
                TokenKind::OpPlus => BinOp::Add,
                TokenKind::OpMinus => BinOp::Sub,
                _ => break,
            };

            self.advance();

            let rhs = self.parse_factor()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(rhs),
            };
        }

        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;

        loop {
            let op = match self.current().kind {
                TokenKind::OpTimes => BinOp::Mul,
                TokenKind::OpSlash => BinOp::Div,
                TokenKind::OpModulo => BinOp::Mod,
                _ => break,
            };

            self.advance();

            let rhs = self.parse_unary()?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(rhs),
            };
        }

        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if !self.check(TokenKind::OpMinus) {
            return self.parse_call();
        }

        self.advance();

        let inner = self.parse_call()?;

        Ok(Expr::Unary {
            op: UnaryOp::Neg,
            inner: Box::new(inner),
        })
    }

    fn parse_call(&mut self) -> Result<Expr, ParseError> {
        let callee = self.parse_access()?;

        if !self.check(TokenKind::OpenParen) {
            return Ok(callee);
        }

        self.advance();

        let mut args = Vec::new();

        if !self.check(TokenKind::CloseParen) {
            args.push(self.parse_compare()?);

            while self.check(TokenKind::Comma) {
                self.advance();
                args.push(self.parse_compare()?);
            }
        }

        self.expect(TokenKind::CloseParen, "')'")?;

        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
        })
    }

    /// `a.b.c` chains; the right side of each dot is a primary (usually an
    /// index literal or a name holding one).
    fn parse_access(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        while self.check(TokenKind::Dot) {
            self.advance();

            let index = self.parse_primary()?;

            expr = Expr::Binary {
                op: BinOp::Access,
                left: Box::new(expr),
                right: Box::new(index),
            };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current();

        match token.kind {
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Name(token.lexeme(self.src).to_string()))
            }
            TokenKind::OpenParen => {
                self.advance();

                let inner = self.parse_compare()?;

                self.expect(TokenKind::CloseParen, "')'")?;

                Ok(inner)
            }
            TokenKind::OpenBrace | TokenKind::OpenBracket => self.parse_sequence(),
            _ => self.parse_literal(),
        }
    }

    fn parse_sequence(&mut self) -> Result<Expr, ParseError> {
        let open = self.advance();
        let is_tuple = open.kind == TokenKind::OpenBracket;
        let close = if is_tuple {
            TokenKind::CloseBracket
        } else {
            TokenKind::CloseBrace
        };

        let mut items = Vec::new();

        if !self.check(close) {
            items.push(self.parse_compare()?);

            while self.check(TokenKind::Comma) {
                self.advance();
                items.push(self.parse_compare()?);
            }
        }

        self.expect(close, if is_tuple { "']'" } else { "'}'" })?;

        Ok(Expr::Seq { items, is_tuple })
    }

    fn parse_literal(&mut self) -> Result<Expr, ParseError> {
        let token = self.current();
        let lexeme = token.lexeme(self.src);

        let expr = match token.kind {
            TokenKind::LitTrue => Expr::Bool(true),
            TokenKind::LitFalse => Expr::Bool(false),
            TokenKind::LitInt => {
                let value = lexeme.parse::<i32>().map_err(|_| self.bad_literal(token))?;

                Expr::Int {
                    value,
                    lexeme: lexeme.to_string(),
                }
            }
            TokenKind::LitFloat => {
                let value = lexeme.parse::<f64>().map_err(|_| self.bad_literal(token))?;

                Expr::Float {
                    value,
                    lexeme: lexeme.to_string(),
                }
            }
            TokenKind::LitChar => Expr::Char(unescape_char(lexeme)),
            TokenKind::LitString => Expr::Str(lexeme.to_string()),
            _ => {
                return Err(ParseError::Expected {
                    what: "a literal",
                    found: lexeme.to_string(),
                    line: token.line,
                    col: token.col,
                });
            }
        };

        self.advance();

        Ok(expr)
    }

    fn bad_literal(&self, token: Token) -> ParseError {
        ParseError::InvalidLiteral {
            lexeme: token.lexeme(self.src).to_string(),
            line: token.line,
            col: token.col,
        }
    }
}

/// Resolve a char-literal body to its 7-bit value.
fn unescape_char(lexeme: &str) -> u8 {
    let bytes = lexeme.as_bytes();

    if bytes.first() == Some(&b'\\') {
        match bytes.get(1) {
            Some(b'n') => b'\n',
            Some(b't') => b'\t',
            _ => 0,
        }
    } else {
        bytes.first().copied().unwrap_or(0) & 0x7f
    }
}
