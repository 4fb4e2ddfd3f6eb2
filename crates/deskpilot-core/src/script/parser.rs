//! Recursive-descent parser for the restricted automation script language.
//!
//! The grammar is a small statement-only subset of a familiar scripting
//! syntax: imports, single-name assignment and expressions. There are no
//! blocks, loops, conditionals or function definitions.

use super::ast::{BinOp, Expr, ImportName, Keyword, Program, Stmt, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::ScriptError;

/// Maximum depth of an expression tree.
const MAX_DEPTH: usize = 64;

/// Parse script source into a program.
pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .program()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ScriptError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}, found {:?}", what, self.peek())))
        }
    }

    fn error(&self, message: &str) -> ScriptError {
        ScriptError::Syntax {
            line: self.line(),
            message: message.to_string(),
        }
    }

    fn name(&mut self) -> Result<String, ScriptError> {
        match self.advance() {
            Token::Name(name) => Ok(name),
            other => Err(self.error(&format!("expected a name, found {:?}", other))),
        }
    }

    fn program(mut self) -> Result<Program, ScriptError> {
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Token::Eof => break,
                Token::Newline | Token::Semicolon => {
                    self.pos += 1;
                }
                _ => {
                    statements.push(self.statement()?);
                    match self.peek() {
                        Token::Newline | Token::Semicolon | Token::Eof => {}
                        other => {
                            return Err(self.error(&format!("unexpected {:?}", other)));
                        }
                    }
                }
            }
        }
        Ok(Program { statements })
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        match self.peek() {
            Token::Import => {
                self.pos += 1;
                Ok(Stmt::Import(self.import_names(true)?))
            }
            Token::From => {
                self.pos += 1;
                let module = self.dotted_name()?;
                self.expect(&Token::Import, "'import'")?;
                let parenthesized = self.eat(&Token::LParen);
                let names = self.import_names(false)?;
                if parenthesized {
                    self.expect(&Token::RParen, "')'")?;
                }
                Ok(Stmt::FromImport { module, names })
            }
            Token::Name(_) if self.peek_at(1) == &Token::Assign => {
                let target = self.name()?;
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() == &Token::Assign {
                    return Err(self.error("chained assignment is not supported"));
                }
                Ok(Stmt::Assign { target, value })
            }
            _ => {
                let expr = self.expression()?;
                if self.peek() == &Token::Assign {
                    return Err(self.error("only simple names can be assigned"));
                }
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn dotted_name(&mut self) -> Result<String, ScriptError> {
        let mut name = self.name()?;
        while self.eat(&Token::Dot) {
            name.push('.');
            name.push_str(&self.name()?);
        }
        Ok(name)
    }

    fn import_names(&mut self, dotted: bool) -> Result<Vec<ImportName>, ScriptError> {
        let mut names = Vec::new();
        loop {
            let name = if dotted {
                self.dotted_name()?
            } else if self.eat(&Token::Star) {
                "*".to_string()
            } else {
                self.name()?
            };
            let alias = if self.eat(&Token::As) {
                Some(self.name()?)
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(names)
    }

    /// Go one level deeper into the tree being built.
    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let result = self.additive();
        self.depth -= 1;
        result
    }

    // Operator and postfix chains build left-deep trees, so every link
    // counts as one level until the chain ends.

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.term()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => {
                    self.depth -= links;
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.enter()?;
            links += 1;
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => {
                    self.depth -= links;
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.enter()?;
            links += 1;
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        let mut links = 0;
        loop {
            if matches!(self.peek(), Token::Dot | Token::LParen | Token::LBracket) {
                self.enter()?;
                links += 1;
            }
            match self.peek() {
                Token::Dot => {
                    self.pos += 1;
                    let attr = self.name()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                Token::LParen => {
                    self.pos += 1;
                    let (args, keywords) = self.arguments()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    };
                }
                Token::LBracket => {
                    self.pos += 1;
                    let index = self.expression()?;
                    if self.peek() == &Token::Colon {
                        return Err(self.error("slices are not supported"));
                    }
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => {
                    self.depth -= links;
                    return Ok(expr);
                }
            }
        }
    }

    fn arguments(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>), ScriptError> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();

        while self.peek() != &Token::RParen {
            if let (Token::Name(_), Token::Assign) = (self.peek(), self.peek_at(1)) {
                let name = self.name()?;
                self.pos += 1;
                if keywords.iter().any(|k| k.name == name) {
                    return Err(self.error(&format!("keyword argument repeated: {}", name)));
                }
                let value = self.expression()?;
                keywords.push(Keyword { name, value });
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.expression()?);
            }

            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect(&Token::RParen, "')'")?;
        Ok((args, keywords))
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        match self.advance() {
            Token::Name(name) => Ok(Expr::Name(name)),
            Token::Int(i) => Ok(Expr::Int(i)),
            Token::Float(f) => Ok(Expr::Float(f)),
            Token::Str(mut s) => {
                // Adjacent literals concatenate
                while let Token::Str(next) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Str(s))
            }
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::None => Ok(Expr::None),
            Token::LParen => {
                if self.eat(&Token::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.eat(&Token::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.peek() == &Token::RParen {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect(&Token::RParen, "')'")?;
                Ok(Expr::Tuple(items))
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while self.peek() != &Token::RBracket {
                    items.push(self.expression()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            other => Err(self.error(&format!("unexpected {:?}", other))),
        }
    }
}
