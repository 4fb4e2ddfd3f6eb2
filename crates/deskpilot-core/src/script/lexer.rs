//! Tokenizer for the restricted automation script language.

use super::ScriptError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Import,
    From,
    As,
    True,
    False,
    None,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Newline,
    Eof,
}

/// A token with the line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// Split `source` into tokens.
///
/// Newlines inside brackets are ignored, comments run to end of line and a
/// statement that starts indented is rejected, as there are no blocks.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ScriptError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Spanned>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn push(&mut self, token: Token) {
        self.tokens.push(Spanned {
            token,
            line: self.line,
        });
    }

    fn run(mut self) -> Result<Vec<Spanned>, ScriptError> {
        while let Some(&c) = self.chars.peek() {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                if c == ' ' || c == '\t' {
                    self.skip_inline_whitespace();
                    match self.chars.peek() {
                        None | Some('\n') | Some('\r') | Some('#') => {}
                        Some(_) => {
                            return Err(ScriptError::Syntax {
                                line: self.line,
                                message: "unexpected indent".to_string(),
                            })
                        }
                    }
                    continue;
                }
            }

            match c {
                ' ' | '\t' | '\r' => {
                    self.chars.next();
                }
                '\n' => {
                    self.chars.next();
                    if self.depth == 0 {
                        self.push_newline();
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                '\\' => {
                    // Explicit line continuation
                    self.chars.next();
                    while let Some(&'\r') = self.chars.peek() {
                        self.chars.next();
                    }
                    if self.chars.next() != Some('\n') {
                        return Err(self.error("unexpected character after line continuation"));
                    }
                    self.line += 1;
                }
                '#' => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '\'' | '"' => {
                    let s = self.string(false)?;
                    self.push(Token::Str(s));
                }
                '0'..='9' => self.number()?,
                '.' => {
                    self.chars.next();
                    if matches!(self.chars.peek(), Some('0'..='9')) {
                        let digits = self.digits();
                        let value: f64 = format!("0.{}", digits)
                            .parse()
                            .map_err(|_| self.error("invalid number"))?;
                        self.push(Token::Float(value));
                    } else {
                        self.push(Token::Dot);
                    }
                }
                c if c.is_alphabetic() || c == '_' => self.word()?,
                '(' | '[' => {
                    self.chars.next();
                    self.depth += 1;
                    self.push(if c == '(' { Token::LParen } else { Token::LBracket });
                }
                ')' | ']' => {
                    self.chars.next();
                    if self.depth == 0 {
                        return Err(self.error("unbalanced bracket"));
                    }
                    self.depth -= 1;
                    self.push(if c == ')' { Token::RParen } else { Token::RBracket });
                }
                ',' => self.single(Token::Comma),
                ':' => self.single(Token::Colon),
                ';' => self.single(Token::Semicolon),
                '+' => self.single(Token::Plus),
                '-' => self.single(Token::Minus),
                '*' => self.single(Token::Star),
                '/' => self.single(Token::Slash),
                '=' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        return Err(self.error("comparison is not supported"));
                    }
                    self.push(Token::Assign);
                }
                other => {
                    return Err(self.error(&format!("unsupported character '{}'", other)));
                }
            }
        }

        if self.depth != 0 {
            return Err(self.error("unclosed bracket"));
        }
        self.push_newline();
        self.push(Token::Eof);
        Ok(self.tokens)
    }

    fn error(&self, message: &str) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message: message.to_string(),
        }
    }

    fn single(&mut self, token: Token) {
        self.chars.next();
        self.push(token);
    }

    fn push_newline(&mut self) {
        let redundant = matches!(
            self.tokens.last().map(|t| &t.token),
            None | Some(Token::Newline)
        );
        if !redundant {
            self.push(Token::Newline);
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == ' ' || c == '\t' {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn digits(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.chars.next();
            } else if c == '_' {
                self.chars.next();
            } else {
                break;
            }
        }
        out
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        let mut text = self.digits();
        let mut is_float = false;

        if self.chars.peek() == Some(&'.') {
            self.chars.next();
            is_float = true;
            text.push('.');
            text.push_str(&self.digits());
        }
        if matches!(self.chars.peek(), Some('e') | Some('E')) {
            self.chars.next();
            is_float = true;
            text.push('e');
            if let Some(&sign) = self.chars.peek() {
                if sign == '+' || sign == '-' {
                    text.push(sign);
                    self.chars.next();
                }
            }
            text.push_str(&self.digits());
        }
        if matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
            return Err(self.error("invalid number literal"));
        }

        let token = if is_float {
            Token::Float(text.parse().map_err(|_| self.error("invalid float literal"))?)
        } else {
            Token::Int(text.parse().map_err(|_| self.error("integer literal out of range"))?)
        };
        self.push(token);
        Ok(())
    }

    fn word(&mut self) -> Result<(), ScriptError> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        // String prefixes: raw strings are accepted, everything else is not
        if matches!(self.chars.peek(), Some('\'') | Some('"')) {
            return match word.to_lowercase().as_str() {
                "r" => {
                    let s = self.string(true)?;
                    self.push(Token::Str(s));
                    Ok(())
                }
                _ => Err(self.error(&format!("unsupported string prefix '{}'", word))),
            };
        }

        let token = match word.as_str() {
            "import" => Token::Import,
            "from" => Token::From,
            "as" => Token::As,
            "True" => Token::True,
            "False" => Token::False,
            "None" => Token::None,
            "def" | "class" | "lambda" | "for" | "while" | "if" | "elif" | "else" | "try"
            | "except" | "finally" | "with" | "return" | "yield" | "global" | "nonlocal"
            | "del" | "assert" | "raise" | "async" | "await" | "and" | "or" | "not" | "in"
            | "is" | "pass" | "break" | "continue" => {
                return Err(self.error(&format!("'{}' is not supported", word)));
            }
            _ => Token::Name(word),
        };
        self.push(token);
        Ok(())
    }

    fn string(&mut self, raw: bool) -> Result<String, ScriptError> {
        let quote = self.chars.next().ok_or_else(|| self.error("expected string"))?;

        let mut triple = false;
        if self.chars.peek() == Some(&quote) {
            self.chars.next();
            if self.chars.peek() == Some(&quote) {
                self.chars.next();
                triple = true;
            } else {
                return Ok(String::new());
            }
        }

        let mut out = String::new();
        loop {
            let c = self
                .chars
                .next()
                .ok_or_else(|| self.error("unterminated string"))?;

            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.chars.peek() == Some(&quote) {
                    self.chars.next();
                    if self.chars.peek() == Some(&quote) {
                        self.chars.next();
                        return Ok(out);
                    }
                    out.push(quote);
                }
                out.push(quote);
                continue;
            }

            match c {
                '\n' if !triple => return Err(self.error("unterminated string")),
                '\n' => {
                    self.line += 1;
                    out.push('\n');
                }
                '\\' if raw => {
                    out.push('\\');
                    if let Some(next) = self.chars.next() {
                        out.push(next);
                    }
                }
                '\\' => self.escape(&mut out)?,
                _ => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), ScriptError> {
        let c = self
            .chars
            .next()
            .ok_or_else(|| self.error("unterminated string"))?;
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\n' => self.line += 1,
            'x' => out.push(self.code_point(2)?),
            'u' => out.push(self.code_point(4)?),
            'U' => out.push(self.code_point(8)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn code_point(&mut self, len: usize) -> Result<char, ScriptError> {
        let mut hex = String::with_capacity(len);
        for _ in 0..len {
            match self.chars.next() {
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                _ => return Err(self.error("truncated escape sequence")),
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid escape sequence"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_tokenize_call() {
        assert_eq!(
            kinds("pyautogui.click(x=10, y=2.5)"),
            vec![
                Token::Name("pyautogui".into()),
                Token::Dot,
                Token::Name("click".into()),
                Token::LParen,
                Token::Name("x".into()),
                Token::Assign,
                Token::Int(10),
                Token::Comma,
                Token::Name("y".into()),
                Token::Assign,
                Token::Float(2.5),
                Token::RParen,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb" r'\d' '你'"#)[..4],
            [
                Token::Str("it's".into()),
                Token::Str("a\nb".into()),
                Token::Str("\\d".into()),
                Token::Str("你".into()),
            ]
        );
        assert_eq!(kinds("'''x\ny'''")[0], Token::Str("x\ny".into()));
        assert_eq!(kinds("''")[0], Token::Str(String::new()));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let tokens = kinds("# header\n\n  # indented comment\nimport time  # trailing\n");
        assert_eq!(
            tokens,
            vec![
                Token::Import,
                Token::Name("time".into()),
                Token::Newline,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_joined() {
        let tokens = kinds("f(\n  1,\n  2\n)");
        assert_eq!(tokens.iter().filter(|t| **t == Token::Newline).count(), 1);
    }

    #[test]
    fn test_rejections() {
        assert!(tokenize("  pyautogui.click()").is_err());
        assert!(tokenize("for i in x").is_err());
        assert!(tokenize("f'{x}'").is_err());
        assert!(tokenize("a == b").is_err());
        assert!(tokenize("x = {}").is_err());
        assert!(tokenize("f(").is_err());
        assert!(tokenize("'open").is_err());
    }
}
