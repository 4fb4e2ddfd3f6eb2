//! Syntax tree of the restricted automation script language.
//!
//! `Display` renders a tree back to source text that parses to the same tree.

use std::fmt;

/// A parsed script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// A module or name brought in by an import, with its optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportName {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `import a, b as c`
    Import(Vec<ImportName>),
    /// `from a import b, c as d`
    FromImport { module: String, names: Vec<ImportName> },
    /// `target = value`
    Assign { target: String, value: Expr },
    /// A bare expression, usually a call.
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
        }
    }
}

/// A keyword argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// `(namespace, function)` when this is a call of the form `ns.func(...)`.
    pub fn namespaced_call(&self) -> Option<(&str, &str)> {
        match self {
            Expr::Call { func, .. } => match func.as_ref() {
                Expr::Attribute { value, attr } => match value.as_ref() {
                    Expr::Name(ns) => Some((ns.as_str(), attr.as_str())),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        }
    }

    /// Numeric literal value, folding a leading sign.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Int(i) => Some(*i as f64),
            Expr::Float(f) => Some(*f),
            Expr::Unary { op, operand } => {
                let v = operand.as_number()?;
                Some(if *op == UnaryOp::Neg { -v } else { v })
            }
            _ => None,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } => 3,
            _ => 4,
        }
    }
}

/// Render a string as a single-quoted literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_names(f: &mut fmt::Formatter<'_>, names: &[ImportName]) -> fmt::Result {
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", name.name)?;
        if let Some(alias) = &name.alias {
            write!(f, " as {}", alias)?;
        }
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Name(name) => write!(f, "{}", name),
            Expr::Int(i) => write!(f, "{}", i),
            Expr::Float(v) => {
                if v.fract() == 0.0 && v.abs() < 1e16 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Expr::Str(s) => write!(f, "{}", quote(s)),
            Expr::Bool(true) => write!(f, "True"),
            Expr::Bool(false) => write!(f, "False"),
            Expr::None => write!(f, "None"),
            Expr::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expr::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Expr::Attribute { value, attr } => write!(f, "{}.{}", value, attr),
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                write!(f, "{}(", func)?;
                write_list(f, args)?;
                for (i, kw) in keywords.iter().enumerate() {
                    if i > 0 || !args.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", kw.name, kw.value)?;
                }
                write!(f, ")")
            }
            Expr::Index { value, index } => write!(f, "{}[{}]", value, index),
            Expr::Unary { op, operand } => {
                let sign = if *op == UnaryOp::Neg { "-" } else { "+" };
                if operand.precedence() < 3 {
                    write!(f, "{}({})", sign, operand)
                } else {
                    write!(f, "{}{}", sign, operand)
                }
            }
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                if left.precedence() < prec {
                    write!(f, "({})", left)?;
                } else {
                    write!(f, "{}", left)?;
                }
                write!(f, " {} ", op.symbol())?;
                // Left-associative: an equal-precedence right operand needs parens
                if right.precedence() <= prec {
                    write!(f, "({})", right)
                } else {
                    write!(f, "{}", right)
                }
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Import(names) => {
                write!(f, "import ")?;
                write_names(f, names)
            }
            Stmt::FromImport { module, names } => {
                write!(f, "from {} import ", module)?;
                write_names(f, names)
            }
            Stmt::Assign { target, value } => write!(f, "{} = {}", target, value),
            Stmt::Expr(expr) => write!(f, "{}", expr),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.statements.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("it's"), r"'it\'s'");
        assert_eq!(quote("a\\b\nc"), r"'a\\b\nc'");
        assert_eq!(quote("你好"), "'你好'");
    }

    #[test]
    fn test_display_call() {
        let call = Expr::Call {
            func: Box::new(Expr::Attribute {
                value: Box::new(Expr::Name("pyautogui".into())),
                attr: "click".into(),
            }),
            args: vec![],
            keywords: vec![
                Keyword {
                    name: "x".into(),
                    value: Expr::Int(10),
                },
                Keyword {
                    name: "y".into(),
                    value: Expr::Int(20),
                },
            ],
        };
        assert_eq!(call.to_string(), "pyautogui.click(x=10, y=20)");
        assert_eq!(call.namespaced_call(), Some(("pyautogui", "click")));
    }

    #[test]
    fn test_display_precedence() {
        let expr = Expr::Binary {
            op: BinOp::Mul,
            left: Box::new(Expr::Binary {
                op: BinOp::Add,
                left: Box::new(Expr::Int(1)),
                right: Box::new(Expr::Int(2)),
            }),
            right: Box::new(Expr::Float(3.0)),
        };
        assert_eq!(expr.to_string(), "(1 + 2) * 3.0");
        assert_eq!(Expr::Tuple(vec![Expr::Int(1)]).to_string(), "(1,)");
    }

    #[test]
    fn test_as_number_folds_sign() {
        let neg = Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(Expr::Int(5)),
        };
        assert_eq!(neg.as_number(), Some(-5.0));
        assert_eq!(Expr::Str("5".into()).as_number(), None);
    }
}
