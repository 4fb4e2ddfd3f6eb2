//! Evaluator for validated scripts.
//!
//! Expressions are evaluated locally over plain values. The only way out is
//! a statement-level call `namespace.function(...)`, which is looked up in
//! the capability table, bound into a typed [`Invocation`] and handed to the
//! [`Host`]. Anything the table does not name cannot be reached.

use super::ast::{BinOp, Expr, Keyword, Program, Stmt, UnaryOp};
use super::policy::{capability_for, Capability};
use async_trait::async_trait;
use deskpilot_desktop::{KeyInput, MouseButton, ScrollAxis};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Upper bound on the size of one value: string bytes plus one per
/// element or scalar.
const MAX_VALUE_SIZE: usize = 100_000;

/// Upper bound on container nesting.
const MAX_VALUE_DEPTH: usize = 32;

/// Keyword arguments accepted everywhere and ignored.
const IGNORED_KEYWORDS: &[&str] = &[
    "duration",
    "tween",
    "interval",
    "pause",
    "_pause",
    "logScreenshot",
];

/// Errors raised while running an accepted script.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("NameError: name '{0}' is not defined")]
    Name(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("ValueError: {0}")]
    Value(String),

    #[error("IndexError: {0}")]
    Index(String),

    #[error("ZeroDivisionError: division by zero")]
    ZeroDivision,

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Host(String),
}

/// A script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) => !items.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Quoted rendering used inside containers.
    fn repr(&self) -> String {
        match self {
            Value::Str(s) => super::ast::quote(s),
            other => other.to_string(),
        }
    }

    fn items(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    fn into_items(self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < 1e16 => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                if parts.len() == 1 {
                    write!(f, "({},)", parts[0])
                } else {
                    write!(f, "({})", parts.join(", "))
                }
            }
        }
    }
}

/// A capability call with its arguments bound and typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Click {
        position: Option<(i32, i32)>,
        button: MouseButton,
        clicks: u32,
    },
    MoveTo {
        x: i32,
        y: i32,
    },
    MoveRel {
        dx: i32,
        dy: i32,
    },
    DragTo {
        x: i32,
        y: i32,
        button: MouseButton,
    },
    DragRel {
        dx: i32,
        dy: i32,
        button: MouseButton,
    },
    /// Positive amounts scroll up or right.
    Scroll {
        amount: i32,
        axis: ScrollAxis,
        position: Option<(i32, i32)>,
    },
    Press {
        keys: Vec<KeyInput>,
        presses: u32,
    },
    KeyDown(KeyInput),
    KeyUp(KeyInput),
    Hotkey(Vec<KeyInput>),
    Write(String),
    Screenshot,
    Position,
    Size,
    Sleep(Duration),
    Copy(String),
    Paste,
}

/// Performs invocations against the desktop.
#[async_trait]
pub trait Host: Send + Sync {
    async fn perform(&self, invocation: Invocation) -> Result<Value, RuntimeError>;
}

/// Runs one program against a host.
pub struct Interpreter<'h> {
    host: &'h dyn Host,
    vars: HashMap<String, Value>,
    max_sleep: Duration,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h dyn Host) -> Self {
        Self {
            host,
            vars: HashMap::new(),
            max_sleep: Duration::from_secs(30),
        }
    }

    /// Cap on any single scripted sleep.
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    /// Execute every statement in order, stopping at the first error.
    pub async fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        for stmt in &program.statements {
            match stmt {
                // Namespaces are preinstalled
                Stmt::Import(_) | Stmt::FromImport { .. } => {}
                Stmt::Assign { target, value } => {
                    let value = self.statement_value(value).await?;
                    self.vars.insert(target.clone(), value);
                }
                Stmt::Expr(expr) => {
                    self.statement_value(expr).await?;
                }
            }
        }
        Ok(())
    }

    /// Variable bound by the last run.
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    async fn statement_value(&self, expr: &Expr) -> Result<Value, RuntimeError> {
        if let (Some((namespace, function)), Expr::Call { args, keywords, .. }) =
            (expr.namespaced_call(), expr)
        {
            let capability = capability_for(namespace, function).ok_or_else(|| {
                RuntimeError::Unsupported(format!("{}.{} is not available", namespace, function))
            })?;
            let args = args
                .iter()
                .map(|a| self.eval(a))
                .collect::<Result<Vec<_>, _>>()?;
            let keywords = keywords
                .iter()
                    .map(|kw: &Keyword| -> Result<(String, Value), RuntimeError> {
                    Ok((kw.name.clone(), self.eval(&kw.value)?))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let invocation = self.bind(capability, function, args, keywords)?;
            debug!("Invoking {:?}", invocation);
            return self.host.perform(invocation).await;
        }
        self.eval(expr)
    }

    fn eval(&self, expr: &Expr) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::Name(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::Name(name.clone())),
            Expr::List(items) => bounded(Value::List(self.eval_all(items)?)),
            Expr::Tuple(items) => bounded(Value::Tuple(self.eval_all(items)?)),
            Expr::Attribute { attr, .. } => Err(RuntimeError::Unsupported(format!(
                "attribute access: {}",
                attr
            ))),
            Expr::Call {
                func,
                args,
                keywords,
            } => match func.as_ref() {
                Expr::Name(name) => {
                    if !keywords.is_empty() {
                        return Err(RuntimeError::Type(format!(
                            "{}() takes no keyword arguments",
                            name
                        )));
                    }
                    bounded(builtin(name, self.eval_all(args)?)?)
                }
                Expr::Attribute { attr, .. } => Err(RuntimeError::Unsupported(format!(
                    "{}() must be called as its own statement",
                    attr
                ))),
                other => Err(RuntimeError::Type(format!("'{}' is not callable", other))),
            },
            Expr::Index { value, index } => {
                let container = self.eval(value)?;
                let index = self.eval(index)?;
                index_value(&container, &index)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| RuntimeError::Value("integer overflow".into())),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(b as i64))),
                    (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v),
                    (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(b as i64)),
                    (_, v) => Err(RuntimeError::Type(format!(
                        "bad operand type for unary operator: '{}'",
                        v.type_name()
                    ))),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
        }
    }

    fn eval_all(&self, items: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
        items.iter().map(|item| self.eval(item)).collect()
    }

    fn bind(
        &self,
        capability: Capability,
        function: &str,
        args: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> Result<Invocation, RuntimeError> {
        use Capability as C;

        match capability {
            C::Click | C::DoubleClick | C::TripleClick | C::RightClick | C::MiddleClick => {
                let params: &[&str] = if capability == C::Click {
                    &["x", "y", "clicks", "interval", "button"]
                } else {
                    &["x", "y", "interval", "button"]
                };
                let mut slots = bind_args(function, params, args, keywords)?;
                let position = point(function, slots[0].take(), slots[1].take())?;
                let (default_button, default_clicks) = match capability {
                    C::DoubleClick => (MouseButton::Left, 2),
                    C::TripleClick => (MouseButton::Left, 3),
                    C::RightClick => (MouseButton::Right, 1),
                    C::MiddleClick => (MouseButton::Middle, 1),
                    _ => (MouseButton::Left, 1),
                };
                let button_slot = if capability == C::Click { 4 } else { 3 };
                let button = match slots[button_slot].take() {
                    Some(v) => button_arg(function, v)?,
                    None => default_button,
                };
                let clicks = if capability == C::Click {
                    match slots[2].take() {
                        Some(v) => to_count(function, "clicks", v)?,
                        None => default_clicks,
                    }
                } else {
                    default_clicks
                };
                Ok(Invocation::Click {
                    position,
                    button,
                    clicks,
                })
            }
            C::MoveTo | C::MoveRel => {
                let params: &[&str] = if capability == C::MoveTo {
                    &["x", "y", "duration", "tween"]
                } else {
                    &["xOffset", "yOffset", "duration", "tween"]
                };
                let mut slots = bind_args(function, params, args, keywords)?;
                let (x, y) = point(function, slots[0].take(), slots[1].take())?
                    .ok_or_else(|| RuntimeError::Type(format!("{}() missing coordinates", function)))?;
                Ok(if capability == C::MoveTo {
                    Invocation::MoveTo { x, y }
                } else {
                    Invocation::MoveRel { dx: x, dy: y }
                })
            }
            C::DragTo | C::DragRel => {
                let params: &[&str] = if capability == C::DragTo {
                    &["x", "y", "duration", "tween", "button"]
                } else {
                    &["xOffset", "yOffset", "duration", "tween", "button"]
                };
                let mut slots = bind_args(function, params, args, keywords)?;
                let (x, y) = point(function, slots[0].take(), slots[1].take())?
                    .ok_or_else(|| RuntimeError::Type(format!("{}() missing coordinates", function)))?;
                let button = match slots[4].take() {
                    Some(v) => button_arg(function, v)?,
                    None => MouseButton::Left,
                };
                Ok(if capability == C::DragTo {
                    Invocation::DragTo { x, y, button }
                } else {
                    Invocation::DragRel {
                        dx: x,
                        dy: y,
                        button,
                    }
                })
            }
            C::Scroll | C::HScroll | C::VScroll => {
                let mut slots = bind_args(function, &["clicks", "x", "y"], args, keywords)?;
                let amount = match slots[0].take() {
                    Some(v) => to_coord(function, "clicks", v)?,
                    None => return Err(missing(function, "clicks")),
                };
                let position = point(function, slots[1].take(), slots[2].take())?;
                let axis = if capability == C::HScroll {
                    ScrollAxis::Horizontal
                } else {
                    ScrollAxis::Vertical
                };
                Ok(Invocation::Scroll {
                    amount,
                    axis,
                    position,
                })
            }
            C::Press => {
                let mut slots = bind_args(function, &["keys", "presses", "interval"], args, keywords)?;
                let keys = match slots[0].take() {
                    Some(v) => key_list(function, v)?,
                    None => return Err(missing(function, "keys")),
                };
                let presses = match slots[1].take() {
                    Some(v) => to_count(function, "presses", v)?,
                    None => 1,
                };
                Ok(Invocation::Press { keys, presses })
            }
            C::KeyDown | C::KeyUp => {
                let mut slots = bind_args(function, &["key"], args, keywords)?;
                let key = match slots[0].take() {
                    Some(Value::Str(s)) => parse_key(&s)?,
                    Some(other) => return Err(type_error(function, "key", "str", &other)),
                    None => return Err(missing(function, "key")),
                };
                Ok(if capability == C::KeyDown {
                    Invocation::KeyDown(key)
                } else {
                    Invocation::KeyUp(key)
                })
            }
            C::Hotkey => {
                for (name, _) in &keywords {
                    if !IGNORED_KEYWORDS.contains(&name.as_str()) {
                        return Err(RuntimeError::Type(format!(
                            "{}() got an unexpected keyword argument '{}'",
                            function, name
                        )));
                    }
                }
                // A single list argument is flattened into the key sequence
                let flat: Vec<Value> = if args.len() == 1 && args[0].items().is_some() {
                    args.into_iter()
                        .flat_map(|v| v.into_items().unwrap_or_default())
                        .collect()
                } else {
                    args
                };
                let mut keys = Vec::new();
                for value in flat {
                    keys.extend(key_list(function, value)?);
                }
                if keys.is_empty() {
                    return Err(missing(function, "keys"));
                }
                Ok(Invocation::Hotkey(keys))
            }
            C::Write | C::TypeWrite => {
                let mut slots = bind_args(function, &["message", "interval"], args, keywords)?;
                match slots[0].take() {
                    Some(Value::Str(text)) => Ok(Invocation::Write(text)),
                    Some(v @ (Value::List(_) | Value::Tuple(_))) if capability == C::TypeWrite => {
                        Ok(Invocation::Press {
                            keys: key_list(function, v)?,
                            presses: 1,
                        })
                    }
                    Some(other) => Err(type_error(function, "message", "str", &other)),
                    None => Err(missing(function, "message")),
                }
            }
            C::Screenshot => {
                let mut slots = bind_args(function, &["imageFilename", "region"], args, keywords)?;
                if matches!(slots[0].take(), Some(v) if v != Value::None) {
                    return Err(RuntimeError::Unsupported(
                        "screenshots cannot be written to files".into(),
                    ));
                }
                Ok(Invocation::Screenshot)
            }
            C::LocateOnScreen | C::LocateCenterOnScreen => Err(RuntimeError::Unsupported(
                format!("{}: image location is not available", function),
            )),
            C::Position | C::Size | C::Paste => {
                bind_args(function, &[], args, keywords)?;
                Ok(match capability {
                    C::Position => Invocation::Position,
                    C::Size => Invocation::Size,
                    _ => Invocation::Paste,
                })
            }
            C::Sleep => {
                let mut slots = bind_args(function, &["secs"], args, keywords)?;
                let secs = match slots[0].take() {
                    Some(v) => v
                        .as_f64()
                        .ok_or_else(|| type_error(function, "secs", "number", &v))?,
                    None => return Err(missing(function, "secs")),
                };
                if !secs.is_finite() || secs < 0.0 {
                    return Err(RuntimeError::Value(
                        "sleep length must be non-negative".into(),
                    ));
                }
                let capped = secs.min(self.max_sleep.as_secs_f64());
                Ok(Invocation::Sleep(Duration::from_secs_f64(capped)))
            }
            C::Copy => {
                let mut slots = bind_args(function, &["text"], args, keywords)?;
                match slots[0].take() {
                    Some(Value::Str(text)) => Ok(Invocation::Copy(text)),
                    Some(other) => Ok(Invocation::Copy(other.to_string())),
                    None => Err(missing(function, "text")),
                }
            }
        }
    }
}

fn missing(function: &str, param: &str) -> RuntimeError {
    RuntimeError::Type(format!(
        "{}() missing required argument: '{}'",
        function, param
    ))
}

fn type_error(function: &str, param: &str, expected: &str, got: &Value) -> RuntimeError {
    RuntimeError::Type(format!(
        "{}() argument '{}' must be {}, not {}",
        function,
        param,
        expected,
        got.type_name()
    ))
}

/// Match positional and keyword arguments against `params`.
fn bind_args(
    function: &str,
    params: &[&str],
    args: Vec<Value>,
    keywords: Vec<(String, Value)>,
) -> Result<Vec<Option<Value>>, RuntimeError> {
    if args.len() > params.len() {
        return Err(RuntimeError::Type(format!(
            "{}() takes at most {} positional arguments but {} were given",
            function,
            params.len(),
            args.len()
        )));
    }

    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in slots.iter_mut().zip(args) {
        *slot = Some(value);
    }

    for (name, value) in keywords {
        match params.iter().position(|p| *p == name) {
            Some(i) if slots[i].is_some() => {
                return Err(RuntimeError::Type(format!(
                    "{}() got multiple values for argument '{}'",
                    function, name
                )));
            }
            Some(i) => slots[i] = Some(value),
            None if IGNORED_KEYWORDS.contains(&name.as_str()) => {}
            None => {
                return Err(RuntimeError::Type(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    function, name
                )));
            }
        }
    }
    Ok(slots)
}

fn to_coord(function: &str, param: &str, value: Value) -> Result<i32, RuntimeError> {
    let number = value
        .as_f64()
        .ok_or_else(|| type_error(function, param, "a number", &value))?;
    if !number.is_finite() || number.abs() > i32::MAX as f64 {
        return Err(RuntimeError::Value(format!(
            "{}() argument '{}' out of range",
            function, param
        )));
    }
    Ok(number.trunc() as i32)
}

fn to_count(function: &str, param: &str, value: Value) -> Result<u32, RuntimeError> {
    let count = to_coord(function, param, value)?;
    u32::try_from(count).map_err(|_| {
        RuntimeError::Value(format!("{}() argument '{}' must be >= 0", function, param))
    })
}

/// Resolve `x`/`y` arguments, accepting an `(x, y)` pair as the first.
fn point(
    function: &str,
    x: Option<Value>,
    y: Option<Value>,
) -> Result<Option<(i32, i32)>, RuntimeError> {
    match (x, y) {
        (None | Some(Value::None), None | Some(Value::None)) => Ok(None),
        (Some(pair), None | Some(Value::None)) if pair.items().is_some() => {
            match pair.items() {
                Some([px, py]) => Ok(Some((
                    to_coord(function, "x", px.clone())?,
                    to_coord(function, "y", py.clone())?,
                ))),
                _ => Err(RuntimeError::Value(format!(
                    "{}() expects an (x, y) pair",
                    function
                ))),
            }
        }
        (Some(x), Some(y)) => Ok(Some((
            to_coord(function, "x", x)?,
            to_coord(function, "y", y)?,
        ))),
        _ => Err(RuntimeError::Type(format!(
            "{}() needs both x and y",
            function
        ))),
    }
}

fn button_arg(function: &str, value: Value) -> Result<MouseButton, RuntimeError> {
    match value {
        Value::Str(name) => MouseButton::parse(&name).map_err(|e| RuntimeError::Value(e.to_string())),
        other => Err(type_error(function, "button", "str", &other)),
    }
}

fn parse_key(name: &str) -> Result<KeyInput, RuntimeError> {
    KeyInput::parse(name).map_err(|e| RuntimeError::Value(e.to_string()))
}

/// Keys from a name, a `ctrl+s` combination, or a sequence of names.
fn key_list(function: &str, value: Value) -> Result<Vec<KeyInput>, RuntimeError> {
    match value {
        Value::Str(name) if name.chars().count() > 1 && name.contains('+') => name
            .split('+')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(parse_key)
            .collect(),
        Value::Str(name) => Ok(vec![parse_key(&name)?]),
        Value::List(items) | Value::Tuple(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Str(name) => parse_key(&name),
                other => Err(type_error(function, "keys", "str", &other)),
            })
            .collect(),
        other => Err(type_error(function, "keys", "str", &other)),
    }
}

fn index_value(container: &Value, index: &Value) -> Result<Value, RuntimeError> {
    let Value::Int(i) = index else {
        return Err(RuntimeError::Type(format!(
            "indices must be integers, not {}",
            index.type_name()
        )));
    };

    let resolve = |len: usize| -> Result<usize, RuntimeError> {
        let len = len as i64;
        let at = if *i < 0 { len + i } else { *i };
        if at < 0 || at >= len {
            Err(RuntimeError::Index("index out of range".into()))
        } else {
            Ok(at as usize)
        }
    };

    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items[resolve(items.len())?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(chars[resolve(chars.len())?].to_string()))
        }
        other => Err(RuntimeError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Size of `value`, counted until it passes [`MAX_VALUE_SIZE`]. Nesting
/// beyond [`MAX_VALUE_DEPTH`] counts as oversized.
fn footprint(value: &Value) -> usize {
    let mut size = 0usize;
    let mut pending = vec![(value, 1usize)];
    while let Some((value, depth)) = pending.pop() {
        if depth > MAX_VALUE_DEPTH {
            return MAX_VALUE_SIZE + 1;
        }
        match value {
            Value::Str(s) => size = size.saturating_add(s.len().max(1)),
            Value::List(items) | Value::Tuple(items) => {
                size = size.saturating_add(1);
                pending.extend(items.iter().map(|item| (item, depth + 1)));
            }
            _ => size = size.saturating_add(1),
        }
        if size > MAX_VALUE_SIZE {
            break;
        }
    }
    size
}

fn fits(size: usize) -> Result<(), RuntimeError> {
    if size > MAX_VALUE_SIZE {
        Err(RuntimeError::Value("value too large".into()))
    } else {
        Ok(())
    }
}

fn bounded(value: Value) -> Result<Value, RuntimeError> {
    fits(footprint(&value))?;
    Ok(value)
}

fn repeat(items: &[Value], times: i64) -> Result<Vec<Value>, RuntimeError> {
    let times = times.max(0) as usize;
    if items.is_empty() || times == 0 {
        return Ok(Vec::new());
    }
    let unit = items.iter().map(footprint).fold(0usize, usize::saturating_add);
    fits(unit.saturating_mul(times).saturating_add(1))?;
    Ok((0..times).flat_map(|_| items.iter().cloned()).collect())
}

fn concat(a: &[Value], b: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let size = a
        .iter()
        .chain(b.iter())
        .map(footprint)
        .fold(1usize, usize::saturating_add);
    fits(size)?;
    Ok(a.iter().chain(b.iter()).cloned().collect())
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    use Value as V;

    let overflow = || RuntimeError::Value("integer overflow".into());
    match (op, &left, &right) {
        (BinOp::Add, V::Str(a), V::Str(b)) => {
            fits(a.len().saturating_add(b.len()))?;
            Ok(V::Str(format!("{}{}", a, b)))
        }
        (BinOp::Add, V::List(a), V::List(b)) => Ok(V::List(concat(a, b)?)),
        (BinOp::Add, V::Tuple(a), V::Tuple(b)) => Ok(V::Tuple(concat(a, b)?)),
        (BinOp::Mul, V::Str(s), V::Int(n)) | (BinOp::Mul, V::Int(n), V::Str(s)) => {
            let times = (*n).max(0) as usize;
            if s.is_empty() || times == 0 {
                return Ok(V::Str(String::new()));
            }
            fits(s.len().saturating_mul(times))?;
            Ok(V::Str(s.repeat(times)))
        }
        (BinOp::Mul, V::List(items), V::Int(n)) | (BinOp::Mul, V::Int(n), V::List(items)) => {
            Ok(V::List(repeat(items, *n)?))
        }
        (BinOp::Mul, V::Tuple(items), V::Int(n)) | (BinOp::Mul, V::Int(n), V::Tuple(items)) => {
            Ok(V::Tuple(repeat(items, *n)?))
        }
        (BinOp::Div, _, _) => {
            let (a, b) = numeric_pair(op, &left, &right)?;
            if b == 0.0 {
                return Err(RuntimeError::ZeroDivision);
            }
            Ok(V::Float(a / b))
        }
        (BinOp::Add, V::Int(a), V::Int(b)) => a.checked_add(*b).map(V::Int).ok_or_else(overflow),
        (BinOp::Sub, V::Int(a), V::Int(b)) => a.checked_sub(*b).map(V::Int).ok_or_else(overflow),
        (BinOp::Mul, V::Int(a), V::Int(b)) => a.checked_mul(*b).map(V::Int).ok_or_else(overflow),
        _ => {
            let (a, b) = numeric_pair(op, &left, &right)?;
            Ok(V::Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
            }))
        }
    }
}

fn numeric_pair(op: BinOp, left: &Value, right: &Value) -> Result<(f64, f64), RuntimeError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RuntimeError::Type(format!(
            "unsupported operand types for {:?}: '{}' and '{}'",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn exactly_one(name: &str, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(RuntimeError::Type(format!(
            "{}() takes exactly one argument ({} given)",
            name,
            args.len()
        )));
    }
    Ok(args.remove(0))
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, RuntimeError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| RuntimeError::Value("cannot compare NaN".into())),
            _ => Err(RuntimeError::Type(format!(
                "'<' not supported between '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

/// Evaluate one of the pure builtins.
fn builtin(name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match name {
        "int" => match exactly_one(name, args)? {
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(f) if f.is_finite() && f.abs() < i64::MAX as f64 => {
                Ok(Value::Int(f.trunc() as i64))
            }
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| RuntimeError::Value(format!("invalid literal for int(): '{}'", s))),
            other => Err(RuntimeError::Type(format!(
                "int() argument must be a number or string, not '{}'",
                other.type_name()
            ))),
        },
        "float" => match exactly_one(name, args)? {
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| RuntimeError::Value(format!("could not convert string to float: '{}'", s))),
            other => other.as_f64().map(Value::Float).ok_or_else(|| {
                RuntimeError::Type(format!(
                    "float() argument must be a number or string, not '{}'",
                    other.type_name()
                ))
            }),
        },
        "str" => Ok(Value::Str(exactly_one(name, args)?.to_string())),
        "bool" => Ok(Value::Bool(exactly_one(name, args)?.truthy())),
        "list" | "tuple" => {
            let items = match exactly_one(name, args)? {
                Value::List(items) | Value::Tuple(items) => items,
                Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                other => {
                    return Err(RuntimeError::Type(format!(
                        "'{}' object is not iterable",
                        other.type_name()
                    )))
                }
            };
            Ok(if name == "list" {
                Value::List(items)
            } else {
                Value::Tuple(items)
            })
        }
        "len" => match exactly_one(name, args)? {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) | Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
            other => Err(RuntimeError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        },
        "min" | "max" => {
            let candidates = if args.len() == 1 {
                let single = args.into_iter().next().unwrap_or(Value::None);
                let type_name = single.type_name();
                single.into_items().ok_or_else(|| {
                    RuntimeError::Type(format!("'{}' object is not iterable", type_name))
                })?
            } else {
                args
            };
            let mut best: Option<Value> = None;
            for candidate in candidates {
                best = Some(match best {
                    None => candidate,
                    Some(current) => {
                        let ordering = compare(&candidate, &current)?;
                        let better = if name == "min" {
                            ordering == std::cmp::Ordering::Less
                        } else {
                            ordering == std::cmp::Ordering::Greater
                        };
                        if better {
                            candidate
                        } else {
                            current
                        }
                    }
                });
            }
            best.ok_or_else(|| RuntimeError::Value(format!("{}() arg is an empty sequence", name)))
        }
        "abs" => match exactly_one(name, args)? {
            Value::Int(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::Value("integer overflow".into())),
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(RuntimeError::Type(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
        "round" => {
            let mut args = args.into_iter();
            let value = args
                .next()
                .ok_or_else(|| missing("round", "number"))?;
            let number = value
                .as_f64()
                .ok_or_else(|| type_error("round", "number", "a number", &value))?;
            match args.next() {
                None | Some(Value::None) => {
                    let rounded = number.round_ties_even();
                    if !rounded.is_finite() || rounded.abs() >= i64::MAX as f64 {
                        return Err(RuntimeError::Value("cannot round to integer".into()));
                    }
                    Ok(Value::Int(rounded as i64))
                }
                Some(Value::Int(digits)) => {
                    let factor = 10f64.powi(digits.clamp(-15, 15) as i32);
                    Ok(Value::Float((number * factor).round_ties_even() / factor))
                }
                Some(other) => Err(type_error("round", "ndigits", "int", &other)),
            }
        }
        other => Err(RuntimeError::Name(other.to_string())),
    }
}
