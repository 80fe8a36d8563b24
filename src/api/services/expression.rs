//! Small expression language used by conditions, loops, assertions, scripts and
//! `{{...}}` templates.
//!
//! Values are JSON. Supported: literals, paths (`a.b[0]`), unary `! -`, arithmetic,
//! comparisons, `&& ||`, array/object literals and a fixed set of functions.

use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("syntax error at {pos}: {message}")]
    Syntax { pos: usize, message: String },
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid regex: {0}")]
    Regex(String),
}

/// Name lookup for evaluation.
pub trait Scope: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl Scope for Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Scope for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    Assign,
    /// `;` or a newline outside brackets.
    Sep,
}

const TWO_CHAR_OPS: [&str; 6] = ["==", "!=", "<=", ">=", "&&", "||"];
const ONE_CHAR_OPS: [&str; 17] = [
    "(", ")", "[", "]", "{", "}", ",", ":", ".", "!", "-", "+", "*", "/", "%", "<", ">",
];

pub(crate) fn tokenize(src: &str) -> Result<Vec<(usize, Tok)>, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut depth: usize = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c == '\n' {
            if depth == 0 {
                out.push((start, Tok::Sep));
            }
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == ';' {
            out.push((start, Tok::Sep));
            i += 1;
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c.is_ascii_digit() {
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let n = text.parse::<f64>().map_err(|e| ExpressionError::Syntax {
                pos: start,
                message: e.to_string(),
            })?;
            out.push((start, Tok::Num(n)));
        } else if c == '"' || c == '\'' {
            i += 1;
            let mut s = String::new();
            loop {
                match chars.get(i) {
                    None => {
                        return Err(ExpressionError::Syntax {
                            pos: start,
                            message: "unterminated string".to_string(),
                        });
                    }
                    Some(&q) if q == c => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = match chars.get(i + 1) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some('r') => '\r',
                            Some(&other) => other,
                            None => '\\',
                        };
                        s.push(escaped);
                        i += 2;
                    }
                    Some(&other) => {
                        s.push(other);
                        i += 1;
                    }
                }
            }
            out.push((start, Tok::Str(s)));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            out.push((start, Tok::Ident(chars[start..i].iter().collect())));
        } else {
            let pair: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                out.push((start, Tok::Op(*op)));
                i += 2;
            } else if c == '=' {
                out.push((start, Tok::Assign));
                i += 1;
            } else if let Some(op) = ONE_CHAR_OPS.iter().copied().find(|op| op.starts_with(c)) {
                match op {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    _ => {}
                }
                out.push((start, Tok::Op(op)));
                i += 1;
            } else {
                return Err(ExpressionError::Syntax {
                    pos: start,
                    message: format!("unexpected character '{}'", c),
                });
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

fn binary_op(op: &str) -> Option<(u8, BinaryOp)> {
    Some(match op {
        "||" => (1, BinaryOp::Or),
        "&&" => (2, BinaryOp::And),
        "==" => (3, BinaryOp::Eq),
        "!=" => (3, BinaryOp::Ne),
        "<" => (4, BinaryOp::Lt),
        "<=" => (4, BinaryOp::Le),
        ">" => (4, BinaryOp::Gt),
        ">=" => (4, BinaryOp::Ge),
        "+" => (5, BinaryOp::Add),
        "-" => (5, BinaryOp::Sub),
        "*" => (6, BinaryOp::Mul),
        "/" => (6, BinaryOp::Div),
        "%" => (6, BinaryOp::Rem),
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

pub(crate) struct Parser {
    toks: Vec<(usize, Tok)>,
    pos: usize,
    src_len: usize,
}

impl Parser {
    pub(crate) fn new(src: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            toks: tokenize(src)?,
            pos: 0,
            src_len: src.chars().count(),
        })
    }

    pub(crate) fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(_, t)| t)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset).map(|(_, t)| t)
    }

    pub(crate) fn advance(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|(_, t)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    /// True at end of input or a statement separator.
    pub(crate) fn at_statement_end(&self) -> bool {
        matches!(self.peek(), None | Some(Tok::Sep))
    }

    pub(crate) fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Tok::Sep)) {
            self.pos += 1;
        }
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> ExpressionError {
        let pos = self
            .toks
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.src_len);
        ExpressionError::Syntax {
            pos,
            message: message.into(),
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_op(&mut self, op: &str) -> Result<(), ExpressionError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) => *op,
                _ => break,
            };
            let Some((prec, bop)) = binary_op(op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(bop, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_op("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_op(".") {
                match self.advance() {
                    Some(Tok::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                    _ => return Err(self.error("expected field name after '.'")),
                }
            } else if self.eat_op("[") {
                let index = self.parse_expr()?;
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let Some(tok) = self.advance() else {
            return Err(self.error("unexpected end of expression"));
        };
        match tok {
            Tok::Num(n) => Ok(Expr::Literal(number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Ident(name) => {
                let literal = match name.as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    "null" => Some(Value::Null),
                    _ => None,
                };
                if let Some(v) = literal {
                    Ok(Expr::Literal(v))
                } else if self.eat_op("(") {
                    let args = self.parse_list(")")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Tok::Op("(") => {
                let inner = self.parse_expr()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Tok::Op("[") => Ok(Expr::Array(self.parse_list("]")?)),
            Tok::Op("{") => {
                let mut fields = Vec::new();
                if self.eat_op("}") {
                    return Ok(Expr::Object(fields));
                }
                loop {
                    let key = match self.advance() {
                        Some(Tok::Ident(k)) | Some(Tok::Str(k)) => k,
                        _ => return Err(self.error("expected object key")),
                    };
                    self.expect_op(":")?;
                    fields.push((key, self.parse_expr()?));
                    if self.eat_op("}") {
                        return Ok(Expr::Object(fields));
                    }
                    self.expect_op(",")?;
                }
            }
            _ => {
                self.pos -= 1;
                Err(self.error("unexpected token"))
            }
        }
    }

    fn parse_list(&mut self, close: &str) -> Result<Vec<Expr>, ExpressionError> {
        let mut items = Vec::new();
        if self.eat_op(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.eat_op(close) {
                return Ok(items);
            }
            self.expect_op(",")?;
        }
    }
}

/// Parse a complete expression.
pub fn parse(src: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser::new(src)?;
    parser.skip_separators();
    let expr = parser.parse_expr()?;
    parser.skip_separators();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

/// Parse and evaluate `src` against `scope`.
pub fn evaluate(src: &str, scope: &dyn Scope) -> Result<Value, ExpressionError> {
    parse(src)?.eval(scope)
}

/// Truthiness: non-empty strings, non-zero numbers, `true`, non-empty collections.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Integral floats become JSON integers.
pub fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Text form used by string concatenation and templates.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_number(value: &Value, op: &str) -> Result<f64, ExpressionError> {
    value.as_f64().ok_or_else(|| {
        ExpressionError::Type(format!("'{}' needs numbers, got {}", op, type_name(value)))
    })
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

impl Expr {
    pub fn eval(&self, scope: &dyn Scope) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => scope
                .lookup(name)
                .ok_or_else(|| ExpressionError::UnknownVariable(name.clone())),
            Expr::Member(target, field) => match target.eval(scope)? {
                Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                other => Err(ExpressionError::Type(format!(
                    "cannot read field '{}' of {}",
                    field,
                    type_name(&other)
                ))),
            },
            Expr::Index(target, index) => {
                let target = target.eval(scope)?;
                let index = index.eval(scope)?;
                match (&target, &index) {
                    (Value::Array(items), Value::Number(n)) => {
                        let i = n.as_f64().unwrap_or(-1.0);
                        if i < 0.0 || i.fract() != 0.0 {
                            return Ok(Value::Null);
                        }
                        Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
                    }
                    (Value::Object(map), Value::String(key)) => {
                        Ok(map.get(key).cloned().unwrap_or(Value::Null))
                    }
                    _ => Err(ExpressionError::Type(format!(
                        "cannot index {} with {}",
                        type_name(&target),
                        type_name(&index)
                    ))),
                }
            }
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, &values)
            }
            Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!truthy(&inner.eval(scope)?))),
            Expr::Unary(UnaryOp::Neg, inner) => {
                let v = inner.eval(scope)?;
                Ok(number(-as_number(&v, "-")?))
            }
            Expr::Binary(BinaryOp::And, l, r) => {
                Ok(Value::Bool(truthy(&l.eval(scope)?) && truthy(&r.eval(scope)?)))
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                Ok(Value::Bool(truthy(&l.eval(scope)?) || truthy(&r.eval(scope)?)))
            }
            Expr::Binary(op, l, r) => binary(*op, l.eval(scope)?, r.eval(scope)?),
            Expr::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|i| i.eval(scope))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.eval(scope)?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = match (&l, &r) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let a = as_number(&l, "comparison")?;
                    let b = as_number(&r, "comparison")?;
                    a.partial_cmp(&b)
                        .ok_or_else(|| ExpressionError::Type("NaN in comparison".to_string()))?
                }
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinaryOp::Add => match (&l, &r) {
            (Value::Number(_), Value::Number(_)) => {
                Ok(number(as_number(&l, "+")? + as_number(&r, "+")?))
            }
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(stringify(&l) + &stringify(&r)))
            }
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => Err(ExpressionError::Type(format!(
                "cannot add {} and {}",
                type_name(&l),
                type_name(&r)
            ))),
        },
        BinaryOp::Sub => Ok(number(as_number(&l, "-")? - as_number(&r, "-")?)),
        BinaryOp::Mul => Ok(number(as_number(&l, "*")? * as_number(&r, "*")?)),
        BinaryOp::Div | BinaryOp::Rem => {
            let a = as_number(&l, "/")?;
            let b = as_number(&r, "/")?;
            if b == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            Ok(number(if op == BinaryOp::Div { a / b } else { a % b }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators are handled in eval"),
    }
}

fn arity(name: &str, args: &[Value], n: usize) -> Result<(), ExpressionError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(ExpressionError::Type(format!(
            "{}() takes {} argument(s), got {}",
            name,
            n,
            args.len()
        )))
    }
}

fn string_arg<'a>(name: &str, v: &'a Value) -> Result<&'a str, ExpressionError> {
    v.as_str()
        .ok_or_else(|| ExpressionError::Type(format!("{}() needs a string", name)))
}

fn call(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match name {
        "len" => {
            arity(name, args, 1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => {
                    return Err(ExpressionError::Type(format!(
                        "len() of {}",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::from(n as u64))
        }
        "contains" => {
            arity(name, args, 2)?;
            Ok(Value::Bool(match (&args[0], &args[1]) {
                (Value::String(s), needle) => s.contains(&stringify(needle)),
                (Value::Array(items), needle) => items.iter().any(|i| loose_eq(i, needle)),
                (Value::Object(map), Value::String(key)) => map.contains_key(key),
                (other, _) => {
                    return Err(ExpressionError::Type(format!(
                        "contains() on {}",
                        type_name(other)
                    )));
                }
            }))
        }
        "starts_with" | "ends_with" => {
            arity(name, args, 2)?;
            let s = string_arg(name, &args[0])?;
            let p = string_arg(name, &args[1])?;
            Ok(Value::Bool(if name == "starts_with" {
                s.starts_with(p)
            } else {
                s.ends_with(p)
            }))
        }
        "lower" => {
            arity(name, args, 1)?;
            Ok(Value::String(string_arg(name, &args[0])?.to_lowercase()))
        }
        "upper" => {
            arity(name, args, 1)?;
            Ok(Value::String(string_arg(name, &args[0])?.to_uppercase()))
        }
        "int" | "number" => {
            arity(name, args, 1)?;
            let f = match &args[0] {
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
                    ExpressionError::Type(format!("{}() cannot parse '{}'", name, s))
                })?,
                other => {
                    return Err(ExpressionError::Type(format!(
                        "{}() of {}",
                        name,
                        type_name(other)
                    )));
                }
            };
            Ok(number(if name == "int" { f.trunc() } else { f }))
        }
        "string" => {
            arity(name, args, 1)?;
            Ok(Value::String(stringify(&args[0])))
        }
        "json" => {
            arity(name, args, 1)?;
            let s = string_arg(name, &args[0])?;
            serde_json::from_str(s).map_err(|e| ExpressionError::Type(format!("json(): {}", e)))
        }
        "keys" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Object(map) => Ok(Value::Array(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                other => Err(ExpressionError::Type(format!("keys() of {}", type_name(other)))),
            }
        }
        "matches" => {
            arity(name, args, 2)?;
            let s = string_arg(name, &args[0])?;
            let pattern = string_arg(name, &args[1])?;
            let re = Regex::new(pattern).map_err(|e| ExpressionError::Regex(e.to_string()))?;
            Ok(Value::Bool(re.is_match(s)))
        }
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}
