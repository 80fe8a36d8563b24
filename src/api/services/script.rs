//! Script nodes: a statement list over the expression language.
//!
//! ```text
//! let total = len(items) * 2
//! log("total", total)
//! return { total: total, first: items[0] }
//! ```
//!
//! Scripts see a copy of the caller's scope and cannot write to it. The result is the
//! returned object, or every binding made by the script when there is no `return`.

use super::expression::{Expr, ExpressionError, Parser, Scope, Tok, stringify};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("script parse error: {0}")]
    Parse(ExpressionError),
    #[error("script failed at statement {statement}: {source}")]
    Eval {
        statement: usize,
        #[source]
        source: ExpressionError,
    },
    #[error("script must return an object")]
    ReturnNotObject,
}

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Let(String, Expr),
    Return(Option<Expr>),
    Eval(Expr),
}

/// Parsed script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    statements: Vec<Statement>,
}

/// Result of running a script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOutput {
    pub values: Map<String, Value>,
    pub logs: Vec<String>,
}

struct Layered<'a> {
    locals: &'a Map<String, Value>,
    outer: &'a dyn Scope,
}

impl Scope for Layered<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.locals
            .get(name)
            .cloned()
            .or_else(|| self.outer.lookup(name))
    }
}

impl Script {
    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        let mut p = Parser::new(source).map_err(ScriptError::Parse)?;
        let mut statements = Vec::new();
        loop {
            p.skip_separators();
            if p.at_end() {
                break;
            }
            let statement = match (p.peek(), p.peek_at(1)) {
                (Some(Tok::Ident(kw)), Some(Tok::Ident(_))) if kw == "let" => {
                    p.advance();
                    let Some(Tok::Ident(name)) = p.advance() else {
                        return Err(ScriptError::Parse(p.error("expected name after let")));
                    };
                    if !matches!(p.advance(), Some(Tok::Assign)) {
                        return Err(ScriptError::Parse(p.error("expected '='")));
                    }
                    Statement::Let(name, p.parse_expr().map_err(ScriptError::Parse)?)
                }
                (Some(Tok::Ident(name)), Some(Tok::Assign)) => {
                    let name = name.clone();
                    p.advance();
                    p.advance();
                    Statement::Let(name, p.parse_expr().map_err(ScriptError::Parse)?)
                }
                (Some(Tok::Ident(kw)), _) if kw == "return" => {
                    p.advance();
                    if p.at_statement_end() {
                        Statement::Return(None)
                    } else {
                        Statement::Return(Some(p.parse_expr().map_err(ScriptError::Parse)?))
                    }
                }
                _ => Statement::Eval(p.parse_expr().map_err(ScriptError::Parse)?),
            };
            if !p.at_statement_end() {
                return Err(ScriptError::Parse(p.error("expected end of statement")));
            }
            statements.push(statement);
        }
        Ok(Self { statements })
    }

    pub fn run(&self, scope: &dyn Scope) -> Result<ScriptOutput, ScriptError> {
        let mut locals = Map::new();
        let mut logs = Vec::new();
        let eval = |locals: &Map<String, Value>, expr: &Expr, statement: usize| {
            expr.eval(&Layered {
                locals,
                outer: scope,
            })
            .map_err(|source| ScriptError::Eval { statement, source })
        };

        for (i, statement) in self.statements.iter().enumerate() {
            match statement {
                Statement::Let(name, expr) => {
                    let value = eval(&locals, expr, i)?;
                    locals.insert(name.clone(), value);
                }
                Statement::Return(None) => break,
                Statement::Return(Some(expr)) => {
                    return match eval(&locals, expr, i)? {
                        Value::Object(values) => Ok(ScriptOutput { values, logs }),
                        _ => Err(ScriptError::ReturnNotObject),
                    };
                }
                Statement::Eval(Expr::Call(name, args)) if name == "log" => {
                    let parts = args
                        .iter()
                        .map(|a| eval(&locals, a, i).map(|v| stringify(&v)))
                        .collect::<Result<Vec<_>, _>>()?;
                    let line = parts.join(" ");
                    info!(target: "script", "{}", line);
                    logs.push(line);
                }
                Statement::Eval(expr) => {
                    eval(&locals, expr, i)?;
                }
            }
        }
        Ok(ScriptOutput {
            values: locals,
            logs,
        })
    }
}

/// Parse and run in one step.
pub fn run(source: &str, scope: &dyn Scope) -> Result<ScriptOutput, ScriptError> {
    Script::parse(source)?.run(scope)
}
