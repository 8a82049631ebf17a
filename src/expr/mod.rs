//! Restricted expression language for conditions, scripts, and routing rules.
//!
//! Expressions are parsed into an explicit AST and interpreted directly
//! against a JSON scope, never delegated to a host evaluator. Supported:
//! literals, identifiers, property/index access, arithmetic, comparison,
//! boolean logic, and a small allow-listed function set including the
//! `node(id)` accessor over recorded node outputs.
//!
//! ```
//! use graphflow::expr::evaluate;
//! use serde_json::json;
//!
//! let scope = json!({"price": 85000});
//! let result = evaluate("price <= 90000", &scope).unwrap();
//! assert_eq!(result, json!(true));
//! ```

mod eval;
mod lexer;
mod parser;

pub use eval::{display_string, evaluate_ast, loose_eq, truthy};
pub use parser::parse;

use serde_json::Value;

use crate::error::NodeError;

/// Binary operators, in ascending precedence groups.
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
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Expression AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    /// `object.field`
    Field(Box<Expr>, String),
    /// `object[index]`
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Allow-listed function call, e.g. `len(items)` or `node("fetch")`.
    Call(String, Vec<Expr>),
}

/// Parse and evaluate an expression against a JSON object scope.
pub fn evaluate(source: &str, scope: &Value) -> Result<Value, NodeError> {
    let ast = parse(source)?;
    evaluate_ast(&ast, scope)
}

/// Evaluate an expression and coerce the result to a boolean via [`truthy`].
pub fn evaluate_bool(source: &str, scope: &Value) -> Result<bool, NodeError> {
    Ok(truthy(&evaluate(source, scope)?))
}
