//! Tree-walking interpreter over JSON values.
//!
//! Coercion follows the loose comparison rules the rest of the engine uses:
//! a string that parses as a number compares numerically, equality falls back
//! to deep equality, and ordering on non-numbers is a string comparison.

use serde_json::Value;

use super::{BinaryOp, Expr, UnaryOp};
use crate::error::NodeError;

fn err(msg: impl Into<String>) -> NodeError {
    NodeError::ExpressionError(msg.into())
}

fn num(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numeric view of a value, if it has one. Strings are parsed.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Render a value the way string coercion and interpolation do. Number
/// literals come out of the lexer f64-backed, so integral numbers are
/// printed without the trailing `.0`.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Bracket indexes are f64-backed numbers; any non-negative integral value
/// indexes an array.
fn array_index(n: &serde_json::Number) -> Option<usize> {
    if let Some(i) = n.as_u64() {
        return usize::try_from(i).ok();
    }
    let f = n.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f < usize::MAX as f64 {
        Some(f as usize)
    } else {
        None
    }
}

/// Loose equality: numeric when both sides have a numeric view, otherwise
/// deep JSON equality (after unifying number representations).
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> Result<bool, NodeError> {
    let ordering = match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(display_string(a).cmp(&display_string(b))),
    };
    let Some(ord) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Le => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::Ge => ord.is_ge(),
        _ => unreachable!("compare called with non-ordering op"),
    })
}

/// Evaluate a parsed expression against a JSON object scope.
pub fn evaluate_ast(expr: &Expr, scope: &Value) -> Result<Value, NodeError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => Ok(scope.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Field(base, name) => {
            let base = evaluate_ast(base, scope)?;
            Ok(base.get(name).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, index) => {
            let base = evaluate_ast(base, scope)?;
            let index = evaluate_ast(index, scope)?;
            let item = match &index {
                Value::String(key) => base.get(key),
                Value::Number(n) => array_index(n).and_then(|i| base.get(i)),
                other => {
                    return Err(err(format!(
                        "index must be a string or number, got {}",
                        other
                    )))
                }
            };
            Ok(item.cloned().unwrap_or(Value::Null))
        }
        Expr::Unary(op, inner) => {
            let v = evaluate_ast(inner, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
                UnaryOp::Neg => match as_number(&v) {
                    Some(n) => Ok(num(-n)),
                    None => Err(err(format!("cannot negate {}", v))),
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            // Short circuit before touching the rhs.
            match op {
                BinaryOp::And => {
                    let l = evaluate_ast(lhs, scope)?;
                    if !truthy(&l) {
                        return Ok(Value::Bool(false));
                    }
                    let r = evaluate_ast(rhs, scope)?;
                    return Ok(Value::Bool(truthy(&r)));
                }
                BinaryOp::Or => {
                    let l = evaluate_ast(lhs, scope)?;
                    if truthy(&l) {
                        return Ok(Value::Bool(true));
                    }
                    let r = evaluate_ast(rhs, scope)?;
                    return Ok(Value::Bool(truthy(&r)));
                }
                _ => {}
            }

            let l = evaluate_ast(lhs, scope)?;
            let r = evaluate_ast(rhs, scope)?;
            match op {
                BinaryOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
                BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    Ok(Value::Bool(compare(*op, &l, &r)?))
                }
                BinaryOp::Add => {
                    // String concatenation wins when either side is a string.
                    if l.is_string() || r.is_string() {
                        return Ok(Value::String(format!(
                            "{}{}",
                            display_string(&l),
                            display_string(&r)
                        )));
                    }
                    arith(*op, &l, &r)
                }
                BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                    arith(*op, &l, &r)
                }
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            }
        }
        Expr::Call(name, args) => call(name, args, scope),
    }
}

fn arith(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, NodeError> {
    let (Some(x), Some(y)) = (as_number(l), as_number(r)) else {
        return Err(err(format!(
            "arithmetic requires numbers, got {} and {}",
            l, r
        )));
    };
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(err("division by zero"));
            }
            x / y
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(err("modulo by zero"));
            }
            x % y
        }
        _ => unreachable!("arith called with non-arithmetic op"),
    };
    Ok(num(result))
}

fn arity(name: &str, args: &[Value], want: usize) -> Result<(), NodeError> {
    if args.len() != want {
        return Err(err(format!(
            "{}() takes {} argument(s), got {}",
            name,
            want,
            args.len()
        )));
    }
    Ok(())
}

fn string_arg<'a>(name: &str, value: &'a Value) -> Result<&'a str, NodeError> {
    value
        .as_str()
        .ok_or_else(|| err(format!("{}() expects a string, got {}", name, value)))
}

fn number_arg(name: &str, value: &Value) -> Result<f64, NodeError> {
    as_number(value).ok_or_else(|| err(format!("{}() expects a number, got {}", name, value)))
}

/// The function allow list. Anything else is a hard error, never a lookup
/// into the host environment.
fn call(name: &str, args: &[Expr], scope: &Value) -> Result<Value, NodeError> {
    let args: Vec<Value> = args
        .iter()
        .map(|a| evaluate_ast(a, scope))
        .collect::<Result<_, _>>()?;

    match name {
        "node" => {
            arity(name, &args, 1)?;
            let id = string_arg(name, &args[0])?;
            Ok(scope
                .get("nodeOutputs")
                .and_then(|outputs| outputs.get(id))
                .cloned()
                .unwrap_or(Value::Null))
        }
        "len" => {
            arity(name, &args, 1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => return Err(err(format!("len() of unsupported value {}", other))),
            };
            Ok(Value::from(n))
        }
        "contains" => {
            arity(name, &args, 2)?;
            match &args[0] {
                Value::String(haystack) => {
                    let needle = display_string(&args[1]);
                    Ok(Value::Bool(haystack.contains(&needle)))
                }
                Value::Array(items) => {
                    Ok(Value::Bool(items.iter().any(|v| loose_eq(v, &args[1]))))
                }
                other => Err(err(format!(
                    "contains() expects a string or array, got {}",
                    other
                ))),
            }
        }
        "startsWith" => {
            arity(name, &args, 2)?;
            let s = string_arg(name, &args[0])?;
            Ok(Value::Bool(s.starts_with(&display_string(&args[1]))))
        }
        "endsWith" => {
            arity(name, &args, 2)?;
            let s = string_arg(name, &args[0])?;
            Ok(Value::Bool(s.ends_with(&display_string(&args[1]))))
        }
        "lower" => {
            arity(name, &args, 1)?;
            Ok(Value::String(string_arg(name, &args[0])?.to_lowercase()))
        }
        "upper" => {
            arity(name, &args, 1)?;
            Ok(Value::String(string_arg(name, &args[0])?.to_uppercase()))
        }
        "abs" => {
            arity(name, &args, 1)?;
            Ok(num(number_arg(name, &args[0])?.abs()))
        }
        "min" => {
            arity(name, &args, 2)?;
            Ok(num(number_arg(name, &args[0])?.min(number_arg(name, &args[1])?)))
        }
        "max" => {
            arity(name, &args, 2)?;
            Ok(num(number_arg(name, &args[0])?.max(number_arg(name, &args[1])?)))
        }
        "round" => {
            arity(name, &args, 1)?;
            Ok(num(number_arg(name, &args[0])?.round()))
        }
        "number" => {
            arity(name, &args, 1)?;
            match as_number(&args[0]) {
                Some(n) => Ok(num(n)),
                None => Err(err(format!("number() cannot convert {}", args[0]))),
            }
        }
        "string" => {
            arity(name, &args, 1)?;
            Ok(Value::String(display_string(&args[0])))
        }
        _ => Err(err(format!("unknown function: {}()", name))),
    }
}
