//! Client-side evaluation of scalar expressions.
//!
//! The partial evaluator folds row-independent sub-trees through
//! [`evaluate`]; the materializer applies the same operator functions to
//! cell values when a projector computes something the select did not.

use chrono::{Datelike, Months, NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{RelqError, RelqResult};
use crate::ir::{BinaryOp, Method, ScalarExpr, UnaryOp};
use crate::types::Type;
use crate::value::{Record, TICKS_PER_DAY, TICKS_PER_MILLISECOND, TICKS_PER_SECOND, Value};

const TICKS_PER_MINUTE: i64 = 60 * TICKS_PER_SECOND;
const TICKS_PER_HOUR: i64 = 60 * TICKS_PER_MINUTE;

/// Evaluate an expression that does not depend on any row.
pub fn evaluate(expr: &ScalarExpr) -> RelqResult<Value> {
    match expr {
        ScalarExpr::Constant { value, .. }
        | ScalarExpr::Variable { value, .. }
        | ScalarExpr::HostParameter { value, .. } => Ok(value.clone()),
        ScalarExpr::Binary { op, left, right } => binary(*op, evaluate(left)?, evaluate(right)?),
        ScalarExpr::Unary { op, operand } => unary(*op, evaluate(operand)?),
        ScalarExpr::Member { target, name } => member(evaluate(target)?, name),
        ScalarExpr::Call {
            method,
            target,
            args,
        } => {
            let args = args.iter().map(evaluate).collect::<RelqResult<Vec<_>>>()?;
            call(method, evaluate(target)?, args)
        }
        ScalarExpr::Conditional {
            test,
            then,
            otherwise,
        } => {
            if evaluate(test)?.as_bool().unwrap_or(false) {
                evaluate(then)
            } else {
                evaluate(otherwise)
            }
        }
        ScalarExpr::New { ty, members } => {
            let mut record = Record::new(ty.name.clone());
            for (name, e) in members {
                record.fields.push((name.clone(), evaluate(e)?));
            }
            Ok(Value::Record(record))
        }
        ScalarExpr::Convert { operand, ty } => convert(evaluate(operand)?, ty),
        other => Err(RelqError::evaluation(format!(
            "{} cannot be evaluated outside the database",
            node_name(other)
        ))),
    }
}

fn node_name(expr: &ScalarExpr) -> &'static str {
    match expr {
        ScalarExpr::Param(_) => "a lambda parameter",
        ScalarExpr::Query(_) => "a nested query",
        ScalarExpr::Column(_) => "a column reference",
        ScalarExpr::Aggregate(_) => "an aggregate",
        ScalarExpr::Subquery(_) => "a subquery",
        ScalarExpr::Function { .. } => "a dialect function",
        ScalarExpr::Projection(_) => "a projection",
        ScalarExpr::Group { .. } => "a group",
        _ => "the expression",
    }
}

enum Numeric {
    Int(i64),
    Float(f64),
    Decimal(Decimal),
}

fn numeric_pair(l: &Value, r: &Value) -> Option<(Numeric, Numeric)> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some((Numeric::Int(*a), Numeric::Int(*b))),
        (Value::Decimal(_), _) | (_, Value::Decimal(_)) => Some((
            Numeric::Decimal(l.as_decimal()?),
            Numeric::Decimal(r.as_decimal()?),
        )),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Some((Numeric::Float(l.as_f64()?), Numeric::Float(r.as_f64()?)))
        }
        _ => None,
    }
}

fn overflow(op: BinaryOp) -> RelqError {
    RelqError::evaluation(format!("arithmetic overflow in '{}'", op))
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> RelqResult<Value> {
    let (a, b) = numeric_pair(&l, &r).ok_or_else(|| {
        RelqError::evaluation(format!("'{}' is not defined for {:?} and {:?}", op, l, r))
    })?;
    Ok(match (a, b) {
        (Numeric::Int(a), Numeric::Int(b)) => Value::Int(
            match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b == 0 => {
                    return Err(RelqError::evaluation("division by zero"));
                }
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem if b == 0 => {
                    return Err(RelqError::evaluation("division by zero"));
                }
                BinaryOp::Rem => a.checked_rem(b),
                BinaryOp::BitAnd => Some(a & b),
                BinaryOp::BitOr => Some(a | b),
                _ => None,
            }
            .ok_or_else(|| overflow(op))?,
        ),
        (Numeric::Float(a), Numeric::Float(b)) => Value::Float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            _ => return Err(overflow(op)),
        }),
        (Numeric::Decimal(a), Numeric::Decimal(b)) => Value::Decimal(
            match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
                _ => None,
            }
            .ok_or_else(|| overflow(op))?,
        ),
        _ => return Err(overflow(op)),
    })
}

fn add_ticks(dt: NaiveDateTime, ticks: i64) -> RelqResult<NaiveDateTime> {
    let delta = chrono::Duration::nanoseconds(ticks.saturating_mul(100));
    dt.checked_add_signed(delta)
        .ok_or_else(|| RelqError::evaluation("timestamp out of range"))
}

/// Apply a binary operator with the compiled SQL's semantics: `Eq`/`Ne`
/// are null-safe, arithmetic propagates NULL.
pub fn binary(op: BinaryOp, l: Value, r: Value) -> RelqResult<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(l.null_safe_eq(&r))),
        BinaryOp::Ne => return Ok(Value::Bool(!l.null_safe_eq(&r))),
        BinaryOp::Coalesce => return Ok(if l.is_null() { r } else { l }),
        BinaryOp::And => {
            return Ok(Value::Bool(
                l.as_bool().unwrap_or(false) && r.as_bool().unwrap_or(false),
            ));
        }
        BinaryOp::Or => {
            return Ok(Value::Bool(
                l.as_bool().unwrap_or(false) || r.as_bool().unwrap_or(false),
            ));
        }
        _ => {}
    }
    if l.is_null() || r.is_null() {
        return Ok(if op.is_comparison() {
            Value::Bool(false)
        } else {
            Value::Null
        });
    }
    if op.is_comparison() {
        let ordering = l.compare(&r).ok_or_else(|| {
            RelqError::evaluation(format!("{:?} and {:?} are not comparable", l, r))
        })?;
        return Ok(Value::Bool(match op {
            BinaryOp::Lt => ordering.is_lt(),
            BinaryOp::Le => ordering.is_le(),
            BinaryOp::Gt => ordering.is_gt(),
            _ => ordering.is_ge(),
        }));
    }
    match (op, l, r) {
        (BinaryOp::Concat | BinaryOp::Add, Value::Text(a), b) => Ok(Value::Text(a + &text_of(&b))),
        (BinaryOp::Concat | BinaryOp::Add, a, Value::Text(b)) => Ok(Value::Text(text_of(&a) + &b)),
        (BinaryOp::Concat, a, b) => Ok(Value::Text(text_of(&a) + &text_of(&b))),
        (BinaryOp::Add, Value::DateTime(dt), Value::Duration(t)) => Ok(Value::DateTime(add_ticks(dt, t)?)),
        (BinaryOp::Sub, Value::DateTime(dt), Value::Duration(t)) => {
            let t = t.checked_neg().ok_or_else(|| overflow(op))?;
            Ok(Value::DateTime(add_ticks(dt, t)?))
        }
        (BinaryOp::Sub, Value::DateTime(a), Value::DateTime(b)) => {
            let nanos = (a - b)
                .num_nanoseconds()
                .ok_or_else(|| RelqError::evaluation("duration out of range"))?;
            Ok(Value::Duration(nanos / 100))
        }
        (BinaryOp::Add, Value::Duration(a), Value::Duration(b)) => {
            a.checked_add(b).map(Value::Duration).ok_or_else(|| overflow(op))
        }
        (BinaryOp::Sub, Value::Duration(a), Value::Duration(b)) => {
            a.checked_sub(b).map(Value::Duration).ok_or_else(|| overflow(op))
        }
        (BinaryOp::BitAnd, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a & b)),
        (BinaryOp::BitOr, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a | b)),
        (op, l, r) => arithmetic(op, l, r),
    }
}

fn negate_overflow() -> RelqError {
    RelqError::evaluation("arithmetic overflow in negation")
}

pub fn unary(op: UnaryOp, v: Value) -> RelqResult<Value> {
    match (op, v) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.as_bool().unwrap_or(false))),
        (UnaryOp::Negate, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(negate_overflow),
        (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Negate, Value::Decimal(d)) => Ok(Value::Decimal(-d)),
        (UnaryOp::Negate, Value::Duration(t)) => {
            t.checked_neg().map(Value::Duration).ok_or_else(negate_overflow)
        }
        (UnaryOp::Negate, other) => Err(RelqError::evaluation(format!(
            "cannot negate {:?}",
            other
        ))),
    }
}

/// Read a member of a value.
pub fn member(target: Value, name: &str) -> RelqResult<Value> {
    let unsupported = |target: &Value| {
        RelqError::unsupported_expression(format!("{}.{}", target.natural_type(), name))
    };
    match (&target, name) {
        (Value::Null, "HasValue") => Ok(Value::Bool(false)),
        (Value::Null, "Value") => Err(RelqError::evaluation("nullable object must have a value")),
        (Value::Null, _) => Ok(Value::Null),
        (_, "HasValue") => Ok(Value::Bool(true)),
        (_, "Value") => Ok(target),
        (Value::Record(r), _) => r.get(name).cloned().ok_or_else(|| unsupported(&target)),
        (Value::Group { key, .. }, "Key") => Ok((**key).clone()),
        (Value::Text(s), "Length") => Ok(Value::Int(s.chars().count() as i64)),
        (Value::DateTime(dt), _) => Ok(match name {
            "Year" => Value::Int(dt.year() as i64),
            "Month" => Value::Int(dt.month() as i64),
            "Day" => Value::Int(dt.day() as i64),
            "Hour" => Value::Int(dt.hour() as i64),
            "Minute" => Value::Int(dt.minute() as i64),
            "Second" => Value::Int(dt.second() as i64),
            "Millisecond" => Value::Int((dt.nanosecond() / 1_000_000) as i64),
            "DayOfWeek" => Value::Int(dt.weekday().num_days_from_sunday() as i64),
            "DayOfYear" => Value::Int(dt.ordinal() as i64),
            "Date" => Value::DateTime(dt.date().and_time(chrono::NaiveTime::default())),
            "TimeOfDay" => Value::Duration(
                dt.num_seconds_from_midnight() as i64 * TICKS_PER_SECOND
                    + dt.nanosecond() as i64 / 100,
            ),
            _ => return Err(unsupported(&target)),
        }),
        (Value::Duration(t), _) => {
            let t = *t;
            Ok(match name {
                "Ticks" => Value::Int(t),
                "Days" => Value::Int(t / TICKS_PER_DAY),
                "Hours" => Value::Int((t / TICKS_PER_HOUR) % 24),
                "Minutes" => Value::Int((t / TICKS_PER_MINUTE) % 60),
                "Seconds" => Value::Int((t / TICKS_PER_SECOND) % 60),
                "Milliseconds" => Value::Int((t / TICKS_PER_MILLISECOND) % 1000),
                "TotalDays" => Value::Float(t as f64 / TICKS_PER_DAY as f64),
                "TotalHours" => Value::Float(t as f64 / TICKS_PER_HOUR as f64),
                "TotalMinutes" => Value::Float(t as f64 / TICKS_PER_MINUTE as f64),
                "TotalSeconds" => Value::Float(t as f64 / TICKS_PER_SECOND as f64),
                "TotalMilliseconds" => Value::Float(t as f64 / TICKS_PER_MILLISECOND as f64),
                _ => return Err(unsupported(&target)),
            })
        }
        _ => Err(unsupported(&target)),
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Text(s) => s.clone(),
        Value::Char(c) => c.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::DateTime(dt) => dt.format(crate::value::DATETIME_FORMAT).to_string(),
        Value::Duration(t) => t.to_string(),
        Value::Uuid(u) => u.to_string(),
        Value::Enum(e) => e.clone(),
        other => format!("{:?}", other),
    }
}

fn int_arg(args: &[Value], i: usize, method: &Method) -> RelqResult<i64> {
    args.get(i).and_then(Value::as_i64).ok_or_else(|| {
        RelqError::evaluation(format!("{} expects an integer argument", method.name()))
    })
}

fn text_arg(args: &[Value], i: usize, method: &Method) -> RelqResult<String> {
    match args.get(i) {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(Value::Char(c)) => Ok(c.to_string()),
        _ => Err(RelqError::evaluation(format!(
            "{} expects a text argument",
            method.name()
        ))),
    }
}

fn add_months(dt: NaiveDateTime, months: i64) -> RelqResult<NaiveDateTime> {
    let magnitude = Months::new(months.unsigned_abs().min(u32::MAX as u64) as u32);
    if months >= 0 {
        dt.checked_add_months(magnitude)
    } else {
        dt.checked_sub_months(magnitude)
    }
    .ok_or_else(|| RelqError::evaluation("timestamp out of range"))
}

/// Invoke a translatable method on a value.
pub fn call(method: &Method, target: Value, args: Vec<Value>) -> RelqResult<Value> {
    if target.is_null() && *method != Method::IsNullOrEmpty {
        return Ok(Value::Null);
    }
    let s = || text_of(&target);
    Ok(match method {
        Method::Contains => Value::Bool(s().contains(text_arg(&args, 0, method)?.as_str())),
        Method::StartsWith => Value::Bool(s().starts_with(text_arg(&args, 0, method)?.as_str())),
        Method::EndsWith => Value::Bool(s().ends_with(text_arg(&args, 0, method)?.as_str())),
        Method::IsNullOrEmpty => Value::Bool(match &target {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }),
        Method::Equals => Value::Bool(target.null_safe_eq(args.first().unwrap_or(&Value::Null))),
        Method::ToUpper => Value::Text(s().to_uppercase()),
        Method::ToLower => Value::Text(s().to_lowercase()),
        Method::Trim => Value::Text(s().trim().to_string()),
        Method::TrimStart => Value::Text(s().trim_start().to_string()),
        Method::TrimEnd => Value::Text(s().trim_end().to_string()),
        Method::Substring => {
            let start = int_arg(&args, 0, method)?.max(0) as usize;
            let text = s();
            let chars = text.chars().skip(start);
            Value::Text(match args.get(1) {
                Some(_) => chars.take(int_arg(&args, 1, method)?.max(0) as usize).collect(),
                None => chars.collect(),
            })
        }
        Method::Replace => Value::Text(
            s().replace(text_arg(&args, 0, method)?.as_str(), &text_arg(&args, 1, method)?),
        ),
        Method::IndexOf => {
            let haystack = s();
            let needle = text_arg(&args, 0, method)?;
            Value::Int(match haystack.find(needle.as_str()) {
                Some(byte) => haystack[..byte].chars().count() as i64,
                None => -1,
            })
        }
        Method::AddYears | Method::AddMonths => {
            let Value::DateTime(dt) = target else {
                return Err(RelqError::evaluation(format!("{} expects a timestamp", method.name())));
            };
            let n = int_arg(&args, 0, method)?;
            let months = if *method == Method::AddYears {
                n.checked_mul(12)
                    .ok_or_else(|| RelqError::evaluation("timestamp out of range"))?
            } else {
                n
            };
            Value::DateTime(add_months(dt, months)?)
        }
        Method::AddDays
        | Method::AddHours
        | Method::AddMinutes
        | Method::AddSeconds
        | Method::AddMilliseconds => {
            let Value::DateTime(dt) = target else {
                return Err(RelqError::evaluation(format!("{} expects a timestamp", method.name())));
            };
            let unit = match method {
                Method::AddDays => TICKS_PER_DAY,
                Method::AddHours => TICKS_PER_HOUR,
                Method::AddMinutes => TICKS_PER_MINUTE,
                Method::AddSeconds => TICKS_PER_SECOND,
                _ => TICKS_PER_MILLISECOND,
            };
            let amount = args
                .first()
                .and_then(Value::as_f64)
                .ok_or_else(|| RelqError::evaluation(format!("{} expects a number", method.name())))?;
            Value::DateTime(add_ticks(dt, (amount * unit as f64) as i64)?)
        }
        Method::Abs => match target {
            Value::Int(n) => Value::Int(
                n.checked_abs()
                    .ok_or_else(|| RelqError::evaluation("arithmetic overflow in Abs"))?,
            ),
            Value::Float(f) => Value::Float(f.abs()),
            Value::Decimal(d) => Value::Decimal(d.abs()),
            other => return Err(RelqError::evaluation(format!("Abs of {:?}", other))),
        },
        Method::Round => {
            let digits = match args.first() {
                Some(_) => int_arg(&args, 0, method)?,
                None => 0,
            };
            match target {
                Value::Int(n) => Value::Int(n),
                Value::Float(f) => {
                    let scale = 10f64.powi(digits as i32);
                    Value::Float((f * scale).round() / scale)
                }
                Value::Decimal(d) => Value::Decimal(d.round_dp(digits.max(0) as u32)),
                other => return Err(RelqError::evaluation(format!("Round of {:?}", other))),
            }
        }
        Method::ToText => Value::Text(s()),
        Method::Other(name) => return Err(RelqError::unsupported_expression(name.clone())),
    })
}

/// Convert a value to a static type.
pub fn convert(value: Value, ty: &Type) -> RelqResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let target = ty.non_null();
    Ok(match (value, target) {
        (Value::Float(f), t) if t.is_integer() => Value::Int(f.trunc() as i64),
        (Value::Decimal(d), t) if t.is_integer() => Value::Int(
            d.trunc()
                .to_i64()
                .ok_or_else(|| RelqError::conversion(format!("{} does not fit {}", d, t)))?,
        ),
        (Value::Bool(b), t) if t.is_integer() => Value::Int(i64::from(b)),
        (Value::Int(n), Type::F32 | Type::F64) => Value::Float(n as f64),
        (Value::Decimal(d), Type::F32 | Type::F64) => Value::Float(d.to_f64().unwrap_or(f64::NAN)),
        (v @ (Value::Int(_) | Value::Float(_)), Type::Decimal) => Value::Decimal(
            v.as_decimal()
                .ok_or_else(|| RelqError::conversion(format!("{:?} is not a decimal", v)))?,
        ),
        (Value::Int(n), Type::Bool) => Value::Bool(n != 0),
        (Value::Int(n), Type::Enum(e)) => e
            .variants
            .get(n as usize)
            .map(|v| Value::Enum(v.clone()))
            .ok_or_else(|| RelqError::conversion(format!("{} is not an ordinal of {}", n, e.name)))?,
        (Value::Char(c), Type::Text) => Value::Text(c.to_string()),
        (v, Type::Text) if !matches!(v, Value::Text(_)) => Value::Text(text_of(&v)),
        (v, _) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_datetime;

    #[test]
    fn test_null_semantics() {
        assert_eq!(binary(BinaryOp::Eq, Value::Null, Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinaryOp::Eq, Value::Null, Value::Int(1)).unwrap(), Value::Bool(false));
        assert_eq!(binary(BinaryOp::Add, Value::Null, Value::Int(1)).unwrap(), Value::Null);
        assert_eq!(binary(BinaryOp::Lt, Value::Null, Value::Int(1)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_arithmetic_promotion() {
        assert_eq!(binary(BinaryOp::Add, Value::Int(2), Value::Float(0.5)).unwrap(), Value::Float(2.5));
        assert!(binary(BinaryOp::Div, Value::Int(1), Value::Int(0)).is_err());
        assert_eq!(
            binary(BinaryOp::Add, Value::Text("a".into()), Value::Int(1)).unwrap(),
            Value::Text("a1".into())
        );
    }

    #[test]
    fn test_datetime_members_and_methods() {
        let dt = parse_datetime("2024-02-28 06:30:00.000").unwrap();
        assert_eq!(member(Value::DateTime(dt), "Month").unwrap(), Value::Int(2));
        let next = call(&Method::AddDays, Value::DateTime(dt), vec![Value::Int(2)]).unwrap();
        assert_eq!(member(next, "Day").unwrap(), Value::Int(1));
        let diff = binary(
            BinaryOp::Sub,
            Value::DateTime(parse_datetime("2024-01-02").unwrap()),
            Value::DateTime(parse_datetime("2024-01-01").unwrap()),
        )
        .unwrap();
        assert_eq!(diff, Value::Duration(TICKS_PER_DAY));
    }

    #[test]
    fn test_string_methods() {
        let s = Value::Text("Hello".into());
        assert_eq!(call(&Method::IndexOf, s.clone(), vec!["l".into()]).unwrap(), Value::Int(2));
        assert_eq!(
            call(&Method::Substring, s, vec![Value::Int(1), Value::Int(3)]).unwrap(),
            Value::Text("ell".into())
        );
    }

    #[test]
    fn test_is_null_or_empty() {
        assert_eq!(call(&Method::IsNullOrEmpty, Value::Null, vec![]).unwrap(), Value::Bool(true));
        assert_eq!(call(&Method::IsNullOrEmpty, "".into(), vec![]).unwrap(), Value::Bool(true));
        assert_eq!(call(&Method::IsNullOrEmpty, "x".into(), vec![]).unwrap(), Value::Bool(false));
        assert_eq!(
            call(&Method::Substring, "Hello".into(), vec![Value::Int(3)]).unwrap(),
            Value::Text("lo".into())
        );
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = binary(BinaryOp::Add, Value::Duration(i64::MAX), Value::Duration(1)).unwrap_err();
        assert!(matches!(err, RelqError::Evaluation(_)));
        let err = binary(BinaryOp::Sub, Value::Duration(i64::MIN), Value::Duration(1)).unwrap_err();
        assert!(matches!(err, RelqError::Evaluation(_)));
        assert!(unary(UnaryOp::Negate, Value::Int(i64::MIN)).is_err());
        assert!(unary(UnaryOp::Negate, Value::Duration(i64::MIN)).is_err());
        assert!(call(&Method::Abs, Value::Int(i64::MIN), vec![]).is_err());
        assert_eq!(
            binary(BinaryOp::Sub, Value::Duration(5), Value::Duration(7)).unwrap(),
            Value::Duration(-2)
        );
    }

    #[test]
    fn test_evaluate_rejects_params() {
        let err = evaluate(&ScalarExpr::Param("t".into())).unwrap_err();
        assert!(matches!(err, RelqError::Evaluation(_)));
    }
}
