use crate::error::{Error, ErrorKind};
use crate::utils::HtmlEscape;
use crate::value::{StringKind, UndefinedKind, Value, ValueRepr};

pub enum CoerceResult<'a> {
    I64(i64, i64),
    F64(f64, f64),
    Str(&'a str, &'a str),
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    Some(match value.0 {
        ValueRepr::Bool(x) => x as i64 as f64,
        ValueRepr::I64(x) => x as f64,
        ValueRepr::F64(x) => x,
        _ => return None,
    })
}

pub(crate) fn coerce<'x>(a: &'x Value, b: &'x Value) -> Option<CoerceResult<'x>> {
    match (&a.0, &b.0) {
        // equal mappings are trivial
        (ValueRepr::I64(a), ValueRepr::I64(b)) => Some(CoerceResult::I64(*a, *b)),
        (ValueRepr::String(a, _), ValueRepr::String(b, _)) => Some(CoerceResult::Str(a, b)),
        (ValueRepr::F64(a), ValueRepr::F64(b)) => Some(CoerceResult::F64(*a, *b)),

        // are floats involved?
        (ValueRepr::F64(a), _) => Some(CoerceResult::F64(*a, as_f64(b)?)),
        (_, ValueRepr::F64(b)) => Some(CoerceResult::F64(as_f64(a)?, *b)),

        // everything else goes up to i64 (bools and ints)
        _ => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(CoerceResult::I64(a, b)),
            _ => None,
        },
    }
}

fn impossible_op(op: &str, lhs: &Value, rhs: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!(
            "tried to use {} operator on unsupported types {} and {}",
            op,
            lhs.kind(),
            rhs.kind()
        ),
    )
}

/// How an arithmetic operator treats undefined operands.
enum UndefinedArith {
    /// `a + undefined == a` (addition, subtraction)
    Identity,
    /// `a * undefined == undefined` (multiplication, division, ...)
    Absorb,
}

/// Applies the undefined propagation rules for arithmetic.
///
/// Strict undefineds always fail; lenient kinds either drop out of the
/// operation or absorb it, depending on the operator family.
fn propagate_undefined(a: &Value, b: &Value, mode: UndefinedArith) -> Option<Result<Value, Error>> {
    for val in [a, b] {
        if let Some(kind) = val.undefined_kind() {
            return Some(if kind == UndefinedKind::Strict {
                Err(val.undefined_error())
            } else {
                match mode {
                    UndefinedArith::Identity => {
                        let other = if val.is_undefined() && std::ptr::eq(val, a) {
                            b
                        } else {
                            a
                        };
                        Ok(other.clone())
                    }
                    UndefinedArith::Absorb => Ok(Value::UNDEFINED),
                }
            });
        }
    }
    None
}

pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let Some(rv) = propagate_undefined(lhs, rhs, UndefinedArith::Identity) {
        return rv;
    }
    match (&lhs.0, &rhs.0) {
        (ValueRepr::String(a, _), ValueRepr::String(b, _)) => {
            let mut rv = String::with_capacity(a.len() + b.len());
            rv.push_str(a);
            rv.push_str(b);
            Ok(Value::from(rv))
        }
        (ValueRepr::Seq(a), ValueRepr::Seq(b)) => {
            Ok(Value::from(a.iter().chain(b.iter()).cloned().collect::<Vec<_>>()))
        }
        _ => match coerce(lhs, rhs) {
            Some(CoerceResult::I64(a, b)) => match a.checked_add(b) {
                Some(rv) => Ok(Value::from(rv)),
                None => Ok(Value::from(a as f64 + b as f64)),
            },
            Some(CoerceResult::F64(a, b)) => Ok(Value::from(a + b)),
            _ => Err(impossible_op("+", lhs, rhs)),
        },
    }
}

pub fn sub(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let Some(rv) = propagate_undefined(lhs, rhs, UndefinedArith::Identity) {
        return rv;
    }
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => match a.checked_sub(b) {
            Some(rv) => Ok(Value::from(rv)),
            None => Ok(Value::from(a as f64 - b as f64)),
        },
        Some(CoerceResult::F64(a, b)) => Ok(Value::from(a - b)),
        _ => Err(impossible_op("-", lhs, rhs)),
    }
}

pub fn mul(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let Some(rv) = propagate_undefined(lhs, rhs, UndefinedArith::Absorb) {
        return rv;
    }
    // sequence and string repetition
    match (&lhs.0, &rhs.0) {
        (ValueRepr::String(s, _), ValueRepr::I64(n)) | (ValueRepr::I64(n), ValueRepr::String(s, _)) => {
            let n = (*n).max(0) as usize;
            return Ok(Value::from(s.repeat(n)));
        }
        (ValueRepr::Seq(s), ValueRepr::I64(n)) | (ValueRepr::I64(n), ValueRepr::Seq(s)) => {
            let n = (*n).max(0) as usize;
            let mut rv = Vec::with_capacity(s.len() * n);
            for _ in 0..n {
                rv.extend(s.iter().cloned());
            }
            return Ok(Value::from(rv));
        }
        _ => {}
    }
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => match a.checked_mul(b) {
            Some(rv) => Ok(Value::from(rv)),
            None => Ok(Value::from(a as f64 * b as f64)),
        },
        Some(CoerceResult::F64(a, b)) => Ok(Value::from(a * b)),
        _ => Err(impossible_op("*", lhs, rhs)),
    }
}

pub fn div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let Some(rv) = propagate_undefined(lhs, rhs, UndefinedArith::Absorb) {
        return rv;
    }
    match (as_f64(lhs), as_f64(rhs)) {
        (Some(a), Some(b)) => {
            if b == 0.0 {
                Err(Error::new(ErrorKind::InvalidOperation, "division by zero"))
            } else {
                Ok(Value::from(a / b))
            }
        }
        _ => Err(impossible_op("/", lhs, rhs)),
    }
}

pub fn int_div(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let Some(rv) = propagate_undefined(lhs, rhs, UndefinedArith::Absorb) {
        return rv;
    }
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => {
            if b == 0 {
                Err(Error::new(ErrorKind::InvalidOperation, "division by zero"))
            } else {
                Ok(Value::from(a.div_euclid(b)))
            }
        }
        Some(CoerceResult::F64(a, b)) => {
            if b == 0.0 {
                Err(Error::new(ErrorKind::InvalidOperation, "division by zero"))
            } else {
                Ok(Value::from(a.div_euclid(b)))
            }
        }
        _ => Err(impossible_op("//", lhs, rhs)),
    }
}

pub fn rem(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let Some(rv) = propagate_undefined(lhs, rhs, UndefinedArith::Absorb) {
        return rv;
    }
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => {
            if b == 0 {
                Err(Error::new(ErrorKind::InvalidOperation, "division by zero"))
            } else {
                Ok(Value::from(a.rem_euclid(b)))
            }
        }
        Some(CoerceResult::F64(a, b)) => {
            if b == 0.0 {
                Err(Error::new(ErrorKind::InvalidOperation, "division by zero"))
            } else {
                Ok(Value::from(a.rem_euclid(b)))
            }
        }
        _ => Err(impossible_op("%", lhs, rhs)),
    }
}

pub fn pow(lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if let Some(rv) = propagate_undefined(lhs, rhs, UndefinedArith::Absorb) {
        return rv;
    }
    match coerce(lhs, rhs) {
        Some(CoerceResult::I64(a, b)) => {
            if let Ok(exp) = u32::try_from(b) {
                match a.checked_pow(exp) {
                    Some(rv) => return Ok(Value::from(rv)),
                    None => return Ok(Value::from((a as f64).powf(b as f64))),
                }
            }
            Ok(Value::from((a as f64).powf(b as f64)))
        }
        Some(CoerceResult::F64(a, b)) => Ok(Value::from(a.powf(b))),
        _ => Err(impossible_op("**", lhs, rhs)),
    }
}

pub fn neg(val: &Value) -> Result<Value, Error> {
    if val.is_undefined() {
        return if val.undefined_kind() == Some(UndefinedKind::Strict) {
            Err(val.undefined_error())
        } else {
            Ok(Value::UNDEFINED)
        };
    }
    match val.0 {
        ValueRepr::I64(v) => Ok(Value::from(-v)),
        ValueRepr::F64(v) => Ok(Value::from(-v)),
        ValueRepr::Bool(v) => Ok(Value::from(-(v as i64))),
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("tried to negate a value of type {}", val.kind()),
        )),
    }
}

/// Implements the `~` operator.
///
/// Both operands are stringified.  If either operand is a safe string
/// the plain operand is escaped and the result is safe again, which
/// preserves the composition laws of safe strings.
pub fn string_concat(lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_safe() || rhs.is_safe() {
        let mut rv = String::new();
        for val in [lhs, rhs] {
            if val.is_safe() {
                rv.push_str(val.as_str().unwrap_or_default());
            } else {
                rv.push_str(&HtmlEscape(&val.to_string()).to_string());
            }
        }
        Value::from_safe_string(rv)
    } else {
        Value::from(format!("{lhs}{rhs}"))
    }
}

/// Implements the `in` operator.
pub fn contains(container: &Value, value: &Value) -> Result<Value, Error> {
    match container.0 {
        ValueRepr::String(ref s, _) => {
            let rv = if let Some(needle) = value.as_str() {
                s.contains(needle)
            } else {
                s.contains(&value.to_string())
            };
            Ok(Value::from(rv))
        }
        ValueRepr::Seq(ref s) => Ok(Value::from(s.contains(value))),
        ValueRepr::Map(ref m, _) => Ok(Value::from(m.contains_key(value))),
        ValueRepr::Object(_) => {
            if container.get_item_opt(value).is_some() {
                return Ok(Value::from(true));
            }
            let iter = container.try_iter()?;
            Ok(Value::from(iter.into_iter().any(|x| &x == value)))
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot perform a containment check on this value",
        )),
    }
}

/// Evaluates a single comparison operator.
///
/// Ordering comparisons involving undefined values are false rather
/// than relying on the internal total order; strict undefineds fail.
pub(crate) fn compare_op(
    op: crate::ast::CompareOp,
    lhs: &Value,
    rhs: &Value,
) -> Result<bool, Error> {
    use crate::ast::CompareOp;
    for val in [lhs, rhs] {
        if val.undefined_kind() == Some(UndefinedKind::Strict) {
            return Err(val.undefined_error());
        }
    }
    if lhs.is_undefined() || rhs.is_undefined() {
        return Ok(match op {
            CompareOp::Eq => lhs.is_undefined() && rhs.is_undefined(),
            CompareOp::Ne => !(lhs.is_undefined() && rhs.is_undefined()),
            CompareOp::NotIn => true,
            _ => false,
        });
    }
    Ok(match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Lt => lhs < rhs,
        CompareOp::Lte => lhs <= rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Gte => lhs >= rhs,
        CompareOp::In => contains(rhs, lhs)?.is_true(),
        CompareOp::NotIn => !contains(rhs, lhs)?.is_true(),
    })
}

fn range_step_backwards(len: i64, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let start = match start {
        Some(s) if s < 0 => (s + len).max(-1),
        Some(s) => s.min(len - 1),
        None => len - 1,
    };
    let stop = match stop {
        Some(s) if s < 0 => (s + len).max(-1),
        Some(s) => s.min(len),
        None => -1,
    };
    let mut rv = Vec::new();
    let mut idx = start;
    while idx > stop {
        if idx >= 0 && idx < len {
            rv.push(idx as usize);
        }
        idx += step;
    }
    rv
}

fn range_step_forwards(len: i64, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let start = match start {
        Some(s) if s < 0 => (s + len).max(0),
        Some(s) => s,
        None => 0,
    };
    let stop = match stop {
        Some(s) if s < 0 => (s + len).max(0),
        Some(s) => s.min(len),
        None => len,
    };
    let mut rv = Vec::new();
    let mut idx = start;
    while idx < stop {
        if idx >= 0 && idx < len {
            rv.push(idx as usize);
        }
        idx += step;
    }
    rv
}

/// Implements the slicing operation with Python semantics.
///
/// The safe flag of strings is not carried over since a slice can
/// split an entity apart.
pub fn slice(value: Value, start: Value, stop: Value, step: Value) -> Result<Value, Error> {
    let start = if start.is_none() || start.is_undefined() {
        None
    } else {
        Some(start.as_i64().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "slice indexes must be integers")
        })?)
    };
    let stop = if stop.is_none() || stop.is_undefined() {
        None
    } else {
        Some(stop.as_i64().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "slice indexes must be integers")
        })?)
    };
    let step = if step.is_none() || step.is_undefined() {
        1
    } else {
        step.as_i64().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "slice step must be an integer")
        })?
    };
    if step == 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot slice by step size of 0",
        ));
    }

    let indexes = |len: usize| {
        if step < 0 {
            range_step_backwards(len as i64, start, stop, step)
        } else {
            range_step_forwards(len as i64, start, stop, step)
        }
    };

    match value.0 {
        ValueRepr::String(ref s, _) => {
            let chars = s.chars().collect::<Vec<_>>();
            Ok(Value::from(
                indexes(chars.len())
                    .into_iter()
                    .map(|i| chars[i])
                    .collect::<String>(),
            ))
        }
        ValueRepr::Seq(ref s) => Ok(Value::from(
            indexes(s.len())
                .into_iter()
                .map(|i| s[i].clone())
                .collect::<Vec<_>>(),
        )),
        ValueRepr::Undefined(..) => Ok(Value::from(Vec::<Value>::new())),
        ValueRepr::Object(_) => {
            let items = value.try_iter()?.collect::<Vec<_>>();
            Ok(Value::from(
                indexes(items.len())
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect::<Vec<_>>(),
            ))
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("value of type {} cannot be sliced", value.kind()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_arithmetic() {
        assert_eq!(add(&Value::from(1), &Value::from(2)).unwrap(), Value::from(3));
        assert_eq!(
            add(&Value::from("a"), &Value::from("b")).unwrap(),
            Value::from("ab")
        );
        assert_eq!(sub(&Value::from(5), &Value::from(2)).unwrap(), Value::from(3));
        assert_eq!(
            div(&Value::from(5), &Value::from(2)).unwrap(),
            Value::from(2.5)
        );
        assert_eq!(
            int_div(&Value::from(5), &Value::from(2)).unwrap(),
            Value::from(2)
        );
        assert_eq!(
            pow(&Value::from(2), &Value::from(10)).unwrap(),
            Value::from(1024)
        );
        assert_eq!(
            mul(&Value::from("ab"), &Value::from(3)).unwrap(),
            Value::from("ababab")
        );
    }

    #[test]
    fn test_undefined_propagation() {
        assert_eq!(
            add(&Value::from(1), &Value::UNDEFINED).unwrap(),
            Value::from(1)
        );
        assert_eq!(
            sub(&Value::UNDEFINED, &Value::from(1)).unwrap(),
            Value::from(1)
        );
        assert!(mul(&Value::from(2), &Value::UNDEFINED).unwrap().is_undefined());
        assert!(div(&Value::UNDEFINED, &Value::from(2)).unwrap().is_undefined());
    }

    #[test]
    fn test_slicing() {
        let seq = Value::from((1..=5).map(Value::from).collect::<Vec<_>>());
        let sliced = slice(seq.clone(), Value::from(1), Value::from(4), Value::from(())).unwrap();
        assert_eq!(
            sliced,
            Value::from(vec![Value::from(2), Value::from(3), Value::from(4)])
        );
        let rev = slice(seq, Value::from(()), Value::from(()), Value::from(-1)).unwrap();
        assert_eq!(
            rev,
            Value::from((1..=5).rev().map(Value::from).collect::<Vec<_>>())
        );
        let s = slice(Value::from("hello"), Value::from(()), Value::from(2), Value::from(())).unwrap();
        assert_eq!(s, Value::from("he"));
    }

    #[test]
    fn test_string_concat_safe_laws() {
        let a = Value::from_safe_string("<b>".into());
        let b = Value::from("<i>");
        let rv = string_concat(&a, &b);
        assert!(rv.is_safe());
        assert_eq!(rv.as_str().unwrap(), "<b>&lt;i&gt;");

        let both = string_concat(&a, &Value::from_safe_string("<em>".into()));
        assert!(both.is_safe());
        assert_eq!(both.as_str().unwrap(), "<b><em>");
    }
}
