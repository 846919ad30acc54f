//! The built-in test collection.
//!
//! Tests are applied with the `is` operator and return a boolean.
//! Custom tests are registered with
//! [`Environment::add_test`](crate::Environment::add_test).

use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::value::{ops, Value, ValueKind};

/// A type erased test function.
#[derive(Clone)]
pub struct BoxedTest(Arc<dyn Fn(&State, &[Value]) -> Result<Value, Error> + Send + Sync>);

impl BoxedTest {
    pub(crate) fn new<F>(f: F) -> BoxedTest
    where
        F: Fn(&State, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        BoxedTest(Arc::new(f))
    }

    pub(crate) fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        (self.0)(state, args)
    }
}

static UNDEFINED_VALUE: Value = Value::UNDEFINED;

fn subject(args: &[Value]) -> &Value {
    args.first().unwrap_or(&UNDEFINED_VALUE)
}

fn argument<'a>(args: &'a [Value], idx: usize) -> Result<&'a Value, Error> {
    args.get(idx).ok_or_else(|| {
        Error::new(ErrorKind::InvalidArguments, "test is missing an argument")
    })
}

/// Checks if a value is defined.
pub fn is_defined(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(!subject(args).is_undefined()))
}

/// Checks if a value is undefined.
pub fn is_undefined(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).is_undefined()))
}

/// Checks if a value is none.
pub fn is_none(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).is_none()))
}

/// Checks if a value is a boolean.
pub fn is_boolean(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).kind() == ValueKind::Bool))
}

/// Checks if a value is true.
pub fn is_true(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let subject = subject(args);
    Ok(Value::from(
        subject.kind() == ValueKind::Bool && subject.is_true(),
    ))
}

/// Checks if a value is false.
pub fn is_false(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let subject = subject(args);
    Ok(Value::from(
        subject.kind() == ValueKind::Bool && !subject.is_true(),
    ))
}

/// Checks if a value is a string.
pub fn is_string(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).kind() == ValueKind::String))
}

/// Checks if a value is a number.
pub fn is_number(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).is_number()))
}

/// Checks if a value is an integer.
pub fn is_integer(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).is_integer()))
}

/// Checks if a value is a float.
pub fn is_float(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let subject = subject(args);
    Ok(Value::from(subject.is_number() && !subject.is_integer()))
}

/// Checks if a value is a sequence.
pub fn is_sequence(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).kind() == ValueKind::Seq))
}

/// Checks if a value is a mapping.
pub fn is_mapping(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).kind() == ValueKind::Map))
}

/// Checks if a value can be iterated.
pub fn is_iterable(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).try_iter().is_ok()))
}

/// Checks if a value is callable.
pub fn is_callable(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).is_callable()))
}

/// Checks if a value is a string marked safe.
pub fn is_safe(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).is_safe()))
}

/// Checks if two values are the same object.
///
/// Without object identity in the data model this compares strictly:
/// same kind and equal, with none and undefined only matching
/// themselves.
pub fn is_sameas(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let a = subject(args);
    let b = argument(args, 1)?;
    Ok(Value::from(a.kind() == b.kind() && a == b))
}

/// Checks if a value is divisible by another number.
pub fn is_divisibleby(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let num = subject(args).as_i64();
    let divisor = argument(args, 1)?.as_i64();
    Ok(Value::from(match (num, divisor) {
        (Some(num), Some(divisor)) if divisor != 0 => num % divisor == 0,
        _ => false,
    }))
}

/// Checks if a number is odd.
pub fn is_odd(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(
        subject(args).as_i64().map_or(false, |x| x % 2 != 0),
    ))
}

/// Checks if a number is even.
pub fn is_even(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(
        subject(args).as_i64().map_or(false, |x| x % 2 == 0),
    ))
}

/// Checks if a string is all lowercase.
pub fn is_lower(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).as_str().map_or(false, |s| {
        s.chars().all(|c| !c.is_uppercase())
    })))
}

/// Checks if a string is all uppercase.
pub fn is_upper(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args).as_str().map_or(false, |s| {
        s.chars().all(|c| !c.is_lowercase())
    })))
}

/// Checks if a string starts with another string.
pub fn is_startingwith(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let s = subject(args).to_string();
    let prefix = argument(args, 1)?.to_string();
    Ok(Value::from(s.starts_with(&prefix)))
}

/// Checks if a string ends with another string.
pub fn is_endingwith(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let s = subject(args).to_string();
    let suffix = argument(args, 1)?.to_string();
    Ok(Value::from(s.ends_with(&suffix)))
}

/// `==` as a test.
pub fn is_eq(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args) == argument(args, 1)?))
}

/// `!=` as a test.
pub fn is_ne(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args) != argument(args, 1)?))
}

/// `<` as a test.
pub fn is_lt(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args) < argument(args, 1)?))
}

/// `<=` as a test.
pub fn is_le(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args) <= argument(args, 1)?))
}

/// `>` as a test.
pub fn is_gt(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args) > argument(args, 1)?))
}

/// `>=` as a test.
pub fn is_ge(_state: &State, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(subject(args) >= argument(args, 1)?))
}

/// Containment as a test.
pub fn is_in(_state: &State, args: &[Value]) -> Result<Value, Error> {
    ops::contains(argument(args, 1)?, subject(args))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    #[test]
    fn test_basic_tests() {
        let env = crate::Environment::new();
        assert_eq!(env.render_str("{{ 3 is odd }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ 4 is even }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ 9 is divisibleby 3 }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ x is defined }}", ()).unwrap(), "false");
        assert_eq!(env.render_str("{{ x is undefined }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ none is none }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ 'a' is string }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ 1 is number }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ 1.5 is float }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ [1] is sequence }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ 2 is eq 2 }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ 1 is in([1, 2]) }}", ()).unwrap(), "true");
        assert_eq!(env.render_str("{{ 'x' is not in(['y']) }}", ()).unwrap(), "true");
    }
}
