//! Global functions available to all templates.
//!
//! Functions share the namespace with global variables.  Custom
//! functions are registered with
//! [`Environment::add_function`](crate::Environment::add_function).

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::eval::namespace::Namespace;
use crate::eval::State;
use crate::value::{Object, ObjectRepr, Value, ValueMap};

/// A type erased function exposed as a callable value.
pub struct BoxedFunction {
    name: String,
    f: Arc<dyn Fn(&State, &[Value]) -> Result<Value, Error> + Send + Sync>,
}

impl BoxedFunction {
    pub(crate) fn new<F>(name: String, f: F) -> BoxedFunction
    where
        F: Fn(&State, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        BoxedFunction {
            name,
            f: Arc::new(f),
        }
    }

    pub(crate) fn to_value(self) -> Value {
        Value::from_object(self)
    }
}

impl fmt::Debug for BoxedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

impl Object for BoxedFunction {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        (self.f)(state, args)
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn split_kwargs(args: &[Value]) -> (&[Value], Option<&ValueMap>) {
    match args.last() {
        Some(last) if last.is_kwargs() => (&args[..args.len() - 1], last.as_map()),
        _ => (args, None),
    }
}

/// Returns a range of numbers.
///
/// `range(stop)`, `range(start, stop)` and `range(start, stop, step)`
/// work like their Python counterparts.  The range is an object that
/// produces its numbers on demand.
pub fn range(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (args, _) = split_kwargs(args);
    let int_arg = |idx: usize| -> Result<i64, Error> {
        args[idx].as_i64().ok_or_else(|| {
            Error::new(ErrorKind::InvalidArguments, "range arguments must be integers")
        })
    };
    let (start, stop, step) = match args.len() {
        1 => (0, int_arg(0)?, 1),
        2 => (int_arg(0)?, int_arg(1)?, 1),
        3 => (int_arg(0)?, int_arg(1)?, int_arg(2)?),
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidArguments,
                "range takes between one and three arguments",
            ))
        }
    };
    if step == 0 {
        return Err(Error::new(
            ErrorKind::InvalidArguments,
            "range step must not be zero",
        ));
    }
    let len = if step > 0 {
        (stop - start).max(0) as u64 / step as u64
            + ((stop - start).max(0) as u64 % step as u64 != 0) as u64
    } else {
        (start - stop).max(0) as u64 / (-step) as u64
            + ((start - stop).max(0) as u64 % (-step) as u64 != 0) as u64
    };
    if len > 100_000 {
        return Err(Error::new(
            ErrorKind::InvalidArguments,
            "range has too many elements",
        ));
    }
    Ok(Value::from_object(RangeObject { start, step, len }))
}

#[derive(Debug)]
struct RangeObject {
    start: i64,
    step: i64,
    len: u64,
}

impl Object for RangeObject {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Seq
    }

    fn get_index(&self, idx: usize) -> Option<Value> {
        if (idx as u64) < self.len {
            Some(Value::from(self.start + self.step * idx as i64))
        } else {
            None
        }
    }

    fn enumerate(&self) -> crate::value::Enumerator {
        crate::value::Enumerator::Seq(self.len as usize)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Creates a map from keyword arguments.
///
/// `dict(a=1, b=2)` is handy when a literal would be awkward.
pub fn dict(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (positional, kwargs) = split_kwargs(args);
    let mut rv = ValueMap::new();
    match positional {
        [] => {}
        [map] if map.kind() == crate::value::ValueKind::Map => {
            for key in map.try_iter()? {
                let value = map.get_item_opt(&key).unwrap_or(Value::UNDEFINED);
                rv.insert(key, value);
            }
        }
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidArguments,
                "dict accepts at most one positional map argument",
            ))
        }
    }
    if let Some(kwargs) = kwargs {
        for (key, value) in kwargs.iter() {
            rv.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::from_map(rv))
}

/// Creates a namespace object.
///
/// Attribute assignments on a namespace propagate across scopes,
/// which makes it the way to carry state out of a loop:
///
/// ```jinja
/// {% set ns = namespace(found=false) %}
/// {% for item in items %}
///   {% if item.check %}{% set ns.found = true %}{% endif %}
/// {% endfor %}
/// {{ ns.found }}
/// ```
pub fn namespace(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (positional, kwargs) = split_kwargs(args);
    if !positional.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidArguments,
            "namespace takes only keyword arguments",
        ));
    }
    let values = kwargs.cloned().unwrap_or_default();
    Ok(Value::from_object(Namespace::with_values(values)))
}

/// Returns a cycler that cycles through the given values.
pub fn cycler(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (positional, _) = split_kwargs(args);
    if positional.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidArguments,
            "cycler requires at least one value",
        ));
    }
    Ok(Value::from_object(Cycler {
        values: positional.to_vec(),
        idx: AtomicUsize::new(0),
    }))
}

#[derive(Debug)]
struct Cycler {
    values: Vec<Value>,
    idx: AtomicUsize,
}

impl Object for Cycler {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        if name == "current" {
            let idx = self.idx.load(Ordering::Relaxed);
            return Some(self.values[idx % self.values.len()].clone());
        }
        None
    }

    fn call_method(&self, _state: &State, name: &str, _args: &[Value]) -> Result<Value, Error> {
        match name {
            "next" => {
                let idx = self.idx.fetch_add(1, Ordering::Relaxed);
                Ok(self.values[idx % self.values.len()].clone())
            }
            "reset" => {
                self.idx.store(0, Ordering::Relaxed);
                Ok(Value::UNDEFINED)
            }
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("cycler has no method named {name}"),
            )),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Returns a joiner: a callable that returns the separator on every
/// call but the first.
pub fn joiner(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let (positional, _) = split_kwargs(args);
    let sep = positional
        .first()
        .map(|x| x.to_string())
        .unwrap_or_else(|| ", ".to_string());
    Ok(Value::from_object(Joiner {
        sep,
        used: AtomicUsize::new(0),
    }))
}

#[derive(Debug)]
struct Joiner {
    sep: String,
    used: AtomicUsize,
}

impl Object for Joiner {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, _state: &State, _args: &[Value]) -> Result<Value, Error> {
        if self.used.fetch_add(1, Ordering::Relaxed) == 0 {
            Ok(Value::from(""))
        } else {
            Ok(Value::from(self.sep.clone()))
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Prints the current context for debugging.
pub fn debug(state: &State, _args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(format!("{state:#?}")))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    #[test]
    fn test_range() {
        let env = crate::Environment::new();
        assert_eq!(
            env.render_str("{{ range(4)|join(',') }}", ()).unwrap(),
            "0,1,2,3"
        );
        assert_eq!(
            env.render_str("{{ range(1, 4)|join(',') }}", ()).unwrap(),
            "1,2,3"
        );
        assert_eq!(
            env.render_str("{{ range(9, 0, -3)|join(',') }}", ()).unwrap(),
            "9,6,3"
        );
    }

    #[test]
    fn test_dict_and_namespace() {
        let env = crate::Environment::new();
        assert_eq!(
            env.render_str("{{ dict(a=1)['a'] }}", ()).unwrap(),
            "1"
        );
        assert_eq!(
            env.render_str(
                "{% set ns = namespace(count=0) %}{% for x in range(3) %}{% set ns.count = ns.count + 1 %}{% endfor %}{{ ns.count }}",
                ()
            )
            .unwrap(),
            "3"
        );
    }

    #[test]
    fn test_cycler_and_joiner() {
        let env = crate::Environment::new();
        assert_eq!(
            env.render_str(
                "{% set c = cycler('a', 'b') %}{{ c.next() }}{{ c.next() }}{{ c.next() }}",
                ()
            )
            .unwrap(),
            "aba"
        );
        assert_eq!(
            env.render_str(
                "{% set pipe = joiner('|') %}{{ pipe() }}x{{ pipe() }}y",
                ()
            )
            .unwrap(),
            "x|y"
        );
    }
}
