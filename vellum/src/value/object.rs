use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::value::Value;

/// A trait for dynamic host objects exposed to templates.
///
/// Objects participate in template evaluation through attribute and
/// item lookup hooks, enumeration and calls.  The engine itself uses
/// this trait for loop state, macros, namespaces and imported modules.
pub trait Object: fmt::Debug + Send + Sync + 'static {
    /// How the object presents itself to the engine.
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Map
    }

    /// Looks up an attribute by name.
    fn get_attr(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }

    /// Looks up an item by key.
    ///
    /// Sequence-like objects resolve integer keys (including negative
    /// indexes), everything else falls back to attribute lookup.
    fn get_item(&self, key: &Value) -> Option<Value> {
        match self.repr() {
            ObjectRepr::Seq | ObjectRepr::Iterable => {
                let idx = key.as_i64()?;
                let len = self.len()? as i64;
                let idx = if idx < 0 { idx + len } else { idx };
                if idx < 0 || idx >= len {
                    None
                } else {
                    self.get_index(idx as usize)
                }
            }
            _ => self.get_attr(key.as_str()?),
        }
    }

    /// Returns an element by index for sequence-like objects.
    fn get_index(&self, idx: usize) -> Option<Value> {
        let _ = idx;
        None
    }

    /// Describes how the object can be enumerated.
    ///
    /// Map-like objects enumerate their keys, sequence-like objects
    /// their elements.
    fn enumerate(&self) -> Enumerator {
        Enumerator::NonEnumerable
    }

    /// The number of elements, if known.
    fn len(&self) -> Option<usize> {
        match self.enumerate() {
            Enumerator::NonEnumerable => None,
            Enumerator::Empty => Some(0),
            Enumerator::Seq(len) => Some(len),
            Enumerator::Values(ref values) => Some(values.len()),
        }
    }

    /// Truthiness of the object.
    fn is_true(&self) -> bool {
        self.len().map_or(true, |len| len != 0)
    }

    /// Whether the object can be invoked with `()`.
    fn is_callable(&self) -> bool {
        false
    }

    /// Invokes the object as a function.
    fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        let _ = (state, args);
        Err(Error::new(
            ErrorKind::InvalidOperation,
            "object is not callable",
        ))
    }

    /// Invokes a method on the object.
    ///
    /// The default resolves the method as a callable attribute.
    fn call_method(&self, state: &State, name: &str, args: &[Value]) -> Result<Value, Error> {
        if let Some(attr) = self.get_attr(name) {
            return attr.call(state, args);
        }
        Err(Error::new(
            ErrorKind::UnknownMethod,
            format!("object has no method named {name}"),
        ))
    }

    /// Formats the object for output.
    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn enumerate_values(enumerator: Enumerator) -> Vec<Value> {
            match enumerator {
                Enumerator::NonEnumerable | Enumerator::Empty => Vec::new(),
                Enumerator::Seq(_) => Vec::new(),
                Enumerator::Values(values) => values,
            }
        }
        match self.repr() {
            ObjectRepr::Seq | ObjectRepr::Iterable => {
                f.write_str("[")?;
                let items = match self.enumerate() {
                    Enumerator::Seq(len) => (0..len)
                        .map(|idx| self.get_index(idx).unwrap_or(Value::UNDEFINED))
                        .collect(),
                    other => enumerate_values(other),
                };
                for (idx, item) in items.into_iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                f.write_str("]")
            }
            ObjectRepr::Map => {
                f.write_str("{")?;
                let keys = match self.enumerate() {
                    Enumerator::Seq(len) => (0..len)
                        .map(|idx| self.get_index(idx).unwrap_or(Value::UNDEFINED))
                        .collect(),
                    other => enumerate_values(other),
                };
                for (idx, key) in keys.into_iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    match self.get_item(&key) {
                        Some(value) => write!(f, "{key:?}: {value:?}")?,
                        None => write!(f, "{key:?}: undefined")?,
                    }
                }
                f.write_str("}")
            }
            ObjectRepr::Plain => write!(f, "{self:?}"),
        }
    }

    /// Used by the engine to downcast objects it created itself.
    fn as_any(&self) -> &dyn Any;
}

/// Defines the natural representation of an object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ObjectRepr {
    /// Not enumerable, renders via `Debug`.
    Plain,
    /// Enumerates elements, indexable.
    Seq,
    /// Enumerates keys, indexable by key.
    Map,
    /// Enumerates elements, not necessarily indexable.
    Iterable,
}

/// Describes how an object is enumerated.
pub enum Enumerator {
    /// The object cannot be enumerated.
    NonEnumerable,
    /// The object is empty.
    Empty,
    /// Enumerate by calling `get_index` with `0..len`.
    Seq(usize),
    /// Enumerate a pre-computed list of values (keys for maps).
    Values(Vec<Value>),
}

/// Iterator over the enumeration of an object.
pub(crate) struct ObjectValueIter<'a> {
    object: &'a dyn Object,
    state: ObjectValueIterState,
}

enum ObjectValueIterState {
    Seq(usize, usize),
    Values(std::vec::IntoIter<Value>),
    Done,
}

impl<'a> ObjectValueIter<'a> {
    pub fn new(object: &'a dyn Object) -> ObjectValueIter<'a> {
        let state = match object.enumerate() {
            Enumerator::NonEnumerable | Enumerator::Empty => ObjectValueIterState::Done,
            Enumerator::Seq(len) => ObjectValueIterState::Seq(0, len),
            Enumerator::Values(values) => ObjectValueIterState::Values(values.into_iter()),
        };
        ObjectValueIter { object, state }
    }
}

impl<'a> Iterator for ObjectValueIter<'a> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self.state {
            ObjectValueIterState::Seq(ref mut idx, len) => {
                if *idx >= len {
                    None
                } else {
                    let rv = self.object.get_index(*idx);
                    *idx += 1;
                    Some(rv.unwrap_or(Value::UNDEFINED))
                }
            }
            ObjectValueIterState::Values(ref mut iter) => iter.next(),
            ObjectValueIterState::Done => None,
        }
    }
}

/// Reference counted dynamic object handle.
pub type DynObject = Arc<dyn Object>;

pub(crate) fn object_eq(a: &dyn Object, b: &dyn Object) -> bool {
    if a.repr() != b.repr() {
        return false;
    }
    match a.repr() {
        ObjectRepr::Seq | ObjectRepr::Iterable => {
            ObjectValueIter::new(a).eq(ObjectValueIter::new(b))
        }
        ObjectRepr::Map => {
            if a.len() != b.len() {
                return false;
            }
            ObjectValueIter::new(a).all(|key| a.get_item(&key) == b.get_item(&key))
        }
        ObjectRepr::Plain => std::ptr::eq(
            a as *const dyn Object as *const (),
            b as *const dyn Object as *const (),
        ),
    }
}
