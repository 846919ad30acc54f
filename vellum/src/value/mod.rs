//! Provides the dynamic value type the engine evaluates over.
//!
//! Values are immutable and cheap to clone: larger payloads are
//! reference counted.  Template contexts are normally created by
//! serializing host data via [`serde`], either explicitly through
//! [`Value::from_serialize`] or implicitly through the render APIs
//! and the `context!` macro.
//!
//! ```
//! use vellum::value::Value;
//! let int_value = Value::from(42);
//! let none_value = Value::from(());
//! let seq: Value = (1..4).map(Value::from).collect();
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::eval::State;

mod object;
pub(crate) mod ops;
mod serialize;

pub use self::object::{DynObject, Enumerator, Object, ObjectRepr};
pub(crate) use self::object::{object_eq, ObjectValueIter};

pub(crate) type ValueMap = BTreeMap<Value, Value>;

/// Describes the kind of a value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[non_exhaustive]
pub enum ValueKind {
    /// The value is undefined.
    Undefined,
    /// The value is the none singleton.
    None,
    /// The value is a bool.
    Bool,
    /// The value is a number (integer or float).
    Number,
    /// The value is a string.
    String,
    /// The value is a sequence of other values.
    Seq,
    /// The value is a key/value mapping.
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            ValueKind::Undefined => "undefined",
            ValueKind::None => "none",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Seq => "sequence",
            ValueKind::Map => "map",
        })
    }
}

/// The type of a string value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StringKind {
    Normal,
    Safe,
}

/// The type of a map value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MapKind {
    Normal,
    Kwargs,
}

/// The kind of an undefined value.
///
/// The kind travels with the value: it decides which operations the
/// undefined tolerates, independent of the environment that created it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum UndefinedKind {
    Lenient,
    Chainable,
    Debug,
    Strict,
}

/// Records where an undefined value came from.
#[derive(Debug)]
pub(crate) struct UndefinedOrigin {
    /// Description of the container the lookup happened on, if any.
    pub owner: Option<String>,
    /// The name or index that failed to resolve.
    pub name: String,
}

impl UndefinedOrigin {
    pub fn hint(&self) -> String {
        match self.owner {
            Some(ref owner) => format!("{} has no attribute or item {:?}", owner, self.name),
            None => format!("{:?} is undefined", self.name),
        }
    }
}

#[derive(Clone)]
pub(crate) enum ValueRepr {
    Undefined(UndefinedKind, Option<Arc<UndefinedOrigin>>),
    None,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(Arc<str>, StringKind),
    Seq(Arc<Vec<Value>>),
    Map(Arc<ValueMap>, MapKind),
    Object(DynObject),
}

impl fmt::Debug for ValueRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRepr::Undefined(..) => f.write_str("undefined"),
            ValueRepr::None => f.write_str("none"),
            ValueRepr::Bool(val) => fmt::Debug::fmt(val, f),
            ValueRepr::I64(val) => fmt::Debug::fmt(val, f),
            ValueRepr::F64(val) => fmt::Debug::fmt(val, f),
            ValueRepr::String(val, _) => fmt::Debug::fmt(val, f),
            ValueRepr::Seq(val) => fmt::Debug::fmt(val, f),
            ValueRepr::Map(val, _) => fmt::Debug::fmt(val, f),
            ValueRepr::Object(val) => fmt::Debug::fmt(val, f),
        }
    }
}

/// Represents a dynamically typed value in the template engine.
#[derive(Clone)]
pub struct Value(pub(crate) ValueRepr);

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl Default for Value {
    fn default() -> Value {
        Value::UNDEFINED
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (ValueRepr::None, ValueRepr::None) => true,
            (ValueRepr::Undefined(..), ValueRepr::Undefined(..)) => true,
            (ValueRepr::String(a, _), ValueRepr::String(b, _)) => a == b,
            (ValueRepr::Seq(a), ValueRepr::Seq(b)) => a == b,
            (ValueRepr::Map(a, _), ValueRepr::Map(b, _)) => a == b,
            (ValueRepr::Object(a), ValueRepr::Object(b)) => object_eq(&**a, &**b),
            _ => match ops::coerce(self, other) {
                Some(ops::CoerceResult::I64(a, b)) => a == b,
                Some(ops::CoerceResult::F64(a, b)) => a == b,
                Some(ops::CoerceResult::Str(a, b)) => a == b,
                None => match (self.as_object(), other.as_object()) {
                    // objects may pose as sequences or maps and then
                    // compare against the plain representations
                    (Some(a), None) => Value::from_object_snapshot(&**a) == *other,
                    (None, Some(b)) => *self == Value::from_object_snapshot(&**b),
                    _ => false,
                },
            },
        }
    }
}

impl Eq for Value {}

fn f64_total_cmp(left: f64, right: f64) -> Ordering {
    left.total_cmp(&right)
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let value_ordering = match (&self.0, &other.0) {
            (ValueRepr::None, ValueRepr::None) => Ordering::Equal,
            (ValueRepr::Undefined(..), ValueRepr::Undefined(..)) => Ordering::Equal,
            (ValueRepr::String(a, _), ValueRepr::String(b, _)) => a.cmp(b),
            (ValueRepr::Seq(a), ValueRepr::Seq(b)) => a.cmp(b),
            (ValueRepr::Map(a, _), ValueRepr::Map(b, _)) => a.iter().cmp(b.iter()),
            _ => match ops::coerce(self, other) {
                Some(ops::CoerceResult::I64(a, b)) => a.cmp(&b),
                Some(ops::CoerceResult::F64(a, b)) => f64_total_cmp(a, b),
                Some(ops::CoerceResult::Str(a, b)) => a.cmp(b),
                None => Ordering::Equal,
            },
        };
        value_ordering.then((self.kind() as usize).cmp(&(other.kind() as usize)))
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            ValueRepr::None | ValueRepr::Undefined(..) => 0u8.hash(state),
            ValueRepr::Bool(b) => b.hash(state),
            ValueRepr::String(s, _) => s.hash(state),
            ValueRepr::Seq(v) => v.hash(state),
            ValueRepr::Map(m, _) => m.hash(state),
            ValueRepr::Object(o) => {
                for item in ObjectValueIter::new(&**o) {
                    item.hash(state);
                }
            }
            ValueRepr::I64(_) | ValueRepr::F64(_) => {
                if let Some(val) = self.as_i64() {
                    val.hash(state)
                } else {
                    ops::as_f64(self).map(|x| x.to_bits()).hash(state)
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ValueRepr::Undefined(UndefinedKind::Debug, origin) => match origin {
                Some(origin) => match origin.owner {
                    Some(ref owner) => {
                        write!(f, "{{{{ no such element: {}[{:?}] }}}}", owner, origin.name)
                    }
                    None => write!(f, "{{{{ {} }}}}", origin.name),
                },
                None => f.write_str("{{ undefined }}"),
            },
            ValueRepr::Undefined(..) => Ok(()),
            ValueRepr::None => f.write_str("none"),
            ValueRepr::Bool(val) => val.fmt(f),
            ValueRepr::I64(val) => val.fmt(f),
            ValueRepr::F64(val) => {
                if val.is_nan() {
                    f.write_str("NaN")
                } else if val.is_infinite() {
                    write!(f, "{}inf", if val.is_sign_negative() { "-" } else { "" })
                } else {
                    let mut num = val.to_string();
                    if !num.contains('.') && !num.contains('e') {
                        num.push_str(".0");
                    }
                    f.write_str(&num)
                }
            }
            ValueRepr::String(val, _) => f.write_str(val),
            ValueRepr::Seq(val) => {
                f.write_str("[")?;
                for (idx, item) in val.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                f.write_str("]")
            }
            ValueRepr::Map(val, _) => {
                f.write_str("{")?;
                for (idx, (key, value)) in val.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value:?}")?;
                }
                f.write_str("}")
            }
            ValueRepr::Object(val) => val.render(f),
        }
    }
}

impl Value {
    /// The undefined value.
    pub const UNDEFINED: Value = Value(ValueRepr::Undefined(UndefinedKind::Lenient, None));

    pub(crate) fn undefined_with(kind: UndefinedKind, origin: UndefinedOrigin) -> Value {
        Value(ValueRepr::Undefined(kind, Some(Arc::new(origin))))
    }

    /// Creates a value from a safe string.
    ///
    /// A safe string is one that will bypass auto escaping.
    pub fn from_safe_string(value: String) -> Value {
        Value(ValueRepr::String(value.into(), StringKind::Safe))
    }

    /// Creates a value by serializing the given host value.
    pub fn from_serialize<T: serde::Serialize>(value: T) -> Value {
        serialize::to_value(value)
    }

    /// Creates a value from a dynamic object.
    pub fn from_object<T: Object>(value: T) -> Value {
        Value(ValueRepr::Object(Arc::new(value)))
    }

    /// Creates a value from an already reference counted object.
    pub fn from_dyn_object(value: DynObject) -> Value {
        Value(ValueRepr::Object(value))
    }

    pub(crate) fn from_kwargs(map: ValueMap) -> Value {
        Value(ValueRepr::Map(Arc::new(map), MapKind::Kwargs))
    }

    pub(crate) fn from_map(map: ValueMap) -> Value {
        Value(ValueRepr::Map(Arc::new(map), MapKind::Normal))
    }

    /// Materializes an object into a plain sequence or map value.
    pub(crate) fn from_object_snapshot(obj: &dyn Object) -> Value {
        match obj.repr() {
            ObjectRepr::Seq | ObjectRepr::Iterable => {
                Value::from(ObjectValueIter::new(obj).collect::<Vec<_>>())
            }
            ObjectRepr::Map => {
                let mut rv = ValueMap::new();
                for key in ObjectValueIter::new(obj) {
                    let value = obj.get_item(&key).unwrap_or(Value::UNDEFINED);
                    rv.insert(key, value);
                }
                Value::from_map(rv)
            }
            ObjectRepr::Plain => Value::from(format!("{obj:?}")),
        }
    }

    /// Returns the kind of the value.
    pub fn kind(&self) -> ValueKind {
        match self.0 {
            ValueRepr::Undefined(..) => ValueKind::Undefined,
            ValueRepr::None => ValueKind::None,
            ValueRepr::Bool(_) => ValueKind::Bool,
            ValueRepr::I64(_) | ValueRepr::F64(_) => ValueKind::Number,
            ValueRepr::String(..) => ValueKind::String,
            ValueRepr::Seq(_) => ValueKind::Seq,
            ValueRepr::Map(..) => ValueKind::Map,
            ValueRepr::Object(ref o) => match o.repr() {
                ObjectRepr::Map => ValueKind::Map,
                ObjectRepr::Seq | ObjectRepr::Iterable => ValueKind::Seq,
                ObjectRepr::Plain => ValueKind::Map,
            },
        }
    }

    /// Is this value undefined?
    pub fn is_undefined(&self) -> bool {
        matches!(self.0, ValueRepr::Undefined(..))
    }

    pub(crate) fn undefined_kind(&self) -> Option<UndefinedKind> {
        match self.0 {
            ValueRepr::Undefined(kind, _) => Some(kind),
            _ => None,
        }
    }

    pub(crate) fn undefined_origin(&self) -> Option<&UndefinedOrigin> {
        match self.0 {
            ValueRepr::Undefined(_, Some(ref origin)) => Some(origin),
            _ => None,
        }
    }

    /// Creates the error raised when an undefined value is used.
    pub(crate) fn undefined_error(&self) -> Error {
        match self.undefined_origin() {
            Some(origin) => Error::new(ErrorKind::UndefinedError, origin.hint()),
            None => Error::from(ErrorKind::UndefinedError),
        }
    }

    /// Is this value none?
    pub fn is_none(&self) -> bool {
        matches!(self.0, ValueRepr::None)
    }

    /// Is this value a number?
    pub fn is_number(&self) -> bool {
        matches!(self.0, ValueRepr::I64(_) | ValueRepr::F64(_))
    }

    /// Is this value an integer?
    pub fn is_integer(&self) -> bool {
        matches!(self.0, ValueRepr::I64(_))
    }

    /// Is this a string that was explicitly marked safe?
    pub fn is_safe(&self) -> bool {
        matches!(self.0, ValueRepr::String(_, StringKind::Safe))
    }

    /// Is this value callable?
    pub fn is_callable(&self) -> bool {
        match self.0 {
            ValueRepr::Object(ref o) => o.is_callable(),
            _ => false,
        }
    }

    /// Is the value truthy?
    pub fn is_true(&self) -> bool {
        match self.0 {
            ValueRepr::Undefined(..) | ValueRepr::None => false,
            ValueRepr::Bool(val) => val,
            ValueRepr::I64(val) => val != 0,
            ValueRepr::F64(val) => val != 0.0,
            ValueRepr::String(ref s, _) => !s.is_empty(),
            ValueRepr::Seq(ref s) => !s.is_empty(),
            ValueRepr::Map(ref m, _) => !m.is_empty(),
            ValueRepr::Object(ref o) => o.is_true(),
        }
    }

    /// If the value is a string, returns it.
    pub fn as_str(&self) -> Option<&str> {
        match self.0 {
            ValueRepr::String(ref s, _) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an `i64` if it is an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        match self.0 {
            ValueRepr::Bool(b) => Some(b as i64),
            ValueRepr::I64(v) => Some(v),
            ValueRepr::F64(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 => {
                Some(v as i64)
            }
            _ => None,
        }
    }

    /// Returns the value as a `usize` if it is a non-negative integer.
    pub fn as_usize(&self) -> Option<usize> {
        self.as_i64().and_then(|v| usize::try_from(v).ok())
    }

    /// If the value wraps a dynamic object, returns it.
    pub fn as_object(&self) -> Option<&DynObject> {
        match self.0 {
            ValueRepr::Object(ref o) => Some(o),
            _ => None,
        }
    }

    /// Downcasts a contained dynamic object to a concrete type.
    pub fn downcast_object_ref<T: 'static>(&self) -> Option<&T> {
        match self.0 {
            ValueRepr::Object(ref o) => o.as_any().downcast_ref(),
            _ => None,
        }
    }

    /// Returns the length of the contained collection, if any.
    pub fn len(&self) -> Option<usize> {
        match self.0 {
            ValueRepr::String(ref s, _) => Some(s.chars().count()),
            ValueRepr::Seq(ref s) => Some(s.len()),
            ValueRepr::Map(ref m, _) => Some(m.len()),
            ValueRepr::Object(ref o) => o.len(),
            _ => None,
        }
    }

    pub(crate) fn is_kwargs(&self) -> bool {
        matches!(self.0, ValueRepr::Map(_, MapKind::Kwargs))
    }

    pub(crate) fn as_map(&self) -> Option<&ValueMap> {
        match self.0 {
            ValueRepr::Map(ref m, _) => Some(m),
            _ => None,
        }
    }

    /// Looks up an attribute without producing errors.
    ///
    /// Attribute access first tries the attribute protocol, then item
    /// lookup with a string key.
    pub(crate) fn get_attr_fast(&self, name: &str) -> Option<Value> {
        match self.0 {
            ValueRepr::Map(ref m, _) => m.get(&Value::from(name)).cloned(),
            ValueRepr::Object(ref o) => o
                .get_attr(name)
                .or_else(|| o.get_item(&Value::from(name))),
            _ => None,
        }
    }

    /// Looks up an item without producing errors.
    ///
    /// Item lookup first tries the item protocol, then attribute
    /// lookup when the key is a string.
    pub(crate) fn get_item_opt(&self, key: &Value) -> Option<Value> {
        match self.0 {
            ValueRepr::Map(ref m, _) => m.get(key).cloned(),
            ValueRepr::Seq(ref s) => {
                let idx = key.as_i64()?;
                let idx = if idx < 0 { idx + s.len() as i64 } else { idx };
                if idx < 0 {
                    None
                } else {
                    s.get(idx as usize).cloned()
                }
            }
            ValueRepr::String(ref s, _) => {
                let idx = key.as_i64()?;
                let chars = s.chars().count() as i64;
                let idx = if idx < 0 { idx + chars } else { idx };
                if idx < 0 {
                    None
                } else {
                    s.chars().nth(idx as usize).map(|c| Value::from(c.to_string()))
                }
            }
            ValueRepr::Object(ref o) => o
                .get_item(key)
                .or_else(|| key.as_str().and_then(|name| o.get_attr(name))),
            _ => None,
        }
    }

    /// Iterates over the value.
    pub fn try_iter(&self) -> Result<ValueIter, Error> {
        let repr = match self.0 {
            ValueRepr::Undefined(..) | ValueRepr::None => ValueIterRepr::Empty,
            ValueRepr::String(ref s, _) => ValueIterRepr::Chars(s.clone(), 0),
            ValueRepr::Seq(ref s) => ValueIterRepr::Seq(s.clone(), 0),
            ValueRepr::Map(ref m, _) => {
                ValueIterRepr::Values(m.keys().cloned().collect::<Vec<_>>().into_iter())
            }
            ValueRepr::Object(ref o) => match o.enumerate() {
                Enumerator::NonEnumerable => {
                    return Err(Error::new(
                        ErrorKind::InvalidOperation,
                        format!("object is not iterable: {self:?}"),
                    ))
                }
                Enumerator::Empty => ValueIterRepr::Empty,
                Enumerator::Seq(len) => ValueIterRepr::ObjectSeq(o.clone(), 0, len),
                Enumerator::Values(values) => ValueIterRepr::Values(values.into_iter()),
            },
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("{} is not iterable", self.kind()),
                ))
            }
        };
        Ok(ValueIter { repr })
    }

    /// Calls the value as a function.
    pub fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        match self.0 {
            ValueRepr::Object(ref o) => o.call(state, args),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("value of type {} is not callable", self.kind()),
            )),
        }
    }

    /// Calls a method on the value.
    pub fn call_method(&self, state: &State, name: &str, args: &[Value]) -> Result<Value, Error> {
        if let ValueRepr::Object(ref o) = self.0 {
            return o.call_method(state, name, args);
        }
        if let Some(attr) = self.get_attr_fast(name) {
            return attr.call(state, args);
        }
        Err(Error::new(
            ErrorKind::UnknownMethod,
            format!("{} has no method named {}", self.kind(), name),
        ))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value(ValueRepr::None)
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Value(ValueRepr::Bool(val))
    }
}

macro_rules! value_from_int {
    ($($ty:ty)*) => {
        $(
            impl From<$ty> for Value {
                fn from(val: $ty) -> Self {
                    Value(ValueRepr::I64(val as i64))
                }
            }
        )*
    };
}

value_from_int!(u8 u16 u32 i8 i16 i32 i64);

impl From<u64> for Value {
    fn from(val: u64) -> Self {
        match i64::try_from(val) {
            Ok(val) => Value(ValueRepr::I64(val)),
            Err(_) => Value(ValueRepr::F64(val as f64)),
        }
    }
}

impl From<usize> for Value {
    fn from(val: usize) -> Self {
        Value::from(val as u64)
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Value(ValueRepr::F64(val))
    }
}

impl From<f32> for Value {
    fn from(val: f32) -> Self {
        Value(ValueRepr::F64(val as f64))
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Value(ValueRepr::String(val.into(), StringKind::Normal))
    }
}

impl From<String> for Value {
    fn from(val: String) -> Self {
        Value(ValueRepr::String(val.into(), StringKind::Normal))
    }
}

impl From<Arc<str>> for Value {
    fn from(val: Arc<str>) -> Self {
        Value(ValueRepr::String(val, StringKind::Normal))
    }
}

impl From<Vec<Value>> for Value {
    fn from(val: Vec<Value>) -> Self {
        Value(ValueRepr::Seq(Arc::new(val)))
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::from(iter.into_iter().map(Into::into).collect::<Vec<Value>>())
    }
}

impl<K: Into<Value>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(val: BTreeMap<K, V>) -> Self {
        Value::from_map(
            val.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(val: Option<T>) -> Self {
        match val {
            Some(val) => val.into(),
            None => Value(ValueRepr::None),
        }
    }
}

/// Iterates over a value.
pub struct ValueIter {
    repr: ValueIterRepr,
}

enum ValueIterRepr {
    Empty,
    Chars(Arc<str>, usize),
    Seq(Arc<Vec<Value>>, usize),
    ObjectSeq(DynObject, usize, usize),
    Values(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self.repr {
            ValueIterRepr::Empty => None,
            ValueIterRepr::Chars(ref s, ref mut offset) => {
                let c = s[*offset..].chars().next()?;
                *offset += c.len_utf8();
                Some(Value::from(c.to_string()))
            }
            ValueIterRepr::Seq(ref seq, ref mut idx) => {
                let rv = seq.get(*idx).cloned();
                if rv.is_some() {
                    *idx += 1;
                }
                rv
            }
            ValueIterRepr::ObjectSeq(ref obj, ref mut idx, len) => {
                if *idx >= len {
                    None
                } else {
                    let rv = obj.get_index(*idx).unwrap_or(Value::UNDEFINED);
                    *idx += 1;
                    Some(rv)
                }
            }
            ValueIterRepr::Values(ref mut iter) => iter.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.repr {
            ValueIterRepr::Empty => (0, Some(0)),
            ValueIterRepr::Chars(ref s, offset) => (0, Some(s.len() - offset)),
            ValueIterRepr::Seq(ref seq, idx) => {
                let rest = seq.len() - idx;
                (rest, Some(rest))
            }
            ValueIterRepr::ObjectSeq(_, idx, len) => {
                let rest = len - idx;
                (rest, Some(rest))
            }
            ValueIterRepr::Values(ref iter) => iter.size_hint(),
        }
    }
}

impl fmt::Debug for ValueIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueIter").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_sort_order() {
        let mut values = vec![
            Value::from(3.0),
            Value::from(1),
            Value::from(true),
            Value::from("b"),
            Value::from("a"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::from(true),
                Value::from(1),
                Value::from(3.0),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn test_string_coercion() {
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from(42.5).to_string(), "42.5");
        assert_eq!(Value::from(42.0).to_string(), "42.0");
        assert_eq!(Value::from(()).to_string(), "none");
        assert_eq!(Value::UNDEFINED.to_string(), "");
        assert_eq!(
            Value::from(vec![Value::from(1), Value::from("x")]).to_string(),
            "[1, \"x\"]"
        );
    }

    #[test]
    fn test_item_lookup() {
        let seq = Value::from(vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(seq.get_item_opt(&Value::from(0)), Some(Value::from(1)));
        assert_eq!(seq.get_item_opt(&Value::from(-1)), Some(Value::from(3)));
        assert_eq!(seq.get_item_opt(&Value::from(3)), None);
    }
}
