use std::fmt;
use std::sync::Mutex;

use crate::value::{Enumerator, Object, ObjectRepr, Value, ValueMap};

/// A `namespace()` object.
///
/// This is the only value with interior mutability exposed to
/// templates: attribute assignments via `{% set ns.attr = ... %}`
/// mutate it in place, which makes values outlive the scope they were
/// written in.
#[derive(Default)]
pub(crate) struct Namespace {
    data: Mutex<ValueMap>,
}

impl Namespace {
    pub fn with_values(values: ValueMap) -> Namespace {
        Namespace {
            data: Mutex::new(values),
        }
    }

    pub fn set_value(&self, name: &str, value: Value) {
        self.data.lock().unwrap().insert(Value::from(name), value);
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.data.lock().unwrap(), f)
    }
}

impl Object for Namespace {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.data.lock().unwrap().get(&Value::from(name)).cloned()
    }

    fn enumerate(&self) -> Enumerator {
        Enumerator::Values(self.data.lock().unwrap().keys().cloned().collect())
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<namespace {:?}>", &*self.data.lock().unwrap())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
