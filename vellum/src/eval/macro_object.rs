use std::fmt;
use std::sync::Arc;

use crate::ast;
use crate::error::{Error, ErrorKind};
use crate::eval::{self, State};
use crate::value::{Enumerator, Object, ObjectRepr, Value, ValueMap};

/// A macro value bound to its defining scope.
pub(crate) struct MacroObject {
    pub name: String,
    pub arg_names: Vec<String>,
    pub defaults: Vec<Value>,
    pub body: Arc<Vec<ast::Stmt>>,
    pub closure: Value,
    pub caller_referenced: bool,
    pub catch_varargs: bool,
    pub catch_kwargs: bool,
}

impl fmt::Debug for MacroObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.name)
            .field("arguments", &self.arg_names)
            .finish()
    }
}

impl MacroObject {
    /// Binds call arguments to the macro parameters.
    ///
    /// Returns the bound locals including `varargs`, `kwargs` and the
    /// optional `caller`.
    fn bind_arguments(&self, args: &[Value]) -> Result<Vec<(String, Value)>, Error> {
        let (positional, kwargs) = match args.last() {
            Some(last) if last.is_kwargs() => {
                (&args[..args.len() - 1], last.as_map().cloned().unwrap_or_default())
            }
            _ => (args, Default::default()),
        };
        let mut kwargs = kwargs;
        let mut rv = Vec::with_capacity(self.arg_names.len() + 3);

        let defaults_offset = self.arg_names.len() - self.defaults.len();
        for (idx, name) in self.arg_names.iter().enumerate() {
            let value = if let Some(value) = positional.get(idx) {
                if kwargs.contains_key(&Value::from(name.as_str())) {
                    return Err(Error::new(
                        ErrorKind::InvalidArguments,
                        format!(
                            "macro {} got multiple values for argument {:?}",
                            self.name, name
                        ),
                    ));
                }
                value.clone()
            } else if let Some(value) = kwargs.remove(&Value::from(name.as_str())) {
                value
            } else if idx >= defaults_offset {
                self.defaults[idx - defaults_offset].clone()
            } else {
                return Err(Error::new(
                    ErrorKind::InvalidArguments,
                    format!("macro {} missing required argument {:?}", self.name, name),
                ));
            };
            rv.push((name.clone(), value));
        }

        let varargs = positional
            .get(self.arg_names.len()..)
            .unwrap_or_default()
            .to_vec();
        rv.push(("varargs".to_string(), Value::from(varargs)));

        if let Some(caller) = kwargs.remove(&Value::from("caller")) {
            if self.caller_referenced || self.arg_names.iter().any(|x| x == "caller") {
                rv.push(("caller".to_string(), caller));
            } else {
                return Err(Error::new(
                    ErrorKind::InvalidArguments,
                    format!("macro {} does not accept a caller", self.name),
                ));
            }
        } else if self.caller_referenced {
            rv.push(("caller".to_string(), Value::UNDEFINED));
        }

        if !kwargs.is_empty() && !self.catch_kwargs {
            let unknown = kwargs.keys().next().unwrap();
            return Err(Error::new(
                ErrorKind::InvalidArguments,
                format!(
                    "macro {} received unexpected keyword argument {}",
                    self.name, unknown
                ),
            ));
        }
        rv.push((
            "kwargs".to_string(),
            Value::from_kwargs(kwargs.into_iter().collect::<ValueMap>()),
        ));

        Ok(rv)
    }
}

impl Object for MacroObject {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::from(self.name.as_str())),
            "arguments" => Some(Value::from(
                self.arg_names
                    .iter()
                    .map(|x| Value::from(x.as_str()))
                    .collect::<Vec<_>>(),
            )),
            "caller" => Some(Value::from(self.caller_referenced)),
            "catch_kwargs" => Some(Value::from(self.catch_kwargs)),
            "catch_varargs" => Some(Value::from(self.catch_varargs)),
            _ => None,
        }
    }

    fn enumerate(&self) -> Enumerator {
        Enumerator::NonEnumerable
    }

    fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        let locals = self.bind_arguments(args)?;
        eval::call_macro(self, state, locals)
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<macro '{}'>", self.name)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// The object imported templates materialize into.
#[derive(Debug)]
pub(crate) struct ModuleObject {
    pub name: String,
    pub fields: ValueMap,
}

impl Object for ModuleObject {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.fields.get(&Value::from(name)).cloned()
    }

    fn enumerate(&self) -> Enumerator {
        Enumerator::Values(self.fields.keys().cloned().collect())
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module '{}'>", self.name)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
