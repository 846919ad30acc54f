use std::fmt;
use std::io;
use std::sync::Arc;

use serde::Serialize;

use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::eval;
use crate::nativetypes;
use crate::output::Output;
use crate::program::CompiledTemplate;
use crate::utils::AutoEscape;
use crate::value::Value;

/// A handle to a template.
///
/// Templates are obtained from the [`Environment`] and are already
/// compiled; rendering applies them to a context.  The context can be
/// any serializable value, the [`context!`](crate::context) macro is
/// the usual way to build one.
#[derive(Clone)]
pub struct Template<'env> {
    env: &'env Environment,
    compiled: Arc<CompiledTemplate>,
}

impl<'env> fmt::Debug for Template<'env> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.compiled.name)
            .field("initial_auto_escape", &self.compiled.initial_auto_escape)
            .finish()
    }
}

impl<'env> Template<'env> {
    pub(crate) fn new(env: &'env Environment, compiled: Arc<CompiledTemplate>) -> Template<'env> {
        Template { env, compiled }
    }

    /// Returns the name of the template.
    pub fn name(&self) -> &str {
        &self.compiled.name
    }

    /// Returns the source of the template.
    pub fn source(&self) -> &str {
        &self.compiled.source
    }

    /// The auto escape mode the template starts out in.
    pub fn initial_auto_escape(&self) -> AutoEscape {
        self.compiled.initial_auto_escape
    }

    /// Renders the template into a string.
    ///
    /// ```
    /// # use vellum::{Environment, context};
    /// let mut env = Environment::new();
    /// env.add_template("hello", "Hello {{ name }}!").unwrap();
    /// let tmpl = env.get_template("hello").unwrap();
    /// assert_eq!(tmpl.render(context!(name => "John")).unwrap(), "Hello John!");
    /// ```
    pub fn render<S: Serialize>(&self, ctx: S) -> Result<String, Error> {
        let mut rv = String::with_capacity(self.compiled.source.len());
        {
            let mut out = Output::with_string(&mut rv);
            self.render_value(Value::from_serialize(ctx), &mut out)?;
        }
        Ok(rv)
    }

    /// Renders the template into an [`io::Write`].
    ///
    /// Output is produced in source order; anything written before an
    /// error surfaced stays written.
    pub fn render_to_write<S: Serialize, W: io::Write>(
        &self,
        ctx: S,
        w: W,
    ) -> Result<(), Error> {
        struct Adapter<W> {
            w: W,
            err: Option<io::Error>,
        }

        impl<W: io::Write> fmt::Write for Adapter<W> {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                match self.w.write_all(s.as_bytes()) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        self.err = Some(err);
                        Err(fmt::Error)
                    }
                }
            }
        }

        let mut adapter = Adapter { w, err: None };
        let result = {
            let mut out = Output::with_write(&mut adapter);
            self.render_value(Value::from_serialize(ctx), &mut out)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) => match adapter.err.take() {
                Some(io_err) => Err(
                    Error::new(ErrorKind::WriteFailure, "failed to write rendered output")
                        .with_source(io_err),
                ),
                None => Err(err),
            },
        }
    }

    /// Renders the template to a native value.
    ///
    /// A template consisting of a single expression returns that
    /// expression's value unchanged; otherwise the concatenated output
    /// is re-parsed as a constant and falls back to the plain string:
    ///
    /// ```
    /// # use vellum::{Environment, context};
    /// let env = Environment::new();
    /// let tmpl = env.template_from_str("{{ x + y }}").unwrap();
    /// let rv = tmpl.render_native(context!(x => 4, y => 2)).unwrap();
    /// assert_eq!(rv.as_i64(), Some(6));
    /// ```
    pub fn render_native<S: Serialize>(&self, ctx: S) -> Result<Value, Error> {
        nativetypes::render_native(self.env, &self.compiled, Value::from_serialize(ctx))
    }

    pub(crate) fn render_value(&self, root: Value, out: &mut Output) -> Result<(), Error> {
        eval::render_template(self.env, &self.compiled, root, out)
    }
}
