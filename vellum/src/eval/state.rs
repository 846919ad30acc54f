use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::eval::blocks::BlockStack;
use crate::eval::context::{Context, Frame};
use crate::utils::{AutoEscape, UndefinedBehavior};
use crate::value::Value;

/// Provides access to the current execution state of a render.
///
/// A mutable reference is passed through the evaluator; filters, tests
/// and functions receive a shared reference so they can inspect the
/// environment, look up variables or dispatch to other filters.
pub struct State<'env> {
    pub(crate) env: &'env Environment,
    pub(crate) ctx: Context,
    pub(crate) auto_escape: AutoEscape,
    pub(crate) blocks: BTreeMap<String, BlockStack>,
    pub(crate) current_block: Option<String>,
    pub(crate) name: Arc<str>,
    pub(crate) pending_parent: Option<String>,
}

impl fmt::Debug for State<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("auto_escape", &self.auto_escape)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl<'env> State<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        ctx: Context,
        auto_escape: AutoEscape,
        blocks: BTreeMap<String, BlockStack>,
        name: Arc<str>,
    ) -> State<'env> {
        State {
            env,
            ctx,
            auto_escape,
            blocks,
            current_block: None,
            name,
            pending_parent: None,
        }
    }

    /// Creates an empty state for an environment.
    pub(crate) fn new_for_env(env: &'env Environment) -> State<'env> {
        State::new(
            env,
            Context::new_with_frame(Frame::default(), env.recursion_limit()),
            AutoEscape::None,
            BTreeMap::new(),
            Arc::from("<unknown>"),
        )
    }

    /// Returns the environment.
    pub fn env(&self) -> &Environment {
        self.env
    }

    /// The name of the innermost template that is being rendered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current auto escape setting.
    pub fn auto_escape(&self) -> AutoEscape {
        self.auto_escape
    }

    /// The undefined behavior of the environment.
    pub fn undefined_behavior(&self) -> UndefinedBehavior {
        self.env.undefined_behavior()
    }

    /// The name of the block currently being rendered, if any.
    pub fn current_block(&self) -> Option<&str> {
        self.current_block.as_deref()
    }

    /// Looks up a variable in the current context.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.ctx.load(self.env, name)
    }

    /// Applies a filter by name.
    pub fn apply_filter(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        match self.env.get_filter(name) {
            Some(filter) => filter.call(self, args),
            None => Err(Error::new(
                ErrorKind::UnknownFilter,
                format!("filter {name} is unknown"),
            )),
        }
    }

    /// Performs a test by name.
    pub fn perform_test(&self, name: &str, args: &[Value]) -> Result<bool, Error> {
        match self.env.get_test(name) {
            Some(test) => Ok(test.call(self, args)?.is_true()),
            None => Err(Error::new(
                ErrorKind::UnknownTest,
                format!("test {name} is unknown"),
            )),
        }
    }

    pub(crate) fn base_ctx(&self) -> Value {
        self.ctx.clone_base()
    }

    pub(crate) fn depth(&self) -> usize {
        self.ctx.depth()
    }
}
