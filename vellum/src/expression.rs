use std::fmt;

use serde::Serialize;

use crate::ast;
use crate::environment::Environment;
use crate::error::Error;
use crate::eval;
use crate::value::Value;

/// A compiled standalone expression.
///
/// Obtained via
/// [`Environment::compile_expression`](crate::Environment::compile_expression);
/// useful for evaluating the expression language outside of templates,
/// for example in configuration files:
///
/// ```
/// # use vellum::{Environment, context};
/// let env = Environment::new();
/// let expr = env.compile_expression("number > 10 and number < 20").unwrap();
/// assert!(expr.eval(context!(number => 15)).unwrap().is_true());
/// ```
pub struct Expression<'env> {
    env: &'env Environment,
    expr: ast::Expr,
}

impl<'env> fmt::Debug for Expression<'env> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression").finish()
    }
}

impl<'env> Expression<'env> {
    pub(crate) fn new(env: &'env Environment, expr: ast::Expr) -> Expression<'env> {
        Expression { env, expr }
    }

    /// Evaluates the expression against a context.
    pub fn eval<S: Serialize>(&self, ctx: S) -> Result<Value, Error> {
        eval::eval_expression(self.env, &self.expr, Value::from_serialize(ctx))
    }
}
