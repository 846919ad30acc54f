//! Sandboxing hooks for restricted template execution.
//!
//! A sandboxed environment intercepts attribute access, calls and
//! optionally operators.  Violations surface as
//! [`SecurityError`](crate::ErrorKind::SecurityError) naming the
//! operation and target.
//!
//! ```
//! use vellum::{Environment, ErrorKind};
//! use vellum::sandbox::DefaultSandbox;
//!
//! let mut env = Environment::new();
//! env.set_sandbox(DefaultSandbox::default());
//! let err = env
//!     .render_str("{{ secrets.__token__ }}", serde_json::json!({"secrets": {}}))
//!     .unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::SecurityError);
//! ```

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::value::{ops, Value};

/// Binary operators the sandbox can intercept.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SandboxBinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    Concat,
}

/// Unary operators the sandbox can intercept.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SandboxUnaryOp {
    Neg,
}

/// Attribute names that are never safe to expose.
///
/// These mirror the classic deny-list of introspection attributes of
/// dynamic host objects.
pub const UNSAFE_ATTRIBUTES: &[&str] = &[
    "mro",
    "class",
    "globals",
    "code",
    "builtins",
    "subclasses",
];

/// The policy consulted by a sandboxed environment.
///
/// The default methods implement the standard policy: attributes
/// starting with an underscore and the deny-listed introspection
/// names are rejected, everything is callable, no operators are
/// intercepted.
pub trait SandboxPolicy: Send + Sync {
    /// Decides whether an attribute may be accessed.
    fn is_safe_attribute(&self, obj: &Value, attr: &str, value: &Value) -> bool {
        let _ = (obj, value);
        !attr.starts_with('_')
            && !UNSAFE_ATTRIBUTES.contains(&attr)
            && !attr.starts_with("func_")
    }

    /// Decides whether a value may be invoked.
    fn is_safe_callable(&self, value: &Value) -> bool {
        let _ = value;
        true
    }

    /// Whether the given binary operator is routed through
    /// [`call_binop`](Self::call_binop).
    fn intercepts_binop(&self, op: SandboxBinOp) -> bool {
        let _ = op;
        false
    }

    /// Whether the given unary operator is routed through
    /// [`call_unop`](Self::call_unop).
    fn intercepts_unop(&self, op: SandboxUnaryOp) -> bool {
        let _ = op;
        false
    }

    /// Evaluates an intercepted binary operator.
    fn call_binop(
        &self,
        state: &State,
        op: SandboxBinOp,
        lhs: &Value,
        rhs: &Value,
    ) -> Result<Value, Error> {
        let _ = state;
        apply_default_binop(op, lhs, rhs)
    }

    /// Evaluates an intercepted unary operator.
    fn call_unop(&self, state: &State, op: SandboxUnaryOp, value: &Value) -> Result<Value, Error> {
        let _ = (state, op);
        ops::neg(value)
    }
}

/// Performs the default (unintercepted) binary operation.
pub fn apply_default_binop(op: SandboxBinOp, lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match op {
        SandboxBinOp::Add => ops::add(lhs, rhs),
        SandboxBinOp::Sub => ops::sub(lhs, rhs),
        SandboxBinOp::Mul => ops::mul(lhs, rhs),
        SandboxBinOp::Div => ops::div(lhs, rhs),
        SandboxBinOp::FloorDiv => ops::int_div(lhs, rhs),
        SandboxBinOp::Rem => ops::rem(lhs, rhs),
        SandboxBinOp::Pow => ops::pow(lhs, rhs),
        SandboxBinOp::Concat => Ok(ops::string_concat(lhs, rhs)),
    }
}

/// The stock sandbox policy.
#[derive(Debug, Default, Clone)]
pub struct DefaultSandbox;

impl SandboxPolicy for DefaultSandbox {}

/// An immutable sandbox that additionally refuses operations that
/// could mutate shared values, like method calls on namespaces.
#[derive(Debug, Default, Clone)]
pub struct ImmutableSandbox;

impl SandboxPolicy for ImmutableSandbox {
    fn is_safe_attribute(&self, obj: &Value, attr: &str, value: &Value) -> bool {
        if matches!(
            attr,
            "append" | "extend" | "insert" | "pop" | "remove" | "clear" | "update" | "setdefault"
        ) {
            return false;
        }
        DefaultSandbox.is_safe_attribute(obj, attr, value)
    }
}

/// A sandbox with a power operator limit.
///
/// Exponentiation with very large operands is the classic way to burn
/// CPU from inside a template, so a sandboxed environment may cap it.
#[derive(Debug, Clone)]
pub struct LimitedPowSandbox {
    /// The largest permitted exponent.
    pub max_exponent: i64,
}

impl Default for LimitedPowSandbox {
    fn default() -> Self {
        LimitedPowSandbox { max_exponent: 1000 }
    }
}

impl SandboxPolicy for LimitedPowSandbox {
    fn intercepts_binop(&self, op: SandboxBinOp) -> bool {
        op == SandboxBinOp::Pow
    }

    fn call_binop(
        &self,
        _state: &State,
        op: SandboxBinOp,
        lhs: &Value,
        rhs: &Value,
    ) -> Result<Value, Error> {
        if op == SandboxBinOp::Pow {
            if let Some(exp) = rhs.as_i64() {
                if exp > self.max_exponent {
                    return Err(Error::new(
                        ErrorKind::SecurityError,
                        format!("exponent {exp} exceeds the sandbox limit"),
                    ));
                }
            }
        }
        apply_default_binop(op, lhs, rhs)
    }
}
