//! Native-types rendering.
//!
//! The regular render produces text.  In native mode the engine keeps
//! track of the values a template emits: a template that is a single
//! expression evaluates to that value unchanged, and templates that
//! concatenate literal text with expressions are re-parsed as a
//! constant expression where possible (`[{% for .. %}{{ i }},{% endfor %}]`
//! comes back as an actual list).

use std::sync::Arc;

use crate::ast;
use crate::environment::Environment;
use crate::error::Error;
use crate::eval;
use crate::output::Output;
use crate::parser;
use crate::program::CompiledTemplate;
use crate::value::Value;

pub(crate) fn render_native(
    env: &Environment,
    compiled: &Arc<CompiledTemplate>,
    root: Value,
) -> Result<Value, Error> {
    let mut buf = String::new();
    let values = {
        let mut out = Output::with_value_log(&mut buf);
        eval::render_template(env, compiled, root, &mut out)?;
        out.take_value_log()
    };

    // a single emitted value round-trips without stringification
    if values.len() == 1 && !matches!(values[0].0, crate::value::ValueRepr::String(..)) {
        return Ok(values[0].clone());
    }
    if values.len() == 1 && buf == values[0].to_string() {
        return Ok(values[0].clone());
    }

    Ok(parse_constant(&buf).unwrap_or(Value::from(buf)))
}

/// Re-parses rendered output as a constant expression.
///
/// This reuses the expression parser and the constant folder, so
/// exactly the literals the language itself understands round-trip
/// (numbers, strings, lists, maps, booleans, none).
fn parse_constant(source: &str) -> Option<Value> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut expr = parser::parse_expr(trimmed).ok()?;
    crate::optimizer::fold_standalone(&mut expr);
    match expr {
        ast::Expr::Const(node) => Some(node.value.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_parse_constant() {
        assert_eq!(parse_constant("42"), Some(Value::from(42)));
        assert_eq!(
            parse_constant("[1,2,3,]"),
            Some(Value::from(vec![
                Value::from(1),
                Value::from(2),
                Value::from(3)
            ]))
        );
        assert_eq!(parse_constant("hello world"), None);
        assert_eq!(parse_constant("true"), Some(Value::from(true)));
    }
}
