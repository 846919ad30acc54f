//! Translation support for `{% trans %}` blocks.
//!
//! A trans block captures a singular (and optionally plural) message
//! with `%(name)s` placeholders.  At render time the environment's
//! gettext/ngettext callbacks translate the message and the engine
//! interpolates the bound variables, re-escaping them when auto
//! escaping is active.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::ast;
use crate::error::{Error, ErrorKind};
use crate::eval::{Evaluator, State};
use crate::output::Output;
use crate::utils::{AutoEscape, HtmlEscape};
use crate::value::Value;

/// Callback translating a singular message.
pub type GettextCallback = dyn Fn(&str) -> String + Send + Sync;

/// Callback translating a message with plural forms.
pub type NgettextCallback = dyn Fn(&str, &str, u64) -> String + Send + Sync;

#[derive(Default, Clone)]
pub(crate) struct I18nCallbacks {
    pub gettext: Option<Arc<GettextCallback>>,
    pub ngettext: Option<Arc<NgettextCallback>>,
}

/// Builds the `%(name)s` message string from the pieces.
fn build_message(pieces: &[ast::TransPiece], trimmed: bool) -> String {
    let mut rv = String::new();
    for piece in pieces {
        match piece {
            ast::TransPiece::Text(text) => rv.push_str(text),
            ast::TransPiece::Var(name) => {
                let _ = write!(rv, "%({name})s");
            }
        }
    }
    if trimmed {
        trim_message(&rv)
    } else {
        rv
    }
}

/// Collapses whitespace the way the trimmed modifier asks for: every
/// line is trimmed and lines are joined with single spaces.
fn trim_message(msg: &str) -> String {
    msg.split('\n')
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Substitutes `%(name)s` placeholders in a translated string.
fn interpolate(
    translated: &str,
    lookup: &dyn Fn(&str) -> Option<Value>,
    auto_escape: AutoEscape,
) -> Result<String, Error> {
    let mut rv = String::with_capacity(translated.len());
    let mut rest = translated;
    while let Some(pos) = rest.find("%(") {
        rv.push_str(&rest[..pos]);
        rest = &rest[pos + 2..];
        let end = rest.find(")s").ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                "unclosed placeholder in translated message",
            )
        })?;
        let name = &rest[..end];
        let value = lookup(name).unwrap_or(Value::UNDEFINED);
        if !matches!(auto_escape, AutoEscape::None) && !value.is_safe() {
            let _ = write!(rv, "{}", HtmlEscape(&value.to_string()));
        } else {
            let _ = write!(rv, "{value}");
        }
        rest = &rest[end + 2..];
    }
    rv.push_str(rest);
    Ok(rv)
}

pub(crate) fn render_trans<'env>(
    evaluator: &Evaluator<'env>,
    node: &ast::Trans,
    state: &mut State<'env>,
    out: &mut Output,
) -> Result<(), Error> {
    let trimmed = node.trimmed || state.env().policies().i18n_trimmed;

    // resolve the bound variables first; names used in the message
    // without an explicit binding resolve against the context
    let mut vars = Vec::with_capacity(node.vars.len());
    for (name, expr) in &node.vars {
        vars.push((name.clone(), evaluator.eval_expr(expr, state)?));
    }

    let singular = build_message(&node.singular, trimmed);
    let i18n = state.env().i18n().clone();

    let translated = match node.plural {
        Some(ref plural) => {
            let plural_msg = build_message(&plural.pieces, trimmed);
            let count_value = vars
                .iter()
                .find(|(name, _)| *name == plural.count_name)
                .map(|(_, value)| value.clone())
                .or_else(|| state.lookup(&plural.count_name))
                .unwrap_or(Value::UNDEFINED);
            let count = count_value.as_i64().unwrap_or(0).max(0) as u64;
            match i18n.ngettext {
                Some(ref ngettext) => ngettext(&singular, &plural_msg, count),
                None => {
                    if count == 1 {
                        singular
                    } else {
                        plural_msg
                    }
                }
            }
        }
        None => match i18n.gettext {
            Some(ref gettext) => gettext(&singular),
            None => singular,
        },
    };

    let auto_escape = state.auto_escape();
    let lookup = |name: &str| -> Option<Value> {
        vars.iter()
            .find(|(var_name, _)| var_name == name)
            .map(|(_, value)| value.clone())
            .or_else(|| state.lookup(name))
    };
    let rv = interpolate(&translated, &lookup, auto_escape)?;
    out.write_str(&rv).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_trim_message() {
        assert_eq!(
            trim_message("  Hello\n    beautiful\n  World  "),
            "Hello beautiful World"
        );
    }

    #[test]
    fn test_interpolate() {
        let lookup = |name: &str| -> Option<Value> {
            (name == "user").then(|| Value::from("<admin>"))
        };
        assert_eq!(
            interpolate("Hi %(user)s!", &lookup, AutoEscape::None).unwrap(),
            "Hi <admin>!"
        );
        assert_eq!(
            interpolate("Hi %(user)s!", &lookup, AutoEscape::Html).unwrap(),
            "Hi &lt;admin&gt;!"
        );
    }
}
