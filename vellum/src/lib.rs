//! <div align=center>
//!   <p><strong>Vellum: a Jinja-dialect template engine for Rust</strong></p>
//! </div>
//!
//! Vellum renders text templates in the Jinja dialect: arbitrary
//! literal text interleaved with expression, statement and comment
//! blocks, template inheritance with blocks and `super()`, macros,
//! scoped and recursive loops, auto escaping and sandboxing.
//! Context data is passed through [`serde`], so everything
//! serializable can flow into templates.
//!
//! ```jinja
//! {% for user in users %}
//!   <li>{{ user.name }}</li>
//! {% endfor %}
//! ```
//!
//! # Template Usage
//!
//! To render templates, create an [`Environment`] and populate it.
//! The [`context!`] macro builds a render context:
//!
//! ```
//! use vellum::{Environment, context};
//!
//! let mut env = Environment::new();
//! env.add_template("hello", "Hello {{ name }}!").unwrap();
//! let tmpl = env.get_template("hello").unwrap();
//! assert_eq!(tmpl.render(context!(name => "John")).unwrap(), "Hello John!");
//! ```
//!
//! # Expression Usage
//!
//! The expression language works standalone, which is useful for
//! configuration files and rule engines:
//!
//! ```
//! use vellum::{Environment, context};
//!
//! let env = Environment::new();
//! let expr = env.compile_expression("number < 42").unwrap();
//! let result = expr.eval(context!(number => 23)).unwrap();
//! assert!(result.is_true());
//! ```
//!
//! # Learn more
//!
//! - [`Environment`]: the main API entry point.
//! - [`Template`]: the template object API.
//! - [`filters`], [`tests`], [`functions`]: the built-in library and
//!   how to extend it.
//! - [`loader`]: loading templates from the file system and elsewhere.
//! - [`sandbox`]: restricted execution.
#![allow(clippy::cognitive_complexity)]

mod macros;

mod ast;
mod defaults;
mod environment;
mod error;
mod eval;
mod expression;
mod i18n;
mod lexer;
mod meta;
mod nativetypes;
mod optimizer;
mod output;
mod parser;
mod program;
mod template;
mod tokens;
mod utils;

pub mod bytecode;
pub mod filters;
pub mod functions;
pub mod loader;
pub mod sandbox;
pub mod tests;
pub mod value;

mod cache;
mod syntax;

pub use self::defaults::default_auto_escape_callback;
pub use self::environment::{Environment, Extension, Policies};
pub use self::error::{Error, ErrorKind};
pub use self::eval::State;
pub use self::expression::Expression;
pub use self::i18n::{GettextCallback, NgettextCallback};
pub use self::lexer::WhitespaceConfig;
pub use self::loader::path_loader;
pub use self::output::Output;
pub use self::syntax::{Syntax, SyntaxConfig};
pub use self::template::Template;
pub use self::utils::{AutoEscape, HtmlEscape, UndefinedBehavior};

/// This module gives access to the lower level machinery.
///
/// It exists mostly for testing and debugging; the interfaces in here
/// are not as stable as the rest of the crate.
pub mod machinery {
    #![allow(missing_docs)]
    pub use crate::ast::{Expr, Spanned, Stmt};
    pub use crate::lexer::{tokenize, Tokenizer};
    pub use crate::parser::{parse, parse_expr, CompileOptions};
    pub use crate::tokens::{Span, Token};
}
