use std::borrow::Cow;
use std::fmt;

/// Represents template errors.
///
/// Errors carry the name and line of the template that produced them.
/// When formatted with the alternate flag (`{:#}`) an error renders the
/// offending source line with a marker if the template source is known.
#[derive(Debug)]
pub struct Error {
    repr: Box<ErrorRepr>,
}

#[derive(Debug)]
struct ErrorRepr {
    kind: ErrorKind,
    detail: Option<Cow<'static, str>>,
    name: Option<String>,
    lineno: usize,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    template_source: Option<String>,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
    }
}

impl Eq for Error {}

/// An enum describing the error kind.
#[non_exhaustive]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The template has a syntax error.
    SyntaxError,
    /// A semantic error detected at compile time, such as a duplicate
    /// block name or an assignment to a reserved name.
    AssertionError,
    /// A template was not found.
    TemplateNotFound,
    /// None of a list of included templates was found.
    TemplatesNotFound,
    /// An undefined value was used in a way its kind does not permit.
    UndefinedError,
    /// A runtime operation was attempted on incompatible values.
    InvalidOperation,
    /// A call received invalid arguments.
    InvalidArguments,
    /// A filter is unknown.
    UnknownFilter,
    /// A test is unknown.
    UnknownTest,
    /// A function is unknown.
    UnknownFunction,
    /// A method was called that does not exist.
    UnknownMethod,
    /// A block of this name does not exist in the inheritance chain.
    UnknownBlock,
    /// The sandbox rejected an operation.
    SecurityError,
    /// A string literal carries an invalid escape sequence.
    BadEscape,
    /// A context value could not be converted into the engine format.
    BadSerialization,
    /// A template included with `{% include %}` failed to render.
    BadInclude,
    /// Writing to the output failed.
    WriteFailure,
    /// The runtime recursion limit was exceeded.
    RecursionLimit,
}

impl ErrorKind {
    fn description(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::AssertionError => "assertion error",
            ErrorKind::TemplateNotFound => "template not found",
            ErrorKind::TemplatesNotFound => "templates not found",
            ErrorKind::UndefinedError => "undefined value",
            ErrorKind::InvalidOperation => "invalid operation",
            ErrorKind::InvalidArguments => "invalid arguments",
            ErrorKind::UnknownFilter => "unknown filter",
            ErrorKind::UnknownTest => "unknown test",
            ErrorKind::UnknownFunction => "unknown function",
            ErrorKind::UnknownMethod => "unknown method",
            ErrorKind::UnknownBlock => "unknown block",
            ErrorKind::SecurityError => "operation rejected by sandbox",
            ErrorKind::BadEscape => "bad string escape",
            ErrorKind::BadSerialization => "could not serialize to value",
            ErrorKind::BadInclude => "could not render include",
            ErrorKind::WriteFailure => "could not write output",
            ErrorKind::RecursionLimit => "recursion limit exceeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref detail) = self.repr.detail {
            write!(f, "{}: {}", self.kind(), detail)?;
        } else {
            write!(f, "{}", self.kind())?;
        }
        if let Some(ref name) = self.repr.name {
            write!(f, " (in {}:{})", name, self.repr.lineno)?;
        }
        if f.alternate() {
            if let Some(ctx) = self.source_context() {
                write!(f, "\n{ctx}")?;
            }
        }
        Ok(())
    }
}

impl Error {
    /// Creates a new error with kind and detail.
    pub fn new<D: Into<Cow<'static, str>>>(kind: ErrorKind, detail: D) -> Error {
        Error {
            repr: Box::new(ErrorRepr {
                kind,
                detail: Some(detail.into()),
                name: None,
                lineno: 0,
                source: None,
                template_source: None,
            }),
        }
    }

    pub(crate) fn template_not_found(name: &str) -> Error {
        Error::new(
            ErrorKind::TemplateNotFound,
            format!("template {name:?} does not exist"),
        )
    }

    /// Attaches another error as source to this error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.repr.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.repr.kind
    }

    /// Returns the message detail if available.
    pub fn detail(&self) -> Option<&str> {
        self.repr.detail.as_deref()
    }

    /// Returns the name of the template that failed.
    pub fn name(&self) -> Option<&str> {
        self.repr.name.as_deref()
    }

    /// Returns the line number where the error occurred.
    pub fn line(&self) -> Option<usize> {
        self.repr.name.as_ref().map(|_| self.repr.lineno)
    }

    pub(crate) fn set_location(&mut self, name: &str, lineno: usize) {
        if self.repr.name.is_none() {
            self.repr.name = Some(name.into());
            self.repr.lineno = lineno;
        }
    }

    pub(crate) fn attach_template_source(&mut self, source: &str) {
        if self.repr.template_source.is_none() {
            self.repr.template_source = Some(source.to_string());
        }
    }

    fn source_context(&self) -> Option<String> {
        let source = self.repr.template_source.as_deref()?;
        let lineno = self.repr.lineno;
        if lineno == 0 {
            return None;
        }
        let mut rv = String::new();
        for (idx, line) in source.lines().enumerate() {
            let cur = idx + 1;
            if cur + 2 < lineno || cur > lineno + 2 {
                continue;
            }
            let marker = if cur == lineno { ">" } else { " " };
            rv.push_str(&format!("{marker} {cur:4} | {line}\n"));
        }
        if rv.ends_with('\n') {
            rv.pop();
        }
        Some(rv)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.repr.source.as_ref().map(|err| err.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            repr: Box::new(ErrorRepr {
                kind,
                detail: None,
                name: None,
                lineno: 0,
                source: None,
                template_source: None,
            }),
        }
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::new(ErrorKind::WriteFailure, "formatting failed")
    }
}

impl serde::ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::new(ErrorKind::BadSerialization, msg.to_string())
    }
}

// Errors may cross process boundaries when a compiled-template cache is
// shared, so they serialize into a plain record.
impl serde::Serialize for Error {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Error", 4)?;
        s.serialize_field("kind", self.kind().description())?;
        s.serialize_field("detail", &self.detail())?;
        s.serialize_field("name", &self.name())?;
        s.serialize_field("line", &self.line())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let mut err = Error::new(ErrorKind::SyntaxError, "unexpected end of input");
        err.set_location("hello.html", 4);
        assert_eq!(
            err.to_string(),
            "syntax error: unexpected end of input (in hello.html:4)"
        );
    }

    #[test]
    fn test_error_serializes() {
        let err = Error::new(ErrorKind::UnknownFilter, "filter frobnify is unknown");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("unknown filter"));
    }
}
