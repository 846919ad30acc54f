use std::borrow::Cow;
use std::sync::Arc;

use aho_corasick::{AhoCorasick, AhoCorasickKind, MatchKind};

use crate::error::{Error, ErrorKind};

/// The delimiter configuration for the environment and the parser.
///
/// The syntax can be configured at environment level and is applied to
/// all templates loaded afterwards:
///
/// ```
/// # use vellum::{Environment, Syntax};
/// let mut env = Environment::new();
/// env.set_syntax(
///     Syntax::default()
///         .with_block_delimiters("{%", "%}")
///         .with_variable_delimiters("${", "}")
///         .compile()
///         .unwrap(),
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub(crate) block_start: Cow<'static, str>,
    pub(crate) block_end: Cow<'static, str>,
    pub(crate) variable_start: Cow<'static, str>,
    pub(crate) variable_end: Cow<'static, str>,
    pub(crate) comment_start: Cow<'static, str>,
    pub(crate) comment_end: Cow<'static, str>,
    pub(crate) line_statement_prefix: Option<Cow<'static, str>>,
    pub(crate) line_comment_prefix: Option<Cow<'static, str>>,
}

impl Default for Syntax {
    fn default() -> Syntax {
        Syntax {
            block_start: Cow::Borrowed("{%"),
            block_end: Cow::Borrowed("%}"),
            variable_start: Cow::Borrowed("{{"),
            variable_end: Cow::Borrowed("}}"),
            comment_start: Cow::Borrowed("{#"),
            comment_end: Cow::Borrowed("#}"),
            line_statement_prefix: None,
            line_comment_prefix: None,
        }
    }
}

impl Syntax {
    /// Sets the block (statement) delimiters.
    pub fn with_block_delimiters(
        mut self,
        start: impl Into<Cow<'static, str>>,
        end: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.block_start = start.into();
        self.block_end = end.into();
        self
    }

    /// Sets the variable delimiters.
    pub fn with_variable_delimiters(
        mut self,
        start: impl Into<Cow<'static, str>>,
        end: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.variable_start = start.into();
        self.variable_end = end.into();
        self
    }

    /// Sets the comment delimiters.
    pub fn with_comment_delimiters(
        mut self,
        start: impl Into<Cow<'static, str>>,
        end: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.comment_start = start.into();
        self.comment_end = end.into();
        self
    }

    /// Enables line statements with the given prefix.
    pub fn with_line_statement_prefix(mut self, prefix: impl Into<Cow<'static, str>>) -> Self {
        self.line_statement_prefix = Some(prefix.into());
        self
    }

    /// Enables line comments with the given prefix.
    pub fn with_line_comment_prefix(mut self, prefix: impl Into<Cow<'static, str>>) -> Self {
        self.line_comment_prefix = Some(prefix.into());
        self
    }

    fn is_default_delimiters(&self) -> bool {
        self.block_start == "{%"
            && self.block_end == "%}"
            && self.variable_start == "{{"
            && self.variable_end == "}}"
            && self.comment_start == "{#"
            && self.comment_end == "#}"
    }

    /// Compiles the syntax into a [`SyntaxConfig`].
    ///
    /// This fails if a delimiter is empty or the start delimiters are
    /// not distinguishable from each other.
    pub fn compile(self) -> Result<SyntaxConfig, Error> {
        for delim in [
            &self.block_start,
            &self.block_end,
            &self.variable_start,
            &self.variable_end,
            &self.comment_start,
            &self.comment_end,
        ] {
            if delim.is_empty() {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "delimiters must not be empty",
                ));
            }
        }
        if self.block_start == self.variable_start
            || self.block_start == self.comment_start
            || self.variable_start == self.comment_start
        {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "start delimiters must be distinct",
            ));
        }

        let aho_corasick = if self.is_default_delimiters() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .kind(Some(AhoCorasickKind::DFA))
                    .match_kind(MatchKind::LeftmostLongest)
                    .build([
                        &self.variable_start as &str,
                        &self.block_start as &str,
                        &self.comment_start as &str,
                    ])
                    .map_err(|err| {
                        Error::new(ErrorKind::InvalidOperation, "invalid delimiters")
                            .with_source(err)
                    })?,
            )
        };

        Ok(SyntaxConfig(Arc::new(SyntaxConfigInternal {
            syntax: self,
            aho_corasick,
        })))
    }
}

/// A compiled syntax configuration.
///
/// Cheap to clone; shared between the environment and all templates
/// compiled with it.
#[derive(Debug, Clone)]
pub struct SyntaxConfig(pub(crate) Arc<SyntaxConfigInternal>);

#[derive(Debug)]
pub(crate) struct SyntaxConfigInternal {
    pub(crate) syntax: Syntax,
    pub(crate) aho_corasick: Option<AhoCorasick>,
}

impl Default for SyntaxConfig {
    fn default() -> SyntaxConfig {
        Syntax::default().compile().unwrap()
    }
}

impl SyntaxConfig {
    /// Returns the underlying syntax.
    pub fn syntax(&self) -> &Syntax {
        &self.0.syntax
    }
}

/// Marker for the three start delimiter kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StartMarker {
    Variable,
    Block,
    Comment,
}

impl SyntaxConfig {
    /// Finds the byte offset of the earliest start marker in `haystack`
    /// together with a flag whether it is followed by a `-`.
    pub(crate) fn find_start_marker(&self, haystack: &str) -> Option<(usize, bool)> {
        match self.0.aho_corasick {
            Some(ref ac) => {
                let bytes = haystack.as_bytes();
                ac.find(bytes)
                    .map(|m| (m.start(), bytes.get(m.end()).copied() == Some(b'-')))
            }
            None => find_start_marker_default(haystack),
        }
    }

    /// Matches a start marker at the beginning of `rest`.
    pub(crate) fn match_start_marker(&self, rest: &str) -> Option<(StartMarker, usize)> {
        let syntax = &self.0.syntax;
        if self.0.aho_corasick.is_none() {
            return match rest.get(..2) {
                Some("{{") => Some((StartMarker::Variable, 2)),
                Some("{%") => Some((StartMarker::Block, 2)),
                Some("{#") => Some((StartMarker::Comment, 2)),
                _ => None,
            };
        }
        // longest match wins so that prefix-overlapping custom
        // delimiters resolve the same way the scanner does
        let mut candidates = [
            (StartMarker::Variable, &syntax.variable_start),
            (StartMarker::Block, &syntax.block_start),
            (StartMarker::Comment, &syntax.comment_start),
        ];
        candidates.sort_by_key(|(_, delim)| std::cmp::Reverse(delim.len()));
        for (marker, delim) in candidates {
            if rest.starts_with(delim as &str) {
                return Some((marker, delim.len()));
            }
        }
        None
    }
}

fn find_start_marker_default(haystack: &str) -> Option<(usize, bool)> {
    let bytes = haystack.as_bytes();
    let mut offset = 0;
    loop {
        let idx = crate::utils::memchr(&bytes[offset..], b'{')?;
        if let Some(b'{' | b'%' | b'#') = bytes.get(offset + idx + 1).copied() {
            return Some((
                offset + idx,
                bytes.get(offset + idx + 2).copied() == Some(b'-'),
            ));
        }
        offset += idx + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_find_marker_default() {
        let syntax = SyntaxConfig::default();
        assert!(syntax.find_start_marker("{").is_none());
        assert!(syntax.find_start_marker("foo").is_none());
        assert!(syntax.find_start_marker("foo {").is_none());
        assert_eq!(syntax.find_start_marker("foo {{"), Some((4, false)));
        assert_eq!(syntax.find_start_marker("foo {{-"), Some((4, true)));
    }

    #[test]
    fn test_find_marker_custom() {
        let syntax = Syntax::default()
            .with_block_delimiters("%{", "}%")
            .with_variable_delimiters("[[", "]]")
            .with_comment_delimiters("/*", "*/")
            .compile()
            .unwrap();
        assert_eq!(syntax.find_start_marker("%{"), Some((0, false)));
        assert!(syntax.find_start_marker("/").is_none());
        assert!(syntax.find_start_marker("foo [").is_none());
        assert_eq!(syntax.find_start_marker("foo /*"), Some((4, false)));
        assert_eq!(syntax.find_start_marker("foo [[-"), Some((4, true)));
        assert_eq!(
            syntax.match_start_marker("[[ foo ]]"),
            Some((StartMarker::Variable, 2))
        );
    }

    #[test]
    fn test_invalid_syntax() {
        assert!(Syntax::default()
            .with_block_delimiters("", "%}")
            .compile()
            .is_err());
        assert!(Syntax::default()
            .with_variable_delimiters("{%", "}}")
            .compile()
            .is_err());
    }
}
