use std::char::decode_utf16;
use std::fmt;

use crate::error::{Error, ErrorKind};

pub(crate) fn memchr(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&x| x == needle)
}

pub(crate) fn memstr(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Helper for dealing with untrusted size hints.
#[inline(always)]
pub(crate) fn untrusted_size_hint(value: usize) -> usize {
    value.min(1024)
}

/// Controls the auto escaping behavior.
///
/// The environment picks the initial value per template via the auto
/// escape callback; `{% autoescape %}` blocks override it for a region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AutoEscape {
    /// Do not apply auto escaping.
    None,
    /// Use HTML auto escaping rules.
    ///
    /// The characters `&`, `<`, `>`, `"` and `'` are replaced with
    /// their named or numeric entity references.
    Html,
    /// Escaping rules suitable for JSON/JavaScript/YAML output.
    ///
    /// Values are serialized to JSON upon printing.
    Json,
}

/// Defines the behavior of undefined values in the engine.
///
/// These mirror the undefined classes of classic Jinja: the selected
/// behavior decides which undefined kind failed lookups produce.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum UndefinedBehavior {
    /// The default, somewhat lenient undefined behavior.
    ///
    /// * **printing:** allowed (returns empty string)
    /// * **iteration:** allowed (returns empty sequence)
    /// * **attribute access on undefined:** fails
    /// * **if truth check:** allowed (is considered false)
    #[default]
    Lenient,
    /// Like `Lenient`, but chains of attribute and item lookups on an
    /// undefined value produce further undefined values.
    Chainable,
    /// Like `Lenient`, but printing produces a diagnostic marker
    /// instead of an empty string.
    Debug,
    /// Every use of an undefined value fails, including truth checks.
    Strict,
}

/// Writes a value to the output, honoring the escape format.
///
/// Safe strings bypass escaping entirely.  Under JSON escaping the
/// value is serialized, under HTML escaping primitives pass through
/// unescaped since they cannot contain markup.
pub(crate) fn write_escaped(
    out: &mut crate::output::Output,
    auto_escape: AutoEscape,
    value: &crate::value::Value,
) -> Result<(), Error> {
    use crate::value::ValueKind;

    if value.is_safe() {
        return out
            .write_str(value.as_str().unwrap_or_default())
            .map_err(Error::from);
    }

    match auto_escape {
        AutoEscape::None => write!(out, "{value}").map_err(Error::from),
        AutoEscape::Html => {
            if let Some(s) = value.as_str() {
                write!(out, "{}", HtmlEscape(s)).map_err(Error::from)
            } else if matches!(
                value.kind(),
                ValueKind::Undefined | ValueKind::None | ValueKind::Bool | ValueKind::Number
            ) {
                write!(out, "{value}").map_err(Error::from)
            } else {
                write!(out, "{}", HtmlEscape(&value.to_string())).map_err(Error::from)
            }
        }
        AutoEscape::Json => {
            let value = serde_json::to_string(&value).map_err(|err| {
                Error::new(ErrorKind::BadSerialization, "unable to format to JSON")
                    .with_source(err)
            })?;
            write!(out, "{value}").map_err(Error::from)
        }
    }
}

/// Helper to HTML escape a string.
///
/// This happens the same way classic Jinja does it: the five relevant
/// characters are replaced with entity references, everything else is
/// passed through verbatim.
pub struct HtmlEscape<'a>(pub &'a str);

impl fmt::Display for HtmlEscape<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        let mut start = 0;

        for (i, b) in bytes.iter().enumerate() {
            macro_rules! escaping_body {
                ($quote:expr) => {{
                    if start < i {
                        // SAFETY: only pushes complete utf-8 sequences since
                        // the escaped characters are single byte.
                        f.write_str(unsafe { std::str::from_utf8_unchecked(&bytes[start..i]) })?;
                    }
                    f.write_str($quote)?;
                    start = i + 1;
                }};
            }
            match *b {
                b'<' => escaping_body!("&lt;"),
                b'>' => escaping_body!("&gt;"),
                b'&' => escaping_body!("&amp;"),
                b'"' => escaping_body!("&quot;"),
                b'\'' => escaping_body!("&#x27;"),
                _ => (),
            }
        }

        if start < bytes.len() {
            // SAFETY: see above
            f.write_str(unsafe { std::str::from_utf8_unchecked(&bytes[start..]) })
        } else {
            Ok(())
        }
    }
}

struct Unescaper {
    out: String,
    pending_surrogate: u16,
}

impl Unescaper {
    fn unescape(mut self, s: &str) -> Result<String, Error> {
        let mut char_iter = s.chars();

        while let Some(c) = char_iter.next() {
            if c == '\\' {
                match char_iter.next() {
                    None => return Err(ErrorKind::BadEscape.into()),
                    Some(d) => match d {
                        '"' | '\\' | '/' | '\'' => self.push_char(d)?,
                        'b' => self.push_char('\x08')?,
                        'f' => self.push_char('\x0C')?,
                        'n' => self.push_char('\n')?,
                        'r' => self.push_char('\r')?,
                        't' => self.push_char('\t')?,
                        'u' => {
                            let val = self.parse_u16(&mut char_iter)?;
                            self.push_u16(val)?;
                        }
                        _ => return Err(ErrorKind::BadEscape.into()),
                    },
                }
            } else {
                self.push_char(c)?;
            }
        }

        if self.pending_surrogate != 0 {
            Err(ErrorKind::BadEscape.into())
        } else {
            Ok(self.out)
        }
    }

    fn parse_u16(&self, chars: &mut std::str::Chars<'_>) -> Result<u16, Error> {
        let hexnum = chars.chain(std::iter::repeat('\0')).take(4).collect::<String>();
        u16::from_str_radix(&hexnum, 16).map_err(|_| ErrorKind::BadEscape.into())
    }

    fn push_u16(&mut self, c: u16) -> Result<(), Error> {
        match (self.pending_surrogate, (0xD800..=0xDFFF).contains(&c)) {
            (0, false) => match decode_utf16(std::iter::once(c)).next() {
                Some(Ok(c)) => self.out.push(c),
                _ => return Err(ErrorKind::BadEscape.into()),
            },
            (_, false) => return Err(ErrorKind::BadEscape.into()),
            (0, true) => self.pending_surrogate = c,
            (prev, true) => match decode_utf16([prev, c].into_iter()).next() {
                Some(Ok(c)) => {
                    self.out.push(c);
                    self.pending_surrogate = 0;
                }
                _ => return Err(ErrorKind::BadEscape.into()),
            },
        }
        Ok(())
    }

    fn push_char(&mut self, c: char) -> Result<(), Error> {
        if self.pending_surrogate != 0 {
            Err(ErrorKind::BadEscape.into())
        } else {
            self.out.push(c);
            Ok(())
        }
    }
}

/// Un-escape a string, following JSON rules plus single quote escapes.
pub(crate) fn unescape(s: &str) -> Result<String, Error> {
    Unescaper {
        out: String::new(),
        pending_surrogate: 0,
    }
    .unescape(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            HtmlEscape("<a href=\"x\">&'y'</a>").to_string(),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;y&#x27;&lt;/a&gt;"
        );
        assert_eq!(HtmlEscape("plain text").to_string(), "plain text");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"foo\u2603bar").unwrap(), "foo\u{2603}bar");
        assert_eq!(unescape(r"\t\b\f\r\n\\\/").unwrap(), "\t\x08\x0c\r\n\\/");
        assert_eq!(unescape("foobarbaz").unwrap(), "foobarbaz");
        assert_eq!(unescape(r"💩").unwrap(), "💩");
        assert!(unescape(r"\ud83d").is_err());
        assert!(unescape(r"\q").is_err());
    }
}
