//! The built-in filter collection.
//!
//! Filters are applied to values with the pipe operator.  A filter
//! receives the [`State`], then the piped value followed by any extra
//! arguments; keyword arguments arrive as a trailing kwargs map.
//! Custom filters are registered with
//! [`Environment::add_filter`](crate::Environment::add_filter).

use std::fmt::Write as _;
use std::sync::Arc;

use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::utils::HtmlEscape;
use crate::value::{
    ops, Enumerator, Object, ObjectRepr, UndefinedKind, Value, ValueKind, ValueMap,
};

/// A type erased filter function.
#[derive(Clone)]
pub struct BoxedFilter(Arc<dyn Fn(&State, &[Value]) -> Result<Value, Error> + Send + Sync>);

impl BoxedFilter {
    pub(crate) fn new<F>(f: F) -> BoxedFilter
    where
        F: Fn(&State, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        BoxedFilter(Arc::new(f))
    }

    pub(crate) fn call(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        (self.0)(state, args)
    }
}

/// Helper that splits filter arguments into the piped value,
/// positional arguments and keyword arguments.
pub(crate) struct FilterArgs<'a> {
    positional: &'a [Value],
    kwargs: Option<&'a ValueMap>,
}

impl<'a> FilterArgs<'a> {
    pub fn new(args: &'a [Value]) -> FilterArgs<'a> {
        match args.last() {
            Some(last) if last.is_kwargs() => FilterArgs {
                positional: &args[..args.len() - 1],
                kwargs: last.as_map(),
            },
            _ => FilterArgs {
                positional: args,
                kwargs: None,
            },
        }
    }

    /// The piped value.
    pub fn piped(&self) -> Value {
        self.positional.first().cloned().unwrap_or(Value::UNDEFINED)
    }

    /// A positional-or-keyword argument; index 1 is the first argument
    /// after the piped value.
    pub fn get(&self, idx: usize, name: &str) -> Option<Value> {
        if let Some(value) = self.positional.get(idx) {
            return Some(value.clone());
        }
        self.kwarg(name)
    }

    /// A keyword-only argument.
    pub fn kwarg(&self, name: &str) -> Option<Value> {
        self.kwargs
            .and_then(|kwargs| kwargs.get(&Value::from(name)).cloned())
    }
}

/// Fails on strict undefined values, otherwise stringifies.
fn coerce_str(value: &Value) -> Result<String, Error> {
    if value.undefined_kind() == Some(UndefinedKind::Strict) {
        return Err(value.undefined_error());
    }
    Ok(value.to_string())
}

fn iterable(value: &Value) -> Result<Vec<Value>, Error> {
    if value.undefined_kind() == Some(UndefinedKind::Strict) {
        return Err(value.undefined_error());
    }
    Ok(value.try_iter()?.collect())
}

/// Marks a value as safe for the output format.
pub fn safe(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    if piped.is_safe() {
        return Ok(piped);
    }
    Ok(Value::from_safe_string(coerce_str(&piped)?))
}

/// HTML escapes a string.
///
/// An input already marked safe passes through unchanged.
pub fn escape(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    if piped.is_safe() {
        return Ok(piped);
    }
    Ok(Value::from_safe_string(
        HtmlEscape(&coerce_str(&piped)?).to_string(),
    ))
}

/// Escapes even values that are already marked safe.
pub fn forceescape(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(Value::from_safe_string(
        HtmlEscape(&coerce_str(&args.piped())?).to_string(),
    ))
}

/// Converts a value to uppercase.
pub fn upper(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(Value::from(coerce_str(&args.piped())?.to_uppercase()))
}

/// Converts a value to lowercase.
pub fn lower(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(Value::from(coerce_str(&args.piped())?.to_lowercase()))
}

/// Converts a value to title case.
pub fn title(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let mut rv = String::with_capacity(s.len());
    let mut capitalize = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if capitalize {
                rv.extend(c.to_uppercase());
                capitalize = false;
            } else {
                rv.extend(c.to_lowercase());
            }
        } else {
            rv.push(c);
            capitalize = true;
        }
    }
    Ok(Value::from(rv))
}

/// Capitalizes a string: first character upper, the rest lower.
pub fn capitalize(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let mut chars = s.chars();
    let rv = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    Ok(Value::from(rv))
}

/// Strips leading and trailing whitespace or the given characters.
pub fn trim(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let rv = match args.get(1, "chars") {
        Some(chars) => {
            let chars = chars.to_string().chars().collect::<Vec<_>>();
            s.trim_matches(|c| chars.contains(&c)).to_string()
        }
        None => s.trim().to_string(),
    };
    Ok(Value::from(rv))
}

/// Removes HTML tags and normalizes whitespace.
pub fn striptags(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let mut rv = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => rv.push(c),
            _ => {}
        }
    }
    Ok(Value::from(
        rv.split_whitespace().collect::<Vec<_>>().join(" "),
    ))
}

/// Truncates a string to the given length.
///
/// If the string is within the length plus the configured leeway it
/// stays untouched.  Unless `killwords` is set the cut happens at the
/// last word boundary, then the `end` marker is appended.
pub fn truncate(state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let length = args.get(1, "length").and_then(|x| x.as_usize()).unwrap_or(255);
    let killwords = args
        .get(2, "killwords")
        .map(|x| x.is_true())
        .unwrap_or(false);
    let end = args
        .get(3, "end")
        .map(|x| x.to_string())
        .unwrap_or_else(|| "...".to_string());
    let leeway = args
        .get(4, "leeway")
        .and_then(|x| x.as_usize())
        .unwrap_or(state.env().policies().truncate_leeway);

    let chars = s.chars().collect::<Vec<_>>();
    if chars.len() <= length + leeway {
        return Ok(Value::from(s));
    }
    if length < end.chars().count() {
        return Err(Error::new(
            ErrorKind::InvalidArguments,
            "expected length >= length of the end marker",
        ));
    }
    let cut = length - end.chars().count();
    let mut rv: String = chars[..cut].iter().collect();
    if !killwords {
        if let Some(idx) = rv.rfind(' ') {
            rv.truncate(idx);
        }
    }
    rv.push_str(&end);
    Ok(Value::from(rv))
}

/// Counts the words in a string.
pub fn wordcount(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    Ok(Value::from(s.split_whitespace().count() as u64))
}

/// Wraps text to the given width.
pub fn wordwrap(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let width = args.get(1, "width").and_then(|x| x.as_usize()).unwrap_or(79);
    let wrapstring = args
        .get(3, "wrapstring")
        .map(|x| x.to_string())
        .unwrap_or_else(|| "\n".to_string());

    let mut lines = Vec::new();
    for paragraph in s.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            if line.is_empty() {
                line.push_str(word);
            } else if line.chars().count() + 1 + word.chars().count() <= width {
                line.push(' ');
                line.push_str(word);
            } else {
                lines.push(std::mem::take(&mut line));
                line.push_str(word);
            }
        }
        lines.push(line);
    }
    Ok(Value::from(lines.join(&wrapstring)))
}

/// Replaces occurrences of a substring.
pub fn replace(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let old = args
        .get(1, "old")
        .map(|x| x.to_string())
        .ok_or_else(|| Error::new(ErrorKind::InvalidArguments, "replace requires a substring"))?;
    let new = args
        .get(2, "new")
        .map(|x| x.to_string())
        .ok_or_else(|| Error::new(ErrorKind::InvalidArguments, "replace requires a replacement"))?;
    let rv = match args.get(3, "count").and_then(|x| x.as_usize()) {
        Some(count) => s.replacen(&old, &new, count),
        None => s.replace(&old, &new),
    };
    Ok(Value::from(rv))
}

/// Centers a value in a field of the given width.
pub fn center(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let width = args.get(1, "width").and_then(|x| x.as_usize()).unwrap_or(80);
    let len = s.chars().count();
    if len >= width {
        return Ok(Value::from(s));
    }
    let total = width - len;
    let left = total / 2;
    let mut rv = " ".repeat(left);
    rv.push_str(&s);
    rv.push_str(&" ".repeat(total - left));
    Ok(Value::from(rv))
}

/// Indents every line of a string.
///
/// By default the first line is not indented and blank lines are left
/// alone.
pub fn indent(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let width = args.get(1, "width").and_then(|x| x.as_usize()).unwrap_or(4);
    let indent_first = args
        .get(2, "first")
        .map(|x| x.is_true())
        .unwrap_or(false);
    let indent_blank = args
        .get(3, "blank")
        .map(|x| x.is_true())
        .unwrap_or(false);
    let pad = " ".repeat(width);

    let mut rv = String::new();
    for (idx, line) in s.split('\n').enumerate() {
        if idx > 0 {
            rv.push('\n');
        }
        let skip = (idx == 0 && !indent_first) || (line.trim().is_empty() && !indent_blank);
        if !skip && !line.is_empty() {
            rv.push_str(&pad);
        }
        rv.push_str(line);
    }
    Ok(Value::from(rv))
}

const URL_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes a value for use in URLs.
///
/// Maps serialize into query-string pairs.
pub fn urlencode(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    if piped.kind() == ValueKind::Map {
        let mut rv = String::new();
        for (idx, key) in piped.try_iter()?.enumerate() {
            if idx > 0 {
                rv.push('&');
            }
            let value = piped.get_item_opt(&key).unwrap_or(Value::UNDEFINED);
            write!(
                rv,
                "{}={}",
                percent_encode(key.to_string().as_bytes(), URL_SAFE),
                percent_encode(value.to_string().as_bytes(), URL_SAFE)
            )
            .ok();
        }
        Ok(Value::from(rv))
    } else {
        Ok(Value::from(
            percent_encode(coerce_str(&piped)?.as_bytes(), URL_SAFE).to_string(),
        ))
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Detects an email address: word characters around a single `@`, a
/// domain starting with a word character and a pure word-character
/// TLD.  Deliberately strict so that scanning never backtracks.
fn looks_like_email(word: &str) -> bool {
    let mut parts = word.splitn(2, '@');
    let local = match parts.next() {
        Some(local) if !local.is_empty() => local,
        _ => return false,
    };
    let domain = match parts.next() {
        Some(domain) => domain,
        None => return false,
    };
    if !local.chars().all(|c| is_word_char(c) || c == '.' || c == '-' || c == '+') {
        return false;
    }
    if !domain.starts_with(is_word_char) {
        return false;
    }
    let (host, tld) = match domain.rsplit_once('.') {
        Some(rv) => rv,
        None => return false,
    };
    !host.is_empty() && !tld.is_empty() && tld.chars().all(is_word_char)
}

/// Converts URLs and email addresses in text into clickable links.
pub fn urlize(state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let s = coerce_str(&args.piped())?;
    let policies = state.env().policies();
    let mut rel = policies.urlize_rel.clone();
    if args
        .get(2, "nofollow")
        .map(|x| x.is_true())
        .unwrap_or(false)
        && !rel.contains("nofollow")
    {
        rel.push_str(" nofollow");
    }
    let target_attr = match policies.urlize_target {
        Some(ref target) => format!(" target=\"{}\"", HtmlEscape(target)),
        None => String::new(),
    };

    let mut rv = String::new();
    for (idx, word) in s.split(' ').enumerate() {
        if idx > 0 {
            rv.push(' ');
        }
        let is_url = word.starts_with("http://")
            || word.starts_with("https://")
            || policies
                .urlize_extra_schemes
                .iter()
                .any(|scheme| word.starts_with(scheme.as_str()));
        if is_url {
            write!(
                rv,
                "<a href=\"{url}\" rel=\"{rel}\"{target_attr}>{url}</a>",
                url = HtmlEscape(word),
                rel = HtmlEscape(&rel),
            )
            .ok();
        } else if word.starts_with("mailto:") {
            let address = &word["mailto:".len()..];
            write!(
                rv,
                "<a href=\"mailto:{addr}\">{addr}</a>",
                addr = HtmlEscape(address)
            )
            .ok();
        } else if looks_like_email(word) {
            write!(
                rv,
                "<a href=\"mailto:{addr}\">{addr}</a>",
                addr = HtmlEscape(word)
            )
            .ok();
        } else {
            write!(rv, "{}", HtmlEscape(word)).ok();
        }
    }
    Ok(Value::from_safe_string(rv))
}

/// Applies printf-style formatting.
///
/// Supports `%s`, `%d`, `%f` and `%%`; field access into arguments is
/// not part of the format language, which keeps the filter inert in
/// sandboxed environments.
pub fn format(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let parsed = FilterArgs::new(args);
    let fmt = coerce_str(&parsed.piped())?;
    let mut arg_idx = 1;
    let mut rv = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            rv.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => rv.push('%'),
            Some(spec @ ('s' | 'd' | 'f')) => {
                let value = parsed.get(arg_idx, "").ok_or_else(|| {
                    Error::new(ErrorKind::InvalidArguments, "not enough format arguments")
                })?;
                arg_idx += 1;
                match spec {
                    's' => write!(rv, "{value}").ok(),
                    'd' => write!(rv, "{}", value.as_i64().unwrap_or(0)).ok(),
                    'f' => write!(rv, "{}", ops::as_f64(&value).unwrap_or(0.0)).ok(),
                    _ => unreachable!(),
                };
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidArguments,
                    "unsupported format directive",
                ))
            }
        }
    }
    Ok(Value::from(rv))
}

/// Converts a value into a string.
pub fn string(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    if piped.kind() == ValueKind::String {
        return Ok(piped);
    }
    Ok(Value::from(coerce_str(&piped)?))
}

/// Converts a value into a boolean.
pub fn bool(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(Value::from(args.piped().is_true()))
}

/// Returns the length of the value.
pub fn length(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    piped.len().map(Value::from).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot compute the length of a value of type {}", piped.kind()),
        )
    })
}

/// Returns the first item of a sequence or the first character of a
/// string.
pub fn first(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(args
        .piped()
        .try_iter()?
        .next()
        .unwrap_or(Value::UNDEFINED))
}

/// Returns the last item.
pub fn last(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(args
        .piped()
        .try_iter()?
        .last()
        .unwrap_or(Value::UNDEFINED))
}

fn sort_key(value: &Value, attribute: Option<&str>, case_sensitive: bool) -> Value {
    let mut key = value.clone();
    if let Some(path) = attribute {
        for part in path.split('.') {
            key = key.get_attr_fast(part).unwrap_or(Value::UNDEFINED);
        }
    }
    if !case_sensitive {
        if let Some(s) = key.as_str() {
            return Value::from(s.to_lowercase());
        }
    }
    key
}

/// Returns the smallest item.
pub fn min(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(iterable(&args.piped())?
        .into_iter()
        .min_by_key(|x| sort_key(x, None, false))
        .unwrap_or(Value::UNDEFINED))
}

/// Returns the largest item.
pub fn max(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(iterable(&args.piped())?
        .into_iter()
        .max_by_key(|x| sort_key(x, None, false))
        .unwrap_or(Value::UNDEFINED))
}

/// Sums the items of a sequence.
pub fn sum(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let attribute = args.get(1, "attribute").map(|x| x.to_string());
    let mut rv = args.get(2, "start").unwrap_or(Value::from(0));
    for item in iterable(&args.piped())? {
        let item = match attribute {
            Some(ref path) => sort_key(&item, Some(path), true),
            None => item,
        };
        rv = ops::add(&rv, &item)?;
    }
    Ok(rv)
}

/// Sorts a sequence.
///
/// Strings compare case-insensitively unless `case_sensitive` is set;
/// `attribute` sorts by a dotted attribute path, `reverse` flips the
/// order.
pub fn sort(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let reverse = args
        .get(1, "reverse")
        .map(|x| x.is_true())
        .unwrap_or(false);
    let case_sensitive = args
        .get(2, "case_sensitive")
        .map(|x| x.is_true())
        .unwrap_or(false);
    let attribute = args.get(3, "attribute").map(|x| x.to_string());

    let mut items = iterable(&args.piped())?;
    items.sort_by_cached_key(|x| sort_key(x, attribute.as_deref(), case_sensitive));
    if reverse {
        items.reverse();
    }
    Ok(Value::from(items))
}

/// Reverses a sequence or string.
pub fn reverse(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    if let Some(s) = piped.as_str() {
        return Ok(Value::from(s.chars().rev().collect::<String>()));
    }
    let mut items = iterable(&piped)?;
    items.reverse();
    Ok(Value::from(items))
}

/// Removes duplicates, preserving order.
pub fn unique(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let case_sensitive = args
        .get(1, "case_sensitive")
        .map(|x| x.is_true())
        .unwrap_or(false);
    let attribute = args.get(2, "attribute").map(|x| x.to_string());
    let mut seen = Vec::new();
    let mut rv = Vec::new();
    for item in iterable(&args.piped())? {
        let key = sort_key(&item, attribute.as_deref(), case_sensitive);
        if !seen.contains(&key) {
            seen.push(key);
            rv.push(item);
        }
    }
    Ok(Value::from(rv))
}

/// The element type `groupby` produces: indexable like a two-tuple
/// and exposing `grouper` and `list` attributes.
#[derive(Debug)]
struct GroupTuple {
    grouper: Value,
    list: Value,
}

impl Object for GroupTuple {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Seq
    }

    fn get_index(&self, idx: usize) -> Option<Value> {
        match idx {
            0 => Some(self.grouper.clone()),
            1 => Some(self.list.clone()),
            _ => None,
        }
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "grouper" => Some(self.grouper.clone()),
            "list" => Some(self.list.clone()),
            _ => None,
        }
    }

    fn enumerate(&self) -> Enumerator {
        Enumerator::Seq(2)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Groups a sequence of objects by an attribute.
pub fn groupby(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let attribute = args
        .get(1, "attribute")
        .map(|x| x.to_string())
        .ok_or_else(|| Error::new(ErrorKind::InvalidArguments, "groupby requires an attribute"))?;
    let case_sensitive = args
        .get(3, "case_sensitive")
        .map(|x| x.is_true())
        .unwrap_or(true);

    let mut items = iterable(&args.piped())?;
    items.sort_by_cached_key(|x| sort_key(x, Some(&attribute), case_sensitive));

    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for item in items {
        let key = sort_key(&item, Some(&attribute), case_sensitive);
        match groups.last_mut() {
            Some((grouper, list)) if *grouper == key => list.push(item),
            _ => groups.push((key, vec![item])),
        }
    }
    Ok(Value::from(
        groups
            .into_iter()
            .map(|(grouper, list)| {
                Value::from_object(GroupTuple {
                    grouper,
                    list: Value::from(list),
                })
            })
            .collect::<Vec<_>>(),
    ))
}

/// Batches items into chunks of the given size.
pub fn batch(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let count = args
        .get(1, "linecount")
        .and_then(|x| x.as_usize())
        .filter(|&x| x > 0)
        .ok_or_else(|| Error::new(ErrorKind::InvalidArguments, "batch requires a positive count"))?;
    let fill_with = args.get(2, "fill_with");

    let mut rv = Vec::new();
    let mut chunk = Vec::with_capacity(count);
    for item in iterable(&args.piped())? {
        chunk.push(item);
        if chunk.len() == count {
            rv.push(Value::from(std::mem::take(&mut chunk)));
        }
    }
    if !chunk.is_empty() {
        if let Some(ref fill) = fill_with {
            while chunk.len() < count {
                chunk.push(fill.clone());
            }
        }
        rv.push(Value::from(chunk));
    }
    Ok(Value::from(rv))
}

/// Slices a sequence into the given number of columns.
pub fn slice(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let count = args
        .get(1, "slices")
        .and_then(|x| x.as_usize())
        .filter(|&x| x > 0)
        .ok_or_else(|| Error::new(ErrorKind::InvalidArguments, "slice requires a positive count"))?;
    let fill_with = args.get(2, "fill_with");

    let items = iterable(&args.piped())?;
    let items_per_slice = items.len() / count;
    let slices_with_extra = items.len() % count;
    let mut offset = 0;
    let mut rv = Vec::with_capacity(count);
    for slice_number in 0..count {
        let this_len = items_per_slice + (slice_number < slices_with_extra) as usize;
        let mut column = items[offset..offset + this_len].to_vec();
        offset += this_len;
        if slice_number >= slices_with_extra && slices_with_extra > 0 {
            if let Some(ref fill) = fill_with {
                column.push(fill.clone());
            }
        }
        rv.push(Value::from(column));
    }
    Ok(Value::from(rv))
}

/// Joins items with a separator.
pub fn join(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let sep = args.get(1, "d").map(|x| x.to_string()).unwrap_or_default();
    let rv = iterable(&args.piped())?
        .into_iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(&sep);
    Ok(Value::from(rv))
}

/// Materializes the value into a list.
pub fn list(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(Value::from(iterable(&args.piped())?))
}

/// Applies a filter to every item or extracts an attribute from each.
///
/// `x|map("upper")` dispatches the named filter per item,
/// `x|map(attribute="field", default=...)` extracts attributes.
pub fn map(state: &State, args: &[Value]) -> Result<Value, Error> {
    let parsed = FilterArgs::new(args);
    if let Some(attribute) = parsed.kwarg("attribute") {
        let path = attribute.to_string();
        let default = parsed.kwarg("default");
        let mut rv = Vec::new();
        for item in iterable(&parsed.piped())? {
            let mut value = sort_key(&item, Some(&path), true);
            if value.is_undefined() {
                if let Some(ref default) = default {
                    value = default.clone();
                }
            }
            rv.push(value);
        }
        return Ok(Value::from(rv));
    }
    let filter_name = parsed
        .get(1, "")
        .and_then(|x| x.as_str().map(|s| s.to_string()))
        .ok_or_else(|| Error::new(ErrorKind::InvalidArguments, "map requires a filter name"))?;
    let extra = parsed.positional.get(2..).unwrap_or_default().to_vec();
    let mut rv = Vec::new();
    for item in iterable(&parsed.piped())? {
        let mut call_args = vec![item];
        call_args.extend(extra.iter().cloned());
        rv.push(state.apply_filter(&filter_name, &call_args)?);
    }
    Ok(Value::from(rv))
}

fn select_impl(
    state: &State,
    args: &[Value],
    invert: bool,
    by_attr: bool,
) -> Result<Value, Error> {
    let parsed = FilterArgs::new(args);
    let mut idx = 1;
    let attribute = if by_attr {
        let rv = parsed
            .get(idx, "attribute")
            .map(|x| x.to_string())
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidArguments, "an attribute name is required")
            })?;
        idx += 1;
        Some(rv)
    } else {
        None
    };
    let test_name = parsed.get(idx, "").and_then(|x| x.as_str().map(|s| s.to_string()));
    let extra = if test_name.is_some() {
        parsed.positional.get(idx + 1..).unwrap_or_default().to_vec()
    } else {
        Vec::new()
    };

    let mut rv = Vec::new();
    for item in iterable(&parsed.piped())? {
        let probe = match attribute {
            Some(ref path) => sort_key(&item, Some(path), true),
            None => item.clone(),
        };
        let keep = match test_name {
            Some(ref name) => {
                let mut test_args = vec![probe];
                test_args.extend(extra.iter().cloned());
                state.perform_test(name, &test_args)?
            }
            None => probe.is_true(),
        };
        if keep != invert {
            rv.push(item);
        }
    }
    Ok(Value::from(rv))
}

/// Keeps the items that pass a test (or that are truthy).
pub fn select(state: &State, args: &[Value]) -> Result<Value, Error> {
    select_impl(state, args, false, false)
}

/// Drops the items that pass a test (or that are truthy).
pub fn reject(state: &State, args: &[Value]) -> Result<Value, Error> {
    select_impl(state, args, true, false)
}

/// Keeps items whose attribute passes a test.
pub fn selectattr(state: &State, args: &[Value]) -> Result<Value, Error> {
    select_impl(state, args, false, true)
}

/// Drops items whose attribute passes a test.
pub fn rejectattr(state: &State, args: &[Value]) -> Result<Value, Error> {
    select_impl(state, args, true, true)
}

/// Sorts a map and returns `[key, value]` pairs.
pub fn dictsort(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    let case_sensitive = args
        .get(1, "case_sensitive")
        .map(|x| x.is_true())
        .unwrap_or(false);
    let by_value = match args.get(2, "by") {
        Some(by) => match by.as_str() {
            Some("key") => false,
            Some("value") => true,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidArguments,
                    "dictsort by must be 'key' or 'value'",
                ))
            }
        },
        None => false,
    };
    let reverse = args
        .get(3, "reverse")
        .map(|x| x.is_true())
        .unwrap_or(false);

    if piped.kind() != ValueKind::Map {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dictsort requires a map",
        ));
    }
    let mut pairs = Vec::new();
    for key in piped.try_iter()? {
        let value = piped.get_item_opt(&key).unwrap_or(Value::UNDEFINED);
        pairs.push((key, value));
    }
    pairs.sort_by_cached_key(|(key, value)| {
        sort_key(if by_value { value } else { key }, None, case_sensitive)
    });
    if reverse {
        pairs.reverse();
    }
    Ok(Value::from(
        pairs
            .into_iter()
            .map(|(key, value)| Value::from(vec![key, value]))
            .collect::<Vec<_>>(),
    ))
}

/// Returns the `[key, value]` pairs of a map.
pub fn items(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    if piped.is_undefined() && piped.undefined_kind() != Some(UndefinedKind::Strict) {
        return Ok(Value::from(Vec::<Value>::new()));
    }
    if piped.kind() != ValueKind::Map {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "items requires a map",
        ));
    }
    let mut rv = Vec::new();
    for key in piped.try_iter()? {
        let value = piped.get_item_opt(&key).unwrap_or(Value::UNDEFINED);
        rv.push(Value::from(vec![key, value]));
    }
    Ok(Value::from(rv))
}

/// Returns the absolute value of a number.
pub fn abs(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    if let Some(int) = piped.as_i64() {
        if piped.is_integer() || piped.kind() == ValueKind::Bool {
            return Ok(Value::from(int.abs()));
        }
    }
    match ops::as_f64(&piped) {
        Some(val) => Ok(Value::from(val.abs())),
        None => Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot round a value that is not a number",
        )),
    }
}

/// Rounds a number to the given precision.
pub fn round(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    let precision = args
        .get(1, "precision")
        .and_then(|x| x.as_i64())
        .unwrap_or(0) as i32;
    let method = args
        .get(2, "method")
        .map(|x| x.to_string())
        .unwrap_or_else(|| "common".to_string());
    let value = ops::as_f64(&piped).ok_or_else(|| {
        Error::new(ErrorKind::InvalidOperation, "cannot round a value that is not a number")
    })?;
    let factor = 10f64.powi(precision);
    let scaled = value * factor;
    let rounded = match method.as_str() {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidArguments,
                "round method must be common, ceil or floor",
            ))
        }
    };
    Ok(Value::from(rounded / factor))
}

/// Converts a value into an integer.
pub fn int(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    let default = args.get(1, "default").and_then(|x| x.as_i64()).unwrap_or(0);
    let rv = match piped.as_i64() {
        Some(int) => int,
        None => match piped.as_str() {
            Some(s) => s
                .trim()
                .parse::<i64>()
                .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
                .unwrap_or(default),
            None => match ops::as_f64(&piped) {
                Some(f) => f as i64,
                None => default,
            },
        },
    };
    Ok(Value::from(rv))
}

/// Converts a value into a float.
pub fn float(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    let default = args
        .get(1, "default")
        .and_then(|x| ops::as_f64(&x))
        .unwrap_or(0.0);
    let rv = match ops::as_f64(&piped) {
        Some(f) => f,
        None => match piped.as_str() {
            Some(s) => s.trim().parse::<f64>().unwrap_or(default),
            None => default,
        },
    };
    Ok(Value::from(rv))
}

/// Formats a number of bytes into a human readable size.
pub fn filesizeformat(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let binary = args.get(1, "binary").map(|x| x.is_true()).unwrap_or(false);
    let bytes = ops::as_f64(&args.piped()).unwrap_or(0.0);
    let base: f64 = if binary { 1024.0 } else { 1000.0 };
    let prefixes = if binary {
        ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"]
    } else {
        ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"]
    };
    if bytes == 1.0 {
        return Ok(Value::from("1 Byte"));
    }
    if bytes.abs() < base {
        return Ok(Value::from(format!("{} Bytes", bytes as i64)));
    }
    let mut size = bytes;
    for (idx, prefix) in prefixes.iter().enumerate() {
        size = bytes / base.powi(idx as i32 + 1);
        if size.abs() < base || idx == prefixes.len() - 1 {
            return Ok(Value::from(format!("{size:.1} {prefix}")));
        }
    }
    unreachable!()
}

fn json_escape_for_html(serialized: &str) -> String {
    let mut rv = String::with_capacity(serialized.len());
    for c in serialized.chars() {
        match c {
            '<' => rv.push_str("\\u003c"),
            '>' => rv.push_str("\\u003e"),
            '&' => rv.push_str("\\u0026"),
            '\'' => rv.push_str("\\u0027"),
            c => rv.push(c),
        }
    }
    rv
}

/// Serializes a value to JSON.
///
/// Characters that could terminate a script context are escaped, so
/// the result is safe to embed in HTML.
pub fn tojson(state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    if let Some(ref dumps) = state.env().policies().json_dumps {
        return Ok(Value::from_safe_string(json_escape_for_html(&dumps(
            &piped,
        )?)));
    }
    let indent = args.get(1, "indent").and_then(|x| x.as_usize());
    let serialized = match indent {
        Some(indent) => {
            let mut out = Vec::new();
            let indent_bytes = " ".repeat(indent);
            let fmt = serde_json::ser::PrettyFormatter::with_indent(indent_bytes.as_bytes());
            let mut ser = serde_json::Serializer::with_formatter(&mut out, fmt);
            serde::Serialize::serialize(&piped, &mut ser)
                .ok()
                .and_then(|_| String::from_utf8(out).ok())
        }
        None => serde_json::to_string(&piped).ok(),
    };
    match serialized {
        Some(serialized) => Ok(Value::from_safe_string(json_escape_for_html(&serialized))),
        None => Err(Error::new(
            ErrorKind::BadSerialization,
            "value cannot be serialized to JSON",
        )),
    }
}

/// Pretty-prints a value for debugging.
pub fn pprint(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    Ok(Value::from(format!("{:#?}", args.piped())))
}

/// Renders a map as XML/HTML attributes.
pub fn xmlattr(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    let autospace = args.get(1, "autospace").map(|x| x.is_true()).unwrap_or(true);
    if piped.kind() != ValueKind::Map {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "xmlattr requires a map",
        ));
    }
    let mut rv = String::new();
    for key in piped.try_iter()? {
        let value = piped.get_item_opt(&key).unwrap_or(Value::UNDEFINED);
        if value.is_undefined() || value.is_none() {
            continue;
        }
        let key = key.to_string();
        if key.is_empty()
            || key
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '>' | '=' | '<' | '"' | '\''))
        {
            return Err(Error::new(
                ErrorKind::InvalidArguments,
                format!("invalid character in attribute name {key:?}"),
            ));
        }
        if !rv.is_empty() {
            rv.push(' ');
        }
        write!(
            rv,
            "{}=\"{}\"",
            key,
            HtmlEscape(&value.to_string())
        )
        .ok();
    }
    if autospace && !rv.is_empty() {
        rv.insert(0, ' ');
    }
    Ok(Value::from_safe_string(rv))
}

/// Looks up an attribute on an object.
///
/// Unlike subscript syntax this only performs attribute lookup, never
/// item lookup.
pub fn attr(state: &State, args: &[Value]) -> Result<Value, Error> {
    let parsed = FilterArgs::new(args);
    let piped = parsed.piped();
    let name = parsed
        .get(1, "name")
        .map(|x| x.to_string())
        .ok_or_else(|| Error::new(ErrorKind::InvalidArguments, "attr requires a name"))?;
    if let Some(sandbox) = state.env().sandbox() {
        let value = piped.get_attr_fast(&name);
        if !sandbox.is_safe_attribute(&piped, &name, value.as_ref().unwrap_or(&Value::UNDEFINED)) {
            return Err(Error::new(
                ErrorKind::SecurityError,
                format!("access to attribute {name:?} is unsafe"),
            ));
        }
    }
    Ok(piped.get_attr_fast(&name).unwrap_or(Value::UNDEFINED))
}

/// Falls back to a default when the value is undefined.
///
/// With `boolean=true` (or via the `d` alias's second argument) every
/// falsy value is replaced.
pub fn default(_state: &State, args: &[Value]) -> Result<Value, Error> {
    let args = FilterArgs::new(args);
    let piped = args.piped();
    let fallback = args.get(1, "default_value").unwrap_or_else(|| Value::from(""));
    let boolean = args
        .get(2, "boolean")
        .map(|x| x.is_true())
        .unwrap_or(false);
    let use_default = if boolean {
        !piped.is_true()
    } else {
        piped.is_undefined()
    };
    Ok(if use_default { fallback } else { piped })
}

/// Returns a random item from a sequence.
pub fn random(_state: &State, args: &[Value]) -> Result<Value, Error> {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let args = FilterArgs::new(args);
    let items = iterable(&args.piped())?;
    if items.is_empty() {
        return Ok(Value::UNDEFINED);
    }
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|x| x.subsec_nanos() as u64)
            .unwrap_or(0),
    );
    let idx = (hasher.finish() as usize) % items.len();
    Ok(items[idx].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn apply(source: &str, ctx: Value) -> String {
        let env = crate::Environment::new();
        env.render_str(source, ctx).unwrap()
    }

    #[test]
    fn test_string_filters() {
        let ctx = Value::from(());
        assert_eq!(apply("{{ 'hello'|upper }}", ctx.clone()), "HELLO");
        assert_eq!(apply("{{ 'foo bar'|title }}", ctx.clone()), "Foo Bar");
        assert_eq!(
            apply("{{ 'hELLO wORLD'|capitalize }}", ctx.clone()),
            "Hello world"
        );
        assert_eq!(
            apply("{{ 'foo foo'|replace('foo', 'bar', 1) }}", ctx.clone()),
            "bar foo"
        );
        assert_eq!(
            apply("{{ '<b>bold  text</b>'|striptags }}", ctx.clone()),
            "bold text"
        );
        assert_eq!(apply("{{ 'x'|center(5) }}", ctx.clone()), "  x  ");
        assert_eq!(apply("{{ 'a b  c'|wordcount }}", ctx), "3");
    }

    #[test]
    fn test_truncate_respects_leeway() {
        let env = crate::Environment::new();
        // 9 characters with target 5 and default leeway 5 stays whole
        assert_eq!(
            env.render_str("{{ 'foo bar b'|truncate(5) }}", ()).unwrap(),
            "foo bar b"
        );
        assert_eq!(
            env.render_str("{{ 'foo bar baz quux'|truncate(9, true, '...', 0) }}", ())
                .unwrap(),
            "foo ba..."
        );
    }

    #[test]
    fn test_collection_filters() {
        let env = crate::Environment::new();
        let ctx = serde_json::json!({"seq": [3, 1, 2], "d": {"b": 2, "a": 1}});
        assert_eq!(env.render_str("{{ seq|sort }}", &ctx).unwrap(), "[1, 2, 3]");
        assert_eq!(env.render_str("{{ seq|length }}", &ctx).unwrap(), "3");
        assert_eq!(env.render_str("{{ seq|first }}", &ctx).unwrap(), "3");
        assert_eq!(env.render_str("{{ seq|last }}", &ctx).unwrap(), "2");
        assert_eq!(env.render_str("{{ seq|min }}", &ctx).unwrap(), "1");
        assert_eq!(env.render_str("{{ seq|max }}", &ctx).unwrap(), "3");
        assert_eq!(env.render_str("{{ seq|sum }}", &ctx).unwrap(), "6");
        assert_eq!(env.render_str("{{ seq|join('-') }}", &ctx).unwrap(), "3-1-2");
        assert_eq!(
            env.render_str("{{ seq|batch(2)|list }}", &ctx).unwrap(),
            "[[3, 1], [2]]"
        );
        assert_eq!(
            env.render_str("{{ d|dictsort }}", &ctx).unwrap(),
            "[[\"a\", 1], [\"b\", 2]]"
        );
    }

    #[test]
    fn test_select_and_map() {
        let env = crate::Environment::new();
        let ctx = serde_json::json!({
            "users": [
                {"name": "alice", "active": true},
                {"name": "bob", "active": false},
            ]
        });
        assert_eq!(
            env.render_str("{{ users|selectattr('active')|map(attribute='name')|join(',') }}", &ctx)
                .unwrap(),
            "alice"
        );
        assert_eq!(
            env.render_str("{{ [1, 2, 3, 4]|select('odd')|join(',') }}", ())
                .unwrap(),
            "1,3"
        );
        assert_eq!(
            env.render_str("{{ ['a', 'b']|map('upper')|join(',') }}", ())
                .unwrap(),
            "A,B"
        );
    }

    #[test]
    fn test_numeric_filters() {
        let env = crate::Environment::new();
        assert_eq!(env.render_str("{{ (-3)|abs }}", ()).unwrap(), "3");
        assert_eq!(env.render_str("{{ 42.55|round(1) }}", ()).unwrap(), "42.6");
        assert_eq!(env.render_str("{{ '42'|int }}", ()).unwrap(), "42");
        assert_eq!(env.render_str("{{ '4.5'|float }}", ()).unwrap(), "4.5");
        assert_eq!(
            env.render_str("{{ 1000000|filesizeformat }}", ()).unwrap(),
            "1.0 MB"
        );
        assert_eq!(
            env.render_str("{{ 1024|filesizeformat(true) }}", ()).unwrap(),
            "1.0 KiB"
        );
    }

    #[test]
    fn test_default_filter() {
        let env = crate::Environment::new();
        assert_eq!(env.render_str("{{ missing|default('x') }}", ()).unwrap(), "x");
        assert_eq!(
            env.render_str("{{ ''|default('x', true) }}", ()).unwrap(),
            "x"
        );
        assert_eq!(env.render_str("{{ 'y'|d('x') }}", ()).unwrap(), "y");
    }

    #[test]
    fn test_tojson_escapes_html() {
        let env = crate::Environment::new();
        assert_eq!(
            env.render_str("{{ '<script>'|tojson }}", ()).unwrap(),
            "\"\\u003cscript\\u003e\""
        );
    }

    #[test]
    fn test_urlize_emails() {
        assert!(looks_like_email("user@example.com"));
        assert!(!looks_like_email("user@@example.com"));
        assert!(!looks_like_email("user@.com"));
        assert!(!looks_like_email("user@example.c-m"));
        assert!(!looks_like_email("plainword"));
    }

    #[test]
    fn test_xmlattr() {
        let env = crate::Environment::new();
        let ctx = serde_json::json!({"attrs": {"class": "my<class", "id": "x"}});
        assert_eq!(
            env.render_str("{{ attrs|xmlattr }}", &ctx).unwrap(),
            " class=\"my&lt;class\" id=\"x\""
        );
    }
}
