use std::borrow::Cow;

use crate::error::{Error, ErrorKind};
use crate::syntax::{StartMarker, SyntaxConfig};
use crate::tokens::{Span, Token};
use crate::utils::{memchr, memstr, unescape};

/// Configures the whitespace handling of the lexer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceConfig {
    /// Keep a single trailing newline at the end of the template.
    pub keep_trailing_newline: bool,
    /// Remove the first newline after a statement or comment tag.
    pub trim_blocks: bool,
    /// Strip leading spaces and tabs from the start of a line to a
    /// statement or comment tag.
    pub lstrip_blocks: bool,
}

enum LexerState {
    Template,
    InVariable,
    InBlock,
    InLineStatement,
}

/// Whitespace removal carried over from the tag that was just closed.
#[derive(Default, PartialEq, Eq)]
enum PendingTrim {
    #[default]
    None,
    /// Strip all whitespace (a `-` marker).
    Whitespace,
    /// Strip a single newline (`trim_blocks`).
    Newline,
}

fn skip_basic_tag(block_str: &str, name: &str, block_end: &str) -> Option<(usize, bool)> {
    let mut ptr = block_str;
    let mut trim = false;

    if let Some(rest) = ptr.strip_prefix(|x: char| x == '-' || x == '+') {
        ptr = rest;
    }
    while let Some(rest) = ptr.strip_prefix(|x: char| x.is_ascii_whitespace()) {
        ptr = rest;
    }

    ptr = ptr.strip_prefix(name)?;

    while let Some(rest) = ptr.strip_prefix(|x: char| x.is_ascii_whitespace()) {
        ptr = rest;
    }
    if let Some(rest) = ptr.strip_prefix('-') {
        ptr = rest;
        trim = true;
    } else if let Some(rest) = ptr.strip_prefix('+') {
        ptr = rest;
    }
    ptr = ptr.strip_prefix(block_end)?;

    Some((block_str.len() - ptr.len(), trim))
}

fn lex_identifier(s: &str) -> usize {
    s.chars()
        .enumerate()
        .map_while(|(idx, c)| {
            let cont = if c == '_' {
                true
            } else if idx == 0 {
                unicode_ident::is_xid_start(c)
            } else {
                unicode_ident::is_xid_continue(c)
            };
            cont.then(|| c.len_utf8())
        })
        .sum::<usize>()
}

/// Tokenizes template source into a stream of tokens.
pub struct Tokenizer<'s> {
    stack: Vec<LexerState>,
    rest: &'s str,
    failed: bool,
    current_line: u32,
    current_col: u32,
    line_has_content: bool,
    paren_depth: usize,
    pending_trim: PendingTrim,
    syntax_config: SyntaxConfig,
    ws_config: WhitespaceConfig,
}

impl<'s> Tokenizer<'s> {
    /// Creates a new tokenizer.
    ///
    /// `in_expr` starts the tokenizer out in expression mode which is
    /// used for standalone expression compilation.
    pub fn new(
        input: &'s str,
        in_expr: bool,
        syntax_config: SyntaxConfig,
        ws_config: WhitespaceConfig,
    ) -> Tokenizer<'s> {
        let mut input = input;
        if !in_expr && !ws_config.keep_trailing_newline {
            if let Some(stripped) = input.strip_suffix('\n') {
                input = stripped.strip_suffix('\r').unwrap_or(stripped);
            }
        }
        Tokenizer {
            stack: vec![if in_expr {
                LexerState::InVariable
            } else {
                LexerState::Template
            }],
            rest: input,
            failed: false,
            current_line: 1,
            current_col: 0,
            line_has_content: false,
            paren_depth: 0,
            pending_trim: PendingTrim::None,
            syntax_config,
            ws_config,
        }
    }

    /// Produces the next token or `None` at the end of input.
    pub fn next_token(&mut self) -> Result<Option<(Token<'s>, Span)>, Error> {
        loop {
            if self.failed {
                return Ok(None);
            }
            if self.rest.is_empty() {
                // a line statement at the end of input is closed by
                // the end of the template
                if matches!(self.stack.last(), Some(LexerState::InLineStatement)) {
                    self.stack.pop();
                    let loc = self.loc();
                    return Ok(Some((Token::BlockEnd, self.span(loc))));
                }
                return Ok(None);
            }
            let rv = match self.stack.last() {
                Some(LexerState::Template) => self.tokenize_data()?,
                Some(LexerState::InBlock | LexerState::InVariable) => {
                    self.tokenize_tag_contents()?
                }
                Some(LexerState::InLineStatement) => self.tokenize_line_statement()?,
                None => panic!("empty lexer state"),
            };
            if let Some(rv) = rv {
                return Ok(Some(rv));
            }
        }
    }

    fn advance(&mut self, bytes: usize) -> &'s str {
        let (skipped, new_rest) = self.rest.split_at(bytes);
        for c in skipped.chars() {
            if c == '\n' {
                self.current_line += 1;
                self.current_col = 0;
                self.line_has_content = false;
            } else {
                self.current_col += 1;
                if !c.is_whitespace() {
                    self.line_has_content = true;
                }
            }
        }
        self.rest = new_rest;
        skipped
    }

    #[inline(always)]
    fn loc(&self) -> (u32, u32) {
        (self.current_line, self.current_col)
    }

    fn span(&self, start: (u32, u32)) -> Span {
        Span {
            start_line: start.0,
            start_col: start.1,
            end_line: self.current_line,
            end_col: self.current_col,
        }
    }

    fn syntax_error(&mut self, msg: &'static str) -> Error {
        self.failed = true;
        Error::new(ErrorKind::SyntaxError, msg)
    }

    fn skip_whitespace(&mut self) {
        let skip = self
            .rest
            .chars()
            .map_while(|c| c.is_whitespace().then(|| c.len_utf8()))
            .sum::<usize>();
        if skip > 0 {
            self.advance(skip);
        }
    }

    fn tokenize_data(&mut self) -> Result<Option<(Token<'s>, Span)>, Error> {
        // apply whitespace removal requested by the tag just closed
        match std::mem::take(&mut self.pending_trim) {
            PendingTrim::Whitespace => self.skip_whitespace(),
            PendingTrim::Newline => {
                if self.rest.starts_with("\r\n") {
                    self.advance(2);
                } else if self.rest.starts_with('\n') {
                    self.advance(1);
                }
            }
            PendingTrim::None => {}
        }
        if self.rest.is_empty() {
            return Ok(None);
        }

        let old_loc = self.loc();

        // line statements and comments are recognized when nothing but
        // whitespace was seen on the current line so far
        if !self.line_has_content {
            if self.try_line_comment() {
                return Ok(None);
            }
            if let Some(rv) = self.try_line_statement(old_loc) {
                return Ok(Some(rv));
            }
        }

        // a tag right at the cursor
        if let Some((marker, skip)) = self.syntax_config.match_start_marker(self.rest) {
            return self.handle_tag(marker, skip, old_loc);
        }

        self.emit_data_run(old_loc)
    }

    fn leading_inline_ws(&self) -> usize {
        self.rest
            .bytes()
            .take_while(|&b| b == b' ' || b == b'\t')
            .count()
    }

    /// Swallows a line comment at the cursor, including its newline.
    fn try_line_comment(&mut self) -> bool {
        let rest = self.rest;
        let ws = self.leading_inline_ws();
        let matched = match self.syntax_config.syntax().line_comment_prefix {
            Some(ref prefix) => rest[ws..].starts_with(prefix as &str),
            None => false,
        };
        if matched {
            let line_end = memchr(rest.as_bytes(), b'\n')
                .map(|x| x + 1)
                .unwrap_or(rest.len());
            self.advance(line_end);
        }
        matched
    }

    /// Enters line statement mode if the cursor sits before a line
    /// statement prefix.
    fn try_line_statement(&mut self, old_loc: (u32, u32)) -> Option<(Token<'s>, Span)> {
        let rest = self.rest;
        let ws = self.leading_inline_ws();
        let prefix_len = match self.syntax_config.syntax().line_statement_prefix {
            Some(ref prefix) if rest[ws..].starts_with(prefix as &str) => prefix.len(),
            _ => return None,
        };
        self.advance(ws + prefix_len);
        self.stack.push(LexerState::InLineStatement);
        self.paren_depth = 0;
        Some((Token::BlockStart, self.span(old_loc)))
    }

    fn handle_tag(
        &mut self,
        marker: StartMarker,
        skip: usize,
        old_loc: (u32, u32),
    ) -> Result<Option<(Token<'s>, Span)>, Error> {
        match marker {
            StartMarker::Comment => {
                let comment_end = self.syntax_config.syntax().comment_end.clone();
                match memstr(&self.rest.as_bytes()[skip..], comment_end.as_bytes()) {
                    Some(end) => {
                        let trim = self
                            .rest
                            .as_bytes()
                            .get(end.saturating_sub(1) + skip)
                            .copied()
                            == Some(b'-');
                        self.advance(end + skip + comment_end.len());
                        self.pending_trim = if trim {
                            PendingTrim::Whitespace
                        } else if self.ws_config.trim_blocks {
                            PendingTrim::Newline
                        } else {
                            PendingTrim::None
                        };
                        Ok(None)
                    }
                    None => Err(self.syntax_error("unexpected end of comment")),
                }
            }
            StartMarker::Variable => {
                if matches!(self.rest.as_bytes().get(skip), Some(b'-' | b'+')) {
                    self.advance(skip + 1);
                } else {
                    self.advance(skip);
                }
                self.stack.push(LexerState::InVariable);
                Ok(Some((Token::VariableStart, self.span(old_loc))))
            }
            StartMarker::Block => {
                // raw blocks skip everything until the matching endraw
                // tag, ignoring interior syntax entirely
                let block_end = self.syntax_config.syntax().block_end.clone();
                if let Some((raw, trim_start)) =
                    skip_basic_tag(&self.rest[skip..], "raw", &block_end)
                {
                    return self
                        .tokenize_raw(skip + raw, trim_start, old_loc)
                        .map(Some);
                }
                if matches!(self.rest.as_bytes().get(skip), Some(b'-' | b'+')) {
                    self.advance(skip + 1);
                } else {
                    self.advance(skip);
                }
                self.stack.push(LexerState::InBlock);
                Ok(Some((Token::BlockStart, self.span(old_loc))))
            }
        }
    }

    fn tokenize_raw(
        &mut self,
        skip: usize,
        trim_start: bool,
        old_loc: (u32, u32),
    ) -> Result<(Token<'s>, Span), Error> {
        let block_start = self.syntax_config.syntax().block_start.clone();
        let block_end = self.syntax_config.syntax().block_end.clone();
        self.advance(skip);
        let rest = self.rest;
        let mut ptr = 0;
        while let Some(block) = memstr(&rest.as_bytes()[ptr..], block_start.as_bytes()) {
            ptr += block + block_start.len();
            let trim_end = rest.as_bytes().get(ptr) == Some(&b'-');
            if let Some((endraw, trim_next)) = skip_basic_tag(&rest[ptr..], "endraw", &block_end) {
                let mut result = &rest[..ptr - block_start.len()];
                if trim_start {
                    result = result.trim_start();
                }
                if trim_end {
                    result = result.trim_end();
                }
                self.advance(ptr + endraw);
                self.pending_trim = if trim_next {
                    PendingTrim::Whitespace
                } else {
                    PendingTrim::None
                };
                return Ok((Token::TemplateData(result), self.span(old_loc)));
            }
        }
        Err(self.syntax_error("unexpected end of raw block"))
    }

    fn emit_data_run(&mut self, old_loc: (u32, u32)) -> Result<Option<(Token<'s>, Span)>, Error> {
        let rest = self.rest;
        let begins_mid_line = self.line_has_content;

        let marker = self.syntax_config.find_start_marker(rest);
        let line_point = self.find_line_prefix_point(rest);

        let (end, is_marker) = match (marker, line_point) {
            (Some((m, _)), Some(l)) if l < m => (l, false),
            (Some((m, _)), _) => (m, true),
            (None, Some(l)) => (l, false),
            (None, None) => (rest.len(), false),
        };

        let mut lead = &rest[..end];
        if is_marker {
            if let Some((kind, skiplen)) = self.syntax_config.match_start_marker(&rest[end..]) {
                match rest.as_bytes().get(end + skiplen) {
                    Some(b'-') => lead = lead.trim_end(),
                    Some(b'+') => {}
                    _ => {
                        if self.ws_config.lstrip_blocks && kind != StartMarker::Variable {
                            let tail_start = lead.rfind('\n').map(|x| x + 1).unwrap_or(0);
                            let tail = &lead[tail_start..];
                            let line_known_blank = tail_start > 0 || !begins_mid_line;
                            if line_known_blank
                                && tail.bytes().all(|b| b == b' ' || b == b'\t')
                            {
                                lead = &lead[..tail_start];
                            }
                        }
                    }
                }
            }
        }

        let lead_len = lead.len();
        let lead = self.advance(lead_len);
        let span = self.span(old_loc);
        // consume whitespace the trim removed from the emitted data
        self.advance(end - lead_len);
        if lead.is_empty() {
            Ok(None)
        } else {
            Ok(Some((Token::TemplateData(lead), span)))
        }
    }

    fn find_line_prefix_point(&self, rest: &str) -> Option<usize> {
        let syntax = self.syntax_config.syntax();
        let stmt_prefix = syntax.line_statement_prefix.as_deref();
        let comment_prefix = syntax.line_comment_prefix.as_deref();
        if stmt_prefix.is_none() && comment_prefix.is_none() {
            return None;
        }
        let bytes = rest.as_bytes();
        let mut search = 0;
        while let Some(nl) = memchr(&bytes[search..], b'\n') {
            let line_start = search + nl + 1;
            if line_start >= rest.len() {
                return None;
            }
            let ws = rest[line_start..]
                .bytes()
                .take_while(|&b| b == b' ' || b == b'\t')
                .count();
            let after = &rest[line_start + ws..];
            if stmt_prefix.map_or(false, |p| after.starts_with(p))
                || comment_prefix.map_or(false, |p| after.starts_with(p))
            {
                return Some(line_start);
            }
            search = line_start;
        }
        None
    }

    fn tokenize_tag_contents(&mut self) -> Result<Option<(Token<'s>, Span)>, Error> {
        // whitespace is insignificant inside tags
        match self
            .rest
            .as_bytes()
            .iter()
            .position(|&x| !x.is_ascii_whitespace())
        {
            Some(0) => {}
            None => {
                let len = self.rest.len();
                self.advance(len);
                return Ok(None);
            }
            Some(offset) => {
                self.advance(offset);
                return Ok(None);
            }
        }

        let old_loc = self.loc();
        let in_block = matches!(self.stack.last(), Some(LexerState::InBlock));
        let end_delim = if in_block {
            self.syntax_config.syntax().block_end.clone()
        } else {
            self.syntax_config.syntax().variable_end.clone()
        };

        let rest = self.rest;
        let (end_len, trim) = if rest.starts_with('-') && rest[1..].starts_with(&end_delim as &str)
        {
            (1 + end_delim.len(), Some(PendingTrim::Whitespace))
        } else if rest.starts_with('+') && rest[1..].starts_with(&end_delim as &str) {
            (1 + end_delim.len(), Some(PendingTrim::None))
        } else if rest.starts_with(&end_delim as &str) {
            let default = if in_block && self.ws_config.trim_blocks {
                PendingTrim::Newline
            } else {
                PendingTrim::None
            };
            (end_delim.len(), Some(default))
        } else {
            (0, None)
        };
        if let Some(pending) = trim {
            self.stack.pop();
            self.advance(end_len);
            self.pending_trim = pending;
            let token = if in_block {
                Token::BlockEnd
            } else {
                Token::VariableEnd
            };
            return Ok(Some((token, self.span(old_loc))));
        }

        self.eat_expr_token().map(Some)
    }

    fn tokenize_line_statement(&mut self) -> Result<Option<(Token<'s>, Span)>, Error> {
        // only spaces and tabs are insignificant here, a newline ends
        // the statement unless a bracket group is open
        let skip = self
            .rest
            .bytes()
            .take_while(|&b| b == b' ' || b == b'\t' || b == b'\r')
            .count();
        if skip > 0 {
            self.advance(skip);
        }
        let old_loc = self.loc();
        if self.rest.is_empty() {
            self.stack.pop();
            return Ok(Some((Token::BlockEnd, self.span(old_loc))));
        }
        if self.rest.starts_with('\n') {
            if self.paren_depth == 0 {
                self.advance(1);
                self.stack.pop();
                return Ok(Some((Token::BlockEnd, self.span(old_loc))));
            }
            self.advance(1);
            return Ok(None);
        }

        let (token, span) = self.eat_expr_token()?;
        match token {
            Token::ParenOpen | Token::BracketOpen | Token::BraceOpen => self.paren_depth += 1,
            Token::ParenClose | Token::BracketClose | Token::BraceClose => {
                self.paren_depth = self.paren_depth.saturating_sub(1)
            }
            _ => {}
        }
        Ok(Some((token, span)))
    }

    fn eat_expr_token(&mut self) -> Result<(Token<'s>, Span), Error> {
        let old_loc = self.loc();

        let op = match self.rest.as_bytes().get(..2) {
            Some(b"//") => Some(Token::FloorDiv),
            Some(b"**") => Some(Token::Pow),
            Some(b"==") => Some(Token::Eq),
            Some(b"!=") => Some(Token::Ne),
            Some(b">=") => Some(Token::Gte),
            Some(b"<=") => Some(Token::Lte),
            _ => None,
        };
        if let Some(op) = op {
            self.advance(2);
            return Ok((op, self.span(old_loc)));
        }

        let op = match self.rest.as_bytes().first() {
            Some(b'+') => Some(Token::Plus),
            Some(b'-') => Some(Token::Minus),
            Some(b'*') => Some(Token::Mul),
            Some(b'/') => Some(Token::Div),
            Some(b'%') => Some(Token::Mod),
            Some(b'.') => Some(Token::Dot),
            Some(b',') => Some(Token::Comma),
            Some(b':') => Some(Token::Colon),
            Some(b'~') => Some(Token::Tilde),
            Some(b'|') => Some(Token::Pipe),
            Some(b'=') => Some(Token::Assign),
            Some(b'>') => Some(Token::Gt),
            Some(b'<') => Some(Token::Lt),
            Some(b'(') => Some(Token::ParenOpen),
            Some(b')') => Some(Token::ParenClose),
            Some(b'[') => Some(Token::BracketOpen),
            Some(b']') => Some(Token::BracketClose),
            Some(b'{') => Some(Token::BraceOpen),
            Some(b'}') => Some(Token::BraceClose),
            Some(b'\'') => return self.eat_string(b'\''),
            Some(b'"') => return self.eat_string(b'"'),
            Some(c) if c.is_ascii_digit() => return self.eat_number(),
            _ => None,
        };
        if let Some(op) = op {
            self.advance(1);
            return Ok((op, self.span(old_loc)));
        }

        self.eat_identifier()
    }

    fn eat_number(&mut self) -> Result<(Token<'s>, Span), Error> {
        #[derive(Copy, Clone)]
        enum State {
            Integer,
            Fraction,
            Exponent,
            ExponentSign,
        }

        let old_loc = self.loc();
        let mut state = State::Integer;
        let mut num_len = self
            .rest
            .as_bytes()
            .iter()
            .take_while(|&&c| c.is_ascii_digit() || c == b'_')
            .count();
        for c in self.rest.as_bytes()[num_len..].iter().copied() {
            state = match (c, state) {
                (b'.', State::Integer) => State::Fraction,
                (b'E' | b'e', State::Integer | State::Fraction) => State::Exponent,
                (b'+' | b'-', State::Exponent) => State::ExponentSign,
                (b'0'..=b'9', State::Exponent) => State::ExponentSign,
                (b'0'..=b'9' | b'_', state) => state,
                _ => break,
            };
            num_len += 1;
        }
        let is_float = !matches!(state, State::Integer);

        let num = self.advance(num_len);
        let clean: Cow<'_, str> = if num.contains('_') {
            Cow::Owned(num.chars().filter(|&c| c != '_').collect())
        } else {
            Cow::Borrowed(num)
        };
        let token = if is_float {
            clean
                .parse()
                .map(Token::Float)
                .map_err(|_| self.syntax_error("invalid float"))?
        } else {
            clean
                .parse()
                .map(Token::Int)
                .map_err(|_| self.syntax_error("invalid integer"))?
        };
        Ok((token, self.span(old_loc)))
    }

    fn eat_identifier(&mut self) -> Result<(Token<'s>, Span), Error> {
        let ident_len = lex_identifier(self.rest);
        if ident_len > 0 {
            let old_loc = self.loc();
            let ident = self.advance(ident_len);
            Ok((Token::Ident(ident), self.span(old_loc)))
        } else {
            Err(self.syntax_error("unexpected character"))
        }
    }

    fn eat_string(&mut self, delim: u8) -> Result<(Token<'s>, Span), Error> {
        let old_loc = self.loc();
        let mut escaped = false;
        let mut has_escapes = false;
        let str_len = self
            .rest
            .as_bytes()
            .iter()
            .skip(1)
            .take_while(|&&c| match (escaped, c) {
                (true, _) => {
                    escaped = false;
                    true
                }
                (_, b'\\') => {
                    escaped = true;
                    has_escapes = true;
                    true
                }
                (_, c) if c == delim => false,
                _ => true,
            })
            .count();
        if escaped || self.rest.as_bytes().get(str_len + 1) != Some(&delim) {
            return Err(self.syntax_error("unexpected end of string"));
        }
        let s = self.advance(str_len + 2);
        Ok(if has_escapes {
            (
                Token::String(unescape(&s[1..s.len() - 1])?),
                self.span(old_loc),
            )
        } else {
            (Token::Str(&s[1..s.len() - 1]), self.span(old_loc))
        })
    }
}

/// Tokenizes source into a vector, mostly useful for tests.
pub fn tokenize(
    input: &str,
    in_expr: bool,
    syntax_config: SyntaxConfig,
    ws_config: WhitespaceConfig,
) -> Result<Vec<(Token<'_>, Span)>, Error> {
    let mut tokenizer = Tokenizer::new(input, in_expr, syntax_config, ws_config);
    let mut rv = Vec::new();
    while let Some(tok) = tokenizer.next_token()? {
        rv.push(tok);
    }
    Ok(rv)
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn lex(input: &str) -> Vec<Token<'_>> {
        tokenize(input, false, Default::default(), Default::default())
            .unwrap()
            .into_iter()
            .map(|(tok, _)| tok)
            .collect()
    }

    fn data_of(input: &str, ws: WhitespaceConfig) -> String {
        tokenize(input, false, Default::default(), ws)
            .unwrap()
            .into_iter()
            .filter_map(|(tok, _)| match tok {
                Token::TemplateData(data) => Some(data.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_is_basic_tag() {
        assert_eq!(skip_basic_tag(" raw %}", "raw", "%}"), Some((7, false)));
        assert_eq!(skip_basic_tag(" raw %}", "endraw", "%}"), None);
        assert_eq!(skip_basic_tag("  raw  %}", "raw", "%}"), Some((9, false)));
        assert_eq!(skip_basic_tag("-  raw  -%}", "raw", "%}"), Some((11, true)));
    }

    #[test]
    fn test_basic_identifiers() {
        fn assert_ident(s: &str) {
            match tokenize(s, true, Default::default(), Default::default())
                .unwrap()
                .into_iter()
                .next()
            {
                Some((Token::Ident(ident), _)) if ident == s => {}
                _ => panic!("did not get a matching token result: {s:?}"),
            }
        }

        assert_ident("foo_bar_baz");
        assert_ident("_foo_bar_baz");
        assert_ident("_42world");
        assert_ident("_world42");
        assert_ident("world42");
        assert_ident("föö");
    }

    #[test]
    fn test_basic_sequence() {
        let tokens = lex("Hello {{ name }}!");
        assert!(matches!(tokens[0], Token::TemplateData("Hello ")));
        assert!(matches!(tokens[1], Token::VariableStart));
        assert!(matches!(tokens[2], Token::Ident("name")));
        assert!(matches!(tokens[3], Token::VariableEnd));
        assert!(matches!(tokens[4], Token::TemplateData("!")));
    }

    #[test]
    fn test_numbers_with_underscores() {
        let tokens = lex("{{ 1_000_000 + 1_0.5_0 }}");
        assert!(matches!(tokens[1], Token::Int(1000000)));
        assert!(matches!(tokens[3], Token::Float(f) if (f - 10.50).abs() < 1e-9));
    }

    #[test]
    fn test_whitespace_markers() {
        let out = data_of("x  {{- 'a' -}}  y", WhitespaceConfig::default());
        assert_eq!(out, "xy");
        let out = data_of("x  {%+ if true %}y{% endif %}", WhitespaceConfig::default());
        assert_eq!(out, "x  y");
    }

    #[test]
    fn test_trim_blocks() {
        let ws = WhitespaceConfig {
            trim_blocks: true,
            ..Default::default()
        };
        let out = data_of("{% if true %}\nx\n{% endif %}\n", ws);
        assert_eq!(out, "x\n");
    }

    #[test]
    fn test_lstrip_blocks() {
        let ws = WhitespaceConfig {
            lstrip_blocks: true,
            ..Default::default()
        };
        let out = data_of("  {% if true %}x{% endif %}", ws);
        assert_eq!(out, "x");
        // a variable tag is not affected
        let out = data_of("  {{ 'x' }}", ws);
        assert_eq!(out, "  ");
    }

    #[test]
    fn test_trailing_newline() {
        assert_eq!(data_of("hello\n", WhitespaceConfig::default()), "hello");
        let ws = WhitespaceConfig {
            keep_trailing_newline: true,
            ..Default::default()
        };
        assert_eq!(data_of("hello\n", ws), "hello\n");
    }

    #[test]
    fn test_raw_block() {
        let tokens = lex("{% raw %}{{ not parsed }}{% endraw %}");
        assert!(matches!(tokens[0], Token::TemplateData("{{ not parsed }}")));
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_line_statements() {
        let syntax = crate::syntax::Syntax::default()
            .with_line_statement_prefix("#")
            .compile()
            .unwrap();
        let tokens = tokenize(
            "# for item in seq\nx\n# endfor",
            false,
            syntax,
            Default::default(),
        )
        .unwrap()
        .into_iter()
        .map(|(tok, _)| tok)
        .collect::<Vec<_>>();
        assert!(matches!(tokens[0], Token::BlockStart));
        assert!(matches!(tokens[1], Token::Ident("for")));
        assert!(matches!(tokens[4], Token::Ident("seq")));
        assert!(matches!(tokens[5], Token::BlockEnd));
        assert!(matches!(tokens[6], Token::TemplateData("x\n")));
        assert!(matches!(tokens[7], Token::BlockStart));
        assert!(matches!(tokens[8], Token::Ident("endfor")));
        assert!(matches!(tokens[9], Token::BlockEnd));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("{{ 'foo }}", false, Default::default(), Default::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::SyntaxError);
    }
}
