use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::ast::{self, Spanned};
use crate::error::{Error, ErrorKind};
use crate::lexer::{Tokenizer, WhitespaceConfig};
use crate::meta;
use crate::syntax::SyntaxConfig;
use crate::tokens::{Span, Token};
use crate::value::Value;

const MAX_RECURSION: usize = 150;
const RESERVED_NAMES: [&str; 8] = [
    "true", "True", "false", "False", "none", "None", "loop", "self",
];

/// Options controlling parsing of a template.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// The delimiter configuration.
    pub syntax: SyntaxConfig,
    /// The whitespace behavior.
    pub ws: WhitespaceConfig,
    /// Allow `break` and `continue` in loops.
    pub loop_controls: bool,
}

fn unexpected<D: fmt::Display>(unexpected: D, expected: &str) -> Error {
    Error::new(
        ErrorKind::SyntaxError,
        format!("unexpected {unexpected}, expected {expected}"),
    )
}

fn unexpected_eof(expected: &str) -> Error {
    unexpected("end of input", expected)
}

fn make_const(value: Value, span: Span) -> ast::Expr {
    ast::Expr::Const(Spanned::new(ast::Const { value }, span))
}

fn syntax_error(msg: Cow<'static, str>) -> Error {
    Error::new(ErrorKind::SyntaxError, msg)
}

fn assertion_error(msg: Cow<'static, str>) -> Error {
    Error::new(ErrorKind::AssertionError, msg)
}

macro_rules! syntax_error {
    ($msg:expr) => {{
        return Err(syntax_error(Cow::Borrowed($msg)));
    }};
    ($msg:expr, $($tt:tt)*) => {{
        return Err(syntax_error(Cow::Owned(format!($msg, $($tt)*))));
    }};
}

macro_rules! assertion_error {
    ($msg:expr) => {{
        return Err(assertion_error(Cow::Borrowed($msg)));
    }};
    ($msg:expr, $($tt:tt)*) => {{
        return Err(assertion_error(Cow::Owned(format!($msg, $($tt)*))));
    }};
}

macro_rules! expect_token {
    ($parser:expr, $match:pat => $target:expr, $expectation:expr) => {{
        match $parser.stream.next()? {
            Some(($match, span)) => ($target, span),
            Some((token, _)) => return Err(unexpected(token, $expectation)),
            None => return Err(unexpected_eof($expectation)),
        }
    }};
    ($parser:expr, $match:pat, $expectation:expr) => {{
        match $parser.stream.next()? {
            Some((token @ $match, span)) => (token, span),
            Some((token, _)) => return Err(unexpected(token, $expectation)),
            None => return Err(unexpected_eof($expectation)),
        }
    }};
    ($parser:expr, $expectation:expr) => {{
        match $parser.stream.next()? {
            Some(rv) => rv,
            None => return Err(unexpected_eof($expectation)),
        }
    }};
}

macro_rules! matches_token {
    ($p:expr, $match:pat) => {
        match $p.stream.current() {
            Err(err) => return Err(err),
            Ok(Some(($match, _))) => true,
            _ => false,
        }
    };
}

macro_rules! skip_token {
    ($p:expr, $match:pat) => {
        match $p.stream.current() {
            Err(err) => return Err(err),
            Ok(Some(($match, _))) => {
                let _ = $p.stream.next();
                true
            }
            _ => false,
        }
    };
}

macro_rules! with_recursion_guard {
    ($parser:expr, $expr:expr) => {{
        $parser.depth += 1;
        if $parser.depth > MAX_RECURSION {
            return Err(syntax_error(Cow::Borrowed(
                "template exceeds maximum recursion limits",
            )));
        }
        let rv = $expr;
        $parser.depth -= 1;
        rv
    }};
}

enum SetParseResult {
    Set(ast::Set),
    SetBlock(ast::SetBlock),
}

struct TokenStream<'a> {
    tokenizer: Tokenizer<'a>,
    current: Option<Result<(Token<'a>, Span), Error>>,
    last_span: Span,
}

impl<'a> TokenStream<'a> {
    fn new(source: &'a str, in_expr: bool, options: &CompileOptions) -> TokenStream<'a> {
        let mut tokenizer =
            Tokenizer::new(source, in_expr, options.syntax.clone(), options.ws);
        let current = tokenizer.next_token().transpose();
        TokenStream {
            tokenizer,
            current,
            last_span: Span::default(),
        }
    }

    /// Advance the stream.
    fn next(&mut self) -> Result<Option<(Token<'a>, Span)>, Error> {
        let rv = self.current.take();
        self.current = self.tokenizer.next_token().transpose();
        if let Some(Ok((_, span))) = rv {
            self.last_span = span;
        }
        rv.transpose()
    }

    /// Look at the current token.
    fn current(&mut self) -> Result<Option<(&Token<'a>, Span)>, Error> {
        match self.current {
            Some(Ok(ref tok)) => Ok(Some((&tok.0, tok.1))),
            Some(Err(_)) => Err(self.current.take().unwrap().unwrap_err()),
            None => Ok(None),
        }
    }

    /// Expands a span to the last seen token.
    #[inline(always)]
    fn expand_span(&self, mut span: Span) -> Span {
        span.end_line = self.last_span.end_line;
        span.end_col = self.last_span.end_col;
        span
    }

    /// Returns the current span.
    #[inline(always)]
    fn current_span(&self) -> Span {
        if let Some(Ok((_, span))) = self.current {
            span
        } else {
            self.last_span
        }
    }

    /// Returns the last seen span.
    #[inline(always)]
    fn last_span(&self) -> Span {
        self.last_span
    }
}

struct Parser<'a> {
    stream: TokenStream<'a>,
    filename: &'a str,
    in_macro: bool,
    in_loop: bool,
    loop_controls: bool,
    blocks: BTreeSet<String>,
    num_extends: usize,
    depth: usize,
}

macro_rules! binop {
    ($func:ident, $next:ident, { $($tok:tt)* }) => {
        fn $func(&mut self) -> Result<ast::Expr, Error> {
            let span = self.stream.current_span();
            let mut left = self.$next()?;
            loop {
                let op = match self.stream.current()? {
                    $($tok)*
                    _ => break,
                };
                self.stream.next()?;
                let right = self.$next()?;
                left = ast::Expr::BinOp(Spanned::new(
                    ast::BinOp { op, left, right },
                    self.stream.expand_span(span),
                ));
            }
            Ok(left)
        }
    };
}

impl<'a> Parser<'a> {
    fn new(
        source: &'a str,
        filename: &'a str,
        in_expr: bool,
        options: &CompileOptions,
    ) -> Parser<'a> {
        Parser {
            stream: TokenStream::new(source, in_expr, options),
            filename,
            in_macro: false,
            in_loop: false,
            loop_controls: options.loop_controls,
            blocks: BTreeSet::new(),
            num_extends: 0,
            depth: 0,
        }
    }

    /// Parses a template.
    fn parse(&mut self) -> Result<ast::Stmt, Error> {
        let span = self.stream.last_span();
        self.subparse(&|_| false)
            .map(|children| {
                ast::Stmt::Template(Spanned::new(
                    ast::Template { children },
                    self.stream.expand_span(span),
                ))
            })
            .map_err(|err| self.attach_location_to_error(err))
    }

    /// Parses an expression and asserts that there is no more input.
    fn parse_standalone_expr(&mut self) -> Result<ast::Expr, Error> {
        self.parse_expr()
            .and_then(|result| {
                if self.stream.next()?.is_some() {
                    syntax_error!("unexpected input after expression")
                } else {
                    Ok(result)
                }
            })
            .map_err(|err| self.attach_location_to_error(err))
    }

    fn parse_ifexpr(&mut self) -> Result<ast::Expr, Error> {
        let mut span = self.stream.last_span();
        let mut expr = self.parse_or()?;
        loop {
            if skip_token!(self, Token::Ident("if")) {
                let expr2 = self.parse_or()?;
                let expr3 = if skip_token!(self, Token::Ident("else")) {
                    Some(self.parse_ifexpr()?)
                } else {
                    None
                };
                expr = ast::Expr::IfExpr(Spanned::new(
                    ast::IfExpr {
                        test_expr: expr2,
                        true_expr: expr,
                        false_expr: expr3,
                    },
                    self.stream.expand_span(span),
                ));
                span = self.stream.last_span();
            } else {
                break;
            }
        }
        Ok(expr)
    }

    binop!(parse_or, parse_and, {
        Some((Token::Ident("or"), _)) => ast::BinOpKind::ScOr,
    });
    binop!(parse_and, parse_not, {
        Some((Token::Ident("and"), _)) => ast::BinOpKind::ScAnd,
    });

    fn parse_not(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        if skip_token!(self, Token::Ident("not")) {
            return Ok(ast::Expr::UnaryOp(Spanned::new(
                ast::UnaryOp {
                    op: ast::UnaryOpKind::Not,
                    expr: self.parse_not()?,
                },
                self.stream.expand_span(span),
            )));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        let expr = self.parse_math1()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.stream.current()? {
                Some((Token::Eq, _)) => ast::CompareOp::Eq,
                Some((Token::Ne, _)) => ast::CompareOp::Ne,
                Some((Token::Lt, _)) => ast::CompareOp::Lt,
                Some((Token::Lte, _)) => ast::CompareOp::Lte,
                Some((Token::Gt, _)) => ast::CompareOp::Gt,
                Some((Token::Gte, _)) => ast::CompareOp::Gte,
                Some((Token::Ident("in"), _)) => ast::CompareOp::In,
                Some((Token::Ident("not"), _)) => {
                    self.stream.next()?;
                    expect_token!(self, Token::Ident("in"), "in");
                    ops.push((ast::CompareOp::NotIn, self.parse_math1()?));
                    continue;
                }
                _ => break,
            };
            self.stream.next()?;
            ops.push((op, self.parse_math1()?));
        }
        if ops.is_empty() {
            Ok(expr)
        } else {
            Ok(ast::Expr::Compare(Spanned::new(
                ast::Compare { expr, ops },
                self.stream.expand_span(span),
            )))
        }
    }

    binop!(parse_math1, parse_concat, {
        Some((Token::Plus, _)) => ast::BinOpKind::Add,
        Some((Token::Minus, _)) => ast::BinOpKind::Sub,
    });
    binop!(parse_concat, parse_math2, {
        Some((Token::Tilde, _)) => ast::BinOpKind::Concat,
    });
    binop!(parse_math2, parse_unary, {
        Some((Token::Mul, _)) => ast::BinOpKind::Mul,
        Some((Token::Div, _)) => ast::BinOpKind::Div,
        Some((Token::FloorDiv, _)) => ast::BinOpKind::FloorDiv,
        Some((Token::Mod, _)) => ast::BinOpKind::Rem,
    });

    fn parse_unary(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        if skip_token!(self, Token::Minus) {
            return Ok(ast::Expr::UnaryOp(Spanned::new(
                ast::UnaryOp {
                    op: ast::UnaryOpKind::Neg,
                    expr: self.parse_unary()?,
                },
                self.stream.expand_span(span),
            )));
        }
        if skip_token!(self, Token::Plus) {
            return self.parse_unary();
        }
        self.parse_pow()
    }

    fn parse_pow(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        let left = self.parse_filtered()?;
        if skip_token!(self, Token::Pow) {
            // right associative, the right side may start with a unary
            let right = self.parse_unary()?;
            Ok(ast::Expr::BinOp(Spanned::new(
                ast::BinOp {
                    op: ast::BinOpKind::Pow,
                    left,
                    right,
                },
                self.stream.expand_span(span),
            )))
        } else {
            Ok(left)
        }
    }

    fn parse_filtered(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        let expr = self.parse_primary()?;
        let expr = self.parse_postfix(expr, span)?;
        self.parse_filter_expr(expr)
    }

    fn parse_postfix(
        &mut self,
        expr: ast::Expr,
        mut span: Span,
    ) -> Result<ast::Expr, Error> {
        let mut expr = expr;
        loop {
            let next_span = self.stream.current_span();
            match self.stream.current()? {
                Some((Token::Dot, _)) => {
                    self.stream.next()?;
                    let (name, _) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    expr = ast::Expr::GetAttr(Spanned::new(
                        ast::GetAttr {
                            name: name.to_string(),
                            expr,
                        },
                        self.stream.expand_span(span),
                    ));
                }
                Some((Token::BracketOpen, _)) => {
                    self.stream.next()?;

                    let mut start = None;
                    let mut stop = None;
                    let mut step = None;
                    let mut is_slice = false;

                    if !matches_token!(self, Token::Colon) {
                        start = Some(self.parse_expr()?);
                    }
                    if skip_token!(self, Token::Colon) {
                        is_slice = true;
                        if !matches_token!(self, Token::BracketClose | Token::Colon) {
                            stop = Some(self.parse_expr()?);
                        }
                        if skip_token!(self, Token::Colon)
                            && !matches_token!(self, Token::BracketClose)
                        {
                            step = Some(self.parse_expr()?);
                        }
                    }
                    expect_token!(self, Token::BracketClose, "`]`");

                    if !is_slice {
                        expr = ast::Expr::GetItem(Spanned::new(
                            ast::GetItem {
                                expr,
                                subscript_expr: start.ok_or_else(|| {
                                    syntax_error(Cow::Borrowed("empty subscript"))
                                })?,
                            },
                            self.stream.expand_span(span),
                        ));
                    } else {
                        expr = ast::Expr::Slice(Spanned::new(
                            ast::Slice {
                                expr,
                                start,
                                stop,
                                step,
                            },
                            self.stream.expand_span(span),
                        ));
                    }
                }
                Some((Token::ParenOpen, _)) => {
                    let args = self.parse_args()?;
                    expr = ast::Expr::Call(Spanned::new(
                        ast::Call { expr, args },
                        self.stream.expand_span(span),
                    ));
                }
                _ => break,
            }
            span = next_span;
        }
        Ok(expr)
    }

    fn parse_filter_expr(&mut self, expr: ast::Expr) -> Result<ast::Expr, Error> {
        let mut expr = expr;
        loop {
            match self.stream.current()? {
                Some((Token::Pipe, _)) => {
                    self.stream.next()?;
                    let (name, span) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    let args = if matches_token!(self, Token::ParenOpen) {
                        self.parse_args()?
                    } else {
                        Vec::new()
                    };
                    expr = ast::Expr::Filter(Spanned::new(
                        ast::Filter {
                            name: name.to_string(),
                            expr: Some(expr),
                            args,
                        },
                        self.stream.expand_span(span),
                    ));
                }
                Some((Token::Ident("is"), _)) => {
                    self.stream.next()?;
                    let negated = skip_token!(self, Token::Ident("not"));
                    let (name, span) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    let args = if matches_token!(self, Token::ParenOpen) {
                        self.parse_args()?
                    } else if matches_token!(
                        self,
                        Token::Ident(_)
                            | Token::Str(_)
                            | Token::String(_)
                            | Token::Int(_)
                            | Token::Float(_)
                            | Token::Minus
                            | Token::BracketOpen
                            | Token::BraceOpen
                    ) && !matches_token!(
                        self,
                        Token::Ident("and")
                            | Token::Ident("or")
                            | Token::Ident("else")
                            | Token::Ident("is")
                            | Token::Ident("in")
                            | Token::Ident("not")
                            | Token::Ident("recursive")
                            | Token::Ident("if")
                    ) {
                        vec![ast::CallArg::Pos(self.parse_test_arg()?)]
                    } else {
                        Vec::new()
                    };
                    expr = ast::Expr::Test(Spanned::new(
                        ast::Test {
                            name: name.to_string(),
                            expr,
                            args,
                        },
                        self.stream.expand_span(span),
                    ));
                    if negated {
                        expr = ast::Expr::UnaryOp(Spanned::new(
                            ast::UnaryOp {
                                op: ast::UnaryOpKind::Not,
                                expr,
                            },
                            self.stream.expand_span(span),
                        ));
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_test_arg(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        if skip_token!(self, Token::Minus) {
            return Ok(ast::Expr::UnaryOp(Spanned::new(
                ast::UnaryOp {
                    op: ast::UnaryOpKind::Neg,
                    expr: self.parse_test_arg()?,
                },
                self.stream.expand_span(span),
            )));
        }
        let expr = self.parse_primary()?;
        self.parse_postfix(expr, span)
    }

    fn parse_args(&mut self) -> Result<Vec<ast::CallArg>, Error> {
        let mut args = Vec::new();
        let mut has_kwargs = false;

        enum ArgType {
            Regular,
            Splat,
            KwargsSplat,
        }

        expect_token!(self, Token::ParenOpen, "`(`");
        loop {
            if skip_token!(self, Token::ParenClose) {
                break;
            }
            if !args.is_empty() || has_kwargs {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
            }

            let arg_type = if skip_token!(self, Token::Pow) {
                ArgType::KwargsSplat
            } else if skip_token!(self, Token::Mul) {
                ArgType::Splat
            } else {
                ArgType::Regular
            };

            let expr = self.parse_expr()?;

            match arg_type {
                ArgType::Regular => match expr {
                    ast::Expr::Var(ref var) if skip_token!(self, Token::Assign) => {
                        has_kwargs = true;
                        let name = var.id.clone();
                        args.push(ast::CallArg::Kwarg(name, self.parse_expr_noif()?));
                    }
                    _ if has_kwargs => {
                        return Err(syntax_error(Cow::Borrowed(
                            "non-keyword arg after keyword arg",
                        )));
                    }
                    _ => {
                        args.push(ast::CallArg::Pos(expr));
                    }
                },
                ArgType::Splat => {
                    args.push(ast::CallArg::PosSplat(expr));
                }
                ArgType::KwargsSplat => {
                    args.push(ast::CallArg::KwargSplat(expr));
                    has_kwargs = true;
                }
            }

            if args.len() > 2000 {
                syntax_error!("too many arguments in function call")
            }
        }

        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<ast::Expr, Error> {
        with_recursion_guard!(self, self.parse_primary_impl())
    }

    fn parse_primary_impl(&mut self) -> Result<ast::Expr, Error> {
        let (token, span) = expect_token!(self, "expression");
        macro_rules! const_val {
            ($expr:expr) => {
                make_const(Value::from($expr), self.stream.expand_span(span))
            };
        }

        match token {
            Token::Ident("true" | "True") => Ok(const_val!(true)),
            Token::Ident("false" | "False") => Ok(const_val!(false)),
            Token::Ident("none" | "None") => Ok(const_val!(())),
            Token::Ident(name) => Ok(ast::Expr::Var(Spanned::new(
                ast::Var {
                    id: name.to_string(),
                },
                span,
            ))),
            Token::Str(_) | Token::String(_) => {
                let mut buf = match token {
                    Token::Str(s) => s.to_owned(),
                    Token::String(s) => s,
                    _ => unreachable!(),
                };
                // adjacent string literals concatenate
                loop {
                    match self.stream.current()? {
                        Some((Token::Str(s), _)) => buf.push_str(s),
                        Some((Token::String(s), _)) => buf.push_str(s),
                        _ => break,
                    }
                    self.stream.next()?;
                }
                Ok(const_val!(buf))
            }
            Token::Int(val) => Ok(const_val!(val)),
            Token::Float(val) => Ok(const_val!(val)),
            Token::ParenOpen => self.parse_tuple_or_expression(span),
            Token::BracketOpen => self.parse_list_expr(span),
            Token::BraceOpen => self.parse_map_expr(span),
            token => syntax_error!("unexpected {}", token),
        }
    }

    fn parse_list_expr(&mut self, span: Span) -> Result<ast::Expr, Error> {
        let mut items = Vec::new();
        loop {
            if skip_token!(self, Token::BracketClose) {
                break;
            }
            if !items.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::BracketClose) {
                    break;
                }
            }
            items.push(self.parse_expr()?);
        }
        Ok(ast::Expr::List(Spanned::new(
            ast::List { items },
            self.stream.expand_span(span),
        )))
    }

    fn parse_map_expr(&mut self, span: Span) -> Result<ast::Expr, Error> {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        loop {
            if skip_token!(self, Token::BraceClose) {
                break;
            }
            if !keys.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::BraceClose) {
                    break;
                }
            }
            keys.push(self.parse_expr()?);
            expect_token!(self, Token::Colon, "`:`");
            values.push(self.parse_expr()?);
        }
        Ok(ast::Expr::Map(Spanned::new(
            ast::Map { keys, values },
            self.stream.expand_span(span),
        )))
    }

    fn parse_tuple_or_expression(&mut self, span: Span) -> Result<ast::Expr, Error> {
        // tuple syntax parses into lists; the engine has no separate
        // tuple type
        if skip_token!(self, Token::ParenClose) {
            return Ok(ast::Expr::List(Spanned::new(
                ast::List { items: vec![] },
                self.stream.expand_span(span),
            )));
        }
        let mut expr = self.parse_expr()?;
        if matches_token!(self, Token::Comma) {
            let mut items = vec![expr];
            loop {
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
                items.push(self.parse_expr()?);
            }
            expr = ast::Expr::List(Spanned::new(
                ast::List { items },
                self.stream.expand_span(span),
            ));
        } else {
            expect_token!(self, Token::ParenClose, "`)`");
        }
        Ok(expr)
    }

    fn parse_expr(&mut self) -> Result<ast::Expr, Error> {
        with_recursion_guard!(self, self.parse_ifexpr())
    }

    fn parse_expr_noif(&mut self) -> Result<ast::Expr, Error> {
        self.parse_or()
    }

    fn parse_stmt(&mut self) -> Result<ast::Stmt, Error> {
        with_recursion_guard!(self, self.parse_stmt_unprotected())
    }

    fn parse_stmt_unprotected(&mut self) -> Result<ast::Stmt, Error> {
        let (token, span) = expect_token!(self, "block keyword");

        macro_rules! respan {
            ($expr:expr) => {
                Spanned::new($expr, self.stream.expand_span(span))
            };
        }

        let ident = match token {
            Token::Ident(ident) => ident,
            token => syntax_error!("unknown {}, expected statement", token),
        };

        Ok(match ident {
            "for" => ast::Stmt::ForLoop(respan!(self.parse_for_stmt()?)),
            "if" => ast::Stmt::IfCond(respan!(self.parse_if_cond()?)),
            "with" => ast::Stmt::WithBlock(respan!(self.parse_with_block()?)),
            "set" => match self.parse_set()? {
                SetParseResult::Set(rv) => ast::Stmt::Set(respan!(rv)),
                SetParseResult::SetBlock(rv) => ast::Stmt::SetBlock(respan!(rv)),
            },
            "autoescape" => ast::Stmt::AutoEscape(respan!(self.parse_auto_escape()?)),
            "filter" => ast::Stmt::FilterBlock(respan!(self.parse_filter_block()?)),
            "block" => ast::Stmt::Block(respan!(self.parse_block()?)),
            "extends" => ast::Stmt::Extends(respan!(self.parse_extends()?)),
            "include" => ast::Stmt::Include(respan!(self.parse_include()?)),
            "import" => ast::Stmt::Import(respan!(self.parse_import()?)),
            "from" => ast::Stmt::FromImport(respan!(self.parse_from_import()?)),
            "macro" => ast::Stmt::Macro(respan!(self.parse_macro()?)),
            "call" => ast::Stmt::CallBlock(respan!(self.parse_call_block()?)),
            "do" => ast::Stmt::Do(respan!(self.parse_do()?)),
            "trans" => ast::Stmt::Trans(respan!(self.parse_trans()?)),
            "continue" => {
                if !self.loop_controls {
                    syntax_error!(
                        "'continue' requires the loop controls extension to be enabled"
                    );
                }
                if !self.in_loop {
                    assertion_error!("'continue' must be placed inside a loop");
                }
                ast::Stmt::Continue(respan!(ast::Continue))
            }
            "break" => {
                if !self.loop_controls {
                    syntax_error!("'break' requires the loop controls extension to be enabled");
                }
                if !self.in_loop {
                    assertion_error!("'break' must be placed inside a loop");
                }
                ast::Stmt::Break(respan!(ast::Break))
            }
            name => syntax_error!("unknown statement {}", name),
        })
    }

    fn parse_assign_name(&mut self, dotted: bool) -> Result<ast::Expr, Error> {
        let (id, span) = expect_token!(self, Token::Ident(name) => name, "identifier");
        if RESERVED_NAMES.contains(&id) {
            assertion_error!("cannot assign to reserved variable name {}", id);
        }
        let mut rv = ast::Expr::Var(Spanned::new(
            ast::Var { id: id.to_string() },
            span,
        ));
        if dotted {
            while skip_token!(self, Token::Dot) {
                let (attr, span) = expect_token!(self, Token::Ident(name) => name, "identifier");
                rv = ast::Expr::GetAttr(Spanned::new(
                    ast::GetAttr {
                        expr: rv,
                        name: attr.to_string(),
                    },
                    span,
                ));
            }
        }
        Ok(rv)
    }

    fn parse_assignment(&mut self) -> Result<ast::Expr, Error> {
        let span = self.stream.current_span();
        let mut items = Vec::new();
        let mut is_tuple = false;

        loop {
            if !items.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
            }
            if matches_token!(
                self,
                Token::ParenClose
                    | Token::VariableEnd
                    | Token::BlockEnd
                    | Token::Ident("in")
            ) {
                break;
            }
            items.push(if skip_token!(self, Token::ParenOpen) {
                let rv = self.parse_assignment()?;
                expect_token!(self, Token::ParenClose, "`)`");
                rv
            } else {
                self.parse_assign_name(false)?
            });
            if matches_token!(self, Token::Comma) {
                is_tuple = true;
            } else {
                break;
            }
        }

        if !is_tuple && items.len() == 1 {
            Ok(items.into_iter().next().unwrap())
        } else {
            Ok(ast::Expr::List(Spanned::new(
                ast::List { items },
                self.stream.expand_span(span),
            )))
        }
    }

    fn parse_for_stmt(&mut self) -> Result<ast::ForLoop, Error> {
        let old_in_loop = std::mem::replace(&mut self.in_loop, true);
        let target = self.parse_assignment()?;
        expect_token!(self, Token::Ident("in"), "in");
        let iter = self.parse_expr_noif()?;
        let filter_expr = if skip_token!(self, Token::Ident("if")) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let recursive = skip_token!(self, Token::Ident("recursive"));
        expect_token!(self, Token::BlockEnd, "end of block");
        let body =
            self.subparse(&|tok| matches!(tok, Token::Ident("endfor" | "else")))?;
        let else_body = if skip_token!(self, Token::Ident("else")) {
            expect_token!(self, Token::BlockEnd, "end of block");
            self.subparse(&|tok| matches!(tok, Token::Ident("endfor")))?
        } else {
            Vec::new()
        };
        self.stream.next()?;
        self.in_loop = old_in_loop;
        Ok(ast::ForLoop {
            target,
            iter,
            filter_expr,
            recursive,
            body: Arc::new(body),
            else_body,
        })
    }

    fn parse_if_cond(&mut self) -> Result<ast::IfCond, Error> {
        let expr = self.parse_expr_noif()?;
        expect_token!(self, Token::BlockEnd, "end of block");
        let true_body =
            self.subparse(&|tok| matches!(tok, Token::Ident("endif" | "else" | "elif")))?;
        let false_body = match self.stream.next()? {
            Some((Token::Ident("else"), _)) => {
                expect_token!(self, Token::BlockEnd, "end of block");
                let rv = self.subparse(&|tok| matches!(tok, Token::Ident("endif")))?;
                self.stream.next()?;
                rv
            }
            Some((Token::Ident("elif"), span)) => vec![ast::Stmt::IfCond(Spanned::new(
                self.parse_if_cond()?,
                self.stream.expand_span(span),
            ))],
            _ => Vec::new(),
        };

        Ok(ast::IfCond {
            expr,
            true_body,
            false_body,
        })
    }

    fn parse_with_block(&mut self) -> Result<ast::WithBlock, Error> {
        let mut assignments = Vec::new();

        while !matches_token!(self, Token::BlockEnd) {
            if !assignments.is_empty() {
                expect_token!(self, Token::Comma, "comma");
            }
            let target = if skip_token!(self, Token::ParenOpen) {
                let assign = self.parse_assignment()?;
                expect_token!(self, Token::ParenClose, "`)`");
                assign
            } else {
                self.parse_assign_name(false)?
            };
            expect_token!(self, Token::Assign, "assignment operator");
            let expr = self.parse_expr()?;
            assignments.push((target, expr));
        }

        expect_token!(self, Token::BlockEnd, "end of block");
        let body = self.subparse(&|tok| matches!(tok, Token::Ident("endwith")))?;
        self.stream.next()?;
        Ok(ast::WithBlock { assignments, body })
    }

    fn parse_set(&mut self) -> Result<SetParseResult, Error> {
        let (target, in_paren) = if skip_token!(self, Token::ParenOpen) {
            let assign = self.parse_assignment()?;
            expect_token!(self, Token::ParenClose, "`)`");
            (assign, true)
        } else {
            (self.parse_assign_name(true)?, false)
        };

        if !in_paren && matches_token!(self, Token::BlockEnd | Token::Pipe) {
            let filter = if skip_token!(self, Token::Pipe) {
                Some(self.parse_filter_chain()?)
            } else {
                None
            };
            expect_token!(self, Token::BlockEnd, "end of block");
            let body = self.subparse(&|tok| matches!(tok, Token::Ident("endset")))?;
            self.stream.next()?;
            Ok(SetParseResult::SetBlock(ast::SetBlock {
                target,
                filter,
                body,
            }))
        } else {
            expect_token!(self, Token::Assign, "assignment operator");
            let expr = self.parse_expr()?;
            Ok(SetParseResult::Set(ast::Set { target, expr }))
        }
    }

    fn parse_block(&mut self) -> Result<ast::Block, Error> {
        if self.in_macro {
            syntax_error!("block tags in macros are not allowed");
        }
        let old_in_loop = std::mem::replace(&mut self.in_loop, false);
        let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
        if !self.blocks.insert(name.to_string()) {
            assertion_error!("block '{}' defined twice", name);
        }

        let mut scoped = false;
        let mut required = false;
        loop {
            if skip_token!(self, Token::Ident("scoped")) {
                scoped = true;
            } else if skip_token!(self, Token::Ident("required")) {
                required = true;
            } else {
                break;
            }
        }

        expect_token!(self, Token::BlockEnd, "end of block");
        let body = self.subparse(&|tok| matches!(tok, Token::Ident("endblock")))?;
        self.stream.next()?;

        if let Some((Token::Ident(trailing_name), _)) = self.stream.current()? {
            if *trailing_name != name {
                syntax_error!(
                    "mismatching name on block. Got `{}`, expected `{}`",
                    *trailing_name,
                    name
                );
            }
            self.stream.next()?;
        }
        self.in_loop = old_in_loop;

        Ok(ast::Block {
            name: name.to_string(),
            body: Arc::new(body),
            scoped,
            required,
        })
    }

    fn parse_auto_escape(&mut self) -> Result<ast::AutoEscape, Error> {
        let enabled = self.parse_expr()?;
        expect_token!(self, Token::BlockEnd, "end of block");
        let body = self.subparse(&|tok| matches!(tok, Token::Ident("endautoescape")))?;
        self.stream.next()?;
        Ok(ast::AutoEscape { enabled, body })
    }

    fn parse_filter_chain(&mut self) -> Result<ast::Expr, Error> {
        let mut filter = None;

        while !matches_token!(self, Token::BlockEnd) {
            if filter.is_some() {
                expect_token!(self, Token::Pipe, "`|`");
            }
            let (name, span) = expect_token!(self, Token::Ident(name) => name, "identifier");
            let args = if matches_token!(self, Token::ParenOpen) {
                self.parse_args()?
            } else {
                Vec::new()
            };
            filter = Some(ast::Expr::Filter(Spanned::new(
                ast::Filter {
                    name: name.to_string(),
                    expr: filter,
                    args,
                },
                self.stream.expand_span(span),
            )));
        }

        filter.ok_or_else(|| syntax_error(Cow::Borrowed("expected a filter")))
    }

    fn parse_filter_block(&mut self) -> Result<ast::FilterBlock, Error> {
        let filter = self.parse_filter_chain()?;
        expect_token!(self, Token::BlockEnd, "end of block");
        let body = self.subparse(&|tok| matches!(tok, Token::Ident("endfilter")))?;
        self.stream.next()?;
        Ok(ast::FilterBlock { filter, body })
    }

    fn parse_extends(&mut self) -> Result<ast::Extends, Error> {
        self.num_extends += 1;
        if self.num_extends > 1 {
            assertion_error!("tried to extend a second time in the same template");
        }
        let name = self.parse_expr()?;
        Ok(ast::Extends { name })
    }

    fn parse_include(&mut self) -> Result<ast::Include, Error> {
        let name = self.parse_expr()?;
        let mut with_context = true;
        if let Some(explicit) = self.parse_context_marker()? {
            with_context = explicit;
        }

        let ignore_missing = if skip_token!(self, Token::Ident("ignore")) {
            expect_token!(self, Token::Ident("missing"), "missing keyword");
            if let Some(explicit) = self.parse_context_marker()? {
                with_context = explicit;
            }
            true
        } else {
            false
        };
        Ok(ast::Include {
            name,
            ignore_missing,
            with_context,
        })
    }

    fn parse_import(&mut self) -> Result<ast::Import, Error> {
        let expr = self.parse_expr()?;
        expect_token!(self, Token::Ident("as"), "as");
        let name = self.parse_assign_name(false)?;
        let with_context = self.parse_context_marker()?.unwrap_or(false);
        Ok(ast::Import {
            expr,
            name,
            with_context,
        })
    }

    fn parse_from_import(&mut self) -> Result<ast::FromImport, Error> {
        let expr = self.parse_expr()?;
        let mut names = Vec::new();
        let mut with_context = false;
        expect_token!(self, Token::Ident("import"), "import");
        loop {
            if let Some(explicit) = self.parse_context_marker()? {
                with_context = explicit;
                break;
            }
            if matches_token!(self, Token::BlockEnd) {
                break;
            }
            if !names.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
            }
            if let Some(explicit) = self.parse_context_marker()? {
                with_context = explicit;
                break;
            }
            if matches_token!(self, Token::BlockEnd) {
                break;
            }
            let name = self.parse_assign_name(false)?;
            let alias = if skip_token!(self, Token::Ident("as")) {
                Some(self.parse_assign_name(false)?)
            } else {
                None
            };
            names.push((name, alias));
        }
        Ok(ast::FromImport {
            expr,
            names,
            with_context,
        })
    }

    /// Parses a `with context` / `without context` marker.
    fn parse_context_marker(&mut self) -> Result<Option<bool>, Error> {
        if skip_token!(self, Token::Ident("with")) {
            expect_token!(self, Token::Ident("context"), "context");
            Ok(Some(true))
        } else if skip_token!(self, Token::Ident("without")) {
            expect_token!(self, Token::Ident("context"), "context");
            Ok(Some(false))
        } else {
            Ok(None)
        }
    }

    fn parse_macro_args_and_defaults(
        &mut self,
        args: &mut Vec<String>,
        defaults: &mut Vec<ast::Expr>,
    ) -> Result<(), Error> {
        loop {
            if skip_token!(self, Token::ParenClose) {
                break;
            }
            if !args.is_empty() {
                expect_token!(self, Token::Comma, "`,`");
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
            }
            let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
            if RESERVED_NAMES.contains(&name) {
                assertion_error!("cannot use reserved variable name {} as argument", name);
            }
            args.push(name.to_string());
            if skip_token!(self, Token::Assign) {
                defaults.push(self.parse_expr()?);
            } else if !defaults.is_empty() {
                assertion_error!("non-default argument follows default argument");
            }
        }
        Ok(())
    }

    fn parse_macro_or_call_block_body(
        &mut self,
        args: Vec<String>,
        defaults: Vec<ast::Expr>,
        name: Option<&'a str>,
    ) -> Result<ast::Macro, Error> {
        expect_token!(self, Token::BlockEnd, "end of block");
        let old_in_loop = std::mem::replace(&mut self.in_loop, false);
        let old_in_macro = std::mem::replace(&mut self.in_macro, true);
        let body = self.subparse(&|tok| match tok {
            Token::Ident("endmacro") => name.is_some(),
            Token::Ident("endcall") => name.is_none(),
            _ => false,
        })?;
        self.in_macro = old_in_macro;
        self.in_loop = old_in_loop;
        self.stream.next()?;
        let (referenced, caller_referenced) = meta::find_macro_closure(&body);
        Ok(ast::Macro {
            name: name.unwrap_or("caller").to_string(),
            args,
            defaults,
            body: Arc::new(body),
            referenced,
            caller_referenced,
        })
    }

    fn parse_macro(&mut self) -> Result<ast::Macro, Error> {
        let (name, _) = expect_token!(self, Token::Ident(name) => name, "identifier");
        expect_token!(self, Token::ParenOpen, "`(`");
        let mut args = Vec::new();
        let mut defaults = Vec::new();
        self.parse_macro_args_and_defaults(&mut args, &mut defaults)?;
        self.parse_macro_or_call_block_body(args, defaults, Some(name))
    }

    fn parse_call_block(&mut self) -> Result<ast::CallBlock, Error> {
        let span = self.stream.last_span();
        let mut args = Vec::new();
        let mut defaults = Vec::new();
        if skip_token!(self, Token::ParenOpen) {
            self.parse_macro_args_and_defaults(&mut args, &mut defaults)?;
        }
        let call = match self.parse_expr()? {
            ast::Expr::Call(call) => call,
            expr => syntax_error!(
                "expected call expression in call block, got {}",
                expr.description()
            ),
        };
        let macro_decl = self.parse_macro_or_call_block_body(args, defaults, None)?;
        Ok(ast::CallBlock {
            call,
            macro_decl: Spanned::new(macro_decl, self.stream.expand_span(span)),
        })
    }

    fn parse_do(&mut self) -> Result<ast::Do, Error> {
        let expr = self.parse_expr()?;
        Ok(ast::Do { expr })
    }

    fn parse_trans(&mut self) -> Result<ast::Trans, Error> {
        let mut trimmed = false;
        let mut vars: Vec<(String, ast::Expr)> = Vec::new();

        // modifiers and bound variables in the opening tag
        while !matches_token!(self, Token::BlockEnd) {
            if !vars.is_empty() {
                skip_token!(self, Token::Comma);
            }
            if matches_token!(self, Token::BlockEnd) {
                break;
            }
            let (name, span) = expect_token!(self, Token::Ident(name) => name, "identifier");
            if name == "trimmed" && vars.is_empty() && !matches_token!(self, Token::Assign) {
                trimmed = true;
                continue;
            }
            if skip_token!(self, Token::Assign) {
                vars.push((name.to_string(), self.parse_expr()?));
            } else {
                // a bare name binds the context variable of that name
                vars.push((
                    name.to_string(),
                    ast::Expr::Var(Spanned::new(
                        ast::Var {
                            id: name.to_string(),
                        },
                        span,
                    )),
                ));
            }
        }
        expect_token!(self, Token::BlockEnd, "end of block");

        let (singular, terminator) = self.parse_trans_body()?;
        let plural = if terminator == "pluralize" {
            let count_name = if let Some((Token::Ident(name), _)) = self.stream.current()? {
                let name = name.to_string();
                self.stream.next()?;
                name
            } else if vars.iter().any(|(name, _)| name == "count") {
                "count".to_string()
            } else if let Some((name, _)) = vars.first() {
                name.clone()
            } else {
                assertion_error!("pluralize requires a counter variable on the trans block");
            };
            expect_token!(self, Token::BlockEnd, "end of block");
            let (pieces, terminator) = self.parse_trans_body()?;
            if terminator != "endtrans" {
                syntax_error!("a trans block supports at most one pluralize section");
            }
            Some(ast::TransPlural { count_name, pieces })
        } else {
            None
        };

        Ok(ast::Trans {
            vars,
            trimmed,
            singular,
            plural,
        })
    }

    /// Parses the body of a trans block up to `pluralize` or
    /// `endtrans`, whose name is returned.  The closing `%}` is left
    /// in the stream for the caller.
    fn parse_trans_body(&mut self) -> Result<(Vec<ast::TransPiece>, &'a str), Error> {
        let mut pieces = Vec::new();
        loop {
            match self.stream.next()? {
                Some((Token::TemplateData(raw), _)) => {
                    pieces.push(ast::TransPiece::Text(raw.to_string()));
                }
                Some((Token::VariableStart, _)) => {
                    let (name, _) =
                        expect_token!(self, Token::Ident(name) => name, "identifier");
                    if matches_token!(self, Token::Dot | Token::BracketOpen | Token::Pipe) {
                        syntax_error!(
                            "only simple variables are allowed inside trans blocks"
                        );
                    }
                    expect_token!(self, Token::VariableEnd, "end of variable block");
                    pieces.push(ast::TransPiece::Var(name.to_string()));
                }
                Some((Token::BlockStart, _)) => {
                    let (name, _) = expect_token!(
                        self,
                        Token::Ident(name @ ("pluralize" | "endtrans")) => name,
                        "pluralize or endtrans"
                    );
                    return Ok((pieces, name));
                }
                Some((token, _)) => {
                    return Err(unexpected(token, "template data or variable"));
                }
                None => return Err(unexpected_eof("endtrans")),
            }
        }
    }

    fn subparse(
        &mut self,
        end_check: &dyn Fn(&Token) -> bool,
    ) -> Result<Vec<ast::Stmt>, Error> {
        let mut rv = Vec::new();
        while let Some((token, span)) = self.stream.next()? {
            match token {
                Token::TemplateData(raw) => rv.push(ast::Stmt::EmitRaw(Spanned::new(
                    ast::EmitRaw {
                        raw: raw.to_string(),
                    },
                    span,
                ))),
                Token::VariableStart => {
                    let expr = self.parse_expr()?;
                    rv.push(ast::Stmt::EmitExpr(Spanned::new(
                        ast::EmitExpr { expr },
                        self.stream.expand_span(span),
                    )));
                    expect_token!(self, Token::VariableEnd, "end of variable block");
                }
                Token::BlockStart => {
                    let (tok, _span) = match self.stream.current()? {
                        Some(rv) => rv,
                        None => syntax_error!("unexpected end of input, expected keyword"),
                    };
                    if end_check(tok) {
                        return Ok(rv);
                    }
                    rv.push(self.parse_stmt()?);
                    expect_token!(self, Token::BlockEnd, "end of block");
                }
                _ => unreachable!("lexer produced garbage"),
            }
        }
        Ok(rv)
    }

    #[inline]
    fn attach_location_to_error(&mut self, mut err: Error) -> Error {
        if err.line().is_none() {
            err.set_location(self.filename, self.stream.last_span().start_line as usize);
        }
        err
    }
}

/// Parses a template.
pub fn parse(
    source: &str,
    filename: &str,
    options: &CompileOptions,
) -> Result<ast::Stmt, Error> {
    Parser::new(source, filename, false, options).parse()
}

/// Parses a standalone expression.
pub fn parse_expr(source: &str) -> Result<ast::Expr, Error> {
    Parser::new(source, "<expression>", true, &CompileOptions::default())
        .parse_standalone_expr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let stmt = parse(
            "Hello {{ name }}!",
            "test.txt",
            &CompileOptions::default(),
        )
        .unwrap();
        match stmt {
            ast::Stmt::Template(tmpl) => {
                assert_eq!(tmpl.children.len(), 3);
                assert!(matches!(tmpl.children[0], ast::Stmt::EmitRaw(_)));
                assert!(matches!(tmpl.children[1], ast::Stmt::EmitExpr(_)));
                assert!(matches!(tmpl.children[2], ast::Stmt::EmitRaw(_)));
            }
            _ => panic!("expected template statement"),
        }
    }

    #[test]
    fn test_chained_comparison_parses_flat() {
        let expr = parse_expr("1 < 2 < 3").unwrap();
        match expr {
            ast::Expr::Compare(cmp) => {
                assert_eq!(cmp.ops.len(), 2);
            }
            other => panic!("expected compare, got {}", other.description()),
        }
    }

    #[test]
    fn test_reserved_assignment_rejected() {
        let err = parse(
            "{% set loop = 1 %}",
            "test.txt",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssertionError);
    }

    #[test]
    fn test_double_extends_rejected() {
        let err = parse(
            "{% extends 'a' %}{% extends 'b' %}",
            "test.txt",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssertionError);
    }

    #[test]
    fn test_duplicate_block_rejected() {
        let err = parse(
            "{% block a %}{% endblock %}{% block a %}{% endblock %}",
            "test.txt",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssertionError);
    }

    #[test]
    fn test_loop_controls_gated() {
        let err = parse(
            "{% for x in y %}{% break %}{% endfor %}",
            "test.txt",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyntaxError);

        let mut options = CompileOptions::default();
        options.loop_controls = true;
        assert!(parse(
            "{% for x in y %}{% break %}{% endfor %}",
            "test.txt",
            &options,
        )
        .is_ok());
    }

    #[test]
    fn test_default_after_non_default_macro_arg() {
        let err = parse(
            "{% macro m(a=1, b) %}{% endmacro %}",
            "test.txt",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssertionError);
    }

    #[test]
    fn test_trans_parses() {
        let stmt = parse(
            "{% trans count=n %}{{ count }} item{% pluralize %}{{ count }} items{% endtrans %}",
            "test.txt",
            &CompileOptions::default(),
        )
        .unwrap();
        match stmt {
            ast::Stmt::Template(tmpl) => match &tmpl.children[0] {
                ast::Stmt::Trans(trans) => {
                    assert_eq!(trans.vars.len(), 1);
                    assert!(trans.plural.is_some());
                    assert_eq!(trans.plural.as_ref().unwrap().count_name, "count");
                }
                _ => panic!("expected trans statement"),
            },
            _ => panic!("expected template statement"),
        }
    }
}
