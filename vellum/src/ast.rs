use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tokens::Span;
use crate::value::Value;

/// Container for nodes with location info.
///
/// This container fulfills two purposes: it adds location information
/// to nodes, but it also ensures the node is heap allocated.  The
/// latter is useful to ensure that enum variants do not cause the enum
/// to become too large.
#[derive(Clone, Serialize, Deserialize)]
pub struct Spanned<T> {
    node: Box<T>,
    span: Span,
}

impl<T> Spanned<T> {
    /// Creates a new spanned node.
    pub fn new(node: T, span: Span) -> Spanned<T> {
        Spanned {
            node: Box::new(node),
            span,
        }
    }

    /// Accesses the span.
    pub fn span(&self) -> Span {
        self.span
    }

    /// Unwraps the inner node.
    pub fn into_inner(self) -> T {
        *self.node
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

impl<T> std::ops::DerefMut for Spanned<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.node
    }
}

impl<T: fmt::Debug> fmt::Debug for Spanned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.node, f)?;
        write!(f, "{:?}", self.span)
    }
}

/// A statement node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Template(Spanned<Template>),
    EmitExpr(Spanned<EmitExpr>),
    EmitRaw(Spanned<EmitRaw>),
    ForLoop(Spanned<ForLoop>),
    IfCond(Spanned<IfCond>),
    WithBlock(Spanned<WithBlock>),
    Set(Spanned<Set>),
    SetBlock(Spanned<SetBlock>),
    AutoEscape(Spanned<AutoEscape>),
    FilterBlock(Spanned<FilterBlock>),
    Block(Spanned<Block>),
    Extends(Spanned<Extends>),
    Include(Spanned<Include>),
    Import(Spanned<Import>),
    FromImport(Spanned<FromImport>),
    Macro(Spanned<Macro>),
    CallBlock(Spanned<CallBlock>),
    Do(Spanned<Do>),
    Trans(Spanned<Trans>),
    Continue(Spanned<Continue>),
    Break(Spanned<Break>),
}

impl Stmt {
    /// The line the statement starts on.
    pub fn line(&self) -> usize {
        match self {
            Stmt::Template(s) => s.span().start_line as usize,
            Stmt::EmitExpr(s) => s.span().start_line as usize,
            Stmt::EmitRaw(s) => s.span().start_line as usize,
            Stmt::ForLoop(s) => s.span().start_line as usize,
            Stmt::IfCond(s) => s.span().start_line as usize,
            Stmt::WithBlock(s) => s.span().start_line as usize,
            Stmt::Set(s) => s.span().start_line as usize,
            Stmt::SetBlock(s) => s.span().start_line as usize,
            Stmt::AutoEscape(s) => s.span().start_line as usize,
            Stmt::FilterBlock(s) => s.span().start_line as usize,
            Stmt::Block(s) => s.span().start_line as usize,
            Stmt::Extends(s) => s.span().start_line as usize,
            Stmt::Include(s) => s.span().start_line as usize,
            Stmt::Import(s) => s.span().start_line as usize,
            Stmt::FromImport(s) => s.span().start_line as usize,
            Stmt::Macro(s) => s.span().start_line as usize,
            Stmt::CallBlock(s) => s.span().start_line as usize,
            Stmt::Do(s) => s.span().start_line as usize,
            Stmt::Trans(s) => s.span().start_line as usize,
            Stmt::Continue(s) => s.span().start_line as usize,
            Stmt::Break(s) => s.span().start_line as usize,
        }
    }
}

/// An expression node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Var(Spanned<Var>),
    Const(Spanned<Const>),
    Slice(Spanned<Slice>),
    UnaryOp(Spanned<UnaryOp>),
    BinOp(Spanned<BinOp>),
    Compare(Spanned<Compare>),
    IfExpr(Spanned<IfExpr>),
    Filter(Spanned<Filter>),
    Test(Spanned<Test>),
    GetAttr(Spanned<GetAttr>),
    GetItem(Spanned<GetItem>),
    Call(Spanned<Call>),
    List(Spanned<List>),
    Map(Spanned<Map>),
}

impl Expr {
    /// A short human readable description of the expression kind.
    pub fn description(&self) -> &'static str {
        match self {
            Expr::Var(_) => "variable",
            Expr::Const(_) => "constant",
            Expr::Slice(_) => "slice",
            Expr::UnaryOp(_) => "unary operator",
            Expr::BinOp(_) => "binary operator",
            Expr::Compare(_) => "comparison",
            Expr::IfExpr(_) => "if expression",
            Expr::Filter(_) => "filter expression",
            Expr::Test(_) => "test expression",
            Expr::GetAttr(_) => "attribute lookup",
            Expr::GetItem(_) => "subscript",
            Expr::Call(_) => "call",
            Expr::List(_) => "list literal",
            Expr::Map(_) => "map literal",
        }
    }

    /// The span of the expression.
    pub fn span(&self) -> Span {
        match self {
            Expr::Var(s) => s.span(),
            Expr::Const(s) => s.span(),
            Expr::Slice(s) => s.span(),
            Expr::UnaryOp(s) => s.span(),
            Expr::BinOp(s) => s.span(),
            Expr::Compare(s) => s.span(),
            Expr::IfExpr(s) => s.span(),
            Expr::Filter(s) => s.span(),
            Expr::Test(s) => s.span(),
            Expr::GetAttr(s) => s.span(),
            Expr::GetItem(s) => s.span(),
            Expr::Call(s) => s.span(),
            Expr::List(s) => s.span(),
            Expr::Map(s) => s.span(),
        }
    }

    /// The line the expression starts on.
    pub fn line(&self) -> usize {
        self.span().start_line as usize
    }
}

/// Root template node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub children: Vec<Stmt>,
}

/// Outputs the expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitExpr {
    pub expr: Expr,
}

/// Outputs raw template data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitRaw {
    pub raw: String,
}

/// A for loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForLoop {
    pub target: Expr,
    pub iter: Expr,
    pub filter_expr: Option<Expr>,
    pub recursive: bool,
    pub body: Arc<Vec<Stmt>>,
    pub else_body: Vec<Stmt>,
}

/// An if/elif/else condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfCond {
    pub expr: Expr,
    pub true_body: Vec<Stmt>,
    pub false_body: Vec<Stmt>,
}

/// A with block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithBlock {
    pub assignments: Vec<(Expr, Expr)>,
    pub body: Vec<Stmt>,
}

/// A set statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Set {
    pub target: Expr,
    pub expr: Expr,
}

/// A set capture statement with an optional filter chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBlock {
    pub target: Expr,
    pub filter: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// An auto escape control block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoEscape {
    pub enabled: Expr,
    pub body: Vec<Stmt>,
}

/// Applies filters to a captured block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterBlock {
    pub filter: Expr,
    pub body: Vec<Stmt>,
}

/// A block in the template inheritance system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub body: Arc<Vec<Stmt>>,
    /// The block body closes over the scope it is defined in.
    pub scoped: bool,
    /// The block must be overridden by an extending template.
    pub required: bool,
}

/// An extends statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extends {
    pub name: Expr,
}

/// An include statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Include {
    pub name: Expr,
    pub ignore_missing: bool,
    pub with_context: bool,
}

/// A module import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub expr: Expr,
    pub name: Expr,
    pub with_context: bool,
}

/// A from import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromImport {
    pub expr: Expr,
    pub names: Vec<(Expr, Option<Expr>)>,
    pub with_context: bool,
}

/// Declares a macro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    pub args: Vec<String>,
    pub defaults: Vec<Expr>,
    pub body: Arc<Vec<Stmt>>,
    /// Free names the macro body references, captured into the
    /// closure when the macro is declared.
    pub referenced: Vec<String>,
    /// The body makes use of `caller()`.
    pub caller_referenced: bool,
}

/// A call block (a macro invocation with a caller body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallBlock {
    pub call: Spanned<Call>,
    pub macro_decl: Spanned<Macro>,
}

/// Evaluates an expression for its side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Do {
    pub expr: Expr,
}

/// A piece of a translatable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransPiece {
    Text(String),
    Var(String),
}

/// The plural half of a translation block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransPlural {
    pub count_name: String,
    pub pieces: Vec<TransPiece>,
}

/// A translation block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trans {
    pub vars: Vec<(String, Expr)>,
    pub trimmed: bool,
    pub singular: Vec<TransPiece>,
    pub plural: Option<TransPlural>,
}

/// Continues a loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continue;

/// Breaks from a loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Break;

/// Looks up a variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Var {
    pub id: String,
}

/// Loads a constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Const {
    pub value: Value,
}

/// Represents a slice expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slice {
    pub expr: Expr,
    pub start: Option<Expr>,
    pub stop: Option<Expr>,
    pub step: Option<Expr>,
}

/// A kind of unary operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Not,
    Neg,
}

/// An unary operator expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnaryOp {
    pub op: UnaryOpKind,
    pub expr: Expr,
}

/// A kind of binary operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOpKind {
    ScAnd,
    ScOr,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    Concat,
}

/// A binary operator expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinOp {
    pub op: BinOpKind,
    pub left: Expr,
    pub right: Expr,
}

/// A comparison operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
}

/// A chained comparison.
///
/// `a < b < c` evaluates as `(a < b) and (b < c)` with every operand
/// evaluated at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compare {
    pub expr: Expr,
    pub ops: Vec<(CompareOp, Expr)>,
}

/// An if expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfExpr {
    pub test_expr: Expr,
    pub true_expr: Expr,
    pub false_expr: Option<Expr>,
}

/// A filter application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    /// The piped value.  Missing for filter blocks where the value is
    /// supplied by the surrounding statement.
    pub expr: Option<Expr>,
    pub args: Vec<CallArg>,
}

/// A test application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    pub expr: Expr,
    pub args: Vec<CallArg>,
}

/// An attribute lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttr {
    pub expr: Expr,
    pub name: String,
}

/// An item lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetItem {
    pub expr: Expr,
    pub subscript_expr: Expr,
}

/// A call argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallArg {
    Pos(Expr),
    Kwarg(String, Expr),
    PosSplat(Expr),
    KwargSplat(Expr),
}

/// Calls something.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub expr: Expr,
    pub args: Vec<CallArg>,
}

/// Creates a list of values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct List {
    pub items: Vec<Expr>,
}

/// Creates a map of values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Map {
    pub keys: Vec<Expr>,
    pub values: Vec<Expr>,
}
