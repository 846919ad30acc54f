use std::fmt;

use serde::{Deserialize, Serialize};

/// Represents a token in the stream.
#[derive(Debug, Clone)]
pub enum Token<'a> {
    /// Raw template data.
    TemplateData(&'a str),
    /// Variable block start.
    VariableStart,
    /// Variable block end.
    VariableEnd,
    /// Statement block start.
    BlockStart,
    /// Statement block end.
    BlockEnd,
    /// An identifier.
    Ident(&'a str),
    /// A borrowed string without escapes.
    Str(&'a str),
    /// An allocated string where escapes were processed.
    String(String),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A plus (`+`) operator.
    Plus,
    /// A minus (`-`) operator.
    Minus,
    /// A mul (`*`) operator.
    Mul,
    /// A div (`/`) operator.
    Div,
    /// A floor division (`//`) operator.
    FloorDiv,
    /// Power operator (`**`).
    Pow,
    /// A mod (`%`) operator.
    Mod,
    /// A dot operator (`.`)
    Dot,
    /// The comma operator (`,`)
    Comma,
    /// The colon operator (`:`)
    Colon,
    /// The tilde operator (`~`)
    Tilde,
    /// The assignment operator (`=`)
    Assign,
    /// The pipe symbol.
    Pipe,
    /// `==` operator
    Eq,
    /// `!=` operator
    Ne,
    /// `>` operator
    Gt,
    /// `>=` operator
    Gte,
    /// `<` operator
    Lt,
    /// `<=` operator
    Lte,
    /// Open bracket
    BracketOpen,
    /// Close bracket
    BracketClose,
    /// Open parenthesis
    ParenOpen,
    /// Close parenthesis
    ParenClose,
    /// Open brace
    BraceOpen,
    /// Close brace
    BraceClose,
}

impl<'a> fmt::Display for Token<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Token::TemplateData(_) => "template-data",
            Token::VariableStart => "start of variable block",
            Token::VariableEnd => "end of variable block",
            Token::BlockStart => "start of block",
            Token::BlockEnd => "end of block",
            Token::Ident(_) => "identifier",
            Token::Str(_) | Token::String(_) => "string",
            Token::Int(_) => "integer",
            Token::Float(_) => "float",
            Token::Plus => "`+`",
            Token::Minus => "`-`",
            Token::Mul => "`*`",
            Token::Div => "`/`",
            Token::FloorDiv => "`//`",
            Token::Pow => "`**`",
            Token::Mod => "`%`",
            Token::Dot => "`.`",
            Token::Comma => "`,`",
            Token::Colon => "`:`",
            Token::Tilde => "`~`",
            Token::Assign => "`=`",
            Token::Pipe => "`|`",
            Token::Eq => "`==`",
            Token::Ne => "`!=`",
            Token::Gt => "`>`",
            Token::Gte => "`>=`",
            Token::Lt => "`<`",
            Token::Lte => "`<=`",
            Token::BracketOpen => "`[`",
            Token::BracketClose => "`]`",
            Token::ParenOpen => "`(`",
            Token::ParenClose => "`)`",
            Token::BraceOpen => "`{`",
            Token::BraceClose => "`}`",
        })
    }
}

/// Token span information.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            " @ {}:{}-{}:{}",
            self.start_line, self.start_col, self.end_line, self.end_col
        )
    }
}
