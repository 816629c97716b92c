use std::fmt;

use logos::Logos;
use serde::Serialize;

use crate::error::Error;

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    #[regex(r"[ \t\r\n]+", logos::skip)]
    Whitespace,
    #[regex(r"#[^\r\n]*")]
    Comment,

    // Keywords are matched case-insensitively in `lex`; these attributes only
    // catch the common lowercase spelling.
    #[token("def")]
    Def,
    #[token("end")]
    End,
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("del")]
    Del,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[regex(r#""([^"\\]|\\.)*""#)]
    String,
    #[regex(r"[0-9]+(\.[0-9]+)?|\.[0-9]+")]
    Number,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("=>")]
    Arrow,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!=")]
    BangEqual,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Equal,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,

    #[error]
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text; for strings the unquoted, unescaped contents.
    pub text: String,
    pub pos: Pos,
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word.to_ascii_lowercase().as_str() {
        "def" => TokenKind::Def,
        "end" => TokenKind::End,
        "let" => TokenKind::Let,
        "const" => TokenKind::Const,
        "del" => TokenKind::Del,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => return None,
    };
    Some(kind)
}

fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

pub fn lex(input: &str) -> Result<Vec<Token>, Error> {
    let mut lex = TokenKind::lexer(input);
    // Precompute line starts for line/col mapping
    let mut line_starts: Vec<usize> = vec![0];
    for (i, ch) in input.char_indices() {
        if ch == '\n' {
            line_starts.push(i + 1);
        }
    }
    let find_pos = |start: usize| -> Pos {
        let line = line_starts.partition_point(|&s| s <= start);
        let line_start = line_starts[line - 1];
        Pos {
            line,
            col: input[line_start..start].chars().count() + 1,
        }
    };
    let mut tokens = Vec::new();
    while let Some(kind) = lex.next() {
        let slice = lex.slice();
        let pos = find_pos(lex.span().start);
        let (kind, text) = match kind {
            TokenKind::Error => {
                return Err(Error::Lex {
                    pos,
                    text: slice.to_string(),
                })
            }
            TokenKind::String => (kind, unescape(slice)),
            TokenKind::Ident => (keyword(slice).unwrap_or(kind), slice.to_string()),
            _ => (kind, slice.to_string()),
        };
        tokens.push(Token { kind, text, pos });
    }
    tracing::trace!(count = tokens.len(), "lexed source");
    Ok(tokens)
}
