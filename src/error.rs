use thiserror::Error;

use crate::lexer::Pos;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("lex error at {pos} near '{text}'")]
    Lex { pos: Pos, text: String },
    #[error("parse error at {pos}: {message}")]
    Parse { pos: Pos, message: String },
    #[error("{pos}: {kind}")]
    Eval { pos: Pos, kind: EvalErrorKind },
    #[error("fatal: {0}")]
    Fatal(#[from] Fatal),
}

impl Error {
    /// The evaluation error kind, if this is an ordinary evaluation error.
    pub fn eval_kind(&self) -> Option<&EvalErrorKind> {
        match self {
            Error::Eval { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

/// Errors a running script can raise. They carry no position; the evaluator
/// attaches the position of the command or call that failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalErrorKind {
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),
    #[error("unknown function {0}()")]
    UnknownFunction(String),
    #[error("function {name} expects {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("invalid arguments for {op}: {message}")]
    InvalidOperands { op: &'static str, message: String },
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("type error: {0}")]
    Type(String),
    #[error("cannot assign to constant {0}")]
    ConstAssignment(String),
    #[error("assertion failure: {message}: {left} != {right}")]
    Assertion {
        message: String,
        left: String,
        right: String,
    },
    #[error("{name}(): {message}")]
    Builtin { name: &'static str, message: String },
    #[error("no main function found")]
    NoMain,
}

impl EvalErrorKind {
    pub fn at(self, pos: Pos) -> Error {
        Error::Eval { pos, kind: self }
    }
}

/// Conditions that end a run outright.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fatal {
    #[error("stack limit of {0} frames exceeded")]
    StackOverflow(usize),
    #[error("interpreter was stopped by an earlier fatal error")]
    Poisoned,
}
