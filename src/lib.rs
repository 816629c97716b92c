//! benji: a small scripting language for a retro graphics console.
//!
//! Source text goes through [`lexer::lex`] and [`parser::parse`] into an
//! [`ast::Program`], which an [`Interpreter`] loads and runs. Drawing
//! builtins write into a shared [`video::Video`].

pub mod ast;
pub mod builtins;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod scope;
pub mod stack;
pub mod value;
pub mod video;

pub use config::Config;
pub use error::{Error, EvalErrorKind, Fatal, Result};
pub use runtime::{execute, Interpreter, Io};
pub use value::Value;
