//! Syntax tree produced by the parser.
//!
//! Nodes are immutable once built. Function bodies and parameter lists are
//! reference counted so closures can share them with the tree.

use std::rc::Rc;

use serde::Serialize;

use crate::lexer::Pos;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub items: Vec<TopLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TopLevel {
    Remark(String),
    Const { pos: Pos, name: String, value: Expr },
    Let(Let),
    Fun(Rc<FunDef>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunDef {
    pub pos: Pos,
    pub name: String,
    pub params: Rc<[String]>,
    pub body: Rc<[Command]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub pos: Pos,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CommandKind {
    Remark(String),
    Let(Let),
    Del(Place),
    Return(Expr),
    If {
        cond: Expr,
        then_body: Vec<Command>,
        else_body: Vec<Command>,
    },
    While {
        cond: Expr,
        body: Vec<Command>,
    },
    Fun(Rc<FunDef>),
    Call(Call),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Let {
    pub pos: Pos,
    pub target: Place,
    pub value: Expr,
}

/// An assignable location: a name followed by zero or more index suffixes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub name: String,
    pub indexes: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    pub name: String,
    /// One argument list per `( ... )` group; `f(a)(b)` has two.
    pub groups: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub pos: Pos,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Number(f64),
    Bool(bool),
    Null,
    Str(String),
    Array(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Variable(String),
    Index(Box<Expr>, Box<Expr>),
    AnonFun {
        params: Rc<[String]>,
        body: Rc<[Command]>,
    },
    Call(Call),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    fn leaf() -> Expr {
        Expr {
            pos: Pos::default(),
            kind: ExprKind::Null,
        }
    }
}

// Long operator chains nest one level per operand; free them from a
// worklist instead of recursing through the boxes.
impl Drop for Expr {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_children(&mut self.kind, &mut pending);
        while let Some(mut e) = pending.pop() {
            take_children(&mut e.kind, &mut pending);
        }
    }
}

fn take_children(kind: &mut ExprKind, out: &mut Vec<Expr>) {
    match kind {
        ExprKind::Binary { left, right, .. } | ExprKind::Index(left, right) => {
            out.push(std::mem::replace(&mut **left, Expr::leaf()));
            out.push(std::mem::replace(&mut **right, Expr::leaf()));
        }
        ExprKind::Array(items) => out.append(items),
        ExprKind::Map(entries) => out.extend(entries.drain(..).map(|(_, e)| e)),
        ExprKind::Call(call) => {
            for group in call.groups.iter_mut() {
                out.append(group);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Pow,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Pow => "^",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}
