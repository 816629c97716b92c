use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{BinOp, Call, Command, CommandKind, Expr, ExprKind, FunDef, Let, Place, Program, TopLevel};
use crate::error::{Error, Result};
use crate::lexer::{Pos, Token, TokenKind};
use crate::stack::ensure_sufficient_stack;

pub fn parse(tokens: Vec<Token>) -> Result<Program> {
    let mut p = Parser { tokens, pos: 0 };
    p.parse_program()
}

/// Lex and parse in one step.
pub fn parse_source(src: &str) -> Result<Program> {
    parse(crate::lexer::lex(src)?)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    // Comments are only meaningful where a command may start; everywhere else
    // the cursor looks straight through them.
    fn lookahead(&self) -> impl Iterator<Item = &Token> {
        self.tokens[self.pos.min(self.tokens.len())..]
            .iter()
            .filter(|t| t.kind != TokenKind::Comment)
    }
    fn peek(&self) -> Option<&Token> {
        self.lookahead().next()
    }
    fn peek_is(&self, k: TokenKind) -> bool {
        self.peek().map(|t| t.kind) == Some(k)
    }
    fn peek_n_is(&self, n: usize, k: TokenKind) -> bool {
        self.lookahead().nth(n).map(|t| t.kind) == Some(k)
    }
    fn bump(&mut self) -> Option<Token> {
        while self.tokens.get(self.pos).map(|t| t.kind) == Some(TokenKind::Comment) {
            self.pos += 1;
        }
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }
    fn eat(&mut self, kind: TokenKind) -> Result<Token> {
        if self.peek_is(kind) {
            return self.bump().ok_or_else(|| self.error("unexpected end of input"));
        }
        match self.peek() {
            Some(t) => Err(self.error(format!("expected {:?}, found '{}'", kind, t.text))),
            None => Err(self.error(format!("expected {:?} at end of input", kind))),
        }
    }
    fn eat_ident(&mut self) -> Result<String> {
        Ok(self.eat(TokenKind::Ident)?.text)
    }
    /// A comment sitting directly at the cursor, consumed.
    fn take_remark(&mut self) -> Option<String> {
        let t = self.tokens.get(self.pos)?;
        if t.kind != TokenKind::Comment {
            return None;
        }
        let text = t.text.trim_start_matches('#').trim().to_string();
        self.pos += 1;
        Some(text)
    }
    fn current_pos(&self) -> Pos {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|t| t.pos)
            .unwrap_or_default()
    }
    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            pos: self.current_pos(),
            message: message.into(),
        }
    }

    fn parse_program(&mut self) -> Result<Program> {
        let mut items = Vec::new();
        loop {
            if let Some(text) = self.take_remark() {
                items.push(TopLevel::Remark(text));
                continue;
            }
            let Some(tok) = self.peek() else { break };
            let (pos, tk) = (tok.pos, tok.kind);
            let item = match tk {
                TokenKind::Const => {
                    self.bump();
                    let name = self.eat_ident()?;
                    self.eat(TokenKind::Equal)?;
                    let value = self.parse_expr()?;
                    self.eat(TokenKind::Semicolon)?;
                    TopLevel::Const { pos, name, value }
                }
                TokenKind::Let => {
                    let l = self.parse_let()?;
                    self.eat(TokenKind::Semicolon)?;
                    TopLevel::Let(l)
                }
                TokenKind::Def => TopLevel::Fun(Rc::new(self.parse_fun()?)),
                _ => {
                    let found = self.peek().map(|t| t.text.clone()).unwrap_or_default();
                    return Err(self.error(format!("expected const, let or def, found '{}'", found)));
                }
            };
            items.push(item);
        }
        Ok(Program { items })
    }

    fn parse_params(&mut self, close: TokenKind) -> Result<Rc<[String]>> {
        let start = self.current_pos();
        let mut params = Vec::new();
        if !self.peek_is(close) {
            params.push(self.eat_ident()?);
            while self.peek_is(TokenKind::Comma) {
                self.bump();
                params.push(self.eat_ident()?);
            }
        }
        self.eat(close)?;
        let mut seen = HashSet::new();
        for p in &params {
            if !seen.insert(p.as_str()) {
                return Err(Error::Parse {
                    pos: start,
                    message: format!("duplicate parameter '{}'", p),
                });
            }
        }
        Ok(params.into())
    }

    fn parse_fun(&mut self) -> Result<FunDef> {
        let pos = self.eat(TokenKind::Def)?.pos;
        let name = self.eat_ident()?;
        self.eat(TokenKind::LParen)?;
        let params = self.parse_params(TokenKind::RParen)?;
        let body = self.parse_commands(&[TokenKind::End])?;
        self.eat(TokenKind::End)?;
        Ok(FunDef {
            pos,
            name,
            params,
            body: body.into(),
        })
    }

    /// Commands up to (not including) one of `terminators`.
    fn parse_commands(&mut self, terminators: &[TokenKind]) -> Result<Vec<Command>> {
        let mut body = Vec::new();
        loop {
            if let Some(text) = self.take_remark() {
                let pos = self.tokens[self.pos - 1].pos;
                body.push(Command {
                    pos,
                    kind: CommandKind::Remark(text),
                });
                continue;
            }
            match self.peek().map(|t| t.kind) {
                None => {
                    return Err(self.error(format!(
                        "unexpected end of input, expected {:?}",
                        terminators[0]
                    )))
                }
                Some(k) if terminators.contains(&k) => break,
                Some(_) => body.push(self.parse_command()?),
            }
        }
        Ok(body)
    }

    fn parse_command(&mut self) -> Result<Command> {
        let pos = self.current_pos();
        let kind = if self.peek_is(TokenKind::Let) {
            let l = self.parse_let()?;
            self.eat(TokenKind::Semicolon)?;
            CommandKind::Let(l)
        } else if self.peek_is(TokenKind::Del) {
            self.bump();
            let place = self.parse_place()?;
            if place.indexes.is_empty() {
                return Err(Error::Parse {
                    pos,
                    message: "del expects an array or map element".into(),
                });
            }
            self.eat(TokenKind::Semicolon)?;
            CommandKind::Del(place)
        } else if self.peek_is(TokenKind::Return) {
            self.bump();
            let e = self.parse_expr()?;
            self.eat(TokenKind::Semicolon)?;
            CommandKind::Return(e)
        } else if self.peek_is(TokenKind::If) {
            self.bump();
            let cond = self.parse_condition()?;
            let then_body = self.parse_commands(&[TokenKind::Else, TokenKind::End])?;
            let else_body = if self.peek_is(TokenKind::Else) {
                self.bump();
                self.parse_commands(&[TokenKind::End])?
            } else {
                Vec::new()
            };
            self.eat(TokenKind::End)?;
            CommandKind::If {
                cond,
                then_body,
                else_body,
            }
        } else if self.peek_is(TokenKind::While) {
            self.bump();
            let cond = self.parse_condition()?;
            let body = self.parse_commands(&[TokenKind::End])?;
            self.eat(TokenKind::End)?;
            CommandKind::While { cond, body }
        } else if self.peek_is(TokenKind::Def) {
            CommandKind::Fun(Rc::new(self.parse_fun()?))
        } else if self.peek_is(TokenKind::Ident) && self.peek_n_is(1, TokenKind::LParen) {
            let call = self.parse_call()?;
            self.eat(TokenKind::Semicolon)?;
            CommandKind::Call(call)
        } else {
            let found = self.peek().map(|t| t.text.clone()).unwrap_or_default();
            return Err(self.error(format!("expected a command, found '{}'", found)));
        };
        Ok(Command { pos, kind })
    }

    fn parse_condition(&mut self) -> Result<Expr> {
        self.eat(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.eat(TokenKind::RParen)?;
        Ok(cond)
    }

    fn parse_let(&mut self) -> Result<Let> {
        let pos = self.eat(TokenKind::Let)?.pos;
        let target = self.parse_place()?;
        self.eat(TokenKind::Equal)?;
        let value = self.parse_expr()?;
        Ok(Let { pos, target, value })
    }

    fn parse_place(&mut self) -> Result<Place> {
        let name = self.eat_ident()?;
        let mut indexes = Vec::new();
        while self.peek_is(TokenKind::LBracket) {
            self.bump();
            indexes.push(self.parse_expr()?);
            self.eat(TokenKind::RBracket)?;
        }
        Ok(Place { name, indexes })
    }

    fn parse_call(&mut self) -> Result<Call> {
        let name = self.eat_ident()?;
        let mut groups = Vec::new();
        while self.peek_is(TokenKind::LParen) {
            self.bump();
            groups.push(self.parse_args(TokenKind::RParen)?);
        }
        Ok(Call { name, groups })
    }

    fn parse_args(&mut self, close: TokenKind) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.peek_is(close) {
            args.push(self.parse_expr()?);
            while self.peek_is(TokenKind::Comma) {
                self.bump();
                args.push(self.parse_expr()?);
            }
        }
        self.eat(close)?;
        Ok(args)
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr {
            pos: left.pos,
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        ensure_sufficient_stack(|| self.parse_logical())
    }

    fn parse_logical(&mut self) -> Result<Expr> {
        let mut node = self.parse_bool_term()?;
        loop {
            let op = if self.peek_is(TokenKind::AndAnd) {
                BinOp::And
            } else if self.peek_is(TokenKind::OrOr) {
                BinOp::Or
            } else {
                break;
            };
            self.bump();
            let rhs = self.parse_bool_term()?;
            node = Self::binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_bool_term(&mut self) -> Result<Expr> {
        let mut node = self.parse_cmp()?;
        loop {
            let op = match self.peek().map(|t| t.kind) {
                Some(TokenKind::Equal) => BinOp::Eq,
                Some(TokenKind::BangEqual) => BinOp::Ne,
                Some(TokenKind::Less) => BinOp::Lt,
                Some(TokenKind::LessEqual) => BinOp::Le,
                Some(TokenKind::Greater) => BinOp::Gt,
                Some(TokenKind::GreaterEqual) => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_cmp()?;
            node = Self::binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let mut node = self.parse_term()?;
        loop {
            let op = if self.peek_is(TokenKind::Plus) {
                BinOp::Add
            } else if self.peek_is(TokenKind::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            self.bump();
            let rhs = self.parse_term()?;
            node = Self::binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut node = self.parse_factor()?;
        loop {
            let op = match self.peek().map(|t| t.kind) {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_factor()?;
            node = Self::binary(op, node, rhs);
        }
        Ok(node)
    }

    // One exponent at most: `a ^ b ^ c` leaves the second `^` unparsed.
    fn parse_factor(&mut self) -> Result<Expr> {
        let base = self.parse_value()?;
        if self.peek_is(TokenKind::Caret) {
            self.bump();
            let exponent = self.parse_value()?;
            return Ok(Self::binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_value(&mut self) -> Result<Expr> {
        let mut node = self.parse_atom()?;
        while self.peek_is(TokenKind::LBracket) {
            let pos = self.eat(TokenKind::LBracket)?.pos;
            let idx = self.parse_expr()?;
            self.eat(TokenKind::RBracket)?;
            node = Expr {
                pos,
                kind: ExprKind::Index(Box::new(node), Box::new(idx)),
            };
        }
        Ok(node)
    }

    /// `(a, b) =>` or `() =>` ahead of the cursor.
    fn anon_params_ahead(&self) -> bool {
        let mut it = self.lookahead();
        if it.next().map(|t| t.kind) != Some(TokenKind::LParen) {
            return false;
        }
        let mut expect_ident = true;
        let mut first = true;
        for t in it.by_ref() {
            match t.kind {
                TokenKind::RParen if first || !expect_ident => break,
                TokenKind::Ident if expect_ident => expect_ident = false,
                TokenKind::Comma if !expect_ident => expect_ident = true,
                _ => return false,
            }
            first = false;
        }
        it.next().map(|t| t.kind) == Some(TokenKind::Arrow)
    }

    fn parse_anon_body(&mut self, pos: Pos) -> Result<Rc<[Command]>> {
        self.eat(TokenKind::Arrow)?;
        if self.peek_is(TokenKind::LBrace) {
            self.bump();
            let body = self.parse_commands(&[TokenKind::RBrace])?;
            self.eat(TokenKind::RBrace)?;
            return Ok(body.into());
        }
        let value = self.parse_expr()?;
        Ok(vec![Command {
            pos,
            kind: CommandKind::Return(value),
        }]
        .into())
    }

    fn parse_number(&mut self, negative: bool) -> Result<f64> {
        let tok = self.eat(TokenKind::Number)?;
        let n: f64 = tok.text.parse().map_err(|_| Error::Parse {
            pos: tok.pos,
            message: format!("invalid number '{}'", tok.text),
        })?;
        Ok(if negative { -n } else { n })
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let Some(tok) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };
        let (pos, tk) = (tok.pos, tok.kind);
        let kind = match tk {
            TokenKind::Number => ExprKind::Number(self.parse_number(false)?),
            TokenKind::Minus | TokenKind::Plus if self.peek_n_is(1, TokenKind::Number) => {
                let negative = tk == TokenKind::Minus;
                self.bump();
                ExprKind::Number(self.parse_number(negative)?)
            }
            TokenKind::True => {
                self.bump();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.bump();
                ExprKind::Bool(false)
            }
            TokenKind::Null => {
                self.bump();
                ExprKind::Null
            }
            TokenKind::String => ExprKind::Str(self.bump().map(|t| t.text).unwrap_or_default()),
            TokenKind::LBracket => {
                self.bump();
                ExprKind::Array(self.parse_args(TokenKind::RBracket)?)
            }
            TokenKind::LBrace => {
                self.bump();
                let mut entries = Vec::new();
                if !self.peek_is(TokenKind::RBrace) {
                    loop {
                        let key = match self.peek().map(|t| t.kind) {
                            Some(TokenKind::Ident) | Some(TokenKind::String) => {
                                self.bump().map(|t| t.text).unwrap_or_default()
                            }
                            _ => return Err(self.error("expected a map key")),
                        };
                        self.eat(TokenKind::Colon)?;
                        entries.push((key, self.parse_expr()?));
                        if !self.peek_is(TokenKind::Comma) {
                            break;
                        }
                        self.bump();
                    }
                }
                self.eat(TokenKind::RBrace)?;
                ExprKind::Map(entries)
            }
            TokenKind::Ident if self.peek_n_is(1, TokenKind::Arrow) => {
                let param = self.eat_ident()?;
                let body = self.parse_anon_body(pos)?;
                ExprKind::AnonFun {
                    params: vec![param].into(),
                    body,
                }
            }
            TokenKind::LParen if self.anon_params_ahead() => {
                self.bump();
                let params = self.parse_params(TokenKind::RParen)?;
                let body = self.parse_anon_body(pos)?;
                ExprKind::AnonFun { params, body }
            }
            TokenKind::LParen => {
                self.bump();
                let e = self.parse_expr()?;
                self.eat(TokenKind::RParen)?;
                return Ok(e);
            }
            TokenKind::Ident if self.peek_n_is(1, TokenKind::LParen) => ExprKind::Call(self.parse_call()?),
            TokenKind::Ident => ExprKind::Variable(self.eat_ident()?),
            _ => {
                let found = self.peek().map(|t| t.text.clone()).unwrap_or_default();
                return Err(self.error(format!("unexpected token '{}'", found)));
            }
        };
        Ok(Expr { pos, kind })
    }
}
