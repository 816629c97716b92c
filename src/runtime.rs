use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::ast::{BinOp, Call, Command, CommandKind, Expr, ExprKind, FunDef, Let, Place, Program, TopLevel};
use crate::builtins::{self, Builtin};
use crate::config::Config;
use crate::error::{EvalErrorKind, Fatal, Result};
use crate::lexer::Pos;
use crate::scope::{Closure, ScopeId, Scopes};
use crate::stack::ensure_sufficient_stack;
use crate::value::Value;
use crate::video::Video;

/// One entry of the call stack.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Where the call happened.
    pub pos: Pos,
    pub function: Rc<str>,
    /// The scope to reactivate on return.
    pub caller: ScopeId,
}

/// Where scripts read and write. `print` and `input` prompts go to `out`,
/// `debug` dumps to `diag`.
pub struct Io {
    pub out: Box<dyn Write>,
    pub diag: Box<dyn Write>,
    pub input: Box<dyn BufRead>,
}

impl Io {
    pub fn new(out: impl Write + 'static, diag: impl Write + 'static, input: impl BufRead + 'static) -> Self {
        Self {
            out: Box::new(out),
            diag: Box::new(diag),
            input: Box::new(input),
        }
    }

    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr(), io::BufReader::new(io::stdin()))
    }
}

/// Captured scopes left behind by returning calls before a collection runs.
const GC_MIN: usize = 256;

/// The execution context of one program.
pub struct Interpreter {
    config: Config,
    consts: HashMap<String, Value>,
    builtins: HashMap<&'static str, Builtin>,
    scopes: Scopes,
    active: ScopeId,
    stack: Vec<Frame>,
    pos: Pos,
    anon_count: u32,
    poisoned: bool,
    /// Captured scopes kept on return since the last collection.
    retained: usize,
    gc_threshold: usize,
    pub(crate) video: Video,
    pub(crate) io: Io,
    pub(crate) rng: StdRng,
}

impl Interpreter {
    pub fn new(config: Config) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            consts: HashMap::new(),
            builtins: builtins::table(),
            scopes: Scopes::new(),
            active: ScopeId::GLOBAL,
            stack: Vec::new(),
            pos: Pos::default(),
            anon_count: 0,
            poisoned: false,
            retained: 0,
            gc_threshold: GC_MIN,
            video: Video::new(),
            io: Io::stdio(),
            rng,
        }
    }

    pub fn with_io(mut self, io: Io) -> Self {
        self.io = io;
        self
    }

    pub fn with_video(mut self, video: Video) -> Self {
        self.video = video;
        self
    }

    pub fn video(&self) -> &Video {
        &self.video
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Position of the command being executed.
    pub fn pos(&self) -> Pos {
        self.pos
    }

    pub fn constant(&self, name: &str) -> Option<Value> {
        self.consts.get(name).cloned()
    }

    /// A global variable or top-level function.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.scopes.lookup(ScopeId::GLOBAL, name)
    }

    pub fn call_depth(&self) -> usize {
        self.stack.len()
    }

    /// Scopes still allocated, the global one included.
    pub fn live_scopes(&self) -> usize {
        self.scopes.live()
    }

    /// Free scopes no live closure can reach. Runs on its own once enough
    /// captured scopes pile up; returns the number freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut roots: Vec<ScopeId> = self.stack.iter().map(|f| f.caller).collect();
        roots.push(self.active);
        let freed = self.scopes.collect(&roots);
        let live = self.scopes.live();
        self.retained = 0;
        self.gc_threshold = GC_MIN.max(live);
        tracing::debug!(freed, live, "collected scopes");
        freed
    }

    /// Bind constants and globals, define top-level functions and check
    /// that `main()` exists.
    pub fn load(&mut self, program: &Program) -> Result<()> {
        tracing::debug!(items = program.items.len(), "loading program");
        // Constants and globals first, in source order; functions after, so
        // initializers cannot call user functions.
        for item in &program.items {
            match item {
                TopLevel::Const { pos, name, value } => {
                    self.pos = *pos;
                    let v = self.eval_expr(value)?;
                    self.consts.insert(name.clone(), v);
                }
                TopLevel::Let(l) => {
                    self.pos = l.pos;
                    self.assign(l)?;
                }
                TopLevel::Fun(_) | TopLevel::Remark(_) => {}
            }
        }
        for item in &program.items {
            if let TopLevel::Fun(def) = item {
                self.define(def);
            }
        }
        match self.scopes.get(ScopeId::GLOBAL).defs.get("main") {
            None => Err(EvalErrorKind::NoMain.at(Pos::default())),
            Some(main) if !main.params.is_empty() => Err(EvalErrorKind::ArityMismatch {
                name: "main".into(),
                expected: main.params.len(),
                received: 0,
            }
            .at(Pos::default())),
            Some(_) => Ok(()),
        }
    }

    /// Call `main()`.
    pub fn run(&mut self) -> Result<Value> {
        tracing::debug!("calling main");
        let value = self.call_function("main", Vec::new())?;
        if let Err(e) = self.io.out.flush() {
            tracing::warn!(error = %e, "failed to flush output");
        }
        Ok(value)
    }

    /// Call a builtin or a function visible from the active scope.
    pub fn call_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        let pos = self.pos;
        self.invoke(name, args, pos)
    }

    fn invoke(&mut self, name: &str, args: Vec<Value>, pos: Pos) -> Result<Value> {
        if let Some(builtin) = self.builtins.get(name).copied() {
            return builtin(self, args).map_err(|k| k.at(pos));
        }
        match self.scopes.find_closure(self.active, name) {
            Some(closure) => self.call_closure(&closure, args, pos),
            None => Err(EvalErrorKind::UnknownFunction(name.to_string()).at(pos)),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>, pos: Pos) -> Result<Value> {
        if self.poisoned {
            return Err(Fatal::Poisoned.into());
        }
        if args.len() != closure.params.len() {
            return Err(EvalErrorKind::ArityMismatch {
                name: closure.name.to_string(),
                expected: closure.params.len(),
                received: args.len(),
            }
            .at(pos));
        }
        // The limit counts frames already on the stack, so a run may hold
        // `max_call_depth + 1` frames before it stops.
        if self.stack.len() > self.config.max_call_depth {
            tracing::error!(depth = self.stack.len(), function = %closure.name, "stack limit exceeded");
            self.poisoned = true;
            return Err(Fatal::StackOverflow(self.config.max_call_depth).into());
        }

        let scope = self.scopes.push(closure.name.clone(), closure.scope);
        let locals = &mut self.scopes.get_mut(scope).vars;
        for (param, arg) in closure.params.iter().zip(args) {
            locals.insert(param.clone(), arg);
        }
        self.stack.push(Frame {
            pos,
            function: closure.name.clone(),
            caller: self.active,
        });
        let caller = std::mem::replace(&mut self.active, scope);
        tracing::trace!(function = %closure.name, depth = self.stack.len(), "call");

        let body = closure.body.clone();
        let result = ensure_sufficient_stack(|| self.exec_block(&body));
        if matches!(&result, Err(e) if e.is_fatal()) {
            return result.map(|_| Value::Null);
        }

        self.active = caller;
        self.stack.pop();
        if self.scopes.release(scope) {
            tracing::trace!(%scope, "recycled scope");
        } else {
            self.retained += 1;
            if self.retained >= self.gc_threshold {
                self.collect_garbage();
            }
        }
        Ok(result?.unwrap_or(Value::Null))
    }

    fn make_closure(&mut self, name: Rc<str>, params: Rc<[String]>, body: Rc<[Command]>) -> Rc<Closure> {
        self.scopes.capture(self.active, name, params, body)
    }

    fn define(&mut self, def: &FunDef) {
        let closure = self.make_closure(def.name.as_str().into(), def.params.clone(), def.body.clone());
        self.scopes
            .get_mut(self.active)
            .defs
            .insert(def.name.clone(), closure);
    }

    // Execute a sequence of commands. Return Some(value) if a Return was hit.
    fn exec_block(&mut self, block: &[Command]) -> Result<Option<Value>> {
        for cmd in block {
            if let Some(rv) = self.exec_command(cmd)? {
                return Ok(Some(rv));
            }
        }
        Ok(None)
    }

    fn exec_command(&mut self, cmd: &Command) -> Result<Option<Value>> {
        self.pos = cmd.pos;
        match &cmd.kind {
            CommandKind::Remark(_) => Ok(None),
            CommandKind::Let(l) => {
                self.assign(l)?;
                Ok(None)
            }
            CommandKind::Del(place) => {
                self.delete(place, cmd.pos)?;
                Ok(None)
            }
            CommandKind::Return(e) => Ok(Some(self.eval_expr(e)?)),
            CommandKind::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval_condition(cond)? {
                    self.exec_block(then_body)
                } else {
                    self.exec_block(else_body)
                }
            }
            CommandKind::While { cond, body } => {
                while self.eval_condition(cond)? {
                    if let Some(rv) = self.exec_block(body)? {
                        return Ok(Some(rv));
                    }
                }
                Ok(None)
            }
            CommandKind::Fun(def) => {
                self.define(def);
                Ok(None)
            }
            CommandKind::Call(call) => {
                self.eval_call(call, cmd.pos)?;
                Ok(None)
            }
        }
    }

    /// Only `true` takes the branch; any other value counts as false.
    fn eval_condition(&mut self, cond: &Expr) -> Result<bool> {
        Ok(matches!(self.eval_expr(cond)?, Value::Bool(true)))
    }

    fn lookup(&self, name: &str) -> std::result::Result<Value, EvalErrorKind> {
        if let Some(v) = self.consts.get(name) {
            return Ok(v.clone());
        }
        self.scopes
            .lookup(self.active, name)
            .ok_or_else(|| EvalErrorKind::UnknownVariable(name.to_string()))
    }

    /// Evaluate the value first, then walk the target path.
    fn assign(&mut self, l: &Let) -> Result<()> {
        let value = self.eval_expr(&l.value)?;
        let Place { name, indexes } = &l.target;
        let Some((last, path)) = indexes.split_last() else {
            if self.consts.contains_key(name) {
                return Err(EvalErrorKind::ConstAssignment(name.clone()).at(l.pos));
            }
            // Nearest existing binding, else a new local.
            let target = self.scopes.find_binding(self.active, name).unwrap_or(self.active);
            self.scopes.get_mut(target).vars.insert(name.clone(), value);
            return Ok(());
        };
        let container = self.resolve_path(name, path, l.pos)?;
        let key = self.eval_expr(last)?;
        store_element(&container, &key, value).map_err(|k| k.at(l.pos))
    }

    fn delete(&mut self, place: &Place, pos: Pos) -> Result<()> {
        let Some((last, path)) = place.indexes.split_last() else {
            return Err(EvalErrorKind::Type("del expects an array or map element".into()).at(pos));
        };
        let container = self.resolve_path(&place.name, path, pos)?;
        let key = self.eval_expr(last)?;
        remove_element(&container, &key).map_err(|k| k.at(pos))
    }

    /// `name[i][j]...` read for every index in `path`.
    fn resolve_path(&mut self, name: &str, path: &[Expr], pos: Pos) -> Result<Value> {
        let mut current = self.lookup(name).map_err(|k| k.at(pos))?;
        for idx in path {
            let key = self.eval_expr(idx)?;
            current = index_value(&current, &key).map_err(|k| k.at(pos))?;
        }
        Ok(current)
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|a| self.eval_expr(a)).collect()
    }

    fn eval_call(&mut self, call: &Call, pos: Pos) -> Result<Value> {
        let mut groups = call.groups.iter();
        let first = match groups.next() {
            Some(args) => self.eval_args(args)?,
            None => Vec::new(),
        };
        let mut result = self.invoke(&call.name, first, pos)?;
        // f(a)(b): each further group calls the previous result.
        for group in groups {
            let args = self.eval_args(group)?;
            result = match result {
                Value::Closure(c) => self.call_closure(&c, args, pos)?,
                other => {
                    return Err(EvalErrorKind::Type(format!(
                        "function call references non-function value: {}",
                        other
                    ))
                    .at(pos))
                }
            };
        }
        Ok(result)
    }

    fn eval_expr(&mut self, e: &Expr) -> Result<Value> {
        ensure_sufficient_stack(|| self.eval_expr_inner(e))
    }

    fn eval_expr_inner(&mut self, e: &Expr) -> Result<Value> {
        let v = match &e.kind {
            ExprKind::Number(n) => Value::Number(*n),
            ExprKind::Bool(b) => Value::Bool(*b),
            ExprKind::Null => Value::Null,
            ExprKind::Str(s) => Value::Str(s.clone()),
            ExprKind::Array(items) => Value::array(self.eval_args(items)?),
            ExprKind::Map(entries) => {
                let mut m = HashMap::with_capacity(entries.len());
                for (k, ve) in entries {
                    let v = self.eval_expr(ve)?;
                    m.insert(k.clone(), v);
                }
                Value::map(m)
            }
            ExprKind::Variable(name) => self.lookup(name).map_err(|k| k.at(e.pos))?,
            ExprKind::Index(target, idx) => {
                let base = self.eval_expr(target)?;
                let key = self.eval_expr(idx)?;
                index_value(&base, &key).map_err(|k| k.at(e.pos))?
            }
            ExprKind::AnonFun { params, body } => {
                let name: Rc<str> = format!("_anon_{}", self.anon_count).into();
                self.anon_count += 1;
                Value::Closure(self.make_closure(name, params.clone(), body.clone()))
            }
            ExprKind::Call(call) => self.eval_call(call, e.pos)?,
            ExprKind::Binary { op, left, right } => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                binary_op(*op, l, r).map_err(|k| k.at(e.pos))?
            }
        };
        Ok(v)
    }

    /// Write constants, the scope chain and the call stack to the diagnostic sink.
    pub fn dump(&mut self, message: &str) -> io::Result<()> {
        let mut report = String::new();
        report.push_str(message);
        report.push('\n');
        report.push_str("Constants:\n");
        let mut names: Vec<&String> = self.consts.keys().collect();
        names.sort();
        for name in names {
            report.push_str(&format!("  {}={}\n", name, self.consts[name]));
        }
        report.push_str("Closures:\n");
        let mut indent = String::from("  ");
        for (id, scope) in self.scopes.chain(self.active) {
            let mut defs: Vec<&String> = scope.defs.keys().collect();
            defs.sort();
            report.push_str("-----------------\n");
            report.push_str(&format!("{}Function: {} {}\n", indent, scope.function, id));
            report.push_str(&format!("{}Vars: {}\n", indent, format_vars(&scope.vars)));
            report.push_str(&format!("{}Defs: {:?}\n", indent, defs));
            indent.push_str("  ");
        }
        report.push_str("------------------------------------\n");
        report.push_str("Runtime Call Stack:\n");
        let mut indent = String::from("  ");
        for frame in &self.stack {
            let vars = format_vars(&self.scopes.get(frame.caller).vars);
            report.push_str(&format!("{}{} at {} Vars={}\n", indent, frame.function, frame.pos, vars));
            indent.push_str("  ");
        }
        report.push_str("------------------------------------\n");
        report.push_str(&format!("Currently: {}\n", self.pos));
        self.io.diag.write_all(report.as_bytes())?;
        self.io.diag.flush()
    }
}

fn format_vars(vars: &HashMap<String, Value>) -> String {
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();
    let parts: Vec<String> = names.iter().map(|n| format!("{}={}", n, vars[*n])).collect();
    format!("{{{}}}", parts.join(", "))
}

fn array_index(key: &Value) -> std::result::Result<i64, EvalErrorKind> {
    match key {
        Value::Number(n) => Ok(n.trunc() as i64),
        other => Err(EvalErrorKind::Type(format!(
            "array index must be a number, not {}",
            other.type_name()
        ))),
    }
}

fn map_key(key: &Value) -> std::result::Result<&str, EvalErrorKind> {
    match key {
        Value::Str(s) => Ok(s),
        other => Err(EvalErrorKind::Type(format!(
            "map key must be a string, not {}",
            other.type_name()
        ))),
    }
}

fn not_a_container(v: &Value) -> EvalErrorKind {
    EvalErrorKind::Type(format!(
        "array element should refer to array or map, not {}",
        v.type_name()
    ))
}

/// `base[key]`: bounds-checked on arrays, null for missing map keys.
pub fn index_value(base: &Value, key: &Value) -> std::result::Result<Value, EvalErrorKind> {
    match base {
        Value::Array(items) => {
            let i = array_index(key)?;
            let items = items.borrow();
            if i < 0 || i as usize >= items.len() {
                return Err(EvalErrorKind::IndexOutOfBounds { index: i, len: items.len() });
            }
            Ok(items[i as usize].clone())
        }
        Value::Map(entries) => {
            let k = map_key(key)?;
            Ok(entries.borrow().get(k).cloned().unwrap_or(Value::Null))
        }
        other => Err(not_a_container(other)),
    }
}

/// `base[key] = value`: arrays may grow by one at the end, maps upsert.
fn store_element(base: &Value, key: &Value, value: Value) -> std::result::Result<(), EvalErrorKind> {
    match base {
        Value::Array(items) => {
            let i = array_index(key)?;
            let mut items = items.borrow_mut();
            let len = items.len();
            if i < 0 || i as usize > len {
                return Err(EvalErrorKind::IndexOutOfBounds { index: i, len });
            }
            if i as usize == len {
                items.push(value);
            } else {
                items[i as usize] = value;
            }
            Ok(())
        }
        Value::Map(entries) => {
            let k = map_key(key)?.to_string();
            entries.borrow_mut().insert(k, value);
            Ok(())
        }
        other => Err(not_a_container(other)),
    }
}

fn remove_element(base: &Value, key: &Value) -> std::result::Result<(), EvalErrorKind> {
    match base {
        Value::Array(items) => {
            let i = array_index(key)?;
            let mut items = items.borrow_mut();
            if i < 0 || i as usize >= items.len() {
                return Err(EvalErrorKind::IndexOutOfBounds { index: i, len: items.len() });
            }
            items.remove(i as usize);
            Ok(())
        }
        Value::Map(entries) => {
            let k = map_key(key)?;
            entries.borrow_mut().remove(k);
            Ok(())
        }
        other => Err(not_a_container(other)),
    }
}

fn numbers(op: BinOp, l: &Value, r: &Value) -> std::result::Result<(f64, f64), EvalErrorKind> {
    let invalid = |message: &str| EvalErrorKind::InvalidOperands {
        op: op.symbol(),
        message: message.to_string(),
    };
    let a = l.as_number().ok_or_else(|| invalid("lhs must be a number"))?;
    let b = r.as_number().ok_or_else(|| invalid("rhs must be a number"))?;
    Ok((a, b))
}

pub fn binary_op(op: BinOp, l: Value, r: Value) -> std::result::Result<Value, EvalErrorKind> {
    let v = match op {
        BinOp::Add => match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            _ => Value::Str(format!("{}{}", l, r)),
        },
        BinOp::Sub => {
            let (a, b) = numbers(op, &l, &r)?;
            Value::Number(a - b)
        }
        BinOp::Mul => {
            let (a, b) = numbers(op, &l, &r)?;
            Value::Number(a * b)
        }
        BinOp::Div => {
            let (a, b) = numbers(op, &l, &r)?;
            Value::Number(a / b)
        }
        BinOp::Mod => {
            let (a, b) = numbers(op, &l, &r)?;
            let (a, b) = (a.trunc(), b.trunc());
            if b == 0.0 {
                return Err(EvalErrorKind::InvalidOperands {
                    op: op.symbol(),
                    message: "division by zero".into(),
                });
            }
            Value::Number(a % b)
        }
        BinOp::Pow => {
            let (a, b) = numbers(op, &l, &r)?;
            Value::Number(a.powf(b))
        }
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            Value::Bool(compare(op, &l, &r)?)
        }
        BinOp::And | BinOp::Or => match (&l, &r) {
            (Value::Bool(a), Value::Bool(b)) => Value::Bool(if op == BinOp::And { *a && *b } else { *a || *b }),
            (Value::Bool(_), _) => {
                return Err(EvalErrorKind::InvalidOperands {
                    op: op.symbol(),
                    message: "rhs must be a boolean".into(),
                })
            }
            _ => {
                return Err(EvalErrorKind::InvalidOperands {
                    op: op.symbol(),
                    message: "lhs must be a boolean".into(),
                })
            }
        },
    };
    Ok(v)
}

fn ordered<T: PartialOrd + ?Sized>(op: BinOp, a: &T, b: &T) -> bool {
    match op {
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        BinOp::Ge => a >= b,
        _ => false,
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> std::result::Result<bool, EvalErrorKind> {
    let invalid = |message: String| EvalErrorKind::InvalidOperands {
        op: op.symbol(),
        message,
    };
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(ordered(op, a, b)),
        (Value::Str(a), Value::Str(b)) => Ok(ordered(op, a.as_str(), b.as_str())),
        (Value::Bool(a), Value::Bool(b)) => match op {
            BinOp::Eq => Ok(a == b),
            BinOp::Ne => Ok(a != b),
            _ => Err(invalid("booleans only support = and !=".into())),
        },
        (Value::Number(_), _) | (Value::Str(_), _) | (Value::Bool(_), _) => Err(invalid(format!(
            "rhs must be a {} like the lhs, not {}",
            l.type_name(),
            r.type_name()
        ))),
        _ => Err(invalid(format!(
            "lhs must be a number, string or boolean, not {}",
            l.type_name()
        ))),
    }
}

/// Parse, load and run `src` with the given configuration and I/O.
pub fn execute(src: &str, config: Config, io: Io) -> Result<Value> {
    let program = crate::parser::parse_source(src)?;
    let mut interp = Interpreter::new(config).with_io(io);
    interp.load(&program)?;
    interp.run()
}
