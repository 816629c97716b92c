use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::scope::Closure;
use crate::stack::ensure_sufficient_stack;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type MapRef = Rc<RefCell<HashMap<String, Value>>>;

/// A runtime value. Arrays and maps are shared: cloning a `Value` clones
/// the handle, so every alias sees the same container.
#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Null,
    Str(String),
    Array(ArrayRef),
    Map(MapRef),
    Closure(Rc<Closure>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn map(entries: HashMap<String, Value>) -> Value {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Closure(_) => "function",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Structural equality for arrays and maps, identity for closures,
    /// value equality for everything else. Containers that refer back to
    /// themselves compare equal when their shapes match.
    pub fn deep_eq(&self, other: &Value) -> bool {
        deep_eq(self, other, &mut Vec::new())
    }
}

// Container pairs already being compared. Meeting one again means the
// comparison so far found no difference along that cycle.
fn deep_eq(a: &Value, b: &Value, open: &mut Vec<(*const (), *const ())>) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Array(x), Value::Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let pair = (Rc::as_ptr(x) as *const (), Rc::as_ptr(y) as *const ());
            if open.contains(&pair) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return false;
            }
            open.push(pair);
            let eq = ensure_sufficient_stack(|| {
                x.iter().zip(y.iter()).all(|(l, r)| deep_eq(l, r, open))
            });
            open.pop();
            eq
        }
        (Value::Map(x), Value::Map(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let pair = (Rc::as_ptr(x) as *const (), Rc::as_ptr(y) as *const ());
            if open.contains(&pair) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return false;
            }
            open.push(pair);
            let eq = ensure_sufficient_stack(|| {
                x.iter()
                    .all(|(k, l)| y.get(k).map(|r| deep_eq(l, r, open)).unwrap_or(false))
            });
            open.pop();
            eq
        }
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// Containers already being printed; a self-containing array prints as `[...]`.
fn write_value(v: &Value, f: &mut fmt::Formatter<'_>, open: &mut Vec<*const ()>) -> fmt::Result {
    match v {
        Value::Number(n) => f.write_str(&format_number(*n)),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Null => f.write_str("null"),
        Value::Str(s) => f.write_str(s),
        Value::Array(items) => {
            let id = Rc::as_ptr(items) as *const ();
            if open.contains(&id) {
                return f.write_str("[...]");
            }
            open.push(id);
            f.write_str("[")?;
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_value(item, f, open)?;
            }
            open.pop();
            f.write_str("]")
        }
        Value::Map(entries) => {
            let id = Rc::as_ptr(entries) as *const ();
            if open.contains(&id) {
                return f.write_str("{...}");
            }
            open.push(id);
            let entries = entries.borrow();
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            f.write_str("{")?;
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: ", k)?;
                write_value(&entries[k], f, open)?;
            }
            open.pop();
            f.write_str("}")
        }
        Value::Closure(c) => write!(f, "{}({})", c.name, c.params.join(",")),
    }
}

/// The display form used by `print` and string concatenation.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(self, f, &mut Vec::new())
    }
}
