//! Host-provided functions. Calls resolve here before any user function,
//! so a script cannot shadow these names.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use rand::Rng;

use crate::error::EvalErrorKind;
use crate::runtime::Interpreter;
use crate::value::Value;
use crate::video::VideoMode;

pub type Builtin = fn(&mut Interpreter, Vec<Value>) -> Result<Value, EvalErrorKind>;

type BuiltinResult = Result<Value, EvalErrorKind>;

pub fn table() -> HashMap<&'static str, Builtin> {
    let entries: [(&'static str, Builtin); 16] = [
        ("print", print),
        ("input", input),
        ("len", len),
        ("substr", substr),
        ("replace", replace),
        ("keys", keys),
        ("random", random),
        ("debug", debug),
        ("assert", assert),
        ("setVideoMode", set_video_mode),
        ("setPixel", set_pixel),
        ("drawLine", draw_line),
        ("drawCircle", draw_circle),
        ("fillCircle", fill_circle),
        ("clearVideo", clear_video),
        ("updateVideo", update_video),
    ];
    entries.into_iter().collect()
}

/// Builtin names, sorted.
pub fn names() -> Vec<&'static str> {
    let mut v: Vec<&'static str> = table().into_keys().collect();
    v.sort();
    v
}

fn fail(name: &'static str, message: impl Into<String>) -> EvalErrorKind {
    EvalErrorKind::Builtin {
        name,
        message: message.into(),
    }
}

fn arity(name: &'static str, args: &[Value], min: usize, max: usize) -> Result<(), EvalErrorKind> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(fail(
            name,
            format!("expects {} arguments but received {}", expected, args.len()),
        ));
    }
    Ok(())
}

fn number_arg(name: &'static str, args: &[Value], i: usize) -> Result<f64, EvalErrorKind> {
    match &args[i] {
        Value::Number(n) => Ok(*n),
        other => Err(fail(
            name,
            format!("argument {} should be a number, not {}", i + 1, other.type_name()),
        )),
    }
}

fn string_arg<'a>(name: &'static str, args: &'a [Value], i: usize) -> Result<&'a str, EvalErrorKind> {
    match &args[i] {
        Value::Str(s) => Ok(s),
        other => Err(fail(
            name,
            format!("argument {} should be a string, not {}", i + 1, other.type_name()),
        )),
    }
}

/// Numeric args as canvas coordinates, in order.
fn coords<const N: usize>(name: &'static str, args: &[Value]) -> Result<[i64; N], EvalErrorKind> {
    arity(name, args, N, N)?;
    let mut out = [0i64; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = number_arg(name, args, i)?.trunc() as i64;
    }
    Ok(out)
}

fn color(c: i64) -> u8 {
    (c & 0xff) as u8
}

fn io_error(name: &'static str, e: std::io::Error) -> EvalErrorKind {
    fail(name, format!("i/o error: {}", e))
}

fn print(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("print", &args, 1, 1)?;
    writeln!(it.io.out, "{}", args[0]).map_err(|e| io_error("print", e))?;
    Ok(Value::Null)
}

fn input(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("input", &args, 1, 1)?;
    write!(it.io.out, "{}", args[0]).map_err(|e| io_error("input", e))?;
    it.io.out.flush().map_err(|e| io_error("input", e))?;
    let mut line = String::new();
    it.io
        .input
        .read_line(&mut line)
        .map_err(|e| io_error("input", e))?;
    Ok(Value::Str(line.trim().to_string()))
}

fn len(_: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("len", &args, 1, 1)?;
    match &args[0] {
        Value::Array(items) => Ok(Value::Number(items.borrow().len() as f64)),
        Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
        other => Err(fail(
            "len",
            format!("argument should be an array or a string, not {}", other.type_name()),
        )),
    }
}

fn substr(_: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("substr", &args, 2, 3)?;
    let s = string_arg("substr", &args, 0)?;
    let count = s.chars().count() as i64;
    let start = (number_arg("substr", &args, 1)?.trunc() as i64).clamp(0, count);
    let length = match args.len() {
        3 => number_arg("substr", &args, 2)?.trunc() as i64,
        _ => count,
    };
    let end = start.saturating_add(length).clamp(0, count);
    if end <= start {
        return Ok(Value::str(""));
    }
    let out: String = s
        .chars()
        .skip(start as usize)
        .take((end - start) as usize)
        .collect();
    Ok(Value::Str(out))
}

fn replace(_: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("replace", &args, 3, 3)?;
    let s = string_arg("replace", &args, 0)?;
    let old = string_arg("replace", &args, 1)?;
    let new = string_arg("replace", &args, 2)?;
    if old.is_empty() {
        return Ok(Value::str(s));
    }
    Ok(Value::Str(s.replace(old, new)))
}

fn keys(_: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("keys", &args, 1, 1)?;
    match &args[0] {
        Value::Map(entries) => {
            let mut names: Vec<String> = entries.borrow().keys().cloned().collect();
            names.sort();
            Ok(Value::array(names.into_iter().map(Value::Str).collect()))
        }
        other => Err(fail(
            "keys",
            format!("argument should be a map, not {}", other.type_name()),
        )),
    }
}

fn random(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("random", &args, 0, 0)?;
    Ok(Value::Number(it.rng.gen::<f64>()))
}

fn debug(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("debug", &args, 1, 1)?;
    let message = args[0].to_string();
    it.dump(&message).map_err(|e| io_error("debug", e))?;
    Ok(Value::Null)
}

fn assert(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("assert", &args, 2, 3)?;
    let message = match args.len() {
        3 => string_arg("assert", &args, 2)?.to_string(),
        _ => "Incorrect value".to_string(),
    };
    if args[0].deep_eq(&args[1]) {
        return Ok(Value::Null);
    }
    let failure = EvalErrorKind::Assertion {
        message,
        left: args[0].to_string(),
        right: args[1].to_string(),
    };
    if let Err(e) = it.dump(&failure.to_string()) {
        tracing::warn!(error = %e, "failed to write assertion report");
    }
    Err(failure)
}

fn set_video_mode(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    let [mode] = coords::<1>("setVideoMode", &args)?;
    let mode = VideoMode::from_number(mode)
        .ok_or_else(|| fail("setVideoMode", format!("unknown video mode {}", mode)))?;
    tracing::debug!(?mode, "video mode");
    it.video.lock().set_mode(mode);
    Ok(Value::Null)
}

fn set_pixel(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    let [x, y, c] = coords::<3>("setPixel", &args)?;
    it.video.lock().set_pixel(x, y, color(c));
    Ok(Value::Null)
}

fn draw_line(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    let [x1, y1, x2, y2, c] = coords::<5>("drawLine", &args)?;
    it.video.lock().draw_line(x1, y1, x2, y2, color(c));
    Ok(Value::Null)
}

fn draw_circle(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    let [x, y, r, c] = coords::<4>("drawCircle", &args)?;
    it.video.lock().draw_circle(x, y, r, color(c));
    Ok(Value::Null)
}

fn fill_circle(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    let [x, y, r, c] = coords::<4>("fillCircle", &args)?;
    it.video.lock().fill_circle(x, y, r, color(c));
    Ok(Value::Null)
}

fn clear_video(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("clearVideo", &args, 0, 0)?;
    it.video.lock().clear();
    Ok(Value::Null)
}

fn update_video(it: &mut Interpreter, args: Vec<Value>) -> BuiltinResult {
    arity("updateVideo", &args, 0, 0)?;
    it.video.lock().update();
    Ok(Value::Null)
}
