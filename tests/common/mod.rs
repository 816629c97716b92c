#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::rc::Rc;

use benji::{Config, Interpreter, Io, Value};

/// Run a program through the binary. Returns (exit code, stdout, stderr).
pub fn run_prog(src: &str, args: &[&str]) -> (i32, String, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.bas");
    std::fs::write(&path, src).unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_benji"))
        .args(args)
        .arg(&path)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .expect("run");
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

/// A `Write` whose contents stay readable after the interpreter takes it.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Run {
    pub result: benji::Result<Value>,
    pub out: String,
    pub diag: String,
}

pub fn run_with(src: &str, config: Config, input: &str) -> Run {
    let out = SharedBuf::default();
    let diag = SharedBuf::default();
    let io = Io::new(out.clone(), diag.clone(), io::Cursor::new(input.as_bytes().to_vec()));
    let result = benji::execute(src, config, io);
    Run {
        result,
        out: out.contents(),
        diag: diag.contents(),
    }
}

/// Run `src` in-process and return its printed output, failing on error.
pub fn output(src: &str) -> String {
    let run = run_with(src, Config::default().with_seed(7), "");
    if let Err(e) = &run.result {
        panic!("program failed: {}\noutput: {}", e, run.out);
    }
    run.out
}

/// Run `src` in-process and return the error it stopped with.
pub fn error(src: &str) -> benji::Error {
    match run_with(src, Config::default(), "").result {
        Ok(v) => panic!("expected an error, program returned {}", v),
        Err(e) => e,
    }
}

/// A loaded interpreter writing into `out`, for tests that inspect state.
pub fn loaded(src: &str, out: SharedBuf) -> Interpreter {
    let program = benji::parser::parse_source(src).unwrap();
    let io = Io::new(out, io::sink(), io::empty());
    let mut interp = Interpreter::new(Config::default()).with_io(io);
    interp.load(&program).unwrap();
    interp
}
