mod common;

use benji::{Config, EvalErrorKind, Fatal, Interpreter, Io, Value};
use common::{error, loaded, output, run_with, SharedBuf};

#[test]
fn recursion_keeps_caller_locals() {
    let out = output(
        r#"
def fact(n)
    if (n <= 1)
        return 1;
    end
    return n * fact(n - 1);
end

def main()
    let n = 5;
    print(fact(n));
    print(n);
end
"#,
    );
    assert_eq!(out, "120\n5\n");
}

#[test]
fn assignment_updates_nearest_binding() {
    let out = output(
        r#"
let counter = 0;

def bump()
    let counter = counter + 1;
end

def main()
    bump();
    bump();
    print(counter);
end
"#,
    );
    assert_eq!(out, "2\n");
}

#[test]
fn new_names_stay_local() {
    let err = error(
        r#"
def setup()
    let fresh = 1;
end

def main()
    setup();
    print(fresh);
end
"#,
    );
    assert_eq!(
        err.eval_kind(),
        Some(&EvalErrorKind::UnknownVariable("fresh".into()))
    );
}

#[test]
fn nested_definitions_write_upvalues() {
    let out = output(
        r#"
def outer()
    let total = 0;
    def add(v)
        let total = total + v;
    end
    add(2);
    add(3);
    return total;
end

def main()
    print(outer());
    print(outer());
end
"#,
    );
    assert_eq!(out, "5\n5\n");
}

#[test]
fn closures_from_one_factory_are_independent() {
    let out = output(
        r#"
def counter()
    let n = 0;
    return () => {
        let n = n + 1;
        return n;
    };
end

def main()
    let a = counter();
    let b = counter();
    a();
    a();
    print(a());
    print(b());
end
"#,
    );
    assert_eq!(out, "3\n1\n");
}

#[test]
fn chained_calls() {
    let out = output(
        r#"
def adder(a)
    return (b) => a + b;
end

def curry3(a)
    return b => c => a * 100 + b * 10 + c;
end

def main()
    print(adder(2)(3));
    print(curry3(1)(2)(3));
    let double = x => x * 2;
    print(double(4));
end
"#,
    );
    assert_eq!(out, "5\n123\n8\n");
}

#[test]
fn chained_call_on_non_function_fails() {
    let err = error("def one() return 1; end def main() one()(2); end");
    assert!(matches!(err.eval_kind(), Some(EvalErrorKind::Type(_))), "{}", err);
}

#[test]
fn builtins_cannot_be_shadowed() {
    let out = output(
        r#"
def print(x)
    let ignored = x;
end

def len(x)
    return 42;
end

def main()
    print("hi");
    print(len([1, 2]));
end
"#,
    );
    assert_eq!(out, "hi\n2\n");
}

#[test]
fn functions_can_be_passed_and_stored() {
    let out = output(
        r#"
def apply(f, v)
    return f(v);
end

def square(x)
    return x * x;
end

def main()
    print(apply(square, 7));
    let ops = {inc: x => x + 1};
    let inc = ops["inc"];
    print(apply(inc, 1));
end
"#,
    );
    assert_eq!(out, "49\n2\n");
}

#[test]
fn non_function_variable_does_not_hide_outer_function() {
    let out = output(
        r#"
def f()
    return "outer";
end

def main()
    let f = 1;
    print(f());
    print(f);
end
"#,
    );
    assert_eq!(out, "outer\n1\n");
}

#[test]
fn deep_recursion_below_the_limit() {
    let out = output(
        r#"
def down(n)
    if (n = 0)
        return 0;
    end
    return 1 + down(n - 1);
end

def main()
    print(down(900));
end
"#,
    );
    assert_eq!(out, "900\n");
}

#[test]
fn depth_limit_is_fatal() {
    let src = "def f(n) return f(n + 1); end def main() f(0); end";
    let run = run_with(src, Config::default().with_max_call_depth(50), "");
    match run.result {
        Err(benji::Error::Fatal(Fatal::StackOverflow(50))) => {}
        other => panic!("expected stack overflow, got {:?}", other.map(|v| v.to_string())),
    }
}

#[test]
fn depth_limit_boundary() {
    let src = |n: u32| {
        format!(
            "def down(n) if (n = 0) return 0; end return 1 + down(n - 1); end \
             def main() print(down({})); end",
            n
        )
    };
    // main plus down(9) .. down(0) is eleven frames.
    let run = run_with(&src(9), Config::default().with_max_call_depth(10), "");
    assert!(run.result.is_ok(), "{:?}", run.result.as_ref().map(|v| v.to_string()));
    assert_eq!(run.out, "9\n");

    let run = run_with(&src(10), Config::default().with_max_call_depth(10), "");
    assert!(matches!(run.result, Err(benji::Error::Fatal(Fatal::StackOverflow(10)))));
}

#[test]
fn interpreter_is_poisoned_after_fatal() {
    let program = benji::parser::parse_source("def f() return f(); end def main() f(); end").unwrap();
    let io = Io::new(std::io::sink(), std::io::sink(), std::io::empty());
    let mut interp = Interpreter::new(Config::default().with_max_call_depth(20)).with_io(io);
    interp.load(&program).unwrap();
    let first = interp.run().unwrap_err();
    assert!(first.is_fatal());
    // Nothing was unwound. The limit is checked against frames already
    // pushed, so the stack holds one more.
    assert_eq!(interp.call_depth(), 21);
    let second = interp.run().unwrap_err();
    assert!(matches!(second, benji::Error::Fatal(Fatal::Poisoned)));
}

#[test]
fn frames_are_recycled_after_return() {
    let out = SharedBuf::default();
    let mut interp = loaded(
        r#"
def work(i)
    let tmp = i * 2;
    return tmp;
end

def main()
    let i = 0;
    while (i < 100)
        let i = i + work(i) - 2 * i + 1;
    end
    print(i);
end
"#,
        out.clone(),
    );
    interp.run().unwrap();
    assert_eq!(out.contents(), "100\n");
    assert_eq!(interp.call_depth(), 0);
    assert_eq!(interp.live_scopes(), 1);
}

#[test]
fn captured_frames_survive_return() {
    let out = SharedBuf::default();
    let mut interp = loaded(
        r#"
let keep = [];

def make(v)
    return () => v;
end

def main()
    let keep[0] = make(1);
    let keep[1] = make(2);
    let f = keep[1];
    print(f());
end
"#,
        out.clone(),
    );
    interp.run().unwrap();
    assert_eq!(out.contents(), "2\n");
    // Global plus the two captured frames of `make`.
    assert_eq!(interp.live_scopes(), 3);
    assert_eq!(interp.collect_garbage(), 0);
    assert_eq!(interp.live_scopes(), 3);
}

#[test]
fn unreachable_captured_frames_are_collected() {
    let out = SharedBuf::default();
    let mut interp = loaded(
        r#"
def mk()
    let f = x => x;
end

def main()
    let i = 0;
    while (i < 5000)
        mk();
        let i = i + 1;
    end
    print(i);
end
"#,
        out.clone(),
    );
    interp.run().unwrap();
    assert_eq!(out.contents(), "5000\n");
    assert!(interp.live_scopes() < 300, "{} scopes live", interp.live_scopes());
    interp.collect_garbage();
    assert_eq!(interp.live_scopes(), 1);
}

#[test]
fn collection_keeps_reachable_closures() {
    let out = SharedBuf::default();
    let mut interp = loaded(
        r#"
let keep = {};

def counter()
    let n = 0;
    return () => {
        let n = n + 1;
        return n;
    };
end

def mk()
    def inner()
    end
end

def churn()
    let i = 0;
    while (i < 600)
        mk();
        let i = i + 1;
    end
    return 0;
end

def main()
    let c = counter();
    let keep["c"] = counter();
    let pair = [counter(), churn()];
    let d = pair[0];
    churn();
    print(c());
    print(c());
    print(d());
    let e = keep["c"];
    print(e());
end
"#,
        out.clone(),
    );
    interp.run().unwrap();
    assert_eq!(out.contents(), "1\n2\n1\n1\n");
    // Global and the scope of the counter stored in `keep`.
    interp.collect_garbage();
    assert_eq!(interp.live_scopes(), 2);
}

#[test]
fn globals_are_visible_after_run() {
    let out = SharedBuf::default();
    let mut interp = loaded(
        "let total = 0; def main() let total = total + 41; end",
        out,
    );
    interp.run().unwrap();
    assert!(matches!(interp.global("total"), Some(Value::Number(n)) if n == 41.0));
    assert!(matches!(interp.global("main"), Some(Value::Closure(_))));
}

#[test]
fn errors_restore_the_call_stack() {
    let out = SharedBuf::default();
    let mut interp = loaded("def f() return missing; end def main() f(); end", out);
    assert!(interp.run().is_err());
    assert_eq!(interp.call_depth(), 0);
    assert_eq!(interp.live_scopes(), 1);
}
