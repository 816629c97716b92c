mod common;

use benji::{Error, EvalErrorKind};
use common::{error, output};

#[test]
fn arithmetic_precedence() {
    let out = output(
        r#"
def main()
    print(2 + 3 * 4);
    print(2 * 3 ^ 2);
    print((2 + 3) * 4);
    print(10 - 2 - 3);
    print(7 / 2);
    print(7 % 3);
    print(-7 % 3);
    print(7.9 % 2.5);
    print(2 ^ 0.5 * 2 ^ 0.5);
end
"#,
    );
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(&lines[..8], &["14", "18", "20", "5", "3.5", "1", "-1", "1"]);
    let root: f64 = lines[8].parse().unwrap();
    assert!((root - 2.0).abs() < 1e-9);
}

#[test]
fn subtraction_is_not_a_signed_literal() {
    let out = output("def main() let n = 5; print(n-1); print(n - -1); end");
    assert_eq!(out, "4\n6\n");
}

#[test]
fn exponent_does_not_chain() {
    let err = benji::parser::parse_source("def main() let x = 2^3^0; end").unwrap_err();
    assert!(matches!(err, Error::Parse { .. }), "{:?}", err);
    // Parenthesized, it is fine.
    assert_eq!(output("def main() print((2^3)^0); end"), "1\n");
}

#[test]
fn plus_concatenates_non_numbers() {
    let out = output(
        r#"
def main()
    print("a" + 5);
    print(5 + "a");
    print("n=" + [1, 2]);
    print(1 + true);
    print("x" + null);
end
"#,
    );
    assert_eq!(out, "a5\n5a\nn=[1, 2]\n1true\nxnull\n");
}

#[test]
fn comparisons_and_logic() {
    let out = output(
        r#"
def main()
    print(1 < 2 && 2 < 3);
    print(1 > 2 || "abc" < "abd");
    print(true = true);
    print(false != true);
    print(3 >= 3);
    print("b" <= "a");
end
"#,
    );
    assert_eq!(out, "true\ntrue\ntrue\ntrue\ntrue\nfalse\n");
}

#[test]
fn mixed_comparison_is_an_error() {
    let err = error(r#"def main() print(1 = "1"); end"#);
    assert!(
        matches!(err.eval_kind(), Some(EvalErrorKind::InvalidOperands { op: "=", .. })),
        "{}",
        err
    );
    let err = error("def main() print(true < false); end");
    assert!(matches!(err.eval_kind(), Some(EvalErrorKind::InvalidOperands { .. })));
    let err = error("def main() print(null = null); end");
    assert!(matches!(err.eval_kind(), Some(EvalErrorKind::InvalidOperands { .. })));
}

#[test]
fn logic_requires_booleans() {
    let err = error("def main() print(1 && true); end");
    assert!(matches!(err.eval_kind(), Some(EvalErrorKind::InvalidOperands { op: "&&", .. })));
}

#[test]
fn modulo_by_zero_fails() {
    let err = error("def main() print(5 % 0.5); end");
    assert!(matches!(err.eval_kind(), Some(EvalErrorKind::InvalidOperands { op: "%", .. })));
}

#[test]
fn if_else_and_while() {
    let out = output(
        r#"
def main()
    let i = 0;
    let sum = 0;
    while (i < 10)
        let i = i + 1;
        if (i % 2 = 0)
            let sum = sum + i;
        else
            let sum = sum + 0;
        end
    end
    print(sum);
end
"#,
    );
    assert_eq!(out, "30\n");
}

#[test]
fn only_true_takes_a_branch() {
    let out = output(
        r#"
def main()
    if (1)
        print("x");
    end
    if ("yes")
        print("y");
    else
        print("else");
    end
    while (1)
        print("loop");
    end
    if (1 < 2)
        print("z");
    end
    print("after");
end
"#,
    );
    assert_eq!(out, "else\nz\nafter\n");
}

#[test]
fn keywords_are_case_insensitive() {
    let out = output(
        r#"
DEF main()
    LET x = TRUE;
    If (x)
        print("yes");
    ELSE
        print("no");
    End
    WHILE (FALSE) END
    Return NULL;
enD
"#,
    );
    assert_eq!(out, "yes\n");
}

#[test]
fn comments_are_remarks() {
    let program = benji::parser::parse_source(
        "# header\ndef main()\n  # inside\n  print(1); # trailing\nend\n",
    )
    .unwrap();
    assert!(matches!(program.items[0], benji::ast::TopLevel::Remark(ref r) if r == "header"));
    assert_eq!(output("# header\ndef main()\n  # inside\n  print(1); # trailing\nend\n"), "1\n");
}

#[test]
fn parsing_is_deterministic() {
    let src = r#"
const K = 3;
let g = {a: [1, 2], b: x => x * K};
def main()
    let triple = g["b"];
    print(triple(2));
end
"#;
    let a = benji::parser::parse_source(src).unwrap();
    let b = benji::parser::parse_source(src).unwrap();
    assert_eq!(a, b);
    assert_eq!(output(src), "6\n");
}

#[test]
fn display_forms() {
    let out = output(
        r#"
def pair(a, b)
    return [a, b];
end

def main()
    print(3.0);
    print(0.25);
    print(null);
    print({b: 2, a: "x"});
    print(pair);
    print(x => x);
    print([[1], []]);
end
"#,
    );
    assert_eq!(
        out,
        "3\n0.25\nnull\n{a: x, b: 2}\npair(a,b)\n_anon_0(x)\n[[1], []]\n"
    );
}

#[test]
fn return_null_stops_the_function() {
    let out = output(
        r#"
def f()
    return null;
    print("after");
end

def main()
    print(f());
end
"#,
    );
    assert_eq!(out, "null\n");
}

#[test]
fn constants_cannot_be_assigned() {
    assert_eq!(output("const LIMIT = 3; def main() print(LIMIT * 2); end"), "6\n");
    let err = error("const LIMIT = 3; def main() let LIMIT = 4; end");
    assert_eq!(
        err.eval_kind(),
        Some(&EvalErrorKind::ConstAssignment("LIMIT".into()))
    );
}

#[test]
fn main_is_required() {
    let err = error("def start() end");
    assert_eq!(err.eval_kind(), Some(&EvalErrorKind::NoMain));
    let err = error("def main(a) end");
    assert!(matches!(
        err.eval_kind(),
        Some(EvalErrorKind::ArityMismatch { expected: 1, received: 0, .. })
    ));
}

#[test]
fn unknown_names() {
    let err = error("def main() nope(1); end");
    assert_eq!(
        err.eval_kind(),
        Some(&EvalErrorKind::UnknownFunction("nope".into()))
    );
    let err = error("def main() print(missing); end");
    assert_eq!(
        err.eval_kind(),
        Some(&EvalErrorKind::UnknownVariable("missing".into()))
    );
}

#[test]
fn arity_is_exact() {
    let err = error("def f(a) return a; end def main() f(1, 2); end");
    assert_eq!(
        err.eval_kind(),
        Some(&EvalErrorKind::ArityMismatch {
            name: "f".into(),
            expected: 1,
            received: 2
        })
    );
}

#[test]
fn del_shifts_elements() {
    let out = output(
        r#"
def main()
    let a = [1, 2, 3, 4];
    del a[1];
    print(a);
    del a[2];
    print(a);
    let m = {k: [5, 6]};
    del m["k"][0];
    print(m);
end
"#,
    );
    assert_eq!(out, "[1, 3, 4]\n[1, 3]\n{k: [6]}\n");
}

#[test]
fn duplicate_parameters_are_rejected() {
    let err = benji::parser::parse_source("def f(a, a) end def main() end").unwrap_err();
    assert!(err.to_string().contains("duplicate parameter"), "{}", err);
}

#[test]
fn long_operator_chains_evaluate() {
    let terms = vec!["1"; 30000].join(" + ");
    let out = output(&format!("def main() print({}); end", terms));
    assert_eq!(out, "30000\n");

    let terms = vec!["[1]"; 5000].join("[0] + ");
    let out = output(&format!("def main() let x = {}[0]; print(x); end", terms));
    assert_eq!(out, "5000\n");
}
