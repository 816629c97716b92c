mod common;

use common::run_prog;

#[test]
fn oob_simple() {
    let program = r#"def main() let xs = [1,2,3]; print(xs[5]); end"#;
    let (code, _out, err) = run_prog(program, &[]);
    assert_eq!(code, 1, "expected failure, got {}: stderr={}", code, err);
    assert!(err.contains("out of bounds"), "missing error message: {}", err);
}

#[test]
fn oob_store_past_end() {
    // Storing at len appends; anything further is an error.
    let program = r#"def main() let arr = [0,1]; let arr[2] = 9; let arr[4] = 9; end"#;
    let (code, _out, err) = run_prog(program, &[]);
    assert_eq!(code, 1, "expected failure on store past end");
    assert!(err.contains("index 4 out of bounds for length 3"), "missing oob error: {}", err);
}

#[test]
fn oob_nested_chain() {
    let program = r#"def main() let grid = [[1,2],[3,4]]; print(grid[1][2]); end"#;
    let (code, _out, err) = run_prog(program, &[]);
    assert_eq!(code, 1, "expected failure on nested chain");
    assert!(err.contains("out of bounds"), "missing oob error nested: {}", err);
}

#[test]
fn oob_negative_and_del() {
    let program = r#"def main() let xs = [1]; del xs[-1]; end"#;
    let (code, _out, err) = run_prog(program, &[]);
    assert_eq!(code, 1);
    assert!(err.contains("index -1 out of bounds"), "{}", err);
}

#[test]
fn oob_reports_position() {
    let program = "def main()\n  let xs = [];\n  print(xs[0]);\nend\n";
    let (_code, _out, err) = run_prog(program, &[]);
    assert!(err.contains("3:11"), "missing position: {}", err);
}
