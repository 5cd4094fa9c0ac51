//! End-to-end pipeline tests
//!
//! Drives source programs through both back ends and asserts they agree
//! (the evaluator is the differential oracle for the JIT), plus driver
//! behavior through the compiled binary.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use nullc::{analyzer, codegen, interp, parser};

fn compile(source: &str) -> nullc::parser::ast::Node {
    let (mut program, ok) = parser::parse(source);
    assert!(ok, "parse failed");
    assert!(analyzer::analyze(&mut program), "analysis failed");
    program
}

fn eval(source: &str) -> i64 {
    interp::run(&compile(source))
}

fn jit(source: &str) -> i64 {
    let program = compile(source);
    let mut jit = codegen::Jit::new().expect("jit setup");
    assert!(jit.compile(&program).expect("codegen"), "codegen errors");
    jit.run_main().expect("jit run")
}

/// Both back ends must return the same integer exit value.
fn parity(source: &str) -> i64 {
    let interpreted = eval(source);
    let compiled = jit(source);
    assert_eq!(
        interpreted, compiled,
        "backend mismatch for program:\n{}",
        source
    );
    interpreted
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_dir() -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("nullc_e2e_{}_{}", std::process::id(), n));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn nullc_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nullc"))
}

// ============================================================================
// Scenario A: hello world through the real binary, both modes.
// ============================================================================

const HELLO: &str = r#"@extern "C" do
fn puts(s :: ptr<u8>) -> i64
end

fn main() -> i32 do
puts("Hello, world!")
ret 0
end
"#;

#[test]
fn scenario_a_hello_world_run() {
    let dir = temp_dir();
    let file = dir.join("hello.null");
    std::fs::write(&file, HELLO).unwrap();

    let out = nullc_bin().arg("run").arg(&file).output().unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Hello, world!"));
}

#[test]
fn scenario_a_hello_world_interp() {
    let dir = temp_dir();
    let file = dir.join("hello.null");
    std::fs::write(&file, HELLO).unwrap();

    let out = nullc_bin().arg("interp").arg(&file).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Hello, world!"));
}

#[test]
fn bare_file_argument_runs() {
    let dir = temp_dir();
    let file = dir.join("hello.null");
    std::fs::write(&file, HELLO).unwrap();

    let out = nullc_bin().arg(&file).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Hello, world!"));
}

// ============================================================================
// Scenario B: out-of-order struct init.
// ============================================================================

#[test]
fn scenario_b_struct_field_order() {
    let src = "struct Point do\nx :: i64\ny :: i64\nend\n\
               fn main() -> i32 do\nlet p = Point { y = 10, x = 5 }\n\
               ret (p.x - 5) + (p.y - 10)\nend";
    assert_eq!(parity(src), 0);
}

#[test]
fn struct_field_order_all_permutations() {
    // Any written order must land values on the declared fields.
    for init in [
        "Point { x = 1, y = 2, z = 3 }",
        "Point { z = 3, y = 2, x = 1 }",
        "Point { y = 2, z = 3, x = 1 }",
    ] {
        let src = format!(
            "struct Point do\nx :: i64\ny :: i64\nz :: i64\nend\n\
             fn main() -> i32 do\nlet p = {}\n\
             ret p.x * 100 + p.y * 10 + p.z\nend",
            init
        );
        assert_eq!(parity(&src), 123);
    }
}

// ============================================================================
// Scenario C: short-circuit safety.
// ============================================================================

#[test]
fn scenario_c_short_circuit() {
    let src = "fn trap() -> bool do\nret (1/0) == 0\nend\n\
               fn main() -> i32 do\n\
               if false and trap() do\nret 1\nend\n\
               if true or trap() do\nret 0\nend\n\
               ret 2\nend";
    assert_eq!(parity(src), 0);
}

// ============================================================================
// Scenario D: half-open for range.
// ============================================================================

#[test]
fn scenario_d_for_range() {
    let src = "fn main() -> i32 do\nmut s :: i64 = 0\n\
               for i in 0..5 do\ns = s + i\nend\nret s\nend";
    assert_eq!(parity(src), 10);
}

// ============================================================================
// Scenario E: mutability error.
// ============================================================================

#[test]
fn scenario_e_mutability_error() {
    let dir = temp_dir();
    let file = dir.join("immut.null");
    std::fs::write(
        &file,
        "fn main() -> i32 do\nlet x :: i64 = 1\nx = 2\nret 0\nend\n",
    )
    .unwrap();

    let out = nullc_bin().arg("run").arg(&file).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("immutable"));
}

// ============================================================================
// Scenario F: cyclic imports terminate with each module included once.
// ============================================================================

#[test]
fn scenario_f_cyclic_imports() {
    let dir = temp_dir();
    std::fs::write(
        dir.join("b.null"),
        "@use \"./a.null\"\nfn from_b() -> i64 do\nret 2\nend\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("a.null"),
        "@use \"./b.null\"\nfn from_a() -> i64 do\nret 1\nend\n\
         fn main() -> i32 do\nret from_a() + from_b() - 3\nend\n",
    )
    .unwrap();

    let out = nullc_bin().arg("run").arg(dir.join("a.null")).output().unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

// ============================================================================
// Escape sequences reach the runtime intact.
// ============================================================================

#[test]
fn escape_sequences_in_strings() {
    let dir = temp_dir();
    let file = dir.join("esc.null");
    std::fs::write(
        &file,
        "@extern \"C\" do\nfn puts(s :: ptr<u8>) -> i64\nend\n\
         fn main() -> i32 do\nputs(\"a\\nb\\tc\\\\d\\\"e\")\nret 0\nend\n",
    )
    .unwrap();

    let out = nullc_bin().arg("run").arg(&file).output().unwrap();
    assert!(out.status.success());
    assert_eq!(out.stdout, b"a\nb\tc\\d\"e\n");
}

// ============================================================================
// Operator precedence agrees across both back ends.
// ============================================================================

#[test]
fn precedence_battery() {
    for (expr, expected) in [
        ("2 + 3 * 4", 14),
        ("1 << 2 + 1", 8),
        ("1 | 2 ^ 3 & 1", 3),
        ("10 - 4 - 3", 3),
        ("100 / 10 / 2", 5),
        ("7 % 4 + 1", 4),
        ("~0 + 1", 0),
        ("-3 * -2", 6),
    ] {
        let src = format!("fn main() -> i32 do\nret {}\nend", expr);
        assert_eq!(parity(&src), expected, "expr: {}", expr);
    }
}

#[test]
fn comparison_results_agree() {
    let src = "fn b2i(b :: bool) -> i64 do\nif b do\nret 1\nend\nret 0\nend\n\
               fn main() -> i32 do\n\
               ret b2i(1 < 2) * 32 + b2i(2 <= 2) * 16 + b2i(3 > 2) * 8 \
                 + b2i(2 >= 3) * 4 + b2i(1 == 1) * 2 + b2i(1 != 1)\nend";
    assert_eq!(parity(src), 58);
}

// ============================================================================
// Backend parity battery.
// ============================================================================

#[test]
fn parity_fibonacci() {
    let src = "fn fib(n :: i64) -> i64 do\n\
               if n < 2 do\nret n\nend\n\
               ret fib(n - 1) + fib(n - 2)\nend\n\
               fn main() -> i32 do\nret fib(12)\nend";
    assert_eq!(parity(src), 144);
}

#[test]
fn parity_nested_loops() {
    let src = "fn main() -> i32 do\nmut total :: i64 = 0\n\
               for i in 0..10 do\n\
               for j in 0..10 do\n\
               if j > i do\ncontinue\nend\n\
               total = total + 1\nend\nend\nret total\nend";
    assert_eq!(parity(src), 55);
}

#[test]
fn parity_struct_mutation() {
    let src = "struct Counter do\nvalue :: i64\nstep :: i64\nend\n\
               fn main() -> i32 do\n\
               mut c = Counter { value = 0, step = 3 }\n\
               for i in 0..7 do\nc.value = c.value + c.step\nend\n\
               ret c.value\nend";
    assert_eq!(parity(src), 21);
}

#[test]
fn parity_struct_passing_is_by_value() {
    let src = "struct Box do\nv :: i64\nend\n\
               fn bump(b :: Box) -> i64 do\nb.v = b.v + 1\nret b.v\nend\n\
               fn main() -> i32 do\n\
               mut b = Box { v = 10 }\n\
               let r = bump(b)\n\
               ret r * 100 + b.v\nend";
    // callee sees 11, caller's copy stays 10
    assert_eq!(parity(src), 1110);
}

#[test]
fn parity_while_with_elif() {
    let src = "fn main() -> i32 do\nmut n :: i64 = 27\nmut steps :: i64 = 0\n\
               while n != 1 do\n\
               if n % 2 == 0 do\nn = n / 2\nelse do\nn = 3 * n + 1\nend\n\
               steps = steps + 1\nend\nret steps\nend";
    assert_eq!(parity(src), 111);
}

#[test]
fn parity_enum_and_pipe() {
    let src = "enum Op do\nDouble\nSquare\nend\n\
               fn double(x :: i64) -> i64 do\nret x * 2\nend\n\
               fn main() -> i32 do\n\
               let op = Op::Square\n\
               if op == Op::Square do\nret 9 |> double\nend\n\
               ret 0\nend";
    assert_eq!(parity(src), 18);
}

#[test]
fn parity_arrays() {
    let src = "fn main() -> i32 do\n\
               mut a = [5, 4, 3, 2, 1]\n\
               mut s :: i64 = 0\n\
               for i in 0..5 do\na[i] = a[i] * 2\nend\n\
               for i in 0..5 do\ns = s + a[i]\nend\n\
               ret s\nend";
    assert_eq!(parity(src), 30);
}

// ============================================================================
// Builtin host bindings resolve identically under run, interp and build.
// ============================================================================

const BUILTINS: &str = r#"@extern "C" do
fn io_print(s :: ptr<u8>) -> void
fn print_int(v :: i64) -> void
fn println() -> void
end

fn main() -> i32 do
io_print("builtins:")
print_int(42)
println()
ret 0
end
"#;

const BUILTINS_STDOUT: &[u8] = b"builtins:\n42\n";

#[test]
fn builtin_bindings_run_mode() {
    let dir = temp_dir();
    let file = dir.join("builtins.null");
    std::fs::write(&file, BUILTINS).unwrap();

    let out = nullc_bin().arg("run").arg(&file).output().unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert_eq!(out.stdout, BUILTINS_STDOUT);
}

#[test]
fn builtin_bindings_interp_mode() {
    let dir = temp_dir();
    let file = dir.join("builtins.null");
    std::fs::write(&file, BUILTINS).unwrap();

    let out = nullc_bin().arg("interp").arg(&file).output().unwrap();
    assert!(out.status.success());
    assert_eq!(out.stdout, BUILTINS_STDOUT);
}

#[test]
fn builtin_bindings_build_mode() {
    if Command::new("clang").arg("--version").output().is_err() {
        eprintln!("skipping: clang not available");
        return;
    }

    let dir = temp_dir();
    let file = dir.join("builtins.null");
    std::fs::write(&file, BUILTINS).unwrap();
    let exe = dir.join("builtins");

    let out = nullc_bin()
        .arg("build")
        .arg(&file)
        .arg("-o")
        .arg(&exe)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "build failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let run = Command::new(&exe).output().unwrap();
    assert_eq!(run.status.code(), Some(0));
    assert_eq!(run.stdout, BUILTINS_STDOUT);
}

#[test]
fn print_raw_binding_builds_and_links() {
    if Command::new("clang").arg("--version").output().is_err() {
        eprintln!("skipping: clang not available");
        return;
    }

    let dir = temp_dir();
    let file = dir.join("raw.null");
    std::fs::write(
        &file,
        "@extern \"C\" do\nfn print_raw(s :: ptr<u8>) -> void\n\
         fn printf(fmt :: ptr<u8>) -> i64\nend\n\
         fn main() -> i32 do\nprint_raw(\"a\")\nprintf(\"b\")\nret 0\nend\n",
    )
    .unwrap();
    let exe = dir.join("raw");

    let out = nullc_bin()
        .arg("build")
        .arg(&file)
        .arg("-o")
        .arg(&exe)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "build failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let run = Command::new(&exe).output().unwrap();
    assert_eq!(run.stdout, b"ab");
}

// ============================================================================
// Build subcommand: object emission and linking.
// ============================================================================

#[test]
fn build_produces_executable() {
    // Needs a C toolchain on the host to link.
    if Command::new("clang").arg("--version").output().is_err() {
        eprintln!("skipping: clang not available");
        return;
    }

    let dir = temp_dir();
    let file = dir.join("answer.null");
    std::fs::write(&file, "fn main() -> i32 do\nret 42\nend\n").unwrap();
    let exe = dir.join("answer");

    let out = nullc_bin()
        .arg("build")
        .arg(&file)
        .arg("-o")
        .arg(&exe)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "build failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let run = Command::new(&exe).output().unwrap();
    assert_eq!(run.status.code(), Some(42));
}

// ============================================================================
// Test subcommand summary format.
// ============================================================================

#[test]
fn test_subcommand_reports_summary() {
    let dir = temp_dir();
    std::fs::write(dir.join("pass.null"), "fn main() -> i32 do\nret 0\nend\n").unwrap();
    std::fs::write(dir.join("fail.null"), "fn main() -> i32 do\nret 1\nend\n").unwrap();

    let out = nullc_bin().arg("test").arg(&dir).output().unwrap();
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("1 passed, 1 failed"), "stdout: {}", stdout);
    assert!(!out.status.success());
}

// ============================================================================
// Exit codes propagate from main.
// ============================================================================

#[test]
fn exit_code_is_mains_return() {
    let dir = temp_dir();
    let file = dir.join("seven.null");
    std::fs::write(&file, "fn main() -> i32 do\nret 7\nend\n").unwrap();

    let out = nullc_bin().arg("run").arg(&file).output().unwrap();
    assert_eq!(out.status.code(), Some(7));

    let out = nullc_bin().arg("interp").arg(&file).output().unwrap();
    assert_eq!(out.status.code(), Some(7));
}
