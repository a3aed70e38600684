use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

fn nyr() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_nyr"));
    cmd.env_remove("NYR_GC_STRESS")
        .env_remove("NYR_GC_THRESHOLD")
        .env_remove("NYR_MAX_FRAMES")
        .env_remove("RUST_LOG");
    cmd
}

fn script(dir: &tempfile::TempDir, name: &str, source: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, source).expect("write script");
    path
}

fn run_script(source: &str, args: &[&str]) -> Output {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = script(&dir, "main.nyr", source);
    nyr().args(args).arg(&path).output().expect("failed to run nyr")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// --- Running scripts ---

#[test]
fn runs_a_script() {
    let out = run_script("let x = 1;\ndef f() { return x + 1; }\nprint f();\n", &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "2\n");
}

#[test]
fn compile_error_exits_65() {
    let out = run_script("let a = 1;\nprint a +;\n", &["--no-color"]);
    assert_eq!(out.status.code(), Some(65));
    let err = stderr(&out);
    assert!(err.contains("error[NYR-C002]"), "stderr: {err}");
    assert!(err.contains("--> 2:10"), "stderr: {err}");
    assert!(err.contains("print a +;"), "stderr: {err}");
    assert!(stdout(&out).is_empty());
}

#[test]
fn duplicate_local_points_at_first_declaration() {
    let out = run_script("{\n  let a = 1;\n  let a = 2;\n}\n", &["--no-color"]);
    assert_eq!(out.status.code(), Some(65));
    let err = stderr(&out);
    assert!(err.contains("error[NYR-C005]"), "stderr: {err}");
    assert!(err.contains("--> 3:7"), "stderr: {err}");
    assert!(err.contains("= first declared here at 2:7"), "stderr: {err}");
}

#[test]
fn deeply_nested_source_exits_65() {
    let source = format!("print {}1{};\n", "(".repeat(10_000), ")".repeat(10_000));
    let out = run_script(&source, &["--diagnostics", "json"]);
    assert_eq!(out.status.code(), Some(65));
    let err = stderr(&out);
    let first = err.lines().next().unwrap_or_default();
    let v: serde_json::Value = serde_json::from_str(first).expect("json diagnostic");
    assert_eq!(v["code"], "NYR-C018");
}

#[test]
fn runtime_error_exits_70_with_trace() {
    let src = "class Point {}\ndef get(p) {\n  return p.y;\n}\nprint get(Point());\n";
    let out = run_script(src, &["--no-color"]);
    assert_eq!(out.status.code(), Some(70));
    let err = stderr(&out);
    assert!(err.contains("error[NYR-R003]: undefined property 'y'"), "stderr: {err}");
    assert!(err.contains("--> line 3"), "stderr: {err}");
    assert!(err.contains("note: in get() at line 3"), "stderr: {err}");
    assert!(err.contains("note: in script at line 5"), "stderr: {err}");
}

#[test]
fn output_before_a_runtime_error_is_kept() {
    let out = run_script("print \"before\";\nprint nope;\nprint \"after\";\n", &[]);
    assert_eq!(out.status.code(), Some(70));
    assert_eq!(stdout(&out), "before\n");
}

#[test]
fn missing_file_exits_74() {
    let out = nyr().arg("/nonexistent/dir/missing.nyr").output().expect("failed to run nyr");
    assert_eq!(out.status.code(), Some(74));
    assert!(stderr(&out).contains("can't read"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let out = nyr().arg("--no-such-flag").output().expect("failed to run nyr");
    assert_eq!(out.status.code(), Some(64));
}

// --- Diagnostics ---

#[test]
fn json_diagnostics() {
    let out = run_script("print ;\nlet 1 = 2;\n", &["--diagnostics", "json"]);
    assert_eq!(out.status.code(), Some(65));
    let err = stderr(&out);
    let diags: Vec<serde_json::Value> = err
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect();
    assert_eq!(diags.len(), 2, "stderr: {err}");
    assert_eq!(diags[0]["code"], "NYR-C002");
    assert_eq!(diags[0]["labels"][0]["line"], 1);
    assert_eq!(diags[1]["code"], "NYR-C001");
    assert_eq!(diags[1]["line"], 2);
}

#[test]
fn json_runtime_diagnostic() {
    let out = run_script("def f(a) {}\nf();\n", &["--diagnostics", "json"]);
    assert_eq!(out.status.code(), Some(70));
    let v: serde_json::Value =
        serde_json::from_str(stderr(&out).trim()).expect("runtime diagnostic is JSON");
    assert_eq!(v["code"], "NYR-R005");
    assert_eq!(v["message"], "expected 1 arguments but got 0");
    assert_eq!(v["line"], 2);
}

#[test]
fn explain_known_code() {
    let out = nyr().args(["--explain", "nyr-r002"]).output().expect("failed to run nyr");
    assert!(out.status.success());
    assert!(stdout(&out).contains("## NYR-R002: undefined variable"));
}

#[test]
fn explain_unknown_code() {
    let out = nyr().args(["--explain", "NYR-Z000"]).output().expect("failed to run nyr");
    assert_eq!(out.status.code(), Some(64));
    assert!(stderr(&out).contains("unknown error code"));
}

// --- Disassembly ---

#[test]
fn disassemble_does_not_run() {
    let out = run_script("def twice(n) { return n * 2; }\nprint twice(21);\n", &["--disassemble"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("== <script> =="), "stdout: {text}");
    assert!(text.contains("== twice =="), "stdout: {text}");
    assert!(text.contains("OP_MUL"), "stdout: {text}");
    assert!(!text.lines().any(|l| l == "42"), "script was executed: {text}");
}

// --- Configuration ---

#[test]
fn max_frames_from_env() {
    let src = "def depth(n) { if (n == 0) return 0; return depth(n - 1) + 1; }\nprint depth(10);\n";
    let out = run_script(src, &[]);
    assert_eq!(stdout(&out), "10\n");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = script(&dir, "deep.nyr", src);
    let out = nyr().env("NYR_MAX_FRAMES", "5").arg(&path).output().expect("failed to run nyr");
    assert_eq!(out.status.code(), Some(70));
    assert!(stderr(&out).contains("stack overflow"));
}

#[test]
fn gc_stress_with_stats() {
    let src = "let s = \"\";\nfor (let i = 0; i < 50; i += 1) { s = s + str(i); }\nprint len(s);\n";
    let out = run_script(src, &["--gc-stress", "--gc-stats"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "90\n");
    let err = stderr(&out);
    let stats: serde_json::Value =
        serde_json::from_str(err.lines().last().unwrap_or_default()).expect("stats JSON");
    assert!(stats["collections"].as_u64().unwrap() > 0);
    assert!(stats["objects_freed"].as_u64().unwrap() > 0);
}

// --- REPL ---

#[test]
fn repl_keeps_globals_across_lines_and_errors() {
    let mut child = nyr()
        .arg("--no-color")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn nyr");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"let a = 2;\nprint a * 3;\nprint nope;\nlet = ;\n\nprint a;\n")
        .expect("write stdin");
    let out = child.wait_with_output().expect("wait for nyr");
    assert!(out.status.success());

    let text = stdout(&out);
    assert!(text.starts_with("nyr> "), "stdout: {text}");
    assert!(text.contains("6\n"), "stdout: {text}");
    assert!(text.contains("2\n"), "stdout: {text}");
    let err = stderr(&out);
    assert!(err.contains("NYR-R002"), "stderr: {err}");
    assert!(err.contains("NYR-C001"), "stderr: {err}");
}
