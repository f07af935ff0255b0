// Integration tests for the tgc binary: emit stages, exit codes, and the
// stdout summary contract.

use std::path::{Path, PathBuf};
use std::process::Command;

fn tgc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tgc"))
}

fn write_trace(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("trace");
    std::fs::write(&path, text).unwrap();
    path
}

const SMALL_TRACE: &str = "\
0,1,top,entry:0,top-0,26,0
r,64,1024,1,%a,
0,2,top,entry:0,top-1,28,1
2,64,1024,1,%a,
1,32,5,0,5,
0,3,top,entry:0,top-2,27,2
1,64,1024,1,%a,
r,32,5,1,%b,
0,4,top,entry:0,top-3,1,3
";

#[test]
fn summary_is_printed_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), SMALL_TRACE);
    let output = Command::new(tgc_binary())
        .arg(&trace)
        .arg("--no-progress")
        .output()
        .expect("failed to run tgc");

    assert!(
        output.status.success(),
        "tgc should succeed.\nstderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Num of Nodes: 4"));
    assert!(stdout.contains("Num of Reg Edges: 2"));
    assert!(stdout.contains("Num of MEM Edges: 1"));
    assert!(stdout.contains("Num of Control Edges: 3"));
}

#[test]
fn emit_dot_produces_a_digraph() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), SMALL_TRACE);
    let output = Command::new(tgc_binary())
        .arg(&trace)
        .arg("--no-progress")
        .arg("--emit")
        .arg("dot")
        .output()
        .expect("failed to run tgc");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("digraph dddg {"));
    assert!(stdout.contains("n1 -> n2"));
}

#[test]
fn emit_json_writes_a_parsable_summary() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), SMALL_TRACE);
    let out_path = dir.path().join("summary.json");
    let output = Command::new(tgc_binary())
        .arg(&trace)
        .arg("--no-progress")
        .arg("--emit")
        .arg("json")
        .arg("--output")
        .arg(&out_path)
        .output()
        .expect("failed to run tgc");

    assert!(output.status.success());
    let text = std::fs::read_to_string(&out_path).unwrap();
    let summary: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(summary["schema"], 1);
    assert_eq!(summary["num_nodes"], 4);
    assert_eq!(summary["functions"][0], "top");
    assert_eq!(summary["trace_sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn progress_file_lands_where_asked() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), SMALL_TRACE);
    let progress = dir.path().join("progress.out");
    let output = Command::new(tgc_binary())
        .arg(&trace)
        .arg("--progress-file")
        .arg(&progress)
        .output()
        .expect("failed to run tgc");

    assert!(output.status.success());
    let text = std::fs::read_to_string(&progress).unwrap();
    assert!(text.starts_with("bytes,nodes\n"));
}

#[test]
fn missing_trace_exits_nonzero_with_diagnostic() {
    let output = Command::new(tgc_binary())
        .arg("/nonexistent/trace")
        .arg("--no-progress")
        .output()
        .expect("failed to run tgc");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("tgc: error:"));
}

#[test]
fn empty_trace_exits_with_end_of_trace_code() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), "");
    let output = Command::new(tgc_binary())
        .arg(&trace)
        .arg("--no-progress")
        .output()
        .expect("failed to run tgc");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Reached end of trace."));
}

#[test]
fn malformed_trace_reports_line() {
    let dir = tempfile::tempdir().unwrap();
    let trace = write_trace(dir.path(), "0,1,top,entry:0,top-0,26,0\nq,64,1,1,%a,\n");
    let output = Command::new(tgc_binary())
        .arg(&trace)
        .arg("--no-progress")
        .output()
        .expect("failed to run tgc");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("trace line 2"));
}
