// Shared fixtures for integration tests
//
// Builds throwaway logs directories in the layout the loader expects.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary logs directory
pub struct LogsDir {
    pub dir: TempDir,
}

impl LogsDir {
    /// Empty directory with a `(ref_mono, ref_wall)` reference file
    pub fn with_reference(ref_mono: f64, ref_wall: f64) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::write(
            dir.path().join("reference_timestamps.json"),
            format!(r#"{{"ref_mono": {}, "ref_wall": {}}}"#, ref_mono, ref_wall),
        )
        .expect("write reference");
        Self { dir }
    }

    /// Empty directory without a reference file
    pub fn without_reference() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a trace file from lines (each gets a trailing newline)
    pub fn trace<S: AsRef<str>>(&self, name: &str, lines: &[S]) -> PathBuf {
        let path = self.dir.path().join(name);
        let mut content = String::new();
        for line in lines {
            content.push_str(line.as_ref());
            content.push('\n');
        }
        fs::write(&path, content).expect("write trace file");
        path
    }
}

/// ENTER line
pub fn en(t: u64, pid: u32, tid: u32, proc: &str, op: &str, spec: &str) -> String {
    format!("{} {{pid={} tid={} proc={}}}{{EN {}}}{{{}}}", t, pid, tid, proc, op, spec)
}

/// EXIT line
pub fn ex(t: u64, pid: u32, tid: u32, proc: &str, op: &str, spec: &str) -> String {
    format!("{} {{pid={} tid={} proc={}}}{{EX {}}}{{{}}}", t, pid, tid, proc, op, spec)
}
