use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

pub const DECOMPOSITION_LOG: &str = "decompositions.jsonl";

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

pub fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Clone, Serialize)]
pub struct DecompositionLogEntry {
    pub session: String,
    pub tier: &'static str,
    pub channel: &'static str,
    pub rows: usize,
    pub cols: usize,
    pub rank: usize,
    pub iterations: usize,
    pub converged: usize,
    pub elapsed_ms: u128,
    pub leading_sigma: Option<f64>,
    pub timestamp_ms: u128,
}

/// Append-only JSON-lines record of finished decompositions.
#[derive(Debug, Clone)]
pub struct DecompositionLog {
    path: PathBuf,
}

impl DecompositionLog {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(DECOMPOSITION_LOG),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &DecompositionLogEntry) -> io::Result<()> {
        append_json_line(&self.path, entry)
    }

    /// Like [`append`](Self::append) but only logs I/O failures.
    pub fn record(&self, entry: &DecompositionLogEntry) {
        if let Err(err) = self.append(entry) {
            warn!(path = %self.path.display(), error = %err, "failed to write decomposition log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rank: usize) -> DecompositionLogEntry {
        DecompositionLogEntry {
            session: "test".into(),
            tier: "exact",
            channel: "red",
            rows: 4,
            cols: 3,
            rank,
            iterations: 17,
            converged: rank,
            elapsed_ms: 2,
            leading_sigma: Some(9.5),
            timestamp_ms: timestamp_ms(),
        }
    }

    #[test]
    fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecompositionLog::in_dir(dir.path().join("nested")).unwrap();
        log.append(&entry(2)).unwrap();
        log.record(&entry(3));

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["rank"], 3);
        assert_eq!(second["tier"], "exact");
        assert_eq!(second["leading_sigma"], 9.5);
    }
}
