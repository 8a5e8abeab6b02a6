//! Newline-delimited JSON extraction shared by the catalog and event readers.

pub mod event;
pub mod song;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid record at {path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("Lookup failed: {0}")]
    Db(#[from] crate::db::DbError),
}

/// How a malformed record affects the rest of its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordPolicy {
    /// Log the bad line and keep going.
    #[default]
    Skip,
    /// Fail the whole file on the first bad line.
    Abort,
}

/// Records pulled from one file, plus bookkeeping for the run summary.
#[derive(Debug)]
pub struct Extracted<T> {
    pub records: Vec<T>,
    /// Valid records intentionally dropped (e.g. non-play events).
    pub filtered: usize,
    /// Malformed records skipped under [`RecordPolicy::Skip`].
    pub skipped: usize,
}

/// Read `path` one JSON object per line, deserialize each into `R`, then hand
/// it to `convert`.
///
/// `convert` returns `Ok(None)` to drop a valid record and `Err` to reject it
/// as malformed. Blank lines are ignored.
pub fn read_records<R, T, F>(
    path: &Path,
    policy: RecordPolicy,
    mut convert: F,
) -> Result<Extracted<T>, ExtractError>
where
    R: DeserializeOwned,
    F: FnMut(R) -> Result<Option<T>, String>,
{
    let display = path.display().to_string();
    let io_err = |source| ExtractError::Io {
        path: display.clone(),
        source,
    };

    let reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut out = Extracted {
        records: Vec::new(),
        filtered: 0,
        skipped: 0,
    };

    // Split on raw bytes so a line of bad UTF-8 is a bad record, not a read failure.
    for (idx, line) in reader.split(b'\n').enumerate() {
        let bytes = line.map_err(io_err)?;
        let line_no = idx + 1;

        let result = match std::str::from_utf8(&bytes) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => serde_json::from_str::<R>(line)
                .map_err(|e| e.to_string())
                .and_then(&mut convert),
            Err(e) => Err(format!("invalid UTF-8: {e}")),
        };

        match result {
            Ok(Some(record)) => out.records.push(record),
            Ok(None) => out.filtered += 1,
            Err(message) => match policy {
                RecordPolicy::Skip => {
                    log::warn!("Skipping bad record at {}:{}: {}", display, line_no, message);
                    out.skipped += 1;
                }
                RecordPolicy::Abort => {
                    return Err(ExtractError::Parse {
                        path: display.clone(),
                        line: line_no,
                        message,
                    });
                }
            },
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Deserialize)]
    struct Item {
        n: i64,
    }

    fn evens(item: Item) -> Result<Option<i64>, String> {
        if item.n < 0 {
            return Err("negative".to_string());
        }
        Ok((item.n % 2 == 0).then_some(item.n))
    }

    fn write(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("items.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_skip_policy_counts_bad_lines() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "{\"n\": 2}\n\nnot json\n{\"n\": 3}\n{\"n\": -1}\n{\"n\": 4}\n");

        let out = read_records(&path, RecordPolicy::Skip, evens).unwrap();
        assert_eq!(out.records, vec![2, 4]);
        assert_eq!(out.filtered, 1);
        assert_eq!(out.skipped, 2);
    }

    #[test]
    fn test_invalid_utf8_is_a_bad_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        fs::write(&path, b"{\"n\": 2}\n{\"n\": \xff}\n{\"n\": 4}\r\n").unwrap();

        let out = read_records(&path, RecordPolicy::Skip, evens).unwrap();
        assert_eq!(out.records, vec![2, 4]);
        assert_eq!(out.skipped, 1);

        match read_records(&path, RecordPolicy::Abort, evens) {
            Err(ExtractError::Parse { line, message, .. }) => {
                assert_eq!(line, 2);
                assert!(message.contains("UTF-8"));
            }
            other => panic!("expected parse error, got {:?}", other.map(|o| o.records)),
        }
    }

    #[test]
    fn test_abort_policy_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "{\"n\": 2}\n{\"m\": 1}\n");

        match read_records(&path, RecordPolicy::Abort, evens) {
            Err(ExtractError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other.map(|o| o.records)),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = read_records(&dir.path().join("gone.json"), RecordPolicy::Skip, evens);
        assert!(matches!(result, Err(ExtractError::Io { .. })));
    }
}
