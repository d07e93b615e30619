//! Per-worker result files for the compute workload

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::fd::IntoRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::suffixed_path;
use crate::pool::WorkerId;
use crate::workload::close_fd;
use crate::workload::compute::PiEstimate;

/// rw-rw-r--
pub const RESULT_FILE_MODE: u32 = 0o664;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open result file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write result file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to close result file {}: {source}", path.display())]
    Close {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn close(file: impl IntoRawFd, path: &Path) -> Result<(), SinkError> {
    close_fd(file).map_err(|source| SinkError::Close {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes each worker's estimate to `<base>-<worker>`
///
/// Names depend only on base and worker id, so a second run against the same
/// base overwrites the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSink {
    base: PathBuf,
}

impl ResultSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn path_for(&self, id: WorkerId) -> PathBuf {
        suffixed_path(&self.base, id)
    }

    /// Write the estimate as decimal text with synchronous writes
    pub fn persist(&self, id: WorkerId, estimate: PiEstimate) -> Result<PathBuf, SinkError> {
        let path = self.path_for(id);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(RESULT_FILE_MODE)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        writeln!(file, "{estimate}").map_err(|source| SinkError::Write {
            path: path.clone(),
            source,
        })?;
        close(file, &path)?;

        debug!(worker = %id, path = %path.display(), %estimate, "persisted estimate");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::StaleFd;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn worker(n: u32) -> WorkerId {
        WorkerId::new(n).unwrap()
    }

    #[test]
    fn test_path_for_appends_worker_id() {
        let sink = ResultSink::new("pilog");
        assert_eq!(sink.path_for(worker(5)), PathBuf::from("pilog-5"));
    }

    #[test]
    fn test_persist_writes_decimal_text() {
        let dir = TempDir::new().unwrap();
        let sink = ResultSink::new(dir.path().join("pilog"));
        let estimate = crate::workload::compute::estimate_pi(0, &mut rand::thread_rng());

        let path = sink.persist(worker(1), estimate).unwrap();

        assert_eq!(path, dir.path().join("pilog-1"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0\n");
    }

    #[test]
    fn test_persist_truncates_previous_result() {
        let dir = TempDir::new().unwrap();
        let sink = ResultSink::new(dir.path().join("pilog"));
        std::fs::write(sink.path_for(worker(3)), "a much longer stale value\n")
            .unwrap();

        let estimate = crate::workload::compute::estimate_pi(0, &mut rand::thread_rng());
        let path = sink.persist(worker(3), estimate).unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "0\n");
    }

    #[test]
    fn test_new_file_gets_result_mode() {
        let dir = TempDir::new().unwrap();
        let sink = ResultSink::new(dir.path().join("pilog"));
        let estimate = crate::workload::compute::estimate_pi(0, &mut rand::thread_rng());
        let path = sink.persist(worker(1), estimate).unwrap();

        let mode = std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        // umask can only clear bits
        assert_eq!(mode & !RESULT_FILE_MODE, 0);
    }

    #[test]
    fn test_close_failure_is_reported() {
        let err = close(StaleFd, Path::new("pilog-1")).unwrap_err();
        assert!(matches!(err, SinkError::Close { ref path, .. } if path == Path::new("pilog-1")));
    }

    #[test]
    fn test_persist_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let sink = ResultSink::new(dir.path().join("missing").join("pilog"));
        let estimate = crate::workload::compute::estimate_pi(0, &mut rand::thread_rng());
        let err = sink.persist(worker(1), estimate).unwrap_err();
        assert!(matches!(err, SinkError::Open { .. }));
    }
}
