//! I/O-bound workload: block-by-block synchronous file copy
//!
//! Each worker copies whole blocks from `<input>-<worker>` into its own output
//! file until at least `transfer_size` bytes have been written. A short read
//! means the end of the input: the input is rewound and the partial block is
//! dropped, never written. Both files are opened `O_SYNC` so every write pays
//! the full device cost.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::fd::IntoRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{suffixed_path, OutputSuffix, TransferConfig, MAX_FILENAME_LEN};
use crate::pool::WorkerId;
use crate::workload::close_fd;

/// rw-rw-r--
pub const OUTPUT_FILE_MODE: u32 = 0o664;

/// Running counters for one worker's copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferState {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub input_resets: u64,
}

impl TransferState {
    /// Number of times the input was read from the start
    pub fn input_passes(&self) -> u64 {
        self.input_resets + 1
    }
}

/// Which I/O call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStage {
    Read,
    Write,
    Seek,
    Close,
}

impl fmt::Display for IoStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "reading",
            Self::Write => "writing",
            Self::Seek => "resetting to beginning of",
            Self::Close => "closing",
        })
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Failed to open input file {}: {source}", path.display())]
    OpenInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open output file {}: {source}", path.display())]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Output filename {} exceeds limit of {MAX_FILENAME_LEN} characters", path.display())]
    NameTooLong { path: PathBuf },

    #[error("Error {stage} {}: {source}", path.display())]
    Io {
        stage: IoStage,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Input file {} holds no complete {block_size}-byte block ({} resets, {} bytes written)",
        path.display(),
        state.input_resets,
        state.bytes_written
    )]
    InputExhausted {
        path: PathBuf,
        block_size: usize,
        state: TransferState,
    },
}

fn read_block<R: Read>(input: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buffer) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Copy whole blocks from `input` to `output` until `transfer_size` is reached
///
/// `buffer.len()` is the block size. Paths are used for error context only.
/// Two rewinds in a row with nothing written between them mean the input
/// cannot supply a single full block, and the copy fails instead of spinning.
pub fn copy_blocks<R, W>(
    input: &mut R,
    output: &mut W,
    buffer: &mut [u8],
    transfer_size: u64,
    input_path: &Path,
    output_path: &Path,
) -> Result<TransferState, TransferError>
where
    R: Read + Seek,
    W: Write,
{
    let block_size = buffer.len();
    let io_err = |stage: IoStage, path: &Path, source: io::Error| TransferError::Io {
        stage,
        path: path.to_path_buf(),
        source,
    };

    let mut state = TransferState::default();
    let mut wrote_since_reset = true;
    loop {
        let n = read_block(input, buffer)
            .map_err(|e| io_err(IoStage::Read, input_path, e))?;
        state.bytes_read += n as u64;
        state.read_count += 1;

        if n == block_size {
            output
                .write_all(&buffer[..n])
                .map_err(|e| io_err(IoStage::Write, output_path, e))?;
            state.bytes_written += n as u64;
            state.write_count += 1;
            wrote_since_reset = true;
        } else {
            if !wrote_since_reset {
                return Err(TransferError::InputExhausted {
                    path: input_path.to_path_buf(),
                    block_size,
                    state,
                });
            }
            input
                .seek(SeekFrom::Start(0))
                .map_err(|e| io_err(IoStage::Seek, input_path, e))?;
            state.input_resets += 1;
            wrote_since_reset = false;
        }

        if state.bytes_written >= transfer_size {
            return Ok(state);
        }
    }
}

/// The transfer worker body
///
/// Owns the one block buffer the process allocates; forked children each get
/// their own copy of it.
#[derive(Debug, Clone)]
pub struct TransferWorkload {
    config: TransferConfig,
    buffer: Vec<u8>,
}

impl TransferWorkload {
    pub fn new(config: TransferConfig) -> Self {
        let buffer = vec![0; config.block_size];
        Self { config, buffer }
    }

    pub fn input_path(&self, id: WorkerId) -> PathBuf {
        suffixed_path(&self.config.input_base, id)
    }

    pub fn output_path(&self, id: WorkerId) -> PathBuf {
        match self.config.output_suffix {
            OutputSuffix::ProcessId => {
                suffixed_path(&self.config.output_base, std::process::id())
            }
            OutputSuffix::WorkerId => suffixed_path(&self.config.output_base, id),
        }
    }

    fn open_input(path: &Path) -> Result<File, TransferError> {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| TransferError::OpenInput {
                path: path.to_path_buf(),
                source,
            })
    }

    fn open_output(path: &Path) -> Result<File, TransferError> {
        if path.as_os_str().len() >= MAX_FILENAME_LEN {
            return Err(TransferError::NameTooLong {
                path: path.to_path_buf(),
            });
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(OUTPUT_FILE_MODE)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| TransferError::OpenOutput {
                path: path.to_path_buf(),
                source,
            })
    }

    fn close(file: impl IntoRawFd, path: &Path) -> Result<(), TransferError> {
        close_fd(file).map_err(|source| TransferError::Io {
            stage: IoStage::Close,
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn run(&mut self, id: WorkerId) -> Result<TransferState, TransferError> {
        let input_path = self.input_path(id);
        let output_path = self.output_path(id);
        let mut input = Self::open_input(&input_path)?;
        let mut output = Self::open_output(&output_path)?;
        debug!(
            worker = %id,
            input = %input_path.display(),
            output = %output_path.display(),
            "transfer started"
        );

        let state = copy_blocks(
            &mut input,
            &mut output,
            &mut self.buffer,
            self.config.transfer_size,
            &input_path,
            &output_path,
        )?;

        Self::close(output, &output_path)?;
        Self::close(input, &input_path)?;

        info!(
            worker = %id,
            bytes_read = state.bytes_read,
            reads = state.read_count,
            bytes_written = state.bytes_written,
            writes = state.write_count,
            passes = state.input_passes(),
            block_size = self.config.block_size,
            "transfer complete"
        );
        Ok(state)
    }
}
