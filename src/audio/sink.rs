//! # Audio Sink
//!
//! The file one `/ws/audio` connection writes its raw audio into.
//!
//! ## Guarantees:
//! - **Exclusive**: the file is created with `create_new`, so no two connections
//!   ever share a sink, and nothing else writes to it while it's open.
//! - **Durable per chunk**: every append is flushed (and by default `sync_data`'d)
//!   before it returns, so a crash loses at most the chunk being written.
//! - **Closed once**: `close` consumes the sink; the type system rules out a
//!   second close or a write after close.
//! - **Bounded**: with a size limit set, a chunk that would cross it is rejected
//!   whole and the file keeps everything written before it.
//!
//! All calls block on the filesystem. The streaming actor runs them on the
//! blocking thread pool, never on its own thread.
//!
//! ## File naming:
//! `stream_{session_id}_{unix_timestamp}.{ext}`. A second connection for the same
//! session within the same second gets `stream_{session_id}_{unix_timestamp}_{n}.{ext}`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Upper bound on same-second name collisions we try to resolve.
const MAX_NAME_ATTEMPTS: u32 = 100;

pub struct AudioSink {
    file: File,
    path: PathBuf,
    bytes_written: u64,
    sync_each_chunk: bool,
    max_bytes: Option<u64>,
}

impl AudioSink {
    /// Create a fresh capture file for `session_id` inside `dir`.
    pub fn create(
        dir: &Path,
        session_id: &str,
        timestamp: i64,
        extension: &str,
        sync_each_chunk: bool,
    ) -> io::Result<Self> {
        let stem = format!("stream_{}_{}", sanitize_session_id(session_id), timestamp);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = if attempt == 0 {
                format!("{}.{}", stem, extension)
            } else {
                format!("{}_{}.{}", stem, attempt, extension)
            };
            let path = dir.join(file_name);

            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        file,
                        path,
                        bytes_written: 0,
                        sync_each_chunk,
                        max_bytes: None,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free capture file name for {}", stem),
        ))
    }

    /// Refuse appends that would grow the file past `max_bytes`.
    pub fn with_size_limit(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Append one chunk and make it durable before returning.
    pub fn append(&mut self, chunk: &[u8]) -> io::Result<()> {
        if let Some(limit) = self.max_bytes {
            if self.bytes_written + chunk.len() as u64 > limit {
                return Err(io::Error::other(format!(
                    "capture file would exceed {} bytes",
                    limit
                )));
            }
        }
        self.file.write_all(chunk)?;
        self.file.flush()?;
        if self.sync_each_chunk {
            self.file.sync_data()?;
        }
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Sync everything to disk and release the file handle.
    pub fn close(self) -> io::Result<u64> {
        self.file.sync_all()?;
        Ok(self.bytes_written)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Keep only characters that are safe in a file name; everything else becomes `_`.
pub fn sanitize_session_id(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned
    }
}
