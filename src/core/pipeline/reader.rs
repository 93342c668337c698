//! Chunk reader: a lazy, one-shot sequence of encoded file slices.
//!
//! The reader walks the file in consecutive, non-overlapping windows of
//! `chunk_size` bytes. Because it knows the declared size, it flags the
//! final slice itself (`done = true`) instead of leaving the caller to infer
//! completion from exhaustion. A spent reader only ever yields `None`; each
//! transfer attempt opens a fresh one through [`FileHandle::read_stream`].

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use super::chunk::encode_slice;
use crate::core::error::{ErrorKind, Result, TransferError};
use crate::core::protocol::{ChunkValue, Encoding, FileChunk};

// ── File handle ───────────────────────────────────────────────────────────────

enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A locally selected file: its metadata plus a way to read it.
pub struct FileHandle {
    pub name: String,
    pub mime_type: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub size: u64,
    source: FileSource,
}

impl FileHandle {
    /// Stat a file on disk. The MIME type is guessed from the extension
    /// (empty when unknown).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            TransferError::reader(ErrorKind::ReadError, format!("cannot stat {}: {e}", path.display()))
        })?;
        if !meta.is_file() {
            return Err(TransferError::reader(
                ErrorKind::ReadError,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mime_type: mime_guess::from_path(path)
                .first()
                .map(|m| m.essence_str().to_string())
                .unwrap_or_default(),
            last_modified,
            size: meta.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// An in-memory file, e.g. one produced by the host surface.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        last_modified: i64,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            last_modified,
            size: data.len() as u64,
            source: FileSource::Memory(data),
        }
    }

    /// Open a fresh chunk reader over the whole file.
    pub async fn read_stream(&self, encoding: Encoding, chunk_size: usize) -> Result<ChunkReader> {
        let source: Box<dyn AsyncRead + Send + Unpin> = match &self.source {
            FileSource::Path(path) => Box::new(tokio::fs::File::open(path).await.map_err(|e| {
                TransferError::reader(ErrorKind::ReadError, format!("cannot open {}: {e}", path.display()))
            })?),
            FileSource::Memory(data) => Box::new(Cursor::new(data.clone())),
        };
        Ok(ChunkReader::new(source, self.size, encoding, chunk_size))
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// One slice produced by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    pub idx: u64,
    pub value: ChunkValue,
    /// Raw (pre-encoding) length of the slice.
    pub byte_len: usize,
    /// Set on the final slice only.
    pub done: bool,
}

impl From<ReadChunk> for FileChunk {
    fn from(chunk: ReadChunk) -> Self {
        FileChunk {
            idx: chunk.idx,
            value: chunk.value,
            done: chunk.done,
        }
    }
}

pub struct ChunkReader {
    source: Box<dyn AsyncRead + Send + Unpin>,
    size: u64,
    bytes_read: u64,
    chunk_size: usize,
    encoding: Encoding,
    next_idx: u64,
    finished: bool,
}

impl ChunkReader {
    /// Read `size` bytes from `source` in windows of `chunk_size` (at least 1).
    pub fn new(
        source: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
        encoding: Encoding,
        chunk_size: usize,
    ) -> Self {
        Self {
            source,
            size,
            bytes_read: 0,
            chunk_size: chunk_size.max(1),
            encoding,
            next_idx: 0,
            finished: false,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Produce the next slice, or `None` once the final slice was handed out.
    ///
    /// A zero-byte file yields exactly one empty slice flagged `done`.
    pub async fn next_chunk(&mut self) -> Result<Option<ReadChunk>> {
        if self.finished {
            return Ok(None);
        }

        let remaining = self.size - self.bytes_read;
        let len = (self.chunk_size as u64).min(remaining) as usize;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.source.read(&mut buf[filled..]).await.map_err(|e| {
                self.finished = true;
                TransferError::reader(
                    ErrorKind::ReadError,
                    format!("read failed at offset {}: {e}", self.bytes_read + filled as u64),
                )
            })?;
            if n == 0 {
                self.finished = true;
                warn!(
                    event = "read_step_empty",
                    offset = self.bytes_read + filled as u64,
                    declared = self.size,
                    "Read step yielded no data before the declared size was reached"
                );
                return Err(TransferError::reader(
                    ErrorKind::ReadError,
                    format!(
                        "read step yielded no data at offset {} of {}",
                        self.bytes_read + filled as u64,
                        self.size
                    ),
                ));
            }
            filled += n;
        }

        self.bytes_read += len as u64;
        let done = self.bytes_read == self.size;
        self.finished = done;

        let idx = self.next_idx;
        self.next_idx += 1;
        debug!(event = "chunk_read", idx, bytes = len, done, "Read file slice");

        Ok(Some(ReadChunk {
            idx,
            value: encode_slice(buf, self.encoding),
            byte_len: len,
            done,
        }))
    }
}
