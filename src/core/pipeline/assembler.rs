//! Receiver-side reassembly of decoded chunk slices.

use bytes::{Bytes, BytesMut};
use tracing::warn;

use super::chunk::data_url;
use crate::core::error::{ErrorKind, Result, TransferError};
use crate::core::protocol::TransferMetadata;

/// Accumulates decoded slices in arrival order.
#[derive(Debug, Default)]
pub struct FileAssembler {
    buffer: Vec<Bytes>,
    bytes_received: u64,
    next_idx: u64,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one slice and return its length.
    ///
    /// Slices are never reordered: `idx` is only compared against the
    /// expected value so that a gap shows up in the logs.
    pub fn push(&mut self, idx: u64, slice: Bytes) -> usize {
        if idx != self.next_idx {
            warn!(
                event = "chunk_index_gap",
                expected = self.next_idx,
                got = idx,
                "Chunk index out of sequence, appending in arrival order"
            );
        }
        // `idx` comes straight off the wire.
        self.next_idx = idx.wrapping_add(1);

        let len = slice.len();
        self.bytes_received += len as u64;
        if len > 0 {
            self.buffer.push(slice);
        }
        len
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn chunk_count(&self) -> u64 {
        self.next_idx
    }

    /// Fail as soon as more bytes arrived than the sender declared, instead
    /// of buffering until the final chunk.
    pub fn check_overrun(&self, metadata: &TransferMetadata) -> Result<()> {
        if self.bytes_received > metadata.size {
            return Err(TransferError::receiver(
                ErrorKind::SizeMismatch,
                format!(
                    "file size mismatch: expected {} bytes, already received {}",
                    metadata.size, self.bytes_received
                ),
            ));
        }
        Ok(())
    }

    /// Concatenate the slices into a file and check its length against the
    /// declared size. The length check is the only integrity verification.
    pub fn finish(self, metadata: &TransferMetadata) -> Result<AssembledFile> {
        if self.bytes_received != metadata.size {
            return Err(TransferError::receiver(
                ErrorKind::SizeMismatch,
                format!(
                    "file size mismatch: expected {} bytes, received {}",
                    metadata.size, self.bytes_received
                ),
            ));
        }

        let mut bytes = BytesMut::with_capacity(self.bytes_received as usize);
        for slice in self.buffer {
            bytes.extend_from_slice(&slice);
        }

        Ok(AssembledFile {
            name: metadata.file_name.clone(),
            mime_type: metadata.mime_type.clone(),
            last_modified: metadata.last_modified,
            bytes: bytes.freeze(),
        })
    }
}

/// The reconstructed file, named and typed after the INIT metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub name: String,
    pub mime_type: String,
    pub last_modified: i64,
    pub bytes: Bytes,
}

impl AssembledFile {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn to_data_url(&self) -> String {
        data_url(&self.mime_type, &self.bytes)
    }
}
