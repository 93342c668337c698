//! Session state of both sides of a transfer.
//!
//! Each state machine owns exactly one of these and moves it forward as
//! messages arrive. There is one session per transfer; a new attempt needs
//! a new sender or receiver.

use serde_json::Value;

use crate::core::error::TransferError;
use crate::core::pipeline::{AssembledFile, FileAssembler};
use crate::core::protocol::TransferMetadata;

// ── Sender ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SenderState {
    /// Not triggered yet.
    Idle,
    /// INIT posted, waiting for `initialized`.
    AwaitingHandshake,
    /// Handshake done, chunks are flowing.
    Streaming,
    /// The receiver reported a successful upload.
    Completed { payload: Value },
    /// The receiver cancelled.
    Cancelled,
    Failed { cause: TransferError },
}

impl SenderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SenderState::Completed { .. } | SenderState::Cancelled | SenderState::Failed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SenderState::Idle => "idle",
            SenderState::AwaitingHandshake => "awaiting_handshake",
            SenderState::Streaming => "streaming",
            SenderState::Completed { .. } => "completed",
            SenderState::Cancelled => "cancelled",
            SenderState::Failed { .. } => "failed",
        }
    }
}

// ── Receiver ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub enum ReceiverSession {
    #[default]
    Uninitialized,
    /// Handshake accepted, no chunk yet.
    Initialized { metadata: TransferMetadata },
    Receiving {
        metadata: TransferMetadata,
        assembler: FileAssembler,
    },
    Completed {
        metadata: TransferMetadata,
        file: AssembledFile,
    },
    /// `metadata` is `None` when the failure happened before any handshake.
    Errored {
        metadata: Option<TransferMetadata>,
        cause: TransferError,
    },
}

impl ReceiverSession {
    /// Metadata of the accepted handshake, if any.
    pub fn metadata(&self) -> Option<&TransferMetadata> {
        match self {
            ReceiverSession::Uninitialized => None,
            ReceiverSession::Initialized { metadata }
            | ReceiverSession::Receiving { metadata, .. }
            | ReceiverSession::Completed { metadata, .. } => Some(metadata),
            ReceiverSession::Errored { metadata, .. } => metadata.as_ref(),
        }
    }

    /// The reassembled file once the transfer completed.
    pub fn file(&self) -> Option<&AssembledFile> {
        match self {
            ReceiverSession::Completed { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        match self {
            ReceiverSession::Receiving { assembler, .. } => assembler.bytes_received(),
            ReceiverSession::Completed { file, .. } => file.len() as u64,
            _ => 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ReceiverSession::Completed { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReceiverSession::Completed { .. } | ReceiverSession::Errored { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReceiverSession::Uninitialized => "uninitialized",
            ReceiverSession::Initialized { .. } => "initialized",
            ReceiverSession::Receiving { .. } => "receiving",
            ReceiverSession::Completed { .. } => "completed",
            ReceiverSession::Errored { .. } => "errored",
        }
    }
}

// ── Progress ─────────────────────────────────────────────────────────────────

/// Reported to the host surface after every accepted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub bytes_received: u64,
    pub total_size: u64,
    /// Decoded length of the chunk just appended.
    pub chunk_len: usize,
}

impl ProgressReport {
    /// Percentage in `0.0..=100.0`. An empty file counts as complete.
    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        (self.bytes_received as f64 / self.total_size as f64 * 100.0).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn sender_terminal_states() {
        assert!(!SenderState::Idle.is_terminal());
        assert!(!SenderState::Streaming.is_terminal());
        assert!(SenderState::Cancelled.is_terminal());
        assert!(SenderState::Failed {
            cause: TransferError::sender(ErrorKind::HandshakeTimeout, "t")
        }
        .is_terminal());
    }

    #[test]
    fn uninitialized_session_has_no_metadata() {
        let session = ReceiverSession::default();
        assert!(session.metadata().is_none());
        assert_eq!(session.name(), "uninitialized");
        assert_eq!(session.bytes_received(), 0);
    }

    #[test]
    fn progress_percent() {
        let half = ProgressReport {
            bytes_received: 512,
            total_size: 1024,
            chunk_len: 512,
        };
        assert_eq!(half.percent(), 50.0);
        let empty = ProgressReport {
            bytes_received: 0,
            total_size: 0,
            chunk_len: 0,
        };
        assert_eq!(empty.percent(), 100.0);
    }
}
