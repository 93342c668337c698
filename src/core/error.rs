//! Transfer error type.
//!
//! Every failure is a [`TransferError`]: a tagged [`ErrorKind`], the
//! [`Layer`] that detected it, and a human-readable message. The display
//! form (`[framedrop:receiver] ...`) is also what travels to the sender in
//! an `error` message.

use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Result alias used throughout the protocol core.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The frame URL fragment carries no partner origin.
    OriginMissing,
    /// No handshake completed within the allotted window.
    HandshakeTimeout,
    /// INIT announced an `apiVersion` other than 1.
    UnsupportedApiVersion,
    /// INIT arrived without a dedicated channel endpoint.
    MissingPort,
    /// A chunk arrived before any INIT was accepted.
    UninitializedTransfer,
    /// Reassembled length differs from the declared size.
    SizeMismatch,
    /// The caller-supplied submit routine failed.
    SubmitFailed,
    /// Reading a slice of the local file failed.
    ReadError,
    /// The submit adapter was invoked without a completed transfer or field name.
    InvalidSubmission,
    /// A message could not be encoded, or a chunk does not decode with the
    /// agreed encoding.
    MalformedMessage,
    /// The partner endpoint has gone away.
    ChannelClosed,
    /// The receiver reported an error over the dedicated channel.
    RemoteError,
}

/// Part of the system that raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Sender,
    Receiver,
    Transport,
    Reader,
}

impl Display for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Sender => f.write_str("framedrop:sender"),
            Layer::Receiver => f.write_str("framedrop:receiver"),
            Layer::Transport => f.write_str("framedrop:transport"),
            Layer::Reader => f.write_str("framedrop:reader"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{layer}] {message}")]
pub struct TransferError {
    kind: ErrorKind,
    layer: Layer,
    message: String,
}

impl TransferError {
    pub fn new(kind: ErrorKind, layer: Layer, message: impl Into<String>) -> Self {
        Self {
            kind,
            layer,
            message: message.into(),
        }
    }

    pub fn sender(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, Layer::Sender, message)
    }

    pub fn receiver(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, Layer::Receiver, message)
    }

    pub fn transport(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, Layer::Transport, message)
    }

    pub fn reader(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, Layer::Reader, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Re-tag an error for the layer that surfaces it, keeping kind and message.
    pub fn surfaced_by(self, layer: Layer) -> Self {
        Self { layer, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_layer_prefix() {
        let err = TransferError::receiver(ErrorKind::SizeMismatch, "expected 10, got 5");
        assert_eq!(err.to_string(), "[framedrop:receiver] expected 10, got 5");
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(err.layer(), Layer::Receiver);
    }

    #[test]
    fn surfaced_by_keeps_kind() {
        let err = TransferError::transport(ErrorKind::ChannelClosed, "port dropped")
            .surfaced_by(Layer::Sender);
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
        assert_eq!(err.layer(), Layer::Sender);
        assert_eq!(err.message(), "port dropped");
    }
}
