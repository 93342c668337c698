//! Capabilities injected by the embedding surfaces.
//!
//! The protocol core never renders anything. The sender reports through
//! [`SenderEvents`], the receiver through [`HostSurface`], and the receiving
//! side's UI drives submit/cancel by sending [`HostCommand`]s into the
//! receiver loop. Every callback has a no-op default.

use serde_json::Value;

use crate::core::error::TransferError;
use crate::core::pipeline::AssembledFile;
use crate::core::protocol::TransferMetadata;
use crate::core::session::ProgressReport;
use crate::core::submit::FormField;

/// Callbacks of the sending surface.
pub trait SenderEvents: Send {
    /// A chunk has been posted; `bytes_sent` counts raw file bytes.
    fn on_chunk_sent(&mut self, _idx: u64, _bytes_sent: u64, _total: u64) {}
    /// The receiver's backend accepted the file.
    fn on_complete(&mut self, _payload: &Value) {}
    fn on_cancel(&mut self) {}
    fn on_error(&mut self, _error: &TransferError) {}
}

/// Receiving surface: displayed metadata, form fields, progress, preview.
pub trait HostSurface: Send {
    /// The handshake was accepted; populate the UI from `metadata`.
    fn show_metadata(&mut self, _metadata: &TransferMetadata) {}
    /// Current values of the surrounding form, submitted alongside the file.
    fn form_fields(&self) -> Vec<FormField> {
        Vec::new()
    }
    fn progress(&mut self, _report: &ProgressReport) {}
    /// `data:` URL of a completed image file.
    fn preview_image(&mut self, _data_url: &str) {}
    fn completed(&mut self, _file: &AssembledFile) {}
    fn error(&mut self, _error: &TransferError) {}
}

/// Where the receiving form submits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormTarget {
    pub action: String,
    pub method: String,
}

impl FormTarget {
    pub fn post(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method: "POST".to_string(),
        }
    }
}

/// User intents of the receiving surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Submit(FormTarget),
    Cancel,
}
