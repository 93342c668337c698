//! `framedrop send`: run a loopback transfer from the terminal.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use framedrop::core::config::ORBIT_FILE_ID_FIELD;
use framedrop::core::engine::LoopbackTransfer;
use framedrop::core::host::{FormTarget, HostCommand, HostSurface, SenderEvents};
use framedrop::core::pipeline::{AssembledFile, FileHandle};
use framedrop::core::protocol::origin::{fragment_of, frame_url};
use framedrop::core::protocol::{EntityData, TransferMetadata};
use framedrop::core::receiver::{Receiver, ReceiverOutcome};
use framedrop::core::sender::Sender;
use framedrop::core::session::ProgressReport;
use framedrop::core::submit::FormField;
use framedrop::TransferError;

use super::args::SendSettings;
use super::backend::LocalBackend;

// ── Sending side ─────────────────────────────────────────────────────────────

/// Logs the sender's callbacks.
#[derive(Default)]
struct ConsoleSender {
    last_percent: u64,
}

impl SenderEvents for ConsoleSender {
    fn on_chunk_sent(&mut self, idx: u64, bytes_sent: u64, total: u64) {
        let percent = if total == 0 { 100 } else { bytes_sent * 100 / total };
        if percent / 10 != self.last_percent / 10 || percent == 100 {
            info!(event = "send_progress", idx, bytes_sent, total, percent, "Sending");
        }
        self.last_percent = percent;
    }

    fn on_complete(&mut self, payload: &Value) {
        info!(event = "send_complete", %payload, "Frame confirmed the upload");
    }

    fn on_cancel(&mut self) {
        warn!(event = "send_cancelled", "Frame cancelled the transfer");
    }

    fn on_error(&mut self, error: &TransferError) {
        error!(event = "send_failed", %error, "Transfer failed");
    }
}

// ── Receiving side ───────────────────────────────────────────────────────────

/// Frame-side surface: a form populated from the entity data that submits
/// itself as soon as the file is complete.
struct AutoSubmitForm {
    commands: UnboundedSender<HostCommand>,
    target: FormTarget,
    fields: Vec<FormField>,
}

impl HostSurface for AutoSubmitForm {
    fn show_metadata(&mut self, metadata: &TransferMetadata) {
        info!(
            event = "frame_metadata",
            file = %metadata.file_name,
            mime = %metadata.mime_type,
            size = metadata.size,
            entity_keys = metadata.entity_data.len(),
            "Frame received transfer metadata"
        );
        self.fields = vec![FormField::text(ORBIT_FILE_ID_FIELD, metadata.orbit_file_id.clone())];
        for (key, _) in metadata.entity_data.iter() {
            if let Some(value) = metadata.entity_data.field_value(key) {
                self.fields.push(FormField::text(key.clone(), value));
            }
        }
    }

    fn form_fields(&self) -> Vec<FormField> {
        self.fields.clone()
    }

    fn progress(&mut self, report: &ProgressReport) {
        debug!(event = "frame_progress", percent = report.percent(), chunk = report.chunk_len);
    }

    fn preview_image(&mut self, data_url: &str) {
        info!(event = "frame_preview", length = data_url.len(), "Image preview ready");
    }

    fn completed(&mut self, file: &AssembledFile) {
        info!(event = "frame_file_ready", file = %file.name, bytes = file.len(), "Submitting form");
        if self.commands.send(HostCommand::Submit(self.target.clone())).is_err() {
            warn!(event = "submit_not_triggered", "Receiver loop is gone");
        }
    }

    fn error(&mut self, error: &TransferError) {
        error!(event = "frame_error", %error, "Frame reported an error");
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

pub async fn run(settings: SendSettings) -> Result<()> {
    let file = FileHandle::open(&settings.file)
        .await
        .with_context(|| format!("opening {}", settings.file.display()))?;
    let entity_data = match &settings.entity_data {
        Some(json) => EntityData::parse(json).context("--entity-data must be a JSON object")?,
        None => EntityData::default(),
    };
    let orbit_file_id = settings
        .orbit_file_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let address = frame_url(&settings.frame_url, &settings.parent_origin);
    info!(event = "frame_address", %address, "Embedding frame");

    let (commands_tx, commands_rx) = unbounded_channel();
    let surface = AutoSubmitForm {
        commands: commands_tx.clone(),
        target: FormTarget::post(address.clone()),
        fields: Vec::new(),
    };
    let receiver = Receiver::from_fragment(
        fragment_of(&address),
        surface,
        LocalBackend::new(settings.out_dir.clone()),
    )?;
    let sender = Sender::new(file, orbit_file_id, entity_data, settings.options, ConsoleSender::default());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = commands_tx.send(HostCommand::Cancel);
        }
    });

    let mut transfer = LoopbackTransfer::new(sender, receiver, &settings.parent_origin, commands_rx);
    let report = transfer.run().await;

    match (&report.sender, &report.receiver) {
        (Ok(()), Ok(ReceiverOutcome::Uploaded(payload))) => {
            println!("{payload}");
            Ok(())
        }
        (_, Ok(ReceiverOutcome::Cancelled)) => bail!("transfer cancelled"),
        (_, Ok(ReceiverOutcome::Closed)) => bail!("frame detached before the upload finished"),
        (Err(e), _) => Err(e.clone().into()),
        (_, Err(e)) => Err(e.clone().into()),
    }
}
