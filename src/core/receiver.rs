//! Receiver state machine.
//!
//! Lives inside the frame. It learns the trusted host origin from its URL
//! fragment, waits for INIT on the window, keeps the dedicated endpoint that
//! came with it and rebuilds the file from the chunk messages. Once the file
//! is complete, a [`SubmitHandler`] packages it with the surrounding form and
//! hands it to the frame's own backend.
//!
//! Error policy: failures detected while a session exists are reported to
//! the host surface and forwarded to the sender as an `error` message.
//! Failures before that (bad handshake, stray chunk, timeout) stay local.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::core::config::{API_VERSION, RECEIVER_HANDSHAKE_TIMEOUT};
use crate::core::connection::{FrameInbox, MessageEvent, ReceiverPort};
use crate::core::error::{ErrorKind, Layer, Result, TransferError};
use crate::core::host::{FormTarget, HostCommand, HostSurface};
use crate::core::pipeline::chunk::decode_value;
use crate::core::pipeline::FileAssembler;
use crate::core::protocol::origin::{accept, derive_origin, skip_timeout_check};
use crate::core::protocol::{FileChunk, InboundKind, ReceiverMessage, SenderMessage, TransferMetadata};
use crate::core::session::{ProgressReport, ReceiverSession};
use crate::core::submit::{FileFieldBinding, FormValue, MultipartPayload, SubmitRequest, SubmitRoutine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOptions {
    /// `None` waits for INIT forever (debug only).
    pub handshake_timeout: Option<Duration>,
    pub file_field: FileFieldBinding,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(RECEIVER_HANDSHAKE_TIMEOUT),
            file_field: FileFieldBinding::default(),
        }
    }
}

/// How [`Receiver::run`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverOutcome {
    /// The backend accepted the file; its response was echoed to the sender.
    Uploaded(Value),
    /// The host surface cancelled and the sender was told.
    Cancelled,
    /// The frame was detached.
    Closed,
}

enum Incoming {
    Window(Option<MessageEvent>),
    Port(Option<SenderMessage>),
    Command(Option<HostCommand>),
}

pub struct Receiver<H: HostSurface, S: SubmitRoutine> {
    expected_origin: String,
    options: ReceiverOptions,
    host: H,
    submit: S,
    session: ReceiverSession,
    port: Option<ReceiverPort>,
    closed: bool,
}

impl<H: HostSurface, S: SubmitRoutine> Receiver<H, S> {
    pub fn new(expected_origin: impl Into<String>, options: ReceiverOptions, host: H, submit: S) -> Self {
        Self {
            expected_origin: expected_origin.into(),
            options,
            host,
            submit,
            session: ReceiverSession::Uninitialized,
            port: None,
            closed: false,
        }
    }

    /// Build a receiver from the frame's own URL fragment.
    ///
    /// Fails with `OriginMissing` (also reported to `host`) when the fragment
    /// names no host origin. `skipTimeoutCheck=true` disables the handshake timer.
    pub fn from_fragment(fragment: &str, mut host: H, submit: S) -> Result<Self> {
        let origin = match derive_origin(fragment) {
            Ok(origin) => origin,
            Err(e) => {
                error!(event = "origin_missing", fragment, "Frame URL carries no host origin");
                host.error(&e);
                return Err(e);
            }
        };

        let mut options = ReceiverOptions::default();
        if skip_timeout_check(fragment) {
            warn!(event = "handshake_timeout_disabled", "skipTimeoutCheck is set, waiting for INIT without a deadline");
            options.handshake_timeout = None;
        }
        Ok(Self::new(origin, options, host, submit))
    }

    pub fn expected_origin(&self) -> &str {
        &self.expected_origin
    }

    pub fn session(&self) -> &ReceiverSession {
        &self.session
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    // ── Handshake ────────────────────────────────────────────────────────────

    /// Wait for the sender's INIT on the window.
    ///
    /// Resolves with the outcome of the first accepted protocol message; a
    /// missing INIT within the handshake window fails with `HandshakeTimeout`.
    pub async fn connect(&mut self, inbox: &mut FrameInbox) -> Result<()> {
        let limit = match self.options.handshake_timeout {
            Some(limit) => limit,
            None => return self.await_init(inbox).await,
        };

        match tokio::time::timeout(limit, self.await_init(inbox)).await {
            Ok(result) => result,
            Err(_) => {
                let err = TransferError::receiver(
                    ErrorKind::HandshakeTimeout,
                    format!(
                        "connection to the host was not established within {}ms, verify that the \
                         data-orbit-origin fragment is correct (current value: \"{}\")",
                        limit.as_millis(),
                        self.expected_origin
                    ),
                );
                self.fail_with(None, err)
            }
        }
    }

    async fn await_init(&mut self, inbox: &mut FrameInbox) -> Result<()> {
        loop {
            let Some(event) = inbox.recv().await else {
                return Err(TransferError::receiver(
                    ErrorKind::ChannelClosed,
                    "frame window closed before INIT arrived",
                ));
            };
            let Some(kind) = accept(&event, &self.expected_origin) else {
                continue;
            };
            return self.dispatch(kind, event.data, event.ports);
        }
    }

    // ── Message handling ─────────────────────────────────────────────────────

    /// Entry point for every window event; foreign or unknown traffic is dropped.
    pub fn handle_window_message(&mut self, event: MessageEvent) -> Result<()> {
        if self.closed {
            debug!(event = "receiver_closed", "Ignoring window message after close");
            return Ok(());
        }
        match accept(&event, &self.expected_origin) {
            Some(kind) => self.dispatch(kind, event.data, event.ports),
            None => Ok(()),
        }
    }

    /// Entry point for traffic on the dedicated channel.
    pub fn handle_port_message(&mut self, msg: SenderMessage) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        match msg {
            SenderMessage::FileChunk(chunk) => self.on_chunk(chunk),
        }
    }

    fn dispatch(&mut self, kind: InboundKind, data: Value, ports: Vec<ReceiverPort>) -> Result<()> {
        debug!(event = "protocol_message", name = kind.event_name(), "Received protocol message");
        match kind {
            InboundKind::Init => self.on_init(data, ports),
            InboundKind::FileChunk => match serde_json::from_value::<FileChunk>(data) {
                Ok(chunk) => self.on_chunk(chunk),
                Err(e) => self.reject_chunk(e),
            },
        }
    }

    fn on_init(&mut self, data: Value, ports: Vec<ReceiverPort>) -> Result<()> {
        if !matches!(self.session, ReceiverSession::Uninitialized) {
            warn!(
                event = "duplicate_init",
                state = self.session.name(),
                "Ignoring INIT, this frame already has a session"
            );
            return Ok(());
        }

        // The version decides which shape the rest of the message has.
        let api_version = data.get("apiVersion").cloned().unwrap_or(Value::Null);
        if api_version.as_i64() != Some(API_VERSION) {
            return self.fail_with(
                None,
                TransferError::receiver(
                    ErrorKind::UnsupportedApiVersion,
                    format!("only apiVersion {API_VERSION} is supported, got {api_version}"),
                ),
            );
        }

        let metadata = match serde_json::from_value::<TransferMetadata>(data) {
            Ok(metadata) => metadata,
            Err(e) => {
                return self.fail_with(
                    None,
                    TransferError::receiver(
                        ErrorKind::MalformedMessage,
                        format!("INIT does not match apiVersion {API_VERSION}: {e}"),
                    ),
                )
            }
        };

        let Some(port) = ports.into_iter().next() else {
            return self.fail_with(
                None,
                TransferError::receiver(ErrorKind::MissingPort, "INIT message carries no channel endpoint"),
            );
        };

        info!(
            event = "handshake_accepted",
            orbit_file_id = %metadata.orbit_file_id,
            file = %metadata.file_name,
            size = metadata.size,
            encoding = %metadata.encoding,
            "Connection to host established"
        );
        self.session = ReceiverSession::Initialized {
            metadata: metadata.clone(),
        };
        if let Err(e) = port.post(ReceiverMessage::Initialized) {
            self.port = Some(port);
            return self.fail_with(Some(metadata), e.surfaced_by(Layer::Receiver));
        }
        self.port = Some(port);
        self.host.show_metadata(&metadata);
        Ok(())
    }

    fn on_chunk(&mut self, chunk: FileChunk) -> Result<()> {
        let (metadata, mut assembler) = match std::mem::take(&mut self.session) {
            ReceiverSession::Initialized { metadata } => (metadata, FileAssembler::new()),
            ReceiverSession::Receiving { metadata, assembler } => (metadata, assembler),
            ReceiverSession::Uninitialized => {
                return self.fail_with(
                    None,
                    TransferError::receiver(
                        ErrorKind::UninitializedTransfer,
                        format!("chunk {} arrived before INIT, the handshake was probably missed", chunk.idx),
                    ),
                );
            }
            finished => {
                warn!(event = "chunk_after_end", idx = chunk.idx, state = finished.name(), "Ignoring chunk");
                self.session = finished;
                return Ok(());
            }
        };

        let slice = match decode_value(chunk.value, metadata.encoding) {
            Ok(slice) => slice,
            Err(e) => return self.fail_with(Some(metadata), e),
        };
        let chunk_len = assembler.push(chunk.idx, slice);
        if let Err(e) = assembler.check_overrun(&metadata) {
            return self.fail_with(Some(metadata), e);
        }
        let report = ProgressReport {
            bytes_received: assembler.bytes_received(),
            total_size: metadata.size,
            chunk_len,
        };
        debug!(
            event = "chunk_received",
            idx = chunk.idx,
            bytes = chunk_len,
            received = report.bytes_received,
            total = report.total_size,
            done = chunk.done
        );
        self.host.progress(&report);

        if !chunk.done {
            self.session = ReceiverSession::Receiving { metadata, assembler };
            return Ok(());
        }

        let file = match assembler.finish(&metadata) {
            Ok(file) => file,
            Err(e) => return self.fail_with(Some(metadata), e),
        };
        info!(
            event = "transfer_complete",
            orbit_file_id = %metadata.orbit_file_id,
            bytes = file.len(),
            "File transfer complete"
        );
        self.session = ReceiverSession::Completed { metadata, file };
        if let ReceiverSession::Completed { file, .. } = &self.session {
            self.host.completed(file);
            if file.is_image() {
                self.host.preview_image(&file.to_data_url());
            }
        }
        Ok(())
    }

    /// A chunk message whose body cannot be read.
    fn reject_chunk(&mut self, e: serde_json::Error) -> Result<()> {
        if self.session.is_terminal() {
            warn!(event = "chunk_after_end", state = self.session.name(), "Ignoring malformed chunk");
            return Ok(());
        }
        let metadata = self.session.metadata().cloned();
        self.fail_with(
            metadata,
            TransferError::receiver(ErrorKind::MalformedMessage, format!("malformed chunk message: {e}")),
        )
    }

    /// Report `cause` to the host and, when a session with a channel
    /// exists, forward it to the sender. Always returns `Err(cause)`.
    fn fail_with(&mut self, metadata: Option<TransferMetadata>, cause: TransferError) -> Result<()> {
        error!(event = "receiver_error", kind = ?cause.kind(), error = %cause, "Transfer failed");
        self.host.error(&cause);

        match (&metadata, &self.port) {
            (Some(_), Some(port)) => {
                let forwarded = port.post(ReceiverMessage::Error {
                    error: Some(cause.to_string()),
                });
                if forwarded.is_err() {
                    warn!(event = "error_not_forwarded", "Sender endpoint is gone");
                }
            }
            _ => debug!(event = "error_kept_local", kind = ?cause.kind(), "Error not forwarded to the sender"),
        }

        if metadata.is_some() {
            self.session = ReceiverSession::Errored {
                metadata,
                cause: cause.clone(),
            };
        }
        Err(cause)
    }

    // ── Host triggers ────────────────────────────────────────────────────────

    /// Ask the sender to stop. `false` when there is no session to cancel.
    pub fn cancel(&self) -> bool {
        match (self.session.metadata(), &self.port) {
            (Some(metadata), Some(port)) => {
                info!(event = "cancel_requested", orbit_file_id = %metadata.orbit_file_id, "Cancelling transfer");
                if port.post(ReceiverMessage::Cancel).is_err() {
                    warn!(event = "cancel_not_delivered", "Sender endpoint is gone");
                }
                true
            }
            _ => {
                debug!(event = "cancel_without_session", "Nothing to cancel");
                false
            }
        }
    }

    /// Detach: stop listening and release the session and its endpoint.
    pub fn close(&mut self) {
        info!(event = "receiver_closed", state = self.session.name(), "Releasing frame session");
        self.closed = true;
        self.port = None;
        self.session = ReceiverSession::Uninitialized;
    }

    /// Drop the dedicated endpoint but keep the session for inspection.
    /// A sender still waiting on the channel sees it close.
    pub fn release_channel(&mut self) {
        if self.port.take().is_some() {
            debug!(event = "channel_released", state = self.session.name());
        }
    }

    pub fn create_submit_handler(&mut self, binding: FileFieldBinding) -> SubmitHandler<'_, H, S> {
        SubmitHandler {
            receiver: self,
            binding,
        }
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    /// Connect, then process window traffic, channel traffic and host
    /// commands until the file is uploaded, the transfer is cancelled or the
    /// frame goes away. Every surfaced error ends the loop.
    pub async fn run(
        &mut self,
        inbox: &mut FrameInbox,
        commands: &mut UnboundedReceiver<HostCommand>,
    ) -> Result<ReceiverOutcome> {
        self.connect(inbox).await?;

        let mut commands_open = true;
        loop {
            let incoming = tokio::select! {
                event = inbox.recv() => Incoming::Window(event),
                msg = recv_port(&mut self.port) => Incoming::Port(msg),
                cmd = commands.recv(), if commands_open => Incoming::Command(cmd),
            };

            match incoming {
                Incoming::Window(Some(event)) => self.handle_window_message(event)?,
                Incoming::Window(None) => {
                    self.close();
                    return Ok(ReceiverOutcome::Closed);
                }
                Incoming::Port(Some(msg)) => self.handle_port_message(msg)?,
                Incoming::Port(None) => {
                    let metadata = self.session.metadata().cloned();
                    self.port = None;
                    return self
                        .fail_with(
                            metadata,
                            TransferError::receiver(ErrorKind::ChannelClosed, "sender closed the channel"),
                        )
                        .map(|_| ReceiverOutcome::Closed);
                }
                Incoming::Command(Some(HostCommand::Submit(target))) => {
                    let binding = self.options.file_field.clone();
                    let payload = self.create_submit_handler(binding).submit(&target).await?;
                    return Ok(ReceiverOutcome::Uploaded(payload));
                }
                Incoming::Command(Some(HostCommand::Cancel)) => {
                    if self.cancel() {
                        return Ok(ReceiverOutcome::Cancelled);
                    }
                }
                Incoming::Command(None) => commands_open = false,
            }
        }
    }
}

/// Next message on the dedicated channel; pending forever without one.
async fn recv_port(port: &mut Option<ReceiverPort>) -> Option<SenderMessage> {
    match port {
        Some(port) => port.recv().await,
        None => std::future::pending().await,
    }
}

// ── Submission ───────────────────────────────────────────────────────────────

/// Adapter invoked when the receiving form is submitted.
pub struct SubmitHandler<'a, H: HostSurface, S: SubmitRoutine> {
    receiver: &'a mut Receiver<H, S>,
    binding: FileFieldBinding,
}

impl<H: HostSurface, S: SubmitRoutine> SubmitHandler<'_, H, S> {
    /// Submit the completed file and the surrounding form to `target`.
    ///
    /// On success the backend result is echoed to the sender as
    /// `file-uploaded`. A failing backend call is reported to the host
    /// surface only; the sender is not told.
    pub async fn submit(&mut self, target: &FormTarget) -> Result<Value> {
        let receiver = &mut *self.receiver;

        let (metadata, file) = match &receiver.session {
            ReceiverSession::Completed { metadata, file } => (metadata.clone(), file.clone()),
            other => {
                let err = TransferError::receiver(
                    ErrorKind::InvalidSubmission,
                    format!("nothing to submit, the transfer is {}", other.name()),
                );
                return receiver.fail_with(None, err).map(|_| Value::Null);
            }
        };

        let field = self.binding.name.trim();
        if field.is_empty() {
            let err = TransferError::receiver(
                ErrorKind::InvalidSubmission,
                "the file field must have a name, e.g. \"file\"",
            );
            return receiver.fail_with(None, err).map(|_| Value::Null);
        }

        let mut payload = MultipartPayload::from_fields(receiver.host.form_fields());
        payload.set(field, FormValue::from(&file));
        let request = SubmitRequest {
            url: target.action.clone(),
            method: target.method.clone(),
            payload,
            entity_data: metadata.entity_data.clone(),
        };
        info!(
            event = "submit_started",
            url = %request.url,
            method = %request.method,
            field,
            bytes = file.len(),
            "Submitting file"
        );

        match receiver.submit.submit(request).await {
            Ok(result) => {
                info!(event = "submit_complete", orbit_file_id = %metadata.orbit_file_id, "Backend accepted the file");
                if let Some(port) = &receiver.port {
                    if port
                        .post(ReceiverMessage::FileUploaded {
                            payload: result.clone(),
                        })
                        .is_err()
                    {
                        warn!(event = "upload_not_reported", "Sender endpoint is gone");
                    }
                }
                Ok(result)
            }
            Err(e) => {
                let err = TransferError::receiver(ErrorKind::SubmitFailed, format!("submit failed: {e:#}"));
                error!(event = "submit_failed", error = %err, "Backend rejected the file");
                receiver.host.error(&err);
                Err(err)
            }
        }
    }
}
