//! Sender state machine.
//!
//! One [`Sender`] drives exactly one transfer: it opens the dedicated
//! channel, posts INIT into the frame window with the remote endpoint
//! attached, races the `initialized` reply against the handshake timer and
//! then streams the file as chunk messages until the final one is flagged
//! `done`. It finally waits for the receiver's terminal message.
//!
//! Cancellation is cooperative: inbound `cancel`/`error` messages are only
//! noticed between two chunk reads, never in the middle of one.

use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::core::config::{API_VERSION, DEFAULT_CHUNK_SIZE, DEFAULT_THROTTLE, SENDER_HANDSHAKE_TIMEOUT};
use crate::core::connection::{message_channel, ContentWindow, ReceiverPort, SenderPort};
use crate::core::error::{ErrorKind, Layer, Result, TransferError};
use crate::core::host::SenderEvents;
use crate::core::pipeline::FileHandle;
use crate::core::protocol::{EntityData, Encoding, InboundMessage, ReceiverMessage, SenderMessage, TransferMetadata};
use crate::core::session::SenderState;
use crate::utils::SettleCell;

/// Tunables of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub chunk_size: usize,
    /// Fixed delay after each chunk post. Zero disables throttling.
    pub throttle: Duration,
    pub encoding: Encoding,
    pub handshake_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            throttle: DEFAULT_THROTTLE,
            encoding: Encoding::default(),
            handshake_timeout: SENDER_HANDSHAKE_TIMEOUT,
        }
    }
}

pub struct Sender<E: SenderEvents> {
    file: FileHandle,
    orbit_file_id: String,
    entity_data: EntityData,
    options: TransferOptions,
    events: E,
    state: SenderState,
    /// Kept after the transfer ends so that late replies can still be observed.
    port: Option<SenderPort>,
    handshake: SettleCell<Result<()>>,
    /// Guards the terminal callbacks: at most one of them ever fires.
    terminal: SettleCell<()>,
    bytes_sent: u64,
    chunks_sent: u64,
}

impl<E: SenderEvents> Sender<E> {
    pub fn new(
        file: FileHandle,
        orbit_file_id: impl Into<String>,
        entity_data: EntityData,
        options: TransferOptions,
        events: E,
    ) -> Self {
        Self {
            file,
            orbit_file_id: orbit_file_id.into(),
            entity_data,
            options,
            events,
            state: SenderState::Idle,
            port: None,
            handshake: SettleCell::new(),
            terminal: SettleCell::new(),
            bytes_sent: 0,
            chunks_sent: 0,
        }
    }

    pub fn state(&self) -> &SenderState {
        &self.state
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Metadata announced in INIT.
    pub fn metadata(&self) -> TransferMetadata {
        TransferMetadata {
            api_version: API_VERSION,
            orbit_file_id: self.orbit_file_id.clone(),
            entity_data: self.entity_data.clone(),
            file_name: self.file.name.clone(),
            last_modified: self.file.last_modified,
            mime_type: self.file.mime_type.clone(),
            size: self.file.size,
            encoding: self.options.encoding,
        }
    }

    /// Trigger the transfer into `frame` and drive it to a terminal state.
    ///
    /// `Ok(())` for completion and for a receiver cancel; `Err` carries the
    /// failure cause (also reported through `on_error`). A sender is
    /// single-use: running it again only absorbs late replies and returns
    /// the recorded outcome.
    pub async fn run(&mut self, frame: &ContentWindow) -> Result<()> {
        if self.state != SenderState::Idle {
            self.absorb_late_replies();
            return self.outcome();
        }

        let (mut port, remote) = message_channel();
        let result = self.drive(frame, &mut port, remote).await;
        self.port = Some(port);
        result
    }

    async fn drive(&mut self, frame: &ContentWindow, port: &mut SenderPort, remote: ReceiverPort) -> Result<()> {
        let metadata = self.metadata();
        let init = match serde_json::to_value(InboundMessage::Init(metadata)) {
            Ok(init) => init,
            Err(e) => {
                return self.fail(TransferError::sender(
                    ErrorKind::MalformedMessage,
                    format!("cannot encode init message: {e}"),
                ))
            }
        };

        self.set_state(SenderState::AwaitingHandshake);
        if let Err(e) = frame.post_message(init, vec![remote]) {
            return self.fail(e.surfaced_by(Layer::Sender));
        }
        info!(
            event = "init_posted",
            orbit_file_id = %self.orbit_file_id,
            file = %self.file.name,
            size = self.file.size,
            target = %frame.origin(),
            "Posted INIT to frame"
        );

        if let Some(outcome) = self.handshake(port).await {
            return outcome;
        }

        self.set_state(SenderState::Streaming);
        if let Some(outcome) = self.stream(port).await {
            return outcome;
        }

        self.await_terminal(port).await
    }

    // ── Handshake ────────────────────────────────────────────────────────────

    /// Race the `initialized` reply against the timer. `None` means streaming may start.
    async fn handshake(&mut self, port: &mut SenderPort) -> Option<Result<()>> {
        let deadline = sleep(self.options.handshake_timeout);
        tokio::pin!(deadline);
        // A frame that ignores INIT simply drops the endpoint; that is not an
        // answer, the timer still decides.
        let mut dropped = false;

        loop {
            tokio::select! {
                msg = port.recv(), if !dropped => match msg {
                    Some(ReceiverMessage::Initialized) => {
                        self.settle_handshake(Ok(()));
                        break;
                    }
                    Some(other) => {
                        if let Some(outcome) = self.on_receiver_message(other) {
                            return Some(outcome);
                        }
                    }
                    None => {
                        debug!(event = "init_endpoint_dropped", "Frame released the endpoint without replying");
                        dropped = true;
                    }
                },
                _ = &mut deadline => {
                    self.settle_handshake(Err(TransferError::sender(
                        ErrorKind::HandshakeTimeout,
                        format!(
                            "handshake with the frame was not established within {}ms",
                            self.options.handshake_timeout.as_millis()
                        ),
                    )));
                    break;
                }
            }
        }

        match self.handshake.get().cloned() {
            Some(Ok(())) => {
                info!(event = "handshake_complete", orbit_file_id = %self.orbit_file_id, "Frame acknowledged INIT");
                None
            }
            Some(Err(e)) => {
                let outcome = self.fail(e);
                // A reply may have raced in right behind the timer.
                self.drain_late_replies(port);
                Some(outcome)
            }
            None => None,
        }
    }

    fn drain_late_replies(&mut self, port: &mut SenderPort) {
        while let Ok(Some(msg)) = port.try_recv() {
            match msg {
                ReceiverMessage::Initialized => {
                    self.settle_handshake(Ok(()));
                }
                other => debug!(event = "late_message_ignored", msg = ?other, "Transfer already settled"),
            }
        }
    }

    fn settle_handshake(&mut self, outcome: Result<()>) -> bool {
        let won = self.handshake.settle(outcome);
        if !won {
            debug!(event = "handshake_already_settled", "Ignoring late handshake outcome");
        }
        won
    }

    // ── Streaming ────────────────────────────────────────────────────────────

    async fn stream(&mut self, port: &mut SenderPort) -> Option<Result<()>> {
        let mut reader = match self
            .file
            .read_stream(self.options.encoding, self.options.chunk_size)
            .await
        {
            Ok(reader) => reader,
            Err(e) => return Some(self.fail(e)),
        };

        loop {
            if let Some(outcome) = self.check_inbound(port) {
                return Some(outcome);
            }

            let chunk = match reader.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Some(self.fail(e)),
            };
            let (idx, byte_len, done) = (chunk.idx, chunk.byte_len, chunk.done);

            if let Err(e) = port.post(SenderMessage::FileChunk(chunk.into())) {
                return Some(self.fail(e.surfaced_by(Layer::Sender)));
            }
            self.bytes_sent += byte_len as u64;
            self.chunks_sent += 1;
            debug!(event = "chunk_sent", idx, bytes = byte_len, total_sent = self.bytes_sent, done, "Posted chunk");
            self.events.on_chunk_sent(idx, self.bytes_sent, self.file.size);

            if self.options.throttle.is_zero() {
                tokio::task::yield_now().await;
            } else {
                sleep(self.options.throttle).await;
            }
        }

        info!(
            event = "stream_complete",
            chunks = self.chunks_sent,
            bytes = self.bytes_sent,
            "All chunks posted, waiting for receiver"
        );
        None
    }

    /// Handle whatever the receiver queued since the last chunk.
    fn check_inbound(&mut self, port: &mut SenderPort) -> Option<Result<()>> {
        loop {
            match port.try_recv() {
                Ok(Some(msg)) => {
                    if let Some(outcome) = self.on_receiver_message(msg) {
                        return Some(outcome);
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some(self.fail(e.surfaced_by(Layer::Sender))),
            }
        }
    }

    async fn await_terminal(&mut self, port: &mut SenderPort) -> Result<()> {
        loop {
            match port.recv().await {
                Some(msg) => {
                    if let Some(outcome) = self.on_receiver_message(msg) {
                        return outcome;
                    }
                }
                None => {
                    return self.fail(TransferError::sender(
                        ErrorKind::ChannelClosed,
                        "frame dropped the channel before reporting an outcome",
                    ))
                }
            }
        }
    }

    // ── Terminal transitions ─────────────────────────────────────────────────

    /// `Some` once `msg` ends the transfer.
    fn on_receiver_message(&mut self, msg: ReceiverMessage) -> Option<Result<()>> {
        match msg {
            ReceiverMessage::FileUploaded { payload } => Some(self.complete(payload)),
            ReceiverMessage::Cancel => Some(self.cancelled()),
            ReceiverMessage::Error { error } => {
                let message = match error.as_deref() {
                    Some(e) if !e.is_empty() => format!("error from receiver: {e}"),
                    _ => "empty error from receiver".to_string(),
                };
                Some(self.fail(TransferError::sender(ErrorKind::RemoteError, message)))
            }
            ReceiverMessage::Initialized => {
                debug!(event = "duplicate_initialized", state = self.state.name(), "Ignoring repeated handshake reply");
                None
            }
        }
    }

    fn complete(&mut self, payload: Value) -> Result<()> {
        if self.terminal.settle(()) {
            info!(event = "transfer_complete", orbit_file_id = %self.orbit_file_id, "Receiver uploaded the file");
            self.set_state(SenderState::Completed {
                payload: payload.clone(),
            });
            self.events.on_complete(&payload);
        }
        self.outcome()
    }

    fn cancelled(&mut self) -> Result<()> {
        if self.terminal.settle(()) {
            info!(event = "transfer_cancelled", orbit_file_id = %self.orbit_file_id, "Receiver cancelled the transfer");
            self.set_state(SenderState::Cancelled);
            self.events.on_cancel();
        }
        self.outcome()
    }

    fn fail(&mut self, cause: TransferError) -> Result<()> {
        if self.terminal.settle(()) {
            error!(event = "transfer_failed", kind = ?cause.kind(), error = %cause, "Transfer failed");
            self.set_state(SenderState::Failed { cause: cause.clone() });
            self.events.on_error(&cause);
        } else {
            warn!(event = "late_failure_ignored", error = %cause, "Transfer already settled");
        }
        self.outcome()
    }

    fn outcome(&self) -> Result<()> {
        match &self.state {
            SenderState::Failed { cause } => Err(cause.clone()),
            _ => Ok(()),
        }
    }

    fn absorb_late_replies(&mut self) {
        if let Some(mut port) = self.port.take() {
            self.drain_late_replies(&mut port);
            self.port = Some(port);
        }
    }

    fn set_state(&mut self, state: SenderState) {
        debug!(event = "sender_state", from = self.state.name(), to = state.name());
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::{frame_window, FrameInbox};
    use crate::core::pipeline::chunk::decode_value;
    use crate::core::protocol::FileChunk;
    use serde_json::json;

    const HOST: &str = "https://customer.orbit.example";

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<(u64, u64, u64)>,
        completed: Vec<Value>,
        cancels: usize,
        errors: Vec<TransferError>,
    }

    impl SenderEvents for Recorder {
        fn on_chunk_sent(&mut self, idx: u64, bytes_sent: u64, total: u64) {
            self.chunks.push((idx, bytes_sent, total));
        }
        fn on_complete(&mut self, payload: &Value) {
            self.completed.push(payload.clone());
        }
        fn on_cancel(&mut self) {
            self.cancels += 1;
        }
        fn on_error(&mut self, error: &TransferError) {
            self.errors.push(error.clone());
        }
    }

    fn sender(data: Vec<u8>, chunk_size: usize) -> Sender<Recorder> {
        let options = TransferOptions {
            chunk_size,
            ..TransferOptions::default()
        };
        Sender::new(
            FileHandle::from_bytes("notes.txt", "text/plain", 1_700_000_000_000, data),
            "orbit-file-1",
            EntityData::parse(r#"{"title":"Notes"}"#).unwrap(),
            options,
            Recorder::default(),
        )
    }

    /// Accept INIT from the inbox and hand back the dedicated endpoint.
    async fn accept_init(inbox: &mut FrameInbox) -> (TransferMetadata, ReceiverPort) {
        let mut event = inbox.recv().await.expect("init posted");
        let metadata = match serde_json::from_value::<InboundMessage>(event.data).unwrap() {
            InboundMessage::Init(metadata) => metadata,
            other => panic!("expected init, got {other:?}"),
        };
        (metadata, event.ports.pop().expect("port attached"))
    }

    #[tokio::test]
    async fn streams_file_and_completes_on_upload() {
        let data: Vec<u8> = (0..10u8).collect();
        let mut sender = sender(data.clone(), 4);
        let (frame, mut inbox) = frame_window(HOST);

        let receiver = async {
            let (metadata, mut port) = accept_init(&mut inbox).await;
            assert_eq!(metadata.orbit_file_id, "orbit-file-1");
            assert_eq!(metadata.size, 10);
            port.post(ReceiverMessage::Initialized).unwrap();

            let mut rebuilt = Vec::new();
            loop {
                let SenderMessage::FileChunk(chunk) = port.recv().await.unwrap();
                rebuilt.extend_from_slice(&decode_value(chunk.value, metadata.encoding).unwrap());
                if chunk.done {
                    break;
                }
            }
            port.post(ReceiverMessage::FileUploaded { payload: json!({"id": 9}) }).unwrap();
            rebuilt
        };

        let (result, rebuilt) = tokio::join!(sender.run(&frame), receiver);
        result.unwrap();
        assert_eq!(rebuilt, data);
        assert_eq!(sender.state(), &SenderState::Completed { payload: json!({"id": 9}) });
        assert_eq!(sender.chunks_sent(), 3);
        assert_eq!(sender.events().chunks, vec![(0, 4, 10), (1, 8, 10), (2, 10, 10)]);
        assert_eq!(sender.events().completed, vec![json!({"id": 9})]);
        assert!(sender.events().errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_fires_once_despite_late_reply() {
        let mut sender = sender(vec![1, 2, 3], 4);
        let (frame, mut inbox) = frame_window(HOST);

        let err = sender.run(&frame).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandshakeTimeout);
        assert!(matches!(sender.state(), SenderState::Failed { .. }));

        let (_, port) = accept_init(&mut inbox).await;
        port.post(ReceiverMessage::Initialized).unwrap();
        let again = sender.run(&frame).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::HandshakeTimeout);

        assert_eq!(sender.events().errors.len(), 1);
        assert!(sender.events().completed.is_empty());
        assert_eq!(sender.chunks_sent(), 0);
    }

    #[tokio::test]
    async fn receiver_cancel_stops_stream() {
        let mut sender = sender(vec![0u8; 64], 1);
        let (frame, mut inbox) = frame_window(HOST);

        let receiver = async {
            let (_, port) = accept_init(&mut inbox).await;
            port.post(ReceiverMessage::Initialized).unwrap();
            port.post(ReceiverMessage::Cancel).unwrap();
            port
        };

        let (result, _port) = tokio::join!(sender.run(&frame), receiver);
        result.unwrap();
        assert_eq!(sender.state(), &SenderState::Cancelled);
        assert_eq!(sender.events().cancels, 1);
        assert!(sender.events().completed.is_empty());
        assert!(sender.chunks_sent() < 64);
    }

    #[tokio::test]
    async fn receiver_error_is_wrapped() {
        let mut sender = sender(vec![5u8; 3], 8);
        let (frame, mut inbox) = frame_window(HOST);

        let receiver = async {
            let (_, mut port) = accept_init(&mut inbox).await;
            port.post(ReceiverMessage::Initialized).unwrap();
            let _ = port.recv().await;
            port.post(ReceiverMessage::Error { error: None }).unwrap();
            port
        };

        let (result, _port) = tokio::join!(sender.run(&frame), receiver);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteError);
        assert_eq!(err.message(), "empty error from receiver");
        assert_eq!(sender.events().errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_spaces_chunk_posts() {
        let mut sender = Sender::new(
            FileHandle::from_bytes("notes.txt", "text/plain", 0, vec![1u8; 9]),
            "orbit-file-1",
            EntityData::default(),
            TransferOptions {
                chunk_size: 3,
                throttle: Duration::from_millis(100),
                ..TransferOptions::default()
            },
            Recorder::default(),
        );
        let (frame, mut inbox) = frame_window(HOST);

        let receiver = async {
            let (_, mut port) = accept_init(&mut inbox).await;
            port.post(ReceiverMessage::Initialized).unwrap();
            let mut arrivals = Vec::new();
            loop {
                let SenderMessage::FileChunk(chunk) = port.recv().await.unwrap();
                arrivals.push(tokio::time::Instant::now());
                if chunk.done {
                    break;
                }
            }
            port.post(ReceiverMessage::FileUploaded { payload: json!(null) }).unwrap();
            arrivals
        };

        let (result, arrivals) = tokio::join!(sender.run(&frame), receiver);
        result.unwrap();
        assert_eq!(arrivals.len(), 3);
        for pair in arrivals.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(100), "gap {gap:?}");
            assert!(gap < Duration::from_millis(150), "gap {gap:?}");
        }
    }

    #[tokio::test]
    async fn read_failure_mid_stream_is_reported() {
        let dir = std::env::temp_dir().join("framedrop_test").join("sender").join("truncated");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("shrinking.bin");
        std::fs::write(&path, [9u8; 8]).unwrap();
        let file = FileHandle::open(&path).await.unwrap();
        // The file shrinks after it was selected.
        std::fs::write(&path, [9u8; 4]).unwrap();

        let options = TransferOptions {
            chunk_size: 4,
            ..TransferOptions::default()
        };
        let mut sender = Sender::new(file, "orbit-file-1", EntityData::default(), options, Recorder::default());
        let (frame, mut inbox) = frame_window(HOST);

        let receiver = async {
            let (_, mut port) = accept_init(&mut inbox).await;
            port.post(ReceiverMessage::Initialized).unwrap();
            let first = port.recv().await;
            (first, port)
        };

        let (result, (first, _port)) = tokio::join!(sender.run(&frame), receiver);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadError);
        assert_eq!(err.layer(), Layer::Reader);
        assert!(matches!(first, Some(SenderMessage::FileChunk(FileChunk { idx: 0, done: false, .. }))));
        assert_eq!(sender.chunks_sent(), 1);
        assert_eq!(sender.events().errors, vec![err]);
        assert!(matches!(sender.state(), SenderState::Failed { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn dropped_frame_fails_without_waiting_for_timer() {
        let mut sender = sender(vec![1], 8);
        let (frame, inbox) = frame_window(HOST);
        drop(inbox);

        let err = sender.run(&frame).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
        assert_eq!(err.layer(), Layer::Sender);
        assert_eq!(sender.events().errors.len(), 1);
    }
}
