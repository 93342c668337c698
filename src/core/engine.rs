//! LoopbackTransfer: both ends of a transfer in one process.
//!
//! The sender posts into an in-process frame window and the receiver reads
//! from its inbox; both state machines are polled by the same task, so the
//! whole exchange stays cooperative and single-threaded. Host surfaces drive
//! the receiving side through the [`HostCommand`] channel handed to
//! [`LoopbackTransfer::new`].

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::core::connection::{frame_window, ContentWindow, FrameInbox};
use crate::core::error::Result;
use crate::core::host::{HostCommand, HostSurface, SenderEvents};
use crate::core::receiver::{Receiver, ReceiverOutcome};
use crate::core::sender::Sender;
use crate::core::submit::SubmitRoutine;

/// Outcome of both sides.
#[derive(Debug)]
pub struct TransferReport {
    pub sender: Result<()>,
    pub receiver: Result<ReceiverOutcome>,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.sender.is_ok() && matches!(self.receiver, Ok(ReceiverOutcome::Uploaded(_)))
    }
}

pub struct LoopbackTransfer<E: SenderEvents, H: HostSurface, S: SubmitRoutine> {
    sender: Sender<E>,
    receiver: Receiver<H, S>,
    window: ContentWindow,
    inbox: FrameInbox,
    commands: UnboundedReceiver<HostCommand>,
}

impl<E: SenderEvents, H: HostSurface, S: SubmitRoutine> LoopbackTransfer<E, H, S> {
    /// Wire `sender` to a frame window hosted at `host_origin`.
    pub fn new(
        sender: Sender<E>,
        receiver: Receiver<H, S>,
        host_origin: &str,
        commands: UnboundedReceiver<HostCommand>,
    ) -> Self {
        if receiver.expected_origin() != host_origin {
            warn!(
                event = "origin_mismatch",
                host = %host_origin,
                expected = %receiver.expected_origin(),
                "Frame does not trust this host, INIT will be ignored"
            );
        }
        let (window, inbox) = frame_window(host_origin);
        Self {
            sender,
            receiver,
            window,
            inbox,
            commands,
        }
    }

    /// Run both state machines to their terminal states.
    pub async fn run(&mut self) -> TransferReport {
        let receiver = &mut self.receiver;
        let inbox = &mut self.inbox;
        let commands = &mut self.commands;
        let receiving = async move {
            let outcome = receiver.run(inbox, commands).await;
            // Whatever happened, the sender must not wait on this channel forever.
            receiver.release_channel();
            outcome
        };

        let (sender, receiver) = tokio::join!(self.sender.run(&self.window), receiving);
        info!(
            event = "loopback_done",
            sender = self.sender.state().name(),
            receiver = self.receiver.session().name(),
            "Loopback transfer finished"
        );
        TransferReport { sender, receiver }
    }

    pub fn sender(&self) -> &Sender<E> {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver<H, S> {
        &self.receiver
    }
}
