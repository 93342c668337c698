//! Dedicated channel endpoints.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

use crate::core::error::{ErrorKind, Result, TransferError};
use crate::core::protocol::{ReceiverMessage, SenderMessage};

/// One end of a dedicated bidirectional channel.
///
/// `In` is what this end receives, `Out` what it posts. Dropping an end
/// closes the channel for the partner.
pub struct MessagePort<In, Out> {
    tx: mpsc::UnboundedSender<Out>,
    rx: mpsc::UnboundedReceiver<In>,
}

/// The end kept by the sender.
pub type SenderPort = MessagePort<ReceiverMessage, SenderMessage>;

/// The end transferred to the receiver inside INIT.
pub type ReceiverPort = MessagePort<SenderMessage, ReceiverMessage>;

/// Create a fresh dedicated channel for one transfer.
pub fn message_channel() -> (SenderPort, ReceiverPort) {
    let (to_receiver, from_sender) = mpsc::unbounded_channel();
    let (to_sender, from_receiver) = mpsc::unbounded_channel();
    (
        MessagePort {
            tx: to_receiver,
            rx: from_receiver,
        },
        MessagePort {
            tx: to_sender,
            rx: from_sender,
        },
    )
}

impl<In, Out> MessagePort<In, Out> {
    /// Post a message to the partner end.
    pub fn post(&self, msg: Out) -> Result<()> {
        self.tx.send(msg).map_err(|_| {
            debug!(event = "port_post_failed", "Partner endpoint dropped");
            TransferError::transport(ErrorKind::ChannelClosed, "partner endpoint has been closed")
        })
    }

    /// Wait for the next message. `None` once the partner end is gone and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<In> {
        self.rx.recv().await
    }

    /// Take a queued message without waiting.
    ///
    /// `Ok(None)` when nothing is queued, `ChannelClosed` when the partner
    /// end is gone and nothing is left.
    pub fn try_recv(&mut self) -> Result<Option<In>> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransferError::transport(
                ErrorKind::ChannelClosed,
                "partner endpoint has been closed",
            )),
        }
    }

    /// Whether the partner end has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<In, Out> fmt::Debug for MessagePort<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{ChunkValue, FileChunk};

    fn chunk(idx: u64) -> SenderMessage {
        SenderMessage::FileChunk(FileChunk {
            idx,
            value: ChunkValue::Text(String::new()),
            done: false,
        })
    }

    #[tokio::test]
    async fn delivers_in_send_order_both_ways() {
        let (mut sender, mut receiver) = message_channel();
        for idx in 0..5 {
            sender.post(chunk(idx)).unwrap();
        }
        for idx in 0..5 {
            assert_eq!(receiver.recv().await, Some(chunk(idx)));
        }

        receiver.post(ReceiverMessage::Initialized).unwrap();
        assert_eq!(sender.recv().await, Some(ReceiverMessage::Initialized));
    }

    #[test]
    fn try_recv_reports_empty_and_closed() {
        let (mut sender, receiver) = message_channel();
        assert_eq!(sender.try_recv().unwrap(), None);

        receiver.post(ReceiverMessage::Cancel).unwrap();
        drop(receiver);

        assert_eq!(sender.try_recv().unwrap(), Some(ReceiverMessage::Cancel));
        let err = sender.try_recv().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
        assert!(sender.is_closed());
        assert_eq!(sender.post(chunk(0)).unwrap_err().kind(), ErrorKind::ChannelClosed);
    }
}
