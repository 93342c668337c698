//! The frame's window: origin-stamped broadcast messaging.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::port::ReceiverPort;
use crate::core::error::{ErrorKind, Result, TransferError};

/// A message delivered to the frame's window.
#[derive(Debug)]
pub struct MessageEvent {
    /// Origin of the poster, stamped by the transport (never by the poster's payload).
    pub origin: String,
    /// Arbitrary JSON; unrelated cross-frame traffic is expected.
    pub data: Value,
    /// Channel endpoints transferred along with the message.
    pub ports: Vec<ReceiverPort>,
}

/// Handle to post into a frame's window, bound to the poster's origin.
#[derive(Debug, Clone)]
pub struct ContentWindow {
    origin: String,
    tx: mpsc::UnboundedSender<MessageEvent>,
}

/// The frame side of the window: every posted event lands here.
#[derive(Debug)]
pub struct FrameInbox {
    rx: mpsc::UnboundedReceiver<MessageEvent>,
}

/// Create a frame window whose first poster is a page served from `poster_origin`.
pub fn frame_window(poster_origin: &str) -> (ContentWindow, FrameInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ContentWindow {
            origin: poster_origin.to_string(),
            tx,
        },
        FrameInbox { rx },
    )
}

impl ContentWindow {
    /// Origin stamped on everything posted through this handle.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Another poster reaching the same frame from a different origin.
    pub fn as_origin(&self, origin: &str) -> ContentWindow {
        ContentWindow {
            origin: origin.to_string(),
            tx: self.tx.clone(),
        }
    }

    /// Post `data` into the frame, transferring ownership of `transfer`.
    pub fn post_message(&self, data: Value, transfer: Vec<ReceiverPort>) -> Result<()> {
        let event = MessageEvent {
            origin: self.origin.clone(),
            data,
            ports: transfer,
        };
        self.tx.send(event).map_err(|_| {
            debug!(event = "window_post_failed", origin = %self.origin, "Frame window is gone");
            TransferError::transport(ErrorKind::ChannelClosed, "frame window has been detached")
        })
    }
}

impl FrameInbox {
    /// Wait for the next window event. `None` once every poster is gone.
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        self.rx.recv().await
    }
}
