//! Transport: the broadcast window and the dedicated per-transfer channel.
//!
//! # Channel Overview
//!
//! - [`ContentWindow`] / [`FrameInbox`]: the frame's window. Anyone holding a
//!   `ContentWindow` may post into it; every event is stamped with the
//!   poster's origin, exactly as a browser does. Used once, for INIT.
//! - [`MessagePort`]: one end of a dedicated bidirectional channel created
//!   by [`message_channel`]. The sender keeps one end and transfers the other
//!   inside INIT. All later traffic flows over it.
//!
//! Delivery on a port is in send order and without duplication. Posting is
//! fire-and-forget (unbounded queue); the only backpressure is the sender's
//! fixed throttle.

mod port;
mod window;

pub use port::{message_channel, MessagePort, ReceiverPort, SenderPort};
pub use window::{frame_window, ContentWindow, FrameInbox, MessageEvent};
