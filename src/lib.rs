//! framedrop: chunked cross-origin file hand-off.
//!
//! A host page hands a local file plus a JSON metadata blob to an embedded
//! frame from another origin. The frame reassembles the file from a stream
//! of message-passing chunks and submits it to its own backend.
//!
//! The protocol core lives in [`core`]: the origin guard, the chunk reader,
//! the window/port transport and the two state machines.

pub mod core;
pub mod utils;

pub use crate::core::error::{ErrorKind, Layer, Result, TransferError};
