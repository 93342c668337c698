//! Centralized configuration constants for framedrop.
//!
//! Protocol constants (event names, API version, fragment keys) and the
//! tunable defaults for chunking and handshake timing live here so both
//! sides of the transfer agree on them.

use std::time::Duration;

// ── Protocol ─────────────────────────────────────────────────────────────────

/// The only handshake API version a receiver accepts.
pub const API_VERSION: i64 = 1;

/// `event` value of the handshake message posted through the window.
pub const INIT_EVENT: &str = "online.orbit::iframe_file_transfer#init";

/// `event` value of every chunk message.
pub const FILE_CHUNK_EVENT: &str = "online.orbit::iframe_file_transfer#file_chunk";

// ── URL fragment ─────────────────────────────────────────────────────────────

/// Fragment key carrying the percent-encoded partner origin.
pub const ORIGIN_FRAGMENT_KEY: &str = "data-orbit-origin";

/// Fragment key of the debug flag that disables the receiver handshake timeout.
pub const SKIP_TIMEOUT_FRAGMENT_KEY: &str = "skipTimeoutCheck";

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Default chunk size in bytes (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default delay after each chunk post. Zero disables throttling.
pub const DEFAULT_THROTTLE: Duration = Duration::ZERO;

/// Prefix of the `data:` URL produced for base64 slices and image previews.
pub const DATA_URL_BASE64_MARKER: &str = ";base64,";

// ── Handshake ────────────────────────────────────────────────────────────────

/// How long the sender waits for `initialized` after posting INIT.
pub const SENDER_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(5000);

/// How long the receiver waits for an INIT after `connect()`.
pub const RECEIVER_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(3000);

// ── Submission ───────────────────────────────────────────────────────────────

/// Form field name the reassembled file is bound to when none is configured.
pub const DEFAULT_FILE_FIELD: &str = "file";

/// Form field name carrying the correlation id in the receiver form.
pub const ORBIT_FILE_ID_FIELD: &str = "orbitFileId";

/// Prefix of generated multipart boundaries.
pub const MULTIPART_BOUNDARY_PREFIX: &str = "----framedrop-";
