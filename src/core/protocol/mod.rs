//! Wire messages of the frame transfer protocol.
//!
//! Every message is a JSON object tagged by its `event` field:
//!
//! - window, once: `INIT` ([`InboundMessage::Init`]) with one
//!   [`MessagePort`](crate::core::connection::MessagePort) attached
//! - dedicated channel, sender → receiver: [`SenderMessage::FileChunk`]
//! - dedicated channel, receiver → sender: [`ReceiverMessage`]
//!
//! This module is a pure data layer: no I/O, no async.

pub mod origin;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::core::config::{FILE_CHUNK_EVENT, INIT_EVENT};

// ── Encoding ──────────────────────────────────────────────────────────────────

/// How a file slice is encoded inside a chunk's `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Standard base64 text (the default, and the only mode older hosts speak).
    #[default]
    Base64,
    /// The slice decoded as UTF-8 text (lossy for binary content).
    Text,
    /// Raw bytes.
    Buffer,
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base64" => Ok(Self::Base64),
            "text" => Ok(Self::Text),
            "buffer" => Ok(Self::Buffer),
            other => Err(format!("unknown encoding '{other}' (expected base64, text or buffer)")),
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base64 => f.write_str("base64"),
            Self::Text => f.write_str("text"),
            Self::Buffer => f.write_str("buffer"),
        }
    }
}

// ── Entity data ───────────────────────────────────────────────────────────────

/// Caller-supplied JSON object describing the entity the file belongs to.
///
/// Values are expected to be scalars or `null`, but arbitrary JSON is
/// carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityData(Map<String, Value>);

impl EntityData {
    /// Parse entity data from its JSON text form. Anything but an object is rejected.
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Value of `key` rendered for a form field. `null`, arrays and objects yield `None`.
    pub fn field_value(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for EntityData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Metadata announced by the sender in INIT. Immutable once the handshake completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub api_version: i64,
    /// Opaque correlation id, echoed byte-for-byte.
    pub orbit_file_id: String,
    #[serde(default)]
    pub entity_data: EntityData,
    pub file_name: String,
    /// Milliseconds since the Unix epoch.
    #[serde(deserialize_with = "epoch_millis")]
    pub last_modified: i64,
    #[serde(default)]
    pub mime_type: String,
    /// Declared byte length of the file.
    pub size: u64,
    /// Chunk encoding the sender will use. Absent means base64.
    #[serde(default)]
    pub encoding: Encoding,
}

/// Browsers hand out file timestamps as plain JS numbers, which may carry a
/// fractional part. Those are truncated to whole milliseconds.
fn epoch_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let n = Number::deserialize(deserializer)?;
    n.as_i64()
        .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        .ok_or_else(|| D::Error::custom(format!("lastModified {n} is not a timestamp")))
}

// ── Chunks ────────────────────────────────────────────────────────────────────

/// Encoded payload of one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkValue {
    /// base64 or text encodings.
    Text(String),
    /// buffer encoding.
    Buffer(Vec<u8>),
}

/// One slice of the file on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// 0-based and increasing; informational only, never used to reorder.
    pub idx: u64,
    pub value: ChunkValue,
    /// Set on the final chunk only.
    pub done: bool,
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Messages the sender posts into the frame window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum InboundMessage {
    #[serde(rename = "online.orbit::iframe_file_transfer#init")]
    Init(TransferMetadata),
    #[serde(rename = "online.orbit::iframe_file_transfer#file_chunk")]
    FileChunk(FileChunk),
}

/// Which protocol message a window event claims to be, judged by its
/// `event` name alone. The body is parsed later, by the receiver, so that a
/// foreign API version can be told apart from a malformed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Init,
    FileChunk,
}

impl InboundKind {
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            INIT_EVENT => Some(Self::Init),
            FILE_CHUNK_EVENT => Some(Self::FileChunk),
            _ => None,
        }
    }

    pub fn event_name(self) -> &'static str {
        match self {
            Self::Init => INIT_EVENT,
            Self::FileChunk => FILE_CHUNK_EVENT,
        }
    }
}

/// Sender → receiver traffic on the dedicated channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SenderMessage {
    #[serde(rename = "online.orbit::iframe_file_transfer#file_chunk")]
    FileChunk(FileChunk),
}

/// Receiver → sender traffic on the dedicated channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ReceiverMessage {
    /// Handshake reply.
    #[serde(rename = "initialized")]
    Initialized,
    /// The receiver's backend accepted the file; `payload` is its response.
    #[serde(rename = "file-uploaded")]
    FileUploaded {
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> TransferMetadata {
        TransferMetadata {
            api_version: 1,
            orbit_file_id: "orbit-42".into(),
            entity_data: EntityData::parse(r#"{"title":"Cover","rank":3,"draft":false,"owner":null}"#)
                .unwrap(),
            file_name: "cover.png".into(),
            last_modified: 1_700_000_000_000,
            mime_type: "image/png".into(),
            size: 2048,
            encoding: Encoding::Base64,
        }
    }

    #[test]
    fn init_serializes_with_event_tag_and_camel_case() {
        let value = serde_json::to_value(InboundMessage::Init(metadata())).unwrap();
        assert_eq!(value["event"], INIT_EVENT);
        assert_eq!(value["apiVersion"], 1);
        assert_eq!(value["orbitFileId"], "orbit-42");
        assert_eq!(value["fileName"], "cover.png");
        assert_eq!(value["mimeType"], "image/png");
        assert_eq!(value["lastModified"], 1_700_000_000_000i64);
        assert_eq!(value["size"], 2048);
        assert_eq!(value["entityData"]["rank"], 3);
    }

    #[test]
    fn init_without_encoding_defaults_to_base64() {
        let raw = json!({
            "event": INIT_EVENT,
            "apiVersion": 1,
            "orbitFileId": "abc",
            "entityData": {},
            "fileName": "a.txt",
            "lastModified": 0,
            "mimeType": "text/plain",
            "size": 3
        });
        match serde_json::from_value::<InboundMessage>(raw).unwrap() {
            InboundMessage::Init(meta) => assert_eq!(meta.encoding, Encoding::Base64),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn chunk_event_name_matches_config() {
        let chunk = InboundMessage::FileChunk(FileChunk {
            idx: 0,
            value: ChunkValue::Text("aGk=".into()),
            done: true,
        });
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["event"], FILE_CHUNK_EVENT);
        assert_eq!(value["value"], "aGk=");
        assert_eq!(value["done"], true);

        let on_channel = serde_json::to_value(SenderMessage::FileChunk(FileChunk {
            idx: 1,
            value: ChunkValue::Buffer(vec![1, 2]),
            done: false,
        }))
        .unwrap();
        assert_eq!(on_channel["event"], FILE_CHUNK_EVENT);
        assert_eq!(on_channel["value"], json!([1, 2]));
    }

    #[test]
    fn inbound_kind_is_decided_by_event_name() {
        assert_eq!(InboundKind::from_event_name(INIT_EVENT), Some(InboundKind::Init));
        assert_eq!(InboundKind::from_event_name(FILE_CHUNK_EVENT), Some(InboundKind::FileChunk));
        assert_eq!(InboundKind::from_event_name("initialized"), None);
        assert_eq!(InboundKind::FileChunk.event_name(), FILE_CHUNK_EVENT);
    }

    #[test]
    fn fractional_last_modified_is_truncated() {
        let raw = json!({
            "apiVersion": 1,
            "orbitFileId": "abc",
            "fileName": "a.txt",
            "lastModified": 1_700_000_000_000.75,
            "size": 3
        });
        let meta: TransferMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.last_modified, 1_700_000_000_000);

        let bad = json!({"apiVersion": 1, "orbitFileId": "a", "fileName": "a", "lastModified": "yesterday", "size": 1});
        assert!(serde_json::from_value::<TransferMetadata>(bad).is_err());
    }

    #[test]
    fn receiver_messages_use_short_event_names() {
        assert_eq!(
            serde_json::to_value(ReceiverMessage::Initialized).unwrap(),
            json!({"event": "initialized"})
        );
        assert_eq!(
            serde_json::to_value(ReceiverMessage::Cancel).unwrap(),
            json!({"event": "cancel"})
        );
        assert_eq!(
            serde_json::to_value(ReceiverMessage::FileUploaded { payload: json!({"id": "x"}) })
                .unwrap(),
            json!({"event": "file-uploaded", "payload": {"id": "x"}})
        );
        let err: ReceiverMessage = serde_json::from_value(json!({"event": "error"})).unwrap();
        assert_eq!(err, ReceiverMessage::Error { error: None });
    }

    #[test]
    fn entity_field_values_render_scalars_only() {
        let meta = metadata();
        assert_eq!(meta.entity_data.field_value("title").as_deref(), Some("Cover"));
        assert_eq!(meta.entity_data.field_value("rank").as_deref(), Some("3"));
        assert_eq!(meta.entity_data.field_value("draft").as_deref(), Some("false"));
        assert_eq!(meta.entity_data.field_value("owner"), None);
        assert_eq!(meta.entity_data.field_value("missing"), None);
        assert!(EntityData::parse("[1,2]").is_err());
    }

    #[test]
    fn encoding_parses_case_insensitively() {
        assert_eq!("BASE64".parse::<Encoding>().unwrap(), Encoding::Base64);
        assert_eq!("buffer".parse::<Encoding>().unwrap(), Encoding::Buffer);
        assert!("gzip".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Text.to_string(), "text");
    }
}
