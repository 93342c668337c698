//! Origin guard.
//!
//! The frame learns its trusted partner origin from its own URL fragment
//! (`#data-orbit-origin=<percent-encoded-origin>`). Every window event is
//! checked against that origin and against the closed set of known event
//! names; anything else is dropped without raising an error, since frames
//! routinely receive unrelated cross-frame traffic. The guard never looks at
//! the message body: judging its shape is the receiver's job.

use tracing::debug;

use super::InboundKind;
use crate::core::config::{ORIGIN_FRAGMENT_KEY, SKIP_TIMEOUT_FRAGMENT_KEY};
use crate::core::connection::MessageEvent;
use crate::core::error::{ErrorKind, Result, TransferError};

/// Decoded `key=value` pairs of a URL fragment. A leading `#` is ignored.
fn fragment_pairs(fragment: &str) -> impl Iterator<Item = (String, String)> + '_ {
    fragment
        .trim_start_matches('#')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key).ok()?.into_owned();
            let value = urlencoding::decode(value).ok()?.into_owned();
            Some((key, value))
        })
}

/// Extract the partner origin from the frame's URL fragment.
pub fn derive_origin(fragment: &str) -> Result<String> {
    fragment_pairs(fragment)
        .find(|(key, _)| key == ORIGIN_FRAGMENT_KEY)
        .map(|(_, origin)| origin)
        .filter(|origin| !origin.is_empty())
        .ok_or_else(|| {
            TransferError::receiver(
                ErrorKind::OriginMissing,
                format!(
                    "the host must provide its origin in the frame URL fragment, e.g. \
                     https://upload.example.com/frame.html#{ORIGIN_FRAGMENT_KEY}=https%3A%2F%2Fhost.example.com"
                ),
            )
        })
}

/// Whether the fragment carries the `skipTimeoutCheck=true` debug flag.
pub fn skip_timeout_check(fragment: &str) -> bool {
    fragment_pairs(fragment).any(|(key, value)| key == SKIP_TIMEOUT_FRAGMENT_KEY && value == "true")
}

/// Build the frame address a host embeds: `url` plus the host's origin in the fragment.
///
/// A missing scheme defaults to `http://`; an existing fragment is extended with `&`.
pub fn frame_url(url: &str, host_origin: &str) -> String {
    let scheme = if url.starts_with("http://") || url.starts_with("https://") {
        ""
    } else {
        "http://"
    };
    let pair = format!("{ORIGIN_FRAGMENT_KEY}={}", urlencoding::encode(host_origin));
    if url.contains('#') {
        format!("{scheme}{url}&{pair}")
    } else {
        format!("{scheme}{url}#{pair}")
    }
}

/// The fragment part of a URL (without `#`), or `""`.
pub fn fragment_of(url: &str) -> &str {
    url.split_once('#').map(|(_, fragment)| fragment).unwrap_or("")
}

/// Let a window event through only if it comes from `expected_origin` and
/// names a known protocol event. Everything else yields `None`.
pub fn accept(event: &MessageEvent, expected_origin: &str) -> Option<InboundKind> {
    if event.origin != expected_origin {
        debug!(
            event = "origin_rejected",
            origin = %event.origin,
            expected = %expected_origin,
            "Ignoring window message from untrusted origin"
        );
        return None;
    }

    let name = event.data.as_object()?.get("event")?.as_str()?;
    let kind = InboundKind::from_event_name(name);
    if kind.is_none() {
        debug!(event = "unknown_window_event", name, "Ignoring unrelated window message");
    }
    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{FILE_CHUNK_EVENT, INIT_EVENT};
    use serde_json::{json, Value};

    const HOST: &str = "https://customer.orbit.example";

    fn event(origin: &str, data: Value) -> MessageEvent {
        MessageEvent {
            origin: origin.to_string(),
            data,
            ports: Vec::new(),
        }
    }

    #[test]
    fn derives_percent_encoded_origin() {
        let fragment = "#data-orbit-origin=https%3A%2F%2Fcustomer.orbit.example";
        assert_eq!(derive_origin(fragment).unwrap(), HOST);

        let with_other_keys = "foo=bar&data-orbit-origin=http%3A%2F%2Flocalhost%3A3000&skipTimeoutCheck=true";
        assert_eq!(derive_origin(with_other_keys).unwrap(), "http://localhost:3000");
    }

    #[test]
    fn missing_origin_is_an_error() {
        for fragment in ["", "#", "#foo=bar", "#data-orbit-origin="] {
            let err = derive_origin(fragment).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OriginMissing, "fragment {fragment:?}");
        }
    }

    #[test]
    fn skip_flag_requires_literal_true() {
        assert!(skip_timeout_check("#data-orbit-origin=x&skipTimeoutCheck=true"));
        assert!(!skip_timeout_check("#skipTimeoutCheck=false"));
        assert!(!skip_timeout_check("#data-orbit-origin=x"));
    }

    #[test]
    fn frame_url_appends_origin_to_fragment() {
        assert_eq!(
            frame_url("https://up.example/frame.html", "http://localhost:3000"),
            "https://up.example/frame.html#data-orbit-origin=http%3A%2F%2Flocalhost%3A3000"
        );
        assert_eq!(
            frame_url("localhost:3001/frame.html#skipTimeoutCheck=true", HOST),
            "http://localhost:3001/frame.html#skipTimeoutCheck=true&data-orbit-origin=https%3A%2F%2Fcustomer.orbit.example"
        );
    }

    #[test]
    fn frame_url_round_trips_through_derive_origin() {
        let url = frame_url("https://up.example/frame.html", HOST);
        assert_eq!(derive_origin(fragment_of(&url)).unwrap(), HOST);
    }

    #[test]
    fn accepts_known_messages_from_expected_origin() {
        let data = json!({
            "event": FILE_CHUNK_EVENT,
            "idx": 0,
            "value": "aGk=",
            "done": true
        });
        assert_eq!(accept(&event(HOST, data), HOST), Some(InboundKind::FileChunk));
    }

    #[test]
    fn silently_discards_foreign_and_unknown_traffic() {
        let init = json!({
            "event": INIT_EVENT,
            "apiVersion": 1,
            "orbitFileId": "x",
            "fileName": "a",
            "lastModified": 0,
            "size": 0
        });
        assert_eq!(accept(&event(HOST, init.clone()), HOST), Some(InboundKind::Init));
        assert!(accept(&event("https://evil.example", init), HOST).is_none());
        assert!(accept(&event(HOST, json!({"event": "initialized"})), HOST).is_none());
        assert!(accept(&event(HOST, json!({"type": "webpackOk"})), HOST).is_none());
        assert!(accept(&event(HOST, json!("just a string")), HOST).is_none());
    }

    #[test]
    fn known_event_passes_whatever_its_body() {
        // A bare INIT or one from a newer API version still reaches the receiver,
        // which decides how to reject it.
        assert_eq!(accept(&event(HOST, json!({"event": INIT_EVENT})), HOST), Some(InboundKind::Init));
        let v2 = json!({"event": INIT_EVENT, "apiVersion": 2, "byteLength": 3});
        assert_eq!(accept(&event(HOST, v2), HOST), Some(InboundKind::Init));
    }
}
