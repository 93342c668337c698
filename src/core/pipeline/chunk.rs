//! Chunk payload codec.
//!
//! A file slice is encoded once on the sender (base64, text or raw buffer)
//! and decoded by the receiver with the encoding agreed in INIT. Text mode
//! is lossy for non-UTF-8 content; such a transfer ends in a size mismatch
//! on the receiver rather than in silent corruption.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::core::config::DATA_URL_BASE64_MARKER;
use crate::core::error::{ErrorKind, Result, TransferError};
use crate::core::protocol::{ChunkValue, Encoding};

/// Encode a raw file slice for the wire.
pub fn encode_slice(slice: Vec<u8>, encoding: Encoding) -> ChunkValue {
    match encoding {
        Encoding::Base64 => ChunkValue::Text(STANDARD.encode(&slice)),
        Encoding::Text => ChunkValue::Text(match String::from_utf8(slice) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }),
        Encoding::Buffer => ChunkValue::Buffer(slice),
    }
}

/// Decode a chunk payload back into bytes.
pub fn decode_value(value: ChunkValue, encoding: Encoding) -> Result<Bytes> {
    match (encoding, value) {
        (Encoding::Base64, ChunkValue::Text(text)) => STANDARD
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(|e| {
                TransferError::receiver(ErrorKind::MalformedMessage, format!("invalid base64 chunk: {e}"))
            }),
        (Encoding::Text, ChunkValue::Text(text)) => Ok(Bytes::from(text.into_bytes())),
        (Encoding::Buffer, ChunkValue::Buffer(buf)) => Ok(Bytes::from(buf)),
        (encoding, _) => Err(TransferError::receiver(
            ErrorKind::MalformedMessage,
            format!("chunk payload does not match the agreed {encoding} encoding"),
        )),
    }
}

/// `data:` URL of `bytes`, used for image previews.
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    let mime_type = if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };
    format!("data:{mime_type}{DATA_URL_BASE64_MARKER}{}", STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_encoding_decodes_to_the_original_slice() {
        let slice = b"\x00\x01binary\xfe\xff".to_vec();
        for encoding in [Encoding::Base64, Encoding::Buffer] {
            let value = encode_slice(slice.clone(), encoding);
            assert_eq!(decode_value(value, encoding).unwrap(), Bytes::from(slice.clone()));
        }

        let text = "héllo wörld".as_bytes().to_vec();
        let value = encode_slice(text.clone(), Encoding::Text);
        assert_eq!(decode_value(value, Encoding::Text).unwrap(), Bytes::from(text));
    }

    #[test]
    fn text_mode_is_lossy_for_invalid_utf8() {
        let value = encode_slice(vec![0x61, 0xff, 0x62], Encoding::Text);
        let decoded = decode_value(value, Encoding::Text).unwrap();
        assert_ne!(decoded.len(), 3);
    }

    #[test]
    fn mismatched_payload_shape_is_malformed() {
        let err = decode_value(ChunkValue::Buffer(vec![1]), Encoding::Base64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedMessage);

        let err = decode_value(ChunkValue::Text("not base64!".into()), Encoding::Base64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedMessage);
    }

    #[test]
    fn data_url_defaults_mime_type() {
        assert_eq!(data_url("image/png", b"hi"), "data:image/png;base64,aGk=");
        assert_eq!(data_url("", b""), "data:application/octet-stream;base64,");
    }
}
