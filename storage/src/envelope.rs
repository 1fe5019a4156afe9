//! Self-describing serialization envelope for stored blobs.
//!
//! Layout: `[u32 LE tag length][tag bytes][payload]`. The tag names the
//! codec that produced the payload, so stored data survives a future codec
//! migration without a schema change. Today the only codec is `"json"`.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageError;

/// Codec tag for `serde_json` payloads.
pub const JSON_TAG: &str = "json";

/// Wrap `payload` in an envelope carrying `tag`.
#[must_use]
pub fn encode(tag: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + tag.len() + payload.len());
    out.extend_from_slice(&(tag.len() as u32).to_le_bytes());
    out.extend_from_slice(tag.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split an envelope into its tag and payload.
pub fn decode(data: &[u8]) -> Result<(&str, &[u8]), StorageError> {
    let Some(len_bytes) = data.get(..4) else {
        return Err(StorageError::Envelope("shorter than tag length".into()));
    };
    let tag_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
        as usize;
    let Some(tag_bytes) = data.get(4..4 + tag_len) else {
        return Err(StorageError::Envelope("truncated tag".into()));
    };
    let tag = std::str::from_utf8(tag_bytes)
        .map_err(|_| StorageError::Envelope("tag is not utf-8".into()))?;
    Ok((tag, &data[4 + tag_len..]))
}

/// Serialize `value` as JSON inside a [`JSON_TAG`] envelope.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(encode(JSON_TAG, &serde_json::to_vec(value)?))
}

/// Decode a [`JSON_TAG`] envelope back into `T`.
pub fn decode_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, StorageError> {
    let (tag, payload) = decode(data)?;
    if tag != JSON_TAG {
        return Err(StorageError::Envelope(format!("unknown codec tag '{tag}'")));
    }
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::{JSON_TAG, decode, decode_json, encode, encode_json};
    use crate::error::StorageError;
    use serde_json::{Value, json};

    #[test]
    fn round_trip_preserves_tag_and_payload() {
        let enveloped = encode("json", br#"{"k":1}"#);
        let (tag, payload) = decode(&enveloped).unwrap();
        assert_eq!(tag, JSON_TAG);
        assert_eq!(payload, br#"{"k":1}"#);
    }

    #[test]
    fn layout_is_length_prefixed_little_endian() {
        let enveloped = encode("json", b"x");
        assert_eq!(&enveloped[..4], &4u32.to_le_bytes());
        assert_eq!(&enveloped[4..8], b"json");
        assert_eq!(&enveloped[8..], b"x");
    }

    #[test]
    fn json_round_trip() {
        let value = json!({"nested": {"list": [1, 2, 3]}, "s": "text"});
        let enveloped = encode_json(&value).unwrap();
        let back: Value = decode_json(&enveloped).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(matches!(
            decode(&[1, 0]),
            Err(StorageError::Envelope(_))
        ));
        // Tag length claims more bytes than exist.
        assert!(matches!(
            decode(&[200, 0, 0, 0, b'j']),
            Err(StorageError::Envelope(_))
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let enveloped = encode("msgpack", b"\x00");
        assert!(matches!(
            decode_json::<Value>(&enveloped),
            Err(StorageError::Envelope(_))
        ));
    }
}
