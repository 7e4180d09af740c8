//! Byte codec between the store's binary image and the transportable text
//! form kept in durable key-value storage.
//!
//! Encoding is always base64 of the raw SQLite image. Decoding runs an
//! explicit, ordered list of named decoders, each with a strict acceptance
//! predicate; a candidate is rejected unless its decoded bytes begin with the
//! SQLite signature, so corrupt or foreign data fails closed instead of
//! producing a garbage store.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

/// First bytes of every SQLite database image.
pub const SQLITE_SIGNATURE: &[u8] = b"SQLite format 3\0";

/// Why a stored value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRejected {
    /// Name of each decoder tried, with its rejection reason.
    pub attempts: Vec<(&'static str, String)>,
}

impl std::fmt::Display for DecodeRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no decoder accepted the value (tried ")?;
        for (i, (name, _)) in self.attempts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}")?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for DecodeRejected {}

/// Encode a store image for durable storage.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a stored text value back into a store image.
///
/// Decoders are tried in priority order; the first one whose output begins
/// with [`SQLITE_SIGNATURE`] wins.
pub fn decode(text: &str) -> Result<Vec<u8>, DecodeRejected> {
    type Decoder = (&'static str, fn(&str) -> Result<Vec<u8>, String>);
    const DECODERS: &[Decoder] = &[
        ("base64-sqlite", decode_base64_sqlite),
        ("legacy-deflate", decode_legacy_deflate),
    ];

    let mut attempts = Vec::new();
    for (name, decoder) in DECODERS {
        match decoder(text) {
            Ok(bytes) => {
                debug!(decoder = name, len = bytes.len(), "decoded store image");
                return Ok(bytes);
            }
            Err(reason) => attempts.push((*name, reason)),
        }
    }
    Err(DecodeRejected { attempts })
}

/// `true` if `bytes` look like a SQLite database image.
#[must_use]
pub fn is_store_image(bytes: &[u8]) -> bool {
    bytes.starts_with(SQLITE_SIGNATURE)
}

/// Current format: base64 of the raw SQLite image.
fn decode_base64_sqlite(text: &str) -> Result<Vec<u8>, String> {
    let bytes = BASE64
        .decode(text.trim())
        .map_err(|e| format!("not base64: {e}"))?;
    if is_store_image(&bytes) {
        Ok(bytes)
    } else {
        Err("decoded bytes lack the SQLite signature".into())
    }
}

/// Legacy format: base64 of a length-prefixed zlib block whose inflated
/// payload is itself base64 of the SQLite image.
///
/// The prefix is the little-endian u32 length of the inflated payload and is
/// checked exactly; a mismatch means the blob was truncated or corrupted.
fn decode_legacy_deflate(text: &str) -> Result<Vec<u8>, String> {
    let blob = BASE64
        .decode(text.trim())
        .map_err(|e| format!("not base64: {e}"))?;
    if blob.len() < 4 {
        return Err("too short for a length prefix".into());
    }
    let expected = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;

    let mut inflated = Vec::with_capacity(expected);
    flate2::read::ZlibDecoder::new(&blob[4..])
        .read_to_end(&mut inflated)
        .map_err(|e| format!("zlib inflate failed: {e}"))?;
    if inflated.len() != expected {
        return Err(format!(
            "length prefix mismatch: expected {expected}, inflated {}",
            inflated.len()
        ));
    }

    let inner = std::str::from_utf8(&inflated).map_err(|e| format!("inner payload not utf-8: {e}"))?;
    let bytes = BASE64
        .decode(inner.trim())
        .map_err(|e| format!("inner payload not base64: {e}"))?;
    if is_store_image(&bytes) {
        Ok(bytes)
    } else {
        Err("inner bytes lack the SQLite signature".into())
    }
}

/// Produce a legacy-format blob. Only used by tests and recovery tooling;
/// normal saves always write the current format.
#[must_use]
pub fn encode_legacy(bytes: &[u8]) -> String {
    use std::io::Write;

    let inner = BASE64.encode(bytes);
    #[allow(clippy::cast_possible_truncation)]
    let len = (inner.len() as u32).to_le_bytes();

    let mut blob = Vec::with_capacity(4 + inner.len() / 2);
    blob.extend_from_slice(&len);
    let mut enc = flate2::write::ZlibEncoder::new(&mut blob, flate2::Compression::default());
    // Writing to a Vec cannot fail.
    let _ = enc.write_all(inner.as_bytes());
    let _ = enc.finish();
    BASE64.encode(&blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_image() -> Vec<u8> {
        let mut v = SQLITE_SIGNATURE.to_vec();
        v.extend_from_slice(b"payload bytes follow the signature");
        v
    }

    #[test]
    fn test_current_format_round_trip() {
        let image = fake_image();
        let text = encode(&image);
        assert_eq!(decode(&text).unwrap(), image);
    }

    #[test]
    fn test_legacy_format_decodes() {
        let image = fake_image();
        let text = encode_legacy(&image);
        assert_eq!(decode(&text).unwrap(), image);
    }

    #[test]
    fn test_rejects_non_sqlite_payload() {
        let text = encode(b"not a database at all");
        let err = decode(&text).unwrap_err();
        assert_eq!(err.attempts.len(), 2);
    }

    #[test]
    fn test_rejects_garbage_text() {
        assert!(decode("%%% definitely not base64 %%%").is_err());
    }

    #[test]
    fn test_rejects_truncated_legacy_blob() {
        let image = fake_image();
        let text = encode_legacy(&image);
        // Chop the tail off the underlying blob.
        let blob = BASE64.decode(text).unwrap();
        let truncated = BASE64.encode(&blob[..blob.len() - 8]);
        assert!(decode(&truncated).is_err());
    }
}
