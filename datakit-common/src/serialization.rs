use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Serialization format for points published to Zenoh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, good for debugging).
    #[default]
    Json,

    /// CBOR format (compact binary, better for high-volume metric feeds).
    Cbor,
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

/// Try to auto-detect the format from the data.
///
/// Returns `Json` if the data starts with `{` or `[`, otherwise `Cbor`.
pub fn detect_format(data: &[u8]) -> Format {
    match data.first() {
        Some(b'{') | Some(b'[') => Format::Json,
        _ => Format::Cbor,
    }
}

/// Decode bytes, auto-detecting the format.
pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let format = detect_format(data);
    decode(data, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{FieldValue, Point};

    fn sample_point() -> Point {
        Point::new("etcd_network")
            .with_tag("instance", "127.0.0.1:2379")
            .with_field("peer_sent_bytes_total", 1024.0)
            .with_field("status", "info")
            .with_timestamp(1_700_000_000_000_000_000)
    }

    #[test]
    fn test_cbor_decodes_to_same_point() {
        let point = sample_point();

        let encoded = encode(&point, Format::Cbor).unwrap();
        let decoded: Point = decode(&encoded, Format::Cbor).unwrap();

        assert_eq!(point, decoded);
    }

    #[test]
    fn test_json_keeps_integer_fields() {
        let point = Point::new("m").with_field("hits", 7i64).with_timestamp(1);

        let encoded = encode(&point, Format::Json).unwrap();
        let decoded: Point = decode(&encoded, Format::Json).unwrap();

        assert_eq!(decoded.field("hits"), Some(&FieldValue::Int(7)));
    }

    #[test]
    fn test_cbor_is_smaller() {
        let point = sample_point();

        let json = encode(&point, Format::Json).unwrap();
        let cbor = encode(&point, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(detect_format(b"{\"key\": \"value\"}"), Format::Json);
        assert_eq!(detect_format(b"[1, 2, 3]"), Format::Json);
        assert_eq!(detect_format(b"\xa1\x63key\x65value"), Format::Cbor);
    }

    #[test]
    fn test_auto_decode() {
        let point = sample_point();

        let cbor = encode(&point, Format::Cbor).unwrap();
        let decoded: Point = decode_auto(&cbor).unwrap();
        assert_eq!(decoded.measurement, "etcd_network");
    }
}
