//! Live feed frame codec
//!
//! Parses the JSON wire format into [`FeedEvent`]s. Decoding is pure; a
//! malformed frame yields a [`DecodeError`] carrying the raw payload and the
//! caller keeps reading the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{FeedEvent, Sample};

/// Longest raw payload kept on a [`DecodeError`]
const MAX_RAW_PREVIEW: usize = 256;

/// A frame that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to decode frame: {reason} (data: {raw})")]
pub struct DecodeError {
    /// What was wrong with the frame
    pub reason: String,
    /// The offending payload, truncated for diagnostics
    pub raw: String,
}

impl DecodeError {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        let raw = if raw.len() > MAX_RAW_PREVIEW {
            let mut end = MAX_RAW_PREVIEW;
            while !raw.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &raw[..end])
        } else {
            raw.to_string()
        };
        Self {
            reason: reason.into(),
            raw,
        }
    }
}

/// Wire representation of an inbound frame
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireFrame {
    Connected {
        vehicle: String,
        metric: String,
    },
    Point {
        timestamp: DateTime<Utc>,
        value: f64,
    },
    Error {
        error: String,
    },
}

impl From<WireFrame> for FeedEvent {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Connected { vehicle, metric } => FeedEvent::Connected {
                vehicle_id: vehicle,
                metric,
            },
            WireFrame::Point { timestamp, value } => FeedEvent::Sample(Sample { timestamp, value }),
            WireFrame::Error { error } => FeedEvent::Error { message: error },
        }
    }
}

impl From<&FeedEvent> for WireFrame {
    fn from(event: &FeedEvent) -> Self {
        match event {
            FeedEvent::Connected { vehicle_id, metric } => WireFrame::Connected {
                vehicle: vehicle_id.clone(),
                metric: metric.clone(),
            },
            FeedEvent::Sample(sample) => WireFrame::Point {
                timestamp: sample.timestamp,
                value: sample.value,
            },
            FeedEvent::Error { message } => WireFrame::Error {
                error: message.clone(),
            },
        }
    }
}

/// Decode a raw frame (text or binary payload)
pub fn decode(raw: &[u8]) -> Result<FeedEvent, DecodeError> {
    match std::str::from_utf8(raw) {
        Ok(text) => decode_str(text),
        Err(_) => Err(DecodeError::new(
            "Invalid UTF-8 in frame",
            &String::from_utf8_lossy(raw),
        )),
    }
}

/// Decode a text frame
pub fn decode_str(raw: &str) -> Result<FeedEvent, DecodeError> {
    serde_json::from_str::<WireFrame>(raw)
        .map(FeedEvent::from)
        .map_err(|e| DecodeError::new(e.to_string(), raw))
}

impl FeedEvent {
    /// Encode the event in the wire format
    pub fn to_frame(&self) -> String {
        // Serializing a tagged enum of strings and numbers cannot fail
        serde_json::to_string(&WireFrame::from(self)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_point() {
        let event =
            decode_str(r#"{"type":"point","timestamp":"2019-06-24T03:16:00Z","value":42.5}"#)
                .unwrap();

        assert_eq!(
            event,
            FeedEvent::Sample(Sample::new(
                Utc.with_ymd_and_hms(2019, 6, 24, 3, 16, 0).unwrap(),
                42.5
            ))
        );
    }

    #[test]
    fn test_decode_point_with_offset_and_integer_value() {
        let event =
            decode_str(r#"{"type":"point","timestamp":"2019-06-24T05:16:00+02:00","value":7}"#)
                .unwrap();

        match event {
            FeedEvent::Sample(sample) => {
                assert_eq!(
                    sample.timestamp,
                    Utc.with_ymd_and_hms(2019, 6, 24, 3, 16, 0).unwrap()
                );
                assert_eq!(sample.value, 7.0);
            }
            other => panic!("expected sample, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_connected() {
        let event = decode(br#"{"type":"connected","vehicle":"B183","metric":"speed"}"#).unwrap();
        assert_eq!(
            event,
            FeedEvent::Connected {
                vehicle_id: "B183".into(),
                metric: "speed".into()
            }
        );
    }

    #[test]
    fn test_decode_error() {
        let event = decode_str(r#"{"type":"error","error":"unsupported metric: rpm"}"#).unwrap();
        assert_eq!(
            event,
            FeedEvent::Error {
                message: "unsupported metric: rpm".into()
            }
        );
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = decode_str(r#"{"type":"bogus"}"#).unwrap_err();
        assert_eq!(err.raw, r#"{"type":"bogus"}"#);
        assert!(err.reason.contains("bogus"));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let err = decode_str(r#"{"type":"point","timestamp":"2019-06-24T03:16:00Z"}"#).unwrap_err();
        assert!(err.reason.contains("value"));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        assert!(decode_str(r#"{"type":"point","timestamp":"yesterday","value":1.0}"#).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_str("not json").is_err());
        assert!(decode(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_long_payload_is_truncated() {
        let raw = format!(r#"{{"type":"error","padding":"{}"#, "x".repeat(1000));
        let err = decode_str(&raw).unwrap_err();
        assert!(err.raw.len() <= MAX_RAW_PREVIEW + 3);
        assert!(err.raw.ends_with("..."));
    }

    #[test]
    fn test_encoded_frame_decodes_to_same_event() {
        let event = FeedEvent::Error {
            message: "database listen error".into(),
        };
        assert_eq!(decode_str(&event.to_frame()).unwrap(), event);
    }
}
