//! Wire codecs between raw frames and [`Packet`]s.
//!
//! Two formats are supported:
//!
//! - **JSON**: `{"type":"..","streamId":"..","data":".."}`
//! - **Delimited**: `<lenType>:<lenStreamID>:<type><streamId><data>`, where the
//!   lengths are decimal byte counts. Only the first two delimiters are
//!   structural, so the delimiter may appear anywhere inside the fields.
//!
//! Codecs are pure: no I/O, no state between calls.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{CodecError, DecodeError};
use crate::packet::Packet;

/// Delimiter used by [`DelimitedCodec::default`].
pub const DEFAULT_DELIMITER: &str = ":";

/// Bidirectional transform between a frame and a [`Packet`].
pub trait PacketCodec: Send + Sync {
    /// Short name used in logs (`"json"`, `"delimited"`).
    fn name(&self) -> &'static str;

    /// Encode a packet into a frame.
    fn encode(&self, packet: &Packet) -> Vec<u8>;

    /// Decode a frame into a packet.
    fn decode(&self, bytes: &[u8]) -> Result<Packet, DecodeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON
// ─────────────────────────────────────────────────────────────────────────────

/// Structural JSON encoding of the three packet fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl PacketCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, packet: &Packet) -> Vec<u8> {
        serde_json::to_vec(packet).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize packet");
            Vec::new()
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delimited
// ─────────────────────────────────────────────────────────────────────────────

/// Length-prefixed delimited encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelimitedCodec {
    delimiter: String,
}

impl DelimitedCodec {
    /// Create a codec using `delimiter` between the length prefixes.
    ///
    /// The delimiter must be non-empty and free of ASCII digits.
    pub fn new(delimiter: impl Into<String>) -> Result<Self, CodecError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(CodecError::EmptyDelimiter);
        }
        if delimiter.bytes().any(|b| b.is_ascii_digit()) {
            return Err(CodecError::DigitDelimiter(delimiter));
        }
        Ok(Self { delimiter })
    }

    /// The configured delimiter.
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }
}

impl Default for DelimitedCodec {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_owned(),
        }
    }
}

impl PacketCodec for DelimitedCodec {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn encode(&self, packet: &Packet) -> Vec<u8> {
        let d = &self.delimiter;
        let mut out = format!(
            "{}{d}{}{d}",
            packet.packet_type.len(),
            packet.stream_id.len()
        );
        out.reserve(packet.packet_type.len() + packet.stream_id.len() + packet.data.len());
        out.push_str(&packet.packet_type);
        out.push_str(&packet.stream_id);
        out.push_str(&packet.data);
        out.into_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, DecodeError> {
        let delimiter = self.delimiter.as_bytes();
        let (type_len, rest) =
            split_once(bytes, delimiter).ok_or(DecodeError::MissingDelimiter)?;
        let (stream_len, body) =
            split_once(rest, delimiter).ok_or(DecodeError::MissingDelimiter)?;

        let type_len = parse_len(type_len, "type")?;
        let stream_len = parse_len(stream_len, "stream id")?;
        let header_len = type_len
            .checked_add(stream_len)
            .ok_or(DecodeError::LengthOverflow)?;
        if body.len() < header_len {
            return Err(DecodeError::Truncated {
                expected: header_len,
                actual: body.len(),
            });
        }

        let (packet_type, rest) = body.split_at(type_len);
        let (stream_id, data) = rest.split_at(stream_len);
        Ok(Packet {
            packet_type: utf8_field(packet_type, "type")?,
            stream_id: utf8_field(stream_id, "stream id")?,
            data: utf8_field(data, "data")?,
        })
    }
}

/// Split at the first occurrence of `needle`. `needle` must be non-empty.
fn split_once<'a>(haystack: &'a [u8], needle: &[u8]) -> Option<(&'a [u8], &'a [u8])> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| (&haystack[..i], &haystack[i + needle.len()..]))
}

fn parse_len(raw: &[u8], field: &'static str) -> Result<usize, DecodeError> {
    let text =
        std::str::from_utf8(raw).map_err(|source| DecodeError::InvalidUtf8 { field, source })?;
    text.parse::<usize>()
        .map_err(|source| DecodeError::InvalidLength { field, source })
}

fn utf8_field(raw: &[u8], field: &'static str) -> Result<String, DecodeError> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|source| DecodeError::InvalidUtf8 { field, source })
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which codec a router uses for all of its connections.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CodecConfig {
    /// [`JsonCodec`].
    #[default]
    Json,
    /// [`DelimitedCodec`] with the given delimiter.
    Delimited {
        /// Delimiter between the length prefixes.
        #[serde(default = "default_delimiter")]
        delimiter: String,
    },
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_owned()
}

impl CodecConfig {
    /// Delimited codec with the default `:` delimiter.
    pub fn delimited() -> Self {
        Self::Delimited {
            delimiter: default_delimiter(),
        }
    }

    /// Build the configured codec.
    pub fn build(&self) -> Result<Arc<dyn PacketCodec>, CodecError> {
        match self {
            Self::Json => Ok(Arc::new(JsonCodec)),
            Self::Delimited { delimiter } => Ok(Arc::new(DelimitedCodec::new(delimiter.clone())?)),
        }
    }
}

impl fmt::Display for CodecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Delimited { delimiter } => write!(f, "delimited[{delimiter}]"),
        }
    }
}

impl FromStr for CodecConfig {
    type Err = String;

    /// Accepts `json`, `delimited`, or `delimited:<delimiter>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "delimited" => Ok(Self::delimited()),
            _ => match s.split_once(':') {
                Some((kind, delimiter)) if kind.eq_ignore_ascii_case("delimited") => {
                    let codec = DelimitedCodec::new(delimiter).map_err(|e| e.to_string())?;
                    Ok(Self::Delimited {
                        delimiter: codec.delimiter,
                    })
                }
                _ => Err(format!("unknown codec '{s}' (expected json or delimited)")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delimited() -> DelimitedCodec {
        DelimitedCodec::default()
    }

    #[test]
    fn delimited_blank() {
        let p = Packet::default();
        assert_eq!(delimited().encode(&p), b"0:0:");
        assert_eq!(delimited().decode(b"0:0:").unwrap(), p);
    }

    #[test]
    fn delimited_no_stream() {
        let p = Packet::new("test", "hooray");
        assert_eq!(delimited().encode(&p), b"4:0:testhooray");
        assert_eq!(delimited().decode(&delimited().encode(&p)).unwrap(), p);
    }

    #[test]
    fn delimited_with_delimiter_in_fields() {
        let p = Packet::stream("BB::B", "AA:A", "CCC");
        assert_eq!(delimited().encode(&p), b"5:4:BB::BAA:ACCC");
        assert_eq!(delimited().decode(&delimited().encode(&p)).unwrap(), p);
    }

    #[test]
    fn delimited_colon_in_data() {
        let p = delimited().decode(b"4:2:echos1a:b:c").unwrap();
        assert_eq!(p, Packet::stream("echo", "s1", "a:b:c"));
    }

    #[test]
    fn delimited_multibyte_delimiter() {
        let codec = DelimitedCodec::new("||").unwrap();
        let p = Packet::stream("t|", "||", "d");
        let bytes = codec.encode(&p);
        assert_eq!(bytes, b"2||2||t|||d");
        assert_eq!(codec.decode(&bytes).unwrap(), p);
    }

    #[test]
    fn delimited_missing_delimiter() {
        assert!(matches!(
            delimited().decode(b"4"),
            Err(DecodeError::MissingDelimiter)
        ));
        assert!(matches!(
            delimited().decode(b"4:0"),
            Err(DecodeError::MissingDelimiter)
        ));
    }

    #[test]
    fn delimited_bad_length() {
        assert!(matches!(
            delimited().decode(b"x:0:test"),
            Err(DecodeError::InvalidLength { field: "type", .. })
        ));
        assert!(matches!(
            delimited().decode(b"4:-1:test"),
            Err(DecodeError::InvalidLength {
                field: "stream id",
                ..
            })
        ));
    }

    #[test]
    fn delimited_too_short() {
        let err = delimited().decode(b"4:3:test").unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                expected: 7,
                actual: 4
            }
        ));
    }

    #[test]
    fn delimited_length_overflow() {
        let frame = format!("{}:1:x", usize::MAX);
        assert!(matches!(
            delimited().decode(frame.as_bytes()),
            Err(DecodeError::LengthOverflow)
        ));
    }

    #[test]
    fn delimited_length_splitting_a_char_is_an_error() {
        // "é" is two bytes; a type length of 1 cuts it in half.
        let frame = "1:0:é".as_bytes();
        assert!(matches!(
            delimited().decode(frame),
            Err(DecodeError::InvalidUtf8 { field: "type", .. })
        ));
    }

    #[test]
    fn delimited_rejects_empty_delimiter() {
        assert_eq!(
            DelimitedCodec::new("").unwrap_err(),
            CodecError::EmptyDelimiter
        );
    }

    #[test]
    fn delimited_rejects_digit_delimiter() {
        for delim in ["0", "9", ":1", "a5b"] {
            assert_eq!(
                DelimitedCodec::new(delim).unwrap_err(),
                CodecError::DigitDelimiter(delim.to_owned())
            );
        }
        let cfg = CodecConfig::Delimited {
            delimiter: "0".into(),
        };
        assert!(matches!(cfg.build(), Err(CodecError::DigitDelimiter(_))));
        assert!("delimited:0".parse::<CodecConfig>().is_err());
        assert!("delimited:".parse::<CodecConfig>().is_err());
    }

    #[test]
    fn long_type_with_non_digit_delimiter_round_trips() {
        let codec = DelimitedCodec::new("x").unwrap();
        let p = Packet::stream("abcdefghij", "", "x");
        assert_eq!(codec.encode(&p), b"10x0xabcdefghijx".to_vec());
        assert_eq!(codec.decode(&codec.encode(&p)).unwrap(), p);
    }

    #[test]
    fn json_blank_round_trip() {
        let p = Packet::default();
        assert_eq!(JsonCodec.decode(&JsonCodec.encode(&p)).unwrap(), p);
    }

    #[test]
    fn json_with_delimiter() {
        let p = Packet::stream("BB::B", "AA:A", "CCC");
        assert_eq!(JsonCodec.decode(&JsonCodec.encode(&p)).unwrap(), p);
    }

    #[test]
    fn json_rejects_non_packet() {
        assert!(JsonCodec.decode(br#""this-is-not-a-packet-at-all""#).is_err());
        assert!(JsonCodec.decode(b"{not json").is_err());
    }

    #[test]
    fn codec_names() {
        assert_eq!(JsonCodec.name(), "json");
        assert_eq!(delimited().name(), "delimited");
    }

    #[test]
    fn config_defaults_to_json() {
        assert_eq!(CodecConfig::default(), CodecConfig::Json);
        assert_eq!(CodecConfig::default().build().unwrap().name(), "json");
    }

    #[test]
    fn config_serde_shape() {
        let cfg: CodecConfig = serde_json::from_str(r#"{"kind":"delimited"}"#).unwrap();
        assert_eq!(cfg, CodecConfig::delimited());
        let json = serde_json::to_value(CodecConfig::Json).unwrap();
        assert_eq!(json["kind"], "json");
    }

    #[test]
    fn config_build_rejects_empty_delimiter() {
        let cfg = CodecConfig::Delimited {
            delimiter: String::new(),
        };
        assert!(cfg.build().is_err());
    }

    #[test]
    fn config_from_str() {
        assert_eq!("json".parse::<CodecConfig>().unwrap(), CodecConfig::Json);
        assert_eq!(
            "Delimited".parse::<CodecConfig>().unwrap(),
            CodecConfig::delimited()
        );
        assert_eq!(
            "delimited:|".parse::<CodecConfig>().unwrap(),
            CodecConfig::Delimited {
                delimiter: "|".into()
            }
        );
        assert!("xml".parse::<CodecConfig>().is_err());
    }

    #[test]
    fn config_display() {
        assert_eq!(CodecConfig::Json.to_string(), "json");
        assert_eq!(CodecConfig::delimited().to_string(), "delimited[:]");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn packet() -> impl Strategy<Value = Packet> {
            (".{0,12}", "[a-z:|]{0,8}", ".{0,32}").prop_map(|(t, s, d)| Packet::stream(t, s, d))
        }

        proptest! {
            #[test]
            fn delimited_round_trip(p in packet(), delim in "[^0-9]{1,4}") {
                let codec = DelimitedCodec::new(delim).unwrap();
                prop_assert_eq!(codec.decode(&codec.encode(&p)).unwrap(), p);
            }

            #[test]
            fn json_round_trip(p in packet()) {
                prop_assert_eq!(JsonCodec.decode(&JsonCodec.encode(&p)).unwrap(), p);
            }

            #[test]
            fn delimited_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
                let _ = DelimitedCodec::default().decode(&bytes);
            }
        }
    }
}
