//! The packet exchanged between a peer and the router.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Leading character of a packet type that asks the router to cancel a stream.
pub const KILL_PREFIX: char = '-';

/// A typed application packet.
///
/// `packet_type` is the routing key, `stream_id` names a long-running
/// exchange (empty for plain packets) and `data` is an opaque payload the
/// router never inspects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    /// Routing key. A leading `-` marks a kill packet.
    #[serde(rename = "type")]
    pub packet_type: String,
    /// Stream identifier, scoped to one connection.
    #[serde(default)]
    pub stream_id: String,
    /// Application payload.
    #[serde(default)]
    pub data: String,
}

impl Packet {
    /// Plain packet without a stream id.
    pub fn new(packet_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            packet_type: packet_type.into(),
            stream_id: String::new(),
            data: data.into(),
        }
    }

    /// Packet that belongs to (or starts) the stream `stream_id`.
    pub fn stream(
        packet_type: impl Into<String>,
        stream_id: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            packet_type: packet_type.into(),
            stream_id: stream_id.into(),
            data: data.into(),
        }
    }

    /// Kill packet cancelling `stream_id` on the receiving connection.
    pub fn kill(packet_type: &str, stream_id: impl Into<String>) -> Self {
        Self {
            packet_type: format!("{KILL_PREFIX}{packet_type}"),
            stream_id: stream_id.into(),
            data: String::new(),
        }
    }

    /// Whether this packet asks for a stream to be cancelled.
    pub fn is_kill(&self) -> bool {
        self.packet_type.starts_with(KILL_PREFIX)
    }

    /// Whether a stream id is set.
    pub fn has_stream_id(&self) -> bool {
        !self.stream_id.is_empty()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packet: type={} stream={} data={}",
            self.packet_type, self.stream_id, self.data
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_no_stream() {
        let p = Packet::new("echo", "x");
        assert_eq!(p.packet_type, "echo");
        assert!(!p.has_stream_id());
        assert!(!p.is_kill());
    }

    #[test]
    fn kill_prefixes_type() {
        let p = Packet::kill("count", "s1");
        assert_eq!(p.packet_type, "-count");
        assert_eq!(p.stream_id, "s1");
        assert!(p.is_kill());
        assert!(p.data.is_empty());
    }

    #[test]
    fn stream_sets_all_fields() {
        let p = Packet::stream("count", "s1", "7");
        assert!(p.has_stream_id());
        assert_eq!(p.data, "7");
    }

    #[test]
    fn json_field_names() {
        let p = Packet::stream("count", "s1", "7");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["type"], "count");
        assert_eq!(v["streamId"], "s1");
        assert_eq!(v["data"], "7");
    }

    #[test]
    fn json_optional_fields_default() {
        let p: Packet = serde_json::from_str(r#"{"type":"echo"}"#).unwrap();
        assert_eq!(p, Packet::new("echo", ""));
    }

    #[test]
    fn json_type_is_required() {
        assert!(serde_json::from_str::<Packet>(r#"{"data":"x"}"#).is_err());
    }

    #[test]
    fn display_lists_fields() {
        let p = Packet::stream("a", "b", "c");
        assert_eq!(p.to_string(), "packet: type=a stream=b data=c");
    }
}
