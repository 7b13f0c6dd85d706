//! Engine.IO v4 packet codec.
//!
//! Every packet is a single type digit followed by an optional text body.
//! Long-polling payloads concatenate packets with [`RECORD_SEPARATOR`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::RECORD_SEPARATOR;
use crate::error::PacketError;

/// Session parameters sent by the server in the `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

impl Handshake {
    /// Whether the server allows upgrading to a WebSocket.
    pub fn offers_websocket(&self) -> bool {
        self.upgrades.iter().any(|u| u == "websocket")
    }

    /// Silence after which the connection is considered dead.
    pub fn ping_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// A single Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    /// Carries an encoded Socket.IO packet.
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Encodes the packet into its text form.
    pub fn encode(&self) -> Result<String, PacketError> {
        let text = match self {
            EnginePacket::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            EnginePacket::Close => "1".into(),
            EnginePacket::Ping(data) => format!("2{}", data.as_deref().unwrap_or_default()),
            EnginePacket::Pong(data) => format!("3{}", data.as_deref().unwrap_or_default()),
            EnginePacket::Message(body) => format!("4{body}"),
            EnginePacket::Upgrade => "5".into(),
            EnginePacket::Noop => "6".into(),
        };
        Ok(text)
    }

    /// Decodes a single packet.
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let body = chars.as_str();
        let data = || (!body.is_empty()).then(|| body.to_string());

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(body)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(data())),
            '3' => Ok(EnginePacket::Pong(data())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            'b' => Err(PacketError::Binary),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    /// Returns `true` for the `3probe` reply of an upgrade probe.
    pub fn is_probe_reply(&self) -> bool {
        matches!(self, EnginePacket::Pong(Some(d)) if d == crate::constants::PROBE_PAYLOAD)
    }
}

/// Splits a long-polling payload into packets.
///
/// Each packet is decoded independently so one bad record does not hide
/// the rest of the batch.
pub fn decode_payload(body: &str) -> Vec<Result<EnginePacket, PacketError>> {
    body.split(RECORD_SEPARATOR)
        .filter(|record| !record.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

/// Joins packets into a long-polling payload.
pub fn encode_payload(packets: &[EnginePacket]) -> Result<String, PacketError> {
    let encoded = packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(encoded.join(&RECORD_SEPARATOR.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN: &str = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    #[test]
    fn decode_open_packet() {
        let packet = EnginePacket::decode(OPEN).unwrap();
        let EnginePacket::Open(handshake) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert!(handshake.offers_websocket());
        assert_eq!(handshake.ping_window(), Duration::from_secs(45));
    }

    #[test]
    fn handshake_without_upgrades() {
        let packet =
            EnginePacket::decode(r#"0{"sid":"s1","pingInterval":1000,"pingTimeout":500}"#).unwrap();
        let EnginePacket::Open(handshake) = packet else {
            panic!("expected open packet");
        };
        assert!(!handshake.offers_websocket());
        assert_eq!(handshake.max_payload, 0);
    }

    #[test]
    fn decode_simple_packets() {
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(None));
        assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
        assert_eq!(
            EnginePacket::decode("40").unwrap(),
            EnginePacket::Message("0".into())
        );
        assert!(EnginePacket::decode("3probe").unwrap().is_probe_reply());
        assert!(!EnginePacket::decode("3").unwrap().is_probe_reply());
    }

    #[test]
    fn decode_rejects_binary_and_unknown() {
        assert!(matches!(
            EnginePacket::decode("bAQID"),
            Err(PacketError::Binary)
        ));
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(PacketError::UnknownType('9'))
        ));
        assert!(matches!(EnginePacket::decode(""), Err(PacketError::Empty)));
    }

    #[test]
    fn encode_probe_and_upgrade() {
        let probe = EnginePacket::Ping(Some("probe".into()));
        assert_eq!(probe.encode().unwrap(), "2probe");
        assert_eq!(EnginePacket::Upgrade.encode().unwrap(), "5");
        assert_eq!(
            EnginePacket::Message("2[\"ping\"]".into()).encode().unwrap(),
            "42[\"ping\"]"
        );
    }

    #[test]
    fn payload_splits_on_record_separator() {
        let body = "2\u{1e}42[\"casinoOdds\",{}]\u{1e}6";
        let packets: Vec<_> = decode_payload(body)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            packets,
            vec![
                EnginePacket::Ping(None),
                EnginePacket::Message("2[\"casinoOdds\",{}]".into()),
                EnginePacket::Noop,
            ]
        );
    }

    #[test]
    fn payload_keeps_good_records_around_a_bad_one() {
        let results = decode_payload("2\u{1e}x\u{1e}3");
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn encode_payload_joins_packets() {
        let body = encode_payload(&[EnginePacket::Pong(None), EnginePacket::Message("1".into())])
            .unwrap();
        assert_eq!(body, "3\u{1e}41");
    }
}
