//! Socket.IO v5 packet codec.
//!
//! Packets travel inside Engine.IO `message` packets and have the form
//! `<type>[<namespace>,][<ack id>][<json>]`. The default namespace `/` is
//! never written out.

use serde_json::Value;

use crate::constants::DEFAULT_NAMESPACE;
use crate::error::PacketError;

/// A decoded Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// CONNECT for the default namespace carrying an auth payload.
    pub fn connect(auth: Option<Value>) -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.into(),
            data: auth,
        }
    }

    /// DISCONNECT for the default namespace.
    pub fn disconnect() -> Self {
        SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.into(),
        }
    }

    /// EVENT `[name, payload]` for the default namespace.
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        let args = match payload {
            Value::Null => Vec::new(),
            other => vec![other],
        };
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.into(),
            id: None,
            name: name.into(),
            args,
        }
    }

    /// Namespace the packet belongs to.
    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Encodes the packet into its text form.
    pub fn encode(&self) -> Result<String, PacketError> {
        let mut out = String::new();
        match self {
            SocketPacket::Connect { namespace, data } => {
                out.push('0');
                push_namespace(&mut out, namespace, data.is_some());
                if let Some(data) = data {
                    out.push_str(&serde_json::to_string(data)?);
                }
            }
            SocketPacket::Disconnect { namespace } => {
                out.push('1');
                push_namespace(&mut out, namespace, false);
            }
            SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            } => {
                out.push('2');
                push_namespace(&mut out, namespace, true);
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                out.push_str(&serde_json::to_string(&array)?);
            }
            SocketPacket::Ack {
                namespace,
                id,
                args,
            } => {
                out.push('3');
                push_namespace(&mut out, namespace, true);
                out.push_str(&id.to_string());
                out.push_str(&serde_json::to_string(args)?);
            }
            SocketPacket::ConnectError { namespace, data } => {
                out.push('4');
                push_namespace(&mut out, namespace, data.is_some());
                if let Some(data) = data {
                    out.push_str(&serde_json::to_string(data)?);
                }
            }
        }
        Ok(out)
    }

    /// Decodes a packet from the body of an Engine.IO message.
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(PacketError::Binary);
        }

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let ns = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or_default();
            ns
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|e| PacketError::Malformed(format!("ack id: {e}")))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(items)) => items,
                    _ => return Err(PacketError::Malformed("event without array".into())),
                };
                if args.is_empty() {
                    return Err(PacketError::Malformed("event without name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(PacketError::Malformed(format!(
                            "event name is not a string: {other}"
                        )));
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| PacketError::Malformed("ack without id".into()))?;
                let args = match data {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                Ok(SocketPacket::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            '4' => Ok(SocketPacket::ConnectError { namespace, data }),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

/// Writes a non-default namespace, followed by a comma when more follows.
fn push_namespace(out: &mut String, namespace: &str, more: bool) {
    if namespace != DEFAULT_NAMESPACE {
        out.push_str(namespace);
        if more {
            out.push(',');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_connect_with_auth() {
        let packet = SocketPacket::connect(Some(json!({"token": "abc"})));
        assert_eq!(packet.encode().unwrap(), r#"0{"token":"abc"}"#);
    }

    #[test]
    fn encode_disconnect_default_namespace() {
        assert_eq!(SocketPacket::disconnect().encode().unwrap(), "1");
    }

    #[test]
    fn encode_event_with_payload() {
        let packet = SocketPacket::event("joinRoom", json!({"room": "teen20"}));
        assert_eq!(
            packet.encode().unwrap(),
            r#"2["joinRoom",{"room":"teen20"}]"#
        );
    }

    #[test]
    fn encode_event_without_payload() {
        let packet = SocketPacket::event("logout", Value::Null);
        assert_eq!(packet.encode().unwrap(), r#"2["logout"]"#);
    }

    #[test]
    fn decode_connect_ack() {
        let packet = SocketPacket::decode(r#"0{"sid":"oSO0OpakMV_3jnilAAAA"}"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Connect {
                namespace: "/".into(),
                data: Some(json!({"sid": "oSO0OpakMV_3jnilAAAA"})),
            }
        );
    }

    #[test]
    fn decode_event_with_namespace_and_ack_id() {
        let packet = SocketPacket::decode(r#"2/admin,12["casinoOdds",{"room":"teen20"}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/admin".into(),
                id: Some(12),
                name: "casinoOdds".into(),
                args: vec![json!({"room": "teen20"})],
            }
        );
    }

    #[test]
    fn decode_connect_error() {
        let packet = SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap();
        assert!(matches!(packet, SocketPacket::ConnectError { data: Some(_), .. }));
    }

    #[test]
    fn decode_disconnect_namespace_without_comma() {
        let packet = SocketPacket::decode("1/admin").unwrap();
        assert_eq!(
            packet,
            SocketPacket::Disconnect {
                namespace: "/admin".into()
            }
        );
        assert_eq!(packet.namespace(), "/admin");
        assert_eq!(SocketPacket::disconnect().namespace(), "/");
    }

    #[test]
    fn decode_rejects_bad_events() {
        assert!(SocketPacket::decode("2{}").is_err());
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode("2[42]").is_err());
        assert!(matches!(
            SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#),
            Err(PacketError::Binary)
        ));
    }

    #[test]
    fn decode_ack() {
        let packet = SocketPacket::decode(r#"37["ok"]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Ack {
                namespace: "/".into(),
                id: 7,
                args: vec![json!("ok")],
            }
        );
    }
}
