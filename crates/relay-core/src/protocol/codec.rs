//! JSON codec for broker envelopes.
//!
//! Wire format: one JSON object per text frame.
//!
//! ```text
//! {"action":<string>, "destination":<string>?, "<action>":{...}?, ...any other fields}
//! ```
//!
//! The broker only decodes the fields it routes on.  A decoded [`Message`]
//! keeps the exact text it was decoded from, and relay paths re-emit that
//! text unchanged, so fields the broker has never heard of survive a hop.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::{
    Action, ClientConnect, Connect, ConnectionStatus, Payload, Setup, Status,
};

/// Errors that can occur while decoding or encoding an envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame was not a text frame.
    #[error("unsupported frame kind: {0}")]
    UnsupportedFrame(&'static str),

    /// The text was not a JSON object with the expected structure.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An action that requires a payload arrived without one.
    #[error("action '{0}' requires a '{0}' payload")]
    MissingPayload(Action),
}

/// The serde shape of an inbound envelope.
///
/// Payload slots are kept as untyped JSON so that an action the broker does
/// not model may reuse a payload key with any shape.  [`Message::decode`]
/// parses only the slot matching the action.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    action: Action,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    setup: Option<Value>,
    #[serde(default)]
    connect: Option<Value>,
    #[serde(default)]
    client_connect: Option<Value>,
    #[serde(default)]
    connection_status: Option<Value>,
}

/// The serde shape of an outbound envelope built by the broker.
#[derive(Debug, Serialize)]
struct OutEnvelope<'a> {
    action: &'a Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<&'a Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connect: Option<&'a Connect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_connect: Option<&'a ClientConnect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_status: Option<&'a ConnectionStatus>,
}

/// Parses a payload slot that the action requires.
fn required<T: DeserializeOwned>(slot: Option<Value>, action: Action) -> Result<T, CodecError> {
    let value = slot.ok_or(CodecError::MissingPayload(action))?;
    Ok(serde_json::from_value(value)?)
}

/// Parses a payload slot that the action may omit.
fn optional<T: DeserializeOwned>(slot: Option<Value>) -> Result<Option<T>, CodecError> {
    Ok(slot.map(serde_json::from_value).transpose()?)
}

/// A decoded envelope plus, when it came off the wire, its original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    action: Action,
    destination: Option<String>,
    payload: Option<Payload>,
    raw: Option<String>,
}

impl Message {
    /// Creates a payload-less message with the given action.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            destination: None,
            payload: None,
            raw: None,
        }
    }

    /// The setup acknowledgement: `{"action":"ok"}`.
    pub fn ok() -> Self {
        Self::new(Action::Ok)
    }

    /// A `connection_status` reply for a client.
    pub fn status(status: Status) -> Self {
        Self {
            payload: Some(Payload::ConnectionStatus(ConnectionStatus { status })),
            ..Self::new(Action::ConnectionStatus)
        }
    }

    /// A `client_connect` notice for a server.
    pub fn client_connect(name: impl Into<String>, connect: bool) -> Self {
        Self {
            payload: Some(Payload::ClientConnect(ClientConnect {
                name: name.into(),
                connect,
            })),
            ..Self::new(Action::ClientConnect)
        }
    }

    /// A `setup` request.  Used by clients and tests.
    pub fn setup(setup: Setup) -> Self {
        Self {
            payload: Some(Payload::Setup(setup)),
            ..Self::new(Action::Setup)
        }
    }

    /// A `connect` request.  Used by clients and tests.
    pub fn connect(server: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            payload: Some(Payload::Connect(Connect {
                server: server.into(),
                password: password.into(),
            })),
            ..Self::new(Action::Connect)
        }
    }

    /// Sets the routing destination.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// The text this message was decoded from, if it came off the wire.
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// Decodes one text frame.
    ///
    /// Only the payload keyed by the action is kept.  `setup` and `connect`
    /// without their payload are structurally invalid; every other action
    /// decodes even when its payload is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] for text that is not a JSON object
    /// with a string `action`, and [`CodecError::MissingPayload`] as above.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use relay_core::{Action, Message};
    ///
    /// let text = r#"{"action":"startstream","quality":"hd"}"#;
    /// let msg = Message::decode(text.to_string()).unwrap();
    /// assert_eq!(msg.action(), &Action::Other("startstream".into()));
    /// assert_eq!(msg.raw(), Some(text));
    /// ```
    pub fn decode(raw: String) -> Result<Self, CodecError> {
        let envelope: WireEnvelope = serde_json::from_str(&raw)?;

        let payload = match envelope.action {
            Action::Setup => Some(Payload::Setup(required(envelope.setup, Action::Setup)?)),
            Action::Connect => Some(Payload::Connect(required(
                envelope.connect,
                Action::Connect,
            )?)),
            Action::ClientConnect => {
                optional(envelope.client_connect)?.map(Payload::ClientConnect)
            }
            Action::ConnectionStatus => {
                optional(envelope.connection_status)?.map(Payload::ConnectionStatus)
            }
            // Slots belonging to other actions are never parsed.
            Action::Ok | Action::Other(_) => None,
        };

        Ok(Self {
            action: envelope.action,
            destination: envelope.destination,
            payload,
            raw: Some(raw),
        })
    }

    /// Returns the text to put on the wire.
    ///
    /// Messages that came off the wire return their original text untouched;
    /// constructed messages are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if serialization fails.
    pub fn encode(&self) -> Result<Cow<'_, str>, CodecError> {
        if let Some(raw) = &self.raw {
            return Ok(Cow::Borrowed(raw));
        }

        let mut envelope = OutEnvelope {
            action: &self.action,
            destination: self.destination.as_deref(),
            setup: None,
            connect: None,
            client_connect: None,
            connection_status: None,
        };
        match &self.payload {
            Some(Payload::Setup(p)) => envelope.setup = Some(p),
            Some(Payload::Connect(p)) => envelope.connect = Some(p),
            Some(Payload::ClientConnect(p)) => envelope.client_connect = Some(p),
            Some(Payload::ConnectionStatus(p)) => envelope.connection_status = Some(p),
            None => {}
        }
        Ok(Cow::Owned(serde_json::to_string(&envelope)?))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ConnectionType;

    #[test]
    fn test_ok_encodes_to_bare_action() {
        let msg = Message::ok();
        let text = msg.encode().unwrap();
        assert_eq!(text, r#"{"action":"ok"}"#);
    }

    #[test]
    fn test_status_encodes_with_payload_under_action_key() {
        let msg = Message::status(Status::NotConnected);
        let text = msg.encode().unwrap();
        assert_eq!(
            text,
            r#"{"action":"connection_status","connection_status":{"status":"not_connected"}}"#
        );
    }

    #[test]
    fn test_client_connect_encodes_name_and_flag() {
        let msg = Message::client_connect("phone", false);
        let text = msg.encode().unwrap();
        assert_eq!(
            text,
            r#"{"action":"client_connect","client_connect":{"name":"phone","connect":false}}"#
        );
    }

    #[test]
    fn test_decode_setup_extracts_payload() {
        let raw = r#"{"action":"setup","setup":{"type":"server","password":"p","server_password":"s","name":"cam1"}}"#;
        let msg = Message::decode(raw.to_string()).unwrap();
        match msg.payload() {
            Some(Payload::Setup(setup)) => {
                assert_eq!(setup.kind, ConnectionType::Server);
                assert_eq!(setup.name, "cam1");
                assert_eq!(setup.server_password, "s");
            }
            other => panic!("expected setup payload, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_setup_without_payload_is_rejected() {
        let err = Message::decode(r#"{"action":"setup"}"#.to_string()).unwrap_err();
        assert!(matches!(err, CodecError::MissingPayload(Action::Setup)));
    }

    #[test]
    fn test_decode_connect_without_payload_is_rejected() {
        let err = Message::decode(r#"{"action":"connect"}"#.to_string()).unwrap_err();
        assert!(matches!(err, CodecError::MissingPayload(Action::Connect)));
    }

    #[test]
    fn test_decode_ignores_payload_of_other_action() {
        let raw = r#"{"action":"ok","connect":{"server":"cam1"}}"#;
        let msg = Message::decode(raw.to_string()).unwrap();
        assert_eq!(msg.action(), &Action::Ok);
        assert!(msg.payload().is_none());
    }

    #[test]
    fn test_decode_keeps_destination() {
        let raw = r#"{"action":"frame","destination":"phone","data":"AAEC"}"#;
        let msg = Message::decode(raw.to_string()).unwrap();
        assert_eq!(msg.destination(), Some("phone"));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            Message::decode("[1,2,3]".to_string()),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_action() {
        assert!(matches!(
            Message::decode(r#"{"destination":"x"}"#.to_string()),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_of_decoded_message_returns_original_bytes() {
        // Field order and unknown fields must survive exactly.
        let raw = r#"{ "extra": [1, 2], "action" : "volume", "volume": 0.25 }"#;
        let msg = Message::decode(raw.to_string()).unwrap();
        assert_eq!(msg.encode().unwrap(), raw);
    }

    #[test]
    fn test_with_destination_is_serialized() {
        let msg = Message::new(Action::from("ping")).with_destination("phone");
        let text = msg.encode().unwrap();
        assert_eq!(text, r#"{"action":"ping","destination":"phone"}"#);
    }

    #[test]
    fn test_unknown_action_may_reuse_payload_keys_with_any_shape() {
        for raw in [
            r#"{"action":"wifi","connect":true}"#,
            r#"{"action":"config","setup":{"resolution":"hd"}}"#,
            r#"{"action":"volume","client_connect":"x","connection_status":7}"#,
        ] {
            let msg = Message::decode(raw.to_string()).unwrap();
            assert!(matches!(msg.action(), Action::Other(_)));
            assert!(msg.payload().is_none());
            assert_eq!(msg.encode().unwrap(), raw);
        }
    }

    #[test]
    fn test_mistyped_payload_of_modelled_action_is_malformed() {
        let err = Message::decode(r#"{"action":"connect","connect":true}"#.to_string()).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_connect_request_encodes_server_and_password() {
        let msg = Message::connect("cam1", "P");
        let text = msg.encode().unwrap();
        assert_eq!(
            text,
            r#"{"action":"connect","connect":{"server":"cam1","password":"P"}}"#
        );
        let decoded = Message::decode(text.into_owned()).unwrap();
        assert!(matches!(
            decoded.payload(),
            Some(Payload::Connect(c)) if c.server == "cam1" && c.password == "P"
        ));
    }
}
