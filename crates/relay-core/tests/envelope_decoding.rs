//! Integration tests for the relay-core envelope codec.
//!
//! These tests go through the public API only and cover the frames the broker
//! actually sees in a session: setup, connect, relayed application messages,
//! and the replies the broker builds itself.

use relay_core::{
    Action, CodecError, ConnectionType, Message, PasswordDigest, Payload, Setup, Status,
};

fn decode(text: &str) -> Message {
    Message::decode(text.to_string()).expect("decode must succeed")
}

#[test]
fn test_client_setup_frame_decodes_to_client_role() {
    let msg = decode(r#"{"action":"setup","setup":{"type":"client","password":"test123","name":"phone"}}"#);

    assert_eq!(msg.action(), &Action::Setup);
    let Some(Payload::Setup(setup)) = msg.payload() else {
        panic!("setup payload expected");
    };
    assert_eq!(setup.kind, ConnectionType::Client);
    assert!(PasswordDigest::of("test123").verify(&setup.password));
}

#[test]
fn test_setup_with_unknown_type_still_decodes() {
    // The state machine decides what to do with an unknown role; the codec
    // must not reject it.
    let msg = decode(r#"{"action":"setup","setup":{"type":"toaster"}}"#);
    let Some(Payload::Setup(setup)) = msg.payload() else {
        panic!("setup payload expected");
    };
    assert_eq!(setup.kind, ConnectionType::Unknown);
}

#[test]
fn test_connect_frame_carries_server_and_password() {
    let msg = decode(r#"{"action":"connect","connect":{"server":"cam1","password":"P"}}"#);
    let Some(Payload::Connect(connect)) = msg.payload() else {
        panic!("connect payload expected");
    };
    assert_eq!(connect.server, "cam1");
    assert_eq!(connect.password, "P");
}

#[test]
fn test_relayed_frame_is_reemitted_byte_for_byte() {
    let text = r#"{"action":"audio","audio":{"data":"AAECAw==","pts":1234},"destination":"phone"}"#;
    let msg = decode(text);

    assert_eq!(msg.action(), &Action::Other("audio".to_string()));
    assert_eq!(msg.destination(), Some("phone"));
    assert_eq!(msg.encode().expect("encode").as_ref(), text);
}

#[test]
fn test_constructed_setup_decodes_back_to_same_payload() {
    let setup = Setup {
        kind: ConnectionType::Server,
        password: "space".to_string(),
        server_password: "server".to_string(),
        name: "cam1".to_string(),
    };
    let text = Message::setup(setup.clone()).encode().expect("encode").into_owned();

    let decoded = decode(&text);
    assert_eq!(decoded.payload(), Some(&Payload::Setup(setup)));
}

#[test]
fn test_broker_replies_are_decodable_by_peers() {
    for status in [
        Status::Connected,
        Status::ServerNotFound,
        Status::NotConnected,
        Status::NameConflict,
        Status::ServerDisappeared,
    ] {
        let text = Message::status(status).encode().expect("encode").into_owned();
        let decoded = decode(&text);
        match decoded.payload() {
            Some(Payload::ConnectionStatus(s)) => assert_eq!(s.status, status),
            other => panic!("status payload expected, got {other:?}"),
        }
    }
}

#[test]
fn test_garbage_text_is_malformed() {
    let err = Message::decode("not json at all".to_string()).unwrap_err();
    assert!(matches!(err, CodecError::Malformed(_)));
}
