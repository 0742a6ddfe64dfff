//! Unit tests for the envelope JSON codec.

use fleet_broker::models::envelope::{ContentKind, Envelope, MessageKind};
use fleet_broker::models::session::SessionId;
use fleet_broker::protocol::codec;
use fleet_broker::AppError;

const LIMIT: usize = 2048;

fn expect_protocol_error(wire: &str, needle: &str) {
    match codec::parse(wire, LIMIT) {
        Err(AppError::Protocol(msg)) => {
            assert!(msg.contains(needle), "{msg:?} should mention {needle:?}");
        }
        other => panic!("expected protocol error mentioning {needle:?}, got {other:?}"),
    }
}

#[test]
fn command_envelope_parses() {
    let wire = r#"{"type":"COMMAND","selectedClient":"cli1","payload":"ls -la","source":"FRONTEND","destination":"MAIN"}"#;
    let env = codec::parse(wire, LIMIT).expect("valid command");

    assert_eq!(env.kind, MessageKind::Command);
    assert_eq!(env.target_session.as_deref(), Some("cli1"));
    assert_eq!(env.payload.as_deref(), Some("ls -la"));
    assert_eq!(env.source.as_deref(), Some("FRONTEND"));
    assert_eq!(env.destination.as_deref(), Some("MAIN"));
    assert_eq!(env.content, None);
    assert_eq!(env.payload_size, None);
}

#[test]
fn every_message_kind_is_recognised() {
    for kind in MessageKind::ALL {
        let wire = if kind == MessageKind::Command {
            format!(r#"{{"type":"{kind}","selectedClient":"cli1","payload":"x"}}"#)
        } else {
            format!(r#"{{"type":"{kind}"}}"#)
        };
        let env = codec::parse(&wire, LIMIT).expect("known kind");
        assert_eq!(env.kind, kind);
    }
}

#[test]
fn kind_strings_round_trip() {
    for kind in MessageKind::ALL {
        assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
    }
    for content in ContentKind::ALL {
        assert_eq!(content.as_str().parse::<ContentKind>().unwrap(), content);
    }
    assert_eq!(MessageKind::SelectClient.as_str(), "SELECT_CLIENT");
    assert_eq!(MessageKind::ListUpdate.as_str(), "LIST_UPDATE");
    assert_eq!(ContentKind::CmdOutput.as_str(), "CMD_OUTPUT");
}

#[test]
fn unknown_type_is_rejected() {
    expect_protocol_error(r#"{"type":"BOGUS"}"#, "unknown message type");
}

#[test]
fn lowercase_type_is_rejected() {
    expect_protocol_error(r#"{"type":"command"}"#, "unknown message type");
}

#[test]
fn missing_or_non_string_type_is_rejected() {
    expect_protocol_error(r#"{"payload":"x"}"#, "type");
    expect_protocol_error(r#"{"type":7}"#, "type");
}

#[test]
fn unknown_content_is_rejected() {
    expect_protocol_error(r#"{"type":"REQUEST","content":"SCREENSHOT"}"#, "unknown content type");
}

#[test]
fn malformed_and_non_object_json_is_rejected() {
    expect_protocol_error("{not json", "malformed json");
    expect_protocol_error(r#"["COMMAND"]"#, "json object");
    expect_protocol_error("", "malformed json");
}

#[test]
fn payload_over_limit_is_rejected() {
    let payload = "a".repeat(LIMIT + 1);
    let wire = format!(r#"{{"type":"COMMAND","selectedClient":"cli1","payload":"{payload}"}}"#);
    expect_protocol_error(&wire, "payload exceeds limit");
}

#[test]
fn payload_at_limit_is_accepted() {
    let payload = "a".repeat(LIMIT);
    let wire = format!(r#"{{"type":"COMMAND","selectedClient":"cli1","payload":"{payload}"}}"#);
    let env = codec::parse(&wire, LIMIT).expect("payload at the limit");
    assert_eq!(env.payload.map(|p| p.len()), Some(LIMIT));
}

#[test]
fn oversized_declared_size_alone_is_advisory() {
    let wire = r#"{"type":"BEACON","payload":"hi","payload_size":999999}"#;
    let env = codec::parse(wire, LIMIT).expect("declared size is not enforced");
    assert_eq!(env.payload_size, Some(999_999));
}

#[test]
fn command_without_target_or_payload_is_rejected() {
    expect_protocol_error(r#"{"type":"COMMAND","payload":"ls"}"#, "selectedClient");
    expect_protocol_error(r#"{"type":"COMMAND","selectedClient":"cli1"}"#, "payload");
    expect_protocol_error(
        r#"{"type":"COMMAND","selectedClient":"","payload":"ls"}"#,
        "selectedClient",
    );
    expect_protocol_error(
        r#"{"type":"COMMAND","selectedClient":"cli1","payload":""}"#,
        "payload",
    );
}

#[test]
fn non_string_optional_fields_read_as_absent() {
    let wire = r#"{"type":"BEACON","source":42,"payload":null,"client_size":"four"}"#;
    let env = codec::parse(wire, LIMIT).expect("valid beacon");
    assert_eq!(env.source, None);
    assert_eq!(env.payload, None);
    assert_eq!(env.client_size, None);
}

#[test]
fn serialize_omits_absent_fields() {
    let wire = codec::serialize(&Envelope::new(MessageKind::Beacon)).expect("encode");
    assert_eq!(wire, r#"{"type":"BEACON"}"#);
}

#[test]
fn response_round_trips() {
    let id = SessionId::parse("cli1").unwrap();
    let original = Envelope::response("MAIN", "FRONTEND", &id, "total 0\n");
    let wire = codec::serialize(&original).expect("encode");
    let decoded = codec::parse(&wire, LIMIT).expect("decode");
    assert_eq!(decoded, original);
}

/// Well-formed wire envelopes: each must come back from parse then
/// serialize as the same JSON document.
const WIRE_ENVELOPES: &[&str] = &[
    r#"{"type":"CONNECT"}"#,
    r#"{"type":"CONNECT","source":"FRONTEND","destination":"MAIN"}"#,
    r#"{"type":"BEACON","source":"cli3","client_size":4}"#,
    r#"{"type":"BEACON"}"#,
    r#"{"type":"DISCONNECT","source":"FRONTEND"}"#,
    r#"{"type":"DISCONNECT","selectedClient":"cli2","destination":"MAIN"}"#,
    r#"{"type":"REQUEST","content":"CONNECTION_LIST","source":"FRONTEND","destination":"MAIN"}"#,
    r#"{"type":"REQUEST","content":"CMD_OUTPUT"}"#,
    r#"{"type":"REQUEST"}"#,
    r#"{"type":"RESPONSE","content":"CMD_OUTPUT","source":"MAIN","destination":"FRONTEND","selectedClient":"cli1","payload":"total 0\n"}"#,
    r#"{"type":"RESPONSE","payload":"","payload_size":0}"#,
    r#"{"type":"SELECT_CLIENT","selectedClient":"cli7"}"#,
    r#"{"type":"SELECT_CLIENT","source":"FRONTEND","destination":"MAIN","selectedClient":"cli7","payload":"focus"}"#,
    r#"{"type":"COMMAND","selectedClient":"cli1","payload":"ls -la"}"#,
    r#"{"type":"COMMAND","content":"CMD_OUTPUT","source":"FRONTEND","destination":"MAIN","selectedClient":"cli12","payload":"uname -a","payload_size":8}"#,
    r#"{"type":"LIST_UPDATE","content":"CONNECTION_LIST","source":"MAIN","destination":"FRONTEND","payload":"[{\"id\":\"cli1\",\"ip\":\"10.0.0.1\"}]","client_size":1}"#,
    r#"{"type":"LIST_UPDATE","content":"CONNECTION_LIST","payload":"[]","client_size":0}"#,
    r#"{"type":"LIST_UPDATE"}"#,
];

#[test]
fn wire_envelopes_survive_parse_then_serialize() {
    let mut kinds_seen = Vec::new();
    for wire in WIRE_ENVELOPES {
        let parsed = codec::parse(wire, LIMIT)
            .unwrap_or_else(|err| panic!("{wire} should parse: {err}"));
        kinds_seen.push(parsed.kind);

        let rendered = codec::serialize(&parsed).expect("encode");
        let original: serde_json::Value = serde_json::from_str(wire).expect("table is json");
        let echoed: serde_json::Value = serde_json::from_str(&rendered).expect("output is json");
        assert_eq!(echoed, original, "{wire} changed on the way through");
    }

    for kind in MessageKind::ALL {
        assert!(kinds_seen.contains(&kind), "no table entry for {kind}");
    }
}

#[test]
fn serialized_payload_is_json_escaped() {
    let id = SessionId::parse("cli1").unwrap();
    let env = Envelope::response("MAIN", "FRONTEND", &id, "say \"hi\"\n\tdone\\");
    let wire = codec::serialize(&env).expect("encode");
    let value: serde_json::Value = serde_json::from_str(&wire).expect("valid json");
    assert_eq!(value["payload"], "say \"hi\"\n\tdone\\");
}
