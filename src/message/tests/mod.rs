use bytes::Bytes;
use rstest::*;

use raft::message::{
    AppendEntriesReq, AppendEntriesResp, LogEntry, LogIndex, Message, RequestVoteReq,
    RequestVoteResp, Rpc, TermId,
};

use crate::protocol::{Parsed, Resp, RespParser};

use super::*;

fn s(value: &'static str) -> Resp {
    Resp::from(value)
}

fn i(value: i64) -> Resp {
    Resp::Integer(value)
}

fn envelope(kind: &'static str, body: Vec<Resp>) -> Resp {
    Resp::Array(vec![s("type"), s(kind), s("msg"), Resp::Array(body)])
}

fn vote_resp(body: Vec<Resp>) -> Resp {
    envelope("RequestVoteResp", body)
}

fn append_req(entries: Vec<LogEntry>) -> Message {
    Message {
        term: TermId::new(9),
        rpc: Rpc::AppendEntriesReq(AppendEntriesReq {
            leader_id: "L".to_string(),
            prev_log_index: LogIndex::new(1),
            prev_log_term: TermId::new(2),
            leader_commit: LogIndex::new(3),
            entries,
        }),
    }
}

fn round_trip(frame: Frame) {
    let bytes = frame.to_bytes();
    let mut parser = RespParser::new(1024);
    match parser.feed(&bytes) {
        Ok(Parsed::Value(resp)) => assert_eq!(Frame::decode(resp), Ok(frame)),
        other => panic!("unexpected parse result {:?}", other),
    }
    assert_eq!(parser.buffered(), 0);
}

#[test]
fn append_entries_request_round_trip() {
    let message = append_req(vec![
        LogEntry::binary(TermId::new(4), LogIndex::new(5), Bytes::from_static(&[0xAA, 0xBB])),
        LogEntry::text(TermId::new(6), LogIndex::new(7), "ccdd"),
    ]);
    round_trip(Frame::Raft(message));
}

#[test]
fn every_kind_round_trips() {
    let messages = vec![
        append_req(vec![]),
        Message {
            term: TermId::new(0),
            rpc: Rpc::AppendEntriesResp(AppendEntriesResp { success: false }),
        },
        Message {
            term: TermId::new(3),
            rpc: Rpc::RequestVoteReq(RequestVoteReq {
                candidate_id: "127.0.0.1:7001".to_string(),
                last_log_index: LogIndex::new(0),
                last_log_term: TermId::new(0),
            }),
        },
        Message {
            term: TermId::new(u32::max_value() as u64),
            rpc: Rpc::RequestVoteResp(RequestVoteResp { vote_granted: true }),
        },
    ];
    for message in messages {
        round_trip(Frame::from(message));
    }
    round_trip(Frame::Identity("127.0.0.1:7002".to_string()));
}

#[test]
fn text_payload_is_carried_verbatim() {
    let frame = Frame::Raft(append_req(vec![LogEntry::text(
        TermId::new(1),
        LogIndex::new(2),
        "set a 1",
    )]));
    let bytes = frame.to_bytes();
    let needle: &[u8] = b"$4\r\ndata\r\n$7\r\nset a 1\r\n";
    assert!(bytes.windows(needle.len()).any(|window| window == needle));

    let frame = Frame::Raft(append_req(vec![LogEntry::binary(
        TermId::new(1),
        LogIndex::new(2),
        Bytes::from_static(&[0xAA, 0xBB]),
    )]));
    let bytes = frame.to_bytes();
    let needle: &[u8] = b"$4\r\ndata\r\n$4\r\nqrs=\r\n";
    assert!(bytes.windows(needle.len()).any(|window| window == needle));
}

#[test]
fn exact_wire_bytes() {
    let frame = Frame::Raft(Message {
        term: TermId::new(3),
        rpc: Rpc::AppendEntriesResp(AppendEntriesResp { success: true }),
    });
    assert_eq!(
        &frame.to_bytes()[..],
        &b"*4\r\n$4\r\ntype\r\n$17\r\nAppendEntriesResp\r\n$3\r\nmsg\r\n*4\r\n$4\r\nterm\r\n:3\r\n$7\r\nsuccess\r\n:1\r\n"[..]
    );
}

#[test]
fn keys_may_come_in_any_order() {
    let resp = Resp::Array(vec![
        s("msg"),
        Resp::Array(vec![s("voteGranted"), i(0), s("term"), i(5)]),
        s("type"),
        s("RequestVoteResp"),
    ]);
    assert_eq!(
        Frame::decode(resp),
        Ok(Frame::Raft(Message {
            term: TermId::new(5),
            rpc: Rpc::RequestVoteResp(RequestVoteResp {
                vote_granted: false
            }),
        }))
    );
}

#[rstest]
#[case::not_an_array(i(1), DecodeError::NotArray("integer"))]
#[case::odd_length(
    vote_resp(vec![s("term"), i(1), s("voteGranted")]),
    DecodeError::OddLength(3)
)]
#[case::key_not_a_string(
    vote_resp(vec![i(1), i(1), s("voteGranted"), i(1)]),
    DecodeError::KeyNotString { index: 0 }
)]
#[case::unknown_envelope_key(
    Resp::Array(vec![s("type"), s("RequestVoteResp"), s("msg"), Resp::Array(vec![]), s("extra"), i(1)]),
    DecodeError::UnknownKey("extra".to_string())
)]
#[case::unknown_body_key(
    vote_resp(vec![s("term"), i(1), s("voteGranted"), i(1), s("reason"), s("none")]),
    DecodeError::UnknownKey("reason".to_string())
)]
#[case::duplicate_key(
    vote_resp(vec![s("term"), i(1), s("voteGranted"), i(1), s("term"), i(2)]),
    DecodeError::DuplicateKey("term")
)]
#[case::missing_key(
    vote_resp(vec![s("term"), i(1)]),
    DecodeError::MissingKey("voteGranted")
)]
#[case::boolean_out_of_range(
    vote_resp(vec![s("term"), i(1), s("voteGranted"), i(2)]),
    DecodeError::NotBoolean { key: "voteGranted", value: 2 }
)]
#[case::negative_term(
    vote_resp(vec![s("term"), i(-1), s("voteGranted"), i(1)]),
    DecodeError::Negative { key: "term", value: -1 }
)]
#[case::term_as_string(
    vote_resp(vec![s("term"), s("1"), s("voteGranted"), i(1)]),
    DecodeError::WrongType { key: "term", expected: "integer", found: "bulk string" }
)]
#[case::unknown_type(
    envelope("Heartbeat", vec![]),
    DecodeError::UnknownType("Heartbeat".to_string())
)]
#[case::entry_missing_data(
    envelope("AppendEntriesReq", vec![
        s("term"), i(1), s("leaderId"), s("L"), s("prevLogIndex"), i(0), s("prevLogTerm"), i(0),
        s("leaderCommit"), i(0), s("entries"), Resp::Array(vec![
            Resp::Array(vec![s("term"), i(1), s("index"), i(1), s("binary"), i(0)]),
        ]),
    ]),
    DecodeError::MissingKey("data")
)]
fn rejects_malformed_frames(#[case] resp: Resp, #[case] expected: DecodeError) {
    assert_eq!(Frame::decode(resp), Err(expected));
}

#[test]
fn rejects_invalid_base64() {
    let resp = envelope(
        "AppendEntriesReq",
        vec![
            s("term"),
            i(1),
            s("leaderId"),
            s("L"),
            s("prevLogIndex"),
            i(0),
            s("prevLogTerm"),
            i(0),
            s("leaderCommit"),
            i(0),
            s("entries"),
            Resp::Array(vec![Resp::Array(vec![
                s("term"),
                i(1),
                s("index"),
                i(1),
                s("binary"),
                i(1),
                s("data"),
                s("not base64!"),
            ])]),
        ],
    );
    assert!(matches!(
        Frame::decode(resp),
        Err(DecodeError::InvalidBase64(_))
    ));
}
