//! The Raft wire format.
//!
//! Every frame is a RESP array `["type", <kind>, "msg", <body>]` whose body is a flat key/value array. Decoding is
//! strict: an unknown, duplicated or missing key, a boolean outside `{0, 1}` or a negative term or index rejects the
//! whole frame.

#[cfg(test)]
mod tests;

pub mod error;
mod fields;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use raft::message::{
    AppendEntriesReq, AppendEntriesResp, LogEntry, LogIndex, Message, RequestVoteReq,
    RequestVoteResp, Rpc, TermId,
};

use crate::protocol::Resp;

pub use error::DecodeError;
use fields::Fields;

pub const IDENTITY_REQ: &str = "IdentityReq";

const ENVELOPE_KEYS: &[&str] = &["type", "msg"];
const IDENTITY_KEYS: &[&str] = &["id"];
const APPEND_ENTRIES_REQ_KEYS: &[&str] = &[
    "term",
    "leaderId",
    "prevLogIndex",
    "prevLogTerm",
    "leaderCommit",
    "entries",
];
const APPEND_ENTRIES_RESP_KEYS: &[&str] = &["term", "success"];
const REQUEST_VOTE_REQ_KEYS: &[&str] = &["term", "candidateId", "lastLogIndex", "lastLogTerm"];
const REQUEST_VOTE_RESP_KEYS: &[&str] = &["term", "voteGranted"];
const LOG_ENTRY_KEYS: &[&str] = &["term", "index", "binary", "data"];

/// A unit of traffic on a peer connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Sent once, first, on every outbound connection to name the connecting node.
    Identity(String),
    Raft(Message),
}

impl Frame {
    pub fn encode(&self) -> Resp {
        let (kind, body) = match self {
            Frame::Identity(id) => (IDENTITY_REQ, pairs(vec![("id", Resp::from(id.clone()))])),
            Frame::Raft(message) => (message.rpc.kind(), encode_body(message)),
        };
        pairs(vec![("type", Resp::from(kind)), ("msg", body)])
    }

    pub fn to_bytes(&self) -> Bytes {
        self.encode().to_bytes()
    }

    pub fn decode(resp: Resp) -> Result<Frame, DecodeError> {
        let mut envelope = Fields::parse(resp, ENVELOPE_KEYS)?;
        let kind = envelope.string("type")?;
        let body = envelope.take("msg")?;

        if kind == IDENTITY_REQ {
            let mut body = Fields::parse(body, IDENTITY_KEYS)?;
            return Ok(Frame::Identity(body.string("id")?));
        }
        decode_body(&kind, body).map(Frame::Raft)
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Frame::Raft(message)
    }
}

fn pairs(items: Vec<(&'static str, Resp)>) -> Resp {
    let mut values = Vec::with_capacity(items.len() * 2);
    for (key, value) in items {
        values.push(Resp::from(key));
        values.push(value);
    }
    Resp::Array(values)
}

fn encode_body(message: &Message) -> Resp {
    let term = Resp::from(message.term.id);
    match &message.rpc {
        Rpc::AppendEntriesReq(req) => pairs(vec![
            ("term", term),
            ("leaderId", Resp::from(req.leader_id.clone())),
            ("prevLogIndex", Resp::from(req.prev_log_index.id)),
            ("prevLogTerm", Resp::from(req.prev_log_term.id)),
            ("leaderCommit", Resp::from(req.leader_commit.id)),
            (
                "entries",
                Resp::Array(req.entries.iter().map(encode_entry).collect()),
            ),
        ]),
        Rpc::AppendEntriesResp(resp) => {
            pairs(vec![("term", term), ("success", Resp::from(resp.success))])
        }
        Rpc::RequestVoteReq(req) => pairs(vec![
            ("term", term),
            ("candidateId", Resp::from(req.candidate_id.clone())),
            ("lastLogIndex", Resp::from(req.last_log_index.id)),
            ("lastLogTerm", Resp::from(req.last_log_term.id)),
        ]),
        Rpc::RequestVoteResp(resp) => pairs(vec![
            ("term", term),
            ("voteGranted", Resp::from(resp.vote_granted)),
        ]),
    }
}

fn encode_entry(entry: &LogEntry) -> Resp {
    let data = if entry.binary {
        Resp::from(STANDARD.encode(&entry.data))
    } else {
        Resp::BulkString(entry.data.clone())
    };
    pairs(vec![
        ("term", Resp::from(entry.term.id)),
        ("index", Resp::from(entry.index.id)),
        ("binary", Resp::from(entry.binary)),
        ("data", data),
    ])
}

fn decode_body(kind: &str, body: Resp) -> Result<Message, DecodeError> {
    let keys = match kind {
        "AppendEntriesReq" => APPEND_ENTRIES_REQ_KEYS,
        "AppendEntriesResp" => APPEND_ENTRIES_RESP_KEYS,
        "RequestVoteReq" => REQUEST_VOTE_REQ_KEYS,
        "RequestVoteResp" => REQUEST_VOTE_RESP_KEYS,
        _ => return Err(DecodeError::UnknownType(kind.to_string())),
    };
    let mut fields = Fields::parse(body, keys)?;
    let term = TermId::new(fields.int("term")?);

    let rpc = match kind {
        "AppendEntriesReq" => Rpc::AppendEntriesReq(AppendEntriesReq {
            leader_id: fields.string("leaderId")?,
            prev_log_index: LogIndex::new(fields.int("prevLogIndex")?),
            prev_log_term: TermId::new(fields.int("prevLogTerm")?),
            leader_commit: LogIndex::new(fields.int("leaderCommit")?),
            entries: fields
                .array("entries")?
                .into_iter()
                .map(decode_entry)
                .collect::<Result<_, _>>()?,
        }),
        "AppendEntriesResp" => Rpc::AppendEntriesResp(AppendEntriesResp {
            success: fields.boolean("success")?,
        }),
        "RequestVoteReq" => Rpc::RequestVoteReq(RequestVoteReq {
            candidate_id: fields.string("candidateId")?,
            last_log_index: LogIndex::new(fields.int("lastLogIndex")?),
            last_log_term: TermId::new(fields.int("lastLogTerm")?),
        }),
        _ => Rpc::RequestVoteResp(RequestVoteResp {
            vote_granted: fields.boolean("voteGranted")?,
        }),
    };
    Ok(Message { term, rpc })
}

fn decode_entry(resp: Resp) -> Result<LogEntry, DecodeError> {
    let mut fields = Fields::parse(resp, LOG_ENTRY_KEYS)?;
    let term = TermId::new(fields.int("term")?);
    let index = LogIndex::new(fields.int("index")?);
    let binary = fields.boolean("binary")?;
    let data = fields.bytes("data")?;

    let data = if binary {
        Bytes::from(STANDARD.decode(&data).map_err(DecodeError::InvalidBase64)?)
    } else {
        data
    };
    Ok(LogEntry {
        term,
        index,
        binary,
        data,
    })
}
