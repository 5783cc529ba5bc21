//! The JSON-shaped message envelope (module A) shared by every peer and client.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::CodecError;

/// Broadcast sentinel: `dst == BROADCAST` means "fan out to every peer".
pub const BROADCAST: &str = "FFFF";

/// A replicated command. Only `Put` mutates the state machine; `Get` is never
/// replicated, but the wire format admits both for symmetry with LogEntry's
/// tuple encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Put { key: String, value: String },
}

impl Command {
    pub fn key(&self) -> &str {
        match self {
            Command::Get { key } => key,
            Command::Put { key, .. } => key,
        }
    }
}

// Commands serialize as `["GET", key]` / `["PUT", key, value]` rather than as
// a tagged object, to match the wire format the surrounding test harness expects.
impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Command::Get { key } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("GET")?;
                seq.serialize_element(key)?;
                seq.end()
            }
            Command::Put { key, value } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("PUT")?;
                seq.serialize_element(key)?;
                seq.serialize_element(value)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CommandVisitor;

        impl<'de> Visitor<'de> for CommandVisitor {
            type Value = Command;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(r#"["GET", key] or ["PUT", key, value]"#)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Command, A::Error> {
                let op: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                match op.as_str() {
                    "GET" => {
                        let key = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        Ok(Command::Get { key })
                    }
                    "PUT" => {
                        let key = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let value = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        Ok(Command::Put { key, value })
                    }
                    other => Err(de::Error::unknown_variant(other, &["GET", "PUT"])),
                }
            }
        }

        deserializer.deserialize_seq(CommandVisitor)
    }
}

/// A single entry in the replicated log: `(index, term, command)`.
///
/// `index` is the entry's dense, 1-based position; the in-memory log stores
/// entries densely so `log[i - 1]` is always entry `i`, but the wire format
/// still carries the index explicitly (the spec's harness relies on it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub command: Command,
}

// Wire entries are `[index, term, [op, ...]]`, a plain 3-tuple, not an object.
impl Serialize for LogEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.index)?;
        seq.serialize_element(&self.term)?;
        seq.serialize_element(&self.command)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for LogEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = LogEntry;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("[index, term, [op, ...]]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<LogEntry, A::Error> {
                let index = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let term = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let command = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                Ok(LogEntry {
                    index,
                    term,
                    command,
                })
            }
        }

        deserializer.deserialize_seq(EntryVisitor)
    }
}

/// The type-specific payload of an envelope. Internally tagged on `type`, so
/// on the wire every variant sits flattened alongside `src`/`dst`/`leader` in
/// one flat JSON object.
///
/// The response-shaped variants (`Ok`/`Fail`/`Redirect`/`VoteResponse`/
/// `AppendEntriesResponse`) carry a flattened `extra` map that absorbs any
/// field this codec doesn't otherwise name, so a field attached by whatever
/// sent the response survives an unrelated decode/re-encode round trip
/// instead of being silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    Hello,
    Get {
        key: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    Put {
        key: String,
        value: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Fail {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    VoteRequest {
        term: u64,
        candidate_id: String,
        last_log_index: u64,
        last_log_term: u64,
    },
    VoteResponse {
        term: u64,
        vote_granted: bool,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    AppendEntries {
        term: u64,
        prev_log_index: u64,
        prev_log_term: u64,
        leader_commit: u64,
        entries: Vec<LogEntry>,
    },
    AppendEntriesResponse {
        term: u64,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_index: Option<u64>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

/// The full wire envelope: routing fields plus a type-specific [`Body`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub src: String,
    pub dst: String,
    pub leader: String,
    #[serde(flatten)]
    pub body: Body,
}

impl Envelope {
    pub fn new(src: impl Into<String>, dst: impl Into<String>, leader: impl Into<String>, body: Body) -> Self {
        Envelope {
            src: src.into(),
            dst: dst.into(),
            leader: leader.into(),
            body,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Constructed from typed fields; serialization of this shape cannot fail.
        serde_json::to_vec(self).expect("envelope serialization is infallible")
    }
}

const KNOWN_TYPES: &[&str] = &[
    "hello",
    "get",
    "put",
    "ok",
    "fail",
    "redirect",
    "vote_request",
    "vote_response",
    "append_entries",
    "append_entries_response",
];

/// Best-effort extraction of the `src` field from a datagram that failed to
/// decode. Used only to classify an [`CodecError::UnknownType`] as fatal
/// (sender is a configured peer) or ignorable (sender is a stray client),
/// since a failed decode never yields a structured [`Envelope`] to read `src`
/// from normally.
pub fn peek_src(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value.get("src")?.as_str().map(str::to_string)
}

/// Decode a datagram into an [`Envelope`].
///
/// The `type` tag is sniffed before the full structural decode so that an
/// unrecognized tag can be reported as [`CodecError::UnknownType`] rather than
/// folded into the generic "malformed" bucket: the two are handled
/// differently by the caller (fatal when the sender is a known peer, ignored
/// otherwise).
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    if let Some(ty) = value.get("type").and_then(|t| t.as_str()) {
        if !KNOWN_TYPES.contains(&ty) {
            return Err(CodecError::UnknownType(ty.to_string()));
        }
    }
    let envelope: Envelope = serde_json::from_value(value)?;
    Ok(envelope)
}
