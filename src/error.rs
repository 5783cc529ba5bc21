use thiserror::Error;

/// Failures from decoding a wire envelope (module A).
///
/// `Malformed` and `UnknownType` are kept distinct because the core treats them
/// differently: a malformed datagram is swallowed (it's just noise, the protocol
/// is self-healing), but an unknown `type` tag from a configured peer is fatal
/// per the spec's error model.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unrecognized message type {0:?}")]
    UnknownType(String),
}

/// An internal failure while handling a client `get`/`put`.
///
/// This is the only error type that ever crosses back out to a client, as a
/// `fail` envelope, per the spec's "internal exception in handler" rule.
/// Peer RPCs have no equivalent: their failures are logged and swallowed.
#[derive(Debug, Error)]
#[error("internal error handling client request: {0}")]
pub struct ClientError(pub String);

/// I/O failures from the transport (module G).
///
/// Per the spec's error model, these are always dropped silently by the
/// bootstrap loop: the protocol is self-healing via heartbeats and
/// retransmission, so there is nothing a caller would ever match on here
/// beyond logging and moving on.
#[derive(Debug, Error)]
#[error("transport I/O error: {0}")]
pub struct TransportError(#[from] pub std::io::Error);
