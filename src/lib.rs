//! A replicated in-memory key-value store whose hard engineering is a
//! Raft-style consensus core: a small, fixed cluster of peer replicas
//! cooperatively maintain a linearizable ordered log of write commands,
//! elect a single leader, replicate entries to a majority, and apply them
//! in order to a deterministic state machine.
//!
//! The crate is split into a pure consensus core (no I/O, no clock reads)
//! and an ambient shell around it:
//!
//! - [`message`] -- the wire envelope codec (module A).
//! - [`state`] -- per-replica Raft state (module B).
//! - [`timing`] -- randomized election/heartbeat timers (module C).
//! - [`election`] -- vote handling and leader ascension (module D).
//! - [`replication`] -- append-entries, log repair, commit advancement (module E).
//! - [`client`] -- the `get`/`put` client surface (module F).
//! - [`replica`] -- wires A-F into one owned, testable [`replica::Replica`].
//! - [`transport`] -- the real UDP endpoint (module G).
//! - [`error`] -- typed failures distinguished by kind (module I).
//! - [`harness`] -- an in-memory, deterministic multi-replica test rig (module K).

pub mod client;
pub mod election;
pub mod error;
pub mod harness;
pub mod message;
pub mod replica;
pub mod replication;
pub mod state;
pub mod timing;
pub mod transport;
