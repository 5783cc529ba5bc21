//! The pure consensus core (modules A-F) wired up as one owned replica.
//!
//! A [`Replica`] never touches a socket or a real clock directly: it takes
//! an inbound [`Envelope`] (or a tick of the caller's clock) and returns the
//! envelopes it wants sent. This keeps the core synchronous, lock-free, and
//! testable against a logical clock, while the transport and CLI bootstrap
//! (modules G/H) are the only components that actually perform I/O.

use std::time::Instant;

use log::warn;

use crate::client;
use crate::election;
use crate::message::{Body, Envelope};
use crate::replication;
use crate::state::ReplicaState;
use crate::timing::{TimingState, HEARTBEAT_PERIOD};

pub struct Replica {
    pub state: ReplicaState,
    pub timing: TimingState,
    peers: Vec<String>,
}

impl Replica {
    /// Construct a replica whose clocks are anchored at `now`. Production
    /// code calls this once at startup with `Instant::now()`; the in-memory
    /// harness (module K) calls it with a shared logical clock so every
    /// replica in a scenario starts from the same instant.
    pub fn new_at(id: String, peers: Vec<String>, now: Instant) -> Self {
        Replica {
            state: ReplicaState::new(id, now),
            timing: TimingState::new(),
            peers,
        }
    }

    pub fn new(id: String, peers: Vec<String>) -> Self {
        Self::new_at(id, peers, Instant::now())
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Dispatch one inbound envelope, returning the envelopes (if any) this
    /// replica wishes to send in response.
    pub fn handle_envelope(&mut self, now: Instant, envelope: Envelope) -> Vec<Envelope> {
        let from = envelope.src.clone();
        match envelope.body {
            Body::Hello => Vec::new(),
            Body::Get { key, mid } => client::handle_get(&mut self.state, &from, &key, &mid),
            Body::Put { key, value, mid } => client::handle_put(&mut self.state, &from, key, value, mid),
            Body::VoteRequest {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => vec![election::handle_vote_request(
                &mut self.state,
                &mut self.timing,
                now,
                &candidate_id,
                term,
                last_log_index,
                last_log_term,
            )],
            Body::VoteResponse { term, vote_granted, .. } => {
                election::handle_vote_response(&mut self.state, &self.peers, term, vote_granted)
                    .into_iter()
                    .collect()
            }
            Body::AppendEntries {
                term,
                prev_log_index,
                prev_log_term,
                leader_commit,
                entries,
            } => replication::handle_append_entries(
                &mut self.state,
                &mut self.timing,
                now,
                &from,
                term,
                &envelope.leader,
                prev_log_index,
                prev_log_term,
                leader_commit,
                entries,
            )
            .into_iter()
            .collect(),
            Body::AppendEntriesResponse {
                term,
                success,
                current_index,
                ..
            } => replication::handle_append_entries_response(&mut self.state, &from, term, success, current_index)
                .into_iter()
                .collect(),
            // These are response types we only ever emit, never receive; a
            // peer sending us one is either a bug or a stray echo. Neither
            // a client request nor a peer RPC, so it warrants a log line but
            // no reply and no state change.
            Body::Ok { .. } | Body::Fail { .. } | Body::Redirect { .. } => {
                warn!(
                    "[{}] ignoring unexpected response-shaped message from {}",
                    self.state.id, from
                );
                Vec::new()
            }
        }
    }

    /// Evaluate the timing driver at `now`, returning any envelopes it wants
    /// sent: a heartbeat, a fresh election, or a candidacy restart.
    pub fn tick(&mut self, now: Instant) -> Vec<Envelope> {
        let mut out = Vec::new();

        if self.state.is_leader() && now.duration_since(self.state.last_heartbeat) > HEARTBEAT_PERIOD {
            self.state.last_heartbeat = now;
            out.push(replication::emit_broadcast(&mut self.state));
            return out;
        }

        if self.state.voted_for.is_none() {
            if now.duration_since(self.state.last_heartbeat) > self.timing.election_deadline {
                self.state.current_term += 1;
                out.push(election::start_election(&mut self.state, &mut self.timing, now));
            }
        } else if self.state.voted_for.as_deref() == Some(self.state.id.as_str()) {
            let stale = self
                .state
                .election_start
                .map(|start| now.duration_since(start) > self.timing.candidate_deadline)
                .unwrap_or(false);
            if stale {
                out.push(election::start_election(&mut self.state, &mut self.timing, now));
            }
        }

        out
    }
}
