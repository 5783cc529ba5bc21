//! Replica state (module B): the durable-but-volatile Raft state owned
//! exclusively by a single replica's event loop.

use std::collections::HashMap;
use std::time::Instant;

use crate::message::{Command, LogEntry};

/// A replica's role is not stored directly; it's implicit from
/// `(leader, voted_for, received_votes)` per the spec's data model. This enum
/// is just the derived view used by the rest of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// All per-replica Raft state. Owned and mutated only by the owning event
/// loop; there is exactly one of these per process and no locking around it.
#[derive(Debug)]
pub struct ReplicaState {
    pub id: String,

    pub current_term: u64,
    pub voted_for: Option<String>,
    pub log: Vec<LogEntry>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub state_machine: HashMap<String, String>,

    pub leader: Option<String>,
    pub last_heartbeat: Instant,
    pub election_start: Option<Instant>,
    pub received_votes: u32,

    /// Leader-only. Index of the next entry to send to each peer.
    pub next_index: HashMap<String, u64>,
    /// Leader-only. Highest index known replicated on each peer.
    pub match_index: HashMap<String, u64>,
    /// Leader-only staging buffer coalescing newly accepted PUTs.
    pub unsent_entries: Vec<LogEntry>,
}

impl ReplicaState {
    pub fn new(id: String, now: Instant) -> Self {
        ReplicaState {
            id,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            state_machine: HashMap::new(),
            leader: None,
            last_heartbeat: now,
            election_start: None,
            received_votes: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            unsent_entries: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        if self.leader.as_deref() == Some(self.id.as_str()) {
            Role::Leader
        } else if self.voted_for.as_deref() == Some(self.id.as_str()) {
            Role::Candidate
        } else {
            Role::Follower
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    /// The value to put in an outgoing envelope's `leader` field: our belief
    /// of who leads, or the broadcast sentinel when we have no belief.
    pub fn leader_label(&self) -> String {
        self.leader.clone().unwrap_or_else(|| crate::message::BROADCAST.to_string())
    }

    /// Log is dense and 1-based: entry at `index` lives at `log[index - 1]`.
    pub fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn entry_at(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.log.get((index - 1) as usize)
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.entry_at(index).map(|e| e.term)
    }

    /// Raft's up-to-date comparison: a candidate's log is at least as
    /// up-to-date as ours if its last term is strictly greater, or equal with
    /// an index at least as high.
    pub fn log_is_at_least_as_up_to_date(&self, candidate_last_term: u64, candidate_last_index: u64) -> bool {
        let my_term = self.last_log_term();
        let my_index = self.last_log_index();
        candidate_last_term > my_term || (candidate_last_term == my_term && candidate_last_index >= my_index)
    }

    /// Apply every committed-but-unapplied entry to the state machine, in order.
    pub fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            let next = self.last_applied + 1;
            if let Some(entry) = self.entry_at(next) {
                if let Command::Put { key, value } = &entry.command {
                    self.state_machine.insert(key.clone(), value.clone());
                }
            }
            self.last_applied = next;
        }
    }

    /// Reset all election-candidacy bookkeeping (used on stepping down,
    /// ascending to leader, or adopting a newer term).
    pub fn clear_election_state(&mut self) {
        self.voted_for = None;
        self.election_start = None;
        self.received_votes = 0;
    }

    /// Adopt a higher term observed on the wire, per the all-servers rule:
    /// reset to follower and clear vote/candidacy bookkeeping.
    pub fn adopt_term(&mut self, term: u64) {
        debug_assert!(term >= self.current_term);
        self.current_term = term;
        self.leader = None;
        self.clear_election_state();
    }

    /// True if any log entry past `commit_index` is a `Put` for `key`
    /// (module F's uncommitted-tail scan on GET).
    pub fn has_uncommitted_put(&self, key: &str) -> bool {
        self.log[(self.commit_index as usize)..]
            .iter()
            .any(|e| matches!(&e.command, Command::Put { key: k, .. } if k == key))
    }
}
