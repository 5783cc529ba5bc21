//! Timing driver (module C): randomized election/heartbeat timers.
//!
//! Randomization must be per-replica and independent, or symmetric timers
//! deadlock the cluster (every replica would time out simultaneously and
//! split the vote forever). Each deadline is redrawn every time the timer it
//! gates is reset, not fixed once at startup, matching canonical Raft's
//! anti-livelock rationale.

use std::time::Duration;

use rand::Rng;

/// How often a leader re-asserts itself with a heartbeat.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(150);

const ELECTION_DEADLINE_MIN_MS: u64 = 500;
const ELECTION_DEADLINE_MAX_MS: u64 = 1500;
const CANDIDATE_DEADLINE_MIN_MS: u64 = 400;
const CANDIDATE_DEADLINE_MAX_MS: u64 = 600;

fn random_duration(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// The two randomized deadlines that gate a replica's election behavior.
/// Kept apart from [`crate::state::ReplicaState`] because they're a timing
/// implementation detail, not part of the spec's documented Raft state.
#[derive(Debug, Clone, Copy)]
pub struct TimingState {
    pub election_deadline: Duration,
    pub candidate_deadline: Duration,
}

impl Default for TimingState {
    fn default() -> Self {
        TimingState {
            election_deadline: random_duration(ELECTION_DEADLINE_MIN_MS, ELECTION_DEADLINE_MAX_MS),
            candidate_deadline: random_duration(CANDIDATE_DEADLINE_MIN_MS, CANDIDATE_DEADLINE_MAX_MS),
        }
    }
}

impl TimingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redraw the election deadline. Call whenever `last_heartbeat` resets
    /// (a heartbeat/append_entries arrives, a vote is granted, or this
    /// replica becomes leader).
    pub fn reroll_election_deadline(&mut self) {
        self.election_deadline = random_duration(ELECTION_DEADLINE_MIN_MS, ELECTION_DEADLINE_MAX_MS);
    }

    /// Redraw the candidate deadline. Call whenever `election_start` resets
    /// (a new candidacy begins or an existing one is restarted).
    pub fn reroll_candidate_deadline(&mut self) {
        self.candidate_deadline = random_duration(CANDIDATE_DEADLINE_MIN_MS, CANDIDATE_DEADLINE_MAX_MS);
    }
}
