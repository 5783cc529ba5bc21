//! Replication protocol (module E): append-entries emission, follower log
//! repair, match-index bookkeeping, commit advancement, and state-machine
//! application.

use std::time::Instant;

use log::{debug, info, warn};

use crate::message::{Body, Envelope, LogEntry, BROADCAST};
use crate::state::ReplicaState;
use crate::timing::TimingState;

/// Build the leader's routine broadcast: either a plain heartbeat (if there's
/// nothing staged) or a batch carrying the staged `unsent_entries`. Clears
/// the staging buffer, since after this call every peer has been offered
/// those entries (repair of individually lagging peers happens separately,
/// via [`repair_peer`]).
pub fn emit_broadcast(state: &mut ReplicaState) -> Envelope {
    let entries = std::mem::take(&mut state.unsent_entries);
    let prev_log_index = entries
        .first()
        .map(|e| e.index - 1)
        .unwrap_or_else(|| state.last_log_index());
    let prev_log_term = state.term_at(prev_log_index).unwrap_or(0);

    if entries.is_empty() {
        debug!("[{}] emitting heartbeat at term {}", state.id, state.current_term);
    } else {
        info!(
            "[{}] broadcasting {} entries starting at index {}",
            state.id,
            entries.len(),
            prev_log_index + 1
        );
    }

    Envelope::new(
        state.id.clone(),
        BROADCAST,
        state.leader_label(),
        Body::AppendEntries {
            term: state.current_term,
            prev_log_index,
            prev_log_term,
            leader_commit: state.commit_index,
            entries,
        },
    )
}

/// Build a targeted repair append addressed to a single lagging peer, using
/// that peer's own `next_index`.
pub fn repair_peer(state: &ReplicaState, peer: &str) -> Envelope {
    let next_index = *state
        .next_index
        .get(peer)
        .unwrap_or(&(state.last_log_index() + 1));
    let prev_log_index = next_index.saturating_sub(1);
    let prev_log_term = state.term_at(prev_log_index).unwrap_or(0);
    let entries: Vec<LogEntry> = state.log[(prev_log_index as usize)..].to_vec();

    debug!(
        "[{}] repairing {}: next_index={} entries={}",
        state.id,
        peer,
        next_index,
        entries.len()
    );

    Envelope::new(
        state.id.clone(),
        peer,
        state.leader_label(),
        Body::AppendEntries {
            term: state.current_term,
            prev_log_index,
            prev_log_term,
            leader_commit: state.commit_index,
            entries,
        },
    )
}

/// Follower-side handling of an inbound `append_entries`. Returns the
/// response to send back, or `None` for an accepted heartbeat (no ack
/// required, per the spec).
#[allow(clippy::too_many_arguments)]
pub fn handle_append_entries(
    state: &mut ReplicaState,
    timing: &mut TimingState,
    now: Instant,
    from: &str,
    term: u64,
    leader_id: &str,
    prev_log_index: u64,
    prev_log_term: u64,
    leader_commit: u64,
    entries: Vec<LogEntry>,
) -> Option<Envelope> {
    if term < state.current_term {
        return Some(refuse(state, from));
    }

    if term > state.current_term {
        state.current_term = term;
    }
    state.clear_election_state();
    state.leader = Some(leader_id.to_string());
    state.last_heartbeat = now;
    timing.reroll_election_deadline();

    if entries.is_empty() {
        debug!("[{}] accepted heartbeat from {}", state.id, leader_id);
        return None;
    }

    let consistent = prev_log_index == 0 || state.term_at(prev_log_index) == Some(prev_log_term);
    if !consistent {
        warn!(
            "[{}] log inconsistency at index {} (want term {}, have {:?})",
            state.id,
            prev_log_index,
            prev_log_term,
            state.term_at(prev_log_index)
        );
        return Some(refuse(state, from));
    }

    for entry in &entries {
        match state.term_at(entry.index) {
            Some(local_term) if local_term != entry.term => {
                state.log.truncate((entry.index - 1) as usize);
                state.log.push(entry.clone());
            }
            Some(_) => {}
            None => state.log.push(entry.clone()),
        }
    }

    if leader_commit > state.commit_index {
        let last_new_index = entries.last().expect("checked non-empty above").index;
        state.commit_index = leader_commit.min(last_new_index);
        state.apply_committed();
    }

    Some(Envelope::new(
        state.id.clone(),
        from,
        state.leader_label(),
        Body::AppendEntriesResponse {
            term: state.current_term,
            success: true,
            current_index: Some(state.last_log_index()),
            extra: Default::default(),
        },
    ))
}

fn refuse(state: &ReplicaState, from: &str) -> Envelope {
    Envelope::new(
        state.id.clone(),
        from,
        state.leader_label(),
        Body::AppendEntriesResponse {
            term: state.current_term,
            success: false,
            current_index: None,
            extra: Default::default(),
        },
    )
}

/// Leader-side handling of an `append_entries_response`. Returns any
/// follow-up repair envelope that needs sending.
pub fn handle_append_entries_response(
    state: &mut ReplicaState,
    from: &str,
    term: u64,
    success: bool,
    current_index: Option<u64>,
) -> Option<Envelope> {
    if term > state.current_term {
        info!("[{}] stepping down: saw higher term {} from {}", state.id, term, from);
        state.adopt_term(term);
        return None;
    }

    if !state.is_leader() {
        return None;
    }

    if success {
        let current_index = current_index.unwrap_or_else(|| state.last_log_index());
        state.match_index.insert(from.to_string(), current_index);
        state.next_index.insert(from.to_string(), current_index + 1);
        try_advance_commit_index(state);
        None
    } else {
        let current = *state.next_index.get(from).unwrap_or(&(state.last_log_index() + 1));
        let retreated = current.saturating_sub(1).max(1);
        state.next_index.insert(from.to_string(), retreated);
        Some(repair_peer(state, from))
    }
}

/// Advance `commit_index` if a strict majority (leader included) has
/// replicated some index reached in the leader's *current* term, then apply
/// the newly committed prefix.
pub fn try_advance_commit_index(state: &mut ReplicaState) {
    let mut matched: Vec<u64> = state.match_index.values().copied().collect();
    matched.push(state.last_log_index());
    matched.sort_unstable();

    let n = matched.len();
    let majority_index = (n + 1) / 2 - 1;
    let candidate = matched[majority_index];

    if candidate > state.commit_index && state.term_at(candidate) == Some(state.current_term) {
        info!("[{}] advancing commit_index to {}", state.id, candidate);
        state.commit_index = candidate;
        state.apply_committed();
    }
}
