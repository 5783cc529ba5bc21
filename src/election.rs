//! Election protocol (module D): vote request/response handling, vote
//! tallying, and leader ascension.

use std::time::Instant;

use log::info;

use crate::message::{Body, Envelope, BROADCAST};
use crate::replication::emit_broadcast;
use crate::state::ReplicaState;
use crate::timing::TimingState;

/// Begin (or restart) a candidacy at the current term: vote for self, reset
/// the vote tally, and broadcast a vote request. Used both for a fresh
/// election (caller has already bumped `current_term`) and for the
/// candidate-deadline restart (same term, re-broadcast).
pub fn start_election(state: &mut ReplicaState, timing: &mut TimingState, now: Instant) -> Envelope {
    state.leader = None;
    state.voted_for = Some(state.id.clone());
    state.received_votes = 1;
    state.election_start = Some(now);
    timing.reroll_candidate_deadline();

    info!("[{}] starting election for term {}", state.id, state.current_term);

    Envelope::new(
        state.id.clone(),
        BROADCAST,
        state.leader_label(),
        Body::VoteRequest {
            term: state.current_term,
            candidate_id: state.id.clone(),
            last_log_index: state.last_log_index(),
            last_log_term: state.last_log_term(),
        },
    )
}

/// Handle an inbound `vote_request`, returning the `vote_response` to send back.
pub fn handle_vote_request(
    state: &mut ReplicaState,
    timing: &mut TimingState,
    now: Instant,
    candidate_id: &str,
    term: u64,
    last_log_index: u64,
    last_log_term: u64,
) -> Envelope {
    if term > state.current_term {
        state.current_term = term;
        state.clear_election_state();
        state.leader = None;
    }

    let vote_granted = if term < state.current_term {
        false
    } else if let Some(already) = state.voted_for.clone() {
        if already == candidate_id {
            state.log_is_at_least_as_up_to_date(last_log_term, last_log_index)
        } else if already == state.id {
            // We are ourselves mid-candidacy. Canonical Raft would refuse
            // outright; this spec's liveness hack lets a stale candidacy
            // step aside for a fresher one instead of blocking forever.
            let own_election_fresh = state
                .election_start
                .map(|start| now.duration_since(start) < timing.candidate_deadline)
                .unwrap_or(false);
            if own_election_fresh {
                false
            } else {
                state.clear_election_state();
                state.log_is_at_least_as_up_to_date(last_log_term, last_log_index)
            }
        } else {
            // Already committed this term's vote to a different candidate:
            // the grant is permanent regardless of freshness (invariant 6).
            false
        }
    } else {
        state.log_is_at_least_as_up_to_date(last_log_term, last_log_index)
    };

    if vote_granted {
        state.voted_for = Some(candidate_id.to_string());
        state.last_heartbeat = now;
        state.election_start = Some(now);
        timing.reroll_election_deadline();
        info!("[{}] granted vote to {} for term {}", state.id, candidate_id, state.current_term);
    }

    Envelope::new(
        state.id.clone(),
        candidate_id,
        state.leader_label(),
        Body::VoteResponse {
            term: state.current_term,
            vote_granted,
            extra: Default::default(),
        },
    )
}

/// Handle an inbound `vote_response` while candidating. Returns any
/// follow-up envelope (the leader's first heartbeat on ascension).
pub fn handle_vote_response(
    state: &mut ReplicaState,
    peers: &[String],
    term: u64,
    vote_granted: bool,
) -> Option<Envelope> {
    if term > state.current_term {
        state.adopt_term(term);
        return None;
    }

    if state.voted_for.as_deref() != Some(state.id.as_str()) {
        // Not (or no longer) a candidate; a late response arrived.
        return None;
    }

    if !vote_granted {
        return None;
    }

    state.received_votes += 1;
    // Strictly more than half of the *full* cluster, self included. A
    // "more than half of the other peers" phrasing coincides with this for
    // odd-sized clusters but silently under-counts for even-sized ones,
    // which would let two candidates both cross the line in the same term --
    // a violation of election safety (at most one leader per term) -- so the
    // full-cluster count wins here.
    let cluster_size = peers.len() + 1;
    if state.received_votes as usize > cluster_size / 2 {
        Some(ascend_to_leader(state, peers))
    } else {
        None
    }
}

fn ascend_to_leader(state: &mut ReplicaState, peers: &[String]) -> Envelope {
    state.clear_election_state();
    state.leader = Some(state.id.clone());

    let last_index = state.last_log_index();
    for peer in peers {
        state.next_index.insert(peer.clone(), last_index + 1);
        state.match_index.insert(peer.clone(), 0);
    }

    info!("[{}] became leader for term {}", state.id, state.current_term);
    emit_broadcast(state)
}
