//! In-memory, deterministic multi-replica test harness (module K).
//!
//! Owns a set of [`Replica`]s keyed by id and fans out each instance's
//! outbound envelopes -- unicast or the `FFFF` broadcast sentinel -- into
//! the others' inboxes. Time advances explicitly and by an amount the
//! caller chooses, so election/heartbeat scenarios are deterministic instead
//! of racing a real clock and a real socket.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::message::{Body, Envelope, BROADCAST};
use crate::replica::Replica;

const CLIENT_ID: &str = "client";

pub struct Harness {
    replicas: HashMap<String, Replica>,
    order: Vec<String>,
    now: Instant,
    inboxes: HashMap<String, VecDeque<Envelope>>,
    partitioned: HashSet<String>,
    client_responses: Vec<Envelope>,
}

impl Harness {
    pub fn new(ids: &[&str]) -> Self {
        let order: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        let now = Instant::now();
        let mut replicas = HashMap::new();
        let mut inboxes = HashMap::new();
        for id in &order {
            let peers: Vec<String> = order.iter().filter(|p| *p != id).cloned().collect();
            replicas.insert(id.clone(), Replica::new_at(id.clone(), peers, now));
            inboxes.insert(id.clone(), VecDeque::new());
        }
        Harness {
            replicas,
            order,
            now,
            inboxes,
            partitioned: HashSet::new(),
            client_responses: Vec::new(),
        }
    }

    pub fn replica(&self, id: &str) -> &Replica {
        &self.replicas[id]
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Isolate a replica: its sends are dropped and nothing is delivered to
    /// it until [`Harness::heal`].
    pub fn partition(&mut self, id: &str) {
        self.partitioned.insert(id.to_string());
    }

    pub fn heal(&mut self, id: &str) {
        self.partitioned.remove(id);
    }

    /// Inject a client request straight into a replica's inbox, as if a
    /// `get`/`put` arrived from outside the cluster.
    pub fn client_request(&mut self, dst: &str, body: Body) {
        let env = Envelope::new(CLIENT_ID, dst, BROADCAST, body);
        self.route(env);
    }

    /// Every response (`ok`/`fail`/`redirect`) routed back to the client so
    /// far, oldest first. Draining leaves the harness's own log empty.
    pub fn take_client_responses(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.client_responses)
    }

    /// Advance logical time by `dt`, split into `steps` rounds of delivery
    /// and timer evaluation. More steps settle a scenario (heartbeats,
    /// multi-hop repair) within the same wall-clock `dt`; one step merely
    /// advances the clock and lets each replica's queued inbox and timers
    /// fire once.
    pub fn advance(&mut self, dt: Duration, steps: usize) {
        let steps = steps.max(1);
        let per_step = dt / steps as u32;
        for _ in 0..steps {
            self.now += per_step;
            self.round();
        }
    }

    fn round(&mut self) {
        let ids = self.order.clone();

        for id in &ids {
            if self.partitioned.contains(id) {
                continue;
            }
            let pending = std::mem::take(self.inboxes.get_mut(id).unwrap());
            for env in pending {
                if self.partitioned.contains(&env.src) {
                    continue;
                }
                let out = self.replicas.get_mut(id).unwrap().handle_envelope(self.now, env);
                self.route_all(out);
            }
        }

        for id in &ids {
            if self.partitioned.contains(id) {
                continue;
            }
            let out = self.replicas.get_mut(id).unwrap().tick(self.now);
            self.route_all(out);
        }
    }

    fn route_all(&mut self, envelopes: Vec<Envelope>) {
        for env in envelopes {
            self.route(env);
        }
    }

    /// Partitioning only cuts replica-to-replica traffic: a client is
    /// assumed to dial a replica directly, so a client request still
    /// reaches (and gets a reply from) a partitioned leader even though
    /// that leader can no longer talk to its peers.
    fn route(&mut self, env: Envelope) {
        if env.dst == CLIENT_ID {
            self.client_responses.push(env);
            return;
        }
        let inter_replica = env.src != CLIENT_ID;
        if inter_replica && self.partitioned.contains(&env.src) {
            return;
        }
        if env.dst == BROADCAST {
            for id in self.order.clone() {
                if id == env.src {
                    continue;
                }
                if inter_replica && self.partitioned.contains(&id) {
                    continue;
                }
                self.inboxes.get_mut(&id).unwrap().push_back(env.clone());
            }
        } else if let Some(q) = self.inboxes.get_mut(&env.dst) {
            if !inter_replica || !self.partitioned.contains(&env.dst) {
                q.push_back(env);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;
    use std::time::Duration;

    fn settle_election(h: &mut Harness) {
        // A handful of rounds comfortably clears the widest election-deadline
        // band (1.5s) and lets vote responses and the ascension heartbeat
        // propagate.
        h.advance(Duration::from_millis(2000), 40);
    }

    #[test]
    fn a_cluster_elects_exactly_one_leader() {
        let mut h = Harness::new(&["A", "B", "C"]);
        settle_election(&mut h);

        let leaders: Vec<&str> = ["A", "B", "C"]
            .iter()
            .filter(|id| h.replica(id).state.role() == Role::Leader)
            .copied()
            .collect();
        assert_eq!(leaders.len(), 1, "expected exactly one leader, got {leaders:?}");
    }

    #[test]
    fn put_then_get_round_trips_through_the_leader() {
        let mut h = Harness::new(&["A", "B", "C"]);
        settle_election(&mut h);
        let leader_id = ["A", "B", "C"]
            .into_iter()
            .find(|id| h.replica(id).state.role() == Role::Leader)
            .unwrap();

        h.client_request(
            leader_id,
            Body::Put {
                key: "k".into(),
                value: "1".into(),
                mid: "m1".into(),
            },
        );
        h.advance(Duration::from_millis(500), 10);

        let responses = h.take_client_responses();
        assert!(matches!(responses.first().map(|e| &e.body), Some(Body::Ok { .. })));

        h.client_request(
            leader_id,
            Body::Get {
                key: "k".into(),
                mid: "m2".into(),
            },
        );
        h.advance(Duration::from_millis(500), 10);
        let responses = h.take_client_responses();
        match responses.first().map(|e| &e.body) {
            Some(Body::Ok { value, .. }) => assert_eq!(value.as_deref(), Some("1")),
            other => panic!("expected ok/value, got {other:?}"),
        }

        for id in ["A", "B", "C"] {
            assert_eq!(h.replica(id).state.state_machine.get("k"), Some(&"1".to_string()));
        }
    }

    #[test]
    fn non_leader_redirects_a_client() {
        let mut h = Harness::new(&["A", "B", "C"]);
        settle_election(&mut h);
        let follower_id = ["A", "B", "C"]
            .into_iter()
            .find(|id| h.replica(id).state.role() != Role::Leader)
            .unwrap();

        h.client_request(
            follower_id,
            Body::Get {
                key: "k".into(),
                mid: "m1".into(),
            },
        );
        h.advance(Duration::from_millis(10), 1);
        let responses = h.take_client_responses();
        assert!(matches!(responses.first().map(|e| &e.body), Some(Body::Redirect { .. })));
    }

    #[test]
    fn a_minority_partition_heals_and_steps_down() {
        let mut h = Harness::new(&["A", "B", "C"]);
        settle_election(&mut h);
        let leader_id = ["A", "B", "C"]
            .into_iter()
            .find(|id| h.replica(id).state.role() == Role::Leader)
            .unwrap()
            .to_string();

        h.partition(&leader_id);
        // Partitioned leader keeps believing it's leader in isolation; the
        // remaining two-node majority must elect a new one without it.
        settle_election(&mut h);

        let remaining: Vec<&str> = ["A", "B", "C"]
            .into_iter()
            .filter(|id| *id != leader_id)
            .collect();
        let new_leaders: Vec<&str> = remaining
            .iter()
            .filter(|id| h.replica(id).state.role() == Role::Leader)
            .copied()
            .collect();
        assert_eq!(new_leaders.len(), 1);

        h.heal(&leader_id);
        settle_election(&mut h);
        assert_ne!(h.replica(&leader_id).state.role(), Role::Leader);
    }
}
