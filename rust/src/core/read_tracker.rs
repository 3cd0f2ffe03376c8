use std::collections::{BTreeMap, HashMap, HashSet};

use crate::state::{PeerUnread, UnreadState};

/// Per-peer unread counters plus bookkeeping for in-flight and failed mark-read writes.
#[derive(Debug, Default)]
pub(crate) struct ReadTracker {
    counts: BTreeMap<String, u32>,
    in_flight: HashSet<String>,
    // Peers whose mark-read write failed; retried on the next focus or foreground.
    pending: HashSet<String>,
    // Mark-read requested while a write for the same peer was already running.
    rerun: HashSet<String>,
    // Bumped on every local change; an aggregate requested before a peer's latest local
    // change is stale for that peer.
    epoch: u64,
    touched: HashMap<String, u64>,
}

impl ReadTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn unread_for(&self, peer_id: &str) -> u32 {
        self.counts.get(peer_id).copied().unwrap_or(0)
    }

    pub(crate) fn total_unread(&self) -> u32 {
        self.counts.values().sum()
    }

    fn touch(&mut self, peer_id: &str) {
        self.epoch += 1;
        self.touched.insert(peer_id.to_string(), self.epoch);
    }

    pub(crate) fn record_incoming(&mut self, peer_id: &str) {
        *self.counts.entry(peer_id.to_string()).or_insert(0) += 1;
        self.touch(peer_id);
    }

    #[cfg(test)]
    pub(crate) fn set_count(&mut self, peer_id: &str, count: u32) {
        if count == 0 {
            self.counts.remove(peer_id);
        } else {
            self.counts.insert(peer_id.to_string(), count);
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    fn keeps_local(&self, peer_id: &str, protected: &HashSet<String>, requested_at: u64) -> bool {
        protected.contains(peer_id)
            || self.in_flight.contains(peer_id)
            || self.touched.get(peer_id).is_some_and(|e| *e > requested_at)
    }

    /// Replace counters with a backend aggregate requested at `requested_at` (an [`epoch`]).
    /// Peers in `protected`, with a write in flight, or changed locally after the request keep
    /// their local value.
    ///
    /// [`epoch`]: ReadTracker::epoch
    pub(crate) fn apply_aggregate(
        &mut self,
        counts: Vec<PeerUnread>,
        protected: &HashSet<String>,
        requested_at: u64,
    ) {
        let mut next: BTreeMap<String, u32> = BTreeMap::new();
        for peer in counts.into_iter().filter(|p| p.count > 0) {
            if self.keeps_local(&peer.peer_id, protected, requested_at) {
                continue;
            }
            *next.entry(peer.peer_id).or_insert(0) += peer.count;
        }
        for (peer_id, count) in &self.counts {
            if self.keeps_local(peer_id, protected, requested_at) {
                next.insert(peer_id.clone(), *count);
            }
        }
        self.counts = next;
    }

    /// Zero the local counter and register a write. Returns false if one is already running;
    /// the request is then replayed when that write finishes.
    pub(crate) fn begin_mark_read(&mut self, peer_id: &str) -> bool {
        self.counts.remove(peer_id);
        self.pending.remove(peer_id);
        self.touch(peer_id);
        if self.in_flight.insert(peer_id.to_string()) {
            true
        } else {
            self.rerun.insert(peer_id.to_string());
            false
        }
    }

    /// Returns true when another mark-read was requested while this one ran.
    pub(crate) fn finish_mark_read(&mut self, peer_id: &str, ok: bool) -> bool {
        self.in_flight.remove(peer_id);
        self.touch(peer_id);
        let rerun = self.rerun.remove(peer_id);
        if !ok && !rerun {
            self.pending.insert(peer_id.to_string());
        }
        rerun
    }

    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, peer_id: &str) -> bool {
        self.in_flight.contains(peer_id)
    }

    pub(crate) fn take_pending(&mut self) -> Vec<String> {
        let mut peers: Vec<String> = self.pending.drain().collect();
        peers.sort();
        peers
    }

    pub(crate) fn snapshot(&self) -> UnreadState {
        let per_peer: Vec<PeerUnread> = self
            .counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(peer_id, count)| PeerUnread {
                peer_id: peer_id.clone(),
                count: *count,
            })
            .collect();
        UnreadState {
            total: self.total_unread(),
            per_peer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(peer_id: &str, count: u32) -> PeerUnread {
        PeerUnread {
            peer_id: peer_id.into(),
            count,
        }
    }

    #[test]
    fn incoming_increments_and_total_sums() {
        let mut tracker = ReadTracker::new();
        tracker.record_incoming("a");
        tracker.record_incoming("a");
        tracker.record_incoming("b");
        assert_eq!(tracker.unread_for("a"), 2);
        assert_eq!(tracker.total_unread(), 3);
        let snap = tracker.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.per_peer, vec![peer("a", 2), peer("b", 1)]);
    }

    #[test]
    fn mark_read_zeroes_immediately_and_tracks_failures() {
        let mut tracker = ReadTracker::new();
        tracker.set_count("a", 4);
        assert!(tracker.begin_mark_read("a"));
        assert_eq!(tracker.unread_for("a"), 0);
        tracker.finish_mark_read("a", false);
        assert!(!tracker.is_in_flight("a"));
        assert_eq!(tracker.take_pending(), vec!["a".to_string()]);
        assert!(tracker.take_pending().is_empty());
    }

    #[test]
    fn overlapping_mark_read_is_replayed_once() {
        let mut tracker = ReadTracker::new();
        assert!(tracker.begin_mark_read("a"));
        tracker.record_incoming("a");
        assert!(!tracker.begin_mark_read("a"));
        assert_eq!(tracker.unread_for("a"), 0);
        assert!(tracker.finish_mark_read("a", true));
        assert!(tracker.begin_mark_read("a"));
        assert!(!tracker.finish_mark_read("a", true));
        assert!(tracker.take_pending().is_empty());
    }

    #[test]
    fn aggregate_does_not_resurrect_protected_peers() {
        let mut tracker = ReadTracker::new();
        tracker.set_count("stale", 9);
        tracker.begin_mark_read("writing");
        let mut protected = HashSet::new();
        protected.insert("focused".to_string());

        let epoch = tracker.epoch();
        tracker.apply_aggregate(
            vec![peer("writing", 3), peer("focused", 2), peer("other", 5), peer("zero", 0)],
            &protected,
            epoch,
        );
        assert_eq!(tracker.unread_for("writing"), 0);
        assert_eq!(tracker.unread_for("focused"), 0);
        assert_eq!(tracker.unread_for("other"), 5);
        assert_eq!(tracker.unread_for("stale"), 0);
        assert_eq!(tracker.snapshot().per_peer, vec![peer("other", 5)]);
    }

    #[test]
    fn aggregate_keeps_local_count_for_protected_peer() {
        let mut tracker = ReadTracker::new();
        tracker.record_incoming("focused");
        let mut protected = HashSet::new();
        protected.insert("focused".to_string());
        tracker.apply_aggregate(vec![], &protected, 0);
        assert_eq!(tracker.unread_for("focused"), 1);
    }

    #[test]
    fn aggregate_requested_before_mark_read_is_stale_for_that_peer() {
        let mut tracker = ReadTracker::new();
        tracker.set_count("a", 2);
        let requested_at = tracker.epoch();
        tracker.begin_mark_read("a");
        tracker.finish_mark_read("a", true);
        tracker.apply_aggregate(
            vec![peer("a", 2), peer("b", 1)],
            &HashSet::new(),
            requested_at,
        );
        assert_eq!(tracker.unread_for("a"), 0);
        assert_eq!(tracker.unread_for("b"), 1);

        // A later aggregate is authoritative again.
        let requested_at = tracker.epoch();
        tracker.apply_aggregate(vec![peer("a", 1)], &HashSet::new(), requested_at);
        assert_eq!(tracker.unread_for("a"), 1);
    }

    #[test]
    fn incoming_after_request_survives_aggregate() {
        let mut tracker = ReadTracker::new();
        let requested_at = tracker.epoch();
        tracker.record_incoming("a");
        tracker.apply_aggregate(vec![], &HashSet::new(), requested_at);
        assert_eq!(tracker.unread_for("a"), 1);
    }
}
