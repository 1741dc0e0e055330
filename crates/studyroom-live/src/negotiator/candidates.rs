//! Holding area for ICE candidates that beat their offer.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use studyroom_common::ParticipantId;
use tokio::time::Instant;

use crate::signal::IceCandidate;

/// Per-sender buffer with a TTL and a size cap. When full the oldest
/// candidate is dropped.
#[derive(Debug)]
pub struct CandidateBuffer {
    ttl: Duration,
    max_per_peer: usize,
    entries: HashMap<ParticipantId, VecDeque<(Instant, IceCandidate)>>,
}

impl CandidateBuffer {
    pub fn new(ttl: Duration, max_per_peer: usize) -> Self {
        Self {
            ttl,
            max_per_peer: max_per_peer.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn push(&mut self, from: &ParticipantId, candidate: IceCandidate, now: Instant) {
        let queue = self.entries.entry(from.clone()).or_default();
        if queue.len() >= self.max_per_peer {
            queue.pop_front();
        }
        queue.push_back((now, candidate));
    }

    /// Remove and return the unexpired candidates from `from`, oldest first.
    pub fn take(&mut self, from: &ParticipantId, now: Instant) -> Vec<IceCandidate> {
        let ttl = self.ttl;
        self.entries
            .remove(from)
            .map(|queue| {
                queue
                    .into_iter()
                    .filter(|(at, _)| now.duration_since(*at) < ttl)
                    .map(|(_, c)| c)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop expired candidates. Returns how many were dropped.
    pub fn purge(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut dropped = 0;
        self.entries.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|(at, _)| now.duration_since(*at) < ttl);
            dropped += before - queue.len();
            !queue.is_empty()
        });
        dropped
    }

    pub fn discard(&mut self, from: &ParticipantId) {
        self.entries.remove(from);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n}"))
    }

    #[tokio::test(start_paused = true)]
    async fn take_returns_fresh_candidates_in_order() {
        let mut buf = CandidateBuffer::new(Duration::from_secs(10), 32);
        let bob = ParticipantId::from("bob");
        let start = Instant::now();
        buf.push(&bob, cand(1), start);
        buf.push(&bob, cand(2), start + Duration::from_secs(5));

        let taken = buf.take(&bob, start + Duration::from_secs(12));
        assert_eq!(taken, vec![cand(2)]);
        assert!(buf.is_empty());
        assert!(buf.take(&bob, start).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cap_drops_oldest() {
        let mut buf = CandidateBuffer::new(Duration::from_secs(10), 2);
        let bob = ParticipantId::from("bob");
        let now = Instant::now();
        for n in 1..=3 {
            buf.push(&bob, cand(n), now);
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.take(&bob, now), vec![cand(2), cand(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_expired_peers() {
        let mut buf = CandidateBuffer::new(Duration::from_secs(10), 8);
        let now = Instant::now();
        buf.push(&"a".into(), cand(1), now);
        buf.push(&"b".into(), cand(2), now + Duration::from_secs(8));
        assert_eq!(buf.purge(now + Duration::from_secs(11)), 1);
        assert_eq!(buf.len(), 1);
        buf.discard(&"b".into());
        assert!(buf.is_empty());
    }
}
