//! Eligibility: which peers may take work of a given category.
//!
//! Pure functions over a registry snapshot. No locking, no side effects
//! beyond the RNG used by [`CandidateOrder::Shuffled`].

use std::cmp::Ordering;

use rand::seq::SliceRandom;

use oracle_core::config::CandidateOrder;
use oracle_core::wire::{PeerId, WorkerCategory};

use crate::peer::PeerRecord;

/// Remote candidates plus whether the local node may run the work itself.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub remote: Vec<PeerRecord>,
    pub local_eligible: bool,
}

/// Split `records` into eligible remote candidates and local eligibility.
///
/// A remote candidate is staked, advertises `category`, and is not us.
/// Remote order follows the input order, which for a registry snapshot is
/// oldest `lastUpdatedAt` first.
pub fn eligible(records: &[PeerRecord], self_id: &PeerId, category: WorkerCategory) -> Candidates {
    let mut candidates = Candidates::default();
    for record in records {
        let capable = record.is_staked && record.supports(category);
        if record.peer_id == *self_id {
            candidates.local_eligible = capable;
        } else if capable {
            candidates.remote.push(record.clone());
        }
    }
    candidates
}

/// [`eligible`], then reorder the remote list per `order`.
pub fn eligible_ordered(
    records: &[PeerRecord],
    self_id: &PeerId,
    category: WorkerCategory,
    order: CandidateOrder,
) -> Candidates {
    let mut candidates = eligible(records, self_id, category);
    match order {
        CandidateOrder::LastUpdated => candidates.remote.sort_by(by_last_updated),
        CandidateOrder::Reliability => {
            candidates.remote.sort_by(|a, b| by_reliability(a, b, category))
        }
        CandidateOrder::Shuffled => candidates.remote.shuffle(&mut rand::thread_rng()),
    }
    candidates
}

fn by_last_updated(a: &PeerRecord, b: &PeerRecord) -> Ordering {
    a.last_updated_at
        .cmp(&b.last_updated_at)
        .then_with(|| a.peer_id.cmp(&b.peer_id))
}

/// Fewest not-found, then oldest not-found, most returned, most recently
/// returned, fewest timeouts, oldest timeout, peer id.
fn by_reliability(a: &PeerRecord, b: &PeerRecord, category: WorkerCategory) -> Ordering {
    let sa = a.stats(category);
    let sb = b.stats(category);
    sa.not_found_count
        .cmp(&sb.not_found_count)
        .then(sa.last_not_found_at.cmp(&sb.last_not_found_at))
        .then(sb.returned_count.cmp(&sa.returned_count))
        .then(sb.last_returned_at.cmp(&sa.last_returned_at))
        .then(sa.timeout_count.cmp(&sb.timeout_count))
        .then(sa.last_timeout_at.cmp(&sb.last_timeout_at))
        .then_with(|| a.peer_id.cmp(&b.peer_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PerformanceDelta;
    use oracle_core::wire::Capabilities;

    fn record(id: &str, staked: bool, caps: Capabilities, updated: u64) -> PeerRecord {
        let mut r = PeerRecord::new(PeerId::from(id))
            .with_stake(staked)
            .with_capabilities(caps);
        r.joined(updated);
        r
    }

    fn twitter() -> Capabilities {
        Capabilities::default().with(WorkerCategory::Twitter)
    }

    fn ids(records: &[PeerRecord]) -> Vec<&str> {
        records.iter().map(|r| r.peer_id.as_str()).collect()
    }

    #[test]
    fn self_never_remote() {
        let me = PeerId::from("me");
        let records = vec![
            record("me", true, twitter(), 1),
            record("a", true, twitter(), 2),
        ];
        let c = eligible(&records, &me, WorkerCategory::Twitter);
        assert_eq!(ids(&c.remote), ["a"]);
        assert!(c.local_eligible);
    }

    #[test]
    fn unstaked_never_eligible() {
        let me = PeerId::from("me");
        let records = vec![
            record("me", false, twitter(), 1),
            record("a", false, twitter(), 2),
        ];
        let c = eligible(&records, &me, WorkerCategory::Twitter);
        assert!(c.remote.is_empty());
        assert!(!c.local_eligible);
    }

    #[test]
    fn capability_required() {
        let me = PeerId::from("me");
        let web = Capabilities::default().with(WorkerCategory::Web);
        let records = vec![record("a", true, web, 1), record("b", true, twitter(), 2)];
        let c = eligible(&records, &me, WorkerCategory::Web);
        assert_eq!(ids(&c.remote), ["a"]);
        // No local record at all: not eligible.
        assert!(!c.local_eligible);
    }

    #[test]
    fn last_updated_order() {
        let me = PeerId::from("me");
        let records = vec![
            record("c", true, twitter(), 30),
            record("b", true, twitter(), 10),
            record("a", true, twitter(), 30),
        ];
        let c = eligible_ordered(&records, &me, WorkerCategory::Twitter, CandidateOrder::LastUpdated);
        assert_eq!(ids(&c.remote), ["b", "a", "c"]);
    }

    #[test]
    fn reliability_order_prefers_clean_history() {
        let me = PeerId::from("me");
        let cat = WorkerCategory::Twitter;
        let mut flaky = record("a", true, twitter(), 1);
        flaky.apply_delta(&PerformanceDelta::not_found(cat, 50));
        let mut slow = record("b", true, twitter(), 1);
        slow.apply_delta(&PerformanceDelta::timed_out(cat, 40));
        let mut good = record("c", true, twitter(), 1);
        good.apply_delta(&PerformanceDelta::returned(cat, 60));
        let fresh = record("d", true, twitter(), 1);

        let records = vec![flaky, slow, good, fresh];
        let c = eligible_ordered(&records, &me, cat, CandidateOrder::Reliability);
        assert_eq!(ids(&c.remote), ["c", "d", "b", "a"]);
    }

    #[test]
    fn shuffled_keeps_membership() {
        let me = PeerId::from("me");
        let records: Vec<_> = (0..8)
            .map(|i| record(&format!("p{i}"), true, twitter(), i))
            .collect();
        let c = eligible_ordered(&records, &me, WorkerCategory::Twitter, CandidateOrder::Shuffled);
        let mut got = ids(&c.remote);
        got.sort();
        assert_eq!(got.len(), 8);
        assert_eq!(got[0], "p0");
    }
}
