//! Conflict resolution across replica responses
//!
//! Given every successful response for one key, pick the winning record
//! and classify each replica against it. Delete-vs-update conflicts are
//! settled by the class deletion strategy:
//!
//! - `TimeBasedResolution`: newest version wins, a tie goes to the delete
//! - `DeleteOnConflict`: a tombstone at V beats every incarnation created
//!   at or before V, even one updated after V; a re-create after V wins
//! - `NoAutomatedResolution`: ordered like time based, but a winning
//!   delete over a live copy is reported as a conflict and never repaired
//!
//! The same `supersedes` relation is applied by replica nodes, so a repair
//! that lost a race is simply not applied.

use crate::common::{DeletionStrategy, Object, RecordDigest, Version};
use std::cmp::Ordering;

/// What one replica answered
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The node holds a record; `object` is absent for digest-only reads
    /// and tombstones
    Found {
        digest: RecordDigest,
        object: Option<Object>,
    },
    /// The node never saw the key
    Absent,
    /// Unreachable, timed out, or rejected
    Failed(String),
}

impl Reply {
    pub fn from_record(record: Option<crate::common::Record>) -> Self {
        match record {
            Some(record) => Reply::Found {
                digest: record.digest(),
                object: record.into_object(),
            },
            None => Reply::Absent,
        }
    }

    pub fn from_digest(digest: Option<RecordDigest>) -> Self {
        match digest {
            Some(digest) => Reply::Found {
                digest,
                object: None,
            },
            None => Reply::Absent,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Reply::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaResponse {
    pub node: String,
    pub reply: Reply,
}

impl ReplicaResponse {
    pub fn new(node: impl Into<String>, reply: Reply) -> Self {
        Self {
            node: node.into(),
            reply,
        }
    }
}

/// The record every replica should converge to
#[derive(Debug, Clone, PartialEq)]
pub enum Winner {
    Live {
        digest: RecordDigest,
        /// Missing when only digests were read
        object: Option<Object>,
        /// A node known to hold the winning object
        source: String,
    },
    Tombstone {
        deleted_at: Version,
    },
    /// No replica holds anything for the key
    Absent,
}

impl Winner {
    pub fn digest(&self) -> Option<RecordDigest> {
        match self {
            Winner::Live { digest, .. } => Some(*digest),
            Winner::Tombstone { deleted_at } => Some(RecordDigest::tombstone(*deleted_at)),
            Winner::Absent => None,
        }
    }

    pub fn object(&self) -> Option<&Object> {
        match self {
            Winner::Live { object, .. } => object.as_ref(),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Winner::Live { .. })
    }
}

/// How a replica compares to the winner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Agrees,
    /// Holds an older or losing record
    Stale,
    /// Holds nothing, or did not answer
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every replica already holds the winner
    Agree,
    /// Some replicas are behind, no delete/update conflict
    StaleFound,
    /// A tombstone beat a live copy
    DeleteWins,
    /// A live copy beat a tombstone
    UpdateWins,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winner: Winner,
    pub verdicts: Vec<(String, Verdict)>,
    pub outcome: Outcome,
    /// Set when the strategy refuses to settle the conflict
    pub conflict: bool,
}

impl Resolution {
    /// Nodes that do not hold the winning record
    pub fn stale_nodes(&self) -> impl Iterator<Item = &str> {
        self.verdicts
            .iter()
            .filter(|(_, verdict)| *verdict != Verdict::Agrees)
            .map(|(node, _)| node.as_str())
    }

    pub fn needs_repair(&self) -> bool {
        !self.conflict && self.winner != Winner::Absent && self.stale_nodes().next().is_some()
    }
}

/// Does tombstone `tomb` win over live record `live`?
fn delete_beats(strategy: DeletionStrategy, tomb: &RecordDigest, live: &RecordDigest) -> bool {
    match strategy {
        DeletionStrategy::DeleteOnConflict => delete_on_conflict(tomb, live),
        DeletionStrategy::TimeBasedResolution | DeletionStrategy::NoAutomatedResolution => {
            time_based(tomb, live)
        }
    }
}

fn time_based(tomb: &RecordDigest, live: &RecordDigest) -> bool {
    tomb.version >= live.version
}

fn delete_on_conflict(tomb: &RecordDigest, live: &RecordDigest) -> bool {
    tomb.version >= live.version || live.created_at <= tomb.version
}

/// Total order of live records. Under `DeleteOnConflict` a later
/// incarnation outranks any write to an earlier one; otherwise the last
/// write wins and the incarnation only breaks ties.
fn live_rank(strategy: DeletionStrategy, live: &RecordDigest) -> (Version, Version) {
    match strategy {
        DeletionStrategy::DeleteOnConflict => (live.created_at, live.version),
        DeletionStrategy::TimeBasedResolution | DeletionStrategy::NoAutomatedResolution => {
            (live.version, live.created_at)
        }
    }
}

/// Strict dominance: true when `incoming` should replace `existing`
pub fn supersedes(
    strategy: DeletionStrategy,
    incoming: &RecordDigest,
    existing: &RecordDigest,
) -> bool {
    match (incoming.deleted, existing.deleted) {
        (true, true) => incoming.version > existing.version,
        (false, false) => live_rank(strategy, incoming) > live_rank(strategy, existing),
        (true, false) => delete_beats(strategy, incoming, existing),
        (false, true) => !delete_beats(strategy, existing, incoming),
    }
}

/// Pick the winner among `responses` and classify every replica.
///
/// Live copies dominated by the newest tombstone are dropped first, then the
/// highest ranked survivor wins. The result does not depend on the order of
/// `responses`.
pub fn resolve(strategy: DeletionStrategy, responses: &[ReplicaResponse]) -> Resolution {
    let best_tomb = responses
        .iter()
        .filter_map(|response| match &response.reply {
            Reply::Found { digest, .. } if digest.deleted => Some(digest.version),
            _ => None,
        })
        .max()
        .map(RecordDigest::tombstone);

    let mut any_live = false;
    let mut best_live: Option<(&RecordDigest, &Option<Object>, &str)> = None;
    for response in responses {
        let Reply::Found { digest, object } = &response.reply else {
            continue;
        };
        if digest.deleted {
            continue;
        }
        any_live = true;
        if best_tomb
            .as_ref()
            .is_some_and(|tomb| delete_beats(strategy, tomb, digest))
        {
            continue;
        }
        let better = match best_live {
            None => true,
            Some((d, o, node)) => match live_rank(strategy, digest).cmp(&live_rank(strategy, d)) {
                Ordering::Greater => true,
                Ordering::Less => false,
                // same record: prefer a payload, then the lowest node name
                Ordering::Equal => match (object.is_some(), o.is_some()) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => response.node.as_str() < node,
                },
            },
        };
        if better {
            best_live = Some((digest, object, response.node.as_str()));
        }
    }

    let mut conflict = false;
    let winner = match (best_live, best_tomb) {
        (Some((digest, object, source)), _) => Winner::Live {
            digest: *digest,
            object: object.clone(),
            source: source.to_string(),
        },
        (None, Some(tomb)) => {
            conflict = any_live && strategy == DeletionStrategy::NoAutomatedResolution;
            Winner::Tombstone {
                deleted_at: tomb.version,
            }
        }
        (None, None) => Winner::Absent,
    };

    let winning_digest = winner.digest();
    let verdicts: Vec<(String, Verdict)> = responses
        .iter()
        .map(|response| {
            let verdict = match (&response.reply, &winning_digest) {
                (Reply::Found { digest, .. }, Some(w)) if digest == w => Verdict::Agrees,
                (Reply::Found { .. }, _) => Verdict::Stale,
                (Reply::Absent, None) => Verdict::Agrees,
                (Reply::Absent, Some(_)) | (Reply::Failed(_), _) => Verdict::Missing,
            };
            (response.node.clone(), verdict)
        })
        .collect();

    let outcome = if verdicts.iter().all(|(_, v)| *v == Verdict::Agrees) {
        Outcome::Agree
    } else {
        match &winner {
            Winner::Tombstone { .. } if any_live => Outcome::DeleteWins,
            Winner::Live { .. } if best_tomb.is_some() => Outcome::UpdateWins,
            _ => Outcome::StaleFound,
        }
    };

    Resolution {
        winner,
        verdicts,
        outcome,
        conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PropertyValue;
    use uuid::Uuid;

    fn live(node: &str, version: u64, created_at: u64) -> ReplicaResponse {
        let mut obj = Object::new("Paragraph", Uuid::nil())
            .with_property("v", PropertyValue::Int(version as i64));
        obj.created_at = created_at;
        obj.last_update = version;
        ReplicaResponse::new(
            node,
            Reply::Found {
                digest: obj.digest(),
                object: Some(obj),
            },
        )
    }

    fn tomb(node: &str, version: u64) -> ReplicaResponse {
        ReplicaResponse::new(
            node,
            Reply::Found {
                digest: RecordDigest::tombstone(version),
                object: None,
            },
        )
    }

    fn verdict(res: &Resolution, node: &str) -> Verdict {
        res.verdicts
            .iter()
            .find(|(n, _)| n == node)
            .map(|(_, v)| *v)
            .unwrap()
    }

    #[test]
    fn test_all_agree() {
        let responses = vec![live("n1", 5, 1), live("n2", 5, 1), live("n3", 5, 1)];
        let res = resolve(DeletionStrategy::DeleteOnConflict, &responses);
        assert_eq!(res.outcome, Outcome::Agree);
        assert!(!res.needs_repair());
    }

    #[test]
    fn test_stale_and_missing() {
        let responses = vec![
            live("n1", 5, 1),
            live("n2", 3, 1),
            ReplicaResponse::new("n3", Reply::Absent),
            ReplicaResponse::new("n4", Reply::Failed("timeout".into())),
        ];
        let res = resolve(DeletionStrategy::TimeBasedResolution, &responses);
        assert_eq!(res.outcome, Outcome::StaleFound);
        assert_eq!(verdict(&res, "n1"), Verdict::Agrees);
        assert_eq!(verdict(&res, "n2"), Verdict::Stale);
        assert_eq!(verdict(&res, "n3"), Verdict::Missing);
        assert_eq!(verdict(&res, "n4"), Verdict::Missing);
        assert_eq!(res.stale_nodes().collect::<Vec<_>>(), vec!["n2", "n3", "n4"]);
    }

    #[test]
    fn test_delete_on_conflict_beats_old_lineage_update() {
        // n2 updated the object at 4, after the delete at 3, but the object
        // was created at 1
        let responses = vec![tomb("n1", 3), live("n2", 4, 1), tomb("n3", 3)];
        let res = resolve(DeletionStrategy::DeleteOnConflict, &responses);
        assert_eq!(res.winner, Winner::Tombstone { deleted_at: 3 });
        assert_eq!(res.outcome, Outcome::DeleteWins);
        assert!(!res.conflict);
        assert_eq!(res.stale_nodes().collect::<Vec<_>>(), vec!["n2"]);
    }

    #[test]
    fn test_delete_on_conflict_recreate_wins() {
        let responses = vec![tomb("n1", 3), live("n2", 5, 5)];
        let res = resolve(DeletionStrategy::DeleteOnConflict, &responses);
        assert!(res.winner.is_live());
        assert_eq!(res.outcome, Outcome::UpdateWins);
    }

    #[test]
    fn test_time_based_newest_wins() {
        let responses = vec![tomb("n1", 3), live("n2", 4, 1)];
        let res = resolve(DeletionStrategy::TimeBasedResolution, &responses);
        assert!(res.winner.is_live());
        assert_eq!(res.outcome, Outcome::UpdateWins);

        let responses = vec![tomb("n1", 4), live("n2", 4, 1)];
        let res = resolve(DeletionStrategy::TimeBasedResolution, &responses);
        assert_eq!(res.winner, Winner::Tombstone { deleted_at: 4 });
    }

    #[test]
    fn test_no_automated_resolution_flags_conflict() {
        let responses = vec![tomb("n1", 5), live("n2", 4, 1)];
        let res = resolve(DeletionStrategy::NoAutomatedResolution, &responses);
        assert!(res.conflict);
        assert!(!res.needs_repair());

        let responses = vec![tomb("n1", 3), live("n2", 4, 1)];
        let res = resolve(DeletionStrategy::NoAutomatedResolution, &responses);
        assert!(!res.conflict);
        assert!(res.winner.is_live());
    }

    #[test]
    fn test_digest_only_winner_keeps_source() {
        let responses = vec![
            ReplicaResponse::new("n1", Reply::from_digest(Some(RecordDigest::live(7, 2)))),
            ReplicaResponse::new("n2", Reply::from_digest(Some(RecordDigest::live(6, 2)))),
        ];
        let res = resolve(DeletionStrategy::TimeBasedResolution, &responses);
        match res.winner {
            Winner::Live { object, source, .. } => {
                assert!(object.is_none());
                assert_eq!(source, "n1");
            }
            other => panic!("unexpected winner {:?}", other),
        }
    }

    #[test]
    fn test_supersedes_is_strict() {
        for strategy in [
            DeletionStrategy::NoAutomatedResolution,
            DeletionStrategy::DeleteOnConflict,
            DeletionStrategy::TimeBasedResolution,
        ] {
            let l = RecordDigest::live(4, 1);
            let t = RecordDigest::tombstone(4);
            assert!(!supersedes(strategy, &l, &l));
            assert!(!supersedes(strategy, &t, &t));
            assert!(supersedes(strategy, &t, &l));
            assert!(!supersedes(strategy, &l, &t));
        }
    }

    #[test]
    fn test_resolve_is_order_independent() {
        let mut responses = vec![tomb("n1", 3), live("n2", 4, 1), live("n3", 2, 1)];
        let first = resolve(DeletionStrategy::DeleteOnConflict, &responses);
        responses.reverse();
        let second = resolve(DeletionStrategy::DeleteOnConflict, &responses);
        assert_eq!(first.winner, second.winner);
        assert_eq!(first.outcome, second.outcome);
    }

    #[test]
    fn test_equal_versions_are_ordered_by_incarnation() {
        for strategy in [
            DeletionStrategy::NoAutomatedResolution,
            DeletionStrategy::DeleteOnConflict,
            DeletionStrategy::TimeBasedResolution,
        ] {
            let old = RecordDigest::live(10, 1);
            let recreated = RecordDigest::live(10, 6);
            assert!(supersedes(strategy, &recreated, &old));
            assert!(!supersedes(strategy, &old, &recreated));
        }

        // the copy marked stale is the one the winner replaces
        let responses = vec![live("n1", 10, 1), live("n2", 10, 6)];
        let res = resolve(DeletionStrategy::TimeBasedResolution, &responses);
        assert_eq!(verdict(&res, "n1"), Verdict::Stale);
        assert_eq!(res.winner.digest(), Some(RecordDigest::live(10, 6)));
    }

    #[test]
    fn test_dominated_copies_drop_out_before_ranking() {
        let mut responses = vec![live("a", 10, 1), live("b", 10, 6), tomb("c", 5)];
        let first = resolve(DeletionStrategy::DeleteOnConflict, &responses);
        responses.reverse();
        let second = resolve(DeletionStrategy::DeleteOnConflict, &responses);

        assert_eq!(first.winner, second.winner);
        assert_eq!(first.winner.digest(), Some(RecordDigest::live(10, 6)));
        assert_eq!(first.outcome, Outcome::UpdateWins);
        assert_eq!(verdict(&first, "a"), Verdict::Stale);
        assert_eq!(verdict(&first, "c"), Verdict::Stale);
    }

    #[test]
    fn test_later_incarnation_wins_under_delete_on_conflict() {
        // an update to the old lineage written after the re-create still
        // loses to the re-created object
        let responses = vec![live("n1", 9, 2), live("n2", 7, 6), tomb("n3", 4)];
        let res = resolve(DeletionStrategy::DeleteOnConflict, &responses);
        assert_eq!(res.winner.digest(), Some(RecordDigest::live(7, 6)));
        assert!(supersedes(
            DeletionStrategy::DeleteOnConflict,
            &RecordDigest::live(7, 6),
            &RecordDigest::live(9, 2)
        ));
    }
}
