//! Breadth-first traversal of declared relationships.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::snapshot::Snapshot;
use crate::types::{MemoryRecord, RelationshipKind};

/// One record reached during a walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainLink {
    pub record: MemoryRecord,
    /// `Root` for the seed; otherwise the stored edge kind, `None` if the
    /// edge declared none
    pub relationship: Option<RelationshipKind>,
    /// Hops from the seed
    pub depth: usize,
    /// Record whose edge led here
    pub via: Option<String>,
    /// Seed this link was reached from
    pub root: String,
}

/// Walk outgoing relationships from `seed_id` up to `max_depth` hops.
///
/// Each id is visited at most once. Edges to ids missing from the snapshot
/// are skipped. An unknown seed yields an empty chain.
pub fn walk(snapshot: &Snapshot, seed_id: &str, max_depth: usize) -> Vec<ChainLink> {
    walk_from(snapshot, &[seed_id], max_depth)
}

/// Walk from several seeds sharing one visited set, so a record reachable
/// from two seeds appears once (attributed to the first seed that reached it).
pub fn walk_from<S: AsRef<str>>(
    snapshot: &Snapshot,
    seeds: &[S],
    max_depth: usize,
) -> Vec<ChainLink> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut chain = Vec::new();
    let mut queue: VecDeque<(&MemoryRecord, usize, &str)> = VecDeque::new();

    for seed in seeds {
        let seed = seed.as_ref();
        let Some(record) = snapshot.get(seed) else {
            debug!(seed_id = %seed, "Traversal seed not found");
            continue;
        };
        if !visited.insert(record.id.as_str()) {
            continue;
        }
        chain.push(ChainLink {
            record: record.clone(),
            relationship: Some(RelationshipKind::Root),
            depth: 0,
            via: None,
            root: record.id.clone(),
        });
        queue.push_back((record, 0, record.id.as_str()));
    }

    while let Some((current, depth, root)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for edge in &current.relationships {
            let Some(target) = snapshot.get(&edge.target_id) else {
                debug!(
                    from = %current.id,
                    target_id = %edge.target_id,
                    "Skipping dangling relationship"
                );
                continue;
            };
            if !visited.insert(target.id.as_str()) {
                continue;
            }
            chain.push(ChainLink {
                record: target.clone(),
                relationship: edge.kind.clone(),
                depth: depth + 1,
                via: Some(current.id.clone()),
                root: root.to_string(),
            });
            queue.push_back((target, depth + 1, root));
        }
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(chain: &[ChainLink]) -> Vec<&str> {
        chain.iter().map(|l| l.record.id.as_str()).collect()
    }

    #[test]
    fn test_walk_tags_seed_as_root() {
        let snapshot = Snapshot::from_records(vec![MemoryRecord::fact("seed").with_id("s")]);
        let chain = walk(&snapshot, "s", 3);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].relationship, Some(RelationshipKind::Root));
        assert_eq!(chain[0].depth, 0);
    }

    #[test]
    fn test_walk_survives_cycles() {
        let snapshot = Snapshot::from_records(vec![
            MemoryRecord::fact("a")
                .with_id("a")
                .with_relationship("b", Some(RelationshipKind::Next)),
            MemoryRecord::fact("b")
                .with_id("b")
                .with_relationship("c", Some(RelationshipKind::Next)),
            MemoryRecord::fact("c")
                .with_id("c")
                .with_relationship("a", Some(RelationshipKind::Next)),
        ]);
        let chain = walk(&snapshot, "a", 10);
        assert_eq!(ids(&chain), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_walk_respects_max_depth() {
        let snapshot = Snapshot::from_records(vec![
            MemoryRecord::fact("a")
                .with_id("a")
                .with_relationship("b", Some(RelationshipKind::Child)),
            MemoryRecord::fact("b")
                .with_id("b")
                .with_relationship("c", Some(RelationshipKind::Child)),
            MemoryRecord::fact("c").with_id("c"),
        ]);
        assert_eq!(ids(&walk(&snapshot, "a", 1)), vec!["a", "b"]);
        assert_eq!(ids(&walk(&snapshot, "a", 0)), vec!["a"]);
    }

    #[test]
    fn test_walk_skips_dangling_edges_and_keeps_kinds_verbatim() {
        let snapshot = Snapshot::from_records(vec![
            MemoryRecord::fact("seed")
                .with_id("s")
                .with_relationship("missing", Some(RelationshipKind::Parent))
                .with_relationship("n1", None)
                .with_relationship("n2", Some(RelationshipKind::Custom("cites".into()))),
            MemoryRecord::fact("n1").with_id("n1"),
            MemoryRecord::fact("n2").with_id("n2"),
        ]);
        let chain = walk(&snapshot, "s", 2);
        assert_eq!(ids(&chain), vec!["s", "n1", "n2"]);
        assert_eq!(chain[1].relationship, None);
        assert_eq!(
            chain[2].relationship,
            Some(RelationshipKind::Custom("cites".into()))
        );
        assert_eq!(chain[2].via.as_deref(), Some("s"));
    }

    #[test]
    fn test_walk_unknown_seed_is_empty() {
        let snapshot = Snapshot::default();
        assert!(walk(&snapshot, "nope", 2).is_empty());
    }

    #[test]
    fn test_walk_from_shares_visited_set() {
        let snapshot = Snapshot::from_records(vec![
            MemoryRecord::fact("a")
                .with_id("a")
                .with_relationship("shared", Some(RelationshipKind::Derived)),
            MemoryRecord::fact("b")
                .with_id("b")
                .with_relationship("shared", Some(RelationshipKind::Derived)),
            MemoryRecord::fact("shared").with_id("shared"),
        ]);
        let chain = walk_from(&snapshot, &["a", "b", "a"], 2);
        assert_eq!(ids(&chain), vec!["a", "b", "shared"]);
        assert_eq!(chain[2].root, "a");
    }
}
