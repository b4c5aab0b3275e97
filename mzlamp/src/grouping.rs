//! One-hop neighborhoods of the correlation edge graph.
use std::collections::HashMap;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::correlation::CorrelationEdge;

/// The separator used when a list of names is written as a single value
pub const MEMBER_SEPARATOR: &str = "::";

/// A feature and the features it is directly correlated with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupEntry {
    pub name: String,
    pub group_size: usize,
    #[serde(serialize_with = "serialize_joined")]
    pub group_members: Vec<String>,
}

fn serialize_joined<S: Serializer>(members: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&members.join(MEMBER_SEPARATOR))
}

impl GroupEntry {
    pub fn new(name: String, group_members: Vec<String>) -> Self {
        Self {
            name,
            group_size: group_members.len(),
            group_members,
        }
    }

    /// The partner names joined by `::`
    pub fn members_joined(&self) -> String {
        self.group_members.join(MEMBER_SEPARATOR)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.group_members.iter().any(|m| m == name)
    }
}

/// Collect the direct partners of every feature appearing in `edges`.
///
/// Partners are not followed transitively: with edges A-B and A-C, B's group is
/// only `[A]`. A feature's partners from edges where it is `feature_a` come first,
/// then those where it is `feature_b`, each in edge order. Groups are sorted by size,
/// largest first, ties keeping the order features first appear in `edges`.
pub fn neighbor_groups(edges: &[CorrelationEdge]) -> Vec<GroupEntry> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<String>)> = Vec::new();
    for edge in edges {
        for name in [edge.feature_a.as_str(), edge.feature_b.as_str()] {
            slots.entry(name).or_insert_with(|| {
                groups.push((name, Vec::new()));
                groups.len() - 1
            });
        }
    }

    for edge in edges {
        groups[slots[edge.feature_a.as_str()]]
            .1
            .push(edge.feature_b.clone());
    }
    for edge in edges {
        groups[slots[edge.feature_b.as_str()]]
            .1
            .push(edge.feature_a.clone());
    }

    let mut groups: Vec<GroupEntry> = groups
        .into_iter()
        .map(|(name, members)| GroupEntry::new(name.to_string(), members))
        .collect();
    groups.sort_by(|a, b| b.group_size.cmp(&a.group_size));
    debug!(
        "Built {} neighbor groups from {} edges",
        groups.len(),
        edges.len()
    );
    groups
}
