//! Membership table.
//!
//! The table covers a fixed universe of node ids, each carrying an
//! `eligible` flag. Turn order is derived from the ids alone (ascending,
//! wrapping), never from insertion order. Two nodes holding the same flags
//! therefore always agree on who comes next.

use std::collections::BTreeMap;

use crate::types::NodeId;

/// Eligibility of every node in the configured universe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipTable {
    entries: BTreeMap<NodeId, bool>,
}

impl MembershipTable {
    /// Creates a table over `universe` with every node ineligible.
    pub fn new(universe: impl IntoIterator<Item = NodeId>) -> Self {
        Self { entries: universe.into_iter().map(|id| (id, false)).collect() }
    }

    /// Sets a node's eligibility.
    ///
    /// Ids outside the universe are ignored. Returns true if the flag
    /// changed.
    pub fn mark(&mut self, node: NodeId, eligible: bool) -> bool {
        match self.entries.get_mut(&node) {
            Some(flag) if *flag != eligible => {
                *flag = eligible;
                true
            }
            _ => false,
        }
    }

    /// Returns the node's eligibility; false for ids outside the universe.
    pub fn get(&self, node: NodeId) -> bool {
        self.entries.get(&node).copied().unwrap_or(false)
    }

    /// Returns true if `node` belongs to the universe.
    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.contains_key(&node)
    }

    /// Next eligible node strictly after `after`, wrapping around.
    ///
    /// Never returns `after` itself, so `successor(self)` is `None` for a
    /// node that is alone. `after` does not need to be eligible or even part
    /// of the universe.
    pub fn successor(&self, after: NodeId) -> Option<NodeId> {
        let eligible = |(id, flag): (&NodeId, &bool)| (*flag && *id != after).then_some(*id);
        self.entries
            .range(after..)
            .filter_map(eligible)
            .next()
            .or_else(|| self.entries.range(..after).filter_map(eligible).next())
    }

    /// Returns true if any node outside `excluded` is eligible.
    pub fn any_eligible_other_than(&self, excluded: &[NodeId]) -> bool {
        self.entries.iter().any(|(id, flag)| *flag && !excluded.contains(id))
    }

    /// Eligible nodes in ascending order.
    pub fn eligible(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().filter(|(_, flag)| **flag).map(|(id, _)| *id)
    }

    /// Number of eligible nodes.
    pub fn eligible_count(&self) -> usize {
        self.eligible().count()
    }

    /// Every node of the universe in ascending order.
    pub fn universe(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }
}
