//! Per-declaration attempt counters for a single job lineage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rule::RuleId;

/// Counts matched failures per retry declaration.
///
/// Owned by the job's execution state and carried across retries of the same
/// lineage. Declarations never share a counter, even when they list the same
/// exception kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptCounters(BTreeMap<RuleId, u32>);

impl AttemptCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for `rule` (0 if it never matched).
    pub fn get(&self, rule: RuleId) -> u32 {
        self.0.get(&rule).copied().unwrap_or(0)
    }

    /// Increment the counter for `rule` and return the new value.
    pub fn increment(&mut self, rule: RuleId) -> u32 {
        let count = self.0.entry(rule).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Drop every counter (a new lineage begins).
    pub fn reset(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RuleId, u32)> + '_ {
        self.0.iter().map(|(rule, count)| (*rule, *count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment_independently() {
        let mut counters = AttemptCounters::new();
        let a = RuleId::new(0);
        let b = RuleId::new(1);

        assert_eq!(counters.get(a), 0);
        assert_eq!(counters.increment(a), 1);
        assert_eq!(counters.increment(a), 2);
        assert_eq!(counters.increment(b), 1);

        assert_eq!(counters.get(a), 2);
        assert_eq!(counters.get(b), 1);
        assert_eq!(counters.iter().collect::<Vec<_>>(), vec![(a, 2), (b, 1)]);
    }

    #[test]
    fn reset_clears_everything() {
        let mut counters = AttemptCounters::new();
        counters.increment(RuleId::new(3));
        counters.reset();

        assert!(counters.is_empty());
        assert_eq!(counters.get(RuleId::new(3)), 0);
    }

    #[test]
    fn serializes_as_a_map() {
        let mut counters = AttemptCounters::new();
        counters.increment(RuleId::new(1));

        let json = serde_json::to_value(&counters).unwrap();
        assert_eq!(json, serde_json::json!({ "1": 1 }));

        let back: AttemptCounters = serde_json::from_value(json).unwrap();
        assert_eq!(back, counters);
    }
}
