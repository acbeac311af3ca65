//! Reconciliation of the reference list against in-text citations

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// References never cited
    pub unreferenced: BTreeSet<u32>,
    /// References cited more than once, with their count
    pub over_cited: BTreeMap<u32, usize>,
    /// Cited numbers with no reference entry
    pub out_of_range: BTreeSet<u32>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.unreferenced.is_empty() && self.over_cited.is_empty() && self.out_of_range.is_empty()
    }
}

/// Compare `total` references against every cited number (duplicates kept)
pub fn reconcile(total: u32, cited: &[u32]) -> ReconciliationReport {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for &n in cited {
        *counts.entry(n).or_insert(0) += 1;
    }

    let unreferenced = (1..=total).filter(|n| !counts.contains_key(n)).collect();
    let out_of_range = counts
        .keys()
        .copied()
        .filter(|&n| n == 0 || n > total)
        .collect();
    let over_cited = counts.into_iter().filter(|&(_, c)| c > 1).collect();

    ReconciliationReport {
        unreferenced,
        over_cited,
        out_of_range,
    }
}
