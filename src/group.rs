use crate::normalize::{CanonicalKey, NormalizedRecord};
use indexmap::IndexMap;

/// Records sharing a canonical key, keyed in order of first appearance
pub type Groups = IndexMap<CanonicalKey, Vec<NormalizedRecord>>;

/// Group normalized records by exact canonical key.
///
/// Within a group records keep their input order; consolidation tie-breaks
/// depend on it. Near-identical agenda texts with different keys are never
/// merged here.
pub fn group(records: impl IntoIterator<Item = NormalizedRecord>) -> Groups {
    let mut groups: Groups = IndexMap::new();
    for record in records {
        groups.entry(record.key.clone()).or_default().push(record);
    }
    groups
}

/// Number of records that will be folded into another record of their group
pub fn duplicate_count(groups: &Groups) -> usize {
    groups.values().map(|members| members.len().saturating_sub(1)).sum()
}
