//! Merging a group of duplicate extractions into one canonical vote.

use crate::error::{Error, Result};
use crate::normalize::NormalizedRecord;
use crate::types::{Ballot, ConflictWarning, ConsolidatedVote, Tally};
use indexmap::IndexMap;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::HashSet;

/// Keys written by an earlier run; read back as provenance, never kept as opaque fields
const DERIVED_KEYS: &[&str] = &["consolidated_from", "conflicts"];

/// Merge one canonical-key group into a single vote.
///
/// Ballots are unioned in input order; the first value seen for a
/// councilmember wins and every disagreement is kept as a
/// [`ConflictWarning`]. Conflicts never fail the merge.
///
/// Members that are themselves consolidated votes contribute the provenance
/// and conflicts recorded when they were built, so consolidating an output
/// dataset again reproduces it.
pub fn consolidate(group: Vec<NormalizedRecord>) -> Result<ConsolidatedVote> {
    let first = group.first().ok_or(Error::EmptyGroup)?;

    let (individual_votes, ballot_conflicts) = merge_ballots(&group);
    let mut conflicts: Vec<ConflictWarning> = Vec::new();
    for conflict in group.iter().flat_map(prior_conflicts).chain(ballot_conflicts) {
        // Re-importing a source record already folded into a vote repeats its conflict
        if !conflicts.contains(&conflict) {
            conflicts.push(conflict);
        }
    }

    let tally = if group.len() == 1 {
        // A unique extraction keeps its stated tally; the reconciler checks it
        // against the ballots later.
        first
            .raw
            .tally
            .unwrap_or_else(|| Tally::from_ballots(individual_votes.values()))
    } else if !individual_votes.is_empty() {
        Tally::from_ballots(individual_votes.values())
    } else {
        let (tally, tally_conflicts) = select_tally(&group);
        conflicts.extend(tally_conflicts);
        tally
    };

    let (meta_id, video_timestamp, timestamp_estimated) = video_position(&group);
    let frame_number = group
        .iter()
        .map(|r| r.raw.frame_number)
        .min()
        .unwrap_or_default();

    let mut extra = first.raw.extra.clone();
    for key in DERIVED_KEYS {
        extra.remove(*key);
    }

    Ok(ConsolidatedVote {
        id: first.id.clone(),
        meeting_id: first.meeting_id.clone(),
        agenda_item: first.agenda_item.clone(),
        frame_number,
        tally,
        individual_votes,
        meta_id,
        video_timestamp,
        timestamp_estimated,
        consolidated_from: provenance(&group),
        conflicts,
        extra,
    })
}

/// Video position taken from a single member so the timestamp and its
/// `timestamp_estimated` flag always describe the same observation.
///
/// The member is the first with an actual timestamp, else the first with any
/// timestamp. Its `meta_id` is used when it has one, otherwise the first
/// `meta_id` in the group.
fn video_position(group: &[NormalizedRecord]) -> (Option<String>, Option<u64>, bool) {
    let timed = group
        .iter()
        .find(|r| r.raw.has_actual_timestamp())
        .or_else(|| group.iter().find(|r| r.raw.video_timestamp.is_some()));

    let first_meta_id = || group.iter().find_map(|r| r.raw.meta_id.clone());
    match timed {
        Some(record) => (
            record.raw.meta_id.clone().or_else(first_meta_id),
            record.raw.video_timestamp,
            !record.raw.has_actual_timestamp(),
        ),
        None => (first_meta_id(), None, true),
    }
}

/// Source ids of the group in input order, expanding earlier consolidations.
///
/// Ids read back from an earlier `consolidated_from` are listed once, and a
/// record whose id such a list already covers adds nothing. Two input
/// records sharing an id are both listed, so the validator reports the
/// clash instead of one record vanishing from the provenance.
fn provenance(group: &[NormalizedRecord]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    let mut expanded: HashSet<String> = HashSet::new();

    for record in group {
        let prior: Vec<String> = match record.raw.extra.get("consolidated_from") {
            Some(Value::Array(ids)) => ids
                .iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        if prior.is_empty() {
            if !expanded.contains(&record.id) {
                sources.push(record.id.clone());
            }
            continue;
        }
        for id in prior {
            if !sources.contains(&id) {
                sources.push(id.clone());
            }
            expanded.insert(id);
        }
    }
    sources
}

fn prior_conflicts(record: &NormalizedRecord) -> Vec<ConflictWarning> {
    record
        .raw
        .extra
        .get("conflicts")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

/// Union of all ballots in the group, first-seen wins
fn merge_ballots(group: &[NormalizedRecord]) -> (IndexMap<String, Ballot>, Vec<ConflictWarning>) {
    let mut merged: IndexMap<String, (Ballot, usize)> = IndexMap::new();
    let mut conflicts = Vec::new();

    for (index, record) in group.iter().enumerate() {
        for (name, ballot) in &record.ballots {
            match merged.get(name) {
                None => {
                    merged.insert(name.clone(), (*ballot, index));
                }
                Some((kept, source)) if kept != ballot => {
                    conflicts.push(ConflictWarning::Ballot {
                        councilmember: name.clone(),
                        kept_value: *kept,
                        discarded_value: *ballot,
                        source_ids: vec![group[*source].id.clone(), record.id.clone()],
                    });
                }
                Some(_) => {}
            }
        }
    }

    let ballots = merged
        .into_iter()
        .map(|(name, (ballot, _))| (name, ballot))
        .collect();
    (ballots, conflicts)
}

/// Preference among members reporting the same tally: a known meta id first,
/// then the earliest frame, then input order. Smaller is better.
fn preference(record: &NormalizedRecord, index: usize) -> (bool, u32, usize) {
    (record.raw.meta_id.is_none(), record.raw.frame_number, index)
}

/// Pick the most frequently reported tally when no member has ballots
fn select_tally(group: &[NormalizedRecord]) -> (Tally, Vec<ConflictWarning>) {
    let mut reported: IndexMap<Tally, Vec<usize>> = IndexMap::new();
    for (index, record) in group.iter().enumerate() {
        if let Some(tally) = record.raw.tally {
            reported.entry(tally).or_default().push(index);
        }
    }

    let winner = reported
        .iter()
        .min_by_key(|(_, members)| {
            let best = members
                .iter()
                .map(|&index| preference(&group[index], index))
                .min();
            (Reverse(members.len()), best)
        })
        .map(|(tally, _)| *tally);

    let Some(kept) = winner else {
        return (Tally::default(), Vec::new());
    };

    let conflicts = reported
        .iter()
        .filter(|(tally, _)| **tally != kept)
        .map(|(tally, members)| ConflictWarning::Tally {
            kept,
            discarded: *tally,
            source_ids: members.iter().map(|&index| group[index].id.clone()).collect(),
        })
        .collect();

    (kept, conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::types::RawVoteRecord;

    fn normalized(records: Vec<RawVoteRecord>) -> Vec<NormalizedRecord> {
        records
            .into_iter()
            .enumerate()
            .map(|(position, raw)| normalize(raw, position).unwrap())
            .collect()
    }

    fn tally(ayes: i64, noes: i64) -> Tally {
        Tally {
            ayes,
            noes,
            ..Tally::default()
        }
    }

    #[test]
    fn test_single_record_is_wrapped() {
        let raw = RawVoteRecord::new("v1", "14510", "1. Call to Order")
            .with_frame(12)
            .with_tally(tally(7, 0));
        let vote = consolidate(normalized(vec![raw])).unwrap();

        assert_eq!(vote.id, "v1");
        assert_eq!(vote.consolidated_from, vec!["v1"]);
        assert_eq!(vote.tally, tally(7, 0));
        assert_eq!(vote.frame_number, 12);
        assert!(vote.timestamp_estimated);
        assert!(vote.conflicts.is_empty());
    }

    #[test]
    fn test_case_variants_merge_with_provenance() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "14510", "5. Council Committee...").with_frame(40),
            RawVoteRecord::new("b", "14510", "5. council committee...").with_frame(41),
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(vote.consolidated_from, vec!["a", "b"]);
        assert_eq!(vote.agenda_item, "5. Council Committee...");
    }

    #[test]
    fn test_conflicting_ballot_keeps_first_seen() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "14510", "9A. Budget")
                .with_frame(20)
                .with_ballot("GERSON", Ballot::Yes)
                .with_ballot("KAJI", Ballot::Yes),
            RawVoteRecord::new("b", "14510", "9A. Budget")
                .with_frame(3)
                .with_ballot("Gerson", Ballot::No)
                .with_ballot("LEWIS", Ballot::No),
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(vote.individual_votes.get("gerson"), Some(&Ballot::Yes));
        assert_eq!(vote.individual_votes.len(), 3);
        assert_eq!(
            vote.conflicts,
            vec![ConflictWarning::Ballot {
                councilmember: "gerson".to_string(),
                kept_value: Ballot::Yes,
                discarded_value: Ballot::No,
                source_ids: vec!["a".to_string(), "b".to_string()],
            }]
        );
        assert_eq!(vote.tally, tally(2, 1));
        assert_eq!(vote.frame_number, 3);
    }

    #[test]
    fn test_tally_from_ballots_ignores_absent() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "3. Item")
                .with_tally(tally(9, 9))
                .with_ballot("chen", Ballot::Yes)
                .with_ballot("kalani", Ballot::Recuse),
            RawVoteRecord::new("b", "1", "3. Item").with_ballot("shaikh", Ballot::Absent),
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(
            vote.tally,
            Tally {
                ayes: 1,
                recused: 1,
                ..Tally::default()
            }
        );
        assert_eq!(vote.tally.total(), vote.present_ballots());
    }

    #[test]
    fn test_most_frequent_tally_wins() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "4. Item").with_tally(tally(5, 2)),
            RawVoteRecord::new("b", "1", "4. Item").with_tally(tally(6, 1)),
            RawVoteRecord::new("c", "1", "4. Item").with_tally(tally(6, 1)),
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(vote.tally, tally(6, 1));
        assert_eq!(
            vote.conflicts,
            vec![ConflictWarning::Tally {
                kept: tally(6, 1),
                discarded: tally(5, 2),
                source_ids: vec!["a".to_string()],
            }]
        );
    }

    #[test]
    fn test_tally_tie_prefers_meta_id_then_earliest_frame() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "4. Item").with_frame(1).with_tally(tally(5, 2)),
            RawVoteRecord::new("b", "1", "4. Item")
                .with_frame(9)
                .with_tally(tally(6, 1))
                .with_video("8812", None, true),
        ]);
        assert_eq!(consolidate(group).unwrap().tally, tally(6, 1));

        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "4. Item").with_frame(9).with_tally(tally(5, 2)),
            RawVoteRecord::new("b", "1", "4. Item").with_frame(2).with_tally(tally(6, 1)),
        ]);
        assert_eq!(consolidate(group).unwrap().tally, tally(6, 1));
    }

    #[test]
    fn test_actual_timestamp_preferred_over_earlier_estimate() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "4. Item"),
            RawVoteRecord::new("b", "1", "4. Item").with_video("8812", Some(300), true),
            RawVoteRecord::new("c", "1", "4. Item").with_video("8813", Some(420), false),
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(vote.meta_id.as_deref(), Some("8813"));
        assert_eq!(vote.video_timestamp, Some(420));
        assert!(!vote.timestamp_estimated);
    }

    #[test]
    fn test_estimated_timestamp_keeps_its_flag() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "4. Item"),
            RawVoteRecord::new("b", "1", "4. Item").with_video("8812", Some(300), true),
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(vote.meta_id.as_deref(), Some("8812"));
        assert_eq!(vote.video_timestamp, Some(300));
        assert!(vote.timestamp_estimated);
    }

    #[test]
    fn test_meta_id_falls_back_when_timed_member_has_none() {
        let mut timed = RawVoteRecord::new("b", "1", "4. Item");
        timed.video_timestamp = Some(500);
        timed.timestamp_estimated = Some(false);
        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "4. Item").with_video("8812", None, true),
            timed,
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(vote.meta_id.as_deref(), Some("8812"));
        assert_eq!(vote.video_timestamp, Some(500));
        assert!(!vote.timestamp_estimated);
    }

    #[test]
    fn test_repeated_input_id_stays_in_provenance() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "5. Item").with_ballot("chen", Ballot::Yes),
            RawVoteRecord::new("a", "1", "5. item").with_ballot("kaji", Ballot::No),
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(vote.consolidated_from, vec!["a", "a"]);
        assert_eq!(vote.individual_votes.len(), 2);
    }

    #[test]
    fn test_reimported_source_is_not_listed_twice() {
        let mut existing = RawVoteRecord::new("a", "1", "4. Item")
            .with_ballot("gerson", Ballot::Yes)
            .with_ballot("kaji", Ballot::No);
        existing
            .extra
            .insert("consolidated_from".to_string(), serde_json::json!(["a", "b"]));
        existing.extra.insert(
            "conflicts".to_string(),
            serde_json::json!([{
                "kind": "ballot",
                "councilmember": "gerson",
                "kept_value": "YES",
                "discarded_value": "NO",
                "source_ids": ["a", "b"]
            }]),
        );
        let group = normalized(vec![
            existing,
            RawVoteRecord::new("a", "1", "4. Item").with_ballot("gerson", Ballot::Yes),
            RawVoteRecord::new("b", "1", "4. Item").with_ballot("gerson", Ballot::No),
            RawVoteRecord::new("c", "1", "4. Item").with_ballot("lewis", Ballot::Yes),
        ]);
        let vote = consolidate(group).unwrap();

        assert_eq!(vote.consolidated_from, vec!["a", "b", "c"]);
        assert_eq!(vote.conflicts.len(), 1);
        assert_eq!(vote.individual_votes.len(), 3);
    }

    #[test]
    fn test_estimated_when_no_actual_timestamp() {
        let group = normalized(vec![
            RawVoteRecord::new("a", "1", "4. Item").with_video("8812", Some(300), true),
            RawVoteRecord::new("b", "1", "4. Item"),
        ]);
        assert!(consolidate(group).unwrap().timestamp_estimated);
    }

    #[test]
    fn test_earlier_consolidation_is_carried_forward() {
        let mut raw = RawVoteRecord::new("a", "1", "4. Item");
        raw.extra
            .insert("consolidated_from".to_string(), serde_json::json!(["a", "x"]));
        raw.extra.insert(
            "conflicts".to_string(),
            serde_json::json!([{
                "kind": "ballot",
                "councilmember": "chen",
                "kept_value": "YES",
                "discarded_value": "NO",
                "source_ids": ["a", "x"]
            }]),
        );
        raw.extra
            .insert("motion_text".to_string(), serde_json::json!("approve"));
        let vote = consolidate(normalized(vec![
            raw,
            RawVoteRecord::new("b", "1", "4. item"),
        ]))
        .unwrap();

        assert_eq!(vote.consolidated_from, vec!["a", "x", "b"]);
        assert_eq!(vote.conflicts.len(), 1);
        assert!(!vote.extra.contains_key("consolidated_from"));
        assert!(!vote.extra.contains_key("conflicts"));
        assert!(vote.extra.contains_key("motion_text"));
    }

    #[test]
    fn test_empty_group_is_an_error() {
        assert!(matches!(consolidate(Vec::new()), Err(Error::EmptyGroup)));
    }
}
