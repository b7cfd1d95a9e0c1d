use council_votes::importer::{consolidate_dataset, Consolidation};
use council_votes::input::PositionedRecord;
use council_votes::persist::render_json;
use council_votes::prelude::*;
use council_votes::ValidationError;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Records as they come out of the extraction pass, including duplicates
fn raw_votes() -> Vec<Value> {
    vec![
        json!({
            "id": "14510_f040", "meeting_id": "14510", "frame_number": 40,
            "agenda_item": "5. Council Committee Meetings...",
            "vote_tally": {"ayes": 7, "noes": 0, "abstentions": 0},
            "motion_text": "Approve committee minutes"
        }),
        json!({
            "id": "14510_f041", "meeting_id": "14510", "frame_number": 41,
            "agenda_item": "5.  council committee meetings",
            "vote_tally": {"ayes": 7, "noes": 0, "abstentions": 0}
        }),
        json!({
            "id": "14510_f120", "meeting_id": "14510", "frame_number": 120,
            "agenda_item": "9A. Adopt FY2024 Budget",
            "individual_votes": {"GERSON": "YES", "Kaji": "no", "CHEN": "aye"}
        }),
        json!({
            "id": "14510_f118", "meeting_id": "14510", "frame_number": 118,
            "agenda_item": "9a. adopt fy2024 budget.",
            "meta_id": 8812,
            "individual_votes": [
                {"name": "gerson", "vote": "NO"},
                {"name": "Lewis", "vote": "ABSENT"}
            ]
        }),
        json!({
            "id": "14510_f200", "meeting_id": "14510", "frame_number": 200,
            "agenda_item": "10A. Award Contract"
        }),
        json!({
            "id": "14510_f201", "meeting_id": "14510", "frame_number": 201,
            "agenda_item": "10B. Award Contract"
        }),
        json!({
            "id": "14510_f300", "meeting_id": "14510", "frame_number": 300
        }),
        json!({
            "id": "14511_f010", "meeting_id": 14511, "frame_number": 10,
            "agenda_item": "3. Approval of Minutes",
            "individual_votes": {"Chen": "YES", "Kaji": "YES", "Lewis": "RECUSE"}
        }),
    ]
}

fn records(values: Vec<Value>) -> Vec<PositionedRecord> {
    values
        .into_iter()
        .enumerate()
        .map(|(position, value)| PositionedRecord {
            position,
            record: serde_json::from_value(value).unwrap(),
        })
        .collect()
}

fn meetings() -> IndexMap<String, Meeting> {
    serde_json::from_value(json!({
        "14510": {"title": "City Council Regular Meeting", "date": "2024-03-12"},
        "14511": {"title": "City Council Regular Meeting", "date": "2024-03-19"}
    }))
    .unwrap()
}

fn run(values: Vec<Value>) -> Consolidation {
    consolidate_dataset(records(values), meetings()).unwrap()
}

fn vote<'a>(dataset: &'a Dataset, id: &str) -> &'a ConsolidatedVote {
    dataset
        .votes
        .iter()
        .find(|vote| vote.id == id)
        .unwrap_or_else(|| panic!("no vote {}", id))
}

#[test]
fn test_case_and_spacing_variants_merge() {
    let result = run(raw_votes());
    let merged = vote(&result.dataset, "14510_f040");

    assert_eq!(merged.consolidated_from, vec!["14510_f040", "14510_f041"]);
    assert_eq!(merged.frame_number, 40);
    assert_eq!(merged.tally.ayes, 7);
    assert_eq!(merged.extra["motion_text"], "Approve committee minutes");
}

#[test]
fn test_first_seen_ballot_wins() {
    let result = run(raw_votes());
    let budget = vote(&result.dataset, "14510_f120");

    assert_eq!(budget.individual_votes["gerson"], Ballot::Yes);
    assert_eq!(budget.individual_votes["lewis"], Ballot::Absent);
    assert_eq!(budget.meta_id.as_deref(), Some("8812"));
    assert_eq!(budget.frame_number, 118);
    assert_eq!(budget.conflicts.len(), 1);
    assert_eq!(result.stats.conflicts, 1);

    let report = validate(&result.dataset);
    assert!(!report.blocks_persist(), "{:?}", report.errors);
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn test_numbering_prefixes_stay_distinct() {
    let result = run(raw_votes());
    assert_eq!(vote(&result.dataset, "14510_f200").consolidated_from.len(), 1);
    assert_eq!(vote(&result.dataset, "14510_f201").consolidated_from.len(), 1);
}

#[test]
fn test_missing_agenda_item_is_reported_not_fatal() {
    let result = run(raw_votes());

    assert_eq!(result.malformed.len(), 1);
    assert_eq!(result.malformed[0].record, "14510_f300");
    assert_eq!(result.malformed[0].position, 6);
    assert!(result
        .dataset
        .votes
        .iter()
        .all(|vote| !vote.consolidated_from.contains(&"14510_f300".to_string())));
    assert_eq!(result.dataset.votes.len(), 5);
}

#[test]
fn test_orphan_vote_blocks_persist() {
    let mut values = raw_votes();
    values.push(json!({
        "id": "99999_f001", "meeting_id": "99999", "agenda_item": "1. Call to Order"
    }));
    let result = run(values);

    let report = validate(&result.dataset);
    assert!(report.blocks_persist());
    assert!(report.errors.contains(&ValidationError::OrphanVote {
        vote_id: "99999_f001".to_string(),
        meeting_id: "99999".to_string(),
    }));
}

#[test]
fn test_tally_matches_ballots() {
    let result = run(raw_votes());
    for vote in &result.dataset.votes {
        if !vote.individual_votes.is_empty() {
            assert_eq!(vote.tally.total(), vote.present_ballots(), "vote {}", vote.id);
        }
    }
}

#[test]
fn test_provenance_covers_each_valid_record_once() {
    let result = run(raw_votes());
    let sources: Vec<&String> = result
        .dataset
        .votes
        .iter()
        .flat_map(|vote| &vote.consolidated_from)
        .collect();
    let unique: BTreeSet<&String> = sources.iter().copied().collect();

    assert_eq!(sources.len(), unique.len());
    assert_eq!(sources.len(), 7);
}

#[test]
fn test_partition_does_not_depend_on_input_order() {
    let forward = run(raw_votes());
    let mut reversed_input = raw_votes();
    reversed_input.reverse();
    let reversed = run(reversed_input);

    let partition = |c: &Consolidation| -> BTreeSet<BTreeSet<String>> {
        c.dataset
            .votes
            .iter()
            .map(|vote| vote.consolidated_from.iter().cloned().collect())
            .collect()
    };
    assert_eq!(partition(&forward), partition(&reversed));

    // Only the first-seen choice flips with the order
    assert_eq!(
        vote(&reversed.dataset, "14510_f118").individual_votes["gerson"],
        Ballot::No
    );
}

#[test]
fn test_reimporting_output_is_identical() {
    let first = run(raw_votes());
    let output: Value = serde_json::to_value(&first.dataset).unwrap();

    let votes = output["votes"].as_array().unwrap().clone();
    let meetings: IndexMap<String, Meeting> =
        serde_json::from_value(output["meetings"].clone()).unwrap();
    let second = consolidate_dataset(records(votes), meetings).unwrap();

    assert!(second.malformed.is_empty());
    assert_eq!(second.stats.duplicates_merged, 0);
    assert_eq!(
        render_json(&first.dataset).unwrap(),
        render_json(&second.dataset).unwrap()
    );
}

#[test]
fn test_councilmember_stats() {
    let result = run(raw_votes());
    let stats = &result.dataset.councilmember_stats;

    assert_eq!(
        result.dataset.councilmembers,
        vec!["chen", "gerson", "kaji", "lewis"]
    );
    assert_eq!(stats["chen"].total_votes, 2);
    assert_eq!(stats["lewis"].absent_votes, 1);
    assert_eq!(stats["lewis"].recused_votes, 1);
    assert_eq!(stats["lewis"].total_votes, 1);
    assert_eq!(result.dataset.metadata.total_votes, 5);
    assert_eq!(result.dataset.metadata.votes_with_individual_data, 2);
    assert_eq!(result.dataset.meetings["14510"].total_votes, 4);
}

#[test]
fn test_repeated_record_id_is_reported() {
    let result = run(vec![
        json!({"id": "14510_f050", "meeting_id": "14510", "agenda_item": "5. Item",
               "individual_votes": {"Chen": "YES"}}),
        json!({"id": "14510_f050", "meeting_id": "14510", "agenda_item": "5. item",
               "individual_votes": {"Kaji": "NO"}}),
    ]);
    let merged = vote(&result.dataset, "14510_f050");
    assert_eq!(merged.consolidated_from, vec!["14510_f050", "14510_f050"]);

    let report = validate(&result.dataset);
    assert!(report.blocks_persist());
    assert!(report.errors.contains(&ValidationError::Provenance {
        vote_id: "14510_f050".to_string(),
        detail: "duplicate source id 14510_f050".to_string(),
    }));
}
