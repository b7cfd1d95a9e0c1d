//! Structural and referential checks run before a dataset is persisted.
//!
//! Every check runs independently and all findings are accumulated; nothing
//! short-circuits on the first failure.

use crate::types::{ConflictWarning, Dataset};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Findings that block persistence
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("vote {vote_id} references unknown meeting {meeting_id}")]
    OrphanVote { vote_id: String, meeting_id: String },

    #[error("vote {vote_id} has invalid provenance: {detail}")]
    Provenance { vote_id: String, detail: String },

    #[error("vote {vote_id} has an invalid tally: {detail}")]
    InvalidTally { vote_id: String, detail: String },

    #[error("metadata {field} is {declared} but the dataset has {actual}")]
    MetadataMismatch {
        field: String,
        declared: usize,
        actual: usize,
    },
}

/// Findings reported but never blocking
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    #[error("vote {vote_id}: {conflict}")]
    ConsolidationConflict {
        vote_id: String,
        conflict: ConflictWarning,
    },

    #[error("meeting {meeting_id} is missing {field}")]
    MeetingFieldMissing { meeting_id: String, field: String },

    #[error("meeting stored under {key} declares id {id}")]
    MeetingKeyMismatch { key: String, id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Errors block the write; warnings never do
    pub fn blocks_persist(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub fn validate(dataset: &Dataset) -> ValidationReport {
    let mut report = ValidationReport::default();
    check_references(dataset, &mut report);
    check_provenance(dataset, &mut report);
    check_tallies(dataset, &mut report);
    surface_conflicts(dataset, &mut report);
    check_metadata(dataset, &mut report);
    check_meetings(dataset, &mut report);
    report
}

fn check_references(dataset: &Dataset, report: &mut ValidationReport) {
    for vote in &dataset.votes {
        if !dataset.meetings.contains_key(&vote.meeting_id) {
            report.errors.push(ValidationError::OrphanVote {
                vote_id: vote.id.clone(),
                meeting_id: vote.meeting_id.clone(),
            });
        }
    }
}

fn check_provenance(dataset: &Dataset, report: &mut ValidationReport) {
    // A source record is consumed exactly once across the whole dataset
    let mut owner: HashMap<&str, &str> = HashMap::new();

    for vote in &dataset.votes {
        if vote.consolidated_from.is_empty() {
            report.errors.push(ValidationError::Provenance {
                vote_id: vote.id.clone(),
                detail: "consolidated_from is empty".to_string(),
            });
            continue;
        }

        let mut seen = HashSet::new();
        for source in &vote.consolidated_from {
            if !seen.insert(source.as_str()) {
                report.errors.push(ValidationError::Provenance {
                    vote_id: vote.id.clone(),
                    detail: format!("duplicate source id {}", source),
                });
                continue;
            }
            if let Some(other) = owner.insert(source.as_str(), vote.id.as_str()) {
                report.errors.push(ValidationError::Provenance {
                    vote_id: vote.id.clone(),
                    detail: format!(
                        "source id {} was also consolidated into vote {}",
                        source, other
                    ),
                });
            }
        }
    }
}

fn check_tallies(dataset: &Dataset, report: &mut ValidationReport) {
    for vote in &dataset.votes {
        let negative = vote.tally.negative_fields();
        if !negative.is_empty() {
            report.errors.push(ValidationError::InvalidTally {
                vote_id: vote.id.clone(),
                detail: format!("negative {}", negative.join(", ")),
            });
        }

        if !vote.individual_votes.is_empty() && vote.tally.total() != vote.present_ballots() {
            report.errors.push(ValidationError::InvalidTally {
                vote_id: vote.id.clone(),
                detail: format!(
                    "tally {} counts {} ballots but {} councilmembers voted",
                    vote.tally,
                    vote.tally.total(),
                    vote.present_ballots()
                ),
            });
        }
    }
}

fn surface_conflicts(dataset: &Dataset, report: &mut ValidationReport) {
    for vote in &dataset.votes {
        for conflict in &vote.conflicts {
            report.warnings.push(ValidationWarning::ConsolidationConflict {
                vote_id: vote.id.clone(),
                conflict: conflict.clone(),
            });
        }
    }
}

fn check_metadata(dataset: &Dataset, report: &mut ValidationReport) {
    let metadata = &dataset.metadata;
    let checks = [
        ("total_votes", metadata.total_votes, dataset.votes.len()),
        ("total_meetings", metadata.total_meetings, dataset.meetings.len()),
        (
            "total_councilmembers",
            metadata.total_councilmembers,
            dataset.councilmember_stats.len(),
        ),
        (
            "votes_with_individual_data",
            metadata.votes_with_individual_data,
            dataset
                .votes
                .iter()
                .filter(|vote| !vote.individual_votes.is_empty())
                .count(),
        ),
    ];

    for (field, declared, actual) in checks {
        if declared != actual {
            report.errors.push(ValidationError::MetadataMismatch {
                field: field.to_string(),
                declared,
                actual,
            });
        }
    }
}

fn check_meetings(dataset: &Dataset, report: &mut ValidationReport) {
    for (key, meeting) in &dataset.meetings {
        if let Some(id) = &meeting.id {
            if id != key {
                report.warnings.push(ValidationWarning::MeetingKeyMismatch {
                    key: key.clone(),
                    id: id.clone(),
                });
            }
        }
        for (field, value) in [("title", &meeting.title), ("date", &meeting.date)] {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                report.warnings.push(ValidationWarning::MeetingFieldMissing {
                    meeting_id: key.clone(),
                    field: field.to_string(),
                });
            }
        }
    }
}
