//! The import run: load, enrich, consolidate, reconcile, validate, persist.
//!
//! The core stages are pure; file access happens only when inputs are read
//! and when the dataset, backup and report are written.

use crate::collaborators::{
    estimate_video_timestamp, NoSummaries, NoVideoMetadata, SummaryFile, SummarySource,
    VideoMetadataFile, VideoMetadataSource,
};
use crate::config::ImportConfig;
use crate::consolidate::consolidate;
use crate::error::{MalformedRecord, Result};
use crate::group::{duplicate_count, group};
use crate::input::{load_inputs, parse_votes, LoadedInput, PositionedRecord};
use crate::normalize::{normalize, normalize_agenda_item};
use crate::persist::{create_backup, write_dataset, write_json};
use crate::reconcile::reconcile;
use crate::types::{ConsolidatedVote, Dataset, Meeting};
use crate::validate::{validate, ValidationReport};
use chrono::Local;
use indexmap::IndexMap;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub input_files: usize,
    /// Votes read back from the current output before merging
    pub existing_votes: usize,
    pub raw_records: usize,
    pub malformed_records: usize,
    /// Canonical keys seen more than once
    pub duplicate_groups: usize,
    /// Records folded into another record of their group
    pub duplicates_merged: usize,
    pub consolidated_votes: usize,
    pub meetings: usize,
    pub councilmembers: usize,
    pub conflicts: usize,
    pub tallies_corrected: usize,
    pub video_metadata_applied: usize,
    pub timestamps_estimated: usize,
}

/// What happened to the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    Written,
    /// Written although validation reported errors
    Forced,
    DryRun,
    /// Validation errors prevented the write
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub inputs: Vec<String>,
    pub output: String,
    pub stats: ImportStats,
    pub malformed: Vec<MalformedRecord>,
    pub validation: ValidationReport,
    pub outcome: PersistOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_sha256: Option<String>,
}

impl ImportReport {
    /// Process exit code for this run
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            PersistOutcome::Blocked => 2,
            _ => 0,
        }
    }
}

/// The dataset a run produced together with its report
#[derive(Debug, Clone)]
pub struct ImportRun {
    pub dataset: Dataset,
    pub report: ImportReport,
}

/// Consolidated votes before reconciliation
#[derive(Debug, Clone)]
pub struct Consolidated {
    pub votes: Vec<ConsolidatedVote>,
    pub malformed: Vec<MalformedRecord>,
    pub stats: ImportStats,
}

/// A reconciled dataset built purely from in-memory records
#[derive(Debug, Clone)]
pub struct Consolidation {
    pub dataset: Dataset,
    pub malformed: Vec<MalformedRecord>,
    pub stats: ImportStats,
}

/// Normalize, group and consolidate raw records.
///
/// Records that fail normalization are collected as [`MalformedRecord`]s and
/// left out; they never abort the run.
pub fn consolidate_records(
    records: impl IntoIterator<Item = PositionedRecord>,
) -> Result<Consolidated> {
    let mut stats = ImportStats::default();
    let mut malformed = Vec::new();
    let mut normalized = Vec::new();

    for PositionedRecord { position, record } in records {
        stats.raw_records += 1;
        match normalize(record, position) {
            Ok(record) => normalized.push(record),
            Err(bad) => {
                warn!("Excluding {}", bad);
                malformed.push(bad);
            }
        }
    }
    stats.malformed_records = malformed.len();

    let groups = group(normalized);
    stats.duplicates_merged = duplicate_count(&groups);
    stats.duplicate_groups = groups.values().filter(|members| members.len() > 1).count();

    let mut votes = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        if members.len() > 1 {
            debug!("Merging {} records for {}", members.len(), key);
        }
        let vote = consolidate(members)?;
        for conflict in &vote.conflicts {
            warn!("Vote {}: {}", vote.id, conflict);
        }
        stats.conflicts += vote.conflicts.len();
        votes.push(vote);
    }
    stats.consolidated_votes = votes.len();

    Ok(Consolidated {
        votes,
        malformed,
        stats,
    })
}

/// The whole pure core: consolidate records, then reconcile against `meetings`
pub fn consolidate_dataset(
    records: impl IntoIterator<Item = PositionedRecord>,
    meetings: IndexMap<String, Meeting>,
) -> Result<Consolidation> {
    let Consolidated {
        votes,
        malformed,
        mut stats,
    } = consolidate_records(records)?;

    let reconciled = reconcile(votes, meetings);
    stats.tallies_corrected = reconciled.tallies_corrected;
    let dataset = reconciled.into_dataset();
    stats.meetings = dataset.meetings.len();
    stats.councilmembers = dataset.councilmembers.len();

    Ok(Consolidation {
        dataset,
        malformed,
        stats,
    })
}

/// Fill in video metadata for records that have none yet.
///
/// A record that already carries a `meta_id` is returned untouched.
pub fn apply_video_metadata(
    records: Vec<PositionedRecord>,
    source: &dyn VideoMetadataSource,
) -> (Vec<PositionedRecord>, usize) {
    let mut applied = 0;
    let records = records
        .into_iter()
        .map(|positioned| {
            let record = &positioned.record;
            if record.meta_id.is_some() {
                return positioned;
            }
            let (Some(meeting_id), Some(agenda_item)) = (&record.meeting_id, &record.agenda_item)
            else {
                return positioned;
            };
            let agenda_key = normalize_agenda_item(agenda_item);
            let Some(meta) = source.lookup(meeting_id.trim(), &agenda_key) else {
                return positioned;
            };

            applied += 1;
            let mut record = positioned.record;
            record.meta_id = Some(meta.meta_id);
            if record.video_timestamp.is_none() {
                record.video_timestamp = meta.video_timestamp;
                record.timestamp_estimated = Some(meta.timestamp_estimated);
            }
            PositionedRecord {
                position: positioned.position,
                record,
            }
        })
        .collect();
    (records, applied)
}

/// Give votes without a video position an estimated one
pub fn estimate_missing_timestamps(votes: Vec<ConsolidatedVote>) -> (Vec<ConsolidatedVote>, usize) {
    let mut estimated = 0;
    let votes = votes
        .into_iter()
        .map(|vote| {
            if vote.video_timestamp.is_some() {
                return vote;
            }
            estimated += 1;
            let timestamp = estimate_video_timestamp(&vote.agenda_item, vote.frame_number);
            ConsolidatedVote {
                video_timestamp: Some(timestamp),
                timestamp_estimated: true,
                ..vote
            }
        })
        .collect();
    (votes, estimated)
}

/// Attach summaries from `source`, keeping existing ones it has nothing for
pub fn attach_summaries(mut dataset: Dataset, source: &dyn SummarySource) -> Dataset {
    for (meeting_id, meeting) in &dataset.meetings {
        let votes: Vec<ConsolidatedVote> = dataset
            .votes
            .iter()
            .filter(|vote| &vote.meeting_id == meeting_id)
            .cloned()
            .collect();
        if let Some(summary) = source.meeting_summary(meeting_id, meeting, &votes) {
            dataset.meeting_summaries.insert(meeting_id.clone(), summary);
        }
    }
    for (name, stat) in &dataset.councilmember_stats {
        if let Some(summary) = source.councilmember_summary(name, stat) {
            dataset.councilmember_summaries.insert(name.clone(), summary);
        }
    }
    dataset
}

/// Orchestrates one import against one output file
pub struct Importer {
    config: ImportConfig,
    video_metadata: Box<dyn VideoMetadataSource>,
    summaries: Box<dyn SummarySource>,
}

impl Importer {
    /// An importer with no external collaborators
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            video_metadata: Box::new(NoVideoMetadata),
            summaries: Box::new(NoSummaries),
        }
    }

    /// An importer using the collaborator files named in the configuration
    pub fn from_config(config: ImportConfig) -> Result<Self> {
        let video_path = config.video_metadata.clone();
        let summary_path = config.summaries.clone();
        let mut importer = Self::new(config);

        if let Some(path) = video_path {
            let index = VideoMetadataFile::load(&path)?;
            info!("Loaded video metadata for {} agenda items", index.len());
            importer = importer.with_video_metadata(index);
        }
        if let Some(path) = summary_path {
            importer = importer.with_summaries(SummaryFile::load(&path)?);
        }
        Ok(importer)
    }

    pub fn with_video_metadata(mut self, source: impl VideoMetadataSource + 'static) -> Self {
        self.video_metadata = Box::new(source);
        self
    }

    pub fn with_summaries(mut self, source: impl SummarySource + 'static) -> Self {
        self.summaries = Box::new(source);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Run the import.
    ///
    /// Validation errors do not make this fail: they block the write (unless
    /// forced) and show up in the returned report. `Err` means the run could
    /// not complete at all.
    pub fn run(&self) -> Result<ImportRun> {
        let config = &self.config;
        let backup_dir = config.backup_dir();
        let exclude = vec![config.output.clone(), backup_dir.clone()];

        let mut loaded = LoadedInput::default();
        let mut existing_votes = 0;
        let merging = config.merge_existing && config.output.is_file();
        if merging {
            let existing = load_inputs(std::slice::from_ref(&config.output), &[])?;
            existing_votes = existing.votes.len();
            info!(
                "Merging into {} existing votes from {}",
                existing_votes,
                config.output.display()
            );
            loaded.merge(existing);
        }

        // The output is already loaded when merging; naming it again as an input
        // would feed every vote in twice.
        let output_abs = config.output.canonicalize().ok();
        let inputs: Vec<PathBuf> = config
            .inputs
            .iter()
            .filter(|path| !(merging && path.canonicalize().ok() == output_abs))
            .cloned()
            .collect();
        if !inputs.is_empty() {
            loaded.merge(load_inputs(&inputs, &exclude)?);
        }
        let sources: Vec<String> = loaded.votes.iter().map(|v| v.source_file.clone()).collect();
        let (records, mut malformed) = parse_votes(loaded.votes);

        let (records, video_metadata_applied) =
            apply_video_metadata(records, self.video_metadata.as_ref());
        if video_metadata_applied > 0 {
            info!("Applied video metadata to {} records", video_metadata_applied);
        }

        let Consolidated {
            votes,
            malformed: excluded,
            mut stats,
        } = consolidate_records(records)?;

        let (votes, timestamps_estimated) = if config.estimate_timestamps {
            estimate_missing_timestamps(votes)
        } else {
            (votes, 0)
        };

        let reconciled = reconcile(votes, loaded.meetings);
        if reconciled.tallies_corrected > 0 {
            info!("Corrected {} tallies from ballots", reconciled.tallies_corrected);
        }
        stats.tallies_corrected = reconciled.tallies_corrected;

        let mut dataset = reconciled.into_dataset();
        dataset.meeting_summaries = loaded.meeting_summaries;
        dataset.councilmember_summaries = loaded.councilmember_summaries;
        let mut dataset = attach_summaries(dataset, self.summaries.as_ref());

        malformed.extend(excluded.into_iter().map(|bad| match sources.get(bad.position) {
            Some(file) if bad.source_file.is_none() => bad.with_source_file(file.clone()),
            _ => bad,
        }));
        malformed.sort_by_key(|bad| bad.position);

        stats.input_files = loaded.files.len();
        stats.existing_votes = existing_votes;
        stats.raw_records = sources.len();
        stats.malformed_records = malformed.len();
        stats.video_metadata_applied = video_metadata_applied;
        stats.timestamps_estimated = timestamps_estimated;
        stats.meetings = dataset.meetings.len();
        stats.councilmembers = dataset.councilmembers.len();

        info!(
            "Consolidated {} records into {} votes ({} duplicates merged, {} malformed)",
            stats.raw_records,
            stats.consolidated_votes,
            stats.duplicates_merged,
            stats.malformed_records
        );

        let validation = validate(&dataset);
        for finding in &validation.errors {
            error!("{}", finding);
        }
        for finding in &validation.warnings {
            debug!("{}", finding);
        }

        let mut backup = None;
        let mut output_sha256 = None;
        let outcome = if config.dry_run {
            info!("Dry run: {} left untouched", config.output.display());
            PersistOutcome::DryRun
        } else if validation.blocks_persist() && !config.force {
            error!(
                "{} validation errors; not writing {}",
                validation.errors.len(),
                config.output.display()
            );
            PersistOutcome::Blocked
        } else {
            if config.create_backup {
                backup = create_backup(&config.output, &backup_dir)?;
                if let Some(path) = &backup {
                    info!("Backup written to {}", path.display());
                }
            }
            let now = Local::now().format("%Y-%m-%dT%H:%M:%S");
            dataset.metadata.last_updated = Some(now.to_string());
            output_sha256 = Some(write_dataset(&config.output, &dataset)?);
            info!("Wrote {} votes to {}", dataset.votes.len(), config.output.display());

            if validation.blocks_persist() {
                warn!("Written despite {} validation errors", validation.errors.len());
                PersistOutcome::Forced
            } else {
                PersistOutcome::Written
            }
        };

        let report = ImportReport {
            inputs: loaded.files,
            output: config.output.display().to_string(),
            stats,
            malformed,
            validation,
            outcome,
            backup: backup.map(|path: PathBuf| path.display().to_string()),
            output_sha256,
        };

        if let Some(path) = &config.report {
            write_json(path, &report)?;
            debug!("Import report written to {}", path.display());
        }

        Ok(ImportRun { dataset, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::VideoMetadata;
    use crate::types::{Ballot, RawVoteRecord};

    fn positioned(records: Vec<RawVoteRecord>) -> Vec<PositionedRecord> {
        records
            .into_iter()
            .enumerate()
            .map(|(position, record)| PositionedRecord { position, record })
            .collect()
    }

    fn meetings(ids: &[&str]) -> IndexMap<String, Meeting> {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    Meeting {
                        title: Some("City Council".to_string()),
                        date: Some("2024-03-12".to_string()),
                        ..Meeting::default()
                    },
                )
            })
            .collect()
    }

    struct FixedIndex;

    impl VideoMetadataSource for FixedIndex {
        fn lookup(&self, meeting_id: &str, agenda_key: &str) -> Option<VideoMetadata> {
            (meeting_id == "14510" && agenda_key == "9a. budget").then(|| VideoMetadata {
                meta_id: "8812".to_string(),
                video_timestamp: Some(1260),
                timestamp_estimated: false,
            })
        }
    }

    #[test]
    fn test_consolidate_dataset_counts() {
        let records = positioned(vec![
            RawVoteRecord::new("a", "14510", "9A. Budget").with_ballot("Chen", Ballot::Yes),
            RawVoteRecord::new("b", "14510", "9a. budget.").with_ballot("KAJI", Ballot::No),
            RawVoteRecord::new("c", "14510", "10. Adjournment"),
            RawVoteRecord {
                agenda_item: None,
                ..RawVoteRecord::new("d", "14510", "")
            },
        ]);

        let result = consolidate_dataset(records, meetings(&["14510"])).unwrap();

        assert_eq!(result.dataset.votes.len(), 2);
        assert_eq!(result.malformed.len(), 1);
        assert_eq!(result.malformed[0].record, "d");
        assert_eq!(result.stats.raw_records, 4);
        assert_eq!(result.stats.duplicate_groups, 1);
        assert_eq!(result.stats.duplicates_merged, 1);
        assert_eq!(result.stats.councilmembers, 2);
        assert!(validate(&result.dataset).errors.is_empty());
    }

    #[test]
    fn test_video_metadata_fills_only_missing_meta_id() {
        let records = positioned(vec![
            RawVoteRecord::new("a", "14510", "9A. Budget"),
            RawVoteRecord::new("b", "14510", "9A. Budget").with_video("7000", None, true),
            RawVoteRecord::new("c", "14510", "3. Minutes"),
        ]);

        let (records, applied) = apply_video_metadata(records, &FixedIndex);

        assert_eq!(applied, 1);
        assert_eq!(records[0].record.meta_id.as_deref(), Some("8812"));
        assert_eq!(records[0].record.video_timestamp, Some(1260));
        assert!(records[0].record.has_actual_timestamp());
        assert_eq!(records[1].record.meta_id.as_deref(), Some("7000"));
        assert!(records[2].record.meta_id.is_none());
    }

    #[test]
    fn test_estimates_only_missing_timestamps() {
        let votes = consolidate_records(positioned(vec![
            RawVoteRecord::new("a", "14510", "9. Consent Calendar").with_frame(2),
            RawVoteRecord::new("b", "14510", "10. Adjournment").with_video("1", Some(42), false),
        ]))
        .unwrap()
        .votes;

        let (votes, estimated) = estimate_missing_timestamps(votes);

        assert_eq!(estimated, 1);
        assert_eq!(votes[0].video_timestamp, Some(360));
        assert!(votes[0].timestamp_estimated);
        assert_eq!(votes[1].video_timestamp, Some(42));
        assert!(!votes[1].timestamp_estimated);
    }

    #[test]
    fn test_exit_codes() {
        let report = |outcome| ImportReport {
            inputs: Vec::new(),
            output: "out.json".to_string(),
            stats: ImportStats::default(),
            malformed: Vec::new(),
            validation: ValidationReport::default(),
            outcome,
            backup: None,
            output_sha256: None,
        };

        assert_eq!(report(PersistOutcome::Written).exit_code(), 0);
        assert_eq!(report(PersistOutcome::Forced).exit_code(), 0);
        assert_eq!(report(PersistOutcome::DryRun).exit_code(), 0);
        assert_eq!(report(PersistOutcome::Blocked).exit_code(), 2);
    }
}
