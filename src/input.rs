use crate::error::{Error, MalformedRecord, Result};
use crate::types::{Meeting, RawVoteRecord};
use indexmap::IndexMap;
use jwalk::WalkDir;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Shape of one input file
#[derive(Debug, Deserialize)]
struct InputFile {
    votes: Vec<Value>,
    meetings: IndexMap<String, Meeting>,
    #[serde(default)]
    meeting_summaries: IndexMap<String, Value>,
    #[serde(default)]
    councilmember_summaries: IndexMap<String, Value>,
}

/// A vote entry before it is parsed, with the file it came from
#[derive(Debug, Clone)]
pub struct SourcedVote {
    pub value: Value,
    pub source_file: String,
}

/// Everything read from the input paths, concatenated in path order
#[derive(Debug, Default)]
pub struct LoadedInput {
    pub files: Vec<String>,
    pub votes: Vec<SourcedVote>,
    pub meetings: IndexMap<String, Meeting>,
    pub meeting_summaries: IndexMap<String, Value>,
    pub councilmember_summaries: IndexMap<String, Value>,
}

impl LoadedInput {
    /// Append `other`; its meetings and summaries override ones with the same id
    pub fn merge(&mut self, other: LoadedInput) {
        self.files.extend(other.files);
        self.votes.extend(other.votes);
        for (id, meeting) in other.meetings {
            if self.meetings.insert(id.clone(), meeting).is_some() {
                debug!("Meeting {} redefined by a later input", id);
            }
        }
        self.meeting_summaries.extend(other.meeting_summaries);
        self.councilmember_summaries
            .extend(other.councilmember_summaries);
    }
}

/// A parsed record with its position among all input vote entries
#[derive(Debug, Clone)]
pub struct PositionedRecord {
    pub position: usize,
    pub record: RawVoteRecord,
}

/// Expand an input path into JSON files.
///
/// A file is returned as-is; a directory is walked for `*.json` files in
/// sorted order. Anything under `exclude` (the output file, the backup
/// directory) is skipped so a rerun never reads its own output.
pub fn discover_input_files(path: &Path, exclude: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(Error::Input {
            path: path.display().to_string(),
            reason: "path does not exist".to_string(),
        });
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let excluded: Vec<PathBuf> = exclude
        .iter()
        .filter_map(|p| p.canonicalize().ok())
        .collect();

    let mut files = Vec::new();
    for entry_result in WalkDir::new(path).sort(true) {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", path.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let file = entry.path();
        if file.extension().map(|ext| ext == "json").unwrap_or(false) {
            let canonical = file.canonicalize().unwrap_or_else(|_| file.clone());
            if excluded.iter().any(|ex| canonical.starts_with(ex)) {
                debug!("Skipping excluded file {}", file.display());
                continue;
            }
            files.push(file);
        }
    }

    files.sort();
    Ok(files)
}

/// Path shown in reports: relative to `base` when possible
pub fn display_path(path: &Path, base: &Path) -> String {
    let relative = match (path.canonicalize(), base.canonicalize()) {
        (Ok(path_abs), Ok(base_abs)) => pathdiff::diff_paths(&path_abs, &base_abs),
        _ => None,
    };
    relative
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

/// Read every input path and concatenate votes, meetings and summaries.
///
/// Later files override earlier meetings and summaries with the same id.
pub fn load_inputs(paths: &[PathBuf], exclude: &[PathBuf]) -> Result<LoadedInput> {
    let mut loaded = LoadedInput::default();

    for path in paths {
        let base = if path.is_dir() {
            path.clone()
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        };

        for file in discover_input_files(path, exclude)? {
            let shown = display_path(&file, &base);
            let contents = fs::read_to_string(&file)?;
            let parsed: InputFile = serde_json::from_str(&contents).map_err(|e| Error::Input {
                path: file.display().to_string(),
                reason: e.to_string(),
            })?;

            info!(
                "Loaded {}: {} votes, {} meetings",
                shown,
                parsed.votes.len(),
                parsed.meetings.len()
            );

            loaded.votes.extend(parsed.votes.into_iter().map(|value| SourcedVote {
                value,
                source_file: shown.clone(),
            }));
            for (id, meeting) in parsed.meetings {
                if loaded.meetings.insert(id.clone(), meeting).is_some() {
                    debug!("Meeting {} redefined by {}", id, shown);
                }
            }
            loaded.meeting_summaries.extend(parsed.meeting_summaries);
            loaded
                .councilmember_summaries
                .extend(parsed.councilmember_summaries);
            loaded.files.push(shown);
        }
    }

    if loaded.files.is_empty() {
        return Err(Error::Input {
            path: paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            reason: "no JSON input files found".to_string(),
        });
    }

    Ok(loaded)
}

/// Parse raw vote entries, reporting the ones that are not vote records
pub fn parse_votes(votes: Vec<SourcedVote>) -> (Vec<PositionedRecord>, Vec<MalformedRecord>) {
    let mut records = Vec::with_capacity(votes.len());
    let mut malformed = Vec::new();

    for (position, vote) in votes.into_iter().enumerate() {
        let label = match vote.value.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => format!("#{}", position),
        };

        match serde_json::from_value::<RawVoteRecord>(vote.value) {
            Ok(record) => records.push(PositionedRecord { position, record }),
            Err(e) => malformed.push(
                MalformedRecord::new(label, position, e.to_string())
                    .with_source_file(vote.source_file),
            ),
        }
    }

    (records, malformed)
}
