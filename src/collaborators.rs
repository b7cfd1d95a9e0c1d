//! External data sources the importer consults around the core pipeline.
//!
//! Video metadata (meta ids and timestamps from the meeting video index) is
//! applied before consolidation; narrative summaries are attached after.
//! Both are traits so the pipeline runs the same with stubs that return
//! nothing.

use crate::error::{Error, Result};
use crate::normalize::{agenda_number, canonical_name, normalize_agenda_item};
use crate::types::{ConsolidatedVote, CouncilmemberStat, Meeting};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Seconds of video covered by one extracted frame
const SECONDS_PER_FRAME: u64 = 30;

/// Video position of an agenda item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub meta_id: String,
    #[serde(default)]
    pub video_timestamp: Option<u64>,
    #[serde(default = "default_estimated")]
    pub timestamp_estimated: bool,
}

fn default_estimated() -> bool {
    true
}

pub trait VideoMetadataSource {
    /// Look up an agenda item by meeting id and normalized agenda text
    fn lookup(&self, meeting_id: &str, agenda_key: &str) -> Option<VideoMetadata>;
}

/// Source used when no video index is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVideoMetadata;

impl VideoMetadataSource for NoVideoMetadata {
    fn lookup(&self, _meeting_id: &str, _agenda_key: &str) -> Option<VideoMetadata> {
        None
    }
}

/// Video index loaded from `{meeting_id: {agenda item: VideoMetadata}}`
#[derive(Debug, Clone, Default)]
pub struct VideoMetadataFile {
    meetings: HashMap<String, IndexMap<String, VideoMetadata>>,
}

impl VideoMetadataFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents).map_err(|e| Error::Input {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let raw: HashMap<String, IndexMap<String, VideoMetadata>> = serde_json::from_str(contents)?;
        let meetings = raw
            .into_iter()
            .map(|(meeting_id, items)| {
                let items = items
                    .into_iter()
                    .map(|(agenda, meta)| (normalize_agenda_item(&agenda), meta))
                    .collect();
                (meeting_id.trim().to_string(), items)
            })
            .collect();
        Ok(Self { meetings })
    }

    pub fn len(&self) -> usize {
        self.meetings.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VideoMetadataSource for VideoMetadataFile {
    /// Exact agenda match first, then a match on the item number when
    /// exactly one entry of the meeting carries that number.
    fn lookup(&self, meeting_id: &str, agenda_key: &str) -> Option<VideoMetadata> {
        let items = self.meetings.get(meeting_id)?;
        if let Some(meta) = items.get(agenda_key) {
            return Some(meta.clone());
        }

        let number = agenda_number(agenda_key)?;
        let mut candidates = items
            .iter()
            .filter(|(key, _)| agenda_number(key) == Some(number));
        match (candidates.next(), candidates.next()) {
            (Some((_, meta)), None) => Some(meta.clone()),
            _ => None,
        }
    }
}

pub trait SummarySource {
    fn meeting_summary(
        &self,
        meeting_id: &str,
        meeting: &Meeting,
        votes: &[ConsolidatedVote],
    ) -> Option<Value>;

    fn councilmember_summary(&self, name: &str, stat: &CouncilmemberStat) -> Option<Value>;
}

/// Source used when no summaries were generated
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSummaries;

impl SummarySource for NoSummaries {
    fn meeting_summary(&self, _: &str, _: &Meeting, _: &[ConsolidatedVote]) -> Option<Value> {
        None
    }

    fn councilmember_summary(&self, _: &str, _: &CouncilmemberStat) -> Option<Value> {
        None
    }
}

/// Pre-generated summaries loaded from `{meetings: {...}, councilmembers: {...}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryFile {
    #[serde(default)]
    meetings: IndexMap<String, Value>,
    #[serde(default)]
    councilmembers: IndexMap<String, Value>,
}

impl SummaryFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents).map_err(|e| Error::Input {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let raw: SummaryFile = serde_json::from_str(contents)?;
        let councilmembers = raw
            .councilmembers
            .into_iter()
            .map(|(name, summary)| (canonical_name(&name), summary))
            .collect();
        Ok(Self {
            meetings: raw.meetings,
            councilmembers,
        })
    }
}

impl SummarySource for SummaryFile {
    fn meeting_summary(
        &self,
        meeting_id: &str,
        _: &Meeting,
        _: &[ConsolidatedVote],
    ) -> Option<Value> {
        self.meetings.get(meeting_id).cloned()
    }

    fn councilmember_summary(&self, name: &str, _: &CouncilmemberStat) -> Option<Value> {
        self.councilmembers.get(&canonical_name(name)).cloned()
    }
}

/// Rough video position for an agenda item when the video index has none.
///
/// Assumes a fixed duration per frame and shifts by where such items usually
/// fall in a council meeting.
pub fn estimate_video_timestamp(agenda_item: &str, frame_number: u32) -> u64 {
    let base = u64::from(frame_number) * SECONDS_PER_FRAME;
    let agenda = agenda_item.to_lowercase();

    let offset = if agenda.contains("consent") {
        300
    } else if agenda.contains("public hearing") {
        1800
    } else if agenda.contains("adjournment") {
        3600
    } else if agenda.contains("resolution") {
        1200
    } else if agenda.contains("ordinance") {
        1500
    } else {
        900
    };

    base + offset
}
