use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One councilmember's vote on an agenda item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Ballot {
    Yes,
    No,
    Abstain,
    Recuse,
    Absent,
}

impl Ballot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ballot::Yes => "YES",
            Ballot::No => "NO",
            Ballot::Abstain => "ABSTAIN",
            Ballot::Recuse => "RECUSE",
            Ballot::Absent => "ABSENT",
        }
    }

    /// Whether the councilmember took part in the vote
    pub fn is_present(&self) -> bool {
        !matches!(self, Ballot::Absent)
    }
}

impl FromStr for Ballot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "YES" | "Y" | "AYE" | "YEA" => Ok(Ballot::Yes),
            "NO" | "N" | "NAY" => Ok(Ballot::No),
            "ABSTAIN" | "A" | "ABSTENTION" => Ok(Ballot::Abstain),
            "RECUSE" | "RECUSED" | "RECUSAL" => Ok(Ballot::Recuse),
            "ABSENT" => Ok(Ballot::Absent),
            other => Err(format!("unknown ballot value '{}'", other)),
        }
    }
}

impl TryFrom<String> for Ballot {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counts for a vote
///
/// Fields are signed so that a corrupted dataset can still be loaded and
/// reported by the validator instead of failing to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Tally {
    pub ayes: i64,
    pub noes: i64,
    pub abstentions: i64,
    pub recused: i64,
}

impl Tally {
    /// Count ballots; ABSENT ballots are not part of the tally
    pub fn from_ballots<'a>(ballots: impl IntoIterator<Item = &'a Ballot>) -> Self {
        let mut tally = Tally::default();
        for ballot in ballots {
            match ballot {
                Ballot::Yes => tally.ayes += 1,
                Ballot::No => tally.noes += 1,
                Ballot::Abstain => tally.abstentions += 1,
                Ballot::Recuse => tally.recused += 1,
                Ballot::Absent => {}
            }
        }
        tally
    }

    pub fn total(&self) -> i64 {
        self.ayes + self.noes + self.abstentions + self.recused
    }

    /// Names of the fields holding a negative count
    pub fn negative_fields(&self) -> Vec<&'static str> {
        [
            ("ayes", self.ayes),
            ("noes", self.noes),
            ("abstentions", self.abstentions),
            ("recused", self.recused),
        ]
        .into_iter()
        .filter(|(_, count)| *count < 0)
        .map(|(name, _)| name)
        .collect()
    }

    pub fn outcome(&self) -> VoteOutcome {
        match self.ayes.cmp(&self.noes) {
            std::cmp::Ordering::Greater => VoteOutcome::Passed,
            std::cmp::Ordering::Less => VoteOutcome::Failed,
            std::cmp::Ordering::Equal => VoteOutcome::Tied,
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.ayes, self.noes, self.abstentions, self.recused
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Passed,
    Failed,
    Tied,
}

/// One OCR/extraction observation of a vote, as read from input files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVoteRecord {
    #[serde(default, deserialize_with = "de_opt_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id", skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_agenda_item",
        skip_serializing_if = "Option::is_none"
    )]
    pub agenda_item: Option<String>,
    #[serde(default, deserialize_with = "de_null_default")]
    pub frame_number: u32,
    #[serde(default, alias = "vote_tally", skip_serializing_if = "Option::is_none")]
    pub tally: Option<Tally>,
    #[serde(default, deserialize_with = "de_ballots")]
    pub individual_votes: IndexMap<String, Ballot>,
    #[serde(default, deserialize_with = "de_opt_id", skip_serializing_if = "Option::is_none")]
    pub meta_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_estimated: Option<bool>,
    /// Fields the pipeline does not interpret (motion text, confidence, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawVoteRecord {
    pub fn new(
        id: impl Into<String>,
        meeting_id: impl Into<String>,
        agenda_item: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            meeting_id: Some(meeting_id.into()),
            agenda_item: Some(agenda_item.into()),
            frame_number: 0,
            tally: None,
            individual_votes: IndexMap::new(),
            meta_id: None,
            video_timestamp: None,
            timestamp_estimated: None,
            extra: Map::new(),
        }
    }

    pub fn with_frame(mut self, frame_number: u32) -> Self {
        self.frame_number = frame_number;
        self
    }

    pub fn with_tally(mut self, tally: Tally) -> Self {
        self.tally = Some(tally);
        self
    }

    pub fn with_ballot(mut self, councilmember: impl Into<String>, ballot: Ballot) -> Self {
        self.individual_votes.insert(councilmember.into(), ballot);
        self
    }

    pub fn with_video(
        mut self,
        meta_id: impl Into<String>,
        video_timestamp: Option<u64>,
        estimated: bool,
    ) -> Self {
        self.meta_id = Some(meta_id.into());
        self.video_timestamp = video_timestamp;
        self.timestamp_estimated = Some(estimated);
        self
    }

    /// A timestamp taken from the video index rather than estimated
    pub fn has_actual_timestamp(&self) -> bool {
        self.video_timestamp.is_some() && self.timestamp_estimated == Some(false)
    }
}

/// A merge conflict found while consolidating duplicate extractions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictWarning {
    /// Two extractions disagree on one councilmember's ballot
    Ballot {
        councilmember: String,
        kept_value: Ballot,
        discarded_value: Ballot,
        source_ids: Vec<String>,
    },
    /// Extractions without ballots report different tallies
    Tally {
        kept: Tally,
        discarded: Tally,
        source_ids: Vec<String>,
    },
}

impl fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictWarning::Ballot {
                councilmember,
                kept_value,
                discarded_value,
                source_ids,
            } => write!(
                f,
                "ballot for {} kept {} over {} (sources: {})",
                councilmember,
                kept_value,
                discarded_value,
                source_ids.join(", ")
            ),
            ConflictWarning::Tally {
                kept,
                discarded,
                source_ids,
            } => write!(
                f,
                "tally kept {} over {} (sources: {})",
                kept,
                discarded,
                source_ids.join(", ")
            ),
        }
    }
}

/// The canonical, de-duplicated vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedVote {
    pub id: String,
    pub meeting_id: String,
    pub agenda_item: String,
    #[serde(default)]
    pub frame_number: u32,
    #[serde(default)]
    pub tally: Tally,
    #[serde(default)]
    pub individual_votes: IndexMap<String, Ballot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_timestamp: Option<u64>,
    #[serde(default = "default_true")]
    pub timestamp_estimated: bool,
    /// Source record ids in merge order
    #[serde(default)]
    pub consolidated_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictWarning>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConsolidatedVote {
    /// Number of councilmembers with a non-ABSENT ballot
    pub fn present_ballots(&self) -> i64 {
        self.individual_votes
            .values()
            .filter(|ballot| ballot.is_present())
            .count() as i64
    }
}

/// Passed/failed counts for a meeting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResults {
    pub passed: usize,
    pub failed: usize,
    pub tied: usize,
}

/// Meeting metadata supplied with the input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    #[serde(default, deserialize_with = "de_opt_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agenda_url: Option<String>,
    #[serde(default)]
    pub total_votes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_results: Option<VoteResults>,
    /// Attachments such as summary, key_items or notes, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-councilmember voting statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CouncilmemberStat {
    /// Ballots other than ABSENT
    pub total_votes: usize,
    pub yes_votes: usize,
    pub no_votes: usize,
    pub abstain_votes: usize,
    #[serde(default)]
    pub recused_votes: usize,
    #[serde(default)]
    pub absent_votes: usize,
    /// total_votes divided by the number of consolidated votes
    pub attendance_rate: f64,
}

/// Top-level counts read by the viewer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub total_votes: usize,
    pub total_meetings: usize,
    pub total_councilmembers: usize,
    #[serde(default)]
    pub votes_with_individual_data: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// The consolidated dataset written for the viewer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub metadata: DatasetMetadata,
    #[serde(default)]
    pub votes: Vec<ConsolidatedVote>,
    #[serde(default)]
    pub meetings: IndexMap<String, Meeting>,
    #[serde(default)]
    pub councilmembers: Vec<String>,
    #[serde(default)]
    pub councilmember_stats: BTreeMap<String, CouncilmemberStat>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub meeting_summaries: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub councilmember_summaries: IndexMap<String, Value>,
}

fn default_true() -> bool {
    true
}

/// Ids show up as strings or bare numbers depending on the extraction pass
fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {}",
            other
        ))),
    }
}

/// Agenda items are either plain text or `{number, description}` objects
fn de_agenda_item<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Object(map)) => {
            let field = |name: &str| match map.get(name) {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            };
            let number = field("number");
            let description = field("description");
            let text = match (number.is_empty(), description.is_empty()) {
                (true, _) => description,
                (false, true) => number,
                (false, false) => format!("{}. {}", number, description),
            };
            Ok(Some(text))
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected agenda item text, got {}",
            other
        ))),
    }
}

fn de_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
struct NamedBallot {
    #[serde(alias = "council_member", alias = "councilmember")]
    name: String,
    #[serde(alias = "result")]
    vote: Ballot,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BallotsRepr {
    Map(IndexMap<String, Ballot>),
    List(Vec<NamedBallot>),
}

/// Ballots come as a `{name: vote}` map or a list of `{name, vote}` objects
fn de_ballots<'de, D>(deserializer: D) -> Result<IndexMap<String, Ballot>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<BallotsRepr>::deserialize(deserializer)? {
        None => IndexMap::new(),
        Some(BallotsRepr::Map(map)) => map,
        Some(BallotsRepr::List(list)) => list
            .into_iter()
            .map(|entry| (entry.name, entry.vote))
            .collect(),
    })
}
