//! Canonical keys for matching duplicate extractions.
//!
//! Agenda text and councilmember names are reduced to a comparable form.
//! Matching is strict equality on these keys; no fuzzy distance is applied.

use crate::error::MalformedRecord;
use crate::types::{Ballot, RawVoteRecord};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

/// Trailing OCR noise: runs of periods, dashes, commas, colons, ellipses
fn trailing_noise_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s.\-,;:…]+$").expect("valid trailing noise pattern"))
}

/// Leading item number such as `5.`, `10a.` or `12)`
fn agenda_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]+[a-z]?)(?:[.)]|\s|$)").expect("valid agenda number pattern")
    })
}

/// `(meeting_id, normalized agenda item)`; equal keys mean the same real vote
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CanonicalKey {
    pub meeting_id: String,
    pub agenda_item: String,
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.meeting_id, self.agenda_item)
    }
}

/// A raw record together with its canonical key and canonical ballots
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub raw: RawVoteRecord,
    /// The record id, derived when the extraction did not supply one
    pub id: String,
    pub meeting_id: String,
    /// Agenda text as extracted, trimmed
    pub agenda_item: String,
    pub key: CanonicalKey,
    /// Ballots keyed by canonical councilmember name, in record order.
    /// Kept as a list so that two spellings of one name inside a single
    /// record still surface as a conflict downstream.
    pub ballots: Vec<(String, Ballot)>,
    pub position: usize,
}

/// Lowercase, trim, collapse whitespace and drop trailing punctuation noise.
///
/// The leading numbering token is left intact, so `10A. Contract` and
/// `10B. Contract` stay distinct.
pub fn normalize_agenda_item(text: &str) -> String {
    let lower = text.to_lowercase();
    let collapsed = whitespace_regex().replace_all(lower.trim(), " ");
    trailing_noise_regex().replace(&collapsed, "").into_owned()
}

/// Canonical spelling of a councilmember name used for matching and stats
pub fn canonical_name(name: &str) -> String {
    whitespace_regex()
        .replace_all(name.trim(), " ")
        .to_lowercase()
}

/// The numbering prefix of a normalized agenda item, e.g. `10a`
pub fn agenda_number(normalized: &str) -> Option<&str> {
    agenda_number_regex()
        .captures(normalized)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Stable id for records extracted without one
pub fn derive_record_id(
    meeting_id: &str,
    agenda_item: &str,
    frame_number: u32,
    position: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(meeting_id.as_bytes());
    hasher.update(b"|");
    hasher.update(agenda_item.as_bytes());
    hasher.update(b"|");
    hasher.update(frame_number.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(position.to_string().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}", meeting_id, hex)
}

/// Canonicalize a raw record's identifying fields.
///
/// `position` is the record's index in the input and only feeds derived ids
/// and error reports.
pub fn normalize(raw: RawVoteRecord, position: usize) -> Result<NormalizedRecord, MalformedRecord> {
    let label = raw
        .id
        .clone()
        .unwrap_or_else(|| format!("#{}", position));

    let meeting_id = match raw.meeting_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(MalformedRecord::new(label, position, "missing meeting_id")),
    };

    let agenda_item = match raw.agenda_item.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => return Err(MalformedRecord::new(label, position, "missing agenda_item")),
    };

    let normalized_agenda = normalize_agenda_item(&agenda_item);
    if normalized_agenda.is_empty() {
        return Err(MalformedRecord::new(
            label,
            position,
            format!("agenda_item '{}' has no text after normalization", agenda_item),
        ));
    }

    let mut ballots = Vec::with_capacity(raw.individual_votes.len());
    for (name, ballot) in &raw.individual_votes {
        let name = canonical_name(name);
        if name.is_empty() {
            return Err(MalformedRecord::new(
                label,
                position,
                "ballot with an empty councilmember name",
            ));
        }
        ballots.push((name, *ballot));
    }

    let id = match raw.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => derive_record_id(&meeting_id, &agenda_item, raw.frame_number, position),
    };

    Ok(NormalizedRecord {
        key: CanonicalKey {
            meeting_id: meeting_id.clone(),
            agenda_item: normalized_agenda,
        },
        id,
        meeting_id,
        agenda_item,
        ballots,
        position,
        raw,
    })
}
