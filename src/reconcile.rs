use crate::types::{
    Ballot, ConsolidatedVote, CouncilmemberStat, Dataset, DatasetMetadata, Meeting, Tally,
    VoteOutcome, VoteResults,
};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};

/// Result of recomputing every derived figure from the consolidated votes
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub votes: Vec<ConsolidatedVote>,
    pub meetings: IndexMap<String, Meeting>,
    pub councilmember_stats: BTreeMap<String, CouncilmemberStat>,
    pub councilmembers: Vec<String>,
    pub metadata: DatasetMetadata,
    /// Votes whose stated tally disagreed with their ballots
    pub tallies_corrected: usize,
}

impl Reconciled {
    pub fn into_dataset(self) -> Dataset {
        Dataset {
            metadata: self.metadata,
            votes: self.votes,
            meetings: self.meetings,
            councilmembers: self.councilmembers,
            councilmember_stats: self.councilmember_stats,
            meeting_summaries: IndexMap::new(),
            councilmember_summaries: IndexMap::new(),
        }
    }
}

/// Recompute tallies, meeting totals, councilmember stats and dataset counts.
///
/// Nothing is patched incrementally: every figure is derived from `votes`
/// alone, so running this twice gives the same result.
pub fn reconcile(votes: Vec<ConsolidatedVote>, meetings: IndexMap<String, Meeting>) -> Reconciled {
    let mut tallies_corrected = 0;
    let votes: Vec<ConsolidatedVote> = votes
        .into_iter()
        .map(|vote| {
            let (vote, corrected) = recount_tally(vote);
            if corrected {
                tallies_corrected += 1;
            }
            vote
        })
        .collect();

    let mut per_meeting: HashMap<&str, VoteResults> = HashMap::new();
    for vote in &votes {
        let results = per_meeting.entry(vote.meeting_id.as_str()).or_default();
        match vote.tally.outcome() {
            VoteOutcome::Passed => results.passed += 1,
            VoteOutcome::Failed => results.failed += 1,
            VoteOutcome::Tied => results.tied += 1,
        }
    }

    let meetings: IndexMap<String, Meeting> = meetings
        .into_iter()
        .map(|(key, meeting)| {
            let results = per_meeting.get(key.as_str()).copied().unwrap_or_default();
            let meeting = Meeting {
                id: Some(meeting.id.unwrap_or_else(|| key.clone())),
                total_votes: results.passed + results.failed + results.tied,
                vote_results: Some(results),
                ..meeting
            };
            (key, meeting)
        })
        .collect();

    let councilmember_stats = councilmember_stats(&votes);
    let councilmembers: Vec<String> = councilmember_stats.keys().cloned().collect();

    let metadata = DatasetMetadata {
        total_votes: votes.len(),
        total_meetings: meetings.len(),
        total_councilmembers: councilmember_stats.len(),
        votes_with_individual_data: votes
            .iter()
            .filter(|vote| !vote.individual_votes.is_empty())
            .count(),
        last_updated: None,
    };

    Reconciled {
        votes,
        meetings,
        councilmember_stats,
        councilmembers,
        metadata,
        tallies_corrected,
    }
}

/// Replace the stated tally with the ballot count when ballots exist
pub fn recount_tally(vote: ConsolidatedVote) -> (ConsolidatedVote, bool) {
    if vote.individual_votes.is_empty() {
        return (vote, false);
    }
    let counted = Tally::from_ballots(vote.individual_votes.values());
    if counted == vote.tally {
        (vote, false)
    } else {
        (
            ConsolidatedVote {
                tally: counted,
                ..vote
            },
            true,
        )
    }
}

/// Per-councilmember statistics over the full vote set
pub fn councilmember_stats(votes: &[ConsolidatedVote]) -> BTreeMap<String, CouncilmemberStat> {
    let mut stats: BTreeMap<String, CouncilmemberStat> = BTreeMap::new();
    for vote in votes {
        for (name, ballot) in &vote.individual_votes {
            let stat = stats.entry(name.clone()).or_default();
            match ballot {
                Ballot::Yes => stat.yes_votes += 1,
                Ballot::No => stat.no_votes += 1,
                Ballot::Abstain => stat.abstain_votes += 1,
                Ballot::Recuse => stat.recused_votes += 1,
                Ballot::Absent => stat.absent_votes += 1,
            }
            if ballot.is_present() {
                stat.total_votes += 1;
            }
        }
    }

    let vote_count = votes.len();
    for stat in stats.values_mut() {
        stat.attendance_rate = if vote_count == 0 {
            0.0
        } else {
            stat.total_votes as f64 / vote_count as f64
        };
    }
    stats
}
