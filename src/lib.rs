//! Deduplication and consolidation of council vote extractions.
//!
//! Raw vote records extracted from meeting videos are normalized, grouped by
//! canonical key, merged into one vote per agenda item, reconciled into
//! meeting and councilmember statistics, and validated before the dataset
//! is written.

pub mod collaborators;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod group;
pub mod importer;
pub mod input;
pub mod normalize;
pub mod persist;
pub mod reconcile;
pub mod types;
pub mod validate;

pub use config::{FileConfig, ImportConfig, ImportConfigBuilder};
pub use error::{Error, MalformedRecord, Result};
pub use importer::{ImportReport, ImportRun, ImportStats, Importer, PersistOutcome};
pub use types::{
    Ballot, ConflictWarning, ConsolidatedVote, CouncilmemberStat, Dataset, Meeting, RawVoteRecord,
    Tally,
};
pub use validate::{ValidationError, ValidationReport, ValidationWarning};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::collaborators::{SummarySource, VideoMetadataSource};
    pub use crate::config::{FileConfig, ImportConfig, ImportConfigBuilder};
    pub use crate::error::{Error, MalformedRecord, Result};
    pub use crate::importer::{consolidate_dataset, ImportReport, Importer, PersistOutcome};
    pub use crate::types::{Ballot, ConsolidatedVote, Dataset, Meeting, RawVoteRecord, Tally};
    pub use crate::validate::{validate, ValidationReport};
}
