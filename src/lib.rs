//! Single-pass survey of a DBLP-style XML dump.
//!
//! Records are pulled one at a time from the dump, kept when their venue is
//! listed, their year is recent enough and their title contains a keyword,
//! appended to append-only CSV partitions, and counted per venue and year.

pub mod config;
pub mod entities;
pub mod error;
pub mod extract;
pub mod output;
pub mod predicate;
pub mod scan;
pub mod stats;

pub use config::{check_year_not_future, load_keywords, load_venues, FilterConfig, SplitMode};
pub use entities::EntityTable;
pub use error::{Result, SurveyError};
pub use extract::{open_dump, Entry, Record, RecordKind, RecordStream, SkipReason};
pub use output::{route, venue_slug, OutputRouter, PartitionId, UNSPLIT_PARTITION};
pub use predicate::{evaluate, Match};
pub use scan::{NoProgress, ProgressObserver, ScanDriver, ScanPhase, ScanProgress, ScanReport, PROGRESS_INTERVAL};
pub use stats::{StatsSnapshot, SurveyStats, VenueCount};
