use log::{debug, error, info};

use crate::config::FilterConfig;
use crate::error::{Result, SurveyError};
use crate::extract::Entry;
use crate::output::{OutputRouter, PartitionId};
use crate::predicate::evaluate;
use crate::stats::{StatsSnapshot, SurveyStats};

/// Number of processed entries between two progress observations.
pub const PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Scanning,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub processed: u64,
    pub matched: u64,
}

pub trait ProgressObserver {
    fn on_progress(&mut self, progress: ScanProgress);
}

/// Discards progress observations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _progress: ScanProgress) {}
}

impl<F: FnMut(ScanProgress)> ProgressObserver for F {
    fn on_progress(&mut self, progress: ScanProgress) {
        self(progress)
    }
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub stats: StatsSnapshot,
    pub partitions: Vec<PartitionId>,
}

/// Drives one pass: extract, evaluate, route and count, one entry at a time.
pub struct ScanDriver {
    config: FilterConfig,
    router: OutputRouter,
    stats: SurveyStats,
    phase: ScanPhase,
}

impl ScanDriver {
    pub fn new(config: FilterConfig, router: OutputRouter, current_year: i32) -> Self {
        let stats = SurveyStats::new(config.venues(), config.min_year(), current_year);
        Self {
            config,
            router,
            stats,
            phase: ScanPhase::Idle,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Counts gathered so far. After a failure this is what was seen before it.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Consumes `entries` to the end. The first error stops the scan and is
    /// returned; lines already written stay where they are.
    pub fn run<I, O>(&mut self, entries: I, observer: &mut O) -> Result<ScanReport>
    where
        I: IntoIterator<Item = Result<Entry>>,
        O: ProgressObserver + ?Sized,
    {
        if self.phase != ScanPhase::Idle {
            return Err(SurveyError::ScanAlreadyRan);
        }
        self.phase = ScanPhase::Scanning;
        info!(
            "Scanning for {} keywords in {} venues from {} on",
            self.config.keywords().len(),
            self.config.venues().len(),
            self.config.min_year()
        );

        for entry in entries {
            if let Err(e) = self.process(entry) {
                self.phase = ScanPhase::Failed;
                error!(
                    "Scan aborted after {} entries ({} matched): {}",
                    self.stats.total_processed(),
                    self.stats.total_matched(),
                    e
                );
                return Err(e);
            }

            if self.stats.total_processed() % PROGRESS_INTERVAL == 0 {
                observer.on_progress(ScanProgress {
                    processed: self.stats.total_processed(),
                    matched: self.stats.total_matched(),
                });
            }
        }

        if let Err(e) = self.router.flush() {
            self.phase = ScanPhase::Failed;
            return Err(e);
        }
        self.phase = ScanPhase::Completed;
        info!(
            "Scan complete: {} entries processed, {} survey candidates found",
            self.stats.total_processed(),
            self.stats.total_matched()
        );

        Ok(ScanReport {
            stats: self.stats.snapshot(),
            partitions: self.router.partitions_written(),
        })
    }

    fn process(&mut self, entry: Result<Entry>) -> Result<()> {
        match entry? {
            Entry::Skipped { kind, key, reason } => {
                debug!(
                    "Skipping {} {}: {}",
                    kind,
                    key.as_deref().unwrap_or("<no key>"),
                    reason
                );
            }
            Entry::Record(record) => {
                if let Some(m) = evaluate(&record, &self.config) {
                    let partition = self.router.append(&m)?;
                    self.stats.record_match(&m);
                    debug!(
                        "Matched '{}' ({}, {}) on keyword '{}' -> {}",
                        record.title, record.venue, record.year, m.keyword, partition
                    );
                }
            }
        }
        self.stats.record_processed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SplitMode;
    use crate::extract::{Record, RecordKind, SkipReason};
    use std::fs;

    fn record(venue: &str, year: i32, title: &str) -> Result<Entry> {
        Ok(Entry::Record(Record {
            kind: RecordKind::InProceedings,
            venue: venue.to_string(),
            year,
            title: title.to_string(),
            link: String::new(),
        }))
    }

    fn skipped() -> Result<Entry> {
        Ok(Entry::Skipped {
            kind: RecordKind::Article,
            key: None,
            reason: SkipReason::MissingVenue,
        })
    }

    fn driver(dir: &std::path::Path, keywords: &[&str]) -> ScanDriver {
        let config = FilterConfig::new(keywords.iter().copied(), ["ICML"], 2020);
        let router = OutputRouter::new(dir, SplitMode::PerVenue, 8).unwrap();
        ScanDriver::new(config, router, 2024)
    }

    #[test]
    fn skips_count_as_processed_but_never_as_matched() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = driver(dir.path(), &["learn"]);
        let entries = vec![skipped(), record("ICML", 2021, "Learning"), skipped()];
        let report = scan.run(entries, &mut NoProgress).unwrap();
        assert_eq!(report.stats.total_processed, 3);
        assert_eq!(report.stats.total_matched, 1);
        assert_eq!(scan.phase(), ScanPhase::Completed);
    }

    #[test]
    fn progress_is_observed_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = driver(dir.path(), &["learn"]);
        let entries = (0..2500).map(|i| record("ICML", 2021, if i % 2 == 0 { "Learning" } else { "Other" }));
        let mut seen = Vec::new();
        let mut observer = |p: ScanProgress| seen.push(p);
        scan.run(entries, &mut observer).unwrap();
        assert_eq!(
            seen,
            vec![
                ScanProgress { processed: 1000, matched: 500 },
                ScanProgress { processed: 2000, matched: 1000 },
            ]
        );
    }

    #[test]
    fn structural_error_fails_the_scan_and_keeps_written_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = driver(dir.path(), &["learn"]);
        let entries = vec![
            record("ICML", 2021, "Learning A"),
            Err(SurveyError::Structure {
                position: 42,
                details: "broken".to_string(),
            }),
            record("ICML", 2021, "Learning B"),
        ];
        assert!(scan.run(entries, &mut NoProgress).is_err());
        assert_eq!(scan.phase(), ScanPhase::Failed);
        assert_eq!(scan.snapshot().total_matched, 1);

        let content = fs::read_to_string(dir.path().join("icml.csv")).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("Learning A;"));
    }

    #[test]
    fn empty_keyword_set_matches_nothing_but_counts_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = driver(dir.path(), &[]);
        let entries = vec![record("ICML", 2021, "Learning"), record("ICML", 2022, "Graphs")];
        let report = scan.run(entries, &mut NoProgress).unwrap();
        assert_eq!(report.stats.total_processed, 2);
        assert_eq!(report.stats.total_matched, 0);
        assert!(report.stats.per_venue.iter().all(|vc| vc.count == 0));
        assert!(report.stats.per_year.values().all(|c| *c == 0));
        assert!(report.partitions.is_empty());
    }

    #[test]
    fn a_driver_runs_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = driver(dir.path(), &["learn"]);
        scan.run(Vec::new(), &mut NoProgress).unwrap();
        assert!(scan.run(Vec::new(), &mut NoProgress).is_err());
    }
}
