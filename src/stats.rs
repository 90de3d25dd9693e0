use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::predicate::Match;

/// Running counts for one scan, owned by the scan driver.
#[derive(Debug, Clone)]
pub struct SurveyStats {
    venue_order: Vec<String>,
    per_venue: HashMap<String, u64>,
    per_year: BTreeMap<i32, u64>,
    total_processed: u64,
    total_matched: u64,
}

/// Read-only view of the counts, in report order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_processed: u64,
    pub total_matched: u64,
    pub per_venue: Vec<VenueCount>,
    pub per_year: BTreeMap<i32, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VenueCount {
    pub venue: String,
    pub count: u64,
}

impl SurveyStats {
    /// Every configured venue and every year in `min_year..=current_year`
    /// starts at zero so the report lists them even without matches.
    pub fn new(venues: &[String], min_year: i32, current_year: i32) -> Self {
        let per_venue = venues.iter().map(|v| (v.clone(), 0)).collect();
        let per_year = (min_year..=current_year).map(|y| (y, 0)).collect();
        Self {
            venue_order: venues.to_vec(),
            per_venue,
            per_year,
            total_processed: 0,
            total_matched: 0,
        }
    }

    pub fn record_processed(&mut self) {
        self.total_processed += 1;
    }

    /// Years outside the seeded range get an entry on first sight.
    pub fn record_match(&mut self, m: &Match<'_>) {
        let record = m.record;
        match self.per_venue.get_mut(&record.venue) {
            Some(count) => *count += 1,
            None => {
                self.venue_order.push(record.venue.clone());
                self.per_venue.insert(record.venue.clone(), 1);
            }
        }
        *self.per_year.entry(record.year).or_insert(0) += 1;
        self.total_matched += 1;
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed
    }

    pub fn total_matched(&self) -> u64 {
        self.total_matched
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let per_venue = self
            .venue_order
            .iter()
            .map(|venue| VenueCount {
                venue: venue.clone(),
                count: self.per_venue.get(venue).copied().unwrap_or(0),
            })
            .collect();
        StatsSnapshot {
            total_processed: self.total_processed,
            total_matched: self.total_matched,
            per_venue,
            per_year: self.per_year.clone(),
        }
    }
}

impl StatsSnapshot {
    pub fn venue_count(&self, venue: &str) -> Option<u64> {
        self.per_venue
            .iter()
            .find(|vc| vc.venue == venue)
            .map(|vc| vc.count)
    }

    pub fn year_count(&self, year: i32) -> Option<u64> {
        self.per_year.get(&year).copied()
    }
}
