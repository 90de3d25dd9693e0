use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use clap::ValueEnum;
use csv::ReaderBuilder;
use log::{debug, warn};

use crate::error::{Result, SurveyError};

/// How matched records are spread over output partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SplitMode {
    /// Every match lands in one partition.
    None,
    /// One partition per matched venue.
    #[default]
    PerVenue,
}

/// Immutable filter built once before the scan.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    keywords: Vec<String>,
    venues: Vec<String>,
    venue_set: HashSet<String>,
    min_year: i32,
}

impl FilterConfig {
    /// Keywords are lowercased and deduplicated keeping their first position,
    /// which fixes the tie-break order used when a title holds several of them.
    pub fn new<K, V>(keywords: K, venues: V, min_year: i32) -> Self
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let mut seen = HashSet::new();
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|kw| kw.as_ref().to_lowercase())
            .filter(|kw| !kw.is_empty())
            .filter(|kw| seen.insert(kw.clone()))
            .collect();

        let mut venue_set = HashSet::new();
        let venues: Vec<String> = venues
            .into_iter()
            .map(Into::into)
            .filter(|v: &String| !v.is_empty())
            .filter(|v| venue_set.insert(v.clone()))
            .collect();

        if keywords.is_empty() {
            warn!("Keyword list is empty; no record can match.");
        }
        if venues.is_empty() {
            warn!("Venue list is empty; no record can match.");
        }

        Self {
            keywords,
            venues,
            venue_set,
            min_year,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Venues in the order they were configured.
    pub fn venues(&self) -> &[String] {
        &self.venues
    }

    pub fn contains_venue(&self, venue: &str) -> bool {
        self.venue_set.contains(venue)
    }

    pub fn min_year(&self) -> i32 {
        self.min_year
    }
}

/// Refuses a lower year bound that lies in the future.
pub fn check_year_not_future(year: i32, current_year: i32) -> Result<()> {
    if year > current_year {
        return Err(SurveyError::FutureYear(year));
    }
    Ok(())
}

/// Reads the first column of a header-less, one-entry-per-line list.
pub fn load_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let list_err = |source| SurveyError::ListFile {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut entries = Vec::new();
    for row in reader.records() {
        let row = row.map_err(list_err)?;
        if let Some(first) = row.get(0) {
            if !first.is_empty() {
                entries.push(first.to_string());
            }
        }
    }
    debug!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

pub fn load_keywords<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    load_list(path)
}

pub fn load_venues<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    load_list(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn keywords_are_lowercased_and_deduplicated_in_order() {
        let config = FilterConfig::new(["Learn", "graph", "LEARN", ""], ["ICML"], 2020);
        assert_eq!(config.keywords(), &["learn".to_string(), "graph".to_string()]);
    }

    #[test]
    fn venue_membership_is_case_sensitive() {
        let config = FilterConfig::new(["x"], ["ICML", "NeurIPS"], 2020);
        assert!(config.contains_venue("ICML"));
        assert!(!config.contains_venue("icml"));
        assert_eq!(config.venues().len(), 2);
    }

    #[test]
    fn future_year_is_rejected() {
        assert!(check_year_not_future(2024, 2025).is_ok());
        assert!(check_year_not_future(2025, 2025).is_ok());
        assert!(matches!(
            check_year_not_future(2026, 2025),
            Err(SurveyError::FutureYear(2026))
        ));
    }

    #[test]
    fn list_loader_takes_first_column_and_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ICML").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "\"Proc. VLDB Endow.\",extra").unwrap();
        writeln!(file, "IEEE Trans. Pattern Anal. Mach. Intell.").unwrap();

        let venues = load_venues(file.path()).unwrap();
        assert_eq!(
            venues,
            vec![
                "ICML".to_string(),
                "Proc. VLDB Endow.".to_string(),
                "IEEE Trans. Pattern Anal. Mach. Intell.".to_string(),
            ]
        );
    }

    #[test]
    fn missing_list_file_is_an_io_error() {
        let err = load_keywords("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, SurveyError::Io(_)));
    }
}
