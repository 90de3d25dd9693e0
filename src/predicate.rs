use crate::config::FilterConfig;
use crate::extract::Record;

/// A record that passed every filter stage, with the keyword credited for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'a> {
    pub record: &'a Record,
    pub keyword: &'a str,
}

/// Year, then venue, then keywords in configured order. Stops at the first
/// failing stage and at the first keyword found in the lowercased title.
pub fn evaluate<'a>(record: &'a Record, config: &'a FilterConfig) -> Option<Match<'a>> {
    if record.year < config.min_year() {
        return None;
    }
    if !config.contains_venue(&record.venue) {
        return None;
    }

    let title = record.title.to_lowercase();
    config
        .keywords()
        .iter()
        .find(|kw| title.contains(kw.as_str()))
        .map(|kw| Match {
            record,
            keyword: kw.as_str(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RecordKind;

    fn record(venue: &str, year: i32, title: &str) -> Record {
        Record {
            kind: RecordKind::InProceedings,
            venue: venue.to_string(),
            year,
            title: title.to_string(),
            link: String::new(),
        }
    }

    fn config() -> FilterConfig {
        FilterConfig::new(["learn", "graph"], ["ICML", "KDD"], 2020)
    }

    #[test]
    fn matches_when_all_stages_pass() {
        let config = config();
        let rec = record("ICML", 2021, "Deep Learning Survey");
        let m = evaluate(&rec, &config).expect("should match");
        assert_eq!(m.keyword, "learn");
        assert_eq!(m.record, &rec);
    }

    #[test]
    fn lower_year_bound_is_inclusive() {
        let config = config();
        assert!(evaluate(&record("ICML", 2020, "Learning"), &config).is_some());
        assert!(evaluate(&record("ICML", 2019, "Learning"), &config).is_none());
    }

    #[test]
    fn venue_must_match_exactly() {
        let config = config();
        assert!(evaluate(&record("NeurIPS", 2022, "Learning"), &config).is_none());
        assert!(evaluate(&record("icml", 2022, "Learning"), &config).is_none());
    }

    #[test]
    fn keyword_is_a_substring_not_a_token() {
        let config = config();
        let rec = record("KDD", 2022, "Unlearnable Examples");
        let m = evaluate(&rec, &config);
        assert_eq!(m.map(|m| m.keyword), Some("learn"));
        assert!(evaluate(&record("KDD", 2022, "Databases"), &config).is_none());
    }

    #[test]
    fn first_configured_keyword_wins_the_tie() {
        let forward = FilterConfig::new(["graph", "learn"], ["KDD"], 2020);
        let backward = FilterConfig::new(["learn", "graph"], ["KDD"], 2020);
        let rec = record("KDD", 2022, "Learning on Graphs");
        assert_eq!(evaluate(&rec, &forward).map(|m| m.keyword), Some("graph"));
        assert_eq!(evaluate(&rec, &backward).map(|m| m.keyword), Some("learn"));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let config = config();
        let rec = record("ICML", 2023, "Graph Learning");
        assert_eq!(evaluate(&rec, &config), evaluate(&rec, &config));
    }

    #[test]
    fn empty_keyword_set_never_matches() {
        let config = FilterConfig::new(Vec::<String>::new(), ["ICML"], 2000);
        assert!(evaluate(&record("ICML", 2022, "Anything"), &config).is_none());
    }
}
