use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the survey engine.
///
/// Only the structural variants abort a scan. Records that are merely missing
/// a field never surface here; they come out of the extractor as skips.
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to read list file {path}: {source}")]
    ListFile {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("output path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("output partition {0} is not open")]
    PartitionClosed(String),
    #[error("failed to write output line: {0}")]
    Output(#[from] csv::Error),
    #[error("malformed XML at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
    #[error("cannot decode text at byte {position}: {source}")]
    Escape {
        position: u64,
        #[source]
        source: quick_xml::escape::EscapeError,
    },
    #[error("structural error at byte {position}: {details}")]
    Structure { position: u64, details: String },
    #[error("a scan driver can only run once")]
    ScanAlreadyRan,
    #[error("the year {0} has not come yet, so there are no publications")]
    FutureYear(i32),
}

pub type Result<T> = std::result::Result<T, SurveyError>;
