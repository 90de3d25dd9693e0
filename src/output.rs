use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, Terminator, Writer, WriterBuilder};
use log::{debug, error, info, warn};

use crate::config::SplitMode;
use crate::error::{Result, SurveyError};
use crate::predicate::Match;

/// Partition used when output is not split.
pub const UNSPLIT_PARTITION: &str = "dblp_survey";

/// Identifies one append-only output file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(String);

impl PartitionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, spaces and path separators to hyphens, periods dropped.
pub fn venue_slug(venue: &str) -> String {
    venue
        .replace('.', "")
        .replace([' ', '/', '\\'], "-")
        .to_lowercase()
}

pub fn route(m: &Match<'_>, mode: SplitMode) -> PartitionId {
    match mode {
        SplitMode::None => PartitionId(UNSPLIT_PARTITION.to_string()),
        SplitMode::PerVenue => PartitionId(venue_slug(&m.record.venue)),
    }
}

pub fn hyperlink_formula(link: &str) -> String {
    format!("=HYPERLINK(\"{}\")", link)
}

fn open_partition(dir: &Path, partition: &PartitionId) -> Result<Writer<File>> {
    let path = dir.join(partition.file_name());
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    debug!("Opened partition {} in append mode: {}", partition, path.display());
    Ok(WriterBuilder::new()
        .delimiter(b';')
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .has_headers(false)
        .from_writer(file))
}

/// Writes `title;venue;year;=HYPERLINK("link")` and flushes it straight away,
/// so an interrupted run keeps every line written so far.
fn write_match(writer: &mut Writer<File>, m: &Match<'_>) -> Result<()> {
    let record = m.record;
    let year = record.year.to_string();
    let link = hyperlink_formula(&record.link);
    writer.write_record([
        record.title.as_str(),
        record.venue.as_str(),
        year.as_str(),
        link.as_str(),
    ])?;
    writer.flush()?;
    Ok(())
}

pub trait OutputStrategy {
    fn write_match(&mut self, partition: &PartitionId, m: &Match<'_>) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn partitions_written(&self) -> Vec<PartitionId>;
}

pub struct SingleFileOutput {
    dir: PathBuf,
    writer: Option<(PartitionId, Writer<File>)>,
}

impl SingleFileOutput {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            writer: None,
        }
    }
}

impl OutputStrategy for SingleFileOutput {
    fn write_match(&mut self, partition: &PartitionId, m: &Match<'_>) -> Result<()> {
        let writer = match &mut self.writer {
            Some((_, writer)) => writer,
            slot => &mut slot.insert((partition.clone(), open_partition(&self.dir, partition)?)).1,
        };
        write_match(writer, m)
    }

    fn flush(&mut self) -> Result<()> {
        if let Some((partition, writer)) = self.writer.as_mut() {
            debug!("Flushing partition {}", partition);
            writer.flush()?;
        }
        Ok(())
    }

    fn partitions_written(&self) -> Vec<PartitionId> {
        self.writer.iter().map(|(p, _)| p.clone()).collect()
    }
}

/// One file per venue, with at most `max_open_files` handles held at once.
/// Least recently used partitions are closed first and reopened in append
/// mode when they are needed again.
pub struct PerVenueOutput {
    dir: PathBuf,
    writers: HashMap<PartitionId, Writer<File>>,
    touched: BTreeSet<PartitionId>,
    max_open_files: usize,
    lru: VecDeque<PartitionId>,
}

impl PerVenueOutput {
    pub fn new<P: AsRef<Path>>(dir: P, max_open_files: usize) -> Self {
        let max_open_files = max_open_files.max(1);
        Self {
            dir: dir.as_ref().to_path_buf(),
            writers: HashMap::with_capacity(max_open_files.min(1024)),
            touched: BTreeSet::new(),
            max_open_files,
            lru: VecDeque::with_capacity(max_open_files.min(1024)),
        }
    }

    fn writer_for(&mut self, partition: &PartitionId) -> Result<&mut Writer<File>> {
        if self.writers.contains_key(partition) {
            if let Some(pos) = self.lru.iter().position(|p| p == partition) {
                self.lru.remove(pos);
            }
            self.lru.push_front(partition.clone());
        } else {
            while self.writers.len() >= self.max_open_files {
                let Some(oldest) = self.lru.pop_back() else {
                    error!("LRU queue empty while {} partitions are open", self.writers.len());
                    break;
                };
                debug!("Closing partition {} to stay within {} open files", oldest, self.max_open_files);
                if let Some(mut writer) = self.writers.remove(&oldest) {
                    if let Err(e) = writer.flush() {
                        warn!("Error flushing partition {} before closing: {}", oldest, e);
                    }
                }
            }
            let writer = open_partition(&self.dir, partition)?;
            self.writers.insert(partition.clone(), writer);
            self.lru.push_front(partition.clone());
            self.touched.insert(partition.clone());
        }

        self.writers
            .get_mut(partition)
            .ok_or_else(|| SurveyError::PartitionClosed(partition.to_string()))
    }
}

impl OutputStrategy for PerVenueOutput {
    fn write_match(&mut self, partition: &PartitionId, m: &Match<'_>) -> Result<()> {
        let writer = self.writer_for(partition)?;
        write_match(writer, m)
    }

    fn flush(&mut self) -> Result<()> {
        debug!("Flushing {} open partitions", self.writers.len());
        let mut first_error = None;
        for (partition, writer) in self.writers.iter_mut() {
            if let Err(e) = writer.flush() {
                error!("Failed to flush partition {}: {}", partition, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn partitions_written(&self) -> Vec<PartitionId> {
        self.touched.iter().cloned().collect()
    }
}

/// Resolves the partition for each match and appends its line there.
pub struct OutputRouter {
    mode: SplitMode,
    strategy: Box<dyn OutputStrategy>,
    lines_written: u64,
}

impl OutputRouter {
    /// Creates the output directory; partitions themselves open lazily.
    pub fn new<P: AsRef<Path>>(dir: P, mode: SplitMode, max_open_files: usize) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.exists() && !dir.is_dir() {
            return Err(SurveyError::NotADirectory(dir.to_path_buf()));
        }
        fs::create_dir_all(dir)?;

        let strategy: Box<dyn OutputStrategy> = match mode {
            SplitMode::None => {
                info!("Matches will be appended to {}", dir.join(format!("{}.csv", UNSPLIT_PARTITION)).display());
                Box::new(SingleFileOutput::new(dir))
            }
            SplitMode::PerVenue => {
                info!(
                    "Matches will be appended to one file per venue in {} (max {} open files)",
                    dir.display(),
                    max_open_files
                );
                Box::new(PerVenueOutput::new(dir, max_open_files))
            }
        };

        Ok(Self {
            mode,
            strategy,
            lines_written: 0,
        })
    }

    pub fn append(&mut self, m: &Match<'_>) -> Result<PartitionId> {
        let partition = route(m, self.mode);
        self.strategy.write_match(&partition, m)?;
        self.lines_written += 1;
        Ok(partition)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.strategy.flush()
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn partitions_written(&self) -> Vec<PartitionId> {
        self.strategy.partitions_written()
    }
}

impl Drop for OutputRouter {
    fn drop(&mut self) {
        if let Err(e) = self.strategy.flush() {
            error!("Error flushing output partitions during cleanup: {}", e);
        }
    }
}
