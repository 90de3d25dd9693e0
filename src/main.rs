use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dblp_survey::{
    check_year_not_future, load_keywords, load_venues, EntityTable, FilterConfig, OutputRouter,
    ProgressObserver, RecordStream, ScanDriver, ScanProgress, ScanReport, SplitMode,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Parser)]
#[command(name = "DBLP Survey")]
#[command(about = "Select the papers of the DBLP XML dump that come from listed venues, were published from a given year on and mention a keyword in their title")]
#[command(version = "0.1.0")]
struct Cli {
    #[arg(help = "Oldest publication year to consider (may not lie in the future)")]
    year: i32,

    #[arg(long, value_enum, default_value_t = SplitMode::PerVenue, help = "'none' writes every match to one file, 'per-venue' writes one file per conference/journal")]
    split: SplitMode,

    #[arg(short, long, default_value = "dblp.xml", help = "DBLP XML dump (.xml or .xml.gz)")]
    input: PathBuf,

    #[arg(long, help = "DTD declaring the dump's character entities (defaults to dblp.dtd next to the dump)")]
    dtd: Option<PathBuf>,

    #[arg(short, long, default_value = "inputs/keywords.csv", help = "Keyword list, one entry per line, case insensitive")]
    keywords: PathBuf,

    #[arg(short = 'c', long, default_value = "inputs/conf_journ.csv", help = "Conference/journal list, one entry per line, matched exactly")]
    venues: PathBuf,

    #[arg(short, long, default_value = "outputs", help = "Directory the CSV partitions are appended to")]
    output: PathBuf,

    #[arg(long, default_value = "100", help = "Maximum number of open files when splitting per venue")]
    max_open_files: usize,

    #[arg(long, help = "Also write the final counts as JSON to this file")]
    stats_json: Option<PathBuf>,

    #[arg(short, long, default_value = "INFO", help = "Logging level (DEBUG, INFO, WARN, ERROR)")]
    log_level: String,
}

mod memory_usage {
    use log::info;

    pub struct MemoryStats {
        pub rss_mb: f64,
        pub vm_size_mb: f64,
    }

    #[cfg(target_os = "linux")]
    pub fn current() -> Option<MemoryStats> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let field_kb = |name: &str| {
            status
                .lines()
                .find(|line| line.starts_with(name))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok())
        };
        Some(MemoryStats {
            rss_mb: field_kb("VmRSS:")? / 1024.0,
            vm_size_mb: field_kb("VmSize:")? / 1024.0,
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn current() -> Option<MemoryStats> {
        None
    }

    pub fn log_memory_usage(note: &str) {
        match current() {
            Some(stats) => info!(
                "Memory usage ({}): {:.1} MB physical (RSS), {:.1} MB virtual",
                note, stats.rss_mb, stats.vm_size_mb
            ),
            None => info!(
                "Memory usage tracking not available on this platform ({})",
                std::env::consts::OS
            ),
        }
    }
}

struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] {spinner:.cyan} {msg}")
                .map_err(|e| anyhow!("Failed to create progress bar template: {:?}", e))?,
        );
        bar.enable_steady_tick(Duration::from_millis(200));
        bar.set_message("Starting scan...");
        Ok(Self { bar })
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&mut self, progress: ScanProgress) {
        let message = format!(
            "{} papers processed, {} survey candidates found.",
            progress.processed, progress.matched
        );
        debug!("{}", message);
        self.bar.set_message(message);
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
    match (hours, minutes) {
        (0, 0) => format!("{}.{:03}s", seconds, elapsed.subsec_millis()),
        (0, _) => format!("{}m {}s", minutes, seconds),
        _ => format!("{}h {}m {}s", hours, minutes, seconds),
    }
}

fn setup_logging(log_level_str: &str) -> Result<()> {
    let log_level = match log_level_str.to_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        other => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", other);
            LevelFilter::Info
        }
    };

    SimpleLogger::new()
        .with_level(log_level)
        .with_timestamp_format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .init()?;

    Ok(())
}

fn load_filter_config(cli: &Cli) -> Result<FilterConfig> {
    let keywords = load_keywords(&cli.keywords)
        .with_context(|| format!("Failed to load keywords from {}", cli.keywords.display()))?;
    let venues = load_venues(&cli.venues)
        .with_context(|| format!("Failed to load venues from {}", cli.venues.display()))?;
    info!("Loaded {} keywords and {} conferences/journals", keywords.len(), venues.len());
    Ok(FilterConfig::new(keywords, venues, cli.year))
}

fn load_entities(cli: &Cli, input: &Path) -> Result<EntityTable> {
    let dtd = cli
        .dtd
        .clone()
        .or_else(|| Some(input.with_file_name("dblp.dtd")).filter(|p| p.is_file()));

    match dtd {
        Some(path) => {
            let table = EntityTable::from_dtd_file(&path)
                .with_context(|| format!("Failed to read entity declarations from {}", path.display()))?;
            info!("Resolving {} character entities declared in {}", table.len(), path.display());
            Ok(table)
        }
        None => {
            warn!("No DTD found next to {}; resolving ISO Latin-1 entities only", input.display());
            Ok(EntityTable::latin1())
        }
    }
}

fn write_stats_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create stats file: {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report.stats)
        .with_context(|| format!("Failed to write stats to {}", path.display()))?;
    info!("Stats written to {}", path.display());
    Ok(())
}

fn print_final_summary(start_time: Instant, report: &ScanReport, cli: &Cli) {
    let stats = &report.stats;
    info!("-------------------- FINAL SUMMARY --------------------");
    info!("+++ DBLP SURVEY COMPLETE +++");
    info!("Total execution time: {}", format_elapsed(start_time.elapsed()));
    info!(
        "{} papers processed, {} survey candidates found.",
        stats.total_processed, stats.total_matched
    );

    info!("Stats by conference/journal:");
    for vc in &stats.per_venue {
        info!("  - {}: {} papers", vc.venue, vc.count);
    }

    info!("Stats by year:");
    for (year, count) in &stats.per_year {
        info!("  - {}: {} papers", year, count);
    }

    if report.partitions.is_empty() {
        info!("No matches, nothing written to {}", cli.output.display());
    } else if report.partitions.len() < 50 {
        info!("Output appended to {}:", cli.output.display());
        for partition in &report.partitions {
            info!("  - {}", partition.file_name());
        }
    } else {
        info!(
            "Output appended to {} files in {}",
            report.partitions.len(),
            cli.output.display()
        );
    }
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    setup_logging(&cli.log_level)?;

    let current_year = OffsetDateTime::now_utc().year();
    if let Err(e) = check_year_not_future(cli.year, current_year) {
        warn!("{}.", e);
        return Ok(());
    }

    info!("Starting DBLP survey from {} to {}", cli.year, current_year);
    memory_usage::log_memory_usage("initial");

    let config = load_filter_config(&cli)?;
    let entities = load_entities(&cli, &cli.input)?;
    let stream = RecordStream::from_path(&cli.input, entities)
        .with_context(|| format!("Failed to open DBLP dump: {}", cli.input.display()))?;
    let router = OutputRouter::new(&cli.output, cli.split, cli.max_open_files)
        .with_context(|| format!("Failed to prepare output directory: {}", cli.output.display()))?;

    let mut driver = ScanDriver::new(config, router, current_year);
    let mut progress = ConsoleProgress::new()?;

    let report = match driver.run(stream, &mut progress) {
        Ok(report) => {
            progress.bar.finish_with_message(format!(
                "Done. {} papers processed, {} survey candidates found.",
                report.stats.total_processed, report.stats.total_matched
            ));
            report
        }
        Err(e) => {
            let partial = driver.snapshot();
            progress.bar.abandon_with_message("Scan aborted.");
            error!(
                "Lines written before the failure are kept ({} survey candidates).",
                partial.total_matched
            );
            return Err(anyhow::Error::new(e).context(format!("Scan of {} failed", cli.input.display())));
        }
    };

    print_final_summary(start_time, &report, &cli);
    if let Some(path) = &cli.stats_json {
        write_stats_json(path, &report)?;
    }

    memory_usage::log_memory_usage("final");
    info!("-------------------------------------------------------");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_formatted_by_magnitude() {
        assert_eq!(format_elapsed(Duration::from_millis(4_250)), "4.250s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "1h 2m 5s");
    }

    #[test]
    fn cli_accepts_split_modes() {
        let cli = Cli::try_parse_from(["dblp-survey", "2020", "--split", "none"]).unwrap();
        assert_eq!(cli.year, 2020);
        assert_eq!(cli.split, SplitMode::None);

        let cli = Cli::try_parse_from(["dblp-survey", "2018"]).unwrap();
        assert_eq!(cli.split, SplitMode::PerVenue);
        assert_eq!(cli.input, PathBuf::from("dblp.xml"));

        assert!(Cli::try_parse_from(["dblp-survey", "2018", "--split", "per-source"]).is_err());
    }
}
