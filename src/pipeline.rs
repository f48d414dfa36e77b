use crate::aggregate;
use crate::config::Config;
use crate::db::models::DailyRecord;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::parser::{station_id_from_path, Parser};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, warn, Instrument};
use zip::ZipArchive;

/// Where an archive stands in its trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Pending,
    Parsing,
    Aggregating,
    Loading,
    Moved,
    /// Loaded but left in the pending directory because moving is disabled.
    Loaded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub file_name: String,
    pub station_id: Option<String>,
    pub state: ArchiveState,
    /// The step that was running when the archive failed.
    pub failed_at: Option<ArchiveState>,
    pub daily_rows: usize,
    pub monthly_rows: usize,
    pub yearly_rows: usize,
    pub error: Option<String>,
}

impl ArchiveOutcome {
    fn pending(file_name: String) -> Self {
        Self {
            file_name,
            station_id: None,
            state: ArchiveState::Pending,
            failed_at: None,
            daily_rows: 0,
            monthly_rows: 0,
            yearly_rows: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ArchiveOutcome>,
}

impl RunSummary {
    pub fn moved(&self) -> usize {
        self.count(ArchiveState::Moved)
    }

    pub fn loaded(&self) -> usize {
        self.count(ArchiveState::Moved) + self.count(ArchiveState::Loaded)
    }

    pub fn failed(&self) -> usize {
        self.count(ArchiveState::Failed)
    }

    fn count(&self, state: ArchiveState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }
}

pub struct Pipeline {
    config: Config,
    repository: Repository,
}

impl Pipeline {
    pub fn new(config: Config, repository: Repository) -> Self {
        Self { config, repository }
    }

    /// Process every pending archive once, in file-name order.
    ///
    /// Per-archive failures are logged and the archive stays where it is.
    /// Only a lost store connection (or an unreadable pending directory)
    /// ends the run early.
    pub async fn run(&self) -> Result<RunSummary> {
        let paths = &self.config.paths;

        if !paths.pending_dir.is_dir() {
            return Err(AppError::InvalidData(format!(
                "Pending directory {} does not exist",
                paths.pending_dir.display()
            )));
        }
        if self.config.pipeline.move_processed {
            std::fs::create_dir_all(&paths.processed_dir)?;
        }

        let archives = self.pending_archives()?;
        info!(
            "Starting ingestion run: {} pending archives in {}",
            archives.len(),
            paths.pending_dir.display()
        );

        let mut summary = RunSummary::default();

        for archive_path in archives {
            let attempt = self.process_archive(&archive_path).await;
            let file_name = attempt.outcome.file_name.clone();
            summary.outcomes.push(attempt.outcome);

            if let Some(fatal) = attempt.fatal {
                error!("Aborting run after {}: store connection lost", file_name);
                return Err(fatal);
            }
        }

        info!(
            "Ingestion run completed: {} loaded ({} moved), {} failed",
            summary.loaded(),
            summary.moved(),
            summary.failed()
        );

        Ok(summary)
    }

    /// Files in the pending directory matching the archive pattern, sorted.
    pub fn pending_archives(&self) -> Result<Vec<PathBuf>> {
        let pattern = glob::Pattern::new(&self.config.pipeline.archive_pattern)
            .map_err(|e| AppError::Config(format!("Invalid archive_pattern: {}", e)))?;

        let mut archives = Vec::new();
        for entry in std::fs::read_dir(&self.config.paths.pending_dir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| pattern.matches(n))
                .unwrap_or(false);
            if matches && path.is_file() {
                archives.push(path);
            }
        }

        archives.sort();
        Ok(archives)
    }

    async fn process_archive(&self, archive_path: &Path) -> Attempt {
        let file_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut outcome = ArchiveOutcome::pending(file_name.clone());

        let station_id = match station_id_from_path(archive_path) {
            Ok(id) => id,
            Err(e) => return Attempt::failed(outcome, ArchiveState::Pending, e),
        };
        outcome.station_id = Some(station_id.clone());

        let span = info_span!("archive", station = %station_id, archive = %file_name);
        self.process_station_archive(archive_path, outcome, &station_id)
            .instrument(span)
            .await
    }

    async fn process_station_archive(
        &self,
        archive_path: &Path,
        mut outcome: ArchiveOutcome,
        station_id: &str,
    ) -> Attempt {
        outcome.state = ArchiveState::Parsing;
        let daily = match read_daily_records(archive_path, &outcome.file_name, station_id) {
            Ok(daily) => daily,
            Err(e) => return Attempt::failed(outcome, ArchiveState::Parsing, e),
        };
        outcome.daily_rows = daily.len();

        outcome.state = ArchiveState::Aggregating;
        let monthly = aggregate::monthly(&daily);
        let yearly = aggregate::yearly(&daily);
        outcome.monthly_rows = monthly.len();
        outcome.yearly_rows = yearly.len();

        outcome.state = ArchiveState::Loading;
        let loaded = async {
            self.repository.upsert_daily(&daily).await?;
            self.repository.upsert_monthly(&monthly).await?;
            self.repository.upsert_yearly(&yearly).await?;
            Ok::<_, AppError>(())
        }
        .await;
        if let Err(e) = loaded {
            return Attempt::failed(outcome, ArchiveState::Loading, e);
        }

        info!(
            "Successfully processed data for station {}: {} daily, {} monthly, {} yearly rows",
            station_id, outcome.daily_rows, outcome.monthly_rows, outcome.yearly_rows
        );

        if !self.config.pipeline.move_processed {
            outcome.state = ArchiveState::Loaded;
            return Attempt::done(outcome);
        }

        let destination = self.config.paths.processed_dir.join(&outcome.file_name);
        if let Err(e) = move_file(archive_path, &destination) {
            return Attempt::failed(outcome, ArchiveState::Loading, e);
        }

        outcome.state = ArchiveState::Moved;
        Attempt::done(outcome)
    }
}

/// Result of one archive attempt. `fatal` carries an error that must end
/// the run.
struct Attempt {
    outcome: ArchiveOutcome,
    fatal: Option<AppError>,
}

impl Attempt {
    fn done(outcome: ArchiveOutcome) -> Self {
        Self {
            outcome,
            fatal: None,
        }
    }

    fn failed(mut outcome: ArchiveOutcome, step: ArchiveState, err: AppError) -> Self {
        error!(
            "Failed to process {} (station {}) during {:?}: {}",
            outcome.file_name,
            outcome.station_id.as_deref().unwrap_or("unknown"),
            step,
            err
        );

        outcome.state = ArchiveState::Failed;
        outcome.failed_at = Some(step);
        outcome.error = Some(err.to_string());

        Self {
            outcome,
            fatal: err.is_fatal().then_some(err),
        }
    }
}

fn read_daily_records(
    archive_path: &Path,
    file_name: &str,
    station_id: &str,
) -> Result<Vec<DailyRecord>> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let (daily, stats) = Parser::parse_archive(&mut archive, file_name, station_id)?;

    info!(
        "Parsed {}: {} rows, {} successful, {} failures, {} missing rainfall",
        file_name,
        stats.total_rows,
        stats.parsed_successfully,
        stats.parse_failures,
        stats.missing_rainfall
    );

    Ok(daily)
}

/// Rename, falling back to copy and remove when rename is not possible
/// (for example across filesystems).
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Err(rename_err) = std::fs::rename(from, to) {
        warn!(
            "Rename of {} failed ({}), copying instead",
            from.display(),
            rename_err
        );
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}
