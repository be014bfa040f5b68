use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sqlite::configure_connection;
use crate::video::{VideoError, VideoStore};

const SCANS_SCHEMA: &str = include_str!("../../../sql/scans.sql");

#[derive(Debug, Error)]
pub enum ScanHistoryError {
    #[error("failed to open scan-history database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on scan-history database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("invalid scan status: {0}")]
    InvalidStatus(String),
    #[error("video store error: {0}")]
    Video(#[from] VideoError),
}

pub type ScanHistoryResult<T> = Result<T, ScanHistoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = ScanHistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ScanHistoryError::InvalidStatus(other.to_string())),
        }
    }
}

/// One dispatched analysis attempt. The authoritative operator-facing record
/// of what happened to a scan.
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub scan_id: String,
    pub video_id: Option<String>,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
}

impl ScanRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            scan_id: row.get("scan_id")?,
            video_id: row.get("video_id")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(ScanStatus::Failed),
            started_at: parse_ts(row.get("started_at")?).unwrap_or_else(Utc::now),
            completed_at: parse_ts(row.get("completed_at")?),
            error_message: row.get("error_message")?,
            error_kind: row.get("error_kind")?,
        })
    }
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone)]
pub struct ScanHistoryStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl ScanHistoryStore {
    pub fn new(path: impl AsRef<Path>) -> ScanHistoryResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        })
    }

    fn open(&self) -> ScanHistoryResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            ScanHistoryError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| ScanHistoryError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> ScanHistoryResult<()> {
        let conn = self.open()?;
        conn.execute_batch(SCANS_SCHEMA)?;
        Ok(())
    }

    pub fn open_scan(
        &self,
        scan_id: &str,
        video_id: &str,
        now: DateTime<Utc>,
    ) -> ScanHistoryResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO scan_history (scan_id, video_id, status, started_at)
             VALUES (?1, ?2, 'running', ?3)",
            params![scan_id, video_id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn close_scan(
        &self,
        scan_id: &str,
        status: ScanStatus,
        error_message: Option<&str>,
        error_kind: Option<&str>,
    ) -> ScanHistoryResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE scan_history
             SET status = ?2, completed_at = ?3, error_message = ?4, error_kind = ?5
             WHERE scan_id = ?1",
            params![
                scan_id,
                status.as_str(),
                Utc::now().to_rfc3339(),
                error_message,
                error_kind
            ],
        )?;
        Ok(())
    }

    pub fn fetch(&self, scan_id: &str) -> ScanHistoryResult<Option<ScanRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM scan_history WHERE scan_id = ?1")?;
        let record = stmt
            .query_row([scan_id], |row| ScanRecord::from_row(row))
            .optional()?;
        Ok(record)
    }

    pub fn list_running(&self) -> ScanHistoryResult<Vec<ScanRecord>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT * FROM scan_history WHERE status = 'running' ORDER BY started_at")?;
        let rows = stmt
            .query_map([], |row| ScanRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub scans_failed: usize,
    pub videos_reset: usize,
    pub skipped: usize,
}

/// Startup recovery sweep.
///
/// Any `running` scan record at startup is the residue of a killed instance:
/// the record is marked failed and, when the referenced video is still
/// `processing`, the video returns to `discovered`. Safe to run on every
/// worker, every start; a second sweep finds nothing.
pub fn recover_interrupted_scans(
    scans: &ScanHistoryStore,
    videos: &VideoStore,
) -> ScanHistoryResult<RecoveryReport> {
    let running = scans.list_running()?;
    if running.is_empty() {
        info!("no interrupted scans to recover");
        return Ok(RecoveryReport::default());
    }

    info!(count = running.len(), "recovering interrupted scans");
    let mut report = RecoveryReport::default();

    for record in running {
        let Some(video_id) = record.video_id.clone() else {
            debug!(scan_id = %record.scan_id, "scan record without video id, skipping");
            report.skipped += 1;
            continue;
        };

        if let Err(err) = scans.close_scan(
            &record.scan_id,
            ScanStatus::Failed,
            Some("Instance terminated during processing"),
            Some("instance_terminated"),
        ) {
            // One bad record must not block the rest of the sweep.
            warn!(scan_id = %record.scan_id, error = %err, "failed to close scan record");
            continue;
        }
        report.scans_failed += 1;

        match videos.reset_to_discovered(&video_id, "Reset from incomplete scan") {
            Ok(true) => {
                report.videos_reset += 1;
                debug!(video_id = %video_id, "video reset to discovered");
            }
            Ok(false) => {
                // Missing or already past processing; nothing to undo.
                debug!(video_id = %video_id, "video not in processing, left untouched");
            }
            Err(err) => {
                warn!(video_id = %video_id, error = %err, "failed to reset video");
            }
        }
    }

    info!(
        scans_failed = report.scans_failed,
        videos_reset = report.videos_reset,
        skipped = report.skipped,
        "recovery sweep complete"
    );
    Ok(report)
}
