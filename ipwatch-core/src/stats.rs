use std::path::{Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::sqlite::configure_connection;

const STATS_SCHEMA: &str = include_str!("../../sql/stats.sql");

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("failed to open stats database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on stats database: {0}")]
    Execute(#[from] rusqlite::Error),
}

pub type StatsResult<T> = Result<T, StatsError>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct HourlyStats {
    pub hour_key: String,
    pub analyses: i64,
    pub infringements: i64,
    pub total_cost: f64,
    pub total_processing_seconds: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemStats {
    pub total_analyzed: i64,
    pub total_infringements: i64,
}

/// Write-only counter aggregates. Every mutation is an atomic increment;
/// nothing on the hot path ever reads these rows.
#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl StatsStore {
    pub fn new(path: impl AsRef<Path>) -> StatsResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        })
    }

    fn open(&self) -> StatsResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StatsError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StatsError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StatsResult<()> {
        let conn = self.open()?;
        conn.execute_batch(STATS_SCHEMA)?;
        Ok(())
    }

    pub fn hour_key(at: DateTime<Utc>) -> String {
        at.with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at)
            .format("%Y-%m-%d_%H")
            .to_string()
    }

    /// Increment (or decrement) hourly counters for the hour containing `at`.
    pub fn bump_hourly(
        &self,
        at: DateTime<Utc>,
        analyses: i64,
        infringements: i64,
        cost: f64,
        processing_seconds: f64,
    ) -> StatsResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO hourly_stats (hour_key, analyses, infringements, total_cost,
                                       total_processing_seconds, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(hour_key) DO UPDATE SET
                 analyses = hourly_stats.analyses + ?2,
                 infringements = hourly_stats.infringements + ?3,
                 total_cost = hourly_stats.total_cost + ?4,
                 total_processing_seconds = hourly_stats.total_processing_seconds + ?5,
                 updated_at = ?6",
            params![
                Self::hour_key(at),
                analyses,
                infringements,
                cost,
                processing_seconds,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Increment global counters; `infringements` may be negative on a flip.
    pub fn bump_system(&self, analyzed: i64, infringements: i64) -> StatsResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO system_stats (id, total_analyzed, total_infringements, updated_at)
             VALUES ('global', ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 total_analyzed = system_stats.total_analyzed + ?1,
                 total_infringements = system_stats.total_infringements + ?2,
                 updated_at = ?3",
            params![analyzed, infringements, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn hourly(&self, at: DateTime<Utc>) -> StatsResult<Option<HourlyStats>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT hour_key, analyses, infringements, total_cost, total_processing_seconds
             FROM hourly_stats WHERE hour_key = ?1",
        )?;
        let stats = stmt
            .query_row([Self::hour_key(at)], |row| {
                Ok(HourlyStats {
                    hour_key: row.get(0)?,
                    analyses: row.get(1)?,
                    infringements: row.get(2)?,
                    total_cost: row.get(3)?,
                    total_processing_seconds: row.get(4)?,
                })
            })
            .optional()?;
        Ok(stats)
    }

    pub fn system(&self) -> StatsResult<SystemStats> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT total_analyzed, total_infringements FROM system_stats WHERE id = 'global'",
        )?;
        let stats = stmt
            .query_row([], |row| {
                Ok(SystemStats {
                    total_analyzed: row.get(0)?,
                    total_infringements: row.get(1)?,
                })
            })
            .optional()?;
        Ok(stats.unwrap_or_default())
    }
}
