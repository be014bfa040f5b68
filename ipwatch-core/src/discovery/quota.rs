use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sqlite::configure_connection;

const LEDGER_SCHEMA: &str = include_str!("../../../sql/ledgers.sql");

/// The external search API resets its quota at midnight Pacific. A fixed
/// UTC-8 offset keeps the ledger key aligned with that boundary without
/// splitting any day into two keys.
const PACIFIC_OFFSET_SECONDS: i32 = -8 * 3600;

const WARNING_THRESHOLD: f64 = 0.80;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("failed to open quota ledger {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on quota ledger: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("unknown quota operation: {0}")]
    UnknownOperation(String),
}

pub type QuotaResult<T> = Result<T, QuotaError>;

/// Search-API operations and their unit costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaOp {
    Search,
    VideoDetails,
    ChannelDetails,
    PlaylistItems,
}

impl QuotaOp {
    pub fn cost(&self) -> u32 {
        match self {
            QuotaOp::Search => 100,
            QuotaOp::VideoDetails => 1,
            QuotaOp::ChannelDetails => 1,
            QuotaOp::PlaylistItems => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaOp::Search => "search",
            QuotaOp::VideoDetails => "video_details",
            QuotaOp::ChannelDetails => "channel_details",
            QuotaOp::PlaylistItems => "playlist_items",
        }
    }
}

impl std::str::FromStr for QuotaOp {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(Self::Search),
            "video_details" => Ok(Self::VideoDetails),
            "channel_details" => Ok(Self::ChannelDetails),
            "playlist_items" => Ok(Self::PlaylistItems),
            other => Err(QuotaError::UnknownOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub date: String,
    pub used: u32,
    pub remaining: u32,
    pub daily_quota: u32,
    pub utilization: f64,
}

/// Daily search-quota ledger, shared across instances via atomic increments
/// on the date-keyed row. Rollover is implicit: a new Pacific date is a new
/// row.
#[derive(Debug)]
pub struct QuotaManager {
    path: PathBuf,
    flags: OpenFlags,
    daily_quota: u32,
    warned_for: Mutex<Option<String>>,
}

impl QuotaManager {
    pub fn new(path: impl AsRef<Path>, daily_quota: u32) -> QuotaResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            daily_quota,
            warned_for: Mutex::new(None),
        })
    }

    fn open(&self) -> QuotaResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            QuotaError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| QuotaError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> QuotaResult<()> {
        let conn = self.open()?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(())
    }

    pub fn day_key(now: DateTime<Utc>) -> String {
        match FixedOffset::east_opt(PACIFIC_OFFSET_SECONDS) {
            Some(offset) => now.with_timezone(&offset).format("%Y-%m-%d").to_string(),
            None => now.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn used_today(&self) -> QuotaResult<u32> {
        let conn = self.open()?;
        let used: Option<i64> = conn
            .query_row(
                "SELECT units_used FROM quota_usage WHERE day_key = ?1",
                params![Self::day_key(Utc::now())],
                |row| row.get(0),
            )
            .optional()?;
        Ok(used.unwrap_or(0) as u32)
    }

    pub fn can_afford(&self, op: QuotaOp, count: u32) -> QuotaResult<bool> {
        let cost = op.cost() * count;
        let used = self.used_today()?;
        let affordable = used + cost <= self.daily_quota;
        if !affordable {
            debug!(
                op = op.as_str(),
                cost,
                used,
                daily_quota = self.daily_quota,
                "quota check failed"
            );
        }
        Ok(affordable)
    }

    pub fn record_usage(&self, op: QuotaOp, count: u32) -> QuotaResult<u32> {
        let cost = op.cost() * count;
        let day_key = Self::day_key(Utc::now());
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO quota_usage (day_key, units_used, daily_quota, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(day_key) DO UPDATE SET
                 units_used = quota_usage.units_used + ?2,
                 daily_quota = ?3,
                 updated_at = ?4",
            params![
                day_key,
                cost as i64,
                self.daily_quota as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        let used = self.used_today()?;

        let utilization = self.utilization_of(used);
        if utilization >= WARNING_THRESHOLD {
            let mut warned = self.warned_for.lock().unwrap_or_else(|e| e.into_inner());
            if warned.as_deref() != Some(day_key.as_str()) {
                warn!(
                    used,
                    daily_quota = self.daily_quota,
                    utilization = %format!("{:.1}%", utilization * 100.0),
                    "quota utilization above warning threshold"
                );
                *warned = Some(day_key);
            }
        }
        Ok(used)
    }

    pub fn remaining(&self) -> QuotaResult<u32> {
        let used = self.used_today()?;
        Ok(self.daily_quota.saturating_sub(used))
    }

    pub fn utilization(&self) -> QuotaResult<f64> {
        Ok(self.utilization_of(self.used_today()?))
    }

    fn utilization_of(&self, used: u32) -> f64 {
        if self.daily_quota == 0 {
            return 0.0;
        }
        (used as f64 / self.daily_quota as f64).min(1.0)
    }

    pub fn status(&self) -> QuotaResult<QuotaStatus> {
        let used = self.used_today()?;
        Ok(QuotaStatus {
            date: Self::day_key(Utc::now()),
            used,
            remaining: self.daily_quota.saturating_sub(used),
            daily_quota: self.daily_quota,
            utilization: self.utilization_of(used) * 100.0,
        })
    }
}
