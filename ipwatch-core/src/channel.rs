use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use thiserror::Error;

use crate::sqlite::configure_connection;

const CHANNEL_SCHEMA: &str = include_str!("../../sql/channels.sql");

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to open channel database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on channel database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("channel store path not configured")]
    MissingStore,
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Per-uploader reputation rollup. All counters are derived views over the
/// video store; the video store stays the source of truth.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub channel_id: String,
    pub title: String,
    pub total_videos_found: i64,
    pub total_views: i64,
    pub videos_scanned: i64,
    pub confirmed_infringements: i64,
    pub videos_cleared: i64,
    pub infringing_videos_count: i64,
    pub total_infringing_views: i64,
    pub subscriber_count: i64,
    pub channel_risk: u8,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub last_infringement_at: Option<DateTime<Utc>>,
}

impl Channel {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            channel_id: row.get("channel_id")?,
            title: row.get("title")?,
            total_videos_found: row.get("total_videos_found")?,
            total_views: row.get("total_views")?,
            videos_scanned: row.get("videos_scanned")?,
            confirmed_infringements: row.get("confirmed_infringements")?,
            videos_cleared: row.get("videos_cleared")?,
            infringing_videos_count: row.get("infringing_videos_count")?,
            total_infringing_views: row.get("total_infringing_views")?,
            subscriber_count: row.get("subscriber_count")?,
            channel_risk: row.get::<_, i64>("channel_risk")? as u8,
            first_seen_at: parse_ts(row.get("first_seen_at")?),
            last_scanned_at: parse_ts(row.get("last_scanned_at")?),
            last_infringement_at: parse_ts(row.get("last_infringement_at")?),
        })
    }

    pub fn infringement_rate(&self) -> f64 {
        if self.videos_scanned == 0 {
            return 0.0;
        }
        self.confirmed_infringements as f64 / self.videos_scanned as f64
    }
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// What the result processor applies after an analysis, expressed as counter
/// deltas so the store update stays a single atomic statement per field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStatDelta {
    pub videos_scanned: i64,
    pub confirmed_infringements: i64,
    pub videos_cleared: i64,
    pub infringing_videos_count: i64,
    pub total_infringing_views: i64,
}

#[derive(Debug, Clone)]
pub struct ChannelStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl ChannelStore {
    pub fn new(path: impl AsRef<Path>) -> ChannelResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        })
    }

    fn open(&self) -> ChannelResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            ChannelError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| ChannelError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> ChannelResult<()> {
        let conn = self.open()?;
        conn.execute_batch(CHANNEL_SCHEMA)?;
        Ok(())
    }

    pub fn fetch(&self, channel_id: &str) -> ChannelResult<Option<Channel>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM channels WHERE channel_id = ?1")?;
        let channel = stmt
            .query_row([channel_id], |row| Channel::from_row(row))
            .optional()?;
        Ok(channel)
    }

    /// Discovery-side rollup bump: one found video, its view count, and the
    /// channel title if we did not know it yet.
    pub fn record_video_found(
        &self,
        channel_id: &str,
        title: &str,
        view_count: i64,
        now: DateTime<Utc>,
    ) -> ChannelResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO channels (channel_id, title, total_videos_found, total_views,
                                   first_seen_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4, ?4)
             ON CONFLICT(channel_id) DO UPDATE SET
                 title = CASE WHEN channels.title = '' THEN excluded.title ELSE channels.title END,
                 total_videos_found = channels.total_videos_found + 1,
                 total_views = channels.total_views + excluded.total_views,
                 updated_at = excluded.updated_at",
            params![channel_id, title, view_count, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_subscriber_count(&self, channel_id: &str, count: i64) -> ChannelResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE channels SET subscriber_count = ?2, updated_at = ?3 WHERE channel_id = ?1",
            params![channel_id, count, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_channel_risk(&self, channel_id: &str, risk: u8) -> ChannelResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE channels SET channel_risk = ?2, updated_at = ?3 WHERE channel_id = ?1",
            params![channel_id, risk as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Apply a scan-stat delta. Each field is an independent atomic
    /// increment; the caller (result processor) has already read prior state
    /// under the single-owner invariant.
    pub fn apply_scan_delta(
        &self,
        channel_id: &str,
        delta: ScanStatDelta,
        infringement_now: bool,
        now: DateTime<Utc>,
    ) -> ChannelResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO channels (channel_id, videos_scanned, confirmed_infringements,
                                   videos_cleared, infringing_videos_count,
                                   total_infringing_views, last_scanned_at,
                                   last_infringement_at, first_seen_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?7, ?7)
             ON CONFLICT(channel_id) DO UPDATE SET
                 videos_scanned = channels.videos_scanned + ?2,
                 confirmed_infringements = channels.confirmed_infringements + ?3,
                 videos_cleared = channels.videos_cleared + ?4,
                 infringing_videos_count = channels.infringing_videos_count + ?5,
                 total_infringing_views = channels.total_infringing_views + ?6,
                 last_scanned_at = ?7,
                 last_infringement_at = COALESCE(?8, channels.last_infringement_at),
                 updated_at = ?7",
            params![
                channel_id,
                delta.videos_scanned,
                delta.confirmed_infringements,
                delta.videos_cleared,
                delta.infringing_videos_count,
                delta.total_infringing_views,
                now.to_rfc3339(),
                if infringement_now {
                    Some(now.to_rfc3339())
                } else {
                    None
                },
            ],
        )?;
        Ok(())
    }

    pub fn high_risk(&self, min_risk: u8, limit: usize) -> ChannelResult<Vec<Channel>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM channels WHERE channel_risk >= ?1
             ORDER BY channel_risk DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![min_risk as i64, limit as i64], |row| {
                Channel::from_row(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
