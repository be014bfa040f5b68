use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sqlite::configure_connection;

const VIDEO_SCHEMA: &str = include_str!("../../sql/videos.sql");

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("failed to open video database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on video database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("video store path not configured")]
    MissingStore,
    #[error("invalid video status: {0}")]
    InvalidStatus(String),
    #[error("invalid priority tier: {0}")]
    InvalidTier(String),
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type VideoResult<T> = Result<T, VideoError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoStatus {
    Discovered,
    Processing,
    Analyzed,
    Failed,
    SkippedLowPriority,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Discovered => "discovered",
            VideoStatus::Processing => "processing",
            VideoStatus::Analyzed => "analyzed",
            VideoStatus::Failed => "failed",
            VideoStatus::SkippedLowPriority => "skipped_low_priority",
        }
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VideoStatus {
    type Err = VideoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "processing" => Ok(Self::Processing),
            "analyzed" => Ok(Self::Analyzed),
            "failed" => Ok(Self::Failed),
            "skipped_low_priority" => Ok(Self::SkippedLowPriority),
            other => Err(VideoError::InvalidStatus(other.to_string())),
        }
    }
}

/// Ordinal bucket derived from the combined scan priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityTier {
    Critical,
    High,
    Medium,
    Low,
    VeryLow,
}

impl PriorityTier {
    /// Pure mapping from scan priority to tier.
    pub fn from_priority(scan_priority: u8) -> Self {
        match scan_priority {
            90..=u8::MAX => PriorityTier::Critical,
            70..=89 => PriorityTier::High,
            50..=69 => PriorityTier::Medium,
            30..=49 => PriorityTier::Low,
            _ => PriorityTier::VeryLow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::Critical => "CRITICAL",
            PriorityTier::High => "HIGH",
            PriorityTier::Medium => "MEDIUM",
            PriorityTier::Low => "LOW",
            PriorityTier::VeryLow => "VERY_LOW",
        }
    }

    /// FPS multiplier applied by the scan-config calculator.
    pub fn fps_multiplier(&self) -> f64 {
        match self {
            PriorityTier::Critical => 2.0,
            PriorityTier::High => 1.5,
            PriorityTier::Medium => 1.0,
            PriorityTier::Low => 0.75,
            PriorityTier::VeryLow => 0.5,
        }
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PriorityTier {
    type Err = VideoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL" => Ok(Self::Critical),
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            "VERY_LOW" => Ok(Self::VeryLow),
            other => Err(VideoError::InvalidTier(other.to_string())),
        }
    }
}

/// Summary of the latest vision analysis, stored as JSON on the video row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub analyzed_at: DateTime<Utc>,
    pub model: String,
    pub contains_infringement: bool,
    pub overall_recommendation: String,
    pub max_likelihood: u8,
    pub overall_notes: String,
    pub ip_results: serde_json::Value,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct Video {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub thumbnail_url: Option<String>,
    pub matched_ips: Vec<String>,
    pub status: VideoStatus,
    pub initial_risk: u8,
    pub current_risk: u8,
    pub video_risk: u8,
    pub channel_risk: u8,
    pub scan_priority: u8,
    pub priority_tier: PriorityTier,
    pub scan_count: i64,
    pub view_velocity: f64,
    pub discovered_at: Option<DateTime<Utc>>,
    pub vision_triggered_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub last_risk_update: Option<DateTime<Utc>>,
    pub analysis: Option<AnalysisSummary>,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub deleted: bool,
}

impl Video {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tags: String = row.get("tags")?;
        let matched: String = row.get("matched_ips")?;
        let analysis: Option<String> = row.get("analysis_json")?;
        Ok(Self {
            video_id: row.get("video_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            channel_id: row.get("channel_id")?,
            channel_title: row.get("channel_title")?,
            published_at: parse_timestamp(row.get("published_at")?),
            duration_seconds: row.get("duration_seconds")?,
            view_count: row.get("view_count")?,
            like_count: row.get("like_count")?,
            comment_count: row.get("comment_count")?,
            thumbnail_url: row.get("thumbnail_url")?,
            matched_ips: serde_json::from_str(&matched).unwrap_or_default(),
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(VideoStatus::Discovered),
            initial_risk: row.get::<_, i64>("initial_risk")? as u8,
            current_risk: row.get::<_, i64>("current_risk")? as u8,
            video_risk: row.get::<_, i64>("video_risk")? as u8,
            channel_risk: row.get::<_, i64>("channel_risk")? as u8,
            scan_priority: row.get::<_, i64>("scan_priority")? as u8,
            priority_tier: row
                .get::<_, String>("priority_tier")?
                .parse()
                .unwrap_or(PriorityTier::VeryLow),
            scan_count: row.get("scan_count")?,
            view_velocity: row.get("view_velocity")?,
            discovered_at: parse_timestamp(row.get("discovered_at")?),
            vision_triggered_at: parse_timestamp(row.get("vision_triggered_at")?),
            processing_started_at: parse_timestamp(row.get("processing_started_at")?),
            last_analyzed_at: parse_timestamp(row.get("last_analyzed_at")?),
            last_risk_update: parse_timestamp(row.get("last_risk_update")?),
            analysis: analysis.and_then(|raw| serde_json::from_str(&raw).ok()),
            error_message: row.get("error_message")?,
            error_kind: row.get("error_kind")?,
            deleted: row.get::<_, i64>("deleted")? != 0,
        })
    }

    pub fn engagement_rate(&self) -> f64 {
        if self.view_count == 0 {
            return 0.0;
        }
        (self.like_count + self.comment_count) as f64 / self.view_count as f64
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.published_at.map(|published| (now - published).num_days())
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn format_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.to_rfc3339())
}

#[derive(Debug, Clone)]
pub struct VideoStoreBuilder {
    path: Option<PathBuf>,
    create_if_missing: bool,
}

impl Default for VideoStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
        }
    }
}

impl VideoStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> VideoResult<VideoStore> {
        let path = self.path.ok_or(VideoError::MissingStore)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE;
        if self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(VideoStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct VideoStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl VideoStore {
    pub fn builder() -> VideoStoreBuilder {
        VideoStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> VideoResult<Self> {
        VideoStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> VideoResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            VideoError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| VideoError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute_batch(VIDEO_SCHEMA)?;
        Ok(())
    }

    pub fn upsert(&self, video: &Video) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO videos (
                video_id, title, description, tags, channel_id, channel_title,
                published_at, duration_seconds, view_count, like_count, comment_count,
                thumbnail_url, matched_ips, status, initial_risk, current_risk,
                video_risk, channel_risk, scan_priority, priority_tier, scan_count,
                view_velocity, discovered_at, vision_triggered_at, processing_started_at,
                last_analyzed_at, last_risk_update, analysis_json, error_message,
                error_kind, deleted, updated_at
            ) VALUES (
                :video_id, :title, :description, :tags, :channel_id, :channel_title,
                :published_at, :duration_seconds, :view_count, :like_count, :comment_count,
                :thumbnail_url, :matched_ips, :status, :initial_risk, :current_risk,
                :video_risk, :channel_risk, :scan_priority, :priority_tier, :scan_count,
                :view_velocity, :discovered_at, :vision_triggered_at, :processing_started_at,
                :last_analyzed_at, :last_risk_update, :analysis_json, :error_message,
                :error_kind, :deleted, :updated_at
            )
            ON CONFLICT(video_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                tags = excluded.tags,
                channel_id = excluded.channel_id,
                channel_title = excluded.channel_title,
                published_at = excluded.published_at,
                duration_seconds = excluded.duration_seconds,
                view_count = excluded.view_count,
                like_count = excluded.like_count,
                comment_count = excluded.comment_count,
                thumbnail_url = excluded.thumbnail_url,
                matched_ips = excluded.matched_ips,
                status = excluded.status,
                initial_risk = excluded.initial_risk,
                current_risk = excluded.current_risk,
                video_risk = excluded.video_risk,
                channel_risk = excluded.channel_risk,
                scan_priority = excluded.scan_priority,
                priority_tier = excluded.priority_tier,
                scan_count = excluded.scan_count,
                view_velocity = excluded.view_velocity,
                discovered_at = excluded.discovered_at,
                vision_triggered_at = excluded.vision_triggered_at,
                processing_started_at = excluded.processing_started_at,
                last_analyzed_at = excluded.last_analyzed_at,
                last_risk_update = excluded.last_risk_update,
                analysis_json = excluded.analysis_json,
                error_message = excluded.error_message,
                error_kind = excluded.error_kind,
                deleted = excluded.deleted,
                updated_at = excluded.updated_at",
            params![
                &video.video_id,
                &video.title,
                &video.description,
                serde_json::to_string(&video.tags)?,
                &video.channel_id,
                &video.channel_title,
                format_timestamp(video.published_at),
                video.duration_seconds,
                video.view_count,
                video.like_count,
                video.comment_count,
                &video.thumbnail_url,
                serde_json::to_string(&video.matched_ips)?,
                video.status.as_str(),
                video.initial_risk as i64,
                video.current_risk as i64,
                video.video_risk as i64,
                video.channel_risk as i64,
                video.scan_priority as i64,
                video.priority_tier.as_str(),
                video.scan_count,
                video.view_velocity,
                format_timestamp(video.discovered_at),
                format_timestamp(video.vision_triggered_at),
                format_timestamp(video.processing_started_at),
                format_timestamp(video.last_analyzed_at),
                format_timestamp(video.last_risk_update),
                video
                    .analysis
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                &video.error_message,
                &video.error_kind,
                if video.deleted { 1 } else { 0 },
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn fetch(&self, video_id: &str) -> VideoResult<Option<Video>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM videos WHERE video_id = ?1")?;
        let video = stmt
            .query_row([video_id], |row| Video::from_row(row))
            .optional()?;
        Ok(video)
    }

    /// Top unscanned videos, the dispatch order of the whole system:
    /// descending scan priority, tier precedence as the tie-break.
    pub fn top_unscanned(&self, limit: usize, min_priority: u8) -> VideoResult<Vec<Video>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM videos
             WHERE status = 'discovered' AND deleted = 0 AND scan_priority >= ?1
             ORDER BY scan_priority DESC,
                      CASE priority_tier
                          WHEN 'CRITICAL' THEN 0
                          WHEN 'HIGH' THEN 1
                          WHEN 'MEDIUM' THEN 2
                          WHEN 'LOW' THEN 3
                          ELSE 4
                      END ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![min_priority as i64, limit as i64], |row| {
                Video::from_row(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_status(&self, video_id: &str, status: VideoStatus) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos SET status = ?2, updated_at = ?3 WHERE video_id = ?1",
            params![video_id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Claim a video for analysis. Returns false when another worker already
    /// owns it (status is no longer `discovered`).
    pub fn begin_processing(&self, video_id: &str, now: DateTime<Utc>) -> VideoResult<bool> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE videos
             SET status = 'processing', processing_started_at = ?2, updated_at = ?2
             WHERE video_id = ?1 AND status = 'discovered'",
            params![video_id, now.to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    pub fn mark_failed(
        &self,
        video_id: &str,
        message: &str,
        kind: &str,
    ) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos
             SET status = 'failed', error_message = ?2, error_kind = ?3, updated_at = ?4
             WHERE video_id = ?1",
            params![video_id, message, kind, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn mark_skipped_low_priority(&self, video_id: &str, reason: &str) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos
             SET status = 'skipped_low_priority', error_message = ?2, updated_at = ?3
             WHERE video_id = ?1",
            params![video_id, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Startup-recovery reset: only touches videos still stuck in `processing`.
    pub fn reset_to_discovered(&self, video_id: &str, reason: &str) -> VideoResult<bool> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE videos
             SET status = 'discovered', processing_started_at = NULL,
                 error_message = ?2, updated_at = ?3
             WHERE video_id = ?1 AND status = 'processing'",
            params![video_id, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    pub fn set_vision_triggered(
        &self,
        video_id: &str,
        matched_ips: &[String],
        now: DateTime<Utc>,
    ) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos
             SET vision_triggered_at = ?2, matched_ips = ?3, updated_at = ?2
             WHERE video_id = ?1",
            params![video_id, now.to_rfc3339(), serde_json::to_string(matched_ips)?],
        )?;
        Ok(())
    }

    pub fn merge_matched_ips(&self, video_id: &str, new_ips: &[String]) -> VideoResult<usize> {
        let Some(video) = self.fetch(video_id)? else {
            return Err(VideoError::NotFound(video_id.to_string()));
        };
        let mut merged = video.matched_ips.clone();
        let mut added = 0;
        for ip in new_ips {
            if !merged.contains(ip) {
                merged.push(ip.clone());
                added += 1;
            }
        }
        if added > 0 {
            let conn = self.open()?;
            conn.execute(
                "UPDATE videos SET matched_ips = ?2, updated_at = ?3 WHERE video_id = ?1",
                params![
                    video_id,
                    serde_json::to_string(&merged)?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(added)
    }

    pub fn update_statistics(
        &self,
        video_id: &str,
        view_count: i64,
        like_count: i64,
        comment_count: i64,
    ) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos
             SET view_count = ?2, like_count = ?3, comment_count = ?4, updated_at = ?5
             WHERE video_id = ?1",
            params![
                video_id,
                view_count,
                like_count,
                comment_count,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn update_risk(
        &self,
        video_id: &str,
        video_risk: u8,
        channel_risk: u8,
        current_risk: u8,
        scan_priority: u8,
        tier: PriorityTier,
        now: DateTime<Utc>,
    ) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos
             SET video_risk = ?2, channel_risk = ?3, current_risk = ?4,
                 scan_priority = ?5, priority_tier = ?6, last_risk_update = ?7,
                 updated_at = ?7
             WHERE video_id = ?1",
            params![
                video_id,
                video_risk as i64,
                channel_risk as i64,
                current_risk as i64,
                scan_priority as i64,
                tier.as_str(),
                now.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn update_view_velocity(&self, video_id: &str, velocity: f64) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos SET view_velocity = ?2, updated_at = ?3 WHERE video_id = ?1",
            params![video_id, velocity, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Write a completed analysis: summary payload, analyzed status, and the
    /// successful-scan counter in one statement.
    pub fn write_analysis(
        &self,
        video_id: &str,
        summary: &AnalysisSummary,
    ) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos
             SET analysis_json = ?2, status = 'analyzed', last_analyzed_at = ?3,
                 scan_count = scan_count + 1, error_message = NULL, error_kind = NULL,
                 updated_at = ?3
             WHERE video_id = ?1",
            params![
                video_id,
                serde_json::to_string(summary)?,
                summary.analyzed_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn count_by_status(&self) -> VideoResult<HashMap<String, usize>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM videos GROUP BY status")?;
        let mut map = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            map.insert(status, count as usize);
        }
        Ok(map)
    }

    /// Per-channel video counts, most active first. Feeds the channel-scan
    /// reservation in the search planner.
    pub fn channel_video_counts(&self) -> VideoResult<Vec<(String, i64)>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT channel_id, COUNT(*) AS n FROM videos
             WHERE channel_id <> '' AND deleted = 0
             GROUP BY channel_id
             ORDER BY n DESC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Cascade from an IP-config soft delete.
    pub fn soft_delete_by_ip(&self, ip_id: &str) -> VideoResult<usize> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE videos SET deleted = 1, updated_at = ?2
             WHERE matched_ips LIKE '%\"' || ?1 || '\"%'",
            params![ip_id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed)
    }

    pub fn record_view_snapshot(
        &self,
        video_id: &str,
        view_count: i64,
        taken_at: DateTime<Utc>,
    ) -> VideoResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO view_snapshots (video_id, taken_at, view_count)
             VALUES (?1, ?2, ?3)",
            params![video_id, taken_at.to_rfc3339(), view_count],
        )?;
        Ok(())
    }

    /// Newest-first snapshots for one video.
    pub fn latest_snapshots(
        &self,
        video_id: &str,
        limit: usize,
    ) -> VideoResult<Vec<(DateTime<Utc>, i64)>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT taken_at, view_count FROM view_snapshots
             WHERE video_id = ?1 ORDER BY taken_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![video_id, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(raw, count)| {
                DateTime::parse_from_rfc3339(&raw)
                    .ok()
                    .map(|dt| (dt.with_timezone(&Utc), count))
            })
            .collect())
    }

    pub fn list_by_status(&self, status: VideoStatus, limit: usize) -> VideoResult<Vec<Video>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM videos WHERE status = ?1 ORDER BY updated_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status.as_str(), limit as i64], |row| {
                Video::from_row(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
