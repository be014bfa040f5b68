use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sqlite::configure_connection;
use crate::video::PriorityTier;

const EVENTS_SCHEMA: &str = include_str!("../../sql/events.sql");

pub const TOPIC_VIDEO_DISCOVERED: &str = "video-discovered";
pub const TOPIC_SCAN_READY: &str = "scan-ready";
pub const TOPIC_VISION_FEEDBACK: &str = "vision-feedback";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to open event database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on event database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type EventResult<T> = Result<T, EventError>;

/// Metadata snapshot carried by discovery and scan messages. Everything the
/// dispatcher needs to build a prompt without re-reading the video store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEnvelope {
    pub video_id: String,
    pub url: String,
    pub title: String,
    pub duration_seconds: i64,
    pub view_count: i64,
    pub channel_id: String,
    pub channel_title: String,
    pub risk_score: u8,
    pub risk_tier: PriorityTier,
    pub matched_ips: Vec<String>,
    pub discovered_at: DateTime<Utc>,
    pub scan_priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMessage {
    pub video_id: String,
    pub priority: u8,
    pub metadata: VideoEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackMessage {
    pub video_id: String,
    pub channel_id: String,
    pub contains_infringement: bool,
    pub confidence_score: u8,
    pub infringement_type: String,
    pub characters_found: Vec<String>,
    pub analysis_cost_usd: f64,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: i64,
    pub topic: String,
    pub payload: String,
    pub published_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> EventResult<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Durable single-node event queue. Consumers poll a topic and ack each
/// record; redelivery after a crash is expected and handled by the
/// single-owner status checks on the consuming side.
#[derive(Debug, Clone)]
pub struct EventQueue {
    path: PathBuf,
    flags: OpenFlags,
}

impl EventQueue {
    pub fn new(path: impl AsRef<Path>) -> EventResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        })
    }

    fn open(&self) -> EventResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            EventError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| EventError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> EventResult<()> {
        let conn = self.open()?;
        conn.execute_batch(EVENTS_SCHEMA)?;
        Ok(())
    }

    pub fn publish_json<T: Serialize>(&self, topic: &str, message: &T) -> EventResult<i64> {
        self.publish_raw(topic, serde_json::to_string(message)?)
    }

    pub fn publish_raw(&self, topic: &str, payload: String) -> EventResult<i64> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO events (topic, payload, published_at) VALUES (?1, ?2, ?3)",
            params![topic, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn poll(&self, topic: &str, limit: usize) -> EventResult<Vec<EventRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, topic, payload, published_at FROM events
             WHERE topic = ?1 AND acked = 0
             ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![topic, limit as i64], |row| {
                Ok(EventRecord {
                    id: row.get(0)?,
                    topic: row.get(1)?,
                    payload: row.get(2)?,
                    published_at: row
                        .get::<_, String>(3)?
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn ack(&self, id: i64) -> EventResult<()> {
        let conn = self.open()?;
        conn.execute("UPDATE events SET acked = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn pending(&self, topic: &str) -> EventResult<usize> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE topic = ?1 AND acked = 0",
            params![topic],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
