use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};

use crate::discovery::search::{SearchOrdering, TimeWindow};
use crate::discovery::DiscoveryStats;
use crate::sqlite::configure_connection;

const HISTORY_SCHEMA: &str = include_str!("../../../sql/history.sql");

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to open history database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on history database: {0}")]
    Execute(#[from] rusqlite::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Debug, Clone)]
pub struct RecordedSearch {
    pub keyword: String,
    pub ordering: SearchOrdering,
    pub results_count: i64,
    pub searched_at: DateTime<Utc>,
    pub window: Option<TimeWindow>,
}

#[derive(Debug, Clone)]
pub struct KeywordOutcome {
    pub keyword: String,
    pub new_videos: i64,
    pub rediscovered: i64,
    pub skipped: i64,
    pub efficiency_pct: f64,
    pub tier: u8,
    pub cooldown_days: i64,
}

/// Append-only search history plus the keyword tier ledger and channel-scan
/// tracking. One store, one database file.
#[derive(Debug, Clone)]
pub struct SearchHistoryStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SearchHistoryStore {
    pub fn new(path: impl AsRef<Path>) -> HistoryResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        })
    }

    fn open(&self) -> HistoryResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            HistoryError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| HistoryError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> HistoryResult<()> {
        let conn = self.open()?;
        conn.execute_batch(HISTORY_SCHEMA)?;
        Ok(())
    }

    /// Decide whether to run a (keyword, ordering) query and with what
    /// window.
    ///
    /// The all-time search happens at most once per pair; every later search
    /// must carry a window so repeated queries exercise different regions of
    /// time.
    pub fn should_search<R: Rng>(
        &self,
        keyword: &str,
        ordering: SearchOrdering,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> HistoryResult<(bool, Option<TimeWindow>)> {
        let recent = self.recent_searches(keyword, ordering, now - Duration::days(7), 20)?;

        if recent.is_empty() {
            debug!(keyword, ordering = %ordering, "first search for pair, going all-time");
            return Ok((true, None));
        }

        let has_all_time = recent.iter().any(|search| search.window.is_none());
        if has_all_time {
            let window = self.generate_window(&recent, now, rng);
            info!(
                keyword,
                ordering = %ordering,
                after = %window.published_after.date_naive(),
                before = %window.published_before.date_naive(),
                "all-time done previously, using window"
            );
            Ok((true, Some(window)))
        } else {
            debug!(keyword, ordering = %ordering, "no all-time search yet, doing one");
            Ok((true, None))
        }
    }

    fn recent_searches(
        &self,
        keyword: &str,
        ordering: SearchOrdering,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> HistoryResult<Vec<RecordedSearch>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT keyword, ordering, results_count, searched_at, published_after, published_before
             FROM search_history
             WHERE keyword = ?1 AND ordering = ?2 AND searched_at >= ?3
             ORDER BY searched_at DESC LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![keyword, ordering.as_str(), cutoff.to_rfc3339(), limit as i64],
                |row| {
                    let after: Option<String> = row.get(4)?;
                    let before: Option<String> = row.get(5)?;
                    let window = match (parse_ts(after), parse_ts(before)) {
                        (Some(published_after), Some(published_before)) => Some(TimeWindow {
                            published_after,
                            published_before,
                        }),
                        _ => None,
                    };
                    Ok(RecordedSearch {
                        keyword: row.get(0)?,
                        ordering,
                        results_count: row.get(2)?,
                        searched_at: parse_ts(row.get(3)?).unwrap_or_else(Utc::now),
                        window,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Pick a window sized to the keyword's upload frequency and offset into
    /// a region of time worth revisiting.
    fn generate_window<R: Rng>(
        &self,
        recent: &[RecordedSearch],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> TimeWindow {
        let uploads_per_day = estimate_upload_frequency(recent);
        let min_days_for_25 = (25.0 / uploads_per_day.max(0.01)).ceil().max(7.0) as i64;

        let mut window_days = *pick(rng, window_sizes(uploads_per_day));

        let days_since_last = recent
            .first()
            .map(|search| (now - search.searched_at).num_days())
            .unwrap_or(999);
        let expected_new = uploads_per_day * days_since_last as f64;

        let days_back = if expected_new >= 15.0 && days_since_last <= 30 {
            window_days = window_days.min(days_since_last + 1);
            rng.gen_range(0..=days_since_last.max(1))
        } else {
            let roll: f64 = rng.gen();
            if roll < 0.50 && min_days_for_25 <= 60 {
                // Viral tracking: refresh view counts on recent uploads.
                rng.gen_range(0..=60)
            } else if roll < 0.80 {
                rng.gen_range(30..=365)
            } else {
                rng.gen_range(365..=365 * 5)
            }
        };

        let end_day = (now - Duration::days(days_back)).date_naive();
        let start_day = end_day - Duration::days(window_days);
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
        let published_before = end_day.and_time(end_of_day).and_utc();
        let published_after = start_day.and_time(NaiveTime::default()).and_utc();

        debug!(
            uploads_per_day = %format!("{uploads_per_day:.2}"),
            window_days,
            days_back,
            "generated search window"
        );
        TimeWindow {
            published_after,
            published_before,
        }
    }

    pub fn record_search(
        &self,
        keyword: &str,
        ordering: SearchOrdering,
        results_count: i64,
        window: Option<&TimeWindow>,
        now: DateTime<Utc>,
    ) -> HistoryResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO search_history
                 (keyword, ordering, results_count, searched_at, published_after, published_before)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                keyword,
                ordering.as_str(),
                results_count,
                now.to_rfc3339(),
                window.map(|w| w.published_after.to_rfc3339()),
                window.map(|w| w.published_before.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Record a keyword's run outcome and derive its tier from efficiency.
    pub fn record_keyword_outcome(
        &self,
        keyword: &str,
        new_videos: i64,
        rediscovered: i64,
        skipped: i64,
        now: DateTime<Utc>,
    ) -> HistoryResult<KeywordOutcome> {
        let total = new_videos + rediscovered + skipped;
        let efficiency_pct = if total > 0 {
            new_videos as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let (tier, cooldown_days) = if efficiency_pct >= 70.0 {
            (1u8, 1i64)
        } else if efficiency_pct >= 40.0 {
            (2, 3)
        } else {
            (3, 7)
        };

        let conn = self.open()?;
        conn.execute(
            "INSERT INTO keyword_searches
                 (keyword, search_date, searched_at, new_videos, rediscovered_videos,
                  skipped_videos, total_results, efficiency_pct, tier, cooldown_days)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                keyword,
                now.format("%Y-%m-%d").to_string(),
                now.to_rfc3339(),
                new_videos,
                rediscovered,
                skipped,
                total,
                (efficiency_pct * 10.0).round() / 10.0,
                tier as i64,
                cooldown_days,
            ],
        )?;

        Ok(KeywordOutcome {
            keyword: keyword.to_string(),
            new_videos,
            rediscovered,
            skipped,
            efficiency_pct,
            tier,
            cooldown_days,
        })
    }

    /// Latest tier per keyword. Keywords with no record default to tier 3 on
    /// the planner side.
    pub fn keyword_tiers(&self) -> HistoryResult<HashMap<String, u8>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT keyword, tier FROM keyword_searches
             WHERE id IN (SELECT MAX(id) FROM keyword_searches GROUP BY keyword)",
        )?;
        let mut tiers = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (keyword, tier) = row?;
            tiers.insert(keyword, tier.clamp(1, 3) as u8);
        }
        Ok(tiers)
    }

    pub fn record_channel_scan(&self, channel_id: &str, now: DateTime<Utc>) -> HistoryResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO channel_scans (channel_id, last_scanned_at, scan_count)
             VALUES (?1, ?2, 1)
             ON CONFLICT(channel_id) DO UPDATE SET
                 last_scanned_at = ?2,
                 scan_count = channel_scans.scan_count + 1",
            params![channel_id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn channel_last_scanned(
        &self,
        channel_id: &str,
    ) -> HistoryResult<Option<DateTime<Utc>>> {
        let conn = self.open()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_scanned_at FROM channel_scans WHERE channel_id = ?1",
                params![channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|value| parse_ts(Some(value))))
    }

    pub fn record_discovery_metrics(&self, stats: &DiscoveryStats) -> HistoryResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO discovery_metrics
                 (run_at, videos_discovered, videos_rediscovered, videos_skipped,
                  unique_channels, quota_used, duration_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Utc::now().to_rfc3339(),
                stats.videos_discovered as i64,
                stats.videos_rediscovered as i64,
                stats.videos_skipped as i64,
                stats.unique_channels as i64,
                stats.quota_used as i64,
                stats.duration_seconds,
            ],
        )?;
        Ok(())
    }
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn window_sizes(uploads_per_day: f64) -> &'static [i64] {
    if uploads_per_day > 5.0 {
        &[7, 10, 14, 21]
    } else if uploads_per_day > 1.0 {
        &[21, 30, 45, 60]
    } else if uploads_per_day > 0.1 {
        &[60, 90, 120, 180]
    } else {
        &[180, 270, 365]
    }
}

fn pick<'a, R: Rng, T>(rng: &mut R, options: &'a [T]) -> &'a T {
    &options[rng.gen_range(0..options.len())]
}

/// Uploads per day over the last five records. An all-time search is counted
/// as covering 365 days; the floor keeps later divisions sane.
fn estimate_upload_frequency(recent: &[RecordedSearch]) -> f64 {
    let mut total_results = 0i64;
    let mut total_days = 0i64;

    for search in recent.iter().take(5) {
        match &search.window {
            Some(window) => {
                let days = window.span_days();
                if days > 0 {
                    total_results += search.results_count;
                    total_days += days;
                }
            }
            None => {
                if search.results_count > 0 {
                    total_results += search.results_count;
                    total_days += 365;
                }
            }
        }
    }

    if total_days == 0 {
        return 1.0;
    }
    (total_results as f64 / total_days as f64).max(0.01)
}
