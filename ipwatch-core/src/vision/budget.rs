use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::sqlite::configure_connection;

const LEDGER_SCHEMA: &str = include_str!("../../../sql/ledgers.sql");

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("failed to open budget ledger {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on budget ledger: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("daily budget exhausted: need {estimated:.4}, remaining {remaining:.2}")]
    Exhausted { estimated: f64, remaining: f64 },
}

pub type BudgetResult<T> = Result<T, BudgetError>;

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStats {
    pub date: String,
    pub daily_budget_eur: f64,
    pub total_spent_eur: f64,
    pub remaining_eur: f64,
    pub utilization_percent: f64,
    pub videos_analyzed: i64,
    pub avg_cost_per_video: f64,
}

#[derive(Debug, Clone, Copy)]
struct CachedTotal {
    day_key_hash: u64,
    total: f64,
    video_count: i64,
    fetched_at: Instant,
}

/// Daily monetary ledger keyed by UTC date. Rollover is implicit in the day
/// key; increments are atomic so concurrent workers never read-modify-write.
/// Reads for gating are cached for one second; the ledger row stays the
/// authority.
#[derive(Debug)]
pub struct BudgetManager {
    path: PathBuf,
    flags: OpenFlags,
    daily_budget: f64,
    cache: Mutex<Option<CachedTotal>>,
}

impl BudgetManager {
    pub fn new(path: impl AsRef<Path>, daily_budget: f64) -> BudgetResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            daily_budget,
            cache: Mutex::new(None),
        })
    }

    fn open(&self) -> BudgetResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            BudgetError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| BudgetError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> BudgetResult<()> {
        let conn = self.open()?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(())
    }

    pub fn day_key(now: DateTime<Utc>) -> String {
        now.format("%Y-%m-%d").to_string()
    }

    pub fn daily_budget(&self) -> f64 {
        self.daily_budget
    }

    pub fn can_afford(&self, estimated_cost: f64) -> BudgetResult<bool> {
        let total = self.daily_total()?;
        let would_exceed = total + estimated_cost > self.daily_budget;
        if would_exceed {
            info!(
                current = %format!("{total:.2}"),
                estimated = %format!("{estimated_cost:.4}"),
                limit = self.daily_budget,
                "budget check failed"
            );
        }
        Ok(!would_exceed)
    }

    pub fn record_usage(
        &self,
        video_id: &str,
        actual_cost: f64,
        input_tokens: u64,
        output_tokens: u64,
    ) -> BudgetResult<()> {
        let now = Utc::now();
        let day_key = Self::day_key(now);
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO budget_tracking
                 (day_key, total_spent_eur, daily_budget_eur, video_count,
                  input_tokens, output_tokens, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
             ON CONFLICT(day_key) DO UPDATE SET
                 total_spent_eur = budget_tracking.total_spent_eur + ?2,
                 daily_budget_eur = ?3,
                 video_count = budget_tracking.video_count + 1,
                 input_tokens = budget_tracking.input_tokens + ?4,
                 output_tokens = budget_tracking.output_tokens + ?5,
                 updated_at = ?6",
            params![
                day_key,
                actual_cost,
                self.daily_budget,
                input_tokens as i64,
                output_tokens as i64,
                now.to_rfc3339()
            ],
        )?;
        // Invalidate rather than bump: the next gate re-reads the authority.
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!(
            video_id,
            cost = %format!("{actual_cost:.4}"),
            "budget usage recorded"
        );
        Ok(())
    }

    pub fn daily_total(&self) -> BudgetResult<f64> {
        Ok(self.read_today()?.0)
    }

    pub fn videos_today(&self) -> BudgetResult<i64> {
        Ok(self.read_today()?.1)
    }

    fn read_today(&self) -> BudgetResult<(f64, i64)> {
        let day_key = Self::day_key(Utc::now());
        let key_hash = hash_key(&day_key);

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = *cache {
                if cached.day_key_hash == key_hash && cached.fetched_at.elapsed().as_secs() < 1 {
                    return Ok((cached.total, cached.video_count));
                }
            }
        }

        let conn = self.open()?;
        let row: Option<(f64, i64)> = conn
            .query_row(
                "SELECT total_spent_eur, video_count FROM budget_tracking WHERE day_key = ?1",
                params![day_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (total, video_count) = row.unwrap_or((0.0, 0));
        debug!(total = %format!("{total:.4}"), video_count, "budget ledger read");

        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(CachedTotal {
            day_key_hash: key_hash,
            total,
            video_count,
            fetched_at: Instant::now(),
        });
        Ok((total, video_count))
    }

    pub fn remaining(&self) -> BudgetResult<f64> {
        Ok((self.daily_budget - self.daily_total()?).max(0.0))
    }

    pub fn utilization_percent(&self) -> BudgetResult<f64> {
        if self.daily_budget <= 0.0 {
            return Ok(0.0);
        }
        Ok((self.daily_total()? / self.daily_budget * 100.0).min(100.0))
    }

    /// The vision backend applies dynamic shared quota; a local rate gate
    /// would only add latency. Kept for call-site compatibility.
    pub async fn enforce_rate_limit(&self) {}

    pub fn stats(&self) -> BudgetResult<BudgetStats> {
        let (total, videos) = self.read_today()?;
        let avg = if videos > 0 { total / videos as f64 } else { 0.0 };
        Ok(BudgetStats {
            date: Self::day_key(Utc::now()),
            daily_budget_eur: self.daily_budget,
            total_spent_eur: (total * 100.0).round() / 100.0,
            remaining_eur: ((self.daily_budget - total).max(0.0) * 100.0).round() / 100.0,
            utilization_percent: ((total / self.daily_budget * 100.0).min(100.0) * 10.0).round()
                / 10.0,
            videos_analyzed: videos,
            avg_cost_per_video: (avg * 10_000.0).round() / 10_000.0,
        })
    }
}

fn hash_key(key: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
