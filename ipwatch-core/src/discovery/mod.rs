pub mod history;
pub mod planner;
pub mod processor;
pub mod quota;
pub mod search;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::thread_rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::ChannelError;
use crate::events::{EventError, EventQueue, ScanMessage, VideoEnvelope, TOPIC_SCAN_READY};
use crate::video::{VideoError, VideoStore};

pub use history::{HistoryError, KeywordOutcome, SearchHistoryStore};
pub use planner::{ChannelCandidate, PlanInputs, PlannedQuery, SearchPlan, SearchPlanner};
pub use processor::{BatchOutcome, ProcessorError, VideoProcessor};
pub use quota::{QuotaError, QuotaManager, QuotaOp};
pub use search::{HttpSearchClient, SearchClient, SearchError, SearchOrdering, TimeWindow};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("quota error: {0}")]
    Quota(#[from] QuotaError),
    #[error("history error: {0}")]
    History(#[from] HistoryError),
    #[error("processor error: {0}")]
    Processor(#[from] ProcessorError),
    #[error("search error: {0}")]
    Search(#[from] SearchError),
    #[error("video store error: {0}")]
    Video(#[from] VideoError),
    #[error("channel store error: {0}")]
    Channel(#[from] ChannelError),
    #[error("event queue error: {0}")]
    Event(#[from] EventError),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryStats {
    pub videos_discovered: usize,
    pub videos_rediscovered: usize,
    pub videos_skipped: usize,
    pub unique_channels: usize,
    pub queries_executed: usize,
    pub quota_used: u32,
    pub duration_seconds: f64,
    pub enqueued_for_scan: usize,
}

/// One discovery run: plan under the quota, execute with history-aware
/// windows, process results, and enqueue the best unscanned videos for
/// vision analysis.
pub struct DiscoveryEngine {
    search: Arc<dyn SearchClient>,
    processor: VideoProcessor,
    quota: Arc<QuotaManager>,
    history: SearchHistoryStore,
    planner: SearchPlanner,
    videos: VideoStore,
    events: EventQueue,
    max_videos_to_scan: usize,
}

impl DiscoveryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: Arc<dyn SearchClient>,
        processor: VideoProcessor,
        quota: Arc<QuotaManager>,
        history: SearchHistoryStore,
        planner: SearchPlanner,
        videos: VideoStore,
        events: EventQueue,
        max_videos_to_scan: usize,
    ) -> Self {
        Self {
            search,
            processor,
            quota,
            history,
            planner,
            videos,
            events,
            max_videos_to_scan,
        }
    }

    /// Assemble the planner's input snapshot from the stores.
    pub fn plan_inputs(
        &self,
        custom_keywords: Option<&[String]>,
    ) -> DiscoveryResult<PlanInputs> {
        let keywords = match custom_keywords {
            Some(custom) => custom.to_vec(),
            None => {
                let mut keywords: Vec<String> = Vec::new();
                for config in self.processor.matcher().configs() {
                    keywords.extend(config.all_keywords());
                }
                keywords.dedup();
                keywords
            }
        };

        let keyword_tiers = self.history.keyword_tiers()?;

        let mut channel_candidates = Vec::new();
        for (channel_id, video_count) in self.videos.channel_video_counts()? {
            let last_scanned_at = self.history.channel_last_scanned(&channel_id)?;
            channel_candidates.push(ChannelCandidate {
                channel_id,
                video_count,
                last_scanned_at,
            });
        }

        Ok(PlanInputs {
            keywords,
            keyword_tiers,
            channel_candidates,
        })
    }

    /// Build the plan a run would execute, without spending any quota.
    pub fn preview_plan(&self, max_quota: u32) -> DiscoveryResult<SearchPlan> {
        let inputs = self.plan_inputs(None)?;
        let mut rng = thread_rng();
        Ok(self.planner.plan(&inputs, max_quota, Utc::now(), &mut rng))
    }

    pub async fn run(
        &self,
        max_quota: u32,
        custom_keywords: Option<&[String]>,
    ) -> DiscoveryResult<DiscoveryStats> {
        let started = Instant::now();
        let inputs = self.plan_inputs(custom_keywords)?;
        let plan = {
            let mut rng = thread_rng();
            self.planner.plan(&inputs, max_quota, Utc::now(), &mut rng)
        };
        info!(
            queries = plan.entries.len(),
            channel_scans = plan.channel_scans,
            keyword_queries = plan.keyword_queries,
            max_quota,
            "discovery run starting"
        );

        let mut stats = DiscoveryStats::default();
        let mut unique_channels: HashSet<String> = HashSet::new();
        let mut processed: HashSet<String> = HashSet::new();
        let mut keyword_totals: HashMap<String, (usize, usize, usize)> = HashMap::new();

        for (index, entry) in plan.entries.iter().enumerate() {
            if stats.quota_used + entry.cost() > max_quota {
                info!(
                    quota_used = stats.quota_used,
                    max_quota, "quota exhausted, stopping run"
                );
                break;
            }
            if !self.quota.can_afford(QuotaOp::Search, 1)? {
                info!("global quota exhausted, stopping run");
                break;
            }

            let outcome = match entry {
                PlannedQuery::ChannelScan { channel_id } => {
                    self.execute_channel_scan(channel_id, &mut stats).await
                }
                PlannedQuery::Keyword { keyword, ordering } => {
                    self.execute_keyword_query(
                        keyword,
                        *ordering,
                        &mut stats,
                        &mut processed,
                        &mut keyword_totals,
                    )
                    .await
                }
            };

            match outcome {
                Ok(Some(batch)) => {
                    stats.videos_discovered += batch.new_videos;
                    stats.videos_rediscovered += batch.rediscovered;
                    stats.videos_skipped += batch.skipped;
                    unique_channels.extend(batch.channel_ids);
                    stats.queries_executed += 1;
                    debug!(
                        query = index + 1,
                        total = plan.entries.len(),
                        new = batch.new_videos,
                        quota_used = stats.quota_used,
                        "query complete"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    // One bad query never aborts a run.
                    warn!(error = %err, "query failed, continuing");
                }
            }
        }

        for (keyword, (new_videos, rediscovered, skipped)) in &keyword_totals {
            let total = new_videos + rediscovered + skipped;
            if total == 0 {
                continue;
            }
            if let Err(err) = self.history.record_keyword_outcome(
                keyword,
                *new_videos as i64,
                *rediscovered as i64,
                *skipped as i64,
                Utc::now(),
            ) {
                warn!(keyword = %keyword, error = %err, "failed to record keyword outcome");
            }
        }

        stats.unique_channels = unique_channels.len();
        stats.duration_seconds = started.elapsed().as_secs_f64();

        info!(
            new = stats.videos_discovered,
            rediscovered = stats.videos_rediscovered,
            skipped = stats.videos_skipped,
            channels = stats.unique_channels,
            quota = stats.quota_used,
            duration = %format!("{:.1}s", stats.duration_seconds),
            "discovery run complete"
        );

        if let Err(err) = self.history.record_discovery_metrics(&stats) {
            warn!(error = %err, "failed to persist discovery metrics");
        }

        // Enqueue never fails the run; analysis will catch up next time.
        match self.enqueue_top_unscanned(self.max_videos_to_scan) {
            Ok(enqueued) => stats.enqueued_for_scan = enqueued,
            Err(err) => warn!(error = %err, "failed to enqueue batch for analysis"),
        }

        Ok(stats)
    }

    async fn execute_channel_scan(
        &self,
        channel_id: &str,
        stats: &mut DiscoveryStats,
    ) -> DiscoveryResult<Option<BatchOutcome>> {
        if !self.quota.can_afford(QuotaOp::ChannelDetails, 1)?
            || !self.quota.can_afford(QuotaOp::PlaylistItems, 1)?
        {
            debug!(channel_id, "skipping channel scan, no quota");
            return Ok(None);
        }

        info!(channel_id, "scanning channel uploads");
        let results = self.search.channel_uploads(channel_id, 50).await?;

        stats.quota_used += planner::CHANNEL_SCAN_COST;
        self.quota.record_usage(QuotaOp::ChannelDetails, 1)?;
        self.quota.record_usage(QuotaOp::PlaylistItems, 1)?;
        self.history.record_channel_scan(channel_id, Utc::now())?;

        let enriched = self.enrich_with_details(results, stats).await?;
        let batch = self.processor.process_batch(&enriched)?;
        Ok(Some(batch))
    }

    async fn execute_keyword_query(
        &self,
        keyword: &str,
        ordering: SearchOrdering,
        stats: &mut DiscoveryStats,
        processed: &mut HashSet<String>,
        keyword_totals: &mut HashMap<String, (usize, usize, usize)>,
    ) -> DiscoveryResult<Option<BatchOutcome>> {
        let query_key = format!("{keyword}|{ordering}");
        if processed.contains(&query_key) {
            debug!(keyword, ordering = %ordering, "combination already processed");
            return Ok(None);
        }

        let (should, window) = {
            let mut rng = thread_rng();
            self.history
                .should_search(keyword, ordering, Utc::now(), &mut rng)?
        };
        if !should {
            processed.insert(query_key);
            return Ok(None);
        }

        let results = self
            .search
            .search_videos(keyword, ordering, window.as_ref(), 50)
            .await?;

        // An attempted page is charged even when nothing came back.
        let pages = (results.len().div_ceil(50)).max(1) as u32;
        stats.quota_used += pages * planner::KEYWORD_QUERY_COST;
        self.quota.record_usage(QuotaOp::Search, pages)?;

        let exhausted = results.len() < 50;
        let enriched = self.enrich_with_details(results, stats).await?;
        let batch = self.processor.process_batch(&enriched)?;

        self.history.record_search(
            keyword,
            ordering,
            enriched.len() as i64,
            window.as_ref(),
            Utc::now(),
        )?;

        let totals = keyword_totals.entry(keyword.to_string()).or_default();
        totals.0 += batch.new_videos;
        totals.1 += batch.rediscovered;
        totals.2 += batch.skipped;

        processed.insert(query_key);
        if exhausted {
            // Fewer than a full page means the other orderings would only
            // reshuffle the same results; don't pay for them.
            for other in SearchOrdering::ALL {
                processed.insert(format!("{keyword}|{other}"));
            }
            debug!(keyword, "keyword exhausted, all orderings marked processed");
        }

        Ok(Some(batch))
    }

    /// Enrich raw items with statistics/contentDetails, one unit per 50 ids.
    async fn enrich_with_details(
        &self,
        results: Vec<serde_json::Value>,
        stats: &mut DiscoveryStats,
    ) -> DiscoveryResult<Vec<serde_json::Value>> {
        if results.is_empty() {
            return Ok(results);
        }

        let ids: Vec<String> = results
            .iter()
            .filter_map(|item| match item.get("id") {
                Some(serde_json::Value::String(id)) => Some(id.clone()),
                Some(serde_json::Value::Object(map)) => map
                    .get("videoId")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect();
        if ids.is_empty() {
            return Ok(results);
        }

        let mut enriched = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(50) {
            let details = self.search.video_details(chunk).await?;
            stats.quota_used += QuotaOp::VideoDetails.cost();
            self.quota.record_usage(QuotaOp::VideoDetails, 1)?;
            enriched.extend(details);
        }
        Ok(enriched)
    }

    /// Push the top unscanned videos onto the scan-ready stream and stamp
    /// them as triggered.
    pub fn enqueue_top_unscanned(&self, limit: usize) -> DiscoveryResult<usize> {
        let candidates = self.videos.top_unscanned(limit, 0)?;
        if candidates.is_empty() {
            info!("no unscanned videos to enqueue");
            return Ok(0);
        }

        let now = Utc::now();
        let mut published = 0usize;
        for video in &candidates {
            let message = ScanMessage {
                video_id: video.video_id.clone(),
                priority: video.scan_priority,
                metadata: VideoEnvelope {
                    video_id: video.video_id.clone(),
                    url: format!("https://youtube.com/watch?v={}", video.video_id),
                    title: video.title.clone(),
                    duration_seconds: video.duration_seconds,
                    view_count: video.view_count,
                    channel_id: video.channel_id.clone(),
                    channel_title: video.channel_title.clone(),
                    risk_score: video.current_risk,
                    risk_tier: video.priority_tier,
                    matched_ips: video.matched_ips.clone(),
                    discovered_at: video.discovered_at.unwrap_or(now),
                    scan_priority: video.scan_priority,
                },
            };
            self.events.publish_json(TOPIC_SCAN_READY, &message)?;
            self.videos
                .set_vision_triggered(&video.video_id, &video.matched_ips, now)?;
            published += 1;
        }

        info!(published, "enqueued top unscanned videos for analysis");
        Ok(published)
    }
}
