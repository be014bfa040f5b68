use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ChannelStore, ScanStatDelta};
use crate::events::{EventError, EventQueue, FeedbackMessage, TOPIC_VISION_FEEDBACK};
use crate::stats::{StatsError, StatsStore};
use crate::video::{AnalysisSummary, VideoError, VideoStore};
use crate::vision::client::VisionAnalysis;

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("video store error: {0}")]
    Video(#[from] VideoError),
    #[error("channel store error: {0}")]
    Channel(#[from] ChannelError),
    #[error("stats store error: {0}")]
    Stats(#[from] StatsError),
    #[error("event queue error: {0}")]
    Event(#[from] EventError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("video not found: {0}")]
    UnknownVideo(String),
}

pub type ResultResult<T> = Result<T, ResultError>;

#[derive(Debug, Clone)]
pub struct CompletedAnalysis {
    pub video_id: String,
    pub analysis: VisionAnalysis,
    pub model: String,
    pub analyzed_at: DateTime<Utc>,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub processing_seconds: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppliedResult {
    pub first_analysis: bool,
    pub actionable_flip: bool,
    pub infringement_flip: bool,
}

/// Applies a completed analysis to every aggregate surface.
///
/// The invariant this protects: for any sequence of scans and rescans,
/// channel and system counters equal one first-time increment plus one
/// transition adjustment per rescan, derived from only the latest two
/// classifications. Prior state is read before the new analysis is written;
/// the single-owner rule on `processing` prevents two analyses of the same
/// video from interleaving here.
pub struct ResultProcessor {
    videos: VideoStore,
    channels: ChannelStore,
    stats: StatsStore,
    events: EventQueue,
}

impl ResultProcessor {
    pub fn new(
        videos: VideoStore,
        channels: ChannelStore,
        stats: StatsStore,
        events: EventQueue,
    ) -> Self {
        Self {
            videos,
            channels,
            stats,
            events,
        }
    }

    pub fn process(&self, completed: &CompletedAnalysis) -> ResultResult<AppliedResult> {
        let video = self
            .videos
            .fetch(&completed.video_id)?
            .ok_or_else(|| ResultError::UnknownVideo(completed.video_id.clone()))?;

        let prior = video.analysis.clone();
        let new_actionable = completed.analysis.overall_recommendation.is_actionable();
        let new_contains = completed.analysis.contains_infringement();

        info!(
            video_id = %completed.video_id,
            ips = completed.analysis.ip_results.len(),
            infringement = new_contains,
            action = %completed.analysis.overall_recommendation,
            rescan = prior.is_some(),
            "processing analysis result"
        );

        let summary = AnalysisSummary {
            analyzed_at: completed.analyzed_at,
            model: completed.model.clone(),
            contains_infringement: new_contains,
            overall_recommendation: completed.analysis.overall_recommendation.as_str().to_string(),
            max_likelihood: completed.analysis.max_likelihood(),
            overall_notes: completed.analysis.overall_notes.clone(),
            ip_results: serde_json::to_value(&completed.analysis.ip_results)?,
            cost: completed.cost,
            input_tokens: completed.input_tokens,
            output_tokens: completed.output_tokens,
        };
        self.videos.write_analysis(&completed.video_id, &summary)?;

        let mut applied = AppliedResult::default();
        match prior {
            None => {
                applied.first_analysis = true;
                let delta = ScanStatDelta {
                    videos_scanned: 1,
                    confirmed_infringements: if new_actionable { 1 } else { 0 },
                    videos_cleared: if new_actionable { 0 } else { 1 },
                    infringing_videos_count: if new_actionable { 1 } else { 0 },
                    total_infringing_views: if new_actionable { video.view_count } else { 0 },
                };
                if !video.channel_id.is_empty() {
                    self.channels.apply_scan_delta(
                        &video.channel_id,
                        delta,
                        new_actionable,
                        completed.analyzed_at,
                    )?;
                }
                self.stats
                    .bump_system(1, if new_contains { 1 } else { 0 })?;
                self.stats.bump_hourly(
                    completed.analyzed_at,
                    1,
                    if new_contains { 1 } else { 0 },
                    completed.cost,
                    completed.processing_seconds,
                )?;
            }
            Some(prior) => {
                let prior_actionable = prior.overall_recommendation == "immediate_takedown";
                let prior_contains = prior.contains_infringement;

                if prior_actionable != new_actionable {
                    applied.actionable_flip = true;
                    // The decrement reuses the view count the store carries
                    // now; rollups stay rebuildable from the video store.
                    let delta = if new_actionable {
                        ScanStatDelta {
                            videos_scanned: 0,
                            confirmed_infringements: 1,
                            videos_cleared: -1,
                            infringing_videos_count: 1,
                            total_infringing_views: video.view_count,
                        }
                    } else {
                        ScanStatDelta {
                            videos_scanned: 0,
                            confirmed_infringements: -1,
                            videos_cleared: 1,
                            infringing_videos_count: -1,
                            total_infringing_views: -video.view_count,
                        }
                    };
                    if !video.channel_id.is_empty() {
                        self.channels.apply_scan_delta(
                            &video.channel_id,
                            delta,
                            new_actionable,
                            completed.analyzed_at,
                        )?;
                    }
                    info!(
                        video_id = %completed.video_id,
                        from = %prior.overall_recommendation,
                        to = %completed.analysis.overall_recommendation,
                        "reclassified"
                    );
                } else if !video.channel_id.is_empty() {
                    // Same classification: only the scan timestamp moves.
                    self.channels.apply_scan_delta(
                        &video.channel_id,
                        ScanStatDelta::default(),
                        false,
                        completed.analyzed_at,
                    )?;
                }

                if prior_contains != new_contains {
                    applied.infringement_flip = true;
                    let delta = if new_contains { 1 } else { -1 };
                    self.stats.bump_system(0, delta)?;
                    self.stats
                        .bump_hourly(completed.analyzed_at, 0, delta, 0.0, 0.0)?;
                    debug!(
                        video_id = %completed.video_id,
                        now_infringing = new_contains,
                        "infringement flag flipped"
                    );
                }
            }
        }

        if video.channel_id.is_empty() {
            warn!(video_id = %completed.video_id, "no channel id, skipping feedback");
            return Ok(applied);
        }

        let feedback = FeedbackMessage {
            video_id: completed.video_id.clone(),
            channel_id: video.channel_id.clone(),
            contains_infringement: new_contains,
            confidence_score: completed.analysis.max_likelihood(),
            infringement_type: completed
                .analysis
                .ip_results
                .first()
                .map(|ip| ip.content_type.clone())
                .filter(|content_type| !content_type.is_empty())
                .unwrap_or_else(|| "none".to_string()),
            characters_found: completed.analysis.characters_found(),
            analysis_cost_usd: completed.cost,
            analyzed_at: completed.analyzed_at,
        };
        self.events.publish_json(TOPIC_VISION_FEEDBACK, &feedback)?;

        if completed.analysis.max_likelihood() >= 80 && new_contains {
            warn!(
                video_id = %completed.video_id,
                likelihood = completed.analysis.max_likelihood(),
                action = %completed.analysis.overall_recommendation,
                "high-confidence infringement detected"
            );
        }

        Ok(applied)
    }
}
