use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ChannelStore};
use crate::events::{EventError, EventQueue, VideoEnvelope, TOPIC_VIDEO_DISCOVERED};
use crate::ipconfig::IpMatcher;
use crate::risk;
use crate::video::{PriorityTier, Video, VideoError, VideoStatus, VideoStore};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("video store error: {0}")]
    Video(#[from] VideoError),
    #[error("channel store error: {0}")]
    Channel(#[from] ChannelError),
    #[error("event queue error: {0}")]
    Event(#[from] EventError),
    #[error("unusable payload: {0}")]
    Unusable(String),
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Canonical metadata extracted from one raw API item, whatever shape the
/// id arrived in.
#[derive(Debug, Clone)]
pub struct ExtractedVideo {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub thumbnail_url: Option<String>,
}

/// Outcome of one processed batch of raw results.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub new_videos: usize,
    pub rediscovered: usize,
    pub skipped: usize,
    pub channel_ids: Vec<String>,
}

/// Discovery-side processing: normalize raw results, match IPs on text,
/// persist, and emit `video-discovered` events. Visual confirmation belongs
/// to the vision stage.
pub struct VideoProcessor {
    videos: VideoStore,
    channels: ChannelStore,
    matcher: IpMatcher,
    events: EventQueue,
}

impl VideoProcessor {
    pub fn new(
        videos: VideoStore,
        channels: ChannelStore,
        matcher: IpMatcher,
        events: EventQueue,
    ) -> Self {
        Self {
            videos,
            channels,
            matcher,
            events,
        }
    }

    pub fn matcher(&self) -> &IpMatcher {
        &self.matcher
    }

    /// Extract canonical metadata. Search results carry `id.videoId`,
    /// details responses a bare `id` string; both are accepted. Parse
    /// failures fall back to safe values rather than raising.
    pub fn extract_metadata(&self, item: &Value) -> ProcessorResult<ExtractedVideo> {
        let video_id = match item.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Object(map)) => map
                .get("videoId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        if video_id.is_empty() {
            return Err(ProcessorError::Unusable(
                "cannot extract video id".to_string(),
            ));
        }

        let snippet = item.get("snippet").cloned().unwrap_or(Value::Null);
        let statistics = item.get("statistics").cloned().unwrap_or(Value::Null);
        let content = item.get("contentDetails").cloned().unwrap_or(Value::Null);

        let published_at = snippet
            .get("publishedAt")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| {
                debug!(video_id = %video_id, "unparsable publishedAt, defaulting to now");
                Utc::now()
            });

        let duration_seconds = content
            .get("duration")
            .and_then(Value::as_str)
            .map(parse_iso8601_duration)
            .unwrap_or(0);

        let thumbnails = snippet.get("thumbnails").cloned().unwrap_or(Value::Null);
        let thumbnail_url = ["high", "medium", "default"]
            .iter()
            .find_map(|quality| {
                thumbnails
                    .pointer(&format!("/{quality}/url"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        Ok(ExtractedVideo {
            video_id,
            title: str_field(&snippet, "title"),
            description: str_field(&snippet, "description"),
            tags: snippet
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            channel_id: str_field(&snippet, "channelId"),
            channel_title: str_field(&snippet, "channelTitle"),
            published_at,
            duration_seconds,
            view_count: int_field(&statistics, "viewCount"),
            like_count: int_field(&statistics, "likeCount"),
            comment_count: int_field(&statistics, "commentCount"),
            thumbnail_url,
        })
    }

    pub fn match_ips(&self, extracted: &ExtractedVideo) -> Vec<String> {
        let haystack = format!(
            "{} {} {} {}",
            extracted.title,
            extracted.description,
            extracted.tags.join(" "),
            extracted.channel_title,
        );
        self.matcher.match_text(&haystack)
    }

    /// Process one batch of raw results with dedup against the video store.
    ///
    /// New video: persist + emit. Known video already enqueued for analysis:
    /// merge any new IPs, never re-emit. Known video never enqueued: set the
    /// trigger timestamp and emit now.
    pub fn process_batch(&self, results: &[Value]) -> ProcessorResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        info!(results = results.len(), "processing batch");

        for item in results {
            let extracted = match self.extract_metadata(item) {
                Ok(extracted) => extracted,
                Err(err) => {
                    warn!(error = %err, "skipping unusable result");
                    continue;
                }
            };

            if !extracted.channel_id.is_empty()
                && !outcome.channel_ids.contains(&extracted.channel_id)
            {
                outcome.channel_ids.push(extracted.channel_id.clone());
            }

            match self.process_one(&extracted) {
                Ok(ProcessedAs::New) => outcome.new_videos += 1,
                Ok(ProcessedAs::Triggered) => outcome.rediscovered += 1,
                Ok(ProcessedAs::Skipped) => outcome.skipped += 1,
                Err(err) => {
                    warn!(video_id = %extracted.video_id, error = %err, "result processing failed");
                    continue;
                }
            }
        }

        Ok(outcome)
    }

    fn process_one(&self, extracted: &ExtractedVideo) -> ProcessorResult<ProcessedAs> {
        let now = Utc::now();

        // Channel rollup always moves, whatever happens to the video itself.
        if !extracted.channel_id.is_empty() {
            self.channels.record_video_found(
                &extracted.channel_id,
                &extracted.channel_title,
                extracted.view_count,
                now,
            )?;
        }

        let Some(existing) = self.videos.fetch(&extracted.video_id)? else {
            let matched_ips = self.match_ips(extracted);
            let video = self.build_new_video(extracted, matched_ips, now);
            self.videos.upsert(&video)?;
            self.emit_discovered(&video)?;
            info!(
                video_id = %video.video_id,
                risk = video.initial_risk,
                ips = video.matched_ips.len(),
                "new video discovered"
            );
            return Ok(ProcessedAs::New);
        };

        // Known video: refresh the numbers we just observed.
        self.videos.update_statistics(
            &extracted.video_id,
            extracted.view_count,
            extracted.like_count,
            extracted.comment_count,
        )?;

        if existing.vision_triggered_at.is_some() {
            let matched = self.match_ips(extracted);
            let added = self.videos.merge_matched_ips(&extracted.video_id, &matched)?;
            if added > 0 {
                info!(video_id = %extracted.video_id, added, "merged new IP matches");
            }
            debug!(video_id = %extracted.video_id, "already enqueued, skipping");
            return Ok(ProcessedAs::Skipped);
        }

        // Known but never enqueued (pre-pipeline rows): enqueue it now.
        let matched = self.match_ips(extracted);
        self.videos
            .set_vision_triggered(&extracted.video_id, &matched, now)?;
        if let Some(video) = self.videos.fetch(&extracted.video_id)? {
            self.emit_discovered(&video)?;
        }
        info!(video_id = %extracted.video_id, "existing video enqueued for analysis");
        Ok(ProcessedAs::Triggered)
    }

    fn build_new_video(
        &self,
        extracted: &ExtractedVideo,
        matched_ips: Vec<String>,
        now: DateTime<Utc>,
    ) -> Video {
        let mut video = Video {
            video_id: extracted.video_id.clone(),
            title: extracted.title.clone(),
            description: extracted.description.clone(),
            tags: extracted.tags.clone(),
            channel_id: extracted.channel_id.clone(),
            channel_title: extracted.channel_title.clone(),
            published_at: Some(extracted.published_at),
            duration_seconds: extracted.duration_seconds,
            view_count: extracted.view_count,
            like_count: extracted.like_count,
            comment_count: extracted.comment_count,
            thumbnail_url: extracted.thumbnail_url.clone(),
            matched_ips,
            status: VideoStatus::Discovered,
            initial_risk: 0,
            current_risk: 0,
            video_risk: 0,
            channel_risk: 0,
            scan_priority: 0,
            priority_tier: PriorityTier::VeryLow,
            scan_count: 0,
            view_velocity: 0.0,
            discovered_at: Some(now),
            vision_triggered_at: None,
            processing_started_at: None,
            last_analyzed_at: None,
            last_risk_update: Some(now),
            analysis: None,
            error_message: None,
            error_kind: None,
            deleted: false,
        };

        // Initial risk sees no channel reputation yet.
        let high_priority = self.matcher.any_high_priority(&video.matched_ips);
        let (video_score, _) = risk::video_risk(&video, high_priority, now);
        let combined = risk::scan_priority(video_score, 0);
        video.video_risk = video_score;
        video.initial_risk = combined;
        video.current_risk = combined;
        video.scan_priority = combined;
        video.priority_tier = risk::tier_of(combined);
        video
    }

    fn emit_discovered(&self, video: &Video) -> ProcessorResult<()> {
        let envelope = VideoEnvelope {
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
            discovered_at: video.discovered_at.unwrap_or_else(Utc::now),
            scan_priority: video.scan_priority,
        };
        self.events.publish_json(TOPIC_VIDEO_DISCOVERED, &envelope)?;
        Ok(())
    }
}

enum ProcessedAs {
    New,
    Triggered,
    Skipped,
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Statistics fields arrive as strings; tolerate numbers too.
fn int_field(value: &Value, key: &str) -> i64 {
    match value.get(key) {
        Some(Value::String(raw)) => raw.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}

/// Parse an ISO-8601 `PT[h]H[m]M[s]S` duration into seconds, 0 on failure.
pub fn parse_iso8601_duration(raw: &str) -> i64 {
    let Ok(re) = Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$") else {
        return 0;
    };
    let Some(caps) = re.captures(raw) else {
        return 0;
    };
    let part = |idx: usize| {
        caps.get(idx)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0)
    };
    part(1) * 3600 + part(2) * 60 + part(3)
}
