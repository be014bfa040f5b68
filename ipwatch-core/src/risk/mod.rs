pub mod channel;
pub mod priority;
pub mod velocity;
pub mod video;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ChannelStore};
use crate::events::{
    EventError, EventQueue, FeedbackMessage, VideoEnvelope, TOPIC_VIDEO_DISCOVERED,
    TOPIC_VISION_FEEDBACK,
};
use crate::ipconfig::IpMatcher;
use crate::video::{VideoError, VideoStatus, VideoStore};

pub use channel::{channel_risk, ChannelRiskFactors};
pub use priority::{scan_priority, tier_of};
pub use velocity::{trending_score, ViewVelocity, ViewVelocityTracker};
pub use video::{video_risk, VideoRiskFactors};

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("video store error: {0}")]
    Video(#[from] VideoError),
    #[error("channel store error: {0}")]
    Channel(#[from] ChannelError),
    #[error("event queue error: {0}")]
    Event(#[from] EventError),
}

pub type RiskResult<T> = Result<T, RiskError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct RescoreOutcome {
    pub processed: usize,
    pub updated: usize,
}

/// Continuously re-derives per-video priority from the current state of the
/// video and its channel, and feeds analysis results back into both.
pub struct RiskEngine {
    videos: VideoStore,
    channels: ChannelStore,
    matcher: IpMatcher,
    tracker: ViewVelocityTracker,
    events: EventQueue,
}

impl RiskEngine {
    pub fn new(
        videos: VideoStore,
        channels: ChannelStore,
        matcher: IpMatcher,
        events: EventQueue,
    ) -> Self {
        let tracker = ViewVelocityTracker::new(videos.clone());
        Self {
            videos,
            channels,
            matcher,
            tracker,
            events,
        }
    }

    /// Drain pending `video-discovered` events: snapshot views, refresh
    /// velocity, rescore.
    pub fn drain_discovered(&self, limit: usize) -> RiskResult<RescoreOutcome> {
        let mut outcome = RescoreOutcome::default();
        for record in self.events.poll(TOPIC_VIDEO_DISCOVERED, limit)? {
            match record.decode::<VideoEnvelope>() {
                Ok(envelope) => {
                    if let Err(err) = self.process_discovered(&envelope) {
                        warn!(video_id = %envelope.video_id, error = %err, "discovered event failed");
                    } else {
                        outcome.processed += 1;
                    }
                }
                Err(err) => warn!(event_id = record.id, error = %err, "undecodable discovered event"),
            }
            self.events.ack(record.id)?;
        }
        Ok(outcome)
    }

    pub fn process_discovered(&self, envelope: &VideoEnvelope) -> RiskResult<()> {
        let now = Utc::now();
        self.tracker
            .record_snapshot(&envelope.video_id, envelope.view_count, now)?;
        if let Some(velocity) = self.tracker.calculate(&envelope.video_id)? {
            self.videos
                .update_view_velocity(&envelope.video_id, velocity.views_per_hour)?;
            debug!(
                video_id = %envelope.video_id,
                views_per_hour = velocity.views_per_hour,
                "velocity refreshed"
            );
        }
        self.rescore_video(&envelope.video_id)?;
        Ok(())
    }

    /// Drain pending `vision-feedback` events. Counter maintenance already
    /// happened in the result processor; here the fresh analysis flows back
    /// into channel risk and the video's own priority.
    pub fn drain_feedback(&self, limit: usize) -> RiskResult<RescoreOutcome> {
        let mut outcome = RescoreOutcome::default();
        for record in self.events.poll(TOPIC_VISION_FEEDBACK, limit)? {
            match record.decode::<FeedbackMessage>() {
                Ok(feedback) => {
                    if let Err(err) = self.process_feedback(&feedback) {
                        warn!(video_id = %feedback.video_id, error = %err, "feedback event failed");
                    } else {
                        outcome.processed += 1;
                    }
                }
                Err(err) => warn!(event_id = record.id, error = %err, "undecodable feedback event"),
            }
            self.events.ack(record.id)?;
        }
        Ok(outcome)
    }

    pub fn process_feedback(&self, feedback: &FeedbackMessage) -> RiskResult<()> {
        self.refresh_channel_risk(&feedback.channel_id)?;
        self.rescore_video(&feedback.video_id)?;
        info!(
            video_id = %feedback.video_id,
            channel_id = %feedback.channel_id,
            infringement = feedback.contains_infringement,
            "feedback applied"
        );
        Ok(())
    }

    pub fn refresh_channel_risk(&self, channel_id: &str) -> RiskResult<u8> {
        let Some(channel) = self.channels.fetch(channel_id)? else {
            return Ok(0);
        };
        let (risk, _) = channel::channel_risk(&channel);
        if risk != channel.channel_risk {
            self.channels.set_channel_risk(channel_id, risk)?;
        }
        Ok(risk)
    }

    /// Recompute a video's risk and priority. Writes only when the combined
    /// risk actually changed; an unchanged rescore leaves the row untouched.
    pub fn rescore_video(&self, video_id: &str) -> RiskResult<bool> {
        let Some(video) = self.videos.fetch(video_id)? else {
            warn!(video_id, "rescore requested for unknown video");
            return Ok(false);
        };

        let now = Utc::now();
        let high_priority = self.matcher.any_high_priority(&video.matched_ips);
        let (video_score, _) = video::video_risk(&video, high_priority, now);

        let channel_score = match self.channels.fetch(&video.channel_id)? {
            Some(channel) => channel::channel_risk(&channel).0,
            None => 0,
        };

        let combined = priority::scan_priority(video_score, channel_score);
        if combined == video.current_risk {
            return Ok(false);
        }

        let tier = priority::tier_of(combined);
        self.videos.update_risk(
            video_id,
            video_score,
            channel_score,
            combined,
            combined,
            tier,
            now,
        )?;
        debug!(
            video_id,
            old_risk = video.current_risk,
            new_risk = combined,
            tier = %tier,
            "risk updated"
        );
        Ok(true)
    }

    /// Sweep unanalyzed videos and rescore each; used by the CLI and
    /// periodic maintenance.
    pub fn rescore_batch(&self, limit: usize) -> RiskResult<RescoreOutcome> {
        let mut outcome = RescoreOutcome::default();
        for video in self.videos.list_by_status(VideoStatus::Discovered, limit)? {
            outcome.processed += 1;
            if self.rescore_video(&video.video_id)? {
                outcome.updated += 1;
            }
        }
        info!(
            processed = outcome.processed,
            updated = outcome.updated,
            "batch rescore complete"
        );
        Ok(outcome)
    }
}
