use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::video::{VideoResult, VideoStore};

#[derive(Debug, Clone, Serialize)]
pub struct ViewVelocity {
    pub video_id: String,
    pub current_views: i64,
    pub previous_views: i64,
    pub views_gained: i64,
    pub hours_elapsed: f64,
    pub views_per_hour: f64,
    pub trending_score: f64,
}

/// Derives views/hour from the two newest snapshots of a video. One snapshot
/// is not enough; a zero elapsed interval yields nothing rather than an
/// infinite velocity.
#[derive(Debug, Clone)]
pub struct ViewVelocityTracker {
    videos: VideoStore,
}

impl ViewVelocityTracker {
    pub fn new(videos: VideoStore) -> Self {
        Self { videos }
    }

    pub fn record_snapshot(
        &self,
        video_id: &str,
        view_count: i64,
        now: DateTime<Utc>,
    ) -> VideoResult<()> {
        self.videos.record_view_snapshot(video_id, view_count, now)
    }

    pub fn calculate(&self, video_id: &str) -> VideoResult<Option<ViewVelocity>> {
        let snapshots = self.videos.latest_snapshots(video_id, 2)?;
        if snapshots.len() < 2 {
            debug!(video_id, snapshots = snapshots.len(), "not enough snapshots");
            return Ok(None);
        }

        let (current_at, current_views) = snapshots[0];
        let (previous_at, previous_views) = snapshots[1];
        let hours_elapsed = (current_at - previous_at).num_seconds() as f64 / 3600.0;
        if hours_elapsed <= 0.0 {
            return Ok(None);
        }

        let views_gained = (current_views - previous_views).max(0);
        let views_per_hour = views_gained as f64 / hours_elapsed;

        Ok(Some(ViewVelocity {
            video_id: video_id.to_string(),
            current_views,
            previous_views,
            views_gained,
            hours_elapsed,
            views_per_hour,
            trending_score: trending_score(views_per_hour),
        }))
    }
}

/// 0-100 trending score from views/hour, piecewise within the bands.
pub fn trending_score(views_per_hour: f64) -> f64 {
    if views_per_hour >= 10_000.0 {
        100.0
    } else if views_per_hour >= 5_000.0 {
        90.0 + ((views_per_hour - 5_000.0) / 5_000.0) * 9.0
    } else if views_per_hour >= 1_000.0 {
        50.0 + ((views_per_hour - 1_000.0) / 4_000.0) * 39.0
    } else if views_per_hour >= 100.0 {
        10.0 + ((views_per_hour - 100.0) / 900.0) * 39.0
    } else {
        (views_per_hour / 100.0) * 9.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trending_score_bands() {
        assert_eq!(trending_score(20_000.0), 100.0);
        assert!((trending_score(5_000.0) - 90.0).abs() < 1e-9);
        assert!((trending_score(1_000.0) - 50.0).abs() < 1e-9);
        assert!((trending_score(100.0) - 10.0).abs() < 1e-9);
        assert!(trending_score(0.0).abs() < 1e-9);
        assert!(trending_score(99.0) < 10.0);
    }
}
