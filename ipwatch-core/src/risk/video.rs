use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::video::Video;

/// Title/description markers of AI-generated renditions. A hit is worth a
/// bonus in the IP-match factor regardless of which IP matched.
const AI_KEYWORDS: [&str; 9] = [
    "ai generated",
    "sora",
    "runway",
    "kling",
    "pika",
    "ai movie",
    "ai video",
    "luma",
    "minimax",
];

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VideoRiskFactors {
    pub ip_match_quality: u8,
    pub view_count: u8,
    pub view_velocity: u8,
    pub age_vs_views: u8,
    pub engagement: u8,
    pub duration: u8,
    pub scan_history: u8,
}

impl VideoRiskFactors {
    pub fn total(&self) -> u8 {
        let sum = self.ip_match_quality as u16
            + self.view_count as u16
            + self.view_velocity as u16
            + self.age_vs_views as u16
            + self.engagement as u16
            + self.duration as u16
            + self.scan_history as u16;
        sum.min(100) as u8
    }
}

/// 7-factor video risk (0-100). Pure in the video's current state; the
/// high-priority flag comes from the matcher because only it knows config
/// priorities.
pub fn video_risk(video: &Video, high_priority_match: bool, now: DateTime<Utc>) -> (u8, VideoRiskFactors) {
    let factors = VideoRiskFactors {
        ip_match_quality: ip_match_score(video, high_priority_match),
        view_count: view_count_score(video.view_count),
        view_velocity: view_velocity_score(video.view_velocity),
        age_vs_views: age_vs_views_score(video, now),
        engagement: engagement_score(video),
        duration: duration_score(video.duration_seconds),
        scan_history: scan_history_score(video),
    };
    (factors.total(), factors)
}

fn ip_match_score(video: &Video, high_priority_match: bool) -> u8 {
    let base: u8 = match video.matched_ips.len() {
        0 => 0,
        1 => 15,
        _ => 20,
    };

    let priority_bonus = if high_priority_match { 5u8 } else { 0 };

    let haystack = format!(
        "{} {}",
        video.title.to_lowercase(),
        video.description.to_lowercase()
    );
    let ai_bonus = if AI_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        5u8
    } else {
        0
    };

    (base + priority_bonus + ai_bonus).min(25)
}

fn view_count_score(views: i64) -> u8 {
    if views < 1_000 {
        2
    } else if views < 10_000 {
        5
    } else if views < 100_000 {
        10
    } else if views < 1_000_000 {
        15
    } else if views < 10_000_000 {
        18
    } else {
        20
    }
}

fn view_velocity_score(views_per_hour: f64) -> u8 {
    if views_per_hour > 10_000.0 {
        20
    } else if views_per_hour > 1_000.0 {
        15
    } else if views_per_hour > 100.0 {
        10
    } else if views_per_hour > 10.0 {
        5
    } else {
        0
    }
}

/// Survivor bias: an old video still up with high views has evaded prior
/// enforcement. Videos under a month old contribute nothing here.
fn age_vs_views_score(video: &Video, now: DateTime<Utc>) -> u8 {
    let Some(age_days) = video.age_days(now) else {
        return 0;
    };
    let views = video.view_count;

    if age_days <= 30 {
        0
    } else if age_days > 180 {
        if views > 100_000 {
            15
        } else if views > 10_000 {
            5
        } else {
            0
        }
    } else if age_days > 90 {
        if views > 50_000 {
            10
        } else if views > 10_000 {
            3
        } else {
            0
        }
    } else if views > 10_000 {
        5
    } else {
        0
    }
}

fn engagement_score(video: &Video) -> u8 {
    let rate = video.engagement_rate();
    if rate > 0.05 {
        10
    } else if rate > 0.02 {
        5
    } else {
        0
    }
}

fn duration_score(duration_seconds: i64) -> u8 {
    if duration_seconds > 600 {
        5
    } else if duration_seconds > 120 {
        3
    } else if duration_seconds > 60 {
        1
    } else {
        0
    }
}

/// Never scanned is suspicious; repeatedly scanned clean is safe; a
/// confirmed infringement stays at maximum.
fn scan_history_score(video: &Video) -> u8 {
    let confirmed = video
        .analysis
        .as_ref()
        .map(|a| a.contains_infringement)
        .unwrap_or(false);
    if confirmed {
        return 5;
    }
    match video.scan_count {
        0 => 5,
        1 => 3,
        2 => 1,
        _ => 0,
    }
}
