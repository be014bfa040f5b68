use serde::Serialize;
use tracing::{debug, warn};

use crate::video::PriorityTier;

/// Token model for the vision backend: per-frame cost at low media
/// resolution plus a flat per-second audio charge.
pub const TOKENS_PER_FRAME: f64 = 66.0;
pub const TOKENS_PER_SECOND_AUDIO: f64 = 32.0;
const ESTIMATED_OUTPUT_TOKENS: u64 = 1_000;

const MIN_FPS: f64 = 0.05;
const MAX_FPS: f64 = 1.0;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScanConfig {
    pub fps: f64,
    pub start_offset_seconds: i64,
    pub end_offset_seconds: i64,
    pub frames_analyzed: u32,
    pub effective_duration_seconds: i64,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
    pub audio_per_1m: f64,
}

/// Derives the per-video analysis configuration: sampling rate, trim
/// offsets, and a cost estimate. The full video is always covered; longer
/// content is sampled less often, never truncated.
#[derive(Debug, Clone)]
pub struct ScanConfigCalculator {
    pub max_frames: u32,
    pub pricing: Pricing,
}

impl ScanConfigCalculator {
    pub fn new(max_frames: u32, pricing: Pricing) -> Self {
        Self { max_frames, pricing }
    }

    pub fn calculate(
        &self,
        video_id: &str,
        duration_seconds: i64,
        tier: PriorityTier,
        budget_remaining: f64,
        queue_size: usize,
    ) -> ScanConfig {
        let base_fps = self.base_fps(duration_seconds);
        let adjusted = base_fps * tier.fps_multiplier();
        let pressured = adjusted * budget_pressure(budget_remaining, queue_size);
        let mut fps = pressured.clamp(MIN_FPS, MAX_FPS);

        let (start_offset, end_offset) = trim_offsets(duration_seconds);
        let effective = (end_offset - start_offset).max(0);

        let predicted_frames = (fps * effective as f64) as u32;
        if predicted_frames > self.max_frames && effective > 0 {
            fps = self.max_frames as f64 / effective as f64;
            warn!(
                video_id,
                predicted_frames,
                max_frames = self.max_frames,
                fps = %format!("{fps:.4}"),
                "frame cap hit, reducing sampling rate"
            );
        }

        let frame_tokens = (fps * TOKENS_PER_FRAME * effective as f64) as u64;
        let audio_tokens = (TOKENS_PER_SECOND_AUDIO * effective as f64) as u64;
        let input_tokens = frame_tokens + audio_tokens;

        let frame_cost = frame_tokens as f64 / 1_000_000.0 * self.pricing.input_per_1m;
        let audio_cost = audio_tokens as f64 / 1_000_000.0 * self.pricing.audio_per_1m;
        let output_cost =
            ESTIMATED_OUTPUT_TOKENS as f64 / 1_000_000.0 * self.pricing.output_per_1m;
        let estimated_cost = if effective == 0 {
            0.0
        } else {
            frame_cost + audio_cost + output_cost
        };

        let config = ScanConfig {
            fps: (fps * 1000.0).round() / 1000.0,
            start_offset_seconds: start_offset,
            end_offset_seconds: end_offset,
            frames_analyzed: (fps * effective as f64) as u32,
            effective_duration_seconds: effective,
            estimated_input_tokens: input_tokens,
            estimated_output_tokens: ESTIMATED_OUTPUT_TOKENS,
            estimated_cost,
        };
        debug!(
            video_id,
            duration_seconds,
            tier = %tier,
            fps = config.fps,
            frames = config.frames_analyzed,
            cost = %format!("{:.4}", config.estimated_cost),
            "scan config calculated"
        );
        config
    }

    fn base_fps(&self, duration_seconds: i64) -> f64 {
        if duration_seconds <= 120 {
            1.0
        } else if duration_seconds <= 300 {
            0.5
        } else if duration_seconds <= 600 {
            0.33
        } else if duration_seconds <= 1_200 {
            0.25
        } else if duration_seconds <= 1_800 {
            0.2
        } else if duration_seconds <= 3_600 {
            0.1
        } else {
            (self.max_frames as f64 / duration_seconds as f64).max(0.01)
        }
    }

    /// Rough capacity estimate for one day of budget.
    pub fn estimate_videos_in_budget(&self, budget: f64, avg_duration_seconds: i64) -> usize {
        let config = self.calculate(
            "estimate",
            avg_duration_seconds,
            PriorityTier::Medium,
            budget,
            100,
        );
        if config.estimated_cost <= 0.0 {
            return 0;
        }
        (budget / config.estimated_cost) as usize
    }
}

/// Skip intro/outro branding; never cut the middle.
fn trim_offsets(duration_seconds: i64) -> (i64, i64) {
    if duration_seconds <= 30 {
        (0, duration_seconds)
    } else if duration_seconds <= 60 {
        (2, duration_seconds - 2)
    } else if duration_seconds <= 300 {
        (5, duration_seconds - 5)
    } else if duration_seconds <= 600 {
        (10, duration_seconds - 10)
    } else if duration_seconds <= 1_800 {
        (15, duration_seconds - 30)
    } else if duration_seconds <= 3_600 {
        (30, duration_seconds - 60)
    } else {
        (60, duration_seconds - 120)
    }
}

/// Stretch the remaining budget across the queue: the thinner the per-video
/// allowance, the lower the sampling rate.
fn budget_pressure(budget_remaining: f64, queue_size: usize) -> f64 {
    if budget_remaining <= 0.0 {
        return 0.5;
    }
    let per_video = budget_remaining / queue_size.max(1) as f64;
    if per_video < 0.05 {
        0.5
    } else if per_video < 0.10 {
        0.75
    } else {
        1.0
    }
}
