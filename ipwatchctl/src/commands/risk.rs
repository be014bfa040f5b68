use clap::Args;

/// Rescore pending videos against the current risk model.
#[derive(Args, Debug, Clone)]
pub struct RiskRescoreArgs {
    /// Maximum videos to rescore in one pass
    #[arg(short = 'l', long, default_value_t = 500)]
    pub limit: usize,

    /// Also drain pending discovery and feedback events first
    #[arg(long)]
    pub drain_events: bool,
}

/// Show the stored risk breakdown for one video.
#[derive(Args, Debug, Clone)]
pub struct RiskShowArgs {
    /// Video id to inspect
    pub video_id: String,
}
