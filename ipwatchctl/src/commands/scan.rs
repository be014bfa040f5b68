use clap::Args;

/// Drain the scan-ready queue through the vision dispatcher.
#[derive(Args, Debug, Clone)]
pub struct ScanDrainArgs {
    /// Maximum messages to pull per drain pass
    #[arg(short = 'l', long, default_value_t = 100)]
    pub limit: usize,

    /// Keep draining until the queue is empty or the budget runs out
    #[arg(long)]
    pub until_empty: bool,
}

/// Enqueue the top unscanned videos for analysis.
#[derive(Args, Debug, Clone)]
pub struct ScanEnqueueArgs {
    /// Maximum videos to enqueue
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,
}
