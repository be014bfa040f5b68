use clap::Args;

/// Run or preview a discovery cycle.
#[derive(Args, Debug, Clone)]
pub struct DiscoverRunArgs {
    /// Quota units this run may spend
    #[arg(short = 'q', long)]
    pub max_quota: Option<u32>,

    /// Restrict the run to these keywords instead of the configured IP set
    #[arg(short = 'k', long = "keyword")]
    pub keywords: Vec<String>,
}

/// Print the plan a run would execute, without spending quota.
#[derive(Args, Debug, Clone)]
pub struct DiscoverPlanArgs {
    /// Quota units to plan for
    #[arg(short = 'q', long)]
    pub max_quota: Option<u32>,
}
