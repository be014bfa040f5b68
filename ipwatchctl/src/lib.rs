mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use commands::discover::{DiscoverPlanArgs, DiscoverRunArgs};
use commands::risk::{RiskRescoreArgs, RiskShowArgs};
use commands::scan::{ScanDrainArgs, ScanEnqueueArgs};
use thiserror::Error;
use tokio::runtime::Builder;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

use ipwatch_core::{
    load_ipwatch_config, BudgetManager, ChannelStore, DiscoveryEngine, DispatcherConfig,
    EventQueue, HttpSearchClient, HttpVisionClient, IpConfigStore, IpMatcher, IpwatchConfig,
    Pricing, QuotaManager, ResultProcessor, RiskEngine, ScanConfigCalculator, ScanHistoryStore,
    SearchPlanner, StatsStore, VideoProcessor, VideoStore, VisionDispatcher,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ipwatch_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("video store error: {0}")]
    Video(#[from] ipwatch_core::VideoError),
    #[error("channel store error: {0}")]
    Channel(#[from] ipwatch_core::ChannelError),
    #[error("ip config error: {0}")]
    IpConfig(#[from] ipwatch_core::IpConfigError),
    #[error("history error: {0}")]
    History(#[from] ipwatch_core::HistoryError),
    #[error("quota error: {0}")]
    Quota(#[from] ipwatch_core::QuotaError),
    #[error("budget error: {0}")]
    Budget(#[from] ipwatch_core::BudgetError),
    #[error("scan history error: {0}")]
    ScanHistory(#[from] ipwatch_core::ScanHistoryError),
    #[error("stats error: {0}")]
    Stats(#[from] ipwatch_core::StatsError),
    #[error("event queue error: {0}")]
    Event(#[from] ipwatch_core::EventError),
    #[error("discovery error: {0}")]
    Discovery(#[from] ipwatch_core::DiscoveryError),
    #[error("risk error: {0}")]
    Risk(#[from] ipwatch_core::RiskError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] ipwatch_core::DispatchError),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "ipwatch pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to the main ipwatch.toml
    #[arg(long, default_value = "configs/ipwatch.toml")]
    pub config: PathBuf,
    /// Override for the data directory (store files live here)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discovery runs and plan previews
    #[command(subcommand)]
    Discover(DiscoverCommands),
    /// Vision dispatcher operations
    #[command(subcommand)]
    Scan(ScanCommands),
    /// Risk engine operations
    #[command(subcommand)]
    Risk(RiskCommands),
    /// Store management and status
    #[command(subcommand)]
    Ops(OpsCommands),
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum DiscoverCommands {
    /// Execute a discovery run under the daily quota
    Run(DiscoverRunArgs),
    /// Show the plan a run would execute
    Plan(DiscoverPlanArgs),
}

#[derive(Subcommand, Debug)]
pub enum ScanCommands {
    /// Drain pending scan-ready messages
    Drain(ScanDrainArgs),
    /// Run the startup recovery sweep
    Recover,
    /// Enqueue top unscanned videos for analysis
    Enqueue(ScanEnqueueArgs),
}

#[derive(Subcommand, Debug)]
pub enum RiskCommands {
    /// Rescore pending videos
    Rescore(RiskRescoreArgs),
    /// Show one video's risk state
    Show(RiskShowArgs),
}

#[derive(Subcommand, Debug)]
pub enum OpsCommands {
    /// Create or migrate every store
    Init,
    /// Show quota, budget, and pipeline status
    Status,
    /// Validate the configuration file
    ConfigCheck,
}

struct App {
    config: IpwatchConfig,
    format: OutputFormat,
}

impl App {
    fn store_path(&self, file: &str) -> PathBuf {
        self.config.paths.store_path(file)
    }

    fn videos(&self) -> Result<VideoStore> {
        Ok(VideoStore::builder()
            .path(self.store_path("videos.sqlite"))
            .build()?)
    }

    fn channels(&self) -> Result<ChannelStore> {
        Ok(ChannelStore::new(self.store_path("channels.sqlite"))?)
    }

    fn ip_configs(&self) -> Result<IpConfigStore> {
        Ok(IpConfigStore::new(self.store_path("ip_configs.sqlite"))?)
    }

    fn history(&self) -> Result<ipwatch_core::SearchHistoryStore> {
        Ok(ipwatch_core::SearchHistoryStore::new(
            self.store_path("history.sqlite"),
        )?)
    }

    fn quota(&self) -> Result<Arc<QuotaManager>> {
        Ok(Arc::new(QuotaManager::new(
            self.store_path("quota.sqlite"),
            self.config.discovery.daily_quota_units,
        )?))
    }

    fn budget(&self) -> Result<Arc<BudgetManager>> {
        Ok(Arc::new(BudgetManager::new(
            self.store_path("budget.sqlite"),
            self.config.vision.daily_budget_eur,
        )?))
    }

    fn scans(&self) -> Result<ScanHistoryStore> {
        Ok(ScanHistoryStore::new(self.store_path("scans.sqlite"))?)
    }

    fn stats(&self) -> Result<StatsStore> {
        Ok(StatsStore::new(self.store_path("stats.sqlite"))?)
    }

    fn events(&self) -> Result<EventQueue> {
        Ok(EventQueue::new(self.store_path("events.sqlite"))?)
    }

    fn matcher(&self) -> Result<IpMatcher> {
        Ok(IpMatcher::new(self.ip_configs()?.list_active()?))
    }

    fn discovery_engine(&self) -> Result<DiscoveryEngine> {
        let videos = self.videos()?;
        let channels = self.channels()?;
        let events = self.events()?;
        let processor = VideoProcessor::new(
            videos.clone(),
            channels,
            self.matcher()?,
            events.clone(),
        );
        let search = Arc::new(HttpSearchClient::new(
            self.config.discovery.search_endpoint.clone(),
            self.config.discovery.search_api_key.clone(),
        ));
        let planner = SearchPlanner::new(
            self.config.discovery.channel_scan_slots,
            self.config.discovery.channel_rescan_days,
        );
        Ok(DiscoveryEngine::new(
            search,
            processor,
            self.quota()?,
            self.history()?,
            planner,
            videos,
            events,
            self.config.discovery.max_videos_to_scan,
        ))
    }

    fn risk_engine(&self) -> Result<RiskEngine> {
        Ok(RiskEngine::new(
            self.videos()?,
            self.channels()?,
            self.matcher()?,
            self.events()?,
        ))
    }

    fn dispatcher(&self) -> Result<Arc<VisionDispatcher>> {
        let vision = &self.config.vision;
        let budget = self.budget()?;
        let calculator = ScanConfigCalculator::new(
            vision.max_frames,
            Pricing {
                input_per_1m: vision.input_price_per_1m,
                output_per_1m: vision.output_price_per_1m,
                audio_per_1m: vision.audio_price_per_1m,
            },
        );
        let client = Arc::new(HttpVisionClient::new(
            vision.endpoint.clone(),
            vision.model_name.clone(),
            vision.model_region.clone(),
        ));
        let results = Arc::new(ResultProcessor::new(
            self.videos()?,
            self.channels()?,
            self.stats()?,
            self.events()?,
        ));
        Ok(Arc::new(VisionDispatcher::new(
            self.events()?,
            self.videos()?,
            self.ip_configs()?,
            self.scans()?,
            budget,
            calculator,
            client,
            results,
            DispatcherConfig {
                minimum_scan_priority: vision.minimum_scan_priority,
                worker_slots: vision.worker_slots,
                model_name: vision.model_name.clone(),
                temperature: vision.temperature,
                max_output_tokens: vision.max_output_tokens,
            },
        )))
    }

    fn emit<T: serde::Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => println!("{}", text(value)),
        }
        Ok(())
    }
}

pub fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Completions { .. }) {
        if let Commands::Completions { shell } = cli.command {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            generate(shell, &mut command, name, &mut std::io::stdout());
        }
        return Ok(());
    }

    tracing_fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config = load_ipwatch_config(&cli.config)?;
    if let Some(data_dir) = &cli.data_dir {
        config.paths.data_dir = data_dir.display().to_string();
    }

    let app = App {
        config,
        format: cli.format,
    };

    match cli.command {
        Commands::Discover(command) => run_discover(&app, command),
        Commands::Scan(command) => run_scan(&app, command),
        Commands::Risk(command) => run_risk(&app, command),
        Commands::Ops(command) => run_ops(&app, command),
        Commands::Completions { .. } => Ok(()),
    }
}

fn run_discover(app: &App, command: DiscoverCommands) -> Result<()> {
    match command {
        DiscoverCommands::Run(args) => {
            let engine = app.discovery_engine()?;
            let max_quota = args
                .max_quota
                .unwrap_or(app.config.discovery.daily_quota_units);
            let keywords = if args.keywords.is_empty() {
                None
            } else {
                Some(args.keywords.clone())
            };
            let runtime = Builder::new_multi_thread().enable_all().build()?;
            let stats = runtime.block_on(engine.run(max_quota, keywords.as_deref()))?;
            app.emit(&stats, |stats| {
                format!(
                    "discovery complete: {} new, {} rediscovered, {} skipped, {} channels, \
                     {} quota units, {} enqueued, {:.1}s",
                    stats.videos_discovered,
                    stats.videos_rediscovered,
                    stats.videos_skipped,
                    stats.unique_channels,
                    stats.quota_used,
                    stats.enqueued_for_scan,
                    stats.duration_seconds,
                )
            })
        }
        DiscoverCommands::Plan(args) => {
            let engine = app.discovery_engine()?;
            let max_quota = args
                .max_quota
                .unwrap_or(app.config.discovery.daily_quota_units);
            let plan = engine.preview_plan(max_quota)?;
            app.emit(&plan, |plan| {
                format!(
                    "plan: {} queries ({} channel scans + {} keyword queries), {} quota units",
                    plan.entries.len(),
                    plan.channel_scans,
                    plan.keyword_queries,
                    plan.planned_quota,
                )
            })
        }
    }
}

fn run_scan(app: &App, command: ScanCommands) -> Result<()> {
    match command {
        ScanCommands::Drain(args) => {
            let dispatcher = app.dispatcher()?;
            // Every worker sweeps interrupted scans before taking new work.
            dispatcher.recover()?;
            let runtime = Builder::new_multi_thread().enable_all().build()?;
            let mut totals = (0usize, 0usize, 0usize);
            runtime.block_on(async {
                loop {
                    let report = dispatcher.drain(args.limit).await?;
                    totals.0 += report.analyzed;
                    totals.1 += report.skipped;
                    totals.2 += report.failed;
                    if !args.until_empty || report.received == 0 {
                        break;
                    }
                }
                Ok::<(), AppError>(())
            })?;
            let (analyzed, skipped, failed) = totals;
            match app.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "analyzed": analyzed,
                        "skipped": skipped,
                        "failed": failed,
                    })
                ),
                OutputFormat::Text => println!(
                    "drain complete: {analyzed} analyzed, {skipped} skipped, {failed} failed"
                ),
            }
            Ok(())
        }
        ScanCommands::Recover => {
            let dispatcher = app.dispatcher()?;
            let report = dispatcher.recover()?;
            match app.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "scans_failed": report.scans_failed,
                        "videos_reset": report.videos_reset,
                        "skipped": report.skipped,
                    })
                ),
                OutputFormat::Text => println!(
                    "recovery: {} scans failed, {} videos reset, {} skipped",
                    report.scans_failed, report.videos_reset, report.skipped
                ),
            }
            Ok(())
        }
        ScanCommands::Enqueue(args) => {
            let engine = app.discovery_engine()?;
            let limit = args
                .limit
                .unwrap_or(app.config.discovery.max_videos_to_scan);
            let enqueued = engine.enqueue_top_unscanned(limit)?;
            println!("enqueued {enqueued} videos");
            Ok(())
        }
    }
}

fn run_risk(app: &App, command: RiskCommands) -> Result<()> {
    match command {
        RiskCommands::Rescore(args) => {
            let engine = app.risk_engine()?;
            if args.drain_events {
                let discovered = engine.drain_discovered(args.limit)?;
                let feedback = engine.drain_feedback(args.limit)?;
                println!(
                    "events drained: {} discovered, {} feedback",
                    discovered.processed, feedback.processed
                );
            }
            let outcome = engine.rescore_batch(args.limit)?;
            println!(
                "rescored {} videos, {} updated",
                outcome.processed, outcome.updated
            );
            Ok(())
        }
        RiskCommands::Show(args) => {
            let videos = app.videos()?;
            let video = videos
                .fetch(&args.video_id)?
                .ok_or_else(|| AppError::MissingResource(args.video_id.clone()))?;
            match app.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "video_id": video.video_id,
                        "status": video.status.as_str(),
                        "initial_risk": video.initial_risk,
                        "current_risk": video.current_risk,
                        "video_risk": video.video_risk,
                        "channel_risk": video.channel_risk,
                        "scan_priority": video.scan_priority,
                        "priority_tier": video.priority_tier.as_str(),
                        "scan_count": video.scan_count,
                        "view_velocity": video.view_velocity,
                        "matched_ips": video.matched_ips,
                    })
                ),
                OutputFormat::Text => {
                    println!("video:        {}", video.video_id);
                    println!("status:       {}", video.status);
                    println!("tier:         {}", video.priority_tier);
                    println!("scan priority {}", video.scan_priority);
                    println!(
                        "risk          initial={} current={} video={} channel={}",
                        video.initial_risk, video.current_risk, video.video_risk, video.channel_risk
                    );
                    println!("scans         {}", video.scan_count);
                    println!("matched ips   {}", video.matched_ips.join(", "));
                }
            }
            Ok(())
        }
    }
}

fn run_ops(app: &App, command: OpsCommands) -> Result<()> {
    match command {
        OpsCommands::Init => {
            std::fs::create_dir_all(&app.config.paths.data_dir)?;
            app.videos()?.initialize()?;
            app.channels()?.initialize()?;
            app.ip_configs()?.initialize()?;
            app.history()?.initialize()?;
            app.quota()?.initialize()?;
            app.budget()?.initialize()?;
            app.scans()?.initialize()?;
            app.stats()?.initialize()?;
            app.events()?.initialize()?;
            println!("stores initialized under {}", app.config.paths.data_dir);
            Ok(())
        }
        OpsCommands::Status => {
            let quota = app.quota()?.status()?;
            let budget = app.budget()?.stats()?;
            let system = app.stats()?.system()?;
            let by_status = app.videos()?.count_by_status()?;
            match app.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "quota": quota,
                        "budget": budget,
                        "system": system,
                        "videos_by_status": by_status,
                    }))?
                ),
                OutputFormat::Text => {
                    println!(
                        "quota   {}/{} units ({:.1}%)",
                        quota.used, quota.daily_quota, quota.utilization
                    );
                    println!(
                        "budget  {:.2}/{:.2} EUR ({} videos today)",
                        budget.total_spent_eur, budget.daily_budget_eur, budget.videos_analyzed
                    );
                    println!(
                        "system  {} analyzed, {} infringements",
                        system.total_analyzed, system.total_infringements
                    );
                    let mut statuses: Vec<_> = by_status.iter().collect();
                    statuses.sort();
                    for (status, count) in statuses {
                        println!("videos  {status}: {count}");
                    }
                }
            }
            Ok(())
        }
        OpsCommands::ConfigCheck => {
            app.config.validate()?;
            println!(
                "config ok: node={} quota={} budget={:.0} EUR model={}",
                app.config.system.node_name,
                app.config.discovery.daily_quota_units,
                app.config.vision.daily_budget_eur,
                app.config.vision.model_name,
            );
            Ok(())
        }
    }
}
