pub mod channel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod ipconfig;
pub mod risk;
mod sqlite;
pub mod stats;
pub mod video;
pub mod vision;

pub use channel::{Channel, ChannelError, ChannelStore, ScanStatDelta};
pub use config::{
    load_ipwatch_config, DiscoverySection, IpwatchConfig, PathsSection, SystemSection,
    VisionSection,
};
pub use discovery::{
    BatchOutcome, ChannelCandidate, DiscoveryEngine, DiscoveryError, DiscoveryStats,
    HistoryError, HttpSearchClient, KeywordOutcome, PlanInputs, PlannedQuery, ProcessorError,
    QuotaError, QuotaManager, QuotaOp, SearchClient, SearchError, SearchHistoryStore,
    SearchOrdering, SearchPlan, SearchPlanner, TimeWindow, VideoProcessor,
};
pub use error::{ConfigError, Result};
pub use events::{
    EventError, EventQueue, EventRecord, FeedbackMessage, ScanMessage,
    VideoEnvelope, TOPIC_SCAN_READY, TOPIC_VIDEO_DISCOVERED, TOPIC_VISION_FEEDBACK,
};
pub use ipconfig::{IpConfig, IpConfigError, IpConfigStore, IpMatcher, IpPriority};
pub use risk::{
    channel_risk, scan_priority, tier_of, trending_score, video_risk, ChannelRiskFactors,
    RescoreOutcome, RiskEngine, RiskError, VideoRiskFactors, ViewVelocity, ViewVelocityTracker,
};
pub use stats::{HourlyStats, StatsError, StatsStore, SystemStats};
pub use video::{
    AnalysisSummary, PriorityTier, Video, VideoError, VideoStatus, VideoStore, VideoStoreBuilder,
};
pub use vision::{
    analyze_with_retry, parse_analysis, recover_interrupted_scans, AnalysisRequest,
    AppliedResult, BudgetError, BudgetManager, BudgetStats, CharacterDetection,
    CompletedAnalysis, DispatchError, DispatchOutcome, DispatcherConfig, DrainReport,
    HttpVisionClient, IpAnalysis, Pricing, PromptBuilder, RawModelResponse, RecommendedAction,
    RecoveryReport, ResultError, ResultProcessor, ScanConfig, ScanConfigCalculator,
    ScanHistoryError, ScanHistoryStore, ScanRecord, ScanStatus, UsageMetadata, VisionAnalysis,
    VisionClient, VisionDispatcher, VisionError,
};
