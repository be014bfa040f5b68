pub mod budget;
pub mod client;
pub mod config_calc;
pub mod prompt;
pub mod recovery;
pub mod results;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventError, EventQueue, ScanMessage, TOPIC_SCAN_READY};
use crate::ipconfig::{IpConfig, IpConfigError, IpConfigStore};
use crate::video::{VideoError, VideoStore};

pub use budget::{BudgetError, BudgetManager, BudgetStats};
pub use client::{
    analyze_with_retry, parse_analysis, AnalysisRequest, CharacterDetection, HttpVisionClient,
    IpAnalysis, RawModelResponse, RecommendedAction, UsageMetadata, VisionAnalysis, VisionClient,
    VisionError,
};
pub use config_calc::{Pricing, ScanConfig, ScanConfigCalculator};
pub use prompt::PromptBuilder;
pub use recovery::{
    recover_interrupted_scans, RecoveryReport, ScanHistoryError, ScanHistoryStore, ScanRecord,
    ScanStatus,
};
pub use results::{AppliedResult, CompletedAnalysis, ResultError, ResultProcessor};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("event queue error: {0}")]
    Event(#[from] EventError),
    #[error("video store error: {0}")]
    Video(#[from] VideoError),
    #[error("ip config error: {0}")]
    IpConfig(#[from] IpConfigError),
    #[error("budget error: {0}")]
    Budget(#[from] BudgetError),
    #[error("scan history error: {0}")]
    ScanHistory(#[from] ScanHistoryError),
    #[error("result processing error: {0}")]
    Result(#[from] ResultError),
    #[error("vision error: {0}")]
    Vision(#[from] VisionError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Analyzed,
    SkippedLowPriority,
    SkippedNotOwned,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DrainReport {
    pub received: usize,
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub minimum_scan_priority: u8,
    pub worker_slots: usize,
    pub model_name: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// Pulls scan-ready messages, enforces the daily budget, invokes the vision
/// model, and hands results to the aggregate protocol. Each worker owns
/// exactly one in-flight scan; redeliveries bounce off the status check.
pub struct VisionDispatcher {
    events: EventQueue,
    videos: VideoStore,
    ip_configs: IpConfigStore,
    scans: ScanHistoryStore,
    budget: Arc<BudgetManager>,
    calculator: ScanConfigCalculator,
    prompts: PromptBuilder,
    client: Arc<dyn VisionClient>,
    results: Arc<ResultProcessor>,
    config: DispatcherConfig,
}

impl VisionDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: EventQueue,
        videos: VideoStore,
        ip_configs: IpConfigStore,
        scans: ScanHistoryStore,
        budget: Arc<BudgetManager>,
        calculator: ScanConfigCalculator,
        client: Arc<dyn VisionClient>,
        results: Arc<ResultProcessor>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            events,
            videos,
            ip_configs,
            scans,
            budget,
            calculator,
            prompts: PromptBuilder::new(),
            client,
            results,
            config,
        }
    }

    /// Run the startup recovery sweep. Every worker calls this once before
    /// consuming messages.
    pub fn recover(&self) -> DispatchResult<RecoveryReport> {
        Ok(recover_interrupted_scans(&self.scans, &self.videos)?)
    }

    /// Drain up to `limit` pending scan-ready messages through the bounded
    /// worker pool. Messages are acked in every terminal path.
    pub async fn drain(self: &Arc<Self>, limit: usize) -> DispatchResult<DrainReport> {
        let records = self.events.poll(TOPIC_SCAN_READY, limit)?;
        if records.is_empty() {
            debug!("scan-ready queue empty");
            return Ok(DrainReport::default());
        }

        let queue_size = records.len();
        let semaphore = Arc::new(Semaphore::new(self.config.worker_slots.max(1)));
        let mut handles = Vec::with_capacity(records.len());

        for record in records {
            let dispatcher = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let outcome = match record.decode::<ScanMessage>() {
                    Ok(message) => dispatcher.handle_message(&message, queue_size).await,
                    Err(err) => {
                        warn!(event_id = record.id, error = %err, "undecodable scan message");
                        DispatchOutcome::Failed
                    }
                };
                if let Err(err) = dispatcher.events.ack(record.id) {
                    warn!(event_id = record.id, error = %err, "failed to ack message");
                }
                Some(outcome)
            }));
        }

        let mut report = DrainReport {
            received: queue_size,
            ..DrainReport::default()
        };
        for handle in handles {
            match handle.await {
                Ok(Some(DispatchOutcome::Analyzed)) => report.analyzed += 1,
                Ok(Some(DispatchOutcome::Failed)) => report.failed += 1,
                Ok(Some(_)) => report.skipped += 1,
                Ok(None) => {}
                Err(err) => warn!(error = %err, "worker task aborted"),
            }
        }

        info!(
            received = report.received,
            analyzed = report.analyzed,
            skipped = report.skipped,
            failed = report.failed,
            "drain complete"
        );
        Ok(report)
    }

    pub async fn handle_message(
        &self,
        message: &ScanMessage,
        queue_size: usize,
    ) -> DispatchOutcome {
        let video_id = message.video_id.clone();

        if message.metadata.scan_priority < self.config.minimum_scan_priority {
            info!(
                video_id = %video_id,
                priority = message.metadata.scan_priority,
                minimum = self.config.minimum_scan_priority,
                "below minimum scan priority, skipping"
            );
            let reason = format!(
                "scan_priority {} < minimum {}",
                message.metadata.scan_priority, self.config.minimum_scan_priority
            );
            if let Err(err) = self.videos.mark_skipped_low_priority(&video_id, &reason) {
                warn!(video_id = %video_id, error = %err, "failed to mark skipped");
            }
            return DispatchOutcome::SkippedLowPriority;
        }

        // Single-delivery token: whoever flips discovered→processing owns
        // the scan. A redelivered or raced message lands here and leaves.
        match self.videos.begin_processing(&video_id, Utc::now()) {
            Ok(true) => {}
            Ok(false) => {
                debug!(video_id = %video_id, "not in discovered state, skipping delivery");
                return DispatchOutcome::SkippedNotOwned;
            }
            Err(err) => {
                warn!(video_id = %video_id, error = %err, "failed to claim video");
                return DispatchOutcome::Failed;
            }
        }

        let scan_id = Uuid::new_v4().to_string();
        if let Err(err) = self.scans.open_scan(&scan_id, &video_id, Utc::now()) {
            warn!(video_id = %video_id, error = %err, "failed to open scan record");
        }

        match self.analyze(message, queue_size).await {
            Ok(()) => {
                if let Err(err) =
                    self.scans
                        .close_scan(&scan_id, ScanStatus::Completed, None, None)
                {
                    warn!(scan_id = %scan_id, error = %err, "failed to close scan record");
                }
                DispatchOutcome::Analyzed
            }
            Err(err) => {
                let kind = error_kind(&err);
                let message_text = err.to_string();
                warn!(video_id = %video_id, kind, error = %message_text, "scan failed");
                if let Err(store_err) = self.videos.mark_failed(&video_id, &message_text, kind) {
                    warn!(video_id = %video_id, error = %store_err, "failed to mark video failed");
                }
                if let Err(store_err) = self.scans.close_scan(
                    &scan_id,
                    ScanStatus::Failed,
                    Some(&message_text),
                    Some(kind),
                ) {
                    warn!(scan_id = %scan_id, error = %store_err, "failed to close scan record");
                }
                DispatchOutcome::Failed
            }
        }
    }

    async fn analyze(&self, message: &ScanMessage, queue_size: usize) -> DispatchResult<()> {
        let started = Instant::now();
        let metadata = &message.metadata;

        let configs = self.load_configs(&metadata.matched_ips)?;
        if configs.is_empty() {
            return Err(DispatchError::IpConfig(IpConfigError::NotFound(format!(
                "no ip configs for matched_ips {:?}",
                metadata.matched_ips
            ))));
        }

        let remaining = self.budget.remaining()?;
        let scan_config = self.calculator.calculate(
            &metadata.video_id,
            metadata.duration_seconds,
            metadata.risk_tier,
            remaining,
            queue_size,
        );

        if !self.budget.can_afford(scan_config.estimated_cost)? {
            return Err(DispatchError::Budget(BudgetError::Exhausted {
                estimated: scan_config.estimated_cost,
                remaining,
            }));
        }
        self.budget.enforce_rate_limit().await;

        let prompt = self.prompts.build(metadata, &configs);
        let request = AnalysisRequest {
            video_url: metadata.url.clone(),
            prompt,
            fps: scan_config.fps,
            start_offset_seconds: scan_config.start_offset_seconds,
            end_offset_seconds: scan_config.end_offset_seconds,
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        };

        let (analysis, usage) = analyze_with_retry(self.client.as_ref(), &request).await?;

        let pricing = self.calculator.pricing;
        let cost = usage.prompt_tokens as f64 / 1_000_000.0 * pricing.input_per_1m
            + usage.candidate_tokens as f64 / 1_000_000.0 * pricing.output_per_1m;

        self.budget.record_usage(
            &metadata.video_id,
            cost,
            usage.prompt_tokens,
            usage.candidate_tokens,
        )?;

        let completed = CompletedAnalysis {
            video_id: metadata.video_id.clone(),
            analysis,
            model: self.config.model_name.clone(),
            analyzed_at: Utc::now(),
            cost,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.candidate_tokens,
            processing_seconds: started.elapsed().as_secs_f64(),
        };
        self.results.process(&completed)?;

        info!(
            video_id = %metadata.video_id,
            cost = %format!("{cost:.4}"),
            seconds = %format!("{:.1}", completed.processing_seconds),
            "analysis complete"
        );
        Ok(())
    }

    fn load_configs(&self, matched_ips: &[String]) -> DispatchResult<Vec<IpConfig>> {
        let mut configs = Vec::new();
        for ip_id in matched_ips {
            match self.ip_configs.fetch(ip_id)? {
                Some(config) if config.is_active() => configs.push(config),
                Some(_) => debug!(ip_id = %ip_id, "config disabled or deleted, skipping"),
                None => warn!(ip_id = %ip_id, "matched config not found"),
            }
        }
        Ok(configs)
    }
}

fn error_kind(err: &DispatchError) -> &'static str {
    match err {
        DispatchError::Vision(vision) => vision.kind(),
        DispatchError::Budget(_) => "budget_exhausted",
        DispatchError::IpConfig(_) => "config_missing",
        DispatchError::Video(_) => "store",
        DispatchError::Event(_) => "transport",
        DispatchError::ScanHistory(_) => "store",
        DispatchError::Result(_) => "store",
    }
}
