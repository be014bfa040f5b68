use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use ipwatch_core::{
    analyze_with_retry, AnalysisRequest, BudgetManager, ChannelStore, DispatcherConfig,
    EventQueue, IpConfig, IpConfigStore, IpPriority, PriorityTier, Pricing, RawModelResponse,
    ResultProcessor, ScanConfigCalculator, ScanHistoryStore, ScanMessage, StatsStore,
    UsageMetadata, Video, VideoEnvelope, VideoStatus, VideoStore, VisionClient, VisionDispatcher,
    VisionError, TOPIC_SCAN_READY, TOPIC_VISION_FEEDBACK,
};

fn valid_result(action: &str, contains: bool) -> String {
    format!(
        r#"{{
            "ip_results": [{{
                "ip_id": "superman",
                "ip_name": "Superman",
                "contains_infringement": {contains},
                "characters_detected": [{{
                    "name": "Superman",
                    "screen_time_seconds": 120.0,
                    "prominence": "primary",
                    "timestamps": ["0:10"],
                    "description": "flying scene"
                }}],
                "is_ai_generated": true,
                "ai_tools_detected": ["Sora"],
                "fair_use_applies": false,
                "fair_use_reasoning": "",
                "content_type": "full_movie",
                "infringement_likelihood": 92,
                "reasoning": "",
                "recommended_action": "{action}"
            }}],
            "overall_recommendation": "{action}",
            "overall_notes": ""
        }}"#
    )
}

enum MockBehavior {
    Succeed { action: &'static str, contains: bool },
    PermissionDenied,
    GarbageThenSucceed { garbage_count: usize },
    RateLimitThenSucceed { limited_count: usize },
}

struct MockVision {
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockVision {
    fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VisionClient for MockVision {
    async fn invoke(&self, _request: &AnalysisRequest) -> Result<RawModelResponse, VisionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let usage = UsageMetadata {
            prompt_tokens: 10_000,
            candidate_tokens: 500,
        };
        match &self.behavior {
            MockBehavior::Succeed { action, contains } => Ok(RawModelResponse {
                text: valid_result(action, *contains),
                usage,
            }),
            MockBehavior::PermissionDenied => Err(VisionError::PermissionDenied(
                "video not accessible".to_string(),
            )),
            MockBehavior::GarbageThenSucceed { garbage_count } => {
                if call < *garbage_count {
                    Ok(RawModelResponse {
                        text: "not json".to_string(),
                        usage,
                    })
                } else {
                    Ok(RawModelResponse {
                        text: valid_result("immediate_takedown", true),
                        usage,
                    })
                }
            }
            MockBehavior::RateLimitThenSucceed { limited_count } => {
                if call < *limited_count {
                    Err(VisionError::RateLimited("slow down".to_string()))
                } else {
                    Ok(RawModelResponse {
                        text: valid_result("immediate_takedown", true),
                        usage,
                    })
                }
            }
        }
    }
}

struct Harness {
    dispatcher: Arc<VisionDispatcher>,
    videos: VideoStore,
    channels: ChannelStore,
    scans: ScanHistoryStore,
    events: EventQueue,
    budget: Arc<BudgetManager>,
}

fn harness(dir: &Path, behavior: MockBehavior, daily_budget: f64, min_priority: u8) -> Harness {
    let videos = VideoStore::new(dir.join("videos.sqlite")).expect("video store");
    videos.initialize().expect("init videos");
    let channels = ChannelStore::new(dir.join("channels.sqlite")).expect("channel store");
    channels.initialize().expect("init channels");
    let ip_configs = IpConfigStore::new(dir.join("ip_configs.sqlite")).expect("ip store");
    ip_configs.initialize().expect("init ip configs");
    let scans = ScanHistoryStore::new(dir.join("scans.sqlite")).expect("scan store");
    scans.initialize().expect("init scans");
    let stats = StatsStore::new(dir.join("stats.sqlite")).expect("stats store");
    stats.initialize().expect("init stats");
    let events = EventQueue::new(dir.join("events.sqlite")).expect("event queue");
    events.initialize().expect("init events");
    let budget =
        Arc::new(BudgetManager::new(dir.join("budget.sqlite"), daily_budget).expect("budget"));
    budget.initialize().expect("init budget");

    ip_configs
        .upsert(&IpConfig {
            ip_id: "superman".into(),
            name: "Superman".into(),
            owner: "Studio".into(),
            priority: IpPriority::High,
            characters: vec!["Superman".into()],
            visual_markers: vec!["red cape".into()],
            ai_tool_patterns: vec!["sora".into()],
            false_positive_filters: vec![],
            keywords_high: vec!["superman ai movie".into()],
            keywords_medium: vec![],
            keywords_low: vec![],
            enabled: true,
            deleted: false,
        })
        .expect("seed config");

    let results = Arc::new(ResultProcessor::new(
        videos.clone(),
        channels.clone(),
        stats,
        events.clone(),
    ));
    let calculator = ScanConfigCalculator::new(
        300,
        Pricing {
            input_per_1m: 0.30,
            output_per_1m: 2.50,
            audio_per_1m: 0.30,
        },
    );
    let dispatcher = Arc::new(VisionDispatcher::new(
        events.clone(),
        videos.clone(),
        ip_configs,
        scans.clone(),
        Arc::clone(&budget),
        calculator,
        Arc::new(MockVision::new(behavior)),
        results,
        DispatcherConfig {
            minimum_scan_priority: min_priority,
            worker_slots: 2,
            model_name: "vision-flash-2.5".into(),
            temperature: 0.1,
            max_output_tokens: 20_000,
        },
    ));
    Harness {
        dispatcher,
        videos,
        channels,
        scans,
        events,
        budget,
    }
}

fn seed_and_publish(h: &Harness, video_id: &str, scan_priority: u8) {
    let video = Video {
        video_id: video_id.into(),
        title: "Superman AI movie".into(),
        description: "full film".into(),
        tags: vec![],
        channel_id: "ch1".into(),
        channel_title: "Channel".into(),
        published_at: Some(Utc::now()),
        duration_seconds: 300,
        view_count: 1_000,
        like_count: 50,
        comment_count: 5,
        thumbnail_url: None,
        matched_ips: vec!["superman".into()],
        status: VideoStatus::Discovered,
        initial_risk: scan_priority,
        current_risk: scan_priority,
        video_risk: scan_priority,
        channel_risk: 0,
        scan_priority,
        priority_tier: PriorityTier::from_priority(scan_priority),
        scan_count: 0,
        view_velocity: 0.0,
        discovered_at: Some(Utc::now()),
        vision_triggered_at: Some(Utc::now()),
        processing_started_at: None,
        last_analyzed_at: None,
        last_risk_update: None,
        analysis: None,
        error_message: None,
        error_kind: None,
        deleted: false,
    };
    h.videos.upsert(&video).expect("seed video");

    let message = ScanMessage {
        video_id: video_id.into(),
        priority: scan_priority,
        metadata: VideoEnvelope {
            video_id: video_id.into(),
            url: format!("https://youtube.com/watch?v={video_id}"),
            title: video.title.clone(),
            duration_seconds: video.duration_seconds,
            view_count: video.view_count,
            channel_id: video.channel_id.clone(),
            channel_title: video.channel_title.clone(),
            risk_score: scan_priority,
            risk_tier: PriorityTier::from_priority(scan_priority),
            matched_ips: video.matched_ips.clone(),
            discovered_at: Utc::now(),
            scan_priority,
        },
    };
    h.events
        .publish_json(TOPIC_SCAN_READY, &message)
        .expect("publish scan message");
}

#[tokio::test]
async fn successful_scan_updates_everything() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        dir.path(),
        MockBehavior::Succeed {
            action: "immediate_takedown",
            contains: true,
        },
        260.0,
        0,
    );
    seed_and_publish(&h, "v1", 75);

    let report = h.dispatcher.drain(10).await.unwrap();
    assert_eq!(report.analyzed, 1);
    assert_eq!(report.failed, 0);

    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Analyzed);
    assert_eq!(video.scan_count, 1);
    let analysis = video.analysis.expect("analysis stored");
    assert!(analysis.contains_infringement);
    assert_eq!(analysis.overall_recommendation, "immediate_takedown");

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(channel.videos_scanned, 1);
    assert_eq!(channel.confirmed_infringements, 1);

    // 10k prompt tokens and 500 output tokens at the test pricing.
    let spent = h.budget.daily_total().unwrap();
    assert!((spent - 0.00425).abs() < 1e-9);

    assert_eq!(h.events.pending(TOPIC_VISION_FEEDBACK).unwrap(), 1);
    assert_eq!(h.events.pending(TOPIC_SCAN_READY).unwrap(), 0);

    let running = h.scans.list_running().unwrap();
    assert!(running.is_empty());
}

#[tokio::test]
async fn redelivered_message_is_skipped() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        dir.path(),
        MockBehavior::Succeed {
            action: "monitor",
            contains: false,
        },
        260.0,
        0,
    );
    seed_and_publish(&h, "v1", 60);
    // Simulate transport redelivery: the same message twice.
    seed_and_publish(&h, "v1", 60);

    let report = h.dispatcher.drain(10).await.unwrap();
    assert_eq!(report.analyzed + report.skipped, 2);
    assert_eq!(report.analyzed, 1);

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(channel.videos_scanned, 1);

    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(video.scan_count, 1);
}

#[tokio::test]
async fn permission_denied_is_terminal() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), MockBehavior::PermissionDenied, 260.0, 0);
    seed_and_publish(&h, "v1", 80);

    let report = h.dispatcher.drain(10).await.unwrap();
    assert_eq!(report.failed, 1);

    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Failed);
    assert_eq!(video.error_kind.as_deref(), Some("permission_denied"));

    // No counters moved and nothing was charged.
    assert!(h.channels.fetch("ch1").unwrap().is_none() || {
        let channel = h.channels.fetch("ch1").unwrap().unwrap();
        channel.videos_scanned == 0
    });
    assert_eq!(h.budget.daily_total().unwrap(), 0.0);
    assert_eq!(h.events.pending(TOPIC_VISION_FEEDBACK).unwrap(), 0);
}

#[tokio::test]
async fn exhausted_budget_fails_the_scan() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        dir.path(),
        MockBehavior::Succeed {
            action: "monitor",
            contains: false,
        },
        0.000_001,
        0,
    );
    seed_and_publish(&h, "v1", 80);

    let report = h.dispatcher.drain(10).await.unwrap();
    assert_eq!(report.failed, 1);

    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Failed);
    assert_eq!(video.error_kind.as_deref(), Some("budget_exhausted"));
    assert_eq!(h.budget.daily_total().unwrap(), 0.0);
}

#[tokio::test]
async fn low_priority_message_is_acked_and_skipped() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        dir.path(),
        MockBehavior::Succeed {
            action: "monitor",
            contains: false,
        },
        260.0,
        50,
    );
    seed_and_publish(&h, "v1", 10);

    let report = h.dispatcher.drain(10).await.unwrap();
    assert_eq!(report.skipped, 1);

    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::SkippedLowPriority);
    assert_eq!(h.events.pending(TOPIC_SCAN_READY).unwrap(), 0);
}

#[tokio::test]
async fn failed_scan_leaves_failed_record() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), MockBehavior::PermissionDenied, 260.0, 0);
    seed_and_publish(&h, "v1", 80);
    h.dispatcher.drain(10).await.unwrap();

    // The scan-history record is the operator surface for what happened.
    let running = h.scans.list_running().unwrap();
    assert!(running.is_empty());
    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert!(video.error_message.is_some());
}

#[tokio::test(start_paused = true)]
async fn validation_failures_are_retried() {
    let mock = MockVision::new(MockBehavior::GarbageThenSucceed { garbage_count: 2 });
    let request = AnalysisRequest {
        video_url: "https://youtube.com/watch?v=x".into(),
        prompt: "analyze".into(),
        fps: 0.5,
        start_offset_seconds: 5,
        end_offset_seconds: 295,
        temperature: 0.1,
        max_output_tokens: 20_000,
    };
    let (analysis, usage) = analyze_with_retry(&mock, &request).await.unwrap();
    assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
    assert!(analysis.contains_infringement());
    assert_eq!(usage.prompt_tokens, 10_000);
}

#[tokio::test(start_paused = true)]
async fn rate_limits_back_off_then_succeed() {
    let mock = MockVision::new(MockBehavior::RateLimitThenSucceed { limited_count: 3 });
    let request = AnalysisRequest {
        video_url: "https://youtube.com/watch?v=x".into(),
        prompt: "analyze".into(),
        fps: 0.5,
        start_offset_seconds: 5,
        end_offset_seconds: 295,
        temperature: 0.1,
        max_output_tokens: 20_000,
    };
    let (analysis, _) = analyze_with_retry(&mock, &request).await.unwrap();
    assert_eq!(mock.calls.load(Ordering::SeqCst), 4);
    assert!(analysis.contains_infringement());
}

#[tokio::test(start_paused = true)]
async fn rate_limits_exhaust_after_five_attempts() {
    let mock = MockVision::new(MockBehavior::RateLimitThenSucceed { limited_count: 99 });
    let request = AnalysisRequest {
        video_url: "https://youtube.com/watch?v=x".into(),
        prompt: "analyze".into(),
        fps: 0.5,
        start_offset_seconds: 5,
        end_offset_seconds: 295,
        temperature: 0.1,
        max_output_tokens: 20_000,
    };
    let err = analyze_with_retry(&mock, &request).await.unwrap_err();
    assert!(matches!(err, VisionError::RateLimited(_)));
    assert_eq!(mock.calls.load(Ordering::SeqCst), 5);
}
