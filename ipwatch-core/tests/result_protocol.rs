use std::path::Path;

use chrono::Utc;
use tempfile::TempDir;

use ipwatch_core::{
    ChannelStore, CompletedAnalysis, EventQueue, IpAnalysis, PriorityTier, RecommendedAction,
    ResultProcessor, StatsStore, Video, VideoStatus, VideoStore, VisionAnalysis,
    TOPIC_VISION_FEEDBACK,
};

struct Harness {
    videos: VideoStore,
    channels: ChannelStore,
    stats: StatsStore,
    events: EventQueue,
    processor: ResultProcessor,
}

fn harness(dir: &Path) -> Harness {
    let videos = VideoStore::new(dir.join("videos.sqlite")).expect("video store");
    videos.initialize().expect("init videos");
    let channels = ChannelStore::new(dir.join("channels.sqlite")).expect("channel store");
    channels.initialize().expect("init channels");
    let stats = StatsStore::new(dir.join("stats.sqlite")).expect("stats store");
    stats.initialize().expect("init stats");
    let events = EventQueue::new(dir.join("events.sqlite")).expect("event queue");
    events.initialize().expect("init events");
    let processor = ResultProcessor::new(
        videos.clone(),
        channels.clone(),
        stats.clone(),
        events.clone(),
    );
    Harness {
        videos,
        channels,
        stats,
        events,
        processor,
    }
}

fn seed_video(videos: &VideoStore, video_id: &str, channel_id: &str, views: i64) {
    let video = Video {
        video_id: video_id.into(),
        title: "seed".into(),
        description: String::new(),
        tags: vec![],
        channel_id: channel_id.into(),
        channel_title: "Channel".into(),
        published_at: Some(Utc::now()),
        duration_seconds: 120,
        view_count: views,
        like_count: 0,
        comment_count: 0,
        thumbnail_url: None,
        matched_ips: vec!["superman".into()],
        status: VideoStatus::Processing,
        initial_risk: 50,
        current_risk: 50,
        video_risk: 50,
        channel_risk: 0,
        scan_priority: 50,
        priority_tier: PriorityTier::Medium,
        scan_count: 0,
        view_velocity: 0.0,
        discovered_at: Some(Utc::now()),
        vision_triggered_at: Some(Utc::now()),
        processing_started_at: Some(Utc::now()),
        last_analyzed_at: None,
        last_risk_update: None,
        analysis: None,
        error_message: None,
        error_kind: None,
        deleted: false,
    };
    videos.upsert(&video).expect("seed video");
}

fn completed(
    video_id: &str,
    action: RecommendedAction,
    contains_infringement: bool,
) -> CompletedAnalysis {
    CompletedAnalysis {
        video_id: video_id.into(),
        analysis: VisionAnalysis {
            ip_results: vec![IpAnalysis {
                ip_id: "superman".into(),
                ip_name: "Superman".into(),
                contains_infringement,
                characters_detected: vec![],
                is_ai_generated: true,
                ai_tools_detected: vec!["Sora".into()],
                fair_use_applies: false,
                fair_use_reasoning: String::new(),
                content_type: "clips".into(),
                infringement_likelihood: if contains_infringement { 85.0 } else { 10.0 },
                reasoning: String::new(),
                recommended_action: action,
            }],
            overall_recommendation: action,
            overall_notes: String::new(),
        },
        model: "vision-flash-2.5".into(),
        analyzed_at: Utc::now(),
        cost: 0.008,
        input_tokens: 10_000,
        output_tokens: 500,
        processing_seconds: 5.2,
    }
}

#[test]
fn first_time_actionable_infringement() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", "ch1", 1_000);

    let applied = h
        .processor
        .process(&completed("v1", RecommendedAction::ImmediateTakedown, true))
        .unwrap();
    assert!(applied.first_analysis);

    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Analyzed);
    assert_eq!(video.scan_count, 1);

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(channel.videos_scanned, 1);
    assert_eq!(channel.confirmed_infringements, 1);
    assert_eq!(channel.videos_cleared, 0);
    assert_eq!(channel.infringing_videos_count, 1);
    assert_eq!(channel.total_infringing_views, 1_000);

    let system = h.stats.system().unwrap();
    assert_eq!(system.total_analyzed, 1);
    assert_eq!(system.total_infringements, 1);

    let hourly = h.stats.hourly(Utc::now()).unwrap().unwrap();
    assert_eq!(hourly.analyses, 1);
    assert_eq!(hourly.infringements, 1);

    assert_eq!(h.events.pending(TOPIC_VISION_FEEDBACK).unwrap(), 1);
}

#[test]
fn first_time_cleared_but_infringing_flag() {
    // monitor + contains_infringement=true: cleared for channel purposes,
    // still counted in the infringement totals.
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", "ch1", 1_000);

    h.processor
        .process(&completed("v1", RecommendedAction::Monitor, true))
        .unwrap();

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(channel.videos_scanned, 1);
    assert_eq!(channel.confirmed_infringements, 0);
    assert_eq!(channel.videos_cleared, 1);
    assert_eq!(channel.infringing_videos_count, 0);
    assert_eq!(channel.total_infringing_views, 0);

    let system = h.stats.system().unwrap();
    assert_eq!(system.total_analyzed, 1);
    assert_eq!(system.total_infringements, 1);

    let hourly = h.stats.hourly(Utc::now()).unwrap().unwrap();
    assert_eq!(hourly.analyses, 1);
    assert_eq!(hourly.infringements, 1);
}

#[test]
fn rescan_unchanged_moves_no_aggregates() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", "ch1", 1_000);

    h.processor
        .process(&completed("v1", RecommendedAction::ImmediateTakedown, true))
        .unwrap();
    let applied = h
        .processor
        .process(&completed("v1", RecommendedAction::ImmediateTakedown, true))
        .unwrap();
    assert!(!applied.first_analysis);
    assert!(!applied.actionable_flip);
    assert!(!applied.infringement_flip);

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(channel.videos_scanned, 1);
    assert_eq!(channel.confirmed_infringements, 1);
    assert_eq!(channel.infringing_videos_count, 1);
    assert_eq!(channel.total_infringing_views, 1_000);

    let system = h.stats.system().unwrap();
    assert_eq!(system.total_analyzed, 1);
    assert_eq!(system.total_infringements, 1);

    let hourly = h.stats.hourly(Utc::now()).unwrap().unwrap();
    assert_eq!(hourly.analyses, 1);
    assert_eq!(hourly.infringements, 1);

    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(video.scan_count, 2);
}

#[test]
fn rescan_flip_takedown_to_monitor() {
    // Actionable flips off while contains_infringement stays true: channel
    // counters move, infringement totals stay.
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", "ch1", 1_000);

    h.processor
        .process(&completed("v1", RecommendedAction::ImmediateTakedown, true))
        .unwrap();
    let applied = h
        .processor
        .process(&completed("v1", RecommendedAction::Monitor, true))
        .unwrap();
    assert!(applied.actionable_flip);
    assert!(!applied.infringement_flip);

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(channel.videos_scanned, 1);
    assert_eq!(channel.confirmed_infringements, 0);
    assert_eq!(channel.videos_cleared, 1);
    assert_eq!(channel.infringing_videos_count, 0);
    assert_eq!(channel.total_infringing_views, 0);

    let system = h.stats.system().unwrap();
    assert_eq!(system.total_analyzed, 1);
    assert_eq!(system.total_infringements, 1);

    let hourly = h.stats.hourly(Utc::now()).unwrap().unwrap();
    assert_eq!(hourly.infringements, 1);
}

#[test]
fn rescan_flip_infringement_true_to_false() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", "ch1", 1_000);

    h.processor
        .process(&completed("v1", RecommendedAction::ImmediateTakedown, true))
        .unwrap();
    let applied = h
        .processor
        .process(&completed("v1", RecommendedAction::SafeHarbor, false))
        .unwrap();
    assert!(applied.actionable_flip);
    assert!(applied.infringement_flip);

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(channel.confirmed_infringements, 0);
    assert_eq!(channel.videos_cleared, 1);

    let system = h.stats.system().unwrap();
    assert_eq!(system.total_infringements, 0);

    let hourly = h.stats.hourly(Utc::now()).unwrap().unwrap();
    assert_eq!(hourly.infringements, 0);
}

#[test]
fn rescan_flip_back_restores_counters() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", "ch1", 2_500);

    h.processor
        .process(&completed("v1", RecommendedAction::ImmediateTakedown, true))
        .unwrap();
    h.processor
        .process(&completed("v1", RecommendedAction::SafeHarbor, false))
        .unwrap();
    h.processor
        .process(&completed("v1", RecommendedAction::ImmediateTakedown, true))
        .unwrap();

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(channel.videos_scanned, 1);
    assert_eq!(channel.confirmed_infringements, 1);
    assert_eq!(channel.videos_cleared, 0);
    assert_eq!(channel.infringing_videos_count, 1);
    assert_eq!(channel.total_infringing_views, 2_500);

    let system = h.stats.system().unwrap();
    assert_eq!(system.total_analyzed, 1);
    assert_eq!(system.total_infringements, 1);
}

#[test]
fn channel_invariant_survives_arbitrary_sequences() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());

    let sequence = [
        ("v1", RecommendedAction::ImmediateTakedown, true),
        ("v2", RecommendedAction::Monitor, true),
        ("v3", RecommendedAction::Ignore, false),
        ("v1", RecommendedAction::SafeHarbor, false),
        ("v2", RecommendedAction::ImmediateTakedown, true),
        ("v1", RecommendedAction::ImmediateTakedown, true),
        ("v3", RecommendedAction::Tolerated, true),
    ];
    for (id, _, _) in &sequence {
        if h.videos.fetch(id).unwrap().is_none() {
            seed_video(&h.videos, id, "ch1", 1_000);
        }
    }
    for (id, action, contains) in sequence {
        h.processor
            .process(&completed(id, action, contains))
            .unwrap();
    }

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert_eq!(
        channel.videos_scanned,
        channel.confirmed_infringements + channel.videos_cleared
    );
    assert_eq!(channel.videos_scanned, 3);
    // Latest classifications: v1 takedown, v2 takedown, v3 tolerated.
    assert_eq!(channel.confirmed_infringements, 2);
    assert_eq!(channel.infringing_videos_count, 2);

    let system = h.stats.system().unwrap();
    assert_eq!(system.total_analyzed, 3);
    // Latest contains flags: v1 true, v2 true, v3 true.
    assert_eq!(system.total_infringements, 3);
}
