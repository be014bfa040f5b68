use std::path::Path;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use ipwatch_core::{
    ChannelStore, EventQueue, FeedbackMessage, IpConfig, IpMatcher, IpPriority, PriorityTier,
    RiskEngine, ScanStatDelta, Video, VideoEnvelope, VideoStatus, VideoStore,
    TOPIC_VIDEO_DISCOVERED, TOPIC_VISION_FEEDBACK,
};

struct Harness {
    engine: RiskEngine,
    videos: VideoStore,
    channels: ChannelStore,
    events: EventQueue,
}

fn harness(dir: &Path) -> Harness {
    let videos = VideoStore::new(dir.join("videos.sqlite")).expect("video store");
    videos.initialize().expect("init videos");
    let channels = ChannelStore::new(dir.join("channels.sqlite")).expect("channel store");
    channels.initialize().expect("init channels");
    let events = EventQueue::new(dir.join("events.sqlite")).expect("event queue");
    events.initialize().expect("init events");

    let matcher = IpMatcher::new(vec![IpConfig {
        ip_id: "superman".into(),
        name: "Superman".into(),
        owner: "Studio".into(),
        priority: IpPriority::High,
        characters: vec!["Superman".into()],
        visual_markers: vec![],
        ai_tool_patterns: vec![],
        false_positive_filters: vec![],
        keywords_high: vec![],
        keywords_medium: vec![],
        keywords_low: vec![],
        enabled: true,
        deleted: false,
    }]);

    let engine = RiskEngine::new(
        videos.clone(),
        channels.clone(),
        matcher,
        events.clone(),
    );
    Harness {
        engine,
        videos,
        channels,
        events,
    }
}

fn seed_video(videos: &VideoStore, video_id: &str, views: i64) {
    let video = Video {
        video_id: video_id.into(),
        title: "Superman fan film".into(),
        description: String::new(),
        tags: vec![],
        channel_id: "ch1".into(),
        channel_title: "Channel".into(),
        published_at: Some(Utc::now() - Duration::days(200)),
        duration_seconds: 700,
        view_count: views,
        like_count: views / 20,
        comment_count: views / 100,
        thumbnail_url: None,
        matched_ips: vec!["superman".into()],
        status: VideoStatus::Discovered,
        initial_risk: 0,
        current_risk: 0,
        video_risk: 0,
        channel_risk: 0,
        scan_priority: 0,
        priority_tier: PriorityTier::VeryLow,
        scan_count: 0,
        view_velocity: 0.0,
        discovered_at: Some(Utc::now()),
        vision_triggered_at: None,
        processing_started_at: None,
        last_analyzed_at: None,
        last_risk_update: None,
        analysis: None,
        error_message: None,
        error_kind: None,
        deleted: false,
    };
    videos.upsert(&video).expect("seed video");
}

fn envelope(video_id: &str, views: i64) -> VideoEnvelope {
    VideoEnvelope {
        video_id: video_id.into(),
        url: format!("https://youtube.com/watch?v={video_id}"),
        title: "Superman fan film".into(),
        duration_seconds: 700,
        view_count: views,
        channel_id: "ch1".into(),
        channel_title: "Channel".into(),
        risk_score: 0,
        risk_tier: PriorityTier::VeryLow,
        matched_ips: vec!["superman".into()],
        discovered_at: Utc::now(),
        scan_priority: 0,
    }
}

#[test]
fn rescore_writes_then_settles() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", 250_000);

    assert!(h.engine.rescore_video("v1").unwrap());
    let first = h.videos.fetch("v1").unwrap().unwrap();
    assert!(first.current_risk > 0);
    assert!(first.current_risk <= 100);
    assert_eq!(
        first.priority_tier,
        PriorityTier::from_priority(first.scan_priority)
    );
    let stamp = first.last_risk_update;

    // Unchanged inputs: no write, timestamp untouched.
    assert!(!h.engine.rescore_video("v1").unwrap());
    let second = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(second.current_risk, first.current_risk);
    assert_eq!(second.last_risk_update, stamp);
}

#[test]
fn discovered_events_feed_velocity_and_risk() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", 1_000);

    h.events
        .publish_json(TOPIC_VIDEO_DISCOVERED, &envelope("v1", 1_000))
        .unwrap();
    let outcome = h.engine.drain_discovered(10).unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(h.events.pending(TOPIC_VIDEO_DISCOVERED).unwrap(), 0);

    // One snapshot is not enough for a velocity.
    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert_eq!(video.view_velocity, 0.0);

    h.events
        .publish_json(TOPIC_VIDEO_DISCOVERED, &envelope("v1", 5_000))
        .unwrap();
    h.engine.drain_discovered(10).unwrap();
    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert!(video.view_velocity >= 0.0);
}

#[test]
fn feedback_refreshes_channel_reputation() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    seed_video(&h.videos, "v1", 50_000);

    // A channel with a confirmed pattern.
    h.channels
        .apply_scan_delta(
            "ch1",
            ScanStatDelta {
                videos_scanned: 10,
                confirmed_infringements: 6,
                videos_cleared: 4,
                infringing_videos_count: 6,
                total_infringing_views: 900_000,
            },
            true,
            Utc::now(),
        )
        .unwrap();
    h.channels.set_subscriber_count("ch1", 120_000).unwrap();

    h.events
        .publish_json(
            TOPIC_VISION_FEEDBACK,
            &FeedbackMessage {
                video_id: "v1".into(),
                channel_id: "ch1".into(),
                contains_infringement: true,
                confidence_score: 92,
                infringement_type: "full_movie".into(),
                characters_found: vec!["Superman".into()],
                analysis_cost_usd: 0.01,
                analyzed_at: Utc::now(),
            },
        )
        .unwrap();

    let outcome = h.engine.drain_feedback(10).unwrap();
    assert_eq!(outcome.processed, 1);

    let channel = h.channels.fetch("ch1").unwrap().unwrap();
    assert!(channel.channel_risk > 30);

    // Channel reputation flows into the video's combined priority.
    let video = h.videos.fetch("v1").unwrap().unwrap();
    assert!(video.channel_risk > 0);
    assert_eq!(
        video.priority_tier,
        PriorityTier::from_priority(video.scan_priority)
    );
}

#[test]
fn batch_rescore_covers_discovered_videos() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    for i in 0..5 {
        seed_video(&h.videos, &format!("v{i}"), 10_000 * (i + 1));
    }

    let outcome = h.engine.rescore_batch(100).unwrap();
    assert_eq!(outcome.processed, 5);
    assert_eq!(outcome.updated, 5);

    for i in 0..5 {
        let video = h.videos.fetch(&format!("v{i}")).unwrap().unwrap();
        assert!(video.current_risk <= 100);
        assert!(video.scan_priority <= 100);
    }
}
