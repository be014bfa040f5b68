use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use ipwatch_core::{
    ChannelStore, DiscoveryEngine, EventQueue, IpConfig, IpMatcher, IpPriority, QuotaManager,
    SearchClient, SearchError, SearchHistoryStore, SearchOrdering, SearchPlanner, TimeWindow,
    VideoProcessor, VideoStore, TOPIC_SCAN_READY, TOPIC_VIDEO_DISCOVERED,
};

struct MockSearch {
    results_per_query: usize,
    search_calls: AtomicUsize,
    channel_calls: AtomicUsize,
    details_calls: AtomicUsize,
}

impl MockSearch {
    fn new(results_per_query: usize) -> Self {
        Self {
            results_per_query,
            search_calls: AtomicUsize::new(0),
            channel_calls: AtomicUsize::new(0),
            details_calls: AtomicUsize::new(0),
        }
    }

    fn search_item(video_id: &str) -> Value {
        json!({
            "id": { "videoId": video_id },
            "snippet": {
                "title": format!("Superman AI movie {video_id}"),
                "description": "full ai generated superman film",
                "channelId": "ch-farm",
                "channelTitle": "Content Farm",
                "publishedAt": "2024-01-15T00:00:00Z",
            }
        })
    }
}

#[async_trait]
impl SearchClient for MockSearch {
    async fn search_videos(
        &self,
        _query: &str,
        _ordering: SearchOrdering,
        _window: Option<&TimeWindow>,
        _max_results: usize,
    ) -> Result<Vec<Value>, SearchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        // Stable ids so repeated searches rediscover the same videos.
        Ok((0..self.results_per_query)
            .map(|i| Self::search_item(&format!("vid-{i}")))
            .collect())
    }

    async fn video_details(&self, video_ids: &[String]) -> Result<Vec<Value>, SearchError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        Ok(video_ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "snippet": {
                        "title": format!("Superman AI movie {id}"),
                        "description": "full ai generated superman film",
                        "channelId": "ch-farm",
                        "channelTitle": "Content Farm",
                        "publishedAt": "2024-01-15T00:00:00Z",
                        "tags": ["superman", "ai"],
                    },
                    "statistics": {
                        "viewCount": "150000",
                        "likeCount": "9000",
                        "commentCount": "1200",
                    },
                    "contentDetails": { "duration": "PT12M30S" },
                })
            })
            .collect())
    }

    async fn channel_uploads(
        &self,
        _channel_id: &str,
        _max_results: usize,
    ) -> Result<Vec<Value>, SearchError> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Self::search_item("chan-upload-1")])
    }
}

struct Harness {
    engine: DiscoveryEngine,
    videos: VideoStore,
    events: EventQueue,
    quota: Arc<QuotaManager>,
    search: Arc<MockSearch>,
}

fn harness(dir: &Path, results_per_query: usize, daily_quota: u32) -> Harness {
    let videos = VideoStore::new(dir.join("videos.sqlite")).expect("video store");
    videos.initialize().expect("init videos");
    let channels = ChannelStore::new(dir.join("channels.sqlite")).expect("channel store");
    channels.initialize().expect("init channels");
    let events = EventQueue::new(dir.join("events.sqlite")).expect("event queue");
    events.initialize().expect("init events");
    let history = SearchHistoryStore::new(dir.join("history.sqlite")).expect("history store");
    history.initialize().expect("init history");
    let quota = Arc::new(QuotaManager::new(dir.join("quota.sqlite"), daily_quota).expect("quota"));
    quota.initialize().expect("init quota");

    let config = IpConfig {
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
    };
    let matcher = IpMatcher::new(vec![config]);

    let processor = VideoProcessor::new(videos.clone(), channels, matcher, events.clone());
    let search = Arc::new(MockSearch::new(results_per_query));
    let planner = SearchPlanner::new(5, 7);
    let engine = DiscoveryEngine::new(
        Arc::clone(&search) as Arc<dyn SearchClient>,
        processor,
        Arc::clone(&quota),
        history,
        planner,
        videos.clone(),
        events.clone(),
        500,
    );
    Harness {
        engine,
        videos,
        events,
        quota,
        search,
    }
}

#[tokio::test]
async fn run_discovers_and_enqueues_videos() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 30, 10_000);

    let stats = h.engine.run(500, None).await.unwrap();
    assert_eq!(stats.videos_discovered, 30);
    assert!(stats.quota_used > 0);
    assert_eq!(stats.unique_channels, 1);
    assert_eq!(stats.enqueued_for_scan, 30);

    assert_eq!(h.events.pending(TOPIC_VIDEO_DISCOVERED).unwrap(), 30);
    assert_eq!(h.events.pending(TOPIC_SCAN_READY).unwrap(), 30);

    // High-priority IP match, AI keywords, 150k views: these land well
    // above the floor.
    let sample = h.videos.fetch("vid-0").unwrap().unwrap();
    assert!(sample.initial_risk > 20);
    assert_eq!(sample.matched_ips, vec!["superman".to_string()]);
}

#[tokio::test]
async fn short_result_pages_exhaust_all_orderings() {
    // One keyword with quota for several queries: the first page returns
    // fewer than 50 results, so the other orderings are skipped unpaid.
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 30, 10_000);

    let stats = h.engine.run(500, None).await.unwrap();
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst), 1);
    // One search page plus one details batch.
    assert_eq!(stats.quota_used, 101);
}

#[tokio::test]
async fn quota_exhaustion_run_stays_within_bound() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 30, 10_000);

    // First run seeds videos for ch-farm so the next plan reserves a
    // channel scan.
    h.engine.run(150, None).await.unwrap();
    let searches_before = h.search.search_calls.load(Ordering::SeqCst);
    let used_before = h.quota.used_today().unwrap();

    let stats = h.engine.run(250, None).await.unwrap();
    let used_after = h.quota.used_today().unwrap();

    // Channel scan (2 + 1 details) and a single keyword page (100 + 1
    // details); the keyword exhausted its orderings so nothing else ran.
    assert_eq!(h.search.channel_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.search.search_calls.load(Ordering::SeqCst) - searches_before, 1);
    assert!(stats.quota_used <= 202);
    assert!(used_after - used_before <= 202);
}

#[tokio::test]
async fn rediscovery_is_deduplicated() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 10, 10_000);

    let first = h.engine.run(200, None).await.unwrap();
    assert_eq!(first.videos_discovered, 10);

    // The enqueue pass stamped every video; a second run sees them as
    // already in the pipeline and emits nothing new.
    let events_before = h.events.pending(TOPIC_VIDEO_DISCOVERED).unwrap();
    let second = h.engine.run(200, None).await.unwrap();
    assert_eq!(second.videos_discovered, 0);
    assert_eq!(second.videos_skipped, 10);
    assert_eq!(
        h.events.pending(TOPIC_VIDEO_DISCOVERED).unwrap(),
        events_before
    );
}

#[tokio::test]
async fn enqueue_skips_videos_no_longer_discovered() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 5, 10_000);
    h.engine.run(200, None).await.unwrap();
    assert_eq!(h.events.pending(TOPIC_SCAN_READY).unwrap(), 5);

    for video in h.videos.top_unscanned(100, 0).unwrap() {
        assert!(h.videos.begin_processing(&video.video_id, Utc::now()).unwrap());
    }
    let enqueued = h.engine.enqueue_top_unscanned(100).unwrap();
    assert_eq!(enqueued, 0);
}

#[tokio::test]
async fn custom_keywords_restrict_the_run() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 20, 10_000);

    let stats = h
        .engine
        .run(300, Some(&["superman fan film".to_string()]))
        .await
        .unwrap();
    assert_eq!(stats.videos_discovered, 20);
    assert_eq!(h.search.channel_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scan_queue_orders_by_priority() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), 6, 10_000);
    h.engine.run(200, None).await.unwrap();

    let queue = h.videos.top_unscanned(10, 0).unwrap();
    assert!(!queue.is_empty());
    for pair in queue.windows(2) {
        assert!(pair[0].scan_priority >= pair[1].scan_priority);
    }
}
