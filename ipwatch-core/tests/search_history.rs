use chrono::{Duration, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

use ipwatch_core::{SearchHistoryStore, SearchOrdering, TimeWindow};

fn store(dir: &std::path::Path) -> SearchHistoryStore {
    let store = SearchHistoryStore::new(dir.join("history.sqlite")).expect("history store");
    store.initialize().expect("init history");
    store
}

#[test]
fn first_search_is_all_time_second_is_windowed() {
    let dir = TempDir::new().unwrap();
    let history = store(dir.path());
    let now = Utc::now();
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    let (should, window) = history
        .should_search("superman", SearchOrdering::Date, now, &mut rng)
        .unwrap();
    assert!(should);
    assert!(window.is_none());

    history
        .record_search("superman", SearchOrdering::Date, 42, None, now)
        .unwrap();

    let (should, window) = history
        .should_search("superman", SearchOrdering::Date, now, &mut rng)
        .unwrap();
    assert!(should);
    let window = window.expect("second search must be windowed");
    assert!(window.published_after < window.published_before);
    assert!(window.published_before <= now);
}

#[test]
fn orderings_are_tracked_independently() {
    let dir = TempDir::new().unwrap();
    let history = store(dir.path());
    let now = Utc::now();
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    history
        .record_search("superman", SearchOrdering::Date, 42, None, now)
        .unwrap();

    // A different ordering of the same keyword still gets its all-time pass.
    let (_, window) = history
        .should_search("superman", SearchOrdering::ViewCount, now, &mut rng)
        .unwrap();
    assert!(window.is_none());
}

#[test]
fn windowed_history_without_all_time_gets_one_all_time() {
    let dir = TempDir::new().unwrap();
    let history = store(dir.path());
    let now = Utc::now();
    let mut rng = ChaCha8Rng::seed_from_u64(11);

    let window = TimeWindow {
        published_after: now - Duration::days(37),
        published_before: now - Duration::days(7),
    };
    history
        .record_search("superman", SearchOrdering::Date, 20, Some(&window), now)
        .unwrap();

    let (should, suggested) = history
        .should_search("superman", SearchOrdering::Date, now, &mut rng)
        .unwrap();
    assert!(should);
    assert!(suggested.is_none(), "all-time still owed for this pair");
}

#[test]
fn generated_windows_match_frequency_bands() {
    let dir = TempDir::new().unwrap();
    let history = store(dir.path());
    let now = Utc::now();

    // Five windowed records averaging two uploads/day put the keyword in
    // the 21-60 day band.
    for i in 0..5 {
        let at = now - Duration::days(i + 1);
        let window = TimeWindow {
            published_after: at - Duration::days(30),
            published_before: at,
        };
        history
            .record_search("steady", SearchOrdering::Date, 60, Some(&window), at)
            .unwrap();
    }
    history
        .record_search("steady", SearchOrdering::Date, 30, None, now - Duration::days(6))
        .unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(3);
    for _ in 0..50 {
        let (_, window) = history
            .should_search("steady", SearchOrdering::Date, now, &mut rng)
            .unwrap();
        let window = window.expect("windowed");
        let span = (window.published_before - window.published_after).num_days();
        assert!(
            (21..=61).contains(&span),
            "window span {span} outside medium-frequency band"
        );
    }
}

#[test]
fn keyword_outcomes_derive_tiers() {
    let dir = TempDir::new().unwrap();
    let history = store(dir.path());
    let now = Utc::now();

    let hot = history
        .record_keyword_outcome("hot", 80, 10, 10, now)
        .unwrap();
    assert_eq!(hot.tier, 1);
    assert_eq!(hot.cooldown_days, 1);

    let warm = history
        .record_keyword_outcome("warm", 50, 30, 20, now)
        .unwrap();
    assert_eq!(warm.tier, 2);
    assert_eq!(warm.cooldown_days, 3);

    let cold = history
        .record_keyword_outcome("cold", 5, 50, 45, now)
        .unwrap();
    assert_eq!(cold.tier, 3);
    assert_eq!(cold.cooldown_days, 7);

    let tiers = history.keyword_tiers().unwrap();
    assert_eq!(tiers.get("hot"), Some(&1));
    assert_eq!(tiers.get("warm"), Some(&2));
    assert_eq!(tiers.get("cold"), Some(&3));
}

#[test]
fn latest_outcome_wins_for_tier() {
    let dir = TempDir::new().unwrap();
    let history = store(dir.path());
    let now = Utc::now();

    history.record_keyword_outcome("kw", 80, 10, 10, now).unwrap();
    history.record_keyword_outcome("kw", 0, 50, 50, now).unwrap();

    let tiers = history.keyword_tiers().unwrap();
    assert_eq!(tiers.get("kw"), Some(&3));
}

#[test]
fn channel_scans_round_trip() {
    let dir = TempDir::new().unwrap();
    let history = store(dir.path());
    let now = Utc::now();

    assert!(history.channel_last_scanned("ch1").unwrap().is_none());
    history.record_channel_scan("ch1", now).unwrap();
    let scanned = history.channel_last_scanned("ch1").unwrap().unwrap();
    assert!((scanned - now).num_seconds().abs() < 2);
}
