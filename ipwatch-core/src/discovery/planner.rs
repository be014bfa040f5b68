use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::discovery::search::SearchOrdering;

pub const KEYWORD_QUERY_COST: u32 = 100;
pub const CHANNEL_SCAN_COST: u32 = 2;

const TIER_WEIGHTS: [(u8, f64); 3] = [(1, 0.50), (2, 0.35), (3, 0.15)];

/// One planned unit of discovery work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlannedQuery {
    ChannelScan { channel_id: String },
    Keyword {
        keyword: String,
        ordering: SearchOrdering,
    },
}

impl PlannedQuery {
    pub fn cost(&self) -> u32 {
        match self {
            PlannedQuery::ChannelScan { .. } => CHANNEL_SCAN_COST,
            PlannedQuery::Keyword { .. } => KEYWORD_QUERY_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelCandidate {
    pub channel_id: String,
    pub video_count: i64,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

/// Snapshot of everything the planner needs, so planning itself is pure and
/// seedable.
#[derive(Debug, Clone, Default)]
pub struct PlanInputs {
    pub keywords: Vec<String>,
    pub keyword_tiers: HashMap<String, u8>,
    pub channel_candidates: Vec<ChannelCandidate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchPlan {
    pub entries: Vec<PlannedQuery>,
    pub channel_scans: usize,
    pub keyword_queries: usize,
    pub planned_quota: u32,
}

#[derive(Debug, Clone)]
pub struct SearchPlanner {
    pub channel_scan_slots: usize,
    pub channel_rescan_days: i64,
}

impl SearchPlanner {
    pub fn new(channel_scan_slots: usize, channel_rescan_days: i64) -> Self {
        Self {
            channel_scan_slots,
            channel_rescan_days,
        }
    }

    /// Build a run plan under `max_quota` units: channel scans reserved
    /// first, the rest spent on tier-weighted randomized keyword queries,
    /// shuffled together before execution.
    pub fn plan<R: Rng>(
        &self,
        inputs: &PlanInputs,
        max_quota: u32,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> SearchPlan {
        let channels = self.eligible_channels(&inputs.channel_candidates, now);
        let channel_quota = channels.len() as u32 * CHANNEL_SCAN_COST;
        let keyword_quota = max_quota.saturating_sub(channel_quota);
        let max_queries = (keyword_quota / KEYWORD_QUERY_COST) as usize;

        if channels.is_empty() {
            info!(keyword_quota, "keyword-only plan: no channels eligible for scan");
        } else {
            info!(
                channels = channels.len(),
                channel_quota, keyword_quota, "hybrid plan: channel scans + keywords"
            );
        }

        let by_tier = group_by_tier(&inputs.keywords, &inputs.keyword_tiers);
        debug!(
            tier1 = by_tier.get(&1).map_or(0, Vec::len),
            tier2 = by_tier.get(&2).map_or(0, Vec::len),
            tier3 = by_tier.get(&3).map_or(0, Vec::len),
            max_queries,
            "keyword tier distribution"
        );

        let mut entries: Vec<PlannedQuery> = channels
            .into_iter()
            .map(|channel_id| PlannedQuery::ChannelScan { channel_id })
            .collect();

        let mut seen: HashSet<(String, SearchOrdering)> = HashSet::new();
        let mut keyword_queries = 0usize;
        let mut attempts = 0usize;
        let max_attempts = max_queries.saturating_mul(10);

        while keyword_queries < max_queries && attempts < max_attempts {
            attempts += 1;

            let available: Vec<(u8, f64)> = TIER_WEIGHTS
                .iter()
                .filter(|(tier, _)| by_tier.get(tier).is_some_and(|k| !k.is_empty()))
                .copied()
                .collect();
            if available.is_empty() {
                warn!("no keywords available in any tier");
                break;
            }

            let tier = weighted_tier(&available, rng);
            let keywords = &by_tier[&tier];
            let keyword = keywords[rng.gen_range(0..keywords.len())].clone();
            let ordering = SearchOrdering::ALL[rng.gen_range(0..SearchOrdering::ALL.len())];

            if !seen.insert((keyword.clone(), ordering)) {
                continue;
            }
            entries.push(PlannedQuery::Keyword { keyword, ordering });
            keyword_queries += 1;
        }

        if attempts >= max_attempts && keyword_queries < max_queries {
            warn!(
                attempts,
                keyword_queries, max_queries, "plan generation hit the attempt cap"
            );
        }

        entries.shuffle(rng);

        let channel_scans = entries
            .iter()
            .filter(|e| matches!(e, PlannedQuery::ChannelScan { .. }))
            .count();
        let planned_quota =
            channel_scans as u32 * CHANNEL_SCAN_COST + keyword_queries as u32 * KEYWORD_QUERY_COST;
        info!(
            total = entries.len(),
            channel_scans, keyword_queries, planned_quota, "search plan generated"
        );

        SearchPlan {
            entries,
            channel_scans,
            keyword_queries,
            planned_quota,
        }
    }

    /// Channels worth a scan: not scanned in the rescan window, most active
    /// first, capped at the reserved slots.
    fn eligible_channels(
        &self,
        candidates: &[ChannelCandidate],
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let cutoff = now - Duration::days(self.channel_rescan_days);
        let mut eligible: Vec<&ChannelCandidate> = candidates
            .iter()
            .filter(|candidate| match candidate.last_scanned_at {
                Some(scanned) => scanned < cutoff,
                None => true,
            })
            .collect();
        eligible.sort_by(|a, b| b.video_count.cmp(&a.video_count));
        eligible
            .into_iter()
            .take(self.channel_scan_slots)
            .map(|candidate| candidate.channel_id.clone())
            .collect()
    }
}

fn group_by_tier(
    keywords: &[String],
    tiers: &HashMap<String, u8>,
) -> HashMap<u8, Vec<String>> {
    let mut by_tier: HashMap<u8, Vec<String>> = HashMap::new();
    for keyword in keywords {
        // Never-searched keywords start at the lowest tier and earn their
        // way up through measured efficiency.
        let tier = tiers.get(keyword).copied().unwrap_or(3).clamp(1, 3);
        by_tier.entry(tier).or_default().push(keyword.clone());
    }
    by_tier
}

fn weighted_tier<R: Rng>(available: &[(u8, f64)], rng: &mut R) -> u8 {
    let total: f64 = available.iter().map(|(_, weight)| weight).sum();
    let mut roll = rng.gen::<f64>() * total;
    for (tier, weight) in available {
        if roll < *weight {
            return *tier;
        }
        roll -= weight;
    }
    available.last().map(|(tier, _)| *tier).unwrap_or(3)
}
