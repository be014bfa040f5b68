use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid endpoint url: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("search api returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed search response: {0}")]
    Malformed(String),
}

pub type SearchResult<T> = Result<T, SearchError>;

/// Result orderings the external API understands. A keyword combined with a
/// different ordering surfaces a different slice of results, which is what
/// the planner exploits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchOrdering {
    Date,
    ViewCount,
    Rating,
    Relevance,
}

impl SearchOrdering {
    pub const ALL: [SearchOrdering; 4] = [
        SearchOrdering::Date,
        SearchOrdering::ViewCount,
        SearchOrdering::Rating,
        SearchOrdering::Relevance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchOrdering::Date => "date",
            SearchOrdering::ViewCount => "viewCount",
            SearchOrdering::Rating => "rating",
            SearchOrdering::Relevance => "relevance",
        }
    }
}

impl std::fmt::Display for SearchOrdering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Publication window for a windowed query. Absent bounds mean all-time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub published_after: DateTime<Utc>,
    pub published_before: DateTime<Utc>,
}

impl TimeWindow {
    pub fn span_days(&self) -> i64 {
        (self.published_before - self.published_after).num_days()
    }
}

/// External search surface. Implementations return raw API item payloads;
/// the video processor owns normalization of the two id shapes.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search_videos(
        &self,
        query: &str,
        ordering: SearchOrdering,
        window: Option<&TimeWindow>,
        max_results: usize,
    ) -> SearchResult<Vec<Value>>;

    /// Batch statistics/contentDetails fetch; callers chunk to 50 ids.
    async fn video_details(&self, video_ids: &[String]) -> SearchResult<Vec<Value>>;

    /// Recent uploads of one channel (channels.list + playlistItems.list).
    async fn channel_uploads(&self, channel_id: &str, max_results: usize)
        -> SearchResult<Vec<Value>>;
}

#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSearchClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, resource: &str) -> SearchResult<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.endpoint.trim_end_matches('/'), resource))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn get_items(&self, url: Url) -> SearchResult<Vec<Value>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let payload: Value = response.json().await?;
        let items = payload
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| SearchError::Malformed("missing items array".to_string()))?;
        Ok(items)
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search_videos(
        &self,
        query: &str,
        ordering: SearchOrdering,
        window: Option<&TimeWindow>,
        max_results: usize,
    ) -> SearchResult<Vec<Value>> {
        let mut url = self.url("search")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("part", "snippet");
            pairs.append_pair("type", "video");
            pairs.append_pair("q", query);
            pairs.append_pair("order", ordering.as_str());
            pairs.append_pair("maxResults", &max_results.min(50).to_string());
            if let Some(window) = window {
                pairs.append_pair(
                    "publishedAfter",
                    &window.published_after.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                );
                pairs.append_pair(
                    "publishedBefore",
                    &window.published_before.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                );
            }
        }
        debug!(query, ordering = %ordering, windowed = window.is_some(), "search.list");
        self.get_items(url).await
    }

    async fn video_details(&self, video_ids: &[String]) -> SearchResult<Vec<Value>> {
        let mut url = self.url("videos")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("part", "snippet,statistics,contentDetails");
            pairs.append_pair("id", &video_ids.join(","));
            pairs.append_pair("maxResults", "50");
        }
        self.get_items(url).await
    }

    async fn channel_uploads(
        &self,
        channel_id: &str,
        max_results: usize,
    ) -> SearchResult<Vec<Value>> {
        let mut url = self.url("channels")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("part", "contentDetails");
            pairs.append_pair("id", channel_id);
        }
        let channels = self.get_items(url).await?;
        let uploads_playlist = channels
            .first()
            .and_then(|c| {
                c.pointer("/contentDetails/relatedPlaylists/uploads")
                    .and_then(Value::as_str)
            })
            .ok_or_else(|| SearchError::Malformed("channel has no uploads playlist".to_string()))?
            .to_string();

        let mut url = self.url("playlistItems")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("part", "snippet,contentDetails");
            pairs.append_pair("playlistId", &uploads_playlist);
            pairs.append_pair("maxResults", &max_results.min(50).to_string());
        }
        let items = self.get_items(url).await?;
        // Normalize playlist items to the search shape: the video id lives
        // under contentDetails.videoId.
        let normalized = items
            .into_iter()
            .map(|mut item| {
                if let Some(video_id) = item
                    .pointer("/contentDetails/videoId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                {
                    item["id"] = Value::String(video_id);
                }
                item
            })
            .collect();
        Ok(normalized)
    }
}
