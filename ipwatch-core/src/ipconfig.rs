use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sqlite::configure_connection;
use crate::video::VideoStore;

const IP_CONFIG_SCHEMA: &str = include_str!("../../sql/ip_configs.sql");

#[derive(Debug, Error)]
pub enum IpConfigError {
    #[error("failed to open ip-config database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on ip-config database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("ip config not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("video store error during cascade: {0}")]
    Cascade(#[from] crate::video::VideoError),
}

pub type IpConfigResult<T> = Result<T, IpConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpPriority {
    High,
    Medium,
    Low,
}

impl IpPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpPriority::High => "high",
            IpPriority::Medium => "medium",
            IpPriority::Low => "low",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "high" => IpPriority::High,
            "low" => IpPriority::Low,
            _ => IpPriority::Medium,
        }
    }
}

/// Descriptor of one protected property: what to search for and what a
/// text-level match looks like. Immutable during a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpConfig {
    pub ip_id: String,
    pub name: String,
    pub owner: String,
    pub priority: IpPriority,
    pub characters: Vec<String>,
    pub visual_markers: Vec<String>,
    pub ai_tool_patterns: Vec<String>,
    pub false_positive_filters: Vec<String>,
    pub keywords_high: Vec<String>,
    pub keywords_medium: Vec<String>,
    pub keywords_low: Vec<String>,
    pub enabled: bool,
    pub deleted: bool,
}

impl IpConfig {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ip_id: row.get("ip_id")?,
            name: row.get("name")?,
            owner: row.get("owner")?,
            priority: IpPriority::parse(&row.get::<_, String>("priority")?),
            characters: json_list(row.get("characters")?),
            visual_markers: json_list(row.get("visual_markers")?),
            ai_tool_patterns: json_list(row.get("ai_tool_patterns")?),
            false_positive_filters: json_list(row.get("false_positive_filters")?),
            keywords_high: json_list(row.get("keywords_high")?),
            keywords_medium: json_list(row.get("keywords_medium")?),
            keywords_low: json_list(row.get("keywords_low")?),
            enabled: row.get::<_, i64>("enabled")? != 0,
            deleted: row.get::<_, i64>("deleted")? != 0,
        })
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.deleted
    }

    pub fn all_keywords(&self) -> Vec<String> {
        let mut keywords = self.keywords_high.clone();
        keywords.extend(self.keywords_medium.iter().cloned());
        keywords.extend(self.keywords_low.iter().cloned());
        keywords
    }
}

fn json_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

/// Text-level IP matcher used by the discovery processor. The vision stage
/// owns visual confirmation; this stage only decides which configs a video
/// plausibly touches.
#[derive(Debug)]
pub struct IpMatcher {
    configs: Vec<IpConfig>,
}

impl IpMatcher {
    pub fn new(configs: Vec<IpConfig>) -> Self {
        Self {
            configs: configs.into_iter().filter(IpConfig::is_active).collect(),
        }
    }

    pub fn configs(&self) -> &[IpConfig] {
        &self.configs
    }

    /// Match a blob of video text (title + description + tags + channel
    /// title) against every active config.
    ///
    /// Keyword hits are substring matches; canonical names match on word
    /// boundaries, including the article-stripped variant ("The Flash" also
    /// matches "flash"). A false-positive filter hit suppresses the config.
    pub fn match_text(&self, text: &str) -> Vec<String> {
        let text_lower = text.to_lowercase();
        let normalized = normalize(&text_lower);

        let mut matched = Vec::new();
        for config in &self.configs {
            if config
                .false_positive_filters
                .iter()
                .any(|filter| !filter.is_empty() && text_lower.contains(&filter.to_lowercase()))
            {
                continue;
            }

            let mut hit = config
                .all_keywords()
                .iter()
                .any(|keyword| text_lower.contains(&keyword.to_lowercase()));

            if !hit {
                hit = names_match(&config.name, &normalized);
            }
            if !hit {
                hit = config
                    .characters
                    .iter()
                    .any(|character| names_match(character, &normalized));
            }

            if hit {
                matched.push(config.ip_id.clone());
            }
        }
        matched
    }

    /// Whether any matched config is flagged high priority.
    pub fn any_high_priority(&self, matched_ids: &[String]) -> bool {
        self.configs
            .iter()
            .any(|c| matched_ids.contains(&c.ip_id) && c.priority == IpPriority::High)
    }
}

fn normalize(text_lower: &str) -> String {
    let stripped: String = text_lower
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn names_match(name: &str, normalized_text: &str) -> bool {
    let name_lower = normalize(&name.to_lowercase());
    if name_lower.is_empty() {
        return false;
    }
    if word_bounded(&name_lower, normalized_text) {
        return true;
    }
    let without_article = strip_article(&name_lower);
    if without_article != name_lower && !without_article.is_empty() {
        return word_bounded(&without_article, normalized_text);
    }
    false
}

fn word_bounded(needle: &str, haystack: &str) -> bool {
    let pattern = format!(r"\b{}\b", regex::escape(needle));
    Regex::new(&pattern)
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

fn strip_article(name: &str) -> String {
    for article in ["the ", "a ", "an "] {
        if let Some(rest) = name.strip_prefix(article) {
            return rest.trim().to_string();
        }
    }
    name.to_string()
}

#[derive(Debug, Clone)]
pub struct IpConfigStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl IpConfigStore {
    pub fn new(path: impl AsRef<Path>) -> IpConfigResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        })
    }

    fn open(&self) -> IpConfigResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            IpConfigError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| IpConfigError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> IpConfigResult<()> {
        let conn = self.open()?;
        conn.execute_batch(IP_CONFIG_SCHEMA)?;
        Ok(())
    }

    pub fn upsert(&self, config: &IpConfig) -> IpConfigResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO ip_configs (
                ip_id, name, owner, priority, characters, visual_markers,
                ai_tool_patterns, false_positive_filters, keywords_high,
                keywords_medium, keywords_low, enabled, deleted, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(ip_id) DO UPDATE SET
                name = excluded.name,
                owner = excluded.owner,
                priority = excluded.priority,
                characters = excluded.characters,
                visual_markers = excluded.visual_markers,
                ai_tool_patterns = excluded.ai_tool_patterns,
                false_positive_filters = excluded.false_positive_filters,
                keywords_high = excluded.keywords_high,
                keywords_medium = excluded.keywords_medium,
                keywords_low = excluded.keywords_low,
                enabled = excluded.enabled,
                deleted = excluded.deleted,
                updated_at = excluded.updated_at",
            params![
                &config.ip_id,
                &config.name,
                &config.owner,
                config.priority.as_str(),
                serde_json::to_string(&config.characters)?,
                serde_json::to_string(&config.visual_markers)?,
                serde_json::to_string(&config.ai_tool_patterns)?,
                serde_json::to_string(&config.false_positive_filters)?,
                serde_json::to_string(&config.keywords_high)?,
                serde_json::to_string(&config.keywords_medium)?,
                serde_json::to_string(&config.keywords_low)?,
                if config.enabled { 1 } else { 0 },
                if config.deleted { 1 } else { 0 },
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn fetch(&self, ip_id: &str) -> IpConfigResult<Option<IpConfig>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM ip_configs WHERE ip_id = ?1")?;
        let config = stmt
            .query_row([ip_id], |row| IpConfig::from_row(row))
            .optional()?;
        Ok(config)
    }

    pub fn list_active(&self) -> IpConfigResult<Vec<IpConfig>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM ip_configs WHERE enabled = 1 AND deleted = 0")?;
        let rows = stmt
            .query_map([], |row| IpConfig::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Soft-delete a config and cascade the flag onto every matched video.
    pub fn soft_delete(&self, ip_id: &str, videos: &VideoStore) -> IpConfigResult<usize> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE ip_configs SET deleted = 1, updated_at = ?2 WHERE ip_id = ?1",
            params![ip_id, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(IpConfigError::NotFound(ip_id.to_string()));
        }
        let cascaded = videos.soft_delete_by_ip(ip_id)?;
        Ok(cascaded)
    }
}
