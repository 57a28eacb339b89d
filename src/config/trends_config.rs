use serde::{Deserialize, Serialize};

/// Google Trends style interest endpoints accept at most this many keywords per query
pub const MAX_KEYWORDS_PER_GROUP: usize = 5;

/// Configuration for the external search-interest source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendsConfig {
    pub endpoint: String,
    pub geo: String,
    pub timeframe: String,
    pub delay_between_groups_ms: u64,
    pub timeout_seconds: u64,
    pub keywords: Vec<String>,
}

impl TrendsConfig {
    /// Split the configured keywords into query groups of at most five
    pub fn keyword_groups(&self) -> Vec<Vec<String>> {
        group_keywords(&self.keywords)
    }
}

pub fn group_keywords(keywords: &[String]) -> Vec<Vec<String>> {
    keywords
        .chunks(MAX_KEYWORDS_PER_GROUP)
        .map(|chunk| chunk.to_vec())
        .collect()
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8600/trends/interest-over-time".to_string(),
            geo: "RU".to_string(),
            timeframe: "today 12-m".to_string(),
            delay_between_groups_ms: 1500,
            timeout_seconds: 25,
            keywords: vec![
                "зимние шины".to_string(),
                "летние шины".to_string(),
                "всесезонные шины".to_string(),
                "шины с шипами".to_string(),
                "бесплатежные шины".to_string(),
            ],
        }
    }
}
