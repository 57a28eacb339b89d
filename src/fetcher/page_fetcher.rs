use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use wreq::Client;
use wreq_util::Emulation;

use crate::config::HtmlConfig;

/// Anything that can return the HTML body behind a URL
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

/// HTTP page fetcher with a request timeout and a fixed User-Agent
pub struct PageFetcher {
    client: Client,
    user_agent: String,
}

impl PageFetcher {
    pub fn new(config: &HtmlConfig) -> Result<Self> {
        let client = Client::builder()
            .emulation(Emulation::Firefox136)
            .timeout(Duration::from_secs(config.scraping.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            user_agent: config.site.user_agent.clone(),
        })
    }
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent.as_str())
            .send()
            .await
            .map_err(|e| anyhow!("Network error fetching {}: {}", url, e))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP error {} for {}", response.status(), url));
        }

        let html = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response text from {}: {}", url, e))?;

        debug!("Fetched {} characters from {}", html.len(), url);
        Ok(html)
    }
}
