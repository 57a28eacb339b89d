use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for scraping the manufacturer's HTML catalog
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HtmlConfig {
    pub site: SiteConfig,
    pub scraping: ScrapingConfig,
    pub selectors: SelectorConfig,
}

/// Basic site information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub catalog_path: String,
    pub user_agent: String,
}

/// Scraping behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub delay_between_requests_ms: u64,
    pub max_pages: usize,
    pub timeout_seconds: u64,
    pub fetch_details: bool,
}

/// CSS selectors for the card and detail-page strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub card_selectors: Vec<String>,
    pub card_name_selectors: Vec<String>,
    pub card_sku_selectors: Vec<String>,
    pub card_category_selectors: Vec<String>,
    pub spec_row_selectors: Vec<String>,
    pub spec_key_selectors: Vec<String>,
    pub spec_value_selectors: Vec<String>,
    pub description_selectors: Vec<String>,
    pub price_selectors: Vec<String>,
}

impl HtmlConfig {
    /// Scheme and host of the configured base URL, without any path
    pub fn base_domain(&self) -> String {
        match Url::parse(&self.site.base_url) {
            Ok(url) => match url.host_str() {
                Some(host) => match url.port() {
                    Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                    None => format!("{}://{}", url.scheme(), host),
                },
                None => self.site.base_url.trim_end_matches('/').to_string(),
            },
            Err(_) => self.site.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve the catalog URL to walk.
    ///
    /// An explicit URL wins; relative paths are joined to the base domain. Without
    /// an explicit URL, a base URL that already carries a path is used as is,
    /// otherwise the configured catalog path is appended.
    pub fn catalog_url(&self, explicit: Option<&str>) -> String {
        let domain = self.base_domain();

        let raw = match explicit {
            Some(url) => url.to_string(),
            None => match Url::parse(&self.site.base_url) {
                Ok(url) if !url.path().trim_matches('/').is_empty() => self.site.base_url.clone(),
                _ => self.site.catalog_path.clone(),
            },
        };

        let absolute = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw
        } else if raw.starts_with('/') {
            format!("{}{}", domain, raw)
        } else {
            format!("{}/{}", domain, raw)
        };

        absolute.trim_end_matches('/').to_string()
    }

    /// URL of the given catalog page; page 1 is the bare catalog URL
    pub fn page_url(catalog_url: &str, page: usize) -> String {
        if page > 1 {
            format!("{}?page={}", catalog_url, page)
        } else {
            catalog_url.to_string()
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.jsc-niir.ru".to_string(),
            catalog_path: "/produkciya-2/".to_string(),
            user_agent: "demand-forecast-bot/1.0".to_string(),
        }
    }
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            delay_between_requests_ms: 1200,
            max_pages: 10,
            timeout_seconds: 15,
            fetch_details: true,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Self {
            card_selectors: owned(&[".product-item", ".product-card", ".goods-item", "[data-sku]"]),
            card_name_selectors: owned(&["h2", "h3", ".product-title", ".goods-title", "a"]),
            card_sku_selectors: owned(&[".sku", ".article", ".articul", "[data-sku]"]),
            card_category_selectors: owned(&[".category", ".product-category", ".breadcrumb-item"]),
            spec_row_selectors: owned(&[".spec-item", ".characteristic", ".param-item", "tr"]),
            spec_key_selectors: owned(&["dt", ".spec-name", ".param-name", "td:first-child"]),
            spec_value_selectors: owned(&["dd", ".spec-value", ".param-value", "td:last-child"]),
            description_selectors: owned(&[".description", ".product-description", ".content"]),
            price_selectors: owned(&[".price", ".product-price", "[data-price]"]),
        }
    }
}
