use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::PageSource;
use crate::config::HtmlConfig;
use crate::models::ScrapedProduct;
use crate::processor::{DetailExtractor, ProductExtractor};

/// Walks a paginated catalog, optionally enriching products from their detail pages.
///
/// Stops at the page limit, on the first page without products, or on the first
/// page that cannot be fetched. Whatever was collected up to that point is returned.
pub struct CatalogWalker {
    extractor: ProductExtractor,
    details: DetailExtractor,
    delay: Duration,
    max_pages: usize,
    fetch_details: bool,
}

impl CatalogWalker {
    pub fn new(config: &HtmlConfig) -> Result<Self> {
        Ok(Self {
            extractor: ProductExtractor::new(&config.selectors, &config.base_domain())?,
            details: DetailExtractor::new(&config.selectors)?,
            delay: Duration::from_millis(config.scraping.delay_between_requests_ms),
            max_pages: config.scraping.max_pages,
            fetch_details: config.scraping.fetch_details,
        })
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_details(mut self, fetch_details: bool) -> Self {
        self.fetch_details = fetch_details;
        self
    }

    pub async fn walk(&self, source: &dyn PageSource, catalog_url: &str) -> Vec<ScrapedProduct> {
        let mut products = Vec::new();
        let mut page = 1;

        while page <= self.max_pages {
            let url = HtmlConfig::page_url(catalog_url, page);
            info!("📄 Scraping page {}: {}", page, url);

            let html = match source.fetch_page(&url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Failed to fetch page {}, stopping: {}", page, e);
                    break;
                }
            };

            let mut page_products = self.extractor.extract(&html);
            if page_products.is_empty() {
                info!("No products found on page {}, stopping pagination", page);
                break;
            }

            if self.fetch_details {
                self.enrich(source, &mut page_products).await;
            }

            products.extend(page_products);
            page += 1;
            sleep(self.delay).await;
        }

        info!("✅ Found {} products", products.len());
        products
    }

    async fn enrich(&self, source: &dyn PageSource, products: &mut [ScrapedProduct]) {
        for product in products.iter_mut() {
            let Some(url) = product.url.clone() else {
                continue;
            };

            match self.details.fetch_details(source, &url).await {
                Ok(details) => product.apply_details(details),
                Err(e) => warn!("Failed to fetch details for {}: {}", url, e),
            }

            sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::page_fetcher::tests::StaticPages;

    const CATALOG: &str = "https://www.jsc-niir.ru/produkciya-2/shini";

    fn config() -> HtmlConfig {
        let mut config = HtmlConfig::default();
        config.scraping.delay_between_requests_ms = 0;
        config.scraping.fetch_details = false;
        config
    }

    fn catalog_page(names: &[&str]) -> String {
        let items: String = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                format!(
                    r#"<li><strong>{}</strong> <a href="/produkciya-2/shini/p{}">Подробнее</a></li>"#,
                    name, i
                )
            })
            .collect();
        format!("<html><body><h2>Грузовые шины</h2><ul>{}</ul></body></html>", items)
    }

    #[tokio::test]
    async fn test_walk_stops_on_empty_page() {
        let pages = StaticPages::new([
            (CATALOG.to_string(), catalog_page(&["К-83А 420/70-457"])),
            (format!("{}?page=2", CATALOG), catalog_page(&["К-84 500/70-508"])),
            (format!("{}?page=3", CATALOG), "<html><body></body></html>".to_string()),
        ]);

        let walker = CatalogWalker::new(&config()).unwrap();
        let products = walker.walk(&pages, CATALOG).await;

        assert_eq!(products.len(), 2);
        assert_eq!(products[1].name, "К-84 500/70-508");
        assert_eq!(products[0].category.as_deref(), Some("Грузовые шины"));
        assert_eq!(pages.requested().len(), 3);
    }

    #[tokio::test]
    async fn test_walk_stops_on_fetch_failure() {
        let pages = StaticPages::new([(CATALOG, catalog_page(&["К-83А 420/70-457"]))]);

        let walker = CatalogWalker::new(&config()).unwrap();
        let products = walker.walk(&pages, CATALOG).await;

        assert_eq!(products.len(), 1);
        assert_eq!(
            pages.requested(),
            vec![CATALOG.to_string(), format!("{}?page=2", CATALOG)]
        );
    }

    #[tokio::test]
    async fn test_walk_respects_page_limit() {
        let pages = StaticPages::new([
            (CATALOG.to_string(), catalog_page(&["К-83А 420/70-457"])),
            (format!("{}?page=2", CATALOG), catalog_page(&["К-84 500/70-508"])),
        ]);

        let walker = CatalogWalker::new(&config()).unwrap().with_max_pages(1);
        let products = walker.walk(&pages, CATALOG).await;

        assert_eq!(products.len(), 1);
        assert_eq!(pages.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_walk_enriches_from_detail_pages() {
        let pages = StaticPages::new([
            (
                CATALOG.to_string(),
                catalog_page(&["К-83А 420/70-457", "К-84 500/70-508"]),
            ),
            (
                "https://www.jsc-niir.ru/produkciya-2/shini/p0".to_string(),
                r#"<table><tr><td>Сезон</td><td>Зимние</td></tr></table><div class="price">15 000</div>"#
                    .to_string(),
            ),
        ]);

        let walker = CatalogWalker::new(&config())
            .unwrap()
            .with_max_pages(1)
            .with_details(true);
        let products = walker.walk(&pages, CATALOG).await;

        // The second product's detail page is missing; it is kept without details
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].tread_pattern.as_deref(), Some("зимние"));
        assert_eq!(products[0].price, Some(15000.0));
        assert!(products[1].tread_pattern.is_none());
        assert!(products[1].specifications.is_none());
    }
}
