use anyhow::{Result, anyhow};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, info};
use url::Url;

use crate::config::html_config::SelectorConfig;
use crate::models::ScrapedProduct;

pub const DEFAULT_CATEGORY: &str = "Шины";
pub const TRUCK_CATEGORY: &str = "Грузовые шины";
pub const LIGHT_TRUCK_CATEGORY: &str = "Легко Грузовые шины";

/// Model code followed by a size, as it appears in catalog blocks ("К-83А 420/70-457")
const BLOCK_MODEL_PATTERN: &str = r"[КМ]-\d+[А-Я]?\s+\d+[/-]\d+[A-Z]?\d*|КИ-\d+";
/// Looser form used around detail links ("КИ-115АМ (САДКО) 12R18")
const LINK_MODEL_PATTERN: &str =
    r"(К-?\d+[А-Яа-я]?|КИ-?\d+[А-Яа-я]*)\s*\(?[А-Яа-я]*\)?\s*(\d+[/-]\d+[A-Z]?\d*|\d+R\d+)";

const MAX_LOOSE_BLOCK_CHARS: usize = 100;
const MIN_NAME_CHARS: usize = 3;

/// Heuristic extraction of tire products from catalog pages.
///
/// Strategies run in order and the first one that yields anything wins:
/// product cards, model-code blocks, "Подробнее" links with their context,
/// then bare links whose text is a model code.
pub struct ProductExtractor {
    base_domain: String,
    card_selectors: Vec<(String, Selector)>,
    card_name: Option<Selector>,
    card_sku: Option<Selector>,
    card_category: Option<Selector>,
    blocks: Selector,
    block_name: Selector,
    links: Selector,
    block_model: Regex,
    link_model: Regex,
    more_suffix: Regex,
}

impl ProductExtractor {
    pub fn new(selectors: &SelectorConfig, base_domain: &str) -> Result<Self> {
        let card_selectors = selectors
            .card_selectors
            .iter()
            .filter_map(|raw| match Selector::parse(raw) {
                Ok(selector) => Some((raw.clone(), selector)),
                Err(e) => {
                    debug!("Skipping invalid card selector '{}': {:?}", raw, e);
                    None
                }
            })
            .collect();

        Ok(Self {
            base_domain: base_domain.trim_end_matches('/').to_string(),
            card_selectors,
            card_name: group_selector(&selectors.card_name_selectors),
            card_sku: group_selector(&selectors.card_sku_selectors),
            card_category: group_selector(&selectors.card_category_selectors),
            blocks: parse_selector("div, section, article, li")?,
            block_name: parse_selector("strong, b, h3, h4, a")?,
            links: parse_selector("a")?,
            block_model: Regex::new(BLOCK_MODEL_PATTERN)?,
            link_model: Regex::new(LINK_MODEL_PATTERN)?,
            more_suffix: Regex::new(r"(?i)\s*Подробнее.*")?,
        })
    }

    /// Extract products from a catalog page. Never fails; an unusable page yields nothing.
    pub fn extract(&self, html: &str) -> Vec<ScrapedProduct> {
        let document = Html::parse_document(html);

        let strategies: [(&str, fn(&Self, &Html) -> Vec<ScrapedProduct>); 4] = [
            ("product cards", Self::extract_from_cards),
            ("model-code blocks", Self::extract_from_blocks),
            ("detail links", Self::extract_from_detail_links),
            ("model-code links", Self::extract_from_model_links),
        ];

        for (label, strategy) in strategies {
            let products = dedupe(strategy(self, &document));
            if !products.is_empty() {
                info!("🔍 Extracted {} products using {}", products.len(), label);
                return products;
            }
            debug!("No products found using {}", label);
        }

        Vec::new()
    }

    fn extract_from_cards(&self, document: &Html) -> Vec<ScrapedProduct> {
        for (raw, selector) in &self.card_selectors {
            let cards: Vec<ElementRef> = document.select(selector).collect();
            if cards.is_empty() {
                continue;
            }

            debug!("Card selector '{}' matched {} elements", raw, cards.len());
            return cards
                .into_iter()
                .filter_map(|card| {
                    let product = self.product_from_card(card);
                    if product.is_none() {
                        debug!("Skipping card without a name");
                    }
                    product
                })
                .collect();
        }

        Vec::new()
    }

    fn product_from_card(&self, card: ElementRef) -> Option<ScrapedProduct> {
        let name = self
            .card_name
            .as_ref()
            .and_then(|selector| card.select(selector).next())
            .map(element_text)
            .filter(|name| !name.is_empty())?;

        let sku = self
            .card_sku
            .as_ref()
            .and_then(|selector| card.select(selector).next())
            .and_then(|el| {
                let text = element_text(el);
                if text.is_empty() {
                    el.value().attr("data-sku").map(|s| s.trim().to_string())
                } else {
                    Some(text)
                }
            })
            .or_else(|| card.value().attr("data-sku").map(|s| s.trim().to_string()))
            .filter(|sku| !sku.is_empty())
            .unwrap_or_else(|| generate_sku(&name));

        let category = self
            .card_category
            .as_ref()
            .and_then(|selector| card.select(selector).next())
            .map(element_text)
            .filter(|category| !category.is_empty())
            .or_else(|| heading_category(card).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let mut product = ScrapedProduct::new(name, sku);
        product.category = Some(category);
        product.url = self.first_link_url(card);
        Some(product)
    }

    fn extract_from_blocks(&self, document: &Html) -> Vec<ScrapedProduct> {
        document
            .select(&self.blocks)
            .filter(|block| self.looks_like_product_block(*block))
            .filter_map(|block| {
                let product = self.product_from_block(block);
                if product.is_none() {
                    debug!("Skipping block without a usable name");
                }
                product
            })
            .collect()
    }

    fn looks_like_product_block(&self, block: ElementRef) -> bool {
        if block.select(&self.links).next().is_none() {
            return false;
        }

        let text = element_text(block);
        if text.is_empty() {
            return false;
        }

        self.block_model.is_match(&text)
            || (text.contains(['/', 'R', '-']) && text.chars().count() < MAX_LOOSE_BLOCK_CHARS)
    }

    fn product_from_block(&self, block: ElementRef) -> Option<ScrapedProduct> {
        let name = match block.select(&self.block_name).next() {
            Some(el) => element_text(el),
            None => block
                .text()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or_default()
                .to_string(),
        };

        if name.chars().count() < MIN_NAME_CHARS {
            return None;
        }

        let category = category_from_text(&element_text(block))
            .or_else(|| heading_category(block))
            .unwrap_or(DEFAULT_CATEGORY);

        let mut product = ScrapedProduct::new(name.clone(), generate_sku(&name));
        product.category = Some(category.to_string());
        product.url = self.first_link_url(block);
        Some(product)
    }

    fn extract_from_detail_links(&self, document: &Html) -> Vec<ScrapedProduct> {
        document
            .select(&self.links)
            .filter(|link| {
                let href = link.value().attr("href").unwrap_or_default();
                element_text(*link).to_lowercase().contains("подробнее") || href.contains("shini")
            })
            .filter_map(|link| self.product_from_detail_link(link))
            .collect()
    }

    fn product_from_detail_link(&self, link: ElementRef) -> Option<ScrapedProduct> {
        let parent = link.parent().and_then(ElementRef::wrap)?;
        let parent_text = element_text(parent);

        let name_part = match parent_text.split_once("Подробнее") {
            Some((before, _)) => before.trim().to_string(),
            None => self.more_suffix.replace(&parent_text, "").trim().to_string(),
        };

        if name_part.chars().count() <= MIN_NAME_CHARS {
            return None;
        }

        let name = self.link_model.find(&name_part)?.as_str().trim().to_string();

        let category = category_from_text(&parent_text)
            .or_else(|| heading_category(link))
            .unwrap_or(DEFAULT_CATEGORY);

        let mut product = ScrapedProduct::new(name.clone(), generate_sku(&name));
        product.category = Some(category.to_string());
        product.url = link.value().attr("href").and_then(|href| self.resolve_url(href));
        Some(product)
    }

    fn extract_from_model_links(&self, document: &Html) -> Vec<ScrapedProduct> {
        document
            .select(&self.links)
            .filter_map(|link| {
                let text = element_text(link);
                let name = self.link_model.find(&text)?.as_str().trim().to_string();

                let category = heading_category(link).unwrap_or(DEFAULT_CATEGORY);
                let mut product = ScrapedProduct::new(name.clone(), generate_sku(&name));
                product.category = Some(category.to_string());
                product.url = link.value().attr("href").and_then(|href| self.resolve_url(href));
                Some(product)
            })
            .collect()
    }

    fn first_link_url(&self, element: ElementRef) -> Option<String> {
        element
            .select(&self.links)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| self.resolve_url(href))
    }

    /// Resolve an href against the site's base domain
    pub fn resolve_url(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        if href.starts_with("http://") || href.starts_with("https://") {
            return Some(href.to_string());
        }

        let path = format!("/{}", href.trim_start_matches('/'));
        match Url::parse(&self.base_domain).and_then(|base| base.join(&path)) {
            Ok(url) => Some(url.to_string()),
            Err(_) => Some(format!("{}{}", self.base_domain, path)),
        }
    }
}

/// Stable identifier derived from the product name
pub fn generate_sku(name: &str) -> String {
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    digest[..12].to_string()
}

/// Map text mentioning truck tires to a category
pub fn category_from_text(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if lower.contains("грузов") && !lower.contains("легко") {
        Some(TRUCK_CATEGORY)
    } else if lower.contains("легк") {
        Some(LIGHT_TRUCK_CATEGORY)
    } else {
        None
    }
}

/// Category of the nearest heading (h1-h3) before the element in document order
/// that names one
fn heading_category(element: ElementRef) -> Option<&'static str> {
    let mut current = Some(*element);

    while let Some(node) = current {
        for sibling in node.prev_siblings() {
            let found = sibling
                .descendants()
                .filter_map(ElementRef::wrap)
                .filter(|el| matches!(el.value().name(), "h1" | "h2" | "h3"))
                .filter_map(|heading| category_from_text(&element_text(heading)))
                .last();
            if found.is_some() {
                return found;
            }
        }
        current = node.parent();
    }

    None
}

/// Visible text with whitespace collapsed to single spaces
pub fn element_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn dedupe(products: Vec<ScrapedProduct>) -> Vec<ScrapedProduct> {
    let mut seen = HashSet::new();
    products
        .into_iter()
        .filter(|p| seen.insert((p.name.clone(), p.sku.clone())))
        .collect()
}

fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| anyhow!("Invalid selector '{}': {:?}", raw, e))
}

/// One selector matching any of the given ones, first match in document order
pub(crate) fn group_selector(selectors: &[String]) -> Option<Selector> {
    if selectors.is_empty() {
        return None;
    }
    match Selector::parse(&selectors.join(", ")) {
        Ok(selector) => Some(selector),
        Err(e) => {
            debug!("Invalid selector group {:?}: {:?}", selectors, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ProductExtractor {
        ProductExtractor::new(&SelectorConfig::default(), "https://www.jsc-niir.ru").unwrap()
    }

    #[test]
    fn test_generate_sku_is_stable() {
        let sku = generate_sku("К-83А 420/70-457");
        assert_eq!(sku.len(), 12);
        assert!(sku.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sku, generate_sku("К-83А 420/70-457"));
        assert_ne!(sku, generate_sku("К-84 420/70-457"));
    }

    #[test]
    fn test_category_from_text() {
        assert_eq!(category_from_text("Грузовые шины"), Some(TRUCK_CATEGORY));
        assert_eq!(category_from_text("ЛЕГКО грузовые"), Some(LIGHT_TRUCK_CATEGORY));
        assert_eq!(category_from_text("Сельхоз"), None);
    }

    #[test]
    fn test_category_from_short_light_stem() {
        assert_eq!(category_from_text("Лёгкие шины"), None);
        assert_eq!(category_from_text("Легкая серия"), Some(LIGHT_TRUCK_CATEGORY));
        assert_eq!(category_from_text("Шины для легких грузовиков"), Some(TRUCK_CATEGORY));
    }

    #[test]
    fn test_cards_strategy() {
        let html = r#"
            <html><body>
              <div class="product-card" data-sku="A-100">
                <h3>К-83А 420/70-457</h3>
                <a href="/produkciya-2/shini/k-83a/">Подробнее</a>
              </div>
              <div class="product-card">
                <h3>КИ-115АМ 12R18</h3>
                <span class="category">Сельхоз шины</span>
              </div>
              <div class="product-card"><span>no name</span></div>
            </body></html>
        "#;

        let products = extractor().extract(html);
        assert_eq!(products.len(), 2);

        assert_eq!(products[0].name, "К-83А 420/70-457");
        assert_eq!(products[0].sku, "A-100");
        assert_eq!(products[0].category.as_deref(), Some(DEFAULT_CATEGORY));
        assert_eq!(
            products[0].url.as_deref(),
            Some("https://www.jsc-niir.ru/produkciya-2/shini/k-83a/")
        );

        assert_eq!(products[1].sku, generate_sku("КИ-115АМ 12R18"));
        assert_eq!(products[1].category.as_deref(), Some("Сельхоз шины"));
        assert!(products[1].url.is_none());
    }

    #[test]
    fn test_block_strategy_uses_heading_category() {
        let html = r#"
            <html><body>
              <h2>Легко грузовые шины</h2>
              <ul>
                <li><strong>К-83А 420/70-457</strong> <a href="shini/k-83a">Подробнее</a></li>
                <li><strong>К-83А 420/70-457</strong> <a href="shini/k-83a">Подробнее</a></li>
                <li><b>R</b> <a href="/r">R-</a></li>
              </ul>
            </body></html>
        "#;

        let products = extractor().extract(html);
        // Duplicate block collapses; the short-name block is dropped
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "К-83А 420/70-457");
        assert_eq!(products[0].category.as_deref(), Some(LIGHT_TRUCK_CATEGORY));
        assert_eq!(
            products[0].url.as_deref(),
            Some("https://www.jsc-niir.ru/shini/k-83a")
        );
    }

    #[test]
    fn test_heading_category_picks_nearest_preceding() {
        let html = r#"
            <html><body>
              <h2>Грузовые шины</h2>
              <p><a href="/p/1">К-83А 420/70-457</a></p>
              <h2>Легко грузовые шины</h2>
              <p><a href="/p/2">КИ-115АМ 12R18</a></p>
            </body></html>
        "#;

        let products = extractor().extract(html);
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].category.as_deref(), Some(TRUCK_CATEGORY));
        assert_eq!(products[1].category.as_deref(), Some(LIGHT_TRUCK_CATEGORY));
    }

    #[test]
    fn test_detail_link_strategy_reads_parent_context() {
        let html = r#"
            <html><body>
              <p>Шина КИ-115АМ (САДКО) 12R18 для грузовых машин Подробнее <a href="/catalog/item?id=7">Подробнее</a></p>
              <p>Каталог <a href="/catalog/">Подробнее</a></p>
            </body></html>
        "#;

        let products = extractor().extract(html);
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "КИ-115АМ (САДКО) 12R18");
        assert_eq!(products[0].category.as_deref(), Some(TRUCK_CATEGORY));
        assert_eq!(
            products[0].url.as_deref(),
            Some("https://www.jsc-niir.ru/catalog/item?id=7")
        );
    }

    #[test]
    fn test_model_link_strategy() {
        let html = r#"
            <html><body>
              <p><a href="https://cdn.example.ru/k-84.pdf">К-84 420/70-457</a></p>
            </body></html>
        "#;

        let products = extractor().extract(html);
        assert_eq!(products.len(), 1);
        // The size suffix after the second separator is not part of the model code
        assert_eq!(products[0].name, "К-84 420/70");
        assert_eq!(products[0].category.as_deref(), Some(DEFAULT_CATEGORY));
        assert_eq!(products[0].url.as_deref(), Some("https://cdn.example.ru/k-84.pdf"));
    }

    #[test]
    fn test_extract_never_fails_on_garbage() {
        let extractor = extractor();
        assert!(extractor.extract("").is_empty());
        assert!(extractor.extract("<<<not html at all").is_empty());
        assert!(extractor.extract("<html><body><p>Нет товаров</p></body></html>").is_empty());
    }

    #[test]
    fn test_resolve_url() {
        let extractor = extractor();
        assert_eq!(
            extractor.resolve_url("/a/b").as_deref(),
            Some("https://www.jsc-niir.ru/a/b")
        );
        assert_eq!(
            extractor.resolve_url("a/b").as_deref(),
            Some("https://www.jsc-niir.ru/a/b")
        );
        assert_eq!(extractor.resolve_url("  ").as_deref(), None);
    }
}
