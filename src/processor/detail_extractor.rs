use anyhow::Result;
use regex::Regex;
use scraper::{Html, Selector};

use super::product_extractor::{element_text, group_selector};
use crate::config::html_config::SelectorConfig;
use crate::fetcher::PageSource;
use crate::models::{ProductDetails, Specifications};

/// Tread pattern labels and the substrings that identify them, checked in order
pub const TREAD_PATTERN_KEYWORDS: [(&str, &[&str]); 6] = [
    ("протектор", &["протектор", "tread", "pattern"]),
    ("зимние", &["зимн", "winter", "snow"]),
    ("летние", &["летн", "summer"]),
    ("всесезонные", &["всесезон", "all-season", "all-weather"]),
    ("дорожные", &["дорожн", "highway"]),
    ("внедорожные", &["внедорожн", "off-road", "mud"]),
];

/// Reads specifications, tread pattern and price from a product detail page
pub struct DetailExtractor {
    spec_rows: Option<Selector>,
    spec_key: Option<Selector>,
    spec_value: Option<Selector>,
    description: Option<Selector>,
    price: Option<Selector>,
    digits: Regex,
}

impl DetailExtractor {
    pub fn new(selectors: &SelectorConfig) -> Result<Self> {
        Ok(Self {
            spec_rows: group_selector(&selectors.spec_row_selectors),
            spec_key: group_selector(&selectors.spec_key_selectors),
            spec_value: group_selector(&selectors.spec_value_selectors),
            description: group_selector(&selectors.description_selectors),
            price: group_selector(&selectors.price_selectors),
            digits: Regex::new(r"\d+")?,
        })
    }

    /// Fetch a detail page and extract its attributes
    pub async fn fetch_details(&self, source: &dyn PageSource, url: &str) -> Result<ProductDetails> {
        let html = source.fetch_page(url).await?;
        Ok(self.parse(&html))
    }

    pub fn parse(&self, html: &str) -> ProductDetails {
        let document = Html::parse_document(html);

        let specifications = self.specifications(&document);
        let tread_pattern = tread_pattern_from_specs(&specifications)
            .or_else(|| self.description_text(&document).and_then(|text| tread_pattern_from_text(&text)))
            .map(str::to_string);

        ProductDetails {
            price: self.price(&document),
            specifications,
            tread_pattern,
        }
    }

    fn specifications(&self, document: &Html) -> Specifications {
        let mut specs = Specifications::new();
        let (Some(rows), Some(key_sel), Some(value_sel)) =
            (&self.spec_rows, &self.spec_key, &self.spec_value)
        else {
            return specs;
        };

        for row in document.select(rows) {
            let key = row.select(key_sel).next().map(element_text);
            let value = row.select(value_sel).next().map(element_text);

            if let (Some(key), Some(value)) = (key, value) {
                let key = key.to_lowercase();
                if !key.is_empty() && !value.is_empty() {
                    specs.insert(key, value);
                }
            }
        }

        specs
    }

    fn description_text(&self, document: &Html) -> Option<String> {
        let selector = self.description.as_ref()?;
        document.select(selector).next().map(element_text)
    }

    fn price(&self, document: &Html) -> Option<f64> {
        let selector = self.price.as_ref()?;
        let element = document.select(selector).next()?;

        let mut text = element_text(element);
        if text.is_empty() {
            text = element.value().attr("data-price").unwrap_or_default().to_string();
        }

        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        self.digits
            .find(&compact)
            .and_then(|digits| digits.as_str().parse::<f64>().ok())
    }
}

/// First tread pattern whose keywords occur in a specification key or value
pub fn tread_pattern_from_specs(specs: &Specifications) -> Option<&'static str> {
    specs.iter().find_map(|(key, value)| {
        let key = key.to_lowercase();
        let value = value.to_lowercase();
        TREAD_PATTERN_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| key.contains(*kw) || value.contains(*kw)))
            .map(|(pattern, _)| *pattern)
    })
}

pub fn tread_pattern_from_text(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    TREAD_PATTERN_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(*kw)))
        .map(|(pattern, _)| *pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::page_fetcher::tests::StaticPages;

    fn extractor() -> DetailExtractor {
        DetailExtractor::new(&SelectorConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_table_specs_and_price() {
        let html = r#"
            <html><body>
              <table>
                <tr><td>Размер</td><td>420/70-457</td></tr>
                <tr><td>Сезон</td><td>Зимние</td></tr>
              </table>
              <div class="price">12 500 руб.</div>
            </body></html>
        "#;

        let details = extractor().parse(html);
        assert_eq!(details.specifications["размер"], "420/70-457");
        assert_eq!(details.specifications["сезон"], "Зимние");
        assert_eq!(details.tread_pattern.as_deref(), Some("зимние"));
        assert_eq!(details.price, Some(12500.0));
    }

    #[test]
    fn test_first_matching_spec_row_wins_in_page_order() {
        let html = r#"
            <html><body>
              <table>
                <tr><td>Сезон</td><td>Зимние</td></tr>
                <tr><td>Рисунок протектора</td><td>дорожный</td></tr>
              </table>
            </body></html>
        "#;

        let details = extractor().parse(html);
        let keys: Vec<&str> = details.specifications.keys().map(String::as_str).collect();
        assert_eq!(keys, ["сезон", "рисунок протектора"]);
        assert_eq!(details.tread_pattern.as_deref(), Some("зимние"));
    }

    #[test]
    fn test_tread_pattern_falls_back_to_description() {
        let html = r#"
            <html><body>
              <div class="description">Шина для движения по бездорожью, off-road протектор.</div>
              <span data-price="9900" class="product-price"></span>
            </body></html>
        "#;

        let details = extractor().parse(html);
        assert!(details.specifications.is_empty());
        // "протектор" is checked before "внедорожные"
        assert_eq!(details.tread_pattern.as_deref(), Some("протектор"));
        assert_eq!(details.price, Some(9900.0));
    }

    #[test]
    fn test_no_details_on_plain_page() {
        let details = extractor().parse("<html><body><p>Нет данных</p></body></html>");
        assert_eq!(details, ProductDetails::default());
    }

    #[test]
    fn test_tread_keyword_order() {
        assert_eq!(tread_pattern_from_text("Летние и всесезонные"), Some("летние"));
        assert_eq!(tread_pattern_from_text("highway use"), Some("дорожные"));
        assert_eq!(tread_pattern_from_text("грузовая"), None);
    }

    #[tokio::test]
    async fn test_fetch_details_through_page_source() {
        let pages = StaticPages::new([(
            "https://x.ru/p/1",
            r#"<dl class="spec-item"><dt>Тип</dt><dd>Summer</dd></dl>"#,
        )]);

        let details = extractor()
            .fetch_details(&pages, "https://x.ru/p/1")
            .await
            .unwrap();
        assert_eq!(details.tread_pattern.as_deref(), Some("летние"));
        assert!(extractor().fetch_details(&pages, "https://x.ru/p/2").await.is_err());
    }
}
