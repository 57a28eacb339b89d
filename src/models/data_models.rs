use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;

/// Prefix of traffic metrics that hold search-interest series
pub const TREND_METRIC_PREFIX: &str = "trend_keyword:";

/// Lower and upper forecast band as fractions of the point estimate
pub const FORECAST_BAND_LOWER: f64 = 0.8;
pub const FORECAST_BAND_UPPER: f64 = 1.2;

pub const DEFAULT_MODEL_VERSION: &str = "rf_v1";

pub fn trend_metric_name(keyword: &str) -> String {
    format!("{}{}", TREND_METRIC_PREFIX, keyword)
}

/// Key/value characteristics scraped from a product detail page, in page order
pub type Specifications = IndexMap<String, String>;

/// A product as it comes out of the catalog scraper, before it has a row id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedProduct {
    pub name: String,
    pub sku: String,
    pub category: Option<String>,
    pub url: Option<String>,
    pub tread_pattern: Option<String>,
    pub specifications: Option<Specifications>,
    pub price: Option<f64>,
}

/// Extra attributes read from a product detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductDetails {
    pub specifications: Specifications,
    pub tread_pattern: Option<String>,
    pub price: Option<f64>,
}

impl ScrapedProduct {
    pub fn new(name: impl Into<String>, sku: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sku: sku.into(),
            category: None,
            url: None,
            tread_pattern: None,
            specifications: None,
            price: None,
        }
    }

    /// Merge detail-page attributes; an empty specification map stays `None`
    pub fn apply_details(&mut self, details: ProductDetails) {
        if !details.specifications.is_empty() {
            self.specifications = Some(details.specifications);
        }
        if details.tread_pattern.is_some() {
            self.tread_pattern = details.tread_pattern;
        }
        if details.price.is_some() {
            self.price = details.price;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub url: Option<String>,
    pub tread_pattern: Option<String>,
    pub specifications: Option<Specifications>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub id: i64,
    pub product_id: i64,
    pub date: NaiveDate,
    pub price: Option<f64>,
    pub in_stock: bool,
    pub promo: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPriceObservation {
    pub product_id: i64,
    pub date: NaiveDate,
    pub price: Option<f64>,
    pub in_stock: bool,
    pub promo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficMetric {
    pub id: i64,
    pub date: NaiveDate,
    pub region: Option<String>,
    pub metric_name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrafficMetric {
    pub date: NaiveDate,
    pub region: Option<String>,
    pub metric_name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: i64,
    pub product_id: i64,
    pub date: NaiveDate,
    pub yhat: f64,
    pub yhat_lower: Option<f64>,
    pub yhat_upper: Option<f64>,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewForecast {
    pub product_id: i64,
    pub date: NaiveDate,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
    pub model_version: String,
}

impl NewForecast {
    /// Point estimate with the fixed ±20% band
    pub fn with_band(product_id: i64, date: NaiveDate, yhat: f64, model_version: &str) -> Self {
        Self {
            product_id,
            date,
            yhat,
            yhat_lower: yhat * FORECAST_BAND_LOWER,
            yhat_upper: yhat * FORECAST_BAND_UPPER,
            model_version: model_version.to_string(),
        }
    }
}

/// Forecast row joined with its product name, as served by the API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastView {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub date: NaiveDate,
    pub yhat: f64,
    pub yhat_lower: Option<f64>,
    pub yhat_upper: Option<f64>,
    pub model_version: String,
}

/// Forecast demand aggregated over a group (tread pattern or category)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandAggregate {
    pub group: String,
    pub avg_demand: f64,
    pub total_demand: f64,
    pub forecast_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub products: i64,
    pub price_observations: i64,
    pub trends: i64,
    pub forecasts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_band() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let forecast = NewForecast::with_band(7, date, 50.0, DEFAULT_MODEL_VERSION);

        assert_eq!(forecast.yhat_lower, 40.0);
        assert_eq!(forecast.yhat_upper, 60.0);
        assert_eq!(forecast.model_version, "rf_v1");
    }

    #[test]
    fn test_apply_details_keeps_existing_values_when_missing() {
        let mut product = ScrapedProduct::new("К-83А 420/70-457", "abc");
        product.tread_pattern = Some("зимние".to_string());

        product.apply_details(ProductDetails::default());
        assert_eq!(product.tread_pattern.as_deref(), Some("зимние"));
        assert!(product.specifications.is_none());

        let mut specs = Specifications::new();
        specs.insert("размер".to_string(), "420/70-457".to_string());
        product.apply_details(ProductDetails {
            specifications: specs,
            tread_pattern: Some("летние".to_string()),
            price: Some(12500.0),
        });

        assert_eq!(product.tread_pattern.as_deref(), Some("летние"));
        assert_eq!(product.price, Some(12500.0));
        assert_eq!(product.specifications.unwrap().len(), 1);
    }

    #[test]
    fn test_trend_metric_name() {
        assert_eq!(trend_metric_name("шины"), "trend_keyword:шины");
    }
}
