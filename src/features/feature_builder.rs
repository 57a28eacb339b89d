use chrono::{Datelike, Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::error;

use crate::models::{Product, trend_metric_name};
use crate::storage::Store;

pub const TREND_LOOKBACK_DAYS: i64 = 30;
pub const PRICE_LOOKBACK_DAYS: i64 = 90;

/// Specification keys promoted to features when a product carries them
const SPEC_FEATURE_KEYS: [&str; 5] = ["размер", "size", "диаметр", "width", "ratio"];

/// Flat feature record for one (product, date) pair.
///
/// Absent keys mean "no data"; vectorizing against a column list fills them with zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRecord {
    pub numeric: BTreeMap<String, f64>,
    pub categorical: BTreeMap<String, String>,
}

impl FeatureRecord {
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.numeric.insert(name.into(), value);
    }

    pub fn set_flag(&mut self, name: impl Into<String>, flag: bool) {
        self.set(name, if flag { 1.0 } else { 0.0 });
    }

    pub fn set_category(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.categorical.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.numeric.get(name).copied()
    }

    /// Numeric names followed by one-hot `name=value` names for the categoricals
    pub fn column_names(&self) -> Vec<String> {
        self.numeric
            .keys()
            .cloned()
            .chain(self.categorical.iter().map(|(k, v)| one_hot_name(k, v)))
            .collect()
    }

    /// Values for the given columns; anything this record does not carry is zero
    pub fn to_row(&self, columns: &[String]) -> Vec<f64> {
        columns
            .iter()
            .map(|column| {
                if let Some(value) = self.numeric.get(column) {
                    return *value;
                }
                match column.split_once('=') {
                    Some((name, value)) if self.categorical.get(name).map(String::as_str) == Some(value) => 1.0,
                    _ => 0.0,
                }
            })
            .collect()
    }
}

pub fn one_hot_name(name: &str, value: &str) -> String {
    format!("{}={}", name, value)
}

/// Sorted union of the columns of all records
pub fn column_union<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a FeatureRecord>,
{
    records
        .into_iter()
        .flat_map(|record| record.column_names())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Builds feature records from products, the calendar and store history
pub struct FeatureBuilder<'a> {
    store: &'a Store,
    trend_lookback_days: i64,
    price_lookback_days: i64,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            trend_lookback_days: TREND_LOOKBACK_DAYS,
            price_lookback_days: PRICE_LOOKBACK_DAYS,
        }
    }

    pub fn build(&self, product: &Product, target_date: NaiveDate) -> FeatureRecord {
        let mut record = FeatureRecord::default();
        add_product_features(&mut record, product);
        add_calendar_features(&mut record, target_date);
        self.add_trend_features(&mut record, product, target_date);
        self.add_price_features(&mut record, product, target_date);
        record
    }

    fn add_trend_features(&self, record: &mut FeatureRecord, product: &Product, target_date: NaiveDate) {
        let from = target_date - Duration::days(self.trend_lookback_days);
        let pattern_keyword = product
            .tread_pattern
            .as_ref()
            .map(|pattern| format!("{} шины", pattern));

        let mut keywords = Vec::new();
        if let Some(category) = &product.category {
            keywords.push(category.to_lowercase());
        }
        if let Some(keyword) = &pattern_keyword {
            keywords.push(keyword.clone());
        }
        keywords.push("шины".to_string());

        for keyword in &keywords {
            match self.store.metric_window(&trend_metric_name(keyword), from, target_date) {
                Ok(values) => {
                    if let Some((avg, max)) = avg_max(&values) {
                        let suffix = keyword.replace(' ', "_");
                        record.set(format!("trend_avg_{}", suffix), avg);
                        record.set(format!("trend_max_{}", suffix), max);
                    }
                }
                Err(e) => error!("Failed to read trend features for '{}': {:#}", keyword, e),
            }
        }

        if let Some(keyword) = pattern_keyword {
            match self.store.metric_window(&trend_metric_name(&keyword), from, target_date) {
                Ok(values) => {
                    if let Some((avg, max)) = avg_max(&values) {
                        record.set("tread_pattern_trend_avg", avg);
                        record.set("tread_pattern_trend_max", max);
                    }
                }
                Err(e) => error!("Failed to read tread pattern trend for '{}': {:#}", keyword, e),
            }
        }
    }

    fn add_price_features(&self, record: &mut FeatureRecord, product: &Product, target_date: NaiveDate) {
        let from = target_date - Duration::days(self.price_lookback_days);
        let observations = match self.store.price_window(product.id, from, target_date) {
            Ok(observations) => observations,
            Err(e) => {
                error!("Failed to read price features for product {}: {:#}", product.id, e);
                return;
            }
        };

        if observations.is_empty() {
            return;
        }

        let prices: Vec<f64> = observations
            .iter()
            .filter_map(|obs| obs.price)
            .filter(|price| *price != 0.0)
            .collect();

        if !prices.is_empty() {
            let n = prices.len() as f64;
            let mean = prices.iter().sum::<f64>() / n;
            record.set("price_mean", mean);
            record.set("price_min", prices.iter().copied().fold(f64::INFINITY, f64::min));
            record.set("price_max", prices.iter().copied().fold(f64::NEG_INFINITY, f64::max));
            record.set("price_std", sample_std(&prices, mean));

            // Observations come newest first
            if let Some(last) = observations[0].price {
                record.set("last_price", last);
            }
        }

        let total = observations.len() as f64;
        let in_stock = observations.iter().filter(|obs| obs.in_stock).count() as f64;
        let promo = observations.iter().filter(|obs| obs.promo).count() as f64;
        record.set("in_stock_ratio", in_stock / total);
        record.set("promo_ratio", promo / total);
    }
}

fn add_product_features(record: &mut FeatureRecord, product: &Product) {
    record.set_category("category", product.category.as_deref().unwrap_or("unknown"));
    record.set_category("tread_pattern", product.tread_pattern.as_deref().unwrap_or("unknown"));
    record.set_flag("has_tread_pattern", product.tread_pattern.is_some());

    if let Some(specs) = &product.specifications {
        record.set("specs_count", specs.len() as f64);
        for key in SPEC_FEATURE_KEYS {
            if let Some(value) = specs.get(key) {
                record.set_category(format!("spec_{}", key), value.clone());
            }
        }
    }
}

fn add_calendar_features(record: &mut FeatureRecord, date: NaiveDate) {
    let month = date.month();
    record.set("year", date.year() as f64);
    record.set("month", month as f64);
    record.set("day", date.day() as f64);
    record.set("day_of_week", date.weekday().num_days_from_monday() as f64);
    record.set("quarter", ((month - 1) / 3 + 1) as f64);
    record.set_flag("is_winter", matches!(month, 12 | 1 | 2));
    record.set_flag("is_spring", matches!(month, 3..=5));
    record.set_flag("is_summer", matches!(month, 6..=8));
    record.set_flag("is_autumn", matches!(month, 9..=11));
    record.set_flag("winter_tire_season", matches!(month, 10..=12 | 1..=3));
    record.set_flag("summer_tire_season", matches!(month, 4..=9));
}

fn avg_max(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((avg, max))
}

/// Sample standard deviation; a single value has none and reports zero
fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
