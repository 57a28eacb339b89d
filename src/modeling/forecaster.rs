use anyhow::Result;
use chrono::{Duration, Local, NaiveDate};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::artifact::DemandModel;
use crate::features::FeatureBuilder;
use crate::models::{DemandAggregate, Forecast, NewForecast, Product};
use crate::storage::{DemandGrouping, ForecastDates, Store};

pub const DEFAULT_HORIZON_DAYS: i64 = 30;
pub const DEFAULT_RECOMMENDATION_OFFSET_DAYS: i64 = 30;

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// The `days` dates following `start`
pub fn horizon_dates(start: NaiveDate, days: i64) -> Vec<NaiveDate> {
    (1..=days).map(|offset| start + Duration::days(offset)).collect()
}

/// Predict and store demand for every product and date.
///
/// Defaults to all stored products and the next thirty days. Pairs that fail to
/// predict are logged and skipped; the rest are written in one batch and returned.
pub fn generate_forecasts(
    store: &Store,
    model: &DemandModel,
    products: Option<&[Product]>,
    dates: Option<&[NaiveDate]>,
    model_version: &str,
) -> Result<Vec<Forecast>> {
    let loaded;
    let products: &[Product] = match products {
        Some(products) => products,
        None => {
            loaded = store.list_products()?;
            &loaded
        }
    };

    let default_dates;
    let dates: &[NaiveDate] = match dates {
        Some(dates) => dates,
        None => {
            default_dates = horizon_dates(today(), DEFAULT_HORIZON_DAYS);
            &default_dates
        }
    };

    let builder = FeatureBuilder::new(store);
    let mut batch = Vec::with_capacity(products.len() * dates.len());

    for product in products {
        for date in dates {
            let record = builder.build(product, *date);
            match model.predict(&record) {
                Ok(yhat) => batch.push(NewForecast::with_band(product.id, *date, yhat, model_version)),
                Err(e) => warn!("Forecast failed for product {} on {}: {:#}", product.id, date, e),
            }
        }
    }

    let written = store.upsert_forecasts(&batch)?;
    info!("🔮 Wrote {} forecasts", written.len());
    Ok(written)
}

/// Stored forecast demand per tread pattern on one date (default thirty days out),
/// highest average first
pub fn tread_pattern_recommendations(store: &Store, date: Option<NaiveDate>) -> Result<Vec<DemandAggregate>> {
    let date = date.unwrap_or_else(|| today() + Duration::days(DEFAULT_RECOMMENDATION_OFFSET_DAYS));
    let recommendations = store.demand_by(DemandGrouping::TreadPattern, ForecastDates::On(date))?;

    if recommendations.is_empty() {
        warn!("No forecasts to recommend from on {}", date);
    } else {
        info!("Tread pattern recommendations for {}:", date);
        for rec in &recommendations {
            info!(
                "  {}: avg {:.2}, total {:.2}, products {}",
                rec.group, rec.avg_demand, rec.total_demand, rec.forecast_count
            );
        }
    }

    Ok(recommendations)
}

/// Live per-pattern demand from the model without touching stored forecasts
pub fn preview_tread_pattern_demand(
    store: &Store,
    model: &DemandModel,
    products: &[Product],
    date: NaiveDate,
) -> Vec<DemandAggregate> {
    let builder = FeatureBuilder::new(store);
    let mut by_pattern: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for product in products {
        let Some(pattern) = &product.tread_pattern else {
            continue;
        };
        match model.predict(&builder.build(product, date)) {
            Ok(yhat) => by_pattern.entry(pattern.clone()).or_default().push(yhat),
            Err(e) => warn!("Preview failed for product {}: {:#}", product.id, e),
        }
    }

    let mut aggregates: Vec<DemandAggregate> = by_pattern
        .into_iter()
        .map(|(group, values)| {
            let total: f64 = values.iter().sum();
            DemandAggregate {
                group,
                avg_demand: total / values.len() as f64,
                total_demand: total,
                forecast_count: values.len() as i64,
            }
        })
        .collect();

    aggregates.sort_by(|a, b| b.avg_demand.partial_cmp(&a.avg_demand).unwrap_or(Ordering::Equal));
    aggregates
}
