use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::fetcher::{CatalogWalker, PageSource, TrendsSource, collect_trends};
use crate::modeling::forecaster::{horizon_dates, today};
use crate::modeling::{DemandModel, Trainer, TrainingWindow, generate_forecasts, tread_pattern_recommendations};
use crate::models::{DemandAggregate, NewPriceObservation, Product};
use crate::storage::Store;

/// Options for one catalog scrape
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    pub catalog_url: Option<String>,
    pub max_pages: Option<usize>,
    pub fetch_details: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionSummary {
    pub products: usize,
    pub price_observations: usize,
    pub trend_metrics: usize,
}

#[derive(Debug)]
pub struct AnalysisSummary {
    pub collection: CollectionSummary,
    pub model: Option<DemandModel>,
    pub forecasts: usize,
    pub recommendations: Vec<DemandAggregate>,
}

/// Walk the catalog, upsert the products and record today's prices
pub async fn scrape_catalog(
    store: &Store,
    config: &AppConfig,
    pages: &dyn PageSource,
    options: &ScrapeOptions,
) -> Result<(Vec<Product>, usize)> {
    let catalog_url = config.html.catalog_url(options.catalog_url.as_deref());

    let mut walker = CatalogWalker::new(&config.html)?;
    if let Some(max_pages) = options.max_pages {
        walker = walker.with_max_pages(max_pages);
    }
    if let Some(fetch_details) = options.fetch_details {
        walker = walker.with_details(fetch_details);
    }

    let scraped = walker.walk(pages, &catalog_url).await;
    if scraped.is_empty() {
        warn!("No products scraped from {}", catalog_url);
        return Ok((Vec::new(), 0));
    }

    let saved = store.save_products(&scraped).context("Failed to save scraped products")?;
    let ids: HashMap<&str, i64> = saved.iter().map(|p| (p.sku.as_str(), p.id)).collect();

    let observed_on = today();
    let observations: Vec<NewPriceObservation> = scraped
        .iter()
        .filter_map(|product| {
            let price = product.price?;
            let product_id = *ids.get(product.sku.as_str())?;
            Some(NewPriceObservation {
                product_id,
                date: observed_on,
                price: Some(price),
                in_stock: true,
                promo: false,
            })
        })
        .collect();

    let price_count = store
        .save_price_observations(&observations)
        .context("Failed to save price observations")?;

    info!("💾 Saved {} products and {} prices", saved.len(), price_count);
    Ok((saved, price_count))
}

/// Fetch the configured (or given) keywords and store them as traffic metrics.
/// Returns the number of newly inserted observations.
pub async fn collect_trend_metrics(
    store: &Store,
    config: &AppConfig,
    source: &dyn TrendsSource,
    keywords: Option<&[String]>,
) -> Result<usize> {
    let metrics = collect_trends(source, &config.trends, keywords).await;
    if metrics.is_empty() {
        warn!("No trend observations collected");
        return Ok(0);
    }

    let inserted = store
        .save_traffic_metrics(&metrics)
        .context("Failed to save trend metrics")?;
    info!("💾 Saved {} new trend observations", inserted);
    Ok(inserted)
}

/// Scrape the catalog, then collect trends when a source is given
pub async fn run_data_collection(
    store: &Store,
    config: &AppConfig,
    pages: &dyn PageSource,
    trends: Option<&dyn TrendsSource>,
    options: &ScrapeOptions,
) -> Result<CollectionSummary> {
    info!("🚀 Starting data collection");

    let (products, price_observations) = scrape_catalog(store, config, pages, options).await?;

    let trend_metrics = match trends {
        Some(source) => collect_trend_metrics(store, config, source, None).await?,
        None => 0,
    };

    let summary = CollectionSummary {
        products: products.len(),
        price_observations,
        trend_metrics,
    };
    info!("✅ Data collection finished: {:?}", summary);
    Ok(summary)
}

/// Training window ending `train_gap_days` before `today`
pub fn default_training_window(config: &AppConfig, today: NaiveDate) -> TrainingWindow {
    TrainingWindow::ending_before(today, config.model.train_lookback_days, config.model.train_gap_days)
}

/// Collect, train, save the model, forecast the horizon and recommend.
///
/// A run that has nothing to train on stops after collection with no model.
pub async fn run_full_analysis(
    store: &Store,
    config: &AppConfig,
    pages: &dyn PageSource,
    trends: Option<&dyn TrendsSource>,
    options: &ScrapeOptions,
) -> Result<AnalysisSummary> {
    let collection = run_data_collection(store, config, pages, trends, options).await?;

    let start = today();
    let window = default_training_window(config, start);
    let Some(model) = Trainer::new(store, &config.model.version).train(None, window)? else {
        warn!("⚠️ Not enough data to train a model, stopping");
        return Ok(AnalysisSummary {
            collection,
            model: None,
            forecasts: 0,
            recommendations: Vec::new(),
        });
    };

    model.save(&config.model.path)?;

    let dates = horizon_dates(start, config.model.horizon_days);
    let forecasts = generate_forecasts(store, &model, None, Some(dates.as_slice()), &config.model.version)?;

    let target = start + Duration::days(config.model.recommendation_offset_days);
    let recommendations = tread_pattern_recommendations(store, Some(target))?;

    info!("🎉 Analysis finished: {} forecasts, {} tread patterns", forecasts.len(), recommendations.len());
    Ok(AnalysisSummary {
        collection,
        model: Some(model),
        forecasts: forecasts.len(),
        recommendations,
    })
}
