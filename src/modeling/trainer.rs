use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::metrics::{mean_absolute_error, mean_squared_error, r2};
use smartcore::model_selection::train_test_split;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::artifact::{DemandModel, FeatureImportance, Forest, TrainingReport};
use crate::features::{FeatureBuilder, column_union};
use crate::models::{Product, TREND_METRIC_PREFIX, trend_metric_name};
use crate::storage::Store;

pub const SEED: u64 = 42;
pub const TEST_SIZE: f32 = 0.2;
/// Smaller frames are trained and evaluated on every row
pub const MIN_ROWS_FOR_SPLIT: usize = 5;

const ID_COLUMNS: [&str; 3] = ["product_id", "date", "demand"];

/// Inclusive range of dates to build training rows for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TrainingWindow {
    /// `lookback_days` back from `today`, stopping `gap_days` short of it
    pub fn ending_before(today: NaiveDate, lookback_days: i64, gap_days: i64) -> Self {
        Self {
            start: today - Duration::days(lookback_days),
            end: today - Duration::days(gap_days),
        }
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |date| *date <= self.end)
    }
}

/// Training rows: identifiers, the demand label and one column per feature
pub struct TrainingFrame {
    pub data: DataFrame,
    pub feature_names: Vec<String>,
}

impl TrainingFrame {
    pub fn height(&self) -> usize {
        self.data.height()
    }

    fn feature_rows(&self) -> Result<Vec<Vec<f64>>> {
        let mut rows = vec![Vec::with_capacity(self.feature_names.len()); self.height()];
        for name in &self.feature_names {
            let values = self.data.column(name)?.f64()?;
            for (row, value) in rows.iter_mut().zip(values.into_iter()) {
                row.push(value.unwrap_or(0.0));
            }
        }
        Ok(rows)
    }

    fn labels(&self) -> Result<Vec<f64>> {
        let demand = self.data.column("demand")?.f64()?;
        Ok(demand.into_iter().map(|v| v.unwrap_or(0.0)).collect())
    }

    pub fn write_parquet<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        ParquetWriter::new(file).finish(&mut self.data)?;
        info!("Exported training frame ({} rows) to {}", self.height(), path.display());
        Ok(())
    }
}

/// Fits the demand regressor from store history
pub struct Trainer<'a> {
    store: &'a Store,
    version: String,
    export_path: Option<PathBuf>,
}

impl<'a> Trainer<'a> {
    pub fn new(store: &'a Store, version: &str) -> Self {
        Self {
            store,
            version: version.to_string(),
            export_path: None,
        }
    }

    /// Also write the filtered training frame as Parquet
    pub fn with_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    /// Build the frame, fit and evaluate. `None` when there is nothing to learn from.
    pub fn train(&self, products: Option<&[Product]>, window: TrainingWindow) -> Result<Option<DemandModel>> {
        let loaded;
        let products: &[Product] = match products {
            Some(products) => products,
            None => {
                loaded = self.store.list_products()?;
                &loaded
            }
        };

        if products.is_empty() {
            warn!("No products to train on");
            return Ok(None);
        }

        info!("🧱 Building training frame from {} to {}", window.start, window.end);
        let mut frame = self.build_frame(products, window)?;
        info!(
            "Training frame: {} rows, {} features",
            frame.height(),
            frame.feature_names.len()
        );

        if let Some(path) = &self.export_path {
            frame.write_parquet(path)?;
        }

        self.fit(&frame)
    }

    /// One row per (product, date) with a positive demand label
    pub fn build_frame(&self, products: &[Product], window: TrainingWindow) -> Result<TrainingFrame> {
        let labels = self.store.metric_lookup(TREND_METRIC_PREFIX)?;
        let builder = FeatureBuilder::new(self.store);

        let mut product_ids = Vec::new();
        let mut dates = Vec::new();
        let mut demand = Vec::new();
        let mut records = Vec::new();

        for date in window.dates() {
            for product in products {
                records.push(builder.build(product, date));
                product_ids.push(product.id);
                dates.push(date.to_string());
                demand.push(demand_label(product, date, &labels));
            }
        }

        let feature_names = column_union(&records);
        let rows: Vec<Vec<f64>> = records.iter().map(|r| r.to_row(&feature_names)).collect();

        let mut columns: Vec<Column> = vec![
            Series::new(ID_COLUMNS[0].into(), product_ids).into(),
            Series::new(ID_COLUMNS[1].into(), dates).into(),
            Series::new(ID_COLUMNS[2].into(), demand).into(),
        ];
        for (j, name) in feature_names.iter().enumerate() {
            let values: Vec<f64> = rows.iter().map(|row| row[j]).collect();
            columns.push(Series::new(name.as_str().into(), values).into());
        }

        let data = DataFrame::new(columns)
            .map_err(|e| anyhow!("Failed to create training frame: {}", e))?
            .lazy()
            .filter(col("demand").gt(lit(0.0)))
            .collect()?;

        Ok(TrainingFrame { data, feature_names })
    }

    pub fn fit(&self, frame: &TrainingFrame) -> Result<Option<DemandModel>> {
        let n = frame.height();
        if n == 0 {
            warn!("No training data: every row has a zero demand label");
            return Ok(None);
        }

        let x = DenseMatrix::from_2d_vec(&frame.feature_rows()?);
        let y = frame.labels()?;

        let (x_train, x_test, y_train, y_test) = if n >= MIN_ROWS_FOR_SPLIT {
            train_test_split(&x, &y, TEST_SIZE, true, Some(SEED))
        } else {
            warn!("Only {} rows, evaluating on the training data", n);
            (x.clone(), x, y.clone(), y)
        };

        info!("🌲 Fitting random forest on {} rows", y_train.len());
        let parameters = RandomForestRegressorParameters::default()
            .with_n_trees(100)
            .with_max_depth(10)
            .with_min_samples_split(5)
            .with_seed(SEED);
        let forest = RandomForestRegressor::fit(&x_train, &y_train, parameters)
            .map_err(|e| anyhow!("Failed to fit random forest: {}", e))?;

        let train_pred = predict(&forest, &x_train)?;
        let test_pred = predict(&forest, &x_test)?;

        let train_rows = matrix_rows(&x_train);
        let report = TrainingReport {
            train_rows: y_train.len(),
            test_rows: y_test.len(),
            train_mae: finite(mean_absolute_error(&y_train, &train_pred)),
            train_rmse: finite(mean_squared_error(&y_train, &train_pred).sqrt()),
            train_r2: finite(r2(&y_train, &train_pred)),
            test_mae: finite(mean_absolute_error(&y_test, &test_pred)),
            test_rmse: finite(mean_squared_error(&y_test, &test_pred).sqrt()),
            test_r2: finite(r2(&y_test, &test_pred)),
            feature_importance: permutation_importance(&forest, &train_rows, &y_train, &frame.feature_names)?,
        };

        info!(
            "✅ Model trained. Test R2: {:.3}, test MAE: {:.3}",
            report.test_r2, report.test_mae
        );

        Ok(Some(DemandModel::new(
            &self.version,
            frame.feature_names.clone(),
            report,
            forest,
        )))
    }
}

/// Same-day search interest for the product's tread pattern, else its category
pub fn demand_label(
    product: &Product,
    date: NaiveDate,
    labels: &HashMap<(NaiveDate, String), f64>,
) -> f64 {
    let keyword = match (&product.tread_pattern, &product.category) {
        (Some(pattern), _) => format!("{} шины", pattern),
        (None, Some(category)) => category.to_lowercase(),
        (None, None) => return 0.0,
    };

    labels
        .get(&(date, trend_metric_name(&keyword)))
        .copied()
        .unwrap_or(0.0)
}

fn predict(forest: &Forest, x: &DenseMatrix<f64>) -> Result<Vec<f64>> {
    forest
        .predict(x)
        .map_err(|e| anyhow!("Prediction failed: {}", e))
}

fn matrix_rows(x: &DenseMatrix<f64>) -> Vec<Vec<f64>> {
    let (nrows, ncols) = x.shape();
    (0..nrows)
        .map(|i| (0..ncols).map(|j| *x.get((i, j))).collect())
        .collect()
}

/// Increase in training MSE when a column is rotated by one row, normalized to sum to one
fn permutation_importance(
    forest: &Forest,
    rows: &[Vec<f64>],
    y: &Vec<f64>,
    names: &[String],
) -> Result<Vec<FeatureImportance>> {
    let baseline = mean_squared_error(y, &predict(forest, &DenseMatrix::from_2d_vec(&rows.to_vec()))?);
    let n = rows.len();

    let mut importance = Vec::with_capacity(names.len());
    for (j, name) in names.iter().enumerate() {
        let mut permuted = rows.to_vec();
        for i in 0..n {
            permuted[i][j] = rows[(i + 1) % n][j];
        }

        let error = mean_squared_error(y, &predict(forest, &DenseMatrix::from_2d_vec(&permuted))?);
        importance.push(FeatureImportance {
            feature: name.clone(),
            importance: finite(error - baseline).max(0.0),
        });
    }

    let total: f64 = importance.iter().map(|f| f.importance).sum();
    if total > 0.0 {
        for feature in &mut importance {
            feature.importance /= total;
        }
    }

    importance.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    Ok(importance)
}

fn finite(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
