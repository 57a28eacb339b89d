use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::RandomForestRegressor;
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::features::FeatureRecord;

pub type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Fit quality and feature importances from one training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_mae: f64,
    pub train_rmse: f64,
    pub train_r2: f64,
    pub test_mae: f64,
    pub test_rmse: f64,
    pub test_r2: f64,
    /// Sorted by importance, highest first; sums to one unless every feature scored zero
    pub feature_importance: Vec<FeatureImportance>,
}

impl TrainingReport {
    pub fn top_features(&self, n: usize) -> &[FeatureImportance] {
        &self.feature_importance[..n.min(self.feature_importance.len())]
    }
}

/// Trained demand regressor with the column layout it was fitted on
#[derive(Serialize, Deserialize)]
pub struct DemandModel {
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub report: TrainingReport,
    forest: Forest,
}

impl fmt::Debug for DemandModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemandModel")
            .field("version", &self.version)
            .field("trained_at", &self.trained_at)
            .field("features", &self.feature_names.len())
            .finish()
    }
}

impl DemandModel {
    pub fn new(version: &str, feature_names: Vec<String>, report: TrainingReport, forest: Forest) -> Self {
        Self {
            version: version.to_string(),
            trained_at: Utc::now(),
            feature_names,
            report,
            forest,
        }
    }

    /// Predict demand for one feature record
    pub fn predict(&self, record: &FeatureRecord) -> Result<f64> {
        let row = record.to_row(&self.feature_names);
        let predictions = self.predict_rows(vec![row])?;
        predictions
            .first()
            .copied()
            .ok_or_else(|| anyhow!("Model returned no prediction"))
    }

    pub(crate) fn predict_rows(&self, rows: Vec<Vec<f64>>) -> Result<Vec<f64>> {
        let x = DenseMatrix::from_2d_vec(&rows);
        self.forest
            .predict(&x)
            .map_err(|e| anyhow!("Prediction failed: {}", e))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create model directory {}", parent.display()))?;
            }
        }

        let json = serde_json::to_string(self).context("Failed to serialize model")?;
        fs::write(path, json).with_context(|| format!("Failed to write model to {}", path.display()))?;
        info!("💾 Model saved: {}", path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model from {}", path.display()))?;
        let model: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse model from {}", path.display()))?;
        info!("Model loaded: {} ({})", path.display(), model.version);
        Ok(model)
    }
}
