//! SQLite persistence for products, price observations, traffic metrics and forecasts.
//!
//! Every write batch runs inside one transaction: an error anywhere in the batch
//! drops the transaction (rolling it back) and is returned to the caller.

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::models::{
    DemandAggregate, Forecast, ForecastView, NewForecast, NewPriceObservation, NewTrafficMetric,
    PriceObservation, Product, ScrapedProduct, Specifications, StoreStats, TrafficMetric,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    category TEXT,
    url TEXT,
    tread_pattern TEXT,
    specifications TEXT
);
CREATE INDEX IF NOT EXISTS ix_products_tread_pattern ON products(tread_pattern);

CREATE TABLE IF NOT EXISTS price_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    date TEXT NOT NULL,
    price REAL,
    in_stock INTEGER NOT NULL DEFAULT 1,
    promo INTEGER NOT NULL DEFAULT 0,
    CONSTRAINT uq_ps_prod_date UNIQUE (product_id, date)
);
CREATE INDEX IF NOT EXISTS ix_price_snapshots_date ON price_snapshots(date);

CREATE TABLE IF NOT EXISTS traffic_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    region TEXT,
    metric_name TEXT NOT NULL,
    value REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_traffic_metrics_date ON traffic_metrics(date);
CREATE INDEX IF NOT EXISTS ix_traffic_metrics_metric_name ON traffic_metrics(metric_name, date);
DELETE FROM traffic_metrics WHERE id NOT IN (
    SELECT MAX(id) FROM traffic_metrics GROUP BY date, metric_name, IFNULL(region, '')
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_traffic_metrics_key
    ON traffic_metrics(date, metric_name, IFNULL(region, ''));

CREATE TABLE IF NOT EXISTS forecasts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    product_id INTEGER NOT NULL REFERENCES products(id),
    yhat REAL NOT NULL,
    yhat_lower REAL,
    yhat_upper REAL,
    model_version TEXT NOT NULL DEFAULT 'rf_v1',
    CONSTRAINT uq_forecast_prod_date UNIQUE (product_id, date)
);
CREATE INDEX IF NOT EXISTS ix_forecasts_date ON forecasts(date);
"#;

const PRODUCT_COLUMNS: &str = "id, sku, name, category, url, tread_pattern, specifications";
const FORECAST_COLUMNS: &str = "id, product_id, date, yhat, yhat_lower, yhat_upper, model_version";

/// Product attribute used to group forecast demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemandGrouping {
    TreadPattern,
    Category,
}

impl DemandGrouping {
    fn column(self) -> &'static str {
        match self {
            DemandGrouping::TreadPattern => "tread_pattern",
            DemandGrouping::Category => "category",
        }
    }
}

/// Which forecast dates an aggregation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastDates {
    On(NaiveDate),
    Since(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeTarget {
    Forecasts,
    Trends,
    Products,
}

/// Handle to the relational store, shared by reference with every operation
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection mutex poisoned"))
    }

    // ----- writes -----

    /// Upsert scraped products by SKU and return the stored rows.
    ///
    /// Name, category and URL are overwritten; tread pattern and specifications
    /// only when the new scrape carries them. The SKU is never updated.
    pub fn save_products(&self, products: &[ScrapedProduct]) -> Result<Vec<Product>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut saved = Vec::with_capacity(products.len());

        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO products (sku, name, category, url, tread_pattern, specifications)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(sku) DO UPDATE SET
                    name = excluded.name,
                    category = excluded.category,
                    url = excluded.url,
                    tread_pattern = COALESCE(excluded.tread_pattern, products.tread_pattern),
                    specifications = COALESCE(excluded.specifications, products.specifications)
                "#,
            )?;
            let mut select = tx.prepare(&format!(
                "SELECT {} FROM products WHERE sku = ?1",
                PRODUCT_COLUMNS
            ))?;

            for product in products {
                let specifications = product
                    .specifications
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;

                upsert
                    .execute(params![
                        product.sku,
                        product.name,
                        product.category,
                        product.url,
                        product.tread_pattern,
                        specifications,
                    ])
                    .with_context(|| format!("Failed to save product {}", product.sku))?;

                saved.push(select.query_row(params![product.sku], row_to_product)?);
            }
        }

        tx.commit().context("Failed to commit products")?;
        info!("Saved {} products", saved.len());
        Ok(saved)
    }

    /// Upsert price observations on (product, date)
    pub fn save_price_observations(&self, observations: &[NewPriceObservation]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO price_snapshots (product_id, date, price, in_stock, promo)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(product_id, date) DO UPDATE SET
                    price = excluded.price,
                    in_stock = excluded.in_stock,
                    promo = excluded.promo
                "#,
            )?;

            for obs in observations {
                stmt.execute(params![obs.product_id, obs.date, obs.price, obs.in_stock, obs.promo])
                    .with_context(|| {
                        format!(
                            "Failed to save price observation for product {} on {}",
                            obs.product_id, obs.date
                        )
                    })?;
            }
        }

        tx.commit().context("Failed to commit price observations")?;
        Ok(observations.len())
    }

    /// Upsert traffic metrics on (date, metric name, region); returns the number of new rows
    pub fn save_traffic_metrics(&self, metrics: &[NewTrafficMetric]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut find = tx.prepare(
                "SELECT id FROM traffic_metrics WHERE date = ?1 AND metric_name = ?2 AND region IS ?3",
            )?;
            let mut update = tx.prepare("UPDATE traffic_metrics SET value = ?2 WHERE id = ?1")?;
            let mut insert = tx.prepare(
                "INSERT INTO traffic_metrics (date, region, metric_name, value) VALUES (?1, ?2, ?3, ?4)",
            )?;

            for metric in metrics {
                let existing: Option<i64> = find
                    .query_row(params![metric.date, metric.metric_name, metric.region], |row| {
                        row.get(0)
                    })
                    .optional()?;

                match existing {
                    Some(id) => {
                        update.execute(params![id, metric.value])?;
                    }
                    None => {
                        insert.execute(params![
                            metric.date,
                            metric.region,
                            metric.metric_name,
                            metric.value
                        ])?;
                        inserted += 1;
                    }
                }
            }
        }

        tx.commit().context("Failed to commit traffic metrics")?;
        info!("Saved {} new traffic metrics ({} received)", inserted, metrics.len());
        Ok(inserted)
    }

    /// Upsert forecasts on (product, date), last write wins; returns the stored rows
    pub fn upsert_forecasts(&self, forecasts: &[NewForecast]) -> Result<Vec<Forecast>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut stored = Vec::with_capacity(forecasts.len());

        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO forecasts (product_id, date, yhat, yhat_lower, yhat_upper, model_version)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(product_id, date) DO UPDATE SET
                    yhat = excluded.yhat,
                    yhat_lower = excluded.yhat_lower,
                    yhat_upper = excluded.yhat_upper,
                    model_version = excluded.model_version
                "#,
            )?;
            let mut select = tx.prepare(&format!(
                "SELECT {} FROM forecasts WHERE product_id = ?1 AND date = ?2",
                FORECAST_COLUMNS
            ))?;

            for forecast in forecasts {
                upsert
                    .execute(params![
                        forecast.product_id,
                        forecast.date,
                        forecast.yhat,
                        forecast.yhat_lower,
                        forecast.yhat_upper,
                        forecast.model_version,
                    ])
                    .with_context(|| {
                        format!(
                            "Failed to save forecast for product {} on {}",
                            forecast.product_id, forecast.date
                        )
                    })?;

                stored.push(select.query_row(
                    params![forecast.product_id, forecast.date],
                    row_to_forecast,
                )?);
            }
        }

        tx.commit().context("Failed to commit forecasts")?;
        Ok(stored)
    }

    /// Delete every row of the target; purging products also removes their dependents
    pub fn purge(&self, target: PurgeTarget) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let deleted = match target {
            PurgeTarget::Forecasts => tx.execute("DELETE FROM forecasts", [])?,
            PurgeTarget::Trends => tx.execute("DELETE FROM traffic_metrics", [])?,
            PurgeTarget::Products => {
                tx.execute("DELETE FROM forecasts", [])?;
                tx.execute("DELETE FROM price_snapshots", [])?;
                tx.execute("DELETE FROM products", [])?
            }
        };

        tx.commit()?;
        Ok(deleted)
    }

    // ----- reads -----

    pub fn list_products(&self) -> Result<Vec<Product>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM products ORDER BY name, id",
            PRODUCT_COLUMNS
        ))?;
        let products = stmt
            .query_map([], row_to_product)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(products)
    }

    /// Price observations in `[from, until)`, newest first
    pub fn price_window(
        &self,
        product_id: i64,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<PriceObservation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, product_id, date, price, in_stock, promo
            FROM price_snapshots
            WHERE product_id = ?1 AND date >= ?2 AND date < ?3
            ORDER BY date DESC
            "#,
        )?;
        let rows = stmt
            .query_map(params![product_id, from, until], |row| {
                Ok(PriceObservation {
                    id: row.get(0)?,
                    product_id: row.get(1)?,
                    date: row.get(2)?,
                    price: row.get(3)?,
                    in_stock: row.get(4)?,
                    promo: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Metric values in `[from, until)`
    pub fn metric_window(&self, metric_name: &str, from: NaiveDate, until: NaiveDate) -> Result<Vec<f64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT value FROM traffic_metrics WHERE metric_name = ?1 AND date >= ?2 AND date < ?3",
        )?;
        let values = stmt
            .query_map(params![metric_name, from, until], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<f64>>>()?;
        Ok(values)
    }

    /// All metrics whose name starts with `prefix`, keyed by (date, metric name)
    pub fn metric_lookup(&self, prefix: &str) -> Result<HashMap<(NaiveDate, String), f64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, metric_name, value FROM traffic_metrics WHERE substr(metric_name, 1, length(?1)) = ?1 ORDER BY id",
        )?;
        let mut lookup = HashMap::new();
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
        })?;
        for row in rows {
            let (date, name, value) = row?;
            lookup.insert((date, name), value);
        }
        Ok(lookup)
    }

    /// Series of one metric in `[from, to]`, oldest first
    pub fn trend_series(&self, metric_name: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<TrafficMetric>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, date, region, metric_name, value
            FROM traffic_metrics
            WHERE metric_name = ?1 AND date >= ?2 AND date <= ?3
            ORDER BY date, id
            "#,
        )?;
        let rows = stmt
            .query_map(params![metric_name, from, to], |row| {
                Ok(TrafficMetric {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    region: row.get(2)?,
                    metric_name: row.get(3)?,
                    value: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn metric_names(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT metric_name FROM traffic_metrics WHERE substr(metric_name, 1, length(?1)) = ?1 ORDER BY metric_name",
        )?;
        let names = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Forecasts dated in `(after, until]`, optionally for one product, by date
    pub fn list_forecasts(
        &self,
        product_id: Option<i64>,
        after: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<ForecastView>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT f.id, f.product_id, p.name, f.date, f.yhat, f.yhat_lower, f.yhat_upper, f.model_version
            FROM forecasts f
            JOIN products p ON p.id = f.product_id
            WHERE f.date > ?1 AND f.date <= ?2 AND (?3 IS NULL OR f.product_id = ?3)
            ORDER BY f.date, f.product_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![after, until, product_id], |row| {
                Ok(ForecastView {
                    id: row.get(0)?,
                    product_id: row.get(1)?,
                    product_name: row.get(2)?,
                    date: row.get(3)?,
                    yhat: row.get(4)?,
                    yhat_lower: row.get(5)?,
                    yhat_upper: row.get(6)?,
                    model_version: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Forecast demand grouped by a product attribute, highest average first.
    /// Products without a value for the attribute are left out.
    pub fn demand_by(&self, grouping: DemandGrouping, dates: ForecastDates) -> Result<Vec<DemandAggregate>> {
        let column = grouping.column();
        let (op, date) = match dates {
            ForecastDates::On(date) => ("=", date),
            ForecastDates::Since(date) => (">=", date),
        };

        let sql = format!(
            r#"
            SELECT p.{column}, AVG(f.yhat), SUM(f.yhat), COUNT(f.id)
            FROM forecasts f
            JOIN products p ON p.id = f.product_id
            WHERE p.{column} IS NOT NULL AND f.date {op} ?1
            GROUP BY p.{column}
            ORDER BY AVG(f.yhat) DESC, p.{column}
            "#
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![date], |row| {
                Ok(DemandAggregate {
                    group: row.get(0)?,
                    avg_demand: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    total_demand: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    forecast_count: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<i64> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
        };

        Ok(StoreStats {
            products: count("products")?,
            price_observations: count("price_snapshots")?,
            trends: count("traffic_metrics")?,
            forecasts: count("forecasts")?,
        })
    }

    /// Product counts per category; products without one are grouped under `Без категории`
    pub fn category_distribution(&self) -> Result<Vec<(String, i64)>> {
        self.distribution(
            "SELECT COALESCE(category, 'Без категории'), COUNT(id) FROM products GROUP BY category ORDER BY COUNT(id) DESC",
        )
    }

    pub fn tread_pattern_distribution(&self) -> Result<Vec<(String, i64)>> {
        self.distribution(
            "SELECT tread_pattern, COUNT(id) FROM products WHERE tread_pattern IS NOT NULL GROUP BY tread_pattern ORDER BY COUNT(id) DESC",
        )
    }

    fn distribution(&self, sql: &str) -> Result<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_product(row: &Row) -> rusqlite::Result<Product> {
    let specifications: Option<String> = row.get(6)?;
    Ok(Product {
        id: row.get(0)?,
        sku: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        url: row.get(4)?,
        tread_pattern: row.get(5)?,
        specifications: specifications.and_then(|json| serde_json::from_str::<Specifications>(&json).ok()),
    })
}

fn row_to_forecast(row: &Row) -> rusqlite::Result<Forecast> {
    Ok(Forecast {
        id: row.get(0)?,
        product_id: row.get(1)?,
        date: row.get(2)?,
        yhat: row.get(3)?,
        yhat_lower: row.get(4)?,
        yhat_upper: row.get(5)?,
        model_version: row.get(6)?,
    })
}
