use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::AppState;
use super::templates::{self, DashboardData};
use crate::modeling::DemandModel;
use crate::modeling::forecaster::today;
use crate::models::{DemandAggregate, ForecastView, StoreStats, TREND_METRIC_PREFIX, trend_metric_name};
use crate::storage::{DemandGrouping, ForecastDates};

const DEFAULT_FORECAST_DAYS: i64 = 30;
const DEFAULT_TREND_DAYS: i64 = 90;
const MAX_WINDOW_DAYS: i64 = 3650;

/// Bad query parameters surface as a 400, store failures as a 500,
/// both with a JSON error body
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(message.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.error);
        } else {
            tracing::warn!("Rejected request: {:#}", self.error);
        }
        (self.status, Json(json!({ "error": format!("{:#}", self.error) }))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ProductSummary {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub tread_pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub product_id: Option<i64>,
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<i64>,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Json<Vec<ProductSummary>>> {
    let products = state
        .store
        .list_products()?
        .into_iter()
        .map(|p| ProductSummary {
            id: p.id,
            sku: p.sku,
            name: p.name,
            category: p.category,
            tread_pattern: p.tread_pattern,
        })
        .collect();
    Ok(Json(products))
}

/// Forecasts for the next `days` days (default 30), optionally for one product
pub async fn list_forecasts(
    State(state): State<AppState>,
    Query(query): Query<ForecastQuery>,
) -> ApiResult<Json<Vec<ForecastView>>> {
    let start = today();
    let end = start + window_days(query.days, DEFAULT_FORECAST_DAYS)?;
    let forecasts = state.store.list_forecasts(query.product_id, start, end)?;
    Ok(Json(forecasts))
}

pub async fn tread_pattern_recommendations(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Response> {
    let offset = state.config.model.recommendation_offset_days;
    let date = query.date.unwrap_or_else(|| today() + Duration::days(offset));

    let recommendations = state
        .store
        .demand_by(DemandGrouping::TreadPattern, ForecastDates::On(date))?;

    if recommendations.is_empty() {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No recommendations available" })),
        )
            .into_response());
    }

    Ok(Json(json!({
        "date": date,
        "recommendations": aggregate_rows(&recommendations, "tread_pattern"),
    }))
    .into_response())
}

pub async fn demand_by_pattern(State(state): State<AppState>) -> ApiResult<Json<Vec<Value>>> {
    let aggregates = state
        .store
        .demand_by(DemandGrouping::TreadPattern, ForecastDates::Since(today()))?;
    Ok(Json(aggregate_rows(&aggregates, "tread_pattern")))
}

pub async fn demand_by_category(State(state): State<AppState>) -> ApiResult<Json<Vec<Value>>> {
    let aggregates = state
        .store
        .demand_by(DemandGrouping::Category, ForecastDates::Since(today()))?;
    Ok(Json(aggregate_rows(&aggregates, "category")))
}

/// Search-interest series for one keyword over the last `days` days (default 90)
pub async fn trend_series(
    State(state): State<AppState>,
    Path(keyword): Path<String>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<Json<Vec<TrendPoint>>> {
    let end = today();
    let start = end - window_days(query.days, DEFAULT_TREND_DAYS)?;

    let points = state
        .store
        .trend_series(&trend_metric_name(&keyword), start, end)?
        .into_iter()
        .map(|m| TrendPoint {
            date: m.date,
            value: m.value,
        })
        .collect();
    Ok(Json(points))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<StoreStats>> {
    Ok(Json(state.store.stats()?))
}

pub async fn dashboard(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let stats = state.store.stats()?;
    let categories = state.store.category_distribution()?;
    let tread_patterns = state.store.tread_pattern_distribution()?;
    let trend_keywords: Vec<String> = state
        .store
        .metric_names(TREND_METRIC_PREFIX)?
        .into_iter()
        .map(|name| name.trim_start_matches(TREND_METRIC_PREFIX).to_string())
        .collect();

    let recommendation_date = today() + Duration::days(state.config.model.recommendation_offset_days);
    let recommendations = state
        .store
        .demand_by(DemandGrouping::TreadPattern, ForecastDates::On(recommendation_date))?;

    let loaded = DemandModel::load(&state.config.model.path).map_err(|e| format!("{:#}", e));
    if let Err(reason) = &loaded {
        tracing::warn!("Dashboard without model: {}", reason);
    }

    let content = templates::dashboard(&DashboardData {
        stats: &stats,
        categories: &categories,
        tread_patterns: &tread_patterns,
        model: loaded.as_ref().map_err(|e| e.clone()),
        recommendation_date,
        recommendations: &recommendations,
        trend_keywords: &trend_keywords,
    });

    Ok(Html(templates::base_template("Прогноз спроса на шины", &content)))
}

/// `days` query parameter as a window length, limited to ten years
fn window_days(days: Option<i64>, default: i64) -> ApiResult<Duration> {
    match days.unwrap_or(default) {
        days @ 0..=MAX_WINDOW_DAYS => Ok(Duration::days(days)),
        days => Err(ApiError::bad_request(format!(
            "days must be between 0 and {}, got {}",
            MAX_WINDOW_DAYS, days
        ))),
    }
}

fn aggregate_rows(aggregates: &[DemandAggregate], key: &str) -> Vec<Value> {
    aggregates
        .iter()
        .map(|a| {
            json!({
                key: a.group,
                "avg_demand": a.avg_demand,
                "total_demand": a.total_demand,
                "forecast_count": a.forecast_count,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::{AppState, create_router};
    use crate::config::AppConfig;
    use crate::models::{NewForecast, NewTrafficMetric, ScrapedProduct, trend_metric_name};
    use crate::modeling::forecaster::today;
    use crate::storage::Store;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::Duration;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state(dir: &std::path::Path) -> AppState {
        let store = Store::open_in_memory().unwrap();

        let mut winter = ScrapedProduct::new("К-83А 420/70-457", "sku-1");
        winter.category = Some("Грузовые шины".to_string());
        winter.tread_pattern = Some("зимние".to_string());
        let mut summer = ScrapedProduct::new("Л-1 185/65", "sku-2");
        summer.tread_pattern = Some("летние".to_string());
        let products = store.save_products(&[winter, summer]).unwrap();

        let target = today() + Duration::days(30);
        store
            .upsert_forecasts(&[
                NewForecast::with_band(products[0].id, target, 40.0, "rf_v1"),
                NewForecast::with_band(products[1].id, target, 10.0, "rf_v1"),
                NewForecast::with_band(products[0].id, today() + Duration::days(5), 20.0, "rf_v1"),
            ])
            .unwrap();
        store
            .save_traffic_metrics(&[NewTrafficMetric {
                date: today() - Duration::days(3),
                region: Some("RU".to_string()),
                metric_name: trend_metric_name("winter"),
                value: 70.0,
            }])
            .unwrap();

        let mut config = AppConfig::default();
        config.model.path = dir.join("missing.json");
        AppState::with_store(store, config)
    }

    async fn get(state: AppState, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
        let (status, body) = get(state, uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_products_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(state(dir.path()), "/api/products").await;

        assert_eq!(status, StatusCode::OK);
        let products = body.as_array().unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0]["sku"], "sku-1");
        assert_eq!(products[0]["category"], "Грузовые шины");
    }

    #[tokio::test]
    async fn test_forecasts_window_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let (_, all) = get_json(state.clone(), "/api/forecasts").await;
        assert_eq!(all.as_array().unwrap().len(), 3);

        let (_, soon) = get_json(state.clone(), "/api/forecasts?days=7").await;
        let soon = soon.as_array().unwrap();
        assert_eq!(soon.len(), 1);
        assert_eq!(soon[0]["yhat"], 20.0);
        assert_eq!(soon[0]["product_name"], "К-83А 420/70-457");

        let first_id = all[0]["product_id"].as_i64().unwrap();
        let (_, filtered) = get_json(state, &format!("/api/forecasts?product_id={}", first_id)).await;
        assert!(
            filtered
                .as_array()
                .unwrap()
                .iter()
                .all(|f| f["product_id"].as_i64() == Some(first_id))
        );
    }

    #[tokio::test]
    async fn test_recommendations_found_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let (status, body) = get_json(state.clone(), "/api/recommendations/tread-pattern").await;
        assert_eq!(status, StatusCode::OK);
        let recs = body["recommendations"].as_array().unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["tread_pattern"], "зимние");
        assert_eq!(recs[0]["avg_demand"], 40.0);

        let (status, body) = get_json(state, "/api/recommendations/tread-pattern?date=2001-01-01").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_demand_analytics() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let (_, by_pattern) = get_json(state.clone(), "/api/analytics/demand-by-pattern").await;
        let by_pattern = by_pattern.as_array().unwrap();
        assert_eq!(by_pattern[0]["tread_pattern"], "зимние");
        assert_eq!(by_pattern[0]["forecast_count"], 2);
        assert_eq!(by_pattern[0]["total_demand"], 60.0);

        let (_, by_category) = get_json(state, "/api/analytics/demand-by-category").await;
        let by_category = by_category.as_array().unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0]["category"], "Грузовые шины");
    }

    #[tokio::test]
    async fn test_trend_series() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let (_, points) = get_json(state.clone(), "/api/analytics/trends/winter").await;
        let points = points.as_array().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0]["value"], 70.0);

        let (_, none) = get_json(state, "/api/analytics/trends/winter?days=1").await;
        assert!(none.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_days_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        for uri in [
            "/api/forecasts?days=1000000000",
            "/api/forecasts?days=-1",
            "/api/analytics/trends/winter?days=1000000000",
            "/api/analytics/trends/winter?days=9223372036854775807",
        ] {
            let (status, body) = get_json(state.clone(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body["error"].as_str().unwrap().contains("days"));
        }

        let (status, _) = get_json(state, "/api/forecasts?days=3650").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let (_, stats) = get_json(state.clone(), "/api/stats").await;
        assert_eq!(stats["products"], 2);
        assert_eq!(stats["forecasts"], 3);
        assert_eq!(stats["trends"], 1);

        let (status, body) = get(state, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_dashboard_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(state(dir.path()), "/").await;
        let html = String::from_utf8(body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(html.contains(r#"class="warning""#));
        assert!(html.contains("зимние"));
        assert!(html.contains(r#"href="/api/analytics/trends/winter""#));
    }
}
