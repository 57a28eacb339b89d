use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use url::Url;
use wreq::Client;
use wreq_util::Emulation;

use crate::config::TrendsConfig;
use crate::config::trends_config::{MAX_KEYWORDS_PER_GROUP, group_keywords};
use crate::models::{NewTrafficMetric, trend_metric_name};

/// Interest-over-time response: keyword -> timestamp -> interest value.
///
/// Values stay untyped because the same map carries non-numeric series such
/// as the boolean `isPartial` flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterestOverTime {
    #[serde(default)]
    pub interest_over_time: BTreeMap<String, BTreeMap<String, Value>>,
}

/// External source of search-interest series
#[async_trait]
pub trait TrendsSource: Send + Sync {
    async fn interest_over_time(&self, keywords: &[String]) -> Result<InterestOverTime>;
}

/// HTTP client for a Google-Trends style interest endpoint
pub struct TrendsFetcher {
    client: Client,
    config: TrendsConfig,
}

impl TrendsFetcher {
    pub fn new(config: TrendsConfig) -> Result<Self> {
        let client = Client::builder()
            .emulation(Emulation::Firefox136)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl TrendsSource for TrendsFetcher {
    async fn interest_over_time(&self, keywords: &[String]) -> Result<InterestOverTime> {
        let joined = keywords.join(",");
        let url = Url::parse_with_params(
            &self.config.endpoint,
            &[
                ("keywords", joined.as_str()),
                ("timeframe", self.config.timeframe.as_str()),
                ("geo", self.config.geo.as_str()),
            ],
        )
        .with_context(|| format!("Invalid trends endpoint {}", self.config.endpoint))?;

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| anyhow!("Network error querying trends: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("Trends endpoint returned {}", response.status()));
        }

        response
            .json::<InterestOverTime>()
            .await
            .context("Failed to parse trends response")
    }
}

/// Query every keyword group and flatten the series into traffic metrics.
///
/// A group that fails is logged and skipped; the others still contribute.
pub async fn collect_trends(
    source: &dyn TrendsSource,
    config: &TrendsConfig,
    keywords: Option<&[String]>,
) -> Vec<NewTrafficMetric> {
    let groups = match keywords {
        Some(keywords) => group_keywords(keywords),
        None => config.keyword_groups(),
    };
    let delay = Duration::from_millis(config.delay_between_groups_ms);
    let mut records = Vec::new();

    for (i, group) in groups.iter().enumerate() {
        info!("📈 Trends request {}/{}: {:?}", i + 1, groups.len(), group);

        match source.interest_over_time(group).await {
            Ok(data) => records.extend(format_metrics(&data, group, &config.geo)),
            Err(e) => error!("Failed to fetch trends for {:?}: {}", group, e),
        }

        if i + 1 < groups.len() {
            sleep(delay).await;
        }
    }

    info!("Collected {} trend observations", records.len());
    records
}

/// Turn one response into metrics for the requested keywords only
pub fn format_metrics(data: &InterestOverTime, keywords: &[String], geo: &str) -> Vec<NewTrafficMetric> {
    let keywords = if keywords.len() > MAX_KEYWORDS_PER_GROUP {
        warn!("At most {} keywords per query, using the first ones", MAX_KEYWORDS_PER_GROUP);
        &keywords[..MAX_KEYWORDS_PER_GROUP]
    } else {
        keywords
    };

    let mut records = Vec::new();
    for keyword in keywords {
        let Some(series) = data.interest_over_time.get(keyword) else {
            continue;
        };

        for (timestamp, value) in series {
            let Some(date) = parse_observation_date(timestamp) else {
                warn!("Skipping trend point with unparseable date '{}'", timestamp);
                continue;
            };
            // Missing points count as no interest
            let value = match value {
                Value::Null => 0.0,
                Value::Number(n) => match n.as_f64() {
                    Some(v) => v,
                    None => continue,
                },
                other => {
                    warn!("Skipping non-numeric trend point for '{}': {}", keyword, other);
                    continue;
                }
            };

            records.push(NewTrafficMetric {
                date,
                region: Some(geo.to_string()),
                metric_name: trend_metric_name(keyword),
                value,
            });
        }
    }

    records
}

/// Accepts `YYYY-MM-DD` optionally followed by a time part
fn parse_observation_date(timestamp: &str) -> Option<NaiveDate> {
    let day = timestamp.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedTrends {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl TrendsSource for CannedTrends {
        async fn interest_over_time(&self, keywords: &[String]) -> Result<InterestOverTime> {
            self.calls.lock().unwrap().push(keywords.to_vec());
            if keywords.iter().any(|k| k == "fail") {
                return Err(anyhow!("rate limited"));
            }

            let mut data = InterestOverTime::default();
            for keyword in keywords {
                let mut series = BTreeMap::new();
                series.insert("2025-01-05T00:00:00".to_string(), Value::from(40.0));
                series.insert("2025-01-12".to_string(), Value::Null);
                data.interest_over_time.insert(keyword.clone(), series);
            }
            let partial = BTreeMap::from([("2025-01-12".to_string(), Value::Bool(true))]);
            data.interest_over_time.insert("isPartial".to_string(), partial);
            Ok(data)
        }
    }

    #[tokio::test]
    async fn test_collect_trends_groups_and_skips_failures() {
        let mut config = TrendsConfig::default();
        config.delay_between_groups_ms = 0;
        let keywords: Vec<String> = (0..6)
            .map(|i| if i == 5 { "fail".to_string() } else { format!("kw{}", i) })
            .collect();

        let source = CannedTrends {
            calls: Mutex::new(Vec::new()),
        };
        let records = collect_trends(&source, &config, Some(keywords.as_slice())).await;

        let calls = source.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 5);
        // Five keywords with two points each; the failing group adds nothing
        assert_eq!(records.len(), 10);
        assert!(records.iter().all(|r| r.region.as_deref() == Some("RU")));
        assert!(records.iter().any(|r| r.metric_name == "trend_keyword:kw0" && r.value == 40.0));
        assert!(records.iter().any(|r| r.value == 0.0));
    }

    #[test]
    fn test_format_metrics_parses_dates() {
        let json = r#"{"interest_over_time": {"зимние шины": {"2025-02-01 00:00:00": 55, "garbage": 3}}}"#;
        let data: InterestOverTime = serde_json::from_str(json).unwrap();

        let records = format_metrics(&data, &["зимние шины".to_string()], "RU-MOW");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert_eq!(records[0].metric_name, "trend_keyword:зимние шины");
        assert_eq!(records[0].region.as_deref(), Some("RU-MOW"));
        assert_eq!(records[0].value, 55.0);
    }

    #[test]
    fn test_boolean_is_partial_series_does_not_break_response() {
        let json = r#"{"interest_over_time": {
            "шины": {"2025-01-01": 50, "2025-01-08": null},
            "isPartial": {"2025-01-01": false, "2025-01-08": true}
        }}"#;
        let data: InterestOverTime = serde_json::from_str(json).unwrap();

        let records = format_metrics(&data, &["шины".to_string()], "RU");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 50.0);
        assert_eq!(records[1].value, 0.0);

        // A keyword whose series is not numeric yields nothing
        let flags = format_metrics(&data, &["isPartial".to_string()], "RU");
        assert!(flags.is_empty());
    }

    #[test]
    fn test_empty_response_yields_nothing() {
        let data: InterestOverTime = serde_json::from_str("{}").unwrap();
        assert!(format_metrics(&data, &["a".to_string()], "RU").is_empty());
    }
}
