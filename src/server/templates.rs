//! HTML templates for the dashboard.

use chrono::NaiveDate;

use crate::modeling::DemandModel;
use crate::models::{DemandAggregate, StoreStats};

/// Base HTML page with the inline stylesheet.
pub fn base_template(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="ru">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - demand-forecast</title>
    <style>{css}</style>
</head>
<body>
    <header id="main-header">
        <nav>
            <a href="/" class="logo">demand-forecast</a>
            <a href="/api/products">products</a>
            <a href="/api/forecasts">forecasts</a>
            <a href="/api/stats">stats</a>
        </nav>
    </header>
    <main>
        <h1>{title}</h1>
        {content}
    </main>
</body>
</html>"#,
        title = html_escape(title),
        css = CSS,
        content = content
    )
}

/// Everything the dashboard shows, gathered by the handler
pub struct DashboardData<'a> {
    pub stats: &'a StoreStats,
    pub categories: &'a [(String, i64)],
    pub tread_patterns: &'a [(String, i64)],
    pub model: Result<&'a DemandModel, String>,
    pub recommendation_date: NaiveDate,
    pub recommendations: &'a [DemandAggregate],
    pub trend_keywords: &'a [String],
}

pub fn dashboard(data: &DashboardData<'_>) -> String {
    let stats = data.stats;
    let cards = format!(
        r#"
    <section class="cards">
        <div class="card"><span class="value">{}</span><span class="label">Товаров</span></div>
        <div class="card"><span class="value">{}</span><span class="label">Наблюдений цен</span></div>
        <div class="card"><span class="value">{}</span><span class="label">Трендов</span></div>
        <div class="card"><span class="value">{}</span><span class="label">Прогнозов</span></div>
    </section>
    "#,
        stats.products, stats.price_observations, stats.trends, stats.forecasts
    );

    format!(
        "{}{}{}{}{}{}",
        cards,
        model_section(&data.model),
        recommendations_section(data.recommendation_date, data.recommendations),
        distribution_section("Категории", "Категория", data.categories),
        distribution_section("Типы протектора", "Протектор", data.tread_patterns),
        trends_section(data.trend_keywords),
    )
}

fn model_section(model: &Result<&DemandModel, String>) -> String {
    let model = match model {
        Ok(model) => model,
        Err(reason) => {
            return format!(
                r#"<div class="warning">Модель недоступна: {}</div>"#,
                html_escape(reason)
            );
        }
    };

    let report = &model.report;
    let mut rows = String::new();
    for item in report.top_features(10) {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{:.4}</td></tr>",
            html_escape(&item.feature),
            item.importance
        ));
    }

    format!(
        r#"
    <section>
        <h2>Модель {version}</h2>
        <p class="muted">Обучена {trained_at}, строк: {train} / {test}</p>
        <table>
            <thead><tr><th></th><th>MAE</th><th>RMSE</th><th>R²</th></tr></thead>
            <tbody>
                <tr><td>train</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td></tr>
                <tr><td>test</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td></tr>
            </tbody>
        </table>
        <h3>Важность признаков</h3>
        <table>
            <thead><tr><th>Признак</th><th>Важность</th></tr></thead>
            <tbody>{rows}</tbody>
        </table>
    </section>
    "#,
        report.train_mae,
        report.train_rmse,
        report.train_r2,
        report.test_mae,
        report.test_rmse,
        report.test_r2,
        version = html_escape(&model.version),
        trained_at = model.trained_at.format("%Y-%m-%d %H:%M"),
        train = report.train_rows,
        test = report.test_rows,
        rows = rows
    )
}

fn recommendations_section(date: NaiveDate, recommendations: &[DemandAggregate]) -> String {
    if recommendations.is_empty() {
        return format!(
            "<section><h2>Рекомендации на {}</h2><p>Нет прогнозов на эту дату. Запустите 'demand-forecast forecast'.</p></section>",
            date
        );
    }

    let mut rows = String::new();
    for rec in recommendations {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td></tr>",
            html_escape(&rec.group),
            rec.avg_demand,
            rec.total_demand,
            rec.forecast_count
        ));
    }

    format!(
        r#"
    <section>
        <h2>Рекомендации на {}</h2>
        <table>
            <thead><tr><th>Протектор</th><th>Средний спрос</th><th>Суммарный спрос</th><th>Товаров</th></tr></thead>
            <tbody>{}</tbody>
        </table>
    </section>
    "#,
        date, rows
    )
}

fn distribution_section(title: &str, column: &str, counts: &[(String, i64)]) -> String {
    if counts.is_empty() {
        return format!("<section><h2>{}</h2><p>Нет данных.</p></section>", title);
    }

    let mut rows = String::new();
    for (name, count) in counts {
        rows.push_str(&format!("<tr><td>{}</td><td>{}</td></tr>", html_escape(name), count));
    }

    format!(
        r#"
    <section>
        <h2>{}</h2>
        <table>
            <thead><tr><th>{}</th><th>Товаров</th></tr></thead>
            <tbody>{}</tbody>
        </table>
    </section>
    "#,
        title, column, rows
    )
}

fn trends_section(keywords: &[String]) -> String {
    if keywords.is_empty() {
        return "<section><h2>Тренды</h2><p>Нет данных. Запустите 'demand-forecast trends'.</p></section>".to_string();
    }

    let items: String = keywords
        .iter()
        .map(|keyword| {
            format!(
                r#"<li><a href="/api/analytics/trends/{}">{}</a></li>"#,
                path_segment(keyword),
                html_escape(keyword)
            )
        })
        .collect();

    format!("<section><h2>Тренды</h2><ul>{}</ul></section>", items)
}

/// Percent-encode one path segment; spaces become `%20`, not `+`
fn path_segment(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub const CSS: &str = r#"
:root {
    --bg: #fff;
    --text: #222;
    --muted: #666;
    --link: #0066cc;
    --border: #ccc;
    --warn-bg: #fff4e5;
    --warn-border: #f0a030;
}
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif; background: var(--bg); color: var(--text); margin: 0; }
#main-header { border-bottom: 1px solid var(--border); padding: 0.5rem 1rem; }
#main-header nav a { margin-right: 1rem; color: var(--link); text-decoration: none; }
#main-header .logo { font-weight: bold; }
main { max-width: 960px; margin: 0 auto; padding: 1rem; }
.cards { display: flex; gap: 1rem; flex-wrap: wrap; }
.card { border: 1px solid var(--border); padding: 0.75rem 1rem; min-width: 140px; }
.card .value { display: block; font-size: 1.6rem; font-weight: bold; }
.card .label { color: var(--muted); }
.muted { color: var(--muted); }
.warning { background: var(--warn-bg); border: 1px solid var(--warn-border); padding: 0.75rem 1rem; margin: 1rem 0; }
table { border-collapse: collapse; width: 100%; margin-bottom: 1rem; }
th, td { text-align: left; padding: 0.3rem 0.6rem; border-bottom: 1px solid var(--border); }
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_shows_warning_without_model() {
        let stats = StoreStats {
            products: 3,
            ..Default::default()
        };
        let categories = vec![("Грузовые шины".to_string(), 3)];
        let html = dashboard(&DashboardData {
            stats: &stats,
            categories: &categories,
            tread_patterns: &[],
            model: Err("no such file <model.json>".to_string()),
            recommendation_date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            recommendations: &[],
            trend_keywords: &[],
        });

        assert!(html.contains(r#"class="warning""#));
        assert!(html.contains("&lt;model.json&gt;"));
        assert!(html.contains("Грузовые шины"));
        assert!(html.contains("Нет прогнозов"));
    }

    #[test]
    fn test_trend_links_are_encoded() {
        let html = trends_section(&["зимние шины".to_string()]);
        assert!(html.contains(">зимние шины</a>"));
        assert!(html.contains("/api/analytics/trends/%D0%B7"));
        assert!(html.contains("%D0%B5%20%D1%88"));
        assert!(!html.contains("trends/зимние"));
    }

    #[test]
    fn test_base_template_escapes_title() {
        let page = base_template("a < b", "<p>x</p>");
        assert!(page.contains("<h1>a &lt; b</h1>"));
        assert!(page.contains("<p>x</p>"));
    }
}
