use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

mod config;
mod features;
mod fetcher;
mod modeling;
mod models;
mod pipeline;
mod processor;
mod server;
mod storage;

use config::AppConfig;
use fetcher::{PageFetcher, TrendsFetcher, TrendsSource};
use modeling::forecaster::{horizon_dates, today};
use modeling::{DemandModel, Trainer, generate_forecasts, preview_tread_pattern_demand, tread_pattern_recommendations};
use pipeline::{ScrapeOptions, default_training_window};
use storage::{PurgeTarget, Store};

#[derive(Parser)]
#[command(name = "demand-forecast", version, about = "Tire catalog scraping and demand forecasting")]
struct Cli {
    /// Configuration file (defaults to demand-forecast.toml when present)
    #[arg(short, long, global = true, env = "DEMAND_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone, Default)]
struct ScrapeArgs {
    /// Catalog URL or path, overriding the configured one
    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    max_pages: Option<usize>,

    /// Skip product detail pages
    #[arg(long)]
    no_details: bool,
}

impl ScrapeArgs {
    fn options(&self) -> ScrapeOptions {
        ScrapeOptions {
            catalog_url: self.url.clone(),
            max_pages: self.max_pages,
            fetch_details: self.no_details.then_some(false),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the catalog and store products with today's prices
    Scrape(ScrapeArgs),
    /// Collect search-interest trends
    Trends {
        /// Keywords to query instead of the configured list
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
    },
    /// Scrape the catalog, then collect trends
    Collect {
        #[command(flatten)]
        scrape: ScrapeArgs,

        #[arg(long)]
        skip_trends: bool,
    },
    /// Train the demand model and save it
    Train {
        /// Also write the training frame as Parquet
        #[arg(long)]
        export: Option<String>,

        #[arg(long)]
        lookback_days: Option<i64>,

        #[arg(long)]
        gap_days: Option<i64>,
    },
    /// Forecast demand for the coming days with the saved model
    Forecast {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Tread-pattern recommendations for a date
    Recommend {
        /// Defaults to today plus the configured offset
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Predict with the saved model instead of reading stored forecasts
        #[arg(long)]
        live: bool,
    },
    /// Collect, train, forecast and recommend in one run
    Analyze {
        #[command(flatten)]
        scrape: ScrapeArgs,

        #[arg(long)]
        skip_trends: bool,
    },
    /// Serve the dashboard and JSON API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Print row counts
    Stats,
    /// Delete stored rows
    Purge {
        #[arg(value_enum)]
        target: PurgeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PurgeArg {
    Forecasts,
    Trends,
    Products,
}

impl From<PurgeArg> for PurgeTarget {
    fn from(arg: PurgeArg) -> Self {
        match arg {
            PurgeArg::Forecasts => PurgeTarget::Forecasts,
            PurgeArg::Trends => PurgeTarget::Trends,
            PurgeArg::Products => PurgeTarget::Products,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let store = Store::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    info!("Using database {}", config.database.path.display());

    match cli.command {
        Command::Scrape(args) => {
            let pages = PageFetcher::new(&config.html)?;
            let (products, prices) = pipeline::scrape_catalog(&store, &config, &pages, &args.options()).await?;
            info!("✅ Scraped {} products, {} prices", products.len(), prices);
        }
        Command::Trends { keywords } => {
            let source = TrendsFetcher::new(config.trends.clone())?;
            let keywords = (!keywords.is_empty()).then_some(keywords.as_slice());
            let inserted = pipeline::collect_trend_metrics(&store, &config, &source, keywords).await?;
            info!("✅ Trends collected: {} new observations", inserted);
        }
        Command::Collect { scrape, skip_trends } => {
            let pages = PageFetcher::new(&config.html)?;
            let trends = TrendsFetcher::new(config.trends.clone())?;
            let trends: Option<&dyn TrendsSource> = if skip_trends { None } else { Some(&trends) };
            pipeline::run_data_collection(&store, &config, &pages, trends, &scrape.options()).await?;
        }
        Command::Train {
            export,
            lookback_days,
            gap_days,
        } => {
            let mut window = default_training_window(&config, today());
            if lookback_days.is_some() || gap_days.is_some() {
                window = modeling::TrainingWindow::ending_before(
                    today(),
                    lookback_days.unwrap_or(config.model.train_lookback_days),
                    gap_days.unwrap_or(config.model.train_gap_days),
                );
            }

            let mut trainer = Trainer::new(&store, &config.model.version);
            if let Some(path) = export {
                trainer = trainer.with_export(path);
            }

            match trainer.train(None, window)? {
                Some(model) => {
                    model.save(&config.model.path)?;
                    let report = &model.report;
                    info!(
                        "✅ Model {} trained: test MAE {:.3}, RMSE {:.3}, R² {:.3}",
                        model.version, report.test_mae, report.test_rmse, report.test_r2
                    );
                    for item in report.top_features(10) {
                        info!("  {}: {:.4}", item.feature, item.importance);
                    }
                }
                None => warn!("⚠️ No model trained: no labelled rows in {} .. {}", window.start, window.end),
            }
        }
        Command::Forecast { days } => {
            let Some(model) = load_model(&config) else {
                return Ok(());
            };
            let dates = horizon_dates(today(), days.unwrap_or(config.model.horizon_days));
            let forecasts = generate_forecasts(&store, &model, None, Some(dates.as_slice()), &config.model.version)?;
            info!("✅ {} forecasts written", forecasts.len());
        }
        Command::Recommend { date, live } => {
            let date = date.unwrap_or_else(|| today() + Duration::days(config.model.recommendation_offset_days));
            let recommendations = if live {
                let Some(model) = load_model(&config) else {
                    return Ok(());
                };
                let products = store.list_products()?;
                preview_tread_pattern_demand(&store, &model, &products, date)
            } else {
                tread_pattern_recommendations(&store, Some(date))?
            };

            for rec in &recommendations {
                println!(
                    "{}\t{:.2}\t{:.2}\t{}",
                    rec.group, rec.avg_demand, rec.total_demand, rec.forecast_count
                );
            }
        }
        Command::Analyze { scrape, skip_trends } => {
            let pages = PageFetcher::new(&config.html)?;
            let trends = TrendsFetcher::new(config.trends.clone())?;
            let trends: Option<&dyn TrendsSource> = if skip_trends { None } else { Some(&trends) };
            let summary = pipeline::run_full_analysis(&store, &config, &pages, trends, &scrape.options()).await?;
            for rec in &summary.recommendations {
                println!("{}\t{:.2}", rec.group, rec.avg_demand);
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("products:           {}", stats.products);
            println!("price observations: {}", stats.price_observations);
            println!("trend metrics:      {}", stats.trends);
            println!("forecasts:          {}", stats.forecasts);
        }
        Command::Purge { target } => {
            let removed = store.purge(target.into())?;
            info!("🗑️ Removed {} rows", removed);
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            server::serve(store, &config, &host, port).await?;
        }
    }

    Ok(())
}

/// Load the saved model, logging a warning when it is missing or unreadable
fn load_model(config: &AppConfig) -> Option<DemandModel> {
    match DemandModel::load(&config.model.path) {
        Ok(model) => Some(model),
        Err(e) => {
            warn!("⚠️ Model unavailable, run `demand-forecast train` first: {:#}", e);
            None
        }
    }
}
