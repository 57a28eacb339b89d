pub mod catalog_walker;
pub mod page_fetcher;
pub mod trends_fetcher;

pub use catalog_walker::CatalogWalker;
pub use page_fetcher::{PageFetcher, PageSource};
pub use trends_fetcher::{TrendsFetcher, TrendsSource, collect_trends};
