pub mod store;

pub use store::{DemandGrouping, ForecastDates, PurgeTarget, Store};
