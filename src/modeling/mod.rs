pub mod artifact;
pub mod forecaster;
pub mod trainer;

pub use artifact::{DemandModel, TrainingReport};
pub use forecaster::{generate_forecasts, preview_tread_pattern_demand, tread_pattern_recommendations};
pub use trainer::{Trainer, TrainingWindow};
