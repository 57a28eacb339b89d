pub mod feature_builder;

pub use feature_builder::{FeatureBuilder, FeatureRecord, column_union};
