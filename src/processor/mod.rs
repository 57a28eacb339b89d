pub mod detail_extractor;
pub mod product_extractor;

pub use detail_extractor::DetailExtractor;
pub use product_extractor::ProductExtractor;
