pub mod app_config;
pub mod html_config;
pub mod trends_config;

pub use app_config::*;
pub use html_config::HtmlConfig;
pub use trends_config::TrendsConfig;
