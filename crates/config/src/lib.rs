// Configuration loading

pub mod error;
pub mod settings;

pub use error::ConfigError;
pub use settings::{split_list, Settings, CONFIG_ENV};
