use std::path::PathBuf;

use crate::config::Config;

pub struct PipelineConfig {
    pub uploads_directory: PathBuf,
    /// Currency stored when the extractor reports none.
    pub default_currency: String,
}

impl PipelineConfig {
    pub fn new(uploads_directory: impl Into<PathBuf>) -> Self {
        Self {
            uploads_directory: uploads_directory.into(),
            default_currency: "USD".to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            uploads_directory: PathBuf::from(&config.uploads_directory),
            default_currency: config.default_currency.to_uppercase(),
        }
    }
}
