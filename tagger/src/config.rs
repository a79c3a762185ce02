use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, path::PathBuf};

pub(crate) const CONFIG_PATH_ENV: &str = "TAGGER_CONFIG_PATH";
pub(crate) const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Settings {
    pub folders: FoldersConfig,
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FoldersConfig {
    /// Directory scanned (non-recursively) for media to tag.
    pub input: PathBuf,
    /// Directory receiving tagged images and the video report.
    pub output: PathBuf,
    /// Durable result cache; one serialized mapping, rewritten per item.
    pub cache_file: PathBuf,
    /// File name of the video report inside the output directory.
    pub report_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TaggingConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_keyword_count")]
    pub keyword_count: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MediaConfig {
    #[serde(default = "default_max_dimension")]
    pub max_width: u32,
    #[serde(default = "default_max_dimension")]
    pub max_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_max_tokens() -> u32 {
    300
}

fn default_keyword_count() -> usize {
    30
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_dimension() -> u32 {
    510
}

fn default_jpeg_quality() -> u8 {
    95
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_dimension(),
            max_height: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Settings {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let builder = config::Config::builder()
            .set_default("folders.input", "input")?
            .set_default("folders.output", "output")?
            .set_default("folders.cache_file", "results.json")?
            .set_default("folders.report_name", "results.csv")?
            .set_default("tagging.base_url", "https://api.openai.com/v1")?
            .set_default("tagging.model", "gpt-4o-mini")?
            .set_default("tagging.max_tokens", default_max_tokens() as i64)?
            .set_default("tagging.keyword_count", default_keyword_count() as i64)?
            .set_default("tagging.timeout_secs", default_timeout_secs() as i64)?
            .set_default("media.max_width", default_max_dimension() as i64)?
            .set_default("media.max_height", default_max_dimension() as i64)?
            .set_default("media.jpeg_quality", default_jpeg_quality() as i64)?
            .add_source(config::File::from(config_path).required(false))
            .add_source(config::Environment::with_prefix("TAGGER").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.tagging.base_url.trim().is_empty() {
            anyhow::bail!("tagging.base_url must not be empty");
        }
        if self.tagging.model.trim().is_empty() {
            anyhow::bail!("tagging.model must not be empty");
        }
        if self.tagging.keyword_count == 0 {
            anyhow::bail!("tagging.keyword_count must be at least 1");
        }
        if self.media.max_width == 0 || self.media.max_height == 0 {
            anyhow::bail!("media.max_width and media.max_height must be positive");
        }
        if self.media.jpeg_quality == 0 || self.media.jpeg_quality > 100 {
            anyhow::bail!("media.jpeg_quality must be between 1 and 100");
        }
        if self.folders.report_name.trim().is_empty() {
            anyhow::bail!("folders.report_name must not be empty");
        }
        Ok(())
    }
}

/// The tagging credential must be present before any item is processed;
/// absence is fatal at startup, never per item. The key is threaded into the
/// client explicitly rather than read from ambient state later.
pub(crate) fn load_api_key() -> Result<String> {
    let key = env::var(API_KEY_ENV)
        .with_context(|| format!("{API_KEY_ENV} must be set before running the pipeline"))?;
    if key.trim().is_empty() {
        anyhow::bail!("{API_KEY_ENV} is set but empty");
    }
    Ok(key)
}

fn default_config_path() -> Result<PathBuf> {
    let cwd = env::current_dir().context("failed to resolve current directory")?;
    Ok(cwd.join("config").join("tagger").join("default.toml"))
}
