use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_ALBUM: &str = "Thousand Words";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub gallery: GalleryConfig,
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Load the configuration from the environment (and `.env`, if the caller loaded it).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    /// Build the configuration from any key lookup. Only the API key is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("Could not find OPENAI_API_KEY in the environment."))?;
        let secs = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(v) => v.parse().with_context(|| format!("Parsing {key}")),
                None => Ok(default),
            }
        };
        Ok(Self {
            openai: OpenAiConfig {
                api_key,
                api_base: lookup("OPENAI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
                describe_model: lookup("TW_DESCRIBE_MODEL").unwrap_or_else(|| "gpt-5-nano".into()),
                image_model: lookup("TW_IMAGE_MODEL").unwrap_or_else(|| "gpt-image-1.5".into()),
            },
            gallery: GalleryConfig {
                album: lookup("TW_ALBUM").unwrap_or_else(|| DEFAULT_ALBUM.into()),
                pictures_dir: lookup("TW_PICTURES_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_pictures_dir),
                scratch_dir: lookup("TW_SCRATCH_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| std::env::temp_dir().join("thousand-words")),
                auto_save: lookup("TW_AUTO_SAVE")
                    .map(|v| !matches!(v.as_str(), "0" | "false" | "no"))
                    .unwrap_or(true),
            },
            timeouts: TimeoutConfig {
                describe_secs: secs("TW_DESCRIBE_TIMEOUT_SECS", 120)?,
                stream_idle_secs: secs("TW_STREAM_IDLE_TIMEOUT_SECS", 90)?,
            },
        })
    }
}

fn default_pictures_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("Pictures"))
        .unwrap_or_else(|| PathBuf::from("Pictures"))
}

#[derive(Clone, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub api_base: String,
    pub describe_model: String,
    pub image_model: String,
}

// Keep the key out of logs
impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_base", &self.api_base)
            .field("describe_model", &self.describe_model)
            .field("image_model", &self.image_model)
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GalleryConfig {
    pub album: String,
    pub pictures_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub auto_save: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TimeoutConfig {
    pub describe_secs: u64,
    pub stream_idle_secs: u64,
}

impl TimeoutConfig {
    pub fn describe(&self) -> Duration {
        Duration::from_secs(self.describe_secs)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_secs(self.stream_idle_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn requires_api_key() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn fills_defaults() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.openai.api_base, DEFAULT_API_BASE);
        assert_eq!(config.gallery.album, DEFAULT_ALBUM);
        assert!(config.gallery.auto_save);
        assert_eq!(config.timeouts.describe(), Duration::from_secs(120));
        assert!(!format!("{:?}", config).contains("sk-test"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("TW_AUTO_SAVE", "false"),
            ("TW_STREAM_IDLE_TIMEOUT_SECS", "5"),
            ("TW_ALBUM", "Elsewhere"),
        ]))
        .unwrap();
        assert!(!config.gallery.auto_save);
        assert_eq!(config.timeouts.stream_idle(), Duration::from_secs(5));
        assert_eq!(config.gallery.album, "Elsewhere");
        assert!(Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("TW_DESCRIBE_TIMEOUT_SECS", "soon"),
        ]))
        .is_err());
    }
}
