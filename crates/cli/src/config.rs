use std::path::PathBuf;
use std::time::Duration;

use lookbook_genai::GenerationApiConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// CLI configuration loaded from environment variables.
///
/// All fields have defaults suitable for local use.
#[derive(Debug, Clone)]
pub struct LookbookConfig {
    /// Root for durable state and image blobs (default: `./lookbook-data`).
    pub data_dir: PathBuf,
    /// Model catalog JSON file (default: `./catalog/catalog.json`). Catalog
    /// image keys resolve relative to its directory.
    pub catalog_path: PathBuf,
    /// Owner of the workflow session (default: `local`).
    pub user_id: String,
    pub generation: GenerationApiConfig,
}

impl LookbookConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `LOOKBOOK_DATA_DIR`       | `./lookbook-data`        |
    /// | `LOOKBOOK_CATALOG`        | `./catalog/catalog.json` |
    /// | `LOOKBOOK_USER_ID`        | `local`                  |
    /// | `GENERATION_API_URL`      | `http://localhost:8080`  |
    /// | `GENERATION_API_KEY`      | unset                    |
    /// | `GENERATION_TIMEOUT_SECS` | `120`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str, default: &str| {
            var(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let timeout_raw = get("GENERATION_TIMEOUT_SECS", "120");
        let timeout_secs: u64 = match timeout_raw.parse() {
            Ok(secs) if secs > 0 => secs,
            _ => {
                return Err(ConfigError::Invalid {
                    name: "GENERATION_TIMEOUT_SECS",
                    expected: "a positive integer",
                    value: timeout_raw,
                })
            }
        };

        let base_url = get("GENERATION_API_URL", "http://localhost:8080");
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                name: "GENERATION_API_URL",
                expected: "an http(s) URL",
                value: base_url,
            });
        }

        Ok(Self {
            data_dir: PathBuf::from(get("LOOKBOOK_DATA_DIR", "./lookbook-data")),
            catalog_path: PathBuf::from(get("LOOKBOOK_CATALOG", "./catalog/catalog.json")),
            user_id: get("LOOKBOOK_USER_ID", "local"),
            generation: GenerationApiConfig {
                base_url,
                api_key: var("GENERATION_API_KEY").filter(|k| !k.trim().is_empty()),
                timeout: Duration::from_secs(timeout_secs),
            },
        })
    }

    /// Directory holding catalog images.
    pub fn assets_dir(&self) -> PathBuf {
        self.catalog_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
