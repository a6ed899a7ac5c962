use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub platform: PlatformConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
    /// Root directory for content-addressed file storage.
    pub content_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    /// API credentials; one long-lived worker per credential in each
    /// network stage.
    pub tokens: Vec<String>,
    /// Code-search URL template with `{query}` and `{page}` placeholders.
    pub search_api: String,
    /// Keywords to hunt for.
    pub keywords: Vec<String>,
    /// Language qualifiers crossed with keywords. Empty means a plain
    /// keyword query.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Token-bucket refill rate for search requests, per second per
    /// credential.
    #[serde(default = "default_rate_limit")]
    pub search_rate_limit: f64,
    /// Token-bucket refill rate for fetch requests, per second per
    /// credential.
    #[serde(default = "default_rate_limit")]
    pub fetch_rate_limit: f64,
    #[serde(default = "default_max_items_per_page")]
    pub max_items_per_page: usize,
    /// Cap on paged requests per query, bounding worst-case fan-out.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Fixed sleep between retries of a non-success response.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

fn default_rate_limit() -> f64 {
    0.5
}
fn default_max_items_per_page() -> usize {
    100
}
fn default_max_pages() -> usize {
    10
}
fn default_request_timeout_secs() -> u64 {
    5
}
fn default_retry_backoff_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Byte budget of a single keyword context window.
    #[serde(default = "default_max_fragment_len")]
    pub max_fragment_len: usize,
    /// Byte budget of the union span when merging nearby fragments.
    #[serde(default = "default_max_union_len")]
    pub max_union_len: usize,
    /// Additional lines of context wanted around an occurrence.
    #[serde(default = "default_desired_lines")]
    pub desired_lines: usize,
    #[serde(default = "default_extract_workers")]
    pub workers: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_fragment_len: default_max_fragment_len(),
            max_union_len: default_max_union_len(),
            desired_lines: default_desired_lines(),
            workers: default_extract_workers(),
        }
    }
}

fn default_max_fragment_len() -> usize {
    480
}
fn default_max_union_len() -> usize {
    640
}
fn default_desired_lines() -> usize {
    5
}
fn default_extract_workers() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.platform.tokens.is_empty() {
        anyhow::bail!("platform.tokens must contain at least one credential");
    }

    if config.platform.keywords.is_empty() {
        anyhow::bail!("platform.keywords must contain at least one keyword");
    }

    if !config.platform.search_api.contains("{query}")
        || !config.platform.search_api.contains("{page}")
    {
        anyhow::bail!("platform.search_api must contain {{query}} and {{page}} placeholders");
    }

    if config.platform.search_rate_limit <= 0.0 || config.platform.fetch_rate_limit <= 0.0 {
        anyhow::bail!("platform rate limits must be > 0");
    }

    if config.platform.max_items_per_page == 0 {
        anyhow::bail!("platform.max_items_per_page must be > 0");
    }

    if config.extraction.max_fragment_len == 0 {
        anyhow::bail!("extraction.max_fragment_len must be > 0");
    }

    if config.extraction.max_union_len < config.extraction.max_fragment_len {
        anyhow::bail!("extraction.max_union_len must be >= extraction.max_fragment_len");
    }

    if config.extraction.workers == 0 {
        anyhow::bail!("extraction.workers must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    const VALID: &str = r#"
[store]
path = "/tmp/leakscout.sqlite"
content_dir = "/tmp/leakscout-content"

[platform]
tokens = ["t1", "t2"]
search_api = "https://api.example.com/search/code?q={query}&page={page}&per_page=100"
keywords = ["PASSWORD"]
languages = ["go", "python"]

[server]
bind = "127.0.0.1:7331"
"#;

    #[test]
    fn test_valid_config_with_defaults() {
        let f = write_config(VALID);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.platform.tokens.len(), 2);
        assert_eq!(config.platform.search_rate_limit, 0.5);
        assert_eq!(config.platform.max_pages, 10);
        assert_eq!(config.extraction.max_fragment_len, 480);
        assert_eq!(config.extraction.max_union_len, 640);
        assert_eq!(config.extraction.desired_lines, 5);
    }

    #[test]
    fn test_missing_placeholders_rejected() {
        let broken = VALID.replace("{page}", "0");
        let f = write_config(&broken);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_no_tokens_rejected() {
        let broken = VALID.replace(r#"tokens = ["t1", "t2"]"#, "tokens = []");
        let f = write_config(&broken);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_union_smaller_than_fragment_rejected() {
        let broken = format!("{}\n[extraction]\nmax_fragment_len = 480\nmax_union_len = 100\n", VALID);
        let f = write_config(&broken);
        assert!(load_config(f.path()).is_err());
    }
}
