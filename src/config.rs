// Configuration module for codemap
// Reads from environment variables with sensible defaults

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Files larger than this are skipped (CODEMAP_MAX_FILE_SIZE_MB)
    pub max_file_size_mb: u64,

    /// Extraction worker threads, 0 = rayon default (CODEMAP_THREADS)
    pub threads: usize,

    /// Depth used by trace/context when the caller gives none (CODEMAP_DEFAULT_DEPTH)
    pub default_depth: i64,

    /// Dependency manifest file name at the repository root (CODEMAP_MANIFEST)
    pub manifest_name: String,

    /// Shell command that turns a prompt on stdin into text on stdout (CODEMAP_SUMMARIZER_CMD)
    pub summarizer_cmd: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size_mb: 10,
            threads: 0,
            default_depth: 3,
            manifest_name: "requirements.txt".to_string(),
            summarizer_cmd: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        parse_var("CODEMAP_MAX_FILE_SIZE_MB", &mut config.max_file_size_mb);
        parse_var("CODEMAP_THREADS", &mut config.threads);
        parse_var("CODEMAP_DEFAULT_DEPTH", &mut config.default_depth);

        if let Ok(val) = env::var("CODEMAP_MANIFEST") {
            let trimmed = val.trim();
            if !trimmed.is_empty() {
                config.manifest_name = trimmed.to_string();
            }
        }

        if let Ok(val) = env::var("CODEMAP_SUMMARIZER_CMD") {
            let trimmed = val.trim();
            if !trimmed.is_empty() {
                config.summarizer_cmd = Some(trimmed.to_string());
            }
        }

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}

fn parse_var<T>(name: &str, slot: &mut T)
where
    T: FromStr + std::fmt::Display,
{
    let Ok(val) = env::var(name) else {
        return;
    };
    match val.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("invalid {name} value: {val}, using default: {slot}"),
    }
}
