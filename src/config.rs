use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    dotenv().ok(); // Load .env file if present
    Config::from_env()
});

pub const DEFAULT_RAG_NAME: &str = "docs-ai-search";
pub const DEFAULT_MAX_NUM_RESULTS: u32 = 3;
// Tuned empirically against the docs corpus.
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.55;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub static_dir: Option<PathBuf>,
    pub rag_api_base: String,
    pub rag_account_id: Option<String>,
    pub rag_api_token: Option<String>,
    pub rag_name: String,
    pub max_num_results: u32,
    pub score_threshold: f64,
    pub log_level: String,
    /// Problems found while loading, already logged.
    pub warnings: Vec<String>,
}

impl Config {
    pub fn from_env() -> Config {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Values that fail to parse fall
    /// back to their default and are logged and kept in `warnings`.
    pub fn from_lookup<F>(lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars = EnvReader::new(lookup);
        Config {
            bind_addr: vars.get_or_default("DOCSEARCH_BIND", "127.0.0.1:4321"),
            static_dir: vars.get("DOCSEARCH_STATIC_DIR").map(PathBuf::from),
            rag_api_base: vars.get_or_default("RAG_API_BASE", "https://api.cloudflare.com/client/v4"),
            rag_account_id: vars.get("RAG_ACCOUNT_ID"),
            rag_api_token: vars.get("RAG_API_TOKEN"),
            rag_name: vars.get_or_default("RAG_NAME", DEFAULT_RAG_NAME),
            max_num_results: vars.parsed("RAG_MAX_NUM_RESULTS", DEFAULT_MAX_NUM_RESULTS),
            score_threshold: vars.parsed("RAG_SCORE_THRESHOLD", DEFAULT_SCORE_THRESHOLD),
            log_level: vars.get_or_default("DOCSEARCH_LOG", DEFAULT_LOG_LEVEL),
            warnings: vars.warnings,
        }
    }
}

/// Log level, readable before `CONFIG` is touched so the logger can be
/// installed first.
pub fn log_level_from_env() -> String {
    dotenv().ok();
    EnvReader::new(|key| env::var(key).ok()).get_or_default("DOCSEARCH_LOG", DEFAULT_LOG_LEVEL)
}

struct EnvReader<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            warnings: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn get_or_default(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                let warning = format!("invalid value {raw:?} for {key}, using default {default}");
                log::warn!("{warning}");
                self.warnings.push(warning);
                default
            }
        }
    }
}
