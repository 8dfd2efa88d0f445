//! Process configuration from the environment (and `.env`).

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::schedule::DispatcherConfig;

pub const DEFAULT_OUTPUT_ROOT: &str = "./downloads";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./data/tasks.db?mode=rwc";
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
pub struct Settings {
    pub output_root: PathBuf,
    pub database_url: String,
    pub max_workers: usize,
    pub max_attempts: u32,
    pub job_timeout: Option<Duration>,
    pub host: String,
    pub port: u16,
    pub log_dir: String,
    pub ytdlp_binary: PathBuf,
    pub api_key_auth_enabled: bool,
    pub api_master_key: Option<String>,
    pub api_key_header: String,
    pub domain: Option<String>,
    pub relocation_dir: Option<PathBuf>,
    pub relocation_base_url: Option<String>,
    pub access_url_ttl: Duration,
    /// Values that could not be parsed; logged once logging is up.
    pub warnings: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut number = |key: &str, default: u64| -> u64 { parse_or(key, get(key), default, &mut warnings) };
        let max_workers = number("MAX_WORKERS", 4).max(1) as usize;
        let max_attempts = number("MAX_ATTEMPTS", 3).clamp(1, u32::MAX as u64) as u32;
        let job_timeout = match number("JOB_TIMEOUT_SECS", 0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let access_url_ttl = Duration::from_secs(number("ACCESS_URL_TTL_SECS", 3600).max(1));
        let port: u16 = parse_or("PORT", get("PORT"), 8000, &mut warnings);

        let relocation_dir = get("RELOCATION_DIR").map(PathBuf::from);
        let relocation_base_url = relocation_dir.as_ref().map(|dir| {
            get("RELOCATION_BASE_URL").unwrap_or_else(|| format!("file://{}", dir.display()))
        });

        Self {
            output_root: get("SERVER_OUTPUT_ROOT").unwrap_or_else(|| DEFAULT_OUTPUT_ROOT.to_string()).into(),
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_workers,
            max_attempts,
            job_timeout,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            log_dir: get("LOG_DIR").unwrap_or_else(|| "./logs".to_string()),
            ytdlp_binary: get("YTDLP_BINARY").unwrap_or_else(|| "yt-dlp".to_string()).into(),
            api_key_auth_enabled: get("API_KEY_AUTH_ENABLED").map(|v| is_truthy(&v)).unwrap_or(false),
            api_master_key: get("API_MASTER_KEY"),
            api_key_header: get("API_KEY_HEADER_NAME").unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
            domain: get("DOMAIN"),
            relocation_dir,
            relocation_base_url,
            access_url_ttl,
            warnings,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_workers: self.max_workers,
            max_attempts: self.max_attempts,
            job_timeout: self.job_timeout,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "t" | "yes" | "y" | "on"
    )
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T, warnings: &mut Vec<String>) -> T
where
    T: FromStr + Display,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warnings.push(format!("{}={:?} is not a valid number, using {}", key, raw, default));
            default
        }),
    }
}
