use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::jobs::ProcessorConfig;

/// Application configuration loaded from environment variables.
/// Every setting has a default; malformed values fail startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the extraction cache runs in memory.
    pub redis_url: Option<String>,
    pub upload_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub job_timeout_seconds: u64,
    pub job_max_retries: u32,
    pub job_retry_delay_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub job_retention_hours: u64,
    pub cache_ttl_hours: u64,
    pub max_upload_bytes: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./uploads")),
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", 3)?,
            job_timeout_seconds: env_or("JOB_TIMEOUT_SECONDS", 300)?,
            job_max_retries: env_or("JOB_MAX_RETRIES", 3)?,
            job_retry_delay_seconds: env_or("JOB_RETRY_DELAY_SECONDS", 5)?,
            cleanup_interval_seconds: env_or("CLEANUP_INTERVAL_SECONDS", 3600)?,
            job_retention_hours: env_or("JOB_RETENTION_HOURS", 24)?,
            cache_ttl_hours: env_or("CACHE_TTL_HOURS", 24)?,
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_concurrent_jobs: self.max_concurrent_jobs.max(1),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_seconds.max(1)),
            job_retention: Duration::from_secs(self.job_retention_hours * 3600),
            default_timeout_seconds: self.job_timeout_seconds,
            default_max_retries: self.job_max_retries,
            default_retry_delay_seconds: self.job_retry_delay_seconds,
            ..ProcessorConfig::default()
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_or(key, std::env::var(key).ok(), default)
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {value}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests(upload_dir: PathBuf) -> Self {
        Config {
            redis_url: None,
            upload_dir,
            max_concurrent_jobs: 1,
            job_timeout_seconds: 30,
            job_max_retries: 0,
            job_retry_delay_seconds: 0,
            cleanup_interval_seconds: 3600,
            job_retention_hours: 24,
            cache_ttl_hours: 24,
            max_upload_bytes: 1024 * 1024,
            port: 0,
            rust_log: "debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_uses_default_when_unset_or_blank() {
        assert_eq!(parse_or::<u64>("X", None, 7).unwrap(), 7);
        assert_eq!(parse_or::<u64>("X", Some("  ".into()), 7).unwrap(), 7);
        assert_eq!(parse_or::<u64>("X", Some(" 42 ".into()), 7).unwrap(), 42);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        let err = parse_or::<u16>("PORT", Some("eighty".into()), 8080).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_processor_config_mapping() {
        let mut config = Config::for_tests(PathBuf::from("/tmp"));
        config.max_concurrent_jobs = 0;
        config.job_retention_hours = 2;

        let processor = config.processor_config();
        assert_eq!(processor.max_concurrent_jobs, 1);
        assert_eq!(processor.job_retention, Duration::from_secs(7200));
        assert_eq!(processor.default_timeout_seconds, 30);
    }
}
