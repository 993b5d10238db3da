//! Environment-driven configuration for the pipeline's collaborators.
//!
//! Every loader has a `from_lookup` form taking a variable lookup function
//! so tests can supply values without touching the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use carlitos_core::ffmpeg::FfmpegTools;
use carlitos_core::retry::{Backoff, RetryPolicy, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Lookup function used by the `from_lookup` constructors.
pub trait Lookup: Fn(&str) -> Option<String> {}
impl<F: Fn(&str) -> Option<String>> Lookup for F {}

/// Lookup backed by the process environment.
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Value of `var`, or `default` when unset or blank.
pub fn string_or(lookup: &impl Lookup, var: &str, default: &str) -> String {
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parsed value of `var`, or `default` when unset or blank.
pub fn parse_or<T>(lookup: &impl Lookup, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

// ---------------------------------------------------------------------------
// Analysis attempts
// ---------------------------------------------------------------------------

/// Attempt budget and lease for analysis jobs.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub retry: RetryPolicy,
    /// How long a worker holds an analysis (and its queue message) before
    /// another worker may take over.
    pub lease: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lease: Duration::from_secs(1800),
        }
    }
}

impl AnalysisConfig {
    /// | Env Var                           | Default |
    /// |-----------------------------------|---------|
    /// | `ANALYSIS_MAX_ATTEMPTS`           | `3`     |
    /// | `ANALYSIS_RETRY_BACKOFF_SECS`     | `60`    |
    /// | `ANALYSIS_RETRY_BACKOFF_MAX_SECS` | unset   |
    /// | `QUEUE_LEASE_SECS`                | `1800`  |
    ///
    /// Setting `ANALYSIS_RETRY_BACKOFF_MAX_SECS` doubles the delay after
    /// each failed attempt, up to that cap.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Lookup) -> Result<Self, ConfigError> {
        let max_attempts: i32 = parse_or(&lookup, "ANALYSIS_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts < 1 {
            return Err(ConfigError::Invalid {
                var: "ANALYSIS_MAX_ATTEMPTS",
                value: max_attempts.to_string(),
                reason: "must be at least 1".into(),
            });
        }
        let backoff_secs: u64 = parse_or(
            &lookup,
            "ANALYSIS_RETRY_BACKOFF_SECS",
            DEFAULT_BACKOFF.as_secs(),
        )?;
        let base = Duration::from_secs(backoff_secs);
        let capped = lookup("ANALYSIS_RETRY_BACKOFF_MAX_SECS").is_some_and(|v| !v.trim().is_empty());
        let backoff = if capped {
            let max_secs: u64 = parse_or(&lookup, "ANALYSIS_RETRY_BACKOFF_MAX_SECS", 0)?;
            Backoff::Exponential {
                base,
                max: Duration::from_secs(max_secs).max(base),
            }
        } else {
            Backoff::Fixed(base)
        };
        let lease_secs: u64 = parse_or(&lookup, "QUEUE_LEASE_SECS", 1800)?;

        Ok(Self {
            retry: RetryPolicy {
                max_attempts,
                backoff,
            },
            lease: Duration::from_secs(lease_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Video storage
// ---------------------------------------------------------------------------

/// S3-compatible (MinIO) connection settings.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Host and port, without scheme.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub secure: bool,
    pub region: String,
}

impl S3Config {
    /// Endpoint URL with the scheme implied by `secure`.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return self.endpoint.clone();
        }
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint)
    }
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    S3(S3Config),
    Local { root: PathBuf },
}

impl StorageConfig {
    /// | Env Var              | Default          |
    /// |----------------------|------------------|
    /// | `STORAGE_BACKEND`    | `s3`             |
    /// | `MINIO_ENDPOINT`     | `localhost:9000` |
    /// | `MINIO_ACCESS_KEY`   | required for s3  |
    /// | `MINIO_SECRET_KEY`   | required for s3  |
    /// | `MINIO_BUCKET_NAME`  | `videos`         |
    /// | `MINIO_SECURE`       | `false`          |
    /// | `MINIO_REGION`       | `us-east-1`      |
    /// | `LOCAL_STORAGE_ROOT` | `./storage`      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Lookup) -> Result<Self, ConfigError> {
        match string_or(&lookup, "STORAGE_BACKEND", "s3").as_str() {
            "s3" => Ok(StorageConfig::S3(S3Config {
                endpoint: string_or(&lookup, "MINIO_ENDPOINT", "localhost:9000"),
                access_key: lookup("MINIO_ACCESS_KEY")
                    .ok_or(ConfigError::Missing("MINIO_ACCESS_KEY"))?,
                secret_key: lookup("MINIO_SECRET_KEY")
                    .ok_or(ConfigError::Missing("MINIO_SECRET_KEY"))?,
                bucket: string_or(&lookup, "MINIO_BUCKET_NAME", "videos"),
                secure: parse_or(&lookup, "MINIO_SECURE", false)?,
                region: string_or(&lookup, "MINIO_REGION", "us-east-1"),
            })),
            "local" => Ok(StorageConfig::Local {
                root: PathBuf::from(string_or(&lookup, "LOCAL_STORAGE_ROOT", "./storage")),
            }),
            other => Err(ConfigError::Invalid {
                var: "STORAGE_BACKEND",
                value: other.to_string(),
                reason: "expected 's3' or 'local'".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Decoder binaries and the pose-detection service.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub pose_service_url: String,
    pub ffmpeg: FfmpegTools,
}

impl ExtractorConfig {
    /// | Env Var            | Default                 |
    /// |--------------------|-------------------------|
    /// | `POSE_SERVICE_URL` | `http://localhost:8500` |
    /// | `FFMPEG_BIN`       | `ffmpeg`                |
    /// | `FFPROBE_BIN`      | `ffprobe`               |
    pub fn from_env() -> Self {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Lookup) -> Self {
        Self {
            pose_service_url: string_or(&lookup, "POSE_SERVICE_URL", "http://localhost:8500")
                .trim_end_matches('/')
                .to_string(),
            ffmpeg: FfmpegTools {
                ffmpeg: PathBuf::from(string_or(&lookup, "FFMPEG_BIN", "ffmpeg")),
                ffprobe: PathBuf::from(string_or(&lookup, "FFPROBE_BIN", "ffprobe")),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// Gemini settings. A missing key is not an error: feedback then degrades.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

impl GeminiConfig {
    /// | Env Var           | Default                                            |
    /// |-------------------|----------------------------------------------------|
    /// | `GEMINI_API_KEY`  | unset (feedback degrades)                          |
    /// | `GEMINI_MODEL`    | `gemini-2.0-flash`                                 |
    /// | `GEMINI_API_BASE` | `https://generativelanguage.googleapis.com/v1beta` |
    pub fn from_env() -> Self {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Lookup) -> Self {
        Self {
            api_key: lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()),
            model: string_or(&lookup, "GEMINI_MODEL", "gemini-2.0-flash"),
            api_base: string_or(
                &lookup,
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            )
            .trim_end_matches('/')
            .to_string(),
        }
    }
}
