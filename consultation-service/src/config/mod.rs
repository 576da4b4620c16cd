use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

/// Default Gemini REST endpoint.
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
/// 256 KiB comfortably holds a long set of visit notes.
const DEFAULT_MAX_REQUEST_BODY_BYTES: usize = 262_144;

#[derive(Debug, Clone)]
pub struct ConsultationConfig {
    pub common: core_config::Config,
    pub models: ModelConfig,
    pub google: GoogleConfig,
    pub http: HttpConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model used for summaries (e.g., gemini-2.5-flash)
    pub text_model: String,
    /// Idle limit for the upstream call: connecting, or waiting between
    /// body reads. Total stream length is not capped.
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub api_key: Secret<String>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub max_request_body_bytes: usize,
    /// Empty means no CORS layer is installed.
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl ConsultationConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Build the service settings from an arbitrary variable source.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_prod = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()) == "prod";

        let api_key = match lookup("GOOGLE_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            Some(key) if !key.trim().is_empty() => key,
            _ => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "GOOGLE_API_KEY (or GEMINI_API_KEY) is required but not set"
                )))
            }
        };

        Ok(ConsultationConfig {
            common,
            models: ModelConfig {
                text_model: get_env(&lookup, "GENAI_TEXT_MODEL", Some(DEFAULT_TEXT_MODEL), is_prod)?,
                read_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "GENAI_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                )?),
            },
            google: GoogleConfig {
                api_key: Secret::new(api_key),
                api_base: get_env(&lookup, "GEMINI_API_BASE", Some(DEFAULT_GEMINI_API_BASE), false)?
                    .trim_end_matches('/')
                    .to_string(),
            },
            http: HttpConfig {
                max_request_body_bytes: parse_or(
                    &lookup,
                    "MAX_REQUEST_BODY_BYTES",
                    DEFAULT_MAX_REQUEST_BODY_BYTES,
                )?,
                cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                    .map(|raw| {
                        raw.split(',')
                            .map(str::trim)
                            .filter(|origin| !origin.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            observability: ObservabilityConfig {
                log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                otlp_endpoint: lookup("OTLP_ENDPOINT").filter(|e| !e.trim().is_empty()),
            },
        })
    }
}

fn get_env<F>(lookup: &F, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
