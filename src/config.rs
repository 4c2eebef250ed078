//! Configuration, read once from the environment at startup.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default primary model chain, attempted in order.
const DEFAULT_GEMINI_MODELS: &str = "gemini-2.0-flash,gemini-2.0-flash-lite-001";

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the local libSQL database file.
    pub db_path: String,
    /// Webhook server port.
    pub port: u16,
    /// How many prior turns are handed to the model as context.
    pub history_limit: usize,
    /// Interval between reminder sweeps.
    pub sweep_interval: Duration,
    /// Gemini API key (primary provider family).
    pub gemini_api_key: SecretString,
    /// Primary model ids, attempted in declared order.
    pub gemini_models: Vec<String>,
    /// Groq API key; fallback is disabled when absent.
    pub groq_api_key: Option<SecretString>,
    /// Fallback model id.
    pub groq_model: String,
    /// WhatsApp Cloud API access token.
    pub whatsapp_token: SecretString,
    /// WhatsApp phone number id (sender identity).
    pub whatsapp_phone_id: String,
    /// Token the webhook verification handshake must present.
    pub verify_token: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            db_path: std::env::var("AROGYA_DB_PATH")
                .unwrap_or_else(|_| "./data/arogya.db".to_string()),
            port: parse_env("AROGYA_PORT", 8000)?,
            history_limit: parse_env("AROGYA_HISTORY_LIMIT", 10)?,
            sweep_interval: Duration::from_secs(parse_env("AROGYA_SWEEP_INTERVAL_SECS", 60)?),
            gemini_api_key: SecretString::from(required("GEMINI_API_KEY")?),
            gemini_models: parse_model_list(
                &std::env::var("AROGYA_GEMINI_MODELS")
                    .unwrap_or_else(|_| DEFAULT_GEMINI_MODELS.to_string()),
            ),
            groq_api_key: std::env::var("GROQ_API_KEY").ok().map(SecretString::from),
            groq_model: std::env::var("AROGYA_GROQ_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            whatsapp_token: SecretString::from(required("WHATSAPP_ACCESS_TOKEN")?),
            whatsapp_phone_id: required("WHATSAPP_PHONE_NUMBER_ID")?,
            verify_token: required("VERIFY_TOKEN")?,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated model list, dropping empty entries.
fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
