use std::env;
use std::fmt;
use std::time::Duration;

use tryon_contracts::TryOnError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Checked in order when the caller does not pass a key.
pub const CREDENTIAL_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

#[derive(Clone)]
pub struct EngineConfig {
    pub api_base: String,
    /// `None` waits on the backend indefinitely.
    pub request_timeout: Option<Duration>,
    env_credential: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: None,
            env_credential: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .field(
                "env_credential",
                &self.env_credential.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_base = non_empty("TRYON_API_BASE")
            .or_else(|| non_empty("GEMINI_API_BASE"))
            .map(|value| normalize_api_base(&value))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let request_timeout = non_empty("TRYON_REQUEST_TIMEOUT")
            .and_then(|value| value.parse::<f64>().ok())
            .and_then(timeout_from_secs);
        let env_credential = CREDENTIAL_ENV_VARS.iter().find_map(|key| non_empty(*key));

        Self {
            api_base,
            request_timeout,
            env_credential,
        }
    }

    pub fn with_api_base(mut self, api_base: Option<&str>) -> Self {
        if let Some(value) = api_base.map(str::trim).filter(|value| !value.is_empty()) {
            self.api_base = normalize_api_base(value);
        }
        self
    }

    pub fn with_timeout_secs(mut self, secs: Option<f64>) -> Self {
        if let Some(secs) = secs {
            self.request_timeout = timeout_from_secs(secs);
        }
        self
    }

    pub fn with_env_credential(mut self, credential: Option<String>) -> Self {
        self.env_credential = credential
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    /// Caller-supplied key first, then the environment.
    pub fn resolve_credential(&self, explicit: Option<&str>) -> Result<String, TryOnError> {
        explicit
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| self.env_credential.clone())
            .ok_or(TryOnError::MissingCredential)
    }
}

fn normalize_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}
