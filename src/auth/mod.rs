pub mod error;
pub mod middleware;

pub use error::AuthError;
pub use middleware::require_api_key;

use crate::config::Settings;

/// Single master key auth. Disabled unless `API_KEY_AUTH_ENABLED` is truthy.
#[derive(Debug, Clone)]
pub struct ApiKeyConfig {
    pub enabled: bool,
    pub master_key: Option<String>,
    pub header_name: String,
}

impl ApiKeyConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enabled: settings.api_key_auth_enabled,
            master_key: settings.api_master_key.clone(),
            header_name: settings.api_key_header.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            master_key: None,
            header_name: crate::config::DEFAULT_API_KEY_HEADER.to_string(),
        }
    }

    /// Checks a presented key. `Ok` when auth is disabled.
    pub fn verify(&self, presented: Option<&str>) -> Result<(), AuthError> {
        if !self.enabled {
            return Ok(());
        }
        let expected = self.master_key.as_deref().ok_or(AuthError::MasterKeyNotConfigured)?;
        match presented {
            None => Err(AuthError::MissingApiKey),
            Some(key) if constant_time_eq(key.as_bytes(), expected.as_bytes()) => Ok(()),
            Some(_) => Err(AuthError::InvalidApiKey),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
