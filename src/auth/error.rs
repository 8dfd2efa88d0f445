use axum::http::StatusCode;
use std::fmt::Display;

#[derive(Debug)]
pub enum AuthError {
    InvalidApiKey,
    MissingApiKey,
    MasterKeyNotConfigured,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidApiKey | AuthError::MissingApiKey => StatusCode::UNAUTHORIZED,
            AuthError::MasterKeyNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            AuthError::InvalidApiKey | AuthError::MissingApiKey => "Invalid or missing API key",
            AuthError::MasterKeyNotConfigured => "API key auth is enabled but API_MASTER_KEY is not set",
        };
        f.write_str(message)
    }
}

impl std::error::Error for AuthError {}
