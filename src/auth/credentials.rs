//! API credentials.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::error::VenueError;

/// Default environment variable holding the API key.
pub const API_KEY_VAR: &str = "VENUE_API_KEY";
/// Default environment variable holding the API secret.
pub const API_SECRET_VAR: &str = "VENUE_API_SECRET";

/// API key and secret.
#[derive(Clone)]
pub struct Credentials {
    /// The API key (public identifier)
    pub api_key: String,
    api_secret: SecretString,
}

impl Credentials {
    /// Create new credentials from an API key and secret.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// The raw secret, for signing only.
    pub fn expose_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Where the client gets its credentials from.
///
/// Implement this to pull keys from a secrets manager.
pub trait CredentialsProvider: Send + Sync {
    /// Get the credentials.
    fn get_credentials(&self) -> &Credentials;
}

impl<P: CredentialsProvider + ?Sized> CredentialsProvider for Arc<P> {
    fn get_credentials(&self) -> &Credentials {
        (**self).get_credentials()
    }
}

/// Credentials held in memory.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    /// Create a new static credentials provider.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(api_key, api_secret),
        }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn get_credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Credentials read once from environment variables.
#[derive(Debug)]
pub struct EnvCredentials {
    credentials: Credentials,
}

impl EnvCredentials {
    /// Read `VENUE_API_KEY` and `VENUE_API_SECRET`.
    ///
    /// # Errors
    ///
    /// [`VenueError::MissingCredentials`] if either variable is unset or empty.
    pub fn from_env() -> Result<Self, VenueError> {
        Self::from_env_vars(API_KEY_VAR, API_SECRET_VAR)
    }

    /// Read credentials from custom variable names.
    pub fn from_env_vars(key_var: &str, secret_var: &str) -> Result<Self, VenueError> {
        Self::try_from_env_vars(key_var, secret_var).ok_or(VenueError::MissingCredentials)
    }

    /// Like [`EnvCredentials::from_env`], returning `None` when unset.
    pub fn try_from_env() -> Option<Self> {
        Self::try_from_env_vars(API_KEY_VAR, API_SECRET_VAR)
    }

    /// Like [`EnvCredentials::from_env_vars`], returning `None` when unset.
    pub fn try_from_env_vars(key_var: &str, secret_var: &str) -> Option<Self> {
        let api_key = std::env::var(key_var).ok().filter(|v| !v.is_empty())?;
        let api_secret = std::env::var(secret_var).ok().filter(|v| !v.is_empty())?;

        Some(Self {
            credentials: Credentials::new(api_key, api_secret),
        })
    }
}

impl CredentialsProvider for EnvCredentials {
    fn get_credentials(&self) -> &Credentials {
        &self.credentials
    }
}
