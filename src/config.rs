//! Server configuration from environment variables.

use crate::domain::errors::PlatformError;

pub const DEFAULT_PORT: u16 = 7400;
pub const DEFAULT_DB_PATH: &str = "sqlite://data/crownex.db";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    pub jwt_secret: String,
    /// 32-byte hex AEAD key; when absent the vault derives one from
    /// `VAULT_PASSWORD` + `VAULT_SALT`.
    pub encryption_key_hex: Option<String>,
    pub vault_password: String,
    pub vault_salt: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, PlatformError> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let db_path =
            std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        // Session tokens are unverifiable without this; refuse to boot.
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| PlatformError::BadInput("JWT_SECRET must be set".to_string()))?;

        let encryption_key_hex = std::env::var("ENCRYPTION_KEY").ok();
        let vault_password =
            std::env::var("VAULT_PASSWORD").unwrap_or_else(|_| jwt_secret.clone());
        let vault_salt =
            std::env::var("VAULT_SALT").unwrap_or_else(|_| "crownex-vault".to_string());

        Ok(Self {
            port,
            db_path,
            jwt_secret,
            encryption_key_hex,
            vault_password,
            vault_salt,
        })
    }
}
