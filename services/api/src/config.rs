use std::env;
use std::net::SocketAddr;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error(transparent)]
    Service(#[from] interview_service::config::ConfigError),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Bank, provider keys, logging and engine settings, shared with the CLI.
    pub service: interview_service::config::Config,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory.
    /// On top of the variables the CLI reads, it uses:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "0.0.0.0:3000".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        Ok(Self {
            bind_address,
            service: interview_service::config::Config::from_lookup(lookup)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_defaults_and_validates() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_address.port(), 3000);

        let err = Config::from_lookup(|key| (key == "BIND_ADDRESS").then(|| "nowhere".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(..)));
    }
}
