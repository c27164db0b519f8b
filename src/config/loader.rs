//! Configuration loader with environment variable support

use super::Config;
use crate::error::Result;
use config::{Environment, File};
use std::path::Path;

/// Prefix of environment overrides, e.g. `SECURITY_CORE__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "SECURITY_CORE";

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    Ok(cfg)
}

/// Load configuration from a TOML file with environment variable overrides.
///
/// A missing file is tolerated so a deployment can be configured from the
/// environment alone.
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimitStrategy;
    use std::io::Write;

    fn write_temp_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.toml", name, uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let path = write_temp_config(
            "security-core-partial",
            r#"
[rate_limits.auth]
max_requests = 3
window_secs = 600
strategy = "token_bucket"

[server]
port = 9090
"#,
        );

        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.rate_limits.auth.max_requests, 3);
        assert_eq!(config.rate_limits.auth.strategy, RateLimitStrategy::TokenBucket);
        assert!(config.rate_limits.auth.enabled);
        assert_eq!(config.rate_limits.api.max_requests, 100);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.csrf.header_name, "x-csrf-token");
    }

    #[test]
    fn test_missing_file_is_an_error_without_env() {
        let result = load_config("/definitely/not/here.toml");
        assert!(result.is_err());
    }
}
