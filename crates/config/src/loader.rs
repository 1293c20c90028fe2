use std::{
    fs,
    path::{Path, PathBuf},
};

use {tracing::debug, url::Url};

use crate::schema::DrivelinkConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `<config dir>/drivelink/drivelink.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "drivelink", "drivelink")
        .map(|dirs| dirs.config_dir().join("drivelink.toml"))
}

/// Load, apply environment overrides and validate.
///
/// An explicit `path` must exist. Without one, a missing default file
/// yields built-in defaults so environment variables alone can configure
/// the client.
pub fn load_config(path: Option<&Path>) -> Result<DrivelinkConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => read_file(&path)?,
            _ => {
                debug!("no config file found, using defaults");
                DrivelinkConfig::default()
            },
        },
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

pub fn parse_config(raw: &str) -> Result<DrivelinkConfig, ConfigError> {
    Ok(toml::from_str(raw)?)
}

fn read_file(path: &Path) -> Result<DrivelinkConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    debug!(path = %path.display(), "loaded config file");
    parse_config(&raw)
}

impl DrivelinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let require = |value: &str, name: &str| {
            if value.trim().is_empty() {
                Err(ConfigError::Invalid(format!("{name} is required")))
            } else {
                Ok(())
            }
        };
        let require_url = |value: &str, name: &str| {
            require(value, name)?;
            Url::parse(value)
                .map(|_| ())
                .map_err(|e| ConfigError::Invalid(format!("{name} is not a valid url: {e}")))
        };

        require(&self.oauth.client_id, "oauth.client_id")?;
        require_url(&self.oauth.auth_url, "oauth.auth_url")?;
        require_url(&self.oauth.token_url, "oauth.token_url")?;
        require_url(&self.oauth.redirect_uri, "oauth.redirect_uri")?;
        require_url(&self.api.base_url, "api.base_url")?;

        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "api.timeout_secs must be greater than zero".into(),
            ));
        }
        if self.api.retry_base_delay_ms > self.api.retry_max_delay_ms {
            return Err(ConfigError::Invalid(
                "api.retry_base_delay_ms exceeds api.retry_max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use secrecy::ExposeSecret;

    use super::*;

    const FULL: &str = r#"
[oauth]
client_id     = "client-1"
client_secret = "from-file"
auth_url      = "https://auth.example.com/oauth/authorize"
token_url     = "https://auth.example.com/oauth/token"
redirect_uri  = "drivelink://oauth/callback"
scopes        = ["vehicle:read", "trips:read"]

[api]
base_url    = "https://api.example.com"
timeout_secs = 10
max_retries = 5
"#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_config(FULL).unwrap();
        assert_eq!(config.oauth.client_id, "client-1");
        assert_eq!(
            config
                .oauth
                .client_secret
                .as_ref()
                .unwrap()
                .expose_secret(),
            "from-file"
        );
        assert_eq!(config.oauth.scopes, vec!["vehicle:read", "trips:read"]);
        assert_eq!(config.api.timeout(), Duration::from_secs(10));
        assert_eq!(config.api.retry_policy().max_retries, 5);
        // unspecified fields keep their defaults
        assert_eq!(config.api.refresh_skew_secs, 30);
        assert_eq!(
            config.api.retry_policy().base_delay,
            Duration::from_millis(250)
        );
        config.validate().unwrap();

        let oauth = config.oauth_config();
        assert_eq!(oauth.token_url, "https://auth.example.com/oauth/token");
        assert!(!format!("{:?}", config.oauth).contains("from-file"));
    }

    #[test]
    fn test_empty_secret_is_treated_as_absent() {
        let config = parse_config("[oauth]\nclient_secret = \"\"\n").unwrap();
        assert!(config.oauth.client_secret.is_none());
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = parse_config(FULL).unwrap();
        let env: HashMap<&str, &str> = [
            ("DRIVELINK_CLIENT_SECRET", "from-env"),
            ("DRIVELINK_API_BASE_URL", "https://staging.example.com"),
            ("DRIVELINK_CLIENT_ID", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.oauth.client_id, "client-1");
        assert_eq!(
            config
                .oauth
                .client_secret
                .as_ref()
                .unwrap()
                .expose_secret(),
            "from-env"
        );
        assert_eq!(config.api.base_url, "https://staging.example.com");
    }

    #[test]
    fn test_validate_reports_missing_and_bad_fields() {
        let config = DrivelinkConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("oauth.client_id"));

        let mut config = parse_config(FULL).unwrap();
        config.api.base_url = "not a url".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("api.base_url"));

        let mut config = parse_config(FULL).unwrap();
        config.api.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_config("[oauth\nclient_id = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_read_file_and_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("drivelink.toml");
        fs::write(&path, FULL).unwrap();

        let config = read_file(&path).unwrap();
        assert_eq!(config.api.max_retries, 5);

        let missing = tmp.path().join("nope.toml");
        assert!(matches!(
            load_config(Some(missing.as_path())),
            Err(ConfigError::NotFound(p)) if p == missing
        ));
    }
}
