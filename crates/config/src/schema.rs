//! Settings schema and environment snapshot.

use {secrecy::SecretString, serde::Deserialize};

/// Deployment environment, from `NODE_ENV` (kept for compatibility with the
/// deployment manifests this gateway inherits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub mongodb_uri: String,
    pub database_name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            mongodb_uri: "mongodb://localhost:27017".into(),
            database_name: "switchyard".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SecuritySettings {
    /// Seed for sealing sub-provider API keys at rest. Mandatory in
    /// production; dev boots generate an ephemeral one with a warning.
    pub master_encryption_key: Option<SecretString>,
}

#[derive(Debug, Clone, Default)]
pub struct ModerationSettings {
    /// Default key for the moderation pre-check adapter.
    pub openai_api_key: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub prefix: Option<String>,
    pub collect_default: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: None,
            collect_default: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub environment: Environment,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            environment: Environment::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsSettings {
    /// `*` or a comma-separated origin list.
    pub origin: String,
    pub credentials: bool,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            origin: "*".into(),
            credentials: false,
        }
    }
}

/// Full gateway configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub security: SecuritySettings,
    pub moderation: ModerationSettings,
    pub metrics: MetricsSettings,
    pub logging: LoggingSettings,
    pub cors: CorsSettings,
}

impl Settings {
    /// Snapshot the recognized environment variables.
    ///
    /// Unparseable values fall back to the default for that field; a missing
    /// variable is never an error here (see [`crate::validate`] for the
    /// hard requirements).
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(host) = std::env::var("HOST")
            && !host.trim().is_empty()
        {
            settings.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            settings.server.port = port;
        }

        if let Ok(uri) = std::env::var("MONGODB_URI")
            && !uri.trim().is_empty()
        {
            settings.database.mongodb_uri = uri;
        }
        if let Ok(name) = std::env::var("DATABASE_NAME")
            && !name.trim().is_empty()
        {
            settings.database.database_name = name;
        }

        settings.security.master_encryption_key = env_secret("MASTER_ENCRYPTION_KEY");
        settings.moderation.openai_api_key = env_secret("OPENAI_API_KEY");

        if let Some(enabled) = env_parse_bool("METRICS_ENABLED") {
            settings.metrics.enabled = enabled;
        }
        if let Ok(prefix) = std::env::var("METRICS_PREFIX")
            && !prefix.trim().is_empty()
        {
            settings.metrics.prefix = Some(prefix.trim().to_string());
        }
        if let Some(collect) = env_parse_bool("COLLECT_DEFAULT_METRICS") {
            settings.metrics.collect_default = collect;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL")
            && !level.trim().is_empty()
        {
            settings.logging.level = level;
        }
        if let Ok(env) = std::env::var("NODE_ENV") {
            settings.logging.environment = Environment::parse(&env);
        }

        if let Ok(origin) = std::env::var("CORS_ORIGIN")
            && !origin.trim().is_empty()
        {
            settings.cors.origin = origin;
        }
        if let Some(credentials) = env_parse_bool("CORS_CREDENTIALS") {
            settings.cors.credentials = credentials;
        }

        settings
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_parse_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_secret(name: &str) -> Option<SecretString> {
    let raw = std::env::var(name).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    Some(SecretString::new(raw))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("PROD"), Environment::Production);
        assert_eq!(Environment::parse("test"), Environment::Test);
        assert_eq!(Environment::parse("staging"), Environment::Development);
        assert_eq!(Environment::parse(""), Environment::Development);
    }

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.server.port, 3000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert!(s.metrics.enabled);
        assert_eq!(s.cors.origin, "*");
        assert!(!s.cors.credentials);
        assert!(s.security.master_encryption_key.is_none());
    }
}
