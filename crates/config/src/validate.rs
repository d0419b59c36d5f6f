//! Pre-boot validation of a [`Settings`] snapshot.

use tracing::warn;

use crate::schema::Settings;

/// Validate a settings snapshot, returning a list of human-readable errors.
///
/// An empty list means the gateway may boot. Soft misconfigurations (for
/// example a missing encryption key outside production) are logged as
/// warnings instead of returned.
#[must_use]
pub fn validate(settings: &Settings) -> Vec<String> {
    let mut errors = Vec::new();

    if settings.server.port == 0 {
        errors.push("PORT must be a non-zero TCP port".into());
    }

    if settings.database.database_name.trim().is_empty() {
        errors.push("DATABASE_NAME must not be empty".into());
    }

    if settings.security.master_encryption_key.is_none() {
        if settings.logging.environment.is_production() {
            errors.push("MASTER_ENCRYPTION_KEY is mandatory in production".into());
        } else {
            warn!("MASTER_ENCRYPTION_KEY is unset; sealed keys use an ephemeral seed");
        }
    }

    if settings.cors.credentials && settings.cors.origin == "*" {
        errors.push("CORS_CREDENTIALS requires an explicit CORS_ORIGIN, not `*`".into());
    }

    errors
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::schema::{Environment, Settings},
        secrecy::SecretString,
    };

    #[test]
    fn default_dev_settings_validate() {
        assert!(validate(&Settings::default()).is_empty());
    }

    #[test]
    fn production_requires_master_key() {
        let mut settings = Settings::default();
        settings.logging.environment = Environment::Production;
        let errors = validate(&settings);
        assert!(errors.iter().any(|e| e.contains("MASTER_ENCRYPTION_KEY")));

        settings.security.master_encryption_key = Some(SecretString::new("seed".into()));
        assert!(validate(&settings).is_empty());
    }

    #[test]
    fn wildcard_origin_with_credentials_rejected() {
        let mut settings = Settings::default();
        settings.cors.credentials = true;
        let errors = validate(&settings);
        assert!(errors.iter().any(|e| e.contains("CORS_CREDENTIALS")));
    }

    #[test]
    fn zero_port_rejected() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert_eq!(validate(&settings).len(), 1);
    }
}
