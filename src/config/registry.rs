//! Provider-to-host lookup.

use std::collections::BTreeMap;

use super::Settings;
use crate::domain::ProviderId;
use crate::error::{Error, Result};

/// Mail submission port (RFC 6409), used for every provider.
pub const SUBMISSION_PORT: u16 = 587;

/// Providers known without any configuration.
const BUILTIN_PROVIDERS: &[(&str, &str)] = &[
    ("gmail", "smtp.gmail.com"),
    ("hotmail", "smtp-mail.outlook.com"),
    ("office365", "smtp.office365.com"),
];

/// Where a provider accepts submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    /// SMTP host name.
    pub host: String,
    /// SMTP port.
    pub port: u16,
}

/// Read-only map from provider identifier to SMTP endpoint.
///
/// Built once and shared by every session, typically behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistry {
    endpoints: BTreeMap<ProviderId, ProviderEndpoint>,
}

impl ProviderRegistry {
    /// Creates a registry from `(provider, host)` pairs.
    pub fn new<I, P, H>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, H)>,
        P: Into<ProviderId>,
        H: Into<String>,
    {
        let endpoints = entries
            .into_iter()
            .map(|(provider, host)| {
                (
                    provider.into(),
                    ProviderEndpoint {
                        host: host.into(),
                        port: SUBMISSION_PORT,
                    },
                )
            })
            .collect();
        Self { endpoints }
    }

    /// Registry of the built-in providers: `gmail`, `hotmail` and `office365`.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_PROVIDERS.iter().copied())
    }

    /// Built-in providers overlaid with the hosts configured in `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::builtin();
        for (provider, host) in &settings.providers {
            registry.endpoints.insert(
                ProviderId::from(provider.as_str()),
                ProviderEndpoint {
                    host: host.clone(),
                    port: SUBMISSION_PORT,
                },
            );
        }
        registry
    }

    /// Resolves a provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProvider`] if `provider` has no entry.
    pub fn resolve(&self, provider: &ProviderId) -> Result<&ProviderEndpoint> {
        self.endpoints
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))
    }

    /// Iterates over known provider identifiers in sorted order.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.endpoints.keys()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_providers_resolve_to_submission_port() {
        let registry = ProviderRegistry::builtin();

        let gmail = registry.resolve(&ProviderId::from("gmail")).unwrap();
        assert_eq!(gmail.host, "smtp.gmail.com");
        assert_eq!(gmail.port, 587);

        let office = registry.resolve(&ProviderId::from("office365")).unwrap();
        assert_eq!(office.host, "smtp.office365.com");

        let names: Vec<_> = registry.providers().map(ProviderId::as_str).collect();
        assert_eq!(names, vec!["gmail", "hotmail", "office365"]);
    }

    #[test]
    fn unknown_provider_is_reported_by_name() {
        let registry = ProviderRegistry::builtin();
        let err = registry.resolve(&ProviderId::from("aol")).unwrap_err();

        assert!(matches!(err, Error::UnknownProvider(ref name) if name == "aol"));
        assert_eq!(err.to_string(), "unknown provider: aol");
    }

    #[test]
    fn settings_override_and_extend_builtins() {
        let mut settings = Settings::default();
        settings
            .providers
            .insert("gmail".to_string(), "relay.internal".to_string());
        settings
            .providers
            .insert("fastmail".to_string(), "smtp.fastmail.com".to_string());

        let registry = ProviderRegistry::from_settings(&settings);

        assert_eq!(
            registry.resolve(&"gmail".into()).unwrap().host,
            "relay.internal"
        );
        assert_eq!(
            registry.resolve(&"fastmail".into()).unwrap(),
            &ProviderEndpoint {
                host: "smtp.fastmail.com".to_string(),
                port: SUBMISSION_PORT,
            }
        );
        assert!(registry.resolve(&"hotmail".into()).is_ok());
    }

    #[test]
    fn explicit_entries_only() {
        let registry = ProviderRegistry::new([("local", "127.0.0.1")]);
        assert!(registry.resolve(&"local".into()).is_ok());
        assert!(registry.resolve(&"gmail".into()).is_err());
    }
}
