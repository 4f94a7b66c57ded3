//! Registry credentials and the bearer-token challenge.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::config::RegistrySettings;

/// Username and password for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Source of registry credentials, looked up per host.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, registry: &str) -> Option<Credentials>;
}

/// Reads credentials from the environment variables configured per host.
///
/// Variables are read on every lookup so rotated secrets are picked up.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    vars: HashMap<String, (String, String)>,
}

impl EnvCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, host: &str, username_env: &str, password_env: &str) -> Self {
        self.vars
            .insert(host.to_string(), (username_env.to_string(), password_env.to_string()));
        self
    }
}

impl From<&RegistrySettings> for EnvCredentials {
    fn from(settings: &RegistrySettings) -> Self {
        [&settings.docker, &settings.staging, &settings.prime]
            .into_iter()
            .fold(Self::new(), |creds, endpoint| {
                match (&endpoint.username_env, &endpoint.password_env) {
                    (Some(user), Some(pass)) => creds.with_registry(&endpoint.host, user, pass),
                    _ => creds,
                }
            })
    }
}

impl CredentialProvider for EnvCredentials {
    fn credentials(&self, registry: &str) -> Option<Credentials> {
        let (user_var, pass_var) = self.vars.get(registry)?;
        let username = std::env::var(user_var).ok().filter(|v| !v.is_empty())?;
        let password = std::env::var(pass_var).ok().filter(|v| !v.is_empty())?;
        Some(Credentials { username, password })
    }
}

/// A parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

fn param_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"([A-Za-z_]+)="([^"]*)""#).expect("static challenge pattern"))
}

impl Challenge {
    pub(crate) fn parse(header: &str) -> Option<Self> {
        let (scheme, rest) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let params: BTreeMap<String, String> = param_pattern()
            .captures_iter(rest)
            .map(|c| (c[1].to_ascii_lowercase(), c[2].to_string()))
            .collect();
        Some(Challenge::Bearer {
            realm: params.get("realm")?.clone(),
            service: params.get("service").cloned(),
            scope: params.get("scope").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:rancher/fleet:pull""#;
        assert_eq!(
            Challenge::parse(header),
            Some(Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
                scope: Some("repository:rancher/fleet:pull".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_basic_and_unknown() {
        assert_eq!(Challenge::parse(r#"Basic realm="registry""#), Some(Challenge::Basic));
        assert_eq!(Challenge::parse("Negotiate"), None);
        assert_eq!(Challenge::parse("Bearer service=\"x\""), None);
    }

    #[test]
    fn test_env_credentials() {
        let creds = EnvCredentials::new().with_registry(
            "registry.example.com",
            "CHART_KEEPER_TEST_USER",
            "CHART_KEEPER_TEST_PASS",
        );
        std::env::set_var("CHART_KEEPER_TEST_USER", "robot");
        std::env::set_var("CHART_KEEPER_TEST_PASS", "s3cret");

        let found = creds.credentials("registry.example.com").unwrap();
        assert_eq!(found.username, "robot");
        assert!(!format!("{:?}", found).contains("s3cret"));
        assert!(creds.credentials("other.example.com").is_none());
    }
}
