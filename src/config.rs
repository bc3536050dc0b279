use std::fmt;

use crate::Error;

/// Base URL of the Microsoft identity platform.
pub const DEFAULT_AUTHORITY_BASE: &str = "https://login.microsoftonline.com";

/// Reserved authority values that accept tokens from any tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiTenantMarker {
    Common,
    Consumers,
    Organizations,
}

impl MultiTenantMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Consumers => "consumers",
            Self::Organizations => "organizations",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "common" => Some(Self::Common),
            "consumers" => Some(Self::Consumers),
            "organizations" => Some(Self::Organizations),
            _ => None,
        }
    }

    /// Key-set paths to consult, primary first.
    ///
    /// A marker alone does not reach every account type, so a second
    /// endpoint covering the remaining accounts is always registered.
    fn key_set_tenants(&self) -> [&'static str; 2] {
        match self {
            Self::Common => ["common", "consumers"],
            Self::Organizations => ["organizations", "consumers"],
            Self::Consumers => ["consumers", "common"],
        }
    }
}

/// The identity authority tokens must come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authority {
    /// A single tenant, by id or domain.
    Tenant(String),
    MultiTenant(MultiTenantMarker),
}

impl Authority {
    /// Parses a tenant id, a reserved marker, or a full authority URL under `base`.
    pub fn parse(value: &str, base: &str) -> Self {
        let tenant = normalize_authority(value, base);
        match MultiTenantMarker::parse(&tenant) {
            Some(marker) => Self::MultiTenant(marker),
            None => Self::Tenant(tenant),
        }
    }

    pub fn is_multi_tenant(&self) -> bool {
        matches!(self, Self::MultiTenant(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Tenant(tenant) => tenant,
            Self::MultiTenant(marker) => marker.as_str(),
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduces `https://login.microsoftonline.com/<tenant>/...` to `<tenant>`.
fn normalize_authority(value: &str, base: &str) -> String {
    let value = value.trim();
    let prefix = format!("{}/", base.trim_end_matches('/'));
    match value.strip_prefix(&prefix) {
        Some(rest) => rest
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string(),
        None => value.to_string(),
    }
}

/// Splits a comma-separated audience list, trimming items and dropping blanks and repeats.
fn parse_audiences(value: &str) -> Vec<String> {
    let mut audiences: Vec<String> = Vec::new();
    for audience in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !audiences.iter().any(|a| a == audience) {
            audiences.push(audience.to_string());
        }
    }
    audiences
}

fn env_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

/// Validator settings. Read once at construction and never re-read.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    authority: Authority,
    authority_base: String,
    expected_audiences: Vec<String>,
    required_scope: String,
    require_auth: bool,
}

impl ValidatorConfig {
    /// Builds a configuration against [`DEFAULT_AUTHORITY_BASE`].
    ///
    /// `audiences` is a comma-separated list. When `require_auth` is set, the
    /// authority, at least one audience, and the scope must all be present.
    pub fn new(
        authority: &str,
        audiences: &str,
        required_scope: &str,
        require_auth: bool,
    ) -> Result<Self, Error> {
        Self::with_authority_base(
            DEFAULT_AUTHORITY_BASE,
            authority,
            audiences,
            required_scope,
            require_auth,
        )
    }

    /// Same as [`ValidatorConfig::new`] with a different identity authority base URL.
    pub fn with_authority_base(
        authority_base: &str,
        authority: &str,
        audiences: &str,
        required_scope: &str,
        require_auth: bool,
    ) -> Result<Self, Error> {
        let authority_base = authority_base.trim().trim_end_matches('/').to_string();
        let authority = Authority::parse(authority, &authority_base);
        let expected_audiences = parse_audiences(audiences);
        let required_scope = required_scope.trim().to_string();

        if require_auth {
            if authority.as_str().is_empty() {
                return Err(Error::MissingConfig("AUTH_AUTHORITY"));
            }
            if expected_audiences.is_empty() {
                return Err(Error::MissingConfig("EXPECTED_AUDIENCE"));
            }
            if required_scope.is_empty() {
                return Err(Error::MissingConfig("REQUIRED_SCOPE"));
            }
        }

        Ok(Self {
            authority,
            authority_base,
            expected_audiences,
            required_scope,
            require_auth,
        })
    }

    /// Reads `AUTH_AUTHORITY`, `EXPECTED_AUDIENCE`, `REQUIRED_SCOPE`, `REQUIRE_AUTH`
    /// and the optional `AUTH_AUTHORITY_BASE`.
    pub fn from_env() -> Result<Self, Error> {
        let var = |key: &str| std::env::var(key).unwrap_or_default();
        let base = std::env::var("AUTH_AUTHORITY_BASE")
            .unwrap_or_else(|_| DEFAULT_AUTHORITY_BASE.to_string());
        let require_auth = std::env::var("REQUIRE_AUTH")
            .map(|v| env_flag(&v))
            .unwrap_or(true);

        Self::with_authority_base(
            &base,
            &var("AUTH_AUTHORITY"),
            &var("EXPECTED_AUDIENCE"),
            &var("REQUIRED_SCOPE"),
            require_auth,
        )
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn authority_base(&self) -> &str {
        &self.authority_base
    }

    pub fn expected_audiences(&self) -> &[String] {
        &self.expected_audiences
    }

    pub fn required_scope(&self) -> &str {
        &self.required_scope
    }

    pub fn require_auth(&self) -> bool {
        self.require_auth
    }

    /// The JWKS endpoints the validator may consult, primary first.
    pub fn key_set_endpoints(&self) -> Vec<String> {
        let endpoint = |tenant: &str| {
            format!("{}/{}/discovery/v2.0/keys", self.authority_base, tenant)
        };
        match &self.authority {
            Authority::Tenant(tenant) => vec![endpoint(tenant.as_str())],
            Authority::MultiTenant(marker) => {
                marker.key_set_tenants().into_iter().map(endpoint).collect()
            }
        }
    }

    /// Issuer a single-tenant token must carry exactly.
    pub(crate) fn expected_issuer(&self) -> String {
        format!("{}/{}/v2.0", self.authority_base, self.authority)
    }
}
