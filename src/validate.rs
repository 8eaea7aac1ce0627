//! Structural validation of provider profiles.
//!
//! Catalog entries are trusted data, but custom profiles arrive from
//! configuration files or callers and get the same checks before a session
//! is ever attempted.

use crate::{DnsError, ProviderProfile, TransportKind};
use std::net::IpAddr;

/// Check a profile for structural validity.
///
/// Rules:
/// - hostname non-empty, no embedded whitespace
/// - at least one bootstrap address, each a valid IPv4 or IPv6 literal
/// - port nonzero
/// - DoH profiles carry a path starting with `/`; DoT profiles carry none
pub fn validate(profile: &ProviderProfile) -> Result<(), DnsError> {
    if profile.hostname.is_empty() {
        return Err(DnsError::ValidationFailed("hostname is empty".to_string()));
    }
    if profile.hostname.chars().any(|c| c.is_whitespace()) {
        return Err(DnsError::ValidationFailed(format!(
            "hostname '{}' contains whitespace",
            profile.hostname
        )));
    }
    if profile.bootstrap_addresses.is_empty() {
        return Err(DnsError::ValidationFailed(
            "bootstrap address list is empty".to_string(),
        ));
    }
    for addr in &profile.bootstrap_addresses {
        if addr.parse::<IpAddr>().is_err() {
            return Err(DnsError::ValidationFailed(format!(
                "'{}' is not a valid IP literal",
                addr
            )));
        }
    }
    if profile.port == 0 {
        return Err(DnsError::ValidationFailed("port must be nonzero".to_string()));
    }
    match (profile.transport_kind, &profile.path) {
        (TransportKind::Doh, Some(path)) if path.starts_with('/') => Ok(()),
        (TransportKind::Doh, Some(path)) => Err(DnsError::ValidationFailed(format!(
            "DoH path '{}' must start with '/'",
            path
        ))),
        (TransportKind::Doh, None) => Err(DnsError::ValidationFailed(
            "DoH profile is missing a path".to_string(),
        )),
        (TransportKind::Dot, None) => Ok(()),
        (TransportKind::Dot, Some(_)) => Err(DnsError::ValidationFailed(
            "DoT profile must not carry a path".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DohProvider, DotProvider};

    fn custom_doh() -> ProviderProfile {
        ProviderProfile {
            name: "custom".to_string(),
            transport_kind: TransportKind::Doh,
            hostname: "resolver.example.net".to_string(),
            bootstrap_addresses: vec!["192.0.2.1".to_string(), "2001:db8::1".to_string()],
            port: 443,
            path: Some("/dns-query".to_string()),
        }
    }

    #[test]
    fn test_whole_catalog_validates() {
        for provider in DohProvider::all() {
            let profile = ProviderProfile::from_doh(provider);
            assert!(validate(&profile).is_ok(), "bad catalog entry: {:?}", provider);
        }
        for provider in DotProvider::all() {
            let profile = ProviderProfile::from_dot(provider);
            assert!(validate(&profile).is_ok(), "bad catalog entry: {:?}", provider);
        }
    }

    #[test]
    fn test_custom_profile_ok() {
        assert!(validate(&custom_doh()).is_ok());
    }

    #[test]
    fn test_empty_hostname_rejected() {
        let mut profile = custom_doh();
        profile.hostname.clear();
        assert!(matches!(validate(&profile), Err(DnsError::ValidationFailed(_))));
    }

    #[test]
    fn test_empty_bootstrap_rejected() {
        let mut profile = custom_doh();
        profile.bootstrap_addresses.clear();
        assert!(matches!(validate(&profile), Err(DnsError::ValidationFailed(_))));
    }

    #[test]
    fn test_bad_ip_literal_rejected() {
        let mut profile = custom_doh();
        profile.bootstrap_addresses.push("not-an-ip".to_string());
        assert!(matches!(validate(&profile), Err(DnsError::ValidationFailed(_))));
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut profile = custom_doh();
        profile.port = 0;
        assert!(matches!(validate(&profile), Err(DnsError::ValidationFailed(_))));
    }

    #[test]
    fn test_doh_path_rules() {
        let mut profile = custom_doh();
        profile.path = Some("dns-query".to_string());
        assert!(matches!(validate(&profile), Err(DnsError::ValidationFailed(_))));

        profile.path = None;
        assert!(matches!(validate(&profile), Err(DnsError::ValidationFailed(_))));
    }

    #[test]
    fn test_dot_with_path_rejected() {
        let mut profile = custom_doh();
        profile.transport_kind = TransportKind::Dot;
        assert!(matches!(validate(&profile), Err(DnsError::ValidationFailed(_))));
    }
}
