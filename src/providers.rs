//! Compiled-in catalog of well-known encrypted DNS providers.
//!
//! The catalog mirrors the operator set of the original configurator: 26
//! DNS-over-HTTPS operators and 22 DNS-over-TLS operators. Entries are opaque
//! data (hostname, bootstrap addresses, port, HTTP path) — there is no logic
//! here beyond a key lookup. Custom resolvers are supported by constructing a
//! [`ProviderProfile`] directly; [`crate::validate`] is the gatekeeper for
//! those.

use crate::{DnsError, TransportKind};
use serde::{Deserialize, Serialize};

/// DNS-over-HTTPS provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DohProvider {
    AdGuard,
    Cisco,
    Cira,
    CleanBrowsing,
    Cloudflare,
    Cloudflare64,
    ControlD,
    DigitaleGesellschaft,
    DnsForge,
    Dnslify,
    FoundationForAppliedPrivacy,
    Google,
    Google64,
    Hostux,
    LibreDns,
    MozillaCloudflare,
    MozillaNextDns,
    Mullvad,
    OpenDns,
    Quad9,
    Snopyta,
    Switch,
    Tiarap,
    UsablePrivacy,
    WeDns,
    Xfinity,
}

impl DohProvider {
    /// Returns a list of all DoH providers in the catalog
    pub fn all() -> Vec<DohProvider> {
        use DohProvider::*;
        vec![
            AdGuard,
            Cisco,
            Cira,
            CleanBrowsing,
            Cloudflare,
            Cloudflare64,
            ControlD,
            DigitaleGesellschaft,
            DnsForge,
            Dnslify,
            FoundationForAppliedPrivacy,
            Google,
            Google64,
            Hostux,
            LibreDns,
            MozillaCloudflare,
            MozillaNextDns,
            Mullvad,
            OpenDns,
            Quad9,
            Snopyta,
            Switch,
            Tiarap,
            UsablePrivacy,
            WeDns,
            Xfinity,
        ]
    }

    /// Stable catalog key, as used by [`lookup`]
    pub fn key(&self) -> &'static str {
        use DohProvider::*;
        match self {
            AdGuard => "adguard",
            Cisco => "cisco",
            Cira => "cira",
            CleanBrowsing => "cleanbrowsing",
            Cloudflare => "cloudflare",
            Cloudflare64 => "cloudflare64",
            ControlD => "controld",
            DigitaleGesellschaft => "digitale-gesellschaft",
            DnsForge => "dnsforge",
            Dnslify => "dnslify",
            FoundationForAppliedPrivacy => "applied-privacy",
            Google => "google",
            Google64 => "google64",
            Hostux => "hostux",
            LibreDns => "libredns",
            MozillaCloudflare => "mozilla-cloudflare",
            MozillaNextDns => "mozilla-nextdns",
            Mullvad => "mullvad",
            OpenDns => "opendns",
            Quad9 => "quad9",
            Snopyta => "snopyta",
            Switch => "switch",
            Tiarap => "tiarap",
            UsablePrivacy => "usableprivacy",
            WeDns => "wedns",
            Xfinity => "xfinity",
        }
    }
}

/// DNS-over-TLS provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DotProvider {
    AdGuard,
    Cira,
    CleanBrowsing,
    Cloudflare,
    Cloudflare64,
    ControlD,
    DigitaleGesellschaft,
    DnsForge,
    Dnslify,
    FoundationForAppliedPrivacy,
    Google,
    Google64,
    Hostux,
    LibreDns,
    Mullvad,
    Quad9,
    Snopyta,
    Switch,
    Tiarap,
    UsablePrivacy,
    WeDns,
    Xfinity,
}

impl DotProvider {
    /// Returns a list of all DoT providers in the catalog
    pub fn all() -> Vec<DotProvider> {
        use DotProvider::*;
        vec![
            AdGuard,
            Cira,
            CleanBrowsing,
            Cloudflare,
            Cloudflare64,
            ControlD,
            DigitaleGesellschaft,
            DnsForge,
            Dnslify,
            FoundationForAppliedPrivacy,
            Google,
            Google64,
            Hostux,
            LibreDns,
            Mullvad,
            Quad9,
            Snopyta,
            Switch,
            Tiarap,
            UsablePrivacy,
            WeDns,
            Xfinity,
        ]
    }

    /// Stable catalog key, as used by [`lookup`]
    pub fn key(&self) -> &'static str {
        use DotProvider::*;
        match self {
            AdGuard => "adguard",
            Cira => "cira",
            CleanBrowsing => "cleanbrowsing",
            Cloudflare => "cloudflare",
            Cloudflare64 => "cloudflare64",
            ControlD => "controld",
            DigitaleGesellschaft => "digitale-gesellschaft",
            DnsForge => "dnsforge",
            Dnslify => "dnslify",
            FoundationForAppliedPrivacy => "applied-privacy",
            Google => "google",
            Google64 => "google64",
            Hostux => "hostux",
            LibreDns => "libredns",
            Mullvad => "mullvad",
            Quad9 => "quad9",
            Snopyta => "snopyta",
            Switch => "switch",
            Tiarap => "tiarap",
            UsablePrivacy => "usableprivacy",
            WeDns => "wedns",
            Xfinity => "xfinity",
        }
    }
}

/// Connection parameters for one resolver endpoint.
///
/// Catalog entries come from [`ProviderProfile::from_doh`] /
/// [`ProviderProfile::from_dot`]; custom resolvers are built directly (or
/// deserialized from configuration) and checked with [`crate::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Human-readable identifier ("cloudflare", "my-resolver", ...)
    pub name: String,
    pub transport_kind: TransportKind,
    /// Hostname the TLS certificate is verified against
    pub hostname: String,
    /// IP literals used to reach `hostname` without a prior DNS lookup,
    /// tried in order
    pub bootstrap_addresses: Vec<String>,
    pub port: u16,
    /// HTTP path of the DoH endpoint; must be `None` for DoT
    pub path: Option<String>,
}

impl ProviderProfile {
    fn doh(name: &str, hostname: &str, addrs: &[&str], path: &str) -> Self {
        ProviderProfile {
            name: name.to_string(),
            transport_kind: TransportKind::Doh,
            hostname: hostname.to_string(),
            bootstrap_addresses: addrs.iter().map(|a| a.to_string()).collect(),
            port: 443,
            path: Some(path.to_string()),
        }
    }

    fn dot(name: &str, hostname: &str, addrs: &[&str]) -> Self {
        ProviderProfile {
            name: name.to_string(),
            transport_kind: TransportKind::Dot,
            hostname: hostname.to_string(),
            bootstrap_addresses: addrs.iter().map(|a| a.to_string()).collect(),
            port: 853,
            path: None,
        }
    }

    /// Catalog entry for a DoH provider
    pub fn from_doh(provider: DohProvider) -> Self {
        let key = provider.key();
        match provider {
            DohProvider::AdGuard => {
                Self::doh(key, "dns.adguard.com", &["94.140.14.14", "94.140.15.15"], "/dns-query")
            }
            DohProvider::Cisco => {
                Self::doh(key, "doh.umbrella.com", &["146.112.41.2", "146.112.41.3"], "/dns-query")
            }
            DohProvider::Cira => Self::doh(
                key,
                "private.canadianshield.cira.ca",
                &["149.112.121.10", "149.112.122.10"],
                "/dns-query",
            ),
            DohProvider::CleanBrowsing => Self::doh(
                key,
                "doh.cleanbrowsing.org",
                &["185.228.168.9", "185.228.169.9"],
                "/doh/security-filter/",
            ),
            DohProvider::Cloudflare => Self::doh(
                key,
                "cloudflare-dns.com",
                &["1.1.1.1", "1.0.0.1", "2606:4700:4700::1111", "2606:4700:4700::1001"],
                "/dns-query",
            ),
            DohProvider::Cloudflare64 => Self::doh(
                key,
                "dns64.cloudflare-dns.com",
                &["2606:4700:4700::64", "2606:4700:4700::6400"],
                "/dns-query",
            ),
            DohProvider::ControlD => {
                Self::doh(key, "freedns.controld.com", &["76.76.2.0", "76.76.10.0"], "/p0")
            }
            DohProvider::DigitaleGesellschaft => Self::doh(
                key,
                "dns.digitale-gesellschaft.ch",
                &["185.95.218.42", "185.95.218.43"],
                "/dns-query",
            ),
            DohProvider::DnsForge => {
                Self::doh(key, "dnsforge.de", &["176.9.93.198", "176.9.147.37"], "/dns-query")
            }
            DohProvider::Dnslify => {
                Self::doh(key, "doh.dnslify.com", &["185.235.81.1", "185.235.81.2"], "/dns-query")
            }
            DohProvider::FoundationForAppliedPrivacy => {
                Self::doh(key, "doh.applied-privacy.net", &["146.255.56.98"], "/query")
            }
            DohProvider::Google => {
                Self::doh(key, "dns.google", &["8.8.8.8", "8.8.4.4"], "/dns-query")
            }
            DohProvider::Google64 => Self::doh(
                key,
                "dns64.dns.google",
                &["2001:4860:4860::6464", "2001:4860:4860::64"],
                "/dns-query",
            ),
            DohProvider::Hostux => {
                Self::doh(key, "dns.hostux.net", &["185.26.126.37"], "/dns-query")
            }
            DohProvider::LibreDns => {
                Self::doh(key, "doh.libredns.gr", &["116.202.176.26"], "/dns-query")
            }
            DohProvider::MozillaCloudflare => Self::doh(
                key,
                "mozilla.cloudflare-dns.com",
                &["1.1.1.1", "1.0.0.1"],
                "/dns-query",
            ),
            DohProvider::MozillaNextDns => Self::doh(
                key,
                "firefox.dns.nextdns.io",
                &["45.90.28.0", "45.90.30.0"],
                "/dns-query",
            ),
            DohProvider::Mullvad => {
                Self::doh(key, "doh.mullvad.net", &["194.242.2.2"], "/dns-query")
            }
            DohProvider::OpenDns => Self::doh(
                key,
                "doh.opendns.com",
                &["208.67.222.222", "208.67.220.220"],
                "/dns-query",
            ),
            DohProvider::Quad9 => Self::doh(
                key,
                "dns.quad9.net",
                &["9.9.9.9", "149.112.112.112"],
                "/dns-query",
            ),
            DohProvider::Snopyta => {
                Self::doh(key, "fi.doh.dns.snopyta.org", &["95.216.24.230"], "/dns-query")
            }
            DohProvider::Switch => Self::doh(
                key,
                "dns.switch.ch",
                &["130.59.31.248", "130.59.31.251"],
                "/dns-query",
            ),
            DohProvider::Tiarap => {
                Self::doh(key, "doh.tiar.app", &["174.138.29.175"], "/dns-query")
            }
            DohProvider::UsablePrivacy => {
                Self::doh(key, "adfree.usableprivacy.net", &["185.183.104.33"], "/dns-query")
            }
            DohProvider::WeDns => {
                Self::doh(key, "dns.wevpn.com", &["45.87.212.37"], "/dns-query")
            }
            DohProvider::Xfinity => {
                Self::doh(key, "doh.xfinity.com", &["96.113.151.145"], "/dns-query")
            }
        }
    }

    /// Catalog entry for a DoT provider
    pub fn from_dot(provider: DotProvider) -> Self {
        let key = provider.key();
        match provider {
            DotProvider::AdGuard => {
                Self::dot(key, "dns.adguard.com", &["94.140.14.14", "94.140.15.15"])
            }
            DotProvider::Cira => Self::dot(
                key,
                "private.canadianshield.cira.ca",
                &["149.112.121.10", "149.112.122.10"],
            ),
            DotProvider::CleanBrowsing => Self::dot(
                key,
                "security-filter-dns.cleanbrowsing.org",
                &["185.228.168.9", "185.228.169.9"],
            ),
            DotProvider::Cloudflare => Self::dot(
                key,
                "cloudflare-dns.com",
                &["1.1.1.1", "1.0.0.1", "2606:4700:4700::1111", "2606:4700:4700::1001"],
            ),
            DotProvider::Cloudflare64 => Self::dot(
                key,
                "dns64.cloudflare-dns.com",
                &["2606:4700:4700::64", "2606:4700:4700::6400"],
            ),
            DotProvider::ControlD => {
                Self::dot(key, "p0.freedns.controld.com", &["76.76.2.0", "76.76.10.0"])
            }
            DotProvider::DigitaleGesellschaft => Self::dot(
                key,
                "dns.digitale-gesellschaft.ch",
                &["185.95.218.42", "185.95.218.43"],
            ),
            DotProvider::DnsForge => {
                Self::dot(key, "dnsforge.de", &["176.9.93.198", "176.9.147.37"])
            }
            DotProvider::Dnslify => {
                Self::dot(key, "dot.dnslify.com", &["185.235.81.1", "185.235.81.2"])
            }
            DotProvider::FoundationForAppliedPrivacy => {
                Self::dot(key, "dot1.applied-privacy.net", &["146.255.56.98"])
            }
            DotProvider::Google => Self::dot(key, "dns.google", &["8.8.8.8", "8.8.4.4"]),
            DotProvider::Google64 => Self::dot(
                key,
                "dns64.dns.google",
                &["2001:4860:4860::6464", "2001:4860:4860::64"],
            ),
            DotProvider::Hostux => Self::dot(key, "dns.hostux.net", &["185.26.126.37"]),
            DotProvider::LibreDns => Self::dot(key, "dot.libredns.gr", &["116.202.176.26"]),
            DotProvider::Mullvad => Self::dot(key, "dot.mullvad.net", &["194.242.2.2"]),
            DotProvider::Quad9 => {
                Self::dot(key, "dns.quad9.net", &["9.9.9.9", "149.112.112.112"])
            }
            DotProvider::Snopyta => Self::dot(key, "fi.dot.dns.snopyta.org", &["95.216.24.230"]),
            DotProvider::Switch => {
                Self::dot(key, "dns.switch.ch", &["130.59.31.248", "130.59.31.251"])
            }
            DotProvider::Tiarap => Self::dot(key, "dot.tiar.app", &["174.138.29.175"]),
            DotProvider::UsablePrivacy => {
                Self::dot(key, "adfree.usableprivacy.net", &["185.183.104.33"])
            }
            DotProvider::WeDns => Self::dot(key, "dot.wevpn.com", &["45.87.212.37"]),
            DotProvider::Xfinity => Self::dot(key, "dot.xfinity.com", &["96.113.151.145"]),
        }
    }
}

/// Look up a catalog entry by string id.
///
/// The id is `"<transport>:<key>"`, e.g. `"doh:cloudflare"` or `"dot:quad9"`.
/// Fails with [`DnsError::UnknownProvider`] when the id names no catalog
/// entry.
pub fn lookup(id: &str) -> Result<ProviderProfile, DnsError> {
    let (kind, key) = id
        .split_once(':')
        .ok_or_else(|| DnsError::UnknownProvider(id.to_string()))?;
    match kind {
        "doh" => DohProvider::all()
            .into_iter()
            .find(|p| p.key() == key)
            .map(ProviderProfile::from_doh)
            .ok_or_else(|| DnsError::UnknownProvider(id.to_string())),
        "dot" => DotProvider::all()
            .into_iter()
            .find(|p| p.key() == key)
            .map(ProviderProfile::from_dot)
            .ok_or_else(|| DnsError::UnknownProvider(id.to_string())),
        _ => Err(DnsError::UnknownProvider(id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_sizes() {
        assert_eq!(DohProvider::all().len(), 26);
        assert_eq!(DotProvider::all().len(), 22);
    }

    #[test]
    fn test_lookup_known_ids() {
        let profile = lookup("doh:cloudflare").unwrap();
        assert_eq!(profile.transport_kind, TransportKind::Doh);
        assert_eq!(profile.hostname, "cloudflare-dns.com");
        assert_eq!(profile.port, 443);
        assert_eq!(profile.path.as_deref(), Some("/dns-query"));

        let profile = lookup("dot:quad9").unwrap();
        assert_eq!(profile.transport_kind, TransportKind::Dot);
        assert_eq!(profile.hostname, "dns.quad9.net");
        assert_eq!(profile.port, 853);
        assert!(profile.path.is_none());
    }

    #[test]
    fn test_lookup_unknown_id() {
        assert!(matches!(
            lookup("doh:nonexistent"),
            Err(DnsError::UnknownProvider(_))
        ));
        assert!(matches!(lookup("udp:google"), Err(DnsError::UnknownProvider(_))));
        assert!(matches!(lookup("cloudflare"), Err(DnsError::UnknownProvider(_))));
    }

    #[test]
    fn test_every_key_resolves_through_lookup() {
        for provider in DohProvider::all() {
            let id = format!("doh:{}", provider.key());
            assert_eq!(lookup(&id).unwrap(), ProviderProfile::from_doh(provider));
        }
        for provider in DotProvider::all() {
            let id = format!("dot:{}", provider.key());
            assert_eq!(lookup(&id).unwrap(), ProviderProfile::from_dot(provider));
        }
    }

    #[test]
    fn test_profile_serde_round_trip() {
        let profile = ProviderProfile::from_doh(DohProvider::Google);
        let json = serde_json::to_string(&profile).unwrap();
        let back: ProviderProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(profile, back);
    }
}
