//! # Secure DNS Config
//!
//! A configuration and transport layer for encrypted DNS, supporting
//! DNS-over-HTTPS (DoH, RFC 8484) and DNS-over-TLS (DoT, RFC 7858).
//!
//! The crate keeps a compiled-in catalog of well-known DoH/DoT provider
//! profiles, validates profiles (catalog or user-supplied), owns the
//! encrypted sessions to the selected provider, and exposes a swappable,
//! resettable resolution policy through [`DnsConfigurator`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use secure_dns_config::{DnsConfigurator, DohProvider, ProviderProfile, RecordType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let configurator = DnsConfigurator::new();
//!
//!     // Route DNS through Cloudflare DoH.
//!     configurator.apply(ProviderProfile::from_doh(DohProvider::Cloudflare)).await?;
//!
//!     let response = configurator.query("example.com", RecordType::A).await?;
//!     println!("answers: {:?}", response.answers);
//!
//!     // Back to the system default.
//!     configurator.reset().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom profiles
//!
//! The catalog is a closed set, but deployments add resolvers without a
//! rebuild by building a [`ProviderProfile`] directly (or deserializing one
//! from configuration) and passing it to [`DnsConfigurator::apply`], which
//! validates it first.

mod codec;
mod doh;
mod dot;
mod policy;
mod providers;
mod session;
mod validate;

pub use codec::{DnsMessage, Name, Question, RData, ResourceRecord};
pub use policy::{
    default_configurator, DnsConfigurator, PolicyPhase, PolicyStatus, PrivacyContext,
    ResolutionPolicy,
};
pub use providers::{lookup, DohProvider, DotProvider, ProviderProfile};
pub use session::{DohMethod, SessionOptions, SessionState};
pub use validate::validate;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Encrypted DNS transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// DNS-over-HTTPS (RFC 8484)
    Doh,
    /// DNS-over-TLS (RFC 7858)
    Dot,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Doh => write!(f, "DoH"),
            TransportKind::Dot => write!(f, "DoT"),
        }
    }
}

/// DNS record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    MX,
    TXT,
    NS,
    PTR,
    HTTPS,
    SVCB,
}

impl RecordType {
    /// Convert record type to DNS type code
    pub fn to_type_code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::AAAA => 28,
            RecordType::CNAME => 5,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::NS => 2,
            RecordType::PTR => 12,
            RecordType::HTTPS => 65,
            RecordType::SVCB => 64,
        }
    }

    /// Convert DNS type code to record type name
    pub fn from_code(code: u16) -> &'static str {
        match code {
            1 => "A",
            28 => "AAAA",
            5 => "CNAME",
            15 => "MX",
            16 => "TXT",
            2 => "NS",
            12 => "PTR",
            65 => "HTTPS",
            64 => "SVCB",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", RecordType::from_code(self.to_type_code()))
    }
}

/// Error types for catalog lookup, validation, and DNS transport
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid profile: {0}")]
    ValidationFailed(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Malformed DNS message: {0}")]
    MalformedMessage(String),

    #[error("Session replaced by a policy change")]
    SessionReplaced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_codes() {
        assert_eq!(RecordType::A.to_type_code(), 1);
        assert_eq!(RecordType::AAAA.to_type_code(), 28);
        assert_eq!(RecordType::HTTPS.to_type_code(), 65);
    }

    #[test]
    fn test_record_type_from_code() {
        assert_eq!(RecordType::from_code(1), "A");
        assert_eq!(RecordType::from_code(12), "PTR");
        assert_eq!(RecordType::from_code(999), "UNKNOWN");
    }

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Doh.to_string(), "DoH");
        assert_eq!(TransportKind::Dot.to_string(), "DoT");
    }
}
