//! Transport session lifecycle.
//!
//! A [`Session`] owns the single encrypted channel to the active provider —
//! DoH or DoT behind one interface — and tracks its lifecycle state. Sessions
//! are created by the policy controller when a profile is applied and
//! destroyed on reset, on profile change, or on unrecoverable transport
//! failure. Nothing outside this module touches the underlying connection.

use crate::doh::DohSession;
use crate::dot::DotSession;
use crate::{DnsError, DnsMessage, ProviderProfile, TransportKind};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Lifecycle state of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Established,
    Failed,
}

/// HTTP method used for DoH exchanges (RFC 8484 defines both)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DohMethod {
    /// POST with the wire-format query as the body
    Post,
    /// GET with the query base64url-encoded in the `dns` parameter
    Get,
}

/// Tunables shared by both transports
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Budget for TCP connect plus TLS handshake, per bootstrap address
    pub connect_timeout: Duration,
    /// Budget for a full query round-trip, reconnect included
    pub query_timeout: Duration,
    pub doh_method: DohMethod,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(5),
            doh_method: DohMethod::Post,
        }
    }
}

enum Transport {
    Doh(DohSession),
    Dot(DotSession),
}

pub(crate) struct Session {
    profile: ProviderProfile,
    state: Mutex<SessionState>,
    transport: Transport,
}

impl Session {
    pub(crate) fn new(profile: ProviderProfile, options: SessionOptions) -> Self {
        let transport = match profile.transport_kind {
            TransportKind::Doh => Transport::Doh(DohSession::new(profile.clone(), options)),
            TransportKind::Dot => Transport::Dot(DotSession::new(profile.clone(), options)),
        };
        Self {
            profile,
            state: Mutex::new(SessionState::Idle),
            transport,
        }
    }

    pub(crate) fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub(crate) async fn connect(&self) -> Result<(), DnsError> {
        self.set_state(SessionState::Connecting);
        let result = match &self.transport {
            Transport::Doh(doh) => doh.connect().await,
            Transport::Dot(dot) => dot.connect().await,
        };
        match &result {
            Ok(()) => {
                debug!(
                    provider = %self.profile.name,
                    transport = %self.profile.transport_kind,
                    "session established"
                );
                self.set_state(SessionState::Established);
            }
            Err(error) => {
                debug!(
                    provider = %self.profile.name,
                    %error,
                    "session establishment failed"
                );
                self.set_state(SessionState::Failed);
            }
        }
        result
    }

    /// Exchange one DNS message over the established channel.
    ///
    /// The message is sent with a freshly assigned transaction id; the
    /// returned response carries that id. Fails immediately with
    /// [`DnsError::TransportUnavailable`] unless the session is Established.
    pub(crate) async fn send_query(&self, message: DnsMessage) -> Result<DnsMessage, DnsError> {
        match self.state() {
            SessionState::Established => {}
            state => {
                return Err(DnsError::TransportUnavailable(format!(
                    "session is {:?}",
                    state
                )))
            }
        }
        let result = match &self.transport {
            Transport::Doh(doh) => doh.send_query(message).await,
            Transport::Dot(dot) => dot.send_query(message).await,
        };
        if let Err(DnsError::TransportUnavailable(_)) = &result {
            // Reconnect was already attempted and exhausted inside the
            // transport.
            self.set_state(SessionState::Failed);
        }
        result
    }

    pub(crate) async fn close(&self) {
        match &self.transport {
            Transport::Doh(doh) => doh.close().await,
            Transport::Dot(dot) => dot.close().await,
        }
        self.set_state(SessionState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{DohProvider, DotProvider};
    use crate::{Name, RecordType};

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new(
            ProviderProfile::from_doh(DohProvider::Cloudflare),
            SessionOptions::default(),
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.profile().name, "cloudflare");
    }

    #[tokio::test]
    async fn test_query_without_establishment_fails_fast() {
        let session = Session::new(
            ProviderProfile::from_dot(DotProvider::Quad9),
            SessionOptions::default(),
        );
        let query = DnsMessage::new_query(Name::from_ascii("example.com").unwrap(), RecordType::A);
        let started = std::time::Instant::now();
        assert!(matches!(
            session.send_query(query).await,
            Err(DnsError::TransportUnavailable(_))
        ));
        assert!(started.elapsed() < SessionOptions::default().query_timeout);
    }

    #[tokio::test]
    async fn test_failed_connect_marks_session_failed() {
        let profile = ProviderProfile {
            name: "unreachable".to_string(),
            transport_kind: TransportKind::Dot,
            hostname: "dot.invalid".to_string(),
            bootstrap_addresses: vec!["127.0.0.1".to_string()],
            port: 1,
            path: None,
        };
        let session = Session::new(profile, SessionOptions::default());
        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_queries() {
        let session = Session::new(
            ProviderProfile::from_doh(DohProvider::Google),
            SessionOptions::default(),
        );
        session.close().await;
        let query = DnsMessage::new_query(Name::from_ascii("example.com").unwrap(), RecordType::A);
        assert!(matches!(
            session.send_query(query).await,
            Err(DnsError::TransportUnavailable(_))
        ));
    }
}
