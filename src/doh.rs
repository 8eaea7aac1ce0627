//! DNS-over-HTTPS transport (RFC 8484).
//!
//! Queries travel as `application/dns-message` HTTP exchanges over a
//! persistent rustls-backed client. The provider's bootstrap addresses are
//! wired into the client's resolver override, so reaching the endpoint never
//! needs a cleartext DNS lookup, while the TLS certificate is still verified
//! against the provider hostname.

use crate::codec::MAX_MESSAGE_SIZE;
use crate::session::{DohMethod, SessionOptions};
use crate::{DnsError, DnsMessage, ProviderProfile};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

pub(crate) struct DohSession {
    profile: ProviderProfile,
    options: SessionOptions,
    url: String,
    client: Mutex<Option<reqwest::Client>>,
    /// Flips to true on close; in-flight exchanges race it so a replaced
    /// session never completes a query against the old provider.
    closed: watch::Sender<bool>,
}

impl DohSession {
    pub(crate) fn new(profile: ProviderProfile, options: SessionOptions) -> Self {
        let path = profile.path.as_deref().unwrap_or("/dns-query");
        let url = format!("https://{}:{}{}", profile.hostname, profile.port, path);
        let (closed, _) = watch::channel(false);
        Self {
            profile,
            options,
            url,
            client: Mutex::new(None),
            closed,
        }
    }

    /// Build the HTTP client and prove the endpoint is reachable over TLS.
    ///
    /// Any HTTP status counts as reachable; the probe carries no DNS query,
    /// so most servers answer it with 4xx.
    pub(crate) async fn connect(&self) -> Result<(), DnsError> {
        let mut addrs: Vec<SocketAddr> = Vec::new();
        for addr in &self.profile.bootstrap_addresses {
            let ip: IpAddr = addr.parse().map_err(|_| {
                DnsError::TransportUnavailable(format!("'{}' is not a valid IP literal", addr))
            })?;
            addrs.push(SocketAddr::new(ip, self.profile.port));
        }

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .resolve_to_addrs(&self.profile.hostname, &addrs)
            .build()
            .map_err(|error| DnsError::TransportUnavailable(error.to_string()))?;

        let probe = client
            .get(&self.url)
            .timeout(self.options.connect_timeout)
            .send()
            .await;
        match probe {
            Ok(response) => {
                debug!(
                    url = %self.url,
                    status = response.status().as_u16(),
                    "DoH endpoint reachable"
                );
            }
            Err(error) => {
                return Err(DnsError::TransportUnavailable(format!(
                    "probe of {} failed: {}",
                    self.url, error
                )));
            }
        }

        // close() may have raced the probe; a closed session must not come
        // back to life.
        if *self.closed.borrow() {
            return Err(DnsError::TransportUnavailable("session closed".to_string()));
        }
        *self.client.lock().unwrap() = Some(client);
        Ok(())
    }

    pub(crate) async fn send_query(&self, mut message: DnsMessage) -> Result<DnsMessage, DnsError> {
        if *self.closed.borrow() {
            return Err(DnsError::TransportUnavailable("session closed".to_string()));
        }
        let client = self
            .client
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DnsError::TransportUnavailable("not connected".to_string()))?;

        // Correlation is per HTTP exchange: a response can only ever arrive
        // on its own request's connection/stream, so the id must match
        // within the exchange but cannot cross-wire concurrent queries.
        message.id = rand::random();
        let wire = message.encode()?;

        let mut closed = self.closed.subscribe();
        tokio::select! {
            result = self.exchange(&client, message.id, &wire) => result,
            _ = closed.wait_for(|&closed| closed) => Err(DnsError::SessionReplaced),
        }
    }

    /// One request/response exchange, with a single transparent retry when
    /// a pooled connection went stale.
    async fn exchange(
        &self,
        client: &reqwest::Client,
        id: u16,
        wire: &[u8],
    ) -> Result<DnsMessage, DnsError> {
        let mut retried = false;
        loop {
            let request = match self.options.doh_method {
                DohMethod::Post => client
                    .post(&self.url)
                    .header("Content-Type", DNS_MESSAGE_CONTENT_TYPE)
                    .header("Accept", DNS_MESSAGE_CONTENT_TYPE)
                    .body(wire.to_vec()),
                DohMethod::Get => {
                    let encoded = URL_SAFE_NO_PAD.encode(wire);
                    client
                        .get(format!("{}?dns={}", self.url, encoded))
                        .header("Accept", DNS_MESSAGE_CONTENT_TYPE)
                }
            };

            let response = match request.timeout(self.options.query_timeout).send().await {
                Ok(response) => response,
                Err(error) if error.is_timeout() => return Err(DnsError::Timeout),
                Err(error) if !retried => {
                    // One transparent retry; reqwest opens a fresh connection
                    // for it when the pooled one went stale.
                    debug!(url = %self.url, %error, "DoH request failed, retrying once");
                    retried = true;
                    continue;
                }
                Err(error) => return Err(DnsError::TransportUnavailable(error.to_string())),
            };

            let status = response.status();
            if !status.is_success() {
                return Err(DnsError::ConnectionReset(format!(
                    "HTTP status {} from {}",
                    status, self.url
                )));
            }

            let body = response
                .bytes()
                .await
                .map_err(|error| DnsError::ConnectionReset(error.to_string()))?;
            if body.len() > MAX_MESSAGE_SIZE {
                return Err(DnsError::MalformedMessage(format!(
                    "response body is {} bytes, limit is {}",
                    body.len(),
                    MAX_MESSAGE_SIZE
                )));
            }

            let decoded = DnsMessage::decode(&body)?;
            if decoded.id != id {
                return Err(DnsError::MalformedMessage(format!(
                    "transaction id mismatch: sent {}, got {}",
                    id, decoded.id
                )));
            }
            if !decoded.is_response() {
                return Err(DnsError::MalformedMessage(
                    "QR flag not set in response".to_string(),
                ));
            }
            return Ok(decoded);
        }
    }

    pub(crate) async fn close(&self) {
        self.closed.send_replace(true);
        // Dropping the client tears down the pooled connections.
        *self.client.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::DohProvider;
    use crate::{Name, RecordType, TransportKind};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_endpoint_url() {
        let session = DohSession::new(
            ProviderProfile::from_doh(DohProvider::Cloudflare),
            SessionOptions::default(),
        );
        assert_eq!(session.url, "https://cloudflare-dns.com:443/dns-query");

        let session = DohSession::new(
            ProviderProfile::from_doh(DohProvider::ControlD),
            SessionOptions::default(),
        );
        assert_eq!(session.url, "https://freedns.controld.com:443/p0");
    }

    #[tokio::test]
    async fn test_query_before_connect_fails() {
        let session = DohSession::new(
            ProviderProfile::from_doh(DohProvider::Google),
            SessionOptions::default(),
        );
        let query = DnsMessage::new_query(Name::from_ascii("example.com").unwrap(), RecordType::A);
        assert!(matches!(
            session.send_query(query).await,
            Err(DnsError::TransportUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_unavailable() {
        let profile = ProviderProfile {
            name: "unreachable".to_string(),
            transport_kind: TransportKind::Doh,
            hostname: "doh.invalid".to_string(),
            bootstrap_addresses: vec!["127.0.0.1".to_string()],
            port: 1,
            path: Some("/dns-query".to_string()),
        };
        let session = DohSession::new(profile, SessionOptions::default());
        assert!(matches!(
            session.connect().await,
            Err(DnsError::TransportUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_query_with_session_replaced() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        // A listener that accepts and stays silent parks the exchange in the
        // TLS handshake until the session is closed underneath it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => sockets.push(socket),
                    Err(_) => break,
                }
            }
        });

        let profile = ProviderProfile {
            name: "silent".to_string(),
            transport_kind: TransportKind::Doh,
            hostname: "doh.invalid".to_string(),
            bootstrap_addresses: vec![addr.ip().to_string()],
            port: addr.port(),
            path: Some("/dns-query".to_string()),
        };
        let mut options = SessionOptions::default();
        options.query_timeout = Duration::from_secs(30);
        let session = Arc::new(DohSession::new(profile, options));

        // Install the client directly; connect()'s probe would hang against
        // the silent listener.
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .resolve_to_addrs("doh.invalid", &[addr])
            .build()
            .unwrap();
        *session.client.lock().unwrap() = Some(client);

        let in_flight = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                let query =
                    DnsMessage::new_query(Name::from_ascii("example.com").unwrap(), RecordType::A);
                session.send_query(query).await
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.close().await;

        let result = tokio::time::timeout(Duration::from_secs(5), in_flight)
            .await
            .expect("query must fail promptly on close")
            .unwrap();
        assert!(matches!(result, Err(DnsError::SessionReplaced)));
    }
}
