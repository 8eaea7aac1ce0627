//! DNS-over-TLS transport (RFC 7858).
//!
//! One persistent TLS connection to the provider, with each message framed
//! by a 2-byte big-endian length prefix. A background reader task
//! demultiplexes responses to waiting queries by transaction id, so any
//! number of queries can be in flight on the single stream.

use crate::session::SessionOptions;
use crate::{DnsError, DnsMessage, ProviderProfile};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tracing::debug;

type PendingMap = HashMap<u16, oneshot::Sender<Result<DnsMessage, DnsError>>>;

pub(crate) struct DotSession {
    profile: ProviderProfile,
    options: SessionOptions,
    tls_config: Arc<ClientConfig>,
    inner: Arc<DotInner>,
}

struct DotInner {
    pending: StdMutex<PendingMap>,
    writer: Mutex<Option<WriteHalf<TlsStream<TcpStream>>>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Removes the transaction-id slot when the query future completes or is
/// cancelled, so abandoned ids never pile up in the pending map.
struct IdSlot {
    inner: Arc<DotInner>,
    id: u16,
}

impl Drop for IdSlot {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

impl DotSession {
    pub(crate) fn new(profile: ProviderProfile, options: SessionOptions) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject.as_ref(),
                ta.spki.as_ref(),
                ta.name_constraints.as_deref(),
            )
        }));
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            profile,
            options,
            tls_config: Arc::new(config),
            inner: Arc::new(DotInner {
                pending: StdMutex::new(HashMap::new()),
                writer: Mutex::new(None),
                reader: StdMutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) async fn connect(&self) -> Result<(), DnsError> {
        let stream = self.open_stream().await?;
        // close() may have raced the handshake; a closed session must not
        // come back to life.
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DnsError::TransportUnavailable("session closed".to_string()));
        }
        self.install(stream).await;
        Ok(())
    }

    pub(crate) async fn send_query(&self, mut message: DnsMessage) -> Result<DnsMessage, DnsError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DnsError::TransportUnavailable("session closed".to_string()));
        }

        let (id, rx) = self.allocate_id();
        let _slot = IdSlot {
            inner: Arc::clone(&self.inner),
            id,
        };
        message.id = id;
        let wire = message.encode()?;

        match tokio::time::timeout(self.options.query_timeout, self.exchange(id, rx, &wire)).await
        {
            Ok(result) => result,
            Err(_) => Err(DnsError::Timeout),
        }
    }

    /// Write the query and await the demultiplexed response, with at most
    /// one transparent reconnect if the established connection fails.
    async fn exchange(
        &self,
        id: u16,
        mut rx: oneshot::Receiver<Result<DnsMessage, DnsError>>,
        wire: &[u8],
    ) -> Result<DnsMessage, DnsError> {
        let mut reconnected = false;
        loop {
            if let Err(error) = self.write_frame(wire).await {
                if reconnected {
                    return Err(DnsError::TransportUnavailable(error));
                }
                reconnected = true;
                self.reconnect().await?;
                rx = self.register(id);
                continue;
            }

            match (&mut rx).await {
                Ok(Ok(response)) => {
                    if !response.is_response() {
                        return Err(DnsError::MalformedMessage(
                            "QR flag not set in response".to_string(),
                        ));
                    }
                    return Ok(response);
                }
                Ok(Err(DnsError::ConnectionReset(reason))) if !reconnected => {
                    debug!(%reason, "DoT connection lost mid-query, reconnecting");
                    reconnected = true;
                    self.reconnect().await?;
                    rx = self.register(id);
                    continue;
                }
                Ok(Err(error)) => return Err(error),
                Err(_) => {
                    return Err(DnsError::ConnectionReset(
                        "response channel closed".to_string(),
                    ))
                }
            }
        }
    }

    pub(crate) async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.inner.reader.lock().unwrap().take() {
            handle.abort();
        }
        *self.inner.writer.lock().await = None;
        let senders: Vec<_> = self.inner.pending.lock().unwrap().drain().collect();
        for (_, tx) in senders {
            let _ = tx.send(Err(DnsError::SessionReplaced));
        }
    }

    /// Pick a transaction id unused by any outstanding query and reserve it.
    fn allocate_id(&self) -> (u16, oneshot::Receiver<Result<DnsMessage, DnsError>>) {
        let mut pending = self.inner.pending.lock().unwrap();
        loop {
            let id = rand::random::<u16>();
            if let std::collections::hash_map::Entry::Vacant(entry) = pending.entry(id) {
                let (tx, rx) = oneshot::channel();
                entry.insert(tx);
                return (id, rx);
            }
        }
    }

    /// Re-arm the channel for an id after a reconnect.
    fn register(&self, id: u16) -> oneshot::Receiver<Result<DnsMessage, DnsError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);
        rx
    }

    async fn write_frame(&self, wire: &[u8]) -> Result<(), String> {
        let mut writer = self.inner.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(|| "no active connection".to_string())?;
        let len = (wire.len() as u16).to_be_bytes();
        let write = async {
            stream.write_all(&len).await?;
            stream.write_all(wire).await?;
            stream.flush().await
        };
        match write.await {
            Ok(()) => Ok(()),
            Err(error) => {
                *writer = None;
                Err(error.to_string())
            }
        }
    }

    async fn reconnect(&self) -> Result<(), DnsError> {
        // The old reader must be gone before the new stream goes live, so it
        // cannot fail fresh queries when the dead stream unwinds.
        if let Some(handle) = self.inner.reader.lock().unwrap().take() {
            handle.abort();
        }
        let stream = self.open_stream().await?;
        self.install(stream).await;
        Ok(())
    }

    async fn install(&self, stream: TlsStream<TcpStream>) {
        let (read_half, write_half) = split(stream);
        *self.inner.writer.lock().await = Some(write_half);
        let handle = spawn_reader(Arc::clone(&self.inner), read_half);
        *self.inner.reader.lock().unwrap() = Some(handle);
    }

    /// Try the bootstrap addresses in order; the first TCP+TLS success wins.
    async fn open_stream(&self) -> Result<TlsStream<TcpStream>, DnsError> {
        let server_name = ServerName::try_from(self.profile.hostname.as_str()).map_err(|_| {
            DnsError::TransportUnavailable(format!(
                "'{}' is not a valid TLS server name",
                self.profile.hostname
            ))
        })?;
        let connector = TlsConnector::from(Arc::clone(&self.tls_config));

        let mut last_error = "no bootstrap addresses".to_string();
        for addr in &self.profile.bootstrap_addresses {
            let ip: IpAddr = match addr.parse() {
                Ok(ip) => ip,
                Err(_) => {
                    last_error = format!("'{}' is not a valid IP literal", addr);
                    continue;
                }
            };
            let socket_addr = SocketAddr::new(ip, self.profile.port);

            let tcp = match tokio::time::timeout(
                self.options.connect_timeout,
                TcpStream::connect(socket_addr),
            )
            .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(error)) => {
                    debug!(%socket_addr, %error, "DoT TCP connect failed");
                    last_error = format!("connect to {}: {}", socket_addr, error);
                    continue;
                }
                Err(_) => {
                    debug!(%socket_addr, "DoT TCP connect timed out");
                    last_error = format!("connect to {}: timed out", socket_addr);
                    continue;
                }
            };

            match tokio::time::timeout(
                self.options.connect_timeout,
                connector.connect(server_name.clone(), tcp),
            )
            .await
            {
                Ok(Ok(tls)) => {
                    debug!(
                        %socket_addr,
                        hostname = %self.profile.hostname,
                        "DoT connection established"
                    );
                    return Ok(tls);
                }
                Ok(Err(error)) => {
                    debug!(%socket_addr, %error, "DoT TLS handshake failed");
                    last_error = format!("TLS handshake with {}: {}", socket_addr, error);
                }
                Err(_) => {
                    debug!(%socket_addr, "DoT TLS handshake timed out");
                    last_error = format!("TLS handshake with {}: timed out", socket_addr);
                }
            }
        }
        Err(DnsError::TransportUnavailable(last_error))
    }
}

fn spawn_reader(
    inner: Arc<DotInner>,
    mut read_half: ReadHalf<TlsStream<TcpStream>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = loop {
            let mut len_buf = [0u8; 2];
            if let Err(error) = read_half.read_exact(&mut len_buf).await {
                break error.to_string();
            }
            // The 2-byte prefix caps frames at 65535 bytes by construction.
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            if let Err(error) = read_half.read_exact(&mut body).await {
                break error.to_string();
            }
            match DnsMessage::decode(&body) {
                Ok(response) => {
                    let sender = inner.pending.lock().unwrap().remove(&response.id);
                    match sender {
                        Some(tx) => {
                            let _ = tx.send(Ok(response));
                        }
                        None => {
                            // Late response after a timeout, or a server bug.
                            debug!(id = response.id, "response for unknown transaction id");
                        }
                    }
                }
                Err(error) => {
                    debug!(%error, "discarding undecodable DoT frame");
                }
            }
        };

        if !inner.closed.load(Ordering::SeqCst) {
            debug!(%reason, "DoT stream closed");
            *inner.writer.lock().await = None;
            let senders: Vec<_> = inner.pending.lock().unwrap().drain().collect();
            for (_, tx) in senders {
                let _ = tx.send(Err(DnsError::ConnectionReset(reason.clone())));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::DotProvider;

    fn unreachable_profile() -> ProviderProfile {
        ProviderProfile {
            name: "unreachable".to_string(),
            transport_kind: crate::TransportKind::Dot,
            // A closed loopback port refuses the connection immediately.
            bootstrap_addresses: vec!["127.0.0.1".to_string()],
            hostname: "dot.invalid".to_string(),
            port: 1,
            path: None,
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_unavailable() {
        let session = DotSession::new(unreachable_profile(), SessionOptions::default());
        assert!(matches!(
            session.connect().await,
            Err(DnsError::TransportUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_query_after_close_fails() {
        let session = DotSession::new(
            ProviderProfile::from_dot(DotProvider::Cloudflare),
            SessionOptions::default(),
        );
        session.close().await;
        let query = DnsMessage::new_query(
            crate::Name::from_ascii("example.com").unwrap(),
            crate::RecordType::A,
        );
        assert!(matches!(
            session.send_query(query).await,
            Err(DnsError::TransportUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_close_fails_outstanding_queries_with_session_replaced() {
        let session = DotSession::new(
            ProviderProfile::from_dot(DotProvider::Google),
            SessionOptions::default(),
        );
        // Two reserved ids stand in for queries parked on the reader.
        let (_first, rx1) = session.allocate_id();
        let (_second, rx2) = session.allocate_id();

        session.close().await;

        for rx in [rx1, rx2] {
            match rx.await {
                Ok(Err(DnsError::SessionReplaced)) => {}
                other => panic!("expected SessionReplaced, got {:?}", other),
            }
        }
        assert!(session.inner.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allocated_ids_are_unique_and_released() {
        let session = DotSession::new(
            ProviderProfile::from_dot(DotProvider::Quad9),
            SessionOptions::default(),
        );
        let (first, _rx1) = session.allocate_id();
        let (second, _rx2) = session.allocate_id();
        assert_ne!(first, second);
        assert_eq!(session.inner.pending.lock().unwrap().len(), 2);

        drop(IdSlot {
            inner: Arc::clone(&session.inner),
            id: first,
        });
        assert_eq!(session.inner.pending.lock().unwrap().len(), 1);
    }
}
