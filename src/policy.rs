//! Resolution policy and the apply/reset controller.
//!
//! [`DnsConfigurator`] is the single mutation point for the process-wide
//! policy: callers hand it a provider profile (catalog or custom), it tears
//! down whatever session existed, forwards the resolved configuration to the
//! host's privacy context, and establishes the new encrypted session in the
//! background. Policy mutations are serialized; at most one session is ever
//! live.
//!
//! The policy starts Disabled and transitions
//! `Disabled → Applying → Active` on a successful apply; an establishment
//! failure falls back to Disabled with the failure observable on the status
//! channel.

use crate::session::{Session, SessionOptions, SessionState};
use crate::validate::validate;
use crate::{DnsError, DnsMessage, Name, ProviderProfile, RecordType};
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// The host-OS collaborator that enforces DNS settings on a network scope.
///
/// The core treats this as an opaque message-passing boundary: it forwards
/// the resolved profile on apply and signals reset on reset, and never
/// inspects the handle's state.
pub trait PrivacyContext: Send + Sync {
    fn apply_dns_settings(&self, profile: &ProviderProfile);
    fn reset_dns_settings(&self);
}

/// Observable phase of the policy state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPhase {
    Disabled,
    Applying,
    Active,
}

/// Snapshot published on the status channel after every transition
#[derive(Debug, Clone)]
pub struct PolicyStatus {
    pub phase: PolicyPhase,
    /// Why the last transition to Disabled happened, if it was a failure
    pub last_failure: Option<String>,
}

/// The active, swappable resolution configuration.
///
/// `enabled == true` implies a validated `active_profile` is present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionPolicy {
    pub active_profile: Option<ProviderProfile>,
    pub enabled: bool,
}

struct PolicyInner {
    policy: ResolutionPolicy,
    session: Option<Arc<Session>>,
    /// Bumped on every apply/reset; stale establishment tasks compare it and
    /// stand down.
    generation: u64,
}

struct Shared {
    state: Mutex<PolicyInner>,
    status_tx: watch::Sender<PolicyStatus>,
    context: Option<Arc<dyn PrivacyContext>>,
    options: SessionOptions,
}

/// Cheap-to-clone handle to the resolution policy controller.
#[derive(Clone)]
pub struct DnsConfigurator {
    shared: Arc<Shared>,
}

impl Default for DnsConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsConfigurator {
    /// A configurator with default timeouts and no privacy context.
    pub fn new() -> Self {
        Self::build(SessionOptions::default(), None)
    }

    pub fn with_options(options: SessionOptions) -> Self {
        Self::build(options, None)
    }

    /// A configurator that forwards apply/reset to a host privacy context.
    pub fn with_context(options: SessionOptions, context: Arc<dyn PrivacyContext>) -> Self {
        Self::build(options, Some(context))
    }

    fn build(options: SessionOptions, context: Option<Arc<dyn PrivacyContext>>) -> Self {
        let (status_tx, _) = watch::channel(PolicyStatus {
            phase: PolicyPhase::Disabled,
            last_failure: None,
        });
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PolicyInner {
                    policy: ResolutionPolicy::default(),
                    session: None,
                    generation: 0,
                }),
                status_tx,
                context,
                options,
            }),
        }
    }

    /// Switch resolution to `profile`.
    ///
    /// Validates the profile, tears the previous session down (its
    /// outstanding queries fail with [`DnsError::SessionReplaced`]), updates
    /// the policy, and starts establishing the new session. Returns once the
    /// old session is fully gone — before the new one is necessarily
    /// Established; watch [`DnsConfigurator::subscribe`] for the outcome.
    pub async fn apply(&self, profile: ProviderProfile) -> Result<(), DnsError> {
        validate(&profile)?;

        let mut inner = self.shared.state.lock().await;
        if let Some(old) = inner.session.take() {
            old.close().await;
        }
        inner.generation += 1;
        let generation = inner.generation;
        let session = Arc::new(Session::new(profile.clone(), self.shared.options.clone()));
        inner.session = Some(Arc::clone(&session));
        inner.policy = ResolutionPolicy {
            active_profile: Some(profile.clone()),
            enabled: true,
        };

        debug!(provider = %profile.name, transport = %profile.transport_kind, "applying policy");
        if let Some(context) = &self.shared.context {
            context.apply_dns_settings(&profile);
        }
        self.shared.status_tx.send_replace(PolicyStatus {
            phase: PolicyPhase::Applying,
            last_failure: None,
        });
        drop(inner);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let result = session.connect().await;
            let mut inner = shared.state.lock().await;
            if inner.generation != generation {
                // A newer apply or reset superseded this establishment; that
                // transition already closed the session.
                return;
            }
            match result {
                Ok(()) => {
                    debug!(provider = %session.profile().name, "policy active");
                    shared.status_tx.send_replace(PolicyStatus {
                        phase: PolicyPhase::Active,
                        last_failure: None,
                    });
                }
                Err(error) => {
                    warn!(%error, "session establishment failed, reverting to disabled");
                    if let Some(session) = inner.session.take() {
                        session.close().await;
                    }
                    inner.policy = ResolutionPolicy::default();
                    if let Some(context) = &shared.context {
                        context.reset_dns_settings();
                    }
                    shared.status_tx.send_replace(PolicyStatus {
                        phase: PolicyPhase::Disabled,
                        last_failure: Some(error.to_string()),
                    });
                }
            }
        });
        Ok(())
    }

    /// Apply a catalog entry by its string id ("doh:cloudflare").
    pub async fn apply_id(&self, id: &str) -> Result<(), DnsError> {
        self.apply(crate::providers::lookup(id)?).await
    }

    /// Return to the system default: tear down any session, disable the
    /// policy, and signal the privacy context. Idempotent.
    pub async fn reset(&self) {
        let mut inner = self.shared.state.lock().await;
        inner.generation += 1;
        if let Some(session) = inner.session.take() {
            session.close().await;
        }
        inner.policy = ResolutionPolicy::default();
        if let Some(context) = &self.shared.context {
            context.reset_dns_settings();
        }
        self.shared.status_tx.send_replace(PolicyStatus {
            phase: PolicyPhase::Disabled,
            last_failure: None,
        });
        debug!("policy reset to disabled");
    }

    /// Exchange one DNS message over the active session.
    pub async fn send_query(&self, message: DnsMessage) -> Result<DnsMessage, DnsError> {
        let session = self
            .shared
            .state
            .lock()
            .await
            .session
            .clone()
            .ok_or_else(|| DnsError::TransportUnavailable("no active session".to_string()))?;
        session.send_query(message).await
    }

    /// Convenience wrapper building a recursion-desired query.
    pub async fn query(
        &self,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<DnsMessage, DnsError> {
        let name = Name::from_ascii(hostname)?;
        self.send_query(DnsMessage::new_query(name, record_type)).await
    }

    /// Snapshot of the current policy
    pub async fn policy(&self) -> ResolutionPolicy {
        self.shared.state.lock().await.policy.clone()
    }

    /// Lifecycle state of the current session, if one exists
    pub async fn session_state(&self) -> Option<SessionState> {
        self.shared
            .state
            .lock()
            .await
            .session
            .as_ref()
            .map(|session| session.state())
    }

    /// Latest published status
    pub fn status(&self) -> PolicyStatus {
        self.shared.status_tx.borrow().clone()
    }

    /// Subscribe to policy transitions, including asynchronous establishment
    /// failures.
    pub fn subscribe(&self) -> watch::Receiver<PolicyStatus> {
        self.shared.status_tx.subscribe()
    }
}

static DEFAULT: OnceLock<DnsConfigurator> = OnceLock::new();

/// The process-wide configurator, initialized Disabled on first use.
///
/// The equivalent of a platform's "default network context": one shared
/// policy that every call site mutates through the same serialized
/// controller.
pub fn default_configurator() -> &'static DnsConfigurator {
    DEFAULT.get_or_init(DnsConfigurator::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::DohProvider;
    use crate::TransportKind;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    fn unreachable_dot() -> ProviderProfile {
        ProviderProfile {
            name: "unreachable".to_string(),
            transport_kind: TransportKind::Dot,
            hostname: "dot.invalid".to_string(),
            bootstrap_addresses: vec!["127.0.0.1".to_string()],
            port: 1,
            path: None,
        }
    }

    #[derive(Default)]
    struct RecordingContext {
        calls: StdMutex<Vec<String>>,
    }

    impl PrivacyContext for RecordingContext {
        fn apply_dns_settings(&self, profile: &ProviderProfile) {
            self.calls.lock().unwrap().push(format!("apply:{}", profile.name));
        }

        fn reset_dns_settings(&self) {
            self.calls.lock().unwrap().push("reset".to_string());
        }
    }

    async fn wait_for_phase(
        rx: &mut watch::Receiver<PolicyStatus>,
        phase: PolicyPhase,
    ) -> PolicyStatus {
        tokio::time::timeout(Duration::from_secs(15), async {
            loop {
                if rx.borrow().phase == phase {
                    return rx.borrow().clone();
                }
                rx.changed().await.expect("status channel closed");
            }
        })
        .await
        .expect("phase not reached in time")
    }

    #[tokio::test]
    async fn test_initial_state_is_disabled() {
        let configurator = DnsConfigurator::new();
        assert_eq!(configurator.status().phase, PolicyPhase::Disabled);
        let policy = configurator.policy().await;
        assert!(!policy.enabled);
        assert!(policy.active_profile.is_none());
        assert!(configurator.session_state().await.is_none());
    }

    #[tokio::test]
    async fn test_apply_rejects_invalid_profile() {
        let configurator = DnsConfigurator::new();
        let mut profile = ProviderProfile::from_doh(DohProvider::Cloudflare);
        profile.bootstrap_addresses.clear();
        assert!(matches!(
            configurator.apply(profile).await,
            Err(DnsError::ValidationFailed(_))
        ));
        assert_eq!(configurator.status().phase, PolicyPhase::Disabled);
    }

    #[tokio::test]
    async fn test_apply_unknown_id() {
        let configurator = DnsConfigurator::new();
        assert!(matches!(
            configurator.apply_id("doh:nonexistent").await,
            Err(DnsError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_establishment_failure_reverts_to_disabled() {
        init_tracing();
        let configurator = DnsConfigurator::new();
        let mut rx = configurator.subscribe();

        configurator.apply(unreachable_dot()).await.unwrap();
        let status = wait_for_phase(&mut rx, PolicyPhase::Disabled).await;
        assert!(status.last_failure.is_some());

        let policy = configurator.policy().await;
        assert!(!policy.enabled);
        assert!(policy.active_profile.is_none());
        assert!(configurator.session_state().await.is_none());
    }

    #[tokio::test]
    async fn test_apply_then_immediate_reset() {
        let configurator = DnsConfigurator::new();
        configurator.apply(unreachable_dot()).await.unwrap();
        configurator.reset().await;

        let policy = configurator.policy().await;
        assert!(!policy.enabled);
        assert!(configurator.session_state().await.is_none());

        // The superseded establishment task must not resurrect the policy.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(configurator.status().phase, PolicyPhase::Disabled);
        assert!(!configurator.policy().await.enabled);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let configurator = DnsConfigurator::new();
        configurator.reset().await;
        configurator.reset().await;
        assert_eq!(configurator.status().phase, PolicyPhase::Disabled);
    }

    #[tokio::test]
    async fn test_query_without_session_fails() {
        let configurator = DnsConfigurator::new();
        assert!(matches!(
            configurator.query("example.com", RecordType::A).await,
            Err(DnsError::TransportUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_context_forwarding() {
        let context = Arc::new(RecordingContext::default());
        let configurator =
            DnsConfigurator::with_context(SessionOptions::default(), context.clone());

        configurator.apply(unreachable_dot()).await.unwrap();
        configurator.reset().await;

        let calls = context.calls.lock().unwrap().clone();
        assert_eq!(calls[0], "apply:unreachable");
        assert!(calls.contains(&"reset".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_applies_leave_one_winner() {
        init_tracing();
        let configurator = DnsConfigurator::new();
        let mut profile_a = unreachable_dot();
        profile_a.name = "a".to_string();
        let mut profile_b = unreachable_dot();
        profile_b.name = "b".to_string();

        let first = configurator.clone();
        let second = configurator.clone();
        let (left, right) = tokio::join!(first.apply(profile_a), second.apply(profile_b));
        left.unwrap();
        right.unwrap();

        // Mutations are serialized: at most one profile won, and the loser's
        // establishment task stood down. The winner's establishment fails
        // against the closed port, so the policy is either still enabled for
        // exactly one of the two or already reverted to disabled.
        let policy = configurator.policy().await;
        match policy.active_profile {
            Some(profile) => {
                assert!(profile.name == "a" || profile.name == "b");
                assert!(policy.enabled);
            }
            None => assert!(!policy.enabled),
        }

        let mut rx = configurator.subscribe();
        let status = wait_for_phase(&mut rx, PolicyPhase::Disabled).await;
        assert!(status.last_failure.is_some());
        assert!(configurator.session_state().await.is_none());
    }

    #[tokio::test]
    async fn test_default_configurator_is_shared() {
        let first = default_configurator();
        let second = default_configurator();
        assert!(std::ptr::eq(first, second));
    }
}
