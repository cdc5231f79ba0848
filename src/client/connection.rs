use super::correlator::{DeliveryTarget, MessageCorrelator, OperationKind, PendingSlot};
use super::gate::OperationGate;
use super::listener::{BindListener, SearchListener};
use super::outcome::{BindOutcome, SearchMessage, SearchResults};
use super::request::{BindRequest, SearchRequest};
use super::transport::{self, MessageHandler, TransportSession};
use crate::config::ConnectionConfig;
use crate::ldap::protocol::Control;
use crate::ldap::{LdapMessage, LdapMessageId, LdapProtocolOp, SearchScope};
use crate::{LdapMuxError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, info, warn};

/// A client connection that runs many operations over one session.
///
/// Requests are written one at a time; any number may be outstanding and
/// their responses can arrive in any order. A connection starts out
/// disconnected and is only (re)connected by [`connect`](Self::connect).
pub struct LdapConnection {
    config: ConnectionConfig,
    correlator: Arc<MessageCorrelator>,
    gate: Arc<OperationGate>,
    session: RwLock<Option<Arc<TransportSession>>>,
    /// Bumped by every `close()`, under the session lock.
    closes: AtomicU64,
}

/// An operation whose caller is still waiting for its final response.
///
/// Dropping it while armed removes the pending slot and sends a
/// best-effort abandon over the session the request went out on.
struct PendingOperation {
    id: LdapMessageId,
    correlator: Arc<MessageCorrelator>,
    gate: Arc<OperationGate>,
    session: Arc<TransportSession>,
    armed: bool,
}

impl PendingOperation {
    fn id(&self) -> LdapMessageId {
        self.id
    }

    /// Hands the operation over without touching its slot.
    fn disarm(mut self) -> LdapMessageId {
        self.armed = false;
        self.id
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        if !self.armed || !self.correlator.complete(self.id) {
            return;
        }
        debug!("Caller stopped waiting for operation {}, abandoning it", self.id);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = self.id;
        let correlator = Arc::clone(&self.correlator);
        let gate = Arc::clone(&self.gate);
        let session = Arc::clone(&self.session);
        runtime.spawn(async move {
            if let Err(e) = send_abandon(&gate, &correlator, &session, id).await {
                debug!("Could not abandon operation {}: {}", id, e);
            }
        });
    }
}

async fn send_abandon(
    gate: &OperationGate,
    correlator: &MessageCorrelator,
    session: &TransportSession,
    id: LdapMessageId,
) -> Result<()> {
    let _permit = gate.enter().await?;
    let abandon_id = correlator.next_id();
    session
        .send(LdapMessage::new(
            abandon_id,
            LdapProtocolOp::AbandonRequest { message_id: id },
        ))
        .await
}

impl LdapConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            correlator: Arc::new(MessageCorrelator::new()),
            gate: Arc::new(OperationGate::new()),
            session: RwLock::new(None),
            closes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session().map_or(false, |s| s.is_open())
    }

    /// Operations still waiting for their final response.
    pub fn pending_operations(&self) -> usize {
        self.correlator.len()
    }

    /// Opens the session. `Ok(false)` means the server could not be reached.
    pub async fn connect(&self) -> Result<bool> {
        let _permit = self.gate.enter().await?;
        if self.is_connected() {
            return Ok(true);
        }

        let generation = self.closes.load(Ordering::SeqCst);
        let stale = self.session_slot().take();
        if let Some(stale) = stale {
            stale.shutdown().await;
        }
        let purged = self.correlator.purge_all(|_| LdapMuxError::ConnectionClosed);
        if purged > 0 {
            debug!("Discarded {} operations left from the previous session", purged);
        }

        let handler: Arc<dyn MessageHandler> = self.correlator.clone();
        match transport::connect(&self.config, handler).await? {
            Some(session) => {
                let session = Arc::new(session);
                if self.install(Arc::clone(&session), generation) {
                    return Ok(true);
                }
                info!("Connection to {} was closed while connecting", session.peer());
                session.shutdown().await;
                Err(LdapMuxError::ConnectionClosed)
            }
            None => Ok(false),
        }
    }

    /// Simple bind, waiting for the server's answer.
    pub async fn bind(&self, name: &str, password: &str) -> Result<BindOutcome> {
        self.bind_request(BindRequest::simple(name, password)).await
    }

    /// Binds with the identity from the configuration, anonymously if
    /// there is none.
    pub async fn bind_default(&self) -> Result<BindOutcome> {
        let request = BindRequest::simple(
            self.config.name.clone().unwrap_or_default(),
            self.config.credentials.clone().unwrap_or_default(),
        );
        self.bind_request(request).await
    }

    pub async fn bind_request(&self, request: BindRequest) -> Result<BindOutcome> {
        let (tx, rx) = oneshot::channel();
        let pending = self
            .write_request(
                OperationKind::Bind,
                || request.to_protocol_op(),
                request.controls.clone(),
                DeliveryTarget::Response(tx),
            )
            .await?;

        let timeout = self.effective_timeout(request.timeout);
        match time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                pending.disarm();
                BindOutcome::from_message(reply?)
            }
            Ok(Err(_)) => Err(LdapMuxError::ConnectionClosed),
            Err(_) => Err(self.timed_out(pending.disarm(), timeout).await),
        }
    }

    /// Writes a bind and returns its message id; the outcome goes to
    /// `listener`.
    pub async fn bind_with_listener(
        &self,
        request: BindRequest,
        listener: Arc<dyn BindListener>,
    ) -> Result<LdapMessageId> {
        let pending = self
            .write_request(
                OperationKind::Bind,
                || request.to_protocol_op(),
                request.controls.clone(),
                DeliveryTarget::BindListener(listener),
            )
            .await?;
        Ok(pending.disarm())
    }

    pub async fn search(
        &self,
        base: &str,
        filter: &str,
        scope: SearchScope,
        attributes: &[&str],
    ) -> Result<SearchResults> {
        let request = SearchRequest::new(base, filter, scope).with_attributes(attributes.iter().copied());
        self.search_request(request).await
    }

    /// Runs a search and collects everything up to the final result.
    ///
    /// The timeout applies to the wait for each message. A search that
    /// times out is abandoned and its partial results are discarded.
    pub async fn search_request(&self, request: SearchRequest) -> Result<SearchResults> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pending = self
            .write_request(
                OperationKind::Search,
                || request.to_protocol_op(),
                request.controls.clone(),
                DeliveryTarget::Stream(tx),
            )
            .await?;

        let timeout = self.effective_timeout(request.timeout);
        let mut responses = Vec::new();
        loop {
            let message = match time::timeout(timeout, rx.recv()).await {
                Ok(Some(reply)) => reply?,
                Ok(None) => return Err(LdapMuxError::ConnectionClosed),
                Err(_) => return Err(self.timed_out(pending.disarm(), timeout).await),
            };
            match SearchMessage::from_message(message)? {
                SearchMessage::Response(response) => responses.push(response),
                SearchMessage::Done(done) => {
                    debug!("Search {} finished with {} responses", pending.id(), responses.len());
                    pending.disarm();
                    return Ok(SearchResults::new(responses, done));
                }
            }
        }
    }

    /// Writes a search and returns its message id; results are pushed to
    /// `listener` as they arrive.
    pub async fn search_with_listener(
        &self,
        request: SearchRequest,
        listener: Arc<dyn SearchListener>,
    ) -> Result<LdapMessageId> {
        let pending = self
            .write_request(
                OperationKind::Search,
                || request.to_protocol_op(),
                request.controls.clone(),
                DeliveryTarget::SearchListener(listener),
            )
            .await?;
        Ok(pending.disarm())
    }

    /// Asks the server to drop operation `id` and stops waiting for it.
    pub async fn abandon(&self, id: LdapMessageId) -> Result<()> {
        if self.correlator.cancel(id, LdapMuxError::Abandoned(id)) {
            debug!("Abandoning operation {}", id);
        }
        let session = self.open_session()?;
        send_abandon(&self.gate, &self.correlator, &session, id).await
    }

    /// Sends an unbind request and closes the connection.
    pub async fn unbind(&self) -> Result<()> {
        let Some(session) = self.session().filter(|s| s.is_open()) else {
            return Ok(());
        };

        let sent = {
            let _permit = self.gate.enter().await?;
            let id = self.correlator.next_id();
            session
                .send(LdapMessage::new(id, LdapProtocolOp::UnbindRequest))
                .await
        };
        self.close().await;
        sent
    }

    /// Shuts the session down and fails every outstanding operation with
    /// [`LdapMuxError::ConnectionClosed`]. Calling it again is harmless.
    pub async fn close(&self) {
        let taken = {
            let mut slot = self.session_slot();
            self.closes.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        if let Some(session) = taken {
            session.shutdown().await;
            info!("Closed connection to {}", session.peer());
        }

        let purged = self.correlator.purge_all(|_| LdapMuxError::ConnectionClosed);
        if purged > 0 {
            debug!("Failed {} outstanding operations on close", purged);
        }
    }

    fn session(&self) -> Option<Arc<TransportSession>> {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn open_session(&self) -> Result<Arc<TransportSession>> {
        self.session()
            .filter(|s| s.is_open())
            .ok_or(LdapMuxError::NotConnected)
    }

    fn session_slot(&self) -> RwLockWriteGuard<'_, Option<Arc<TransportSession>>> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores `session` unless a `close()` ran since `generation` was read.
    fn install(&self, session: Arc<TransportSession>, generation: u64) -> bool {
        let mut slot = self.session_slot();
        if self.closes.load(Ordering::SeqCst) != generation {
            return false;
        }
        *slot = Some(session);
        true
    }

    fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        let timeout = self.config.timeout();
        requested.map_or(timeout, |requested| requested.min(timeout))
    }

    /// Builds, registers and writes one request while holding the gate.
    ///
    /// Nothing is registered or written when `build` fails.
    async fn write_request<F>(
        &self,
        kind: OperationKind,
        build: F,
        controls: Vec<Control>,
        target: DeliveryTarget,
    ) -> Result<PendingOperation>
    where
        F: FnOnce() -> Result<LdapProtocolOp>,
    {
        let _permit = self.gate.enter().await?;
        let protocol_op = build()?;
        let session = self.open_session()?;

        let id = self.correlator.next_id();
        self.correlator.register(id, PendingSlot::new(kind, target))?;

        debug!("Sending {} as message {}", protocol_op.name(), id);
        let message = LdapMessage::new(id, protocol_op).with_controls(controls);
        if let Err(e) = session.send(message).await {
            self.correlator.complete(id);
            return Err(e);
        }
        Ok(PendingOperation {
            id,
            correlator: Arc::clone(&self.correlator),
            gate: Arc::clone(&self.gate),
            session,
            armed: true,
        })
    }

    async fn timed_out(&self, id: LdapMessageId, timeout: Duration) -> LdapMuxError {
        self.correlator.complete(id);
        warn!("Operation {} timed out after {:?}, abandoning it", id, timeout);
        let sent = match self.open_session() {
            Ok(session) => send_abandon(&self.gate, &self.correlator, &session, id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            debug!("Could not abandon operation {}: {}", id, e);
        }
        LdapMuxError::Timeout {
            message_id: id,
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnected() -> LdapConnection {
        LdapConnection::new(ConnectionConfig::default())
    }

    #[tokio::test]
    async fn test_operations_need_a_connection() {
        let connection = disconnected();
        assert!(!connection.is_connected());
        assert!(matches!(
            connection.bind("cn=admin,dc=x", "secret").await,
            Err(LdapMuxError::NotConnected)
        ));
        assert!(matches!(
            connection
                .search("dc=x", "(objectClass=*)", SearchScope::WholeSubtree, &[])
                .await,
            Err(LdapMuxError::NotConnected)
        ));
        assert!(matches!(connection.abandon(7).await, Err(LdapMuxError::NotConnected)));
        assert_eq!(connection.pending_operations(), 0);
    }

    #[tokio::test]
    async fn test_request_errors_come_before_connection_errors() {
        let connection = disconnected();
        assert!(matches!(
            connection.bind("no equals sign", "secret").await,
            Err(LdapMuxError::InvalidDn(_))
        ));
        assert!(matches!(
            connection
                .search("dc=x", "(cn=unbalanced", SearchScope::BaseObject, &[])
                .await,
            Err(LdapMuxError::InvalidFilter(_))
        ));
    }

    #[tokio::test]
    async fn test_close_and_unbind_when_disconnected() {
        let connection = disconnected();
        connection.close().await;
        connection.close().await;
        assert!(connection.unbind().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_while_connecting_discards_the_new_session() {
        let connection = disconnected();
        let generation = connection.closes.load(Ordering::SeqCst);

        let (client, _server) = tokio::io::duplex(1024);
        let handler: Arc<dyn MessageHandler> = connection.correlator.clone();
        let session = Arc::new(TransportSession::start(
            Box::new(client),
            "duplex".to_string(),
            handler,
        ));

        connection.close().await;
        assert!(!connection.install(Arc::clone(&session), generation));
        assert!(!connection.is_connected());

        let current = connection.closes.load(Ordering::SeqCst);
        assert!(connection.install(session, current));
        assert!(connection.is_connected());
        connection.close().await;
        assert!(!connection.is_connected());
    }

    #[test]
    fn test_effective_timeout_is_the_smaller_one() {
        let connection =
            LdapConnection::new(ConnectionConfig::default().with_timeout(Duration::from_secs(5)));
        assert_eq!(connection.effective_timeout(None), Duration::from_secs(5));
        assert_eq!(
            connection.effective_timeout(Some(Duration::from_millis(50))),
            Duration::from_millis(50)
        );
        assert_eq!(
            connection.effective_timeout(Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
    }
}
