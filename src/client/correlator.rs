use super::listener::{BindListener, SearchListener};
use super::outcome::{BindOutcome, IntermediateResponse, SearchMessage, SearchResponse};
use super::transport::MessageHandler;
use crate::ldap::protocol::{MAX_MESSAGE_ID, NOTICE_OF_DISCONNECTION_OID};
use crate::ldap::{LdapMessage, LdapMessageId, LdapProtocolOp};
use crate::{LdapMuxError, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Bind,
    Search,
}

/// Where the responses of one operation go.
pub enum DeliveryTarget {
    /// A caller waiting for the single response
    Response(oneshot::Sender<Result<LdapMessage>>),
    /// A caller collecting every response until the final one
    Stream(mpsc::UnboundedSender<Result<LdapMessage>>),
    BindListener(Arc<dyn BindListener>),
    SearchListener(Arc<dyn SearchListener>),
}

impl DeliveryTarget {
    /// A handle for one non-final delivery. Single-shot targets have none.
    fn share(&self) -> Option<DeliveryTarget> {
        match self {
            DeliveryTarget::Response(_) => None,
            DeliveryTarget::Stream(tx) => Some(DeliveryTarget::Stream(tx.clone())),
            DeliveryTarget::BindListener(l) => Some(DeliveryTarget::BindListener(Arc::clone(l))),
            DeliveryTarget::SearchListener(l) => {
                Some(DeliveryTarget::SearchListener(Arc::clone(l)))
            }
        }
    }

    fn deliver(self, message: LdapMessage) {
        let message_id = message.message_id;
        match self {
            DeliveryTarget::Response(tx) => {
                if tx.send(Ok(message)).is_err() {
                    debug!("Caller of operation {} is gone", message_id);
                }
            }
            DeliveryTarget::Stream(tx) => {
                if tx.send(Ok(message)).is_err() {
                    debug!("Caller of operation {} is gone", message_id);
                }
            }
            DeliveryTarget::BindListener(listener) => match message.protocol_op {
                LdapProtocolOp::IntermediateResponse { .. } => {
                    if let Some(response) = IntermediateResponse::from_message(message) {
                        listener.intermediate_response(response);
                    }
                }
                _ => match BindOutcome::from_message(message) {
                    Ok(outcome) => listener.bind_completed(outcome),
                    Err(e) => warn!("Dropping response for bind {}: {}", message_id, e),
                },
            },
            DeliveryTarget::SearchListener(listener) => match SearchMessage::from_message(message) {
                Ok(SearchMessage::Response(SearchResponse::Entry(entry))) => {
                    listener.entry_found(entry)
                }
                Ok(SearchMessage::Response(SearchResponse::Reference(reference))) => {
                    listener.referral_found(reference)
                }
                Ok(SearchMessage::Response(SearchResponse::Intermediate(response))) => {
                    listener.intermediate_response(response)
                }
                Ok(SearchMessage::Done(done)) => listener.search_done(done),
                Err(e) => warn!("Dropping response for search {}: {}", message_id, e),
            },
        }
    }

    fn fail(self, message_id: LdapMessageId, error: LdapMuxError) {
        match self {
            DeliveryTarget::Response(tx) => {
                let _ = tx.send(Err(error));
            }
            DeliveryTarget::Stream(tx) => {
                let _ = tx.send(Err(error));
            }
            DeliveryTarget::BindListener(listener) => listener.operation_failed(message_id, &error),
            DeliveryTarget::SearchListener(listener) => {
                listener.operation_failed(message_id, &error)
            }
        }
    }
}

impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryTarget::Response(_) => "Response",
            DeliveryTarget::Stream(_) => "Stream",
            DeliveryTarget::BindListener(_) => "BindListener",
            DeliveryTarget::SearchListener(_) => "SearchListener",
        })
    }
}

#[derive(Debug)]
pub struct PendingSlot {
    pub kind: OperationKind,
    pub target: DeliveryTarget,
}

impl PendingSlot {
    pub fn new(kind: OperationKind, target: DeliveryTarget) -> Self {
        Self { kind, target }
    }
}

enum Route {
    /// Deliver and keep the slot
    Push(DeliveryTarget),
    /// Remove the slot, then deliver
    Finish,
    Discard(&'static str),
}

/// Hands out message ids and routes responses to whoever is waiting.
#[derive(Debug)]
pub struct MessageCorrelator {
    pending: DashMap<LdapMessageId, PendingSlot>,
    counter: AtomicU32,
}

impl MessageCorrelator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            counter: AtomicU32::new(1),
        }
    }

    /// Next free message id. Wraps to 1 after the largest id LDAP allows
    /// and skips ids still in flight.
    pub fn next_id(&self) -> LdapMessageId {
        loop {
            let id = match self
                .counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(if current >= MAX_MESSAGE_ID { 1 } else { current + 1 })
                }) {
                Ok(id) | Err(id) => id,
            };
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn register(&self, id: LdapMessageId, slot: PendingSlot) -> Result<()> {
        match self.pending.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(LdapMuxError::DuplicateMessageId(id)),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(())
            }
        }
    }

    /// Routes a decoded message. Returns false when it was dropped.
    pub fn deliver(&self, message: LdapMessage) -> bool {
        let id = message.message_id;
        if id == 0 {
            log_unsolicited(&message);
            return false;
        }

        // Decide under the map guard, deliver after it is released.
        let route = match self.pending.get(&id) {
            Some(slot) => route_for(&slot, &message.protocol_op),
            None => {
                warn!(
                    "Dropping {} for unknown message id {}",
                    message.protocol_op.name(),
                    id
                );
                return false;
            }
        };

        match route {
            Route::Push(target) => {
                target.deliver(message);
                true
            }
            Route::Finish => match self.pending.remove(&id) {
                Some((_, slot)) => {
                    slot.target.deliver(message);
                    true
                }
                None => {
                    debug!("Operation {} ended before its response arrived", id);
                    false
                }
            },
            Route::Discard(reason) => {
                if matches!(message.protocol_op, LdapProtocolOp::IntermediateResponse { .. }) {
                    debug!("Dropping intermediate response for {}: {}", id, reason);
                } else {
                    warn!("Dropping {} for {}: {}", message.protocol_op.name(), id, reason);
                }
                false
            }
        }
    }

    /// Removes a slot without notifying its owner.
    pub fn complete(&self, id: LdapMessageId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Removes a slot and hands `error` to its owner.
    pub fn cancel(&self, id: LdapMessageId, error: LdapMuxError) -> bool {
        match self.pending.remove(&id) {
            Some((_, slot)) => {
                slot.target.fail(id, error);
                true
            }
            None => false,
        }
    }

    /// Cancels every slot. Returns how many there were.
    pub fn purge_all<F>(&self, make_error: F) -> usize
    where
        F: Fn(LdapMessageId) -> LdapMuxError,
    {
        let ids: Vec<LdapMessageId> = self.pending.iter().map(|slot| *slot.key()).collect();
        ids.into_iter()
            .filter(|&id| self.cancel(id, make_error(id)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for MessageCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHandler for MessageCorrelator {
    fn on_message(&self, message: LdapMessage) {
        self.deliver(message);
    }

    fn on_closed(&self) {
        let purged = self.purge_all(|_| LdapMuxError::ConnectionClosed);
        if purged > 0 {
            info!("Connection lost with {} operations outstanding", purged);
        }
    }
}

fn route_for(slot: &PendingSlot, op: &LdapProtocolOp) -> Route {
    match (slot.kind, op) {
        (_, LdapProtocolOp::IntermediateResponse { .. }) => match slot.target.share() {
            Some(target) => Route::Push(target),
            None => Route::Discard("the caller waits for a single response"),
        },
        (OperationKind::Bind, LdapProtocolOp::BindResponse { .. })
        | (OperationKind::Search, LdapProtocolOp::SearchResultDone { .. }) => Route::Finish,
        (
            OperationKind::Search,
            LdapProtocolOp::SearchResultEntry { .. } | LdapProtocolOp::SearchResultReference { .. },
        ) => match slot.target.share() {
            Some(target) => Route::Push(target),
            None => Route::Discard("the caller waits for a single response"),
        },
        (
            OperationKind::Bind,
            LdapProtocolOp::SearchResultEntry { .. }
            | LdapProtocolOp::SearchResultReference { .. }
            | LdapProtocolOp::SearchResultDone { .. },
        )
        | (OperationKind::Search, LdapProtocolOp::BindResponse { .. }) => {
            Route::Discard("response does not match the operation")
        }
        _ => Route::Discard("unexpected message type"),
    }
}

fn log_unsolicited(message: &LdapMessage) {
    match &message.protocol_op {
        LdapProtocolOp::ExtendedResponse {
            name: Some(name),
            result,
            ..
        } if name == NOTICE_OF_DISCONNECTION_OID => {
            warn!(
                "Server sent a notice of disconnection ({:?}): {}",
                result.result_code, result.diagnostic_message
            );
        }
        op => warn!("Ignoring unsolicited {}", op.name()),
    }
}
