use super::outcome::{BindOutcome, IntermediateResponse, SearchDone, SearchEntry, SearchReference};
use crate::ldap::LdapMessageId;
use crate::LdapMuxError;
use tracing::warn;

/// Callbacks for a bind issued with [`bind_with_listener`].
///
/// Callbacks run on the connection's reader task and must return quickly.
///
/// [`bind_with_listener`]: super::LdapConnection::bind_with_listener
pub trait BindListener: Send + Sync {
    fn bind_completed(&self, outcome: BindOutcome);

    fn intermediate_response(&self, _response: IntermediateResponse) {}

    /// The operation ended without a response: abandoned, or the
    /// connection went away.
    fn operation_failed(&self, message_id: LdapMessageId, error: &LdapMuxError) {
        warn!("Bind {} failed: {}", message_id, error);
    }
}

/// Callbacks for a search issued with [`search_with_listener`].
///
/// [`search_with_listener`]: super::LdapConnection::search_with_listener
pub trait SearchListener: Send + Sync {
    fn entry_found(&self, entry: SearchEntry);

    fn referral_found(&self, reference: SearchReference);

    fn search_done(&self, done: SearchDone);

    fn intermediate_response(&self, _response: IntermediateResponse) {}

    fn operation_failed(&self, message_id: LdapMessageId, error: &LdapMuxError) {
        warn!("Search {} failed: {}", message_id, error);
    }
}
