//! Multiplexing LDAP client connection.
//!
//! One [`LdapConnection`] owns one transport session and lets any number
//! of tasks run operations over it concurrently. Requests are written one
//! at a time through the [`OperationGate`]; responses are matched back to
//! their callers by message id in the [`MessageCorrelator`].

pub mod connection;
pub mod correlator;
pub mod gate;
pub mod listener;
pub mod outcome;
pub mod request;
pub mod transport;

pub use connection::LdapConnection;
pub use correlator::{DeliveryTarget, MessageCorrelator, OperationKind, PendingSlot};
pub use gate::{GatePermit, OperationGate};
pub use listener::{BindListener, SearchListener};
pub use outcome::{
    BindOutcome, IntermediateResponse, SearchDone, SearchEntry, SearchReference, SearchResponse,
    SearchResults,
};
pub use request::{BindRequest, SearchRequest};
pub use transport::{LdapStream, MessageHandler, TransportSession};
