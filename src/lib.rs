pub mod client;
pub mod config;
pub mod directory;
pub mod dn;
pub mod interceptor;
pub mod ldap;
pub mod referral;
pub mod server;
pub mod url;
pub mod yaml;

use std::time::Duration;

use ldap::protocol::{LdapMessageId, LdapResultCode};
use referral::ReferralRedirect;

pub use client::LdapConnection;
pub use config::{ConnectionConfig, ServerConfig};
pub use dn::Dn;
pub use server::Server;

#[derive(thiserror::Error, Debug)]
pub enum LdapMuxError {
    #[error("LDAP protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Operation {message_id} timed out after {timeout:?}")]
    Timeout {
        message_id: LdapMessageId,
        timeout: Duration,
    },

    #[error("Operation {0} was abandoned")]
    Abandoned(LdapMessageId),

    #[error("Message id {0} is already registered")]
    DuplicateMessageId(LdapMessageId),

    #[error("Invalid DN: {0}")]
    InvalidDn(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid LDAP URL: {0}")]
    InvalidUrl(String),

    #[error("Operation failed with {code:?}: {message}")]
    Operation {
        code: LdapResultCode,
        message: String,
    },

    #[error("Referral: {0}")]
    Referral(ReferralRedirect),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Cursor error: {0}")]
    Cursor(String),

    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Entry already exists: {0}")]
    EntryAlreadyExists(String),

    #[error("Not allowed on non-leaf entry: {0}")]
    NotAllowedOnNonLeaf(String),
}

impl LdapMuxError {
    /// The result code a server reports for this error.
    pub fn result_code(&self) -> LdapResultCode {
        match self {
            LdapMuxError::Protocol(_) => LdapResultCode::ProtocolError,
            LdapMuxError::InvalidDn(_) => LdapResultCode::InvalidDNSyntax,
            LdapMuxError::InvalidFilter(_) => LdapResultCode::ProtocolError,
            LdapMuxError::Operation { code, .. } => *code,
            LdapMuxError::Referral(_) => LdapResultCode::Referral,
            LdapMuxError::Unsupported(_) => LdapResultCode::UnwillingToPerform,
            LdapMuxError::NoSuchObject(_) => LdapResultCode::NoSuchObject,
            LdapMuxError::EntryAlreadyExists(_) => LdapResultCode::EntryAlreadyExists,
            LdapMuxError::NotAllowedOnNonLeaf(_) => LdapResultCode::NotAllowedOnNonLeaf,
            LdapMuxError::Timeout { .. } => LdapResultCode::TimeLimitExceeded,
            LdapMuxError::NotConnected | LdapMuxError::ConnectionClosed => {
                LdapResultCode::Unavailable
            }
            _ => LdapResultCode::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, LdapMuxError>;
