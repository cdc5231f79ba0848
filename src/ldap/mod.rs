pub mod codec;
pub mod filters;
pub mod protocol;

pub use codec::LdapCodec;
pub use filters::{parse_ldap_filter, LdapFilter};
pub use protocol::{LdapMessage, LdapMessageId, LdapProtocolOp, LdapResult, LdapResultCode, SearchScope};
