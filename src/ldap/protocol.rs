use super::filters::LdapFilter;
use std::collections::HashMap;

pub type LdapMessageId = u32;

/// Highest message id LDAP allows (`MessageID ::= INTEGER (0 .. maxInt)`).
pub const MAX_MESSAGE_ID: LdapMessageId = i32::MAX as LdapMessageId;

/// OID of the notice of disconnection unsolicited notification.
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

#[derive(Debug, Clone, PartialEq)]
pub struct LdapMessage {
    pub message_id: LdapMessageId,
    pub protocol_op: LdapProtocolOp,
    pub controls: Vec<Control>,
}

impl LdapMessage {
    pub fn new(message_id: LdapMessageId, protocol_op: LdapProtocolOp) -> Self {
        Self {
            message_id,
            protocol_op,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub oid: String,
    pub criticality: bool,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LdapProtocolOp {
    BindRequest {
        version: u8,
        dn: String,
        authentication: BindAuthentication,
    },
    BindResponse {
        result: LdapResult,
        server_sasl_creds: Option<Vec<u8>>,
    },
    UnbindRequest,
    SearchRequest {
        base_dn: String,
        scope: SearchScope,
        deref_aliases: DerefAliases,
        size_limit: u32,
        time_limit: u32,
        types_only: bool,
        filter: LdapFilter,
        attributes: Vec<String>,
    },
    SearchResultEntry {
        dn: String,
        attributes: HashMap<String, Vec<String>>,
    },
    SearchResultReference {
        urls: Vec<String>,
    },
    SearchResultDone {
        result: LdapResult,
    },
    AbandonRequest {
        message_id: LdapMessageId,
    },
    ExtendedResponse {
        result: LdapResult,
        name: Option<String>,
        value: Option<Vec<u8>>,
    },
    IntermediateResponse {
        name: Option<String>,
        value: Option<Vec<u8>>,
    },
}

impl LdapProtocolOp {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            LdapProtocolOp::BindRequest { .. } => "bindRequest",
            LdapProtocolOp::BindResponse { .. } => "bindResponse",
            LdapProtocolOp::UnbindRequest => "unbindRequest",
            LdapProtocolOp::SearchRequest { .. } => "searchRequest",
            LdapProtocolOp::SearchResultEntry { .. } => "searchResEntry",
            LdapProtocolOp::SearchResultReference { .. } => "searchResRef",
            LdapProtocolOp::SearchResultDone { .. } => "searchResDone",
            LdapProtocolOp::AbandonRequest { .. } => "abandonRequest",
            LdapProtocolOp::ExtendedResponse { .. } => "extendedResp",
            LdapProtocolOp::IntermediateResponse { .. } => "intermediateResponse",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindAuthentication {
    Simple(String),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
}

impl SearchScope {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(SearchScope::BaseObject),
            1 => Some(SearchScope::SingleLevel),
            2 => Some(SearchScope::WholeSubtree),
            _ => None,
        }
    }
}

impl std::str::FromStr for SearchScope {
    type Err = crate::LdapMuxError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "base" | "object" => Ok(SearchScope::BaseObject),
            "one" | "onelevel" => Ok(SearchScope::SingleLevel),
            "sub" | "subtree" => Ok(SearchScope::WholeSubtree),
            other => Err(crate::LdapMuxError::Config(format!(
                "Unknown search scope: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerefAliases {
    NeverDerefAliases = 0,
    DerefInSearching = 1,
    DerefFindingBaseObj = 2,
    DerefAlways = 3,
}

impl DerefAliases {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(DerefAliases::NeverDerefAliases),
            1 => Some(DerefAliases::DerefInSearching),
            2 => Some(DerefAliases::DerefFindingBaseObj),
            3 => Some(DerefAliases::DerefAlways),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LdapResult {
    pub result_code: LdapResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub referrals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LdapResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    Referral = 10,
    AdminLimitExceeded = 11,
    UnavailableCriticalExtension = 12,
    ConfidentialityRequired = 13,
    SaslBindInProgress = 14,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    NoSuchObject = 32,
    AliasProblem = 33,
    InvalidDNSyntax = 34,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    LoopDetect = 54,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    NotAllowedOnRDN = 67,
    EntryAlreadyExists = 68,
    ObjectClassModsProhibited = 69,
    AffectsMultipleDSAs = 71,
    Other = 80,
}

impl LdapResultCode {
    /// Maps a wire value; codes this enum does not name become `Other`.
    pub fn from_code(code: u32) -> Self {
        use LdapResultCode::*;
        match code {
            0 => Success,
            1 => OperationsError,
            2 => ProtocolError,
            3 => TimeLimitExceeded,
            4 => SizeLimitExceeded,
            5 => CompareFalse,
            6 => CompareTrue,
            7 => AuthMethodNotSupported,
            8 => StrongerAuthRequired,
            10 => Referral,
            11 => AdminLimitExceeded,
            12 => UnavailableCriticalExtension,
            13 => ConfidentialityRequired,
            14 => SaslBindInProgress,
            16 => NoSuchAttribute,
            17 => UndefinedAttributeType,
            18 => InappropriateMatching,
            19 => ConstraintViolation,
            20 => AttributeOrValueExists,
            21 => InvalidAttributeSyntax,
            32 => NoSuchObject,
            33 => AliasProblem,
            34 => InvalidDNSyntax,
            49 => InvalidCredentials,
            50 => InsufficientAccessRights,
            51 => Busy,
            52 => Unavailable,
            53 => UnwillingToPerform,
            54 => LoopDetect,
            64 => NamingViolation,
            65 => ObjectClassViolation,
            66 => NotAllowedOnNonLeaf,
            67 => NotAllowedOnRDN,
            68 => EntryAlreadyExists,
            69 => ObjectClassModsProhibited,
            71 => AffectsMultipleDSAs,
            _ => Other,
        }
    }
}

impl LdapResult {
    pub fn success() -> Self {
        Self {
            result_code: LdapResultCode::Success,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
            referrals: Vec::new(),
        }
    }

    pub fn error(code: LdapResultCode, message: String) -> Self {
        Self {
            result_code: code,
            matched_dn: String::new(),
            diagnostic_message: message,
            referrals: Vec::new(),
        }
    }

    pub fn referral(urls: Vec<String>) -> Self {
        Self {
            result_code: LdapResultCode::Referral,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
            referrals: urls,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == LdapResultCode::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ldap_result_success() {
        let result = LdapResult::success();
        assert_eq!(result.result_code, LdapResultCode::Success);
        assert_eq!(result.matched_dn, "");
        assert_eq!(result.diagnostic_message, "");
        assert!(result.referrals.is_empty());
        assert!(result.is_success());
    }

    #[test]
    fn test_ldap_result_referral() {
        let result = LdapResult::referral(vec!["ldap://other/dc=x".to_string()]);
        assert_eq!(result.result_code, LdapResultCode::Referral);
        assert_eq!(result.referrals, vec!["ldap://other/dc=x"]);
        assert!(!result.is_success());
    }

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(LdapResultCode::from_code(0), LdapResultCode::Success);
        assert_eq!(LdapResultCode::from_code(10), LdapResultCode::Referral);
        assert_eq!(LdapResultCode::from_code(49), LdapResultCode::InvalidCredentials);
        assert_eq!(LdapResultCode::from_code(9), LdapResultCode::Other);
        assert_eq!(LdapResultCode::from_code(4711), LdapResultCode::Other);
        assert_eq!(LdapResultCode::Referral as u8, 10);
    }

    #[test]
    fn test_search_scope_values() {
        assert_eq!(SearchScope::BaseObject as u8, 0);
        assert_eq!(SearchScope::SingleLevel as u8, 1);
        assert_eq!(SearchScope::WholeSubtree as u8, 2);
        assert_eq!(SearchScope::from_code(1), Some(SearchScope::SingleLevel));
        assert_eq!(SearchScope::from_code(3), None);
        assert_eq!("sub".parse::<SearchScope>().unwrap(), SearchScope::WholeSubtree);
        assert!("deep".parse::<SearchScope>().is_err());
    }

    #[test]
    fn test_deref_aliases_values() {
        assert_eq!(DerefAliases::from_code(2), Some(DerefAliases::DerefFindingBaseObj));
        assert_eq!(DerefAliases::from_code(7), None);
    }

    #[test]
    fn test_message_builder_keeps_controls() {
        let control = Control {
            oid: "1.2.840.113556.1.4.319".to_string(),
            criticality: true,
            value: None,
        };
        let msg = LdapMessage::new(7, LdapProtocolOp::UnbindRequest).with_controls(vec![control.clone()]);
        assert_eq!(msg.message_id, 7);
        assert_eq!(msg.controls, vec![control]);
        assert_eq!(msg.protocol_op.name(), "unbindRequest");
    }
}
