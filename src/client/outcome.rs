use crate::ldap::protocol::Control;
use crate::ldap::{LdapMessage, LdapMessageId, LdapProtocolOp, LdapResult, LdapResultCode};
use crate::referral::ReferralRedirect;
use crate::{LdapMuxError, Result};
use std::collections::HashMap;

/// What the server answered to a bind.
#[derive(Debug, Clone, PartialEq)]
pub struct BindOutcome {
    pub message_id: LdapMessageId,
    pub result_code: LdapResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub referrals: Vec<String>,
    pub server_sasl_creds: Option<Vec<u8>>,
    pub controls: Vec<Control>,
}

impl BindOutcome {
    pub(crate) fn from_message(message: LdapMessage) -> Result<Self> {
        match message.protocol_op {
            LdapProtocolOp::BindResponse {
                result,
                server_sasl_creds,
            } => Ok(Self {
                message_id: message.message_id,
                result_code: result.result_code,
                matched_dn: result.matched_dn,
                diagnostic_message: result.diagnostic_message,
                referrals: result.referrals,
                server_sasl_creds,
                controls: message.controls,
            }),
            other => Err(LdapMuxError::Protocol(format!(
                "Expected a bind response, got {}",
                other.name()
            ))),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == LdapResultCode::Success
    }

    /// Turns a non-success result code into an error.
    pub fn success(self) -> Result<Self> {
        result_to_error(self.result_code, &self.referrals, &self.diagnostic_message)?;
        Ok(self)
    }
}

fn result_to_error(code: LdapResultCode, referrals: &[String], diagnostic: &str) -> Result<()> {
    match code {
        LdapResultCode::Success => Ok(()),
        LdapResultCode::Referral => Err(LdapMuxError::Referral(ReferralRedirect {
            urls: referrals.to_vec(),
        })),
        code => Err(LdapMuxError::Operation {
            code,
            message: diagnostic.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchEntry {
    pub message_id: LdapMessageId,
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
    pub controls: Vec<Control>,
}

impl SearchEntry {
    /// Values of `name`, matched case-insensitively.
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(attr, _)| attr.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }
}

/// A continuation reference returned in place of entries held elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReference {
    pub message_id: LdapMessageId,
    pub urls: Vec<String>,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateResponse {
    pub message_id: LdapMessageId,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

impl IntermediateResponse {
    pub(crate) fn from_message(message: LdapMessage) -> Option<Self> {
        match message.protocol_op {
            LdapProtocolOp::IntermediateResponse { name, value } => Some(Self {
                message_id: message.message_id,
                name,
                value,
            }),
            _ => None,
        }
    }
}

/// The result that ends a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDone {
    pub message_id: LdapMessageId,
    pub result_code: LdapResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub referrals: Vec<String>,
    pub controls: Vec<Control>,
}

impl SearchDone {
    fn new(message_id: LdapMessageId, result: LdapResult, controls: Vec<Control>) -> Self {
        Self {
            message_id,
            result_code: result.result_code,
            matched_dn: result.matched_dn,
            diagnostic_message: result.diagnostic_message,
            referrals: result.referrals,
            controls,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == LdapResultCode::Success
    }

    pub fn success(self) -> Result<Self> {
        result_to_error(self.result_code, &self.referrals, &self.diagnostic_message)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchResponse {
    Entry(SearchEntry),
    Reference(SearchReference),
    Intermediate(IntermediateResponse),
}

pub(crate) enum SearchMessage {
    Response(SearchResponse),
    Done(SearchDone),
}

impl SearchMessage {
    pub(crate) fn from_message(message: LdapMessage) -> Result<Self> {
        let message_id = message.message_id;
        let controls = message.controls;
        match message.protocol_op {
            LdapProtocolOp::SearchResultEntry { dn, attributes } => {
                Ok(SearchMessage::Response(SearchResponse::Entry(SearchEntry {
                    message_id,
                    dn,
                    attributes,
                    controls,
                })))
            }
            LdapProtocolOp::SearchResultReference { urls } => {
                Ok(SearchMessage::Response(SearchResponse::Reference(SearchReference {
                    message_id,
                    urls,
                    controls,
                })))
            }
            LdapProtocolOp::IntermediateResponse { name, value } => Ok(SearchMessage::Response(
                SearchResponse::Intermediate(IntermediateResponse {
                    message_id,
                    name,
                    value,
                }),
            )),
            LdapProtocolOp::SearchResultDone { result } => {
                Ok(SearchMessage::Done(SearchDone::new(message_id, result, controls)))
            }
            other => Err(LdapMuxError::Protocol(format!(
                "Unexpected {} in a search",
                other.name()
            ))),
        }
    }
}

/// Everything a search returned, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    responses: Vec<SearchResponse>,
    done: SearchDone,
}

impl SearchResults {
    pub(crate) fn new(responses: Vec<SearchResponse>, done: SearchDone) -> Self {
        Self { responses, done }
    }

    pub fn done(&self) -> &SearchDone {
        &self.done
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SearchEntry> {
        self.responses.iter().filter_map(|r| match r {
            SearchResponse::Entry(entry) => Some(entry),
            _ => None,
        })
    }

    pub fn references(&self) -> impl Iterator<Item = &SearchReference> {
        self.responses.iter().filter_map(|r| match r {
            SearchResponse::Reference(reference) => Some(reference),
            _ => None,
        })
    }
}

impl IntoIterator for SearchResults {
    type Item = SearchResponse;
    type IntoIter = std::vec::IntoIter<SearchResponse>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind_response(result: LdapResult) -> LdapMessage {
        LdapMessage::new(
            3,
            LdapProtocolOp::BindResponse {
                result,
                server_sasl_creds: Some(b"token".to_vec()),
            },
        )
    }

    #[test]
    fn test_bind_outcome_carries_result_fields() {
        let mut result = LdapResult::error(LdapResultCode::InvalidCredentials, "bad password".to_string());
        result.matched_dn = "dc=example,dc=com".to_string();

        let outcome = BindOutcome::from_message(bind_response(result)).unwrap();
        assert_eq!(outcome.message_id, 3);
        assert_eq!(outcome.matched_dn, "dc=example,dc=com");
        assert_eq!(outcome.server_sasl_creds.as_deref(), Some(&b"token"[..]));
        assert!(!outcome.is_success());

        match outcome.success() {
            Err(LdapMuxError::Operation { code, message }) => {
                assert_eq!(code, LdapResultCode::InvalidCredentials);
                assert_eq!(message, "bad password");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_referral_code_becomes_redirect() {
        let outcome =
            BindOutcome::from_message(bind_response(LdapResult::referral(vec!["ldap://h/o=r".to_string()])))
                .unwrap();
        match outcome.success() {
            Err(LdapMuxError::Referral(redirect)) => assert_eq!(redirect.urls, vec!["ldap://h/o=r"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wrong_message_is_protocol_error() {
        let message = LdapMessage::new(1, LdapProtocolOp::UnbindRequest);
        assert!(matches!(
            BindOutcome::from_message(message.clone()),
            Err(LdapMuxError::Protocol(_))
        ));
        assert!(SearchMessage::from_message(message).is_err());
    }

    #[test]
    fn test_search_results_views() {
        let mut attributes = HashMap::new();
        attributes.insert("mail".to_string(), vec!["a@example.com".to_string()]);
        let entry = SearchEntry {
            message_id: 2,
            dn: "cn=a,dc=x".to_string(),
            attributes,
            controls: Vec::new(),
        };
        assert_eq!(entry.values("MAIL"), ["a@example.com".to_string()]);
        assert!(entry.values("cn").is_empty());

        let done = match SearchMessage::from_message(LdapMessage::new(
            2,
            LdapProtocolOp::SearchResultDone {
                result: LdapResult::success(),
            },
        )) {
            Ok(SearchMessage::Done(done)) => done,
            _ => panic!("expected done"),
        };
        let results = SearchResults::new(
            vec![
                SearchResponse::Entry(entry),
                SearchResponse::Reference(SearchReference {
                    message_id: 2,
                    urls: vec!["ldap://h/o=r".to_string()],
                    controls: Vec::new(),
                }),
            ],
            done,
        );

        assert_eq!(results.len(), 2);
        assert_eq!(results.entries().count(), 1);
        assert_eq!(results.references().count(), 1);
        assert!(results.done().is_success());
        assert_eq!(results.into_iter().count(), 2);
    }
}
