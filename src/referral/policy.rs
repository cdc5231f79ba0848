use super::cursor::ReferralAwareCursor;
use super::lut::ReferralLut;
use crate::directory::{Entry, EntryCursor, Partition};
use crate::dn::Dn;
use crate::ldap::protocol::SearchScope;
use crate::url::LdapUrl;
use crate::{LdapMuxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// How operations react to referral entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferralMode {
    /// Referrals are ordinary entries
    Ignore,
    #[default]
    Throw,
    /// Only the search base raises; scan results come back inline
    ThrowFindingBase,
    Follow,
}

impl FromStr for ReferralMode {
    type Err = LdapMuxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(ReferralMode::Ignore),
            "throw" => Ok(ReferralMode::Throw),
            "throw-finding-base" | "throwfindingbase" => Ok(ReferralMode::ThrowFindingBase),
            "follow" => Ok(ReferralMode::Follow),
            other => Err(LdapMuxError::Config(format!("Unknown referral mode: {}", other))),
        }
    }
}

impl fmt::Display for ReferralMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferralMode::Ignore => "ignore",
            ReferralMode::Throw => "throw",
            ReferralMode::ThrowFindingBase => "throw-finding-base",
            ReferralMode::Follow => "follow",
        })
    }
}

/// The URLs a client should retry an operation against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralRedirect {
    pub urls: Vec<String>,
}

impl ReferralRedirect {
    /// Rewrites the `ref` values of `referral` for an operation on `target`.
    ///
    /// LDAP URLs get the RDNs by which `target` lies below the referral
    /// prepended to their DN and, for searches, a scope. Other values are
    /// passed through untouched.
    pub fn build(referral: &Entry, target: &Dn, scope: Option<SearchScope>) -> Self {
        let relative = target.relative_to(referral.dn()).unwrap_or_default();

        let urls = referral
            .referral_urls()
            .iter()
            .map(|value| rewrite(value, &relative, scope))
            .collect();

        ReferralRedirect { urls }
    }
}

fn rewrite(value: &str, relative: &Dn, scope: Option<SearchScope>) -> String {
    if !LdapUrl::is_ldap_url(value) {
        return value.to_string();
    }
    let url = match LdapUrl::parse(value) {
        Ok(url) => url,
        Err(e) => {
            debug!("Passing referral value through unchanged: {}", e);
            return value.to_string();
        }
    };
    let remote_dn = match Dn::parse(&url.dn) {
        Ok(dn) => dn,
        Err(_) => return value.to_string(),
    };

    let mut rewritten = LdapUrl {
        scheme: url.scheme,
        host: url.host,
        port: url.port,
        dn: String::new(),
        attributes: Vec::new(),
        scope: None,
        filter: None,
        extensions: Vec::new(),
    }
    .with_dn(relative.join(&remote_dn).to_string());

    if let Some(scope) = scope {
        rewritten = rewritten.with_scope(continuation_scope(scope));
    }
    rewritten.to_string()
}

/// Scope of the continuation search sent to the referred server.
fn continuation_scope(scope: SearchScope) -> SearchScope {
    match scope {
        SearchScope::BaseObject | SearchScope::SingleLevel => SearchScope::BaseObject,
        SearchScope::WholeSubtree => SearchScope::WholeSubtree,
    }
}

impl fmt::Display for ReferralRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urls.join(" "))
    }
}

/// Applies a [`ReferralMode`] against the referral lookup table.
#[derive(Debug, Clone)]
pub struct ReferralPolicy {
    mode: ReferralMode,
    lut: Arc<ReferralLut>,
}

impl ReferralPolicy {
    pub fn new(mode: ReferralMode, lut: Arc<ReferralLut>) -> Self {
        Self { mode, lut }
    }

    pub fn mode(&self) -> ReferralMode {
        self.mode
    }

    pub fn lut(&self) -> &Arc<ReferralLut> {
        &self.lut
    }

    /// Fails with a redirect when `target`, or any of its ancestors, is
    /// a referral. The most senior referral wins over the target itself.
    pub fn check_target(&self, partition: &dyn Partition, target: &Dn) -> Result<()> {
        self.check(partition, target, None)
    }

    pub fn check_search_base(
        &self,
        partition: &dyn Partition,
        base: &Dn,
        scope: SearchScope,
    ) -> Result<()> {
        self.check(partition, base, Some(scope))
    }

    fn check(&self, partition: &dyn Partition, target: &Dn, scope: Option<SearchScope>) -> Result<()> {
        if self.mode == ReferralMode::Ignore {
            return Ok(());
        }

        let referral_dn = match self.lut.farthest_referral_ancestor(target) {
            Some(ancestor) => ancestor,
            None if self.lut.is_referral(target) => target.clone(),
            None => return Ok(()),
        };

        if self.mode == ReferralMode::Follow {
            return Err(LdapMuxError::Unsupported(
                "Following referrals is not implemented".to_string(),
            ));
        }

        let referral = partition.lookup(&referral_dn)?.ok_or_else(|| {
            LdapMuxError::NoSuchObject(format!("Referral {} is not stored", referral_dn))
        })?;
        let redirect = ReferralRedirect::build(&referral, target, scope);
        debug!(
            "Operation on {} redirected by referral {}: {}",
            target, referral_dn, redirect
        );
        Err(LdapMuxError::Referral(redirect))
    }

    /// Wraps a search cursor according to the mode.
    pub fn wrap_cursor(
        &self,
        base: Box<dyn EntryCursor>,
        scope: SearchScope,
    ) -> Result<Box<dyn EntryCursor>> {
        match self.mode {
            ReferralMode::Ignore | ReferralMode::ThrowFindingBase => Ok(base),
            ReferralMode::Throw => Ok(Box::new(ReferralAwareCursor::new(
                base,
                Arc::clone(&self.lut),
                scope,
                true,
            ))),
            ReferralMode::Follow => Err(LdapMuxError::Unsupported(
                "Following referrals in searches is not implemented".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("THROW".parse::<ReferralMode>().unwrap(), ReferralMode::Throw);
        assert_eq!(
            "throw-finding-base".parse::<ReferralMode>().unwrap(),
            ReferralMode::ThrowFindingBase
        );
        assert_eq!(ReferralMode::ThrowFindingBase.to_string(), "throw-finding-base");
        assert!("chase".parse::<ReferralMode>().is_err());
    }

    #[test]
    fn test_redirect_prefixes_relative_rdns() {
        let referral = Entry::referral(
            dn("ou=a,dc=x"),
            vec![
                "ldap://remote:1389/ou=people,o=remote".to_string(),
                "not a url".to_string(),
            ],
        );
        let redirect = ReferralRedirect::build(&referral, &dn("cn=leaf,ou=b,ou=a,dc=x"), None);
        assert_eq!(
            redirect.urls,
            vec![
                "ldap://remote:1389/cn=leaf,ou=b,ou=people,o=remote".to_string(),
                "not a url".to_string(),
            ]
        );
    }

    #[test]
    fn test_redirect_scope_mapping() {
        let referral = Entry::referral(dn("ou=a,dc=x"), vec!["ldap://h/ou=a,o=r".to_string()]);
        let at = |scope| ReferralRedirect::build(&referral, referral.dn(), Some(scope)).urls;

        assert_eq!(at(SearchScope::BaseObject), vec!["ldap://h/ou=a,o=r??base"]);
        assert_eq!(at(SearchScope::SingleLevel), vec!["ldap://h/ou=a,o=r??base"]);
        assert_eq!(at(SearchScope::WholeSubtree), vec!["ldap://h/ou=a,o=r??sub"]);
    }

    #[test]
    fn test_redirect_drops_query_of_stored_url() {
        let referral = Entry::referral(dn("ou=a,dc=x"), vec!["ldap://h/o=r?cn?one?(cn=*)".to_string()]);
        let redirect = ReferralRedirect::build(&referral, &dn("cn=z,ou=a,dc=x"), Some(SearchScope::WholeSubtree));
        assert_eq!(redirect.urls, vec!["ldap://h/cn=z,o=r??sub"]);
        assert_eq!(redirect.to_string(), "ldap://h/cn=z,o=r??sub");
    }
}
