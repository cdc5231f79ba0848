use crate::dn::Dn;
use crate::ldap::protocol::{BindAuthentication, Control, DerefAliases};
use crate::ldap::{parse_ldap_filter, LdapProtocolOp, SearchScope};
use crate::Result;
use std::time::Duration;

const LDAP_VERSION: u8 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct BindRequest {
    pub name: String,
    pub authentication: BindAuthentication,
    /// Caps the connection timeout for this bind.
    pub timeout: Option<Duration>,
    pub controls: Vec<Control>,
}

impl BindRequest {
    pub fn simple(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authentication: BindAuthentication::Simple(password.into()),
            timeout: None,
            controls: Vec::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::simple("", "")
    }

    pub fn sasl(
        name: impl Into<String>,
        mechanism: impl Into<String>,
        credentials: Option<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            authentication: BindAuthentication::Sasl {
                mechanism: mechanism.into(),
                credentials,
            },
            timeout: None,
            controls: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    pub(crate) fn to_protocol_op(&self) -> Result<LdapProtocolOp> {
        Dn::parse(&self.name)?;
        Ok(LdapProtocolOp::BindRequest {
            version: LDAP_VERSION,
            dn: self.name.clone(),
            authentication: self.authentication.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
    pub deref_aliases: DerefAliases,
    pub size_limit: u32,
    pub time_limit: u32,
    pub types_only: bool,
    /// Caps the connection timeout for each response of this search.
    pub timeout: Option<Duration>,
    pub controls: Vec<Control>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, filter: impl Into<String>, scope: SearchScope) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            deref_aliases: DerefAliases::NeverDerefAliases,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            timeout: None,
            controls: Vec::new(),
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_size_limit(mut self, size_limit: u32) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn with_time_limit(mut self, time_limit: u32) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_deref_aliases(mut self, deref_aliases: DerefAliases) -> Self {
        self.deref_aliases = deref_aliases;
        self
    }

    pub fn types_only(mut self) -> Self {
        self.types_only = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    pub(crate) fn to_protocol_op(&self) -> Result<LdapProtocolOp> {
        Dn::parse(&self.base)?;
        let filter = parse_ldap_filter(&self.filter)?;
        Ok(LdapProtocolOp::SearchRequest {
            base_dn: self.base.clone(),
            scope: self.scope,
            deref_aliases: self.deref_aliases,
            size_limit: self.size_limit,
            time_limit: self.time_limit,
            types_only: self.types_only,
            filter,
            attributes: self.attributes.clone(),
        })
    }
}
