//! LDAP URLs: `scheme://host[:port]/dn?attributes?scope?filter?extensions`.

use crate::ldap::protocol::SearchScope;
use crate::{LdapMuxError, Result};
use std::fmt;
use std::str::FromStr;

const SCHEMES: [&str; 3] = ["ldap", "ldaps", "ldapi"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub dn: String,
    pub attributes: Vec<String>,
    pub scope: Option<SearchScope>,
    pub filter: Option<String>,
    pub extensions: Vec<String>,
}

impl LdapUrl {
    /// Whether `value` starts with a scheme this module understands.
    pub fn is_ldap_url(value: &str) -> bool {
        match value.split_once("://") {
            Some((scheme, _)) => SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()),
            None => false,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| LdapMuxError::InvalidUrl(format!("{}: {}", reason, input));

        let (scheme, rest) = input
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let scheme = scheme.to_ascii_lowercase();
        if !SCHEMES.contains(&scheme.as_str()) {
            return Err(invalid("unsupported scheme"));
        }

        let (hostport, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };
        let (host, port) = parse_hostport(hostport).ok_or_else(|| invalid("bad host or port"))?;

        let mut url = LdapUrl {
            scheme,
            host,
            port,
            dn: String::new(),
            attributes: Vec::new(),
            scope: None,
            filter: None,
            extensions: Vec::new(),
        };

        let Some(path) = path else {
            return Ok(url);
        };

        let mut parts = path.splitn(5, '?');
        url.dn = percent_decode(parts.next().unwrap_or_default())
            .ok_or_else(|| invalid("bad escape in DN"))?;

        if let Some(attributes) = parts.next() {
            url.attributes = attributes
                .split(',')
                .filter(|a| !a.is_empty())
                .map(|a| percent_decode(a).ok_or_else(|| invalid("bad escape in attributes")))
                .collect::<Result<_>>()?;
        }

        if let Some(scope) = parts.next() {
            url.scope = match scope.to_ascii_lowercase().as_str() {
                "" => None,
                "base" => Some(SearchScope::BaseObject),
                "one" => Some(SearchScope::SingleLevel),
                "sub" => Some(SearchScope::WholeSubtree),
                _ => return Err(invalid("unknown scope")),
            };
        }

        if let Some(filter) = parts.next() {
            if !filter.is_empty() {
                url.filter =
                    Some(percent_decode(filter).ok_or_else(|| invalid("bad escape in filter"))?);
            }
        }

        if let Some(extensions) = parts.next() {
            url.extensions = extensions
                .split(',')
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(url)
    }

    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = dn.into();
        self
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if self.host.contains(':') && self.scheme != "ldapi" {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "/{}", percent_encode(&self.dn))?;

        let query = [
            self.attributes.join(","),
            self.scope.map(scope_token).unwrap_or_default().to_string(),
            self.filter.as_deref().map(percent_encode).unwrap_or_default(),
            self.extensions.join(","),
        ];
        if let Some(last) = query.iter().rposition(|part| !part.is_empty()) {
            for part in &query[..=last] {
                write!(f, "?{}", part)?;
            }
        }
        Ok(())
    }
}

impl FromStr for LdapUrl {
    type Err = LdapMuxError;

    fn from_str(s: &str) -> Result<Self> {
        LdapUrl::parse(s)
    }
}

fn scope_token(scope: SearchScope) -> &'static str {
    match scope {
        SearchScope::BaseObject => "base",
        SearchScope::SingleLevel => "one",
        SearchScope::WholeSubtree => "sub",
    }
}

fn parse_hostport(hostport: &str) -> Option<(String, Option<u16>)> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(port) => Some(port.parse().ok()?),
            None if after.is_empty() => None,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match hostport.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), Some(port.parse().ok()?))),
        None => Some((hostport.to_string(), None)),
    }
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~=,+;:@!$&'()*/".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
