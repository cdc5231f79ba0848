use crate::{LdapMuxError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A distinguished name, stored leaf first.
///
/// Each RDN keeps the spelling it was parsed with for display, and a
/// normalized form (lowercased, whitespace trimmed, multi-valued RDN
/// components sorted) that equality and hashing use.
#[derive(Debug, Clone, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

#[derive(Debug, Clone)]
struct Rdn {
    raw: String,
    normalized: String,
}

impl Rdn {
    fn parse(input: &str, dn: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(LdapMuxError::InvalidDn(format!("empty RDN in '{}'", dn)));
        }

        let mut raw_parts = Vec::new();
        let mut normalized_parts = Vec::new();
        for component in split_unescaped(input, '+')? {
            let eq_pos = find_unescaped(component, '=').ok_or_else(|| {
                LdapMuxError::InvalidDn(format!("RDN '{}' has no '=' in '{}'", component, dn))
            })?;
            let attr = component[..eq_pos].trim();
            let value = component[eq_pos + 1..].trim();
            if attr.is_empty() {
                return Err(LdapMuxError::InvalidDn(format!(
                    "RDN '{}' has an empty attribute type in '{}'",
                    component, dn
                )));
            }
            raw_parts.push(format!("{}={}", attr, value));
            normalized_parts.push(format!("{}={}", attr.to_lowercase(), value.to_lowercase()));
        }
        normalized_parts.sort();

        Ok(Rdn {
            raw: raw_parts.join("+"),
            normalized: normalized_parts.join("+"),
        })
    }
}

impl Dn {
    /// The empty DN (root DSE).
    pub fn root() -> Self {
        Dn { rdns: Vec::new() }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Dn::root());
        }

        let rdns = split_unescaped(trimmed, ',')?
            .into_iter()
            .map(|raw| Rdn::parse(raw, input))
            .collect::<Result<Vec<_>>>()?;

        Ok(Dn { rdns })
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The leaf RDN as written.
    pub fn rdn(&self) -> Option<&str> {
        self.rdns.first().map(|rdn| rdn.raw.as_str())
    }

    pub fn rdns(&self) -> impl Iterator<Item = &str> {
        self.rdns.iter().map(|rdn| rdn.raw.as_str())
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// The ancestor made of the last `len` RDNs.
    pub fn suffix(&self, len: usize) -> Dn {
        let len = len.min(self.rdns.len());
        Dn {
            rdns: self.rdns[self.rdns.len() - len..].to_vec(),
        }
    }

    /// Proper ancestors, most senior (closest to the root) first.
    pub fn ancestors(&self) -> impl Iterator<Item = Dn> + '_ {
        (1..self.rdns.len()).map(move |len| self.suffix(len))
    }

    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        self.rdns.len() > ancestor.rdns.len() && self.ends_with(ancestor)
    }

    pub fn is_direct_child_of(&self, parent: &Dn) -> bool {
        self.rdns.len() == parent.rdns.len() + 1 && self.ends_with(parent)
    }

    fn ends_with(&self, suffix: &Dn) -> bool {
        let offset = match self.rdns.len().checked_sub(suffix.rdns.len()) {
            Some(offset) => offset,
            None => return false,
        };
        self.rdns[offset..]
            .iter()
            .zip(&suffix.rdns)
            .all(|(a, b)| a.normalized == b.normalized)
    }

    /// The leading RDNs by which `self` lies below `ancestor`.
    ///
    /// Returns the root DN when both are equal and `None` when `ancestor`
    /// is neither `self` nor one of its ancestors.
    pub fn relative_to(&self, ancestor: &Dn) -> Option<Dn> {
        if !self.ends_with(ancestor) {
            return None;
        }
        Some(Dn {
            rdns: self.rdns[..self.rdns.len() - ancestor.rdns.len()].to_vec(),
        })
    }

    /// `self` placed in front of `suffix`.
    pub fn join(&self, suffix: &Dn) -> Dn {
        let mut rdns = self.rdns.clone();
        rdns.extend(suffix.rdns.iter().cloned());
        Dn { rdns }
    }

    pub fn child(&self, rdn: &str) -> Result<Dn> {
        if find_unescaped(rdn, ',').is_some() {
            return Err(LdapMuxError::InvalidDn(format!("'{}' is not a single RDN", rdn)));
        }
        let rdn = Rdn::parse(rdn, rdn)?;
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Ok(Dn { rdns })
    }

    pub fn normalized(&self) -> String {
        self.rdns
            .iter()
            .map(|rdn| rdn.normalized.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len() && self.ends_with(other)
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for rdn in &self.rdns {
            rdn.normalized.hash(state);
        }
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&rdn.raw)?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = LdapMuxError;

    fn from_str(s: &str) -> Result<Self> {
        Dn::parse(s)
    }
}

fn split_unescaped(input: &str, separator: char) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (i, ch) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == separator {
            parts.push(&input[start..i]);
            start = i + ch.len_utf8();
        }
    }

    if escaped {
        return Err(LdapMuxError::InvalidDn(format!(
            "trailing escape character in '{}'",
            input
        )));
    }

    parts.push(&input[start..]);
    Ok(parts)
}

fn find_unescaped(input: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (i, ch) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == target {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let parsed = dn("cn=John Doe, ou=Users ,dc=Example,dc=com");
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed.to_string(), "cn=John Doe,ou=Users,dc=Example,dc=com");
        assert_eq!(parsed.normalized(), "cn=john doe,ou=users,dc=example,dc=com");
        assert_eq!(parsed.rdn(), Some("cn=John Doe"));
    }

    #[test]
    fn test_equality_ignores_case_and_spacing() {
        assert_eq!(dn("CN=Admin,DC=Example,DC=Com"), dn("cn=admin, dc=example, dc=com"));
        assert_ne!(dn("cn=admin,dc=example,dc=com"), dn("cn=admin,dc=example"));
    }

    #[test]
    fn test_escaped_comma_stays_in_value() {
        let parsed = dn(r"cn=Doe\, John,dc=example,dc=com");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.rdn(), Some(r"cn=Doe\, John"));
    }

    #[test]
    fn test_multi_valued_rdn_order_is_irrelevant() {
        assert_eq!(dn("cn=a+sn=b,dc=x"), dn("sn=b+cn=a,dc=x"));
    }

    #[test]
    fn test_invalid_dns() {
        assert!(matches!(Dn::parse("cn=a,,dc=x"), Err(LdapMuxError::InvalidDn(_))));
        assert!(matches!(Dn::parse("novalue,dc=x"), Err(LdapMuxError::InvalidDn(_))));
        assert!(matches!(Dn::parse("=x,dc=x"), Err(LdapMuxError::InvalidDn(_))));
        assert!(matches!(Dn::parse(r"cn=a\"), Err(LdapMuxError::InvalidDn(_))));
    }

    #[test]
    fn test_root_dn() {
        let root = dn("");
        assert!(root.is_root());
        assert_eq!(root.parent(), None);
        assert_eq!(root.to_string(), "");
    }

    #[test]
    fn test_ancestors_most_senior_first() {
        let leaf = dn("cn=leaf,ou=b,ou=a,dc=x");
        let ancestors: Vec<String> = leaf.ancestors().map(|a| a.to_string()).collect();
        assert_eq!(ancestors, vec!["dc=x", "ou=a,dc=x", "ou=b,ou=a,dc=x"]);
    }

    #[test]
    fn test_descendant_relationships() {
        let base = dn("ou=users,dc=example,dc=com");
        let child = dn("uid=john,ou=users,dc=example,dc=com");
        let grandchild = dn("cn=x,uid=john,ou=users,dc=example,dc=com");

        assert!(child.is_descendant_of(&base));
        assert!(child.is_direct_child_of(&base));
        assert!(grandchild.is_descendant_of(&base));
        assert!(!grandchild.is_direct_child_of(&base));
        assert!(!base.is_descendant_of(&base));
    }

    #[test]
    fn test_relative_to_and_join() {
        let target = dn("cn=leaf,ou=b,ou=a,dc=x");
        let referral = dn("ou=a,dc=x");
        let relative = target.relative_to(&referral).unwrap();
        assert_eq!(relative.to_string(), "cn=leaf,ou=b");
        assert!(target.relative_to(&dn("ou=z,dc=x")).is_none());
        assert!(referral.relative_to(&referral).unwrap().is_root());

        let remote = dn("ou=people,o=remote");
        assert_eq!(relative.join(&remote).to_string(), "cn=leaf,ou=b,ou=people,o=remote");
    }

    #[test]
    fn test_child_and_parent() {
        let parent = dn("dc=example,dc=com");
        let child = parent.child("ou=Groups").unwrap();
        assert_eq!(child.to_string(), "ou=Groups,dc=example,dc=com");
        assert_eq!(child.parent().unwrap(), parent);
    }
}
