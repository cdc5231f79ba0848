use crate::directory::entry::Entry;
use crate::{LdapMuxError, Result};
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LdapFilter {
    Present(String),                    // (attr=*)
    Equality(String, String),           // (attr=value)
    Substring(String, SubstringFilter), // (attr=*value*)
    GreaterOrEqual(String, String),     // (attr>=value)
    LessOrEqual(String, String),        // (attr<=value)
    Approximate(String, String),        // (attr~=value)
    Extensible(ExtensibleFilter),       // (attr:dn:rule:=value)
    And(Vec<LdapFilter>),               // (&(f1)(f2))
    Or(Vec<LdapFilter>),                // (|(f1)(f2))
    Not(Box<LdapFilter>),               // (!(f))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstringFilter {
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub final_: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensibleFilter {
    pub attribute: Option<String>,
    pub matching_rule: Option<String>,
    pub value: String,
    pub dn_attributes: bool,
}

impl LdapFilter {
    /// `(objectClass=*)`, the filter that matches every entry.
    pub fn match_all() -> Self {
        LdapFilter::Present("objectClass".to_string())
    }

    pub fn parse(filter_str: &str) -> Result<Self> {
        parse_ldap_filter(filter_str)
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            LdapFilter::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass") || entry.has_attribute(attr)
            }

            LdapFilter::Equality(attr, value) => entry
                .values(attr)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),

            LdapFilter::Substring(attr, substring) => {
                entry.values(attr).iter().any(|v| substring.matches(v))
            }

            LdapFilter::GreaterOrEqual(attr, value) => {
                entry.values(attr).iter().any(|v| v.as_str() >= value.as_str())
            }

            LdapFilter::LessOrEqual(attr, value) => {
                entry.values(attr).iter().any(|v| v.as_str() <= value.as_str())
            }

            LdapFilter::Approximate(attr, value) => entry
                .values(attr)
                .iter()
                .any(|v| approximate_match(v, value)),

            LdapFilter::Extensible(extensible) => extensible.matches(entry),

            LdapFilter::And(filters) => filters.iter().all(|f| f.matches(entry)),

            LdapFilter::Or(filters) => filters.iter().any(|f| f.matches(entry)),

            LdapFilter::Not(filter) => !filter.matches(entry),
        }
    }
}

impl fmt::Display for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdapFilter::Present(attr) => write!(f, "({}=*)", attr),
            LdapFilter::Equality(attr, value) => write!(f, "({}={})", attr, escape_filter_value(value)),
            LdapFilter::Substring(attr, substring) => {
                write!(f, "({}=", attr)?;
                if let Some(initial) = &substring.initial {
                    f.write_str(&escape_filter_value(initial))?;
                }
                f.write_str("*")?;
                for any in &substring.any {
                    write!(f, "{}*", escape_filter_value(any))?;
                }
                if let Some(final_) = &substring.final_ {
                    f.write_str(&escape_filter_value(final_))?;
                }
                f.write_str(")")
            }
            LdapFilter::GreaterOrEqual(attr, value) => {
                write!(f, "({}>={})", attr, escape_filter_value(value))
            }
            LdapFilter::LessOrEqual(attr, value) => {
                write!(f, "({}<={})", attr, escape_filter_value(value))
            }
            LdapFilter::Approximate(attr, value) => {
                write!(f, "({}~={})", attr, escape_filter_value(value))
            }
            LdapFilter::Extensible(ext) => {
                f.write_str("(")?;
                if let Some(attr) = &ext.attribute {
                    f.write_str(attr)?;
                }
                if ext.dn_attributes {
                    f.write_str(":dn")?;
                }
                if let Some(rule) = &ext.matching_rule {
                    write!(f, ":{}", rule)?;
                }
                write!(f, ":={})", escape_filter_value(&ext.value))
            }
            LdapFilter::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            LdapFilter::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            LdapFilter::Not(filter) => write!(f, "(!{})", filter),
        }
    }
}

impl std::str::FromStr for LdapFilter {
    type Err = LdapMuxError;

    fn from_str(s: &str) -> Result<Self> {
        parse_ldap_filter(s)
    }
}

impl SubstringFilter {
    pub fn matches(&self, value: &str) -> bool {
        let mut pattern = String::new();

        if let Some(initial) = &self.initial {
            pattern.push_str(&regex::escape(initial));
        }
        pattern.push_str(".*");

        for any in &self.any {
            pattern.push_str(&regex::escape(any));
            pattern.push_str(".*");
        }

        if let Some(final_) = &self.final_ {
            pattern.push_str(&regex::escape(final_));
        }

        match Regex::new(&format!("(?is)^{}$", pattern)) {
            Ok(re) => re.is_match(value),
            Err(_) => false,
        }
    }
}

impl ExtensibleFilter {
    pub fn matches(&self, entry: &Entry) -> bool {
        let attribute_match = match &self.attribute {
            Some(attr) => entry.values(attr).iter().any(|v| self.matches_value(v)),
            None => false,
        };
        attribute_match || (self.dn_attributes && self.matches_dn_components(entry))
    }

    fn matches_value(&self, value: &str) -> bool {
        match self.matching_rule.as_deref() {
            Some("2.5.13.5") | Some("caseExactMatch") => value == self.value,
            _ => value.eq_ignore_ascii_case(&self.value),
        }
    }

    fn matches_dn_components(&self, entry: &Entry) -> bool {
        entry.dn().rdns().flat_map(|rdn| rdn.split('+')).any(|component| {
            match component.split_once('=') {
                Some((attr, value)) => {
                    let attr_ok = self
                        .attribute
                        .as_deref()
                        .map_or(true, |wanted| wanted.eq_ignore_ascii_case(attr.trim()));
                    attr_ok && self.matches_value(value.trim())
                }
                None => false,
            }
        })
    }
}

// Case-insensitive containment; no phonetic algorithm.
fn approximate_match(value: &str, pattern: &str) -> bool {
    value.to_lowercase().contains(&pattern.to_lowercase())
}

fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape_filter_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(byte) = value
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    // Escapes that do not form valid UTF-8 are kept as written
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

pub fn parse_ldap_filter(filter_str: &str) -> Result<LdapFilter> {
    let filter_str = filter_str.trim();

    if filter_str.is_empty() {
        return Err(LdapMuxError::InvalidFilter("Empty filter string".to_string()));
    }

    if !filter_str.starts_with('(') || !filter_str.ends_with(')') {
        return Err(LdapMuxError::InvalidFilter(format!(
            "Filter must be wrapped in parentheses: {}",
            filter_str
        )));
    }

    let inner = &filter_str[1..filter_str.len() - 1];

    if let Some(rest) = inner.strip_prefix('&') {
        return Ok(LdapFilter::And(parse_composite_filters(rest)?));
    } else if let Some(rest) = inner.strip_prefix('|') {
        return Ok(LdapFilter::Or(parse_composite_filters(rest)?));
    } else if let Some(rest) = inner.strip_prefix('!') {
        let mut filters = parse_composite_filters(rest)?;
        if filters.len() != 1 {
            return Err(LdapMuxError::InvalidFilter(format!(
                "NOT takes exactly one filter: {}",
                filter_str
            )));
        }
        return Ok(LdapFilter::Not(Box::new(filters.remove(0))));
    }

    if inner.contains('(') || inner.contains(')') {
        return Err(LdapMuxError::InvalidFilter(format!(
            "Unbalanced parentheses in filter: {}",
            filter_str
        )));
    }

    if let Some(attr) = inner.strip_suffix("=*") {
        if !attr.is_empty() && !attr.ends_with(['~', '>', '<', ':']) {
            return Ok(LdapFilter::Present(attr.to_string()));
        }
    }

    if let Some(ext_pos) = inner.find(":=") {
        return parse_extensible_filter(inner, ext_pos);
    }

    let simple = |pos: usize, op_len: usize| -> Result<(String, String)> {
        let attr = inner[..pos].trim();
        if attr.is_empty() {
            return Err(LdapMuxError::InvalidFilter(format!(
                "Missing attribute in filter: {}",
                filter_str
            )));
        }
        Ok((attr.to_string(), inner[pos + op_len..].to_string()))
    };

    if let Some(pos) = inner.find("~=") {
        let (attr, value) = simple(pos, 2)?;
        return Ok(LdapFilter::Approximate(attr, unescape_filter_value(&value)));
    }
    if let Some(pos) = inner.find(">=") {
        let (attr, value) = simple(pos, 2)?;
        return Ok(LdapFilter::GreaterOrEqual(attr, unescape_filter_value(&value)));
    }
    if let Some(pos) = inner.find("<=") {
        let (attr, value) = simple(pos, 2)?;
        return Ok(LdapFilter::LessOrEqual(attr, unescape_filter_value(&value)));
    }
    if let Some(pos) = inner.find('=') {
        let (attr, value) = simple(pos, 1)?;

        if value.contains('*') {
            let parts: Vec<&str> = value.split('*').collect();
            let last = parts.len() - 1;
            let non_empty = |s: &str| (!s.is_empty()).then(|| unescape_filter_value(s));
            let substring = SubstringFilter {
                initial: non_empty(parts[0]),
                any: parts[1..last]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .map(|s| unescape_filter_value(s))
                    .collect(),
                final_: non_empty(parts[last]),
            };
            return Ok(LdapFilter::Substring(attr, substring));
        }

        return Ok(LdapFilter::Equality(attr, unescape_filter_value(&value)));
    }

    Err(LdapMuxError::InvalidFilter(format!(
        "Invalid filter format: {}",
        filter_str
    )))
}

// [attr][:dn][:matchingRule]:=value
fn parse_extensible_filter(filter_str: &str, ext_pos: usize) -> Result<LdapFilter> {
    let left_part = &filter_str[..ext_pos];
    let value = unescape_filter_value(&filter_str[ext_pos + 2..]);

    let mut attribute = None;
    let mut matching_rule = None;
    let mut dn_attributes = false;

    for (i, part) in left_part.split(':').enumerate() {
        if part.is_empty() {
            continue;
        }
        if part.eq_ignore_ascii_case("dn") {
            dn_attributes = true;
        } else if i == 0 {
            attribute = Some(part.to_string());
        } else {
            matching_rule = Some(part.to_string());
        }
    }

    if attribute.is_none() && matching_rule.is_none() {
        return Err(LdapMuxError::InvalidFilter(format!(
            "Extensible filter needs an attribute or a matching rule: {}",
            filter_str
        )));
    }

    Ok(LdapFilter::Extensible(ExtensibleFilter {
        attribute,
        matching_rule,
        value,
        dn_attributes,
    }))
}

fn parse_composite_filters(s: &str) -> Result<Vec<LdapFilter>> {
    let mut filters = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        match ch {
            '(' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err(LdapMuxError::InvalidFilter(
                        "Unbalanced parentheses in filter".to_string(),
                    ));
                }
                depth -= 1;
                if depth == 0 {
                    filters.push(parse_ldap_filter(&s[start..=i])?);
                }
            }
            c if depth == 0 && !c.is_whitespace() => {
                return Err(LdapMuxError::InvalidFilter(format!(
                    "Unexpected '{}' between filter components",
                    c
                )));
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(LdapMuxError::InvalidFilter(
            "Unbalanced parentheses in filter".to_string(),
        ));
    }
    if filters.is_empty() {
        return Err(LdapMuxError::InvalidFilter(
            "Composite filter without components".to_string(),
        ));
    }

    Ok(filters)
}
