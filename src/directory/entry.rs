use crate::dn::Dn;
use std::collections::{BTreeMap, HashMap};

pub const REFERRAL_OBJECT_CLASS: &str = "referral";
pub const REF_ATTRIBUTE: &str = "ref";

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    dn: Dn,
    // keyed by lowercased attribute name
    attributes: BTreeMap<String, Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Modification {
    Add(String, Vec<String>),
    Delete(String, Vec<String>),
    Replace(String, Vec<String>),
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: BTreeMap::new(),
        }
    }

    /// A `referral` entry whose `ref` attribute holds `urls`.
    pub fn referral(dn: Dn, urls: Vec<String>) -> Self {
        Entry::new(dn)
            .with_attribute("objectClass", vec!["top", REFERRAL_OBJECT_CLASS])
            .with_attribute(REF_ATTRIBUTE, urls)
    }

    pub fn with_attribute<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        for value in values {
            self.add_value(name, value);
        }
        self
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    pub fn add_value(&mut self, name: &str, value: impl Into<String>) {
        let attribute = self
            .attributes
            .entry(name.to_lowercase())
            .or_insert_with(|| Attribute {
                name: name.to_string(),
                values: Vec::new(),
            });
        let value = value.into();
        if !attribute.values.contains(&value) {
            attribute.values.push(value);
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(&name.to_lowercase())
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.attribute(name).map(|a| a.values.as_slice()).unwrap_or(&[])
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(&name.to_lowercase())
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn has_object_class(&self, object_class: &str) -> bool {
        self.values("objectClass")
            .iter()
            .any(|oc| oc.eq_ignore_ascii_case(object_class))
    }

    /// An entry is a referral when it has the `referral` object class and
    /// at least one `ref` value.
    pub fn is_referral(&self) -> bool {
        self.has_object_class(REFERRAL_OBJECT_CLASS) && !self.values(REF_ATTRIBUTE).is_empty()
    }

    pub fn referral_urls(&self) -> &[String] {
        self.values(REF_ATTRIBUTE)
    }

    pub fn apply(&mut self, modification: &Modification) {
        match modification {
            Modification::Add(name, values) => {
                for value in values {
                    self.add_value(name, value.clone());
                }
            }
            Modification::Delete(name, values) => {
                let key = name.to_lowercase();
                if values.is_empty() {
                    self.attributes.remove(&key);
                } else if let Some(attribute) = self.attributes.get_mut(&key) {
                    attribute
                        .values
                        .retain(|v| !values.iter().any(|d| d.eq_ignore_ascii_case(v)));
                    if attribute.values.is_empty() {
                        self.attributes.remove(&key);
                    }
                }
            }
            Modification::Replace(name, values) => {
                self.attributes.remove(&name.to_lowercase());
                for value in values {
                    self.add_value(name, value.clone());
                }
            }
        }
    }

    /// Attributes as sent in a search result entry. An empty selection or
    /// `*` returns every attribute.
    pub fn to_attribute_map(&self, selection: &[String]) -> HashMap<String, Vec<String>> {
        let all = selection.is_empty() || selection.iter().any(|a| a == "*");
        self.attributes
            .iter()
            .filter(|(key, _)| all || selection.iter().any(|s| s.eq_ignore_ascii_case(key)))
            .map(|(_, attribute)| (attribute.name.clone(), attribute.values.clone()))
            .collect()
    }
}
