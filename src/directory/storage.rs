use super::cursor::{EntryCursor, ListCursor};
use super::entry::{Entry, Modification};
use crate::dn::Dn;
use crate::ldap::filters::LdapFilter;
use crate::ldap::protocol::SearchScope;
use crate::{LdapMuxError, Result};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Storage backend beneath the interceptor chain.
pub trait Partition: Send + Sync {
    fn suffix(&self) -> &Dn;

    fn add(&self, entry: Entry) -> Result<()>;

    fn delete(&self, dn: &Dn) -> Result<()>;

    /// Applies `modifications` in order and returns the updated entry.
    fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<Entry>;

    fn rename(&self, old_dn: &Dn, new_dn: &Dn) -> Result<()>;

    fn lookup(&self, dn: &Dn) -> Result<Option<Entry>>;

    fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &LdapFilter,
    ) -> Result<Box<dyn EntryCursor>>;

    /// Every entry, parents first.
    fn entries(&self) -> Vec<Entry>;
}

#[derive(Debug, Clone)]
pub struct Directory {
    suffix: Dn,
    entries: Arc<DashMap<String, Entry>>,
}

impl Directory {
    pub fn new(suffix: Dn) -> Self {
        Self {
            suffix,
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, dn: &Dn) -> bool {
        self.entries.contains_key(&dn.normalized())
    }

    fn check_in_suffix(&self, dn: &Dn) -> Result<()> {
        if dn == &self.suffix || dn.is_descendant_of(&self.suffix) {
            Ok(())
        } else {
            Err(LdapMuxError::NoSuchObject(format!(
                "{} is outside the naming context {}",
                dn, self.suffix
            )))
        }
    }

    fn check_parent_exists(&self, dn: &Dn) -> Result<()> {
        if dn == &self.suffix {
            return Ok(());
        }
        match dn.parent() {
            Some(parent) if self.contains(&parent) => Ok(()),
            Some(parent) => Err(LdapMuxError::NoSuchObject(format!(
                "Parent {} of {} does not exist",
                parent, dn
            ))),
            None => Err(LdapMuxError::NoSuchObject("Root DSE is not stored".to_string())),
        }
    }

    fn has_children(&self, dn: &Dn) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.value().dn().is_direct_child_of(dn))
    }

    fn sorted(mut entries: Vec<Entry>) -> Vec<Entry> {
        entries.sort_by_cached_key(|e| (e.dn().len(), e.dn().normalized()));
        entries
    }
}

impl Partition for Directory {
    fn suffix(&self) -> &Dn {
        &self.suffix
    }

    fn add(&self, entry: Entry) -> Result<()> {
        self.check_in_suffix(entry.dn())?;
        self.check_parent_exists(entry.dn())?;

        match self.entries.entry(entry.dn().normalized()) {
            MapEntry::Occupied(_) => Err(LdapMuxError::EntryAlreadyExists(entry.dn().to_string())),
            MapEntry::Vacant(slot) => {
                debug!("Added entry {}", entry.dn());
                slot.insert(entry);
                Ok(())
            }
        }
    }

    fn delete(&self, dn: &Dn) -> Result<()> {
        if !self.contains(dn) {
            return Err(LdapMuxError::NoSuchObject(dn.to_string()));
        }
        if self.has_children(dn) {
            return Err(LdapMuxError::NotAllowedOnNonLeaf(dn.to_string()));
        }
        self.entries.remove(&dn.normalized());
        debug!("Deleted entry {}", dn);
        Ok(())
    }

    fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<Entry> {
        let mut entry = self
            .entries
            .get_mut(&dn.normalized())
            .ok_or_else(|| LdapMuxError::NoSuchObject(dn.to_string()))?;
        for modification in modifications {
            entry.apply(modification);
        }
        Ok(entry.clone())
    }

    fn rename(&self, old_dn: &Dn, new_dn: &Dn) -> Result<()> {
        if !self.contains(old_dn) {
            return Err(LdapMuxError::NoSuchObject(old_dn.to_string()));
        }
        if self.has_children(old_dn) {
            return Err(LdapMuxError::NotAllowedOnNonLeaf(old_dn.to_string()));
        }
        self.check_in_suffix(new_dn)?;
        self.check_parent_exists(new_dn)?;

        let (old_key, mut entry) = self
            .entries
            .remove(&old_dn.normalized())
            .ok_or_else(|| LdapMuxError::NoSuchObject(old_dn.to_string()))?;
        let original_dn = entry.dn().clone();
        entry.set_dn(new_dn.clone());

        // The target slot guard must be released before the old entry is put back.
        let rejected = match self.entries.entry(new_dn.normalized()) {
            MapEntry::Occupied(_) => Some(entry),
            MapEntry::Vacant(slot) => {
                slot.insert(entry);
                None
            }
        };
        if let Some(mut entry) = rejected {
            entry.set_dn(original_dn);
            self.entries.insert(old_key, entry);
            return Err(LdapMuxError::EntryAlreadyExists(new_dn.to_string()));
        }

        debug!("Renamed entry {} to {}", old_dn, new_dn);
        Ok(())
    }

    fn lookup(&self, dn: &Dn) -> Result<Option<Entry>> {
        Ok(self.entries.get(&dn.normalized()).map(|e| e.clone()))
    }

    fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &LdapFilter,
    ) -> Result<Box<dyn EntryCursor>> {
        if !self.contains(base) {
            return Err(LdapMuxError::NoSuchObject(base.to_string()));
        }

        let matches: Vec<Entry> = self
            .entries
            .iter()
            .filter(|entry| {
                let dn = entry.value().dn();
                match scope {
                    SearchScope::BaseObject => dn == base,
                    SearchScope::SingleLevel => dn.is_direct_child_of(base),
                    SearchScope::WholeSubtree => dn == base || dn.is_descendant_of(base),
                }
            })
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        debug!("Search under {} matched {} entries", base, matches.len());
        Ok(Box::new(ListCursor::new(Self::sorted(matches))))
    }

    fn entries(&self) -> Vec<Entry> {
        Self::sorted(self.entries.iter().map(|e| e.value().clone()).collect())
    }
}
