use crate::directory::Entry;
use crate::dn::Dn;
use crate::Result;
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// The set of DNs that are currently referral entries.
///
/// Lookups take the read lock, the maintenance hooks the write lock. The
/// set holds no cross-entry invariant, so a lock poisoned by a panicking
/// writer is taken over as is.
#[derive(Debug, Default)]
pub struct ReferralLut {
    referrals: RwLock<HashSet<Dn>>,
}

impl ReferralLut {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashSet<Dn>> {
        self.referrals.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<Dn>> {
        self.referrals.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_referral(&self, dn: &Dn) -> bool {
        self.read().contains(dn)
    }

    /// The most senior proper ancestor of `dn` that is a referral.
    pub fn farthest_referral_ancestor(&self, dn: &Dn) -> Option<Dn> {
        let referrals = self.read();
        if referrals.is_empty() {
            return None;
        }
        dn.ancestors().find(|ancestor| referrals.contains(ancestor))
    }

    pub fn referral_added(&self, dn: &Dn) {
        if self.write().insert(dn.clone()) {
            debug!("Referral {} added to lookup table", dn);
        }
    }

    pub fn referral_deleted(&self, dn: &Dn) {
        if self.write().remove(dn) {
            debug!("Referral {} removed from lookup table", dn);
        }
    }

    /// Moves a referral from `old_dn` to `new_dn` in one step.
    pub fn referral_changed(&self, old_dn: &Dn, new_dn: &Dn) {
        let mut referrals = self.write();
        referrals.remove(old_dn);
        referrals.insert(new_dn.clone());
        debug!("Referral {} is now {}", old_dn, new_dn);
    }

    pub fn referral_renamed(&self, old_dn: &Dn, new_rdn: &str) -> Result<()> {
        let parent = old_dn.parent().unwrap_or_default();
        let new_dn = parent.child(new_rdn)?;
        self.referral_changed(old_dn, &new_dn);
        Ok(())
    }

    pub fn referral_moved(&self, old_dn: &Dn, new_parent: &Dn) -> Result<()> {
        let new_dn = match old_dn.rdn() {
            Some(rdn) => new_parent.child(rdn)?,
            None => new_parent.clone(),
        };
        self.referral_changed(old_dn, &new_dn);
        Ok(())
    }

    /// Replaces the table with the referrals among `entries`.
    pub fn rebuild<'a>(&self, entries: impl IntoIterator<Item = &'a Entry>) {
        let fresh: HashSet<Dn> = entries
            .into_iter()
            .filter(|entry| entry.is_referral())
            .map(|entry| entry.dn().clone())
            .collect();
        debug!("Referral lookup table rebuilt with {} entries", fresh.len());
        *self.write() = fresh;
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
