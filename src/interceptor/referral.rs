use super::{Interceptor, Next, SearchParams};
use crate::directory::{Entry, EntryCursor, Modification};
use crate::dn::Dn;
use crate::referral::{ReferralLut, ReferralMode, ReferralPolicy};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Applies the referral policy and keeps the lookup table in step with
/// the partition.
///
/// The table is only touched after the partition accepted a change.
pub struct ReferralInterceptor {
    policy: ReferralPolicy,
}

impl ReferralInterceptor {
    pub fn new(mode: ReferralMode, lut: Arc<ReferralLut>) -> Self {
        Self {
            policy: ReferralPolicy::new(mode, lut),
        }
    }

    pub fn policy(&self) -> &ReferralPolicy {
        &self.policy
    }

    fn lut(&self) -> &ReferralLut {
        self.policy.lut()
    }
}

impl Interceptor for ReferralInterceptor {
    fn name(&self) -> &str {
        "referralInterceptor"
    }

    fn add(&self, next: Next<'_>, entry: Entry) -> Result<()> {
        self.policy.check_target(next.partition(), entry.dn())?;

        let dn = entry.dn().clone();
        let is_referral = entry.is_referral();
        next.add(entry)?;

        if is_referral {
            self.lut().referral_added(&dn);
        }
        Ok(())
    }

    fn delete(&self, next: Next<'_>, dn: &Dn) -> Result<()> {
        self.policy.check_target(next.partition(), dn)?;
        next.delete(dn)?;
        self.lut().referral_deleted(dn);
        Ok(())
    }

    fn modify(&self, next: Next<'_>, dn: &Dn, modifications: &[Modification]) -> Result<Entry> {
        self.policy.check_target(next.partition(), dn)?;

        let was_referral = self.lut().is_referral(dn);
        let updated = next.modify(dn, modifications)?;

        match (was_referral, updated.is_referral()) {
            (false, true) => self.lut().referral_added(dn),
            (true, false) => self.lut().referral_deleted(dn),
            _ => {}
        }
        Ok(updated)
    }

    fn rename(&self, next: Next<'_>, dn: &Dn, new_rdn: &str) -> Result<Dn> {
        self.policy.check_target(next.partition(), dn)?;

        let new_dn = next.rename(dn, new_rdn)?;
        if self.lut().is_referral(dn) {
            self.lut().referral_changed(dn, &new_dn);
        }
        Ok(new_dn)
    }

    fn move_entry(&self, next: Next<'_>, dn: &Dn, new_parent: &Dn) -> Result<Dn> {
        self.policy.check_target(next.partition(), dn)?;
        self.policy.check_target(next.partition(), new_parent)?;

        let new_dn = next.move_entry(dn, new_parent)?;
        if self.lut().is_referral(dn) {
            self.lut().referral_changed(dn, &new_dn);
        }
        Ok(new_dn)
    }

    fn lookup(&self, next: Next<'_>, dn: &Dn) -> Result<Option<Entry>> {
        self.policy.check_target(next.partition(), dn)?;
        next.lookup(dn)
    }

    fn search(&self, next: Next<'_>, params: &SearchParams) -> Result<Box<dyn EntryCursor>> {
        self.policy
            .check_search_base(next.partition(), &params.base, params.scope)?;

        let cursor = next.search(params)?;
        debug!(
            "Search under {} wrapped for referral mode {}",
            params.base,
            self.policy.mode()
        );
        self.policy.wrap_cursor(cursor, params.scope)
    }
}
