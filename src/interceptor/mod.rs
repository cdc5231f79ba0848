//! Ordered interceptors in front of a partition.
//!
//! Every operation enters the chain at the first interceptor. Each
//! interceptor gets a [`Next`] that stands for the rest of the chain and
//! decides whether, and with which arguments, to call it. The partition
//! sits behind the last interceptor.

pub mod referral;

use crate::directory::{Entry, EntryCursor, Modification, Partition};
use crate::dn::Dn;
use crate::ldap::filters::LdapFilter;
use crate::ldap::protocol::SearchScope;
use crate::Result;
use std::sync::Arc;

pub use referral::ReferralInterceptor;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub base: Dn,
    pub scope: SearchScope,
    pub filter: LdapFilter,
}

impl SearchParams {
    pub fn new(base: Dn, scope: SearchScope, filter: LdapFilter) -> Self {
        Self { base, scope, filter }
    }
}

pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    fn add(&self, next: Next<'_>, entry: Entry) -> Result<()> {
        next.add(entry)
    }

    fn delete(&self, next: Next<'_>, dn: &Dn) -> Result<()> {
        next.delete(dn)
    }

    fn modify(&self, next: Next<'_>, dn: &Dn, modifications: &[Modification]) -> Result<Entry> {
        next.modify(dn, modifications)
    }

    /// Returns the entry's new DN.
    fn rename(&self, next: Next<'_>, dn: &Dn, new_rdn: &str) -> Result<Dn> {
        next.rename(dn, new_rdn)
    }

    /// Returns the entry's new DN.
    fn move_entry(&self, next: Next<'_>, dn: &Dn, new_parent: &Dn) -> Result<Dn> {
        next.move_entry(dn, new_parent)
    }

    fn lookup(&self, next: Next<'_>, dn: &Dn) -> Result<Option<Entry>> {
        next.lookup(dn)
    }

    fn search(&self, next: Next<'_>, params: &SearchParams) -> Result<Box<dyn EntryCursor>> {
        next.search(params)
    }
}

/// The remainder of a chain, ending in the partition.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Interceptor>],
    partition: &'a dyn Partition,
}

impl<'a> Next<'a> {
    pub fn partition(&self) -> &'a dyn Partition {
        self.partition
    }

    fn split(self) -> Option<(&'a Arc<dyn Interceptor>, Next<'a>)> {
        let (first, rest) = self.chain.split_first()?;
        Some((
            first,
            Next {
                chain: rest,
                partition: self.partition,
            },
        ))
    }

    pub fn add(self, entry: Entry) -> Result<()> {
        match self.split() {
            Some((interceptor, next)) => interceptor.add(next, entry),
            None => self.partition.add(entry),
        }
    }

    pub fn delete(self, dn: &Dn) -> Result<()> {
        match self.split() {
            Some((interceptor, next)) => interceptor.delete(next, dn),
            None => self.partition.delete(dn),
        }
    }

    pub fn modify(self, dn: &Dn, modifications: &[Modification]) -> Result<Entry> {
        match self.split() {
            Some((interceptor, next)) => interceptor.modify(next, dn, modifications),
            None => self.partition.modify(dn, modifications),
        }
    }

    pub fn rename(self, dn: &Dn, new_rdn: &str) -> Result<Dn> {
        match self.split() {
            Some((interceptor, next)) => interceptor.rename(next, dn, new_rdn),
            None => {
                let new_dn = dn.parent().unwrap_or_default().child(new_rdn)?;
                self.partition.rename(dn, &new_dn)?;
                Ok(new_dn)
            }
        }
    }

    pub fn move_entry(self, dn: &Dn, new_parent: &Dn) -> Result<Dn> {
        match self.split() {
            Some((interceptor, next)) => interceptor.move_entry(next, dn, new_parent),
            None => {
                let new_dn = match dn.rdn() {
                    Some(rdn) => new_parent.child(rdn)?,
                    None => new_parent.clone(),
                };
                self.partition.rename(dn, &new_dn)?;
                Ok(new_dn)
            }
        }
    }

    pub fn lookup(self, dn: &Dn) -> Result<Option<Entry>> {
        match self.split() {
            Some((interceptor, next)) => interceptor.lookup(next, dn),
            None => self.partition.lookup(dn),
        }
    }

    pub fn search(self, params: &SearchParams) -> Result<Box<dyn EntryCursor>> {
        match self.split() {
            Some((interceptor, next)) => interceptor.search(next, params),
            None => self
                .partition
                .search(&params.base, params.scope, &params.filter),
        }
    }
}

pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    partition: Arc<dyn Partition>,
}

impl InterceptorChain {
    pub fn new(partition: Arc<dyn Partition>) -> Self {
        Self {
            interceptors: Vec::new(),
            partition,
        }
    }

    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn partition(&self) -> &Arc<dyn Partition> {
        &self.partition
    }

    fn head(&self) -> Next<'_> {
        Next {
            chain: &self.interceptors,
            partition: self.partition.as_ref(),
        }
    }

    pub fn add(&self, entry: Entry) -> Result<()> {
        self.head().add(entry)
    }

    pub fn delete(&self, dn: &Dn) -> Result<()> {
        self.head().delete(dn)
    }

    pub fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<Entry> {
        self.head().modify(dn, modifications)
    }

    pub fn rename(&self, dn: &Dn, new_rdn: &str) -> Result<Dn> {
        self.head().rename(dn, new_rdn)
    }

    pub fn move_entry(&self, dn: &Dn, new_parent: &Dn) -> Result<Dn> {
        self.head().move_entry(dn, new_parent)
    }

    pub fn lookup(&self, dn: &Dn) -> Result<Option<Entry>> {
        self.head().lookup(dn)
    }

    pub fn search(&self, params: &SearchParams) -> Result<Box<dyn EntryCursor>> {
        self.head().search(params)
    }
}
