use super::lut::ReferralLut;
use super::policy::ReferralRedirect;
use crate::directory::{Entry, EntryCursor};
use crate::ldap::protocol::SearchScope;
use crate::{LdapMuxError, Result};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Parked,
    ScanningForward,
    ScanningBackward,
    ReplayingReferrals,
    Exhausted,
}

/// Search cursor that holds referral entries back until every ordinary
/// entry has been returned.
///
/// Referrals are recognised through the lookup table. Once the underlying
/// cursor is exhausted the deferred referrals are replayed: in the order
/// they were met when moving forward, in reverse when moving backward.
/// With `throw_on_referral` each replayed referral surfaces as an
/// [`LdapMuxError::Referral`] error; calling `next`/`previous` again
/// continues with the following one.
pub struct ReferralAwareCursor<C> {
    base: C,
    lut: Arc<ReferralLut>,
    scope: SearchScope,
    direction: Option<Direction>,
    state: State,
    deferred: Vec<Entry>,
    replay_index: usize,
    current: Option<Entry>,
    throw_on_referral: bool,
}

impl<C: EntryCursor> ReferralAwareCursor<C> {
    pub fn new(base: C, lut: Arc<ReferralLut>, scope: SearchScope, throw_on_referral: bool) -> Self {
        Self {
            base,
            lut,
            scope,
            direction: None,
            state: State::Parked,
            deferred: Vec::new(),
            replay_index: 0,
            current: None,
            throw_on_referral,
        }
    }

    /// Number of referral entries held back so far.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    fn reset(&mut self, direction: Direction) {
        self.direction = Some(direction);
        self.state = State::Parked;
        self.deferred.clear();
        self.replay_index = 0;
        self.current = None;
    }

    /// Pulls from the base cursor until an ordinary entry turns up.
    fn scan(&mut self, direction: Direction) -> Result<bool> {
        loop {
            let advanced = match direction {
                Direction::Forward => self.base.next()?,
                Direction::Backward => self.base.previous()?,
            };
            if !advanced {
                return Ok(false);
            }

            let entry = self.base.get()?;
            if self.lut.is_referral(entry.dn()) {
                trace!("Deferring referral {}", entry.dn());
                self.deferred.push(entry.clone());
                continue;
            }
            self.current = Some(entry.clone());
            return Ok(true);
        }
    }

    fn replay(&mut self, direction: Direction) -> Result<bool> {
        if self.replay_index >= self.deferred.len() {
            self.state = State::Exhausted;
            self.current = None;
            return Ok(false);
        }

        let index = match direction {
            Direction::Forward => self.replay_index,
            Direction::Backward => self.deferred.len() - 1 - self.replay_index,
        };
        self.replay_index += 1;
        let entry = self.deferred[index].clone();

        if self.throw_on_referral {
            let redirect = ReferralRedirect::build(&entry, entry.dn(), Some(self.scope));
            self.current = Some(entry);
            return Err(LdapMuxError::Referral(redirect));
        }
        self.current = Some(entry);
        Ok(true)
    }

    fn step(&mut self, direction: Direction) -> Result<bool> {
        let scanning = match direction {
            Direction::Forward => State::ScanningForward,
            Direction::Backward => State::ScanningBackward,
        };

        if self.state == State::Parked {
            self.state = scanning;
        }
        if self.state == scanning {
            if self.scan(direction)? {
                return Ok(true);
            }
            self.state = State::ReplayingReferrals;
            self.replay_index = 0;
        }
        match self.state {
            State::ReplayingReferrals => self.replay(direction),
            _ => {
                self.current = None;
                Ok(false)
            }
        }
    }
}

impl<C: EntryCursor> EntryCursor for ReferralAwareCursor<C> {
    fn before_first(&mut self) -> Result<()> {
        self.base.before_first()?;
        self.reset(Direction::Forward);
        Ok(())
    }

    fn after_last(&mut self) -> Result<()> {
        self.base.after_last()?;
        self.reset(Direction::Backward);
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        match self.direction {
            Some(Direction::Backward) => self.before_first()?,
            None => self.direction = Some(Direction::Forward),
            Some(Direction::Forward) => {}
        }
        self.step(Direction::Forward)
    }

    fn previous(&mut self) -> Result<bool> {
        if self.direction != Some(Direction::Backward) {
            self.after_last()?;
        }
        self.step(Direction::Backward)
    }

    fn get(&self) -> Result<&Entry> {
        self.current
            .as_ref()
            .ok_or_else(|| LdapMuxError::Cursor("Cursor is not positioned on an entry".to_string()))
    }

    fn before(&mut self, _entry: &Entry) -> Result<()> {
        Err(LdapMuxError::Unsupported(
            "Positioning a referral-aware cursor before an entry".to_string(),
        ))
    }

    fn after(&mut self, _entry: &Entry) -> Result<()> {
        Err(LdapMuxError::Unsupported(
            "Positioning a referral-aware cursor after an entry".to_string(),
        ))
    }
}
