//! Referral handling: lookup table, deferring search cursor and the
//! policy that turns referral entries into redirects.

pub mod cursor;
pub mod lut;
pub mod policy;

pub use cursor::ReferralAwareCursor;
pub use lut::ReferralLut;
pub use policy::{ReferralMode, ReferralPolicy, ReferralRedirect};
