//! # Fee Schedule & Listings
//!
//! Admin-managed configuration the engine only reads:
//!
//! - **Fee entries**, keyed by the issuing contract: the creation fee for
//!   packets escrowed on that contract, the contract the fee is paid in,
//!   and an optional override of the minimal random-unit granularity.
//! - **Listings**, the paid allowlist for fungible classes. A class can
//!   back a packet only while whitelisted or carrying an unexpired
//!   listing; a listing lasts one month and can be renewed only after it
//!   lapses.
//!
//! Both tables have lifetimes independent of any packet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::asset::{Asset, AssetClass, Symbol, MAX_PRECISION};
use crate::error::{EngineError, Result};

/// How long a paid listing stays valid.
pub const LISTING_TERM_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Fee entries
// ---------------------------------------------------------------------------

/// Fee configuration for one issuing contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEntry {
    /// Creation fee per escrowed item, in the fee asset's minor units.
    /// Zero means packets on this contract are created free of charge.
    pub fee: Asset,
    /// The contract the fee asset is issued on.
    pub fee_contract: String,
    /// Optional override: random payouts are floored to
    /// `10^min_unit_exp` minor units instead of the default granularity.
    pub min_unit_exp: Option<u8>,
}

/// The fee schedule: per-contract fee entries, written only by the admin
/// entry points.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    entries: BTreeMap<String, FeeEntry>,
}

impl FeeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, contract: &str) -> Option<&FeeEntry> {
        self.entries.get(contract)
    }

    /// Inserts or replaces the entry for `contract`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PrecisionMismatch`] if the minimal-unit
    /// exponent is out of range.
    pub fn upsert(&mut self, contract: impl Into<String>, entry: FeeEntry) -> Result<()> {
        if let Some(exp) = entry.min_unit_exp {
            if exp > MAX_PRECISION {
                return Err(EngineError::PrecisionMismatch {
                    reason: format!(
                        "minimal-unit exponent {} should be in range [0,{}]",
                        exp, MAX_PRECISION
                    ),
                });
            }
        }
        self.entries.insert(contract.into(), entry);
        Ok(())
    }

    /// Deletes the entry for `contract`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FeeNotConfigured`] if no entry exists.
    pub fn delete(&mut self, contract: &str) -> Result<FeeEntry> {
        self.entries
            .remove(contract)
            .ok_or_else(|| EngineError::FeeNotConfigured {
                key: contract.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The minimal unit a random payout may take for `symbol`, in minor units.
///
/// Defaults to `10^(precision - 2)` — payouts land on "cent" granularity —
/// and to one minor unit for precisions of 2 or below. A fee entry's
/// exponent overrides the default, capped at the symbol's precision so the
/// unit never exceeds one whole token.
pub fn min_unit(symbol: &Symbol, entry: Option<&FeeEntry>) -> u64 {
    let exp = match entry.and_then(|e| e.min_unit_exp) {
        Some(exp) => exp.min(symbol.precision),
        None => symbol.precision.saturating_sub(2),
    };
    10u64.pow(exp as u32)
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// The paid allowlist: fungible classes admitted for packet creation,
/// each with an expiry timestamp.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listings {
    entries: BTreeMap<AssetClass, DateTime<Utc>>,
}

impl Listings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `class` has a listing valid at `now`.
    pub fn is_listed(&self, class: &AssetClass, now: DateTime<Utc>) -> bool {
        matches!(self.entries.get(class), Some(expires) if *expires > now)
    }

    /// Registers or renews a listing starting at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ExpiryNotReached`] when an existing listing
    /// has not lapsed yet — renewing early would let a payer stack terms.
    pub fn register(&mut self, class: AssetClass, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if let Some(expires) = self.entries.get(&class) {
            if *expires > now {
                return Err(EngineError::ExpiryNotReached { until: *expires });
            }
        }
        let expires = now + chrono::Duration::days(LISTING_TERM_DAYS);
        self.entries.insert(class, expires);
        Ok(expires)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
