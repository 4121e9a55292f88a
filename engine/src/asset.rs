//! # Asset Model
//!
//! Value in the engine is always an integer count of an asset's minor
//! unit; the engine never divides a display amount. A fungible asset is
//! identified by its [`AssetClass`] — symbol plus issuing contract — and a
//! non-fungible family by [`NftFamily`] plus its contract. Both are plain
//! ordered types so they can serve directly as map keys: exact-match
//! lookups are all the engine ever needs, so there is no packed composite
//! key anywhere.
//!
//! All scaling multiplications widen to `u128` before narrowing back,
//! because a `u64` amount times a multiplier does not fit in `u64`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, Result};

/// Precisions above this are rejected when an asset class is registered.
pub const MAX_PRECISION: u8 = 18;

// ---------------------------------------------------------------------------
// Symbol
// ---------------------------------------------------------------------------

/// A fungible token symbol: ticker code plus decimal precision.
///
/// Two symbols are the same asset only if both fields agree; `"RED"` at 4
/// decimals and `"RED"` at 8 decimals are distinct (and a deposit carrying
/// the wrong one fails precision checks downstream).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    /// Ticker code, e.g. "RED".
    pub code: String,
    /// Number of decimal places; one minor unit is `10^-precision`.
    pub precision: u8,
}

impl Symbol {
    /// Creates a symbol, validating the precision range.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PrecisionMismatch`] if `precision` exceeds
    /// [`MAX_PRECISION`].
    pub fn new(code: impl Into<String>, precision: u8) -> Result<Self> {
        if precision > MAX_PRECISION {
            return Err(EngineError::PrecisionMismatch {
                reason: format!(
                    "precision {} should be in range [0,{}]",
                    precision, MAX_PRECISION
                ),
            });
        }
        Ok(Self {
            code: code.into(),
            precision,
        })
    }

    /// Re-checks the precision range. Fields are public, so a symbol
    /// built at the boundary may not have gone through [`Symbol::new`].
    pub fn validate(&self) -> Result<()> {
        if self.precision > MAX_PRECISION {
            return Err(EngineError::PrecisionMismatch {
                reason: format!(
                    "precision {} should be in range [0,{}]",
                    self.precision, MAX_PRECISION
                ),
            });
        }
        Ok(())
    }

    /// One whole display unit expressed in minor units (`10^precision`).
    pub fn one(&self) -> u64 {
        10u64.pow(self.precision as u32)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision, self.code)
    }
}

// ---------------------------------------------------------------------------
// AssetClass
// ---------------------------------------------------------------------------

/// A fungible asset class: symbol plus the contract that issues it.
///
/// This is the composite key for the whitelist, the listing table, and
/// the class stored on every fungible packet. The same ticker issued by
/// two contracts is two distinct classes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetClass {
    /// The token symbol.
    pub symbol: Symbol,
    /// Account of the issuing ledger contract.
    pub contract: String,
}

impl AssetClass {
    pub fn new(symbol: Symbol, contract: impl Into<String>) -> Self {
        Self {
            symbol,
            contract: contract.into(),
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.contract)
    }
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// A quantity of a fungible token: amount in minor units plus its symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Amount in minor units.
    pub amount: u64,
    /// The symbol the amount is denominated in.
    pub symbol: Symbol,
}

impl Asset {
    pub fn new(amount: u64, symbol: Symbol) -> Self {
        Self { amount, symbol }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.symbol)
    }
}

/// An asset together with the contract it lives on. Used wherever the
/// engine must remember not just how much but *where* value came from —
/// the recorded creation fee, the configured listing fee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedAsset {
    /// Amount in minor units.
    pub amount: u64,
    /// The asset class (symbol + issuing contract).
    pub class: AssetClass,
}

impl ExtendedAsset {
    pub fn new(amount: u64, class: AssetClass) -> Self {
        Self { amount, class }
    }
}

// ---------------------------------------------------------------------------
// Non-fungible assets
// ---------------------------------------------------------------------------

/// A non-fungible symbol family: item id plus parent (collection) id.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NftFamily {
    /// Item identifier within the collection.
    pub id: u64,
    /// Collection identifier; always below `id`.
    pub parent_id: u64,
}

impl NftFamily {
    pub fn new(id: u64, parent_id: u64) -> Self {
        Self { id, parent_id }
    }

    /// A family is well-formed only when the item id is above its parent.
    pub fn is_valid(&self) -> bool {
        self.id > self.parent_id
    }
}

impl fmt::Display for NftFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.parent_id)
    }
}

/// A quantity of items from one NFT family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftAsset {
    /// Number of items.
    pub amount: u64,
    /// The family the items belong to.
    pub family: NftFamily,
}

impl NftAsset {
    pub fn new(amount: u64, family: NftFamily) -> Self {
        Self { amount, family }
    }
}

// ---------------------------------------------------------------------------
// Overflow-safe arithmetic
// ---------------------------------------------------------------------------

/// Computes `value * numerator / denominator` with an intermediate `u128`,
/// narrowing back to `u64`.
///
/// # Errors
///
/// Returns [`EngineError::AmountOverflow`] if the denominator is zero or
/// the result does not fit in `u64`.
pub fn mul_div(value: u64, numerator: u64, denominator: u64) -> Result<u64> {
    if denominator == 0 {
        return Err(EngineError::AmountOverflow);
    }
    let wide = (value as u128) * (numerator as u128) / (denominator as u128);
    u64::try_from(wide).map_err(|_| EngineError::AmountOverflow)
}

/// Computes `value * factor`, widened then narrowed.
///
/// # Errors
///
/// Returns [`EngineError::AmountOverflow`] if the product exceeds `u64`.
pub fn mul(value: u64, factor: u64) -> Result<u64> {
    u64::try_from((value as u128) * (factor as u128)).map_err(|_| EngineError::AmountOverflow)
}
