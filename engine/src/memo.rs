//! # Memo Grammar
//!
//! Deposits carry their intent in a colon-delimited memo with a fixed
//! field count. One canonical grammar exists per operation and is applied
//! uniformly; arity alone distinguishes the operations sharing a handler:
//!
//! | Handler  | Arity | Grammar                                            |
//! |----------|-------|----------------------------------------------------|
//! | fungible | 4     | `<pw_hash>:<count>:<policy>:<code>` — create       |
//! | fungible | 2     | `<symbol>:<contract>` — listing registration       |
//! | fungible | 5     | `<code>:<id>:<parent_id>:<quantity>:<nft_contract>` — NFT fee leg |
//! | NFT      | 2     | `<pw_hash>:<code>` — NFT asset leg                 |
//!
//! Any other field count rejects the entire enclosing transfer: the
//! deposit never completes and funds stay with the depositor.

use crate::asset::NftFamily;
use crate::error::{EngineError, Result};
use crate::packet::{PacketCode, Policy};

/// A parsed fungible-handler memo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FungibleMemo {
    /// Create a fungible packet from this deposit.
    Create {
        pw_hash: String,
        count: u32,
        policy: Policy,
        code: PacketCode,
    },
    /// Pay the listing fee for an asset class.
    RegisterListing {
        /// Ticker code of the class being listed.
        symbol_code: String,
        /// The contract issuing it.
        contract: String,
    },
    /// The fee leg of the two-leg NFT flow.
    NftFeeLeg {
        code: PacketCode,
        family: NftFamily,
        quantity: u64,
        nft_contract: String,
    },
}

/// The asset leg of the two-leg NFT flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NftAssetMemo {
    pub pw_hash: String,
    pub code: PacketCode,
}

/// Parses a memo arriving on the fungible handler.
///
/// # Errors
///
/// Returns [`EngineError::InvalidMemoFormat`] for an unexpected field
/// count, empty mandatory field, or malformed number, and
/// [`EngineError::UnsupportedPolicy`] for an unknown policy token.
pub fn parse_fungible(memo: &str) -> Result<FungibleMemo> {
    let parts: Vec<&str> = memo.split(':').collect();
    match parts.len() {
        4 => {
            let pw_hash = nonempty(parts[0], "pw_hash")?;
            let count = number::<u32>(parts[1], "count")?;
            let policy = Policy::from_memo(parts[2])?;
            let code = PacketCode::new(parts[3])?;
            Ok(FungibleMemo::Create {
                pw_hash,
                count,
                policy,
                code,
            })
        }
        2 => Ok(FungibleMemo::RegisterListing {
            symbol_code: nonempty(parts[0], "symbol")?,
            contract: nonempty(parts[1], "contract")?,
        }),
        5 => {
            let code = PacketCode::new(parts[0])?;
            let id = number::<u64>(parts[1], "id")?;
            let parent_id = number::<u64>(parts[2], "parent_id")?;
            let quantity = number::<u64>(parts[3], "quantity")?;
            let nft_contract = nonempty(parts[4], "nft_contract")?;
            Ok(FungibleMemo::NftFeeLeg {
                code,
                family: NftFamily::new(id, parent_id),
                quantity,
                nft_contract,
            })
        }
        other => Err(EngineError::InvalidMemoFormat {
            reason: format!("expected 2, 4 or 5 fields, got {}", other),
        }),
    }
}

/// Parses a memo arriving on the NFT handler.
///
/// # Errors
///
/// Returns [`EngineError::InvalidMemoFormat`] unless the memo is exactly
/// `<pw_hash>:<code>` with both fields present.
pub fn parse_nft(memo: &str) -> Result<NftAssetMemo> {
    let parts: Vec<&str> = memo.split(':').collect();
    if parts.len() != 2 {
        return Err(EngineError::InvalidMemoFormat {
            reason: format!("expected 2 fields, got {}", parts.len()),
        });
    }
    Ok(NftAssetMemo {
        pw_hash: nonempty(parts[0], "pw_hash")?,
        code: PacketCode::new(parts[1])?,
    })
}

fn nonempty(field: &str, name: &str) -> Result<String> {
    if field.is_empty() {
        return Err(EngineError::InvalidMemoFormat {
            reason: format!("{} cannot be empty", name),
        });
    }
    Ok(field.to_string())
}

fn number<T: std::str::FromStr>(field: &str, name: &str) -> Result<T> {
    field.parse().map_err(|_| EngineError::InvalidMemoFormat {
        reason: format!("{} is not a valid number: '{}'", name, field),
    })
}
