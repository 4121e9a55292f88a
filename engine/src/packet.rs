//! # Distribution Packets
//!
//! A packet is the escrowed pool of value a sender deposits for later
//! distribution. Its lifecycle is:
//!
//! 1. **Init** — fee leg settled, asset leg still pending (NFT flow only).
//! 2. **Created** — fully escrowed, open for claims.
//! 3. **Finished** — every claim slot drawn; the row is retained until
//!    removed by an expiry-gated cancel or a bulk delete, so the
//!    claim-dedup index stays queryable.
//!
//! Status only ever advances. Rows are mutated exclusively by successful
//! claims, which monotonically decrease the remaining quantity and slot
//! count; deletion is the terminal signal for cancelled packets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::asset::{AssetClass, ExtendedAsset, NftFamily};
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// PacketCode
// ---------------------------------------------------------------------------

/// The sender-chosen identity of a packet. Opaque to the engine beyond
/// being non-empty and unique.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketCode(String);

impl PacketCode {
    /// Creates a packet code.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidMemoFormat`] when the code is empty.
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        if code.is_empty() {
            return Err(EngineError::InvalidMemoFormat {
                reason: "code cannot be empty".into(),
            });
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PacketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status & Policy
// ---------------------------------------------------------------------------

/// Lifecycle status of a packet. Advances Init → Created → Finished,
/// never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketStatus {
    /// Fee settled, escrow leg pending (NFT two-leg flow).
    Init,
    /// Fully escrowed and open for claims.
    Created,
    /// All claim slots drawn; retained until removed.
    Finished,
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketStatus::Init => write!(f, "Init"),
            PacketStatus::Created => write!(f, "Created"),
            PacketStatus::Finished => write!(f, "Finished"),
        }
    }
}

/// How claim payouts are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    /// Equal split; the final claim sweeps the rounding remainder.
    Mean,
    /// Variance-bounded pseudo-random split with full conservation.
    Random,
    /// Equal split, restricted to identity-verified claimants.
    IdentityGatedMean,
    /// Random split, restricted to identity-verified claimants.
    IdentityGatedRandom,
}

impl Policy {
    /// Parses the policy token of a create memo. The memo grammar uses the
    /// canonical upper-case names.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedPolicy`] for anything else.
    pub fn from_memo(token: &str) -> Result<Self> {
        match token {
            "MEAN" => Ok(Policy::Mean),
            "RANDOM" => Ok(Policy::Random),
            "IDENTITY_GATED_MEAN" => Ok(Policy::IdentityGatedMean),
            "IDENTITY_GATED_RANDOM" => Ok(Policy::IdentityGatedRandom),
            other => Err(EngineError::UnsupportedPolicy {
                policy: other.to_string(),
            }),
        }
    }

    /// Whether claims require the claimant to hold the identity token.
    pub fn is_gated(&self) -> bool {
        matches!(self, Policy::IdentityGatedMean | Policy::IdentityGatedRandom)
    }

    /// Whether payouts are randomized.
    pub fn is_random(&self) -> bool {
        matches!(self, Policy::Random | Policy::IdentityGatedRandom)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Mean => write!(f, "MEAN"),
            Policy::Random => write!(f, "RANDOM"),
            Policy::IdentityGatedMean => write!(f, "IDENTITY_GATED_MEAN"),
            Policy::IdentityGatedRandom => write!(f, "IDENTITY_GATED_RANDOM"),
        }
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// What kind of value a packet escrows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketAsset {
    /// A fungible token class.
    Fungible(AssetClass),
    /// A non-fungible family held on the given contract. Every claim
    /// pays out exactly one item.
    Nft {
        /// The escrowed symbol family.
        family: NftFamily,
        /// Account of the NFT ledger contract.
        contract: String,
    },
}

impl PacketAsset {
    /// The contract outbound transfers for this packet go through.
    pub fn contract(&self) -> &str {
        match self {
            PacketAsset::Fungible(class) => &class.contract,
            PacketAsset::Nft { contract, .. } => contract,
        }
    }
}

/// A distribution packet.
///
/// Created by a validated deposit, mutated only by successful claims,
/// and deleted on expiry-triggered cancellation. Owned exclusively by the
/// lifecycle controller — nothing else writes these rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Unique, sender-chosen code (primary key).
    pub code: PacketCode,
    /// The depositor the remainder is refunded to.
    pub sender: String,
    /// Hex-encoded hash the claimant's password must match. Empty while
    /// an NFT packet waits for its asset leg.
    pub pw_hash: String,
    /// What is escrowed.
    pub asset: PacketAsset,
    /// Total escrowed quantity, in minor units (or NFT item count).
    pub total_quantity: u64,
    /// Quantity still undistributed.
    pub remain_quantity: u64,
    /// Number of claim slots at creation.
    pub receiver_count: u32,
    /// Claim slots still open.
    pub remain_count: u32,
    /// The creation fee held in custody, if one was charged.
    pub fee_charged: Option<ExtendedAsset>,
    /// Lifecycle status.
    pub status: PacketStatus,
    /// Payout policy.
    pub policy: Policy,
    /// When the packet row was created.
    pub created_at: DateTime<Utc>,
    /// Last successful mutation.
    pub updated_at: DateTime<Utc>,
}

impl Packet {
    /// Applies a successful claim: decrements the open slot count and the
    /// remaining quantity, stamps `updated_at`, and advances to `Finished`
    /// when the last slot is drawn.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AmountOverflow`] if the payout exceeds the
    /// remaining quantity or no slot is open — both indicate a bug in the
    /// payout computation, and the conservation invariant refuses to let
    /// it through.
    pub fn apply_claim(&mut self, payout: u64, now: DateTime<Utc>) -> Result<()> {
        self.remain_count = self
            .remain_count
            .checked_sub(1)
            .ok_or(EngineError::AmountOverflow)?;
        self.remain_quantity = self
            .remain_quantity
            .checked_sub(payout)
            .ok_or(EngineError::AmountOverflow)?;
        self.updated_at = now;
        if self.remain_count == 0 {
            self.status = PacketStatus::Finished;
        }
        Ok(())
    }

    /// The instant after which cancellation becomes permitted.
    pub fn expires_at(&self, expiry_hours: u32) -> DateTime<Utc> {
        self.created_at + chrono::Duration::hours(expiry_hours as i64)
    }
}

// ---------------------------------------------------------------------------
// Password hashing helper
// ---------------------------------------------------------------------------

/// Derives the hex-encoded password hash a create memo carries.
///
/// Claimants never send the password to the engine — the relay sends this
/// hash, and the engine compares it byte-for-byte against the stored one.
pub fn password_hash(secret: &str) -> String {
    hex::encode(blake3::hash(secret.as_bytes()).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Symbol;

    fn sample_packet() -> Packet {
        let now = Utc::now();
        Packet {
            code: PacketCode::new("pkt1").unwrap(),
            sender: "alice".into(),
            pw_hash: password_hash("secret"),
            asset: PacketAsset::Fungible(AssetClass::new(
                Symbol::new("RED", 2).unwrap(),
                "token.core",
            )),
            total_quantity: 10_000,
            remain_quantity: 10_000,
            receiver_count: 5,
            remain_count: 5,
            fee_charged: None,
            status: PacketStatus::Created,
            policy: Policy::Mean,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn empty_code_rejected() {
        assert!(PacketCode::new("").is_err());
        assert!(PacketCode::new("pkt1").is_ok());
    }

    #[test]
    fn policy_tokens_parse() {
        assert_eq!(Policy::from_memo("MEAN").unwrap(), Policy::Mean);
        assert_eq!(Policy::from_memo("RANDOM").unwrap(), Policy::Random);
        assert_eq!(
            Policy::from_memo("IDENTITY_GATED_MEAN").unwrap(),
            Policy::IdentityGatedMean
        );
        assert!(Policy::from_memo("mean").is_err());
        assert!(Policy::from_memo("LOTTERY").is_err());
    }

    #[test]
    fn gated_policies_flagged() {
        assert!(!Policy::Mean.is_gated());
        assert!(Policy::IdentityGatedRandom.is_gated());
        assert!(Policy::IdentityGatedRandom.is_random());
        assert!(!Policy::IdentityGatedMean.is_random());
    }

    #[test]
    fn apply_claim_decrements_and_finishes() {
        let mut p = sample_packet();
        p.remain_count = 1;
        p.remain_quantity = 2_000;
        p.apply_claim(2_000, Utc::now()).unwrap();
        assert_eq!(p.remain_count, 0);
        assert_eq!(p.remain_quantity, 0);
        assert_eq!(p.status, PacketStatus::Finished);
    }

    #[test]
    fn apply_claim_refuses_overdraw() {
        let mut p = sample_packet();
        assert!(p.apply_claim(10_001, Utc::now()).is_err());
    }

    #[test]
    fn apply_claim_refuses_exhausted_slots() {
        let mut p = sample_packet();
        p.remain_count = 0;
        assert!(p.apply_claim(1, Utc::now()).is_err());
    }

    #[test]
    fn password_hash_is_stable_hex() {
        let h1 = password_hash("secret");
        let h2 = password_hash("secret");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, password_hash("other"));
    }

    #[test]
    fn packet_serialization_roundtrip() {
        let p = sample_packet();
        let json = serde_json::to_string(&p).unwrap();
        let back: Packet = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
