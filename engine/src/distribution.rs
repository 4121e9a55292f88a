//! # Distribution Engine
//!
//! Pure computation of one claim's payout. Called only while the caller
//! already holds a validated claim slot — every check about *whether* a
//! claim may happen lives in the lifecycle controller; this module only
//! answers *how much*.
//!
//! ## Conservation
//!
//! Whatever the policy, the sum of all payouts over a packet's life must
//! equal `total_quantity` exactly. Both policies achieve this the same
//! way: the final open slot always receives exactly `remain_quantity`,
//! sweeping every rounding residue to the last claimant.
//!
//! ## Random splits
//!
//! The random policy draws a multiplier in roughly `[0, 2×]` of the
//! *current* fair share `remain_quantity / remain_count`. Because the
//! multiplier is centered on a shrinking fair share, variance
//! self-corrects: a large draw shrinks every later fair share, a small
//! draw grows them. Three hard bounds apply to every draw:
//!
//! 1. at least one minimal unit,
//! 2. at most `remain_quantity - (remain_count - 1) × minimal_unit`, so
//!    every later claimant can still draw a minimal unit,
//! 3. floored to the minimal-unit granularity.
//!
//! The multiplier is derived by hashing transaction-ordering entropy the
//! runtime supplies — a value claimants cannot know when they commit to
//! claiming — together with the packet code and the remaining slot count,
//! so two claims in one packet never reuse a roll.

use sha2::{Digest, Sha256};

use crate::asset::mul_div;
use crate::error::{EngineError, Result};
use crate::packet::{Packet, PacketAsset};

/// Computes the payout for the claim currently being executed.
///
/// `min_unit` is the minimal random-unit granularity for the packet's
/// asset (ignored for MEAN and for NFT packets). `entropy` is the
/// transaction-ordering entropy from the operation context.
///
/// # Errors
///
/// Returns [`EngineError::AmountOverflow`] if the packet's counters are
/// inconsistent (remaining quantity too small for the open slots) — the
/// controller's create-time checks make this unreachable for rows it
/// produced.
pub fn compute_payout(packet: &Packet, min_unit: u64, entropy: u64) -> Result<u64> {
    // NFT packets pay exactly one item per claim.
    if let PacketAsset::Nft { .. } = packet.asset {
        return Ok(1);
    }

    // The last open slot takes the exact remainder, whatever the policy.
    if packet.remain_count <= 1 {
        return Ok(packet.remain_quantity);
    }

    if packet.policy.is_random() {
        random_share(packet, min_unit, entropy)
    } else {
        Ok(packet.total_quantity / packet.receiver_count as u64)
    }
}

/// One bounded random draw against the current pool.
fn random_share(packet: &Packet, min_unit: u64, entropy: u64) -> Result<u64> {
    let min_unit = min_unit.max(1);
    let fair = packet.remain_quantity / packet.remain_count as u64;

    // Multiplier in [0, 198]% of the fair share, from a hash the claimant
    // cannot predict.
    let percent = roll(entropy, packet) % 100;
    let raw = mul_div(fair, 2 * percent, 100)?;
    let floored = raw / min_unit * min_unit;

    // Leave at least one minimal unit for every later slot.
    let slots_after = (packet.remain_count - 1) as u64;
    let reserved = slots_after
        .checked_mul(min_unit)
        .ok_or(EngineError::AmountOverflow)?;
    let headroom = packet
        .remain_quantity
        .checked_sub(reserved)
        .ok_or(EngineError::AmountOverflow)?;
    if headroom < min_unit {
        return Err(EngineError::AmountOverflow);
    }

    Ok(floored.clamp(min_unit, headroom))
}

/// Derives a draw from the context entropy, unique per (packet, slot).
fn roll(entropy: u64, packet: &Packet) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(entropy.to_le_bytes());
    hasher.update(packet.code.as_str().as_bytes());
    hasher.update(packet.remain_count.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
