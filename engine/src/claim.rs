//! Claim records: one claimant's successful draw against a packet.
//!
//! A claim row is created once per successful claim and never mutated.
//! At most one claim exists per (packet, claimant) — the dedup invariant
//! lives in [`crate::store::ClaimStore`]'s uniqueness index, never in the
//! caller. Rows outlive their packet and are removed only by the bounded
//! sweep once the parent no longer exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::packet::PacketCode;

/// The composite dedup key: which claimant drew from which packet.
///
/// Used directly as an ordered map key — no bit packing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimKey {
    /// The claimant.
    pub receiver: String,
    /// The packet that was drawn from.
    pub code: PacketCode,
}

/// A successful draw against a packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Auto-assigned primary key.
    pub id: u64,
    /// The packet this claim drew from.
    pub packet_code: PacketCode,
    /// The packet's sender, copied at claim time so the row stays
    /// meaningful after the packet is deleted.
    pub sender: String,
    /// The claimant that was paid.
    pub receiver: String,
    /// Quantity paid out, in minor units (or NFT item count).
    pub quantity: u64,
    /// When the claim committed.
    pub claimed_at: DateTime<Utc>,
}

impl Claim {
    /// The dedup key for this row.
    pub fn key(&self) -> ClaimKey {
        ClaimKey {
            receiver: self.receiver.clone(),
            code: self.packet_code.clone(),
        }
    }
}
