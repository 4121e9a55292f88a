//! # Engine Configuration
//!
//! The engine's singleton configuration: identities, the expiry window,
//! and the feature switches. This is explicit state — loaded with the
//! rest of the engine state at entry-point start and persisted at exit,
//! never a free-floating global.

use serde::{Deserialize, Serialize};

use crate::asset::ExtendedAsset;

/// Default expiry window for new deployments, in hours.
pub const DEFAULT_EXPIRY_HOURS: u32 = 24;

/// Memo attached to claim payouts.
pub const PAYOUT_MEMO: &str = "packet payout";

/// Memo attached to cancel refunds.
pub const REFUND_MEMO: &str = "packet refund";

/// Memo attached to forwarded listing fees.
pub const FEE_FORWARD_MEMO: &str = "listing fee";

/// Engine-wide configuration, owned by the admin entry points.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The engine's own identity on the ledger — deposits credited to
    /// anyone else are not ours.
    pub engine_account: String,
    /// Holder of the admin capability.
    pub owner: String,
    /// The trusted relay that attests claimant identity on `claim`.
    pub relay: String,
    /// Hours after creation before a packet becomes cancellable.
    pub expiry_hours: u32,
    /// Whether identity-gated policies may be used at all.
    pub gating_enabled: bool,
    /// The contract whose token balance attests a claimant's identity.
    pub identity_contract: String,
    /// Where forwarded fees go, when configured.
    pub fee_collector: Option<String>,
    /// The fee a listing registration must pay, when configured.
    pub listing_fee: Option<ExtendedAsset>,
}

impl EngineConfig {
    /// A minimal configuration: the engine identity doubles as owner and
    /// relay until the admin entry points say otherwise.
    pub fn new(engine_account: impl Into<String>) -> Self {
        let engine_account = engine_account.into();
        Self {
            owner: engine_account.clone(),
            relay: engine_account.clone(),
            engine_account,
            expiry_hours: DEFAULT_EXPIRY_HOURS,
            gating_enabled: false,
            identity_contract: String::new(),
            fee_collector: None,
            listing_fee: None,
        }
    }
}
