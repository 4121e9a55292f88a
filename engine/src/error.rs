//! Error types for the distribution engine.
//!
//! Every entry point returns an [`EngineError`]. The enum is exhaustive
//! over the refusal modes of the packet lifecycle: one variant per
//! signaled kind, carrying the offending values so callers (the relay,
//! a depositor's wallet) can render a precise message.
//!
//! Every precondition violation aborts the whole operation with no
//! partial state commit — the engine performs no internal retry.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::DbError;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A deposit memo did not match the canonical grammar for its handler.
    #[error("invalid memo format: {reason}")]
    InvalidMemoFormat {
        /// What was wrong with the memo (arity, empty field, bad number).
        reason: String,
    },

    /// The record being created already exists (packet code, listing).
    #[error("already exists: {code}")]
    DuplicateCode {
        /// The conflicting key.
        code: String,
    },

    /// The policy field of a create memo is not one of the enumerated values.
    #[error("unsupported policy: {policy}")]
    UnsupportedPolicy {
        /// The raw policy token from the memo.
        policy: String,
    },

    /// A quantity check failed: per-claimant fair share below the minimal
    /// unit, or an escrow balance short of what the operation needs.
    #[error("quantity below minimum: required {required}, actual {actual}")]
    QuantityBelowMinimum {
        /// The smallest acceptable quantity, in minor units.
        required: u64,
        /// What was actually available or offered.
        actual: u64,
    },

    /// No fee entry / listing covers the asset class in question.
    #[error("fee not configured for {key}")]
    FeeNotConfigured {
        /// The asset-class or contract key that has no configuration.
        key: String,
    },

    /// The paid fee does not cover what the operation requires.
    #[error("fee insufficient: required {required}, paid {paid}")]
    FeeInsufficient {
        /// Required fee in minor units of the fee asset.
        required: u64,
        /// What the depositor actually paid.
        paid: u64,
    },

    /// A precision is out of range or two symbols disagree on precision.
    #[error("precision mismatch: {reason}")]
    PrecisionMismatch {
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// The referenced record does not exist (or is no longer claimable).
    #[error("{what} not found: {key}")]
    RecordNotFound {
        /// The kind of record that was looked up.
        what: &'static str,
        /// The key that missed.
        key: String,
    },

    /// The supplied password hash does not match the packet's.
    #[error("incorrect password")]
    WrongPassword,

    /// The (claimant, code) pair already has a claim row.
    #[error("duplicate claim: {receiver} already claimed {code}")]
    DuplicateClaim {
        /// The claimant that tried again.
        receiver: String,
        /// The packet code.
        code: String,
    },

    /// The operation is gated on an expiry that has not elapsed yet.
    #[error("expiry not reached: available after {until}")]
    ExpiryNotReached {
        /// Earliest instant at which the operation becomes permitted.
        until: DateTime<Utc>,
    },

    /// A feature required by the request is switched off.
    #[error("feature disabled: {feature}")]
    FeatureDisabled {
        /// The feature that would have to be enabled.
        feature: &'static str,
    },

    /// The caller does not hold the capability this entry point requires.
    #[error("unauthorized caller: {caller}")]
    UnauthorizedCaller {
        /// The identity that attempted the operation.
        caller: String,
    },

    /// An amount or count that must be positive was zero.
    #[error("non-positive amount: {context}")]
    NonPositiveAmount {
        /// Which input was non-positive.
        context: &'static str,
    },

    /// An account identity failed validation (does not exist, or is not
    /// identity-verified for a gated claim).
    #[error("account invalid: {account}")]
    AccountInvalid {
        /// The offending account.
        account: String,
    },

    /// A sweep pass found no eligible claim rows to delete.
    #[error("nothing to sweep")]
    NothingToSweep,

    /// An arithmetic operation would overflow. Wrapping arithmetic and
    /// money do not mix.
    #[error("amount overflow")]
    AmountOverflow,

    /// The persistence layer failed.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}
