//! # Vermilion — Escrow-and-Split Distribution Engine
//!
//! Vermilion escrows value a sender deposits — fungible tokens or NFT
//! items — and pays it out to a configurable number of claimants, either
//! in equal shares or in variance-bounded pseudo-random ones, with
//! exactly-once claim semantics, fee extraction, and a time-boxed refund
//! path back to the sender.
//!
//! The engine runs *inside* a ledger runtime: deposits arrive as transfer
//! notifications, payouts leave through synchronous transfer calls, and
//! the runtime attests the caller, the clock, and the transaction-ordering
//! entropy. The engine itself is a deterministic state machine.
//!
//! ## Architecture
//!
//! Modules mirror the components of the engine, leaves first:
//!
//! - **asset** — integer minor-unit amounts, asset classes, NFT families.
//! - **memo** — the canonical colon-delimited deposit grammars.
//! - **packet** / **claim** — the two row types and their invariants.
//! - **store** — the persisted tables and their secondary indexes.
//! - **fees** — admin-managed fee schedule and the paid listing table.
//! - **distribution** — pure payout computation (equal and random).
//! - **gateway** — the escrow boundary: inbound notification routing,
//!   outbound transfers behind the [`Ledger`] trait.
//! - **lifecycle** — the controller that owns every state transition.
//! - **db** — sled-backed snapshot persistence.
//!
//! ## Design Principles
//!
//! 1. Conservation is non-negotiable: every packet's payouts plus refund
//!    equal its deposit, to the minor unit, on every terminal path.
//! 2. Operations are all-or-nothing. State commits only after every
//!    sub-call (including outbound transfers) has succeeded.
//! 3. Monetary arithmetic is checked or widened; wrapping arithmetic and
//!    money do not mix.
//! 4. Every public type is serializable (serde) for persistence and
//!    inspection.

pub mod asset;
pub mod claim;
pub mod config;
pub mod db;
pub mod distribution;
pub mod error;
pub mod fees;
pub mod gateway;
pub mod lifecycle;
pub mod memo;
pub mod packet;
pub mod store;

pub use asset::{Asset, AssetClass, ExtendedAsset, NftAsset, NftFamily, Symbol};
pub use claim::{Claim, ClaimKey};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use gateway::{DepositBody, DepositNotice, HandlerKind, Ledger, MemoryLedger, NoticeRouter};
pub use lifecycle::{DepositOutcome, Engine, EngineState, OpContext};
pub use packet::{password_hash, Packet, PacketAsset, PacketCode, PacketStatus, Policy};
