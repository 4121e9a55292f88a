//! # Escrow Gateway
//!
//! The boundary between the engine and the ledger contracts that actually
//! hold value. Nothing else in the engine moves custodied funds.
//!
//! **Inbound**, deposits arrive as [`DepositNotice`] values dispatched
//! through an explicit handler table: the surrounding runtime broadcasts
//! transfer notifications to every party of a transfer, and the
//! [`NoticeRouter`] decides — by (source identity, event name) — whether a
//! notification is one of ours and which handler owns it. Unregistered
//! notifications are ignored, not rejected.
//!
//! **Outbound**, all transfers go through the [`Ledger`] trait. Exactly
//! three call sites exist: claim payouts, cancel refunds, and fee
//! forwarding. Each call is one atomic sub-call inside the enclosing
//! operation; a failure aborts the operation and every table write it
//! made.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::asset::{Asset, NftAsset, NftFamily};
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Inbound notifications
// ---------------------------------------------------------------------------

/// The value leg of a deposit notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositBody {
    /// A fungible transfer.
    Fungible(Asset),
    /// An NFT transfer; the engine accepts exactly one family per deposit.
    Nft(Vec<NftAsset>),
}

/// A transfer notification as the ledger runtime delivers it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositNotice {
    /// The contract that emitted the notification.
    pub source: String,
    /// The event name, e.g. `"transfer"`.
    pub event: String,
    /// The depositor.
    pub from: String,
    /// The recipient the ledger credited.
    pub to: String,
    /// What was transferred.
    pub body: DepositBody,
    /// The structured memo; grammar depends on the handler and arity.
    pub memo: String,
}

/// Which engine handler owns notifications from a given source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerKind {
    /// Fungible transfers: packet creation, listing registration, and the
    /// NFT fee leg all arrive here, distinguished by memo arity.
    FungibleDeposit,
    /// NFT transfers: the asset leg of the two-leg NFT flow.
    NftDeposit,
}

/// Composite routing key: which contract emitted which event.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerKey {
    /// Emitting contract identity.
    pub source: String,
    /// Event name.
    pub event: String,
}

/// The registered-handler table, consulted synchronously before any
/// handler logic runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeRouter {
    handlers: BTreeMap<HandlerKey, HandlerKind>,
}

impl NoticeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-points) the handler for (source, event).
    pub fn register(&mut self, source: impl Into<String>, event: impl Into<String>, kind: HandlerKind) {
        self.handlers.insert(
            HandlerKey {
                source: source.into(),
                event: event.into(),
            },
            kind,
        );
    }

    /// Looks up the handler for a notification, if any is registered.
    pub fn resolve(&self, source: &str, event: &str) -> Option<HandlerKind> {
        self.handlers
            .get(&HandlerKey {
                source: source.to_string(),
                event: event.to_string(),
            })
            .copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Outbound ledger interface
// ---------------------------------------------------------------------------

/// The ledger contracts the engine escrows value on, seen from inside the
/// engine. Implementations wrap the runtime's synchronous inline calls;
/// every method is a sub-call of the enclosing atomic operation.
pub trait Ledger {
    /// Transfers fungible value out of engine custody.
    fn transfer(&mut self, bank: &str, to: &str, amount: &Asset, memo: &str) -> Result<()>;

    /// Transfers NFT items out of engine custody.
    fn transfer_nft(&mut self, bank: &str, to: &str, amount: &NftAsset, memo: &str) -> Result<()>;

    /// The circulating supply of `code` on `bank`. Errs with
    /// record-not-found when the token does not exist there.
    fn supply_of(&self, bank: &str, code: &str) -> Result<Asset>;

    /// How many items of `family` on `bank` the `owner` holds.
    fn nft_balance_of(&self, bank: &str, owner: &str, family: &NftFamily) -> u64;

    /// The owner's balance of the identity token issued on `bank`.
    /// Positive means the account is identity-verified.
    fn identity_balance_of(&self, bank: &str, owner: &str) -> u64;

    /// Whether `account` exists on the ledger at all.
    fn account_exists(&self, account: &str) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory reference ledger
// ---------------------------------------------------------------------------

/// What one outbound transfer moved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferValue {
    Fungible(Asset),
    Nft(NftAsset),
}

/// One recorded outbound transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRecord {
    /// The contract the transfer went through.
    pub bank: String,
    /// The recipient.
    pub to: String,
    /// What moved.
    pub value: TransferValue,
    /// The outbound memo.
    pub memo: String,
}

/// An in-memory [`Ledger`] for tests and tooling.
///
/// Records every outbound transfer and serves balance/supply lookups from
/// seeded maps. `fail_transfers` turns every outbound call into an error,
/// which is how the rollback tests simulate a ledger refusing a payout.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    supplies: BTreeMap<(String, String), Asset>,
    nft_balances: BTreeMap<(String, String, NftFamily), u64>,
    identity_balances: BTreeMap<(String, String), u64>,
    accounts: BTreeSet<String>,
    transfers: Vec<TransferRecord>,
    /// When set, every outbound transfer fails.
    pub fail_transfers: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the circulating supply of a token.
    pub fn set_supply(&mut self, bank: &str, supply: Asset) {
        self.supplies
            .insert((bank.to_string(), supply.symbol.code.clone()), supply);
    }

    /// Seeds an NFT balance.
    pub fn set_nft_balance(&mut self, bank: &str, owner: &str, family: NftFamily, amount: u64) {
        self.nft_balances
            .insert((bank.to_string(), owner.to_string(), family), amount);
    }

    /// Seeds an identity-token balance.
    pub fn set_identity_balance(&mut self, bank: &str, owner: &str, amount: u64) {
        self.identity_balances
            .insert((bank.to_string(), owner.to_string()), amount);
    }

    /// Registers an account so `account_exists` answers true.
    pub fn add_account(&mut self, account: &str) {
        self.accounts.insert(account.to_string());
    }

    /// Every outbound transfer recorded so far, in order.
    pub fn transfers(&self) -> &[TransferRecord] {
        &self.transfers
    }

    /// Total fungible minor units paid to `account`, across all banks.
    pub fn fungible_paid_to(&self, account: &str) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.to == account)
            .filter_map(|t| match &t.value {
                TransferValue::Fungible(asset) => Some(asset.amount),
                TransferValue::Nft(_) => None,
            })
            .sum()
    }
}

impl Ledger for MemoryLedger {
    fn transfer(&mut self, bank: &str, to: &str, amount: &Asset, memo: &str) -> Result<()> {
        if self.fail_transfers {
            return Err(EngineError::AccountInvalid {
                account: to.to_string(),
            });
        }
        self.transfers.push(TransferRecord {
            bank: bank.to_string(),
            to: to.to_string(),
            value: TransferValue::Fungible(amount.clone()),
            memo: memo.to_string(),
        });
        Ok(())
    }

    fn transfer_nft(&mut self, bank: &str, to: &str, amount: &NftAsset, memo: &str) -> Result<()> {
        if self.fail_transfers {
            return Err(EngineError::AccountInvalid {
                account: to.to_string(),
            });
        }
        self.transfers.push(TransferRecord {
            bank: bank.to_string(),
            to: to.to_string(),
            value: TransferValue::Nft(*amount),
            memo: memo.to_string(),
        });
        Ok(())
    }

    fn supply_of(&self, bank: &str, code: &str) -> Result<Asset> {
        self.supplies
            .get(&(bank.to_string(), code.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::RecordNotFound {
                what: "token",
                key: format!("{}@{}", code, bank),
            })
    }

    fn nft_balance_of(&self, bank: &str, owner: &str, family: &NftFamily) -> u64 {
        self.nft_balances
            .get(&(bank.to_string(), owner.to_string(), *family))
            .copied()
            .unwrap_or(0)
    }

    fn identity_balance_of(&self, bank: &str, owner: &str) -> u64 {
        self.identity_balances
            .get(&(bank.to_string(), owner.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn account_exists(&self, account: &str) -> bool {
        self.accounts.contains(account)
    }
}
