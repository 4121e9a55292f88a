//! # Lifecycle Controller
//!
//! The engine's entry points: deposit handling, claims, cancellation,
//! garbage collection, and the admin surface. This module owns the packet
//! rows — nothing else inserts, mutates, or deletes them.
//!
//! ## Atomicity
//!
//! Every entry point runs as one atomic unit: the engine state is cloned
//! at the start, the operation mutates the working copy, and only a fully
//! successful operation is committed (and persisted). Any failure — a
//! precondition, an outbound transfer, a storage fault — discards the
//! working copy, so there is never a partial effect to observe. The
//! surrounding runtime serializes entry points, so two operations never
//! interleave.
//!
//! ## Capabilities
//!
//! Authorization happens once, at the entry-point boundary, before any
//! handler logic runs: `claim` requires the configured relay identity,
//! the admin surface requires the owner. Nothing deeper in the engine
//! checks callers again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::asset::{mul, mul_div, Asset, AssetClass, ExtendedAsset, NftAsset, NftFamily};
use crate::claim::Claim;
use crate::config::{EngineConfig, FEE_FORWARD_MEMO, PAYOUT_MEMO, REFUND_MEMO};
use crate::db::EngineDb;
use crate::distribution;
use crate::error::{EngineError, Result};
use crate::fees::{self, FeeEntry, FeeSchedule, Listings};
use crate::gateway::{DepositBody, DepositNotice, HandlerKind, Ledger, NoticeRouter};
use crate::memo::{self, FungibleMemo};
use crate::packet::{Packet, PacketAsset, PacketCode, PacketStatus, Policy};
use crate::store::{ClaimStore, PacketStore};

// ---------------------------------------------------------------------------
// Context & state
// ---------------------------------------------------------------------------

/// Facts the surrounding runtime attests for one operation: who is
/// calling, what time it is, and the transaction-ordering entropy random
/// payouts draw from. The engine never asks the OS for any of these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpContext {
    /// The authenticated caller.
    pub caller: String,
    /// Attested wall-clock time.
    pub now: DateTime<Utc>,
    /// Transaction-ordering entropy, unknowable to claimants in advance.
    pub entropy: u64,
}

impl OpContext {
    pub fn new(caller: impl Into<String>, now: DateTime<Utc>, entropy: u64) -> Self {
        Self {
            caller: caller.into(),
            now,
            entropy,
        }
    }
}

/// The engine's entire persisted state: configuration and every table.
/// One value, loaded at entry-point start, persisted at exit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// Singleton configuration.
    pub config: EngineConfig,
    /// Fee-exempt asset classes.
    pub whitelist: BTreeSet<AssetClass>,
    /// Paid listings with expiry.
    pub listings: Listings,
    /// Per-contract fee entries.
    pub fees: FeeSchedule,
    /// The packet table.
    pub packets: PacketStore,
    /// The claim table.
    pub claims: ClaimStore,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            whitelist: BTreeSet::new(),
            listings: Listings::new(),
            fees: FeeSchedule::new(),
            packets: PacketStore::new(),
            claims: ClaimStore::new(),
        }
    }
}

/// What a deposit notification did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepositOutcome {
    /// Not addressed to the engine, or from an unregistered source.
    Ignored,
    /// A packet is now fully escrowed and open for claims.
    PacketCreated(PacketCode),
    /// A listing was registered or renewed.
    ListingRegistered {
        class: AssetClass,
        expires: DateTime<Utc>,
    },
    /// The NFT fee leg settled; the packet waits for its asset leg.
    NftFeeAccepted(PacketCode),
    /// The NFT asset leg arrived; the packet is open for claims.
    NftEscrowCompleted(PacketCode),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The lifecycle controller.
pub struct Engine {
    state: EngineState,
    router: NoticeRouter,
    db: Option<EngineDb>,
}

impl Engine {
    /// An in-memory engine with the given configuration. State does not
    /// survive the process; use [`Engine::open`] for durability.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            state: EngineState::new(config),
            router: NoticeRouter::new(),
            db: None,
        }
    }

    /// Opens a durable engine at `path`, resuming the persisted state if
    /// one exists and seeding `config` otherwise.
    pub fn open<P: AsRef<std::path::Path>>(path: P, config: EngineConfig) -> Result<Self> {
        let db = EngineDb::open(path).map_err(EngineError::Storage)?;
        let state = match db.load().map_err(EngineError::Storage)? {
            Some(state) => state,
            None => {
                let state = EngineState::new(config);
                db.save(&state).map_err(EngineError::Storage)?;
                state
            }
        };
        Ok(Self {
            state,
            router: NoticeRouter::new(),
            db: Some(db),
        })
    }

    /// Registers the handler for deposit notifications from
    /// (source, event). Wiring, not state — registrations are re-applied
    /// at startup, not persisted.
    pub fn register_handler(
        &mut self,
        source: impl Into<String>,
        event: impl Into<String>,
        kind: HandlerKind,
    ) {
        self.router.register(source, event, kind);
    }

    /// Read-only view of the current committed state.
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Runs `op` against a working copy of the state; commits (and
    /// persists) only on success.
    fn commit<T>(&mut self, op: impl FnOnce(&mut EngineState) -> Result<T>) -> Result<T> {
        let mut working = self.state.clone();
        let out = op(&mut working)?;
        if let Some(db) = &self.db {
            db.save(&working)?;
        }
        self.state = working;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Deposits
    // -----------------------------------------------------------------------

    /// Entry point for a transfer notification from the ledger runtime.
    ///
    /// Notifications from unregistered sources, or transfers the engine
    /// is merely a bystander of, are no-ops. Everything else must parse
    /// and validate, or the whole enclosing transfer is rejected and the
    /// funds stay with the depositor.
    pub fn handle_deposit(
        &mut self,
        ctx: &OpContext,
        ledger: &mut dyn Ledger,
        notice: &DepositNotice,
    ) -> Result<DepositOutcome> {
        let kind = match self.router.resolve(&notice.source, &notice.event) {
            Some(kind) => kind,
            None => {
                debug!(source = %notice.source, event = %notice.event, "unregistered notification");
                return Ok(DepositOutcome::Ignored);
            }
        };

        // Ledgers notify every party of a transfer; only inbound deposits
        // addressed to the engine concern us.
        if notice.to != self.state.config.engine_account
            || notice.from == self.state.config.engine_account
        {
            return Ok(DepositOutcome::Ignored);
        }

        match (kind, &notice.body) {
            (HandlerKind::FungibleDeposit, DepositBody::Fungible(asset)) => {
                let asset = asset.clone();
                self.commit(|st| fungible_deposit(st, ctx, ledger, notice, &asset))
            }
            (HandlerKind::NftDeposit, DepositBody::Nft(assets)) => {
                let assets = assets.clone();
                self.commit(|st| nft_deposit(st, ctx, notice, &assets))
            }
            _ => Err(EngineError::InvalidMemoFormat {
                reason: "transfer body does not match registered handler".into(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Claim
    // -----------------------------------------------------------------------

    /// Pays one claimant their share of a packet.
    ///
    /// The caller must be the configured relay — claimants authenticate
    /// off-chain and the relay attests their identity. Preconditions are
    /// checked in a fixed order (existence, password, dedup, identity
    /// gate); any failure aborts with no partial effect.
    pub fn claim(
        &mut self,
        ctx: &OpContext,
        ledger: &mut dyn Ledger,
        claimant: &str,
        code: &PacketCode,
        pw_hash: &str,
    ) -> Result<Claim> {
        if ctx.caller != self.state.config.relay {
            return Err(EngineError::UnauthorizedCaller {
                caller: ctx.caller.clone(),
            });
        }

        self.commit(|st| {
            let mut packet = st
                .packets
                .get(code)
                .filter(|p| p.status == PacketStatus::Created)
                .cloned()
                .ok_or_else(|| EngineError::RecordNotFound {
                    what: "packet",
                    key: code.to_string(),
                })?;

            if packet.pw_hash != pw_hash {
                return Err(EngineError::WrongPassword);
            }
            if st.claims.contains(claimant, code) {
                return Err(EngineError::DuplicateClaim {
                    receiver: claimant.to_string(),
                    code: code.to_string(),
                });
            }
            if packet.policy.is_gated() {
                let verified = !st.config.identity_contract.is_empty()
                    && ledger.identity_balance_of(&st.config.identity_contract, claimant) > 0;
                if !verified {
                    return Err(EngineError::AccountInvalid {
                        account: claimant.to_string(),
                    });
                }
            }

            let min_unit = match &packet.asset {
                PacketAsset::Fungible(class) => {
                    fees::min_unit(&class.symbol, st.fees.get(&class.contract))
                }
                PacketAsset::Nft { .. } => 1,
            };
            let payout = distribution::compute_payout(&packet, min_unit, ctx.entropy)?;

            match &packet.asset {
                PacketAsset::Fungible(class) => {
                    let amount = Asset::new(payout, class.symbol.clone());
                    ledger.transfer(&class.contract, claimant, &amount, PAYOUT_MEMO)?;
                }
                PacketAsset::Nft { family, contract } => {
                    let amount = NftAsset::new(payout, *family);
                    ledger.transfer_nft(contract, claimant, &amount, PAYOUT_MEMO)?;
                }
            }

            packet.apply_claim(payout, ctx.now)?;
            let sender = packet.sender.clone();
            let finished = packet.status == PacketStatus::Finished;
            st.packets.update(packet)?;

            let claim = st.claims.append(code, &sender, claimant, payout, ctx.now)?;
            info!(
                code = %code,
                claimant,
                payout,
                finished,
                "claim paid"
            );
            Ok(claim)
        })
    }

    // -----------------------------------------------------------------------
    // Cancel
    // -----------------------------------------------------------------------

    /// Refunds the unclaimed remainder to the sender and deletes the
    /// packet row. Permitted only after the expiry window; FINISHED rows
    /// are removed without a refund (there is nothing left to move).
    pub fn cancel(
        &mut self,
        ctx: &OpContext,
        ledger: &mut dyn Ledger,
        code: &PacketCode,
    ) -> Result<()> {
        self.commit(|st| {
            let packet = st
                .packets
                .get(code)
                .cloned()
                .ok_or_else(|| EngineError::RecordNotFound {
                    what: "packet",
                    key: code.to_string(),
                })?;

            let until = packet.expires_at(st.config.expiry_hours);
            if ctx.now <= until {
                return Err(EngineError::ExpiryNotReached { until });
            }

            match packet.status {
                PacketStatus::Created => {
                    match &packet.asset {
                        PacketAsset::Fungible(class) => {
                            let amount = Asset::new(packet.remain_quantity, class.symbol.clone());
                            ledger.transfer(&class.contract, &packet.sender, &amount, REFUND_MEMO)?;
                        }
                        PacketAsset::Nft { family, contract } => {
                            let amount = NftAsset::new(packet.remain_quantity, *family);
                            ledger.transfer_nft(contract, &packet.sender, &amount, REFUND_MEMO)?;
                        }
                    }
                    // Unclaimed slots get their share of the creation fee back.
                    if let Some(fee) = &packet.fee_charged {
                        let refund =
                            mul_div(fee.amount, packet.remain_quantity, packet.total_quantity)?;
                        if refund > 0 {
                            let amount = Asset::new(refund, fee.class.symbol.clone());
                            ledger.transfer(
                                &fee.class.contract,
                                &packet.sender,
                                &amount,
                                REFUND_MEMO,
                            )?;
                        }
                    }
                }
                PacketStatus::Init => {
                    // The asset leg never arrived; only the fee is held.
                    if let Some(fee) = &packet.fee_charged {
                        if fee.amount > 0 {
                            let amount = Asset::new(fee.amount, fee.class.symbol.clone());
                            ledger.transfer(
                                &fee.class.contract,
                                &packet.sender,
                                &amount,
                                REFUND_MEMO,
                            )?;
                        }
                    }
                }
                PacketStatus::Finished => {}
            }

            st.packets.remove(code);
            info!(code = %code, status = %packet.status, "packet cancelled");
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Sweep
    // -----------------------------------------------------------------------

    /// Deletes up to `max_rows` claim rows whose parent packet no longer
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NothingToSweep`] when no row was eligible,
    /// so callers can tell "backlog drained" from "nothing to do yet".
    pub fn sweep(&mut self, max_rows: usize) -> Result<usize> {
        self.commit(|st| {
            let mut deleted = 0usize;
            for id in st.claims.ids() {
                if deleted == max_rows {
                    break;
                }
                let orphaned = match st.claims.get(id) {
                    Some(claim) => !st.packets.contains(&claim.packet_code),
                    None => false,
                };
                if orphaned {
                    st.claims.remove(id);
                    deleted += 1;
                }
            }
            if deleted == 0 {
                return Err(EngineError::NothingToSweep);
            }
            info!(deleted, "swept orphaned claims");
            Ok(deleted)
        })
    }

    // -----------------------------------------------------------------------
    // Admin surface
    // -----------------------------------------------------------------------

    fn require_owner(&self, ctx: &OpContext) -> Result<()> {
        if ctx.caller != self.state.config.owner {
            return Err(EngineError::UnauthorizedCaller {
                caller: ctx.caller.clone(),
            });
        }
        Ok(())
    }

    /// Sets the trusted relay identity and the expiry window.
    pub fn set_relay(
        &mut self,
        ctx: &OpContext,
        ledger: &dyn Ledger,
        relay: &str,
        expiry_hours: u32,
    ) -> Result<()> {
        self.require_owner(ctx)?;
        if !ledger.account_exists(relay) {
            return Err(EngineError::AccountInvalid {
                account: relay.to_string(),
            });
        }
        if expiry_hours == 0 {
            return Err(EngineError::NonPositiveAmount {
                context: "expiry window",
            });
        }
        self.commit(|st| {
            st.config.relay = relay.to_string();
            st.config.expiry_hours = expiry_hours;
            Ok(())
        })
    }

    /// Upserts the fee entry for an issuing contract.
    pub fn set_fee(
        &mut self,
        ctx: &OpContext,
        ledger: &dyn Ledger,
        contract: &str,
        fee: Asset,
        fee_contract: &str,
        min_unit_exp: Option<u8>,
    ) -> Result<()> {
        self.require_owner(ctx)?;
        if !ledger.account_exists(contract) {
            return Err(EngineError::AccountInvalid {
                account: contract.to_string(),
            });
        }
        let supply = ledger.supply_of(fee_contract, &fee.symbol.code)?;
        if supply.amount == 0 {
            return Err(EngineError::RecordNotFound {
                what: "token",
                key: format!("{}@{}", fee.symbol.code, fee_contract),
            });
        }
        if supply.symbol.precision != fee.symbol.precision {
            return Err(EngineError::PrecisionMismatch {
                reason: format!(
                    "fee precision {} does not match supply precision {}",
                    fee.symbol.precision, supply.symbol.precision
                ),
            });
        }
        self.commit(|st| {
            st.fees.upsert(
                contract,
                FeeEntry {
                    fee,
                    fee_contract: fee_contract.to_string(),
                    min_unit_exp,
                },
            )
        })
    }

    /// Deletes the fee entry for an issuing contract.
    pub fn del_fee(&mut self, ctx: &OpContext, contract: &str) -> Result<()> {
        self.require_owner(ctx)?;
        self.commit(|st| st.fees.delete(contract).map(|_| ()))
    }

    /// Sets the fee a listing registration must pay.
    pub fn set_listing_fee(&mut self, ctx: &OpContext, fee: ExtendedAsset) -> Result<()> {
        self.require_owner(ctx)?;
        if fee.amount == 0 {
            return Err(EngineError::NonPositiveAmount {
                context: "listing fee",
            });
        }
        self.commit(|st| {
            st.config.listing_fee = Some(fee);
            Ok(())
        })
    }

    /// Sets the account forwarded fees are paid to.
    pub fn set_fee_collector(
        &mut self,
        ctx: &OpContext,
        ledger: &dyn Ledger,
        collector: &str,
    ) -> Result<()> {
        self.require_owner(ctx)?;
        if !ledger.account_exists(collector) {
            return Err(EngineError::AccountInvalid {
                account: collector.to_string(),
            });
        }
        self.commit(|st| {
            st.config.fee_collector = Some(collector.to_string());
            Ok(())
        })
    }

    /// Adds an asset class to the fee-exempt whitelist. The class is
    /// taken from the token's supply so its precision is authoritative.
    pub fn add_whitelist(
        &mut self,
        ctx: &OpContext,
        ledger: &dyn Ledger,
        symbol_code: &str,
        contract: &str,
    ) -> Result<AssetClass> {
        self.require_owner(ctx)?;
        let supply = ledger.supply_of(contract, symbol_code)?;
        if supply.amount == 0 {
            return Err(EngineError::RecordNotFound {
                what: "token",
                key: format!("{}@{}", symbol_code, contract),
            });
        }
        let class = AssetClass::new(supply.symbol, contract);
        self.commit(|st| {
            st.whitelist.insert(class.clone());
            Ok(class.clone())
        })
    }

    /// Switches identity gating on or off and points at the contract
    /// whose token attests identity.
    pub fn set_gating(
        &mut self,
        ctx: &OpContext,
        enabled: bool,
        identity_contract: &str,
    ) -> Result<()> {
        self.require_owner(ctx)?;
        self.commit(|st| {
            st.config.gating_enabled = enabled;
            st.config.identity_contract = identity_contract.to_string();
            Ok(())
        })
    }

    /// Destructively deletes a packet row and every claim row against it.
    /// Returns the number of rows removed.
    pub fn purge_packet(&mut self, ctx: &OpContext, code: &PacketCode) -> Result<usize> {
        self.require_owner(ctx)?;
        self.commit(|st| {
            let mut removed = 0usize;
            if st.packets.remove(code).is_some() {
                removed += 1;
            }
            for id in st.claims.for_packet(code) {
                st.claims.remove(id);
                removed += 1;
            }
            if removed == 0 {
                return Err(EngineError::RecordNotFound {
                    what: "packet",
                    key: code.to_string(),
                });
            }
            info!(code = %code, removed, "packet purged");
            Ok(removed)
        })
    }
}

// ---------------------------------------------------------------------------
// Deposit handlers
// ---------------------------------------------------------------------------

fn fungible_deposit(
    st: &mut EngineState,
    ctx: &OpContext,
    ledger: &mut dyn Ledger,
    notice: &DepositNotice,
    asset: &Asset,
) -> Result<DepositOutcome> {
    if asset.amount == 0 {
        return Err(EngineError::NonPositiveAmount {
            context: "deposit quantity",
        });
    }
    asset.symbol.validate()?;

    match memo::parse_fungible(&notice.memo)? {
        FungibleMemo::Create {
            pw_hash,
            count,
            policy,
            code,
        } => create_fungible_packet(st, ctx, notice, asset, pw_hash, count, policy, code),
        FungibleMemo::RegisterListing {
            symbol_code,
            contract,
        } => register_listing(st, ctx, ledger, notice, asset, &symbol_code, &contract),
        FungibleMemo::NftFeeLeg {
            code,
            family,
            quantity,
            nft_contract,
        } => nft_fee_leg(st, ctx, ledger, notice, asset, code, family, quantity, &nft_contract),
    }
}

#[allow(clippy::too_many_arguments)]
fn create_fungible_packet(
    st: &mut EngineState,
    ctx: &OpContext,
    notice: &DepositNotice,
    asset: &Asset,
    pw_hash: String,
    count: u32,
    policy: Policy,
    code: PacketCode,
) -> Result<DepositOutcome> {
    let class = AssetClass::new(asset.symbol.clone(), notice.source.clone());

    if st.packets.contains(&code) {
        return Err(EngineError::DuplicateCode {
            code: code.to_string(),
        });
    }
    if !st.whitelist.contains(&class) && !st.listings.is_listed(&class, ctx.now) {
        return Err(EngineError::FeeNotConfigured {
            key: class.to_string(),
        });
    }
    if count == 0 {
        return Err(EngineError::NonPositiveAmount {
            context: "receiver count",
        });
    }
    if policy.is_gated() && !st.config.gating_enabled {
        return Err(EngineError::FeatureDisabled {
            feature: "identity-gated packets",
        });
    }

    // Every claim slot must clear the minimal unit, or the random split
    // could not guarantee its floor.
    let min_unit = fees::min_unit(&asset.symbol, st.fees.get(&class.contract));
    let fair_share = asset.amount / count as u64;
    if fair_share < min_unit {
        return Err(EngineError::QuantityBelowMinimum {
            required: min_unit,
            actual: fair_share,
        });
    }

    let packet = Packet {
        code: code.clone(),
        sender: notice.from.clone(),
        pw_hash,
        asset: PacketAsset::Fungible(class),
        total_quantity: asset.amount,
        remain_quantity: asset.amount,
        receiver_count: count,
        remain_count: count,
        fee_charged: None,
        status: PacketStatus::Created,
        policy,
        created_at: ctx.now,
        updated_at: ctx.now,
    };
    st.packets.insert(packet)?;
    info!(code = %code, sender = %notice.from, amount = asset.amount, count, policy = %policy, "packet created");
    Ok(DepositOutcome::PacketCreated(code))
}

fn register_listing(
    st: &mut EngineState,
    ctx: &OpContext,
    ledger: &mut dyn Ledger,
    notice: &DepositNotice,
    paid: &Asset,
    symbol_code: &str,
    contract: &str,
) -> Result<DepositOutcome> {
    let fee = st
        .config
        .listing_fee
        .clone()
        .ok_or_else(|| EngineError::FeeNotConfigured {
            key: "listing fee".to_string(),
        })?;

    let paid_class = AssetClass::new(paid.symbol.clone(), notice.source.clone());
    if paid_class != fee.class {
        return Err(EngineError::FeeInsufficient {
            required: fee.amount,
            paid: 0,
        });
    }
    if paid.amount < fee.amount {
        return Err(EngineError::FeeInsufficient {
            required: fee.amount,
            paid: paid.amount,
        });
    }

    let supply = ledger.supply_of(contract, symbol_code)?;
    if supply.amount == 0 {
        return Err(EngineError::RecordNotFound {
            what: "token",
            key: format!("{}@{}", symbol_code, contract),
        });
    }
    let class = AssetClass::new(supply.symbol, contract);
    if st.whitelist.contains(&class) {
        return Err(EngineError::DuplicateCode {
            code: format!("{} (fee-exempt)", class),
        });
    }

    let expires = st.listings.register(class.clone(), ctx.now)?;

    if let Some(collector) = &st.config.fee_collector {
        ledger.transfer(&notice.source, collector, paid, FEE_FORWARD_MEMO)?;
    }

    info!(class = %class, expires = %expires, "listing registered");
    Ok(DepositOutcome::ListingRegistered { class, expires })
}

#[allow(clippy::too_many_arguments)]
fn nft_fee_leg(
    st: &mut EngineState,
    ctx: &OpContext,
    ledger: &mut dyn Ledger,
    notice: &DepositNotice,
    paid: &Asset,
    code: PacketCode,
    family: NftFamily,
    quantity: u64,
    nft_contract: &str,
) -> Result<DepositOutcome> {
    if !family.is_valid() {
        return Err(EngineError::InvalidMemoFormat {
            reason: "nft id must exceed parent_id".into(),
        });
    }
    if quantity == 0 {
        return Err(EngineError::NonPositiveAmount {
            context: "nft quantity",
        });
    }
    if st.packets.contains(&code) {
        return Err(EngineError::DuplicateCode {
            code: code.to_string(),
        });
    }

    let entry = st
        .fees
        .get(nft_contract)
        .ok_or_else(|| EngineError::FeeNotConfigured {
            key: nft_contract.to_string(),
        })?;
    let required = mul(entry.fee.amount, quantity)?;
    if notice.source != entry.fee_contract || paid.symbol != entry.fee.symbol {
        return Err(EngineError::FeeInsufficient { required, paid: 0 });
    }
    if paid.amount < required {
        return Err(EngineError::FeeInsufficient {
            required,
            paid: paid.amount,
        });
    }

    let balance = ledger.nft_balance_of(nft_contract, &notice.from, &family);
    if balance < quantity {
        return Err(EngineError::QuantityBelowMinimum {
            required: quantity,
            actual: balance,
        });
    }

    let count = u32::try_from(quantity).map_err(|_| EngineError::AmountOverflow)?;
    let packet = Packet {
        code: code.clone(),
        sender: notice.from.clone(),
        pw_hash: String::new(),
        asset: PacketAsset::Nft {
            family,
            contract: nft_contract.to_string(),
        },
        total_quantity: quantity,
        remain_quantity: quantity,
        receiver_count: count,
        remain_count: count,
        fee_charged: Some(ExtendedAsset::new(
            paid.amount,
            AssetClass::new(paid.symbol.clone(), notice.source.clone()),
        )),
        status: PacketStatus::Init,
        policy: Policy::Mean,
        created_at: ctx.now,
        updated_at: ctx.now,
    };
    st.packets.insert(packet)?;
    info!(code = %code, sender = %notice.from, quantity, "nft fee leg accepted");
    Ok(DepositOutcome::NftFeeAccepted(code))
}

fn nft_deposit(
    st: &mut EngineState,
    ctx: &OpContext,
    notice: &DepositNotice,
    assets: &[NftAsset],
) -> Result<DepositOutcome> {
    let quantity = match assets {
        [one] => *one,
        _ => {
            return Err(EngineError::InvalidMemoFormat {
                reason: "exactly one nft family per deposit".into(),
            });
        }
    };
    if quantity.amount == 0 {
        return Err(EngineError::NonPositiveAmount {
            context: "deposit quantity",
        });
    }

    let parsed = memo::parse_nft(&notice.memo)?;

    if let Some(existing) = st.packets.get(&parsed.code).cloned() {
        // Second leg of the two-leg flow: must match the fee leg exactly.
        if existing.status != PacketStatus::Init {
            return Err(EngineError::DuplicateCode {
                code: parsed.code.to_string(),
            });
        }
        if existing.sender != notice.from {
            return Err(EngineError::UnauthorizedCaller {
                caller: notice.from.clone(),
            });
        }
        let (family, contract) = match &existing.asset {
            PacketAsset::Nft { family, contract } => (*family, contract.clone()),
            PacketAsset::Fungible(_) => {
                return Err(EngineError::DuplicateCode {
                    code: parsed.code.to_string(),
                });
            }
        };
        if contract != notice.source {
            return Err(EngineError::AccountInvalid {
                account: notice.source.clone(),
            });
        }
        if family != quantity.family {
            return Err(EngineError::PrecisionMismatch {
                reason: format!(
                    "nft family {} does not match fee leg {}",
                    quantity.family, family
                ),
            });
        }
        if quantity.amount != existing.total_quantity {
            return Err(EngineError::QuantityBelowMinimum {
                required: existing.total_quantity,
                actual: quantity.amount,
            });
        }

        let mut packet = existing;
        packet.pw_hash = parsed.pw_hash;
        packet.status = PacketStatus::Created;
        packet.updated_at = ctx.now;
        st.packets.update(packet)?;
        info!(code = %parsed.code, "nft escrow completed");
        return Ok(DepositOutcome::NftEscrowCompleted(parsed.code));
    }

    // No fee leg: direct creation is allowed only where the configured
    // fee is zero.
    match st.fees.get(&notice.source) {
        None => {
            return Err(EngineError::FeeNotConfigured {
                key: notice.source.clone(),
            });
        }
        Some(entry) if entry.fee.amount > 0 => {
            return Err(EngineError::FeeInsufficient {
                required: mul(entry.fee.amount, quantity.amount)?,
                paid: 0,
            });
        }
        Some(_) => {}
    }
    if !quantity.family.is_valid() {
        return Err(EngineError::InvalidMemoFormat {
            reason: "nft id must exceed parent_id".into(),
        });
    }

    let count = u32::try_from(quantity.amount).map_err(|_| EngineError::AmountOverflow)?;
    let packet = Packet {
        code: parsed.code.clone(),
        sender: notice.from.clone(),
        pw_hash: parsed.pw_hash,
        asset: PacketAsset::Nft {
            family: quantity.family,
            contract: notice.source.clone(),
        },
        total_quantity: quantity.amount,
        remain_quantity: quantity.amount,
        receiver_count: count,
        remain_count: count,
        fee_charged: None,
        status: PacketStatus::Created,
        policy: Policy::Mean,
        created_at: ctx.now,
        updated_at: ctx.now,
    };
    st.packets.insert(packet)?;
    info!(code = %parsed.code, sender = %notice.from, quantity = quantity.amount, "nft packet created");
    Ok(DepositOutcome::PacketCreated(parsed.code))
}
