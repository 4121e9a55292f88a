//! Integration tests for the packet lifecycle.
//!
//! These tests exercise the engine across module boundaries the way the
//! surrounding runtime would: deposits arrive as transfer notifications,
//! claims come in through the relay, and every balance movement is
//! observed on the in-memory ledger.

use chrono::{Duration, Utc};
use vermilion_engine::gateway::TransferValue;
use vermilion_engine::{
    password_hash, Asset, DepositBody, DepositNotice, DepositOutcome, Engine, EngineConfig,
    EngineError, ExtendedAsset, HandlerKind, MemoryLedger, NftAsset, NftFamily, OpContext,
    PacketCode, PacketStatus, Symbol,
};

const ENGINE: &str = "redpack.core";
const BANK: &str = "token.core";
const NFT_BANK: &str = "nft.core";
const RELAY: &str = "redpack.core"; // default until set_relay says otherwise

fn sym() -> Symbol {
    Symbol::new("RED", 2).unwrap()
}

fn ctx(caller: &str) -> OpContext {
    OpContext::new(caller, Utc::now(), 42)
}

fn ctx_at(caller: &str, now: chrono::DateTime<Utc>) -> OpContext {
    OpContext::new(caller, now, 42)
}

/// Engine with both handlers registered and RED whitelisted.
fn setup() -> (Engine, MemoryLedger) {
    let mut ledger = MemoryLedger::new();
    ledger.set_supply(BANK, Asset::new(1_000_000_000, sym()));

    let mut engine = Engine::new(EngineConfig::new(ENGINE));
    engine.register_handler(BANK, "transfer", HandlerKind::FungibleDeposit);
    engine.register_handler(NFT_BANK, "transfer", HandlerKind::NftDeposit);
    engine
        .add_whitelist(&ctx(ENGINE), &ledger, "RED", BANK)
        .unwrap();
    (engine, ledger)
}

fn deposit(from: &str, amount: u64, memo: &str) -> DepositNotice {
    DepositNotice {
        source: BANK.into(),
        event: "transfer".into(),
        from: from.into(),
        to: ENGINE.into(),
        body: DepositBody::Fungible(Asset::new(amount, sym())),
        memo: memo.into(),
    }
}

fn create_packet(engine: &mut Engine, ledger: &mut MemoryLedger, memo: &str, amount: u64) {
    let outcome = engine
        .handle_deposit(&ctx(BANK), ledger, &deposit("alice", amount, memo))
        .unwrap();
    assert!(matches!(
        outcome,
        DepositOutcome::PacketCreated(_) | DepositOutcome::NftFeeAccepted(_)
    ));
}

// ---------------------------------------------------------------------------
// The specification scenario
// ---------------------------------------------------------------------------

#[test]
fn five_way_mean_split_pays_everyone_then_finishes() {
    let (mut engine, mut ledger) = setup();
    let memo = format!("{}:5:MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 10_000); // 100.00

    let code = PacketCode::new("pkt1").unwrap();
    let packet = engine.state().packets.get(&code).unwrap();
    assert_eq!(packet.remain_quantity, 10_000);
    assert_eq!(packet.remain_count, 5);
    assert_eq!(packet.status, PacketStatus::Created);

    let claimants = ["bob", "carol", "dave", "erin", "frank"];
    for claimant in claimants {
        let claim = engine
            .claim(&ctx(RELAY), &mut ledger, claimant, &code, &password_hash("pw"))
            .unwrap();
        assert_eq!(claim.quantity, 2_000); // 20.00 each
    }

    // Exhausted: the row stays as Finished so the dedup index remains
    // queryable, but it answers like a deleted packet.
    let packet = engine.state().packets.get(&code).unwrap();
    assert_eq!(packet.status, PacketStatus::Finished);
    assert_eq!(packet.remain_quantity, 0);

    let result = engine.claim(&ctx(RELAY), &mut ledger, "grace", &code, &password_hash("pw"));
    assert!(matches!(result, Err(EngineError::RecordNotFound { .. })));

    // Conservation: everything the sender deposited went to claimants.
    let paid: u64 = claimants.iter().map(|c| ledger.fungible_paid_to(c)).sum();
    assert_eq!(paid, 10_000);
}

// ---------------------------------------------------------------------------
// Claim semantics
// ---------------------------------------------------------------------------

#[test]
fn claim_is_exactly_once() {
    let (mut engine, mut ledger) = setup();
    let memo = format!("{}:3:MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 9_000);

    let code = PacketCode::new("pkt1").unwrap();
    engine
        .claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"))
        .unwrap();

    let result = engine.claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"));
    assert!(matches!(result, Err(EngineError::DuplicateClaim { .. })));

    // Exactly one claim row and one outbound transfer for bob.
    assert_eq!(engine.state().claims.len(), 1);
    assert_eq!(ledger.transfers().len(), 1);
    assert_eq!(ledger.fungible_paid_to("bob"), 3_000);
}

#[test]
fn wrong_password_rejected_before_any_effect() {
    let (mut engine, mut ledger) = setup();
    let memo = format!("{}:3:MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 9_000);

    let code = PacketCode::new("pkt1").unwrap();
    let result = engine.claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("nope"));
    assert!(matches!(result, Err(EngineError::WrongPassword)));
    assert!(engine.state().claims.is_empty());
    assert!(ledger.transfers().is_empty());
}

#[test]
fn unknown_packet_not_found() {
    let (mut engine, mut ledger) = setup();
    let code = PacketCode::new("ghost").unwrap();
    let result = engine.claim(&ctx(RELAY), &mut ledger, "bob", &code, "h");
    assert!(matches!(result, Err(EngineError::RecordNotFound { .. })));
}

#[test]
fn equal_split_exactness_333_333_334() {
    let (mut engine, mut ledger) = setup();
    let memo = format!("{}:3:MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 1_000);

    let code = PacketCode::new("pkt1").unwrap();
    let mut paid = Vec::new();
    for claimant in ["bob", "carol", "dave"] {
        let claim = engine
            .claim(&ctx(RELAY), &mut ledger, claimant, &code, &password_hash("pw"))
            .unwrap();
        paid.push(claim.quantity);
    }
    assert_eq!(paid, vec![333, 333, 334]);
}

// ---------------------------------------------------------------------------
// Duplicate codes
// ---------------------------------------------------------------------------

#[test]
fn duplicate_code_rejected_in_any_status() {
    let (mut engine, mut ledger) = setup();
    let memo = format!("{}:2:MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 1_000);

    // Same code while Created.
    let result = engine.handle_deposit(&ctx(BANK), &mut ledger, &deposit("bob", 1_000, &memo));
    assert!(matches!(result, Err(EngineError::DuplicateCode { .. })));

    // Drain to Finished; still a duplicate.
    let code = PacketCode::new("pkt1").unwrap();
    for claimant in ["bob", "carol"] {
        engine
            .claim(&ctx(RELAY), &mut ledger, claimant, &code, &password_hash("pw"))
            .unwrap();
    }
    assert_eq!(
        engine.state().packets.get(&code).unwrap().status,
        PacketStatus::Finished
    );
    let result = engine.handle_deposit(&ctx(BANK), &mut ledger, &deposit("bob", 1_000, &memo));
    assert!(matches!(result, Err(EngineError::DuplicateCode { .. })));
}

// ---------------------------------------------------------------------------
// Expiry & refunds
// ---------------------------------------------------------------------------

#[test]
fn cancel_gated_by_expiry_window() {
    let (mut engine, mut ledger) = setup();
    let memo = format!("{}:4:MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 8_000);

    let code = PacketCode::new("pkt1").unwrap();
    let result = engine.cancel(&ctx("anyone"), &mut ledger, &code);
    assert!(matches!(result, Err(EngineError::ExpiryNotReached { .. })));

    // One claim, then cancel after the window: the sender gets exactly
    // what remains.
    engine
        .claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"))
        .unwrap();
    let later = Utc::now() + Duration::hours(25);
    engine
        .cancel(&ctx_at("anyone", later), &mut ledger, &code)
        .unwrap();

    assert!(engine.state().packets.get(&code).is_none());
    assert_eq!(ledger.fungible_paid_to("bob"), 2_000);
    assert_eq!(ledger.fungible_paid_to("alice"), 6_000);

    // Conservation across the cancelled outcome.
    assert_eq!(
        ledger.fungible_paid_to("bob") + ledger.fungible_paid_to("alice"),
        8_000
    );

    // Deletion is terminal: a second cancel finds nothing.
    let result = engine.cancel(&ctx_at("anyone", later), &mut ledger, &code);
    assert!(matches!(result, Err(EngineError::RecordNotFound { .. })));
}

#[test]
fn finished_packet_cancel_deletes_without_refund() {
    let (mut engine, mut ledger) = setup();
    let memo = format!("{}:2:MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 1_000);

    let code = PacketCode::new("pkt1").unwrap();
    for claimant in ["bob", "carol"] {
        engine
            .claim(&ctx(RELAY), &mut ledger, claimant, &code, &password_hash("pw"))
            .unwrap();
    }
    let transfers_before = ledger.transfers().len();

    let later = Utc::now() + Duration::hours(25);
    engine
        .cancel(&ctx_at("anyone", later), &mut ledger, &code)
        .unwrap();
    assert!(engine.state().packets.get(&code).is_none());
    assert_eq!(ledger.transfers().len(), transfers_before);
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

#[test]
fn sweep_is_bounded_and_fails_loudly_when_drained() {
    let (mut engine, mut ledger) = setup();

    // Two packets, two claims each, both cancelled after expiry so their
    // claims become orphans.
    for code in ["pkt1", "pkt2"] {
        let memo = format!("{}:2:MEAN:{}", password_hash("pw"), code);
        create_packet(&mut engine, &mut ledger, &memo, 1_000);
        let code = PacketCode::new(code).unwrap();
        for claimant in ["bob", "carol"] {
            engine
                .claim(&ctx(RELAY), &mut ledger, claimant, &code, &password_hash("pw"))
                .unwrap();
        }
        let later = Utc::now() + Duration::hours(25);
        engine
            .cancel(&ctx_at("anyone", later), &mut ledger, &code)
            .unwrap();
    }
    assert_eq!(engine.state().claims.len(), 4);

    // Nothing eligible yet? Not here — all four are orphans; drain in
    // bounded steps.
    assert_eq!(engine.sweep(3).unwrap(), 3);
    assert_eq!(engine.state().claims.len(), 1);
    assert_eq!(engine.sweep(3).unwrap(), 1);
    assert!(engine.state().claims.is_empty());

    // Drained: the next call must fail loudly.
    assert!(matches!(engine.sweep(3), Err(EngineError::NothingToSweep)));
}

#[test]
fn sweep_leaves_claims_of_live_packets_alone() {
    let (mut engine, mut ledger) = setup();
    let memo = format!("{}:2:MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 1_000);
    let code = PacketCode::new("pkt1").unwrap();
    engine
        .claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"))
        .unwrap();

    // The packet still exists (Created), so its claim is not an orphan.
    assert!(matches!(engine.sweep(10), Err(EngineError::NothingToSweep)));
    assert_eq!(engine.state().claims.len(), 1);
}

// ---------------------------------------------------------------------------
// Identity-gated packets
// ---------------------------------------------------------------------------

#[test]
fn gated_claim_requires_identity_balance() {
    let (mut engine, mut ledger) = setup();
    engine.set_gating(&ctx(ENGINE), true, "did.token").unwrap();

    let memo = format!("{}:2:IDENTITY_GATED_MEAN:pkt1", password_hash("pw"));
    create_packet(&mut engine, &mut ledger, &memo, 1_000);
    let code = PacketCode::new("pkt1").unwrap();

    // bob holds no identity token.
    let result = engine.claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"));
    assert!(matches!(result, Err(EngineError::AccountInvalid { .. })));

    ledger.set_identity_balance("did.token", "bob", 1);
    let claim = engine
        .claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"))
        .unwrap();
    assert_eq!(claim.quantity, 500);
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[test]
fn paid_listing_admits_a_class_for_one_term() {
    let mut ledger = MemoryLedger::new();
    ledger.set_supply(BANK, Asset::new(1_000_000, sym()));
    let new_sym = Symbol::new("BLU", 4).unwrap();
    ledger.set_supply("token.other", Asset::new(500_000, new_sym.clone()));

    let mut engine = Engine::new(EngineConfig::new(ENGINE));
    engine.register_handler(BANK, "transfer", HandlerKind::FungibleDeposit);
    engine.register_handler("token.other", "transfer", HandlerKind::FungibleDeposit);
    engine
        .set_listing_fee(
            &ctx(ENGINE),
            ExtendedAsset::new(200, vermilion_engine::AssetClass::new(sym(), BANK)),
        )
        .unwrap();

    // Underpaying fails and registers nothing.
    let result = engine.handle_deposit(
        &ctx(BANK),
        &mut ledger,
        &deposit("alice", 100, "BLU:token.other"),
    );
    assert!(matches!(result, Err(EngineError::FeeInsufficient { .. })));

    // Paying the fee lists BLU@token.other.
    let outcome = engine
        .handle_deposit(&ctx(BANK), &mut ledger, &deposit("alice", 200, "BLU:token.other"))
        .unwrap();
    assert!(matches!(outcome, DepositOutcome::ListingRegistered { .. }));

    // A packet in the listed class now goes through.
    let memo = format!("{}:2:MEAN:pkt1", password_hash("pw"));
    let notice = DepositNotice {
        source: "token.other".into(),
        event: "transfer".into(),
        from: "alice".into(),
        to: ENGINE.into(),
        body: DepositBody::Fungible(Asset::new(100_000, new_sym)),
        memo,
    };
    let outcome = engine.handle_deposit(&ctx(BANK), &mut ledger, &notice).unwrap();
    assert!(matches!(outcome, DepositOutcome::PacketCreated(_)));

    // Early renewal is refused.
    let result = engine.handle_deposit(
        &ctx(BANK),
        &mut ledger,
        &deposit("alice", 200, "BLU:token.other"),
    );
    assert!(matches!(result, Err(EngineError::ExpiryNotReached { .. })));
}

// ---------------------------------------------------------------------------
// NFT two-leg flow
// ---------------------------------------------------------------------------

fn family() -> NftFamily {
    NftFamily::new(7, 1)
}

fn nft_setup() -> (Engine, MemoryLedger) {
    let (mut engine, mut ledger) = setup();
    ledger.add_account(NFT_BANK);
    // 50 RED per escrowed item.
    engine
        .set_fee(
            &ctx(ENGINE),
            &ledger,
            NFT_BANK,
            Asset::new(50, sym()),
            BANK,
            None,
        )
        .unwrap();
    ledger.set_nft_balance(NFT_BANK, "alice", family(), 3);
    (engine, ledger)
}

fn nft_leg(from: &str, amount: u64, memo: &str) -> DepositNotice {
    DepositNotice {
        source: NFT_BANK.into(),
        event: "transfer".into(),
        from: from.into(),
        to: ENGINE.into(),
        body: DepositBody::Nft(vec![NftAsset::new(amount, family())]),
        memo: memo.into(),
    }
}

#[test]
fn nft_packet_created_in_two_legs_and_claimed_per_item() {
    let (mut engine, mut ledger) = nft_setup();

    // Fee leg: 3 items x 50 RED.
    let fee_memo = "pktn:7:1:3:nft.core";
    let outcome = engine
        .handle_deposit(&ctx(BANK), &mut ledger, &deposit("alice", 150, fee_memo))
        .unwrap();
    let code = PacketCode::new("pktn").unwrap();
    assert_eq!(outcome, DepositOutcome::NftFeeAccepted(code.clone()));
    assert_eq!(
        engine.state().packets.get(&code).unwrap().status,
        PacketStatus::Init
    );

    // An Init packet is not claimable.
    let result = engine.claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"));
    assert!(matches!(result, Err(EngineError::RecordNotFound { .. })));

    // Asset leg completes the escrow.
    let memo = format!("{}:pktn", password_hash("pw"));
    let outcome = engine
        .handle_deposit(&ctx(NFT_BANK), &mut ledger, &nft_leg("alice", 3, &memo))
        .unwrap();
    assert_eq!(outcome, DepositOutcome::NftEscrowCompleted(code.clone()));
    assert_eq!(
        engine.state().packets.get(&code).unwrap().status,
        PacketStatus::Created
    );

    // Each claim pays exactly one item.
    for claimant in ["bob", "carol", "dave"] {
        let claim = engine
            .claim(&ctx(RELAY), &mut ledger, claimant, &code, &password_hash("pw"))
            .unwrap();
        assert_eq!(claim.quantity, 1);
    }
    assert_eq!(
        engine.state().packets.get(&code).unwrap().status,
        PacketStatus::Finished
    );
}

#[test]
fn nft_fee_leg_validates_fee_and_balance() {
    let (mut engine, mut ledger) = nft_setup();

    // Underpaid fee: 3 items need 150.
    let result =
        engine.handle_deposit(&ctx(BANK), &mut ledger, &deposit("alice", 100, "pktn:7:1:3:nft.core"));
    assert!(matches!(result, Err(EngineError::FeeInsufficient { .. })));

    // More items than alice holds.
    let result =
        engine.handle_deposit(&ctx(BANK), &mut ledger, &deposit("alice", 250, "pktn:7:1:5:nft.core"));
    assert!(matches!(result, Err(EngineError::QuantityBelowMinimum { .. })));

    // No fee entry for an unknown NFT contract.
    let result =
        engine.handle_deposit(&ctx(BANK), &mut ledger, &deposit("alice", 150, "pktn:7:1:3:nft.xyz"));
    assert!(matches!(result, Err(EngineError::FeeNotConfigured { .. })));
}

#[test]
fn nft_cancel_refunds_items_and_prorated_fee() {
    let (mut engine, mut ledger) = nft_setup();
    engine
        .handle_deposit(&ctx(BANK), &mut ledger, &deposit("alice", 150, "pktn:7:1:3:nft.core"))
        .unwrap();
    let memo = format!("{}:pktn", password_hash("pw"));
    engine
        .handle_deposit(&ctx(NFT_BANK), &mut ledger, &nft_leg("alice", 3, &memo))
        .unwrap();

    let code = PacketCode::new("pktn").unwrap();
    engine
        .claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"))
        .unwrap();

    let later = Utc::now() + Duration::hours(25);
    engine
        .cancel(&ctx_at("anyone", later), &mut ledger, &code)
        .unwrap();

    // 2 of 3 items back, plus 2/3 of the 150 fee.
    let nft_back: u64 = ledger
        .transfers()
        .iter()
        .filter(|t| t.to == "alice")
        .filter_map(|t| match &t.value {
            TransferValue::Nft(n) => Some(n.amount),
            TransferValue::Fungible(_) => None,
        })
        .sum();
    assert_eq!(nft_back, 2);
    assert_eq!(ledger.fungible_paid_to("alice"), 100);
}

#[test]
fn nft_asset_leg_must_match_fee_leg() {
    let (mut engine, mut ledger) = nft_setup();
    engine
        .handle_deposit(&ctx(BANK), &mut ledger, &deposit("alice", 150, "pktn:7:1:3:nft.core"))
        .unwrap();

    let memo = format!("{}:pktn", password_hash("pw"));

    // Wrong depositor.
    let result = engine.handle_deposit(&ctx(NFT_BANK), &mut ledger, &nft_leg("bob", 3, &memo));
    assert!(matches!(result, Err(EngineError::UnauthorizedCaller { .. })));

    // Wrong quantity.
    let result = engine.handle_deposit(&ctx(NFT_BANK), &mut ledger, &nft_leg("alice", 2, &memo));
    assert!(matches!(result, Err(EngineError::QuantityBelowMinimum { .. })));

    // Neither attempt advanced the packet.
    let code = PacketCode::new("pktn").unwrap();
    assert_eq!(
        engine.state().packets.get(&code).unwrap().status,
        PacketStatus::Init
    );
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut ledger = MemoryLedger::new();
    ledger.set_supply(BANK, Asset::new(1_000_000, sym()));

    {
        let mut engine = Engine::open(dir.path(), EngineConfig::new(ENGINE)).unwrap();
        engine.register_handler(BANK, "transfer", HandlerKind::FungibleDeposit);
        engine
            .add_whitelist(&ctx(ENGINE), &ledger, "RED", BANK)
            .unwrap();
        let memo = format!("{}:2:MEAN:pkt1", password_hash("pw"));
        engine
            .handle_deposit(&ctx(BANK), &mut ledger, &deposit("alice", 1_000, &memo))
            .unwrap();
        let code = PacketCode::new("pkt1").unwrap();
        engine
            .claim(&ctx(RELAY), &mut ledger, "bob", &code, &password_hash("pw"))
            .unwrap();
    }

    // Reopen: the packet, its claim, and the whitelist are all back.
    let engine = Engine::open(dir.path(), EngineConfig::new(ENGINE)).unwrap();
    let code = PacketCode::new("pkt1").unwrap();
    let packet = engine.state().packets.get(&code).unwrap();
    assert_eq!(packet.remain_count, 1);
    assert_eq!(packet.remain_quantity, 500);
    assert_eq!(engine.state().claims.len(), 1);
    assert!(engine.state().claims.contains("bob", &code));
    assert_eq!(engine.state().whitelist.len(), 1);
}
