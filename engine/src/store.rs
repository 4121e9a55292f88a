//! # Persisted Tables
//!
//! The packet and claim tables, with the secondary indexes the external
//! interface promises: packets by last-updated time and by sender; claims
//! by (receiver, code) uniqueness, by packet code, and by claim time.
//!
//! The tables are plain ordered maps inside the engine state value —
//! loaded at entry-point start, persisted at exit. Index maintenance is
//! internal: every mutation goes through a method that keeps the indexes
//! in step, so a row and its index entries can never disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::claim::{Claim, ClaimKey};
use crate::error::{EngineError, Result};
use crate::packet::{Packet, PacketCode};

// ---------------------------------------------------------------------------
// PacketStore
// ---------------------------------------------------------------------------

/// Packet table keyed by code, with updated-time and sender indexes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketStore {
    rows: BTreeMap<PacketCode, Packet>,
    /// (updated_at seconds, code) — supports expiry scans.
    by_updated: BTreeSet<(i64, PacketCode)>,
    by_sender: BTreeMap<String, BTreeSet<PacketCode>>,
}

impl PacketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, code: &PacketCode) -> bool {
        self.rows.contains_key(code)
    }

    pub fn get(&self, code: &PacketCode) -> Option<&Packet> {
        self.rows.get(code)
    }

    /// Inserts a new packet row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateCode`] if a row with the same code
    /// exists in any status.
    pub fn insert(&mut self, packet: Packet) -> Result<()> {
        if self.rows.contains_key(&packet.code) {
            return Err(EngineError::DuplicateCode {
                code: packet.code.to_string(),
            });
        }
        self.index(&packet);
        self.rows.insert(packet.code.clone(), packet);
        Ok(())
    }

    /// Replaces an existing row, reindexing its updated time.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RecordNotFound`] if no row has this code.
    pub fn update(&mut self, packet: Packet) -> Result<()> {
        let old = self
            .rows
            .get(&packet.code)
            .ok_or_else(|| EngineError::RecordNotFound {
                what: "packet",
                key: packet.code.to_string(),
            })?
            .clone();
        self.unindex(&old);
        self.index(&packet);
        self.rows.insert(packet.code.clone(), packet);
        Ok(())
    }

    /// Removes and returns a row, if present.
    pub fn remove(&mut self, code: &PacketCode) -> Option<Packet> {
        let packet = self.rows.remove(code)?;
        self.unindex(&packet);
        Some(packet)
    }

    /// Codes of packets not touched since `cutoff`, oldest first.
    /// This is the expiry-scan path for off-engine cleanup tooling.
    pub fn stale_since(&self, cutoff: DateTime<Utc>) -> Vec<PacketCode> {
        self.by_updated
            .iter()
            .take_while(|(ts, _)| *ts < cutoff.timestamp())
            .map(|(_, code)| code.clone())
            .collect()
    }

    /// Codes of packets created by `sender`.
    pub fn by_sender(&self, sender: &str) -> Vec<PacketCode> {
        self.by_sender
            .get(sender)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.rows.values()
    }

    fn index(&mut self, packet: &Packet) {
        self.by_updated
            .insert((packet.updated_at.timestamp(), packet.code.clone()));
        self.by_sender
            .entry(packet.sender.clone())
            .or_default()
            .insert(packet.code.clone());
    }

    fn unindex(&mut self, packet: &Packet) {
        self.by_updated
            .remove(&(packet.updated_at.timestamp(), packet.code.clone()));
        if let Some(codes) = self.by_sender.get_mut(&packet.sender) {
            codes.remove(&packet.code);
            if codes.is_empty() {
                self.by_sender.remove(&packet.sender);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ClaimStore
// ---------------------------------------------------------------------------

/// Claim table keyed by auto-increment id, with the (receiver, code)
/// uniqueness index and packet-code / claim-time indexes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimStore {
    rows: BTreeMap<u64, Claim>,
    next_id: u64,
    by_key: BTreeMap<ClaimKey, u64>,
    by_code: BTreeMap<PacketCode, BTreeSet<u64>>,
    by_claimed: BTreeSet<(i64, u64)>,
}

impl ClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&Claim> {
        self.rows.get(&id)
    }

    /// Whether `receiver` already drew from `code`.
    pub fn contains(&self, receiver: &str, code: &PacketCode) -> bool {
        self.by_key.contains_key(&ClaimKey {
            receiver: receiver.to_string(),
            code: code.clone(),
        })
    }

    /// Appends a claim row, assigning the next id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateClaim`] if the (receiver, code)
    /// pair already has a row — the dedup invariant is enforced here and
    /// nowhere else.
    pub fn append(
        &mut self,
        code: &PacketCode,
        sender: &str,
        receiver: &str,
        quantity: u64,
        claimed_at: DateTime<Utc>,
    ) -> Result<Claim> {
        if self.contains(receiver, code) {
            return Err(EngineError::DuplicateClaim {
                receiver: receiver.to_string(),
                code: code.to_string(),
            });
        }
        let claim = Claim {
            id: self.next_id,
            packet_code: code.clone(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            quantity,
            claimed_at,
        };
        self.next_id += 1;
        self.by_key.insert(claim.key(), claim.id);
        self.by_code
            .entry(code.clone())
            .or_default()
            .insert(claim.id);
        self.by_claimed.insert((claimed_at.timestamp(), claim.id));
        self.rows.insert(claim.id, claim.clone());
        Ok(claim)
    }

    /// Removes a row by id, if present.
    pub fn remove(&mut self, id: u64) -> Option<Claim> {
        let claim = self.rows.remove(&id)?;
        self.by_key.remove(&claim.key());
        if let Some(ids) = self.by_code.get_mut(&claim.packet_code) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_code.remove(&claim.packet_code);
            }
        }
        self.by_claimed.remove(&(claim.claimed_at.timestamp(), id));
        Some(claim)
    }

    /// All row ids in ascending id order.
    pub fn ids(&self) -> Vec<u64> {
        self.rows.keys().copied().collect()
    }

    /// Ids of claims against one packet.
    pub fn for_packet(&self, code: &PacketCode) -> Vec<u64> {
        self.by_code
            .get(code)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.rows.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetClass, Symbol};
    use crate::packet::{PacketAsset, PacketStatus, Policy};

    fn packet(code: &str, sender: &str, at: DateTime<Utc>) -> Packet {
        Packet {
            code: PacketCode::new(code).unwrap(),
            sender: sender.into(),
            pw_hash: "h".into(),
            asset: PacketAsset::Fungible(AssetClass::new(
                Symbol::new("RED", 2).unwrap(),
                "token.core",
            )),
            total_quantity: 100,
            remain_quantity: 100,
            receiver_count: 2,
            remain_count: 2,
            fee_charged: None,
            status: PacketStatus::Created,
            policy: Policy::Mean,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn duplicate_code_rejected_on_insert() {
        let mut store = PacketStore::new();
        let now = Utc::now();
        store.insert(packet("p1", "alice", now)).unwrap();
        let result = store.insert(packet("p1", "bob", now));
        assert!(matches!(result, Err(EngineError::DuplicateCode { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sender_index_tracks_insert_and_remove() {
        let mut store = PacketStore::new();
        let now = Utc::now();
        store.insert(packet("p1", "alice", now)).unwrap();
        store.insert(packet("p2", "alice", now)).unwrap();
        assert_eq!(store.by_sender("alice").len(), 2);

        store.remove(&PacketCode::new("p1").unwrap());
        assert_eq!(store.by_sender("alice").len(), 1);
        store.remove(&PacketCode::new("p2").unwrap());
        assert!(store.by_sender("alice").is_empty());
    }

    #[test]
    fn stale_scan_returns_oldest_first() {
        let mut store = PacketStore::new();
        let old = Utc::now() - chrono::Duration::hours(48);
        let new = Utc::now();
        store.insert(packet("old", "alice", old)).unwrap();
        store.insert(packet("new", "alice", new)).unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let stale = store.stale_since(cutoff);
        assert_eq!(stale, vec![PacketCode::new("old").unwrap()]);
    }

    #[test]
    fn update_reindexes_updated_time() {
        let mut store = PacketStore::new();
        let old = Utc::now() - chrono::Duration::hours(48);
        store.insert(packet("p1", "alice", old)).unwrap();

        let mut row = store.get(&PacketCode::new("p1").unwrap()).unwrap().clone();
        row.updated_at = Utc::now();
        store.update(row).unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        assert!(store.stale_since(cutoff).is_empty());
    }

    #[test]
    fn claim_ids_are_sequential() {
        let mut store = ClaimStore::new();
        let code = PacketCode::new("p1").unwrap();
        let now = Utc::now();
        let a = store.append(&code, "alice", "bob", 10, now).unwrap();
        let b = store.append(&code, "alice", "carol", 10, now).unwrap();
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
    }

    #[test]
    fn duplicate_claim_rejected() {
        let mut store = ClaimStore::new();
        let code = PacketCode::new("p1").unwrap();
        let now = Utc::now();
        store.append(&code, "alice", "bob", 10, now).unwrap();
        let result = store.append(&code, "alice", "bob", 10, now);
        assert!(matches!(result, Err(EngineError::DuplicateClaim { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn same_receiver_may_claim_other_packets() {
        let mut store = ClaimStore::new();
        let now = Utc::now();
        let p1 = PacketCode::new("p1").unwrap();
        let p2 = PacketCode::new("p2").unwrap();
        store.append(&p1, "alice", "bob", 10, now).unwrap();
        assert!(store.append(&p2, "alice", "bob", 10, now).is_ok());
    }

    #[test]
    fn remove_clears_dedup_index() {
        let mut store = ClaimStore::new();
        let code = PacketCode::new("p1").unwrap();
        let now = Utc::now();
        let claim = store.append(&code, "alice", "bob", 10, now).unwrap();
        store.remove(claim.id);
        assert!(!store.contains("bob", &code));
        // ids keep advancing; removal never recycles an id.
        let next = store.append(&code, "alice", "bob", 10, now).unwrap();
        assert_eq!(next.id, 1);
    }

    #[test]
    fn packet_code_index_follows_rows() {
        let mut store = ClaimStore::new();
        let code = PacketCode::new("p1").unwrap();
        let now = Utc::now();
        store.append(&code, "alice", "bob", 10, now).unwrap();
        store.append(&code, "alice", "carol", 20, now).unwrap();
        assert_eq!(store.for_packet(&code).len(), 2);
    }
}
