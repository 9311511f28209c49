//! Dependency resolution: walking a transaction's ancestry, fetching
//! whatever is missing from a peer, and re-verifying the resulting
//! group. See `spec.md` §4.6.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Mutex;

use indexmap::IndexSet;
use tracing::{debug, instrument};

use crate::attachment_store::AttachmentStore;
use crate::contract::ContractRegistry;
use crate::crypto::SecureHash;
use crate::error::ResolverError;
use crate::model::{LedgerTransaction, SignedTransaction};
use crate::validator::{validate_group, IdentityService};

/// The DoS ceiling from `spec.md` §4.6, step 6.
pub const DEFAULT_GRAPH_SIZE_BOUND: usize = 5_000;

/// Fetches transactions by id from a counterparty. The response must
/// preserve request order; a short response fails the resolution.
pub trait TransactionFetchService {
    fn fetch(&self, hashes: &[SecureHash]) -> Result<Vec<SignedTransaction>, ResolverError>;
}

/// Fetches a single attachment's raw bytes by hash from a counterparty.
pub trait AttachmentFetchService {
    fn fetch(&self, hash: SecureHash) -> Result<Vec<u8>, ResolverError>;
}

/// Local record of previously validated transactions.
pub trait TransactionStorage: Send + Sync {
    fn contains(&self, id: &SecureHash) -> bool;
    fn get(&self, id: &SecureHash) -> Option<SignedTransaction>;
    /// Writes every transaction in `txs`, all-or-nothing.
    fn store_batch(&self, txs: &[SignedTransaction]) -> Result<(), ResolverError>;
}

/// Walks the ancestry of `seeds`, fetching and verifying whatever this
/// node does not already hold, bounded by `graph_bound` transactions.
/// On success, every newly downloaded transaction is recorded to
/// `storage` in one atomic batch.
#[instrument(skip_all, fields(seed_count = seeds.len()))]
pub fn resolve_transactions(
    seeds: Vec<SecureHash>,
    peer_txs: &dyn TransactionFetchService,
    peer_attachments: &dyn AttachmentFetchService,
    storage: &dyn TransactionStorage,
    attachment_store: &AttachmentStore,
    registry: &ContractRegistry,
    identity: &dyn IdentityService,
    graph_bound: usize,
) -> Result<Vec<LedgerTransaction>, ResolverError> {
    let mut next: IndexSet<SecureHash> = seeds.into_iter().collect();
    let mut seen: HashSet<SecureHash> = HashSet::new();
    let mut already_verified: Vec<SignedTransaction> = Vec::new();
    let mut to_verify: Vec<SignedTransaction> = Vec::new();
    let mut total_downloaded = 0usize;
    let mut round = 0u32;

    while !next.is_empty() {
        round += 1;
        let mut from_disk = Vec::new();
        let mut to_fetch = Vec::new();
        for hash in next.iter() {
            if seen.contains(hash) {
                continue;
            }
            if storage.contains(hash) {
                from_disk.push(*hash);
            } else {
                to_fetch.push(*hash);
            }
        }
        debug!(round, from_disk = from_disk.len(), to_fetch = to_fetch.len(), "resolver round");

        for hash in &from_disk {
            seen.insert(*hash);
            if let Some(tx) = storage.get(hash) {
                already_verified.push(tx);
            }
        }

        let fetched = if to_fetch.is_empty() {
            Vec::new()
        } else {
            peer_txs.fetch(&to_fetch)?
        };
        if fetched.len() != to_fetch.len() {
            return Err(ResolverError::PeerResponseIncomplete { missing: to_fetch });
        }
        for (requested, tx) in to_fetch.iter().zip(fetched.iter()) {
            if tx.id() != *requested {
                return Err(ResolverError::PeerResponseIncomplete {
                    missing: vec![*requested],
                });
            }
        }

        total_downloaded += fetched.len();
        if total_downloaded > graph_bound {
            return Err(ResolverError::GraphTooLarge { bound: graph_bound });
        }

        let mut next_round: IndexSet<SecureHash> = IndexSet::new();
        for tx in &fetched {
            seen.insert(tx.id());
            for attachment_hash in &tx.wire.attachments {
                if attachment_store.contains(*attachment_hash) {
                    continue;
                }
                let bytes = peer_attachments.fetch(*attachment_hash)?;
                let actual = attachment_store.import(Cursor::new(bytes))?;
                if actual != *attachment_hash {
                    return Err(ResolverError::AttachmentCorrupt {
                        expected: *attachment_hash,
                        actual,
                    });
                }
            }
            for input in &tx.wire.inputs {
                if !seen.contains(&input.tx_id) {
                    next_round.insert(input.tx_id);
                }
            }
        }
        to_verify.extend(fetched);
        next = next_round;
    }

    let ledger_txs = validate_group(to_verify.clone(), &already_verified, registry, identity)?;
    storage.store_batch(&to_verify)?;
    Ok(ledger_txs)
}

/// In-memory `TransactionStorage` backed by a `sled::Tree`. Batched
/// writes use `sled::Batch` so a partial-write can never leave an
/// unvalidated predecessor on disk.
pub struct SledTransactionStorage {
    tree: sled::Tree,
}

impl SledTransactionStorage {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }
}

impl TransactionStorage for SledTransactionStorage {
    fn contains(&self, id: &SecureHash) -> bool {
        self.tree
            .contains_key(id.as_bytes())
            .unwrap_or(false)
    }

    fn get(&self, id: &SecureHash) -> Option<SignedTransaction> {
        let bytes = self.tree.get(id.as_bytes()).ok()??;
        crate::codec::canonical_deserialize(&bytes).ok()
    }

    fn store_batch(&self, txs: &[SignedTransaction]) -> Result<(), ResolverError> {
        let mut batch = sled::Batch::default();
        for tx in txs {
            let bytes = crate::codec::canonical_serialize(tx)
                .expect("signed transaction must be encodable");
            // Idempotent: re-inserting an already-stored transaction
            // with the same id just overwrites identical bytes.
            batch.insert(tx.id().as_bytes().to_vec(), bytes);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }
}

/// In-memory double of a counterparty node, used by tests and as a
/// reference implementation of both fetch traits.
#[derive(Default)]
pub struct FakePeer {
    transactions: Mutex<std::collections::HashMap<SecureHash, SignedTransaction>>,
    attachments: Mutex<std::collections::HashMap<SecureHash, Vec<u8>>>,
}

impl FakePeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&self, tx: SignedTransaction) {
        self.transactions.lock().unwrap().insert(tx.id(), tx);
    }

    pub fn add_attachment(&self, bytes: Vec<u8>) -> SecureHash {
        let hash = SecureHash::sha256(&bytes);
        self.attachments.lock().unwrap().insert(hash, bytes);
        hash
    }
}

impl TransactionFetchService for FakePeer {
    fn fetch(&self, hashes: &[SecureHash]) -> Result<Vec<SignedTransaction>, ResolverError> {
        let store = self.transactions.lock().unwrap();
        Ok(hashes.iter().filter_map(|h| store.get(h).cloned()).collect())
    }
}

impl AttachmentFetchService for FakePeer {
    fn fetch(&self, hash: SecureHash) -> Result<Vec<u8>, ResolverError> {
        self.attachments
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| ResolverError::PeerResponseIncomplete { missing: vec![hash] })
    }
}
