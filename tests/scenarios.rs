//! End-to-end scenarios wiring the resolver, the attachment store, and
//! the two-party trade protocol together against a real `sled`
//! database on disk, mirroring how a node actually uses this crate
//! rather than exercising one module in isolation.

use std::sync::Arc;

use rand::rngs::OsRng;

use ledger_core::contract::{
    generate_issue_cash, generate_move_cash, AssetContract, CashContract, ContractRegistry,
};
use ledger_core::crypto::{sign, Party, PrivateKey};
use ledger_core::error::ResolverError;
use ledger_core::model::{
    AssetState, Command, CommandData, ContractState, Currency, Instant, SignedTransaction,
    StateData, StateRef, TimestampWindow, WireTransaction,
};
use ledger_core::resolver::{resolve_transactions, FakePeer, SledTransactionStorage, DEFAULT_GRAPH_SIZE_BOUND};
use ledger_core::trade::{BuyerFlow, SellerFlow};
use ledger_core::tsa::ReferenceTsa;
use ledger_core::validator::NoIdentityService;

fn registry() -> ContractRegistry {
    let mut r = ContractRegistry::new();
    r.register(Arc::new(CashContract));
    r.register(Arc::new(AssetContract));
    r
}

fn signed(wire: WireTransaction, keys: &[&PrivateKey]) -> SignedTransaction {
    let bytes = ledger_core::codec::canonical_serialize(&wire).unwrap();
    let signatures = keys.iter().map(|k| sign(k, &bytes)).collect();
    SignedTransaction::new(wire, signatures)
}

fn storage(db: &sled::Db) -> SledTransactionStorage {
    SledTransactionStorage::new(db.open_tree("transactions").unwrap())
}

#[test]
fn issuance_then_move_resolves_through_a_peer_and_persists() {
    let issuer = PrivateKey::generate(&mut OsRng);
    let mini_corp = PrivateKey::generate(&mut OsRng);
    let alice = PrivateKey::generate(&mut OsRng);

    let (issue_state, issue_cmd, issue_signers) =
        generate_issue_cash(1_000, Currency::GBP, mini_corp.public_key(), issuer.public_key());
    let t1 = signed(
        WireTransaction::new(vec![], vec![issue_state], vec![Command::new(issue_cmd, issue_signers)], vec![]),
        &[&issuer],
    );
    let t1_id = t1.id();

    let (move_state, move_cmd, move_signers) =
        generate_move_cash(1_000, Currency::GBP, alice.public_key(), mini_corp.public_key());
    let t2 = signed(
        WireTransaction::new(
            vec![StateRef::new(t1_id, 0)],
            vec![move_state],
            vec![Command::new(move_cmd, move_signers)],
            vec![],
        ),
        &[&mini_corp],
    );
    let t2_id = t2.id();

    let peer = FakePeer::new();
    peer.add_transaction(t1);
    peer.add_transaction(t2);

    let data_dir = tempfile::tempdir().unwrap();
    let db = sled::open(data_dir.path().join("ledger.sled")).unwrap();
    let attachment_store = ledger_core::attachment_store::AttachmentStore::open(data_dir.path().join("attachments")).unwrap();
    let store = storage(&db);

    let resolved = resolve_transactions(
        vec![t2_id],
        &peer,
        &peer,
        &store,
        &attachment_store,
        &registry(),
        &NoIdentityService,
        DEFAULT_GRAPH_SIZE_BOUND,
    )
    .unwrap();
    assert_eq!(resolved.len(), 2);

    // Persisted to the local database, so a second resolution of the
    // same seed needs no peer round trip at all.
    assert!(store.contains(&t1_id));
    let empty_peer = FakePeer::new();
    let resolved_again = resolve_transactions(
        vec![t2_id],
        &empty_peer,
        &empty_peer,
        &store,
        &attachment_store,
        &registry(),
        &NoIdentityService,
        DEFAULT_GRAPH_SIZE_BOUND,
    )
    .unwrap();
    assert_eq!(resolved_again.len(), 2);
}

/// Serves a transaction correctly but lies about the bytes behind the
/// attachment hash it names — simulating a misbehaving counterparty.
struct WrongHashPeer {
    transactions: FakePeer,
    served_bytes: Vec<u8>,
}

impl ledger_core::resolver::TransactionFetchService for WrongHashPeer {
    fn fetch(&self, hashes: &[ledger_core::crypto::SecureHash]) -> Result<Vec<SignedTransaction>, ResolverError> {
        self.transactions.fetch(hashes)
    }
}

impl ledger_core::resolver::AttachmentFetchService for WrongHashPeer {
    fn fetch(&self, _hash: ledger_core::crypto::SecureHash) -> Result<Vec<u8>, ResolverError> {
        Ok(self.served_bytes.clone())
    }
}

fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::{Cursor, Write as _};
    use zip::write::SimpleFileOptions;

    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

#[test]
fn a_peer_that_serves_the_wrong_attachment_bytes_is_rejected() {
    let issuer = PrivateKey::generate(&mut OsRng);
    let owner = PrivateKey::generate(&mut OsRng);
    let claimed_hash = ledger_core::crypto::SecureHash::sha256(b"the real attachment contents");

    let (state, cmd, signers) =
        generate_issue_cash(10, Currency::USD, owner.public_key(), issuer.public_key());
    let wire = WireTransaction::new(vec![], vec![state], vec![Command::new(cmd, signers)], vec![claimed_hash]);
    let tx = signed(wire, &[&issuer]);
    let tx_id = tx.id();

    let transactions = FakePeer::new();
    transactions.add_transaction(tx);
    // A well-formed archive, but not the one whose hash was claimed.
    let peer = WrongHashPeer {
        transactions,
        served_bytes: make_zip(&[("decoy.txt", b"not what was promised")]),
    };

    let data_dir = tempfile::tempdir().unwrap();
    let attachment_store = ledger_core::attachment_store::AttachmentStore::open(data_dir.path().join("attachments")).unwrap();
    let db = sled::open(data_dir.path().join("ledger.sled")).unwrap();
    let store = storage(&db);

    let result = resolve_transactions(
        vec![tx_id],
        &peer,
        &peer,
        &store,
        &attachment_store,
        &registry(),
        &NoIdentityService,
        DEFAULT_GRAPH_SIZE_BOUND,
    );
    assert!(matches!(result, Err(ResolverError::AttachmentCorrupt { .. })));
}

#[test]
fn a_full_trade_settles_and_the_ledger_transaction_is_persistable() {
    let issuer = PrivateKey::generate(&mut OsRng);
    let seller_key = PrivateKey::generate(&mut OsRng);
    let buyer_key = PrivateKey::generate(&mut OsRng);
    let tsa_key = PrivateKey::generate(&mut OsRng);
    let tsa_party = Party {
        name: "Trusted Timestamping Authority".into(),
        owning_key: tsa_key.public_key(),
    };

    let asset_state = ContractState {
        contract_hash: AssetContract::reference_hash(),
        data: StateData::Asset(AssetState {
            description: "a bearer bond".into(),
        }),
        owner: Some(seller_key.public_key()),
    };
    let asset_wire = WireTransaction::new(
        vec![],
        vec![asset_state.clone()],
        vec![Command::new(CommandData::Issue, vec![issuer.public_key()])],
        vec![],
    );
    let asset_tx = signed(asset_wire, &[&issuer]);
    let asset_ref = StateRef::new(asset_tx.id(), 0);

    let (cash_state, cash_issue_cmd, cash_issue_signers) =
        generate_issue_cash(2_500, Currency::EUR, buyer_key.public_key(), issuer.public_key());
    let cash_wire = WireTransaction::new(
        vec![],
        vec![cash_state.clone()],
        vec![Command::new(cash_issue_cmd, cash_issue_signers)],
        vec![],
    );
    let cash_tx = signed(cash_wire, &[&issuer]);
    let cash_ref = StateRef::new(cash_tx.id(), 0);

    let roots = vec![asset_tx, cash_tx];
    let reg = registry();

    let mut seller = SellerFlow::new(seller_key, asset_ref, asset_state, 2_500, Currency::EUR);
    let offer = seller.offer();

    let mut buyer = BuyerFlow::new(buyer_key, 2_500);
    let now = chrono::Utc::now();
    let window = TimestampWindow::new(
        Some(Instant::from(now - chrono::Duration::minutes(5))),
        Some(Instant::from(now + chrono::Duration::minutes(5))),
    )
    .unwrap();
    let proposal = buyer
        .build_proposal(&offer, cash_ref, cash_state, &tsa_party, window)
        .unwrap();

    seller
        .receive_and_verify_proposal(proposal, &roots, &reg, &NoIdentityService)
        .unwrap();

    let tsa = ReferenceTsa::with_clock(tsa_key, tsa_party, move || now);
    let seller_signatures = seller.obtain_timestamp_and_sign(&tsa).unwrap();

    let ledger_tx = buyer
        .assemble_and_verify(seller_signatures, &roots, &reg, &NoIdentityService)
        .unwrap();

    let data_dir = tempfile::tempdir().unwrap();
    let db = sled::open(data_dir.path().join("ledger.sled")).unwrap();
    let store = storage(&db);
    store.store_batch(&[ledger_tx.signed.clone()]).unwrap();
    assert!(store.contains(&ledger_tx.id));
}
