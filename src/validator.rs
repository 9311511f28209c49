//! The transaction-group validator.
//!
//! Enforces that no state reference is consumed twice across the group
//! being validated, then runs every contract named by any input or
//! output state of every transaction in the group. See `spec.md` §4.5
//! for the four-step algorithm this mirrors directly.

use std::collections::HashMap;

use tracing::instrument;

use crate::contract::{ContractRegistry, ResolvedCommand, TransactionForVerification};
use crate::crypto::{Party, PublicKey};
use crate::error::ValidatorError;
use crate::model::{ContractState, LedgerTransaction, SignedTransaction, StateRef};

/// Resolves a public key to the legal party it belongs to, when known.
/// Resolution is best-effort: an unknown key is not an error, per
/// `spec.md` §9 — the signer is simply recorded by key.
pub trait IdentityService {
    fn resolve(&self, key: &PublicKey) -> Option<Party>;
}

pub struct NoIdentityService;

impl IdentityService for NoIdentityService {
    fn resolve(&self, _key: &PublicKey) -> Option<Party> {
        None
    }
}

#[derive(Default)]
pub struct MapIdentityService {
    parties: HashMap<PublicKey, Party>,
}

impl MapIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, party: Party) {
        self.parties.insert(party.owning_key, party);
    }
}

impl IdentityService for MapIdentityService {
    fn resolve(&self, key: &PublicKey) -> Option<Party> {
        self.parties.get(key).cloned()
    }
}

/// Validates `new` against the resolution environment formed by
/// `new ∪ roots`, invoking contracts and checking signature
/// completeness. On success, returns `new` converted to
/// [`LedgerTransaction`]s, in the same (sorted) order they were
/// checked.
#[instrument(skip_all, fields(new_count = new.len(), roots_count = roots.len()))]
pub fn validate_group(
    new: Vec<SignedTransaction>,
    roots: &[SignedTransaction],
    registry: &ContractRegistry,
    identity: &dyn IdentityService,
) -> Result<Vec<LedgerTransaction>, ValidatorError> {
    let mut new = new;
    new.sort_by_key(|tx| tx.id());

    // Step 1: build the output map from everything in NEW ∪ ROOTS.
    let mut outputs: HashMap<StateRef, ContractState> = HashMap::new();
    for tx in roots.iter().chain(new.iter()) {
        let tx_id = tx.id();
        for (index, state) in tx.wire.outputs.iter().enumerate() {
            outputs.insert(StateRef::new(tx_id, index as u32), state.clone());
        }
    }

    // Step 2: resolve inputs and detect double spends.
    let mut consumed_by: HashMap<StateRef, crate::crypto::SecureHash> = HashMap::new();
    for tx in &new {
        let tx_id = tx.id();
        for input in &tx.wire.inputs {
            if !outputs.contains_key(input) {
                return Err(ValidatorError::UnresolvedReference {
                    tx: tx_id,
                    hash: input.tx_id,
                    index: input.index,
                });
            }
            if let Some(existing) = consumed_by.get(input) {
                if *existing != tx_id {
                    return Err(ValidatorError::DoubleSpend {
                        reference: *input,
                        first: *existing,
                        second: tx_id,
                    });
                } else {
                    return Err(ValidatorError::DoubleSpend {
                        reference: *input,
                        first: tx_id,
                        second: tx_id,
                    });
                }
            }
            consumed_by.insert(*input, tx_id);
        }
    }

    // Step 3: construct each TransactionForVerification and run contracts.
    let mut ledger_txs = Vec::with_capacity(new.len());
    for tx in &new {
        let tx_id = tx.id();
        let resolved_inputs: Vec<(StateRef, ContractState)> = tx
            .wire
            .inputs
            .iter()
            .map(|r| (*r, outputs.get(r).expect("resolved in step 2").clone()))
            .collect();
        let resolved_commands: Vec<ResolvedCommand> = tx
            .wire
            .commands
            .iter()
            .map(|c| ResolvedCommand {
                data: c.data.clone(),
                signers: c.signers.clone(),
                signing_parties: c.signers.iter().map(|k| identity.resolve(k)).collect(),
            })
            .collect();

        let verification = TransactionForVerification {
            tx_id,
            inputs: resolved_inputs.clone(),
            outputs: tx.wire.outputs.clone(),
            commands: resolved_commands.clone(),
            attachments: tx.wire.attachments.clone(),
        };

        let mut governing_contracts: Vec<crate::crypto::SecureHash> = resolved_inputs
            .iter()
            .map(|(_, s)| s.contract_hash)
            .chain(tx.wire.outputs.iter().map(|s| s.contract_hash))
            .collect();
        governing_contracts.sort();
        governing_contracts.dedup();

        for contract_hash in governing_contracts {
            let Some(contract) = registry.get(&contract_hash) else {
                continue;
            };
            contract.verify(&verification).map_err(|cause| ValidatorError::ContractRejected {
                tx: tx_id,
                cause,
            })?;
        }

        // Step 4: every key named by a command must have a signature;
        // extra signatures from uninvolved keys are tolerated.
        let missing = tx.missing_signers();
        if !missing.is_empty() {
            return Err(ValidatorError::MissingSignature { tx: tx_id, missing });
        }
        let signed_bytes =
            crate::codec::canonical_serialize(&tx.wire).expect("wire transaction is encodable");
        for sig in &tx.signatures {
            if sig.verify(&signed_bytes).is_err() {
                return Err(ValidatorError::SignatureInvalid { tx: tx_id, signer: sig.by });
            }
        }

        ledger_txs.push(LedgerTransaction {
            id: tx_id,
            inputs: resolved_inputs,
            outputs: tx.wire.outputs.clone(),
            commands: resolved_commands.into_iter().map(|c| (c.data, c.signers)).collect(),
            attachments: tx.wire.attachments.clone(),
            signed: tx.clone(),
        });
    }

    Ok(ledger_txs)
}

/// Runs contract verification for a single transaction against a
/// resolution environment of already-validated `roots`, without
/// checking signature completeness. Used by the trade protocol's
/// mid-conversation check (`spec.md` §4.7 step 4: "ignoring missing
/// signatures") where the transaction is deliberately not yet fully
/// signed.
pub fn verify_contracts_only(
    tx: &SignedTransaction,
    roots: &[SignedTransaction],
    registry: &ContractRegistry,
    identity: &dyn IdentityService,
) -> Result<TransactionForVerification, ValidatorError> {
    let tx_id = tx.id();
    let mut outputs: HashMap<StateRef, ContractState> = HashMap::new();
    for root in roots {
        let root_id = root.id();
        for (index, state) in root.wire.outputs.iter().enumerate() {
            outputs.insert(StateRef::new(root_id, index as u32), state.clone());
        }
    }

    let resolved_inputs: Vec<(StateRef, ContractState)> = tx
        .wire
        .inputs
        .iter()
        .map(|r| {
            outputs
                .get(r)
                .cloned()
                .map(|s| (*r, s))
                .ok_or(ValidatorError::UnresolvedReference {
                    tx: tx_id,
                    hash: r.tx_id,
                    index: r.index,
                })
        })
        .collect::<Result<_, _>>()?;

    let resolved_commands: Vec<ResolvedCommand> = tx
        .wire
        .commands
        .iter()
        .map(|c| ResolvedCommand {
            data: c.data.clone(),
            signers: c.signers.clone(),
            signing_parties: c.signers.iter().map(|k| identity.resolve(k)).collect(),
        })
        .collect();

    let verification = TransactionForVerification {
        tx_id,
        inputs: resolved_inputs.clone(),
        outputs: tx.wire.outputs.clone(),
        commands: resolved_commands,
        attachments: tx.wire.attachments.clone(),
    };

    let mut governing_contracts: Vec<crate::crypto::SecureHash> = resolved_inputs
        .iter()
        .map(|(_, s)| s.contract_hash)
        .chain(tx.wire.outputs.iter().map(|s| s.contract_hash))
        .collect();
    governing_contracts.sort();
    governing_contracts.dedup();

    for contract_hash in governing_contracts {
        let Some(contract) = registry.get(&contract_hash) else {
            continue;
        };
        contract
            .verify(&verification)
            .map_err(|cause| ValidatorError::ContractRejected { tx: tx_id, cause })?;
    }

    Ok(verification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{generate_issue_cash, generate_move_cash, CashContract};
    use crate::crypto::{sign, PrivateKey};
    use crate::model::{Command, Currency, Signature, StateRef, WireTransaction};
    use rand::rngs::OsRng;

    fn registry() -> ContractRegistry {
        let mut r = ContractRegistry::new();
        r.register(std::sync::Arc::new(CashContract));
        r
    }

    fn signed(wire: WireTransaction, keys: &[&PrivateKey]) -> SignedTransaction {
        let bytes = crate::codec::canonical_serialize(&wire).unwrap();
        let signatures: Vec<Signature> = keys.iter().map(|k| sign(k, &bytes)).collect();
        SignedTransaction::new(wire, signatures)
    }

    #[test]
    fn issuance_then_move_is_accepted() {
        let issuer = PrivateKey::generate(&mut OsRng);
        let mini_corp = PrivateKey::generate(&mut OsRng);
        let alice = PrivateKey::generate(&mut OsRng);

        let (issue_state, issue_cmd, issue_signers) =
            generate_issue_cash(1000, Currency::GBP, mini_corp.public_key(), issuer.public_key());
        let t1_wire = WireTransaction::new(
            vec![],
            vec![issue_state],
            vec![Command::new(issue_cmd, issue_signers)],
            vec![],
        );
        let t1 = signed(t1_wire, &[&issuer]);
        let t1_id = t1.id();

        let (move_state, move_cmd, move_signers) = generate_move_cash(
            1000,
            Currency::GBP,
            alice.public_key(),
            mini_corp.public_key(),
        );
        let t2_wire = WireTransaction::new(
            vec![StateRef::new(t1_id, 0)],
            vec![move_state],
            vec![Command::new(move_cmd, move_signers)],
            vec![],
        );
        let t2 = signed(t2_wire, &[&mini_corp]);

        let result = validate_group(vec![t1, t2], &[], &registry(), &NoIdentityService);
        assert!(result.is_ok(), "{:?}", result.err());
        assert_eq!(result.unwrap().len(), 2);
    }

    #[test]
    fn double_spend_is_rejected() {
        let issuer = PrivateKey::generate(&mut OsRng);
        let mini_corp = PrivateKey::generate(&mut OsRng);
        let alice = PrivateKey::generate(&mut OsRng);
        let bob = PrivateKey::generate(&mut OsRng);

        let (issue_state, issue_cmd, issue_signers) =
            generate_issue_cash(1000, Currency::GBP, mini_corp.public_key(), issuer.public_key());
        let t1_wire = WireTransaction::new(
            vec![],
            vec![issue_state],
            vec![Command::new(issue_cmd, issue_signers)],
            vec![],
        );
        let t1 = signed(t1_wire, &[&issuer]);
        let t1_id = t1.id();

        let (move_to_alice, cmd_a, signers_a) = generate_move_cash(
            1000,
            Currency::GBP,
            alice.public_key(),
            mini_corp.public_key(),
        );
        let t2_wire = WireTransaction::new(
            vec![StateRef::new(t1_id, 0)],
            vec![move_to_alice],
            vec![Command::new(cmd_a, signers_a)],
            vec![],
        );
        let t2 = signed(t2_wire, &[&mini_corp]);

        let (move_to_bob, cmd_b, signers_b) = generate_move_cash(
            1000,
            Currency::GBP,
            bob.public_key(),
            mini_corp.public_key(),
        );
        let t2_prime_wire = WireTransaction::new(
            vec![StateRef::new(t1_id, 0)],
            vec![move_to_bob],
            vec![Command::new(cmd_b, signers_b)],
            vec![],
        );
        let t2_prime = signed(t2_prime_wire, &[&mini_corp]);

        let result = validate_group(vec![t1, t2, t2_prime], &[], &registry(), &NoIdentityService);
        assert!(matches!(result, Err(ValidatorError::DoubleSpend { .. })));
    }

    #[test]
    fn duplicate_input_on_one_transaction_is_a_self_conflict() {
        let issuer = PrivateKey::generate(&mut OsRng);
        let mini_corp = PrivateKey::generate(&mut OsRng);

        let (issue_state, issue_cmd, issue_signers) =
            generate_issue_cash(1000, Currency::GBP, mini_corp.public_key(), issuer.public_key());
        let t1_wire = WireTransaction::new(
            vec![],
            vec![issue_state],
            vec![Command::new(issue_cmd, issue_signers)],
            vec![],
        );
        let t1 = signed(t1_wire, &[&issuer]);
        let t1_id = t1.id();

        let (move_state, move_cmd, move_signers) = generate_move_cash(
            1000,
            Currency::GBP,
            mini_corp.public_key(),
            mini_corp.public_key(),
        );
        let duplicated_input_wire = WireTransaction::new(
            vec![StateRef::new(t1_id, 0), StateRef::new(t1_id, 0)],
            vec![move_state],
            vec![Command::new(move_cmd, move_signers)],
            vec![],
        );
        let t2 = signed(duplicated_input_wire, &[&mini_corp]);

        let result = validate_group(vec![t1, t2], &[], &registry(), &NoIdentityService);
        assert!(matches!(result, Err(ValidatorError::DoubleSpend { .. })));
    }

    #[test]
    fn unresolved_reference_is_rejected() {
        let mini_corp = PrivateKey::generate(&mut OsRng);
        let unknown_tx = crate::crypto::SecureHash::sha256(b"never-existed");

        let (move_state, move_cmd, move_signers) = generate_move_cash(
            1000,
            Currency::GBP,
            mini_corp.public_key(),
            mini_corp.public_key(),
        );
        let wire = WireTransaction::new(
            vec![StateRef::new(unknown_tx, 0)],
            vec![move_state],
            vec![Command::new(move_cmd, move_signers)],
            vec![],
        );
        let tx = signed(wire, &[&mini_corp]);

        let result = validate_group(vec![tx], &[], &registry(), &NoIdentityService);
        match result {
            Err(ValidatorError::UnresolvedReference { hash, .. }) => assert_eq!(hash, unknown_tx),
            other => panic!("expected unresolved-reference, got {other:?}"),
        }
    }

    #[test]
    fn missing_signature_is_rejected() {
        let issuer = PrivateKey::generate(&mut OsRng);
        let mini_corp = PrivateKey::generate(&mut OsRng);
        let (issue_state, issue_cmd, issue_signers) =
            generate_issue_cash(1000, Currency::GBP, mini_corp.public_key(), issuer.public_key());
        let wire = WireTransaction::new(
            vec![],
            vec![issue_state],
            vec![Command::new(issue_cmd, issue_signers)],
            vec![],
        );
        // Sealed with no signatures at all.
        let tx = SignedTransaction::new(wire, vec![]);

        let result = validate_group(vec![tx], &[], &registry(), &NoIdentityService);
        assert!(matches!(result, Err(ValidatorError::MissingSignature { .. })));
    }
}
