//! Contract verification: the only part of a contract that is
//! consensus — `verify` — plus the registry that maps a contract hash
//! to its implementation, and builder helpers protocols use to
//! assemble transactions.
//!
//! `verify` takes `&self` and a [`TransactionForVerification`] by
//! reference: there is no I/O, clock, or RNG reachable from the
//! signature, so purity is a structural property, not a convention.

use std::collections::HashMap;
use std::sync::Arc;

use crate::crypto::{Party, PublicKey, SecureHash};
use crate::error::ContractError;
use crate::model::{CashState, CommandData, ContractState, Currency, StateData, StateRef};

/// A command alongside the signer keys it names and whichever `Party`
/// each key resolved to (best-effort — an unresolved key is `None`).
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub data: CommandData,
    pub signers: Vec<PublicKey>,
    pub signing_parties: Vec<Option<Party>>,
}

/// The resolved view of a transaction handed to `Contract::verify`.
#[derive(Debug, Clone)]
pub struct TransactionForVerification {
    pub tx_id: SecureHash,
    pub inputs: Vec<(StateRef, ContractState)>,
    pub outputs: Vec<ContractState>,
    pub commands: Vec<ResolvedCommand>,
    pub attachments: Vec<SecureHash>,
}

impl TransactionForVerification {
    pub fn has_command(&self, predicate: impl Fn(&CommandData) -> bool) -> bool {
        self.commands.iter().any(|c| predicate(&c.data))
    }
}

pub trait Contract: Send + Sync {
    /// Pure predicate: given identical `tx` it yields an identical
    /// result. Implementations must not perform I/O or read a clock —
    /// the only time visible to a contract is whatever `TimestampWindow`
    /// a command in `tx` carries.
    fn verify(&self, tx: &TransactionForVerification) -> Result<(), ContractError>;

    /// The hash identifying this contract's code, as referenced by
    /// [`ContractState::contract_hash`].
    fn legal_contract_reference(&self) -> SecureHash;
}

/// Maps a contract hash to its implementation. Populated at node start
/// in a real deployment; tests populate it directly.
#[derive(Default, Clone)]
pub struct ContractRegistry {
    contracts: HashMap<SecureHash, Arc<dyn Contract>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, contract: Arc<dyn Contract>) {
        self.contracts.insert(contract.legal_contract_reference(), contract);
    }

    pub fn get(&self, hash: &SecureHash) -> Option<&Arc<dyn Contract>> {
        self.contracts.get(hash)
    }
}

/// Reference cash contract: `Issue` creates value from nothing (no
/// inputs, positive output), `Move` preserves total value across inputs
/// and outputs it governs.
pub struct CashContract;

impl CashContract {
    pub fn reference_hash() -> SecureHash {
        SecureHash::sha256(b"reference-cash-contract-v1")
    }

    fn cash_sum<'a>(states: impl Iterator<Item = &'a ContractState>, hash: &SecureHash) -> u64 {
        states
            .filter(|s| &s.contract_hash == hash)
            .filter_map(|s| match &s.data {
                StateData::Cash(c) => Some(c.amount),
                _ => None,
            })
            .sum()
    }
}

impl Contract for CashContract {
    fn verify(&self, tx: &TransactionForVerification) -> Result<(), ContractError> {
        let hash = self.legal_contract_reference();
        let is_issue = tx.has_command(|d| matches!(d, CommandData::Issue));
        let is_move = tx.has_command(|d| matches!(d, CommandData::Move));

        let input_total = Self::cash_sum(tx.inputs.iter().map(|(_, s)| s), &hash);
        let output_total = Self::cash_sum(tx.outputs.iter(), &hash);

        if is_issue {
            if input_total != 0 {
                return Err(ContractError::new("issue command must not consume cash inputs"));
            }
            if output_total == 0 {
                return Err(ContractError::new("issue command must create a positive cash amount"));
            }
            return Ok(());
        }
        if is_move {
            if input_total != output_total {
                return Err(ContractError::new(format!(
                    "move command must preserve total cash value: {input_total} in, {output_total} out"
                )));
            }
            return Ok(());
        }
        Err(ContractError::new("cash state requires an Issue or Move command"))
    }

    fn legal_contract_reference(&self) -> SecureHash {
        Self::reference_hash()
    }
}

/// Reference asset contract used by the two-party trade: ownership may
/// move freely between an `Issue`/`Move` pair, with no value
/// conservation rule of its own.
pub struct AssetContract;

impl AssetContract {
    pub fn reference_hash() -> SecureHash {
        SecureHash::sha256(b"reference-asset-contract-v1")
    }
}

impl Contract for AssetContract {
    fn verify(&self, tx: &TransactionForVerification) -> Result<(), ContractError> {
        let governs = |s: &&ContractState| s.contract_hash == self.legal_contract_reference();
        let input_count = tx.inputs.iter().map(|(_, s)| s).filter(governs).count();
        let output_count = tx.outputs.iter().filter(governs).count();

        if output_count == 0 {
            return Err(ContractError::new("asset contract must produce exactly one output"));
        }
        if !tx.has_command(|d| matches!(d, CommandData::Issue | CommandData::Move)) {
            return Err(ContractError::new("asset state requires an Issue or Move command"));
        }
        if tx.has_command(|d| matches!(d, CommandData::Issue)) && input_count != 0 {
            return Err(ContractError::new("issue command must not consume asset inputs"));
        }
        Ok(())
    }

    fn legal_contract_reference(&self) -> SecureHash {
        Self::reference_hash()
    }
}

/// Not part of consensus — used by protocols to assemble transactions.
pub fn generate_issue_cash(
    amount: u64,
    currency: Currency,
    owner: PublicKey,
    issuer: PublicKey,
) -> (ContractState, CommandData, Vec<PublicKey>) {
    let state = ContractState {
        contract_hash: CashContract::reference_hash(),
        data: StateData::Cash(CashState { amount, currency }),
        owner: Some(owner),
    };
    (state, CommandData::Issue, vec![issuer])
}

pub fn generate_move_cash(
    amount: u64,
    currency: Currency,
    new_owner: PublicKey,
    current_owner: PublicKey,
) -> (ContractState, CommandData, Vec<PublicKey>) {
    let state = ContractState {
        contract_hash: CashContract::reference_hash(),
        data: StateData::Cash(CashState { amount, currency }),
        owner: Some(new_owner),
    };
    (state, CommandData::Move, vec![current_owner])
}

pub fn generate_move_asset(
    description: String,
    new_owner: PublicKey,
    current_owner: PublicKey,
) -> (ContractState, CommandData, Vec<PublicKey>) {
    let state = ContractState {
        contract_hash: AssetContract::reference_hash(),
        data: StateData::Asset(crate::model::AssetState { description }),
        owner: Some(new_owner),
    };
    (state, CommandData::Move, vec![current_owner])
}
