//! The two-party trade protocol: a delivery-vs-payment exchange of an
//! asset for cash between a seller and a buyer, witnessed by an
//! external timestamping authority. See `spec.md` §4.7 for the six
//! numbered steps this module implements directly and §5 for the
//! state diagram the `SellerState`/`BuyerState` enums record.
//!
//! There is no messaging runtime in this crate's dependency stack, so
//! each suspension point in the protocol (send / receive / send-then-
//! receive / sub-protocol call) is a plain method call rather than an
//! async operation. A node wiring this into an actual network would
//! serialize the method arguments onto its transport at each of these
//! points; this module only owns the conversation's logic.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::contract::{generate_move_asset, generate_move_cash, ContractRegistry};
use crate::crypto::{sign, Party, PrivateKey, PublicKey, Signature};
use crate::error::TradeError;
use crate::model::{
    Command, CommandData, ContractState, Currency, LedgerTransaction, SignedTransaction,
    StateData, StateRef, TimestampWindow, WireTransaction,
};
use crate::validator::{validate_group, verify_contracts_only, IdentityService};

/// Where a seller's side of the conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellerState {
    SentOffer,
    ReceivedProposal,
    VerifiedProposal,
    Timestamped,
    SentSignatures,
}

/// Where a buyer's side of the conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyerState {
    ReceivedOffer,
    SentProposal,
    ReceivedSignatures,
    Assembled,
}

/// The seller's opening offer, sent before any transaction exists: what
/// is for sale, what it costs, and which key should receive payment.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct SellerTradeInfo {
    #[n(0)]
    pub asset_ref: StateRef,
    #[n(1)]
    pub asset_state: ContractState,
    #[n(2)]
    pub price: u64,
    #[n(3)]
    pub currency: Currency,
    #[n(4)]
    pub payment_key: PublicKey,
}

/// The seller's side of the conversation: the party delivering the
/// asset and receiving payment.
pub struct SellerFlow {
    key: PrivateKey,
    asset_ref: StateRef,
    asset_state: ContractState,
    price: u64,
    currency: Currency,
    payment_key: PublicKey,
    state: SellerState,
    proposal: Option<SignedTransaction>,
}

impl SellerFlow {
    pub fn new(
        key: PrivateKey,
        asset_ref: StateRef,
        asset_state: ContractState,
        price: u64,
        currency: Currency,
    ) -> Self {
        let payment_key = key.public_key();
        Self {
            key,
            asset_ref,
            asset_state,
            price,
            currency,
            payment_key,
            state: SellerState::SentOffer,
            proposal: None,
        }
    }

    pub fn state(&self) -> SellerState {
        self.state
    }

    /// Step 1 (send): the offer to publish to the buyer.
    pub fn offer(&self) -> SellerTradeInfo {
        SellerTradeInfo {
            asset_ref: self.asset_ref,
            asset_state: self.asset_state.clone(),
            price: self.price,
            currency: self.currency,
            payment_key: self.payment_key,
        }
    }

    /// Step 4 (receive): verifies the buyer's proposal "ignoring missing
    /// signatures" — the seller and the timestamping authority have not
    /// yet signed, so contract verification runs without the
    /// signature-completeness check `validate_group` would otherwise
    /// apply. The only signatures allowed to still be missing are the
    /// seller's own and the timestamping authority's; anything else
    /// missing means the buyer sent a proposal that could never be
    /// completed and is rejected before a TSA round trip is wasted on it.
    pub fn receive_and_verify_proposal(
        &mut self,
        proposal: SignedTransaction,
        roots: &[SignedTransaction],
        registry: &ContractRegistry,
        identity: &dyn IdentityService,
    ) -> Result<(), TradeError> {
        self.state = SellerState::ReceivedProposal;

        let tsa_keys: HashSet<PublicKey> = proposal
            .wire
            .commands
            .iter()
            .filter(|c| matches!(c.data, CommandData::Timestamp(_)))
            .flat_map(|c| c.signers.iter().copied())
            .collect();
        let mut expected_missing = tsa_keys;
        expected_missing.insert(self.payment_key);
        let actual_missing: HashSet<PublicKey> = proposal.missing_signers().into_iter().collect();
        if actual_missing != expected_missing {
            return Err(TradeError::UnexpectedMissingSignatures(
                actual_missing.into_iter().collect(),
            ));
        }

        let verified = verify_contracts_only(&proposal, roots, registry, identity)?;

        let delivered = verified
            .outputs
            .iter()
            .find(|s| s.contract_hash == self.asset_state.contract_hash)
            .ok_or(TradeError::AssetMismatch {
                expected: self.asset_state.contract_hash,
                actual: self.asset_state.contract_hash,
            })?;
        if delivered.data != self.asset_state.data {
            return Err(TradeError::AssetMismatch {
                expected: self.asset_state.contract_hash,
                actual: delivered.contract_hash,
            });
        }

        let paid: u64 = verified
            .outputs
            .iter()
            .filter(|s| s.owner == Some(self.payment_key))
            .filter_map(|s| match &s.data {
                StateData::Cash(c) if c.currency == self.currency => Some(c.amount),
                _ => None,
            })
            .sum();
        if paid != self.price {
            return Err(TradeError::WrongPaymentAmount {
                expected: self.price,
                actual: paid,
            });
        }

        self.proposal = Some(proposal);
        self.state = SellerState::VerifiedProposal;
        Ok(())
    }

    /// Steps 5-6 (sub-protocol call, then send): obtains the external
    /// timestamp and adds the seller's own signature over the asset
    /// move command, returning the bundle to hand to the buyer.
    pub fn obtain_timestamp_and_sign(
        &mut self,
        tsa: &dyn crate::tsa::TimestampingAuthority,
    ) -> Result<Vec<Signature>, TradeError> {
        let proposal = self.proposal.as_ref().ok_or(TradeError::Cancelled)?;
        let tsa_signature = tsa.sign(&proposal.wire)?;
        self.state = SellerState::Timestamped;

        let bytes = crate::codec::canonical_serialize(&proposal.wire)
            .expect("wire transaction is encodable");
        let seller_signature = sign(&self.key, &bytes);

        self.state = SellerState::SentSignatures;
        Ok(vec![tsa_signature.signature, seller_signature])
    }
}

/// The buyer's side of the conversation: the party paying cash and
/// receiving the asset.
pub struct BuyerFlow {
    key: PrivateKey,
    max_price: u64,
    state: BuyerState,
    proposal_wire: Option<WireTransaction>,
    buyer_signature: Option<Signature>,
}

impl BuyerFlow {
    pub fn new(key: PrivateKey, max_price: u64) -> Self {
        Self {
            key,
            max_price,
            state: BuyerState::ReceivedOffer,
            proposal_wire: None,
            buyer_signature: None,
        }
    }

    pub fn state(&self) -> BuyerState {
        self.state
    }

    /// Steps 2-3 (receive, then build and send): checks the offer is
    /// within budget, assembles the trade transaction spending the
    /// seller's asset and the buyer's cash, signs the cash move, and
    /// returns the half-signed proposal.
    pub fn build_proposal(
        &mut self,
        offer: &SellerTradeInfo,
        cash_ref: StateRef,
        cash_state: ContractState,
        tsa_party: &Party,
        window: TimestampWindow,
    ) -> Result<SignedTransaction, TradeError> {
        if offer.price > self.max_price {
            return Err(TradeError::UnacceptablePrice {
                offered: offer.price,
                max: self.max_price,
            });
        }
        let StateData::Cash(cash) = &cash_state.data else {
            return Err(TradeError::AssetMismatch {
                expected: offer.asset_state.contract_hash,
                actual: cash_state.contract_hash,
            });
        };
        if cash.currency != offer.currency || cash.amount < offer.price {
            return Err(TradeError::WrongPaymentAmount {
                expected: offer.price,
                actual: cash.amount,
            });
        }
        let StateData::Asset(asset) = &offer.asset_state.data else {
            return Err(TradeError::AssetMismatch {
                expected: offer.asset_state.contract_hash,
                actual: offer.asset_state.contract_hash,
            });
        };
        let seller_key = offer.asset_state.owner.ok_or(TradeError::AssetMismatch {
            expected: offer.asset_state.contract_hash,
            actual: offer.asset_state.contract_hash,
        })?;

        let buyer_key = self.key.public_key();
        let (asset_out, asset_cmd, asset_signers) =
            generate_move_asset(asset.description.clone(), buyer_key, seller_key);
        let (cash_out, cash_cmd, cash_signers) =
            generate_move_cash(offer.price, offer.currency, offer.payment_key, buyer_key);

        let wire = WireTransaction::new(
            vec![offer.asset_ref, cash_ref],
            vec![asset_out, cash_out],
            vec![
                Command::new(asset_cmd, asset_signers),
                Command::new(cash_cmd, cash_signers),
                Command::new(CommandData::Timestamp(window), vec![tsa_party.owning_key]),
            ],
            vec![],
        );

        let bytes = crate::codec::canonical_serialize(&wire).expect("wire transaction is encodable");
        let buyer_signature = sign(&self.key, &bytes);

        self.proposal_wire = Some(wire.clone());
        self.buyer_signature = Some(buyer_signature.clone());
        self.state = BuyerState::SentProposal;

        Ok(SignedTransaction::new(wire, vec![buyer_signature]))
    }

    /// Steps 7-8 (receive, then assemble): combines the seller's
    /// timestamp-and-signature bundle with the buyer's own signature and
    /// runs full validation, including the signature-completeness check
    /// the seller's partial check deliberately skipped.
    pub fn assemble_and_verify(
        &mut self,
        seller_signatures: Vec<Signature>,
        roots: &[SignedTransaction],
        registry: &ContractRegistry,
        identity: &dyn IdentityService,
    ) -> Result<LedgerTransaction, TradeError> {
        let wire = self.proposal_wire.clone().ok_or(TradeError::Cancelled)?;
        let buyer_signature = self.buyer_signature.clone().ok_or(TradeError::Cancelled)?;
        self.state = BuyerState::ReceivedSignatures;

        let mut signatures = seller_signatures;
        signatures.push(buyer_signature);
        let final_tx = SignedTransaction::new(wire, signatures);

        final_tx.verify_present_signatures().map_err(|(signer, cause)| {
            TradeError::FinalVerify(format!("signature from {signer:?} does not verify: {cause}"))
        })?;

        let mut ledger_txs = validate_group(vec![final_tx], roots, registry, identity)?;
        self.state = BuyerState::Assembled;
        Ok(ledger_txs.remove(0))
    }
}

/// A point in wall-clock time the caller supplies explicitly — used by
/// tests to pin "true time" without reaching for a real clock.
pub type Clock = DateTime<Utc>;
