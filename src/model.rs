//! The transaction data model: states, commands, and the wire/signed/
//! ledger forms of a transaction.
//!
//! A transaction's identity is the SHA-256 of the canonical encoding of
//! its [`WireTransaction`], computed without signatures — see
//! [`WireTransaction::id`].

use chrono::{DateTime, Utc};

use crate::codec;
use crate::crypto::{Party, PublicKey, SecureHash, Signature};
use crate::error::ModelError;

/// A point in time, encoded as nanoseconds since the epoch so that the
/// wire form never carries a platform-dependent float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(DateTime<Utc>);

impl Instant {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Instant {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl<C> minicbor::Encode<C> for Instant {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }
        Err(minicbor::encode::Error::message(
            "failed to encode instant: timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Instant {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;
        Ok(Instant(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// `(after, before)` bounds a timestamp must fall within; at least one
/// bound is present, and `after <= before` when both are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TimestampWindow {
    #[n(0)]
    after: Option<Instant>,
    #[n(1)]
    before: Option<Instant>,
}

impl TimestampWindow {
    pub fn new(after: Option<Instant>, before: Option<Instant>) -> Result<Self, ModelError> {
        if after.is_none() && before.is_none() {
            return Err(ModelError::InvalidTimestampWindow);
        }
        if let (Some(a), Some(b)) = (after, before) {
            if a > b {
                return Err(ModelError::InvalidTimestampWindow);
            }
        }
        Ok(Self { after, before })
    }

    pub fn after(&self) -> Option<Instant> {
        self.after
    }

    pub fn before(&self) -> Option<Instant> {
        self.before
    }

    /// `true` iff `instant` falls within the window, treating a missing
    /// bound as -infinity / +infinity.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let after_ok = self.after.map(|a| a.to_datetime() <= instant).unwrap_or(true);
        let before_ok = self.before.map(|b| instant <= b.to_datetime()).unwrap_or(true);
        after_ok && before_ok
    }
}

/// An interest-rate observation signed into a transaction by a rate
/// oracle: `(index, tenor)` on a given date maps to a fixed-point rate
/// (basis points) so no contract-visible field is a float.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct FixData {
    #[n(0)]
    pub index_name: String,
    #[n(1)]
    pub tenor: String,
    #[n(2)]
    pub date: String,
    /// Fixed-point rate scaled by 1,000,000 — no float ever crosses
    /// this boundary.
    #[n(3)]
    pub rate_micros: i64,
}

/// A currency understood by the reference cash contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum Currency {
    #[n(0)]
    USD,
    #[n(1)]
    GBP,
    #[n(2)]
    EUR,
}

/// The opaque instruction embedded in a transaction, tagged by kind so
/// the serializer always preserves which variant it is (see `spec.md`
/// §9 on dynamic dispatch in `CommandData`).
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum CommandData {
    #[n(0)]
    Issue,
    #[n(1)]
    Move,
    #[n(2)]
    Timestamp(#[n(0)] TimestampWindow),
    #[n(3)]
    Fix(#[n(0)] FixData),
    #[n(4)]
    Opaque(#[n(0)] Vec<u8>),
}

/// A command plus the non-empty set of keys that must sign the
/// transaction for the command to take effect.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Command {
    #[n(0)]
    pub data: CommandData,
    #[n(1)]
    pub signers: Vec<PublicKey>,
}

impl Command {
    /// Panics if `signers` is empty: an unsigned-by-construction command
    /// is a programmer error, not a recoverable state.
    pub fn new(data: CommandData, signers: Vec<PublicKey>) -> Self {
        assert!(!signers.is_empty(), "{}", ModelError::EmptySignerSet);
        Self { data, signers }
    }
}

/// The tagged payload a [`ContractState`] carries.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum StateData {
    #[n(0)]
    Cash(#[n(0)] CashState),
    #[n(1)]
    Asset(#[n(0)] AssetState),
    #[n(2)]
    Opaque(#[n(0)] Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CashState {
    #[n(0)]
    pub amount: u64,
    #[n(1)]
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AssetState {
    #[n(0)]
    pub description: String,
}

/// An immutable record on the ledger, governed by the contract
/// identified by `contract_hash`. Ownable states additionally carry the
/// public key of whoever can move them.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ContractState {
    #[n(0)]
    pub contract_hash: SecureHash,
    #[n(1)]
    pub data: StateData,
    #[n(2)]
    pub owner: Option<PublicKey>,
}

/// `(transaction id, output index)`, addressing an existing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub struct StateRef {
    #[n(0)]
    pub tx_id: SecureHash,
    #[n(1)]
    pub index: u32,
}

impl StateRef {
    pub fn new(tx_id: SecureHash, index: u32) -> Self {
        Self { tx_id, index }
    }
}

/// The canonical, unsigned form of a transaction. Its id is fixed at
/// construction: `sha256(canonical_serialize(self))`.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct WireTransaction {
    #[n(0)]
    pub inputs: Vec<StateRef>,
    #[n(1)]
    pub outputs: Vec<ContractState>,
    #[n(2)]
    pub commands: Vec<Command>,
    #[n(3)]
    pub attachments: Vec<SecureHash>,
}

impl WireTransaction {
    pub fn new(
        inputs: Vec<StateRef>,
        outputs: Vec<ContractState>,
        commands: Vec<Command>,
        attachments: Vec<SecureHash>,
    ) -> Self {
        Self {
            inputs,
            outputs,
            commands,
            attachments,
        }
    }

    /// `sha256(canonical_serialize(self))`. This is the transaction id.
    pub fn id(&self) -> SecureHash {
        let bytes =
            codec::canonical_serialize(self).expect("WireTransaction must always be encodable");
        SecureHash::sha256(&bytes)
    }

    pub fn required_signers(&self) -> Vec<PublicKey> {
        let mut keys: Vec<PublicKey> = self
            .commands
            .iter()
            .flat_map(|c| c.signers.iter().copied())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// A [`WireTransaction`] plus the signatures collected over it so far.
/// Signatures from keys not named by any command are tolerated (for
/// robustness); every key named by a command must eventually have a
/// matching signature before the transaction is considered sealed.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct SignedTransaction {
    #[n(0)]
    pub wire: WireTransaction,
    #[n(1)]
    pub signatures: Vec<Signature>,
}

impl SignedTransaction {
    pub fn new(wire: WireTransaction, signatures: Vec<Signature>) -> Self {
        Self { wire, signatures }
    }

    pub fn id(&self) -> SecureHash {
        self.wire.id()
    }

    /// Keys required by some command that have no matching signature
    /// yet. Empty once the transaction is fully signed.
    pub fn missing_signers(&self) -> Vec<PublicKey> {
        let signed_by: std::collections::HashSet<PublicKey> =
            self.signatures.iter().map(|s| s.by).collect();
        self.wire
            .required_signers()
            .into_iter()
            .filter(|k| !signed_by.contains(k))
            .collect()
    }

    /// Checks every present signature verifies against the canonical
    /// bytes of the wire transaction, independent of completeness.
    pub fn verify_present_signatures(&self) -> Result<(), (PublicKey, crate::error::CryptoError)> {
        let bytes =
            codec::canonical_serialize(&self.wire).expect("WireTransaction must be encodable");
        for sig in &self.signatures {
            if let Err(e) = sig.verify(&bytes) {
                return Err((sig.by, e));
            }
        }
        Ok(())
    }
}

/// A transaction with every input state and every referenced attachment
/// resolved to its runtime form. Derived by the validator/resolver, not
/// stored — recomputed from the wire form plus the local ledger state
/// whenever it is needed.
#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    pub id: SecureHash,
    pub inputs: Vec<(StateRef, ContractState)>,
    pub outputs: Vec<ContractState>,
    pub commands: Vec<(CommandData, Vec<PublicKey>)>,
    pub attachments: Vec<SecureHash>,
    pub signed: SignedTransaction,
}

impl LedgerTransaction {
    pub fn wire(&self) -> &WireTransaction {
        &self.signed.wire
    }
}
