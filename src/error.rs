//! Error kinds for every component of the verification core.
//!
//! Each concern gets its own narrow enum, mirroring how a single
//! validation failure should carry exactly the structured data a caller
//! needs to react — never a single catch-all error type.

use crate::crypto::SecureHash;
use crate::model::StateRef;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("signature does not verify against the supplied bytes")]
    SignatureInvalid,
}

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("canonical encoding failed: {0}")]
    Encode(String),
    #[error("canonical decoding failed: {0}")]
    Decode(String),
}

#[derive(thiserror::Error, Debug)]
#[error("contract rejected transaction: {message}")]
pub struct ContractError {
    pub message: String,
}

impl ContractError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("a command must require at least one signer")]
    EmptySignerSet,
    #[error("a timestamp window needs after <= before and at least one bound set")]
    InvalidTimestampWindow,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(thiserror::Error, Debug)]
pub enum AttachmentError {
    #[error("attachment archive is malformed: {reason}")]
    Malformed { reason: String },
    #[error("attachment bytes on disk do not hash to the expected id {expected}")]
    OnDiskHashMismatch { expected: SecureHash },
    #[error("no attachment stored under hash {0}")]
    NotFound(SecureHash),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ValidatorError {
    #[error("transaction {tx} references unresolved input ({hash}, {index})")]
    UnresolvedReference {
        tx: SecureHash,
        hash: SecureHash,
        index: u32,
    },
    #[error("double spend of {reference:?}: consumed by both {first} and {second}")]
    DoubleSpend {
        reference: StateRef,
        first: SecureHash,
        second: SecureHash,
    },
    #[error("contract rejected transaction {tx}: {cause}")]
    ContractRejected { tx: SecureHash, cause: ContractError },
    #[error("transaction {tx} is missing signatures for keys: {missing:?}")]
    MissingSignature {
        tx: SecureHash,
        missing: Vec<crate::crypto::PublicKey>,
    },
    #[error("signature from {signer:?} does not verify against transaction {tx}")]
    SignatureInvalid {
        tx: SecureHash,
        signer: crate::crypto::PublicKey,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    #[error("peer did not return all requested transactions; missing {missing:?}")]
    PeerResponseIncomplete { missing: Vec<SecureHash> },
    #[error("attachment fetched from peer is corrupt: expected {expected}, got {actual}")]
    AttachmentCorrupt {
        expected: SecureHash,
        actual: SecureHash,
    },
    #[error("dependency graph exceeded the size bound of {bound} transactions")]
    GraphTooLarge { bound: usize },
    #[error(transparent)]
    Validator(#[from] ValidatorError),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Storage(#[from] sled::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum TradeError {
    #[error("price {offered} exceeds the buyer's maximum of {max}")]
    UnacceptablePrice { offered: u64, max: u64 },
    #[error("asset contract {actual} does not match expected type {expected}")]
    AssetMismatch {
        expected: SecureHash,
        actual: SecureHash,
    },
    #[error("unexpected signatures still missing after seller verification: {0:?}")]
    UnexpectedMissingSignatures(Vec<crate::crypto::PublicKey>),
    #[error("payment to seller's new key totalled {actual}, expected {expected}")]
    WrongPaymentAmount { expected: u64, actual: u64 },
    #[error("final signature verification failed: {0}")]
    FinalVerify(String),
    #[error("the conversation was cancelled")]
    Cancelled,
    #[error(transparent)]
    Validator(#[from] ValidatorError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Tsa(#[from] TsaError),
}

#[derive(thiserror::Error, Debug)]
pub enum TsaError {
    #[error("true time does not fall within the transaction's declared window")]
    TimestampOutsideWindow,
    #[error("transaction carries no timestamp command")]
    MissingTimestampCommand,
}

#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("data directory {0} is already locked by another process")]
    AlreadyLocked(std::path::PathBuf),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] sled::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum OracleError {
    #[error("no recorded fix for ({index}, {tenor}) on or before {date}")]
    UnknownFix {
        index: String,
        tenor: String,
        date: chrono::NaiveDate,
    },
    #[error("fix command data does not match the oracle's recorded value")]
    FixMismatch,
    #[error("malformed fix line {line}: {reason}")]
    MalformedFixLine { line: usize, reason: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
}
