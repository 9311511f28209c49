//! Timestamping authority: witnesses true time and signs a
//! transaction's timestamp command iff it brackets that time. See
//! `spec.md` §4.8.

use chrono::{DateTime, Utc};

use crate::crypto::{sign, LegallyIdentifiableSignature, Party, PrivateKey, Signature};
use crate::error::TsaError;
use crate::model::{CommandData, WireTransaction};

pub trait TimestampingAuthority {
    fn sign(&self, tx: &WireTransaction) -> Result<LegallyIdentifiableSignature, TsaError>;
}

/// Reference implementation. `now` is a stand-in for the GPS/UTC
/// trusted-time source `spec.md` describes as a design contract, not
/// something this crate can itself provide.
pub struct ReferenceTsa<F: Fn() -> DateTime<Utc>> {
    key: PrivateKey,
    party: Party,
    now: F,
}

impl ReferenceTsa<fn() -> DateTime<Utc>> {
    pub fn new(key: PrivateKey, party: Party) -> Self {
        Self {
            key,
            party,
            now: Utc::now,
        }
    }
}

impl<F: Fn() -> DateTime<Utc>> ReferenceTsa<F> {
    /// Constructs a TSA with an overridden time source, for tests that
    /// need to control what "true time" is.
    pub fn with_clock(key: PrivateKey, party: Party, now: F) -> Self {
        Self { key, party, now }
    }
}

impl<F: Fn() -> DateTime<Utc>> TimestampingAuthority for ReferenceTsa<F> {
    fn sign(&self, tx: &WireTransaction) -> Result<LegallyIdentifiableSignature, TsaError> {
        let window = tx
            .commands
            .iter()
            .find_map(|c| match &c.data {
                CommandData::Timestamp(w) => Some(*w),
                _ => None,
            })
            .ok_or(TsaError::MissingTimestampCommand)?;

        let true_time = (self.now)();
        if !window.contains(true_time) {
            return Err(TsaError::TimestampOutsideWindow);
        }

        let bytes = crate::codec::canonical_serialize(tx).expect("wire transaction is encodable");
        let raw: Signature = sign(&self.key, &bytes);
        Ok(LegallyIdentifiableSignature::new(raw, self.party.clone()))
    }
}
