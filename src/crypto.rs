//! Secure hashes, keypairs, and signatures.
//!
//! A [`SecureHash`] is algorithm-tagged so a future algorithm can be
//! introduced without touching every call site; today only SHA-256 is
//! implemented. Signing is EdDSA over Curve25519 via `ed25519-dalek`.

use std::fmt;

use ed25519_dalek::ed25519::signature::Signer as _;
use ed25519_dalek::{Signature as DalekSignature, SigningKey, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// A content-addressing hash. Only SHA-256 exists today; the algorithm
/// tag lets a verifier reject a hash it does not know how to check
/// rather than silently mis-comparing bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub struct SecureHash {
    #[n(0)]
    algorithm: HashAlgorithm,
    #[n(1)]
    bytes: [u8; 32],
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, minicbor::Encode, minicbor::Decode)]
pub enum HashAlgorithm {
    #[n(0)]
    Sha256,
}

impl SecureHash {
    pub fn sha256(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest: [u8; 32] = hasher.finalize().into();
        Self {
            algorithm: HashAlgorithm::Sha256,
            bytes: digest,
        }
    }

    pub fn from_raw(algorithm: HashAlgorithm, bytes: [u8; 32]) -> Self {
        Self { algorithm, bytes }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureHash({})", hex::encode(self.bytes))
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.bytes))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub struct PublicKey {
    #[n(0)]
    algorithm: KeyAlgorithm,
    #[n(1)]
    bytes: [u8; 32],
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, minicbor::Encode, minicbor::Decode)]
pub enum KeyAlgorithm {
    #[n(0)]
    Ed25519,
}

impl PublicKey {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self {
            algorithm: KeyAlgorithm::Ed25519,
            bytes: key.to_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    fn to_verifying_key(self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.bytes).map_err(|_| CryptoError::SignatureInvalid)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.bytes))
    }
}

/// A private signing key. Never serialized or logged.
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl PrivateKey {
    pub fn generate<R: rand::CryptoRng + rand::RngCore>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::generate(rng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(&self.signing_key.verifying_key())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A legal entity: a name and the public key that identifies it.
#[derive(Clone, Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Party {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub owning_key: PublicKey,
}

/// A raw signature produced by some key, independent of whose legal
/// identity (if any) that key belongs to.
#[derive(Clone, Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Signature {
    #[n(0)]
    pub by: PublicKey,
    #[n(1)]
    pub bytes: Vec<u8>,
}

impl Signature {
    pub fn verify(&self, message: &[u8]) -> Result<(), CryptoError> {
        verify(self.by, message, &self.bytes)
    }
}

/// A signature that additionally asserts the legal identity of its
/// signer. Only constructible when the claimed party's owning key
/// matches the signing key — any mismatch is a programmer error, not a
/// recoverable failure, because it means the caller mislabeled whose
/// signature this is.
#[derive(Clone, Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LegallyIdentifiableSignature {
    #[n(0)]
    pub signature: Signature,
    #[n(1)]
    pub party: Party,
}

impl LegallyIdentifiableSignature {
    pub fn new(signature: Signature, party: Party) -> Self {
        assert_eq!(
            signature.by, party.owning_key,
            "legally-identifiable signature constructed with a party whose owning key does not match the signer"
        );
        Self { signature, party }
    }
}

pub fn sign(private_key: &PrivateKey, bytes: &[u8]) -> Signature {
    let sig: DalekSignature = private_key.signing_key.sign(bytes);
    Signature {
        by: private_key.public_key(),
        bytes: sig.to_bytes().to_vec(),
    }
}

pub fn verify(public_key: PublicKey, bytes: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let verifying_key = public_key.to_verifying_key()?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::SignatureInvalid)?;
    let sig = DalekSignature::from_bytes(&sig_bytes);
    verifying_key
        .verify(bytes, &sig)
        .map_err(|_| CryptoError::SignatureInvalid)
}
