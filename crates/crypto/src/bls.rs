//! BLS12-381 scheme types wrapping `blst` min-sig primitives.

use std::fmt;

use blst::min_sig::{
    AggregatePublicKey, AggregateSignature, PublicKey as BlstPk, SecretKey as BlstSk,
    Signature as BlstSig,
};
use blst::BLST_ERROR;
use rand_core::{CryptoRng, RngCore};

use handel_core::{BitSet, Constructor, HandelError};

use crate::CryptoError;

/// Ciphersuite domain separation tag, basic scheme over G1.
const DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

/// Compressed G1 signature size.
pub const SIGNATURE_SIZE: usize = 48;
/// Compressed G2 public key size.
pub const PUBLIC_KEY_SIZE: usize = 96;

/// A BLS signing key.
pub struct BlsSecretKey(BlstSk);

impl BlsSecretKey {
    /// Generate a fresh key from 32 bytes of RNG-supplied key material.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut ikm = [0u8; 32];
        rng.fill_bytes(&mut ikm);
        let sk = BlstSk::key_gen(&ikm, &[])
            .expect("key_gen only rejects key material shorter than 32 bytes");
        Self(sk)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        BlstSk::from_bytes(bytes)
            .map(Self)
            .map_err(CryptoError::InvalidSecretKey)
    }

    pub fn sign(&self, msg: &[u8]) -> BlsSignature {
        BlsSignature(self.0.sign(msg, DST, &[]))
    }

    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.0.sk_to_pk())
    }
}

/// A BLS verification key in G2.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlsPublicKey(BlstPk);

impl BlsPublicKey {
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Deserialize with subgroup check.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        BlstPk::key_validate(bytes)
            .map(Self)
            .map_err(CryptoError::InvalidPublicKey)
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey({})", hex::encode(&self.to_bytes()[..8]))
    }
}

impl handel_core::PublicKey for BlsPublicKey {
    type Sig = BlsSignature;

    fn verify(&self, msg: &[u8], sig: &Self::Sig) -> bool {
        // points were subgroup-checked at deserialization
        sig.0.verify(false, msg, DST, &[], &self.0, false) == BLST_ERROR::BLST_SUCCESS
    }

    fn combine(&self, other: &Self) -> Self {
        let mut agg = AggregatePublicKey::from_public_key(&self.0);
        agg.add_public_key(&other.0, false)
            .expect("aggregating validated keys cannot fail without validation");
        Self(agg.to_public_key())
    }
}

/// A BLS signature in G1.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlsSignature(BlstSig);

impl BlsSignature {
    /// Deserialize with subgroup check.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        BlstSig::sig_validate(bytes, true)
            .map(Self)
            .map_err(CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature({})", hex::encode(&self.0.to_bytes()[..8]))
    }
}

impl handel_core::Signature for BlsSignature {
    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    fn combine(&self, other: &Self) -> Self {
        let mut agg = AggregateSignature::from_signature(&self.0);
        agg.add_signature(&other.0, false)
            .expect("aggregating validated signatures cannot fail without validation");
        Self(agg.to_signature())
    }
}

/// Scheme entry point: owns the dense public-key table produced by key
/// registration and derives aggregate verification keys for any bitset.
pub struct BlsConstructor {
    keys: Vec<BlsPublicKey>,
}

impl BlsConstructor {
    pub fn new(keys: Vec<BlsPublicKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[BlsPublicKey] {
        &self.keys
    }
}

impl Constructor for BlsConstructor {
    type Pub = BlsPublicKey;

    fn signature_from_bytes(&self, bytes: &[u8]) -> Result<BlsSignature, HandelError> {
        BlsSignature::from_bytes(bytes)
            .map_err(|e| HandelError::InvalidSignatureBytes(e.to_string()))
    }

    fn aggregate_public_key(&self, bits: &BitSet) -> Result<BlsPublicKey, HandelError> {
        let mut acc: Option<BlsPublicKey> = None;
        for index in bits.iter_set() {
            let key = self
                .keys
                .get(index)
                .ok_or(HandelError::UnknownSigner(index))?;
            acc = Some(match acc {
                Some(agg) => handel_core::PublicKey::combine(&agg, key),
                None => *key,
            });
        }
        acc.ok_or(HandelError::EmptyAggregation)
    }
}
