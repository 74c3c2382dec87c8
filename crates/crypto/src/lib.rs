//! Handel Crypto
//!
//! BLS12-381 multi-signatures over `blst`, min-sig parameterization:
//! signatures live in G1 (48-byte compressed form), verification keys in G2
//! (96 bytes). Implements the `handel-core` scheme traits so the aggregation
//! engine can combine contributions by point addition and verify any
//! contributor subset against its aggregated verification key.

pub mod bls;

pub use bls::{BlsConstructor, BlsPublicKey, BlsSecretKey, BlsSignature};
pub use bls::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

use blst::BLST_ERROR;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("signature bytes do not encode a valid G1 point: {0:?}")]
    InvalidSignature(BLST_ERROR),
    #[error("public key bytes do not encode a valid G2 point: {0:?}")]
    InvalidPublicKey(BLST_ERROR),
    #[error("secret key bytes rejected: {0:?}")]
    InvalidSecretKey(BLST_ERROR),
}
