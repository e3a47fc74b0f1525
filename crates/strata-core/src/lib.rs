//! Strata Core - value types and cryptography for the Strata DPoS chain
//!
//! This crate provides hashing, ed25519 keys and signatures, deterministic
//! serialization, and the block/transaction value types shared by the
//! storage, execution, and consensus layers.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{hash_bytes, merkle_root, sign, verify, Hash, KeyPair, PublicKey, SecretKey, Sig};
pub use error::CoreError;
pub use types::*;
