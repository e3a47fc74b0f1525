use serde::{Deserialize, Serialize};

use crate::constants::LEGACY_CONTRACT_SCOPE;
use crate::crypto::{hash_bytes, sign, verify, Hash, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;

/// The payload of a transaction. Each variant carries a stable wire
/// ordinal; ordinals above `LEGACY_CONTRACT_SCOPE` only execute once the
/// network-wide hard fork has been observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Contract {
    /// Move native balance between accounts
    Transfer { to: PublicKey, amount: u64 },
    /// Issue a named asset (post-fork contract)
    AssetIssue { name: String, total_supply: u64 },
}

impl Contract {
    /// Stable ordinal used by the hard-fork gate
    pub fn kind(&self) -> u32 {
        match self {
            Contract::Transfer { .. } => 1,
            Contract::AssetIssue { .. } => 10,
        }
    }

    /// Whether this contract predates the hard fork and is always executable
    pub fn is_legacy(&self) -> bool {
        self.kind() <= LEGACY_CONTRACT_SCOPE
    }
}

/// A signed transaction.
///
/// `ref_block_number`/`ref_block_hash` form the Tapos reference: the
/// transaction is only valid on a chain that contains that exact block
/// within the recent window, which makes cross-fork replay impossible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: PublicKey,
    /// Number of a recent canonical block
    pub ref_block_number: u64,
    /// Hash the chain must record at `ref_block_number`
    pub ref_block_hash: Hash,
    /// Millisecond timestamp after which the transaction is dead
    pub expiration: i64,
    pub fee: u64,
    pub contract: Contract,
    pub signature: Sig,
}

/// Signing payload (everything but the signature)
#[derive(Serialize)]
struct SigningData<'a> {
    sender: &'a PublicKey,
    ref_block_number: u64,
    ref_block_hash: &'a Hash,
    expiration: i64,
    fee: u64,
    contract: &'a Contract,
}

impl Transaction {
    pub fn new(
        sender: PublicKey,
        ref_block_number: u64,
        ref_block_hash: Hash,
        expiration: i64,
        fee: u64,
        contract: Contract,
    ) -> Self {
        Transaction {
            sender,
            ref_block_number,
            ref_block_hash,
            expiration,
            fee,
            contract,
            signature: Sig::default(),
        }
    }

    fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(&SigningData {
            sender: &self.sender,
            ref_block_number: self.ref_block_number,
            ref_block_hash: &self.ref_block_hash,
            expiration: self.expiration,
            fee: self.fee,
            contract: &self.contract,
        })
    }

    /// Sign with the sender's secret key
    pub fn sign(&mut self, secret: &SecretKey) -> Result<(), CoreError> {
        let bytes = self.signing_bytes()?;
        self.signature = sign(secret, &bytes);
        Ok(())
    }

    /// Build and sign in one step
    pub fn new_signed(
        sender: PublicKey,
        ref_block_number: u64,
        ref_block_hash: Hash,
        expiration: i64,
        fee: u64,
        contract: Contract,
        secret: &SecretKey,
    ) -> Result<Self, CoreError> {
        let mut tx = Self::new(
            sender,
            ref_block_number,
            ref_block_hash,
            expiration,
            fee,
            contract,
        );
        tx.sign(secret)?;
        Ok(tx)
    }

    /// Verify the sender signature
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        let bytes = self.signing_bytes()?;
        verify(&self.sender, &bytes, &self.signature)
    }

    /// Content hash (includes the signature)
    pub fn hash(&self) -> Result<Hash, CoreError> {
        Ok(hash_bytes(&serialize::to_bytes(self)?))
    }

    /// Encoded size, checked against the per-transaction limit
    pub fn size_bytes(&self) -> Result<usize, CoreError> {
        Ok(serialize::to_bytes(self)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn transfer(sender: &KeyPair) -> Transaction {
        Transaction::new_signed(
            sender.public,
            0,
            Hash::ZERO,
            10_000,
            1,
            Contract::Transfer {
                to: KeyPair::generate().public,
                amount: 50,
            },
            &sender.secret,
        )
        .unwrap()
    }

    #[test]
    fn test_signature_roundtrip() {
        let sender = KeyPair::generate();
        let tx = transfer(&sender);
        assert!(tx.verify_signature().is_ok());
    }

    #[test]
    fn test_tampered_transaction_fails_verification() {
        let sender = KeyPair::generate();
        let mut tx = transfer(&sender);
        tx.fee += 1;
        assert!(tx.verify_signature().is_err());
    }

    #[test]
    fn test_contract_ordinals() {
        let transfer = Contract::Transfer {
            to: PublicKey::default(),
            amount: 0,
        };
        let issue = Contract::AssetIssue {
            name: "GEM".to_string(),
            total_supply: 1_000,
        };
        assert!(transfer.is_legacy());
        assert!(!issue.is_legacy());
        assert!(issue.kind() > transfer.kind());
    }

    #[test]
    fn test_hash_covers_signature() {
        let sender = KeyPair::generate();
        let mut tx = transfer(&sender);
        let before = tx.hash().unwrap();
        tx.signature = Sig::default();
        assert_ne!(before, tx.hash().unwrap());
    }
}
