use serde::{Deserialize, Serialize};

use crate::crypto::{hash_bytes, merkle_root, sign, verify, Hash, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;
use crate::types::transaction::Transaction;

/// Block header. The block's identity is the Blake3 hash of the encoded
/// header, so every field here is consensus-critical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number (0 for genesis)
    pub number: u64,
    /// Hash of the parent block (zeros for genesis)
    pub parent_hash: Hash,
    /// Millisecond timestamp; determines the witness slot
    pub timestamp: i64,
    /// Address of the witness that produced this block
    pub witness: PublicKey,
    /// Protocol version the producing witness runs
    pub version: u32,
    /// Merkle root over the transaction hashes
    pub tx_root: Hash,
}

impl BlockHeader {
    pub fn hash(&self) -> Result<Hash, CoreError> {
        Ok(hash_bytes(&serialize::to_bytes(self)?))
    }
}

/// A validated block: header, witness signature over the header hash, and
/// the ordered transaction list. Immutable once signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub signature: Sig,
    pub txs: Vec<Transaction>,
}

impl BlockRecord {
    pub fn new(header: BlockHeader, txs: Vec<Transaction>) -> Self {
        BlockRecord {
            header,
            signature: Sig::default(),
            txs,
        }
    }

    /// Block identity: hash of the header
    pub fn hash(&self) -> Result<Hash, CoreError> {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    /// Sign the header as the producing witness
    pub fn sign(&mut self, secret: &SecretKey) -> Result<(), CoreError> {
        let id = self.hash()?;
        self.signature = sign(secret, id.as_bytes());
        Ok(())
    }

    /// Verify the witness signature against the declared witness address
    pub fn verify_witness_signature(&self) -> Result<(), CoreError> {
        let id = self.hash()?;
        verify(&self.header.witness, id.as_bytes(), &self.signature)
    }

    pub fn compute_tx_root(&self) -> Result<Hash, CoreError> {
        let hashes: Result<Vec<Hash>, _> = self.txs.iter().map(|tx| tx.hash()).collect();
        Ok(merkle_root(&hashes?))
    }

    /// Check that the header's tx root matches the transaction list
    pub fn verify_tx_root(&self) -> Result<bool, CoreError> {
        Ok(self.compute_tx_root()? == self.header.tx_root)
    }

    /// Encoded size, checked against the block size limit
    pub fn size_bytes(&self) -> Result<usize, CoreError> {
        Ok(serialize::to_bytes(self)?.len())
    }
}

/// Genesis parameters. Fixed at network launch; every node must construct
/// an identical genesis block from an identical config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: u64,
    /// Millisecond timestamp of slot 0
    pub genesis_timestamp: i64,
    /// Slot duration in milliseconds
    pub block_interval_ms: i64,
    pub initial_balances: Vec<(PublicKey, u64)>,
    /// Initial active witness rotation, in schedule order
    pub witnesses: Vec<PublicKey>,
}

impl GenesisConfig {
    /// The genesis block: number 0, zero parent, no producer signature
    pub fn genesis_block(&self) -> BlockRecord {
        let header = BlockHeader {
            number: 0,
            parent_hash: Hash::ZERO,
            timestamp: self.genesis_timestamp,
            witness: PublicKey::default(),
            version: 0,
            tx_root: Hash::ZERO,
        };
        BlockRecord::new(header, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::transaction::Contract;

    fn sample_block(witness: &KeyPair) -> BlockRecord {
        let sender = KeyPair::generate();
        let tx = Transaction::new_signed(
            sender.public,
            0,
            Hash::ZERO,
            5_000,
            1,
            Contract::Transfer {
                to: KeyPair::generate().public,
                amount: 10,
            },
            &sender.secret,
        )
        .unwrap();

        let tx_root = merkle_root(&[tx.hash().unwrap()]);
        let header = BlockHeader {
            number: 1,
            parent_hash: Hash::ZERO,
            timestamp: 3_000,
            witness: witness.public,
            version: 1,
            tx_root,
        };
        let mut block = BlockRecord::new(header, vec![tx]);
        block.sign(&witness.secret).unwrap();
        block
    }

    #[test]
    fn test_block_identity_is_header_hash() {
        let witness = KeyPair::generate();
        let block = sample_block(&witness);
        assert_eq!(block.hash().unwrap(), block.header.hash().unwrap());
    }

    #[test]
    fn test_witness_signature() {
        let witness = KeyPair::generate();
        let block = sample_block(&witness);
        assert!(block.verify_witness_signature().is_ok());
    }

    #[test]
    fn test_signature_by_wrong_witness_rejected() {
        let witness = KeyPair::generate();
        let mut block = sample_block(&witness);
        // Declared witness stays, signer changes
        block.sign(&KeyPair::generate().secret).unwrap();
        assert!(block.verify_witness_signature().is_err());
    }

    #[test]
    fn test_tx_root_verification() {
        let witness = KeyPair::generate();
        let mut block = sample_block(&witness);
        assert!(block.verify_tx_root().unwrap());
        block.txs.clear();
        assert!(!block.verify_tx_root().unwrap());
    }

    #[test]
    fn test_genesis_block() {
        let config = GenesisConfig {
            chain_id: 1,
            genesis_timestamp: 0,
            block_interval_ms: 3_000,
            initial_balances: vec![],
            witnesses: vec![KeyPair::generate().public],
        };
        let genesis = config.genesis_block();
        assert_eq!(genesis.number(), 0);
        assert_eq!(genesis.parent_hash(), Hash::ZERO);
        assert!(genesis.txs.is_empty());
    }
}
