use std::collections::BTreeMap;

use strata_core::{hash_bytes, serialize, BlockRecord, Contract, Hash, PublicKey, Transaction};
use tracing::debug;

use crate::error::ExecError;

/// Opaque receipt for one applied block. Holds everything needed to undo
/// the block's state effects, plus a sequence number enforcing LIFO undo.
#[derive(Debug)]
pub struct CommitHandle {
    sequence: u64,
    block_number: u64,
    undo_log: Vec<PriorValue>,
}

impl CommitHandle {
    pub fn block_number(&self) -> u64 {
        self.block_number
    }
}

/// Pre-image of one touched ledger entry (`None` = entry did not exist)
#[derive(Debug)]
enum PriorValue {
    Balance(PublicKey, Option<u64>),
    Asset(PublicKey, String, Option<u64>),
}

/// The execution engine seam between the chain manager and the state
/// machine. Applying a block is deterministic; undoing handles in reverse
/// apply order restores the exact prior state.
pub trait ExecutionEngine: Send {
    /// Execute every transaction of the block. Either the whole block
    /// takes effect and a handle is returned, or nothing does.
    fn apply(&mut self, block: &BlockRecord) -> Result<CommitHandle, ExecError>;

    /// Undo one applied block. Handles must come back in strict LIFO
    /// order relative to `apply`.
    fn undo(&mut self, handle: CommitHandle) -> Result<(), ExecError>;

    /// Validate a transaction against current state without mutating it
    fn dry_run(&self, tx: &Transaction) -> Result<(), ExecError>;

    /// Content hash of the full state, for equality checks across
    /// rollback/replay cycles
    fn state_digest(&self) -> Hash;
}

/// Reference engine: a native-balance ledger with per-issuer asset supply.
#[derive(Debug, Clone, Default)]
pub struct LedgerEngine {
    balances: BTreeMap<PublicKey, u64>,
    assets: BTreeMap<(PublicKey, String), u64>,
    next_sequence: u64,
}

impl LedgerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed balances from genesis, before any block is applied
    pub fn init_balances(&mut self, initial: &[(PublicKey, u64)]) {
        for (account, balance) in initial {
            self.balances.insert(*account, *balance);
        }
    }

    pub fn balance(&self, account: &PublicKey) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn asset_supply(&self, issuer: &PublicKey, name: &str) -> Option<u64> {
        self.assets.get(&(*issuer, name.to_string())).copied()
    }

    /// Total the sender must cover. Overflow of `amount + fee` can never
    /// be satisfiable, so it is a validation failure, not a wrap.
    fn required_amount(tx: &Transaction) -> Result<u64, ExecError> {
        match &tx.contract {
            Contract::Transfer { amount, .. } => amount.checked_add(tx.fee).ok_or_else(|| {
                ExecError::ContractValidate("amount plus fee overflows".to_string())
            }),
            Contract::AssetIssue { .. } => Ok(tx.fee),
        }
    }

    fn set_balance(&mut self, account: PublicKey, value: u64, log: &mut Vec<PriorValue>) {
        let prior = self.balances.insert(account, value);
        log.push(PriorValue::Balance(account, prior));
    }

    /// Execute one transaction, appending undo entries for every write
    fn execute(&mut self, tx: &Transaction, log: &mut Vec<PriorValue>) -> Result<(), ExecError> {
        let need = Self::required_amount(tx)?;
        let have = self.balance(&tx.sender);
        if have < need {
            return Err(ExecError::InsufficientResource { have, need });
        }

        match &tx.contract {
            Contract::Transfer { to, amount } => {
                if to == &tx.sender {
                    return Err(ExecError::ContractValidate(
                        "transfer to self".to_string(),
                    ));
                }
                self.set_balance(tx.sender, have - need, log);
                let to_balance = self.balance(to);
                let credited = to_balance.checked_add(*amount).ok_or_else(|| {
                    ExecError::ContractExe("recipient balance overflow".to_string())
                })?;
                self.set_balance(*to, credited, log);
            }
            Contract::AssetIssue { name, total_supply } => {
                if name.is_empty() {
                    return Err(ExecError::ContractValidate("empty asset name".to_string()));
                }
                if *total_supply == 0 {
                    return Err(ExecError::ContractValidate("zero supply".to_string()));
                }
                let key = (tx.sender, name.clone());
                if self.assets.contains_key(&key) {
                    return Err(ExecError::ContractValidate(format!(
                        "asset {} already issued",
                        name
                    )));
                }
                self.set_balance(tx.sender, have - tx.fee, log);
                let prior = self.assets.insert(key, *total_supply);
                log.push(PriorValue::Asset(tx.sender, name.clone(), prior));
            }
        }
        Ok(())
    }

    fn revert(&mut self, log: Vec<PriorValue>) {
        for entry in log.into_iter().rev() {
            match entry {
                PriorValue::Balance(account, Some(value)) => {
                    self.balances.insert(account, value);
                }
                PriorValue::Balance(account, None) => {
                    self.balances.remove(&account);
                }
                PriorValue::Asset(issuer, name, Some(value)) => {
                    self.assets.insert((issuer, name), value);
                }
                PriorValue::Asset(issuer, name, None) => {
                    self.assets.remove(&(issuer, name));
                }
            }
        }
    }
}

impl ExecutionEngine for LedgerEngine {
    fn apply(&mut self, block: &BlockRecord) -> Result<CommitHandle, ExecError> {
        let mut log = Vec::new();
        for tx in &block.txs {
            if let Err(e) = self.execute(tx, &mut log) {
                // Partial block effects must not survive a failed apply
                self.revert(log);
                return Err(e);
            }
        }

        let handle = CommitHandle {
            sequence: self.next_sequence,
            block_number: block.number(),
            undo_log: log,
        };
        self.next_sequence += 1;
        debug!(
            number = block.number(),
            sequence = handle.sequence,
            "applied block to ledger"
        );
        Ok(handle)
    }

    fn undo(&mut self, handle: CommitHandle) -> Result<(), ExecError> {
        let expected = self.next_sequence.saturating_sub(1);
        if handle.sequence != expected {
            return Err(ExecError::UndoOrder {
                expected,
                got: handle.sequence,
            });
        }
        self.revert(handle.undo_log);
        self.next_sequence = expected;
        debug!(number = handle.block_number, "undid block on ledger");
        Ok(())
    }

    fn dry_run(&self, tx: &Transaction) -> Result<(), ExecError> {
        let mut scratch = self.clone();
        let mut log = Vec::new();
        scratch.execute(tx, &mut log)
    }

    fn state_digest(&self) -> Hash {
        // BTreeMap iteration order makes this encoding canonical
        let bytes = serialize::to_bytes(&(&self.balances, &self.assets))
            .unwrap_or_default();
        hash_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{BlockHeader, KeyPair};

    fn block_with(number: u64, txs: Vec<Transaction>) -> BlockRecord {
        let header = BlockHeader {
            number,
            parent_hash: Hash::ZERO,
            timestamp: number as i64 * 3_000,
            witness: PublicKey::default(),
            version: 1,
            tx_root: Hash::ZERO,
        };
        BlockRecord::new(header, txs)
    }

    fn transfer(from: &KeyPair, to: PublicKey, amount: u64, fee: u64) -> Transaction {
        Transaction::new_signed(
            from.public,
            0,
            Hash::ZERO,
            60_000,
            fee,
            Contract::Transfer { to, amount },
            &from.secret,
        )
        .unwrap()
    }

    #[test]
    fn test_transfer_moves_balance_and_burns_fee() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut engine = LedgerEngine::new();
        engine.init_balances(&[(alice.public, 1_000)]);

        let block = block_with(1, vec![transfer(&alice, bob.public, 400, 10)]);
        engine.apply(&block).unwrap();

        assert_eq!(engine.balance(&alice.public), 590);
        assert_eq!(engine.balance(&bob.public), 400);
    }

    #[test]
    fn test_insufficient_balance_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut engine = LedgerEngine::new();
        engine.init_balances(&[(alice.public, 100)]);

        let block = block_with(1, vec![transfer(&alice, bob.public, 400, 10)]);
        assert!(matches!(
            engine.apply(&block),
            Err(ExecError::InsufficientResource { .. })
        ));
        assert_eq!(engine.balance(&alice.public), 100);
    }

    #[test]
    fn test_failed_block_leaves_no_partial_effects() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut engine = LedgerEngine::new();
        engine.init_balances(&[(alice.public, 500)]);
        let digest = engine.state_digest();

        // First transfer fits, second cannot be covered
        let block = block_with(
            1,
            vec![
                transfer(&alice, bob.public, 300, 0),
                transfer(&alice, bob.public, 300, 0),
            ],
        );
        assert!(engine.apply(&block).is_err());
        assert_eq!(engine.state_digest(), digest);
    }

    #[test]
    fn test_amount_plus_fee_overflow_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut engine = LedgerEngine::new();
        engine.init_balances(&[(alice.public, u64::MAX)]);

        // amount + fee wraps past u64::MAX; must fail cleanly, not wrap
        let block = block_with(1, vec![transfer(&alice, bob.public, u64::MAX - 5, 10)]);
        assert!(matches!(
            engine.apply(&block),
            Err(ExecError::ContractValidate(_))
        ));
        assert_eq!(engine.balance(&alice.public), u64::MAX);
        assert_eq!(engine.balance(&bob.public), 0);
    }

    #[test]
    fn test_undo_restores_prior_state() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut engine = LedgerEngine::new();
        engine.init_balances(&[(alice.public, 1_000)]);
        let before = engine.state_digest();

        let block = block_with(1, vec![transfer(&alice, bob.public, 250, 5)]);
        let handle = engine.apply(&block).unwrap();
        assert_ne!(engine.state_digest(), before);

        engine.undo(handle).unwrap();
        assert_eq!(engine.state_digest(), before);
        assert_eq!(engine.balance(&bob.public), 0);
    }

    #[test]
    fn test_undo_out_of_order_is_fatal() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut engine = LedgerEngine::new();
        engine.init_balances(&[(alice.public, 1_000)]);

        let h1 = engine
            .apply(&block_with(1, vec![transfer(&alice, bob.public, 10, 0)]))
            .unwrap();
        let _h2 = engine
            .apply(&block_with(2, vec![transfer(&alice, bob.public, 10, 0)]))
            .unwrap();

        assert!(matches!(
            engine.undo(h1),
            Err(ExecError::UndoOrder { .. })
        ));
    }

    #[test]
    fn test_rollback_replay_is_idempotent() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut engine = LedgerEngine::new();
        engine.init_balances(&[(alice.public, 1_000)]);

        let b1 = block_with(1, vec![transfer(&alice, bob.public, 100, 1)]);
        let b2 = block_with(2, vec![transfer(&alice, bob.public, 200, 1)]);

        let h1 = engine.apply(&b1).unwrap();
        let h2 = engine.apply(&b2).unwrap();
        let applied = engine.state_digest();

        engine.undo(h2).unwrap();
        engine.undo(h1).unwrap();
        engine.apply(&b1).unwrap();
        engine.apply(&b2).unwrap();

        assert_eq!(engine.state_digest(), applied);
    }

    #[test]
    fn test_asset_issue() {
        let issuer = KeyPair::generate();
        let mut engine = LedgerEngine::new();
        engine.init_balances(&[(issuer.public, 100)]);

        let tx = Transaction::new_signed(
            issuer.public,
            0,
            Hash::ZERO,
            60_000,
            10,
            Contract::AssetIssue {
                name: "GEM".to_string(),
                total_supply: 5_000,
            },
            &issuer.secret,
        )
        .unwrap();

        engine.apply(&block_with(1, vec![tx.clone()])).unwrap();
        assert_eq!(engine.asset_supply(&issuer.public, "GEM"), Some(5_000));

        // Re-issuing the same asset is a validation failure
        assert!(matches!(
            engine.apply(&block_with(2, vec![tx])),
            Err(ExecError::ContractValidate(_))
        ));
    }
}
