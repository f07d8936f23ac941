//! Insertion-ordered set of pending validator records

use crate::error::{KeeperError, KeeperResult};

use ethers::types::{Bytes, H256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Deposit data root identifying a validator deposit
pub type DepositId = H256;

/// Validator public key and deposit signature awaiting activation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub pubkey: Bytes,
    pub signature: Bytes,
}

/// A registry entry together with its queue position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub seq: u64,
    pub id: DepositId,
    pub record: ValidatorRecord,
}

/// Registry of validators waiting to be deposited.
///
/// `validators` and `order` always hold the same key set. Sequence numbers
/// only grow, so removing an entry never moves the others and `next` is
/// strict FIFO.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    /// Records indexed by deposit id, with their sequence number
    validators: HashMap<DepositId, (u64, ValidatorRecord)>,
    /// Queue order: sequence number -> deposit id
    order: BTreeMap<u64, DepositId>,
    /// Sequence number for the next insertion
    next_seq: u64,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted entries
    pub fn from_entries(entries: Vec<RegistryEntry>) -> KeeperResult<Self> {
        let mut registry = Self::new();
        for entry in entries {
            if registry.validators.contains_key(&entry.id) {
                return Err(KeeperError::ValidatorAlreadyExists(entry.id));
            }
            if registry.order.contains_key(&entry.seq) {
                return Err(KeeperError::Internal(format!(
                    "duplicate registry sequence {}",
                    entry.seq
                )));
            }
            registry.next_seq = registry.next_seq.max(entry.seq + 1);
            registry.insert_at(entry);
        }
        Ok(registry)
    }

    /// Add a single validator
    pub fn add_validator(
        &mut self,
        id: DepositId,
        pubkey: Bytes,
        signature: Bytes,
    ) -> KeeperResult<()> {
        if self.contains(&id) {
            return Err(KeeperError::ValidatorAlreadyExists(id));
        }
        self.push(id, ValidatorRecord { pubkey, signature });
        Ok(())
    }

    /// Add a batch of validators. Nothing is inserted unless every id is new.
    pub fn add_validators(
        &mut self,
        ids: Vec<DepositId>,
        pubkeys: Vec<Bytes>,
        signatures: Vec<Bytes>,
    ) -> KeeperResult<()> {
        if ids.len() != pubkeys.len() || ids.len() != signatures.len() {
            return Err(KeeperError::LengthMismatch {
                ids: ids.len(),
                pubkeys: pubkeys.len(),
                signatures: signatures.len(),
            });
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if self.validators.contains_key(id) || !seen.insert(*id) {
                return Err(KeeperError::ValidatorAlreadyExists(*id));
            }
        }

        for ((id, pubkey), signature) in ids.into_iter().zip(pubkeys).zip(signatures) {
            self.push(id, ValidatorRecord { pubkey, signature });
        }
        Ok(())
    }

    /// Remove a single validator
    pub fn remove_validator(&mut self, id: &DepositId) -> KeeperResult<ValidatorRecord> {
        let (seq, record) = self
            .validators
            .remove(id)
            .ok_or(KeeperError::ValidatorDoesNotExist(*id))?;
        self.order.remove(&seq);
        Ok(record)
    }

    /// Remove a batch of validators. Nothing is removed unless every id exists.
    pub fn remove_validators(&mut self, ids: &[DepositId]) -> KeeperResult<()> {
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !self.validators.contains_key(id) || !seen.insert(*id) {
                return Err(KeeperError::ValidatorDoesNotExist(*id));
            }
        }

        for id in ids {
            self.remove_validator(id)?;
        }
        Ok(())
    }

    /// Take the oldest validator off the queue
    pub(crate) fn next(&mut self) -> KeeperResult<RegistryEntry> {
        let (seq, id) = self.order.pop_first().ok_or(KeeperError::EmptyRegistry)?;
        let (_, record) = self
            .validators
            .remove(&id)
            .ok_or_else(|| KeeperError::Internal(format!("registry out of sync at {:?}", id)))?;
        Ok(RegistryEntry { seq, id, record })
    }

    /// Record for `id`, or the zero record when absent
    pub fn get_validator(&self, id: &DepositId) -> ValidatorRecord {
        self.validators
            .get(id)
            .map(|(_, record)| record.clone())
            .unwrap_or_default()
    }

    /// All ids and records in queue order
    pub fn get_validators(&self) -> (Vec<DepositId>, Vec<ValidatorRecord>) {
        self.order
            .values()
            .map(|id| (*id, self.get_validator(id)))
            .unzip()
    }

    /// All entries in queue order, for persistence
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.order
            .iter()
            .filter_map(|(seq, id)| {
                self.validators.get(id).map(|(_, record)| RegistryEntry {
                    seq: *seq,
                    id: *id,
                    record: record.clone(),
                })
            })
            .collect()
    }

    pub fn contains(&self, id: &DepositId) -> bool {
        self.validators.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn push(&mut self, id: DepositId, record: ValidatorRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert_at(RegistryEntry { seq, id, record });
    }

    fn insert_at(&mut self, entry: RegistryEntry) {
        self.order.insert(entry.seq, entry.id);
        self.validators.insert(entry.id, (entry.seq, entry.record));
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.validators.len(), self.order.len());
        for (seq, id) in &self.order {
            let (stored_seq, _) = self.validators.get(id).expect("ordered id missing from map");
            assert_eq!(stored_seq, seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> DepositId {
        H256::from_low_u64_be(n)
    }

    fn pubkey(n: u8) -> Bytes {
        Bytes::from(vec![n; 48])
    }

    fn signature(n: u8) -> Bytes {
        Bytes::from(vec![n; 96])
    }

    fn registry_with(ids: &[u64]) -> ValidatorRegistry {
        let mut registry = ValidatorRegistry::new();
        for n in ids {
            registry
                .add_validator(id(*n), pubkey(*n as u8), signature(*n as u8))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_add_and_get_validator() {
        let registry = registry_with(&[1]);
        let record = registry.get_validator(&id(1));
        assert_eq!(record.pubkey, pubkey(1));
        assert_eq!(record.signature, signature(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_add_fails_and_keeps_length() {
        let mut registry = registry_with(&[1]);
        let err = registry
            .add_validator(id(1), pubkey(9), signature(9))
            .unwrap_err();
        assert!(matches!(err, KeeperError::ValidatorAlreadyExists(d) if d == id(1)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_validator(&id(1)).pubkey, pubkey(1));
    }

    #[test]
    fn test_missing_validator_reads_as_zero_record() {
        let registry = registry_with(&[1]);
        assert_eq!(registry.get_validator(&id(2)), ValidatorRecord::default());
    }

    #[test]
    fn test_bulk_add_is_all_or_nothing() {
        let mut registry = registry_with(&[2]);
        let err = registry
            .add_validators(
                vec![id(1), id(2), id(3)],
                vec![pubkey(1), pubkey(2), pubkey(3)],
                vec![signature(1), signature(2), signature(3)],
            )
            .unwrap_err();
        assert!(matches!(err, KeeperError::ValidatorAlreadyExists(d) if d == id(2)));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&id(1)));
        assert!(!registry.contains(&id(3)));
    }

    #[test]
    fn test_bulk_add_rejects_duplicates_within_batch() {
        let mut registry = ValidatorRegistry::new();
        let err = registry
            .add_validators(
                vec![id(1), id(1)],
                vec![pubkey(1), pubkey(1)],
                vec![signature(1), signature(1)],
            )
            .unwrap_err();
        assert!(matches!(err, KeeperError::ValidatorAlreadyExists(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bulk_add_rejects_length_mismatch() {
        let mut registry = ValidatorRegistry::new();
        let err = registry
            .add_validators(vec![id(1), id(2)], vec![pubkey(1)], vec![signature(1), signature(2)])
            .unwrap_err();
        assert!(matches!(
            err,
            KeeperError::LengthMismatch {
                ids: 2,
                pubkeys: 1,
                signatures: 2
            }
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_missing_fails() {
        let mut registry = registry_with(&[1]);
        let err = registry.remove_validator(&id(2)).unwrap_err();
        assert!(matches!(err, KeeperError::ValidatorDoesNotExist(d) if d == id(2)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_bulk_remove_is_all_or_nothing() {
        let mut registry = registry_with(&[1, 2, 3]);
        let err = registry.remove_validators(&[id(1), id(4)]).unwrap_err();
        assert!(matches!(err, KeeperError::ValidatorDoesNotExist(d) if d == id(4)));
        assert_eq!(registry.len(), 3);

        let err = registry.remove_validators(&[id(1), id(1)]).unwrap_err();
        assert!(matches!(err, KeeperError::ValidatorDoesNotExist(_)));
        assert_eq!(registry.len(), 3);

        registry.remove_validators(&[id(1), id(3)]).unwrap();
        assert_eq!(registry.get_validators().0, vec![id(2)]);
    }

    #[test]
    fn test_next_on_empty_registry() {
        let mut registry = ValidatorRegistry::new();
        assert!(matches!(registry.next(), Err(KeeperError::EmptyRegistry)));
    }

    #[test]
    fn test_next_is_fifo_across_removals() {
        let mut registry = registry_with(&[1, 2, 3, 4]);
        registry.remove_validator(&id(2)).unwrap();
        registry.add_validator(id(5), pubkey(5), signature(5)).unwrap();

        let taken: Vec<_> = (0..4).map(|_| registry.next().unwrap().id).collect();
        assert_eq!(taken, vec![id(1), id(3), id(4), id(5)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_validators_returns_parallel_arrays() {
        let registry = registry_with(&[7, 3, 5]);
        let (ids, records) = registry.get_validators();
        assert_eq!(ids, vec![id(7), id(3), id(5)]);
        assert_eq!(records[1].pubkey, pubkey(3));
    }

    #[test]
    fn test_entries_round_trip() {
        let mut registry = registry_with(&[1, 2, 3]);
        registry.remove_validator(&id(1)).unwrap();
        let restored = ValidatorRegistry::from_entries(registry.entries()).unwrap();
        assert_eq!(restored.get_validators(), registry.get_validators());

        // Later insertions still queue behind restored ones
        let mut restored = restored;
        restored.add_validator(id(4), pubkey(4), signature(4)).unwrap();
        assert_eq!(restored.next().unwrap().id, id(2));
    }

    #[test]
    fn test_key_sets_stay_in_bijection() {
        let mut registry = ValidatorRegistry::new();
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut expected_len = 0usize;

        for _ in 0..2_000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let key = id((state >> 33) % 32);
            match (state >> 20) % 4 {
                0 | 1 => {
                    if registry.add_validator(key, pubkey(1), signature(1)).is_ok() {
                        expected_len += 1;
                    }
                }
                2 => {
                    if registry.remove_validator(&key).is_ok() {
                        expected_len -= 1;
                    }
                }
                _ => {
                    let before = registry.len();
                    match registry.next() {
                        Ok(entry) => {
                            assert_eq!(registry.len(), before - 1);
                            assert!(!registry.contains(&entry.id));
                            expected_len -= 1;
                        }
                        Err(err) => {
                            assert!(matches!(err, KeeperError::EmptyRegistry));
                            assert_eq!(before, 0);
                        }
                    }
                }
            }
            assert_eq!(registry.len(), expected_len);
            registry.assert_consistent();
        }
    }
}
