use ore_common::Address;
use ore_storage::{MemoryLedger, Result, SlabElement, SlabId, SlabStorage, StorageError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Item {
    Int(i64),
    Child(SlabId),
}

impl SlabElement for Item {
    type Encoded = Item;
    type TypeInfo = String;

    fn encode(&self) -> Result<Item> {
        Ok(self.clone())
    }

    fn decode(encoded: Item) -> Self {
        encoded
    }

    fn child_slab(&self) -> Option<SlabId> {
        match self {
            Item::Child(id) => Some(*id),
            Item::Int(_) => None,
        }
    }

    fn with_child_slab(&self, child: SlabId) -> Self {
        match self {
            Item::Child(_) => Item::Child(child),
            other => other.clone(),
        }
    }

    fn same_key(&self, other: &Self) -> bool {
        self == other
    }
}

#[derive(Debug, Clone)]
enum Op {
    Insert(usize, i64),
    Set(usize, i64),
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), any::<i64>()).prop_map(|(i, v)| Op::Insert(i, v)),
        (any::<usize>(), any::<i64>()).prop_map(|(i, v)| Op::Set(i, v)),
        any::<usize>().prop_map(Op::Remove),
    ]
}

fn account() -> Address {
    Address::from_u64(0x42)
}

proptest! {
    #[test]
    fn paged_array_matches_vec(ops in proptest::collection::vec(op(), 1..120), capacity in 2usize..6) {
        let ledger = MemoryLedger::new();
        let mut storage: SlabStorage<Item> = SlabStorage::new(&ledger, capacity);
        let array = storage.create_array(account(), "[Int]".into(), Vec::new()).unwrap();
        storage.domain_set(account(), "storage", "items", Item::Child(array)).unwrap();
        let mut model: Vec<Item> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Insert(i, v) => {
                    let index = i % (model.len() + 1);
                    storage.array_insert(array, index, Item::Int(v)).unwrap();
                    model.insert(index, Item::Int(v));
                }
                Op::Set(i, v) if !model.is_empty() => {
                    let index = i % model.len();
                    let old = storage.array_set(array, index, Item::Int(v)).unwrap();
                    prop_assert_eq!(old, std::mem::replace(&mut model[index], Item::Int(v)));
                }
                Op::Remove(i) if !model.is_empty() => {
                    let index = i % model.len();
                    prop_assert_eq!(storage.array_remove(array, index).unwrap(), model.remove(index));
                }
                _ => {}
            }
            if step % 17 == 0 {
                storage.commit().unwrap();
                storage.validate(&["storage"]).unwrap();
            }
        }

        prop_assert_eq!(storage.array_len(array).unwrap(), model.len());
        storage.commit().unwrap();
        storage.validate(&["storage"]).unwrap();

        let mut reloaded: SlabStorage<Item> = SlabStorage::new(&ledger, capacity);
        prop_assert_eq!(reloaded.array_items(array).unwrap(), model);
    }
}

#[test_log::test]
fn orphaned_slab_fails_validation() {
    let ledger = MemoryLedger::new();
    let mut storage: SlabStorage<Item> = SlabStorage::new(&ledger, 4);
    storage.domain_set(account(), "storage", "n", Item::Int(1)).unwrap();
    storage
        .create_array(account(), "[Int]".into(), vec![Item::Int(2)])
        .unwrap();
    storage.commit().unwrap();
    assert!(matches!(
        storage.validate(&["storage"]),
        Err(StorageError::Validation(_))
    ));
}

#[test_log::test]
fn removed_subtree_is_deleted_from_ledger() {
    let ledger = MemoryLedger::new();
    let mut storage: SlabStorage<Item> = SlabStorage::new(&ledger, 2);
    let inner = storage
        .create_array(account(), "[Int]".into(), (0..5).map(Item::Int).collect())
        .unwrap();
    let outer = storage
        .create_composite(account(), "R".into(), vec![("inner".into(), Item::Child(inner))])
        .unwrap();
    storage.domain_set(account(), "storage", "r", Item::Child(outer)).unwrap();
    storage.commit().unwrap();
    let populated = ledger.len();

    let removed = storage.domain_remove(account(), "storage", "r").unwrap();
    assert_eq!(removed, Some(Item::Child(outer)));
    storage.deep_remove(outer).unwrap();
    let summary = storage.commit().unwrap();
    // composite, array root and three pages
    assert_eq!(summary.slabs_removed, 5);
    assert_eq!(ledger.len(), populated - 5);
    let report = storage.validate(&["storage"]).unwrap();
    assert_eq!(report.slabs, 1);
}

#[test]
fn cross_account_reference_fails_validation() {
    let ledger = MemoryLedger::new();
    let mut storage: SlabStorage<Item> = SlabStorage::new(&ledger, 4);
    let foreign = storage
        .create_array(Address::from_u64(7), "[Int]".into(), Vec::new())
        .unwrap();
    storage
        .domain_set(account(), "storage", "x", Item::Child(foreign))
        .unwrap();
    storage.domain_set(Address::from_u64(7), "storage", "y", Item::Int(0)).unwrap();
    storage.commit().unwrap();
    assert!(storage.validate(&["storage"]).is_err());
}
