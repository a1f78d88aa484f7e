use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use proptest_derive::Arbitrary;

use crate::{Slot, SlotSet};

/// Reference implementation: the value set plus the slot bookkeeping the
/// real structure promises — stable handles while live, LIFO reuse after
/// erase.
#[derive(Default)]
struct Model {
    values: BTreeSet<i32>,
    slots: HashMap<i32, Slot>,
    freed: Vec<Slot>,
}

/// Actions to exercise against both implementations.
#[derive(Arbitrary, Debug, Clone)]
enum Action {
    Insert(Value),
    Erase(Value),
    /// Erase through a live slot handle, picked by index.
    EraseAtNth(u8),
    Find(Value),
    FindSlot(Value),
}

/// Wrapper so value generation can be biased toward collisions.
#[derive(Debug, Clone)]
struct Value(i32);

impl Arbitrary for Value {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            // Mostly a small universe, so erases hit and duplicates occur.
            4 => (0..24i32).prop_map(Value),
            1 => any::<i32>().prop_map(Value),
        ]
        .boxed()
    }
}

/// Test harness executing actions on both the set and the model.
#[derive(Default)]
struct Test {
    set: SlotSet<i32>,
    model: Model,
}

impl Test {
    fn execute(&mut self, action: Action) {
        match action {
            Action::Insert(Value(v)) => {
                let (slot, added) = self.set.insert(v).expect("insert failed");
                let model_added = self.model.values.insert(v);
                assert_eq!(
                    added, model_added,
                    "insert mismatch: v={v}, added={added}, model_added={model_added}"
                );
                if added {
                    // Recycling is LIFO: the most recently freed slot
                    // comes back first.
                    if let Some(expected) = self.model.freed.pop() {
                        assert_eq!(slot, expected, "slot reuse not LIFO: v={v}");
                    }
                    self.model.slots.insert(v, slot);
                } else {
                    assert_eq!(
                        self.model.slots[&v], slot,
                        "duplicate insert moved the slot of {v}"
                    );
                }
            }
            Action::Erase(Value(v)) => {
                let erased = self.set.erase(&v);
                let model_erased = self.model.values.remove(&v);
                assert_eq!(erased, model_erased, "erase mismatch: v={v}");
                if erased {
                    let slot = self.model.slots.remove(&v).expect("model slot missing");
                    self.model.freed.push(slot);
                }
            }
            Action::EraseAtNth(idx) => {
                let mut live: Vec<(Slot, i32)> =
                    self.model.slots.iter().map(|(&v, &s)| (s, v)).collect();
                if live.is_empty() {
                    assert!(!self.set.erase_at(1 + idx as Slot));
                    return;
                }
                live.sort_unstable();
                let (slot, v) = live[idx as usize % live.len()];
                assert!(self.set.erase_at(slot), "live slot {slot} refused erase");
                assert!(self.model.values.remove(&v));
                self.model.slots.remove(&v);
                self.model.freed.push(slot);
            }
            Action::Find(Value(v)) => {
                let found = self.set.find(&v);
                if self.model.values.contains(&v) {
                    assert_eq!(found.clone().next(), Some(&v));
                } else {
                    assert!(found.is_end());
                }
                assert_eq!(self.set.contains(&v), self.model.values.contains(&v));
            }
            Action::FindSlot(Value(v)) => {
                let slot = self.set.find_slot(&v);
                let expected = self.model.slots.get(&v).copied().unwrap_or(0);
                assert_eq!(slot, expected, "find_slot mismatch: v={v}");
            }
        }

        assert_eq!(self.set.len(), self.model.values.len());
        assert_eq!(self.set.is_empty(), self.model.values.is_empty());
        self.set.debug_validate();
    }

    fn check_round_trip(&self) {
        let got: Vec<i32> = self.set.iter().copied().collect();
        let expected: Vec<i32> = self.model.values.iter().copied().collect();
        assert_eq!(got, expected, "in-order iteration diverged from model");

        // Every live handle still resolves to its element.
        for (&v, &slot) in &self.model.slots {
            assert_eq!(self.set.at(slot), &v, "slot {slot} drifted off {v}");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn proptest_vs_btreeset(actions in prop::collection::vec(any::<Action>(), 1..96)) {
        let mut test = Test::default();
        for action in actions {
            test.execute(action);
        }
        test.check_round_trip();
    }
}
