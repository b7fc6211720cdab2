//! Bidirectional mapping between string identifiers and dense graph labels.
//!
//! Labels are allocated from a monotonically increasing counter and are never
//! reused. Deleting or superseding an identifier tombstones its slot: the
//! forward entry stays (as an empty marker) so that label order and the
//! fixed-stride vector file layout are preserved, while the reverse entry is
//! removed. No operation ever shrinks the slot sequence.

use std::collections::HashMap;

use tessera_core::tracing_config::targets;
use tessera_core::{IndexError, IndexResult};

/// Dense, zero-based label addressing one vector slot in the ANN graph.
pub type Label = u64;

/// Forward (`label -> identifier`) and reverse (`identifier -> label`) maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierRegistry {
    /// Indexed by label; an empty string marks a tombstoned slot.
    slots: Vec<String>,
    /// Live identifiers only.
    labels: HashMap<String, Label>,
}

impl IdentifierRegistry {
    /// Empty registry; the first assigned label is `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `slot_count` tombstoned slots, ready to be filled by
    /// [`restore_slot`](Self::restore_slot) while loading a mapping file.
    #[must_use]
    pub fn with_tombstoned_slots(slot_count: usize) -> Self {
        Self {
            slots: vec![String::new(); slot_count],
            labels: HashMap::new(),
        }
    }

    /// Allocate the next label for an identifier that has no live label.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::InvalidArgument` if the identifier is empty or
    /// already live (callers tombstone the old label first).
    pub fn assign_label(&mut self, identifier: &str) -> IndexResult<Label> {
        if identifier.is_empty() {
            return Err(IndexError::invalid_argument(
                "identifier",
                "",
                "identifier must be non-empty",
            ));
        }
        if let Some(existing) = self.labels.get(identifier) {
            return Err(IndexError::invalid_argument(
                "identifier",
                identifier,
                format!("identifier is already live at label {existing}; tombstone it first"),
            ));
        }

        let label = self.next_label();
        self.slots.push(identifier.to_owned());
        self.labels.insert(identifier.to_owned(), label);
        Ok(label)
    }

    /// Append a tombstoned slot, consuming the next label without an identifier.
    pub fn retire_next_label(&mut self) -> Label {
        let label = self.next_label();
        self.slots.push(String::new());
        label
    }

    /// Tombstone a slot. Returns `true` when the slot was live.
    ///
    /// Out-of-range and already tombstoned labels are left untouched.
    pub fn tombstone(&mut self, label: Label) -> bool {
        let Some(slot) = usize::try_from(label)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
        else {
            return false;
        };
        if slot.is_empty() {
            return false;
        }
        let identifier = std::mem::take(slot);
        if self.labels.get(&identifier) == Some(&label) {
            self.labels.remove(&identifier);
        }
        true
    }

    /// Current live label of an identifier.
    #[must_use]
    pub fn lookup_label(&self, identifier: &str) -> Option<Label> {
        self.labels.get(identifier).copied()
    }

    /// Whether the slot at `label` holds a live identifier.
    #[must_use]
    pub fn is_live(&self, label: Label) -> bool {
        self.identifier(label).is_some()
    }

    /// Identifier stored at a live slot.
    #[must_use]
    pub fn identifier(&self, label: Label) -> Option<&str> {
        usize::try_from(label)
            .ok()
            .and_then(|index| self.slots.get(index))
            .filter(|identifier| !identifier.is_empty())
            .map(String::as_str)
    }

    /// Number of live identifiers.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.labels.len()
    }

    /// Number of slots ever allocated, tombstones included.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Label the next assignment will receive (equal to [`slot_count`](Self::slot_count)).
    #[must_use]
    pub fn next_label(&self) -> Label {
        self.slots.len() as Label
    }

    /// Slots in ascending label order; `None` marks a tombstone.
    pub fn slots(&self) -> impl Iterator<Item = (Label, Option<&str>)> + '_ {
        self.slots.iter().enumerate().map(|(index, identifier)| {
            let identifier = (!identifier.is_empty()).then_some(identifier.as_str());
            (index as Label, identifier)
        })
    }

    /// Live `(label, identifier)` pairs in ascending label order.
    pub fn live(&self) -> impl Iterator<Item = (Label, &str)> + '_ {
        self.slots()
            .filter_map(|(label, identifier)| identifier.map(|id| (label, id)))
    }

    /// Fill one slot while replaying a mapping file.
    ///
    /// Returns `false` (and changes nothing) for a label beyond the declared
    /// slot count. An empty identifier leaves the slot tombstoned. If the same
    /// identifier is restored twice, the later label wins and the earlier slot
    /// is tombstoned so that at most one live label exists per identifier.
    pub fn restore_slot(&mut self, label: Label, identifier: String) -> bool {
        let Some(index) = usize::try_from(label)
            .ok()
            .filter(|&index| index < self.slots.len())
        else {
            return false;
        };
        if identifier.is_empty() {
            return true;
        }
        if let Some(previous) = self.labels.insert(identifier.clone(), label)
            && previous != label
        {
            tracing::warn!(
                target: targets::PERSIST,
                identifier = %identifier,
                previous,
                label,
                "identifier restored at two labels; keeping the later one"
            );
            if let Ok(previous_index) = usize::try_from(previous)
                && let Some(slot) = self.slots.get_mut(previous_index)
            {
                slot.clear();
            }
        }
        self.slots[index] = identifier;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn labels_start_at_zero_and_increase() {
        let mut registry = IdentifierRegistry::new();
        assert_eq!(registry.assign_label("a").expect("a"), 0);
        assert_eq!(registry.assign_label("b").expect("b"), 1);
        assert_eq!(registry.assign_label("c").expect("c"), 2);
        assert_eq!(registry.slot_count(), 3);
        assert_eq!(registry.live_count(), 3);
        assert_eq!(registry.next_label(), 3);
    }

    #[test]
    fn tombstone_keeps_slot_and_drops_reverse_entry() {
        let mut registry = IdentifierRegistry::new();
        let label = registry.assign_label("doc-a").expect("assign");
        assert!(registry.tombstone(label));
        assert!(!registry.tombstone(label), "second tombstone is a no-op");

        assert_eq!(registry.lookup_label("doc-a"), None);
        assert!(!registry.is_live(label));
        assert_eq!(registry.identifier(label), None);
        assert_eq!(registry.slot_count(), 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn retired_label_is_never_reassigned() {
        let mut registry = IdentifierRegistry::new();
        registry.assign_label("a").expect("a");
        assert_eq!(registry.retire_next_label(), 1);
        assert_eq!(registry.assign_label("b").expect("b"), 2);
        assert!(!registry.is_live(1));
        assert_eq!(registry.slot_count(), 3);
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn deleted_identifier_gets_a_fresh_label() {
        let mut registry = IdentifierRegistry::new();
        let first = registry.assign_label("doc").expect("first");
        registry.tombstone(first);
        let second = registry.assign_label("doc").expect("second");
        assert!(second > first);
        assert_eq!(registry.lookup_label("doc"), Some(second));
        assert_eq!(
            registry.slots().collect::<Vec<_>>(),
            vec![(0, None), (1, Some("doc"))]
        );
    }

    #[test]
    fn assign_rejects_empty_and_live_identifiers() {
        let mut registry = IdentifierRegistry::new();
        registry.assign_label("doc").expect("assign");
        assert!(registry.assign_label("").is_err());
        assert!(registry.assign_label("doc").is_err());
        assert_eq!(registry.slot_count(), 1, "failed assigns allocate nothing");
    }

    #[test]
    fn tombstone_out_of_range_is_ignored() {
        let mut registry = IdentifierRegistry::new();
        assert!(!registry.tombstone(42));
        assert!(!registry.is_live(u64::MAX));
    }

    #[test]
    fn restore_ignores_labels_beyond_slot_count() {
        let mut registry = IdentifierRegistry::with_tombstoned_slots(2);
        assert!(registry.restore_slot(1, "b".into()));
        assert!(!registry.restore_slot(2, "overflow".into()));
        assert!(registry.restore_slot(0, String::new()));

        assert_eq!(registry.slot_count(), 2);
        assert_eq!(registry.live().collect::<Vec<_>>(), vec![(1, "b")]);
        assert_eq!(registry.lookup_label("overflow"), None);
    }

    #[test]
    fn restore_duplicate_identifier_keeps_later_label() {
        let mut registry = IdentifierRegistry::with_tombstoned_slots(3);
        registry.restore_slot(0, "dup".into());
        registry.restore_slot(2, "dup".into());
        assert_eq!(registry.lookup_label("dup"), Some(2));
        assert!(!registry.is_live(0));
        assert_eq!(registry.live_count(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Upsert(u8),
        Delete(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0_u8..8).prop_map(Op::Upsert),
            (0_u8..8).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn labels_are_monotonic_and_never_reused(ops in proptest::collection::vec(op_strategy(), 0..128)) {
            let mut registry = IdentifierRegistry::new();
            let mut issued: Vec<Label> = Vec::new();

            for op in ops {
                match op {
                    Op::Upsert(id) => {
                        let identifier = format!("id-{id}");
                        if let Some(old) = registry.lookup_label(&identifier) {
                            prop_assert!(registry.tombstone(old));
                        }
                        let label = registry.assign_label(&identifier).expect("assign");
                        prop_assert!(issued.iter().all(|&previous| previous < label));
                        issued.push(label);
                    }
                    Op::Delete(id) => {
                        if let Some(label) = registry.lookup_label(&format!("id-{id}")) {
                            prop_assert!(registry.tombstone(label));
                        }
                    }
                }
                prop_assert_eq!(registry.slot_count(), issued.len());
                prop_assert_eq!(registry.live().count(), registry.live_count());
                for (label, identifier) in registry.live() {
                    prop_assert_eq!(registry.lookup_label(identifier), Some(label));
                }
            }
        }
    }
}
