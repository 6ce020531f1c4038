//! Pending pool: admitted books waiting for a cover.
//!
//! Every admitted book gets a sequence number in arrival order. Illustration
//! results may settle in any order, but [`PendingPool::drain_settled`] only
//! releases the contiguous run starting at the oldest unsettled sequence, so
//! the ready queue sees books in arrival order.

use std::collections::{BTreeMap, HashSet};

use super::item::{Book, IllustratedBook};

/// Position of a book in arrival order
pub type Sequence = u64;

/// Outcome of illustrating one pending book
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Illustrated(IllustratedBook),
    Dropped(Book),
}

impl Settled {
    pub fn title(&self) -> &str {
        match self {
            Settled::Illustrated(ready) => ready.title(),
            Settled::Dropped(book) => &book.title,
        }
    }
}

#[derive(Debug)]
enum Slot {
    Awaiting(Book),
    Settled(Settled),
}

#[derive(Debug, Default)]
pub struct PendingPool {
    next_sequence: Sequence,
    next_flush: Sequence,
    slots: BTreeMap<Sequence, Slot>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a book and return its sequence number
    pub fn admit(&mut self, book: Book) -> Sequence {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.slots.insert(sequence, Slot::Awaiting(book));
        sequence
    }

    /// Record the outcome for an admitted book.
    ///
    /// Returns false if the sequence is unknown or already settled.
    pub fn settle(&mut self, sequence: Sequence, outcome: Settled) -> bool {
        match self.slots.get_mut(&sequence) {
            Some(slot @ Slot::Awaiting(_)) => {
                *slot = Slot::Settled(outcome);
                true
            }
            _ => false,
        }
    }

    /// Remove and return settled books that no earlier book is still waiting on
    pub fn drain_settled(&mut self) -> Vec<Settled> {
        let mut released = Vec::new();
        while let Some(entry) = self.slots.first_entry() {
            if *entry.key() != self.next_flush || matches!(entry.get(), Slot::Awaiting(_)) {
                break;
            }
            if let Slot::Settled(outcome) = entry.remove() {
                released.push(outcome);
            }
            self.next_flush += 1;
        }
        released
    }

    /// Books admitted but not yet released, awaiting or buffered
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn titles(&self) -> HashSet<String> {
        self.slots
            .values()
            .map(|slot| match slot {
                Slot::Awaiting(book) => book.title.clone(),
                Slot::Settled(outcome) => outcome.title().to_string(),
            })
            .collect()
    }

    /// Forget everything admitted so far. Later sequences keep counting up so
    /// stale results can never match a new slot.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.next_flush = self.next_sequence;
    }
}
