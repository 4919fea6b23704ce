//! Rolling n-gram history used as the universal scoring and cache key.
//!
//! A history keeps the last `N` recognized labels, most recent first. Slots
//! that were never filled hold [`SENTENCE_BOUNDARY`], so a fresh history
//! reads as "start of sentence" at every position.

use std::ops::Index;

use crate::{CLASS_TAG, Label, SENTENCE_BOUNDARY};

static BOUNDARY: Label = SENTENCE_BOUNDARY;

/// Fixed-capacity window of recent labels, most recent first.
///
/// Ordering, equality and hashing cover every slot, so two histories that
/// differ anywhere in the window never share a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct History<const N: usize> {
    words: [Label; N],
}

/// Default width, enough context for 5-gram models.
pub type RescoringHistory = History<4>;
/// Wide history for 9-gram contexts.
pub type LongRescoringHistory = History<8>;

impl<const N: usize> Default for History<N> {
    fn default() -> Self {
        Self {
            words: [SENTENCE_BOUNDARY; N],
        }
    }
}

impl<const N: usize> History<N> {
    /// History holding a single label.
    pub fn new(label: Label) -> Self {
        let mut history = Self::default();
        if N > 0 {
            history.words[0] = label;
        }
        history
    }

    /// Build from labels given most recent first; extra labels are dropped.
    pub fn from_slice(labels: &[Label]) -> Self {
        let mut history = Self::default();
        for (slot, &label) in history.words.iter_mut().zip(labels) {
            *slot = label;
        }
        history
    }

    /// Label at `idx`, reading the boundary past the window.
    pub fn get(&self, idx: usize) -> Label {
        self.words.get(idx).copied().unwrap_or(SENTENCE_BOUNDARY)
    }

    /// Raw slots, most recent first.
    pub fn words(&self) -> &[Label; N] {
        &self.words
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of leading non-boundary slots.
    pub fn size(&self) -> usize {
        self.words
            .iter()
            .position(|&w| w == SENTENCE_BOUNDARY)
            .unwrap_or(N)
    }

    /// Shift `label` in as the most recent word.
    ///
    /// An open class tag in slot 0 is overwritten in place, by any label
    /// including the boundary. Otherwise a boundary label leaves the history
    /// unchanged.
    pub fn update(&self, label: Label) -> Self {
        if N == 0 {
            return *self;
        }
        let mut next = *self;
        if self.words[0] == CLASS_TAG {
            next.words[0] = label;
            return next;
        }
        if label == SENTENCE_BOUNDARY {
            return *self;
        }
        next.words.copy_within(0..N - 1, 1);
        next.words[0] = label;
        next
    }

    /// Reinterpret as a history of width `M`; `None` unless the widths match.
    pub fn cast<const M: usize>(&self) -> Option<History<M>> {
        if M != N {
            return None;
        }
        Some(History::<M>::from_slice(&self.words))
    }
}

impl<const N: usize> Index<usize> for History<N> {
    type Output = Label;

    fn index(&self, idx: usize) -> &Label {
        self.words.get(idx).unwrap_or(&BOUNDARY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_and_index() {
        let history = RescoringHistory::new(7);
        assert_eq!(history[0], 7);
        assert_eq!(history[1], SENTENCE_BOUNDARY);
        assert_eq!(history[10], SENTENCE_BOUNDARY);
        assert_eq!(history.size(), 1);
    }

    #[test]
    fn test_update_shifts_one_slot() {
        let mut history = RescoringHistory::new(1);
        for label in 2..=6 {
            let next = history.update(label);
            assert_eq!(next[0], label);
            for i in 1..history.capacity() {
                assert_eq!(next[i], history[i - 1]);
            }
            assert!(next.size() <= next.capacity());
            history = next;
        }
        assert_eq!(history.words(), &[6, 5, 4, 3]);
    }

    #[test]
    fn test_update_with_boundary_is_noop() {
        let history = RescoringHistory::from_slice(&[3, 2, 1]);
        assert_eq!(history.update(SENTENCE_BOUNDARY), history);
    }

    #[test]
    fn test_update_keeps_open_class_tag_context() {
        let history = RescoringHistory::from_slice(&[CLASS_TAG, 9, 8]);
        let next = history.update(42);
        assert_eq!(next.words(), &[42, 9, 8, 0]);
    }

    #[test]
    fn test_boundary_closes_class_tag() {
        let history = RescoringHistory::from_slice(&[CLASS_TAG, 9, 8]);
        let next = history.update(SENTENCE_BOUNDARY);
        assert_eq!(next[0], SENTENCE_BOUNDARY);
        assert_eq!(next.words(), &[0, 9, 8, 0]);
        assert_eq!(next.size(), 0);
    }

    #[test]
    fn test_long_history() {
        let history = LongRescoringHistory::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(history.size(), 8);
        let next = history.update(10);
        assert_eq!(next[0], 10);
        assert_eq!(next[7], 7);
    }

    #[test]
    fn test_ordering_and_equality() {
        let a = RescoringHistory::from_slice(&[1, 2]);
        let b = RescoringHistory::from_slice(&[1, 3]);
        assert!(a < b);
        assert_ne!(a, b);
        assert_eq!(a, RescoringHistory::from_slice(&[1, 2]));
    }

    #[test]
    fn test_hash_covers_all_slots() {
        let set: HashSet<RescoringHistory> = [
            RescoringHistory::from_slice(&[1, 2, 3]),
            RescoringHistory::from_slice(&[1, 2, 4]),
            RescoringHistory::from_slice(&[1, 5, 3]),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_cast() {
        let history = RescoringHistory::from_slice(&[4, 3]);
        assert_eq!(history.cast::<4>(), Some(history));
        assert!(LongRescoringHistory::new(1).cast::<4>().is_none());
    }
}
