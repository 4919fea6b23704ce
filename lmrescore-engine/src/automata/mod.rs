//! Matchers over the application context vocabulary
//!
//! The application context is a label stream of phrases separated by
//! [`crate::SENTENCE_BOUNDARY`], each phrase listed last word first. Both
//! automata store phrases in that reversed order.

mod aho_corasick;
mod levenshtein;

pub use aho_corasick::{AhoCorasickTree, AutomatonState, ROOT_STATE};
pub use levenshtein::{LevenState, LevenshteinAutomata};

use crate::{Label, SENTENCE_BOUNDARY};

/// Non-empty boundary-delimited segments of `context`, in stream order.
pub(crate) fn split_phrases(context: &[Label]) -> impl DoubleEndedIterator<Item = &[Label]> {
    context
        .split(|&label| label == SENTENCE_BOUNDARY)
        .filter(|phrase| !phrase.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_phrases() {
        let context = [0, 1, 2, 0, 0, 3, 0, 4, 5, 6];
        let phrases: Vec<&[Label]> = split_phrases(&context).collect();
        assert_eq!(phrases, vec![&[1, 2][..], &[3][..], &[4, 5, 6][..]]);
        assert_eq!(split_phrases(&[]).count(), 0);
        assert_eq!(split_phrases(&[0, 0]).count(), 0);
    }
}
