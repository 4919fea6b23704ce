//! Exact multi-phrase matcher: a label trie with failure links.

use std::collections::{HashMap, VecDeque};

use crate::Label;

/// Node id inside an [`AhoCorasickTree`].
pub type AutomatonState = u32;

/// Start state, also reached after a mismatch with no usable suffix.
pub const ROOT_STATE: AutomatonState = 0;

#[derive(Debug, Clone, Default)]
struct Node {
    children: HashMap<Label, AutomatonState>,
    fail: AutomatonState,
    /// A phrase ends here
    end: bool,
    /// Depth from the root
    height: u16,
}

/// Trie of phrases with Aho-Corasick failure links.
///
/// Insert every phrase, call [`AhoCorasickTree::build`] once, then step a
/// state through the decoded labels with [`AhoCorasickTree::query`].
#[derive(Debug, Clone)]
pub struct AhoCorasickTree {
    nodes: Vec<Node>,
    phrases: usize,
}

impl Default for AhoCorasickTree {
    fn default() -> Self {
        Self::new()
    }
}

impl AhoCorasickTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            phrases: 0,
        }
    }

    /// Add one phrase to the trie.
    pub fn insert(&mut self, phrase: impl IntoIterator<Item = Label>) {
        let mut node = ROOT_STATE;
        let mut height = 0u16;
        for label in phrase {
            height = height.saturating_add(1);
            let next = self.nodes.len() as AutomatonState;
            node = *self.nodes[node as usize]
                .children
                .entry(label)
                .or_insert(next);
            if node == next {
                self.nodes.push(Node {
                    height,
                    ..Default::default()
                });
            }
        }
        if node != ROOT_STATE {
            self.nodes[node as usize].end = true;
            self.phrases += 1;
        }
    }

    /// Compute failure links breadth-first.
    ///
    /// A node that ends a phrase fails to the root, so a completed phrase is
    /// never extended by one of its suffixes.
    pub fn build(&mut self) {
        let mut queue: VecDeque<AutomatonState> =
            self.nodes[ROOT_STATE as usize].children.values().copied().collect();

        while let Some(parent) = queue.pop_front() {
            let children: Vec<(Label, AutomatonState)> = self.nodes[parent as usize]
                .children
                .iter()
                .map(|(&label, &child)| (label, child))
                .collect();
            for (label, child) in children {
                let fail = if self.nodes[child as usize].end {
                    ROOT_STATE
                } else {
                    self.transition_from(self.nodes[parent as usize].fail, label)
                        .unwrap_or(ROOT_STATE)
                };
                self.nodes[child as usize].fail = fail;
                queue.push_back(child);
            }
        }
    }

    /// Follow failure links from `state` until `label` has an edge.
    fn transition_from(&self, mut state: AutomatonState, label: Label) -> Option<AutomatonState> {
        loop {
            if let Some(&next) = self.nodes[state as usize].children.get(&label) {
                return Some(next);
            }
            if state == ROOT_STATE {
                return None;
            }
            state = self.nodes[state as usize].fail;
        }
    }

    /// Step `state` over `label` and return the height of the node reached,
    /// 0 when no phrase prefix matches.
    pub fn query(&self, state: &mut AutomatonState, label: Label) -> u16 {
        let current = if (*state as usize) < self.nodes.len() {
            *state
        } else {
            ROOT_STATE
        };
        *state = self.transition_from(current, label).unwrap_or(ROOT_STATE);
        self.height(*state)
    }

    /// Depth of `state`, 0 for the root or an unknown state.
    pub fn height(&self, state: AutomatonState) -> u16 {
        self.nodes
            .get(state as usize)
            .map(|node| node.height)
            .unwrap_or(0)
    }

    /// True if a phrase ends at `state`.
    pub fn is_phrase_end(&self, state: AutomatonState) -> bool {
        self.nodes
            .get(state as usize)
            .is_some_and(|node| node.end)
    }

    /// Number of inserted phrases.
    pub fn len(&self) -> usize {
        self.phrases
    }

    pub fn is_empty(&self) -> bool {
        self.phrases == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(phrases: &[&[Label]]) -> AhoCorasickTree {
        let mut tree = AhoCorasickTree::new();
        for phrase in phrases {
            tree.insert(phrase.iter().copied());
        }
        tree.build();
        tree
    }

    fn run(tree: &AhoCorasickTree, labels: &[Label]) -> (AutomatonState, u16) {
        let mut state = ROOT_STATE;
        let mut height = 0;
        for &label in labels {
            height = tree.query(&mut state, label);
        }
        (state, height)
    }

    #[test]
    fn test_match_returns_phrase_length() {
        let tree = build(&[&[1, 2, 3], &[4, 5], &[6, 7, 8, 9]]);
        assert_eq!(tree.len(), 3);

        let (state, height) = run(&tree, &[10, 11, 4, 5]);
        assert_eq!(height, 2);
        assert!(tree.is_phrase_end(state));

        let (_, height) = run(&tree, &[6, 7, 8, 9]);
        assert_eq!(height, 4);
    }

    #[test]
    fn test_unrelated_sequence() {
        let tree = build(&[&[1, 2, 3], &[4, 5]]);
        let (state, height) = run(&tree, &[7, 8, 9]);
        assert_eq!(height, 0);
        assert_eq!(state, ROOT_STATE);
    }

    #[test]
    fn test_failure_link_keeps_suffix() {
        // "1 2" fails into "2 3" after a mismatch on 4
        let tree = build(&[&[1, 2, 4], &[2, 3]]);
        let mut state = ROOT_STATE;
        assert_eq!(tree.query(&mut state, 1), 1);
        assert_eq!(tree.query(&mut state, 2), 2);
        assert_eq!(tree.query(&mut state, 3), 2);
        assert!(tree.is_phrase_end(state));
    }

    #[test]
    fn test_phrase_end_fails_to_root() {
        let tree = build(&[&[1, 2], &[2, 3]]);
        let mut state = ROOT_STATE;
        tree.query(&mut state, 1);
        assert_eq!(tree.query(&mut state, 2), 2);
        // No suffix carried over from the completed phrase
        assert_eq!(tree.query(&mut state, 3), 0);
    }

    #[test]
    fn test_empty_tree() {
        let tree = build(&[]);
        assert!(tree.is_empty());
        let mut state = ROOT_STATE;
        assert_eq!(tree.query(&mut state, 1), 0);
        let mut bogus = 99;
        assert_eq!(tree.query(&mut bogus, 1), 0);
        assert_eq!(bogus, ROOT_STATE);
    }
}
