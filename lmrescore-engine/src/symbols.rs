//! Decoder word symbol table.
//!
//! Maps the decoder's shared labels to word tokens. Read from the OpenFST
//! text format: one `token<whitespace>label` pair per line.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, bail};

use crate::Label;

/// Enumerable `(label, token)` vocabulary.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: Vec<(Label, String)>,
    by_token: HashMap<String, Label>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `token` under `label`. A token added twice keeps its first label.
    pub fn add_symbol(&mut self, token: &str, label: Label) {
        if self.by_token.contains_key(token) {
            return;
        }
        self.by_token.insert(token.to_string(), label);
        self.symbols.push((label, token.to_string()));
    }

    pub fn find(&self, token: &str) -> Option<Label> {
        self.by_token.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Iterate `(label, token)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Label, &str)> {
        self.symbols.iter().map(|(label, token)| (*label, token.as_str()))
    }

    /// Read a symbol table in OpenFST text format.
    pub fn read_text(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open symbol table {}", path.display()))?;
        let mut table = Self::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(token), Some(label), None) = (parts.next(), parts.next(), parts.next())
            else {
                bail!("{}:{}: expected `token label`", path.display(), lineno + 1);
            };
            let label: Label = label
                .parse()
                .with_context(|| format!("{}:{}: bad label", path.display(), lineno + 1))?;
            table.add_symbol(token, label);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_add_and_find() {
        let mut table = SymbolTable::new();
        table.add_symbol("打电话", 28633);
        table.add_symbol("给", 22801);
        table.add_symbol("给", 1);

        assert_eq!(table.len(), 2);
        assert_eq!(table.find("给"), Some(22801));
        assert_eq!(table.find("飞"), None);
        let pairs: Vec<_> = table.iter().collect();
        assert_eq!(pairs, vec![(28633, "打电话"), (22801, "给")]);
    }

    #[test]
    fn test_read_text() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "<eps> 0\n# comment\n\nhello 1\nworld\t2\n").unwrap();

        let table = SymbolTable::read_text(file.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.find("world"), Some(2));
    }

    #[test]
    fn test_read_text_rejects_malformed_line() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "hello 1\nbroken\n").unwrap();
        assert!(SymbolTable::read_text(file.path()).is_err());
    }

    #[test]
    fn test_read_text_missing_file() {
        assert!(SymbolTable::read_text("/nonexistent/words.txt").is_err());
    }
}
