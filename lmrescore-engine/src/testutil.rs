//! Shared fixtures for unit tests.

use std::path::Path;

use crate::config::ModelConfig;
use crate::symbols::SymbolTable;

/// 4-gram model over 打电话 给 曲 飞.
pub const FIXTURE_ARPA: &str = include_str!("../tests/data/lm.arpa");

pub const DA_DIAN_HUA: u32 = 28633;
pub const GEI: u32 = 22801;
pub const QU: u32 = 32411;
pub const FEI: u32 = 10906;
/// In the symbol table but not in the model.
pub const BEI_JING: u32 = 500;

/// Write the fixture model into `dir` and return its path.
pub fn write_fixture(dir: &Path) -> String {
    let path = dir.join("lm.arpa");
    std::fs::write(&path, FIXTURE_ARPA).unwrap();
    path.to_str().unwrap().to_string()
}

pub fn fixture_symbols() -> SymbolTable {
    let mut symbols = SymbolTable::new();
    symbols.add_symbol("<eps>", 0);
    symbols.add_symbol("北京", BEI_JING);
    symbols.add_symbol("飞", FEI);
    symbols.add_symbol("给", GEI);
    symbols.add_symbol("打电话", DA_DIAN_HUA);
    symbols.add_symbol("曲", QU);
    symbols
}

pub fn model_config(name: &str, group: &str, weight: f32, path: &str) -> ModelConfig {
    ModelConfig {
        name: Some(name.into()),
        group: Some(group.into()),
        weight: Some(weight),
        ngram_order: Some(4),
        model_path: Some(path.into()),
        model_type: None,
    }
}
