use std::path::{Path, PathBuf};

pub const PACER_DIR: &str = ".pacer";
pub const CONFIG_FILE: &str = ".pacer/config.yaml";
pub const LEDGER_FILE: &str = ".pacer/ledger.redb";

pub fn pacer_dir(root: &Path) -> PathBuf {
    root.join(PACER_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn ledger_path(root: &Path) -> PathBuf {
    root.join(LEDGER_FILE)
}
