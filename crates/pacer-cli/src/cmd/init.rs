use anyhow::Context;
use pacer_core::{config::Config, io, paths};
use std::path::Path;

const GITIGNORE: &str = "# Runtime state, not configuration\nledger.redb\n";

pub fn run(root: &Path, account: Option<&str>) -> anyhow::Result<()> {
    let account = match account {
        Some(a) => a.to_string(),
        None => root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string()),
    };

    println!("Initializing pacer in: {}", root.display());

    let dir = paths::pacer_dir(root);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::new(&account)
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {} (account: {account})", paths::CONFIG_FILE);
    }

    let gitignore = dir.join(".gitignore");
    if io::write_if_missing(&gitignore, GITIGNORE.as_bytes())? {
        println!("  created: {}/.gitignore", paths::PACER_DIR);
    }

    Ok(())
}
