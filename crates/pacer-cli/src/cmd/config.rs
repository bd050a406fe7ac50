use crate::output::{print_json, print_table, window_label};
use anyhow::Context;
use clap::Subcommand;
use pacer_core::{
    config::{Config, WarnLevel},
    types::ActionKind,
};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective limits per action kind
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    match subcmd {
        ConfigSubcommand::Show => show(&config, json),
        ConfigSubcommand::Validate => validate(&config, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(config);
    }

    println!("Account: {}", config.account.id);
    println!(
        "Executor timeout: {}s, failed attempts count: {}",
        config.executor_timeout_secs, config.count_failed_attempts
    );
    println!();

    let rows = ActionKind::all()
        .iter()
        .map(|&kind| {
            let limits = config.limits.for_kind(kind);
            let windows = limits
                .quota_windows()
                .iter()
                .map(|w| format!("{}/{}", w.limit, window_label(w.duration.as_secs())))
                .collect::<Vec<_>>()
                .join(", ");
            vec![
                kind.to_string(),
                format!("{}s", limits.min_spacing_secs),
                format!("{}-{}s", limits.jitter.min_secs, limits.jitter.max_secs),
                if windows.is_empty() { "-".to_string() } else { windows },
            ]
        })
        .collect();
    print_table(&["KIND", "SPACING", "JITTER", "QUOTA"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(config: &Config, json: bool) -> anyhow::Result<()> {
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
