use crate::output::{print_json, timestamp};
use anyhow::Context;
use clap::Subcommand;
use pacer_core::config::Config;
use std::path::Path;
use std::time::Duration;

#[derive(Subcommand)]
pub enum CooldownSubcommand {
    /// Deny every action for a while (default: cooldown.default_secs)
    Start {
        /// Cooldown length in seconds
        #[arg(long, value_name = "SECS")]
        secs: Option<u64>,
    },

    /// End the active cooldown now
    Clear,
}

pub fn run(root: &Path, subcmd: CooldownSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        CooldownSubcommand::Start { secs } => start(root, secs, json),
        CooldownSubcommand::Clear => clear(root, json),
    }
}

fn start(root: &Path, secs: Option<u64>, json: bool) -> anyhow::Result<()> {
    let duration = match secs {
        Some(s) => Duration::from_secs(s),
        None => Config::load(root)
            .context("failed to load config")?
            .cooldown
            .default_duration(),
    };
    let scheduler = super::open_scheduler(root)?;
    let until = scheduler.trigger_cooldown(duration)?;

    if json {
        print_json(&serde_json::json!({ "cooldown_until": until }))?;
    } else {
        println!("Cooldown active until {}", timestamp(until));
    }
    Ok(())
}

fn clear(root: &Path, json: bool) -> anyhow::Result<()> {
    let scheduler = super::open_scheduler(root)?;
    scheduler.clear_cooldown()?;

    if json {
        print_json(&serde_json::json!({ "cooldown_until": null }))?;
    } else {
        println!("Cooldown cleared");
    }
    Ok(())
}
