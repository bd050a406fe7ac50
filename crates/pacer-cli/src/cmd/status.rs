use crate::output::{print_json, print_table, timestamp, window_label};
use pacer_core::ledger::WindowUsage;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let scheduler = super::open_scheduler(root)?;
    let usage = scheduler.usage()?;
    let cooldown_until = scheduler.cooldown_until()?;

    if json {
        #[derive(serde::Serialize)]
        struct StatusOutput<'a> {
            account: &'a str,
            cooldown_until: Option<chrono::DateTime<chrono::Utc>>,
            windows: &'a [WindowUsage],
        }
        return print_json(&StatusOutput {
            account: scheduler.account(),
            cooldown_until,
            windows: &usage,
        });
    }

    println!("Account: {}", scheduler.account());
    match cooldown_until {
        Some(until) => println!("Cooldown: active until {}", timestamp(until)),
        None => println!("Cooldown: none"),
    }
    println!();

    if usage.is_empty() {
        println!("No quota windows configured.");
        return Ok(());
    }

    let rows = usage
        .iter()
        .map(|u| {
            vec![
                u.kind.to_string(),
                window_label(u.window_secs),
                u.count.to_string(),
                u.limit.to_string(),
                u.remaining.to_string(),
            ]
        })
        .collect();
    print_table(&["KIND", "WINDOW", "USED", "LIMIT", "LEFT"], rows);
    Ok(())
}
