use crate::output::{print_json, timestamp};
use pacer_core::{gate::RateGateDecision, types::Action};
use std::path::Path;

pub fn run(root: &Path, kind: &str, json: bool) -> anyhow::Result<()> {
    let kind = super::parse_kind(kind)?;
    let scheduler = super::open_scheduler(root)?;
    let action = Action::new(kind, "", chrono::Utc::now());
    let decision = scheduler.evaluate(&action)?;

    if json {
        return print_json(&decision);
    }

    match decision {
        RateGateDecision::Admit { jitter } => {
            println!("{kind}: would be admitted (jitter {}ms)", jitter.as_millis());
        }
        RateGateDecision::Deny {
            reason,
            defer_until,
        } => {
            print!("{kind}: denied ({reason})");
            match defer_until {
                Some(until) => println!(", retry after {}", timestamp(until)),
                None => println!(),
            }
        }
    }
    Ok(())
}
