//! recon-runner: headless trigger layer for the reconciliation core.
//!
//! Usage:
//!   recon-runner process-queue [--db recon.db] [--config recon.json]
//!   recon-runner process-item --id <queue_id>
//!   recon-runner match
//!   recon-runner candidates --payment <payment_id>
//!   recon-runner recompute --item <sellable_item_id> | --all
//!   recon-runner repair-sweep
//!   recon-runner stats
//!
//! Each subcommand maps onto exactly one discrete, idempotent core entry
//! point and prints a per-item outcome report as JSON.

use anyhow::{bail, Result};
use recon_core::{
    config::ReconConfig,
    entities::ImportStatus,
    import_queue::ImportQueue,
    inventory::Inventory,
    matcher::Matcher,
    repair::Repair,
    store::ReconStore,
};
use std::env;
use std::path::Path;
use std::sync::atomic::AtomicBool;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("--help");

    if command == "--help" || command == "-h" {
        print_usage();
        return Ok(());
    }

    let db = flag_value(&args, "--db").unwrap_or("recon.db");
    let config = match flag_value(&args, "--config") {
        Some(path) => ReconConfig::from_path(Path::new(path))?,
        None => ReconConfig::default(),
    };

    let store = ReconStore::open(db)?;
    store.migrate()?;
    let now = chrono::Utc::now().timestamp();

    match command {
        "process-queue" => {
            let queue = ImportQueue::new(&store, &config);
            let matcher = Matcher::new(&store, &config);
            let build = queue.build_queue(&matcher, now)?;
            let cancel = AtomicBool::new(false);
            let batch = queue.process_batch(&cancel, now)?;
            print_json(&serde_json::json!({ "build": build, "batch": batch }))?;
        }
        "process-item" => {
            let queue_id = required_flag(&args, "--id")?;
            let queue = ImportQueue::new(&store, &config);
            let outcome = queue.process_item(queue_id, now)?;
            print_json(&outcome)?;
        }
        "match" => {
            let matcher = Matcher::new(&store, &config);
            let report = matcher.match_batch(now)?;
            print_json(&report)?;
        }
        "candidates" => {
            let payment_id = required_flag(&args, "--payment")?;
            let matcher = Matcher::new(&store, &config);
            let payment = store.get_payment(payment_id)?;
            let candidates = matcher.candidates(&payment)?;
            print_json(&candidates)?;
        }
        "confirm-match" => {
            let payment_id = required_flag(&args, "--payment")?;
            let registration_id = required_flag(&args, "--registration")?;
            let reviewer = flag_value(&args, "--reviewer").unwrap_or("reviewer");
            let matcher = Matcher::new(&store, &config);
            let outcome = matcher.confirm_manual_match(payment_id, registration_id, reviewer, now)?;
            print_json(&outcome)?;
        }
        "recompute" => {
            let inventory = Inventory::new(&store);
            if args.iter().any(|a| a == "--all") {
                let count = inventory.recompute_all(now)?;
                print_json(&serde_json::json!({ "recomputed": count }))?;
            } else {
                let item_id = required_flag(&args, "--item")?;
                let counters = inventory.recompute(item_id, now)?;
                print_json(&counters)?;
            }
        }
        "repair-sweep" => {
            let repair = Repair::new(&store, &config);
            let report = repair.repair_sweep(now)?;
            print_json(&report)?;
        }
        "stats" => {
            let stats = serde_json::json!({
                "payments": store.payment_count()?,
                "registrations": store.registration_count()?,
                "staged_imports": store.staged_count()?,
                "failed_imports": store.failed_import_count()?,
                "queue": {
                    "pending": store.queue_count_by_status(ImportStatus::Pending)?,
                    "processing": store.queue_count_by_status(ImportStatus::Processing)?,
                    "imported": store.queue_count_by_status(ImportStatus::Imported)?,
                    "failed": store.queue_count_by_status(ImportStatus::Failed)?,
                },
            });
            print_json(&stats)?;
        }
        other => {
            print_usage();
            bail!("unknown command '{other}'");
        }
    }

    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn required_flag<'a>(args: &'a [String], flag: &str) -> Result<&'a str> {
    flag_value(args, flag).ok_or_else(|| anyhow::anyhow!("missing required flag {flag}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_usage() {
    println!(
        "recon-runner — payment/registration reconciliation

Commands:
  process-queue                build queue items from staged imports, then drain them
  process-item --id <id>       process one queue item
  match                        apply exact matches to unmatched payments
  candidates --payment <id>    list match candidates for reviewer tooling
  confirm-match --payment <id> --registration <id> [--reviewer <name>]
  recompute --item <id> | --all
  repair-sweep                 detect and heal one-sided links
  stats                        collection counts

Options:
  --db <path>        database file (default: recon.db)
  --config <path>    JSON config file (defaults built in)"
    );
}
