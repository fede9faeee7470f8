//! Audit the contact link invariants across the whole store.
//!
//! Opens the database read-only so it can run alongside the server. Prints a
//! JSON report on stdout (logs go to stderr) and exits 1 if any contact
//! breaks the secondary -> primary shape.
//!
//! Usage: `check_contact_links [DB_PATH]`. Without an argument the path comes
//! from the usual config (`CONTACTLINK_DB_PATH`, `dbPath`, default).

use std::path::PathBuf;

use anyhow::Context;

use contactlink_lib::db::ContactDb;
use contactlink_lib::integrity::build_link_report;
use contactlink_lib::state::{db_path, load_config};

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("check_contact_links: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether the store is clean.
fn run() -> anyhow::Result<bool> {
    let config = load_config().map_err(anyhow::Error::msg)?;
    contactlink_lib::init_logging(&config.log_filter);

    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => db_path(&config).map_err(anyhow::Error::msg)?,
    };

    let db = ContactDb::open_readonly_at(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let report = build_link_report(&db, &path)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.is_clean())
}
