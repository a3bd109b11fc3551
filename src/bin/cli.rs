#![cfg(not(tarpaulin_include))]

use splitbill::expense::{ExpenseCollection, NewCollection};
use splitbill::saving;
use splitbill::store::JsonFileStore;
use splitbill::totals::{Summary, summarize};
use splitbill::{AppConfig, AppError, AppResult};
use std::env;
use std::fs;
use std::path::PathBuf;

fn usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {program} summary <collection.json>");
    eprintln!("  {program} backup <snapshot.bin.gz>");
    eprintln!("  {program} restore <snapshot.bin.gz>");
    eprintln!();
    eprintln!("backup and restore use the data directory from splitbill.toml / SPLITBILL_DATA_DIR");
}

/// Read either a stored document or a bare `{kind, name, description, members, items}` file
fn read_collection(path: &str) -> AppResult<ExpenseCollection> {
    let contents = fs::read_to_string(path)?;
    if let Ok(stored) = serde_json::from_str::<ExpenseCollection>(&contents) {
        return Ok(stored);
    }
    let new: NewCollection = serde_json::from_str(&contents)?;
    Ok(ExpenseCollection::from_new("local", new, chrono::Utc::now()))
}

fn print_summary(summary: &Summary) {
    println!("{} ({})", summary.name, summary.kind);
    println!("{}", summary.description);
    println!();

    if summary.members.is_empty() {
        for item in &summary.items {
            println!(
                "  {:<24} {:>8} x {:>10} = {:>10}",
                item.name, item.quantity, item.unit_price, item.line_total
            );
        }
    } else {
        for member in &summary.members {
            println!("{}", member.member);
            for item in &member.items {
                println!(
                    "  {:<24} {:>8} x {:>10} = {:>10}",
                    item.name, item.quantity, item.unit_price, item.line_total
                );
            }
            println!("  {:<47} {:>10}", "Subtotal", member.subtotal);
        }
    }

    if let Some(warning) = &summary.warning {
        println!();
        println!("Warning: {warning}");
        for item in &summary.unassigned {
            println!(
                "  {:<24} {:>8} -> {}",
                item.name,
                item.line_total,
                item.assignee.as_deref().unwrap_or("nobody")
            );
        }
    }

    println!();
    println!("Grand total: {}", summary.grand_total);
}

fn open_store() -> AppResult<JsonFileStore> {
    let config = AppConfig::load();
    JsonFileStore::open(config.expenses_path())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("splitbill-cli");

    if args.len() != 3 {
        usage(program);
        return Ok(());
    }

    let path = &args[2];
    match args[1].as_str() {
        "summary" => {
            let collection = read_collection(path)?;
            print_summary(&summarize(&collection));
        }
        "backup" => {
            let store = open_store()?;
            let count = saving::backup_store(&store, PathBuf::from(path)).await?;
            println!("Saved {count} collection(s) to {path}");
        }
        "restore" => {
            let store = open_store()?;
            let count = saving::restore_store(&store, PathBuf::from(path)).await?;
            println!("Restored {count} collection(s) from {path}");
        }
        other => {
            usage(program);
            return Err(AppError::BadRequest(format!("unknown command '{other}'")).into());
        }
    }

    Ok(())
}
