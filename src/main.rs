//! filesaga command line
//!
//! Runs a JSON plan of file operations as one saga, replays startup recovery, or
//! inspects the journal. Every command that touches the filesystem recovers first.
//!
//! A plan is a JSON array of operations:
//!
//! ```text
//! [
//!   { "type": "mkdir", "source": "/data/sorted/2024" },
//!   { "type": "move",  "source": "/data/inbox/a.jpg", "destination": "/data/sorted/2024/a.jpg" },
//!   { "type": "delete", "source": "/data/inbox/thumbs.db" }
//! ]
//! ```

use std::path::PathBuf;

use log::{info, warn};
use serde_json::json;

use filesaga::{Config, ExecutionSummary, OperationRequest, SagaEngine, SagaOutcome, TxnId};

fn print_help() {
    println!("filesaga - atomic, crash-recoverable file reorganization");
    println!();
    println!("Usage: filesaga [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  execute <PLAN.json>   Run a plan as one transaction");
    println!("  recover               Roll back transactions left incomplete");
    println!("  stats                 Print journal statistics");
    println!("  show <TXN-ID>         Print one transaction and its operations");
    println!();
    println!("Options:");
    println!("  -j, --journal FILE    Journal file (default: ./data/filesaga.journal)");
    println!("      --max-attempts N  Numbered names tried on collision (default: 100)");
    println!("      --keep-backups    Keep delete-backups after commit");
    println!("  -h, --help            Show this help");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = Config::default();
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--journal" | "-j" => {
                if i + 1 < args.len() {
                    config.journal_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--max-attempts" => {
                if i + 1 < args.len() {
                    config.max_collision_attempts = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--keep-backups" => {
                config.purge_backups_on_commit = false;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let Some(command) = positional.first().cloned() else {
        print_help();
        return Ok(());
    };

    let engine = SagaEngine::open(config)?;

    match command.as_str() {
        "execute" => {
            let plan = positional.get(1).ok_or("execute needs a plan file")?;
            let operations: Vec<OperationRequest> =
                serde_json::from_str(&std::fs::read_to_string(plan)?)?;

            let recovered = engine.recover_incomplete_transactions()?;
            if !recovered.is_empty() {
                info!("Recovered {} incomplete transactions", recovered.len());
            }

            info!("Executing {} operations from {}", operations.len(), plan);
            let outcome = engine.execute(&operations)?;
            if let SagaOutcome::RolledBack(report) = &outcome {
                for step in report.unrecoverable() {
                    warn!(
                        "Step {} ({} {}) requires manual cleanup",
                        step.step_number,
                        step.operation_type,
                        step.source.display()
                    );
                }
            }
            let summary = ExecutionSummary::from(&outcome);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.success {
                std::process::exit(1);
            }
        }
        "recover" => {
            let results = engine.recover_incomplete_transactions()?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            if results.iter().any(|r| !r.success) {
                std::process::exit(1);
            }
        }
        "stats" => {
            println!("{}", serde_json::to_string_pretty(&engine.statistics()?)?);
        }
        "show" => {
            let id: TxnId = positional.get(1).ok_or("show needs a transaction id")?.parse()?;
            let journal = engine.journal();
            let Some(txn) = journal.get_transaction(id)? else {
                return Err(format!("Transaction {} not found", id).into());
            };
            let operations = journal.get_operations(id)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "transaction": txn,
                    "operations": operations,
                }))?
            );
        }
        other => {
            return Err(format!("Unknown command '{}', see --help", other).into());
        }
    }

    Ok(())
}
