use clap::Parser;
use district_store::cli::{Cli, Command};
use district_store::config::Config;
use district_store::report;
use district_store::store::retention::PruneMode;
use district_store::{NewSnapshot, SnapshotStore, StoredSnapshot};
use serde_json::Value;
use tracing::info;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn show(result: district_store::Result<Option<StoredSnapshot<Value>>>, json: bool, missing: &str) {
    match result {
        Ok(Some(snapshot)) => report::print_snapshot(&snapshot, json),
        Ok(None) => fail(missing),
        Err(e) => fail(format!("Error loading snapshot: {e}")),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())
        .unwrap_or_else(|e| fail(format!("Error loading config: {e}")));
    if let Some(cache_root) = cli.cache_root {
        config.cache_root = cache_root;
    }

    info!(cache_root = %config.cache_root.display(), "opening snapshot store");
    let store = SnapshotStore::new(&config);

    match cli.command {
        Command::Write(args) => {
            let contents = std::fs::read(&args.file)
                .unwrap_or_else(|e| fail(format!("Error reading {}: {e}", args.file.display())));
            let snapshot: NewSnapshot<Value> = serde_json::from_slice(&contents)
                .unwrap_or_else(|e| fail(format!("Invalid snapshot in {}: {e}", args.file.display())));

            match store.write_snapshot(&snapshot) {
                Ok(receipt) => {
                    println!(
                        "wrote snapshot {} ({}, {} districts)",
                        receipt.snapshot_id,
                        receipt.status.as_str(),
                        receipt.districts_written
                    );
                    if receipt.pointer_updated {
                        println!("latest successful snapshot is now {}", receipt.snapshot_id);
                    }
                }
                Err(e) => fail(format!("Error writing snapshot: {e}")),
            }
        }
        Command::Latest(args) => {
            show(
                store.get_latest_successful(),
                args.json,
                "No successful snapshot available.",
            );
        }
        Command::Show(args) => {
            let missing = format!("Snapshot {} not found.", args.id);
            show(store.get_snapshot(&args.id), args.json, &missing);
        }
        Command::List => {
            let latest = store
                .latest_successful_id()
                .unwrap_or_else(|e| fail(format!("Error resolving latest snapshot: {e}")));
            match store.list_snapshots() {
                Ok(snapshots) => print!("{}", report::table::render_list(&snapshots, latest.as_deref())),
                Err(e) => fail(format!("Error listing snapshots: {e}")),
            }
        }
        Command::Districts(args) => match store.list_districts_in_snapshot(&args.id) {
            Ok(districts) if districts.is_empty() => {
                fail(format!("No district data in snapshot {}.", args.id));
            }
            Ok(districts) => {
                for district in districts {
                    println!("{district}");
                }
            }
            Err(e) => fail(format!("Error reading snapshot {}: {e}", args.id)),
        },
        Command::District(args) => {
            match store.read_district_data::<Value>(&args.id, &args.district) {
                Ok(Some(record)) => println!("{}", report::json::render(&record)),
                Ok(None) => fail(format!("District {} not found in snapshot {}.", args.district, args.id)),
                Err(e) => fail(format!("Error reading district {}: {e}", args.district)),
            }
        }
        Command::Prune(args) => {
            let mode = if args.dry_run {
                PruneMode::DryRun
            } else {
                PruneMode::Execute
            };

            let result = store.prune(mode);
            report::print_prune(&result, args.dry_run);
            if !result.errors.is_empty() {
                std::process::exit(1);
            }
        }
    }
}
