use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "district-store")]
#[command(about = "Inspect and maintain district statistics snapshots")]
#[command(version)]
pub struct Cli {
    /// Cache root holding the snapshots directory
    #[arg(long, global = true)]
    pub cache_root: Option<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Persist a snapshot from a JSON document
    Write(WriteArgs),

    /// Show the latest successful snapshot
    Latest(ShowArgs),

    /// Show a specific snapshot
    Show(ShowIdArgs),

    /// List all snapshots
    List,

    /// List districts with data in a snapshot
    Districts(DistrictsArgs),

    /// Print one district's record as JSON
    District(DistrictArgs),

    /// Delete snapshots beyond the retention limits
    Prune(PruneArgs),
}

#[derive(Parser)]
pub struct WriteArgs {
    /// JSON file containing the snapshot
    pub file: PathBuf,
}

#[derive(Parser)]
pub struct ShowArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ShowIdArgs {
    /// Snapshot id (YYYY-MM-DD)
    pub id: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Parser)]
pub struct DistrictsArgs {
    /// Snapshot id (YYYY-MM-DD)
    pub id: String,
}

#[derive(Parser)]
pub struct DistrictArgs {
    /// Snapshot id (YYYY-MM-DD)
    pub id: String,

    /// District id
    pub district: String,
}

#[derive(Parser)]
pub struct PruneArgs {
    /// Only report what would be deleted
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["district-store", "show", "2024-01-15", "--json", "--cache-root", "/tmp/x"]);
        assert_eq!(cli.cache_root, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Command::Show(args) => {
                assert_eq!(args.id, "2024-01-15");
                assert!(args.json);
            }
            _ => panic!("expected show"),
        }
    }
}
