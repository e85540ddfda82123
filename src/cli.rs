use crate::classify::ForceMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();

    // Try to extract number and unit
    let (num_str, unit) = if let Some(pos) = s.find(|c: char| c.is_alphabetic()) {
        (&s[..pos], &s[pos..])
    } else {
        // No unit, assume bytes
        return s.parse::<u64>().map_err(|e| format!("Invalid size: {}", e));
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|e| format!("Invalid number '{}': {}", num_str, e))?;

    let multiplier: u64 = match unit.trim() {
        "B" => 1,
        "KB" | "K" => 1024,
        "MB" | "M" => 1024 * 1024,
        "GB" | "G" => 1024 * 1024 * 1024,
        _ => return Err(format!("Unknown unit '{}'. Use B, KB, MB, or GB", unit)),
    };

    Ok((num * multiplier as f64) as u64)
}

#[derive(Parser, Debug)]
#[command(name = "pagesync")]
#[command(about = "Keep a remote page tree and a local directory of text files in sync", long_about = None)]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Sync every configured tree
    pagesync sync

    # Overwrite local files with the remote tree
    pagesync sync --force-pull

    # Machine-readable output
    pagesync sync --json

    # Inspect or seed a baseline
    pagesync baseline get 12345
    pagesync baseline update 12345 --file page.txt

    # Three-way merge against the stored baseline
    pagesync baseline merge 12345 --local mine.txt --remote theirs.txt")]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "PAGESYNC_CONFIG", default_value = crate::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only show errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one sync pass for every configured tree
    Sync(SyncArgs),

    /// Work with the baseline store directly
    Baseline {
        /// Baseline repository (defaults to baseline_dir from the config)
        #[arg(long, global = true)]
        baseline_dir: Option<PathBuf>,

        #[command(subcommand)]
        command: BaselineCommand,
    },
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Overwrite local files from the remote tree
    #[arg(long, conflicts_with = "force_push")]
    pub force_pull: bool,

    /// Push local files regardless of remote changes
    #[arg(long)]
    pub force_push: bool,

    /// Output newline-delimited JSON events
    #[arg(long)]
    pub json: bool,

    /// Report conflicts without attempting a three-way merge
    #[arg(long)]
    pub no_merge: bool,

    /// Largest page file read (e.g., "10MB", "512KB")
    #[arg(long, value_parser = parse_size)]
    pub max_file_size: Option<u64>,
}

impl SyncArgs {
    pub fn force_mode(&self) -> ForceMode {
        ForceMode::from_flags(self.force_pull, self.force_push)
    }
}

#[derive(Subcommand, Debug)]
pub enum BaselineCommand {
    /// Create the baseline repository if it does not exist
    Init,

    /// Print the stored baseline of a document
    Get { id: String },

    /// Store a baseline, read from a file or stdin
    Update {
        id: String,

        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Merge two versions against the stored baseline and print the result
    Merge {
        id: String,

        #[arg(long)]
        local: PathBuf,

        #[arg(long)]
        remote: PathBuf,
    },
}

impl Cli {
    pub fn json(&self) -> bool {
        matches!(&self.command, Command::Sync(args) if args.json)
    }

    pub fn log_level(&self) -> tracing::Level {
        if self.quiet || self.json() {
            return tracing::Level::ERROR;
        }

        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
        assert!(parse_size("5XB").is_err());
    }

    #[test]
    fn test_force_flags_conflict() {
        assert!(Cli::try_parse_from(["pagesync", "sync", "--force-pull", "--force-push"]).is_err());

        let cli = Cli::try_parse_from(["pagesync", "sync", "--force-push"]).unwrap();
        match cli.command {
            Command::Sync(args) => assert_eq!(args.force_mode(), ForceMode::Push),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::try_parse_from(["pagesync", "-vv", "sync"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::TRACE);

        let cli = Cli::try_parse_from(["pagesync", "sync", "--json"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::ERROR);

        let cli = Cli::try_parse_from(["pagesync", "baseline", "get", "12"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_baseline_dir_after_subcommand() {
        let cli = Cli::try_parse_from(["pagesync", "baseline", "get", "12", "--baseline-dir", "/tmp/b"]).unwrap();
        match cli.command {
            Command::Baseline { baseline_dir, command } => {
                assert_eq!(baseline_dir, Some(PathBuf::from("/tmp/b")));
                assert!(matches!(command, BaselineCommand::Get { id } if id == "12"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
