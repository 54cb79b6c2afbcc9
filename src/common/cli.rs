//! CLI argument parsing for the COPPER tool
//!
//! # Design Principles (KISS)
//! - Use clap's derive macro for declarative argument definition
//! - Common arguments shared via composition
//! - One subcommand per operation on raw block files

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Common arguments shared by all subcommands
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file (built-in defaults if omitted)
    #[arg(short = 'f', long = "config", env = "COPPER_CONFIG", global = true)]
    pub config_file: Option<String>,
}

/// Inspect, validate, reduce and synthesize COPPER raw-data files
#[derive(Parser, Debug)]
#[command(name = "copper_tool")]
#[command(about = "Belle II COPPER raw-data block tool")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print a summary line for every block
    Info {
        /// Raw block file
        file: PathBuf,

        /// Emit one JSON object per block
        #[arg(long)]
        json: bool,
    },

    /// Run all integrity checks on every block
    Validate {
        /// Raw block file
        file: PathBuf,

        /// Also verify the per-channel B2L CRC-16
        #[arg(long)]
        crc: bool,
    },

    /// Convert a pre-format file to the reduced format
    Reduce {
        /// Raw block file
        file: PathBuf,

        /// Output path (default: <input>.reduced)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write synthesized pre-format blocks
    Generate {
        /// Output path
        #[arg(short, long)]
        output: PathBuf,

        /// Number of events
        #[arg(short = 'n', long, default_value = "100")]
        events: usize,

        /// Random seed (overrides the config file)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Hex dump of one block
    Dump {
        /// Raw block file
        file: PathBuf,

        /// Block index (0-based)
        #[arg(short, long, default_value = "0")]
        block: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_args_default() {
        let args = CommonArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.config_file, None);
    }

    #[test]
    fn test_common_args_custom_config() {
        let args = CommonArgs::try_parse_from(["test", "-f", "custom.toml"]).unwrap();
        assert_eq!(args.config_file.as_deref(), Some("custom.toml"));
    }

    #[test]
    fn test_info_args() {
        let cli = Cli::try_parse_from(["test", "info", "run.dat", "--json"]).unwrap();
        match cli.command {
            Commands::Info { file, json } => {
                assert_eq!(file, PathBuf::from("run.dat"));
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_validate_args() {
        let cli = Cli::try_parse_from(["test", "validate", "run.dat"]).unwrap();
        assert!(matches!(cli.command, Commands::Validate { crc: false, .. }));

        let cli = Cli::try_parse_from(["test", "validate", "run.dat", "--crc"]).unwrap();
        assert!(matches!(cli.command, Commands::Validate { crc: true, .. }));
    }

    #[test]
    fn test_reduce_args() {
        let cli = Cli::try_parse_from(["test", "reduce", "in.dat", "-o", "out.dat"]).unwrap();
        match cli.command {
            Commands::Reduce { file, output } => {
                assert_eq!(file, PathBuf::from("in.dat"));
                assert_eq!(output, Some(PathBuf::from("out.dat")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_generate_args_default() {
        let cli = Cli::try_parse_from(["test", "generate", "-o", "gen.dat"]).unwrap();
        match cli.command {
            Commands::Generate {
                output,
                events,
                seed,
            } => {
                assert_eq!(output, PathBuf::from("gen.dat"));
                assert_eq!(events, 100);
                assert_eq!(seed, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_generate_args_full() {
        let cli = Cli::try_parse_from([
            "test", "-f", "daq.toml", "generate", "-o", "gen.dat", "--events", "5", "--seed", "9",
        ])
        .unwrap();
        assert_eq!(cli.common.config_file.as_deref(), Some("daq.toml"));
        assert!(matches!(
            cli.command,
            Commands::Generate {
                events: 5,
                seed: Some(9),
                ..
            }
        ));
    }

    #[test]
    fn test_dump_args() {
        let cli = Cli::try_parse_from(["test", "dump", "run.dat", "--block", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Dump { block: 3, .. }));
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(Cli::try_parse_from(["test"]).is_err());
    }
}
