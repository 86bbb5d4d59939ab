use crate::init_config::CmdConfig;
use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;
use keel_core::Role;
use std::path::PathBuf;

mod cmd;
mod helpers;
mod init_config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// trust config file to use instead of ~/.config/keel/trust.toml
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the trust config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Create a fresh repository with new keys for every role
    Init {
        /// Replace an already initialized repository, discarding its
        /// targets, delegations and keys
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Manage target files
    Targets {
        #[command(subcommand)]
        cmd: TargetsCmd,
    },
    /// Manage delegated targets roles
    Delegations {
        #[command(subcommand)]
        cmd: DelegationsCmd,
    },
    /// Key rotation and export
    Keys {
        #[command(subcommand)]
        cmd: KeysCmd,
    },
    /// Keep snapshot and timestamp metadata fresh
    Refresh {
        #[command(subcommand)]
        cmd: RefreshCmd,
    },
    /// Print versions, expiry and key overview as JSON
    Status,
    /// List metadata that has already expired; exits non-zero if any
    CheckExpiry,
    /// Print the signed metadata document of a role
    Metadata {
        /// root, targets, snapshot or timestamp
        role: Role,
    },
}

#[derive(Subcommand)]
enum TargetsCmd {
    /// Record a local file as a target
    Add {
        /// Target name, e.g. app/image.tar
        name: String,
        /// Local file with the target contents
        path: PathBuf,
        /// Optional JSON object stored as the target's custom metadata
        #[arg(long, value_name = "JSON")]
        custom: Option<String>,
    },
    /// Remove a target and its stored file
    Remove { name: String },
    /// Print a target entry
    Get { name: String },
    /// List all targets
    List,
    /// Check a local file against the recorded length and hash
    Verify { name: String, path: PathBuf },
}

#[derive(Subcommand)]
enum DelegationsCmd {
    /// Delegate a set of path patterns to a new role
    Add {
        name: String,
        /// Path pattern, may be repeated
        #[arg(short, long = "path", value_name = "PATTERN", required = true)]
        paths: Vec<String>,
        /// Signatures required from the delegated role
        #[arg(short, long, default_value_t = 1)]
        threshold: u32,
        /// Stop lookup of further delegations for matching paths
        #[arg(long, action = ArgAction::SetTrue)]
        terminating: bool,
    },
    /// Remove a delegated role
    Remove { name: String },
    /// List delegated roles
    List,
}

#[derive(Subcommand)]
enum KeysCmd {
    /// Replace the keys of a role; old keys co-sign until the current
    /// timestamp expires
    Rotate { role: Role },
    /// Print every public key the repository lists
    Export,
}

#[derive(Subcommand)]
enum RefreshCmd {
    /// Bump the timestamp and extend its expiry
    Timestamp,
    /// Run one maintenance pass: refresh what is about to expire and prune
    /// retired keys
    Auto,
    /// Run maintenance passes periodically until interrupted
    Watch {
        #[arg(long, value_name = "SECONDS", default_value_t = 300)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // stdout carries command output; logs go to stderr
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    // Configs live under ~/.config/keel/, repository data under
    // ~/.local/share/keel/ unless the config says otherwise.
    let dirs =
        ProjectDirs::from("", "", "keel").context("failed to determine config directory path")?;
    let config_file = cli
        .config
        .unwrap_or_else(|| dirs.config_dir().join("trust.toml"));

    cmd::run_command(config_file, dirs.data_dir(), cli.cmd).await
}
