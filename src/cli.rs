use clap::{Parser, Subcommand};

/// RepoHub package sync engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show sync state for one target or all of them
    Status {
        /// Sync target (debian, ubuntu, windows, macos, fedora, arch, aur)
        target: Option<String>,
    },
    /// Run a sync for one target and follow its progress
    Sync {
        /// Sync target (debian, ubuntu, windows, macos, fedora, arch, aur)
        target: String,
        /// Shared sync secret
        #[arg(short, long)]
        secret: Option<String>,
    },
    /// Sweep every target if a sweep is due
    AutoSync {
        /// Shared sync secret
        #[arg(short, long)]
        secret: Option<String>,
    },
    /// Show auto sync schedule
    AutoSyncStatus,
    /// Seed the platform table with the default platforms
    InitPlatforms {
        /// Shared sync secret
        #[arg(short, long)]
        secret: Option<String>,
    },
    /// List platforms
    Platforms,
}
