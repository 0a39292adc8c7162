//! CLI argument definitions for tracegraph.

use crate::models::{Layer, Severity, Status, WorkType};
use crate::storage::StoragePreference;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

/// tracegraph - Layered traceability from goals down to runnable commands.
///
/// Start with `tg storage status` to see which backend is active, then
/// `tg graph analyze` to check the hierarchy.
#[derive(Parser, Debug)]
#[command(name = "tg")]
#[command(author, version = VERSION, about = "Track a layered traceability graph across database and file stores", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if tg was started in <path> instead of the current directory.
    /// Can also be set via TG_ROOT environment variable.
    #[arg(short = 'C', long = "root", global = true, env = "TG_ROOT")]
    pub root: Option<PathBuf>,

    /// Storage preference: auto, relational-only, flat-file-only, postgres, sqlite
    #[arg(long, global = true)]
    pub storage: Option<StoragePreference>,

    /// Connection string (postgres://… or sqlite:…), overriding TG_DATABASE_URL
    #[arg(long = "database-url", global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Package version plus the commit and time the binary was built.
const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TG_GIT_COMMIT"),
    " ",
    env!("TG_BUILD_TIMESTAMP"),
    ")"
);

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Node CRUD and search
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },

    /// Inspect backend selection
    Storage {
        #[command(subcommand)]
        command: StorageCommands,
    },

    /// Move nodes between the YAML files and the database
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Graph analysis and traceability reports
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },

    /// Structural checks over every node
    Check {
        #[command(subcommand)]
        command: CheckCommands,
    },

    /// Generate and run command nodes
    Cmd {
        #[command(subcommand)]
        command: CmdCommands,
    },

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Node subcommands
#[derive(Subcommand, Debug)]
pub enum NodeCommands {
    /// Create a new node
    Create {
        /// Layer name or id prefix (goal, STRAT, criteria, CMD, ...)
        layer: Layer,

        /// Node title
        title: String,

        /// Explicit id (generated from the title when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Free-text description
        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        status: Option<Status>,

        /// Completion percentage (0-100)
        #[arg(long)]
        progress: Option<u8>,

        /// Parent node id (repeatable)
        #[arg(long = "parent")]
        parents: Vec<String>,

        /// Child node id (repeatable)
        #[arg(long = "child")]
        children: Vec<String>,

        #[arg(long)]
        owner: Option<String>,

        /// Label (repeatable)
        #[arg(short, long = "label")]
        labels: Vec<String>,

        #[arg(long)]
        severity: Option<Severity>,

        #[arg(long)]
        work_type: Option<WorkType>,

        #[arg(long)]
        assignee: Option<String>,

        /// Shell line for a command node
        #[arg(long)]
        shell: Option<String>,

        /// Criteria node the command verifies
        #[arg(long, requires = "shell")]
        ac_ref: Option<String>,

        /// Working directory for the command, relative to the workspace root
        #[arg(long, requires = "shell")]
        workdir: Option<String>,

        /// Environment variable for the command as KEY=VALUE (repeatable)
        #[arg(long = "env", requires = "shell")]
        env: Vec<String>,

        /// Expected artifact path (repeatable)
        #[arg(long = "artifact", requires = "shell")]
        artifacts: Vec<String>,
    },

    /// Show a node by id
    Show {
        /// Node id (e.g., GOAL-LAUNCH)
        id: String,
    },

    /// Update fields of an existing node
    Update {
        /// Node id
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        status: Option<Status>,

        #[arg(long, conflicts_with = "clear_progress")]
        progress: Option<u8>,

        /// Remove the progress value
        #[arg(long)]
        clear_progress: bool,

        #[arg(long)]
        owner: Option<String>,

        /// Replace the label set (repeatable)
        #[arg(short, long = "label")]
        labels: Vec<String>,

        /// Replace the parent set (repeatable)
        #[arg(long = "parent")]
        parents: Vec<String>,

        /// Replace the child set (repeatable)
        #[arg(long = "child")]
        children: Vec<String>,

        #[arg(long)]
        severity: Option<Severity>,

        #[arg(long)]
        work_type: Option<WorkType>,

        #[arg(long)]
        assignee: Option<String>,
    },

    /// Delete a node (children are left in place)
    Delete {
        /// Node id
        id: String,
    },

    /// List nodes grouped by layer
    List {
        /// Only this layer
        #[arg(long)]
        layer: Option<Layer>,
    },

    /// Search nodes
    Search {
        /// Case-insensitive text matched against id, title and description
        text: Option<String>,

        #[arg(long)]
        layer: Option<Layer>,

        #[arg(long)]
        status: Option<Status>,

        #[arg(long)]
        label: Option<String>,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        assignee: Option<String>,
    },
}

/// Storage subcommands
#[derive(Subcommand, Debug)]
pub enum StorageCommands {
    /// Show the selected backend and every probe made to choose it
    Status,
}

/// Sync subcommands
#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Import YAML node files into the database
    Import {
        /// Overwrite database rows whose id already exists
        #[arg(long)]
        force: bool,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Export database nodes to YAML files
    Export {
        /// Target directory (defaults to the configured nodes dir)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Overwrite existing files without keeping a .bak copy
        #[arg(long)]
        no_backup: bool,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare the files with the database
    Check,
}

/// Graph subcommands
#[derive(Subcommand, Debug)]
pub enum GraphCommands {
    /// Full analysis; writes the traceability matrix and dependency graph
    Analyze {
        /// Report directory (defaults to the configured reports dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List parent/child cycles
    Cycles,

    /// List non-top nodes without a parent
    Orphans,
}

/// Check subcommands
#[derive(Subcommand, Debug)]
pub enum CheckCommands {
    /// Executable content only on terminal nodes, and every terminal node runnable
    Separation,

    /// Validate every node's fields and every node file
    Schema,

    /// Every parent and child link points at an existing node
    Links,
}

/// Command-node subcommands
#[derive(Subcommand, Debug)]
pub enum CmdCommands {
    /// Create command nodes for criteria nodes that lack one
    Generate {
        /// Also regenerate for criteria nodes that already have a command
        #[arg(long)]
        force: bool,
    },

    /// Run one command node or all of them
    #[command(group(ArgGroup::new("target").required(true).args(["id", "all"])))]
    Run {
        /// Command node id
        id: Option<String>,

        /// Run every command node in parallel
        #[arg(long)]
        all: bool,

        /// Print what would run without spawning anything
        #[arg(long)]
        dry_run: bool,

        /// Worker threads for --all
        #[arg(short, long)]
        jobs: Option<usize>,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show every resolved setting and where it came from
    Show,
}
