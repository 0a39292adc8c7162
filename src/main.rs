//! tracegraph CLI - layered traceability from goals down to runnable commands.

use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::process;
use tracegraph::cli::{
    CheckCommands, Cli, CmdCommands, Commands, ConfigCommands, GraphCommands, NodeCommands,
    StorageCommands, SyncCommands,
};
use tracegraph::commands::{self, NodeCreateArgs, NodeUpdateArgs, Output};
use tracegraph::config::{ConfigOverrides, OutputFormat, ResolvedConfig, resolve_config};
use tracegraph::models::NodeQuery;
use tracegraph::pipeline::ExecTarget;
use tracing_subscriber::EnvFilter;

/// Filter applied when `TG_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "tracegraph=warn";

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let mut human = cli.human_readable;

    let root = resolve_root(cli.root, human);

    let mut overrides = ConfigOverrides::new();
    if let Some(storage) = cli.storage {
        overrides = overrides.with_storage(storage);
    }
    if let Some(url) = cli.database_url {
        overrides = overrides.with_database_url(url);
    }
    if let Commands::Cmd {
        command: CmdCommands::Run { jobs: Some(jobs), .. },
    } = &cli.command
    {
        overrides = overrides.with_jobs(*jobs);
    }
    if human {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }

    let result = resolve_config(&root, &overrides).and_then(|config| {
        human = config.output_format() == OutputFormat::Human;
        run_command(cli.command, &config, human)
    });

    if let Err(e) = result {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("TG_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Priority: -C/--root flag > TG_ROOT env var > current working directory
fn resolve_root(explicit_path: Option<PathBuf>, human: bool) -> PathBuf {
    match explicit_path {
        Some(path) => {
            if !path.is_dir() {
                let message = format!("Specified root does not exist: {}", path.display());
                if human {
                    eprintln!("Error: {}", message);
                } else {
                    eprintln!("{}", serde_json::json!({ "error": message }));
                }
                process::exit(1);
            }
            path
        }
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn run_command(
    command: Commands,
    config: &ResolvedConfig,
    human: bool,
) -> Result<(), tracegraph::Error> {
    match command {
        Commands::Node { command } => match command {
            NodeCommands::Create {
                layer,
                title,
                id,
                description,
                status,
                progress,
                parents,
                children,
                owner,
                labels,
                severity,
                work_type,
                assignee,
                shell,
                ac_ref,
                workdir,
                env,
                artifacts,
            } => {
                let args = NodeCreateArgs {
                    id,
                    description,
                    status,
                    progress,
                    parents,
                    children,
                    owner,
                    labels,
                    severity,
                    work_type,
                    assignee,
                    shell,
                    ac_ref,
                    workdir,
                    env,
                    artifacts,
                };
                let result = commands::node_create(config, layer, title, args)?;
                output(&result, human);
            }

            NodeCommands::Show { id } => {
                let result = commands::node_show(config, &id)?;
                output(&result, human);
            }

            NodeCommands::Update {
                id,
                title,
                description,
                status,
                progress,
                clear_progress,
                owner,
                labels,
                parents,
                children,
                severity,
                work_type,
                assignee,
            } => {
                let args = NodeUpdateArgs {
                    title,
                    description,
                    status,
                    progress,
                    clear_progress,
                    owner,
                    labels,
                    parents,
                    children,
                    severity,
                    work_type,
                    assignee,
                };
                let result = commands::node_update(config, &id, args)?;
                output(&result, human);
            }

            NodeCommands::Delete { id } => {
                let result = commands::node_delete(config, &id)?;
                output(&result, human);
            }

            NodeCommands::List { layer } => {
                let result = commands::node_list(config, layer)?;
                output(&result, human);
            }

            NodeCommands::Search {
                text,
                layer,
                status,
                label,
                owner,
                assignee,
            } => {
                let query = NodeQuery {
                    layer,
                    status,
                    label,
                    owner,
                    assignee,
                    text,
                };
                let result = commands::node_search(config, &query)?;
                output(&result, human);
            }
        },

        Commands::Storage { command } => match command {
            StorageCommands::Status => {
                let result = commands::storage_status(config)?;
                output(&result, human);
            }
        },

        Commands::Sync { command } => match command {
            SyncCommands::Import { force, dry_run } => {
                let result = commands::sync_import(config, force, dry_run)?;
                output(&result, human);
            }
            SyncCommands::Export {
                out,
                no_backup,
                dry_run,
            } => {
                let result = commands::sync_export(config, out, !no_backup, dry_run)?;
                output(&result, human);
            }
            SyncCommands::Check => {
                let result = commands::sync_check(config)?;
                output(&result, human);
            }
        },

        Commands::Graph { command } => match command {
            GraphCommands::Analyze { out } => {
                let result = commands::graph_analyze(config, out)?;
                output(&result, human);
            }
            GraphCommands::Cycles => {
                let result = commands::graph_cycles(config)?;
                output(&result, human);
            }
            GraphCommands::Orphans => {
                let result = commands::graph_orphans(config)?;
                output(&result, human);
            }
        },

        Commands::Check { command } => match command {
            CheckCommands::Separation => {
                let result = commands::check_separation_cmd(config)?;
                output(&result, human);
            }
            CheckCommands::Schema => {
                let result = commands::check_schema(config)?;
                output(&result, human);
            }
            CheckCommands::Links => {
                let result = commands::check_links_cmd(config)?;
                output(&result, human);
            }
        },

        Commands::Cmd { command } => match command {
            CmdCommands::Generate { force } => {
                let result = commands::cmd_generate(config, force)?;
                output(&result, human);
            }
            CmdCommands::Run { id, all, dry_run, .. } => {
                let target = match (id, all) {
                    (Some(id), false) => ExecTarget::One(id),
                    _ => ExecTarget::All,
                };
                let result = commands::cmd_run(config, target, dry_run)?;
                output(&result, human);

                // Failing commands fail the invocation, after their output is shown
                if !result.all_passed() {
                    process::exit(1);
                }
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let result = commands::config_show(config);
                output(&result, human);
            }
        },
    }

    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
