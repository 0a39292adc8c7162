//! Command pipeline: generate command nodes for criteria and run them.
//!
//! Generation reads criteria-layer nodes, picks a stub per node from the
//! [`rules`] table, and writes a linked command-layer node through the
//! repository. Execution runs command nodes out of process via a
//! [`CommandRunner`] and records each run in `<log_dir>/<ID>.log`.

pub mod rules;
pub mod runner;

pub use rules::{StubRule, StubTemplate, default_rules, select_rule};
pub use runner::{CommandRunner, RunOutput, ShellRunner};

use crate::models::{Layer, NewNode, Node, NodePatch, NodeQuery};
use crate::repository::NodeRepository;
use crate::storage::generate_id;
use crate::{Error, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default number of concurrent commands for `ExecTarget::All`.
pub const DEFAULT_JOBS: usize = 4;

/// Which command nodes to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecTarget {
    One(String),
    All,
}

/// Outcome of running (or dry-running) one command node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub id: String,
    pub command: String,
    pub workdir: PathBuf,
    pub dry_run: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct CommandPipeline {
    rules: Vec<StubRule>,
    runner: Arc<dyn CommandRunner>,
    workspace_root: PathBuf,
    log_dir: PathBuf,
    jobs: usize,
}

impl CommandPipeline {
    /// Pipeline with the built-in rules and a real shell runner.
    pub fn new(workspace_root: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules: default_rules(),
            runner: Arc::new(ShellRunner),
            workspace_root: workspace_root.into(),
            log_dir: log_dir.into(),
            jobs: DEFAULT_JOBS,
        }
    }

    pub fn with_rules(mut self, rules: Vec<StubRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn rules(&self) -> &[StubRule] {
        &self.rules
    }

    /// Create a command node for every criteria node that has none yet
    /// (every criteria node when `force`). Returns the created nodes.
    pub fn generate_stubs(&self, repo: &mut NodeRepository, force: bool) -> Result<Vec<Node>> {
        let all = repo.all_nodes()?;
        let criteria: Vec<&Node> = all.iter().filter(|n| n.layer == Layer::Criteria).collect();
        let mut created = Vec::new();

        for ac in criteria {
            if !force && has_command_child(ac, &all) {
                tracing::debug!(id = %ac.id, "criteria already has a command node");
                continue;
            }
            let Some(rule) = select_rule(&self.rules, ac) else {
                tracing::warn!(id = %ac.id, "no stub rule matched");
                continue;
            };

            let id = generate_id(Layer::Command, &ac.id, |candidate| {
                Ok(repo.read(candidate)?.is_some())
            })?;
            let new = NewNode::new(Layer::Command, format!("Verify: {}", ac.title))
                .with_id(&id)
                .with_description(format!("Generated by the '{}' stub rule.", rule.name))
                .with_parent(&ac.id)
                .with_command(rule.template.render(ac));
            let node = repo.create(new)?;

            // Re-read so stubs created earlier in this run are kept.
            if let Some(current) = repo.read(&ac.id)? {
                let mut children = current.links.children.clone();
                children.insert(node.id.clone());
                let patch = NodePatch {
                    children: Some(children),
                    ..Default::default()
                };
                repo.update(&ac.id, &patch)?;
            }

            tracing::info!(criteria = %ac.id, command = %node.id, rule = %rule.name, "generated command stub");
            created.push(node);
        }
        Ok(created)
    }

    /// Execute one command node or all of them.
    ///
    /// A non-zero exit is reported in the result and never aborts a batch.
    pub fn execute(
        &self,
        repo: &NodeRepository,
        target: ExecTarget,
        dry_run: bool,
    ) -> Result<Vec<ExecutionResult>> {
        let nodes = match target {
            ExecTarget::One(id) => {
                let node = repo
                    .read(&id)?
                    .ok_or_else(|| Error::NotFound(id.clone()))?;
                if node.command.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "Node {} has no command to run",
                        id
                    )));
                }
                vec![node]
            }
            ExecTarget::All => {
                let query = NodeQuery {
                    layer: Some(Layer::Command),
                    ..Default::default()
                };
                repo.search(&query)?
                    .into_iter()
                    .filter(|n| n.command.is_some())
                    .collect()
            }
        };

        if nodes.len() <= 1 {
            return Ok(nodes.iter().map(|n| self.run_node(n, dry_run)).collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| Error::Other(format!("Failed to start worker pool: {}", e)))?;
        Ok(pool.install(|| nodes.par_iter().map(|n| self.run_node(n, dry_run)).collect()))
    }

    fn run_node(&self, node: &Node, dry_run: bool) -> ExecutionResult {
        let Some(command) = node.command.as_ref() else {
            return ExecutionResult {
                id: node.id.clone(),
                command: String::new(),
                workdir: self.workspace_root.clone(),
                dry_run,
                exit_code: -1,
                stdout: String::new(),
                stderr: "node has no command payload".to_string(),
                log_path: None,
            };
        };
        let workdir = resolve_workdir(&self.workspace_root, &command.run.workdir);
        let mut result = ExecutionResult {
            id: node.id.clone(),
            command: command.run.shell.clone(),
            workdir: workdir.clone(),
            dry_run,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            log_path: None,
        };
        if dry_run {
            return result;
        }

        let mut spec = command.run.clone();
        spec.workdir = workdir.display().to_string();
        match self.runner.run(&spec) {
            Ok(output) => {
                result.exit_code = output.exit_code;
                result.stdout = output.stdout;
                result.stderr = output.stderr;
            }
            Err(e) => {
                result.exit_code = -1;
                result.stderr = format!("failed to run command: {}", e);
            }
        }
        if !result.success() {
            tracing::warn!(id = %node.id, exit_code = result.exit_code, "command failed");
        }

        match write_log(&self.log_dir, &result) {
            Ok(path) => result.log_path = Some(path),
            Err(e) => tracing::warn!(id = %node.id, error = %e, "could not write execution log"),
        }
        result
    }
}

/// True when some command-layer node already covers this criteria node.
fn has_command_child(criteria: &Node, all: &[Node]) -> bool {
    let declared: BTreeSet<&str> = criteria
        .links
        .children
        .iter()
        .filter(|c| Layer::from_id(c) == Some(Layer::Command))
        .map(String::as_str)
        .collect();
    !declared.is_empty()
        || all.iter().any(|n| {
            n.layer == Layer::Command
                && (n.links.parents.contains(&criteria.id)
                    || n.command.as_ref().is_some_and(|c| c.ac_ref == criteria.id))
        })
}

fn resolve_workdir(root: &Path, workdir: &str) -> PathBuf {
    let path = Path::new(workdir);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Write `<log_dir>/<ID>.log` for one run.
fn write_log(log_dir: &Path, result: &ExecutionResult) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("{}.log", result.id));
    let content = format!(
        "command: {}\nexit_code: {}\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
        result.command, result.exit_code, result.stdout, result.stderr
    );
    fs::write(&path, content)?;
    Ok(path)
}
