//! Command implementations for the tracegraph CLI.
//!
//! Each command opens what it needs from a [`ResolvedConfig`], does its work
//! through the library, and returns a result type implementing [`Output`].
//! Commands are grouped by subcommand:
//! - `node_*` - Node CRUD and search
//! - `storage_status` - Backend selection report
//! - `sync_*` - File/database synchronization
//! - `graph_*` - Graph analysis and reports
//! - `check_*` - Separation and schema checks
//! - `cmd_*` - Command-node generation and execution
//! - `config_show` - Resolved settings

use crate::config::{ResolvedConfig, ValueSource};
use crate::models::graph::{GraphAnalysis, GraphEdge, GraphIndex};
use crate::models::separation::check_separation;
use crate::models::validation::{ValidationReport, Violation, check_links, validate_node};
use crate::models::{
    CommandPayload, Layer, Links, Metadata, NewNode, Node, NodePatch, NodeQuery, RunSpec,
    Severity, Status, WorkType,
};
use crate::pipeline::{CommandPipeline, ExecTarget, ExecutionResult};
use crate::report::{ReportPaths, write_reports};
use crate::repository::NodeRepository;
use crate::storage::{BackendKind, FlatFileAdapter, ProbeAttempt, StoragePreference, StorageRouter};
use crate::sync::{ExportSummary, ImportSummary, SyncEngine, SyncIssue, SyncStatus};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to a single-line JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

fn open_repository(config: &ResolvedConfig) -> Result<NodeRepository> {
    NodeRepository::open(&config.repository_config())
}

// === Node Commands ===

/// Fields accepted by `node create`.
#[derive(Debug, Clone, Default)]
pub struct NodeCreateArgs {
    pub id: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub progress: Option<u8>,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    pub owner: Option<String>,
    pub labels: Vec<String>,
    pub severity: Option<Severity>,
    pub work_type: Option<WorkType>,
    pub assignee: Option<String>,
    pub shell: Option<String>,
    pub ac_ref: Option<String>,
    pub workdir: Option<String>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub artifacts: Vec<String>,
}

#[derive(Serialize)]
pub struct NodeCreated {
    pub id: String,
    pub layer: Layer,
    pub title: String,
    pub backend: BackendKind,
}

impl Output for NodeCreated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Created {} {}: {} ({})",
            self.layer, self.id, self.title, self.backend
        )
    }
}

fn parse_env(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(Error::InvalidInput(format!(
                "Expected KEY=VALUE for --env, got {}",
                pair
            ))),
        })
        .collect()
}

/// Create a node.
pub fn node_create(
    config: &ResolvedConfig,
    layer: Layer,
    title: String,
    args: NodeCreateArgs,
) -> Result<NodeCreated> {
    let command = match args.shell {
        Some(shell) => {
            let mut run = RunSpec::new(shell);
            if let Some(workdir) = args.workdir {
                run.workdir = workdir;
            }
            run.env = parse_env(&args.env)?;
            Some(CommandPayload {
                ac_ref: args.ac_ref.unwrap_or_default(),
                run,
                artifacts: args.artifacts,
            })
        }
        None => None,
    };

    let new = NewNode {
        id: args.id,
        layer,
        title,
        description: args.description.unwrap_or_default(),
        status: args.status.unwrap_or_default(),
        progress: args.progress,
        metadata: Metadata {
            owner: args.owner,
            labels: args.labels.into_iter().collect(),
            severity: args.severity,
            work_type: args.work_type,
            assignee: args.assignee,
        },
        links: Links {
            parents: args.parents.into_iter().collect(),
            children: args.children.into_iter().collect(),
        },
        command,
    };

    let mut repo = open_repository(config)?;
    let node = repo.create(new)?;
    Ok(NodeCreated {
        id: node.id,
        layer: node.layer,
        title: node.title,
        backend: repo.backend(),
    })
}

/// A single node, as stored.
#[derive(Serialize)]
#[serde(transparent)]
pub struct NodeShow {
    pub node: Node,
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

impl Output for NodeShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let node = &self.node;
        let mut lines = vec![
            format!("{} [{}] {}", node.id, node.layer, node.title),
            format!("  Status: {}", node.status),
        ];
        if let Some(progress) = node.progress {
            lines.push(format!("  Progress: {}%", progress));
        }
        if let Some(ref owner) = node.metadata.owner {
            lines.push(format!("  Owner: {}", owner));
        }
        if let Some(ref assignee) = node.metadata.assignee {
            lines.push(format!("  Assignee: {}", assignee));
        }
        if let Some(severity) = node.metadata.severity {
            lines.push(format!("  Severity: {}", severity.as_str()));
        }
        if let Some(work_type) = node.metadata.work_type {
            lines.push(format!("  Type: {}", work_type.as_str()));
        }
        if !node.metadata.labels.is_empty() {
            lines.push(format!("  Labels: {}", join(&node.metadata.labels)));
        }
        if !node.links.parents.is_empty() {
            lines.push(format!("  Parents: {}", join(&node.links.parents)));
        }
        if !node.links.children.is_empty() {
            lines.push(format!("  Children: {}", join(&node.links.children)));
        }
        if let Some(ref command) = node.command {
            lines.push(format!("  Command: {} (in {})", command.run.shell, command.run.workdir));
            if !command.ac_ref.is_empty() {
                lines.push(format!("  Verifies: {}", command.ac_ref));
            }
            if !command.artifacts.is_empty() {
                lines.push(format!("  Artifacts: {}", command.artifacts.join(", ")));
            }
        }
        if !node.description.is_empty() {
            lines.push(String::new());
            lines.push(format!("  {}", node.description.replace('\n', "\n  ")));
        }
        lines.join("\n")
    }
}

/// Show a node.
pub fn node_show(config: &ResolvedConfig, id: &str) -> Result<NodeShow> {
    let repo = open_repository(config)?;
    let node = repo.read(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
    Ok(NodeShow { node })
}

/// Fields accepted by `node update`. Empty lists leave the set unchanged.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdateArgs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub progress: Option<u8>,
    pub clear_progress: bool,
    pub owner: Option<String>,
    pub labels: Vec<String>,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    pub severity: Option<Severity>,
    pub work_type: Option<WorkType>,
    pub assignee: Option<String>,
}

impl NodeUpdateArgs {
    fn into_patch(self) -> (NodePatch, Vec<&'static str>) {
        let set = |values: Vec<String>| (!values.is_empty()).then(|| values.into_iter().collect());
        let patch = NodePatch {
            title: self.title,
            description: self.description,
            status: self.status,
            progress: if self.clear_progress {
                Some(None)
            } else {
                self.progress.map(Some)
            },
            owner: self.owner,
            labels: set(self.labels),
            severity: self.severity,
            work_type: self.work_type,
            assignee: self.assignee,
            parents: set(self.parents),
            children: set(self.children),
            command: None,
        };

        let mut fields = Vec::new();
        for (name, present) in [
            ("title", patch.title.is_some()),
            ("description", patch.description.is_some()),
            ("status", patch.status.is_some()),
            ("progress", patch.progress.is_some()),
            ("owner", patch.owner.is_some()),
            ("labels", patch.labels.is_some()),
            ("severity", patch.severity.is_some()),
            ("work_type", patch.work_type.is_some()),
            ("assignee", patch.assignee.is_some()),
            ("parents", patch.parents.is_some()),
            ("children", patch.children.is_some()),
        ] {
            if present {
                fields.push(name);
            }
        }
        (patch, fields)
    }
}

#[derive(Serialize)]
pub struct NodeUpdated {
    pub id: String,
    pub updated_fields: Vec<&'static str>,
}

impl Output for NodeUpdated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Updated {} ({})", self.id, self.updated_fields.join(", "))
    }
}

/// Update a node.
pub fn node_update(config: &ResolvedConfig, id: &str, args: NodeUpdateArgs) -> Result<NodeUpdated> {
    let (patch, updated_fields) = args.into_patch();
    if patch.is_empty() {
        return Err(Error::InvalidInput("No fields to update".to_string()));
    }
    let mut repo = open_repository(config)?;
    repo.update(id, &patch)?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    Ok(NodeUpdated {
        id: id.to_string(),
        updated_fields,
    })
}

#[derive(Serialize)]
pub struct NodeDeleted {
    pub id: String,
    /// False when there was nothing to delete
    pub deleted: bool,
}

impl Output for NodeDeleted {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.deleted {
            format!("Deleted {}", self.id)
        } else {
            format!("{} does not exist; nothing deleted", self.id)
        }
    }
}

/// Delete a node. Deleting an absent id succeeds.
pub fn node_delete(config: &ResolvedConfig, id: &str) -> Result<NodeDeleted> {
    let mut repo = open_repository(config)?;
    let deleted = repo.read(id)?.is_some();
    repo.delete(id)?;
    Ok(NodeDeleted {
        id: id.to_string(),
        deleted,
    })
}

#[derive(Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub layer: Layer,
    pub title: String,
    pub status: Status,
}

impl From<Node> for NodeSummary {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            layer: node.layer,
            title: node.title,
            status: node.status,
        }
    }
}

#[derive(Serialize)]
pub struct NodeList {
    pub count: usize,
    pub nodes: Vec<NodeSummary>,
}

impl NodeList {
    fn new(nodes: Vec<Node>) -> Self {
        Self {
            count: nodes.len(),
            nodes: nodes.into_iter().map(NodeSummary::from).collect(),
        }
    }
}

impl Output for NodeList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.nodes.is_empty() {
            return "No nodes found.".to_string();
        }
        let mut lines = vec![format!("{} node(s):", self.count)];
        let mut current: Option<Layer> = None;
        for node in &self.nodes {
            if current != Some(node.layer) {
                lines.push(String::new());
                lines.push(format!("{}:", node.layer));
                current = Some(node.layer);
            }
            lines.push(format!("  {} [{}] {}", node.id, node.status, node.title));
        }
        lines.join("\n")
    }
}

/// List nodes in layer then id order.
pub fn node_list(config: &ResolvedConfig, layer: Option<Layer>) -> Result<NodeList> {
    let repo = open_repository(config)?;
    let nodes = match layer {
        Some(layer) => repo.list()?.remove(&layer).unwrap_or_default(),
        None => repo.all_nodes()?,
    };
    Ok(NodeList::new(nodes))
}

/// Search nodes.
pub fn node_search(config: &ResolvedConfig, query: &NodeQuery) -> Result<NodeList> {
    let repo = open_repository(config)?;
    let mut nodes = repo.search(query)?;
    nodes.sort_by(|a, b| (a.layer, &a.id).cmp(&(b.layer, &b.id)));
    Ok(NodeList::new(nodes))
}

// === Storage Commands ===

#[derive(Serialize)]
pub struct StorageStatus {
    pub preference: StoragePreference,
    pub backend: BackendKind,
    pub location: String,
    pub attempts: Vec<ProbeAttempt>,
}

impl Output for StorageStatus {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Backend: {} ({})", self.backend, self.location),
            format!("Preference: {}", self.preference),
            "Probes:".to_string(),
        ];
        for attempt in &self.attempts {
            let mark = if attempt.ok { "ok" } else { "unavailable" };
            lines.push(format!("  {}: {} - {}", attempt.kind, mark, attempt.detail));
        }
        lines.join("\n")
    }
}

/// Report the router's decision.
pub fn storage_status(config: &ResolvedConfig) -> Result<StorageStatus> {
    let settings = config.repository_config().router;
    let preference = settings.preference;
    let selection = StorageRouter::new(settings).select()?;
    Ok(StorageStatus {
        preference,
        backend: selection.kind,
        location: selection.descriptor.display_location(),
        attempts: selection.attempts,
    })
}

// === Sync Commands ===

/// Sync needs a relational backend on the database side; auto-import is
/// skipped so the explicit import reports real counts.
fn open_sync_engine(config: &ResolvedConfig) -> Result<SyncEngine> {
    let mut repo_config = config.repository_config();
    repo_config.auto_import = false;
    let repo = NodeRepository::open(&repo_config)?;
    if !repo.backend().is_relational() {
        return Err(Error::Configuration(format!(
            "sync requires a relational backend, but the active backend is {}",
            repo.backend()
        )));
    }
    Ok(SyncEngine::new(
        FlatFileAdapter::new(&config.nodes_dir.value),
        repo.into_store(),
    ))
}

fn issue_lines(issues: &[SyncIssue]) -> Vec<String> {
    issues
        .iter()
        .map(|i| format!("  {}: {}", i.source, i.message))
        .collect()
}

#[derive(Serialize)]
pub struct SyncImported {
    pub dry_run: bool,
    #[serde(flatten)]
    pub summary: ImportSummary,
}

impl Output for SyncImported {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let verb = if self.dry_run { "Would import" } else { "Imported" };
        let mut lines = vec![format!(
            "{} {} node(s), skipped {}, {} error(s)",
            verb,
            self.summary.imported,
            self.summary.skipped,
            self.summary.errors.len()
        )];
        lines.extend(issue_lines(&self.summary.errors));
        lines.join("\n")
    }
}

pub fn sync_import(config: &ResolvedConfig, force: bool, dry_run: bool) -> Result<SyncImported> {
    let mut engine = open_sync_engine(config)?;
    let summary = engine.import_files(force, dry_run)?;
    Ok(SyncImported { dry_run, summary })
}

#[derive(Serialize)]
pub struct SyncExported {
    pub dry_run: bool,
    #[serde(flatten)]
    pub summary: ExportSummary,
}

impl Output for SyncExported {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let verb = if self.dry_run { "Would export" } else { "Exported" };
        let mut lines = vec![format!(
            "{} {} node(s), backed up {}, {} error(s)",
            verb,
            self.summary.exported,
            self.summary.backed_up,
            self.summary.errors.len()
        )];
        lines.extend(issue_lines(&self.summary.errors));
        lines.join("\n")
    }
}

pub fn sync_export(
    config: &ResolvedConfig,
    out: Option<PathBuf>,
    backup: bool,
    dry_run: bool,
) -> Result<SyncExported> {
    let engine = open_sync_engine(config)?;
    let out = out.map(|dir| config.root.join(dir));
    let summary = engine.export_to_files(out.as_deref(), backup, dry_run)?;
    Ok(SyncExported { dry_run, summary })
}

#[derive(Serialize)]
pub struct SyncChecked {
    pub in_sync: bool,
    #[serde(flatten)]
    pub status: SyncStatus,
}

impl Output for SyncChecked {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![if self.in_sync {
            "Files and database are in sync.".to_string()
        } else {
            "Files and database differ.".to_string()
        }];
        for (label, ids) in [
            ("Only in files", &self.status.file_only),
            ("Only in database", &self.status.db_only),
            ("Divergent", &self.status.divergent),
        ] {
            if !ids.is_empty() {
                lines.push(format!("  {}: {}", label, ids.join(", ")));
            }
        }
        lines.push(format!("  In both: {}", self.status.both.len()));
        lines.join("\n")
    }
}

pub fn sync_check(config: &ResolvedConfig) -> Result<SyncChecked> {
    let engine = open_sync_engine(config)?;
    let status = engine.check_sync()?;
    Ok(SyncChecked {
        in_sync: status.in_sync(),
        status,
    })
}

// === Graph Commands ===

fn load_index(config: &ResolvedConfig) -> Result<GraphIndex> {
    let repo = open_repository(config)?;
    Ok(GraphIndex::build(&repo.all_nodes()?))
}

#[derive(Serialize)]
pub struct GraphAnalyzed {
    #[serde(flatten)]
    pub analysis: GraphAnalysis,
    pub reports: ReportPaths,
}

fn edge_list(edges: &[GraphEdge]) -> String {
    edges
        .iter()
        .map(|e| format!("{} -> {}", e.source, e.target))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Output for GraphAnalyzed {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let a = &self.analysis;
        let mut lines = vec![format!(
            "{} node(s), {} edge(s), {} component(s)",
            a.node_count, a.edge_count, a.component_count
        )];
        if a.cycles.is_empty() {
            lines.push("No cycles.".to_string());
        } else {
            lines.push(format!("{} cycle(s):", a.cycles.len()));
            for cycle in &a.cycles {
                lines.push(format!("  {}", cycle.join(" -> ")));
            }
        }
        if a.orphans.is_empty() {
            lines.push("No orphans.".to_string());
        } else {
            lines.push(format!("Orphans: {}", a.orphans.join(", ")));
        }
        if !a.dangling.is_empty() {
            lines.push(format!("Dangling links: {}", edge_list(&a.dangling)));
        }
        lines.push(format!("Matrix: {}", self.reports.matrix.display()));
        lines.push(format!("Graph: {}", self.reports.graph_json.display()));
        lines.push(format!("DOT: {}", self.reports.graph_dot.display()));
        lines.join("\n")
    }
}

/// Analyze the whole graph and write the report files.
pub fn graph_analyze(config: &ResolvedConfig, out: Option<PathBuf>) -> Result<GraphAnalyzed> {
    let index = load_index(config)?;
    let out_dir = match out {
        Some(dir) => config.root.join(dir),
        None => config.reports_dir.value.clone(),
    };
    let reports = write_reports(&index, &out_dir)?;
    Ok(GraphAnalyzed {
        analysis: index.analyze(),
        reports,
    })
}

#[derive(Serialize)]
pub struct CycleList {
    pub count: usize,
    pub cycles: Vec<Vec<String>>,
}

impl Output for CycleList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.cycles.is_empty() {
            return "No cycles.".to_string();
        }
        let mut lines = vec![format!("{} cycle(s):", self.count)];
        lines.extend(self.cycles.iter().map(|c| format!("  {}", c.join(" -> "))));
        lines.join("\n")
    }
}

pub fn graph_cycles(config: &ResolvedConfig) -> Result<CycleList> {
    let cycles = load_index(config)?.cycles();
    Ok(CycleList {
        count: cycles.len(),
        cycles,
    })
}

#[derive(Serialize)]
pub struct OrphanList {
    pub count: usize,
    pub orphans: Vec<String>,
}

impl Output for OrphanList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.orphans.is_empty() {
            return "No orphans.".to_string();
        }
        let mut lines = vec![format!("{} orphan(s):", self.count)];
        lines.extend(self.orphans.iter().map(|id| format!("  {}", id)));
        lines.join("\n")
    }
}

pub fn graph_orphans(config: &ResolvedConfig) -> Result<OrphanList> {
    let orphans = load_index(config)?.orphans();
    Ok(OrphanList {
        count: orphans.len(),
        orphans,
    })
}

// === Check Commands ===

#[derive(Serialize)]
pub struct CheckResult {
    pub check: &'static str,
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl CheckResult {
    fn new(check: &'static str, report: ValidationReport) -> Self {
        Self {
            check,
            valid: report.is_valid(),
            violations: report.violations,
        }
    }
}

impl Output for CheckResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.valid {
            return format!("{} check passed.", self.check);
        }
        let mut lines = vec![format!(
            "{} check found {} violation(s):",
            self.check,
            self.violations.len()
        )];
        lines.extend(self.violations.iter().map(|v| format!("  {}", v)));
        lines.join("\n")
    }
}

pub fn check_separation_cmd(config: &ResolvedConfig) -> Result<CheckResult> {
    let repo = open_repository(config)?;
    let report = check_separation(&repo.all_nodes()?);
    Ok(CheckResult::new("separation", report))
}

/// Every link endpoint must name a stored node.
pub fn check_links_cmd(config: &ResolvedConfig) -> Result<CheckResult> {
    let repo = open_repository(config)?;
    let report = check_links(&repo.all_nodes()?);
    Ok(CheckResult::new("links", report))
}

/// Validate every stored node and every node file.
pub fn check_schema(config: &ResolvedConfig) -> Result<CheckResult> {
    let repo = open_repository(config)?;
    let mut report = ValidationReport::default();
    for node in repo.all_nodes()? {
        report.extend(validate_node(&node));
    }
    let scan = FlatFileAdapter::new(&config.nodes_dir.value).scan()?;
    for error in scan.errors {
        report.push(Violation::new(
            error.path.display().to_string(),
            "file",
            error.message,
        ));
    }
    Ok(CheckResult::new("schema", report))
}

// === Cmd Commands ===

fn pipeline(config: &ResolvedConfig) -> CommandPipeline {
    CommandPipeline::new(&config.root, &config.log_dir.value).with_jobs(config.jobs.value)
}

#[derive(Serialize)]
pub struct StubsGenerated {
    pub count: usize,
    pub created: Vec<String>,
}

impl Output for StubsGenerated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.created.is_empty() {
            return "Every criteria node already has a command.".to_string();
        }
        let mut lines = vec![format!("Generated {} command node(s):", self.count)];
        lines.extend(self.created.iter().map(|id| format!("  {}", id)));
        lines.join("\n")
    }
}

pub fn cmd_generate(config: &ResolvedConfig, force: bool) -> Result<StubsGenerated> {
    let mut repo = open_repository(config)?;
    let created: Vec<String> = pipeline(config)
        .generate_stubs(&mut repo, force)?
        .into_iter()
        .map(|n| n.id)
        .collect();
    Ok(StubsGenerated {
        count: created.len(),
        created,
    })
}

#[derive(Serialize)]
pub struct CommandRunReport {
    pub dry_run: bool,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<ExecutionResult>,
}

impl CommandRunReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl Output for CommandRunReport {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        for result in &self.results {
            if self.dry_run {
                lines.push(format!(
                    "{}: would run `{}` in {}",
                    result.id,
                    result.command,
                    result.workdir.display()
                ));
                continue;
            }
            let mark = if result.success() { "PASS" } else { "FAIL" };
            let mut line = format!("{} {} (exit {})", mark, result.id, result.exit_code);
            if let Some(ref log) = result.log_path {
                line.push_str(&format!(" log: {}", log.display()));
            }
            lines.push(line);
        }
        if !self.dry_run {
            lines.push(format!("{} passed, {} failed", self.passed, self.failed));
        }
        lines.join("\n")
    }
}

/// Run command nodes with the resolved worker count (`cmd run -j` lands in
/// `config.jobs` as a CLI override).
pub fn cmd_run(config: &ResolvedConfig, target: ExecTarget, dry_run: bool) -> Result<CommandRunReport> {
    let repo = open_repository(config)?;
    let results = pipeline(config).execute(&repo, target, dry_run)?;
    let failed = if dry_run {
        0
    } else {
        results.iter().filter(|r| !r.success()).count()
    };
    Ok(CommandRunReport {
        dry_run,
        passed: results.len() - failed,
        failed,
        results,
    })
}

// === Config Commands ===

#[derive(Serialize)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: String,
    pub source: ValueSource,
}

#[derive(Serialize)]
pub struct ConfigShow {
    pub root: PathBuf,
    pub entries: Vec<ConfigEntry>,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Workspace: {}", self.root.display())];
        for entry in &self.entries {
            let value = if entry.value.is_empty() {
                "(unset)"
            } else {
                entry.value.as_str()
            };
            lines.push(format!("  {} = {} [{}]", entry.key, value, entry.source));
        }
        lines.join("\n")
    }
}

pub fn config_show(config: &ResolvedConfig) -> ConfigShow {
    ConfigShow {
        root: config.root.clone(),
        entries: config
            .entries()
            .into_iter()
            .map(|(key, value, source)| ConfigEntry { key, value, source })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    fn config_for(env: &TestEnv, storage: StoragePreference) -> ResolvedConfig {
        let mut config = ResolvedConfig::defaults(env.path());
        config.storage.value = storage;
        config
    }

    #[test]
    fn test_parse_env() {
        let env = parse_env(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "x=y");
        assert!(parse_env(&["novalue".to_string()]).is_err());
        assert!(parse_env(&["=1".to_string()]).is_err());
    }

    #[test]
    fn test_update_args_track_fields() {
        let args = NodeUpdateArgs {
            title: Some("New".to_string()),
            clear_progress: true,
            labels: vec!["a".to_string()],
            ..Default::default()
        };
        let (patch, fields) = args.into_patch();
        assert_eq!(fields, vec!["title", "progress", "labels"]);
        assert_eq!(patch.progress, Some(None));
        assert!(patch.parents.is_none());
    }

    #[test]
    fn test_node_lifecycle_on_flat_files() {
        let env = TestEnv::new();
        let config = config_for(&env, StoragePreference::FlatFileOnly);

        let created = node_create(
            &config,
            Layer::Goal,
            "Launch".to_string(),
            NodeCreateArgs {
                labels: vec!["q1".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(created.id, "GOAL-LAUNCH");
        assert_eq!(created.backend, BackendKind::FlatFile);

        let shown = node_show(&config, "GOAL-LAUNCH").unwrap();
        assert!(shown.to_human().contains("Labels: q1"));

        let deleted = node_delete(&config, "GOAL-LAUNCH").unwrap();
        assert!(deleted.deleted);
        assert!(!node_delete(&config, "GOAL-LAUNCH").unwrap().deleted);
        assert!(matches!(node_show(&config, "GOAL-LAUNCH"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_sync_refuses_flat_file_backend() {
        let env = TestEnv::new();
        let config = config_for(&env, StoragePreference::FlatFileOnly);
        assert!(matches!(sync_check(&config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_config_show_lists_sources() {
        let env = TestEnv::new();
        let config = ResolvedConfig::defaults(env.path());
        let shown = config_show(&config);
        assert!(shown.entries.iter().any(|e| e.key == "storage" && e.value == "auto"));
        assert!(shown.to_human().contains("database-url = (unset) [default]"));
    }

    #[test]
    fn test_check_schema_reports_bad_files() {
        let env = TestEnv::new();
        let config = config_for(&env, StoragePreference::FlatFileOnly);
        let dir = env.nodes_dir().join("goal");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("GOAL-BAD.yaml"), "id: [unclosed").unwrap();

        let result = check_schema(&config).unwrap();
        assert!(!result.valid);
        assert!(result.violations.iter().any(|v| v.field == "file"));
    }
}
