//! Keyword rules that pick a command stub for a criteria node.
//!
//! Rules are evaluated top to bottom against the lowercased title and
//! description of the criteria node; the first rule with a matching keyword
//! wins. The last built-in rule has no keywords and always matches, so every
//! criteria node gets at least a manual-verification placeholder.

use crate::models::{CommandPayload, Node, RunSpec};
use serde::Serialize;

/// Placeholder replaced with the criteria node id when a template is rendered.
pub const AC_ID_PLACEHOLDER: &str = "{ac_id}";

/// Shell command and expected artifacts produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StubTemplate {
    pub shell: String,
    pub artifacts: Vec<String>,
}

impl StubTemplate {
    pub fn new(shell: &str, artifacts: &[&str]) -> Self {
        Self {
            shell: shell.to_string(),
            artifacts: artifacts.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Render the payload for one criteria node.
    pub fn render(&self, criteria: &Node) -> CommandPayload {
        CommandPayload {
            ac_ref: criteria.id.clone(),
            run: RunSpec::new(self.shell.replace(AC_ID_PLACEHOLDER, &criteria.id)),
            artifacts: self.artifacts.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StubRule {
    pub name: String,
    /// Lowercase substrings; empty means "always matches"
    pub keywords: Vec<String>,
    pub template: StubTemplate,
}

impl StubRule {
    pub fn new(name: &str, keywords: &[&str], template: StubTemplate) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            template,
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.keywords.is_empty() || self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

/// The built-in rule table, in evaluation order.
pub fn default_rules() -> Vec<StubRule> {
    vec![
        StubRule::new(
            "unit-test",
            &["unit test", "tests pass", "test suite", "regression"],
            StubTemplate::new("cargo test", &[]),
        ),
        StubRule::new(
            "lint",
            &["lint", "clippy", "no warnings"],
            StubTemplate::new("cargo clippy --all-targets -- -D warnings", &[]),
        ),
        StubRule::new(
            "format",
            &["format", "rustfmt", "code style"],
            StubTemplate::new("cargo fmt --all -- --check", &[]),
        ),
        StubRule::new(
            "build",
            &["build", "compile"],
            StubTemplate::new("cargo build", &[]),
        ),
        StubRule::new(
            "performance",
            &["performance", "latency", "throughput", "benchmark", "response time"],
            StubTemplate::new("cargo bench", &["target/criterion"]),
        ),
        StubRule::new(
            "documentation",
            &["documentation", "documented", "docs"],
            StubTemplate::new("cargo doc --no-deps", &["target/doc"]),
        ),
        StubRule::new(
            "api",
            &["api", "endpoint", "http", "status code"],
            StubTemplate::new(
                "curl -fsS \"${TG_API_URL:-http://localhost:8080}/health\"",
                &[],
            ),
        ),
        StubRule::new(
            "manual",
            &[],
            StubTemplate::new("echo 'MANUAL: verify {ac_id}' && exit 0", &[]),
        ),
    ]
}

/// First rule in `rules` matching the criteria node's text.
pub fn select_rule<'r>(rules: &'r [StubRule], criteria: &Node) -> Option<&'r StubRule> {
    let text = format!("{} {}", criteria.title, criteria.description).to_lowercase();
    rules.iter().find(|rule| rule.matches(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Layer;

    fn criteria(title: &str, description: &str) -> Node {
        let mut node = Node::new("AC-X", Layer::Criteria, title);
        node.description = description.to_string();
        node
    }

    fn rule_for(title: &str, description: &str) -> String {
        let rules = default_rules();
        select_rule(&rules, &criteria(title, description))
            .unwrap()
            .name
            .clone()
    }

    #[test]
    fn test_keyword_selection() {
        assert_eq!(rule_for("All unit tests pass", ""), "unit-test");
        assert_eq!(rule_for("Code passes Clippy", ""), "lint");
        assert_eq!(rule_for("Build succeeds on CI", ""), "build");
        assert_eq!(rule_for("P95 latency under 200ms", ""), "performance");
        assert_eq!(rule_for("Public API returns 200", ""), "api");
        assert_eq!(rule_for("Users feel happy", "subjective"), "manual");
    }

    #[test]
    fn test_description_is_searched() {
        assert_eq!(rule_for("Quality gate", "must be formatted with rustfmt"), "format");
    }

    #[test]
    fn test_first_match_wins() {
        // Mentions both a unit test and the API; the earlier rule takes it.
        assert_eq!(rule_for("Unit test covers the API client", ""), "unit-test");
    }

    #[test]
    fn test_manual_template_names_criteria() {
        let rules = default_rules();
        let node = criteria("Looks nice", "");
        let payload = select_rule(&rules, &node).unwrap().template.render(&node);
        assert_eq!(payload.run.shell, "echo 'MANUAL: verify AC-X' && exit 0");
        assert_eq!(payload.ac_ref, "AC-X");
        assert_eq!(payload.run.workdir, ".");
    }

    #[test]
    fn test_rules_are_additive() {
        let mut rules = default_rules();
        rules.insert(
            0,
            StubRule::new("smoke", &["smoke"], StubTemplate::new("./smoke.sh", &["smoke.log"])),
        );
        let node = criteria("Smoke test passes", "");
        let rule = select_rule(&rules, &node).unwrap();
        assert_eq!(rule.name, "smoke");
        assert_eq!(rule.template.render(&node).artifacts, vec!["smoke.log"]);
    }
}
