//! The twelve ordered layers of the traceability hierarchy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hierarchy layer a node belongs to, ordered from the top-level objective
/// down to the terminal executable layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Goal,
    Strategy,
    Capability,
    Epic,
    Feature,
    Story,
    Requirement,
    Design,
    Task,
    Scenario,
    Criteria,
    Command,
}

impl Layer {
    /// All layers in hierarchy order.
    pub const ALL: [Layer; 12] = [
        Layer::Goal,
        Layer::Strategy,
        Layer::Capability,
        Layer::Epic,
        Layer::Feature,
        Layer::Story,
        Layer::Requirement,
        Layer::Design,
        Layer::Task,
        Layer::Scenario,
        Layer::Criteria,
        Layer::Command,
    ];

    /// The only layer whose nodes may be parentless.
    pub const TOP: Layer = Layer::Goal;

    /// The only layer whose nodes carry a command payload.
    pub const TERMINAL: Layer = Layer::Command;

    /// Id prefix for nodes of this layer (e.g. `GOAL` in `GOAL-LAUNCH`).
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Goal => "GOAL",
            Self::Strategy => "STRAT",
            Self::Capability => "CAP",
            Self::Epic => "EPIC",
            Self::Feature => "FEAT",
            Self::Story => "STORY",
            Self::Requirement => "REQ",
            Self::Design => "DES",
            Self::Task => "TASK",
            Self::Scenario => "SCN",
            Self::Criteria => "AC",
            Self::Command => "CMD",
        }
    }

    /// Lowercase name, also used as the flat-file directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Goal => "goal",
            Self::Strategy => "strategy",
            Self::Capability => "capability",
            Self::Epic => "epic",
            Self::Feature => "feature",
            Self::Story => "story",
            Self::Requirement => "requirement",
            Self::Design => "design",
            Self::Task => "task",
            Self::Scenario => "scenario",
            Self::Criteria => "criteria",
            Self::Command => "command",
        }
    }

    /// 1-based position in the hierarchy.
    pub fn rank(&self) -> usize {
        Self::ALL.iter().position(|l| l == self).unwrap_or(0) + 1
    }

    pub fn is_top(&self) -> bool {
        *self == Self::TOP
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::TERMINAL
    }

    /// Look up a layer by its id prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.prefix() == prefix)
    }

    /// Infer the layer from a node id's prefix.
    pub fn from_id(id: &str) -> Option<Self> {
        let (prefix, _) = id.split_once('-')?;
        Self::from_prefix(prefix)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    /// Accepts the layer name (case-insensitive) or its id prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == lower || l.prefix().eq_ignore_ascii_case(&lower))
            .or(match lower.as_str() {
                "acceptance" | "acceptance_criteria" => Some(Self::Criteria),
                "cmd" => Some(Self::Command),
                _ => None,
            })
            .ok_or_else(|| format!("Unknown layer: {}", s))
    }
}
