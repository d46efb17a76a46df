use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Result;
use crate::types::EventKind;

/// How the trigger is activated while scanning for the menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Dispatch a click on the confirmed target, then collect candidates after a settle delay
    Click,
    /// Dispatch hover events on the target and wait for the operator to hover the open menu
    Hover,
}

/// Document the generated snippet resolves its selectors against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetTarget {
    SameDocument,
    /// Search embedded frames first and fall back to the current document
    NestedFrame,
}

/// Heuristic weights used to rank menu candidates.
///
/// These were tuned by hand against real sites; they order candidates reasonably
/// but carry no guarantee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Points per observed mutation on the candidate
    pub change_weight: i64,

    /// Points per child element
    pub child_weight: i64,

    /// Bonus when the class list or id carries a menu keyword, or the element is a `<ul>`
    pub keyword_bonus: i64,

    pub menu_keywords: Vec<String>,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            change_weight: 2,
            child_weight: 3,
            keyword_bonus: 10,
            menu_keywords: [
                "sub-menu",
                "submenu",
                "dropdown",
                "dropdown-menu",
                "nav-dropdown",
                "mega-menu",
                "megamenu",
                "menu-panel",
                "level-2",
                "container",
                "sub",
                "menu",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
        }
    }
}

/// Configuration for a discovery session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub trigger_mode: TriggerMode,

    pub snippet_target: SnippetTarget,

    /// How long the operator must rest on an element before it becomes a target candidate (milliseconds)
    pub target_hover_delay_ms: u64,

    /// How long the operator must rest inside the open menu before candidates are collected (milliseconds)
    pub menu_hover_delay_ms: u64,

    /// Pause after a simulated activation before the toggle is considered done (milliseconds)
    pub activation_settle_ms: u64,

    /// Mutation observation window after the menu was opened (milliseconds)
    pub menu_settle_ms: u64,

    /// Period of the freeze re-assertion job (milliseconds)
    pub reassert_interval_ms: u64,

    /// Trigger re-activations after the menu is confirmed; 0 skips the toggle test
    pub verify_toggles: usize,

    /// Pause between toggle-test activations (milliseconds)
    pub verify_interval_ms: u64,

    /// Upper bound on elements captured for the closed-state baseline
    pub max_baseline_elements: usize,

    /// Events swallowed at capture while the menu is frozen
    pub suppressed_events: Vec<EventKind>,

    pub scoring: ScoringWeights,

    /// Keywords marking a class as open/active state
    pub state_class_keywords: Vec<String>,

    /// Inline outline applied to the candidate currently shown to the operator
    pub outline_style: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::Click,
            snippet_target: SnippetTarget::SameDocument,
            target_hover_delay_ms: 5000,
            menu_hover_delay_ms: 2000,
            activation_settle_ms: 400,
            menu_settle_ms: 2000,
            reassert_interval_ms: 50,
            verify_toggles: 4,
            verify_interval_ms: 800,
            max_baseline_elements: 5000,
            suppressed_events: EventKind::closing_events(),
            scoring: ScoringWeights::default(),
            state_class_keywords: ["open", "active", "show", "visible", "expanded"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            outline_style: "3px solid #00C48C".to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Parse a (possibly partial) JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn target_hover_delay(&self) -> Duration {
        Duration::from_millis(self.target_hover_delay_ms)
    }

    pub fn menu_hover_delay(&self) -> Duration {
        Duration::from_millis(self.menu_hover_delay_ms)
    }

    pub fn activation_settle(&self) -> Duration {
        Duration::from_millis(self.activation_settle_ms)
    }

    pub fn menu_settle(&self) -> Duration {
        Duration::from_millis(self.menu_settle_ms)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_ms)
    }

    /// Never zero; a zero period would make `tokio::time::interval` panic.
    pub fn reassert_interval(&self) -> Duration {
        Duration::from_millis(self.reassert_interval_ms.max(1))
    }

    /// Whether `class` is state-like under the configured keywords
    pub fn is_state_class(&self, class: &str) -> bool {
        self.state_class_keywords
            .iter()
            .any(|k| crate::selector::class_matches_keyword(class, k))
    }
}
