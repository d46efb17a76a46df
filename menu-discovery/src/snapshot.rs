//! Element state capture and closed/open diffing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::platforms::DomEngine;
use crate::types::{NodeRef, Rect};

/// Computed style properties captured for every snapshot, in diff order.
pub const MONITORED_STYLES: &[&str] = &[
    "display",
    "visibility",
    "opacity",
    "transform",
    "max-height",
    "height",
    "pointer-events",
    "z-index",
    "position",
    "left",
    "top",
    "right",
    "bottom",
    "width",
    "overflow",
    "overflow-x",
    "overflow-y",
];

/// Attributes that commonly carry open/closed state.
pub const MONITORED_ATTRIBUTES: &[&str] = &["aria-expanded", "aria-hidden", "open", "data-state"];

/// Point-in-time copy of the observable state of one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    pub tag_name: String,
    pub class_list: Vec<String>,
    /// `None` means the attribute was absent
    pub attributes: BTreeMap<String, Option<String>>,
    pub computed_style: BTreeMap<String, String>,
    pub geometry: Rect,
}

impl ElementSnapshot {
    /// Snapshot `node`. Returns `None` for a missing element.
    pub fn capture(engine: &dyn DomEngine, node: Option<NodeRef>) -> Option<Self> {
        let node = node?;
        let attributes = MONITORED_ATTRIBUTES
            .iter()
            .map(|name| (name.to_string(), engine.get_attribute(node, name)))
            .collect();
        let computed_style = MONITORED_STYLES
            .iter()
            .map(|prop| (prop.to_string(), engine.computed_style(node, prop)))
            .collect();
        Some(Self {
            tag_name: engine.tag_name(node),
            class_list: engine.class_list(node),
            attributes,
            computed_style,
            geometry: engine.bounding_rect(node),
        })
    }

    pub fn style(&self, property: &str) -> &str {
        self.computed_style
            .get(property)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }

    /// Style-level visibility: not `display: none`, not `visibility: hidden`, not fully transparent.
    pub fn is_visible(&self) -> bool {
        self.style("display") != "none"
            && self.style("visibility") != "hidden"
            && self.style("opacity").parse::<f64>().map_or(true, |o| o != 0.0)
    }
}

/// One observed difference between a closed and an open snapshot of the element
/// matched by `target_selector`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    #[serde(rename_all = "camelCase")]
    Style {
        target_selector: String,
        property: String,
        from: String,
        to: String,
    },
    #[serde(rename_all = "camelCase")]
    Class {
        target_selector: String,
        added: BTreeSet<String>,
        removed: BTreeSet<String>,
    },
    #[serde(rename_all = "camelCase")]
    Attribute {
        target_selector: String,
        attribute: String,
        from: Option<String>,
        to: Option<String>,
    },
}

impl Mutation {
    pub fn target_selector(&self) -> &str {
        match self {
            Mutation::Style {
                target_selector, ..
            }
            | Mutation::Class {
                target_selector, ..
            }
            | Mutation::Attribute {
                target_selector, ..
            } => target_selector,
        }
    }

    /// A class mutation that only reordered tokens
    pub fn is_noop(&self) -> bool {
        matches!(self, Mutation::Class { added, removed, .. } if added.is_empty() && removed.is_empty())
    }
}

/// Differences between a closed and an open snapshot of the element at `target_selector`,
/// in a fixed order: styles in [`MONITORED_STYLES`] order, then class changes, then
/// attributes.
///
/// Missing snapshots produce an empty list.
pub fn diff(
    closed: Option<&ElementSnapshot>,
    open: Option<&ElementSnapshot>,
    target_selector: &str,
) -> Vec<Mutation> {
    let (Some(closed), Some(open)) = (closed, open) else {
        return Vec::new();
    };

    let mut mutations = Vec::new();

    for property in MONITORED_STYLES {
        let from = closed.style(property);
        let to = open.style(property);
        if from != to {
            mutations.push(Mutation::Style {
                target_selector: target_selector.to_string(),
                property: property.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
    }

    let closed_classes: BTreeSet<String> = closed.class_list.iter().cloned().collect();
    let open_classes: BTreeSet<String> = open.class_list.iter().cloned().collect();
    let added: BTreeSet<String> = open_classes.difference(&closed_classes).cloned().collect();
    let removed: BTreeSet<String> = closed_classes.difference(&open_classes).cloned().collect();
    if !added.is_empty() || !removed.is_empty() {
        mutations.push(Mutation::Class {
            target_selector: target_selector.to_string(),
            added,
            removed,
        });
    }

    for name in MONITORED_ATTRIBUTES {
        let from = closed.attribute(name);
        let to = open.attribute(name);
        if from != to {
            mutations.push(Mutation::Attribute {
                target_selector: target_selector.to_string(),
                attribute: name.to_string(),
                from: from.map(str::to_string),
                to: to.map(str::to_string),
            });
        }
    }

    // Reordered class tokens still count as an observable change.
    if mutations.is_empty() && closed.class_list != open.class_list {
        mutations.push(Mutation::Class {
            target_selector: target_selector.to_string(),
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        });
    }

    mutations
}

/// True when nothing in `mutations` would change the page
pub fn is_effectless(mutations: &[Mutation]) -> bool {
    mutations.iter().all(Mutation::is_noop)
}
