//! Common types shared by the DOM engines and the discovery components

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to an element owned by a [`crate::DomEngine`].
///
/// Handles are plain indices; they are only meaningful for the engine that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef(usize);

impl NodeRef {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Viewport geometry of an element, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// True when all four edges are within `tolerance` pixels of `other`'s edges.
    pub fn same_edges(&self, other: &Rect, tolerance: f64) -> bool {
        (self.x - other.x).abs() < tolerance
            && (self.y - other.y).abs() < tolerance
            && (self.right() - other.right()).abs() < tolerance
            && (self.bottom() - other.bottom()).abs() < tolerance
    }
}

/// DOM event types the discovery core dispatches or suppresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Click,
    MouseEnter,
    MouseOver,
    MouseMove,
    MouseOut,
    MouseLeave,
    Focus,
    Blur,
    FocusOut,
    PointerOut,
    PointerLeave,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::MouseEnter => "mouseenter",
            EventKind::MouseOver => "mouseover",
            EventKind::MouseMove => "mousemove",
            EventKind::MouseOut => "mouseout",
            EventKind::MouseLeave => "mouseleave",
            EventKind::Focus => "focus",
            EventKind::Blur => "blur",
            EventKind::FocusOut => "focusout",
            EventKind::PointerOut => "pointerout",
            EventKind::PointerLeave => "pointerleave",
        }
    }

    /// Whether the browser propagates this event type up the ancestor chain.
    pub fn bubbles(&self) -> bool {
        !matches!(
            self,
            EventKind::MouseEnter
                | EventKind::MouseLeave
                | EventKind::PointerLeave
                | EventKind::Focus
                | EventKind::Blur
        )
    }

    /// Event types a site typically uses to close an open menu.
    pub fn closing_events() -> Vec<EventKind> {
        vec![
            EventKind::MouseOut,
            EventKind::MouseLeave,
            EventKind::Blur,
            EventKind::FocusOut,
            EventKind::PointerOut,
            EventKind::PointerLeave,
        ]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A synthetic event as handed to [`crate::DomEngine::dispatch_event`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticEvent {
    pub kind: EventKind,
    pub bubbles: bool,
    pub cancelable: bool,
    pub client_x: f64,
    pub client_y: f64,
}

impl SyntheticEvent {
    pub fn at(kind: EventKind, (client_x, client_y): (f64, f64)) -> Self {
        Self {
            kind,
            bubbles: kind.bubbles(),
            cancelable: true,
            client_x,
            client_y,
        }
    }
}

/// Id of a listener installed through [`crate::DomEngine::add_suppressor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Id of a mutation observer installed through [`crate::DomEngine::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// One entry of a mutation notification batch.
///
/// Records inside a batch are kept in arrival order; that order carries no causal meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub target: NodeRef,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    Attribute {
        name: String,
        old_value: Option<String>,
    },
    ChildList {
        added: Vec<NodeRef>,
    },
}

impl MutationRecord {
    pub fn attribute_name(&self) -> Option<&str> {
        match &self.kind {
            MutationKind::Attribute { name, .. } => Some(name.as_str()),
            MutationKind::ChildList { .. } => None,
        }
    }
}
