use crate::errors::Result;
use crate::types::{
    EventKind, ListenerId, MutationRecord, NodeRef, ObserverId, Rect, SyntheticEvent,
};

pub mod headless;

pub use headless::HeadlessDom;

/// The capability surface every DOM backend must provide.
///
/// The discovery core never touches ambient globals; every query, style lookup,
/// event dispatch and observer goes through this trait so the same logic runs
/// against a live page bridge or against [`HeadlessDom`].
pub trait DomEngine: Send + Sync {
    /// The `<html>` element
    fn document_element(&self) -> NodeRef;

    /// The `<body>` element, if the document has one
    fn body(&self) -> Option<NodeRef>;

    /// Parent element, `None` for the document element and detached nodes
    fn parent(&self, node: NodeRef) -> Option<NodeRef>;

    /// Element children in document order
    fn children(&self, node: NodeRef) -> Vec<NodeRef>;

    /// Whether the node is still attached to the document
    fn is_connected(&self, node: NodeRef) -> bool;

    /// Lowercase tag name
    fn tag_name(&self, node: NodeRef) -> String;

    fn get_attribute(&self, node: NodeRef, name: &str) -> Option<String>;

    /// Attribute names in source order
    fn attribute_names(&self, node: NodeRef) -> Vec<String>;

    fn set_attribute(&self, node: NodeRef, name: &str, value: &str) -> Result<()>;

    fn remove_attribute(&self, node: NodeRef, name: &str) -> Result<()>;

    /// Value of a property declared in the element's inline `style`
    fn inline_style(&self, node: NodeRef, property: &str) -> Option<String>;

    /// Set (`Some`) or remove (`None`) an inline style property
    fn set_inline_style(&self, node: NodeRef, property: &str, value: Option<&str>) -> Result<()>;

    /// Resolved value of a CSS property, as `getComputedStyle` reports it
    fn computed_style(&self, node: NodeRef, property: &str) -> String;

    fn bounding_rect(&self, node: NodeRef) -> Rect;

    /// All elements under `root` (the whole document when `None`) matching `selector`,
    /// in document order. Malformed selectors yield `InvalidSelector`.
    fn query_selector_all(&self, root: Option<NodeRef>, selector: &str) -> Result<Vec<NodeRef>>;

    /// Dispatch a synthetic event. Returns `false` when the event was cancelled.
    fn dispatch_event(&self, node: NodeRef, event: &SyntheticEvent) -> Result<bool>;

    /// Install a document-level capturing listener that stops propagation and
    /// prevents the default action of every event of the given kinds.
    fn add_suppressor(&self, kinds: &[EventKind]) -> Result<ListenerId>;

    /// Remove a listener. Returns `false` when the id was unknown.
    fn remove_listener(&self, id: ListenerId) -> bool;

    fn active_listener_count(&self) -> usize;

    /// Start recording attribute and child-list mutations under `root` (subtree).
    fn observe(&self, root: NodeRef) -> Result<ObserverId>;

    /// Drain the pending batch for an observer
    fn take_records(&self, id: ObserverId) -> Vec<MutationRecord>;

    fn disconnect(&self, id: ObserverId);

    fn active_observer_count(&self) -> usize;

    // ============== DERIVED HELPERS ==============

    fn id(&self, node: NodeRef) -> Option<String> {
        self.get_attribute(node, "id").filter(|id| !id.is_empty())
    }

    /// Class tokens in DOM order with duplicates removed
    fn class_list(&self, node: NodeRef) -> Vec<String> {
        let mut classes: Vec<String> = Vec::new();
        if let Some(value) = self.get_attribute(node, "class") {
            for token in value.split_whitespace() {
                if !classes.iter().any(|c| c == token) {
                    classes.push(token.to_string());
                }
            }
        }
        classes
    }

    fn add_class(&self, node: NodeRef, class: &str) -> Result<()> {
        let mut classes = self.class_list(node);
        if classes.iter().any(|c| c == class) {
            return Ok(());
        }
        classes.push(class.to_string());
        self.set_attribute(node, "class", &classes.join(" "))
    }

    fn remove_class(&self, node: NodeRef, class: &str) -> Result<()> {
        let classes = self.class_list(node);
        if !classes.iter().any(|c| c == class) {
            return Ok(());
        }
        let remaining: Vec<String> = classes.into_iter().filter(|c| c != class).collect();
        self.set_attribute(node, "class", &remaining.join(" "))
    }

    fn next_element_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|s| *s == node)?;
        siblings.get(position + 1).copied()
    }

    /// Inclusive containment, like `Node.contains`
    fn contains(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Descendant elements of `root` in document order, excluding `root` itself
    fn descendants(&self, root: NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeRef> = self.children(root).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).into_iter().rev());
        }
        out
    }

    /// Number of matches for `selector`, treating query failures as "no match".
    fn count_matches(&self, selector: &str) -> usize {
        self.query_selector_all(None, selector)
            .map(|nodes| nodes.len())
            .unwrap_or(0)
    }
}
