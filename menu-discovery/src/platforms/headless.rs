//! In-memory DOM used for headless runs and tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use crate::errors::{DiscoveryError, Result};
use crate::platforms::DomEngine;
use crate::selector::{
    parse_selector_list, AttributeCondition, Combinator, ComplexSelector, CompoundSelector,
};
use crate::types::{
    EventKind, ListenerId, MutationKind, MutationRecord, NodeRef, ObserverId, Rect,
    SyntheticEvent,
};

/// Event as seen by a page handler registered with [`HeadlessDom::on`]
#[derive(Debug, Clone, Copy)]
pub struct DomEvent {
    pub kind: EventKind,
    pub target: NodeRef,
    pub current_target: NodeRef,
    pub client_x: f64,
    pub client_y: f64,
}

pub type EventHandler = Arc<dyn Fn(&HeadlessDom, &DomEvent) + Send + Sync>;

const HTML: usize = 0;
const BODY: usize = 1;

struct Node {
    tag: String,
    parent: Option<usize>,
    children: Vec<usize>,
    attrs: Vec<(String, String)>,
    rect: Rect,
}

struct StyleRule {
    selectors: Vec<ComplexSelector>,
    declarations: Vec<(String, String)>,
}

struct Handler {
    node: NodeRef,
    kind: EventKind,
    callback: EventHandler,
}

struct Observer {
    root: NodeRef,
    records: Vec<MutationRecord>,
}

#[derive(Default)]
struct DomState {
    nodes: Vec<Node>,
    rules: Vec<StyleRule>,
    handlers: Vec<Handler>,
    suppressors: HashMap<u64, Vec<EventKind>>,
    observers: HashMap<u64, Observer>,
    next_id: u64,
    dispatched: Vec<(NodeRef, EventKind)>,
}

/// A small DOM with a stylesheet cascade, event dispatch and mutation observers.
///
/// Page scripts are modelled as closures attached with [`HeadlessDom::on`]; they run
/// with no lock held, so they may freely mutate the document.
pub struct HeadlessDom {
    state: RwLock<DomState>,
}

impl fmt::Debug for HeadlessDom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("HeadlessDom")
            .field("nodes", &state.nodes.len())
            .field("rules", &state.rules.len())
            .field("handlers", &state.handlers.len())
            .finish()
    }
}

impl Default for HeadlessDom {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDom {
    /// An empty document: `<html><body></body></html>`
    pub fn new() -> Self {
        let html = Node {
            tag: "html".to_string(),
            parent: None,
            children: vec![BODY],
            attrs: Vec::new(),
            rect: Rect::new(0.0, 0.0, 1280.0, 800.0),
        };
        let body = Node {
            tag: "body".to_string(),
            parent: Some(HTML),
            children: Vec::new(),
            attrs: Vec::new(),
            rect: Rect::new(0.0, 0.0, 1280.0, 800.0),
        };
        Self {
            state: RwLock::new(DomState {
                nodes: vec![html, body],
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DomState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DomState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a new element under `parent`.
    pub fn create_element(&self, parent: NodeRef, tag: &str, attrs: &[(&str, &str)]) -> NodeRef {
        let mut state = self.write();
        let index = state.nodes.len();
        state.nodes.push(Node {
            tag: tag.to_ascii_lowercase(),
            parent: Some(parent.index()),
            children: Vec::new(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
            rect: Rect::default(),
        });
        if let Some(p) = state.nodes.get_mut(parent.index()) {
            p.children.push(index);
        }
        let node = NodeRef::new(index);
        state.record(
            parent,
            MutationKind::ChildList {
                added: vec![node],
            },
        );
        node
    }

    /// Layout box reported for `node` while it is rendered.
    pub fn set_rect(&self, node: NodeRef, rect: Rect) {
        if let Some(n) = self.write().nodes.get_mut(node.index()) {
            n.rect = rect;
        }
    }

    /// Append a stylesheet rule. Later rules win over earlier ones.
    pub fn add_rule(&self, selector: &str, declarations: &[(&str, &str)]) -> Result<()> {
        let selectors = parse_selector_list(selector)?;
        self.write().rules.push(StyleRule {
            selectors,
            declarations: declarations
                .iter()
                .map(|(p, v)| (p.to_ascii_lowercase(), v.trim().to_string()))
                .collect(),
        });
        Ok(())
    }

    /// Attach a page handler for `kind` on `node`.
    pub fn on<F>(&self, node: NodeRef, kind: EventKind, handler: F)
    where
        F: Fn(&HeadlessDom, &DomEvent) + Send + Sync + 'static,
    {
        self.write().handlers.push(Handler {
            node,
            kind,
            callback: Arc::new(handler),
        });
    }

    /// Remove `node` from its parent. The node keeps its subtree and attributes.
    pub fn detach(&self, node: NodeRef) {
        let mut state = self.write();
        let Some(parent) = state.nodes.get(node.index()).and_then(|n| n.parent) else {
            return;
        };
        state.nodes[parent].children.retain(|c| *c != node.index());
        state.nodes[node.index()].parent = None;
    }

    /// Every event that reached `dispatch_event`, suppressed or not, in order.
    pub fn dispatched_events(&self) -> Vec<(NodeRef, EventKind)> {
        self.read().dispatched.clone()
    }

    pub fn clear_dispatch_log(&self) {
        self.write().dispatched.clear();
    }
}

impl DomState {
    fn node(&self, node: NodeRef) -> Option<&Node> {
        self.nodes.get(node.index())
    }

    fn parent_of(&self, index: usize) -> Option<usize> {
        self.nodes.get(index).and_then(|n| n.parent)
    }

    fn is_connected(&self, index: usize) -> bool {
        let mut current = Some(index);
        while let Some(i) = current {
            if i == HTML {
                return true;
            }
            current = self.parent_of(i);
        }
        false
    }

    fn contains(&self, ancestor: usize, index: usize) -> bool {
        let mut current = Some(index);
        while let Some(i) = current {
            if i == ancestor {
                return true;
            }
            current = self.parent_of(i);
        }
        false
    }

    fn attr(&self, index: usize, name: &str) -> Option<&str> {
        self.nodes
            .get(index)?
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn record(&mut self, target: NodeRef, kind: MutationKind) {
        let targets: Vec<u64> = self
            .observers
            .iter()
            .filter(|(_, o)| self.contains(o.root.index(), target.index()))
            .map(|(id, _)| *id)
            .collect();
        for id in targets {
            if let Some(observer) = self.observers.get_mut(&id) {
                observer.records.push(MutationRecord {
                    target,
                    kind: kind.clone(),
                });
            }
        }
    }

    fn set_attr(&mut self, node: NodeRef, name: &str, value: Option<&str>) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let entry = self
            .nodes
            .get_mut(node.index())
            .ok_or_else(|| DiscoveryError::ElementDetached(node.to_string()))?;
        let position = entry.attrs.iter().position(|(k, _)| *k == name);
        let old_value = position.map(|p| entry.attrs[p].1.clone());
        match (position, value) {
            (Some(p), Some(v)) => entry.attrs[p].1 = v.to_string(),
            (None, Some(v)) => entry.attrs.push((name.clone(), v.to_string())),
            (Some(p), None) => {
                entry.attrs.remove(p);
            }
            (None, None) => return Ok(()),
        }
        self.record(node, MutationKind::Attribute { name, old_value });
        Ok(())
    }

    fn inline_declarations(&self, index: usize) -> Vec<(String, String)> {
        self.attr(index, "style")
            .map(parse_style_declarations)
            .unwrap_or_default()
    }

    fn computed(&self, index: usize, property: &str) -> String {
        if property == "display" && self.is_closed_details_content(index) {
            return "none".to_string();
        }

        let mut value: Option<String> = None;
        for rule in &self.rules {
            if rule.selectors.iter().any(|s| self.matches_complex(index, s)) {
                if let Some((_, v)) = rule.declarations.iter().rev().find(|(p, _)| p == property)
                {
                    value = Some(v.clone());
                }
            }
        }
        if let Some((_, v)) = self
            .inline_declarations(index)
            .into_iter()
            .rev()
            .find(|(p, _)| p == property)
        {
            value = Some(v);
        }

        match value {
            Some(v) if v == "inherit" => self
                .parent_of(index)
                .map(|p| self.computed(p, property))
                .unwrap_or_else(|| initial_value(property).to_string()),
            Some(v) => v,
            None => self.default_value(index, property),
        }
    }

    fn default_value(&self, index: usize, property: &str) -> String {
        match property {
            "display" => {
                if self.attr(index, "hidden").is_some() {
                    return "none".to_string();
                }
                tag_display(&self.nodes[index].tag).to_string()
            }
            "visibility" | "pointer-events" => self
                .parent_of(index)
                .map(|p| self.computed(p, property))
                .unwrap_or_else(|| initial_value(property).to_string()),
            _ => initial_value(property).to_string(),
        }
    }

    fn is_closed_details_content(&self, index: usize) -> bool {
        let Some(parent) = self.parent_of(index) else {
            return false;
        };
        self.nodes[parent].tag == "details"
            && self.attr(parent, "open").is_none()
            && self.nodes[index].tag != "summary"
    }

    fn is_rendered(&self, index: usize) -> bool {
        let mut current = Some(index);
        while let Some(i) = current {
            if self.computed(i, "display") == "none" {
                return false;
            }
            current = self.parent_of(i);
        }
        true
    }

    fn descendants(&self, root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[root].children.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            out.push(index);
            stack.extend(self.nodes[index].children.iter().rev().copied());
        }
        out
    }

    fn matches_complex(&self, index: usize, selector: &ComplexSelector) -> bool {
        match selector.parts.len() {
            0 => false,
            n => self.match_from(index, selector, n - 1),
        }
    }

    fn match_from(&self, index: usize, selector: &ComplexSelector, part: usize) -> bool {
        let current = &selector.parts[part];
        if !self.matches_compound(index, &current.compound) {
            return false;
        }
        if part == 0 {
            return true;
        }
        match current.combinator.unwrap_or(Combinator::Descendant) {
            Combinator::Child => self
                .parent_of(index)
                .is_some_and(|p| self.match_from(p, selector, part - 1)),
            Combinator::Descendant => {
                let mut ancestor = self.parent_of(index);
                while let Some(a) = ancestor {
                    if self.match_from(a, selector, part - 1) {
                        return true;
                    }
                    ancestor = self.parent_of(a);
                }
                false
            }
        }
    }

    fn matches_compound(&self, index: usize, compound: &CompoundSelector) -> bool {
        let node = &self.nodes[index];
        if let Some(tag) = &compound.tag {
            if node.tag != *tag {
                return false;
            }
        }
        if let Some(id) = &compound.id {
            if self.attr(index, "id") != Some(id.as_str()) {
                return false;
            }
        }
        if !compound.classes.is_empty() {
            let classes: Vec<&str> = self
                .attr(index, "class")
                .map(|c| c.split_whitespace().collect())
                .unwrap_or_default();
            if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }
        for condition in &compound.attributes {
            let ok = match condition {
                AttributeCondition::Exists(name) => self.attr(index, name).is_some(),
                AttributeCondition::Equals(name, value) => {
                    self.attr(index, name) == Some(value.as_str())
                }
            };
            if !ok {
                return false;
            }
        }
        if let Some(n) = compound.nth_of_type {
            let Some(parent) = node.parent else {
                return false;
            };
            let position = self.nodes[parent]
                .children
                .iter()
                .filter(|c| self.nodes[**c].tag == node.tag)
                .position(|c| *c == index);
            if position.map(|p| p + 1) != Some(n) {
                return false;
            }
        }
        true
    }
}

impl DomEngine for HeadlessDom {
    fn document_element(&self) -> NodeRef {
        NodeRef::new(HTML)
    }

    fn body(&self) -> Option<NodeRef> {
        let state = self.read();
        state
            .nodes
            .get(HTML)
            .and_then(|html| html.children.iter().find(|c| state.nodes[**c].tag == "body"))
            .map(|i| NodeRef::new(*i))
    }

    fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.read().parent_of(node.index()).map(NodeRef::new)
    }

    fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.read()
            .node(node)
            .map(|n| n.children.iter().map(|c| NodeRef::new(*c)).collect())
            .unwrap_or_default()
    }

    fn is_connected(&self, node: NodeRef) -> bool {
        self.read().is_connected(node.index())
    }

    fn tag_name(&self, node: NodeRef) -> String {
        self.read()
            .node(node)
            .map(|n| n.tag.clone())
            .unwrap_or_default()
    }

    fn get_attribute(&self, node: NodeRef, name: &str) -> Option<String> {
        self.read()
            .attr(node.index(), &name.to_ascii_lowercase())
            .map(str::to_string)
    }

    fn attribute_names(&self, node: NodeRef) -> Vec<String> {
        self.read()
            .node(node)
            .map(|n| n.attrs.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    fn set_attribute(&self, node: NodeRef, name: &str, value: &str) -> Result<()> {
        self.write().set_attr(node, name, Some(value))
    }

    fn remove_attribute(&self, node: NodeRef, name: &str) -> Result<()> {
        self.write().set_attr(node, name, None)
    }

    fn inline_style(&self, node: NodeRef, property: &str) -> Option<String> {
        self.read()
            .inline_declarations(node.index())
            .into_iter()
            .rev()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v)
    }

    fn set_inline_style(&self, node: NodeRef, property: &str, value: Option<&str>) -> Result<()> {
        let mut state = self.write();
        let mut declarations = state.inline_declarations(node.index());
        declarations.retain(|(p, _)| p != property);
        if let Some(v) = value {
            declarations.push((property.to_string(), v.to_string()));
        }
        if declarations.is_empty() {
            state.set_attr(node, "style", None)
        } else {
            let serialized = serialize_style_declarations(&declarations);
            state.set_attr(node, "style", Some(&serialized))
        }
    }

    fn computed_style(&self, node: NodeRef, property: &str) -> String {
        let state = self.read();
        if state.node(node).is_none() {
            return String::new();
        }
        state.computed(node.index(), &property.to_ascii_lowercase())
    }

    fn bounding_rect(&self, node: NodeRef) -> Rect {
        let state = self.read();
        let index = node.index();
        if state.node(node).is_none() || !state.is_connected(index) || !state.is_rendered(index) {
            return Rect::default();
        }
        state.nodes[index].rect
    }

    fn query_selector_all(&self, root: Option<NodeRef>, selector: &str) -> Result<Vec<NodeRef>> {
        let selectors = parse_selector_list(selector)?;
        let state = self.read();
        let candidates = match root {
            Some(r) if state.node(r).is_some() => state.descendants(r.index()),
            Some(_) => Vec::new(),
            None => {
                let mut all = vec![HTML];
                all.extend(state.descendants(HTML));
                all
            }
        };
        Ok(candidates
            .into_iter()
            .filter(|i| selectors.iter().any(|s| state.matches_complex(*i, s)))
            .map(NodeRef::new)
            .collect())
    }

    fn dispatch_event(&self, node: NodeRef, event: &SyntheticEvent) -> Result<bool> {
        let handlers: Vec<(EventHandler, NodeRef)> = {
            let mut state = self.write();
            if state.node(node).is_none() || !state.is_connected(node.index()) {
                return Err(DiscoveryError::ElementDetached(node.to_string()));
            }
            state.dispatched.push((node, event.kind));

            if state
                .suppressors
                .values()
                .any(|kinds| kinds.contains(&event.kind))
            {
                trace!(%node, kind = %event.kind, "Event suppressed at capture");
                return Ok(false);
            }

            let mut path = vec![node.index()];
            if event.bubbles {
                let mut current = state.parent_of(node.index());
                while let Some(p) = current {
                    path.push(p);
                    current = state.parent_of(p);
                }
            }
            let mut matched = Vec::new();
            for index in path {
                for handler in &state.handlers {
                    if handler.node.index() == index && handler.kind == event.kind {
                        matched.push((handler.callback.clone(), handler.node));
                    }
                }
            }
            matched
        };

        for (callback, current_target) in handlers {
            callback(
                self,
                &DomEvent {
                    kind: event.kind,
                    target: node,
                    current_target,
                    client_x: event.client_x,
                    client_y: event.client_y,
                },
            );
        }

        if event.kind == EventKind::Click {
            self.toggle_details_from(node)?;
        }
        Ok(true)
    }

    fn add_suppressor(&self, kinds: &[EventKind]) -> Result<ListenerId> {
        let mut state = self.write();
        let id = state.next_id;
        state.next_id += 1;
        state.suppressors.insert(id, kinds.to_vec());
        debug!(listener = id, ?kinds, "Installed capture suppressor");
        Ok(ListenerId(id))
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.write().suppressors.remove(&id.0).is_some()
    }

    fn active_listener_count(&self) -> usize {
        self.read().suppressors.len()
    }

    fn observe(&self, root: NodeRef) -> Result<ObserverId> {
        let mut state = self.write();
        if state.node(root).is_none() || !state.is_connected(root.index()) {
            return Err(DiscoveryError::ObserverSetup(format!(
                "cannot observe detached {root}"
            )));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.observers.insert(
            id,
            Observer {
                root,
                records: Vec::new(),
            },
        );
        Ok(ObserverId(id))
    }

    fn take_records(&self, id: ObserverId) -> Vec<MutationRecord> {
        self.write()
            .observers
            .get_mut(&id.0)
            .map(|o| std::mem::take(&mut o.records))
            .unwrap_or_default()
    }

    fn disconnect(&self, id: ObserverId) {
        self.write().observers.remove(&id.0);
    }

    fn active_observer_count(&self) -> usize {
        self.read().observers.len()
    }
}

impl HeadlessDom {
    // Native behavior of <summary>: clicking it toggles the parent <details>.
    fn toggle_details_from(&self, node: NodeRef) -> Result<()> {
        let details = {
            let state = self.read();
            let mut current = Some(node.index());
            let mut found = None;
            while let Some(i) = current {
                if state.nodes[i].tag == "summary" {
                    found = state
                        .parent_of(i)
                        .filter(|p| state.nodes[*p].tag == "details");
                    break;
                }
                current = state.parent_of(i);
            }
            found.map(|d| (NodeRef::new(d), state.attr(d, "open").is_some()))
        };
        match details {
            Some((d, true)) => self.remove_attribute(d, "open"),
            Some((d, false)) => self.set_attribute(d, "open", ""),
            None => Ok(()),
        }
    }
}

fn tag_display(tag: &str) -> &'static str {
    match tag {
        "html" | "body" | "div" | "nav" | "header" | "footer" | "section" | "main" | "aside"
        | "ul" | "ol" | "form" | "details" | "summary" | "p" | "h1" | "h2" | "h3" | "h4"
        | "h5" | "h6" | "menu" => "block",
        "li" => "list-item",
        "head" | "script" | "style" | "template" => "none",
        "button" => "inline-block",
        _ => "inline",
    }
}

fn initial_value(property: &str) -> &'static str {
    match property {
        "display" => "inline",
        "visibility" => "visible",
        "pointer-events" => "auto",
        "opacity" => "1",
        "transform" | "max-height" | "outline" => "none",
        "position" => "static",
        "z-index" | "width" | "height" | "left" | "top" | "right" | "bottom" => "auto",
        "overflow" | "overflow-x" | "overflow-y" => "visible",
        _ => "",
    }
}

/// Split an inline `style` attribute into `(property, value)` pairs.
fn parse_style_declarations(style: &str) -> Vec<(String, String)> {
    let mut declarations = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    let push = |raw: &str, out: &mut Vec<(String, String)>| {
        if let Some((property, value)) = raw.split_once(':') {
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim();
            if !property.is_empty() {
                out.push((property, value.to_string()));
            }
        }
    };

    for ch in style.chars() {
        match (quote, ch) {
            (Some(q), _) if ch == q => quote = None,
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ';') if depth == 0 => {
                push(&current, &mut declarations);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    push(&current, &mut declarations);
    declarations
}

fn serialize_style_declarations(declarations: &[(String, String)]) -> String {
    declarations
        .iter()
        .map(|(p, v)| format!("{p}: {v};"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dom_with_nav() -> (HeadlessDom, NodeRef, NodeRef) {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let header = dom.create_element(body, "header", &[("class", "site-header")]);
        let nav = dom.create_element(header, "nav", &[("class", "nav-menu")]);
        (dom, header, nav)
    }

    #[test]
    fn test_cascade_order() {
        let (dom, _, nav) = dom_with_nav();
        assert_eq!(dom.computed_style(nav, "display"), "block");
        dom.add_rule(".nav-menu", &[("display", "none")]).unwrap();
        assert_eq!(dom.computed_style(nav, "display"), "none");
        dom.set_inline_style(nav, "display", Some("flex")).unwrap();
        assert_eq!(dom.computed_style(nav, "display"), "flex");
        dom.set_inline_style(nav, "display", None).unwrap();
        assert_eq!(dom.computed_style(nav, "display"), "none");
        assert_eq!(dom.get_attribute(nav, "style"), None);
    }

    #[test]
    fn test_visibility_inherits() {
        let (dom, header, nav) = dom_with_nav();
        dom.set_inline_style(header, "visibility", Some("hidden")).unwrap();
        assert_eq!(dom.computed_style(nav, "visibility"), "hidden");
        assert_eq!(dom.computed_style(nav, "opacity"), "1");
    }

    #[test]
    fn test_hidden_ancestor_zeroes_rect() {
        let (dom, header, nav) = dom_with_nav();
        dom.set_rect(nav, Rect::new(0.0, 0.0, 300.0, 40.0));
        assert_eq!(dom.bounding_rect(nav).width, 300.0);
        dom.set_attribute(header, "hidden", "").unwrap();
        assert_eq!(dom.bounding_rect(nav), Rect::default());
    }

    #[test]
    fn test_closed_details_hides_content_and_summary_click_toggles() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let details = dom.create_element(body, "details", &[]);
        let summary = dom.create_element(details, "summary", &[]);
        let panel = dom.create_element(details, "ul", &[("class", "panel")]);

        assert_eq!(dom.computed_style(panel, "display"), "none");
        assert_eq!(dom.computed_style(summary, "display"), "block");

        dom.dispatch_event(summary, &SyntheticEvent::at(EventKind::Click, (0.0, 0.0)))
            .unwrap();
        assert_eq!(dom.get_attribute(details, "open").as_deref(), Some(""));
        assert_eq!(dom.computed_style(panel, "display"), "block");
    }

    #[test]
    fn test_bubbling_and_suppression() {
        let (dom, header, nav) = dom_with_nav();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        dom.on(header, EventKind::MouseOut, move |_, event| {
            assert_eq!(event.current_target.index(), 2);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let event = SyntheticEvent::at(EventKind::MouseOut, (1.0, 1.0));
        assert!(dom.dispatch_event(nav, &event).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let id = dom.add_suppressor(&EventKind::closing_events()).unwrap();
        assert!(!dom.dispatch_event(nav, &event).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(dom.remove_listener(id));
        assert_eq!(dom.active_listener_count(), 0);
        dom.dispatch_event(nav, &event).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_non_bubbling_event_stays_on_target() {
        let (dom, header, nav) = dom_with_nav();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        dom.on(header, EventKind::MouseEnter, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        dom.dispatch_event(nav, &SyntheticEvent::at(EventKind::MouseEnter, (0.0, 0.0)))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handlers_may_mutate_document() {
        let (dom, header, nav) = dom_with_nav();
        dom.on(header, EventKind::Click, move |dom, _| {
            dom.add_class(nav, "is-open").unwrap();
        });
        dom.dispatch_event(header, &SyntheticEvent::at(EventKind::Click, (0.0, 0.0)))
            .unwrap();
        assert_eq!(dom.class_list(nav), vec!["nav-menu", "is-open"]);
    }

    #[test]
    fn test_observer_records_attribute_changes_under_root() {
        let (dom, header, nav) = dom_with_nav();
        let observer = dom.observe(header).unwrap();
        dom.set_attribute(nav, "aria-hidden", "false").unwrap();
        let outside = dom.create_element(dom.body().unwrap(), "div", &[]);
        dom.set_attribute(outside, "class", "x").unwrap();

        let records = dom.take_records(observer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, nav);
        assert_eq!(
            records[0].kind,
            MutationKind::Attribute {
                name: "aria-hidden".into(),
                old_value: None
            }
        );
        assert!(dom.take_records(observer).is_empty());

        dom.disconnect(observer);
        assert_eq!(dom.active_observer_count(), 0);
    }

    #[test]
    fn test_detached_dispatch_fails() {
        let (dom, _, nav) = dom_with_nav();
        dom.detach(nav);
        assert!(!dom.is_connected(nav));
        let result = dom.dispatch_event(nav, &SyntheticEvent::at(EventKind::Click, (0.0, 0.0)));
        assert!(matches!(result, Err(DiscoveryError::ElementDetached(_))));
        assert!(dom.observe(nav).is_err());
    }

    #[test]
    fn test_style_declaration_parsing() {
        let parsed = parse_style_declarations("display: none; background: url(a;b); COLOR:red");
        assert_eq!(
            parsed,
            vec![
                ("display".to_string(), "none".to_string()),
                ("background".to_string(), "url(a;b)".to_string()),
                ("color".to_string(), "red".to_string()),
            ]
        );
    }
}
