//! Generation of the standalone script that reproduces a menu's open/close behavior.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::config::{DiscoveryConfig, SnippetTarget};
use crate::errors::{DiscoveryError, Result};
use crate::snapshot::{ElementSnapshot, Mutation};

/// Everything the builder needs about one element
#[derive(Debug, Clone, Copy)]
pub struct ElementCapture<'a> {
    pub selector: &'a str,
    pub closed: Option<&'a ElementSnapshot>,
    pub open: Option<&'a ElementSnapshot>,
    pub mutations: &'a [Mutation],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenState {
    selector: String,
    add_classes: Vec<String>,
    /// Attribute values to set while open, and what to restore (`null` removes)
    open_attributes: BTreeMap<String, String>,
    closed_attributes: BTreeMap<String, Option<String>>,
    open_styles: BTreeMap<String, String>,
    /// Values written back on close, so inline-hidden elements hide again
    closed_styles: BTreeMap<String, String>,
    mutations: Vec<Mutation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnippetConfig {
    nested_frames: bool,
    target: OpenState,
    menu: OpenState,
}

/// Builds the reproduction snippet. Output depends only on its inputs.
pub struct SnippetBuilder<'a> {
    config: &'a DiscoveryConfig,
}

impl<'a> SnippetBuilder<'a> {
    pub fn new(config: &'a DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, target: ElementCapture<'_>, menu: ElementCapture<'_>) -> Result<String> {
        let snippet_config = SnippetConfig {
            nested_frames: self.config.snippet_target == SnippetTarget::NestedFrame,
            target: self.open_state(&target),
            menu: self.open_state(&menu),
        };
        let json = serde_json::to_string_pretty(&snippet_config)
            .map_err(|e| DiscoveryError::Internal(format!("snippet serialization: {e}")))?;
        debug!(
            target = target.selector,
            menu = menu.selector,
            "Built reproduction snippet"
        );
        Ok(render(&json))
    }

    fn open_state(&self, capture: &ElementCapture<'_>) -> OpenState {
        let mut state = OpenState {
            selector: capture.selector.to_string(),
            add_classes: Vec::new(),
            open_attributes: BTreeMap::new(),
            closed_attributes: BTreeMap::new(),
            open_styles: BTreeMap::new(),
            closed_styles: BTreeMap::new(),
            mutations: capture
                .mutations
                .iter()
                .filter(|m| !m.is_noop())
                .cloned()
                .collect(),
        };
        let (Some(closed), Some(open)) = (capture.closed, capture.open) else {
            return state;
        };

        let closed_classes: BTreeSet<&String> = closed.class_list.iter().collect();
        state.add_classes = open
            .class_list
            .iter()
            .filter(|c| !closed_classes.contains(c) && self.config.is_state_class(c))
            .cloned()
            .collect();

        for (name, open_value) in &open.attributes {
            let closed_value = closed.attributes.get(name).cloned().flatten();
            let Some(value) = open_value else {
                continue;
            };
            if closed_value.as_ref() == Some(value) || !is_truthy_attribute(name, value) {
                continue;
            }
            state.open_attributes.insert(name.clone(), value.clone());
            state.closed_attributes.insert(name.clone(), closed_value);
        }

        for (property, predicate) in STYLE_PREDICATES {
            let from = closed.style(property);
            let to = open.style(property);
            if from != to && predicate(to) {
                state.open_styles.insert(property.to_string(), to.to_string());
                state
                    .closed_styles
                    .insert(property.to_string(), from.to_string());
            }
        }

        state
    }
}

type StylePredicate = fn(&str) -> bool;

const STYLE_PREDICATES: &[(&str, StylePredicate)] = &[
    ("display", |v| v != "none"),
    ("visibility", |v| v == "visible"),
    ("opacity", |v| v.parse::<f64>().is_ok_and(|o| o > 0.0)),
    ("pointer-events", |v| v == "auto"),
    ("max-height", |v| v != "0px"),
    ("transform", |v| v != "none"),
];

fn is_truthy_attribute(name: &str, value: &str) -> bool {
    match name {
        "open" => true,
        "data-state" => value == "open",
        _ => value == "true",
    }
}

fn render(config_json: &str) -> String {
    SNIPPET_TEMPLATE.replace("__CONFIG__", config_json)
}

const SNIPPET_TEMPLATE: &str = r#"(function () {
  var config = __CONFIG__;

  function documents() {
    var docs = [];
    if (config.nestedFrames) {
      var frames = document.querySelectorAll('iframe');
      for (var i = 0; i < frames.length; i++) {
        try {
          if (frames[i].contentDocument) docs.push(frames[i].contentDocument);
        } catch (e) {}
      }
    }
    docs.push(document);
    return docs;
  }

  function find(selector) {
    var docs = documents();
    for (var i = 0; i < docs.length; i++) {
      try {
        var el = docs[i].querySelector(selector);
        if (el) return el;
      } catch (e) {}
    }
    return null;
  }

  function apply(state, open) {
    var el = find(state.selector);
    if (!el) return false;
    state.addClasses.forEach(function (c) {
      el.classList.toggle(c, open);
    });
    Object.keys(state.openAttributes).forEach(function (name) {
      var value = open ? state.openAttributes[name] : state.closedAttributes[name];
      if (value === null || value === undefined) el.removeAttribute(name);
      else el.setAttribute(name, value);
    });
    Object.keys(state.openStyles).forEach(function (prop) {
      var value = open ? state.openStyles[prop] : state.closedStyles[prop];
      if (value) el.style.setProperty(prop, value);
      else el.style.removeProperty(prop);
    });
    return true;
  }

  var isOpen = false;

  function open() {
    apply(config.target, true);
    isOpen = apply(config.menu, true);
    return isOpen;
  }

  function close() {
    apply(config.target, false);
    apply(config.menu, false);
    isOpen = false;
    return isOpen;
  }

  function toggle() {
    return isOpen ? close() : open();
  }

  var trigger = find(config.target.selector);
  if (trigger) {
    trigger.addEventListener('click', function (event) {
      event.preventDefault();
      event.stopPropagation();
      toggle();
    });
  }

  window.menuSnippet = { open: open, close: close, toggle: toggle, config: config };
})();
"#;
