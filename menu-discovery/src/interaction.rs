//! Synthetic activation of the trigger and the freeze that holds a menu open.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::{DiscoveryConfig, TriggerMode};
use crate::errors::{DiscoveryError, Result};
use crate::platforms::DomEngine;
use crate::types::{EventKind, ListenerId, NodeRef, SyntheticEvent};

const ACTIVATION_HOVER_SEQUENCE: &[EventKind] = &[
    EventKind::MouseEnter,
    EventKind::MouseOver,
    EventKind::MouseMove,
    EventKind::Focus,
];

const RELEASE_SEQUENCE: &[EventKind] = &[
    EventKind::MouseOut,
    EventKind::MouseLeave,
    EventKind::PointerOut,
    EventKind::PointerLeave,
];

/// Trigger the site's own listeners on `node`.
///
/// Click mode sends a single bubbling click at the element's center; hover mode sends
/// the enter/over/move/focus sequence and no click, since a click on a hover-driven
/// trigger often toggles the menu shut again or follows its link (see the hover-mode
/// entry under "Open question and ambiguity decisions" in DESIGN.md).
pub fn simulate_activation(engine: &dyn DomEngine, node: NodeRef, mode: TriggerMode) -> Result<()> {
    let center = engine.bounding_rect(node).center();
    let kinds: &[EventKind] = match mode {
        TriggerMode::Click => &[EventKind::Click],
        TriggerMode::Hover => ACTIVATION_HOVER_SEQUENCE,
    };
    for kind in kinds {
        engine
            .dispatch_event(node, &SyntheticEvent::at(*kind, center))
            .map_err(|e| DiscoveryError::EventDispatch(format!("{kind} on {node}: {e}")))?;
    }
    debug!(%node, ?mode, "Simulated activation");
    Ok(())
}

/// Send leave events so a hover-opened menu closes before the baseline is taken.
/// Failures are logged and ignored.
pub fn release_hover(engine: &dyn DomEngine, node: NodeRef) {
    let center = engine.bounding_rect(node).center();
    for kind in RELEASE_SEQUENCE {
        if let Err(e) = engine.dispatch_event(node, &SyntheticEvent::at(*kind, center)) {
            debug!(%node, %kind, error = %e, "Release event not delivered");
        }
    }
}

/// State captured for one element that already looked open when the freeze began
#[derive(Debug, Clone)]
struct OpenSignals {
    node: NodeRef,
    attributes: Vec<(&'static str, String)>,
    classes: Vec<String>,
}

/// Holds a menu open: swallows closing events and re-asserts open state on a timer.
///
/// Every job and listener is released by [`FreezeController::unfreeze`], which also
/// runs on drop.
pub struct FreezeController {
    engine: Arc<dyn DomEngine>,
    listener: Option<ListenerId>,
    jobs: Vec<JoinHandle<()>>,
    /// (element, property, previous inline value)
    forced_styles: Vec<(NodeRef, &'static str, Option<String>)>,
    frozen: Vec<NodeRef>,
}

impl std::fmt::Debug for FreezeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreezeController")
            .field("listener", &self.listener)
            .field("jobs", &self.jobs.len())
            .field("frozen", &self.frozen)
            .finish()
    }
}

impl FreezeController {
    /// Freeze the subtree rooted at `target`. Must be called inside a tokio runtime.
    pub fn freeze(
        engine: Arc<dyn DomEngine>,
        target: NodeRef,
        config: &DiscoveryConfig,
    ) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| DiscoveryError::ObserverSetup(format!("no runtime for freeze jobs: {e}")))?;

        let listener = engine.add_suppressor(&config.suppressed_events)?;
        let mut controller = Self {
            engine: engine.clone(),
            listener: Some(listener),
            jobs: Vec::new(),
            forced_styles: Vec::new(),
            frozen: Vec::new(),
        };

        let mut scope = vec![target];
        scope.extend(engine.descendants(target));
        let signals: Vec<OpenSignals> = scope
            .into_iter()
            .filter_map(|node| open_signals(engine.as_ref(), node, config))
            .collect();

        for signal in signals {
            if let Err(e) = controller.force_visible(signal.node) {
                controller.unfreeze();
                return Err(e);
            }
            controller.frozen.push(signal.node);

            let engine = engine.clone();
            let period = config.reassert_interval();
            controller.jobs.push(handle.spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let failed = reassert(engine.as_ref(), &signal);
                    if failed > 0 {
                        debug!(node = %signal.node, failed, "Open state not fully re-asserted");
                    }
                }
            }));
        }

        info!(
            %target,
            frozen = controller.frozen.len(),
            "Freeze engaged"
        );
        Ok(controller)
    }

    fn force_visible(&mut self, node: NodeRef) -> Result<()> {
        for (property, value) in [("opacity", "1"), ("visibility", "visible")] {
            let previous = self.engine.inline_style(node, property);
            self.engine.set_inline_style(node, property, Some(value))?;
            self.forced_styles.push((node, property, previous));
        }
        Ok(())
    }

    /// Elements whose open state is being re-asserted
    pub fn frozen_nodes(&self) -> &[NodeRef] {
        &self.frozen
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| !j.is_finished()).count()
    }

    pub fn is_engaged(&self) -> bool {
        self.listener.is_some() || !self.jobs.is_empty()
    }

    /// Cancel every job, remove the suppressor and restore forced inline styles.
    /// Safe to call more than once.
    pub fn unfreeze(&mut self) {
        if !self.is_engaged() && self.forced_styles.is_empty() {
            return;
        }
        for job in self.jobs.drain(..) {
            job.abort();
        }
        if let Some(listener) = self.listener.take() {
            if !self.engine.remove_listener(listener) {
                warn!(?listener, "Suppressor was already removed");
            }
        }
        while let Some((node, property, previous)) = self.forced_styles.pop() {
            if let Err(e) = self
                .engine
                .set_inline_style(node, property, previous.as_deref())
            {
                debug!(%node, property, error = %e, "Could not restore inline style");
            }
        }
        self.frozen.clear();
        info!("Freeze released");
    }
}

impl Drop for FreezeController {
    fn drop(&mut self) {
        self.unfreeze();
    }
}

fn open_signals(engine: &dyn DomEngine, node: NodeRef, config: &DiscoveryConfig) -> Option<OpenSignals> {
    let mut attributes = Vec::new();
    if engine.get_attribute(node, "aria-expanded").as_deref() == Some("true") {
        attributes.push(("aria-expanded", "true".to_string()));
    }
    if engine.get_attribute(node, "aria-hidden").as_deref() == Some("false") {
        attributes.push(("aria-hidden", "false".to_string()));
    }
    let classes: Vec<String> = engine
        .class_list(node)
        .into_iter()
        .filter(|c| config.is_state_class(c))
        .collect();
    if attributes.is_empty() && classes.is_empty() {
        return None;
    }
    Some(OpenSignals {
        node,
        attributes,
        classes,
    })
}

/// Re-apply captured open state to one element. Returns the number of writes that failed.
fn reassert(engine: &dyn DomEngine, signal: &OpenSignals) -> usize {
    if !engine.is_connected(signal.node) {
        trace!(node = %signal.node, "Skipping re-assertion on detached element");
        return 0;
    }
    let mut failed = 0;
    for (name, value) in &signal.attributes {
        if engine.get_attribute(signal.node, name).as_deref() != Some(value.as_str()) {
            if let Err(e) = engine.set_attribute(signal.node, name, value) {
                trace!(node = %signal.node, attribute = *name, error = %e, "Re-assert failed");
                failed += 1;
            }
        }
    }
    let present = engine.class_list(signal.node);
    for class in &signal.classes {
        if !present.contains(class) {
            if let Err(e) = engine.add_class(signal.node, class) {
                trace!(node = %signal.node, %class, error = %e, "Re-assert failed");
                failed += 1;
            }
        }
    }
    for (property, value) in [("opacity", "1"), ("visibility", "visible")] {
        if engine.inline_style(signal.node, property).as_deref() != Some(value) {
            if let Err(e) = engine.set_inline_style(signal.node, property, Some(value)) {
                trace!(node = %signal.node, property, error = %e, "Re-assert failed");
                failed += 1;
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::HeadlessDom;
    use std::time::Duration;

    fn page() -> (Arc<HeadlessDom>, NodeRef, NodeRef) {
        let dom = Arc::new(HeadlessDom::new());
        let body = dom.body().unwrap();
        let item = dom.create_element(body, "li", &[("class", "menu-item is-open")]);
        let panel = dom.create_element(
            item,
            "ul",
            &[("class", "sub-menu"), ("aria-hidden", "false"), ("style", "opacity: 0.5;")],
        );
        (dom, item, panel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_freeze_lifecycle_releases_everything() {
        let (dom, item, panel) = page();
        let engine: Arc<dyn DomEngine> = dom.clone();
        let before_item = dom.get_attribute(item, "style");
        let before_panel = dom.get_attribute(panel, "style");

        let mut freeze =
            FreezeController::freeze(engine, item, &DiscoveryConfig::default()).unwrap();
        assert_eq!(freeze.frozen_nodes(), &[item, panel]);
        assert_eq!(freeze.active_jobs(), 2);
        assert_eq!(dom.active_listener_count(), 1);
        assert_eq!(dom.inline_style(panel, "opacity").as_deref(), Some("1"));

        freeze.unfreeze();
        assert_eq!(freeze.active_jobs(), 0);
        assert_eq!(dom.active_listener_count(), 0);
        assert_eq!(dom.get_attribute(item, "style"), before_item);
        assert_eq!(dom.get_attribute(panel, "style"), before_panel);

        // Second release is a no-op
        freeze.unfreeze();
        assert_eq!(dom.active_listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reassertion_undoes_site_close() {
        let (dom, item, panel) = page();
        let engine: Arc<dyn DomEngine> = dom.clone();
        let freeze = FreezeController::freeze(engine, item, &DiscoveryConfig::default()).unwrap();

        dom.remove_class(item, "is-open").unwrap();
        dom.set_attribute(panel, "aria-hidden", "true").unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(dom.class_list(item).contains(&"is-open".to_string()));
        assert_eq!(dom.get_attribute(panel, "aria-hidden").as_deref(), Some("false"));
        drop(freeze);
        assert_eq!(dom.active_listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_events_suppressed_while_frozen() {
        let (dom, item, _) = page();
        let engine: Arc<dyn DomEngine> = dom.clone();
        let mut freeze =
            FreezeController::freeze(engine, item, &DiscoveryConfig::default()).unwrap();
        let leave = SyntheticEvent::at(EventKind::MouseLeave, (0.0, 0.0));
        assert!(!dom.dispatch_event(item, &leave).unwrap());
        freeze.unfreeze();
        assert!(dom.dispatch_event(item, &leave).unwrap());
    }

    #[test]
    fn test_freeze_outside_runtime_is_observer_error() {
        let (dom, item, _) = page();
        let engine: Arc<dyn DomEngine> = dom.clone();
        let err = FreezeController::freeze(engine, item, &DiscoveryConfig::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::ObserverSetup(_)));
        assert_eq!(dom.active_listener_count(), 0);
    }

    #[test]
    fn test_reassert_reports_and_skips_detached() {
        let (dom, item, panel) = page();
        let signal = open_signals(dom.as_ref(), panel, &DiscoveryConfig::default()).unwrap();
        dom.set_attribute(panel, "aria-hidden", "true").unwrap();
        assert_eq!(reassert(dom.as_ref(), &signal), 0);
        assert_eq!(dom.get_attribute(panel, "aria-hidden").as_deref(), Some("false"));
        assert_eq!(dom.inline_style(panel, "visibility").as_deref(), Some("visible"));

        dom.detach(item);
        dom.set_attribute(panel, "aria-hidden", "true").unwrap();
        assert_eq!(reassert(dom.as_ref(), &signal), 0);
        assert_eq!(dom.get_attribute(panel, "aria-hidden").as_deref(), Some("true"));
    }

    #[test]
    fn test_click_and_hover_activation_sequences() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let button = dom.create_element(body, "button", &[]);

        simulate_activation(&dom, button, TriggerMode::Click).unwrap();
        assert_eq!(dom.dispatched_events(), vec![(button, EventKind::Click)]);

        dom.clear_dispatch_log();
        simulate_activation(&dom, button, TriggerMode::Hover).unwrap();
        let kinds: Vec<EventKind> = dom.dispatched_events().into_iter().map(|(_, k)| k).collect();
        assert_eq!(kinds, ACTIVATION_HOVER_SEQUENCE.to_vec());

        dom.detach(button);
        let err = simulate_activation(&dom, button, TriggerMode::Click).unwrap_err();
        assert!(matches!(err, DiscoveryError::EventDispatch(_)));
    }
}
