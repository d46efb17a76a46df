mod hover_flow_tests;

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::events::{DiscoveryStep, StepKind};
use crate::platforms::{DomEngine, HeadlessDom};
use crate::types::{EventKind, NodeRef, Rect};

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

/// A header holding `button.menu-toggle` and a hidden `nav.nav-menu`.
pub struct MenuPage {
    pub dom: Arc<HeadlessDom>,
    pub header: NodeRef,
    pub button: NodeRef,
    pub nav: NodeRef,
    pub link: NodeRef,
}

impl MenuPage {
    /// `opener` is the event the site listens to on the button.
    pub fn new(opener: EventKind) -> Self {
        let dom = Arc::new(HeadlessDom::new());
        let body = dom.body().expect("body");
        let header = dom.create_element(body, "header", &[("class", "site-header")]);
        dom.set_rect(header, Rect::new(0.0, 0.0, 1280.0, 80.0));
        let button = dom.create_element(header, "button", &[("class", "menu-toggle")]);
        dom.set_rect(button, Rect::new(1200.0, 20.0, 40.0, 40.0));
        let nav = dom.create_element(
            header,
            "nav",
            &[("class", "nav-menu"), ("style", "display:none")],
        );
        dom.set_rect(nav, Rect::new(0.0, 80.0, 1280.0, 240.0));
        let link = dom.create_element(nav, "a", &[("class", "nav-link"), ("href", "/shop")]);
        dom.set_rect(link, Rect::new(20.0, 100.0, 120.0, 30.0));

        dom.on(button, opener, move |dom, _| {
            dom.set_inline_style(nav, "display", Some("block")).expect("open nav");
            dom.add_class(nav, "is-open").expect("mark nav open");
        });

        Self {
            dom,
            header,
            button,
            nav,
            link,
        }
    }

    pub fn engine(&self) -> Arc<dyn DomEngine> {
        self.dom.clone()
    }
}

/// Everything currently queued on a step receiver
pub fn drain_steps(rx: &mut broadcast::Receiver<DiscoveryStep>) -> Vec<DiscoveryStep> {
    let mut steps = Vec::new();
    while let Ok(step) = rx.try_recv() {
        steps.push(step);
    }
    steps
}

pub fn step_kinds(steps: &[DiscoveryStep]) -> Vec<StepKind> {
    steps.iter().map(|s| s.step).collect()
}
