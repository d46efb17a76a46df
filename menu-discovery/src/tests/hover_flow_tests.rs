use std::time::Duration;

use super::{drain_steps, step_kinds, MenuPage};
use crate::config::{DiscoveryConfig, TriggerMode};
use crate::discovery::{MenuDiscovery, PageInput};
use crate::events::StepKind;
use crate::platforms::DomEngine;
use crate::session::DiscoveryPhase;
use crate::types::EventKind;

fn hover_config() -> DiscoveryConfig {
    DiscoveryConfig {
        trigger_mode: TriggerMode::Hover,
        verify_toggles: 0,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_leaving_early_cancels_target_capture() {
    let page = MenuPage::new(EventKind::MouseEnter);
    let discovery = MenuDiscovery::new(page.engine(), hover_config());
    discovery.start().await;

    discovery.handle_input(PageInput::Hover(page.button)).await;
    tokio::time::sleep(Duration::from_millis(4000)).await;
    discovery.handle_input(PageInput::Leave(page.button)).await;
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(discovery.phase().await, DiscoveryPhase::AwaitingTargetHover);
    assert!(discovery.inspect(|s| s.hover_timer.is_none()).await);

    // Moving to another element restarts the delay
    discovery.handle_input(PageInput::Hover(page.button)).await;
    tokio::time::sleep(Duration::from_millis(3000)).await;
    discovery.handle_input(PageInput::Hover(page.header)).await;
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(discovery.phase().await, DiscoveryPhase::AwaitingTargetHover);
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(
        discovery.phase().await,
        DiscoveryPhase::ConfirmingTargetCandidate
    );
    assert_eq!(
        discovery
            .inspect(|s| s.current_candidate().map(|c| c.node))
            .await,
        Some(page.header)
    );
}

#[tokio::test(start_paused = true)]
async fn test_hover_flow_uses_hovered_menu_path() {
    let page = MenuPage::new(EventKind::MouseEnter);
    let discovery = MenuDiscovery::new(page.engine(), hover_config());
    let mut rx = discovery.subscribe();
    discovery.start().await;

    discovery.handle_input(PageInput::Hover(page.button)).await;
    tokio::time::sleep(Duration::from_millis(5100)).await;
    assert_eq!(
        discovery.phase().await,
        DiscoveryPhase::ConfirmingTargetCandidate
    );
    discovery.confirm().await;

    // release + settle + activation + settle
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(discovery.phase().await, DiscoveryPhase::AwaitingMenuHover);
    assert!(discovery.inspect(|s| s.scan_ready).await);
    assert_eq!(page.dom.computed_style(page.nav, "display"), "block");

    // Hover mode activation never clicks
    assert!(page
        .dom
        .dispatched_events()
        .iter()
        .all(|(_, kind)| *kind != EventKind::Click));

    discovery.handle_input(PageInput::Hover(page.link)).await;
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(
        discovery.phase().await,
        DiscoveryPhase::ConfirmingMenuCandidate
    );
    let nodes = discovery
        .inspect(|s| s.candidates.iter().map(|c| c.node).collect::<Vec<_>>())
        .await;
    assert_eq!(nodes.first(), Some(&page.nav));
    assert!(nodes.contains(&page.link));

    discovery.confirm().await;
    assert_eq!(discovery.phase().await, DiscoveryPhase::Complete);
    assert_eq!(page.dom.active_listener_count(), 0);

    let kinds = step_kinds(&drain_steps(&mut rx));
    assert_eq!(
        kinds,
        vec![
            StepKind::AwaitingTargetHover,
            StepKind::ConfirmingTargetCandidate,
            StepKind::OpeningMenu,
            StepKind::AwaitingMenuHover,
            StepKind::ConfirmingMenuCandidate,
            StepKind::Complete,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_failure_is_fatal_and_cleans_up() {
    let page = MenuPage::new(EventKind::MouseEnter);
    let discovery = MenuDiscovery::new(page.engine(), hover_config());
    let mut rx = discovery.subscribe();
    discovery.start().await;
    discovery.handle_input(PageInput::Click(page.button)).await;
    discovery.confirm().await;

    // The scan is in its pre-activation settle; the trigger disappears meanwhile
    tokio::time::sleep(Duration::from_millis(100)).await;
    page.dom.detach(page.button);
    tokio::time::sleep(Duration::from_millis(2000)).await;

    assert_eq!(discovery.phase().await, DiscoveryPhase::Cancelled);
    assert!(discovery.inspect(|s| s.is_idle()).await);
    assert_eq!(page.dom.active_observer_count(), 0);
    assert_eq!(page.dom.active_listener_count(), 0);
    let last = drain_steps(&mut rx).pop().unwrap();
    assert_eq!(last.step, StepKind::Error);
    assert!(last.error);
}

#[tokio::test(start_paused = true)]
async fn test_hover_toggle_test_alternates_enter_and_leave() {
    let page = MenuPage::new(EventKind::MouseEnter);
    let config = DiscoveryConfig {
        trigger_mode: TriggerMode::Hover,
        verify_toggles: 2,
        ..Default::default()
    };
    let discovery = MenuDiscovery::new(page.engine(), config);
    discovery.start().await;
    discovery.handle_input(PageInput::Click(page.button)).await;
    discovery.confirm().await;
    tokio::time::sleep(Duration::from_millis(1000)).await;
    discovery.handle_input(PageInput::Hover(page.link)).await;
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(
        discovery.phase().await,
        DiscoveryPhase::ConfirmingMenuCandidate
    );

    page.dom.clear_dispatch_log();
    discovery.confirm().await;
    assert_eq!(discovery.phase().await, DiscoveryPhase::Testing);
    tokio::time::sleep(Duration::from_millis(1700)).await;
    assert_eq!(
        discovery.phase().await,
        DiscoveryPhase::ConfirmingFinalState
    );

    let kinds: Vec<EventKind> = page
        .dom
        .dispatched_events()
        .into_iter()
        .map(|(_, kind)| kind)
        .collect();
    assert_eq!(kinds.first(), Some(&EventKind::MouseEnter));
    assert_eq!(kinds.last(), Some(&EventKind::PointerLeave));
    assert!(!kinds.contains(&EventKind::Click));

    discovery.confirm().await;
    let result = discovery.result().await.expect("result");
    assert_eq!(result.final_state_open, Some(true));
}
