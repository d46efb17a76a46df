//! The confirmation state machine that drives an operator from a hovered element to a
//! confirmed trigger/menu pair and a reproduction snippet.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DiscoveryConfig, TriggerMode};
use crate::errors::{DiscoveryError, Result};
use crate::events::{DiscoveryStep, StepKind};
use crate::interaction::{release_hover, simulate_activation, FreezeController};
use crate::locator::{
    build_ancestor_path, collect_menu_candidates, locate_header, Candidate, CandidateReason,
    MenuScan,
};
use crate::platforms::DomEngine;
use crate::selector::SelectorGenerator;
use crate::session::{DiscoveryPhase, DiscoveryResult, DiscoverySession, HoverTimer};
use crate::snapshot::{diff, is_effectless, ElementSnapshot};
use crate::snippet::{ElementCapture, SnippetBuilder};
use crate::types::{EventKind, MutationRecord, NodeRef, SyntheticEvent};

const STEP_CHANNEL_CAPACITY: usize = 100;

/// Pointer activity forwarded from the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageInput {
    Hover(NodeRef),
    Leave(NodeRef),
    Click(NodeRef),
}

struct Inner {
    engine: Arc<dyn DomEngine>,
    config: DiscoveryConfig,
    session: Mutex<DiscoverySession>,
    step_tx: broadcast::Sender<DiscoveryStep>,
}

/// Interactive menu trigger/panel discovery over a [`DomEngine`].
///
/// Cheap to clone; clones share the same session. Operator commands never fail: a command
/// that does not apply to the current phase logs a warning and does nothing.
#[derive(Clone)]
pub struct MenuDiscovery {
    inner: Arc<Inner>,
}

impl MenuDiscovery {
    pub fn new(engine: Arc<dyn DomEngine>, config: DiscoveryConfig) -> Self {
        let (step_tx, _) = broadcast::channel(STEP_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                engine,
                config,
                session: Mutex::new(DiscoverySession::new(None)),
                step_tx,
            }),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryStep> {
        self.inner.step_tx.subscribe()
    }

    /// Host steps as a stream; lagging consumers skip ahead instead of ending the stream.
    pub fn event_stream(&self) -> impl Stream<Item = DiscoveryStep> {
        let mut rx = self.inner.step_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(step) => yield step,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Step stream lagged, skipped {} steps", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn phase(&self) -> DiscoveryPhase {
        self.inner.session.lock().await.phase
    }

    pub async fn session_id(&self) -> String {
        self.inner.session.lock().await.id.clone()
    }

    pub async fn result(&self) -> Option<DiscoveryResult> {
        self.inner.session.lock().await.result.clone()
    }

    /// Read-only access to the live session
    pub async fn inspect<R>(&self, f: impl FnOnce(&DiscoverySession) -> R) -> R {
        let session = self.inner.session.lock().await;
        f(&session)
    }

    /// Locate the navigation region and wait for the operator to point at a trigger.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        let engine = self.inner.engine.as_ref();
        let region = locate_header(engine);
        let mut session = self.inner.session.lock().await;
        session.reset(engine);
        session.header_region = region;

        let message = match region {
            Some(node) => {
                info!(session = %session.id, %node, "Discovery started");
                self.waiting_for_target_message()
            }
            None => {
                let e = DiscoveryError::RegionNotFound("no visible header or nav".into());
                warn!(session = %session.id, error = %e, "Falling back to whole-document scope");
                format!(
                    "{} No header was found, the whole page is in scope.",
                    self.waiting_for_target_message()
                )
            }
        };
        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::AwaitingTargetHover,
                "Find the menu button",
                message,
            )
            .waiting(),
        );
    }

    fn waiting_for_target_message(&self) -> String {
        match self.inner.config.trigger_mode {
            TriggerMode::Click => "Click the button that opens the menu.".to_string(),
            TriggerMode::Hover => format!(
                "Hover over the menu button for {} seconds.",
                self.inner.config.target_hover_delay_ms / 1000
            ),
        }
    }

    /// Feed pointer activity observed on the page.
    pub async fn handle_input(&self, input: PageInput) {
        let engine = self.inner.engine.as_ref();
        let mut session = self.inner.session.lock().await;
        match (session.phase, input) {
            (DiscoveryPhase::AwaitingTargetHover, PageInput::Click(node)) => {
                session.cancel_hover_timer();
                self.qualify_target(&mut session, node);
            }
            (DiscoveryPhase::AwaitingTargetHover, PageInput::Hover(node)) => {
                if self.is_document_level(node) {
                    return;
                }
                let delay = self.inner.config.target_hover_delay();
                self.start_hover_timer(&mut session, node, delay);
            }
            (DiscoveryPhase::AwaitingMenuHover, PageInput::Hover(node)) => {
                session.menu_hover = Some(node);
                if self.inner.config.trigger_mode == TriggerMode::Hover && session.scan_ready {
                    let delay = self.inner.config.menu_hover_delay();
                    self.start_hover_timer(&mut session, node, delay);
                }
            }
            (_, PageInput::Leave(node)) => {
                let tracked = session
                    .hover_timer
                    .as_ref()
                    .is_some_and(|t| engine.contains(node, t.node));
                if tracked {
                    debug!(%node, "Pointer left before the hover delay elapsed");
                    session.cancel_hover_timer();
                }
            }
            (phase, input) => {
                debug!(%phase, ?input, "Ignoring page input");
            }
        }
    }

    fn is_document_level(&self, node: NodeRef) -> bool {
        let engine = self.inner.engine.as_ref();
        node == engine.document_element() || Some(node) == engine.body()
    }

    fn start_hover_timer(&self, session: &mut DiscoverySession, node: NodeRef, delay: Duration) {
        if session.hover_timer.as_ref().is_some_and(|t| t.node == node) {
            return;
        }
        session.cancel_hover_timer();
        let this = self.clone();
        let epoch = session.scan_epoch;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.on_hover_elapsed(node, epoch).await;
        });
        session.hover_timer = Some(HoverTimer { node, handle });
    }

    async fn on_hover_elapsed(&self, node: NodeRef, epoch: u64) {
        let mut session = self.inner.session.lock().await;
        let still_tracked = session.scan_epoch == epoch
            && session.hover_timer.as_ref().is_some_and(|t| t.node == node);
        if !still_tracked {
            return;
        }
        // Finished timers are dropped rather than aborted; this task is the timer.
        session.hover_timer = None;
        match session.phase {
            DiscoveryPhase::AwaitingTargetHover => self.qualify_target(&mut session, node),
            DiscoveryPhase::AwaitingMenuHover if session.scan_ready => {
                session.menu_hover = Some(node);
                self.collect_and_present(&mut session);
            }
            phase => debug!(%phase, %node, "Hover delay elapsed in unrelated phase"),
        }
    }

    fn qualify_target(&self, session: &mut DiscoverySession, node: NodeRef) {
        let engine = self.inner.engine.as_ref();
        if self.is_document_level(node) || !engine.is_connected(node) {
            return;
        }

        if let Some(region) = session.header_region {
            if !engine.contains(region, node) {
                session.pending_outside = Some(node);
                session.outline(engine, node, &self.inner.config.outline_style);
                session.phase = DiscoveryPhase::OutsideRegion;
                info!(%node, "Candidate lies outside the navigation region");
                self.emit(
                    DiscoveryStep::new(
                        session.id.clone(),
                        StepKind::OutsideRegion,
                        "Outside the header",
                        "This element is outside the detected header. Use it anyway?",
                    )
                    .with_buttons(Some("Use it"), Some("Pick again")),
                );
                return;
            }
        }

        let path = build_ancestor_path(engine, node, session.header_region);
        self.present_target_path(session, path);
    }

    fn present_target_path(&self, session: &mut DiscoverySession, path: Vec<NodeRef>) {
        session.candidates = path
            .into_iter()
            .map(|node| Candidate {
                node,
                score: 0,
                reason: CandidateReason::AncestorPath,
                change_count: 0,
            })
            .collect();
        session.current_index = 0;
        session.phase = DiscoveryPhase::ConfirmingTargetCandidate;
        self.show_current_candidate(session);
    }

    fn show_current_candidate(&self, session: &mut DiscoverySession) {
        let engine = self.inner.engine.as_ref();
        let Some(candidate) = session.current_candidate().cloned() else {
            return;
        };
        session.clear_outlines(engine);
        session.outline(engine, candidate.node, &self.inner.config.outline_style);

        let title = match session.phase {
            DiscoveryPhase::ConfirmingMenuCandidate => "Is this the menu?",
            _ => "Is this the menu button?",
        };
        let description = SelectorGenerator::new(engine)
            .generate(candidate.node)
            .unwrap_or_else(|| engine.tag_name(candidate.node));
        debug!(node = %candidate.node, score = candidate.score, %description, "Showing candidate");
        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::from(session.phase),
                title,
                format!("The outlined element is {description}."),
            )
            .with_buttons(None, None)
            .with_progress(session.current_index + 1, session.candidates.len()),
        );
    }

    /// Accept the current candidate.
    #[instrument(skip(self))]
    pub async fn confirm(&self) {
        let engine = self.inner.engine.as_ref();
        let mut session = self.inner.session.lock().await;
        match session.phase {
            DiscoveryPhase::ConfirmingTargetCandidate => {
                if let Some(candidate) = session.current_candidate().cloned() {
                    self.accept_target(&mut session, candidate.node);
                }
            }
            DiscoveryPhase::OutsideRegion => {
                let Some(node) = session.pending_outside.take() else {
                    return;
                };
                let path = build_ancestor_path(engine, node, None);
                self.present_target_path(&mut session, path);
            }
            DiscoveryPhase::ConfirmingMenuCandidate => {
                if let Some(candidate) = session.current_candidate().cloned() {
                    if let Err(e) = self.accept_menu(&mut session, candidate.node) {
                        self.fail(&mut session, e);
                    }
                }
            }
            DiscoveryPhase::CandidatesExhausted => self.restart_menu_scan(&mut session),
            DiscoveryPhase::ConfirmingFinalState => self.finish_final_state(&mut session, true),
            phase => self.invalid_command("confirm", phase),
        }
    }

    /// Reject the current candidate and move on.
    #[instrument(skip(self))]
    pub async fn reject(&self) {
        let engine = self.inner.engine.as_ref();
        let mut session = self.inner.session.lock().await;
        match session.phase {
            DiscoveryPhase::ConfirmingTargetCandidate => {
                if session.current_index + 1 < session.candidates.len() {
                    session.current_index += 1;
                    self.show_current_candidate(&mut session);
                } else if let Some(last) = session.candidates.last().cloned() {
                    info!(node = %last.node, "Target path exhausted, using outermost candidate");
                    self.accept_target(&mut session, last.node);
                }
            }
            DiscoveryPhase::OutsideRegion => {
                session.pending_outside = None;
                session.clear_outlines(engine);
                session.phase = DiscoveryPhase::AwaitingTargetHover;
                self.emit(
                    DiscoveryStep::new(
                        session.id.clone(),
                        StepKind::AwaitingTargetHover,
                        "Find the menu button",
                        self.waiting_for_target_message(),
                    )
                    .waiting(),
                );
            }
            DiscoveryPhase::ConfirmingMenuCandidate => {
                if session.current_index + 1 < session.candidates.len() {
                    session.current_index += 1;
                    self.show_current_candidate(&mut session);
                } else {
                    self.enter_exhausted(&mut session);
                }
            }
            DiscoveryPhase::CandidatesExhausted => self.cancel_locked(&mut session),
            DiscoveryPhase::ConfirmingFinalState => self.finish_final_state(&mut session, false),
            phase => self.invalid_command("reject", phase),
        }
    }

    /// Abandon the session, releasing every resource. Valid from any non-terminal phase.
    #[instrument(skip(self))]
    pub async fn cancel(&self) {
        let mut session = self.inner.session.lock().await;
        if session.phase.is_terminal() {
            self.invalid_command("cancel", session.phase);
            return;
        }
        self.cancel_locked(&mut session);
    }

    /// Re-enter the current sub-phase: target selection starts over, menu detection re-scans.
    #[instrument(skip(self))]
    pub async fn retry(&self) {
        let engine = self.inner.engine.as_ref();
        let mut session = self.inner.session.lock().await;
        match session.phase {
            DiscoveryPhase::ConfirmingTargetCandidate | DiscoveryPhase::OutsideRegion => {
                session.reset(engine);
                self.emit(
                    DiscoveryStep::new(
                        session.id.clone(),
                        StepKind::AwaitingTargetHover,
                        "Find the menu button",
                        self.waiting_for_target_message(),
                    )
                    .waiting(),
                );
            }
            DiscoveryPhase::AwaitingMenuHover
            | DiscoveryPhase::ConfirmingMenuCandidate
            | DiscoveryPhase::CandidatesExhausted => self.restart_menu_scan(&mut session),
            phase => self.invalid_command("retry", phase),
        }
    }

    /// Reset everything and wait for a new target, from any phase.
    #[instrument(skip(self))]
    pub async fn restart(&self) {
        let engine = self.inner.engine.as_ref();
        let mut session = self.inner.session.lock().await;
        session.reset(engine);
        info!(session = %session.id, "Discovery restarted");
        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::AwaitingTargetHover,
                "Find the menu button",
                self.waiting_for_target_message(),
            )
            .waiting(),
        );
    }

    /// Tear down without notifying the host.
    pub async fn destroy(&self) {
        let engine = self.inner.engine.as_ref();
        let mut session = self.inner.session.lock().await;
        session.reset(engine);
        session.phase = DiscoveryPhase::Cancelled;
        debug!(session = %session.id, "Discovery destroyed");
    }

    fn invalid_command(&self, command: &str, phase: DiscoveryPhase) {
        let e = DiscoveryError::InvalidCommandForState {
            command: command.to_string(),
            phase: phase.to_string(),
        };
        warn!("{}", e);
    }

    fn cancel_locked(&self, session: &mut DiscoverySession) {
        session.reset(self.inner.engine.as_ref());
        session.phase = DiscoveryPhase::Cancelled;
        info!(session = %session.id, "Discovery cancelled");
        self.emit(DiscoveryStep::new(
            session.id.clone(),
            StepKind::Cancelled,
            "Cancelled",
            "Menu discovery was cancelled.",
        ));
    }

    fn enter_exhausted(&self, session: &mut DiscoverySession) {
        let engine = self.inner.engine.as_ref();
        session.clear_outlines(engine);
        session.phase = DiscoveryPhase::CandidatesExhausted;
        let e = DiscoveryError::CandidateExhausted("no menu candidate accepted".into());
        info!(session = %session.id, "{}", e);
        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::CandidatesExhausted,
                "No more candidates",
                "None of the candidates was the menu. Try again?",
            )
            .with_buttons(Some("Retry"), Some("Cancel")),
        );
    }

    /// Report a session-fatal error after releasing everything.
    fn fail(&self, session: &mut DiscoverySession, e: DiscoveryError) {
        error!(
            session = %session.id,
            error = %e,
            fatal = e.is_fatal_to_session(),
            "Discovery failed"
        );
        session.reset(self.inner.engine.as_ref());
        session.phase = DiscoveryPhase::Cancelled;
        self.emit(
            DiscoveryStep::new(session.id.clone(), StepKind::Error, "Error", e.to_string())
                .failed(),
        );
    }

    fn emit(&self, step: DiscoveryStep) {
        if self.inner.step_tx.send(step).is_err() {
            debug!("No step subscribers");
        }
    }

    // ============== MENU PHASE ==============

    fn accept_target(&self, session: &mut DiscoverySession, node: NodeRef) {
        let engine = self.inner.engine.as_ref();
        session.saved_target = Some(node);
        session.clear_outlines(engine);
        info!(target = %node, "Target confirmed");

        if let Some((summary, panel)) = self.details_shortcut(node) {
            if let Err(e) = self.open_details(session, node, summary, panel) {
                self.fail(session, e);
            }
            return;
        }
        self.restart_menu_scan(session);
    }

    /// `(summary, panel)` when the target is, contains or sits inside a `<details>`
    fn details_shortcut(&self, target: NodeRef) -> Option<(NodeRef, NodeRef)> {
        let engine = self.inner.engine.as_ref();
        let mut details = None;
        let mut current = Some(target);
        while let Some(node) = current {
            if engine.tag_name(node) == "details" {
                details = Some(node);
                break;
            }
            current = engine.parent(node);
        }
        let details = details.or_else(|| {
            engine
                .descendants(target)
                .into_iter()
                .find(|n| engine.tag_name(*n) == "details")
        })?;
        let summary = engine
            .children(details)
            .into_iter()
            .find(|c| engine.tag_name(*c) == "summary")?;
        let panel = engine.next_element_sibling(summary)?;
        Some((summary, panel))
    }

    fn open_details(
        &self,
        session: &mut DiscoverySession,
        target: NodeRef,
        summary: NodeRef,
        panel: NodeRef,
    ) -> Result<()> {
        let engine = self.inner.engine.as_ref();
        let details = engine
            .parent(summary)
            .ok_or_else(|| DiscoveryError::Internal("summary without details".into()))?;
        if engine.get_attribute(details, "open").is_some() {
            engine.remove_attribute(details, "open")?;
        }
        session.baseline = [target, panel]
            .into_iter()
            .filter_map(|n| ElementSnapshot::capture(engine, Some(n)).map(|s| (n, s)))
            .collect();

        let center = engine.bounding_rect(summary).center();
        engine
            .dispatch_event(summary, &SyntheticEvent::at(EventKind::Click, center))
            .map_err(|e| DiscoveryError::EventDispatch(format!("click on {summary}: {e}")))?;

        info!(%details, %panel, "Disclosure element found, skipping menu scan");
        session.candidates = vec![Candidate {
            node: panel,
            score: 0,
            reason: CandidateReason::AncestorPath,
            change_count: 0,
        }];
        session.current_index = 0;
        session.phase = DiscoveryPhase::ConfirmingMenuCandidate;
        self.show_current_candidate(session);
        Ok(())
    }

    fn restart_menu_scan(&self, session: &mut DiscoverySession) {
        let engine = self.inner.engine.as_ref();
        session.release_resources(engine);
        session.candidates.clear();
        session.current_index = 0;
        session.records.clear();
        session.baseline.clear();
        session.menu_hover = None;
        session.phase = DiscoveryPhase::AwaitingMenuHover;

        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::OpeningMenu,
                "Opening the menu",
                "Opening the menu and watching for changes...",
            )
            .waiting(),
        );

        let this = self.clone();
        let epoch = session.scan_epoch;
        session.menu_task = Some(tokio::spawn(async move {
            this.run_menu_scan(epoch).await;
        }));
    }

    /// Lock the session if the task started at `epoch` is still current and in `phase`.
    async fn lock_current(
        &self,
        epoch: u64,
        phase: DiscoveryPhase,
    ) -> Option<MutexGuard<'_, DiscoverySession>> {
        let session = self.inner.session.lock().await;
        (session.scan_epoch == epoch && session.phase == phase).then_some(session)
    }

    async fn run_menu_scan(&self, epoch: u64) {
        let engine = self.inner.engine.clone();
        let config = &self.inner.config;

        let Some(target) = self.lock_current(epoch, DiscoveryPhase::AwaitingMenuHover).await.and_then(|s| s.saved_target) else {
            return;
        };

        if config.trigger_mode == TriggerMode::Hover {
            release_hover(engine.as_ref(), target);
            tokio::time::sleep(config.activation_settle()).await;
        }

        {
            let Some(mut session) = self.lock_current(epoch, DiscoveryPhase::AwaitingMenuHover).await else {
                return;
            };
            let root = engine.document_element();
            session.baseline = std::iter::once(root)
                .chain(engine.descendants(root))
                .take(config.max_baseline_elements)
                .filter_map(|n| ElementSnapshot::capture(engine.as_ref(), Some(n)).map(|s| (n, s)))
                .collect();
            debug!(elements = session.baseline.len(), "Captured closed-state baseline");

            let opened = engine
                .observe(root)
                .map_err(|e| {
                    if matches!(e, DiscoveryError::ObserverSetup(_)) {
                        e
                    } else {
                        DiscoveryError::ObserverSetup(e.to_string())
                    }
                })
                .and_then(|observer| {
                    session.observer = Some(observer);
                    simulate_activation(engine.as_ref(), target, config.trigger_mode)
                });
            if let Err(e) = opened {
                self.fail(&mut session, e);
                return;
            }
        }

        tokio::time::sleep(config.activation_settle()).await;

        {
            let Some(mut session) = self.lock_current(epoch, DiscoveryPhase::AwaitingMenuHover).await else {
                return;
            };
            match FreezeController::freeze(engine.clone(), target, config) {
                Ok(freeze) => session.freeze = Some(freeze),
                Err(e) => {
                    self.fail(&mut session, e);
                    return;
                }
            }
            session.scan_ready = true;

            if config.trigger_mode == TriggerMode::Hover {
                self.emit(
                    DiscoveryStep::new(
                        session.id.clone(),
                        StepKind::AwaitingMenuHover,
                        "Find the menu",
                        format!(
                            "Hover over the open menu for {} seconds.",
                            config.menu_hover_delay_ms / 1000
                        ),
                    )
                    .waiting(),
                );
                return;
            }
        }

        tokio::time::sleep(config.menu_settle()).await;

        let Some(mut session) = self.lock_current(epoch, DiscoveryPhase::AwaitingMenuHover).await else {
            return;
        };
        self.collect_and_present(&mut session);
    }

    fn collect_and_present(&self, session: &mut DiscoverySession) {
        let engine = self.inner.engine.as_ref();
        let Some(target) = session.saved_target else {
            return;
        };
        session.cancel_hover_timer();

        if let Some(observer) = session.observer {
            let touched = session.touched_nodes();
            let fresh: Vec<MutationRecord> = engine
                .take_records(observer)
                .into_iter()
                .filter(|r| !(touched.contains(&r.target) && r.attribute_name() == Some("style")))
                .collect();
            session.records.extend(fresh);
        }

        let ignored: HashSet<NodeRef> = session.outlined.keys().copied().collect();
        let candidates = collect_menu_candidates(
            engine,
            &MenuScan {
                target,
                records: &session.records,
                baseline: &session.baseline,
                hovered: session.menu_hover,
                ignored: &ignored,
            },
            &self.inner.config.scoring,
        );

        if candidates.is_empty() {
            self.enter_exhausted(session);
            return;
        }
        session.candidates = candidates;
        session.current_index = 0;
        session.phase = DiscoveryPhase::ConfirmingMenuCandidate;
        self.show_current_candidate(session);
    }

    fn accept_menu(&self, session: &mut DiscoverySession, menu: NodeRef) -> Result<()> {
        let engine = self.inner.engine.as_ref();
        let target = session
            .saved_target
            .ok_or_else(|| DiscoveryError::Internal("menu confirmed without a target".into()))?;
        session.saved_menu = Some(menu);

        // Forced freeze styles and outlines must not leak into the open snapshot.
        session.release_resources(engine);

        let closed = |node: NodeRef| {
            session
                .baseline
                .iter()
                .find(|(n, _)| *n == node)
                .map(|(_, s)| s.clone())
        };
        let target_closed = closed(target);
        let menu_closed = closed(menu);
        let target_open = ElementSnapshot::capture(engine, Some(target));
        let menu_open = ElementSnapshot::capture(engine, Some(menu));

        let target_selector = self.selector_for(target);
        let menu_selector = self.selector_for(menu);
        let target_mutations = diff(target_closed.as_ref(), target_open.as_ref(), &target_selector);
        let menu_mutations = diff(menu_closed.as_ref(), menu_open.as_ref(), &menu_selector);

        session.baseline.clear();
        session.records.clear();
        session.candidates.clear();
        session.current_index = 0;

        if is_effectless(&target_mutations) && is_effectless(&menu_mutations) {
            self.finish_without_changes(session, target_selector, menu_selector);
            return Ok(());
        }

        let code = SnippetBuilder::new(&self.inner.config).build(
            ElementCapture {
                selector: &target_selector,
                closed: target_closed.as_ref(),
                open: target_open.as_ref(),
                mutations: &target_mutations,
            },
            ElementCapture {
                selector: &menu_selector,
                closed: menu_closed.as_ref(),
                open: menu_open.as_ref(),
                mutations: &menu_mutations,
            },
        )?;

        let mut mutations = target_mutations;
        mutations.extend(menu_mutations);
        info!(
            session = %session.id,
            target = %target_selector,
            menu = %menu_selector,
            mutations = mutations.len(),
            "Menu state diffed"
        );

        let result = DiscoveryResult {
            target_selector,
            menu_selector,
            mutations,
            code,
            final_state_open: None,
        };
        if self.inner.config.verify_toggles == 0 {
            self.complete(session, result);
        } else {
            self.start_toggle_test(session, result);
        }
        Ok(())
    }

    /// Neither element changed: there is nothing to replay.
    fn finish_without_changes(
        &self,
        session: &mut DiscoverySession,
        target_selector: String,
        menu_selector: String,
    ) {
        warn!(
            session = %session.id,
            target = %target_selector,
            menu = %menu_selector,
            "No menu state changes detected"
        );
        session.phase = DiscoveryPhase::Complete;
        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::Complete,
                "No changes detected",
                "Could not detect menu state changes. This site may need a custom solution.",
            )
            .with_selectors(target_selector, menu_selector)
            .failed(),
        );
    }

    fn start_toggle_test(&self, session: &mut DiscoverySession, result: DiscoveryResult) {
        let changes = result.mutations.iter().filter(|m| !m.is_noop()).count();
        session.pending_result = Some(result);
        session.phase = DiscoveryPhase::Testing;
        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::Testing,
                "Testing menu toggle...",
                format!("Detected {changes} change(s). Testing..."),
            )
            .waiting(),
        );

        let this = self.clone();
        let epoch = session.scan_epoch;
        session.menu_task = Some(tokio::spawn(async move {
            this.run_toggle_test(epoch).await;
        }));
    }

    /// Re-activate the confirmed trigger a few times so the operator can watch the menu react.
    async fn run_toggle_test(&self, epoch: u64) {
        let engine = self.inner.engine.clone();
        let config = &self.inner.config;

        for toggle in 1..=config.verify_toggles {
            tokio::time::sleep(config.verify_interval()).await;
            let Some(mut session) = self.lock_current(epoch, DiscoveryPhase::Testing).await else {
                return;
            };
            let Some(target) = session.saved_target else {
                return;
            };
            // Hover menus close on leave, so every other toggle releases the hover
            let toggled = match config.trigger_mode {
                TriggerMode::Hover if toggle % 2 == 0 => {
                    release_hover(engine.as_ref(), target);
                    Ok(())
                }
                mode => simulate_activation(engine.as_ref(), target, mode),
            };
            if let Err(e) = toggled {
                self.fail(&mut session, e);
                return;
            }
            debug!(toggle, total = config.verify_toggles, "Toggled menu");
        }

        let Some(mut session) = self.lock_current(epoch, DiscoveryPhase::Testing).await else {
            return;
        };
        session.menu_task = None;
        session.phase = DiscoveryPhase::ConfirmingFinalState;
        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::ConfirmFinalState,
                "Is the menu currently open?",
                "After testing, check if the menu is open or closed.",
            )
            .with_buttons(Some("Yes, it's open"), Some("No, it's closed")),
        );
    }

    fn finish_final_state(&self, session: &mut DiscoverySession, open: bool) {
        let Some(mut result) = session.pending_result.take() else {
            return;
        };
        info!(session = %session.id, open, "Final menu state reported");
        result.final_state_open = Some(open);
        self.complete(session, result);
    }

    fn complete(&self, session: &mut DiscoverySession, result: DiscoveryResult) {
        info!(
            session = %session.id,
            target = %result.target_selector,
            menu = %result.menu_selector,
            "Menu discovery complete"
        );
        session.phase = DiscoveryPhase::Complete;
        self.emit(
            DiscoveryStep::new(
                session.id.clone(),
                StepKind::Complete,
                "Menu found",
                format!(
                    "Button: {}\nMenu: {}\n\nThe reproduction snippet is ready.",
                    result.target_selector, result.menu_selector
                ),
            )
            .completed(
                result.code.clone(),
                Some(result.target_selector.clone()),
                Some(result.menu_selector.clone()),
            ),
        );
        session.result = Some(result);
    }

    fn selector_for(&self, node: NodeRef) -> String {
        let engine = self.inner.engine.as_ref();
        let generator = SelectorGenerator::new(engine);
        generator
            .generate(node)
            .or_else(|| generator.css_path(node))
            .unwrap_or_else(|| {
                let e = DiscoveryError::SelectorGeneration(node.to_string());
                warn!(error = %e, "Falling back to tag name");
                engine.tag_name(node)
            })
    }
}
