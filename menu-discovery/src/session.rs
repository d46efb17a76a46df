//! Per-run discovery state with an explicit create/reset/teardown lifecycle.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::interaction::FreezeController;
use crate::locator::Candidate;
use crate::platforms::DomEngine;
use crate::snapshot::{ElementSnapshot, Mutation};
use crate::types::{MutationRecord, NodeRef, ObserverId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryPhase {
    AwaitingTargetHover,
    ConfirmingTargetCandidate,
    /// A candidate was picked outside the located region; the operator may override
    OutsideRegion,
    AwaitingMenuHover,
    ConfirmingMenuCandidate,
    /// Every menu candidate was rejected; confirm retries, reject cancels
    CandidatesExhausted,
    /// The snippet is built; the trigger is being re-activated to exercise the menu
    Testing,
    /// Toggling finished; the operator reports whether the menu ended up open
    ConfirmingFinalState,
    Complete,
    Cancelled,
}

impl DiscoveryPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DiscoveryPhase::Complete | DiscoveryPhase::Cancelled)
    }
}

impl fmt::Display for DiscoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryPhase::AwaitingTargetHover => "AWAITING_TARGET_HOVER",
            DiscoveryPhase::ConfirmingTargetCandidate => "CONFIRMING_TARGET_CANDIDATE",
            DiscoveryPhase::OutsideRegion => "OUTSIDE_REGION",
            DiscoveryPhase::AwaitingMenuHover => "AWAITING_MENU_HOVER",
            DiscoveryPhase::ConfirmingMenuCandidate => "CONFIRMING_MENU_CANDIDATE",
            DiscoveryPhase::CandidatesExhausted => "CANDIDATES_EXHAUSTED",
            DiscoveryPhase::Testing => "TESTING",
            DiscoveryPhase::ConfirmingFinalState => "CONFIRMING_FINAL_STATE",
            DiscoveryPhase::Complete => "COMPLETE",
            DiscoveryPhase::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Final artifact of a completed session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub target_selector: String,
    pub menu_selector: String,
    /// Target mutations first, then menu mutations, each in diff order
    pub mutations: Vec<Mutation>,
    pub code: String,
    /// Operator's answer after the toggle test; `None` when the test was skipped
    pub final_state_open: Option<bool>,
}

impl DiscoveryResult {
    /// Mutations recorded for the element at `selector`
    pub fn mutations_for<'a>(&'a self, selector: &'a str) -> impl Iterator<Item = &'a Mutation> {
        self.mutations
            .iter()
            .filter(move |m| m.target_selector() == selector)
    }
}

/// Pending hover-delay timer and the element it is tracking
#[derive(Debug)]
pub struct HoverTimer {
    pub node: NodeRef,
    pub handle: JoinHandle<()>,
}

/// Mutable state of one discovery run.
///
/// Every timer, job, listener and observer the run creates is owned here so that
/// [`DiscoverySession::release_resources`] can reach it from any exit path.
#[derive(Debug)]
pub struct DiscoverySession {
    pub id: String,
    pub phase: DiscoveryPhase,
    /// Located header/nav; `None` means whole-document scope
    pub header_region: Option<NodeRef>,
    pub saved_target: Option<NodeRef>,
    pub saved_menu: Option<NodeRef>,
    pub candidates: Vec<Candidate>,
    pub current_index: usize,
    pub pending_outside: Option<NodeRef>,
    pub hover_timer: Option<HoverTimer>,
    /// Last element hovered while the menu was open
    pub menu_hover: Option<NodeRef>,
    pub menu_task: Option<JoinHandle<()>>,
    /// Bumped whenever in-flight async work must be abandoned
    pub scan_epoch: u64,
    /// Set once the menu is open and frozen
    pub scan_ready: bool,
    pub freeze: Option<FreezeController>,
    pub observer: Option<ObserverId>,
    pub records: Vec<MutationRecord>,
    /// Closed-state snapshots taken before activation
    pub baseline: Vec<(NodeRef, ElementSnapshot)>,
    /// Outlined elements and their previous inline outline
    pub outlined: BTreeMap<NodeRef, Option<String>>,
    /// Built artifact awaiting the toggle test and final-state answer
    pub pending_result: Option<DiscoveryResult>,
    pub result: Option<DiscoveryResult>,
}

impl DiscoverySession {
    pub fn new(header_region: Option<NodeRef>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phase: DiscoveryPhase::AwaitingTargetHover,
            header_region,
            saved_target: None,
            saved_menu: None,
            candidates: Vec::new(),
            current_index: 0,
            pending_outside: None,
            hover_timer: None,
            menu_hover: None,
            menu_task: None,
            scan_epoch: 0,
            scan_ready: false,
            freeze: None,
            observer: None,
            records: Vec::new(),
            baseline: Vec::new(),
            outlined: BTreeMap::new(),
            pending_result: None,
            result: None,
        }
    }

    pub fn current_candidate(&self) -> Option<&Candidate> {
        self.candidates.get(self.current_index)
    }

    /// Outline `node`, remembering its previous inline outline for restoration.
    pub fn outline(&mut self, engine: &dyn DomEngine, node: NodeRef, style: &str) {
        if !self.outlined.contains_key(&node) {
            self.outlined.insert(node, engine.inline_style(node, "outline"));
        }
        if let Err(e) = engine.set_inline_style(node, "outline", Some(style)) {
            debug!(%node, error = %e, "Could not outline element");
        }
    }

    pub fn clear_outlines(&mut self, engine: &dyn DomEngine) {
        for (node, previous) in std::mem::take(&mut self.outlined) {
            if let Err(e) = engine.set_inline_style(node, "outline", previous.as_deref()) {
                debug!(%node, error = %e, "Could not restore outline");
            }
        }
    }

    /// Elements whose inline style the session itself writes
    pub fn touched_nodes(&self) -> HashSet<NodeRef> {
        let mut touched: HashSet<NodeRef> = self.outlined.keys().copied().collect();
        if let Some(freeze) = &self.freeze {
            touched.extend(freeze.frozen_nodes().iter().copied());
        }
        touched
    }

    pub fn cancel_hover_timer(&mut self) {
        if let Some(timer) = self.hover_timer.take() {
            timer.handle.abort();
        }
    }

    /// Stop the freeze, observer, timers and scan task, and remove outlines.
    pub fn release_resources(&mut self, engine: &dyn DomEngine) {
        self.scan_epoch += 1;
        self.scan_ready = false;
        self.cancel_hover_timer();
        if let Some(task) = self.menu_task.take() {
            task.abort();
        }
        if let Some(mut freeze) = self.freeze.take() {
            freeze.unfreeze();
        }
        if let Some(observer) = self.observer.take() {
            engine.disconnect(observer);
        }
        self.clear_outlines(engine);
    }

    /// Release everything and return to the initial phase. Id and region are kept.
    pub fn reset(&mut self, engine: &dyn DomEngine) {
        self.release_resources(engine);
        self.phase = DiscoveryPhase::AwaitingTargetHover;
        self.saved_target = None;
        self.saved_menu = None;
        self.candidates.clear();
        self.current_index = 0;
        self.pending_outside = None;
        self.menu_hover = None;
        self.records.clear();
        self.baseline.clear();
        self.pending_result = None;
        self.result = None;
    }

    /// True when no discovery data and no live resource is held
    pub fn is_idle(&self) -> bool {
        self.saved_target.is_none()
            && self.saved_menu.is_none()
            && self.candidates.is_empty()
            && self.current_index == 0
            && self.pending_outside.is_none()
            && self.hover_timer.is_none()
            && self.menu_hover.is_none()
            && self.menu_task.is_none()
            && self.freeze.is_none()
            && self.observer.is_none()
            && self.records.is_empty()
            && self.baseline.is_empty()
            && self.outlined.is_empty()
            && self.pending_result.is_none()
            && self.result.is_none()
    }
}
