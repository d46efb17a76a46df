//! Messages pushed to the host UI on every phase transition.

use serde::{Deserialize, Serialize};

use crate::session::DiscoveryPhase;

pub const STEP_MESSAGE_TYPE: &str = "MENU_DISCOVERY_STEP";

/// Candidate position shown to the operator (1-based index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub index: usize,
    pub total: usize,
}

/// Step label: a session phase or a transient progress marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    AwaitingTargetHover,
    ConfirmingTargetCandidate,
    OutsideRegion,
    OpeningMenu,
    AwaitingMenuHover,
    ConfirmingMenuCandidate,
    CandidatesExhausted,
    Testing,
    ConfirmFinalState,
    Complete,
    Cancelled,
    Error,
}

impl From<DiscoveryPhase> for StepKind {
    fn from(phase: DiscoveryPhase) -> Self {
        match phase {
            DiscoveryPhase::AwaitingTargetHover => StepKind::AwaitingTargetHover,
            DiscoveryPhase::ConfirmingTargetCandidate => StepKind::ConfirmingTargetCandidate,
            DiscoveryPhase::OutsideRegion => StepKind::OutsideRegion,
            DiscoveryPhase::AwaitingMenuHover => StepKind::AwaitingMenuHover,
            DiscoveryPhase::ConfirmingMenuCandidate => StepKind::ConfirmingMenuCandidate,
            DiscoveryPhase::CandidatesExhausted => StepKind::CandidatesExhausted,
            DiscoveryPhase::Testing => StepKind::Testing,
            DiscoveryPhase::ConfirmingFinalState => StepKind::ConfirmFinalState,
            DiscoveryPhase::Complete => StepKind::Complete,
            DiscoveryPhase::Cancelled => StepKind::Cancelled,
        }
    }
}

/// One host notification. Fire-and-forget: the core never waits for a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStep {
    #[serde(rename = "type")]
    pub message_type: String,
    pub session_id: String,
    pub step: StepKind,
    pub title: String,
    pub message: String,
    pub show_buttons: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_text: Option<String>,
    pub waiting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub success: bool,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu_selector: Option<String>,
}

impl DiscoveryStep {
    pub fn new(
        session_id: impl Into<String>,
        step: StepKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message_type: STEP_MESSAGE_TYPE.to_string(),
            session_id: session_id.into(),
            step,
            title: title.into(),
            message: message.into(),
            show_buttons: false,
            yes_text: None,
            no_text: None,
            waiting: false,
            progress: None,
            success: false,
            error: false,
            code: None,
            target_selector: None,
            menu_selector: None,
        }
    }

    /// Show confirm/reject buttons, optionally with custom labels
    pub fn with_buttons(mut self, yes: Option<&str>, no: Option<&str>) -> Self {
        self.show_buttons = true;
        self.yes_text = yes.map(str::to_string);
        self.no_text = no.map(str::to_string);
        self
    }

    pub fn waiting(mut self) -> Self {
        self.waiting = true;
        self
    }

    pub fn with_progress(mut self, index: usize, total: usize) -> Self {
        self.progress = Some(Progress { index, total });
        self
    }

    pub fn failed(mut self) -> Self {
        self.error = true;
        self
    }

    pub fn completed(
        mut self,
        code: String,
        target_selector: Option<String>,
        menu_selector: Option<String>,
    ) -> Self {
        self.success = true;
        self.code = Some(code);
        self.target_selector = target_selector;
        self.menu_selector = menu_selector;
        self
    }

    pub fn with_selectors(mut self, target_selector: String, menu_selector: String) -> Self {
        self.target_selector = Some(target_selector);
        self.menu_selector = Some(menu_selector);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wire_shape() {
        let step = DiscoveryStep::new(
            "abc",
            StepKind::ConfirmingMenuCandidate,
            "Is this the menu?",
            "Candidate outlined",
        )
        .with_buttons(None, None)
        .with_progress(1, 3);
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "MENU_DISCOVERY_STEP");
        assert_eq!(json["sessionId"], "abc");
        assert_eq!(json["step"], "CONFIRMING_MENU_CANDIDATE");
        assert_eq!(json["showButtons"], true);
        assert_eq!(json["progress"]["index"], 1);
        assert_eq!(json["progress"]["total"], 3);
        assert!(json.get("code").is_none());
        assert!(json.get("yesText").is_none());
    }

    #[test]
    fn test_completion_carries_artifact() {
        let step = DiscoveryStep::new("s", StepKind::Complete, "Done", "")
            .completed("code".into(), Some(".a".into()), Some(".b".into()));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["code"], "code");
        assert_eq!(json["targetSelector"], ".a");
        assert_eq!(json["menuSelector"], ".b");
        let back: DiscoveryStep = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_verification_step_names() {
        assert_eq!(
            serde_json::to_value(StepKind::from(DiscoveryPhase::Testing)).unwrap(),
            "TESTING"
        );
        assert_eq!(
            serde_json::to_value(StepKind::from(DiscoveryPhase::ConfirmingFinalState)).unwrap(),
            "CONFIRM_FINAL_STATE"
        );
    }
}
