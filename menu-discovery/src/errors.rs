use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Selector generation failed: {0}")]
    SelectorGeneration(String),

    #[error("Region not found: {0}")]
    RegionNotFound(String),

    #[error("All candidates rejected: {0}")]
    CandidateExhausted(String),

    #[error("Command '{command}' is not valid in phase {phase}")]
    InvalidCommandForState { command: String, phase: String },

    #[error("Observer setup failed: {0}")]
    ObserverSetup(String),

    #[error("Event dispatch failed: {0}")]
    EventDispatch(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Element is detached from the document: {0}")]
    ElementDetached(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DiscoveryError {
    /// Failures after which the session cannot continue and must be torn down.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            DiscoveryError::ObserverSetup(_)
                | DiscoveryError::EventDispatch(_)
                | DiscoveryError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
