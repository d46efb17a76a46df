//! Interactive discovery of menu triggers and menu panels on web pages
//!
//! An operator points at the element that opens a menu; the engine proposes trigger
//! candidates, opens the menu with synthetic events, holds it open, ranks the elements
//! that changed and, once both elements are confirmed, diffs their closed and open state
//! into a standalone script that can replay the open/close behavior later.
//!
//! All page access goes through the [`DomEngine`] trait. [`HeadlessDom`] is an in-memory
//! implementation used for headless runs and tests.

pub mod config;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod interaction;
pub mod locator;
pub mod platforms;
pub mod selector;
pub mod session;
pub mod snapshot;
pub mod snippet;
#[cfg(test)]
mod tests;
pub mod types;

pub use config::{DiscoveryConfig, ScoringWeights, SnippetTarget, TriggerMode};
pub use discovery::{MenuDiscovery, PageInput};
pub use errors::{DiscoveryError, Result};
pub use events::{DiscoveryStep, Progress, StepKind};
pub use interaction::FreezeController;
pub use locator::{Candidate, CandidateReason};
pub use platforms::{DomEngine, HeadlessDom};
pub use selector::SelectorGenerator;
pub use session::{DiscoveryPhase, DiscoveryResult, DiscoverySession};
pub use snapshot::{ElementSnapshot, Mutation};
pub use snippet::SnippetBuilder;
pub use types::{EventKind, NodeRef, Rect};
