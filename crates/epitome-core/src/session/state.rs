//! Pure session state machine
//!
//! `transition` never performs I/O. The manager executes the returned
//! [`Effect`] after releasing the session table.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque chat user identifier
pub type UserId = String;

/// A feed about to be subscribed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCandidate {
    pub url: String,
    pub name: String,
}

/// Something a delete command can remove from a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeleteTarget {
    Source { source_id: Uuid, name: String, url: String },
    Filter { name: String },
}

impl DeleteTarget {
    pub fn label(&self) -> String {
        match self {
            DeleteTarget::Source { name, url, .. } => format!("{} ({})", name, url),
            DeleteTarget::Filter { name } => format!("filter \"{}\"", name),
        }
    }
}

/// Repository change awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    AddSources(Vec<SourceCandidate>),
    AddFilters(Vec<String>),
    Delete(DeleteTarget),
}

/// Outcome of validating a command's input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collected {
    /// Input is complete; `skipped` explains what was left out and why
    Ready { action: PendingAction, skipped: Vec<String> },
    /// Several saved items match; the user has to pick one
    Choose(Vec<DeleteTarget>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Collecting,
    Selecting { candidates: Vec<DeleteTarget> },
    Confirming { action: PendingAction },
    Applying { action: PendingAction },
    Idle,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Collecting => "collecting",
            SessionState::Selecting { .. } => "selecting",
            SessionState::Confirming { .. } => "confirming",
            SessionState::Applying { .. } => "applying",
            SessionState::Idle => "idle",
        }
    }

    /// States waiting on the user, guarded by a timeout
    pub fn awaits_user(&self) -> bool {
        matches!(self, SessionState::Selecting { .. } | SessionState::Confirming { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Validated(Collected),
    ValidationFailed(String),
    Selected(usize),
    Confirm,
    Cancel,
    Timeout,
    Applied,
    ApplyFailed(String),
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied(PendingAction),
    Cancelled,
    TimedOut,
    Failed(String),
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The event does not apply to the current state
    Ignored,
    PromptConfirm { action: PendingAction, skipped: Vec<String> },
    PromptSelect { candidates: Vec<DeleteTarget> },
    Apply(PendingAction),
    /// Terminal: the session is over and gets exactly one acknowledgement
    Finish(Outcome),
}

pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Effect) {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Collecting, E::Validated(Collected::Ready { action, skipped })) => (
            S::Confirming { action: action.clone() },
            Effect::PromptConfirm { action, skipped },
        ),
        (S::Collecting, E::Validated(Collected::Choose(candidates))) => (
            S::Selecting { candidates: candidates.clone() },
            Effect::PromptSelect { candidates },
        ),
        (S::Collecting, E::ValidationFailed(reason)) => {
            (S::Idle, Effect::Finish(Outcome::Failed(reason)))
        }

        (S::Selecting { candidates }, E::Selected(index)) => match candidates.get(index) {
            Some(target) => {
                let action = PendingAction::Delete(target.clone());
                (
                    S::Confirming { action: action.clone() },
                    Effect::PromptConfirm { action, skipped: Vec::new() },
                )
            }
            None => (S::Selecting { candidates }, Effect::Ignored),
        },

        (S::Confirming { action }, E::Confirm) => {
            (S::Applying { action: action.clone() }, Effect::Apply(action))
        }

        (S::Collecting | S::Selecting { .. } | S::Confirming { .. }, E::Cancel) => {
            (S::Idle, Effect::Finish(Outcome::Cancelled))
        }
        (S::Selecting { .. } | S::Confirming { .. }, E::Timeout) => {
            (S::Idle, Effect::Finish(Outcome::TimedOut))
        }

        (S::Applying { action }, E::Applied) => (S::Idle, Effect::Finish(Outcome::Applied(action))),
        (S::Applying { .. }, E::ApplyFailed(reason)) => {
            (S::Idle, Effect::Finish(Outcome::Failed(reason)))
        }

        (state, _) => (state, Effect::Ignored),
    }
}

/// Button or menu interaction sent back by a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum Interaction {
    Confirm,
    Cancel,
    Select(usize),
}

impl Interaction {
    pub fn into_event(self) -> SessionEvent {
        match self {
            Interaction::Confirm => SessionEvent::Confirm,
            Interaction::Cancel => SessionEvent::Cancel,
            Interaction::Select(index) => SessionEvent::Selected(index),
        }
    }
}
