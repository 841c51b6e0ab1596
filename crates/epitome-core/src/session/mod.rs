//! Per-user interactive procedures: add sources, add filters, delete

mod actions;
mod manager;
mod state;
mod store;

pub use actions::UNTITLED_SOURCE;
pub use manager::{SessionManager, SessionReply};
pub use state::{
    transition, Collected, DeleteTarget, Effect, Interaction, Outcome, PendingAction,
    SessionEvent, SessionState, SourceCandidate, UserId,
};
pub use store::{Session, SessionStore, SessionView};
