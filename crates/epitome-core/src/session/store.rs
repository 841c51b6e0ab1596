use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::state::{SessionState, UserId};
use crate::feed::DestinationId;

/// One user's live procedure
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: UserId,
    pub destination_id: DestinationId,
    pub command: &'static str,
    pub state: SessionState,
    /// Set while the session waits on the user
    pub expires_at: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(user_id: &str, destination_id: &str, command: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            destination_id: destination_id.to_string(),
            command,
            state: SessionState::Collecting,
            expires_at: None,
            timer: None,
        }
    }

    /// Replace the pending timeout
    pub fn arm(&mut self, deadline: Instant, timer: JoinHandle<()>) {
        self.disarm();
        self.expires_at = Some(deadline);
        self.timer = Some(timer);
    }

    /// Cancel the pending timeout, if any
    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.expires_at = None;
    }

    /// Forget the timer without aborting it; used by the timer task itself
    pub(crate) fn release_timer(&mut self) {
        self.timer.take();
        self.expires_at = None;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            user_id: self.user_id.clone(),
            destination_id: self.destination_id.clone(),
            command: self.command.to_string(),
            state: self.state.name().to_string(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: Uuid,
    pub user_id: UserId,
    pub destination_id: DestinationId,
    pub command: String,
    pub state: String,
}

/// Process-wide session table, at most one session per user
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<UserId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        self.sessions.lock().await
    }

    pub async fn get(&self, user_id: &str) -> Option<SessionView> {
        self.sessions.lock().await.get(user_id).map(Session::view)
    }

    pub async fn list(&self) -> Vec<SessionView> {
        let sessions = self.sessions.lock().await;
        let mut views: Vec<SessionView> = sessions.values().map(Session::view).collect();
        views.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        views
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
