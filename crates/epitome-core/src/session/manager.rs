use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::actions::{apply, collect_delete, collect_filters, collect_sources};
use super::state::{transition, Effect, Interaction, Outcome, SessionEvent, SessionState};
use super::store::{Session, SessionStore, SessionView};
use crate::commands::Command;
use crate::feed::FeedProvider;
use crate::publisher::Publisher;
use crate::render::OutboundMessage;
use crate::storage::{Database, DestinationRepository, SourceRepository};
use crate::{Error, Result};

const CONFLICT_MESSAGE: &str =
    "A procedure is already in progress. Finish it or cancel it with /cancel first.";
const NOTHING_TO_CANCEL: &str = "There is no procedure to cancel.";
const TOO_LATE_TO_CANCEL: &str = "The procedure is being applied and can no longer be cancelled.";

/// What happened to a command or interaction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionReply {
    /// The user's live session after handling, if any
    pub session: Option<SessionView>,
    /// Kind of the message sent back to the destination
    pub message: Option<String>,
    /// The event did not apply and changed nothing
    pub ignored: bool,
}

impl SessionReply {
    fn ignored(session: Option<SessionView>) -> Self {
        Self {
            session,
            message: None,
            ignored: true,
        }
    }
}

/// Runs the per-user add/delete procedures.
///
/// Transitions are computed under the session table lock; messages and
/// repository writes happen after it is released. While a session is
/// applying, every other event for it is ignored.
#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    feeds: Arc<dyn FeedProvider>,
    publisher: Arc<Publisher>,
    store: SessionStore,
    timeout: Duration,
    deliver_backlog: bool,
}

impl SessionManager {
    pub fn new(
        db: Database,
        feeds: Arc<dyn FeedProvider>,
        publisher: Arc<Publisher>,
        store: SessionStore,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            feeds,
            publisher,
            store,
            timeout,
            deliver_backlog: false,
        }
    }

    /// Start new sources at the epoch so their whole feed gets posted
    pub fn with_backlog(mut self, deliver_backlog: bool) -> Self {
        self.deliver_backlog = deliver_backlog;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Entry point for slash commands
    pub async fn handle_command(
        &self,
        user_id: &str,
        destination_id: &str,
        command: Command,
    ) -> Result<SessionReply> {
        tracing::debug!(user_id, destination_id, command = command.name(), "Command received");

        match command {
            Command::Help => {
                let message = self.send(destination_id, OutboundMessage::Help).await;
                let session = self.store.get(user_id).await;
                return Ok(SessionReply {
                    session,
                    message: Some(message),
                    ignored: false,
                });
            }
            Command::Cancel => return self.cancel(user_id, destination_id).await,
            _ => {}
        }

        let session_id = {
            let mut sessions = self.store.lock().await;
            if sessions.contains_key(user_id) {
                drop(sessions);
                self.send(destination_id, OutboundMessage::error(CONFLICT_MESSAGE)).await;
                return Err(Error::Conflict(CONFLICT_MESSAGE.to_string()));
            }
            if command == Command::List {
                None
            } else {
                let session = Session::new(user_id, destination_id, command.name());
                let id = session.id;
                sessions.insert(user_id.to_string(), session);
                Some(id)
            }
        };

        let Some(session_id) = session_id else {
            return self.list(destination_id).await;
        };

        let collected = match &command {
            Command::AddSource { urls } => {
                collect_sources(&self.db, self.feeds.as_ref(), destination_id, urls).await
            }
            Command::AddFilter { names } => collect_filters(&self.db, destination_id, names).await,
            Command::Delete { identifier } => {
                collect_delete(&self.db, destination_id, identifier).await
            }
            Command::List | Command::Cancel | Command::Help => {
                Err(Error::Other(format!("{} does not start a procedure", command.name())))
            }
        };

        let event = match collected {
            Ok(collected) => SessionEvent::Validated(collected),
            Err(e) => {
                tracing::info!(user_id, command = command.name(), "Command rejected: {}", e);
                SessionEvent::ValidationFailed(e.to_string())
            }
        };

        self.drive(user_id, session_id, event, None).await
    }

    /// Entry point for button and select menu interactions
    pub async fn handle_interaction(
        &self,
        user_id: &str,
        session_id: Uuid,
        interaction: Interaction,
    ) -> Result<SessionReply> {
        tracing::debug!(user_id, session_id = %session_id, interaction = ?interaction, "Interaction received");
        self.drive(user_id, session_id, interaction.into_event(), None)
            .await
    }

    async fn cancel(&self, user_id: &str, destination_id: &str) -> Result<SessionReply> {
        let session_id = self.store.lock().await.get(user_id).map(|s| s.id);

        let Some(session_id) = session_id else {
            self.send(destination_id, OutboundMessage::error(NOTHING_TO_CANCEL)).await;
            return Err(Error::NotFound(NOTHING_TO_CANCEL.to_string()));
        };

        let reply = self.drive(user_id, session_id, SessionEvent::Cancel, None).await?;
        if reply.ignored {
            self.send(destination_id, OutboundMessage::error(TOO_LATE_TO_CANCEL)).await;
            return Err(Error::Conflict(TOO_LATE_TO_CANCEL.to_string()));
        }
        Ok(reply)
    }

    async fn list(&self, destination_id: &str) -> Result<SessionReply> {
        let listing = async {
            let sources = SourceRepository::new(&self.db)
                .list_for_destination(destination_id)
                .await?;
            let filters = DestinationRepository::new(&self.db)
                .get_filters(destination_id)
                .await?;
            Ok::<_, Error>(OutboundMessage::List {
                sources,
                filters: filters.into_iter().collect(),
            })
        };

        match listing.await {
            Ok(message) => {
                let message = self.send(destination_id, message).await;
                Ok(SessionReply {
                    session: None,
                    message: Some(message),
                    ignored: false,
                })
            }
            Err(e) => {
                tracing::error!(destination_id, "Failed to list sources: {}", e);
                self.send(destination_id, OutboundMessage::error("could not read saved sources"))
                    .await;
                Err(e)
            }
        }
    }

    /// Called by a session's timer once its deadline passes
    async fn expire(&self, user_id: &str, session_id: Uuid, deadline: Instant) -> Result<SessionReply> {
        self.drive(user_id, session_id, SessionEvent::Timeout, Some(deadline))
            .await
    }

    /// Feed one event to a user's session and carry out the resulting effect.
    ///
    /// `deadline` is set for timer events: they only apply if the session
    /// still waits on that very deadline.
    async fn drive(
        &self,
        user_id: &str,
        session_id: Uuid,
        event: SessionEvent,
        deadline: Option<Instant>,
    ) -> Result<SessionReply> {
        let mut event = event;
        let mut deadline = deadline;

        loop {
            let (effect, destination_id, session) = {
                let mut sessions = self.store.lock().await;
                let Some(session) = sessions.get_mut(user_id) else {
                    return Ok(SessionReply::ignored(None));
                };
                if session.id != session_id {
                    return Ok(SessionReply::ignored(Some(session.view())));
                }
                if let Some(deadline) = deadline.take() {
                    if session.expires_at != Some(deadline) {
                        return Ok(SessionReply::ignored(Some(session.view())));
                    }
                    session.release_timer();
                }

                let state = std::mem::replace(&mut session.state, SessionState::Idle);
                let (next, effect) = transition(state, event);
                session.state = next;
                let destination_id = session.destination_id.clone();

                match &effect {
                    Effect::Ignored => {}
                    Effect::PromptConfirm { .. } | Effect::PromptSelect { .. } => {
                        self.arm_timeout(session);
                    }
                    Effect::Apply(_) => session.disarm(),
                    Effect::Finish(_) => {
                        sessions.remove(user_id);
                    }
                }

                (effect, destination_id, sessions.get(user_id).map(Session::view))
            };

            let message = match effect {
                Effect::Ignored => {
                    tracing::debug!(user_id, session_id = %session_id, "Event ignored");
                    return Ok(SessionReply::ignored(session));
                }
                Effect::PromptConfirm { action, skipped } => {
                    self.send(&destination_id, OutboundMessage::confirm(session_id, action, skipped))
                        .await
                }
                Effect::PromptSelect { candidates } => {
                    self.send(
                        &destination_id,
                        OutboundMessage::DeleteSelect {
                            session_id,
                            targets: candidates,
                        },
                    )
                    .await
                }
                Effect::Apply(action) => {
                    event = match apply(&self.db, &destination_id, &action, self.initial_cursor()).await {
                        Ok(()) => SessionEvent::Applied,
                        Err(e) => {
                            tracing::error!(user_id, destination_id = %destination_id, "Failed to apply: {}", e);
                            SessionEvent::ApplyFailed(e.to_string())
                        }
                    };
                    continue;
                }
                Effect::Finish(outcome) => {
                    let message = match outcome {
                        Outcome::Applied(action) => OutboundMessage::applied(action),
                        Outcome::Cancelled => OutboundMessage::Cancelled,
                        Outcome::TimedOut => OutboundMessage::TimedOut,
                        Outcome::Failed(reason) => OutboundMessage::Error { reason },
                    };
                    tracing::info!(user_id, session_id = %session_id, outcome = message.kind(), "Session ended");
                    self.send(&destination_id, message).await
                }
            };

            return Ok(SessionReply {
                session,
                message: Some(message),
                ignored: false,
            });
        }
    }

    fn arm_timeout(&self, session: &mut Session) {
        let deadline = Instant::now() + self.timeout;
        let manager = self.clone();
        let user_id = session.user_id.clone();
        let session_id = session.id;

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Err(e) = manager.expire(&user_id, session_id, deadline).await {
                tracing::warn!(user_id = %user_id, "Failed to expire session: {}", e);
            }
        });
        session.arm(deadline, timer);
    }

    fn initial_cursor(&self) -> DateTime<Utc> {
        if self.deliver_backlog {
            DateTime::<Utc>::default()
        } else {
            Utc::now()
        }
    }

    /// Deliver a message; delivery problems are logged, never surfaced
    async fn send(&self, destination_id: &str, message: OutboundMessage) -> String {
        let kind = message.kind().to_string();
        if let Err(e) = self.publisher.send(destination_id, &message).await {
            tracing::error!(destination_id, kind = %kind, "Failed to deliver message: {}", e);
        }
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::StaticFeeds;
    use crate::publisher::testing::RecordingGateway;
    use crate::render::MESSAGE_BUDGET;

    const FEED: &str = "https://a.example/rss";

    /// Feeds that take a while to answer
    struct SlowFeeds {
        inner: StaticFeeds,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl FeedProvider for SlowFeeds {
        async fn fetch(&self, url: &str) -> Result<crate::feed::FetchedFeed> {
            tokio::time::sleep(self.delay).await;
            self.inner.fetch(url).await
        }
    }

    struct Harness {
        db: Database,
        gateway: Arc<RecordingGateway>,
        manager: SessionManager,
    }

    async fn harness(timeout: Duration) -> Harness {
        let db = Database::new_in_memory().await.unwrap();
        let feeds = Arc::new(StaticFeeds::default());
        feeds.set(FEED, Some("Alpha"), vec![]);
        feeds.set("https://b.example/rss", Some("Beta"), vec![]);
        let gateway = Arc::new(RecordingGateway::default());
        let publisher = Arc::new(Publisher::new(gateway.clone(), MESSAGE_BUDGET));
        let manager = SessionManager::new(db.clone(), feeds, publisher, SessionStore::new(), timeout);
        Harness { db, gateway, manager }
    }

    fn add_source(urls: &str) -> Command {
        Command::AddSource { urls: urls.to_string() }
    }

    fn session_id(reply: &SessionReply) -> Uuid {
        reply.session.as_ref().expect("live session").id
    }

    #[tokio::test]
    async fn test_add_source_confirmed() {
        let h = harness(Duration::from_secs(60)).await;

        let reply = h.manager.handle_command("u1", "chan", add_source(FEED)).await.unwrap();
        assert_eq!(reply.message.as_deref(), Some("add_source_confirm"));
        assert_eq!(reply.session.as_ref().unwrap().state, "confirming");
        assert!(h.gateway.contents_for("chan")[0].contains("Alpha"));

        let reply = h
            .manager
            .handle_interaction("u1", session_id(&reply), Interaction::Confirm)
            .await
            .unwrap();
        assert_eq!(reply.message.as_deref(), Some("sources_added"));
        assert!(reply.session.is_none());
        assert!(h.manager.store().is_empty().await);

        let source = SourceRepository::new(&h.db).find_by_url(FEED).await.unwrap().unwrap();
        assert_eq!(source.name, "Alpha");
        assert!(source.destinations.contains("chan"));
    }

    #[tokio::test]
    async fn test_unconfirmed_session_times_out_once() {
        let h = harness(Duration::from_millis(100)).await;

        let reply = h.manager.handle_command("u1", "chan", add_source(FEED)).await.unwrap();
        let id = session_id(&reply);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(h.manager.store().is_empty().await);

        // Too late now
        let late = h.manager.handle_interaction("u1", id, Interaction::Confirm).await.unwrap();
        assert!(late.ignored);

        assert_eq!(SourceRepository::new(&h.db).count().await.unwrap(), 0);
        let contents = h.gateway.contents_for("chan");
        assert_eq!(contents.len(), 2);
        assert_eq!(
            contents.iter().filter(|c| c.contains("Procedure expired")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_second_command_conflicts_and_cancel_ends_session() {
        let h = harness(Duration::from_secs(60)).await;
        h.manager
            .handle_command("u1", "chan", Command::AddFilter { names: "cat".to_string() })
            .await
            .unwrap();

        let err = h
            .manager
            .handle_command("u1", "chan", add_source(FEED))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(h.manager.store().get("u1").await.unwrap().command, "add-filter");

        // Help never conflicts
        let help = h.manager.handle_command("u1", "chan", Command::Help).await.unwrap();
        assert_eq!(help.message.as_deref(), Some("help"));

        let reply = h.manager.handle_command("u1", "chan", Command::Cancel).await.unwrap();
        assert_eq!(reply.message.as_deref(), Some("cancelled"));
        assert!(h.manager.store().is_empty().await);
        assert!(DestinationRepository::new(&h.db).get_filters("chan").await.unwrap().is_empty());

        let err = h.manager.handle_command("u1", "chan", Command::Cancel).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_other_users_cannot_drive_a_session() {
        let h = harness(Duration::from_secs(60)).await;
        let reply = h
            .manager
            .handle_command("u1", "chan", Command::AddFilter { names: "cat".to_string() })
            .await
            .unwrap();
        let id = session_id(&reply);

        let intruder = h.manager.handle_interaction("u2", id, Interaction::Confirm).await.unwrap();
        assert!(intruder.ignored);

        let stale = h
            .manager
            .handle_interaction("u1", Uuid::new_v4(), Interaction::Confirm)
            .await
            .unwrap();
        assert!(stale.ignored);

        assert_eq!(h.manager.store().get("u1").await.unwrap().state, "confirming");
    }

    #[tokio::test]
    async fn test_validation_failure_is_reported_once() {
        let h = harness(Duration::from_secs(60)).await;

        let reply = h
            .manager
            .handle_command("u1", "chan", add_source("ftp://nope.example"))
            .await
            .unwrap();
        assert_eq!(reply.message.as_deref(), Some("error"));
        assert!(reply.session.is_none());
        assert!(h.manager.store().is_empty().await);
        assert_eq!(h.gateway.contents_for("chan").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_selection() {
        let h = harness(Duration::from_secs(60)).await;
        for (user, url) in [("u1", FEED), ("u1", "https://b.example/rss")] {
            let reply = h.manager.handle_command(user, "chan", add_source(url)).await.unwrap();
            h.manager
                .handle_interaction(user, session_id(&reply), Interaction::Confirm)
                .await
                .unwrap();
        }

        let reply = h
            .manager
            .handle_command("u1", "chan", Command::Delete { identifier: "example".to_string() })
            .await
            .unwrap();
        assert_eq!(reply.message.as_deref(), Some("delete_select"));
        let id = session_id(&reply);

        let reply = h.manager.handle_interaction("u1", id, Interaction::Select(1)).await.unwrap();
        assert_eq!(reply.message.as_deref(), Some("delete_confirm"));

        let reply = h.manager.handle_interaction("u1", id, Interaction::Confirm).await.unwrap();
        assert_eq!(reply.message.as_deref(), Some("deleted"));

        let remaining = SourceRepository::new(&h.db).list_for_destination("chan").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "Alpha");
    }

    #[tokio::test]
    async fn test_concurrent_users_add_same_url() {
        let h = harness(Duration::from_secs(60)).await;

        let (r1, r2) = tokio::join!(
            h.manager.handle_command("u1", "chan-1", add_source(FEED)),
            h.manager.handle_command("u2", "chan-2", add_source(FEED)),
        );
        let (id1, id2) = (session_id(&r1.unwrap()), session_id(&r2.unwrap()));

        let (c1, c2) = tokio::join!(
            h.manager.handle_interaction("u1", id1, Interaction::Confirm),
            h.manager.handle_interaction("u2", id2, Interaction::Confirm),
        );
        assert_eq!(c1.unwrap().message.as_deref(), Some("sources_added"));
        assert_eq!(c2.unwrap().message.as_deref(), Some("sources_added"));

        let sources = SourceRepository::new(&h.db).list_all().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].destinations.contains("chan-1"));
        assert!(sources[0].destinations.contains("chan-2"));
    }

    #[tokio::test]
    async fn test_list_shows_sources_and_filters() {
        let h = harness(Duration::from_secs(60)).await;
        let reply = h
            .manager
            .handle_command("u1", "chan", Command::AddFilter { names: "rust".to_string() })
            .await
            .unwrap();
        h.manager
            .handle_interaction("u1", session_id(&reply), Interaction::Confirm)
            .await
            .unwrap();

        let reply = h.manager.handle_command("u1", "chan", Command::List).await.unwrap();
        assert_eq!(reply.message.as_deref(), Some("list"));
        let listing = h.gateway.contents_for("chan").pop().unwrap();
        assert!(listing.contains("No source configured."));
        assert!(listing.contains("rust"));
    }

    #[tokio::test]
    async fn test_unanswered_selection_times_out_once() {
        let h = harness(Duration::from_millis(300)).await;
        for url in [FEED, "https://b.example/rss"] {
            let reply = h.manager.handle_command("u1", "chan", add_source(url)).await.unwrap();
            h.manager
                .handle_interaction("u1", session_id(&reply), Interaction::Confirm)
                .await
                .unwrap();
        }

        let reply = h
            .manager
            .handle_command("u1", "chan", Command::Delete { identifier: "example".to_string() })
            .await
            .unwrap();
        assert_eq!(reply.message.as_deref(), Some("delete_select"));
        assert_eq!(reply.session.as_ref().unwrap().state, "selecting");
        let id = session_id(&reply);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(h.manager.store().is_empty().await);

        let late = h.manager.handle_interaction("u1", id, Interaction::Select(0)).await.unwrap();
        assert!(late.ignored);

        let contents = h.gateway.contents_for("chan");
        assert!(contents.last().unwrap().contains("Procedure expired"));
        assert_eq!(
            contents.iter().filter(|c| c.contains("Procedure expired")).count(),
            1
        );
        assert_eq!(SourceRepository::new(&h.db).count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancel_while_collecting_discards_validation() {
        let db = Database::new_in_memory().await.unwrap();
        let inner = StaticFeeds::default();
        inner.set(FEED, Some("Alpha"), vec![]);
        let feeds = Arc::new(SlowFeeds { inner, delay: Duration::from_millis(300) });
        let gateway = Arc::new(RecordingGateway::default());
        let publisher = Arc::new(Publisher::new(gateway.clone(), MESSAGE_BUDGET));
        let manager = SessionManager::new(
            db.clone(),
            feeds,
            publisher,
            SessionStore::new(),
            Duration::from_secs(60),
        );

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.handle_command("u1", "chan", add_source(FEED)).await }
        });

        // Wait until the session exists and is still validating
        tokio::time::timeout(Duration::from_secs(1), async {
            while manager.store().get("u1").await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session started");
        assert_eq!(manager.store().get("u1").await.unwrap().state, "collecting");

        let cancelled = manager.handle_command("u1", "chan", Command::Cancel).await.unwrap();
        assert_eq!(cancelled.message.as_deref(), Some("cancelled"));

        let validated = pending.await.unwrap().unwrap();
        assert!(validated.ignored);
        assert!(manager.store().is_empty().await);

        let contents = gateway.contents_for("chan");
        assert_eq!(contents.len(), 1);
        assert!(contents[0].contains("Procedure cancelled"));
        assert_eq!(SourceRepository::new(&db).count().await.unwrap(), 0);
    }
}
