//! IPC server for the daemon
//!
//! Listens on a Unix socket and dispatches requests to the scheduler and
//! the session manager.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::*;
use crate::scheduler::SchedulerService;
use crate::session::SessionManager;
use crate::storage::{Database, SourceRepository};
use crate::Result;

/// Maximum number of concurrent IPC requests to prevent connection pool exhaustion
const MAX_CONCURRENT_REQUESTS: usize = 10;

/// Everything a request handler can reach
pub struct DaemonContext {
    pub db: Database,
    pub scheduler: Arc<SchedulerService>,
    pub sessions: SessionManager,
    start_time: Instant,
}

impl DaemonContext {
    pub fn new(db: Database, scheduler: Arc<SchedulerService>, sessions: SessionManager) -> Self {
        Self {
            db,
            scheduler,
            sessions,
            start_time: Instant::now(),
        }
    }
}

/// IPC server that handles client connections
pub struct DaemonServer {
    context: Arc<DaemonContext>,
    socket_path: PathBuf,
    /// Semaphore to limit concurrent request processing
    request_semaphore: Arc<Semaphore>,
}

impl DaemonServer {
    pub fn new(context: DaemonContext, socket_path: PathBuf) -> Self {
        Self {
            context: Arc::new(context),
            socket_path,
            request_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        }
    }

    /// Run the IPC server until shutdown is signalled
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on: {}", self.socket_path.display());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let context = self.context.clone();
                            let semaphore = self.request_semaphore.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, context, semaphore).await {
                                    warn!("Error handling connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("IPC server shutting down");
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    context: Arc<DaemonContext>,
    semaphore: Arc<Semaphore>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }

        let _permit = semaphore.acquire().await.map_err(|e| {
            crate::Error::Other(format!("Failed to acquire semaphore: {}", e))
        })?;

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("Received request: {} (id: {})", request.method, request.id);
                handle_request(request, &context).await
            }
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                Response::error(Uuid::nil(), ERR_PARSE, format!("Parse error: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Serialize a handler result into a response
fn respond<T: serde::Serialize>(id: Uuid, result: Result<T>) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::error(id, ERR_INTERNAL, e.to_string()),
        },
        Err(e) => Response::from_error(id, &e),
    }
}

async fn handle_request(request: Request, context: &DaemonContext) -> Response {
    let id = request.id;

    match request.method.as_str() {
        methods::PING => Response::success(id, serde_json::json!({"ok": true})),
        methods::STATUS => {
            let status = StatusResponse {
                running: true,
                uptime_secs: context.start_time.elapsed().as_secs(),
                refresh_interval_secs: context.scheduler.interval().as_secs(),
                last_run: context.scheduler.last_run().await,
                active_sessions: context.sessions.store().len().await,
            };
            respond(id, Ok(status))
        }
        methods::PIPELINE_RUN => respond(id, context.scheduler.run_now().await),
        methods::SOURCE_LIST => {
            match serde_json::from_value::<SourceListParams>(request.params) {
                Ok(params) => {
                    let repo = SourceRepository::new(&context.db);
                    let result = match params.destination_id {
                        Some(destination_id) => repo.list_for_destination(&destination_id).await,
                        None => repo.list_all().await,
                    };
                    respond(id, result.map(|sources| SourceListResponse { sources }))
                }
                Err(e) => Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
            }
        }
        methods::SESSION_COMMAND => {
            match serde_json::from_value::<SessionCommandParams>(request.params) {
                Ok(params) => {
                    let result = context
                        .sessions
                        .handle_command(&params.user_id, &params.destination_id, params.command)
                        .await;
                    respond(id, result)
                }
                Err(e) => Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
            }
        }
        methods::SESSION_INTERACTION => {
            match serde_json::from_value::<SessionInteractionParams>(request.params) {
                Ok(params) => {
                    let result = context
                        .sessions
                        .handle_interaction(&params.user_id, params.session_id, params.interaction)
                        .await;
                    respond(id, result)
                }
                Err(e) => Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
            }
        }
        methods::SESSION_LIST => {
            let sessions = context.sessions.store().list().await;
            respond(id, Ok(SessionListResponse { sessions }))
        }
        _ => Response::error(
            id,
            ERR_METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    }
}
