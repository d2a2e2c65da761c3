//! Unix domain socket server for IPC
//!
//! Provides request-response communication with the page bridge and the
//! settings popup, plus push notifications (bridge click commands, state
//! changes, pipeline events) for subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::PipelineEvent;
use crate::hotkey::{KeyPhase, Modifier, ModifierTracker};
use crate::probe::{BridgeCommand, PageMirror};
use crate::settings::{Settings, SettingsMap, SettingsStore, NO_MODIFIER};
use crate::state::{Orchestrator, State};

use super::protocol::{DaemonStatus, IpcError, Notification, Request, Response, MAX_FRAME_LEN};

/// Everything a client request can reach
#[derive(Clone)]
pub struct ServerContext {
    pub orchestrator: Arc<Orchestrator>,
    pub tracker: Arc<ModifierTracker>,
    pub mirror: Arc<PageMirror>,
    pub store: Arc<dyn SettingsStore>,
    pub events: broadcast::Sender<PipelineEvent>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

struct Shared {
    ctx: ServerContext,
    state: RwLock<ServerState>,
}

/// Shared server state
struct ServerState {
    start_time: std::time::Instant,
    /// Set once a bridge has pushed page state
    page_connected: bool,
}

impl Shared {
    fn new(ctx: ServerContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            state: RwLock::new(ServerState {
                start_time: std::time::Instant::now(),
                page_connected: false,
            }),
        })
    }
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, ctx: ServerContext) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared: Shared::new(ctx),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client<S>(stream: S, shared: Arc<Shared>) -> Result<(), IpcError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(64);
        let mut writer_task = AbortOnDrop(tokio::spawn(Self::write_frames(writer, out_rx)));
        let mut forwarder: Option<AbortOnDrop> = None;

        let result = loop {
            let body = match Self::read_frame(&mut reader).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("client disconnected");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            let response = match serde_json::from_slice::<Request>(&body) {
                Ok(request) => {
                    debug!(?request, "received request");
                    Self::process_request(request, &shared).await
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse request");
                    Response::error("bad_request", e)
                }
            };

            // Receivers are taken before the confirmation is queued so no
            // notification raised after it can be missed
            let subscription = (matches!(response, Response::Subscribed) && forwarder.is_none())
                .then(|| Subscription::new(&shared.ctx));

            let frame = match encode_frame(&response) {
                Ok(frame) => frame,
                Err(e) => break Err(e),
            };
            if out_tx.send(frame).await.is_err() {
                break Ok(());
            }

            if let Some(subscription) = subscription {
                debug!("client subscribed to notifications");
                forwarder = Some(AbortOnDrop(tokio::spawn(subscription.forward(out_tx.clone()))));
            }
        };

        drop(forwarder);
        drop(out_tx);
        let _ = (&mut writer_task.0).await;

        result
    }

    /// Read one length-prefixed frame; `None` on clean end of stream
    async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, IpcError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }

    /// Drain queued frames onto the socket
    async fn write_frames<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>)
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!(error = %e, "client write failed");
                break;
            }
        }
    }

    /// Process a request and return a response
    async fn process_request(request: Request, shared: &Shared) -> Response {
        let ctx = &shared.ctx;
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let state = shared.state.read().await;
                let config = ctx.orchestrator.config();
                Response::Status(DaemonStatus {
                    state: ctx.orchestrator.state(),
                    in_flight: ctx.orchestrator.is_in_flight(),
                    grace_active: ctx.tracker.grace_active(),
                    held: ctx.tracker.state(),
                    enabled: config.enabled,
                    page_connected: state.page_connected,
                    uptime_secs: state.start_time.elapsed().as_secs(),
                    ..DaemonStatus::default()
                })
            }

            Request::Subscribe => Response::Subscribed,

            Request::Key { phase, key } => {
                match phase {
                    KeyPhase::Down => ctx.tracker.key_down(&key),
                    KeyPhase::Up => ctx.tracker.key_up(&key),
                }
                Response::Ack
            }

            Request::Blur => {
                ctx.tracker.blur();
                Response::Ack
            }

            Request::Click(click) => Response::ClickResult {
                outcome: ctx.orchestrator.handle_click(&click),
            },

            Request::PageState(page) => {
                ctx.mirror.update(page);
                let mut state = shared.state.write().await;
                if !state.page_connected {
                    info!("page bridge connected");
                    state.page_connected = true;
                }
                Response::Ack
            }

            Request::GetSettings => Self::read_settings(ctx).await,

            Request::SetSettings {
                skip_key,
                hold_to_send,
            } => {
                let mut values = SettingsMap::new();
                if let Some(key) = skip_key {
                    let key = if key == NO_MODIFIER {
                        key
                    } else {
                        match key.parse::<Modifier>() {
                            Ok(modifier) => modifier.to_string(),
                            Err(e) => return Response::error("invalid_skip_key", e),
                        }
                    };
                    values.insert("skipKey".into(), key.into());
                }
                if let Some(hold) = hold_to_send {
                    values.insert("holdToSend".into(), hold.into());
                }

                if let Err(e) = ctx.store.set(values).await {
                    warn!(error = %e, "settings write failed");
                    return Response::error("settings_unavailable", e);
                }
                info!("settings updated via IPC");
                Self::read_settings(ctx).await
            }
        }
    }

    async fn read_settings(ctx: &ServerContext) -> Response {
        match ctx.store.get(Settings::defaults_map()).await {
            Ok(map) => {
                let settings = Settings::normalize(&map);
                let hint = settings.hint();
                Response::Settings { settings, hint }
            }
            Err(e) => Response::error("settings_unavailable", e),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Notification sources for one subscribed client
struct Subscription {
    commands: broadcast::Receiver<BridgeCommand>,
    events: broadcast::Receiver<PipelineEvent>,
    state: watch::Receiver<State>,
}

impl Subscription {
    fn new(ctx: &ServerContext) -> Self {
        Self {
            commands: ctx.mirror.subscribe(),
            events: ctx.events.subscribe(),
            state: ctx.orchestrator.subscribe_state(),
        }
    }

    async fn forward(mut self, out_tx: mpsc::Sender<Vec<u8>>) {
        let mut previous = *self.state.borrow_and_update();

        loop {
            let notification = tokio::select! {
                command = self.commands.recv() => match command {
                    Ok(command) => Notification::DispatchClick(command),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "bridge command receiver lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = self.events.recv() => match event {
                    Ok(event) => Notification::PipelineEvent { event },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "pipeline event receiver lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = self.state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *self.state.borrow_and_update();
                    let notification = Notification::StateChanged { state, previous };
                    previous = state;
                    notification
                }
            };

            let frame = match encode_frame(&notification) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "failed to encode notification");
                    continue;
                }
            };
            if out_tx.send(frame).await.is_err() {
                break;
            }
        }
    }
}

/// Aborts a connection's helper task when the handler goes away, including
/// when shutdown cancels the handler mid-await
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Length-prefixed JSON frame
fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, IpcError> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}
