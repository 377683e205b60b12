use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ServerConfig;
use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::engine::{GameEngine, spawn_engine};
use crate::events::MatchEvent;
use crate::net::{ConnectionHandle, ConnectionId};
use crate::session::SessionRegistry;

const EVENT_QUEUE: usize = 1024;
const CONNECTION_EVENT_QUEUE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// A bound, not yet running, match server.
pub struct MatchServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    engine: Box<dyn GameEngine>,
}

impl MatchServer {
    pub async fn bind(config: ServerConfig, engine: impl GameEngine) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        log::info!("match server listening on {local_addr}");

        let registry = Arc::new(SessionRegistry::new(
            config.reconnect_window,
            config.require_reconnect_token,
        ));

        Ok(Self {
            listener,
            local_addr,
            config,
            registry,
            engine: Box::new(engine),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn spawn(self) -> ServerHandle {
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let local_addr = self.local_addr;
        let registry = self.registry();

        let _ = events_tx.try_send(MatchEvent::Listening { addr: local_addr });
        let task = tokio::spawn(self.run(events_tx, shutdown_rx));

        ServerHandle {
            local_addr,
            registry,
            events,
            shutdown,
            task,
        }
    }

    async fn run(self, events: mpsc::Sender<MatchEvent>, mut shutdown: watch::Receiver<bool>) {
        let MatchServer {
            listener,
            config,
            registry,
            engine,
            ..
        } = self;

        let (engine_tx, mut engine_rx) = spawn_engine(engine);
        let (conn_tx, mut conn_rx) = mpsc::channel(CONNECTION_EVENT_QUEUE);
        let mut dispatcher = Dispatcher::new(
            registry,
            DispatchConfig {
                hello_timeout: config.hello_timeout,
                countdown_interval: config.countdown_interval,
            },
            engine_tx,
            events.clone(),
        );

        let mut tick = tokio::time::interval(config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_id = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        next_id += 1;
                        let id = ConnectionId(next_id);
                        match ConnectionHandle::spawn(
                            stream,
                            id,
                            &config.transport,
                            config.faults.clone(),
                            conn_tx.clone(),
                        ) {
                            Ok(handle) => {
                                log::debug!("{id} accepted from {addr}");
                                dispatcher.register(handle, Instant::now());
                            }
                            Err(e) => log::warn!("failed to set up connection from {addr}: {e}"),
                        }
                    }
                    Err(e) => {
                        log::warn!("accept failed: {e}");
                        let _ = events.try_send(MatchEvent::Error {
                            message: format!("accept failed: {e}"),
                        });
                    }
                },
                Some(event) = conn_rx.recv() => dispatcher.on_connection_event(event, Instant::now()),
                Some(output) = engine_rx.recv() => dispatcher.on_engine_output(output),
                _ = tick.tick() => dispatcher.tick(Instant::now()),
            }
        }

        log::info!("match server shutting down");
        dispatcher.shutdown();
    }
}

/// Control surface of a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    events: mpsc::Receiver<MatchEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn next_event(&mut self) -> Option<MatchEvent> {
        self.events.recv().await
    }

    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            log::error!("server task failed: {e}");
        }
    }
}
