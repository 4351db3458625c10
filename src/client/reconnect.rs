//! Client state machine: one live connection at a time, re-established after
//! every close or error on a fixed delay, with a fresh `subscribe` each time.
//!
//! A single driver task owns the connection and the reconnect timer, so two
//! attempts or two pending timers can never coexist. `disconnect` flips a
//! watch flag that every await point in the driver selects on.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

use super::ClientConfig;
use super::window::ClientWindow;
use crate::events::{ClientEvent, EventBus};
use crate::hook::HookEvent;
use crate::protocol::{ClientMessage, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// An open bidirectional text channel to the server.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, text: String) -> Result<()>;
    /// Next text frame. `None` once the peer has closed.
    async fn next_frame(&mut self) -> Option<Result<String>>;
    async fn close(&mut self);
}

/// Opens links. No timeout is applied to an attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Link>>;
}

pub struct ReconnectingClient {
    window: Arc<Mutex<ClientWindow>>,
    bus: Arc<EventBus>,
    state: watch::Receiver<ConnectionState>,
    stop: watch::Sender<bool>,
    driver: Option<JoinHandle<()>>,
}

impl ReconnectingClient {
    /// Start connecting right away. Must be called inside a tokio runtime.
    pub fn spawn(connector: Arc<dyn Connector>, max_events: usize, config: ClientConfig) -> Self {
        let window = Arc::new(Mutex::new(ClientWindow::new(max_events)));
        let bus = Arc::new(EventBus::default());
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (stop, stop_rx) = watch::channel(false);

        let driver = Driver {
            connector,
            window: Arc::clone(&window),
            bus: Arc::clone(&bus),
            state: state_tx,
            config,
        };
        let handle = tokio::spawn(driver.run(stop_rx));

        Self {
            window,
            bus,
            state,
            stop,
            driver: Some(handle),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions (the latest value only).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.bus.subscribe()
    }

    /// A copy of the local window, oldest first.
    pub async fn events(&self) -> Vec<HookEvent> {
        self.window.lock().await.snapshot()
    }

    /// Current window size.
    pub async fn max_events(&self) -> usize {
        self.window.lock().await.max()
    }

    /// Resize the local window. Not sent to the server: the next
    /// (re)connection's `subscribe` picks the new size up.
    pub async fn set_max_events(&self, max: usize) -> usize {
        self.window.lock().await.set_max(max)
    }

    /// Empty the local window without touching the connection.
    pub async fn clear(&self) {
        self.window.lock().await.clear();
    }

    /// Stop reconnecting and close the live link. Safe from any state, any number of times.
    pub fn disconnect(&self) {
        self.stop.send_replace(true);
    }

    /// Disconnect and wait for the driver to finish closing.
    pub async fn shutdown(mut self) {
        self.disconnect();
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

impl Drop for ReconnectingClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct Driver {
    connector: Arc<dyn Connector>,
    window: Arc<Mutex<ClientWindow>>,
    bus: Arc<EventBus>,
    state: watch::Sender<ConnectionState>,
    config: ClientConfig,
}

/// Resolves once a stop was requested (or the client handle is gone).
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

impl Driver {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            self.transition(ConnectionState::Connecting);
            let attempt = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                attempt = self.connector.connect() => attempt,
            };

            match attempt {
                Ok(link) => {
                    if self.session(link, &mut stop).await {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %format!("{e:#}"), "connection attempt failed"),
            }

            self.transition(ConnectionState::Disconnected);
            let delay = self.config.reconnect_delay;
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.transition(ConnectionState::Disconnected);
        tracing::debug!("client driver stopped");
    }

    /// Run one connection to completion. Returns true if a stop was requested.
    async fn session(&self, mut link: Box<dyn Link>, stop: &mut watch::Receiver<bool>) -> bool {
        self.transition(ConnectionState::Connected);

        let limit = self.window.lock().await.max();
        let subscribe = match ClientMessage::subscribe(limit).encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode subscribe");
                link.close().await;
                return false;
            }
        };
        if let Err(e) = link.send(subscribe).await {
            tracing::warn!(error = %e, "failed to send subscribe");
            return false;
        }
        tracing::debug!(limit, "subscribe sent");

        loop {
            let frame = tokio::select! {
                biased;
                _ = stopped(stop) => {
                    link.close().await;
                    return true;
                }
                frame = link.next_frame() => frame,
            };
            match frame {
                Some(Ok(text)) => self.apply(&text).await,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "connection error");
                    return false;
                }
                None => {
                    tracing::info!("connection closed by server");
                    return false;
                }
            }
        }
    }

    async fn apply(&self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(ServerMessage::Initial { data }) => {
                let count = {
                    let mut window = self.window.lock().await;
                    window.replace_all(data);
                    window.len()
                };
                tracing::debug!(count, "baseline received");
                self.bus.emit(ClientEvent::Baseline { count });
            }
            Ok(ServerMessage::Event { data }) => {
                self.window.lock().await.append(data.clone());
                self.bus.emit(ClientEvent::Received(data));
            }
            Ok(ServerMessage::Subscribed) => tracing::debug!("subscription acknowledged"),
            Ok(ServerMessage::Error { message }) => {
                tracing::warn!(%message, "server reported an error");
                self.bus.emit(ClientEvent::ServerError(message));
            }
            Err(e) => tracing::warn!(error = %e, "skipping unreadable frame"),
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "client state");
            self.bus.emit(ClientEvent::StateChanged(next));
        }
    }
}
