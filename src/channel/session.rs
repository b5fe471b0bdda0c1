//! Stateful realtime channel with an explicit lifecycle event sequence.
//!
//! `RealtimeChannel` owns at most one live connection. Each successful
//! [`RealtimeChannel::connect`] returns a fresh [`ChannelEvents`] stream that
//! starts with `State(Connecting)` and ends after the final
//! `State(Disconnected)`. Dropping the stream tears the connection down.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::channel::client::{
    channel_worker, ChannelConfig, ChannelError, ChannelEvent, ChannelState, Outbound, Reporter,
};

/// Lifecycle events for one connection, in the order they happened.
#[derive(Debug)]
pub struct ChannelEvents {
    receiver: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelEvents {
    /// Receives the next event, or `None` once the connection is finished.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.receiver.recv().await
    }
}

impl Stream for ChannelEvents {
    type Item = ChannelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[derive(Debug)]
struct ActiveConnection {
    commands: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<ChannelState>,
    worker: JoinHandle<()>,
}

/// One logical realtime connection.
#[derive(Debug)]
pub struct RealtimeChannel {
    config: ChannelConfig,
    active: Option<ActiveConnection>,
}

impl RealtimeChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        self.active
            .as_ref()
            .map(|active| *active.state.borrow())
            .unwrap_or_default()
    }

    /// Starts connecting and returns the new connection's event sequence.
    ///
    /// Rejected with [`ChannelError::AlreadyActive`] while Connecting or
    /// Connected. Calling it while a reconnect is pending cancels that
    /// reconnect and dials immediately. Must be called inside a tokio
    /// runtime.
    pub fn connect(&mut self) -> Result<ChannelEvents, ChannelError> {
        let state = self.state();
        if state != ChannelState::Disconnected {
            return Err(ChannelError::AlreadyActive(state));
        }

        self.config.client_request()?;

        if let Some(stale) = self.active.take() {
            stale.worker.abort();
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);

        let reporter = Reporter::new(events_tx, state_tx);
        reporter.set_state(ChannelState::Connecting);

        let worker = tokio::spawn(channel_worker(self.config.clone(), commands_rx, reporter));

        self.active = Some(ActiveConnection {
            commands: commands_tx,
            state: state_rx,
            worker,
        });

        Ok(ChannelEvents {
            receiver: events_rx,
        })
    }

    /// Closes the connection and waits for the worker to finish.
    ///
    /// A no-op when nothing is connected.
    pub async fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.commands.send(Outbound::Disconnect);
        if active.worker.await.is_err() {
            debug!(event = "channel_worker_join_failed");
        }
    }

    /// Sends `body` to `destination`. Fire-and-forget.
    ///
    /// Empty bodies and calls outside the Connected state are rejected
    /// without touching the transport. The destination is ignored on a raw
    /// socket.
    pub fn send(
        &self,
        destination: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<(), ChannelError> {
        let body = body.into();
        if body.is_empty() {
            return Err(ChannelError::EmptyBody);
        }

        let active = self.active.as_ref().ok_or(ChannelError::NotConnected)?;
        if *active.state.borrow() != ChannelState::Connected {
            return Err(ChannelError::NotConnected);
        }

        active
            .commands
            .send(Outbound::Send {
                destination: destination.into(),
                body,
            })
            .map_err(|_| ChannelError::WorkerStopped)
    }

    /// Sends `body` to the configured routing destination.
    pub fn publish(&self, body: impl Into<String>) -> Result<(), ChannelError> {
        self.send(self.config.destination.clone(), body)
    }
}
