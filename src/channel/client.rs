//! Channel configuration, lifecycle types, and the websocket worker.
//!
//! Each `connect()` spawns one worker task that owns the socket. The worker
//! reads commands from an unbounded queue, publishes state through a watch
//! channel, and pushes every state change, inbound message, and failure
//! onto the caller's event queue in the order it happened.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::channel::stomp::{parse_frames, Command, Frame, FrameError, HeartBeat, Inbound, HEARTBEAT};
use crate::retry::{with_timeout, ReconnectPolicy};

/// Close code reported when the socket ends without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;
/// Close code reported when a close frame carries no status.
pub const NO_STATUS_CLOSE_CODE: u16 = 1005;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelDefaults;

impl ChannelDefaults {
    pub const ENDPOINT: &'static str = "ws://localhost:8080/stomp";
    pub const ENDPOINT_ENV: &'static str = "CHAT_WS_URL";
    pub const DESTINATION: &'static str = "/app/class403";
    pub const GREETING: &'static str = "hello";
    pub const LOGIN: &'static str = "user";
    pub const PASSCODE: &'static str = "password";
    pub const HEARTBEAT_OUTGOING: Duration = Duration::from_millis(4000);
    pub const HEARTBEAT_INCOMING: Duration = Duration::from_millis(4000);
    pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Framing used on top of the websocket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WireProtocol {
    /// Text frames carry the application message as-is.
    Raw,
    /// STOMP frames with a CONNECT/CONNECTED handshake.
    Stomp,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub endpoint: String,
    pub protocol: WireProtocol,
    /// Routing destination used by `publish`.
    pub destination: String,
    /// Sent once the raw socket opens. Ignored for STOMP.
    pub greeting: Option<String>,
    /// CONNECT credentials. A relay that injects its own credentials ignores
    /// these.
    pub login: String,
    pub passcode: SecretString,
    pub heart_beat: HeartBeat,
    pub reconnect: ReconnectPolicy,
    /// Bound on dialing plus the protocol handshake.
    pub connect_timeout: Duration,
    /// Destinations subscribed after CONNECTED.
    pub subscriptions: Vec<String>,
    /// `Cookie` header sent with the websocket upgrade request.
    pub cookie: Option<String>,
}

impl ChannelConfig {
    /// Raw text websocket that greets the server on open.
    pub fn raw(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            protocol: WireProtocol::Raw,
            destination: ChannelDefaults::DESTINATION.to_string(),
            greeting: Some(ChannelDefaults::GREETING.to_string()),
            login: ChannelDefaults::LOGIN.to_string(),
            passcode: SecretString::new(ChannelDefaults::PASSCODE.to_string()),
            heart_beat: HeartBeat::default(),
            reconnect: ReconnectPolicy::disabled(),
            connect_timeout: ChannelDefaults::CONNECT_TIMEOUT,
            subscriptions: Vec::new(),
            cookie: None,
        }
    }

    /// STOMP over websocket with 4s heart-beats and a 5s reconnect delay.
    pub fn stomp(endpoint: impl Into<String>) -> Self {
        Self {
            protocol: WireProtocol::Stomp,
            greeting: None,
            heart_beat: HeartBeat::new(
                ChannelDefaults::HEARTBEAT_OUTGOING,
                ChannelDefaults::HEARTBEAT_INCOMING,
            ),
            reconnect: ReconnectPolicy::fixed(ChannelDefaults::RECONNECT_DELAY),
            ..Self::raw(endpoint)
        }
    }

    /// STOMP config for the endpoint in `CHAT_WS_URL`, or the local default.
    pub fn stomp_from_env() -> Self {
        let endpoint = std::env::var(ChannelDefaults::ENDPOINT_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| ChannelDefaults::ENDPOINT.to_string());
        Self::stomp(endpoint)
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn with_credentials(mut self, login: impl Into<String>, passcode: SecretString) -> Self {
        self.login = login.into();
        self.passcode = passcode;
        self
    }

    pub fn with_heart_beat(mut self, heart_beat: HeartBeat) -> Self {
        self.heart_beat = heart_beat;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_subscription(mut self, destination: impl Into<String>) -> Self {
        self.subscriptions.push(destination.into());
        self
    }

    /// Carries the session's cookies on the upgrade request.
    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    pub(crate) fn client_request(&self) -> Result<Request, ChannelError> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        if let Some(cookie) = self.cookie.as_deref() {
            request.headers_mut().insert(COOKIE, cookie.parse()?);
        }
        Ok(request)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Application message received from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// STOMP `destination` header. Always `None` on a raw socket.
    pub destination: Option<String>,
    pub body: String,
}

/// Failure reported asynchronously on the event sequence.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelFailure {
    #[error("connection closed ({code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("broker error: {message}")]
    Broker { message: String, body: String },

    #[error("no data from broker for {}ms", silent_for.as_millis())]
    HeartbeatTimeout { silent_for: Duration },

    #[error("invalid frame: {0}")]
    Frame(FrameError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelFailure {
    fn abnormal(reason: impl Into<String>) -> Self {
        Self::Closed {
            code: ABNORMAL_CLOSE_CODE,
            reason: reason.into(),
        }
    }
}

/// One entry of a connection's lifecycle sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    State(ChannelState),
    Message(InboundMessage),
    Error(ChannelFailure),
}

/// Errors returned directly by channel calls.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is already {0:?}")]
    AlreadyActive(ChannelState),

    #[error("channel is not connected")]
    NotConnected,

    #[error("message body is empty")]
    EmptyBody,

    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("invalid cookie header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("channel worker stopped")]
    WorkerStopped,
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Send { destination: String, body: String },
    Disconnect,
}

/// Publishes state changes and events for one connection.
pub(crate) struct Reporter {
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ChannelState>,
}

impl Reporter {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<ChannelEvent>,
        state: watch::Sender<ChannelState>,
    ) -> Self {
        Self { events, state }
    }

    pub(crate) fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(event = "channel_state", state = ?next);
            let _ = self.events.send(ChannelEvent::State(next));
        }
    }

    fn report(&self, failure: ChannelFailure) {
        warn!(event = "channel_failure", error = %failure);
        let _ = self.events.send(ChannelEvent::Error(failure));
    }

    fn deliver(&self, message: InboundMessage) {
        let _ = self.events.send(ChannelEvent::Message(message));
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectionOutcome {
    /// Caller disconnected or stopped listening.
    Shutdown,
    Dropped,
}

pub(crate) async fn channel_worker(
    config: ChannelConfig,
    mut commands: mpsc::UnboundedReceiver<Outbound>,
    reporter: Reporter,
) {
    loop {
        let outcome = match run_connection(&config, &mut commands, &reporter).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                reporter.report(failure);
                ConnectionOutcome::Dropped
            }
        };
        reporter.set_state(ChannelState::Disconnected);

        if outcome == ConnectionOutcome::Shutdown {
            break;
        }
        let Some(delay) = config.reconnect.delay() else {
            break;
        };

        debug!(
            event = "reconnect_scheduled",
            delay_ms = delay.as_millis() as u64
        );
        if !wait_before_reconnect(delay, &mut commands, &reporter).await {
            break;
        }
        reporter.set_state(ChannelState::Connecting);
    }

    debug!(event = "channel_worker_stopped", endpoint = %config.endpoint);
}

async fn run_connection(
    config: &ChannelConfig,
    commands: &mut mpsc::UnboundedReceiver<Outbound>,
    reporter: &Reporter,
) -> Result<ConnectionOutcome, ChannelFailure> {
    debug!(
        event = "channel_connecting",
        endpoint = %config.endpoint,
        protocol = ?config.protocol
    );

    let opened = tokio::select! {
        opened = open(config) => opened?,
        () = wait_for_shutdown(commands, reporter) => return Ok(ConnectionOutcome::Shutdown),
    };
    let (mut socket, heart_beat) = opened;

    reporter.set_state(ChannelState::Connected);

    match config.protocol {
        WireProtocol::Raw => {
            if let Some(greeting) = config.greeting.as_deref().filter(|text| !text.is_empty()) {
                send_text(&mut socket, greeting.to_string()).await?;
            }
        }
        WireProtocol::Stomp => {
            for (index, destination) in config.subscriptions.iter().enumerate() {
                let frame = Frame::subscribe(&format!("sub-{index}"), destination);
                send_text(&mut socket, frame.to_text()).await?;
            }
        }
    }

    pump(&mut socket, config, commands, reporter, heart_beat).await
}

/// Dials the endpoint and completes the protocol handshake.
async fn open(config: &ChannelConfig) -> Result<(Socket, HeartBeat), ChannelFailure> {
    let request = config
        .client_request()
        .map_err(|err| ChannelFailure::Transport(err.to_string()))?;

    let handshake = async {
        let (mut socket, _) = connect_async(request).await.map_err(failure_from_ws)?;
        let heart_beat = match config.protocol {
            WireProtocol::Raw => HeartBeat::default(),
            WireProtocol::Stomp => stomp_handshake(&mut socket, config).await?,
        };
        Ok::<_, ChannelFailure>((socket, heart_beat))
    };

    with_timeout(config.connect_timeout, handshake)
        .await
        .map_err(|_| {
            ChannelFailure::Transport(format!(
                "connect timed out after {}ms",
                config.connect_timeout.as_millis()
            ))
        })?
}

async fn stomp_handshake(
    socket: &mut Socket,
    config: &ChannelConfig,
) -> Result<HeartBeat, ChannelFailure> {
    let connect = Frame::connect(
        &config.login,
        config.passcode.expose_secret(),
        config.heart_beat,
    );
    send_text(socket, connect.to_text()).await?;

    loop {
        let text = recv_text(socket).await?;
        for inbound in parse_frames(&text).map_err(ChannelFailure::Frame)? {
            let Inbound::Frame(frame) = inbound else {
                continue;
            };
            match frame.command {
                Command::Connected => {
                    debug!(
                        event = "stomp_connected",
                        version = frame.get("version").unwrap_or_default(),
                        heart_beat = frame.get("heart-beat").unwrap_or_default()
                    );
                    return config
                        .heart_beat
                        .negotiate(frame.get("heart-beat"))
                        .map_err(ChannelFailure::Frame);
                }
                Command::Error => return Err(broker_failure(&frame)),
                other => {
                    return Err(ChannelFailure::Protocol(format!(
                        "expected CONNECTED, got {other}"
                    )));
                }
            }
        }
    }
}

async fn pump(
    socket: &mut Socket,
    config: &ChannelConfig,
    commands: &mut mpsc::UnboundedReceiver<Outbound>,
    reporter: &Reporter,
    heart_beat: HeartBeat,
) -> Result<ConnectionOutcome, ChannelFailure> {
    let mut outgoing = heartbeat_interval(heart_beat.outgoing);
    let silence_limit = (!heart_beat.incoming.is_zero()).then(|| heart_beat.incoming * 2);
    let mut last_inbound = Instant::now();

    loop {
        let watchdog = silence_limit.map(|limit| last_inbound + limit);

        tokio::select! {
            command = commands.recv() => match command {
                Some(Outbound::Send { destination, body }) => {
                    send_text(socket, encode_outbound(config.protocol, &destination, &body)).await?;
                    debug!(event = "channel_message_sent", destination = %destination, bytes = body.len());
                }
                Some(Outbound::Disconnect) | None => {
                    close_gracefully(socket, config.protocol).await;
                    return Ok(ConnectionOutcome::Shutdown);
                }
            },
            () = reporter.events.closed() => {
                close_gracefully(socket, config.protocol).await;
                return Ok(ConnectionOutcome::Shutdown);
            }
            received = recv_text(socket) => {
                let text = received?;
                last_inbound = Instant::now();
                handle_inbound(config.protocol, &text, reporter)?;
            }
            () = tick(&mut outgoing) => {
                send_text(socket, HEARTBEAT.to_string()).await?;
            }
            () = sleep_until(watchdog) => {
                return Err(ChannelFailure::HeartbeatTimeout {
                    silent_for: silence_limit.unwrap_or_default(),
                });
            }
        }
    }
}

fn handle_inbound(
    protocol: WireProtocol,
    text: &str,
    reporter: &Reporter,
) -> Result<(), ChannelFailure> {
    if protocol == WireProtocol::Raw {
        reporter.deliver(InboundMessage {
            destination: None,
            body: text.to_string(),
        });
        return Ok(());
    }

    for inbound in parse_frames(text).map_err(ChannelFailure::Frame)? {
        let Inbound::Frame(frame) = inbound else {
            continue;
        };
        match frame.command {
            Command::Message => {
                let destination = frame.get("destination").map(str::to_string);
                reporter.deliver(InboundMessage {
                    destination,
                    body: frame.body,
                });
            }
            // The broker closes the session after ERROR.
            Command::Error => return Err(broker_failure(&frame)),
            Command::Receipt => {
                debug!(
                    event = "stomp_receipt",
                    receipt_id = frame.get("receipt-id").unwrap_or_default()
                );
            }
            other => debug!(event = "stomp_frame_ignored", command = %other),
        }
    }
    Ok(())
}

fn encode_outbound(protocol: WireProtocol, destination: &str, body: &str) -> String {
    match protocol {
        WireProtocol::Raw => body.to_string(),
        WireProtocol::Stomp => Frame::send(destination, body).to_text(),
    }
}

/// Reads until a text payload arrives, answering pings along the way.
async fn recv_text(socket: &mut Socket) -> Result<String, ChannelFailure> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Binary(bytes))) => {
                return String::from_utf8(bytes).map_err(|_| {
                    ChannelFailure::Protocol("binary message is not utf-8".to_string())
                });
            }
            Some(Ok(Message::Ping(payload))) => {
                socket
                    .send(Message::Pong(payload))
                    .await
                    .map_err(failure_from_ws)?;
            }
            Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => return Err(closed_failure(frame)),
            Some(Err(err)) => return Err(failure_from_ws(err)),
            None => {
                return Err(ChannelFailure::abnormal(
                    "connection ended without close frame",
                ));
            }
        }
    }
}

async fn send_text(socket: &mut Socket, text: String) -> Result<(), ChannelFailure> {
    socket
        .send(Message::Text(text))
        .await
        .map_err(failure_from_ws)
}

async fn close_gracefully(socket: &mut Socket, protocol: WireProtocol) {
    if protocol == WireProtocol::Stomp {
        let _ = send_text(socket, Frame::disconnect().to_text()).await;
    }
    let _ = socket.close(None).await;
    debug!(event = "channel_closed_by_client");
}

/// Resolves once the caller disconnects, drops the channel, or drops the
/// event sequence. Sends issued meanwhile are discarded.
async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<Outbound>, reporter: &Reporter) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Outbound::Send { destination, .. }) => {
                    debug!(event = "send_dropped_not_connected", destination = %destination);
                }
                Some(Outbound::Disconnect) | None => return,
            },
            () = reporter.events.closed() => return,
        }
    }
}

async fn wait_before_reconnect(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<Outbound>,
    reporter: &Reporter,
) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = wait_for_shutdown(commands, reporter) => false,
    }
}

fn heartbeat_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn failure_from_ws(err: WsError) -> ChannelFailure {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Io(_)
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            ChannelFailure::abnormal(err.to_string())
        }
        other => ChannelFailure::Transport(other.to_string()),
    }
}

fn closed_failure(frame: Option<CloseFrame<'static>>) -> ChannelFailure {
    match frame {
        Some(frame) => ChannelFailure::Closed {
            code: frame.code.into(),
            reason: frame.reason.into_owned(),
        },
        None => ChannelFailure::Closed {
            code: NO_STATUS_CLOSE_CODE,
            reason: String::new(),
        },
    }
}

fn broker_failure(frame: &Frame) -> ChannelFailure {
    ChannelFailure::Broker {
        message: frame.get("message").unwrap_or_default().to_string(),
        body: frame.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::{mpsc, watch};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Error as WsError;

    use super::*;

    #[test]
    fn stomp_defaults_declare_heart_beats_and_reconnect() {
        let config = ChannelConfig::stomp("ws://localhost:8080/stomp");
        assert_eq!(config.protocol, WireProtocol::Stomp);
        assert_eq!(config.heart_beat.header_value(), "4000,4000");
        assert_eq!(config.reconnect.delay(), Some(Duration::from_millis(5000)));
        assert_eq!(config.destination, "/app/class403");
        assert!(config.greeting.is_none());
    }

    #[test]
    fn raw_defaults_greet_and_never_reconnect() {
        let config = ChannelConfig::raw("ws://localhost:8080/ws");
        assert_eq!(config.protocol, WireProtocol::Raw);
        assert_eq!(config.greeting.as_deref(), Some("hello"));
        assert!(!config.reconnect.is_enabled());
        assert_eq!(config.heart_beat, HeartBeat::default());
    }

    #[test]
    fn client_request_carries_cookie() {
        let config = ChannelConfig::stomp("ws://localhost:8080/stomp")
            .with_cookie(Some("JSESSIONID=abc; XSRF-TOKEN=tok".to_string()));
        let request = config.client_request().expect("request");
        assert_eq!(
            request.headers().get(COOKIE).and_then(|v| v.to_str().ok()),
            Some("JSESSIONID=abc; XSRF-TOKEN=tok")
        );
    }

    #[test]
    fn client_request_rejects_bad_input() {
        assert!(ChannelConfig::raw("not a url").client_request().is_err());
        let config =
            ChannelConfig::raw("ws://localhost/ws").with_cookie(Some("bad\nvalue".to_string()));
        assert!(matches!(
            config.client_request(),
            Err(ChannelError::InvalidHeader(_))
        ));
    }

    #[test]
    fn outbound_encoding_follows_protocol() {
        assert_eq!(encode_outbound(WireProtocol::Raw, "/app/x", "hi"), "hi");
        let stomp = encode_outbound(WireProtocol::Stomp, "/app/x", "hi");
        assert!(stomp.starts_with("SEND\ndestination:/app/x\n"));
        assert!(stomp.ends_with("\n\nhi\0"));
    }

    #[test]
    fn dropped_sockets_report_abnormal_closure() {
        match failure_from_ws(WsError::ConnectionClosed) {
            ChannelFailure::Closed { code, .. } => assert_eq!(code, ABNORMAL_CLOSE_CODE),
            other => panic!("unexpected failure: {other:?}"),
        }
        assert!(matches!(
            failure_from_ws(WsError::Utf8),
            ChannelFailure::Transport(_)
        ));
    }

    #[test]
    fn close_frames_keep_code_and_reason() {
        let failure = closed_failure(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "server restart".into(),
        }));
        assert_eq!(
            failure,
            ChannelFailure::Closed {
                code: 1001,
                reason: "server restart".to_string()
            }
        );
        assert!(matches!(
            closed_failure(None),
            ChannelFailure::Closed { code: NO_STATUS_CLOSE_CODE, .. }
        ));
    }

    #[test]
    fn reporter_emits_only_real_state_changes() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let reporter = Reporter::new(events_tx, state_tx);

        reporter.set_state(ChannelState::Connecting);
        reporter.set_state(ChannelState::Connecting);
        reporter.set_state(ChannelState::Connected);

        assert_eq!(*state_rx.borrow(), ChannelState::Connected);
        assert_eq!(
            events_rx.try_recv().ok(),
            Some(ChannelEvent::State(ChannelState::Connecting))
        );
        assert_eq!(
            events_rx.try_recv().ok(),
            Some(ChannelEvent::State(ChannelState::Connected))
        );
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn stomp_inbound_delivers_messages_until_broker_error() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = watch::channel(ChannelState::Connected);
        let reporter = Reporter::new(events_tx, state_tx);

        let text = "\nMESSAGE\ndestination:/topic/class403\nmessage-id:1\n\nhi all\0ERROR\nmessage:bad\n\ndetail\0MESSAGE\n\nlate\0";
        let result = handle_inbound(WireProtocol::Stomp, text, &reporter);

        assert_eq!(
            events_rx.try_recv().ok(),
            Some(ChannelEvent::Message(InboundMessage {
                destination: Some("/topic/class403".to_string()),
                body: "hi all".to_string(),
            }))
        );
        assert_eq!(
            result,
            Err(ChannelFailure::Broker {
                message: "bad".to_string(),
                body: "detail".to_string(),
            })
        );
        assert!(events_rx.try_recv().is_err());
    }
}
