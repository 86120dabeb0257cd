use crate::core::config::{ConfigError, ConnectorConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::dispatcher::{ChannelStats, DispatchOutcome, HandlerSlot, MessageDispatcher};
use crate::core::kernel::signer::Signer;
use crate::core::types::{Channel, SessionState};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, trace, warn};

/// One open socket
#[async_trait]
pub trait WsStream: Send {
    async fn send(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Next inbound message; `None` once the peer is gone
    async fn recv(&mut self) -> Option<Result<Message, ExchangeError>>;

    async fn close(&mut self) -> Result<(), ExchangeError>;
}

/// Opens sockets; one call per (re)connect attempt
#[async_trait]
pub trait WsConnector: Send + Sync + 'static {
    type Stream: WsStream + 'static;

    async fn connect(&self, url: &str) -> Result<Self::Stream, ExchangeError>;
}

/// Tungstenite-backed socket
pub struct TungsteniteStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl WsStream for TungsteniteStream {
    async fn send(&mut self, msg: Message) -> Result<(), ExchangeError> {
        self.inner.send(msg).await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to send WebSocket message: {}", e))
        })
    }

    async fn recv(&mut self) -> Option<Result<Message, ExchangeError>> {
        self.inner.next().await.map(|result| {
            result.map_err(|e| ExchangeError::NetworkError(format!("WebSocket error: {}", e)))
        })
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.inner
            .close(None)
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Failed to close WebSocket: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl WsConnector for TungsteniteConnector {
    type Stream = TungsteniteStream;

    async fn connect(&self, url: &str) -> Result<Self::Stream, ExchangeError> {
        let (inner, _) = connect_async(url).await.map_err(|e| {
            ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
        })?;
        Ok(TungsteniteStream { inner })
    }
}

/// Ordered, duplicate-free topic list for one channel.
///
/// Written by the caller, read by the session on every (re)connect. Faults
/// never touch it; only an explicit unsubscribe removes a topic.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet(Arc<Mutex<Vec<String>>>);

impl SubscriptionSet {
    /// `false` if the topic was already present
    pub fn insert(&self, topic: &str) -> bool {
        let mut topics = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if topics.iter().any(|t| t == topic) {
            return false;
        }
        topics.push(topic.to_string());
        true
    }

    /// `false` if the topic was not present
    pub fn remove(&self, topic: &str) -> bool {
        let mut topics = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let before = topics.len();
        topics.retain(|t| t != topic);
        topics.len() != before
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|t| t == topic)
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Live subscription change for a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Why the receive loop returned
#[derive(Debug)]
pub enum SessionExit {
    Stopped,
    Faulted(ExchangeError),
}

/// Per-channel socket settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub exchange_name: String,
    pub url: String,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub auth_expiry_ms: u64,
}

impl SessionConfig {
    pub fn for_channel(config: &ConnectorConfig, channel: Channel) -> Self {
        let url = match channel {
            Channel::Public => config.ws_public_url.clone(),
            Channel::Private => config.ws_private_url.clone(),
        };
        Self {
            exchange_name: config.exchange_name.clone(),
            url,
            connect_timeout: config.connect_timeout,
            auth_timeout: config.auth_timeout,
            heartbeat_interval: config.heartbeat_interval,
            pong_timeout: config.pong_timeout,
            auth_expiry_ms: config.auth_expiry_ms,
        }
    }

    /// How often the heartbeat is evaluated
    fn check_period(&self) -> Duration {
        (self.heartbeat_interval.min(self.pong_timeout) / 4).max(Duration::from_millis(50))
    }
}

/// Protocol-derived flags and heartbeat timestamps of one socket
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub connected: bool,
    pub authenticated: bool,
    pub last_ping_at: Option<Instant>,
    pub last_pong_at: Option<Instant>,
    pub last_inbound_at: Option<Instant>,
    /// Topics this socket has sent a subscribe frame for
    pub live_topics: Vec<String>,
}

impl ConnectionState {
    fn reset_heartbeat(&mut self, now: Instant) {
        self.last_ping_at = None;
        self.last_pong_at = None;
        self.last_inbound_at = Some(now);
    }

    /// When the unanswered ping went out, if there is one
    pub fn awaiting_pong(&self) -> Option<Instant> {
        match (self.last_ping_at, self.last_pong_at) {
            (Some(ping), Some(pong)) if pong >= ping => None,
            (ping, _) => ping,
        }
    }
}

/// Everything a session shares with its owner
pub struct SessionLinks {
    pub subscriptions: SubscriptionSet,
    pub handler: HandlerSlot,
    pub stats: Arc<ChannelStats>,
    pub commands: mpsc::UnboundedReceiver<SessionCommand>,
    pub active: watch::Receiver<bool>,
    pub status: watch::Sender<SessionState>,
}

/// One channel's socket and protocol state.
///
/// Drives `Disconnected -> Connecting -> Connected -> (Authenticating ->
/// Authenticated) -> Subscribed`; any transport error, close, or missed pong
/// drops back to `Disconnected` with the subscription set untouched.
pub struct WebSocketSession<K: WsConnector, C: WsCodec> {
    channel: Channel,
    config: SessionConfig,
    connector: Arc<K>,
    codec: Arc<C>,
    signer: Option<Arc<dyn Signer>>,
    dispatcher: MessageDispatcher<C>,
    subscriptions: SubscriptionSet,
    stats: Arc<ChannelStats>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    active: watch::Receiver<bool>,
    status: watch::Sender<SessionState>,
    stream: Option<K::Stream>,
    state: ConnectionState,
}

impl<K: WsConnector, C: WsCodec> WebSocketSession<K, C> {
    pub fn new(
        channel: Channel,
        config: SessionConfig,
        connector: Arc<K>,
        codec: Arc<C>,
        signer: Option<Arc<dyn Signer>>,
        links: SessionLinks,
    ) -> Self {
        let dispatcher =
            MessageDispatcher::new(channel, codec.clone(), links.handler, links.stats.clone());
        Self {
            channel,
            config,
            connector,
            codec,
            signer,
            dispatcher,
            subscriptions: links.subscriptions,
            stats: links.stats,
            commands: links.commands,
            active: links.active,
            status: links.status,
            stream: None,
            state: ConnectionState::default(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn session_state(&self) -> SessionState {
        *self.status.borrow()
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    fn set_status(&self, state: SessionState) {
        self.status.send_replace(state);
        debug!(channel = %self.channel, state = %state, "Session state changed");
    }

    async fn send(&mut self, msg: Message) -> Result<(), ExchangeError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ExchangeError::NetworkError("WebSocket not connected".to_string()))?;
        stream.send(msg).await?;
        self.stats.record_sent();
        Ok(())
    }

    async fn recv_from(stream: &mut Option<K::Stream>) -> Option<Result<Message, ExchangeError>> {
        match stream.as_mut() {
            Some(stream) => stream.recv().await,
            None => None,
        }
    }

    /// Bring the socket to `Subscribed`
    pub async fn establish(&mut self) -> Result<(), ExchangeError> {
        // Queued changes are already reflected in the set being replayed
        while self.commands.try_recv().is_ok() {}

        self.connect().await?;
        if self.channel.is_private() {
            self.authenticate().await?;
        }
        self.replay_subscriptions().await
    }

    #[instrument(skip(self), fields(exchange = %self.config.exchange_name, channel = %self.channel, url = %self.config.url))]
    pub async fn connect(&mut self) -> Result<(), ExchangeError> {
        self.set_status(SessionState::Connecting);

        let stream = timeout(
            self.config.connect_timeout,
            self.connector.connect(&self.config.url),
        )
        .await
        .map_err(|_| ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string()))??;

        self.stream = Some(stream);
        self.state.connected = true;
        self.state.authenticated = false;
        self.state.live_topics.clear();
        self.state.reset_heartbeat(Instant::now());
        self.set_status(SessionState::Connected);
        info!("WebSocket connected");
        Ok(())
    }

    /// Send the signed auth frame and wait, bounded, for its acknowledgment
    #[instrument(skip(self), fields(exchange = %self.config.exchange_name, channel = %self.channel))]
    pub async fn authenticate(&mut self) -> Result<(), ExchangeError> {
        let signer = self.signer.clone().ok_or(ConfigError::MissingCredentials)?;
        self.set_status(SessionState::Authenticating);

        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let expires = now_ms + self.config.auth_expiry_ms;
        let signature = signer.sign_ws_auth(expires)?;
        let frame = self.codec.encode_auth(signer.api_key(), expires, &signature)?;
        self.send(frame).await?;

        let deadline = Instant::now() + self.config.auth_timeout;
        loop {
            let Ok(next) = timeout_at(deadline, Self::recv_from(&mut self.stream)).await else {
                return Err(ExchangeError::AuthenticationFault(format!(
                    "No auth acknowledgment within {:?}",
                    self.config.auth_timeout
                )));
            };

            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(ExchangeError::NetworkError(
                        "WebSocket closed during authentication".to_string(),
                    ))
                }
            };

            if let Some(DispatchOutcome::AuthAck { success, message }) =
                self.handle_message(msg).await?
            {
                if !success {
                    return Err(ExchangeError::AuthenticationFault(format!(
                        "Venue rejected authentication: {}",
                        message
                    )));
                }
                self.state.authenticated = true;
                self.set_status(SessionState::Authenticated);
                info!("WebSocket authenticated");
                return Ok(());
            }
        }
    }

    /// One subscribe frame per topic, in insertion order
    pub async fn replay_subscriptions(&mut self) -> Result<(), ExchangeError> {
        let topics = self.subscriptions.snapshot();
        for topic in &topics {
            let frame = self.codec.encode_subscription(&[topic.as_str()])?;
            self.send(frame).await?;
        }
        info!(channel = %self.channel, topics = topics.len(), "Subscriptions replayed");
        self.state.live_topics = topics;
        self.set_status(SessionState::Subscribed);
        Ok(())
    }

    /// Receive loop. Returns on stop or on the first fault.
    pub async fn run(&mut self) -> SessionExit {
        let mut heartbeat = interval(self.config.check_period());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            if !*self.active.borrow() {
                return SessionExit::Stopped;
            }

            tokio::select! {
                next = Self::recv_from(&mut self.stream) => {
                    let msg = match next {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => return SessionExit::Faulted(e),
                        None => {
                            return SessionExit::Faulted(ExchangeError::NetworkError(
                                "WebSocket stream ended".to_string(),
                            ))
                        }
                    };
                    if let Err(e) = self.handle_message(msg).await {
                        return SessionExit::Faulted(e);
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionExit::Stopped;
                    };
                    if let Err(e) = self.apply_command(command).await {
                        return SessionExit::Faulted(e);
                    }
                }
                changed = self.active.changed() => {
                    if changed.is_err() || !*self.active.borrow() {
                        return SessionExit::Stopped;
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.check_heartbeat().await {
                        return SessionExit::Faulted(e);
                    }
                }
            }
        }
    }

    /// Route one inbound message; `Err` only for faults that end the socket
    async fn handle_message(
        &mut self,
        msg: Message,
    ) -> Result<Option<DispatchOutcome>, ExchangeError> {
        let now = Instant::now();
        self.state.last_inbound_at = Some(now);

        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!(channel = %self.channel, "Discarding non-UTF-8 binary frame");
                    return Ok(None);
                }
            },
            Message::Ping(payload) => {
                self.send(Message::Pong(payload)).await?;
                return Ok(None);
            }
            Message::Pong(_) => {
                self.state.last_pong_at = Some(now);
                return Ok(None);
            }
            Message::Close(frame) => {
                let reason = frame.map_or_else(String::new, |f| f.reason.to_string());
                return Err(ExchangeError::NetworkError(format!(
                    "WebSocket closed by venue: {}",
                    reason
                )));
            }
            Message::Frame(_) => return Ok(None),
        };

        let outcome = self.dispatcher.on_message(&text);
        match &outcome {
            DispatchOutcome::Pong => {
                self.state.last_pong_at = Some(now);
                trace!(channel = %self.channel, "Pong received");
            }
            DispatchOutcome::Ping => {
                let pong = self.codec.encode_pong()?;
                self.send(pong).await?;
            }
            DispatchOutcome::AuthAck { .. } if self.state.authenticated => {
                debug!(channel = %self.channel, "Ignoring repeated auth acknowledgment");
            }
            _ => {}
        }
        Ok(Some(outcome))
    }

    /// Reconcile one queued change against the socket and the current set.
    ///
    /// A change made while the socket was connecting may already be covered
    /// by the replay, or undone by a later call; neither sends a frame.
    async fn apply_command(&mut self, command: SessionCommand) -> Result<(), ExchangeError> {
        let frame = match &command {
            SessionCommand::Subscribe(topic) => {
                if self.state.live_topics.contains(topic) || !self.subscriptions.contains(topic) {
                    trace!(channel = %self.channel, ?command, "Subscription change already applied");
                    return Ok(());
                }
                self.codec.encode_subscription(&[topic.as_str()])?
            }
            SessionCommand::Unsubscribe(topic) => {
                if !self.state.live_topics.contains(topic) || self.subscriptions.contains(topic) {
                    trace!(channel = %self.channel, ?command, "Subscription change already applied");
                    return Ok(());
                }
                self.codec.encode_unsubscription(&[topic.as_str()])?
            }
        };
        debug!(channel = %self.channel, ?command, "Applying subscription change");
        self.send(frame).await?;

        match command {
            SessionCommand::Subscribe(topic) => self.state.live_topics.push(topic),
            SessionCommand::Unsubscribe(topic) => self.state.live_topics.retain(|t| *t != topic),
        }
        Ok(())
    }

    /// Ping after `heartbeat_interval` of silence; fault if the pong is late
    async fn check_heartbeat(&mut self) -> Result<(), ExchangeError> {
        let now = Instant::now();

        if let Some(ping_at) = self.state.awaiting_pong() {
            if now.duration_since(ping_at) >= self.config.pong_timeout {
                return Err(ExchangeError::ConnectionTimeout(format!(
                    "No pong within {:?} of ping",
                    self.config.pong_timeout
                )));
            }
            return Ok(());
        }

        let idle = self
            .state
            .last_inbound_at
            .map_or(Duration::MAX, |last| now.duration_since(last));
        if idle >= self.config.heartbeat_interval {
            let ping = self.codec.encode_ping()?;
            self.send(ping).await?;
            self.state.last_ping_at = Some(now);
            trace!(channel = %self.channel, "Heartbeat ping sent");
        }
        Ok(())
    }

    /// Close the socket if open and clear the protocol flags. Subscriptions stay.
    pub async fn teardown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match timeout(self.config.connect_timeout, stream.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(channel = %self.channel, error = %e, "Error while closing socket"),
                Err(_) => debug!(channel = %self.channel, "Timed out closing socket"),
            }
        }
        self.state.connected = false;
        self.state.authenticated = false;
        self.state.live_topics.clear();
        self.set_status(SessionState::Disconnected);
    }

    /// Terminal close after a stop request
    pub async fn shutdown(&mut self) {
        self.set_status(SessionState::ShuttingDown);
        self.teardown().await;
        info!(channel = %self.channel, "Session shut down");
    }

    /// Sleep for `delay` unless a stop arrives first; `false` means stopped
    pub async fn sleep_while_active(&mut self, delay: Duration) -> bool {
        if !*self.active.borrow() {
            return false;
        }
        tokio::select! {
            () = sleep(delay) => *self.active.borrow(),
            () = wait_for_stop(&mut self.active) => false,
        }
    }
}

async fn wait_for_stop(active: &mut watch::Receiver<bool>) {
    loop {
        if !*active.borrow() {
            return;
        }
        if active.changed().await.is_err() {
            return;
        }
    }
}
