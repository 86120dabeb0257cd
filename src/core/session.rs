use crate::core::config::{ConfigError, ConnectorConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::backoff::BackoffPolicy;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::dispatcher::{ChannelStats, HandlerSlot, MessageHandler};
use crate::core::kernel::signer::Signer;
use crate::core::kernel::supervisor::ReconnectionSupervisor;
use crate::core::kernel::ws::{
    SessionCommand, SessionConfig, SessionLinks, SubscriptionSet, WebSocketSession, WsConnector,
};
use crate::core::types::{Channel, ConnectionStats, SessionState};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// A running supervisor and the handles to reach it
struct ChannelRuntime {
    commands: mpsc::UnboundedSender<SessionCommand>,
    active: watch::Sender<bool>,
    status: watch::Receiver<SessionState>,
    task: JoinHandle<Result<(), ExchangeError>>,
}

/// State that outlives any single run of a channel
#[derive(Default)]
struct ChannelSlot {
    subscriptions: SubscriptionSet,
    handler: HandlerSlot,
    stats: Arc<ChannelStats>,
    runtime: Mutex<Option<ChannelRuntime>>,
}

impl ChannelSlot {
    fn with_runtime<T>(&self, f: impl FnOnce(Option<&ChannelRuntime>) -> T) -> T {
        let runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        f(runtime.as_ref())
    }

    fn take_runtime(&self) -> Option<ChannelRuntime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn notify(&self, command: SessionCommand) {
        self.with_runtime(|runtime| {
            if let Some(runtime) = runtime {
                // A closed receiver means the supervisor is gone; the set is replayed on restart
                let _ = runtime.commands.send(command);
            }
        });
    }
}

/// Public and private market data streams for one venue account.
///
/// Subscriptions and handlers may be registered before or after `start`.
/// Each channel runs under its own [`ReconnectionSupervisor`]; `stop` ends
/// both and waits a bounded time for them to finish.
pub struct StreamSession<K: WsConnector, C: WsCodec> {
    config: ConnectorConfig,
    connector: Arc<K>,
    codec: Arc<C>,
    signer: Option<Arc<dyn Signer>>,
    public: ChannelSlot,
    private: ChannelSlot,
}

impl<K: WsConnector, C: WsCodec> StreamSession<K, C> {
    pub fn new(
        config: ConnectorConfig,
        connector: K,
        codec: C,
        signer: Option<Arc<dyn Signer>>,
    ) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            codec: Arc::new(codec),
            signer,
            public: ChannelSlot::default(),
            private: ChannelSlot::default(),
        }
    }

    fn slot(&self, channel: Channel) -> &ChannelSlot {
        match channel {
            Channel::Public => &self.public,
            Channel::Private => &self.private,
        }
    }

    /// Add a topic; a running channel subscribes immediately, otherwise on connect.
    /// Returns `false` if the topic was already present.
    pub fn subscribe(&self, channel: Channel, topic: impl Into<String>) -> bool {
        let topic = topic.into();
        let slot = self.slot(channel);
        if !slot.subscriptions.insert(&topic) {
            return false;
        }
        slot.notify(SessionCommand::Subscribe(topic));
        true
    }

    /// Remove a topic; it will not be replayed on later reconnects
    pub fn unsubscribe(&self, channel: Channel, topic: &str) -> bool {
        let slot = self.slot(channel);
        if !slot.subscriptions.remove(topic) {
            return false;
        }
        slot.notify(SessionCommand::Unsubscribe(topic.to_string()));
        true
    }

    /// Install or replace the handler for one channel's data frames
    pub fn register_handler(&self, channel: Channel, handler: impl MessageHandler + 'static) {
        self.slot(channel).handler.set(Arc::new(handler));
    }

    /// Start the public channel, plus the private one when credentials exist.
    ///
    /// Private topics or handlers without credentials are a configuration error.
    pub fn start(&self) -> Result<(), ExchangeError> {
        self.config.validate()?;
        if self.signer.is_none()
            && (!self.private.subscriptions.is_empty() || self.private.handler.is_set())
        {
            return Err(ConfigError::MissingCredentials.into());
        }

        self.start_channel(Channel::Public)?;
        if self.signer.is_some() {
            self.start_channel(Channel::Private)?;
        }
        Ok(())
    }

    /// Start one channel's supervisor; no-op if it is already running
    pub fn start_channel(&self, channel: Channel) -> Result<(), ExchangeError> {
        if channel.is_private() && self.signer.is_none() {
            return Err(ConfigError::MissingCredentials.into());
        }

        let slot = self.slot(channel);
        let mut runtime = slot.runtime.lock().unwrap_or_else(|e| e.into_inner());
        if runtime.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Ok(());
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (active_tx, active_rx) = watch::channel(true);
        let (status_tx, status_rx) = watch::channel(SessionState::Disconnected);

        let session = WebSocketSession::new(
            channel,
            SessionConfig::for_channel(&self.config, channel),
            self.connector.clone(),
            self.codec.clone(),
            self.signer.clone(),
            SessionLinks {
                subscriptions: slot.subscriptions.clone(),
                handler: slot.handler.clone(),
                stats: slot.stats.clone(),
                commands: commands_rx,
                active: active_rx,
                status: status_tx,
            },
        );
        let backoff = BackoffPolicy::new(self.config.ws_initial_backoff, self.config.ws_max_backoff);
        let task = ReconnectionSupervisor::new(session, backoff).spawn();

        *runtime = Some(ChannelRuntime {
            commands: commands_tx,
            active: active_tx,
            status: status_rx,
            task,
        });
        info!(exchange = %self.config.exchange_name, channel = %channel, "Channel started");
        Ok(())
    }

    /// Stop every running channel, waiting up to `stop_timeout` for each
    pub async fn stop(&self) -> Result<(), ExchangeError> {
        let mut first_error = None;
        for channel in Channel::ALL {
            if let Err(e) = self.stop_channel(channel).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn stop_channel(&self, channel: Channel) -> Result<(), ExchangeError> {
        let Some(runtime) = self.slot(channel).take_runtime() else {
            return Ok(());
        };
        runtime.active.send_replace(false);

        let mut task = runtime.task;
        match timeout(self.config.stop_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ExchangeError::NetworkError(format!(
                "{} session task failed: {}",
                channel, e
            ))),
            Err(_) => {
                warn!(channel = %channel, "Session did not stop in time, aborting");
                task.abort();
                Ok(())
            }
        }
    }

    pub fn state(&self, channel: Channel) -> SessionState {
        self.slot(channel)
            .with_runtime(|runtime| runtime.map_or(SessionState::Disconnected, |r| *r.status.borrow()))
    }

    pub fn is_running(&self, channel: Channel) -> bool {
        self.slot(channel)
            .with_runtime(|runtime| runtime.is_some_and(|r| !r.task.is_finished()))
    }

    pub fn subscriptions(&self, channel: Channel) -> Vec<String> {
        self.slot(channel).subscriptions.snapshot()
    }

    pub fn stats(&self, channel: Channel) -> ConnectionStats {
        self.slot(channel).stats.snapshot()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }
}
