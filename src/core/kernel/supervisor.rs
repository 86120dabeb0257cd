use crate::core::errors::ExchangeError;
use crate::core::kernel::backoff::BackoffPolicy;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::ws::{SessionExit, WebSocketSession, WsConnector};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Keeps one channel's session alive until stopped.
///
/// Every fault tears the socket down, waits one backoff step and runs the
/// full connect, authenticate and resubscribe sequence again. The backoff
/// resets as soon as a session reaches `Subscribed`. Only configuration
/// errors end the loop early.
pub struct ReconnectionSupervisor<K: WsConnector, C: WsCodec> {
    session: WebSocketSession<K, C>,
    backoff: BackoffPolicy,
}

impl<K: WsConnector, C: WsCodec> ReconnectionSupervisor<K, C> {
    pub fn new(session: WebSocketSession<K, C>, backoff: BackoffPolicy) -> Self {
        Self { session, backoff }
    }

    pub fn spawn(self) -> JoinHandle<Result<(), ExchangeError>> {
        tokio::spawn(self.run())
    }

    #[instrument(skip(self), fields(channel = %self.session.channel()))]
    pub async fn run(mut self) -> Result<(), ExchangeError> {
        let outcome = loop {
            if !self.session.is_active() {
                break Ok(());
            }

            match self.session.establish().await {
                Ok(()) => {
                    self.backoff.reset();
                    match self.session.run().await {
                        SessionExit::Stopped => break Ok(()),
                        SessionExit::Faulted(e) => warn!(error = %e, "Session faulted"),
                    }
                }
                Err(e @ ExchangeError::ConfigError(_)) => {
                    error!(error = %e, "Session cannot start");
                    break Err(e);
                }
                Err(e) => warn!(error = %e, "Failed to establish session"),
            }

            self.session.teardown().await;

            let delay = self.backoff.next();
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
            if !self.session.sleep_while_active(delay).await {
                break Ok(());
            }
            self.session.stats().record_reconnect();
        };

        self.session.shutdown().await;
        outcome
    }
}
