use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{VenueFrame, WsCodec};
use crate::core::types::{Channel, ConnectionStats, StreamFrame, VenueValue};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, trace, warn};

/// Keys of which a frame must carry at least one to be routed
pub const FRAME_INDICATORS: [&str; 3] = ["topic", "op", "success"];

/// Caller-supplied consumer of one channel's application frames
pub trait MessageHandler: Send + Sync {
    fn on_frame(&self, frame: StreamFrame) -> anyhow::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(StreamFrame) -> anyhow::Result<()> + Send + Sync,
{
    fn on_frame(&self, frame: StreamFrame) -> anyhow::Result<()> {
        self(frame)
    }
}

/// The handler registered for a channel; replaceable while the session runs
#[derive(Clone, Default)]
pub struct HandlerSlot(Arc<RwLock<Option<Arc<dyn MessageHandler>>>>);

impl HandlerSlot {
    pub fn set(&self, handler: Arc<dyn MessageHandler>) {
        let mut slot = self.0.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handler);
    }

    pub fn get(&self) -> Option<Arc<dyn MessageHandler>> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

/// Per-channel counters, shared between the session and its owner
#[derive(Debug, Default)]
pub struct ChannelStats {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    handler_failures: AtomicU64,
    reconnects: AtomicU64,
}

impl ChannelStats {
    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// What the session should do with a frame the dispatcher looked at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Forwarded to the handler, which returned normally
    Delivered,
    /// Heartbeat reply; refresh the pong timestamp
    Pong,
    /// Venue-initiated heartbeat; answer it
    Ping,
    /// Auth handshake result for a waiting `Authenticating` state
    AuthAck { success: bool, message: String },
    /// Consumed internally, nothing to do
    Control,
    /// Malformed or unroutable; logged and discarded
    Dropped,
    /// Handler returned an error or panicked; logged, loop continues
    HandlerFailed,
}

/// Validates, normalizes and routes inbound frames for one channel
pub struct MessageDispatcher<C: WsCodec> {
    channel: Channel,
    codec: Arc<C>,
    handler: HandlerSlot,
    stats: Arc<ChannelStats>,
}

impl<C: WsCodec> MessageDispatcher<C> {
    pub fn new(
        channel: Channel,
        codec: Arc<C>,
        handler: HandlerSlot,
        stats: Arc<ChannelStats>,
    ) -> Self {
        Self {
            channel,
            codec,
            handler,
            stats,
        }
    }

    /// Handle one raw text frame. Never fails: every problem becomes an outcome.
    pub fn on_message(&self, raw: &str) -> DispatchOutcome {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        trace!(channel = %self.channel, raw, "Inbound frame");

        let frame = match self.validate(raw).and_then(|value| self.codec.decode_frame(value)) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %self.channel, error = %e, "Discarding frame");
                return DispatchOutcome::Dropped;
            }
        };

        match frame {
            VenueFrame::Pong => DispatchOutcome::Pong,
            VenueFrame::Ping => DispatchOutcome::Ping,
            VenueFrame::AuthAck { success, message } => DispatchOutcome::AuthAck { success, message },
            VenueFrame::CommandAck {
                op,
                success,
                message,
            } => {
                if success {
                    debug!(channel = %self.channel, op = %op, "Command acknowledged");
                } else {
                    warn!(channel = %self.channel, op = %op, reason = %message, "Command rejected by venue");
                }
                DispatchOutcome::Control
            }
            VenueFrame::Data { topic, payload } => self.deliver(topic, payload),
        }
    }

    fn validate(&self, raw: &str) -> Result<Value, ExchangeError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ExchangeError::ProtocolViolation(format!("Invalid JSON: {}", e)))?;

        let recognizable = value
            .as_object()
            .is_some_and(|map| FRAME_INDICATORS.iter().any(|key| map.contains_key(*key)));
        if recognizable {
            Ok(value)
        } else {
            Err(ExchangeError::ProtocolViolation(
                "Frame has no topic, op or success field".to_string(),
            ))
        }
    }

    fn deliver(&self, topic: Option<String>, payload: Value) -> DispatchOutcome {
        let Some(handler) = self.handler.get() else {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %self.channel, ?topic, "No handler registered, dropping frame");
            return DispatchOutcome::Dropped;
        };

        let frame = StreamFrame {
            channel: self.channel,
            topic,
            payload: VenueValue::from_json(payload),
        };
        let topic_for_log = frame.topic.clone();

        match catch_unwind(AssertUnwindSafe(|| handler.on_frame(frame))) {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(e)) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(channel = %self.channel, topic = ?topic_for_log, error = %e, "Handler failed");
                DispatchOutcome::HandlerFailed
            }
            Err(_) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(channel = %self.channel, topic = ?topic_for_log, "Handler panicked");
                DispatchOutcome::HandlerFailed
            }
        }
    }
}
