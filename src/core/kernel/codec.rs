use crate::core::errors::ExchangeError;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// Inbound frame after venue-specific classification
#[derive(Debug, Clone, PartialEq)]
pub enum VenueFrame {
    /// Reply to our heartbeat ping
    Pong,
    /// Venue-initiated heartbeat that expects a pong back
    Ping,
    /// Outcome of the auth handshake
    AuthAck { success: bool, message: String },
    /// Acknowledgment of subscribe/unsubscribe or any other command
    CommandAck {
        op: String,
        success: bool,
        message: String,
    },
    /// Application data for the caller's handler
    Data {
        topic: Option<String>,
        payload: Value,
    },
}

/// Codec trait for venue-specific WebSocket message encoding/decoding
///
/// The session owns transport and lifecycle; the codec only knows what the
/// venue's frames look like on the wire.
pub trait WsCodec: Send + Sync + 'static {
    /// Encode a subscription request into a WebSocket message
    fn encode_subscription(
        &self,
        topics: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError>;

    /// Encode an unsubscription request into a WebSocket message
    fn encode_unsubscription(
        &self,
        topics: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError>;

    /// Application-level heartbeat
    fn encode_ping(&self) -> Result<Message, ExchangeError>;

    /// Reply to a venue-initiated application-level ping
    fn encode_pong(&self) -> Result<Message, ExchangeError>;

    /// Auth frame for private channels
    ///
    /// # Arguments
    /// * `api_key` - API key
    /// * `expires` - expiry in milliseconds since epoch, covered by the signature
    /// * `signature` - hex signature of the auth message
    fn encode_auth(
        &self,
        api_key: &str,
        expires: u64,
        signature: &str,
    ) -> Result<Message, ExchangeError>;

    /// Classify a parsed, already-validated JSON frame
    ///
    /// # Returns
    /// - `Ok(frame)` - the classified frame
    /// - `Err(ProtocolViolation)` - the frame does not match the venue's formats
    fn decode_frame(&self, frame: Value) -> Result<VenueFrame, ExchangeError>;
}
