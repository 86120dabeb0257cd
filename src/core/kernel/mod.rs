//! Venue-agnostic transport kernel.
//!
//! REST: [`RestExecutor`] signs, rate limits and retries requests through a
//! pluggable [`HttpTransport`].
//!
//! WebSocket: a [`WebSocketSession`] owns one channel's socket, driven by a
//! [`ReconnectionSupervisor`]; inbound frames go through the
//! [`MessageDispatcher`] to the caller's [`MessageHandler`]. Venue wire
//! formats live behind [`WsCodec`] and [`Signer`].
//!
//! ```rust,no_run
//! use venuelink::core::config::{ConnectorConfig, Credentials};
//! use venuelink::core::kernel::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), venuelink::ExchangeError> {
//! let config = ConnectorConfig::default();
//! let signer = Arc::new(HmacSigner::new(
//!     Credentials::new("key".to_string(), "secret".to_string()),
//!     config.recv_window_ms,
//! ));
//! let rest = RestClientBuilder::new(RestClientConfig::from_connector(&config))
//!     .with_signer(signer)
//!     .build()?;
//!
//! let envelope = rest
//!     .get("/v5/account/wallet-balance", &json!({"accountType": "UNIFIED"}), true)
//!     .await?;
//! println!("{:?}", envelope.get("result"));
//! # Ok(())
//! # }
//! ```
pub mod backoff;
pub mod codec;
pub mod dispatcher;
pub mod rate_limit;
pub mod rest;
pub mod signer;
pub mod supervisor;
pub mod ws;

pub use backoff::BackoffPolicy;
pub use codec::{VenueFrame, WsCodec};
pub use dispatcher::{ChannelStats, DispatchOutcome, HandlerSlot, MessageDispatcher, MessageHandler};
pub use rate_limit::RateLimiter;
pub use rest::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RestClient, RestClientBuilder,
    RestClientConfig, RestExecutor, RestStats,
};
pub use signer::{HmacSigner, SignedHeaders, Signer};
pub use supervisor::ReconnectionSupervisor;
pub use ws::{
    ConnectionState, SessionCommand, SessionConfig, SessionExit, SessionLinks, SubscriptionSet,
    TungsteniteConnector, TungsteniteStream, WebSocketSession, WsConnector, WsStream,
};
