pub mod builder;
pub mod codec;
pub mod connector;
pub mod rest;
pub mod types;

// Re-export main types for easier importing
pub use builder::{build_connector, BybitBuilder};
pub use codec::BybitCodec;
pub use connector::BybitConnector;
pub use rest::BybitRestClient;
pub use types::{topics, BybitCategory, BybitOrderRequest, BybitOrderType, BybitSide, BybitTimeInForce};
