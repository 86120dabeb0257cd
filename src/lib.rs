pub mod core;
pub mod exchanges;

pub use core::config::{ConnectorConfig, Credentials, ExchangeConfig};
pub use core::kernel::MessageHandler;
pub use core::session::StreamSession;
pub use core::{errors::ExchangeError, types::*};
pub use exchanges::bybit::BybitConnector;
