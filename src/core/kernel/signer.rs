use crate::core::config::Credentials;
use crate::core::errors::ExchangeError;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

/// Literal prefix of the WebSocket auth message
pub const WS_AUTH_PREFIX: &str = "GET/realtime";

/// Headers to attach to a signed request
pub type SignedHeaders = HashMap<String, String>;

/// Signer trait for request authentication
///
/// Implementations turn a request's canonical parts into the headers the
/// venue expects, and sign the WebSocket auth handshake.
pub trait Signer: Send + Sync {
    /// Sign a REST request.
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, ...)
    /// * `payload` - canonical query string (GET) or exact JSON body (POST)
    /// * `timestamp` - request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        payload: &str,
        timestamp: u64,
    ) -> Result<SignedHeaders, ExchangeError>;

    /// Identity headers sent on every request, signed or not
    fn request_headers(&self, timestamp: u64) -> SignedHeaders;

    /// Signature for the WebSocket auth frame expiring at `expires` (ms since epoch)
    fn sign_ws_auth(&self, expires: u64) -> Result<String, ExchangeError>;

    fn api_key(&self) -> &str;
}

/// Hex-encoded HMAC-SHA256 of `message` under `secret`.
///
/// Pure: identical inputs always give identical output.
pub fn sign(secret: &[u8], message: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ExchangeError::AuthenticationFault(format!("Invalid secret key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// URL-encoded query string with keys in ascending order.
///
/// Non-string JSON values are rendered with their JSON text (`5`, `true`).
pub fn canonical_query(params: &Value) -> String {
    let Value::Object(map) = params else {
        return String::new();
    };

    let mut pairs: Vec<(&String, String)> = map
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, param_to_string(v)))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, &value);
    }
    serializer.finish()
}

pub fn param_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// HMAC-SHA256 signer for the Bybit V5 header scheme
pub struct HmacSigner {
    credentials: Credentials,
    recv_window_ms: u64,
}

impl HmacSigner {
    /// Create a new HMAC signer
    ///
    /// # Arguments
    /// * `credentials` - API key and secret
    /// * `recv_window_ms` - receive window sent with, and covered by, each signature
    pub fn new(credentials: Credentials, recv_window_ms: u64) -> Self {
        Self {
            credentials,
            recv_window_ms,
        }
    }

    /// `timestamp + api_key + recv_window + payload`
    pub fn rest_message(&self, payload: &str, timestamp: u64) -> String {
        format!(
            "{}{}{}{}",
            timestamp,
            self.credentials.api_key(),
            self.recv_window_ms,
            payload
        )
    }
}

impl Signer for HmacSigner {
    fn sign_request(
        &self,
        _method: &str,
        payload: &str,
        timestamp: u64,
    ) -> Result<SignedHeaders, ExchangeError> {
        let message = self.rest_message(payload, timestamp);
        let signature = sign(self.credentials.secret_key().as_bytes(), &message)?;

        let mut headers = self.request_headers(timestamp);
        headers.insert("X-BAPI-SIGN".to_string(), signature);
        Ok(headers)
    }

    fn request_headers(&self, timestamp: u64) -> SignedHeaders {
        let mut headers = HashMap::new();
        headers.insert(
            "X-BAPI-API-KEY".to_string(),
            self.credentials.api_key().to_string(),
        );
        headers.insert("X-BAPI-TIMESTAMP".to_string(), timestamp.to_string());
        headers.insert(
            "X-BAPI-RECV-WINDOW".to_string(),
            self.recv_window_ms.to_string(),
        );
        headers
    }

    fn sign_ws_auth(&self, expires: u64) -> Result<String, ExchangeError> {
        sign(
            self.credentials.secret_key().as_bytes(),
            &format!("{}{}", WS_AUTH_PREFIX, expires),
        )
    }

    fn api_key(&self) -> &str {
        self.credentials.api_key()
    }
}
