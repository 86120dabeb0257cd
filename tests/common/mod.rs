#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::filter::LevelFilter;
use venuelink::core::config::{ConnectorConfig, Credentials};
use venuelink::core::kernel::{
    HmacSigner, HttpRequest, HttpResponse, HttpTransport, Signer, WsConnector, WsStream,
};
use venuelink::ExchangeError;

pub const API_KEY: &str = "test_api_key";
pub const SECRET_KEY: &str = "test_secret_key";

/// Route session and executor logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn credentials() -> Credentials {
    Credentials::new(API_KEY.to_string(), SECRET_KEY.to_string())
}

pub fn signer() -> Arc<dyn Signer> {
    Arc::new(HmacSigner::new(credentials(), 5000))
}

/// Default tunables pointed at in-process fakes
pub fn test_config() -> ConnectorConfig {
    ConnectorConfig::default()
        .with_rest_base_url("https://api.test")
        .with_ws_urls("wss://stream.test/public", "wss://stream.test/private")
}

pub fn respond(status: u16, body: &str) -> Result<HttpResponse, ExchangeError> {
    Ok(HttpResponse {
        status,
        body: body.to_string(),
    })
}

pub fn ok_envelope(result: &str) -> Result<HttpResponse, ExchangeError> {
    respond(
        200,
        &format!(
            r#"{{"retCode":0,"retMsg":"OK","result":{},"retExtInfo":{{}},"time":1700000000000}}"#,
            result
        ),
    )
}

/// Replays canned responses in order and records every request
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, ExchangeError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<HttpResponse, ExchangeError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| respond(500, "script exhausted"))
    }
}

/// The venue's end of one accepted mock connection
pub struct ServerSide {
    pub url: String,
    pub sent: mpsc::UnboundedReceiver<Message>,
    pub inbound: mpsc::UnboundedSender<Result<Message, ExchangeError>>,
}

impl ServerSide {
    pub async fn next_message(&mut self) -> Message {
        self.sent
            .recv()
            .await
            .expect("session closed the connection")
    }

    pub async fn next_frame(&mut self) -> Value {
        match self.next_message().await {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected a text frame, got {:?}", other),
        }
    }

    /// Next frame that is not a heartbeat
    pub async fn next_command(&mut self) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["op"] != "ping" && frame["op"] != "pong" {
                return frame;
            }
        }
    }

    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, raw: &str) {
        self.inbound
            .send(Ok(Message::Text(raw.to_string())))
            .unwrap();
    }

    pub fn push_message(&self, message: Message) {
        self.inbound.send(Ok(message)).unwrap();
    }

    pub fn fail(&self, error: ExchangeError) {
        self.inbound.send(Err(error)).unwrap();
    }
}

pub struct MockStream {
    sent: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<Result<Message, ExchangeError>>,
}

#[async_trait]
impl WsStream for MockStream {
    async fn send(&mut self, msg: Message) -> Result<(), ExchangeError> {
        self.sent
            .send(msg)
            .map_err(|_| ExchangeError::NetworkError("peer gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Message, ExchangeError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        Ok(())
    }
}

/// Hands the server side of every successful connect to the test
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerSide>,
    refusals: AtomicU32,
    attempts: Arc<AtomicU32>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        Self::refusing(0)
    }

    /// Refuse the first `refusals` connection attempts
    pub fn refusing(refusals: u32) -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            refusals: AtomicU32::new(refusals),
            attempts: Arc::new(AtomicU32::new(0)),
        };
        (connector, rx)
    }

    pub fn attempts(&self) -> Arc<AtomicU32> {
        self.attempts.clone()
    }
}

#[async_trait]
impl WsConnector for MockConnector {
    type Stream = MockStream;

    async fn connect(&self, url: &str) -> Result<Self::Stream, ExchangeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ExchangeError::NetworkError("connection refused".to_string()));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerSide {
            url: url.to_string(),
            sent: sent_rx,
            inbound: inbound_tx,
        });
        Ok(MockStream {
            sent: sent_tx,
            inbound: inbound_rx,
        })
    }
}

/// Upper bound for waits that should resolve on their own
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(600);
