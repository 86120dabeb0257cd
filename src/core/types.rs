use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// JSON tree in which every number, and every string holding a plain decimal
/// literal, is an exact `Decimal`.
///
/// Venue payloads quote prices and sizes as strings ("27150.50"); keeping them
/// out of binary floating point is the whole point of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VenueValue {
    Null,
    Bool(bool),
    Number(Decimal),
    Text(String),
    List(Vec<VenueValue>),
    Map(BTreeMap<String, VenueValue>),
}

impl VenueValue {
    /// Normalize a parsed JSON value
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                let repr = n.to_string();
                Decimal::from_str(&repr)
                    .or_else(|_| Decimal::from_scientific(&repr))
                    .map_or(Self::Text(repr), Self::Number)
            }
            Value::String(s) => {
                if is_plain_decimal(&s) {
                    Decimal::from_str(&s).map_or(Self::Text(s), Self::Number)
                } else {
                    Self::Text(s)
                }
            }
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn index(&self, idx: usize) -> Option<&Self> {
        match self {
            Self::List(items) => items.get(idx),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Number(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_decimal().and_then(|d| d.to_i64())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<Value> for VenueValue {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

/// `-?digits(.digits)?`; anything else (ids, symbols, empty strings) stays text
fn is_plain_decimal(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

    all_digits(int_part) && frac_part.map_or(true, all_digits)
}

/// Logical WebSocket stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Public,
    Private,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::Public, Self::Private];

    pub fn is_private(self) -> bool {
        matches!(self, Self::Private)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one channel's socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Subscribed,
    ShuttingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Subscribed => "subscribed",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// One application frame delivered to a caller's handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub channel: Channel,
    pub topic: Option<String>,
    pub payload: VenueValue,
}

impl StreamFrame {
    pub fn data(&self) -> Option<&VenueValue> {
        self.payload.get("data")
    }
}

/// Point-in-time counters for one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub handler_failures: u64,
    pub reconnects: u64,
}
