//! Shared types for the tourguard core

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Newtype wrapper for tourist IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TouristId(pub String);

impl std::fmt::Display for TouristId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TouristId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Newtype wrapper for zone IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ZoneId(pub String);

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single recorded location fix. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch milliseconds
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: u64) -> Self {
        Self { latitude, longitude, timestamp_ms, accuracy_m: None }
    }
}

/// Latest wearable readings for a tourist
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    #[serde(default)]
    pub heart_rate: Option<f64>,
    #[serde(default)]
    pub battery_pct: Option<f64>,
    /// Epoch ms of the last successful device sync
    pub last_sync_ms: u64,
}

/// Safety status. Escalates automatically, de-escalates only on explicit ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouristStatus {
    Safe,
    AtRisk,
    Emergency,
}

impl TouristStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TouristStatus::Safe => "safe",
            TouristStatus::AtRisk => "at_risk",
            TouristStatus::Emergency => "emergency",
        }
    }
}

impl std::str::FromStr for TouristStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(TouristStatus::Safe),
            "at_risk" | "at-risk" => Ok(TouristStatus::AtRisk),
            "emergency" => Ok(TouristStatus::Emergency),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Tracked tourist state, mutated only by the monitor's event loop
#[derive(Debug, Clone)]
pub struct TouristState {
    pub id: TouristId,
    pub current_position: Option<Position>,
    /// Most recent fixes, oldest evicted at the retention bound
    pub history: VecDeque<Position>,
    retention: usize,
    /// Epoch ms of the most recent update of any kind
    pub last_activity_ms: u64,
    /// Planned itinerary as a raw JSON array of positions; parsed lazily by
    /// the route-deviation detector, absence disables that detector
    pub expected_route: Option<String>,
    pub vitals: Option<Vitals>,
    pub risk_score: f64,
    pub status: TouristStatus,
    /// Rolling 24h incident count, maintained by the incident collaborator
    pub incident_count_24h: u32,
    /// Epoch ms of first registration (account-age model feature)
    pub registered_at_ms: u64,
    pub family_tracking: bool,
}

impl TouristState {
    pub fn new(id: TouristId, retention: usize, now_ms: u64) -> Self {
        Self {
            id,
            current_position: None,
            history: VecDeque::with_capacity(retention),
            retention: retention.max(1),
            last_activity_ms: now_ms,
            expected_route: None,
            vitals: None,
            risk_score: 0.0,
            status: TouristStatus::Safe,
            incident_count_24h: 0,
            registered_at_ms: now_ms,
            family_tracking: false,
        }
    }

    /// Record a new fix: update the current position, append to history with
    /// ring-buffer eviction, and bump the activity timestamp.
    pub fn record_position(&mut self, position: Position) {
        if self.history.len() == self.retention {
            self.history.pop_front();
        }
        self.history.push_back(position);
        self.current_position = Some(position);
        self.last_activity_ms = self.last_activity_ms.max(position.timestamp_ms);
    }

    /// Last two fixes in chronological order, if available
    pub fn last_segment(&self) -> Option<(&Position, &Position)> {
        let len = self.history.len();
        if len < 2 {
            return None;
        }
        Some((&self.history[len - 2], &self.history[len - 1]))
    }
}

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

impl TimestampValue {
    /// Resolve to epoch ms, falling back to `now_ms` when absent or unparsable
    pub fn resolve(&self, now_ms: u64) -> u64 {
        match self {
            TimestampValue::None => now_ms,
            TimestampValue::EpochMs(ms) => *ms,
            TimestampValue::IsoString(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis().max(0) as u64)
                .unwrap_or(now_ms),
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(u64::try_from(value).unwrap_or(0)))
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Wire message from the ingestion collaborator (one JSON object per line)
#[derive(Debug, Deserialize)]
pub struct UpdateMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub ts: TimestampValue,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub vitals: Option<Vitals>,
    #[serde(default)]
    pub route: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
}

/// Parsed update for internal processing
#[derive(Debug, Clone)]
pub struct ParsedUpdate {
    pub kind: UpdateKind,
    pub tourist_id: TouristId,
    pub event_time_ms: u64,
    pub received_at: Instant,
}

/// Update kinds accepted from the ingestion collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    /// Location ping, optionally carrying wearable vitals
    Location { position: Position, vitals: Option<Vitals> },
    /// Explicit distress signal from the client
    Panic,
    /// External acknowledgment, the only de-escalation path
    Acknowledge(TouristStatus),
    /// Rolling 24h incident count pushed by the incident collaborator
    IncidentCount(u32),
    /// Planned itinerary replacement (raw JSON array of positions)
    Route(Option<String>),
    Unknown(String),
}

impl UpdateMessage {
    /// Convert a wire message into a `ParsedUpdate`, resolving the timestamp
    pub fn into_parsed(self, now_ms: u64) -> Option<ParsedUpdate> {
        let event_time_ms = self.ts.resolve(now_ms);
        let tourist_id = TouristId::new(self.id);

        let kind = match self.kind.as_str() {
            "location" => {
                let (lat, lon) = (self.lat?, self.lon?);
                let mut position = Position::new(lat, lon, event_time_ms);
                position.accuracy_m = self.accuracy_m;
                UpdateKind::Location { position, vitals: self.vitals }
            }
            "panic" => UpdateKind::Panic,
            "ack" => {
                let status = self.status.as_deref().unwrap_or("safe").parse().ok()?;
                UpdateKind::Acknowledge(status)
            }
            "incidents" => UpdateKind::IncidentCount(self.count.unwrap_or(0)),
            "route" => UpdateKind::Route(self.route.map(|v| v.to_string())),
            other => UpdateKind::Unknown(other.to_string()),
        };

        Some(ParsedUpdate { kind, tourist_id, event_time_ms, received_at: Instant::now() })
    }
}
