//! Realtime wire protocol.
//!
//! Frames are JSON text of the shape `{"event": <name>, "data": <payload>}`.
//! Inbound frames carry charger domain events; outbound frames carry
//! subscribe/unsubscribe commands keyed by charger id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `charger:statusUpdate` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerStatus {
    pub charger_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Payload shared by the `transaction:*` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub charger_id: String,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_value: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// `meterValues` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValues {
    pub charger_id: String,
    pub transaction_id: String,
    pub meter_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Inbound domain events. Socket lifecycle (`connect`, `disconnect`,
/// `connect_error`) is not framed; it surfaces as transport lifecycle and
/// connection-state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "charger:statusUpdate")]
    ChargerStatusUpdate(ChargerStatus),
    #[serde(rename = "transaction:started")]
    TransactionStarted(TransactionEvent),
    #[serde(rename = "transaction:updated")]
    TransactionUpdated(TransactionEvent),
    #[serde(rename = "transaction:stopped")]
    TransactionStopped(TransactionEvent),
    #[serde(rename = "meterValues")]
    MeterValues(MeterValues),
}

impl ServerEvent {
    /// The charger (topic) this event belongs to.
    pub fn charger_id(&self) -> &str {
        match self {
            ServerEvent::ChargerStatusUpdate(e) => &e.charger_id,
            ServerEvent::TransactionStarted(e)
            | ServerEvent::TransactionUpdated(e)
            | ServerEvent::TransactionStopped(e) => &e.charger_id,
            ServerEvent::MeterValues(e) => &e.charger_id,
        }
    }

    /// Server-side timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ServerEvent::ChargerStatusUpdate(e) => e.timestamp,
            ServerEvent::TransactionStarted(e)
            | ServerEvent::TransactionUpdated(e)
            | ServerEvent::TransactionStopped(e) => e.timestamp,
            ServerEvent::MeterValues(e) => e.timestamp,
        }
    }
}

/// Outbound subscription commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "subscribe:charger", rename_all = "camelCase")]
    SubscribeCharger { charger_id: String },
    #[serde(rename = "unsubscribe:charger", rename_all = "camelCase")]
    UnsubscribeCharger { charger_id: String },
}

impl ClientCommand {
    pub fn subscribe(charger_id: &str) -> Self {
        ClientCommand::SubscribeCharger {
            charger_id: charger_id.to_string(),
        }
    }

    pub fn unsubscribe(charger_id: &str) -> Self {
        ClientCommand::UnsubscribeCharger {
            charger_id: charger_id.to_string(),
        }
    }
}
