use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of observation a signal reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Cough,
    Fever,
    Respiratory,
    Wastewater,
    Pharmacy,
    Environmental,
    Acoustic,
    Other,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Cough => "cough",
            SignalType::Fever => "fever",
            SignalType::Respiratory => "respiratory",
            SignalType::Wastewater => "wastewater",
            SignalType::Pharmacy => "pharmacy",
            SignalType::Environmental => "environmental",
            SignalType::Acoustic => "acoustic",
            SignalType::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SignalType::Cough => "Cough",
            SignalType::Fever => "Fever",
            SignalType::Respiratory => "Respiratory",
            SignalType::Wastewater => "Wastewater",
            SignalType::Pharmacy => "Pharmacy",
            SignalType::Environmental => "Environmental",
            SignalType::Acoustic => "Acoustic",
            SignalType::Other => "Other",
        }
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cough" => Ok(SignalType::Cough),
            "fever" => Ok(SignalType::Fever),
            "respiratory" => Ok(SignalType::Respiratory),
            "wastewater" => Ok(SignalType::Wastewater),
            "pharmacy" => Ok(SignalType::Pharmacy),
            "environmental" => Ok(SignalType::Environmental),
            "acoustic" => Ok(SignalType::Acoustic),
            "other" => Ok(SignalType::Other),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity tier of a signal, and of an event's aggregate.
/// Ordering matters: Low < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Weight used by the aggregate severity score.
    pub fn weight(&self) -> i64 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event state machine: monitoring -> active -> resolved. Resolved is
/// terminal; a later signal at the same location key forms a brand-new event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Monitoring,
    Active,
    Resolved,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Monitoring => "monitoring",
            EventStatus::Active => "active",
            EventStatus::Resolved => "resolved",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, EventStatus::Monitoring | EventStatus::Active)
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monitoring" => Ok(EventStatus::Monitoring),
            "active" => Ok(EventStatus::Active),
            "resolved" => Ok(EventStatus::Resolved),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an issued alert. At most one active alert exists per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Superseded,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Superseded => "superseded",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(AlertStatus::Active),
            "superseded" => Ok(AlertStatus::Superseded),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single anonymized health observation. Immutable once written, except
/// for hard deletion through the admin boundary.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: Uuid,
    pub signal_type: SignalType,
    pub location: String,
    pub location_key: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub severity: Severity,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub event_id: Option<Uuid>,
}

/// A detected cluster of signals representing a potential outbreak.
/// severity and signal_count are derived from the current members and
/// recomputed on every attribution change, never set independently.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub location: String,
    pub location_key: String,
    pub event_type: SignalType,
    pub severity: Severity,
    pub status: EventStatus,
    pub signal_count: i64,
    pub description: String,
    pub first_signal_at: DateTime<Utc>,
    pub last_signal_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A snapshot of an event's state at a moment of escalation. The snapshot
/// fields are frozen at issuance; only a newer alert reflects newer state.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub event_id: Uuid,
    pub title: String,
    pub location: String,
    pub severity: Severity,
    pub event_status: EventStatus,
    pub status: AlertStatus,
    pub issued_at: DateTime<Utc>,
}
