use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::cluster;
use crate::error::IngestError;
use crate::models::{Severity, Signal, SignalType};

/// A raw signal submission as it arrives over the ingest boundary.
/// Timestamps are never accepted from the client; `created_at` is
/// assigned here to avoid clock-skew games.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSignal {
    pub signal_type: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub severity: Option<String>,
    pub notes: Option<String>,
}

/// Validates and normalizes a submission into a persistable Signal.
/// Pure apart from id/timestamp assignment; the single append-only
/// write happens later inside the attribution transaction.
pub fn validate(raw: &RawSignal) -> Result<Signal, IngestError> {
    let signal_type: SignalType = raw
        .signal_type
        .parse()
        .map_err(IngestError::InvalidSignalType)?;

    let location = raw.location.trim();
    if location.is_empty() {
        return Err(IngestError::MissingLocation);
    }

    let (latitude, longitude) = validate_coordinates(raw.latitude, raw.longitude)?;

    let severity = match raw.severity.as_deref().map(str::trim) {
        None | Some("") => Severity::Medium,
        Some(value) => value
            .parse()
            .map_err(IngestError::InvalidSeverity)?,
    };

    let notes = raw
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    Ok(Signal {
        id: Uuid::new_v4(),
        signal_type,
        location: location.to_string(),
        location_key: cluster::location_key(location),
        latitude,
        longitude,
        severity,
        notes,
        created_at: Utc::now(),
        event_id: None,
    })
}

fn validate_coordinates(
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<(Option<f64>, Option<f64>), IngestError> {
    match (latitude, longitude) {
        (None, None) => Ok((None, None)),
        (Some(lat), Some(lon)) => {
            if !lat.is_finite() || !lon.is_finite() {
                return Err(IngestError::InvalidCoordinates(
                    "latitude and longitude must be finite".to_string(),
                ));
            }
            if !(-90.0..=90.0).contains(&lat) {
                return Err(IngestError::InvalidCoordinates(format!(
                    "latitude {lat} outside [-90, 90]"
                )));
            }
            if !(-180.0..=180.0).contains(&lon) {
                return Err(IngestError::InvalidCoordinates(format!(
                    "longitude {lon} outside [-180, 180]"
                )));
            }
            Ok((Some(lat), Some(lon)))
        }
        _ => Err(IngestError::InvalidCoordinates(
            "latitude and longitude must be provided together".to_string(),
        )),
    }
}
