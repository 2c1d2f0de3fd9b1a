use chrono::Utc;
use uuid::Uuid;

use crate::models::{Alert, AlertStatus, Event, EventStatus};

/// What the deriver decided for an event that just finished evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertAction {
    /// No active alert covers the event; issue a fresh snapshot.
    Issue,
    /// The active alert's severity no longer matches the event; mark it
    /// superseded and issue a replacement snapshot.
    Supersede { prior: Uuid },
    /// Nothing changed; stay quiet.
    None,
}

/// Decides whether an event's current state warrants a new public alert.
///
/// Only events in the active state can produce alerts; de-escalation and
/// resolution propagate to existing alert rows instead of creating new
/// ones. Calling this repeatedly on an unchanged event yields
/// `AlertAction::None`.
pub fn derive(event: &Event, active_alert: Option<&Alert>) -> AlertAction {
    if event.status != EventStatus::Active {
        return AlertAction::None;
    }
    match active_alert {
        None => AlertAction::Issue,
        Some(alert) if alert.severity != event.severity => {
            AlertAction::Supersede { prior: alert.id }
        }
        Some(_) => AlertAction::None,
    }
}

/// Freezes the event's current attributes into a new active alert. The
/// snapshot is never retroactively updated when the event moves on.
pub fn snapshot(event: &Event) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        event_id: event.id,
        title: event.title.clone(),
        location: event.location.clone(),
        severity: event.severity,
        event_status: event.status,
        status: AlertStatus::Active,
        issued_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, SignalType};
    use chrono::{TimeZone, Utc};

    fn active_event(severity: Severity) -> Event {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Event {
            id: Uuid::new_v4(),
            title: "Cough cluster in mumbai".to_string(),
            location: "mumbai".to_string(),
            location_key: "mumbai".to_string(),
            event_type: SignalType::Cough,
            severity,
            status: EventStatus::Active,
            signal_count: 6,
            description: String::new(),
            first_signal_at: now,
            last_signal_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn issues_on_first_activation() {
        let event = active_event(Severity::Medium);
        assert_eq!(derive(&event, None), AlertAction::Issue);
    }

    #[test]
    fn repeated_derivation_without_change_is_silent() {
        let event = active_event(Severity::Medium);
        let alert = snapshot(&event);
        assert_eq!(derive(&event, Some(&alert)), AlertAction::None);
        assert_eq!(derive(&event, Some(&alert)), AlertAction::None);
    }

    #[test]
    fn severity_change_supersedes_the_prior_alert() {
        let mut event = active_event(Severity::Medium);
        let alert = snapshot(&event);
        event.severity = Severity::High;
        assert_eq!(
            derive(&event, Some(&alert)),
            AlertAction::Supersede { prior: alert.id }
        );
    }

    #[test]
    fn non_active_events_never_alert() {
        let mut event = active_event(Severity::High);
        event.status = EventStatus::Monitoring;
        assert_eq!(derive(&event, None), AlertAction::None);

        event.status = EventStatus::Resolved;
        assert_eq!(derive(&event, None), AlertAction::None);
    }

    #[test]
    fn five_cough_signals_escalate_and_issue_one_medium_alert() {
        use crate::lifecycle;
        use crate::models::Signal;
        use chrono::Duration;

        let base = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let severities = [
            Severity::High,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Low,
        ];
        // Five cough signals at one location inside a two-hour span.
        let members: Vec<Signal> = severities
            .iter()
            .enumerate()
            .map(|(i, severity)| Signal {
                id: Uuid::new_v4(),
                signal_type: SignalType::Cough,
                location: "Mumbai, Andheri West".to_string(),
                location_key: "mumbai".to_string(),
                latitude: None,
                longitude: None,
                severity: *severity,
                notes: None,
                created_at: base + Duration::minutes(i as i64 * 20),
                event_id: None,
            })
            .collect();

        let eval = lifecycle::evaluate(&members).unwrap();
        assert_eq!(eval.signal_count, 5);
        assert!((eval.score - 2.0).abs() < 1e-9);
        assert_eq!(eval.severity, Severity::Medium);
        assert_eq!(eval.event_type, SignalType::Cough);

        let status = lifecycle::next_status(EventStatus::Monitoring, &eval, 5);
        assert_eq!(status, EventStatus::Active);

        let mut event = active_event(eval.severity);
        event.status = status;
        event.signal_count = eval.signal_count;

        assert_eq!(derive(&event, None), AlertAction::Issue);
        let issued = snapshot(&event);
        assert_eq!(issued.severity, Severity::Medium);

        // The standing alert keeps further derivation quiet.
        assert_eq!(derive(&event, Some(&issued)), AlertAction::None);
    }

    #[test]
    fn snapshot_freezes_event_attributes() {
        let event = active_event(Severity::High);
        let alert = snapshot(&event);
        assert_eq!(alert.event_id, event.id);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.event_status, EventStatus::Active);
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.title, event.title);
    }
}
