use chrono::Duration;
use uuid::Uuid;

use crate::models::{Event, Signal};

/// Coarse grouping key for clustering: the leading comma-delimited
/// segment of the location, trimmed and lowercased. "Mumbai, Andheri
/// West" and "mumbai , Bandra" share the key "mumbai".
pub fn location_key(location: &str) -> String {
    location
        .split(',')
        .next()
        .unwrap_or(location)
        .trim()
        .to_lowercase()
}

/// What the clusterer decided to do with a newly ingested signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    /// Attach the signal to an existing open event. Any other open events
    /// at the same key are merged into it.
    Attach { event_id: Uuid, absorb: Vec<Uuid> },
    /// A new cluster crossed the formation threshold; create an event
    /// over exactly these signals (the new one included).
    Form { member_ids: Vec<Uuid> },
    /// Below threshold and no open event in reach; the signal stays
    /// unattributed until a later ingest re-evaluates the window.
    Standalone,
}

/// Decides attribution for a freshly inserted signal.
///
/// `open_events` are the open (monitoring/active) events at the signal's
/// location key; `unattributed` are the key's signals with no event,
/// including the new signal itself. Membership is recomputed from these
/// rows on every call, never cached.
pub fn decide(
    open_events: &[Event],
    unattributed: &[Signal],
    new_signal: &Signal,
    window: Duration,
    formation_threshold: i64,
) -> Attribution {
    let mut events: Vec<&Event> = open_events.iter().collect();
    events.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    // Most recently updated event whose member span the new signal
    // extends (inclusive window boundary); the rest merge into it.
    if let Some(target) = events
        .iter()
        .find(|ev| new_signal.created_at - ev.last_signal_at <= window)
    {
        let absorb = events
            .iter()
            .filter(|ev| ev.id != target.id)
            .map(|ev| ev.id)
            .collect();
        return Attribution::Attach {
            event_id: target.id,
            absorb,
        };
    }

    let chain = chain_containing(unattributed, new_signal.id, window);
    if chain.len() as i64 >= formation_threshold {
        Attribution::Form { member_ids: chain }
    } else {
        Attribution::Standalone
    }
}

/// Transitive sliding-window chain: sort by created_at and extend in both
/// directions from the anchor while consecutive gaps stay within the
/// window, boundary inclusive to the second.
pub fn chain_containing(signals: &[Signal], anchor: Uuid, window: Duration) -> Vec<Uuid> {
    let mut ordered: Vec<&Signal> = signals.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let Some(anchor_idx) = ordered.iter().position(|s| s.id == anchor) else {
        return Vec::new();
    };

    let mut start = anchor_idx;
    while start > 0 {
        let gap = ordered[start].created_at - ordered[start - 1].created_at;
        if gap > window {
            break;
        }
        start -= 1;
    }

    let mut end = anchor_idx;
    while end + 1 < ordered.len() {
        let gap = ordered[end + 1].created_at - ordered[end].created_at;
        if gap > window {
            break;
        }
        end += 1;
    }

    ordered[start..=end].iter().map(|s| s.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventStatus, Severity, SignalType};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hours: i64, seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
            + Duration::hours(hours)
            + Duration::seconds(seconds)
    }

    fn signal(created_at: DateTime<Utc>) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            signal_type: SignalType::Cough,
            location: "Mumbai, Andheri West".to_string(),
            location_key: "mumbai".to_string(),
            latitude: None,
            longitude: None,
            severity: Severity::Medium,
            notes: None,
            created_at,
            event_id: None,
        }
    }

    fn event(updated_at: DateTime<Utc>, last_signal_at: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::new_v4(),
            title: "Cough cluster in mumbai".to_string(),
            location: "mumbai".to_string(),
            location_key: "mumbai".to_string(),
            event_type: SignalType::Cough,
            severity: Severity::Medium,
            status: EventStatus::Monitoring,
            signal_count: 5,
            description: String::new(),
            first_signal_at: last_signal_at - Duration::hours(2),
            last_signal_at,
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn location_key_takes_leading_segment_lowercased() {
        assert_eq!(location_key("Mumbai, Andheri West"), "mumbai");
        assert_eq!(location_key("  Pune "), "pune");
        assert_eq!(location_key("Delhi"), "delhi");
        assert_eq!(location_key("NAGPUR , Central"), "nagpur");
    }

    #[test]
    fn chain_is_inclusive_at_exactly_the_window_boundary() {
        let window = Duration::hours(24);
        let first = signal(at(0, 0));
        let boundary = signal(at(24, 0));
        let signals = vec![first.clone(), boundary.clone()];

        let chain = chain_containing(&signals, boundary.id, window);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn chain_excludes_one_second_past_the_window() {
        let window = Duration::hours(24);
        let first = signal(at(0, 0));
        let late = signal(at(24, 1));
        let signals = vec![first.clone(), late.clone()];

        let chain = chain_containing(&signals, late.id, window);
        assert_eq!(chain, vec![late.id]);
    }

    #[test]
    fn chain_extends_transitively_through_intermediate_signals() {
        // 0h, 20h, 40h: the 40h signal is >24h from the first but chains
        // through the 20h one.
        let window = Duration::hours(24);
        let a = signal(at(0, 0));
        let b = signal(at(20, 0));
        let c = signal(at(40, 0));
        let signals = vec![a.clone(), b.clone(), c.clone()];

        let chain = chain_containing(&signals, c.id, window);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn forms_event_at_exactly_the_threshold() {
        let window = Duration::hours(24);
        let signals: Vec<Signal> = (0..5).map(|i| signal(at(0, i * 60))).collect();
        let newest = signals.last().unwrap().clone();

        let decision = decide(&[], &signals, &newest, window, 5);
        match decision {
            Attribution::Form { member_ids } => assert_eq!(member_ids.len(), 5),
            other => panic!("expected Form, got {other:?}"),
        }
    }

    #[test]
    fn stays_standalone_below_the_threshold() {
        let window = Duration::hours(24);
        let signals: Vec<Signal> = (0..4).map(|i| signal(at(0, i * 60))).collect();
        let newest = signals.last().unwrap().clone();

        let decision = decide(&[], &signals, &newest, window, 5);
        assert_eq!(decision, Attribution::Standalone);
    }

    #[test]
    fn attaches_to_open_event_within_window_of_its_last_signal() {
        let window = Duration::hours(24);
        let ev = event(at(1, 0), at(1, 0));
        let new = signal(at(20, 0));

        let decision = decide(&[ev.clone()], &[new.clone()], &new, window, 5);
        assert_eq!(
            decision,
            Attribution::Attach {
                event_id: ev.id,
                absorb: vec![]
            }
        );
    }

    #[test]
    fn does_not_attach_past_the_event_window() {
        let window = Duration::hours(24);
        let ev = event(at(0, 0), at(0, 0));
        let new = signal(at(24, 1));

        let decision = decide(&[ev], &[new.clone()], &new, window, 5);
        assert_eq!(decision, Attribution::Standalone);
    }

    #[test]
    fn prefers_most_recently_updated_event_and_absorbs_the_rest() {
        let window = Duration::hours(24);
        let older = event(at(1, 0), at(1, 0));
        let newer = event(at(5, 0), at(5, 0));
        let new = signal(at(6, 0));

        let decision = decide(
            &[older.clone(), newer.clone()],
            &[new.clone()],
            &new,
            window,
            5,
        );
        assert_eq!(
            decision,
            Attribution::Attach {
                event_id: newer.id,
                absorb: vec![older.id]
            }
        );
    }
}
