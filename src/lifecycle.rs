use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::{EventStatus, Severity, Signal, SignalType};

/// Derived state of an event, recomputed from its current members on
/// every attribution change. Nothing here is ever stored as independent
/// truth; the rows cache it for querying only.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub signal_count: i64,
    pub score: f64,
    pub severity: Severity,
    pub event_type: SignalType,
    pub any_high: bool,
    pub first_signal_at: DateTime<Utc>,
    pub last_signal_at: DateTime<Utc>,
}

/// Evaluates an event's member signals. Returns None for an empty member
/// set, since an event exists only while it has at least one signal.
pub fn evaluate(members: &[Signal]) -> Option<Evaluation> {
    let first = members.iter().map(|s| s.created_at).min()?;
    let last = members.iter().map(|s| s.created_at).max()?;

    let signal_count = members.len() as i64;
    let weight_sum: i64 = members.iter().map(|s| s.severity.weight()).sum();
    let score = weight_sum as f64 / signal_count as f64;

    Some(Evaluation {
        signal_count,
        score,
        severity: severity_for_score(score),
        event_type: dominant_type(members),
        any_high: members.iter().any(|s| s.severity == Severity::High),
        first_signal_at: first,
        last_signal_at: last,
    })
}

/// Weighted-average severity mapping: score >= 2.5 is high, >= 1.5 is
/// medium, anything lower is low.
pub fn severity_for_score(score: f64) -> Severity {
    if score >= 2.5 {
        Severity::High
    } else if score >= 1.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Most represented signal type among the members; ties break toward the
/// lexicographically smaller name so the result is deterministic.
fn dominant_type(members: &[Signal]) -> SignalType {
    let mut counts: HashMap<SignalType, usize> = HashMap::new();
    for member in members {
        *counts.entry(member.signal_type).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_ty, a_n), (b_ty, b_n)| a_n.cmp(b_n).then(b_ty.as_str().cmp(a_ty.as_str())))
        .map(|(ty, _)| ty)
        .unwrap_or(SignalType::Other)
}

/// Request-triggered transitions. Resolution is deliberately absent here:
/// only the periodic sweep may resolve, and resolved is terminal.
pub fn next_status(current: EventStatus, eval: &Evaluation, formation_threshold: i64) -> EventStatus {
    match current {
        EventStatus::Monitoring => {
            let escalate = eval.signal_count >= formation_threshold
                && (eval.severity >= Severity::Medium || eval.any_high);
            if escalate {
                EventStatus::Active
            } else {
                EventStatus::Monitoring
            }
        }
        EventStatus::Active => {
            let degraded =
                eval.severity < Severity::Medium && eval.signal_count >= formation_threshold;
            if degraded {
                EventStatus::Monitoring
            } else {
                EventStatus::Active
            }
        }
        EventStatus::Resolved => EventStatus::Resolved,
    }
}

/// Sweep-side resolution check: the event has seen no signal within the
/// cool-down AND its in-window member count has decayed below the
/// formation threshold. Evaluated at commit time under the event's lock.
pub fn resolution_due(
    now: DateTime<Utc>,
    last_signal_at: DateTime<Utc>,
    in_window_count: i64,
    cooldown: Duration,
    formation_threshold: i64,
) -> bool {
    now - last_signal_at > cooldown && in_window_count < formation_threshold
}

pub fn title(event_type: SignalType, location: &str) -> String {
    format!("{} cluster in {}", event_type.label(), location)
}

pub fn description(eval: &Evaluation, location: &str) -> String {
    format!(
        "{} {} signals reported around {} between {} and {}; aggregate severity {}.",
        eval.signal_count,
        eval.event_type,
        location,
        eval.first_signal_at.format("%Y-%m-%d %H:%M UTC"),
        eval.last_signal_at.format("%Y-%m-%d %H:%M UTC"),
        eval.severity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn member(severity: Severity, signal_type: SignalType, minutes: i64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            signal_type,
            location: "Mumbai, Andheri West".to_string(),
            location_key: "mumbai".to_string(),
            latitude: None,
            longitude: None,
            severity,
            notes: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
            event_id: None,
        }
    }

    fn members(severities: &[Severity]) -> Vec<Signal> {
        severities
            .iter()
            .enumerate()
            .map(|(i, s)| member(*s, SignalType::Cough, i as i64))
            .collect()
    }

    #[test]
    fn score_is_a_pure_function_of_member_severities() {
        use Severity::*;
        // 2 high + 1 medium + 2 low: (6 + 2 + 2) / 5 = 2.0
        let eval = evaluate(&members(&[High, High, Medium, Low, Low])).unwrap();
        assert!((eval.score - 2.0).abs() < 1e-9);

        // 2 high + 2 medium + 1 low: (6 + 4 + 1) / 5 = 2.2 -> medium
        let eval = evaluate(&members(&[High, High, Medium, Medium, Low])).unwrap();
        assert!((eval.score - 2.2).abs() < 1e-9);
        assert_eq!(eval.severity, Severity::Medium);
    }

    #[test]
    fn severity_tier_boundaries() {
        assert_eq!(severity_for_score(2.5), Severity::High);
        assert_eq!(severity_for_score(2.49), Severity::Medium);
        assert_eq!(severity_for_score(1.5), Severity::Medium);
        assert_eq!(severity_for_score(1.49), Severity::Low);
        assert_eq!(severity_for_score(1.0), Severity::Low);
        assert_eq!(severity_for_score(3.0), Severity::High);
    }

    #[test]
    fn dominant_type_follows_the_majority() {
        let mut set = vec![
            member(Severity::Medium, SignalType::Cough, 0),
            member(Severity::Medium, SignalType::Cough, 1),
            member(Severity::Medium, SignalType::Fever, 2),
        ];
        assert_eq!(evaluate(&set).unwrap().event_type, SignalType::Cough);

        set.push(member(Severity::Medium, SignalType::Fever, 3));
        set.push(member(Severity::Medium, SignalType::Fever, 4));
        assert_eq!(evaluate(&set).unwrap().event_type, SignalType::Fever);
    }

    #[test]
    fn empty_member_set_yields_no_evaluation() {
        assert!(evaluate(&[]).is_none());
    }

    #[test]
    fn monitoring_escalates_at_threshold_with_medium_aggregate() {
        use Severity::*;
        let eval = evaluate(&members(&[High, High, Medium, Low, Low])).unwrap();
        assert_eq!(eval.severity, Severity::Medium);
        assert_eq!(
            next_status(EventStatus::Monitoring, &eval, 5),
            EventStatus::Active
        );
    }

    #[test]
    fn monitoring_escalates_on_a_single_high_even_with_low_aggregate() {
        use Severity::*;
        // (3 + 1 + 1 + 1 + 1) / 5 = 1.4 -> low aggregate, but one high
        // member at threshold count still escalates.
        let eval = evaluate(&members(&[High, Low, Low, Low, Low])).unwrap();
        assert_eq!(eval.severity, Severity::Low);
        assert_eq!(
            next_status(EventStatus::Monitoring, &eval, 5),
            EventStatus::Active
        );
    }

    #[test]
    fn monitoring_stays_put_below_threshold() {
        use Severity::*;
        let eval = evaluate(&members(&[High, High, High, High])).unwrap();
        assert_eq!(
            next_status(EventStatus::Monitoring, &eval, 5),
            EventStatus::Monitoring
        );
    }

    #[test]
    fn active_de_escalates_when_aggregate_degrades_below_medium() {
        use Severity::*;
        let eval = evaluate(&members(&[Low, Low, Low, Low, Low])).unwrap();
        assert_eq!(eval.severity, Severity::Low);
        assert!(!eval.any_high);
        assert_eq!(
            next_status(EventStatus::Active, &eval, 5),
            EventStatus::Monitoring
        );
    }

    #[test]
    fn resolved_is_terminal() {
        use Severity::*;
        let eval = evaluate(&members(&[High, High, High, High, High])).unwrap();
        assert_eq!(
            next_status(EventStatus::Resolved, &eval, 5),
            EventStatus::Resolved
        );
    }

    #[test]
    fn merged_member_sets_count_the_union_without_double_counting() {
        use std::collections::HashMap;

        let shared = vec![
            member(Severity::Medium, SignalType::Cough, 0),
            member(Severity::High, SignalType::Cough, 10),
        ];
        let mut first_cluster = shared.clone();
        first_cluster.push(member(Severity::Low, SignalType::Cough, 20));
        first_cluster.push(member(Severity::Medium, SignalType::Cough, 30));

        let mut second_cluster = shared.clone();
        second_cluster.push(member(Severity::Medium, SignalType::Fever, 40));

        // A signal belongs to one event at a time, so a merge unions the
        // member sets by id.
        let mut merged: HashMap<uuid::Uuid, Signal> = HashMap::new();
        for signal in first_cluster.iter().chain(second_cluster.iter()) {
            merged.insert(signal.id, signal.clone());
        }
        let merged: Vec<Signal> = merged.into_values().collect();

        let eval = evaluate(&merged).unwrap();
        assert_eq!(eval.signal_count, 5);
        assert_eq!(
            eval.signal_count,
            first_cluster.len() as i64 + second_cluster.len() as i64 - shared.len() as i64
        );
    }

    #[test]
    fn resolution_requires_cooldown_and_decayed_count() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let cooldown = Duration::hours(72);

        // 73 hours of silence, decayed membership: resolve.
        assert!(resolution_due(now, now - Duration::hours(73), 0, cooldown, 5));
        // Exactly at the cool-down boundary: not yet.
        assert!(!resolution_due(now, now - Duration::hours(72), 0, cooldown, 5));
        // Quiet but somehow still a full in-window cluster: keep open.
        assert!(!resolution_due(now, now - Duration::hours(73), 5, cooldown, 5));
    }
}
