use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{Event, Signal, SignalType};

#[derive(Debug, Clone)]
pub struct SignalTypeSummary {
    pub signal_type: SignalType,
    pub count: usize,
    pub avg_weight: f64,
}

pub fn summarize_by_type(signals: &[Signal]) -> Vec<SignalTypeSummary> {
    let mut map: HashMap<SignalType, (usize, i64)> = HashMap::new();

    for signal in signals {
        let entry = map.entry(signal.signal_type).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += signal.severity.weight();
    }

    let mut summaries: Vec<SignalTypeSummary> = map
        .into_iter()
        .map(|(signal_type, (count, total_weight))| SignalTypeSummary {
            signal_type,
            count,
            avg_weight: if count == 0 {
                0.0
            } else {
                total_weight as f64 / count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

pub fn build_report(signals: &[Signal], events: &[Event]) -> String {
    let summaries = summarize_by_type(signals);

    let mut output = String::new();

    let _ = writeln!(output, "# Community Health Situation Report");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Signal Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No signals recorded for this window.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} signals (avg severity weight {:.1})",
                summary.signal_type.label(),
                summary.count,
                summary.avg_weight
            );
        }
    }

    let mut open_events: Vec<&Event> = events.iter().filter(|ev| ev.status.is_open()).collect();
    open_events.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.signal_count.cmp(&a.signal_count))
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Events");

    if open_events.is_empty() {
        let _ = writeln!(output, "No open events.");
    } else {
        for event in open_events.iter() {
            let _ = writeln!(
                output,
                "- [{}] {} ({} signals, {})",
                event.severity, event.title, event.signal_count, event.status
            );
        }
    }

    let mut recent_signals = signals.to_vec();
    recent_signals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Signal Notes");

    let noted: Vec<&Signal> = recent_signals
        .iter()
        .filter(|s| s.notes.is_some())
        .take(5)
        .collect();

    if noted.is_empty() {
        let _ = writeln!(output, "No signal notes recorded for this window.");
    } else {
        for signal in noted {
            let _ = writeln!(
                output,
                "- {} ({}) at {}: {}",
                signal.location,
                signal.signal_type,
                signal.created_at.format("%Y-%m-%d %H:%M UTC"),
                signal.notes.as_deref().unwrap_or_default()
            );
        }
    }

    output
}
