use std::time::Duration as StdDuration;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::{self, AlertAction};
use crate::cluster::{self, Attribution};
use crate::config::Config;
use crate::db;
use crate::error::EngineError;
use crate::ingest::{self, RawSignal};
use crate::lifecycle;
use crate::models::{Alert, AlertStatus, Event, EventStatus, Signal};

/// Result of one ingest call: the stored signal, the event it ended up
/// attributed to (if any), and the alert issued by this ingest (if any).
#[derive(Debug)]
pub struct IngestOutcome {
    pub signal: Signal,
    pub event: Option<Event>,
    pub alert: Option<Alert>,
}

/// Validates and ingests one raw submission, running attribution,
/// lifecycle evaluation, and alert derivation inside a transaction
/// serialized on the signal's location key. Conflicting ingests retry a
/// bounded number of times before surfacing ServiceBusy; the whole call
/// is safe for the caller to retry since it re-validates and
/// re-attributes from scratch.
pub async fn ingest_signal(
    pool: &PgPool,
    config: &Config,
    raw: &RawSignal,
) -> Result<IngestOutcome, EngineError> {
    let signal = ingest::validate(raw)?;

    let mut attempt = 0u32;
    loop {
        match attribute(pool, config, &signal).await {
            Ok((event, pending_alert)) => {
                let alert = match pending_alert {
                    Some(action) => apply_alert_action(pool, event.as_ref(), action).await,
                    None => None,
                };
                return Ok(IngestOutcome {
                    signal,
                    event,
                    alert,
                });
            }
            Err(err) if is_conflict(&err) => {
                attempt += 1;
                if attempt > config.max_retries {
                    return Err(EngineError::ServiceBusy(config.max_retries));
                }
                let backoff = StdDuration::from_millis(50 * u64::from(attempt));
                warn!(
                    location_key = %signal.location_key,
                    attempt,
                    "attribution conflict, retrying after {backoff:?}"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// One serialized attribution attempt. Returns the event the signal was
/// attributed to and the alert action the transition produced; the alert
/// action is applied after commit, since alert delivery is best-effort
/// relative to the authoritative event state.
async fn attribute(
    pool: &PgPool,
    config: &Config,
    signal: &Signal,
) -> Result<(Option<Event>, Option<AlertAction>), sqlx::Error> {
    let mut tx = pool.begin().await?;
    db::lock_location_key(&mut *tx, &signal.location_key).await?;

    db::insert_signal(&mut *tx, signal).await?;

    let open_events = db::fetch_open_events(&mut *tx, &signal.location_key).await?;
    let unattributed = db::fetch_unattributed_signals(&mut *tx, &signal.location_key).await?;
    let decision = cluster::decide(
        &open_events,
        &unattributed,
        signal,
        config.window(),
        config.formation_threshold,
    );

    let outcome = match decision {
        Attribution::Standalone => {
            debug!(
                location_key = %signal.location_key,
                pool = unattributed.len(),
                "signal stays unattributed"
            );
            (None, None)
        }
        Attribution::Attach { event_id, absorb } => {
            let target = open_events
                .iter()
                .find(|ev| ev.id == event_id)
                .cloned()
                .ok_or(sqlx::Error::RowNotFound)?;
            let merged_created_at = merge_events(&mut tx, &target, &open_events, &absorb).await?;

            db::assign_signals(&mut *tx, &[signal.id], target.id).await?;

            let event =
                reevaluate(&mut tx, target, merged_created_at, config).await?;
            let action = derive_alert(&mut tx, &event).await?;
            (Some(event), action)
        }
        Attribution::Form { member_ids } => {
            let event = form_event(&mut tx, signal, &unattributed, &member_ids, config).await?;
            info!(
                event_id = %event.id,
                location_key = %event.location_key,
                signal_count = event.signal_count,
                status = %event.status,
                "new event formed"
            );
            let action = derive_alert(&mut tx, &event).await?;
            (Some(event), action)
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Folds any other open events at the key into the target: their signals
/// move over, their standing alerts are superseded, and their rows are
/// removed. Returns the earliest created_at across the merged events.
async fn merge_events(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    target: &Event,
    open_events: &[Event],
    absorb: &[Uuid],
) -> Result<chrono::DateTime<Utc>, sqlx::Error> {
    let mut earliest = target.created_at;
    for absorbed_id in absorb {
        let Some(absorbed) = open_events.iter().find(|ev| ev.id == *absorbed_id) else {
            continue;
        };
        info!(from = %absorbed.id, into = %target.id, "merging overlapping events");
        earliest = earliest.min(absorbed.created_at);
        db::reassign_event_signals(&mut **tx, absorbed.id, target.id).await?;
        if let Some(alert) = db::fetch_active_alert(&mut **tx, absorbed.id).await? {
            db::mark_alert(&mut **tx, alert.id, AlertStatus::Superseded).await?;
        }
        db::delete_event(&mut **tx, absorbed.id).await?;
    }
    Ok(earliest)
}

/// Recomputes every derived field of an event from its current members
/// and applies the request-triggered status transition.
async fn reevaluate(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    mut event: Event,
    created_at: chrono::DateTime<Utc>,
    config: &Config,
) -> Result<Event, sqlx::Error> {
    let members = db::fetch_members(&mut **tx, event.id).await?;
    let Some(eval) = lifecycle::evaluate(&members) else {
        // All members administratively deleted; the event row lingers
        // until the sweep removes it.
        return Ok(event);
    };

    let previous_status = event.status;
    event.status = lifecycle::next_status(event.status, &eval, config.formation_threshold);
    event.severity = eval.severity;
    event.signal_count = eval.signal_count;
    event.event_type = eval.event_type;
    event.first_signal_at = eval.first_signal_at;
    event.last_signal_at = eval.last_signal_at;
    event.title = lifecycle::title(eval.event_type, &event.location);
    event.description = lifecycle::description(&eval, &event.location);
    event.created_at = created_at;
    event.updated_at = Utc::now();

    if previous_status != event.status {
        info!(
            event_id = %event.id,
            from = %previous_status,
            to = %event.status,
            "event status transition"
        );
    }

    db::update_event(&mut **tx, &event).await?;
    Ok(event)
}

/// Creates a brand-new event over exactly the chained member set.
async fn form_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    signal: &Signal,
    unattributed: &[Signal],
    member_ids: &[Uuid],
    config: &Config,
) -> Result<Event, sqlx::Error> {
    let members: Vec<Signal> = unattributed
        .iter()
        .filter(|s| member_ids.contains(&s.id))
        .cloned()
        .collect();
    let eval = lifecycle::evaluate(&members).ok_or(sqlx::Error::RowNotFound)?;

    // Representative location: the coarse leading segment of the
    // triggering signal's location, original casing preserved.
    let location = signal
        .location
        .split(',')
        .next()
        .unwrap_or(&signal.location)
        .trim()
        .to_string();

    let now = Utc::now();
    let status = lifecycle::next_status(EventStatus::Monitoring, &eval, config.formation_threshold);
    let event = Event {
        id: Uuid::new_v4(),
        title: lifecycle::title(eval.event_type, &location),
        location: location.clone(),
        location_key: signal.location_key.clone(),
        event_type: eval.event_type,
        severity: eval.severity,
        status,
        signal_count: eval.signal_count,
        description: lifecycle::description(&eval, &location),
        first_signal_at: eval.first_signal_at,
        last_signal_at: eval.last_signal_at,
        created_at: now,
        updated_at: now,
    };

    db::insert_event(&mut **tx, &event).await?;
    db::assign_signals(&mut **tx, member_ids, event.id).await?;
    Ok(event)
}

/// Runs the alert deriver against the event's standing alert. The
/// returned action is applied outside the attribution transaction.
async fn derive_alert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &Event,
) -> Result<Option<AlertAction>, sqlx::Error> {
    let active = db::fetch_active_alert(&mut **tx, event.id).await?;
    match alert::derive(event, active.as_ref()) {
        AlertAction::None => Ok(None),
        action => Ok(Some(action)),
    }
}

/// Best-effort alert persistence after the event transition committed.
/// A failure here is logged and left for re-derivation on the event's
/// next evaluation; it never rolls back the event state.
async fn apply_alert_action(
    pool: &PgPool,
    event: Option<&Event>,
    action: AlertAction,
) -> Option<Alert> {
    let event = event?;
    let result = async {
        if let AlertAction::Supersede { prior } = action {
            db::mark_alert(pool, prior, AlertStatus::Superseded).await?;
        }
        let snapshot = alert::snapshot(event);
        db::insert_alert(pool, &snapshot).await?;
        Ok::<Alert, sqlx::Error>(snapshot)
    }
    .await;

    match result {
        Ok(snapshot) => {
            info!(
                alert_id = %snapshot.id,
                event_id = %event.id,
                severity = %snapshot.severity,
                "alert issued"
            );
            Some(snapshot)
        }
        Err(err) => {
            warn!(event_id = %event.id, "alert persistence failed: {err}");
            None
        }
    }
}

/// Outcome of one resolution sweep pass.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub examined: usize,
    pub resolved: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

/// The periodic resolution sweep. Scans open events past the cool-down
/// cutoff, then re-checks each one's signal recency at commit time under
/// its location-key lock, so an in-flight ingest attributing a fresh
/// signal wins the race.
pub async fn sweep(pool: &PgPool, config: &Config) -> Result<SweepOutcome, EngineError> {
    let now = Utc::now();
    let candidates = db::stale_open_events(pool, now - config.cooldown()).await?;

    let mut outcome = SweepOutcome {
        examined: candidates.len(),
        ..SweepOutcome::default()
    };

    for candidate in candidates {
        let mut tx = pool.begin().await?;
        db::lock_location_key(&mut *tx, &candidate.location_key).await?;

        let Some(event) = db::fetch_event(&mut *tx, candidate.id).await? else {
            continue;
        };
        if !event.status.is_open() {
            continue;
        }

        match db::member_span(&mut *tx, event.id).await? {
            None => {
                // Every member was administratively deleted; an event
                // exists only while it has at least one signal.
                db::resolve_event_alerts(&mut *tx, event.id).await?;
                db::delete_event(&mut *tx, event.id).await?;
                tx.commit().await?;
                info!(event_id = %event.id, "removed event with no remaining signals");
                outcome.removed.push(event.id);
            }
            Some((_, last_signal_at, _)) => {
                let in_window =
                    db::count_members_since(&mut *tx, event.id, now - config.window()).await?;
                if lifecycle::resolution_due(
                    now,
                    last_signal_at,
                    in_window,
                    config.cooldown(),
                    config.formation_threshold,
                ) {
                    db::mark_event_resolved(&mut *tx, event.id, now).await?;
                    db::resolve_event_alerts(&mut *tx, event.id).await?;
                    tx.commit().await?;
                    info!(event_id = %event.id, "event resolved after cool-down");
                    outcome.resolved.push(event.id);
                }
                // Otherwise a fresh signal arrived since the scan; the
                // event stays open and the transaction rolls back.
            }
        }
    }

    Ok(outcome)
}

fn is_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}
